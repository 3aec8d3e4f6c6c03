use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{info, warn};
use revenant_chan::Ctx;
use revenant_proc::{Differentiator, SysfsNicCapability};
use revenant_proto::{Command, OobFrame};
use revenant_transport::{Keypair, PeerPolicy, SecureChannel};
use tokio::net::TcpStream;

use crate::error::ProcessorError;
use crate::sink::{JournalSink, RecordSink};

/// One agent this processor pulls from.
pub struct AgentEndpoint {
    pub addr: String,
    pub remote_static_pubkey: Vec<u8>,
    pub policy: Arc<dyn PeerPolicy>,
    pub site: u64,
    pub host: u64,
}

pub struct BackoffConfig {
    pub min: Duration,
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self { min: Duration::from_millis(500), max: Duration::from_secs(30) }
    }
}

/// Reconnects to `endpoint` until `ctx` is cancelled or a terminal
/// error (a rejected peer key) occurs. The differentiator's priming
/// state survives a reconnect that didn't change the agent's
/// collection `start` timestamp; a changed (or newly-seen) `start`
/// means the agent began a new run, which gets a fresh differentiator
/// so the first post-reconnect sample of every series primes again.
pub async fn run(
    ctx: Ctx,
    endpoint: AgentEndpoint,
    local_keypair: Arc<Keypair>,
    journal: Arc<dyn JournalSink>,
    records: Arc<dyn RecordSink>,
    backoff_config: BackoffConfig,
) {
    let mut differentiator = Differentiator::new(SysfsNicCapability);
    let mut current_run: Option<(u64, DateTime<Utc>)> = None;
    let mut next_run_id: u64 = 1;
    let mut backoff = backoff_config.min;

    while !ctx.is_cancelled() {
        match connect_and_process(
            &ctx,
            &endpoint,
            &local_keypair,
            &mut differentiator,
            &mut current_run,
            &mut next_run_id,
            journal.as_ref(),
            records.as_ref(),
        )
        .await
        {
            Ok(()) => {
                backoff = backoff_config.min;
            }
            Err(e) if e.is_terminal() => {
                warn!("giving up on {}: {e}", endpoint.addr);
                return;
            }
            Err(e) => {
                warn!("connection to {} failed: {e}; retrying in {backoff:?}", endpoint.addr);
            }
        }

        tokio::select! {
            biased;
            _ = ctx.cancelled() => return,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(backoff_config.max);
    }
}

async fn connect_and_process(
    ctx: &Ctx,
    endpoint: &AgentEndpoint,
    local_keypair: &Keypair,
    differentiator: &mut Differentiator<SysfsNicCapability>,
    current_run: &mut Option<(u64, DateTime<Utc>)>,
    next_run_id: &mut u64,
    journal: &dyn JournalSink,
    records: &dyn RecordSink,
) -> Result<(), ProcessorError> {
    let mut stream = TcpStream::connect(&endpoint.addr).await?;
    let transport = revenant_transport::initiate(&mut stream, local_keypair, &endpoint.remote_static_pubkey, endpoint.policy.as_ref())
        .await
        .map_err(|e| match e {
            revenant_transport::TransportError::PeerRejected => ProcessorError::Terminal(e.to_string()),
            other => ProcessorError::Transport(other),
        })?;
    let channel = SecureChannel::new(stream, transport);
    let (mut mux, handle) = revenant_transport::spawn_multiplexer(channel, ctx.child_token());

    mux.outgoing_oob.send(OobFrame::new(1, Command::RegisterSink)).await.map_err(|_| ProcessorError::RegisterSinkRejected("connection closed".into()))?;
    match mux.incoming_oob.recv().await {
        Some(OobFrame { command: Command::Ack, .. }) => {}
        Some(OobFrame { command: Command::Error { message }, .. }) => return Err(ProcessorError::RegisterSinkRejected(message)),
        _ => return Err(ProcessorError::RegisterSinkRejected("connection closed before ack".into())),
    }

    mux.outgoing_oob.send(OobFrame::new(2, Command::StatusCollection)).await.map_err(|_| ProcessorError::RegisterSinkRejected("connection closed".into()))?;
    let start = match mux.incoming_oob.recv().await {
        Some(OobFrame { command: Command::StatusCollectionReply { start, .. }, .. }) => start,
        _ => None,
    };

    if let Some(started_at) = start {
        let is_new_run = match current_run {
            Some((_, known_start)) => *known_start != started_at,
            None => true,
        };
        if is_new_run {
            *differentiator = Differentiator::new(SysfsNicCapability);
            *current_run = Some((*next_run_id, started_at));
            *next_run_id += 1;
            info!("agent {} started a new run at {started_at}", endpoint.addr);
        }
    }
    let run_id = current_run.map(|(id, _)| id).unwrap_or(0);

    loop {
        tokio::select! {
            biased;
            _ = ctx.cancelled() => break,
            incoming = mux.incoming_bulk.recv() => {
                let Some(measurement) = incoming else { break };
                let wrapped = revenant_proto::WrappedMeasurement { site: endpoint.site, host: endpoint.host, run: run_id, measurement };
                journal.append(wrapped.clone())?;
                let key = wrapped.series_key();
                let text = String::from_utf8_lossy(&wrapped.measurement.measurement).into_owned();
                match differentiator.advance(key.clone(), &wrapped.measurement.system, &text, wrapped.measurement.timestamp) {
                    Ok(Some(record)) => records.record(&key, record),
                    Ok(None) => {}
                    Err(e) => warn!("failed to differentiate {}: {e}", wrapped.measurement.system),
                }
            }
            incoming = mux.incoming_oob.recv() => {
                let Some(frame) = incoming else { break };
                warn!("unexpected OOB frame from agent after setup: {frame:?}");
            }
        }
    }

    handle.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{JournalSink, RecordSink};
    use revenant_proc::DifferentiatedRecord;
    use revenant_proto::SeriesKey;
    use revenant_transport::generate_keypair;
    use std::sync::Mutex as StdMutex;
    use tokio::net::TcpListener;

    struct CapturingJournal(StdMutex<Vec<revenant_proto::WrappedMeasurement>>);
    impl JournalSink for CapturingJournal {
        fn append(&self, wrapped: revenant_proto::WrappedMeasurement) -> Result<(), revenant_journal::JournalError> {
            self.0.lock().unwrap().push(wrapped);
            Ok(())
        }
    }

    struct CapturingRecords(StdMutex<Vec<(SeriesKey, DifferentiatedRecord)>>);
    impl RecordSink for CapturingRecords {
        fn record(&self, key: &SeriesKey, record: DifferentiatedRecord) {
            self.0.lock().unwrap().push((key.clone(), record));
        }
    }

    fn stat_measurement(text: &str, start: DateTime<Utc>) -> revenant_proto::Measurement {
        revenant_proto::Measurement {
            timestamp: start,
            start,
            duration_nanos: 10,
            frequency_nanos: 1_000_000_000,
            system: "/proc/stat".to_string(),
            measurement: text.as_bytes().to_vec(),
        }
    }

    /// Drives one fake agent connection through a canned
    /// handshake/RegisterSink/StatusCollection exchange, then streams
    /// `bulk` before hanging up.
    async fn fake_agent(
        listener: TcpListener,
        agent_kp: snow::Keypair,
        register_reply: Command,
        status_start: Option<DateTime<Utc>>,
        bulk: Vec<revenant_proto::Measurement>,
    ) {
        let (mut stream, _addr) = listener.accept().await.unwrap();
        let (transport, _remote) = revenant_transport::respond(&mut stream, &agent_kp, &revenant_transport::Insecure).await.unwrap();
        let channel = SecureChannel::new(stream, transport);
        let ctx = Ctx::new();
        let (mut mux, _handle) = revenant_transport::spawn_multiplexer(channel, ctx.clone());

        let register = mux.incoming_oob.recv().await.unwrap();
        mux.outgoing_oob.send(OobFrame::new(register.tag, register_reply)).await.unwrap();

        if let Some(status_request) = mux.incoming_oob.recv().await {
            let reply = Command::StatusCollectionReply { start: status_start, queue_free: 16, sink_enabled: true, measurement_enabled: true };
            let _ = mux.outgoing_oob.send(OobFrame::new(status_request.tag, reply)).await;
        }

        for measurement in bulk {
            let _ = mux.outgoing_bulk.send(measurement).await;
        }

        // Give the client a moment to drain before the connection drops.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn registers_journals_and_differentiates_bulk_measurements() {
        let agent_kp = generate_keypair().unwrap();
        let agent_pub = agent_kp.public.clone();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let start = Utc::now();
        let bulk = vec![
            stat_measurement("cpu  100 0 50 850 0 0 0 0 0 0", start),
            stat_measurement("cpu  110 0 55 875 0 0 0 0 0 0", start + chrono::Duration::seconds(1)),
        ];
        let server = tokio::spawn(fake_agent(listener, agent_kp, Command::Ack, Some(start), bulk));

        let processor_kp = generate_keypair().unwrap();
        let journal = Arc::new(CapturingJournal(StdMutex::new(Vec::new())));
        let records = Arc::new(CapturingRecords(StdMutex::new(Vec::new())));
        let endpoint = AgentEndpoint {
            addr: addr.to_string(),
            remote_static_pubkey: agent_pub,
            policy: Arc::new(revenant_transport::Insecure),
            site: 1,
            host: 1,
        };

        let ctx = Ctx::new();
        let mut differentiator = Differentiator::new(SysfsNicCapability);
        let mut current_run = None;
        let mut next_run_id = 1;
        connect_and_process(&ctx, &endpoint, &processor_kp, &mut differentiator, &mut current_run, &mut next_run_id, journal.as_ref(), records.as_ref())
            .await
            .unwrap();

        server.await.unwrap();

        assert_eq!(journal.0.lock().unwrap().len(), 2);
        assert_eq!(records.0.lock().unwrap().len(), 1);
        let (_, record) = &records.0.lock().unwrap()[0];
        let DifferentiatedRecord::Stat(stat_records) = record else { panic!("expected a Stat record") };
        assert!(stat_records.iter().any(|r| r.cpu_id == -1));
    }

    #[tokio::test]
    async fn register_sink_rejection_is_retryable_not_terminal() {
        let agent_kp = generate_keypair().unwrap();
        let agent_pub = agent_kp.public.clone();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(fake_agent(
            listener,
            agent_kp,
            Command::Error { message: "a sink is already registered".to_string() },
            None,
            Vec::new(),
        ));

        let processor_kp = generate_keypair().unwrap();
        let journal = Arc::new(CapturingJournal(StdMutex::new(Vec::new())));
        let records = Arc::new(CapturingRecords(StdMutex::new(Vec::new())));
        let endpoint = AgentEndpoint {
            addr: addr.to_string(),
            remote_static_pubkey: agent_pub,
            policy: Arc::new(revenant_transport::Insecure),
            site: 1,
            host: 1,
        };

        let ctx = Ctx::new();
        let mut differentiator = Differentiator::new(SysfsNicCapability);
        let mut current_run = None;
        let mut next_run_id = 1;
        let result = connect_and_process(&ctx, &endpoint, &processor_kp, &mut differentiator, &mut current_run, &mut next_run_id, journal.as_ref(), records.as_ref()).await;

        assert!(matches!(result, Err(ProcessorError::RegisterSinkRejected(_))));
        assert!(!result.unwrap_err().is_terminal());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn a_changed_run_start_resets_the_differentiator() {
        let agent_kp = generate_keypair().unwrap();
        let agent_pub = agent_kp.public.clone();
        let processor_kp = generate_keypair().unwrap();
        let journal = Arc::new(CapturingJournal(StdMutex::new(Vec::new())));
        let records = Arc::new(CapturingRecords(StdMutex::new(Vec::new())));
        let endpoint = AgentEndpoint {
            addr: String::new(),
            remote_static_pubkey: agent_pub,
            policy: Arc::new(revenant_transport::Insecure),
            site: 1,
            host: 1,
        };

        let mut differentiator = Differentiator::new(SysfsNicCapability);
        let mut current_run = None;
        let mut next_run_id = 1u64;

        // First run: two samples, primes then differentiates.
        let run_one_start = Utc::now();
        run_one_connection(&endpoint, &agent_kp, &processor_kp, &mut differentiator, &mut current_run, &mut next_run_id, journal.as_ref(), records.as_ref(), run_one_start).await;
        assert_eq!(records.0.lock().unwrap().len(), 1);
        assert_eq!(current_run.unwrap().0, 1);

        // Second run starts later: a fresh `start` means a fresh run id
        // and a re-primed differentiator, so its first sample alone
        // emits nothing even though the series key repeats.
        let run_two_start = run_one_start + chrono::Duration::seconds(60);
        run_two_connection_primes_only(&endpoint, &agent_kp, &processor_kp, &mut differentiator, &mut current_run, &mut next_run_id, journal.as_ref(), records.as_ref(), run_two_start).await;
        assert_eq!(records.0.lock().unwrap().len(), 1, "the priming sample of the new run must not produce a record");
        assert_eq!(current_run.unwrap().0, 2);
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_one_connection(
        endpoint_template: &AgentEndpoint,
        agent_kp: &snow::Keypair,
        processor_kp: &snow::Keypair,
        differentiator: &mut Differentiator<SysfsNicCapability>,
        current_run: &mut Option<(u64, DateTime<Utc>)>,
        next_run_id: &mut u64,
        journal: &dyn JournalSink,
        records: &dyn RecordSink,
        start: DateTime<Utc>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let bulk = vec![
            stat_measurement("cpu  0 0 0 0 0 0 0 0 0 0", start),
            stat_measurement("cpu  10 0 5 85 0 0 0 0 0 0", start + chrono::Duration::seconds(1)),
        ];
        let server = tokio::spawn(fake_agent(listener, clone_keypair(agent_kp), Command::Ack, Some(start), bulk));

        let endpoint = AgentEndpoint { addr: addr.to_string(), ..clone_endpoint(endpoint_template) };
        let ctx = Ctx::new();
        connect_and_process(&ctx, &endpoint, processor_kp, differentiator, current_run, next_run_id, journal, records).await.unwrap();
        server.await.unwrap();
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_two_connection_primes_only(
        endpoint_template: &AgentEndpoint,
        agent_kp: &snow::Keypair,
        processor_kp: &snow::Keypair,
        differentiator: &mut Differentiator<SysfsNicCapability>,
        current_run: &mut Option<(u64, DateTime<Utc>)>,
        next_run_id: &mut u64,
        journal: &dyn JournalSink,
        records: &dyn RecordSink,
        start: DateTime<Utc>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let bulk = vec![stat_measurement("cpu  0 0 0 0 0 0 0 0 0 0", start)];
        let server = tokio::spawn(fake_agent(listener, clone_keypair(agent_kp), Command::Ack, Some(start), bulk));

        let endpoint = AgentEndpoint { addr: addr.to_string(), ..clone_endpoint(endpoint_template) };
        let ctx = Ctx::new();
        connect_and_process(&ctx, &endpoint, processor_kp, differentiator, current_run, next_run_id, journal, records).await.unwrap();
        server.await.unwrap();
    }

    fn clone_keypair(kp: &snow::Keypair) -> snow::Keypair {
        snow::Keypair { private: kp.private.clone(), public: kp.public.clone() }
    }

    fn clone_endpoint(e: &AgentEndpoint) -> AgentEndpoint {
        AgentEndpoint { addr: e.addr.clone(), remote_static_pubkey: e.remote_static_pubkey.clone(), policy: e.policy.clone(), site: e.site, host: e.host }
    }
}
