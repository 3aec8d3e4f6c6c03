use chrono::{DateTime, Utc};
use revenant_chan::Ctx;
use revenant_proto::{validate_system_path, Command, Measurement, StartCollectionRequest};
use tokio::sync::{mpsc, oneshot};

use crate::collector::{self, CollectionConfig};
use crate::sink::{SinkEvent, SinkStatus};

/// Minimum collection frequency: faster than 1/sec isn't
/// supported, since replay's own adjusted-interval floor is 1ms and a
/// sub-second collection interval on constrained hosts mostly just
/// produces noise.
const MIN_FREQUENCY_MILLIS: u64 = 1000;

enum AgentState {
    Idle,
    Running { child_ctx: Ctx, config: CollectionConfig, started_at: DateTime<Utc> },
}

/// Owns one agent's collection lifecycle and dispatches OOB commands
/// against it. One `Session` per agent process; there is no concept
/// of multiple concurrent collection configs.
pub struct Session {
    root_ctx: Ctx,
    sink_events: mpsc::Sender<SinkEvent>,
    state: AgentState,
}

impl Session {
    pub fn new(root_ctx: Ctx, sink_events: mpsc::Sender<SinkEvent>) -> Self {
        Self { root_ctx, sink_events, state: AgentState::Idle }
    }

    pub async fn handle(&mut self, command: Command, bulk_sink: mpsc::Sender<Measurement>) -> Command {
        match command {
            Command::CollectOnce { systems } => self.collect_once(systems).await,
            Command::StartCollection(request) => self.start_collection(request).await,
            Command::StopCollection => self.stop_collection().await,
            Command::StatusCollection => self.status().await,
            Command::RegisterSink => self.register_sink(bulk_sink).await,
            Command::CollectDirectories { dirs } => collect_directories(dirs),
            other => Command::Error { message: format!("agent does not expect to receive {other:?}") },
        }
    }

    async fn collect_once(&self, systems: Vec<String>) -> Command {
        if let Err(e) = validate_systems(&systems) {
            return Command::Error { message: e };
        }
        let batch = collector::collect_once(&systems, MIN_FREQUENCY_MILLIS).await;
        Command::CollectOnceReply { values: batch.into_iter().map(|m| m.measurement).collect() }
    }

    async fn start_collection(&mut self, request: StartCollectionRequest) -> Command {
        if matches!(self.state, AgentState::Running { .. }) {
            return Command::Error { message: "collection already running".to_string() };
        }
        if request.frequency_millis < MIN_FREQUENCY_MILLIS {
            return Command::Error {
                message: format!("frequency_millis must be >= {MIN_FREQUENCY_MILLIS}"),
            };
        }
        if let Err(e) = validate_systems(&request.systems) {
            return Command::Error { message: e };
        }

        let _ = self.sink_events.send(SinkEvent::SetQueueDepth(request.queue_depth)).await;

        let child_ctx = self.root_ctx.child_token();
        let config = CollectionConfig { frequency_millis: request.frequency_millis, systems: request.systems };
        tokio::spawn(collector::run(child_ctx.clone(), config.clone(), self.sink_events.clone()));
        self.state = AgentState::Running { child_ctx, config, started_at: Utc::now() };
        Command::Ack
    }

    async fn stop_collection(&mut self) -> Command {
        match std::mem::replace(&mut self.state, AgentState::Idle) {
            AgentState::Idle => {
                self.state = AgentState::Idle;
                Command::Error { message: "collection is not running".to_string() }
            }
            AgentState::Running { child_ctx, .. } => {
                child_ctx.cancel();
                let _ = self.sink_events.send(SinkEvent::DropMeasurements).await;
                Command::Ack
            }
        }
    }

    async fn status(&self) -> Command {
        let (tx, rx) = oneshot::channel();
        if self.sink_events.send(SinkEvent::StatusQuery(tx)).await.is_err() {
            return Command::Error { message: "sink actor is unavailable".to_string() };
        }
        let SinkStatus { sink_enabled, queue_free } = rx.await.unwrap_or(SinkStatus { sink_enabled: false, queue_free: 0 });

        let start = match &self.state {
            AgentState::Running { started_at, .. } => Some(*started_at),
            AgentState::Idle => None,
        };
        Command::StatusCollectionReply {
            start,
            queue_free,
            sink_enabled,
            measurement_enabled: matches!(self.state, AgentState::Running { .. }),
        }
    }

    async fn register_sink(&self, bulk_sink: mpsc::Sender<Measurement>) -> Command {
        let (ack, ack_rx) = oneshot::channel();
        if self.sink_events.send(SinkEvent::RegisterSink { sink: bulk_sink, ack }).await.is_err() {
            return Command::Error { message: "sink actor is unavailable".to_string() };
        }
        match ack_rx.await {
            Ok(true) => Command::Ack,
            Ok(false) => Command::Error { message: "a sink is already registered".to_string() },
            Err(_) => Command::Error { message: "sink actor is unavailable".to_string() },
        }
    }
}

fn validate_systems(systems: &[String]) -> Result<(), String> {
    for system in systems {
        validate_system_path(system).map_err(|e| e.to_string())?;
    }
    Ok(())
}

fn collect_directories(dirs: Vec<String>) -> Command {
    let values = dirs
        .into_iter()
        .map(|dir| {
            std::fs::read_dir(&dir)
                .map(|entries| {
                    entries
                        .filter_map(|entry| entry.ok())
                        .filter_map(|entry| entry.file_name().into_string().ok())
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default()
        })
        .collect();
    Command::CollectDirectoriesReply { values }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unused_bulk_sink() -> mpsc::Sender<Measurement> {
        mpsc::channel(1).0
    }

    #[tokio::test]
    async fn rejects_frequency_below_one_second() {
        let ctx = Ctx::new();
        let (sink_tx, mut sink_rx) = mpsc::channel(8);
        tokio::spawn(async move { while sink_rx.recv().await.is_some() {} });
        let mut session = Session::new(ctx, sink_tx);

        let reply = session
            .handle(
                Command::StartCollection(StartCollectionRequest {
                    frequency_millis: 100,
                    systems: vec!["/proc/stat".to_string()],
                    queue_depth: 16,
                }),
                unused_bulk_sink(),
            )
            .await;
        assert!(matches!(reply, Command::Error { .. }));
    }

    #[tokio::test]
    async fn rejects_starting_collection_twice() {
        let ctx = Ctx::new();
        let (sink_tx, mut sink_rx) = mpsc::channel(8);
        tokio::spawn(async move { while sink_rx.recv().await.is_some() {} });
        let mut session = Session::new(ctx, sink_tx);

        let request = StartCollectionRequest {
            frequency_millis: 1000,
            systems: vec!["/proc/stat".to_string()],
            queue_depth: 16,
        };
        let first = session.handle(Command::StartCollection(request.clone()), unused_bulk_sink()).await;
        assert!(matches!(first, Command::Ack));

        let second = session.handle(Command::StartCollection(request), unused_bulk_sink()).await;
        assert!(matches!(second, Command::Error { .. }));
    }

    #[tokio::test]
    async fn stop_without_start_is_an_error() {
        let ctx = Ctx::new();
        let (sink_tx, mut sink_rx) = mpsc::channel(8);
        tokio::spawn(async move { while sink_rx.recv().await.is_some() {} });
        let mut session = Session::new(ctx, sink_tx);

        let reply = session.handle(Command::StopCollection, unused_bulk_sink()).await;
        assert!(matches!(reply, Command::Error { .. }));
    }

    #[tokio::test]
    async fn rejects_a_path_outside_proc_or_sys_class_net() {
        let ctx = Ctx::new();
        let (sink_tx, mut sink_rx) = mpsc::channel(8);
        tokio::spawn(async move { while sink_rx.recv().await.is_some() {} });
        let mut session = Session::new(ctx, sink_tx);

        let reply = session.handle(Command::CollectOnce { systems: vec!["/etc/passwd".to_string()] }, unused_bulk_sink()).await;
        assert!(matches!(reply, Command::Error { .. }));
    }
}
