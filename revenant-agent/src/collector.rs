use std::time::Instant;

use chrono::Utc;
use log::warn;
use revenant_chan::Ctx;
use revenant_proto::Measurement;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::sink::SinkEvent;

/// One collector configuration, validated at `StartCollection` time
/// `frequency_millis >= 1000` and every path in `systems`
/// already passed `revenant_proto::validate_system_path`.
#[derive(Debug, Clone)]
pub struct CollectionConfig {
    pub frequency_millis: u64,
    pub systems: Vec<String>,
}

/// Runs one tick-per-`frequency_millis` collection loop: reads every
/// configured system path, packages each read as a `Measurement`, and
/// hands the whole batch to the sink actor in one `RegisterMeasurements`
/// event followed by a `Drain` so buffered data doesn't wait for the
/// next tick to reach a registered sink.
///
/// A tick that takes longer than `frequency_millis` to complete (slow
/// disk, huge `/proc` file) delays the next tick rather than firing
/// twice back to back — `MissedTickBehavior::Delay`.
pub async fn run(ctx: Ctx, config: CollectionConfig, sink_events: mpsc::Sender<SinkEvent>) {
    let mut ticker = interval(Duration::from_millis(config.frequency_millis));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = ctx.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let batch = collect_once(&config.systems, config.frequency_millis).await;
        if sink_events.send(SinkEvent::RegisterMeasurements(batch)).await.is_err() {
            return;
        }
        if sink_events.send(SinkEvent::Drain).await.is_err() {
            return;
        }
    }
}

/// Reads every system path once "synchronously as far as this tick is
/// concerned" — each read runs on the blocking thread pool so a slow
/// `/proc` read on one system doesn't stall the others.
pub async fn collect_once(systems: &[String], frequency_millis: u64) -> Vec<Measurement> {
    let mut batch = Vec::with_capacity(systems.len());
    for system in systems {
        let system = system.clone();
        let start = Utc::now();
        let started = Instant::now();
        let read = tokio::task::spawn_blocking(move || std::fs::read(&system).map(|bytes| (system, bytes))).await;

        match read {
            Ok(Ok((system, bytes))) => {
                batch.push(Measurement {
                    timestamp: Utc::now(),
                    start,
                    duration_nanos: started.elapsed().as_nanos() as i64,
                    frequency_nanos: frequency_millis as i64 * 1_000_000,
                    system,
                    measurement: bytes,
                });
            }
            Ok(Err(e)) => warn!("collection read failed: {e}"),
            Err(e) => warn!("collection read task panicked: {e}"),
        }
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collects_one_measurement_per_readable_system() {
        let systems = vec!["/proc/stat".to_string(), "/proc/meminfo".to_string()];
        let batch = collect_once(&systems, 1000).await;
        assert_eq!(batch.len(), 2);
        assert!(batch.iter().any(|m| m.system == "/proc/stat"));
        assert!(!batch[0].measurement.is_empty());
    }

    #[tokio::test]
    async fn skips_unreadable_systems_without_failing_the_batch() {
        let systems = vec!["/proc/stat".to_string(), "/proc/this-does-not-exist-12345".to_string()];
        let batch = collect_once(&systems, 1000).await;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].system, "/proc/stat");
    }
}
