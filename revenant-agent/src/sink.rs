use std::collections::VecDeque;

use log::warn;
use revenant_chan::Ctx;
use revenant_proto::Measurement;
use tokio::sync::{mpsc, oneshot};

/// Reported by `StatusQuery`; mirrors `Command::StatusCollectionReply`'s
/// sink-facing fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkStatus {
    pub sink_enabled: bool,
    pub queue_free: usize,
}

pub enum SinkEvent {
    /// Registers the one downstream consumer for this agent's
    /// measurements. Replies `false` over the oneshot if a sink is
    /// already registered — exactly one registered sink at a time is
    /// structural, not merely convention.
    RegisterSink { sink: mpsc::Sender<Measurement>, ack: oneshot::Sender<bool> },
    UnregisterSink,
    /// One collection tick's batch, handed over by the collector loop.
    RegisterMeasurements(Vec<Measurement>),
    /// Clears anything buffered but not yet forwarded, e.g. on
    /// `StopCollection` so a later `StartCollection` doesn't replay
    /// stale data to a newly registered sink.
    DropMeasurements,
    /// Flushes as much of the internal buffer downstream as the sink
    /// will currently accept. Sent by the collector loop after every
    /// batch so buffered measurements don't wait indefinitely.
    Drain,
    /// Rebounds the internal buffer to a new depth, sent by `Session`
    /// once per `StartCollection` so each run gets the queue depth the
    /// caller asked for instead of whatever the agent process started
    /// with. Shrinking drops the oldest measurements past the new
    /// bound rather than the newest, since they're already stale by
    /// the time the bound changes.
    SetQueueDepth(usize),
    StatusQuery(oneshot::Sender<SinkStatus>),
}

/// Runs the sink state machine until `ctx` is cancelled or its event
/// channel closes. Buffers up to `queue_depth` measurements internally
/// when no sink is registered yet or the registered sink's own queue
/// is full; the newest measurement is dropped (not the oldest) once
/// the internal buffer is itself full, so a sink that never shows up
/// can't grow memory without bound.
pub async fn run(ctx: Ctx, queue_depth: usize, mut events: mpsc::Receiver<SinkEvent>) {
    let mut sink: Option<mpsc::Sender<Measurement>> = None;
    let mut queue_depth = queue_depth;
    let mut buffer: VecDeque<Measurement> = VecDeque::with_capacity(queue_depth.min(1024));

    loop {
        let event = match revenant_chan::recv_blocking(&ctx, &mut events).await {
            Ok(event) => event,
            Err(_) => return,
        };

        match event {
            SinkEvent::RegisterSink { sink: new_sink, ack } => {
                if sink.is_some() {
                    let _ = ack.send(false);
                } else {
                    sink = Some(new_sink);
                    let _ = ack.send(true);
                    flush(&sink, &mut buffer);
                }
            }
            SinkEvent::UnregisterSink => {
                sink = None;
            }
            SinkEvent::RegisterMeasurements(batch) => {
                for measurement in batch {
                    push_one(&sink, &mut buffer, queue_depth, measurement);
                }
            }
            SinkEvent::DropMeasurements => {
                buffer.clear();
            }
            SinkEvent::Drain => {
                flush(&sink, &mut buffer);
            }
            SinkEvent::SetQueueDepth(depth) => {
                queue_depth = depth;
                while buffer.len() > queue_depth {
                    buffer.pop_front();
                }
            }
            SinkEvent::StatusQuery(reply) => {
                let status = SinkStatus {
                    sink_enabled: sink.is_some(),
                    queue_free: queue_depth.saturating_sub(buffer.len()),
                };
                let _ = reply.send(status);
            }
        }
    }
}

fn push_one(sink: &Option<mpsc::Sender<Measurement>>, buffer: &mut VecDeque<Measurement>, queue_depth: usize, measurement: Measurement) {
    if let Some(tx) = sink {
        if let Err(mpsc::error::TrySendError::Full(returned)) = tx.try_send(measurement) {
            buffer_one(buffer, queue_depth, returned);
        }
        return;
    }
    buffer_one(buffer, queue_depth, measurement);
}

fn buffer_one(buffer: &mut VecDeque<Measurement>, queue_depth: usize, measurement: Measurement) {
    if buffer.len() >= queue_depth {
        warn!("sink buffer full at {queue_depth}; dropping newest measurement for {}", measurement.system);
        return;
    }
    buffer.push_back(measurement);
}

fn flush(sink: &Option<mpsc::Sender<Measurement>>, buffer: &mut VecDeque<Measurement>) {
    let Some(tx) = sink else { return };
    while let Some(measurement) = buffer.pop_front() {
        if let Err(mpsc::error::TrySendError::Full(returned)) = tx.try_send(measurement) {
            buffer.push_front(returned);
            break;
        }
    }
}
