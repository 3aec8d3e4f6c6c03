//! Context-aware bounded channel primitives.
//!
//! Every long-lived task in this workspace is cancelled the same way:
//! a root `Ctx` is cloned into each task, and every blocking send/recv
//! races the operation against `ctx.cancelled()`. Cancellation always
//! wins a tie — `select!` below is `biased` with the cancellation arm
//! listed first, so a simultaneously-ready queue operation never beats
//! an already-cancelled context.

use tokio::sync::mpsc;
pub use tokio_util::sync::CancellationToken as Ctx;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    Cancelled,
    /// The receiver half has been dropped; no further values will be
    /// accepted.
    Closed,
    /// The queue was full; only returned by `send_nowait`.
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
    Cancelled,
    /// The sender half has been dropped; no further values will
    /// arrive.
    Closed,
    /// The queue was empty; only returned by `recv_nowait`.
    Empty,
}

/// Waits for either space in `tx` or cancellation of `ctx`.
pub async fn send_blocking<T>(ctx: &Ctx, tx: &mpsc::Sender<T>, value: T) -> Result<(), SendError> {
    tokio::select! {
        biased;
        _ = ctx.cancelled() => Err(SendError::Cancelled),
        result = tx.send(value) => result.map_err(|_| SendError::Closed),
    }
}

/// Returns `Busy` immediately if `tx`'s queue is full.
pub fn send_nowait<T>(ctx: &Ctx, tx: &mpsc::Sender<T>, value: T) -> Result<(), SendError> {
    if ctx.is_cancelled() {
        return Err(SendError::Cancelled);
    }
    match tx.try_send(value) {
        Ok(()) => Ok(()),
        Err(mpsc::error::TrySendError::Full(_)) => Err(SendError::Busy),
        Err(mpsc::error::TrySendError::Closed(_)) => Err(SendError::Closed),
    }
}

/// Waits for either a value on `rx` or cancellation of `ctx`.
pub async fn recv_blocking<T>(ctx: &Ctx, rx: &mut mpsc::Receiver<T>) -> Result<T, RecvError> {
    tokio::select! {
        biased;
        _ = ctx.cancelled() => Err(RecvError::Cancelled),
        item = rx.recv() => item.ok_or(RecvError::Closed),
    }
}

/// Returns `Empty` immediately if `rx` has nothing queued.
pub fn recv_nowait<T>(ctx: &Ctx, rx: &mut mpsc::Receiver<T>) -> Result<T, RecvError> {
    if ctx.is_cancelled() {
        return Err(RecvError::Cancelled);
    }
    match rx.try_recv() {
        Ok(v) => Ok(v),
        Err(mpsc::error::TryRecvError::Empty) => Err(RecvError::Empty),
        Err(mpsc::error::TryRecvError::Disconnected) => Err(RecvError::Closed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancellation_dominates_recv_blocking() {
        let ctx = Ctx::new();
        let (_tx, mut rx) = mpsc::channel::<u32>(4);
        ctx.cancel();
        let result = recv_blocking(&ctx, &mut rx).await;
        assert_eq!(result, Err(RecvError::Cancelled));
    }

    #[test]
    fn cancellation_dominates_recv_nowait_even_with_data() {
        let ctx = Ctx::new();
        let (tx, mut rx) = mpsc::channel::<u32>(4);
        tx.try_send(7).unwrap();
        ctx.cancel();
        // Data is sitting in the queue, but an already-cancelled
        // context must win without touching it.
        assert_eq!(recv_nowait(&ctx, &mut rx), Err(RecvError::Cancelled));
    }

    #[test]
    fn send_nowait_reports_busy_when_full() {
        let ctx = Ctx::new();
        let (tx, _rx) = mpsc::channel::<u32>(1);
        assert_eq!(send_nowait(&ctx, &tx, 1), Ok(()));
        assert_eq!(send_nowait(&ctx, &tx, 2), Err(SendError::Busy));
    }

    #[test]
    fn recv_nowait_reports_closed_after_sender_dropped() {
        let ctx = Ctx::new();
        let (tx, mut rx) = mpsc::channel::<u32>(1);
        drop(tx);
        assert_eq!(recv_nowait(&ctx, &mut rx), Err(RecvError::Closed));
    }

    #[tokio::test]
    async fn send_blocking_waits_for_space_then_succeeds() {
        let ctx = Ctx::new();
        let (tx, mut rx) = mpsc::channel::<u32>(1);
        tx.try_send(1).unwrap();
        let ctx2 = ctx.clone();
        let handle = tokio::spawn(async move { send_blocking(&ctx2, &tx, 2).await });
        // Drain the one slot so the blocked send can proceed.
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(handle.await.unwrap(), Ok(()));
        assert_eq!(rx.recv().await, Some(2));
    }
}
