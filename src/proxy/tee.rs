//! Body duplication.
//!
//! Splits one single-consumer byte stream into two independent
//! single-consumer streams that each reproduce the source exactly.
//!
//! # Design Decisions
//! - A pump task reads the source and feeds two bounded channels
//! - A slow copy holds back the other only once its own buffer is full
//! - A dropped copy is detached; the other keeps receiving every chunk
//! - A source error is delivered to both copies, then both end
//! - The pump stops reading the source once both copies are dropped

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;

/// One copy of a duplicated body.
#[derive(Debug)]
pub struct TeeBody {
    rx: mpsc::Receiver<io::Result<Bytes>>,
}

impl Stream for TeeBody {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Split `source` into two copies, buffering up to `capacity` chunks per copy.
pub fn tee<S, E>(source: S, capacity: usize) -> (TeeBody, TeeBody)
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let capacity = capacity.max(1);
    let (left_tx, left_rx) = mpsc::channel(capacity);
    let (right_tx, right_rx) = mpsc::channel(capacity);
    tokio::spawn(pump(source, left_tx, right_tx));
    (TeeBody { rx: left_rx }, TeeBody { rx: right_rx })
}

async fn pump<S, E>(source: S, left: mpsc::Sender<io::Result<Bytes>>, right: mpsc::Sender<io::Result<Bytes>>)
where
    S: Stream<Item = Result<Bytes, E>> + Send,
    E: std::fmt::Display,
{
    futures_util::pin_mut!(source);
    let mut left = Some(left);
    let mut right = Some(right);

    while left.is_some() || right.is_some() {
        let item = tokio::select! {
            item = source.next() => item,
            _ = both_closed(&left, &right) => break,
        };
        match item {
            Some(Ok(chunk)) => {
                deliver(&mut left, || Ok(chunk.clone())).await;
                deliver(&mut right, || Ok(chunk.clone())).await;
            }
            Some(Err(e)) => {
                let message = e.to_string();
                tracing::debug!(error = %message, "Body source failed");
                deliver(&mut left, || Err(io::Error::new(io::ErrorKind::Other, message.clone()))).await;
                deliver(&mut right, || Err(io::Error::new(io::ErrorKind::Other, message.clone()))).await;
                break;
            }
            None => break,
        }
    }
}

/// Send to a copy, detaching it if its receiver is gone.
async fn deliver(
    slot: &mut Option<mpsc::Sender<io::Result<Bytes>>>,
    item: impl FnOnce() -> io::Result<Bytes>,
) {
    if let Some(tx) = slot {
        if tx.send(item()).await.is_err() {
            *slot = None;
        }
    }
}

/// Resolves once every still-attached copy has been dropped.
async fn both_closed(
    left: &Option<mpsc::Sender<io::Result<Bytes>>>,
    right: &Option<mpsc::Sender<io::Result<Bytes>>>,
) {
    match (left, right) {
        (Some(l), Some(r)) => {
            tokio::join!(l.closed(), r.closed());
        }
        (Some(l), None) => l.closed().await,
        (None, Some(r)) => r.closed().await,
        (None, None) => {}
    }
}

/// Read a copy to the end, keeping at most `limit` bytes.
///
/// Bytes past the limit are still drained so the other copy never waits on
/// this one.
pub async fn collect_limited(mut body: TeeBody, limit: usize) -> io::Result<Bytes> {
    let mut kept = Vec::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        let room = limit.saturating_sub(kept.len());
        kept.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }
    Ok(Bytes::from(kept))
}
