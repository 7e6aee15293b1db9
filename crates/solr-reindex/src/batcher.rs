//! Bounded batching between the merged read stream and the writers.

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::error::Result;

/// Groups a stream into fixed-size batches behind a bounded buffer.
///
/// At most `batch_size * max_in_flight` items wait between the reader and
/// the writers; once the buffer is full, reading pauses until writers
/// catch up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackpressureBatcher {
    batch_size: usize,
    max_in_flight: usize,
}

impl BackpressureBatcher {
    /// Creates a batcher; zero sizes are treated as one.
    #[must_use]
    pub fn new(batch_size: usize, max_in_flight: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// Items that may sit buffered ahead of the batches.
    #[must_use]
    pub fn buffer_capacity(&self) -> usize {
        self.batch_size
            .max(self.batch_size.saturating_mul(self.max_in_flight))
    }

    /// Re-chunks `items` into batches of `batch_size`; the last batch may be
    /// shorter. The first error is forwarded after the batch that preceded
    /// it and ends the stream.
    ///
    /// Must be called from within a Tokio runtime: a pump task moves items
    /// into the bounded buffer.
    pub fn batch<T>(&self, items: BoxStream<'static, Result<T>>) -> BoxStream<'static, Result<Vec<T>>>
    where
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::channel(self.buffer_capacity());
        let mut pump = JoinSet::new();

        pump.spawn(async move {
            let mut items = items;
            while let Some(item) = items.next().await {
                let failed = item.is_err();
                if tx.send(item).await.is_err() || failed {
                    break;
                }
            }
        });

        // The pump, and the source stream it owns, die with the batches.
        stream::unfold((rx, pump), |(mut rx, pump)| async move {
            rx.recv().await.map(|item| (item, (rx, pump)))
        })
        .try_chunks(self.batch_size)
        .map_err(|e| e.1)
        .boxed()
    }
}
