//! Byte-counting pass-through stream.

use bytes::Bytes;
use futures::Stream;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

/// Boxed chunk stream used for upload payloads.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + Sync + 'static>>;

/// Shared running total of bytes observed by a [`CountingStream`].
///
/// Cloning yields another handle to the same counter, so the entity that
/// owns a stream and the code that wrapped it both see the same total.
#[derive(Clone, Debug, Default)]
pub struct ByteCounter(Arc<AtomicU64>);

impl ByteCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes observed so far.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub(crate) fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn set(&self, n: u64) {
        self.0.store(n, Ordering::Relaxed);
    }
}

/// Pass-through stream adapter that counts every byte it forwards.
///
/// The count is accurate for all chunks that have passed through, including
/// when the inner stream errors or is dropped before completion. The adapter
/// does not buffer; back-pressure from the consumer reaches the producer
/// because `poll_next` is forwarded directly.
pub struct CountingStream<S> {
    inner: S,
    counter: ByteCounter,
}

impl<S> CountingStream<S> {
    pub fn new(inner: S, counter: ByteCounter) -> Self {
        Self { inner, counter }
    }
}

impl<S> Stream for CountingStream<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = Pin::new(&mut self.inner).poll_next(cx);
        if let Poll::Ready(Some(Ok(chunk))) = &polled {
            self.counter.add(chunk.len() as u64);
        }
        polled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn chunks(sizes: &[usize]) -> Vec<io::Result<Bytes>> {
        sizes
            .iter()
            .map(|n| Ok(Bytes::from(vec![0u8; *n])))
            .collect()
    }

    #[tokio::test]
    async fn test_counts_all_bytes() {
        let counter = ByteCounter::new();
        let mut stream =
            CountingStream::new(futures::stream::iter(chunks(&[10, 20, 30])), counter.clone());

        while stream.next().await.is_some() {}

        assert_eq!(counter.get(), 60);
    }

    #[tokio::test]
    async fn test_count_stops_when_abandoned() {
        let counter = ByteCounter::new();
        let mut stream =
            CountingStream::new(futures::stream::iter(chunks(&[10, 20, 30])), counter.clone());

        stream.next().await;
        drop(stream);

        assert_eq!(counter.get(), 10);
    }

    #[tokio::test]
    async fn test_count_accurate_across_errors() {
        let counter = ByteCounter::new();
        let items: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from(vec![0u8; 5])),
            Err(io::Error::other("boom")),
            Ok(Bytes::from(vec![0u8; 7])),
        ];
        let mut stream = CountingStream::new(futures::stream::iter(items), counter.clone());

        assert!(stream.next().await.unwrap().is_ok());
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.unwrap().is_ok());

        assert_eq!(counter.get(), 12);
    }
}
