//! Reading a source in chunks, optionally paced to a byte rate.

use std::time::Duration;

use bytes::Bytes;
use futures_util::Stream;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;

/// Keeps a sender at or below `bytes_per_sec`.
#[derive(Debug)]
pub struct Pacer {
    bytes_per_sec: u64,
    started: Instant,
    sent: u64,
}

impl Pacer {
    pub fn new(bytes_per_sec: u64) -> Self {
        Self {
            bytes_per_sec: bytes_per_sec.max(1),
            started: Instant::now(),
            sent: 0,
        }
    }

    /// How long to wait before `len` more bytes may go out.
    pub fn delay_for(&mut self, len: usize) -> Duration {
        let due = Duration::from_secs_f64(self.sent as f64 / self.bytes_per_sec as f64);
        self.sent += len as u64;
        due.saturating_sub(self.started.elapsed())
    }

    pub async fn wait(&mut self, len: usize) {
        let delay = self.delay_for(len);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Stream `reader` as chunks of at most `chunk_size` bytes, paced when `rate` is set.
pub fn chunked<R>(
    reader: R,
    chunk_size: usize,
    rate: Option<u64>,
) -> impl Stream<Item = std::io::Result<Bytes>>
where
    R: AsyncRead + Unpin,
{
    let chunk_size = chunk_size.max(1);
    let pacer = rate.map(Pacer::new);
    futures_util::stream::unfold(
        (reader, pacer, false),
        move |(mut reader, mut pacer, done)| async move {
            if done {
                return None;
            }
            let mut buf = vec![0u8; chunk_size];
            match reader.read(&mut buf).await {
                Ok(0) => None,
                Ok(n) => {
                    buf.truncate(n);
                    if let Some(pacer) = pacer.as_mut() {
                        pacer.wait(n).await;
                    }
                    Some((Ok(Bytes::from(buf)), (reader, pacer, false)))
                }
                Err(e) => Some((Err(e), (reader, pacer, true))),
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;

    use super::*;

    #[tokio::test]
    async fn chunked_splits_input() {
        let data: &[u8] = b"abcdefghij";
        let chunks: Vec<Bytes> = chunked(data, 4, None)
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, vec![
            Bytes::from_static(b"abcd"),
            Bytes::from_static(b"efgh"),
            Bytes::from_static(b"ij"),
        ]);
    }

    #[tokio::test(start_paused = true)]
    async fn pacer_spreads_bytes_over_time() {
        let mut pacer = Pacer::new(1000);
        assert_eq!(pacer.delay_for(500), Duration::ZERO);
        assert_eq!(pacer.delay_for(500), Duration::from_millis(500));

        tokio::time::advance(Duration::from_millis(800)).await;
        assert_eq!(pacer.delay_for(500), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn paced_stream_takes_expected_time() {
        let data = vec![0u8; 3000];
        let start = Instant::now();
        let total: usize = chunked(&data[..], 1000, Some(1000))
            .map(|c| c.unwrap().len())
            .fold(0, |acc, n| async move { acc + n })
            .await;
        assert_eq!(total, 3000);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }
}
