use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::errors::{Result, WorkerError};

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];
const READ_CHUNK: usize = 8192;

/// Slices an MJPEG byte stream into discrete JPEG images.
///
/// Bytes before the first start-of-image marker are discarded. Each returned
/// frame starts with `FF D8` and ends with `FF D9`; nothing between the
/// markers is validated.
pub struct MjpegFramer<R> {
    reader: R,
    pending: Vec<u8>,
    chunk: Vec<u8>,
    in_frame: bool,
    scan_from: usize,
}

impl<R: AsyncRead + Unpin> MjpegFramer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            pending: Vec::new(),
            chunk: vec![0u8; READ_CHUNK],
            in_frame: false,
            scan_from: 0,
        }
    }

    /// Next complete JPEG, or `None` at a clean end of stream. EOF inside a
    /// frame is `TruncatedFrame`; reader failures are `SourceIo`.
    pub async fn next_frame(&mut self) -> Result<Option<Bytes>> {
        loop {
            if !self.in_frame {
                if let Some(start) = find_pair(&self.pending, 0, SOI) {
                    self.pending.drain(..start);
                    self.in_frame = true;
                    self.scan_from = 2;
                } else {
                    // Keep a trailing 0xFF, it may pair with the next chunk.
                    let keep = usize::from(self.pending.last() == Some(&0xFF));
                    let discard = self.pending.len() - keep;
                    self.pending.drain(..discard);
                    if self.fill().await? == 0 {
                        return Ok(None);
                    }
                    continue;
                }
            }

            if let Some(end) = find_pair(&self.pending, self.scan_from, EOI) {
                let rest = self.pending.split_off(end + 2);
                let frame = std::mem::replace(&mut self.pending, rest);
                self.in_frame = false;
                self.scan_from = 0;
                return Ok(Some(Bytes::from(frame)));
            }

            self.scan_from = self.pending.len().saturating_sub(1).max(2);
            if self.fill().await? == 0 {
                return Err(WorkerError::TruncatedFrame);
            }
        }
    }

    async fn fill(&mut self) -> Result<usize> {
        let n = self
            .reader
            .read(&mut self.chunk)
            .await
            .map_err(WorkerError::source_io)?;
        self.pending.extend_from_slice(&self.chunk[..n]);
        Ok(n)
    }
}

fn find_pair(buf: &[u8], from: usize, pair: [u8; 2]) -> Option<usize> {
    if buf.len() < 2 || from + 2 > buf.len() {
        return None;
    }
    buf[from..]
        .windows(2)
        .position(|window| window == pair)
        .map(|i| i + from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    /// Yields at most one byte per read so marker pairs land on read
    /// boundaries.
    struct TrickleReader {
        data: Vec<u8>,
        pos: usize,
    }

    impl AsyncRead for TrickleReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.pos < self.data.len() {
                let byte = self.data[self.pos];
                self.pos += 1;
                buf.put_slice(&[byte]);
            }
            Poll::Ready(Ok(()))
        }
    }

    struct FailingReader;

    impl AsyncRead for FailingReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, "boom")))
        }
    }

    fn jpeg(payload: &[u8]) -> Vec<u8> {
        let mut data = vec![0xFF, 0xD8];
        data.extend_from_slice(payload);
        data.extend_from_slice(&[0xFF, 0xD9]);
        data
    }

    #[tokio::test]
    async fn single_frame_is_bit_identical() {
        let input = jpeg(&[0x00, 0x11, 0x22]);
        let mut framer = MjpegFramer::new(&input[..]);
        let frame = framer.next_frame().await.unwrap().unwrap();
        assert_eq!(&frame[..], &input[..]);
        assert!(framer.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn trailing_bytes_after_eoi_are_ignored() {
        let mut input = jpeg(&[0x42]);
        let frame_len = input.len();
        input.extend_from_slice(&[0x01, 0x02, 0x03]);
        let mut framer = MjpegFramer::new(&input[..]);
        let frame = framer.next_frame().await.unwrap().unwrap();
        assert_eq!(&frame[..], &input[..frame_len]);
        assert!(framer.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn preamble_before_soi_is_discarded() {
        let mut input = vec![0x00, 0x01, 0x02, 0x03];
        let frame = jpeg(&[0x42]);
        input.extend_from_slice(&frame);
        let mut framer = MjpegFramer::new(&input[..]);
        let out = framer.next_frame().await.unwrap().unwrap();
        assert_eq!(&out[..], &frame[..]);
    }

    #[tokio::test]
    async fn lone_ff_not_followed_by_d8_is_skipped() {
        let mut input = vec![0xFF, 0x00];
        let frame = jpeg(&[0x42]);
        input.extend_from_slice(&frame);
        let mut framer = MjpegFramer::new(&input[..]);
        let out = framer.next_frame().await.unwrap().unwrap();
        assert_eq!(&out[..], &frame[..]);
    }

    #[tokio::test]
    async fn consecutive_frames_are_split() {
        let first = jpeg(&[0x01, 0x02]);
        let second = jpeg(&[0x03, 0x04, 0x05]);
        let mut input = first.clone();
        input.extend_from_slice(&second);
        let mut framer = MjpegFramer::new(&input[..]);
        assert_eq!(&framer.next_frame().await.unwrap().unwrap()[..], &first[..]);
        assert_eq!(&framer.next_frame().await.unwrap().unwrap()[..], &second[..]);
        assert!(framer.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn markers_split_across_reads() {
        let first = jpeg(&[0x01, 0xFF, 0x00, 0x02]);
        let second = jpeg(&[0x03]);
        let mut input = vec![0x99, 0xFF];
        input.extend_from_slice(&first);
        input.extend_from_slice(&second);
        let mut framer = MjpegFramer::new(TrickleReader { data: input, pos: 0 });
        assert_eq!(&framer.next_frame().await.unwrap().unwrap()[..], &first[..]);
        assert_eq!(&framer.next_frame().await.unwrap().unwrap()[..], &second[..]);
        assert!(framer.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_mid_frame_is_truncated() {
        let input = vec![0xFF, 0xD8, 0x00, 0x11];
        let mut framer = MjpegFramer::new(&input[..]);
        assert!(matches!(
            framer.next_frame().await,
            Err(WorkerError::TruncatedFrame)
        ));
    }

    #[tokio::test]
    async fn reader_error_surfaces_as_source_io() {
        let mut framer = MjpegFramer::new(FailingReader);
        assert!(matches!(
            framer.next_frame().await,
            Err(WorkerError::SourceIo { .. })
        ));
    }

    #[tokio::test]
    async fn frames_carry_both_markers() {
        let mut input = vec![0xAA, 0xBB];
        for payload in [&[0x01u8][..], &[0x02, 0x03], &[0x04]] {
            input.extend_from_slice(&jpeg(payload));
            input.extend_from_slice(&[0xEE]);
        }
        let mut framer = MjpegFramer::new(&input[..]);
        let mut count = 0;
        while let Some(frame) = framer.next_frame().await.unwrap() {
            assert_eq!(&frame[..2], &SOI);
            assert_eq!(&frame[frame.len() - 2..], &EOI);
            count += 1;
        }
        assert_eq!(count, 3);
    }
}
