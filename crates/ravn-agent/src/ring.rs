//! Ring-buffer consumption.
//!
//! A [`RingConsumer`] drains one probe's ring buffer, validates framing, and
//! hands each surviving frame to a sink. The byte source is abstracted as a
//! [`RecordStream`] so the same consumer logic runs over a kernel ring buffer
//! in production and an in-memory queue under test.

use std::collections::VecDeque;

use aya::maps::{MapData, RingBuf};

use ravn_core::error::{Error, Result};
use ravn_core::normalize::RawRecord;
use ravn_core::probe::ProbeKind;
use ravn_core::shutdown::ShutdownToken;

/// Frames shorter than this cannot carry the leading sub-type tag and are
/// dropped as malformed.
pub const MIN_FRAME_LEN: usize = 4;

/// Receives raw records from a ring consumer. Implementations must not
/// block; the pipeline sink normalizes and enqueues.
pub trait RecordSink {
    fn deliver(&mut self, record: &RawRecord<'_>);
}

/// A non-blocking source of reservation-sized frames.
pub trait RecordStream: Send {
    /// Copy the next frame into `buf`, returning `Ok(false)` when the ring
    /// is currently empty.
    fn next_frame(&mut self, buf: &mut Vec<u8>) -> Result<bool>;
}

/// Production stream over an eBPF ring buffer map.
pub struct EbpfStream {
    ring: RingBuf<MapData>,
}

impl EbpfStream {
    pub fn new(ring: RingBuf<MapData>) -> Self {
        Self { ring }
    }
}

impl RecordStream for EbpfStream {
    fn next_frame(&mut self, buf: &mut Vec<u8>) -> Result<bool> {
        match self.ring.next() {
            Some(item) => {
                buf.clear();
                buf.extend_from_slice(&item);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// In-memory stream for tests and offline replay.
#[derive(Default)]
pub struct MemoryStream {
    frames: VecDeque<Vec<u8>>,
}

impl MemoryStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: Vec<u8>) {
        self.frames.push_back(frame);
    }
}

impl RecordStream for MemoryStream {
    fn next_frame(&mut self, buf: &mut Vec<u8>) -> Result<bool> {
        match self.frames.pop_front() {
            Some(frame) => {
                buf.clear();
                buf.extend_from_slice(&frame);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Drains one probe's ring buffer and delivers validated frames to a sink.
pub struct RingConsumer {
    probe: ProbeKind,
    stream: Box<dyn RecordStream>,
    buf: Vec<u8>,
    malformed: u64,
    delivered: u64,
}

impl RingConsumer {
    pub fn new(probe: ProbeKind, stream: Box<dyn RecordStream>) -> Self {
        Self {
            probe,
            stream,
            buf: Vec::with_capacity(ravn_common::MAX_RECORD_LEN),
            malformed: 0,
            delivered: 0,
        }
    }

    pub fn probe(&self) -> ProbeKind {
        self.probe
    }

    /// Drain up to `budget` frames. Frames outside the 4..=4096 byte bounds
    /// are dropped with the malformed counter incremented; everything else
    /// is passed to the sink untouched. Honors the shutdown token at each
    /// iteration boundary.
    pub fn poll(
        &mut self,
        budget: usize,
        token: &ShutdownToken,
        sink: &mut dyn RecordSink,
    ) -> Result<usize> {
        let mut delivered = 0usize;
        for _ in 0..budget {
            if token.is_signalled() {
                return Err(Error::ShuttingDown);
            }
            if !self.stream.next_frame(&mut self.buf)? {
                break;
            }
            let len = self.buf.len();
            if !(MIN_FRAME_LEN..=ravn_common::MAX_RECORD_LEN).contains(&len) {
                self.malformed += 1;
                continue;
            }
            sink.deliver(&RawRecord {
                probe: self.probe,
                bytes: &self.buf,
            });
            delivered += 1;
        }
        self.delivered += delivered as u64;
        Ok(delivered)
    }

    /// Frames dropped for violating the framing bounds.
    pub fn malformed(&self) -> u64 {
        self.malformed
    }

    /// Frames delivered to the sink over the consumer's lifetime.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CollectSink {
        frames: Vec<(ProbeKind, Vec<u8>)>,
    }

    impl CollectSink {
        fn new() -> Self {
            Self { frames: Vec::new() }
        }
    }

    impl RecordSink for CollectSink {
        fn deliver(&mut self, record: &RawRecord<'_>) {
            self.frames.push((record.probe, record.bytes.to_vec()));
        }
    }

    fn consumer_with(frames: Vec<Vec<u8>>) -> RingConsumer {
        let mut stream = MemoryStream::new();
        for frame in frames {
            stream.push(frame);
        }
        RingConsumer::new(ProbeKind::Network, Box::new(stream))
    }

    #[test]
    fn test_poll_delivers_in_order() {
        let mut consumer = consumer_with(vec![vec![1; 8], vec![2; 8], vec![3; 8]]);
        let mut sink = CollectSink::new();
        let token = ShutdownToken::new();
        let count = consumer.poll(16, &token, &mut sink).unwrap();
        assert_eq!(count, 3);
        assert_eq!(consumer.delivered(), 3);
        assert_eq!(sink.frames[0].1, vec![1; 8]);
        assert_eq!(sink.frames[2].1, vec![3; 8]);
    }

    #[test]
    fn test_poll_respects_budget() {
        let mut consumer = consumer_with((0..10).map(|i| vec![i as u8; 8]).collect());
        let mut sink = CollectSink::new();
        let token = ShutdownToken::new();
        assert_eq!(consumer.poll(4, &token, &mut sink).unwrap(), 4);
        assert_eq!(consumer.poll(100, &token, &mut sink).unwrap(), 6);
    }

    #[test]
    fn test_three_byte_frame_is_malformed() {
        // A 3-byte frame cannot carry the sub-type tag: dropped, counted,
        // never delivered.
        let mut consumer = consumer_with(vec![vec![0xAA, 0xBB, 0xCC]]);
        let mut sink = CollectSink::new();
        let token = ShutdownToken::new();
        let count = consumer.poll(16, &token, &mut sink).unwrap();
        assert_eq!(count, 0);
        assert_eq!(consumer.malformed(), 1);
        assert!(sink.frames.is_empty());
    }

    #[test]
    fn test_oversize_frame_is_malformed() {
        let mut consumer = consumer_with(vec![vec![0; ravn_common::MAX_RECORD_LEN + 1]]);
        let mut sink = CollectSink::new();
        let token = ShutdownToken::new();
        assert_eq!(consumer.poll(16, &token, &mut sink).unwrap(), 0);
        assert_eq!(consumer.malformed(), 1);
    }

    #[test]
    fn test_boundary_frames_pass() {
        let mut consumer = consumer_with(vec![
            vec![0; MIN_FRAME_LEN],
            vec![0; ravn_common::MAX_RECORD_LEN],
        ]);
        let mut sink = CollectSink::new();
        let token = ShutdownToken::new();
        assert_eq!(consumer.poll(16, &token, &mut sink).unwrap(), 2);
        assert_eq!(consumer.malformed(), 0);
    }

    #[test]
    fn test_poll_returns_shutting_down_promptly() {
        let mut consumer = consumer_with(vec![vec![0; 8], vec![1; 8]]);
        let mut sink = CollectSink::new();
        let token = ShutdownToken::new();
        token.signal();
        let result = consumer.poll(16, &token, &mut sink);
        assert!(matches!(result, Err(Error::ShuttingDown)));
        assert!(sink.frames.is_empty());
    }

    #[test]
    fn test_stream_error_propagates() {
        struct FailingStream;
        impl RecordStream for FailingStream {
            fn next_frame(&mut self, _buf: &mut Vec<u8>) -> Result<bool> {
                Err(Error::ProbeFault("ring gone".into()))
            }
        }
        let mut consumer = RingConsumer::new(ProbeKind::ExecFs, Box::new(FailingStream));
        let mut sink = CollectSink::new();
        let token = ShutdownToken::new();
        assert!(matches!(
            consumer.poll(1, &token, &mut sink),
            Err(Error::ProbeFault(_))
        ));
    }
}
