//! Sources of initial byte content for newly created blocks.

use crate::StoreError;

/// Observes cancellation requests for a long-running operation.
///
/// Implemented by whatever the caller of a cancellable operation (block creation, pattern search)
/// hands in; the reference [`ByteStream`] wrapper [`MonitoredByteStream`] polls it between reads.
pub trait Monitor: Send {
    /// Returns `true` once the operation this monitor observes should stop early.
    fn is_cancelled(&self) -> bool;
}

/// A [`Monitor`] that never cancels, for callers with no cancellation source.
#[derive(Clone, Copy, Debug, Default)]
pub struct NeverCancelled;

impl Monitor for NeverCancelled {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// A source of bytes used to fill a block's backing storage at creation time.
pub trait ByteStream: Send {
    /// Fills as much of `dst` as the stream has remaining, returning the number of bytes written.
    ///
    /// A short read (fewer bytes than `dst.len()`) signals the stream is exhausted; the caller
    /// zero-fills the remainder. Returning an `Err` aborts the block creation entirely.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Cancelled`] if a wrapping [`MonitoredByteStream`] observed
    /// cancellation, or whatever error the underlying source produced.
    fn read(&mut self, dst: &mut [u8]) -> Result<usize, StoreError>;
}

/// A [`ByteStream`] that fills every destination byte with the same constant value.
#[derive(Clone, Copy, Debug)]
pub struct ConstantByteStream {
    /// The byte value every read is filled with.
    fill: u8,
}

impl ConstantByteStream {
    /// Creates a stream that fills every read with `fill`.
    pub const fn new(fill: u8) -> Self {
        Self { fill }
    }
}

impl ByteStream for ConstantByteStream {
    fn read(&mut self, dst: &mut [u8]) -> Result<usize, StoreError> {
        dst.fill(self.fill);
        Ok(dst.len())
    }
}

/// A [`ByteStream`] that serves bytes from an in-memory slice, in order.
#[derive(Clone, Copy, Debug)]
pub struct SliceByteStream<'a> {
    /// The remaining, unread portion of the source slice.
    remaining: &'a [u8],
}

impl<'a> SliceByteStream<'a> {
    /// Creates a stream that serves `data` from the start.
    pub const fn new(data: &'a [u8]) -> Self {
        Self { remaining: data }
    }
}

impl ByteStream for SliceByteStream<'_> {
    fn read(&mut self, dst: &mut [u8]) -> Result<usize, StoreError> {
        let n = dst.len().min(self.remaining.len());
        dst[..n].copy_from_slice(&self.remaining[..n]);
        self.remaining = &self.remaining[n..];
        Ok(n)
    }
}

/// Wraps a [`ByteStream`] so every read first checks a [`Monitor`] for cancellation.
///
/// Used by [`crate::BlockStore::create_block`] callers that accept a caller-supplied monitor:
/// wrapping the fill stream lets a long-running, zero-filled-from-disk creation bail out between
/// chunks without the store itself needing to know about cancellation.
pub struct MonitoredByteStream<'a, M: ?Sized> {
    /// The wrapped source of bytes.
    inner: &'a mut dyn ByteStream,
    /// The cancellation source polled before every read.
    monitor: &'a M,
}

impl<'a, M: Monitor + ?Sized> MonitoredByteStream<'a, M> {
    /// Wraps `inner` so every [`ByteStream::read`] first checks `monitor`.
    pub fn new(inner: &'a mut dyn ByteStream, monitor: &'a M) -> Self {
        Self { inner, monitor }
    }
}

impl<M: Monitor + ?Sized> ByteStream for MonitoredByteStream<'_, M> {
    fn read(&mut self, dst: &mut [u8]) -> Result<usize, StoreError> {
        if self.monitor.is_cancelled() {
            return Err(StoreError::Cancelled);
        }

        self.inner.read(dst)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn constant_stream_fills_every_byte() {
        let mut stream = ConstantByteStream::new(0xAA);
        let mut buf = [0u8; 4];
        assert_eq!(stream.read(&mut buf).unwrap(), 4);
        assert_eq!(buf, [0xAA; 4]);
    }

    #[test]
    fn slice_stream_short_reads_when_exhausted() {
        let mut stream = SliceByteStream::new(&[1, 2, 3]);
        let mut buf = [0u8; 8];
        assert_eq!(stream.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
    }

    struct FlagMonitor(AtomicBool);
    impl Monitor for FlagMonitor {
        fn is_cancelled(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn monitored_stream_rejects_reads_once_cancelled() {
        let monitor = FlagMonitor(AtomicBool::new(false));
        let mut inner = ConstantByteStream::new(0);
        let mut stream = MonitoredByteStream::new(&mut inner, &monitor);

        let mut buf = [0u8; 1];
        assert!(stream.read(&mut buf).is_ok());

        monitor.0.store(true, Ordering::SeqCst);
        assert!(matches!(stream.read(&mut buf), Err(StoreError::Cancelled)));
    }
}
