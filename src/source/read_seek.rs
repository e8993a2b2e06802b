use super::DataSource;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    fs::File,
    io::{
        Cursor,
        Error as IoError,
        ErrorKind as IoErrorKind,
        Read,
        Result as IoResult,
        Seek,
        SeekFrom,
    },
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
};
use tokio::sync::Notify;
use tracing::{debug, trace};

/// A [`DataSource`] over any synchronous, seekable reader.
///
/// Reads run on tokio's blocking pool, so a slow reader never stalls the
/// pipeline context which requested the bytes.
pub struct ReadSeekSource<R> {
    inner: Arc<Mutex<R>>,
    size: Option<u64>,
    streaming: bool,
    stopped: AtomicBool,
    stop_notify: Notify,
    bitrate: AtomicU32,
}

/// A [`DataSource`] over an owned, in-memory buffer.
pub type MemorySource = ReadSeekSource<Cursor<Vec<u8>>>;

/// A [`DataSource`] over a local file.
pub type FileSource = ReadSeekSource<File>;

impl<R: Read + Seek + Send + 'static> ReadSeekSource<R> {
    /// Wraps a seekable reader, measuring its length up front.
    pub fn new(mut reader: R) -> Self {
        let size = reader
            .seek(SeekFrom::End(0))
            .and_then(|len| reader.seek(SeekFrom::Start(0)).map(|_| len))
            .ok();

        Self::build(reader, size, false)
    }

    /// Wraps a reader of unknown length, reporting it as a live stream.
    pub fn streaming(reader: R) -> Self {
        Self::build(reader, None, true)
    }

    fn build(reader: R, size: Option<u64>, streaming: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(reader)),
            size,
            streaming,
            stopped: AtomicBool::new(false),
            stop_notify: Notify::new(),
            bitrate: AtomicU32::new(0),
        }
    }

    /// The last bitrate hint given to this source (`0` if none).
    pub fn bitrate(&self) -> u32 {
        self.bitrate.load(Ordering::Relaxed)
    }

    /// Returns whether [`DataSource::stop`] has been called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl MemorySource {
    /// Creates a source over a copy of `data`.
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        Self::new(Cursor::new(data.into()))
    }
}

impl FileSource {
    /// Opens the file at `path` without blocking the calling task.
    pub async fn open(path: impl AsRef<Path>) -> IoResult<Self> {
        let file = tokio::fs::File::open(path).await?;

        Ok(Self::new(file.into_std().await))
    }
}

#[async_trait]
impl<R: Read + Seek + Send + 'static> DataSource for ReadSeekSource<R> {
    fn size(&self) -> Option<u64> {
        self.size
    }

    fn is_streaming(&self) -> bool {
        self.streaming
    }

    async fn read(&self, position: u64, len: usize) -> IoResult<Vec<u8>> {
        // Must exist before the flag check to catch a concurrent `stop`.
        let stopped = self.stop_notify.notified();

        if self.is_stopped() {
            return Err(stopped_error());
        }

        let inner = self.inner.clone();
        let task = tokio::task::spawn_blocking(move || read_at(&mut *inner.lock(), position, len));

        tokio::select! {
            res = task => res.map_err(|e| IoError::new(IoErrorKind::Other, e))?,
            () = stopped => {
                debug!("Data source stopped mid-read at {}.", position);
                Err(stopped_error())
            },
        }
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            trace!("Stopping data source.");
            self.stop_notify.notify_waiters();
        }
    }

    fn set_bitrate(&self, bitrate: u32) {
        self.bitrate.store(bitrate, Ordering::Relaxed);
    }
}

fn read_at<R: Read + Seek>(reader: &mut R, position: u64, len: usize) -> IoResult<Vec<u8>> {
    reader.seek(SeekFrom::Start(position))?;

    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == IoErrorKind::Interrupted => {},
            Err(e) => return Err(e),
        }
    }
    buf.truncate(filled);

    Ok(buf)
}

fn stopped_error() -> IoError {
    IoError::new(IoErrorKind::ConnectionAborted, "data source was stopped")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn positioned_reads_clamp_at_end() {
        let src = MemorySource::from_bytes((0u8..100).collect::<Vec<_>>());

        assert_eq!(src.size(), Some(100));
        assert!(!src.is_streaming());

        let mid = src.read(10, 5).await.unwrap();
        assert_eq!(mid, vec![10, 11, 12, 13, 14]);

        let tail = src.read(95, 64).await.unwrap();
        assert_eq!(tail.len(), 5);

        let past = src.read(200, 8).await.unwrap();
        assert!(past.is_empty());
    }

    #[tokio::test]
    async fn stopped_source_refuses_reads() {
        let src = MemorySource::from_bytes(vec![0u8; 16]);

        src.stop();
        src.stop();

        let err = src.read(0, 4).await.unwrap_err();
        assert_eq!(err.kind(), IoErrorKind::ConnectionAborted);
        assert!(src.is_stopped());
    }

    #[test]
    fn bitrate_hint_is_kept() {
        let src = MemorySource::streaming(Cursor::new(vec![]));

        assert!(src.is_streaming());
        assert_eq!(src.size(), None);

        src.set_bitrate(128_000);
        assert_eq!(src.bitrate(), 128_000);
    }
}
