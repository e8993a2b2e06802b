//! Byte sources which feed a pipeline's container parser.
//!
//! A pipeline endpoint never opens files or sockets itself: every byte it parses is
//! requested from the [`DataSource`] owned by the demuxer, one positioned read at
//! a time.

mod read_seek;

pub use self::read_seek::*;

use async_trait::async_trait;
use std::io::Result as IoResult;

/// An externally supplied, randomly accessible byte source.
///
/// Sources are shared between the demuxer which owns them and the tasks serving a
/// pipeline's data reads, so all methods take `&self`.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Total length of the source in bytes, if known.
    fn size(&self) -> Option<u64>;

    /// Returns whether this source is a live stream, which cannot seek.
    fn is_streaming(&self) -> bool;

    /// Reads up to `len` bytes starting at `position`.
    ///
    /// Returns an empty buffer at the end of the source. After [`stop`], in-flight
    /// and subsequent reads must resolve promptly with an error rather than hang.
    ///
    /// [`stop`]: DataSource::stop
    async fn read(&self, position: u64, len: usize) -> IoResult<Vec<u8>>;

    /// Aborts all current and future reads.
    fn stop(&self);

    /// Informs the source of the content's bitrate, in bits per second.
    ///
    /// Sources may use this to size read-ahead buffers. Defaults to doing nothing.
    fn set_bitrate(&self, _bitrate: u32) {}
}
