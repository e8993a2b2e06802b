//! The codec capability surface driven by a pipeline endpoint.
//!
//! Endpoints know nothing about individual containers or codecs. They own one
//! [`Backend`], built on the endpoint's own thread by a [`BackendFactory`], and
//! forward requests to it.

mod symph;

pub use self::symph::*;

use crate::{
    config::Config,
    error::PipelineError,
    media::{DecodedBuffer, EncodedUnit, MediaInfo, TrackType},
};
use std::{
    error::Error,
    fmt::{Display, Formatter, Result as FmtResult},
    io::Error as IoError,
    sync::Arc,
    time::Duration,
};
use symphonia_core::{errors::Error as SymphError, io::MediaSource};

/// Hints about the container, supplied by the demuxer's owner.
#[derive(Clone, Debug, Default)]
pub struct ProbeHint {
    /// Declared mime type of the content.
    pub mime: String,
    /// File extension matching the mime type.
    pub extension: Option<String>,
}

/// A container parser and its decoders.
///
/// Backends are created and used on a single endpoint thread, and so need not be
/// `Send`.
pub trait Backend {
    /// Parses the container held by `source` and selects tracks to decode.
    ///
    /// Audio and video configs in the returned info are left invalid for absent
    /// tracks. The endpoint fills in the bitrate.
    fn initialize(
        &mut self,
        source: Box<dyn MediaSource>,
        hint: &ProbeHint,
    ) -> Result<MediaInfo, BackendError>;

    /// Moves every track to `time`.
    fn seek(&mut self, time: Duration) -> Result<(), BackendError>;

    /// Decodes the next buffer of `track`.
    ///
    /// Tracks which do not exist, or have ended, yield end-of-stream buffers.
    fn read(&mut self, track: TrackType) -> Result<DecodedBuffer, BackendError>;

    /// Advisory hint that a seek is about to be requested.
    fn start_waiting_for_seek(&mut self) {}

    /// Returns the decoder for push-mode compressed video, if this backend has one.
    fn video_codec(&mut self) -> Option<&mut dyn VideoCodec> {
        None
    }

    /// Drops all container and decoder state.
    fn reset(&mut self);
}

/// Decoder for compressed video units submitted in push mode.
pub trait VideoCodec {
    /// Decodes one access unit.
    fn decode(&mut self, unit: &EncodedUnit) -> Result<DecodedBuffer, BackendError>;
}

/// Builds a fresh [`Backend`] for each pipeline session.
pub trait BackendFactory: Send + Sync {
    /// Creates a backend on the calling endpoint thread.
    fn make_backend(&self, config: &Config) -> Box<dyn Backend>;
}

impl<F> BackendFactory for F
where
    F: Fn(&Config) -> Box<dyn Backend> + Send + Sync,
{
    fn make_backend(&self, config: &Config) -> Box<dyn Backend> {
        self(config)
    }
}

/// Errors raised by a [`Backend`].
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum BackendError {
    /// The container or codec could not be handled.
    Unsupported(String),
    /// The container held no track which could be decoded.
    NoTracks,
    /// A packet could not be decoded; later packets may still succeed.
    Decode(String),
    /// The requested time could not be reached.
    Seek(String),
    /// A request was made before `initialize` succeeded.
    NotInitialized,
    /// Reading the underlying data failed.
    Io(Arc<IoError>),
    /// Any other failure from Symphonia.
    Symphonia(Arc<SymphError>),
}

impl Display for BackendError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Unsupported(what) => write!(f, "unsupported: {what}"),
            Self::NoTracks => f.write_str("no decodable tracks"),
            Self::Decode(why) => write!(f, "decode failed: {why}"),
            Self::Seek(why) => write!(f, "seek failed: {why}"),
            Self::NotInitialized => f.write_str("backend is not initialized"),
            Self::Io(e) => write!(f, "i/o failed: {e}"),
            Self::Symphonia(e) => write!(f, "symphonia: {e}"),
        }
    }
}

impl Error for BackendError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e.as_ref()),
            Self::Symphonia(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<SymphError> for BackendError {
    fn from(val: SymphError) -> Self {
        match val {
            SymphError::Unsupported(what) => Self::Unsupported(what.to_string()),
            SymphError::DecodeError(why) => Self::Decode(why.to_string()),
            SymphError::SeekError(kind) => Self::Seek(format!("{kind:?}")),
            SymphError::IoError(e) => Self::Io(Arc::new(e)),
            e => Self::Symphonia(Arc::new(e)),
        }
    }
}

impl From<BackendError> for PipelineError {
    fn from(val: BackendError) -> Self {
        match val {
            BackendError::Unsupported(what) => Self::Unsupported(what),
            BackendError::NoTracks => Self::Open("no decodable tracks".into()),
            BackendError::Decode(why) => Self::Decode(why),
            BackendError::Seek(why) => Self::Seek(why),
            BackendError::NotInitialized => Self::NotInitialized,
            BackendError::Io(e) => Self::DataSource(e.to_string()),
            BackendError::Symphonia(e) => Self::Open(e.to_string()),
        }
    }
}
