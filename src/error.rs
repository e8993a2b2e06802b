//! Pipeline, demuxer and decoder error handling.
//!
//! Failures are always delivered through the completion supplied with a request:
//! they are never panics, and never silently dropped. Nothing in this crate retries
//! on its own.

use crate::{demuxer::DemuxerState, media::TrackType};
use serde::{Deserialize, Serialize};
use std::{
    error::Error,
    fmt::{Display, Formatter, Result as FmtResult},
    io::Error as IoError,
    sync::Arc,
};

/// Errors reported by a pipeline endpoint, or by the transport leading to it.
///
/// These cross the boundary between the host and the endpoint, and so only carry
/// owned, serialisable detail.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum PipelineError {
    /// The request was cancelled by a call to `stop`.
    Aborted,
    /// The container or codec is not supported by the endpoint.
    Unsupported(String),
    /// The container was unreadable, or had no usable audio track.
    Open(String),
    /// A packet could not be decoded.
    ///
    /// The track remains usable, and later reads will continue past the bad packet.
    Decode(String),
    /// The endpoint could not reach the requested position.
    Seek(String),
    /// Reading from the data source failed.
    DataSource(String),
    /// The request is only valid after a successful initialisation.
    NotInitialized,
    /// Another read is already outstanding for this track.
    ReadPending(TrackType),
    /// The push-mode queue is full; callers should wait on `has_enough_data`.
    QueueFull,
    /// The push-mode queue is empty.
    QueueEmpty,
    /// The track changed format, but renegotiation is not supported here.
    ConfigChangeUnsupported,
    /// The endpoint could not be created, or has gone away.
    Transport(String),
}

impl Display for PipelineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str("pipeline request failed: ")?;
        match self {
            Self::Aborted => f.write_str("aborted by stop"),
            Self::Unsupported(what) => write!(f, "unsupported ({what})"),
            Self::Open(why) => write!(f, "could not open container [{why}]"),
            Self::Decode(why) => write!(f, "decoding packets [{why}]"),
            Self::Seek(why) => write!(f, "seeking [{why}]"),
            Self::DataSource(why) => write!(f, "reading data source [{why}]"),
            Self::NotInitialized => f.write_str("session is not initialized"),
            Self::ReadPending(t) => write!(f, "a {t:?} read is already pending"),
            Self::QueueFull => f.write_str("decode queue is full"),
            Self::QueueEmpty => f.write_str("decode queue is empty"),
            Self::ConfigChangeUnsupported => f.write_str("config changes are unsupported"),
            Self::Transport(why) => write!(f, "endpoint unreachable [{why}]"),
        }
    }
}

impl Error for PipelineError {}

/// Errors surfaced by a [`Demuxer`] and its streams.
///
/// [`Demuxer`]: crate::demuxer::Demuxer
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum DemuxerError {
    /// Session creation or format negotiation failed.
    ///
    /// This is reported once, through the initialisation callback.
    InitializationFailure(PipelineError),
    /// A read returned an error in place of a buffer.
    ///
    /// The track remains usable for subsequent reads.
    ReadFailure(PipelineError),
    /// The endpoint could not seek to the requested time.
    SeekFailure(PipelineError),
    /// The operation raced with, or followed, a call to `stop`.
    Aborted,
    /// The given mime type is not in the supported container table.
    UnsupportedFormat(String),
    /// The operation is not valid in the demuxer's current state.
    ///
    /// This indicates a bug in the caller.
    InvalidState(DemuxerState),
    /// A second read was issued on a track before the first resolved.
    ///
    /// This indicates a bug in the caller.
    ReadPending(TrackType),
    /// The cross-process pipeline is unavailable on this build or platform.
    Unavailable,
}

impl DemuxerError {
    pub(crate) fn from_read(err: PipelineError) -> Self {
        match err {
            PipelineError::Aborted => Self::Aborted,
            PipelineError::ReadPending(t) => Self::ReadPending(t),
            e => Self::ReadFailure(e),
        }
    }

    pub(crate) fn from_seek(err: PipelineError) -> Self {
        match err {
            PipelineError::Aborted => Self::Aborted,
            e => Self::SeekFailure(e),
        }
    }
}

impl Display for DemuxerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str("demuxer operation failed: ")?;
        match self {
            Self::InitializationFailure(e) => write!(f, "initialization [{e}]"),
            Self::ReadFailure(e) => write!(f, "read [{e}]"),
            Self::SeekFailure(e) => write!(f, "seek [{e}]"),
            Self::Aborted => f.write_str("aborted by stop"),
            Self::UnsupportedFormat(mime) => write!(f, "unsupported container type {mime:?}"),
            Self::InvalidState(s) => write!(f, "not valid while {s:?}"),
            Self::ReadPending(t) => write!(f, "a {t:?} read is already pending"),
            Self::Unavailable => f.write_str("pipeline is unavailable"),
        }
    }
}

impl Error for DemuxerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InitializationFailure(e) | Self::ReadFailure(e) | Self::SeekFailure(e) =>
                Some(e),
            _ => None,
        }
    }
}

/// Errors raised when posting work to an [`ExecutionContext`].
///
/// [`ExecutionContext`]: crate::context::ExecutionContext
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum ContextError {
    /// The context has shut down, and no longer accepts or runs work.
    Closed,
    /// The context's thread could not be started.
    Spawn(Arc<IoError>),
}

impl Display for ContextError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str("execution context error: ")?;
        match self {
            Self::Closed => f.write_str("context has shut down"),
            Self::Spawn(e) => write!(f, "failed to start thread [{e}]"),
        }
    }
}

impl Error for ContextError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Spawn(e) => Some(e.as_ref()),
            Self::Closed => None,
        }
    }
}

impl From<IoError> for ContextError {
    fn from(val: IoError) -> Self {
        Self::Spawn(Arc::new(val))
    }
}

/// Errors raised by the process-wide [`CapabilityProvider`].
///
/// [`CapabilityProvider`]: crate::capability::CapabilityProvider
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum CapabilityError {
    /// [`preinitialize`] was called more than once.
    ///
    /// [`preinitialize`]: crate::capability::preinitialize
    AlreadyInitialized,
    /// The pipeline is unavailable on this build or platform.
    Unavailable,
    /// The pipeline context could not run the request.
    Context(ContextError),
    /// The session could not be created.
    Session(PipelineError),
}

impl Display for CapabilityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str("pipeline capability error: ")?;
        match self {
            Self::AlreadyInitialized => f.write_str("provider was already preinitialized"),
            Self::Unavailable => f.write_str("pipeline is unavailable"),
            Self::Context(e) => write!(f, "{e}"),
            Self::Session(e) => write!(f, "{e}"),
        }
    }
}

impl Error for CapabilityError {}

impl From<ContextError> for CapabilityError {
    fn from(val: ContextError) -> Self {
        Self::Context(val)
    }
}

impl From<PipelineError> for CapabilityError {
    fn from(val: PipelineError) -> Self {
        Self::Session(val)
    }
}

/// Errors raised by a [`SyncAudioDecoder`].
///
/// [`SyncAudioDecoder`]: crate::decoder::SyncAudioDecoder
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum DecodeError {
    /// The input could not be opened: it may be corrupt, or of an unsupported type.
    Initialize(DemuxerError),
    /// The input has no audio track.
    NoAudioTrack,
    /// `read` was called before a successful `initialize`.
    NotInitialized,
    /// A blocking call was made from the pipeline context, which would deadlock.
    WrongContext,
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str("failed to decode audio: ")?;
        match self {
            Self::Initialize(e) => write!(f, "{e}"),
            Self::NoAudioTrack => f.write_str("input has no audio track"),
            Self::NotInitialized => f.write_str("decoder is not initialized"),
            Self::WrongContext => f.write_str("called from the pipeline context"),
        }
    }
}

impl Error for DecodeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Initialize(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DemuxerError> for DecodeError {
    fn from(val: DemuxerError) -> Self {
        Self::Initialize(val)
    }
}

/// Convenience type for demuxer and stream results.
pub type DemuxerResult<T> = Result<T, DemuxerError>;
