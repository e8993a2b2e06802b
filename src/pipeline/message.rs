//! Messages exchanged between a [`PipelineHost`] and its endpoint.
//!
//! All of these are plain, serialisable data so that an out-of-process transport
//! can frame them. Payloads only ever cross as [`SharedRegion`]s.
//!
//! [`PipelineHost`]: crate::host::PipelineHost

use super::SharedRegion;
use crate::{
    error::PipelineError,
    media::{DecodedBuffer, EncodedUnit, MediaInfo, TrackType},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Result type carried by every endpoint response.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Correlates a response with the request which caused it.
///
/// `generation` changes whenever a host is stopped, so responses which cross a
/// `Stop` can be told apart from responses to live requests.
#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize,
)]
pub struct Ticket {
    /// Host generation at the time the request was issued.
    pub generation: u64,
    /// Per-host request counter.
    pub seq: u64,
}

/// Requests sent from the host to its endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub enum PipelineRequest {
    /// Probe the container, and negotiate track configs.
    Initialize {
        #[allow(missing_docs)]
        ticket: Ticket,
        /// Mime type supplied by the demuxer's owner.
        mime: String,
        /// File extension matching `mime`, used as a parser hint.
        extension: Option<String>,
        /// Length of the data source, if known.
        size: Option<u64>,
        /// Whether the data source is a live stream.
        streaming: bool,
    },
    /// Advisory hint that a seek will shortly follow. Never answered.
    StartWaitingForSeek {
        #[allow(missing_docs)]
        ticket: Ticket,
    },
    /// Move every track's decode position to `time`.
    Seek {
        #[allow(missing_docs)]
        ticket: Ticket,
        #[allow(missing_docs)]
        time: Duration,
    },
    /// Decode and return the next buffer of `track`.
    ReadDecodedData {
        #[allow(missing_docs)]
        ticket: Ticket,
        #[allow(missing_docs)]
        track: TrackType,
    },
    /// Queue a compressed video unit for push-mode decoding.
    AppendBuffer {
        #[allow(missing_docs)]
        ticket: Ticket,
        #[allow(missing_docs)]
        unit: EncodedUnit,
    },
    /// Decode the oldest queued video unit.
    DecodeVideo {
        #[allow(missing_docs)]
        ticket: Ticket,
    },
    /// Ask whether the push-mode queue is full.
    HasEnoughData {
        #[allow(missing_docs)]
        ticket: Ticket,
    },
    /// Ask for the bound on the push-mode queue.
    GetMaxDecodeBuffers {
        #[allow(missing_docs)]
        ticket: Ticket,
    },
    /// Tear down all decoding state; answered with [`PipelineResponse::Stopped`].
    Stop {
        #[allow(missing_docs)]
        ticket: Ticket,
    },
    /// Exit the endpoint immediately.
    Poison,
}

/// Responses sent from an endpoint to its host.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum PipelineResponse {
    Initialized {
        ticket: Ticket,
        result: PipelineResult<MediaInfo>,
    },
    Seeked {
        ticket: Ticket,
        result: PipelineResult<()>,
    },
    DecodedData {
        ticket: Ticket,
        track: TrackType,
        result: PipelineResult<DecodedBuffer>,
    },
    Appended {
        ticket: Ticket,
        result: PipelineResult<()>,
    },
    VideoDecoded {
        ticket: Ticket,
        result: PipelineResult<DecodedBuffer>,
    },
    EnoughData {
        ticket: Ticket,
        result: PipelineResult<bool>,
    },
    MaxDecodeBuffers {
        ticket: Ticket,
        result: PipelineResult<usize>,
    },
    Stopped {
        ticket: Ticket,
    },
}

impl PipelineResponse {
    /// The ticket of the request this answers.
    #[must_use]
    pub fn ticket(&self) -> Ticket {
        match self {
            Self::Initialized { ticket, .. }
            | Self::Seeked { ticket, .. }
            | Self::DecodedData { ticket, .. }
            | Self::Appended { ticket, .. }
            | Self::VideoDecoded { ticket, .. }
            | Self::EnoughData { ticket, .. }
            | Self::MaxDecodeBuffers { ticket, .. }
            | Self::Stopped { ticket } => *ticket,
        }
    }
}

/// A positioned read which the endpoint needs the host's data source to serve.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct DataRequest {
    /// Counter used to match the reply.
    pub seq: u64,
    #[allow(missing_docs)]
    pub position: u64,
    #[allow(missing_docs)]
    pub len: usize,
}

/// The host's answer to a [`DataRequest`].
///
/// An empty region marks the end of the source.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataReply {
    #[allow(missing_docs)]
    pub seq: u64,
    #[allow(missing_docs)]
    pub result: PipelineResult<SharedRegion>,
}

/// Everything an endpoint may send to its host.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum RemoteMessage {
    Response(PipelineResponse),
    ReadData(DataRequest),
}
