#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
//! Demuxbridge splits media demuxing and decoding between an untrusted producer
//! and a separate decoding endpoint, and streams decoded buffers back.
//!
//! The library offers:
//!  * A [`Demuxer`], which negotiates container metadata with a decoding endpoint
//!  and hands out one pull-based [`DemuxerStream`] per usable track.
//!  * A [`SyncAudioDecoder`], a blocking façade for one-shot audio decodes.
//!  * A process-wide [`capability`] gate, which owns the two [`ExecutionContext`]s
//!  every pipeline object runs on.
//!  * Pluggable [`DataSource`]s, and a pluggable endpoint [`backend`] which decodes
//!  with [Symphonia] by default.
//!
//! ## Threading
//! All demuxer state lives on the provider's *pipeline* context, and changes only
//! in response to posted messages. Callbacks from demuxers and streams run on that
//! context, while notifications meant for the embedding framework are posted to the
//! *owner* context. The endpoint itself runs on a thread of its own, and is reached
//! only through a request/response protocol ([`pipeline::message`]): the one piece
//! of state crossing that boundary is the [`SharedRegion`] carrying each payload.
//!
//! ## Codec support
//! The default endpoint supports all [codecs and formats provided by Symphonia] which
//! are enabled in its feature flags. To add more, depend on Symphonia yourself.
//!
//! ```toml
//! [dependencies.symphonia]
//! version = "0.5"
//! features = ["flac", "vorbis"] # ...as well as any extras you need!
//! ```
//!
//! [Symphonia]: https://github.com/pdeljanov/Symphonia
//! [codecs and formats provided by Symphonia]: https://github.com/pdeljanov/Symphonia#formats-demuxers
//! [`backend`]: pipeline::backend
//! [`SharedRegion`]: pipeline::SharedRegion

#![warn(clippy::pedantic)]
#![allow(
    // Allowed as they are too pedantic
    clippy::module_name_repetitions,
    clippy::wildcard_imports,
    clippy::too_many_lines,
    clippy::cast_lossless,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::missing_errors_doc,
)]

mod callback;
pub mod capability;
mod config;
pub mod constants;
pub mod context;
pub mod decoder;
pub mod demuxer;
pub mod error;
pub(crate) mod host;
pub mod media;
pub mod pipeline;
pub mod source;
#[cfg(any(test, feature = "internals"))]
pub mod test_utils;

pub use crate::{
    capability::CapabilityProvider,
    config::Config,
    context::ExecutionContext,
    decoder::{AudioPacket, SyncAudioDecoder},
    demuxer::{Demuxer, DemuxerHost, DemuxerState, DemuxerStream},
    source::DataSource,
};
