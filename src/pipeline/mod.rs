//! The transport between a host and its decoding endpoint.
//!
//! A session pairs three channels:
//! * [`PipelineRequest`]s, from host to endpoint,
//! * [`RemoteMessage`]s (responses, and requests for bytes), from endpoint to host,
//! * [`DataReply`]s, the host's answers to those byte requests.
//!
//! Every message is serialisable, and payloads only cross as [`SharedRegion`]s,
//! so the in-process endpoint provided here can be swapped for one in another
//! process by implementing [`SessionCreator`].

pub mod backend;
pub mod codecs;
mod disposal;
pub(crate) mod endpoint;
pub mod message;
pub(crate) mod remote_source;
mod session;
mod shared;

pub use self::{
    disposal::DisposalThread,
    message::*,
    session::{LocalSessionCreator, PipelineSession, SessionCreator},
    shared::SharedRegion,
};
