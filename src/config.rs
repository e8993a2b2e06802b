use crate::{
    capability::containers::{ContainerType, SUPPORTED_CONTAINERS},
    constants::*,
    pipeline::{
        codecs::{CODEC_REGISTRY, PROBE},
        DisposalThread,
    },
};

use derivative::Derivative;
use std::time::Duration;
use symphonia::core::{codecs::CodecRegistry, probe::Probe};

/// Configuration for pipeline sessions, demuxers and decoders.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
#[non_exhaustive]
pub struct Config {
    #[derivative(Debug = "ignore")]
    /// Registry of the codecs which the default pipeline endpoint may decode with.
    ///
    /// Defaults to [`CODEC_REGISTRY`], which includes every codec enabled in
    /// Symphonia's feature flags.
    ///
    /// [`CODEC_REGISTRY`]: static@CODEC_REGISTRY
    pub codec_registry: &'static CodecRegistry,

    #[derivative(Debug = "ignore")]
    /// Registry of the container formats which the default endpoint may probe.
    ///
    /// Defaults to [`PROBE`].
    ///
    /// [`PROBE`]: static@PROBE
    pub format_registry: &'static Probe,

    /// Table of container types which demuxers will accept.
    ///
    /// Defaults to [`SUPPORTED_CONTAINERS`] for the target platform.
    pub containers: &'static [ContainerType],

    /// Bound on the push-mode video queue.
    ///
    /// Appends beyond this are rejected, so callers should poll
    /// `has_enough_data` before submitting more work.
    ///
    /// Defaults to `4`.
    pub max_decode_buffers: usize,

    /// Number of bytes the endpoint requests from a data source per read.
    ///
    /// Defaults to 64KiB.
    pub read_chunk_size: usize,

    /// Maximum time a released session will wait for its endpoint to confirm
    /// that it has stopped, before it is forcibly torn down.
    ///
    /// Defaults to 500ms.
    pub stop_drain_timeout: Duration,

    /// Whether streams announce a mid-stream format change with a
    /// [`BufferStatus::ConfigChanged`] buffer.
    ///
    /// When disabled, a format change is reported as a read failure.
    ///
    /// Defaults to `true` on all platforms but Android.
    ///
    /// [`BufferStatus::ConfigChanged`]: crate::media::BufferStatus::ConfigChanged
    pub supports_config_change: bool,

    #[derivative(Debug = "ignore")]
    /// Thread used to release sessions, so that pipeline contexts never block on
    /// endpoint shutdown.
    ///
    /// Defaults to a shared, process-wide thread.
    pub disposer: Option<DisposalThread>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            codec_registry: &CODEC_REGISTRY,
            format_registry: &PROBE,
            containers: SUPPORTED_CONTAINERS,
            max_decode_buffers: DEFAULT_MAX_DECODE_BUFFERS,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            stop_drain_timeout: DEFAULT_STOP_DRAIN_TIMEOUT,
            supports_config_change: !cfg!(target_os = "android"),
            disposer: None,
        }
    }
}

impl Config {
    /// Sets this `Config`'s symphonia codec registry.
    #[must_use]
    pub fn codec_registry(mut self, codec_registry: &'static CodecRegistry) -> Self {
        self.codec_registry = codec_registry;
        self
    }

    /// Sets this `Config`'s symphonia format registry/probe set.
    #[must_use]
    pub fn format_registry(mut self, format_registry: &'static Probe) -> Self {
        self.format_registry = format_registry;
        self
    }

    /// Sets this `Config`'s table of accepted container types.
    #[must_use]
    pub fn containers(mut self, containers: &'static [ContainerType]) -> Self {
        self.containers = containers;
        self
    }

    /// Sets this `Config`'s push-mode queue bound.
    ///
    /// A bound of zero is raised to one.
    #[must_use]
    pub fn max_decode_buffers(mut self, max_decode_buffers: usize) -> Self {
        self.max_decode_buffers = max_decode_buffers.max(1);
        self
    }

    /// Sets this `Config`'s data source read size.
    #[must_use]
    pub fn read_chunk_size(mut self, read_chunk_size: usize) -> Self {
        self.read_chunk_size = read_chunk_size.max(1);
        self
    }

    /// Sets this `Config`'s session drain timeout.
    #[must_use]
    pub fn stop_drain_timeout(mut self, stop_drain_timeout: Duration) -> Self {
        self.stop_drain_timeout = stop_drain_timeout;
        self
    }

    /// Sets whether this `Config` signals mid-stream format changes in-band.
    #[must_use]
    pub fn supports_config_change(mut self, supports_config_change: bool) -> Self {
        self.supports_config_change = supports_config_change;
        self
    }

    /// Sets this `Config`'s session disposal thread.
    #[must_use]
    pub fn disposer(mut self, disposer: DisposalThread) -> Self {
        self.disposer = Some(disposer);
        self
    }

    pub(crate) fn get_disposer(&self) -> DisposalThread {
        self.disposer.clone().unwrap_or_else(|| DisposalThread::shared().clone())
    }
}
