use super::message::DemuxerMessage;
use crate::{
    callback::{oneshot, Completion},
    error::DemuxerResult,
    media::*,
};
use flume::WeakSender;
use parking_lot::{Mutex, RwLock};
use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::trace;

pub(crate) struct StreamShared {
    track: TrackType,
    config: RwLock<TrackConfig>,
    stopped: AtomicBool,
    enabled: AtomicBool,
    enabled_at: Mutex<Duration>,
    supports_config_change: bool,
}

impl StreamShared {
    pub(crate) fn supports_config_change(&self) -> bool {
        self.supports_config_change
    }

    pub(crate) fn update_config(&self, config: &TrackConfig) {
        trace!("{:?} stream config changed to {:?}.", self.track, config);
        *self.config.write() = config.decoded();
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub(crate) fn set_enabled(&self, enabled: bool, time: Duration) {
        *self.enabled_at.lock() = time;
        self.enabled.store(enabled, Ordering::Release);
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub(crate) fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}

/// A pull-based source of decoded buffers for one track.
///
/// Streams are created by a [`Demuxer`] once it has initialised, one per
/// usable track. They may be cloned and handed to other threads, but stop
/// producing data once their demuxer is stopped or dropped: from then on every
/// read completes at once with an end-of-stream buffer.
///
/// [`Demuxer`]: super::Demuxer
#[derive(Clone)]
pub struct DemuxerStream {
    sender: WeakSender<DemuxerMessage>,
    shared: Arc<StreamShared>,
}

impl DemuxerStream {
    pub(crate) fn new(
        config: &TrackConfig,
        sender: WeakSender<DemuxerMessage>,
        supports_config_change: bool,
    ) -> Self {
        Self {
            sender,
            shared: Arc::new(StreamShared {
                track: config.track_type(),
                config: RwLock::new(config.decoded()),
                stopped: AtomicBool::new(false),
                enabled: AtomicBool::new(true),
                enabled_at: Mutex::new(Duration::ZERO),
                supports_config_change,
            }),
        }
    }

    pub(crate) fn shared(&self) -> &Arc<StreamShared> {
        &self.shared
    }

    /// The kind of track this stream carries.
    #[must_use]
    pub fn track_type(&self) -> TrackType {
        self.shared.track
    }

    /// Requests the next decoded buffer.
    ///
    /// Only one read may be outstanding at a time: a second read issued before the
    /// first resolves fails with [`DemuxerError::ReadPending`]. `callback` runs on
    /// the pipeline context, or immediately on the caller if the stream has
    /// stopped.
    ///
    /// [`DemuxerError::ReadPending`]: crate::error::DemuxerError::ReadPending
    pub fn read<F>(&self, callback: F)
    where
        F: FnOnce(DemuxerResult<DecodedBuffer>) + Send + 'static,
    {
        let done = Completion::new(callback, || Ok(DecodedBuffer::end_of_stream()));

        if self.shared.is_stopped() {
            done.complete(Ok(DecodedBuffer::end_of_stream()));
            return;
        }

        // An undeliverable message drops its completion, ending the stream.
        if let Some(sender) = self.sender.upgrade() {
            drop(sender.send(DemuxerMessage::Read(self.shared.track, done)));
        }
    }

    /// Requests the next decoded buffer, as a future.
    pub fn read_async(&self) -> impl Future<Output = DemuxerResult<DecodedBuffer>> {
        let (callback, out) = oneshot(|| Ok(DecodedBuffer::end_of_stream()));
        self.read(callback);
        out
    }

    /// Describes the decoded audio this stream produces.
    ///
    /// This is *not* the config of the source bitstream: payloads are always
    /// interleaved `f32` samples. Returns `None` for video streams.
    #[must_use]
    pub fn audio_decoder_config(&self) -> Option<AudioConfig> {
        match &*self.shared.config.read() {
            TrackConfig::Audio(config) => Some(config.clone()),
            TrackConfig::Video(_) => None,
        }
    }

    /// Describes the decoded video this stream produces.
    ///
    /// Returns `None` for audio streams.
    #[must_use]
    pub fn video_decoder_config(&self) -> Option<VideoConfig> {
        match &*self.shared.config.read() {
            TrackConfig::Video(config) => Some(config.clone()),
            TrackConfig::Audio(_) => None,
        }
    }

    /// Returns whether a format change is announced in-band, by a
    /// [`BufferStatus::ConfigChanged`] buffer.
    ///
    /// When it is not, a format change fails the read instead, and ends the
    /// stream.
    #[must_use]
    pub fn supports_config_changes(&self) -> bool {
        self.shared.supports_config_change
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.shared.is_enabled()
    }

    /// Media time at which this stream was last enabled or disabled.
    #[must_use]
    pub fn enabled_timestamp(&self) -> Duration {
        *self.shared.enabled_at.lock()
    }
}

impl std::fmt::Debug for DemuxerStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DemuxerStream")
            .field("track", &self.shared.track)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.shared.stopped.load(Ordering::Relaxed))
            .finish()
    }
}
