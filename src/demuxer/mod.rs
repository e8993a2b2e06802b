//! Demuxing of container formats into per-track streams of decoded buffers.
//!
//! A [`Demuxer`] is a handle to a state machine living on its provider's
//! pipeline context. Every call made through the handle is posted to that
//! context, and completes through a callback (or future) once the remote
//! endpoint has answered:
//!
//! ```text
//! Created -> StartingPipeline -> Initializing -> Ready <-> Seeking
//!    \_____________________\_______________\_______\__________\___> Stopped
//! ```
//!
//! Once stopped, a demuxer cannot be restarted. Every callback outstanding when
//! [`Demuxer::stop`] is called fires exactly once, with [`DemuxerError::Aborted`]
//! (or an end-of-stream buffer, for reads).

mod message;
mod runner;
mod stream;

pub use self::stream::DemuxerStream;

use self::{message::DemuxerMessage, runner::DemuxerCore};
use crate::{
    callback::{oneshot, Completion},
    capability::{containers, CapabilityProvider},
    config::Config,
    error::{DemuxerError, DemuxerResult},
    media::*,
    source::DataSource,
};
use flume::Sender;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::{future::Future, sync::Arc, time::Duration};
use tracing::{debug, instrument};

/// Lifecycle states of a [`Demuxer`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum DemuxerState {
    /// No call to [`Demuxer::initialize`] has been made.
    Created,
    /// A session is being opened with the pipeline endpoint.
    StartingPipeline,
    /// The endpoint is probing the container.
    Initializing,
    /// Streams are available, and reads and seeks are permitted.
    Ready,
    /// A seek is in flight.
    Seeking,
    /// The demuxer has been stopped, or failed to initialise. This is terminal.
    Stopped,
}

/// Notifications a [`Demuxer`] raises towards the media framework which owns it.
///
/// All calls are made on the provider's owner context.
pub trait DemuxerHost: Send + Sync {
    /// Reports the duration of the content, once initialisation has succeeded.
    fn set_duration(&self, duration: Option<Duration>);

    /// Reports a failure which occurred outside of any single call, such as the
    /// loss of the pipeline endpoint.
    fn on_demuxer_error(&self, error: DemuxerError);
}

impl DemuxerHost for () {
    fn set_duration(&self, _duration: Option<Duration>) {}

    fn on_demuxer_error(&self, _error: DemuxerError) {}
}

/// State published by the core for synchronous accessors.
#[derive(Debug)]
pub(crate) struct Shared {
    state: RwLock<DemuxerState>,
    streams: OnceCell<Vec<DemuxerStream>>,
    time: OnceCell<TimeInfo>,
    audio: RwLock<AudioConfig>,
    video: RwLock<VideoConfig>,
}

impl Default for Shared {
    fn default() -> Self {
        Self {
            state: RwLock::new(DemuxerState::Created),
            streams: OnceCell::new(),
            time: OnceCell::new(),
            audio: RwLock::default(),
            video: RwLock::default(),
        }
    }
}

impl Shared {
    pub(crate) fn state(&self) -> DemuxerState {
        *self.state.read()
    }

    pub(crate) fn set_state(&self, state: DemuxerState) {
        *self.state.write() = state;
    }

    pub(crate) fn update_config(&self, config: &TrackConfig) {
        match config {
            TrackConfig::Audio(audio) => *self.audio.write() = audio.clone(),
            TrackConfig::Video(video) => *self.video.write() = video.clone(),
        }
    }

    /// Sets the stream list. Only the first call has any effect.
    pub(crate) fn publish_streams(&self, streams: Vec<DemuxerStream>) {
        drop(self.streams.set(streams));
    }

    pub(crate) fn publish_time(&self, time: TimeInfo) {
        drop(self.time.set(time));
    }
}

/// A handle to one demuxing state machine.
///
/// Dropping the handle stops the demuxer, and ends all of its streams.
#[derive(Debug)]
pub struct Demuxer {
    sender: Sender<DemuxerMessage>,
    shared: Arc<Shared>,
}

impl Demuxer {
    /// Creates a demuxer for content of type `mime`, read from `data_source`.
    ///
    /// This fails with [`DemuxerError::Unavailable`] if `provider` cannot host
    /// pipeline objects. The mime type is only checked by [`initialize`].
    ///
    /// [`initialize`]: Demuxer::initialize
    #[instrument(skip(provider, data_source, config))]
    pub fn new(
        provider: &CapabilityProvider,
        data_source: Arc<dyn DataSource>,
        mime: &str,
        config: Config,
    ) -> DemuxerResult<Self> {
        if !provider.is_available() {
            return Err(DemuxerError::Unavailable);
        }

        let (sender, rx) = flume::unbounded();
        let shared = Arc::new(Shared::default());

        let core_provider = provider.clone();
        let core_sender = sender.downgrade();
        let core_shared = shared.clone();
        let mime = mime.to_string();

        provider
            .pipeline()
            .spawn(move || {
                let core = DemuxerCore::new(
                    core_provider,
                    data_source,
                    mime,
                    config,
                    core_shared,
                    core_sender,
                );
                core.run(rx)
            })
            .map_err(|e| {
                debug!("Could not spawn demuxer core: {}.", e);
                DemuxerError::Unavailable
            })?;

        Ok(Self { sender, shared })
    }

    /// Returns whether demuxers accept content of type `mime`.
    ///
    /// This checks the built-in [`SUPPORTED_CONTAINERS`] table. Demuxers built
    /// with a custom [`Config::containers`] table should be checked with
    /// [`can_play_type_with`] instead.
    ///
    /// [`SUPPORTED_CONTAINERS`]: crate::capability::containers::SUPPORTED_CONTAINERS
    /// [`Config::containers`]: crate::Config::containers()
    /// [`can_play_type_with`]: Demuxer::can_play_type_with
    #[must_use]
    pub fn can_play_type(mime: &str) -> bool {
        crate::capability::can_play_type(mime)
    }

    /// Returns whether a demuxer built with `config` accepts content of type `mime`.
    #[must_use]
    pub fn can_play_type_with(config: &Config, mime: &str) -> bool {
        containers::lookup(config.containers, mime).is_some()
    }

    /// Opens a session and probes the content.
    ///
    /// On success, [`get_all_streams`] returns one stream per usable track. On
    /// failure the demuxer moves to [`DemuxerState::Stopped`], and the stream
    /// list is empty.
    ///
    /// [`get_all_streams`]: Demuxer::get_all_streams
    pub fn initialize<F>(&self, host: Arc<dyn DemuxerHost>, callback: F)
    where
        F: FnOnce(DemuxerResult<()>) + Send + 'static,
    {
        self.send(DemuxerMessage::Initialize(host, aborting(callback)));
    }

    #[allow(missing_docs)]
    pub fn initialize_async(
        &self,
        host: Arc<dyn DemuxerHost>,
    ) -> impl Future<Output = DemuxerResult<()>> {
        let (callback, out) = oneshot(|| Err(DemuxerError::Aborted));
        self.initialize(host, callback);
        out
    }

    /// Moves all tracks to `time`.
    ///
    /// Only valid once the demuxer is [`Ready`], and while no other seek is in
    /// flight. Reads issued before the seek completes may still return data from
    /// before the seek point.
    ///
    /// [`Ready`]: DemuxerState::Ready
    pub fn seek<F>(&self, time: Duration, callback: F)
    where
        F: FnOnce(DemuxerResult<()>) + Send + 'static,
    {
        self.send(DemuxerMessage::Seek(time, aborting(callback)));
    }

    #[allow(missing_docs)]
    pub fn seek_async(&self, time: Duration) -> impl Future<Output = DemuxerResult<()>> {
        let (callback, out) = oneshot(|| Err(DemuxerError::Aborted));
        self.seek(time, callback);
        out
    }

    /// Hints that a seek to `time` will soon follow.
    ///
    /// The endpoint may discard buffered data early in response.
    pub fn start_waiting_for_seek(&self, time: Duration) {
        self.send(DemuxerMessage::StartWaitingForSeek(time));
    }

    /// Enables or disables one track, as of media time `time`.
    ///
    /// Reads on a disabled track complete with end-of-stream.
    pub fn set_track_enabled(&self, track: TrackType, enabled: bool, time: Duration) {
        self.send(DemuxerMessage::SetTrackEnabled(track, enabled, time));
    }

    /// Stops the demuxer without waiting for the stop to take effect.
    pub fn stop(&self) {
        self.send(DemuxerMessage::Stop(None));
    }

    /// Stops the demuxer, calling `callback` once every outstanding operation
    /// has been resolved.
    ///
    /// `callback` also fires if the demuxer had already stopped.
    pub fn stop_with<F>(&self, callback: F)
    where
        F: FnOnce(()) + Send + 'static,
    {
        self.send(DemuxerMessage::Stop(Some(Completion::new(callback, || ()))));
    }

    #[allow(missing_docs)]
    pub fn stop_async(&self) -> impl Future<Output = ()> {
        let (callback, out) = oneshot(|| ());
        self.stop_with(callback);
        out
    }

    /// Queues one encoded video unit for [`decode_video`].
    ///
    /// Fails with [`PipelineError::QueueFull`] once [`get_max_decode_buffers`]
    /// units are queued.
    ///
    /// [`decode_video`]: Demuxer::decode_video
    /// [`get_max_decode_buffers`]: Demuxer::get_max_decode_buffers
    /// [`PipelineError::QueueFull`]: crate::error::PipelineError::QueueFull
    pub fn append_video_buffer<F>(&self, unit: EncodedUnit, callback: F)
    where
        F: FnOnce(DemuxerResult<()>) + Send + 'static,
    {
        self.send(DemuxerMessage::AppendVideoBuffer(unit, aborting(callback)));
    }

    #[allow(missing_docs)]
    pub fn append_video_buffer_async(
        &self,
        unit: EncodedUnit,
    ) -> impl Future<Output = DemuxerResult<()>> {
        let (callback, out) = oneshot(|| Err(DemuxerError::Aborted));
        self.append_video_buffer(unit, callback);
        out
    }

    /// Decodes the oldest queued video unit.
    pub fn decode_video<F>(&self, callback: F)
    where
        F: FnOnce(DemuxerResult<DecodedBuffer>) + Send + 'static,
    {
        self.send(DemuxerMessage::DecodeVideo(aborting(callback)));
    }

    #[allow(missing_docs)]
    pub fn decode_video_async(&self) -> impl Future<Output = DemuxerResult<DecodedBuffer>> {
        let (callback, out) = oneshot(|| Err(DemuxerError::Aborted));
        self.decode_video(callback);
        out
    }

    /// Reports whether the video queue is full.
    pub fn has_enough_data<F>(&self, callback: F)
    where
        F: FnOnce(DemuxerResult<bool>) + Send + 'static,
    {
        self.send(DemuxerMessage::HasEnoughData(aborting(callback)));
    }

    #[allow(missing_docs)]
    pub fn has_enough_data_async(&self) -> impl Future<Output = DemuxerResult<bool>> {
        let (callback, out) = oneshot(|| Err(DemuxerError::Aborted));
        self.has_enough_data(callback);
        out
    }

    /// Reports the capacity of the video queue.
    pub fn get_max_decode_buffers<F>(&self, callback: F)
    where
        F: FnOnce(DemuxerResult<usize>) + Send + 'static,
    {
        self.send(DemuxerMessage::GetMaxDecodeBuffers(aborting(callback)));
    }

    #[allow(missing_docs)]
    pub fn get_max_decode_buffers_async(&self) -> impl Future<Output = DemuxerResult<usize>> {
        let (callback, out) = oneshot(|| Err(DemuxerError::Aborted));
        self.get_max_decode_buffers(callback);
        out
    }

    /// Returns one stream per usable track: audio first, then video.
    ///
    /// This is empty until initialisation has completed, and stays empty if it
    /// failed.
    #[must_use]
    pub fn get_all_streams(&self) -> Vec<DemuxerStream> {
        self.shared.streams.get().cloned().unwrap_or_default()
    }

    /// Returns the stream carrying `track`, if any.
    #[must_use]
    pub fn get_stream(&self, track: TrackType) -> Option<DemuxerStream> {
        self.shared
            .streams
            .get()?
            .iter()
            .find(|s| s.track_type() == track)
            .cloned()
    }

    /// Media time of the first sample, or zero before initialisation.
    #[must_use]
    pub fn get_start_time(&self) -> Duration {
        self.shared
            .time
            .get()
            .map(|t| t.start_time)
            .unwrap_or_default()
    }

    /// Timing of the content, once initialisation has succeeded.
    #[must_use]
    pub fn time_info(&self) -> Option<TimeInfo> {
        self.shared.time.get().copied()
    }

    /// The audio config reported by the container, or an invalid config if
    /// there is no audio track.
    #[must_use]
    pub fn audio_config(&self) -> AudioConfig {
        self.shared.audio.read().clone()
    }

    /// The video config reported by the container, or an invalid config if
    /// there is no video track.
    #[must_use]
    pub fn video_config(&self) -> VideoConfig {
        self.shared.video.read().clone()
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn state(&self) -> DemuxerState {
        self.shared.state()
    }

    fn send(&self, msg: DemuxerMessage) {
        // The core has exited: dropping `msg` resolves its completion.
        drop(self.sender.send(msg));
    }
}

impl Drop for Demuxer {
    fn drop(&mut self) {
        self.send(DemuxerMessage::Stop(None));
    }
}

fn aborting<T, F>(callback: F) -> Completion<DemuxerResult<T>>
where
    T: 'static,
    F: FnOnce(DemuxerResult<T>) + Send + 'static,
{
    Completion::new(callback, || Err(DemuxerError::Aborted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::PipelineError,
        source::MemorySource,
        test_utils::*,
    };

    fn synthetic_demuxer(
        layout: &SyntheticLayout,
        factory: SyntheticFactory,
        config: Config,
    ) -> (CapabilityProvider, Demuxer) {
        let provider = synthetic_provider(factory, config.clone());
        let source = Arc::new(MemorySource::from_bytes(make_synthetic(layout)));
        let demuxer = Demuxer::new(&provider, source, SYNTHETIC_MIME, config).unwrap();

        (provider, demuxer)
    }

    async fn ready_demuxer(layout: &SyntheticLayout, config: Config) -> (CapabilityProvider, Demuxer) {
        let (provider, demuxer) = synthetic_demuxer(layout, SyntheticFactory::default(), config);
        demuxer.initialize_async(Arc::new(())).await.unwrap();

        (provider, demuxer)
    }

    struct RecordingHost {
        durations: flume::Sender<Option<Duration>>,
        errors: flume::Sender<DemuxerError>,
    }

    impl RecordingHost {
        fn new() -> (
            Arc<Self>,
            flume::Receiver<Option<Duration>>,
            flume::Receiver<DemuxerError>,
        ) {
            let (durations, duration_rx) = flume::unbounded();
            let (errors, error_rx) = flume::unbounded();
            (Arc::new(Self { durations, errors }), duration_rx, error_rx)
        }
    }

    impl DemuxerHost for RecordingHost {
        fn set_duration(&self, duration: Option<Duration>) {
            drop(self.durations.send(duration));
        }

        fn on_demuxer_error(&self, error: DemuxerError) {
            drop(self.errors.send(error));
        }
    }

    /// A source whose reads never complete.
    struct StalledSource;

    #[async_trait::async_trait]
    impl DataSource for StalledSource {
        fn size(&self) -> Option<u64> {
            None
        }

        fn is_streaming(&self) -> bool {
            false
        }

        async fn read(&self, _position: u64, _len: usize) -> std::io::Result<Vec<u8>> {
            std::future::pending().await
        }

        fn stop(&self) {}
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn initialize_publishes_streams_in_track_order() {
        let layout = SyntheticLayout::default();
        let (_provider, demuxer) = ready_demuxer(&layout, Config::default()).await;

        assert_eq!(demuxer.state(), DemuxerState::Ready);

        let streams = demuxer.get_all_streams();
        assert_eq!(streams.len(), 2);
        assert_eq!(streams[0].track_type(), TrackType::Audio);
        assert_eq!(streams[1].track_type(), TrackType::Video);

        let audio = streams[0].audio_decoder_config().unwrap();
        assert_eq!(audio.codec, DECODED_AUDIO_CODEC);
        assert_eq!(audio.channels, 2);
        assert!(streams[0].video_decoder_config().is_none());
        assert_eq!(demuxer.audio_config().codec, "synthetic");

        assert_eq!(demuxer.time_info().unwrap().duration, Some(layout.duration()));
        assert_eq!(demuxer.get_start_time(), Duration::ZERO);
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn wav_initializes_with_one_stream_and_reports_duration() {
        let provider = symphonia_provider();
        let source = Arc::new(MemorySource::from_bytes(make_wav(2, 44_100, 44_100)));
        let demuxer = Demuxer::new(&provider, source.clone(), "audio/wav", Config::default())
            .unwrap();

        let (host, durations, _errors) = RecordingHost::new();
        demuxer.initialize_async(host).await.unwrap();

        assert_eq!(demuxer.get_all_streams().len(), 1);
        assert!(demuxer.get_stream(TrackType::Video).is_none());
        assert!(!demuxer.video_config().is_valid());
        assert_eq!(
            durations.recv_async().await.unwrap(),
            Some(Duration::from_secs(1))
        );
        assert!(source.bitrate() > 0);
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn reads_run_to_a_single_end_of_stream() {
        let provider = symphonia_provider();
        let source = Arc::new(MemorySource::from_bytes(make_wav(1, 8_000, 4_000)));
        let demuxer = Demuxer::new(&provider, source, "audio/x-wav", Config::default()).unwrap();
        demuxer.initialize_async(Arc::new(())).await.unwrap();

        let audio = demuxer.get_stream(TrackType::Audio).unwrap();
        let mut frames = 0;
        loop {
            let buffer = audio.read_async().await.unwrap();
            if buffer.is_end_of_stream() {
                break;
            }
            assert_eq!(buffer.status, BufferStatus::Ok);
            assert_eq!(buffer.bytes().len() as u64, buffer.frames * 4);
            frames += buffer.frames;
        }

        assert_eq!(frames, 4_000);
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn corrupt_content_fails_and_stops() {
        let provider = symphonia_provider();
        let source = Arc::new(MemorySource::from_bytes(vec![0x13; 10]));
        let demuxer = Demuxer::new(&provider, source, "audio/wav", Config::default()).unwrap();

        let res = demuxer.initialize_async(Arc::new(())).await;

        assert!(matches!(res, Err(DemuxerError::InitializationFailure(_))));
        assert_eq!(demuxer.state(), DemuxerState::Stopped);
        assert!(demuxer.get_all_streams().is_empty());
        assert!(!demuxer.audio_config().is_valid());
        assert!(!demuxer.video_config().is_valid());
        assert!(demuxer.time_info().is_none());
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn unknown_mime_is_rejected() {
        let provider = symphonia_provider();
        let source = Arc::new(MemorySource::from_bytes(make_wav(1, 8_000, 800)));
        let demuxer =
            Demuxer::new(&provider, source, "application/x-nothing", Config::default()).unwrap();

        assert_eq!(
            demuxer.initialize_async(Arc::new(())).await,
            Err(DemuxerError::UnsupportedFormat("application/x-nothing".into()))
        );
        assert_eq!(demuxer.state(), DemuxerState::Stopped);
        assert!(demuxer.get_all_streams().is_empty());
    }

    #[test]
    fn playability_follows_the_configured_table() {
        static ONLY_WAV: &[containers::ContainerType] = &[containers::ContainerType {
            mime: "audio/wav",
            extension: "wav",
        }];
        let config = Config::default().containers(ONLY_WAV);

        assert!(Demuxer::can_play_type("audio/mpeg"));
        assert!(!Demuxer::can_play_type_with(&config, "audio/mpeg"));
        assert!(Demuxer::can_play_type_with(&config, "audio/wav"));
        assert!(Demuxer::can_play_type_with(&Config::default(), "audio/mpeg"));
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn closed_provider_is_unavailable() {
        let provider = synthetic_provider(SyntheticFactory::default(), Config::default());
        provider.pipeline().shutdown();

        let source = Arc::new(MemorySource::from_bytes(vec![]));
        let res = Demuxer::new(&provider, source, SYNTHETIC_MIME, Config::default());

        assert_eq!(res.unwrap_err(), DemuxerError::Unavailable);
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn second_initialize_is_refused() {
        let (_provider, demuxer) = ready_demuxer(&SyntheticLayout::default(), Config::default()).await;

        assert_eq!(
            demuxer.initialize_async(Arc::new(())).await,
            Err(DemuxerError::InvalidState(DemuxerState::Ready))
        );
        assert_eq!(demuxer.state(), DemuxerState::Ready);
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn overlapping_reads_are_refused() {
        let (gate, factory) = SyntheticFactory::gated();
        let (_provider, demuxer) =
            synthetic_demuxer(&SyntheticLayout::default(), factory, Config::default());
        demuxer.initialize_async(Arc::new(())).await.unwrap();

        let audio = demuxer.get_stream(TrackType::Audio).unwrap();
        let first = audio.read_async();
        let second = audio.read_async();

        assert!(matches!(
            second.await,
            Err(DemuxerError::ReadPending(TrackType::Audio))
        ));

        gate.send(()).unwrap();
        assert!(!first.await.unwrap().is_end_of_stream());
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn disabling_a_track_keeps_the_pending_read_exclusive() {
        let (gate, factory) = SyntheticFactory::gated();
        let (_provider, demuxer) =
            synthetic_demuxer(&SyntheticLayout::default(), factory, Config::default());
        demuxer.initialize_async(Arc::new(())).await.unwrap();

        let audio = demuxer.get_stream(TrackType::Audio).unwrap();
        let first = audio.read_async();
        demuxer.set_track_enabled(TrackType::Audio, false, Duration::ZERO);

        assert!(matches!(
            audio.read_async().await,
            Err(DemuxerError::ReadPending(TrackType::Audio))
        ));

        gate.send(()).unwrap();
        assert_eq!(first.await.unwrap().status, BufferStatus::Ok);
        assert!(audio.read_async().await.unwrap().is_end_of_stream());
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn stop_during_initialize_aborts_it() {
        let provider = synthetic_provider(SyntheticFactory::default(), Config::default());
        let demuxer =
            Demuxer::new(&provider, Arc::new(StalledSource), SYNTHETIC_MIME, Config::default())
                .unwrap();

        let init = demuxer.initialize_async(Arc::new(()));
        demuxer.stop_async().await;

        assert_eq!(init.await, Err(DemuxerError::Aborted));
        assert_eq!(demuxer.state(), DemuxerState::Stopped);
        assert!(demuxer.get_all_streams().is_empty());
        assert!(demuxer.time_info().is_none());
        assert_eq!(
            demuxer.initialize_async(Arc::new(())).await,
            Err(DemuxerError::InvalidState(DemuxerState::Stopped))
        );
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn endpoint_loss_fails_reads_and_reports_to_host() {
        let layout = SyntheticLayout {
            panic_at: Some(1),
            ..Default::default()
        };
        let (_provider, demuxer) =
            synthetic_demuxer(&layout, SyntheticFactory::default(), Config::default());
        let (host, _durations, errors) = RecordingHost::new();
        demuxer.initialize_async(host).await.unwrap();

        let audio = demuxer.get_stream(TrackType::Audio).unwrap();
        assert_eq!(audio.read_async().await.unwrap().status, BufferStatus::Ok);

        let lost = DemuxerError::ReadFailure(PipelineError::Transport(
            "endpoint disconnected".into(),
        ));
        assert_eq!(audio.read_async().await.unwrap_err(), lost);
        assert_eq!(errors.recv_async().await.unwrap(), lost);

        assert_eq!(
            demuxer.seek_async(Duration::ZERO).await,
            Err(DemuxerError::Aborted)
        );
        assert_eq!(demuxer.state(), DemuxerState::Stopped);
        assert!(audio.read_async().await.unwrap().is_end_of_stream());
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn stop_ends_pending_and_later_reads() {
        let (_gate, factory) = SyntheticFactory::gated();
        let (_provider, demuxer) =
            synthetic_demuxer(&SyntheticLayout::default(), factory, Config::default());
        demuxer.initialize_async(Arc::new(())).await.unwrap();

        let audio = demuxer.get_stream(TrackType::Audio).unwrap();
        let pending = audio.read_async();

        demuxer.stop_async().await;
        assert_eq!(demuxer.state(), DemuxerState::Stopped);
        assert!(pending.await.unwrap().is_end_of_stream());

        assert!(audio.read_async().await.unwrap().is_end_of_stream());
        assert_eq!(
            demuxer.seek_async(Duration::ZERO).await,
            Err(DemuxerError::Aborted)
        );

        // A second stop still acknowledges.
        demuxer.stop_async().await;
        assert_eq!(demuxer.get_all_streams().len(), 2);
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn dropping_demuxer_ends_streams() {
        let (_provider, demuxer) = ready_demuxer(&SyntheticLayout::default(), Config::default()).await;
        let video = demuxer.get_stream(TrackType::Video).unwrap();

        drop(demuxer);

        assert!(video.read_async().await.unwrap().is_end_of_stream());
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn seek_moves_audio_position() {
        let (_provider, demuxer) = ready_demuxer(&SyntheticLayout::default(), Config::default()).await;
        let audio = demuxer.get_stream(TrackType::Audio).unwrap();

        demuxer.start_waiting_for_seek(Duration::from_millis(50));
        demuxer.seek_async(Duration::from_millis(50)).await.unwrap();
        assert_eq!(demuxer.state(), DemuxerState::Ready);

        let buffer = audio.read_async().await.unwrap();
        assert_eq!(buffer.timestamp, Duration::from_millis(50));

        let res = demuxer.seek_async(Duration::from_secs(10)).await;
        assert!(matches!(res, Err(DemuxerError::SeekFailure(_))));
        assert_eq!(demuxer.state(), DemuxerState::Ready);
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn seek_before_initialize_is_refused() {
        let (_provider, demuxer) = synthetic_demuxer(
            &SyntheticLayout::default(),
            SyntheticFactory::default(),
            Config::default(),
        );

        assert_eq!(
            demuxer.seek_async(Duration::ZERO).await,
            Err(DemuxerError::InvalidState(DemuxerState::Created))
        );
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn failed_read_leaves_track_usable() {
        let layout = SyntheticLayout {
            fail_read_at: Some(1),
            ..Default::default()
        };
        let (_provider, demuxer) = ready_demuxer(&layout, Config::default()).await;
        let audio = demuxer.get_stream(TrackType::Audio).unwrap();

        assert!(audio.read_async().await.is_ok());
        assert!(matches!(
            audio.read_async().await,
            Err(DemuxerError::ReadFailure(PipelineError::Decode(_)))
        ));

        let next = audio.read_async().await.unwrap();
        assert_eq!(next.timestamp, Duration::from_millis(20));
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn config_change_is_announced_in_band() {
        let layout = SyntheticLayout {
            change_config_at: Some(2),
            ..Default::default()
        };
        let (_provider, demuxer) =
            ready_demuxer(&layout, Config::default().supports_config_change(true)).await;
        let audio = demuxer.get_stream(TrackType::Audio).unwrap();
        assert!(audio.supports_config_changes());

        for _ in 0..2 {
            assert_eq!(audio.read_async().await.unwrap().status, BufferStatus::Ok);
        }

        let changed = audio.read_async().await.unwrap();
        assert!(matches!(changed.status, BufferStatus::ConfigChanged(_)));
        assert!(changed.data.is_none());

        let config = audio.audio_decoder_config().unwrap();
        assert_eq!(config.channels, 1);
        assert_eq!(config.codec, DECODED_AUDIO_CODEC);
        assert_eq!(demuxer.audio_config().channels, 1);

        let mono = audio.read_async().await.unwrap();
        assert_eq!(mono.bytes().len(), 480 * 4);
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn unsupported_config_change_fails_the_read_and_ends_the_track() {
        let layout = SyntheticLayout {
            change_config_at: Some(1),
            ..Default::default()
        };
        let (_provider, demuxer) =
            ready_demuxer(&layout, Config::default().supports_config_change(false)).await;
        let audio = demuxer.get_stream(TrackType::Audio).unwrap();

        let stereo = audio.read_async().await.unwrap();
        assert_eq!(stereo.bytes().len(), 480 * 2 * 4);

        assert!(matches!(
            audio.read_async().await,
            Err(DemuxerError::ReadFailure(
                PipelineError::ConfigChangeUnsupported
            ))
        ));
        assert_eq!(audio.audio_decoder_config().unwrap().channels, 2);

        // Mono buffers must never be delivered under the stereo config.
        assert!(audio.read_async().await.unwrap().is_end_of_stream());
        assert!(audio.read_async().await.unwrap().is_end_of_stream());
        assert_eq!(demuxer.state(), DemuxerState::Ready);
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn disabled_track_reads_end_of_stream() {
        let (_provider, demuxer) = ready_demuxer(&SyntheticLayout::default(), Config::default()).await;
        let audio = demuxer.get_stream(TrackType::Audio).unwrap();

        demuxer.set_track_enabled(TrackType::Audio, false, Duration::from_secs(1));
        assert!(audio.read_async().await.unwrap().is_end_of_stream());
        assert!(!audio.is_enabled());
        assert_eq!(audio.enabled_timestamp(), Duration::from_secs(1));

        demuxer.set_track_enabled(TrackType::Audio, true, Duration::from_secs(2));
        let buffer = audio.read_async().await.unwrap();
        assert!(!buffer.is_end_of_stream());
        assert!(audio.is_enabled());
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn video_units_pass_through_the_queue() {
        let (_provider, demuxer) = synthetic_demuxer(
            &SyntheticLayout::default(),
            SyntheticFactory::default(),
            Config::default(),
        );
        let unit = EncodedUnit {
            data: vec![7u8; 12].into(),
            timestamp: Duration::from_millis(66),
            is_keyframe: true,
        };

        assert_eq!(
            demuxer.append_video_buffer_async(unit.clone()).await,
            Err(DemuxerError::InvalidState(DemuxerState::Created))
        );

        demuxer.initialize_async(Arc::new(())).await.unwrap();
        let max = demuxer.get_max_decode_buffers_async().await.unwrap();
        assert_eq!(max, Config::default().max_decode_buffers);

        demuxer.append_video_buffer_async(unit).await.unwrap();
        assert_eq!(demuxer.has_enough_data_async().await, Ok(false));

        let frame = demuxer.decode_video_async().await.unwrap();
        assert_eq!(frame.bytes(), &[7u8; 12]);
        assert_eq!(frame.timestamp, Duration::from_millis(66));

        assert!(matches!(
            demuxer.decode_video_async().await,
            Err(DemuxerError::ReadFailure(PipelineError::QueueEmpty))
        ));
    }
}
