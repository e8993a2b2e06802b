use super::{
    message::{CoreEvent, DemuxerMessage},
    stream::StreamShared,
    DemuxerHost,
    DemuxerState,
    DemuxerStream,
    Shared,
};
use crate::{
    callback::Completion,
    capability::{containers, CapabilityProvider},
    config::Config,
    error::{CapabilityError, DemuxerError, DemuxerResult, PipelineError},
    host::PipelineHost,
    media::*,
    pipeline::{PipelineResult, RemoteMessage},
    source::DataSource,
};
use flume::{Receiver, Sender, WeakSender};
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, info, instrument, trace, warn};

/// The demuxer state machine, owned by a task on the pipeline context.
///
/// All state transitions happen here. Results from the host re-enter the loop as
/// [`CoreEvent`]s, tagged with the epoch they were issued in: `stop` bumps the
/// epoch, so late results from a stopped session cannot act.
///
/// The core outlives `stop`, answering late calls from the stopped state, and
/// exits once its [`Demuxer`] handle has been dropped.
///
/// [`Demuxer`]: super::Demuxer
pub(crate) struct DemuxerCore {
    provider: CapabilityProvider,
    data_source: Arc<dyn DataSource>,
    mime: String,
    config: Config,
    shared: Arc<Shared>,
    sender: WeakSender<DemuxerMessage>,
    events_tx: Sender<CoreEvent>,
    events_rx: Receiver<CoreEvent>,
    host: Option<PipelineHost>,
    framework: Option<Arc<dyn DemuxerHost>>,
    pending_init: Option<Completion<DemuxerResult<()>>>,
    streams: Vec<DemuxerStream>,
    epoch: u64,
}

impl DemuxerCore {
    pub(crate) fn new(
        provider: CapabilityProvider,
        data_source: Arc<dyn DataSource>,
        mime: String,
        config: Config,
        shared: Arc<Shared>,
        sender: WeakSender<DemuxerMessage>,
    ) -> Self {
        let (events_tx, events_rx) = flume::unbounded();

        Self {
            provider,
            data_source,
            mime,
            config,
            shared,
            sender,
            events_tx,
            events_rx,
            host: None,
            framework: None,
            pending_init: None,
            streams: vec![],
            epoch: 0,
        }
    }

    #[instrument(skip(self, rx))]
    pub(crate) async fn run(mut self, rx: Receiver<DemuxerMessage>) {
        trace!("Demuxer core started.");

        loop {
            let remote = self.host.as_ref().and_then(PipelineHost::remote_events);

            tokio::select! {
                msg = rx.recv_async() => match msg {
                    Ok(msg) => self.handle(msg),
                    Err(_) => break,
                },
                Ok(event) = self.events_rx.recv_async() => self.handle_event(event),
                msg = next_remote(remote) => match msg {
                    Some(msg) =>
                        if let Some(host) = &mut self.host {
                            host.dispatch(msg);
                        },
                    None => self.endpoint_lost(),
                },
            }
        }

        self.stop_all();
        trace!("Demuxer core finished.");
    }

    fn handle(&mut self, msg: DemuxerMessage) {
        debug_assert!(self.provider.pipeline().runs_tasks_on_current_thread());

        match msg {
            DemuxerMessage::Initialize(framework, done) => self.initialize(framework, done),
            DemuxerMessage::Seek(time, done) => self.seek(time, done),
            DemuxerMessage::StartWaitingForSeek(time) =>
                if self.state() == DemuxerState::Ready {
                    trace!("Expecting seek to {:?}.", time);
                    if let Some(host) = &mut self.host {
                        host.start_waiting_for_seek();
                    }
                },
            DemuxerMessage::Read(track, done) => self.read(track, done),
            DemuxerMessage::SetTrackEnabled(track, enabled, time) =>
                self.set_track_enabled(track, enabled, time),
            DemuxerMessage::AppendVideoBuffer(unit, done) =>
                self.with_ready_host(done, move |host, done| host.append_buffer(unit, done)),
            DemuxerMessage::DecodeVideo(done) =>
                self.with_ready_host(done, PipelineHost::decode_video),
            DemuxerMessage::HasEnoughData(done) =>
                self.with_ready_host(done, PipelineHost::has_enough_data),
            DemuxerMessage::GetMaxDecodeBuffers(done) =>
                self.with_ready_host(done, PipelineHost::get_max_decode_buffers),
            DemuxerMessage::Stop(ack) => {
                self.stop_all();
                if let Some(ack) = ack {
                    ack.complete(());
                }
            },
        }
    }

    fn handle_event(&mut self, event: CoreEvent) {
        match event {
            CoreEvent::Initialized { epoch, result } => {
                if epoch != self.epoch {
                    trace!("Discarding initialisation result from epoch {}.", epoch);
                    return;
                }

                let Some(done) = self.pending_init.take() else {
                    return;
                };

                match result {
                    Ok(info) => self.finish_initialize(info, done),
                    Err(e) => self.fail_initialize(done, e),
                }
            },
            CoreEvent::Seeked {
                epoch,
                result,
                done,
            } => {
                if epoch != self.epoch {
                    done.complete(Err(DemuxerError::Aborted));
                    return;
                }

                if self.state() == DemuxerState::Seeking {
                    self.set_state(DemuxerState::Ready);
                }
                done.complete(result.map_err(DemuxerError::from_seek));
            },
        }
    }

    fn state(&self) -> DemuxerState {
        self.shared.state()
    }

    fn set_state(&self, state: DemuxerState) {
        trace!("Demuxer state: {:?} -> {:?}.", self.state(), state);
        self.shared.set_state(state);
    }

    fn initialize(&mut self, framework: Arc<dyn DemuxerHost>, done: Completion<DemuxerResult<()>>) {
        let state = self.state();
        if state != DemuxerState::Created {
            error!("Initialize called while {:?}.", state);
            done.complete(Err(DemuxerError::InvalidState(state)));
            return;
        }
        self.framework = Some(framework);

        let Some(container) = containers::lookup(self.config.containers, &self.mime) else {
            debug!("Unsupported container type {:?}.", self.mime);
            self.stop_all();
            done.complete(Err(DemuxerError::UnsupportedFormat(self.mime.clone())));
            return;
        };

        self.set_state(DemuxerState::StartingPipeline);
        let session = match self.provider.create_session() {
            Ok(session) => session,
            Err(e) => {
                let e = match e {
                    CapabilityError::Session(e) => e,
                    e => PipelineError::Transport(e.to_string()),
                };
                self.fail_initialize(done, e);
                return;
            },
        };

        let mut host =
            PipelineHost::new(session, self.data_source.clone(), self.config.get_disposer());

        self.set_state(DemuxerState::Initializing);
        let events = self.events_tx.clone();
        let epoch = self.epoch;
        host.initialize(
            &self.mime,
            Some(container.extension),
            Completion::new(
                move |result| drop(events.send(CoreEvent::Initialized { epoch, result })),
                || Err(PipelineError::Aborted),
            ),
        );

        self.host = Some(host);
        self.pending_init = Some(done);
    }

    fn finish_initialize(&mut self, info: MediaInfo, done: Completion<DemuxerResult<()>>) {
        *self.shared.audio.write() = info.audio.clone();
        *self.shared.video.write() = info.video.clone();

        let supports_change = self.config.supports_config_change;
        let mut streams = vec![];
        if info.audio.is_valid() {
            streams.push(DemuxerStream::new(
                &TrackConfig::Audio(info.audio),
                self.sender.clone(),
                supports_change,
            ));
        }
        if info.video.is_valid() {
            streams.push(DemuxerStream::new(
                &TrackConfig::Video(info.video),
                self.sender.clone(),
                supports_change,
            ));
        }

        self.streams = streams.clone();
        self.shared.publish_streams(streams);
        self.shared.publish_time(info.time);

        if info.bitrate > 0 {
            self.data_source.set_bitrate(info.bitrate);
        }

        if let Some(framework) = self.framework.clone() {
            let duration = info.time.duration;
            if self
                .provider
                .owner()
                .post(move || framework.set_duration(duration))
                .is_err()
            {
                warn!("Owner context closed; duration not reported.");
            }
        }

        self.set_state(DemuxerState::Ready);
        info!(
            "Demuxer ready with {} stream(s), duration {:?}.",
            self.streams.len(),
            info.time.duration
        );
        done.complete(Ok(()));
    }

    fn fail_initialize(&mut self, done: Completion<DemuxerResult<()>>, err: PipelineError) {
        warn!("Demuxer failed to initialise: {}.", err);
        self.stop_all();
        done.complete(Err(DemuxerError::InitializationFailure(err)));
    }

    fn seek(&mut self, time: Duration, done: Completion<DemuxerResult<()>>) {
        match self.state() {
            DemuxerState::Ready => {},
            DemuxerState::Stopped => {
                done.complete(Err(DemuxerError::Aborted));
                return;
            },
            state => {
                error!("Seek called while {:?}.", state);
                done.complete(Err(DemuxerError::InvalidState(state)));
                return;
            },
        }

        if self.host.is_none() {
            done.complete(Err(DemuxerError::Aborted));
            return;
        }
        self.set_state(DemuxerState::Seeking);

        let events = self.events_tx.clone();
        let epoch = self.epoch;
        let Some(host) = &mut self.host else {
            return;
        };
        host.seek(
            time,
            Completion::new(
                // If the core has gone, the event (and `done` in it) is dropped,
                // which aborts the seek.
                move |result| drop(events.send(CoreEvent::Seeked { epoch, result, done })),
                || Err(PipelineError::Aborted),
            ),
        );
    }

    fn read(&mut self, track: TrackType, done: Completion<DemuxerResult<DecodedBuffer>>) {
        let stream = self
            .streams
            .iter()
            .find(|s| s.track_type() == track)
            .map(|s| s.shared().clone());

        let Some(stream) = stream else {
            done.complete(Ok(DecodedBuffer::end_of_stream()));
            return;
        };

        if self.host.as_ref().map_or(false, |h| h.has_pending_read(track)) {
            error!("Overlapping {:?} read rejected.", track);
            done.complete(Err(DemuxerError::ReadPending(track)));
            return;
        }

        if self.state() == DemuxerState::Stopped || stream.is_stopped() || !stream.is_enabled() {
            done.complete(Ok(DecodedBuffer::end_of_stream()));
            return;
        }

        let done = self.adapt_read(stream, done);
        match &mut self.host {
            Some(host) => host.read_decoded_data(track, done),
            None => done.complete(Ok(DecodedBuffer::end_of_stream())),
        }
    }

    /// Applies in-band config changes to `stream` before they reach the caller.
    fn adapt_read(
        &self,
        stream: Arc<StreamShared>,
        done: Completion<DemuxerResult<DecodedBuffer>>,
    ) -> Completion<PipelineResult<DecodedBuffer>> {
        let shared = self.shared.clone();

        done.adapt(
            move |result: PipelineResult<DecodedBuffer>| match result {
                Ok(buffer) => match &buffer.status {
                    BufferStatus::ConfigChanged(config) => {
                        if !stream.supports_config_change() {
                            // Later buffers would no longer match the reported config.
                            warn!("Unsupported track config change; ending track.");
                            stream.stop();
                            return Err(DemuxerError::ReadFailure(
                                PipelineError::ConfigChangeUnsupported,
                            ));
                        }

                        stream.update_config(config);
                        shared.update_config(config);
                        Ok(buffer)
                    },
                    _ => Ok(buffer),
                },
                Err(e) => Err(DemuxerError::from_read(e)),
            },
            || Ok(DecodedBuffer::end_of_stream()),
        )
    }

    fn set_track_enabled(&mut self, track: TrackType, enabled: bool, time: Duration) {
        match self.streams.iter().find(|s| s.track_type() == track) {
            Some(stream) => {
                debug!("{:?} track enabled: {} at {:?}.", track, enabled, time);
                stream.shared().set_enabled(enabled, time);
            },
            None => trace!("No {:?} stream to enable or disable.", track),
        }
    }

    fn with_ready_host<T: 'static>(
        &mut self,
        done: Completion<DemuxerResult<T>>,
        issue: impl FnOnce(&mut PipelineHost, Completion<PipelineResult<T>>),
    ) {
        match (self.state(), self.host.as_mut()) {
            (DemuxerState::Ready | DemuxerState::Seeking, Some(host)) => issue(
                host,
                done.adapt(
                    |result: PipelineResult<T>| result.map_err(DemuxerError::from_read),
                    || Err(PipelineError::Aborted),
                ),
            ),
            (DemuxerState::Stopped, _) => done.complete(Err(DemuxerError::Aborted)),
            (state, _) => {
                error!("Video decode call made while {:?}.", state);
                done.complete(Err(DemuxerError::InvalidState(state)));
            },
        }
    }

    fn endpoint_lost(&mut self) {
        warn!("Pipeline endpoint disconnected.");
        let err = PipelineError::Transport("endpoint disconnected".into());

        if let Some(host) = &mut self.host {
            host.fail_all(&err);
        }

        match self.pending_init.take() {
            Some(done) => self.fail_initialize(done, err),
            None => {
                if let Some(framework) = self.framework.clone() {
                    let report = DemuxerError::ReadFailure(err);
                    drop(
                        self.provider
                            .owner()
                            .post(move || framework.on_demuxer_error(report)),
                    );
                }
                self.stop_all();
            },
        }
    }

    /// Tears down the session, resolving everything outstanding. Idempotent.
    fn stop_all(&mut self) {
        if self.state() == DemuxerState::Stopped {
            return;
        }
        debug!("Stopping demuxer.");

        for stream in &self.streams {
            stream.shared().stop();
        }
        if let Some(host) = &mut self.host {
            host.abort_reads();
        }

        self.data_source.stop();

        if let Some(mut host) = self.host.take() {
            host.stop();
        }
        self.epoch += 1;

        if let Some(done) = self.pending_init.take() {
            done.complete(Err(DemuxerError::Aborted));
        }

        self.shared.publish_streams(vec![]);
        self.set_state(DemuxerState::Stopped);
    }
}

async fn next_remote(events: Option<Receiver<RemoteMessage>>) -> Option<RemoteMessage> {
    match events {
        Some(events) => events.recv_async().await.ok(),
        None => std::future::pending().await,
    }
}
