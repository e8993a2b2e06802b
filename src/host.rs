//! Owner-side proxy for a remote decode session.

use crate::{
    callback::Completion,
    error::PipelineError,
    media::{DecodedBuffer, EncodedUnit, MediaInfo, TrackType},
    pipeline::*,
    source::DataSource,
};
use flume::Receiver;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

pub(crate) enum Pending {
    Initialize(Completion<PipelineResult<MediaInfo>>),
    Seek(Completion<PipelineResult<()>>),
    Read(TrackType, Completion<PipelineResult<DecodedBuffer>>),
    Append(Completion<PipelineResult<()>>),
    DecodeVideo(Completion<PipelineResult<DecodedBuffer>>),
    HasEnoughData(Completion<PipelineResult<bool>>),
    MaxDecodeBuffers(Completion<PipelineResult<usize>>),
}

impl Pending {
    fn track(&self) -> Option<TrackType> {
        match self {
            Self::Read(track, _) => Some(*track),
            _ => None,
        }
    }

    /// Resolves this call as cancelled: reads end their stream, all else aborts.
    fn abort(self) {
        match self {
            Self::Read(_, done) => done.complete(Ok(DecodedBuffer::end_of_stream())),
            other => other.fail(PipelineError::Aborted),
        }
    }

    fn fail(self, err: PipelineError) {
        match self {
            Self::Initialize(done) => done.complete(Err(err)),
            Self::Seek(done) | Self::Append(done) => done.complete(Err(err)),
            Self::Read(_, done) | Self::DecodeVideo(done) => done.complete(Err(err)),
            Self::HasEnoughData(done) => done.complete(Err(err)),
            Self::MaxDecodeBuffers(done) => done.complete(Err(err)),
        }
    }
}

/// Issues requests to one session, and resolves each through its completion.
///
/// A host lives on the pipeline context, is owned by exactly one demuxer, and
/// owns its session exclusively. At most one read may be outstanding per track.
pub(crate) struct PipelineHost {
    session: Option<PipelineSession>,
    data_source: Arc<dyn DataSource>,
    disposer: DisposalThread,
    generation: u64,
    next_seq: u64,
    pending: HashMap<u64, Pending>,
    reads: [Option<u64>; 2],
    data_reads: HashMap<u64, JoinHandle<()>>,
    initialized: bool,
    waiting_for_seek: bool,
    stopped: bool,
}

impl PipelineHost {
    pub(crate) fn new(
        session: PipelineSession,
        data_source: Arc<dyn DataSource>,
        disposer: DisposalThread,
    ) -> Self {
        trace!("Host attached to session {}.", session.id());

        Self {
            session: Some(session),
            data_source,
            disposer,
            generation: 0,
            next_seq: 0,
            pending: HashMap::new(),
            reads: [None, None],
            data_reads: HashMap::new(),
            initialized: false,
            waiting_for_seek: false,
            stopped: false,
        }
    }

    pub(crate) fn initialize(
        &mut self,
        mime: &str,
        extension: Option<&str>,
        done: Completion<PipelineResult<MediaInfo>>,
    ) {
        let size = self.data_source.size();
        let streaming = self.data_source.is_streaming();

        self.issue(Pending::Initialize(done), |ticket| PipelineRequest::Initialize {
            ticket,
            mime: mime.to_string(),
            extension: extension.map(str::to_string),
            size,
            streaming,
        });
    }

    /// Tells the endpoint a seek is coming. Sent at most once per seek.
    pub(crate) fn start_waiting_for_seek(&mut self) {
        if self.stopped || !self.initialized || self.waiting_for_seek {
            return;
        }
        self.waiting_for_seek = true;

        let ticket = self.next_ticket();
        if let Some(session) = &self.session {
            drop(session.send(PipelineRequest::StartWaitingForSeek { ticket }));
        }
    }

    pub(crate) fn seek(&mut self, time: Duration, done: Completion<PipelineResult<()>>) {
        if !self.stopped && !self.initialized {
            error!("Seek requested before initialization completed.");
            done.complete(Err(PipelineError::NotInitialized));
            return;
        }

        self.waiting_for_seek = false;
        self.issue(Pending::Seek(done), |ticket| PipelineRequest::Seek { ticket, time });
    }

    pub(crate) fn read_decoded_data(
        &mut self,
        track: TrackType,
        done: Completion<PipelineResult<DecodedBuffer>>,
    ) {
        if !self.stopped && self.reads[track.index()].is_some() {
            error!("Overlapping {:?} read rejected.", track);
            done.complete(Err(PipelineError::ReadPending(track)));
            return;
        }

        let seq = self.issue(Pending::Read(track, done), |ticket| {
            PipelineRequest::ReadDecodedData { ticket, track }
        });
        self.reads[track.index()] = seq;
    }

    pub(crate) fn has_pending_read(&self, track: TrackType) -> bool {
        self.reads[track.index()].is_some()
    }

    pub(crate) fn append_buffer(&mut self, unit: EncodedUnit, done: Completion<PipelineResult<()>>) {
        self.issue(Pending::Append(done), |ticket| PipelineRequest::AppendBuffer {
            ticket,
            unit,
        });
    }

    pub(crate) fn decode_video(&mut self, done: Completion<PipelineResult<DecodedBuffer>>) {
        self.issue(Pending::DecodeVideo(done), |ticket| {
            PipelineRequest::DecodeVideo { ticket }
        });
    }

    pub(crate) fn has_enough_data(&mut self, done: Completion<PipelineResult<bool>>) {
        self.issue(Pending::HasEnoughData(done), |ticket| {
            PipelineRequest::HasEnoughData { ticket }
        });
    }

    pub(crate) fn get_max_decode_buffers(&mut self, done: Completion<PipelineResult<usize>>) {
        self.issue(Pending::MaxDecodeBuffers(done), |ticket| {
            PipelineRequest::GetMaxDecodeBuffers { ticket }
        });
    }

    /// Resolves every outstanding read with end-of-stream.
    pub(crate) fn abort_reads(&mut self) {
        for slot in &mut self.reads {
            if let Some(pending) = slot.take().and_then(|seq| self.pending.remove(&seq)) {
                pending.abort();
            }
        }
    }

    /// Cancels all outstanding work, and hands the session off for release.
    ///
    /// Every pending completion has fired by the time this returns. Later calls,
    /// to this or any other method, resolve immediately.
    pub(crate) fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.generation += 1;

        self.abort_reads();
        for (_, pending) in self.pending.drain() {
            pending.abort();
        }

        let replies = self.session.as_ref().and_then(PipelineSession::reply_sender);
        for (seq, task) in self.data_reads.drain() {
            task.abort();
            if let Some(replies) = &replies {
                drop(replies.send(DataReply {
                    seq,
                    result: Err(PipelineError::Aborted),
                }));
            }
        }
        drop(replies);

        if let Some(session) = self.session.take() {
            debug!("Host stopped; disposing of session {}.", session.id());
            self.disposer.dispose(session);
        }
    }

    /// A receiver for the endpoint's messages, while the session is live.
    pub(crate) fn remote_events(&self) -> Option<Receiver<RemoteMessage>> {
        self.session.as_ref().and_then(PipelineSession::events)
    }

    pub(crate) fn dispatch(&mut self, msg: RemoteMessage) {
        match msg {
            RemoteMessage::Response(response) => self.resolve(response),
            RemoteMessage::ReadData(request) => self.serve(request),
        }
    }

    /// Fails every outstanding call after the endpoint has vanished.
    pub(crate) fn fail_all(&mut self, err: &PipelineError) {
        self.reads = [None, None];
        for (_, pending) in self.pending.drain() {
            pending.fail(err.clone());
        }
    }

    fn next_ticket(&mut self) -> Ticket {
        self.next_seq += 1;
        Ticket {
            generation: self.generation,
            seq: self.next_seq,
        }
    }

    fn issue(
        &mut self,
        pending: Pending,
        make: impl FnOnce(Ticket) -> PipelineRequest,
    ) -> Option<u64> {
        if self.stopped {
            pending.abort();
            return None;
        }

        let ticket = self.next_ticket();
        let Some(session) = &self.session else {
            pending.abort();
            return None;
        };

        match session.send(make(ticket)) {
            Ok(()) => {
                self.pending.insert(ticket.seq, pending);
                Some(ticket.seq)
            },
            Err(e) => {
                warn!("Failed to issue request: {}.", e);
                pending.fail(e);
                None
            },
        }
    }

    fn resolve(&mut self, response: PipelineResponse) {
        let ticket = response.ticket();

        if self.stopped || ticket.generation != self.generation {
            trace!("Discarding stale response {:?}.", ticket);
            return;
        }

        let Some(pending) = self.pending.remove(&ticket.seq) else {
            trace!("Discarding response to unknown request {:?}.", ticket);
            return;
        };

        if let Some(track) = pending.track() {
            self.reads[track.index()] = None;
        }

        match (pending, response) {
            (Pending::Initialize(done), PipelineResponse::Initialized { result, .. }) => {
                self.initialized = result.is_ok();
                done.complete(result);
            },
            (Pending::Seek(done), PipelineResponse::Seeked { result, .. })
            | (Pending::Append(done), PipelineResponse::Appended { result, .. }) =>
                done.complete(result),
            (Pending::Read(_, done), PipelineResponse::DecodedData { result, .. })
            | (Pending::DecodeVideo(done), PipelineResponse::VideoDecoded { result, .. }) =>
                done.complete(result),
            (Pending::HasEnoughData(done), PipelineResponse::EnoughData { result, .. }) =>
                done.complete(result),
            (
                Pending::MaxDecodeBuffers(done),
                PipelineResponse::MaxDecodeBuffers { result, .. },
            ) => done.complete(result),
            (pending, _) => {
                warn!("Response {:?} did not match its request.", ticket);
                pending.fail(PipelineError::Transport("mismatched response".into()));
            },
        }
    }

    fn serve(&mut self, request: DataRequest) {
        if self.stopped {
            return;
        }

        let Some(replies) = self.session.as_ref().and_then(PipelineSession::reply_sender) else {
            return;
        };
        let source = self.data_source.clone();

        self.data_reads.retain(|_, task| !task.is_finished());
        let task = tokio::task::spawn_local(async move {
            let result = source
                .read(request.position, request.len)
                .await
                .map(SharedRegion::from)
                .map_err(|e| PipelineError::DataSource(e.to_string()));

            drop(replies.send(DataReply {
                seq: request.seq,
                result,
            }));
        });
        self.data_reads.insert(request.seq, task);
    }
}

impl Drop for PipelineHost {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        source::MemorySource,
        test_utils::{make_synthetic, make_wav, SyntheticFactory, SyntheticLayout},
    };
    use flume::Sender;
    use tokio::task::LocalSet;

    fn host_for(data: Vec<u8>, factory: SyntheticFactory) -> PipelineHost {
        let creator = LocalSessionCreator::with_backend(Config::default(), factory);
        PipelineHost::new(
            creator.create_session().unwrap(),
            Arc::new(MemorySource::from_bytes(data)),
            DisposalThread::run(),
        )
    }

    fn wav_host() -> PipelineHost {
        let creator = LocalSessionCreator::new(Config::default());
        PipelineHost::new(
            creator.create_session().unwrap(),
            Arc::new(MemorySource::from_bytes(make_wav(2, 48_000, 4_800))),
            DisposalThread::run(),
        )
    }

    fn sink<T: Send + 'static>(tx: &Sender<T>, fallback: fn() -> T) -> Completion<T> {
        let tx = tx.clone();
        Completion::new(move |v| drop(tx.send(v)), fallback)
    }

    async fn pump_until<T>(host: &mut PipelineHost, rx: &Receiver<T>) -> T {
        loop {
            if let Ok(v) = rx.try_recv() {
                return v;
            }

            let events = host.remote_events().unwrap();
            tokio::select! {
                Ok(msg) = events.recv_async() => host.dispatch(msg),
                v = rx.recv_async() => return v.unwrap(),
            }
        }
    }

    async fn init(host: &mut PipelineHost, mime: &str) -> PipelineResult<MediaInfo> {
        let (tx, rx) = flume::unbounded();
        host.initialize(mime, None, sink(&tx, || Err(PipelineError::Aborted)));
        pump_until(host, &rx).await
    }

    fn eos() -> PipelineResult<DecodedBuffer> {
        Ok(DecodedBuffer::end_of_stream())
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn initializes_and_reads_wav() {
        LocalSet::new()
            .run_until(async {
                let mut host = wav_host();
                let info = init(&mut host, "audio/wav").await.unwrap();
                assert_eq!(info.audio.channels, 2);
                assert!(info.bitrate > 0);

                let (tx, rx) = flume::unbounded();
                let mut frames = 0;
                loop {
                    host.read_decoded_data(TrackType::Audio, sink(&tx, eos));
                    let buf = pump_until(&mut host, &rx).await.unwrap();
                    if buf.is_end_of_stream() {
                        break;
                    }
                    frames += buf.frames;
                }
                assert_eq!(frames, 4_800);

                host.stop();
            })
            .await;
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn overlapping_reads_are_rejected() {
        LocalSet::new()
            .run_until(async {
                let (gate_tx, factory) = SyntheticFactory::gated();
                let mut host = host_for(make_synthetic(&SyntheticLayout::default()), factory);
                init(&mut host, "video/webm").await.unwrap();

                let (tx, rx) = flume::unbounded();
                host.read_decoded_data(TrackType::Audio, sink(&tx, eos));
                host.read_decoded_data(TrackType::Audio, sink(&tx, eos));

                assert_eq!(
                    rx.recv_async().await.unwrap().unwrap_err(),
                    PipelineError::ReadPending(TrackType::Audio)
                );

                gate_tx.send(()).unwrap();
                let first = pump_until(&mut host, &rx).await.unwrap();
                assert!(!first.is_end_of_stream());

                host.stop();
            })
            .await;
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn stop_resolves_everything_pending() {
        LocalSet::new()
            .run_until(async {
                let (_gate_tx, factory) = SyntheticFactory::gated();
                let mut host = host_for(make_synthetic(&SyntheticLayout::default()), factory);
                init(&mut host, "video/webm").await.unwrap();

                let (read_tx, read_rx) = flume::unbounded();
                let (seek_tx, seek_rx) = flume::unbounded();
                host.read_decoded_data(TrackType::Audio, sink(&read_tx, eos));
                host.seek(Duration::ZERO, sink(&seek_tx, || Err(PipelineError::Aborted)));

                host.stop();
                host.stop();

                assert!(read_rx.try_recv().unwrap().unwrap().is_end_of_stream());
                assert_eq!(seek_rx.try_recv().unwrap(), Err(PipelineError::Aborted));

                host.read_decoded_data(TrackType::Audio, sink(&read_tx, eos));
                assert!(read_rx.try_recv().unwrap().unwrap().is_end_of_stream());
                host.seek(Duration::ZERO, sink(&seek_tx, || Ok(())));
                assert_eq!(seek_rx.try_recv().unwrap(), Err(PipelineError::Aborted));
                assert!(host.remote_events().is_none());
            })
            .await;
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn stale_and_unknown_responses_are_dropped() {
        LocalSet::new()
            .run_until(async {
                let (_gate_tx, factory) = SyntheticFactory::gated();
                let mut host = host_for(make_synthetic(&SyntheticLayout::default()), factory);
                init(&mut host, "video/webm").await.unwrap();

                let (tx, rx) = flume::unbounded();
                host.read_decoded_data(TrackType::Audio, sink(&tx, eos));
                let seq = host.reads[TrackType::Audio.index()].unwrap();

                for generation in [host.generation + 1, host.generation] {
                    let fake_seq = if generation == host.generation { seq + 100 } else { seq };
                    host.dispatch(RemoteMessage::Response(PipelineResponse::DecodedData {
                        ticket: Ticket {
                            generation,
                            seq: fake_seq,
                        },
                        track: TrackType::Audio,
                        result: Err(PipelineError::Decode("forged".into())),
                    }));
                }

                assert!(rx.try_recv().is_err());
                assert!(host.reads[TrackType::Audio.index()].is_some());

                host.stop();
                assert!(rx.try_recv().unwrap().unwrap().is_end_of_stream());
            })
            .await;
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn seek_hint_is_sent_once_per_seek() {
        LocalSet::new()
            .run_until(async {
                let mut host = host_for(
                    make_synthetic(&SyntheticLayout::default()),
                    SyntheticFactory::default(),
                );

                host.start_waiting_for_seek();
                assert!(!host.waiting_for_seek);

                init(&mut host, "video/webm").await.unwrap();
                let issued = host.next_seq;

                host.start_waiting_for_seek();
                host.start_waiting_for_seek();
                assert!(host.waiting_for_seek);
                assert_eq!(host.next_seq, issued + 1);

                let (tx, rx) = flume::unbounded();
                host.seek(Duration::ZERO, sink(&tx, || Err(PipelineError::Aborted)));
                pump_until(&mut host, &rx).await.unwrap();
                assert!(!host.waiting_for_seek);

                host.start_waiting_for_seek();
                assert_eq!(host.next_seq, issued + 3);

                host.stop();
            })
            .await;
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn seek_before_initialize_is_refused() {
        LocalSet::new()
            .run_until(async {
                let mut host = wav_host();
                let (tx, rx) = flume::unbounded();

                host.seek(Duration::ZERO, sink(&tx, || Ok(())));

                assert_eq!(rx.try_recv().unwrap(), Err(PipelineError::NotInitialized));
                host.stop();
            })
            .await;
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn push_mode_applies_backpressure() {
        LocalSet::new()
            .run_until(async {
                let mut host = host_for(
                    make_synthetic(&SyntheticLayout::default()),
                    SyntheticFactory::default(),
                );
                init(&mut host, "video/webm").await.unwrap();

                let (max_tx, max_rx) = flume::unbounded();
                host.get_max_decode_buffers(sink(&max_tx, || Err(PipelineError::Aborted)));
                let max = pump_until(&mut host, &max_rx).await.unwrap();
                assert_eq!(max, Config::default().max_decode_buffers);

                let (tx, rx) = flume::unbounded();
                for i in 0..=max {
                    let unit = EncodedUnit {
                        data: vec![i as u8; 8].into(),
                        timestamp: Duration::from_millis(i as u64 * 33),
                        is_keyframe: i == 0,
                    };
                    host.append_buffer(unit, sink(&tx, || Err(PipelineError::Aborted)));
                    let res = pump_until(&mut host, &rx).await;
                    if i < max {
                        res.unwrap();
                    } else {
                        assert_eq!(res, Err(PipelineError::QueueFull));
                    }
                }

                let (full_tx, full_rx) = flume::unbounded();
                host.has_enough_data(sink(&full_tx, || Err(PipelineError::Aborted)));
                assert_eq!(pump_until(&mut host, &full_rx).await, Ok(true));

                let (dec_tx, dec_rx) = flume::unbounded();
                host.decode_video(sink(&dec_tx, || Err(PipelineError::Aborted)));
                let frame = pump_until(&mut host, &dec_rx).await.unwrap();
                assert_eq!(frame.bytes(), &[0u8; 8]);

                host.has_enough_data(sink(&full_tx, || Err(PipelineError::Aborted)));
                assert_eq!(pump_until(&mut host, &full_rx).await, Ok(false));

                host.stop();
            })
            .await;
    }
}
