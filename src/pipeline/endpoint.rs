use super::{
    backend::{Backend, ProbeHint},
    message::*,
    remote_source::RemoteSource,
};
use crate::{
    config::Config,
    error::PipelineError,
    media::{DecodedBuffer, EncodedUnit, MediaInfo},
};
use flume::{Receiver, Sender};
use std::{collections::VecDeque, time::Duration};
use tracing::{debug, instrument, trace, warn};

/// The decoding side of a session, which runs on its own thread.
///
/// Requests are answered strictly in arrival order. While the backend parses or
/// decodes, the endpoint may block on the host for more bytes.
pub(crate) struct Endpoint {
    requests: Receiver<PipelineRequest>,
    events: Sender<RemoteMessage>,
    replies: Receiver<DataReply>,
    backend: Box<dyn Backend>,
    max_decode_buffers: usize,
    read_chunk_size: usize,
    video_queue: VecDeque<EncodedUnit>,
    initialized: bool,
}

impl Endpoint {
    pub(crate) fn new(
        requests: Receiver<PipelineRequest>,
        events: Sender<RemoteMessage>,
        replies: Receiver<DataReply>,
        backend: Box<dyn Backend>,
        config: &Config,
    ) -> Self {
        Self {
            requests,
            events,
            replies,
            backend,
            max_decode_buffers: config.max_decode_buffers,
            read_chunk_size: config.read_chunk_size,
            video_queue: VecDeque::with_capacity(config.max_decode_buffers),
            initialized: false,
        }
    }

    #[instrument(skip(self))]
    pub(crate) fn run(mut self) {
        while let Ok(request) = self.requests.recv() {
            if !self.handle(request) {
                break;
            }
        }
    }

    fn handle(&mut self, request: PipelineRequest) -> bool {
        let response = match request {
            PipelineRequest::Initialize {
                ticket,
                mime,
                extension,
                size,
                streaming,
            } => Some(PipelineResponse::Initialized {
                ticket,
                result: self.initialize(ProbeHint { mime, extension }, size, streaming),
            }),
            PipelineRequest::StartWaitingForSeek { .. } => {
                self.backend.start_waiting_for_seek();
                None
            },
            PipelineRequest::Seek { ticket, time } => Some(PipelineResponse::Seeked {
                ticket,
                result: self
                    .check_initialized()
                    .and_then(|()| self.backend.seek(time).map_err(Into::into)),
            }),
            PipelineRequest::ReadDecodedData { ticket, track } =>
                Some(PipelineResponse::DecodedData {
                    ticket,
                    track,
                    result: self
                        .check_initialized()
                        .and_then(|()| self.backend.read(track).map_err(Into::into)),
                }),
            PipelineRequest::AppendBuffer { ticket, unit } => Some(PipelineResponse::Appended {
                ticket,
                result: self.append(unit),
            }),
            PipelineRequest::DecodeVideo { ticket } => Some(PipelineResponse::VideoDecoded {
                ticket,
                result: self.decode_video(),
            }),
            PipelineRequest::HasEnoughData { ticket } => Some(PipelineResponse::EnoughData {
                ticket,
                result: self
                    .check_push_mode()
                    .map(|()| self.video_queue.len() >= self.max_decode_buffers),
            }),
            PipelineRequest::GetMaxDecodeBuffers { ticket } =>
                Some(PipelineResponse::MaxDecodeBuffers {
                    ticket,
                    result: self.check_push_mode().map(|()| self.max_decode_buffers),
                }),
            PipelineRequest::Stop { ticket } => {
                trace!("Endpoint stopping.");
                self.backend.reset();
                self.video_queue.clear();
                self.initialized = false;
                Some(PipelineResponse::Stopped { ticket })
            },
            PipelineRequest::Poison => return false,
        };

        match response {
            Some(response) => self.events.send(RemoteMessage::Response(response)).is_ok(),
            None => true,
        }
    }

    fn initialize(
        &mut self,
        hint: ProbeHint,
        size: Option<u64>,
        streaming: bool,
    ) -> Result<MediaInfo, PipelineError> {
        self.initialized = false;
        self.video_queue.clear();

        let source = RemoteSource::new(
            self.events.clone(),
            self.replies.clone(),
            size,
            streaming,
            self.read_chunk_size,
        );

        let mut info = self
            .backend
            .initialize(Box::new(source), &hint)
            .map_err(|e| {
                debug!("Backend failed to open {:?}: {}.", hint.mime, e);
                PipelineError::from(e)
            })?;

        if !info.audio.is_valid() && !info.video.is_valid() {
            self.backend.reset();
            return Err(PipelineError::Open("no usable tracks".into()));
        }

        info.bitrate = estimate_bitrate(size, info.time.duration);
        self.initialized = true;

        Ok(info)
    }

    fn check_initialized(&self) -> Result<(), PipelineError> {
        if self.initialized {
            Ok(())
        } else {
            Err(PipelineError::NotInitialized)
        }
    }

    fn check_push_mode(&mut self) -> Result<(), PipelineError> {
        self.check_initialized()?;

        if self.backend.video_codec().is_some() {
            Ok(())
        } else {
            Err(PipelineError::Unsupported("push-mode video decoding".into()))
        }
    }

    fn append(&mut self, unit: EncodedUnit) -> Result<(), PipelineError> {
        self.check_push_mode()?;

        if self.video_queue.len() >= self.max_decode_buffers {
            warn!("Rejecting video unit: queue holds {}.", self.video_queue.len());
            return Err(PipelineError::QueueFull);
        }

        self.video_queue.push_back(unit);
        Ok(())
    }

    fn decode_video(&mut self) -> Result<DecodedBuffer, PipelineError> {
        self.check_push_mode()?;

        let unit = self.video_queue.pop_front().ok_or(PipelineError::QueueEmpty)?;
        let codec = self
            .backend
            .video_codec()
            .ok_or_else(|| PipelineError::Unsupported("push-mode video decoding".into()))?;

        codec.decode(&unit).map_err(Into::into)
    }
}

/// Estimates a container's bitrate from its length in bytes and its duration.
///
/// Returns `0` when either is unknown or zero.
pub(crate) fn estimate_bitrate(size: Option<u64>, duration: Option<Duration>) -> u32 {
    match (size, duration) {
        (Some(bytes), Some(duration)) if bytes > 0 && !duration.is_zero() => {
            let bits = bytes as f64 * 8.0;
            (bits / duration.as_secs_f64()).min(f64::from(u32::MAX)) as u32
        },
        _ => 0,
    }
}
