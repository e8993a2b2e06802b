use super::{backend::*, endpoint::Endpoint, message::*};
use crate::{
    config::Config,
    constants::{ENDPOINT_EXIT_POLL, ENDPOINT_THREAD_NAME},
    error::PipelineError,
};
use flume::{Receiver, RecvTimeoutError, Sender};
use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    sync::Arc,
    thread::JoinHandle,
    time::{Duration, Instant},
};
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

/// Produces new [`PipelineSession`]s.
///
/// This is the seam at which an embedder can place the endpoint in another
/// process: a creator only needs to hand back the three channels of a session.
pub trait SessionCreator: Send + Sync {
    /// Starts a new endpoint, and returns the session connected to it.
    fn create_session(&self) -> Result<PipelineSession, PipelineError>;
}

/// A handle to one remote decode session.
///
/// Sessions cannot be cloned. Releasing or dropping a session stops its endpoint
/// (see [`release`] for how), and blocks until the endpoint has exited or been
/// given up on.
///
/// [`release`]: PipelineSession::release
pub struct PipelineSession {
    id: Uuid,
    requests: Sender<PipelineRequest>,
    replies: Option<Sender<DataReply>>,
    events: Option<Receiver<RemoteMessage>>,
    endpoint: Option<JoinHandle<()>>,
    drain_timeout: Duration,
    released: bool,
}

impl PipelineSession {
    /// Assembles a session from the channels connected to an endpoint.
    ///
    /// `endpoint`, if given, is joined once the session is released.
    #[must_use]
    pub fn new(
        requests: Sender<PipelineRequest>,
        replies: Sender<DataReply>,
        events: Receiver<RemoteMessage>,
        endpoint: Option<JoinHandle<()>>,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            requests,
            replies: Some(replies),
            events: Some(events),
            endpoint,
            drain_timeout,
            released: false,
        }
    }

    /// A unique identifier for this session.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn send(&self, request: PipelineRequest) -> Result<(), PipelineError> {
        self.requests
            .send(request)
            .map_err(|_| PipelineError::Transport("endpoint request channel closed".into()))
    }

    pub(crate) fn reply_sender(&self) -> Option<Sender<DataReply>> {
        self.replies.clone()
    }

    pub(crate) fn events(&self) -> Option<Receiver<RemoteMessage>> {
        self.events.clone()
    }

    /// Stops the endpoint and waits for it to exit.
    ///
    /// The endpoint is sent `Stop`, after which its messages are drained until it
    /// confirms, or until the session's drain timeout passes. Drained responses are
    /// discarded, and any data it still asks for is refused. The endpoint is then
    /// cut off from the host and told to exit. It is joined if it exits within a
    /// further drain timeout, and detached otherwise.
    pub fn release(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        trace!("Releasing session {}.", self.id);

        if self.send(PipelineRequest::Stop { ticket: Ticket::default() }).is_ok() {
            self.drain();
        }

        // Blocked data reads on the endpoint fail once both of these are gone.
        self.events = None;
        self.replies = None;

        drop(self.requests.send(PipelineRequest::Poison));

        if let Some(endpoint) = self.endpoint.take() {
            let deadline = Instant::now() + self.drain_timeout;
            while !endpoint.is_finished() && Instant::now() < deadline {
                std::thread::sleep(ENDPOINT_EXIT_POLL);
            }

            if !endpoint.is_finished() {
                warn!("Endpoint for session {} is unresponsive; detaching it.", self.id);
            } else if endpoint.join().is_err() {
                error!("Endpoint for session {} panicked.", self.id);
            }
        }

        debug!("Session {} released.", self.id);
    }

    fn drain(&self) {
        let Some(events) = &self.events else {
            return;
        };
        let deadline = Instant::now() + self.drain_timeout;

        loop {
            match events.recv_deadline(deadline) {
                Ok(RemoteMessage::Response(PipelineResponse::Stopped { .. })) => {
                    trace!("Session {} confirmed stop.", self.id);
                    return;
                },
                Ok(RemoteMessage::Response(response)) => {
                    trace!("Discarding response to {:?} during drain.", response.ticket());
                },
                Ok(RemoteMessage::ReadData(request)) =>
                    if let Some(replies) = &self.replies {
                        drop(replies.send(DataReply {
                            seq: request.seq,
                            result: Err(PipelineError::Aborted),
                        }));
                    },
                Err(RecvTimeoutError::Timeout) => {
                    warn!("Session {} did not confirm stop in time.", self.id);
                    return;
                },
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }
}

impl Drop for PipelineSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Debug for PipelineSession {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("PipelineSession")
            .field("id", &self.id)
            .field("released", &self.released)
            .finish()
    }
}

/// Creates sessions whose endpoints run on threads in this process.
#[derive(Clone)]
pub struct LocalSessionCreator {
    config: Config,
    factory: Arc<dyn BackendFactory>,
}

impl LocalSessionCreator {
    /// Creates sessions which decode with Symphonia, using `config`'s registries.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_backend(config, SymphoniaFactory)
    }

    /// Creates sessions which decode with backends built by `factory`.
    pub fn with_backend(config: Config, factory: impl BackendFactory + 'static) -> Self {
        Self {
            config,
            factory: Arc::new(factory),
        }
    }
}

impl SessionCreator for LocalSessionCreator {
    fn create_session(&self) -> Result<PipelineSession, PipelineError> {
        let (req_tx, req_rx) = flume::unbounded();
        let (event_tx, event_rx) = flume::unbounded();
        let (reply_tx, reply_rx) = flume::unbounded();

        let config = self.config.clone();
        let factory = self.factory.clone();

        let endpoint = std::thread::Builder::new()
            .name(ENDPOINT_THREAD_NAME.into())
            .spawn(move || {
                trace!("Endpoint started.");
                let backend = factory.make_backend(&config);
                Endpoint::new(req_rx, event_tx, reply_rx, backend, &config).run();
                trace!("Endpoint finished.");
            })
            .map_err(|e| PipelineError::Transport(e.to_string()))?;

        let session = PipelineSession::new(
            req_tx,
            reply_tx,
            event_rx,
            Some(endpoint),
            self.config.stop_drain_timeout,
        );
        debug!("Created session {}.", session.id());

        Ok(session)
    }
}

impl Debug for LocalSessionCreator {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("LocalSessionCreator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        media::{DecodedBuffer, MediaInfo, TrackType},
        pipeline::DisposalThread,
    };
    use symphonia_core::io::MediaSource;

    /// Reports its name once its endpoint thread has exited.
    struct ExitReporter {
        wedge: Option<Receiver<()>>,
        exited: Sender<&'static str>,
        name: &'static str,
    }

    impl Backend for ExitReporter {
        fn initialize(
            &mut self,
            _source: Box<dyn MediaSource>,
            _hint: &ProbeHint,
        ) -> Result<MediaInfo, BackendError> {
            if let Some(wedge) = &self.wedge {
                drop(wedge.recv());
            }
            Err(BackendError::Unsupported("nothing to open".into()))
        }

        fn seek(&mut self, _time: Duration) -> Result<(), BackendError> {
            Ok(())
        }

        fn read(&mut self, _track: TrackType) -> Result<DecodedBuffer, BackendError> {
            Ok(DecodedBuffer::end_of_stream())
        }

        fn reset(&mut self) {}
    }

    impl Drop for ExitReporter {
        fn drop(&mut self) {
            drop(self.exited.send(self.name));
        }
    }

    struct ExitReporterFactory {
        wedge: Option<Receiver<()>>,
        exited: Sender<&'static str>,
        name: &'static str,
    }

    impl BackendFactory for ExitReporterFactory {
        fn make_backend(&self, _config: &Config) -> Box<dyn Backend> {
            Box::new(ExitReporter {
                wedge: self.wedge.clone(),
                exited: self.exited.clone(),
                name: self.name,
            })
        }
    }

    #[test]
    #[ntest::timeout(10_000)]
    fn release_joins_endpoint() {
        let creator = LocalSessionCreator::new(Config::default());
        let session = creator.create_session().unwrap();

        session.release();
    }

    #[test]
    #[ntest::timeout(10_000)]
    fn uninitialized_requests_are_refused() {
        let creator = LocalSessionCreator::new(Config::default());
        let session = creator.create_session().unwrap();
        let events = session.events().unwrap();
        let ticket = Ticket {
            generation: 0,
            seq: 1,
        };

        session
            .send(PipelineRequest::ReadDecodedData {
                ticket,
                track: TrackType::Audio,
            })
            .unwrap();

        match events.recv().unwrap() {
            RemoteMessage::Response(PipelineResponse::DecodedData { result, .. }) => {
                assert_eq!(result.unwrap_err(), PipelineError::NotInitialized);
            },
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    #[ntest::timeout(10_000)]
    fn drain_refuses_data_and_survives_a_busy_endpoint() {
        let creator = LocalSessionCreator::new(
            Config::default().stop_drain_timeout(Duration::from_millis(50)),
        );
        let session = creator.create_session().unwrap();

        // Nobody serves this endpoint's data reads: the drain must do so.
        session
            .send(PipelineRequest::Initialize {
                ticket: Ticket::default(),
                mime: "audio/wav".into(),
                extension: Some("wav".into()),
                size: Some(1_000),
                streaming: false,
            })
            .unwrap();

        drop(session);
    }

    #[test]
    #[ntest::timeout(10_000)]
    fn wedged_endpoint_does_not_hold_up_later_releases() {
        let config = Config::default().stop_drain_timeout(Duration::from_millis(100));
        let (wedge_tx, wedge_rx) = flume::unbounded::<()>();
        let (exited_tx, exited_rx) = flume::unbounded();

        let wedged = LocalSessionCreator::with_backend(config.clone(), ExitReporterFactory {
            wedge: Some(wedge_rx),
            exited: exited_tx.clone(),
            name: "wedged",
        })
        .create_session()
        .unwrap();
        let healthy = LocalSessionCreator::with_backend(config, ExitReporterFactory {
            wedge: None,
            exited: exited_tx,
            name: "healthy",
        })
        .create_session()
        .unwrap();

        // Blocks the endpoint inside its backend until the wedge is dropped.
        wedged
            .send(PipelineRequest::Initialize {
                ticket: Ticket::default(),
                mime: "audio/wav".into(),
                extension: None,
                size: None,
                streaming: false,
            })
            .unwrap();

        let disposer = DisposalThread::run();
        disposer.dispose(wedged);
        disposer.dispose(healthy);

        assert_eq!(exited_rx.recv_timeout(Duration::from_secs(3)), Ok("healthy"));

        drop(wedge_tx);
        assert_eq!(exited_rx.recv_timeout(Duration::from_secs(3)), Ok("wedged"));
    }
}
