use super::PipelineSession;
use flume::{Receiver, Sender};
use once_cell::sync::Lazy;
use tracing::{instrument, trace};

static DEFAULT_DISPOSER: Lazy<DisposalThread> = Lazy::new(DisposalThread::run);

pub(crate) enum DisposalMessage {
    Session(PipelineSession),
}

/// A thread which releases pipeline sessions.
///
/// Releasing a session blocks while its endpoint drains and exits, so hosts hand
/// sessions here rather than stall the pipeline context.
#[derive(Clone, Debug)]
pub struct DisposalThread(Sender<DisposalMessage>);

impl Default for DisposalThread {
    fn default() -> Self {
        Self::run()
    }
}

impl DisposalThread {
    /// Starts a new disposal thread.
    #[must_use]
    pub fn run() -> Self {
        let (tx, rx) = flume::unbounded();
        std::thread::spawn(move || {
            trace!("Disposal thread started.");
            runner(rx);
            trace!("Disposal thread finished.");
        });

        Self(tx)
    }

    pub(crate) fn shared() -> &'static Self {
        &DEFAULT_DISPOSER
    }

    /// Releases `session` in the background.
    ///
    /// If this thread has exited, the session is released on the caller.
    pub(crate) fn dispose(&self, session: PipelineSession) {
        if let Err(e) = self.0.send(DisposalMessage::Session(session)) {
            trace!("Disposal thread gone, releasing inline.");
            drop(e.into_inner());
        }
    }
}

#[instrument(skip(rx))]
fn runner(rx: Receiver<DisposalMessage>) {
    while let Ok(msg) = rx.recv() {
        match msg {
            DisposalMessage::Session(session) => session.release(),
        }
    }
}
