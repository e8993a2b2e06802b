//! Process-wide availability of the pipeline, and the contexts it runs on.
//!
//! A [`CapabilityProvider`] owns the two [`ExecutionContext`]s shared by every
//! demuxer and decoder: the *owner* context, on which framework callbacks run, and
//! the *pipeline* context, where demuxers, hosts and streams live. Most programs
//! install a single provider with [`preinitialize`], before creating any pipeline
//! objects, and fetch it again with [`get`].

pub mod containers;

use crate::{
    config::Config,
    constants::{OWNER_CONTEXT_NAME, PIPELINE_CONTEXT_NAME},
    context::ExecutionContext,
    error::CapabilityError,
    pipeline::{LocalSessionCreator, PipelineSession, SessionCreator},
};
use derivative::Derivative;
use once_cell::sync::OnceCell;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{debug, instrument};

static PROVIDER: OnceCell<CapabilityProvider> = OnceCell::new();
static RUNTIME_ENABLED: AtomicBool = AtomicBool::new(true);
static FORCE_UNAVAILABLE: AtomicBool = AtomicBool::new(false);

const PLATFORM_SUPPORTED: bool = cfg!(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "windows",
    target_os = "android",
));

/// Gate and context owner for all pipeline objects.
///
/// Providers are cheap to clone; every clone refers to the same contexts.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct CapabilityProvider {
    #[derivative(Debug = "ignore")]
    creator: Arc<dyn SessionCreator>,
    owner: ExecutionContext,
    pipeline: ExecutionContext,
}

impl CapabilityProvider {
    /// Creates a provider which is not installed process-wide.
    pub fn new(
        creator: Arc<dyn SessionCreator>,
        owner: ExecutionContext,
        pipeline: ExecutionContext,
    ) -> Self {
        Self {
            creator,
            owner,
            pipeline,
        }
    }

    /// Creates a provider with fresh contexts, whose sessions decode in-process
    /// with Symphonia.
    pub fn with_default_creator(config: Config) -> Result<Self, CapabilityError> {
        Ok(Self::new(
            Arc::new(LocalSessionCreator::new(config)),
            ExecutionContext::new(OWNER_CONTEXT_NAME)?,
            ExecutionContext::new(PIPELINE_CONTEXT_NAME)?,
        ))
    }

    /// The context on which framework callbacks are run.
    #[must_use]
    pub fn owner(&self) -> &ExecutionContext {
        &self.owner
    }

    /// The context on which demuxers, hosts and streams live.
    #[must_use]
    pub fn pipeline(&self) -> &ExecutionContext {
        &self.pipeline
    }

    /// Returns whether pipeline objects may be created through this provider.
    ///
    /// This requires the process-wide [`is_available`] check to pass, and this
    /// provider's pipeline context to still be running.
    #[must_use]
    pub fn is_available(&self) -> bool {
        is_available() && self.pipeline.is_running()
    }

    /// Creates a session on the pipeline context, blocking until it exists.
    ///
    /// Runs inline when called from the pipeline context.
    #[instrument(skip(self))]
    pub fn create_session(&self) -> Result<PipelineSession, CapabilityError> {
        if !self.is_available() {
            return Err(CapabilityError::Unavailable);
        }

        let creator = self.creator.clone();
        let session = self.pipeline.post_and_wait(move || creator.create_session())??;
        debug!("Provider created session {}.", session.id());

        Ok(session)
    }

    /// Releases a session on the pipeline context, blocking until its endpoint
    /// has exited.
    ///
    /// If the pipeline context has shut down, the session is released on the
    /// calling thread instead.
    #[instrument(skip(self))]
    pub fn release_session(&self, session: PipelineSession) {
        // A closed context drops the task, and with it the session.
        drop(self.pipeline.post_and_wait(move || session.release()));
    }
}

/// Installs the process-wide provider.
///
/// This must be called exactly once, before any pipeline object is created.
/// Later calls fail with [`CapabilityError::AlreadyInitialized`] and leave the
/// installed provider untouched.
pub fn preinitialize(
    creator: Arc<dyn SessionCreator>,
    owner: ExecutionContext,
    pipeline: ExecutionContext,
) -> Result<(), CapabilityError> {
    install(CapabilityProvider::new(creator, owner, pipeline))
}

/// Installs a process-wide provider built by [`CapabilityProvider::with_default_creator`].
pub fn preinitialize_default(config: Config) -> Result<(), CapabilityError> {
    if PROVIDER.get().is_some() {
        return Err(CapabilityError::AlreadyInitialized);
    }

    install(CapabilityProvider::with_default_creator(config)?)
}

fn install(provider: CapabilityProvider) -> Result<(), CapabilityError> {
    PROVIDER
        .set(provider)
        .map_err(|_| CapabilityError::AlreadyInitialized)?;

    debug!("Installed process-wide pipeline provider.");
    Ok(())
}

/// Returns the process-wide provider, if one has been installed.
#[must_use]
pub fn get() -> Option<&'static CapabilityProvider> {
    PROVIDER.get()
}

/// Returns whether the cross-context pipeline may be used in this process.
///
/// This requires the `"pipeline"` feature, a supported target platform, the
/// runtime switch ([`set_runtime_enabled`]) to be on, and the test override
/// ([`force_unavailable_for_testing`]) to be off.
#[must_use]
pub fn is_available() -> bool {
    cfg!(feature = "pipeline")
        && PLATFORM_SUPPORTED
        && RUNTIME_ENABLED.load(Ordering::Acquire)
        && !FORCE_UNAVAILABLE.load(Ordering::Acquire)
}

/// Enables or disables the pipeline at runtime. Defaults to enabled.
pub fn set_runtime_enabled(enabled: bool) {
    RUNTIME_ENABLED.store(enabled, Ordering::Release);
}

/// Forces [`is_available`] to report `false` for the whole process.
///
/// Intended only for tests which must isolate themselves from the pipeline.
pub fn force_unavailable_for_testing(unavailable: bool) {
    FORCE_UNAVAILABLE.store(unavailable, Ordering::Release);
}

/// Returns whether demuxers accept content of type `mime`.
///
/// This is a pure lookup in [`containers::SUPPORTED_CONTAINERS`], and may be
/// called before any provider exists.
#[must_use]
pub fn can_play_type(mime: &str) -> bool {
    containers::lookup(containers::SUPPORTED_CONTAINERS, mime).is_some()
}
