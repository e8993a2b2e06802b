//! Constants affecting pipeline behaviour and buffer sizing.

use std::time::Duration;

/// Default number of compressed units the push-mode video queue may hold.
pub const DEFAULT_MAX_DECODE_BUFFERS: usize = 4;

/// Default number of bytes the endpoint requests from a data source at once.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 64 * 1024;

/// Default time a released session waits for its endpoint to acknowledge `Stop`.
pub const DEFAULT_STOP_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Interval at which a released session checks whether its endpoint has exited.
pub(crate) const ENDPOINT_EXIT_POLL: Duration = Duration::from_millis(5);

/// Name given to the thread backing the pipeline context of a default provider.
pub const PIPELINE_CONTEXT_NAME: &str = "demuxbridge-pipeline";

/// Name given to the thread backing the owner context of a default provider.
pub const OWNER_CONTEXT_NAME: &str = "demuxbridge-owner";

/// Name given to the thread hosting each local pipeline endpoint.
pub(crate) const ENDPOINT_THREAD_NAME: &str = "demuxbridge-endpoint";

/// Width in bytes of one decoded sample (`f32`).
pub const DECODED_SAMPLE_BYTES: usize = 4;
