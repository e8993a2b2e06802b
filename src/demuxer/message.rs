use super::DemuxerHost;
use crate::{
    callback::Completion,
    error::{DemuxerResult, PipelineError},
    media::{DecodedBuffer, EncodedUnit, MediaInfo, TrackType},
};
use std::{sync::Arc, time::Duration};

/// Commands sent from demuxer and stream handles to the demuxer core.
pub(crate) enum DemuxerMessage {
    Initialize(Arc<dyn DemuxerHost>, Completion<DemuxerResult<()>>),
    Seek(Duration, Completion<DemuxerResult<()>>),
    StartWaitingForSeek(Duration),
    Read(TrackType, Completion<DemuxerResult<DecodedBuffer>>),
    SetTrackEnabled(TrackType, bool, Duration),
    AppendVideoBuffer(EncodedUnit, Completion<DemuxerResult<()>>),
    DecodeVideo(Completion<DemuxerResult<DecodedBuffer>>),
    HasEnoughData(Completion<DemuxerResult<bool>>),
    GetMaxDecodeBuffers(Completion<DemuxerResult<usize>>),
    Stop(Option<Completion<()>>),
}

/// Results fed back into the core by its host's completions.
///
/// Each carries the epoch it was issued in; events from an earlier epoch
/// arrived after a `Stop`, and must not act.
pub(crate) enum CoreEvent {
    Initialized {
        epoch: u64,
        result: Result<MediaInfo, PipelineError>,
    },
    Seeked {
        epoch: u64,
        result: Result<(), PipelineError>,
        done: Completion<DemuxerResult<()>>,
    },
}
