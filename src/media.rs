//! Negotiated track descriptions and the decoded buffers returned by a pipeline.
//!
//! Every type here is plain data which is exchanged between the host and the
//! pipeline endpoint, and so all of them can be serialised onto a wire.

use crate::pipeline::SharedRegion;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use symphonia_core::sample::SampleFormat as SymphSampleFormat;

/// Codec name reported by the synthetic configs of a stream carrying decoded audio.
pub const DECODED_AUDIO_CODEC: &str = "pcm_f32le";

/// Codec name reported by the synthetic configs of a stream carrying decoded video.
pub const DECODED_VIDEO_CODEC: &str = "raw";

/// The kind of elementary stream a track carries.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum TrackType {
    /// An audio track.
    Audio,
    /// A video track.
    Video,
}

impl TrackType {
    pub(crate) fn index(self) -> usize {
        match self {
            Self::Audio => 0,
            Self::Video => 1,
        }
    }
}

/// Sample encoding of an audio track.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum SampleFormat {
    /// The container did not report a sample format.
    Unknown,
    /// Unsigned 8-bit integers.
    U8,
    /// Unsigned 16-bit integers.
    U16,
    /// Unsigned 24-bit integers.
    U24,
    /// Unsigned 32-bit integers.
    U32,
    /// Signed 8-bit integers.
    S8,
    /// Signed 16-bit integers.
    S16,
    /// Signed 24-bit integers.
    S24,
    /// Signed 32-bit integers.
    S32,
    /// 32-bit floating point.
    F32,
    /// 64-bit floating point.
    F64,
}

impl Default for SampleFormat {
    fn default() -> Self {
        Self::Unknown
    }
}

impl From<SymphSampleFormat> for SampleFormat {
    fn from(val: SymphSampleFormat) -> Self {
        match val {
            SymphSampleFormat::U8 => Self::U8,
            SymphSampleFormat::U16 => Self::U16,
            SymphSampleFormat::U24 => Self::U24,
            SymphSampleFormat::U32 => Self::U32,
            SymphSampleFormat::S8 => Self::S8,
            SymphSampleFormat::S16 => Self::S16,
            SymphSampleFormat::S24 => Self::S24,
            SymphSampleFormat::S32 => Self::S32,
            SymphSampleFormat::F32 => Self::F32,
            SymphSampleFormat::F64 => Self::F64,
        }
    }
}

/// Speaker arrangement of an audio track.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ChannelLayout {
    /// No channels are known.
    None,
    /// A single channel.
    Mono,
    /// Left and right channels.
    Stereo,
    /// Any other channel count, without positional information.
    Discrete,
}

impl ChannelLayout {
    /// Guesses a layout from a channel count.
    #[must_use]
    pub fn from_count(channels: u32) -> Self {
        match channels {
            0 => Self::None,
            1 => Self::Mono,
            2 => Self::Stereo,
            _ => Self::Discrete,
        }
    }
}

impl Default for ChannelLayout {
    fn default() -> Self {
        Self::None
    }
}

/// Negotiated description of an audio track.
///
/// The default value is invalid, and is what a demuxer reports before (or after
/// a failed) initialisation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Short name of the codec, e.g. `"mp3"` or `"pcm_s16le"`.
    pub codec: String,
    /// Encoding of individual samples.
    pub sample_format: SampleFormat,
    /// Speaker arrangement.
    pub channel_layout: ChannelLayout,
    /// Number of interleaved channels.
    pub channels: u32,
    /// Samples per second, per channel.
    pub sample_rate: u32,
}

impl AudioConfig {
    /// Returns whether this config describes a playable track.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.channels > 0 && self.sample_rate > 0
    }

    /// Describes the output of decoding a track in this format.
    ///
    /// Streams carry decoded samples, so this is what consumers of a stream should
    /// configure themselves for. It does *not* describe the original bitstream.
    #[must_use]
    pub fn decoded(&self) -> Self {
        Self {
            codec: DECODED_AUDIO_CODEC.to_string(),
            sample_format: SampleFormat::F32,
            channel_layout: self.channel_layout,
            channels: self.channels,
            sample_rate: self.sample_rate,
        }
    }
}

/// Width and height, in pixels.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Size {
    #[allow(missing_docs)]
    pub width: u32,
    #[allow(missing_docs)]
    pub height: u32,
}

impl Size {
    /// Creates a new size.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns whether either dimension is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// A region within a frame, in pixels.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    #[allow(missing_docs)]
    pub x: u32,
    #[allow(missing_docs)]
    pub y: u32,
    #[allow(missing_docs)]
    pub size: Size,
}

/// Clockwise rotation to apply to decoded frames before display.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Rotation {
    #[allow(missing_docs)]
    Rotate0,
    #[allow(missing_docs)]
    Rotate90,
    #[allow(missing_docs)]
    Rotate180,
    #[allow(missing_docs)]
    Rotate270,
}

impl Default for Rotation {
    fn default() -> Self {
        Self::Rotate0
    }
}

/// Where video frames are decoded.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum DecodeMode {
    /// Frames are decoded on the CPU.
    Software,
    /// Frames are decoded by dedicated hardware, and may be fed via
    /// [`Demuxer::append_video_buffer`].
    ///
    /// [`Demuxer::append_video_buffer`]: crate::demuxer::Demuxer::append_video_buffer
    Hardware,
}

impl Default for DecodeMode {
    fn default() -> Self {
        Self::Software
    }
}

/// Negotiated description of a video track.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoConfig {
    /// Short name of the codec.
    pub codec: String,
    /// Dimensions of the coded frame, including any padding.
    pub coded_size: Size,
    /// Displayable area of the coded frame.
    pub visible_rect: Rect,
    /// Size the frame should be shown at, after aspect ratio correction.
    pub natural_size: Size,
    #[allow(missing_docs)]
    pub rotation: Rotation,
    #[allow(missing_docs)]
    pub decode_mode: DecodeMode,
}

impl VideoConfig {
    /// Returns whether this config describes a playable track.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.coded_size.is_empty() && !self.natural_size.is_empty()
    }

    /// Describes the output of decoding a track in this format.
    #[must_use]
    pub fn decoded(&self) -> Self {
        Self {
            codec: DECODED_VIDEO_CODEC.to_string(),
            ..self.clone()
        }
    }
}

/// Description of either kind of track.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TrackConfig {
    #[allow(missing_docs)]
    Audio(AudioConfig),
    #[allow(missing_docs)]
    Video(VideoConfig),
}

impl TrackConfig {
    /// The kind of track described.
    #[must_use]
    pub fn track_type(&self) -> TrackType {
        match self {
            Self::Audio(_) => TrackType::Audio,
            Self::Video(_) => TrackType::Video,
        }
    }

    /// Describes the output of decoding a track in this format.
    #[must_use]
    pub fn decoded(&self) -> Self {
        match self {
            Self::Audio(a) => Self::Audio(a.decoded()),
            Self::Video(v) => Self::Video(v.decoded()),
        }
    }
}

/// Timing of a container, fixed once it has been initialised.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct TimeInfo {
    /// Presentation time of the first sample.
    pub start_time: Duration,
    /// Total length of the content, if known.
    ///
    /// Live and streamed content will often not report this.
    pub duration: Option<Duration>,
}

/// Everything negotiated by a successful initialisation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Estimated bitrate of the container, in bits per second (`0` if unknown).
    pub bitrate: u32,
    #[allow(missing_docs)]
    pub time: TimeInfo,
    /// Audio track config, invalid if the container has no usable audio track.
    pub audio: AudioConfig,
    /// Video track config, invalid if the container has no usable video track.
    pub video: VideoConfig,
}

/// The kind of result held by a [`DecodedBuffer`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum BufferStatus {
    /// The buffer holds decoded data.
    Ok,
    /// No further data will be produced for this track.
    EndOfStream,
    /// The track's format changed.
    ///
    /// The next buffer uses the enclosed config. Consumers must re-query the
    /// stream's config before handling it.
    ConfigChanged(TrackConfig),
}

/// One unit of decoded output for a single track.
///
/// Audio payloads are interleaved little-endian `f32` samples.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DecodedBuffer {
    #[allow(missing_docs)]
    pub status: BufferStatus,
    /// Presentation time of the first sample or frame.
    pub timestamp: Duration,
    #[allow(missing_docs)]
    pub duration: Duration,
    /// Number of audio frames (or video frames) held.
    pub frames: u64,
    /// Decoded bytes, shared with the pipeline endpoint which produced them.
    pub data: Option<SharedRegion>,
}

impl DecodedBuffer {
    /// Creates a buffer holding decoded data.
    #[must_use]
    pub fn new(data: SharedRegion, timestamp: Duration, duration: Duration, frames: u64) -> Self {
        Self {
            status: BufferStatus::Ok,
            timestamp,
            duration,
            frames,
            data: Some(data),
        }
    }

    /// Creates the sentinel marking the end of a track.
    #[must_use]
    pub fn end_of_stream() -> Self {
        Self {
            status: BufferStatus::EndOfStream,
            timestamp: Duration::ZERO,
            duration: Duration::ZERO,
            frames: 0,
            data: None,
        }
    }

    /// Creates a signal that the following buffers use a new config.
    #[must_use]
    pub fn config_changed(config: TrackConfig) -> Self {
        Self {
            status: BufferStatus::ConfigChanged(config),
            ..Self::end_of_stream()
        }
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn is_end_of_stream(&self) -> bool {
        self.status == BufferStatus::EndOfStream
    }

    /// Returns the decoded bytes, or an empty slice for signal buffers.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        self.data.as_deref().unwrap_or_default()
    }
}

/// A compressed video access unit, submitted through the push-mode decode path.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EncodedUnit {
    #[allow(missing_docs)]
    pub data: SharedRegion,
    /// Presentation time of the unit.
    pub timestamp: Duration,
    /// Whether the unit can be decoded without reference to earlier units.
    pub is_keyframe: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_configs_are_invalid() {
        assert!(!AudioConfig::default().is_valid());
        assert!(!VideoConfig::default().is_valid());
    }

    #[test]
    fn decoded_audio_config_keeps_shape() {
        let source = AudioConfig {
            codec: "mp3".into(),
            sample_format: SampleFormat::S16,
            channel_layout: ChannelLayout::Stereo,
            channels: 2,
            sample_rate: 44_100,
        };

        let decoded = source.decoded();

        assert_eq!(decoded.codec, DECODED_AUDIO_CODEC);
        assert_eq!(decoded.sample_format, SampleFormat::F32);
        assert_eq!(decoded.channels, 2);
        assert_eq!(decoded.sample_rate, 44_100);
    }
}
