#![allow(missing_docs)]
//! Generated fixtures and a scriptable backend, for tests and benchmarks.

use crate::{
    capability::CapabilityProvider,
    config::Config,
    context::ExecutionContext,
    media::*,
    pipeline::{
        backend::{Backend, BackendError, BackendFactory, ProbeHint, VideoCodec},
        LocalSessionCreator,
    },
};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use flume::{Receiver, Sender};
use std::{f32::consts::PI, io::Read, sync::Arc, time::Duration};
use symphonia_core::io::MediaSource;

/// Mime type under which synthetic content should be declared.
pub const SYNTHETIC_MIME: &str = "video/webm";

const SYNTHETIC_MAGIC: &[u8; 4] = b"SYNT";
const SYNTHETIC_RATE: u32 = 48_000;
const SYNTHETIC_CHANNELS: u32 = 2;

/// Creates `frames` frames of a 440Hz sine at `rate`, interleaved over `channels`.
#[must_use]
pub fn make_sine(frames: usize, channels: usize, rate: u32) -> Vec<f32> {
    let mut out = Vec::with_capacity(frames * channels);
    for i in 0..frames {
        let sample = (i as f32 * 440.0 * 2.0 * PI / rate as f32).sin() * 0.5;
        for _ in 0..channels {
            out.push(sample);
        }
    }
    out
}

/// Creates a 16-bit PCM WAV file holding `frames` frames of sine.
#[must_use]
pub fn make_wav(channels: u16, rate: u32, frames: u32) -> Vec<u8> {
    let samples = make_sine(frames as usize, channels as usize, rate);
    let block_align = channels * 2;
    let data_len = frames * u32::from(block_align);

    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.write_u32::<LittleEndian>(36 + data_len).unwrap();
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.write_u32::<LittleEndian>(16).unwrap();
    out.write_u16::<LittleEndian>(1).unwrap();
    out.write_u16::<LittleEndian>(channels).unwrap();
    out.write_u32::<LittleEndian>(rate).unwrap();
    out.write_u32::<LittleEndian>(rate * u32::from(block_align))
        .unwrap();
    out.write_u16::<LittleEndian>(block_align).unwrap();
    out.write_u16::<LittleEndian>(16).unwrap();

    out.extend_from_slice(b"data");
    out.write_u32::<LittleEndian>(data_len).unwrap();
    for s in samples {
        out.write_i16::<LittleEndian>((s * f32::from(i16::MAX)) as i16)
            .unwrap();
    }

    out
}

/// Shape of a synthetic container.
#[derive(Clone, Debug)]
pub struct SyntheticLayout {
    pub audio_buffers: u32,
    pub video_frames: u32,
    pub frames_per_buffer: u32,
    /// Index of the first audio buffer to be decoded in mono.
    pub change_config_at: Option<u32>,
    /// Index of an audio buffer which fails to decode.
    pub fail_read_at: Option<u32>,
    /// Index of an audio buffer whose decode kills the endpoint thread.
    pub panic_at: Option<u32>,
    /// Whether the container declares an audio track at all.
    pub audio: bool,
}

impl Default for SyntheticLayout {
    fn default() -> Self {
        Self {
            audio_buffers: 8,
            video_frames: 4,
            frames_per_buffer: 480,
            change_config_at: None,
            fail_read_at: None,
            panic_at: None,
            audio: true,
        }
    }
}

impl SyntheticLayout {
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(
            f64::from(self.audio_buffers * self.frames_per_buffer) / f64::from(SYNTHETIC_RATE),
        )
    }
}

/// Encodes a synthetic container, readable only by [`SyntheticBackend`].
#[must_use]
pub fn make_synthetic(layout: &SyntheticLayout) -> Vec<u8> {
    let mut out = SYNTHETIC_MAGIC.to_vec();
    for field in [
        layout.audio_buffers,
        layout.video_frames,
        layout.frames_per_buffer,
        layout.change_config_at.unwrap_or(u32::MAX),
        layout.fail_read_at.unwrap_or(u32::MAX),
        layout.panic_at.unwrap_or(u32::MAX),
        u32::from(layout.audio),
    ] {
        out.write_u32::<LittleEndian>(field).unwrap();
    }
    out
}

/// Builds [`SyntheticBackend`]s, optionally holding each audio read until released.
#[derive(Clone, Default)]
pub struct SyntheticFactory {
    gate: Option<Receiver<()>>,
}

impl SyntheticFactory {
    /// Each audio read blocks until a message is sent on the returned sender, or
    /// the sender is dropped.
    #[must_use]
    pub fn gated() -> (Sender<()>, Self) {
        let (tx, rx) = flume::unbounded();
        (tx, Self { gate: Some(rx) })
    }
}

impl BackendFactory for SyntheticFactory {
    fn make_backend(&self, _config: &Config) -> Box<dyn Backend> {
        Box::new(SyntheticBackend {
            gate: self.gate.clone(),
            layout: None,
            audio_pos: 0,
            video_pos: 0,
            stash: None,
            codec: PassthroughCodec,
        })
    }
}

/// A backend with an optional stereo audio track and a video track, whose
/// content is entirely determined by a small header.
pub struct SyntheticBackend {
    gate: Option<Receiver<()>>,
    layout: Option<SyntheticLayout>,
    audio_pos: u32,
    video_pos: u32,
    stash: Option<DecodedBuffer>,
    codec: PassthroughCodec,
}

/// Returns the samples [`SyntheticBackend`] produces for one audio buffer.
#[must_use]
pub fn synthetic_samples(index: u32, frames: u32, channels: u32) -> Vec<f32> {
    (0..frames * channels)
        .map(|i| (index * 1_000 + i) as f32 / 1_000_000.0)
        .collect()
}

impl SyntheticBackend {
    fn audio_config(channels: u32) -> AudioConfig {
        AudioConfig {
            codec: "synthetic".into(),
            sample_format: SampleFormat::F32,
            channel_layout: ChannelLayout::from_count(channels),
            channels,
            sample_rate: SYNTHETIC_RATE,
        }
    }

    fn buffer_duration(frames: u32) -> Duration {
        Duration::from_secs_f64(f64::from(frames) / f64::from(SYNTHETIC_RATE))
    }
}

impl Backend for SyntheticBackend {
    fn initialize(
        &mut self,
        mut source: Box<dyn MediaSource>,
        _hint: &ProbeHint,
    ) -> Result<MediaInfo, BackendError> {
        let mut magic = [0u8; 4];
        source
            .read_exact(&mut magic)
            .map_err(|e| BackendError::Io(Arc::new(e)))?;
        if &magic != SYNTHETIC_MAGIC {
            return Err(BackendError::Unsupported("not a synthetic container".into()));
        }

        let mut fields = [0u32; 7];
        for field in &mut fields {
            *field = source
                .read_u32::<LittleEndian>()
                .map_err(|e| BackendError::Io(Arc::new(e)))?;
        }
        let optional = |v: u32| (v != u32::MAX).then_some(v);

        let layout = SyntheticLayout {
            audio_buffers: fields[0],
            video_frames: fields[1],
            frames_per_buffer: fields[2],
            change_config_at: optional(fields[3]),
            fail_read_at: optional(fields[4]),
            panic_at: optional(fields[5]),
            audio: fields[6] != 0,
        };

        let size = Size::new(64, 48);
        let info = MediaInfo {
            bitrate: 0,
            time: TimeInfo {
                start_time: Duration::ZERO,
                duration: Some(layout.duration()),
            },
            audio: if layout.audio {
                Self::audio_config(SYNTHETIC_CHANNELS)
            } else {
                AudioConfig::default()
            },
            video: VideoConfig {
                codec: "synthetic".into(),
                coded_size: size,
                visible_rect: Rect {
                    x: 0,
                    y: 0,
                    size,
                },
                natural_size: size,
                rotation: Rotation::Rotate0,
                decode_mode: DecodeMode::Hardware,
            },
        };

        self.layout = Some(layout);
        self.audio_pos = 0;
        self.video_pos = 0;
        self.stash = None;

        Ok(info)
    }

    fn seek(&mut self, time: Duration) -> Result<(), BackendError> {
        let layout = self.layout.as_ref().ok_or(BackendError::NotInitialized)?;
        if time > layout.duration() {
            return Err(BackendError::Seek("past end".into()));
        }

        let buffer_len = Self::buffer_duration(layout.frames_per_buffer);
        self.audio_pos = (time.as_secs_f64() / buffer_len.as_secs_f64()) as u32;
        self.video_pos = 0;
        self.stash = None;

        Ok(())
    }

    fn read(&mut self, track: TrackType) -> Result<DecodedBuffer, BackendError> {
        let layout = self.layout.clone().ok_or(BackendError::NotInitialized)?;

        match track {
            TrackType::Audio => {
                if let Some(gate) = &self.gate {
                    drop(gate.recv());
                }

                if let Some(buffer) = self.stash.take() {
                    return Ok(buffer);
                }

                let index = self.audio_pos;
                if !layout.audio || index >= layout.audio_buffers {
                    return Ok(DecodedBuffer::end_of_stream());
                }
                self.audio_pos += 1;

                assert!(layout.panic_at != Some(index), "endpoint crashed at buffer {index}");

                if layout.fail_read_at == Some(index) {
                    return Err(BackendError::Decode(format!("buffer {index} is corrupt")));
                }

                let mono = layout.change_config_at.map_or(false, |at| index >= at);
                let channels = if mono { 1 } else { SYNTHETIC_CHANNELS };

                let samples = synthetic_samples(index, layout.frames_per_buffer, channels);
                let mut bytes = vec![0u8; samples.len() * 4];
                LittleEndian::write_f32_into(&samples, &mut bytes);

                let buffer_len = Self::buffer_duration(layout.frames_per_buffer);
                let buffer = DecodedBuffer::new(
                    bytes.into(),
                    buffer_len * index,
                    buffer_len,
                    u64::from(layout.frames_per_buffer),
                );

                if layout.change_config_at == Some(index) {
                    self.stash = Some(buffer);
                    return Ok(DecodedBuffer::config_changed(TrackConfig::Audio(
                        Self::audio_config(1),
                    )));
                }

                Ok(buffer)
            },
            TrackType::Video => {
                let index = self.video_pos;
                if index >= layout.video_frames {
                    return Ok(DecodedBuffer::end_of_stream());
                }
                self.video_pos += 1;

                let frame_len = Duration::from_millis(33);
                Ok(DecodedBuffer::new(
                    vec![index as u8; 16].into(),
                    frame_len * index,
                    frame_len,
                    1,
                ))
            },
        }
    }

    fn video_codec(&mut self) -> Option<&mut dyn VideoCodec> {
        Some(&mut self.codec)
    }

    fn reset(&mut self) {
        self.layout = None;
        self.stash = None;
    }
}

/// A video codec which returns each unit's bytes as its decoded frame.
pub struct PassthroughCodec;

impl VideoCodec for PassthroughCodec {
    fn decode(&mut self, unit: &EncodedUnit) -> Result<DecodedBuffer, BackendError> {
        Ok(DecodedBuffer::new(
            unit.data.clone(),
            unit.timestamp,
            Duration::from_millis(33),
            1,
        ))
    }
}

/// A provider with fresh contexts, whose sessions decode with Symphonia.
#[must_use]
pub fn symphonia_provider() -> CapabilityProvider {
    CapabilityProvider::with_default_creator(Config::default()).unwrap()
}

/// A provider with fresh contexts, whose sessions use synthetic backends.
#[must_use]
pub fn synthetic_provider(factory: SyntheticFactory, config: Config) -> CapabilityProvider {
    CapabilityProvider::new(
        Arc::new(LocalSessionCreator::with_backend(config, factory)),
        ExecutionContext::new("test-owner").unwrap(),
        ExecutionContext::new("test-pipeline").unwrap(),
    )
}
