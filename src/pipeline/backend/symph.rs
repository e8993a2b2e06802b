use super::{Backend, BackendError, BackendFactory, ProbeHint};
use crate::{
    config::Config,
    constants::DECODED_SAMPLE_BYTES,
    media::*,
};
use byteorder::{ByteOrder, LittleEndian};
use std::{io::ErrorKind as IoErrorKind, time::Duration};
use symphonia_core::{
    audio::SampleBuffer,
    codecs::{CodecRegistry, Decoder, DecoderOptions},
    errors::Error as SymphError,
    formats::{FormatOptions, FormatReader, SeekMode, SeekTo},
    io::{MediaSource, MediaSourceStream, MediaSourceStreamOptions},
    meta::MetadataOptions,
    probe::{Hint, Probe},
    units::{Time, TimeBase},
};
use tracing::{debug, trace};

/// Builds a [`SymphoniaBackend`] from a session's [`Config`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SymphoniaFactory;

impl BackendFactory for SymphoniaFactory {
    fn make_backend(&self, config: &Config) -> Box<dyn Backend> {
        Box::new(SymphoniaBackend::new(
            config.codec_registry,
            config.format_registry,
        ))
    }
}

struct Active {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    time_base: TimeBase,
    config: AudioConfig,
    stash: Option<DecodedBuffer>,
    ended: bool,
}

/// The default backend, which demuxes and decodes audio using Symphonia.
///
/// Audio is decoded to interleaved little-endian `f32`, with encoder delay and
/// padding trimmed where the container describes them. Video tracks are never
/// reported, and push-mode decoding is unsupported.
pub struct SymphoniaBackend {
    codecs: &'static CodecRegistry,
    probe: &'static Probe,
    active: Option<Active>,
}

impl SymphoniaBackend {
    /// Creates a backend which probes and decodes with the given registries.
    #[must_use]
    pub fn new(codecs: &'static CodecRegistry, probe: &'static Probe) -> Self {
        Self {
            codecs,
            probe,
            active: None,
        }
    }

    fn read_audio(&mut self) -> Result<DecodedBuffer, BackendError> {
        let active = self.active.as_mut().ok_or(BackendError::NotInitialized)?;

        if let Some(buffer) = active.stash.take() {
            return Ok(buffer);
        }

        if active.ended {
            return Ok(DecodedBuffer::end_of_stream());
        }

        loop {
            let packet = match active.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphError::IoError(e)) if e.kind() == IoErrorKind::UnexpectedEof => {
                    trace!("Reached end of track {}.", active.track_id);
                    active.ended = true;
                    return Ok(DecodedBuffer::end_of_stream());
                },
                Err(SymphError::ResetRequired) => {
                    active.decoder.reset();
                    continue;
                },
                Err(e) => return Err(e.into()),
            };

            if packet.track_id() != active.track_id {
                continue;
            }

            let decoded = active.decoder.decode(&packet)?;

            let spec = *decoded.spec();
            let frames = decoded.frames();
            if frames == 0 {
                // Fully trimmed (gapless) packets carry nothing.
                continue;
            }

            let mut samples = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            samples.copy_interleaved_ref(decoded);

            let mut bytes = vec![0u8; samples.samples().len() * DECODED_SAMPLE_BYTES];
            LittleEndian::write_f32_into(samples.samples(), &mut bytes);

            let timestamp = time_to_duration(active.time_base.calc_time(packet.ts()));
            let duration = Duration::from_secs_f64(frames as f64 / f64::from(spec.rate.max(1)));
            let buffer = DecodedBuffer::new(bytes.into(), timestamp, duration, frames as u64);

            let channels = spec.channels.count() as u32;
            if channels != active.config.channels || spec.rate != active.config.sample_rate {
                debug!(
                    "Track {} changed format: {}ch@{}Hz -> {}ch@{}Hz.",
                    active.track_id,
                    active.config.channels,
                    active.config.sample_rate,
                    channels,
                    spec.rate
                );
                active.config.channels = channels;
                active.config.sample_rate = spec.rate;
                active.config.channel_layout = ChannelLayout::from_count(channels);
                active.stash = Some(buffer);

                return Ok(DecodedBuffer::config_changed(TrackConfig::Audio(
                    active.config.clone(),
                )));
            }

            return Ok(buffer);
        }
    }
}

impl Backend for SymphoniaBackend {
    fn initialize(
        &mut self,
        source: Box<dyn MediaSource>,
        hint: &ProbeHint,
    ) -> Result<MediaInfo, BackendError> {
        self.active = None;

        let mut symph_hint = Hint::new();
        symph_hint.mime_type(&hint.mime);
        if let Some(ext) = &hint.extension {
            symph_hint.with_extension(ext);
        }

        let mss = MediaSourceStream::new(source, MediaSourceStreamOptions::default());
        let probed = self.probe.format(
            &symph_hint,
            mss,
            &FormatOptions {
                enable_gapless: true,
                ..Default::default()
            },
            &MetadataOptions::default(),
        )?;
        let format = probed.format;

        // Prefer the default track, but fall back to the first decodable one:
        // containers with video often mark that as their default.
        let codecs = self.codecs;
        let (decoder, track_id) = format
            .default_track()
            .and_then(|track| {
                codecs
                    .make(&track.codec_params, &DecoderOptions::default())
                    .ok()
                    .map(|d| (d, track.id))
            })
            .or_else(|| {
                format.tracks().iter().find_map(|track| {
                    codecs
                        .make(&track.codec_params, &DecoderOptions::default())
                        .ok()
                        .map(|d| (d, track.id))
                })
            })
            .ok_or(BackendError::NoTracks)?;

        let params = format
            .tracks()
            .iter()
            .find(|t| t.id == track_id)
            .map_or_else(|| decoder.codec_params().clone(), |t| t.codec_params.clone());

        let channels = params.channels.map_or(0, |c| c.count() as u32);
        let sample_rate = params.sample_rate.unwrap_or(0);
        let time_base = params
            .time_base
            .unwrap_or_else(|| TimeBase::new(1, sample_rate.max(1)));

        let config = AudioConfig {
            codec: codecs
                .get_codec(params.codec)
                .map(|d| d.short_name.to_string())
                .unwrap_or_default(),
            sample_format: params.sample_format.map(Into::into).unwrap_or_default(),
            channel_layout: ChannelLayout::from_count(channels),
            channels,
            sample_rate,
        };

        if !config.is_valid() {
            return Err(BackendError::Unsupported(format!(
                "track {track_id} does not describe its channels and rate"
            )));
        }

        let time = TimeInfo {
            start_time: time_to_duration(time_base.calc_time(params.start_ts)),
            duration: params
                .n_frames
                .map(|n| time_to_duration(time_base.calc_time(n))),
        };

        debug!("Selected track {} ({:?}, {:?}).", track_id, config, time);

        self.active = Some(Active {
            format,
            decoder,
            track_id,
            time_base,
            config: config.clone(),
            stash: None,
            ended: false,
        });

        Ok(MediaInfo {
            bitrate: 0,
            time,
            audio: config,
            video: VideoConfig::default(),
        })
    }

    fn seek(&mut self, time: Duration) -> Result<(), BackendError> {
        let active = self.active.as_mut().ok_or(BackendError::NotInitialized)?;

        active
            .format
            .seek(SeekMode::Accurate, SeekTo::Time {
                time: Time::from(time.as_secs_f64()),
                track_id: Some(active.track_id),
            })
            .map_err(|e| BackendError::Seek(e.to_string()))?;

        active.decoder.reset();
        active.stash = None;
        active.ended = false;

        Ok(())
    }

    fn read(&mut self, track: TrackType) -> Result<DecodedBuffer, BackendError> {
        match track {
            TrackType::Audio => self.read_audio(),
            TrackType::Video => Ok(DecodedBuffer::end_of_stream()),
        }
    }

    fn reset(&mut self) {
        self.active = None;
    }
}

fn time_to_duration(time: Time) -> Duration {
    Duration::from_secs(time.seconds) + Duration::from_secs_f64(time.frac)
}
