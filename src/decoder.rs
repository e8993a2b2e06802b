//! A blocking decoder for one-shot audio decodes.
//!
//! [`SyncAudioDecoder`] drives a [`Demuxer`] from a thread which is allowed to
//! block, such as a worker thread serving a "decode this whole file" request.
//! Each blocking call waits on a one-shot channel which the pipeline context is
//! guaranteed to resolve, so no call can hang once the pipeline has stopped.

use crate::{
    capability::CapabilityProvider,
    config::Config,
    demuxer::{Demuxer, DemuxerStream},
    error::{DecodeError, DemuxerError},
    media::*,
    source::{DataSource, MemorySource},
};
use byteorder::{ByteOrder, LittleEndian};
use std::{sync::Arc, time::Duration};
use tracing::{debug, instrument, warn};

/// Interleaved `f32` samples decoded from one buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioPacket {
    /// Samples, interleaved over `channels`.
    pub samples: Vec<f32>,
    #[allow(missing_docs)]
    pub channels: u32,
    /// Media time of the first frame.
    pub timestamp: Duration,
}

impl AudioPacket {
    /// Number of whole frames held.
    #[must_use]
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }
}

/// Blocking façade over the demuxing pipeline, for audio tracks only.
///
/// None of these methods may be called from the provider's pipeline context,
/// where they would wait on themselves: they fail with
/// [`DecodeError::WrongContext`] instead.
#[derive(Debug)]
pub struct SyncAudioDecoder {
    provider: CapabilityProvider,
    demuxer: Demuxer,
    stream: Option<DemuxerStream>,
    config: AudioConfig,
    duration: Option<Duration>,
}

impl SyncAudioDecoder {
    /// Creates a decoder for content of type `mime`, read from `data_source`.
    pub fn new(
        provider: &CapabilityProvider,
        data_source: Arc<dyn DataSource>,
        mime: &str,
    ) -> Result<Self, DecodeError> {
        Self::with_config(provider, data_source, mime, Config::default())
    }

    /// Creates a decoder with a custom pipeline configuration.
    pub fn with_config(
        provider: &CapabilityProvider,
        data_source: Arc<dyn DataSource>,
        mime: &str,
        config: Config,
    ) -> Result<Self, DecodeError> {
        let demuxer = Demuxer::new(provider, data_source, mime, config)?;

        Ok(Self {
            provider: provider.clone(),
            demuxer,
            stream: None,
            config: AudioConfig::default(),
            duration: None,
        })
    }

    /// Creates a decoder over an in-memory file.
    pub fn from_bytes(
        provider: &CapabilityProvider,
        bytes: impl Into<Vec<u8>>,
        mime: &str,
    ) -> Result<Self, DecodeError> {
        Self::new(provider, Arc::new(MemorySource::from_bytes(bytes)), mime)
    }

    /// Opens a session and probes the content, blocking until done.
    ///
    /// Fails if the content is corrupt, its type is unsupported, or it holds no
    /// audio track.
    #[instrument(skip(self))]
    pub fn initialize(&mut self) -> Result<(), DecodeError> {
        self.check_context()?;

        wait(|| Err(DemuxerError::Aborted), |cb| {
            self.demuxer.initialize(Arc::new(()), cb);
        })?;

        let stream = self
            .demuxer
            .get_stream(TrackType::Audio)
            .ok_or(DecodeError::NoAudioTrack)?;

        self.config = stream.audio_decoder_config().unwrap_or_default();
        self.duration = self.demuxer.time_info().and_then(|t| t.duration);
        self.stream = Some(stream);

        debug!(
            "Decoder ready: {} channel(s) at {}Hz.",
            self.config.channels, self.config.sample_rate
        );

        Ok(())
    }

    /// Channel count of the decoded audio, or zero before initialisation.
    #[must_use]
    pub fn channels(&self) -> u32 {
        self.config.channels
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    /// Length of the content, if the container reports it.
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    /// Frame count implied by the duration and sample rate.
    ///
    /// Decoders may trim padding from either end of the stream, so [`read`]
    /// can produce fewer frames than this. Size buffers by what `read` returns.
    ///
    /// [`read`]: SyncAudioDecoder::read
    #[must_use]
    pub fn estimated_frames(&self) -> Option<u64> {
        self.duration
            .map(|d| (d.as_secs_f64() * f64::from(self.config.sample_rate)).round() as u64)
    }

    /// Decodes every remaining buffer into `packets`, blocking until done.
    ///
    /// Returns the number of frames appended. Decoding stops at the end of the
    /// stream, or at the first buffer which fails to decode: the frames decoded
    /// before that point are kept.
    pub fn read(&mut self, packets: &mut Vec<AudioPacket>) -> Result<usize, DecodeError> {
        self.check_context()?;
        let stream = self.stream.clone().ok_or(DecodeError::NotInitialized)?;

        let mut frames = 0;
        loop {
            let buffer = match wait(
                || Ok(DecodedBuffer::end_of_stream()),
                |cb| stream.read(cb),
            ) {
                Ok(buffer) => buffer,
                Err(e) => {
                    warn!("Decode stopped early after {} frames: {}.", frames, e);
                    break;
                },
            };

            match &buffer.status {
                BufferStatus::EndOfStream => break,
                BufferStatus::ConfigChanged(_) => {
                    if let Some(config) = stream.audio_decoder_config() {
                        debug!("Decoded format now {} channel(s).", config.channels);
                        self.config = config;
                    }
                    continue;
                },
                BufferStatus::Ok => {},
            }

            let bytes = buffer.bytes();
            let mut samples = vec![0.0; bytes.len() / 4];
            LittleEndian::read_f32_into(&bytes[..samples.len() * 4], &mut samples);

            let packet = AudioPacket {
                samples,
                channels: self.config.channels,
                timestamp: buffer.timestamp,
            };
            frames += packet.frames();
            packets.push(packet);
        }

        Ok(frames)
    }

    /// Decodes every remaining buffer, copying as many whole frames as fit into
    /// `dest`.
    ///
    /// Returns the number of frames written, which never exceeds the capacity of
    /// `dest`. Frames which do not fit are discarded.
    pub fn read_into(&mut self, dest: &mut [f32]) -> Result<usize, DecodeError> {
        let mut packets = vec![];
        self.read(&mut packets)?;

        let mut written = 0;
        let mut frames = 0;
        for packet in &packets {
            let channels = packet.channels.max(1) as usize;
            let fit = ((dest.len() - written) / channels).min(packet.frames());
            let len = fit * channels;

            dest[written..written + len].copy_from_slice(&packet.samples[..len]);
            written += len;
            frames += fit;

            if fit < packet.frames() {
                break;
            }
        }

        Ok(frames)
    }

    fn check_context(&self) -> Result<(), DecodeError> {
        if self.provider.pipeline().runs_tasks_on_current_thread() {
            return Err(DecodeError::WrongContext);
        }

        Ok(())
    }
}

impl Drop for SyncAudioDecoder {
    fn drop(&mut self) {
        // On the pipeline context the handle's own drop stops the demuxer, but
        // cannot be waited on.
        if self.check_context().is_err() {
            return;
        }

        // No callback may run once this returns.
        wait(|| (), |cb| self.demuxer.stop_with(cb));
    }
}

/// Issues a callback-taking call, then blocks until the callback has run.
fn wait<T, F>(fallback: fn() -> T, issue: F) -> T
where
    T: Send + 'static,
    F: FnOnce(Box<dyn FnOnce(T) + Send>),
{
    let (tx, rx) = flume::bounded(1);
    issue(Box::new(move |val| drop(tx.send(val))));

    rx.recv().unwrap_or_else(|_| fallback())
}
