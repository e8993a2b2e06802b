use demuxbridge::{
    capability,
    error::{CapabilityError, DecodeError, DemuxerError},
    source::MemorySource,
    test_utils::{make_wav, symphonia_provider},
    Config,
    Demuxer,
    SyncAudioDecoder,
};
use std::sync::Arc;

#[test]
#[ntest::timeout(10_000)]
fn provider_installs_exactly_once() {
    capability::preinitialize_default(Config::default()).unwrap();
    let first = capability::get().unwrap().pipeline().name().to_string();

    assert!(matches!(
        capability::preinitialize_default(Config::default()),
        Err(CapabilityError::AlreadyInitialized)
    ));
    assert_eq!(capability::get().unwrap().pipeline().name(), first);
}

#[test]
#[ntest::timeout(10_000)]
fn forced_unavailability_blocks_pipeline_objects() {
    let provider = symphonia_provider();
    let wav = make_wav(1, 8_000, 800);

    capability::force_unavailable_for_testing(true);
    assert!(!capability::is_available());
    assert!(!provider.is_available());
    assert!(matches!(
        provider.create_session(),
        Err(CapabilityError::Unavailable)
    ));

    let source = Arc::new(MemorySource::from_bytes(wav.clone()));
    let demuxer = Demuxer::new(&provider, source, "audio/wav", Config::default());
    assert_eq!(demuxer.unwrap_err(), DemuxerError::Unavailable);

    let decoder = SyncAudioDecoder::from_bytes(&provider, wav.clone(), "audio/wav");
    assert_eq!(
        decoder.unwrap_err(),
        DecodeError::Initialize(DemuxerError::Unavailable)
    );

    // Type support is a static lookup, unaffected by the override.
    assert!(Demuxer::can_play_type("audio/wav"));

    capability::force_unavailable_for_testing(false);
    let mut decoder = SyncAudioDecoder::from_bytes(&provider, wav, "audio/wav").unwrap();
    decoder.initialize().unwrap();
    assert_eq!(decoder.read(&mut vec![]).unwrap(), 800);
}
