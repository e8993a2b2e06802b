//! Default Symphonia registries used by the built-in pipeline endpoint.

use once_cell::sync::Lazy;
use symphonia::{
    core::{codecs::CodecRegistry, probe::Probe},
    default::*,
};

/// Default Symphonia [`CodecRegistry`], including every codec enabled for this build.
pub static CODEC_REGISTRY: Lazy<CodecRegistry> = Lazy::new(|| {
    let mut registry = CodecRegistry::new();
    register_enabled_codecs(&mut registry);
    registry
});

/// Default Symphonia [`Probe`], including every container format enabled for this build.
pub static PROBE: Lazy<Probe> = Lazy::new(|| {
    let mut probe = Probe::default();
    register_enabled_formats(&mut probe);
    probe
});
