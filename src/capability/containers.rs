//! The static table of container types accepted by demuxers.

/// One accepted container type.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ContainerType {
    /// Lower-case `type/subtype` essence, without parameters.
    pub mime: &'static str,
    /// File extension passed to the container parser as a hint.
    pub extension: &'static str,
}

const fn row(mime: &'static str, extension: &'static str) -> ContainerType {
    ContainerType { mime, extension }
}

#[cfg(not(target_os = "android"))]
/// Container types supported on this platform.
pub static SUPPORTED_CONTAINERS: &[ContainerType] = &[
    row("audio/wav", "wav"),
    row("audio/x-wav", "wav"),
    row("audio/wave", "wav"),
    row("audio/vnd.wave", "wav"),
    row("audio/flac", "flac"),
    row("audio/x-flac", "flac"),
    row("audio/ogg", "ogg"),
    row("application/ogg", "ogg"),
    row("audio/mpeg", "mp3"),
    row("audio/mp3", "mp3"),
    row("audio/mp4", "mp4"),
    row("audio/x-m4a", "m4a"),
    row("video/mp4", "mp4"),
    row("audio/aac", "aac"),
    row("audio/aacp", "aac"),
    row("audio/webm", "webm"),
    row("video/webm", "webm"),
    row("audio/x-matroska", "mkv"),
    row("video/x-matroska", "mkv"),
];

#[cfg(target_os = "android")]
/// Container types supported on this platform.
pub static SUPPORTED_CONTAINERS: &[ContainerType] = &[
    row("audio/wav", "wav"),
    row("audio/x-wav", "wav"),
    row("audio/wave", "wav"),
    row("audio/flac", "flac"),
    row("audio/ogg", "ogg"),
    row("application/ogg", "ogg"),
    row("audio/mpeg", "mp3"),
    row("audio/mp4", "mp4"),
    row("audio/x-m4a", "m4a"),
    row("video/mp4", "mp4"),
    row("audio/aac", "aac"),
];

/// Finds the row of `table` matching `mime`.
///
/// Matching ignores ASCII case and any parameters, so `Audio/MPEG; codecs=mp3`
/// matches `audio/mpeg`.
#[must_use]
pub fn lookup(table: &'static [ContainerType], mime: &str) -> Option<&'static ContainerType> {
    let essence = mime.split(';').next().unwrap_or_default().trim();

    table.iter().find(|c| c.mime.eq_ignore_ascii_case(essence))
}
