use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    ops::Deref,
    sync::Arc,
};

/// An immutable byte region shared between the host and a pipeline endpoint.
///
/// Regions are allocated per request, sized exactly to their payload, and are the
/// only memory which crosses the boundary between the two sides. Cloning a region
/// shares it; the memory is released when the last holder drops it.
#[derive(Clone, Eq, PartialEq)]
pub struct SharedRegion {
    bytes: Arc<[u8]>,
}

impl SharedRegion {
    /// Returns the number of bytes in this region.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns the number of live handles to this region.
    #[must_use]
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.bytes)
    }
}

impl Deref for SharedRegion {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl AsRef<[u8]> for SharedRegion {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<Vec<u8>> for SharedRegion {
    fn from(val: Vec<u8>) -> Self {
        Self { bytes: val.into() }
    }
}

impl From<&[u8]> for SharedRegion {
    fn from(val: &[u8]) -> Self {
        Self { bytes: val.into() }
    }
}

impl Debug for SharedRegion {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "SharedRegion({} bytes)", self.bytes.len())
    }
}

impl Serialize for SharedRegion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.bytes)
    }
}

impl<'de> Deserialize<'de> for SharedRegion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<u8>::deserialize(deserializer).map(Self::from)
    }
}
