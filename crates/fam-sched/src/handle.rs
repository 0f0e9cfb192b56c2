//! 256-bit capability handles

use crate::rng::CsRng;
use std::fmt;

/// Unguessable task or channel identifier.
///
/// Knowing a handle is what grants the right to message or wait on the task
/// behind it, so handles are drawn from the scheduler's CSPRNG and never
/// derived from counters.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Handle([u8; Handle::LEN]);

impl Handle {
    /// Handle size in bytes
    pub const LEN: usize = 32;

    /// Byte offset of the word that selects the registry bucket
    const BUCKET_OFFSET: usize = 28;

    /// Draw a fresh handle
    pub fn generate(rng: &mut CsRng) -> Self {
        let mut bytes = [0u8; Self::LEN];
        rng.fill(&mut bytes);
        Self(bytes)
    }

    /// Wrap raw bytes
    pub const fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }

    /// Bucket index in a table of `capacity` buckets.
    ///
    /// Reads the little-endian `u32` at byte 28.
    pub fn bucket(&self, capacity: usize) -> usize {
        let b = &self.0[Self::BUCKET_OFFSET..];
        let word = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
        word as usize % capacity
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..4] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self)
    }
}
