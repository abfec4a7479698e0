//! Algorithm-agnostic key export types.

/// Key material for import/export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyExport {
    /// Raw seed bytes.
    Extractable(Vec<u8>),
}

impl From<&[u8; 32]> for KeyExport {
    fn from(seed: &[u8; 32]) -> Self {
        KeyExport::Extractable(seed.to_vec())
    }
}

impl From<Vec<u8>> for KeyExport {
    fn from(seed: Vec<u8>) -> Self {
        KeyExport::Extractable(seed)
    }
}

impl KeyExport {
    /// The exported bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            KeyExport::Extractable(bytes) => bytes,
        }
    }
}
