use crate::error::VaultError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// --- Sizes ---

/// Length of every key held by the engine (AES-256).
pub const KEY_LEN: usize = 32;

/// Length of master and derived key salts.
pub const SALT_LEN: usize = 32;

/// Random key material drawn before stretching the master key.
pub(crate) const MASTER_SEED_LEN: usize = 64;

/// AES-GCM nonce length used by encrypted packages.
pub const IV_LEN: usize = 16;

/// AES-GCM authentication tag length.
pub const TAG_LEN: usize = 16;

/// Superseded records retained per purpose.
pub const HISTORY_CAPACITY: usize = 5;

/// PBKDF2 rounds used when nothing else is configured.
pub const DEFAULT_ITERATIONS: u32 = 100_000;

// --- Identifiers ---

/// Cipher identifier written into every package.
pub const CIPHER_ALGORITHM: &str = "aes-256-gcm";

/// Key-stretching identifier written into the master key file.
pub const KDF_ALGORITHM: &str = "pbkdf2-sha256";

/// Current master key file format.
pub const MASTER_KEY_VERSION: u32 = 1;

/// The fixed set of purposes a subkey can be derived for.
///
/// The purpose string is bound into both the derivation salt and the AEAD
/// associated data, so a package sealed for one purpose never opens under another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyPurpose {
    Application,
    #[default]
    Data,
    Session,
    Storage,
}

impl KeyPurpose {
    /// Every purpose, in rotation order.
    pub const ALL: [Self; 4] = [Self::Application, Self::Data, Self::Session, Self::Storage];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Application => "application",
            Self::Data => "data",
            Self::Session => "session",
            Self::Storage => "storage",
        }
    }
}

impl fmt::Display for KeyPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyPurpose {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| VaultError::key_not_found(format!("unknown key type '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purposes_parse_from_their_names() {
        for purpose in KeyPurpose::ALL {
            assert_eq!(purpose.as_str().parse::<KeyPurpose>().unwrap(), purpose);
        }
    }

    #[test]
    fn unknown_purpose_is_key_not_found() {
        let err = "ledger".parse::<KeyPurpose>().unwrap_err();
        assert!(matches!(err, VaultError::KeyNotFound { .. }));
    }

    #[test]
    fn default_purpose_is_data() {
        assert_eq!(KeyPurpose::default(), KeyPurpose::Data);
    }
}
