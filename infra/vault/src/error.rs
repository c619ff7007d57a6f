//! # Vault Errors
//!
//! This module defines the [`VaultError`] enum and [`Result`] type used throughout
//! the engine for reporting lifecycle, integrity, cryptographic and key-store failures.
//!
//! [`VaultError::Integrity`] and [`VaultError::Authentication`] are deliberately distinct:
//! the first is a checksum mismatch (accidental corruption), the second an AEAD tag
//! mismatch (cryptographic tamper).

use std::borrow::Cow;

/// A specialized [`VaultError`] enum for engine failures.
#[keystone_derive::keystone_error]
pub enum VaultError {
    /// An operation was attempted before the engine reached the ready state.
    #[error("Engine not initialized{}: {message}", format_context(.context))]
    NotInitialized { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The requested key purpose is unknown or not loaded.
    #[error("Key not found{}: {message}", format_context(.context))]
    KeyNotFound { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// A checksum did not match the bytes it describes.
    #[error("Integrity check failed{}: {message}", format_context(.context))]
    Integrity { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The AEAD authentication tag did not verify.
    #[error("Authentication failed{}: {message}", format_context(.context))]
    Authentication { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Filesystem failure inside the key store.
    #[error("Key store IO error{}: {source}", format_context(.context))]
    KeyStoreIo { source: std::io::Error, context: Option<Cow<'static, str>> },

    /// The encrypted package is malformed.
    #[error("Invalid package{}: {message}", format_context(.context))]
    InvalidPackage { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Base64 decoding failed.
    #[error("Encoding error{}: {source}", format_context(.context))]
    Encoding { source: base64::DecodeError, context: Option<Cow<'static, str>> },

    /// Decrypted bytes were requested as text but are not UTF-8.
    #[error("UTF-8 error{}: {source}", format_context(.context))]
    Utf8 { source: std::string::FromUtf8Error, context: Option<Cow<'static, str>> },

    /// JSON serialization or deserialization failed.
    #[error("Serialization error{}: {source}", format_context(.context))]
    Serialization { source: serde_json::Error, context: Option<Cow<'static, str>> },

    /// Failure while sealing data.
    #[error("Encryption error{}: {message}", format_context(.context))]
    Encryption { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The system random number generator is unavailable.
    #[error("Random source error{}: {source}", format_context(.context))]
    Random { source: getrandom::Error, context: Option<Cow<'static, str>> },

    /// A hash or MAC algorithm name was not recognized.
    #[error("Unsupported algorithm{}: {message}", format_context(.context))]
    UnsupportedAlgorithm { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The engine or its builder is incorrectly configured.
    #[error("Invalid configuration{}: {message}", format_context(.context))]
    InvalidConfiguration { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Loading layered configuration failed.
    #[error("Config error{}: {source}", format_context(.context))]
    Config { source: config::ConfigError, context: Option<Cow<'static, str>> },

    /// A background job was cancelled, panicked or the worker pool is closed.
    #[error("Worker error{}: {message}", format_context(.context))]
    Worker { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Internal fallback for unexpected issues or logic errors.
    #[error("Internal vault error{}: {message}", format_context(.context))]
    Internal { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}

impl VaultError {
    pub(crate) fn not_initialized(state: impl std::fmt::Display) -> Self {
        Self::NotInitialized { message: format!("engine is {state}").into(), context: None }
    }

    pub(crate) fn key_not_found(purpose: impl Into<Cow<'static, str>>) -> Self {
        Self::KeyNotFound { message: purpose.into(), context: None }
    }

    pub(crate) fn integrity(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Integrity { message: message.into(), context: None }
    }

    pub(crate) fn invalid_package(message: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidPackage { message: message.into(), context: None }
    }

    pub(crate) fn invalid_config(message: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidConfiguration { message: message.into(), context: None }
    }

    pub(crate) fn worker(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Worker { message: message.into(), context: None }
    }
}
