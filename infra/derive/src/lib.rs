#![allow(unreachable_pub)]
#![allow(clippy::needless_pass_by_value)]

//! # Macros
//!
//! Procedural macros for the keystone infrastructure crates.
//!
//! ## Usage
//! Depend on the crate through the workspace:
//! ```toml
//! [dependencies]
//! keystone-derive.workspace = true
//! thiserror.workspace = true
//! ```
//!
//! Examples are `ignore`d to avoid compiling in this crate; the UI tests under
//! `tests/ui` exercise the real expansion.

mod macros;

use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

/// Attribute macro for defining crate-level error enums.
///
/// Turns a plain enum into a `thiserror` error with context support, conversions
/// from upstream errors and a stable machine-readable kind for structured logs.
///
/// # Features
///
/// * **Automatic Derives**: Injects `#[derive(Debug, thiserror::Error)]` unless already present.
/// * **Type Aliasing**: Emits `Result<T, E = ErrorName>` in the same module.
/// * **Context Support**: Generates a companion `...Ext` trait that adds `.context()`
///   to any `Result` that can be converted into this error type.
/// * **Standard Conversions**: Implements `From<T>` for variants containing a `source` field,
///   enabling the use of the `?` operator for upstream errors.
/// * **Internal Fallback**: Provides `From<&'static str>` and `From<String>` when an
///   `Internal` variant is present.
/// * **Kinds**: `ErrorName::kind()` returns the snake-cased variant name
///   (`KeyNotFound` becomes `"key_not_found"`), suitable as a `tracing` field.
///
/// # Requirements
///
/// 1. The macro must be applied to an **enum**.
/// 2. Variants that support context must include a `context: Option<Cow<'static, str>>` field.
/// 3. Variants wrapping external errors must include a `source: T` field or a field marked
///    with `#[source]`/`#[from]`, and must also carry a context field.
/// 4. Tuple or unit variants are rejected.
///
/// # Example
///
/// ```rust,ignore
/// use keystone_derive::keystone_error;
/// use std::borrow::Cow;
///
/// #[keystone_error]
/// pub enum StoreError {
///     #[error("IO error{}: {source}", format_context(.context))]
///     Io { source: std::io::Error, context: Option<Cow<'static, str>> },
///
///     #[error("Internal fault{}: {message}", format_context(.context))]
///     Internal { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
/// }
///
/// fn read_key(path: &std::path::Path) -> Result<Vec<u8>> {
///     let bytes = std::fs::read(path).context("Reading master key")?;
///     if bytes.is_empty() {
///         return Err("empty key file".into());
///     }
///     Ok(bytes)
/// }
/// ```
#[proc_macro_attribute]
pub fn keystone_error(_args: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as DeriveInput);
    macros::error::expand_derive(input).into()
}
