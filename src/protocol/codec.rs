//! Conversion between typed messages and wire values.
//!
//! Encoding is driven by the serde attributes on the message types:
//! `Option` fields that are `None` are dropped, nested values, sequences and
//! maps are encoded recursively, and fields whose wire name is a Rust
//! keyword (`type`) are declared under another identifier and renamed on
//! the way out.
//!
//! Decoding is strict. A wire value that does not fit the requested shape
//! is reported as [`Error::Decode`] naming the target type.

// ============================================================================
// Imports
// ============================================================================

use std::any::type_name;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};

// ============================================================================
// Codec
// ============================================================================

/// Encodes a typed value into its wire representation.
///
/// # Errors
///
/// Returns [`Error::Json`] if the value cannot be represented as JSON
/// (e.g. a map with non-string keys).
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Decodes a wire value into a known target shape.
///
/// # Errors
///
/// Returns [`Error::Decode`] if the value does not match `T`.
pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::decode(short_type_name::<T>(), e))
}

/// Last path segment of `T`'s type name, for error messages.
fn short_type_name<T>() -> &'static str {
    let full = type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

// ============================================================================
// Tests
// ============================================================================
