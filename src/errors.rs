//! Error Types
//!
//! This module defines the error types used throughout the engine.
//!
//! # Overview
//!
//! The main error type [`KilnError`] covers all failure modes including:
//! - GPU resource creation and submission failures
//! - Shader reflection and descriptor-schema mismatches
//! - Asset loading and decoding errors
//! - Background-loader errors
//!
//! # Usage
//!
//! All public APIs return [`Result<T>`] which is an alias for
//! `std::result::Result<T, KilnError>`.

use std::sync::Arc;

use thiserror::Error;

/// The main error type for the Kiln engine.
///
/// Each variant provides specific context about what went wrong. Programming
/// errors (invalid arguments, missing bindings, schema conflicts) are never
/// retried by the engine; device and filesystem errors propagate to the
/// caller unchanged.
#[derive(Error, Debug)]
pub enum KilnError {
    // ========================================================================
    // Usage Errors
    // ========================================================================
    /// A service was used before it was initialized.
    #[error("Not initialized: {0}")]
    NotInitialized(&'static str),

    /// An argument was rejected (zero size, empty path, unknown name, ...).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A named binding or cached resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An offset/size pair exceeds the bounds of a buffer.
    #[error("Out of range: {context} (offset {offset} + size {size} > capacity {capacity})")]
    OutOfRange {
        /// Description of the rejected operation
        context: String,
        /// Requested destination offset in bytes
        offset: u64,
        /// Requested size in bytes
        size: u64,
        /// Capacity of the target buffer in bytes
        capacity: u64,
    },

    // ========================================================================
    // Shader & Descriptor Errors
    // ========================================================================
    /// Structural mismatch on schema re-registration, or a descriptor-count
    /// mismatch between shader stages during reflection merge.
    #[error("Incompatible schema: {0}")]
    IncompatibleSchema(String),

    /// Shader bytecode could not be reflected.
    #[error("Shader reflection error: {0}")]
    Reflection(String),

    /// SPIR-V blob whose byte size is not a multiple of 4.
    #[error("Misaligned SPIR-V in {path}: {len} bytes is not word-aligned")]
    MisalignedSpirv {
        /// Path of the offending file
        path: String,
        /// Actual byte length
        len: usize,
    },

    // ========================================================================
    // Format & Asset Errors
    // ========================================================================
    /// A format is known but unimplemented, or lacks a required feature.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Image decoding error.
    #[error("Image decode error: {0}")]
    ImageDecode(String),

    /// Mesh file parsing error.
    #[error("Mesh parse error: {0}")]
    MeshParse(String),

    /// JSON parsing error (material descriptors).
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// File I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ========================================================================
    // Device Errors
    // ========================================================================
    /// Any failure originating from the graphics API.
    #[error("Device error: {0}")]
    Device(#[from] ash::vk::Result),

    /// Device memory allocation failure.
    #[error("Allocation error: {0}")]
    Allocation(#[from] gpu_allocator::AllocationError),

    // ========================================================================
    // Async & Threading Errors
    // ========================================================================
    /// A background load task failed to complete.
    #[error("Task join error: {0}")]
    TaskJoin(String),

    /// Error re-surfaced from a shared in-flight load.
    #[error("Async load error: {0}")]
    AsyncLoad(String),
}

// ============================================================================
// Convenient conversion implementations
// ============================================================================

impl From<image::ImageError> for KilnError {
    fn from(err: image::ImageError) -> Self {
        KilnError::ImageDecode(err.to_string())
    }
}

impl From<tokio::task::JoinError> for KilnError {
    fn from(err: tokio::task::JoinError) -> Self {
        KilnError::TaskJoin(err.to_string())
    }
}

// Shared in-flight loads hand out the same error to every waiter; the
// original stays behind the Arc, waiters get the rendered message.
impl From<Arc<KilnError>> for KilnError {
    fn from(err: Arc<KilnError>) -> Self {
        KilnError::AsyncLoad(err.to_string())
    }
}

/// Alias for `Result<T, KilnError>`.
pub type Result<T> = std::result::Result<T, KilnError>;
