//! Engine Configuration
//!
//! This module defines the configuration options for the engine core.
//!
//! # Example
//!
//! ```rust,ignore
//! use kiln::settings::{EngineSettings, StagingSettings};
//!
//! let settings = EngineSettings {
//!     frames_in_flight: 3,
//!     staging: StagingSettings {
//!         max_pooled_buffers: 8,
//!         ..Default::default()
//!     },
//!     ..Default::default()
//! };
//! ```

/// Configuration of the per-thread staging-buffer pools used by the
/// transfer engine.
///
/// | Field | Description | Default |
/// |-------|-------------|---------|
/// | `pool_enabled` | Reuse staging buffers across uploads | `true` |
/// | `max_pooled_buffers` | Pool capacity per thread | `4` |
/// | `min_buffer_size` | Smallest pooled allocation | `1 MiB` |
/// | `max_buffer_size` | Largest pooled allocation | `64 MiB` |
#[derive(Debug, Clone, Copy)]
pub struct StagingSettings {
    /// When disabled, every upload creates and discards its own staging buffer.
    pub pool_enabled: bool,
    /// Pooled entries beyond this count are released during cleanup.
    pub max_pooled_buffers: usize,
    /// Requests below this size still allocate this much, so small uploads share buffers.
    pub min_buffer_size: u64,
    /// Pooled allocations are clamped to this size; larger requests get exact-size buffers.
    pub max_buffer_size: u64,
}

impl Default for StagingSettings {
    fn default() -> Self {
        Self {
            pool_enabled: true,
            max_pooled_buffers: 4,
            min_buffer_size: 1 << 20,
            max_buffer_size: 64 << 20,
        }
    }
}

/// Configuration options for the frame orchestrator.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Number of frames that may be recorded before the oldest must retire.
    /// Must be at least 1.
    pub frames_in_flight: u32,
    /// Reserved attachment name that resolves to the current swapchain image.
    pub swapchain_attachment_name: String,
    /// Staging-pool configuration handed to the transfer engine.
    pub staging: StagingSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            swapchain_attachment_name: "Swapchain".to_string(),
            staging: StagingSettings::default(),
        }
    }
}
