//! Engine configuration.

use std::time::Duration;

use crate::format::TextureFormat;
use crate::sampler::{FilterMode, WrapMode};

/// GLSL ES 3.0 header with precision statements for every sampler kind the
/// template uses.
pub const DEFAULT_GLSL_HEADER: &str = "#version 300 es
precision highp float;
precision highp int;
precision lowp sampler2DArray;
precision highp isampler2D;
precision highp usampler2D;
precision highp isampler2DArray;
precision highp usampler2DArray;";

/// Configuration for a [`PassContext`](crate::PassContext).
#[derive(Debug, Clone)]
pub struct PassConfig {
    /// Placed first in both shader stages
    pub glsl_header: String,
    /// Idle pixel-pack buffers kept per target
    pub readback_pool_limit: usize,
    /// Delay between fence polls of one pending readback
    pub readback_poll_interval: Duration,
    /// Initial vertex capacity of the shared index array
    pub initial_index_capacity: u32,
    /// Format of target specs that do not name one
    pub default_format: TextureFormat,
    pub default_filter: FilterMode,
    pub default_wrap: WrapMode,
    /// Turn puffin scopes on when the context is created
    pub profiling: bool,
}

impl Default for PassConfig {
    fn default() -> Self {
        Self {
            glsl_header: DEFAULT_GLSL_HEADER.to_string(),
            readback_pool_limit: 6,
            readback_poll_interval: Duration::from_millis(1),
            initial_index_capacity: 1024,
            default_format: TextureFormat::RGBA8,
            default_filter: FilterMode::Nearest,
            default_wrap: WrapMode::Repeat,
            profiling: false,
        }
    }
}

impl PassConfig {
    pub fn with_glsl_header(mut self, header: impl Into<String>) -> Self {
        self.glsl_header = header.into();
        self
    }

    pub fn with_readback_pool_limit(mut self, limit: usize) -> Self {
        self.readback_pool_limit = limit;
        self
    }

    pub fn with_readback_poll_interval(mut self, interval: Duration) -> Self {
        self.readback_poll_interval = interval;
        self
    }

    pub fn with_initial_index_capacity(mut self, capacity: u32) -> Self {
        self.initial_index_capacity = capacity.max(1);
        self
    }

    pub fn with_default_format(mut self, format: TextureFormat) -> Self {
        self.default_format = format;
        self
    }

    pub fn with_default_sampling(mut self, filter: FilterMode, wrap: WrapMode) -> Self {
        self.default_filter = filter;
        self.default_wrap = wrap;
        self
    }

    pub fn with_profiling(mut self, enabled: bool) -> Self {
        self.profiling = enabled;
        self
    }

    /// Desktop OpenGL 3.3 core header.
    pub fn desktop() -> Self {
        Self::default().with_glsl_header("#version 330 core")
    }
}
