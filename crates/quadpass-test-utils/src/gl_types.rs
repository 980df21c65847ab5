//! GL object handles that can be real or mock.
//!
//! Each wrapper hides whether it holds a `glow` object or a mock id. Real
//! handles are only ever produced by a real context, so `as_glow` on a mock
//! handle is a test bug and panics.

macro_rules! gl_handle {
    ($(#[$meta:meta])* $name:ident, $inner:ident, $glow:ty, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug)]
        pub struct $name {
            inner: $inner,
        }

        #[derive(Clone, Copy, Debug)]
        enum $inner {
            Real($glow),
            #[cfg(feature = "mock")]
            Mock(usize),
        }

        impl $name {
            /// Wrap a real `glow` object.
            pub fn from_glow(raw: $glow) -> Self {
                Self {
                    inner: $inner::Real(raw),
                }
            }

            /// Create a mock handle (for testing).
            #[cfg(feature = "mock")]
            pub fn mock(id: usize) -> Self {
                Self {
                    inner: $inner::Mock(id),
                }
            }

            /// Get the underlying `glow` object.
            ///
            /// # Panics
            /// Panics if this is a mock handle.
            pub fn as_glow(&self) -> $glow {
                match self.inner {
                    $inner::Real(raw) => raw,
                    #[cfg(feature = "mock")]
                    $inner::Mock(_) => {
                        panic!(concat!("Attempted to get glow::", $label, " from a mock handle"))
                    }
                }
            }

            /// Check if this is a mock.
            #[cfg(feature = "mock")]
            pub fn is_mock(&self) -> bool {
                matches!(self.inner, $inner::Mock(_))
            }

            /// Get the mock id (for test assertions).
            #[cfg(feature = "mock")]
            pub fn mock_id(&self) -> Option<usize> {
                match self.inner {
                    $inner::Mock(id) => Some(id),
                    _ => None,
                }
            }
        }
    };
}

gl_handle!(
    /// Texture object (2D or 2D array).
    GlTexture, GlTextureInner, glow::Texture, "Texture"
);
gl_handle!(
    /// Framebuffer object.
    GlFramebuffer, GlFramebufferInner, glow::Framebuffer, "Framebuffer"
);
gl_handle!(
    /// Buffer object (vertex data or pixel pack).
    GlBuffer, GlBufferInner, glow::Buffer, "Buffer"
);
gl_handle!(
    /// Linked program object.
    GlProgram, GlProgramInner, glow::Program, "Program"
);
gl_handle!(
    /// Compiled shader stage, consumed by linking.
    GlShader, GlShaderInner, glow::Shader, "Shader"
);
gl_handle!(
    /// Sampler object holding filter and wrap state.
    GlSampler, GlSamplerInner, glow::Sampler, "Sampler"
);
gl_handle!(
    /// Vertex array object.
    GlVertexArray, GlVertexArrayInner, glow::VertexArray, "VertexArray"
);
gl_handle!(
    /// Fence inserted after a pixel-pack read.
    GlFence, GlFenceInner, glow::Fence, "Fence"
);

/// Location of a uniform inside a linked program.
#[derive(Clone, Debug)]
pub struct GlUniformLocation {
    inner: GlUniformLocationInner,
}

#[derive(Clone, Debug)]
enum GlUniformLocationInner {
    Real(glow::UniformLocation),
    #[cfg(feature = "mock")]
    Mock { program: usize, name: String },
}

impl GlUniformLocation {
    pub fn from_glow(raw: glow::UniformLocation) -> Self {
        Self {
            inner: GlUniformLocationInner::Real(raw),
        }
    }

    #[cfg(feature = "mock")]
    pub fn mock(program: usize, name: impl Into<String>) -> Self {
        Self {
            inner: GlUniformLocationInner::Mock {
                program,
                name: name.into(),
            },
        }
    }

    /// # Panics
    /// Panics if this is a mock location.
    pub fn as_glow(&self) -> &glow::UniformLocation {
        match &self.inner {
            GlUniformLocationInner::Real(raw) => raw,
            #[cfg(feature = "mock")]
            GlUniformLocationInner::Mock { .. } => {
                panic!("Attempted to get glow::UniformLocation from a mock location")
            }
        }
    }

    /// Program id and uniform name of a mock location.
    #[cfg(feature = "mock")]
    pub fn mock_parts(&self) -> Option<(usize, &str)> {
        match &self.inner {
            GlUniformLocationInner::Mock { program, name } => Some((*program, name.as_str())),
            _ => None,
        }
    }
}

/// Programmable pipeline stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub fn gl_enum(self) -> u32 {
        match self {
            ShaderStage::Vertex => glow::VERTEX_SHADER,
            ShaderStage::Fragment => glow::FRAGMENT_SHADER,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
        }
    }
}

/// Uniform reported by program introspection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveUniform {
    /// Name as reported by the driver, arrays end in `[0]`.
    pub name: String,
    /// GL type enum, e.g. `glow::FLOAT_VEC4`.
    pub utype: u32,
    /// Array length, 1 for plain uniforms.
    pub size: i32,
}

/// Storage triple passed to `tex_image` and `read_pixels`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PixelLayout {
    pub internal_format: u32,
    pub format: u32,
    pub ty: u32,
}

/// Result of a zero-timeout fence wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncStatus {
    Signaled,
    TimeoutExpired,
    WaitFailed,
}

/// Destination of a pixel read.
#[derive(Debug)]
pub enum PixelPackTarget<'a> {
    /// Synchronous read into client memory.
    Slice(&'a mut [u8]),
    /// Asynchronous read into a pixel-pack buffer.
    Buffer(GlBuffer),
}
