//! Error types.

use quadpass_test_utils::ShaderStage;

use crate::blend::BlendError;
use crate::format::UnknownFormat;
use crate::sampler::UnknownSamplingMode;

/// Errors surfaced by a draw call.
///
/// Everything that can be rejected from the parameters alone (blend specs,
/// aspect modes, formats, option types) is reported before any GL state is
/// touched.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawError {
    /// Blend spec that does not parse
    InvalidBlend(BlendError),
    /// `Aspect` option other than fit/cover/x/y/mean
    UnknownAspect(String),
    /// Unrecognized texture format string
    UnknownFormat(String),
    /// Unknown filter or wrap mode string
    UnknownSampling(String),
    /// Reserved option with a value of the wrong type
    InvalidOption { name: String, expected: &'static str },
    /// Uniform value that cannot be used
    InvalidUniform { name: String, reason: String },
    /// Target spec without a tag
    MissingTag,
    /// Upload data does not match the target's dimensions (in bytes)
    DataSizeMismatch { tag: String, expected: usize, actual: usize },
    /// Drawing into a target after it was freed
    FreedTarget(String),
    /// Shader stage failed to compile
    ShaderCompile { stage: ShaderStage, listing: String, log: String },
    /// Program failed to link
    ProgramLink { log: String },
    /// GL object creation failed
    Gl(String),
}

impl std::fmt::Display for DrawError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidBlend(err) => write!(f, "{err}"),
            Self::UnknownAspect(mode) => write!(f, "Unknown aspect mode \"{mode}\""),
            Self::UnknownFormat(format) => write!(f, "Unknown texture format \"{format}\""),
            Self::UnknownSampling(mode) => write!(f, "Unknown sampling mode \"{mode}\""),
            Self::InvalidOption { name, expected } => write!(f, "Option {name} expects {expected}"),
            Self::InvalidUniform { name, reason } => write!(f, "Invalid uniform {name}: {reason}"),
            Self::MissingTag => write!(f, "Target spec requires a tag"),
            Self::DataSizeMismatch { tag, expected, actual } => write!(
                f,
                "Data for target \"{tag}\" has {actual} bytes, expected {expected}"
            ),
            Self::FreedTarget(tag) => write!(f, "Target \"{tag}\" has been freed"),
            Self::ShaderCompile { listing, log, .. } => {
                write!(f, "{listing}\n--- GLSL COMPILE ERROR ---\n{log}")
            }
            Self::ProgramLink { log } => write!(f, "Program link failed: {log}"),
            Self::Gl(msg) => write!(f, "GL error: {msg}"),
        }
    }
}

impl std::error::Error for DrawError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidBlend(err) => Some(err),
            _ => None,
        }
    }
}

impl From<BlendError> for DrawError {
    fn from(err: BlendError) -> Self {
        Self::InvalidBlend(err)
    }
}

impl From<UnknownFormat> for DrawError {
    fn from(err: UnknownFormat) -> Self {
        Self::UnknownFormat(err.0)
    }
}

impl From<UnknownSamplingMode> for DrawError {
    fn from(err: UnknownSamplingMode) -> Self {
        Self::UnknownSampling(err.0)
    }
}

pub type DrawResult<T> = Result<T, DrawError>;

/// Errors from reading a target back to the CPU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadbackError {
    /// Region outside the texture or destination too small
    InvalidRegion,
    /// Target was freed
    Freed,
    /// GL object creation or sync failed
    Gl(String),
}

impl std::fmt::Display for ReadbackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidRegion => write!(f, "Invalid readback region"),
            Self::Freed => write!(f, "Target has been freed"),
            Self::Gl(msg) => write!(f, "GL error during readback: {msg}"),
        }
    }
}

impl std::error::Error for ReadbackError {}
