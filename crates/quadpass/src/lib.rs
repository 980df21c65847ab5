//! Declarative GPU draw passes.
//!
//! A pass is a parameter bag: shader snippets, uniforms and a handful of
//! reserved options. [`PassContext::draw`] turns it into a complete GLSL
//! program (cached per snippet set), allocates or resizes the render
//! target it names, applies blend/depth/cull state, issues one instanced
//! triangle-strip draw and reverts the state.
//!
//! ```
//! use std::rc::Rc;
//! use quadpass::{Params, PassConfig, PassContext, TargetSpec};
//! use quadpass_test_utils::MockGlContext;
//!
//! let gl = Rc::new(MockGlContext::new(32, 32));
//! let mut ctx = PassContext::new(gl, PassConfig::default()).unwrap();
//!
//! // ping-pong simulation state: each draw reads `Src` (the previous
//! // state) and writes the other slot
//! let spec = TargetSpec::new("state").size(16, 16).format("r32f").story(2);
//! for _ in 0..3 {
//!     ctx.draw(&Params::new().set("FP", "Src(I).r + 1.0"), spec.clone()).unwrap();
//! }
//! assert_eq!(ctx.program_count(), 1);
//! ```
//!
//! # Modules
//!
//! - [`params`] - the parameter bag and reserved options
//! - [`assembler`] and [`uniforms`] - snippet expansion and uniform inference
//! - [`program`] - compiled programs and their cache
//! - [`target`] and [`registry`] - render targets, stories and tag lookup
//! - [`readback`] - fenced asynchronous GPU to CPU reads
//! - [`blend`] - the blend-spec mini language
//!
//! The GL surface is the [`GlContext`] trait from `quadpass-test-utils`;
//! [`GlowContext`] implements it over `glow`, and the mock there runs the
//! whole engine without a GPU.

pub mod assembler;
pub mod blend;
pub mod config;
pub mod context;
mod context_impl;
pub mod draw;
pub mod error;
pub mod format;
pub mod geometry;
pub mod params;
pub mod program;
pub mod readback;
pub mod registry;
pub mod sampler;
pub mod target;
pub mod uniforms;

pub use blend::{BlendError, BlendState};
pub use config::{DEFAULT_GLSL_HEADER, PassConfig};
pub use context::PassContext;
pub use context_impl::GlowContext;
pub use draw::StateToggles;
pub use error::{DrawError, DrawResult, ReadbackError};
pub use format::{CpuArrayKind, PixelData, TextureFormat};
pub use params::{Aspect, DepthTest, DrawOptions, Face, ParamValue, Params};
pub use readback::ReadCallback;
pub use registry::{ResolvedTarget, StoryBuffer, Target, TargetSpec};
pub use sampler::{FilterMode, TextureSampler, WrapMode};
pub use target::TextureTarget;
pub use uniforms::UniformValue;

pub use quadpass_test_utils::GlContext;
