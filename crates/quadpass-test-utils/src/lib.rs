//! GL context abstraction and test utilities for quadpass.
//!
//! # Overview
//!
//! - [`GlContext`] - Trait abstracting the immediate-mode GL calls the
//!   engine makes
//! - `MockGlContext` - Software mock that records calls and emulates
//!   texture storage, clears and readback (requires `mock` feature)
//! - GL handle wrappers (`GlTexture`, `GlProgram`, etc.) - Can be real or mock
//!
//! # Example
//!
//! ```rust
//! # #[cfg(feature = "mock")]
//! # {
//! use quadpass_test_utils::{GlContext, MockGlContext};
//!
//! let mock = MockGlContext::new(64, 64);
//! let texture = mock.create_texture().unwrap();
//!
//! assert!(texture.is_mock());
//! assert_eq!(mock.count_texture_creates(), 1);
//! # }
//! ```
//!
//! # Design
//!
//! Handles are small `Copy` values, so nothing borrows from the context and
//! the trait stays object-safe (`Rc<dyn GlContext>`). Every method takes
//! `&self`; the mock keeps its state behind `Mutex`.

pub mod gl_context;
pub mod gl_types;
#[cfg(feature = "mock")]
pub mod mock;

pub use gl_context::*;
pub use gl_types::*;
#[cfg(feature = "mock")]
pub use mock::*;
