//! Hash collections used by the engine caches.
//!
//! Keys are shader sources, blend specs and target tags, all short strings
//! hashed on the hot path of every draw.

pub use ahash::{AHashMap as HashMap, AHashSet as HashSet, RandomState};
