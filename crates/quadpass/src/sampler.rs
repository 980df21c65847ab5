//! Texture samplers and the sampler-object cache.
//!
//! A [`TextureSampler`] is a cheap value: a shared texture handle plus the
//! filter and wrap state to sample it with. Forking a sampler
//! (`target.sampler().linear().edge()`) never touches the original; the
//! texture handle and its "mips are stale" flag are the only shared state.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use quadpass_core::collections::HashMap;
use quadpass_core::profiling::profile_function;
use quadpass_test_utils::{GlContext, GlSampler, GlTexture};

use crate::format::TextureFormat;

/// Texture filtering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    #[default]
    Nearest,
    Linear,
    /// Trilinear; mips are regenerated lazily after the texture is drawn to.
    MipLinear,
}

impl FilterMode {
    pub fn min_filter(self) -> u32 {
        match self {
            FilterMode::Nearest => glow::NEAREST,
            FilterMode::Linear => glow::LINEAR,
            FilterMode::MipLinear => glow::LINEAR_MIPMAP_LINEAR,
        }
    }

    pub fn mag_filter(self) -> u32 {
        match self {
            FilterMode::Nearest => glow::NEAREST,
            FilterMode::Linear | FilterMode::MipLinear => glow::LINEAR,
        }
    }
}

/// Texture coordinate wrapping mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WrapMode {
    Edge,
    #[default]
    Repeat,
    Mirror,
}

impl WrapMode {
    pub fn gl_enum(self) -> u32 {
        match self {
            WrapMode::Edge => glow::CLAMP_TO_EDGE,
            WrapMode::Repeat => glow::REPEAT,
            WrapMode::Mirror => glow::MIRRORED_REPEAT,
        }
    }
}

/// Error for an unknown filter or wrap name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSamplingMode(pub String);

impl fmt::Display for UnknownSamplingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown sampling mode \"{}\"", self.0)
    }
}

impl std::error::Error for UnknownSamplingMode {}

impl FromStr for FilterMode {
    type Err = UnknownSamplingMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nearest" => Ok(FilterMode::Nearest),
            "linear" => Ok(FilterMode::Linear),
            "miplinear" => Ok(FilterMode::MipLinear),
            _ => Err(UnknownSamplingMode(s.to_string())),
        }
    }
}

impl FromStr for WrapMode {
    type Err = UnknownSamplingMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "edge" => Ok(WrapMode::Edge),
            "repeat" => Ok(WrapMode::Repeat),
            "mirror" => Ok(WrapMode::Mirror),
            _ => Err(UnknownSamplingMode(s.to_string())),
        }
    }
}

/// GL texture owned by a render target and shared with its samplers.
#[derive(Debug)]
pub struct TextureHandle {
    pub(crate) texture: GlTexture,
    pub(crate) format: TextureFormat,
    pub(crate) layered: bool,
    pub(crate) tag: String,
    mips_stale: Cell<bool>,
    freed: Cell<bool>,
}

impl TextureHandle {
    pub(crate) fn new(texture: GlTexture, format: TextureFormat, layered: bool, tag: String) -> Self {
        Self {
            texture,
            format,
            layered,
            tag,
            mips_stale: Cell::new(true),
            freed: Cell::new(false),
        }
    }

    pub fn gl_target(&self) -> u32 {
        if self.layered {
            glow::TEXTURE_2D_ARRAY
        } else {
            glow::TEXTURE_2D
        }
    }

    pub(crate) fn mark_mips_stale(&self) {
        self.mips_stale.set(true);
    }

    pub(crate) fn mark_freed(&self) {
        self.freed.set(true);
    }

    pub fn is_freed(&self) -> bool {
        self.freed.get()
    }
}

/// A texture plus the sampling state to read it with.
#[derive(Debug, Clone)]
pub struct TextureSampler {
    handle: Rc<TextureHandle>,
    filter: FilterMode,
    wrap: WrapMode,
}

impl TextureSampler {
    pub(crate) fn new(handle: Rc<TextureHandle>, filter: FilterMode, wrap: WrapMode) -> Self {
        // depth textures are never filtered
        let filter = if handle.format.is_depth() {
            FilterMode::Nearest
        } else {
            filter
        };
        Self { handle, filter, wrap }
    }

    pub fn with_filter(&self, filter: FilterMode) -> Self {
        Self::new(self.handle.clone(), filter, self.wrap)
    }

    pub fn with_wrap(&self, wrap: WrapMode) -> Self {
        Self::new(self.handle.clone(), self.filter, wrap)
    }

    pub fn nearest(&self) -> Self {
        self.with_filter(FilterMode::Nearest)
    }

    pub fn linear(&self) -> Self {
        self.with_filter(FilterMode::Linear)
    }

    pub fn mip_linear(&self) -> Self {
        self.with_filter(FilterMode::MipLinear)
    }

    pub fn edge(&self) -> Self {
        self.with_wrap(WrapMode::Edge)
    }

    pub fn repeat(&self) -> Self {
        self.with_wrap(WrapMode::Repeat)
    }

    pub fn mirror(&self) -> Self {
        self.with_wrap(WrapMode::Mirror)
    }

    pub fn filter(&self) -> FilterMode {
        self.filter
    }

    pub fn wrap(&self) -> WrapMode {
        self.wrap
    }

    pub fn format(&self) -> TextureFormat {
        self.handle.format
    }

    pub fn is_layered(&self) -> bool {
        self.handle.layered
    }

    /// Tag of the target this sampler reads from.
    pub fn tag(&self) -> &str {
        &self.handle.tag
    }

    pub fn texture(&self) -> GlTexture {
        self.handle.texture
    }

    /// Whether both samplers read the same texture object.
    pub fn same_texture(&self, other: &TextureSampler) -> bool {
        Rc::ptr_eq(&self.handle, &other.handle)
    }

    pub(crate) fn handle(&self) -> &Rc<TextureHandle> {
        &self.handle
    }

    /// Bind texture and sampler object to `unit`, regenerating mips first
    /// if this sampler needs them and the texture was drawn to since.
    pub fn bind(&self, gl: &dyn GlContext, unit: u32, samplers: &SamplerCache) {
        let target = self.handle.gl_target();
        if self.handle.is_freed() {
            tracing::debug!(tag = %self.handle.tag, unit, "binding a freed texture, unbinding unit");
            gl.bind_texture_unit(unit, target, None, None);
            return;
        }
        if self.filter == FilterMode::MipLinear && self.handle.mips_stale.get() {
            gl.bind_texture_unit(unit, target, Some(self.handle.texture), None);
            gl.generate_mipmap(target, self.handle.texture);
            self.handle.mips_stale.set(false);
        }
        let sampler = samplers.get_or_create(gl, SamplerKey::new(self.filter, self.wrap));
        gl.bind_texture_unit(unit, target, Some(self.handle.texture), sampler);
    }
}

/// Hashable sampler-object configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerKey {
    pub filter: FilterMode,
    pub wrap: WrapMode,
}

impl SamplerKey {
    pub fn new(filter: FilterMode, wrap: WrapMode) -> Self {
        Self { filter, wrap }
    }
}

/// Cache of GL sampler objects, one per filter/wrap pair.
#[derive(Default)]
pub struct SamplerCache {
    cache: RefCell<HashMap<SamplerKey, GlSampler>>,
}

impl SamplerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a sampler object from the cache or create a new one.
    ///
    /// Returns `None` if the driver refuses to create one; the texture then
    /// samples with its own parameters.
    pub fn get_or_create(&self, gl: &dyn GlContext, key: SamplerKey) -> Option<GlSampler> {
        profile_function!();
        if let Some(sampler) = self.cache.borrow().get(&key) {
            return Some(*sampler);
        }
        match gl.create_sampler(key.filter.min_filter(), key.filter.mag_filter(), key.wrap.gl_enum()) {
            Ok(sampler) => {
                self.cache.borrow_mut().insert(key, sampler);
                Some(sampler)
            }
            Err(err) => {
                tracing::warn!(?key, %err, "failed to create sampler object");
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.cache.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.borrow().is_empty()
    }

    /// Delete every cached sampler object.
    pub fn clear(&self, gl: &dyn GlContext) {
        for (_, sampler) in self.cache.borrow_mut().drain() {
            gl.delete_sampler(sampler);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quadpass_test_utils::{GlCall, MockGlContext};

    fn handle(mock: &MockGlContext, format: TextureFormat) -> Rc<TextureHandle> {
        let texture = mock.create_texture().unwrap();
        Rc::new(TextureHandle::new(texture, format, false, "t".into()))
    }

    #[test]
    fn forks_do_not_mutate_the_original() {
        let mock = MockGlContext::new(1, 1);
        let base = TextureSampler::new(handle(&mock, TextureFormat::RGBA8), FilterMode::Nearest, WrapMode::Repeat);
        let fork = base.linear().edge();
        assert_eq!(base.filter(), FilterMode::Nearest);
        assert_eq!(base.wrap(), WrapMode::Repeat);
        assert_eq!(fork.filter(), FilterMode::Linear);
        assert_eq!(fork.wrap(), WrapMode::Edge);
        assert!(fork.same_texture(&base));
    }

    #[test]
    fn depth_always_samples_nearest() {
        let mock = MockGlContext::new(1, 1);
        let depth = TextureSampler::new(handle(&mock, TextureFormat::Depth), FilterMode::Linear, WrapMode::Edge);
        assert_eq!(depth.filter(), FilterMode::Nearest);
        assert_eq!(depth.linear().filter(), FilterMode::Nearest);
    }

    #[test]
    fn cache_reuses_sampler_objects() {
        let mock = MockGlContext::new(1, 1);
        let cache = SamplerCache::new();
        let a = cache.get_or_create(&mock, SamplerKey::new(FilterMode::Linear, WrapMode::Edge));
        let b = cache.get_or_create(&mock, SamplerKey::new(FilterMode::Linear, WrapMode::Edge));
        cache.get_or_create(&mock, SamplerKey::new(FilterMode::MipLinear, WrapMode::Mirror));
        assert_eq!(a.and_then(|s| s.mock_id()), b.and_then(|s| s.mock_id()));
        assert_eq!(cache.len(), 2);
        assert!(mock.calls().contains(&GlCall::CreateSampler {
            min_filter: glow::LINEAR_MIPMAP_LINEAR,
            mag_filter: glow::LINEAR,
            wrap: glow::MIRRORED_REPEAT,
        }));
    }

    #[test]
    fn mips_regenerate_once_per_write() {
        let mock = MockGlContext::new(1, 1);
        let cache = SamplerCache::new();
        let handle = handle(&mock, TextureFormat::RGBA8);
        let sampler = TextureSampler::new(handle.clone(), FilterMode::MipLinear, WrapMode::Repeat);

        sampler.bind(&mock, 0, &cache);
        sampler.bind(&mock, 0, &cache);
        let mips = |m: &MockGlContext| m.calls().iter().filter(|c| matches!(c, GlCall::GenerateMipmap { .. })).count();
        assert_eq!(mips(&mock), 1);

        handle.mark_mips_stale();
        sampler.bind(&mock, 0, &cache);
        assert_eq!(mips(&mock), 2);

        // plain linear sampling never generates mips
        handle.mark_mips_stale();
        sampler.linear().bind(&mock, 0, &cache);
        assert_eq!(mips(&mock), 2);
    }

    #[test]
    fn mode_names() {
        assert_eq!("miplinear".parse::<FilterMode>().unwrap(), FilterMode::MipLinear);
        assert_eq!("mirror".parse::<WrapMode>().unwrap(), WrapMode::Mirror);
        assert!("clamp".parse::<WrapMode>().is_err());
    }
}
