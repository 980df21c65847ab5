//! The engine context: owns every cache and every target.

use std::rc::Rc;

use quadpass_test_utils::GlContext;

use crate::assembler::ShaderAssembler;
use crate::blend::BlendCache;
use crate::config::PassConfig;
use crate::error::DrawResult;
use crate::geometry::IndexArray;
use crate::program::ProgramCache;
use crate::readback::ReadbackScheduler;
use crate::registry::{ResolvedTarget, TargetRegistry};
use crate::sampler::SamplerCache;

/// Draws passes against one GL context.
///
/// A context holds the program cache, the blend memo, the sampler objects,
/// the shared index geometry and every target created from a
/// [`TargetSpec`](crate::TargetSpec). Nothing is global: two contexts never
/// share GL objects.
///
/// ```
/// use std::rc::Rc;
/// use quadpass::{Params, PassConfig, PassContext, TargetSpec};
/// use quadpass_test_utils::MockGlContext;
///
/// let gl = Rc::new(MockGlContext::new(64, 64));
/// let mut ctx = PassContext::new(gl, PassConfig::default()).unwrap();
///
/// let out = ctx
///     .draw(&Params::new().set("FP", "UV, 0.0, 1.0"), TargetSpec::new("uv").size(8, 8))
///     .unwrap();
/// assert_eq!(out.texture().unwrap().size(), [8, 8]);
/// assert_eq!(ctx.program_count(), 1);
/// ```
pub struct PassContext {
    pub(crate) gl: Rc<dyn GlContext>,
    pub(crate) config: PassConfig,
    pub(crate) assembler: ShaderAssembler,
    pub(crate) programs: ProgramCache,
    pub(crate) blends: BlendCache,
    pub(crate) samplers: SamplerCache,
    pub(crate) registry: TargetRegistry,
    pub(crate) geometry: IndexArray,
    pub(crate) readback: Rc<ReadbackScheduler>,
}

impl PassContext {
    pub fn new(gl: Rc<dyn GlContext>, config: PassConfig) -> DrawResult<Self> {
        gl.pixel_store(glow::PACK_ALIGNMENT, 1);
        gl.pixel_store(glow::UNPACK_ALIGNMENT, 1);
        quadpass_core::profiling::set_enabled(config.profiling);

        let geometry = IndexArray::new(&*gl, config.initial_index_capacity)?;
        let readback = Rc::new(ReadbackScheduler::new(gl.clone(), config.readback_poll_interval));
        let registry = TargetRegistry::new(gl.clone(), readback.clone(), config.clone());
        tracing::info!(
            drawing_buffer = ?gl.drawing_buffer_size(),
            index_capacity = geometry.capacity(),
            "created pass context"
        );
        Ok(Self {
            assembler: ShaderAssembler::new(config.glsl_header.clone()),
            programs: ProgramCache::new(),
            blends: BlendCache::new(),
            samplers: SamplerCache::new(),
            registry,
            geometry,
            readback,
            config,
            gl,
        })
    }

    /// Delete every program and free every target the context created.
    ///
    /// Handles held by the caller stay valid as values but refer to freed
    /// textures; drawing into them fails and reading them is rejected.
    pub fn reset(&mut self) {
        let programs = self.programs.len();
        let targets = self.registry.len();
        self.programs.clear(&*self.gl);
        self.registry.free_all();
        self.assembler.clear();
        tracing::info!(programs, targets, "reset pass context");
    }

    /// Deliver finished asynchronous reads. Call once per frame.
    pub fn poll_readbacks(&self) -> usize {
        self.readback.poll()
    }

    pub fn pending_readbacks(&self) -> usize {
        self.readback.len()
    }

    /// Target previously created under `tag`.
    pub fn target(&self, tag: &str) -> Option<ResolvedTarget> {
        self.registry.get(tag)
    }

    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    pub fn gl(&self) -> &Rc<dyn GlContext> {
        &self.gl
    }

    pub fn config(&self) -> &PassConfig {
        &self.config
    }
}

impl Drop for PassContext {
    fn drop(&mut self) {
        self.reset();
        self.samplers.clear(&*self.gl);
        self.geometry.delete(&*self.gl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TargetSpec;
    use quadpass_test_utils::{GlCall, MockGlContext};

    fn context(mock: &Rc<MockGlContext>) -> PassContext {
        PassContext::new(mock.clone(), PassConfig::default()).unwrap()
    }

    #[test]
    fn creation_sets_pixel_alignment() {
        let mock = Rc::new(MockGlContext::new(4, 4));
        let ctx = context(&mock);
        let calls = mock.calls();
        assert!(calls.contains(&GlCall::PixelStore {
            parameter: glow::PACK_ALIGNMENT,
            value: 1
        }));
        assert!(calls.contains(&GlCall::PixelStore {
            parameter: glow::UNPACK_ALIGNMENT,
            value: 1
        }));
        assert_eq!(ctx.geometry.capacity(), 2048);
        assert_eq!(ctx.pending_readbacks(), 0);
    }

    #[test]
    fn reset_frees_targets_and_programs() {
        let mock = Rc::new(MockGlContext::new(4, 4));
        let mut ctx = context(&mock);
        let params = crate::Params::new().set("FP", "1.0");
        let out = ctx.draw(&params, TargetSpec::new("a").size(2, 2)).unwrap();
        assert_eq!(ctx.program_count(), 1);
        assert!(ctx.target("a").is_some());

        ctx.reset();
        assert_eq!(ctx.program_count(), 0);
        assert!(ctx.target("a").is_none());
        assert!(out.texture().unwrap().is_freed());
        assert_eq!(mock.live_textures(), 0);
        assert!(mock.calls().iter().any(|c| matches!(c, GlCall::DeleteProgram { .. })));

        // a fresh target under the same tag after reset
        ctx.draw(&params, TargetSpec::new("a").size(2, 2)).unwrap();
        assert_eq!(mock.count_texture_creates(), 2);
        assert_eq!(ctx.program_count(), 1);
    }

    #[test]
    fn drop_releases_shared_objects() {
        let mock = Rc::new(MockGlContext::new(4, 4));
        let ctx = context(&mock);
        drop(ctx);
        assert_eq!(mock.live_buffers(), 0);
        assert!(mock.calls().iter().any(|c| matches!(c, GlCall::DeleteVertexArray { .. })));
    }
}
