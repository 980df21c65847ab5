//! One draw pass, from parameter bag to instanced draw call.

use std::rc::Rc;

use bitflags::bitflags;
use quadpass_core::profiling::profile_function;

use crate::context::PassContext;
use crate::error::{DrawError, DrawResult};
use crate::geometry::{instance_count, vertex_count};
use crate::params::{self, Params, aspect_scale};
use crate::program::ProgramKey;
use crate::registry::{ResolvedTarget, Target};
use crate::uniforms::UniformValue;

bitflags! {
    /// Capabilities a draw enabled and must disable again.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StateToggles: u8 {
        const BLEND = 1 << 0;
        const DEPTH_TEST = 1 << 1;
        const CULL_FACE = 1 << 2;
        const ALPHA_COVERAGE = 1 << 3;
    }
}

impl StateToggles {
    /// GL capability enums of the set flags.
    pub fn capabilities(self) -> impl Iterator<Item = u32> {
        [
            (Self::BLEND, glow::BLEND),
            (Self::DEPTH_TEST, glow::DEPTH_TEST),
            (Self::CULL_FACE, glow::CULL_FACE),
            (Self::ALPHA_COVERAGE, glow::SAMPLE_ALPHA_TO_COVERAGE),
        ]
        .into_iter()
        .filter(move |(flag, _)| self.contains(*flag))
        .map(|(_, capability)| capability)
    }
}

impl PassContext {
    /// Draw one pass into `target` and return what was drawn into.
    ///
    /// Every fallible step (option parsing, blend parsing, target
    /// allocation, shader compilation) runs before any capability is
    /// enabled, so an error never leaves blending or depth testing on.
    /// A spec target with neither `Clear` nor stages is only allocated.
    pub fn draw(&mut self, params: &Params, target: impl Into<Target>) -> DrawResult<ResolvedTarget> {
        profile_function!();
        let (options, mut uniforms) = params::split(params)?;
        let vertices = vertex_count(options.mesh).ok_or_else(|| DrawError::InvalidOption {
            name: "Mesh".to_string(),
            expected: "a vertex count within i32",
        })?;
        let instances = instance_count(options.grid).ok_or_else(|| DrawError::InvalidOption {
            name: "Grid".to_string(),
            expected: "an instance count within i32",
        })?;
        let blend = match &options.blend {
            Some(spec) => self.blends.get_or_parse(spec)?,
            None => None,
        };

        let resolved = match target.into() {
            Target::Default => ResolvedTarget::Default,
            Target::Texture(texture) => ResolvedTarget::Texture(texture),
            Target::Story(story) => ResolvedTarget::Story(story),
            Target::Spec(spec) => {
                let resolved = self.registry.prepare(&spec)?;
                if options.is_noop() {
                    return Ok(resolved);
                }
                resolved
            }
        };
        if let ResolvedTarget::Story(story) = &resolved
            && !uniforms.contains_key("Src")
        {
            uniforms.insert("Src".to_string(), UniformValue::Sampler(story.current().sampler()));
        }

        let gl = Rc::clone(&self.gl);
        let size = match &resolved {
            ResolvedTarget::Default => {
                gl.bind_framebuffer(None);
                let (w, h) = gl.drawing_buffer_size();
                [w, h]
            }
            ResolvedTarget::Texture(texture) => texture.bind_target(false)?,
            ResolvedTarget::Story(story) => story.rotate().bind_target(false)?,
        };
        let view = options.view_rect(size);
        let [x, y, w, h] = view;
        gl.depth_mask(options.depth_test.writes_depth());
        if let Some(color) = options.clear {
            gl.enable(glow::SCISSOR_TEST);
            gl.scissor(x, y, w, h);
            gl.clear(color, glow::COLOR_BUFFER_BIT | glow::DEPTH_BUFFER_BIT);
            gl.disable(glow::SCISSOR_TEST);
        }
        if !options.has_stages() {
            gl.depth_mask(true);
            return Ok(resolved);
        }

        let key = ProgramKey {
            includes: options.inc.clone(),
            vertex: options.vp.clone(),
            fragment: options.fp.clone(),
        };
        let assembler = &mut self.assembler;
        let program = match self.programs.resolve(&*gl, key, || {
            assembler.assemble(&options.inc, &options.vp, &options.fp, &uniforms)
        }) {
            Ok(program) => program,
            Err(err) => {
                gl.depth_mask(true);
                return Err(err);
            }
        };
        gl.use_program(Some(program.raw()));

        let mut toggles = StateToggles::empty();
        if let Some(blend) = blend {
            blend.apply(&*gl);
            toggles |= StateToggles::BLEND;
        }
        if options.depth_test.enabled() {
            toggles |= StateToggles::DEPTH_TEST;
        }
        if let Some(face) = options.face {
            gl.cull_face(face.culled());
            toggles |= StateToggles::CULL_FACE;
        }
        if options.alpha_coverage {
            toggles |= StateToggles::ALPHA_COVERAGE;
        }
        for capability in toggles.capabilities() {
            gl.enable(capability);
        }

        gl.viewport(x, y, w, h);
        let grid = options.grid;
        let mesh = options.mesh;
        let aspect = aspect_scale(options.aspect, w as f32, h as f32);
        uniforms.insert("View".to_string(), UniformValue::IntVector(view.to_vec()));
        uniforms.insert("Aspect".to_string(), UniformValue::Vector(aspect.to_vec()));
        uniforms.insert(
            "Grid".to_string(),
            UniformValue::IntVector(grid.iter().map(|&n| n as i32).collect()),
        );
        uniforms.insert(
            "Mesh".to_string(),
            UniformValue::IntVector(mesh.iter().map(|&n| n as i32).collect()),
        );

        self.geometry.ensure(&*gl, vertices.max(instances));
        self.geometry.bind(&*gl);
        program.apply_uniforms(&*gl, &uniforms, &self.samplers);
        gl.draw_arrays_instanced(glow::TRIANGLE_STRIP, 0, vertices as i32, instances as i32);

        for capability in toggles.capabilities() {
            gl.disable(capability);
        }
        gl.depth_mask(true);
        gl.bind_vertex_array(None);
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PassConfig;
    use crate::registry::TargetSpec;
    use quadpass_test_utils::{GlCall, MockGlContext};

    fn context(mock: &Rc<MockGlContext>) -> PassContext {
        PassContext::new(mock.clone(), PassConfig::default()).unwrap()
    }

    #[test]
    fn toggles_map_to_capabilities() {
        let toggles = StateToggles::BLEND | StateToggles::CULL_FACE;
        assert_eq!(toggles.capabilities().collect::<Vec<_>>(), [glow::BLEND, glow::CULL_FACE]);
        assert_eq!(StateToggles::empty().capabilities().count(), 0);
    }

    #[test]
    fn full_state_is_reverted() {
        let mock = Rc::new(MockGlContext::new(4, 4));
        let mut ctx = context(&mock);
        let params = Params::new()
            .set("FP", "1.0")
            .set("Blend", "s*sa+d*(1-sa)")
            .set("DepthTest", "keep")
            .set("Face", "front")
            .set("AlphaCoverage", true);
        ctx.draw(&params, Target::Default).unwrap();

        let calls = mock.calls();
        assert!(calls.contains(&GlCall::CullFace(glow::BACK)));
        assert!(calls.contains(&GlCall::DepthMask(false)));
        assert!(calls.contains(&GlCall::BlendFunc {
            src: glow::SRC_ALPHA,
            dst: glow::ONE_MINUS_SRC_ALPHA
        }));
        for capability in [glow::BLEND, glow::DEPTH_TEST, glow::CULL_FACE, glow::SAMPLE_ALPHA_TO_COVERAGE] {
            assert!(calls.contains(&GlCall::Enable(capability)));
            assert!(!mock.is_enabled(capability));
        }
        assert!(mock.depth_writes_enabled());
        assert_eq!(calls.last(), Some(&GlCall::BindVertexArray { id: None }));
    }

    #[test]
    fn geometry_counts_and_builtin_uniforms() {
        let mock = Rc::new(MockGlContext::new(8, 4));
        let mut ctx = context(&mock);
        let params = Params::new()
            .set("FP", "1.0")
            .set("Grid", [3, 2])
            .set("Mesh", [10, 2])
            .set("Aspect", "fit");
        ctx.draw(&params, Target::Default).unwrap();

        assert!(mock.calls().contains(&GlCall::DrawArraysInstanced {
            mode: glow::TRIANGLE_STRIP,
            count: 45,
            instances: 6
        }));
        assert_eq!(mock.uniform_value("View").unwrap().as_i32(), [0, 0, 8, 4]);
        assert_eq!(mock.uniform_value("Aspect").unwrap().as_f32(), [0.5, 1.0]);
        assert_eq!(mock.uniform_value("Grid").unwrap().as_i32(), [3, 2, 1]);
        assert_eq!(mock.uniform_value("Mesh").unwrap().as_i32(), [10, 2]);
    }

    #[test]
    fn large_grids_grow_the_index_array() {
        let mock = Rc::new(MockGlContext::new(4, 4));
        let mut ctx = context(&mock);
        ctx.draw(&Params::new().set("FP", "1.0").set("Grid", [100, 30]), Target::Default)
            .unwrap();
        assert_eq!(ctx.geometry.capacity(), 6000);
    }

    #[test]
    fn spec_without_work_only_allocates() {
        let mock = Rc::new(MockGlContext::new(4, 4));
        let mut ctx = context(&mock);
        let story = ctx
            .draw(&Params::new(), TargetSpec::new("s").size(2, 2).story(2))
            .unwrap()
            .story()
            .unwrap()
            .clone();
        let before = story.to_vec();
        ctx.draw(&Params::new(), TargetSpec::new("s").size(2, 2).story(2)).unwrap();
        assert!(Rc::ptr_eq(&story.current(), &before[0]));
        assert_eq!(mock.count_draws(), 0);
        assert!(!mock.calls().iter().any(|c| matches!(c, GlCall::BindFramebuffer { .. })));
    }

    #[test]
    fn held_story_rotates_without_work() {
        let mock = Rc::new(MockGlContext::new(4, 4));
        let mut ctx = context(&mock);
        let story = ctx
            .draw(&Params::new(), TargetSpec::new("s").size(2, 2).story(3))
            .unwrap()
            .story()
            .unwrap()
            .clone();
        let before = story.to_vec();
        ctx.draw(&Params::new(), &story).unwrap();
        assert!(Rc::ptr_eq(&story.current(), &before[2]));
        assert_eq!(mock.count_draws(), 0);
        assert_eq!(mock.count_clears(), 0);
    }

    #[test]
    fn scissor_clear_of_the_view() {
        let mock = Rc::new(MockGlContext::new(4, 4));
        let mut ctx = context(&mock);
        let out = ctx
            .draw(
                &Params::new().set("Clear", [0.0, 1.0, 0.0, 1.0]).set("View", [1, 1, 2, 2]),
                TargetSpec::new("c").size(4, 4),
            )
            .unwrap()
            .texture()
            .unwrap();
        let calls = mock.calls();
        assert!(calls.contains(&GlCall::Scissor([1, 1, 2, 2])));
        assert!(calls.contains(&GlCall::Clear {
            color: [0.0, 1.0, 0.0, 1.0],
            mask: glow::COLOR_BUFFER_BIT | glow::DEPTH_BUFFER_BIT
        }));
        assert!(!mock.is_enabled(glow::SCISSOR_TEST));
        assert_eq!(mock.texel(out.texture(), 1, 1, 0), Some([0.0, 1.0, 0.0, 1.0]));
        assert_eq!(mock.texel(out.texture(), 0, 0, 0), Some([0.0, 0.0, 0.0, 0.0]));
        assert_eq!(mock.count_draws(), 0);
    }

    #[test]
    fn errors_leave_no_state_behind() {
        let mock = Rc::new(MockGlContext::new(4, 4));
        let mut ctx = context(&mock);
        mock.clear_calls();
        let err = ctx
            .draw(&Params::new().set("FP", "1.0").set("Blend", "s*q"), Target::Default)
            .unwrap_err();
        assert!(matches!(err, crate::DrawError::InvalidBlend(_)));
        assert_eq!(mock.call_count(), 0);

        let params = Params::new().set("FP", "#error broken\n1.0").set("DepthTest", "keep");
        assert!(matches!(
            ctx.draw(&params, Target::Default),
            Err(crate::DrawError::ShaderCompile { .. })
        ));
        assert!(mock.depth_writes_enabled());
        assert!(!mock.calls().iter().any(|c| matches!(c, GlCall::Enable(_))));
    }
}
