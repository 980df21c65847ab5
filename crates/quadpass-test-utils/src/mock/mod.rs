//! Mock implementation of [`GlContext`] for testing.
//!
//! `MockGlContext` records every call and keeps enough state to make the
//! engine observable without a GPU:
//!
//! - texture storage on the CPU (normalized, float, half-float, integer)
//! - framebuffer attachments, scissored clears and `read_pixels`
//! - pixel-pack buffers and fences with configurable latency
//! - program uniforms (types recovered from declarations in the sources)
//! - draws, executed by a registered fragment emulator if one matches
//!
//! Blending, depth testing and culling are recorded but not emulated.

mod shading;
mod texels;

pub use shading::{Fragment, FragmentFn, MockUniform};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{gl_context::GlContext, gl_types::*};
use shading::{MockProgram, scan_uniforms};
use texels::MockTexture;

/// Records a GL call for verification in tests.
#[derive(Debug, Clone, PartialEq)]
pub enum GlCall {
    PixelStore { parameter: u32, value: i32 },
    CreateTexture { id: usize },
    DeleteTexture { id: usize },
    TexImage { id: usize, width: u32, height: u32, layers: Option<u32>, internal_format: u32, with_data: bool },
    GenerateMipmap { id: usize },
    BindTextureUnit { unit: u32, texture: Option<usize> },
    CreateSampler { min_filter: u32, mag_filter: u32, wrap: u32 },
    DeleteSampler { id: usize },
    CreateFramebuffer { id: usize },
    DeleteFramebuffer { id: usize },
    BindFramebuffer { id: Option<usize> },
    FramebufferTexture { attachment: u32, texture: usize, layer: Option<u32> },
    DrawBuffers { count: usize },
    CompileShader { stage: ShaderStage },
    LinkProgram { id: usize },
    DeleteProgram { id: usize },
    UseProgram { id: Option<usize> },
    SetUniform { name: String },
    Enable(u32),
    Disable(u32),
    BlendFunc { src: u32, dst: u32 },
    BlendEquation(u32),
    CullFace(u32),
    DepthMask(bool),
    Viewport([i32; 4]),
    Scissor([i32; 4]),
    Clear { color: [f32; 4], mask: u32 },
    CreateBuffer { id: usize },
    DeleteBuffer { id: usize },
    BufferData { id: usize, size: usize },
    CreateVertexArray { id: usize },
    DeleteVertexArray { id: usize },
    BindVertexArray { id: Option<usize> },
    IntAttribute { location: u32, divisor: u32 },
    DrawArraysInstanced { mode: u32, count: i32, instances: i32 },
    ReadPixels { width: i32, height: i32, into_buffer: bool },
    FenceSync { id: usize },
    ClientWaitSync { id: usize },
    DeleteSync { id: usize },
    Flush,
    GetBufferSubData { id: usize, len: usize },
}

#[derive(Debug, Default, Clone)]
struct MockFramebuffer {
    colors: Vec<(u32, usize, Option<u32>)>,
    depth: Option<usize>,
}

struct MockState {
    drawing_buffer: MockTexture,
    next_id: usize,
    textures: HashMap<usize, MockTexture>,
    framebuffers: HashMap<usize, MockFramebuffer>,
    buffers: HashMap<usize, Vec<u8>>,
    shaders: HashMap<usize, (ShaderStage, String)>,
    programs: HashMap<usize, MockProgram>,
    samplers: HashSet<usize>,
    vertex_arrays: HashSet<usize>,
    fences: HashMap<usize, u32>,
    units: HashMap<u32, usize>,
    bound_framebuffer: Option<usize>,
    current_program: Option<usize>,
    enabled: HashSet<u32>,
    viewport: [i32; 4],
    scissor: [i32; 4],
    depth_mask: bool,
    fence_latency: u32,
    fail_fence_waits: bool,
    fail_next_link: Option<String>,
    fail_texture_after: Option<usize>,
    fail_next_framebuffer: bool,
}

impl MockState {
    fn alloc_id(&mut self) -> usize {
        self.next_id += 1;
        self.next_id
    }

    /// Texture and layer that receive `FOut` for the bound framebuffer.
    fn color_target(&self) -> Option<(Option<usize>, u32)> {
        match self.bound_framebuffer {
            None => Some((None, 0)),
            Some(fb) => {
                let fb = self.framebuffers.get(&fb)?;
                fb.colors
                    .iter()
                    .find(|(attachment, _, _)| *attachment == glow::COLOR_ATTACHMENT0)
                    .map(|(_, tex, layer)| (Some(*tex), layer.unwrap_or(0)))
            }
        }
    }

    fn texture_mut(&mut self, id: Option<usize>) -> Option<&mut MockTexture> {
        match id {
            None => Some(&mut self.drawing_buffer),
            Some(id) => self.textures.get_mut(&id),
        }
    }

    fn texture(&self, id: Option<usize>) -> Option<&MockTexture> {
        match id {
            None => Some(&self.drawing_buffer),
            Some(id) => self.textures.get(&id),
        }
    }

    /// Rectangle affected by clears: the scissor box when enabled.
    fn clear_rect(&self, tex: &MockTexture) -> [i32; 4] {
        if self.enabled.contains(&glow::SCISSOR_TEST) {
            self.scissor
        } else {
            [0, 0, tex.width as i32, tex.height as i32]
        }
    }
}

fn fill_rect(tex: &mut MockTexture, rect: [i32; 4], layer: u32, value: [f32; 4]) {
    for y in rect[1]..rect[1] + rect[3] {
        for x in rect[0]..rect[0] + rect[2] {
            tex.store(x, y, layer, value);
        }
    }
}

/// Mock implementation of [`GlContext`] for testing.
///
/// # Example
///
/// ```rust
/// use quadpass_test_utils::{GlContext, MockGlContext, PixelPackTarget};
///
/// let mock = MockGlContext::new(4, 4);
/// mock.bind_framebuffer(None);
/// mock.clear([0.0, 1.0, 0.0, 1.0], glow::COLOR_BUFFER_BIT);
///
/// let mut pixel = [0u8; 4];
/// mock.read_pixels(0, 0, 1, 1, glow::RGBA, glow::UNSIGNED_BYTE, PixelPackTarget::Slice(&mut pixel));
/// assert_eq!(pixel, [0, 255, 0, 255]);
/// assert_eq!(mock.count_clears(), 1);
/// ```
pub struct MockGlContext {
    calls: Mutex<Vec<GlCall>>,
    state: Mutex<MockState>,
    emulators: Mutex<Vec<(String, FragmentFn)>>,
}

impl MockGlContext {
    /// Create a mock whose default framebuffer is `width` x `height` RGBA8.
    pub fn new(width: u32, height: u32) -> Self {
        let mut drawing_buffer = MockTexture::empty();
        drawing_buffer.specify(
            PixelLayout {
                internal_format: glow::RGBA8,
                format: glow::RGBA,
                ty: glow::UNSIGNED_BYTE,
            },
            width,
            height,
            None,
            None,
        );
        Self {
            calls: Mutex::new(Vec::new()),
            state: Mutex::new(MockState {
                drawing_buffer,
                next_id: 0,
                textures: HashMap::new(),
                framebuffers: HashMap::new(),
                buffers: HashMap::new(),
                shaders: HashMap::new(),
                programs: HashMap::new(),
                samplers: HashSet::new(),
                vertex_arrays: HashSet::new(),
                fences: HashMap::new(),
                units: HashMap::new(),
                bound_framebuffer: None,
                current_program: None,
                enabled: HashSet::new(),
                viewport: [0, 0, width as i32, height as i32],
                scissor: [0, 0, width as i32, height as i32],
                depth_mask: true,
                fence_latency: 0,
                fail_fence_waits: false,
                fail_next_link: None,
                fail_texture_after: None,
                fail_next_framebuffer: false,
            }),
            emulators: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, call: GlCall) {
        self.calls.lock().push(call);
    }

    /// Run `emulator` for every draw whose fragment source contains `marker`.
    pub fn register_fragment<F>(&self, marker: impl Into<String>, emulator: F)
    where
        F: Fn(&Fragment<'_>) -> [f32; 4] + Send + Sync + 'static,
    {
        self.emulators.lock().push((marker.into(), Arc::new(emulator)));
    }

    /// Resize the default framebuffer (contents are discarded).
    pub fn set_drawing_buffer_size(&self, width: u32, height: u32) {
        let mut state = self.state.lock();
        let layout = state.drawing_buffer.layout;
        state.drawing_buffer.specify(layout, width, height, None, None);
    }

    /// Number of zero-timeout polls a fence needs before it signals.
    pub fn set_fence_latency(&self, polls: u32) {
        self.state.lock().fence_latency = polls;
    }

    /// Make every fence wait report `WAIT_FAILED`.
    pub fn set_fence_wait_failure(&self, fail: bool) {
        self.state.lock().fail_fence_waits = fail;
    }

    /// Make the next `link_program` fail with `log`.
    pub fn fail_next_link(&self, log: impl Into<String>) {
        self.state.lock().fail_next_link = Some(log.into());
    }

    /// Let `successes` more texture creations through, then fail one.
    pub fn fail_texture_creation_after(&self, successes: usize) {
        self.state.lock().fail_texture_after = Some(successes);
    }

    /// Make the next `create_framebuffer` fail.
    pub fn fail_next_framebuffer(&self) {
        self.state.lock().fail_next_framebuffer = true;
    }

    /// Get all recorded calls.
    pub fn calls(&self) -> Vec<GlCall> {
        self.calls.lock().clone()
    }

    /// Clear recorded calls (useful for multi-phase tests).
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Get total number of recorded calls.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn count(&self, pred: impl Fn(&GlCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    pub fn count_texture_creates(&self) -> usize {
        self.count(|c| matches!(c, GlCall::CreateTexture { .. }))
    }

    pub fn count_texture_deletes(&self) -> usize {
        self.count(|c| matches!(c, GlCall::DeleteTexture { .. }))
    }

    pub fn count_shader_compiles(&self) -> usize {
        self.count(|c| matches!(c, GlCall::CompileShader { .. }))
    }

    pub fn count_program_links(&self) -> usize {
        self.count(|c| matches!(c, GlCall::LinkProgram { .. }))
    }

    pub fn count_draws(&self) -> usize {
        self.count(|c| matches!(c, GlCall::DrawArraysInstanced { .. }))
    }

    pub fn count_clears(&self) -> usize {
        self.count(|c| matches!(c, GlCall::Clear { .. }))
    }

    pub fn count_fence_deletes(&self) -> usize {
        self.count(|c| matches!(c, GlCall::DeleteSync { .. }))
    }

    /// Capabilities currently enabled.
    pub fn is_enabled(&self, capability: u32) -> bool {
        self.state.lock().enabled.contains(&capability)
    }

    pub fn depth_writes_enabled(&self) -> bool {
        self.state.lock().depth_mask
    }

    /// Number of textures created and not yet deleted.
    pub fn live_textures(&self) -> usize {
        self.state.lock().textures.len()
    }

    /// Number of buffers created and not yet deleted.
    pub fn live_buffers(&self) -> usize {
        self.state.lock().buffers.len()
    }

    /// `(width, height, layers)` of a live texture.
    pub fn texture_size(&self, texture: GlTexture) -> Option<(u32, u32, u32)> {
        let id = texture.mock_id()?;
        let state = self.state.lock();
        state.textures.get(&id).map(|t| (t.width, t.height, t.layers))
    }

    /// Texel of a live texture as the sampler would see it.
    pub fn texel(&self, texture: GlTexture, x: i32, y: i32, layer: u32) -> Option<[f32; 4]> {
        let id = texture.mock_id()?;
        let state = self.state.lock();
        state.textures.get(&id).map(|t| t.fetch(x, y, layer))
    }

    /// Whether mipmaps were generated since the last storage respecification.
    pub fn has_mipmaps(&self, texture: GlTexture) -> bool {
        texture
            .mock_id()
            .and_then(|id| self.state.lock().textures.get(&id).map(|t| t.has_mipmaps))
            .unwrap_or(false)
    }

    /// Last value written to uniform `name` of the current program.
    pub fn uniform_value(&self, name: &str) -> Option<MockUniform> {
        let state = self.state.lock();
        let program = state.programs.get(&state.current_program?)?;
        program.values.get(name).cloned()
    }

    /// Full source of one stage of the current program.
    pub fn current_source(&self, stage: ShaderStage) -> Option<String> {
        let state = self.state.lock();
        let program = state.programs.get(&state.current_program?)?;
        Some(match stage {
            ShaderStage::Vertex => program.vertex_source.clone(),
            ShaderStage::Fragment => program.fragment_source.clone(),
        })
    }

    fn run_emulator(&self, state: &mut MockState) {
        let Some(program_id) = state.current_program else {
            return;
        };
        let Some(program) = state.programs.get(&program_id) else {
            return;
        };
        let emulator = self
            .emulators
            .lock()
            .iter()
            .find(|(marker, _)| program.fragment_source.contains(marker.as_str()))
            .map(|(_, f)| f.clone());
        let Some(emulator) = emulator else {
            return;
        };
        let Some((target, layer)) = state.color_target() else {
            return;
        };
        let Some(tex) = state.texture(target) else {
            return;
        };
        let [vx, vy, vw, vh] = state.viewport;
        let x0 = vx.max(0);
        let y0 = vy.max(0);
        let x1 = (vx + vw).min(tex.width as i32);
        let y1 = (vy + vh).min(tex.height as i32);

        let mut out = Vec::new();
        for y in y0..y1 {
            for x in x0..x1 {
                let fragment = Fragment {
                    coord: [x, y],
                    uv: [
                        (x - vx) as f32 / vw as f32 + 0.5 / vw as f32,
                        (y - vy) as f32 / vh as f32 + 0.5 / vh as f32,
                    ],
                    program,
                    units: &state.units,
                    textures: &state.textures,
                };
                out.push((x, y, emulator(&fragment)));
            }
        }
        if let Some(tex) = state.texture_mut(target) {
            for (x, y, value) in out {
                tex.store(x, y, layer, value);
            }
        }
    }
}

impl Default for MockGlContext {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

impl GlContext for MockGlContext {
    fn drawing_buffer_size(&self) -> (u32, u32) {
        let state = self.state.lock();
        (state.drawing_buffer.width, state.drawing_buffer.height)
    }

    fn pixel_store(&self, parameter: u32, value: i32) {
        self.record(GlCall::PixelStore { parameter, value });
    }

    fn create_texture(&self) -> Result<GlTexture, String> {
        let mut state = self.state.lock();
        match state.fail_texture_after {
            Some(0) => {
                state.fail_texture_after = None;
                return Err("texture creation failed".to_string());
            }
            Some(n) => state.fail_texture_after = Some(n - 1),
            None => {}
        }
        let id = state.alloc_id();
        state.textures.insert(id, MockTexture::empty());
        self.record(GlCall::CreateTexture { id });
        Ok(GlTexture::mock(id))
    }

    fn delete_texture(&self, texture: GlTexture) {
        let Some(id) = texture.mock_id() else { return };
        let mut state = self.state.lock();
        state.textures.remove(&id);
        state.units.retain(|_, bound| *bound != id);
        self.record(GlCall::DeleteTexture { id });
    }

    fn tex_image(
        &self,
        texture: GlTexture,
        layout: PixelLayout,
        width: u32,
        height: u32,
        layers: Option<u32>,
        data: Option<&[u8]>,
    ) {
        let Some(id) = texture.mock_id() else { return };
        if let Some(tex) = self.state.lock().textures.get_mut(&id) {
            tex.specify(layout, width, height, layers, data);
        }
        self.record(GlCall::TexImage {
            id,
            width,
            height,
            layers,
            internal_format: layout.internal_format,
            with_data: data.is_some(),
        });
    }

    fn generate_mipmap(&self, _target: u32, texture: GlTexture) {
        let Some(id) = texture.mock_id() else { return };
        if let Some(tex) = self.state.lock().textures.get_mut(&id) {
            tex.has_mipmaps = true;
        }
        self.record(GlCall::GenerateMipmap { id });
    }

    fn bind_texture_unit(
        &self,
        unit: u32,
        _target: u32,
        texture: Option<GlTexture>,
        _sampler: Option<GlSampler>,
    ) {
        let id = texture.and_then(|t| t.mock_id());
        let mut state = self.state.lock();
        match id {
            Some(id) => state.units.insert(unit, id),
            None => state.units.remove(&unit),
        };
        self.record(GlCall::BindTextureUnit { unit, texture: id });
    }

    fn create_sampler(&self, min_filter: u32, mag_filter: u32, wrap: u32) -> Result<GlSampler, String> {
        let mut state = self.state.lock();
        let id = state.alloc_id();
        state.samplers.insert(id);
        self.record(GlCall::CreateSampler {
            min_filter,
            mag_filter,
            wrap,
        });
        Ok(GlSampler::mock(id))
    }

    fn delete_sampler(&self, sampler: GlSampler) {
        let Some(id) = sampler.mock_id() else { return };
        self.state.lock().samplers.remove(&id);
        self.record(GlCall::DeleteSampler { id });
    }

    fn create_framebuffer(&self) -> Result<GlFramebuffer, String> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.fail_next_framebuffer) {
            return Err("framebuffer incomplete".to_string());
        }
        let id = state.alloc_id();
        state.framebuffers.insert(id, MockFramebuffer::default());
        self.record(GlCall::CreateFramebuffer { id });
        Ok(GlFramebuffer::mock(id))
    }

    fn delete_framebuffer(&self, framebuffer: GlFramebuffer) {
        let Some(id) = framebuffer.mock_id() else { return };
        let mut state = self.state.lock();
        state.framebuffers.remove(&id);
        if state.bound_framebuffer == Some(id) {
            state.bound_framebuffer = None;
        }
        self.record(GlCall::DeleteFramebuffer { id });
    }

    fn bind_framebuffer(&self, framebuffer: Option<GlFramebuffer>) {
        let id = framebuffer.and_then(|f| f.mock_id());
        self.state.lock().bound_framebuffer = id;
        self.record(GlCall::BindFramebuffer { id });
    }

    fn framebuffer_texture(&self, attachment: u32, texture: GlTexture, layer: Option<u32>) {
        let Some(tex) = texture.mock_id() else { return };
        let mut state = self.state.lock();
        if let Some(fb_id) = state.bound_framebuffer
            && let Some(fb) = state.framebuffers.get_mut(&fb_id)
        {
            if attachment == glow::DEPTH_ATTACHMENT {
                fb.depth = Some(tex);
            } else {
                fb.colors.retain(|(a, _, _)| *a != attachment);
                fb.colors.push((attachment, tex, layer));
            }
        }
        self.record(GlCall::FramebufferTexture {
            attachment,
            texture: tex,
            layer,
        });
    }

    fn draw_buffers(&self, attachments: &[u32]) {
        self.record(GlCall::DrawBuffers {
            count: attachments.len(),
        });
    }

    fn compile_shader(&self, stage: ShaderStage, source: &str) -> Result<GlShader, String> {
        self.record(GlCall::CompileShader { stage });
        if let Some((line, text)) = source
            .lines()
            .enumerate()
            .find(|(_, l)| l.contains("#error"))
        {
            let message = text.split("#error").nth(1).unwrap_or("").trim();
            return Err(format!("ERROR: 0:{}: '#error' : {}", line + 1, message));
        }
        let mut state = self.state.lock();
        let id = state.alloc_id();
        state.shaders.insert(id, (stage, source.to_string()));
        Ok(GlShader::mock(id))
    }

    fn link_program(&self, vertex: GlShader, fragment: GlShader) -> Result<GlProgram, String> {
        let mut state = self.state.lock();
        let vs = vertex.mock_id().and_then(|id| state.shaders.remove(&id));
        let fs = fragment.mock_id().and_then(|id| state.shaders.remove(&id));
        if let Some(log) = state.fail_next_link.take() {
            return Err(log);
        }
        let (Some((_, vertex_source)), Some((_, fragment_source))) = (vs, fs) else {
            return Err("link failed: missing shader stage".to_string());
        };
        let id = state.alloc_id();
        let uniforms = scan_uniforms([vertex_source.as_str(), fragment_source.as_str()]);
        state.programs.insert(
            id,
            MockProgram {
                vertex_source,
                fragment_source,
                uniforms,
                values: HashMap::new(),
            },
        );
        self.record(GlCall::LinkProgram { id });
        Ok(GlProgram::mock(id))
    }

    fn delete_program(&self, program: GlProgram) {
        let Some(id) = program.mock_id() else { return };
        let mut state = self.state.lock();
        state.programs.remove(&id);
        if state.current_program == Some(id) {
            state.current_program = None;
        }
        self.record(GlCall::DeleteProgram { id });
    }

    fn use_program(&self, program: Option<GlProgram>) {
        let id = program.and_then(|p| p.mock_id());
        self.state.lock().current_program = id;
        self.record(GlCall::UseProgram { id });
    }

    fn active_uniforms(&self, program: GlProgram) -> Vec<ActiveUniform> {
        program
            .mock_id()
            .and_then(|id| self.state.lock().programs.get(&id).map(|p| p.uniforms.clone()))
            .unwrap_or_default()
    }

    fn uniform_location(&self, program: GlProgram, name: &str) -> Option<GlUniformLocation> {
        let id = program.mock_id()?;
        let state = self.state.lock();
        let known = state
            .programs
            .get(&id)?
            .uniforms
            .iter()
            .any(|u| u.name.trim_end_matches("[0]") == name);
        known.then(|| GlUniformLocation::mock(id, name))
    }

    fn uniform_f32(&self, location: &GlUniformLocation, _components: u32, values: &[f32]) {
        self.set_uniform(location, MockUniform::Float(values.to_vec()));
    }

    fn uniform_i32(&self, location: &GlUniformLocation, _components: u32, values: &[i32]) {
        self.set_uniform(location, MockUniform::Int(values.to_vec()));
    }

    fn uniform_u32(&self, location: &GlUniformLocation, _components: u32, values: &[u32]) {
        self.set_uniform(location, MockUniform::UInt(values.to_vec()));
    }

    fn uniform_matrix(&self, location: &GlUniformLocation, _dim: u32, values: &[f32]) {
        self.set_uniform(location, MockUniform::Float(values.to_vec()));
    }

    fn enable(&self, capability: u32) {
        self.state.lock().enabled.insert(capability);
        self.record(GlCall::Enable(capability));
    }

    fn disable(&self, capability: u32) {
        self.state.lock().enabled.remove(&capability);
        self.record(GlCall::Disable(capability));
    }

    fn blend_func(&self, src: u32, dst: u32) {
        self.record(GlCall::BlendFunc { src, dst });
    }

    fn blend_equation(&self, mode: u32) {
        self.record(GlCall::BlendEquation(mode));
    }

    fn cull_face(&self, face: u32) {
        self.record(GlCall::CullFace(face));
    }

    fn depth_mask(&self, write: bool) {
        self.state.lock().depth_mask = write;
        self.record(GlCall::DepthMask(write));
    }

    fn viewport(&self, x: i32, y: i32, width: i32, height: i32) {
        self.state.lock().viewport = [x, y, width, height];
        self.record(GlCall::Viewport([x, y, width, height]));
    }

    fn scissor(&self, x: i32, y: i32, width: i32, height: i32) {
        self.state.lock().scissor = [x, y, width, height];
        self.record(GlCall::Scissor([x, y, width, height]));
    }

    fn clear(&self, color: [f32; 4], mask: u32) {
        let mut state = self.state.lock();
        let state = &mut *state;
        let targets: Vec<(Option<usize>, u32)> = match state.bound_framebuffer {
            None => vec![(None, 0)],
            Some(fb) => state
                .framebuffers
                .get(&fb)
                .map(|fb| fb.colors.iter().map(|(_, tex, layer)| (Some(*tex), layer.unwrap_or(0))).collect())
                .unwrap_or_default(),
        };
        if mask & glow::COLOR_BUFFER_BIT != 0 {
            for (tex, layer) in targets {
                let rect = match state.texture(tex) {
                    Some(t) => state.clear_rect(t),
                    None => continue,
                };
                if let Some(t) = state.texture_mut(tex) {
                    fill_rect(t, rect, layer, color);
                }
            }
        }
        if mask & glow::DEPTH_BUFFER_BIT != 0 && state.depth_mask {
            let depth = state
                .bound_framebuffer
                .and_then(|fb| state.framebuffers.get(&fb))
                .and_then(|fb| fb.depth);
            if let Some(depth) = depth {
                let rect = match state.textures.get(&depth) {
                    Some(t) => state.clear_rect(t),
                    None => [0, 0, 0, 0],
                };
                if let Some(t) = state.textures.get_mut(&depth) {
                    fill_rect(t, rect, 0, [1.0; 4]);
                }
            }
        }
        self.record(GlCall::Clear { color, mask });
    }

    fn create_buffer(&self) -> Result<GlBuffer, String> {
        let mut state = self.state.lock();
        let id = state.alloc_id();
        state.buffers.insert(id, Vec::new());
        self.record(GlCall::CreateBuffer { id });
        Ok(GlBuffer::mock(id))
    }

    fn delete_buffer(&self, buffer: GlBuffer) {
        let Some(id) = buffer.mock_id() else { return };
        self.state.lock().buffers.remove(&id);
        self.record(GlCall::DeleteBuffer { id });
    }

    fn buffer_data(&self, _target: u32, buffer: GlBuffer, data: &[u8], _usage: u32) {
        let Some(id) = buffer.mock_id() else { return };
        if let Some(storage) = self.state.lock().buffers.get_mut(&id) {
            *storage = data.to_vec();
        }
        self.record(GlCall::BufferData { id, size: data.len() });
    }

    fn buffer_reserve(&self, _target: u32, buffer: GlBuffer, size: usize, _usage: u32) {
        let Some(id) = buffer.mock_id() else { return };
        if let Some(storage) = self.state.lock().buffers.get_mut(&id) {
            *storage = vec![0; size];
        }
        self.record(GlCall::BufferData { id, size });
    }

    fn create_vertex_array(&self) -> Result<GlVertexArray, String> {
        let mut state = self.state.lock();
        let id = state.alloc_id();
        state.vertex_arrays.insert(id);
        self.record(GlCall::CreateVertexArray { id });
        Ok(GlVertexArray::mock(id))
    }

    fn delete_vertex_array(&self, vertex_array: GlVertexArray) {
        let Some(id) = vertex_array.mock_id() else { return };
        self.state.lock().vertex_arrays.remove(&id);
        self.record(GlCall::DeleteVertexArray { id });
    }

    fn bind_vertex_array(&self, vertex_array: Option<GlVertexArray>) {
        self.record(GlCall::BindVertexArray {
            id: vertex_array.and_then(|v| v.mock_id()),
        });
    }

    fn int_attribute(&self, _vertex_array: GlVertexArray, _buffer: GlBuffer, location: u32, divisor: u32) {
        self.record(GlCall::IntAttribute { location, divisor });
    }

    fn draw_arrays_instanced(&self, mode: u32, _first: i32, count: i32, instances: i32) {
        {
            let mut state = self.state.lock();
            self.run_emulator(&mut state);
        }
        self.record(GlCall::DrawArraysInstanced {
            mode,
            count,
            instances,
        });
    }

    fn read_pixels(
        &self,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        format: u32,
        ty: u32,
        destination: PixelPackTarget<'_>,
    ) {
        let mut state = self.state.lock();
        let source = match state.bound_framebuffer {
            None => Some(None),
            Some(fb) => state.framebuffers.get(&fb).and_then(|fb| {
                fb.colors
                    .iter()
                    .find(|(a, _, _)| *a == glow::COLOR_ATTACHMENT0)
                    .map(|(_, tex, _)| Some(*tex))
                    .or(fb.depth.map(Some))
            }),
        };
        let bytes = source
            .and_then(|id| state.texture(id))
            .map(|tex| tex.read(x, y, width, height, format, ty))
            .unwrap_or_default();
        let into_buffer = matches!(destination, PixelPackTarget::Buffer(_));
        match destination {
            PixelPackTarget::Slice(dst) => {
                let n = dst.len().min(bytes.len());
                dst[..n].copy_from_slice(&bytes[..n]);
            }
            PixelPackTarget::Buffer(buffer) => {
                if let Some(storage) = buffer.mock_id().and_then(|id| state.buffers.get_mut(&id)) {
                    let n = storage.len().min(bytes.len());
                    storage[..n].copy_from_slice(&bytes[..n]);
                }
            }
        }
        drop(state);
        self.record(GlCall::ReadPixels {
            width,
            height,
            into_buffer,
        });
    }

    fn fence_sync(&self) -> Result<GlFence, String> {
        let mut state = self.state.lock();
        let id = state.alloc_id();
        let latency = state.fence_latency;
        state.fences.insert(id, latency);
        self.record(GlCall::FenceSync { id });
        Ok(GlFence::mock(id))
    }

    fn client_wait_sync(&self, fence: GlFence, _timeout_ns: i32) -> SyncStatus {
        let Some(id) = fence.mock_id() else {
            return SyncStatus::WaitFailed;
        };
        self.record(GlCall::ClientWaitSync { id });
        let mut state = self.state.lock();
        if state.fail_fence_waits {
            return SyncStatus::WaitFailed;
        }
        match state.fences.get_mut(&id) {
            None => SyncStatus::WaitFailed,
            Some(0) => SyncStatus::Signaled,
            Some(remaining) => {
                *remaining -= 1;
                SyncStatus::TimeoutExpired
            }
        }
    }

    fn delete_sync(&self, fence: GlFence) {
        let Some(id) = fence.mock_id() else { return };
        self.state.lock().fences.remove(&id);
        self.record(GlCall::DeleteSync { id });
    }

    fn flush(&self) {
        self.record(GlCall::Flush);
    }

    fn get_buffer_sub_data(&self, _target: u32, buffer: GlBuffer, offset: i32, destination: &mut [u8]) {
        let Some(id) = buffer.mock_id() else { return };
        if let Some(storage) = self.state.lock().buffers.get(&id) {
            let start = (offset.max(0) as usize).min(storage.len());
            let n = destination.len().min(storage.len() - start);
            destination[..n].copy_from_slice(&storage[start..start + n]);
        }
        self.record(GlCall::GetBufferSubData {
            id,
            len: destination.len(),
        });
    }
}

impl MockGlContext {
    fn set_uniform(&self, location: &GlUniformLocation, value: MockUniform) {
        let Some((program, name)) = location.mock_parts() else {
            return;
        };
        if let Some(p) = self.state.lock().programs.get_mut(&program) {
            p.values.insert(name.to_string(), value);
        }
        self.record(GlCall::SetUniform {
            name: name.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgba8() -> PixelLayout {
        PixelLayout {
            internal_format: glow::RGBA8,
            format: glow::RGBA,
            ty: glow::UNSIGNED_BYTE,
        }
    }

    #[test]
    fn test_mock_creation() {
        let mock = MockGlContext::new(8, 4);
        assert_eq!(mock.drawing_buffer_size(), (8, 4));
        assert_eq!(mock.call_count(), 0);
    }

    #[test]
    fn scissored_clear_only_touches_the_box() {
        let mock = MockGlContext::new(1, 1);
        let tex = mock.create_texture().unwrap();
        mock.tex_image(tex, rgba8(), 4, 4, None, None);
        let fb = mock.create_framebuffer().unwrap();
        mock.bind_framebuffer(Some(fb));
        mock.framebuffer_texture(glow::COLOR_ATTACHMENT0, tex, None);

        mock.enable(glow::SCISSOR_TEST);
        mock.scissor(1, 1, 2, 2);
        mock.clear([1.0, 0.0, 0.0, 1.0], glow::COLOR_BUFFER_BIT);

        assert_eq!(mock.texel(tex, 0, 0, 0), Some([0.0; 4]));
        assert_eq!(mock.texel(tex, 1, 1, 0), Some([1.0, 0.0, 0.0, 1.0]));
        assert_eq!(mock.texel(tex, 3, 3, 0), Some([0.0; 4]));
    }

    #[test]
    fn fences_signal_after_latency() {
        let mock = MockGlContext::new(1, 1);
        mock.set_fence_latency(2);
        let fence = mock.fence_sync().unwrap();
        assert_eq!(mock.client_wait_sync(fence, 0), SyncStatus::TimeoutExpired);
        assert_eq!(mock.client_wait_sync(fence, 0), SyncStatus::TimeoutExpired);
        assert_eq!(mock.client_wait_sync(fence, 0), SyncStatus::Signaled);
        mock.delete_sync(fence);
        assert_eq!(mock.client_wait_sync(fence, 0), SyncStatus::WaitFailed);
    }

    #[test]
    fn pack_buffer_round_trip() {
        let mock = MockGlContext::new(2, 1);
        mock.clear([0.0, 0.0, 1.0, 1.0], glow::COLOR_BUFFER_BIT);
        let buffer = mock.create_buffer().unwrap();
        mock.buffer_reserve(glow::PIXEL_PACK_BUFFER, buffer, 8, glow::STREAM_READ);
        mock.read_pixels(0, 0, 2, 1, glow::RGBA, glow::UNSIGNED_BYTE, PixelPackTarget::Buffer(buffer));

        let mut out = [0u8; 8];
        mock.get_buffer_sub_data(glow::PIXEL_PACK_BUFFER, buffer, 0, &mut out);
        assert_eq!(out, [0, 0, 255, 255, 0, 0, 255, 255]);
    }

    #[test]
    fn compile_error_reports_line() {
        let mock = MockGlContext::new(1, 1);
        let err = mock
            .compile_shader(ShaderStage::Fragment, "void main() {}\n#error nope")
            .unwrap_err();
        assert_eq!(err, "ERROR: 0:2: '#error' : nope");
    }

    #[test]
    fn emulator_runs_inside_viewport() {
        let mock = MockGlContext::new(4, 1);
        mock.register_fragment("MARK", |f| [f.coord[0] as f32 / 4.0, 0.0, 0.0, 1.0]);
        let vs = mock.compile_shader(ShaderStage::Vertex, "void main(){}").unwrap();
        let fs = mock
            .compile_shader(ShaderStage::Fragment, "// MARK\nvoid main(){}")
            .unwrap();
        let program = mock.link_program(vs, fs).unwrap();
        mock.use_program(Some(program));
        mock.viewport(2, 0, 2, 1);
        mock.draw_arrays_instanced(glow::TRIANGLE_STRIP, 0, 4, 1);

        let mut row = [0u8; 16];
        mock.read_pixels(0, 0, 4, 1, glow::RGBA, glow::UNSIGNED_BYTE, PixelPackTarget::Slice(&mut row));
        assert_eq!(&row[0..4], &[0, 0, 0, 0]);
        assert_eq!(&row[8..12], &[128, 0, 0, 255]);
        assert_eq!(mock.count_draws(), 1);
    }
}
