//! [`GlContext`] over a real `glow` context.
//!
//! This is the backend used outside tests: desktop OpenGL 3.3+, GLES 3 or
//! WebGL2, whatever `glow::Context` was created for. The host owns the
//! window and tells the context its drawing-buffer size.

use std::cell::Cell;

use glow::{HasContext, PixelPackData, PixelUnpackData};
use quadpass_test_utils::{
    ActiveUniform, GlBuffer, GlContext, GlFence, GlFramebuffer, GlProgram, GlSampler, GlShader,
    GlTexture, GlUniformLocation, GlVertexArray, PixelLayout, PixelPackTarget, ShaderStage, SyncStatus,
};

/// A `glow::Context` plus the size of the surface it draws to.
pub struct GlowContext {
    gl: glow::Context,
    drawing_buffer: Cell<(u32, u32)>,
}

impl GlowContext {
    pub fn new(gl: glow::Context, width: u32, height: u32) -> Self {
        Self {
            gl,
            drawing_buffer: Cell::new((width, height)),
        }
    }

    /// Call after the host resized its surface.
    pub fn set_drawing_buffer_size(&self, width: u32, height: u32) {
        self.drawing_buffer.set((width, height));
    }

    pub fn raw(&self) -> &glow::Context {
        &self.gl
    }
}

fn texture_target(layers: Option<u32>) -> u32 {
    if layers.is_some() {
        glow::TEXTURE_2D_ARRAY
    } else {
        glow::TEXTURE_2D
    }
}

impl GlContext for GlowContext {
    fn drawing_buffer_size(&self) -> (u32, u32) {
        self.drawing_buffer.get()
    }

    fn pixel_store(&self, parameter: u32, value: i32) {
        unsafe { self.gl.pixel_store_i32(parameter, value) }
    }

    fn create_texture(&self) -> Result<GlTexture, String> {
        unsafe { self.gl.create_texture() }.map(GlTexture::from_glow)
    }

    fn delete_texture(&self, texture: GlTexture) {
        unsafe { self.gl.delete_texture(texture.as_glow()) }
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
        let target = texture_target(layers);
        unsafe {
            self.gl.bind_texture(target, Some(texture.as_glow()));
            match layers {
                Some(depth) => self.gl.tex_image_3d(
                    target,
                    0,
                    layout.internal_format as i32,
                    width as i32,
                    height as i32,
                    depth as i32,
                    0,
                    layout.format,
                    layout.ty,
                    PixelUnpackData::Slice(data),
                ),
                None => self.gl.tex_image_2d(
                    target,
                    0,
                    layout.internal_format as i32,
                    width as i32,
                    height as i32,
                    0,
                    layout.format,
                    layout.ty,
                    PixelUnpackData::Slice(data),
                ),
            }
            self.gl.bind_texture(target, None);
        }
    }

    fn generate_mipmap(&self, target: u32, texture: GlTexture) {
        unsafe {
            self.gl.bind_texture(target, Some(texture.as_glow()));
            self.gl.generate_mipmap(target);
        }
    }

    fn bind_texture_unit(&self, unit: u32, target: u32, texture: Option<GlTexture>, sampler: Option<GlSampler>) {
        unsafe {
            self.gl.active_texture(glow::TEXTURE0 + unit);
            self.gl.bind_texture(target, texture.map(|t| t.as_glow()));
            self.gl.bind_sampler(unit, sampler.map(|s| s.as_glow()));
        }
    }

    fn create_sampler(&self, min_filter: u32, mag_filter: u32, wrap: u32) -> Result<GlSampler, String> {
        unsafe {
            let sampler = self.gl.create_sampler()?;
            self.gl.sampler_parameter_i32(sampler, glow::TEXTURE_MIN_FILTER, min_filter as i32);
            self.gl.sampler_parameter_i32(sampler, glow::TEXTURE_MAG_FILTER, mag_filter as i32);
            self.gl.sampler_parameter_i32(sampler, glow::TEXTURE_WRAP_S, wrap as i32);
            self.gl.sampler_parameter_i32(sampler, glow::TEXTURE_WRAP_T, wrap as i32);
            Ok(GlSampler::from_glow(sampler))
        }
    }

    fn delete_sampler(&self, sampler: GlSampler) {
        unsafe { self.gl.delete_sampler(sampler.as_glow()) }
    }

    fn create_framebuffer(&self) -> Result<GlFramebuffer, String> {
        unsafe { self.gl.create_framebuffer() }.map(GlFramebuffer::from_glow)
    }

    fn delete_framebuffer(&self, framebuffer: GlFramebuffer) {
        unsafe { self.gl.delete_framebuffer(framebuffer.as_glow()) }
    }

    fn bind_framebuffer(&self, framebuffer: Option<GlFramebuffer>) {
        unsafe {
            self.gl
                .bind_framebuffer(glow::FRAMEBUFFER, framebuffer.map(|f| f.as_glow()))
        }
    }

    fn framebuffer_texture(&self, attachment: u32, texture: GlTexture, layer: Option<u32>) {
        unsafe {
            match layer {
                Some(layer) => self.gl.framebuffer_texture_layer(
                    glow::FRAMEBUFFER,
                    attachment,
                    Some(texture.as_glow()),
                    0,
                    layer as i32,
                ),
                None => self.gl.framebuffer_texture_2d(
                    glow::FRAMEBUFFER,
                    attachment,
                    glow::TEXTURE_2D,
                    Some(texture.as_glow()),
                    0,
                ),
            }
        }
    }

    fn draw_buffers(&self, attachments: &[u32]) {
        unsafe { self.gl.draw_buffers(attachments) }
    }

    fn compile_shader(&self, stage: ShaderStage, source: &str) -> Result<GlShader, String> {
        unsafe {
            let shader = self.gl.create_shader(stage.gl_enum())?;
            self.gl.shader_source(shader, source);
            self.gl.compile_shader(shader);
            if !self.gl.get_shader_compile_status(shader) {
                let log = self.gl.get_shader_info_log(shader);
                self.gl.delete_shader(shader);
                return Err(log);
            }
            Ok(GlShader::from_glow(shader))
        }
    }

    fn link_program(&self, vertex: GlShader, fragment: GlShader) -> Result<GlProgram, String> {
        let (vertex, fragment) = (vertex.as_glow(), fragment.as_glow());
        unsafe {
            let program = match self.gl.create_program() {
                Ok(program) => program,
                Err(err) => {
                    self.gl.delete_shader(vertex);
                    self.gl.delete_shader(fragment);
                    return Err(err);
                }
            };
            self.gl.attach_shader(program, vertex);
            self.gl.attach_shader(program, fragment);
            self.gl.link_program(program);
            self.gl.detach_shader(program, vertex);
            self.gl.detach_shader(program, fragment);
            self.gl.delete_shader(vertex);
            self.gl.delete_shader(fragment);
            if !self.gl.get_program_link_status(program) {
                let log = self.gl.get_program_info_log(program);
                self.gl.delete_program(program);
                return Err(log);
            }
            Ok(GlProgram::from_glow(program))
        }
    }

    fn delete_program(&self, program: GlProgram) {
        unsafe { self.gl.delete_program(program.as_glow()) }
    }

    fn use_program(&self, program: Option<GlProgram>) {
        unsafe { self.gl.use_program(program.map(|p| p.as_glow())) }
    }

    fn active_uniforms(&self, program: GlProgram) -> Vec<ActiveUniform> {
        let program = program.as_glow();
        unsafe {
            (0..self.gl.get_active_uniforms(program))
                .filter_map(|index| self.gl.get_active_uniform(program, index))
                .map(|u| ActiveUniform {
                    name: u.name,
                    utype: u.utype,
                    size: u.size,
                })
                .collect()
        }
    }

    fn uniform_location(&self, program: GlProgram, name: &str) -> Option<GlUniformLocation> {
        unsafe { self.gl.get_uniform_location(program.as_glow(), name) }.map(GlUniformLocation::from_glow)
    }

    fn uniform_f32(&self, location: &GlUniformLocation, components: u32, values: &[f32]) {
        let loc = Some(location.as_glow());
        unsafe {
            match components {
                1 => self.gl.uniform_1_f32_slice(loc, values),
                2 => self.gl.uniform_2_f32_slice(loc, values),
                3 => self.gl.uniform_3_f32_slice(loc, values),
                _ => self.gl.uniform_4_f32_slice(loc, values),
            }
        }
    }

    fn uniform_i32(&self, location: &GlUniformLocation, components: u32, values: &[i32]) {
        let loc = Some(location.as_glow());
        unsafe {
            match components {
                1 => self.gl.uniform_1_i32_slice(loc, values),
                2 => self.gl.uniform_2_i32_slice(loc, values),
                3 => self.gl.uniform_3_i32_slice(loc, values),
                _ => self.gl.uniform_4_i32_slice(loc, values),
            }
        }
    }

    fn uniform_u32(&self, location: &GlUniformLocation, components: u32, values: &[u32]) {
        let loc = Some(location.as_glow());
        unsafe {
            match components {
                1 => self.gl.uniform_1_u32_slice(loc, values),
                2 => self.gl.uniform_2_u32_slice(loc, values),
                3 => self.gl.uniform_3_u32_slice(loc, values),
                _ => self.gl.uniform_4_u32_slice(loc, values),
            }
        }
    }

    fn uniform_matrix(&self, location: &GlUniformLocation, dim: u32, values: &[f32]) {
        let loc = Some(location.as_glow());
        unsafe {
            match dim {
                2 => self.gl.uniform_matrix_2_f32_slice(loc, false, values),
                3 => self.gl.uniform_matrix_3_f32_slice(loc, false, values),
                _ => self.gl.uniform_matrix_4_f32_slice(loc, false, values),
            }
        }
    }

    fn enable(&self, capability: u32) {
        unsafe { self.gl.enable(capability) }
    }

    fn disable(&self, capability: u32) {
        unsafe { self.gl.disable(capability) }
    }

    fn blend_func(&self, src: u32, dst: u32) {
        unsafe { self.gl.blend_func(src, dst) }
    }

    fn blend_equation(&self, mode: u32) {
        unsafe { self.gl.blend_equation(mode) }
    }

    fn cull_face(&self, face: u32) {
        unsafe { self.gl.cull_face(face) }
    }

    fn depth_mask(&self, write: bool) {
        unsafe { self.gl.depth_mask(write) }
    }

    fn viewport(&self, x: i32, y: i32, width: i32, height: i32) {
        unsafe { self.gl.viewport(x, y, width, height) }
    }

    fn scissor(&self, x: i32, y: i32, width: i32, height: i32) {
        unsafe { self.gl.scissor(x, y, width, height) }
    }

    fn clear(&self, color: [f32; 4], mask: u32) {
        let [r, g, b, a] = color;
        unsafe {
            self.gl.clear_color(r, g, b, a);
            self.gl.clear(mask);
        }
    }

    fn create_buffer(&self) -> Result<GlBuffer, String> {
        unsafe { self.gl.create_buffer() }.map(GlBuffer::from_glow)
    }

    fn delete_buffer(&self, buffer: GlBuffer) {
        unsafe { self.gl.delete_buffer(buffer.as_glow()) }
    }

    fn buffer_data(&self, target: u32, buffer: GlBuffer, data: &[u8], usage: u32) {
        unsafe {
            self.gl.bind_buffer(target, Some(buffer.as_glow()));
            self.gl.buffer_data_u8_slice(target, data, usage);
            self.gl.bind_buffer(target, None);
        }
    }

    fn buffer_reserve(&self, target: u32, buffer: GlBuffer, size: usize, usage: u32) {
        unsafe {
            self.gl.bind_buffer(target, Some(buffer.as_glow()));
            self.gl.buffer_data_size(target, size as i32, usage);
            self.gl.bind_buffer(target, None);
        }
    }

    fn create_vertex_array(&self) -> Result<GlVertexArray, String> {
        unsafe { self.gl.create_vertex_array() }.map(GlVertexArray::from_glow)
    }

    fn delete_vertex_array(&self, vertex_array: GlVertexArray) {
        unsafe { self.gl.delete_vertex_array(vertex_array.as_glow()) }
    }

    fn bind_vertex_array(&self, vertex_array: Option<GlVertexArray>) {
        unsafe { self.gl.bind_vertex_array(vertex_array.map(|v| v.as_glow())) }
    }

    fn int_attribute(&self, vertex_array: GlVertexArray, buffer: GlBuffer, location: u32, divisor: u32) {
        unsafe {
            self.gl.bind_vertex_array(Some(vertex_array.as_glow()));
            self.gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffer.as_glow()));
            self.gl.enable_vertex_attrib_array(location);
            self.gl.vertex_attrib_pointer_i32(location, 1, glow::INT, 0, 0);
            self.gl.vertex_attrib_divisor(location, divisor);
            self.gl.bind_buffer(glow::ARRAY_BUFFER, None);
            self.gl.bind_vertex_array(None);
        }
    }

    fn draw_arrays_instanced(&self, mode: u32, first: i32, count: i32, instances: i32) {
        unsafe { self.gl.draw_arrays_instanced(mode, first, count, instances) }
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
        unsafe {
            match destination {
                PixelPackTarget::Slice(slice) => {
                    self.gl
                        .read_pixels(x, y, width, height, format, ty, PixelPackData::Slice(Some(slice)))
                }
                PixelPackTarget::Buffer(buffer) => {
                    self.gl.bind_buffer(glow::PIXEL_PACK_BUFFER, Some(buffer.as_glow()));
                    self.gl
                        .read_pixels(x, y, width, height, format, ty, PixelPackData::BufferOffset(0));
                    self.gl.bind_buffer(glow::PIXEL_PACK_BUFFER, None);
                }
            }
        }
    }

    fn fence_sync(&self) -> Result<GlFence, String> {
        unsafe { self.gl.fence_sync(glow::SYNC_GPU_COMMANDS_COMPLETE, 0) }.map(GlFence::from_glow)
    }

    fn client_wait_sync(&self, fence: GlFence, timeout_ns: i32) -> SyncStatus {
        match unsafe { self.gl.client_wait_sync(fence.as_glow(), 0, timeout_ns) } {
            glow::ALREADY_SIGNALED | glow::CONDITION_SATISFIED => SyncStatus::Signaled,
            glow::TIMEOUT_EXPIRED => SyncStatus::TimeoutExpired,
            _ => SyncStatus::WaitFailed,
        }
    }

    fn delete_sync(&self, fence: GlFence) {
        unsafe { self.gl.delete_sync(fence.as_glow()) }
    }

    fn flush(&self) {
        unsafe { self.gl.flush() }
    }

    fn get_buffer_sub_data(&self, target: u32, buffer: GlBuffer, offset: i32, destination: &mut [u8]) {
        unsafe {
            self.gl.bind_buffer(target, Some(buffer.as_glow()));
            self.gl.get_buffer_sub_data(target, offset, destination);
            self.gl.bind_buffer(target, None);
        }
    }
}
