//! Trait abstracting the GL calls made by the engine.

use crate::gl_types::*;

/// Immediate-mode GL operations used by quadpass.
///
/// The surface is deliberately close to GLES 3 / WebGL2: texture units,
/// loose uniforms, framebuffer objects, instanced draws and fenced
/// pixel-pack reads. Enum arguments are raw GL constants from `glow`.
///
/// All methods take `&self` and return owned handles, so the trait is
/// object-safe and a context can be shared as `Rc<dyn GlContext>` between
/// the program cache, the target registry and the readback scheduler.
///
/// # Example
///
/// ```rust,no_run
/// use quadpass_test_utils::GlContext;
///
/// fn clear_to_red(gl: &dyn GlContext) {
///     let (w, h) = gl.drawing_buffer_size();
///     gl.bind_framebuffer(None);
///     gl.viewport(0, 0, w as i32, h as i32);
///     gl.clear([1.0, 0.0, 0.0, 1.0], glow::COLOR_BUFFER_BIT);
/// }
/// ```
pub trait GlContext {
    /// Size of the default framebuffer in pixels.
    fn drawing_buffer_size(&self) -> (u32, u32);

    /// `glPixelStorei`.
    fn pixel_store(&self, parameter: u32, value: i32);

    // Texture operations

    fn create_texture(&self) -> Result<GlTexture, String>;

    fn delete_texture(&self, texture: GlTexture);

    /// (Re)specify the storage of level 0.
    ///
    /// `layers` selects `TEXTURE_2D_ARRAY` storage. The texture handle stays
    /// the same, which is what keeps samplers pointing at a resized target
    /// valid.
    fn tex_image(
        &self,
        texture: GlTexture,
        layout: PixelLayout,
        width: u32,
        height: u32,
        layers: Option<u32>,
        data: Option<&[u8]>,
    );

    fn generate_mipmap(&self, target: u32, texture: GlTexture);

    /// Bind a texture and sampler object to a texture unit. `None` unbinds.
    fn bind_texture_unit(
        &self,
        unit: u32,
        target: u32,
        texture: Option<GlTexture>,
        sampler: Option<GlSampler>,
    );

    fn create_sampler(&self, min_filter: u32, mag_filter: u32, wrap: u32)
    -> Result<GlSampler, String>;

    fn delete_sampler(&self, sampler: GlSampler);

    // Framebuffer operations

    fn create_framebuffer(&self) -> Result<GlFramebuffer, String>;

    fn delete_framebuffer(&self, framebuffer: GlFramebuffer);

    /// Bind for drawing and reading. `None` is the default framebuffer.
    fn bind_framebuffer(&self, framebuffer: Option<GlFramebuffer>);

    /// Attach a texture (or one layer of an array texture) to the bound
    /// framebuffer.
    fn framebuffer_texture(&self, attachment: u32, texture: GlTexture, layer: Option<u32>);

    fn draw_buffers(&self, attachments: &[u32]);

    // Program operations

    /// Compile one stage. The error is the driver info log.
    fn compile_shader(&self, stage: ShaderStage, source: &str) -> Result<GlShader, String>;

    /// Link two compiled stages. The shaders are released either way. The
    /// error is the linker info log.
    fn link_program(&self, vertex: GlShader, fragment: GlShader) -> Result<GlProgram, String>;

    fn delete_program(&self, program: GlProgram);

    fn use_program(&self, program: Option<GlProgram>);

    fn active_uniforms(&self, program: GlProgram) -> Vec<ActiveUniform>;

    fn uniform_location(&self, program: GlProgram, name: &str) -> Option<GlUniformLocation>;

    /// `glUniform{1,2,3,4}fv` with `components` per element.
    fn uniform_f32(&self, location: &GlUniformLocation, components: u32, values: &[f32]);

    /// `glUniform{1,2,3,4}iv`, also used for bools and sampler units.
    fn uniform_i32(&self, location: &GlUniformLocation, components: u32, values: &[i32]);

    /// `glUniform{1,2,3,4}uiv`.
    fn uniform_u32(&self, location: &GlUniformLocation, components: u32, values: &[u32]);

    /// `glUniformMatrix{2,3,4}fv`, column-major.
    fn uniform_matrix(&self, location: &GlUniformLocation, dim: u32, values: &[f32]);

    // Fixed-function state

    fn enable(&self, capability: u32);

    fn disable(&self, capability: u32);

    fn blend_func(&self, src: u32, dst: u32);

    fn blend_equation(&self, mode: u32);

    fn cull_face(&self, face: u32);

    fn depth_mask(&self, write: bool);

    fn viewport(&self, x: i32, y: i32, width: i32, height: i32);

    fn scissor(&self, x: i32, y: i32, width: i32, height: i32);

    /// Set the clear colour and clear `mask` (`COLOR_BUFFER_BIT` and/or
    /// `DEPTH_BUFFER_BIT`).
    fn clear(&self, color: [f32; 4], mask: u32);

    // Geometry

    fn create_buffer(&self) -> Result<GlBuffer, String>;

    fn delete_buffer(&self, buffer: GlBuffer);

    fn buffer_data(&self, target: u32, buffer: GlBuffer, data: &[u8], usage: u32);

    /// Allocate `size` bytes of uninitialized storage.
    fn buffer_reserve(&self, target: u32, buffer: GlBuffer, size: usize, usage: u32);

    fn create_vertex_array(&self) -> Result<GlVertexArray, String>;

    fn delete_vertex_array(&self, vertex_array: GlVertexArray);

    fn bind_vertex_array(&self, vertex_array: Option<GlVertexArray>);

    /// Point a single-int attribute of `vertex_array` at `buffer`.
    fn int_attribute(&self, vertex_array: GlVertexArray, buffer: GlBuffer, location: u32, divisor: u32);

    fn draw_arrays_instanced(&self, mode: u32, first: i32, count: i32, instances: i32);

    // Readback

    /// Read a rectangle of the bound framebuffer's first colour attachment
    /// (or depth for depth-only framebuffers).
    #[allow(clippy::too_many_arguments)]
    fn read_pixels(
        &self,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        format: u32,
        ty: u32,
        destination: PixelPackTarget<'_>,
    );

    fn fence_sync(&self) -> Result<GlFence, String>;

    /// Zero-timeout style wait; `timeout_ns` is passed through.
    fn client_wait_sync(&self, fence: GlFence, timeout_ns: i32) -> SyncStatus;

    fn delete_sync(&self, fence: GlFence);

    fn flush(&self);

    fn get_buffer_sub_data(&self, target: u32, buffer: GlBuffer, offset: i32, destination: &mut [u8]);
}
