//! Render targets: a texture, its framebuffer and its readback state.

use std::cell::{Cell, OnceCell, RefCell};
use std::fmt;
use std::rc::Rc;

use quadpass_test_utils::{GlContext, GlFramebuffer, GlTexture, PixelPackTarget};

use crate::error::{DrawError, DrawResult, ReadbackError};
use crate::format::{FormatInfo, PixelData, TextureFormat};
use crate::readback::{PackBufferPool, PendingRead, ReadCallback, ReadbackScheduler};
use crate::sampler::{FilterMode, TextureHandle, TextureSampler, WrapMode};

/// Everything needed to create a [`TextureTarget`].
#[derive(Clone)]
pub struct TargetDesc<'a> {
    pub tag: &'a str,
    pub size: [u32; 2],
    pub format: TextureFormat,
    pub filter: FilterMode,
    pub wrap: WrapMode,
    pub layers: Option<u32>,
    pub data: Option<&'a PixelData>,
    /// Create an owned depth companion tagged `<tag>_depth`
    pub with_depth: bool,
    /// Caller-owned depth target to attach
    pub depth: Option<Rc<TextureTarget>>,
}

/// A GPU texture that passes can draw into and sample from.
///
/// Resizing re-specifies storage in place, so samplers taken before a
/// resize keep pointing at the same texture.
pub struct TextureTarget {
    gl: Rc<dyn GlContext>,
    handle: Rc<TextureHandle>,
    info: FormatInfo,
    filter: FilterMode,
    wrap: WrapMode,
    layers: Option<u32>,
    size: Cell<[u32; 2]>,
    depth: Option<Rc<TextureTarget>>,
    owns_depth: bool,
    framebuffer: Cell<Option<GlFramebuffer>>,
    staging: RefCell<Vec<u8>>,
    pool: OnceCell<Rc<PackBufferPool>>,
    readback: Rc<ReadbackScheduler>,
    pool_limit: usize,
}

impl fmt::Debug for TextureTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextureTarget")
            .field("tag", &self.tag())
            .field("format", &self.format())
            .field("size", &self.size.get())
            .field("layers", &self.layers)
            .field("depth", &self.depth.as_ref().map(|d| d.tag().to_string()))
            .field("freed", &self.is_freed())
            .finish()
    }
}

/// Expected upload size in bytes.
pub fn data_bytes(info: &FormatInfo, size: [u32; 2], layers: Option<u32>) -> usize {
    size[0] as usize * size[1] as usize * layers.unwrap_or(1) as usize * info.channels as usize * info.array.byte_size()
}

fn check_data(
    tag: &str,
    info: &FormatInfo,
    size: [u32; 2],
    layers: Option<u32>,
    data: Option<&PixelData>,
) -> DrawResult<()> {
    let Some(data) = data else {
        return Ok(());
    };
    let expected = data_bytes(info, size, layers);
    let actual = data.as_bytes().len();
    if expected != actual || data.kind() != info.array {
        return Err(DrawError::DataSizeMismatch {
            tag: tag.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

impl TextureTarget {
    pub(crate) fn new(
        gl: Rc<dyn GlContext>,
        readback: Rc<ReadbackScheduler>,
        pool_limit: usize,
        desc: TargetDesc<'_>,
    ) -> DrawResult<Self> {
        check_data(desc.tag, &desc.format.info(), desc.size, desc.layers, desc.data)?;
        let (depth, owns_depth) = match desc.depth {
            Some(depth) => (Some(depth), false),
            None if desc.with_depth => {
                let tag = format!("{}_depth", desc.tag);
                let depth = TextureTarget::new(
                    gl.clone(),
                    readback.clone(),
                    pool_limit,
                    TargetDesc {
                        tag: &tag,
                        format: TextureFormat::Depth,
                        layers: None,
                        data: None,
                        with_depth: false,
                        depth: None,
                        ..desc.clone()
                    },
                )?;
                (Some(Rc::new(depth)), true)
            }
            None => (None, false),
        };

        let texture = match gl.create_texture() {
            Ok(texture) => texture,
            Err(err) => {
                if owns_depth
                    && let Some(depth) = &depth
                {
                    depth.free();
                }
                return Err(DrawError::Gl(err));
            }
        };
        let handle = Rc::new(TextureHandle::new(
            texture,
            desc.format,
            desc.layers.is_some(),
            desc.tag.to_string(),
        ));
        let target = Self {
            gl,
            handle,
            info: desc.format.info(),
            filter: desc.filter,
            wrap: desc.wrap,
            layers: desc.layers,
            size: Cell::new(desc.size),
            depth,
            owns_depth,
            framebuffer: Cell::new(None),
            staging: RefCell::new(Vec::new()),
            pool: OnceCell::new(),
            readback,
            pool_limit,
        };
        if let Err(err) = target.update(desc.size, desc.data) {
            target.free();
            return Err(err);
        }
        Ok(target)
    }

    /// Re-specify storage at `size`, uploading `data` when given. An owned
    /// depth companion follows without data.
    pub fn update(&self, size: [u32; 2], data: Option<&PixelData>) -> DrawResult<()> {
        if self.is_freed() {
            return Err(DrawError::FreedTarget(self.tag().to_string()));
        }
        check_data(self.tag(), &self.info, size, self.layers, data)?;
        self.gl.tex_image(
            self.handle.texture,
            self.info.layout(),
            size[0],
            size[1],
            self.layers,
            data.map(PixelData::as_bytes),
        );
        self.size.set(size);
        self.handle.mark_mips_stale();
        if self.owns_depth
            && let Some(depth) = &self.depth
        {
            depth.update(size, None)?;
        }
        Ok(())
    }

    fn attach(&self) {
        let gl = &*self.gl;
        match self.layers {
            None => {
                let attachment = if self.format().is_depth() {
                    glow::DEPTH_ATTACHMENT
                } else {
                    glow::COLOR_ATTACHMENT0
                };
                gl.framebuffer_texture(attachment, self.handle.texture, None);
            }
            Some(layers) => {
                let attachments: Vec<u32> = (0..layers).map(|i| glow::COLOR_ATTACHMENT0 + i).collect();
                for (layer, attachment) in attachments.iter().enumerate() {
                    gl.framebuffer_texture(*attachment, self.handle.texture, Some(layer as u32));
                }
                gl.draw_buffers(&attachments);
            }
        }
    }

    /// Bind this target's framebuffer, creating it on first use. Drawing
    /// binds (`readonly == false`) invalidate the mip chain.
    pub fn bind_target(&self, readonly: bool) -> DrawResult<[u32; 2]> {
        if self.is_freed() {
            return Err(DrawError::FreedTarget(self.tag().to_string()));
        }
        match self.framebuffer.get() {
            Some(fbo) => self.gl.bind_framebuffer(Some(fbo)),
            None => {
                let fbo = self.gl.create_framebuffer().map_err(DrawError::Gl)?;
                self.gl.bind_framebuffer(Some(fbo));
                self.attach();
                if let Some(depth) = &self.depth {
                    depth.attach();
                }
                self.framebuffer.set(Some(fbo));
            }
        }
        if !readonly {
            self.handle.mark_mips_stale();
        }
        Ok(self.size.get())
    }

    /// Sampler with this target's default filter and wrap.
    pub fn sampler(&self) -> TextureSampler {
        TextureSampler::new(self.handle.clone(), self.filter, self.wrap)
    }

    /// Release every GL object. Safe to call more than once.
    pub fn free(&self) {
        if self.is_freed() {
            return;
        }
        self.handle.mark_freed();
        if self.owns_depth
            && let Some(depth) = &self.depth
        {
            depth.free();
        }
        if let Some(fbo) = self.framebuffer.take() {
            self.gl.delete_framebuffer(fbo);
        }
        if let Some(pool) = self.pool.get() {
            pool.invalidate_all();
        }
        self.gl.delete_texture(self.handle.texture);
        tracing::debug!(tag = %self.tag(), "freed target");
    }

    pub fn tag(&self) -> &str {
        &self.handle.tag
    }

    pub fn format(&self) -> TextureFormat {
        self.handle.format
    }

    pub fn info(&self) -> FormatInfo {
        self.info
    }

    pub fn size(&self) -> [u32; 2] {
        self.size.get()
    }

    pub fn layers(&self) -> Option<u32> {
        self.layers
    }

    pub fn depth(&self) -> Option<&Rc<TextureTarget>> {
        self.depth.as_ref()
    }

    pub fn texture(&self) -> GlTexture {
        self.handle.texture
    }

    pub fn is_freed(&self) -> bool {
        self.handle.is_freed()
    }

    /// `[x, y, w, h]` and its element count, whole target when `None`.
    fn region(&self, region: Option<[i32; 4]>) -> Result<([i32; 4], usize), ReadbackError> {
        let [tw, th] = self.size.get();
        let rect = region.unwrap_or([0, 0, tw as i32, th as i32]);
        let [x, y, w, h] = rect;
        let fits = |origin: i32, extent: i32, limit: u32| {
            origin >= 0 && extent > 0 && i64::from(origin) + i64::from(extent) <= i64::from(limit)
        };
        if !fits(x, w, tw) || !fits(y, h, th) {
            return Err(ReadbackError::InvalidRegion);
        }
        Ok((rect, w as usize * h as usize * self.info.channels as usize))
    }

    fn pool(&self) -> &Rc<PackBufferPool> {
        self.pool
            .get_or_init(|| Rc::new(PackBufferPool::new(self.gl.clone(), self.tag(), self.pool_limit)))
    }

    /// Start a non-blocking read of `region` (whole target by default).
    ///
    /// `callback` runs from a later
    /// [`PassContext::poll_readbacks`](crate::PassContext::poll_readbacks),
    /// or before this returns if the fence has already signalled. It
    /// receives `destination` filled in, or a fresh array of the format's
    /// CPU kind. Reads in flight when the target is freed never call back.
    pub fn read(
        &self,
        callback: ReadCallback,
        region: Option<[i32; 4]>,
        destination: Option<PixelData>,
    ) -> Result<(), ReadbackError> {
        if self.is_freed() {
            return Err(ReadbackError::Freed);
        }
        let ([x, y, w, h], n) = self.region(region)?;
        if let Some(dst) = &destination
            && (dst.kind() != self.info.array || dst.len() < n)
        {
            return Err(ReadbackError::InvalidRegion);
        }
        let bytes = n * self.info.array.byte_size();
        self.bind_target(true).map_err(|e| ReadbackError::Gl(e.to_string()))?;
        let pool = self.pool();
        let buffer = pool.acquire(bytes)?;
        self.gl.read_pixels(
            x,
            y,
            w,
            h,
            self.info.format,
            self.info.ty,
            PixelPackTarget::Buffer(buffer.raw()),
        );
        let fence = match self.gl.fence_sync() {
            Ok(fence) => fence,
            Err(err) => {
                pool.recycle(buffer);
                return Err(ReadbackError::Gl(err));
            }
        };
        self.gl.flush();
        self.readback.submit(PendingRead {
            tag: self.tag().to_string(),
            fence,
            buffer,
            pool: pool.clone(),
            len: bytes,
            kind: self.info.array,
            destination,
            callback,
            next_poll: std::time::Instant::now(),
        });
        Ok(())
    }

    /// Blocking read of `region` (whole target by default) through the
    /// target's staging buffer.
    pub fn read_sync(&self, region: Option<[i32; 4]>) -> Result<PixelData, ReadbackError> {
        if self.is_freed() {
            return Err(ReadbackError::Freed);
        }
        let ([x, y, w, h], n) = self.region(region)?;
        let bytes = n * self.info.array.byte_size();
        let mut staging = self.staging.borrow_mut();
        if staging.len() < bytes {
            staging.resize(bytes, 0);
        }
        self.bind_target(true).map_err(|e| ReadbackError::Gl(e.to_string()))?;
        self.gl.read_pixels(
            x,
            y,
            w,
            h,
            self.info.format,
            self.info.ty,
            PixelPackTarget::Slice(&mut staging[..bytes]),
        );
        Ok(PixelData::from_bytes(self.info.array, &staging[..bytes]))
    }
}
