//! CPU texel storage for the mock context.
//!
//! Texels are kept as `[f32; 4]` and converted at the upload, render and
//! read boundaries using the GL rules for normalized, float, half-float and
//! integer formats.

use crate::PixelLayout;
use half::f16;

/// Number of components carried by a pixel transfer format.
pub fn format_channels(format: u32) -> usize {
    match format {
        glow::RED | glow::RED_INTEGER | glow::DEPTH_COMPONENT => 1,
        glow::RG | glow::RG_INTEGER => 2,
        glow::RGB | glow::RGB_INTEGER => 3,
        _ => 4,
    }
}

/// Size in bytes of one component of `ty`.
pub fn type_size(ty: u32) -> usize {
    match ty {
        glow::UNSIGNED_BYTE | glow::BYTE => 1,
        glow::UNSIGNED_SHORT | glow::SHORT | glow::HALF_FLOAT => 2,
        _ => 4,
    }
}

fn is_normalized(format: u32, ty: u32) -> bool {
    matches!(
        format,
        glow::RED | glow::RG | glow::RGB | glow::RGBA | glow::DEPTH_COMPONENT
    ) && !matches!(ty, glow::FLOAT | glow::HALF_FLOAT)
}

fn decode_component(format: u32, ty: u32, bytes: &[u8]) -> f32 {
    let norm = is_normalized(format, ty);
    match ty {
        glow::UNSIGNED_BYTE => {
            let v = bytes[0] as f32;
            if norm { v / 255.0 } else { v }
        }
        glow::BYTE => {
            let v = bytes[0] as i8 as f32;
            if norm { (v / 127.0).max(-1.0) } else { v }
        }
        glow::UNSIGNED_SHORT => {
            let v = bytemuck::pod_read_unaligned::<u16>(bytes) as f32;
            if norm { v / 65535.0 } else { v }
        }
        glow::SHORT => {
            let v = bytemuck::pod_read_unaligned::<i16>(bytes) as f32;
            if norm { (v / 32767.0).max(-1.0) } else { v }
        }
        glow::HALF_FLOAT => f16::from_bits(bytemuck::pod_read_unaligned::<u16>(bytes)).to_f32(),
        glow::UNSIGNED_INT => {
            let v = bytemuck::pod_read_unaligned::<u32>(bytes) as f64;
            if norm { (v / u32::MAX as f64) as f32 } else { v as f32 }
        }
        glow::INT => bytemuck::pod_read_unaligned::<i32>(bytes) as f32,
        _ => bytemuck::pod_read_unaligned::<f32>(bytes),
    }
}

fn encode_component(format: u32, ty: u32, value: f32, out: &mut Vec<u8>) {
    let norm = is_normalized(format, ty);
    match ty {
        glow::UNSIGNED_BYTE => {
            let v = if norm {
                (value.clamp(0.0, 1.0) * 255.0).round()
            } else {
                value.round().clamp(0.0, 255.0)
            };
            out.push(v as u8);
        }
        glow::BYTE => {
            let v = if norm {
                (value.clamp(-1.0, 1.0) * 127.0).round()
            } else {
                value.round().clamp(-128.0, 127.0)
            };
            out.push(v as i8 as u8);
        }
        glow::UNSIGNED_SHORT => {
            let v = if norm {
                (value.clamp(0.0, 1.0) * 65535.0).round()
            } else {
                value.round().clamp(0.0, 65535.0)
            };
            out.extend_from_slice(bytemuck::bytes_of(&(v as u16)));
        }
        glow::SHORT => {
            let v = if norm {
                (value.clamp(-1.0, 1.0) * 32767.0).round()
            } else {
                value.round().clamp(-32768.0, 32767.0)
            };
            out.extend_from_slice(bytemuck::bytes_of(&(v as i16)));
        }
        glow::HALF_FLOAT => {
            out.extend_from_slice(bytemuck::bytes_of(&f16::from_f32(value).to_bits()));
        }
        glow::UNSIGNED_INT => {
            let v = if norm {
                (value.clamp(0.0, 1.0) as f64 * u32::MAX as f64).round() as u32
            } else {
                value.round().max(0.0) as u32
            };
            out.extend_from_slice(bytemuck::bytes_of(&v));
        }
        glow::INT => out.extend_from_slice(bytemuck::bytes_of(&(value.round() as i32))),
        _ => out.extend_from_slice(bytemuck::bytes_of(&value)),
    }
}

/// Texture storage of one mock texture.
#[derive(Debug, Clone)]
pub(crate) struct MockTexture {
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub layered: bool,
    pub layout: PixelLayout,
    pub texels: Vec<[f32; 4]>,
    pub has_mipmaps: bool,
}

impl MockTexture {
    pub fn empty() -> Self {
        Self {
            width: 0,
            height: 0,
            layers: 1,
            layered: false,
            layout: PixelLayout {
                internal_format: glow::RGBA8,
                format: glow::RGBA,
                ty: glow::UNSIGNED_BYTE,
            },
            texels: Vec::new(),
            has_mipmaps: false,
        }
    }

    pub fn channels(&self) -> usize {
        format_channels(self.layout.format)
    }

    /// Respecify storage, decoding `data` when present.
    pub fn specify(&mut self, layout: PixelLayout, width: u32, height: u32, layers: Option<u32>, data: Option<&[u8]>) {
        self.layout = layout;
        self.width = width;
        self.height = height;
        self.layered = layers.is_some();
        self.layers = layers.unwrap_or(1).max(1);
        self.has_mipmaps = false;
        let count = (width * height * self.layers) as usize;
        self.texels = vec![[0.0; 4]; count];
        if let Some(data) = data {
            let chn = self.channels();
            let size = type_size(layout.ty);
            for (i, pixel) in data.chunks_exact(chn * size).take(count).enumerate() {
                for (c, comp) in pixel.chunks_exact(size).enumerate() {
                    self.texels[i][c] = decode_component(layout.format, layout.ty, comp);
                }
            }
        }
    }

    fn index(&self, x: i32, y: i32, layer: u32) -> Option<usize> {
        if x < 0 || y < 0 || x as u32 >= self.width || y as u32 >= self.height || layer >= self.layers {
            return None;
        }
        Some(((layer * self.height + y as u32) * self.width + x as u32) as usize)
    }

    /// Texel fetch with GL's component fill: missing colour channels read
    /// as 0 and missing alpha as 1. Coordinates are clamped to the edge.
    pub fn fetch(&self, x: i32, y: i32, layer: u32) -> [f32; 4] {
        if self.width == 0 || self.height == 0 {
            return [0.0, 0.0, 0.0, 1.0];
        }
        let x = x.clamp(0, self.width as i32 - 1);
        let y = y.clamp(0, self.height as i32 - 1);
        let layer = layer.min(self.layers - 1);
        let Some(i) = self.index(x, y, layer) else {
            return [0.0, 0.0, 0.0, 1.0];
        };
        let mut texel = self.texels[i];
        for (c, v) in texel.iter_mut().enumerate().skip(self.channels()) {
            *v = if c == 3 { 1.0 } else { 0.0 };
        }
        texel
    }

    /// Store a rendered or cleared value, quantized to the storage format.
    pub fn store(&mut self, x: i32, y: i32, layer: u32, value: [f32; 4]) {
        let Some(i) = self.index(x, y, layer) else {
            return;
        };
        let mut bytes = Vec::with_capacity(16);
        let mut texel = [0.0; 4];
        for (c, slot) in texel.iter_mut().enumerate().take(self.channels()) {
            bytes.clear();
            encode_component(self.layout.format, self.layout.ty, value[c], &mut bytes);
            *slot = decode_component(self.layout.format, self.layout.ty, &bytes);
        }
        self.texels[i] = texel;
    }

    /// Encode a rectangle of layer 0 using a read `format`/`ty` pair.
    pub fn read(&self, x: i32, y: i32, width: i32, height: i32, format: u32, ty: u32) -> Vec<u8> {
        let chn = format_channels(format);
        let mut out = Vec::with_capacity((width * height) as usize * chn * type_size(ty));
        for row in y..y + height {
            for col in x..x + width {
                let texel = self.fetch(col, row, 0);
                for value in texel.iter().take(chn) {
                    encode_component(format, ty, *value, &mut out);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(internal_format: u32, format: u32, ty: u32) -> PixelLayout {
        PixelLayout {
            internal_format,
            format,
            ty,
        }
    }

    #[test]
    fn normalized_bytes_quantize_on_store() {
        let mut tex = MockTexture::empty();
        tex.specify(layout(glow::RGBA8, glow::RGBA, glow::UNSIGNED_BYTE), 1, 1, None, None);
        tex.store(0, 0, 0, [2.0, 0.5, -1.0, 1.0]);
        assert_eq!(tex.read(0, 0, 1, 1, glow::RGBA, glow::UNSIGNED_BYTE), vec![255, 128, 0, 255]);
    }

    #[test]
    fn half_float_upload_decodes() {
        let mut tex = MockTexture::empty();
        let data: Vec<u8> = [f16::from_f32(1.5).to_bits(), f16::from_f32(-2.0).to_bits()]
            .iter()
            .flat_map(|v| v.to_ne_bytes())
            .collect();
        tex.specify(layout(glow::R16F, glow::RED, glow::HALF_FLOAT), 2, 1, None, Some(&data));
        assert_eq!(tex.fetch(0, 0, 0), [1.5, 0.0, 0.0, 1.0]);
        assert_eq!(tex.fetch(1, 0, 0)[0], -2.0);
    }

    #[test]
    fn fetch_clamps_to_edge() {
        let mut tex = MockTexture::empty();
        let data: Vec<u8> = [1.0f32, 2.0].iter().flat_map(|v| v.to_ne_bytes()).collect();
        tex.specify(layout(glow::R32F, glow::RED, glow::FLOAT), 2, 1, None, Some(&data));
        assert_eq!(tex.fetch(-5, 0, 0)[0], 1.0);
        assert_eq!(tex.fetch(9, 3, 0)[0], 2.0);
    }
}
