//! Texture formats and CPU pixel arrays.
//!
//! Formats are named the way shaders think about them: channel letters
//! followed by the storage kind, e.g. `r8`, `rgba16f`, `rg32f`, `r32ui`.
//! `depth` is a 24-bit depth attachment. A `+depth` suffix on a target
//! format requests a depth companion (see [`TargetFormat`]).

use std::fmt;
use std::str::FromStr;

use half::f16;

/// Per-channel storage of a colour format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    /// 8-bit normalized.
    Unorm8,
    Half,
    Float,
    Int8,
    Int16,
    Int32,
    Uint8,
    Uint16,
    Uint32,
}

/// Element type of the CPU array a format uploads from and reads into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CpuArrayKind {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
}

impl CpuArrayKind {
    pub fn byte_size(self) -> usize {
        match self {
            CpuArrayKind::U8 | CpuArrayKind::I8 => 1,
            CpuArrayKind::U16 | CpuArrayKind::I16 => 2,
            CpuArrayKind::U32 | CpuArrayKind::I32 | CpuArrayKind::F32 => 4,
        }
    }
}

/// Storage format of a single texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Color { channels: u8, scalar: ScalarKind },
    Depth,
}

/// Immutable GL description of a [`TextureFormat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FormatInfo {
    pub internal_format: u32,
    pub format: u32,
    pub ty: u32,
    pub array: CpuArrayKind,
    pub channels: u32,
}

impl FormatInfo {
    pub fn layout(&self) -> quadpass_test_utils::PixelLayout {
        quadpass_test_utils::PixelLayout {
            internal_format: self.internal_format,
            format: self.format,
            ty: self.ty,
        }
    }
}

impl TextureFormat {
    pub const R8: Self = Self::color(1, ScalarKind::Unorm8);
    pub const RGBA8: Self = Self::color(4, ScalarKind::Unorm8);
    pub const R16F: Self = Self::color(1, ScalarKind::Half);
    pub const RGBA16F: Self = Self::color(4, ScalarKind::Half);
    pub const R32F: Self = Self::color(1, ScalarKind::Float);
    pub const RG32F: Self = Self::color(2, ScalarKind::Float);
    pub const RGBA32F: Self = Self::color(4, ScalarKind::Float);

    const fn color(channels: u8, scalar: ScalarKind) -> Self {
        Self::Color { channels, scalar }
    }

    pub fn is_depth(self) -> bool {
        matches!(self, TextureFormat::Depth)
    }

    /// Integer formats are sampled through `isampler*`/`usampler*`.
    pub fn sampler_prefix(self) -> &'static str {
        match self {
            TextureFormat::Color { scalar, .. } => match scalar {
                ScalarKind::Int8 | ScalarKind::Int16 | ScalarKind::Int32 => "i",
                ScalarKind::Uint8 | ScalarKind::Uint16 | ScalarKind::Uint32 => "u",
                _ => "",
            },
            TextureFormat::Depth => "",
        }
    }

    pub fn channels(self) -> u32 {
        match self {
            TextureFormat::Color { channels, .. } => channels as u32,
            TextureFormat::Depth => 1,
        }
    }

    pub fn info(self) -> FormatInfo {
        let (scalar, channels) = match self {
            TextureFormat::Depth => {
                return FormatInfo {
                    internal_format: glow::DEPTH_COMPONENT24,
                    format: glow::DEPTH_COMPONENT,
                    ty: glow::UNSIGNED_INT,
                    array: CpuArrayKind::U32,
                    channels: 1,
                };
            }
            TextureFormat::Color { channels, scalar } => (scalar, channels as usize),
        };
        let idx = channels - 1;
        let integer = !matches!(scalar, ScalarKind::Unorm8 | ScalarKind::Half | ScalarKind::Float);
        let format = if integer {
            [glow::RED_INTEGER, glow::RG_INTEGER, glow::RGB_INTEGER, glow::RGBA_INTEGER][idx]
        } else {
            [glow::RED, glow::RG, glow::RGB, glow::RGBA][idx]
        };
        let (internal, ty, array) = match scalar {
            ScalarKind::Unorm8 => (
                [glow::R8, glow::RG8, glow::RGB8, glow::RGBA8],
                glow::UNSIGNED_BYTE,
                CpuArrayKind::U8,
            ),
            ScalarKind::Half => (
                [glow::R16F, glow::RG16F, glow::RGB16F, glow::RGBA16F],
                glow::HALF_FLOAT,
                CpuArrayKind::U16,
            ),
            ScalarKind::Float => (
                [glow::R32F, glow::RG32F, glow::RGB32F, glow::RGBA32F],
                glow::FLOAT,
                CpuArrayKind::F32,
            ),
            ScalarKind::Int8 => ([glow::R8I, glow::RG8I, glow::RGB8I, glow::RGBA8I], glow::BYTE, CpuArrayKind::I8),
            ScalarKind::Int16 => (
                [glow::R16I, glow::RG16I, glow::RGB16I, glow::RGBA16I],
                glow::SHORT,
                CpuArrayKind::I16,
            ),
            ScalarKind::Int32 => ([glow::R32I, glow::RG32I, glow::RGB32I, glow::RGBA32I], glow::INT, CpuArrayKind::I32),
            ScalarKind::Uint8 => (
                [glow::R8UI, glow::RG8UI, glow::RGB8UI, glow::RGBA8UI],
                glow::UNSIGNED_BYTE,
                CpuArrayKind::U8,
            ),
            ScalarKind::Uint16 => (
                [glow::R16UI, glow::RG16UI, glow::RGB16UI, glow::RGBA16UI],
                glow::UNSIGNED_SHORT,
                CpuArrayKind::U16,
            ),
            ScalarKind::Uint32 => (
                [glow::R32UI, glow::RG32UI, glow::RGB32UI, glow::RGBA32UI],
                glow::UNSIGNED_INT,
                CpuArrayKind::U32,
            ),
        };
        FormatInfo {
            internal_format: internal[idx],
            format,
            ty,
            array,
            channels: channels as u32,
        }
    }
}

/// Error for a format name outside the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownFormat(pub String);

impl fmt::Display for UnknownFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown texture format \"{}\"", self.0)
    }
}

impl std::error::Error for UnknownFormat {}

impl FromStr for TextureFormat {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "depth" {
            return Ok(TextureFormat::Depth);
        }
        let unknown = || UnknownFormat(s.to_string());
        let (channels, rest) = ["rgba", "rgb", "rg", "r"]
            .iter()
            .find_map(|prefix| s.strip_prefix(prefix).map(|rest| (prefix.len() as u8, rest)))
            .ok_or_else(unknown)?;
        let scalar = match rest {
            "8" => ScalarKind::Unorm8,
            "16f" => ScalarKind::Half,
            "32f" => ScalarKind::Float,
            "8i" => ScalarKind::Int8,
            "16i" => ScalarKind::Int16,
            "32i" => ScalarKind::Int32,
            "8ui" => ScalarKind::Uint8,
            "16ui" => ScalarKind::Uint16,
            "32ui" => ScalarKind::Uint32,
            _ => return Err(unknown()),
        };
        Ok(TextureFormat::Color { channels, scalar })
    }
}

impl fmt::Display for TextureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (channels, scalar) = match self {
            TextureFormat::Depth => return f.write_str("depth"),
            TextureFormat::Color { channels, scalar } => (*channels, *scalar),
        };
        let letters = ["r", "rg", "rgb", "rgba"][channels as usize - 1];
        let suffix = match scalar {
            ScalarKind::Unorm8 => "8",
            ScalarKind::Half => "16f",
            ScalarKind::Float => "32f",
            ScalarKind::Int8 => "8i",
            ScalarKind::Int16 => "16i",
            ScalarKind::Int32 => "32i",
            ScalarKind::Uint8 => "8ui",
            ScalarKind::Uint16 => "16ui",
            ScalarKind::Uint32 => "32ui",
        };
        write!(f, "{letters}{suffix}")
    }
}

/// Format of a render target, optionally with a depth companion.
///
/// `"rgba16f+depth"` parses to an `rgba16f` colour texture plus an owned
/// `depth` texture of the same size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetFormat {
    pub color: TextureFormat,
    pub with_depth: bool,
}

impl FromStr for TargetFormat {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('+') {
            None => Ok(TargetFormat {
                color: s.parse()?,
                with_depth: false,
            }),
            Some((color, "depth")) => Ok(TargetFormat {
                color: color.parse()?,
                with_depth: true,
            }),
            Some(_) => Err(UnknownFormat(s.to_string())),
        }
    }
}

/// Typed CPU pixel array matching a format's [`CpuArrayKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum PixelData {
    U8(Vec<u8>),
    I8(Vec<i8>),
    U16(Vec<u16>),
    I16(Vec<i16>),
    U32(Vec<u32>),
    I32(Vec<i32>),
    F32(Vec<f32>),
}

impl PixelData {
    pub fn zeroed(kind: CpuArrayKind, len: usize) -> Self {
        match kind {
            CpuArrayKind::U8 => PixelData::U8(vec![0; len]),
            CpuArrayKind::I8 => PixelData::I8(vec![0; len]),
            CpuArrayKind::U16 => PixelData::U16(vec![0; len]),
            CpuArrayKind::I16 => PixelData::I16(vec![0; len]),
            CpuArrayKind::U32 => PixelData::U32(vec![0; len]),
            CpuArrayKind::I32 => PixelData::I32(vec![0; len]),
            CpuArrayKind::F32 => PixelData::F32(vec![0.0; len]),
        }
    }

    /// Reinterpret raw bytes as `kind` elements.
    pub fn from_bytes(kind: CpuArrayKind, bytes: &[u8]) -> Self {
        match kind {
            CpuArrayKind::U8 => PixelData::U8(bytes.to_vec()),
            CpuArrayKind::I8 => PixelData::I8(bytemuck::pod_collect_to_vec(bytes)),
            CpuArrayKind::U16 => PixelData::U16(bytemuck::pod_collect_to_vec(bytes)),
            CpuArrayKind::I16 => PixelData::I16(bytemuck::pod_collect_to_vec(bytes)),
            CpuArrayKind::U32 => PixelData::U32(bytemuck::pod_collect_to_vec(bytes)),
            CpuArrayKind::I32 => PixelData::I32(bytemuck::pod_collect_to_vec(bytes)),
            CpuArrayKind::F32 => PixelData::F32(bytemuck::pod_collect_to_vec(bytes)),
        }
    }

    pub fn kind(&self) -> CpuArrayKind {
        match self {
            PixelData::U8(_) => CpuArrayKind::U8,
            PixelData::I8(_) => CpuArrayKind::I8,
            PixelData::U16(_) => CpuArrayKind::U16,
            PixelData::I16(_) => CpuArrayKind::I16,
            PixelData::U32(_) => CpuArrayKind::U32,
            PixelData::I32(_) => CpuArrayKind::I32,
            PixelData::F32(_) => CpuArrayKind::F32,
        }
    }

    /// Number of elements (not bytes).
    pub fn len(&self) -> usize {
        match self {
            PixelData::U8(v) => v.len(),
            PixelData::I8(v) => v.len(),
            PixelData::U16(v) => v.len(),
            PixelData::I16(v) => v.len(),
            PixelData::U32(v) => v.len(),
            PixelData::I32(v) => v.len(),
            PixelData::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            PixelData::U8(v) => v,
            PixelData::I8(v) => bytemuck::cast_slice(v),
            PixelData::U16(v) => bytemuck::cast_slice(v),
            PixelData::I16(v) => bytemuck::cast_slice(v),
            PixelData::U32(v) => bytemuck::cast_slice(v),
            PixelData::I32(v) => bytemuck::cast_slice(v),
            PixelData::F32(v) => bytemuck::cast_slice(v),
        }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        match self {
            PixelData::U8(v) => v,
            PixelData::I8(v) => bytemuck::cast_slice_mut(v),
            PixelData::U16(v) => bytemuck::cast_slice_mut(v),
            PixelData::I16(v) => bytemuck::cast_slice_mut(v),
            PixelData::U32(v) => bytemuck::cast_slice_mut(v),
            PixelData::I32(v) => bytemuck::cast_slice_mut(v),
            PixelData::F32(v) => bytemuck::cast_slice_mut(v),
        }
    }

    pub fn as_u8(&self) -> Option<&[u8]> {
        match self {
            PixelData::U8(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            PixelData::F32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> Option<&[u16]> {
        match self {
            PixelData::U16(v) => Some(v),
            _ => None,
        }
    }

    /// Decode half-float storage (`r16f`, `rgba16f` reads) to `f32`.
    pub fn halves_to_f32(&self) -> Option<Vec<f32>> {
        self.as_u16()
            .map(|bits| bits.iter().map(|b| f16::from_bits(*b).to_f32()).collect())
    }

    /// Encode `f32` values as half-float storage for `*16f` uploads.
    pub fn halves_from_f32(values: &[f32]) -> Self {
        PixelData::U16(values.iter().map(|v| f16::from_f32(*v).to_bits()).collect())
    }
}

macro_rules! pixel_data_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<Vec<$ty>> for PixelData {
            fn from(v: Vec<$ty>) -> Self {
                PixelData::$variant(v)
            }
        })*
    };
}

pixel_data_from!(u8 => U8, i8 => I8, u16 => U16, i16 => I16, u32 => U32, i32 => I32, f32 => F32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_entries() {
        let info = "rgba8".parse::<TextureFormat>().unwrap().info();
        assert_eq!(
            info,
            FormatInfo {
                internal_format: glow::RGBA8,
                format: glow::RGBA,
                ty: glow::UNSIGNED_BYTE,
                array: CpuArrayKind::U8,
                channels: 4,
            }
        );
        let info = TextureFormat::R16F.info();
        assert_eq!((info.format, info.ty, info.array), (glow::RED, glow::HALF_FLOAT, CpuArrayKind::U16));
        let info = TextureFormat::RG32F.info();
        assert_eq!((info.internal_format, info.channels), (glow::RG32F, 2));
        let depth = TextureFormat::Depth.info();
        assert_eq!(depth.internal_format, glow::DEPTH_COMPONENT24);
        assert_eq!(depth.array, CpuArrayKind::U32);
    }

    #[test]
    fn integer_formats() {
        let fmt: TextureFormat = "rg16ui".parse().unwrap();
        let info = fmt.info();
        assert_eq!(info.internal_format, glow::RG16UI);
        assert_eq!(info.format, glow::RG_INTEGER);
        assert_eq!(fmt.sampler_prefix(), "u");
        assert_eq!("r32i".parse::<TextureFormat>().unwrap().sampler_prefix(), "i");
        assert_eq!(TextureFormat::RGBA32F.sampler_prefix(), "");
    }

    #[test]
    fn names_round_trip_through_display() {
        for name in ["r8", "rgba16f", "rgb32f", "r8i", "rgba32ui", "depth"] {
            assert_eq!(name.parse::<TextureFormat>().unwrap().to_string(), name);
        }
    }

    #[test]
    fn unknown_names() {
        assert!("rgba".parse::<TextureFormat>().is_err());
        assert!("xyz8".parse::<TextureFormat>().is_err());
        assert!("rgba16".parse::<TextureFormat>().is_err());
        assert_eq!(
            "rgba8+stencil".parse::<TargetFormat>().unwrap_err(),
            UnknownFormat("rgba8+stencil".into())
        );
    }

    #[test]
    fn depth_companion_suffix() {
        let fmt: TargetFormat = "rgba16f+depth".parse().unwrap();
        assert_eq!(fmt.color, TextureFormat::RGBA16F);
        assert!(fmt.with_depth);
        assert!(!"r8".parse::<TargetFormat>().unwrap().with_depth);
    }

    #[test]
    fn pixel_data_bytes() {
        let data = PixelData::from(vec![1.0f32, 2.0]);
        assert_eq!(data.as_bytes().len(), 8);
        let back = PixelData::from_bytes(CpuArrayKind::F32, data.as_bytes());
        assert_eq!(back, data);
        let halves = PixelData::halves_from_f32(&[0.5, 3.0]);
        assert_eq!(halves.halves_to_f32(), Some(vec![0.5, 3.0]));
    }
}
