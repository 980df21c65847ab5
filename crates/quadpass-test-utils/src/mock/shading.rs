//! Program emulation for the mock context.
//!
//! The mock does not execute GLSL. Tests register a fragment emulator, a
//! Rust closure standing in for one fragment shader, keyed by a marker
//! string that must appear in the fragment source. Active uniforms are
//! recovered by scanning `uniform` declarations.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use super::texels::MockTexture;
use crate::ActiveUniform;

static COMMENTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/\*[\s\S]*?\*/|//.*").expect("valid comment regex"));
static UNIFORM_DECL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\buniform\s+(\w+)\s+([^;]+);").expect("valid uniform regex"));
static ARRAY_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\w+)\s*(?:\[\s*(\d+)\s*\])?$").expect("valid name regex"));

/// GL type enum for a GLSL type name.
fn glsl_type_enum(ty: &str) -> Option<u32> {
    Some(match ty {
        "float" => glow::FLOAT,
        "vec2" => glow::FLOAT_VEC2,
        "vec3" => glow::FLOAT_VEC3,
        "vec4" => glow::FLOAT_VEC4,
        "int" => glow::INT,
        "ivec2" => glow::INT_VEC2,
        "ivec3" => glow::INT_VEC3,
        "ivec4" => glow::INT_VEC4,
        "uint" => glow::UNSIGNED_INT,
        "uvec2" => glow::UNSIGNED_INT_VEC2,
        "uvec3" => glow::UNSIGNED_INT_VEC3,
        "uvec4" => glow::UNSIGNED_INT_VEC4,
        "bool" => glow::BOOL,
        "bvec2" => glow::BOOL_VEC2,
        "bvec3" => glow::BOOL_VEC3,
        "bvec4" => glow::BOOL_VEC4,
        "mat2" => glow::FLOAT_MAT2,
        "mat3" => glow::FLOAT_MAT3,
        "mat4" => glow::FLOAT_MAT4,
        "sampler2D" => glow::SAMPLER_2D,
        "sampler2DArray" => glow::SAMPLER_2D_ARRAY,
        "isampler2D" => glow::INT_SAMPLER_2D,
        "usampler2D" => glow::UNSIGNED_INT_SAMPLER_2D,
        "isampler2DArray" => glow::INT_SAMPLER_2D_ARRAY,
        "usampler2DArray" => glow::UNSIGNED_INT_SAMPLER_2D_ARRAY,
        _ => return None,
    })
}

/// Collect uniform declarations from the given sources, first one wins.
pub(crate) fn scan_uniforms<'a>(sources: impl IntoIterator<Item = &'a str>) -> Vec<ActiveUniform> {
    let mut found: Vec<ActiveUniform> = Vec::new();
    for source in sources {
        let stripped = COMMENTS.replace_all(source, "");
        for caps in UNIFORM_DECL.captures_iter(&stripped) {
            let Some(utype) = glsl_type_enum(&caps[1]) else {
                continue;
            };
            for decl in caps[2].split(',') {
                let Some(name_caps) = ARRAY_NAME.captures(decl.trim()) else {
                    continue;
                };
                let base = &name_caps[1];
                if found.iter().any(|u| u.name.trim_end_matches("[0]") == base) {
                    continue;
                }
                let (name, size) = match name_caps.get(2) {
                    Some(len) => (format!("{base}[0]"), len.as_str().parse().unwrap_or(1)),
                    None => (base.to_string(), 1),
                };
                found.push(ActiveUniform { name, utype, size });
            }
        }
    }
    found
}

/// Value last written to a mock uniform.
#[derive(Debug, Clone, PartialEq)]
pub enum MockUniform {
    Float(Vec<f32>),
    Int(Vec<i32>),
    UInt(Vec<u32>),
}

impl MockUniform {
    pub fn as_f32(&self) -> Vec<f32> {
        match self {
            MockUniform::Float(v) => v.clone(),
            MockUniform::Int(v) => v.iter().map(|x| *x as f32).collect(),
            MockUniform::UInt(v) => v.iter().map(|x| *x as f32).collect(),
        }
    }

    pub fn as_i32(&self) -> Vec<i32> {
        match self {
            MockUniform::Float(v) => v.iter().map(|x| *x as i32).collect(),
            MockUniform::Int(v) => v.clone(),
            MockUniform::UInt(v) => v.iter().map(|x| *x as i32).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MockProgram {
    pub vertex_source: String,
    pub fragment_source: String,
    pub uniforms: Vec<ActiveUniform>,
    pub values: HashMap<String, MockUniform>,
}

/// Closure standing in for a fragment shader.
pub type FragmentFn = Arc<dyn Fn(&Fragment<'_>) -> [f32; 4] + Send + Sync>;

/// Inputs visible to a fragment emulator for one pixel.
pub struct Fragment<'a> {
    /// Integer pixel coordinate in the render target (`I` in GLSL).
    pub coord: [i32; 2],
    /// Normalized position inside the viewport (`UV` in GLSL).
    pub uv: [f32; 2],
    pub(crate) program: &'a MockProgram,
    pub(crate) units: &'a HashMap<u32, usize>,
    pub(crate) textures: &'a HashMap<usize, MockTexture>,
}

impl Fragment<'_> {
    fn sampler_texture(&self, sampler: &str) -> Option<&MockTexture> {
        let unit = self.program.values.get(sampler)?.as_i32().first().copied()?;
        let id = self.units.get(&(unit as u32))?;
        self.textures.get(id)
    }

    /// `texelFetch` on the texture bound to sampler uniform `sampler`.
    pub fn texel(&self, sampler: &str, coord: [i32; 2]) -> [f32; 4] {
        self.texel_layer(sampler, coord, 0)
    }

    pub fn texel_layer(&self, sampler: &str, coord: [i32; 2], layer: u32) -> [f32; 4] {
        self.sampler_texture(sampler)
            .map(|tex| tex.fetch(coord[0], coord[1], layer))
            .unwrap_or([0.0; 4])
    }

    /// `textureSize` of the texture bound to `sampler`.
    pub fn sampler_size(&self, sampler: &str) -> Option<[u32; 2]> {
        self.sampler_texture(sampler).map(|tex| [tex.width, tex.height])
    }

    pub fn floats(&self, name: &str) -> Option<Vec<f32>> {
        self.program.values.get(name).map(MockUniform::as_f32)
    }

    pub fn float(&self, name: &str) -> Option<f32> {
        self.floats(name).and_then(|v| v.first().copied())
    }

    pub fn ints(&self, name: &str) -> Option<Vec<i32>> {
        self.program.values.get(name).map(MockUniform::as_i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_multi_name_and_array_declarations() {
        let vs = "uniform vec2 a, b; // uniform float hidden;\nuniform mat3 m[4];";
        let fs = "uniform vec2 a;\nuniform sampler2D Src;\nuniform weird x;";
        let uniforms = scan_uniforms([vs, fs]);
        let names: Vec<_> = uniforms.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "m[0]", "Src"]);
        assert_eq!(uniforms[2].size, 4);
        assert_eq!(uniforms[3].utype, glow::SAMPLER_2D);
    }
}
