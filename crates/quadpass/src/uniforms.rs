//! Uniform values and declaration inference.
//!
//! Snippets never declare the uniforms they read: the declaration is derived
//! from the shape of the value supplied with the draw. A `[f32; 4]` becomes
//! `uniform vec4`, nine floats a `mat3`, a sampler a `sampler2D` plus
//! accessor helpers. Uniforms already declared in shader text are left
//! alone.

use std::sync::LazyLock;

use indexmap::IndexMap;
use quadpass_core::collections::HashSet;
use regex::Regex;

use crate::assembler::strip_comments;
use crate::sampler::TextureSampler;

static DECLARED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"uniform\s+\w+\s+([^;]+)\s*;").expect("valid uniform regex"));
static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\W+").expect("valid split regex"));
static IDENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\w+$").expect("valid ident regex"));

/// Value bound to a shader uniform.
#[derive(Debug, Clone)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Bool(bool),
    Vector(Vec<f32>),
    IntVector(Vec<i32>),
    Sampler(TextureSampler),
}

/// Uniform values of one draw, in insertion order.
pub type Uniforms = IndexMap<String, UniformValue>;

/// Declaration shape inferred from a [`UniformValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformShape {
    Sampler { layered: bool, prefix: &'static str },
    Number,
    Integer,
    Boolean,
    FixedVector(usize),
    IntVector(usize),
}

impl UniformValue {
    pub fn shape(&self) -> UniformShape {
        match self {
            UniformValue::Float(_) => UniformShape::Number,
            UniformValue::Int(_) => UniformShape::Integer,
            UniformValue::Bool(_) => UniformShape::Boolean,
            UniformValue::Vector(v) => UniformShape::FixedVector(v.len()),
            UniformValue::IntVector(v) => UniformShape::IntVector(v.len()),
            UniformValue::Sampler(s) => UniformShape::Sampler {
                layered: s.is_layered(),
                prefix: s.format().sampler_prefix(),
            },
        }
    }

    /// Components as floats. Samplers have none.
    pub fn to_f32s(&self) -> Option<Vec<f32>> {
        match self {
            UniformValue::Float(v) => Some(vec![*v]),
            UniformValue::Int(v) => Some(vec![*v as f32]),
            UniformValue::Bool(v) => Some(vec![if *v { 1.0 } else { 0.0 }]),
            UniformValue::Vector(v) => Some(v.clone()),
            UniformValue::IntVector(v) => Some(v.iter().map(|x| *x as f32).collect()),
            UniformValue::Sampler(_) => None,
        }
    }

    /// Components as ints, truncating floats. Samplers have none.
    pub fn to_i32s(&self) -> Option<Vec<i32>> {
        match self {
            UniformValue::Float(v) => Some(vec![*v as i32]),
            UniformValue::Int(v) => Some(vec![*v]),
            UniformValue::Bool(v) => Some(vec![*v as i32]),
            UniformValue::Vector(v) => Some(v.iter().map(|x| *x as i32).collect()),
            UniformValue::IntVector(v) => Some(v.clone()),
            UniformValue::Sampler(_) => None,
        }
    }

    pub fn as_sampler(&self) -> Option<&TextureSampler> {
        match self {
            UniformValue::Sampler(s) => Some(s),
            _ => None,
        }
    }
}

impl UniformShape {
    /// GLSL declaration (plus helpers for samplers), or `None` when the shape
    /// has no implicit GLSL type.
    pub fn declaration(self, name: &str) -> Option<String> {
        let ty = match self {
            UniformShape::Sampler { layered, prefix } => return Some(sampler_declaration(name, layered, prefix)),
            UniformShape::Number => "float",
            UniformShape::Integer => "int",
            UniformShape::Boolean => "bool",
            UniformShape::FixedVector(len) => match len {
                1 => "float",
                2 => "vec2",
                3 => "vec3",
                4 => "vec4",
                9 => "mat3",
                16 => "mat4",
                _ => return None,
            },
            UniformShape::IntVector(len) => match len {
                1 => "int",
                2 => "ivec2",
                3 => "ivec3",
                4 => "ivec4",
                _ => return None,
            },
        };
        Some(format!("uniform {ty} {name};"))
    }
}

fn sampler_declaration(name: &str, layered: bool, prefix: &str) -> String {
    let (sampler, dim, args, call) = if layered {
        ("sampler2DArray", 3, "p,l", "(p),(l)")
    } else {
        ("sampler2D", 2, "p", "(p)")
    };
    format!(
        "uniform {prefix}{sampler} {name};\n\
         #define {name}({args}) (_sample({name}, {call}))\n\
         ivec{dim} {name}_size() {{ return textureSize({name}, 0); }}\n\
         vec{dim} {name}_step() {{ return 1.0/vec{dim}({name}_size()); }}"
    )
}

/// Names declared by `uniform` statements in `code`, comments ignored.
///
/// Multi-name declarations and array suffixes are split on non-word
/// characters, so `uniform vec2 a, b[4];` yields `a`, `b` and `4`.
pub fn defined_uniforms(code: &str) -> HashSet<String> {
    let code = strip_comments(code);
    let mut names = HashSet::new();
    for caps in DECLARED.captures_iter(&code) {
        for name in NON_WORD.split(&caps[1]) {
            if !name.is_empty() {
                names.insert(name.to_string());
            }
        }
    }
    names
}

/// Declarations for every uniform in `uniforms` not already declared in
/// `code`, one per line in insertion order.
pub fn infer_uniforms(uniforms: &Uniforms, code: &str) -> String {
    let declared = defined_uniforms(code);
    let mut out = Vec::new();
    for (name, value) in uniforms {
        if !IDENT.is_match(name) || declared.contains(name) {
            continue;
        }
        match value.shape().declaration(name) {
            Some(decl) => out.push(decl),
            None => {
                tracing::debug!(name = %name, shape = ?value.shape(), "no implicit GLSL type, skipping uniform declaration");
            }
        }
    }
    out.join("\n")
}
