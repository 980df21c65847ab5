//! Compiled programs and the program cache.

use quadpass_core::collections::HashMap;
use quadpass_core::profiling::profile_function;
use quadpass_test_utils::{GlContext, GlProgram, GlUniformLocation, ShaderStage};

use crate::assembler::{ShaderSources, numbered_listing};
use crate::error::{DrawError, DrawResult};
use crate::sampler::SamplerCache;
use crate::uniforms::{UniformValue, Uniforms};

/// Cache key: the raw snippets a program was assembled from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProgramKey {
    pub includes: Vec<String>,
    pub vertex: String,
    pub fragment: String,
}

/// Uniform type as reported by program introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformKind {
    Float(u32),
    Int(u32),
    UInt(u32),
    Bool(u32),
    Matrix(u32),
    Sampler { target: u32 },
}

impl UniformKind {
    pub fn from_gl(utype: u32) -> Option<Self> {
        Some(match utype {
            glow::FLOAT => Self::Float(1),
            glow::FLOAT_VEC2 => Self::Float(2),
            glow::FLOAT_VEC3 => Self::Float(3),
            glow::FLOAT_VEC4 => Self::Float(4),
            glow::INT => Self::Int(1),
            glow::INT_VEC2 => Self::Int(2),
            glow::INT_VEC3 => Self::Int(3),
            glow::INT_VEC4 => Self::Int(4),
            glow::UNSIGNED_INT => Self::UInt(1),
            glow::UNSIGNED_INT_VEC2 => Self::UInt(2),
            glow::UNSIGNED_INT_VEC3 => Self::UInt(3),
            glow::UNSIGNED_INT_VEC4 => Self::UInt(4),
            glow::BOOL => Self::Bool(1),
            glow::BOOL_VEC2 => Self::Bool(2),
            glow::BOOL_VEC3 => Self::Bool(3),
            glow::BOOL_VEC4 => Self::Bool(4),
            glow::FLOAT_MAT2 => Self::Matrix(2),
            glow::FLOAT_MAT3 => Self::Matrix(3),
            glow::FLOAT_MAT4 => Self::Matrix(4),
            glow::SAMPLER_2D | glow::INT_SAMPLER_2D | glow::UNSIGNED_INT_SAMPLER_2D => Self::Sampler {
                target: glow::TEXTURE_2D,
            },
            glow::SAMPLER_2D_ARRAY | glow::INT_SAMPLER_2D_ARRAY | glow::UNSIGNED_INT_SAMPLER_2D_ARRAY => {
                Self::Sampler {
                    target: glow::TEXTURE_2D_ARRAY,
                }
            }
            _ => return None,
        })
    }

    fn components(self) -> usize {
        match self {
            Self::Float(n) | Self::Int(n) | Self::UInt(n) | Self::Bool(n) => n as usize,
            Self::Matrix(n) => (n * n) as usize,
            Self::Sampler { .. } => 1,
        }
    }
}

/// Leading identifier of a reported uniform name (`foo[0]` -> `foo`).
fn base_name(name: &str) -> &str {
    let end = name
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(name.len());
    &name[..end]
}

#[derive(Debug)]
enum UniformSetter {
    Sampler {
        name: String,
        location: GlUniformLocation,
        unit: u32,
        target: u32,
    },
    Value {
        name: String,
        location: GlUniformLocation,
        kind: UniformKind,
    },
}

impl UniformSetter {
    fn name(&self) -> &str {
        match self {
            UniformSetter::Sampler { name, .. } | UniformSetter::Value { name, .. } => name,
        }
    }

    fn apply(&self, gl: &dyn GlContext, value: Option<&UniformValue>, samplers: &SamplerCache) {
        match self {
            UniformSetter::Sampler { name, unit, target, .. } => match value {
                Some(UniformValue::Sampler(sampler)) => sampler.bind(gl, *unit, samplers),
                Some(other) => {
                    tracing::warn!(uniform = %name, value = ?other.shape(), "sampler uniform given a non-sampler value");
                    gl.bind_texture_unit(*unit, *target, None, None);
                }
                None => gl.bind_texture_unit(*unit, *target, None, None),
            },
            UniformSetter::Value { name, location, kind } => {
                let Some(value) = value else {
                    return;
                };
                let n = kind.components();
                let len = match value {
                    UniformValue::Vector(v) => v.len(),
                    UniformValue::IntVector(v) => v.len(),
                    UniformValue::Sampler(_) => 0,
                    _ => 1,
                };
                if len == 0 || len % n != 0 {
                    tracing::warn!(uniform = %name, ?kind, components = len, "uniform value does not match its declaration");
                    return;
                }
                match *kind {
                    UniformKind::Float(c) => {
                        if let Some(v) = value.to_f32s() {
                            gl.uniform_f32(location, c, &v);
                        }
                    }
                    UniformKind::Matrix(dim) => {
                        if let Some(v) = value.to_f32s() {
                            gl.uniform_matrix(location, dim, &v);
                        }
                    }
                    UniformKind::Int(c) | UniformKind::Bool(c) => {
                        if let Some(v) = value.to_i32s() {
                            gl.uniform_i32(location, c, &v);
                        }
                    }
                    UniformKind::UInt(c) => {
                        if let Some(v) = value.to_i32s() {
                            let v: Vec<u32> = v.into_iter().map(|x| x.max(0) as u32).collect();
                            gl.uniform_u32(location, c, &v);
                        }
                    }
                    UniformKind::Sampler { .. } => {}
                }
            }
        }
    }
}

/// A linked program with one setter per active uniform.
#[derive(Debug)]
pub struct Program {
    program: GlProgram,
    setters: Vec<UniformSetter>,
}

fn compile(gl: &dyn GlContext, stage: ShaderStage, source: &str) -> DrawResult<quadpass_test_utils::GlShader> {
    gl.compile_shader(stage, source).map_err(|log| {
        tracing::error!(stage = stage.name(), "GLSL compile error:\n{log}");
        DrawError::ShaderCompile {
            stage,
            listing: numbered_listing(source),
            log,
        }
    })
}

impl Program {
    /// Compile, link and introspect. Sampler uniforms get texture units in
    /// declaration order starting at 0.
    pub fn link(gl: &dyn GlContext, sources: &ShaderSources) -> DrawResult<Self> {
        profile_function!();
        let vertex = compile(gl, ShaderStage::Vertex, &sources.vertex)?;
        let fragment = compile(gl, ShaderStage::Fragment, &sources.fragment)?;
        let program = gl.link_program(vertex, fragment).map_err(|log| {
            tracing::error!("program link error:\n{log}");
            DrawError::ProgramLink { log }
        })?;

        gl.use_program(Some(program));
        let mut setters = Vec::new();
        let mut unit_count = 0;
        for info in gl.active_uniforms(program) {
            let name = base_name(&info.name).to_string();
            let Some(kind) = UniformKind::from_gl(info.utype) else {
                tracing::debug!(uniform = %name, utype = info.utype, "unsupported uniform type, no setter");
                continue;
            };
            let Some(location) = gl.uniform_location(program, &name) else {
                continue;
            };
            let setter = match kind {
                UniformKind::Sampler { target } => {
                    let unit = unit_count;
                    unit_count += 1;
                    gl.uniform_i32(&location, 1, &[unit as i32]);
                    UniformSetter::Sampler {
                        name,
                        location,
                        unit,
                        target,
                    }
                }
                kind => UniformSetter::Value { name, location, kind },
            };
            setters.push(setter);
        }
        gl.use_program(None);
        tracing::debug!(uniforms = setters.len(), samplers = unit_count, "linked program");
        Ok(Self { program, setters })
    }

    pub fn raw(&self) -> GlProgram {
        self.program
    }

    /// Names of the uniforms this program consumes.
    pub fn uniform_names(&self) -> impl Iterator<Item = &str> {
        self.setters.iter().map(UniformSetter::name)
    }

    /// Texture unit assigned to sampler uniform `name`.
    pub fn sampler_unit(&self, name: &str) -> Option<u32> {
        self.setters.iter().find_map(|s| match s {
            UniformSetter::Sampler { name: n, unit, .. } if n == name => Some(*unit),
            _ => None,
        })
    }

    /// Push every uniform the program declares. Missing values leave the
    /// uniform untouched (samplers are unbound).
    pub fn apply_uniforms(&self, gl: &dyn GlContext, values: &Uniforms, samplers: &SamplerCache) {
        for setter in &self.setters {
            setter.apply(gl, values.get(setter.name()), samplers);
        }
    }
}

/// Programs keyed by the snippets they were built from. Each key is
/// compiled at most once.
#[derive(Default)]
pub struct ProgramCache {
    programs: HashMap<ProgramKey, Program>,
}

impl ProgramCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `key`, assembling and linking with `build` on a miss.
    /// Failures are not cached.
    pub fn resolve(
        &mut self,
        gl: &dyn GlContext,
        key: ProgramKey,
        build: impl FnOnce() -> ShaderSources,
    ) -> DrawResult<&Program> {
        use std::collections::hash_map::Entry;
        match self.programs.entry(key) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let program = Program::link(gl, &build())?;
                tracing::info!(
                    vertex = %entry.key().vertex,
                    fragment = %entry.key().fragment,
                    "created program"
                );
                Ok(entry.insert(program))
            }
        }
    }

    pub fn get(&self, key: &ProgramKey) -> Option<&Program> {
        self.programs.get(key)
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Delete every program.
    pub fn clear(&mut self, gl: &dyn GlContext) {
        for (_, program) in self.programs.drain() {
            gl.delete_program(program.program);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::ShaderAssembler;
    use quadpass_test_utils::{GlCall, MockGlContext, MockUniform};

    fn key(fp: &str) -> ProgramKey {
        ProgramKey {
            includes: vec![],
            vertex: String::new(),
            fragment: fp.to_string(),
        }
    }

    fn sources(fp: &str, uniforms: &Uniforms) -> ShaderSources {
        ShaderAssembler::new("#version 300 es").assemble(&[], "", fp, uniforms)
    }

    #[test]
    fn cache_hits_and_misses() {
        let mock = MockGlContext::new(1, 1);
        let mut cache = ProgramCache::new();
        let u = Uniforms::new();
        cache.resolve(&mock, key("UV,0,1"), || sources("UV,0,1", &u)).unwrap();
        cache.resolve(&mock, key("UV,0,1"), || sources("UV,0,1", &u)).unwrap();
        assert_eq!(mock.count_program_links(), 1);
        cache.resolve(&mock, key("UV,1,1"), || sources("UV,1,1", &u)).unwrap();
        assert_eq!(mock.count_program_links(), 2);
        assert_eq!(cache.len(), 2);

        cache.clear(&mock);
        assert!(cache.is_empty());
        assert_eq!(mock.calls().iter().filter(|c| matches!(c, GlCall::DeleteProgram { .. })).count(), 2);
    }

    #[test]
    fn compile_error_carries_listing_and_log() {
        let mock = MockGlContext::new(1, 1);
        let mut cache = ProgramCache::new();
        let u = Uniforms::new();
        let err = cache
            .resolve(&mock, key("#error broken"), || sources("#error broken", &u))
            .unwrap_err();
        let DrawError::ShaderCompile { stage, listing, log } = &err else {
            panic!("unexpected error {err:?}");
        };
        assert_eq!(*stage, ShaderStage::Fragment);
        assert!(listing.starts_with("   1: #version 300 es"));
        assert!(log.contains("broken"));
        assert!(err.to_string().contains("--- GLSL COMPILE ERROR ---"));
        assert!(cache.is_empty());
    }

    #[test]
    fn link_failure_is_not_cached() {
        let mock = MockGlContext::new(1, 1);
        let mut cache = ProgramCache::new();
        let u = Uniforms::new();
        mock.fail_next_link("too many varyings");
        let err = cache.resolve(&mock, key("1"), || sources("1", &u)).unwrap_err();
        assert!(matches!(err, DrawError::ProgramLink { ref log } if log == "too many varyings"));
        assert!(cache.resolve(&mock, key("1"), || sources("1", &u)).is_ok());
    }

    #[test]
    fn setters_follow_declared_types() {
        let mock = MockGlContext::new(1, 1);
        let mut u = Uniforms::new();
        u.insert("gain".into(), UniformValue::Float(0.5));
        u.insert("offset".into(), UniformValue::Vector(vec![1.0, 2.0]));
        u.insert("steps".into(), UniformValue::Int(3));
        let fp = "uniform int steps;\nvoid fragment() { FOut = vec4(gain*offset.x*float(steps)); }";
        let program = Program::link(&mock, &sources(fp, &u)).unwrap();
        let names: Vec<_> = program.uniform_names().collect();
        for name in ["Grid", "Mesh", "View", "Aspect", "gain", "offset", "steps"] {
            assert!(names.contains(&name), "{name}");
        }

        mock.use_program(Some(program.raw()));
        // `missing` has no setter and `Mesh` has no value: both are ignored
        u.insert("missing".into(), UniformValue::Float(1.0));
        program.apply_uniforms(&mock, &u, &SamplerCache::new());
        assert_eq!(mock.uniform_value("gain"), Some(MockUniform::Float(vec![0.5])));
        assert_eq!(mock.uniform_value("offset"), Some(MockUniform::Float(vec![1.0, 2.0])));
        assert_eq!(mock.uniform_value("steps"), Some(MockUniform::Int(vec![3])));
        assert_eq!(mock.uniform_value("Mesh"), None);
    }

    #[test]
    fn mismatched_lengths_are_skipped() {
        let mock = MockGlContext::new(1, 1);
        let mut u = Uniforms::new();
        u.insert("v".into(), UniformValue::Vector(vec![0.0; 3]));
        let program = Program::link(&mock, &sources("v, 1", &u)).unwrap();
        mock.use_program(Some(program.raw()));
        u.insert("v".into(), UniformValue::Vector(vec![1.0, 2.0]));
        program.apply_uniforms(&mock, &u, &SamplerCache::new());
        assert_eq!(mock.uniform_value("v"), None);
    }

    #[test]
    fn base_names() {
        assert_eq!(base_name("weights[0]"), "weights");
        assert_eq!(base_name("Src"), "Src");
    }
}
