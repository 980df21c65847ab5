//! The parameter bag and its split into draw options and uniforms.
//!
//! A draw is described by one insertion-ordered bag. Twelve reserved names
//! ([`OPTION_NAMES`]) control the pass itself; every other key is a
//! uniform:
//!
//! ```
//! use quadpass::Params;
//!
//! let params = Params::new()
//!     .set("FP", "UV, 0.0, 1.0")
//!     .set("Clear", 0.0)
//!     .set("Grid", [4, 4])
//!     .set("tint", [1.0, 0.5, 0.0, 1.0]);
//! let (options, uniforms) = quadpass::params::split(&params).unwrap();
//! assert_eq!(options.grid, [4, 4, 1]);
//! assert!(uniforms.contains_key("tint"));
//! ```

use std::rc::Rc;
use std::str::FromStr;

use indexmap::IndexMap;

use crate::error::{DrawError, DrawResult};
use crate::registry::StoryBuffer;
use crate::sampler::TextureSampler;
use crate::target::TextureTarget;
use crate::uniforms::{UniformValue, Uniforms};

/// Reserved option names. Keys outside this set are uniforms.
pub const OPTION_NAMES: [&str; 12] = [
    "Inc",
    "VP",
    "FP",
    "Clear",
    "Blend",
    "View",
    "Grid",
    "Mesh",
    "Aspect",
    "DepthTest",
    "AlphaCoverage",
    "Face",
];

pub fn is_option(name: &str) -> bool {
    OPTION_NAMES.contains(&name)
}

/// A single entry of the bag.
#[derive(Debug, Clone)]
pub enum ParamValue {
    Uniform(UniformValue),
    Text(String),
    TextList(Vec<String>),
}

impl ParamValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_uniform(&self) -> Option<&UniformValue> {
        match self {
            ParamValue::Uniform(v) => Some(v),
            _ => None,
        }
    }

    /// Numeric components, `None` for text and samplers.
    fn numbers(&self) -> Option<Vec<f32>> {
        self.as_uniform().and_then(UniformValue::to_f32s)
    }

    fn scalar(&self) -> Option<f32> {
        match self.as_uniform()? {
            UniformValue::Float(_) | UniformValue::Int(_) | UniformValue::Bool(_) => {
                self.numbers().and_then(|v| v.first().copied())
            }
            _ => None,
        }
    }
}

impl From<UniformValue> for ParamValue {
    fn from(v: UniformValue) -> Self {
        ParamValue::Uniform(v)
    }
}

impl From<f32> for ParamValue {
    fn from(v: f32) -> Self {
        ParamValue::Uniform(UniformValue::Float(v))
    }
}

/// Narrowed to `f32`, so unsuffixed float literals work as values.
impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Uniform(UniformValue::Float(v as f32))
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Uniform(UniformValue::Int(v))
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Uniform(UniformValue::Bool(v))
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

impl From<Vec<String>> for ParamValue {
    fn from(v: Vec<String>) -> Self {
        ParamValue::TextList(v)
    }
}

impl From<Vec<&str>> for ParamValue {
    fn from(v: Vec<&str>) -> Self {
        ParamValue::TextList(v.into_iter().map(str::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for ParamValue {
    fn from(v: [&str; N]) -> Self {
        ParamValue::TextList(v.iter().map(|s| s.to_string()).collect())
    }
}

impl<const N: usize> From<[f32; N]> for ParamValue {
    fn from(v: [f32; N]) -> Self {
        ParamValue::Uniform(UniformValue::Vector(v.to_vec()))
    }
}

impl From<Vec<f32>> for ParamValue {
    fn from(v: Vec<f32>) -> Self {
        ParamValue::Uniform(UniformValue::Vector(v))
    }
}

impl<const N: usize> From<[f64; N]> for ParamValue {
    fn from(v: [f64; N]) -> Self {
        ParamValue::Uniform(UniformValue::Vector(v.iter().map(|x| *x as f32).collect()))
    }
}

impl From<Vec<f64>> for ParamValue {
    fn from(v: Vec<f64>) -> Self {
        ParamValue::Uniform(UniformValue::Vector(v.into_iter().map(|x| x as f32).collect()))
    }
}

impl<const N: usize> From<[i32; N]> for ParamValue {
    fn from(v: [i32; N]) -> Self {
        ParamValue::Uniform(UniformValue::IntVector(v.to_vec()))
    }
}

impl From<Vec<i32>> for ParamValue {
    fn from(v: Vec<i32>) -> Self {
        ParamValue::Uniform(UniformValue::IntVector(v))
    }
}

macro_rules! glam_param {
    ($variant:ident: $($ty:ty => $conv:ident),* $(,)?) => {
        $(impl From<$ty> for ParamValue {
            fn from(v: $ty) -> Self {
                ParamValue::Uniform(UniformValue::$variant(v.$conv().to_vec()))
            }
        })*
    };
}

glam_param!(Vector: glam::Vec2 => to_array, glam::Vec3 => to_array, glam::Vec4 => to_array);
// column-major, as GL expects with transpose off
glam_param!(Vector: glam::Mat3 => to_cols_array, glam::Mat4 => to_cols_array);
glam_param!(IntVector: glam::IVec2 => to_array, glam::IVec3 => to_array, glam::IVec4 => to_array);

impl From<TextureSampler> for ParamValue {
    fn from(v: TextureSampler) -> Self {
        ParamValue::Uniform(UniformValue::Sampler(v))
    }
}

impl From<&TextureTarget> for ParamValue {
    fn from(v: &TextureTarget) -> Self {
        v.sampler().into()
    }
}

impl From<&Rc<TextureTarget>> for ParamValue {
    fn from(v: &Rc<TextureTarget>) -> Self {
        v.sampler().into()
    }
}

/// A story binds as its current (most recently written) slot.
impl From<&StoryBuffer> for ParamValue {
    fn from(v: &StoryBuffer) -> Self {
        v.current().sampler().into()
    }
}

/// Insertion-ordered parameter bag for one draw.
#[derive(Debug, Clone, Default)]
pub struct Params {
    entries: IndexMap<String, ParamValue>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn set(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace `key`. A replaced key keeps its original position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Option<ParamValue> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<ParamValue> {
        self.entries.shift_remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

/// How the `Aspect` uniform is derived from the view size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aspect {
    /// Shorter side spans [-1, 1]
    Fit,
    /// Longer side spans [-1, 1]
    Cover,
    X,
    Y,
    Mean,
}

impl Aspect {
    /// `[c/w, c/h]` for the mode's reference length `c`.
    pub fn scale(self, width: f32, height: f32) -> [f32; 2] {
        let c = match self {
            Aspect::Fit => width.min(height),
            Aspect::Cover => width.max(height),
            Aspect::X => width,
            Aspect::Y => height,
            Aspect::Mean => (width + height) / 2.0,
        };
        [c / width, c / height]
    }
}

impl FromStr for Aspect {
    type Err = DrawError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fit" => Ok(Aspect::Fit),
            "cover" => Ok(Aspect::Cover),
            "x" => Ok(Aspect::X),
            "y" => Ok(Aspect::Y),
            "mean" => Ok(Aspect::Mean),
            _ => Err(DrawError::UnknownAspect(s.to_string())),
        }
    }
}

/// Scale for an optional mode; no mode means `[1, 1]`.
pub fn aspect_scale(aspect: Option<Aspect>, width: f32, height: f32) -> [f32; 2] {
    aspect.map_or([1.0, 1.0], |a| a.scale(width, height))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DepthTest {
    #[default]
    Off,
    On,
    /// Test against existing depth without writing it
    Keep,
}

impl DepthTest {
    pub fn enabled(self) -> bool {
        self != DepthTest::Off
    }

    pub fn writes_depth(self) -> bool {
        self != DepthTest::Keep
    }
}

/// Which faces are drawn. `Front` keeps front faces by culling back ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Face {
    Front,
    Back,
}

impl Face {
    pub fn culled(self) -> u32 {
        match self {
            Face::Front => glow::BACK,
            Face::Back => glow::FRONT,
        }
    }
}

/// Typed, validated reserved options of one draw.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawOptions {
    pub inc: Vec<String>,
    pub vp: String,
    pub fp: String,
    pub clear: Option<[f32; 4]>,
    pub blend: Option<String>,
    pub view: Option<[i32; 4]>,
    pub grid: [u32; 3],
    pub mesh: [u32; 2],
    pub aspect: Option<Aspect>,
    pub depth_test: DepthTest,
    pub alpha_coverage: bool,
    pub face: Option<Face>,
}

impl Default for DrawOptions {
    fn default() -> Self {
        Self {
            inc: Vec::new(),
            vp: String::new(),
            fp: String::new(),
            clear: None,
            blend: None,
            view: None,
            grid: [1, 1, 1],
            mesh: [1, 1],
            aspect: None,
            depth_test: DepthTest::Off,
            alpha_coverage: false,
            face: None,
        }
    }
}

impl DrawOptions {
    /// Whether a vertex or fragment snippet was given.
    pub fn has_stages(&self) -> bool {
        !self.vp.is_empty() || !self.fp.is_empty()
    }

    /// Nothing to do beyond resolving the target.
    pub fn is_noop(&self) -> bool {
        self.clear.is_none() && !self.has_stages()
    }

    /// Explicit view, or the whole target.
    pub fn view_rect(&self, target_size: [u32; 2]) -> [i32; 4] {
        self.view
            .unwrap_or([0, 0, target_size[0] as i32, target_size[1] as i32])
    }
}

fn invalid(name: &str, expected: &'static str) -> DrawError {
    DrawError::InvalidOption {
        name: name.to_string(),
        expected,
    }
}

fn parse_option(options: &mut DrawOptions, name: &str, value: &ParamValue) -> DrawResult<()> {
    match name {
        "Inc" => {
            options.inc = match value {
                ParamValue::Text(s) => vec![s.clone()],
                ParamValue::TextList(list) => list.clone(),
                ParamValue::Uniform(_) => return Err(invalid(name, "text or a list of text")),
            }
        }
        "VP" | "FP" => {
            let text = value.as_text().ok_or_else(|| invalid(name, "shader text"))?.to_string();
            if name == "VP" {
                options.vp = text;
            } else {
                options.fp = text;
            }
        }
        "Clear" => {
            let expected = "a number or 4 numbers";
            let values = value.numbers().ok_or_else(|| invalid(name, expected))?;
            options.clear = Some(match values.as_slice() {
                [c] => [*c; 4],
                [r, g, b, a] => [*r, *g, *b, *a],
                _ => return Err(invalid(name, expected)),
            });
        }
        "Blend" => {
            let spec = value.as_text().ok_or_else(|| invalid(name, "a blend spec"))?;
            options.blend = Some(spec.to_string());
        }
        "View" => {
            let expected = "2 or 4 numbers";
            let values = value.numbers().ok_or_else(|| invalid(name, expected))?;
            options.view = Some(match values.as_slice() {
                [w, h] => [0, 0, *w as i32, *h as i32],
                [x, y, w, h] => [*x as i32, *y as i32, *w as i32, *h as i32],
                _ => return Err(invalid(name, expected)),
            });
        }
        "Grid" => {
            let expected = "1 to 3 counts";
            let values = value.numbers().ok_or_else(|| invalid(name, expected))?;
            if values.is_empty() || values.len() > 3 {
                return Err(invalid(name, expected));
            }
            let mut grid = [1u32; 3];
            for (dst, v) in grid.iter_mut().zip(&values) {
                *dst = v.max(0.0) as u32;
            }
            options.grid = grid;
        }
        "Mesh" => {
            let expected = "2 counts";
            let values = value.numbers().ok_or_else(|| invalid(name, expected))?;
            let [x, y] = values.as_slice() else {
                return Err(invalid(name, expected));
            };
            options.mesh = [x.max(0.0) as u32, y.max(0.0) as u32];
        }
        "Aspect" => {
            let mode = value.as_text().ok_or_else(|| invalid(name, "fit, cover, x, y or mean"))?;
            options.aspect = Some(mode.parse()?);
        }
        "DepthTest" => {
            options.depth_test = match value {
                ParamValue::Text(s) if s == "keep" => DepthTest::Keep,
                _ => match value.scalar() {
                    Some(v) if v != 0.0 => DepthTest::On,
                    Some(_) => DepthTest::Off,
                    None => return Err(invalid(name, "a bool, 0/1 or \"keep\"")),
                },
            };
        }
        "AlphaCoverage" => {
            let v = value.scalar().ok_or_else(|| invalid(name, "a bool or 0/1"))?;
            options.alpha_coverage = v != 0.0;
        }
        "Face" => {
            options.face = Some(match value.as_text() {
                Some("front") => Face::Front,
                Some("back") => Face::Back,
                _ => return Err(invalid(name, "\"front\" or \"back\"")),
            });
        }
        _ => unreachable!("{name} is not a reserved option"),
    }
    Ok(())
}

/// Partition a bag into typed options and uniforms.
///
/// Option values are validated here, before any GL work: unknown aspect
/// modes, malformed vectors and text given for a uniform are all errors.
pub fn split(params: &Params) -> DrawResult<(DrawOptions, Uniforms)> {
    let mut options = DrawOptions::default();
    let mut uniforms = Uniforms::new();
    for (name, value) in params.iter() {
        if is_option(name) {
            parse_option(&mut options, name, value)?;
            continue;
        }
        match value {
            ParamValue::Uniform(v) => {
                uniforms.insert(name.to_string(), v.clone());
            }
            ParamValue::Text(_) | ParamValue::TextList(_) => {
                return Err(DrawError::InvalidUniform {
                    name: name.to_string(),
                    reason: "text is only accepted for reserved options".to_string(),
                });
            }
        }
    }
    Ok((options, uniforms))
}
