//! Blend-spec parsing.
//!
//! A blend spec is a tiny expression over the source colour `s` and the
//! destination colour `d`:
//!
//! ```text
//! s*sa + d*(1-sa)     alpha blending
//! s + d               additive
//! d - s               reverse subtract
//! max(s, d)           lighten
//! ```
//!
//! Each term takes an optional `*factor` from
//! `0 1 s (1-s) d (1-d) sa (1-sa) da (1-da) c (1-c) ca (1-ca)`. A term
//! without a factor uses `1`; a term that does not appear uses `0`.

use std::fmt;
use std::sync::LazyLock;

use quadpass_core::collections::HashMap;
use quadpass_test_utils::GlContext;
use regex::Regex;

static TERM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(s|d)(?:\*(\w+|\(1-\w+\)))?").expect("valid blend term regex"));

/// Blend factor applied to one side of the equation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
    ConstantColor,
    OneMinusConstantColor,
    ConstantAlpha,
    OneMinusConstantAlpha,
}

impl BlendFactor {
    /// Parse a factor token as written after `*`.
    pub fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "0" => Self::Zero,
            "1" => Self::One,
            "s" => Self::SrcColor,
            "(1-s)" => Self::OneMinusSrcColor,
            "d" => Self::DstColor,
            "(1-d)" => Self::OneMinusDstColor,
            "sa" => Self::SrcAlpha,
            "(1-sa)" => Self::OneMinusSrcAlpha,
            "da" => Self::DstAlpha,
            "(1-da)" => Self::OneMinusDstAlpha,
            "c" => Self::ConstantColor,
            "(1-c)" => Self::OneMinusConstantColor,
            "ca" => Self::ConstantAlpha,
            "(1-ca)" => Self::OneMinusConstantAlpha,
            _ => return None,
        })
    }

    pub fn gl_enum(self) -> u32 {
        match self {
            Self::Zero => glow::ZERO,
            Self::One => glow::ONE,
            Self::SrcColor => glow::SRC_COLOR,
            Self::OneMinusSrcColor => glow::ONE_MINUS_SRC_COLOR,
            Self::DstColor => glow::DST_COLOR,
            Self::OneMinusDstColor => glow::ONE_MINUS_DST_COLOR,
            Self::SrcAlpha => glow::SRC_ALPHA,
            Self::OneMinusSrcAlpha => glow::ONE_MINUS_SRC_ALPHA,
            Self::DstAlpha => glow::DST_ALPHA,
            Self::OneMinusDstAlpha => glow::ONE_MINUS_DST_ALPHA,
            Self::ConstantColor => glow::CONSTANT_COLOR,
            Self::OneMinusConstantColor => glow::ONE_MINUS_CONSTANT_COLOR,
            Self::ConstantAlpha => glow::CONSTANT_ALPHA,
            Self::OneMinusConstantAlpha => glow::ONE_MINUS_CONSTANT_ALPHA,
        }
    }
}

/// How the weighted source and destination are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendOp {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

impl BlendOp {
    pub fn gl_enum(self) -> u32 {
        match self {
            Self::Add => glow::FUNC_ADD,
            Self::Subtract => glow::FUNC_SUBTRACT,
            Self::ReverseSubtract => glow::FUNC_REVERSE_SUBTRACT,
            Self::Min => glow::MIN,
            Self::Max => glow::MAX,
        }
    }
}

/// Parsed blend equation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub src: BlendFactor,
    pub dst: BlendFactor,
    pub op: BlendOp,
}

impl BlendState {
    /// `s*sa + d*(1-sa)`
    pub const ALPHA: Self = Self {
        src: BlendFactor::SrcAlpha,
        dst: BlendFactor::OneMinusSrcAlpha,
        op: BlendOp::Add,
    };

    /// `s + d`
    pub const ADDITIVE: Self = Self {
        src: BlendFactor::One,
        dst: BlendFactor::One,
        op: BlendOp::Add,
    };

    /// Set blend function and equation. Enabling `BLEND` is up to the caller.
    pub fn apply(&self, gl: &dyn GlContext) {
        gl.blend_func(self.src.gl_enum(), self.dst.gl_enum());
        gl.blend_equation(self.op.gl_enum());
    }
}

/// Error returned for a malformed blend spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlendError {
    UnknownFactor { spec: String, factor: String },
    UnrecognizedPattern { spec: String },
}

impl fmt::Display for BlendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlendError::UnknownFactor { spec, factor } => {
                write!(f, "Unknown blend factor \"{factor}\" in blend spec \"{spec}\"")
            }
            BlendError::UnrecognizedPattern { spec } => {
                write!(f, "Unable to parse blend spec \"{spec}\"")
            }
        }
    }
}

impl std::error::Error for BlendError {}

/// Parse a blend spec. Empty or whitespace-only input means no blending.
pub fn parse_blend(spec: &str) -> Result<Option<BlendState>, BlendError> {
    let compact: String = spec.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Ok(None);
    }

    let mut src = BlendFactor::Zero;
    let mut dst = BlendFactor::Zero;
    for caps in TERM.captures_iter(&compact) {
        let factor = match caps.get(2) {
            Some(token) => BlendFactor::from_token(token.as_str()).ok_or_else(|| BlendError::UnknownFactor {
                spec: spec.to_string(),
                factor: token.as_str().to_string(),
            })?,
            None => BlendFactor::One,
        };
        if &caps[1] == "s" {
            src = factor;
        } else {
            dst = factor;
        }
    }

    let reduced = TERM.replace_all(&compact, "${1}");
    let op = match reduced.as_ref() {
        "min(s,d)" | "min(d,s)" => BlendOp::Min,
        "max(s,d)" | "max(d,s)" => BlendOp::Max,
        "s" | "d" | "s+d" | "d+s" => BlendOp::Add,
        "s-d" => BlendOp::Subtract,
        "d-s" => BlendOp::ReverseSubtract,
        _ => {
            return Err(BlendError::UnrecognizedPattern {
                spec: spec.to_string(),
            });
        }
    };
    Ok(Some(BlendState { src, dst, op }))
}

/// Memo of parsed blend specs, keyed by the exact input string.
///
/// Failed parses are not cached.
#[derive(Debug, Default)]
pub struct BlendCache {
    parsed: HashMap<String, Option<BlendState>>,
}

impl BlendCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_parse(&mut self, spec: &str) -> Result<Option<BlendState>, BlendError> {
        if let Some(state) = self.parsed.get(spec) {
            return Ok(*state);
        }
        let state = parse_blend(spec)?;
        self.parsed.insert(spec.to_string(), state);
        Ok(state)
    }

    pub fn len(&self) -> usize {
        self.parsed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alpha_blending() {
        let state = parse_blend("s*sa + d*(1-sa)").unwrap().unwrap();
        assert_eq!(state, BlendState::ALPHA);
    }

    #[test]
    fn bare_terms_default_to_one_and_zero() {
        assert_eq!(
            parse_blend("s").unwrap(),
            Some(BlendState {
                src: BlendFactor::One,
                dst: BlendFactor::Zero,
                op: BlendOp::Add,
            })
        );
        assert_eq!(parse_blend("d+s").unwrap(), Some(BlendState::ADDITIVE));
    }

    #[test]
    fn reverse_subtract() {
        let state = parse_blend("d-s").unwrap().unwrap();
        assert_eq!(state.src, BlendFactor::One);
        assert_eq!(state.dst, BlendFactor::One);
        assert_eq!(state.op, BlendOp::ReverseSubtract);
        assert_eq!(parse_blend("s-d").unwrap().unwrap().op, BlendOp::Subtract);
    }

    #[test]
    fn min_and_max_in_either_order() {
        assert_eq!(parse_blend("min(s,d)").unwrap().unwrap().op, BlendOp::Min);
        assert_eq!(parse_blend("max( d , s )").unwrap().unwrap().op, BlendOp::Max);
        let state = parse_blend("max(s*sa, d)").unwrap().unwrap();
        assert_eq!(state.src, BlendFactor::SrcAlpha);
        assert_eq!(state.dst, BlendFactor::One);
    }

    #[test]
    fn constant_factors() {
        let state = parse_blend("s*c+d*(1-ca)").unwrap().unwrap();
        assert_eq!(state.src, BlendFactor::ConstantColor);
        assert_eq!(state.dst, BlendFactor::OneMinusConstantAlpha);
    }

    #[test]
    fn empty_means_no_blending() {
        assert_eq!(parse_blend("").unwrap(), None);
        assert_eq!(parse_blend("  \t").unwrap(), None);
    }

    #[test]
    fn unknown_factor_names_the_spec() {
        let err = parse_blend("s*foo").unwrap_err();
        assert_eq!(
            err,
            BlendError::UnknownFactor {
                spec: "s*foo".into(),
                factor: "foo".into()
            }
        );
        assert!(err.to_string().contains("s*foo"));
    }

    #[test]
    fn unrecognized_pattern() {
        assert!(matches!(parse_blend("s+s+d"), Err(BlendError::UnrecognizedPattern { .. })));
        assert!(matches!(parse_blend("s*d"), Ok(Some(_))));
        let err = parse_blend("avg(s,d)").unwrap_err();
        assert_eq!(err.to_string(), "Unable to parse blend spec \"avg(s,d)\"");
    }

    #[test]
    fn cache_memoizes_successes_only() {
        let mut cache = BlendCache::new();
        let a = cache.get_or_parse("s+d").unwrap();
        let b = cache.get_or_parse("s+d").unwrap();
        assert_eq!(a, b);
        assert_eq!(cache.len(), 1);
        assert!(cache.get_or_parse("s%d").is_err());
        assert_eq!(cache.len(), 1);
    }
}
