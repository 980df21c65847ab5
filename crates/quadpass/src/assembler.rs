//! Shader assembly.
//!
//! Turns terse snippets into complete GLSL programs. A fragment snippet can
//! be as short as an expression (`"UV, 0.0, 1.0"` becomes
//! `FOut = vec4(UV, 0.0, 1.0);`); a statement list is wrapped into
//! `void fragment() { ... }`; full functions are left alone. Both stages
//! share a prefix made of the built-in template, inferred uniforms,
//! varyings declared by the vertex snippet and the include chunks.

use std::sync::LazyLock;

use quadpass_core::collections::HashMap;
use quadpass_core::profiling::profile_function;
use regex::Regex;

use crate::uniforms::{Uniforms, infer_uniforms};

/// Helpers and built-in uniforms shared by every program.
pub const TEMPLATE: &str = include_str!("shaders/template.glsl");
const VERTEX_HEADER: &str = include_str!("shaders/vertex.glsl");
const VERTEX_MAIN: &str = include_str!("shaders/vertex_main.glsl");
const FRAGMENT_HEADER: &str = include_str!("shaders/fragment.glsl");
const FRAGMENT_MAIN: &str = include_str!("shaders/fragment_main.glsl");

static COMMENTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/\*[\s\S]*?\*/|//.*").expect("valid comment regex"));
static VARYING_DECL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bvarying\s+[^;]+;").expect("valid varying regex"));
static VARYING_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bvarying\s+\w+").expect("valid varying prefix regex"));
static INNER_PARENS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\([^()]*\)").expect("valid parens regex"));
static INITIALIZER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"=[^,;]*").expect("valid initializer regex"));
static VERTEX_ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bvertex\s*\(").expect("valid entry regex"));
static FRAGMENT_ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bfragment\s*\(").expect("valid entry regex"));

/// Snippet entry point: the function `main` calls and the output an
/// expression snippet assigns to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entry {
    Vertex,
    Fragment,
}

impl Entry {
    pub fn function(self) -> &'static str {
        match self {
            Entry::Vertex => "vertex",
            Entry::Fragment => "fragment",
        }
    }

    pub fn output(self) -> &'static str {
        match self {
            Entry::Vertex => "VPos",
            Entry::Fragment => "FOut",
        }
    }

    fn pattern(self) -> &'static Regex {
        match self {
            Entry::Vertex => &VERTEX_ENTRY,
            Entry::Fragment => &FRAGMENT_ENTRY,
        }
    }
}

/// Remove `/* ... */` and `// ...` comments.
pub fn strip_comments(code: &str) -> String {
    COMMENTS.replace_all(code, "").into_owned()
}

/// Expand a snippet into a definition of `entry`.
pub fn expand_code(code: &str, entry: Entry) -> String {
    let stripped = strip_comments(code);
    let body = stripped.trim();
    let mut code = code.to_string();
    if !body.is_empty() && !body.contains(';') {
        code = format!("{} = vec4({body});", entry.output());
    }
    if !entry.pattern().is_match(&stripped) {
        code = format!("void {}() {{\n  {code};\n}}", entry.function());
    }
    code
}

/// Varying declarations of a vertex snippet with initializers removed,
/// one per line.
///
/// `varying vec3 c = vec3(f(1), 0, 0), n;` yields `varying vec3 c , n;`.
pub fn extract_varyings(vertex: &str) -> String {
    let stripped = strip_comments(vertex);
    VARYING_DECL
        .find_iter(&stripped)
        .map(|decl| {
            let mut s = decl.as_str().to_string();
            loop {
                let next = INNER_PARENS.replace_all(&s, "");
                if next == s {
                    break;
                }
                s = next.into_owned();
            }
            INITIALIZER.replace_all(&s, "").into_owned()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Drop the `varying <type>` prefix so declarations become assignments.
pub fn strip_varyings(vertex: &str) -> String {
    VARYING_PREFIX.replace_all(vertex, "").into_owned()
}

/// Complete sources for both stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSources {
    pub vertex: String,
    pub fragment: String,
}

/// Builds programs from snippets, memoizing snippet expansion.
pub struct ShaderAssembler {
    glsl_header: String,
    expanded: HashMap<(Entry, String), String>,
}

impl ShaderAssembler {
    /// `glsl_header` is placed first in both stages (`#version` line and
    /// precision statements).
    pub fn new(glsl_header: impl Into<String>) -> Self {
        Self {
            glsl_header: glsl_header.into(),
            expanded: HashMap::default(),
        }
    }

    fn expand(&mut self, code: &str, entry: Entry) -> String {
        self.expanded
            .entry((entry, code.to_string()))
            .or_insert_with(|| expand_code(code, entry))
            .clone()
    }

    /// Assemble both stages. Uniform declarations are inferred for entries
    /// of `uniforms` not declared anywhere in the template, includes or
    /// snippets.
    pub fn assemble(&mut self, includes: &[String], vertex: &str, fragment: &str, uniforms: &Uniforms) -> ShaderSources {
        profile_function!();
        let inc = includes.join("\n");
        let all_code = [TEMPLATE, inc.as_str(), vertex, fragment].join("\n");
        let guessed = infer_uniforms(uniforms, &all_code);
        let varyings = extract_varyings(vertex);
        let prefix = format!("{TEMPLATE}\n{guessed}\n{varyings}\n{inc}\n");

        let vertex_body = self.expand(&strip_varyings(vertex), Entry::Vertex);
        let fragment_body = self.expand(fragment, Entry::Fragment);
        let header = &self.glsl_header;
        ShaderSources {
            vertex: format!("{header}\n{VERTEX_HEADER}\n{prefix}\n{vertex_body}\n{VERTEX_MAIN}"),
            fragment: format!("{header}\n{FRAGMENT_HEADER}\n{prefix}\n{fragment_body}\n{FRAGMENT_MAIN}"),
        }
    }

    pub fn clear(&mut self) {
        self.expanded.clear();
    }
}

/// Number every line of `source` for diagnostics.
pub fn numbered_listing(source: &str) -> String {
    source
        .lines()
        .enumerate()
        .map(|(i, line)| format!("{:>4}: {line}", i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uniforms::UniformValue;

    #[test]
    fn expression_becomes_output_assignment() {
        assert_eq!(
            expand_code("1.0, 0.0, 0.0, 1.0", Entry::Fragment),
            "void fragment() {\n  FOut = vec4(1.0, 0.0, 0.0, 1.0);;\n}"
        );
        assert_eq!(
            expand_code("XY, 0, 1", Entry::Vertex),
            "void vertex() {\n  VPos = vec4(XY, 0, 1);;\n}"
        );
    }

    #[test]
    fn statements_are_wrapped() {
        let code = "vec3 c = vec3(1); FOut = vec4(c, 1);";
        assert_eq!(expand_code(code, Entry::Fragment), format!("void fragment() {{\n  {code};\n}}"));
    }

    #[test]
    fn full_functions_are_untouched() {
        let code = "void fragment ( ) { FOut = vec4(1); }";
        assert_eq!(expand_code(code, Entry::Fragment), code);
        let helper = "float f() { return 1.0; }\nvoid vertex() { VPos = vec4(f()); }";
        assert_eq!(expand_code(helper, Entry::Vertex), helper);
    }

    #[test]
    fn comments_do_not_count() {
        // the semicolon and the entry name only appear in comments
        let code = "UV, 0, 1 // fragment(); ok";
        assert_eq!(
            expand_code(code, Entry::Fragment),
            "void fragment() {\n  FOut = vec4(UV, 0, 1);;\n}"
        );
    }

    #[test]
    fn empty_snippet_gets_empty_entry() {
        assert_eq!(expand_code("", Entry::Vertex), "void vertex() {\n  ;\n}");
    }

    #[test]
    fn varyings_with_nested_initializers() {
        let vp = "varying vec3 color = vec3(hash(ivec3(ID)).x, 0, 0), n = normalize(vec3(1));\n\
                  /* varying float hidden; */ varying vec2 p;\n\
                  VPos = vec4(XY, 0, 1);";
        assert_eq!(extract_varyings(vp), "varying vec3 color , n ;\nvarying vec2 p;");
    }

    #[test]
    fn stripping_turns_declarations_into_assignments() {
        let vp = "varying vec3 color = vec3(1,0,0); VPos = vec4(XY,0,1);";
        assert_eq!(strip_varyings(vp), " color = vec3(1,0,0); VPos = vec4(XY,0,1);");
    }

    #[test]
    fn assembled_program_layout() {
        let mut asm = ShaderAssembler::new("#version 300 es");
        let mut uniforms = Uniforms::new();
        uniforms.insert("tint".into(), UniformValue::Vector(vec![1.0, 0.5, 0.0, 1.0]));
        uniforms.insert("Grid".into(), UniformValue::IntVector(vec![1, 1, 1]));
        let inc = vec!["float twice(float x) { return 2.0*x; }".to_string()];
        let src = asm.assemble(&inc, "varying float v = 1.0;", "tint*v", &uniforms);

        assert!(src.vertex.starts_with("#version 300 es\n#define VERT"));
        assert!(src.fragment.starts_with("#version 300 es\n#define FRAG"));
        for stage in [&src.vertex, &src.fragment] {
            assert!(stage.contains("uniform vec4 tint;"));
            assert!(stage.contains("varying float v ;"));
            assert!(stage.contains("float twice(float x)"));
            // declared by the template already
            assert!(!stage.contains("uniform ivec3 Grid;\nuniform ivec3 Grid;"));
            assert_eq!(stage.matches("uniform ivec3 Grid;").count(), 1);
        }
        assert!(src.vertex.contains("void vertex() {\n   v = 1.0;;\n}"));
        assert!(src.fragment.contains("FOut = vec4(tint*v);"));
        assert!(src.vertex.trim_end().ends_with("VPos.xy *= Aspect;\n}"));
    }

    #[test]
    fn listing_is_line_numbered() {
        assert_eq!(numbered_listing("a\nb"), "   1: a\n   2: b");
    }
}
