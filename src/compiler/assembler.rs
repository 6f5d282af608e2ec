//! Program assembler.
//!
//! Wraps a [`CompiledExpr`] into complete GLSL ES fragment and vertex programs. Both
//! functions are pure string builders: the same input always produces the same text.

use std::{collections::HashSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{
    codegen::{COORD_VAR, CompiledExpr},
    glsl_lib::referenced_utilities,
    types::{Stage, ValueType, coerce},
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptionsError {
    #[error("unsupported GLSL version {0} (expected 100 or 300)")]
    UnsupportedGlslVersion(u32),
    #[error("unknown precision '{0}' (expected lowp, mediump or highp)")]
    UnknownPrecision(String),
}

/// Target shading-language version.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum GlslVersion {
    /// GLSL ES 1.00 (WebGL 1).
    Es100,
    /// GLSL ES 3.00 (WebGL 2).
    #[default]
    Es300,
}

impl GlslVersion {
    pub fn number(self) -> u32 {
        match self {
            GlslVersion::Es100 => 100,
            GlslVersion::Es300 => 300,
        }
    }

    pub fn is_es3(self) -> bool {
        self == GlslVersion::Es300
    }
}

impl TryFrom<u32> for GlslVersion {
    type Error = OptionsError;

    fn try_from(v: u32) -> Result<Self, Self::Error> {
        match v {
            100 => Ok(GlslVersion::Es100),
            300 => Ok(GlslVersion::Es300),
            other => Err(OptionsError::UnsupportedGlslVersion(other)),
        }
    }
}

impl From<GlslVersion> for u32 {
    fn from(v: GlslVersion) -> Self {
        v.number()
    }
}

impl FromStr for GlslVersion {
    type Err = OptionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim().trim_start_matches("es");
        digits
            .parse::<u32>()
            .map_err(|_| OptionsError::UnsupportedGlslVersion(0))
            .and_then(GlslVersion::try_from)
    }
}

/// Default float precision qualifier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Lowp,
    Mediump,
    #[default]
    Highp,
}

impl Precision {
    pub fn keyword(self) -> &'static str {
        match self {
            Precision::Lowp => "lowp",
            Precision::Mediump => "mediump",
            Precision::Highp => "highp",
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

impl FromStr for Precision {
    type Err = OptionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "lowp" => Ok(Precision::Lowp),
            "mediump" => Ok(Precision::Mediump),
            "highp" => Ok(Precision::Highp),
            other => Err(OptionsError::UnknownPrecision(other.to_string())),
        }
    }
}

/// Header settings for assembled programs. Never affects expression compilation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShaderOptions {
    pub glsl_version: GlslVersion,
    pub precision: Precision,
}

fn header(options: &ShaderOptions) -> String {
    let precision = format!("precision {} float;\n", options.precision);
    match options.glsl_version {
        GlslVersion::Es300 => format!("#version 300 es\n{precision}#define texture2D texture\n"),
        GlslVersion::Es100 => precision,
    }
}

fn parameter_decls(compiled: &CompiledExpr) -> String {
    compiled
        .parameters
        .iter()
        .map(|p| format!("{}\n", p.declaration()))
        .collect()
}

/// Referenced helpers followed by every transform function, bodies chosen for `stage`.
///
/// Transforms registered under different names may share one GLSL symbol; only the
/// first definition of each symbol is emitted.
fn function_block(compiled: &CompiledExpr, stage: Stage, options: &ShaderOptions) -> String {
    let es3 = options.glsl_version.is_es3();
    let mut symbols: HashSet<&str> = HashSet::new();
    let bodies: Vec<&str> = compiled
        .functions
        .iter()
        .filter(|t| symbols.insert(t.glsl_name.as_str()))
        .map(|t| t.glsl_for(stage, es3))
        .collect();

    let mut out = String::new();
    for util in referenced_utilities(&bodies) {
        out.push_str(util.glsl);
        out.push('\n');
    }
    for body in bodies {
        out.push_str(body);
        out.push('\n');
    }
    out
}

const BUILTIN_UNIFORMS: &str = "uniform float time;\nuniform vec2 resolution;\n";

/// Assemble the fragment program. The body is padded to `vec4` with opaque alpha.
pub fn assemble_fragment(compiled: &CompiledExpr, options: &ShaderOptions) -> String {
    let (varyings, output) = match options.glsl_version {
        GlslVersion::Es300 => ("in vec2 vUv;\nout vec4 fragColor;\n", "fragColor"),
        GlslVersion::Es100 => ("varying vec2 vUv;\n", "gl_FragColor"),
    };
    let color = coerce(&compiled.body, compiled.ty, ValueType::Vec4, 1.0);

    format!(
        "{header}{params}{BUILTIN_UNIFORMS}{varyings}\n{functions}void main () {{\n  vec2 {COORD_VAR} = vUv;\n  {output} = {color};\n}}\n",
        header = header(options),
        params = parameter_decls(compiled),
        functions = function_block(compiled, Stage::Fragment, options),
    )
}

/// Assemble the vertex program.
///
/// A chain rooted at a vertex transform displaces `position` by its compiled body.
/// Any other chain gets a pass-through program with no parameters or functions.
pub fn assemble_vertex(compiled: &CompiledExpr, options: &ShaderOptions) -> String {
    let es3 = options.glsl_version.is_es3();
    let attributes = if es3 {
        "in vec3 position;\nin vec2 uv;\n"
    } else {
        "attribute vec3 position;\nattribute vec2 uv;\n"
    };
    let varyings = if es3 { "out vec2 vUv;\n" } else { "varying vec2 vUv;\n" };
    let matrices = "uniform mat4 modelViewMatrix;\nuniform mat4 projectionMatrix;\n";

    if !compiled.vertex_stage {
        return format!(
            "{header}{attributes}{matrices}{varyings}\nvoid main () {{\n  vUv = uv;\n  gl_Position = projectionMatrix * modelViewMatrix * vec4(position, 1.0);\n}}\n",
            header = header(options),
        );
    }

    let displacement = coerce(&compiled.body, compiled.ty, ValueType::Vec4, 0.0);
    format!(
        "{header}{attributes}{matrices}{params}{BUILTIN_UNIFORMS}{varyings}\n{functions}void main () {{\n  vUv = uv;\n  vec2 {COORD_VAR} = uv;\n  vec4 displacement = {displacement};\n  gl_Position = projectionMatrix * modelViewMatrix * vec4(position + displacement.xyz, 1.0);\n}}\n",
        header = header(options),
        params = parameter_decls(compiled),
        functions = function_block(compiled, Stage::Vertex, options),
    )
}
