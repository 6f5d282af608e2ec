//! JSON chain scripts.
//!
//! A script names shader options, optional extra transform descriptors and one chain:
//!
//! ```json
//! {
//!   "options": { "glslVersion": 300, "precision": "highp" },
//!   "chain": { "ops": [
//!     { "op": "osc", "args": [20, { "uniform": 0.1 }] },
//!     { "op": "modulate", "args": [{ "ops": [{ "op": "noise" }] }, 0.3] }
//!   ] }
//! }
//! ```
//!
//! Numbers are inlined literals, `{"uniform": v}` hoists a constant uniform,
//! `{"texture": "name"}` binds a texture, and `{"ops": [...], "getter": "xy"}` nests a chain.

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::compiler::{
    Binding, Chain, OperationDescriptor, Registry, ShaderOptions, ShaderProgram, build_program,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptDSL {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub options: ShaderOptions,
    /// Extra descriptors registered on top of the base catalog for this script only.
    #[serde(default)]
    pub transforms: Vec<OperationDescriptor>,
    pub chain: ChainDSL,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainDSL {
    pub ops: Vec<OpDSL>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub getter: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpDSL {
    pub op: String,
    #[serde(default)]
    pub args: Vec<ArgDSL>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgDSL {
    Number(f64),
    Uniform { uniform: f64 },
    Texture { texture: String },
    Chain(ChainDSL),
}

pub fn parse_script(text: &str) -> Result<ScriptDSL> {
    serde_json::from_str(text).context("failed to parse chain script json")
}

pub fn load_script_from_path(path: impl AsRef<Path>) -> Result<ScriptDSL> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read chain script at {}", path.display()))?;
    parse_script(&text).with_context(|| format!("in {}", path.display()))
}

/// `base` plus the script's own descriptors. Any descriptor that fails to register is an
/// error here, unlike the built-in catalog where bad entries are skipped.
pub fn script_registry(base: &Registry, script: &ScriptDSL) -> Result<Registry> {
    let mut registry = base.clone();
    let errors = registry.extend(&script.transforms);
    if !errors.is_empty() {
        let lines: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        bail!("invalid script transforms:\n- {}", lines.join("\n- "));
    }
    Ok(registry)
}

fn build_args(registry: &Arc<Registry>, args: &[ArgDSL]) -> Result<Vec<Binding>> {
    args.iter()
        .enumerate()
        .map(|(i, arg)| -> Result<Binding> {
            Ok(match arg {
                ArgDSL::Number(v) => Binding::Literal(*v),
                ArgDSL::Uniform { uniform } => Binding::constant_uniform(*uniform),
                ArgDSL::Texture { texture } => Binding::texture(texture.clone()),
                ArgDSL::Chain(c) => build_chain(registry, c)
                    .with_context(|| format!("nested chain in argument {i}"))?
                    .into(),
            })
        })
        .collect()
}

pub fn build_chain(registry: &Arc<Registry>, dsl: &ChainDSL) -> Result<Chain> {
    let Some((first, rest)) = dsl.ops.split_first() else {
        bail!("chain has no ops");
    };

    let args = build_args(registry, &first.args).with_context(|| format!("op #0 '{}'", first.op))?;
    let mut chain =
        Chain::root(registry, &first.op, args).with_context(|| format!("op #0 '{}'", first.op))?;

    for (i, op) in rest.iter().enumerate() {
        let position = i + 1;
        let args =
            build_args(registry, &op.args).with_context(|| format!("op #{position} '{}'", op.op))?;
        chain
            .then(&op.op, args)
            .with_context(|| format!("op #{position} '{}'", op.op))?;
    }

    if let Some(getter) = &dsl.getter {
        chain.swizzle(getter)?;
    }
    Ok(chain)
}

/// Register the script's transforms on top of `base`, build its chain and assemble it.
pub fn compile_script(base: &Registry, script: &ScriptDSL) -> Result<ShaderProgram> {
    let registry = Arc::new(script_registry(base, script)?);
    let chain = build_chain(&registry, &script.chain)?;
    let program = build_program(&registry, &chain, &script.options)
        .with_context(|| format!("failed to compile chain {}", chain.id()))?;
    Ok(program)
}
