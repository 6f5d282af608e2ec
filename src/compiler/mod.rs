//! Chain compiler: type table, transform registry, expression chains, the expression
//! compiler and the program assembler.

pub mod assembler;
pub mod chain;
pub mod codegen;
pub mod glsl_lib;
pub mod registry;
pub mod types;
pub mod utils;

use std::{
    collections::HashSet,
    sync::atomic::{AtomicU64, Ordering},
};

use tracing::debug;

pub use assembler::{GlslVersion, Precision, ShaderOptions, assemble_fragment, assemble_vertex};
pub use chain::{Binding, Callback, Chain, ChainError, ChainId, Swizzle, TextureRef};
pub use codegen::{
    CompileError, CompiledExpr, ParamValue, Parameter, compile, compile_vertex,
};
pub use registry::{
    OperationDescriptor, ParameterDescriptor, Registry, RegistrationError, SharedRegistry,
    Transform,
};
pub use types::{Category, ValueType, coerce};

/// Both stages of a compiled chain plus the uniforms the caller has to bind.
#[derive(Clone, Debug)]
pub struct ShaderProgram {
    pub fragment: String,
    pub vertex: String,
    /// Union of both stages' uniforms, unique by name.
    pub uniforms: Vec<Parameter>,
    /// Synthetic identifier scoping the uniforms of this program at runtime. Unstable
    /// across runs and never part of any shader text.
    pub group: String,
}

fn next_group() -> String {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    format!("chain-group-{}", NEXT.fetch_add(1, Ordering::Relaxed))
}

/// Compile `chain` against `registry` and assemble both stages.
pub fn build_program(
    registry: &Registry,
    chain: &Chain,
    options: &ShaderOptions,
) -> Result<ShaderProgram, CompileError> {
    let fragment = compile(registry, chain, ValueType::Vec4)?;
    let vertex = compile_vertex(registry, chain)?;

    let mut seen = HashSet::new();
    let mut uniforms = Vec::new();
    let vertex_uniforms = if vertex.vertex_stage {
        vertex.parameters.as_slice()
    } else {
        &[]
    };
    for p in fragment.parameters.iter().chain(vertex_uniforms) {
        if seen.insert(p.name.clone()) {
            uniforms.push(p.clone());
        }
    }

    let program = ShaderProgram {
        fragment: assemble_fragment(&fragment, options),
        vertex: assemble_vertex(&vertex, options),
        uniforms,
        group: next_group(),
    };
    debug!(
        chain = %chain.id(),
        group = %program.group,
        uniforms = program.uniforms.len(),
        "built shader program"
    );
    Ok(program)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn registry() -> Arc<Registry> {
        Arc::new(Registry::from_descriptors(&[
            OperationDescriptor::new("plain", "src", "return vec4(_st, 0.0, 1.0);"),
            OperationDescriptor::new("rotate", "coord", "return _st;").param("angle", "float", Some(0.0)),
            OperationDescriptor::new("blend", "combine", "return mix(_c0, _c1, amount);")
                .param("amount", "float", Some(0.5)),
            OperationDescriptor::new("wave", "vert", "return vec4(0.0, 0.0, sin(_st.x) * amount, 0.0);")
                .param("amount", "float", Some(0.1)),
        ]))
    }

    #[test]
    fn uniforms_are_merged_across_stages() {
        let reg = registry();
        let other = Chain::root(&reg, "plain", []).unwrap();
        let mut chain = Chain::root(&reg, "wave", [Binding::constant_uniform(0.2)]).unwrap();
        chain
            .then("blend", [other.into(), Binding::constant_uniform(0.5)])
            .unwrap()
            .then("rotate", [Binding::constant_uniform(1.0)])
            .unwrap();
        let program = build_program(&reg, &chain, &ShaderOptions::default()).unwrap();
        let names: Vec<&str> = program.uniforms.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["u0_0", "u1_1", "u2_0"]);
        assert!(program.vertex.contains("uniform float u2_0;"));
        assert!(!program.vertex.contains("u1_1"));
        assert!(program.fragment.contains("uniform float u1_1;"));
    }

    #[test]
    fn group_ids_are_unique_and_stay_out_of_shader_text() {
        let reg = registry();
        let chain = Chain::root(&reg, "plain", []).unwrap();
        let a = build_program(&reg, &chain, &ShaderOptions::default()).unwrap();
        let b = build_program(&reg, &chain, &ShaderOptions::default()).unwrap();
        assert_ne!(a.group, b.group);
        assert_eq!(a.fragment, b.fragment);
        assert_eq!(a.vertex, b.vertex);
        assert!(!a.fragment.contains(&a.group));
        assert!(!a.vertex.contains(&a.group));
    }
}
