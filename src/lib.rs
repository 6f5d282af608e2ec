pub mod compiler;
pub mod dsl;
pub mod schema;

pub use compiler::{
    Binding, Chain, CompileError, CompiledExpr, Registry, ShaderOptions, ShaderProgram,
    SharedRegistry, ValueType, build_program, compile, compile_vertex,
};
