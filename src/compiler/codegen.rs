//! Expression compiler.
//!
//! Flattens a chain (and every chain reachable through its bindings) into a single GLSL
//! expression, the uniforms it hoists and the transform functions it calls.
//!
//! The chain is folded left to right into an [`Emitter`]: a function from a coordinate
//! expression to the GLSL text of "everything compiled so far" evaluated at that
//! coordinate. Source-like nodes replace the emitter, color nodes wrap its output,
//! coordinate nodes wrap its input. Combine-style nodes compile their operand chain
//! into a second emitter and evaluate it at the same coordinate.
//!
//! Nested chains are re-expanded textually at every use site; nothing is shared.

use std::{collections::HashMap, fmt, sync::Arc};

use thiserror::Error;
use tracing::debug;

use super::{
    chain::{Binding, Callback, Chain, ChainId, ChainNode, Swizzle, TextureRef},
    registry::{Registry, Transform, TransformParam},
    types::{Category, TypedExpr, ValueType, wider},
    utils::fmt_float,
};

/// Name of the base coordinate variable bound by every entry point.
pub const COORD_VAR: &str = "st";

/// Value behind a hoisted uniform.
#[derive(Clone)]
pub enum ParamValue {
    Callback(Callback),
    Texture(TextureRef),
}

impl fmt::Debug for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Callback(_) => f.write_str("Callback(..)"),
            ParamValue::Texture(t) => f.debug_tuple("Texture").field(t).finish(),
        }
    }
}

/// A hoisted uniform the caller binds through its own upload mechanism.
#[derive(Clone, Debug)]
pub struct Parameter {
    pub name: String,
    pub ty: ValueType,
    pub value: ParamValue,
}

impl Parameter {
    /// Sample the callback behind a `float` uniform. `None` for textures.
    pub fn current_value(&self) -> Option<f64> {
        match &self.value {
            ParamValue::Callback(f) => Some(f()),
            ParamValue::Texture(_) => None,
        }
    }

    pub fn texture(&self) -> Option<&TextureRef> {
        match &self.value {
            ParamValue::Texture(t) => Some(t),
            ParamValue::Callback(_) => None,
        }
    }

    pub fn declaration(&self) -> String {
        format!("uniform {} {};", self.ty.glsl(), self.name)
    }
}

/// Output of one compilation.
#[derive(Clone, Debug)]
pub struct CompiledExpr {
    /// Expression in terms of [`COORD_VAR`].
    pub body: String,
    pub ty: ValueType,
    /// Hoisted uniforms, unique by name, in discovery order.
    pub parameters: Vec<Parameter>,
    /// Called transforms, unique by name, in discovery order.
    pub functions: Vec<Arc<Transform>>,
    /// Whether the chain starts with a vertex-stage transform.
    pub vertex_stage: bool,
}

impl CompiledExpr {
    pub fn function_names(&self) -> Vec<&str> {
        self.functions.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn parameter_names(&self) -> Vec<&str> {
        self.parameters.iter().map(|p| p.name.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("unknown transform '{name}' at position {position} of chain {chain}")]
    UnknownOperation {
        name: String,
        position: usize,
        chain: ChainId,
    },
    #[error(
        "'{name}' ({category}) can only start a chain; it cannot follow '{predecessor}' at position {position}"
    )]
    InvalidPosition {
        name: String,
        category: Category,
        predecessor: String,
        position: usize,
    },
    #[error(
        "'{name}' at position {position}: argument '{param}' expects {expected}, got {found}"
    )]
    TypeMismatch {
        name: String,
        position: usize,
        param: String,
        expected: ValueType,
        found: String,
    },
    #[error("'{name}' at position {position}: missing argument '{param}'")]
    MissingArgument {
        name: String,
        position: usize,
        param: String,
    },
    #[error("'{name}' at position {position}: takes at most {expected} argument(s), got {got}")]
    TooManyArguments {
        name: String,
        position: usize,
        expected: usize,
        got: usize,
    },
}

/// Resources referenced by one compilation, deduplicated by name.
#[derive(Default)]
pub struct CompileContext {
    pub parameters: Vec<Parameter>,
    pub parameter_index: HashMap<String, usize>,
    pub functions: Vec<Arc<Transform>>,
    pub function_index: HashMap<String, usize>,
}

impl CompileContext {
    /// Register a hoisted uniform and return its index.
    pub fn register_parameter(&mut self, parameter: Parameter) -> usize {
        if let Some(&idx) = self.parameter_index.get(&parameter.name) {
            return idx;
        }
        let idx = self.parameters.len();
        self.parameter_index.insert(parameter.name.clone(), idx);
        self.parameters.push(parameter);
        idx
    }

    /// Register a called transform and return its index. Keyed by transform name only.
    pub fn register_function(&mut self, transform: &Arc<Transform>) -> usize {
        if let Some(&idx) = self.function_index.get(&transform.name) {
            return idx;
        }
        let idx = self.functions.len();
        self.function_index.insert(transform.name.clone(), idx);
        self.functions.push(transform.clone());
        idx
    }
}

/// Accumulated "everything compiled so far".
enum Emitter {
    /// Nothing yet: the coordinate passes through.
    Identity,
    Expr {
        ty: ValueType,
        emit: Box<dyn Fn(&str) -> String>,
    },
}

impl Emitter {
    fn ty(&self) -> ValueType {
        match self {
            Emitter::Identity => ValueType::Vec2,
            Emitter::Expr { ty, .. } => *ty,
        }
    }

    fn emit(&self, coord: &str) -> String {
        match self {
            Emitter::Identity => coord.to_string(),
            Emitter::Expr { emit, .. } => emit(coord),
        }
    }

    fn typed(&self, coord: &str) -> TypedExpr {
        TypedExpr::new(self.emit(coord), self.ty())
    }
}

/// Second operand of a combine-style node.
enum Operand {
    /// Independent of the coordinate (literal or uniform).
    Fixed(String),
    /// Compiled chain, evaluated at the combining node's coordinate.
    Chain {
        emitter: Emitter,
        getter: Option<Swizzle>,
        expected: ValueType,
        declared: ValueType,
    },
}

impl Operand {
    fn emit(&self, coord: &str) -> String {
        match self {
            Operand::Fixed(s) => s.clone(),
            Operand::Chain {
                emitter,
                getter,
                expected,
                declared,
            } => {
                let value = adapt(emitter.typed(coord), getter.as_ref(), *expected, true);
                value.widen_to(*declared, 0.0).expr
            }
        }
    }
}

fn call(name: &str, leading: &[&str], args: &[String]) -> String {
    let parts: Vec<&str> = leading
        .iter()
        .copied()
        .chain(args.iter().map(String::as_str))
        .collect();
    format!("{name}({})", parts.join(", "))
}

/// Fit a chain's value to the slot consuming it.
///
/// An explicit getter always applies. Without one, a value wider than `target` is
/// narrowed with the target's default getter when `infer_getter` is set; narrower values
/// are widened with zero padding.
fn adapt(
    value: TypedExpr,
    getter: Option<&Swizzle>,
    target: ValueType,
    infer_getter: bool,
) -> TypedExpr {
    let value = match getter {
        Some(g) => TypedExpr::new(format!("{}.{}", value.expr, g), g.ty()),
        None if infer_getter && wider(target, value.ty) == value.ty && value.ty != target => {
            match target.default_getter() {
                Some(g) => TypedExpr::new(format!("{}.{g}", value.expr), target),
                None => value,
            }
        }
        None => value,
    };
    value.widen_to(target, 0.0)
}

fn uniform_name(path: &[usize], arg: usize) -> String {
    let mut parts: Vec<String> = path.iter().map(usize::to_string).collect();
    parts.push(arg.to_string());
    format!("u{}", parts.join("_"))
}

/// Chain-wide compilation state threaded through the recursive fold.
struct Compiler<'r> {
    registry: &'r Registry,
    ctx: CompileContext,
}

/// A node together with its index in the chain it was written in.
type IndexedNode<'c> = (usize, &'c ChainNode);

impl<'r> Compiler<'r> {
    fn lookup(&self, position: usize, node: &ChainNode) -> Result<Arc<Transform>, CompileError> {
        self.registry
            .get(&node.name)
            .cloned()
            .ok_or_else(|| CompileError::UnknownOperation {
                name: node.name.clone(),
                position,
                chain: node.chain_id,
            })
    }

    /// Type the node after `k` consumes, or `expected` if it is the last one.
    fn lookahead(&self, nodes: &[IndexedNode<'_>], k: usize, expected: ValueType) -> ValueType {
        nodes
            .get(k + 1)
            .and_then(|(_, next)| self.registry.get(&next.name))
            .and_then(|t| t.category.consumed_type())
            .unwrap_or(expected)
    }

    fn fold(
        &mut self,
        nodes: &[IndexedNode<'_>],
        expected: ValueType,
        path: &[usize],
    ) -> Result<Emitter, CompileError> {
        let mut emitter = Emitter::Identity;
        for (k, &(position, node)) in nodes.iter().enumerate() {
            let transform = self.lookup(position, node)?;
            if position > 0 && transform.category.is_root_only() {
                let predecessor = match k {
                    0 => String::new(),
                    _ => nodes[k - 1].1.name.clone(),
                };
                return Err(CompileError::InvalidPosition {
                    name: node.name.clone(),
                    category: transform.category,
                    predecessor,
                    position,
                });
            }
            if node.bindings.len() > transform.params.len() {
                return Err(CompileError::TooManyArguments {
                    name: node.name.clone(),
                    position,
                    expected: transform.params.len(),
                    got: node.bindings.len(),
                });
            }

            let node_expected = self.lookahead(nodes, k, expected);
            self.ctx.register_function(&transform);

            let mut node_path = path.to_vec();
            node_path.push(position);

            let mut operand = None;
            let mut offset = 0;
            if let Some(param) = transform.operand() {
                let operand_expected = match transform.category {
                    Category::CombineCoordinate => node_expected,
                    _ => ValueType::Vec4,
                };
                operand = Some(self.operand(
                    &transform,
                    position,
                    param,
                    node.bindings.first(),
                    operand_expected,
                    &node_path,
                    0,
                )?);
                offset = 1;
            }

            let custom = transform.custom_params();
            let mut args = Vec::with_capacity(custom.len());
            for (i, param) in custom.iter().enumerate() {
                let j = i + offset;
                args.push(self.argument(&transform, position, param, node.bindings.get(j), &node_path, j)?);
            }

            emitter = apply(emitter, &transform, operand, args);
        }
        Ok(emitter)
    }

    /// Resolve a regular argument to GLSL text of the parameter's declared type.
    fn argument(
        &mut self,
        transform: &Transform,
        position: usize,
        param: &TransformParam,
        binding: Option<&Binding>,
        path: &[usize],
        arg: usize,
    ) -> Result<String, CompileError> {
        let mismatch = |found: &str| CompileError::TypeMismatch {
            name: transform.name.clone(),
            position,
            param: param.name.clone(),
            expected: param.ty,
            found: found.to_string(),
        };

        match binding {
            None => match param.default {
                Some(v) => Ok(TypedExpr::new(fmt_float(v), ValueType::Float)
                    .widen_to(param.ty, 0.0)
                    .expr),
                None => Err(CompileError::MissingArgument {
                    name: transform.name.clone(),
                    position,
                    param: param.name.clone(),
                }),
            },
            Some(Binding::Literal(v)) => {
                if !param.ty.is_numeric() {
                    return Err(mismatch("literal"));
                }
                Ok(TypedExpr::new(fmt_float(*v), ValueType::Float)
                    .widen_to(param.ty, 0.0)
                    .expr)
            }
            Some(Binding::Callback(f)) => {
                if !param.ty.is_numeric() {
                    return Err(mismatch("callback"));
                }
                let name = self.hoist(path, arg, ValueType::Float, ParamValue::Callback(f.clone()));
                Ok(TypedExpr::new(name, ValueType::Float)
                    .widen_to(param.ty, 0.0)
                    .expr)
            }
            Some(Binding::Texture(t)) => {
                if param.ty != ValueType::Texture {
                    return Err(mismatch("texture"));
                }
                Ok(self.hoist(path, arg, ValueType::Texture, ParamValue::Texture(t.clone())))
            }
            Some(Binding::Chain(sub)) => {
                if !param.ty.is_numeric() {
                    return Err(mismatch("chain"));
                }
                let mut sub_path = path.to_vec();
                sub_path.push(arg);
                let emitter = self.fold(&indexed(sub), param.ty, &sub_path)?;
                // nested argument chains start from the base coordinate
                Ok(adapt(emitter.typed(COORD_VAR), sub.getter(), param.ty, true).expr)
            }
        }
    }

    /// Resolve the operand of a combine-style node.
    #[allow(clippy::too_many_arguments)]
    fn operand(
        &mut self,
        transform: &Transform,
        position: usize,
        param: &TransformParam,
        binding: Option<&Binding>,
        expected: ValueType,
        path: &[usize],
        arg: usize,
    ) -> Result<Operand, CompileError> {
        let constant = |expr: String| {
            TypedExpr::new(expr, ValueType::Float)
                .widen_to(expected, 0.0)
                .widen_to(param.ty, 0.0)
                .expr
        };

        match binding {
            None => Err(CompileError::MissingArgument {
                name: transform.name.clone(),
                position,
                param: param.name.clone(),
            }),
            Some(Binding::Literal(v)) => Ok(Operand::Fixed(constant(fmt_float(*v)))),
            Some(Binding::Callback(f)) => {
                let name = self.hoist(path, arg, ValueType::Float, ParamValue::Callback(f.clone()));
                Ok(Operand::Fixed(constant(name)))
            }
            Some(Binding::Texture(_)) => Err(CompileError::TypeMismatch {
                name: transform.name.clone(),
                position,
                param: param.name.clone(),
                expected: param.ty,
                found: "texture".to_string(),
            }),
            Some(Binding::Chain(sub)) => {
                let mut sub_path = path.to_vec();
                sub_path.push(arg);
                let emitter = self.fold(&indexed(sub), expected, &sub_path)?;
                Ok(Operand::Chain {
                    emitter,
                    getter: sub.getter().cloned(),
                    expected,
                    declared: param.ty,
                })
            }
        }
    }

    fn hoist(&mut self, path: &[usize], arg: usize, ty: ValueType, value: ParamValue) -> String {
        let name = uniform_name(path, arg);
        self.ctx.register_parameter(Parameter {
            name: name.clone(),
            ty,
            value,
        });
        name
    }
}

/// Extend the emitter with one node according to its category.
fn apply(
    prior: Emitter,
    transform: &Transform,
    operand: Option<Operand>,
    args: Vec<String>,
) -> Emitter {
    let name = transform.glsl_name.clone();
    match transform.category {
        Category::Source | Category::Vertex | Category::Raw => Emitter::Expr {
            ty: transform.return_type,
            emit: Box::new(move |coord: &str| call(&name, &[coord], &args)),
        },
        Category::Coordinate => Emitter::Expr {
            ty: prior.ty(),
            emit: Box::new(move |coord: &str| prior.emit(&call(&name, &[coord], &args))),
        },
        Category::Color => Emitter::Expr {
            ty: transform.return_type,
            emit: Box::new(move |coord: &str| {
                let color = prior.typed(coord).widen_to(ValueType::Vec4, 0.0);
                call(&name, &[color.expr.as_str()], &args)
            }),
        },
        Category::Combine => {
            let operand = operand.unwrap_or(Operand::Fixed("vec4(0.0)".to_string()));
            Emitter::Expr {
                ty: transform.return_type,
                emit: Box::new(move |coord: &str| {
                    let color = prior.typed(coord).widen_to(ValueType::Vec4, 0.0);
                    let other = operand.emit(coord);
                    call(&name, &[color.expr.as_str(), other.as_str()], &args)
                }),
            }
        }
        Category::CombineCoordinate => {
            let operand = operand.unwrap_or(Operand::Fixed("vec4(0.0)".to_string()));
            Emitter::Expr {
                ty: prior.ty(),
                emit: Box::new(move |coord: &str| {
                    let other = operand.emit(coord);
                    prior.emit(&call(&name, &[coord, other.as_str()], &args))
                }),
            }
        }
    }
}

fn indexed(chain: &Chain) -> Vec<IndexedNode<'_>> {
    chain.nodes().iter().enumerate().collect()
}

fn finish(
    registry: &Registry,
    chain: &Chain,
    nodes: &[IndexedNode<'_>],
    expected: ValueType,
) -> Result<CompiledExpr, CompileError> {
    let mut compiler = Compiler {
        registry,
        ctx: CompileContext::default(),
    };
    let emitter = compiler.fold(nodes, expected, &[])?;
    let value = adapt(emitter.typed(COORD_VAR), chain.getter(), expected, false);

    let vertex_stage = nodes
        .first()
        .and_then(|(_, node)| registry.get(&node.name))
        .is_some_and(|t| t.category == Category::Vertex);

    debug!(
        chain = %chain.id(),
        nodes = nodes.len(),
        functions = compiler.ctx.functions.len(),
        uniforms = compiler.ctx.parameters.len(),
        "compiled chain"
    );

    Ok(CompiledExpr {
        body: value.expr,
        ty: value.ty,
        parameters: compiler.ctx.parameters,
        functions: compiler.ctx.functions,
        vertex_stage,
    })
}

/// Compile a chain into one expression of (at least) type `expected`.
///
/// Narrower results are zero-padded up to `expected`; wider results are left as-is
/// unless the chain carries an explicit getter.
pub fn compile(
    registry: &Registry,
    chain: &Chain,
    expected: ValueType,
) -> Result<CompiledExpr, CompileError> {
    finish(registry, chain, &indexed(chain), expected)
}

/// Compile the coordinate-only view of a chain for the vertex stage.
///
/// Combine nodes depend on fragment-only color mixing and are filtered out before
/// compiling. Remaining nodes keep their original positions, so hoisted uniforms get
/// the same names as in the fragment compilation.
pub fn compile_vertex(registry: &Registry, chain: &Chain) -> Result<CompiledExpr, CompileError> {
    let mut nodes = Vec::with_capacity(chain.len());
    for (position, node) in chain.nodes().iter().enumerate() {
        let category = registry
            .get(&node.name)
            .map(|t| t.category)
            .ok_or_else(|| CompileError::UnknownOperation {
                name: node.name.clone(),
                position,
                chain: node.chain_id,
            })?;
        if category != Category::Combine {
            nodes.push((position, node));
        }
    }
    finish(registry, chain, &nodes, ValueType::Vec4)
}
