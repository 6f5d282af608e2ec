//! Expression chains: the user-facing value built by invoking a root transform and
//! chaining further transforms onto it by name.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{
    registry::Registry,
    types::{Category, ValueType},
};

/// Zero-argument value source sampled by the caller once per frame.
pub type Callback = Arc<dyn Fn() -> f64 + Send + Sync>;

/// Reference to a previously rendered output or external texture, opaque to the compiler.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextureRef(pub String);

impl TextureRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

/// One argument supplied to a transform call.
#[derive(Clone)]
pub enum Binding {
    /// Inlined into the generated expression.
    Literal(f64),
    /// Hoisted into a `float` uniform.
    Callback(Callback),
    /// Compiled recursively and re-expanded at this use site.
    Chain(Arc<Chain>),
    /// Hoisted into a `sampler2D` uniform.
    Texture(TextureRef),
}

impl Binding {
    pub fn callback(f: impl Fn() -> f64 + Send + Sync + 'static) -> Self {
        Binding::Callback(Arc::new(f))
    }

    pub fn texture(name: impl Into<String>) -> Self {
        Binding::Texture(TextureRef::new(name))
    }

    /// A hoisted uniform whose value never changes.
    pub fn constant_uniform(v: f64) -> Self {
        Binding::callback(move || v)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Binding::Literal(_) => "literal",
            Binding::Callback(_) => "callback",
            Binding::Chain(_) => "chain",
            Binding::Texture(_) => "texture",
        }
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Literal(v) => f.debug_tuple("Literal").field(v).finish(),
            Binding::Callback(_) => f.write_str("Callback(..)"),
            Binding::Chain(c) => f.debug_tuple("Chain").field(c).finish(),
            Binding::Texture(t) => f.debug_tuple("Texture").field(t).finish(),
        }
    }
}

impl From<f64> for Binding {
    fn from(v: f64) -> Self {
        Binding::Literal(v)
    }
}

impl From<f32> for Binding {
    fn from(v: f32) -> Self {
        Binding::Literal(v as f64)
    }
}

impl From<i32> for Binding {
    fn from(v: i32) -> Self {
        Binding::Literal(v as f64)
    }
}

impl From<Chain> for Binding {
    fn from(c: Chain) -> Self {
        Binding::Chain(Arc::new(c))
    }
}

impl From<&Chain> for Binding {
    fn from(c: &Chain) -> Self {
        Binding::Chain(Arc::new(c.clone()))
    }
}

impl From<Arc<Chain>> for Binding {
    fn from(c: Arc<Chain>) -> Self {
        Binding::Chain(c)
    }
}

impl From<TextureRef> for Binding {
    fn from(t: TextureRef) -> Self {
        Binding::Texture(t)
    }
}

/// Component accessor applied when a chain is consumed as an argument.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Swizzle(String);

impl Swizzle {
    /// Accepts 1-4 components drawn from a single set (`xyzw` or `rgba`).
    pub fn parse(s: &str) -> Result<Self, ChainError> {
        let valid_len = (1..=4).contains(&s.len());
        let in_set = |set: &str| s.chars().all(|c| set.contains(c));
        if valid_len && (in_set("xyzw") || in_set("rgba")) {
            Ok(Swizzle(s.to_string()))
        } else {
            Err(ChainError::InvalidSwizzle(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Type of the value produced by this accessor.
    pub fn ty(&self) -> ValueType {
        ValueType::from_width(self.0.len()).unwrap_or(ValueType::Vec4)
    }
}

impl fmt::Display for Swizzle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Process-unique identity of a chain, carried by its nodes for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainId(u64);

impl ChainId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ChainId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One applied transform.
#[derive(Clone, Debug)]
pub struct ChainNode {
    pub name: String,
    /// Category at construction time; compilation re-resolves against its own snapshot.
    pub category: Category,
    pub bindings: Vec<Binding>,
    pub chain_id: ChainId,
}

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("unknown transform '{name}'")]
    UnknownOperation { name: String },
    #[error("'{name}' ({category}) cannot start a chain")]
    NotARoot { name: String, category: Category },
    #[error(
        "'{name}' ({category}) can only start a chain; it cannot follow '{predecessor}' ({predecessor_category}) at position {position}"
    )]
    InvalidPosition {
        name: String,
        category: Category,
        predecessor: String,
        predecessor_category: Category,
        position: usize,
    },
    #[error("'{name}' takes at most {expected} argument(s), got {got}")]
    TooManyArguments {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("invalid swizzle '{0}' (expected 1-4 of xyzw or rgba)")]
    InvalidSwizzle(String),
}

/// Ordered, append-only sequence of applied transforms.
#[derive(Clone)]
pub struct Chain {
    id: ChainId,
    registry: Arc<Registry>,
    nodes: Vec<ChainNode>,
    getter: Option<Swizzle>,
}

impl Chain {
    /// Start a chain with a root transform (`src`, `vert`, `raw` or `coord`).
    pub fn root(
        registry: &Arc<Registry>,
        name: &str,
        args: impl IntoIterator<Item = Binding>,
    ) -> Result<Chain, ChainError> {
        let transform = registry
            .get(name)
            .ok_or_else(|| ChainError::UnknownOperation {
                name: name.to_string(),
            })?;
        if !transform.category.is_root() {
            return Err(ChainError::NotARoot {
                name: name.to_string(),
                category: transform.category,
            });
        }

        let mut chain = Chain {
            id: ChainId::next(),
            registry: registry.clone(),
            nodes: Vec::new(),
            getter: None,
        };
        chain.push(name, transform.category, transform.params.len(), args)?;
        Ok(chain)
    }

    /// Append a transform by name. On error the chain is left unchanged.
    pub fn then(
        &mut self,
        name: &str,
        args: impl IntoIterator<Item = Binding>,
    ) -> Result<&mut Self, ChainError> {
        let transform = self
            .registry
            .get(name)
            .ok_or_else(|| ChainError::UnknownOperation {
                name: name.to_string(),
            })?
            .clone();
        if transform.category.is_root_only() {
            if let Some(last) = self.nodes.last() {
                return Err(ChainError::InvalidPosition {
                    name: name.to_string(),
                    category: transform.category,
                    predecessor: last.name.clone(),
                    predecessor_category: last.category,
                    position: self.nodes.len(),
                });
            }
        }
        self.push(name, transform.category, transform.params.len(), args)?;
        Ok(self)
    }

    fn push(
        &mut self,
        name: &str,
        category: Category,
        max_args: usize,
        args: impl IntoIterator<Item = Binding>,
    ) -> Result<(), ChainError> {
        let bindings: Vec<Binding> = args.into_iter().collect();
        if bindings.len() > max_args {
            return Err(ChainError::TooManyArguments {
                name: name.to_string(),
                expected: max_args,
                got: bindings.len(),
            });
        }
        self.nodes.push(ChainNode {
            name: name.to_string(),
            category,
            bindings,
            chain_id: self.id,
        });
        Ok(())
    }

    /// Select components when this chain is consumed as an argument.
    pub fn swizzle(&mut self, getter: &str) -> Result<&mut Self, ChainError> {
        self.getter = Some(Swizzle::parse(getter)?);
        Ok(self)
    }

    pub fn id(&self) -> ChainId {
        self.id
    }

    pub fn nodes(&self) -> &[ChainNode] {
        &self.nodes
    }

    pub fn getter(&self) -> Option<&Swizzle> {
        self.getter.as_ref()
    }

    /// Registry snapshot this chain was built against.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("id", &self.id)
            .field("nodes", &self.nodes)
            .field("getter", &self.getter)
            .finish_non_exhaustive()
    }
}
