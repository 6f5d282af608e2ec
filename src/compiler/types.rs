//! Core type definitions for the compiler module.
//!
//! This is the type table: value types, operation categories with their fixed
//! GLSL signatures, and the scalar -> vector coercion rule shared by every stage
//! of code generation.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::utils::fmt_float;

/// GLSL value type for shader expressions and transform parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Float,
    Vec2,
    Vec3,
    Vec4,
    /// Opaque texture handle, declared as `sampler2D`.
    Texture,
}

impl ValueType {
    /// Returns the GLSL type name for this value type.
    pub fn glsl(self) -> &'static str {
        match self {
            ValueType::Float => "float",
            ValueType::Vec2 => "vec2",
            ValueType::Vec3 => "vec3",
            ValueType::Vec4 => "vec4",
            ValueType::Texture => "sampler2D",
        }
    }

    /// Number of scalar components. `None` for textures, which never coerce.
    pub fn width(self) -> Option<usize> {
        match self {
            ValueType::Float => Some(1),
            ValueType::Vec2 => Some(2),
            ValueType::Vec3 => Some(3),
            ValueType::Vec4 => Some(4),
            ValueType::Texture => None,
        }
    }

    pub fn from_width(width: usize) -> Option<ValueType> {
        match width {
            1 => Some(ValueType::Float),
            2 => Some(ValueType::Vec2),
            3 => Some(ValueType::Vec3),
            4 => Some(ValueType::Vec4),
            _ => None,
        }
    }

    /// Swizzle used to narrow a wider value down to this type.
    pub fn default_getter(self) -> Option<&'static str> {
        match self {
            ValueType::Float => Some("x"),
            ValueType::Vec2 => Some("xy"),
            ValueType::Vec3 => Some("xyz"),
            ValueType::Vec4 => Some("xyzw"),
            ValueType::Texture => None,
        }
    }

    pub fn is_numeric(self) -> bool {
        self.width().is_some()
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.glsl())
    }
}

impl FromStr for ValueType {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "float" | "f32" => Ok(ValueType::Float),
            "vec2" => Ok(ValueType::Vec2),
            "vec3" => Ok(ValueType::Vec3),
            "vec4" => Ok(ValueType::Vec4),
            "sampler2D" | "texture" => Ok(ValueType::Texture),
            other => Err(TypeError::UnknownValueType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    #[error("unknown operation category '{0}'")]
    UnknownCategory(String),
    #[error("unknown value type '{0}'")]
    UnknownValueType(String),
}

/// Composition category of a transform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Category {
    /// Produces a base color from a coordinate.
    Source,
    /// Remaps the coordinate fed to everything upstream of it.
    Coordinate,
    /// Post-processes the running color.
    Color,
    /// Mixes the running color with an independently compiled color chain.
    Combine,
    /// Mixes the coordinate with an independently compiled color chain.
    CombineCoordinate,
    /// Base producer for the vertex stage (displacement).
    Vertex,
    /// Base producer whose body is emitted verbatim.
    Raw,
}

/// One fixed leading argument of a category's GLSL signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedArg {
    pub name: &'static str,
    pub ty: ValueType,
}

/// Return type and fixed leading arguments shared by every transform of a category.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature {
    pub return_type: ValueType,
    pub fixed_args: &'static [FixedArg],
}

const ST: FixedArg = FixedArg { name: "_st", ty: ValueType::Vec2 };
const C0: FixedArg = FixedArg { name: "_c0", ty: ValueType::Vec4 };
const C1: FixedArg = FixedArg { name: "_c1", ty: ValueType::Vec4 };

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Source,
        Category::Coordinate,
        Category::Color,
        Category::Combine,
        Category::CombineCoordinate,
        Category::Vertex,
        Category::Raw,
    ];

    pub fn signature(self) -> Signature {
        match self {
            Category::Source | Category::Vertex | Category::Raw => Signature {
                return_type: ValueType::Vec4,
                fixed_args: &[ST],
            },
            Category::Coordinate => Signature {
                return_type: ValueType::Vec2,
                fixed_args: &[ST],
            },
            Category::Color => Signature {
                return_type: ValueType::Vec4,
                fixed_args: &[C0],
            },
            Category::Combine => Signature {
                return_type: ValueType::Vec4,
                fixed_args: &[C0, C1],
            },
            Category::CombineCoordinate => Signature {
                return_type: ValueType::Vec2,
                fixed_args: &[ST, C0],
            },
        }
    }

    /// Categories that may start a chain.
    pub fn is_root(self) -> bool {
        matches!(
            self,
            Category::Source | Category::Vertex | Category::Raw | Category::Coordinate
        )
    }

    /// Categories that may only start a chain.
    pub fn is_root_only(self) -> bool {
        matches!(self, Category::Source | Category::Vertex)
    }

    /// Categories that discard everything accumulated before them.
    pub fn resets(self) -> bool {
        matches!(self, Category::Source | Category::Vertex | Category::Raw)
    }

    /// Categories whose first binding is a second operand compiled as its own chain.
    pub fn has_operand(self) -> bool {
        matches!(self, Category::Combine | Category::CombineCoordinate)
    }

    /// Type this category consumes from the node before it, if it consumes anything.
    pub fn consumed_type(self) -> Option<ValueType> {
        match self {
            Category::Coordinate | Category::CombineCoordinate => Some(ValueType::Vec2),
            Category::Color | Category::Combine => Some(ValueType::Vec4),
            Category::Source | Category::Vertex | Category::Raw => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Category::Source => "src",
            Category::Coordinate => "coord",
            Category::Color => "color",
            Category::Combine => "combine",
            Category::CombineCoordinate => "combineCoord",
            Category::Vertex => "vert",
            Category::Raw => "raw",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Category {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "src" | "source" => Ok(Category::Source),
            "coord" | "coordinate" => Ok(Category::Coordinate),
            "color" => Ok(Category::Color),
            "combine" => Ok(Category::Combine),
            "combineCoord" | "combineCoordinate" => Ok(Category::CombineCoordinate),
            "vert" | "vertex" => Ok(Category::Vertex),
            "raw" => Ok(Category::Raw),
            other => Err(TypeError::UnknownCategory(other.to_string())),
        }
    }
}

/// Look up a category by its descriptor name together with its signature.
pub fn signature_of(category: &str) -> Result<(Category, Signature), TypeError> {
    let category: Category = category.parse()?;
    Ok((category, category.signature()))
}

/// Shader stage a program or function body is emitted for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Vertex,
    Fragment,
}

/// A typed GLSL expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypedExpr {
    pub ty: ValueType,
    pub expr: String,
}

impl TypedExpr {
    pub fn new(expr: impl Into<String>, ty: ValueType) -> Self {
        Self {
            ty,
            expr: expr.into(),
        }
    }

    /// Widen to `target` with [`coerce`]; the resulting type is the wider of the two.
    pub fn widen_to(self, target: ValueType, fill: f64) -> TypedExpr {
        let ty = wider(self.ty, target);
        TypedExpr::new(coerce(&self.expr, self.ty, target, fill), ty)
    }
}

/// The wider of two numeric types (`a` wins ties and non-numeric inputs).
pub fn wider(a: ValueType, b: ValueType) -> ValueType {
    match (a.width(), b.width()) {
        (Some(wa), Some(wb)) if wb > wa => b,
        _ => a,
    }
}

/// Widen `expr` from `from` to `to` by padding with a constructor of the wider type.
///
/// Padded slots take `fill`, except that a `vec4` target keeps its intermediate
/// padded slots at `0.0` and reserves `fill` for the last (alpha) slot. Equal widths,
/// narrowing and texture types return `expr` unchanged.
pub fn coerce(expr: &str, from: ValueType, to: ValueType, fill: f64) -> String {
    let (Some(from_w), Some(to_w)) = (from.width(), to.width()) else {
        return expr.to_string();
    };
    if from_w >= to_w {
        return expr.to_string();
    }

    let fill = fmt_float(fill);
    let mut parts = Vec::with_capacity(to_w - from_w + 1);
    parts.push(expr.to_string());
    for slot in from_w..to_w {
        let is_last = slot + 1 == to_w;
        if to == ValueType::Vec4 && !is_last {
            parts.push("0.0".to_string());
        } else {
            parts.push(fill.clone());
        }
    }
    format!("{}({})", to.glsl(), parts.join(", "))
}
