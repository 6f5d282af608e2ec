//! Transform registry.
//!
//! Operation descriptors are declarative (name, category, parameters, GLSL body). The
//! registry normalizes each one against the type table into a [`Transform`]: a complete
//! GLSL function definition plus the ordered binding slots a chain call fills in.
//!
//! A [`Registry`] is never mutated once shared. Hot reloading goes through
//! [`SharedRegistry`], which builds a fresh registry and swaps the `Arc` snapshot, so an
//! in-flight compilation never observes a half-updated catalog.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, PoisonError, RwLock},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::{
    types::{Category, FixedArg, Stage, TypeError, ValueType, signature_of},
    utils::{indent_lines, is_glsl_ident, token_key},
};
use crate::schema;

/// Declarative definition of one named transform, as shipped in a catalog.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OperationDescriptor {
    pub name: String,
    /// Category name (`src`, `coord`, `color`, `combine`, `combineCoord`, `vert`, `raw`).
    #[serde(rename = "type")]
    pub category: String,
    #[serde(rename = "inputs", default)]
    pub parameters: Vec<ParameterDescriptor>,
    pub glsl: GlslSource,
    /// Variant used when targeting GLSL ES 3.00.
    #[serde(rename = "glsl300", default, skip_serializing_if = "Option::is_none")]
    pub glsl_es3: Option<GlslSource>,
    /// Variant used when the function is emitted into a vertex program.
    #[serde(rename = "vertexGlsl", default, skip_serializing_if = "Option::is_none")]
    pub vertex_glsl: Option<GlslSource>,
    /// Function symbol; defaults to `name`.
    #[serde(rename = "glslName", default, skip_serializing_if = "Option::is_none")]
    pub glsl_name: Option<String>,
}

impl OperationDescriptor {
    pub fn new(name: impl Into<String>, category: impl Into<String>, glsl: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            parameters: Vec::new(),
            glsl: GlslSource::Text(glsl.into()),
            glsl_es3: None,
            vertex_glsl: None,
            glsl_name: None,
        }
    }

    pub fn param(mut self, name: impl Into<String>, ty: impl Into<String>, default: Option<f64>) -> Self {
        self.parameters.push(ParameterDescriptor {
            name: name.into(),
            ty: ty.into(),
            default,
        });
        self
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ParameterDescriptor {
    pub name: String,
    #[serde(rename = "type", default = "default_parameter_type")]
    pub ty: String,
    #[serde(default)]
    pub default: Option<f64>,
}

fn default_parameter_type() -> String {
    "float".to_string()
}

/// GLSL text, either as one string or as a list of lines.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum GlslSource {
    Text(String),
    Lines(Vec<String>),
}

impl GlslSource {
    pub fn text(&self) -> String {
        match self {
            GlslSource::Text(s) => s.clone(),
            GlslSource::Lines(lines) => lines.join("\n"),
        }
    }
}

impl From<&str> for GlslSource {
    fn from(s: &str) -> Self {
        GlslSource::Text(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("transform '{name}': {source}")]
    Type {
        name: String,
        #[source]
        source: TypeError,
    },
    #[error("transform '{name}': '{symbol}' is not a valid GLSL identifier")]
    InvalidName { name: String, symbol: String },
    #[error("transform '{name}': duplicate parameter '{param}'")]
    DuplicateParameter { name: String, param: String },
}

/// One binding slot of a transform call.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformParam {
    pub name: String,
    pub ty: ValueType,
    /// Normalized default. `None` only for texture parameters and the implicit
    /// combine operand, both of which must be bound explicitly.
    pub default: Option<f64>,
}

/// A normalized, registered transform.
#[derive(Debug, Clone)]
pub struct Transform {
    pub name: String,
    pub glsl_name: String,
    pub category: Category,
    pub return_type: ValueType,
    pub fixed_args: &'static [FixedArg],
    /// Binding slots in call order. Combine-style categories start with the implicit
    /// `color` operand slot.
    pub params: Vec<TransformParam>,
    /// Complete GLSL function definition.
    pub glsl: String,
    pub glsl_es3: Option<String>,
    pub vertex_glsl: Option<String>,
}

/// Name of the implicit operand slot prepended to combine-style transforms.
pub const OPERAND_PARAM: &str = "color";

impl Transform {
    /// The operand slot of a combine-style transform.
    pub fn operand(&self) -> Option<&TransformParam> {
        if self.category.has_operand() {
            self.params.first()
        } else {
            None
        }
    }

    /// Parameters that appear in the GLSL signature after the fixed arguments.
    pub fn custom_params(&self) -> &[TransformParam] {
        if self.category.has_operand() {
            &self.params[1..]
        } else {
            &self.params
        }
    }

    /// Function definition to emit for `stage` at the given GLSL version.
    pub fn glsl_for(&self, stage: Stage, es3: bool) -> &str {
        if stage == Stage::Vertex {
            if let Some(v) = self.vertex_glsl.as_deref() {
                return v;
            }
        }
        if es3 {
            if let Some(v) = self.glsl_es3.as_deref() {
                return v;
            }
        }
        &self.glsl
    }

    /// `ret name(fixed..., custom...)` for this transform.
    pub fn signature(&self) -> String {
        let args: Vec<String> = self
            .fixed_args
            .iter()
            .map(|a| format!("{} {}", a.ty.glsl(), a.name))
            .chain(
                self.custom_params()
                    .iter()
                    .map(|p| format!("{} {}", p.ty.glsl(), p.name)),
            )
            .collect();
        format!(
            "{} {}({})",
            self.return_type.glsl(),
            self.glsl_name,
            args.join(", ")
        )
    }
}

/// Normalize a descriptor into a [`Transform`].
pub fn normalize(descriptor: &OperationDescriptor) -> Result<Transform, RegistrationError> {
    let name = descriptor.name.clone();
    let glsl_name = descriptor
        .glsl_name
        .clone()
        .unwrap_or_else(|| descriptor.name.clone());
    if !is_glsl_ident(&glsl_name) {
        return Err(RegistrationError::InvalidName {
            name,
            symbol: glsl_name,
        });
    }

    let (category, signature) =
        signature_of(&descriptor.category).map_err(|source| RegistrationError::Type {
            name: name.clone(),
            source,
        })?;

    let mut params: Vec<TransformParam> = Vec::with_capacity(descriptor.parameters.len() + 1);
    let mut seen: HashSet<&str> = HashSet::new();
    if category.has_operand() {
        seen.insert(OPERAND_PARAM);
        params.push(TransformParam {
            name: OPERAND_PARAM.to_string(),
            ty: ValueType::Vec4,
            default: None,
        });
    }
    for p in &descriptor.parameters {
        if !is_glsl_ident(&p.name) {
            return Err(RegistrationError::InvalidName {
                name,
                symbol: p.name.clone(),
            });
        }
        if !seen.insert(p.name.as_str()) {
            return Err(RegistrationError::DuplicateParameter {
                name,
                param: p.name.clone(),
            });
        }
        let ty: ValueType = p.ty.parse().map_err(|source| RegistrationError::Type {
            name: name.clone(),
            source,
        })?;
        let default = match ty {
            ValueType::Texture => None,
            _ => Some(p.default.unwrap_or(0.0)),
        };
        params.push(TransformParam {
            name: p.name.clone(),
            ty,
            default,
        });
    }

    let mut transform = Transform {
        name,
        glsl_name,
        category,
        return_type: signature.return_type,
        fixed_args: signature.fixed_args,
        params,
        glsl: String::new(),
        glsl_es3: None,
        vertex_glsl: None,
    };
    let header = transform.signature();
    transform.glsl = wrap_body(&header, category, &descriptor.glsl.text());
    transform.glsl_es3 = descriptor
        .glsl_es3
        .as_ref()
        .map(|s| wrap_body(&header, category, &s.text()));
    transform.vertex_glsl = descriptor
        .vertex_glsl
        .as_ref()
        .map(|s| wrap_body(&header, category, &s.text()));
    Ok(transform)
}

/// Wrap a bare body into a function definition.
///
/// Bodies that already define a function with exactly `header` are kept as-is, and raw
/// bodies are always emitted verbatim.
fn wrap_body(header: &str, category: Category, body: &str) -> String {
    let body = body.trim();
    if category == Category::Raw || token_key(body).contains(&token_key(header)) {
        return format!("{body}\n");
    }
    format!("{header} {{\n{}\n}}\n", indent_lines(body, "  "))
}

/// Immutable catalog of transforms, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    transforms: HashMap<String, Arc<Transform>>,
    order: Vec<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the bundled transform catalog.
    pub fn with_builtins() -> Self {
        Self::from_descriptors(schema::builtin_descriptors())
    }

    /// Build a registry, logging and skipping descriptors that fail to register.
    pub fn from_descriptors<'a>(descriptors: impl IntoIterator<Item = &'a OperationDescriptor>) -> Self {
        let mut registry = Self::new();
        registry.extend(descriptors);
        registry
    }

    /// Register one descriptor. A transform with the same name is replaced in place.
    pub fn register(
        &mut self,
        descriptor: &OperationDescriptor,
    ) -> Result<Arc<Transform>, RegistrationError> {
        let transform = Arc::new(normalize(descriptor)?);
        let name = transform.name.clone();
        if self
            .transforms
            .insert(name.clone(), transform.clone())
            .is_some()
        {
            debug!(transform = %name, "replaced previously registered transform");
        } else {
            self.order.push(name);
        }
        Ok(transform)
    }

    /// Register every descriptor. Failures are logged and returned; they never stop
    /// the remaining descriptors from registering.
    pub fn extend<'a>(
        &mut self,
        descriptors: impl IntoIterator<Item = &'a OperationDescriptor>,
    ) -> Vec<RegistrationError> {
        let mut errors = Vec::new();
        for descriptor in descriptors {
            if let Err(e) = self.register(descriptor) {
                warn!("skipping transform: {e}");
                errors.push(e);
            }
        }
        errors
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Transform>> {
        self.transforms.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.transforms.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Transforms in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Transform>> {
        self.order.iter().filter_map(|name| self.transforms.get(name))
    }

    /// Transforms that can start a chain.
    pub fn roots(&self) -> impl Iterator<Item = &Arc<Transform>> {
        self.iter().filter(|t| t.category.is_root())
    }
}

/// Single-writer handle that swaps whole registry snapshots.
#[derive(Debug, Default)]
pub struct SharedRegistry {
    current: RwLock<Arc<Registry>>,
}

impl SharedRegistry {
    pub fn new(registry: Registry) -> Self {
        Self {
            current: RwLock::new(Arc::new(registry)),
        }
    }

    /// The registry as of now. Later swaps do not affect the returned snapshot.
    pub fn snapshot(&self) -> Arc<Registry> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn replace(&self, registry: Registry) {
        let registry = Arc::new(registry);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = registry;
    }

    /// Rebuild the catalog from scratch and swap it in. Nothing from the previous
    /// snapshot survives, so removed descriptors leave no stale entries.
    pub fn reinitialize<'a>(
        &self,
        descriptors: impl IntoIterator<Item = &'a OperationDescriptor>,
    ) -> Vec<RegistrationError> {
        let mut registry = Registry::new();
        let errors = registry.extend(descriptors);
        debug!(
            transforms = registry.len(),
            skipped = errors.len(),
            "reinitialized transform registry"
        );
        self.replace(registry);
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_color() -> OperationDescriptor {
        OperationDescriptor::new("flatColor", "src", "return vec4(r, g, b, a);")
            .param("r", "float", Some(1.0))
            .param("g", "float", None)
            .param("b", "float", None)
            .param("a", "float", Some(1.0))
    }

    #[test]
    fn bare_body_is_wrapped_into_function() {
        let t = normalize(&flat_color()).unwrap();
        assert_eq!(t.glsl_name, "flatColor");
        assert_eq!(t.return_type, ValueType::Vec4);
        assert_eq!(
            t.glsl,
            "vec4 flatColor(vec2 _st, float r, float g, float b, float a) {\n  return vec4(r, g, b, a);\n}\n"
        );
    }

    #[test]
    fn missing_defaults_normalize_to_zero() {
        let t = normalize(&flat_color()).unwrap();
        let defaults: Vec<Option<f64>> = t.params.iter().map(|p| p.default).collect();
        assert_eq!(defaults, vec![Some(1.0), Some(0.0), Some(0.0), Some(1.0)]);
    }

    #[test]
    fn wrapping_is_idempotent() {
        let wrapped = normalize(&flat_color()).unwrap().glsl;
        let mut again = flat_color();
        again.glsl = GlslSource::Text(wrapped.clone());
        assert_eq!(normalize(&again).unwrap().glsl, wrapped);
    }

    #[test]
    fn prewrapped_body_with_different_layout_is_kept() {
        let d = OperationDescriptor::new(
            "tint",
            "color",
            "vec4 tint( vec4 _c0,\n  float amount ) {\n  return _c0 * amount;\n}",
        )
        .param("amount", "float", Some(0.5));
        let t = normalize(&d).unwrap();
        assert!(t.glsl.starts_with("vec4 tint( vec4 _c0,"));
        assert_eq!(t.glsl.matches("vec4 tint").count(), 1);
    }

    #[test]
    fn combine_gets_implicit_operand_slot() {
        let d = OperationDescriptor::new("blend", "combine", "return mix(_c0, _c1, amount);")
            .param("amount", "float", Some(0.5));
        let t = normalize(&d).unwrap();
        let names: Vec<&str> = t.params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["color", "amount"]);
        assert_eq!(t.operand().unwrap().ty, ValueType::Vec4);
        assert_eq!(t.custom_params().len(), 1);
        // the implicit slot does not leak into the GLSL signature
        assert!(t.glsl.starts_with("vec4 blend(vec4 _c0, vec4 _c1, float amount) {"));
    }

    #[test]
    fn glsl_name_override() {
        let mut d = OperationDescriptor::new("flatColor2", "src", "return vec4(1.0);");
        d.glsl_name = Some("flat_color_two".to_string());
        let t = normalize(&d).unwrap();
        assert_eq!(t.name, "flatColor2");
        assert!(t.glsl.starts_with("vec4 flat_color_two(vec2 _st)"));
    }

    #[test]
    fn raw_body_is_verbatim() {
        let body = "float helper(float x) { return x; }\nvec4 rawThing(vec2 _st) { return vec4(helper(_st.x)); }";
        let t = normalize(&OperationDescriptor::new("rawThing", "raw", body)).unwrap();
        assert_eq!(t.glsl, format!("{body}\n"));
    }

    #[test]
    fn variants_are_wrapped_with_the_same_signature() {
        let mut d = OperationDescriptor::new("tex", "src", "return texture2D(tex, _st);")
            .param("tex", "sampler2D", None);
        d.glsl_es3 = Some("return texture(tex, _st);".into());
        let t = normalize(&d).unwrap();
        assert_eq!(t.params[0].default, None);
        let es3 = t.glsl_for(Stage::Fragment, true);
        assert!(es3.starts_with("vec4 tex(vec2 _st, sampler2D tex) {"));
        assert!(es3.contains("texture(tex, _st)"));
        assert!(t.glsl_for(Stage::Fragment, false).contains("texture2D"));
        assert!(t.glsl_for(Stage::Vertex, false).contains("texture2D"));
    }

    #[test]
    fn bad_descriptors_are_skipped_without_aborting_others() {
        let descriptors = vec![
            OperationDescriptor::new("broken", "shader", "return vec4(0.0);"),
            flat_color(),
            OperationDescriptor::new("badParam", "src", "return vec4(0.0);").param("m", "mat3", None),
            OperationDescriptor::new("bad-name", "src", "return vec4(0.0);"),
            OperationDescriptor::new("dupe", "color", "return _c0;")
                .param("x", "float", None)
                .param("x", "float", None),
        ];
        let mut registry = Registry::new();
        let errors = registry.extend(&descriptors);
        assert_eq!(errors.len(), 4);
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("flatColor"));
        assert!(matches!(
            errors[0],
            RegistrationError::Type {
                source: TypeError::UnknownCategory(_),
                ..
            }
        ));
        assert!(errors[0].to_string().contains("broken"));
    }

    #[test]
    fn combine_param_named_color_collides_with_operand() {
        let d = OperationDescriptor::new("tinted", "combine", "return _c0 * color;")
            .param("color", "vec4", None);
        assert!(matches!(
            normalize(&d),
            Err(RegistrationError::DuplicateParameter { .. })
        ));
    }

    #[test]
    fn reregistering_replaces_in_place() {
        let mut registry = Registry::new();
        registry.register(&flat_color()).unwrap();
        registry
            .register(&OperationDescriptor::new("other", "src", "return vec4(0.0);"))
            .unwrap();
        registry
            .register(&OperationDescriptor::new("flatColor", "src", "return vec4(0.5);"))
            .unwrap();
        let names: Vec<&str> = registry.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["flatColor", "other"]);
        assert!(registry.get("flatColor").unwrap().glsl.contains("vec4(0.5)"));
    }

    #[test]
    fn reinitialize_swaps_snapshot_without_stale_entries() {
        let shared = SharedRegistry::new(Registry::from_descriptors(&[flat_color()]));
        let before = shared.snapshot();

        let replacement = vec![OperationDescriptor::new("invert", "color", "return vec4(1.0 - _c0.rgb, _c0.a);")];
        let errors = shared.reinitialize(&replacement);
        assert!(errors.is_empty());

        let after = shared.snapshot();
        assert!(!after.contains("flatColor"));
        assert!(after.contains("invert"));
        // the old snapshot is untouched
        assert!(before.contains("flatColor"));
        assert!(!before.contains("invert"));
    }

    #[test]
    fn roots_cover_root_categories() {
        let registry = Registry::from_descriptors(&[
            flat_color(),
            OperationDescriptor::new("rot", "coord", "return _st;"),
            OperationDescriptor::new("inv", "color", "return _c0;"),
            OperationDescriptor::new("wave", "vert", "return vec4(0.0);"),
        ]);
        let mut roots: Vec<&str> = registry.roots().map(|t| t.name.as_str()).collect();
        roots.sort();
        assert_eq!(roots, vec!["flatColor", "rot", "wave"]);
    }
}
