use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

// ─── Top-Level Config ───────────────────────────────────────────────────────

/// Root configuration — the unified IR that both HCL and YAML parsers produce.
#[derive(Debug, Clone)]
pub struct OxidConfig {
    pub project: ProjectConfig,
    pub workspace: WorkspaceConfig,
}

/// Project-level metadata and settings.
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    pub name: String,
    pub version: String,
    pub settings: Settings,
}

/// Global settings controlling execution behavior.
#[derive(Debug, Clone)]
pub struct Settings {
    pub parallelism: usize,
    pub state_backend: StateBackendConfig,
    pub working_dir: String,
    pub lock_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            parallelism: 10,
            state_backend: StateBackendConfig::Sqlite {
                path: ".oxid/state.db".to_string(),
            },
            working_dir: ".oxid".to_string(),
            lock_timeout: Duration::from_secs(300),
        }
    }
}

/// State backend selection.
#[derive(Debug, Clone)]
pub enum StateBackendConfig {
    Sqlite { path: String },
    Postgres { connection_string: String, schema: String },
}

// ─── Workspace (the collection of all infrastructure in scope) ──────────────

/// A workspace holds all providers, resources, modules, variables, and outputs.
/// Both HCL (.tf) and YAML configs converge into this representation.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceConfig {
    pub providers: Vec<ProviderConfig>,
    pub resources: Vec<ResourceConfig>,
    pub data_sources: Vec<ResourceConfig>,
    pub modules: Vec<ModuleRef>,
    pub variables: Vec<VariableConfig>,
    pub outputs: Vec<OutputConfig>,
    pub locals: HashMap<String, Expression>,
    pub terraform_settings: Option<TerraformSettings>,
    pub imports: Vec<ImportSpec>,
}

// ─── Import Blocks ──────────────────────────────────────────────────────────

/// An `import { to = ..., id = ... }` block: adopts an existing remote object
/// into state under `to` instead of letting the plan create it.
#[derive(Debug, Clone)]
pub struct ImportSpec {
    pub to: String,
    pub id: Expression,
    pub provider_ref: Option<String>,
}

/// terraform {} block settings (required_providers, backend, etc.)
#[derive(Debug, Clone, Default)]
pub struct TerraformSettings {
    pub required_providers: HashMap<String, RequiredProvider>,
    pub required_version: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RequiredProvider {
    pub source: String,
    pub version: Option<String>,
}

// ─── Provider ───────────────────────────────────────────────────────────────

/// A provider configuration (e.g. provider "aws" { region = "us-east-1" }).
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub source: String,
    pub version_constraint: Option<String>,
    pub alias: Option<String>,
    pub config: HashMap<String, Expression>,
}

// ─── Resource ───────────────────────────────────────────────────────────────

/// A resource definition parsed from either HCL or YAML.
#[derive(Debug, Clone)]
pub struct ResourceConfig {
    pub resource_type: String,
    pub name: String,
    pub provider_ref: Option<String>,
    pub count: Option<Expression>,
    pub for_each: Option<Expression>,
    pub depends_on: Vec<String>,
    pub lifecycle: LifecycleConfig,
    /// Effective per-operation deadline from a `timeouts { create = "20m" ... }`
    /// block, if present. The walker races the provider call against this and
    /// against the run's overall cancellation signal, whichever fires first.
    pub timeout: Option<Duration>,
    pub attributes: HashMap<String, Expression>,
    pub provisioners: Vec<ProvisionerConfig>,
    pub source_location: Option<SourceLocation>,
}

#[derive(Debug, Clone, Default)]
pub struct LifecycleConfig {
    pub create_before_destroy: bool,
    pub prevent_destroy: bool,
    pub ignore_changes: Vec<String>,
    pub replace_triggered_by: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    pub provisioner_type: String,
    pub config: HashMap<String, Expression>,
    pub when: ProvisionerWhen,
}

#[derive(Debug, Clone, Default)]
pub enum ProvisionerWhen {
    #[default]
    Create,
    Destroy,
}

// ─── Module Reference ───────────────────────────────────────────────────────

/// A module block from HCL or a module definition from YAML.
#[derive(Debug, Clone)]
pub struct ModuleRef {
    pub name: String,
    pub source: String,
    pub version: Option<String>,
    pub depends_on: Vec<String>,
    pub variables: HashMap<String, Expression>,
    pub providers: HashMap<String, String>,
    pub outputs: Vec<String>,
}

// ─── Variable & Output ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct VariableConfig {
    pub name: String,
    pub var_type: Option<String>,
    pub default: Option<Expression>,
    pub description: Option<String>,
    pub sensitive: bool,
    pub validation: Vec<ValidationRule>,
}

#[derive(Debug, Clone)]
pub struct ValidationRule {
    pub condition: Expression,
    pub error_message: String,
}

#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub name: String,
    pub value: Expression,
    pub description: Option<String>,
    pub sensitive: bool,
    pub depends_on: Vec<String>,
}

// ─── Expression (the core value type) ───────────────────────────────────────

/// Expression represents any value or computation in HCL or YAML configs.
/// This is the core type that bridges both config formats.
#[derive(Debug, Clone)]
pub enum Expression {
    /// A literal value (string, number, bool, null, list, map).
    Literal(Value),

    /// A reference path like var.region, module.vpc.vpc_id, aws_vpc.main.id.
    Reference(Vec<String>),

    /// A function call like join(",", var.list).
    FunctionCall {
        name: String,
        args: Vec<Expression>,
    },

    /// Ternary: condition ? true_val : false_val.
    Conditional {
        condition: Box<Expression>,
        true_val: Box<Expression>,
        false_val: Box<Expression>,
    },

    /// for expression: [for x in list : transform].
    ForExpr {
        collection: Box<Expression>,
        key_var: Option<String>,
        val_var: String,
        key_expr: Option<Box<Expression>>,
        value_expr: Box<Expression>,
        condition: Option<Box<Expression>>,
        grouping: bool,
    },

    /// String template with interpolations: "Hello ${var.name}".
    Template(Vec<TemplatePart>),

    /// Index access: expr[key].
    Index {
        collection: Box<Expression>,
        key: Box<Expression>,
    },

    /// Attribute access: expr.name.
    GetAttr {
        object: Box<Expression>,
        name: String,
    },

    /// Binary operation: a + b, a == b, a && b, etc.
    BinaryOp {
        op: BinOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },

    /// Unary operation: !a, -a.
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expression>,
    },

    /// Splat expression: aws_instance.web[*].id.
    Splat {
        source: Box<Expression>,
        each: Box<Expression>,
    },
}

/// A single mark attached to a value, tracked independently of its type.
///
/// Marks ride alongside a value rather than changing its shape: a sensitive
/// string is still a string, it just carries the `Sensitive` bit. Stored as
/// a bitset since the mark vocabulary is small and fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Marks(u8);

impl Marks {
    pub const SENSITIVE: Marks = Marks(1 << 0);
    pub const EPHEMERAL: Marks = Marks(1 << 1);
    pub const TYPE_WITNESS: Marks = Marks(1 << 2);
    pub const DEPRECATED: Marks = Marks(1 << 3);

    pub fn none() -> Self {
        Marks(0)
    }

    pub fn union(self, other: Marks) -> Marks {
        Marks(self.0 | other.0)
    }

    pub fn contains(self, mark: Marks) -> bool {
        self.0 & mark.0 == mark.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn is_sensitive(self) -> bool {
        self.contains(Marks::SENSITIVE)
    }

    pub fn is_ephemeral(self) -> bool {
        self.contains(Marks::EPHEMERAL)
    }
}

/// The concrete value types.
///
/// `Unknown` stands in for a value that won't be known until apply (e.g. a
/// computed attribute of a resource not yet created); it carries the type
/// the value will eventually have, not the value itself. `Capsule` wraps an
/// opaque, provider-defined blob that the engine passes through without
/// interpreting — identified by a tag so two capsules of different kinds
/// never compare equal.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Unknown(Box<ValueType>),
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Set(Vec<Value>),
    Tuple(Vec<Value>),
    Map(Vec<(String, Value)>),
    Object(Vec<(String, Value)>),
    Capsule(String, Vec<u8>),
}

/// A type descriptor, used only to tag `Value::Unknown` placeholders.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueType {
    Any,
    Null,
    Bool,
    Number,
    String,
    List(Box<ValueType>),
    Set(Box<ValueType>),
    Tuple(Vec<ValueType>),
    Map(Box<ValueType>),
    Object(Vec<(String, ValueType)>),
    Capsule(String),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Value::Unknown(_))
    }

    /// Extension type 0 is the cty convention for "value not yet known";
    /// encoded as a msgpack ext so it survives the wire round-trip distinct
    /// from null.
    pub const CTY_UNKNOWN_EXT_CODE: i8 = 0;

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            // Unknown has no JSON representation; callers that need to track
            // unknown-ness use the msgpack/cty path instead (see provider::protocol).
            Value::Unknown(_) => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::json!(*i),
            Value::Float(f) => serde_json::json!(*f),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(items) | Value::Set(items) | Value::Tuple(items) => {
                serde_json::Value::Array(items.iter().map(|v| v.to_json()).collect())
            }
            Value::Map(entries) | Value::Object(entries) => {
                let map: serde_json::Map<String, serde_json::Value> = entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect();
                serde_json::Value::Object(map)
            }
            Value::Capsule(tag, bytes) => {
                serde_json::json!({ "__capsule__": tag, "data": hex::encode(bytes) })
            }
        }
    }

    /// Infer the shape of a concrete value. `Unknown` already carries its
    /// type; everything else is reconstructed structurally.
    pub fn type_of(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Unknown(t) => (**t).clone(),
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) | Value::Float(_) => ValueType::Number,
            Value::String(_) => ValueType::String,
            Value::List(items) => {
                ValueType::List(Box::new(elem_type(items)))
            }
            Value::Set(items) => ValueType::Set(Box::new(elem_type(items))),
            Value::Tuple(items) => ValueType::Tuple(items.iter().map(Value::type_of).collect()),
            Value::Map(entries) => {
                ValueType::Map(Box::new(elem_type(&entries.iter().map(|(_, v)| v.clone()).collect::<Vec<_>>())))
            }
            Value::Object(entries) => {
                ValueType::Object(entries.iter().map(|(k, v)| (k.clone(), v.type_of())).collect())
            }
            Value::Capsule(tag, _) => ValueType::Capsule(tag.clone()),
        }
    }

    /// Structural subtyping check against a declared constraint: object
    /// values may not carry attributes the constraint doesn't name, tuple
    /// arity must match exactly, and `dynamic`/`Any` accepts anything.
    /// `unknown` always satisfies its own declared type.
    pub fn check_type(&self, constraint: &ValueType) -> Result<(), String> {
        if matches!(constraint, ValueType::Any) {
            return Ok(());
        }
        if let Value::Unknown(t) = self {
            return t.unify(constraint).map(|_| ());
        }
        match (self, constraint) {
            (Value::Null, _) => Ok(()),
            (Value::Bool(_), ValueType::Bool) => Ok(()),
            (Value::Int(_), ValueType::Number) | (Value::Float(_), ValueType::Number) => Ok(()),
            (Value::String(_), ValueType::String) => Ok(()),
            (Value::List(items), ValueType::List(elem)) | (Value::Set(items), ValueType::Set(elem)) => {
                items.iter().try_for_each(|v| v.check_type(elem))
            }
            (Value::Map(entries), ValueType::Map(elem)) => {
                entries.iter().try_for_each(|(_, v)| v.check_type(elem))
            }
            (Value::Tuple(items), ValueType::Tuple(elems)) => {
                if items.len() != elems.len() {
                    return Err(format!(
                        "tuple arity mismatch: value has {} elements, type expects {}",
                        items.len(),
                        elems.len()
                    ));
                }
                items.iter().zip(elems).try_for_each(|(v, t)| v.check_type(t))
            }
            (Value::Object(entries), ValueType::Object(attrs)) => {
                let declared: std::collections::HashMap<&str, &ValueType> =
                    attrs.iter().map(|(k, t)| (k.as_str(), t)).collect();
                for (k, v) in entries {
                    match declared.get(k.as_str()) {
                        Some(t) => v.check_type(t)?,
                        None => return Err(format!("unexpected attribute \"{}\" not in object type", k)),
                    }
                }
                Ok(())
            }
            (Value::Capsule(tag, _), ValueType::Capsule(expect)) if tag == expect => Ok(()),
            (v, t) => Err(format!("value {:?} does not conform to type {:?}", v, t)),
        }
    }
}

fn elem_type(items: &[Value]) -> ValueType {
    items.first().map(Value::type_of).unwrap_or(ValueType::Any)
}

impl ValueType {
    /// Most specific common supertype of two types, or a typed diagnostic
    /// message if they're incompatible. `Any`/`dynamic` unifies with
    /// anything by deferring to the other side.
    pub fn unify(&self, other: &ValueType) -> Result<ValueType, String> {
        use ValueType::*;
        if self == other {
            return Ok(self.clone());
        }
        match (self, other) {
            (Any, t) | (t, Any) => Ok(t.clone()),
            (List(a), List(b)) => Ok(List(Box::new(a.unify(b)?))),
            (Set(a), Set(b)) => Ok(Set(Box::new(a.unify(b)?))),
            (Map(a), Map(b)) => Ok(Map(Box::new(a.unify(b)?))),
            (Tuple(a), Tuple(b)) if a.len() == b.len() => {
                let unified: Result<Vec<_>, _> =
                    a.iter().zip(b).map(|(x, y)| x.unify(y)).collect();
                Ok(Tuple(unified?))
            }
            (Object(a), Object(b)) => {
                let mut merged: Vec<(String, ValueType)> = Vec::new();
                let b_map: std::collections::HashMap<&str, &ValueType> =
                    b.iter().map(|(k, t)| (k.as_str(), t)).collect();
                for (k, t) in a {
                    let unified = match b_map.get(k.as_str()) {
                        Some(other_t) => t.unify(other_t)?,
                        None => t.clone(),
                    };
                    merged.push((k.clone(), unified));
                }
                for (k, t) in b {
                    if !merged.iter().any(|(mk, _)| mk == k) {
                        merged.push((k.clone(), t.clone()));
                    }
                }
                Ok(Object(merged))
            }
            _ => Err(format!("cannot unify incompatible types {:?} and {:?}", self, other)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Unknown(_) => write!(f, "(known after apply)"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "{}", s),
            Value::List(_)
            | Value::Set(_)
            | Value::Tuple(_)
            | Value::Map(_)
            | Value::Object(_)
            | Value::Capsule(_, _) => {
                write!(f, "{}", serde_json::to_string(&self.to_json()).unwrap())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum TemplatePart {
    Literal(String),
    Interpolation(Box<Expression>),
    Directive(Box<Expression>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

// ─── Source Location ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SourceLocation {
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub config_type: ConfigType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigType {
    Hcl,
    Yaml,
}

// ─── Legacy YAML types (kept for backward compatibility during migration) ───

/// Root configuration structure parsed from oxid YAML files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YamlConfig {
    pub project: YamlProject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YamlProject {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub settings: YamlSettings,
    #[serde(default)]
    pub variables: HashMap<String, serde_yaml::Value>,
    #[serde(default)]
    pub modules: HashMap<String, YamlModuleConfig>,
    #[serde(default)]
    pub hooks: Option<Hooks>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YamlSettings {
    #[serde(default = "default_terraform_binary")]
    pub terraform_binary: String,
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    #[serde(default = "default_state_backend")]
    pub state_backend: String,
    #[serde(default = "default_working_dir")]
    pub working_dir: String,
}

impl Default for YamlSettings {
    fn default() -> Self {
        Self {
            terraform_binary: default_terraform_binary(),
            parallelism: default_parallelism(),
            state_backend: default_state_backend(),
            working_dir: default_working_dir(),
        }
    }
}

fn default_terraform_binary() -> String {
    "terraform".to_string()
}

fn default_parallelism() -> usize {
    10
}

fn default_state_backend() -> String {
    "local".to_string()
}

fn default_working_dir() -> String {
    ".oxid".to_string()
}

/// A single module definition in YAML config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YamlModuleConfig {
    pub source: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub variables: HashMap<String, serde_yaml::Value>,
    #[serde(default)]
    pub outputs: Vec<String>,
}

/// Execution hooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hooks {
    #[serde(default)]
    pub pre_plan: Vec<String>,
    #[serde(default)]
    pub post_apply: Vec<String>,
    #[serde(default)]
    pub on_failure: Vec<String>,
}

// ─── Resource address helpers ───────────────────────────────────────────────

/// A fully qualified resource address like "module.vpc.aws_vpc.main" or "aws_instance.web".
///
/// Ordered by component (module path, then type, then name, then index) so a
/// sorted `Vec<ResourceAddress>` renders in the same stable order run to run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceAddress {
    pub module_path: Vec<String>,
    pub resource_type: String,
    pub resource_name: String,
    pub index: Option<ResourceIndex>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceIndex {
    Count(usize),
    ForEach(String),
}

impl ResourceAddress {
    pub fn new(resource_type: &str, resource_name: &str) -> Self {
        Self {
            module_path: vec![],
            resource_type: resource_type.to_string(),
            resource_name: resource_name.to_string(),
            index: None,
        }
    }

    pub fn with_module(mut self, module: &str) -> Self {
        self.module_path.push(module.to_string());
        self
    }

    /// Attach an instance key, turning a pre-expansion ConfigResource
    /// address into a post-expansion ResourceInstance address.
    pub fn with_key(mut self, key: ResourceIndex) -> Self {
        self.index = Some(key);
        self
    }

    /// The module path component alone, e.g. `["vpc", "subnets"]` for
    /// `module.vpc.module.subnets.aws_subnet.a`. Empty for the root module.
    pub fn module_path(&self) -> &[String] {
        &self.module_path
    }

    /// The address one level up: an instance's parent is its un-keyed
    /// ConfigResource address. A ConfigResource address (no index) has no
    /// parent within this type — the enclosing module is addressed
    /// separately, not as a `ResourceAddress`.
    pub fn parent(&self) -> Option<Self> {
        if self.index.is_some() {
            Some(Self {
                module_path: self.module_path.clone(),
                resource_type: self.resource_type.clone(),
                resource_name: self.resource_name.clone(),
                index: None,
            })
        } else {
            None
        }
    }

    /// True if `other` names an object reachable through `self`: either
    /// `self` is exactly `other`'s un-keyed ConfigResource address (self
    /// contains its own instances), or `self` is a literal alias of `other`.
    pub fn contains(&self, other: &ResourceAddress) -> bool {
        if self.module_path == other.module_path
            && self.resource_type == other.resource_type
            && self.resource_name == other.resource_name
        {
            return self.index.is_none() || self.index == other.index;
        }
        false
    }

    pub fn to_string(&self) -> String {
        let mut parts = Vec::new();
        for m in &self.module_path {
            parts.push(format!("module.{}", m));
        }
        parts.push(format!("{}.{}", self.resource_type, self.resource_name));
        let base = parts.join(".");
        match &self.index {
            Some(ResourceIndex::Count(i)) => format!("{}[{}]", base, i),
            Some(ResourceIndex::ForEach(k)) => format!("{}[\"{}\"]", base, k),
            None => base,
        }
    }

    /// Parse a resource address string like "module.vpc.aws_vpc.main" or "aws_vpc.main[0]".
    pub fn parse(s: &str) -> Option<Self> {
        let mut modules = Vec::new();
        let mut remaining = s;

        // Extract module path prefix
        while remaining.starts_with("module.") {
            remaining = &remaining[7..]; // skip "module."
            let dot_pos = remaining.find('.')?;
            modules.push(remaining[..dot_pos].to_string());
            remaining = &remaining[dot_pos + 1..];
        }

        // Parse index suffix if present
        let (main_part, index) = if let Some(bracket_pos) = remaining.find('[') {
            let idx_str = &remaining[bracket_pos + 1..remaining.len() - 1];
            let index = if idx_str.starts_with('"') {
                ResourceIndex::ForEach(idx_str.trim_matches('"').to_string())
            } else {
                ResourceIndex::Count(idx_str.parse().ok()?)
            };
            (&remaining[..bracket_pos], Some(index))
        } else {
            (remaining, None)
        };

        let dot_pos = main_part.find('.')?;
        let resource_type = main_part[..dot_pos].to_string();
        let resource_name = main_part[dot_pos + 1..].to_string();

        Some(Self {
            module_path: modules,
            resource_type,
            resource_name,
            index,
        })
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string())
    }
}

#[cfg(test)]
mod value_model_tests {
    use super::*;

    #[test]
    fn unify_picks_most_specific_supertype() {
        let dynamic = ValueType::Any;
        let string = ValueType::String;
        assert_eq!(dynamic.unify(&string).unwrap(), ValueType::String);
    }

    #[test]
    fn unify_rejects_incompatible_scalars() {
        assert!(ValueType::Bool.unify(&ValueType::String).is_err());
    }

    #[test]
    fn unify_merges_object_attribute_sets() {
        let a = ValueType::Object(vec![("id".into(), ValueType::String)]);
        let b = ValueType::Object(vec![("count".into(), ValueType::Number)]);
        let merged = a.unify(&b).unwrap();
        match merged {
            ValueType::Object(attrs) => assert_eq!(attrs.len(), 2),
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn check_type_rejects_extra_object_attribute() {
        let v = Value::Object(vec![
            ("id".to_string(), Value::String("x".to_string())),
            ("extra".to_string(), Value::Bool(true)),
        ]);
        let t = ValueType::Object(vec![("id".to_string(), ValueType::String)]);
        assert!(v.check_type(&t).is_err());
    }

    #[test]
    fn check_type_rejects_tuple_arity_mismatch() {
        let v = Value::Tuple(vec![Value::Int(1), Value::Int(2)]);
        let t = ValueType::Tuple(vec![ValueType::Number]);
        assert!(v.check_type(&t).is_err());
    }

    #[test]
    fn unknown_satisfies_its_declared_type() {
        let v = Value::Unknown(Box::new(ValueType::String));
        assert!(v.check_type(&ValueType::String).is_ok());
        assert!(v.check_type(&ValueType::Bool).is_err());
    }

    #[test]
    fn marks_union_via_bitwise_or() {
        let a = Marks::SENSITIVE;
        let b = Marks::EPHEMERAL;
        let combined = a.union(b);
        assert!(combined.is_sensitive());
        assert!(combined.is_ephemeral());
        assert!(!combined.contains(Marks::DEPRECATED));
    }
}

#[cfg(test)]
mod address_tests {
    use super::*;

    #[test]
    fn parse_round_trips_to_string() {
        let addr = ResourceAddress::parse("module.vpc.aws_subnet.a[\"us-east-1a\"]").unwrap();
        assert_eq!(addr.module_path(), &["vpc".to_string()]);
        assert_eq!(addr.to_string(), "module.vpc.aws_subnet.a[\"us-east-1a\"]");
    }

    #[test]
    fn instance_parent_is_unkeyed_config_resource() {
        let instance = ResourceAddress::new("aws_instance", "web")
            .with_key(ResourceIndex::Count(2));
        let parent = instance.parent().unwrap();
        assert_eq!(parent.index, None);
        assert_eq!(parent.to_string(), "aws_instance.web");
        assert!(ResourceAddress::new("aws_instance", "web").parent().is_none());
    }

    #[test]
    fn config_resource_contains_its_instances() {
        let base = ResourceAddress::new("aws_instance", "web");
        let instance = base.clone().with_key(ResourceIndex::Count(0));
        assert!(base.contains(&instance));
        assert!(base.contains(&base));
        let other = ResourceAddress::new("aws_instance", "db");
        assert!(!base.contains(&other));
    }

    #[test]
    fn ordering_is_stable_by_component() {
        let mut addrs = vec![
            ResourceAddress::new("aws_instance", "web").with_key(ResourceIndex::Count(1)),
            ResourceAddress::new("aws_instance", "web").with_key(ResourceIndex::Count(0)),
            ResourceAddress::new("aws_db", "main"),
        ];
        addrs.sort();
        assert_eq!(addrs[0].to_string(), "aws_db.main");
        assert_eq!(addrs[1].to_string(), "aws_instance.web[0]");
        assert_eq!(addrs[2].to_string(), "aws_instance.web[1]");
    }
}
