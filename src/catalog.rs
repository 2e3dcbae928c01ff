//! ConfigClass ingestion: the schema catalog a tree's root is built
//! from. Raw classes arrive as TOML (any concrete on-disk form is a
//! backend's choice; this module only fixes *a* workable one) and are
//! compiled into the runtime [`ConfigClass`]/[`ElementSchema`] graph on
//! first use, cached by class name.
use std::collections::BTreeMap;
use std::sync::Arc;

use elsa::FrozenMap;
use regex::Regex;
use serde::Deserialize;

use crate::collection::{CollectionKind, CollectionSpec, DuplicatePolicy, IndexType};
use crate::error::{ConfigError, Result};
use crate::value::{Bound, Convert, Scalar, ValueSpec, ValueType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Level {
    Important,
    #[default]
    Normal,
    Hidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Standard,
    Deprecated,
    Obsolete,
}

#[derive(Debug, Clone)]
pub enum ElementKind {
    Leaf(Arc<ValueSpec>),
    Collection(Arc<CollectionSpec>),
    Node { class: String },
    WarpedNode { masters: Vec<String>, rules: Vec<WarpRuleDef> },
}

/// One rule of a warped element's table: `when` is a formula over the
/// registered master variables (empty string means "always", used as
/// the fallback rule); `class` names the ConfigClass to switch to.
#[derive(Debug, Clone)]
pub struct WarpRuleDef {
    pub when: String,
    pub class: String,
}

#[derive(Debug, Clone)]
pub struct ElementSchema {
    pub name: String,
    pub kind: ElementKind,
    pub level: Level,
    pub status: Status,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub gist: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AcceptRule {
    pub pattern: Regex,
    pub template: String,
    pub accept_after: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RwConfig {
    pub backend: String,
    pub file: Option<String>,
    pub config_dir: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConfigClass {
    pub name: String,
    pub class_description: Option<String>,
    pub elements: Vec<ElementSchema>,
    pub accept: Vec<AcceptRule>,
    pub rw_config: Option<RwConfig>,
}

impl ConfigClass {
    pub fn element(&self, name: &str) -> Option<&ElementSchema> {
        self.elements.iter().find(|e| e.name == name)
    }
}

// ---- raw (textual) form, the backend-facing wire surface -----------

#[derive(Debug, Deserialize, Default)]
struct RawCatalog {
    #[serde(default)]
    classes: Vec<RawClass>,
}

#[derive(Debug, Deserialize)]
struct RawClass {
    name: String,
    #[serde(default)]
    class_description: Option<String>,
    #[serde(default)]
    elements: Vec<RawElement>,
    #[serde(default)]
    accept: Vec<RawAccept>,
    #[serde(default)]
    rw_config: Option<RawRwConfig>,
}

#[derive(Debug, Deserialize)]
struct RawRwConfig {
    backend: String,
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    config_dir: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawAccept {
    pattern: String,
    template: String,
    #[serde(default)]
    accept_after: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawWarpRule {
    #[serde(default)]
    when: String,
    class: String,
}

#[derive(Debug, Deserialize, Default)]
struct RawElement {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    level: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    gist: Option<String>,

    // leaf parameters
    #[serde(default)]
    value_type: Option<String>,
    #[serde(default)]
    min: Option<f64>,
    #[serde(default)]
    max: Option<f64>,
    #[serde(default)]
    choice: Option<Vec<String>>,
    #[serde(default)]
    write_as: Option<(String, String)>,
    #[serde(default)]
    default: Option<String>,
    #[serde(default)]
    upstream_default: Option<String>,
    #[serde(default)]
    mandatory: bool,
    #[serde(default)]
    matches: Option<String>,
    #[serde(default)]
    warn: Option<String>,
    #[serde(default)]
    convert: Option<String>,
    #[serde(default)]
    refer_to: Option<String>,

    // collection parameters
    #[serde(default)]
    index_type: Option<String>,
    #[serde(default)]
    min_index: Option<i64>,
    #[serde(default)]
    max_index: Option<i64>,
    #[serde(default)]
    max_nb: Option<usize>,
    #[serde(default)]
    default_keys: Vec<String>,
    #[serde(default)]
    follow_keys_from: Option<String>,
    #[serde(default)]
    allow_keys: Option<Vec<String>>,
    #[serde(default)]
    allow_keys_matching: Option<String>,
    #[serde(default)]
    duplicates: Option<String>,
    #[serde(default)]
    ordered: bool,
    #[serde(default)]
    write_empty_value: bool,
    #[serde(default)]
    cargo: Option<String>,
    #[serde(default)]
    cargo_value_type: Option<String>,
    #[serde(default)]
    cargo_class: Option<String>,

    // node / warped_node
    #[serde(default)]
    class: Option<String>,
    #[serde(default)]
    masters: Vec<String>,
    #[serde(default)]
    rules: Vec<RawWarpRule>,
}

fn parse_value_type(s: &str) -> Result<ValueType> {
    Ok(match s {
        "boolean" => ValueType::Boolean,
        "enum" => ValueType::Enum,
        "integer" => ValueType::Integer,
        "number" => ValueType::Number,
        "uniline" => ValueType::Uniline,
        "string" => ValueType::String,
        "reference" => ValueType::Reference,
        "file" => ValueType::File,
        "dir" => ValueType::Dir,
        other => {
            return Err(ConfigError::Model {
                path: String::new(),
                reason: format!("unknown value_type '{other}'"),
            })
        }
    })
}

fn parse_level(s: &str) -> Result<Level> {
    Ok(match s {
        "important" => Level::Important,
        "normal" => Level::Normal,
        "hidden" => Level::Hidden,
        other => {
            return Err(ConfigError::Model {
                path: String::new(),
                reason: format!("unknown level '{other}'"),
            })
        }
    })
}

fn parse_status(s: &str) -> Result<Status> {
    Ok(match s {
        "standard" => Status::Standard,
        "deprecated" => Status::Deprecated,
        "obsolete" => Status::Obsolete,
        other => {
            return Err(ConfigError::Model {
                path: String::new(),
                reason: format!("unknown status '{other}'"),
            })
        }
    })
}

fn parse_duplicates(s: &str) -> Result<DuplicatePolicy> {
    Ok(match s {
        "allow" => DuplicatePolicy::Allow,
        "forbid" => DuplicatePolicy::Forbid,
        "suppress" => DuplicatePolicy::Suppress,
        "warn" => DuplicatePolicy::Warn,
        other => {
            return Err(ConfigError::Model {
                path: String::new(),
                reason: format!("unknown duplicates policy '{other}'"),
            })
        }
    })
}

fn parse_convert(s: &str) -> Result<Convert> {
    Ok(match s {
        "lc" => Convert::Lowercase,
        "uc" => Convert::Uppercase,
        other => {
            return Err(ConfigError::Model {
                path: String::new(),
                reason: format!("unknown convert '{other}'"),
            })
        }
    })
}

pub(crate) fn scalar_of(value_type: Option<ValueType>, raw: &str) -> Scalar {
    match value_type {
        Some(ValueType::Boolean) => Scalar::Boolean(matches!(raw, "true" | "yes" | "1" | "on")),
        Some(ValueType::Integer) => raw.parse().map(Scalar::Integer).unwrap_or(Scalar::Str(raw.to_string())),
        Some(ValueType::Number) => raw.parse().map(Scalar::Number).unwrap_or(Scalar::Str(raw.to_string())),
        _ => Scalar::Str(raw.to_string()),
    }
}

impl RawElement {
    fn compile(&self) -> Result<ElementSchema> {
        let level = self.level.as_deref().map(parse_level).transpose()?.unwrap_or_default();
        let status = self.status.as_deref().map(parse_status).transpose()?.unwrap_or_default();

        let kind = match self.kind.as_str() {
            "leaf" => ElementKind::Leaf(Arc::new(self.compile_value_spec()?)),
            "hash" | "list" | "check_list" => ElementKind::Collection(Arc::new(self.compile_collection_spec()?)),
            "node" => ElementKind::Node {
                class: self
                    .class
                    .clone()
                    .ok_or_else(|| ConfigError::Model {
                        path: self.name.clone(),
                        reason: "node element requires 'class'".to_string(),
                    })?,
            },
            "warped_node" => {
                let rules = self
                    .rules
                    .iter()
                    .map(|r| WarpRuleDef {
                        when: r.when.clone(),
                        class: r.class.clone(),
                    })
                    .collect();
                ElementKind::WarpedNode {
                    masters: self.masters.clone(),
                    rules,
                }
            }
            other => {
                return Err(ConfigError::Model {
                    path: self.name.clone(),
                    reason: format!("unknown element type '{other}'"),
                })
            }
        };

        Ok(ElementSchema {
            name: self.name.clone(),
            kind,
            level,
            status,
            summary: self.summary.clone(),
            description: self.description.clone(),
            gist: self.gist.clone(),
        })
    }

    fn compile_value_spec(&self) -> Result<ValueSpec> {
        let value_type = self.value_type.as_deref().map(parse_value_type).transpose()?;
        let bound = |v: Option<f64>| match value_type {
            Some(ValueType::Integer) => v.map(|n| Bound::Integer(n as i64)),
            _ => v.map(Bound::Number),
        };
        let mut spec = ValueSpec {
            value_type,
            min: bound(self.min),
            max: bound(self.max),
            choice: self.choice.clone(),
            write_as: self.write_as.clone(),
            default: self.default.as_deref().map(|s| scalar_of(value_type, s)),
            upstream_default: self.upstream_default.as_deref().map(|s| scalar_of(value_type, s)),
            mandatory: self.mandatory,
            matches: self.matches.as_deref().map(Regex::new).transpose()?,
            warn: self.warn.clone(),
            convert: self.convert.as_deref().map(parse_convert).transpose()?,
            refer_to: self
                .refer_to
                .clone()
                .map(crate::value::ReferSpec::Static),
            ..Default::default()
        };
        spec.check_model(&self.name)?;
        Ok(spec)
    }

    fn compile_collection_spec(&self) -> Result<CollectionSpec> {
        let kind = if self.kind == "list" || self.kind == "check_list" {
            CollectionKind::List
        } else {
            CollectionKind::Hash
        };
        let cargo_value_type = self.cargo_value_type.as_deref().map(parse_value_type).transpose()?;
        let cargo_value_spec = if self.cargo.as_deref() != Some("node") {
            Some(Arc::new(ValueSpec {
                value_type: Some(cargo_value_type.unwrap_or(if self.kind == "check_list" {
                    ValueType::Boolean
                } else {
                    ValueType::String
                })),
                ..Default::default()
            }))
        } else {
            None
        };
        Ok(CollectionSpec {
            kind: Some(kind),
            index_type: self
                .index_type
                .as_deref()
                .map(|s| if s == "integer" { IndexType::Integer } else { IndexType::String }),
            min_index: self.min_index,
            max_index: self.max_index,
            max_nb: self.max_nb,
            default_keys: self.default_keys.clone(),
            default_with_init: Vec::new(),
            follow_keys_from: self.follow_keys_from.clone(),
            allow_keys: self.allow_keys.clone(),
            allow_keys_from: None,
            allow_keys_matching: self.allow_keys_matching.as_deref().map(Regex::new).transpose()?,
            auto_create: true,
            warn_if_key_match: Vec::new(),
            warn_unless_key_match: Vec::new(),
            duplicates: self.duplicates.as_deref().map(parse_duplicates).transpose()?.unwrap_or_default(),
            migrate_keys_from: None,
            migrate_values_from: None,
            ordered: self.ordered,
            convert: self.convert.as_deref().map(parse_convert).transpose()?,
            write_empty_value: self.write_empty_value,
            cargo_value_spec,
            cargo_class: self.cargo_class.clone(),
        })
    }
}

impl RawClass {
    fn compile(&self) -> Result<ConfigClass> {
        let elements = self
            .elements
            .iter()
            .map(RawElement::compile)
            .collect::<Result<Vec<_>>>()?;
        let accept = self
            .accept
            .iter()
            .map(|a| {
                Ok(AcceptRule {
                    pattern: Regex::new(&a.pattern)?,
                    template: a.template.clone(),
                    accept_after: a.accept_after.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ConfigClass {
            name: self.name.clone(),
            class_description: self.class_description.clone(),
            elements,
            accept,
            rw_config: self.rw_config.as_ref().map(|r| RwConfig {
                backend: r.backend.clone(),
                file: r.file.clone(),
                config_dir: r.config_dir.clone(),
            }),
        })
    }
}

/// The schema cache: raw class definitions parsed once from TOML,
/// compiled lazily per class name and cached for the instance's
/// lifetime.
pub struct Catalog {
    raw: BTreeMap<String, RawClass>,
    compiled: FrozenMap<String, Arc<ConfigClass>>,
}

impl Catalog {
    pub fn from_toml(text: &str) -> Result<Self> {
        let raw_catalog: RawCatalog = toml::from_str(text)
            .map_err(|e| ConfigError::Load(e.to_string(), "<catalog>".to_string()))?;
        let mut raw = BTreeMap::new();
        for class in raw_catalog.classes {
            raw.insert(class.name.clone(), class);
        }
        Ok(Catalog {
            raw,
            compiled: FrozenMap::new(),
        })
    }

    pub fn class(&self, name: &str) -> Result<Arc<ConfigClass>> {
        if let Some(existing) = self.compiled.map_get(name, Arc::clone) {
            return Ok(existing);
        }
        let raw = self
            .raw
            .get(name)
            .ok_or_else(|| ConfigError::Model {
                path: name.to_string(),
                reason: format!("no class named '{name}' in catalog"),
            })?;
        let compiled = Arc::new(raw.compile()?);
        self.compiled.insert(name.to_string(), compiled.clone());
        Ok(compiled)
    }
}

impl TryFrom<&str> for Catalog {
    type Error = ConfigError;
    fn try_from(text: &str) -> Result<Self> {
        Catalog::from_toml(text)
    }
}
