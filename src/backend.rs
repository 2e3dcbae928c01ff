//! Disk-facing translation between a live [`Node`] subtree and bytes.
//! A [`Backend`] is attached to a class via `rw_config` and invoked by
//! [`crate::instance::Instance::write_back`]; reading is driven by the
//! loader (`=.toml`-style leaf subactions hand a raw blob to a
//! backend rather than parsing it inline).
use std::rc::Rc;

use camino::Utf8Path;

use crate::collection::{Cargo, CollectionKind};
use crate::context::TreeContext;
use crate::error::{CheckPolicy, ConfigError, Result};
use crate::node::{Element, Node};
use crate::value::{FetchMode, Scalar};

pub trait Backend {
    fn name(&self) -> &str;

    /// Reads `file` (or the class's configured default) under
    /// `config_dir` and stores its content into `node`.
    fn read(&self, node: &Rc<Node>, ctx: &dyn TreeContext, config_dir: &Utf8Path, file: Option<&str>, check: CheckPolicy) -> Result<()>;

    /// Serializes `node`'s declared content to `file` under
    /// `config_dir`.
    fn write(&self, node: &Rc<Node>, ctx: &dyn TreeContext, config_dir: &Utf8Path, file: Option<&str>) -> Result<()>;

    /// Whether this backend can carry the `#annotation` the loader
    /// attaches to a just-written element (a leading comment line in
    /// most text formats). Backends that can't (binary formats) return
    /// `false` and the annotation is dropped with a warning.
    fn support_annotation(&self) -> bool {
        true
    }
}

/// A name-keyed registry of available backends, looked up by a
/// class's `rw_config.backend` when an [`crate::instance::Instance`]
/// wires up write-backs for a freshly loaded subtree.
#[derive(Default)]
pub struct BackendMgr {
    backends: std::collections::HashMap<String, Rc<dyn Backend>>,
}

impl BackendMgr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, backend: Rc<dyn Backend>) {
        self.backends.insert(backend.name().to_string(), backend);
    }

    pub fn get(&self, name: &str) -> Option<Rc<dyn Backend>> {
        self.backends.get(name).cloned()
    }
}

/// Serializes a node's declared children to a flat TOML document.
/// Leaves become scalars, child nodes become sub-tables, Hash
/// collections become tables-of-tables/scalars, List collections
/// become arrays. This is the reference backend used by the demo CLI;
/// a production deployment would plug in one matching its own file
/// format instead.
pub struct TomlBackend;

impl TomlBackend {
    pub fn new() -> Self {
        TomlBackend
    }

    fn file_path(&self, config_dir: &Utf8Path, file: Option<&str>) -> camino::Utf8PathBuf {
        config_dir.join(file.unwrap_or("config.toml"))
    }

    fn node_to_toml(&self, node: &Rc<Node>, ctx: &dyn TreeContext) -> Result<toml::Value> {
        let mut table = toml::map::Map::new();
        for name in node.children(true) {
            let element = match node.fetch_element(ctx, &name, CheckPolicy::Skip, true)? {
                Some(e) => e,
                None => continue,
            };
            let value = match element {
                Element::Leaf(v) => match v.fetch(ctx, FetchMode::User, CheckPolicy::Skip, true)? {
                    Some(s) => scalar_to_toml(&s),
                    None => continue,
                },
                Element::Node(n) => self.node_to_toml(&n, ctx)?,
                Element::Warped(w) => self.node_to_toml(&w.resolve(ctx)?, ctx)?,
                Element::Collection(c) => {
                    let _ = c.ensure_default_keys(ctx);
                    match c.spec().kind {
                        Some(CollectionKind::List) => {
                            let mut arr = Vec::new();
                            for key in c.keys() {
                                if let Some(cargo) = c.get(&key) {
                                    arr.push(self.cargo_to_toml(&cargo, ctx)?);
                                }
                            }
                            toml::Value::Array(arr)
                        }
                        _ => {
                            let mut sub = toml::map::Map::new();
                            for key in c.keys() {
                                if let Some(cargo) = c.get(&key) {
                                    sub.insert(key.to_string(), self.cargo_to_toml(&cargo, ctx)?);
                                }
                            }
                            toml::Value::Table(sub)
                        }
                    }
                }
            };
            table.insert(name, value);
        }
        Ok(toml::Value::Table(table))
    }

    fn cargo_to_toml(&self, cargo: &Cargo, ctx: &dyn TreeContext) -> Result<toml::Value> {
        match cargo {
            Cargo::Leaf(v) => Ok(match v.fetch(ctx, FetchMode::User, CheckPolicy::Skip, true)? {
                Some(s) => scalar_to_toml(&s),
                None => toml::Value::String(String::new()),
            }),
            Cargo::Node(n) => self.node_to_toml(n, ctx),
        }
    }
}

impl Default for TomlBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn scalar_to_toml(s: &Scalar) -> toml::Value {
    match s {
        Scalar::Boolean(b) => toml::Value::Boolean(*b),
        Scalar::Integer(i) => toml::Value::Integer(*i),
        Scalar::Number(n) => toml::Value::Float(*n),
        Scalar::Str(s) => toml::Value::String(s.clone()),
    }
}

fn toml_to_scalar(v: &toml::Value) -> Option<Scalar> {
    match v {
        toml::Value::Boolean(b) => Some(Scalar::Boolean(*b)),
        toml::Value::Integer(i) => Some(Scalar::Integer(*i)),
        toml::Value::Float(f) => Some(Scalar::Number(*f)),
        toml::Value::String(s) => Some(Scalar::Str(s.clone())),
        toml::Value::Datetime(d) => Some(Scalar::Str(d.to_string())),
        _ => None,
    }
}

impl Backend for TomlBackend {
    fn name(&self) -> &str {
        "toml"
    }

    fn read(&self, node: &Rc<Node>, ctx: &dyn TreeContext, config_dir: &Utf8Path, file: Option<&str>, check: CheckPolicy) -> Result<()> {
        let path = self.file_path(config_dir, file);
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let parsed: toml::Value = toml::from_str(&text).map_err(|e| ConfigError::Syntax {
            file: path.to_string(),
            line: 0,
            message: e.to_string(),
        })?;
        let table = parsed.as_table().ok_or_else(|| ConfigError::LoadData("top-level document is not a table".to_string(), path.to_string()))?;
        store_table(node, ctx, table, check)
    }

    fn write(&self, node: &Rc<Node>, ctx: &dyn TreeContext, config_dir: &Utf8Path, file: Option<&str>) -> Result<()> {
        let path = self.file_path(config_dir, file);
        let value = self.node_to_toml(node, ctx)?;
        let text = toml::to_string_pretty(&value).map_err(|e| ConfigError::Internal(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, text)?;
        Ok(())
    }
}

fn store_table(node: &Rc<Node>, ctx: &dyn TreeContext, table: &toml::map::Map<String, toml::Value>, check: CheckPolicy) -> Result<()> {
    for (name, value) in table {
        let element = match node.fetch_element(ctx, name, check, true)? {
            Some(e) => e,
            None => continue,
        };
        match (&element, value) {
            (Element::Leaf(v), toml::Value::Table(_)) | (Element::Leaf(v), toml::Value::Array(_)) => {
                return Err(ConfigError::LoadData(format!("'{name}' is a leaf but the document has a nested shape"), v.path().to_string()));
            }
            (Element::Leaf(v), scalar) => {
                if let Some(s) = toml_to_scalar(scalar) {
                    v.store(ctx, s, check, true)?;
                }
            }
            (Element::Node(n), toml::Value::Table(sub)) => store_table(n, ctx, sub, check)?,
            (Element::Warped(w), toml::Value::Table(sub)) => store_table(&w.resolve(ctx)?, ctx, sub, check)?,
            (Element::Collection(c), toml::Value::Table(sub)) => {
                for (key, sub_value) in sub {
                    let idx = c.key_for(key);
                    let cargo = c.ensure_entry(ctx, idx)?;
                    store_cargo(&cargo, ctx, sub_value, check)?;
                }
            }
            (Element::Collection(c), toml::Value::Array(arr)) => {
                for sub_value in arr {
                    match sub_value {
                        toml::Value::Table(_) => {
                            let idx = c.push_value(ctx, Scalar::Str(String::new()))?;
                            if let Some(cargo) = c.get(&idx) {
                                store_cargo(&cargo, ctx, sub_value, check)?;
                            }
                        }
                        scalar => {
                            if let Some(s) = toml_to_scalar(scalar) {
                                c.push_value(ctx, s)?;
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn store_cargo(cargo: &Cargo, ctx: &dyn TreeContext, value: &toml::Value, check: CheckPolicy) -> Result<()> {
    match (cargo, value) {
        (Cargo::Leaf(v), scalar) => {
            if let Some(s) = toml_to_scalar(scalar) {
                v.store(ctx, s, check, true)?;
            }
            Ok(())
        }
        (Cargo::Node(n), toml::Value::Table(sub)) => store_table(n, ctx, sub, check),
        _ => Ok(()),
    }
}
