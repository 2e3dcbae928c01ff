//! A record of named elements, each a leaf, collection, child node, or
//! warped node; plus the Accept mechanism for dynamically-typed names
//! and the per-element level/status overrides.
mod warp;

pub use warp::Warper;

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};
use std::sync::Arc;

use crate::catalog::{Catalog, ConfigClass, ElementKind, ElementSchema, Level, Status};
use crate::collection::{Cargo, IdCollection};
use crate::context::{ChangeNote, TreeContext};
use crate::error::{CheckPolicy, ConfigError, Result};
use crate::value::Value;

/// One live child of a [`Node`].
#[derive(Clone)]
pub enum Element {
    Leaf(Rc<Value>),
    Collection(Rc<IdCollection>),
    Node(Rc<Node>),
    Warped(Rc<WarpedNode>),
}

impl Element {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Element::Leaf(_) => "leaf",
            Element::Collection(_) => "collection",
            Element::Node(_) => "node",
            Element::Warped(_) => "warped_node",
        }
    }

    pub fn as_leaf(&self) -> Option<&Rc<Value>> {
        match self {
            Element::Leaf(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&Rc<IdCollection>> {
        match self {
            Element::Collection(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&Rc<Node>> {
        match self {
            Element::Node(n) => Some(n),
            _ => None,
        }
    }
}

/// A node whose concrete class is chosen dynamically from the value of
/// one or more "warp master" leaves elsewhere in the tree.
pub struct WarpedNode {
    path: String,
    warper: Warper,
    catalog: Rc<Catalog>,
    current: RefCell<Option<(String, Rc<Node>)>>,
}

impl WarpedNode {
    fn new(path: String, warper: Warper, catalog: Rc<Catalog>) -> Self {
        WarpedNode {
            path,
            warper,
            catalog,
            current: RefCell::new(None),
        }
    }

    /// Resolves and returns the current backing node, rebuilding it if
    /// the warp rule table now names a different class than last time.
    pub fn resolve(&self, ctx: &dyn TreeContext) -> Result<Rc<Node>> {
        let class_name = self.warper.resolve_class(ctx)?.ok_or_else(|| ConfigError::Model {
            path: self.path.clone(),
            reason: "no warp rule matched; element has no concrete class".to_string(),
        })?;

        if let Some((existing, node)) = self.current.borrow().as_ref() {
            if existing == &class_name {
                return Ok(node.clone());
            }
        }
        let class = self.catalog.class(&class_name)?;
        let node = Rc::new(Node::new(class, self.path.clone(), self.catalog.clone()));
        *self.current.borrow_mut() = Some((class_name, node.clone()));
        ctx.record_change(&self.path, ChangeNote::Note("warp reconfigured element".to_string()), false);
        Ok(node)
    }
}

pub struct Node {
    class: Arc<ConfigClass>,
    path: String,
    catalog: Rc<Catalog>,
    parent: RefCell<Weak<Node>>,
    elements: RefCell<HashMap<String, Element>>,
    accepted: RefCell<HashMap<String, ElementSchema>>,
    level_overrides: RefCell<HashMap<String, Level>>,
    status_overrides: RefCell<HashMap<String, Status>>,
    deprecation_warned: RefCell<HashSet<String>>,
}

impl Node {
    pub fn new(class: Arc<ConfigClass>, path: impl Into<String>, catalog: Rc<Catalog>) -> Self {
        Node {
            class,
            path: path.into(),
            catalog,
            parent: RefCell::new(Weak::new()),
            elements: RefCell::new(HashMap::new()),
            accepted: RefCell::new(HashMap::new()),
            level_overrides: RefCell::new(HashMap::new()),
            status_overrides: RefCell::new(HashMap::new()),
            deprecation_warned: RefCell::new(HashSet::new()),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn class_name(&self) -> &str {
        &self.class.name
    }

    pub fn parent(&self) -> Option<Rc<Node>> {
        self.parent.borrow().upgrade()
    }

    fn child_path(&self, name: &str) -> String {
        if self.path.is_empty() {
            name.to_string()
        } else {
            format!("{}.{name}", self.path)
        }
    }

    fn level_of(&self, schema: &ElementSchema) -> Level {
        self.level_overrides.borrow().get(&schema.name).copied().unwrap_or(schema.level)
    }

    fn status_of(&self, schema: &ElementSchema) -> Status {
        self.status_overrides.borrow().get(&schema.name).copied().unwrap_or(schema.status)
    }

    pub fn set_level(&self, name: &str, level: Level) {
        self.level_overrides.borrow_mut().insert(name.to_string(), level);
    }

    pub fn set_status(&self, name: &str, status: Status) {
        self.status_overrides.borrow_mut().insert(name.to_string(), status);
    }

    fn find_schema(&self, name: &str) -> Option<ElementSchema> {
        if let Some(e) = self.class.element(name) {
            return Some(e.clone());
        }
        if let Some(e) = self.accepted.borrow().get(name) {
            return Some(e.clone());
        }
        None
    }

    /// Tries every `accept` rule against `name`, cloning the named
    /// template element's schema under the new name on a match.
    fn try_accept(&self, name: &str) -> Option<ElementSchema> {
        for rule in &self.class.accept {
            if rule.pattern.is_match(name) {
                if let Some(template) = self.class.element(&rule.template) {
                    let mut cloned = template.clone();
                    cloned.name = name.to_string();
                    self.accepted.borrow_mut().insert(name.to_string(), cloned.clone());
                    return Some(cloned);
                }
            }
        }
        None
    }

    fn fuzzy_typo_warning(&self, name: &str) -> Option<String> {
        let mut best: Option<(&str, usize)> = None;
        for e in &self.class.elements {
            let d = levenshtein(name, &e.name);
            if best.map(|(_, bd)| d < bd).unwrap_or(true) {
                best = Some((&e.name, d));
            }
        }
        match best {
            Some((candidate, d)) if d > 0 && d <= 2 => {
                Some(format!("'{name}' is not a declared element; did you mean '{candidate}'?"))
            }
            _ => None,
        }
    }

    fn instantiate(self: &Rc<Self>, schema: &ElementSchema) -> Result<Element> {
        let child_path = self.child_path(&schema.name);
        match &schema.kind {
            ElementKind::Leaf(spec) => Ok(Element::Leaf(Rc::new(Value::new(schema.name.clone(), child_path, spec.clone())))),
            ElementKind::Collection(spec) => {
                let spec = spec.clone();
                let catalog = self.catalog.clone();
                let cargo_path = child_path.clone();
                let build_cargo = move || -> Cargo {
                    if let Some(class_name) = &spec.cargo_class {
                        match catalog.class(class_name) {
                            Ok(class) => Cargo::Node(Rc::new(Node::new(class, cargo_path.clone(), catalog.clone()))),
                            Err(_) => Cargo::Leaf(Rc::new(Value::new("_", cargo_path.clone(), Arc::new(Default::default())))),
                        }
                    } else {
                        let vspec = spec.cargo_value_spec.clone().unwrap_or_default();
                        Cargo::Leaf(Rc::new(Value::new("_", cargo_path.clone(), vspec)))
                    }
                };
                Ok(Element::Collection(Rc::new(IdCollection::new(
                    schema.name.clone(),
                    child_path,
                    spec,
                    build_cargo,
                ))))
            }
            ElementKind::Node { class } => {
                let class_def = self.catalog.class(class)?;
                let child = Rc::new(Node::new(class_def, child_path, self.catalog.clone()));
                *child.parent.borrow_mut() = Rc::downgrade(self);
                Ok(Element::Node(child))
            }
            ElementKind::WarpedNode { masters, rules } => {
                let warper = Warper::new(child_path.clone(), masters.clone(), rules.clone());
                Ok(Element::Warped(Rc::new(WarpedNode::new(child_path, warper, self.catalog.clone()))))
            }
        }
    }

    /// Resolves `name` to its live element, creating it on first
    /// access. Honours hidden/obsolete/deprecated status and the
    /// Accept mechanism for names not declared in the class.
    pub fn fetch_element(
        self: &Rc<Self>,
        ctx: &dyn TreeContext,
        name: &str,
        check: CheckPolicy,
        accept_hidden: bool,
    ) -> Result<Option<Element>> {
        let schema = match self.find_schema(name) {
            Some(s) => s,
            None => match self.try_accept(name) {
                Some(s) => {
                    if let Some(w) = self.fuzzy_typo_warning(name) {
                        ctx.emit_warning(&self.child_path(name), &w);
                    }
                    s
                }
                None => {
                    return match check {
                        CheckPolicy::Yes => Err(ConfigError::UnknownElement(name.to_string())),
                        _ => {
                            ctx.record_error(&self.child_path(name), ConfigError::UnknownElement(name.to_string()));
                            Ok(None)
                        }
                    }
                }
            },
        };

        let level = self.level_of(&schema);
        if level == Level::Hidden && !accept_hidden {
            return match check {
                CheckPolicy::Yes => Err(ConfigError::User {
                    path: self.child_path(name),
                    reason: "element is hidden".to_string(),
                }),
                _ => Ok(None),
            };
        }

        let status = self.status_of(&schema);
        if status == Status::Obsolete {
            return match check {
                CheckPolicy::Yes => Err(ConfigError::User {
                    path: self.child_path(name),
                    reason: "element is obsolete".to_string(),
                }),
                _ => Ok(None),
            };
        }
        if status == Status::Deprecated && check == CheckPolicy::Yes {
            let mut warned = self.deprecation_warned.borrow_mut();
            if warned.insert(name.to_string()) {
                ctx.emit_warning(&self.child_path(name), "element is deprecated");
                ctx.record_change(
                    &self.child_path(name),
                    ChangeNote::Note("dropping deprecated parameter".to_string()),
                    false,
                );
            }
        }

        if let Some(existing) = self.elements.borrow().get(name) {
            return Ok(Some(existing.clone()));
        }
        let element = self.instantiate(&schema)?;
        self.elements.borrow_mut().insert(name.to_string(), element.clone());
        Ok(Some(element))
    }

    /// Declared element names in model order, excluding
    /// hidden/obsolete/deprecated unless `all` is set (backends pass
    /// `all` to see everything for serialization).
    pub fn children(&self, all: bool) -> Vec<String> {
        self.class
            .elements
            .iter()
            .filter(|e| {
                all || {
                    let level = self.level_overrides.borrow().get(&e.name).copied().unwrap_or(e.level);
                    let status = self.status_overrides.borrow().get(&e.name).copied().unwrap_or(e.status);
                    level != Level::Hidden && status == Status::Standard
                }
            })
            .map(|e| e.name.clone())
            .collect()
    }

    /// Elements already materialized (created by a prior access), in
    /// no particular order. Used by tree walks that must not force
    /// lazy creation of elements nobody has touched (`layered_clear`,
    /// the dump printer).
    pub fn instantiated(&self) -> Vec<(String, Element)> {
        self.elements.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// Resolves a `{elt}` templated one-liner by fetching each named
    /// element in `user` mode and substituting its rendered value
    /// (empty string for anything unset).
    pub fn gist(self: &Rc<Self>, ctx: &dyn TreeContext, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            rest = &rest[start + 1..];
            let end = match rest.find('}') {
                Some(e) => e,
                None => {
                    out.push('{');
                    break;
                }
            };
            let name = &rest[..end];
            rest = &rest[end + 1..];
            let rendered = self
                .fetch_element(ctx, name, CheckPolicy::Skip, false)
                .ok()
                .flatten()
                .and_then(|e| e.as_leaf().cloned())
                .and_then(|v| v.fetch(ctx, crate::value::FetchMode::User, CheckPolicy::Skip, true).ok().flatten())
                .map(|s| s.as_str())
                .unwrap_or_default();
            out.push_str(&rendered);
        }
        out.push_str(rest);
        out
    }
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for i in 1..=a.len() {
        let mut prev = row[0];
        row[0] = i;
        for j in 1..=b.len() {
            let tmp = row[j];
            row[j] = if a[i - 1] == b[j - 1] {
                prev
            } else {
                1 + prev.min(row[j]).min(row[j - 1])
            };
            prev = tmp;
        }
    }
    row[b.len()]
}
