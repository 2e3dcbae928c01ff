//! The tree's owner: holds the root [`crate::node::Node`], the active
//! [`LoadMode`], the append-only change log, the per-path soft error
//! map and the warning dedup table. Everything a leaf or collection
//! needs back from "the rest of the tree" during a call reaches it
//! through the [`TreeContext`] impl here.
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use camino::Utf8PathBuf;
use log::{debug, warn};

use crate::catalog::Catalog;
use crate::collection::{Cargo, Index};
use crate::context::{ChangeNote, ChangeRecord, LoadMode, TreeContext};
use crate::error::{CheckPolicy, ConfigError, Result};
use crate::node::{Element, Node};
use crate::value::{Scalar, Value};

/// What a dotted path resolved to.
pub enum Resolved {
    Leaf(Rc<Value>),
    Collection(Rc<crate::collection::IdCollection>),
    Node(Rc<Node>),
}

/// Owns a configuration tree rooted at one [`Node`], built from one
/// [`Catalog`], rooted at one directory on disk.
pub struct Instance {
    root: Rc<Node>,
    catalog: Rc<Catalog>,
    root_dir: Utf8PathBuf,
    mode_stack: RefCell<Vec<LoadMode>>,
    changes: RefCell<Vec<ChangeRecord>>,
    errors: RefCell<HashMap<String, ConfigError>>,
    warned: RefCell<HashSet<(String, String)>>,
    needs_save: Cell<usize>,
    write_backs: RefCell<Vec<WriteBackEntry>>,
}

struct WriteBackEntry {
    path: String,
    backend: Rc<dyn crate::backend::Backend>,
    file: Option<String>,
}

impl Instance {
    pub fn new(catalog: Rc<Catalog>, root_class: &str, root_dir: impl Into<Utf8PathBuf>) -> Result<Self> {
        let class = catalog.class(root_class)?;
        let root = Rc::new(Node::new(class, String::new(), catalog.clone()));
        Ok(Instance {
            root,
            catalog,
            root_dir: root_dir.into(),
            mode_stack: RefCell::new(Vec::new()),
            changes: RefCell::new(Vec::new()),
            errors: RefCell::new(HashMap::new()),
            warned: RefCell::new(HashSet::new()),
            needs_save: Cell::new(0),
            write_backs: RefCell::new(Vec::new()),
        })
    }

    pub fn root(&self) -> Rc<Node> {
        self.root.clone()
    }

    pub fn catalog(&self) -> Rc<Catalog> {
        self.catalog.clone()
    }

    pub fn root_dir(&self) -> &camino::Utf8Path {
        &self.root_dir
    }

    // ---- mode transitions ------------------------------------------

    fn push_mode(&self, mode: LoadMode) {
        debug!("mode: entering {:?}", mode);
        self.mode_stack.borrow_mut().push(mode);
    }

    fn pop_mode(&self) {
        self.mode_stack.borrow_mut().pop();
        debug!("mode: back to {:?}", self.mode());
    }

    pub fn preset_start(&self) {
        self.push_mode(LoadMode::Preset);
    }

    pub fn preset_stop(&self) {
        self.pop_mode();
    }

    pub fn layered_start(&self) {
        self.push_mode(LoadMode::Layered);
    }

    pub fn layered_stop(&self) {
        self.pop_mode();
    }

    pub fn initial_load_start(&self) {
        self.push_mode(LoadMode::InitialLoad);
    }

    pub fn initial_load_stop(&self) {
        self.pop_mode();
    }

    /// Walks every materialized leaf and drops its layered slot,
    /// without raising change events; used when entering a fresh
    /// layered pass so stale data from a previous layer doesn't leak
    /// into precedence.
    pub fn layered_clear(&self) {
        fn walk(node: &Rc<Node>) {
            for (_, element) in node.instantiated() {
                match element {
                    Element::Leaf(v) => v.clear_layered(),
                    Element::Node(n) => walk(&n),
                    Element::Collection(c) => {
                        for key in c.keys() {
                            if let Some(Cargo::Node(n)) = c.get(&key) {
                                walk(&n);
                            } else if let Some(Cargo::Leaf(v)) = c.get(&key) {
                                v.clear_layered();
                            }
                        }
                    }
                    Element::Warped(_) => {}
                }
            }
        }
        walk(&self.root);
    }

    // ---- path resolution ---------------------------------------------

    /// Walks a dotted path from the root, materializing elements along
    /// the way (subject to `check=skip`, so an absent element resolves
    /// to `None` rather than raising).
    pub fn resolve(&self, path: &str) -> Option<Resolved> {
        let path = path.trim_matches('.');
        if path.is_empty() {
            return Some(Resolved::Node(self.root.clone()));
        }
        let parts: Vec<&str> = path.split('.').collect();
        let mut node = self.root.clone();
        let mut idx = 0;
        while idx < parts.len() {
            let element = node.fetch_element(self, parts[idx], CheckPolicy::Skip, true).ok().flatten()?;
            idx += 1;
            match element {
                Element::Leaf(v) => return if idx == parts.len() { Some(Resolved::Leaf(v)) } else { None },
                Element::Collection(c) => {
                    if idx == parts.len() {
                        return Some(Resolved::Collection(c));
                    }
                    let key = c.key_for(parts[idx]);
                    idx += 1;
                    match c.get(&key)? {
                        Cargo::Leaf(v) => return if idx == parts.len() { Some(Resolved::Leaf(v)) } else { None },
                        Cargo::Node(n) => node = n,
                    }
                }
                Element::Node(n) => node = n,
                Element::Warped(w) => node = w.resolve(self).ok()?,
            }
        }
        Some(Resolved::Node(node))
    }

    // ---- change log / errors ----------------------------------------

    pub fn list_changes(&self) -> Vec<String> {
        self.changes.borrow().iter().map(|c| c.to_string()).collect()
    }

    pub fn take_changes(&self) -> Vec<ChangeRecord> {
        self.changes.borrow_mut().drain(..).collect()
    }

    pub fn errors(&self) -> HashMap<String, ConfigError> {
        self.errors.borrow().clone()
    }

    pub fn needs_save(&self) -> bool {
        self.needs_save.get() > 0
    }

    // ---- write-back registration --------------------------------------

    /// Registers `node`'s subtree at `path` to be written through
    /// `backend` on [`Self::write_back`].
    pub fn register_write_back(&self, path: impl Into<String>, backend: Rc<dyn crate::backend::Backend>, file: Option<String>) {
        self.write_backs.borrow_mut().push(WriteBackEntry {
            path: path.into(),
            backend,
            file,
        });
    }

    pub fn write_back(&self) -> Result<()> {
        let entries = self.write_backs.borrow();
        for entry in entries.iter() {
            let node = match self.resolve(&entry.path) {
                Some(Resolved::Node(n)) => n,
                Some(Resolved::Leaf(_)) | Some(Resolved::Collection(_)) => {
                    return Err(ConfigError::Model {
                        path: entry.path.clone(),
                        reason: "write-back target is not a node".to_string(),
                    })
                }
                None => continue,
            };
            entry.backend.write(&node, self, &self.root_dir, entry.file.as_deref())?;
        }
        drop(entries);
        self.needs_save.set(0);
        Ok(())
    }
}

impl TreeContext for Instance {
    fn mode(&self) -> LoadMode {
        self.mode_stack.borrow().last().copied().unwrap_or(LoadMode::Normal)
    }

    fn resolve_scalar(&self, path: &str) -> Option<Scalar> {
        match self.resolve(path)? {
            Resolved::Leaf(v) => v.fetch(self, crate::value::FetchMode::User, CheckPolicy::Skip, true).ok().flatten(),
            _ => None,
        }
    }

    fn resolve_keys(&self, path: &str) -> Option<Vec<String>> {
        match self.resolve(path)? {
            Resolved::Collection(c) => {
                let _ = c.ensure_default_keys(self);
                Some(c.keys().iter().map(Index::to_string).collect())
            }
            _ => None,
        }
    }

    fn record_change(&self, path: &str, note: ChangeNote, force: bool) {
        if self.mode().is_initial_load() && !force {
            return;
        }
        self.changes.borrow_mut().push(ChangeRecord {
            path: path.to_string(),
            note,
        });
        self.needs_save.set(self.needs_save.get() + 1);
    }

    fn record_error(&self, path: &str, error: ConfigError) {
        self.errors.borrow_mut().insert(path.to_string(), error);
    }

    fn emit_warning(&self, path: &str, message: &str) {
        let key = (path.to_string(), message.to_string());
        let first = self.warned.borrow_mut().insert(key);
        if first {
            warn!("{path}: {message}");
        } else {
            debug!("{path}: {message}");
        }
    }
}
