//! A typed configuration tree: a catalog of [`ConfigClass`](catalog::ConfigClass)
//! definitions describes leaves, hashes, lists, child nodes and warped
//! (polymorphic) nodes; an [`Instance`](instance::Instance) loads a
//! catalog's root class into a live [`Node`](node::Node) tree and owns
//! the change log, error map and warning dedup table that every store
//! goes through.
//!
//! ```
//! use std::rc::Rc;
//! use confmodel::catalog::Catalog;
//! use confmodel::instance::Instance;
//! use confmodel::error::CheckPolicy;
//! use confmodel::node::Element;
//! use confmodel::value::{FetchMode, Scalar};
//!
//! let catalog = Catalog::from_toml(r#"
//!     [[classes]]
//!     name = "root"
//!
//!     [[classes.elements]]
//!     name = "name"
//!     type = "leaf"
//!     value_type = "uniline"
//!     default = "unnamed"
//! "#).unwrap();
//! let instance = Instance::new(Rc::new(catalog), "root", "/tmp").unwrap();
//! let root = instance.root();
//! let name = root
//!     .fetch_element(&instance, "name", CheckPolicy::Yes, false)
//!     .unwrap()
//!     .unwrap();
//! let Element::Leaf(name) = name else { panic!() };
//! assert_eq!(
//!     name.fetch(&instance, FetchMode::Standard, CheckPolicy::Yes, false).unwrap(),
//!     Some(Scalar::Str("unnamed".to_string()))
//! );
//! ```
//!
//! Content reaches the tree in three ways: directly through
//! [`Value::store`](value::Value::store) / collection operations,
//! through a [`Backend`](backend::Backend) that translates a file
//! format to and from node content, or through the [`loader`] command
//! DSL, a small text language for navigating and mutating a tree that
//! both `default_with_init` programs and scripted edits are written in.
//! [`dump::dump`] renders materialized content back into that same DSL.

pub mod backend;
pub mod catalog;
pub mod collection;
pub mod context;
pub mod dump;
pub mod error;
pub mod expr;
pub mod instance;
pub mod loader;
pub mod node;
pub mod value;
