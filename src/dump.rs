//! Renders a node's materialized content back into a command program:
//! `load(dump(tree))` reproduces the same user-set content, up to
//! element order (iteration here is sorted for determinism; the live
//! tree itself has no inherent order beyond a List's indices).
use std::rc::Rc;

use crate::collection::{Cargo, IdCollection};
use crate::context::TreeContext;
use crate::error::CheckPolicy;
use crate::node::{Element, Node};
use crate::value::FetchMode;

/// Dumps `node`'s currently instantiated elements as a single
/// whitespace-separated command program.
pub fn dump(node: &Rc<Node>, ctx: &dyn TreeContext) -> String {
    let mut out = Vec::new();
    dump_node(node, ctx, &mut out);
    out.join(" ")
}

fn dump_node(node: &Rc<Node>, ctx: &dyn TreeContext, out: &mut Vec<String>) {
    let mut children = node.instantiated();
    children.sort_by(|a, b| a.0.cmp(&b.0));
    for (name, element) in children {
        match element {
            Element::Leaf(v) => {
                if let Some(value) = v.fetch(ctx, FetchMode::Custom, CheckPolicy::Skip, true).ok().flatten() {
                    out.push(format!("{name}={}", quote(&value.as_str())));
                }
            }
            Element::Node(n) => {
                out.push(name);
                dump_node(&n, ctx, out);
                out.push("-".to_string());
            }
            Element::Warped(w) => {
                if let Ok(n) = w.resolve(ctx) {
                    out.push(name);
                    dump_node(&n, ctx, out);
                    out.push("-".to_string());
                }
            }
            Element::Collection(c) => dump_collection(&name, &c, ctx, out),
        }
    }
}

fn dump_collection(name: &str, c: &Rc<IdCollection>, ctx: &dyn TreeContext, out: &mut Vec<String>) {
    let mut keys = c.keys();
    keys.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
    for key in keys {
        let cargo = match c.get(&key) {
            Some(c) => c,
            None => continue,
        };
        match cargo {
            Cargo::Leaf(v) => {
                if let Some(value) = v.fetch(ctx, FetchMode::User, CheckPolicy::Skip, true).ok().flatten() {
                    out.push(format!("{name}:{}={}", quote(&key.to_string()), quote(&value.as_str())));
                }
            }
            Cargo::Node(n) => {
                out.push(format!("{name}:{}", quote(&key.to_string())));
                dump_node(&n, ctx, out);
                out.push("-".to_string());
            }
        }
    }
}

/// Wraps `s` in double quotes (escaping `"` and `\`) if it contains
/// whitespace or a structural delimiter, so it survives a round trip
/// through [`crate::loader::tokenize`]/[`crate::loader::parse_command`].
fn quote(s: &str) -> String {
    let needs_quoting = s.is_empty()
        || s.chars().any(|c| c.is_whitespace() || matches!(c, ':' | '=' | '.' | '<' | '>' | '~' | '#' | '"'));
    if !needs_quoting {
        return s.to_string();
    }
    let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}
