//! Executes a parsed command program against a starting node: the
//! stack-based interpreter behind [`run_against`], the single entry
//! point the rest of the engine (notably
//! [`crate::collection::IdCollection::ensure_default_keys`]) calls to
//! run a `default_with_init` mini-program.
use std::rc::Rc;

use log::trace;
use regex::Regex;

use crate::catalog::scalar_of;
use crate::collection::{Cargo, IdCollection, Index};
use crate::context::TreeContext;
use crate::error::{CheckPolicy, ConfigError, Result};
use crate::node::{Element, Node};
use crate::value::{Scalar, Value};

use super::command::{parse_command, Action, Command, ElementCmd, Subaction};
use super::lexer::tokenize;

/// Parses and runs `program` against `node`, per the command DSL.
pub fn run_against(node: Rc<Node>, program: &str, ctx: &dyn TreeContext, check: CheckPolicy) -> Result<()> {
    let commands: Vec<Command> = tokenize(program)
        .iter()
        .map(|t| parse_command(t))
        .collect::<Result<Vec<_>>>()?;
    let exec = Exec { ctx, check };
    let mut stack = vec![node];
    exec.run(&mut stack, &commands)
}

struct Exec<'a> {
    ctx: &'a dyn TreeContext,
    check: CheckPolicy,
}

impl<'a> Exec<'a> {
    fn run(&self, stack: &mut Vec<Rc<Node>>, commands: &[Command]) -> Result<()> {
        let mut idx = 0;
        while idx < commands.len() {
            trace!("executing {:?} at depth {}", commands[idx], stack.len());
            match &commands[idx] {
                Command::Root => stack.truncate(1),
                Command::Up => {
                    if stack.len() > 1 {
                        stack.pop();
                    } else {
                        return self.handle_residual(&commands[idx + 1..]);
                    }
                }
                Command::Search(name) => self.nav_search(stack, name, 1)?,
                Command::Element(cmd) => {
                    if let Some(Action::RegexLoop(pattern)) = &cmd.action {
                        self.run_regex_loop(stack, cmd, pattern, &commands[idx + 1..])?;
                        return Ok(());
                    }
                    self.execute_element(stack, cmd)?;
                }
            }
            idx += 1;
        }
        Ok(())
    }

    fn handle_residual(&self, residual: &[Command]) -> Result<()> {
        if residual.is_empty() {
            return Ok(());
        }
        let err = match &residual[0] {
            Command::Search(name) => ConfigError::Load("searched item not found".to_string(), name.clone()),
            _ => ConfigError::Load("too many '-' in your command".to_string(), String::new()),
        };
        match self.check {
            CheckPolicy::Yes => Err(err),
            CheckPolicy::Skip => Ok(()),
            CheckPolicy::No => {
                self.ctx.record_error("", err);
                Ok(())
            }
        }
    }

    /// Walks up the stack looking for a node exposing `name`, never
    /// popping at or below `floor` (the tree root normally, or a regex
    /// loop's starting depth while running its per-iteration tail).
    fn nav_search(&self, stack: &mut Vec<Rc<Node>>, name: &str, floor: usize) -> Result<()> {
        loop {
            let top = stack.last().unwrap().clone();
            if top.fetch_element(self.ctx, name, CheckPolicy::Skip, true).ok().flatten().is_some() {
                return Ok(());
            }
            if stack.len() <= floor {
                return match self.check {
                    CheckPolicy::Yes => Err(ConfigError::Load("searched item not found".to_string(), name.to_string())),
                    _ => Ok(()),
                };
            }
            stack.pop();
        }
    }

    fn current_element(&self, stack: &[Rc<Node>], name: &str) -> Result<Option<Element>> {
        stack.last().unwrap().fetch_element(self.ctx, name, self.check, false)
    }

    fn execute_element(&self, stack: &mut Vec<Rc<Node>>, cmd: &ElementCmd) -> Result<()> {
        let element = match self.current_element(stack, &cmd.name)? {
            Some(e) => e,
            None => return Ok(()),
        };
        match element {
            Element::Node(n) => {
                if let Some(Action::Clear) = &cmd.action {
                    // clearing a node element has no defined content; ignore.
                } else {
                    stack.push(n);
                }
            }
            Element::Warped(w) => stack.push(w.resolve(self.ctx)?),
            Element::Leaf(v) => self.apply_leaf(&v, cmd)?,
            Element::Collection(c) => self.apply_collection(stack, &c, cmd)?,
        }
        Ok(())
    }

    fn apply_leaf(&self, v: &Rc<Value>, cmd: &ElementCmd) -> Result<()> {
        if matches!(&cmd.action, Some(Action::Clear)) {
            v.clear(self.ctx);
        }
        if let Some(sub) = &cmd.subaction {
            apply_leaf_subaction(v, self.ctx, self.check, sub)?;
        }
        if let Some(annotation) = &cmd.annotation {
            self.ctx.record_change(
                v.path(),
                crate::context::ChangeNote::Note(format!("annotation: {annotation}")),
                false,
            );
        }
        Ok(())
    }

    fn apply_collection(&self, stack: &mut Vec<Rc<Node>>, c: &Rc<IdCollection>, cmd: &ElementCmd) -> Result<()> {
        match &cmd.action {
            Some(Action::Id(id)) | Some(Action::At(id)) => {
                let key = c.key_for(id);
                let cargo = c.ensure_entry(self.ctx, key)?;
                self.enter_cargo(stack, cargo, cmd)?;
            }
            Some(Action::MoveFront) => {
                let key = c.keys().into_iter().next().unwrap_or(Index::Int(0));
                let cargo = c.ensure_entry(self.ctx, key)?;
                self.enter_cargo(stack, cargo, cmd)?;
            }
            Some(Action::MoveBack) => {
                let cargo = c.push_value(self.ctx, Scalar::Str(String::new())).and_then(|idx| {
                    c.get(&idx).ok_or_else(|| ConfigError::Internal("just-pushed entry missing".to_string()))
                })?;
                self.enter_cargo(stack, cargo, cmd)?;
            }
            Some(Action::Delete(id)) => {
                c.delete(self.ctx, &c.key_for(id));
            }
            Some(Action::DeleteByValue(value)) => {
                for key in c.keys() {
                    if let Some(cargo) = c.get(&key) {
                        if cargo.as_leaf().and_then(|v| v.fetch(self.ctx, crate::value::FetchMode::User, CheckPolicy::Skip, true).ok().flatten()).map(|s| s.as_str()).as_deref() == Some(value.as_str()) {
                            c.delete(self.ctx, &key);
                        }
                    }
                }
            }
            Some(Action::DeleteMatching(pattern)) => {
                let re = Regex::new(pattern)?;
                for key in c.keys() {
                    if re.is_match(&key.to_string()) {
                        c.delete(self.ctx, &key);
                    }
                }
            }
            Some(Action::SubstituteAll(subst)) => {
                for key in c.keys() {
                    if let Some(Cargo::Leaf(v)) = c.get(&key) {
                        apply_substitution(&v, self.ctx, self.check, subst)?;
                    }
                }
            }
            Some(Action::Clear) => c.clear(self.ctx),
            Some(Action::Method { name, args }) => self.run_collection_method(c, name, args)?,
            Some(Action::RegexLoop(_)) => unreachable!("handled by caller"),
            None => {}
        }
        // A bare `name=a,b,c` (no `:action` at all) replaces the whole
        // collection's content. When an action already consumed the
        // subaction (e.g. `:id=value` descending into one entry), it's
        // handled there instead.
        if cmd.action.is_none() {
            if let Some(sub) = &cmd.subaction {
                apply_collection_store(c, self.ctx, self.check, sub)?;
            }
        }
        Ok(())
    }

    fn enter_cargo(&self, stack: &mut Vec<Rc<Node>>, cargo: Cargo, cmd: &ElementCmd) -> Result<()> {
        match cargo {
            Cargo::Node(n) => stack.push(n),
            Cargo::Leaf(v) => {
                if let Some(sub) = &cmd.subaction {
                    apply_leaf_subaction(&v, self.ctx, self.check, sub)?;
                }
            }
        }
        Ok(())
    }

    fn run_collection_method(&self, c: &Rc<IdCollection>, name: &str, args: &[String]) -> Result<()> {
        let scalar_of_arg = |raw: &str| cargo_scalar(c, raw);
        match name {
            "push" => {
                for a in args {
                    c.push_value(self.ctx, scalar_of_arg(a))?;
                }
            }
            "unshift" => {
                for a in args.iter().rev() {
                    c.unshift_value(self.ctx, scalar_of_arg(a))?;
                }
            }
            "insert_at" => {
                let pos: usize = args.first().and_then(|s| s.parse().ok()).unwrap_or(0);
                let value = args.get(1).map(|s| scalar_of_arg(s)).unwrap_or(Scalar::Str(String::new()));
                c.insert_at(self.ctx, pos, value)?;
            }
            "insert_before" => {
                let key = args.first().map(|s| c.key_for(s)).unwrap_or(Index::Int(0));
                let value = args.get(1).map(|s| scalar_of_arg(s)).unwrap_or(Scalar::Str(String::new()));
                c.insert_before(self.ctx, &key, value)?;
            }
            "insort" => {
                for a in args {
                    c.insort(self.ctx, scalar_of_arg(a))?;
                }
            }
            "sort" => c.sort(self.ctx),
            "copy" => {
                if let (Some(from), Some(to)) = (args.first(), args.get(1)) {
                    c.copy(self.ctx, &c.key_for(from), c.key_for(to))?;
                }
            }
            "clear" => c.clear(self.ctx),
            "rm" => {
                for a in args {
                    c.delete(self.ctx, &c.key_for(a));
                }
            }
            "json" => {
                if let Some(path) = args.first() {
                    load_json_into_collection(c, self.ctx, path)?;
                }
            }
            other => {
                return Err(ConfigError::Load(format!("unknown collection method '{other}'"), String::new()));
            }
        }
        Ok(())
    }

    fn run_regex_loop(&self, stack: &mut Vec<Rc<Node>>, cmd: &ElementCmd, pattern: &str, tail: &[Command]) -> Result<()> {
        let element = match self.current_element(stack, &cmd.name)? {
            Some(Element::Collection(c)) => c,
            Some(_) => {
                return Err(ConfigError::Load("regex loop requires a hash or list element".to_string(), cmd.name.clone()))
            }
            None => return Ok(()),
        };
        let _ = element.ensure_default_keys(self.ctx);
        let re = Regex::new(pattern)?;
        let base = stack.len();
        for key in element.keys() {
            if !re.is_match(&key.to_string()) {
                continue;
            }
            trace!("regex loop entering '{key}' at depth {base}");
            let cargo = match element.get(&key) {
                Some(c) => c,
                None => continue,
            };
            let entry_node = match cargo {
                Cargo::Node(n) => n,
                Cargo::Leaf(_) => continue,
            };
            stack.truncate(base);
            stack.push(entry_node);
            // `floor` pins the matched entry's own node: the tail may
            // descend from it and pop back, but a `-` that would pop
            // the entry itself away ends this iteration's tail early.
            let floor = base + 1;
            let mut idx = 0;
            while idx < tail.len() {
                match &tail[idx] {
                    Command::Root => stack.truncate(floor),
                    Command::Up => {
                        if stack.len() > floor {
                            stack.pop();
                        } else {
                            break;
                        }
                    }
                    Command::Search(name) => self.nav_search(stack, name, floor)?,
                    Command::Element(inner) => {
                        if let Some(Action::RegexLoop(p)) = &inner.action {
                            self.run_regex_loop(stack, inner, p, &tail[idx + 1..])?;
                            break;
                        }
                        self.execute_element(stack, inner)?;
                    }
                }
                idx += 1;
            }
        }
        stack.truncate(base);
        Ok(())
    }
}

fn cargo_scalar(c: &IdCollection, raw: &str) -> Scalar {
    let value_type = c.spec().cargo_value_spec.as_ref().and_then(|s| s.value_type);
    scalar_of(value_type, raw)
}

fn apply_leaf_subaction(v: &Rc<Value>, ctx: &dyn TreeContext, check: CheckPolicy, sub: &Subaction) -> Result<()> {
    let value_type = v.spec().value_type;
    match sub {
        Subaction::Store(raw) => {
            v.store(ctx, scalar_of(value_type, raw), check, false)?;
        }
        Subaction::Append(raw) => {
            let current = v.fetch(ctx, crate::value::FetchMode::User, CheckPolicy::Skip, true)?.map(|s| s.as_str()).unwrap_or_default();
            v.store(ctx, scalar_of(value_type, &format!("{current}{raw}")), check, false)?;
        }
        Subaction::Substitute(subst) => apply_substitution(v, ctx, check, subst)?,
        Subaction::FromFile(args) => {
            if let Some(path) = args.first() {
                let text = std::fs::read_to_string(path)?;
                v.store(ctx, scalar_of(value_type, text.trim()), check, false)?;
            }
        }
        Subaction::FromJson(args) => {
            if let Some(spec) = args.first() {
                if let Some(s) = read_structured_path::<serde_json::Value>(spec, |text| serde_json::from_str(text).ok())? {
                    v.store(ctx, scalar_of(value_type, &s), check, false)?;
                }
            }
        }
        Subaction::FromYaml(args) => {
            if let Some(spec) = args.first() {
                if let Some(s) = read_structured_path::<serde_yaml::Value>(spec, |text| serde_yaml::from_str(text).ok())? {
                    v.store(ctx, scalar_of(value_type, &s), check, false)?;
                }
            }
        }
        Subaction::FromEnv(args) => {
            if let Some(name) = args.first() {
                if let Ok(val) = std::env::var(name) {
                    v.store(ctx, scalar_of(value_type, &val), check, false)?;
                }
            }
        }
    }
    Ok(())
}

fn apply_collection_store(c: &Rc<IdCollection>, ctx: &dyn TreeContext, check: CheckPolicy, sub: &Subaction) -> Result<()> {
    // A bare `name=a,b,c` against a collection replaces its content
    // with one leaf entry per comma-separated value.
    if let Subaction::Store(raw) = sub {
        c.clear(ctx);
        for part in raw.split(',') {
            c.push_value(ctx, cargo_scalar(c, part.trim()))?;
        }
        let _ = check;
    }
    Ok(())
}

/// Applies a `s/pattern/replacement/flags` substitution to a leaf's
/// current user value.
fn apply_substitution(v: &Rc<Value>, ctx: &dyn TreeContext, check: CheckPolicy, subst: &str) -> Result<()> {
    let body = subst.strip_prefix('s').unwrap_or(subst);
    let delim = body.chars().next().unwrap_or('/');
    let parts: Vec<&str> = body.trim_start_matches(delim).splitn(3, delim).collect();
    if parts.len() < 2 {
        return Err(ConfigError::Load("malformed substitution".to_string(), subst.to_string()));
    }
    let pattern = parts[0];
    let replacement = parts[1];
    let flags = parts.get(2).copied().unwrap_or("");
    let re = Regex::new(pattern)?;
    let current = v.fetch(ctx, crate::value::FetchMode::User, CheckPolicy::Skip, true)?.map(|s| s.as_str()).unwrap_or_default();
    let replaced = if flags.contains('g') {
        re.replace_all(&current, replacement).into_owned()
    } else {
        re.replace(&current, replacement).into_owned()
    };
    let value_type = v.spec().value_type;
    v.store(ctx, scalar_of(value_type, &replaced), check, false)
}

/// Walks `spec` (a `/`-separated path) until a file prefix exists on
/// disk, parses it with `parse`, then projects the remaining segments
/// as nested lookups (object keys or array indices).
fn read_structured_path<T>(spec: &str, parse: impl Fn(&str) -> Option<T>) -> Result<Option<String>>
where
    T: StructuredValue,
{
    let segments: Vec<&str> = spec.split('/').collect();
    for split in (1..=segments.len()).rev() {
        let candidate = segments[..split].join("/");
        if std::path::Path::new(&candidate).is_file() {
            let text = std::fs::read_to_string(&candidate)?;
            let root = parse(&text).ok_or_else(|| ConfigError::LoadData("failed to parse structured document".to_string(), candidate.clone()))?;
            let mut cur = root;
            for key in &segments[split..] {
                cur = cur
                    .project(key)
                    .ok_or_else(|| ConfigError::LoadData(format!("no such key '{key}'"), candidate.clone()))?;
            }
            return Ok(cur.to_scalar_text());
        }
    }
    Ok(None)
}

trait StructuredValue: Sized {
    fn project(&self, key: &str) -> Option<Self>;
    fn to_scalar_text(&self) -> Option<String>;
}

impl StructuredValue for serde_json::Value {
    fn project(&self, key: &str) -> Option<Self> {
        if let Ok(i) = key.parse::<usize>() {
            self.get(i).cloned()
        } else {
            self.get(key).cloned()
        }
    }

    fn to_scalar_text(&self) -> Option<String> {
        match self {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

impl StructuredValue for serde_yaml::Value {
    fn project(&self, key: &str) -> Option<Self> {
        if let Ok(i) = key.parse::<usize>() {
            self.as_sequence().and_then(|seq| seq.get(i)).cloned()
        } else {
            self.get(key).cloned()
        }
    }

    fn to_scalar_text(&self) -> Option<String> {
        match self {
            serde_yaml::Value::String(s) => Some(s.clone()),
            serde_yaml::Value::Number(n) => Some(n.to_string()),
            serde_yaml::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

fn load_json_into_collection(c: &Rc<IdCollection>, ctx: &dyn TreeContext, path: &str) -> Result<()> {
    let text = std::fs::read_to_string(path)?;
    let parsed: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| ConfigError::LoadData(e.to_string(), path.to_string()))?;
    match parsed {
        serde_json::Value::Array(items) => {
            for item in items {
                if let Some(s) = item.to_scalar_text() {
                    c.push_value(ctx, cargo_scalar(c, &s))?;
                }
            }
        }
        serde_json::Value::Object(map) => {
            for (key, item) in map {
                if let Some(s) = item.to_scalar_text() {
                    let idx = c.key_for(&key);
                    let cargo = c.ensure_entry(ctx, idx)?;
                    if let Cargo::Leaf(v) = cargo {
                        v.store(ctx, cargo_scalar(c, &s), CheckPolicy::Yes, true)?;
                    }
                }
            }
        }
        _ => return Err(ConfigError::LoadData("expected a JSON array or object".to_string(), path.to_string())),
    }
    Ok(())
}
