//! The command AST and its parser: one whitespace-split token (see
//! [`super::lexer::tokenize`]) becomes one [`Command`].
use crate::error::{ConfigError, Result};

use super::lexer::{read_ident, read_paren_args, read_value};

#[derive(Debug, Clone)]
pub enum Command {
    Root,
    Up,
    Search(String),
    Element(ElementCmd),
}

#[derive(Debug, Clone, Default)]
pub struct ElementCmd {
    pub name: String,
    pub action: Option<Action>,
    pub subaction: Option<Subaction>,
    pub annotation: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Action {
    /// `:id` — descend into collection cargo at `id` (autocreate).
    Id(String),
    /// `:.method(args)` — a collection operation: push, unshift,
    /// insert_at, insert_before, insort, sort, copy, clear, rm, json.
    Method { name: String, args: Vec<String> },
    /// `:~pattern` — foreach_match regex loop.
    RegexLoop(String),
    /// `:<` — descend into the first entry, creating it if needed.
    MoveFront,
    /// `:>` — descend into a freshly appended last entry.
    MoveBack,
    /// `:@id` — descend into cargo at `id`, same as [`Action::Id`] but
    /// spelled with an explicit-position marker.
    At(String),
    /// `:-id` — delete the entry at `id`; stays at the current node.
    Delete(String),
    /// `:-=value` — delete every entry whose rendered value equals
    /// `value`.
    DeleteByValue(String),
    /// `:-~pattern` — delete every entry whose key matches `pattern`.
    DeleteMatching(String),
    /// `:=~subst` — apply a substitution to every matching key's
    /// rendered value (rename-in-place is not attempted; this edits
    /// content, mirroring the leaf `=~` subaction but collection-wide).
    SubstituteAll(String),
    /// bare `~` right after the name — clear (store null).
    Clear,
}

#[derive(Debug, Clone)]
pub enum Subaction {
    Store(String),
    Append(String),
    Substitute(String),
    FromFile(Vec<String>),
    FromJson(Vec<String>),
    FromYaml(Vec<String>),
    FromEnv(Vec<String>),
}

fn strip_quote_marks(s: &str) -> String {
    s.trim_matches('"').to_string()
}

pub fn parse_command(token: &str) -> Result<Command> {
    if token == "!" {
        return Ok(Command::Root);
    }
    if token == "-" {
        return Ok(Command::Up);
    }
    if let Some(name) = token.strip_prefix('/') {
        return Ok(Command::Search(name.to_string()));
    }

    let (name, rest) = read_ident(token);
    if name.is_empty() {
        return Err(ConfigError::Load("empty element name".to_string(), token.to_string()));
    }

    let (action, rest) = parse_action(rest, token)?;
    let (subaction, rest) = parse_subaction(rest, token)?;
    let annotation = parse_annotation(rest);

    Ok(Command::Element(ElementCmd {
        name,
        action,
        subaction,
        annotation,
    }))
}

fn parse_action<'a>(rest: &'a str, _token: &str) -> Result<(Option<Action>, &'a str)> {
    if let Some(rest) = rest.strip_prefix('~') {
        return Ok((Some(Action::Clear), rest));
    }
    let rest = match rest.strip_prefix(':') {
        Some(r) => r,
        None => return Ok((None, rest)),
    };

    if let Some(rest) = rest.strip_prefix('.') {
        let (method, rest) = read_ident(rest);
        let (args, rest) = read_paren_args(rest).unwrap_or((Vec::new(), rest));
        return Ok((Some(Action::Method { name: method, args }), rest));
    }
    if let Some(rest) = rest.strip_prefix("=~") {
        let (subst, rest) = read_value(rest);
        return Ok((Some(Action::SubstituteAll(subst)), rest));
    }
    if rest.starts_with('=') {
        // `:=value` carries no extra meaning over a plain `=value`
        // subaction; leave `=` in the stream for `parse_subaction`.
        return Ok((None, rest));
    }
    if let Some(rest) = rest.strip_prefix('~') {
        let (pattern, rest) = read_regex_like(rest);
        return Ok((Some(Action::RegexLoop(pattern)), rest));
    }
    if let Some(rest) = rest.strip_prefix('<') {
        return Ok((Some(Action::MoveFront), rest));
    }
    if let Some(rest) = rest.strip_prefix('>') {
        return Ok((Some(Action::MoveBack), rest));
    }
    if let Some(rest) = rest.strip_prefix('@') {
        let (id, rest) = read_ident(rest);
        return Ok((Some(Action::At(id)), rest));
    }
    if let Some(rest) = rest.strip_prefix("-=") {
        let (value, rest) = read_value(rest);
        return Ok((Some(Action::DeleteByValue(value)), rest));
    }
    if let Some(rest) = rest.strip_prefix("-~") {
        let (pattern, rest) = read_regex_like(rest);
        return Ok((Some(Action::DeleteMatching(pattern)), rest));
    }
    if let Some(rest) = rest.strip_prefix('-') {
        let (id, rest) = read_ident(rest);
        return Ok((Some(Action::Delete(id)), rest));
    }
    // bare ':id'
    let (id, rest) = read_ident(rest);
    Ok((Some(Action::Id(id)), rest))
}

/// A regex argument may be written bare or wrapped in `/…/` (sed
/// style); either way it runs to the next structural delimiter.
fn read_regex_like(input: &str) -> (String, &str) {
    if let Some(rest) = input.strip_prefix('/') {
        if let Some(end) = rest.find('/') {
            return (rest[..end].to_string(), &rest[end + 1..]);
        }
    }
    read_value(input)
}

fn parse_subaction<'a>(rest: &'a str, _token: &str) -> Result<(Option<Subaction>, &'a str)> {
    if let Some(rest) = rest.strip_prefix(".=") {
        let (value, rest) = read_value(rest);
        return Ok((Some(Subaction::Append(value)), rest));
    }
    if let Some(rest) = rest.strip_prefix("=~") {
        let (subst, rest) = read_value(rest);
        return Ok((Some(Subaction::Substitute(subst)), rest));
    }
    if let Some(rest) = rest.strip_prefix("=.file") {
        let (args, rest) = read_paren_args(rest).unwrap_or((Vec::new(), rest));
        return Ok((Some(Subaction::FromFile(args)), rest));
    }
    if let Some(rest) = rest.strip_prefix("=.json") {
        let (args, rest) = read_paren_args(rest).unwrap_or((Vec::new(), rest));
        return Ok((Some(Subaction::FromJson(args)), rest));
    }
    if let Some(rest) = rest.strip_prefix("=.yaml") {
        let (args, rest) = read_paren_args(rest).unwrap_or((Vec::new(), rest));
        return Ok((Some(Subaction::FromYaml(args)), rest));
    }
    if let Some(rest) = rest.strip_prefix("=.env") {
        let (args, rest) = read_paren_args(rest).unwrap_or((Vec::new(), rest));
        return Ok((Some(Subaction::FromEnv(args)), rest));
    }
    if let Some(rest) = rest.strip_prefix('=') {
        let (value, rest) = read_value(rest);
        return Ok((Some(Subaction::Store(value)), rest));
    }
    Ok((None, rest))
}

fn parse_annotation(rest: &str) -> Option<String> {
    let rest = rest.strip_prefix('#')?;
    Some(strip_quote_marks(rest))
}
