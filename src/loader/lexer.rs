//! Character-level helpers shared by [`super::command`]: top-level
//! whitespace splitting that keeps quoted runs intact, and the
//! quoted/bareword reader used for names, ids and values within one
//! split-out command token.

/// Splits a program into its whitespace-separated commands, without
/// splitting inside a double-quoted run (so `"foo bar"` survives as
/// one token even though it contains a space).
pub fn tokenize(program: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = program.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '\\' if in_quotes => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Unescapes a double-quoted run's interior: `\"` -> `"`, `\\` -> `\`,
/// a literal two-character `\n` -> newline.
fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some('n') => out.push('\n'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Reads a name or id: a quoted string (unescaped, quotes consumed) or
/// a bareword run up to one of the structural delimiter characters.
pub fn read_ident(input: &str) -> (String, &str) {
    if let Some(rest) = input.strip_prefix('"') {
        if let Some(end) = find_closing_quote(rest) {
            return (unescape(&rest[..end]), &rest[end + 1..]);
        }
        return (unescape(rest), "");
    }
    let end = input
        .find(|c: char| matches!(c, ':' | '=' | '.' | '<' | '>' | '~' | '#') || c.is_whitespace())
        .unwrap_or(input.len());
    (input[..end].to_string(), &input[end..])
}

/// Reads a value: same quoting rules as [`read_ident`], but a bareword
/// value runs until an (unquoted) `#` annotation marker or end of
/// input rather than stopping at `.`/`:` etc., since values may
/// legitimately contain them.
pub fn read_value(input: &str) -> (String, &str) {
    if let Some(rest) = input.strip_prefix('"') {
        if let Some(end) = find_closing_quote(rest) {
            return (unescape(&rest[..end]), &rest[end + 1..]);
        }
        return (unescape(rest), "");
    }
    let end = input.find('#').unwrap_or(input.len());
    (input[..end].to_string(), &input[end..])
}

/// Reads a parenthesized, comma-separated argument list: `(a,b,"c d")`.
/// Returns `None` if `input` doesn't start with `(`.
pub fn read_paren_args(input: &str) -> Option<(Vec<String>, &str)> {
    let rest = input.strip_prefix('(')?;
    let mut depth = 1usize;
    let mut in_quotes = false;
    let mut end = None;
    let mut chars = rest.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => in_quotes = !in_quotes,
            '\\' if in_quotes => {
                chars.next();
            }
            '(' if !in_quotes => depth += 1,
            ')' if !in_quotes => {
                depth -= 1;
                if depth == 0 {
                    end = Some(i);
                    break;
                }
            }
            _ => {}
        }
    }
    let end = end?;
    let body = &rest[..end];
    let items = split_args(body);
    Some((items, &rest[end + 1..]))
}

fn split_args(body: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                items.push(unescape(current.trim()));
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    if !current.is_empty() || !items.is_empty() {
        items.push(unescape(current.trim()));
    }
    items.into_iter().map(|s| s.trim_matches('"').to_string()).collect()
}

fn find_closing_quote(s: &str) -> Option<usize> {
    let mut chars = s.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '"' => return Some(i),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_keeps_quoted_spaces_together() {
        let toks = tokenize(r#"hash_of_nodes:"foo node" foo="in foo node""#);
        assert_eq!(toks, vec![r#"hash_of_nodes:"foo node""#, r#"foo="in foo node""#]);
    }

    #[test]
    fn read_ident_stops_at_delimiters() {
        let (name, rest) = read_ident("plain_hash:foo=boo");
        assert_eq!(name, "plain_hash");
        assert_eq!(rest, ":foo=boo");
    }

    #[test]
    fn read_paren_args_splits_on_commas() {
        let (args, rest) = read_paren_args("(a,b,\"c d\")tail").unwrap();
        assert_eq!(args, vec!["a", "b", "c d"]);
        assert_eq!(rest, "tail");
    }
}
