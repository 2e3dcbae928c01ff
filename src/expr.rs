//! The tiny formula language behind `compute`, `migrate_from`,
//! `computed_refer_to` and a warp rule's `when` condition. A formula
//! names variables as `$name`; each name is bound, via the owning
//! parameter's `variables` map, to a dotted path resolved through
//! [`crate::context::TreeContext`].
use std::collections::BTreeMap;

use nom::branch::alt;
use nom::bytes::complete::{escaped_transform, is_not, tag};
use nom::character::complete::{alphanumeric1, char, digit1, multispace0, one_of};
use nom::combinator::{map, opt, recognize, value};
use nom::multi::many0;
use nom::number::complete::double;
use nom::sequence::{delimited, pair, preceded};
use nom::IResult;

use crate::context::TreeContext;
use crate::value::Scalar;

fn resolve_vars(variables: &BTreeMap<String, String>, ctx: &dyn TreeContext) -> BTreeMap<String, Scalar> {
    variables
        .iter()
        .map(|(name, path)| {
            let value = ctx.resolve_scalar(path).unwrap_or_else(|| Scalar::Str(String::new()));
            (name.clone(), value)
        })
        .collect()
}

/// Plain `$name` substitution into a template string; used by
/// `compute`/`migrate_from` without `use_eval`, and by
/// `computed_refer_to`.
fn substitute(formula: &str, vars: &BTreeMap<String, Scalar>) -> String {
    let mut out = String::with_capacity(formula.len());
    let mut chars = formula.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '$' {
            let start = i + 1;
            let mut end = start;
            for (j, d) in formula[start..].char_indices() {
                if d.is_alphanumeric() || d == '_' {
                    end = start + j + d.len_utf8();
                } else {
                    break;
                }
            }
            if end > start {
                let name = &formula[start..end];
                if let Some(v) = vars.get(name) {
                    out.push_str(&v.as_str());
                }
                for _ in 0..formula[start..end].chars().count() {
                    chars.next();
                }
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Evaluates a `compute`/`migrate_from` formula against its bound
/// variables. With `use_eval`, the substituted text is parsed as a
/// small arithmetic expression; otherwise the substitution itself is
/// the result.
pub fn evaluate(
    formula: &str,
    variables: &BTreeMap<String, String>,
    use_eval: bool,
    ctx: &dyn TreeContext,
) -> Option<Scalar> {
    let vars = resolve_vars(variables, ctx);
    if use_eval {
        let text = substitute(formula, &vars);
        eval_arith(&text).map(|n| {
            if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
                Scalar::Integer(n as i64)
            } else {
                Scalar::Number(n)
            }
        })
    } else {
        Some(Scalar::Str(substitute(formula, &vars)))
    }
}

/// Substitution-only form used by `refer_to`'s computed path variant.
pub fn evaluate_text(formula: &str, variables: &BTreeMap<String, String>, ctx: &dyn TreeContext) -> Option<String> {
    let vars = resolve_vars(variables, ctx);
    Some(substitute(formula, &vars))
}

/// Evaluates a warp rule's `when` condition. An empty condition is the
/// table's fallback rule and always matches.
pub fn evaluate_bool(formula: &str, variables: &BTreeMap<String, String>, ctx: &dyn TreeContext) -> bool {
    if formula.trim().is_empty() {
        return true;
    }
    let vars = resolve_vars(variables, ctx);
    eval_bool_expr(formula, &vars).unwrap_or(false)
}

// ---- arithmetic sub-language (+ - * / parens, $vars, numbers) -------

fn eval_arith(input: &str) -> Option<f64> {
    let stripped = input.replace(' ', "");
    arith_expr(&stripped).ok().and_then(|(rem, v)| rem.is_empty().then_some(v))
}

fn arith_expr(input: &str) -> IResult<&str, f64> {
    let (input, init) = arith_term(input)?;
    let (input, rest) = many0(pair(one_of("+-"), arith_term))(input)?;
    let value = rest.into_iter().fold(init, |acc, (op, v)| if op == '+' { acc + v } else { acc - v });
    Ok((input, value))
}

fn arith_term(input: &str) -> IResult<&str, f64> {
    let (input, init) = arith_factor(input)?;
    let (input, rest) = many0(pair(one_of("*/"), arith_factor))(input)?;
    let value = rest.into_iter().fold(init, |acc, (op, v)| if op == '*' { acc * v } else { acc / v });
    Ok((input, value))
}

fn arith_factor(input: &str) -> IResult<&str, f64> {
    alt((
        delimited(char('('), arith_expr, char(')')),
        double,
    ))(input)
}

// ---- boolean sub-language (==, !=, <, <=, >, >=, &&, ||, !) --------

#[derive(Debug, Clone)]
enum Atom {
    Number(f64),
    Text(String),
}

fn strip_ws(input: &str) -> &str {
    input.trim_start()
}

fn parse_atom(input: &str) -> IResult<&str, Atom> {
    let input = strip_ws(input);
    alt((
        map(quoted_string, Atom::Text),
        map(double, Atom::Number),
    ))(input)
}

fn quoted_string(input: &str) -> IResult<&str, String> {
    delimited(
        char('"'),
        map(opt(escaped_transform(is_not("\"\\"), '\\', one_of("\"\\n"))), |s: Option<String>| {
            s.unwrap_or_default()
        }),
        char('"'),
    )(input)
}

fn cmp_op(input: &str) -> IResult<&str, &str> {
    alt((tag("=="), tag("!="), tag("<="), tag(">="), tag("<"), tag(">")))(strip_ws(input))
}

fn atom_truthy(a: &Atom) -> bool {
    match a {
        Atom::Number(n) => *n != 0.0,
        Atom::Text(s) => !s.is_empty() && s != "false" && s != "0",
    }
}

fn atom_eq(a: &Atom, b: &Atom) -> bool {
    match (a, b) {
        (Atom::Number(x), Atom::Number(y)) => x == y,
        (Atom::Text(x), Atom::Text(y)) => x == y,
        _ => a_as_text(a) == a_as_text(b),
    }
}

fn a_as_text(a: &Atom) -> String {
    match a {
        Atom::Number(n) => n.to_string(),
        Atom::Text(s) => s.clone(),
    }
}

fn atom_cmp(op: &str, a: &Atom, b: &Atom) -> bool {
    match op {
        "==" => atom_eq(a, b),
        "!=" => !atom_eq(a, b),
        _ => match (a, b) {
            (Atom::Number(x), Atom::Number(y)) => match op {
                "<" => x < y,
                "<=" => x <= y,
                ">" => x > y,
                ">=" => x >= y,
                _ => false,
            },
            _ => match op {
                "<" => a_as_text(a) < a_as_text(b),
                "<=" => a_as_text(a) <= a_as_text(b),
                ">" => a_as_text(a) > a_as_text(b),
                ">=" => a_as_text(a) >= a_as_text(b),
                _ => false,
            },
        },
    }
}

fn ident(input: &str) -> IResult<&str, &str> {
    recognize(pair(alt((alphanumeric1, tag("_"))), many0(alt((alphanumeric1, tag("_"))))))(input)
}

fn resolve_term(input: &str, vars: &BTreeMap<String, Scalar>) -> IResult<&str, Atom> {
    let stripped = strip_ws(input);
    if let Ok((rest, _)) = char::<_, nom::error::Error<&str>>('$')(stripped) {
        let (rest, name) = ident(rest)?;
        let atom = match vars.get(name) {
            Some(Scalar::Boolean(b)) => Atom::Text(b.to_string()),
            Some(Scalar::Integer(i)) => Atom::Number(*i as f64),
            Some(Scalar::Number(n)) => Atom::Number(*n),
            Some(Scalar::Str(s)) => Atom::Text(s.clone()),
            None => Atom::Text(String::new()),
        };
        return Ok((rest, atom));
    }
    parse_atom(stripped)
}

fn eval_comparison(input: &str, vars: &BTreeMap<String, Scalar>) -> IResult<&str, bool> {
    let (input, lhs) = resolve_term(input, vars)?;
    let input = strip_ws(input);
    if let Ok((rest, op)) = cmp_op(input) {
        let (rest, rhs) = resolve_term(rest, vars)?;
        return Ok((rest, atom_cmp(op, &lhs, &rhs)));
    }
    Ok((input, atom_truthy(&lhs)))
}

fn eval_unary(input: &str, vars: &BTreeMap<String, Scalar>) -> IResult<&str, bool> {
    let input = strip_ws(input);
    if let Ok((rest, _)) = char::<_, nom::error::Error<&str>>('!')(input) {
        let (rest, inner) = eval_unary(rest, vars)?;
        return Ok((rest, !inner));
    }
    if let Ok((rest, _)) = char::<_, nom::error::Error<&str>>('(')(input) {
        let (rest, inner) = eval_or(rest, vars)?;
        let (rest, _) = preceded(multispace0, char(')'))(rest)?;
        return Ok((rest, inner));
    }
    eval_comparison(input, vars)
}

fn eval_and(input: &str, vars: &BTreeMap<String, Scalar>) -> IResult<&str, bool> {
    let (mut input, mut acc) = eval_unary(input, vars)?;
    loop {
        let stripped = strip_ws(input);
        if let Ok((rest, _)) = tag::<_, _, nom::error::Error<&str>>("&&")(stripped) {
            let (rest, rhs) = eval_unary(rest, vars)?;
            acc = acc && rhs;
            input = rest;
        } else {
            break;
        }
    }
    Ok((input, acc))
}

fn eval_or(input: &str, vars: &BTreeMap<String, Scalar>) -> IResult<&str, bool> {
    let (mut input, mut acc) = eval_and(input, vars)?;
    loop {
        let stripped = strip_ws(input);
        if let Ok((rest, _)) = tag::<_, _, nom::error::Error<&str>>("||")(stripped) {
            let (rest, rhs) = eval_and(rest, vars)?;
            acc = acc || rhs;
            input = rest;
        } else {
            break;
        }
    }
    Ok((input, acc))
}

fn eval_bool_expr(input: &str, vars: &BTreeMap<String, Scalar>) -> Option<bool> {
    eval_or(input, vars).ok().map(|(_, v)| v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_vars(pairs: &[(&str, Scalar)]) -> BTreeMap<String, Scalar> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn substitution_replaces_known_variables() {
        let vars = ctx_vars(&[("name", Scalar::Str("alice".into()))]);
        assert_eq!(substitute("hello $name!", &vars), "hello alice!");
    }

    #[test]
    fn arithmetic_evaluates_operator_precedence() {
        assert_eq!(eval_arith("2+3*4"), Some(14.0));
        assert_eq!(eval_arith("(2+3)*4"), Some(20.0));
    }

    #[test]
    fn boolean_expression_handles_comparisons_and_logic() {
        let vars = ctx_vars(&[("os", Scalar::Str("linux".into())), ("count", Scalar::Integer(3))]);
        assert!(eval_bool_expr("$os == \"linux\" && $count > 1", &vars).unwrap());
        assert!(!eval_bool_expr("$os == \"windows\"", &vars).unwrap());
    }
}
