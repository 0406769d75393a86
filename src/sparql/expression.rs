//! Filter/expression evaluator: SPARQL effective-boolean-value semantics
//! plus the built-in function library. Type mismatches never escalate to
//! a [`super::QueryError`] — they collapse to `Value::Unbound`, which is
//! falsy everywhere a caller checks truthiness, so `TypeMismatch` never
//! needs to be its own error path.

use std::collections::HashMap;
use std::fmt::Write as _;

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

use super::algebra::{ArithOp, CallExpr, CompareOp, Expr, ExprKind, Prologue, TermKind};
use super::binding::{Row, VariableSet};
use super::value::{format_double, Value};
use super::QueryError;

pub struct EvalContext<'a> {
    pub source: &'a str,
    pub prologue: &'a Prologue,
    pub vars: &'a VariableSet,
    pub row: &'a Row,
    /// Pre-computed aggregate results keyed by the exact source text of
    /// the aggregate call expression, populated by the GROUP BY stage
    /// before projection/HAVING/ORDER BY evaluate expressions that
    /// reference an aggregate.
    pub aggregates: Option<&'a HashMap<String, Value>>,
    /// Present whenever this context is reachable from a running query
    /// (as opposed to a unit test), so `EXISTS`/`NOT EXISTS` can run the
    /// inner pattern against the store.
    pub store: Option<&'a crate::store::QuadStore>,
}

pub fn eval(expr: &Expr, ctx: &EvalContext) -> Result<Value, QueryError> {
    match &expr.kind {
        ExprKind::Term(term) => Ok(eval_term(term, ctx)),
        ExprKind::And(a, b) => Ok(Value::Boolean(eval(a, ctx)?.truthy() && eval(b, ctx)?.truthy())),
        ExprKind::Or(a, b) => Ok(Value::Boolean(eval(a, ctx)?.truthy() || eval(b, ctx)?.truthy())),
        ExprKind::Not(a) => Ok(Value::Boolean(!eval(a, ctx)?.truthy())),
        ExprKind::Negate(a) => Ok(match eval(a, ctx)?.as_f64() {
            Some(n) => Value::Double(-n),
            None => Value::Unbound,
        }),
        ExprKind::Compare(op, a, b) => Ok(compare(*op, &eval(a, ctx)?, &eval(b, ctx)?)),
        ExprKind::Arith(op, a, b) => Ok(arith(*op, &eval(a, ctx)?, &eval(b, ctx)?)),
        ExprKind::In(left, list, negated) => {
            let left_val = eval(left, ctx)?;
            let mut found = false;
            for item in list {
                if eval(item, ctx)? == left_val {
                    found = true;
                    break;
                }
            }
            Ok(Value::Boolean(found != *negated))
        }
        ExprKind::Exists(pattern, negated) => {
            let found = match ctx.store {
                Some(store) => super::iterators::pattern_has_any_solution(store, pattern, ctx)?,
                None => false,
            };
            Ok(Value::Boolean(found != *negated))
        }
        ExprKind::Call(call) => eval_call(call, expr, ctx),
    }
}

fn eval_term(term: &super::algebra::TermPattern, ctx: &EvalContext) -> Value {
    if term.kind == TermKind::Variable {
        let name = term.variable_name(ctx.source);
        return match ctx.vars.get(name) {
            Some(idx) => ctx.row.get(idx).clone(),
            None => Value::Unbound,
        };
    }
    Value::from(term.resolve(ctx.source, ctx.prologue))
}

fn numeric(v: &Value) -> Option<f64> {
    if v.is_numeric() || matches!(v, Value::Integer(_) | Value::Double(_)) {
        v.as_f64()
    } else {
        None
    }
}

fn compare(op: CompareOp, a: &Value, b: &Value) -> Value {
    match op {
        CompareOp::Eq => Value::Boolean(a == b),
        CompareOp::Ne => Value::Boolean(a != b),
        _ => {
            let ordering = if let (Some(x), Some(y)) = (numeric(a), numeric(b)) {
                x.partial_cmp(&y)
            } else if let (
                Value::String { value: x, .. },
                Value::String { value: y, .. },
            ) = (a, b)
            {
                Some(x.as_str().cmp(y.as_str()))
            } else {
                None
            };
            match ordering {
                Some(std::cmp::Ordering::Less) => {
                    Value::Boolean(matches!(op, CompareOp::Lt | CompareOp::Le))
                }
                Some(std::cmp::Ordering::Greater) => {
                    Value::Boolean(matches!(op, CompareOp::Gt | CompareOp::Ge))
                }
                Some(std::cmp::Ordering::Equal) => {
                    Value::Boolean(matches!(op, CompareOp::Le | CompareOp::Ge))
                }
                None => Value::Unbound,
            }
        }
    }
}

fn arith(op: ArithOp, a: &Value, b: &Value) -> Value {
    let (Some(x), Some(y)) = (numeric(a), numeric(b)) else {
        return Value::Unbound;
    };
    let both_integer = matches!(a, Value::Integer(_)) && matches!(b, Value::Integer(_));
    match op {
        ArithOp::Add if both_integer => Value::Integer(a_as_i64(a) + a_as_i64(b)),
        ArithOp::Add => Value::Double(x + y),
        ArithOp::Sub if both_integer => Value::Integer(a_as_i64(a) - a_as_i64(b)),
        ArithOp::Sub => Value::Double(x - y),
        ArithOp::Mul if both_integer => Value::Integer(a_as_i64(a) * a_as_i64(b)),
        ArithOp::Mul => Value::Double(x * y),
        ArithOp::Div => {
            if y == 0.0 {
                Value::Unbound
            } else {
                Value::Double(x / y)
            }
        }
    }
}

fn a_as_i64(v: &Value) -> i64 {
    match v {
        Value::Integer(i) => *i,
        _ => 0,
    }
}

fn eval_call(call: &CallExpr, expr: &Expr, ctx: &EvalContext) -> Result<Value, QueryError> {
    let name = call.name.text(ctx.source);
    if is_aggregate_name(name) {
        let key = expr.span.text(ctx.source);
        return Ok(ctx
            .aggregates
            .and_then(|m| m.get(key))
            .cloned()
            .unwrap_or(Value::Unbound));
    }
    let mut args = Vec::with_capacity(call.args.len());
    for a in &call.args {
        args.push(eval(a, ctx)?);
    }
    call_builtin(name, &args, call, ctx, expr)
}

pub(crate) fn is_aggregate_name(name: &str) -> bool {
    matches!(
        name.to_ascii_uppercase().as_str(),
        "COUNT" | "SUM" | "AVG" | "MIN" | "MAX" | "GROUP_CONCAT" | "SAMPLE"
    )
}

fn call_builtin(
    name: &str,
    args: &[Value],
    call: &CallExpr,
    ctx: &EvalContext,
    expr: &Expr,
) -> Result<Value, QueryError> {
    let upper = name.to_ascii_uppercase();
    let err = |msg: &str| QueryError {
        offset: expr.span.start as usize,
        message: msg.to_owned(),
    };
    Ok(match upper.as_str() {
        "BOUND" => {
            let v = call
                .args
                .first()
                .map(|a| eval(a, ctx))
                .transpose()?
                .unwrap_or(Value::Unbound);
            Value::Boolean(v.is_bound())
        }
        "IF" => {
            if args.len() != 3 {
                return Err(err("IF expects 3 arguments"));
            }
            if args[0].truthy() {
                args[1].clone()
            } else {
                args[2].clone()
            }
        }
        "COALESCE" => args
            .iter()
            .find(|v| v.is_bound())
            .cloned()
            .unwrap_or(Value::Unbound),
        "ISIRI" | "ISURI" => Value::Boolean(args.first().is_some_and(Value::is_iri)),
        "ISBLANK" => Value::Boolean(args.first().is_some_and(Value::is_blank)),
        "ISLITERAL" => Value::Boolean(args.first().is_some_and(Value::is_literal)),
        "ISNUMERIC" => Value::Boolean(args.first().is_some_and(Value::is_numeric)),
        "STR" => Value::string(args.first().map(Value::lexical).unwrap_or_default()),
        "STRLEN" => {
            Value::Integer(args.first().map(|v| v.lexical().chars().count() as i64).unwrap_or(0))
        }
        "UCASE" => Value::string(args.first().map(|v| v.lexical().to_uppercase()).unwrap_or_default()),
        "LCASE" => Value::string(args.first().map(|v| v.lexical().to_lowercase()).unwrap_or_default()),
        "CONTAINS" => Value::Boolean(two_strings(args).is_some_and(|(a, b)| a.contains(&b))),
        "STRSTARTS" => Value::Boolean(two_strings(args).is_some_and(|(a, b)| a.starts_with(&b))),
        "STRENDS" => Value::Boolean(two_strings(args).is_some_and(|(a, b)| a.ends_with(&b))),
        "STRBEFORE" => match two_strings(args) {
            Some((a, b)) => match a.find(&b) {
                Some(idx) => Value::string(a[..idx].to_owned()),
                None => Value::string(""),
            },
            None => Value::Unbound,
        },
        "STRAFTER" => match two_strings(args) {
            Some((a, b)) => match a.find(&b) {
                Some(idx) => Value::string(a[idx + b.len()..].to_owned()),
                None => Value::string(""),
            },
            None => Value::Unbound,
        },
        "CONCAT" => Value::string(args.iter().map(Value::lexical).collect::<String>()),
        "SUBSTR" => {
            let s = args.first().map(Value::lexical).unwrap_or_default();
            let start = args.get(1).and_then(Value::as_i64).unwrap_or(1).max(1) as usize - 1;
            let chars: Vec<char> = s.chars().collect();
            let len = args
                .get(2)
                .and_then(Value::as_i64)
                .map(|n| n.max(0) as usize)
                .unwrap_or(chars.len());
            let end = (start + len).min(chars.len());
            if start >= chars.len() {
                Value::string("")
            } else {
                Value::string(chars[start..end].iter().collect::<String>())
            }
        }
        "REPLACE" => {
            let subject = args.first().map(Value::lexical).unwrap_or_default();
            let pattern = args.get(1).map(Value::lexical).unwrap_or_default();
            let replacement = args.get(2).map(Value::lexical).unwrap_or_default();
            match regex::Regex::new(&pattern) {
                Ok(re) => Value::string(re.replace_all(&subject, replacement.as_str()).into_owned()),
                Err(_) => return Err(err("invalid REPLACE pattern")),
            }
        }
        "REGEX" => {
            let subject = args.first().map(Value::lexical).unwrap_or_default();
            let pattern = args.get(1).map(Value::lexical).unwrap_or_default();
            let flags = args.get(2).map(Value::lexical).unwrap_or_default();
            let pattern = if flags.contains('i') {
                format!("(?i){pattern}")
            } else {
                pattern
            };
            match regex::Regex::new(&pattern) {
                Ok(re) => Value::Boolean(re.is_match(&subject)),
                Err(_) => return Err(err("invalid REGEX pattern")),
            }
        }
        "ENCODE_FOR_URI" => Value::string(percent_encode(&args.first().map(Value::lexical).unwrap_or_default())),
        "ABS" => match args.first().and_then(Value::as_f64) {
            Some(n) => Value::Double(n.abs()),
            None => Value::Unbound,
        },
        "ROUND" => match args.first().and_then(Value::as_f64) {
            Some(n) => Value::Integer(n.round() as i64),
            None => Value::Unbound,
        },
        "CEIL" => match args.first().and_then(Value::as_f64) {
            Some(n) => Value::Integer(n.ceil() as i64),
            None => Value::Unbound,
        },
        "FLOOR" => match args.first().and_then(Value::as_f64) {
            Some(n) => Value::Integer(n.floor() as i64),
            None => Value::Unbound,
        },
        "RAND" => Value::Double(rand::random::<f64>()),
        "MD5" => Value::string(hex::encode(Md5::digest(
            args.first().map(Value::lexical).unwrap_or_default().as_bytes(),
        ))),
        "SHA1" => Value::string(hex::encode(Sha1::digest(
            args.first().map(Value::lexical).unwrap_or_default().as_bytes(),
        ))),
        "SHA256" => Value::string(hex::encode(Sha256::digest(
            args.first().map(Value::lexical).unwrap_or_default().as_bytes(),
        ))),
        "SHA512" => Value::string(hex::encode(Sha512::digest(
            args.first().map(Value::lexical).unwrap_or_default().as_bytes(),
        ))),
        "UUID" => Value::Iri(format!("urn:uuid:{}", random_uuid())),
        "STRUUID" => Value::string(random_uuid()),
        "BNODE" => match args.first() {
            Some(v) => Value::BlankNode(v.lexical()),
            None => Value::BlankNode(random_uuid()),
        },
        "NOW" => {
            let secs = crate::storage::record::now_tick() / crate::storage::record::TICKS_PER_SECOND;
            Value::typed_string(format_datetime(secs), "http://www.w3.org/2001/XMLSchema#dateTime")
        }
        "YEAR" | "MONTH" | "DAY" | "HOURS" | "MINUTES" | "SECONDS" => {
            let secs = args
                .first()
                .and_then(|v| parse_datetime(&v.lexical()))
                .unwrap_or(0);
            let (y, mo, d, h, mi, s) = civil_from_unix(secs);
            Value::Integer(match upper.as_str() {
                "YEAR" => y,
                "MONTH" => mo as i64,
                "DAY" => d as i64,
                "HOURS" => h as i64,
                "MINUTES" => mi as i64,
                _ => s as i64,
            })
        }
        "TIMEZONE" | "TZ" => Value::string("PT0S"),
        "LANG" => Value::string(match args.first() {
            Some(Value::String { lang: Some(l), .. }) => l.clone(),
            _ => String::new(),
        }),
        "LANGMATCHES" => {
            let lang = args.first().map(Value::lexical).unwrap_or_default();
            let range = args.get(1).map(Value::lexical).unwrap_or_default();
            Value::Boolean(
                range == "*" || lang.eq_ignore_ascii_case(&range) || lang
                    .to_ascii_lowercase()
                    .starts_with(&format!("{}-", range.to_ascii_lowercase())),
            )
        }
        "STRLANG" => Value::lang_string(
            args.first().map(Value::lexical).unwrap_or_default(),
            args.get(1).map(Value::lexical).unwrap_or_default(),
        ),
        "STRDT" => Value::typed_string(
            args.first().map(Value::lexical).unwrap_or_default(),
            args.get(1).map(Value::lexical).unwrap_or_default(),
        ),
        "IRI" | "URI" => Value::Iri(args.first().map(Value::lexical).unwrap_or_default()),
        "SAMETERM" => Value::Boolean(args.len() == 2 && args[0] == args[1]),
        "DATATYPE" => match args.first() {
            Some(Value::Integer(_)) => Value::Iri("http://www.w3.org/2001/XMLSchema#integer".into()),
            Some(Value::Double(_)) => Value::Iri("http://www.w3.org/2001/XMLSchema#double".into()),
            Some(Value::Boolean(_)) => Value::Iri("http://www.w3.org/2001/XMLSchema#boolean".into()),
            Some(Value::String { datatype: Some(dt), .. }) => Value::Iri(dt.clone()),
            Some(Value::String { lang: Some(_), .. }) => {
                Value::Iri("http://www.w3.org/1999/02/22-rdf-syntax-ns#langString".into())
            }
            Some(Value::String { .. }) => Value::Iri("http://www.w3.org/2001/XMLSchema#string".into()),
            _ => Value::Unbound,
        },
        other => return Err(err(&format!("unknown function {other}"))),
    })
}

fn two_strings(args: &[Value]) -> Option<(String, String)> {
    if args.len() < 2 {
        return None;
    }
    Some((args[0].lexical(), args[1].lexical()))
}

fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.push(b as char);
        } else {
            let _ = write!(out, "%{b:02X}");
        }
    }
    out
}

fn random_uuid() -> String {
    let bytes: [u8; 16] = rand::random();
    format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3],
        bytes[4], bytes[5],
        (bytes[6] & 0x0f) | 0x40, bytes[7],
        (bytes[8] & 0x3f) | 0x80, bytes[9],
        bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15],
    )
}

/// Days-from-civil (Howard Hinnant) turned into a Unix-seconds formatter,
/// since this crate carries no datetime dependency of its own.
fn civil_from_unix(secs: i64) -> (i64, u32, u32, u32, u32, u32) {
    let days = secs.div_euclid(86400);
    let tod = secs.rem_euclid(86400);
    let (h, mi, s) = (tod / 3600, (tod % 3600) / 60, tod % 60);
    let z = days + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let y = if m <= 2 { y + 1 } else { y };
    (y, m, d, h as u32, mi as u32, s as u32)
}

fn format_datetime(secs: i64) -> String {
    let (y, mo, d, h, mi, s) = civil_from_unix(secs);
    format!("{y:04}-{mo:02}-{d:02}T{h:02}:{mi:02}:{s:02}Z")
}

fn parse_datetime(text: &str) -> Option<i64> {
    // Minimal "YYYY-MM-DDTHH:MM:SSZ" reader good enough for round-tripping
    // values produced by `format_datetime` and `NOW()`.
    let t = text.find('T')?;
    let (date, time) = (&text[..t], &text[t + 1..]);
    let mut date_parts = date.split('-');
    let y: i64 = date_parts.next()?.parse().ok()?;
    let mo: i64 = date_parts.next()?.parse().ok()?;
    let d: i64 = date_parts.next()?.parse().ok()?;
    let time = time.trim_end_matches('Z');
    let mut time_parts = time.split(':');
    let h: i64 = time_parts.next()?.parse().ok()?;
    let mi: i64 = time_parts.next()?.parse().ok()?;
    let s: i64 = time_parts.next()?.parse().ok()?;
    let days_from_civil = {
        let y = if mo <= 2 { y - 1 } else { y };
        let era = if y >= 0 { y } else { y - 399 } / 400;
        let yoe = (y - era * 400) as u64;
        let mp = if mo > 2 { mo - 3 } else { mo + 9 } as u64;
        let doy = (153 * mp + 2) / 5 + d as u64 - 1;
        let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
        era * 146097 + doe as i64 - 719468
    };
    Some(days_from_civil * 86400 + h * 3600 + mi * 60 + s)
}

pub fn format_value_for_display(v: &Value) -> String {
    match v {
        Value::Double(d) => format_double(*d),
        other => other.lexical(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparql::algebra::Span;
    use crate::sparql::binding::{Row, VariableSet};

    fn ctx<'a>(source: &'a str, prologue: &'a Prologue, vars: &'a VariableSet, row: &'a Row) -> EvalContext<'a> {
        EvalContext {
            source,
            prologue,
            vars,
            row,
            aggregates: None,
            store: None,
        }
    }

    #[test]
    fn arithmetic_on_integers_stays_integer() {
        let prologue = Prologue::default();
        let vars = VariableSet::new();
        let row = Row::empty(0);
        let c = ctx("", &prologue, &vars, &row);
        let source = "2 + 3";
        let expr = super::super::parser::parse_query(&format!("SELECT (({source}) AS ?x) WHERE {{}}"))
            .unwrap();
        if let super::super::algebra::Query::Select(sel) = expr {
            if let super::super::algebra::Projection::Items(items) = sel.projection {
                if let super::super::algebra::ProjectionItem::Expr { expr, .. } = &items[0] {
                    let result = eval(expr, &c).unwrap();
                    assert_eq!(result, Value::Integer(5));
                    return;
                }
            }
        }
        panic!("unexpected parse shape");
    }

    #[test]
    fn type_mismatch_compare_is_absorbed_as_unbound_not_error() {
        let prologue = Prologue::default();
        let vars = VariableSet::new();
        let row = Row::empty(0);
        let c = ctx("", &prologue, &vars, &row);
        let result = compare(CompareOp::Lt, &Value::Iri("http://x".into()), &Value::Integer(1));
        assert_eq!(result, Value::Unbound);
        let _ = c;
    }

    #[test]
    fn percent_encoding_escapes_reserved_bytes() {
        assert_eq!(percent_encode("a b"), "a%20b");
    }
}
