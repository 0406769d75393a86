//! Aggregate functions for GROUP BY (`COUNT`, `SUM`, `AVG`, `MIN`, `MAX`,
//! `GROUP_CONCAT`, `SAMPLE`), evaluated once per group over that group's
//! row slice rather than row-by-row like the scalar built-ins.

use super::algebra::{CallExpr, Expr, Prologue};
use super::binding::{Row, VariableSet};
use super::expression::{eval, EvalContext};
use super::value::Value;
use super::QueryError;

pub fn evaluate(
    call: &CallExpr,
    arg_expr: Option<&Expr>,
    rows: &[&Row],
    source: &str,
    prologue: &Prologue,
    vars: &VariableSet,
    store: Option<&crate::store::QuadStore>,
) -> Result<Value, QueryError> {
    let name = call.name.text(source).to_ascii_uppercase();
    let mut values = Vec::with_capacity(rows.len());
    if let Some(arg) = arg_expr {
        for row in rows {
            let ctx = EvalContext {
                source,
                prologue,
                vars,
                row,
                aggregates: None,
                store,
            };
            values.push(eval(arg, &ctx)?);
        }
    }
    if call.distinct {
        let mut seen: Vec<Value> = Vec::new();
        values.retain(|v| {
            if seen.contains(v) {
                false
            } else {
                seen.push(v.clone());
                true
            }
        });
    }

    Ok(match name.as_str() {
        "COUNT" => {
            if call.wildcard {
                Value::Integer(rows.len() as i64)
            } else {
                Value::Integer(values.iter().filter(|v| v.is_bound()).count() as i64)
            }
        }
        "SUM" => {
            let total: f64 = values.iter().filter_map(Value::as_f64).sum();
            if values.iter().all(|v| matches!(v, Value::Integer(_))) {
                Value::Integer(total as i64)
            } else {
                Value::Double(total)
            }
        }
        "AVG" => {
            let nums: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
            if nums.is_empty() {
                Value::Integer(0)
            } else {
                Value::Double(nums.iter().sum::<f64>() / nums.len() as f64)
            }
        }
        "MIN" => values
            .into_iter()
            .filter(|v| v.is_bound())
            .min_by(|a, b| compare_for_order(a, b))
            .unwrap_or(Value::Unbound),
        "MAX" => values
            .into_iter()
            .filter(|v| v.is_bound())
            .max_by(|a, b| compare_for_order(a, b))
            .unwrap_or(Value::Unbound),
        "SAMPLE" => values
            .into_iter()
            .find(|v| v.is_bound())
            .unwrap_or(Value::Unbound),
        "GROUP_CONCAT" => {
            let joined = values
                .iter()
                .filter(|v| v.is_bound())
                .map(Value::lexical)
                .collect::<Vec<_>>()
                .join(" ");
            Value::string(joined)
        }
        other => {
            return Err(QueryError {
                offset: call.name.start as usize,
                message: format!("unknown aggregate {other}"),
            })
        }
    })
}

fn compare_for_order(a: &Value, b: &Value) -> std::cmp::Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
        _ => a.lexical().cmp(&b.lexical()),
    }
}
