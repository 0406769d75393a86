//! Query-level orchestration. [`iterators::eval_pattern`] produces the raw
//! binding stream; this module turns that stream into a [`QueryResults`]
//! by layering grouping/aggregation, `HAVING`, `ORDER BY`, `DISTINCT`, and
//! `LIMIT`/`OFFSET` on top, then shaping the result for `SELECT`, `ASK`,
//! or `CONSTRUCT`.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use crate::model::{Quad, Term};
use crate::store::QuadStore;

use super::algebra::{
    AskQuery, CallExpr, ConstructQuery, Expr, ExprKind, Prologue, Projection, ProjectionItem,
    Query, SelectQuery, SortDirection, TermKind, TermPattern,
};
use super::binding::{Row, VariableSet};
use super::expression::{eval, is_aggregate_name, EvalContext};
use super::iterators::{eval_pattern_with_dataset, term_from_value, ExecCtx};
use super::value::Value;
use super::QueryError;

/// One output row of a `SELECT`/subquery result: positionally aligned
/// with the result's variable list, `None` where that variable is
/// unbound in this solution.
#[derive(Clone, Debug)]
pub struct SolutionRow(pub Vec<Option<Value>>);

impl SolutionRow {
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.0.get(idx).and_then(|v| v.as_ref())
    }
}

#[derive(Clone, Debug)]
pub enum QueryResults {
    Solutions { vars: Vec<String>, rows: Vec<SolutionRow> },
    Boolean(bool),
    Triples(Vec<Quad>),
}

pub fn execute_query(store: &QuadStore, source: &str, query: &Query) -> Result<QueryResults, QueryError> {
    match query {
        Query::Select(select) => {
            let (vars, rows) = run_select(store, source, select)?;
            Ok(QueryResults::Solutions { vars, rows })
        }
        Query::Ask(ask) => execute_ask(store, source, ask),
        Query::Construct(construct) => execute_construct(store, source, construct),
    }
}

/// Runs a `{ SELECT ... }` subquery and re-keys its rows into the outer
/// query's shared [`VariableSet`] so the caller's nested-loop join can
/// proceed by index, as it would for any other pattern.
pub fn eval_select_rows(
    store: &QuadStore,
    _outer_source: &str,
    _outer_prologue: &Prologue,
    select: &SelectQuery,
    outer_vars: &RefCell<VariableSet>,
) -> Result<Vec<Row>, QueryError> {
    let (names, rows) = run_select(store, _outer_source, select)?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let mut mapped = Row::empty(0);
        let mut vars = outer_vars.borrow_mut();
        for (i, name) in names.iter().enumerate() {
            if let Some(value) = row.get(i) {
                let idx = vars.intern(name);
                mapped.set(idx, value.clone());
            }
        }
        out.push(mapped);
    }
    Ok(out)
}

fn execute_ask(store: &QuadStore, source: &str, ask: &AskQuery) -> Result<QueryResults, QueryError> {
    let ctx = ExecCtx::new(store, source, &ask.prologue);
    let rows = eval_pattern_with_dataset(&ask.pattern, &ctx, vec![Row::empty(0)], &ask.dataset)?;
    Ok(QueryResults::Boolean(!rows.is_empty()))
}

fn execute_construct(store: &QuadStore, source: &str, construct: &ConstructQuery) -> Result<QueryResults, QueryError> {
    let ctx = ExecCtx::new(store, source, &construct.prologue);
    let mut rows = eval_pattern_with_dataset(
        &construct.pattern,
        &ctx,
        vec![Row::empty(0)],
        &construct.dataset,
    )?;
    let vars = ctx.vars.borrow().clone();

    if !construct.order_by.is_empty() {
        let items: Vec<(Row, HashMap<String, Value>)> =
            rows.into_iter().map(|r| (r, HashMap::new())).collect();
        rows = sort_grouped(items, &construct.order_by, source, &construct.prologue, &vars, store)?
            .into_iter()
            .map(|(r, _)| r)
            .collect();
    }
    let offset = construct.offset.unwrap_or(0) as usize;
    if offset > 0 {
        rows = rows.into_iter().skip(offset).collect();
    }
    if let Some(limit) = construct.limit {
        rows.truncate(limit as usize);
    }

    let mut quads = Vec::new();
    for (i, row) in rows.iter().enumerate() {
        for triple in &construct.template {
            let s = resolve_construct_term(&triple.subject, i, row, &vars, source, &construct.prologue);
            let p = resolve_construct_term(&triple.predicate, i, row, &vars, source, &construct.prologue);
            let o = resolve_construct_term(&triple.object, i, row, &vars, source, &construct.prologue);
            if let (Some(s), Some(p), Some(o)) = (s, p, o) {
                quads.push(Quad::new(s, p, o, None));
            }
        }
    }
    if construct.distinct {
        let mut seen = HashSet::new();
        quads.retain(|q| seen.insert((q.subject.clone(), q.predicate.clone(), q.object.clone())));
    }
    Ok(QueryResults::Triples(quads))
}

fn resolve_construct_term(
    term: &TermPattern,
    row_index: usize,
    row: &Row,
    vars: &VariableSet,
    source: &str,
    prologue: &Prologue,
) -> Option<Term> {
    match term.kind {
        TermKind::Variable => {
            let idx = vars.get(term.variable_name(source))?;
            let value = row.get(idx);
            if !value.is_bound() {
                return None;
            }
            term_from_value(value)
        }
        TermKind::BlankNode => {
            let text = term.span.text(source);
            let label = if text == "[]" {
                format!("c{}_{row_index}", term.span.start)
            } else {
                format!("{}_{row_index}", text.trim_start_matches("_:"))
            };
            Some(Term::blank_node(label))
        }
        _ => Some(term.resolve(source, prologue)),
    }
}

fn run_select(store: &QuadStore, source: &str, select: &SelectQuery) -> Result<(Vec<String>, Vec<SolutionRow>), QueryError> {
    let ctx = ExecCtx::new(store, source, &select.prologue);
    let rows = eval_pattern_with_dataset(&select.pattern, &ctx, vec![Row::empty(0)], &select.dataset)?;
    let mut vars = ctx.vars.borrow().clone();

    let mut agg_refs: Vec<(String, &CallExpr)> = Vec::new();
    collect_projection_aggregates(&select.projection, source, &mut agg_refs);
    for h in &select.having {
        collect_expr_aggregates(h, source, &mut agg_refs);
    }
    for o in &select.order_by {
        collect_expr_aggregates(&o.expr, source, &mut agg_refs);
    }

    let has_aggregation = !select.group_by.is_empty() || !agg_refs.is_empty();

    let mut groups: Vec<(Row, HashMap<String, Value>)> = if has_aggregation {
        let buckets = group_rows(rows, &select.group_by, source, &select.prologue, &vars, store)?;
        let width = vars.len();
        let mut out = Vec::with_capacity(buckets.len());
        for (key, bucket_rows) in buckets {
            let refs: Vec<&Row> = bucket_rows.iter().collect();
            let mut aggs = HashMap::with_capacity(agg_refs.len());
            for (text, call) in &agg_refs {
                let arg = call.args.first();
                let value = super::aggregate::evaluate(
                    call,
                    arg,
                    &refs,
                    source,
                    &select.prologue,
                    &vars,
                    Some(store),
                )?;
                aggs.insert(text.clone(), value);
            }
            let mut representative = bucket_rows.into_iter().next().unwrap_or_else(|| Row::empty(width));
            for (g_expr, value) in select.group_by.iter().zip(key.iter()) {
                if let ExprKind::Term(t) = &g_expr.kind {
                    if t.kind == TermKind::Variable {
                        if let Some(idx) = vars.get(t.variable_name(source)) {
                            representative.set(idx, value.clone());
                        }
                    }
                }
            }
            out.push((representative, aggs));
        }
        out
    } else {
        rows.into_iter().map(|r| (r, HashMap::new())).collect()
    };

    // `SELECT (expr AS ?alias)` behaves like a trailing BIND: evaluate once
    // per (group) row and make the alias visible to HAVING/ORDER BY too.
    if let Projection::Items(items) = &select.projection {
        for item in items {
            if let ProjectionItem::Expr { expr, alias } = item {
                let alias_name = alias.text(source)[1..].to_owned();
                let idx = vars.intern(&alias_name);
                for (row, aggs) in groups.iter_mut() {
                    let item_ctx = EvalContext {
                        source,
                        prologue: &select.prologue,
                        vars: &vars,
                        row,
                        aggregates: Some(aggs),
                        store: Some(store),
                    };
                    let value = eval(expr, &item_ctx)?;
                    row.set(idx, value);
                }
            }
        }
    }

    if !select.having.is_empty() {
        let mut filtered = Vec::with_capacity(groups.len());
        for (row, aggs) in groups {
            let mut keep = true;
            for h in &select.having {
                let having_ctx = EvalContext {
                    source,
                    prologue: &select.prologue,
                    vars: &vars,
                    row: &row,
                    aggregates: Some(&aggs),
                    store: Some(store),
                };
                if !eval(h, &having_ctx)?.truthy() {
                    keep = false;
                    break;
                }
            }
            if keep {
                filtered.push((row, aggs));
            }
        }
        groups = filtered;
    }

    if !select.order_by.is_empty() {
        groups = sort_grouped(groups, &select.order_by, source, &select.prologue, &vars, store)?;
    }

    let (out_vars, mut solution_rows) = project(&select.projection, &groups, source, &select.prologue, &vars, store)?;

    if select.distinct {
        let mut seen = HashSet::new();
        solution_rows.retain(|r| seen.insert(format!("{:?}", r.0)));
    }

    let offset = select.offset.unwrap_or(0) as usize;
    if offset > 0 {
        solution_rows = solution_rows.into_iter().skip(offset).collect();
    }
    if let Some(limit) = select.limit {
        solution_rows.truncate(limit as usize);
    }

    Ok((out_vars, solution_rows))
}

fn project(
    projection: &Projection,
    groups: &[(Row, HashMap<String, Value>)],
    source: &str,
    prologue: &Prologue,
    vars: &VariableSet,
    store: &QuadStore,
) -> Result<(Vec<String>, Vec<SolutionRow>), QueryError> {
    match projection {
        Projection::All => {
            let names: Vec<String> = vars.names().map(str::to_owned).collect();
            let rows = groups
                .iter()
                .map(|(row, _)| {
                    SolutionRow(
                        (0..names.len())
                            .map(|i| {
                                let v = row.get(i);
                                v.is_bound().then(|| v.clone())
                            })
                            .collect(),
                    )
                })
                .collect();
            Ok((names, rows))
        }
        Projection::Items(items) => {
            let names: Vec<String> = items
                .iter()
                .map(|item| match item {
                    ProjectionItem::Var(span) => span.text(source)[1..].to_owned(),
                    ProjectionItem::Expr { alias, .. } => alias.text(source)[1..].to_owned(),
                })
                .collect();
            let mut rows = Vec::with_capacity(groups.len());
            for (row, aggs) in groups {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    let name = match item {
                        ProjectionItem::Var(span) => &span.text(source)[1..],
                        ProjectionItem::Expr { alias, .. } => &alias.text(source)[1..],
                    };
                    let value = match vars.get(name) {
                        Some(idx) => {
                            let v = row.get(idx);
                            v.is_bound().then(|| v.clone())
                        }
                        None => {
                            // Not yet bound as a variable (e.g. an alias
                            // this projection introduces for the first
                            // time) — fall back to direct evaluation.
                            if let ProjectionItem::Expr { expr, .. } = item {
                                let item_ctx = EvalContext {
                                    source,
                                    prologue,
                                    vars,
                                    row,
                                    aggregates: Some(aggs),
                                    store: Some(store),
                                };
                                let v = eval(expr, &item_ctx)?;
                                v.is_bound().then_some(v)
                            } else {
                                None
                            }
                        }
                    };
                    values.push(value);
                }
                rows.push(SolutionRow(values));
            }
            Ok((names, rows))
        }
    }
}

fn group_rows(
    rows: Vec<Row>,
    group_by: &[Expr],
    source: &str,
    prologue: &Prologue,
    vars: &VariableSet,
    store: &QuadStore,
) -> Result<Vec<(Vec<Value>, Vec<Row>)>, QueryError> {
    if group_by.is_empty() {
        return Ok(vec![(Vec::new(), rows)]);
    }
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut result: Vec<(Vec<Value>, Vec<Row>)> = Vec::new();
    for row in rows {
        let mut key = Vec::with_capacity(group_by.len());
        for g in group_by {
            let group_ctx = EvalContext {
                source,
                prologue,
                vars,
                row: &row,
                aggregates: None,
                store: Some(store),
            };
            key.push(eval(g, &group_ctx)?);
        }
        let key_text = format!("{key:?}");
        match index.get(&key_text) {
            Some(&i) => result[i].1.push(row),
            None => {
                index.insert(key_text, result.len());
                result.push((key, vec![row]));
            }
        }
    }
    Ok(result)
}

fn sort_grouped(
    items: Vec<(Row, HashMap<String, Value>)>,
    order_by: &[super::algebra::OrderExpr],
    source: &str,
    prologue: &Prologue,
    vars: &VariableSet,
    store: &QuadStore,
) -> Result<Vec<(Row, HashMap<String, Value>)>, QueryError> {
    let mut keyed = Vec::with_capacity(items.len());
    for (row, aggs) in items {
        let mut key = Vec::with_capacity(order_by.len());
        for o in order_by {
            let order_ctx = EvalContext {
                source,
                prologue,
                vars,
                row: &row,
                aggregates: Some(&aggs),
                store: Some(store),
            };
            key.push(eval(&o.expr, &order_ctx)?);
        }
        keyed.push((key, row, aggs));
    }
    keyed.sort_by(|a, b| {
        for (i, o) in order_by.iter().enumerate() {
            let mut ord = compare_for_order(&a.0[i], &b.0[i]);
            if matches!(o.direction, SortDirection::Desc) {
                ord = ord.reverse();
            }
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
    Ok(keyed.into_iter().map(|(_, row, aggs)| (row, aggs)).collect())
}

fn compare_for_order(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a.is_bound(), b.is_bound()) {
        (false, false) => Ordering::Equal,
        (false, true) => Ordering::Less,
        (true, false) => Ordering::Greater,
        (true, true) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => a.lexical().cmp(&b.lexical()),
        },
    }
}

fn collect_projection_aggregates<'e>(
    projection: &'e Projection,
    source: &str,
    out: &mut Vec<(String, &'e CallExpr)>,
) {
    if let Projection::Items(items) = projection {
        for item in items {
            if let ProjectionItem::Expr { expr, .. } = item {
                collect_expr_aggregates(expr, source, out);
            }
        }
    }
}

fn collect_expr_aggregates<'e>(expr: &'e Expr, source: &str, out: &mut Vec<(String, &'e CallExpr)>) {
    match &expr.kind {
        ExprKind::Term(_) | ExprKind::Exists(_, _) => {}
        ExprKind::And(a, b) | ExprKind::Or(a, b) | ExprKind::Compare(_, a, b) | ExprKind::Arith(_, a, b) => {
            collect_expr_aggregates(a, source, out);
            collect_expr_aggregates(b, source, out);
        }
        ExprKind::Not(a) | ExprKind::Negate(a) => collect_expr_aggregates(a, source, out),
        ExprKind::In(left, list, _) => {
            collect_expr_aggregates(left, source, out);
            for item in list {
                collect_expr_aggregates(item, source, out);
            }
        }
        ExprKind::Call(call) => {
            if is_aggregate_name(call.name.text(source)) {
                out.push((expr.span.text(source).to_owned(), call));
            } else {
                for a in &call.args {
                    collect_expr_aggregates(a, source, out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_for_order_sorts_unbound_before_bound() {
        assert_eq!(
            compare_for_order(&Value::Unbound, &Value::Integer(1)),
            std::cmp::Ordering::Less
        );
        assert_eq!(
            compare_for_order(&Value::Integer(1), &Value::Unbound),
            std::cmp::Ordering::Greater
        );
        assert_eq!(
            compare_for_order(&Value::Unbound, &Value::Unbound),
            std::cmp::Ordering::Equal
        );
    }

    #[test]
    fn compare_for_order_compares_numerics_numerically_not_lexically() {
        // Lexically "9" > "10", numerically 9 < 10.
        assert_eq!(
            compare_for_order(&Value::Integer(9), &Value::Integer(10)),
            std::cmp::Ordering::Less
        );
    }

    #[test]
    fn compare_for_order_falls_back_to_lexical_for_non_numeric_strings() {
        assert_eq!(
            compare_for_order(&Value::string("a"), &Value::string("b")),
            std::cmp::Ordering::Less
        );
    }
}
