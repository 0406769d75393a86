//! The executor proper: walks a [`GraphPattern`] tree and folds a stream
//! of candidate [`Row`]s through it. Each combinator takes the rows
//! produced by its left/outer operand and returns the rows produced by
//! joining, filtering, or extending them — BGP scans bottom out in
//! [`crate::store::QuadStore::query_current`], everything above that is
//! plain in-memory relational algebra over `Vec<Row>`.

use std::cell::RefCell;

use crate::model::Term;
use crate::store::{GraphConstraint, QuadPattern, QuadStore};

use super::algebra::{GraphPattern, GraphTarget, Prologue, TermKind, TermPattern, TriplePattern};
use super::binding::{Row, VariableSet};
use super::expression::{eval, EvalContext};
use super::QueryError;

pub struct ExecCtx<'a> {
    pub store: &'a QuadStore,
    pub source: &'a str,
    pub prologue: &'a Prologue,
    pub vars: RefCell<VariableSet>,
}

impl<'a> ExecCtx<'a> {
    pub fn new(store: &'a QuadStore, source: &'a str, prologue: &'a Prologue) -> Self {
        Self {
            store,
            source,
            prologue,
            vars: RefCell::new(VariableSet::new()),
        }
    }

    fn var_index(&self, name: &str) -> usize {
        self.vars.borrow_mut().intern(name)
    }

    fn eval_ctx<'r>(&'r self, vars: &'r VariableSet, row: &'r Row) -> EvalContext<'r> {
        EvalContext {
            source: self.source,
            prologue: self.prologue,
            vars,
            row,
            aggregates: None,
            store: Some(self.store),
        }
    }
}

/// Runs `pattern` seeded with every variable binding visible in `ctx`'s
/// current row, and reports whether it has at least one solution —
/// `EXISTS { ... }` / `NOT EXISTS { ... }` need only the boolean, not the
/// bindings, so this stops as soon as the inner pattern produces a row.
pub fn pattern_has_any_solution(
    store: &QuadStore,
    pattern: &GraphPattern,
    outer: &EvalContext,
) -> Result<bool, QueryError> {
    let inner = ExecCtx::new(store, outer.source, outer.prologue);
    let mut seed = Row::empty(0);
    {
        let mut vars = inner.vars.borrow_mut();
        for name in outer.vars.names() {
            if let Some(outer_idx) = outer.vars.get(name) {
                let value = outer.row.get(outer_idx).clone();
                if value.is_bound() {
                    let idx = vars.intern(name);
                    seed.set(idx, value);
                }
            }
        }
    }
    let rows = eval_pattern(pattern, &inner, vec![seed])?;
    Ok(!rows.is_empty())
}

/// Restricts the store-level matching of bare `{ ?s ?p ?o }` patterns
/// that aren't wrapped in a `GRAPH` clause. With no `FROM`/`FROM NAMED`
/// dataset clauses, the default graph is the store's default graph —
/// `Any` resolves to `GraphConstraint::DefaultGraph`, not a wildcard
/// across every graph in the store.
#[derive(Clone)]
enum GraphScope {
    Any,
    Fixed(Term),
    /// `FROM <g1> <g2> …` redefines the default graph as the union of the
    /// named graphs rather than the store's own default graph.
    Named(Vec<Term>),
}

pub fn eval_pattern(
    pattern: &GraphPattern,
    ctx: &ExecCtx,
    input: Vec<Row>,
) -> Result<Vec<Row>, QueryError> {
    eval_pattern_scoped(pattern, ctx, input, &GraphScope::Any)
}

/// As [`eval_pattern`], but honors `FROM`/`FROM NAMED` dataset clauses:
/// with a non-empty `dataset.default`, bare (non-`GRAPH`) triple patterns
/// only match those named graphs instead of every graph in the store.
pub fn eval_pattern_with_dataset(
    pattern: &GraphPattern,
    ctx: &ExecCtx,
    input: Vec<Row>,
    dataset: &super::algebra::Dataset,
) -> Result<Vec<Row>, QueryError> {
    if dataset.default.is_empty() {
        return eval_pattern(pattern, ctx, input);
    }
    let graphs: Vec<Term> = dataset
        .default
        .iter()
        .map(|t| t.resolve(ctx.source, ctx.prologue))
        .collect();
    eval_pattern_scoped(pattern, ctx, input, &GraphScope::Named(graphs))
}

fn eval_pattern_scoped(
    pattern: &GraphPattern,
    ctx: &ExecCtx,
    input: Vec<Row>,
    scope: &GraphScope,
) -> Result<Vec<Row>, QueryError> {
    match pattern {
        GraphPattern::Empty => Ok(input),
        GraphPattern::Bgp(triples) => eval_bgp(triples, ctx, input, scope),
        GraphPattern::Join(a, b) => {
            let mid = eval_pattern_scoped(a, ctx, input, scope)?;
            eval_pattern_scoped(b, ctx, mid, scope)
        }
        GraphPattern::LeftJoin(a, b, filter) => {
            let left = eval_pattern_scoped(a, ctx, input, scope)?;
            let mut out = Vec::with_capacity(left.len());
            for row in left {
                let mut matches = eval_pattern_scoped(b, ctx, vec![row.clone()], scope)?;
                if let Some(filter_expr) = filter {
                    let vars = ctx.vars.borrow().clone();
                    matches.retain(|r| {
                        eval(filter_expr, &ctx.eval_ctx(&vars, r))
                            .map(|v| v.truthy())
                            .unwrap_or(false)
                    });
                }
                if matches.is_empty() {
                    out.push(row);
                } else {
                    out.extend(matches);
                }
            }
            Ok(out)
        }
        GraphPattern::Union(a, b) => {
            let mut left = eval_pattern_scoped(a, ctx, input.clone(), scope)?;
            let right = eval_pattern_scoped(b, ctx, input, scope)?;
            left.extend(right);
            Ok(left)
        }
        GraphPattern::Minus(a, b) => {
            let left = eval_pattern_scoped(a, ctx, input, scope)?;
            let mut out = Vec::with_capacity(left.len());
            for row in left {
                let matches = eval_pattern_scoped(b, ctx, vec![row.clone()], scope)?;
                let excluded = matches.iter().any(|m| rows_share_binding(&row, m));
                if !excluded {
                    out.push(row);
                }
            }
            Ok(out)
        }
        GraphPattern::Graph(target, inner) => eval_graph(target, inner, ctx, input),
        GraphPattern::Filter(expr, inner) => {
            let rows = eval_pattern_scoped(inner, ctx, input, scope)?;
            let vars = ctx.vars.borrow().clone();
            let mut out = Vec::with_capacity(rows.len());
            for row in rows {
                if eval(expr, &ctx.eval_ctx(&vars, &row))?.truthy() {
                    out.push(row);
                }
            }
            Ok(out)
        }
        GraphPattern::Bind(expr, var, inner) => {
            let rows = eval_pattern_scoped(inner, ctx, input, scope)?;
            let idx = ctx.var_index(&var.text(ctx.source)[1..]);
            let mut out = Vec::with_capacity(rows.len());
            for mut row in rows {
                let vars = ctx.vars.borrow().clone();
                let value = eval(expr, &ctx.eval_ctx(&vars, &row))?;
                row.set(idx, value);
                out.push(row);
            }
            Ok(out)
        }
        GraphPattern::Values(block) => {
            let indices: Vec<usize> = block
                .vars
                .iter()
                .map(|v| ctx.var_index(v.text(ctx.source).trim_start_matches(['?', '$'])))
                .collect();
            let mut value_rows = Vec::with_capacity(block.rows.len());
            for raw_row in &block.rows {
                let mut row = Row::empty(0);
                for (slot, cell) in indices.iter().zip(raw_row) {
                    if let Some(term_pattern) = cell {
                        let term = term_pattern.resolve(ctx.source, ctx.prologue);
                        row.set(*slot, super::value::Value::from(term));
                    }
                }
                value_rows.push(row);
            }
            join_rows(input, value_rows)
        }
        GraphPattern::Subquery(select) => {
            let sub_rows = super::plan::eval_select_rows(ctx.store, ctx.source, ctx.prologue, select, &ctx.vars)?;
            join_rows(input, sub_rows)
        }
    }
}

fn eval_graph(
    target: &GraphTarget,
    inner: &GraphPattern,
    ctx: &ExecCtx,
    input: Vec<Row>,
) -> Result<Vec<Row>, QueryError> {
    match target {
        GraphTarget::Default => eval_pattern_scoped(inner, ctx, input, &GraphScope::Any),
        GraphTarget::Named(term) if term.is_variable() => {
            let idx = ctx.var_index(term.variable_name(ctx.source));
            let graphs = ctx.store.distinct_graphs().map_err(store_err)?;
            let mut out = Vec::new();
            for g in graphs {
                let scope = GraphScope::Fixed(g.clone());
                let mut rows = Vec::with_capacity(input.len());
                for row in &input {
                    let mut bound = row.clone();
                    bound.set(idx, super::value::Value::from(g.clone()));
                    rows.push(bound);
                }
                out.extend(eval_pattern_scoped(inner, ctx, rows, &scope)?);
            }
            Ok(out)
        }
        GraphTarget::Named(term) => {
            let g = term.resolve(ctx.source, ctx.prologue);
            eval_pattern_scoped(inner, ctx, input, &GraphScope::Fixed(g))
        }
    }
}

fn eval_bgp(
    triples: &[TriplePattern],
    ctx: &ExecCtx,
    input: Vec<Row>,
    scope: &GraphScope,
) -> Result<Vec<Row>, QueryError> {
    if let GraphScope::Named(graphs) = scope {
        let mut out = Vec::new();
        for g in graphs {
            out.extend(eval_bgp(triples, ctx, input.clone(), &GraphScope::Fixed(g.clone()))?);
        }
        return Ok(out);
    }
    let mut rows = input;
    for triple in triples {
        let mut next = Vec::with_capacity(rows.len());
        for row in &rows {
            next.extend(match_triple(triple, row, ctx, scope)?);
        }
        rows = next;
    }
    Ok(rows)
}

fn match_triple(
    triple: &TriplePattern,
    row: &Row,
    ctx: &ExecCtx,
    scope: &GraphScope,
) -> Result<Vec<Row>, QueryError> {
    let subject = slot_value(&triple.subject, row, ctx);
    let predicate = slot_value(&triple.predicate, row, ctx);
    let object = slot_value(&triple.object, row, ctx);

    let graph_constraint = match scope {
        GraphScope::Any => GraphConstraint::DefaultGraph,
        GraphScope::Fixed(g) => GraphConstraint::Named(g),
        // `eval_bgp` expands `Named` into one `Fixed` call per graph before
        // ever reaching here; this arm exists only so the match is exhaustive.
        GraphScope::Named(_) => GraphConstraint::Any,
    };

    let pattern = QuadPattern {
        subject: subject.as_ref(),
        predicate: predicate.as_ref(),
        object: object.as_ref(),
        graph: graph_constraint,
    };
    let matches = ctx.store.query_current(&pattern).map_err(store_err)?;

    let mut out = Vec::with_capacity(matches.len());
    'outer: for m in matches {
        let mut candidate = row.clone();
        for (slot, actual) in [
            (&triple.subject, &m.subject),
            (&triple.predicate, &m.predicate),
            (&triple.object, &m.object),
        ] {
            if slot.kind == TermKind::Variable {
                let idx = ctx.var_index(slot.variable_name(ctx.source));
                let existing = candidate.get(idx).clone();
                let value = super::value::Value::from(actual.clone());
                if existing.is_bound() && existing != value {
                    continue 'outer;
                }
                candidate.set(idx, value);
            }
        }
        out.push(candidate);
    }
    Ok(out)
}

fn slot_value(term: &TermPattern, row: &Row, ctx: &ExecCtx) -> Option<Term> {
    if term.kind == TermKind::Variable {
        let idx = ctx.var_index(term.variable_name(ctx.source));
        return match row.get(idx) {
            super::value::Value::Unbound => None,
            other => term_from_value(other),
        };
    }
    Some(term.resolve(ctx.source, ctx.prologue))
}

pub(crate) fn term_from_value(value: &super::value::Value) -> Option<Term> {
    use super::value::Value;
    use crate::model::Literal;
    Some(match value {
        Value::Unbound => return None,
        Value::Iri(iri) => Term::NamedNode(iri.clone()),
        Value::BlankNode(id) => Term::BlankNode(id.clone()),
        Value::Integer(i) => Term::Literal(Literal::Typed {
            value: i.to_string(),
            datatype: "http://www.w3.org/2001/XMLSchema#integer".to_owned(),
        }),
        Value::Double(d) => Term::Literal(Literal::Typed {
            value: super::value::format_double(*d),
            datatype: "http://www.w3.org/2001/XMLSchema#double".to_owned(),
        }),
        Value::Boolean(b) => Term::Literal(Literal::Typed {
            value: b.to_string(),
            datatype: "http://www.w3.org/2001/XMLSchema#boolean".to_owned(),
        }),
        Value::String {
            value,
            lang: Some(lang),
            ..
        } => Term::Literal(Literal::LanguageTagged {
            value: value.clone(),
            language: lang.clone(),
        }),
        Value::String {
            value,
            datatype: Some(dt),
            ..
        } => Term::Literal(Literal::Typed {
            value: value.clone(),
            datatype: dt.clone(),
        }),
        Value::String { value, .. } => Term::Literal(Literal::Plain(value.clone())),
    })
}

/// MINUS excludes a left solution only when some right solution shares
/// at least one bound variable with it *and* agrees on every variable
/// they both bind — a compatible, non-empty-domain-overlap match per
/// the SPARQL MINUS semantics, not mere equality on the first common
/// slot.
fn rows_share_binding(a: &Row, b: &Row) -> bool {
    let width = a.len().min(b.len());
    let mut shared = false;
    for i in 0..width {
        let (va, vb) = (a.get(i), b.get(i));
        if va.is_bound() && vb.is_bound() {
            shared = true;
            if va != vb {
                return false;
            }
        }
    }
    shared
}

fn join_rows(left: Vec<Row>, right: Vec<Row>) -> Result<Vec<Row>, QueryError> {
    if left.is_empty() {
        return Ok(right);
    }
    if right.is_empty() {
        return Ok(left);
    }
    let mut out = Vec::with_capacity(left.len() * right.len());
    for l in &left {
        for r in &right {
            if let Some(merged) = l.merge(r) {
                out.push(merged);
            }
        }
    }
    Ok(out)
}

fn store_err(e: crate::error::ChronographError) -> QueryError {
    QueryError {
        offset: 0,
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::value::Value;

    fn row(slots: &[Value]) -> Row {
        let mut r = Row::empty(slots.len());
        for (i, v) in slots.iter().enumerate() {
            r.set(i, v.clone());
        }
        r
    }

    #[test]
    fn rows_share_binding_requires_agreement_on_every_shared_variable() {
        // Two rows share ?0 (both "x") but disagree on ?1 — not a match,
        // even though the first shared slot agrees.
        let a = row(&[Value::string("x"), Value::string("y")]);
        let b = row(&[Value::string("x"), Value::string("z")]);
        assert!(!rows_share_binding(&a, &b));
    }

    #[test]
    fn rows_share_binding_true_when_all_shared_variables_agree() {
        let a = row(&[Value::string("x"), Value::Unbound]);
        let b = row(&[Value::string("x"), Value::string("z")]);
        assert!(rows_share_binding(&a, &b));
    }

    #[test]
    fn rows_share_binding_false_with_no_shared_bound_variable() {
        let a = row(&[Value::string("x"), Value::Unbound]);
        let b = row(&[Value::Unbound, Value::string("z")]);
        assert!(!rows_share_binding(&a, &b));
    }

    #[test]
    fn join_rows_drops_incompatible_combinations() {
        let left = vec![row(&[Value::string("a")]), row(&[Value::string("b")])];
        let right = vec![row(&[Value::string("a")])];
        let joined = join_rows(left, right).unwrap();
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].get(0), &Value::string("a"));
    }

    #[test]
    fn join_rows_is_identity_when_either_side_is_empty() {
        let left = vec![row(&[Value::string("a")])];
        assert_eq!(join_rows(left.clone(), Vec::new()).unwrap().len(), 1);
        assert_eq!(join_rows(Vec::new(), left).unwrap().len(), 1);
    }

    #[test]
    fn term_from_value_round_trips_typed_literal() {
        let term = term_from_value(&Value::Integer(42)).unwrap();
        assert_eq!(
            term,
            Term::Literal(crate::model::Literal::Typed {
                value: "42".to_owned(),
                datatype: "http://www.w3.org/2001/XMLSchema#integer".to_owned(),
            })
        );
    }

    #[test]
    fn term_from_value_is_none_for_unbound() {
        assert!(term_from_value(&Value::Unbound).is_none());
    }
}
