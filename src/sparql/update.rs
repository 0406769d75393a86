//! SPARQL Update executor: runs every `GraphUpdateOperation` inside a
//! single [`crate::store::BatchWriter`] batch, so concurrent readers see
//! either the whole update's effects or none of them.

use crate::model::Term;
use crate::store::{GraphConstraint, QuadPattern, QuadStore};

use super::algebra::{GraphUpdateOperation, Prologue, QuadPattern as AlgebraQuadPattern, UpdateGraphTarget};
use super::binding::Row;
use super::iterators::{eval_pattern_with_dataset, term_from_value, ExecCtx};

pub use super::algebra::Update;

pub fn execute_update(store: &QuadStore, source: &str, update: &Update) -> crate::error::Result<()> {
    for op in &update.operations {
        run_operation(store, source, &update.prologue, op)?;
    }
    Ok(())
}

fn run_operation(
    store: &QuadStore,
    source: &str,
    prologue: &Prologue,
    op: &GraphUpdateOperation,
) -> crate::error::Result<()> {
    match op {
        GraphUpdateOperation::InsertData(quads) => {
            let affected = store.batch(|batch| {
                let mut count = 0;
                for q in quads {
                    let (s, p, o, g) = resolve_quad(q, source, prologue);
                    batch.add(&crate::model::Quad::new(s, p, o, g))?;
                    count += 1;
                }
                Ok(count)
            })?;
            tracing::debug!(affected, "INSERT DATA applied");
            Ok(())
        }
        GraphUpdateOperation::DeleteData(quads) => {
            let affected = store.batch(|batch| {
                let mut count = 0;
                for q in quads {
                    let (s, p, o, g) = resolve_quad(q, source, prologue);
                    if batch.delete(&s, &p, &o, g.as_ref())? {
                        count += 1;
                    }
                }
                Ok(count)
            })?;
            tracing::debug!(affected, "DELETE DATA applied");
            Ok(())
        }
        GraphUpdateOperation::DeleteInsert {
            delete,
            insert,
            dataset,
            pattern,
        } => {
            let ctx = ExecCtx::new(store, source, prologue);
            let rows = eval_pattern_with_dataset(pattern, &ctx, vec![Row::empty(0)], dataset)
                .map_err(crate::error::ChronographError::from)?;
            let vars = ctx.vars.borrow();
            let affected = store.batch(|batch| {
                let mut count = 0;
                for row in &rows {
                    for q in delete {
                        if let Some((s, p, o, g)) = instantiate(q, source, prologue, &vars, row) {
                            if batch.delete(&s, &p, &o, g.as_ref())? {
                                count += 1;
                            }
                        }
                    }
                }
                for row in &rows {
                    for q in insert {
                        if let Some((s, p, o, g)) = instantiate(q, source, prologue, &vars, row) {
                            batch.add(&crate::model::Quad::new(s, p, o, g))?;
                            count += 1;
                        }
                    }
                }
                Ok(count)
            })?;
            tracing::debug!(affected, "DELETE/INSERT WHERE applied");
            Ok(())
        }
        GraphUpdateOperation::Clear(target) | GraphUpdateOperation::Drop(target) => {
            clear_target(store, source, prologue, target)?;
            Ok(())
        }
        GraphUpdateOperation::Create(_) => Ok(()),
        GraphUpdateOperation::Copy(src, dst) => {
            copy_graph(store, source, prologue, src, dst)?;
            Ok(())
        }
        GraphUpdateOperation::Move(src, dst) => {
            copy_graph(store, source, prologue, src, dst)?;
            clear_target(store, source, prologue, src)?;
            Ok(())
        }
        GraphUpdateOperation::Add(src, dst) => {
            add_graph(store, source, prologue, src, dst)?;
            Ok(())
        }
    }
}

/// `COPY src TO dst`: clears `dst`, then copies every live quad from
/// `src` into it. Implemented as clear-then-add rather than a dedicated
/// storage primitive, matching how the rest of the update executor
/// composes out of `BatchWriter::add`/`clear_matching`.
fn copy_graph(
    store: &QuadStore,
    source: &str,
    prologue: &Prologue,
    src: &UpdateGraphTarget,
    dst: &UpdateGraphTarget,
) -> crate::error::Result<()> {
    let src_term = target_graph(src, source, prologue);
    let dst_term = target_graph(dst, source, prologue);
    let pattern = QuadPattern {
        subject: None,
        predicate: None,
        object: None,
        graph: graph_constraint(&src_term),
    };
    let rows = store.query_current(&pattern)?;
    store.batch(|batch| {
        batch.clear_matching(&QuadPattern {
            subject: None,
            predicate: None,
            object: None,
            graph: graph_constraint(&dst_term),
        })?;
        for row in &rows {
            let quad = crate::model::Quad::new(
                row.subject.clone(),
                row.predicate.clone(),
                row.object.clone(),
                dst_term.clone(),
            );
            batch.add(&quad)?;
        }
        Ok(())
    })
}

fn add_graph(
    store: &QuadStore,
    source: &str,
    prologue: &Prologue,
    src: &UpdateGraphTarget,
    dst: &UpdateGraphTarget,
) -> crate::error::Result<()> {
    let src_term = target_graph(src, source, prologue);
    let dst_term = target_graph(dst, source, prologue);
    let pattern = QuadPattern {
        subject: None,
        predicate: None,
        object: None,
        graph: graph_constraint(&src_term),
    };
    let rows = store.query_current(&pattern)?;
    store.batch(|batch| {
        for row in &rows {
            let quad = crate::model::Quad::new(
                row.subject.clone(),
                row.predicate.clone(),
                row.object.clone(),
                dst_term.clone(),
            );
            batch.add(&quad)?;
        }
        Ok(())
    })
}

fn clear_target(
    store: &QuadStore,
    source: &str,
    prologue: &Prologue,
    target: &UpdateGraphTarget,
) -> crate::error::Result<()> {
    match target {
        UpdateGraphTarget::All => {
            let affected = store.batch(|batch| batch.clear_matching(&QuadPattern::any()))?;
            tracing::debug!(affected, "CLEAR ALL applied");
        }
        other => {
            let graph = target_graph(other, source, prologue);
            let affected = store.batch(|batch| {
                batch.clear_matching(&QuadPattern {
                    subject: None,
                    predicate: None,
                    object: None,
                    graph: graph_constraint(&graph),
                })
            })?;
            tracing::debug!(affected, "CLEAR/DROP applied");
        }
    }
    Ok(())
}

fn target_graph(target: &UpdateGraphTarget, source: &str, prologue: &Prologue) -> Option<Term> {
    match target {
        UpdateGraphTarget::Default => None,
        UpdateGraphTarget::Named(term) => Some(term.resolve(source, prologue)),
        UpdateGraphTarget::All => None,
    }
}

/// `target_graph` returns `None` for both "the default graph" and (when
/// called for `UpdateGraphTarget::All`, never routed through this helper)
/// conceptually "every graph" — the two former-UpdateGraphTarget cases that
/// actually reach here (`Default` and `Named`) only ever mean "this one
/// specific graph", so `None` always means the default graph here.
fn graph_constraint(term: &Option<Term>) -> GraphConstraint<'_> {
    match term {
        Some(t) => GraphConstraint::Named(t),
        None => GraphConstraint::DefaultGraph,
    }
}

fn resolve_quad(q: &AlgebraQuadPattern, source: &str, prologue: &Prologue) -> (Term, Term, Term, Option<Term>) {
    (
        q.subject.resolve(source, prologue),
        q.predicate.resolve(source, prologue),
        q.object.resolve(source, prologue),
        q.graph.as_ref().map(|g| g.resolve(source, prologue)),
    )
}

fn instantiate(
    q: &AlgebraQuadPattern,
    source: &str,
    prologue: &Prologue,
    vars: &super::binding::VariableSet,
    row: &Row,
) -> Option<(Term, Term, Term, Option<Term>)> {
    let resolve_slot = |t: &super::algebra::TermPattern| -> Option<Term> {
        if t.is_variable() {
            let idx = vars.get(t.variable_name(source))?;
            let v = row.get(idx);
            if !v.is_bound() {
                return None;
            }
            term_from_value(v)
        } else {
            Some(t.resolve(source, prologue))
        }
    };
    let s = resolve_slot(&q.subject)?;
    let p = resolve_slot(&q.predicate)?;
    let o = resolve_slot(&q.object)?;
    let g = match &q.graph {
        Some(gt) => Some(resolve_slot(gt)?),
        None => None,
    };
    Some((s, p, o, g))
}

#[cfg(test)]
mod tests {
    use crate::sparql::{query, update, QueryResults};
    use crate::store::QuadStore;
    use tempfile::{tempdir, TempDir};

    fn open() -> (TempDir, QuadStore) {
        let dir = tempdir().unwrap();
        let store = QuadStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn solution_count(store: &QuadStore, text: &str) -> usize {
        match query(store, text).unwrap() {
            QueryResults::Solutions { rows, .. } => rows.len(),
            other => panic!("expected solutions, got {other:?}"),
        }
    }

    #[test]
    fn insert_data_then_select_sees_it() {
        let (_dir, store) = open();
        update(
            &store,
            r#"INSERT DATA { <http://e/s> <http://e/p> "o" }"#,
        )
        .unwrap();
        assert_eq!(
            solution_count(&store, "SELECT ?o WHERE { <http://e/s> <http://e/p> ?o }"),
            1
        );
    }

    #[test]
    fn delete_data_removes_exactly_the_given_quad() {
        let (_dir, store) = open();
        update(
            &store,
            r#"INSERT DATA { <http://e/s> <http://e/p> "a" . <http://e/s> <http://e/p> "b" }"#,
        )
        .unwrap();
        update(&store, r#"DELETE DATA { <http://e/s> <http://e/p> "a" }"#).unwrap();
        assert_eq!(
            solution_count(&store, "SELECT ?o WHERE { <http://e/s> <http://e/p> ?o }"),
            1
        );
    }

    #[test]
    fn delete_where_removes_every_match() {
        let (_dir, store) = open();
        update(
            &store,
            r#"INSERT DATA { <http://e/s> <http://e/p> "a" . <http://e/s> <http://e/p> "b" }"#,
        )
        .unwrap();
        update(&store, "DELETE WHERE { <http://e/s> <http://e/p> ?o }").unwrap();
        assert_eq!(
            solution_count(&store, "SELECT ?o WHERE { <http://e/s> <http://e/p> ?o }"),
            0
        );
    }

    #[test]
    fn copy_leaves_source_graph_intact_while_move_clears_it() {
        let (_dir, store) = open();
        update(
            &store,
            r#"INSERT DATA { GRAPH <http://e/src> { <http://e/s> <http://e/p> "v" } }"#,
        )
        .unwrap();

        update(&store, "COPY <http://e/src> TO <http://e/dst1>").unwrap();
        assert_eq!(
            solution_count(&store, "SELECT ?o WHERE { GRAPH <http://e/src> { ?s ?p ?o } }"),
            1,
            "COPY must not clear its source graph"
        );
        assert_eq!(
            solution_count(&store, "SELECT ?o WHERE { GRAPH <http://e/dst1> { ?s ?p ?o } }"),
            1
        );

        update(&store, "MOVE <http://e/src> TO <http://e/dst2>").unwrap();
        assert_eq!(
            solution_count(&store, "SELECT ?o WHERE { GRAPH <http://e/src> { ?s ?p ?o } }"),
            0,
            "MOVE must clear its source graph"
        );
        assert_eq!(
            solution_count(&store, "SELECT ?o WHERE { GRAPH <http://e/dst2> { ?s ?p ?o } }"),
            1
        );
    }

    #[test]
    fn clear_graph_tombstones_every_quad_in_it() {
        let (_dir, store) = open();
        update(
            &store,
            r#"INSERT DATA { GRAPH <http://e/g> { <http://e/s> <http://e/p> "v" } }"#,
        )
        .unwrap();
        update(&store, "CLEAR GRAPH <http://e/g>").unwrap();
        assert_eq!(
            solution_count(&store, "SELECT ?o WHERE { GRAPH <http://e/g> { ?s ?p ?o } }"),
            0
        );
    }

    #[test]
    fn clear_default_leaves_named_graphs_untouched() {
        let (_dir, store) = open();
        update(
            &store,
            r#"INSERT DATA {
                <http://e/s> <http://e/p> "default" .
                GRAPH <http://e/g1> { <http://e/s> <http://e/p> "named" }
            }"#,
        )
        .unwrap();
        update(&store, "CLEAR DEFAULT").unwrap();
        assert_eq!(
            solution_count(&store, "SELECT ?o WHERE { ?s ?p ?o }"),
            0,
            "CLEAR DEFAULT must remove the default graph's quads"
        );
        assert_eq!(
            solution_count(&store, "SELECT ?o WHERE { GRAPH <http://e/g1> { ?s ?p ?o } }"),
            1,
            "CLEAR DEFAULT must not touch named graphs"
        );
    }

    #[test]
    fn insert_where_copies_matching_bindings() {
        let (_dir, store) = open();
        update(
            &store,
            r#"INSERT DATA { <http://e/a> <http://e/likes> <http://e/b> }"#,
        )
        .unwrap();
        update(
            &store,
            "INSERT { ?x <http://e/dislikes> ?y } WHERE { ?x <http://e/likes> ?y }",
        )
        .unwrap();
        assert_eq!(
            solution_count(
                &store,
                "SELECT ?y WHERE { <http://e/a> <http://e/dislikes> ?y }"
            ),
            1
        );
    }
}
