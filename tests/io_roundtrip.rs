//! N-Quads export/import against a live store, and SPARQL result
//! serialization over real query results.

use chronograph::io::{nquads, results::{self, ResultsFormat}};
use chronograph::sparql::{query, update, QueryResults};
use chronograph::store::{QuadPattern, QuadStore};
use tempfile::tempdir;

#[test]
fn exporting_and_reimporting_a_store_preserves_its_current_quads() {
    let src_dir = tempdir().unwrap();
    let src = QuadStore::open(src_dir.path()).unwrap();
    update(
        &src,
        r#"INSERT DATA {
            <http://e/a> <http://e/p> "one" .
            <http://e/a> <http://e/p> "two" .
            GRAPH <http://e/g> { <http://e/a> <http://e/p> "three" }
        }"#,
    )
    .unwrap();

    let rows = src.query_current(&QuadPattern::any()).unwrap();
    let quads: Vec<_> = rows
        .iter()
        .map(|r| {
            chronograph::model::Quad::new(
                r.subject.clone(),
                r.predicate.clone(),
                r.object.clone(),
                r.graph.clone(),
            )
        })
        .collect();

    let mut buf = Vec::new();
    nquads::write_all(&mut buf, &quads).unwrap();

    let dst_dir = tempdir().unwrap();
    let dst = QuadStore::open(dst_dir.path()).unwrap();
    let reparsed = nquads::parse_str(&String::from_utf8(buf).unwrap()).unwrap();
    assert_eq!(reparsed.len(), quads.len());
    for q in &reparsed {
        dst.add(q).unwrap();
    }
    assert_eq!(
        dst.query_current(&QuadPattern::any()).unwrap().len(),
        quads.len()
    );
}

#[test]
fn select_results_serialize_to_every_tabular_format() {
    let dir = tempdir().unwrap();
    let store = QuadStore::open(dir.path()).unwrap();
    update(&store, r#"INSERT DATA { <http://e/s> <http://e/p> "v" }"#).unwrap();
    let res = query(&store, "SELECT ?o WHERE { <http://e/s> <http://e/p> ?o }").unwrap();

    for format in [
        ResultsFormat::Json,
        ResultsFormat::Xml,
        ResultsFormat::Csv,
        ResultsFormat::Tsv,
    ] {
        let mut buf = Vec::new();
        results::write(format, &mut buf, &res).unwrap();
        assert!(!buf.is_empty());
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains('v') || text.contains("v"), "{text}");
    }
}

#[test]
fn construct_results_are_rejected_by_tabular_writers() {
    let dir = tempdir().unwrap();
    let store = QuadStore::open(dir.path()).unwrap();
    update(&store, r#"INSERT DATA { <http://e/s> <http://e/p> "v" }"#).unwrap();
    let res = query(&store, "CONSTRUCT { ?s ?p ?o } WHERE { ?s ?p ?o }").unwrap();
    assert!(matches!(res, QueryResults::Triples(_)));
    let mut buf = Vec::new();
    assert!(results::write(ResultsFormat::Json, &mut buf, &res).is_err());
}
