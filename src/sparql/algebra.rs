//! Query algebra: the parser's output. Term patterns carry byte offsets
//! into the original query text rather than owned strings; resolving a
//! span to a `Term` (prefix expansion, escape decoding) happens lazily,
//! once, right before a binding is produced. The `'a` lifetime threading
//! through every node ties the plan to the source text it was parsed
//! from — a query text dropped before its plan is a borrow-check error,
//! not a runtime one.

use std::collections::HashMap;
use std::fmt;

use crate::model::Term;

/// A byte range into the source query text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Span {
    pub start: u32,
    pub len: u32,
}

impl Span {
    pub fn new(start: usize, len: usize) -> Self {
        Self {
            start: start as u32,
            len: len as u32,
        }
    }

    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start as usize..(self.start + self.len) as usize]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TermKind {
    Variable,
    Iri,
    BlankNode,
    Literal,
}

/// One slot of a triple pattern or an atomic expression operand: a
/// discriminant plus the span of its raw source text.
#[derive(Clone, Copy, Debug)]
pub struct TermPattern {
    pub kind: TermKind,
    pub span: Span,
}

impl TermPattern {
    pub fn new(kind: TermKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn is_variable(&self) -> bool {
        self.kind == TermKind::Variable
    }

    /// Variable name without the leading `?`/`$` sigil.
    pub fn variable_name<'a>(&self, source: &'a str) -> &'a str {
        &self.span.text(source)[1..]
    }

    /// Resolves this pattern's source text into an owned [`Term`],
    /// expanding prefixed names and decoding literal escapes against
    /// `prologue`. Panics if called on a variable slot — callers check
    /// `is_variable` first, matching how the executor distinguishes
    /// pattern positions from bound terms.
    pub fn resolve(&self, source: &str, prologue: &Prologue) -> Term {
        let text = self.span.text(source);
        match self.kind {
            TermKind::Variable => panic!("variable patterns have no fixed term"),
            TermKind::Iri if text == "a" => {
                Term::named_node("http://www.w3.org/1999/02/22-rdf-syntax-ns#type")
            }
            TermKind::Iri => Term::named_node(prologue.resolve_iri(text)),
            TermKind::BlankNode if text == "[]" => {
                Term::blank_node(format!("anon{}", self.span.start))
            }
            TermKind::BlankNode => Term::blank_node(text.trim_start_matches("_:")),
            TermKind::Literal => resolve_literal(text, prologue),
        }
    }
}

fn resolve_literal(text: &str, prologue: &Prologue) -> Term {
    if !text.starts_with('"') && !text.starts_with('\'') {
        // Bare numeric or boolean literal.
        if text == "true" || text == "false" {
            return Term::typed_literal(text, "http://www.w3.org/2001/XMLSchema#boolean");
        }
        let datatype = if text.contains('.') || text.contains('e') || text.contains('E') {
            "http://www.w3.org/2001/XMLSchema#double"
        } else {
            "http://www.w3.org/2001/XMLSchema#integer"
        };
        return Term::typed_literal(text, datatype);
    }
    let quote = text.as_bytes()[0] as char;
    let rest = &text[1..];
    let end = rest
        .find(quote)
        .expect("lexer only emits well-formed quoted literals");
    let body = unescape_sparql(&rest[..end]);
    let suffix = &rest[end + 1..];
    if let Some(lang) = suffix.strip_prefix('@') {
        Term::language_literal(body, lang)
    } else if let Some(dt) = suffix.strip_prefix("^^") {
        let dt_iri = if dt.starts_with('<') {
            dt.trim_start_matches('<').trim_end_matches('>').to_owned()
        } else {
            prologue.resolve_iri(dt)
        };
        Term::typed_literal(body, dt_iri)
    } else {
        Term::plain_literal(body)
    }
}

fn unescape_sparql(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some('\\') => out.push('\\'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                if let Ok(code) = u32::from_str_radix(&hex, 16) {
                    if let Some(ch) = char::from_u32(code) {
                        out.push(ch);
                    }
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// Base IRI and prefix declarations from a query's prologue.
#[derive(Clone, Debug, Default)]
pub struct Prologue {
    pub base: Option<String>,
    pub prefixes: HashMap<String, String>,
}

impl Prologue {
    fn resolve_iri(&self, text: &str) -> String {
        if let Some(iri) = text.strip_prefix('<').and_then(|t| t.strip_suffix('>')) {
            return match &self.base {
                Some(base) if !iri.contains("://") && !iri.is_empty() => {
                    resolve_relative(base, iri)
                }
                _ => iri.to_owned(),
            };
        }
        if let Some(colon) = text.find(':') {
            let (prefix, local) = (&text[..colon], &text[colon + 1..]);
            if let Some(ns) = self.prefixes.get(prefix) {
                return format!("{ns}{local}");
            }
        }
        text.to_owned()
    }
}

fn resolve_relative(base: &str, rel: &str) -> String {
    if rel.is_empty() {
        return base.to_owned();
    }
    if rel.starts_with('#') {
        let trimmed = base.split('#').next().unwrap_or(base);
        return format!("{trimmed}{rel}");
    }
    match base.rfind('/') {
        Some(idx) => format!("{}/{rel}", &base[..idx]),
        None => rel.to_owned(),
    }
}

#[derive(Clone, Debug)]
pub struct TriplePattern {
    pub subject: TermPattern,
    pub predicate: TermPattern,
    pub object: TermPattern,
}

#[derive(Clone, Debug)]
pub enum GraphTarget {
    Default,
    Named(TermPattern),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Clone, Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    Term(TermPattern),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
    Arith(ArithOp, Box<Expr>, Box<Expr>),
    Negate(Box<Expr>),
    In(Box<Expr>, Vec<Expr>, bool),
    Call(CallExpr),
    Exists(Box<GraphPattern>, bool),
}

/// A built-in or aggregate function call. `wildcard` is only meaningful
/// for `COUNT(*)`; `distinct` covers `COUNT(DISTINCT ?x)` and friends.
#[derive(Clone, Debug)]
pub struct CallExpr {
    pub name: Span,
    pub args: Vec<Expr>,
    pub distinct: bool,
    pub wildcard: bool,
}

#[derive(Clone, Debug)]
pub enum ProjectionItem {
    Var(Span),
    Expr { expr: Expr, alias: Span },
}

#[derive(Clone, Debug)]
pub enum Projection {
    All,
    Items(Vec<ProjectionItem>),
}

#[derive(Clone, Copy, Debug)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Clone, Debug)]
pub struct OrderExpr {
    pub expr: Expr,
    pub direction: SortDirection,
}

#[derive(Clone, Debug, Default)]
pub struct Dataset {
    pub default: Vec<TermPattern>,
    pub named: Vec<TermPattern>,
}

#[derive(Clone, Debug)]
pub struct ValuesBlock {
    pub vars: Vec<Span>,
    pub rows: Vec<Vec<Option<TermPattern>>>,
}

/// A graph pattern tree; the parser builds this directly rather than via
/// an intermediate SPARQL-algebra-then-logical-plan pair, since this
/// crate's executor walks the tree straight into iterator combinators.
#[derive(Clone, Debug)]
pub enum GraphPattern {
    Empty,
    Bgp(Vec<TriplePattern>),
    Join(Box<GraphPattern>, Box<GraphPattern>),
    LeftJoin(Box<GraphPattern>, Box<GraphPattern>, Option<Expr>),
    Union(Box<GraphPattern>, Box<GraphPattern>),
    Minus(Box<GraphPattern>, Box<GraphPattern>),
    Graph(GraphTarget, Box<GraphPattern>),
    Filter(Expr, Box<GraphPattern>),
    Bind(Expr, Span, Box<GraphPattern>),
    Values(ValuesBlock),
    Subquery(Box<SelectQuery>),
}

#[derive(Clone, Debug)]
pub struct SelectQuery {
    pub prologue: Prologue,
    pub dataset: Dataset,
    pub projection: Projection,
    pub distinct: bool,
    pub pattern: GraphPattern,
    pub group_by: Vec<Expr>,
    pub having: Vec<Expr>,
    pub order_by: Vec<OrderExpr>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct AskQuery {
    pub prologue: Prologue,
    pub dataset: Dataset,
    pub pattern: GraphPattern,
}

#[derive(Clone, Debug)]
pub struct ConstructQuery {
    pub prologue: Prologue,
    pub dataset: Dataset,
    pub template: Vec<TriplePattern>,
    pub pattern: GraphPattern,
    pub distinct: bool,
    pub order_by: Vec<OrderExpr>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Clone, Debug)]
pub enum Query {
    Select(SelectQuery),
    Ask(AskQuery),
    Construct(ConstructQuery),
}

/// A quad pattern used in update DATA blocks and DELETE/INSERT WHERE
/// templates: like `TriplePattern` but with an explicit graph slot.
#[derive(Clone, Debug)]
pub struct QuadPattern {
    pub subject: TermPattern,
    pub predicate: TermPattern,
    pub object: TermPattern,
    pub graph: Option<TermPattern>,
}

#[derive(Clone, Debug)]
pub enum UpdateGraphTarget {
    Default,
    Named(TermPattern),
    All,
}

#[derive(Clone, Debug)]
pub enum GraphUpdateOperation {
    InsertData(Vec<QuadPattern>),
    DeleteData(Vec<QuadPattern>),
    DeleteInsert {
        delete: Vec<QuadPattern>,
        insert: Vec<QuadPattern>,
        dataset: Dataset,
        pattern: GraphPattern,
    },
    Clear(UpdateGraphTarget),
    Drop(UpdateGraphTarget),
    Create(UpdateGraphTarget),
    Copy(UpdateGraphTarget, UpdateGraphTarget),
    Move(UpdateGraphTarget, UpdateGraphTarget),
    Add(UpdateGraphTarget, UpdateGraphTarget),
}

#[derive(Clone, Debug)]
pub struct Update {
    pub prologue: Prologue,
    pub operations: Vec<GraphUpdateOperation>,
}

impl fmt::Display for TermKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Variable => "variable",
            Self::Iri => "iri",
            Self::BlankNode => "blank node",
            Self::Literal => "literal",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixed_name_expands_against_prologue() {
        let mut prologue = Prologue::default();
        prologue
            .prefixes
            .insert("ex".to_owned(), "http://example.org/".to_owned());
        let source = "ex:thing";
        let pattern = TermPattern::new(TermKind::Iri, Span::new(0, source.len()));
        let term = pattern.resolve(source, &prologue);
        assert_eq!(term, Term::named_node("http://example.org/thing"));
    }

    #[test]
    fn literal_with_language_tag_resolves() {
        let prologue = Prologue::default();
        let source = "\"bonjour\"@fr";
        let pattern = TermPattern::new(TermKind::Literal, Span::new(0, source.len()));
        let term = pattern.resolve(source, &prologue);
        assert_eq!(term, Term::language_literal("bonjour", "fr"));
    }

    #[test]
    fn bare_integer_literal_gets_xsd_integer_datatype() {
        let prologue = Prologue::default();
        let source = "42";
        let pattern = TermPattern::new(TermKind::Literal, Span::new(0, source.len()));
        let term = pattern.resolve(source, &prologue);
        assert_eq!(
            term,
            Term::typed_literal("42", "http://www.w3.org/2001/XMLSchema#integer")
        );
    }
}
