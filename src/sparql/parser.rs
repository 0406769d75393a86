//! Recursive-descent parser building the [`super::algebra`] tree directly
//! from a token stream, in the same tokenize-then-parse shape
//! `spargebra`'s `peg`-generated parser follows — hand-written here
//! because the span-carrying AST this crate wants doesn't fall out of
//! `peg`'s owned-capture model without fighting the macro.

use super::algebra::*;
use super::lexer::{ident_eq, Lexer, Token, TokenKind};
use super::ParseError;

pub fn parse_query(source: &str) -> Result<Query, ParseError> {
    let tokens = Lexer::new(source).tokenize().map_err(|(o, m)| ParseError {
        offset: o,
        message: m,
    })?;
    let mut parser = Parser {
        source,
        tokens,
        pos: 0,
    };
    let prologue = parser.parse_prologue()?;
    let query = parser.parse_query_form(prologue)?;
    parser.expect_eof()?;
    Ok(query)
}

pub fn parse_update(source: &str) -> Result<Update, ParseError> {
    let tokens = Lexer::new(source).tokenize().map_err(|(o, m)| ParseError {
        offset: o,
        message: m,
    })?;
    let mut parser = Parser {
        source,
        tokens,
        pos: 0,
    };
    let prologue = parser.parse_prologue()?;
    let mut operations = Vec::new();
    loop {
        if parser.at_eof() {
            break;
        }
        operations.push(parser.parse_update_operation()?);
        if !parser.eat_punct(';') {
            break;
        }
    }
    parser.expect_eof()?;
    Ok(Update {
        prologue,
        operations,
    })
}

enum Fragment {
    Plain(GraphPattern),
    Optional(GraphPattern),
    Minus(GraphPattern),
    Filter(Expr),
    Bind(Expr, Span),
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Token {
        self.tokens[self.pos]
    }

    fn peek_ahead(&self, n: usize) -> Token {
        self.tokens[(self.pos + n).min(self.tokens.len() - 1)]
    }

    fn bump(&mut self) -> Token {
        let t = self.tokens[self.pos];
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn at_eof(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn expect_eof(&self) -> Result<(), ParseError> {
        if self.at_eof() {
            Ok(())
        } else {
            Err(self.error("expected end of input"))
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            offset: self.peek().span.start as usize,
            message: message.into(),
        }
    }

    fn text(&self, token: Token) -> &'a str {
        token.text(self.source)
    }

    fn at_ident(&self, kw: &str) -> bool {
        ident_eq(self.source, self.peek(), kw)
    }

    fn eat_ident(&mut self, kw: &str) -> bool {
        if self.at_ident(kw) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_ident(&mut self, kw: &str) -> Result<(), ParseError> {
        if self.eat_ident(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{kw}'")))
        }
    }

    fn at_punct(&self, ch: char) -> bool {
        let t = self.peek();
        t.kind == TokenKind::Punct && self.text(t) == ch.to_string()
    }

    fn eat_punct(&mut self, ch: char) -> bool {
        if self.at_punct(ch) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, ch: char) -> Result<(), ParseError> {
        if self.eat_punct(ch) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{ch}'")))
        }
    }

    fn at_op(&self, op: &str) -> bool {
        let t = self.peek();
        t.kind == TokenKind::Op && self.text(t) == op
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.at_op(op) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_var(&mut self) -> Result<Span, ParseError> {
        let t = self.peek();
        if t.kind == TokenKind::Var {
            self.bump();
            Ok(t.span)
        } else {
            Err(self.error("expected variable"))
        }
    }

    // ---- prologue ----

    fn parse_prologue(&mut self) -> Result<Prologue, ParseError> {
        let mut prologue = Prologue::default();
        loop {
            if self.eat_ident("BASE") {
                let t = self.peek();
                if t.kind != TokenKind::IriRef {
                    return Err(self.error("expected IRI after BASE"));
                }
                self.bump();
                let iri = self.text(t);
                prologue.base = Some(iri[1..iri.len() - 1].to_owned());
            } else if self.eat_ident("PREFIX") {
                let t = self.peek();
                if t.kind != TokenKind::PrefixedName {
                    return Err(self.error("expected prefix name after PREFIX"));
                }
                self.bump();
                let raw = self.text(t);
                let prefix = raw.trim_end_matches(':').to_owned();
                let iri_tok = self.peek();
                if iri_tok.kind != TokenKind::IriRef {
                    return Err(self.error("expected IRI after prefix declaration"));
                }
                self.bump();
                let iri = self.text(iri_tok);
                prologue
                    .prefixes
                    .insert(prefix, iri[1..iri.len() - 1].to_owned());
            } else {
                break;
            }
        }
        Ok(prologue)
    }

    fn parse_query_form(&mut self, prologue: Prologue) -> Result<Query, ParseError> {
        if self.at_ident("SELECT") {
            Ok(Query::Select(self.parse_select_query_body(prologue)?))
        } else if self.eat_ident("ASK") {
            let dataset = self.parse_dataset_clauses()?;
            self.expect_ident_case("WHERE")?;
            let pattern = self.parse_group_graph_pattern()?;
            Ok(Query::Ask(AskQuery {
                prologue,
                dataset,
                pattern,
            }))
        } else if self.eat_ident("CONSTRUCT") {
            self.parse_construct_query(prologue)
        } else {
            Err(self.error("expected SELECT, ASK, or CONSTRUCT"))
        }
    }

    fn expect_ident_case(&mut self, kw: &str) -> Result<(), ParseError> {
        // WHERE is optional per the grammar before a group graph pattern in
        // some forms, but we always require it explicitly here for clarity.
        if self.eat_ident(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected {kw}")))
        }
    }

    fn parse_select_query_body(&mut self, prologue: Prologue) -> Result<SelectQuery, ParseError> {
        self.expect_ident("SELECT")?;
        let distinct = self.eat_ident("DISTINCT");
        if !distinct {
            self.eat_ident("REDUCED");
        }
        let projection = self.parse_projection()?;
        let dataset = self.parse_dataset_clauses()?;
        self.expect_ident("WHERE")?;
        let pattern = self.parse_group_graph_pattern()?;
        let group_by = self.parse_group_by()?;
        let having = self.parse_having()?;
        let order_by = self.parse_order_by()?;
        let (limit, offset) = self.parse_limit_offset()?;
        Ok(SelectQuery {
            prologue,
            dataset,
            projection,
            distinct,
            pattern,
            group_by,
            having,
            order_by,
            limit,
            offset,
        })
    }

    fn parse_projection(&mut self) -> Result<Projection, ParseError> {
        if self.eat_op("*") {
            return Ok(Projection::All);
        }
        let mut items = Vec::new();
        loop {
            if self.peek().kind == TokenKind::Var {
                let span = self.bump().span;
                items.push(ProjectionItem::Var(span));
            } else if self.eat_punct('(') {
                let expr = self.parse_expression()?;
                self.expect_ident("AS")?;
                let alias = self.expect_var()?;
                self.expect_punct(')')?;
                items.push(ProjectionItem::Expr { expr, alias });
            } else {
                break;
            }
        }
        if items.is_empty() {
            return Err(self.error("expected a projection list"));
        }
        Ok(Projection::Items(items))
    }

    fn parse_dataset_clauses(&mut self) -> Result<Dataset, ParseError> {
        let mut dataset = Dataset::default();
        while self.eat_ident("FROM") {
            if self.eat_ident("NAMED") {
                dataset.named.push(self.parse_iri_term()?);
            } else {
                dataset.default.push(self.parse_iri_term()?);
            }
        }
        Ok(dataset)
    }

    fn parse_iri_term(&mut self) -> Result<TermPattern, ParseError> {
        let t = self.peek();
        if t.kind == TokenKind::IriRef || t.kind == TokenKind::PrefixedName {
            self.bump();
            Ok(TermPattern::new(TermKind::Iri, t.span))
        } else {
            Err(self.error("expected an IRI"))
        }
    }

    fn parse_group_by(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut out = Vec::new();
        if self.eat_ident("GROUP") {
            self.expect_ident("BY")?;
            loop {
                if self.peek().kind == TokenKind::Var {
                    let span = self.bump().span;
                    out.push(Expr {
                        kind: ExprKind::Term(TermPattern::new(TermKind::Variable, span)),
                        span,
                    });
                } else if self.at_punct('(') {
                    self.bump();
                    let expr = self.parse_expression()?;
                    if self.eat_ident("AS") {
                        self.expect_var()?;
                    }
                    self.expect_punct(')')?;
                    out.push(expr);
                } else {
                    break;
                }
            }
        }
        Ok(out)
    }

    fn parse_having(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut out = Vec::new();
        if self.eat_ident("HAVING") {
            out.push(self.parse_constraint()?);
        }
        Ok(out)
    }

    fn parse_order_by(&mut self) -> Result<Vec<OrderExpr>, ParseError> {
        let mut out = Vec::new();
        if self.eat_ident("ORDER") {
            self.expect_ident("BY")?;
            loop {
                if self.eat_ident("ASC") {
                    self.expect_punct('(')?;
                    let expr = self.parse_expression()?;
                    self.expect_punct(')')?;
                    out.push(OrderExpr {
                        expr,
                        direction: SortDirection::Asc,
                    });
                } else if self.eat_ident("DESC") {
                    self.expect_punct('(')?;
                    let expr = self.parse_expression()?;
                    self.expect_punct(')')?;
                    out.push(OrderExpr {
                        expr,
                        direction: SortDirection::Desc,
                    });
                } else if self.peek().kind == TokenKind::Var || self.at_punct('(') {
                    let expr = self.parse_expression()?;
                    out.push(OrderExpr {
                        expr,
                        direction: SortDirection::Asc,
                    });
                } else {
                    break;
                }
            }
        }
        Ok(out)
    }

    fn parse_limit_offset(&mut self) -> Result<(Option<u64>, Option<u64>), ParseError> {
        let mut limit = None;
        let mut offset = None;
        loop {
            if self.eat_ident("LIMIT") {
                limit = Some(self.expect_integer()?);
            } else if self.eat_ident("OFFSET") {
                offset = Some(self.expect_integer()?);
            } else {
                break;
            }
        }
        Ok((limit, offset))
    }

    fn expect_integer(&mut self) -> Result<u64, ParseError> {
        let t = self.peek();
        if t.kind != TokenKind::Numeric {
            return Err(self.error("expected an integer"));
        }
        self.bump();
        self.text(t)
            .parse::<u64>()
            .map_err(|_| self.error("expected a non-negative integer"))
    }

    fn parse_construct_query(&mut self, prologue: Prologue) -> Result<Query, ParseError> {
        self.expect_punct('{')?;
        let mut template = Vec::new();
        loop {
            if self.at_punct('}') {
                break;
            }
            self.parse_triples_same_subject(&mut template)?;
            if !self.eat_punct('.') {
                break;
            }
        }
        self.expect_punct('}')?;
        let dataset = self.parse_dataset_clauses()?;
        self.expect_ident("WHERE")?;
        let pattern = self.parse_group_graph_pattern()?;
        let order_by = self.parse_order_by()?;
        let (limit, offset) = self.parse_limit_offset()?;
        Ok(Query::Construct(ConstructQuery {
            prologue,
            dataset,
            template,
            pattern,
            distinct: false,
            order_by,
            limit,
            offset,
        }))
    }

    // ---- graph patterns ----

    fn parse_group_graph_pattern(&mut self) -> Result<GraphPattern, ParseError> {
        self.expect_punct('{')?;
        if self.at_ident("SELECT") {
            let sub = self.parse_select_query_body(Prologue::default())?;
            self.expect_punct('}')?;
            return Ok(GraphPattern::Subquery(Box::new(sub)));
        }
        let pattern = self.parse_group_graph_pattern_sub()?;
        self.expect_punct('}')?;
        Ok(pattern)
    }

    fn parse_group_graph_pattern_sub(&mut self) -> Result<GraphPattern, ParseError> {
        let mut acc = GraphPattern::Empty;
        loop {
            while self.eat_punct('.') {}
            if self.at_punct('}') {
                break;
            }
            if self.looks_like_triple_start() {
                let bgp = self.parse_triples_block()?;
                acc = join(acc, bgp);
                continue;
            }
            let fragment = self.parse_graph_pattern_not_triples()?;
            match fragment {
                Fragment::Optional(inner) => {
                    acc = GraphPattern::LeftJoin(Box::new(acc), Box::new(inner), None);
                }
                Fragment::Minus(inner) => {
                    acc = GraphPattern::Minus(Box::new(acc), Box::new(inner));
                }
                Fragment::Filter(expr) => {
                    acc = GraphPattern::Filter(expr, Box::new(acc));
                }
                Fragment::Bind(expr, var) => {
                    acc = GraphPattern::Bind(expr, var, Box::new(acc));
                }
                Fragment::Plain(mut pat) => {
                    while self.eat_ident("UNION") {
                        let rhs = self.parse_group_graph_pattern()?;
                        pat = GraphPattern::Union(Box::new(pat), Box::new(rhs));
                    }
                    acc = join(acc, pat);
                }
            }
            self.eat_punct('.');
        }
        Ok(acc)
    }

    fn parse_graph_pattern_not_triples(&mut self) -> Result<Fragment, ParseError> {
        if self.eat_ident("OPTIONAL") {
            return Ok(Fragment::Optional(self.parse_group_graph_pattern()?));
        }
        if self.eat_ident("MINUS") {
            return Ok(Fragment::Minus(self.parse_group_graph_pattern()?));
        }
        if self.eat_ident("GRAPH") {
            let target = self.parse_graph_target()?;
            let inner = self.parse_group_graph_pattern()?;
            return Ok(Fragment::Plain(GraphPattern::Graph(target, Box::new(inner))));
        }
        if self.eat_ident("FILTER") {
            return Ok(Fragment::Filter(self.parse_constraint()?));
        }
        if self.eat_ident("BIND") {
            self.expect_punct('(')?;
            let expr = self.parse_expression()?;
            self.expect_ident("AS")?;
            let var = self.expect_var()?;
            self.expect_punct(')')?;
            return Ok(Fragment::Bind(expr, var));
        }
        if self.eat_ident("VALUES") {
            return Ok(Fragment::Plain(GraphPattern::Values(
                self.parse_values_block()?,
            )));
        }
        if self.at_punct('{') {
            return Ok(Fragment::Plain(self.parse_group_graph_pattern()?));
        }
        Err(self.error("expected a graph pattern"))
    }

    fn parse_graph_target(&mut self) -> Result<GraphTarget, ParseError> {
        if self.peek().kind == TokenKind::Var {
            let span = self.bump().span;
            Ok(GraphTarget::Named(TermPattern::new(
                TermKind::Variable,
                span,
            )))
        } else {
            Ok(GraphTarget::Named(self.parse_iri_term()?))
        }
    }

    fn parse_values_block(&mut self) -> Result<ValuesBlock, ParseError> {
        let mut vars = Vec::new();
        if self.eat_punct('(') {
            while self.peek().kind == TokenKind::Var {
                vars.push(self.bump().span);
            }
            self.expect_punct(')')?;
        } else {
            vars.push(self.expect_var()?);
        }
        self.expect_punct('{')?;
        let mut rows = Vec::new();
        loop {
            if self.at_punct('}') {
                break;
            }
            let multi = self.eat_punct('(');
            let mut row = Vec::new();
            if multi {
                while !self.at_punct(')') {
                    row.push(self.parse_values_cell()?);
                }
                self.expect_punct(')')?;
            } else {
                row.push(self.parse_values_cell()?);
            }
            rows.push(row);
        }
        self.expect_punct('}')?;
        Ok(ValuesBlock { vars, rows })
    }

    fn parse_values_cell(&mut self) -> Result<Option<TermPattern>, ParseError> {
        if self.eat_ident("UNDEF") {
            Ok(None)
        } else {
            Ok(Some(self.parse_term_pattern()?))
        }
    }

    fn looks_like_triple_start(&self) -> bool {
        matches!(
            self.peek().kind,
            TokenKind::Var
                | TokenKind::IriRef
                | TokenKind::PrefixedName
                | TokenKind::BlankNodeLabel
                | TokenKind::AnonBlankNode
                | TokenKind::String
                | TokenKind::Numeric
        )
    }

    fn parse_triples_block(&mut self) -> Result<GraphPattern, ParseError> {
        let mut triples = Vec::new();
        loop {
            self.parse_triples_same_subject(&mut triples)?;
            if self.eat_punct('.') {
                if self.looks_like_triple_start() {
                    continue;
                }
            }
            break;
        }
        Ok(GraphPattern::Bgp(triples))
    }

    fn parse_triples_same_subject(&mut self, out: &mut Vec<TriplePattern>) -> Result<(), ParseError> {
        let subject = self.parse_term_pattern()?;
        loop {
            let predicate = self.parse_verb()?;
            loop {
                let object = self.parse_term_pattern()?;
                out.push(TriplePattern {
                    subject,
                    predicate,
                    object,
                });
                if self.eat_punct(',') {
                    continue;
                }
                break;
            }
            if self.eat_punct(';') {
                if self.at_punct('.') || self.at_punct('}') || !self.looks_like_verb_start() {
                    break;
                }
                continue;
            }
            break;
        }
        Ok(())
    }

    fn looks_like_verb_start(&self) -> bool {
        self.looks_like_triple_start() || self.at_ident("a")
    }

    fn parse_verb(&mut self) -> Result<TermPattern, ParseError> {
        let t = self.peek();
        if ident_eq(self.source, t, "a") {
            self.bump();
            return Ok(TermPattern::new(TermKind::Iri, t.span));
        }
        self.parse_term_pattern()
    }

    fn parse_term_pattern(&mut self) -> Result<TermPattern, ParseError> {
        let t = self.peek();
        match t.kind {
            TokenKind::Var => {
                self.bump();
                Ok(TermPattern::new(TermKind::Variable, t.span))
            }
            TokenKind::IriRef | TokenKind::PrefixedName => {
                self.bump();
                Ok(TermPattern::new(TermKind::Iri, t.span))
            }
            TokenKind::BlankNodeLabel | TokenKind::AnonBlankNode => {
                self.bump();
                Ok(TermPattern::new(TermKind::BlankNode, t.span))
            }
            TokenKind::String | TokenKind::Numeric => {
                self.bump();
                Ok(TermPattern::new(TermKind::Literal, t.span))
            }
            TokenKind::Ident if ident_eq(self.source, t, "true") || ident_eq(self.source, t, "false") => {
                self.bump();
                Ok(TermPattern::new(TermKind::Literal, t.span))
            }
            _ => Err(self.error("expected an RDF term")),
        }
    }

    // ---- expressions ----

    fn parse_constraint(&mut self) -> Result<Expr, ParseError> {
        self.parse_bracketted_or_primary()
    }

    fn parse_bracketted_or_primary(&mut self) -> Result<Expr, ParseError> {
        if self.at_punct('(') {
            return self.parse_expression_parenthesized();
        }
        self.parse_primary_expression()
    }

    fn parse_expression_parenthesized(&mut self) -> Result<Expr, ParseError> {
        let start = self.peek().span.start as usize;
        self.expect_punct('(')?;
        let expr = self.parse_expression()?;
        self.expect_punct(')')?;
        let end = self.tokens[self.pos.saturating_sub(1)].span.start as usize + 1;
        Ok(Expr {
            kind: expr.kind,
            span: Span::new(start, end - start),
        })
    }

    fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        self.parse_conditional_or()
    }

    fn parse_conditional_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_conditional_and()?;
        while self.eat_op("||") {
            let right = self.parse_conditional_and()?;
            left = combine(ExprKind::Or(Box::new(left), Box::new(right)), left_span(&left));
        }
        Ok(left)
    }

    fn parse_conditional_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_value_logical()?;
        while self.eat_op("&&") {
            let right = self.parse_value_logical()?;
            left = combine(ExprKind::And(Box::new(left), Box::new(right)), left_span(&left));
        }
        Ok(left)
    }

    fn parse_value_logical(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_numeric_expression()?;
        let span = left.span;
        if self.eat_ident("NOT") {
            self.expect_ident("IN")?;
            let list = self.parse_expression_list()?;
            return Ok(Expr {
                kind: ExprKind::In(Box::new(left), list, true),
                span,
            });
        }
        if self.eat_ident("IN") {
            let list = self.parse_expression_list()?;
            return Ok(Expr {
                kind: ExprKind::In(Box::new(left), list, false),
                span,
            });
        }
        let op = if self.eat_op("=") {
            Some(CompareOp::Eq)
        } else if self.eat_op("!=") {
            Some(CompareOp::Ne)
        } else if self.eat_op("<=") {
            Some(CompareOp::Le)
        } else if self.eat_op(">=") {
            Some(CompareOp::Ge)
        } else if self.eat_op("<") {
            Some(CompareOp::Lt)
        } else if self.eat_op(">") {
            Some(CompareOp::Gt)
        } else {
            None
        };
        if let Some(op) = op {
            let right = self.parse_numeric_expression()?;
            return Ok(Expr {
                kind: ExprKind::Compare(op, Box::new(left), Box::new(right)),
                span,
            });
        }
        Ok(left)
    }

    fn parse_expression_list(&mut self) -> Result<Vec<Expr>, ParseError> {
        self.expect_punct('(')?;
        let mut out = Vec::new();
        if !self.at_punct(')') {
            loop {
                out.push(self.parse_expression()?);
                if self.eat_punct(',') {
                    continue;
                }
                break;
            }
        }
        self.expect_punct(')')?;
        Ok(out)
    }

    fn parse_numeric_expression(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_multiplicative_expression()?;
        loop {
            if self.eat_op("+") {
                let right = self.parse_multiplicative_expression()?;
                left = combine(
                    ExprKind::Arith(ArithOp::Add, Box::new(left), Box::new(right)),
                    left_span(&left),
                );
            } else if self.eat_op("-") {
                let right = self.parse_multiplicative_expression()?;
                left = combine(
                    ExprKind::Arith(ArithOp::Sub, Box::new(left), Box::new(right)),
                    left_span(&left),
                );
            } else {
                break;
            }
        }
        Ok(left)
    }

    fn parse_multiplicative_expression(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary_expression()?;
        loop {
            if self.eat_op("*") {
                let right = self.parse_unary_expression()?;
                left = combine(
                    ExprKind::Arith(ArithOp::Mul, Box::new(left), Box::new(right)),
                    left_span(&left),
                );
            } else if self.eat_op("/") {
                let right = self.parse_unary_expression()?;
                left = combine(
                    ExprKind::Arith(ArithOp::Div, Box::new(left), Box::new(right)),
                    left_span(&left),
                );
            } else {
                break;
            }
        }
        Ok(left)
    }

    fn parse_unary_expression(&mut self) -> Result<Expr, ParseError> {
        let span = self.peek().span;
        if self.eat_op("!") {
            let inner = self.parse_unary_expression()?;
            return Ok(Expr {
                kind: ExprKind::Not(Box::new(inner)),
                span,
            });
        }
        if self.eat_op("+") {
            return self.parse_unary_expression();
        }
        if self.eat_op("-") {
            let inner = self.parse_unary_expression()?;
            return Ok(Expr {
                kind: ExprKind::Negate(Box::new(inner)),
                span,
            });
        }
        self.parse_primary_expression()
    }

    fn parse_primary_expression(&mut self) -> Result<Expr, ParseError> {
        let t = self.peek();
        if t.kind == TokenKind::Punct && self.text(t) == "(" {
            return self.parse_expression_parenthesized();
        }
        if self.at_ident("EXISTS") {
            self.bump();
            let pattern = self.parse_group_graph_pattern()?;
            return Ok(Expr {
                kind: ExprKind::Exists(Box::new(pattern), false),
                span: t.span,
            });
        }
        if self.at_ident("NOT") && ident_eq(self.source, self.peek_ahead(1), "EXISTS") {
            self.bump();
            self.bump();
            let pattern = self.parse_group_graph_pattern()?;
            return Ok(Expr {
                kind: ExprKind::Exists(Box::new(pattern), true),
                span: t.span,
            });
        }
        match t.kind {
            TokenKind::Var => {
                self.bump();
                Ok(Expr {
                    kind: ExprKind::Term(TermPattern::new(TermKind::Variable, t.span)),
                    span: t.span,
                })
            }
            TokenKind::IriRef | TokenKind::PrefixedName => {
                self.bump();
                if self.at_punct('(') {
                    return self.parse_call_args(t.span, false);
                }
                Ok(Expr {
                    kind: ExprKind::Term(TermPattern::new(TermKind::Iri, t.span)),
                    span: t.span,
                })
            }
            TokenKind::String | TokenKind::Numeric => {
                self.bump();
                Ok(Expr {
                    kind: ExprKind::Term(TermPattern::new(TermKind::Literal, t.span)),
                    span: t.span,
                })
            }
            TokenKind::BlankNodeLabel | TokenKind::AnonBlankNode => {
                self.bump();
                Ok(Expr {
                    kind: ExprKind::Term(TermPattern::new(TermKind::BlankNode, t.span)),
                    span: t.span,
                })
            }
            TokenKind::Ident => {
                self.bump();
                let name = self.text(t);
                if name.eq_ignore_ascii_case("true") || name.eq_ignore_ascii_case("false") {
                    return Ok(Expr {
                        kind: ExprKind::Term(TermPattern::new(TermKind::Literal, t.span)),
                        span: t.span,
                    });
                }
                if name.eq_ignore_ascii_case("COUNT")
                    || name.eq_ignore_ascii_case("SUM")
                    || name.eq_ignore_ascii_case("AVG")
                    || name.eq_ignore_ascii_case("MIN")
                    || name.eq_ignore_ascii_case("MAX")
                    || name.eq_ignore_ascii_case("GROUP_CONCAT")
                    || name.eq_ignore_ascii_case("SAMPLE")
                {
                    return self.parse_aggregate_call(t.span);
                }
                self.parse_call_args(t.span, false)
            }
            _ => Err(self.error("expected an expression")),
        }
    }

    fn parse_aggregate_call(&mut self, name: Span) -> Result<Expr, ParseError> {
        self.expect_punct('(')?;
        let distinct = self.eat_ident("DISTINCT");
        if self.eat_op("*") {
            self.expect_punct(')')?;
            return Ok(Expr {
                kind: ExprKind::Call(CallExpr {
                    name,
                    args: Vec::new(),
                    distinct,
                    wildcard: true,
                }),
                span: name,
            });
        }
        let mut args = Vec::new();
        if !self.at_punct(')') {
            loop {
                args.push(self.parse_expression()?);
                if self.eat_punct(',') {
                    if self.at_ident("SEPARATOR") {
                        break;
                    }
                    continue;
                }
                break;
            }
        }
        if self.eat_punct(',') || self.eat_ident("SEPARATOR") {
            self.eat_op("=");
            if self.peek().kind == TokenKind::String {
                self.bump();
            }
        }
        self.expect_punct(')')?;
        Ok(Expr {
            kind: ExprKind::Call(CallExpr {
                name,
                args,
                distinct,
                wildcard: false,
            }),
            span: name,
        })
    }

    fn parse_call_args(&mut self, name: Span, distinct: bool) -> Result<Expr, ParseError> {
        self.expect_punct('(')?;
        let distinct = distinct || self.eat_ident("DISTINCT");
        let mut args = Vec::new();
        if !self.at_punct(')') {
            loop {
                args.push(self.parse_expression()?);
                if self.eat_punct(',') {
                    continue;
                }
                break;
            }
        }
        self.expect_punct(')')?;
        Ok(Expr {
            kind: ExprKind::Call(CallExpr {
                name,
                args,
                distinct,
                wildcard: false,
            }),
            span: name,
        })
    }

    // ---- updates ----

    fn parse_update_operation(&mut self) -> Result<GraphUpdateOperation, ParseError> {
        if self.eat_ident("INSERT") {
            self.expect_ident("DATA")?;
            let quads = self.parse_quad_data()?;
            return Ok(GraphUpdateOperation::InsertData(quads));
        }
        if self.eat_ident("DELETE") {
            if self.eat_ident("DATA") {
                let quads = self.parse_quad_data()?;
                return Ok(GraphUpdateOperation::DeleteData(quads));
            }
            if self.eat_ident("WHERE") {
                let quads = self.parse_quad_pattern_block()?;
                let pattern = quads_to_pattern(&quads);
                return Ok(GraphUpdateOperation::DeleteInsert {
                    delete: quads,
                    insert: Vec::new(),
                    dataset: Dataset::default(),
                    pattern,
                });
            }
            let delete = self.parse_quad_pattern_block()?;
            let mut insert = Vec::new();
            if self.eat_ident("INSERT") {
                insert = self.parse_quad_pattern_block()?;
            }
            let dataset = self.parse_dataset_clauses()?;
            self.expect_ident("WHERE")?;
            let pattern = self.parse_group_graph_pattern()?;
            return Ok(GraphUpdateOperation::DeleteInsert {
                delete,
                insert,
                dataset,
                pattern,
            });
        }
        if self.eat_ident("CLEAR") {
            self.eat_ident("SILENT");
            return Ok(GraphUpdateOperation::Clear(self.parse_update_target()?));
        }
        if self.eat_ident("DROP") {
            self.eat_ident("SILENT");
            return Ok(GraphUpdateOperation::Drop(self.parse_update_target()?));
        }
        if self.eat_ident("CREATE") {
            self.eat_ident("SILENT");
            return Ok(GraphUpdateOperation::Create(self.parse_update_target()?));
        }
        if self.eat_ident("COPY") {
            self.eat_ident("SILENT");
            let from = self.parse_update_target()?;
            self.expect_ident("TO")?;
            let to = self.parse_update_target()?;
            return Ok(GraphUpdateOperation::Copy(from, to));
        }
        if self.eat_ident("MOVE") {
            self.eat_ident("SILENT");
            let from = self.parse_update_target()?;
            self.expect_ident("TO")?;
            let to = self.parse_update_target()?;
            return Ok(GraphUpdateOperation::Move(from, to));
        }
        if self.eat_ident("ADD") {
            self.eat_ident("SILENT");
            let from = self.parse_update_target()?;
            self.expect_ident("TO")?;
            let to = self.parse_update_target()?;
            return Ok(GraphUpdateOperation::Add(from, to));
        }
        Err(self.error("expected an update operation"))
    }

    fn parse_update_target(&mut self) -> Result<UpdateGraphTarget, ParseError> {
        if self.eat_ident("DEFAULT") {
            Ok(UpdateGraphTarget::Default)
        } else if self.eat_ident("ALL") || self.eat_ident("NAMED") {
            Ok(UpdateGraphTarget::All)
        } else if self.eat_ident("GRAPH") {
            Ok(UpdateGraphTarget::Named(self.parse_iri_term()?))
        } else {
            Ok(UpdateGraphTarget::Named(self.parse_iri_term()?))
        }
    }

    fn parse_quad_data(&mut self) -> Result<Vec<QuadPattern>, ParseError> {
        self.parse_quad_pattern_block()
    }

    fn parse_quad_pattern_block(&mut self) -> Result<Vec<QuadPattern>, ParseError> {
        self.expect_punct('{')?;
        let mut out = Vec::new();
        loop {
            while self.eat_punct('.') {}
            if self.at_punct('}') {
                break;
            }
            if self.eat_ident("GRAPH") {
                let graph = self.parse_iri_term()?;
                self.expect_punct('{')?;
                self.parse_quad_triples(Some(graph), &mut out)?;
                self.expect_punct('}')?;
            } else {
                self.parse_quad_triples(None, &mut out)?;
            }
        }
        self.expect_punct('}')?;
        Ok(out)
    }

    fn parse_quad_triples(
        &mut self,
        graph: Option<TermPattern>,
        out: &mut Vec<QuadPattern>,
    ) -> Result<(), ParseError> {
        let mut triples = Vec::new();
        loop {
            if !self.looks_like_triple_start() {
                break;
            }
            self.parse_triples_same_subject(&mut triples)?;
            if self.eat_punct('.') {
                if self.looks_like_triple_start() {
                    continue;
                }
            }
            break;
        }
        for t in triples {
            out.push(QuadPattern {
                subject: t.subject,
                predicate: t.predicate,
                object: t.object,
                graph,
            });
        }
        Ok(())
    }
}

fn left_span(expr: &Expr) -> Span {
    expr.span
}

fn combine(kind: ExprKind, span: Span) -> Expr {
    Expr { kind, span }
}

fn join(acc: GraphPattern, next: GraphPattern) -> GraphPattern {
    match acc {
        GraphPattern::Empty => next,
        other => GraphPattern::Join(Box::new(other), Box::new(next)),
    }
}

/// DELETE WHERE reuses its quad-pattern block as both the pattern to
/// match and the template to delete; this turns the quads back into a
/// group graph pattern for the matching side.
fn quads_to_pattern(quads: &[QuadPattern]) -> GraphPattern {
    let triples: Vec<TriplePattern> = quads
        .iter()
        .map(|q| TriplePattern {
            subject: q.subject,
            predicate: q.predicate,
            object: q.object,
        })
        .collect();
    GraphPattern::Bgp(triples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_select() {
        let q = parse_query("SELECT ?s ?p ?o WHERE { ?s ?p ?o }").unwrap();
        match q {
            Query::Select(sel) => {
                assert!(matches!(sel.projection, Projection::Items(items) if items.len() == 3));
                assert!(matches!(sel.pattern, GraphPattern::Bgp(_)));
            }
            _ => panic!("expected a SELECT query"),
        }
    }

    #[test]
    fn parses_prefixed_names_and_filter() {
        let q = parse_query(
            "PREFIX ex: <http://example.org/> SELECT ?s WHERE { ?s ex:age ?age . FILTER(?age > 18) }",
        )
        .unwrap();
        match q {
            Query::Select(sel) => assert!(matches!(sel.pattern, GraphPattern::Filter(_, _))),
            _ => panic!("expected SELECT"),
        }
    }

    #[test]
    fn parses_optional_and_union() {
        let q = parse_query(
            "SELECT * WHERE { { ?s ?p ?o } UNION { ?s ?p2 ?o2 } OPTIONAL { ?s ?q ?r } }",
        )
        .unwrap();
        match q {
            Query::Select(sel) => assert!(matches!(sel.pattern, GraphPattern::LeftJoin(_, _, _))),
            _ => panic!("expected SELECT"),
        }
    }

    #[test]
    fn parses_insert_data_update() {
        let u = parse_update(
            "PREFIX ex: <http://example.org/> INSERT DATA { ex:s ex:p \"v\" }",
        )
        .unwrap();
        assert_eq!(u.operations.len(), 1);
        assert!(matches!(
            u.operations[0],
            GraphUpdateOperation::InsertData(_)
        ));
    }

    #[test]
    fn rejects_malformed_query_with_offset() {
        let err = parse_query("SELECT ?s WHERE ?s ?p ?o }").unwrap_err();
        assert!(err.offset > 0);
    }
}
