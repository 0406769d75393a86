//! N-Quads framing: one quad per line, byte-exact on round trip. This
//! module only does the line-level split into subject/predicate/object/
//! graph tokens; term lexical form itself is parsed and rendered by
//! [`crate::model::Term::parse_canonical`]/[`crate::model::Term::to_canonical_form`],
//! since chronograph already interns terms in that exact syntax.

use std::io::{self, Write};

use memchr::{memchr, memchr2};

use crate::model::{Quad, Term};

/// A malformed N-Quads line, with the byte offset into the source text
/// it was found at.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub offset: usize,
    pub message: String,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "N-Quads parse error at byte {}: {}", self.offset, self.message)
    }
}

impl std::error::Error for ParseError {}

impl From<ParseError> for crate::error::ChronographError {
    fn from(e: ParseError) -> Self {
        Self::Syntax {
            offset: e.offset,
            message: e.message,
        }
    }
}

fn err(offset: usize, message: impl Into<String>) -> ParseError {
    ParseError {
        offset,
        message: message.into(),
    }
}

/// Splits off the next whitespace-delimited term token, respecting
/// `<...>`, `_:...`, and quoted-literal-with-optional-`@lang`/`^^<dt>`
/// boundaries. Returns `(token, rest)`; `None` once only the line
/// terminator (`.`) or trailing whitespace is left.
fn next_token(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start_matches([' ', '\t']);
    let bytes = s.as_bytes();
    match bytes.first()? {
        b'<' => {
            let end = memchr(b'>', bytes)?;
            Some((&s[..=end], &s[end + 1..]))
        }
        b'_' => {
            let end = memchr2(b' ', b'\t', bytes).unwrap_or(bytes.len());
            Some((&s[..end], &s[end..]))
        }
        b'"' => {
            let mut i = 1;
            while i < bytes.len() {
                match bytes[i] {
                    b'\\' => i += 2,
                    b'"' => {
                        i += 1;
                        break;
                    }
                    _ => i += 1,
                }
            }
            let rest = &s[i..];
            if let Some(tail) = rest.strip_prefix('@') {
                let end = memchr2(b' ', b'\t', tail.as_bytes()).unwrap_or(tail.len());
                let total = i + 1 + end;
                Some((&s[..total], &s[total..]))
            } else if let Some(tail) = rest.strip_prefix("^^") {
                let dt_end = memchr(b'>', tail.as_bytes())?;
                let total = i + 2 + dt_end + 1;
                Some((&s[..total], &s[total..]))
            } else {
                Some((&s[..i], rest))
            }
        }
        _ => None,
    }
}

/// Parses a single N-Quads line. `Ok(None)` for a blank line or a `#`
/// comment (leading whitespace allowed before `#`).
pub fn parse_line(line: &str) -> Result<Option<Quad>, ParseError> {
    let trimmed = line.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let (subject_tok, rest) =
        next_token(trimmed).ok_or_else(|| err(0, "expected a subject term"))?;
    let (predicate_tok, rest) =
        next_token(rest).ok_or_else(|| err(line.len() - rest.len(), "expected a predicate term"))?;
    let (object_tok, rest) =
        next_token(rest).ok_or_else(|| err(line.len() - rest.len(), "expected an object term"))?;

    let after_object = rest.trim_start_matches([' ', '\t']);
    let (graph_tok, rest) = if after_object.starts_with('.') {
        (None, after_object)
    } else {
        let (tok, r) = next_token(after_object)
            .ok_or_else(|| err(line.len() - after_object.len(), "expected a graph term or '.'"))?;
        (Some(tok), r)
    };

    let rest = rest.trim_start_matches([' ', '\t']);
    if !rest.starts_with('.') {
        return Err(err(line.len() - rest.len(), "missing '.' line terminator"));
    }

    let subject = Term::parse_canonical(subject_tok)
        .ok_or_else(|| err(0, format!("invalid subject term {subject_tok:?}")))?;
    let predicate = Term::parse_canonical(predicate_tok)
        .ok_or_else(|| err(0, format!("invalid predicate term {predicate_tok:?}")))?;
    let object = Term::parse_canonical(object_tok)
        .ok_or_else(|| err(0, format!("invalid object term {object_tok:?}")))?;
    let graph = graph_tok
        .map(|t| Term::parse_canonical(t).ok_or_else(|| err(0, format!("invalid graph term {t:?}"))))
        .transpose()?;

    Ok(Some(Quad::new(subject, predicate, object, graph)))
}

/// Parses a complete N-Quads document, skipping comments and blank
/// lines. Offsets in any returned error are relative to `input`.
pub fn parse_str(input: &str) -> Result<Vec<Quad>, ParseError> {
    let mut quads = Vec::new();
    let mut offset = 0usize;
    for line in input.split('\n') {
        match parse_line(line) {
            Ok(Some(quad)) => quads.push(quad),
            Ok(None) => {}
            Err(e) => {
                return Err(err(offset + e.offset, e.message));
            }
        }
        offset += line.len() + 1;
    }
    Ok(quads)
}

/// Writes one quad as a single N-Quads line, terminated by `" .\n"`.
/// Triples in the default graph (`quad.graph.is_none()`) are written in
/// triple form rather than quad form.
pub fn write_quad<W: Write>(out: &mut W, quad: &Quad) -> io::Result<()> {
    write!(
        out,
        "{} {} {}",
        quad.subject.to_canonical_form(),
        quad.predicate.to_canonical_form(),
        quad.object.to_canonical_form()
    )?;
    if let Some(graph) = &quad.graph {
        write!(out, " {}", graph.to_canonical_form())?;
    }
    writeln!(out, " .")
}

/// Writes every quad in `quads`, in order, each on its own line.
pub fn write_all<'a, W: Write>(
    out: &mut W,
    quads: impl IntoIterator<Item = &'a Quad>,
) -> io::Result<()> {
    for quad in quads {
        write_quad(out, quad)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_triple_and_quad_forms() {
        let quads = vec![
            Quad::new(
                Term::named_node("http://example.com/s"),
                Term::named_node("http://example.com/p"),
                Term::plain_literal("hello world"),
                None,
            ),
            Quad::new(
                Term::named_node("http://example.com/s"),
                Term::named_node("http://example.com/p"),
                Term::typed_literal("42", "http://www.w3.org/2001/XMLSchema#integer"),
                Some(Term::named_node("http://example.com/g")),
            ),
        ];
        let mut buf = Vec::new();
        write_all(&mut buf, &quads).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let parsed = parse_str(&text).unwrap();
        assert_eq!(parsed.len(), quads.len());
        assert_eq!(parsed[0].subject, quads[0].subject);
        assert_eq!(parsed[0].graph, None);
        assert_eq!(parsed[1].graph, quads[1].graph);
    }

    #[test]
    fn skips_comments_and_blank_lines() {
        let text = "# a comment\n\n<http://e/s> <http://e/p> \"v\" .\n";
        let parsed = parse_str(text).unwrap();
        assert_eq!(parsed.len(), 1);
    }

    #[test]
    fn preserves_escaped_literal_content() {
        let quad = Quad::new(
            Term::named_node("http://e/s"),
            Term::named_node("http://e/p"),
            Term::plain_literal("line\\nbreak \"quoted\""),
            None,
        );
        let mut buf = Vec::new();
        write_quad(&mut buf, &quad).unwrap();
        let parsed = parse_str(&String::from_utf8(buf).unwrap()).unwrap();
        assert_eq!(parsed[0].object, quad.object);
    }

    #[test]
    fn rejects_missing_terminator() {
        let err = parse_line("<http://e/s> <http://e/p> \"v\"").unwrap_err();
        assert!(err.message.contains("terminator"));
    }
}
