//! RDF term representation.
//!
//! Terms are kept in their canonical lexical form end to end: the atom
//! store interns the exact bytes it is given and the tag (IRI / blank node
//! / literal) is recovered by inspecting the first byte of that form.
//! `Term` is the owned, parsed view used above the atom boundary;
//! `TermRef` borrows from it the way `oxrdf::TermRef` borrows from
//! `oxrdf::Term`.

use std::fmt;

/// An owned RDF term in canonical lexical form.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Term {
    NamedNode(String),
    BlankNode(String),
    Literal(Literal),
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Literal {
    Plain(String),
    LanguageTagged { value: String, language: String },
    Typed { value: String, datatype: String },
}

impl Term {
    pub fn named_node(iri: impl Into<String>) -> Self {
        Self::NamedNode(iri.into())
    }

    pub fn blank_node(id: impl Into<String>) -> Self {
        Self::BlankNode(id.into())
    }

    pub fn plain_literal(value: impl Into<String>) -> Self {
        Self::Literal(Literal::Plain(value.into()))
    }

    pub fn language_literal(value: impl Into<String>, language: impl Into<String>) -> Self {
        Self::Literal(Literal::LanguageTagged {
            value: value.into(),
            language: language.into(),
        })
    }

    pub fn typed_literal(value: impl Into<String>, datatype: impl Into<String>) -> Self {
        Self::Literal(Literal::Typed {
            value: value.into(),
            datatype: datatype.into(),
        })
    }

    pub fn is_named_node(&self) -> bool {
        matches!(self, Self::NamedNode(_))
    }

    pub fn is_blank_node(&self) -> bool {
        matches!(self, Self::BlankNode(_))
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Self::Literal(_))
    }

    /// Renders the canonical lexical form chronograph interns: the same
    /// bytes `parse_canonical` expects back, so that interning is a
    /// pure round trip.
    pub fn to_canonical_form(&self) -> String {
        match self {
            Self::NamedNode(iri) => format!("<{iri}>"),
            Self::BlankNode(id) => format!("_:{id}"),
            Self::Literal(Literal::Plain(v)) => format!("\"{}\"", escape(v)),
            Self::Literal(Literal::LanguageTagged { value, language }) => {
                format!("\"{}\"@{}", escape(value), language)
            }
            Self::Literal(Literal::Typed { value, datatype }) => {
                format!("\"{}\"^^<{}>", escape(value), datatype)
            }
        }
    }

    /// Parses a canonical lexical form back into a `Term`, inspecting only
    /// the first byte to pick the tag
    pub fn parse_canonical(text: &str) -> Option<Self> {
        let bytes = text.as_bytes();
        match *bytes.first()? {
            b'<' => {
                let inner = text.strip_prefix('<')?.strip_suffix('>')?;
                Some(Self::NamedNode(inner.to_owned()))
            }
            b'_' if text.starts_with("_:") => Some(Self::BlankNode(text[2..].to_owned())),
            b'"' => parse_literal(text),
            _ => None,
        }
    }

    pub fn effective_string(&self) -> &str {
        match self {
            Self::NamedNode(s) | Self::BlankNode(s) => s,
            Self::Literal(Literal::Plain(v))
            | Self::Literal(Literal::LanguageTagged { value: v, .. })
            | Self::Literal(Literal::Typed { value: v, .. }) => v,
        }
    }
}

fn parse_literal(text: &str) -> Option<Term> {
    let rest = &text[1..];
    let end = find_closing_quote(rest)?;
    let value = unescape(&rest[..end]);
    let tail = &rest[end + 1..];
    if let Some(datatype) = tail.strip_prefix("^^<").and_then(|s| s.strip_suffix('>')) {
        Some(Term::typed_literal(value, datatype))
    } else if let Some(lang) = tail.strip_prefix('@') {
        Some(Term::language_literal(value, lang))
    } else if tail.is_empty() {
        Some(Term::plain_literal(value))
    } else {
        None
    }
}

fn find_closing_quote(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return Some(i),
            _ => i += 1,
        }
    }
    None
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape(s: &str) -> String {
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
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                if let Ok(code) = u32::from_str_radix(&hex, 16) {
                    if let Some(c) = char::from_u32(code) {
                        out.push(c);
                    }
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_canonical_form())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_all_term_kinds() {
        let terms = vec![
            Term::named_node("http://example.com/s"),
            Term::blank_node("b1"),
            Term::plain_literal("hello"),
            Term::language_literal("bonjour", "fr"),
            Term::typed_literal("42", "http://www.w3.org/2001/XMLSchema#integer"),
        ];
        for term in terms {
            let canonical = term.to_canonical_form();
            let parsed = Term::parse_canonical(&canonical).unwrap();
            assert_eq!(term, parsed);
        }
    }

    #[test]
    fn preserves_escapes() {
        let term = Term::plain_literal("a\nb\tc\"d\\e");
        let canonical = term.to_canonical_form();
        let parsed = Term::parse_canonical(&canonical).unwrap();
        assert_eq!(term, parsed);
    }
}
