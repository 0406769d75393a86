//! Typed binding values produced by query evaluation.

use std::fmt;

/// One binding's value. `Unbound` is a first-class variant rather than an
/// `Option<Value>` wrapper so `BindingTable::bind` can represent "bound to
/// nothing" distinctly from "absent from the row" the way a caller-owned
/// arena of fixed-size slots would.
#[derive(Clone, Debug)]
pub enum Value {
    Unbound,
    Integer(i64),
    Double(f64),
    Boolean(bool),
    /// A plain, language-tagged, or typed string; `lang`/`datatype` are
    /// mutually exclusive IRIs/tags, matching `model::Literal`.
    String {
        value: String,
        lang: Option<String>,
        datatype: Option<String>,
    },
    Iri(String),
    BlankNode(String),
}

impl Value {
    pub fn string(value: impl Into<String>) -> Self {
        Self::String {
            value: value.into(),
            lang: None,
            datatype: None,
        }
    }

    pub fn lang_string(value: impl Into<String>, lang: impl Into<String>) -> Self {
        Self::String {
            value: value.into(),
            lang: Some(lang.into()),
            datatype: None,
        }
    }

    pub fn typed_string(value: impl Into<String>, datatype: impl Into<String>) -> Self {
        Self::String {
            value: value.into(),
            lang: None,
            datatype: Some(datatype.into()),
        }
    }

    pub fn is_bound(&self) -> bool {
        !matches!(self, Self::Unbound)
    }

    pub fn is_iri(&self) -> bool {
        matches!(self, Self::Iri(_))
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, Self::BlankNode(_))
    }

    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            Self::Integer(_) | Self::Double(_) | Self::Boolean(_) | Self::String { .. }
        )
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer(_) | Self::Double(_))
            || matches!(self, Self::String { datatype: Some(dt), .. } if is_numeric_datatype(dt))
    }

    /// Effective boolean value (SPARQL EBV rules). Type mismatches that
    /// can't be coerced return `false`, never an error — the caller
    /// distinguishes "false" from "error" upstream if needed.
    pub fn truthy(&self) -> bool {
        match self {
            Self::Unbound => false,
            Self::Integer(i) => *i != 0,
            Self::Double(d) => *d != 0.0,
            Self::Boolean(b) => *b,
            Self::String { value, .. } => !value.is_empty(),
            Self::Iri(_) | Self::BlankNode(_) => true,
        }
    }

    /// Renders `STR()` semantics: the lexical form without type/lang tags.
    pub fn lexical(&self) -> String {
        match self {
            Self::Unbound => String::new(),
            Self::Integer(i) => i.to_string(),
            Self::Double(d) => format_double(*d),
            Self::Boolean(b) => b.to_string(),
            Self::String { value, .. } => value.clone(),
            Self::Iri(iri) => iri.clone(),
            Self::BlankNode(id) => id.clone(),
        }
    }

    /// Parses this value's lexical form as `f64` if it looks numeric,
    /// supporting numeric-vs-string comparison coercion.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Double(d) => Some(*d),
            Self::String { value, .. } => value.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::String { value, .. } => value.trim().parse::<i64>().ok(),
            _ => None,
        }
    }
}

fn is_numeric_datatype(dt: &str) -> bool {
    dt.ends_with("#integer")
        || dt.ends_with("#decimal")
        || dt.ends_with("#double")
        || dt.ends_with("#float")
}

pub fn format_double(d: f64) -> String {
    if d == d.trunc() && d.is_finite() && d.abs() < 1e15 {
        format!("{d:.1}")
    } else {
        format!("{d}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lexical())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Unbound, Unbound) => true,
            (Integer(a), Integer(b)) => a == b,
            (Double(a), Double(b)) => a == b,
            (Integer(a), Double(b)) | (Double(b), Integer(a)) => (*a as f64) == *b,
            (Boolean(a), Boolean(b)) => a == b,
            (Iri(a), Iri(b)) => a == b,
            (BlankNode(a), BlankNode(b)) => a == b,
            (
                String { value: a, lang: la, datatype: da },
                String { value: b, lang: lb, datatype: db },
            ) => a == b && la == lb && da == db,
            _ => false,
        }
    }
}

impl From<crate::model::Term> for Value {
    fn from(term: crate::model::Term) -> Self {
        use crate::model::{Literal, Term};
        match term {
            Term::NamedNode(iri) => Self::Iri(iri),
            Term::BlankNode(id) => Self::BlankNode(id),
            Term::Literal(Literal::Plain(v)) => Self::string(v),
            Term::Literal(Literal::LanguageTagged { value, language }) => {
                Self::lang_string(value, language)
            }
            Term::Literal(Literal::Typed { value, datatype }) => {
                if datatype.ends_with("#integer") {
                    if let Ok(i) = value.parse::<i64>() {
                        return Self::Integer(i);
                    }
                }
                if datatype.ends_with("#double") || datatype.ends_with("#decimal") || datatype.ends_with("#float") {
                    if let Ok(d) = value.parse::<f64>() {
                        return Self::Double(d);
                    }
                }
                if datatype.ends_with("#boolean") {
                    if let Ok(b) = value.parse::<bool>() {
                        return Self::Boolean(b);
                    }
                }
                Self::typed_string(value, datatype)
            }
        }
    }
}
