//! SPARQL result serializers: JSON, XML, CSV, and TSV writers over a
//! [`QueryResults`]. `CONSTRUCT`/triple results have no representation in
//! these formats — write them as N-Quads via [`super::nquads`] instead.

use std::io::{self, Write};

use crate::sparql::value::{format_double, Value};
use crate::sparql::{QueryResults, SolutionRow};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultsFormat {
    Json,
    Xml,
    Csv,
    Tsv,
}

fn not_tabular() -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        "CONSTRUCT results have no SPARQL results representation; write them as N-Quads",
    )
}

pub fn write<W: Write>(format: ResultsFormat, out: &mut W, results: &QueryResults) -> io::Result<()> {
    match format {
        ResultsFormat::Json => write_json(out, results),
        ResultsFormat::Xml => write_xml(out, results),
        ResultsFormat::Csv => write_csv(out, results),
        ResultsFormat::Tsv => write_tsv(out, results),
    }
}

// ---- JSON ----

pub fn write_json<W: Write>(out: &mut W, results: &QueryResults) -> io::Result<()> {
    match results {
        QueryResults::Boolean(value) => {
            write!(out, "{{\"head\":{{}},\"boolean\":{value}}}")
        }
        QueryResults::Solutions { vars, rows } => {
            write!(out, "{{\"head\":{{\"vars\":[")?;
            for (i, var) in vars.iter().enumerate() {
                if i > 0 {
                    write!(out, ",")?;
                }
                write!(out, "{}", json_string(var))?;
            }
            write!(out, "]}},\"results\":{{\"bindings\":[")?;
            for (ri, row) in rows.iter().enumerate() {
                if ri > 0 {
                    write!(out, ",")?;
                }
                write_json_binding(out, vars, row)?;
            }
            write!(out, "]}}}}")
        }
        QueryResults::Triples(_) => Err(not_tabular()),
    }
}

fn write_json_binding<W: Write>(out: &mut W, vars: &[String], row: &SolutionRow) -> io::Result<()> {
    write!(out, "{{")?;
    let mut first = true;
    for (i, var) in vars.iter().enumerate() {
        if let Some(value) = row.get(i) {
            if !first {
                write!(out, ",")?;
            }
            first = false;
            write!(out, "{}:", json_string(var))?;
            write_json_value(out, value)?;
        }
    }
    write!(out, "}}")
}

fn write_json_value<W: Write>(out: &mut W, value: &Value) -> io::Result<()> {
    match value {
        Value::Unbound => unreachable!("unbound values are omitted from a binding"),
        Value::Iri(iri) => write!(out, "{{\"type\":\"uri\",\"value\":{}}}", json_string(iri)),
        Value::BlankNode(id) => write!(out, "{{\"type\":\"bnode\",\"value\":{}}}", json_string(id)),
        Value::Integer(i) => write!(
            out,
            "{{\"type\":\"literal\",\"value\":{},\"datatype\":\"http://www.w3.org/2001/XMLSchema#integer\"}}",
            json_string(&i.to_string())
        ),
        Value::Double(d) => write!(
            out,
            "{{\"type\":\"literal\",\"value\":{},\"datatype\":\"http://www.w3.org/2001/XMLSchema#double\"}}",
            json_string(&format_double(*d))
        ),
        Value::Boolean(b) => write!(
            out,
            "{{\"type\":\"literal\",\"value\":{},\"datatype\":\"http://www.w3.org/2001/XMLSchema#boolean\"}}",
            json_string(&b.to_string())
        ),
        Value::String { value, lang, datatype } => {
            write!(out, "{{\"type\":\"literal\",\"value\":{}", json_string(value))?;
            if let Some(lang) = lang {
                write!(out, ",\"xml:lang\":{}", json_string(lang))?;
            } else if let Some(datatype) = datatype {
                write!(out, ",\"datatype\":{}", json_string(datatype))?;
            }
            write!(out, "}}")
        }
    }
}

fn json_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

// ---- XML ----

pub fn write_xml<W: Write>(out: &mut W, results: &QueryResults) -> io::Result<()> {
    writeln!(out, "<?xml version=\"1.0\" encoding=\"UTF-8\"?>")?;
    match results {
        QueryResults::Boolean(value) => writeln!(
            out,
            "<sparql xmlns=\"http://www.w3.org/2005/sparql-results#\"><head/><boolean>{value}</boolean></sparql>"
        ),
        QueryResults::Solutions { vars, rows } => {
            writeln!(out, "<sparql xmlns=\"http://www.w3.org/2005/sparql-results#\">")?;
            write!(out, "<head>")?;
            for var in vars {
                write!(out, "<variable name=\"{}\"/>", xml_escape(var))?;
            }
            writeln!(out, "</head>")?;
            writeln!(out, "<results>")?;
            for row in rows {
                writeln!(out, "<result>")?;
                for (i, var) in vars.iter().enumerate() {
                    if let Some(value) = row.get(i) {
                        write!(out, "<binding name=\"{}\">", xml_escape(var))?;
                        write_xml_value(out, value)?;
                        writeln!(out, "</binding>")?;
                    }
                }
                writeln!(out, "</result>")?;
            }
            writeln!(out, "</results>")?;
            writeln!(out, "</sparql>")
        }
        QueryResults::Triples(_) => Err(not_tabular()),
    }
}

fn write_xml_value<W: Write>(out: &mut W, value: &Value) -> io::Result<()> {
    match value {
        Value::Unbound => unreachable!("unbound values are omitted from a binding"),
        Value::Iri(iri) => write!(out, "<uri>{}</uri>", xml_escape(iri)),
        Value::BlankNode(id) => write!(out, "<bnode>{}</bnode>", xml_escape(id)),
        Value::Integer(i) => write!(
            out,
            "<literal datatype=\"http://www.w3.org/2001/XMLSchema#integer\">{i}</literal>"
        ),
        Value::Double(d) => write!(
            out,
            "<literal datatype=\"http://www.w3.org/2001/XMLSchema#double\">{}</literal>",
            xml_escape(&format_double(*d))
        ),
        Value::Boolean(b) => write!(
            out,
            "<literal datatype=\"http://www.w3.org/2001/XMLSchema#boolean\">{b}</literal>"
        ),
        Value::String { value, lang, datatype } => {
            if let Some(lang) = lang {
                write!(out, "<literal xml:lang=\"{}\">{}</literal>", xml_escape(lang), xml_escape(value))
            } else if let Some(datatype) = datatype {
                write!(
                    out,
                    "<literal datatype=\"{}\">{}</literal>",
                    xml_escape(datatype),
                    xml_escape(value)
                )
            } else {
                write!(out, "<literal>{}</literal>", xml_escape(value))
            }
        }
    }
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

// ---- CSV / TSV ----

pub fn write_csv<W: Write>(out: &mut W, results: &QueryResults) -> io::Result<()> {
    let (vars, rows) = solutions_or_err(results)?;
    writeln!(out, "{}", vars.iter().map(|v| csv_field(v)).collect::<Vec<_>>().join(","))?;
    for row in rows {
        let line = vars
            .iter()
            .enumerate()
            .map(|(i, _)| row.get(i).map(csv_value).unwrap_or_default())
            .collect::<Vec<_>>()
            .join(",");
        writeln!(out, "{line}")?;
    }
    Ok(())
}

fn csv_value(value: &Value) -> String {
    csv_field(&match value {
        Value::Iri(iri) => iri.clone(),
        Value::BlankNode(id) => format!("_:{id}"),
        other => other.lexical(),
    })
}

fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

pub fn write_tsv<W: Write>(out: &mut W, results: &QueryResults) -> io::Result<()> {
    let (vars, rows) = solutions_or_err(results)?;
    writeln!(
        out,
        "{}",
        vars.iter().map(|v| format!("?{v}")).collect::<Vec<_>>().join("\t")
    )?;
    for row in rows {
        let line = vars
            .iter()
            .enumerate()
            .map(|(i, _)| row.get(i).map(tsv_value).unwrap_or_default())
            .collect::<Vec<_>>()
            .join("\t");
        writeln!(out, "{line}")?;
    }
    Ok(())
}

fn tsv_value(value: &Value) -> String {
    match value {
        Value::Iri(iri) => format!("<{iri}>"),
        Value::BlankNode(id) => format!("_:{id}"),
        Value::Integer(i) => i.to_string(),
        Value::Double(d) => format_double(*d),
        Value::Boolean(b) => b.to_string(),
        Value::String { value, lang, datatype } => {
            let mut s = format!("\"{}\"", tsv_escape(value));
            if let Some(lang) = lang {
                s.push('@');
                s.push_str(lang);
            } else if let Some(datatype) = datatype {
                s.push_str("^^<");
                s.push_str(datatype);
                s.push('>');
            }
            s
        }
        Value::Unbound => String::new(),
    }
}

fn tsv_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out
}

fn solutions_or_err(results: &QueryResults) -> io::Result<(&Vec<String>, &Vec<SolutionRow>)> {
    match results {
        QueryResults::Solutions { vars, rows } => Ok((vars, rows)),
        QueryResults::Boolean(_) => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "ASK results have no CSV/TSV representation",
        )),
        QueryResults::Triples(_) => Err(not_tabular()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> QueryResults {
        QueryResults::Solutions {
            vars: vec!["name".to_string(), "age".to_string()],
            rows: vec![
                SolutionRow(vec![Some(Value::string("Alice")), Some(Value::Integer(30))]),
                SolutionRow(vec![Some(Value::string("Bob")), None]),
            ],
        }
    }

    #[test]
    fn json_omits_unbound_bindings() {
        let mut buf = Vec::new();
        write_json(&mut buf, &sample()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("\"name\":{\"type\":\"literal\""));
        assert!(!text.contains("\"age\":{\"type\":\"literal\",\"value\":\"\""));
        assert!(text.contains("\"Bob\""));
    }

    #[test]
    fn csv_header_is_unprefixed_and_quotes_commas() {
        let mut buf = Vec::new();
        write_csv(&mut buf, &sample()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("name,age\n"));
    }

    #[test]
    fn tsv_header_is_prefixed_with_var_sigil() {
        let mut buf = Vec::new();
        write_tsv(&mut buf, &sample()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("?name\t?age\n"));
    }

    #[test]
    fn boolean_json_renders_ask_shape() {
        let mut buf = Vec::new();
        write_json(&mut buf, &QueryResults::Boolean(true)).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "{\"head\":{},\"boolean\":true}");
    }
}
