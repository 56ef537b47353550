//! Plan compilation and execution.

use scraper::{ElementRef, Selector};

use super::value::{Shape, Value};
use super::ScanError;

/// A compiled extraction plan.
///
/// Plans nest the way shapes do: a record plan holds one plan per tagged
/// field, a sequence plan holds its element plan.
#[derive(Debug)]
pub(crate) enum Plan {
    Primitive {
        kind: Primitive,
        selector: Option<Selector>,
        attr: Option<String>,
    },
    Record {
        fields: Vec<(&'static str, Plan)>,
    },
    Seq {
        selector: Selector,
        elem: Box<Plan>,
    },
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Primitive {
    Int,
    Uint,
    Float,
    Text,
    Bytes,
}

/// Selector and attribute context inherited while compiling.
#[derive(Debug, Default, Clone)]
pub(crate) struct Opts {
    pub selector: Option<String>,
    pub attr: Option<String>,
}

/// Compiles a shape into a plan.
pub(crate) fn compile(
    shape: &Shape,
    opts: Opts,
    type_name: &'static str,
) -> Result<Plan, ScanError> {
    match shape {
        Shape::Int => primitive(Primitive::Int, opts, type_name),
        Shape::Uint => primitive(Primitive::Uint, opts, type_name),
        Shape::Float => primitive(Primitive::Float, opts, type_name),
        Shape::Text => primitive(Primitive::Text, opts, type_name),
        Shape::Bytes => primitive(Primitive::Bytes, opts, type_name),

        Shape::Record(fields) => {
            let mut compiled = Vec::with_capacity(fields.len());

            for field in fields {
                if field.spec.is_empty() {
                    continue;
                }

                let (css, attr) = match field.spec.split_once('@') {
                    Some((css, attr)) => (css, Some(attr.to_string())),
                    None => (field.spec, None),
                };

                if css.is_empty() {
                    continue;
                }

                let child = Opts {
                    selector: Some(css.to_string()),
                    attr,
                };

                compiled.push((field.name, compile(&field.shape, child, type_name)?));
            }

            if compiled.is_empty() {
                return Err(ScanError::NoFields { type_name });
            }

            Ok(Plan::Record { fields: compiled })
        }

        Shape::Seq(elem) => {
            let css = opts.selector.ok_or(ScanError::SequenceSelector { type_name })?;
            let selector = parse_selector(&css, type_name)?;

            // The element plan inherits the attribute but starts from the
            // matched node, not from a nested selector.
            let elem = compile(
                elem,
                Opts {
                    selector: None,
                    attr: opts.attr,
                },
                type_name,
            )?;

            Ok(Plan::Seq {
                selector,
                elem: Box::new(elem),
            })
        }
    }
}

fn primitive(kind: Primitive, opts: Opts, type_name: &'static str) -> Result<Plan, ScanError> {
    let selector = match &opts.selector {
        Some(css) => Some(parse_selector(css, type_name)?),
        None => None,
    };

    Ok(Plan::Primitive {
        kind,
        selector,
        attr: opts.attr,
    })
}

fn parse_selector(css: &str, type_name: &'static str) -> Result<Selector, ScanError> {
    Selector::parse(css).map_err(|_| ScanError::Selector {
        selector: css.to_string(),
        type_name,
    })
}

impl Plan {
    /// Runs the plan against a node.
    ///
    /// Execution is deterministic and never fails; unparseable primitives
    /// produce zero values and empty matches produce empty values.
    pub(crate) fn run(&self, node: ElementRef<'_>) -> Value {
        match self {
            Plan::Primitive {
                kind,
                selector,
                attr,
            } => {
                let target = match selector {
                    Some(selector) => node.select(selector).next(),
                    None => Some(node),
                };

                let raw: String = match (target, attr) {
                    (Some(el), Some(attr)) => el.value().attr(attr).unwrap_or("").to_string(),
                    (Some(el), None) => el.text().collect(),
                    (None, _) => String::new(),
                };

                kind.parse(&raw)
            }

            Plan::Record { fields } => Value::Record(
                fields
                    .iter()
                    .map(|(name, plan)| (*name, plan.run(node)))
                    .collect(),
            ),

            Plan::Seq { selector, elem } => {
                Value::Seq(node.select(selector).map(|el| elem.run(el)).collect())
            }
        }
    }
}

impl Primitive {
    fn parse(&self, raw: &str) -> Value {
        match self {
            Primitive::Int => Value::Int(raw.parse().unwrap_or_default()),
            Primitive::Uint => Value::Uint(raw.parse().unwrap_or_default()),
            Primitive::Float => Value::Float(raw.parse().unwrap_or_default()),
            Primitive::Text => Value::Text(raw.to_string()),
            Primitive::Bytes => Value::Bytes(raw.as_bytes().to_vec()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::Field;
    use scraper::Html;

    const DOC: &str = r#"
        <html>
          <body>
            <h1 class="title">Quotes</h1>
            <span class="count">42</span>
            <span class="score">4.5</span>
            <div class="quote"><span class="text">alpha</span></div>
            <div class="quote"><span class="text">beta</span></div>
            <a class="author" href="/authors/1">One</a>
            <a class="author" href="/authors/2">Two</a>
          </body>
        </html>
    "#;

    fn run(shape: &Shape, opts: Opts) -> Value {
        let plan = compile(shape, opts, "test").unwrap();
        let doc = Html::parse_document(DOC);
        plan.run(doc.root_element())
    }

    fn with_selector(css: &str) -> Opts {
        Opts {
            selector: Some(css.to_string()),
            attr: None,
        }
    }

    #[test]
    fn test_text_primitive() {
        let value = run(&Shape::Text, with_selector("h1.title"));
        assert_eq!(value, Value::Text("Quotes".to_string()));
    }

    #[test]
    fn test_int_primitive() {
        let value = run(&Shape::Int, with_selector("span.count"));
        assert_eq!(value, Value::Int(42));
    }

    #[test]
    fn test_uint_primitive() {
        let value = run(&Shape::Uint, with_selector("span.count"));
        assert_eq!(value, Value::Uint(42));
    }

    #[test]
    fn test_float_primitive() {
        let value = run(&Shape::Float, with_selector("span.score"));
        assert_eq!(value, Value::Float(4.5));
    }

    #[test]
    fn test_bytes_primitive() {
        let value = run(&Shape::Bytes, with_selector("h1.title"));
        assert_eq!(value, Value::Bytes(b"Quotes".to_vec()));
    }

    #[test]
    fn test_unparseable_number_is_zero() {
        let value = run(&Shape::Int, with_selector("h1.title"));
        assert_eq!(value, Value::Int(0));
    }

    #[test]
    fn test_missing_node_is_zero() {
        let value = run(&Shape::Text, with_selector("h2.nope"));
        assert_eq!(value, Value::Text(String::new()));

        let value = run(&Shape::Int, with_selector("h2.nope"));
        assert_eq!(value, Value::Int(0));
    }

    #[test]
    fn test_attribute_extraction() {
        let opts = Opts {
            selector: Some("a.author".to_string()),
            attr: Some("href".to_string()),
        };
        let value = run(&Shape::Text, opts);
        assert_eq!(value, Value::Text("/authors/1".to_string()));
    }

    #[test]
    fn test_record() {
        let shape = Shape::Record(vec![
            Field::new("title", "h1.title", Shape::Text),
            Field::new("count", "span.count", Shape::Uint),
        ]);

        let value = run(&shape, Opts::default());

        assert_eq!(value.get("title").unwrap().as_text(), "Quotes");
        assert_eq!(value.get("count").unwrap().as_uint(), 42);
    }

    #[test]
    fn test_record_ignores_untagged_fields() {
        let shape = Shape::Record(vec![
            Field::new("title", "h1.title", Shape::Text),
            Field::new("ignored", "", Shape::Text),
        ]);

        let value = run(&shape, Opts::default());
        assert!(value.get("ignored").is_none());
    }

    #[test]
    fn test_seq_of_text() {
        let shape = Shape::Seq(Box::new(Shape::Text));
        let value = run(&shape, with_selector("div.quote"));

        let texts: Vec<&str> = value.as_seq().iter().map(Value::as_text).collect();
        assert_eq!(texts, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_seq_inherits_attribute() {
        let shape = Shape::Record(vec![Field::new(
            "authors",
            "a.author@href",
            Shape::Seq(Box::new(Shape::Text)),
        )]);

        let value = run(&shape, Opts::default());
        let hrefs: Vec<&str> = value
            .get("authors")
            .unwrap()
            .as_seq()
            .iter()
            .map(Value::as_text)
            .collect();

        assert_eq!(hrefs, vec!["/authors/1", "/authors/2"]);
    }

    #[test]
    fn test_seq_of_records() {
        let shape = Shape::Record(vec![Field::new(
            "quotes",
            "div.quote",
            Shape::Seq(Box::new(Shape::Record(vec![Field::new(
                "text",
                "span.text",
                Shape::Text,
            )]))),
        )]);

        let value = run(&shape, Opts::default());
        let quotes = value.get("quotes").unwrap();

        assert_eq!(quotes.as_seq().len(), 2);
        assert_eq!(
            quotes.as_seq()[0].get("text").unwrap().as_text(),
            "alpha"
        );
    }

    #[test]
    fn test_deterministic() {
        let shape = Shape::Record(vec![
            Field::new("title", "h1.title", Shape::Text),
            Field::new("quotes", "div.quote", Shape::Seq(Box::new(Shape::Text))),
        ]);

        assert_eq!(run(&shape, Opts::default()), run(&shape, Opts::default()));
    }

    #[test]
    fn test_invalid_selector() {
        let shape = Shape::Record(vec![Field::new("bad", "][", Shape::Text)]);
        let err = compile(&shape, Opts::default(), "test").unwrap_err();
        assert!(matches!(err, ScanError::Selector { .. }));
    }

    #[test]
    fn test_record_without_fields() {
        let shape = Shape::Record(vec![]);
        let err = compile(&shape, Opts::default(), "test").unwrap_err();
        assert!(matches!(err, ScanError::NoFields { .. }));
    }

    #[test]
    fn test_seq_without_selector() {
        let shape = Shape::Seq(Box::new(Shape::Text));
        let err = compile(&shape, Opts::default(), "test").unwrap_err();
        assert!(matches!(err, ScanError::SequenceSelector { .. }));
    }
}
