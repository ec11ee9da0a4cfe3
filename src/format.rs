//! Safe markup rendering for values logged by sandboxed code.
//!
//! Formatting runs in two steps. A stripping pass walks the [`ValueGraph`]
//! once from the root and builds an acyclic display tree, replacing every
//! object reached a second time with a circular marker. Rendering and the
//! one-line previews then work on that tree and cannot recurse forever.
//!
//! The seen-set lives only for one [`format`] call; nothing is shared
//! between calls, so the same graph always yields the same markup.

use crate::value::{HeapObject, ObjectId, PropertyKey, Slot, ValueGraph};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{Error as _, SerializeMap, Serializer};
use serde::Serialize;
use serde_json::value::RawValue;
use std::collections::HashSet;

/// Character budget of the one-line object preview
pub const PREVIEW_CHARS: usize = 75;

/// Nesting below this depth renders as a `[Object]`-style stub
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Circular,
    /// Nested too deep; carries the kind name shown in the stub
    Elided(&'static str),
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    BigInt(String),
    Str(String),
    Unsafe(String),
    Symbol(String),
    Function(String),
    Thrown(String),
    Error {
        name: String,
        message: String,
        stack: String,
        cause: Option<Box<Node>>,
    },
    Date(f64),
    Array(Vec<Node>),
    Object {
        constructor: Option<String>,
        entries: Vec<(PropertyKey, Node)>,
    },
}

/// Render a logged value.
///
/// `label` is the field name that produced the value; `type_override`
/// replaces the header of an object block and is trusted markup.
pub fn format(graph: &ValueGraph, label: Option<&str>, type_override: Option<&str>) -> String {
    let mut stripper = Stripper {
        graph,
        seen: HashSet::new(),
    };
    let node = stripper.node(&graph.root, 0);
    render(&node, label, type_override)
}

/// Render a console argument: no label, no override.
pub fn format_value(graph: &ValueGraph) -> String {
    format(graph, None, None)
}

struct Stripper<'g> {
    graph: &'g ValueGraph,
    seen: HashSet<ObjectId>,
}

impl Stripper<'_> {
    fn node(&mut self, slot: &Slot, depth: usize) -> Node {
        match slot {
            Slot::Undefined => Node::Undefined,
            Slot::Null => Node::Null,
            Slot::Bool(b) => Node::Bool(*b),
            Slot::Number(n) => Node::Number(*n),
            Slot::BigInt(digits) => Node::BigInt(digits.clone()),
            Slot::String(s) => Node::Str(s.clone()),
            Slot::Unsafe(markup) => Node::Unsafe(markup.clone()),
            Slot::Symbol(description) => Node::Symbol(description.clone()),
            Slot::Function(source) => Node::Function(source.clone()),
            Slot::Thrown(message) => Node::Thrown(message.clone()),
            Slot::Ref(id) => self.object(*id, depth),
        }
    }

    fn object(&mut self, id: ObjectId, depth: usize) -> Node {
        let Some(object) = self.graph.object(id) else {
            return Node::Undefined;
        };
        if !self.seen.insert(id) {
            return Node::Circular;
        }
        if depth >= MAX_DEPTH {
            return Node::Elided(kind_name(object));
        }

        match object {
            HeapObject::Array { items } => {
                Node::Array(items.iter().map(|item| self.node(item, depth + 1)).collect())
            }
            HeapObject::Error {
                name,
                message,
                stack,
                cause,
            } => Node::Error {
                name: name.clone(),
                message: message.clone(),
                stack: stack.clone(),
                cause: cause.as_ref().map(|cause| Box::new(self.node(cause, depth + 1))),
            },
            HeapObject::Date { epoch } => Node::Date(*epoch),
            HeapObject::Object {
                constructor,
                properties,
            } => Node::Object {
                constructor: constructor.clone(),
                entries: properties
                    .iter()
                    .map(|property| (property.key.clone(), self.node(&property.value, depth + 1)))
                    .collect(),
            },
        }
    }
}

fn kind_name(object: &HeapObject) -> &'static str {
    match object {
        HeapObject::Array { .. } => "Array",
        HeapObject::Error { .. } => "Error",
        HeapObject::Date { .. } => "Date",
        HeapObject::Object { .. } => "Object",
    }
}

fn render(node: &Node, label: Option<&str>, type_override: Option<&str>) -> String {
    let prefix = match label {
        Some(label) => format!(r#"<span class="key">{}: </span>"#, escape(label)),
        None => String::new(),
    };

    match node {
        Node::Circular => format!(r#"{}<span class="circular">[Circular]</span>"#, prefix),
        Node::Elided(kind) => format!(r#"{}<span class="elided">[{}]</span>"#, prefix, kind),
        Node::Undefined => format!(r#"{}<span class="undefined">undefined</span>"#, prefix),
        Node::Null => format!(r#"{}<span class="null">null</span>"#, prefix),
        Node::Str(text) => render_string(&prefix, label.is_some(), escape(text)),
        Node::Unsafe(markup) => render_string(&prefix, label.is_some(), markup.clone()),
        Node::Number(n) => inline(&prefix, "number", &number_text(*n)),
        Node::Bool(b) => inline(&prefix, "boolean", &b.to_string()),
        Node::BigInt(digits) => inline(&prefix, "bigint", &format!("{}n", escape(digits))),
        Node::Symbol(description) => {
            inline(&prefix, "symbol", &format!("Symbol({})", escape(description)))
        }
        Node::Function(source) => inline(&prefix, "function", &escape(source)),
        Node::Thrown(message) => inline(&prefix, "thrown", &format!("[Thrown: {}]", escape(message))),
        Node::Error {
            name,
            message,
            stack,
            cause,
        } => {
            let name = if name.is_empty() { "Error" } else { name.as_str() };
            let cause = match cause {
                Some(cause) => item(&render(cause, Some("cause"), None)),
                None => String::new(),
            };
            format!(
                r#"<div class="collapsible">{}<span class="collapsible-arrow">+</span><span class="error"><strong>{}</strong>: {}</span><div class="collapsible-content">{}{}</div></div>"#,
                prefix,
                escape(name),
                escape(message),
                cause,
                item(&format!("<pre>{}</pre>", escape(stack))),
            )
        }
        Node::Date(epoch) => {
            let (iso, readable) = date_text(*epoch);
            let entries = vec![
                (PropertyKey::Name("iso".to_string()), Node::Str(iso)),
                (PropertyKey::Name("stamp".to_string()), Node::Number(*epoch)),
            ];
            let header = format!(r#"Date<span class="number">{}</span>"#, readable);
            render_object(&prefix, &header, &entries)
        }
        Node::Array(items) => {
            let body: String = items
                .iter()
                .enumerate()
                .map(|(index, child)| item(&render(child, Some(&index.to_string()), None)))
                .collect();
            format!(
                r#"<div class="collapsible">{}<span class="collapsible-arrow">+</span>[<span class="collapsible-length">{} items</span><div class="collapsible-content">{}</div>]</div>"#,
                prefix,
                items.len(),
                body
            )
        }
        Node::Object {
            constructor,
            entries,
        } => {
            let header = match (type_override, constructor) {
                (Some(header), _) => header.to_string(),
                (None, Some(name)) if name != "Object" => escape(name),
                _ => String::new(),
            };
            render_object(&prefix, &header, entries)
        }
    }
}

fn render_string(prefix: &str, labeled: bool, text: String) -> String {
    if labeled {
        let quoted = serde_json::to_string(&text).unwrap_or(text);
        format!(r#"{}<span class="string">{}</span>"#, prefix, quoted)
    } else {
        text
    }
}

fn inline(prefix: &str, class: &str, text: &str) -> String {
    format!(r#"{}<span class="{}">{}</span>"#, prefix, class, text)
}

fn item(markup: &str) -> String {
    format!(r#"<div class="collapsible-item">{}</div>"#, markup)
}

fn render_object(prefix: &str, header: &str, entries: &[(PropertyKey, Node)]) -> String {
    let body: String = entries
        .iter()
        .map(|(key, child)| item(&render(child, Some(&key.label()), None)))
        .collect();
    format!(
        r#"<div class="collapsible">{}<span class="collapsible-arrow">+</span>{}{{&nbsp;<span class="collapsible-preview">{}</span><div class="collapsible-content">{}</div>}}<span class="collapsible-length">{} keys</span></div>"#,
        prefix,
        header,
        preview(entries),
        body,
        entries.len()
    )
}

/// One-line preview: the compact JSON of the object without its braces,
/// cut to [`PREVIEW_CHARS`].
fn preview(entries: &[(PropertyKey, Node)]) -> String {
    let pretty = serde_json::to_string_pretty(&JsonEntries(entries)).unwrap_or_default();
    let line = pretty.lines().map(str::trim).collect::<Vec<_>>().join(" ");
    let inner = line
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
        .unwrap_or(&line)
        .trim();
    escape(&cut(inner, PREVIEW_CHARS))
}

/// JSON view of a node, written the way `JSON.stringify` would.
struct Json<'n>(&'n Node);

/// JSON view of an object's entries; symbol keys and values serialization
/// would drop are left out.
struct JsonEntries<'n>(&'n [(PropertyKey, Node)]);

impl Serialize for Json<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Node::Circular => serializer.serialize_str("[Circular]"),
            Node::Elided(kind) => serializer.collect_str(&format_args!("[{}]", kind)),
            Node::Undefined | Node::Null | Node::Symbol(_) | Node::Function(_) => {
                serializer.serialize_unit()
            }
            Node::Bool(b) => serializer.serialize_bool(*b),
            Node::Number(n) => number_json(*n)
                .map_err(S::Error::custom)?
                .serialize(serializer),
            Node::BigInt(s) | Node::Str(s) | Node::Unsafe(s) | Node::Thrown(s) => {
                serializer.serialize_str(s)
            }
            Node::Error {
                name,
                message,
                cause,
                ..
            } => {
                let mut map = serializer.serialize_map(None)?;
                map.serialize_entry("name", name)?;
                map.serialize_entry("message", message)?;
                if let Some(cause) = cause.as_deref().filter(|cause| is_serialized(cause)) {
                    map.serialize_entry("cause", &Json(cause))?;
                }
                map.end()
            }
            Node::Date(epoch) => match iso_timestamp(*epoch) {
                Some(iso) => serializer.serialize_str(&iso),
                None => serializer.serialize_unit(),
            },
            Node::Array(items) => serializer.collect_seq(items.iter().map(Json)),
            Node::Object { entries, .. } => JsonEntries(entries).serialize(serializer),
        }
    }
}

impl Serialize for JsonEntries<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().filter_map(|(key, node)| match key {
            PropertyKey::Name(name) if is_serialized(node) => Some((name, Json(node))),
            _ => None,
        }))
    }
}

fn is_serialized(node: &Node) -> bool {
    !matches!(node, Node::Undefined | Node::Symbol(_) | Node::Function(_))
}

/// Numbers go into the preview verbatim so they read as in JavaScript.
fn number_json(n: f64) -> serde_json::Result<Box<RawValue>> {
    if !n.is_finite() {
        return RawValue::from_string("null".to_string());
    }
    RawValue::from_string(number_text(n))
}

/// Number text as JavaScript's `Number#toString` prints it: shortest
/// round-trip digits, positional between 1e-7 and 1e21, exponential outside.
pub fn number_text(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }

    let sign = if n < 0.0 { "-" } else { "" };
    let scientific = format!("{:e}", n.abs());
    let (mantissa, exponent) = scientific
        .split_once('e')
        .unwrap_or((scientific.as_str(), "0"));
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let count = digits.len() as i32;
    // position of the decimal point relative to the first digit
    let point = exponent + 1;

    let body = if count <= point && point <= 21 {
        format!("{}{}", digits, "0".repeat((point - count) as usize))
    } else if 0 < point && point <= 21 {
        let (whole, fraction) = digits.split_at(point as usize);
        format!("{}.{}", whole, fraction)
    } else if -6 < point && point <= 0 {
        format!("0.{}{}", "0".repeat(-point as usize), digits)
    } else {
        let (first, rest) = digits.split_at(1);
        let exponent_sign = if exponent < 0 { '-' } else { '+' };
        if rest.is_empty() {
            format!("{}e{}{}", first, exponent_sign, exponent.abs())
        } else {
            format!("{}.{}e{}{}", first, rest, exponent_sign, exponent.abs())
        }
    };
    format!("{}{}", sign, body)
}

fn iso_timestamp(epoch: f64) -> Option<String> {
    to_datetime(epoch).map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn to_datetime(epoch: f64) -> Option<DateTime<Utc>> {
    if !epoch.is_finite() {
        return None;
    }
    DateTime::from_timestamp_millis(epoch as i64)
}

/// ISO-8601 text and a human-readable rendering.
fn date_text(epoch: f64) -> (String, String) {
    match to_datetime(epoch) {
        Some(dt) => (
            dt.to_rfc3339_opts(SecondsFormat::Millis, true),
            dt.format("%-m/%-d/%Y, %-I:%M:%S %p").to_string(),
        ),
        None => ("Invalid Date".to_string(), "Invalid Date".to_string()),
    }
}

fn cut(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit - 3).collect();
    out.push_str("...");
    out
}

/// Escape text for inclusion in markup.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{object, Property};

    fn circular_markers(markup: &str) -> usize {
        markup.matches(r#"<span class="circular">[Circular]</span>"#).count()
    }

    fn preview_of(markup: &str) -> &str {
        let start = markup.find(r#"<span class="collapsible-preview">"#).unwrap()
            + r#"<span class="collapsible-preview">"#.len();
        let end = start + markup[start..].find("</span>").unwrap();
        &markup[start..end]
    }

    fn error(name: &str, message: &str, cause: Option<Slot>) -> HeapObject {
        HeapObject::Error {
            name: name.to_string(),
            message: message.to_string(),
            stack: format!("{}: {}\n    at snippet.js:1:7", name, message),
            cause,
        }
    }

    #[test]
    fn test_primitives() {
        let cases = [
            (Slot::Undefined, r#"<span class="undefined">undefined</span>"#),
            (Slot::Null, r#"<span class="null">null</span>"#),
            (Slot::Number(42.0), r#"<span class="number">42</span>"#),
            (Slot::Number(-1.5), r#"<span class="number">-1.5</span>"#),
            (Slot::Bool(true), r#"<span class="boolean">true</span>"#),
            (Slot::BigInt("12".to_string()), r#"<span class="bigint">12n</span>"#),
            (Slot::String("plain".to_string()), "plain"),
        ];

        for (slot, expected) in cases {
            let graph = ValueGraph::primitive(slot);
            assert_eq!(format_value(&graph), expected);
            assert_eq!(format_value(&graph), format_value(&graph));
        }
    }

    #[test]
    fn test_labels_and_quoting() {
        let graph = ValueGraph::primitive(Slot::String("say \"hi\"".to_string()));
        assert_eq!(
            format(&graph, Some("greeting"), None),
            r#"<span class="key">greeting: </span><span class="string">"say \"hi\""</span>"#
        );

        let graph = ValueGraph::primitive(Slot::Number(1.0));
        assert_eq!(
            format(&graph, Some("<b>"), None),
            r#"<span class="key">&lt;b&gt;: </span><span class="number">1</span>"#
        );
    }

    #[test]
    fn test_strings_are_escaped_unless_unsafe() {
        let graph = ValueGraph::primitive(Slot::String("<script>alert(1)</script>".to_string()));
        assert_eq!(format_value(&graph), "&lt;script&gt;alert(1)&lt;/script&gt;");

        let graph = ValueGraph::primitive(Slot::Unsafe("<b>bold</b>".to_string()));
        assert_eq!(format_value(&graph), "<b>bold</b>");
    }

    #[test]
    fn test_functions_and_symbols() {
        let graph = ValueGraph::primitive(Slot::Function("(a) => a > 1".to_string()));
        assert_eq!(format_value(&graph), r#"<span class="function">(a) =&gt; a &gt; 1</span>"#);

        let graph = ValueGraph::primitive(Slot::Symbol("id".to_string()));
        assert_eq!(format_value(&graph), r#"<span class="symbol">Symbol(id)</span>"#);
    }

    #[test]
    fn test_self_reference_renders_circular() {
        let mut graph = ValueGraph::new();
        graph.root = graph.alloc(object(None, vec![("a", Slot::Number(1.0))]));
        graph.push_property(0, "self", Slot::Ref(0));

        let markup = format_value(&graph);

        assert!(markup.contains(
            r#"<div class="collapsible-item"><span class="key">a: </span><span class="number">1</span></div>"#
        ));
        assert!(markup.contains(
            r#"<div class="collapsible-item"><span class="key">self: </span><span class="circular">[Circular]</span></div>"#
        ));
        assert_eq!(circular_markers(&markup), 1);
        assert!(markup.contains(r#"<span class="collapsible-length">2 keys</span>"#));
        assert_eq!(preview_of(&markup), r#""a": 1, "self": "[Circular]""#);
    }

    #[test]
    fn test_two_object_cycle_terminates() {
        let mut graph = ValueGraph::new();
        graph.root = graph.alloc(object(None, vec![]));
        let b = graph.alloc(object(None, vec![("a", Slot::Ref(0))]));
        graph.push_property(0, "b", b);

        let markup = format_value(&graph);

        assert_eq!(circular_markers(&markup), 1);
        assert!(markup.contains(r#"<span class="key">a: </span><span class="circular">"#));
    }

    #[test]
    fn test_shared_reference_counts_as_circular() {
        let mut graph = ValueGraph::new();
        let shared = graph.alloc(object(None, vec![("n", Slot::Number(1.0))]));
        graph.root = graph.alloc(object(None, vec![("x", shared.clone()), ("y", shared)]));

        let markup = format_value(&graph);

        assert_eq!(circular_markers(&markup), 1);
        assert!(markup.contains(r#"<span class="key">y: </span><span class="circular">"#));
    }

    #[test]
    fn test_array_cycle_terminates() {
        let mut graph = ValueGraph::new();
        graph.root = graph.alloc(HeapObject::Array {
            items: vec![Slot::Number(1.0), Slot::Ref(0)],
        });

        let markup = format_value(&graph);

        assert_eq!(circular_markers(&markup), 1);
        assert!(markup.contains(r#"<span class="collapsible-length">2 items</span>"#));
    }

    #[test]
    fn test_array_lists_items_in_order() {
        let mut graph = ValueGraph::new();
        graph.root = graph.alloc(HeapObject::Array {
            items: vec![
                Slot::String("x".to_string()),
                Slot::Number(2.0),
                Slot::Null,
            ],
        });

        let markup = format_value(&graph);

        assert!(markup.contains(r#"[<span class="collapsible-length">3 items</span>"#));
        assert_eq!(markup.matches(r#"<div class="collapsible-item">"#).count(), 3);
        let zero = markup.find(r#"<span class="key">0: </span><span class="string">"x"</span>"#).unwrap();
        let one = markup.find(r#"<span class="key">1: </span><span class="number">2</span>"#).unwrap();
        let two = markup.find(r#"<span class="key">2: </span><span class="null">null</span>"#).unwrap();
        assert!(zero < one && one < two);
    }

    #[test]
    fn test_error_cause_chain() {
        let mut graph = ValueGraph::new();
        let root_cause = graph.alloc(error("RangeError", "too big", None));
        let middle = graph.alloc(error("TypeError", "bad input", Some(root_cause)));
        graph.root = graph.alloc(error("Error", "request failed", Some(middle)));

        let markup = format_value(&graph);

        assert_eq!(markup.matches(r#"<span class="error">"#).count(), 3);
        assert_eq!(markup.matches(r#"<span class="key">cause: </span>"#).count(), 2);
        assert!(markup.starts_with(
            r#"<div class="collapsible"><span class="collapsible-arrow">+</span><span class="error"><strong>Error</strong>: request failed</span>"#
        ));
        for expected in [
            "<strong>TypeError</strong>: bad input",
            "<strong>RangeError</strong>: too big",
            "<pre>Error: request failed\n    at snippet.js:1:7</pre>",
            "<pre>TypeError: bad input\n    at snippet.js:1:7</pre>",
            "<pre>RangeError: too big\n    at snippet.js:1:7</pre>",
        ] {
            assert!(markup.contains(expected), "missing {}", expected);
        }

        let nested = markup.find("<strong>TypeError</strong>").unwrap();
        let deepest = markup.find("<strong>RangeError</strong>").unwrap();
        assert!(nested < deepest);
    }

    #[test]
    fn test_error_caused_by_itself() {
        let mut graph = ValueGraph::new();
        graph.root = graph.alloc(error("Error", "loop", Some(Slot::Ref(0))));

        let markup = format_value(&graph);

        assert!(markup.contains(
            r#"<span class="key">cause: </span><span class="circular">[Circular]</span>"#
        ));
    }

    #[test]
    fn test_error_without_name_and_escaped_message() {
        let mut graph = ValueGraph::new();
        graph.root = graph.alloc(error("", "expected <T>", None));

        let markup = format_value(&graph);

        assert!(markup.contains("<strong>Error</strong>: expected &lt;T&gt;"));
        assert!(!markup.contains(r#"class="key""#));
    }

    #[test]
    fn test_date_rendering() {
        let mut graph = ValueGraph::new();
        graph.root = graph.alloc(HeapObject::Date {
            epoch: 1_704_164_645_678.0,
        });

        let markup = format(&graph, Some("when"), None);

        assert!(markup.contains(r#"<span class="key">when: </span>"#));
        assert!(markup.contains(
            r#"Date<span class="number">1/2/2024, 3:04:05 AM</span>{&nbsp;"#
        ));
        assert!(markup.contains(
            r#"<span class="key">iso: </span><span class="string">"2024-01-02T03:04:05.678Z"</span>"#
        ));
        assert!(markup.contains(
            r#"<span class="key">stamp: </span><span class="number">1704164645678</span>"#
        ));
        assert!(markup.contains(r#"<span class="collapsible-length">2 keys</span>"#));
    }

    #[test]
    fn test_invalid_date() {
        let mut graph = ValueGraph::new();
        graph.root = graph.alloc(HeapObject::Date { epoch: f64::NAN });

        let markup = format_value(&graph);

        assert!(markup.contains(r#"Date<span class="number">Invalid Date</span>"#));
        assert!(markup.contains(r#"<span class="key">stamp: </span><span class="number">NaN</span>"#));
    }

    #[test]
    fn test_constructor_header_and_override() {
        let mut graph = ValueGraph::new();
        graph.root = graph.alloc(object(
            Some("Point"),
            vec![("x", Slot::Number(1.0)), ("y", Slot::Number(2.0))],
        ));

        let markup = format_value(&graph);
        assert!(markup.contains(r#"<span class="collapsible-arrow">+</span>Point{&nbsp;"#));

        let markup = format(&graph, None, Some("Vector"));
        assert!(markup.contains(r#"<span class="collapsible-arrow">+</span>Vector{&nbsp;"#));

        let mut graph = ValueGraph::new();
        graph.root = graph.alloc(object(None, vec![]));
        let markup = format_value(&graph);
        assert!(markup.contains(r#"<span class="collapsible-arrow">+</span>{&nbsp;"#));
        assert!(markup.contains(r#"<span class="collapsible-length">0 keys</span>"#));
    }

    #[test]
    fn test_symbol_keys_listed_but_not_previewed() {
        let mut graph = ValueGraph::new();
        graph.root = graph.alloc(HeapObject::Object {
            constructor: None,
            properties: vec![
                Property {
                    key: PropertyKey::Name("visible".to_string()),
                    value: Slot::Bool(true),
                },
                Property {
                    key: PropertyKey::Name("skipped".to_string()),
                    value: Slot::Undefined,
                },
                Property {
                    key: PropertyKey::Symbol("meta".to_string()),
                    value: Slot::Number(7.0),
                },
            ],
        });

        let markup = format_value(&graph);

        assert_eq!(preview_of(&markup), r#""visible": true"#);
        assert!(markup.contains(r#"<span class="key">Symbol(meta): </span><span class="number">7</span>"#));
        assert!(markup.contains(r#"<span class="key">skipped: </span><span class="undefined">undefined</span>"#));
        assert!(markup.contains(r#"<span class="collapsible-length">3 keys</span>"#));
    }

    #[test]
    fn test_preview_is_truncated() {
        let mut graph = ValueGraph::new();
        graph.root = graph.alloc(object(None, vec![("text", Slot::String("x".repeat(200)))]));

        let markup = format_value(&graph);
        let preview = preview_of(&markup);

        assert_eq!(preview.chars().count(), PREVIEW_CHARS);
        assert!(preview.starts_with(r#""text": "xxx"#));
        assert!(preview.ends_with("..."));
        // the full value is still available in the body
        assert!(markup.contains(&"x".repeat(200)));
    }

    #[test]
    fn test_preview_of_nested_values() {
        let mut graph = ValueGraph::new();
        let list = graph.alloc(HeapObject::Array {
            items: vec![Slot::Number(1.0), Slot::Function("f".to_string())],
        });
        let when = graph.alloc(HeapObject::Date { epoch: 0.0 });
        graph.root = graph.alloc(object(
            None,
            vec![("list", list), ("when", when), ("tag", Slot::String("<a>".to_string()))],
        ));

        let markup = format_value(&graph);

        assert_eq!(
            preview_of(&markup),
            r#""list": [ 1, null ], "when": "1970-01-01T00:00:00.000Z", "tag": "&lt;a&gt;""#
        );
    }

    #[test]
    fn test_thrown_getter() {
        let mut graph = ValueGraph::new();
        graph.root = graph.alloc(object(None, vec![("boom", Slot::Thrown("Error: nope".to_string()))]));

        let markup = format_value(&graph);

        assert!(markup.contains(r#"<span class="key">boom: </span><span class="thrown">[Thrown: Error: nope]</span>"#));
    }

    #[test]
    fn test_deep_nesting_is_elided() {
        let mut graph = ValueGraph::new();
        let mut next = Slot::Null;
        for _ in 0..(MAX_DEPTH * 4) {
            next = graph.alloc(object(None, vec![("next", next)]));
        }
        graph.root = next;

        let markup = format_value(&graph);

        assert!(markup.contains(r#"<span class="elided">[Object]</span>"#));
        assert_eq!(circular_markers(&markup), 0);
    }

    #[test]
    fn test_number_text() {
        assert_eq!(number_text(0.0), "0");
        assert_eq!(number_text(-0.0), "0");
        assert_eq!(number_text(3.0), "3");
        assert_eq!(number_text(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(number_text(f64::NAN), "NaN");
        assert_eq!(number_text(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(number_text(1e21), "1e+21");
        assert_eq!(number_text(1.5e-7), "1.5e-7");
        assert_eq!(number_text(0.000001), "0.000001");
        assert_eq!(number_text(-2.5e-9), "-2.5e-9");
        assert_eq!(number_text(1704164645678.0), "1704164645678");
        assert_eq!(number_text(123.456), "123.456");
    }

    #[test]
    fn test_number_text_beyond_safe_integers() {
        assert_eq!(number_text(2f64.powi(60)), "1152921504606847000");
        assert_eq!(number_text(123456789012345678901.0), "123456789012345680000");
        assert_eq!(number_text(-9007199254740993.0), "-9007199254740992");
        assert_eq!(number_text(1.2345e25), "1.2345e+25");
    }

    #[test]
    fn test_preview_numbers_match_number_text() {
        let mut graph = ValueGraph::new();
        graph.root = graph.alloc(object(
            None,
            vec![
                ("big", Slot::Number(2f64.powi(60))),
                ("huge", Slot::Number(123456789012345678901.0)),
                ("nan", Slot::Number(f64::NAN)),
            ],
        ));

        let markup = format_value(&graph);

        assert_eq!(
            preview_of(&markup),
            r#""big": 1152921504606847000, "huge": 123456789012345680000, "nan": null"#
        );
        assert!(markup.contains(
            r#"<span class="key">big: </span><span class="number">1152921504606847000</span>"#
        ));
    }

    #[test]
    fn test_cut() {
        assert_eq!(cut("short", 10), "short");
        assert_eq!(cut("abcdefghij", 8), "abcde...");
        assert_eq!(cut("ééééé", 4), "é...");
    }
}
