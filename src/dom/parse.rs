//! HTML → `Document` using `tl`.
//!
//! `tl` yields a loose node tree; this module normalizes it into a full
//! document: lowercase tag names, decoded text and attribute values, and an
//! `<html><head><body>` skeleton when the input is a fragment.

use super::html::{is_raw_text_element, parse_attributes, unescape};
use super::{Document, DomError, NodeId};

impl Document {
    /// Parse a complete document or a body fragment.
    pub fn parse(html: &str) -> Result<Self, DomError> {
        let (doctype, rest) = split_doctype(html);

        let dom = tl::parse(rest, tl::ParserOptions::default())
            .map_err(|e| DomError::Parse(e.to_string()))?;
        let parser = dom.parser();

        let mut doc = Document::new();
        doc.set_doctype(doctype);

        let mut top = Vec::new();
        for handle in dom.children() {
            if let Some(id) = convert(&mut doc, *handle, parser, false) {
                top.push(id);
            }
        }

        let has_html = top.iter().any(|&id| doc.tag(id) == Some("html"));
        if has_html {
            let root = doc.root();
            for id in top {
                // Whitespace around <html> is dropped, like a browser does.
                if doc.text(id).is_some_and(|t| t.trim().is_empty()) {
                    continue;
                }
                doc.attach(root, id, None);
            }
        } else {
            wrap_fragment(&mut doc, top);
        }

        ensure_head_and_body(&mut doc);
        Ok(doc)
    }
}

/// Split off a leading `<!DOCTYPE ...>` declaration.
fn split_doctype(html: &str) -> (Option<String>, &str) {
    let trimmed = html.trim_start();
    let is_doctype = trimmed
        .get(..9)
        .is_some_and(|head| head.eq_ignore_ascii_case("<!doctype"));
    if !is_doctype {
        return (None, html);
    }
    match trimmed.find('>') {
        Some(end) => {
            let name = trimmed[9..end].trim().to_string();
            (Some(name), &trimmed[end + 1..])
        }
        None => (None, html),
    }
}

/// Attribute part of a tag's raw source: `<div a="1" b>…` → ` a="1" b`.
fn attribute_source(raw: &str) -> &str {
    let after_name = raw
        .trim_start_matches('<')
        .trim_start_matches(|c: char| !c.is_whitespace() && c != '>' && c != '/');

    let mut quote = None;
    let mut end = after_name.len();
    for (i, c) in after_name.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '>') => {
                end = i;
                break;
            }
            _ => {}
        }
    }
    after_name[..end].trim_end().trim_end_matches('/').trim_end()
}

/// Convert a tl node (recursively) into a detached node of `doc`.
fn convert(
    doc: &mut Document,
    handle: tl::NodeHandle,
    parser: &tl::Parser,
    raw_text: bool,
) -> Option<NodeId> {
    let node = handle.get(parser)?;

    match node {
        tl::Node::Tag(tag) => {
            let tag_name = tag.name().as_utf8_str().to_ascii_lowercase();
            let id = doc.create_element(&tag_name);

            // tl does not keep attribute order, so read them from the source.
            let raw = tag.raw().as_utf8_str();
            for (key, value) in parse_attributes(attribute_source(&raw)) {
                let key = key.to_ascii_lowercase();
                if doc.has_attr(id, &key) {
                    continue;
                }
                // Fresh, detached element: nothing is recorded.
                let _ = doc.set_attribute(id, &key, &unescape(&value));
            }

            let raw_children = is_raw_text_element(&tag_name);
            for child in tag.children().top().iter() {
                if let Some(child_id) = convert(doc, *child, parser, raw_children) {
                    doc.attach(id, child_id, None);
                }
            }
            Some(id)
        }
        tl::Node::Raw(bytes) => {
            let text = bytes.as_utf8_str();
            if text.is_empty() {
                return None;
            }
            let text = if raw_text {
                text.into_owned()
            } else {
                unescape(&text).into_owned()
            };
            Some(doc.create_text(text))
        }
        tl::Node::Comment(bytes) => {
            let raw = bytes.as_utf8_str();
            let body = raw
                .strip_prefix("<!--")
                .and_then(|s| s.strip_suffix("-->"))
                .unwrap_or(&raw);
            Some(doc.create_comment(body.to_string()))
        }
    }
}

/// Place fragment nodes into `<html><head></head><body>…</body></html>`.
fn wrap_fragment(doc: &mut Document, nodes: Vec<NodeId>) {
    let html = doc.create_element("html");
    let head = doc.create_element("head");
    let body = doc.create_element("body");
    doc.attach(html, head, None);
    doc.attach(html, body, None);
    for id in nodes {
        let target = match doc.tag(id) {
            Some("head") => {
                let children = std::mem::take(&mut doc.node_mut(id).children);
                for child in children {
                    doc.attach(head, child, None);
                }
                continue;
            }
            Some("title" | "meta" | "link" | "base") => head,
            _ => body,
        };
        doc.attach(target, id, None);
    }
    let root = doc.root();
    doc.attach(root, html, None);
}

fn ensure_head_and_body(doc: &mut Document) {
    let Some(html) = doc.document_element() else {
        return;
    };
    if doc.head().is_none() {
        let head = doc.create_element("head");
        let first = doc.children(html).first().copied();
        doc.attach(html, head, first);
    }
    if doc.body().is_none() {
        let body = doc.create_element("body");
        doc.attach(html, body, None);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_document() {
        let doc = Document::parse(
            "<!DOCTYPE html><html><head><title>T</title></head><body><p id=\"a\">Hi</p></body></html>",
        )
        .unwrap();
        assert_eq!(doc.doctype(), Some("html"));
        let body = doc.body().unwrap();
        let p = doc.children(body)[0];
        assert_eq!(doc.tag(p), Some("p"));
        assert_eq!(doc.attr(p, "id"), Some("a"));
        assert_eq!(doc.text_content(p), "Hi");
    }

    #[test]
    fn test_parse_fragment_is_wrapped() {
        let doc = Document::parse("<div class=\"x\">one</div><span>two</span>").unwrap();
        let body = doc.body().unwrap();
        assert_eq!(doc.children(body).len(), 2);
        assert!(doc.head().is_some());
        assert_eq!(doc.doctype(), None);
    }

    #[test]
    fn test_parse_decodes_entities() {
        let doc = Document::parse("<p title=\"a &amp; b\">1 &lt; 2</p>").unwrap();
        let p = doc.children(doc.body().unwrap())[0];
        assert_eq!(doc.attr(p, "title"), Some("a & b"));
        assert_eq!(doc.text_content(p), "1 < 2");
    }

    #[test]
    fn test_parse_boolean_attribute() {
        let doc = Document::parse("<input type=\"checkbox\" checked>").unwrap();
        let input = doc.children(doc.body().unwrap())[0];
        assert_eq!(doc.attr(input, "checked"), Some(""));
        assert!(doc.checked(input));
    }

    #[test]
    fn test_parsed_document_is_unobserved() {
        let mut doc = Document::parse("<p>x</p>").unwrap();
        assert!(!doc.is_observed());
        assert!(doc.take_records().is_empty());
    }

    #[test]
    fn test_attribute_order_is_preserved() {
        let doc = Document::parse("<div data-b=\"2\" id=\"x\" class=\"c\" data-a=\"1\"></div>").unwrap();
        let div = doc.children(doc.body().unwrap())[0];
        let names: Vec<&str> = doc
            .element(div)
            .unwrap()
            .attrs()
            .iter()
            .map(|(k, _)| k.as_str())
            .collect();
        assert_eq!(names, vec!["data-b", "id", "class", "data-a"]);
    }

    #[test]
    fn test_attribute_source() {
        assert_eq!(attribute_source("<div a=\"1>2\" b>text</div>"), " a=\"1>2\" b");
        assert_eq!(attribute_source("<br/>"), "");
        assert_eq!(attribute_source("<img src='x.png' />"), " src='x.png'");
        assert_eq!(attribute_source("<input disabled / >"), " disabled");
    }

    #[test]
    fn test_split_doctype_case_insensitive() {
        let (doctype, rest) = split_doctype("  <!doctype HTML><p>");
        assert_eq!(doctype.as_deref(), Some("HTML"));
        assert_eq!(rest, "<p>");
    }
}
