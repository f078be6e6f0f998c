//! `Document` → HTML, following `outerHTML` serialization rules.

use super::html::{escape_attr, escape_text, is_raw_text_element, is_void_element};
use super::{Document, NodeId, NodeKind};

impl Document {
    /// Serialize a node and its subtree.
    pub fn outer_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_node(id, &mut out, false);
        out
    }

    /// Serialize only the children of a node.
    pub fn inner_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        let raw = self.tag(id).is_some_and(is_raw_text_element);
        for &child in self.children(id) {
            self.write_node(child, &mut out, raw);
        }
        out
    }

    /// `<!DOCTYPE html>` followed by the outer HTML of `<html>`.
    pub fn to_html(&self) -> String {
        let mut out = String::from("<!DOCTYPE html>");
        if let Some(html) = self.document_element() {
            self.write_node(html, &mut out, false);
        }
        out
    }

    fn write_node(&self, id: NodeId, out: &mut String, raw_parent: bool) {
        match self.kind(id) {
            NodeKind::Document => {
                for &child in self.children(id) {
                    self.write_node(child, out, false);
                }
            }
            NodeKind::Text(text) => {
                if raw_parent {
                    out.push_str(text);
                } else {
                    out.push_str(&escape_text(text));
                }
            }
            NodeKind::Comment(text) => {
                out.push_str("<!--");
                out.push_str(text);
                out.push_str("-->");
            }
            NodeKind::Element(el) => {
                out.push('<');
                out.push_str(&el.tag);
                for (name, value) in el.attrs() {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    out.push_str(&escape_attr(value));
                    out.push('"');
                }
                out.push('>');

                if is_void_element(&el.tag) {
                    return;
                }

                let raw = is_raw_text_element(&el.tag);
                for &child in self.children(id) {
                    self.write_node(child, out, raw);
                }

                out.push_str("</");
                out.push_str(&el.tag);
                out.push('>');
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_html_prefixes_doctype() {
        let doc = Document::empty_html();
        assert_eq!(
            doc.to_html(),
            "<!DOCTYPE html><html><head></head><body></body></html>"
        );
    }

    #[test]
    fn test_void_and_boolean_attributes() {
        let doc = Document::parse("<input type=\"checkbox\" checked><br>").unwrap();
        let body = doc.body().unwrap();
        assert_eq!(
            doc.inner_html(body),
            "<input type=\"checkbox\" checked=\"\"><br>"
        );
    }

    #[test]
    fn test_escaping_rules() {
        let mut doc = Document::empty_html();
        let body = doc.body().unwrap();
        let p = doc.create_element("p");
        doc.append_child(body, p).unwrap();
        doc.set_attribute(p, "title", "\"a\" <b>").unwrap();
        doc.set_text_content(p, "1 < 2 & \"3\"").unwrap();
        assert_eq!(
            doc.outer_html(p),
            "<p title=\"&quot;a&quot; <b>\">1 &lt; 2 &amp; \"3\"</p>"
        );
    }

    #[test]
    fn test_script_content_is_raw() {
        let doc = Document::parse("<script>if (a && b) {}</script>").unwrap();
        let html = doc.to_html();
        assert!(html.contains("<script>if (a && b) {}</script>"));
    }

    #[test]
    fn test_parse_serialize_is_stable() {
        let source = "<!DOCTYPE html><html><head><title>A &amp; B</title></head>\
                      <body><!-- note --><div class=\"card\" data-x=\"1\"><p>Hello</p></div></body></html>";
        let once = Document::parse(source).unwrap().to_html();
        let twice = Document::parse(&once).unwrap().to_html();
        assert_eq!(once, source);
        assert_eq!(once, twice);
    }
}
