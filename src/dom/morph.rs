//! In-place reconciliation of a live document against a new document.
//!
//! Walks both trees and edits the live one with the normal mutation API, so
//! observers see exactly the nodes that changed. Children are matched by
//! `id` first, then positionally by node type and tag. Matched nodes are
//! updated in place, which keeps the focused element, its selection and the
//! live form state attached to the same node.
//!
//! A live form property survives the merge when the markup that backs it is
//! unchanged remotely; when the remote side changed the backing attribute
//! (or textarea content) the property is reset to follow the new markup.

use super::html::is_form_control;
use super::{Document, DomError, NodeId, NodeKind};

/// Reconcile `live` so it serializes like `incoming`.
pub fn morph(live: &mut Document, incoming: &Document) -> Result<(), DomError> {
    if live.doctype() != incoming.doctype() {
        live.set_doctype(incoming.doctype().map(str::to_string));
    }
    let (live_root, incoming_root) = (live.root(), incoming.root());
    morph_children(live, live_root, incoming, incoming_root)
}

fn morph_node(
    live: &mut Document,
    target: NodeId,
    incoming: &Document,
    source: NodeId,
) -> Result<(), DomError> {
    match incoming.kind(source) {
        NodeKind::Text(text) | NodeKind::Comment(text) => {
            if live.text(target) != Some(text.as_str()) {
                live.set_text(target, text)?;
            }
            Ok(())
        }
        NodeKind::Element(_) => {
            let form_changed = form_markup_changed(live, target, incoming, source);
            sync_attributes(live, target, incoming, source)?;
            morph_children(live, target, incoming, source)?;
            if form_changed {
                live.reset_form_state(target)?;
            }
            Ok(())
        }
        NodeKind::Document => morph_children(live, target, incoming, source),
    }
}

/// Whether the markup backing a form control's live state differs.
fn form_markup_changed(
    live: &Document,
    target: NodeId,
    incoming: &Document,
    source: NodeId,
) -> bool {
    let Some(tag) = live.tag(target) else {
        return false;
    };
    if !is_form_control(tag) {
        return false;
    }
    if tag == "textarea" {
        return live.text_content(target) != incoming.text_content(source);
    }
    ["value", "checked", "selected"]
        .iter()
        .any(|name| live.attr(target, name) != incoming.attr(source, name))
}

fn sync_attributes(
    live: &mut Document,
    target: NodeId,
    incoming: &Document,
    source: NodeId,
) -> Result<(), DomError> {
    let wanted = incoming
        .element(source)
        .map(|el| el.attrs().to_vec())
        .unwrap_or_default();

    for (name, value) in &wanted {
        if live.attr(target, name) != Some(value.as_str()) {
            live.set_attribute(target, name, value)?;
        }
    }

    let stale: Vec<String> = live
        .element(target)
        .map(|el| {
            el.attrs()
                .iter()
                .filter(|(name, _)| !wanted.iter().any(|(w, _)| w == name))
                .map(|(name, _)| name.clone())
                .collect()
        })
        .unwrap_or_default();
    for name in stale {
        live.remove_attribute(target, &name)?;
    }
    Ok(())
}

fn morph_children(
    live: &mut Document,
    parent: NodeId,
    incoming: &Document,
    source_parent: NodeId,
) -> Result<(), DomError> {
    let mut cursor = 0;

    for &source in incoming.children(source_parent) {
        let current = live.children(parent).to_vec();
        let pending = &current[cursor.min(current.len())..];

        let matched = id_match(live, pending, incoming, source).or_else(|| {
            pending
                .first()
                .filter(|&&candidate| soft_match(live, candidate, incoming, source))
                .map(|_| 0)
        });

        match matched {
            Some(offset) => {
                for &skipped in &pending[..offset] {
                    live.remove(skipped)?;
                }
                morph_node(live, pending[offset], incoming, source)?;
            }
            None => {
                let copy = live.import_node(incoming, source);
                live.insert_before(parent, copy, pending.first().copied())?;
            }
        }
        cursor += 1;
    }

    let leftover: Vec<NodeId> = live.children(parent).iter().skip(cursor).copied().collect();
    for extra in leftover {
        live.remove(extra)?;
    }
    Ok(())
}

/// Offset of a pending live element with the same tag and `id`.
fn id_match(
    live: &Document,
    pending: &[NodeId],
    incoming: &Document,
    source: NodeId,
) -> Option<usize> {
    let id = incoming.attr(source, "id")?;
    let tag = incoming.tag(source)?;
    pending
        .iter()
        .position(|&n| live.tag(n) == Some(tag) && live.attr(n, "id") == Some(id))
}

fn soft_match(live: &Document, target: NodeId, incoming: &Document, source: NodeId) -> bool {
    match (live.kind(target), incoming.kind(source)) {
        (NodeKind::Text(_), NodeKind::Text(_)) => true,
        (NodeKind::Comment(_), NodeKind::Comment(_)) => true,
        (NodeKind::Element(a), NodeKind::Element(b)) => a.tag == b.tag && a.attr("id") == b.attr("id"),
        _ => false,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Mutation;

    fn live(html: &str) -> Document {
        let mut doc = Document::parse(html).unwrap();
        doc.set_observed(true);
        doc
    }

    fn by_id(doc: &Document, id: &str) -> NodeId {
        doc.select_all(&crate::dom::Selector::parse(&format!("#{id}")).unwrap())[0]
    }

    #[test]
    fn test_morph_reaches_incoming_markup() {
        let mut doc = live("<ul><li>a</li><li>b</li></ul><p>x</p>");
        let incoming = Document::parse("<ul><li>a</li><li>B</li><li>c</li></ul>").unwrap();

        morph(&mut doc, &incoming).unwrap();
        assert_eq!(doc.to_html(), incoming.to_html());
    }

    #[test]
    fn test_identical_documents_produce_no_records() {
        let source = "<div id=\"a\" class=\"x\"><p>same</p></div>";
        let mut doc = live(source);
        let incoming = Document::parse(source).unwrap();

        morph(&mut doc, &incoming).unwrap();
        assert!(doc.take_records().is_empty());
    }

    #[test]
    fn test_only_changed_attribute_is_recorded() {
        let mut doc = live("<div id=\"a\" data-x=\"1\"><p>same</p></div>");
        let incoming = Document::parse("<div id=\"a\" data-x=\"2\"><p>same</p></div>").unwrap();

        morph(&mut doc, &incoming).unwrap();
        let records = doc.take_records();
        assert_eq!(records.len(), 1);
        assert!(matches!(&records[0], Mutation::Attribute { name, .. } if name == "data-x"));
    }

    #[test]
    fn test_id_match_keeps_node_identity() {
        let mut doc = live("<div id=\"first\"></div><input id=\"name\">");
        let input = by_id(&doc, "name");
        doc.focus(input).unwrap();
        doc.set_value(input, "typing").unwrap();
        doc.set_selection(2, 4);

        let incoming = Document::parse("<input id=\"name\"><div id=\"second\"></div>").unwrap();
        morph(&mut doc, &incoming).unwrap();

        assert_eq!(doc.focused(), Some(input));
        assert_eq!(doc.value(input).as_deref(), Some("typing"));
        assert!(doc.selection().is_some());
        assert_eq!(doc.to_html(), incoming.to_html());
    }

    #[test]
    fn test_remote_value_change_resets_live_value() {
        let mut doc = live("<input id=\"q\" value=\"old\">");
        let input = by_id(&doc, "q");
        doc.set_value(input, "local edit").unwrap();

        let incoming = Document::parse("<input id=\"q\" value=\"remote\">").unwrap();
        morph(&mut doc, &incoming).unwrap();
        assert_eq!(doc.value(input).as_deref(), Some("remote"));
    }

    #[test]
    fn test_text_node_updated_in_place() {
        let mut doc = live("<p id=\"p\">before</p>");
        let p = by_id(&doc, "p");
        let text = doc.children(p)[0];

        let incoming = Document::parse("<p id=\"p\">after</p>").unwrap();
        morph(&mut doc, &incoming).unwrap();

        assert_eq!(doc.children(p), &[text]);
        assert_eq!(doc.text(text), Some("after"));
    }
}
