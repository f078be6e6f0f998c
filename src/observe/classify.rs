//! Raw mutation → `ChangeRecord` classification.
//!
//! Added and removed subtrees expand into one record per element. Text and
//! comment churn is reported as a `TextChange` on the element that owned the
//! node when it changed. Anything inside an ignored subtree is dropped; the
//! document already skips changes that were ignored when they happened.

use crate::dom::{Document, Mutation, NodeId, Selector};

use super::{ChangeKind, ChangeRecord};

/// Classify one flush worth of raw mutations, keeping mutation order.
pub(super) fn classify(doc: &Document, raw: &[Mutation], ignore: &Selector) -> Vec<ChangeRecord> {
    let mut out = Vec::new();

    for mutation in raw {
        match mutation {
            Mutation::ChildList {
                target,
                added,
                removed,
                previous_sibling,
                next_sibling,
            } => {
                let siblings = (*previous_sibling, *next_sibling);
                for &node in removed {
                    expand(doc, ChangeKind::Remove, *target, node, siblings, ignore, &mut out);
                }
                for &node in added {
                    expand(doc, ChangeKind::Add, *target, node, siblings, ignore, &mut out);
                }
            }
            Mutation::Attribute {
                target,
                name,
                old_value,
            } => {
                if is_ignored(doc, *target, None, ignore) {
                    continue;
                }
                out.push(ChangeRecord {
                    kind: ChangeKind::AttributeChange,
                    element: *target,
                    parent: doc.parent_element(*target),
                    attribute: Some(name.clone()),
                    old_value: old_value.clone(),
                    new_value: doc.attr(*target, name).map(str::to_string),
                    previous_sibling: None,
                    next_sibling: None,
                });
            }
            Mutation::CharacterData {
                target,
                owner,
                old_value,
            } => {
                let Some(owner) = *owner else {
                    continue;
                };
                if is_ignored(doc, owner, None, ignore) {
                    continue;
                }
                out.push(ChangeRecord {
                    kind: ChangeKind::TextChange,
                    element: owner,
                    parent: doc.parent_element(owner),
                    attribute: None,
                    old_value: Some(old_value.clone()),
                    new_value: doc.text(*target).map(str::to_string),
                    previous_sibling: None,
                    next_sibling: None,
                });
            }
        }
    }

    out
}

/// Emit records for an added or removed node and its element descendants.
fn expand(
    doc: &Document,
    kind: ChangeKind,
    target: NodeId,
    node: NodeId,
    (previous_sibling, next_sibling): (Option<NodeId>, Option<NodeId>),
    ignore: &Selector,
    out: &mut Vec<ChangeRecord>,
) {
    if !doc.is_element(node) {
        // Text or comment nodes count as a content change of the parent.
        if doc.is_element(target) && !is_ignored(doc, target, None, ignore) {
            out.push(ChangeRecord {
                kind: ChangeKind::TextChange,
                element: target,
                parent: doc.parent_element(target),
                attribute: None,
                old_value: None,
                new_value: None,
                previous_sibling: None,
                next_sibling: None,
            });
        }
        return;
    }

    // A removed subtree is detached, so its former parent is checked too.
    let attach_point = (kind == ChangeKind::Remove).then_some(target);

    for element in doc.element_subtree(node) {
        if is_ignored(doc, element, attach_point, ignore) {
            continue;
        }
        let is_root = element == node;
        out.push(ChangeRecord {
            kind,
            element,
            parent: if is_root {
                Some(target)
            } else {
                doc.parent_element(element)
            },
            attribute: None,
            old_value: None,
            new_value: None,
            previous_sibling: if is_root { previous_sibling } else { None },
            next_sibling: if is_root { next_sibling } else { None },
        });
    }
}

fn is_ignored(doc: &Document, node: NodeId, attach_point: Option<NodeId>, ignore: &Selector) -> bool {
    let marked = |id: NodeId| doc.closest(id, ignore).is_some();
    marked(node) || attach_point.is_some_and(marked)
}

// =============================================================================
// Tests
// =============================================================================
