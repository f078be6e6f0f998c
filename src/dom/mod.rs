//! Live document model.
//!
//! An arena of element, text and comment nodes addressed by [`NodeId`].
//! Structural, attribute and character-data changes made through the
//! mutation API are queued as [`Mutation`] records while the document is
//! observed, the same way a browser queues records for a mutation observer.
//! Changes inside a subtree matching the quiet selector are never queued;
//! the check runs when the change happens, so a later removal cannot hide
//! where the node was.
//!
//! JS-only state (form control values, focus, text selection) lives beside
//! the tree and never produces records.
//!
//! # Module Structure
//!
//! - `html` - escaping and element classification
//! - `parse` - HTML → `Document` (via `tl`)
//! - `serialize` - `Document` → HTML
//! - `selector` - compound selector matching
//! - `morph` - in-place reconciliation against another document

pub mod html;
pub mod morph;
mod parse;
pub mod selector;
mod serialize;

pub use morph::morph;
pub use selector::Selector;

use thiserror::Error;

/// Handle to a node inside one [`Document`].
///
/// Ids are stable while the node is reachable and survive cloning, so a
/// snapshot clone can be addressed with the live document's ids. Slots of
/// nodes dropped by [`Document::reclaim_detached`] are reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomError {
    #[error("node {0:?} is not an element")]
    NotElement(NodeId),

    #[error("node {0:?} does not hold character data")]
    NotCharacterData(NodeId),

    #[error("inserting {child:?} into {parent:?} would create a cycle")]
    Hierarchy { parent: NodeId, child: NodeId },

    #[error("reference node {0:?} is not a child of the target")]
    NotAChild(NodeId),

    #[error("HTML parse error: {0}")]
    Parse(String),
}

/// Node payload.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Document,
    Element(Element),
    Text(String),
    Comment(String),
}

/// Element payload: tag, ordered attributes and live form properties.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag: String,
    attrs: Vec<(String, String)>,
    form: FormState,
}

/// Live form control properties that the markup does not reflect.
///
/// `None` means "not touched since parse": the property falls back to the
/// backing attribute (or, for `textarea`, the text content).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormState {
    pub value: Option<String>,
    pub checked: Option<bool>,
    pub selected: Option<bool>,
}

impl Element {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attrs: Vec::new(),
            form: FormState::default(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn attrs(&self) -> &[(String, String)] {
        &self.attrs
    }

    pub fn form(&self) -> &FormState {
        &self.form
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .is_some_and(|list| list.split_ascii_whitespace().any(|c| c == class))
    }
}

/// Raw mutation record, queued while the document is observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    ChildList {
        target: NodeId,
        added: Vec<NodeId>,
        removed: Vec<NodeId>,
        previous_sibling: Option<NodeId>,
        next_sibling: Option<NodeId>,
    },
    Attribute {
        target: NodeId,
        name: String,
        old_value: Option<String>,
    },
    CharacterData {
        target: NodeId,
        /// Parent element when the change happened.
        owner: Option<NodeId>,
        old_value: String,
    },
}

/// Text selection inside the focused control (character offsets).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// An HTML document.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    free: Vec<NodeId>,
    doctype: Option<String>,
    records: Vec<Mutation>,
    observed: bool,
    quiet: Option<Selector>,
    focus: Option<NodeId>,
    selection: Option<Selection>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Empty document holding only the document node.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                kind: NodeKind::Document,
                parent: None,
                children: Vec::new(),
            }],
            free: Vec::new(),
            doctype: None,
            records: Vec::new(),
            observed: false,
            quiet: None,
            focus: None,
            selection: None,
        }
    }

    /// `<!DOCTYPE html><html><head></head><body></body></html>`
    pub fn empty_html() -> Self {
        let mut doc = Self::new();
        doc.doctype = Some("html".to_string());
        let html = doc.create_element("html");
        let head = doc.create_element("head");
        let body = doc.create_element("body");
        doc.attach(html, head, None);
        doc.attach(html, body, None);
        doc.attach(doc.root(), html, None);
        doc
    }

    /// Detached copy for snapshots: same ids, no queued records, unobserved.
    pub fn detached_clone(&self) -> Self {
        let mut clone = self.clone();
        clone.records.clear();
        clone.observed = false;
        clone
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Start or stop queueing mutation records.
    pub fn set_observed(&mut self, observed: bool) {
        self.observed = observed;
        if !observed {
            self.records.clear();
        }
    }

    pub fn is_observed(&self) -> bool {
        self.observed
    }

    /// Changes inside subtrees matching `selector` are not queued.
    pub fn set_quiet_selector(&mut self, selector: Option<Selector>) {
        self.quiet = selector;
    }

    /// Drain queued mutation records in mutation order.
    pub fn take_records(&mut self) -> Vec<Mutation> {
        std::mem::take(&mut self.records)
    }

    fn record(&mut self, mutation: Mutation) {
        if !self.observed {
            return;
        }
        if let Some(quiet) = &self.quiet {
            let anchor = match &mutation {
                Mutation::ChildList { target, .. } | Mutation::Attribute { target, .. } => Some(*target),
                Mutation::CharacterData { owner, .. } => *owner,
            };
            if anchor.is_some_and(|n| self.closest(n, quiet).is_some()) {
                return;
            }
        }
        self.records.push(mutation);
    }

    // =========================================================================
    // Tree access
    // =========================================================================

    /// The document node.
    #[inline]
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn doctype(&self) -> Option<&str> {
        self.doctype.as_deref()
    }

    pub fn set_doctype(&mut self, doctype: Option<String>) {
        self.doctype = doctype;
    }

    /// The `<html>` element.
    pub fn document_element(&self) -> Option<NodeId> {
        self.children(self.root())
            .iter()
            .copied()
            .find(|&id| self.is_element(id))
    }

    pub fn head(&self) -> Option<NodeId> {
        self.child_element(self.document_element()?, "head")
    }

    pub fn body(&self) -> Option<NodeId> {
        self.child_element(self.document_element()?, "body")
    }

    fn child_element(&self, parent: NodeId, tag: &str) -> Option<NodeId> {
        self.children(parent)
            .iter()
            .copied()
            .find(|&id| self.tag(id) == Some(tag))
    }

    #[inline]
    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    #[inline]
    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.node(id).kind
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match &self.node(id).kind {
            NodeKind::Element(el) => Some(el),
            _ => None,
        }
    }

    fn element_mut(&mut self, id: NodeId) -> Result<&mut Element, DomError> {
        match &mut self.node_mut(id).kind {
            NodeKind::Element(el) => Ok(el),
            _ => Err(DomError::NotElement(id)),
        }
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.node(id).kind, NodeKind::Element(_))
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|el| el.tag.as_str())
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id)?.attr(name)
    }

    pub fn has_attr(&self, id: NodeId, name: &str) -> bool {
        self.attr(id, name).is_some()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    /// Nearest ancestor that is an element.
    pub fn parent_element(&self, id: NodeId) -> Option<NodeId> {
        self.parent(id).filter(|&p| self.is_element(p))
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    pub fn previous_sibling(&self, id: NodeId) -> Option<NodeId> {
        let siblings = self.children(self.parent(id)?);
        let pos = siblings.iter().position(|&c| c == id)?;
        pos.checked_sub(1).map(|p| siblings[p])
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let siblings = self.children(self.parent(id)?);
        let pos = siblings.iter().position(|&c| c == id)?;
        siblings.get(pos + 1).copied()
    }

    /// Pre-order descendants, excluding `id` itself.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev().copied());
        }
        out
    }

    /// `id` followed by its element descendants, in document order.
    pub fn element_subtree(&self, id: NodeId) -> Vec<NodeId> {
        std::iter::once(id)
            .chain(self.descendants(id))
            .filter(|&n| self.is_element(n))
            .collect()
    }

    /// Self and ancestors, innermost first.
    pub fn ancestors_inclusive(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(id), |&n| self.parent(n))
    }

    /// Whether the node is attached to the document tree.
    pub fn is_connected(&self, id: NodeId) -> bool {
        self.ancestors_inclusive(id).any(|n| n == self.root())
    }

    pub fn contains(&self, ancestor: NodeId, id: NodeId) -> bool {
        self.ancestors_inclusive(id).any(|n| n == ancestor)
    }

    /// Character data of a text or comment node.
    pub fn text(&self, id: NodeId) -> Option<&str> {
        match &self.node(id).kind {
            NodeKind::Text(t) | NodeKind::Comment(t) => Some(t),
            _ => None,
        }
    }

    /// Concatenated text of all descendant text nodes.
    pub fn text_content(&self, id: NodeId) -> String {
        if let NodeKind::Text(t) = &self.node(id).kind {
            return t.clone();
        }
        self.descendants(id)
            .into_iter()
            .filter_map(|n| match &self.node(n).kind {
                NodeKind::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    // =========================================================================
    // Selectors
    // =========================================================================

    pub fn matches(&self, id: NodeId, selector: &Selector) -> bool {
        self.element(id).is_some_and(|el| selector.matches(el))
    }

    /// Nearest inclusive ancestor matching the selector.
    pub fn closest(&self, id: NodeId, selector: &Selector) -> Option<NodeId> {
        self.ancestors_inclusive(id)
            .find(|&n| self.matches(n, selector))
    }

    /// All connected elements matching the selector, in document order.
    pub fn select_all(&self, selector: &Selector) -> Vec<NodeId> {
        self.descendants(self.root())
            .into_iter()
            .filter(|&n| self.matches(n, selector))
            .collect()
    }

    // =========================================================================
    // Node creation
    // =========================================================================

    fn push_node(&mut self, kind: NodeKind) -> NodeId {
        let node = Node {
            kind,
            parent: None,
            children: Vec::new(),
        };
        if let Some(id) = self.free.pop() {
            *self.node_mut(id) = node;
            return id;
        }
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Free every node not reachable from the document node. Their slots are
    /// reused by later node creation. Returns how many were freed.
    ///
    /// Callers must not hold ids of detached nodes across this call.
    pub fn reclaim_detached(&mut self) -> usize {
        let mut reachable = vec![false; self.nodes.len()];
        reachable[self.root().index()] = true;
        for id in self.descendants(self.root()) {
            reachable[id.index()] = true;
        }
        for id in &self.free {
            reachable[id.index()] = true;
        }

        let mut freed = 0;
        for (index, keep) in reachable.into_iter().enumerate() {
            if keep {
                continue;
            }
            let id = NodeId(index as u32);
            *self.node_mut(id) = Node {
                kind: NodeKind::Text(String::new()),
                parent: None,
                children: Vec::new(),
            };
            self.free.push(id);
            freed += 1;
        }
        freed
    }

    /// Slots in the arena, free ones included.
    pub fn arena_len(&self) -> usize {
        self.nodes.len()
    }

    /// Nodes reachable from the document node, itself included.
    pub fn live_node_count(&self) -> usize {
        self.descendants(self.root()).len() + 1
    }

    /// Create a detached element.
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push_node(NodeKind::Element(Element::new(tag)))
    }

    /// Create a detached text node.
    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        self.push_node(NodeKind::Text(text.into()))
    }

    /// Create a detached comment node.
    pub fn create_comment(&mut self, text: impl Into<String>) -> NodeId {
        self.push_node(NodeKind::Comment(text.into()))
    }

    /// Deep-copy a subtree of another document into this one (detached).
    pub fn import_node(&mut self, source: &Document, id: NodeId) -> NodeId {
        let copy = self.push_node(source.kind(id).clone());
        for &child in source.children(id) {
            let child_copy = self.import_node(source, child);
            self.attach(copy, child_copy, None);
        }
        copy
    }

    // =========================================================================
    // Mutation API (records)
    // =========================================================================

    /// Append `child` to `parent`, moving it if it is already attached.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        self.insert_before(parent, child, None)
    }

    /// Insert `child` before `reference` (or at the end when `None`).
    pub fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> Result<(), DomError> {
        if self.contains(child, parent) {
            return Err(DomError::Hierarchy { parent, child });
        }
        if let Some(r) = reference
            && self.parent(r) != Some(parent)
        {
            return Err(DomError::NotAChild(r));
        }
        if self.parent(child).is_some() {
            self.remove(child)?;
        }

        let position = self.attach(parent, child, reference);
        let siblings = self.children(parent);
        let previous_sibling = position.checked_sub(1).map(|p| siblings[p]);
        let next_sibling = siblings.get(position + 1).copied();
        self.record(Mutation::ChildList {
            target: parent,
            added: vec![child],
            removed: Vec::new(),
            previous_sibling,
            next_sibling,
        });
        Ok(())
    }

    /// Link without recording. Returns the child's index in `parent`.
    fn attach(&mut self, parent: NodeId, child: NodeId, reference: Option<NodeId>) -> usize {
        let position = reference
            .and_then(|r| self.children(parent).iter().position(|&c| c == r))
            .unwrap_or(self.children(parent).len());
        self.node_mut(parent).children.insert(position, child);
        self.node_mut(child).parent = Some(parent);
        position
    }

    /// Detach a node from its parent. Detached nodes are a no-op.
    pub fn remove(&mut self, id: NodeId) -> Result<(), DomError> {
        let Some(parent) = self.parent(id) else {
            return Ok(());
        };
        let previous_sibling = self.previous_sibling(id);
        let next_sibling = self.next_sibling(id);

        if self.focus.is_some_and(|f| self.contains(id, f)) {
            self.blur();
        }

        self.node_mut(parent).children.retain(|&c| c != id);
        self.node_mut(id).parent = None;
        self.record(Mutation::ChildList {
            target: parent,
            added: Vec::new(),
            removed: vec![id],
            previous_sibling,
            next_sibling,
        });
        Ok(())
    }

    /// Remove all children of a node.
    pub fn clear_children(&mut self, id: NodeId) -> Result<(), DomError> {
        for child in self.children(id).to_vec() {
            self.remove(child)?;
        }
        Ok(())
    }

    /// Set an attribute. Always records, even when the value is unchanged.
    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) -> Result<(), DomError> {
        let name = name.to_ascii_lowercase();
        let el = self.element_mut(id)?;
        let old_value = match el.attrs.iter_mut().find(|(k, _)| *k == name) {
            Some((_, v)) => Some(std::mem::replace(v, value.to_string())),
            None => {
                el.attrs.push((name.clone(), value.to_string()));
                None
            }
        };
        self.record(Mutation::Attribute {
            target: id,
            name,
            old_value,
        });
        Ok(())
    }

    /// Remove an attribute. Records only when it was present.
    pub fn remove_attribute(&mut self, id: NodeId, name: &str) -> Result<(), DomError> {
        let el = self.element_mut(id)?;
        let Some(pos) = el.attrs.iter().position(|(k, _)| k == name) else {
            return Ok(());
        };
        let (name, old) = el.attrs.remove(pos);
        self.record(Mutation::Attribute {
            target: id,
            name,
            old_value: Some(old),
        });
        Ok(())
    }

    /// Replace the character data of a text or comment node.
    pub fn set_text(&mut self, id: NodeId, text: &str) -> Result<(), DomError> {
        let old_value = match &mut self.node_mut(id).kind {
            NodeKind::Text(t) | NodeKind::Comment(t) => std::mem::replace(t, text.to_string()),
            _ => return Err(DomError::NotCharacterData(id)),
        };
        let owner = self.parent_element(id);
        self.record(Mutation::CharacterData {
            target: id,
            owner,
            old_value,
        });
        Ok(())
    }

    /// `element.textContent = text`: replace all children with one text node.
    pub fn set_text_content(&mut self, id: NodeId, text: &str) -> Result<(), DomError> {
        if !self.is_element(id) {
            return self.set_text(id, text);
        }
        self.clear_children(id)?;
        if !text.is_empty() {
            let node = self.create_text(text);
            self.append_child(id, node)?;
        }
        Ok(())
    }

    // =========================================================================
    // JS-only state (no records)
    // =========================================================================

    /// Live `value` property. Falls back to the `value` attribute, or to the
    /// text content for `textarea`.
    pub fn value(&self, id: NodeId) -> Option<String> {
        let el = self.element(id)?;
        if let Some(v) = &el.form.value {
            return Some(v.clone());
        }
        match el.tag.as_str() {
            "textarea" => Some(self.text_content(id)),
            "select" => self.selected_option(id).map(|opt| {
                self.attr(opt, "value")
                    .map(str::to_string)
                    .unwrap_or_else(|| self.text_content(opt))
            }),
            _ => el.attr("value").map(str::to_string),
        }
    }

    pub fn set_value(&mut self, id: NodeId, value: &str) -> Result<(), DomError> {
        self.element_mut(id)?.form.value = Some(value.to_string());
        Ok(())
    }

    /// Live `checked` property; falls back to the `checked` attribute.
    pub fn checked(&self, id: NodeId) -> bool {
        self.element(id).is_some_and(|el| {
            el.form.checked.unwrap_or_else(|| el.attr("checked").is_some())
        })
    }

    pub fn set_checked(&mut self, id: NodeId, checked: bool) -> Result<(), DomError> {
        self.element_mut(id)?.form.checked = Some(checked);
        Ok(())
    }

    /// Live `selected` property of an `option`.
    pub fn selected(&self, id: NodeId) -> bool {
        self.element(id).is_some_and(|el| {
            el.form.selected.unwrap_or_else(|| el.attr("selected").is_some())
        })
    }

    pub fn set_selected(&mut self, id: NodeId, selected: bool) -> Result<(), DomError> {
        self.element_mut(id)?.form.selected = Some(selected);
        Ok(())
    }

    fn selected_option(&self, select: NodeId) -> Option<NodeId> {
        let options: Vec<NodeId> = self
            .descendants(select)
            .into_iter()
            .filter(|&n| self.tag(n) == Some("option"))
            .collect();
        options
            .iter()
            .copied()
            .find(|&o| self.selected(o))
            .or_else(|| options.first().copied())
    }

    /// Reset live form properties so they follow the markup again.
    pub fn reset_form_state(&mut self, id: NodeId) -> Result<(), DomError> {
        self.element_mut(id)?.form = FormState::default();
        Ok(())
    }

    pub fn focused(&self) -> Option<NodeId> {
        self.focus
    }

    pub fn focus(&mut self, id: NodeId) -> Result<(), DomError> {
        if !self.is_element(id) {
            return Err(DomError::NotElement(id));
        }
        if self.focus != Some(id) {
            self.selection = None;
        }
        self.focus = Some(id);
        Ok(())
    }

    pub fn blur(&mut self) {
        self.focus = None;
        self.selection = None;
    }

    pub fn selection(&self) -> Option<Selection> {
        self.selection
    }

    /// Select a range inside the focused control.
    pub fn set_selection(&mut self, start: usize, end: usize) {
        if self.focus.is_some() {
            self.selection = Some(Selection {
                start: start.min(end),
                end: start.max(end),
            });
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
