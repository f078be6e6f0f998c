//! Hook types and the built-in hooks and directives.

use std::sync::Arc;

use thiserror::Error;

use crate::dom::{Document, DomError, NodeId};

#[derive(Debug, Error)]
pub enum HookError {
    #[error("{0}")]
    Failed(String),

    #[error("unknown before-save directive `{0}`")]
    UnknownDirective(String),

    #[error(transparent)]
    Dom(#[from] DomError),
}

impl HookError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

pub type HookFn = dyn Fn(&mut Document) -> Result<(), HookError> + Send + Sync;

/// Handler of an `onbeforesave` directive, invoked with the element that
/// carries it.
pub type DirectiveFn = dyn Fn(&mut Document, NodeId) -> Result<(), HookError> + Send + Sync;

pub(super) struct NamedHook {
    pub(super) name: String,
    pub(super) run: Arc<HookFn>,
}

/// Copy live form properties into markup so the clone serializes them.
pub fn form_state(doc: &mut Document) -> Result<(), HookError> {
    let root = doc.root();
    for id in doc.element_subtree(root) {
        let Some(el) = doc.element(id) else {
            continue;
        };
        let form = el.form().clone();
        let tag = el.tag.clone();
        let kind = el.attr("type").map(str::to_ascii_lowercase);

        match tag.as_str() {
            "input" if matches!(kind.as_deref(), Some("checkbox" | "radio")) => {
                if let Some(checked) = form.checked {
                    set_flag(doc, id, "checked", checked)?;
                }
            }
            "input" => {
                if let Some(value) = form.value {
                    doc.set_attribute(id, "value", &value)?;
                }
            }
            "textarea" => {
                if let Some(value) = form.value {
                    doc.set_text_content(id, &value)?;
                }
            }
            "select" => {
                if let Some(value) = form.value {
                    for option in doc.element_subtree(id) {
                        if doc.tag(option) != Some("option") {
                            continue;
                        }
                        let option_value = doc
                            .attr(option, "value")
                            .map(str::to_string)
                            .unwrap_or_else(|| doc.text_content(option));
                        set_flag(doc, option, "selected", option_value == value)?;
                    }
                }
            }
            "option" => {
                if let Some(selected) = form.selected {
                    set_flag(doc, id, "selected", selected)?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn set_flag(doc: &mut Document, id: NodeId, name: &str, on: bool) -> Result<(), DomError> {
    match (on, doc.has_attr(id, name)) {
        (true, false) => doc.set_attribute(id, name, ""),
        (false, true) => doc.remove_attribute(id, name),
        _ => Ok(()),
    }
}

/// `remove`: drop the element from the saved copy.
pub fn directive_remove(doc: &mut Document, id: NodeId) -> Result<(), HookError> {
    doc.remove(id)?;
    Ok(())
}

/// `empty`: keep the element but drop its children.
pub fn directive_empty(doc: &mut Document, id: NodeId) -> Result<(), HookError> {
    doc.clear_children(id)?;
    Ok(())
}
