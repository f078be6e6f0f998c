//! Compound selector matching.
//!
//! Supports what attribute-level collaborators actually use for filters and
//! markers: `tag`, `*`, `#id`, `.class`, `[attr]`, `[attr=value]` (quoted or
//! bare), combined into compounds and joined by commas. Combinators are
//! rejected.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use super::Element;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("empty selector")]
    Empty,

    #[error("unsupported selector syntax at `{0}`")]
    Unsupported(String),

    #[error("unterminated attribute selector in `{0}`")]
    Unterminated(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttrMatch {
    name: String,
    value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrMatch>,
}

impl Compound {
    fn matches(&self, el: &Element) -> bool {
        if self.tag.as_deref().is_some_and(|t| t != el.tag) {
            return false;
        }
        if self.id.as_deref().is_some_and(|id| el.attr("id") != Some(id)) {
            return false;
        }
        if !self.classes.iter().all(|c| el.has_class(c)) {
            return false;
        }
        self.attrs.iter().all(|m| match (&m.value, el.attr(&m.name)) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(want), Some(have)) => want == have,
        })
    }
}

/// A parsed selector list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    source: String,
    groups: Vec<Compound>,
}

impl Selector {
    pub fn parse(source: &str) -> Result<Self, SelectorError> {
        let groups = source
            .split(',')
            .map(|group| parse_compound(group.trim()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            source: source.trim().to_string(),
            groups,
        })
    }

    /// `[name]`
    pub fn attribute(name: &str) -> Self {
        Self {
            source: format!("[{name}]"),
            groups: vec![Compound {
                attrs: vec![AttrMatch {
                    name: name.to_ascii_lowercase(),
                    value: None,
                }],
                ..Compound::default()
            }],
        }
    }

    pub fn matches(&self, el: &Element) -> bool {
        self.groups.iter().any(|g| g.matches(el))
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn parse_compound(s: &str) -> Result<Compound, SelectorError> {
    if s.is_empty() {
        return Err(SelectorError::Empty);
    }

    let mut compound = Compound::default();
    let mut rest = s;

    while let Some(c) = rest.chars().next() {
        match c {
            '*' => rest = &rest[1..],
            '#' | '.' => {
                let body = &rest[1..];
                let len = body.find(|c: char| !is_ident_char(c)).unwrap_or(body.len());
                if len == 0 {
                    return Err(SelectorError::Unsupported(rest.to_string()));
                }
                let ident = body[..len].to_string();
                if c == '#' {
                    compound.id = Some(ident);
                } else {
                    compound.classes.push(ident);
                }
                rest = &body[len..];
            }
            '[' => {
                let close = rest
                    .find(']')
                    .ok_or_else(|| SelectorError::Unterminated(s.to_string()))?;
                compound.attrs.push(parse_attr(&rest[1..close], s)?);
                rest = &rest[close + 1..];
            }
            c if is_ident_char(c) && compound == Compound::default() => {
                let len = rest.find(|c: char| !is_ident_char(c)).unwrap_or(rest.len());
                compound.tag = Some(rest[..len].to_ascii_lowercase());
                rest = &rest[len..];
            }
            _ => return Err(SelectorError::Unsupported(rest.to_string())),
        }
    }

    Ok(compound)
}

fn parse_attr(inner: &str, source: &str) -> Result<AttrMatch, SelectorError> {
    let (name, value) = match inner.split_once('=') {
        Some((name, value)) => {
            let value = value.trim();
            let unquoted = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            (name.trim(), Some(unquoted.to_string()))
        }
        None => (inner.trim(), None),
    };
    if name.is_empty() || !name.chars().all(is_ident_char) {
        return Err(SelectorError::Unsupported(source.to_string()));
    }
    Ok(AttrMatch {
        name: name.to_ascii_lowercase(),
        value,
    })
}

// =============================================================================
// Tests
// =============================================================================
