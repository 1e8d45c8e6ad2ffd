//! Browser command data model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// `POS=` of a TAG command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagPosition {
    /// n-th match on the page, 1-based
    Absolute(u32),
    /// n-th match after the previously located element (`R3`, `R-1`)
    Relative(i32),
}

impl TagPosition {
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Some(rest) = text.strip_prefix(['R', 'r']) {
            let offset: i32 = rest.parse().ok()?;
            return (offset != 0).then_some(TagPosition::Relative(offset));
        }
        let index: u32 = text.parse().ok()?;
        (index > 0).then_some(TagPosition::Absolute(index))
    }
}

/// `TYPE=` / `ATTR=` locator of a TAG command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagQuery {
    pub pos: TagPosition,

    /// Upper-cased element name (`INPUT`, `A`, `*`)
    pub element: String,

    /// Sub-type after the colon in `TYPE=INPUT:TEXT`
    pub input_type: Option<String>,

    /// `ATTR=NAME:q&&CLASS:btn` pairs, name upper-cased; empty for `ATTR=*`
    pub attributes: Vec<(String, String)>,
}

impl TagQuery {
    pub fn parse_type(text: &str) -> (String, Option<String>) {
        match text.split_once(':') {
            Some((element, sub)) => (
                element.trim().to_ascii_uppercase(),
                Some(sub.trim().to_ascii_uppercase()),
            ),
            None => (text.trim().to_ascii_uppercase(), None),
        }
    }

    /// Split `ATTR=` into pairs; `None` when a part has no `name:value` shape
    pub fn parse_attributes(text: &str) -> Option<Vec<(String, String)>> {
        let text = text.trim();
        if text.is_empty() || text == "*" {
            return Some(Vec::new());
        }
        text.split("&&")
            .map(|part| {
                part.split_once(':')
                    .filter(|(name, _)| !name.trim().is_empty())
                    .map(|(name, value)| (name.trim().to_ascii_uppercase(), value.to_string()))
            })
            .collect()
    }
}

/// How a command addresses an element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementLocator {
    Tag(TagQuery),
    XPath(String),
    Selector(String),
}

impl fmt::Display for ElementLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementLocator::Tag(query) => {
                write!(f, "{}", query.element)?;
                if let Some(sub) = &query.input_type {
                    write!(f, ":{}", sub)?;
                }
                for (name, value) in &query.attributes {
                    write!(f, " {}={}", name, value)?;
                }
                Ok(())
            }
            ElementLocator::XPath(xpath) => write!(f, "xpath {}", xpath),
            ElementLocator::Selector(selector) => write!(f, "selector {}", selector),
        }
    }
}

/// `EXTRACT=` kinds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtractKind {
    Text,
    Html,
    Href,
    Title,
    Alt,
    Attribute(String),
}

impl ExtractKind {
    pub fn parse(text: &str) -> Self {
        match text.trim().to_ascii_uppercase().as_str() {
            "TXT" => ExtractKind::Text,
            "HTM" => ExtractKind::Html,
            "HREF" => ExtractKind::Href,
            "TITLE" => ExtractKind::Title,
            "ALT" => ExtractKind::Alt,
            other => ExtractKind::Attribute(other.to_string()),
        }
    }
}

/// What TAG does once the element is found
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagAction {
    /// Click / focus only
    Click,
    /// `CONTENT=` fill or select
    Fill(String),
    /// `EXTRACT=` read
    Extract(ExtractKind),
}

/// `FRAME` target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameTarget {
    /// `F=n`, 0 is the top document
    Index(u32),
    Name(String),
}

/// `TAB` operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TabAction {
    /// `T=n`, 1-based relative to the macro's start tab
    Select(u32),
    Open,
    Close,
    CloseAllOthers,
}

/// Browser proxy configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySettings {
    /// `host:port`; `None` is a direct connection
    pub address: Option<String>,
    pub bypass: Vec<String>,
}

impl ProxySettings {
    pub fn direct() -> Self {
        Self::default()
    }
}

/// Options for a page load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigateOptions {
    pub timeout: Duration,
    /// Wait for the full load event, not only DOM ready
    pub wait_complete: bool,
}
