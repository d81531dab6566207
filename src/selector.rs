use serde::{Deserialize, Serialize};
use std::fmt;

/// A recursive, serializable definition of a CSS selector.
///
/// Storefront configs describe their controls with this type; the driver only
/// ever receives the rendered string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "spec")]
pub enum CssSelector {
    /// A selector written out by hand (e.g., "#buy-now-button")
    Raw(String),

    /// Matches an HTML tag name (e.g., "input", "img")
    Tag(String),

    /// Matches a CSS class (e.g., "a-price-whole")
    Class(String),

    /// Matches an HTML ID (e.g., "captchacharacters")
    Id(String),

    /// Matches an attribute existence or specific value
    Attribute { key: String, value: Option<String> },

    /// Matches an attribute whose value contains a substring
    AttributeContains { key: String, value: String },

    /// AND Logic: Matches if ALL sub-selectors match
    And(Vec<CssSelector>),

    /// OR Logic: Matches if ANY sub-selector matches
    Or(Vec<CssSelector>),

    /// Descendant Logic: .ancestor .descendant
    Descendant {
        ancestor: Box<CssSelector>,
        descendant: Box<CssSelector>,
    },

    /// Child Logic: .parent > .child
    Child {
        parent: Box<CssSelector>,
        child: Box<CssSelector>,
    },
}

impl CssSelector {
    pub fn raw(css: impl Into<String>) -> Self {
        CssSelector::Raw(css.into())
    }

    /// The selector as the driver receives it.
    pub fn to_css_string(&self) -> String {
        self.to_string()
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, parts: &[CssSelector], sep: &str) -> fmt::Result {
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{}", part)?;
    }
    Ok(())
}

impl fmt::Display for CssSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CssSelector::Raw(css) | CssSelector::Tag(css) => f.write_str(css),
            CssSelector::Class(class) => write!(f, ".{}", class),
            CssSelector::Id(id) => write!(f, "#{}", id),
            CssSelector::Attribute { key, value: None } => write!(f, "[{}]", key),
            CssSelector::Attribute {
                key,
                value: Some(value),
            } => write!(f, "[{}='{}']", key, value.replace('\'', "\\'")),
            CssSelector::AttributeContains { key, value } => {
                write!(f, "[{}*='{}']", key, value.replace('\'', "\\'"))
            }
            CssSelector::And(parts) => write_joined(f, parts, ""),
            CssSelector::Or(parts) => write_joined(f, parts, ", "),
            CssSelector::Descendant {
                ancestor,
                descendant,
            } => write!(f, "{} {}", ancestor, descendant),
            CssSelector::Child { parent, child } => write!(f, "{} > {}", parent, child),
        }
    }
}
