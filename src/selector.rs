//! The selector subset understood by the configuration: one compound selector made of an
//! optional tag name followed by `.class` and `#id` parts, e.g. `.javascript`, `h2`,
//! `code.language-js` or `ul#content-index`. Anything else parses to a selector that matches
//! nothing.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref SELECTOR_REG: Regex =
        Regex::new(r"^([A-Za-z][A-Za-z0-9-]*)?((?:[.#][A-Za-z_-][A-Za-z0-9_-]*)*)$")
            .expect("Failed to init regex for parsing selectors");
    static ref PART_REG: Regex = Regex::new(r"([.#])([A-Za-z0-9_-]+)")
        .expect("Failed to init regex for selector parts");
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Compound {
        tag: Option<String>,
        id: Option<String>,
        classes: Vec<String>,
    },
    Invalid,
}

/// What a selector is matched against.
#[derive(Debug, Clone, Copy)]
pub struct Element<'a> {
    pub tag: &'a str,
    pub id: Option<&'a str>,
    pub classes: &'a [String],
}

impl Selector {
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        let Some(caps) = SELECTOR_REG.captures(input) else {
            return Selector::Invalid;
        };
        if input.is_empty() {
            return Selector::Invalid;
        }

        let tag = caps.get(1).map(|tag| tag.as_str().to_ascii_lowercase());
        let mut id = None;
        let mut classes = Vec::new();
        for part in PART_REG.captures_iter(caps.get(2).map_or("", |parts| parts.as_str())) {
            match &part[1] {
                "#" if id.is_some() => return Selector::Invalid,
                "#" => id = Some(part[2].to_string()),
                _ => classes.push(part[2].to_string()),
            }
        }
        Selector::Compound { tag, id, classes }
    }

    pub fn matches(&self, element: &Element) -> bool {
        match self {
            Selector::Invalid => false,
            Selector::Compound { tag, id, classes } => {
                tag.as_deref().map_or(true, |tag| tag.eq_ignore_ascii_case(element.tag))
                    && id.as_deref().map_or(true, |id| element.id == Some(id))
                    && classes
                        .iter()
                        .all(|class| element.classes.iter().any(|c| c == class))
            }
        }
    }

    /// Renders an element this selector would match, `default_tag` standing in for a missing
    /// tag name.
    pub fn render_element(&self, default_tag: &str, content: &str) -> Option<String> {
        let Selector::Compound { tag, id, classes } = self else {
            return None;
        };
        let tag = tag.as_deref().unwrap_or(default_tag);
        let mut open = format!("<{tag}");
        if let Some(id) = id {
            open.push_str(&format!(
                " id=\"{}\"",
                html_escape::encode_double_quoted_attribute(id)
            ));
        }
        if !classes.is_empty() {
            open.push_str(&format!(
                " class=\"{}\"",
                html_escape::encode_double_quoted_attribute(&classes.join(" "))
            ));
        }
        Some(format!("{open}>\n{content}</{tag}>"))
    }
}
