//! Display-only syntax highlighting of code blocks, class based so that the page carries a
//! single stylesheet.

use lazy_static::lazy_static;
use syntect::highlighting::ThemeSet;
use syntect::html::{css_for_theme_with_class_style, ClassStyle, ClassedHTMLGenerator};
use syntect::parsing::SyntaxSet;
use syntect::util::LinesWithEndings;
use tracing::debug;

const THEME: &str = "base16-ocean.dark";

lazy_static! {
    static ref SYNTAX_SET: SyntaxSet = SyntaxSet::load_defaults_newlines();
    static ref HIGHLIGHT_CSS: String = theme_css();
}

fn class_style() -> ClassStyle {
    ClassStyle::SpacedPrefixed { prefix: "hl-" }
}

/// Highlights `source` as `lang`, falling back to plain text for unknown languages. The result
/// is the inner HTML of the `<code>` element.
pub fn highlight(source: &str, lang: &str) -> String {
    let syntax = SYNTAX_SET
        .find_syntax_by_token(lang)
        .unwrap_or_else(|| SYNTAX_SET.find_syntax_plain_text());

    let mut generator =
        ClassedHTMLGenerator::new_with_class_style(syntax, &SYNTAX_SET, class_style());
    for line in LinesWithEndings::from(source) {
        if let Err(error) = generator.parse_html_for_line_which_includes_newline(line) {
            debug!("highlighting {lang} failed, using plain text: {error}");
            return html_escape::encode_text(source).into_owned();
        }
    }
    generator.finalize()
}

pub fn highlight_css() -> &'static str {
    HIGHLIGHT_CSS.as_str()
}

fn theme_css() -> String {
    let themes = ThemeSet::load_defaults();
    themes
        .themes
        .get(THEME)
        .or_else(|| themes.themes.values().next())
        .and_then(|theme| css_for_theme_with_class_style(theme, class_style()).ok())
        .unwrap_or_default()
}
