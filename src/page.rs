//! The document controller: finds the samples and headings of a markdown document, builds the
//! index, highlights code and renders the decorated document.

use std::collections::{BTreeMap, HashSet};
use std::ops::Range;

use html_escape::{encode_double_quoted_attribute, encode_text};
use pulldown_cmark::{html, CodeBlockKind, Event, Options, Parser, Tag, TagEnd};
use tracing::debug;

use crate::block::{render_code, CodeBlock, SampleOptions};
use crate::highlight::highlight;
use crate::selector::{Element, Selector};
use crate::sink::ResultRegions;
use crate::snippet::SnippetRunner;
use crate::utils::string::fence_language;

pub const DEFAULT_CODE_BLOCK_SELECTOR: &str = ".javascript";
pub const DEFAULT_INDEX_SELECTOR: &str = "#content-index";
pub const DEFAULT_HEADLINE_SELECTOR: &str = "h2";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageConfig {
    /// Which code elements become samples.
    pub code_block_selector: Selector,
    /// The container the index entries go into.
    pub index_selector: Selector,
    /// Which headings become index entries.
    pub headline_selector: Selector,
    pub samples: SampleOptions,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            code_block_selector: Selector::parse(DEFAULT_CODE_BLOCK_SELECTOR),
            index_selector: Selector::parse(DEFAULT_INDEX_SELECTOR),
            headline_selector: Selector::parse(DEFAULT_HEADLINE_SELECTOR),
            samples: SampleOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub anchor: String,
    pub label: String,
}

impl IndexEntry {
    pub fn render(&self) -> String {
        format!(
            "<li><a href=\"#{}\">{}</a></li>",
            encode_double_quoted_attribute(&self.anchor),
            encode_text(&self.label)
        )
    }
}

#[derive(Debug, Clone)]
struct CodeElement {
    range: Range<usize>,
    lang: String,
    text: String,
    classes: Vec<String>,
    markup: String,
    sample: Option<usize>,
}

#[derive(Debug, Clone)]
struct HeadingElement {
    range: Range<usize>,
    tag: String,
    attributes: String,
    entry: usize,
    inner: String,
}

/// Hands out anchors, suffixing repeated heading texts with `-1`, `-2`, ...
#[derive(Debug, Default)]
struct Anchors {
    used: HashSet<String>,
}

impl Anchors {
    fn unique(&mut self, text: &str) -> String {
        let mut anchor = text.to_string();
        let mut repeat = 0;
        while !self.used.insert(anchor.clone()) {
            repeat += 1;
            anchor = format!("{text}-{repeat}");
        }
        anchor
    }
}

/// One rendered document and the samples living in it.
#[derive(Debug, Default)]
pub struct Page {
    config: PageConfig,
    source: String,
    code: Vec<CodeElement>,
    headings: Vec<HeadingElement>,
    blocks: BTreeMap<usize, CodeBlock>,
    index: Vec<IndexEntry>,
    regions: ResultRegions,
}

fn parser(markdown: &str) -> Parser<'_> {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_HEADING_ATTRIBUTES);
    Parser::new_ext(markdown, options)
}

fn code_classes(lang: &str) -> Vec<String> {
    match lang.is_empty() {
        true => Vec::new(),
        false => vec![lang.to_string(), format!("language-{lang}")],
    }
}

fn heading_text(events: &[Event]) -> String {
    events
        .iter()
        .filter_map(|event| match event {
            Event::Text(text) | Event::Code(text) => Some(&**text),
            _ => None,
        })
        .collect()
}

impl Page {
    pub fn new(config: PageConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Discovers samples, builds the index, then highlights every code block.
    pub fn initialize(&mut self, markdown: &str) {
        *self = Page::new(self.config.clone());
        self.initialize_code_blocks(markdown);
        self.add_index(markdown);
        self.add_code_highlight();
        self.source = markdown.to_string();
        debug!(
            "page initialized: {} code blocks, {} samples, {} index entries",
            self.code.len(),
            self.blocks.len(),
            self.index.len()
        );
    }

    fn initialize_code_blocks(&mut self, markdown: &str) {
        let mut events = parser(markdown).into_offset_iter();
        while let Some((event, range)) = events.next() {
            let Event::Start(Tag::CodeBlock(kind)) = event else {
                continue;
            };
            let lang = match kind {
                CodeBlockKind::Fenced(info) => fence_language(&info).to_string(),
                CodeBlockKind::Indented => String::new(),
            };
            let mut text = String::new();
            for (event, _) in events.by_ref() {
                match event {
                    Event::Text(chunk) => text.push_str(&chunk),
                    Event::End(TagEnd::CodeBlock) => break,
                    _ => {}
                }
            }

            let classes = code_classes(&lang);
            let markup = encode_text(&text).into_owned();
            let element = Element {
                tag: "code",
                id: None,
                classes: &classes,
            };
            let sample = match self.config.code_block_selector.matches(&element) {
                true => {
                    let index = self.blocks.len();
                    let block = CodeBlock::new(
                        index,
                        &text,
                        markup.clone(),
                        classes.clone(),
                        &self.config.samples,
                    );
                    if block.is_executable() {
                        self.regions.create(index);
                    }
                    debug!("sample {index} ({lang}), executable: {}", block.is_executable());
                    self.blocks.insert(index, block);
                    Some(index)
                }
                false => None,
            };
            self.code.push(CodeElement {
                range,
                lang,
                text,
                classes,
                markup,
                sample,
            });
        }
    }

    fn add_index(&mut self, markdown: &str) {
        let mut anchors = Anchors::default();
        let mut events = parser(markdown).into_offset_iter();
        while let Some((event, range)) = events.next() {
            let Event::Start(Tag::Heading {
                level, id, classes, ..
            }) = event
            else {
                continue;
            };
            let mut inner = Vec::new();
            for (event, _) in events.by_ref() {
                if matches!(event, Event::End(TagEnd::Heading(_))) {
                    break;
                }
                inner.push(event);
            }

            let tag = level.to_string();
            let classes: Vec<String> = classes.iter().map(|class| class.to_string()).collect();
            let element = Element {
                tag: &tag,
                id: id.as_deref(),
                classes: &classes,
            };
            if !self.config.headline_selector.matches(&element) {
                continue;
            }

            let label = heading_text(&inner);
            let anchor = anchors.unique(&label);
            let mut attributes = String::new();
            if let Some(id) = &id {
                attributes.push_str(&format!(" id=\"{}\"", encode_double_quoted_attribute(&**id)));
            }
            if !classes.is_empty() {
                attributes.push_str(&format!(
                    " class=\"{}\"",
                    encode_double_quoted_attribute(&classes.join(" "))
                ));
            }
            let mut html = String::new();
            html::push_html(&mut html, inner.into_iter());

            self.index.push(IndexEntry { anchor, label });
            self.headings.push(HeadingElement {
                range,
                tag,
                attributes,
                entry: self.index.len() - 1,
                inner: html,
            });
        }
    }

    fn add_code_highlight(&mut self) {
        for element in &mut self.code {
            element.markup = highlight(&element.text, &element.lang);
            if let Some(block) = element.sample.and_then(|index| self.blocks.get_mut(&index)) {
                block.set_markup(element.markup.clone());
            }
        }
    }

    pub fn block(&self, index: usize) -> Option<&CodeBlock> {
        self.blocks.get(&index)
    }

    pub fn blocks(&self) -> impl Iterator<Item = &CodeBlock> {
        self.blocks.values()
    }

    pub fn has_samples(&self) -> bool {
        !self.blocks.is_empty()
    }

    pub fn has_executable_samples(&self) -> bool {
        self.blocks.values().any(CodeBlock::is_executable)
    }

    pub fn has_code(&self) -> bool {
        !self.code.is_empty()
    }

    pub fn index(&self) -> &[IndexEntry] {
        &self.index
    }

    pub fn regions(&self) -> &ResultRegions {
        &self.regions
    }

    /// Replaces the text of sample `index`, re-highlighted like the rest of the page.
    pub fn edit(&mut self, index: usize, text: &str) -> bool {
        let Some(block) = self.blocks.get_mut(&index) else {
            return false;
        };
        let lang = self
            .code
            .iter()
            .find(|element| element.sample == Some(index))
            .map_or("", |element| element.lang.as_str());
        block.set_markup(highlight(text, lang));
        true
    }

    /// Runs sample `index`. Unknown and skipped samples are ignored.
    pub fn execute(&mut self, index: usize, runner: &dyn SnippetRunner) -> bool {
        match self.blocks.get_mut(&index) {
            Some(block) if block.is_executable() => {
                block.execute(runner, &mut self.regions);
                true
            }
            _ => false,
        }
    }

    pub fn execute_all(&mut self, runner: &dyn SnippetRunner) -> usize {
        let indices: Vec<usize> = self.blocks.keys().copied().collect();
        indices
            .into_iter()
            .filter(|&index| self.execute(index, runner))
            .count()
    }

    /// The index container with one entry per indexed heading, `None` when the index selector
    /// is invalid.
    pub fn index_html(&self) -> Option<String> {
        let entries: String = self
            .index
            .iter()
            .map(|entry| entry.render() + "\n")
            .collect();
        self.config.index_selector.render_element("ul", &entries)
    }

    /// The source document with code blocks and indexed headings replaced by their HTML. The
    /// result is still markdown.
    pub fn render_markdown(&self) -> String {
        let mut splices: Vec<(Range<usize>, String)> = self
            .code
            .iter()
            .map(|element| (element.range.clone(), self.render_code_element(element)))
            .chain(
                self.headings
                    .iter()
                    .map(|heading| (heading.range.clone(), self.render_heading(heading))),
            )
            .collect();
        splices.sort_by_key(|(range, _)| range.start);

        let mut result = String::with_capacity(self.source.len() * 2);
        let mut last = 0;
        for (range, html) in splices {
            if range.start < last {
                continue;
            }
            result.push_str(&self.source[last..range.start]);
            result.push('\n');
            result.push_str(&html);
            result.push_str("\n\n");
            last = range.end;
        }
        result.push_str(&self.source[last..]);
        result
    }

    pub fn render_html(&self) -> String {
        let decorated = self.render_markdown();
        let mut result = String::new();
        html::push_html(&mut result, parser(&decorated));
        result
    }

    fn render_code_element(&self, element: &CodeElement) -> String {
        match element.sample.and_then(|index| self.blocks.get(&index)) {
            Some(block) => block.render(&self.regions),
            None => render_code(&element.classes, &element.markup, ""),
        }
    }

    fn render_heading(&self, heading: &HeadingElement) -> String {
        let anchor = &self.index[heading.entry].anchor;
        format!(
            "<a name=\"{}\">\n<{tag}{attributes}>{inner}</{tag}>\n</a>",
            encode_double_quoted_attribute(anchor),
            tag = heading.tag,
            attributes = heading.attributes,
            inner = heading.inner,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snippet::{Message, RunError, Script};

    const DOCUMENT: &str = r#"# Title

Some prose.

## Setup

```javascript
const a = 1;
console.log(a + 1)
```

```python
print("not a sample")
```

## Skipped

```javascript
// liverun:skip
while (true) {}
```

### Details

```javascript
console.log({ a: 1 })
```
"#;

    struct EchoRunner;

    impl SnippetRunner for EchoRunner {
        fn run(
            &self,
            script: &Script,
            on_message: &mut dyn FnMut(Message),
        ) -> Result<(), RunError> {
            on_message(Message::Clear { id: script.index });
            on_message(Message::Append {
                id: script.index,
                text: format!("ran {}", script.index),
            });
            Ok(())
        }
    }

    fn page(markdown: &str) -> Page {
        let mut page = Page::new(PageConfig::default());
        page.initialize(markdown);
        page
    }

    #[test]
    pub fn test_discovers_samples_in_order() {
        let page = page(DOCUMENT);
        let blocks: Vec<_> = page.blocks().map(|block| block.index()).collect();
        assert_eq!(blocks, vec![0, 1, 2]);
        assert!(page.block(0).unwrap().is_executable());
        assert!(!page.block(1).unwrap().is_executable());
        assert!(page.block(2).unwrap().is_executable());
        assert!(page.regions().contains(0));
        assert!(!page.regions().contains(1));
        assert!(page.regions().contains(2));
        assert_eq!(page.block(0).unwrap().source(), "const a = 1;\nvoid ((globalThis.__liverunCleared0 || (globalThis.__liverunCleared0 = true, clearResult(0))), ((label) => { try { const value = (a + 1\n); addResult(0, label + \" -> \" + (value !== null && typeof value === \"object\" && (typeof window === \"undefined\" || value !== window) ? JSON.stringify(value) : value)); } catch (error) { addResult(0, label + \" -> \" + error); } })(\"a + 1\"))\n");
    }

    #[test]
    pub fn test_index_from_h2_headings() {
        let page = page(DOCUMENT);
        assert_eq!(
            page.index(),
            &[
                IndexEntry {
                    anchor: "Setup".into(),
                    label: "Setup".into()
                },
                IndexEntry {
                    anchor: "Skipped".into(),
                    label: "Skipped".into()
                },
            ]
        );
        assert_eq!(
            page.index_html().unwrap(),
            "<ul id=\"content-index\">\n<li><a href=\"#Setup\">Setup</a></li>\n<li><a href=\"#Skipped\">Skipped</a></li>\n</ul>"
        );
        let html = page.render_html();
        assert!(html.contains("<a name=\"Setup\">\n<h2>Setup</h2>\n</a>"), "{html}");
        assert!(html.contains("<h3>Details</h3>"), "{html}");
    }

    #[test]
    pub fn test_repeated_and_escaped_headings() {
        let page = page("## Tom & Jerry\n\n## Tom & Jerry\n\n## `code` \"quoted\"\n");
        let anchors: Vec<_> = page.index().iter().map(|entry| entry.anchor.as_str()).collect();
        assert_eq!(anchors, vec!["Tom & Jerry", "Tom & Jerry-1", "code \"quoted\""]);
        assert_eq!(
            page.index()[1].render(),
            "<li><a href=\"#Tom &amp; Jerry-1\">Tom &amp; Jerry</a></li>"
        );
        assert!(page
            .render_html()
            .contains("<a name=\"code &quot;quoted&quot;\">"));
    }

    #[test]
    pub fn test_render_decorates_samples() {
        let page = page(DOCUMENT);
        let html = page.render_html();
        assert!(html.contains("codeblock-0\" contenteditable=\"true\">"), "{html}");
        assert!(html.contains("onclick=\"executeCode('0')\""));
        assert!(html.contains("id=\"result-0\""));
        assert!(html.contains("id=\"result-2\""));
        assert!(!html.contains("id=\"result-1\""));
        assert!(!html.contains("codeblock-1"));
        assert!(html.contains("class=\"python language-python\""));
        assert!(html.contains("class=\"hl-"));
        assert!(html.contains("<p>Some prose.</p>"));
    }

    #[test]
    pub fn test_execute_touches_only_its_region() {
        let mut page = page(DOCUMENT);
        assert!(page.execute(0, &EchoRunner));
        assert_eq!(page.regions().lines(0), Some(&["ran 0".to_string()][..]));
        assert_eq!(page.regions().lines(2), Some(&[][..]));
        assert!(!page.execute(1, &EchoRunner));
        assert!(!page.execute(9, &EchoRunner));
        assert_eq!(page.execute_all(&EchoRunner), 2);
        assert_eq!(page.regions().lines(2), Some(&["ran 2".to_string()][..]));
        assert!(page.render_html().contains("<p>ran 2</p>"));
    }

    #[test]
    pub fn test_edit_sample() {
        let mut page = page(DOCUMENT);
        assert!(page.edit(0, "let b = 1 < 2;"));
        assert_eq!(page.block(0).unwrap().source(), "let b = 1 < 2;");
        assert!(!page.edit(7, ""));
    }

    #[test]
    pub fn test_invalid_selectors() {
        let config = PageConfig {
            code_block_selector: Selector::parse("pre > code"),
            index_selector: Selector::parse("#a#b"),
            ..Default::default()
        };
        let mut page = Page::new(config);
        page.initialize(DOCUMENT);
        assert!(!page.has_samples());
        assert!(page.has_code());
        assert_eq!(page.index_html(), None);
        assert_eq!(page.index().len(), 2);
    }

    #[test]
    pub fn test_initialize_twice_starts_over() {
        let mut page = page(DOCUMENT);
        page.initialize("## Only\n");
        assert!(!page.has_samples());
        assert_eq!(page.index().len(), 1);
    }
}
