use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

use mdbook::book::Book;
use mdbook::preprocess::{Preprocessor, PreprocessorContext};

use crate::block::SampleOptions;
use crate::highlight::highlight_css;
use crate::page::{Page, PageConfig};
use crate::selector::Selector;
use crate::snippet::SnippetRunner;
use crate::utils::map_chapter;

const RUNTIME_SCRIPT: &str = include_str!("../assets/liverun.js");
const RUNTIME_STYLE: &str = include_str!("../assets/liverun.css");
const PAGE_TEMPLATE: &str = include_str!("../assets/page.html");

const DEFAULT_RUNTIME: &str = "node";
const DEFAULT_IMAGE: &str = "node:lts-alpine";
const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// The `[preprocessor.liverun]` table, every key optional.
#[derive(Debug, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct LiveRunConfig {
    #[serde(default)]
    pub code_block_selector: Option<String>,
    #[serde(default)]
    pub index_selector: Option<String>,
    #[serde(default)]
    pub headline_selector: Option<String>,
    #[serde(default)]
    pub skip_marker: Option<String>,
    #[serde(default)]
    pub log_call: Option<String>,
    /// Program and arguments running a script file.
    #[serde(default)]
    pub runtime: Option<Vec<String>>,
    /// Container engine (`docker`, `podman`) to run the samples in, none runs them locally.
    #[serde(default)]
    pub engine: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Run the samples while building and bake their output into the page.
    #[serde(default)]
    pub capture: Option<bool>,
}

impl LiveRunConfig {
    pub fn create_preprocessor(&self) -> LiveRun {
        let defaults = PageConfig::default();
        let samples = SampleOptions::default();
        let selector = |value: &Option<String>, default: Selector| {
            value.as_deref().map_or(default, Selector::parse)
        };
        LiveRun {
            page: PageConfig {
                code_block_selector: selector(
                    &self.code_block_selector,
                    defaults.code_block_selector,
                ),
                index_selector: selector(&self.index_selector, defaults.index_selector),
                headline_selector: selector(&self.headline_selector, defaults.headline_selector),
                samples: SampleOptions {
                    skip_marker: self.skip_marker.clone().unwrap_or(samples.skip_marker),
                    log_call: self.log_call.clone().unwrap_or(samples.log_call),
                },
            },
            runtime: match &self.runtime {
                Some(runtime) if !runtime.is_empty() => runtime.clone(),
                _ => vec![DEFAULT_RUNTIME.to_string()],
            },
            engine: self.engine.clone(),
            image: self
                .image
                .clone()
                .unwrap_or_else(|| DEFAULT_IMAGE.to_string()),
            timeout: Duration::from_millis(self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)),
            capture: self.capture.unwrap_or(false),
        }
    }
}

pub struct LiveRun {
    pub page: PageConfig,
    pub runtime: Vec<String>,
    pub engine: Option<String>,
    pub image: String,
    pub timeout: Duration,
    pub capture: bool,
}

impl Default for LiveRun {
    fn default() -> Self {
        LiveRunConfig::default().create_preprocessor()
    }
}

impl Preprocessor for LiveRun {
    fn name(&self) -> &str {
        "liverun"
    }

    fn supports_renderer(&self, renderer: &str) -> bool {
        renderer == "html"
    }

    fn run(&self, context: &PreprocessorContext, mut book: Book) -> Result<Book> {
        let key = format!("preprocessor.{}", self.name());
        let config = context
            .config
            .get_deserialized_opt::<LiveRunConfig, _>(key)
            .with_context(|| "Could not deserialize [preprocessor.liverun]")?
            .unwrap_or_default();
        let preprocessor = config.create_preprocessor();
        let mut chapters = 0;
        map_chapter(&mut book, &mut |chapter| {
            chapter.content = preprocessor.run_on_content(&chapter.content);
            chapters += 1;
            Ok(())
        })?;
        info!("liverun processed {chapters} chapters");
        Ok(book)
    }
}

impl LiveRun {
    /// Initializes a page on `content`, running its samples when capturing.
    pub fn page(&self, content: &str) -> Page {
        let mut page = Page::new(self.page.clone());
        page.initialize(content);
        if self.capture {
            let executed = page.execute_all(self as &dyn SnippetRunner);
            info!("captured the output of {executed} samples");
        }
        page
    }

    // This method is public for regression tests
    pub fn run_on_content(&self, content: &str) -> String {
        let page = self.page(content);
        let mut result = String::new();

        if !page.index().is_empty() {
            if let Some(index) = page.index_html() {
                result.push_str(&index);
                result.push_str("\n\n");
            }
        }
        result.push_str(&page.render_markdown());

        if page.has_code() {
            result.push_str(&format!(
                "\n\n<style>\n{RUNTIME_STYLE}\n{}\n</style>\n",
                highlight_css()
            ));
        }
        if page.has_executable_samples() {
            result.push_str(&format!("\n<script>\n{}\n</script>\n", self.runtime_script()));
        }
        result
    }

    /// The browser runtime, told which call reports into the result regions.
    pub fn runtime_script(&self) -> String {
        let log_call = serde_json::Value::String(self.page.samples.log_call.clone())
            .to_string()
            .replace("</", "<\\/");
        format!("window.liverunLogCall = {log_call};\n{RUNTIME_SCRIPT}")
    }

    /// A standalone HTML document for `content`, the index container always present.
    pub fn render_page(&self, content: &str, title: &str) -> String {
        let page = self.page(content);
        // Last placeholder first, so inserted text is never searched for placeholders.
        let substitutions = [
            ("{{script}}", self.runtime_script()),
            ("{{content}}", page.render_html()),
            ("{{index}}", page.index_html().unwrap_or_default()),
            ("{{style}}", format!("{RUNTIME_STYLE}\n{}", highlight_css())),
            ("{{title}}", html_escape::encode_text(title).into_owned()),
        ];
        let mut html = PAGE_TEMPLATE.to_string();
        for (placeholder, value) in substitutions {
            html = html.replacen(placeholder, &value, 1);
        }
        html
    }
}
