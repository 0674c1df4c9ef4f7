//! This is a preprocessor for the [rust-lang mdbook](https://github.com/rust-lang/mdBook) project. It turns the javascript samples of a chapter into editable, runnable blocks whose `console.log` output is captured below the sample, and builds an index of the chapter headings.
//!
//! # Getting started
//!
//! ```sh
//! cargo install mdbook-liverun
//! ```
//!
//! You also have to activate the preprocessor, put this in your `book.toml` file:
//!
//! ```toml
//! [preprocessor.liverun]
//! ```
//!
//! # How to
//!
//! Let's say we have this chapter:
//!
//! ````markdown
//! ## Setup
//!
//! ```javascript
//! const answer = 6 * 7;
//! console.log(answer)
//! console.log({ answer })
//! ```
//! ````
//!
//! The rendered chapter gets an index with one entry linking to `#Setup`, the sample becomes
//! editable, and an `Evaluate` button is added below it. Clicking the button runs the sample and
//! fills its result region:
//!
//! ```text
//! answer -> 42
//! { answer } -> {"answer":42}
//! ```
//!
//! With `capture = true` the samples are also run while the book is built, inside a separate
//! `node` process (or a container, see `engine`), and their output is baked into the page.
//!
//! # Details
//!
//! A sample is any code block matched by `code-block-selector` (`.javascript` by default). A
//! sample containing the skip marker (`// liverun:skip` by default) is highlighted but never
//! wired for execution.
//!
//! Before running, the displayed markup of a sample goes through three fixed steps: markup is
//! stripped, entities are decoded, then every `console.log(EXPR)` call is rewritten to report
//! `EXPR -> value` (or `EXPR -> error`) into the sample's own result region.
//!
//! ```toml
//! [preprocessor.liverun]
//! code-block-selector = ".javascript"
//! index-selector = "#content-index"
//! headline-selector = "h2"
//! skip-marker = "// liverun:skip"
//! timeout-ms = 5000
//! capture = true
//! engine = "podman"
//! image = "node:lts-alpine"
//! ```
//!
//! The same pipeline is available outside mdbook:
//!
//! ```sh
//! mdbook-liverun render README.md -o index.html
//! mdbook-liverun run README.md --sample 0
//! ```
pub mod block;
pub mod highlight;
pub mod liverun;
pub mod page;
pub mod pipeline;
pub mod selector;
pub mod sink;
pub mod snippet;
mod utils;

pub use block::CodeBlock;
pub use liverun::{LiveRun, LiveRunConfig};
pub use page::{Page, PageConfig};
pub use pipeline::CodeConverter;
pub use sink::{ResultRegions, ResultSink};
pub use snippet::{Message, RunError, Script, SnippetRunner};
