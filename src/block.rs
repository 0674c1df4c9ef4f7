use html_escape::encode_double_quoted_attribute;
use tracing::{debug, warn};

use crate::pipeline::{CodeConverter, DEFAULT_LOG_CALL};
use crate::sink::{region_id, ResultRegions, ResultSink};
use crate::snippet::{Message, RunError, Script, SnippetRunner};

pub const DEFAULT_SKIP_MARKER: &str = "// liverun:skip";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleOptions {
    /// Samples whose text contains this token are never wired for execution.
    pub skip_marker: String,
    pub log_call: String,
}

impl Default for SampleOptions {
    fn default() -> Self {
        Self {
            skip_marker: DEFAULT_SKIP_MARKER.to_string(),
            log_call: DEFAULT_LOG_CALL.to_string(),
        }
    }
}

impl SampleOptions {
    pub fn is_executable(&self, text: &str) -> bool {
        self.skip_marker.is_empty() || !text.contains(&self.skip_marker)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Idle,
    Running,
}

/// One displayed code sample and, when executable, its trigger and result region.
#[derive(Debug, Clone)]
pub struct CodeBlock {
    index: usize,
    markup: String,
    classes: Vec<String>,
    executable: bool,
    converter: CodeConverter,
    state: BlockState,
}

impl CodeBlock {
    /// `text` is the raw sample text, `markup` what is displayed inside the `<code>` element.
    pub fn new(
        index: usize,
        text: &str,
        markup: String,
        classes: Vec<String>,
        options: &SampleOptions,
    ) -> Self {
        Self {
            index,
            markup,
            classes,
            executable: options.is_executable(text),
            converter: CodeConverter::with_log_call(index, &options.log_call),
            state: BlockState::Idle,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn markup(&self) -> &str {
        &self.markup
    }

    /// Replaces the displayed markup, as an in-place edit of the sample would.
    pub fn set_markup(&mut self, markup: String) {
        self.markup = markup;
    }

    pub fn is_executable(&self) -> bool {
        self.executable
    }

    pub fn state(&self) -> BlockState {
        self.state
    }

    /// The script that `execute` would run right now.
    pub fn source(&self) -> String {
        self.converter.convert(&self.markup)
    }

    pub fn execute(&mut self, runner: &dyn SnippetRunner, sink: &mut dyn ResultSink) {
        if !self.executable {
            return;
        }
        self.state = BlockState::Running;
        sink.clear(self.index);
        if let Err(error) = self.convert_and_execute(runner, sink) {
            warn!("sample {} failed: {error}", self.index);
            sink.append(self.index, &error.to_string());
        }
        self.state = BlockState::Idle;
    }

    fn convert_and_execute(
        &self,
        runner: &dyn SnippetRunner,
        sink: &mut dyn ResultSink,
    ) -> Result<(), RunError> {
        let script = Script::new(self.index, self.source());
        let index = self.index;
        runner.run(&script, &mut |message| apply(index, message, sink))
    }

    pub fn render(&self, regions: &ResultRegions) -> String {
        if !self.executable {
            return render_code(&self.classes, &self.markup, "");
        }

        let mut classes = self.classes.clone();
        classes.push(format!("codeblock-{}", self.index));
        format!(
            "{code}<div class=\"liverun-controls\"><button onclick=\"executeCode('{index}')\">Evaluate</button><div class=\"results\" id=\"{region}\">{results}</div></div>",
            code = render_code(&classes, &self.markup, " contenteditable=\"true\""),
            index = self.index,
            region = region_id(self.index),
            results = regions.render(self.index),
        )
    }
}

/// Messages for other samples are dropped so that a sample only ever touches its own region.
fn apply(index: usize, message: Message, sink: &mut dyn ResultSink) {
    if message.id() != index {
        debug!("sample {index} wrote to region {}, dropped", message.id());
        return;
    }
    match message {
        Message::Clear { id } => sink.clear(id),
        Message::Append { id, text } => sink.append(id, &text),
        Message::Error { id, text } => {
            warn!("sample {id} threw: {text}");
            sink.append(id, &text);
        }
    }
}

pub fn render_code(classes: &[String], markup: &str, attributes: &str) -> String {
    let class = match classes.is_empty() {
        true => String::new(),
        false => format!(
            " class=\"{}\"",
            encode_double_quoted_attribute(&classes.join(" "))
        ),
    };
    format!("<pre><code{class}{attributes}>{markup}</code></pre>")
}
