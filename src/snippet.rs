use std::{
    env::{self, temp_dir},
    fs,
    io::{self, BufRead, BufReader, Read},
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    sync::mpsc::{self, RecvTimeoutError},
    thread,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::utils::string::normalize_newlines;
use crate::LiveRun;

const PRELUDE: &str = include_str!("../assets/prelude.js");
const CONTAINER_SCRIPT: &str = "/liverun/snippet.js";
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// One line written by the prelude's `clearResult`/`addResult` on stdout.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Message {
    Clear { id: usize },
    Append { id: usize, text: String },
    /// An exception escaped the sample.
    Error { id: usize, text: String },
}

impl Message {
    pub fn id(&self) -> usize {
        match self {
            Message::Clear { id } | Message::Append { id, .. } | Message::Error { id, .. } => *id,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("execution timed out after {} ms", .0.as_millis())]
    Timeout(Duration),

    #[error("runtime exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },
}

/// An instrumented sample ready to be handed to a runner.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub index: usize,
    pub code: String,
}

impl Script {
    pub fn new(index: usize, code: String) -> Self {
        Self { index, code }
    }

    /// The full program: the prelude defining the result functions, then the sample evaluated in
    /// the global scope.
    pub fn program(&self) -> String {
        let source = serde_json::Value::String(self.code.clone());
        format!("{PRELUDE}\n__liverunRun({}, {source});\n", self.index)
    }

    fn get_digest(&self) -> String {
        sha256::digest(self.program())
    }

    fn get_path(&self) -> io::Result<PathBuf> {
        let path = temp_dir().join(format!("liverun-{}.js", self.get_digest()));
        fs::write(&path, self.program())?;
        Ok(path)
    }

    fn container_name(&self) -> String {
        format!("liverun-{}-{}", self.index, &self.get_digest()[..12])
    }
}

pub trait SnippetRunner {
    /// Runs `script`, handing every captured message to `on_message` as it arrives.
    fn run(&self, script: &Script, on_message: &mut dyn FnMut(Message)) -> Result<(), RunError>;
}

impl SnippetRunner for LiveRun {
    fn run(&self, script: &Script, on_message: &mut dyn FnMut(Message)) -> Result<(), RunError> {
        let path = script.get_path()?;
        let result = self.run_file(script, &path, on_message);
        if let Err(error) = fs::remove_file(&path) {
            debug!("could not remove {}: {error}", path.display());
        }
        result
    }
}

impl LiveRun {
    fn command(&self, script: &Script, path: &Path) -> Command {
        let no_args: &[String] = &[];
        let (program, args) = match self.runtime.split_first() {
            Some((program, args)) => (program.as_str(), args),
            None => ("node", no_args),
        };

        let mut command = match &self.engine {
            None => {
                let mut command = Command::new(program);
                command.args(args).arg(path).env_clear().current_dir(temp_dir());
                if let Some(paths) = env::var_os("PATH") {
                    command.env("PATH", paths);
                }
                command
            }
            Some(engine) => {
                let mut command = Command::new(engine);
                command
                    .args(["run", "--rm", "--network", "none", "--name"])
                    .arg(script.container_name())
                    .arg("-v")
                    .arg(format!("{}:{CONTAINER_SCRIPT}:ro", path.display()))
                    .arg(&self.image)
                    .arg(program)
                    .args(args)
                    .arg(CONTAINER_SCRIPT);
                command
            }
        };
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }

    fn run_file(
        &self,
        script: &Script,
        path: &Path,
        on_message: &mut dyn FnMut(Message),
    ) -> Result<(), RunError> {
        let mut command = self.command(script, path);
        debug!("running sample {}: {:?}", script.index, command);

        let mut child = command.spawn().map_err(|source| RunError::Spawn {
            program: command.get_program().to_string_lossy().into_owned(),
            source,
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("stdout of the runtime was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("stderr of the runtime was not captured"))?;

        let (sender, receiver) = mpsc::channel();
        thread::spawn(move || {
            for line in BufReader::new(stdout).lines().map_while(Result::ok) {
                if sender.send(line).is_err() {
                    break;
                }
            }
        });
        let errors = thread::spawn(move || {
            let mut errors = String::new();
            let _ = BufReader::new(stderr).read_to_string(&mut errors);
            errors
        });

        let deadline = Instant::now() + self.timeout;
        loop {
            match receiver.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                Ok(line) => dispatch(&line, on_message),
                Err(RecvTimeoutError::Timeout) => return Err(self.abort(script, &mut child)),
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                return Err(self.abort(script, &mut child));
            }
            thread::sleep(POLL_INTERVAL);
        };

        let stderr = errors.join().unwrap_or_default();
        match status.success() {
            true => Ok(()),
            false => Err(RunError::Failed {
                status,
                stderr: normalize_newlines(stderr.trim_end()),
            }),
        }
    }

    fn abort(&self, script: &Script, child: &mut Child) -> RunError {
        warn!(
            "sample {} exceeded {} ms, killing it",
            script.index,
            self.timeout.as_millis()
        );
        if let Some(engine) = &self.engine {
            let _ = Command::new(engine)
                .stdin(Stdio::null())
                .args(["kill", script.container_name().as_str()])
                .output();
        }
        let _ = child.kill();
        let _ = child.wait();
        RunError::Timeout(self.timeout)
    }
}

fn dispatch(line: &str, on_message: &mut dyn FnMut(Message)) {
    match serde_json::from_str::<Message>(line) {
        Ok(message) => on_message(message),
        Err(_) => debug!("uncaptured output: {line}"),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::LiveRunConfig;

    use super::{Message, RunError, Script, SnippetRunner};

    fn node_available(test: &str) -> bool {
        let available = std::process::Command::new("node")
            .arg("--version")
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false);
        if !available {
            eprintln!("skipping {test}: node is not installed");
        }
        available
    }

    #[test]
    pub fn test_message_format() {
        let message: Message = serde_json::from_str(r#"{"op":"append","id":3,"text":"a"}"#).unwrap();
        assert_eq!(
            message,
            Message::Append {
                id: 3,
                text: "a".into()
            }
        );
        assert_eq!(message.id(), 3);
        let message: Message = serde_json::from_str(r#"{"op":"clear","id":0}"#).unwrap();
        assert_eq!(message, Message::Clear { id: 0 });
        assert!(serde_json::from_str::<Message>("plain output").is_err());
    }

    #[test]
    pub fn test_program_embeds_source_as_literal() {
        let script = Script::new(2, "let s = \"</script>\";\n".into());
        let program = script.program();
        assert!(program.contains("function __liverunRun"));
        assert!(program.ends_with("__liverunRun(2, \"let s = \\\"</script>\\\";\\n\");\n"));
        assert_eq!(script.get_digest(), script.get_digest());
    }

    #[test]
    pub fn test_run_snippet() {
        if !node_available("test_run_snippet") {
            return;
        }
        let runner = LiveRunConfig::default().create_preprocessor();
        let script = Script::new(0, "clearResult(0); addResult(0, 6 * 7);".into());
        let mut messages = Vec::new();
        runner.run(&script, &mut |message| messages.push(message)).unwrap();
        assert_eq!(
            messages,
            vec![
                Message::Clear { id: 0 },
                Message::Append {
                    id: 0,
                    text: "42".into()
                }
            ]
        );
    }

    #[test]
    pub fn test_exception_is_reported() {
        if !node_available("test_exception_is_reported") {
            return;
        }
        let runner = LiveRunConfig::default().create_preprocessor();
        let script = Script::new(1, "throw new Error('boom')".into());
        let mut messages = Vec::new();
        runner.run(&script, &mut |message| messages.push(message)).unwrap();
        assert_eq!(
            messages,
            vec![Message::Error {
                id: 1,
                text: "Error: boom".into()
            }]
        );
    }

    #[test]
    pub fn test_timeout() {
        if !node_available("test_timeout") {
            return;
        }
        let mut runner = LiveRunConfig::default().create_preprocessor();
        runner.timeout = Duration::from_millis(300);
        let script = Script::new(0, "while (true) {}".into());
        let result = runner.run(&script, &mut |_| {});
        assert!(matches!(result, Err(RunError::Timeout(_))), "{result:?}");
    }

    #[test]
    pub fn test_missing_runtime() {
        let mut runner = LiveRunConfig::default().create_preprocessor();
        runner.runtime = vec!["liverun-no-such-runtime".into()];
        let script = Script::new(0, "1".into());
        let result = runner.run(&script, &mut |_| {});
        assert!(matches!(result, Err(RunError::Spawn { .. })), "{result:?}");
    }
}
