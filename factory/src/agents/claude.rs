//! Provider that drives the `claude` CLI in stream-json mode.

use std::process::Stdio;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::provider::{AgentProvider, MessageStream, ProviderMessage, QueryRequest};
use super::status_tool::STATUS_TOOL_NAME;
use crate::error::AbortedError;
use crate::io::config::AgentConfig;

/// Spawns one `claude -p` process per delegate call and maps its stream-json
/// output to [`ProviderMessage`]s. Cancelling the request kills the process.
#[derive(Debug, Clone)]
pub struct ClaudeCliProvider {
    command: String,
    extra_args: Vec<String>,
}

impl ClaudeCliProvider {
    pub fn new(command: impl Into<String>, extra_args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            extra_args,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(config.command.clone(), config.extra_args.clone())
    }

    /// Command-line arguments for `request`. The prompt itself goes to stdin.
    pub fn args(&self, request: &QueryRequest) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
            "--model".to_string(),
            request.model.clone(),
            "--max-turns".to_string(),
            request.max_turns.to_string(),
            "--append-system-prompt".to_string(),
            request.system_prompt.clone(),
        ];
        // The CLI cannot host the in-process status tool; its delegate uses
        // the `factory update-status` command named in the task prompt.
        let allowed: Vec<&str> = request
            .allowed_tools
            .iter()
            .map(String::as_str)
            .filter(|tool| *tool != STATUS_TOOL_NAME)
            .collect();
        if !allowed.is_empty() {
            args.push("--allowedTools".to_string());
            args.push(allowed.join(","));
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }

    fn spawn(&self, request: &QueryRequest) -> Result<Child> {
        let mut cmd = Command::new(&self.command);
        cmd.args(self.args(request))
            .current_dir(&request.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        info!(command = %self.command, cwd = %request.cwd.display(), "spawning delegate");
        cmd.spawn()
            .with_context(|| format!("spawn {}", self.command))
    }
}

impl AgentProvider for ClaudeCliProvider {
    fn name(&self) -> &str {
        "claude-cli"
    }

    fn execute_query(&self, request: QueryRequest) -> MessageStream {
        let provider = self.clone();
        Box::pin(async_stream::stream! {
            let mut child = match provider.spawn(&request) {
                Ok(child) => child,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };
            if let Err(err) = write_prompt(&mut child, &request.prompt).await {
                yield Err(err);
                return;
            }
            drain_stderr(&mut child);
            let Some(stdout) = child.stdout.take() else {
                yield Err(anyhow!("delegate stdout was not piped"));
                return;
            };

            let mut lines = BufReader::new(stdout).lines();
            loop {
                let next = tokio::select! {
                    biased;
                    _ = request.cancel.cancelled() => None,
                    line = lines.next_line() => Some(line),
                };
                let Some(line) = next else {
                    if let Err(err) = child.kill().await {
                        warn!(err = %err, "failed to kill cancelled delegate");
                    }
                    yield Err(anyhow::Error::new(AbortedError));
                    return;
                };
                match line {
                    Ok(Some(line)) => {
                        for message in parse_stream_line(&line) {
                            yield Ok(message);
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        yield Err(anyhow::Error::new(err).context("read delegate output"));
                        return;
                    }
                }
            }

            match child.wait().await {
                Ok(status) if status.success() => debug!("delegate exited cleanly"),
                Ok(status) => {
                    yield Err(anyhow!("delegate exited with status {:?}", status.code()));
                }
                Err(err) => {
                    yield Err(anyhow::Error::new(err).context("wait for delegate"));
                }
            }
        })
    }
}

async fn write_prompt(child: &mut Child, prompt: &str) -> Result<()> {
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("delegate stdin was not piped"))?;
    stdin
        .write_all(prompt.as_bytes())
        .await
        .context("write prompt to delegate")?;
    stdin.shutdown().await.context("close delegate stdin")?;
    Ok(())
}

fn drain_stderr(child: &mut Child) {
    let Some(stderr) = child.stderr.take() else {
        return;
    };
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(line = %line, "delegate stderr");
        }
    });
}

/// Map one stream-json line to provider messages.
///
/// Assistant messages contribute their text and tool-use blocks; every other
/// envelope becomes [`ProviderMessage::Other`]. Lines that are not JSON objects
/// with a `type` are skipped.
pub fn parse_stream_line(line: &str) -> Vec<ProviderMessage> {
    let Ok(json) = serde_json::from_str::<Value>(line) else {
        debug!(line, "skipping non-json delegate output");
        return Vec::new();
    };
    let Some(kind) = json.get("type").and_then(Value::as_str) else {
        return Vec::new();
    };
    if kind != "assistant" {
        return vec![ProviderMessage::Other {
            kind: kind.to_string(),
        }];
    }

    let Some(blocks) = json
        .get("message")
        .and_then(|message| message.get("content"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };
    blocks.iter().filter_map(parse_content_block).collect()
}

fn parse_content_block(block: &Value) -> Option<ProviderMessage> {
    match block.get("type").and_then(Value::as_str)? {
        "text" => {
            let text = block.get("text").and_then(Value::as_str)?;
            Some(ProviderMessage::Text(text.to_string()))
        }
        "tool_use" => {
            let name = block.get("name").and_then(Value::as_str)?;
            Some(ProviderMessage::ToolUse {
                name: name.to_string(),
                input: block.get("input").cloned().unwrap_or(Value::Null),
            })
        }
        other => Some(ProviderMessage::Other {
            kind: format!("assistant.{other}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::provider::CancelToken;
    use crate::agents::status_tool::StatusUpdateTool;
    use crate::io::init::FactoryPaths;
    use serde_json::json;

    fn request() -> QueryRequest {
        QueryRequest {
            prompt: "task".to_string(),
            system_prompt: "system".to_string(),
            model: "sonnet".to_string(),
            cwd: "/project".into(),
            max_turns: 50,
            allowed_tools: vec![
                "Read".to_string(),
                "Bash".to_string(),
                STATUS_TOOL_NAME.to_string(),
            ],
            cancel: CancelToken::new(),
            status_tool: StatusUpdateTool::new(FactoryPaths::new("/project"), "f1"),
        }
    }

    #[test]
    fn parses_text_and_tool_use_blocks() {
        let line = json!({
            "type": "assistant",
            "message": {"content": [
                {"type": "text", "text": "Reading files"},
                {"type": "tool_use", "id": "t1", "name": "Read", "input": {"file_path": "a.rs"}},
                {"type": "thinking", "thinking": "..."}
            ]}
        })
        .to_string();

        assert_eq!(
            parse_stream_line(&line),
            vec![
                ProviderMessage::Text("Reading files".to_string()),
                ProviderMessage::ToolUse {
                    name: "Read".to_string(),
                    input: json!({"file_path": "a.rs"}),
                },
                ProviderMessage::Other {
                    kind: "assistant.thinking".to_string(),
                },
            ]
        );
    }

    #[test]
    fn other_envelopes_and_garbage() {
        let result = json!({"type": "result", "subtype": "error_max_turns"}).to_string();
        assert_eq!(
            parse_stream_line(&result),
            vec![ProviderMessage::Other {
                kind: "result".to_string()
            }]
        );
        assert!(parse_stream_line("not json").is_empty());
        assert!(parse_stream_line("{\"no_type\":1}").is_empty());
    }

    #[test]
    fn args_carry_request_settings() {
        let provider = ClaudeCliProvider::new("claude", vec!["--debug".to_string()]);
        let args = provider.args(&request());
        assert_eq!(&args[..4], ["-p", "--output-format", "stream-json", "--verbose"]);
        let joined = args.join(" ");
        assert!(joined.contains("--model sonnet"));
        assert!(joined.contains("--max-turns 50"));
        assert!(joined.contains("--allowedTools Read,Bash "));
        assert!(!joined.contains(STATUS_TOOL_NAME));
        assert_eq!(args.last().map(String::as_str), Some("--debug"));
    }
}
