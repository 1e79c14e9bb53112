use super::{CompletionProvider, CompletionRequest};
use crate::errors::{AppError, AppResult};
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::thread;
use wait_timeout::ChildExt;

pub const TOKEN_ENV: &str = "STUDIO_OPS_ASSISTANT_TOKEN";
pub const MODEL_ENV: &str = "STUDIO_OPS_ASSISTANT_MODEL";

const STDERR_TAIL_CHARS: usize = 400;

/// Runs an external model CLI: prompt on stdin, reply on stdout.
#[derive(Debug, Clone)]
pub struct CliCompletionProvider {
    program: String,
    args: Vec<String>,
}

impl CliCompletionProvider {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// First element is the program, the rest its arguments.
    pub fn from_command_line(parts: &[String]) -> AppResult<Self> {
        let Some((program, args)) = parts.split_first() else {
            return Err(AppError::Config("Assistant command is empty".to_string()));
        };
        Ok(Self::new(program.clone(), args.to_vec()))
    }
}

impl CompletionProvider for CliCompletionProvider {
    fn complete(&self, request: &CompletionRequest) -> AppResult<String> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(token) = request.api_token.as_deref().filter(|token| !token.is_empty()) {
            command.env(TOKEN_ENV, token);
        }
        if let Some(model) = request.model.as_deref().filter(|model| !model.is_empty()) {
            command.env(MODEL_ENV, model);
        }

        let mut child = command
            .spawn()
            .map_err(|error| AppError::Assistant(format!("Failed to start {}: {}", self.program, error)))?;

        let stdin = child.stdin.take();
        let prompt = request.prompt.clone();
        let writer = thread::spawn(move || {
            if let Some(mut stdin) = stdin {
                let _ = stdin.write_all(prompt.as_bytes());
            }
        });
        let stdout_reader = child.stdout.take().map(spawn_reader);
        let stderr_reader = child.stderr.take().map(spawn_reader);

        let status = match child.wait_timeout(request.timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                tracing::warn!(program = %self.program, timeout_ms = request.timeout.as_millis() as u64, "assistant command timed out");
                return Err(AppError::Assistant(format!(
                    "Assistant timed out after {}s",
                    request.timeout.as_secs_f32()
                )));
            }
            Err(error) => {
                let _ = child.kill();
                return Err(AppError::Assistant(format!("Failed to wait for assistant: {}", error)));
            }
        };

        let _ = writer.join();
        let stdout = join_reader(stdout_reader);
        let stderr = join_reader(stderr_reader);

        if !status.success() {
            let tail: String = {
                let trimmed = stderr.trim();
                let skip = trimmed.chars().count().saturating_sub(STDERR_TAIL_CHARS);
                trimmed.chars().skip(skip).collect()
            };
            return Err(AppError::Assistant(format!(
                "Assistant exited with {}: {}",
                status.code().map(|code| code.to_string()).unwrap_or_else(|| "signal".to_string()),
                tail
            )));
        }

        Ok(stdout)
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut source: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = source.read_to_end(&mut buffer);
        String::from_utf8_lossy(&buffer).to_string()
    })
}

fn join_reader(handle: Option<thread::JoinHandle<String>>) -> String {
    handle.and_then(|handle| handle.join().ok()).unwrap_or_default()
}
