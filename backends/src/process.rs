use packhaul_core::{CancelToken, Error, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

/// Upper bound on the captured stderr carried inside a process error.
const STDERR_TAIL_LIMIT: usize = 4096;

#[derive(Debug)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr_tail: String,
}

/// Spawns one external tool invocation. Non-zero exits become
/// [`Error::Process`] with a truncated stderr tail; cancellation kills
/// the child and surfaces [`Error::Aborted`].
pub struct ProcessRunner {
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    cwd: Option<PathBuf>,
}

impl ProcessRunner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs(mut self, vars: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub async fn output(&self, token: &CancelToken) -> Result<ProcessOutput> {
        self.run(token, |_| {}).await
    }

    /// Runs the process, invoking `on_line` for every stdout line as it
    /// arrives. Lines are also collected into the returned output.
    pub async fn run<F>(&self, token: &CancelToken, mut on_line: F) -> Result<ProcessOutput>
    where
        F: FnMut(&str),
    {
        token.check()?;
        debug!(program = %self.program, args = ?self.args, "Spawning process");

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.env {
            command.env(key, value);
        }
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|e| {
            Error::Other(format!("failed to spawn {}: {e}", self.program))
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let stderr_task = tokio::spawn(async move {
            let mut tail = Vec::new();
            if let Some(mut stderr) = stderr {
                let mut buf = [0u8; 1024];
                while let Ok(n) = stderr.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                    tail.extend_from_slice(&buf[..n]);
                    if tail.len() > STDERR_TAIL_LIMIT {
                        let cut = tail.len() - STDERR_TAIL_LIMIT;
                        tail.drain(..cut);
                    }
                }
            }
            String::from_utf8_lossy(&tail).into_owned()
        });

        let mut collected = String::new();
        let mut lines = stdout.map(|s| BufReader::new(s).lines());

        let status = loop {
            tokio::select! {
                status = child.wait() => break status?,
                line = read_line(&mut lines) => {
                    match line? {
                        Some(line) => {
                            on_line(&line);
                            collected.push_str(&line);
                            collected.push('\n');
                        }
                        // EOF; stop selecting on stdout.
                        None => lines = None,
                    }
                }
                _ = token.cancelled() => {
                    warn!(program = %self.program, "Killing process after cancellation");
                    child.kill().await.ok();
                    return Err(Error::Aborted);
                }
            }
        };

        // Drain whatever stdout remains after exit.
        if let Some(lines) = lines.as_mut() {
            while let Some(line) = lines.next_line().await? {
                on_line(&line);
                collected.push_str(&line);
                collected.push('\n');
            }
        }

        let stderr_tail = stderr_task.await.unwrap_or_default();

        if status.success() {
            Ok(ProcessOutput {
                stdout: collected,
                stderr_tail,
            })
        } else {
            Err(Error::Process {
                program: self.program.clone(),
                code: status.code(),
                stderr_tail,
            })
        }
    }
}

async fn read_line(
    lines: &mut Option<tokio::io::Lines<BufReader<tokio::process::ChildStdout>>>,
) -> Result<Option<String>> {
    match lines {
        Some(lines) => Ok(lines.next_line().await?),
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_lines() {
        let token = CancelToken::new();
        let mut seen = Vec::new();
        let output = ProcessRunner::new("sh")
            .args(["-c", "echo one; echo two"])
            .run(&token, |line| seen.push(line.to_string()))
            .await
            .unwrap();
        assert_eq!(seen, vec!["one", "two"]);
        assert_eq!(output.stdout, "one\ntwo\n");
    }

    #[tokio::test]
    async fn nonzero_exit_becomes_process_error_with_stderr_tail() {
        let token = CancelToken::new();
        let result = ProcessRunner::new("sh")
            .args(["-c", "echo broken >&2; exit 3"])
            .output(&token)
            .await;
        match result {
            Err(Error::Process {
                program,
                code,
                stderr_tail,
            }) => {
                assert_eq!(program, "sh");
                assert_eq!(code, Some(3));
                assert!(stderr_tail.contains("broken"));
            }
            other => panic!("expected process error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_token_aborts_before_spawn() {
        let token = CancelToken::new();
        token.cancel();
        let result = ProcessRunner::new("sh").args(["-c", "true"]).output(&token).await;
        assert!(matches!(result, Err(Error::Aborted)));
    }

    #[tokio::test]
    async fn cancellation_kills_running_process() {
        let token = CancelToken::new();
        let killer = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            killer.cancel();
        });
        let started = std::time::Instant::now();
        let result = ProcessRunner::new("sleep").arg("30").output(&token).await;
        assert!(matches!(result, Err(Error::Aborted)));
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }
}
