//! JSON-RPC stdio framer (C1): line-delimited JSON over a child process.

use super::transport::{McpError, McpTransport, MIN_LINE_BUFFER};
use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;

pub struct StdioTransportConfig {
    /// Maximum accepted line length. Must be >= MIN_LINE_BUFFER.
    pub max_line_bytes: usize,
}

impl Default for StdioTransportConfig {
    fn default() -> Self {
        Self {
            max_line_bytes: MIN_LINE_BUFFER,
        }
    }
}

pub struct StdioTransport {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
    max_line_bytes: usize,
}

impl StdioTransport {
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        cwd: Option<&str>,
        config: StdioTransportConfig,
    ) -> Result<Self, McpError> {
        if config.max_line_bytes < MIN_LINE_BUFFER {
            return Err(McpError::Config(format!(
                "stdio line buffer must be at least {} bytes, got {}",
                MIN_LINE_BUFFER, config.max_line_bytes
            )));
        }

        let expanded_args: Vec<String> = args.iter().map(|a| expand_home(a)).collect();

        let mut cmd = tokio::process::Command::new(command);
        cmd.args(&expanded_args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn()?;

        let stdin = child.stdin.take().ok_or(McpError::Closed)?;
        let stdout = child.stdout.take().ok_or(McpError::Closed)?;
        let stderr = child.stderr.take();

        if let Some(stderr) = stderr {
            let server_name = command.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    log::debug!("[mcp:{}:stderr] {}", server_name, line);
                    crate::log(format!("[mcp:{}:stderr] {}", server_name, line));
                }
            });
        }

        Ok(Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::with_capacity(config.max_line_bytes, stdout)),
            max_line_bytes: config.max_line_bytes,
        })
    }

    /// Best-effort termination: graceful wait, then kill, matching §5's
    /// close-stdin -> terminate -> wait 1s -> kill -> wait 1s sequence.
    pub async fn terminate(&self) -> Result<(), McpError> {
        {
            let mut stdin = self.stdin.lock().await;
            let _ = stdin.shutdown().await;
        }

        let mut child = self.child.lock().await;
        if tokio::time::timeout(std::time::Duration::from_secs(1), child.wait())
            .await
            .is_ok()
        {
            return Ok(());
        }

        let _ = child.start_kill();
        let _ = tokio::time::timeout(std::time::Duration::from_secs(1), child.wait()).await;
        Ok(())
    }
}

fn expand_home(arg: &str) -> String {
    if let Some(rest) = arg.strip_prefix('~') {
        if let Ok(home) = std::env::var("HOME") {
            return format!("{}{}", home, rest);
        }
    }
    arg.to_string()
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn send_line(&self, line: &str) -> Result<(), McpError> {
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn recv_line(&self) -> Result<Option<String>, McpError> {
        let mut stdout = self.stdout.lock().await;
        let mut buf = String::new();
        let hard_ceiling = self.max_line_bytes * 2;
        loop {
            let chunk = tokio::io::AsyncBufReadExt::read_line(&mut *stdout, &mut buf).await?;
            if chunk == 0 {
                return Ok(None);
            }
            if buf.ends_with('\n') {
                break;
            }
            if buf.len() > hard_ceiling {
                return Err(McpError::Config(format!(
                    "line exceeded hard ceiling of {} bytes",
                    hard_ceiling
                )));
            }
        }
        let trimmed = buf.trim_end_matches(['\n', '\r']).to_string();
        if trimmed.is_empty() {
            // Blank line: keep reading rather than surfacing a spurious frame.
            drop(stdout);
            return self.recv_line().await;
        }
        Ok(Some(trimmed))
    }

    async fn close(&self) -> Result<(), McpError> {
        self.terminate().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_and_echo() {
        let transport = StdioTransport::spawn(
            "cat",
            &[],
            &HashMap::new(),
            None,
            StdioTransportConfig::default(),
        )
        .await
        .expect("spawn cat");

        transport.send_line("hello").await.expect("send");
        let line = transport.recv_line().await.expect("recv");
        assert_eq!(line, Some("hello".to_string()));

        transport.close().await.expect("close");
    }

    #[tokio::test]
    async fn rejects_small_line_buffer() {
        let result = StdioTransport::spawn(
            "cat",
            &[],
            &HashMap::new(),
            None,
            StdioTransportConfig {
                max_line_bytes: 4096,
            },
        )
        .await;
        assert!(result.is_err());
    }

    #[test]
    fn expands_home_prefix() {
        std::env::set_var("HOME", "/home/tester");
        assert_eq!(expand_home("~/bin/tool"), "/home/tester/bin/tool");
        assert_eq!(expand_home("/abs/path"), "/abs/path");
    }
}
