//! Command execution seam.
//!
//! The pipeline drives the container engine through [`Exec`] so tests
//! can script engine behavior without a daemon. The production
//! implementation shells out; observable commands are logged by the
//! pipeline (`Running: <cmd>`) before they run, queries are not.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::error::{BuildError, BuildResult};
use crate::logs::LogWriter;

/// Runs external commands for the pipeline.
#[async_trait]
pub trait Exec: Send + Sync {
    /// Run a command, streaming combined output to the log writer.
    async fn stream(&self, logs: &LogWriter, program: &str, args: &[&str]) -> BuildResult<()>;

    /// Run a command and capture trimmed stdout (queries; not logged).
    async fn output(&self, program: &str, args: &[&str]) -> BuildResult<String>;

    /// Run a command feeding `stdin`, capture trimmed stdout.
    async fn input(&self, program: &str, args: &[&str], stdin: &[u8]) -> BuildResult<String>;

    /// Run a command discarding output.
    async fn run(&self, program: &str, args: &[&str]) -> BuildResult<()>;
}

fn command_failed(program: &str, args: &[&str], detail: &str) -> BuildError {
    BuildError::Command(format!("{program} {}: {detail}", args.join(" ")))
}

/// Shell out to the host container engine.
pub struct ShellExec;

#[async_trait]
impl Exec for ShellExec {
    async fn stream(&self, logs: &LogWriter, program: &str, args: &[&str]) -> BuildResult<()> {
        let mut child = Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let mut stdout = child.stdout.take().expect("piped stdout");
        let mut stderr = child.stderr.take().expect("piped stderr");

        let out_logs = logs.clone();
        let out_task = tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            while let Ok(n) = stdout.read(&mut buf).await {
                if n == 0 {
                    break;
                }
                out_logs.write_raw(&buf[..n]);
            }
        });
        let err_logs = logs.clone();
        let err_task = tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            while let Ok(n) = stderr.read(&mut buf).await {
                if n == 0 {
                    break;
                }
                err_logs.write_raw(&buf[..n]);
            }
        });

        let status = child.wait().await?;
        let _ = out_task.await;
        let _ = err_task.await;

        if !status.success() {
            return Err(command_failed(program, args, &status.to_string()));
        }
        Ok(())
    }

    async fn output(&self, program: &str, args: &[&str]) -> BuildResult<String> {
        let output = Command::new(program).args(args).output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(command_failed(program, args, stderr.trim()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn input(&self, program: &str, args: &[&str], stdin: &[u8]) -> BuildResult<String> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let mut child_stdin = child.stdin.take().expect("piped stdin");
        child_stdin.write_all(stdin).await?;
        drop(child_stdin);

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(command_failed(program, args, stderr.trim()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn run(&self, program: &str, args: &[&str]) -> BuildResult<()> {
        let output = Command::new(program).args(args).output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(command_failed(program, args, stderr.trim()));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod script {
    //! Scripted engine for pipeline tests: records every command and
    //! plays back queued responses.

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct ScriptExec {
        pub commands: Mutex<Vec<String>>,
        stream_outputs: Mutex<VecDeque<String>>,
        outputs: Mutex<VecDeque<String>>,
        fail_matching: Mutex<Option<(String, String)>>,
    }

    impl ScriptExec {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue output streamed by the next `stream` call.
        pub fn push_stream(&self, output: &str) {
            self.stream_outputs
                .lock()
                .unwrap()
                .push_back(output.to_string());
        }

        /// Queue the response for the next `output`/`input` call.
        pub fn push_output(&self, output: &str) {
            self.outputs.lock().unwrap().push_back(output.to_string());
        }

        /// Fail any command whose rendering contains `needle`.
        pub fn fail_matching(&self, needle: &str, msg: &str) {
            *self.fail_matching.lock().unwrap() = Some((needle.to_string(), msg.to_string()));
        }

        pub fn commands(&self) -> Vec<String> {
            self.commands.lock().unwrap().clone()
        }

        fn record(&self, program: &str, args: &[&str]) -> BuildResult<()> {
            let rendered = format!("{program} {}", args.join(" "));
            self.commands.lock().unwrap().push(rendered.clone());
            if let Some((needle, msg)) = &*self.fail_matching.lock().unwrap() {
                if rendered.contains(needle.as_str()) {
                    return Err(BuildError::Command(msg.clone()));
                }
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Exec for ScriptExec {
        async fn stream(
            &self,
            logs: &LogWriter,
            program: &str,
            args: &[&str],
        ) -> BuildResult<()> {
            self.record(program, args)?;
            if let Some(output) = self.stream_outputs.lock().unwrap().pop_front() {
                logs.write_raw(output.as_bytes());
            }
            Ok(())
        }

        async fn output(&self, program: &str, args: &[&str]) -> BuildResult<String> {
            self.record(program, args)?;
            Ok(self
                .outputs
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default())
        }

        async fn input(&self, program: &str, args: &[&str], _stdin: &[u8]) -> BuildResult<String> {
            self.record(program, args)?;
            Ok(self
                .outputs
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default())
        }

        async fn run(&self, program: &str, args: &[&str]) -> BuildResult<()> {
            self.record(program, args)?;
            Ok(())
        }
    }
}
