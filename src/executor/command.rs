use super::{Executor, StepContext, StepReport};
use crate::logs::LineSink;
use anyhow::Context;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::debug;

/// Runs an external program once per step.
///
/// Arguments are templates; `{component}`, `{version}`, `{hosts}`, `{mode}`,
/// `{environment}`, `{platform}` and `{job_id}` are substituted per step.
/// Combined stdout/stderr lines are streamed into the job log and the exit
/// status decides success.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    env: Vec<(String, String)>,
}

impl CommandExecutor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Substitute step placeholders into one argument template
    pub fn render(template: &str, ctx: &StepContext) -> String {
        template
            .replace("{component}", &ctx.step.component)
            .replace("{version}", &ctx.step.version)
            .replace("{hosts}", &ctx.hosts_arg())
            .replace("{mode}", ctx.mode.as_str())
            .replace("{environment}", &ctx.environment)
            .replace("{platform}", &ctx.platform)
            .replace("{job_id}", &ctx.job_id.to_string())
    }

    fn build_command(&self, ctx: &StepContext) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args.iter().map(|arg| Self::render(arg, ctx)));
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Line reader for process output that may not be valid UTF-8.
///
/// Invalid bytes are replaced rather than failing the read. Partially read
/// bytes stay in `buf`, so `next_line` is safe to use as a `select!` branch.
struct LossyLines<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LossyLines<R> {
    fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::new(),
        }
    }

    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        let read = self.reader.read_until(b'\n', &mut self.buf).await?;
        if read == 0 && self.buf.is_empty() {
            return Ok(None);
        }

        let mut end = self.buf.len();
        if self.buf[..end].ends_with(b"\n") {
            end -= 1;
        }
        if self.buf[..end].ends_with(b"\r") {
            end -= 1;
        }
        let line = String::from_utf8_lossy(&self.buf[..end]).into_owned();
        self.buf.clear();
        Ok(Some(line))
    }
}

#[async_trait]
impl Executor for CommandExecutor {
    fn name(&self) -> &str {
        &self.program
    }

    async fn execute(&self, ctx: &StepContext, output: &LineSink) -> anyhow::Result<StepReport> {
        let mut child = self
            .build_command(ctx)
            .spawn()
            .with_context(|| format!("failed to spawn '{}' for {}", self.program, ctx.component()))?;

        debug!(
            job_id = %ctx.job_id,
            component = %ctx.component(),
            program = %self.program,
            "⚙️ EXECUTOR: Spawned step process"
        );

        let mut stdout = LossyLines::new(child.stdout.take().context("stdout was not captured")?);
        let mut stderr = LossyLines::new(child.stderr.take().context("stderr was not captured")?);
        let (mut stdout_done, mut stderr_done) = (false, false);

        while !(stdout_done && stderr_done) {
            tokio::select! {
                line = stdout.next_line(), if !stdout_done => {
                    match line.context("failed reading step stdout")? {
                        Some(line) => { output.line(line); }
                        None => stdout_done = true,
                    }
                }
                line = stderr.next_line(), if !stderr_done => {
                    match line.context("failed reading step stderr")? {
                        Some(line) => { output.line(line); }
                        None => stderr_done = true,
                    }
                }
            }
        }

        let status = child
            .wait()
            .await
            .with_context(|| format!("failed waiting for '{}'", self.program))?;

        let report = if status.success() {
            StepReport {
                success: true,
                changed: ctx.mode.applies_changes(),
                message: None,
                exit_code: status.code(),
            }
        } else {
            StepReport {
                success: false,
                changed: false,
                message: Some(format!("{} exited with {status}", self.program)),
                exit_code: status.code(),
            }
        };
        Ok(report)
    }
}
