//! [`DeviceExecutor`] backed by host command-line tools.
//!
//! Each platform gets one `ShellExecutor` built from its
//! [`ToolTemplates`](crate::domain::config::ToolTemplates).  A template such
//! as `adb -s {device} shell {command}` is split on whitespace once, at
//! construction.  Placeholders are substituted per call inside their own
//! argument, so a device command like `cd /sdcard && ls -la` always travels
//! as a single argv entry and is never re-split by the host.
//!
//! Child processes are spawned with `kill_on_drop(true)` and bounded by a
//! timeout; a command that outlives it is killed and reported as a failure.

use std::process::{Output, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, trace};

use devbridge_core::{CommandOutput, DeviceExecutor, ExecutorError, Platform};

use crate::domain::config::ToolTemplates;

/// Default upper bound for one host-tool invocation.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// A whitespace-split argv with `{device}` / `{command}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    program: String,
    args: Vec<String>,
}

impl CommandTemplate {
    /// # Errors
    ///
    /// [`ExecutorError::Failed`] for an empty template.
    pub fn parse(template: &str) -> Result<Self, ExecutorError> {
        let mut parts = template.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| ExecutorError::Failed("empty command template".to_string()))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    /// Substitutes the placeholders and returns `(program, args)`.
    pub fn render(&self, device_id: &str, command: &str) -> (String, Vec<String>) {
        // `{device}` first, so a command containing the literal text
        // `{device}` is passed through untouched.
        let fill = |part: &str| part.replace("{device}", device_id).replace("{command}", command);
        (fill(&self.program), self.args.iter().map(|a| fill(a)).collect())
    }
}

/// Runs device commands and screen captures through host tools.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    platform: Platform,
    shell: CommandTemplate,
    screencap: CommandTemplate,
    command_timeout: Duration,
}

impl ShellExecutor {
    /// # Errors
    ///
    /// [`ExecutorError::Failed`] if either template is empty.
    pub fn from_templates(platform: Platform, templates: &ToolTemplates) -> Result<Self, ExecutorError> {
        Ok(Self {
            platform,
            shell: CommandTemplate::parse(&templates.shell)?,
            screencap: CommandTemplate::parse(&templates.screencap)?,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, command_timeout: Duration) -> Self {
        self.command_timeout = command_timeout;
        self
    }

    async fn run(&self, program: String, args: Vec<String>) -> Result<Output, ExecutorError> {
        trace!("{}: spawning {program} {args:?}", self.platform);
        run_tool(program, args, self.command_timeout).await
    }
}

/// Runs one host tool to completion with piped output, killing it if it
/// outlives `limit`.
pub(crate) async fn run_tool(
    program: String,
    args: Vec<String>,
    limit: Duration,
) -> Result<Output, ExecutorError> {
    let mut cmd = Command::new(&program);
    cmd.args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    match timeout(limit, cmd.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(source)) => Err(ExecutorError::Spawn { program, source }),
        Err(_) => Err(ExecutorError::Failed(format!(
            "'{program}' timed out after {} ms",
            limit.as_millis()
        ))),
    }
}

#[async_trait]
impl DeviceExecutor for ShellExecutor {
    async fn execute_command(
        &self,
        device_id: &str,
        command: &str,
    ) -> Result<CommandOutput, ExecutorError> {
        let (program, args) = self.shell.render(device_id, command);
        let started = Instant::now();
        let output = self.run(program, args).await?;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let exit_code = output.status.code().unwrap_or(-1);
        debug!(
            "{} {device_id}: '{command}' exited {exit_code} in {duration_ms} ms",
            self.platform
        );
        Ok(CommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration_ms,
        })
    }

    async fn capture_screen(&self, device_id: &str) -> Result<Vec<u8>, ExecutorError> {
        let (program, args) = self.screencap.render(device_id, "");
        let output = self.run(program.clone(), args).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExecutorError::Capture(format!(
                "{program} exited with {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }
        if output.stdout.is_empty() {
            return Err(ExecutorError::Capture(format!("{program} produced no image data")));
        }
        Ok(output.stdout)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_keeps_command_as_one_argument() {
        // Arrange
        let template = CommandTemplate::parse("adb -s {device} shell {command}").unwrap();

        // Act
        let (program, args) = template.render("emulator-5554", "cd /sdcard && ls -la");

        // Assert
        assert_eq!(program, "adb");
        assert_eq!(args, vec!["-s", "emulator-5554", "shell", "cd /sdcard && ls -la"]);
    }

    #[test]
    fn test_template_substitutes_inside_an_argument() {
        let template = CommandTemplate::parse("ssh mobile@{device} {command}").unwrap();
        let (_, args) = template.render("udid1", "ls");
        assert_eq!(args, vec!["mobile@udid1", "ls"]);
    }

    #[test]
    fn test_template_does_not_expand_placeholders_inside_the_command() {
        let template = CommandTemplate::parse("tool {device} {command}").unwrap();
        let (_, args) = template.render("d1", "echo {device}");
        assert_eq!(args, vec!["d1", "echo {device}"]);
    }

    #[test]
    fn test_empty_template_is_rejected() {
        assert!(CommandTemplate::parse("   ").is_err());
    }

    #[cfg(unix)]
    fn local_shell() -> ShellExecutor {
        let templates = ToolTemplates {
            shell: "sh -c {command}".to_string(),
            screencap: "printf {device}".to_string(),
            list_devices: None,
        };
        ShellExecutor::from_templates(Platform::Android, &templates).unwrap()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_captures_stdout_and_exit_code() {
        // Arrange
        let executor = local_shell();

        // Act
        let ok = executor.execute_command("d", "echo hi").await.unwrap();
        let failed = executor
            .execute_command("d", "echo oops >&2; exit 3")
            .await
            .unwrap();

        // Assert
        assert_eq!(ok.exit_code, 0);
        assert_eq!(ok.stdout, "hi\n");
        assert_eq!(failed.exit_code, 3);
        assert_eq!(failed.stderr, "oops\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_capture_returns_stdout_bytes() {
        let executor = local_shell();
        let frame = executor.capture_screen("framebytes").await.unwrap();
        assert_eq!(frame, b"framebytes");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_capture_with_failing_tool_is_capture_error() {
        let templates = ToolTemplates {
            shell: "sh -c {command}".to_string(),
            screencap: "false".to_string(),
            list_devices: None,
        };
        let executor = ShellExecutor::from_templates(Platform::Ios, &templates).unwrap();

        let err = executor.capture_screen("d").await.unwrap_err();

        assert!(matches!(err, ExecutorError::Capture(_)));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let templates = ToolTemplates {
            shell: "devbridge-no-such-tool-xyz {command}".to_string(),
            screencap: "devbridge-no-such-tool-xyz".to_string(),
            list_devices: None,
        };
        let executor = ShellExecutor::from_templates(Platform::Android, &templates).unwrap();

        let err = executor.execute_command("d", "ls").await.unwrap_err();

        assert!(matches!(err, ExecutorError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_command_times_out() {
        let executor = local_shell().with_timeout(Duration::from_millis(50));

        let err = executor.execute_command("d", "sleep 5").await.unwrap_err();

        assert!(err.to_string().contains("timed out"));
    }
}
