//! One-shot device operations: ad-hoc commands, file management, runtime
//! permissions, app management and device discovery.
//!
//! Unlike the session managers these keep no state.  Each operation builds a
//! shell command, runs it once through the platform executor, and returns
//! the raw [`CommandResult`] as data.  Output is not parsed, except for the
//! package list which is reduced to package names.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use devbridge_core::{
    shell_quote, BridgeError, CommandResult, DeviceDiscovery, DeviceInfo, Executors, Platform,
};

use crate::domain::events::AppEvent;

/// File actions of the `file` envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    List,
    Delete,
    Mkdir,
}

impl FileAction {
    pub fn parse(action: &str) -> Option<Self> {
        match action {
            "list" => Some(FileAction::List),
            "delete" => Some(FileAction::Delete),
            "mkdir" => Some(FileAction::Mkdir),
            _ => None,
        }
    }

    fn command(self, path: &str) -> String {
        let quoted = shell_quote(path);
        match self {
            FileAction::List => format!("ls -la {quoted}"),
            FileAction::Delete => format!("rm -rf {quoted}"),
            FileAction::Mkdir => format!("mkdir -p {quoted}"),
        }
    }
}

/// Android runtime permission changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionChange {
    Grant,
    Revoke,
}

/// App lifecycle actions of the `app-installation` envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppAction {
    Uninstall,
    Launch,
    Stop,
}

impl AppAction {
    fn command(self, package: &str) -> String {
        let quoted = shell_quote(package);
        match self {
            AppAction::Uninstall => format!("pm uninstall {quoted}"),
            AppAction::Launch => format!("monkey -p {quoted} -c android.intent.category.LAUNCHER 1"),
            AppAction::Stop => format!("am force-stop {quoted}"),
        }
    }

    fn event(self, device_id: &str, package: &str) -> AppEvent {
        let device_id = device_id.to_string();
        let package_name = package.to_string();
        match self {
            AppAction::Uninstall => AppEvent::Uninstalled {
                device_id,
                package_name,
            },
            AppAction::Launch => AppEvent::Launched {
                device_id,
                package_name,
            },
            AppAction::Stop => AppEvent::Stopped {
                device_id,
                package_name,
            },
        }
    }
}

/// Stateless device operations.  Cheap to clone.
#[derive(Clone)]
pub struct DeviceOps {
    executors: Executors,
    discovery: Arc<dyn DeviceDiscovery>,
    events: mpsc::UnboundedSender<AppEvent>,
}

impl DeviceOps {
    pub fn new(
        executors: Executors,
        discovery: Arc<dyn DeviceDiscovery>,
    ) -> (Self, mpsc::UnboundedReceiver<AppEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                executors,
                discovery,
                events,
            },
            rx,
        )
    }

    /// Runs `command` once on the device.  A non-zero exit is returned as
    /// data.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Device`] when the executor itself fails.
    pub async fn execute(
        &self,
        device_id: &str,
        platform: Platform,
        command: &str,
    ) -> Result<CommandResult, BridgeError> {
        debug!("one-shot command on {device_id}: {command}");
        let output = self
            .executors
            .for_platform(platform)
            .execute_command(device_id, command)
            .await?;
        Ok(output.into())
    }

    /// # Errors
    ///
    /// [`BridgeError::InvalidPayload`] for an empty path, or for deleting the
    /// filesystem root; [`BridgeError::Device`] when the executor fails.
    pub async fn file(
        &self,
        device_id: &str,
        platform: Platform,
        action: FileAction,
        path: &str,
    ) -> Result<CommandResult, BridgeError> {
        let path = path.trim();
        if path.is_empty() {
            return Err(BridgeError::InvalidPayload("path is required".to_string()));
        }
        if action == FileAction::Delete && path.trim_end_matches('/').is_empty() {
            return Err(BridgeError::InvalidPayload(
                "refusing to delete the filesystem root".to_string(),
            ));
        }
        self.execute(device_id, platform, &action.command(path)).await
    }

    /// # Errors
    ///
    /// [`BridgeError::UnsupportedPlatform`] on iOS; [`BridgeError::Device`]
    /// when the executor fails.
    pub async fn change_permission(
        &self,
        device_id: &str,
        platform: Platform,
        change: PermissionChange,
        package: &str,
        permission: &str,
    ) -> Result<CommandResult, BridgeError> {
        let verb = match change {
            PermissionChange::Grant => "grant",
            PermissionChange::Revoke => "revoke",
        };
        require_android(platform, verb)?;
        let command = format!(
            "pm {verb} {} {}",
            shell_quote(package),
            shell_quote(permission)
        );
        self.execute(device_id, platform, &command).await
    }

    /// Raw `dumpsys package` output for `package`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::UnsupportedPlatform`] on iOS; [`BridgeError::Device`]
    /// when the executor fails.
    pub async fn list_permissions(
        &self,
        device_id: &str,
        platform: Platform,
        package: &str,
    ) -> Result<CommandResult, BridgeError> {
        require_android(platform, "list-permissions")?;
        let command = format!("dumpsys package {}", shell_quote(package));
        self.execute(device_id, platform, &command).await
    }

    /// Third-party package names installed on the device.
    ///
    /// # Errors
    ///
    /// [`BridgeError::UnsupportedPlatform`] on iOS; [`BridgeError::Device`]
    /// when the executor fails.
    pub async fn list_apps(&self, device_id: &str, platform: Platform) -> Result<Vec<String>, BridgeError> {
        require_android(platform, "list")?;
        let result = self.execute(device_id, platform, "pm list packages -3").await?;
        Ok(parse_package_list(&result.stdout))
    }

    /// Runs an app lifecycle action.  On exit code 0 the matching
    /// `app:*` event is emitted.
    ///
    /// # Errors
    ///
    /// [`BridgeError::UnsupportedPlatform`] on iOS; [`BridgeError::Device`]
    /// when the executor fails.
    pub async fn app(
        &self,
        device_id: &str,
        platform: Platform,
        action: AppAction,
        package: &str,
    ) -> Result<CommandResult, BridgeError> {
        let name = match action {
            AppAction::Uninstall => "uninstall",
            AppAction::Launch => "launch",
            AppAction::Stop => "stop",
        };
        require_android(platform, name)?;
        if package.trim().is_empty() {
            return Err(BridgeError::InvalidPayload("packageName is required".to_string()));
        }

        let result = self.execute(device_id, platform, &action.command(package)).await?;
        if result.exit_code == 0 {
            info!("app {name} of {package} on {device_id} succeeded");
            if self.events.send(action.event(device_id, package)).is_err() {
                debug!("app event dropped: no subscriber");
            }
        }
        Ok(result)
    }

    /// Devices currently reachable.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Device`] when discovery fails.
    pub async fn list_devices(&self) -> Result<Vec<DeviceInfo>, BridgeError> {
        Ok(self.discovery.list_devices().await?)
    }
}

fn require_android(platform: Platform, operation: &str) -> Result<(), BridgeError> {
    match platform {
        Platform::Android => Ok(()),
        Platform::Ios => Err(BridgeError::UnsupportedPlatform {
            operation: operation.to_string(),
            platform: platform.to_string(),
        }),
    }
}

/// Reduces `pm list packages` output (`package:com.example`) to names.
fn parse_package_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|l| l.trim().strip_prefix("package:"))
        .map(str::to_string)
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock_executor::MockDeviceExecutor;
    use devbridge_core::executor::MockDeviceDiscovery;
    use devbridge_core::{CommandOutput, DeviceExecutor};

    fn ops_with(mock: &Arc<MockDeviceExecutor>) -> (DeviceOps, mpsc::UnboundedReceiver<AppEvent>) {
        let mut discovery = MockDeviceDiscovery::new();
        discovery.expect_list_devices().returning(|| {
            Ok(vec![DeviceInfo {
                id: "emulator-5554".to_string(),
                platform: Platform::Android,
                name: "sdk_gphone64".to_string(),
                state: "device".to_string(),
            }])
        });
        DeviceOps::new(
            Executors::uniform(Arc::clone(mock) as Arc<dyn DeviceExecutor>),
            Arc::new(discovery),
        )
    }

    #[test]
    fn test_parse_package_list() {
        let out = "package:com.example.app\npackage:org.test\n\n";
        assert_eq!(parse_package_list(out), vec!["com.example.app", "org.test"]);
    }

    #[tokio::test]
    async fn test_file_list_runs_ls_on_quoted_path() {
        // Arrange
        let mock = Arc::new(MockDeviceExecutor::new());
        mock.respond("ls -la '/sdcard'", CommandOutput::ok("total 0\n"));
        let (ops, _rx) = ops_with(&mock);

        // Act
        let result = ops
            .file("dev1", Platform::Android, FileAction::List, "/sdcard")
            .await
            .unwrap();

        // Assert
        assert_eq!(result.stdout, "total 0\n");
        assert_eq!(mock.commands()[0].1, "ls -la '/sdcard'");
    }

    #[tokio::test]
    async fn test_delete_root_is_refused() {
        let mock = Arc::new(MockDeviceExecutor::new());
        let (ops, _rx) = ops_with(&mock);

        let result = ops.file("dev1", Platform::Android, FileAction::Delete, "//").await;

        assert!(matches!(result, Err(BridgeError::InvalidPayload(_))));
        assert!(mock.commands().is_empty());
    }

    #[tokio::test]
    async fn test_grant_permission_builds_pm_command() {
        let mock = Arc::new(MockDeviceExecutor::new());
        let (ops, _rx) = ops_with(&mock);

        ops.change_permission(
            "dev1",
            Platform::Android,
            PermissionChange::Grant,
            "com.example",
            "android.permission.CAMERA",
        )
        .await
        .unwrap();

        assert_eq!(
            mock.commands()[0].1,
            "pm grant 'com.example' 'android.permission.CAMERA'"
        );
    }

    #[tokio::test]
    async fn test_permissions_unsupported_on_ios() {
        let mock = Arc::new(MockDeviceExecutor::new());
        let (ops, _rx) = ops_with(&mock);

        let result = ops.list_permissions("ios1", Platform::Ios, "com.example").await;

        assert!(matches!(result, Err(BridgeError::UnsupportedPlatform { .. })));
    }

    #[tokio::test]
    async fn test_successful_uninstall_emits_app_event() {
        // Arrange
        let mock = Arc::new(MockDeviceExecutor::new());
        mock.respond("pm uninstall 'com.example'", CommandOutput::ok("Success\n"));
        let (ops, mut rx) = ops_with(&mock);

        // Act
        ops.app("dev1", Platform::Android, AppAction::Uninstall, "com.example")
            .await
            .unwrap();

        // Assert
        assert_eq!(
            rx.try_recv().unwrap(),
            AppEvent::Uninstalled {
                device_id: "dev1".to_string(),
                package_name: "com.example".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_failed_app_action_emits_nothing() {
        let mock = Arc::new(MockDeviceExecutor::new());
        mock.respond(
            "am force-stop 'com.example'",
            CommandOutput {
                exit_code: 255,
                ..CommandOutput::default()
            },
        );
        let (ops, mut rx) = ops_with(&mock);

        let result = ops
            .app("dev1", Platform::Android, AppAction::Stop, "com.example")
            .await
            .unwrap();

        assert_eq!(result.exit_code, 255);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_executor_failure_maps_to_device_error() {
        let mock = Arc::new(MockDeviceExecutor::new());
        mock.fail("uptime", "no devices/emulators found");
        let (ops, _rx) = ops_with(&mock);

        let result = ops.execute("dev1", Platform::Android, "uptime").await;

        assert!(matches!(result, Err(BridgeError::Device(_))));
    }

    #[tokio::test]
    async fn test_list_devices_delegates_to_discovery() {
        let mock = Arc::new(MockDeviceExecutor::new());
        let (ops, _rx) = ops_with(&mock);

        let devices = tokio_test::assert_ok!(ops.list_devices().await);

        assert_eq!(devices[0].id, "emulator-5554");
    }
}
