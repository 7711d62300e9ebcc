//! [`DeviceDiscovery`] backed by host tools plus a static device list.
//!
//! `list_devices` merges two sources:
//!
//! 1. Devices declared in the configuration (`[[devices]]`), always reported.
//! 2. Devices listed by the platform tools (`adb devices -l`,
//!    `idevice_id -l`).  A tool that is missing or fails is skipped with a
//!    debug log, so a host with only adb installed still lists Android
//!    devices.
//!
//! A device id reported by both sources appears once, with the configured
//! entry winning.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use devbridge_core::{DeviceDiscovery, DeviceInfo, ExecutorError, Platform};

use crate::domain::config::BridgeConfig;
use crate::infrastructure::shell_executor::{run_tool, CommandTemplate};

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Lists devices through the configured host tools.
#[derive(Debug, Clone)]
pub struct ToolDiscovery {
    tools: Vec<(Platform, CommandTemplate)>,
    configured: Vec<DeviceInfo>,
}

impl ToolDiscovery {
    /// # Errors
    ///
    /// [`ExecutorError::Failed`] if a configured list command is empty.
    pub fn from_config(config: &BridgeConfig) -> Result<Self, ExecutorError> {
        let mut tools = Vec::new();
        for (platform, template) in [
            (Platform::Android, &config.android.list_devices),
            (Platform::Ios, &config.ios.list_devices),
        ] {
            if let Some(template) = template {
                tools.push((platform, CommandTemplate::parse(template)?));
            }
        }
        Ok(Self {
            tools,
            configured: config.devices.clone(),
        })
    }

    async fn list_with_tool(&self, platform: Platform, template: &CommandTemplate) -> Vec<DeviceInfo> {
        let (program, args) = template.render("", "");
        let output = match run_tool(program, args, DISCOVERY_TIMEOUT).await {
            Ok(output) if output.status.success() => output,
            Ok(output) => {
                debug!(
                    "{platform} discovery exited with {:?}; skipping",
                    output.status.code()
                );
                return Vec::new();
            }
            Err(e) => {
                debug!("{platform} discovery unavailable: {e}");
                return Vec::new();
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        match platform {
            Platform::Android => parse_adb_devices(&stdout),
            Platform::Ios => parse_idevice_ids(&stdout),
        }
    }
}

#[async_trait]
impl DeviceDiscovery for ToolDiscovery {
    async fn list_devices(&self) -> Result<Vec<DeviceInfo>, ExecutorError> {
        let mut devices = self.configured.clone();
        let mut seen: HashSet<String> = devices.iter().map(|d| d.id.clone()).collect();

        for (platform, template) in &self.tools {
            for device in self.list_with_tool(*platform, template).await {
                if seen.insert(device.id.clone()) {
                    devices.push(device);
                }
            }
        }
        debug!("discovery found {} devices", devices.len());
        Ok(devices)
    }
}

// ── Parsers ───────────────────────────────────────────────────────────────────

/// Parses `adb devices -l` output.
///
/// ```text
/// List of devices attached
/// emulator-5554   device product:sdk_gphone64 model:sdk_gphone64_x86_64 transport_id:1
/// R58M123ABC      unauthorized usb:1-1 transport_id:2
/// ```
///
/// The `model:` field, when present, becomes the device name.
pub fn parse_adb_devices(output: &str) -> Vec<DeviceInfo> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("List of devices") && !line.starts_with('*'))
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let id = fields.next()?;
            let state = fields.next()?;
            let name = fields
                .find_map(|f| f.strip_prefix("model:"))
                .unwrap_or(id);
            Some(DeviceInfo {
                id: id.to_string(),
                platform: Platform::Android,
                name: name.to_string(),
                state: state.to_string(),
            })
        })
        .collect()
}

/// Parses `idevice_id -l` output: one UDID per line, all connected.
pub fn parse_idevice_ids(output: &str) -> Vec<DeviceInfo> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| line.split_whitespace().next())
        .map(|udid| DeviceInfo {
            id: udid.to_string(),
            platform: Platform::Ios,
            name: udid.to_string(),
            state: "device".to_string(),
        })
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::ToolTemplates;

    #[test]
    fn test_parse_adb_devices_with_models_and_states() {
        // Arrange
        let output = "List of devices attached\n\
                      emulator-5554          device product:sdk model:Pixel_7 device:emu64x transport_id:1\n\
                      R58M123ABC             unauthorized usb:1-1 transport_id:2\n\n";

        // Act
        let devices = parse_adb_devices(output);

        // Assert
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].id, "emulator-5554");
        assert_eq!(devices[0].name, "Pixel_7");
        assert_eq!(devices[0].state, "device");
        assert_eq!(devices[1].name, "R58M123ABC");
        assert_eq!(devices[1].state, "unauthorized");
    }

    #[test]
    fn test_parse_adb_devices_skips_daemon_banner() {
        let output = "* daemon not running; starting now at tcp:5037\n\
                      * daemon started successfully\n\
                      List of devices attached\n";
        assert!(parse_adb_devices(output).is_empty());
    }

    #[test]
    fn test_parse_idevice_ids() {
        let devices = parse_idevice_ids("00008030-001A\n\n00008101-00FF\n");
        assert_eq!(devices.len(), 2);
        assert!(devices.iter().all(|d| d.platform == Platform::Ios));
        assert_eq!(devices[1].id, "00008101-00FF");
    }

    fn config_with_tools(android: Option<&str>, ios: Option<&str>) -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config.android = ToolTemplates {
            list_devices: android.map(str::to_string),
            ..ToolTemplates::android_defaults()
        };
        config.ios = ToolTemplates {
            list_devices: ios.map(str::to_string),
            ..ToolTemplates::ios_defaults()
        };
        config
    }

    #[tokio::test]
    async fn test_configured_devices_are_listed_without_tools() {
        // Arrange
        let mut config = config_with_tools(None, None);
        config.devices.push(DeviceInfo {
            id: "lab-1".to_string(),
            platform: Platform::Android,
            name: "Lab phone".to_string(),
            state: "device".to_string(),
        });
        let discovery = ToolDiscovery::from_config(&config).unwrap();

        // Act
        let devices = discovery.list_devices().await.unwrap();

        // Assert
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "Lab phone");
    }

    #[tokio::test]
    async fn test_missing_tool_is_skipped() {
        let config = config_with_tools(Some("devbridge-no-such-adb-xyz devices -l"), None);
        let discovery = ToolDiscovery::from_config(&config).unwrap();

        let devices = discovery.list_devices().await.unwrap();

        assert!(devices.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tool_output_is_merged_and_deduplicated() {
        // Arrange: `printf` stands in for adb; "lab-1" is also configured
        let fake_adb = r"printf List\nlab-1\tdevice\nemu-2\tdevice\n";
        let mut config = config_with_tools(Some(fake_adb), None);
        config.devices.push(DeviceInfo {
            id: "lab-1".to_string(),
            platform: Platform::Android,
            name: "Lab phone".to_string(),
            state: "device".to_string(),
        });
        let discovery = ToolDiscovery::from_config(&config).unwrap();

        // Act
        let devices = discovery.list_devices().await.unwrap();

        // Assert
        let ids: Vec<&str> = devices.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["lab-1", "emu-2"]);
        assert_eq!(devices[0].name, "Lab phone");
    }
}
