//! The message router: the single ingress and egress point of the bridge.
//!
//! # Flow
//!
//! ```text
//! client text frame
//!    │ decode_envelope (failure → reply keyed "unknown")
//!    ▼
//! dispatch on envelope.type ──► manager / device ops call
//!    │                                   │
//!    ▼                                   ▼ typed events (mpsc)
//! correlated Reply to the sender     event pumps ──► Broadcast to every open client
//! ```
//!
//! Every manager failure is converted into `Reply { success: false }` here;
//! nothing a client sends can take a connection down.
//!
//! # Session ownership
//!
//! The router remembers which client created each session.  When that client
//! disconnects, its sessions are closed.  When a `discovery` listing no
//! longer contains a previously seen device, every session on that device is
//! closed in all three managers.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use devbridge_core::protocol::envelope::{CONNECTION_REQUEST_ID, UNKNOWN_REQUEST_ID};
use devbridge_core::{
    decode_envelope, BridgeError, Broadcast, CaptureOptions, DeviceDiscovery, DeviceId, Envelope,
    Executors, LogFilter, MessageType, Platform, Quality, Reply, SessionId,
};

use crate::application::connections::{ClientId, ConnectionRegistry};
use crate::application::device_ops::{AppAction, DeviceOps, FileAction, PermissionChange};
use crate::application::logs::LogCaptureManager;
use crate::application::screen::ScreenCaptureManager;
use crate::application::terminal::{InputOutcome, TerminalSessionManager};
use crate::domain::config::BridgeConfig;
use crate::domain::events::{AppEvent, CaptureEvent, LogEvent, TerminalEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionKind {
    Terminal,
    Screen,
    Log,
}

// ── Payload shapes ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionArgs {
    session_id: SessionId,
}

#[derive(Deserialize)]
struct PlatformArgs {
    #[serde(default)]
    platform: Option<Platform>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteArgs {
    session_id: SessionId,
    command: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InputArgs {
    session_id: SessionId,
    data: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangeDirectoryArgs {
    session_id: SessionId,
    path: String,
}

#[derive(Deserialize)]
struct ScreenStartArgs {
    #[serde(default)]
    options: CaptureOptions,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetQualityArgs {
    session_id: SessionId,
    quality: Quality,
}

#[derive(Deserialize)]
struct LogStartArgs {
    #[serde(default)]
    filter: Option<LogFilter>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilterArgs {
    session_id: SessionId,
    #[serde(default)]
    filter: Option<LogFilter>,
}

#[derive(Deserialize)]
struct CommandArgs {
    command: String,
}

#[derive(Deserialize)]
struct PathArgs {
    path: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackageArgs {
    package_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PermissionArgs {
    package_name: String,
    permission: String,
}

// ── Router ────────────────────────────────────────────────────────────────────

/// Routes envelopes to the managers and fans their events out.
///
/// Cheap to clone; clones share every manager and registry.
#[derive(Clone)]
pub struct Router {
    connections: ConnectionRegistry,
    terminal: TerminalSessionManager,
    screen: ScreenCaptureManager,
    logs: LogCaptureManager,
    ops: DeviceOps,
    owners: Arc<Mutex<HashMap<SessionId, (SessionKind, ClientId)>>>,
    known_devices: Arc<Mutex<HashMap<DeviceId, Platform>>>,
}

impl Router {
    /// Builds every manager and subscribes to their event streams.
    ///
    /// Must be called inside a Tokio runtime: the event pumps are spawned
    /// here and live as long as the managers do.
    pub fn new(
        executors: Executors,
        discovery: Arc<dyn DeviceDiscovery>,
        config: &BridgeConfig,
    ) -> Self {
        let connections = ConnectionRegistry::new();

        let (terminal, terminal_rx) =
            TerminalSessionManager::new(executors.clone(), config.terminal.grace_delay);
        let (screen, screen_rx) = ScreenCaptureManager::new(executors.clone());
        let (logs, logs_rx) = LogCaptureManager::new(executors.clone(), config.logs.clone());
        let (ops, app_rx) = DeviceOps::new(executors, discovery);

        spawn_pump(terminal_rx, connections.clone(), terminal_broadcast);
        spawn_pump(screen_rx, connections.clone(), capture_broadcast);
        spawn_pump(logs_rx, connections.clone(), log_broadcast);
        spawn_pump(app_rx, connections.clone(), app_broadcast);

        let known_devices = config
            .devices
            .iter()
            .map(|d| (d.id.clone(), d.platform))
            .collect();

        Self {
            connections,
            terminal,
            screen,
            logs,
            ops,
            owners: Arc::new(Mutex::new(HashMap::new())),
            known_devices: Arc::new(Mutex::new(known_devices)),
        }
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    pub fn terminal(&self) -> &TerminalSessionManager {
        &self.terminal
    }

    pub fn screen(&self) -> &ScreenCaptureManager {
        &self.screen
    }

    pub fn logs(&self) -> &LogCaptureManager {
        &self.logs
    }

    // ── Connection lifecycle ──────────────────────────────────────────────────

    /// Registers a client and immediately sends it the connection reply.
    pub async fn handle_connection(&self, sender: mpsc::UnboundedSender<String>) -> ClientId {
        let client_id = self.connections.register(sender).await;
        let reply = Reply::ok(
            CONNECTION_REQUEST_ID,
            json!({ "clientId": client_id, "status": "connected" }),
        );
        self.connections.send_to(client_id, &reply).await;
        info!("client {client_id} connected");
        client_id
    }

    /// Unregisters a client and closes every session it created.
    pub async fn handle_disconnect(&self, client_id: ClientId) {
        self.connections.unregister(client_id).await;

        let owned: Vec<(SessionId, SessionKind)> = {
            let mut owners = self.owners.lock().await;
            let ids: Vec<SessionId> = owners
                .iter()
                .filter(|(_, (_, owner))| *owner == client_id)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| owners.remove(&id).map(|(kind, _)| (id, kind)))
                .collect()
        };

        for (session_id, kind) in &owned {
            if let Err(e) = self.close_session_of(*kind, session_id).await {
                debug!("client {client_id} disconnect: {session_id} already gone: {e}");
            }
        }
        info!(
            "client {client_id} disconnected ({} sessions closed)",
            owned.len()
        );
    }

    /// Stops every capture and log session and closes every terminal.
    pub async fn shutdown(&self) {
        self.screen.cleanup().await;
        let logs = self.logs.stop_all().await;
        let mut terminals = 0;
        for session in self.terminal.get_active_sessions().await {
            if self.terminal.close_session(&session.info.session_id).await.is_ok() {
                terminals += 1;
            }
        }
        self.owners.lock().await.clear();
        info!("router shut down ({logs} log sessions, {terminals} terminals closed)");
    }

    // ── Inbound ───────────────────────────────────────────────────────────────

    /// Decodes one text frame from `client_id`, dispatches it and sends the
    /// reply back to the same client.
    pub async fn handle_text(&self, client_id: ClientId, text: &str) {
        let reply = match decode_envelope(text) {
            Ok(envelope) => self.dispatch(client_id, &envelope).await,
            Err(e) => {
                warn!("client {client_id}: {e}");
                Reply::err(UNKNOWN_REQUEST_ID, e)
            }
        };
        if !self.connections.send_to(client_id, &reply).await {
            debug!("client {client_id}: reply {} not delivered", reply.request_id);
        }
    }

    /// Runs one envelope and produces its correlated reply.  Never fails.
    pub async fn dispatch(&self, client_id: ClientId, envelope: &Envelope) -> Reply {
        match self.route(client_id, envelope).await {
            Ok(data) => Reply::ok(envelope.request_id.clone(), data),
            Err(e) => {
                debug!(
                    "request {} ({}) failed: {e}",
                    envelope.request_id, envelope.kind
                );
                Reply::err(envelope.request_id.clone(), e)
            }
        }
    }

    async fn route(&self, client_id: ClientId, env: &Envelope) -> Result<Value, BridgeError> {
        match env.message_type()? {
            MessageType::Discovery => self.handle_discovery(env).await,
            MessageType::Terminal => self.handle_terminal(client_id, env).await,
            MessageType::Command => self.handle_command(env).await,
            MessageType::File => self.handle_file(env).await,
            MessageType::Permission => self.handle_permission(env).await,
            MessageType::Screen => self.handle_screen(client_id, env).await,
            MessageType::Log => self.handle_log(client_id, env).await,
            MessageType::AppInstallation => self.handle_app(env).await,
        }
    }

    // ── Terminal ──────────────────────────────────────────────────────────────

    async fn handle_terminal(&self, client_id: ClientId, env: &Envelope) -> Result<Value, BridgeError> {
        match env.action()? {
            "create" => {
                let device_id = env.require_device_id()?;
                let platform = self.resolve_platform(env, device_id).await?;
                let session = self.terminal.create_session(device_id, platform).await;
                self.own(&session.info.session_id, SessionKind::Terminal, client_id)
                    .await;
                Ok(json!({ "session": session }))
            }
            "execute" => {
                let args: ExecuteArgs = env.args()?;
                let result = self
                    .terminal
                    .execute_command(&args.session_id, &args.command)
                    .await?;
                Ok(json!({ "result": result }))
            }
            "input" => {
                let args: InputArgs = env.args()?;
                Ok(match self.terminal.input(&args.session_id, &args.data).await? {
                    InputOutcome::Interrupted(interrupted) => json!({ "interrupted": interrupted }),
                    InputOutcome::Executed(result) => json!({ "result": result }),
                    InputOutcome::Ignored => Value::Null,
                })
            }
            "interrupt" => {
                let args: SessionArgs = env.args()?;
                let interrupted = self.terminal.interrupt(&args.session_id).await?;
                Ok(json!({ "interrupted": interrupted }))
            }
            "close" => {
                let args: SessionArgs = env.args()?;
                self.terminal.close_session(&args.session_id).await?;
                self.disown(&args.session_id).await;
                Ok(json!({ "closed": true }))
            }
            "history" => {
                let args: SessionArgs = env.args()?;
                let history = self.terminal.get_history(&args.session_id).await?;
                Ok(json!({ "history": history }))
            }
            "clear-history" => {
                let args: SessionArgs = env.args()?;
                self.terminal.clear_history(&args.session_id).await?;
                Ok(json!({ "cleared": true }))
            }
            "change-directory" => {
                let args: ChangeDirectoryArgs = env.args()?;
                let wd = self
                    .terminal
                    .change_directory(&args.session_id, &args.path)
                    .await?;
                Ok(json!({ "workingDirectory": wd }))
            }
            "list-sessions" => Ok(json!({ "sessions": self.terminal.get_active_sessions().await })),
            other => Err(BridgeError::unknown_action("terminal", other)),
        }
    }

    // ── Screen ────────────────────────────────────────────────────────────────

    async fn handle_screen(&self, client_id: ClientId, env: &Envelope) -> Result<Value, BridgeError> {
        match env.action()? {
            "start" => {
                let device_id = env.require_device_id()?;
                let platform = self.resolve_platform(env, device_id).await?;
                let args: ScreenStartArgs = env.args()?;
                let session = self
                    .screen
                    .start_capture(device_id, platform, args.options)
                    .await?;
                self.own(&session.info.session_id, SessionKind::Screen, client_id)
                    .await;
                Ok(json!({ "session": session }))
            }
            "stop" => {
                let args: SessionArgs = env.args()?;
                self.screen.stop_capture(&args.session_id).await?;
                self.disown(&args.session_id).await;
                Ok(json!({ "stopped": true }))
            }
            "set-quality" => {
                let args: SetQualityArgs = env.args()?;
                let session = self.screen.set_quality(&args.session_id, args.quality).await?;
                Ok(json!({ "session": session }))
            }
            "get-metrics" => {
                let args: SessionArgs = env.args()?;
                Ok(json!({ "metrics": self.screen.get_metrics(&args.session_id).await? }))
            }
            "get-frame-rate" => {
                let args: SessionArgs = env.args()?;
                Ok(json!({ "frameRate": self.screen.get_frame_rate(&args.session_id).await? }))
            }
            "get-latency" => {
                let args: SessionArgs = env.args()?;
                Ok(json!({ "latency": self.screen.get_latency(&args.session_id).await? }))
            }
            "list-sessions" => Ok(json!({ "sessions": self.screen.get_active_sessions().await })),
            other => Err(BridgeError::unknown_action("screen", other)),
        }
    }

    // ── Log ───────────────────────────────────────────────────────────────────

    async fn handle_log(&self, client_id: ClientId, env: &Envelope) -> Result<Value, BridgeError> {
        match env.action()? {
            "start" => {
                let device_id = env.require_device_id()?;
                let platform = self.resolve_platform(env, device_id).await?;
                let args: LogStartArgs = env.args()?;
                let summary = self
                    .logs
                    .start_capture(device_id, platform, args.filter)
                    .await;
                self.own(&summary.info.session_id, SessionKind::Log, client_id)
                    .await;
                Ok(json!({ "sessionId": summary.info.session_id, "session": summary }))
            }
            "stop" => {
                let args: SessionArgs = env.args()?;
                self.logs.stop_capture(&args.session_id).await?;
                self.disown(&args.session_id).await;
                Ok(json!({ "stopped": true }))
            }
            "get-logs" => {
                let args: FilterArgs = env.args()?;
                let logs = self
                    .logs
                    .get_logs(&args.session_id, args.filter.as_ref())
                    .await?;
                Ok(json!({ "logs": logs }))
            }
            "clear" => {
                let args: SessionArgs = env.args()?;
                self.logs.clear_logs(&args.session_id).await?;
                Ok(json!({ "cleared": true }))
            }
            "set-filter" => {
                let args: FilterArgs = env.args()?;
                self.logs
                    .set_filter(&args.session_id, args.filter.clone())
                    .await?;
                Ok(json!({ "filter": args.filter }))
            }
            "list-sessions" => Ok(json!({ "sessions": self.logs.get_active_sessions().await })),
            other => Err(BridgeError::unknown_action("log", other)),
        }
    }

    // ── Device operations ─────────────────────────────────────────────────────

    async fn handle_discovery(&self, env: &Envelope) -> Result<Value, BridgeError> {
        match env.action()? {
            "list" => {
                let devices = self.ops.list_devices().await?;
                self.reconcile_devices(devices.iter().map(|d| (d.id.clone(), d.platform)))
                    .await;
                Ok(json!({ "devices": devices }))
            }
            other => Err(BridgeError::unknown_action("discovery", other)),
        }
    }

    async fn handle_command(&self, env: &Envelope) -> Result<Value, BridgeError> {
        match env.action()? {
            "execute" => {
                let device_id = env.require_device_id()?;
                let platform = self.resolve_platform(env, device_id).await?;
                let args: CommandArgs = env.args()?;
                let result = self.ops.execute(device_id, platform, &args.command).await?;
                Ok(json!({ "result": result }))
            }
            other => Err(BridgeError::unknown_action("command", other)),
        }
    }

    async fn handle_file(&self, env: &Envelope) -> Result<Value, BridgeError> {
        let action = env.action()?;
        let file_action =
            FileAction::parse(action).ok_or_else(|| BridgeError::unknown_action("file", action))?;
        let device_id = env.require_device_id()?;
        let platform = self.resolve_platform(env, device_id).await?;
        let args: PathArgs = env.args()?;
        let result = self
            .ops
            .file(device_id, platform, file_action, &args.path)
            .await?;
        Ok(json!({ "result": result }))
    }

    async fn handle_permission(&self, env: &Envelope) -> Result<Value, BridgeError> {
        let action = env.action()?;
        let change = match action {
            "grant" => Some(PermissionChange::Grant),
            "revoke" => Some(PermissionChange::Revoke),
            "list" => None,
            other => return Err(BridgeError::unknown_action("permission", other)),
        };
        let device_id = env.require_device_id()?;
        let platform = self.resolve_platform(env, device_id).await?;

        let result = match change {
            Some(change) => {
                let args: PermissionArgs = env.args()?;
                self.ops
                    .change_permission(device_id, platform, change, &args.package_name, &args.permission)
                    .await?
            }
            None => {
                let args: PackageArgs = env.args()?;
                self.ops
                    .list_permissions(device_id, platform, &args.package_name)
                    .await?
            }
        };
        Ok(json!({ "result": result }))
    }

    async fn handle_app(&self, env: &Envelope) -> Result<Value, BridgeError> {
        let action = env.action()?;
        let app_action = match action {
            "list" => None,
            "uninstall" => Some(AppAction::Uninstall),
            "launch" => Some(AppAction::Launch),
            "stop" => Some(AppAction::Stop),
            other => return Err(BridgeError::unknown_action("app-installation", other)),
        };
        let device_id = env.require_device_id()?;
        let platform = self.resolve_platform(env, device_id).await?;

        match app_action {
            None => Ok(json!({ "packages": self.ops.list_apps(device_id, platform).await? })),
            Some(app_action) => {
                let args: PackageArgs = env.args()?;
                let result = self
                    .ops
                    .app(device_id, platform, app_action, &args.package_name)
                    .await?;
                Ok(json!({ "result": result }))
            }
        }
    }

    // ── Bookkeeping ───────────────────────────────────────────────────────────

    /// `payload.platform` when given, otherwise the platform discovery last
    /// reported for the device, otherwise android.
    async fn resolve_platform(&self, env: &Envelope, device_id: &str) -> Result<Platform, BridgeError> {
        let args: PlatformArgs = env.args()?;
        if let Some(platform) = args.platform {
            return Ok(platform);
        }
        Ok(self
            .known_devices
            .lock()
            .await
            .get(device_id)
            .copied()
            .unwrap_or(Platform::Android))
    }

    /// Records `client_id` as the owner of a session it just created.
    ///
    /// Requests run concurrently with the disconnect sweep, so the client
    /// may already be gone by the time its create call returns.  In that
    /// case nobody will ever close the session, and it is closed here.
    /// `handle_disconnect` unregisters before it takes the `owners` lock,
    /// so checking the registry under that lock leaves no gap.
    async fn own(&self, session_id: &str, kind: SessionKind, client_id: ClientId) {
        {
            let mut owners = self.owners.lock().await;
            if self.connections.contains(client_id).await {
                owners.insert(session_id.to_string(), (kind, client_id));
                return;
            }
        }

        info!("client {client_id} left before {session_id} was created; closing it");
        if let Err(e) = self.close_session_of(kind, session_id).await {
            debug!("orphaned session {session_id} already gone: {e}");
        }
    }

    async fn close_session_of(&self, kind: SessionKind, session_id: &str) -> Result<(), BridgeError> {
        match kind {
            SessionKind::Terminal => self.terminal.close_session(session_id).await,
            SessionKind::Screen => self.screen.stop_capture(session_id).await,
            SessionKind::Log => self.logs.stop_capture(session_id).await,
        }
    }

    async fn disown(&self, session_id: &str) {
        self.owners.lock().await.remove(session_id);
    }

    /// Replaces the known-device set and closes sessions on devices that
    /// are no longer listed.
    async fn reconcile_devices(&self, listed: impl Iterator<Item = (DeviceId, Platform)>) {
        let listed: HashMap<DeviceId, Platform> = listed.collect();
        let vanished: Vec<DeviceId> = {
            let mut known = self.known_devices.lock().await;
            let vanished = known
                .keys()
                .filter(|id| !listed.contains_key(*id))
                .cloned()
                .collect();
            *known = listed;
            vanished
        };

        for device_id in &vanished {
            let mut closed = self.terminal.close_device_sessions(device_id).await;
            closed.extend(self.screen.stop_device(device_id).await);
            closed.extend(self.logs.stop_device(device_id).await);

            let mut owners = self.owners.lock().await;
            for id in &closed {
                owners.remove(id);
            }
            info!(
                "device {device_id} disappeared; {} sessions closed",
                closed.len()
            );
        }
    }
}

// ── Event pumps ───────────────────────────────────────────────────────────────

fn spawn_pump<E, F>(mut rx: mpsc::UnboundedReceiver<E>, connections: ConnectionRegistry, convert: F)
where
    E: Send + 'static,
    F: Fn(E) -> Broadcast + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let broadcast = convert(event);
            connections.broadcast(&broadcast).await;
        }
    });
}

fn terminal_broadcast(event: TerminalEvent) -> Broadcast {
    let kind = event.broadcast_type();
    let data = match event {
        TerminalEvent::SessionCreated(session) => json!(session),
        TerminalEvent::SessionClosed { session_id }
        | TerminalEvent::CommandInterrupted { session_id } => json!({ "sessionId": session_id }),
        TerminalEvent::CommandStart {
            session_id,
            command,
        } => json!({ "sessionId": session_id, "command": command }),
        TerminalEvent::Output {
            session_id,
            stream,
            data,
        } => json!({ "sessionId": session_id, "stream": stream, "data": data }),
        TerminalEvent::CommandComplete {
            session_id,
            command,
            result,
        } => json!({ "sessionId": session_id, "command": command, "result": result }),
        TerminalEvent::CommandError {
            session_id,
            command,
            result,
        } => json!({
            "sessionId": session_id,
            "command": command,
            "error": result.stderr,
            "result": result,
        }),
    };
    Broadcast::new(kind, data)
}

fn capture_broadcast(event: CaptureEvent) -> Broadcast {
    let kind = event.broadcast_type();
    let data = match event {
        CaptureEvent::CaptureStarted(session) => json!(session),
        CaptureEvent::CaptureStopped {
            session_id,
            device_id,
        } => json!({ "sessionId": session_id, "deviceId": device_id }),
        CaptureEvent::Frame {
            session_id,
            device_id,
            frame_number,
            timestamp,
            data,
        } => json!({
            "sessionId": session_id,
            "deviceId": device_id,
            "frameNumber": frame_number,
            "timestamp": timestamp,
            "data": BASE64.encode(&data),
        }),
        CaptureEvent::MetricsUpdate {
            session_id,
            metrics,
        } => json!({ "sessionId": session_id, "metrics": metrics }),
        CaptureEvent::QualityChanged {
            session_id,
            quality,
            frame_rate,
        } => json!({ "sessionId": session_id, "quality": quality, "frameRate": frame_rate }),
    };
    Broadcast::new(kind, data)
}

fn log_broadcast(event: LogEvent) -> Broadcast {
    let kind = event.broadcast_type();
    let data = match event {
        LogEvent::CaptureStarted(summary) => json!(summary),
        LogEvent::CaptureStopped {
            session_id,
            device_id,
        } => json!({ "sessionId": session_id, "deviceId": device_id }),
        LogEvent::Entry { session_id, entry } => json!({ "sessionId": session_id, "entry": entry }),
        LogEvent::LogsCleared { session_id } => json!({ "sessionId": session_id }),
        LogEvent::FilterUpdated { session_id, filter } => {
            json!({ "sessionId": session_id, "filter": filter })
        }
    };
    Broadcast::new(kind, data)
}

fn app_broadcast(event: AppEvent) -> Broadcast {
    let kind = event.broadcast_type();
    let (AppEvent::Uninstalled {
        device_id,
        package_name,
    }
    | AppEvent::Launched {
        device_id,
        package_name,
    }
    | AppEvent::Stopped {
        device_id,
        package_name,
    }) = event;
    Broadcast::new(
        kind,
        json!({ "deviceId": device_id, "packageName": package_name }),
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────
