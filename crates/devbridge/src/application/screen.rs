//! Screen capture manager.
//!
//! Each capture session owns two [`Ticker`]s:
//!
//! - the **frame loop**, firing every `1000 / frameRate` ms, which grabs one
//!   frame through the platform executor and emits it;
//! - the **metrics loop**, firing every second, which recomputes the observed
//!   frame rate and bandwidth and emits `metrics:update`.
//!
//! Both tickers live inside the session's registry entry, so removing the
//! entry stops them.  A quality change replaces the frame loop and bumps the
//! entry's `generation`; a tick that started under an older generation
//! notices after its capture returns and discards the frame.
//!
//! At most one session may exist per device.  A second `start_capture` for
//! the same device fails; it never queues or replaces.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use devbridge_core::{
    BridgeError, CaptureMetrics, CaptureOptions, CaptureSession, DeviceId, Executors, Platform,
    Quality, SessionId,
};

use crate::application::ticker::{TickFlow, Ticker};
use crate::domain::events::CaptureEvent;

/// Period of the metrics loop.
pub const METRICS_INTERVAL: Duration = Duration::from_secs(1);

struct CaptureEntry {
    session: CaptureSession,
    frame_loop: Option<Ticker>,
    metrics_loop: Option<Ticker>,
    /// Incremented whenever the frame loop is replaced.
    generation: u64,
    /// Monotonic per-session frame number carried by `frame` events.
    frame_counter: u64,
    /// Frames and bytes captured since `window_start`.
    frames_captured: u64,
    bytes_captured: u64,
    window_start: Instant,
}

#[derive(Default)]
struct ScreenState {
    sessions: HashMap<SessionId, CaptureEntry>,
    by_device: HashMap<DeviceId, SessionId>,
}

/// What a running loop needs.  Holds the state weakly so a loop never keeps
/// its own registry alive.
#[derive(Clone)]
struct LoopContext {
    state: Weak<Mutex<ScreenState>>,
    executors: Executors,
    events: mpsc::UnboundedSender<CaptureEvent>,
}

/// Manages screen capture sessions.  Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ScreenCaptureManager {
    state: Arc<Mutex<ScreenState>>,
    executors: Executors,
    events: mpsc::UnboundedSender<CaptureEvent>,
}

impl ScreenCaptureManager {
    pub fn new(executors: Executors) -> (Self, mpsc::UnboundedReceiver<CaptureEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let manager = Self {
            state: Arc::new(Mutex::new(ScreenState::default())),
            executors,
            events,
        };
        (manager, rx)
    }

    fn loop_context(&self) -> LoopContext {
        LoopContext {
            state: Arc::downgrade(&self.state),
            executors: self.executors.clone(),
            events: self.events.clone(),
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Starts capturing `device_id` and emits `capture:started`.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::CaptureAlreadyActive`] if the device already has a
    ///   capture session.
    /// - [`BridgeError::InvalidPayload`] if `options.frame_rate` is outside
    ///   `1..=120`.
    pub async fn start_capture(
        &self,
        device_id: &str,
        platform: Platform,
        options: CaptureOptions,
    ) -> Result<CaptureSession, BridgeError> {
        if !options.is_valid() {
            return Err(BridgeError::InvalidPayload(format!(
                "frameRate must be between 1 and {}, got {}",
                devbridge_core::domain::capture::MAX_FRAME_RATE,
                options.frame_rate
            )));
        }

        let mut state = self.state.lock().await;
        if state.by_device.contains_key(device_id) {
            return Err(BridgeError::CaptureAlreadyActive(device_id.to_string()));
        }

        let session = CaptureSession::new(device_id, platform, options);
        let session_id = session.info.session_id.clone();
        let ctx = self.loop_context();

        let entry = CaptureEntry {
            session: session.clone(),
            frame_loop: Some(spawn_frame_loop(&ctx, &session_id, 0, options.frame_interval())),
            metrics_loop: Some(spawn_metrics_loop(&ctx, &session_id)),
            generation: 0,
            frame_counter: 0,
            frames_captured: 0,
            bytes_captured: 0,
            window_start: Instant::now(),
        };
        state.sessions.insert(session_id.clone(), entry);
        state
            .by_device
            .insert(device_id.to_string(), session_id.clone());

        info!(
            "screen capture {session_id} started on {platform} device {device_id} at {} fps",
            options.frame_rate
        );
        send(&self.events, CaptureEvent::CaptureStarted(session.clone()));
        Ok(session)
    }

    /// Stops both loops, removes the session and emits `capture:stopped`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::SessionNotFound`] for an unknown id.
    pub async fn stop_capture(&self, session_id: &str) -> Result<(), BridgeError> {
        let mut state = self.state.lock().await;
        let entry = state
            .sessions
            .remove(session_id)
            .ok_or_else(|| BridgeError::SessionNotFound(session_id.to_string()))?;
        let device_id = entry.session.info.device_id.clone();
        state.by_device.remove(&device_id);
        drop(entry);

        info!("screen capture {session_id} stopped");
        send(
            &self.events,
            CaptureEvent::CaptureStopped {
                session_id: session_id.to_string(),
                device_id,
            },
        );
        Ok(())
    }

    /// Stops the capture on `device_id`, if any, and returns its session id.
    pub async fn stop_device(&self, device_id: &str) -> Option<SessionId> {
        let session_id = self.state.lock().await.by_device.get(device_id).cloned()?;
        self.stop_capture(&session_id).await.ok()?;
        Some(session_id)
    }

    /// Stops every session and clears all state.  Used at shutdown.
    ///
    /// Each session is stopped independently, so one misbehaving entry never
    /// prevents the rest from being stopped.
    pub async fn cleanup(&self) {
        let ids: Vec<SessionId> = self.state.lock().await.sessions.keys().cloned().collect();
        for id in &ids {
            if let Err(e) = self.stop_capture(id).await {
                debug!("cleanup: screen capture {id} already gone: {e}");
            }
        }

        let mut state = self.state.lock().await;
        state.sessions.clear();
        state.by_device.clear();
        info!("screen capture manager cleaned up ({} sessions)", ids.len());
    }

    // ── Quality ───────────────────────────────────────────────────────────────

    /// Switches quality tier, remaps the frame rate (low 15, medium 30,
    /// high 60) and restarts the frame loop at the new interval.  Emits one
    /// `quality:changed`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::SessionNotFound`] for an unknown id.
    pub async fn set_quality(
        &self,
        session_id: &str,
        quality: Quality,
    ) -> Result<CaptureSession, BridgeError> {
        let ctx = self.loop_context();
        let mut state = self.state.lock().await;
        let entry = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| BridgeError::SessionNotFound(session_id.to_string()))?;

        let frame_rate = quality.frame_rate();
        entry.session.options.quality = quality;
        entry.session.options.frame_rate = frame_rate;

        // Stop the old loop before the new one exists.
        entry.frame_loop = None;
        entry.generation += 1;
        entry.frames_captured = 0;
        entry.bytes_captured = 0;
        entry.window_start = Instant::now();
        entry.frame_loop = Some(spawn_frame_loop(
            &ctx,
            session_id,
            entry.generation,
            entry.session.options.frame_interval(),
        ));

        info!("screen capture {session_id}: quality {quality:?} ({frame_rate} fps)");
        send(
            &self.events,
            CaptureEvent::QualityChanged {
                session_id: session_id.to_string(),
                quality,
                frame_rate,
            },
        );
        Ok(entry.session.clone())
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    pub async fn get_session(&self, session_id: &str) -> Option<CaptureSession> {
        let state = self.state.lock().await;
        state.sessions.get(session_id).map(|e| e.session.clone())
    }

    /// # Errors
    ///
    /// [`BridgeError::SessionNotFound`] for an unknown id.
    pub async fn get_metrics(&self, session_id: &str) -> Result<CaptureMetrics, BridgeError> {
        let state = self.state.lock().await;
        state
            .sessions
            .get(session_id)
            .map(|e| e.session.metrics)
            .ok_or_else(|| BridgeError::SessionNotFound(session_id.to_string()))
    }

    /// The observed frame rate from the last metrics update.
    ///
    /// # Errors
    ///
    /// [`BridgeError::SessionNotFound`] for an unknown id.
    pub async fn get_frame_rate(&self, session_id: &str) -> Result<f64, BridgeError> {
        self.get_metrics(session_id).await.map(|m| m.frame_rate)
    }

    /// Duration of the most recent capture call, in milliseconds.
    ///
    /// # Errors
    ///
    /// [`BridgeError::SessionNotFound`] for an unknown id.
    pub async fn get_latency(&self, session_id: &str) -> Result<f64, BridgeError> {
        self.get_metrics(session_id).await.map(|m| m.latency_ms)
    }

    /// The period the frame loop is currently ticking at.
    ///
    /// # Errors
    ///
    /// [`BridgeError::SessionNotFound`] for an unknown id.
    pub async fn frame_interval(&self, session_id: &str) -> Result<Duration, BridgeError> {
        let state = self.state.lock().await;
        let entry = state
            .sessions
            .get(session_id)
            .ok_or_else(|| BridgeError::SessionNotFound(session_id.to_string()))?;
        Ok(entry
            .frame_loop
            .as_ref()
            .map(Ticker::period)
            .unwrap_or_else(|| entry.session.options.frame_interval()))
    }

    pub async fn get_active_sessions(&self) -> Vec<CaptureSession> {
        let state = self.state.lock().await;
        state.sessions.values().map(|e| e.session.clone()).collect()
    }
}

// ── Loops ─────────────────────────────────────────────────────────────────────

fn spawn_frame_loop(
    ctx: &LoopContext,
    session_id: &str,
    generation: u64,
    interval: Duration,
) -> Ticker {
    let ctx = ctx.clone();
    let session_id = session_id.to_string();
    Ticker::start(interval, move || {
        let ctx = ctx.clone();
        let session_id = session_id.clone();
        async move { capture_tick(&ctx, &session_id, generation).await }
    })
}

fn spawn_metrics_loop(ctx: &LoopContext, session_id: &str) -> Ticker {
    let ctx = ctx.clone();
    let session_id = session_id.to_string();
    Ticker::start(METRICS_INTERVAL, move || {
        let ctx = ctx.clone();
        let session_id = session_id.clone();
        async move { metrics_tick(&ctx, &session_id).await }
    })
}

/// One frame-loop tick: capture, measure latency, emit or count a drop.
async fn capture_tick(ctx: &LoopContext, session_id: &str, generation: u64) -> TickFlow {
    let Some(state) = ctx.state.upgrade() else {
        return TickFlow::Stop;
    };

    let (device_id, platform) = {
        let guard = state.lock().await;
        match guard.sessions.get(session_id) {
            Some(entry) if entry.generation == generation => (
                entry.session.info.device_id.clone(),
                entry.session.info.platform,
            ),
            _ => return TickFlow::Stop,
        }
    };

    let started = Instant::now();
    let captured = ctx
        .executors
        .for_platform(platform)
        .capture_screen(&device_id)
        .await;
    let latency = started.elapsed();

    let mut guard = state.lock().await;
    let Some(entry) = guard.sessions.get_mut(session_id) else {
        return TickFlow::Stop;
    };
    if entry.generation != generation {
        trace!("screen capture {session_id}: discarding frame from replaced loop");
        return TickFlow::Stop;
    }

    entry.session.metrics.latency_ms = latency.as_secs_f64() * 1000.0;
    match captured {
        Ok(data) => {
            entry.frame_counter += 1;
            entry.frames_captured += 1;
            entry.bytes_captured += data.len() as u64;
            trace!(
                "screen capture {session_id}: frame {} ({} bytes)",
                entry.frame_counter,
                data.len()
            );
            send(
                &ctx.events,
                CaptureEvent::Frame {
                    session_id: session_id.to_string(),
                    device_id,
                    frame_number: entry.frame_counter,
                    timestamp: Utc::now(),
                    data,
                },
            );
        }
        Err(e) => {
            entry.session.metrics.dropped_frames += 1;
            warn!("screen capture {session_id}: dropped frame: {e}");
        }
    }
    TickFlow::Continue
}

/// One metrics-loop tick: observed fps = frames / elapsed seconds,
/// bandwidth = bytes / elapsed seconds.
async fn metrics_tick(ctx: &LoopContext, session_id: &str) -> TickFlow {
    let Some(state) = ctx.state.upgrade() else {
        return TickFlow::Stop;
    };
    let mut guard = state.lock().await;
    let Some(entry) = guard.sessions.get_mut(session_id) else {
        return TickFlow::Stop;
    };

    let elapsed = entry.window_start.elapsed().as_secs_f64();
    if elapsed > 0.0 {
        entry.session.metrics.frame_rate = entry.frames_captured as f64 / elapsed;
        entry.session.metrics.bandwidth = entry.bytes_captured as f64 / elapsed;
    }

    send(
        &ctx.events,
        CaptureEvent::MetricsUpdate {
            session_id: session_id.to_string(),
            metrics: entry.session.metrics,
        },
    );
    TickFlow::Continue
}

fn send(events: &mpsc::UnboundedSender<CaptureEvent>, event: CaptureEvent) {
    if events.send(event).is_err() {
        debug!("capture event dropped: no subscriber");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock_executor::MockDeviceExecutor;
    use devbridge_core::DeviceExecutor;

    fn manager_with(
        mock: &Arc<MockDeviceExecutor>,
    ) -> (ScreenCaptureManager, mpsc::UnboundedReceiver<CaptureEvent>) {
        ScreenCaptureManager::new(Executors::uniform(
            Arc::clone(mock) as Arc<dyn DeviceExecutor>
        ))
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<CaptureEvent>) -> Vec<CaptureEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn frame_numbers(events: &[CaptureEvent]) -> Vec<u64> {
        events
            .iter()
            .filter_map(|e| match e {
                CaptureEvent::Frame { frame_number, .. } => Some(*frame_number),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_capture_defaults_and_emits_started() {
        // Arrange
        let mock = Arc::new(MockDeviceExecutor::new());
        let (manager, mut rx) = manager_with(&mock);

        // Act
        let session = manager
            .start_capture("dev1", Platform::Android, CaptureOptions::default())
            .await
            .unwrap();

        // Assert
        assert_eq!(session.options.quality, Quality::Medium);
        assert_eq!(session.options.frame_rate, 30);
        assert!(session.info.session_id.starts_with("screen-"));
        assert_eq!(drain(&mut rx), vec![CaptureEvent::CaptureStarted(session)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_capture_same_device_fails() {
        let mock = Arc::new(MockDeviceExecutor::new());
        let (manager, _rx) = manager_with(&mock);
        manager
            .start_capture("dev1", Platform::Android, CaptureOptions::default())
            .await
            .unwrap();

        let second = manager
            .start_capture("dev1", Platform::Android, CaptureOptions::default())
            .await;

        assert!(matches!(second, Err(BridgeError::CaptureAlreadyActive(d)) if d == "dev1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_on_different_device_succeeds() {
        let mock = Arc::new(MockDeviceExecutor::new());
        let (manager, _rx) = manager_with(&mock);
        manager
            .start_capture("dev1", Platform::Android, CaptureOptions::default())
            .await
            .unwrap();

        let other = manager
            .start_capture("dev2", Platform::Ios, CaptureOptions::default())
            .await;

        assert!(other.is_ok());
        assert_eq!(manager.get_active_sessions().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_frame_rate_is_rejected() {
        let mock = Arc::new(MockDeviceExecutor::new());
        let (manager, _rx) = manager_with(&mock);
        let options = CaptureOptions {
            frame_rate: 0,
            ..CaptureOptions::default()
        };

        let result = manager.start_capture("dev1", Platform::Android, options).await;

        assert!(matches!(result, Err(BridgeError::InvalidPayload(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_loop_emits_numbered_frames() {
        // Arrange
        let mock = Arc::new(MockDeviceExecutor::new());
        let (manager, mut rx) = manager_with(&mock);
        manager
            .start_capture("dev1", Platform::Android, CaptureOptions::default())
            .await
            .unwrap();
        drain(&mut rx);

        // Act: 30 fps, ticks at ~33, ~67, ~100 ms
        tokio::time::sleep(Duration::from_millis(110)).await;

        // Assert
        assert_eq!(frame_numbers(&drain(&mut rx)), vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_capture_counts_dropped_frame_and_continues() {
        // Arrange
        let mock = Arc::new(MockDeviceExecutor::new());
        mock.push_frame(Err("screen off".to_string()));
        let (manager, mut rx) = manager_with(&mock);
        let id = manager
            .start_capture("dev1", Platform::Android, CaptureOptions::default())
            .await
            .unwrap()
            .info
            .session_id;
        drain(&mut rx);

        // Act
        tokio::time::sleep(Duration::from_millis(110)).await;

        // Assert: first tick dropped, the following two produced frames 1 and 2
        let metrics = manager.get_metrics(&id).await.unwrap();
        assert_eq!(metrics.dropped_frames, 1);
        assert_eq!(frame_numbers(&drain(&mut rx)), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_is_measured_per_capture() {
        let mock = Arc::new(MockDeviceExecutor::new());
        mock.set_capture_latency(Duration::from_millis(12));
        let (manager, _rx) = manager_with(&mock);
        let id = manager
            .start_capture("dev1", Platform::Android, CaptureOptions::default())
            .await
            .unwrap()
            .info
            .session_id;

        tokio::time::sleep(Duration::from_millis(60)).await;

        let latency = manager.get_latency(&id).await.unwrap();
        assert!((latency - 12.0).abs() < 1.0, "latency was {latency}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_metrics_loop_reports_observed_frame_rate() {
        // Arrange
        let mock = Arc::new(MockDeviceExecutor::new());
        mock.push_frame(Ok(vec![0; 100]));
        let (manager, mut rx) = manager_with(&mock);
        let id = manager
            .start_capture("dev1", Platform::Android, CaptureOptions::default())
            .await
            .unwrap()
            .info
            .session_id;

        // Act
        tokio::time::sleep(Duration::from_millis(1_010)).await;

        // Assert
        let updates: Vec<CaptureMetrics> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                CaptureEvent::MetricsUpdate { metrics, .. } => Some(metrics),
                _ => None,
            })
            .collect();
        assert_eq!(updates.len(), 1);
        assert!(
            (updates[0].frame_rate - 30.0).abs() < 1.5,
            "observed {}",
            updates[0].frame_rate
        );
        assert!(updates[0].bandwidth > 0.0);
        assert_eq!(
            manager.get_frame_rate(&id).await.unwrap(),
            updates[0].frame_rate
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_quality_restarts_loop_without_duplicates() {
        // Arrange: start slow (15 fps) so any leftover tick would be visible
        let mock = Arc::new(MockDeviceExecutor::new());
        let (manager, mut rx) = manager_with(&mock);
        let options = CaptureOptions {
            quality: Quality::Low,
            frame_rate: 15,
            ..CaptureOptions::default()
        };
        let id = manager
            .start_capture("dev1", Platform::Android, options)
            .await
            .unwrap()
            .info
            .session_id;
        drain(&mut rx);

        // Act
        let session = manager.set_quality(&id, Quality::High).await.unwrap();
        tokio::time::sleep(Duration::from_millis(110)).await;

        // Assert
        assert_eq!(session.options.frame_rate, 60);
        assert_eq!(
            manager.frame_interval(&id).await.unwrap(),
            Duration::from_micros(1_000_000 / 60)
        );
        let events = drain(&mut rx);
        let quality_changes = events
            .iter()
            .filter(|e| matches!(e, CaptureEvent::QualityChanged { .. }))
            .count();
        assert_eq!(quality_changes, 1);
        // 60 fps over 110 ms: six ticks, none from the old 66 ms loop.
        assert_eq!(frame_numbers(&events), vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_capture_stops_frames_and_frees_device() {
        // Arrange
        let mock = Arc::new(MockDeviceExecutor::new());
        let (manager, mut rx) = manager_with(&mock);
        let id = manager
            .start_capture("dev1", Platform::Android, CaptureOptions::default())
            .await
            .unwrap()
            .info
            .session_id;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Act
        manager.stop_capture(&id).await.unwrap();
        drain(&mut rx);
        let captures_at_stop = mock.capture_count();
        tokio::time::sleep(Duration::from_secs(2)).await;

        // Assert
        assert_eq!(mock.capture_count(), captures_at_stop);
        assert!(drain(&mut rx).is_empty());
        assert!(manager
            .start_capture("dev1", Platform::Android, CaptureOptions::default())
            .await
            .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_unknown_session_fails() {
        let mock = Arc::new(MockDeviceExecutor::new());
        let (manager, _rx) = manager_with(&mock);
        assert!(matches!(
            manager.stop_capture("screen-x").await,
            Err(BridgeError::SessionNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_stops_everything() {
        let mock = Arc::new(MockDeviceExecutor::new());
        let (manager, mut rx) = manager_with(&mock);
        manager
            .start_capture("a", Platform::Android, CaptureOptions::default())
            .await
            .unwrap();
        manager
            .start_capture("b", Platform::Ios, CaptureOptions::default())
            .await
            .unwrap();
        drain(&mut rx);

        manager.cleanup().await;

        assert!(manager.get_active_sessions().await.is_empty());
        let stopped = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, CaptureEvent::CaptureStopped { .. }))
            .count();
        assert_eq!(stopped, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_device_stops_its_session() {
        let mock = Arc::new(MockDeviceExecutor::new());
        let (manager, _rx) = manager_with(&mock);
        let id = manager
            .start_capture("a", Platform::Android, CaptureOptions::default())
            .await
            .unwrap()
            .info
            .session_id;

        assert_eq!(manager.stop_device("a").await, Some(id));
        assert_eq!(manager.stop_device("a").await, None);
    }
}
