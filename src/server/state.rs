//! Process-wide shared state.
//!
//! One [`ServerState`] is shared by every connection. It owns the single
//! active [`TaskCursor`] and [`FrameBuffer`] behind one mutex, the
//! server-wide single-flight analysis guard, the connection registry and the
//! vision collaborators.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use super::config::ServerConfig;
use super::monitor::{MonitorQueue, StateSnapshot};
use crate::frames::{FrameBuffer, FrameStore};
use crate::task::{Advance, Task, TaskCursor};
use crate::vision::{FrameAnalyzer, ObjectDetector, StepContext};

/// Identifier of one client connection.
pub type ConnectionId = Uuid;

/// Registry entry for an open connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Remote address.
    pub peer: SocketAddr,
    /// When the connection was registered.
    pub connected_at: DateTime<Utc>,
}

/// A frame accepted into the shared buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Task generation the frame was accepted under.
    pub generation: u64,
    /// The buffer was empty before this frame.
    pub first_frame: bool,
}

/// The analysis saw a task that has since been replaced or cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleTask;

#[derive(Debug)]
struct ActiveState {
    cursor: Option<TaskCursor>,
    frames: FrameBuffer,
    generation: u64,
    // Frames the running analysis reads; they outlive eviction and task resets.
    pinned: Vec<PathBuf>,
}

/// Shared server state.
pub struct ServerState {
    config: ServerConfig,
    store: FrameStore,
    analyzer: Arc<dyn FrameAnalyzer>,
    detector: Arc<dyn ObjectDetector>,
    active: Mutex<ActiveState>,
    analysis_guard: Arc<Semaphore>,
    last_analysis: Mutex<Option<Instant>>,
    connections: DashMap<ConnectionId, ConnectionInfo>,
    monitor: MonitorQueue,
    tracker: TaskTracker,
}

impl std::fmt::Debug for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerState")
            .field("config", &self.config)
            .field("active", &self.active)
            .field("connections", &self.connections.len())
            .finish_non_exhaustive()
    }
}

impl ServerState {
    /// Create shared state with no active task.
    pub fn new(
        config: ServerConfig,
        analyzer: Arc<dyn FrameAnalyzer>,
        detector: Arc<dyn ObjectDetector>,
    ) -> Self {
        Self {
            store: FrameStore::new(config.frames_dir()),
            monitor: MonitorQueue::new(config.monitor_capacity),
            active: Mutex::new(ActiveState {
                cursor: None,
                frames: FrameBuffer::with_capacity(config.frame_buffer_capacity),
                generation: 0,
                pinned: Vec::new(),
            }),
            analysis_guard: Arc::new(Semaphore::new(1)),
            last_analysis: Mutex::new(None),
            connections: DashMap::new(),
            tracker: TaskTracker::new(),
            analyzer,
            detector,
            config,
        }
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Frame storage.
    pub fn store(&self) -> &FrameStore {
        &self.store
    }

    /// Frame analysis collaborator.
    pub fn analyzer(&self) -> &Arc<dyn FrameAnalyzer> {
        &self.analyzer
    }

    /// Object localization collaborator.
    pub fn detector(&self) -> &Arc<dyn ObjectDetector> {
        &self.detector
    }

    /// Monitoring relay.
    pub fn monitor(&self) -> &MonitorQueue {
        &self.monitor
    }

    /// Tracker for background analyses.
    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    // ─── Task ───────────────────────────────────────────────────────────

    /// Make `task` the active task, starting at `start_index`.
    ///
    /// Replaces the cursor and resets the frame buffer. Returns the new task
    /// generation.
    pub fn activate_task(&self, task: impl Into<Arc<Task>>, start_index: i64) -> u64 {
        let task = task.into();
        let (generation, snapshot) = {
            let mut active = self.active.lock();
            active.generation += 1;
            active.cursor = Some(TaskCursor::new(task, start_index));
            active.frames = FrameBuffer::with_capacity(self.config.frame_buffer_capacity);
            (active.generation, task_snapshot(active.cursor.as_ref()))
        };
        tracing::info!(generation, start_index, "Task activated");
        self.monitor.state_changed(snapshot);
        self.monitor.state_changed(StateSnapshot::Video { frames: Vec::new() });
        generation
    }

    /// Unset the active task. Later frames get a `no_task` reply.
    pub fn clear_task(&self) {
        let snapshot = {
            let mut active = self.active.lock();
            active.generation += 1;
            active.cursor = None;
            active.frames = FrameBuffer::with_capacity(self.config.frame_buffer_capacity);
            task_snapshot(None)
        };
        tracing::info!("Task cleared");
        self.monitor.state_changed(snapshot);
    }

    /// Returns `true` while a task is active.
    pub fn has_task(&self) -> bool {
        self.active.lock().cursor.is_some()
    }

    /// Copy of the active cursor.
    pub fn cursor(&self) -> Option<TaskCursor> {
        self.active.lock().cursor.clone()
    }

    /// Current task generation.
    pub fn generation(&self) -> u64 {
        self.active.lock().generation
    }

    /// Returns `true` if `generation` is still the active task.
    pub fn is_current(&self, generation: u64) -> bool {
        let active = self.active.lock();
        active.cursor.is_some() && active.generation == generation
    }

    /// Step context for the active task, if `generation` is still current.
    pub fn step_context(&self, generation: u64) -> Result<StepContext, StaleTask> {
        let active = self.active.lock();
        match &active.cursor {
            Some(cursor) if active.generation == generation => Ok(StepContext::from_cursor(cursor)),
            _ => Err(StaleTask),
        }
    }

    /// Advance the cursor of task `generation`.
    pub fn advance(&self, generation: u64) -> Result<Advance, StaleTask> {
        let (advance, snapshot) = {
            let mut active = self.active.lock();
            if active.generation != generation {
                return Err(StaleTask);
            }
            let cursor = active.cursor.as_mut().ok_or(StaleTask)?;
            let advance = cursor.advance();
            (advance, task_snapshot(active.cursor.as_ref()))
        };
        self.monitor.state_changed(snapshot);
        Ok(advance)
    }

    // ─── Frames ─────────────────────────────────────────────────────────

    /// Append `frame` to the shared buffer if a task is active.
    ///
    /// Returns `None` when no task is active; the frame is not buffered.
    pub fn admit_frame(&self, frame: PathBuf) -> Option<Admission> {
        let (admission, frames) = {
            let mut active = self.active.lock();
            active.cursor.as_ref()?;
            let first_frame = active.frames.is_empty();
            if let Some(evicted) = active.frames.add(frame) {
                tracing::trace!(frame = %evicted.display(), "Frame evicted from buffer");
            }
            let admission = Admission {
                generation: active.generation,
                first_frame,
            };
            (admission, active.frames.snapshot())
        };
        self.monitor.state_changed(StateSnapshot::Video { frames });
        Some(admission)
    }

    /// Copy of the frame buffer, oldest first.
    pub fn frames(&self) -> Vec<PathBuf> {
        self.active.lock().frames.snapshot()
    }

    /// Files disconnect cleanup must keep: the buffer plus frames pinned by
    /// the running analysis.
    pub fn frames_in_use(&self) -> Vec<PathBuf> {
        let active = self.active.lock();
        let mut in_use = active.frames.snapshot();
        in_use.extend(active.pinned.iter().cloned());
        in_use
    }

    /// Start pinning frames for a new analysis, beginning with `frame`.
    ///
    /// Replaces any pins left by an earlier analysis.
    pub fn pin_analysis_frame(&self, frame: PathBuf) {
        let mut active = self.active.lock();
        active.pinned.clear();
        active.pinned.push(frame);
    }

    /// The newest `n` buffered frames, pinned until
    /// [`release_analysis_frames`](Self::release_analysis_frames).
    pub fn pin_recent_frames(&self, n: usize) -> Vec<PathBuf> {
        let mut active = self.active.lock();
        let frames = active.frames.tail(n);
        active.pinned.extend(frames.iter().cloned());
        frames
    }

    /// Drop every analysis pin.
    pub fn release_analysis_frames(&self) {
        self.active.lock().pinned.clear();
    }

    // ─── Analysis guard ─────────────────────────────────────────────────

    /// Take the single-flight guard if no analysis is running.
    ///
    /// Dropping the permit releases the guard.
    pub fn try_begin_analysis(&self) -> Option<OwnedSemaphorePermit> {
        self.analysis_guard.clone().try_acquire_owned().ok()
    }

    /// Returns `true` while an analysis holds the guard.
    pub fn is_analyzing(&self) -> bool {
        self.analysis_guard.available_permits() == 0
    }

    /// Wait until no analysis is running.
    pub async fn wait_idle(&self) {
        // The semaphore is never closed.
        let _permit = self.analysis_guard.acquire().await;
    }

    /// Record that an analysis just finished.
    pub fn mark_analysis_finished(&self) {
        *self.last_analysis.lock() = Some(Instant::now());
    }

    /// Returns `true` if a frame now would arrive too soon after the last
    /// analysis.
    pub fn is_rate_limited(&self) -> bool {
        let interval = self.config.min_frame_interval();
        if interval.is_zero() {
            return false;
        }
        self.last_analysis
            .lock()
            .is_some_and(|finished| finished.elapsed() < interval)
    }

    // ─── Connections ────────────────────────────────────────────────────

    /// Register a connection from `peer`.
    pub fn register(&self, peer: SocketAddr) -> ConnectionId {
        let id = Uuid::new_v4();
        self.connections.insert(
            id,
            ConnectionInfo {
                peer,
                connected_at: Utc::now(),
            },
        );
        self.publish_registry();
        id
    }

    /// Remove a connection from the registry.
    pub fn unregister(&self, id: &ConnectionId) -> Option<ConnectionInfo> {
        let removed = self.connections.remove(id).map(|(_, info)| info);
        self.publish_registry();
        removed
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Peer addresses of open connections.
    pub fn peers(&self) -> Vec<SocketAddr> {
        self.connections.iter().map(|entry| entry.peer).collect()
    }

    fn publish_registry(&self) {
        self.monitor.state_changed(StateSnapshot::Server {
            connected: self.connection_count(),
            peers: self.peers().iter().map(ToString::to_string).collect(),
        });
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────

    /// Stop accepting background work and wait for in-flight analyses.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

fn task_snapshot(cursor: Option<&TaskCursor>) -> StateSnapshot {
    match cursor {
        Some(cursor) => StateSnapshot::Task {
            name: Some(cursor.task().name().to_string()),
            index: cursor.index(),
            current_action: Some(cursor.current_step().action().to_string()),
        },
        None => StateSnapshot::Task {
            name: None,
            index: 0,
            current_action: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Step;
    use crate::vision::{ScriptedAnalyzer, StaticDetector};

    fn state() -> ServerState {
        ServerState::new(
            ServerConfig::for_testing("unused"),
            Arc::new(ScriptedAnalyzer::new()),
            Arc::new(StaticDetector::new()),
        )
    }

    fn task() -> Task {
        Task::new(
            "tea",
            vec![
                Step::new("boil water", vec!["kettle".into()]),
                Step::new("steep", vec!["cup".into()]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn frames_need_an_active_task() {
        let state = state();
        assert!(state.admit_frame(PathBuf::from("a.jpg")).is_none());
        assert!(state.frames().is_empty());
    }

    #[test]
    fn activation_resets_buffer_and_bumps_generation() {
        let state = state();
        let g1 = state.activate_task(task(), 0);
        let first = state.admit_frame(PathBuf::from("a.jpg")).unwrap();
        assert!(first.first_frame);
        assert_eq!(first.generation, g1);
        assert!(!state.admit_frame(PathBuf::from("b.jpg")).unwrap().first_frame);

        let g2 = state.activate_task(task(), 1);
        assert!(g2 > g1);
        assert!(state.frames().is_empty());
        assert_eq!(state.cursor().unwrap().index(), 1);
        assert!(!state.is_current(g1));
    }

    #[test]
    fn stale_generation_cannot_advance() {
        let state = state();
        let g1 = state.activate_task(task(), 0);
        state.activate_task(task(), 0);
        assert_eq!(state.advance(g1), Err(StaleTask));
        assert_eq!(state.cursor().unwrap().index(), 0);
    }

    #[test]
    fn advance_reports_finish() {
        let state = state();
        let g = state.activate_task(task(), 0);
        assert_eq!(
            state.advance(g),
            Ok(Advance::Step(Step::new("steep", vec!["cup".into()])))
        );
        assert_eq!(state.advance(g), Ok(Advance::Finished));
    }

    #[test]
    fn clear_task_unsets_cursor() {
        let state = state();
        let g = state.activate_task(task(), 0);
        state.clear_task();
        assert!(!state.has_task());
        assert_eq!(state.step_context(g), Err(StaleTask));
    }

    #[test]
    fn pinned_frames_stay_in_use_until_released() {
        let state = state();
        state.activate_task(task(), 0);
        state.admit_frame(PathBuf::from("a.jpg"));
        state.admit_frame(PathBuf::from("b.jpg"));

        state.pin_analysis_frame(PathBuf::from("b.jpg"));
        assert_eq!(
            state.pin_recent_frames(1),
            vec![PathBuf::from("b.jpg")]
        );

        // A task reset empties the buffer but not the pins.
        state.activate_task(task(), 0);
        assert!(state.frames().is_empty());
        assert!(state.frames_in_use().contains(&PathBuf::from("b.jpg")));
        assert!(!state.frames_in_use().contains(&PathBuf::from("a.jpg")));

        state.pin_analysis_frame(PathBuf::from("c.jpg"));
        assert_eq!(state.frames_in_use(), vec![PathBuf::from("c.jpg")]);

        state.release_analysis_frames();
        assert!(state.frames_in_use().is_empty());
    }

    #[test]
    fn guard_is_single_flight() {
        let state = state();
        let permit = state.try_begin_analysis().unwrap();
        assert!(state.is_analyzing());
        assert!(state.try_begin_analysis().is_none());
        drop(permit);
        assert!(state.try_begin_analysis().is_some());
    }

    #[test]
    fn rate_limit_follows_last_analysis() {
        let mut config = ServerConfig::for_testing("unused");
        config.min_frame_interval_ms = 60_000;
        let state = ServerState::new(
            config,
            Arc::new(ScriptedAnalyzer::new()),
            Arc::new(StaticDetector::new()),
        );
        assert!(!state.is_rate_limited());
        state.mark_analysis_finished();
        assert!(state.is_rate_limited());
    }

    #[test]
    fn registry_tracks_peers() {
        let state = state();
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let id = state.register(peer);
        assert_eq!(state.connection_count(), 1);
        assert_eq!(state.peers(), vec![peer]);
        assert_eq!(state.unregister(&id).unwrap().peer, peer);
        assert_eq!(state.connection_count(), 0);
    }
}
