//! Analysis dispatch and step transitions.
//!
//! One analysis runs at a time server-wide. The connection handler takes the
//! single-flight permit and hands it to [`spawn_analysis`]; the permit is
//! released when the background task ends, whether it finished, failed or
//! panicked.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::OwnedSemaphorePermit;

use super::connection::ResponseSink;
use super::enrich::enrich_objects;
use super::state::{Admission, ConnectionId, ServerState, StaleTask};
use crate::protocol::{CameraPose, Instruction, ServerResponse};
use crate::task::Advance;
use crate::vision::Verdict;

const STALE_TASK_MESSAGE: &str = "Task changed during analysis";

/// A frame accepted for analysis.
#[derive(Debug, Clone)]
pub struct AnalysisJob {
    /// Originating connection.
    pub connection_id: ConnectionId,
    /// The frame that triggered the analysis.
    pub frame: PathBuf,
    /// How the frame entered the shared buffer.
    pub admission: Admission,
    /// Camera pose the frame was captured with.
    pub camera_pose: Option<CameraPose>,
    /// Where the reply goes.
    pub sink: ResponseSink,
}

/// Run `job` in the background, holding `permit` until it is done.
pub fn spawn_analysis(state: Arc<ServerState>, job: AnalysisJob, permit: OwnedSemaphorePermit) {
    let tracker = state.tracker().clone();
    tracker.spawn(async move {
        let _permit = permit;
        let connection_id = job.connection_id;
        let camera_pose = job.camera_pose;
        let sink = job.sink.clone();

        let instruction = run_analysis(&state, &job).await;
        state.release_analysis_frames();
        state.mark_analysis_finished();

        match instruction {
            Some(instruction) => {
                tracing::debug!(
                    connection_id = %connection_id,
                    status = %instruction.status(),
                    "Sending instruction"
                );
                let response = ServerResponse::from(instruction.with_camera_pose(camera_pose));
                if !sink.send(response) {
                    tracing::debug!(connection_id = %connection_id, "Connection closed before reply");
                }
            }
            None => {
                tracing::debug!(connection_id = %connection_id, "No instruction this cycle");
            }
        }
    });
}

/// Decide the instruction for one accepted frame.
///
/// Returns `None` when nothing should be sent: a derailment whose objects
/// could not be located.
pub async fn run_analysis(state: &ServerState, job: &AnalysisJob) -> Option<Instruction> {
    let generation = job.admission.generation;
    match evaluate(state, job).await {
        Ok(instruction) => instruction,
        Err(StaleTask) => {
            tracing::info!(generation, frame = %job.frame.display(), "Task changed during analysis");
            state.monitor().log(STALE_TASK_MESSAGE);
            Some(Instruction::error(STALE_TASK_MESSAGE))
        }
    }
}

async fn evaluate(state: &ServerState, job: &AnalysisJob) -> Result<Option<Instruction>, StaleTask> {
    let generation = job.admission.generation;
    let context = state.step_context(generation)?;
    let detector = state.detector().as_ref();

    if job.admission.first_frame {
        tracing::info!(frame = %job.frame.display(), "First frame, sending current step");
        state.monitor().log("First frame received, sending the current step");
        let mut instruction = Instruction::executing(&context.current);
        if let Some(guidance) = instruction.guidance_mut() {
            enrich_objects(detector, &job.frame, &mut guidance.objects).await;
        }
        return Ok(Some(instruction));
    }

    let frames = state.pin_recent_frames(state.config().analysis_frame_count);
    let latest = frames.last().cloned().unwrap_or_else(|| job.frame.clone());

    let verdict = match state.analyzer().analyze(&context, &frames).await {
        Ok(verdict) => verdict,
        Err(e) => {
            tracing::error!(error = %e, "Frame analysis failed");
            state.monitor().log(format!("Frame analysis failed: {e}"));
            Verdict::Error {
                message: format!("Failed to analyze frame: {e}"),
            }
        }
    };
    tracing::info!(verdict = verdict.name(), "Frame analyzed");
    state.monitor().log(format!("Frame processing result: {}", verdict.name()));

    match verdict {
        Verdict::Executing => {
            if !state.is_current(generation) {
                return Err(StaleTask);
            }
            Ok(Some(Instruction::executing(&context.current)))
        }
        Verdict::Completed => match state.advance(generation)? {
            Advance::Finished => {
                tracing::info!("All steps completed");
                Ok(Some(Instruction::finished()))
            }
            Advance::Step(step) => {
                tracing::info!(action = step.action(), "Step completed, moving on");
                let mut instruction = Instruction::next_step(&step);
                if let Some(guidance) = instruction.guidance_mut() {
                    enrich_objects(detector, &latest, &mut guidance.objects).await;
                }
                Ok(Some(instruction))
            }
        },
        Verdict::Derailed {
            action,
            focus_objects,
        } => {
            let mut instruction = Instruction::derailed(action, &focus_objects);
            let located = match instruction.guidance_mut() {
                Some(guidance) => enrich_objects(detector, &latest, &mut guidance.objects).await,
                None => false,
            };
            if !state.is_current(generation) {
                return Err(StaleTask);
            }
            if !located {
                tracing::info!(objects = ?focus_objects, "Derailed but no objects located, not sending");
                return Ok(None);
            }
            Ok(Some(instruction))
        }
        Verdict::Error { message } => Ok(Some(Instruction::error(message))),
    }
}
