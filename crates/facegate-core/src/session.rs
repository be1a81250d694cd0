//! Capture session state machine.
//!
//! A [`Session`] is driven synchronously, one call per processed frame.
//! Acceptance is two-phase: when a frame qualifies the session moves to
//! [`Phase::Accepting`] and hands out an [`AcceptTicket`]; the caller captures
//! and encodes a still at its own pace and redeems the ticket with
//! [`Session::finish_accept`]. While a ticket is outstanding no second
//! acceptance can fire.

use crate::batch::{BatchCollector, BatchError, EnrollmentBatch};
use crate::hysteresis::{Accumulator, HysteresisConfig};
use crate::pose::{
    classify, CHALLENGES, PROMPT_COMPLETE, PROMPT_HOLD_STILL, PROMPT_OCCLUDED, PROMPT_READY,
    PROMPT_SEARCHING, STEP_COUNT,
};
use crate::types::{CaptureMode, CaptureStatus, KeypointFrame, StillImage};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("operation not available in {0:?} mode")]
    WrongMode(CaptureMode),
    #[error("a capture is already in progress")]
    Busy,
    #[error("face covering detected; remove it before capturing")]
    Occluded,
    #[error("enrollment is already complete")]
    AlreadyComplete,
    #[error("accept ticket does not belong to the current capture")]
    StaleTicket,
    #[error(transparent)]
    Batch(#[from] BatchError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Awaiting { step: usize },
    /// A still is being captured for `step`; the acceptance already fired.
    Accepting { step: usize },
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptTrigger {
    /// Hysteresis confidence reached its target.
    Confidence,
    /// The user skipped the current pose.
    Skip,
    /// Explicit single-shot capture in verification mode.
    Manual,
}

/// Single-use claim on the pending acceptance.
#[derive(Debug)]
#[must_use = "an unredeemed ticket leaves the session stuck in Accepting"]
pub struct AcceptTicket {
    session: Uuid,
    step: usize,
    trigger: AcceptTrigger,
}

impl AcceptTicket {
    pub fn session_id(&self) -> Uuid {
        self.session
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn trigger(&self) -> AcceptTrigger {
        self.trigger
    }
}

/// What redeeming a ticket did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    /// `step` was recorded; `complete` when it was the last one.
    Advanced { step: usize, complete: bool },
    /// The face became occluded while the still was captured; nothing was recorded.
    Vetoed { step: usize },
    /// Verification still stored and ready to submit.
    Captured,
}

#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    mode: CaptureMode,
    phase: Phase,
    accumulator: Accumulator,
    occlusion_blocked: bool,
    collector: BatchCollector,
    prompt: &'static str,
}

impl Session {
    pub fn enrollment(config: HysteresisConfig) -> Self {
        Self::new(CaptureMode::Enrollment, config, STEP_COUNT)
    }

    pub fn verification() -> Self {
        Self::new(CaptureMode::Verification, HysteresisConfig::default(), 1)
    }

    fn new(mode: CaptureMode, config: HysteresisConfig, capacity: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            mode,
            phase: Phase::Awaiting { step: 0 },
            accumulator: Accumulator::new(config),
            occlusion_blocked: false,
            collector: BatchCollector::new(capacity),
            prompt: PROMPT_SEARCHING,
        }
    }

    /// Process one inference result. `occluded` is the gate's current verdict
    /// and is ignored in verification mode.
    ///
    /// Returns a ticket when this frame fires an acceptance.
    pub fn observe(&mut self, frame: &KeypointFrame, occluded: bool) -> Option<AcceptTicket> {
        match self.mode {
            CaptureMode::Verification => {
                self.prompt = match frame {
                    KeypointFrame::Present(_) => PROMPT_READY,
                    KeypointFrame::Absent => PROMPT_SEARCHING,
                };
                None
            }
            CaptureMode::Enrollment => self.observe_enrollment(frame, occluded),
        }
    }

    fn observe_enrollment(&mut self, frame: &KeypointFrame, occluded: bool) -> Option<AcceptTicket> {
        self.occlusion_blocked = occluded;

        let step = match self.phase {
            Phase::Complete => {
                self.prompt = PROMPT_COMPLETE;
                return None;
            }
            Phase::Accepting { .. } => {
                if occluded {
                    self.accumulator.reset();
                    self.prompt = PROMPT_OCCLUDED;
                }
                return None;
            }
            Phase::Awaiting { step } => step,
        };

        if occluded {
            self.accumulator.reset();
            self.prompt = PROMPT_OCCLUDED;
            return None;
        }

        let KeypointFrame::Present(keypoints) = frame else {
            self.accumulator.reset();
            self.prompt = PROMPT_SEARCHING;
            return None;
        };

        let verdict = classify(keypoints, step);
        let confidence = self.accumulator.record(verdict.pass);
        self.prompt = if verdict.pass {
            PROMPT_HOLD_STILL
        } else {
            verdict.prompt
        };
        tracing::trace!(step, pass = verdict.pass, confidence, "pose evaluated");

        if self.accumulator.is_saturated() {
            return Some(self.begin_accept(step, AcceptTrigger::Confidence));
        }
        None
    }

    /// Record a gate verdict that arrived between frames, so a still being
    /// encoded right now is vetoed even before the next observation.
    pub fn note_occlusion(&mut self, blocked: bool) {
        if self.mode != CaptureMode::Enrollment {
            return;
        }
        self.occlusion_blocked = blocked;
        if blocked {
            self.accumulator.reset();
            if self.phase != Phase::Complete {
                self.prompt = PROMPT_OCCLUDED;
            }
        }
    }

    /// Accept the current pose step regardless of pose correctness.
    pub fn request_skip(&mut self) -> Result<AcceptTicket, SessionError> {
        if self.mode != CaptureMode::Enrollment {
            return Err(SessionError::WrongMode(self.mode));
        }
        match self.phase {
            Phase::Complete => Err(SessionError::AlreadyComplete),
            Phase::Accepting { .. } => Err(SessionError::Busy),
            Phase::Awaiting { .. } if self.occlusion_blocked => Err(SessionError::Occluded),
            Phase::Awaiting { step } => Ok(self.begin_accept(step, AcceptTrigger::Skip)),
        }
    }

    /// Explicit single-shot capture (verification only).
    pub fn request_capture(&mut self) -> Result<AcceptTicket, SessionError> {
        if self.mode != CaptureMode::Verification {
            return Err(SessionError::WrongMode(self.mode));
        }
        match self.phase {
            Phase::Accepting { .. } => Err(SessionError::Busy),
            _ => Ok(self.begin_accept(0, AcceptTrigger::Manual)),
        }
    }

    fn begin_accept(&mut self, step: usize, trigger: AcceptTrigger) -> AcceptTicket {
        self.phase = Phase::Accepting { step };
        AcceptTicket {
            session: self.id,
            step,
            trigger,
        }
    }

    fn check_ticket(&self, ticket: &AcceptTicket) -> Result<usize, SessionError> {
        if ticket.session != self.id {
            return Err(SessionError::StaleTicket);
        }
        match self.phase {
            Phase::Accepting { step } if step == ticket.step => Ok(step),
            _ => Err(SessionError::StaleTicket),
        }
    }

    /// Redeem a ticket with the captured still.
    pub fn finish_accept(
        &mut self,
        ticket: AcceptTicket,
        still: StillImage,
    ) -> Result<Acceptance, SessionError> {
        let step = self.check_ticket(&ticket)?;

        if self.mode == CaptureMode::Verification {
            self.collector.replace(still);
            self.phase = Phase::Awaiting { step: 0 };
            return Ok(Acceptance::Captured);
        }

        if self.occlusion_blocked {
            self.accumulator.reset();
            self.phase = Phase::Awaiting { step };
            self.prompt = PROMPT_OCCLUDED;
            return Ok(Acceptance::Vetoed { step });
        }

        if let Err(err) = self.collector.push(still) {
            self.phase = Phase::Awaiting { step };
            return Err(err.into());
        }

        self.accumulator.reset();
        let next = step + 1;
        let complete = next >= STEP_COUNT;
        if complete {
            self.phase = Phase::Complete;
            self.prompt = PROMPT_COMPLETE;
        } else {
            self.phase = Phase::Awaiting { step: next };
            self.prompt = CHALLENGES[next].prompt;
        }

        tracing::info!(
            session = %self.id,
            step,
            trigger = ?ticket.trigger,
            complete,
            "frame accepted"
        );
        Ok(Acceptance::Advanced { step, complete })
    }

    /// Give up on a pending acceptance (still capture failed). Confidence is
    /// left as it was so a sustained pose re-fires on the next frame.
    pub fn abort_accept(&mut self, ticket: AcceptTicket) -> Result<(), SessionError> {
        let step = self.check_ticket(&ticket)?;
        self.phase = Phase::Awaiting { step };
        Ok(())
    }

    /// The finished enrollment batch. Does not consume it.
    pub fn batch(&self) -> Result<EnrollmentBatch, SessionError> {
        if self.mode != CaptureMode::Enrollment {
            return Err(SessionError::WrongMode(self.mode));
        }
        Ok(self.collector.finish()?)
    }

    /// The most recent verification still, if one was captured.
    pub fn verification_still(&self) -> Option<&StillImage> {
        match self.mode {
            CaptureMode::Verification => self.collector.latest(),
            CaptureMode::Enrollment => None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn step(&self) -> usize {
        match self.phase {
            Phase::Awaiting { step } | Phase::Accepting { step } => step,
            Phase::Complete => STEP_COUNT,
        }
    }

    pub fn confidence(&self) -> u32 {
        self.accumulator.confidence()
    }

    pub fn progress_percent(&self) -> u8 {
        self.accumulator.progress_percent()
    }

    pub fn occlusion_blocked(&self) -> bool {
        self.occlusion_blocked
    }

    pub fn is_accepting(&self) -> bool {
        matches!(self.phase, Phase::Accepting { .. })
    }

    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Complete
    }

    pub fn accepted(&self) -> &[StillImage] {
        self.collector.frames()
    }

    pub fn prompt(&self) -> &'static str {
        self.prompt
    }

    pub fn status(&self) -> CaptureStatus {
        CaptureStatus {
            session_id: self.id.to_string(),
            mode: self.mode,
            prompt: self.prompt.to_string(),
            progress_percent: self.progress_percent(),
            confidence: self.confidence(),
            occlusion_blocked: self.occlusion_blocked,
            step: self.step(),
            step_count: match self.mode {
                CaptureMode::Enrollment => STEP_COUNT,
                CaptureMode::Verification => 0,
            },
            accepting: self.is_accepting(),
            complete: self.is_complete(),
            accepted_frames: self.collector.len(),
        }
    }
}
