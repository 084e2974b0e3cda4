// Enable-flow state machine: Prompt -> Init -> PermissionRequest ->
// TokenAcquire -> Register -> PreferenceUpdate -> Success, with terminal
// failure, decline and timeout states and a validated transition history

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::{AttemptId, DeviceToken, PushError, PushResult};

/// Why an enable attempt stopped short of `Success`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnableFailure {
    Unsupported,
    /// Remote config missing, placeholder or unreachable
    SetupNeeded,
    /// Permission denied earlier; the prompt was not shown
    PermissionBlocked,
    PermissionDismissed,
    TokenError,
    RegistrationError,
    /// The chain task ended without reporting a result
    Interrupted,
}

/// Stages of one enable attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum EnableStage {
    /// Confirmation modal is open
    #[default]
    Prompt,
    Init,
    PermissionRequest,
    TokenAcquire,
    Register,
    PreferenceUpdate,
    Success,
    /// User declined in the confirmation modal
    Declined,
    Failed(EnableFailure),
    TimedOut,
}

impl EnableStage {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EnableStage::Success
                | EnableStage::Declined
                | EnableStage::Failed(_)
                | EnableStage::TimedOut
        )
    }

    /// Only the stages inside the timed chain can lose the race
    pub fn is_timed(&self) -> bool {
        matches!(
            self,
            EnableStage::Init
                | EnableStage::PermissionRequest
                | EnableStage::TokenAcquire
                | EnableStage::Register
                | EnableStage::PreferenceUpdate
        )
    }

    pub fn can_transition_to(&self, target: &EnableStage) -> bool {
        use EnableStage::*;

        match (self, target) {
            (Prompt, Init) | (Prompt, Declined) | (Prompt, Failed(_)) => true,
            (Init, PermissionRequest) => true,
            (PermissionRequest, TokenAcquire) => true,
            (TokenAcquire, Register) => true,
            (Register, PreferenceUpdate) => true,
            (PreferenceUpdate, Success) => true,
            (from, Failed(_)) => from.is_timed() && *from != PreferenceUpdate,
            (from, TimedOut) => from.is_timed(),
            _ => false,
        }
    }

    /// Progress line shown in the modal while this stage runs
    pub fn progress_label(&self) -> &'static str {
        match self {
            EnableStage::Prompt => "Waiting for confirmation...",
            EnableStage::Init => "Step 1: Init messaging...",
            EnableStage::PermissionRequest => "Step 2: Requesting permission...",
            EnableStage::TokenAcquire => "Step 3: Getting token...",
            EnableStage::Register => "Step 4: Registering...",
            EnableStage::PreferenceUpdate => "Step 5: Saving preferences...",
            EnableStage::Success => "Done",
            EnableStage::Declined => "Maybe later",
            EnableStage::Failed(_) => "Failed",
            EnableStage::TimedOut => "Timed out",
        }
    }
}

/// One recorded transition
#[derive(Debug, Clone)]
pub struct StageTransition {
    pub from: Option<EnableStage>,
    pub to: EnableStage,
    pub at: Instant,
}

/// State and history of one enable attempt
#[derive(Debug, Clone)]
pub struct EnableLifecycle {
    pub attempt: AttemptId,
    pub stage: EnableStage,
    pub started_at: Instant,
    pub finished_at: Option<Instant>,
    pub history: Vec<StageTransition>,
}

impl EnableLifecycle {
    pub fn new(attempt: AttemptId) -> Self {
        let now = Instant::now();
        Self {
            attempt,
            stage: EnableStage::Prompt,
            started_at: now,
            finished_at: None,
            history: vec![StageTransition {
                from: None,
                to: EnableStage::Prompt,
                at: now,
            }],
        }
    }

    /// Move to `next`, rejecting transitions the flow does not allow. Once a
    /// terminal stage is reached every further transition is rejected, which
    /// is what keeps an abandoned chain from advancing after a timeout.
    pub fn transition_to(&mut self, next: EnableStage) -> PushResult<()> {
        if !self.stage.can_transition_to(&next) {
            tracing::debug!(from = ?self.stage, to = ?next, "rejected enable transition");
            return Err(PushError::Cancelled);
        }

        let now = Instant::now();
        self.history.push(StageTransition {
            from: Some(self.stage),
            to: next,
            at: now,
        });
        self.stage = next;
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        Ok(())
    }

    pub fn elapsed(&self) -> Duration {
        self.finished_at
            .unwrap_or_else(Instant::now)
            .duration_since(self.started_at)
    }

    /// Stages visited, in order
    pub fn path(&self) -> Vec<EnableStage> {
        self.history.iter().map(|t| t.to).collect()
    }
}

/// Final result of `enable()`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnableOutcome {
    Enabled {
        token: DeviceToken,
        scheduled_meals: u32,
    },
    Declined,
    Failed {
        stage: EnableStage,
        failure: EnableFailure,
        error: PushError,
    },
    TimedOut(Duration),
    /// Another flow was already running; nothing was attempted
    Busy,
}

impl EnableOutcome {
    pub fn is_enabled(&self) -> bool {
        matches!(self, EnableOutcome::Enabled { .. })
    }

    pub fn failure(&self) -> Option<EnableFailure> {
        match self {
            EnableOutcome::Failed { failure, .. } => Some(*failure),
            _ => None,
        }
    }
}
