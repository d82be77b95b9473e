//! Blocking-overlay state machine.
//!
//! UI events, liveness verdicts, timer expiries, and validation results all
//! arrive as inputs; the machine returns the effects the controller must
//! execute. Keeping transitions pure makes the challenge flow testable
//! without any surface or network.

use crate::challenge::{
    Question, QuestionResponse, ValidationResult, MIN_JUSTIFICATION_CHARS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayMode {
    /// Two terminal actions: go home or open settings.
    SimpleBlock,
    /// Question challenge with validated extensions.
    Challenge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayPhase {
    /// Overlay visible, accepting input.
    Showing,
    /// Correct answer submitted; waiting on the validator. Submit disabled.
    Validating,
    /// Approved; success feedback showing before teardown.
    Granted,
    /// Terminal.
    Dismissing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DismissCause {
    WentHome,
    LeftForAnotherApp,
    SafetyTimeout,
    HomeButton,
    SettingsButton,
    ExtensionGranted,
    ServiceStopping,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OverlayInput {
    /// A freshly fetched question (initial, post-wrong-answer, or
    /// anti-gaming regeneration).
    QuestionReady(Question),
    Submit {
        answer: Option<String>,
        justification: String,
    },
    ValidationFinished(ValidationResult),
    /// Wrong-answer regeneration delay elapsed.
    RegenerateDue,
    /// Grant success feedback has been displayed long enough.
    GrantDisplayDone,
    HomePressed,
    SettingsPressed,
    /// Liveness: stable reading of a different app in the foreground.
    StableForeignApp,
    /// Liveness: stable reading of the OS launcher.
    StableLauncher,
    SafetyTimeout,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    ShowQuestion(Question),
    ShowStatus { message: String, error: bool },
    ClearJustification,
    SetSubmitEnabled(bool),
    /// Ask the validator; result comes back as `ValidationFinished`.
    BeginValidation(QuestionResponse),
    /// Fetch a new question after the anti-brute-force delay.
    ScheduleRegenerate,
    /// Fetch a new question immediately (anti-gaming app switch).
    FetchQuestion,
    /// Raise the effective limit; the store re-checks the block is live.
    ApplyGrant { minutes: u32 },
    /// Start the grant feedback delay; ends with `GrantDisplayDone`.
    ScheduleGrantDismiss,
    Dismiss(DismissCause),
}

#[derive(Debug)]
pub struct OverlayMachine {
    mode: OverlayMode,
    phase: OverlayPhase,
    question: Option<Question>,
    regenerate_on_switch: bool,
}

impl OverlayMachine {
    pub fn new(mode: OverlayMode, regenerate_on_switch: bool) -> Self {
        Self {
            mode,
            phase: OverlayPhase::Showing,
            question: None,
            regenerate_on_switch,
        }
    }

    pub fn phase(&self) -> OverlayPhase {
        self.phase
    }

    pub fn question(&self) -> Option<&Question> {
        self.question.as_ref()
    }

    pub fn handle(&mut self, input: OverlayInput) -> Vec<Effect> {
        if self.phase == OverlayPhase::Dismissing {
            return Vec::new();
        }
        match input {
            OverlayInput::QuestionReady(question) => self.on_question_ready(question),
            OverlayInput::Submit {
                answer,
                justification,
            } => self.on_submit(answer, justification),
            OverlayInput::ValidationFinished(result) => self.on_validation(result),
            OverlayInput::RegenerateDue => self.on_regenerate_due(),
            OverlayInput::GrantDisplayDone => match self.phase {
                OverlayPhase::Granted => self.dismiss(DismissCause::ExtensionGranted),
                _ => Vec::new(),
            },
            OverlayInput::HomePressed => self.dismiss(DismissCause::HomeButton),
            OverlayInput::SettingsPressed => self.dismiss(DismissCause::SettingsButton),
            OverlayInput::StableForeignApp => self.on_stable_foreign(),
            OverlayInput::StableLauncher => self.dismiss(DismissCause::WentHome),
            OverlayInput::SafetyTimeout => self.dismiss(DismissCause::SafetyTimeout),
            OverlayInput::Cancelled => self.dismiss(DismissCause::ServiceStopping),
        }
    }

    fn on_question_ready(&mut self, question: Question) -> Vec<Effect> {
        if self.mode != OverlayMode::Challenge || self.phase != OverlayPhase::Showing {
            return Vec::new();
        }
        self.question = Some(question.clone());
        vec![Effect::ShowQuestion(question), Effect::SetSubmitEnabled(true)]
    }

    fn on_submit(&mut self, answer: Option<String>, justification: String) -> Vec<Effect> {
        if self.mode != OverlayMode::Challenge || self.phase != OverlayPhase::Showing {
            return Vec::new();
        }
        let Some(question) = self.question.clone() else {
            return vec![status("Question still loading, one moment.", true)];
        };
        let Some(answer) = answer else {
            return vec![status("Please select an answer.", true)];
        };
        let justification = justification.trim().to_string();
        if justification.len() < MIN_JUSTIFICATION_CHARS {
            return vec![status(
                &format!(
                    "Please provide a more detailed reason (at least {MIN_JUSTIFICATION_CHARS} characters)."
                ),
                true,
            )];
        }

        if !question.is_correct(&answer) {
            // Local rejection; a fresh question arrives after a short delay
            // to blunt brute-force guessing.
            return vec![
                status("Incorrect answer. Try again!", true),
                Effect::ScheduleRegenerate,
            ];
        }

        self.phase = OverlayPhase::Validating;
        vec![
            Effect::SetSubmitEnabled(false),
            status("Answer correct! Validating reason...", false),
            Effect::BeginValidation(QuestionResponse {
                question_id: question.id,
                answer,
                justification,
                correct: true,
            }),
        ]
    }

    fn on_validation(&mut self, result: ValidationResult) -> Vec<Effect> {
        if self.phase != OverlayPhase::Validating {
            // Stale result (e.g. the user already went home); discard.
            return Vec::new();
        }
        if result.approved {
            self.phase = OverlayPhase::Granted;
            vec![
                Effect::ApplyGrant {
                    minutes: result.suggested_minutes,
                },
                status(
                    &format!(
                        "Extension approved! You have {} extra minutes.",
                        result.suggested_minutes
                    ),
                    false,
                ),
                Effect::ScheduleGrantDismiss,
            ]
        } else {
            // Same question, cleared justification, submit re-enabled.
            self.phase = OverlayPhase::Showing;
            vec![
                status(&format!("Reason not sufficient: {}", result.feedback), true),
                Effect::ClearJustification,
                Effect::SetSubmitEnabled(true),
            ]
        }
    }

    fn on_regenerate_due(&mut self) -> Vec<Effect> {
        if self.mode != OverlayMode::Challenge || self.phase != OverlayPhase::Showing {
            return Vec::new();
        }
        vec![Effect::FetchQuestion, Effect::ClearJustification]
    }

    fn on_stable_foreign(&mut self) -> Vec<Effect> {
        match (self.mode, self.phase) {
            // Anti-gaming: a genuine switch away and back regenerates the
            // question instead of freeing the user.
            (OverlayMode::Challenge, OverlayPhase::Showing) if self.regenerate_on_switch => vec![
                Effect::FetchQuestion,
                Effect::ClearJustification,
                status("New question (app switch detected).", false),
            ],
            // A submission is in flight; let it resolve.
            (_, OverlayPhase::Granted) => Vec::new(),
            (OverlayMode::Challenge, OverlayPhase::Validating) if self.regenerate_on_switch => {
                Vec::new()
            }
            _ => self.dismiss(DismissCause::LeftForAnotherApp),
        }
    }

    fn dismiss(&mut self, cause: DismissCause) -> Vec<Effect> {
        self.phase = OverlayPhase::Dismissing;
        vec![Effect::Dismiss(cause)]
    }
}

fn status(message: &str, error: bool) -> Effect {
    Effect::ShowStatus {
        message: message.to_string(),
        error,
    }
}
