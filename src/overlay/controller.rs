//! Drives one blocking overlay from breach to dismissal.
//!
//! Each block runs as its own task: it owns the surface, feeds the state
//! machine from four sources (UI input, liveness probes, timers, validation
//! results), and executes the effects the machine returns.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::challenge::{
    ExtensionRequest, ExtensionValidator, QuestionProvider, DEFAULT_REQUESTED_MINUTES,
};
use crate::detector::{Detection, PackageFilter, PollingDetector, StabilityGate};
use crate::events::{EventBus, GovernorEvent};
use crate::oracle::UsageOracle;
use crate::overlay::state::{
    DismissCause, Effect, OverlayInput, OverlayMachine, OverlayMode,
};
use crate::overlay::surface::{BlockView, OverlaySurface, SurfaceProvider};
use crate::state::SharedState;

/// Hard ceiling on overlay lifetime; past this the block tears itself down
/// no matter what state the challenge is in.
pub const SAFETY_TIMEOUT: Duration = Duration::from_secs(120);
/// How often the liveness probe re-checks the foreground app.
pub const LIVENESS_INTERVAL: Duration = Duration::from_secs(2);
/// Consecutive identical liveness readings before acting on them.
pub const LIVENESS_STABILITY: u32 = 2;
/// Pause between a wrong answer and the replacement question.
pub const WRONG_ANSWER_DELAY: Duration = Duration::from_secs(2);
/// How long the grant success message stays up before teardown.
pub const GRANT_DISPLAY_DELAY: Duration = Duration::from_millis(1_500);

/// Collaborators an overlay task needs; cheap to clone per block.
#[derive(Clone)]
pub struct OverlayDeps {
    pub state: SharedState,
    pub bus: EventBus,
    pub questions: Arc<QuestionProvider>,
    pub validator: Arc<ExtensionValidator>,
    pub oracle: Arc<dyn UsageOracle>,
    pub filter: Arc<PackageFilter>,
    pub surfaces: Arc<dyn SurfaceProvider>,
}

/// Parameters for one block.
#[derive(Debug, Clone)]
pub struct BlockRequest {
    pub package: String,
    pub app_name: String,
    pub limit_minutes: u32,
    pub mode: OverlayMode,
    pub regenerate_on_switch: bool,
}

/// UI-facing handle to a live overlay. The host view layer forwards user
/// gestures through this; everything else about the overlay is internal.
#[derive(Clone)]
pub struct OverlayHandle {
    package: String,
    tx: mpsc::UnboundedSender<OverlayInput>,
}

impl OverlayHandle {
    pub fn package(&self) -> &str {
        &self.package
    }

    /// True once the overlay task has torn down; gestures sent through a
    /// closed handle go nowhere.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn submit(&self, answer: Option<String>, justification: String) {
        let _ = self.tx.send(OverlayInput::Submit {
            answer,
            justification,
        });
    }

    pub fn press_home(&self) {
        let _ = self.tx.send(OverlayInput::HomePressed);
    }

    pub fn press_settings(&self) {
        let _ = self.tx.send(OverlayInput::SettingsPressed);
    }
}

/// Spawn the overlay task for a breach the caller has already stamped as
/// blocked in the limit store.
pub fn spawn_overlay(
    deps: OverlayDeps,
    request: BlockRequest,
    cancel: CancellationToken,
) -> (OverlayHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = OverlayHandle {
        package: request.package.clone(),
        tx: tx.clone(),
    };
    let task = tokio::spawn(run_overlay(deps, request, tx, rx, cancel));
    (handle, task)
}

async fn run_overlay(
    deps: OverlayDeps,
    request: BlockRequest,
    tx: mpsc::UnboundedSender<OverlayInput>,
    mut rx: mpsc::UnboundedReceiver<OverlayInput>,
    cancel: CancellationToken,
) {
    let mut surface = match deps.surfaces.acquire() {
        Ok(surface) => surface,
        Err(err) => {
            log::error!(
                "no overlay surface available for {}: {err:#}",
                request.package
            );
            abandon_block(&deps, &request.package).await;
            return;
        }
    };
    let view = BlockView {
        package: request.package.clone(),
        app_name: request.app_name.clone(),
        limit_minutes: request.limit_minutes,
        mode: request.mode,
    };
    if let Err(err) = surface.show(&view) {
        log::error!("overlay surface rejected block for {}: {err:#}", request.package);
        abandon_block(&deps, &request.package).await;
        return;
    }
    deps.bus.publish(GovernorEvent::OverlayShown {
        package: request.package.clone(),
    });
    log::info!(
        "overlay shown for {} (mode {:?})",
        request.package,
        request.mode
    );

    let mut machine = OverlayMachine::new(request.mode, request.regenerate_on_switch);
    if request.mode == OverlayMode::Challenge {
        surface.set_submit_enabled(false);
        fetch_question(&deps, &tx);
    }

    let detector = Arc::new(PollingDetector::new(Arc::clone(&deps.filter)));
    let mut gate = StabilityGate::new(LIVENESS_STABILITY);
    let mut liveness = interval(LIVENESS_INTERVAL);
    liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let safety = sleep_until(Instant::now() + SAFETY_TIMEOUT);
    tokio::pin!(safety);

    loop {
        let input = tokio::select! {
            _ = cancel.cancelled() => OverlayInput::Cancelled,
            _ = &mut safety => OverlayInput::SafetyTimeout,
            _ = liveness.tick() => {
                match probe_liveness(&deps, &detector, &mut gate, &request.package).await {
                    Some(input) => input,
                    None => continue,
                }
            }
            msg = rx.recv() => msg.unwrap_or(OverlayInput::Cancelled),
        };

        let effects = machine.handle(input);
        let mut done = false;
        for effect in effects {
            done |= apply_effect(&deps, &request, &tx, surface.as_mut(), effect).await;
        }
        if done {
            break;
        }
    }
}

/// Executes one machine effect. Returns true when the overlay is finished.
async fn apply_effect(
    deps: &OverlayDeps,
    request: &BlockRequest,
    tx: &mpsc::UnboundedSender<OverlayInput>,
    surface: &mut dyn OverlaySurface,
    effect: Effect,
) -> bool {
    match effect {
        Effect::ShowQuestion(question) => surface.show_question(&question),
        Effect::ShowStatus { message, error } => surface.show_status(&message, error),
        Effect::ClearJustification => surface.clear_justification(),
        Effect::SetSubmitEnabled(enabled) => surface.set_submit_enabled(enabled),
        Effect::BeginValidation(response) => {
            let validator = Arc::clone(&deps.validator);
            let extension = ExtensionRequest {
                package: request.package.clone(),
                app_name: request.app_name.clone(),
                response,
                requested_minutes: DEFAULT_REQUESTED_MINUTES,
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                let result = validator.validate(&extension).await;
                let _ = tx.send(OverlayInput::ValidationFinished(result));
            });
        }
        Effect::ScheduleRegenerate => {
            let tx = tx.clone();
            tokio::spawn(async move {
                sleep(WRONG_ANSWER_DELAY).await;
                let _ = tx.send(OverlayInput::RegenerateDue);
            });
        }
        Effect::FetchQuestion => {
            surface.set_submit_enabled(false);
            fetch_question(deps, tx);
        }
        Effect::ApplyGrant { minutes } => {
            let now_ms = Utc::now().timestamp_millis();
            let mut state = deps.state.lock().await;
            let accumulated = state.usage.accumulated_ms(&request.package, now_ms);
            if let Some(outcome) =
                state
                    .limits
                    .grant_extension(&request.package, minutes, accumulated, now_ms)
            {
                log::info!(
                    "extension granted for {}: +{} min, limit now {} min",
                    request.package,
                    outcome.granted_minutes,
                    outcome.new_limit_minutes
                );
                deps.bus.publish(GovernorEvent::ExtensionGranted {
                    package: request.package.clone(),
                    granted_minutes: outcome.granted_minutes,
                    new_limit_minutes: outcome.new_limit_minutes,
                });
            }
        }
        Effect::ScheduleGrantDismiss => {
            let tx = tx.clone();
            tokio::spawn(async move {
                sleep(GRANT_DISPLAY_DELAY).await;
                let _ = tx.send(OverlayInput::GrantDisplayDone);
            });
        }
        Effect::Dismiss(cause) => {
            surface.remove();
            let mut state = deps.state.lock().await;
            state.limits.mark_overlay_dismissed(&request.package);
            drop(state);
            log::info!("overlay dismissed for {}: {cause:?}", request.package);
            deps.bus.publish(GovernorEvent::OverlayDismissed {
                package: request.package.clone(),
            });
            return true;
        }
    }
    false
}

fn fetch_question(deps: &OverlayDeps, tx: &mpsc::UnboundedSender<OverlayInput>) {
    let questions = Arc::clone(&deps.questions);
    let tx = tx.clone();
    tokio::spawn(async move {
        let question = questions.next_question().await;
        let _ = tx.send(OverlayInput::QuestionReady(question));
    });
}

/// One liveness pass: probe the foreground app and debounce. The blocked
/// app itself, the governor package, and unreadable passes all reset the
/// streak; only a stable reading of somewhere else becomes an input.
async fn probe_liveness(
    deps: &OverlayDeps,
    detector: &Arc<PollingDetector>,
    gate: &mut StabilityGate,
    blocked_package: &str,
) -> Option<OverlayInput> {
    let oracle = Arc::clone(&deps.oracle);
    let detector = Arc::clone(detector);
    let now_ms = Utc::now().timestamp_millis();
    let detection = tokio::task::spawn_blocking(move || detector.detect(oracle.as_ref(), now_ms))
        .await
        .unwrap_or(Detection::Unknown);

    match detection {
        Detection::App(ref package) if package == blocked_package => {
            gate.reset();
            None
        }
        // Our own surface can register as the foreground "app".
        Detection::OwnPackage => {
            gate.reset();
            None
        }
        Detection::Launcher if gate.observe(&detection) => {
            gate.reset();
            Some(OverlayInput::StableLauncher)
        }
        Detection::App(_) if gate.observe(&detection) => {
            gate.reset();
            Some(OverlayInput::StableForeignApp)
        }
        _ => None,
    }
}

/// The surface never came up: clear the active flag so the monitor retries
/// on a later breach (the cooldown stamp stays).
async fn abandon_block(deps: &OverlayDeps, package: &str) {
    let mut state = deps.state.lock().await;
    state.limits.mark_overlay_dismissed(package);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use crate::challenge::{GeneratorConfig, ValidatorConfig};
    use crate::oracle::testing::FixedOracle;
    use crate::oracle::UsageSample;
    use crate::overlay::surface::testing::{RecordingProvider, SurfaceCall};
    use crate::state::shared_state;

    fn deps_with(
        calls: Arc<StdMutex<Vec<SurfaceCall>>>,
        oracle: Arc<dyn UsageOracle>,
        state: SharedState,
    ) -> OverlayDeps {
        OverlayDeps {
            state,
            bus: EventBus::new(),
            questions: Arc::new(QuestionProvider::new(GeneratorConfig {
                ai_enabled: false,
                ..GeneratorConfig::default()
            })),
            // Unreachable endpoint with a short timeout: validation resolves
            // through the local fallback heuristic.
            validator: Arc::new(ExtensionValidator::new(ValidatorConfig {
                endpoint: "http://127.0.0.1:9/v1/chat/completions".into(),
                request_timeout: Duration::from_millis(200),
                ..ValidatorConfig::default()
            })),
            oracle,
            filter: Arc::new(PackageFilter::new("dev.screenward")),
            surfaces: Arc::new(RecordingProvider { calls, fail: false }),
        }
    }

    fn block_request(mode: OverlayMode) -> BlockRequest {
        BlockRequest {
            package: "com.instagram.android".into(),
            app_name: "Instagram".into(),
            limit_minutes: 30,
            mode,
            regenerate_on_switch: false,
        }
    }

    fn foreground_sample(package: &str, now_ms: i64) -> UsageSample {
        UsageSample {
            package: package.into(),
            last_used_at: now_ms,
            total_foreground_ms: 5_000,
        }
    }

    async fn wait_for_remove(calls: &Arc<StdMutex<Vec<SurfaceCall>>>) {
        for _ in 0..200 {
            if calls.lock().unwrap().contains(&SurfaceCall::Remove) {
                return;
            }
            sleep(Duration::from_millis(25)).await;
        }
        panic!("overlay was never removed; calls: {:?}", calls.lock().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn simple_block_home_press_dismisses_and_clears_state() {
        let calls = Arc::new(StdMutex::new(Vec::new()));
        let state = shared_state();
        let oracle: Arc<dyn UsageOracle> = Arc::new(FixedOracle::new(Vec::new()));
        let deps = deps_with(Arc::clone(&calls), oracle, Arc::clone(&state));
        let mut events = deps.bus.subscribe();

        {
            let mut guard = state.lock().await;
            guard.limits.set_limit("com.instagram.android", 30);
            guard
                .limits
                .mark_blocked("com.instagram.android", Utc::now().timestamp_millis());
        }

        let (handle, task) = spawn_overlay(
            deps,
            block_request(OverlayMode::SimpleBlock),
            CancellationToken::new(),
        );
        tokio::task::yield_now().await;
        handle.press_home();
        task.await.unwrap();

        assert!(calls.lock().unwrap().contains(&SurfaceCall::Remove));
        assert!(!state.lock().await.limits.overlay_active("com.instagram.android"));
        assert_eq!(
            events.recv().await.unwrap(),
            GovernorEvent::OverlayShown {
                package: "com.instagram.android".into()
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            GovernorEvent::OverlayDismissed {
                package: "com.instagram.android".into()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn challenge_wrong_answer_keeps_block_and_home_press_ends_it() {
        let calls = Arc::new(StdMutex::new(Vec::new()));
        let state = shared_state();
        let now_ms = Utc::now().timestamp_millis();
        // Keep the blocked app in the foreground so liveness never fires.
        let oracle: Arc<dyn UsageOracle> = Arc::new(FixedOracle::new(vec![foreground_sample(
            "com.instagram.android",
            now_ms,
        )]));
        let deps = deps_with(Arc::clone(&calls), oracle, Arc::clone(&state));
        let mut events = deps.bus.subscribe();

        {
            let mut guard = state.lock().await;
            guard.limits.set_limit("com.instagram.android", 30);
            guard.usage.seed("com.instagram.android", 30 * 60_000);
            guard.limits.mark_blocked("com.instagram.android", now_ms);
        }

        let (handle, task) = spawn_overlay(
            deps,
            block_request(OverlayMode::Challenge),
            CancellationToken::new(),
        );

        // Let the bank question arrive.
        loop {
            tokio::task::yield_now().await;
            let got_question = calls
                .lock()
                .unwrap()
                .iter()
                .any(|c| matches!(c, SurfaceCall::Question(_)));
            if got_question {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        // Submit with an unknown answer: locally wrong, overlay stays.
        handle.submit(
            Some("definitely wrong".into()),
            "finishing a work conversation".into(),
        );
        tokio::task::yield_now().await;
        assert!(calls
            .lock()
            .unwrap()
            .iter()
            .any(|c| matches!(c, SurfaceCall::Status { error: true, .. })));
        assert!(state.lock().await.limits.overlay_active("com.instagram.android"));

        handle.press_home();
        task.await.unwrap();
        wait_for_remove(&calls).await;

        // Shown then dismissed; no grant happened.
        assert_eq!(
            events.recv().await.unwrap(),
            GovernorEvent::OverlayShown {
                package: "com.instagram.android".into()
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            GovernorEvent::OverlayDismissed {
                package: "com.instagram.android".into()
            }
        );
        let guard = state.lock().await;
        assert_eq!(
            guard.limits.limit_minutes("com.instagram.android"),
            Some(30)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stable_launcher_reading_dismisses_overlay() {
        let calls = Arc::new(StdMutex::new(Vec::new()));
        let state = shared_state();
        let oracle = Arc::new(FixedOracle::new(Vec::new()));
        let oracle_handle = Arc::clone(&oracle);
        let deps = deps_with(
            Arc::clone(&calls),
            oracle as Arc<dyn UsageOracle>,
            Arc::clone(&state),
        );

        {
            let mut guard = state.lock().await;
            guard.limits.set_limit("com.instagram.android", 30);
            guard
                .limits
                .mark_blocked("com.instagram.android", Utc::now().timestamp_millis());
        }

        let (_handle, task) = spawn_overlay(
            deps,
            block_request(OverlayMode::SimpleBlock),
            CancellationToken::new(),
        );
        tokio::task::yield_now().await;

        // The user goes home; two consecutive launcher readings confirm it.
        let now_ms = Utc::now().timestamp_millis();
        oracle_handle.set(vec![foreground_sample("com.android.launcher3", now_ms)]);

        task.await.unwrap();
        assert!(calls.lock().unwrap().contains(&SurfaceCall::Remove));
        assert!(!state.lock().await.limits.overlay_active("com.instagram.android"));
    }

    #[tokio::test(start_paused = true)]
    async fn safety_timeout_tears_down_a_stuck_overlay() {
        let calls = Arc::new(StdMutex::new(Vec::new()));
        let state = shared_state();
        let now_ms = Utc::now().timestamp_millis();
        let oracle: Arc<dyn UsageOracle> = Arc::new(FixedOracle::new(vec![foreground_sample(
            "com.instagram.android",
            now_ms,
        )]));
        let deps = deps_with(Arc::clone(&calls), oracle, Arc::clone(&state));

        {
            let mut guard = state.lock().await;
            guard.limits.set_limit("com.instagram.android", 30);
            guard.limits.mark_blocked("com.instagram.android", now_ms);
        }

        let (_handle, task) = spawn_overlay(
            deps,
            block_request(OverlayMode::SimpleBlock),
            CancellationToken::new(),
        );
        task.await.unwrap();
        assert!(calls.lock().unwrap().contains(&SurfaceCall::Remove));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_dismisses_immediately() {
        let calls = Arc::new(StdMutex::new(Vec::new()));
        let state = shared_state();
        let now_ms = Utc::now().timestamp_millis();
        let oracle: Arc<dyn UsageOracle> = Arc::new(FixedOracle::new(vec![foreground_sample(
            "com.instagram.android",
            now_ms,
        )]));
        let deps = deps_with(Arc::clone(&calls), oracle, Arc::clone(&state));

        {
            let mut guard = state.lock().await;
            guard.limits.set_limit("com.instagram.android", 30);
            guard.limits.mark_blocked("com.instagram.android", now_ms);
        }

        let cancel = CancellationToken::new();
        let (_handle, task) =
            spawn_overlay(deps, block_request(OverlayMode::SimpleBlock), cancel.clone());
        tokio::task::yield_now().await;
        cancel.cancel();
        task.await.unwrap();
        assert!(calls.lock().unwrap().contains(&SurfaceCall::Remove));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_surface_acquisition_abandons_the_block() {
        let calls = Arc::new(StdMutex::new(Vec::new()));
        let state = shared_state();
        let oracle: Arc<dyn UsageOracle> = Arc::new(FixedOracle::new(Vec::new()));
        let mut deps = deps_with(Arc::clone(&calls), oracle, Arc::clone(&state));
        deps.surfaces = Arc::new(RecordingProvider {
            calls: Arc::clone(&calls),
            fail: true,
        });

        let now_ms = Utc::now().timestamp_millis();
        {
            let mut guard = state.lock().await;
            guard.limits.set_limit("com.instagram.android", 30);
            guard.limits.mark_blocked("com.instagram.android", now_ms);
        }

        let (_handle, task) = spawn_overlay(
            deps,
            block_request(OverlayMode::SimpleBlock),
            CancellationToken::new(),
        );
        task.await.unwrap();

        let guard = state.lock().await;
        // Active flag cleared so a later breach can retry, cooldown stamp kept.
        assert!(!guard.limits.overlay_active("com.instagram.android"));
        assert!(guard
            .limits
            .block_state("com.instagram.android")
            .last_blocked_at
            .is_some());
        assert!(calls.lock().unwrap().is_empty());
    }
}
