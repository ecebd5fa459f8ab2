//! Process-scoped script runtime.
//!
//! Flow flags (script running, audio unlocked, handoff done) are fields of
//! one [`RuntimeState`]. They are initialized when a script loads and torn
//! down when it completes or is abandoned. `audio_unlocked` and the warm
//! state of media resources survive across scripts.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{ScriptOutcome, Sender, Snapshot, Transcript};
use crate::error::{CoreError, Result};
use crate::events::Event;
use crate::gesture::HoldGesture;
use crate::lock;
use crate::media::{MediaNotice, MediaSynchronizer, PlayOutcome, SimulatedBackend};
use crate::navigation::Navigator;
use crate::scheduler::{CancelToken, Cancelled, TeardownScope};
use crate::script::{ExitOutcome, Script, ScriptId, ScriptLibrary, StageId, Target};
use crate::storage::Config;

/// Overrides a stage's static successor. Returning `None` falls back to it.
pub type Decider = Arc<dyn Fn(&ExitOutcome) -> Option<Target> + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub gesture_tick: Duration,
    pub meter_tick: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            gesture_tick: Duration::from_millis(16),
            meter_tick: Duration::from_millis(16),
        }
    }
}

impl From<&Config> for RuntimeConfig {
    fn from(config: &Config) -> Self {
        Self {
            gesture_tick: config.timing.gesture_tick(),
            meter_tick: config.timing.meter_tick(),
        }
    }
}

/// An intent that can satisfy an exit condition, stamped with its stage epoch.
#[derive(Debug, Clone)]
pub(super) struct Signal {
    pub(super) epoch: u64,
    pub(super) kind: SignalKind,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum SignalKind {
    GestureCompleted,
    OptionSelected { index: usize, label: String },
    FormSubmitted { values: Vec<String> },
}

#[derive(Debug, Default)]
pub(super) struct RuntimeState {
    pub(super) script_id: Option<ScriptId>,
    pub(super) running: bool,
    pub(super) epoch: u64,
    pub(super) stage_id: Option<StageId>,
    pub(super) script_scope: Option<TeardownScope>,
    pub(super) stage_scope: Option<TeardownScope>,
    pub(super) transcript: Transcript,
    pub(super) gesture: Option<HoldGesture>,
    pub(super) gesture_loop: Option<CancelToken>,
    pub(super) options: Vec<String>,
    pub(super) form_fields: Vec<String>,
    pub(super) form_values: BTreeMap<String, String>,
    pub(super) typing: bool,
    pub(super) status_text: Option<String>,
    pub(super) clock_secs: u64,
    pub(super) clock_running: bool,
    pub(super) meter: f64,
    pub(super) media_blocked: bool,
    pub(super) audio_unlocked: bool,
    pub(super) flags: BTreeMap<String, bool>,
    pub(super) navigated: bool,
}

impl RuntimeState {
    fn snapshot(&self) -> Snapshot {
        Snapshot {
            script_id: self.script_id.clone(),
            current_stage_id: self.stage_id.clone(),
            epoch: self.epoch,
            transcript: self.transcript.entries().to_vec(),
            gesture_progress: self.gesture.as_ref().map_or(0.0, HoldGesture::progress),
            gesture_phase: self.gesture.as_ref().map(HoldGesture::phase),
            media_is_blocked: self.media_blocked,
            numeric_meter_value: self.meter,
            options: self.options.clone(),
            form_fields: self.form_fields.clone(),
            typing: self.typing,
            status_text: self.status_text.clone(),
            clock_secs: self.clock_secs,
            audio_unlocked: self.audio_unlocked,
            flags: self.flags.clone(),
            running: self.running,
        }
    }

    /// Reset everything a script owns. Cross-script flags stay.
    fn load(&mut self, script: &ScriptId, scope: TeardownScope) {
        self.script_id = Some(script.clone());
        self.running = true;
        self.stage_id = None;
        self.script_scope = Some(scope);
        self.stage_scope = None;
        self.transcript = Transcript::new();
        self.clear_stage_surface();
        self.form_values.clear();
        self.status_text = None;
        self.clock_secs = 0;
        self.clock_running = false;
        self.meter = 0.0;
        self.media_blocked = false;
        self.flags.clear();
        self.navigated = false;
    }

    pub(super) fn clear_stage_surface(&mut self) {
        self.gesture = None;
        if let Some(token) = self.gesture_loop.take() {
            token.cancel();
        }
        self.options.clear();
        self.form_fields.clear();
        self.typing = false;
    }
}

pub(super) struct Shared {
    pub(super) library: ScriptLibrary,
    pub(super) media: Arc<MediaSynchronizer>,
    pub(super) navigator: Arc<dyn Navigator>,
    pub(super) config: RuntimeConfig,
    pub(super) state: Mutex<RuntimeState>,
    snapshot_tx: watch::Sender<Snapshot>,
    events_tx: broadcast::Sender<Event>,
    signal_tx: mpsc::UnboundedSender<Signal>,
    pub(super) signal_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Signal>>,
    pub(super) deciders: Mutex<HashMap<(ScriptId, StageId), Decider>>,
    pub(super) root: TeardownScope,
}

/// Handle to the runtime. Cheap to clone; all clones drive the same state.
#[derive(Clone)]
pub struct ScriptRuntime {
    pub(super) shared: Arc<Shared>,
}

impl ScriptRuntime {
    pub fn new(
        library: ScriptLibrary,
        media: Arc<MediaSynchronizer>,
        navigator: Arc<dyn Navigator>,
        config: RuntimeConfig,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(Snapshot::default());
        let (events_tx, _) = broadcast::channel(1024);
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            library,
            media,
            navigator,
            config,
            state: Mutex::new(RuntimeState::default()),
            snapshot_tx,
            events_tx,
            signal_tx,
            signal_rx: tokio::sync::Mutex::new(signal_rx),
            deciders: Mutex::new(HashMap::new()),
            root: TeardownScope::new("runtime"),
        });

        let weak: Weak<Shared> = Arc::downgrade(&shared);
        shared.media.set_notice_hook(Arc::new(move |notice: MediaNotice| {
            if let Some(shared) = weak.upgrade() {
                ScriptRuntime { shared }.on_media_notice(notice);
            }
        }));
        Self { shared }
    }

    /// A runtime over a fresh [`SimulatedBackend`] configured from `config`.
    pub fn simulated(
        library: ScriptLibrary,
        config: &Config,
        navigator: Arc<dyn Navigator>,
    ) -> (Self, SimulatedBackend) {
        let backend = SimulatedBackend::new(config.media.autoplay, config.media.activation_window());
        let media = Arc::new(MediaSynchronizer::new(
            Arc::new(backend.clone()),
            config.timing.cue_poll(),
        ));
        let runtime = Self::new(library, media, navigator, RuntimeConfig::from(config));
        (runtime, backend)
    }

    /// Supply a decision function for one stage of one script.
    pub fn with_decider<F>(
        self,
        script: impl Into<ScriptId>,
        stage: impl Into<StageId>,
        decider: F,
    ) -> Self
    where
        F: Fn(&ExitOutcome) -> Option<Target> + Send + Sync + 'static,
    {
        lock(&self.shared.deciders).insert((script.into(), stage.into()), Arc::new(decider));
        self
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn library(&self) -> &ScriptLibrary {
        &self.shared.library
    }

    pub fn media(&self) -> &Arc<MediaSynchronizer> {
        &self.shared.media
    }

    pub fn snapshot(&self) -> Snapshot {
        lock(&self.shared.state).snapshot()
    }

    /// Snapshot feed for the presentation layer.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.shared.snapshot_tx.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.shared.events_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.shared.state).running
    }

    /// Form values submitted during the current script, by field name.
    pub fn form_values(&self) -> BTreeMap<String, String> {
        lock(&self.shared.state).form_values.clone()
    }

    /// Waits, cue triggers and tasks still registered under the runtime.
    /// Zero once a script has finished.
    pub fn live_tokens(&self) -> usize {
        self.shared.root.live_tokens()
    }

    // ── Script lifecycle ─────────────────────────────────────────────

    /// Load `id` and run it on a spawned task.
    ///
    /// # Errors
    ///
    /// Fails at once if the script is unknown, another one is running or
    /// the runtime was shut down.
    pub fn start_script(
        &self,
        id: impl Into<ScriptId>,
    ) -> Result<JoinHandle<Result<ScriptOutcome>>> {
        let (script, run_id, scope) = self.begin(&id.into())?;
        let runtime = self.clone();
        Ok(tokio::spawn(async move {
            runtime.drive(script, run_id, scope).await
        }))
    }

    /// Load `id` and run it to completion.
    pub async fn run_script(&self, id: impl Into<ScriptId>) -> Result<ScriptOutcome> {
        let (script, run_id, scope) = self.begin(&id.into())?;
        self.drive(script, run_id, scope).await
    }

    /// Tear down the running script and everything it spawned. The runtime
    /// stays usable for the next script.
    pub fn abandon(&self) {
        let scope = lock(&self.shared.state).script_scope.take();
        let cancelled = scope.map_or(0, |scope| scope.close());
        self.shared.media.stop_all();
        debug!(cancelled, "script abandoned");
    }

    /// Tear down the running script and close the runtime for good. Later
    /// starts fail with [`CoreError::RuntimeClosed`].
    pub fn shutdown(&self) {
        let cancelled = self.shared.root.close();
        self.shared.media.stop_all();
        debug!(cancelled, "runtime shut down");
    }

    fn begin(&self, id: &ScriptId) -> Result<(Script, Uuid, TeardownScope)> {
        let script = self.shared.library.require(id)?.clone();
        let scope = {
            let mut state = lock(&self.shared.state);
            if self.shared.root.is_closed() {
                return Err(CoreError::RuntimeClosed);
            }
            if state.running {
                return Err(CoreError::ScriptAlreadyRunning(id.to_string()));
            }
            let scope = self.shared.root.child(format!("script:{id}"));
            state.load(id, scope.clone());
            scope
        };
        self.shared.media.load(&script.resources);

        let run_id = Uuid::new_v4();
        info!(script = %id, %run_id, "script started");
        self.emit(Event::ScriptStarted {
            script_id: id.to_string(),
            run_id,
            at: Utc::now(),
        });
        self.publish();
        Ok((script, run_id, scope))
    }

    async fn drive(
        &self,
        script: Script,
        run_id: Uuid,
        scope: TeardownScope,
    ) -> Result<ScriptOutcome> {
        let result = match &script.quiz {
            Some(quiz) => self.drive_quiz(&script, quiz, &scope).await,
            None => self.drive_stages(&script, &scope).await,
        };
        scope.close();

        let result = match result {
            Err(CoreError::Cancelled(Cancelled)) => Ok(ScriptOutcome::Abandoned),
            other => other,
        };
        self.finish(&script, run_id, &result);
        result
    }

    fn finish(&self, script: &Script, run_id: Uuid, result: &Result<ScriptOutcome>) {
        {
            let mut state = lock(&self.shared.state);
            state.running = false;
            state.stage_id = None;
            state.script_scope = None;
            state.stage_scope = None;
            state.clock_running = false;
            state.clear_stage_surface();
        }
        self.shared.media.stop_all();

        match result {
            Ok(outcome) => {
                info!(script = %script.id, ?outcome, "script finished");
                self.emit(Event::ScriptFinished {
                    script_id: script.id.to_string(),
                    run_id,
                    outcome: outcome.clone(),
                    at: Utc::now(),
                });
            }
            Err(e) => error!(script = %script.id, error = %e, "script halted"),
        }
        self.publish();
    }

    // ── Intents ──────────────────────────────────────────────────────

    fn user_gesture(&self) {
        self.shared.media.backend().notify_user_gesture();
    }

    /// Press started on the hold target.
    pub fn gesture_start(&self) {
        self.user_gesture();
        let started = {
            let mut state = lock(&self.shared.state);
            let epoch = state.epoch;
            let scope = state.stage_scope.clone();
            match state.gesture.as_mut() {
                Some(gesture) => gesture.start(Instant::now()).map(|event| (event, epoch, scope)),
                None => {
                    debug!("press ignored, no hold armed");
                    None
                }
            }
        };
        let Some((event, epoch, scope)) = started else {
            return;
        };
        self.emit(event);
        self.publish();

        if let Some(scope) = scope {
            let token = scope.spawn(self.clone().gesture_ticks(epoch));
            lock(&self.shared.state).gesture_loop = Some(token);
        }
    }

    async fn gesture_ticks(self, epoch: u64) {
        let mut ticker = tokio::time::interval(self.shared.config.gesture_tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let tick = {
                let mut state = lock(&self.shared.state);
                if state.epoch != epoch {
                    return;
                }
                let Some(gesture) = state.gesture.as_mut() else {
                    return;
                };
                if !gesture.is_holding() {
                    return;
                }
                gesture.tick(Instant::now())
            };
            self.publish();
            if let Some(event) = tick {
                self.emit(event);
                self.signal(epoch, SignalKind::GestureCompleted);
                return;
            }
        }
    }

    /// Press released.
    pub fn gesture_end(&self) {
        self.user_gesture();
        let (released, epoch) = {
            let mut state = lock(&self.shared.state);
            let epoch = state.epoch;
            let released = state.gesture.as_mut().and_then(|g| g.release(Instant::now()));
            if let Some(token) = state.gesture_loop.take() {
                token.cancel();
            }
            (released, epoch)
        };
        let Some(event) = released else {
            return;
        };
        let completed = matches!(event, Event::GestureCompleted { .. });
        self.emit(event);
        self.publish();
        if completed {
            self.signal(epoch, SignalKind::GestureCompleted);
        }
    }

    /// Select the exposed option at `index`.
    pub fn select_option(&self, index: usize) {
        self.user_gesture();
        let selected = {
            let mut state = lock(&self.shared.state);
            match state.options.get(index).cloned() {
                Some(label) => {
                    // Cleared at once so a second tap cannot resolve twice.
                    state.options.clear();
                    Some((label, state.epoch))
                }
                None => None,
            }
        };
        let Some((label, epoch)) = selected else {
            debug!(index, "selection ignored, no such option exposed");
            return;
        };
        self.emit(Event::OptionSelected {
            index,
            label: label.clone(),
            at: Utc::now(),
        });
        self.publish();
        self.signal(epoch, SignalKind::OptionSelected { index, label });
    }

    /// Select the exposed option whose label is `label`.
    pub fn option_selected(&self, label: &str) {
        let index = lock(&self.shared.state)
            .options
            .iter()
            .position(|o| o == label);
        match index {
            Some(index) => self.select_option(index),
            None => {
                self.user_gesture();
                debug!(label, "selection ignored, no such option exposed");
            }
        }
    }

    /// Submit the exposed form. Values pair with the exposed fields in order.
    pub fn submit_form<I, S>(&self, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.user_gesture();
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        let submitted = {
            let mut state = lock(&self.shared.state);
            if state.form_fields.is_empty() {
                None
            } else {
                let fields = std::mem::take(&mut state.form_fields);
                for (field, value) in fields.iter().zip(&values) {
                    state.form_values.insert(field.clone(), value.clone());
                }
                Some((fields, state.epoch))
            }
        };
        let Some((fields, epoch)) = submitted else {
            debug!("form submission ignored, no form exposed");
            return;
        };
        if fields.len() != values.len() {
            warn!(expected = fields.len(), got = values.len(), "form submitted with mismatched values");
        }
        self.emit(Event::FormSubmitted {
            fields,
            at: Utc::now(),
        });
        self.publish();
        self.signal(epoch, SignalKind::FormSubmitted { values });
    }

    /// The unlock overlay was tapped: retry the blocked resource.
    pub fn overlay_tapped(&self) {
        self.user_gesture();
        let unlocked = match self.shared.media.retry_blocked() {
            Some(PlayOutcome::Started) | None => true,
            Some(PlayOutcome::Blocked) | Some(PlayOutcome::Failed) => false,
        };
        if !unlocked {
            return;
        }
        let first = {
            let mut state = lock(&self.shared.state);
            let first = !state.audio_unlocked;
            state.audio_unlocked = true;
            first
        };
        if first {
            info!("audio unlocked");
            self.emit(Event::AudioUnlocked { at: Utc::now() });
        }
        self.publish();
    }

    // ── Internal ─────────────────────────────────────────────────────

    pub(super) fn publish(&self) {
        let snapshot = lock(&self.shared.state).snapshot();
        self.shared.snapshot_tx.send_replace(snapshot);
    }

    pub(super) fn emit(&self, event: Event) {
        // No subscribers is fine.
        let _ = self.shared.events_tx.send(event);
    }

    pub(super) fn signal(&self, epoch: u64, kind: SignalKind) {
        if self.shared.signal_tx.send(Signal { epoch, kind }).is_err() {
            debug!("signal dropped, runtime closed");
        }
    }

    pub(super) fn ignore_stale(&self, epoch: u64) {
        let current_epoch = lock(&self.shared.state).epoch;
        debug!(epoch, current_epoch, "stale event ignored");
        self.emit(Event::StaleEventIgnored {
            epoch,
            current_epoch,
            at: Utc::now(),
        });
    }

    /// Suspend until a signal of the current stage satisfies `accept`.
    /// Signals from other epochs are dropped.
    pub(super) async fn wait_signal<T, F>(
        &self,
        epoch: u64,
        scope: &TeardownScope,
        mut accept: F,
    ) -> std::result::Result<T, Cancelled>
    where
        F: FnMut(SignalKind) -> Option<T>,
    {
        let mut rx = self.shared.signal_rx.lock().await;
        loop {
            let signal = tokio::select! {
                biased;
                _ = scope.cancelled() => return Err(Cancelled),
                signal = rx.recv() => signal,
            };
            let Some(signal) = signal else {
                return Err(Cancelled);
            };
            if signal.epoch != epoch {
                self.ignore_stale(signal.epoch);
                continue;
            }
            let kind = signal.kind.clone();
            match accept(signal.kind) {
                Some(value) => return Ok(value),
                None => debug!(?kind, "signal does not satisfy the exit condition"),
            }
        }
    }

    pub(super) fn append(&self, sender: Sender, text: &str) {
        let entry = lock(&self.shared.state).transcript.push(sender, text);
        self.emit(Event::TranscriptAppended { entry });
        self.publish();
    }

    pub(super) fn set_flag(&self, flag: &str, value: bool) {
        lock(&self.shared.state).flags.insert(flag.to_string(), value);
        self.emit(Event::FlagSet {
            flag: flag.to_string(),
            value,
            at: Utc::now(),
        });
        self.publish();
    }

    pub(super) fn set_meter(&self, value: f64) {
        lock(&self.shared.state).meter = value;
        self.publish();
    }

    pub(super) fn set_typing(&self, typing: bool) {
        lock(&self.shared.state).typing = typing;
        self.publish();
    }

    pub(super) fn current_epoch(&self) -> u64 {
        lock(&self.shared.state).epoch
    }

    fn on_media_notice(&self, notice: MediaNotice) {
        let at = Utc::now();
        let event = match notice {
            MediaNotice::Started(resource) => Some(Event::MediaStarted { resource, at }),
            MediaNotice::Blocked(resource) => {
                lock(&self.shared.state).media_blocked = true;
                Some(Event::MediaBlocked { resource, at })
            }
            MediaNotice::Unblocked(resource) => {
                lock(&self.shared.state).media_blocked = false;
                Some(Event::MediaUnblocked { resource, at })
            }
            MediaNotice::BlockDismissed(resource) => {
                debug!(%resource, "pending playback retry dismissed");
                lock(&self.shared.state).media_blocked = false;
                None
            }
            MediaNotice::Warmed(resource) => Some(Event::MediaWarmed { resource, at }),
            MediaNotice::WarmUpRefused(resource) => Some(Event::WarmUpRefused { resource, at }),
            MediaNotice::CueFired { resource, at: cue } => Some(Event::CueFired {
                resource,
                at_ms: cue.as_millis() as u64,
                at,
            }),
        };
        if let Some(event) = event {
            self.emit(event);
        }
        self.publish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navigation::RecordingNavigator;

    const LIBRARY: &str = r#"
[[scripts]]
id = "pick"

[[scripts.stages]]
id = "question"
exit = { type = "option_selected", options = ["a", "b"] }
next = { type = "stage", id = "after" }

[[scripts.stages]]
id = "after"
exit = { type = "elapsed", ms = 60000 }
next = { type = "end" }

[[scripts]]
id = "jump"

[[scripts.stages]]
id = "go"
actions = [{ type = "emit_log", text = "hi" }]
next = { type = "terminal", destination = "/next" }
"#;

    fn runtime() -> (ScriptRuntime, Arc<RecordingNavigator>) {
        let library = ScriptLibrary::from_toml_str(LIBRARY).unwrap();
        let navigator = Arc::new(RecordingNavigator::new());
        let mut config = Config::default();
        config.media.autoplay = crate::media::AutoplayPolicy::Allowed;
        let (runtime, _) = ScriptRuntime::simulated(library, &config, navigator.clone());
        (runtime, navigator)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn stale_signal_is_ignored() {
        let (runtime, _) = runtime();
        let mut events = runtime.events();
        let _run = runtime.start_script("pick").unwrap();
        settle().await;

        let epoch = runtime.current_epoch();
        runtime.signal(
            epoch - 1,
            SignalKind::OptionSelected {
                index: 0,
                label: "a".into(),
            },
        );
        settle().await;
        assert_eq!(runtime.snapshot().current_stage_id, Some("question".into()));

        let mut stale = false;
        while let Ok(event) = events.try_recv() {
            if let Event::StaleEventIgnored { epoch: e, current_epoch, .. } = event {
                assert_eq!(e, epoch - 1);
                assert_eq!(current_epoch, epoch);
                stale = true;
            }
        }
        assert!(stale);

        runtime.select_option(1);
        settle().await;
        assert_eq!(runtime.snapshot().current_stage_id, Some("after".into()));
        runtime.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn second_selection_is_ignored() {
        let (runtime, _) = runtime();
        let _run = runtime.start_script("pick").unwrap();
        settle().await;

        runtime.select_option(0);
        runtime.select_option(1);
        settle().await;
        let snap = runtime.snapshot();
        assert_eq!(snap.current_stage_id, Some("after".into()));
        assert!(snap.options.is_empty());
        runtime.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_rejected_while_running() {
        let (runtime, _) = runtime();
        let _run = runtime.start_script("pick").unwrap();
        assert!(matches!(
            runtime.start_script("pick"),
            Err(CoreError::ScriptAlreadyRunning(_))
        ));
        assert!(matches!(
            runtime.start_script("ghost"),
            Err(CoreError::UnknownScript(_))
        ));
        runtime.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_abandons_running_script() {
        let (runtime, navigator) = runtime();
        let run = runtime.start_script("pick").unwrap();
        settle().await;
        runtime.shutdown();
        assert_eq!(run.await.unwrap().unwrap(), ScriptOutcome::Abandoned);
        assert!(!runtime.is_running());
        assert!(navigator.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_runtime_runs_the_next_script() {
        let (runtime, navigator) = runtime();
        let run = runtime.start_script("pick").unwrap();
        settle().await;
        runtime.abandon();
        assert_eq!(run.await.unwrap().unwrap(), ScriptOutcome::Abandoned);

        let outcome = runtime.run_script("jump").await.unwrap();
        assert_eq!(outcome.destination(), Some("/next"));
        assert_eq!(navigator.calls(), vec!["/next"]);
        assert_eq!(runtime.snapshot().transcript[0].text, "hi");
        assert_eq!(runtime.live_tokens(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn abandon_before_first_stage_skips_actions_and_handoff() {
        let (runtime, navigator) = runtime();
        let run = runtime.start_script("jump").unwrap();
        runtime.abandon();
        assert_eq!(run.await.unwrap().unwrap(), ScriptOutcome::Abandoned);
        assert!(navigator.calls().is_empty());
        assert!(runtime.snapshot().transcript.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_rejects_later_scripts() {
        let (runtime, navigator) = runtime();
        let run = runtime.start_script("pick").unwrap();
        settle().await;
        runtime.shutdown();
        assert_eq!(run.await.unwrap().unwrap(), ScriptOutcome::Abandoned);

        assert!(matches!(
            runtime.start_script("jump"),
            Err(CoreError::RuntimeClosed)
        ));
        assert!(matches!(
            runtime.run_script("jump").await,
            Err(CoreError::RuntimeClosed)
        ));
        settle().await;
        assert!(navigator.calls().is_empty());
        assert!(!runtime.is_running());
        assert!(runtime.snapshot().transcript.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn overlay_tap_without_pending_retry_unlocks_audio() {
        let (runtime, _) = runtime();
        runtime.overlay_tapped();
        assert!(runtime.snapshot().audio_unlocked);
    }
}
