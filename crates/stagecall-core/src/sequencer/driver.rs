//! Stage loop: activate, run entry actions, wait for the exit condition,
//! tear down, pick the successor.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::runtime::SignalKind;
use super::{ScriptOutcome, ScriptRuntime, Sender};
use crate::error::{CoreError, Result};
use crate::events::Event;
use crate::gesture::HoldGesture;
use crate::lock;
use crate::scheduler::{Cancelled, TeardownScope};
use crate::script::{EntryAction, ExitCondition, ExitOutcome, Script, Stage, StageId, Target};

/// What a stage's actions and exit wait run against.
pub(super) struct StageContext<'a> {
    pub(super) script: &'a Script,
    pub(super) script_scope: &'a TeardownScope,
    pub(super) scope: TeardownScope,
    pub(super) epoch: u64,
}

impl ScriptRuntime {
    pub(super) async fn drive_stages(
        &self,
        script: &Script,
        script_scope: &TeardownScope,
    ) -> Result<ScriptOutcome> {
        let mut stage = script.entry_stage().ok_or_else(|| CoreError::ScriptExhausted {
            script: script.id.to_string(),
            stage: StageId::new("<entry>"),
        })?;

        loop {
            if script_scope.is_closed() {
                return Err(Cancelled.into());
            }
            let ctx = self.activate(script, &stage.id, script_scope);
            let exit = self.run_stage(&ctx, stage).await;
            self.deactivate(&stage.id, &ctx);
            let outcome = exit?;

            let Some(target) = self.decide(script, stage, &outcome) else {
                error!(script = %script.id, stage = %stage.id, "no successor and no terminal handoff");
                return Err(CoreError::ScriptExhausted {
                    script: script.id.to_string(),
                    stage: stage.id.clone(),
                });
            };
            match target {
                Target::Stage { id } => {
                    stage = script.stage(&id).ok_or_else(|| CoreError::ScriptExhausted {
                        script: script.id.to_string(),
                        stage: id.clone(),
                    })?;
                }
                Target::Terminal { destination } => {
                    self.hand_off(&destination, script_scope)?;
                    return Ok(ScriptOutcome::HandedOff { destination });
                }
                Target::End => return Ok(ScriptOutcome::Ended),
            }
        }
    }

    /// Make `stage_id` current under a fresh child scope.
    pub(super) fn activate<'a>(
        &self,
        script: &'a Script,
        stage_id: &StageId,
        script_scope: &'a TeardownScope,
    ) -> StageContext<'a> {
        let scope = script_scope.child(format!("stage:{stage_id}"));
        let epoch = {
            let mut state = lock(&self.shared.state);
            state.epoch += 1;
            state.stage_id = Some(stage_id.clone());
            state.stage_scope = Some(scope.clone());
            state.clear_stage_surface();
            state.epoch
        };
        info!(script = %script.id, stage = %stage_id, epoch, "stage entered");
        self.emit(Event::StageEntered {
            stage_id: stage_id.clone(),
            epoch,
            at: Utc::now(),
        });
        self.publish();
        StageContext {
            script,
            script_scope,
            scope,
            epoch,
        }
    }

    /// Close the stage scope before anything else can run.
    pub(super) fn deactivate(&self, stage_id: &StageId, ctx: &StageContext<'_>) {
        let cancelled = ctx.scope.close();
        {
            let mut state = lock(&self.shared.state);
            if state.epoch == ctx.epoch {
                state.stage_scope = None;
                state.clear_stage_surface();
            }
        }
        info!(stage = %stage_id, epoch = ctx.epoch, cancelled, "stage exited");
        self.emit(Event::StageExited {
            stage_id: stage_id.clone(),
            epoch: ctx.epoch,
            cancelled,
            at: Utc::now(),
        });
        self.publish();
    }

    async fn run_stage(&self, ctx: &StageContext<'_>, stage: &Stage) -> Result<ExitOutcome> {
        for action in &stage.actions {
            self.run_action(ctx, action).await?;
        }
        self.await_exit(ctx, &stage.exit).await
    }

    async fn run_action(&self, ctx: &StageContext<'_>, action: &EntryAction) -> Result<()> {
        let media = &self.shared.media;
        match action {
            EntryAction::EmitLog { text } => {
                self.emit(Event::LogEmitted {
                    text: text.clone(),
                    at: Utc::now(),
                });
                self.append(Sender::System, text);
            }
            EntryAction::SetStatus { text } => {
                lock(&self.shared.state).status_text = Some(text.clone());
                self.emit(Event::StatusChanged {
                    text: text.clone(),
                    at: Utc::now(),
                });
                self.publish();
            }
            EntryAction::SetFlag { flag, value } => self.set_flag(flag, *value),
            EntryAction::PlayMedia { resource } => {
                media.play(resource);
            }
            EntryAction::StopMedia { resource } => media.stop(resource),
            EntryAction::WarmUp { resources } => {
                let ids = if resources.is_empty() {
                    ctx.script.resource_ids()
                } else {
                    resources.clone()
                };
                media.warm_up_all(&ids);
            }
            EntryAction::ChainMedia { from, to, gap_ms } => {
                media.chain(from, to, Duration::from_millis(*gap_ms), &ctx.scope);
            }
            EntryAction::AwaitMediaEnd { resource } => {
                media.wait_ended(resource, &ctx.scope).await?;
            }
            EntryAction::ArmCue {
                resource,
                at_ms,
                flag,
            } => {
                let runtime = self.clone();
                let epoch = ctx.epoch;
                let flag = flag.clone();
                media.arm_cue(resource, Duration::from_millis(*at_ms), &ctx.scope, move || {
                    if runtime.current_epoch() == epoch {
                        runtime.set_flag(&flag, true);
                    } else {
                        runtime.ignore_stale(epoch);
                    }
                });
            }
            EntryAction::Wait { ms } => {
                ctx.scope.after(Duration::from_millis(*ms)).await?;
            }
            EntryAction::AnimateMeter {
                from,
                to,
                duration_ms,
            } => {
                let runtime = self.clone();
                let (from, to) = (*from, *to);
                let duration = Duration::from_millis(*duration_ms);
                ctx.scope.spawn(async move { runtime.animate_meter(from, to, duration).await });
            }
            EntryAction::StartClock => {
                let already = {
                    let mut state = lock(&self.shared.state);
                    std::mem::replace(&mut state.clock_running, true)
                };
                if already {
                    debug!("clock already running");
                } else {
                    let runtime = self.clone();
                    ctx.script_scope.spawn(async move { runtime.run_clock().await });
                }
            }
        }
        Ok(())
    }

    async fn await_exit(&self, ctx: &StageContext<'_>, exit: &ExitCondition) -> Result<ExitOutcome> {
        let media = &self.shared.media;
        let scope = &ctx.scope;
        let outcome = match exit {
            ExitCondition::Immediate => ExitOutcome::Immediate,
            ExitCondition::Elapsed { ms } => {
                scope.after(Duration::from_millis(*ms)).await?;
                ExitOutcome::Elapsed
            }
            ExitCondition::GestureComplete { threshold_ms } => {
                lock(&self.shared.state).gesture =
                    Some(HoldGesture::new(Duration::from_millis(*threshold_ms)));
                self.publish();
                self.wait_signal(ctx.epoch, scope, |kind| {
                    (kind == SignalKind::GestureCompleted).then_some(ExitOutcome::GestureCompleted)
                })
                .await?
            }
            ExitCondition::MediaTimeReached { resource, at_ms } => {
                media
                    .wait_cue(resource, Duration::from_millis(*at_ms), scope)
                    .await?;
                ExitOutcome::MediaTimeReached
            }
            ExitCondition::MediaEnded { resource } => {
                media.wait_ended(resource, scope).await?;
                ExitOutcome::MediaEnded
            }
            ExitCondition::OptionSelected { options } => {
                self.present_options(options);
                self.wait_signal(ctx.epoch, scope, |kind| match kind {
                    SignalKind::OptionSelected { index, label } => {
                        Some(ExitOutcome::OptionSelected { index, label })
                    }
                    _ => None,
                })
                .await?
            }
            ExitCondition::FormSubmitted { fields } => {
                lock(&self.shared.state).form_fields = fields.clone();
                self.publish();
                self.wait_signal(ctx.epoch, scope, |kind| match kind {
                    SignalKind::FormSubmitted { values } => Some(ExitOutcome::FormSubmitted { values }),
                    _ => None,
                })
                .await?
            }
        };
        Ok(outcome)
    }

    pub(super) fn present_options(&self, options: &[String]) {
        lock(&self.shared.state).options = options.to_vec();
        self.emit(Event::OptionsPresented {
            options: options.to_vec(),
            at: Utc::now(),
        });
        self.publish();
    }

    /// Decision function first, then the stage's static successor.
    fn decide(&self, script: &Script, stage: &Stage, outcome: &ExitOutcome) -> Option<Target> {
        let decider = lock(&self.shared.deciders)
            .get(&(script.id.clone(), stage.id.clone()))
            .map(Arc::clone);
        decider
            .and_then(|decide| (*decide)(outcome))
            .or_else(|| stage.next.as_ref()?.resolve(outcome))
    }

    /// Call the navigation service. At most once per script run, and never
    /// once the script's scope has been torn down.
    pub(super) fn hand_off(&self, destination: &str, script_scope: &TeardownScope) -> Result<()> {
        if script_scope.is_closed() {
            debug!(destination, "handoff after teardown dropped");
            return Err(Cancelled.into());
        }
        let first = {
            let mut state = lock(&self.shared.state);
            !std::mem::replace(&mut state.navigated, true)
        };
        if !first {
            warn!(destination, "duplicate handoff suppressed");
            return Ok(());
        }
        info!(destination, "advancing");
        self.emit(Event::AdvancedTo {
            destination: destination.to_string(),
            at: Utc::now(),
        });
        self.shared.navigator.advance_to(destination);
        Ok(())
    }

    async fn animate_meter(self, from: f64, to: f64, duration: Duration) {
        let start = Instant::now();
        let mut ticker = tokio::time::interval(self.shared.config.meter_tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let fraction = if duration.is_zero() {
                1.0
            } else {
                (start.elapsed().as_secs_f64() / duration.as_secs_f64()).min(1.0)
            };
            self.set_meter(from + (to - from) * fraction);
            if fraction >= 1.0 {
                return;
            }
        }
    }

    async fn run_clock(self) {
        let second = Duration::from_secs(1);
        let mut ticker = tokio::time::interval_at(Instant::now() + second, second);
        loop {
            ticker.tick().await;
            lock(&self.shared.state).clock_secs += 1;
            self.publish();
        }
    }
}
