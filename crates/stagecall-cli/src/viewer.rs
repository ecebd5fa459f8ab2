//! Automated viewer: plays the part of the person in front of the screen.
//!
//! Watches the snapshot feed and answers whatever the current stage exposes,
//! at most once per stage epoch: taps the unlock overlay, picks an option,
//! holds the fingerprint until it completes, fills in forms.

use stagecall_core::{GesturePhase, ScriptRuntime, Snapshot};
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Default)]
struct Acted {
    epoch: u64,
    chose: bool,
    held: bool,
    filled: bool,
}

impl Acted {
    fn reset_for(&mut self, epoch: u64) {
        if self.epoch != epoch {
            *self = Acted {
                epoch,
                ..Acted::default()
            };
        }
    }
}

pub struct Viewer {
    choose: Option<usize>,
}

impl Viewer {
    pub fn new(choose: Option<usize>) -> Self {
        Self { choose }
    }

    pub fn spawn(self, runtime: ScriptRuntime) -> JoinHandle<()> {
        tokio::spawn(async move { self.watch(runtime).await })
    }

    async fn watch(self, runtime: ScriptRuntime) {
        let mut snapshots = runtime.subscribe();
        let mut acted = Acted::default();
        loop {
            let snapshot = snapshots.borrow_and_update().clone();
            self.react(&runtime, &snapshot, &mut acted);
            if snapshots.changed().await.is_err() {
                return;
            }
        }
    }

    fn react(&self, runtime: &ScriptRuntime, snapshot: &Snapshot, acted: &mut Acted) {
        if !snapshot.running {
            return;
        }
        acted.reset_for(snapshot.epoch);

        if snapshot.media_is_blocked {
            debug!("viewer taps the unlock overlay");
            runtime.overlay_tapped();
        }

        if !snapshot.options.is_empty() && !acted.chose {
            acted.chose = true;
            let index = self.pick(snapshot.options.len());
            debug!(index, "viewer picks an option");
            runtime.select_option(index);
        }

        match snapshot.gesture_phase {
            Some(GesturePhase::Idle) if !acted.held => {
                acted.held = true;
                debug!("viewer starts holding");
                runtime.gesture_start();
            }
            Some(GesturePhase::Completed) => runtime.gesture_end(),
            _ => {}
        }

        if !snapshot.form_fields.is_empty() && !acted.filled {
            acted.filled = true;
            let values: Vec<String> = snapshot
                .form_fields
                .iter()
                .map(|field| sample_value(field))
                .collect();
            runtime.submit_form(values);
        }
    }

    fn pick(&self, len: usize) -> usize {
        let last = len.saturating_sub(1);
        self.choose.map_or(last, |choice| choice.min(last))
    }
}

fn sample_value(field: &str) -> String {
    match field {
        "name" => "Visitante".into(),
        "whatsapp" => "11999990000".into(),
        "model" => "CG 160".into(),
        "version" => "Titan".into(),
        "year" => "2022".into(),
        other => format!("{other}-demo"),
    }
}
