use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use stagecall_core::media::AutoplayPolicy;
use stagecall_core::{ChannelNavigator, Config, Event, ScriptId, ScriptOutcome, ScriptRuntime};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

use super::load_library;
use crate::viewer::Viewer;

#[derive(Args)]
pub struct RunArgs {
    /// Script to start with (defaults to `entry_script` from the config)
    #[arg(long)]
    pub script: Option<String>,
    /// Stop after the first script instead of following destinations
    #[arg(long)]
    pub once: bool,
    /// Option index the viewer picks (defaults to the last option)
    #[arg(long)]
    pub choose: Option<usize>,
    /// Print events as JSON lines
    #[arg(long)]
    pub json: bool,
    /// Autoplay policy of the simulated backend: allowed | requires_gesture
    #[arg(long, value_parser = parse_policy)]
    pub autoplay: Option<AutoplayPolicy>,
    /// Script library to load instead of the configured one
    #[arg(long)]
    pub library: Option<PathBuf>,
}

fn parse_policy(value: &str) -> Result<AutoplayPolicy, String> {
    match value {
        "allowed" => Ok(AutoplayPolicy::Allowed),
        "requires_gesture" | "requires-gesture" => Ok(AutoplayPolicy::RequiresGesture),
        other => Err(format!(
            "unknown policy '{other}' (expected allowed or requires_gesture)"
        )),
    }
}

pub fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::load()?;
    if let Some(policy) = args.autoplay {
        config.media.autoplay = policy;
    }
    let library = load_library(args.library.as_deref(), &config)?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_experience(args, config, library))
}

async fn run_experience(
    args: RunArgs,
    config: Config,
    library: stagecall_core::ScriptLibrary,
) -> Result<(), Box<dyn std::error::Error>> {
    let (navigator, mut destinations) = ChannelNavigator::new();
    let (runtime, _backend) = ScriptRuntime::simulated(library, &config, Arc::new(navigator));
    let viewer = Viewer::new(args.choose).spawn(runtime.clone());

    let mut script = ScriptId::new(args.script.unwrap_or_else(|| config.entry_script.clone()));
    let result = loop {
        let outcome = match run_one(&runtime, &script, args.json).await {
            Ok(outcome) => outcome,
            Err(e) => break Err(e),
        };
        if args.once {
            break Ok(());
        }
        let ScriptOutcome::HandedOff { .. } = outcome else {
            break Ok(());
        };
        let Ok(destination) = destinations.try_recv() else {
            warn!("script handed off but no destination was received");
            break Ok(());
        };
        match runtime.library().by_route(&destination) {
            Some(next) => script = next.id.clone(),
            None => {
                info!(%destination, "no script mounted at destination");
                if !args.json {
                    println!("-> {destination} (end of experience)");
                }
                break Ok(());
            }
        }
    };

    viewer.abort();
    runtime.shutdown();
    result
}

async fn run_one(
    runtime: &ScriptRuntime,
    script: &ScriptId,
    json: bool,
) -> Result<ScriptOutcome, Box<dyn std::error::Error>> {
    let mut events = runtime.events();
    let mut handle = runtime.start_script(script.clone())?;

    let outcome = loop {
        tokio::select! {
            result = &mut handle => break result??,
            event = events.recv() => match event {
                Ok(event) => print_event(&event, json)?,
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event printer lagged"),
                Err(RecvError::Closed) => {}
            },
        }
    };
    drain(&mut events, json)?;
    Ok(outcome)
}

fn drain(
    events: &mut broadcast::Receiver<Event>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    while let Ok(event) = events.try_recv() {
        print_event(&event, json)?;
    }
    Ok(())
}

fn print_event(event: &Event, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string(event)?);
    } else if let Some(line) = describe(event) {
        println!("{line}");
    }
    Ok(())
}

fn describe(event: &Event) -> Option<String> {
    let line = match event {
        Event::ScriptStarted { script_id, .. } => format!("== {script_id}"),
        Event::ScriptFinished { outcome, .. } => match outcome {
            ScriptOutcome::HandedOff { destination } => format!("== finished -> {destination}"),
            ScriptOutcome::Ended => "== finished".to_string(),
            ScriptOutcome::Abandoned => "== abandoned".to_string(),
        },
        Event::StageEntered { stage_id, .. } => format!("[{stage_id}]"),
        Event::StatusChanged { text, .. } => format!("  status: {text}"),
        Event::TranscriptAppended { entry } => match entry.sender {
            stagecall_core::Sender::System => format!("  {}", entry.text),
            stagecall_core::Sender::User => format!("  > {}", entry.text),
        },
        Event::MediaStarted { resource, .. } => format!("  playing {resource}"),
        Event::MediaBlocked { resource, .. } => format!("  blocked {resource} (tap to unlock)"),
        Event::AudioUnlocked { .. } => "  audio unlocked".to_string(),
        Event::OptionsPresented { options, .. } => format!("  options: {}", options.join(" | ")),
        Event::OptionSelected { label, .. } => format!("  chose {label}"),
        Event::GestureCompleted { .. } => "  hold complete".to_string(),
        Event::FormSubmitted { fields, .. } => format!("  submitted {}", fields.join(", ")),
        Event::FlagSet { flag, value, .. } => format!("  {flag} = {value}"),
        _ => return None,
    };
    Some(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_parses_both_spellings() {
        assert_eq!(parse_policy("allowed"), Ok(AutoplayPolicy::Allowed));
        assert_eq!(
            parse_policy("requires-gesture"),
            Ok(AutoplayPolicy::RequiresGesture)
        );
        assert!(parse_policy("never").is_err());
    }

    #[test]
    fn internal_events_are_not_printed() {
        let event = Event::StaleEventIgnored {
            epoch: 1,
            current_epoch: 2,
            at: chrono::Utc::now(),
        };
        assert!(describe(&event).is_none());
    }
}
