use std::path::PathBuf;

use clap::Subcommand;
use stagecall_core::{Config, ScriptId, ScriptLibrary};

use super::load_library;

#[derive(Subcommand)]
pub enum ScriptsAction {
    /// List the scripts of the active library
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print one script as JSON
    Show {
        /// Script id (e.g. "call", "quiz")
        id: String,
    },
    /// Parse and validate a script library file
    Validate {
        /// Path to a TOML script library
        path: PathBuf,
    },
}

pub fn run(action: ScriptsAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        ScriptsAction::List { json } => {
            let config = Config::load()?;
            let library = load_library(None, &config)?;
            if json {
                let rows: Vec<_> = library
                    .scripts
                    .iter()
                    .map(|s| {
                        serde_json::json!({
                            "id": s.id,
                            "route": s.route,
                            "kind": if s.is_quiz() { "quiz" } else { "stages" },
                            "stages": s.stages.len(),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                for script in &library.scripts {
                    let route = script.route.as_deref().unwrap_or("-");
                    let kind = if script.is_quiz() {
                        "quiz".to_string()
                    } else {
                        format!("{} stages", script.stages.len())
                    };
                    println!("{:<14} {:<12} {}", script.id, route, kind);
                }
            }
        }
        ScriptsAction::Show { id } => {
            let config = Config::load()?;
            let library = load_library(None, &config)?;
            let script = library.require(&ScriptId::new(id))?;
            println!("{}", serde_json::to_string_pretty(script)?);
        }
        ScriptsAction::Validate { path } => {
            let library = ScriptLibrary::load(&path)?;
            println!("ok: {} scripts", library.scripts.len());
        }
    }
    Ok(())
}
