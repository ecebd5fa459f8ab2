pub mod config;
pub mod run;
pub mod scripts;

use std::path::Path;

use stagecall_core::{Config, ScriptLibrary};

/// The library named on the command line, else the configured one, else
/// the built-in experience.
pub fn load_library(
    explicit: Option<&Path>,
    config: &Config,
) -> Result<ScriptLibrary, Box<dyn std::error::Error>> {
    let path = explicit.or(config.scripts_path.as_deref());
    Ok(ScriptLibrary::load_or_builtin(path)?)
}
