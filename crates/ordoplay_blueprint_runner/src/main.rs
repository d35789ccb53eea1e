// SPDX-License-Identifier: MIT OR Apache-2.0
//! Headless runner for `OrdoPlay` blueprints.
//!
//! Builds the demo graphs, compiles them and runs the top-level "Run" port.
//! An optional argument names an engine settings file (RON).

mod demo;
mod nodes;

use demo::Demo;
use ordoplay_blueprint::library::LibraryError;
use ordoplay_blueprint::settings::SettingsError;
use ordoplay_blueprint::{Blueprint, CompileErrors, Compiler, EngineSettings, RuntimeError};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Failure of a runner session
#[derive(Debug, thiserror::Error)]
enum RunnerError {
    /// Settings file could not be used
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// Demo graphs could not be built
    #[error(transparent)]
    Library(#[from] LibraryError),

    /// Compilation failed
    #[error(transparent)]
    Compile(#[from] CompileErrors),

    /// Execution failed
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

fn run(settings_path: Option<PathBuf>) -> Result<(), RunnerError> {
    let settings = match settings_path {
        Some(path) => {
            tracing::info!("Loading settings from {}", path.display());
            EngineSettings::load(&path)?
        }
        None => EngineSettings::default(),
    };

    let demo = Demo::build()?;
    let mut compiler = Compiler::new(settings.compiler.clone());
    let compiled = compiler
        .compile(&demo.library, &demo.tree, demo.main)
        .inspect_err(|errors| {
            for error in errors.iter() {
                tracing::error!("{error}");
            }
        })?;

    let mut blueprint = Blueprint::new(compiled, settings.runtime);
    blueprint.initialize()?;
    let result = blueprint.call_signature(0);
    for exit in blueprint.take_signature_exits() {
        let name = blueprint
            .compiled()
            .signature()
            .ports
            .get(exit)
            .map_or("?", |port| port.name.as_str());
        tracing::info!("Reached exit \"{name}\"");
    }
    blueprint.deinitialize()?;
    Ok(result?)
}

fn main() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,ordoplay_blueprint=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting OrdoPlay blueprint runner v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(std::env::args_os().nth(1).map(PathBuf::from)) {
        tracing::error!("Runner failed: {e}");
        std::process::exit(1);
    }
}
