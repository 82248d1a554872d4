pub mod chat;
pub mod config_cmd;
pub mod turn;

use nexus_config::GovernorConfig;
use nexus_core::identity::{FileIdentitySource, StaticIdentitySource};
use nexus_core::mood::InMemoryMoodStore;
use nexus_core::{IdentitySnapshot, IdentitySource, MemoryService};
use nexus_governor::Orchestrator;
use nexus_memory::{FileMemoryService, InMemoryMemoryService, NoopMemory};
use nexus_telemetry::TelemetryEngine;
use std::path::PathBuf;
use std::sync::Arc;

pub fn default_config_path() -> PathBuf {
    GovernorConfig::config_dir().join("config.toml")
}

/// Wire the collaborators named in `config` into an orchestrator.
pub fn build_orchestrator(config: &GovernorConfig) -> nexus_core::Result<Orchestrator> {
    let identity: Arc<dyn IdentitySource> = match &config.identity.dir {
        Some(dir) => Arc::new(FileIdentitySource::new(dir)),
        None => Arc::new(StaticIdentitySource::new(IdentitySnapshot::minimal_skeleton())),
    };

    let memory: Arc<dyn MemoryService> = match config.memory.backend.as_str() {
        "file" => {
            let path = config
                .memory
                .path
                .as_ref()
                .map(PathBuf::from)
                .unwrap_or_else(FileMemoryService::default_path);
            Arc::new(FileMemoryService::new(path))
        }
        "none" => Arc::new(NoopMemory),
        _ => Arc::new(InMemoryMemoryService::new()),
    };

    let provider = nexus_providers::build_from_config(&config.model)?;

    let telemetry = Arc::new(TelemetryEngine::with_capacity(config.telemetry.recent_turns));
    let orchestrator = Orchestrator::from_config(
        config,
        identity,
        Arc::new(InMemoryMoodStore::new()),
        memory,
        provider,
    )?
    .with_telemetry(telemetry);
    Ok(orchestrator)
}
