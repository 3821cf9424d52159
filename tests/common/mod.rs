//! Shared helpers for the integration suites
#![allow(dead_code)]

pub mod strategies;

use fleet_core::config::FleetConfig;
use fleet_core::orchestration::{JobManager, OrchestrationSystem};
use fleet_core::test_utils::{test_config, test_manager, ScriptedExecutor};
use std::sync::Arc;
use std::time::Duration;

/// Generous bound for anything that should happen "soon"
pub const WAIT: Duration = Duration::from_secs(5);

/// A started system over the fixture catalog, plus the executor for inspection
pub async fn started_system(
    config: FleetConfig,
    executor: ScriptedExecutor,
) -> (Arc<JobManager>, Arc<ScriptedExecutor>, OrchestrationSystem) {
    let executor = Arc::new(executor);
    let manager = test_manager(config, executor.clone());
    let system = OrchestrationSystem::start(manager.clone())
        .await
        .expect("orchestration system starts");
    (manager, executor, system)
}

/// `started_system` with the default test configuration
pub async fn default_system(
    executor: ScriptedExecutor,
) -> (Arc<JobManager>, Arc<ScriptedExecutor>, OrchestrationSystem) {
    started_system(test_config(), executor).await
}
