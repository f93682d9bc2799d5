//! # Coordination
//!
//! Process-wide keyed singletons shared by every run: completion counters, scale groups, run
//! state, webhook mailboxes, step activity and active run ids. Each is a sharded map with per-key locking.

pub mod active_runs;
pub mod completion_counter;
pub mod run_state;
pub mod scale_group;
pub mod step_activity;
pub mod webhook;

pub use active_runs::{ActiveRunGuard, ActiveRunRegistry};
pub use completion_counter::CompletionCounterStore;
pub use run_state::{RunStateScope, RunStateStore};
pub use scale_group::{ConcurrencyGate, ScaleGroupPermit, ScaleGroupStatus};
pub use step_activity::{StepActivityGuard, StepActivityTracker};
pub use webhook::{SignalDelivery, WebhookGate, WebhookSignal, WebhookWaitTimeout};

use crate::config::MicroflowConfig;
use crate::state_machine::StepStateArena;
use std::sync::Arc;
use tracing::info;

/// Handles to every coordination singleton, cloned into each branch task
#[derive(Debug, Clone)]
pub struct CoordinationServices {
    pub counters: Arc<CompletionCounterStore>,
    pub gate: Arc<ConcurrencyGate>,
    pub run_states: Arc<RunStateStore>,
    pub webhooks: Arc<WebhookGate>,
    pub activity: Arc<StepActivityTracker>,
    pub arena: Arc<StepStateArena>,
    pub active_runs: Arc<ActiveRunRegistry>,
}

impl CoordinationServices {
    pub fn new(config: &MicroflowConfig) -> Self {
        let gate = ConcurrencyGate::new(
            config.scale_groups.default_max_instances,
            config.scale_groups.poll_interval(),
        );
        for (scale_group_id, max_instances) in &config.scale_groups.groups {
            gate.set_max(scale_group_id, *max_instances);
        }

        info!(
            scale_groups = config.scale_groups.groups.len(),
            "🔧 Coordination services initialized"
        );

        Self {
            counters: Arc::new(CompletionCounterStore::new()),
            gate: Arc::new(gate),
            run_states: Arc::new(RunStateStore::new(
                config.orchestration.pause_poll_interval(),
            )),
            webhooks: Arc::new(WebhookGate::with_limits(
                config.webhooks.buffered_signal_ttl(),
                config.webhooks.max_buffered_signals,
            )),
            activity: Arc::new(StepActivityTracker::new()),
            arena: Arc::new(StepStateArena::new()),
            active_runs: Arc::new(ActiveRunRegistry::new()),
        }
    }
}
