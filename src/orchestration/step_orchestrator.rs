//! # Step Orchestrator
//!
//! Executes one compiled step for one run iteration and reports which children became ready.
//!
//! ## Lifecycle
//!
//! `Pending -> Admitted -> Executing -> {Succeeded | Failed} -> Propagated`, with `Halted` when a
//! stop is observed and `Skipped` when a custom step list excludes the step.
//!
//! 1. Run-state gate: paused suspends, stopped halts the branch, a step outside the global
//!    key's custom step list ends its branch without invoking its action or crediting children.
//! 2. Scale-group admission, held for the whole action invocation including retries.
//! 3. Action invocation with exponential backoff.
//! 4. Failure policy: `stop_on_failure` ends the branch, otherwise children are credited.
//! 5. Webhook wait after success; the signal's action may select another child set.
//! 6. Fan-out: a child is ready when this parent's increment reaches the edge threshold.
//!
//! Every suspension point (paused wait, admission, backoff sleep, webhook wait) is raced
//! against an observed stop. In-flight HTTP calls are not cancelled.

use crate::config::MicroflowConfig;
use crate::constants::system::WEBHOOK_ROUTE;
use crate::coordination::CoordinationServices;
use crate::error::{MicroflowError, Result};
use crate::logging::log_step_operation;
use crate::models::{
    ChildRef, CompiledGraph, CompiledStep, CompiledWebhook, HttpAction, HttpMethod, RetryPolicy,
    RunObject, StepAction,
};
use crate::orchestration::action::{
    render_placeholders, ActionInvoker, ActionPostData, ActionRequest, PlaceholderValues,
    TransportError,
};
use crate::orchestration::backoff_calculator::{delay_for_retry, retry_deadline};
use crate::state_machine::{RunState, StepEvent};
use crate::storage::{AuditLog, ErrorLogEntry, StepLogEntry, StepOutcome};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Result of one step execution that did not end its branch with an error
#[derive(Debug, Clone, PartialEq)]
pub struct StepCompletion {
    pub step_id: i32,
    pub outcome: StepOutcome,
    pub attempts: u32,
    /// Children whose join threshold was reached by this completion
    pub ready_children: Vec<i32>,
}

/// Defaults applied when a step leaves a timeout unset
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    pub default_action_timeout: Duration,
    pub default_webhook_timeout: Duration,
    pub base_url: Option<String>,
}

impl OrchestratorSettings {
    pub fn from_config(config: &MicroflowConfig) -> Self {
        Self {
            default_action_timeout: config.orchestration.default_action_timeout(),
            default_webhook_timeout: config.webhooks.default_timeout(),
            base_url: config.orchestration.base_url.clone(),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&MicroflowConfig::default())
    }
}

enum InvocationOutcome {
    Succeeded { attempts: u32 },
    Exhausted { attempts: u32, last_error: TransportError },
    Stopped { attempts: u32 },
}

/// Webhook identity resolved for one step execution
struct ResolvedWebhook<'a> {
    spec: &'a CompiledWebhook,
    key: String,
    callback_url: Option<String>,
}

#[derive(Clone)]
pub struct StepOrchestrator {
    services: CoordinationServices,
    invoker: Arc<dyn ActionInvoker>,
    audit: Arc<dyn AuditLog>,
    settings: OrchestratorSettings,
}

impl std::fmt::Debug for StepOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepOrchestrator")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl StepOrchestrator {
    pub fn new(
        services: CoordinationServices,
        invoker: Arc<dyn ActionInvoker>,
        audit: Arc<dyn AuditLog>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            services,
            invoker,
            audit,
            settings,
        }
    }

    pub fn services(&self) -> &CoordinationServices {
        &self.services
    }

    /// Execute `step_id` of `graph` for `run`
    ///
    /// Returns the children that became ready. Branch-terminal conditions (stop observed,
    /// exhausted retries with `stop_on_failure`, webhook timeout or resolution failure) are
    /// returned as errors that end only this branch.
    #[instrument(skip(self, graph, run), fields(run_id = %run.run_id))]
    pub async fn execute_step(
        &self,
        graph: &CompiledGraph,
        step_id: i32,
        run: &RunObject,
    ) -> Result<StepCompletion> {
        let step = graph.step(step_id)?;
        let arena = &self.services.arena;

        arena.schedule(&run.run_id, step_id);
        run.record_step(step_id);

        if step.is_root() {
            return self.pass_through_root(step, run);
        }

        // 1. run-state gate
        let state = self
            .services
            .run_states
            .wait_until_runnable(&run.project_id, Some(&run.global_key))
            .await;
        if state == RunState::Stopped {
            return Err(self.halt(run, step_id, 0).await);
        }

        if !self
            .services
            .run_states
            .is_step_allowed(&run.global_key, step_id)
        {
            return self.skip(step, run).await;
        }

        let Some(http) = step.action.http() else {
            // container steps other than the root only fan out
            arena.transition(&run.run_id, step_id, StepEvent::Admit)?;
            arena.transition(&run.run_id, step_id, StepEvent::Start)?;
            arena.transition(&run.run_id, step_id, StepEvent::Succeed)?;
            return self
                .complete(step, run, StepOutcome::Succeeded, 0, &step.children)
                .await;
        };
        let retry = match &step.action {
            StepAction::Retrying { retry, .. } => Some(retry),
            _ => None,
        };

        let webhook = step.webhook.as_ref().map(|spec| self.resolve_webhook(spec, run, step_id));

        // 2. scale-group admission
        let permit = match &step.scale_group_id {
            Some(scale_group_id) => {
                match self
                    .until_stopped(run, self.services.gate.acquire(scale_group_id))
                    .await
                {
                    Some(permit) => Some(permit),
                    None => return Err(self.halt(run, step_id, 0).await),
                }
            }
            None => None,
        };
        arena.transition(&run.run_id, step_id, StepEvent::Admit)?;

        // 3. action invocation
        arena.transition(&run.run_id, step_id, StepEvent::Start)?;
        let activity = self.services.activity.enter(&run.project_id, step_id);
        let request = self.build_request(http, run, step_id, webhook.as_ref())?;
        let invocation = self.invoke_with_retries(request, retry, run, step_id).await;
        drop(activity);
        drop(permit);

        match invocation {
            InvocationOutcome::Stopped { attempts } => Err(self.halt(run, step_id, attempts).await),

            // 4. failure policy
            InvocationOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                arena.transition(&run.run_id, step_id, StepEvent::Fail)?;
                let message = last_error.to_string();
                self.log_branch_error(run, step_id, &message).await;

                if step.stop_on_failure {
                    self.log_step(run, step_id, StepOutcome::Failed { message }, attempts)
                        .await;
                    return Err(MicroflowError::ActionExhaustedRetries {
                        step_id,
                        attempts,
                        last_error,
                    });
                }

                warn!(
                    run_id = %run.run_id,
                    step_id = step_id,
                    attempts = attempts,
                    "Step failed, continuing with children"
                );
                self.complete(
                    step,
                    run,
                    StepOutcome::FailedContinued { message },
                    attempts,
                    &step.children,
                )
                .await
            }

            InvocationOutcome::Succeeded { attempts } => {
                arena.transition(&run.run_id, step_id, StepEvent::Succeed)?;

                // 5. webhook wait
                let children = match webhook {
                    Some(webhook) => self.await_webhook(step, run, webhook, attempts).await?,
                    None => step.children.clone(),
                };

                self.complete(step, run, StepOutcome::Succeeded, attempts, &children)
                    .await
            }
        }
    }

    fn pass_through_root(&self, step: &CompiledStep, run: &RunObject) -> Result<StepCompletion> {
        let arena = &self.services.arena;
        arena.transition(&run.run_id, step.step_id, StepEvent::Admit)?;
        arena.transition(&run.run_id, step.step_id, StepEvent::Start)?;
        arena.transition(&run.run_id, step.step_id, StepEvent::Succeed)?;
        let ready_children = self.fan_out(run, &step.children);
        arena.transition(&run.run_id, step.step_id, StepEvent::Propagate)?;

        debug!(run_id = %run.run_id, ready = ?ready_children, "Root fanned out");
        Ok(StepCompletion {
            step_id: step.step_id,
            outcome: StepOutcome::Succeeded,
            attempts: 0,
            ready_children,
        })
    }

    /// End the branch of a step excluded by the custom step list; its children are not credited
    async fn skip(&self, step: &CompiledStep, run: &RunObject) -> Result<StepCompletion> {
        self.services
            .arena
            .transition(&run.run_id, step.step_id, StepEvent::Skip)?;
        self.log_step(run, step.step_id, StepOutcome::Skipped, 0)
            .await;
        debug!(
            run_id = %run.run_id,
            step_id = step.step_id,
            "⏭️ Step not in custom step list, branch ends"
        );
        Ok(StepCompletion {
            step_id: step.step_id,
            outcome: StepOutcome::Skipped,
            attempts: 0,
            ready_children: Vec::new(),
        })
    }

    /// Credit children, mark the step propagated and write its audit entry
    async fn complete(
        &self,
        step: &CompiledStep,
        run: &RunObject,
        outcome: StepOutcome,
        attempts: u32,
        children: &[ChildRef],
    ) -> Result<StepCompletion> {
        // 6. fan-out
        let ready_children = self.fan_out(run, children);
        self.services
            .arena
            .transition(&run.run_id, step.step_id, StepEvent::Propagate)?;
        self.log_step(run, step.step_id, outcome.clone(), attempts)
            .await;

        info!(
            run_id = %run.run_id,
            step_id = step.step_id,
            attempts = attempts,
            ready_children = ?ready_children,
            "✅ Step completed"
        );

        Ok(StepCompletion {
            step_id: step.step_id,
            outcome,
            attempts,
            ready_children,
        })
    }

    fn fan_out(&self, run: &RunObject, children: &[ChildRef]) -> Vec<i32> {
        children
            .iter()
            .filter_map(|child| {
                let completed = self
                    .services
                    .counters
                    .increment_and_get(&run.run_id, child.child_id);
                (completed == child.child_parent_count).then_some(child.child_id)
            })
            .collect()
    }

    async fn halt(&self, run: &RunObject, step_id: i32, attempts: u32) -> MicroflowError {
        if let Err(error) = self
            .services
            .arena
            .transition(&run.run_id, step_id, StepEvent::Halt)
        {
            warn!(run_id = %run.run_id, step_id = step_id, error = %error, "Could not record halt");
        }
        self.log_step(run, step_id, StepOutcome::Halted, attempts).await;

        log_step_operation("halt", &run.run_id, step_id, "halted", Some("stop observed"));
        MicroflowError::RunAborted {
            run_id: run.run_id.clone(),
            step_id,
        }
    }

    /// Race `future` against a stop of the run's project or global key
    async fn until_stopped<F: Future>(&self, run: &RunObject, future: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self
                .services
                .run_states
                .wait_for_stop(&run.project_id, Some(&run.global_key)) => None,
            output = future => Some(output),
        }
    }

    fn resolve_webhook<'a>(
        &self,
        spec: &'a CompiledWebhook,
        run: &RunObject,
        step_id: i32,
    ) -> ResolvedWebhook<'a> {
        let key = render_placeholders(
            &spec.webhook_key,
            &PlaceholderValues {
                project_name: &run.project_id,
                run_id: &run.run_id,
                step_id,
                global_key: &run.global_key,
                webhook_key: None,
                callback_url: None,
            },
        );
        let callback_url = self
            .settings
            .base_url
            .as_deref()
            .map(|base| format!("{}/{WEBHOOK_ROUTE}/{key}", base.trim_end_matches('/')));

        ResolvedWebhook {
            spec,
            key,
            callback_url,
        }
    }

    fn build_request(
        &self,
        http: &HttpAction,
        run: &RunObject,
        step_id: i32,
        webhook: Option<&ResolvedWebhook<'_>>,
    ) -> Result<ActionRequest> {
        let webhook_key = webhook.map(|webhook| webhook.key.as_str());
        let callback_url = webhook.and_then(|webhook| webhook.callback_url.as_deref());

        let url = render_placeholders(
            &http.url,
            &PlaceholderValues {
                project_name: &run.project_id,
                run_id: &run.run_id,
                step_id,
                global_key: &run.global_key,
                webhook_key,
                callback_url,
            },
        );

        let body = match http.method {
            HttpMethod::Get => None,
            HttpMethod::Post => Some(serde_json::to_value(ActionPostData {
                project_name: run.project_id.clone(),
                run_id: run.run_id.clone(),
                step_id,
                global_key: run.global_key.clone(),
                loop_index: run.loop_index,
                webhook_key: webhook_key.map(str::to_string),
                callback_url: callback_url.map(str::to_string),
            })?),
        };

        let timeout = if http.timeout_seconds > 0 {
            Duration::from_secs(http.timeout_seconds)
        } else {
            self.settings.default_action_timeout
        };

        Ok(ActionRequest {
            url,
            method: http.method,
            body,
            timeout,
        })
    }

    async fn invoke_with_retries(
        &self,
        request: ActionRequest,
        retry: Option<&RetryPolicy>,
        run: &RunObject,
        step_id: i32,
    ) -> InvocationOutcome {
        let max_attempts = retry.map_or(1, |policy| policy.max_retries.saturating_add(1));
        let deadline = retry
            .and_then(retry_deadline)
            .and_then(|limit| Instant::now().checked_add(limit));
        let mut attempts = 0;

        loop {
            attempts += 1;
            self.services.arena.record_attempt(&run.run_id, step_id);

            let mut attempt_request = request.clone();
            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                attempt_request.timeout = attempt_request.timeout.min(remaining);
            }

            let last_error = match self.invoke_once(attempt_request).await {
                Ok(()) => {
                    debug!(run_id = %run.run_id, step_id = step_id, attempts = attempts, "Action succeeded");
                    return InvocationOutcome::Succeeded { attempts };
                }
                Err(error) => error,
            };

            warn!(
                run_id = %run.run_id,
                step_id = step_id,
                attempt = attempts,
                max_attempts = max_attempts,
                error = %last_error,
                "⚠️ Action attempt failed"
            );

            let Some(policy) = retry else {
                return InvocationOutcome::Exhausted { attempts, last_error };
            };
            if attempts >= max_attempts {
                return InvocationOutcome::Exhausted { attempts, last_error };
            }

            let delay = delay_for_retry(policy, attempts);
            if let Some(deadline) = deadline {
                let next_attempt = Instant::now().checked_add(delay);
                if next_attempt.map_or(true, |at| at >= deadline) {
                    debug!(run_id = %run.run_id, step_id = step_id, "Retry deadline reached");
                    return InvocationOutcome::Exhausted { attempts, last_error };
                }
            }

            if self
                .until_stopped(run, tokio::time::sleep(delay))
                .await
                .is_none()
            {
                return InvocationOutcome::Stopped { attempts };
            }
        }
    }

    async fn invoke_once(&self, request: ActionRequest) -> std::result::Result<(), TransportError> {
        let timeout = request.timeout;
        match tokio::time::timeout(timeout, self.invoker.invoke(request)).await {
            Ok(Ok(response)) if response.is_success() => Ok(()),
            Ok(Ok(response)) => Err(TransportError::NonSuccessStatus {
                status_code: response.status_code,
            }),
            Ok(Err(error)) => Err(error),
            Err(_) => Err(TransportError::Timeout {
                timeout_seconds: timeout.as_secs(),
            }),
        }
    }

    async fn await_webhook(
        &self,
        step: &CompiledStep,
        run: &RunObject,
        webhook: ResolvedWebhook<'_>,
        attempts: u32,
    ) -> Result<Vec<ChildRef>> {
        let timeout = if webhook.spec.timeout_seconds > 0 {
            Duration::from_secs(webhook.spec.timeout_seconds)
        } else {
            self.settings.default_webhook_timeout
        };

        let waited = self
            .until_stopped(
                run,
                self.services.webhooks.await_signal(&webhook.key, timeout),
            )
            .await;

        let error = match waited {
            None => return Err(self.halt(run, step.step_id, attempts).await),
            Some(Ok(signal)) => match step.resolve_webhook_children(signal.action.as_deref()) {
                Ok(children) => {
                    debug!(
                        run_id = %run.run_id,
                        step_id = step.step_id,
                        action = ?signal.action,
                        "Webhook resolved children"
                    );
                    return Ok(children);
                }
                Err(error) => error,
            },
            Some(Err(timed_out)) => {
                if !webhook.spec.stop_on_webhook_failure {
                    warn!(
                        run_id = %run.run_id,
                        step_id = step.step_id,
                        webhook_key = %webhook.key,
                        "Webhook timed out, continuing with default children"
                    );
                    return Ok(step.children.clone());
                }
                MicroflowError::WebhookTimeout {
                    step_id: step.step_id,
                    webhook_key: timed_out.webhook_key,
                    timeout_seconds: timed_out.timeout_seconds,
                }
            }
        };

        self.services
            .arena
            .transition(&run.run_id, step.step_id, StepEvent::Fail)?;
        let message = error.to_string();
        self.log_branch_error(run, step.step_id, &message).await;
        self.log_step(run, step.step_id, StepOutcome::Failed { message }, attempts)
            .await;
        Err(error)
    }

    async fn log_step(&self, run: &RunObject, step_id: i32, outcome: StepOutcome, attempts: u32) {
        self.audit
            .log_step(StepLogEntry {
                project_id: run.project_id.clone(),
                run_id: run.run_id.clone(),
                step_id,
                outcome,
                attempts,
                logged_at: Utc::now(),
            })
            .await;
    }

    async fn log_branch_error(&self, run: &RunObject, step_id: i32, message: &str) {
        self.audit
            .log_error(ErrorLogEntry {
                project_id: run.project_id.clone(),
                step_id,
                run_id: run.run_id.clone(),
                message: message.to_string(),
                fatal: false,
                logged_at: Utc::now(),
            })
            .await;
    }
}
