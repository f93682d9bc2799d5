mod retry_policies;
mod run_scenarios;
mod webhooks;
