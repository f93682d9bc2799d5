use async_trait::async_trait;
use microflow_core::models::HttpMethod;
use microflow_core::orchestration::{ActionInvoker, ActionRequest, ActionResponse, TransportError};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

/// One recorded action invocation
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub url: String,
    pub method: HttpMethod,
    pub body: Option<Value>,
    pub at: Instant,
}

/// Scripted result of one invocation
#[derive(Debug, Clone)]
pub enum Scripted {
    Respond(u16),
    Fail(TransportError),
}

/// Action invoker that records every call and answers from per-URL scripts
///
/// Unscripted URLs answer 200. A held URL blocks each call until `release` adds a permit.
#[derive(Debug, Default)]
pub struct ScriptedInvoker {
    calls: Mutex<Vec<RecordedCall>>,
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    fallbacks: Mutex<HashMap<String, Scripted>>,
    delays: Mutex<HashMap<String, Duration>>,
    holds: Mutex<HashMap<String, Arc<Semaphore>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next calls to `url` in order, then fall back
    pub fn script(&self, url: &str, results: Vec<Scripted>) {
        self.scripts
            .lock()
            .entry(url.to_string())
            .or_default()
            .extend(results);
    }

    /// Answer every unscripted call to `url` with `result`
    pub fn always(&self, url: &str, result: Scripted) {
        self.fallbacks.lock().insert(url.to_string(), result);
    }

    pub fn delay(&self, url: &str, delay: Duration) {
        self.delays.lock().insert(url.to_string(), delay);
    }

    pub fn hold(&self, url: &str) {
        self.holds
            .lock()
            .insert(url.to_string(), Arc::new(Semaphore::new(0)));
    }

    /// Let one held call to `url` proceed
    pub fn release(&self, url: &str) {
        if let Some(hold) = self.holds.lock().get(url) {
            hold.add_permits(1);
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, url: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.url == url)
            .collect()
    }

    pub fn called_urls(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call.url).collect()
    }

    /// Step ids parsed from `http://svc/step/{id}` urls, in call order
    pub fn invoked_steps(&self) -> Vec<i32> {
        self.called_urls()
            .iter()
            .filter_map(|url| url.rsplit('/').next())
            .filter_map(|id| id.parse().ok())
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Wait (real time) until at least `count` calls were recorded
    pub async fn wait_for_calls(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.calls.lock().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for action calls");
    }

    fn next_result(&self, url: &str) -> Scripted {
        if let Some(result) = self
            .scripts
            .lock()
            .get_mut(url)
            .and_then(|queue| queue.pop_front())
        {
            return result;
        }
        self.fallbacks
            .lock()
            .get(url)
            .cloned()
            .unwrap_or(Scripted::Respond(200))
    }
}

#[async_trait]
impl ActionInvoker for ScriptedInvoker {
    async fn invoke(&self, request: ActionRequest) -> Result<ActionResponse, TransportError> {
        self.calls.lock().push(RecordedCall {
            url: request.url.clone(),
            method: request.method,
            body: request.body.clone(),
            at: Instant::now(),
        });

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let hold = self.holds.lock().get(&request.url).cloned();
        if let Some(hold) = hold {
            if let Ok(permit) = hold.acquire().await {
                permit.forget();
            }
        }

        let delay = self.delays.lock().get(&request.url).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let result = self.next_result(&request.url);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match result {
            Scripted::Respond(status_code) => Ok(ActionResponse {
                status_code,
                body: None,
            }),
            Scripted::Fail(error) => Err(error),
        }
    }
}
