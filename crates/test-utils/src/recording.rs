use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use taskgraph::engine::InvocationContext;
use taskgraph::group::{HookFuture, PrepareContext, TaskFuture, TaskItem};
use taskgraph::TaskGroup;

type PrepareHook = Box<dyn Fn(&PrepareContext<String>) + Send + Sync>;

/// Shared record of what a set of [`RecordingTaskItem`]s did.
#[derive(Clone, Default)]
pub struct InvocationLog {
    invoked: Arc<Mutex<Vec<String>>>,
    hooks: Arc<Mutex<Vec<(String, bool)>>>,
}

impl InvocationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys in the order their items were invoked.
    pub fn invoked(&self) -> Vec<String> {
        self.invoked.lock().unwrap().clone()
    }

    pub fn count(&self, key: &str) -> usize {
        self.invoked.lock().unwrap().iter().filter(|k| *k == key).count()
    }

    /// Index of the first invocation of `key`.
    pub fn position(&self, key: &str) -> Option<usize> {
        self.invoked.lock().unwrap().iter().position(|k| k == key)
    }

    /// `after_post_run` calls as `(key, is_group_faulted)`.
    pub fn hooks(&self) -> Vec<(String, bool)> {
        self.hooks.lock().unwrap().clone()
    }

    fn record_invocation(&self, key: &str) {
        self.invoked.lock().unwrap().push(key.to_string());
    }

    fn record_hook(&self, key: &str, faulted: bool) {
        self.hooks.lock().unwrap().push((key.to_string(), faulted));
    }
}

/// Task item for tests: records its invocations, optionally sleeps or
/// fails, and yields its own key as the result.
pub struct RecordingTaskItem {
    key: String,
    log: InvocationLog,
    delay: Duration,
    failure: Option<String>,
    hot_result: Option<String>,
    prepare_count: Arc<AtomicUsize>,
    on_prepare: Option<PrepareHook>,
}

impl RecordingTaskItem {
    pub fn new(key: &str, log: &InvocationLog) -> Self {
        Self {
            key: key.to_string(),
            log: log.clone(),
            delay: Duration::ZERO,
            failure: None,
            hot_result: None,
            prepare_count: Arc::new(AtomicUsize::new(0)),
            on_prepare: None,
        }
    }

    pub fn with_delay(mut self, millis: u64) -> Self {
        self.delay = Duration::from_millis(millis);
        self
    }

    /// Fail every invocation with `message`.
    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    /// Mark the item hot: it reports `result` and must never be invoked.
    pub fn hot(mut self, result: &str) -> Self {
        self.hot_result = Some(result.to_string());
        self
    }

    pub fn on_prepare<F>(mut self, hook: F) -> Self
    where
        F: Fn(&PrepareContext<String>) + Send + Sync + 'static,
    {
        self.on_prepare = Some(Box::new(hook));
        self
    }

    /// Counter of `prepare` calls, readable after the item moved into a group.
    pub fn prepare_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.prepare_count)
    }

    /// Wrap the item in its own group.
    pub fn into_group(self) -> TaskGroup<String> {
        let key = self.key.clone();
        TaskGroup::new(key, self)
    }
}

impl TaskItem<String> for RecordingTaskItem {
    fn prepare(&self, ctx: &PrepareContext<String>) {
        self.prepare_count.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = &self.on_prepare {
            hook(ctx);
        }
    }

    fn is_hot(&self) -> bool {
        self.hot_result.is_some()
    }

    fn result(&self) -> Option<String> {
        self.hot_result.clone()
    }

    fn invoke(&self, _ctx: &InvocationContext) -> TaskFuture<String> {
        self.log.record_invocation(&self.key);

        let key = self.key.clone();
        let delay = self.delay;
        let failure = self.failure.clone();
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match failure {
                Some(message) => Err(anyhow!("{key}: {message}")),
                None => Ok(key),
            }
        })
    }

    fn after_post_run(&self, is_group_faulted: bool) -> HookFuture {
        self.log.record_hook(&self.key, is_group_faulted);
        Box::pin(async { Ok(()) })
    }
}
