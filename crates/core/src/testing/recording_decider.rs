//! Instrumented merge decider for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::merge::{DecideContext, Decision, MergeDecider};
use crate::record::TorrentRecord;

/// One `decide` call as seen by the decider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedDecision {
    pub key: String,
    pub url: String,
    pub existed: bool,
    pub decision: Decision,
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<RecordedDecision>,
    scripted: HashMap<String, Decision>,
    active: HashMap<String, usize>,
    max_active_per_key: usize,
}

/// Upsert decider that records every call.
///
/// Provides controllable behavior for testing:
/// - Scripted decisions per url
/// - Artificial latency while the shard lock is held
/// - Detection of two calls running inside the same shard at once
///
/// # Example
///
/// ```rust,ignore
/// use trackerdb_core::testing::RecordingDecider;
///
/// let decider = RecordingDecider::new().with_delay(Duration::from_millis(5));
/// store.add_or_update(batch, &decider).await;
/// assert_eq!(decider.max_active_per_key(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RecordingDecider {
    state: Arc<Mutex<State>>,
    delay: Option<Duration>,
}

impl RecordingDecider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Return `decision` for `url` instead of the upsert default.
    pub fn script(&self, url: impl Into<String>, decision: Decision) {
        self.state.lock().scripted.insert(url.into(), decision);
    }

    pub fn calls(&self) -> Vec<RecordedDecision> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    /// Highest number of calls seen running at once for one shard key.
    pub fn max_active_per_key(&self) -> usize {
        self.state.lock().max_active_per_key
    }

    fn enter(&self, key: &str) {
        let mut state = self.state.lock();
        let active = state.active.entry(key.to_string()).or_insert(0);
        *active += 1;
        let now = *active;
        state.max_active_per_key = state.max_active_per_key.max(now);
    }

    fn leave(&self, key: &str) {
        let mut state = self.state.lock();
        if let Some(active) = state.active.get_mut(key) {
            *active = active.saturating_sub(1);
        }
    }
}

#[async_trait]
impl MergeDecider for RecordingDecider {
    async fn decide(&self, candidate: &mut TorrentRecord, ctx: DecideContext<'_>) -> Decision {
        self.enter(ctx.key);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.state.lock().scripted.get(&candidate.url).cloned();
        let decision = scripted.unwrap_or_else(|| match ctx.existing {
            None => Decision::Add,
            Some(existing) if existing.same_content(candidate) => Decision::Skip,
            Some(_) => Decision::Update,
        });

        self.state.lock().calls.push(RecordedDecision {
            key: ctx.key.to_string(),
            url: candidate.url.clone(),
            existed: ctx.existing.is_some(),
            decision: decision.clone(),
        });
        self.leave(ctx.key);
        decision
    }
}
