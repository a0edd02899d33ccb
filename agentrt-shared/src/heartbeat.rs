//! Heartbeat registry and liveness monitor.
//!
//! Components hold a `Reporter` handle obtained from `HeartbeatRegistry::register`
//! and call `beat`/`degrade`/`disabled`/`stopped`/`starting` as their own
//! lifecycle dictates. A `Monitor` polls the registry on a ticker and emits
//! `Transition` events when a component crosses the degraded-class/healthy
//! boundary, following `tasker-shared`'s pattern of a mutex-guarded shared
//! registry read by a background evaluator task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// State a component reports about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseState {
    Starting,
    Healthy,
    Degraded,
    Disabled,
    Stopped,
}

/// State as observed in a snapshot: a `Healthy`/`Starting` component becomes
/// `Stale` if it hasn't beaten within `stale_after`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservedState {
    Starting,
    Healthy,
    Degraded,
    Disabled,
    Stopped,
    Stale,
}

impl ObservedState {
    /// Degraded-class states for transition purposes: `Degraded` and `Stale`.
    pub fn is_degraded_class(&self) -> bool {
        matches!(self, ObservedState::Degraded | ObservedState::Stale)
    }

    pub fn is_healthy_class(&self) -> bool {
        matches!(self, ObservedState::Healthy | ObservedState::Starting)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallState {
    Degraded,
    Starting,
    Healthy,
    Idle,
    Unknown,
}

#[derive(Debug, Clone)]
struct ComponentRecord {
    base_state: BaseState,
    message: String,
    last_error: Option<String>,
    last_beat_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl ComponentRecord {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            base_state: BaseState::Starting,
            message: String::new(),
            last_error: None,
            last_beat_at: None,
            updated_at: now,
        }
    }

    fn observed(&self, now: DateTime<Utc>, stale_after: Duration) -> ObservedState {
        let freshness_anchor = match self.last_beat_at {
            Some(beat) if beat > self.updated_at => beat,
            _ => self.updated_at,
        };
        let stale = match self.base_state {
            BaseState::Healthy | BaseState::Starting => {
                (now - freshness_anchor)
                    .to_std()
                    .map(|d| d > stale_after)
                    .unwrap_or(false)
            }
            _ => false,
        };
        if stale {
            return ObservedState::Stale;
        }
        match self.base_state {
            BaseState::Starting => ObservedState::Starting,
            BaseState::Healthy => ObservedState::Healthy,
            BaseState::Degraded => ObservedState::Degraded,
            BaseState::Disabled => ObservedState::Disabled,
            BaseState::Stopped => ObservedState::Stopped,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentSnapshot {
    pub name: String,
    pub state: ObservedState,
    pub message: String,
    pub last_error: Option<String>,
    pub last_beat_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatSnapshot {
    pub overall: OverallState,
    pub stale_after_secs: u64,
    pub components: Vec<ComponentSnapshot>,
}

/// Per-component handle for reporting liveness. Object-safe so callers can
/// hold `Arc<dyn Reporter>` without naming the registry type.
pub trait Reporter: Send + Sync + std::fmt::Debug {
    fn starting(&self, message: &str);
    fn beat(&self, message: &str);
    fn degrade(&self, message: &str, err: Option<&str>);
    fn disabled(&self, message: &str);
    fn stopped(&self, message: &str);
}

#[derive(Debug)]
struct ComponentReporter {
    name: String,
    registry: Arc<HeartbeatRegistry>,
}

impl Reporter for ComponentReporter {
    fn starting(&self, message: &str) {
        self.registry.set_state(&self.name, BaseState::Starting, message, None, false);
    }

    fn beat(&self, message: &str) {
        self.registry.set_state(&self.name, BaseState::Healthy, message, None, true);
    }

    fn degrade(&self, message: &str, err: Option<&str>) {
        self.registry.set_state(&self.name, BaseState::Degraded, message, err, false);
    }

    fn disabled(&self, message: &str) {
        self.registry.set_state(&self.name, BaseState::Disabled, message, None, false);
    }

    fn stopped(&self, message: &str) {
        self.registry.set_state(&self.name, BaseState::Stopped, message, None, false);
    }
}

/// Mutex-guarded registry of component liveness. Writes take an exclusive
/// lock; `snapshot` takes a shared lock.
#[derive(Debug, Default)]
pub struct HeartbeatRegistry {
    components: RwLock<HashMap<String, ComponentRecord>>,
}

impl HeartbeatRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register (or re-fetch) a named component and return its reporter
    /// handle. Safe to call repeatedly for the same name.
    pub fn register(self: &Arc<Self>, name: impl Into<String>) -> Arc<dyn Reporter> {
        let name = name.into();
        self.components
            .write()
            .entry(name.clone())
            .or_insert_with(ComponentRecord::new);
        Arc::new(ComponentReporter {
            name,
            registry: self.clone(),
        })
    }

    fn set_state(
        &self,
        name: &str,
        base_state: BaseState,
        message: &str,
        err: Option<&str>,
        touch_beat: bool,
    ) {
        let now = Utc::now();
        let mut guard = self.components.write();
        let record = guard
            .entry(name.to_string())
            .or_insert_with(ComponentRecord::new);
        record.base_state = base_state;
        record.message = message.to_string();
        if let Some(e) = err {
            record.last_error = Some(e.to_string());
        }
        if touch_beat {
            record.last_beat_at = Some(now);
        }
        record.updated_at = now;
    }

    /// Snapshot all registered components, computing staleness relative to
    /// `now`. Overall state: `degraded` if any component is degraded/stale,
    /// else `starting` if any is starting, else `healthy` if any healthy,
    /// else `idle` if only inactive states, else `unknown`.
    pub fn snapshot(&self, stale_after: Duration) -> HeartbeatSnapshot {
        let guard = self.components.read();
        let now = Utc::now();
        let mut components: Vec<ComponentSnapshot> = guard
            .iter()
            .map(|(name, record)| ComponentSnapshot {
                name: name.clone(),
                state: record.observed(now, stale_after),
                message: record.message.clone(),
                last_error: record.last_error.clone(),
                last_beat_at: record.last_beat_at,
                updated_at: record.updated_at,
            })
            .collect();
        components.sort_by(|a, b| a.name.cmp(&b.name));

        let overall = if components
            .iter()
            .any(|c| c.state.is_degraded_class())
        {
            OverallState::Degraded
        } else if components
            .iter()
            .any(|c| matches!(c.state, ObservedState::Starting))
        {
            OverallState::Starting
        } else if components
            .iter()
            .any(|c| matches!(c.state, ObservedState::Healthy))
        {
            OverallState::Healthy
        } else if !components.is_empty() {
            OverallState::Idle
        } else {
            OverallState::Unknown
        };

        HeartbeatSnapshot {
            overall,
            stale_after_secs: stale_after.as_secs(),
            components,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    Degraded,
    Recovered,
}

#[derive(Debug, Clone)]
pub struct Transition {
    pub component: String,
    pub kind: TransitionKind,
}

/// Receives transitions detected by the `Monitor`.
#[async_trait::async_trait]
pub trait TransitionSink: Send + Sync {
    async fn on_transition(&self, transition: Transition, snapshot: &HeartbeatSnapshot);
}

/// Polls the registry on a ticker and emits `degraded`/`recovered` events
/// when a component crosses the degraded-class/healthy boundary.
pub struct Monitor {
    registry: Arc<HeartbeatRegistry>,
    stale_after: Duration,
    interval: Duration,
    sink: Arc<dyn TransitionSink>,
}

impl Monitor {
    pub fn new(
        registry: Arc<HeartbeatRegistry>,
        interval: Duration,
        stale_after: Duration,
        sink: Arc<dyn TransitionSink>,
    ) -> Self {
        Self {
            registry,
            stale_after,
            interval,
            sink,
        }
    }

    /// Run until `cancel` resolves. Owns its own ticker, stopped on return.
    pub async fn run(&self, mut cancel: tokio::sync::oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        let mut previous: HashMap<String, ObservedState> = HashMap::new();
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = self.registry.snapshot(self.stale_after);
                    self.emit_transitions(&snapshot, &mut previous).await;
                }
                _ = &mut cancel => {
                    debug!("heartbeat monitor received cancellation, stopping");
                    return;
                }
            }
        }
    }

    async fn emit_transitions(
        &self,
        snapshot: &HeartbeatSnapshot,
        previous: &mut HashMap<String, ObservedState>,
    ) {
        for component in &snapshot.components {
            let prior = previous.get(&component.name).copied();
            if let Some(prior) = prior {
                if prior.is_healthy_class() && component.state.is_degraded_class() {
                    self.sink
                        .on_transition(
                            Transition {
                                component: component.name.clone(),
                                kind: TransitionKind::Degraded,
                            },
                            snapshot,
                        )
                        .await;
                } else if prior.is_degraded_class() && component.state.is_healthy_class() {
                    self.sink
                        .on_transition(
                            Transition {
                                component: component.name.clone(),
                                kind: TransitionKind::Recovered,
                            },
                            snapshot,
                        )
                        .await;
                }
            }
            previous.insert(component.name.clone(), component.state);
        }
        if snapshot.overall == OverallState::Degraded {
            warn!(?snapshot.overall, "heartbeat monitor tick: degraded components present");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct RecordingSink {
        events: StdMutex<Vec<Transition>>,
    }

    #[async_trait::async_trait]
    impl TransitionSink for RecordingSink {
        async fn on_transition(&self, transition: Transition, _snapshot: &HeartbeatSnapshot) {
            self.events.lock().unwrap().push(transition);
        }
    }

    #[test]
    fn beat_sets_healthy_and_touches_last_beat() {
        let registry = HeartbeatRegistry::new();
        let reporter = registry.register("scheduler");
        reporter.beat("ticking");
        let snap = registry.snapshot(Duration::from_secs(60));
        let scheduler = snap.components.iter().find(|c| c.name == "scheduler").unwrap();
        assert_eq!(scheduler.state, ObservedState::Healthy);
        assert!(scheduler.last_beat_at.is_some());
    }

    #[test]
    fn degrade_does_not_touch_last_beat() {
        let registry = HeartbeatRegistry::new();
        let reporter = registry.register("watcher");
        reporter.beat("ok");
        let snap1 = registry.snapshot(Duration::from_secs(60));
        let beat1 = snap1.components[0].last_beat_at;

        reporter.degrade("queue stalled", Some("timeout"));
        let snap2 = registry.snapshot(Duration::from_secs(60));
        let watcher = snap2.components.iter().find(|c| c.name == "watcher").unwrap();
        assert_eq!(watcher.state, ObservedState::Degraded);
        assert_eq!(watcher.last_beat_at, beat1);
        assert_eq!(watcher.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn stale_healthy_component_reports_stale() {
        let registry = HeartbeatRegistry::new();
        let reporter = registry.register("recovery");
        reporter.beat("ok");
        // stale_after of zero duration means any elapsed time is stale.
        std::thread::sleep(std::time::Duration::from_millis(5));
        let snap = registry.snapshot(Duration::from_millis(0));
        assert_eq!(snap.components[0].state, ObservedState::Stale);
        assert_eq!(snap.overall, OverallState::Degraded);
    }

    #[test]
    fn overall_idle_when_only_inactive_states() {
        let registry = HeartbeatRegistry::new();
        let reporter = registry.register("x");
        reporter.stopped("done");
        let snap = registry.snapshot(Duration::from_secs(60));
        assert_eq!(snap.overall, OverallState::Idle);
    }

    #[tokio::test]
    async fn monitor_emits_degraded_then_recovered_in_order() {
        let registry = HeartbeatRegistry::new();
        let reporter = registry.register("scheduler");
        reporter.beat("ok");

        let sink = Arc::new(RecordingSink {
            events: StdMutex::new(Vec::new()),
        });
        let monitor = Monitor::new(
            registry.clone(),
            Duration::from_millis(10),
            Duration::from_secs(60),
            sink.clone(),
        );

        let (cancel_tx, cancel_rx) = tokio::sync::oneshot::channel();
        let handle = tokio::spawn(async move {
            monitor.run(cancel_rx).await;
        });

        // First tick: establishes baseline (healthy), no transition yet.
        tokio::time::sleep(Duration::from_millis(30)).await;
        reporter.degrade("queue stalled", Some("boom"));
        tokio::time::sleep(Duration::from_millis(30)).await;
        reporter.beat("recovered");
        tokio::time::sleep(Duration::from_millis(30)).await;

        let _ = cancel_tx.send(());
        handle.await.unwrap();

        let events = sink.events.lock().unwrap();
        let kinds: Vec<TransitionKind> = events.iter().map(|t| t.kind).collect();
        let degraded_pos = kinds.iter().position(|k| *k == TransitionKind::Degraded);
        let recovered_pos = kinds.iter().position(|k| *k == TransitionKind::Recovered);
        assert!(degraded_pos.is_some());
        assert!(recovered_pos.is_some());
        assert!(degraded_pos.unwrap() < recovered_pos.unwrap());
    }
}
