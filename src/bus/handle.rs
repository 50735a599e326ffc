use std::{
    any::Any,
    collections::VecDeque,
    panic::AssertUnwindSafe,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use futures::FutureExt;
use hashbrown::HashMap;
use serde::Deserialize;
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::{JoinError, JoinSet},
    time::Duration,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::types::{DEFAULT_BUS_NAME, EventId};

use super::{
    BusError, DeadLetter, Event, EventEntry, EventTarget, Rule, TargetError, events::BusEvent,
};

/// Bus tunables. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Bus name, used in logs.
    pub name: String,
    /// Bound on waiting for the bus to accept a call.
    pub publish_timeout_ms: u64,
    /// Bound on a single target invocation.
    pub target_timeout_ms: u64,
    /// Attempts per (event, target) before dead-lettering; at least one is always made.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles per attempt.
    pub base_delay_ms: u64,
    /// Cap on the retry delay.
    pub max_delay_ms: u64,
    /// Capacity of the command queue.
    pub command_queue_bound: usize,
    /// Capacity of the notification broadcast.
    pub events_capacity: usize,
    /// Dead letters retained; the oldest is dropped once full.
    pub dead_letter_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_BUS_NAME.to_string(),
            publish_timeout_ms: 2_000,
            target_timeout_ms: 5_000,
            max_attempts: 5,
            base_delay_ms: 200,
            max_delay_ms: 10_000,
            command_queue_bound: 256,
            events_capacity: 1024,
            dead_letter_capacity: 10_000,
        }
    }
}

impl BusConfig {
    /// Bound on waiting for acceptance.
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    /// Bound on one target invocation.
    pub fn target_timeout(&self) -> Duration {
        Duration::from_millis(self.target_timeout_ms)
    }

    /// Delay before retrying after failed attempt number `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// Acceptance receipt for one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutEventsResultEntry {
    /// Id assigned to the accepted event.
    pub event_id: EventId,
}

/// Acceptance receipt for a batch, in submission order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutEventsOutput {
    /// One receipt per submitted entry.
    pub entries: Vec<PutEventsResultEntry>,
}

/// Cloneable handle to a running bus.
#[derive(Clone)]
pub struct EventBusHandle {
    name: Arc<str>,
    publish_timeout: Duration,
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<BusEvent>,
}

enum Command {
    PutRule {
        rule: Rule,
        resp: oneshot::Sender<Result<(), BusError>>,
    },
    RemoveRule {
        name: String,
        resp: oneshot::Sender<bool>,
    },
    RuleNames {
        resp: oneshot::Sender<Vec<String>>,
    },
    PutEvents {
        entries: Vec<EventEntry>,
        resp: oneshot::Sender<Result<PutEventsOutput, BusError>>,
    },
    DeadLetters {
        resp: oneshot::Sender<Vec<DeadLetter>>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

/// Starts a bus task and returns its handle.
///
/// The task owns the rule table. Each accepted event is delivered to every
/// target of every matching rule on a separate task; no ordering holds between
/// events or between deliveries of one event.
pub fn spawn_event_bus(config: BusConfig) -> EventBusHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(config.command_queue_bound.max(1));
    let (events_tx, _) = broadcast::channel::<BusEvent>(config.events_capacity.max(1));

    let handle = EventBusHandle {
        name: Arc::from(config.name.as_str()),
        publish_timeout: config.publish_timeout(),
        cmd_tx,
        events_tx: events_tx.clone(),
    };

    tokio::spawn(async move {
        let config = Arc::new(config);
        let mut rules: HashMap<String, Rule> = HashMap::new();
        let mut deliveries: JoinSet<Option<DeadLetter>> = JoinSet::new();
        let mut dead_letters = DeadLetterQueue::new(config.dead_letter_capacity);
        let mut shutdown_resp = None;

        info!(bus = %config.name, "event bus started");

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break; };
                    match cmd {
                        Command::PutRule { rule, resp } => {
                            let _ = resp.send(put_rule(&mut rules, rule, &config));
                        }
                        Command::RemoveRule { name, resp } => {
                            let removed = rules.remove(&name).is_some();
                            if removed {
                                info!(bus = %config.name, rule = %name, "removed rule");
                            }
                            let _ = resp.send(removed);
                        }
                        Command::RuleNames { resp } => {
                            let _ = resp.send(rules.keys().cloned().collect());
                        }
                        Command::PutEvents { entries, resp } => {
                            let out = accept_events(
                                entries,
                                &rules,
                                &mut deliveries,
                                &events_tx,
                                &config,
                            );
                            let _ = resp.send(out);
                        }
                        Command::DeadLetters { resp } => {
                            let _ = resp.send(dead_letters.snapshot());
                        }
                        Command::Shutdown { resp } => {
                            shutdown_resp = Some(resp);
                            break;
                        }
                    }
                }
                Some(joined) = deliveries.join_next(), if !deliveries.is_empty() => {
                    reap(joined, &mut dead_letters);
                }
            }
        }

        drop(cmd_rx);
        // In-flight deliveries, pending retries included, finish before the bus stops.
        while let Some(joined) = deliveries.join_next().await {
            reap(joined, &mut dead_letters);
        }
        info!(
            bus = %config.name,
            dead_letters = dead_letters.len(),
            "event bus stopped"
        );
        if let Some(resp) = shutdown_resp {
            let _ = resp.send(());
        }
    });

    handle
}

impl EventBusHandle {
    /// Bus name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribes to delivery notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.events_tx.subscribe()
    }

    /// Registers `rule`, replacing any rule with the same name.
    pub async fn put_rule(&self, rule: Rule) -> Result<(), BusError> {
        self.request(|resp| Command::PutRule { rule, resp }).await?
    }

    /// Removes the named rule; returns whether it existed.
    pub async fn remove_rule(&self, name: impl Into<String>) -> Result<bool, BusError> {
        let name = name.into();
        self.request(|resp| Command::RemoveRule { name, resp }).await
    }

    /// Names of the registered rules, in no particular order.
    pub async fn rule_names(&self) -> Result<Vec<String>, BusError> {
        self.request(|resp| Command::RuleNames { resp }).await
    }

    /// Submits events and returns once the bus has accepted them.
    ///
    /// Acceptance means the events were matched and their deliveries
    /// scheduled. It says nothing about whether any target has run. The batch
    /// is rejected as a whole if any entry is invalid. Waiting is bounded by
    /// the configured publish timeout.
    pub async fn put_events(&self, entries: Vec<EventEntry>) -> Result<PutEventsOutput, BusError> {
        let timeout = self.publish_timeout;
        tokio::time::timeout(
            timeout,
            self.request(|resp| Command::PutEvents { entries, resp }),
        )
        .await
        .map_err(|_| BusError::Timeout(timeout))??
    }

    /// Submits a single event and returns its id.
    pub async fn put_event(&self, entry: EventEntry) -> Result<EventId, BusError> {
        let out = self.put_events(vec![entry]).await?;
        out.entries
            .first()
            .map(|e| e.event_id)
            .ok_or_else(|| BusError::InvalidEntry("bus returned no receipt".to_string()))
    }

    /// Events abandoned after exhausting their retries, oldest first.
    ///
    /// Only the most recent `dead_letter_capacity` entries are kept.
    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>, BusError> {
        self.request(|resp| Command::DeadLetters { resp }).await
    }

    /// Stops accepting calls and waits for in-flight deliveries to finish.
    pub async fn shutdown(&self) -> Result<(), BusError> {
        self.request(|resp| Command::Shutdown { resp }).await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, BusError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| BusError::ChannelClosed)?;
        rx.await.map_err(|_| BusError::ChannelClosed)
    }
}

fn put_rule(rules: &mut HashMap<String, Rule>, rule: Rule, config: &BusConfig) -> Result<(), BusError> {
    if rule.name.trim().is_empty() {
        return Err(BusError::InvalidRule("rule name is required".to_string()));
    }
    if rule.pattern.source.is_empty() {
        warn!(bus = %config.name, rule = %rule.name, "rule has no sources and will never match");
    }
    info!(
        bus = %config.name,
        rule = %rule.name,
        targets = rule.targets.len(),
        "registered rule"
    );
    rules.insert(rule.name.clone(), rule);
    Ok(())
}

fn accept_events(
    entries: Vec<EventEntry>,
    rules: &HashMap<String, Rule>,
    deliveries: &mut JoinSet<Option<DeadLetter>>,
    events_tx: &broadcast::Sender<BusEvent>,
    config: &Arc<BusConfig>,
) -> Result<PutEventsOutput, BusError> {
    if let Some(pos) = entries.iter().position(|e| e.source.trim().is_empty()) {
        return Err(BusError::InvalidEntry(format!("entry {pos} has no source")));
    }

    let mut out = PutEventsOutput::default();
    for entry in entries {
        let event = Arc::new(Event {
            id: Uuid::new_v4(),
            source: entry.source,
            detail_type: entry.detail_type,
            time_ms: now_ms(),
            detail: entry.detail,
        });

        let mut scheduled = 0usize;
        for rule in rules.values().filter(|r| r.pattern.matches(&event)) {
            for target in &rule.targets {
                deliveries.spawn(deliver(
                    Arc::clone(&event),
                    rule.name.clone(),
                    Arc::clone(target),
                    Arc::clone(config),
                    events_tx.clone(),
                ));
                scheduled += 1;
            }
        }

        info!(
            bus = %config.name,
            event_id = %event.id,
            source = %event.source,
            deliveries = scheduled,
            "accepted event"
        );
        let _ = events_tx.send(BusEvent::Accepted {
            event_id: event.id,
            deliveries: scheduled,
        });
        out.entries.push(PutEventsResultEntry { event_id: event.id });
    }
    Ok(out)
}

async fn deliver(
    event: Arc<Event>,
    rule: String,
    target: Arc<dyn EventTarget>,
    config: Arc<BusConfig>,
    events_tx: broadcast::Sender<BusEvent>,
) -> Option<DeadLetter> {
    let max_attempts = config.max_attempts.max(1);
    let target_timeout = config.target_timeout();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let invocation = AssertUnwindSafe(target.invoke(&event)).catch_unwind();
        let outcome = match tokio::time::timeout(target_timeout, invocation).await {
            Ok(Ok(res)) => res,
            Ok(Err(panic)) => Err(TargetError::retryable(format!(
                "target panicked: {}",
                panic_message(panic.as_ref())
            ))),
            Err(_) => Err(TargetError::retryable(format!(
                "invocation timed out after {target_timeout:?}"
            ))),
        };

        let err = match outcome {
            Ok(()) => {
                debug!(event_id = %event.id, rule = %rule, target_name = target.name(), attempt, "delivered");
                let _ = events_tx.send(BusEvent::Delivered {
                    event_id: event.id,
                    rule,
                    target: target.name().to_string(),
                    attempt,
                });
                return None;
            }
            Err(err) => err,
        };

        let _ = events_tx.send(BusEvent::DeliveryFailed {
            event_id: event.id,
            rule: rule.clone(),
            target: target.name().to_string(),
            attempt,
            error: err.message.clone(),
        });

        if !err.retryable || attempt >= max_attempts {
            error!(
                event_id = %event.id,
                rule = %rule,
                target_name = target.name(),
                attempt,
                retryable = err.retryable,
                error = %err,
                "delivery abandoned, moving event to dead letters"
            );
            let _ = events_tx.send(BusEvent::DeadLettered {
                event_id: event.id,
                rule: rule.clone(),
                target: target.name().to_string(),
                error: err.message.clone(),
            });
            return Some(DeadLetter {
                event: (*event).clone(),
                rule,
                target: target.name().to_string(),
                attempts: attempt,
                error: err,
            });
        }

        let delay = config.backoff_delay(attempt);
        warn!(
            event_id = %event.id,
            target_name = target.name(),
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "delivery failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string payload")
}

/// Bounded dead-letter list; evicts the oldest entry when full.
struct DeadLetterQueue {
    letters: VecDeque<DeadLetter>,
    capacity: usize,
    evicted: u64,
}

impl DeadLetterQueue {
    fn new(capacity: usize) -> Self {
        Self {
            letters: VecDeque::new(),
            capacity: capacity.max(1),
            evicted: 0,
        }
    }

    fn push(&mut self, letter: DeadLetter) {
        if self.letters.len() >= self.capacity {
            if let Some(old) = self.letters.pop_front() {
                self.evicted += 1;
                warn!(
                    event_id = %old.event.id,
                    evicted = self.evicted,
                    "dead-letter list full, dropping oldest entry"
                );
            }
        }
        self.letters.push_back(letter);
    }

    fn len(&self) -> usize {
        self.letters.len()
    }

    fn snapshot(&self) -> Vec<DeadLetter> {
        self.letters.iter().cloned().collect()
    }
}

fn reap(joined: Result<Option<DeadLetter>, JoinError>, dead_letters: &mut DeadLetterQueue) {
    match joined {
        Ok(Some(letter)) => dead_letters.push(letter),
        Ok(None) => {}
        Err(e) => error!(error = %e, "delivery task failed"),
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
