use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::json;

use notebus::{
    bus::{
        BusError, Event, EventEntry, EventPattern, EventTarget, Rule, TargetError,
        events::BusEvent,
        handle::{BusConfig, EventBusHandle, spawn_event_bus},
    },
    types::EventId,
};

/// Records every delivery and fails the first `fail_first` attempts.
struct RecordingTarget {
    name: String,
    seen: Mutex<Vec<Event>>,
    calls: AtomicU32,
    fail_first: u32,
    retryable: bool,
    delay: Option<Duration>,
}

impl RecordingTarget {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self::build(name, 0, true, None))
    }

    fn failing(name: &str, fail_first: u32, retryable: bool) -> Arc<Self> {
        Arc::new(Self::build(name, fail_first, retryable, None))
    }

    fn slow(name: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self::build(name, 0, true, Some(delay)))
    }

    fn build(name: &str, fail_first: u32, retryable: bool, delay: Option<Duration>) -> Self {
        Self {
            name: name.to_string(),
            seen: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
            fail_first,
            retryable,
            delay,
        }
    }

    fn seen(&self) -> Vec<Event> {
        self.seen.lock().expect("lock").clone()
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventTarget for RecordingTarget {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, event: &Event) -> Result<(), TargetError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if call <= self.fail_first {
            return Err(TargetError {
                message: format!("attempt {call} failed"),
                retryable: self.retryable,
            });
        }
        self.seen.lock().expect("lock").push(event.clone());
        Ok(())
    }
}

/// Panics on every invocation.
struct PanickingTarget {
    calls: AtomicU32,
}

#[async_trait]
impl EventTarget for PanickingTarget {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn invoke(&self, _event: &Event) -> Result<(), TargetError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        panic!("target blew up on call {call}");
    }
}

fn fast_config() -> BusConfig {
    BusConfig {
        target_timeout_ms: 200,
        max_attempts: 4,
        base_delay_ms: 5,
        max_delay_ms: 20,
        ..BusConfig::default()
    }
}

fn entry(source: &str, id: &str) -> EventEntry {
    EventEntry {
        source: source.to_string(),
        detail_type: None,
        detail: json!({"id": id, "name": "buy milk", "completed": "false"}),
    }
}

async fn rule(bus: &EventBusHandle, name: &str, source: &str, targets: &[Arc<RecordingTarget>]) {
    let mut rule = Rule::new(name, EventPattern::source(source));
    for t in targets {
        rule = rule.with_target(Arc::clone(t) as Arc<dyn EventTarget>);
    }
    bus.put_rule(rule).await.expect("put rule");
}

async fn wait_for_dead_letter(bus: &EventBusHandle, event_id: EventId) -> Vec<EventId> {
    for _ in 0..100 {
        let ids: Vec<EventId> = bus
            .dead_letters()
            .await
            .expect("dead letters")
            .iter()
            .map(|l| l.event.id)
            .collect();
        if ids.contains(&event_id) {
            return ids;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("event {event_id} never reached the dead letters");
}

async fn wait_for_terminal(
    sub: &mut tokio::sync::broadcast::Receiver<BusEvent>,
    event_id: EventId,
    expected: usize,
) -> Vec<BusEvent> {
    let mut out = Vec::new();
    while out.len() < expected {
        let evt = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .expect("notification timeout")
            .expect("recv");
        if evt.event_id() == event_id
            && matches!(evt, BusEvent::Delivered { .. } | BusEvent::DeadLettered { .. })
        {
            out.push(evt);
        }
    }
    out
}

#[tokio::test]
async fn non_matching_source_never_reaches_target() {
    let bus = spawn_event_bus(fast_config());
    let target = RecordingTarget::new("consumer");
    rule(&bus, "notes", "eru-appsync-events", &[Arc::clone(&target)]).await;
    let mut sub = bus.subscribe();

    bus.put_event(entry("someone-else", "n1")).await.expect("publish");
    bus.put_event(entry("eru-appsync-events-v2", "n2")).await.expect("publish");

    let first = sub.recv().await.expect("recv");
    assert!(matches!(first, BusEvent::Accepted { deliveries: 0, .. }));

    bus.shutdown().await.expect("shutdown");
    assert_eq!(target.calls(), 0);
}

#[tokio::test]
async fn matching_event_reaches_every_target_of_every_matching_rule() {
    let bus = spawn_event_bus(fast_config());
    let a = RecordingTarget::new("a");
    let b = RecordingTarget::new("b");
    let c = RecordingTarget::new("c");
    let other = RecordingTarget::new("other");
    rule(&bus, "r1", "eru-appsync-events", &[Arc::clone(&a), Arc::clone(&b)]).await;
    rule(&bus, "r2", "eru-appsync-events", &[Arc::clone(&c)]).await;
    rule(&bus, "r3", "billing", &[Arc::clone(&other)]).await;
    let mut sub = bus.subscribe();

    let id = bus.put_event(entry("eru-appsync-events", "n1")).await.expect("publish");
    let done = wait_for_terminal(&mut sub, id, 3).await;
    assert!(done.iter().all(|e| matches!(e, BusEvent::Delivered { .. })));

    for t in [&a, &b, &c] {
        let seen = t.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].id, id);
        assert_eq!(seen[0].detail["id"], "n1");
    }
    bus.shutdown().await.expect("shutdown");
    assert_eq!(other.calls(), 0);
}

#[tokio::test]
async fn retryable_failure_is_redelivered_until_success() {
    let bus = spawn_event_bus(fast_config());
    let flaky = RecordingTarget::failing("flaky", 2, true);
    rule(&bus, "notes", "src", &[Arc::clone(&flaky)]).await;
    let mut sub = bus.subscribe();

    let id = bus.put_event(entry("src", "n1")).await.expect("publish");
    let done = wait_for_terminal(&mut sub, id, 1).await;

    assert!(matches!(done[0], BusEvent::Delivered { attempt: 3, .. }));
    assert_eq!(flaky.calls(), 3);
    assert_eq!(flaky.seen().len(), 1);
    assert!(bus.dead_letters().await.expect("dead letters").is_empty());
    bus.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn permanent_failure_is_dead_lettered_without_retry() {
    let bus = spawn_event_bus(fast_config());
    let broken = RecordingTarget::failing("broken", u32::MAX, false);
    rule(&bus, "notes", "src", &[Arc::clone(&broken)]).await;
    let mut sub = bus.subscribe();

    let id = bus.put_event(entry("src", "n1")).await.expect("publish");
    wait_for_terminal(&mut sub, id, 1).await;
    bus.shutdown().await.expect("shutdown");

    assert_eq!(broken.calls(), 1);
}

#[tokio::test]
async fn exhausted_retries_land_in_dead_letters() {
    let bus = spawn_event_bus(fast_config());
    let broken = RecordingTarget::failing("broken", u32::MAX, true);
    rule(&bus, "notes", "src", &[Arc::clone(&broken)]).await;
    let mut sub = bus.subscribe();

    let id = bus.put_event(entry("src", "n1")).await.expect("publish");
    let done = wait_for_terminal(&mut sub, id, 1).await;
    assert!(matches!(done[0], BusEvent::DeadLettered { .. }));

    // Reaping happens on the bus task; give it a moment.
    let mut letters = Vec::new();
    for _ in 0..50 {
        letters = bus.dead_letters().await.expect("dead letters");
        if !letters.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].event.id, id);
    assert_eq!(letters[0].attempts, 4);
    assert_eq!(letters[0].target, "broken");
    assert_eq!(broken.calls(), 4);
    bus.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn panicking_target_is_retried_then_dead_lettered() {
    let bus = spawn_event_bus(fast_config());
    let target = Arc::new(PanickingTarget {
        calls: AtomicU32::new(0),
    });
    bus.put_rule(
        Rule::new("notes", EventPattern::source("src"))
            .with_target(Arc::clone(&target) as Arc<dyn EventTarget>),
    )
    .await
    .expect("put rule");
    let mut sub = bus.subscribe();

    let id = bus.put_event(entry("src", "n1")).await.expect("publish");

    let mut failures = 0;
    loop {
        let evt = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .expect("notification timeout")
            .expect("recv");
        match evt {
            BusEvent::DeliveryFailed { error, .. } => {
                assert!(error.contains("panicked"), "{error}");
                failures += 1;
            }
            BusEvent::DeadLettered { event_id, .. } => {
                assert_eq!(event_id, id);
                break;
            }
            BusEvent::Delivered { .. } => panic!("panicking target reported success"),
            BusEvent::Accepted { .. } => {}
        }
    }
    assert_eq!(failures, 4);
    assert_eq!(target.calls.load(Ordering::SeqCst), 4);

    let letters = wait_for_dead_letter(&bus, id).await;
    assert_eq!(letters, vec![id]);
    bus.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn dead_letters_keep_only_the_newest_entries() {
    let bus = spawn_event_bus(BusConfig {
        dead_letter_capacity: 2,
        ..fast_config()
    });
    let broken = RecordingTarget::failing("broken", u32::MAX, false);
    rule(&bus, "notes", "src", &[Arc::clone(&broken)]).await;

    let mut ids = Vec::new();
    for n in 0..3 {
        let id = bus
            .put_event(entry("src", &format!("n{n}")))
            .await
            .expect("publish");
        wait_for_dead_letter(&bus, id).await;
        ids.push(id);
    }

    let kept: Vec<EventId> = bus
        .dead_letters()
        .await
        .expect("dead letters")
        .iter()
        .map(|l| l.event.id)
        .collect();
    assert_eq!(kept, ids[1..].to_vec());
    assert_eq!(broken.calls(), 3);
    bus.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn slow_target_times_out_and_is_retried() {
    let cfg = BusConfig {
        target_timeout_ms: 20,
        max_attempts: 2,
        ..fast_config()
    };
    let bus = spawn_event_bus(cfg);
    let slow = RecordingTarget::slow("slow", Duration::from_millis(200));
    rule(&bus, "notes", "src", &[Arc::clone(&slow)]).await;
    let mut sub = bus.subscribe();

    let id = bus.put_event(entry("src", "n1")).await.expect("publish");
    let done = wait_for_terminal(&mut sub, id, 1).await;
    assert!(matches!(&done[0], BusEvent::DeadLettered { error, .. } if error.contains("timed out")));
    assert_eq!(slow.calls(), 2);
    bus.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn rules_can_be_replaced_and_removed() {
    let bus = spawn_event_bus(fast_config());
    let first = RecordingTarget::new("first");
    let second = RecordingTarget::new("second");
    rule(&bus, "notes", "src", &[Arc::clone(&first)]).await;
    rule(&bus, "notes", "src", &[Arc::clone(&second)]).await;
    assert_eq!(bus.rule_names().await.expect("names"), vec!["notes".to_string()]);

    let mut sub = bus.subscribe();
    let id = bus.put_event(entry("src", "n1")).await.expect("publish");
    wait_for_terminal(&mut sub, id, 1).await;
    assert_eq!(first.calls(), 0);
    assert_eq!(second.calls(), 1);

    assert!(bus.remove_rule("notes").await.expect("remove"));
    assert!(!bus.remove_rule("notes").await.expect("remove again"));
    bus.put_event(entry("src", "n2")).await.expect("publish");
    bus.shutdown().await.expect("shutdown");
    assert_eq!(second.calls(), 1);
}

#[tokio::test]
async fn batch_with_missing_source_is_rejected_whole() {
    let bus = spawn_event_bus(fast_config());
    let target = RecordingTarget::new("t");
    rule(&bus, "notes", "src", &[Arc::clone(&target)]).await;

    let err = bus
        .put_events(vec![entry("src", "n1"), entry("", "n2")])
        .await
        .expect_err("must reject");
    assert!(matches!(err, BusError::InvalidEntry(_)));

    bus.shutdown().await.expect("shutdown");
    assert_eq!(target.calls(), 0);
}

#[tokio::test]
async fn shutdown_waits_for_pending_retries() {
    let bus = spawn_event_bus(fast_config());
    let flaky = RecordingTarget::failing("flaky", 3, true);
    rule(&bus, "notes", "src", &[Arc::clone(&flaky)]).await;

    bus.put_event(entry("src", "n1")).await.expect("publish");
    bus.shutdown().await.expect("shutdown");

    assert_eq!(flaky.seen().len(), 1);
    assert!(matches!(
        bus.put_event(entry("src", "n2")).await,
        Err(BusError::ChannelClosed)
    ));
}
