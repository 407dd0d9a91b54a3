use crate::schema::Incident;
use crate::sinks::{DeliveryError, IncidentSink, LiveFeedSink};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep, timeout};

const DEAD_LETTER_RETENTION: usize = 128;

/// Backoff schedule for guaranteed sinks.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

/// Incident a guaranteed sink could not accept, retained for manual
/// follow-up.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeadLetter {
    pub sink: &'static str,
    pub incident: Incident,
    pub reason: String,
    pub at: DateTime<Utc>,
}

struct GuaranteedQueue {
    name: &'static str,
    tx: mpsc::UnboundedSender<Incident>,
}

/// Decouples detection from consumption.
///
/// `publish` returns immediately: guaranteed sinks each get their own
/// unbounded queue and worker task (at-least-once, in publish order,
/// bounded-backoff retries), the live feed gets a lossy broadcast
/// (at-most-once, no backpressure). A stalled sink only ever backs up
/// its own queue.
pub struct IncidentBus {
    queues: Mutex<Vec<GuaranteedQueue>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    feed: LiveFeedSink,
    dead_letters: Arc<Mutex<VecDeque<DeadLetter>>>,
    accepting: AtomicBool,
    retry: RetryPolicy,
}

impl IncidentBus {
    pub fn new(feed: LiveFeedSink) -> Self {
        Self::with_retry_policy(feed, RetryPolicy::default())
    }

    pub fn with_retry_policy(feed: LiveFeedSink, retry: RetryPolicy) -> Self {
        Self {
            queues: Mutex::new(Vec::new()),
            workers: Mutex::new(Vec::new()),
            feed,
            dead_letters: Arc::new(Mutex::new(VecDeque::new())),
            accepting: AtomicBool::new(true),
            retry,
        }
    }

    pub fn feed(&self) -> &LiveFeedSink {
        &self.feed
    }

    /// Attach a guaranteed sink and spawn its delivery worker. Must run
    /// inside a tokio runtime.
    pub fn attach(&self, sink: Arc<dyn IncidentSink>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let name = sink.name();
        let worker = tokio::spawn(drive_sink(
            name,
            rx,
            sink,
            self.retry,
            Arc::clone(&self.dead_letters),
        ));
        self.queues.lock().unwrap().push(GuaranteedQueue { name, tx });
        self.workers.lock().unwrap().push(worker);
    }

    /// Fire-and-forget from the caller's perspective; never blocks, never
    /// errors into the protocol hot path.
    pub fn publish(&self, incident: Incident) {
        if !self.accepting.load(Ordering::Acquire) {
            debug!("[bus] dropping incident {} (shutting down)", incident.id);
            return;
        }
        for queue in self.queues.lock().unwrap().iter() {
            if queue.tx.send(incident.clone()).is_err() {
                warn!("[bus] {} queue closed, incident {} lost", queue.name, incident.id);
            }
        }
        self.feed.push_incident(incident);
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().unwrap().iter().cloned().collect()
    }

    /// Stop accepting publications, give workers a bounded grace period to
    /// drain their queues, then abandon whatever is left.
    pub async fn shutdown(&self, grace: Duration) {
        self.accepting.store(false, Ordering::Release);
        // Dropping the senders lets each worker run its queue dry and exit.
        self.queues.lock().unwrap().clear();
        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for worker in workers {
            match timeout(grace, worker).await {
                Ok(_) => {}
                Err(_) => warn!("[bus] sink worker did not drain within {grace:?}, abandoning"),
            }
        }
        info!("[bus] shut down");
    }
}

async fn drive_sink(
    name: &'static str,
    mut rx: mpsc::UnboundedReceiver<Incident>,
    sink: Arc<dyn IncidentSink>,
    retry: RetryPolicy,
    dead_letters: Arc<Mutex<VecDeque<DeadLetter>>>,
) {
    info!("[bus] {name} sink worker started");
    while let Some(incident) = rx.recv().await {
        let mut delay = retry.base_delay;
        let mut attempt = 1u32;
        loop {
            match sink.deliver(&incident).await {
                Ok(()) => break,
                Err(DeliveryError::Transient(reason)) if attempt < retry.max_attempts => {
                    debug!(
                        "[bus] {name} attempt {attempt}/{} failed ({reason}), retrying in {delay:?}",
                        retry.max_attempts
                    );
                    sleep(delay).await;
                    delay = (delay * 2).min(retry.max_delay);
                    attempt += 1;
                }
                Err(err) => {
                    let reason = if err.is_transient() {
                        format!("{} retries exhausted: {}", retry.max_attempts, err.reason())
                    } else {
                        err.reason().to_string()
                    };
                    warn!("[bus] {name} permanently failed incident {}: {reason}", incident.id);
                    let mut dead = dead_letters.lock().unwrap();
                    dead.push_back(DeadLetter {
                        sink: name,
                        incident: incident.clone(),
                        reason,
                        at: Utc::now(),
                    });
                    if dead.len() > DEAD_LETTER_RETENTION {
                        dead.pop_front();
                    }
                    break;
                }
            }
        }
    }
    info!("[bus] {name} sink worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{IncidentKind, Severity};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use tokio::task::yield_now;

    fn incident(n: u16) -> Incident {
        Incident {
            id: uuid::Uuid::new_v4(),
            kind: IncidentKind::MaliciousWrite,
            source: "10.0.0.5".into(),
            timestamp: Utc::now(),
            severity: Severity::High,
            attack_type: "Malicious Write Operation".into(),
            description: format!("write {n}"),
            register: Some(n),
            value: Some(60000),
            function_code: None,
        }
    }

    /// Fails with a transient error until `failures` attempts have been
    /// burned, then records deliveries in order.
    struct FlakySink {
        failures: u32,
        attempts: AtomicU32,
        delivered: Mutex<Vec<u16>>,
    }

    impl FlakySink {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                attempts: AtomicU32::new(0),
                delivered: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl IncidentSink for FlakySink {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn deliver(&self, incident: &Incident) -> Result<(), DeliveryError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures {
                return Err(DeliveryError::Transient("connection refused".into()));
            }
            self.delivered.lock().unwrap().push(incident.register.unwrap_or(0));
            Ok(())
        }
    }

    struct BrokenSink;

    #[async_trait]
    impl IncidentSink for BrokenSink {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn deliver(&self, _incident: &Incident) -> Result<(), DeliveryError> {
            Err(DeliveryError::Permanent("invalid configuration".into()))
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_until_delivery() {
        let bus = IncidentBus::with_retry_policy(LiveFeedSink::new(8), fast_retry());
        let sink = Arc::new(FlakySink::new(2));
        bus.attach(Arc::clone(&sink) as Arc<dyn IncidentSink>);

        bus.publish(incident(1));
        bus.shutdown(Duration::from_secs(5)).await;

        assert_eq!(sink.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(*sink.delivered.lock().unwrap(), vec![1]);
        assert!(bus.dead_letters().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_go_to_dead_letters() {
        let bus = IncidentBus::with_retry_policy(LiveFeedSink::new(8), fast_retry());
        let sink = Arc::new(FlakySink::new(100));
        bus.attach(Arc::clone(&sink) as Arc<dyn IncidentSink>);

        bus.publish(incident(7));
        bus.shutdown(Duration::from_secs(5)).await;

        assert_eq!(sink.attempts.load(Ordering::SeqCst), 3);
        let dead = bus.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].sink, "flaky");
        assert_eq!(dead[0].incident.register, Some(7));
        assert!(dead[0].reason.contains("retries exhausted"));
    }

    #[tokio::test]
    async fn permanent_failure_dead_letters_without_retry() {
        let bus = IncidentBus::with_retry_policy(LiveFeedSink::new(8), fast_retry());
        bus.attach(Arc::new(BrokenSink));

        bus.publish(incident(3));
        bus.shutdown(Duration::from_secs(1)).await;

        let dead = bus.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].reason, "invalid configuration");
    }

    #[tokio::test]
    async fn failing_sink_does_not_starve_the_feed() {
        let bus = IncidentBus::with_retry_policy(LiveFeedSink::new(32), fast_retry());
        let mut feed_rx = bus.feed().subscribe();
        bus.attach(Arc::new(BrokenSink));

        for n in 0..10 {
            bus.publish(incident(n));
        }
        for n in 0..10 {
            match feed_rx.recv().await.unwrap() {
                crate::schema::FeedEvent::Incident(i) => assert_eq!(i.register, Some(n)),
                other => panic!("unexpected feed event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn per_sink_delivery_preserves_publish_order() {
        let bus = IncidentBus::with_retry_policy(LiveFeedSink::new(8), fast_retry());
        let sink = Arc::new(FlakySink::new(0));
        bus.attach(Arc::clone(&sink) as Arc<dyn IncidentSink>);

        for n in 0..20 {
            bus.publish(incident(n));
        }
        bus.shutdown(Duration::from_secs(1)).await;

        let delivered = sink.delivered.lock().unwrap();
        let expected: Vec<u16> = (0..20).collect();
        assert_eq!(*delivered, expected);
    }

    #[tokio::test]
    async fn shutdown_rejects_new_publications() {
        let bus = IncidentBus::with_retry_policy(LiveFeedSink::new(8), fast_retry());
        let sink = Arc::new(FlakySink::new(0));
        bus.attach(Arc::clone(&sink) as Arc<dyn IncidentSink>);

        bus.publish(incident(1));
        bus.shutdown(Duration::from_secs(1)).await;
        bus.publish(incident(2));
        yield_now().await;

        assert_eq!(*sink.delivered.lock().unwrap(), vec![1]);
    }
}
