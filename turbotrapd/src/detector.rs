use crate::bus::IncidentBus;
use crate::schema::{AttackSummary, Classification, Incident, IncidentKind, WriteObservation};
use chrono::Utc;
use dashmap::DashMap;
use log::{debug, warn};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::{Duration, Instant};
use uuid::Uuid;

/// Connections allowed per source inside the trailing window before the
/// source is flagged.
pub const MAX_CONNECTIONS_PER_MINUTE: usize = 10;
pub const CONNECTION_WINDOW: Duration = Duration::from_secs(60);

/// Diagnostic and file-transfer codes an attacker probes with; everything
/// else is tallied but never flagged.
pub const SUSPICIOUS_FUNCTION_CODES: [u8; 6] = [8, 17, 20, 21, 22, 23];

/// Sentinel values commonly used to slam actuators to their limits.
pub const SUSPICIOUS_WRITE_VALUES: [u16; 3] = [0, 65535, 65000];
pub const EXTREME_WRITE_LIMIT: u16 = 50000;

/// Registers 1..=6 hold the simulated sensor block; writes above this bound
/// there are flagged even below the extreme limit. Deliberately one literal
/// bound across unrelated sensor units.
pub const CRITICAL_REGISTER_MAX: u16 = 6;
pub const CRITICAL_WRITE_LIMIT: u16 = 30000;

const SUSPICIOUS_WRITE_RETENTION: usize = 256;

/// Human-readable names for Modbus function codes served by the decoy.
pub fn function_code_description(code: u8) -> String {
    let name = match code {
        1 => "Read Coils",
        2 => "Read Discrete Inputs",
        3 => "Read Holding Registers",
        4 => "Read Input Registers",
        5 => "Write Single Coil",
        6 => "Write Single Register",
        8 => "Diagnostics (SUSPICIOUS)",
        15 => "Write Multiple Coils",
        16 => "Write Multiple Registers",
        17 => "Report Slave ID (RECON)",
        20 => "Read File Record (SUSPICIOUS)",
        21 => "Write File Record (DANGEROUS)",
        22 => "Mask Write Register (DANGEROUS)",
        23 => "Read/Write Multiple Registers (SUSPICIOUS)",
        other => return format!("Unknown Function Code {other}"),
    };
    name.to_string()
}

fn normalize_source(source: &str) -> String {
    let trimmed = source.trim();
    if trimmed.is_empty() {
        "unknown".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Stateful classifier over protocol operations.
///
/// Every `observe_*` call is synchronous, holds at most one per-key shard
/// lock, and never touches I/O; confirmed incidents are handed to the
/// [`IncidentBus`] which dispatches them off the hot path.
pub struct AttackDetector {
    connection_windows: DashMap<String, VecDeque<Instant>>,
    function_code_tally: DashMap<u8, u64>,
    suspicious_writes: Mutex<VecDeque<WriteObservation>>,
    attack_count: AtomicU64,
    critical_register_max: u16,
    critical_write_limit: u16,
    bus: Arc<IncidentBus>,
}

impl AttackDetector {
    pub fn new(bus: Arc<IncidentBus>) -> Self {
        Self::with_thresholds(bus, CRITICAL_REGISTER_MAX, CRITICAL_WRITE_LIMIT)
    }

    pub fn with_thresholds(
        bus: Arc<IncidentBus>,
        critical_register_max: u16,
        critical_write_limit: u16,
    ) -> Self {
        Self {
            connection_windows: DashMap::new(),
            function_code_tally: DashMap::new(),
            suspicious_writes: Mutex::new(VecDeque::new()),
            attack_count: AtomicU64::new(0),
            critical_register_max,
            critical_write_limit,
            bus,
        }
    }

    /// Called once per accepted session. Appends to the source's sliding
    /// window, prunes entries older than the window, and flags the source
    /// once it exceeds [`MAX_CONNECTIONS_PER_MINUTE`].
    pub fn observe_connection(&self, source: &str) -> Classification {
        let source = normalize_source(source);
        let now = Instant::now();

        let count = {
            let mut window = self.connection_windows.entry(source.clone()).or_default();
            window.push_back(now);
            while window
                .front()
                .is_some_and(|front| now.duration_since(*front) > CONNECTION_WINDOW)
            {
                window.pop_front();
            }
            window.len()
        };

        debug!("[detector] connection from {source} ({count} in window)");
        if count <= MAX_CONNECTIONS_PER_MINUTE {
            return Classification::benign(None);
        }

        warn!("[detector] rate limit exceeded: {source} ({count} connections/min)");
        let description = format!("{count} connections within the last minute");
        self.raise(Incident {
            id: Uuid::new_v4(),
            kind: IncidentKind::RateLimitExceeded,
            source,
            timestamp: Utc::now(),
            severity: IncidentKind::RateLimitExceeded.severity(),
            attack_type: "Rate Limiting".to_string(),
            description: description.clone(),
            register: None,
            value: None,
            function_code: None,
        });
        Classification::suspicious("Rate Limiting".to_string(), description)
    }

    /// Called once per protocol operation. The tally is incremented for
    /// every code, benign or not; only membership in
    /// [`SUSPICIOUS_FUNCTION_CODES`] makes the verdict suspicious.
    pub fn observe_function_code(&self, code: u8, source: &str) -> Classification {
        let source = normalize_source(source);
        *self.function_code_tally.entry(code).or_insert(0) += 1;

        let description = function_code_description(code);
        if !SUSPICIOUS_FUNCTION_CODES.contains(&code) {
            return Classification::benign(Some(description));
        }

        warn!("[detector] suspicious function code {code} from {source}");
        let attack_type = format!("Dangerous Function Code {code}");
        self.raise(Incident {
            id: Uuid::new_v4(),
            kind: IncidentKind::DangerousFunctionCode,
            source,
            timestamp: Utc::now(),
            severity: IncidentKind::DangerousFunctionCode.severity(),
            attack_type: attack_type.clone(),
            description: description.clone(),
            register: None,
            value: None,
            function_code: Some(code),
        });
        Classification::suspicious(attack_type, description)
    }

    /// Called once per register write. The three rules are independent and
    /// disjunctive: sentinel values, anything above the extreme limit, and
    /// high values aimed at the critical sensor registers.
    pub fn observe_write(&self, register: u16, value: u16, source: &str) -> Classification {
        let source = normalize_source(source);

        let suspicious = SUSPICIOUS_WRITE_VALUES.contains(&value)
            || value > EXTREME_WRITE_LIMIT
            || ((1..=self.critical_register_max).contains(&register)
                && value > self.critical_write_limit);
        if !suspicious {
            return Classification::benign(None);
        }

        warn!("[detector] suspicious write: register {register} = {value} from {source}");
        {
            let mut writes = self.suspicious_writes.lock().unwrap();
            writes.push_back(WriteObservation {
                register,
                value,
                source: source.clone(),
                timestamp: Utc::now(),
            });
            if writes.len() > SUSPICIOUS_WRITE_RETENTION {
                writes.pop_front();
            }
        }

        let description = format!("Suspicious value {value} written to register {register}");
        self.raise(Incident {
            id: Uuid::new_v4(),
            kind: IncidentKind::MaliciousWrite,
            source,
            timestamp: Utc::now(),
            severity: IncidentKind::MaliciousWrite.severity(),
            attack_type: "Malicious Write Operation".to_string(),
            description: description.clone(),
            register: Some(register),
            value: Some(value),
            function_code: None,
        });
        Classification::suspicious("Malicious Write Operation".to_string(), description)
    }

    /// Point-in-time aggregate; mutates nothing.
    pub fn summary(&self) -> AttackSummary {
        AttackSummary {
            total_attacks: self.attack_count.load(Ordering::Relaxed),
            unique_attackers: self.connection_windows.len(),
            suspicious_writes: self.suspicious_writes.lock().unwrap().len(),
            function_code_tally: self
                .function_code_tally
                .iter()
                .map(|entry| (*entry.key(), *entry.value()))
                .collect(),
            last_updated: Utc::now(),
        }
    }

    fn raise(&self, incident: Incident) {
        self.attack_count.fetch_add(1, Ordering::Relaxed);
        self.bus.publish(incident);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FeedEvent;
    use crate::sinks::live_feed::LiveFeedSink;
    use tokio::sync::broadcast;
    use tokio::time;

    fn test_detector() -> (AttackDetector, broadcast::Receiver<FeedEvent>) {
        let feed = LiveFeedSink::new(64);
        let rx = feed.subscribe();
        let bus = Arc::new(IncidentBus::new(feed));
        (AttackDetector::new(bus), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_fires_on_eleventh_connection() {
        let (detector, mut rx) = test_detector();
        for i in 0..MAX_CONNECTIONS_PER_MINUTE {
            let verdict = detector.observe_connection("10.0.0.5");
            assert!(!verdict.is_suspicious, "connection {} flagged early", i + 1);
        }
        let before = detector.summary().total_attacks;
        let verdict = detector.observe_connection("10.0.0.5");
        assert!(verdict.is_suspicious);
        assert_eq!(verdict.attack_type.as_deref(), Some("Rate Limiting"));
        assert_eq!(detector.summary().total_attacks, before + 1);

        match rx.try_recv().unwrap() {
            FeedEvent::Incident(incident) => {
                assert_eq!(incident.kind, IncidentKind::RateLimitExceeded);
                assert_eq!(incident.source, "10.0.0.5");
            }
            other => panic!("unexpected feed event: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn window_prunes_after_sixty_seconds() {
        let (detector, _rx) = test_detector();
        for _ in 0..MAX_CONNECTIONS_PER_MINUTE {
            detector.observe_connection("10.0.0.5");
        }
        time::advance(Duration::from_secs(61)).await;
        let verdict = detector.observe_connection("10.0.0.5");
        assert!(!verdict.is_suspicious, "stale entries must not count");
    }

    #[tokio::test]
    async fn tally_counts_every_code_flags_only_listed() {
        let (detector, _rx) = test_detector();
        for _ in 0..3 {
            assert!(!detector.observe_function_code(3, "10.0.0.5").is_suspicious);
        }
        let verdict = detector.observe_function_code(8, "10.0.0.5");
        assert!(verdict.is_suspicious);
        assert_eq!(
            verdict.attack_type.as_deref(),
            Some("Dangerous Function Code 8")
        );
        // Repeats stay suspicious independent of count.
        assert!(detector.observe_function_code(8, "10.0.0.5").is_suspicious);

        let tally = detector.summary().function_code_tally;
        assert_eq!(tally.get(&3), Some(&3));
        assert_eq!(tally.get(&8), Some(&2));
    }

    #[tokio::test]
    async fn unknown_codes_get_generic_description() {
        let (detector, _rx) = test_detector();
        let verdict = detector.observe_function_code(99, "10.0.0.5");
        assert!(!verdict.is_suspicious);
        assert_eq!(
            verdict.description.as_deref(),
            Some("Unknown Function Code 99")
        );
        assert_eq!(detector.summary().function_code_tally.get(&99), Some(&1));
    }

    #[tokio::test]
    async fn write_rules_are_disjunctive() {
        let (detector, _rx) = test_detector();
        // Critical sensor register above the per-register bound.
        assert!(detector.observe_write(1, 65000, "s").is_suspicious);
        // Register outside the sensor block, value under the extreme limit.
        assert!(!detector.observe_write(7, 40000, "s").is_suspicious);
        // Sentinel values flag on any register.
        assert!(detector.observe_write(7, 0, "s").is_suspicious);
        assert!(detector.observe_write(7, 65535, "s").is_suspicious);
        // Extreme values flag everywhere.
        assert!(detector.observe_write(100, 50001, "s").is_suspicious);
        // Boundary of the critical rule.
        assert!(!detector.observe_write(6, 30000, "s").is_suspicious);
        assert!(detector.observe_write(6, 30001, "s").is_suspicious);
        assert!(!detector.observe_write(0, 30001, "s").is_suspicious);
    }

    #[tokio::test]
    async fn suspicious_write_log_is_bounded() {
        let (detector, _rx) = test_detector();
        for _ in 0..(SUSPICIOUS_WRITE_RETENTION + 40) {
            detector.observe_write(2, 60000, "10.0.0.5");
        }
        assert_eq!(
            detector.summary().suspicious_writes,
            SUSPICIOUS_WRITE_RETENTION
        );
    }

    #[tokio::test]
    async fn blank_source_is_normalized_not_rejected() {
        let (detector, _rx) = test_detector();
        detector.observe_connection("  ");
        let summary = detector.summary();
        assert_eq!(summary.unique_attackers, 1);
        assert!(detector.connection_windows.contains_key("unknown"));
    }

    #[tokio::test]
    async fn concurrent_sources_keep_disjoint_windows() {
        let (detector, _rx) = test_detector();
        let detector = Arc::new(detector);
        let mut handles = Vec::new();
        for i in 0..16 {
            let detector = Arc::clone(&detector);
            handles.push(tokio::spawn(async move {
                let source = format!("10.0.1.{i}");
                for _ in 0..5 {
                    assert!(!detector.observe_connection(&source).is_suspicious);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let summary = detector.summary();
        assert_eq!(summary.unique_attackers, 16);
        assert_eq!(summary.total_attacks, 0);
    }
}
