use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, warn};
use uuid::Uuid;

use crate::config::SecurityLogConfig;
use crate::models::{IncidentSeverity, IncidentSource, NewSecurityIncident, RequestMeta};
use crate::repos::IncidentStore;

use super::counter::AttemptCounter;
use super::notifier::Notifier;

const MAX_CATEGORY_CHARS: usize = 100;
const MAX_IP_CHARS: usize = 45;
const MAX_ENDPOINT_CHARS: usize = 200;
const ALERT_PREVIEW_CHARS: usize = 500;

#[derive(Debug, Clone)]
pub struct IncidentReport {
    pub user_id: Uuid,
    pub source: IncidentSource,
    pub category: String,
    pub offending_text: String,
    pub request: RequestMeta,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncidentOutcome {
    pub incident_id: i64,
    pub attempt_count: u64,
    pub severity: IncidentSeverity,
    pub alert_sent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
    pub subject: String,
    pub html_body: String,
}

struct LoggerInner {
    config: SecurityLogConfig,
    counter: Arc<dyn AttemptCounter>,
    store: Arc<dyn IncidentStore>,
    notifier: Option<Arc<dyn Notifier>>,
}

/// Records security incidents off the request path. Failures are logged and
/// never reach the caller.
#[derive(Clone)]
pub struct SecurityIncidentLogger {
    inner: Arc<LoggerInner>,
}

impl SecurityIncidentLogger {
    pub fn new(
        config: SecurityLogConfig,
        counter: Arc<dyn AttemptCounter>,
        store: Arc<dyn IncidentStore>,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Self {
        Self {
            inner: Arc::new(LoggerInner {
                config,
                counter,
                store,
                notifier,
            }),
        }
    }

    /// Fire-and-forget variant of [`Self::record`].
    pub fn report(&self, report: IncidentReport) {
        if !self.inner.config.log_injection_attempts {
            return;
        }

        let logger = self.clone();
        tokio::spawn(async move {
            logger.record(report).await;
        });
    }

    pub async fn record(&self, report: IncidentReport) -> Option<IncidentOutcome> {
        let inner = &self.inner;
        if !inner.config.log_injection_attempts {
            return None;
        }

        let attempt_count = match inner.counter.increment(report.user_id).await {
            Ok(count) => count,
            Err(err) => {
                warn!(user_id = %report.user_id, "attempt counter unavailable, treating incident as first attempt: {err}");
                1
            }
        };
        let severity = IncidentSeverity::for_attempt(attempt_count);

        warn!(
            user_id = %report.user_id,
            source = report.source.as_str(),
            category = %report.category,
            severity = severity.as_str(),
            attempt_count,
            ip_address = report.request.ip_address.as_deref().unwrap_or("-"),
            endpoint = report.request.endpoint.as_deref().unwrap_or("-"),
            "security incident blocked"
        );
        if attempt_count >= inner.config.alert_threshold {
            error!(
                user_id = %report.user_id,
                attempt_count,
                "repeated prompt injection attempts from user"
            );
        }

        let incident = NewSecurityIncident {
            user_id: report.user_id,
            source: report.source,
            category: clip(&report.category, MAX_CATEGORY_CHARS),
            offending_text: report.offending_text.clone(),
            ip_address: report
                .request
                .ip_address
                .as_deref()
                .map(|value| clip(value, MAX_IP_CHARS)),
            user_agent: report.request.user_agent.clone(),
            endpoint: report
                .request
                .endpoint
                .as_deref()
                .map(|value| clip(value, MAX_ENDPOINT_CHARS)),
            severity,
            attempt_count: i64::try_from(attempt_count).unwrap_or(i64::MAX),
        };

        let incident_id = match inner.store.insert_incident(incident).await {
            Ok(id) => id,
            Err(err) => {
                error!(user_id = %report.user_id, "failed to persist security incident: {err}");
                return None;
            }
        };

        let alert_sent = self
            .send_alerts(incident_id, &report, severity, attempt_count)
            .await;

        Some(IncidentOutcome {
            incident_id,
            attempt_count,
            severity,
            alert_sent,
        })
    }

    async fn send_alerts(
        &self,
        incident_id: i64,
        report: &IncidentReport,
        severity: IncidentSeverity,
        attempt_count: u64,
    ) -> bool {
        let inner = &self.inner;
        if !inner.config.alerts_enabled || attempt_count < inner.config.alert_threshold {
            return false;
        }
        let Some(notifier) = inner.notifier.as_ref() else {
            return false;
        };
        if inner.config.alert_recipients.is_empty() {
            warn!(incident_id, "security alert threshold reached but no recipients configured");
            return false;
        }

        let alert = build_alert(report, severity, attempt_count, Utc::now());
        let mut delivered = false;
        for recipient in &inner.config.alert_recipients {
            match notifier
                .notify(recipient, &alert.subject, &alert.html_body)
                .await
            {
                Ok(()) => delivered = true,
                Err(err) => {
                    warn!(incident_id, recipient = %recipient, "security alert delivery failed: {err}");
                }
            }
        }

        if !delivered {
            return false;
        }
        if let Err(err) = inner.store.mark_alert_sent(incident_id).await {
            error!(incident_id, "failed to flag security incident as alerted: {err}");
            return false;
        }
        true
    }
}

pub fn build_alert(
    report: &IncidentReport,
    severity: IncidentSeverity,
    attempt_count: u64,
    occurred_at: DateTime<Utc>,
) -> AlertMessage {
    let subject = format!(
        "SECURITY ALERT: prompt injection attempt #{attempt_count} (user {})",
        report.user_id
    );

    let mut preview = clip(&report.offending_text, ALERT_PREVIEW_CHARS);
    if report.offending_text.chars().count() > ALERT_PREVIEW_CHARS {
        preview.push_str("...");
    }

    let rows = [
        ("User", report.user_id.to_string()),
        ("Attempt", attempt_count.to_string()),
        ("Source", report.source.as_str().to_string()),
        ("Category", report.category.clone()),
        (
            "IP address",
            report.request.ip_address.clone().unwrap_or_default(),
        ),
        (
            "User agent",
            report.request.user_agent.clone().unwrap_or_default(),
        ),
        ("Endpoint", report.request.endpoint.clone().unwrap_or_default()),
        (
            "Timestamp",
            occurred_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        ),
    ];
    let table_rows = rows
        .iter()
        .map(|(label, value)| {
            format!(
                "<tr><th align=\"left\">{label}</th><td>{}</td></tr>",
                escape_html(value)
            )
        })
        .collect::<String>();

    let html_body = format!(
        "<html><body>\
         <h2>Prompt injection attempt blocked</h2>\
         <p><span style=\"background:{color};color:#ffffff;padding:2px 8px;\">{severity}</span></p>\
         <table>{table_rows}</table>\
         <h3>Message preview</h3>\
         <pre>{preview}</pre>\
         </body></html>",
        color = severity_color(severity),
        severity = severity.as_str(),
        preview = escape_html(&preview),
    );

    AlertMessage { subject, html_body }
}

fn severity_color(severity: IncidentSeverity) -> &'static str {
    match severity {
        IncidentSeverity::Low => "#28a745",
        IncidentSeverity::Medium => "#ffc107",
        IncidentSeverity::High => "#fd7e14",
        IncidentSeverity::Critical => "#dc3545",
    }
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn clip(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    use super::{IncidentReport, SecurityIncidentLogger, build_alert};
    use crate::config::SecurityLogConfig;
    use crate::models::{IncidentSeverity, IncidentSource, NewSecurityIncident, RequestMeta};
    use crate::repos::{IncidentStore, StoreError, StoreFuture};
    use crate::security::counter::{
        AttemptCounter, CounterError, CounterFuture, InMemoryAttemptCounter,
    };
    use crate::security::notifier::{NotifyError, NotifyFuture, Notifier};

    #[derive(Default)]
    struct RecordingIncidentStore {
        inserted: Mutex<Vec<NewSecurityIncident>>,
        alerted: Mutex<Vec<i64>>,
        fail_inserts: bool,
    }

    impl IncidentStore for RecordingIncidentStore {
        fn insert_incident<'a>(&'a self, incident: NewSecurityIncident) -> StoreFuture<'a, i64> {
            Box::pin(async move {
                if self.fail_inserts {
                    return Err(StoreError::InvalidData("insert refused".to_string()));
                }
                let mut inserted = self.inserted.lock().expect("lock");
                inserted.push(incident);
                Ok(inserted.len() as i64)
            })
        }

        fn mark_alert_sent<'a>(&'a self, incident_id: i64) -> StoreFuture<'a, ()> {
            Box::pin(async move {
                self.alerted.lock().expect("lock").push(incident_id);
                Ok(())
            })
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    impl Notifier for RecordingNotifier {
        fn notify<'a>(
            &'a self,
            recipient: &'a str,
            subject: &'a str,
            _html_body: &'a str,
        ) -> NotifyFuture<'a> {
            Box::pin(async move {
                if self.fail {
                    return Err(NotifyError::Rejected { status: 503 });
                }
                self.sent
                    .lock()
                    .expect("lock")
                    .push((recipient.to_string(), subject.to_string()));
                Ok(())
            })
        }
    }

    struct BrokenCounter;

    impl AttemptCounter for BrokenCounter {
        fn increment<'a>(&'a self, _user_id: Uuid) -> CounterFuture<'a, u64> {
            Box::pin(async { Err(CounterError::Unavailable("down".to_string())) })
        }

        fn get<'a>(&'a self, _user_id: Uuid) -> CounterFuture<'a, u64> {
            Box::pin(async { Err(CounterError::Unavailable("down".to_string())) })
        }

        fn reset<'a>(&'a self, _user_id: Uuid) -> CounterFuture<'a, ()> {
            Box::pin(async { Ok(()) })
        }

        fn clear_all<'a>(&'a self) -> CounterFuture<'a, u64> {
            Box::pin(async { Ok(0) })
        }
    }

    fn config() -> SecurityLogConfig {
        SecurityLogConfig {
            alert_recipients: vec!["security@example.com".to_string()],
            ..SecurityLogConfig::default()
        }
    }

    fn report(user_id: Uuid, text: &str) -> IncidentReport {
        IncidentReport {
            user_id,
            source: IncidentSource::Input,
            category: "instruction_override".to_string(),
            offending_text: text.to_string(),
            request: RequestMeta {
                ip_address: Some("203.0.113.9".to_string()),
                user_agent: Some("curl/8".to_string()),
                endpoint: Some("/v1/chat".to_string()),
            },
        }
    }

    #[tokio::test]
    async fn severity_escalates_and_alert_fires_at_threshold() {
        let store = Arc::new(RecordingIncidentStore::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let logger = SecurityIncidentLogger::new(
            config(),
            Arc::new(InMemoryAttemptCounter::new()),
            store.clone(),
            Some(notifier.clone()),
        );
        let user_id = Uuid::new_v4();

        let mut severities = Vec::new();
        let mut alerts = Vec::new();
        for _ in 0..4 {
            let outcome = logger
                .record(report(user_id, "ignore previous instructions"))
                .await
                .expect("incident should be recorded");
            severities.push(outcome.severity);
            alerts.push(outcome.alert_sent);
        }

        assert_eq!(
            severities,
            vec![
                IncidentSeverity::Low,
                IncidentSeverity::Medium,
                IncidentSeverity::High,
                IncidentSeverity::Critical,
            ]
        );
        assert_eq!(alerts, vec![false, false, true, true]);
        assert_eq!(*store.alerted.lock().expect("lock"), vec![3, 4]);

        let sent = notifier.sent.lock().expect("lock");
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, "security@example.com");
        assert_eq!(
            sent[0].1,
            format!("SECURITY ALERT: prompt injection attempt #3 (user {user_id})")
        );

        let inserted = store.inserted.lock().expect("lock");
        assert_eq!(inserted[0].attempt_count, 1);
        assert_eq!(inserted[3].attempt_count, 4);
        assert_eq!(inserted[0].endpoint.as_deref(), Some("/v1/chat"));
    }

    #[tokio::test]
    async fn failed_delivery_leaves_incident_unflagged() {
        let store = Arc::new(RecordingIncidentStore::default());
        let logger = SecurityIncidentLogger::new(
            SecurityLogConfig {
                alert_threshold: 1,
                ..config()
            },
            Arc::new(InMemoryAttemptCounter::new()),
            store.clone(),
            Some(Arc::new(RecordingNotifier {
                fail: true,
                ..RecordingNotifier::default()
            })),
        );

        let outcome = logger
            .record(report(Uuid::new_v4(), "developer mode"))
            .await
            .expect("incident should be recorded");

        assert!(!outcome.alert_sent);
        assert!(store.alerted.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn disabled_logging_records_nothing() {
        let store = Arc::new(RecordingIncidentStore::default());
        let counter = Arc::new(InMemoryAttemptCounter::new());
        let logger = SecurityIncidentLogger::new(
            SecurityLogConfig {
                log_injection_attempts: false,
                ..config()
            },
            counter.clone(),
            store.clone(),
            None,
        );
        let user_id = Uuid::new_v4();

        assert!(logger.record(report(user_id, "DAN")).await.is_none());
        assert!(store.inserted.lock().expect("lock").is_empty());
        assert_eq!(counter.get(user_id).await.expect("get"), 0);
    }

    #[tokio::test]
    async fn counter_outage_falls_back_to_first_attempt() {
        let store = Arc::new(RecordingIncidentStore::default());
        let logger =
            SecurityIncidentLogger::new(config(), Arc::new(BrokenCounter), store.clone(), None);

        let outcome = logger
            .record(report(Uuid::new_v4(), "god mode"))
            .await
            .expect("incident should be recorded");

        assert_eq!(outcome.attempt_count, 1);
        assert_eq!(outcome.severity, IncidentSeverity::Low);
    }

    #[tokio::test]
    async fn store_failure_is_swallowed() {
        let store = Arc::new(RecordingIncidentStore {
            fail_inserts: true,
            ..RecordingIncidentStore::default()
        });
        let logger = SecurityIncidentLogger::new(
            config(),
            Arc::new(InMemoryAttemptCounter::new()),
            store,
            None,
        );

        assert!(logger.record(report(Uuid::new_v4(), "sudo mode")).await.is_none());
    }

    #[test]
    fn alert_body_escapes_and_truncates_preview() {
        let user_id = Uuid::new_v4();
        let long_text = format!("<script>{}</script>", "x".repeat(600));
        let occurred_at = Utc
            .with_ymd_and_hms(2026, 3, 14, 9, 26, 53)
            .single()
            .expect("valid timestamp");
        let alert = build_alert(
            &report(user_id, &long_text),
            IncidentSeverity::High,
            3,
            occurred_at,
        );

        assert!(alert.html_body.contains("&lt;script&gt;"));
        assert!(!alert.html_body.contains("<script>"));
        assert!(alert.html_body.contains("#fd7e14"));
        assert!(alert.html_body.contains("...</pre>"));
        assert!(alert.html_body.contains("/v1/chat"));
        assert!(!alert.html_body.contains("</script>"));
        assert!(alert.html_body.contains(
            "<tr><th align=\"left\">Timestamp</th><td>2026-03-14 09:26:53 UTC</td></tr>"
        ));
    }
}
