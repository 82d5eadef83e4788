//! Background trigger scheduler for heartbeat/cron-like event sources
//! (§4.8). `next_due` advances by a fixed `interval`, never by
//! `now + interval`, so a slow emit doesn't push later ticks later too —
//! the schedule itself doesn't drift even if individual ticks run late.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use relayhive_schema::{Event, RiskLevel};
use tokio::task::JoinHandle;

type EmitFn = Arc<dyn Fn(Event) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

#[derive(Debug, Clone)]
struct ScheduledTrigger {
    name: String,
    event_type: String,
    interval_seconds: f64,
    source: String,
    subject: Option<String>,
    payload: serde_json::Value,
    trigger_kind: &'static str,
    schedule: String,
}

/// Raw cron-job configuration as read from `RuntimeConfig` (§10).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CronJobSpec {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

/// Parses a narrow cron subset into a tick interval: `@every:<seconds>`
/// or `*/N * * * *` (every N minutes). Anything else is unsupported and
/// returns `None` rather than attempting full cron syntax.
pub fn parse_schedule_to_interval_seconds(schedule: &str) -> Option<f64> {
    let value = schedule.trim();
    if value.is_empty() {
        return None;
    }

    if let Some(raw) = value.strip_prefix("@every:") {
        let seconds: f64 = raw.trim().parse().ok()?;
        return (seconds > 0.0).then_some(seconds);
    }

    let minute_re = Regex::new(r"^\*/(\d+)\s+\*\s+\*\s+\*\s+\*$").expect("static regex is valid");
    if let Some(caps) = minute_re.captures(value) {
        let minutes: u64 = caps[1].parse().ok()?;
        if minutes == 0 {
            return None;
        }
        return Some((minutes * 60) as f64);
    }

    None
}

pub struct TriggerScheduler {
    emit: EmitFn,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl TriggerScheduler {
    pub fn new<F, Fut>(emit: F) -> Self
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            emit: Arc::new(move |event| Box::pin(emit(event))),
            tasks: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    pub async fn start_heartbeat(
        &self,
        interval_seconds: f64,
        event_type: impl Into<String>,
        source: impl Into<String>,
        subject: Option<String>,
        payload: serde_json::Value,
    ) -> bool {
        if interval_seconds <= 0.0 {
            return false;
        }
        let trigger = ScheduledTrigger {
            name: "heartbeat".to_string(),
            event_type: event_type.into(),
            interval_seconds,
            source: source.into(),
            subject,
            payload,
            trigger_kind: "heartbeat",
            schedule: format!("@every:{interval_seconds}"),
        };
        self.spawn(trigger).await;
        true
    }

    /// Starts one periodic task per parseable job spec; unparseable
    /// schedules are silently skipped (they never would have fired under
    /// the original trigger_scheduler either). Returns the number started.
    pub async fn start_cron_jobs(&self, jobs: Vec<CronJobSpec>) -> usize {
        let mut started = 0;
        for (idx, job) in jobs.into_iter().enumerate() {
            let schedule = job.schedule.or(job.cron).unwrap_or_default();
            let Some(interval_seconds) = (!schedule.trim().is_empty())
                .then(|| parse_schedule_to_interval_seconds(&schedule))
                .flatten()
            else {
                continue;
            };

            let name = job.name.unwrap_or_else(|| format!("cron_job_{idx}"));
            let event_type = job.event_type.unwrap_or_else(|| format!("cron.job.{name}.tick"));
            let source = job.source.unwrap_or_else(|| "system.cron".to_string());
            let payload = job.payload.unwrap_or_else(|| serde_json::json!({}));

            let trigger = ScheduledTrigger {
                name,
                event_type,
                interval_seconds,
                source,
                subject: job.subject,
                payload,
                trigger_kind: "cron",
                schedule,
            };
            self.spawn(trigger).await;
            started += 1;
        }
        started
    }

    async fn spawn(&self, trigger: ScheduledTrigger) {
        let emit = self.emit.clone();
        let handle = tokio::spawn(run_periodic(trigger, emit));
        self.tasks.lock().await.push(handle);
    }

    /// Cancels every running trigger task and waits for them to unwind.
    pub async fn stop(&self) {
        let mut tasks = self.tasks.lock().await;
        for task in tasks.iter() {
            task.abort();
        }
        for task in tasks.drain(..) {
            let _ = task.await;
        }
    }
}

async fn run_periodic(trigger: ScheduledTrigger, emit: EmitFn) {
    let interval = Duration::from_secs_f64(trigger.interval_seconds.max(0.001));
    let mut next_due = tokio::time::Instant::now() + interval;
    loop {
        tokio::time::sleep_until(next_due).await;

        let now = chrono::Utc::now();
        let mut payload = trigger.payload.clone();
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("trigger_kind".to_string(), serde_json::json!(trigger.trigger_kind));
            obj.insert("trigger_name".to_string(), serde_json::json!(trigger.name));
            obj.insert("schedule".to_string(), serde_json::json!(trigger.schedule));
            obj.insert("interval_seconds".to_string(), serde_json::json!(trigger.interval_seconds));
            obj.insert("emitted_at".to_string(), serde_json::json!(now.to_rfc3339()));
        }

        let mut event = Event::new(trigger.event_type.clone(), trigger.source.clone()).with_payload(payload);
        if let Some(subject) = &trigger.subject {
            event = event.with_subject(subject.clone());
        }
        event = event.with_risk_hint(RiskLevel::Low);

        emit(event).await;
        next_due += interval;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn parses_every_seconds() {
        assert_eq!(parse_schedule_to_interval_seconds("@every:30"), Some(30.0));
        assert_eq!(parse_schedule_to_interval_seconds("@every:2.5"), Some(2.5));
        assert_eq!(parse_schedule_to_interval_seconds("@every:0"), None);
    }

    #[test]
    fn parses_minute_cron_subset() {
        assert_eq!(parse_schedule_to_interval_seconds("*/5 * * * *"), Some(300.0));
        assert_eq!(parse_schedule_to_interval_seconds("*/0 * * * *"), None);
    }

    #[test]
    fn rejects_unsupported_cron_syntax() {
        assert_eq!(parse_schedule_to_interval_seconds("0 9 * * 1-5"), None);
        assert_eq!(parse_schedule_to_interval_seconds(""), None);
    }

    #[tokio::test]
    async fn heartbeat_ticks_at_least_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let scheduler = TriggerScheduler::new(move |_event| {
            let count = count_clone.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });

        assert!(scheduler.start_heartbeat(0.01, "health.heartbeat.tick", "system.heartbeat", None, serde_json::json!({})).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.stop().await;
        assert!(count.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn zero_interval_heartbeat_does_not_start() {
        let scheduler = TriggerScheduler::new(|_event| async {});
        assert!(!scheduler.start_heartbeat(0.0, "t", "s", None, serde_json::json!({})).await);
    }
}
