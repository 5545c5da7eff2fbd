//! End-to-end check-up flows driven through the controller with scripted
//! sources, sinks and insight backends.

use async_trait::async_trait;
use chrono::Utc;
use mediband_checkup::{
    audit::create_shared_log,
    core::{
        Insight, InsightRequest, MachineConfig, Notice, Phase, RiskLevel, SessionError,
        SessionSnapshot, SignalQuality, Stability, Symptom, GUEST_SUBJECT, FALLBACK_SUMMARY,
    },
    device::{CommandSink, DeviceReading, SampleSource, SourceKind},
    insight::{InsightError, InsightGenerator, InsightOrchestrator, NoopInsightGenerator},
    monitor::{CheckupController, ControlError, ControllerConfig},
    relay::{ControlCommand, RelayError},
    SharedAuditLog,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};

// ============================================================================
// Scripted collaborators
// ============================================================================

/// Replays a fixed script; `None` entries are failed fetches. Once the
/// script is exhausted it reports an idle device.
struct ScriptedSource {
    script: Mutex<VecDeque<Option<DeviceReading>>>,
}

impl ScriptedSource {
    fn new(script: Vec<Option<DeviceReading>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
        }
    }

    fn idle() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl SampleSource for ScriptedSource {
    async fn next_reading(&self) -> Option<DeviceReading> {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Some(DeviceReading::default()))
    }
}

/// Always yields the same heart rate.
struct SteadySource(u16);

#[async_trait]
impl SampleSource for SteadySource {
    async fn next_reading(&self) -> Option<DeviceReading> {
        Some(DeviceReading::sample(self.0, 98))
    }
}

/// Never answers within the fetch timeout.
struct HangingSource;

#[async_trait]
impl SampleSource for HangingSource {
    async fn next_reading(&self) -> Option<DeviceReading> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Some(DeviceReading::sample(70, 98))
    }
}

#[derive(Default)]
struct RecordingSink {
    sent: Mutex<Vec<ControlCommand>>,
    fail: bool,
}

#[async_trait]
impl CommandSink for RecordingSink {
    async fn send(&self, command: &ControlCommand) -> Result<(), RelayError> {
        if self.fail {
            return Err(RelayError::Server {
                status: 503,
                message: "relay unavailable".to_string(),
            });
        }
        self.sent.lock().unwrap().push(command.clone());
        Ok(())
    }
}

/// Holds every call until released, then answers with a fixed insight.
struct GatedGenerator {
    gate: Notify,
    reply: Result<Insight, InsightError>,
}

#[async_trait]
impl InsightGenerator for GatedGenerator {
    async fn generate(&self, _request: &InsightRequest) -> Result<Insight, InsightError> {
        self.gate.notified().await;
        self.reply.clone()
    }
}

fn genuine_insight() -> Insight {
    Insight {
        contributing_factors: vec!["Caffeine".to_string(), "Stress".to_string()],
        recommendations: vec!["Recheck in 10 minutes".to_string()],
        summary: "Heart rate is within the expected range.".to_string(),
    }
}

// ============================================================================
// Harness
// ============================================================================

fn config(watch_device: bool) -> ControllerConfig {
    ControllerConfig {
        machine: MachineConfig {
            window_secs: 15,
            freshness_ms: 10_000,
            station_id: "test-station".to_string(),
        },
        tick_interval: Duration::from_secs(1),
        fetch_timeout: Duration::from_millis(900),
        history_capacity: 10,
        watch_device,
    }
}

fn controller(
    watch_device: bool,
    remote: Arc<dyn SampleSource>,
    local: Arc<dyn SampleSource>,
    sink: Arc<RecordingSink>,
    generator: Arc<dyn InsightGenerator>,
) -> (CheckupController, SharedAuditLog) {
    let audit = create_shared_log();
    let controller = CheckupController::with_parts(
        config(watch_device),
        remote,
        local,
        sink,
        InsightOrchestrator::new(generator).with_audit(audit.clone()),
        Some(audit.clone()),
    );
    (controller, audit)
}

async fn wait_for(
    rx: &mut watch::Receiver<SessionSnapshot>,
    pred: impl Fn(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    tokio::time::timeout(Duration::from_secs(120), async {
        loop {
            {
                let snapshot = rx.borrow_and_update();
                if pred(&snapshot) {
                    return snapshot.clone();
                }
            }
            rx.changed().await.expect("controller dropped");
        }
    })
    .await
    .expect("timed out waiting for snapshot")
}

fn is_final(snapshot: &SessionSnapshot) -> bool {
    snapshot.result.as_ref().is_some_and(|r| r.is_final())
}

fn measuring(timestamp: i64, bpm: f64, time_left: f64) -> DeviceReading {
    DeviceReading {
        bpm: Some(bpm),
        spo2: Some(97.0),
        status: Some("MEASURING".to_string()),
        time_left: Some(time_left),
        timestamp: Some(timestamp),
    }
}

// ============================================================================
// Flows
// ============================================================================

#[tokio::test(start_paused = true)]
async fn demo_session_completes_with_fallback_insight() {
    let (controller, audit) = controller(
        false,
        Arc::new(ScriptedSource::idle()),
        Arc::new(SteadySource(72)),
        Arc::new(RecordingSink::default()),
        Arc::new(NoopInsightGenerator),
    );
    let mut rx = controller.subscribe();

    controller.toggle_symptom(Symptom::Fatigue).await.unwrap();
    let snapshot = controller.start_demo().await.unwrap();
    assert_eq!(snapshot.phase, Phase::Measuring);
    assert_eq!(snapshot.source, Some(SourceKind::Local));
    controller.start().await;

    let snapshot = wait_for(&mut rx, is_final).await;
    let result = snapshot.result.unwrap();

    assert_eq!(snapshot.phase, Phase::Completed);
    assert!(!snapshot.insight_pending);
    assert_eq!(result.subject_id, "Demo Patient");
    assert_eq!(result.station_id, "test-station");
    assert_eq!(result.avg_bpm, 72);
    assert_eq!(result.sample_count, 15);
    assert_eq!(result.stability, Stability::Stable);
    assert_eq!(result.risk_level, RiskLevel::Normal);
    assert_eq!(result.confidence_score, 98);
    assert_eq!(result.symptoms, vec![Symptom::Fatigue]);
    assert_eq!(result.insight.unwrap().summary, FALLBACK_SUMMARY);

    let stats = audit.stats();
    assert_eq!(stats.sessions_started, 1);
    assert_eq!(stats.sessions_completed, 1);
    assert_eq!(stats.readings_received, 15);
    assert_eq!(stats.insight_fallbacks, 1);

    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn device_signal_auto_starts_remote_session() {
    let now = Utc::now().timestamp_millis();
    let mut script = vec![Some(measuring(now, 70.0, 15.0))];
    for i in 0..15u16 {
        let timestamp = now + (i64::from(i) + 1) * 1_000;
        script.push(Some(measuring(timestamp, f64::from(70 + i), f64::from(14 - i))));
        if i == 7 {
            // One failed fetch mid-window.
            script.push(None);
        }
    }

    let (controller, audit) = controller(
        true,
        Arc::new(ScriptedSource::new(script)),
        Arc::new(SteadySource(60)),
        Arc::new(RecordingSink::default()),
        Arc::new(NoopInsightGenerator),
    );
    let mut rx = controller.subscribe();
    controller.start().await;

    let started = wait_for(&mut rx, |s| s.phase == Phase::Measuring).await;
    assert_eq!(started.subject_id, GUEST_SUBJECT);
    assert_eq!(started.source, Some(SourceKind::Remote));

    let snapshot = wait_for(&mut rx, is_final).await;
    let result = snapshot.result.unwrap();
    assert_eq!(result.sample_count, 15);
    assert_eq!(result.min_bpm, 70);
    assert_eq!(result.max_bpm, 84);
    assert_eq!(result.avg_bpm, 77);
    assert_eq!(result.stability, Stability::Stable);
    assert_eq!(result.spo2, Some(97));
    assert_eq!(result.signal_quality, SignalQuality::Good);

    let stats = audit.stats();
    assert_eq!(stats.empty_ticks, 1);
    assert_eq!(stats.sessions_started, 1);

    // The idle device afterwards never restarts the session.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(controller.snapshot().await.phase, Phase::Completed);

    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn frozen_relay_packet_does_not_hold_session_open() {
    let now = Utc::now().timestamp_millis();
    // The band drops out after one packet; the relay keeps serving it.
    let mut script = vec![Some(measuring(now - 2_000, 80.0, 15.0))];
    script.extend(std::iter::repeat(Some(measuring(now - 1_000, 80.0, 10.0))).take(40));

    let (controller, audit) = controller(
        true,
        Arc::new(ScriptedSource::new(script)),
        Arc::new(SteadySource(60)),
        Arc::new(RecordingSink::default()),
        Arc::new(NoopInsightGenerator),
    );
    let mut rx = controller.subscribe();
    controller.start().await;

    let snapshot = wait_for(&mut rx, is_final).await;
    let result = snapshot.result.unwrap();
    assert_eq!(result.sample_count, 1);
    assert_eq!(result.avg_bpm, 80);
    assert_eq!(result.signal_quality, SignalQuality::Poor);
    assert_eq!(result.confidence_score, 78);

    let stats = audit.stats();
    assert_eq!(stats.readings_received, 1);
    assert_eq!(stats.empty_ticks, 10);

    // The same packet seen by the watcher does not restart the session.
    tokio::time::sleep(Duration::from_secs(5)).await;
    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.phase, Phase::Completed);
    assert_eq!(snapshot.session_id, result.session_id);

    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn non_numeric_bpm_still_auto_starts() {
    let now = Utc::now().timestamp_millis();
    let warm_up: DeviceReading = serde_json::from_value(serde_json::json!({
        "bpm": "--",
        "status": "MEASURING",
        "timeLeft": 15,
        "timestamp": now,
    }))
    .unwrap();

    let (controller, _audit) = controller(
        true,
        Arc::new(ScriptedSource::new(vec![Some(warm_up)])),
        Arc::new(SteadySource(60)),
        Arc::new(RecordingSink::default()),
        Arc::new(NoopInsightGenerator),
    );
    let mut rx = controller.subscribe();
    controller.start().await;

    let started = wait_for(&mut rx, |s| s.phase == Phase::Measuring).await;
    assert_eq!(started.source, Some(SourceKind::Remote));
    assert_eq!(started.sample_count, 0);

    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn manual_start_dispatch_failure_leaves_session_idle() {
    let sink = Arc::new(RecordingSink {
        fail: true,
        ..Default::default()
    });
    let (controller, _audit) = controller(
        false,
        Arc::new(ScriptedSource::idle()),
        Arc::new(SteadySource(60)),
        sink.clone(),
        Arc::new(NoopInsightGenerator),
    );

    assert!(matches!(
        controller.request_manual_start().await,
        Err(ControlError::Session(SessionError::MissingSubject))
    ));

    controller.set_subject("P-100").await.unwrap();
    assert!(matches!(
        controller.request_manual_start().await,
        Err(ControlError::Dispatch(RelayError::Server { status: 503, .. }))
    ));

    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.phase, Phase::Idle);
    assert_eq!(snapshot.subject_id, "P-100");
    assert!(sink.sent.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn manual_start_then_device_signal_keeps_subject() {
    let now = Utc::now().timestamp_millis();
    let mut script = vec![Some(DeviceReading::default())];
    script.push(Some(measuring(now, 90.0, 15.0)));
    for i in 0..15u16 {
        let timestamp = now + (i64::from(i) + 1) * 1_000;
        script.push(Some(measuring(timestamp, 90.0, f64::from(14 - i))));
    }

    let sink = Arc::new(RecordingSink::default());
    let (controller, _audit) = controller(
        true,
        Arc::new(ScriptedSource::new(script)),
        Arc::new(SteadySource(60)),
        sink.clone(),
        Arc::new(NoopInsightGenerator),
    );
    let mut rx = controller.subscribe();

    controller.set_subject("P-7").await.unwrap();
    controller.toggle_symptom(Symptom::Dizziness).await.unwrap();
    let snapshot = controller.request_manual_start().await.unwrap();
    assert_eq!(snapshot.phase, Phase::WaitingForDevice);
    assert_eq!(sink.sent.lock().unwrap().as_slice(), &[ControlCommand::start()]);

    controller.start().await;
    let snapshot = wait_for(&mut rx, is_final).await;
    let result = snapshot.result.unwrap();
    assert_eq!(result.subject_id, "P-7");
    assert_eq!(result.symptoms, vec![Symptom::Dizziness]);
    assert_eq!(result.avg_bpm, 90);

    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn save_waits_for_insight_then_appends_history() {
    let generator = Arc::new(GatedGenerator {
        gate: Notify::new(),
        reply: Ok(genuine_insight()),
    });
    let (controller, audit) = controller(
        false,
        Arc::new(ScriptedSource::idle()),
        Arc::new(SteadySource(75)),
        Arc::new(RecordingSink::default()),
        generator.clone(),
    );
    let mut rx = controller.subscribe();

    controller.set_subject("P-21").await.unwrap();
    controller.start_demo().await.unwrap();
    controller.start().await;

    wait_for(&mut rx, |s| s.phase == Phase::Completed && s.insight_pending).await;
    assert!(matches!(
        controller.save_result().await,
        Err(ControlError::Session(SessionError::InsightPending))
    ));

    generator.gate.notify_one();
    wait_for(&mut rx, is_final).await;

    let saved = controller.save_result().await.unwrap();
    assert_eq!(saved.insight, Some(genuine_insight()));

    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.phase, Phase::Idle);
    assert!(snapshot.result.is_none());

    let history = controller.history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, saved.id);
    assert!(controller
        .export_history()
        .await
        .unwrap()
        .contains("Recheck in 10 minutes"));
    assert_eq!(audit.stats().insights_generated, 1);

    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn discarded_session_drops_late_insight() {
    let generator = Arc::new(GatedGenerator {
        gate: Notify::new(),
        reply: Ok(genuine_insight()),
    });
    let (controller, _audit) = controller(
        false,
        Arc::new(ScriptedSource::idle()),
        Arc::new(SteadySource(75)),
        Arc::new(RecordingSink::default()),
        generator.clone(),
    );
    let mut rx = controller.subscribe();
    let mut notices = controller.notices();

    controller.start_demo().await.unwrap();
    controller.start().await;
    wait_for(&mut rx, |s| s.phase == Phase::Completed).await;

    controller.discard().await.unwrap();
    generator.gate.notify_one();

    let notice = tokio::time::timeout(Duration::from_secs(5), notices.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(notice, Notice::InsightDiscarded);

    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.phase, Phase::Idle);
    assert!(snapshot.result.is_none());
    assert!(controller.history().await.is_empty());

    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn window_without_samples_returns_to_idle() {
    let (controller, audit) = controller(
        false,
        Arc::new(ScriptedSource::idle()),
        Arc::new(HangingSource),
        Arc::new(RecordingSink::default()),
        Arc::new(NoopInsightGenerator),
    );
    let mut notices = controller.notices();

    controller.start_demo().await.unwrap();
    controller.start().await;

    let notice = tokio::time::timeout(Duration::from_secs(60), notices.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(notice, Notice::NoData);

    let snapshot = controller.snapshot().await;
    assert_eq!(snapshot.phase, Phase::Idle);
    assert!(snapshot.result.is_none());

    let stats = audit.stats();
    assert_eq!(stats.sessions_without_data, 1);
    assert_eq!(stats.empty_ticks, 15);
    assert_eq!(stats.sessions_completed, 0);

    controller.shutdown().await;
}
