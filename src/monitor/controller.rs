use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{
    sync::{broadcast, watch, Mutex},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use uuid::Uuid;

use crate::{
    audit::SharedAuditLog,
    config::Config,
    core::{
        report::{CheckUpResult, InsightRequest, Symptom},
        session::{
            CheckupMachine, Effect, Event, IgnoredSignal, MachineConfig, Notice, Phase,
            SessionError, SessionSnapshot, Transition,
        },
    },
    device::{
        synthesize_spo2, CommandSink, DeviceReading, LocalGenerator, SampleSource, SourceKind,
    },
    history::History,
    insight::InsightOrchestrator,
    relay::{ControlCommand, RelayError},
};

/// Runtime parameters of the controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub machine: MachineConfig,
    /// Period of both the watcher and the acquisition loop
    pub tick_interval: Duration,
    /// Upper bound for one sample fetch
    pub fetch_timeout: Duration,
    pub history_capacity: usize,
    /// Poll the relay for device-initiated sessions while idle
    pub watch_device: bool,
}

impl ControllerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            machine: config.machine_config(),
            tick_interval: config.tick_interval,
            fetch_timeout: config.fetch_timeout,
            history_capacity: config.history_capacity,
            watch_device: true,
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Failures of user-initiated controller actions.
#[derive(Debug)]
pub enum ControlError {
    /// The state machine rejected the request
    Session(SessionError),
    /// The START command could not be delivered
    Dispatch(RelayError),
}

impl std::fmt::Display for ControlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlError::Session(e) => write!(f, "{e}"),
            ControlError::Dispatch(e) => write!(f, "Could not start the device: {e}"),
        }
    }
}

impl std::error::Error for ControlError {}

impl From<SessionError> for ControlError {
    fn from(e: SessionError) -> Self {
        ControlError::Session(e)
    }
}

/// State reachable from the scheduler and insight tasks.
struct Shared {
    machine: Mutex<CheckupMachine>,
    remote: Arc<dyn SampleSource>,
    local: Arc<dyn SampleSource>,
    commands: Arc<dyn CommandSink>,
    orchestrator: InsightOrchestrator,
    history: Mutex<History>,
    snapshots: watch::Sender<SessionSnapshot>,
    notices: broadcast::Sender<Notice>,
    audit: Option<SharedAuditLog>,
    tick_interval: Duration,
    fetch_timeout: Duration,
    watch_device: bool,
}

/// Drives one [`CheckupMachine`] from device readings, user actions and
/// insight completions.
///
/// A single scheduler task ticks at `tick_interval`. While the session is
/// measuring it acquires one sample per tick from the session's source;
/// otherwise it watches the relay for device-initiated measurements.
#[derive(Clone)]
pub struct CheckupController {
    shared: Arc<Shared>,
    scheduler: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl CheckupController {
    pub fn new(
        config: ControllerConfig,
        remote: Arc<dyn SampleSource>,
        commands: Arc<dyn CommandSink>,
        orchestrator: InsightOrchestrator,
    ) -> Self {
        Self::with_parts(
            config,
            remote,
            Arc::new(LocalGenerator::new()),
            commands,
            orchestrator,
            None,
        )
    }

    /// Build with every collaborator supplied explicitly.
    pub fn with_parts(
        config: ControllerConfig,
        remote: Arc<dyn SampleSource>,
        local: Arc<dyn SampleSource>,
        commands: Arc<dyn CommandSink>,
        orchestrator: InsightOrchestrator,
        audit: Option<SharedAuditLog>,
    ) -> Self {
        let machine = CheckupMachine::new(config.machine);
        let (snapshots, _) = watch::channel(machine.snapshot());
        let (notices, _) = broadcast::channel(32);

        Self {
            shared: Arc::new(Shared {
                machine: Mutex::new(machine),
                remote,
                local,
                commands,
                orchestrator,
                history: Mutex::new(History::new(config.history_capacity)),
                snapshots,
                notices,
                audit,
                tick_interval: config.tick_interval,
                fetch_timeout: config.fetch_timeout,
                watch_device: config.watch_device,
            }),
            scheduler: Arc::new(Mutex::new(None)),
        }
    }

    /// Start (or restart) the scheduler task.
    pub async fn start(&self) {
        let mut scheduler = self.scheduler.lock().await;
        if let Some(handle) = scheduler.take() {
            handle.abort();
        }

        let shared = self.shared.clone();
        let handle = tokio::spawn(async move {
            let mut interval = time::interval(shared.tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;

                let (phase, session_id, source) = {
                    let machine = shared.machine.lock().await;
                    if machine.is_torn_down() {
                        break;
                    }
                    (machine.phase(), machine.session().id, machine.session().source)
                };

                match phase {
                    Phase::Measuring => shared.acquire(session_id, source).await,
                    _ if shared.watch_device => shared.watch().await,
                    _ => {}
                }
            }
            tracing::debug!("Scheduler stopped");
        });
        *scheduler = Some(handle);
    }

    async fn cancel_scheduler(&self) {
        if let Some(handle) = self.scheduler.lock().await.take() {
            handle.abort();
        }
    }

    pub async fn set_subject(&self, subject: impl Into<String>) -> Result<SessionSnapshot, ControlError> {
        Ok(self.shared.apply(Event::SetSubject(subject.into())).await?.snapshot)
    }

    pub async fn toggle_symptom(&self, symptom: Symptom) -> Result<SessionSnapshot, ControlError> {
        Ok(self.shared.apply(Event::ToggleSymptom(symptom)).await?.snapshot)
    }

    /// Ask the device to start measuring.
    ///
    /// On success the session waits for the device; sampling begins when the
    /// watcher sees the device's measuring signal. A failed dispatch leaves
    /// the phase unchanged.
    pub async fn request_manual_start(&self) -> Result<SessionSnapshot, ControlError> {
        let transition = self.shared.apply(Event::ManualStartRequested).await?;
        if !transition.effects.contains(&Effect::DispatchStartCommand) {
            return Ok(transition.snapshot);
        }

        if let Err(e) = self.shared.commands.send(&ControlCommand::start()).await {
            tracing::warn!("Failed to dispatch START command: {}", e);
            return Err(ControlError::Dispatch(e));
        }

        Ok(self.shared.apply(Event::StartCommandAccepted).await?.snapshot)
    }

    /// Start a session fed by the local generator.
    pub async fn start_demo(&self) -> Result<SessionSnapshot, ControlError> {
        let event = Event::DemoRequested {
            now_ms: Utc::now().timestamp_millis(),
        };
        Ok(self.shared.apply(event).await?.snapshot)
    }

    /// Append the completed result to history and reset for the next subject.
    pub async fn save_result(&self) -> Result<CheckUpResult, ControlError> {
        let transition = self.shared.apply(Event::Save).await?;
        transition
            .effects
            .into_iter()
            .find_map(|effect| match effect {
                Effect::AppendHistory(result) => Some(result),
                _ => None,
            })
            .ok_or(ControlError::Session(SessionError::NoResult))
    }

    /// Abandon the current session or result.
    pub async fn discard(&self) -> Result<SessionSnapshot, ControlError> {
        Ok(self.shared.apply(Event::Discard).await?.snapshot)
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.shared.machine.lock().await.snapshot()
    }

    /// Receive every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.snapshots.subscribe()
    }

    /// Receive user-facing notices.
    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.shared.notices.subscribe()
    }

    /// Saved results, newest first.
    pub async fn history(&self) -> Vec<CheckUpResult> {
        self.shared.history.lock().await.to_vec()
    }

    pub async fn export_history(&self) -> Result<String, serde_json::Error> {
        self.shared.history.lock().await.to_json_pretty()
    }

    /// Tear the machine down and stop the scheduler.
    ///
    /// Insight calls already in flight finish on their own; their results
    /// are dropped.
    pub async fn shutdown(&self) {
        if let Err(e) = self.shared.apply(Event::Teardown).await {
            tracing::debug!("Shutdown requested twice: {}", e);
        }
        self.cancel_scheduler().await;
    }
}

impl Shared {
    /// Apply an event and carry out its effects.
    async fn apply(self: &Arc<Self>, event: Event) -> Result<Transition, SessionError> {
        let transition = {
            let mut machine = self.machine.lock().await;
            self.step(&mut machine, event)?
        };
        self.perform(&transition).await;
        Ok(transition)
    }

    /// Apply under the lock; publish and audit before releasing it so
    /// subscribers observe transitions in order.
    fn step(&self, machine: &mut CheckupMachine, event: Event) -> Result<Transition, SessionError> {
        let before = machine.phase();
        let counted = machine.session().delivered();
        let is_tick = matches!(event, Event::Tick { .. }) && before == Phase::Measuring;

        let transition = machine.apply(event)?;
        let delivered = is_tick.then(|| machine.session().delivered() > counted);
        self.snapshots.send_replace(transition.snapshot.clone());
        self.record(before, delivered, &transition);
        if let Some(notice) = &transition.notice {
            let _ = self.notices.send(notice.clone());
        }
        Ok(transition)
    }

    fn record(&self, before: Phase, delivered: Option<bool>, transition: &Transition) {
        let Some(audit) = &self.audit else {
            return;
        };

        match delivered {
            Some(true) => audit.record_reading(),
            Some(false) => audit.record_empty_tick(),
            None => {}
        }
        if before != Phase::Measuring && transition.snapshot.phase == Phase::Measuring {
            audit.record_session_started();
        }
        match &transition.notice {
            Some(Notice::NoData) => audit.record_session_without_data(),
            Some(Notice::SignalIgnored(IgnoredSignal::Stale | IgnoredSignal::AlreadyHandled)) => {
                audit.record_stale_signal()
            }
            _ => {}
        }
        if transition
            .effects
            .iter()
            .any(|e| matches!(e, Effect::RequestInsight { .. }))
        {
            audit.record_session_completed();
        }
    }

    async fn perform(self: &Arc<Self>, transition: &Transition) {
        for effect in &transition.effects {
            match effect {
                Effect::RequestInsight {
                    session_id,
                    request,
                } => self.spawn_insight(*session_id, request.clone()),
                Effect::AppendHistory(result) => {
                    if let Some(evicted) = self.history.lock().await.push(result.clone()) {
                        tracing::debug!(result_id = %evicted.id, "History full, dropped oldest result");
                    }
                }
                // Dispatched by the caller, which reports the outcome.
                Effect::DispatchStartCommand => {}
            }
        }
    }

    fn spawn_insight(self: &Arc<Self>, session_id: Uuid, request: InsightRequest) {
        let shared = self.clone();
        tokio::spawn(async move {
            let insight = shared.orchestrator.resolve(&request).await;
            if let Err(e) = shared
                .apply(Event::InsightSettled {
                    session_id,
                    insight,
                })
                .await
            {
                tracing::error!(%session_id, "Failed to merge insight: {}", e);
            }
        });
    }

    async fn fetch(&self, source: &Arc<dyn SampleSource>) -> Option<DeviceReading> {
        match time::timeout(self.fetch_timeout, source.next_reading()).await {
            Ok(reading) => reading,
            Err(_) => {
                tracing::debug!("Sample fetch timed out after {:?}", self.fetch_timeout);
                None
            }
        }
    }

    /// One acquisition tick for `session_id`.
    async fn acquire(self: &Arc<Self>, session_id: Uuid, source: Option<SourceKind>) {
        let source = match source {
            Some(SourceKind::Local) => &self.local,
            _ => &self.remote,
        };
        let reading = self.fetch(source).await;

        let transition = {
            let mut machine = self.machine.lock().await;
            // The session may have been discarded or replaced during the fetch.
            if machine.phase() != Phase::Measuring || machine.session().id != session_id {
                return;
            }
            self.step(
                &mut machine,
                Event::Tick {
                    reading,
                    fallback_spo2: synthesize_spo2(),
                    now_ms: Utc::now().timestamp_millis(),
                },
            )
        };

        match transition {
            Ok(transition) => self.perform(&transition).await,
            Err(e) => tracing::debug!("Tick rejected: {}", e),
        }
    }

    /// Look for a device-initiated measurement.
    async fn watch(self: &Arc<Self>) {
        let Some(reading) = self.fetch(&self.remote).await else {
            return;
        };
        let event = Event::DeviceSignal {
            reading,
            now_ms: Utc::now().timestamp_millis(),
        };
        if let Err(e) = self.apply(event).await {
            tracing::debug!("Device signal rejected: {}", e);
        }
    }
}
