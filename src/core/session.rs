//! Check-up session lifecycle.
//!
//! [`CheckupMachine`] owns the single current [`Session`] and moves it through
//! `Idle -> WaitingForDevice -> Measuring -> Completed`. It performs no I/O:
//! every input arrives as an [`Event`] and every outward action leaves as an
//! [`Effect`] inside the returned [`Transition`]. Time is passed in as epoch
//! milliseconds so transitions are reproducible.

use crate::core::aggregate::{summarize, AggregateError};
use crate::core::report::{CheckUpResult, Insight, InsightRequest, SignalQuality, Symptom};
use crate::device::{DeviceReading, Sample, SourceKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Subject identifier used for sessions started by the device.
pub const GUEST_SUBJECT: &str = "Guest Patient";

/// Subject identifier used for local-generator sessions.
pub const DEMO_SUBJECT: &str = "Demo Patient";

/// Lifecycle phase of the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    WaitingForDevice,
    Measuring,
    Completed,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Phase::Idle => "idle",
            Phase::WaitingForDevice => "waiting for device",
            Phase::Measuring => "measuring",
            Phase::Completed => "completed",
        };
        f.write_str(label)
    }
}

/// Fixed parameters of the machine.
#[derive(Debug, Clone)]
pub struct MachineConfig {
    /// Observation window in seconds (one sample per second)
    pub window_secs: u32,
    /// Maximum age of a device signal that may start a session
    pub freshness_ms: i64,
    /// Station recorded on every result
    pub station_id: String,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            window_secs: 15,
            freshness_ms: 10_000,
            station_id: "unknown".to_string(),
        }
    }
}

/// One check-up attempt.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub subject_id: String,
    pub symptoms: BTreeSet<Symptom>,
    pub source: Option<SourceKind>,
    pub started_at: Option<DateTime<Utc>>,
    pub elapsed_secs: u32,
    pub live_bpm: Option<u16>,
    pub live_spo2: Option<u8>,
    samples: Vec<Sample>,
    ticks: u32,
    delivered: u32,
    /// Relay timestamp of the last reading consumed by this session
    last_reading_ts: Option<i64>,
}

impl Session {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            subject_id: String::new(),
            symptoms: BTreeSet::new(),
            source: None,
            started_at: None,
            elapsed_secs: 0,
            live_bpm: None,
            live_spo2: None,
            samples: Vec::new(),
            ticks: 0,
            delivered: 0,
            last_reading_ts: None,
        }
    }

    /// Buffered samples in capture order.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Ticks that contributed a sample.
    pub fn delivered(&self) -> u32 {
        self.delivered
    }

    pub fn signal_quality(&self) -> SignalQuality {
        SignalQuality::from_ticks(self.ticks, self.delivered)
    }

    fn bpm_buffer(&self) -> Vec<u16> {
        self.samples.iter().map(|s| s.bpm).collect()
    }
}

/// Inputs to the machine.
#[derive(Debug, Clone)]
pub enum Event {
    /// Subject identifier typed by the user
    SetSubject(String),
    /// Add or remove a reported symptom
    ToggleSymptom(Symptom),
    /// User asked for a device measurement
    ManualStartRequested,
    /// The relay accepted the START command
    StartCommandAccepted,
    /// User asked for a local-generator session
    DemoRequested { now_ms: i64 },
    /// Watcher observed a device reading while not measuring
    DeviceSignal { reading: DeviceReading, now_ms: i64 },
    /// One acquisition tick. `fallback_spo2` is shown when the reading has none.
    Tick {
        reading: Option<DeviceReading>,
        fallback_spo2: u8,
        now_ms: i64,
    },
    /// The insight call for `session_id` settled (genuine or fallback)
    InsightSettled { session_id: Uuid, insight: Insight },
    /// User confirmed the result
    Save,
    /// User abandoned the current session or result
    Discard,
    /// The owner is going away; no further transitions
    Teardown,
}

/// Outward actions requested by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Post the START command to the device
    DispatchStartCommand,
    /// Run the insight call for a freshly completed result
    RequestInsight {
        session_id: Uuid,
        request: InsightRequest,
    },
    /// Append a confirmed result to history
    AppendHistory(CheckUpResult),
}

/// Why a device signal did not start a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoredSignal {
    /// Status is not `MEASURING`
    NotMeasuring,
    /// A session is already measuring
    Busy,
    /// No timestamp, freshness cannot be established
    MissingTimestamp,
    /// Older than the freshness threshold
    Stale,
    /// Not newer than the last completion or the last accepted trigger
    AlreadyHandled,
    /// The device reports its window as already over
    Finished,
}

/// Things the user should be told about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Notice {
    /// Window ended without a single usable sample
    NoData,
    /// A device signal was ignored
    SignalIgnored(IgnoredSignal),
    /// An insight arrived for a session that is no longer current
    InsightDiscarded,
}

/// Rejections of user requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Manual start without a subject identifier
    MissingSubject,
    /// Not allowed while measuring
    AlreadyMeasuring,
    /// No result to save
    NoResult,
    /// Result cannot be saved until its insight settled
    InsightPending,
    /// Machine was torn down
    TornDown,
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::MissingSubject => write!(f, "Please enter a Patient ID first"),
            SessionError::AlreadyMeasuring => write!(f, "A check-up is already in progress"),
            SessionError::NoResult => write!(f, "There is no result to save"),
            SessionError::InsightPending => {
                write!(f, "The AI insight is still being generated")
            }
            SessionError::TornDown => write!(f, "The monitor has been shut down"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Point-in-time view of the machine for rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub session_id: Uuid,
    pub subject_id: String,
    pub symptoms: Vec<Symptom>,
    pub source: Option<SourceKind>,
    pub elapsed_secs: u32,
    pub window_secs: u32,
    pub live_bpm: Option<u16>,
    pub live_spo2: Option<u8>,
    pub sample_count: usize,
    pub signal_quality: SignalQuality,
    pub result: Option<CheckUpResult>,
    pub insight_pending: bool,
}

/// Outcome of applying one event.
#[derive(Debug, Clone)]
pub struct Transition {
    pub snapshot: SessionSnapshot,
    pub effects: Vec<Effect>,
    pub notice: Option<Notice>,
}

/// The check-up state machine.
#[derive(Debug)]
pub struct CheckupMachine {
    config: MachineConfig,
    phase: Phase,
    session: Session,
    result: Option<CheckUpResult>,
    insight_pending: bool,
    last_completed_at_ms: Option<i64>,
    last_trigger_ts: Option<i64>,
    torn_down: bool,
}

impl CheckupMachine {
    pub fn new(config: MachineConfig) -> Self {
        Self {
            config,
            phase: Phase::Idle,
            session: Session::new(),
            result: None,
            insight_pending: false,
            last_completed_at_ms: None,
            last_trigger_ts: None,
            torn_down: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn result(&self) -> Option<&CheckUpResult> {
        self.result.as_ref()
    }

    pub fn insight_pending(&self) -> bool {
        self.insight_pending
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            session_id: self.session.id,
            subject_id: self.session.subject_id.clone(),
            symptoms: self.session.symptoms.iter().copied().collect(),
            source: self.session.source,
            elapsed_secs: self.session.elapsed_secs,
            window_secs: self.config.window_secs,
            live_bpm: self.session.live_bpm,
            live_spo2: self.session.live_spo2,
            sample_count: self.session.samples.len(),
            signal_quality: self.session.signal_quality(),
            result: self.result.clone(),
            insight_pending: self.insight_pending,
        }
    }

    /// Apply one event.
    pub fn apply(&mut self, event: Event) -> Result<Transition, SessionError> {
        if self.torn_down {
            // Late insight merges are dropped silently after teardown.
            if let Event::InsightSettled { .. } = event {
                return Ok(self.transition(Vec::new(), Some(Notice::InsightDiscarded)));
            }
            return Err(SessionError::TornDown);
        }

        match event {
            Event::SetSubject(subject) => {
                self.ensure_not_measuring()?;
                self.session.subject_id = subject.trim().to_string();
                Ok(self.transition(Vec::new(), None))
            }
            Event::ToggleSymptom(symptom) => {
                self.ensure_not_measuring()?;
                if !self.session.symptoms.remove(&symptom) {
                    self.session.symptoms.insert(symptom);
                }
                Ok(self.transition(Vec::new(), None))
            }
            Event::ManualStartRequested => {
                self.ensure_not_measuring()?;
                if self.session.subject_id.is_empty() {
                    return Err(SessionError::MissingSubject);
                }
                Ok(self.transition(vec![Effect::DispatchStartCommand], None))
            }
            Event::StartCommandAccepted => {
                if self.phase != Phase::Measuring {
                    self.phase = Phase::WaitingForDevice;
                    tracing::info!("START command accepted, waiting for device");
                }
                Ok(self.transition(Vec::new(), None))
            }
            Event::DemoRequested { now_ms } => {
                self.ensure_not_measuring()?;
                self.session.subject_id = DEMO_SUBJECT.to_string();
                self.begin_measuring(SourceKind::Local, now_ms);
                Ok(self.transition(Vec::new(), None))
            }
            Event::DeviceSignal { reading, now_ms } => Ok(self.on_device_signal(&reading, now_ms)),
            Event::Tick {
                reading,
                fallback_spo2,
                now_ms,
            } => Ok(self.on_tick(reading, fallback_spo2, now_ms)),
            Event::InsightSettled {
                session_id,
                insight,
            } => Ok(self.on_insight(session_id, insight)),
            Event::Save => {
                let result = self.result.clone().ok_or(SessionError::NoResult)?;
                if self.insight_pending {
                    return Err(SessionError::InsightPending);
                }
                self.reset();
                Ok(self.transition(vec![Effect::AppendHistory(result)], None))
            }
            Event::Discard => {
                self.reset();
                Ok(self.transition(Vec::new(), None))
            }
            Event::Teardown => {
                self.torn_down = true;
                tracing::info!("Check-up machine torn down in phase {}", self.phase);
                Ok(self.transition(Vec::new(), None))
            }
        }
    }

    fn ensure_not_measuring(&self) -> Result<(), SessionError> {
        if self.phase == Phase::Measuring {
            Err(SessionError::AlreadyMeasuring)
        } else {
            Ok(())
        }
    }

    fn transition(&self, effects: Vec<Effect>, notice: Option<Notice>) -> Transition {
        Transition {
            snapshot: self.snapshot(),
            effects,
            notice,
        }
    }

    /// Check whether a device reading may auto-start a session.
    fn check_signal(&self, reading: &DeviceReading, now_ms: i64) -> Result<i64, IgnoredSignal> {
        if !reading.is_measuring() {
            return Err(IgnoredSignal::NotMeasuring);
        }
        if self.phase == Phase::Measuring {
            return Err(IgnoredSignal::Busy);
        }
        let timestamp = reading.timestamp.ok_or(IgnoredSignal::MissingTimestamp)?;
        if now_ms - timestamp > self.config.freshness_ms {
            return Err(IgnoredSignal::Stale);
        }
        let already_handled = |mark: Option<i64>| mark.is_some_and(|m| timestamp <= m);
        if already_handled(self.last_completed_at_ms) || already_handled(self.last_trigger_ts) {
            return Err(IgnoredSignal::AlreadyHandled);
        }
        if reading.remaining_secs().is_some_and(|t| t <= 0.0) {
            return Err(IgnoredSignal::Finished);
        }
        Ok(timestamp)
    }

    fn on_device_signal(&mut self, reading: &DeviceReading, now_ms: i64) -> Transition {
        match self.check_signal(reading, now_ms) {
            Ok(timestamp) => {
                self.last_trigger_ts = Some(timestamp);
                if self.session.subject_id.is_empty() {
                    self.session.subject_id = GUEST_SUBJECT.to_string();
                }
                self.begin_measuring(SourceKind::Remote, now_ms);
                // The trigger packet itself is not a sample.
                self.session.last_reading_ts = Some(timestamp);
                self.transition(Vec::new(), None)
            }
            Err(reason) => {
                if reason != IgnoredSignal::NotMeasuring {
                    tracing::debug!("Ignoring device signal: {:?}", reason);
                }
                self.transition(Vec::new(), Some(Notice::SignalIgnored(reason)))
            }
        }
    }

    /// Enter `Measuring` with a fresh buffer. Subject and symptoms carry over.
    fn begin_measuring(&mut self, source: SourceKind, now_ms: i64) {
        let subject_id = std::mem::take(&mut self.session.subject_id);
        let symptoms = std::mem::take(&mut self.session.symptoms);

        self.session = Session {
            subject_id,
            symptoms,
            source: Some(source),
            started_at: Some(datetime_from_ms(now_ms)),
            ..Session::new()
        };
        self.result = None;
        self.insight_pending = false;
        self.phase = Phase::Measuring;

        tracing::info!(
            session_id = %self.session.id,
            subject = %self.session.subject_id,
            ?source,
            "Check-up started"
        );
    }

    fn on_tick(
        &mut self,
        reading: Option<DeviceReading>,
        fallback_spo2: u8,
        now_ms: i64,
    ) -> Transition {
        if self.phase != Phase::Measuring {
            return self.transition(Vec::new(), None);
        }

        let window = self.config.window_secs;
        self.session.ticks += 1;

        let sample = reading
            .as_ref()
            .filter(|r| self.is_fresh(r, now_ms))
            .and_then(|r| r.valid_bpm().map(|bpm| (r, bpm)));

        let finished = match sample {
            Some((reading, bpm)) => {
                self.session.delivered += 1;
                if reading.timestamp.is_some() {
                    self.session.last_reading_ts = reading.timestamp;
                }
                self.session.live_bpm = Some(bpm);
                self.session.live_spo2 = Some(reading.valid_spo2().unwrap_or(fallback_spo2));
                if self.session.samples.len() < window as usize {
                    self.session.samples.push(Sample {
                        timestamp: datetime_from_ms(now_ms),
                        bpm,
                    });
                }

                match reading.remaining_secs() {
                    Some(time_left) => {
                        let elapsed = (f64::from(window) - time_left).clamp(0.0, f64::from(window));
                        self.session.elapsed_secs = elapsed.round() as u32;
                        time_left <= 0.0
                    }
                    None => self.advance_local_clock(),
                }
            }
            None => self.advance_local_clock(),
        };

        tracing::debug!(
            elapsed = self.session.elapsed_secs,
            samples = self.session.samples.len(),
            bpm = ?self.session.live_bpm,
            "Acquisition tick"
        );

        if finished {
            self.complete(now_ms)
        } else {
            self.transition(Vec::new(), None)
        }
    }

    /// Whether a reading is new data for the current session.
    ///
    /// The relay serves its last stored packet until the device pushes
    /// another, so a remote reading must carry a timestamp newer than the
    /// last one consumed and within the freshness threshold. Local readings
    /// are generated per call.
    fn is_fresh(&self, reading: &DeviceReading, now_ms: i64) -> bool {
        if self.session.source != Some(SourceKind::Remote) {
            return true;
        }
        let Some(timestamp) = reading.timestamp else {
            return false;
        };
        if now_ms - timestamp > self.config.freshness_ms {
            tracing::debug!(timestamp, "Skipping stale reading");
            return false;
        }
        if self.session.last_reading_ts.is_some_and(|last| timestamp <= last) {
            tracing::debug!(timestamp, "Skipping repeated reading");
            return false;
        }
        true
    }

    /// Count one second locally. Returns true once the window is reached.
    fn advance_local_clock(&mut self) -> bool {
        let window = self.config.window_secs;
        self.session.elapsed_secs = (self.session.elapsed_secs + 1).min(window);
        self.session.elapsed_secs >= window
    }

    /// `Measuring -> Completed`. Only reachable from `on_tick` while measuring.
    fn complete(&mut self, now_ms: i64) -> Transition {
        self.last_completed_at_ms = Some(now_ms);

        let buffer = self.session.bpm_buffer();
        let summary = match summarize(&buffer, self.config.window_secs as usize) {
            Ok(summary) => summary,
            Err(AggregateError::EmptyBuffer) => {
                tracing::warn!(
                    session_id = %self.session.id,
                    "Check-up window ended without samples"
                );
                self.phase = Phase::Idle;
                return self.transition(Vec::new(), Some(Notice::NoData));
            }
        };

        let result = CheckUpResult::from_summary(
            self.session.id,
            &self.session.subject_id,
            &self.config.station_id,
            &summary,
            self.session.symptoms.iter().copied().collect(),
            self.session.live_spo2,
            self.session.signal_quality(),
        );
        let request = InsightRequest::from_result(&result);

        tracing::info!(
            session_id = %self.session.id,
            avg_bpm = result.avg_bpm,
            stability = %result.stability,
            risk = %result.risk_level,
            confidence = result.confidence_score,
            "Check-up completed"
        );

        self.result = Some(result);
        self.insight_pending = true;
        self.phase = Phase::Completed;

        self.transition(
            vec![Effect::RequestInsight {
                session_id: self.session.id,
                request,
            }],
            None,
        )
    }

    fn on_insight(&mut self, session_id: Uuid, insight: Insight) -> Transition {
        let current = self.insight_pending
            && self
                .result
                .as_ref()
                .is_some_and(|r| r.session_id == session_id && r.insight.is_none());

        if !current {
            tracing::debug!(%session_id, "Discarding insight for a session that is no longer current");
            return self.transition(Vec::new(), Some(Notice::InsightDiscarded));
        }

        if let Some(result) = self.result.as_mut() {
            result.insight = Some(insight);
        }
        self.insight_pending = false;
        self.transition(Vec::new(), None)
    }

    fn reset(&mut self) {
        self.session = Session::new();
        self.result = None;
        self.insight_pending = false;
        self.phase = Phase::Idle;
    }
}

/// Out-of-range timestamps clamp to the representable bounds.
fn datetime_from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_else(|| {
        tracing::debug!(ms, "Timestamp out of range, clamping");
        if ms < 0 {
            DateTime::<Utc>::MIN_UTC
        } else {
            DateTime::<Utc>::MAX_UTC
        }
    })
}
