use crate::config::MonitorConfig;
use crate::data::{validate_bars, BarSource};
use crate::engine::{Engine, LiveState};
use crate::error::CollaboratorError;
use crate::models::{LifecycleEvent, Position};
use crate::notify::NotificationSink;
use crate::store::{PersistedLiveState, StateStore};
use anyhow::{anyhow, Result};
use chrono::Utc;
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

const COMMAND_QUEUE_DEPTH: usize = 32;
const MIN_BARS_PER_TICK: usize = 2;

/// What one polling tick amounted to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "camelCase")]
pub enum TickOutcome {
    Event(LifecycleEvent),
    NoOp(NoOpReason),
    CollaboratorFailure(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NoOpReason {
    NotRunning,
    /// A position is open and neither level was touched.
    Holding,
    /// Flat and the newest bar gave no new entry.
    Flat,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartReport {
    pub session_id: Uuid,
    pub resumed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatus {
    pub running: bool,
    pub session_id: Option<Uuid>,
    pub symbol: Option<String>,
    pub position: Option<Position>,
    pub capital: Option<f64>,
    pub ticks: u64,
    pub last_outcome: Option<TickOutcome>,
}

struct MonitorSession {
    id: Uuid,
    config: MonitorConfig,
    engine: Engine,
    live: LiveState,
}

impl MonitorSession {
    fn persisted(&self) -> PersistedLiveState {
        PersistedLiveState {
            session_id: self.id,
            config: self.config.clone(),
            state: self.live.clone(),
            saved_at: Utc::now(),
        }
    }
}

/// Live monitor state. Owned by exactly one worker, so ticks never overlap.
#[derive(Default)]
pub struct LiveMonitorState {
    session: Option<MonitorSession>,
    ticks: u64,
    last_outcome: Option<TickOutcome>,
}

impl LiveMonitorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    /// Begins a session, resuming the stored one when it watches the same config.
    pub async fn start<P: StateStore>(
        &mut self,
        config: MonitorConfig,
        store: &P,
    ) -> Result<StartReport> {
        if let Some(session) = &self.session {
            return Err(anyhow!(
                "Monitor already running session {} for {}; stop it first",
                session.id,
                session.config.symbol
            ));
        }
        config.risk.validate()?;

        let stored = match store.load().await {
            Ok(stored) => stored,
            Err(err) => {
                warn!("Ignoring stored monitor state: {}", err);
                None
            }
        };

        let (id, live, resumed) = match stored {
            Some(snapshot) if snapshot.config == config => {
                (snapshot.session_id, snapshot.state, true)
            }
            Some(snapshot) => {
                info!(
                    "Discarding stored session {} for {} (configuration changed)",
                    snapshot.session_id, snapshot.config.symbol
                );
                (Uuid::new_v4(), LiveState::new(config.risk.initial_capital), false)
            }
            None => (Uuid::new_v4(), LiveState::new(config.risk.initial_capital), false),
        };

        let session = MonitorSession {
            id,
            engine: Engine::new(config.risk.clone()),
            config,
            live,
        };
        if let Err(err) = store.save(&session.persisted()).await {
            warn!("Failed to persist monitor session {}: {}", session.id, err);
        }

        info!(
            "{} monitor session {} for {} {} ({})",
            if resumed { "Resumed" } else { "Started" },
            session.id,
            session.config.symbol,
            session.config.timeframe,
            session.config.strategy_label()
        );
        let report = StartReport {
            session_id: session.id,
            resumed,
        };
        self.session = Some(session);
        Ok(report)
    }

    /// Ends the session and drops any open position with it.
    pub async fn stop<P: StateStore>(&mut self, store: &P) -> Option<Uuid> {
        let session = self.session.take()?;
        if let Err(err) = store.clear().await {
            warn!("Failed to clear stored state for session {}: {}", session.id, err);
        }
        if let Some(position) = &session.live.position {
            info!(
                "Stopped session {} with an open {} position from {}; it is discarded",
                session.id, position.direction, position.entry_timestamp
            );
        } else {
            info!("Stopped session {}", session.id);
        }
        Some(session.id)
    }

    pub async fn tick<S, N, P>(&mut self, source: &S, sink: &N, store: &P) -> TickOutcome
    where
        S: BarSource,
        N: NotificationSink,
        P: StateStore,
    {
        self.ticks += 1;
        let outcome = match self.session.as_mut() {
            None => TickOutcome::NoOp(NoOpReason::NotRunning),
            Some(session) => step_session(session, source, sink, store).await,
        };
        self.last_outcome = Some(outcome.clone());
        outcome
    }

    pub fn status(&self) -> MonitorStatus {
        let session = self.session.as_ref();
        MonitorStatus {
            running: session.is_some(),
            session_id: session.map(|s| s.id),
            symbol: session.map(|s| s.config.symbol.clone()),
            position: session.and_then(|s| s.live.position.clone()),
            capital: session.map(|s| s.live.capital),
            ticks: self.ticks,
            last_outcome: self.last_outcome.clone(),
        }
    }
}

async fn step_session<S, N, P>(
    session: &mut MonitorSession,
    source: &S,
    sink: &N,
    store: &P,
) -> TickOutcome
where
    S: BarSource,
    N: NotificationSink,
    P: StateStore,
{
    let bars = match source.fetch_bars(&session.config).await {
        Ok(bars) => bars,
        Err(err) => {
            warn!("Tick for {} skipped: {}", session.config.symbol, err);
            return TickOutcome::CollaboratorFailure(err.to_string());
        }
    };
    if bars.len() < MIN_BARS_PER_TICK {
        let err = CollaboratorError::EmptyData {
            found: bars.len(),
            required: MIN_BARS_PER_TICK,
        };
        warn!("Tick for {} skipped: {}", session.config.symbol, err);
        return TickOutcome::CollaboratorFailure(err.to_string());
    }

    let pair = &bars[bars.len() - MIN_BARS_PER_TICK..];
    if let Err(err) = validate_bars(pair) {
        warn!("Tick for {} skipped: {:#}", session.config.symbol, err);
        return TickOutcome::CollaboratorFailure(format!("{:#}", err));
    }

    let before = session.live.clone();
    let Some(event) = session.engine.live_step(&mut session.live, &pair[0], &pair[1]) else {
        let reason = if session.live.position.is_some() {
            NoOpReason::Holding
        } else {
            NoOpReason::Flat
        };
        debug!("Tick for {} at {}: {:?}", session.config.symbol, pair[1].timestamp, reason);
        if session.live != before {
            persist_session(session, store).await;
        }
        return TickOutcome::NoOp(reason);
    };

    info!(
        "{} {} for {} at {}",
        event.position().direction,
        event.label(),
        session.config.symbol,
        pair[1].timestamp
    );
    if let Err(err) = sink.notify(&session.config, &event).await {
        warn!("Notification for session {} failed: {}", session.id, err);
    }
    persist_session(session, store).await;
    TickOutcome::Event(event)
}

async fn persist_session<P: StateStore>(session: &MonitorSession, store: &P) {
    if let Err(err) = store.save(&session.persisted()).await {
        warn!("Failed to persist session {}: {}", session.id, err);
    }
}

enum MonitorCommand {
    Start {
        config: MonitorConfig,
        reply: oneshot::Sender<Result<StartReport>>,
    },
    Stop {
        reply: oneshot::Sender<Option<Uuid>>,
    },
    Tick {
        reply: oneshot::Sender<TickOutcome>,
    },
    Status {
        reply: oneshot::Sender<MonitorStatus>,
    },
}

/// Cloneable front door to the monitor worker.
#[derive(Clone)]
pub struct MonitorHandle {
    commands: mpsc::Sender<MonitorCommand>,
}

impl MonitorHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> MonitorCommand,
    ) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| anyhow!("Monitor worker has shut down"))?;
        response
            .await
            .map_err(|_| anyhow!("Monitor worker dropped the request"))
    }

    pub async fn start(&self, config: MonitorConfig) -> Result<StartReport> {
        self.request(|reply| MonitorCommand::Start { config, reply })
            .await?
    }

    pub async fn stop(&self) -> Result<Option<Uuid>> {
        self.request(|reply| MonitorCommand::Stop { reply }).await
    }

    pub async fn tick(&self) -> Result<TickOutcome> {
        self.request(|reply| MonitorCommand::Tick { reply }).await
    }

    pub async fn status(&self) -> Result<MonitorStatus> {
        self.request(|reply| MonitorCommand::Status { reply }).await
    }
}

/// Spawns the worker that owns the monitor state. It exits once every handle is dropped.
pub fn spawn_monitor<S, N, P>(
    source: S,
    sink: N,
    store: P,
) -> (MonitorHandle, JoinHandle<LiveMonitorState>)
where
    S: BarSource,
    N: NotificationSink,
    P: StateStore,
{
    let (commands, mut inbox) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let worker = tokio::spawn(async move {
        let mut state = LiveMonitorState::new();
        while let Some(command) = inbox.recv().await {
            match command {
                MonitorCommand::Start { config, reply } => {
                    let _ = reply.send(state.start(config, &store).await);
                }
                MonitorCommand::Stop { reply } => {
                    let _ = reply.send(state.stop(&store).await);
                }
                MonitorCommand::Tick { reply } => {
                    let _ = reply.send(state.tick(&source, &sink, &store).await);
                }
                MonitorCommand::Status { reply } => {
                    let _ = reply.send(state.status());
                }
            }
        }
        debug!("Monitor worker exiting after {} tick(s)", state.ticks);
        state
    });
    (MonitorHandle { commands }, worker)
}

/// Sends a tick every `period`, waiting for each to finish before the next.
pub fn spawn_scheduler(
    handle: MonitorHandle,
    period: Duration,
    on_outcome: Arc<dyn Fn(&TickOutcome) + Send + Sync>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            match handle.tick().await {
                Ok(outcome) => on_outcome(&outcome),
                Err(err) => {
                    debug!("Scheduler stopping: {}", err);
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RiskConfig;
    use crate::models::{PriceBar, Signal};
    use crate::notify::LogNotifier;
    use crate::store::MemoryStore;
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone};
    use std::sync::Mutex;

    struct ScriptedSource {
        bars: Mutex<Result<Vec<PriceBar>, String>>,
    }

    impl ScriptedSource {
        fn new(bars: Vec<PriceBar>) -> Self {
            Self {
                bars: Mutex::new(Ok(bars)),
            }
        }

        fn set(&self, bars: Result<Vec<PriceBar>, String>) {
            *self.bars.lock().unwrap() = bars;
        }
    }

    impl BarSource for ScriptedSource {
        async fn fetch_bars(
            &self,
            _config: &MonitorConfig,
        ) -> Result<Vec<PriceBar>, CollaboratorError> {
            self.bars
                .lock()
                .unwrap()
                .clone()
                .map_err(CollaboratorError::DataSource)
        }
    }

    fn at(hour: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap() + ChronoDuration::hours(hour)
    }

    fn bar(hour: i64, signal: Signal, high: f64, low: f64) -> PriceBar {
        PriceBar {
            timestamp: at(hour),
            open: 100.0,
            high,
            low,
            close: 100.0,
            volume: 0.0,
            signal,
            volatility_estimate: Some(2.0),
        }
    }

    fn config() -> MonitorConfig {
        MonitorConfig {
            symbol: "EURUSD=X".to_string(),
            timeframe: "1h".to_string(),
            strategy: "trend_following".to_string(),
            risk: RiskConfig {
                slippage: 0.0,
                commission: 0.0,
                warmup_bars: 0,
                ..RiskConfig::default()
            },
        }
    }

    #[tokio::test]
    async fn tick_without_session_is_a_noop() {
        let mut state = LiveMonitorState::new();
        let source = ScriptedSource::new(vec![]);
        let outcome = state.tick(&source, &LogNotifier, &MemoryStore::new()).await;
        assert_eq!(outcome, TickOutcome::NoOp(NoOpReason::NotRunning));
    }

    #[tokio::test]
    async fn fetch_failures_do_not_touch_state() {
        let store = MemoryStore::new();
        let mut state = LiveMonitorState::new();
        state.start(config(), &store).await.unwrap();

        let source = ScriptedSource::new(vec![bar(0, Signal::StayOut, 101.0, 99.0)]);
        let outcome = state.tick(&source, &LogNotifier, &store).await;
        assert!(matches!(outcome, TickOutcome::CollaboratorFailure(_)));

        source.set(Err("feed offline".to_string()));
        let outcome = state.tick(&source, &LogNotifier, &store).await;
        assert_eq!(
            outcome,
            TickOutcome::CollaboratorFailure("bar source failed: feed offline".to_string())
        );
        assert!(state.status().position.is_none());
        assert_eq!(state.status().ticks, 2);
    }

    #[tokio::test]
    async fn open_hold_and_stop_clears_position() {
        let store = MemoryStore::new();
        let mut state = LiveMonitorState::new();
        state.start(config(), &store).await.unwrap();

        let source = ScriptedSource::new(vec![
            bar(0, Signal::StayOut, 101.0, 99.0),
            bar(1, Signal::Long, 101.0, 99.0),
        ]);
        let outcome = state.tick(&source, &LogNotifier, &store).await;
        assert!(matches!(outcome, TickOutcome::Event(LifecycleEvent::Opened(_))));
        let persisted = store.snapshot().unwrap();
        assert!(persisted.state.position.is_some());

        let outcome = state.tick(&source, &LogNotifier, &store).await;
        assert_eq!(outcome, TickOutcome::NoOp(NoOpReason::Holding));

        assert!(state.stop(&store).await.is_some());
        assert!(store.snapshot().is_none());
        let status = state.status();
        assert!(!status.running);
        assert!(status.position.is_none());
        assert_eq!(state.stop(&store).await, None);
    }

    #[tokio::test]
    async fn quiet_ticks_persist_evaluated_bar() {
        let store = MemoryStore::new();
        let mut state = LiveMonitorState::new();
        state.start(config(), &store).await.unwrap();

        let source = ScriptedSource::new(vec![
            bar(0, Signal::StayOut, 101.0, 99.0),
            bar(1, Signal::StayOut, 101.0, 99.0),
        ]);
        let outcome = state.tick(&source, &LogNotifier, &store).await;
        assert_eq!(outcome, TickOutcome::NoOp(NoOpReason::Flat));
        assert_eq!(store.snapshot().unwrap().state.last_entry_bar, Some(at(1)));

        source.set(Ok(vec![
            bar(1, Signal::StayOut, 101.0, 99.0),
            bar(2, Signal::StayOut, 101.0, 99.0),
        ]));
        state.tick(&source, &LogNotifier, &store).await;
        assert_eq!(store.snapshot().unwrap().state.last_entry_bar, Some(at(2)));
    }

    #[tokio::test]
    async fn start_resumes_matching_stored_session() {
        let store = MemoryStore::new();
        let mut first = LiveMonitorState::new();
        let started = first.start(config(), &store).await.unwrap();
        assert!(!started.resumed);
        assert!(first.start(config(), &store).await.is_err());

        let mut second = LiveMonitorState::new();
        let resumed = second.start(config(), &store).await.unwrap();
        assert!(resumed.resumed);
        assert_eq!(resumed.session_id, started.session_id);

        let mut other = config();
        other.symbol = "USDJPY=X".to_string();
        let mut third = LiveMonitorState::new();
        let fresh = third.start(other, &store).await.unwrap();
        assert!(!fresh.resumed);
        assert_ne!(fresh.session_id, started.session_id);
    }
}
