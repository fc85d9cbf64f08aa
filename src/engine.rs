use crate::config::RiskConfig;
use crate::error::PositionError;
use crate::models::*;
use crate::performance::{DrawdownTracker, PerformanceCalculator};
use crate::trading_rules::{
    apply_entry_slippage, apply_exit_slippage, compute_position_size, is_entry_transition,
    protective_exit, protective_levels,
};
use chrono::{DateTime, NaiveDate, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub enum EntryDecision {
    Opened(Position),
    Skipped(EntrySkip),
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntrySkip {
    NoTransition,
    DailyLimit { date: NaiveDate, count: u32 },
    MissingVolatility,
    ZeroSize,
    InvalidLevels(PositionError),
}

impl EntrySkip {
    pub fn reason(&self) -> &'static str {
        match self {
            EntrySkip::NoTransition => "no_transition",
            EntrySkip::DailyLimit { .. } => "daily_limit",
            EntrySkip::MissingVolatility => "missing_volatility",
            EntrySkip::ZeroSize => "zero_size",
            EntrySkip::InvalidLevels(_) => "invalid_levels",
        }
    }
}

/// Entries opened per calendar date (UTC).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DailyTradeCounts(BTreeMap<NaiveDate, u32>);

impl DailyTradeCounts {
    pub fn count(&self, date: NaiveDate) -> u32 {
        self.0.get(&date).copied().unwrap_or(0)
    }

    pub fn increment(&mut self, date: NaiveDate) {
        *self.0.entry(date).or_insert(0) += 1;
    }

    /// Drops dates before `date`; only the current day can still throttle.
    pub fn retain_from(&mut self, date: NaiveDate) {
        self.0.retain(|day, _| *day >= date);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NaiveDate, &u32)> {
        self.0.iter()
    }
}

/// Live-monitor state carried between polling ticks by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveState {
    pub position: Option<Position>,
    pub capital: f64,
    pub trades_today: DailyTradeCounts,
    /// Newest bar whose entry condition has already been acted upon.
    pub last_entry_bar: Option<DateTime<Utc>>,
}

impl LiveState {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            position: None,
            capital: initial_capital,
            trades_today: DailyTradeCounts::default(),
            last_entry_bar: None,
        }
    }
}

struct SimulationState {
    position: Option<Position>,
    capital: f64,
    drawdown: DrawdownTracker,
    trades_today: DailyTradeCounts,
}

impl SimulationState {
    fn new(initial_capital: f64) -> Self {
        Self {
            position: None,
            capital: initial_capital,
            drawdown: DrawdownTracker::new(initial_capital),
            trades_today: DailyTradeCounts::default(),
        }
    }
}

pub struct Engine {
    pub config: RiskConfig,
}

impl Engine {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    /// Replays `bars` from the warm-up index to the end and closes anything still open.
    pub fn backtest(&self, bars: &[PriceBar]) -> BacktestReport {
        let mut state = SimulationState::new(self.config.initial_capital);
        let mut trades = Vec::new();
        let mut equity_curve = Vec::new();

        if bars.len() <= self.config.warmup_bars {
            debug!(
                "Series of {} bar(s) does not extend past the {} bar warm-up",
                bars.len(),
                self.config.warmup_bars
            );
        }

        let last_index = bars.len().saturating_sub(1);
        for index in self.config.warmup_bars..bars.len() {
            let bar = &bars[index];
            let is_last_bar = index == last_index;

            if let Some(position) = state.position.take() {
                let exit = protective_exit(&position, bar).or_else(|| {
                    is_last_bar.then_some((ExitReason::EndOfPeriod, bar.close))
                });
                match exit {
                    Some((reason, level)) => {
                        let trade = self.close_position(position, bar, reason, level);
                        state.capital += trade.pnl;
                        state.drawdown.record(state.capital);
                        trades.push(trade);
                    }
                    None => state.position = Some(position),
                }
            }

            equity_curve.push(EquitySample {
                timestamp: bar.timestamp,
                capital: state.capital,
            });

            // A position opened on the last bar could never be held.
            if state.position.is_some() || is_last_bar || index == 0 {
                continue;
            }
            let previous = &bars[index - 1];
            match self.evaluate_entry(state.capital, &mut state.trades_today, previous, bar) {
                EntryDecision::Opened(position) => state.position = Some(position),
                EntryDecision::Skipped(EntrySkip::NoTransition) => {}
                EntryDecision::Skipped(skip) => {
                    debug!("Entry skipped at {}: {}", bar.timestamp, skip.reason());
                }
            }
        }

        let performance = PerformanceCalculator::calculate_performance(
            &trades,
            self.config.initial_capital,
            state.capital,
            state.drawdown.max_drawdown(),
            &equity_curve,
        );
        let status = if trades.is_empty() {
            RunStatus::NoTrades
        } else {
            RunStatus::Completed
        };

        BacktestReport {
            status,
            trades,
            equity_curve,
            performance,
        }
    }

    /// One polling tick against the newest bar and its predecessor.
    ///
    /// Open positions are only ever closed by their stop or target here; the
    /// live series has no end. A tick reports at most one event: after a close,
    /// the entry on that same bar is evaluated by the next poll of it.
    pub fn live_step(
        &self,
        state: &mut LiveState,
        previous: &PriceBar,
        latest: &PriceBar,
    ) -> Option<LifecycleEvent> {
        if let Some(position) = state.position.take() {
            // The entry bar itself is never exit-checked, as in the backtest.
            if latest.timestamp <= position.entry_timestamp {
                state.position = Some(position);
                return None;
            }
            return match protective_exit(&position, latest) {
                Some((reason, level)) => {
                    let trade = self.close_position(position, latest, reason, level);
                    state.capital += trade.pnl;
                    Some(LifecycleEvent::Closed(trade))
                }
                None => {
                    state.position = Some(position);
                    None
                }
            };
        }

        if state
            .last_entry_bar
            .is_some_and(|evaluated| evaluated >= latest.timestamp)
        {
            return None;
        }
        state.last_entry_bar = Some(latest.timestamp);
        state.trades_today.retain_from(latest.timestamp.date_naive());

        match self.evaluate_entry(state.capital, &mut state.trades_today, previous, latest) {
            EntryDecision::Opened(position) => {
                state.position = Some(position.clone());
                Some(LifecycleEvent::Opened(position))
            }
            EntryDecision::Skipped(skip) => {
                if skip != EntrySkip::NoTransition {
                    debug!("Live entry skipped at {}: {:?}", latest.timestamp, skip);
                }
                None
            }
        }
    }

    /// Entry rule shared by the backtest and the live monitor. Only an accepted
    /// entry counts against the day's throttle.
    pub fn evaluate_entry(
        &self,
        capital: f64,
        trades_today: &mut DailyTradeCounts,
        previous: &PriceBar,
        bar: &PriceBar,
    ) -> EntryDecision {
        if !is_entry_transition(previous.signal, bar.signal) {
            return EntryDecision::Skipped(EntrySkip::NoTransition);
        }
        let Some(direction) = bar.signal.direction() else {
            return EntryDecision::Skipped(EntrySkip::NoTransition);
        };

        let date = bar.timestamp.date_naive();
        let count = trades_today.count(date);
        if count >= self.config.max_trades_per_day {
            return EntryDecision::Skipped(EntrySkip::DailyLimit { date, count });
        }

        let Some(volatility) = bar.usable_volatility() else {
            return EntryDecision::Skipped(EntrySkip::MissingVolatility);
        };

        let entry_price = apply_entry_slippage(bar.open, direction, self.config.slippage);
        let levels = protective_levels(entry_price, direction, volatility, &self.config);
        let size = compute_position_size(capital, &self.config, entry_price, levels.stop_loss);
        if size <= 0.0 {
            return EntryDecision::Skipped(EntrySkip::ZeroSize);
        }

        match Position::open(
            direction,
            bar.timestamp,
            entry_price,
            levels.stop_loss,
            levels.take_profit,
            size,
        ) {
            Ok(position) => {
                trades_today.increment(date);
                EntryDecision::Opened(position)
            }
            Err(err) => EntryDecision::Skipped(EntrySkip::InvalidLevels(err)),
        }
    }

    fn close_position(
        &self,
        position: Position,
        bar: &PriceBar,
        reason: ExitReason,
        level: f64,
    ) -> ClosedTrade {
        let exit_price = apply_exit_slippage(level, position.direction, self.config.slippage);
        position.close(bar.timestamp, exit_price, reason, self.config.commission)
    }
}
