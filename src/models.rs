use crate::error::PositionError;
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Signal {
    Long,
    Short,
    StayOut,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Long => "LONG",
            Signal::Short => "SHORT",
            Signal::StayOut => "STAY_OUT",
        }
    }

    /// Side a position would take on this signal, `None` for the neutral state.
    pub fn direction(&self) -> Option<Direction> {
        match self {
            Signal::Long => Some(Direction::Long),
            Signal::Short => Some(Direction::Short),
            Signal::StayOut => None,
        }
    }
}

impl FromStr for Signal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "LONG" => Ok(Signal::Long),
            "SHORT" => Ok(Signal::Short),
            "STAY_OUT" | "STAYOUT" => Ok(Signal::StayOut),
            other => Err(anyhow!("Unknown signal '{}'", other)),
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }

    pub fn is_short(&self) -> bool {
        matches!(self, Direction::Short)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One OHLCV sample already labelled by the upstream signal classifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PriceBar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
    pub signal: Signal,
    /// Strategy-specific proxy for expected adverse excursion (band width, scaled range, ...).
    #[serde(default)]
    pub volatility_estimate: Option<f64>,
}

impl PriceBar {
    /// Volatility usable for placing a stop: present, finite and strictly positive.
    pub fn usable_volatility(&self) -> Option<f64> {
        self.volatility_estimate
            .filter(|value| value.is_finite() && *value > 0.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub direction: Direction,
    pub entry_timestamp: DateTime<Utc>,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub size: f64,
}

impl Position {
    pub fn open(
        direction: Direction,
        entry_timestamp: DateTime<Utc>,
        entry_price: f64,
        stop_loss: f64,
        take_profit: f64,
        size: f64,
    ) -> Result<Self, PositionError> {
        if ![entry_price, stop_loss, take_profit, size]
            .iter()
            .all(|value| value.is_finite())
        {
            return Err(PositionError::NonFinite);
        }
        if size <= 0.0 {
            return Err(PositionError::NonPositiveSize(size));
        }
        let ordered = match direction {
            Direction::Long => stop_loss < entry_price && entry_price < take_profit,
            Direction::Short => take_profit < entry_price && entry_price < stop_loss,
        };
        if !ordered {
            return Err(PositionError::InvalidLevels {
                direction,
                entry_price,
                stop_loss,
                take_profit,
            });
        }

        Ok(Self {
            direction,
            entry_timestamp,
            entry_price,
            stop_loss,
            take_profit,
            size,
        })
    }

    /// Gross pnl of the position if filled at `exit_price`, before commission.
    pub fn gross_pnl(&self, exit_price: f64) -> f64 {
        match self.direction {
            Direction::Long => (exit_price - self.entry_price) * self.size,
            Direction::Short => (self.entry_price - exit_price) * self.size,
        }
    }

    /// Consumes the position into its ledger entry.
    pub fn close(
        self,
        exit_timestamp: DateTime<Utc>,
        exit_price: f64,
        exit_reason: ExitReason,
        commission: f64,
    ) -> ClosedTrade {
        let pnl = self.gross_pnl(exit_price) - commission;
        ClosedTrade {
            position: self,
            exit_timestamp,
            exit_price,
            exit_reason,
            pnl,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    EndOfPeriod,
}

impl ExitReason {
    pub fn label(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "Stop Loss",
            ExitReason::TakeProfit => "Take Profit",
            ExitReason::EndOfPeriod => "End of Period",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClosedTrade {
    #[serde(flatten)]
    pub position: Position,
    pub exit_timestamp: DateTime<Utc>,
    pub exit_price: f64,
    pub exit_reason: ExitReason,
    pub pnl: f64,
}

impl ClosedTrade {
    pub fn is_win(&self) -> bool {
        self.pnl > 0.0
    }

    /// Price move of the trade relative to entry, signed in the trade's favour.
    pub fn return_percent(&self) -> f64 {
        let entry = self.position.entry_price;
        if entry == 0.0 {
            return 0.0;
        }
        let mut change = self.exit_price - entry;
        if self.position.direction.is_short() {
            change = -change;
        }
        change / entry * 100.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EquitySample {
    pub timestamp: DateTime<Utc>,
    pub capital: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSummary {
    pub total_return: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub max_drawdown: f64,
    pub final_capital: f64,
    pub sharpe_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum LifecycleEvent {
    Opened(Position),
    Closed(ClosedTrade),
}

impl LifecycleEvent {
    pub fn label(&self) -> &'static str {
        match self {
            LifecycleEvent::Opened(_) => "Entry",
            LifecycleEvent::Closed(trade) => trade.exit_reason.label(),
        }
    }

    pub fn position(&self) -> &Position {
        match self {
            LifecycleEvent::Opened(position) => position,
            LifecycleEvent::Closed(trade) => &trade.position,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    Completed,
    /// No position was ever opened; the summary is zeroed.
    NoTrades,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BacktestReport {
    pub status: RunStatus,
    pub trades: Vec<ClosedTrade>,
    pub equity_curve: Vec<EquitySample>,
    pub performance: PerformanceSummary,
}

impl BacktestReport {
    pub fn has_trades(&self) -> bool {
        matches!(self.status, RunStatus::Completed)
    }
}
