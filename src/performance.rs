use crate::models::*;
use statrs::statistics::Statistics;

/// Reported in place of an undefined profit factor when no trade lost money.
pub const PROFIT_FACTOR_SENTINEL: f64 = 999.0;

pub struct PerformanceCalculator;

impl PerformanceCalculator {
    /// Full summary of a run, including the Sharpe ratio of its equity curve.
    pub fn calculate_performance(
        trades: &[ClosedTrade],
        initial_capital: f64,
        final_capital: f64,
        max_drawdown: f64,
        equity_curve: &[EquitySample],
    ) -> PerformanceSummary {
        let mut summary = Self::summarize(trades, initial_capital, final_capital, max_drawdown);
        if !trades.is_empty() {
            summary.sharpe_ratio = round2(Self::calculate_sharpe_ratio(equity_curve));
        }
        summary
    }

    /// Aggregates a ledger. `max_drawdown` is a fraction; the summary reports it in percent.
    pub fn summarize(
        trades: &[ClosedTrade],
        initial_capital: f64,
        final_capital: f64,
        max_drawdown: f64,
    ) -> PerformanceSummary {
        if trades.is_empty() {
            return Self::zeroed(initial_capital);
        }

        let total_trades = trades.len();
        let (wins, losses): (Vec<&ClosedTrade>, Vec<&ClosedTrade>) =
            trades.iter().partition(|trade| trade.is_win());

        let gross_profit: f64 = wins.iter().map(|trade| trade.pnl).sum();
        let gross_loss: f64 = losses.iter().map(|trade| trade.pnl).sum::<f64>().abs();

        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if !wins.is_empty() {
            PROFIT_FACTOR_SENTINEL
        } else {
            0.0
        };

        let total_return = if initial_capital > 0.0 {
            (final_capital - initial_capital) / initial_capital * 100.0
        } else {
            0.0
        };
        let win_rate = wins.len() as f64 / total_trades as f64 * 100.0;
        let avg_win = if wins.is_empty() {
            0.0
        } else {
            gross_profit / wins.len() as f64
        };
        let avg_loss = if losses.is_empty() {
            0.0
        } else {
            gross_loss / losses.len() as f64
        };

        PerformanceSummary {
            total_return: round2(total_return),
            win_rate: round2(win_rate),
            profit_factor: round2(profit_factor),
            total_trades,
            winning_trades: wins.len(),
            losing_trades: losses.len(),
            avg_win: round2(avg_win),
            avg_loss: round2(avg_loss),
            max_drawdown: round2(max_drawdown.max(0.0) * 100.0),
            final_capital: round2(final_capital),
            sharpe_ratio: 0.0,
        }
    }

    fn zeroed(initial_capital: f64) -> PerformanceSummary {
        PerformanceSummary {
            total_return: 0.0,
            win_rate: 0.0,
            profit_factor: 0.0,
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            avg_win: 0.0,
            avg_loss: 0.0,
            max_drawdown: 0.0,
            final_capital: round2(initial_capital),
            sharpe_ratio: 0.0,
        }
    }

    /// Mean over standard deviation of sample-to-sample capital returns, unannualized.
    pub fn calculate_sharpe_ratio(equity_curve: &[EquitySample]) -> f64 {
        if equity_curve.len() < 3 {
            return 0.0;
        }

        let returns: Vec<f64> = equity_curve
            .windows(2)
            .map(|window| {
                let prev_value = window[0].capital;
                let curr_value = window[1].capital;
                if prev_value > 0.0 {
                    (curr_value - prev_value) / prev_value
                } else {
                    0.0
                }
            })
            .collect();

        let mean_return = returns.clone().mean();
        let std_dev = returns.std_dev();

        if !std_dev.is_finite() || std_dev == 0.0 || !mean_return.is_finite() {
            return 0.0;
        }

        mean_return / std_dev
    }
}

/// Running peak and worst peak-to-trough decline of realized capital.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawdownTracker {
    peak_capital: f64,
    max_drawdown: f64,
}

impl DrawdownTracker {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            peak_capital: initial_capital,
            max_drawdown: 0.0,
        }
    }

    pub fn record(&mut self, capital: f64) {
        self.peak_capital = self.peak_capital.max(capital);
        let drawdown = crate::trading_rules::drawdown_ratio(self.peak_capital, capital);
        self.max_drawdown = self.max_drawdown.max(drawdown);
    }

    pub fn peak_capital(&self) -> f64 {
        self.peak_capital
    }

    pub fn max_drawdown(&self) -> f64 {
        self.max_drawdown
    }
}

pub fn round2(value: f64) -> f64 {
    if !value.is_finite() {
        return value;
    }
    (value * 100.0).round() / 100.0
}
