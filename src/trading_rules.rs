use crate::config::RiskConfig;
use crate::models::{Direction, ExitReason, Position, PriceBar, Signal};

/// Units to trade so that a stop-out loses `risk_percent` of `capital`.
/// Returns 0 when the stop sits on the entry price or the result is unusable.
pub fn compute_position_size(
    capital: f64,
    risk_config: &RiskConfig,
    entry_price: f64,
    stop_loss: f64,
) -> f64 {
    let risk_per_unit = (entry_price - stop_loss).abs();
    if risk_per_unit == 0.0 || !risk_per_unit.is_finite() {
        return 0.0;
    }
    let risk_amount = capital * risk_config.risk_percent / 100.0;
    let size = risk_amount / risk_per_unit;
    if size.is_finite() && size > 0.0 {
        size
    } else {
        0.0
    }
}

/// True when the bar pair is a transition into a directional signal.
///
/// A move from `STAY_OUT` into `LONG`/`SHORT` and a direct flip between
/// `LONG` and `SHORT` both qualify; repeating the previous signal does not.
pub fn is_entry_transition(previous: Signal, current: Signal) -> bool {
    current != previous && current.direction().is_some()
}

pub fn apply_entry_slippage(price: f64, direction: Direction, slippage: f64) -> f64 {
    match direction {
        Direction::Long => price + slippage,
        Direction::Short => price - slippage,
    }
}

pub fn apply_exit_slippage(price: f64, direction: Direction, slippage: f64) -> f64 {
    match direction {
        Direction::Long => price - slippage,
        Direction::Short => price + slippage,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProtectiveLevels {
    pub stop_loss: f64,
    pub take_profit: f64,
}

pub fn protective_levels(
    entry_price: f64,
    direction: Direction,
    volatility: f64,
    risk_config: &RiskConfig,
) -> ProtectiveLevels {
    let stop_distance = volatility * risk_config.stop_multiplier;
    let target_distance = volatility * risk_config.target_multiplier;
    match direction {
        Direction::Long => ProtectiveLevels {
            stop_loss: entry_price - stop_distance,
            take_profit: entry_price + target_distance,
        },
        Direction::Short => ProtectiveLevels {
            stop_loss: entry_price + stop_distance,
            take_profit: entry_price - target_distance,
        },
    }
}

/// Stop or target breached within `bar`, with the raw level as fill.
/// The stop is tested first so it wins when both are inside the range.
pub fn protective_exit(position: &Position, bar: &PriceBar) -> Option<(ExitReason, f64)> {
    match position.direction {
        Direction::Long => {
            if bar.low <= position.stop_loss {
                Some((ExitReason::StopLoss, position.stop_loss))
            } else if bar.high >= position.take_profit {
                Some((ExitReason::TakeProfit, position.take_profit))
            } else {
                None
            }
        }
        Direction::Short => {
            if bar.high >= position.stop_loss {
                Some((ExitReason::StopLoss, position.stop_loss))
            } else if bar.low <= position.take_profit {
                Some((ExitReason::TakeProfit, position.take_profit))
            } else {
                None
            }
        }
    }
}

/// Peak-to-current decline as a fraction of the peak; 0 for a non-positive peak.
pub fn drawdown_ratio(peak_capital: f64, capital: f64) -> f64 {
    if peak_capital <= 0.0 {
        return 0.0;
    }
    ((peak_capital - capital) / peak_capital).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bar(high: f64, low: f64) -> PriceBar {
        PriceBar {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            open: (high + low) / 2.0,
            high,
            low,
            close: (high + low) / 2.0,
            volume: 1_000.0,
            signal: Signal::StayOut,
            volatility_estimate: None,
        }
    }

    fn risk() -> RiskConfig {
        RiskConfig {
            initial_capital: 10_000.0,
            risk_percent: 2.0,
            max_trades_per_day: 3,
            stop_multiplier: 1.0,
            target_multiplier: 1.5,
            slippage: 0.0,
            commission: 0.0,
            warmup_bars: 0,
        }
    }

    #[test]
    fn sizes_by_risk_over_stop_distance() {
        let size = compute_position_size(10_000.0, &risk(), 100.0, 97.0);
        assert!((size - 200.0 / 3.0).abs() < 1e-9);
        let short = compute_position_size(10_000.0, &risk(), 100.0, 104.0);
        assert!((short - 50.0).abs() < 1e-9);
    }

    #[test]
    fn zero_stop_distance_gives_zero_size() {
        assert_eq!(compute_position_size(10_000.0, &risk(), 100.0, 100.0), 0.0);
        assert_eq!(compute_position_size(0.0, &risk(), 100.0, 99.0), 0.0);
        assert_eq!(compute_position_size(-50.0, &risk(), 100.0, 99.0), 0.0);
    }

    #[test]
    fn transition_requires_change_into_direction() {
        assert!(is_entry_transition(Signal::StayOut, Signal::Long));
        assert!(is_entry_transition(Signal::Long, Signal::Short));
        assert!(!is_entry_transition(Signal::Long, Signal::Long));
        assert!(!is_entry_transition(Signal::Short, Signal::StayOut));
        assert!(!is_entry_transition(Signal::StayOut, Signal::StayOut));
    }

    #[test]
    fn slippage_always_hurts() {
        assert_eq!(apply_entry_slippage(100.0, Direction::Long, 0.5), 100.5);
        assert_eq!(apply_entry_slippage(100.0, Direction::Short, 0.5), 99.5);
        assert_eq!(apply_exit_slippage(100.0, Direction::Long, 0.5), 99.5);
        assert_eq!(apply_exit_slippage(100.0, Direction::Short, 0.5), 100.5);
    }

    #[test]
    fn levels_follow_direction() {
        let long = protective_levels(100.0, Direction::Long, 3.0, &risk());
        assert_eq!(long.stop_loss, 97.0);
        assert_eq!(long.take_profit, 104.5);
        let short = protective_levels(100.0, Direction::Short, 3.0, &risk());
        assert_eq!(short.stop_loss, 103.0);
        assert_eq!(short.take_profit, 95.5);
    }

    #[test]
    fn stop_wins_when_both_levels_are_breached() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let long = Position::open(Direction::Long, ts, 100.0, 97.0, 104.5, 1.0).unwrap();
        assert_eq!(
            protective_exit(&long, &bar(107.0, 96.0)),
            Some((ExitReason::StopLoss, 97.0))
        );
        assert_eq!(
            protective_exit(&long, &bar(107.0, 104.0)),
            Some((ExitReason::TakeProfit, 104.5))
        );
        assert_eq!(protective_exit(&long, &bar(104.0, 98.0)), None);

        let short = Position::open(Direction::Short, ts, 100.0, 103.0, 95.5, 1.0).unwrap();
        assert_eq!(
            protective_exit(&short, &bar(103.5, 95.0)),
            Some((ExitReason::StopLoss, 103.0))
        );
        assert_eq!(
            protective_exit(&short, &bar(101.0, 95.0)),
            Some((ExitReason::TakeProfit, 95.5))
        );
    }

    #[test]
    fn drawdown_guards_zero_peak() {
        assert_eq!(drawdown_ratio(0.0, -10.0), 0.0);
        assert!((drawdown_ratio(200.0, 150.0) - 0.25).abs() < 1e-12);
        assert_eq!(drawdown_ratio(200.0, 250.0), 0.0);
    }
}
