#![deny(missing_docs)]
//! Pure quality-gate evaluators for training and backtest result summaries.
//!
//! Gates never hold interior mutability — thresholds are read once at
//! construction (`from_env()` or `Default`) and the evaluators are plain
//! value types. A gate never fails structurally (no I/O, no parsing at
//! call time), so there's no error enum here — every call returns a
//! `GateResult`.

use serde::{Deserialize, Serialize};

/// Outcome of evaluating a gate: whether it passed, and why (or why not).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    /// Whether every predicate in the gate held.
    pub passed: bool,
    /// Human-readable explanation. On failure, names the first failing
    /// predicate along with the observed value and threshold.
    pub reason: String,
}

impl GateResult {
    fn pass(reason: impl Into<String>) -> Self {
        Self {
            passed: true,
            reason: reason.into(),
        }
    }

    fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: reason.into(),
        }
    }
}

/// Result summary produced by a completed training operation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TrainingResult {
    /// Final model accuracy, if reported.
    pub accuracy: Option<f64>,
    /// Final training loss, if reported.
    pub final_loss: Option<f64>,
    /// Initial training loss, if reported.
    pub initial_loss: Option<f64>,
}

/// Result summary produced by a completed backtest operation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BacktestResult {
    /// Win rate over the backtest window, if reported.
    pub win_rate: Option<f64>,
    /// Maximum drawdown observed, if reported.
    pub max_drawdown: Option<f64>,
    /// Sharpe ratio over the backtest window, if reported.
    pub sharpe_ratio: Option<f64>,
}

/// Thresholds for the training gate, read once at construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingGateConfig {
    /// Minimum acceptable final accuracy.
    pub min_accuracy: f64,
    /// Maximum acceptable final loss.
    pub max_final_loss: f64,
    /// Minimum acceptable `(initial_loss - final_loss) / initial_loss`.
    pub min_loss_reduction_ratio: f64,
}

impl Default for TrainingGateConfig {
    fn default() -> Self {
        Self {
            min_accuracy: 0.45,
            max_final_loss: 0.8,
            min_loss_reduction_ratio: 0.2,
        }
    }
}

impl TrainingGateConfig {
    /// Build a config from environment variables, falling back to the
    /// spec defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            min_accuracy: env_f64("TRAINING_GATE_MIN_ACCURACY", defaults.min_accuracy),
            max_final_loss: env_f64("TRAINING_GATE_MAX_FINAL_LOSS", defaults.max_final_loss),
            min_loss_reduction_ratio: env_f64(
                "TRAINING_GATE_MIN_LOSS_REDUCTION",
                defaults.min_loss_reduction_ratio,
            ),
        }
    }

    /// Evaluate the training gate. Inclusive inequalities: a value equal
    /// to the threshold passes.
    pub fn evaluate(&self, result: &TrainingResult) -> GateResult {
        let Some(accuracy) = result.accuracy else {
            return GateResult::fail("missing field: accuracy");
        };
        let Some(final_loss) = result.final_loss else {
            return GateResult::fail("missing field: final_loss");
        };
        let Some(initial_loss) = result.initial_loss else {
            return GateResult::fail("missing field: initial_loss");
        };

        if accuracy < self.min_accuracy {
            return GateResult::fail(format!(
                "accuracy {accuracy} below threshold {}",
                self.min_accuracy
            ));
        }
        if final_loss > self.max_final_loss {
            return GateResult::fail(format!(
                "final_loss {final_loss} above threshold {}",
                self.max_final_loss
            ));
        }
        if initial_loss == 0.0 {
            return GateResult::fail("initial_loss is zero, cannot compute loss reduction ratio");
        }
        let reduction_ratio = (initial_loss - final_loss) / initial_loss;
        if reduction_ratio < self.min_loss_reduction_ratio {
            return GateResult::fail(format!(
                "loss reduction ratio {reduction_ratio} below threshold {}",
                self.min_loss_reduction_ratio
            ));
        }

        GateResult::pass(format!(
            "accuracy {accuracy} >= {}, final_loss {final_loss} <= {}, reduction {reduction_ratio} >= {}",
            self.min_accuracy, self.max_final_loss, self.min_loss_reduction_ratio
        ))
    }
}

/// Thresholds for the backtest gate, read once at construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BacktestGateConfig {
    /// Minimum acceptable win rate.
    pub min_win_rate: f64,
    /// Maximum acceptable drawdown.
    pub max_drawdown: f64,
    /// Minimum acceptable Sharpe ratio.
    pub min_sharpe_ratio: f64,
}

impl Default for BacktestGateConfig {
    fn default() -> Self {
        Self {
            min_win_rate: 0.45,
            max_drawdown: 0.4,
            min_sharpe_ratio: -0.5,
        }
    }
}

impl BacktestGateConfig {
    /// Build a config from environment variables, falling back to the
    /// spec defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            min_win_rate: env_f64("BACKTEST_GATE_MIN_WIN_RATE", defaults.min_win_rate),
            max_drawdown: env_f64("BACKTEST_GATE_MAX_DRAWDOWN", defaults.max_drawdown),
            min_sharpe_ratio: env_f64("BACKTEST_GATE_MIN_SHARPE", defaults.min_sharpe_ratio),
        }
    }

    /// Evaluate the backtest gate. Inclusive inequalities throughout.
    pub fn evaluate(&self, result: &BacktestResult) -> GateResult {
        let Some(win_rate) = result.win_rate else {
            return GateResult::fail("missing field: win_rate");
        };
        let Some(max_drawdown) = result.max_drawdown else {
            return GateResult::fail("missing field: max_drawdown");
        };
        let Some(sharpe_ratio) = result.sharpe_ratio else {
            return GateResult::fail("missing field: sharpe_ratio");
        };

        if win_rate < self.min_win_rate {
            return GateResult::fail(format!(
                "win_rate {win_rate} below threshold {}",
                self.min_win_rate
            ));
        }
        if max_drawdown > self.max_drawdown {
            return GateResult::fail(format!(
                "drawdown {max_drawdown} above threshold {}",
                self.max_drawdown
            ));
        }
        if sharpe_ratio < self.min_sharpe_ratio {
            return GateResult::fail(format!(
                "sharpe_ratio {sharpe_ratio} below threshold {}",
                self.min_sharpe_ratio
            ));
        }

        GateResult::pass(format!(
            "win_rate {win_rate} >= {}, drawdown {max_drawdown} <= {}, sharpe {sharpe_ratio} >= {}",
            self.min_win_rate, self.max_drawdown, self.min_sharpe_ratio
        ))
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn training_gate_passes_all_predicates() {
        let gate = TrainingGateConfig::default();
        let result = TrainingResult {
            accuracy: Some(0.65),
            final_loss: Some(0.30),
            initial_loss: Some(1.00),
        };
        let verdict = gate.evaluate(&result);
        assert!(verdict.passed);
    }

    #[test]
    fn training_gate_fails_on_accuracy() {
        let gate = TrainingGateConfig::default();
        let result = TrainingResult {
            accuracy: Some(0.30),
            final_loss: Some(0.30),
            initial_loss: Some(1.00),
        };
        let verdict = gate.evaluate(&result);
        assert!(!verdict.passed);
        assert!(verdict.reason.contains("accuracy"));
        assert!(verdict.reason.contains("0.3"));
        assert!(verdict.reason.contains("0.45"));
    }

    #[test]
    fn training_gate_threshold_value_passes_inclusive() {
        let gate = TrainingGateConfig::default();
        let result = TrainingResult {
            accuracy: Some(0.45), // exactly min_accuracy
            final_loss: Some(0.8), // exactly max_final_loss
            initial_loss: Some(1.0),
        };
        let verdict = gate.evaluate(&result);
        assert!(verdict.passed);
    }

    #[test]
    fn training_gate_missing_field_fails_with_reason() {
        let gate = TrainingGateConfig::default();
        let result = TrainingResult {
            accuracy: None,
            final_loss: Some(0.3),
            initial_loss: Some(1.0),
        };
        let verdict = gate.evaluate(&result);
        assert!(!verdict.passed);
        assert!(verdict.reason.contains("accuracy"));
    }

    #[test]
    fn backtest_gate_passes_all_predicates() {
        let gate = BacktestGateConfig::default();
        let result = BacktestResult {
            win_rate: Some(0.55),
            max_drawdown: Some(0.15),
            sharpe_ratio: Some(0.80),
        };
        assert!(gate.evaluate(&result).passed);
    }

    #[test]
    fn backtest_gate_fails_on_drawdown() {
        let gate = BacktestGateConfig::default();
        let result = BacktestResult {
            win_rate: Some(0.55),
            max_drawdown: Some(0.55),
            sharpe_ratio: Some(0.50),
        };
        let verdict = gate.evaluate(&result);
        assert!(!verdict.passed);
        assert!(verdict.reason.contains("drawdown"));
    }

    #[test]
    fn backtest_gate_missing_field_fails() {
        let gate = BacktestGateConfig::default();
        let result = BacktestResult {
            win_rate: Some(0.55),
            max_drawdown: None,
            sharpe_ratio: Some(0.5),
        };
        let verdict = gate.evaluate(&result);
        assert!(!verdict.passed);
        assert!(verdict.reason.contains("max_drawdown"));
    }

    #[test]
    fn backtest_gate_threshold_sharpe_passes_inclusive() {
        let gate = BacktestGateConfig::default();
        let result = BacktestResult {
            win_rate: Some(0.45),
            max_drawdown: Some(0.4),
            sharpe_ratio: Some(-0.5), // exactly min_sharpe_ratio
        };
        assert!(gate.evaluate(&result).passed);
    }

    proptest::proptest! {
        #[test]
        fn training_gate_never_panics(
            accuracy in -1.0f64..2.0,
            final_loss in -1.0f64..2.0,
            initial_loss in -1.0f64..2.0,
        ) {
            let gate = TrainingGateConfig::default();
            let result = TrainingResult {
                accuracy: Some(accuracy),
                final_loss: Some(final_loss),
                initial_loss: Some(initial_loss),
            };
            let _ = gate.evaluate(&result);
        }

        #[test]
        fn backtest_gate_never_panics(
            win_rate in -1.0f64..2.0,
            max_drawdown in -1.0f64..2.0,
            sharpe_ratio in -5.0f64..5.0,
        ) {
            let gate = BacktestGateConfig::default();
            let result = BacktestResult {
                win_rate: Some(win_rate),
                max_drawdown: Some(max_drawdown),
                sharpe_ratio: Some(sharpe_ratio),
            };
            let _ = gate.evaluate(&result);
        }
    }
}
