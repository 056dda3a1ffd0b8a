//! Performance statistics and terminal reports over portfolio levels.

use crate::aggregator::{LevelFrame, PortfolioLevels};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use tabled::{builder::Builder, settings::Style};

/// Observations per year used when none is given.
pub const DEFAULT_ANNUALIZATION: f64 = 256.0;

/// Summary statistics of one percentage-return series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesStats {
    /// Non-missing observations.
    pub observations: usize,
    pub annual_return_pct: f64,
    pub volatility_pct: f64,
    pub sharpe_ratio: f64,
    /// Largest peak-to-trough loss of the compounded curve, as a positive percent.
    pub max_drawdown_pct: f64,
    /// Share of observations with a positive return, in percent.
    pub hit_rate: f64,
}

impl SeriesStats {
    /// Statistics of `returns` (percent per period), skipping missing values.
    pub fn from_returns(returns: &[f32], annualization: f64) -> Self {
        let valid: Vec<f64> = returns
            .iter()
            .filter(|v| !v.is_nan())
            .map(|&v| v as f64)
            .collect();
        let n = valid.len();
        if n == 0 {
            return Self {
                observations: 0,
                annual_return_pct: 0.0,
                volatility_pct: 0.0,
                sharpe_ratio: 0.0,
                max_drawdown_pct: 0.0,
                hit_rate: 0.0,
            };
        }

        let mean = valid.iter().sum::<f64>() / n as f64;
        let std = if n > 1 {
            (valid.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
        } else {
            0.0
        };
        let annual_return_pct = mean * annualization;
        let volatility_pct = std * annualization.sqrt();
        let sharpe_ratio = if volatility_pct > 0.0 {
            annual_return_pct / volatility_pct
        } else {
            0.0
        };

        Self {
            observations: n,
            annual_return_pct,
            volatility_pct,
            sharpe_ratio,
            max_drawdown_pct: max_drawdown(&valid),
            hit_rate: valid.iter().filter(|&&r| r > 0.0).count() as f64 / n as f64 * 100.0,
        }
    }
}

fn max_drawdown(returns: &[f64]) -> f64 {
    let mut equity = 1.0;
    let mut peak = 1.0;
    let mut worst: f64 = 0.0;
    for r in returns {
        equity *= 1.0 + r / 100.0;
        peak = f64::max(peak, equity);
        worst = worst.max((peak - equity) / peak);
    }
    worst * 100.0
}

impl LevelFrame {
    /// Statistics of every column, keyed by joined label.
    pub fn stats(&self, annualization: f64) -> Vec<(String, SeriesStats)> {
        self.column_names()
            .into_iter()
            .enumerate()
            .map(|(c, name)| {
                let stats = SeriesStats::from_returns(self.values().column(c), annualization);
                (name, stats)
            })
            .collect()
    }
}

/// Format results for terminal display.
pub struct ResultFormatter;

impl ResultFormatter {
    /// Print the portfolio headline followed by one table per level.
    pub fn print_report(levels: &PortfolioLevels, annualization: f64) {
        println!();
        println!("{}", "═".repeat(60).blue());
        println!("{}", " PORTFOLIO RESULTS ".bold().blue());
        println!("{}", "═".repeat(60).blue());
        println!();

        if let Some(portfolio) = levels.portfolio() {
            let stats = SeriesStats::from_returns(portfolio.values().column(0), annualization);
            println!("{}", "Portfolio".bold().underline());
            if let (Some(first), Some(last)) = (portfolio.dates().first(), portfolio.dates().last()) {
                println!("  Period:          {} to {}", first, last);
            }
            println!("  Observations:    {:>12}", stats.observations);
            println!(
                "  Annual Return:   {:>12}",
                Self::format_pct(stats.annual_return_pct)
            );
            println!("  Volatility:      {:>12.2}%", stats.volatility_pct);
            println!("  Sharpe Ratio:    {:>12.2}", stats.sharpe_ratio);
            println!("  Max Drawdown:    {:>12.2}%", -stats.max_drawdown_pct);
            println!("  Hit Rate:        {:>12.1}%", stats.hit_rate);
            println!();
        }

        for level in levels.iter().filter(|l| l.name() != crate::aggregator::PORTFOLIO_LEVEL) {
            println!("{}", level.name().bold().underline());
            println!("{}", Self::level_table(level, annualization));
            println!();
        }
        println!("{}", "═".repeat(60).blue());
    }

    /// Statistics table of one level.
    pub fn level_table(level: &LevelFrame, annualization: f64) -> String {
        let mut builder = Builder::new();
        builder.push_record(["Column", "Obs", "Annual %", "Vol %", "Sharpe", "Max DD %", "Hit %"]);
        for (name, stats) in level.stats(annualization) {
            builder.push_record([
                name,
                stats.observations.to_string(),
                format!("{:.2}", stats.annual_return_pct),
                format!("{:.2}", stats.volatility_pct),
                format!("{:.2}", stats.sharpe_ratio),
                format!("{:.2}", -stats.max_drawdown_pct),
                format!("{:.1}", stats.hit_rate),
            ]);
        }
        builder.build().with(Style::rounded()).to_string()
    }

    fn format_pct(pct: f64) -> String {
        if pct >= 0.0 {
            format!("+{:.2}%", pct).green().to_string()
        } else {
            format!("{:.2}%", pct).red().to_string()
        }
    }

    /// Per-level statistics as pretty JSON.
    pub fn to_json(levels: &PortfolioLevels, annualization: f64) -> String {
        let report: Vec<(String, Vec<(String, SeriesStats)>)> = levels
            .iter()
            .map(|l| (l.name().to_string(), l.stats(annualization)))
            .collect();
        serde_json::to_string_pretty(&report).unwrap_or_else(|_| "[]".to_string())
    }
}
