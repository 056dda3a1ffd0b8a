//! Collapse of the labeled strategy matrix into nested portfolios.
//!
//! Starting from the full seven-field labels, each step groups columns by one field
//! fewer and averages every group row by row, skipping missing cells. Rows that end up
//! missing in every column are dropped before the next step, so each level is built
//! from the previous level's cleaned output rather than from the raw matrix.

use crate::clusters::{StrategyIndex, LABEL_FIELDS};
use crate::error::{BacktestError, Result};
use crate::rolling::nan_mean;
use crate::types::Matrix;
use chrono::NaiveDate;
use rayon::prelude::*;
use std::collections::HashMap;
use tracing::{debug, info};

/// Name of the single-column overall portfolio frame.
pub const PORTFOLIO_LEVEL: &str = "portfolio";

/// Dated return table of one aggregation level.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelFrame {
    name: String,
    dates: Vec<NaiveDate>,
    labels: Vec<Vec<String>>,
    values: Matrix,
}

impl LevelFrame {
    /// Wrap a matrix with its dates and column labels.
    pub fn new(
        name: impl Into<String>,
        dates: Vec<NaiveDate>,
        labels: Vec<Vec<String>>,
        values: Matrix,
    ) -> Result<Self> {
        if dates.len() != values.rows() || labels.len() != values.cols() {
            return Err(BacktestError::ShapeMismatch(format!(
                "{} dates and {} labels for a {:?} matrix",
                dates.len(),
                labels.len(),
                values.shape()
            )));
        }
        Ok(Self {
            name: name.into(),
            dates,
            labels,
            values,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    /// Label fields of each column.
    pub fn labels(&self) -> &[Vec<String>] {
        &self.labels
    }

    /// Column labels joined with `/`.
    pub fn column_names(&self) -> Vec<String> {
        self.labels.iter().map(|l| l.join("/")).collect()
    }

    pub fn values(&self) -> &Matrix {
        &self.values
    }

    pub fn rows(&self) -> usize {
        self.values.rows()
    }

    pub fn cols(&self) -> usize {
        self.values.cols()
    }

    /// Column whose joined label equals `label`.
    pub fn column_by_label(&self, label: &str) -> Option<&[f32]> {
        self.labels
            .iter()
            .position(|l| l.iter().map(String::as_str).eq(label.split('/')))
            .map(|c| self.values.column(c))
    }

    /// Copy of the frame without rows that are missing in every column.
    fn drop_empty_rows(self) -> Self {
        let keep: Vec<usize> = (0..self.values.rows())
            .filter(|&r| !self.values.row_is_empty(r))
            .collect();
        if keep.len() == self.values.rows() {
            return self;
        }
        debug!(
            "Level {}: dropping {} empty rows",
            self.name,
            self.values.rows() - keep.len()
        );
        Self {
            dates: keep.iter().map(|&r| self.dates[r]).collect(),
            values: self.values.select_rows(&keep),
            name: self.name,
            labels: self.labels,
        }
    }
}

/// Aggregation levels, deepest first, ending with the overall portfolio.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortfolioLevels {
    levels: Vec<LevelFrame>,
}

impl PortfolioLevels {
    pub fn get(&self, name: &str) -> Option<&LevelFrame> {
        self.levels.iter().find(|l| l.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.levels.iter().map(|l| l.name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LevelFrame> {
        self.levels.iter()
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// The single-column overall portfolio.
    pub fn portfolio(&self) -> Option<&LevelFrame> {
        self.get(PORTFOLIO_LEVEL)
    }
}

/// Grouped-mean collapse through the label hierarchy.
#[derive(Debug, Clone, Copy, Default)]
pub struct PortfolioAggregator;

impl PortfolioAggregator {
    pub fn new() -> Self {
        Self
    }

    /// Build every level from the strategy matrix.
    ///
    /// `progress` is called with a 0-100 percent and the level name after each level.
    pub fn aggregate<F>(
        &self,
        returns: &Matrix,
        dates: &[NaiveDate],
        index: &StrategyIndex,
        progress: F,
    ) -> Result<PortfolioLevels>
    where
        F: Fn(u8, &str),
    {
        if index.len() != returns.cols() {
            return Err(BacktestError::ShapeMismatch(format!(
                "{} labels for {} strategy columns",
                index.len(),
                returns.cols()
            )));
        }
        if returns.cols() == 0 {
            return Err(BacktestError::InvalidInput(
                "no strategy columns to aggregate".to_string(),
            ));
        }

        let labels = index
            .labels()
            .iter()
            .map(|l| l.prefix(LABEL_FIELDS.len()))
            .collect();
        let mut current = LevelFrame::new("strategies", dates.to_vec(), labels, returns.clone())?;
        let steps = LABEL_FIELDS.len() + 1;
        let mut levels = Vec::with_capacity(steps);

        for depth in (1..=LABEL_FIELDS.len()).rev() {
            let name = LABEL_FIELDS[depth - 1];
            current = self.collapse(&current, depth, name)?;
            info!(
                "Level {}: {} columns x {} rows",
                name,
                current.cols(),
                current.rows()
            );
            levels.push(current.clone());
            progress(percent(levels.len(), steps), name);
        }

        let portfolio = self.row_mean(&current)?;
        info!("Portfolio: {} rows", portfolio.rows());
        levels.push(portfolio);
        progress(100, PORTFOLIO_LEVEL);

        Ok(PortfolioLevels { levels })
    }

    /// Group `frame` by its first `depth` label fields and average each group.
    pub fn collapse(&self, frame: &LevelFrame, depth: usize, name: &str) -> Result<LevelFrame> {
        let mut keys: Vec<Vec<String>> = Vec::new();
        let mut members: Vec<Vec<usize>> = Vec::new();
        let mut positions: HashMap<Vec<String>, usize> = HashMap::new();
        for (col, label) in frame.labels.iter().enumerate() {
            let key: Vec<String> = label.iter().take(depth).cloned().collect();
            let group = *positions.entry(key.clone()).or_insert_with(|| {
                keys.push(key);
                members.push(Vec::new());
                keys.len() - 1
            });
            members[group].push(col);
        }
        debug!(
            "Level {}: {} columns into {} groups",
            name,
            frame.cols(),
            keys.len()
        );

        let values = &frame.values;
        let columns: Vec<Vec<f64>> = members
            .par_iter()
            .map(|cols| group_mean(values, cols))
            .collect();
        let grouped = LevelFrame::new(
            name,
            frame.dates.clone(),
            keys,
            Matrix::from_f64_columns(columns)?,
        )?;
        Ok(grouped.drop_empty_rows())
    }

    /// Row mean across all columns of `frame`, as the portfolio frame.
    pub fn row_mean(&self, frame: &LevelFrame) -> Result<LevelFrame> {
        let all: Vec<usize> = (0..frame.cols()).collect();
        let column = group_mean(&frame.values, &all);
        let portfolio = LevelFrame::new(
            PORTFOLIO_LEVEL,
            frame.dates.clone(),
            vec![vec![PORTFOLIO_LEVEL.to_string()]],
            Matrix::from_f64_columns(vec![column])?,
        )?;
        Ok(portfolio.drop_empty_rows())
    }
}

fn group_mean(values: &Matrix, cols: &[usize]) -> Vec<f64> {
    (0..values.rows())
        .map(|r| nan_mean(cols.iter().map(|&c| values.get(r, c) as f64)))
        .collect()
}

fn percent(done: usize, total: usize) -> u8 {
    (done * 100 / total.max(1)) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clusters::StrategyLabel;

    fn dates(n: usize) -> Vec<NaiveDate> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        (0..n).map(|i| start + chrono::Duration::days(i as i64)).collect()
    }

    fn label(fields: [&str; 7]) -> StrategyLabel {
        StrategyLabel {
            asset_cluster: fields[0].into(),
            asset_subcluster: fields[1].into(),
            asset: fields[2].into(),
            indicator_cluster: fields[3].into(),
            indicator_subcluster: fields[4].into(),
            indicator: fields[5].into(),
            params: fields[6].into(),
        }
    }

    fn index() -> StrategyIndex {
        StrategyIndex::from_labels(vec![
            label(["eq", "us", "SPY", "trend", "fast", "MAC", "2_8"]),
            label(["eq", "us", "SPY", "trend", "fast", "MAC", "4_16"]),
            label(["eq", "us", "QQQ", "trend", "fast", "MAC", "2_8"]),
            label(["rates", "long", "TLT", "trend", "fast", "MAC", "2_8"]),
        ])
    }

    #[test]
    fn test_levels_ordered_deepest_first() {
        let returns = Matrix::filled(3, 4, 1.0);
        let levels = PortfolioAggregator::new()
            .aggregate(&returns, &dates(3), &index(), |_, _| {})
            .unwrap();
        assert_eq!(
            levels.names(),
            vec![
                "params",
                "indicators",
                "indicators-subclusters",
                "indicators-clusters",
                "assets",
                "assets-subclusters",
                "assets-clusters",
                "portfolio"
            ]
        );
        assert_eq!(levels.get("params").unwrap().cols(), 4);
        assert_eq!(levels.get("indicators").unwrap().cols(), 3);
        assert_eq!(levels.get("assets").unwrap().cols(), 3);
        assert_eq!(levels.get("assets-clusters").unwrap().cols(), 2);
        assert_eq!(
            levels.get("assets-clusters").unwrap().column_names(),
            vec!["eq", "rates"]
        );
    }

    #[test]
    fn test_group_mean_skips_missing() {
        let returns = Matrix::from_rows(&[
            vec![1.0, 3.0, 5.0, 7.0],
            vec![f32::NAN, 3.0, 5.0, 7.0],
        ])
        .unwrap();
        let levels = PortfolioAggregator::new()
            .aggregate(&returns, &dates(2), &index(), |_, _| {})
            .unwrap();
        let indicators = levels.get("indicators").unwrap();
        let spy = indicators
            .column_by_label("eq/us/SPY/trend/fast/MAC")
            .unwrap();
        assert_eq!(spy, &[2.0, 3.0]);
    }

    #[test]
    fn test_fully_missing_rows_dropped() {
        let returns = Matrix::from_rows(&[
            vec![f32::NAN, f32::NAN, f32::NAN, f32::NAN],
            vec![1.0, f32::NAN, f32::NAN, f32::NAN],
            vec![1.0, 1.0, 1.0, 1.0],
        ])
        .unwrap();
        let levels = PortfolioAggregator::new()
            .aggregate(&returns, &dates(3), &index(), |_, _| {})
            .unwrap();
        let params = levels.get("params").unwrap();
        assert_eq!(params.rows(), 2);
        assert_eq!(params.dates()[0], dates(3)[1]);
        // partially missing row survives with NaN in the empty groups
        assert!(params.values().get(0, 2).is_nan());
        let portfolio = levels.portfolio().unwrap();
        assert_eq!(portfolio.rows(), 2);
        assert_eq!(portfolio.values().get(0, 0), 1.0);
    }

    #[test]
    fn test_portfolio_is_mean_of_asset_clusters() {
        let returns = Matrix::from_rows(&[vec![1.0, 3.0, 5.0, 10.0]]).unwrap();
        let levels = PortfolioAggregator::new()
            .aggregate(&returns, &dates(1), &index(), |_, _| {})
            .unwrap();
        let clusters = levels.get("assets-clusters").unwrap();
        // eq = mean(mean(1, 3), 5) = 3.5, rates = 10
        assert_eq!(clusters.values().row(0), vec![3.5, 10.0]);
        assert_eq!(levels.portfolio().unwrap().values().get(0, 0), 6.75);
    }

    #[test]
    fn test_single_column_is_identity() {
        let returns = Matrix::from_columns(vec![vec![0.5, -1.0, 2.0]]).unwrap();
        let index = StrategyIndex::from_labels(vec![label(["a", "b", "c", "d", "e", "f", "1"])]);
        let levels = PortfolioAggregator::new()
            .aggregate(&returns, &dates(3), &index, |_, _| {})
            .unwrap();
        for level in levels.iter() {
            assert_eq!(level.values().column(0), &[0.5, -1.0, 2.0]);
        }
    }

    #[test]
    fn test_progress_reaches_100() {
        let returns = Matrix::filled(2, 4, 1.0);
        let seen = std::sync::Mutex::new(Vec::new());
        PortfolioAggregator::new()
            .aggregate(&returns, &dates(2), &index(), |p, _| seen.lock().unwrap().push(p))
            .unwrap();
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 8);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.last(), Some(&100));
    }

    #[test]
    fn test_label_count_checked() {
        let returns = Matrix::filled(2, 3, 1.0);
        assert!(matches!(
            PortfolioAggregator::new().aggregate(&returns, &dates(2), &index(), |_, _| {}),
            Err(BacktestError::ShapeMismatch(_))
        ));
    }
}
