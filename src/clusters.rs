//! Cluster trees and the hierarchical labels of strategy columns.
//!
//! A [`ClusterTree`] maps `cluster -> subcluster -> [leaf]` for assets or indicators.
//! Leaves missing from the tree are placed in the reserved `default/default` bucket the
//! first time they are looked up, and stay there on later calls.
//!
//! [`StrategyIndex`] combines the asset path and the indicator path of every executor
//! column into a seven-field [`StrategyLabel`]: asset fields first, then indicator
//! fields, then the parameter label.
//!
//! [`derive_clusters`] builds asset groups without configuration, by Ward clustering on
//! the correlation distance `sqrt(2 * (1 - corr))`.

use crate::error::{BacktestError, Result};
use crate::executor::StrategyColumn;
use crate::types::Matrix;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, warn};

/// Name of the fallback cluster and subcluster.
pub const DEFAULT_CLUSTER: &str = "default";

/// Names of the label fields, shallowest first.
pub const LABEL_FIELDS: [&str; 7] = [
    "assets-clusters",
    "assets-subclusters",
    "assets",
    "indicators-clusters",
    "indicators-subclusters",
    "indicators",
    "params",
];

/// Position of one leaf in a cluster tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterPath {
    pub cluster: String,
    pub subcluster: String,
    pub leaf: String,
}

impl fmt::Display for ClusterPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.cluster, self.subcluster, self.leaf)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Members {
    #[serde(default)]
    members: Vec<String>,
}

type ClusterTable = BTreeMap<String, BTreeMap<String, Members>>;

/// Two-level grouping of leaf names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "ClusterTable", into = "ClusterTable")]
pub struct ClusterTree {
    tree: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    lookup: HashMap<String, (String, String)>,
}

impl From<ClusterTable> for ClusterTree {
    fn from(table: ClusterTable) -> Self {
        let tree = table
            .into_iter()
            .map(|(cluster, subs)| {
                let subs = subs.into_iter().map(|(sub, m)| (sub, m.members)).collect();
                (cluster, subs)
            })
            .collect();
        let mut out = Self {
            tree,
            lookup: HashMap::new(),
        };
        out.rebuild_lookup();
        out
    }
}

impl From<ClusterTree> for ClusterTable {
    fn from(tree: ClusterTree) -> Self {
        tree.tree
            .into_iter()
            .map(|(cluster, subs)| {
                let subs = subs
                    .into_iter()
                    .map(|(sub, members)| (sub, Members { members }))
                    .collect();
                (cluster, subs)
            })
            .collect()
    }
}

impl PartialEq for ClusterTree {
    fn eq(&self, other: &Self) -> bool {
        self.tree == other.tree
    }
}

impl ClusterTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Asset tree from [`derive_clusters`] output: group `n` becomes `cluster_n/cluster_n`.
    pub fn from_groups(groups: &BTreeMap<usize, Vec<String>>) -> Self {
        let mut tree = Self::new();
        for (id, members) in groups {
            let name = format!("cluster_{}", id);
            tree.tree
                .entry(name.clone())
                .or_default()
                .insert(name, members.clone());
        }
        tree.rebuild_lookup();
        tree
    }

    /// Add `leaf` under `cluster/subcluster`. A leaf may only appear once in the tree.
    pub fn insert(
        &mut self,
        cluster: impl Into<String>,
        subcluster: impl Into<String>,
        leaf: impl Into<String>,
    ) -> Result<()> {
        let (cluster, subcluster, leaf) = (cluster.into(), subcluster.into(), leaf.into());
        if let Some((c, s)) = self.lookup.get(&leaf) {
            return Err(BacktestError::ConfigError(format!(
                "'{}' is already in cluster {}/{}",
                leaf, c, s
            )));
        }
        self.tree
            .entry(cluster)
            .or_default()
            .entry(subcluster)
            .or_default()
            .push(leaf);
        self.rebuild_lookup();
        Ok(())
    }

    /// Check that no leaf is listed twice.
    pub fn validate(&self) -> Result<()> {
        let mut seen: HashMap<&str, (&str, &str)> = HashMap::new();
        for (cluster, subs) in &self.tree {
            for (sub, members) in subs {
                for leaf in members {
                    if let Some((c, s)) = seen.insert(leaf.as_str(), (cluster.as_str(), sub.as_str())) {
                        return Err(BacktestError::ConfigError(format!(
                            "'{}' appears in both {}/{} and {}/{}",
                            leaf, c, s, cluster, sub
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Cluster and subcluster of a leaf, if configured.
    pub fn lookup(&self, leaf: &str) -> Option<(&str, &str)> {
        self.lookup
            .get(leaf)
            .map(|(c, s)| (c.as_str(), s.as_str()))
    }

    pub fn contains(&self, leaf: &str) -> bool {
        self.lookup.contains_key(leaf)
    }

    /// Cluster names in order.
    pub fn clusters(&self) -> Vec<&str> {
        self.tree.keys().map(String::as_str).collect()
    }

    /// Members of one subcluster.
    pub fn members(&self, cluster: &str, subcluster: &str) -> &[String] {
        self.tree
            .get(cluster)
            .and_then(|subs| subs.get(subcluster))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of leaves.
    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    /// Full path of `leaf`, assigning it to `default/default` if it is not in the tree.
    pub fn path(&mut self, leaf: &str) -> ClusterPath {
        if let Some((cluster, subcluster)) = self.lookup(leaf) {
            return ClusterPath {
                cluster: cluster.to_string(),
                subcluster: subcluster.to_string(),
                leaf: leaf.to_string(),
            };
        }
        warn!(
            "'{}' is not in any cluster, assigning {}/{}",
            leaf, DEFAULT_CLUSTER, DEFAULT_CLUSTER
        );
        self.tree
            .entry(DEFAULT_CLUSTER.to_string())
            .or_default()
            .entry(DEFAULT_CLUSTER.to_string())
            .or_default()
            .push(leaf.to_string());
        self.rebuild_lookup();
        ClusterPath {
            cluster: DEFAULT_CLUSTER.to_string(),
            subcluster: DEFAULT_CLUSTER.to_string(),
            leaf: leaf.to_string(),
        }
    }

    /// Paths of `entities`, in the given order.
    pub fn get_clusters_tuples(&mut self, entities: &[String]) -> Vec<ClusterPath> {
        entities.iter().map(|e| self.path(e)).collect()
    }

    fn rebuild_lookup(&mut self) {
        self.lookup.clear();
        for (cluster, subs) in &self.tree {
            for (sub, members) in subs {
                for leaf in members {
                    self.lookup
                        .entry(leaf.clone())
                        .or_insert_with(|| (cluster.clone(), sub.clone()));
                }
            }
        }
    }
}

/// Hierarchical label of one strategy column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StrategyLabel {
    pub asset_cluster: String,
    pub asset_subcluster: String,
    pub asset: String,
    pub indicator_cluster: String,
    pub indicator_subcluster: String,
    pub indicator: String,
    pub params: String,
}

impl StrategyLabel {
    pub fn new(asset: &ClusterPath, indicator: &ClusterPath, params: impl Into<String>) -> Self {
        Self {
            asset_cluster: asset.cluster.clone(),
            asset_subcluster: asset.subcluster.clone(),
            asset: asset.leaf.clone(),
            indicator_cluster: indicator.cluster.clone(),
            indicator_subcluster: indicator.subcluster.clone(),
            indicator: indicator.leaf.clone(),
            params: params.into(),
        }
    }

    /// Fields in [`LABEL_FIELDS`] order.
    pub fn fields(&self) -> [&str; 7] {
        [
            self.asset_cluster.as_str(),
            self.asset_subcluster.as_str(),
            self.asset.as_str(),
            self.indicator_cluster.as_str(),
            self.indicator_subcluster.as_str(),
            self.indicator.as_str(),
            self.params.as_str(),
        ]
    }

    /// The first `depth` fields.
    pub fn prefix(&self, depth: usize) -> Vec<String> {
        self.fields()
            .iter()
            .take(depth)
            .map(|f| f.to_string())
            .collect()
    }
}

impl fmt::Display for StrategyLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fields().join("/"))
    }
}

/// Labels of all strategy columns, in column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrategyIndex {
    labels: Vec<StrategyLabel>,
}

impl StrategyIndex {
    /// Label every executor column through the asset and indicator trees.
    ///
    /// Entities missing from a tree are added to its `default/default` bucket.
    pub fn build(
        columns: &[StrategyColumn],
        asset_tree: &mut ClusterTree,
        indicator_tree: &mut ClusterTree,
    ) -> Self {
        let mut asset_paths: HashMap<String, ClusterPath> = HashMap::new();
        let mut indicator_paths: HashMap<String, ClusterPath> = HashMap::new();
        let labels = columns
            .iter()
            .map(|column| {
                let asset = asset_paths
                    .entry(column.asset.clone())
                    .or_insert_with(|| asset_tree.path(&column.asset));
                let indicator = indicator_paths
                    .entry(column.indicator.clone())
                    .or_insert_with(|| indicator_tree.path(&column.indicator));
                StrategyLabel::new(asset, indicator, column.params.label())
            })
            .collect();
        Self { labels }
    }

    pub fn from_labels(labels: Vec<StrategyLabel>) -> Self {
        Self { labels }
    }

    pub fn labels(&self) -> &[StrategyLabel] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Column of the label whose display form is `label`.
    pub fn position(&self, label: &str) -> Option<usize> {
        self.labels
            .iter()
            .position(|l| l.fields().iter().copied().eq(label.split('/')))
    }
}

/// Pearson correlation over rows where both series are present; `NaN` if undefined.
fn pairwise_correlation(x: &[f64], y: &[f64]) -> f64 {
    let pairs: Vec<(f64, f64)> = x
        .iter()
        .zip(y)
        .filter(|(a, b)| !a.is_nan() && !b.is_nan())
        .map(|(&a, &b)| (a, b))
        .collect();
    if pairs.len() < 2 {
        return f64::NAN;
    }
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (a, b) in &pairs {
        cov += (a - mean_x) * (b - mean_y);
        var_x += (a - mean_x).powi(2);
        var_y += (b - mean_y).powi(2);
    }
    if var_x > 1e-20 && var_y > 1e-20 {
        (cov / (var_x * var_y).sqrt()).clamp(-1.0, 1.0)
    } else {
        f64::NAN
    }
}

/// Correlation matrix of the columns of `returns`. Undefined pairs count as uncorrelated.
pub fn correlation_matrix(returns: &Matrix) -> Vec<Vec<f64>> {
    let n = returns.cols();
    let columns: Vec<Vec<f64>> = (0..n).map(|c| returns.column_f64(c)).collect();
    let mut corr = vec![vec![0.0; n]; n];
    for i in 0..n {
        corr[i][i] = 1.0;
        for j in (i + 1)..n {
            let c = pairwise_correlation(&columns[i], &columns[j]);
            let c = if c.is_nan() { 0.0 } else { c };
            corr[i][j] = c;
            corr[j][i] = c;
        }
    }
    corr
}

/// Upper triangle of `sqrt(2 * (1 - corr))`, row by row.
pub fn condensed_distances(corr: &[Vec<f64>]) -> Vec<f64> {
    let n = corr.len();
    let mut out = Vec::with_capacity(n * n.saturating_sub(1) / 2);
    for i in 0..n {
        for j in (i + 1)..n {
            out.push((2.0 * (1.0 - corr[i][j])).max(0.0).sqrt());
        }
    }
    out
}

fn condensed_index(n: usize, i: usize, j: usize) -> usize {
    let (i, j) = if i < j { (i, j) } else { (j, i) };
    n * i - i * (i + 1) / 2 + (j - i - 1)
}

/// Ward agglomeration of `n` points until `target` clusters remain.
///
/// Returns a cluster slot per point. Distances are updated with the Lance-Williams
/// formula; ties go to the lowest pair of slots.
fn ward_assignments(n: usize, condensed: &[f64], target: usize) -> Vec<usize> {
    let mut dist = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = condensed[condensed_index(n, i, j)];
            dist[i][j] = d;
            dist[j][i] = d;
        }
    }

    let mut size = vec![1usize; n];
    let mut active = vec![true; n];
    let mut slot: Vec<usize> = (0..n).collect();
    let mut remaining = n;

    while remaining > target {
        let mut best = (f64::INFINITY, 0, 0);
        for i in (0..n).filter(|&i| active[i]) {
            for j in ((i + 1)..n).filter(|&j| active[j]) {
                if dist[i][j] < best.0 {
                    best = (dist[i][j], i, j);
                }
            }
        }
        let (d_ij, i, j) = best;
        debug!("Ward merge {} + {} at distance {:.4}", i, j, d_ij);

        let (n_i, n_j) = (size[i] as f64, size[j] as f64);
        for k in (0..n).filter(|&k| active[k] && k != i && k != j) {
            let n_k = size[k] as f64;
            let total = n_i + n_j + n_k;
            let d2 = ((n_i + n_k) * dist[i][k].powi(2) + (n_j + n_k) * dist[j][k].powi(2)
                - n_k * d_ij.powi(2))
                / total;
            let d = d2.max(0.0).sqrt();
            dist[i][k] = d;
            dist[k][i] = d;
        }
        size[i] += size[j];
        active[j] = false;
        for s in slot.iter_mut() {
            if *s == j {
                *s = i;
            }
        }
        remaining -= 1;
    }
    slot
}

/// Group assets into at most `max_clusters` clusters by return correlation.
///
/// Cluster ids start at 1 and are numbered in order of each cluster's first asset.
pub fn derive_clusters(
    returns: &Matrix,
    asset_names: &[String],
    max_clusters: usize,
) -> Result<BTreeMap<usize, Vec<String>>> {
    if asset_names.len() != returns.cols() {
        return Err(BacktestError::ShapeMismatch(format!(
            "{} asset names for {} return columns",
            asset_names.len(),
            returns.cols()
        )));
    }
    if max_clusters == 0 {
        return Err(BacktestError::InvalidInput(
            "max_clusters must be at least 1".to_string(),
        ));
    }
    let n = asset_names.len();
    if n == 0 {
        return Ok(BTreeMap::new());
    }

    let corr = correlation_matrix(returns);
    let condensed = condensed_distances(&corr);
    let slots = ward_assignments(n, &condensed, max_clusters.min(n));

    let mut ids: HashMap<usize, usize> = HashMap::new();
    let mut groups: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    for (asset, slot) in asset_names.iter().zip(slots) {
        let next = ids.len() + 1;
        let id = *ids.entry(slot).or_insert(next);
        groups.entry(id).or_default().push(asset.clone());
    }
    debug!("Derived {} asset clusters from {} assets", groups.len(), n);
    Ok(groups)
}
