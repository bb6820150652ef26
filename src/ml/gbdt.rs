//! ヒストグラム型勾配ブースティング決定木（2値分類）
//!
//! # アルゴリズム
//! - 各特徴量を最大 `max_bins` 個の分位ビンに離散化（しきい値は学習データから決定）
//! - 損失: 2値ロジスティック損失。初期値は正例率の対数オッズ
//! - 反復ごとに勾配 g = p - y、ヘッセ h = p(1 - p) から1本の回帰木を成長させる
//! - 木は葉単位（最良ゲインの葉から順に）成長し、`max_leaf_nodes`・`max_depth`・
//!   `min_samples_leaf` で制限する
//! - 葉の値 = -learning_rate * G / (H + l2)
//!
//! 乱数はビンしきい値計算のサブサンプリングのみで、シードを固定すれば結果は完全に再現される。

use log::debug;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, TrainingStage};
use crate::ml::features::is_finite;
use crate::ml::preprocessing::{ArtifactKind, FittedArtifact, Predict};
use crate::model::config::ClassifierSettings;
use crate::types::{FeatureVector, NUM_FEATURES};

/// ビンしきい値の計算に使う最大サンプル数
const BINNING_SUBSAMPLE: usize = 200_000;

/// ビン番号は u8 に収める
const MIN_BINS: usize = 2;
const MAX_BINS: usize = 255;

/// 分割後の子ノードに必要な最小ヘッセ和
const MIN_HESSIAN_TO_SPLIT: f64 = 1e-3;

/// 決定木のノード
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TreeNode {
    /// `value <= threshold` なら left、それ以外は right
    Split {
        feature: usize,
        threshold: f32,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

/// 回帰木（nodes[0] が根）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<TreeNode>,
}

impl Tree {
    pub fn predict_one(&self, features: &FeatureVector) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                TreeNode::Leaf { value } => return *value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if features[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    pub fn num_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, TreeNode::Leaf { .. }))
            .count()
    }

    fn check(&self) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        for (i, node) in self.nodes.iter().enumerate() {
            match node {
                TreeNode::Leaf { value } => {
                    if !value.is_finite() {
                        return Err(format!("leaf {} has a non-finite value", i));
                    }
                }
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    if *feature >= NUM_FEATURES {
                        return Err(format!("node {} splits on unknown feature {}", i, feature));
                    }
                    if !threshold.is_finite() {
                        return Err(format!("node {} has a non-finite threshold", i));
                    }
                    // 子ノードは常に親より後ろにある（循環しない）
                    if *left <= i || *right <= i || *left >= self.nodes.len() || *right >= self.nodes.len() {
                        return Err(format!("node {} has invalid child indices", i));
                    }
                }
            }
        }
        Ok(())
    }
}

/// 特徴量ごとのビン境界
struct BinMapper {
    thresholds: Vec<Vec<f32>>,
}

impl BinMapper {
    fn fit(features: &[FeatureVector], max_bins: usize, seed: u64) -> Self {
        let indices: Vec<usize> = if features.len() > BINNING_SUBSAMPLE {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut idx = rand::seq::index::sample(&mut rng, features.len(), BINNING_SUBSAMPLE).into_vec();
            idx.sort_unstable();
            idx
        } else {
            (0..features.len()).collect()
        };

        let thresholds = (0..NUM_FEATURES)
            .map(|f| {
                let mut values: Vec<f32> = indices.iter().map(|&i| features[i][f]).collect();
                values.sort_by(|a, b| a.total_cmp(b));
                feature_thresholds(&values, max_bins)
            })
            .collect();

        Self { thresholds }
    }

    fn bin(&self, feature: usize, value: f32) -> u8 {
        self.thresholds[feature].partition_point(|&t| t < value) as u8
    }

    fn num_bins(&self, feature: usize) -> usize {
        self.thresholds[feature].len() + 1
    }

    /// 列優先のビン番号
    fn transform(&self, features: &[FeatureVector]) -> Vec<Vec<u8>> {
        (0..NUM_FEATURES)
            .map(|f| features.iter().map(|row| self.bin(f, row[f])).collect())
            .collect()
    }
}

/// ソート済みの値からしきい値を求める
fn feature_thresholds(sorted: &[f32], max_bins: usize) -> Vec<f32> {
    let mut distinct: Vec<f32> = sorted.to_vec();
    distinct.dedup();

    if distinct.len() <= max_bins {
        return distinct
            .windows(2)
            .map(|w| w[0] + (w[1] - w[0]) * 0.5)
            .collect();
    }

    let n = sorted.len();
    let mut thresholds: Vec<f32> = (1..max_bins)
        .map(|k| {
            let pos = k as f64 * (n - 1) as f64 / max_bins as f64;
            let lo = pos.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            let frac = (pos - lo as f64) as f32;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        })
        .collect();
    thresholds.dedup();
    thresholds
}

#[derive(Debug, Clone, Copy)]
struct SplitInfo {
    feature: usize,
    bin: u8,
    gain: f64,
}

struct GrowingLeaf {
    node: usize,
    samples: Vec<u32>,
    depth: usize,
    split: Option<SplitInfo>,
}

struct TreeGrower<'a> {
    binned: &'a [Vec<u8>],
    mapper: &'a BinMapper,
    gradients: &'a [f64],
    hessians: &'a [f64],
    params: &'a ClassifierSettings,
}

impl<'a> TreeGrower<'a> {
    fn sums(&self, samples: &[u32]) -> (f64, f64) {
        samples.iter().fold((0.0, 0.0), |(g, h), &s| {
            (g + self.gradients[s as usize], h + self.hessians[s as usize])
        })
    }

    fn leaf_value(&self, samples: &[u32]) -> f64 {
        let (g, h) = self.sums(samples);
        let denom = h + self.params.l2_regularization;
        if denom <= 0.0 {
            return 0.0;
        }
        -self.params.learning_rate * g / denom
    }

    fn best_split(&self, samples: &[u32], depth: usize) -> Option<SplitInfo> {
        if depth >= self.params.max_depth || samples.len() < 2 * self.params.min_samples_leaf {
            return None;
        }
        let (g_total, h_total) = self.sums(samples);
        let lambda = self.params.l2_regularization;
        let parent_score = g_total * g_total / (h_total + lambda);
        let min_leaf = self.params.min_samples_leaf;

        let candidates: Vec<Option<SplitInfo>> = (0..NUM_FEATURES)
            .into_par_iter()
            .map(|f| {
                let n_bins = self.mapper.num_bins(f);
                if n_bins < 2 {
                    return None;
                }
                let mut hist_g = vec![0.0f64; n_bins];
                let mut hist_h = vec![0.0f64; n_bins];
                let mut hist_n = vec![0usize; n_bins];
                let column = &self.binned[f];
                for &s in samples {
                    let b = column[s as usize] as usize;
                    hist_g[b] += self.gradients[s as usize];
                    hist_h[b] += self.hessians[s as usize];
                    hist_n[b] += 1;
                }

                let mut best: Option<SplitInfo> = None;
                let (mut gl, mut hl, mut nl) = (0.0f64, 0.0f64, 0usize);
                for b in 0..n_bins - 1 {
                    gl += hist_g[b];
                    hl += hist_h[b];
                    nl += hist_n[b];
                    let nr = samples.len() - nl;
                    if nl < min_leaf {
                        continue;
                    }
                    if nr < min_leaf {
                        break;
                    }
                    let gr = g_total - gl;
                    let hr = h_total - hl;
                    if hl < MIN_HESSIAN_TO_SPLIT || hr < MIN_HESSIAN_TO_SPLIT {
                        continue;
                    }
                    let gain = gl * gl / (hl + lambda) + gr * gr / (hr + lambda) - parent_score;
                    if gain > 0.0 && best.map_or(true, |s| gain > s.gain) {
                        best = Some(SplitInfo {
                            feature: f,
                            bin: b as u8,
                            gain,
                        });
                    }
                }
                best
            })
            .collect();

        // 同点は特徴量番号の小さい方を採用
        candidates
            .into_iter()
            .flatten()
            .fold(None, |best: Option<SplitInfo>, c| match best {
                Some(b) if b.gain >= c.gain => Some(b),
                _ => Some(c),
            })
    }

    /// 木を成長させ、(木, 葉ごとのサンプル一覧と値) を返す
    fn grow(&self, n_samples: usize) -> (Tree, Vec<(Vec<u32>, f64)>) {
        let mut nodes = vec![TreeNode::Leaf { value: 0.0 }];
        let root_samples: Vec<u32> = (0..n_samples as u32).collect();
        let root_split = self.best_split(&root_samples, 0);
        let mut open = vec![GrowingLeaf {
            node: 0,
            samples: root_samples,
            depth: 0,
            split: root_split,
        }];
        let mut n_leaves = 1;

        while n_leaves < self.params.max_leaf_nodes {
            // 最大ゲインの葉を選ぶ（同点は先に作られた葉）
            let mut chosen: Option<(usize, SplitInfo)> = None;
            for (i, leaf) in open.iter().enumerate() {
                if let Some(split) = leaf.split {
                    if chosen.map_or(true, |(_, best)| split.gain > best.gain) {
                        chosen = Some((i, split));
                    }
                }
            }
            let Some((chosen, split)) = chosen else {
                break;
            };

            let leaf = open.remove(chosen);
            let column = &self.binned[split.feature];
            let (left_samples, right_samples): (Vec<u32>, Vec<u32>) = leaf
                .samples
                .iter()
                .partition(|&&s| column[s as usize] <= split.bin);

            let left = nodes.len();
            let right = left + 1;
            nodes.push(TreeNode::Leaf { value: 0.0 });
            nodes.push(TreeNode::Leaf { value: 0.0 });
            nodes[leaf.node] = TreeNode::Split {
                feature: split.feature,
                threshold: self.mapper.thresholds[split.feature][split.bin as usize],
                left,
                right,
            };
            n_leaves += 1;

            let depth = leaf.depth + 1;
            for (node, samples) in [(left, left_samples), (right, right_samples)] {
                let split = self.best_split(&samples, depth);
                open.push(GrowingLeaf {
                    node,
                    samples,
                    depth,
                    split,
                });
            }
        }

        let mut assignments = Vec::with_capacity(open.len());
        for leaf in open {
            let value = self.leaf_value(&leaf.samples);
            nodes[leaf.node] = TreeNode::Leaf { value };
            assignments.push((leaf.samples, value));
        }

        (Tree { nodes }, assignments)
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// 学習済み勾配ブースティング分類器
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedTrees {
    pub params: ClassifierSettings,
    /// 初期スコア（対数オッズ）
    pub baseline: f64,
    pub trees: Vec<Tree>,
    pub n_features: usize,
}

impl GradientBoostedTrees {
    /// 学習
    ///
    /// `labels` はエンコード済みのクラスコード（0 / 1）。両クラスが含まれている必要がある。
    pub fn fit(
        params: &ClassifierSettings,
        features: &[FeatureVector],
        labels: &[u8],
        seed: u64,
    ) -> Result<Self, PipelineError> {
        let fail = |reason: String| PipelineError::stage(TrainingStage::Fitting, reason);

        if features.is_empty() {
            return Err(fail("cannot fit classifier on an empty partition".to_string()));
        }
        if features.len() != labels.len() {
            return Err(fail(format!(
                "feature rows ({}) and labels ({}) differ in length",
                features.len(),
                labels.len()
            )));
        }
        if labels.iter().any(|&y| y > 1) {
            return Err(fail("labels must be encoded as 0 or 1".to_string()));
        }
        if !(MIN_BINS..=MAX_BINS).contains(&params.max_bins) {
            return Err(fail(format!(
                "max_bins must be in {}..={}, got {}",
                MIN_BINS, MAX_BINS, params.max_bins
            )));
        }
        if !(params.learning_rate > 0.0 && params.learning_rate.is_finite()) {
            return Err(fail(format!("learning_rate must be positive, got {}", params.learning_rate)));
        }
        if !features.iter().all(is_finite) {
            return Err(fail("features contain non-finite values".to_string()));
        }
        let n = features.len();
        let positives = labels.iter().filter(|&&y| y == 1).count();
        if positives == 0 || positives == n {
            return Err(fail("both classes must be present in the training partition".to_string()));
        }

        let mapper = BinMapper::fit(features, params.max_bins, seed);
        let binned = mapper.transform(features);

        let prior = positives as f64 / n as f64;
        let baseline = (prior / (1.0 - prior)).ln();
        let targets: Vec<f64> = labels.iter().map(|&y| y as f64).collect();
        let mut raw = vec![baseline; n];
        let mut gradients = vec![0.0f64; n];
        let mut hessians = vec![0.0f64; n];
        let mut trees = Vec::with_capacity(params.max_iter);

        for iteration in 0..params.max_iter {
            for i in 0..n {
                let p = sigmoid(raw[i]);
                gradients[i] = p - targets[i];
                hessians[i] = p * (1.0 - p);
            }

            let grower = TreeGrower {
                binned: &binned,
                mapper: &mapper,
                gradients: &gradients,
                hessians: &hessians,
                params,
            };
            let (tree, assignments) = grower.grow(n);
            for (samples, value) in assignments {
                for s in samples {
                    raw[s as usize] += value;
                }
            }

            if log::log_enabled!(log::Level::Debug) {
                let loss = log_loss(&raw, &targets);
                debug!(
                    "反復 {}/{}: 葉数 {}, 学習損失 {:.6}",
                    iteration + 1,
                    params.max_iter,
                    tree.num_leaves(),
                    loss
                );
            }
            trees.push(tree);
        }

        let model = Self {
            params: params.clone(),
            baseline,
            trees,
            n_features: NUM_FEATURES,
        };
        model.check().map_err(fail)?;
        Ok(model)
    }

    /// 生スコア（対数オッズ）
    pub fn raw_score(&self, features: &FeatureVector) -> f64 {
        self.baseline + self.trees.iter().map(|t| t.predict_one(features)).sum::<f64>()
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }
}

fn log_loss(raw: &[f64], targets: &[f64]) -> f64 {
    let eps = 1e-15;
    let total: f64 = raw
        .iter()
        .zip(targets)
        .map(|(&r, &y)| {
            let p = sigmoid(r).clamp(eps, 1.0 - eps);
            -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
        })
        .sum();
    total / raw.len() as f64
}

impl Predict for GradientBoostedTrees {
    fn predict(&self, features: &[FeatureVector]) -> Vec<u8> {
        features
            .iter()
            .map(|f| u8::from(self.raw_score(f) > 0.0))
            .collect()
    }

    fn predict_proba(&self, features: &[FeatureVector]) -> Vec<f64> {
        features.iter().map(|f| sigmoid(self.raw_score(f))).collect()
    }
}

impl FittedArtifact for GradientBoostedTrees {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Classifier
    }

    fn check(&self) -> Result<(), String> {
        if self.n_features != NUM_FEATURES {
            return Err(format!(
                "classifier expects {} features, but {} are produced",
                self.n_features, NUM_FEATURES
            ));
        }
        if !(MIN_BINS..=MAX_BINS).contains(&self.params.max_bins) {
            return Err(format!("max_bins {} is outside {}..={}", self.params.max_bins, MIN_BINS, MAX_BINS));
        }
        if !self.baseline.is_finite() {
            return Err("classifier baseline is not finite".to_string());
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.check().map_err(|e| format!("tree {}: {}", i, e))?;
        }
        Ok(())
    }
}
