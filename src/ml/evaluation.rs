//! テストデータでの評価レポート（適合率・再現率・F1・正解率）
//!
//! レポートは表示・ログ出力専用で、バンドルには保存しない。

use crate::types::PixelClass;

/// クラス単位の指標
#[derive(Debug, Clone, PartialEq)]
pub struct ClassMetrics {
    pub class: PixelClass,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// 評価レポート
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationReport {
    /// エンコーダのクラス順
    pub per_class: Vec<ClassMetrics>,
    pub accuracy: f64,
    pub macro_f1: f64,
    pub weighted_f1: f64,
    pub total: usize,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

impl EvaluationReport {
    /// 正解コードと予測コードからレポートを作成
    ///
    /// `classes[i]` がコード i のクラス。分母が0の指標は0.0とする。
    pub fn from_predictions(classes: &[PixelClass], truth: &[u8], predicted: &[u8]) -> Self {
        let total = truth.len().min(predicted.len());
        let pairs = || truth.iter().zip(predicted.iter());

        let per_class: Vec<ClassMetrics> = classes
            .iter()
            .enumerate()
            .map(|(code, &class)| {
                let code = code as u8;
                let tp = pairs().filter(|&(&t, &p)| t == code && p == code).count();
                let predicted_pos = pairs().filter(|&(_, &p)| p == code).count();
                let support = pairs().filter(|&(&t, _)| t == code).count();
                let precision = ratio(tp, predicted_pos);
                let recall = ratio(tp, support);
                let f1 = if precision + recall > 0.0 {
                    2.0 * precision * recall / (precision + recall)
                } else {
                    0.0
                };
                ClassMetrics {
                    class,
                    precision,
                    recall,
                    f1,
                    support,
                }
            })
            .collect();

        let correct = pairs().filter(|(t, p)| t == p).count();
        let accuracy = ratio(correct, total);
        let macro_f1 = if per_class.is_empty() {
            0.0
        } else {
            per_class.iter().map(|m| m.f1).sum::<f64>() / per_class.len() as f64
        };
        let weighted_f1 = if total == 0 {
            0.0
        } else {
            per_class
                .iter()
                .map(|m| m.f1 * m.support as f64)
                .sum::<f64>()
                / total as f64
        };

        Self {
            per_class,
            accuracy,
            macro_f1,
            weighted_f1,
            total,
        }
    }
}

impl std::fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{:>12} {:>10} {:>10} {:>10} {:>10}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        for m in &self.per_class {
            writeln!(
                f,
                "{:>12} {:>10.4} {:>10.4} {:>10.4} {:>10}",
                m.class.as_str(),
                m.precision,
                m.recall,
                m.f1,
                m.support
            )?;
        }
        writeln!(f)?;
        writeln!(f, "{:>12} {:>32.4} {:>10}", "accuracy", self.accuracy, self.total)?;
        writeln!(f, "{:>12} {:>32.4} {:>10}", "macro f1", self.macro_f1, self.total)?;
        write!(f, "{:>12} {:>32.4} {:>10}", "weighted f1", self.weighted_f1, self.total)
    }
}
