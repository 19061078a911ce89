//! Classification metrics.
//!
//! Computes confusion-matrix-derived metrics from predicted and ground-truth
//! class indices.

/// Multi-class metrics computed from a confusion matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationMetrics {
    pub accuracy: f64,
    /// Recall of each class; 0 for classes with no true samples.
    pub per_class_recall: Vec<f64>,
    /// `confusion[true][predicted]` counts.
    pub confusion: Vec<Vec<usize>>,
}

impl ClassificationMetrics {
    /// Compute metrics over `num_classes` classes.
    ///
    /// Pairs where either index is outside `0..num_classes` are ignored.
    pub fn compute(predictions: &[u32], labels: &[u32], num_classes: usize) -> Self {
        let mut confusion = vec![vec![0usize; num_classes]; num_classes];
        for (&pred, &label) in predictions.iter().zip(labels.iter()) {
            let (pred, label) = (pred as usize, label as usize);
            if pred < num_classes && label < num_classes {
                confusion[label][pred] += 1;
            }
        }

        let total: usize = confusion.iter().flatten().sum();
        let correct: usize = (0..num_classes).map(|c| confusion[c][c]).sum();
        let accuracy = if total > 0 {
            correct as f64 / total as f64
        } else {
            0.0
        };

        let per_class_recall = confusion
            .iter()
            .enumerate()
            .map(|(c, row)| {
                let support: usize = row.iter().sum();
                if support > 0 {
                    row[c] as f64 / support as f64
                } else {
                    0.0
                }
            })
            .collect();

        Self {
            accuracy,
            per_class_recall,
            confusion,
        }
    }
}

impl std::fmt::Display for ClassificationMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "acc={:.4} recall=[", self.accuracy)?;
        for (i, r) in self.per_class_recall.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{r:.4}")?;
        }
        f.write_str("]")
    }
}

/// Fraction of single-logit predictions (`logit > 0` means class 1) that
/// match binary labels.
pub fn binary_accuracy(logits: &[f32], labels: &[u32]) -> f64 {
    let total = logits.len().min(labels.len());
    if total == 0 {
        return 0.0;
    }
    let correct = logits
        .iter()
        .zip(labels.iter())
        .filter(|(&logit, &label)| u32::from(logit > 0.0) == label)
        .count();
    correct as f64 / total as f64
}
