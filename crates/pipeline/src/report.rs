//! Validation metrics and the run report

use std::fmt;
use std::io::Write;

use serde::Serialize;
use wle_gbdt::{BoostParams, ProbabilityMatrix};

use crate::encoding::ClassSet;
use crate::errors::{PipelineError, Result};
use crate::features::ExcludedColumn;
use crate::scoring::Score;
use crate::tuner::{GridPoint, TuningReport};

/// Two-sided 95% normal quantile
const Z_95: f64 = 1.959_963_984_540_054;

/// Confusion matrix for a `K`-class classifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    pub n_classes: usize,
    /// Row-major `KxK` counts (`truth * K + predicted`)
    pub counts: Vec<u64>,
}

impl ConfusionMatrix {
    pub fn new(n_classes: usize) -> Self {
        Self {
            n_classes,
            counts: vec![0; n_classes * n_classes],
        }
    }

    pub fn from_predictions(
        truth: &[usize],
        predicted: &[usize],
        n_classes: usize,
    ) -> Result<Self> {
        if truth.len() != predicted.len() {
            return Err(PipelineError::Scoring(format!(
                "{} labels for {} predictions",
                truth.len(),
                predicted.len()
            )));
        }
        let mut cm = Self::new(n_classes);
        for (row, (&t, &p)) in truth.iter().zip(predicted).enumerate() {
            if t >= n_classes || p >= n_classes {
                return Err(PipelineError::Scoring(format!(
                    "row {row}: class index outside {n_classes} classes"
                )));
            }
            cm.counts[t * n_classes + p] += 1;
        }
        Ok(cm)
    }

    pub fn get(&self, truth: usize, predicted: usize) -> u64 {
        self.counts[truth * self.n_classes + predicted]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn correct(&self) -> u64 {
        (0..self.n_classes).map(|c| self.get(c, c)).sum()
    }

    /// Number of rows whose true class is `class`
    pub fn row_total(&self, class: usize) -> u64 {
        (0..self.n_classes).map(|p| self.get(class, p)).sum()
    }

    /// Number of rows predicted as `class`
    pub fn column_total(&self, class: usize) -> u64 {
        (0..self.n_classes).map(|t| self.get(t, class)).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverallStats {
    pub accuracy: f64,
    /// 95% Wilson score interval
    pub accuracy_ci: (f64, f64),
    /// Prevalence of the most frequent true class
    pub no_information_rate: f64,
    /// Cohen's kappa; undefined when chance agreement is 1
    pub kappa: Option<f64>,
}

/// One-vs-rest statistics; ratios with a zero denominator are `None`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassStats {
    pub class: String,
    pub sensitivity: Option<f64>,
    pub specificity: Option<f64>,
    pub pos_pred_value: Option<f64>,
    pub neg_pred_value: Option<f64>,
    pub prevalence: f64,
    pub balanced_accuracy: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationMetrics {
    pub confusion: ConfusionMatrix,
    pub overall: OverallStats,
    pub per_class: Vec<ClassStats>,
}

impl ValidationMetrics {
    /// Metrics of arg-max predictions against the true validation labels
    pub fn compute(truth: &[usize], proba: &ProbabilityMatrix, classes: &ClassSet) -> Result<Self> {
        if truth.is_empty() {
            return Err(PipelineError::Scoring("validation set is empty".into()));
        }
        let predicted = proba.argmax();
        let confusion = ConfusionMatrix::from_predictions(truth, &predicted, classes.len())?;
        let n = confusion.total() as f64;
        let k = classes.len();

        let correct = confusion.correct();
        let accuracy = correct as f64 / n;
        let no_information_rate = (0..k)
            .map(|c| confusion.row_total(c) as f64 / n)
            .fold(0.0, f64::max);
        let expected = (0..k)
            .map(|c| confusion.row_total(c) as f64 * confusion.column_total(c) as f64)
            .sum::<f64>()
            / (n * n);
        let kappa = ratio(accuracy - expected, 1.0 - expected);

        let per_class = (0..k)
            .map(|c| {
                let tp = confusion.get(c, c) as f64;
                let actual = confusion.row_total(c) as f64;
                let predicted = confusion.column_total(c) as f64;
                let fn_ = actual - tp;
                let fp = predicted - tp;
                let tn = n - tp - fn_ - fp;

                let sensitivity = ratio(tp, tp + fn_);
                let specificity = ratio(tn, tn + fp);
                ClassStats {
                    class: classes.name(c).to_string(),
                    sensitivity,
                    specificity,
                    pos_pred_value: ratio(tp, tp + fp),
                    neg_pred_value: ratio(tn, tn + fn_),
                    prevalence: actual / n,
                    balanced_accuracy: sensitivity
                        .zip(specificity)
                        .map(|(se, sp)| (se + sp) / 2.0),
                }
            })
            .collect();

        Ok(Self {
            confusion,
            overall: OverallStats {
                accuracy,
                accuracy_ci: wilson_interval(correct, n as u64),
                no_information_rate,
                kappa,
            },
            per_class,
        })
    }
}

fn ratio(num: f64, den: f64) -> Option<f64> {
    (den != 0.0).then(|| num / den)
}

/// 95% Wilson score interval for `successes` out of `trials`
pub fn wilson_interval(successes: u64, trials: u64) -> (f64, f64) {
    if trials == 0 {
        return (0.0, 1.0);
    }
    let n = trials as f64;
    let p = successes as f64 / n;
    let z2 = Z_95 * Z_95;
    let denom = 1.0 + z2 / n;
    let center = (p + z2 / (2.0 * n)) / denom;
    let half = Z_95 / denom * (p * (1.0 - p) / n + z2 / (4.0 * n * n)).sqrt();
    ((center - half).max(0.0), (center + half).min(1.0))
}

/// Class probabilities for one evaluation row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationPrediction {
    pub id: String,
    pub predicted: String,
    pub probabilities: Vec<f64>,
}

pub fn evaluation_predictions(
    ids: &[String],
    proba: &ProbabilityMatrix,
    classes: &ClassSet,
) -> Result<Vec<EvaluationPrediction>> {
    if ids.len() != proba.n_rows() {
        return Err(PipelineError::Scoring(format!(
            "{} identifiers for {} prediction rows",
            ids.len(),
            proba.n_rows()
        )));
    }
    Ok(ids
        .iter()
        .zip(proba.argmax())
        .zip(proba.rows())
        .map(|((id, best), row)| EvaluationPrediction {
            id: id.clone(),
            predicted: classes.name(best).to_string(),
            probabilities: row.to_vec(),
        })
        .collect())
}

/// Everything a pipeline run produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub classes: Vec<String>,
    pub training_rows: usize,
    pub validation_rows: usize,
    pub predictors: Vec<String>,
    pub excluded: Vec<ExcludedColumn>,
    pub tuning: TuningReport,
    pub selected: GridPoint,
    pub selected_score: Score,
    pub final_params: BoostParams,
    pub model_fingerprint: Option<String>,
    pub validation_score: Score,
    pub validation: ValidationMetrics,
    pub predictions: Vec<EvaluationPrediction>,
}

impl Report {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// `id,predicted,<class>...` with one row per evaluation row
    pub fn write_predictions<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        let mut header = vec!["id".to_string(), "predicted".to_string()];
        header.extend(self.classes.iter().cloned());
        csv_writer.write_record(&header)?;
        for prediction in &self.predictions {
            let mut record = vec![prediction.id.clone(), prediction.predicted.clone()];
            record.extend(prediction.probabilities.iter().map(|p| format!("{p:.6}")));
            csv_writer.write_record(&record)?;
        }
        csv_writer.flush()?;
        Ok(())
    }
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map_or_else(|| "NA".to_string(), |v| format!("{v:.4}"))
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Rows: {} training, {} validation",
            self.training_rows, self.validation_rows
        )?;
        writeln!(
            f,
            "Predictors: {} kept, {} excluded",
            self.predictors.len(),
            self.excluded.len()
        )?;
        writeln!(f)?;
        writeln!(f, "Cross-validation ({} folds)", self.tuning.folds)?;
        writeln!(f, "{}", self.tuning)?;
        writeln!(f, "Selected: {} with mean {}", self.selected, self.selected_score)?;
        writeln!(f)?;
        writeln!(
            f,
            "Final model: {} rounds, learning rate {}",
            self.final_params.rounds, self.final_params.learning_rate
        )?;
        if let Some(fp) = &self.model_fingerprint {
            writeln!(f, "Fingerprint: {fp}")?;
        }
        writeln!(f, "Validation cross-entropy: {}", self.validation_score)?;
        writeln!(f)?;

        let cm = &self.validation.confusion;
        writeln!(f, "Confusion matrix (rows = reference, columns = prediction)")?;
        write!(f, "{:>10}", "")?;
        for class in &self.classes {
            write!(f, "{class:>8}")?;
        }
        writeln!(f)?;
        for (t, class) in self.classes.iter().enumerate() {
            write!(f, "{class:>10}")?;
            for p in 0..cm.n_classes {
                write!(f, "{:>8}", cm.get(t, p))?;
            }
            writeln!(f)?;
        }
        writeln!(f)?;

        let overall = &self.validation.overall;
        writeln!(f, "Accuracy: {:.4}", overall.accuracy)?;
        writeln!(
            f,
            "95% CI: ({:.4}, {:.4})",
            overall.accuracy_ci.0, overall.accuracy_ci.1
        )?;
        writeln!(f, "No information rate: {:.4}", overall.no_information_rate)?;
        writeln!(f, "Kappa: {}", fmt_opt(overall.kappa))?;
        writeln!(f)?;

        writeln!(
            f,
            "{:>6} {:>11} {:>11} {:>8} {:>8} {:>10} {:>9}",
            "class", "sensitivity", "specificity", "ppv", "npv", "prevalence", "balanced"
        )?;
        for stats in &self.validation.per_class {
            writeln!(
                f,
                "{:>6} {:>11} {:>11} {:>8} {:>8} {:>10.4} {:>9}",
                stats.class,
                fmt_opt(stats.sensitivity),
                fmt_opt(stats.specificity),
                fmt_opt(stats.pos_pred_value),
                fmt_opt(stats.neg_pred_value),
                stats.prevalence,
                fmt_opt(stats.balanced_accuracy)
            )?;
        }
        writeln!(f)?;

        writeln!(f, "Evaluation predictions")?;
        for prediction in &self.predictions {
            writeln!(f, "{:>6} {}", prediction.id, prediction.predicted)?;
        }
        Ok(())
    }
}
