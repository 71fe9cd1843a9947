//! End-to-end tests for the report pipeline

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use wle_gbdt::{BoostParams, Booster, FeatureMatrix, GbdtTrainer, ProbabilityMatrix};
use wle_pipeline::{
    stratified_folds, ExclusionReason, Pipeline, PipelineConfig, Score, Table, Value,
};

const PREDICTORS: usize = 10;
const CLASSES: [&str; 5] = ["A", "B", "C", "D", "E"];

/// Predicts the smoothed class frequencies of its training rows
#[derive(Default, Clone)]
struct PriorBooster {
    trained: Arc<AtomicUsize>,
}

impl Booster for PriorBooster {
    type Model = Vec<f64>;

    fn train(
        &self,
        _features: &FeatureMatrix,
        labels: &[usize],
        params: &BoostParams,
    ) -> wle_gbdt::Result<Vec<f64>> {
        self.trained.fetch_add(1, Ordering::SeqCst);
        let mut counts = vec![1.0; params.num_class];
        for &label in labels {
            counts[label] += 1.0;
        }
        let total: f64 = counts.iter().sum();
        Ok(counts.into_iter().map(|c| c / total).collect())
    }

    fn predict(
        &self,
        model: &Vec<f64>,
        features: &FeatureMatrix,
    ) -> wle_gbdt::Result<ProbabilityMatrix> {
        let rows = (0..features.n_rows()).map(|_| model.clone()).collect();
        ProbabilityMatrix::from_rows(rows, model.len())
    }
}

fn predictor_value(class: usize, row: usize, j: usize) -> f64 {
    class as f64 * 2.0 + ((row * 7 + j * 13) as f64).sin() * 0.3
}

fn labeled_table(rows: usize) -> Table {
    let mut columns = vec!["X".to_string(), "user_name".to_string()];
    columns.extend((0..PREDICTORS).map(|j| format!("p{j}")));
    columns.push("classe".to_string());

    let data = (0..rows)
        .map(|i| {
            let class = i % CLASSES.len();
            let mut row = vec![Value::Number(i as f64 + 1.0), Value::Text("jeremy".into())];
            row.extend((0..PREDICTORS).map(|j| Value::Number(predictor_value(class, i, j))));
            row.push(Value::Text(CLASSES[class].into()));
            row
        })
        .collect();
    Table::new("training", columns, data).unwrap()
}

fn small_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.tuning.folds = 5;
    config.tuning.min_child_weight = vec![1.0];
    config.tuning.lambda_relative = vec![1.0];
    config.tuning.rounds = 5;
    config.tuning.max_depth = 3;
    config.tuning.threads = 2;
    config.final_model.rounds = 10;
    config.final_model.learning_rate = 0.2;
    config.final_model.max_depth = 3;
    config
}

#[test]
fn test_one_point_grid_trains_one_model_per_fold() {
    let training = labeled_table(100);
    let evaluation = training.select_rows(&(0..20).collect::<Vec<_>>());
    let booster = PriorBooster::default();
    let trained = Arc::clone(&booster.trained);

    let pipeline = Pipeline::new(small_config(), booster).unwrap();
    let outcome = pipeline.tune_with_tables(&training, &evaluation).unwrap();

    assert_eq!(outcome.prepared.partition.train.len(), 70);
    assert_eq!(outcome.prepared.partition.validation.len(), 30);
    assert_eq!(outcome.prepared.selection.predictors.len(), PREDICTORS);

    assert_eq!(outcome.tuning.models_trained, 5);
    assert_eq!(trained.load(Ordering::SeqCst), 5);
    assert_eq!(outcome.tuning.results.len(), 1);

    let result = &outcome.tuning.results[0];
    assert_eq!(result.fold_scores.len(), 5);
    let average = result.fold_scores.iter().map(Score::value).sum::<f64>() / 5.0;
    assert!((result.mean.value() - average).abs() < 1e-12);
}

#[test]
fn test_full_run_with_booster() {
    let training = labeled_table(100);
    let evaluation = training.select_rows(&(0..20).collect::<Vec<_>>());
    let mut config = small_config();
    config.tuning.min_child_weight = vec![0.5, 1.0];

    let pipeline = Pipeline::new(config, GbdtTrainer::new()).unwrap();
    let report = pipeline.run_with_tables(&training, &evaluation).unwrap();

    assert_eq!(report.tuning.models_trained, 10);
    assert_eq!(report.validation.confusion.total(), 30);
    assert!(report.validation.overall.accuracy > 0.8);
    assert!(report.validation_score.is_finite());
    assert_eq!(report.predictions.len(), 20);
    for prediction in &report.predictions {
        let total: f64 = prediction.probabilities.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }
    assert_eq!(report.model_fingerprint.as_ref().map(String::len), Some(64));

    let again = pipeline.run_with_tables(&training, &evaluation).unwrap();
    assert_eq!(report, again);
}

#[test]
fn test_degenerate_fold_aborts_before_final_model() {
    // A class with a single labeled row cannot appear on the held-in side of
    // the fold that holds it out
    let mut training = labeled_table(100);
    let label_idx = training.column_index("classe").unwrap();
    for row in training.rows.iter_mut() {
        if row[label_idx] == Value::Text("E".into()) {
            row[label_idx] = Value::Text("D".into());
        }
    }
    training.rows[4][label_idx] = Value::Text("E".into());
    training.rows[9][label_idx] = Value::Text("E".into());

    let evaluation = training.select_rows(&[0, 1]);
    let booster = PriorBooster::default();
    let trained = Arc::clone(&booster.trained);
    let pipeline = Pipeline::new(small_config(), booster).unwrap();

    let err = pipeline.run_with_tables(&training, &evaluation).unwrap_err();
    assert!(matches!(err, wle_pipeline::PipelineError::DegenerateFold { .. }));
    assert_eq!(trained.load(Ordering::SeqCst), 0);
}

#[test]
fn test_unknown_label_is_schema_error() {
    let mut training = labeled_table(50);
    let label_idx = training.column_index("classe").unwrap();
    training.rows[3][label_idx] = Value::Text("F".into());
    let evaluation = training.select_rows(&[0]);

    let pipeline = Pipeline::new(small_config(), PriorBooster::default()).unwrap();
    let err = pipeline.run_with_tables(&training, &evaluation).unwrap_err();
    assert!(matches!(err, wle_pipeline::PipelineError::UnknownLabel { row: 3, .. }));
}

#[test]
fn test_folds_are_stratified() {
    let labels: Vec<usize> = (0..1000).map(|i| i % 5).collect();
    let folds = stratified_folds(&labels, 5, 2024).unwrap();

    for fold in folds.folds() {
        for class in 0..5 {
            let share = fold.iter().filter(|&&r| labels[r] == class).count() as f64
                / fold.len() as f64;
            assert!((share - 0.2).abs() <= 0.02, "class {class} share {share}");
        }
    }
}

fn write_csv(path: &Path, header: &[String], rows: &[Vec<String>]) {
    let mut text = header.join(",");
    text.push('\n');
    for row in rows {
        text.push_str(&row.join(","));
        text.push('\n');
    }
    fs::write(path, text).unwrap();
}

#[test]
fn test_run_from_files() {
    let dir = tempfile::tempdir().unwrap();
    let training_path = dir.path().join("pml-training.csv");
    let evaluation_path = dir.path().join("pml-testing.csv");

    let mut header = vec!["\"\"".to_string(), "user_name".to_string()];
    header.extend((0..PREDICTORS).map(|j| format!("p{j}")));
    header.push("kurtosis_yaw_belt".to_string());

    let body = |i: usize, class: usize| {
        let mut row = vec![(i + 1).to_string(), "charles".to_string()];
        row.extend((0..PREDICTORS).map(|j| format!("{:.5}", predictor_value(class, i, j))));
        row.push(if i == 0 { "0.5".to_string() } else { "#DIV/0!".to_string() });
        row
    };

    let training_rows: Vec<Vec<String>> = (0..100)
        .map(|i| {
            let class = i % 5;
            let mut row = body(i, class);
            row.push(CLASSES[class].to_string());
            row
        })
        .collect();
    let mut training_header = header.clone();
    training_header.push("classe".to_string());
    write_csv(&training_path, &training_header, &training_rows);

    let evaluation_rows: Vec<Vec<String>> = (0..20)
        .map(|i| {
            let mut row = body(i, i % 5);
            row.push((i + 1).to_string());
            row
        })
        .collect();
    let mut evaluation_header = header;
    evaluation_header.push("problem_id".to_string());
    write_csv(&evaluation_path, &evaluation_header, &evaluation_rows);

    let mut config = small_config();
    config.data.training_path = training_path;
    config.data.evaluation_path = evaluation_path;
    let pipeline = Pipeline::new(config, GbdtTrainer::new()).unwrap();
    let report = pipeline.run().unwrap();

    assert_eq!(report.predictors.len(), PREDICTORS);
    assert!(report.excluded.iter().any(|e| e.column == "kurtosis_yaw_belt"
        && matches!(e.reason, ExclusionReason::MostlyMissing { .. })));
    assert!(report
        .excluded
        .iter()
        .any(|e| e.column == "X" && e.reason == ExclusionReason::Identifier));

    let ids: Vec<&str> = report.predictions.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids.first(), Some(&"1"));
    assert_eq!(ids.last(), Some(&"20"));

    let json = report.to_json().unwrap();
    assert!(json.contains("\"predictions\""));

    let mut csv_out = Vec::new();
    report.write_predictions(&mut csv_out).unwrap();
    let text = String::from_utf8(csv_out).unwrap();
    assert_eq!(text.lines().count(), 21);
    assert!(text.starts_with("id,predicted,A,B,C,D,E"));
}
