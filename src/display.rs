use colored::*;
use tabled::{Table, Tabled, settings::Style};

use crate::api::HealthIndicator;
use crate::models::{
    EdaTrainingResponse, Explanation, ModelInfo, PredictSummary, ProfileReport,
};
use crate::rank::{Leaderboard, WeightVector};

#[derive(Tabled)]
struct ModelRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Model")]
    name: String,
    #[tabled(rename = "Trained")]
    trained_at: String,
    #[tabled(rename = "Threshold")]
    threshold: String,
    #[tabled(rename = "Explain")]
    explain: String,
}

#[derive(Tabled)]
struct RankRow {
    #[tabled(rename = "#")]
    position: String,
    #[tabled(rename = "Model")]
    name: String,
    #[tabled(rename = "Score")]
    score: String,
    #[tabled(rename = "ROC-AUC")]
    roc_auc: String,
    #[tabled(rename = "PR-AUC")]
    pr_auc: String,
    #[tabled(rename = "Precision")]
    precision: String,
    #[tabled(rename = "Recall")]
    recall: String,
    #[tabled(rename = "F1")]
    f1: String,
}

#[derive(Tabled)]
struct ComparisonTableRow {
    #[tabled(rename = "Model")]
    name: String,
    #[tabled(rename = "ROC-AUC")]
    roc_auc: String,
    #[tabled(rename = "PR-AUC")]
    pr_auc: String,
    #[tabled(rename = "Precision")]
    precision: String,
    #[tabled(rename = "Recall")]
    recall: String,
    #[tabled(rename = "F1")]
    f1: String,
    #[tabled(rename = "Status")]
    status: String,
}

#[derive(Tabled)]
struct ContributionRow {
    #[tabled(rename = "Direction")]
    direction: String,
    #[tabled(rename = "Feature")]
    feature: String,
    #[tabled(rename = "Contribution")]
    value: String,
}

fn yes_no(flag: bool) -> String {
    if flag { "yes".to_string() } else { "-".to_string() }
}

pub fn display_health(indicator: HealthIndicator, error: Option<String>) {
    let dot = if indicator.online {
        "●".green()
    } else {
        "●".red()
    };
    println!("{} API {}", dot, indicator.label());
    if let Some(error) = error {
        println!("  {}", error.red());
    }
}

pub fn display_models(models: &[ModelInfo], default_model: &str) {
    println!("\n{}", "=== Available Models ===".bold().cyan());
    println!("Total models: {}\n", models.len());

    let rows: Vec<ModelRow> = models
        .iter()
        .map(|m| ModelRow {
            key: if m.key == default_model {
                format!("{} (default)", m.key)
            } else {
                m.key.clone()
            },
            name: m.name.clone(),
            trained_at: if m.trained_at.is_empty() {
                "-".to_string()
            } else {
                m.trained_at.clone()
            },
            threshold: yes_no(m.supports_threshold),
            explain: yes_no(m.supports_explain),
        })
        .collect();

    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
}

pub fn display_leaderboard(board: &Leaderboard, weights: &WeightVector) {
    println!("\n{}", "=== Model Ranking ===".bold().cyan());
    println!(
        "Weights: PR-AUC {:.2} | F1 {:.2} | Recall {:.2} | ROC-AUC {:.2}\n",
        weights.pr, weights.f1, weights.recall, weights.roc
    );

    if board.ranking().is_empty() {
        println!("{}", board.narrative().yellow());
        println!("\n{}", "Model comparison".bold().underline());
        println!("{}", comparison_table(board));
        return;
    }

    let rows: Vec<RankRow> = board
        .ranking()
        .iter()
        .enumerate()
        .map(|(i, r)| RankRow {
            position: (i + 1).to_string(),
            name: r.name.clone(),
            score: format!("{:.3}", r.score),
            roc_auc: format!("{:.3}", r.metrics.roc_auc()),
            pr_auc: format!("{:.3}", r.metrics.pr_auc()),
            precision: format!("{:.3}", r.metrics.precision()),
            recall: format!("{:.3}", r.metrics.recall()),
            f1: format!("{:.3}", r.metrics.f1()),
        })
        .collect();
    println!("{}", Table::new(rows).with(Style::rounded()));

    println!("\n{}", "Model comparison".bold().underline());
    println!("{}", comparison_table(board));

    println!("\n{}", board.narrative());
    display_selected_detail(board);
}

/// Every listed model in listing order; metrics not yet available read 0.000.
pub fn comparison_table(board: &Leaderboard) -> String {
    let rows: Vec<ComparisonTableRow> = board
        .comparison_rows()
        .into_iter()
        .map(|row| ComparisonTableRow {
            name: row.name,
            roc_auc: format!("{:.3}", row.metrics.roc_auc()),
            pr_auc: format!("{:.3}", row.metrics.pr_auc()),
            precision: format!("{:.3}", row.metrics.precision()),
            recall: format!("{:.3}", row.metrics.recall()),
            f1: format!("{:.3}", row.metrics.f1()),
            status: if row.resolved {
                "ok".to_string()
            } else {
                "pending".to_string()
            },
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

fn display_selected_detail(board: &Leaderboard) {
    let Some(top) = board.selected() else {
        return;
    };
    let kpis = board.kpis();
    println!();
    println!("{}", format!("Selected: {}", top.name).bold().underline());
    println!("  Fraud rate (sampled): {:.3}", kpis.fraud_rate);
    println!("  Sampling ratio: {:.2}", kpis.sampling_ratio);
    println!("  Last trained: {}", kpis.last_trained);

    match board.confusion_matrix() {
        Some(cm) => {
            println!("  Confusion matrix:");
            println!("    {:>10} {:>10}", "pred 0", "pred 1");
            println!("    actual 0 {:>10} {:>10}", cm.tn, cm.fp);
            println!("    actual 1 {:>10} {:>10}", cm.fn_, cm.tp);
        }
        None => println!("  Confusion matrix: -"),
    }

    let roc_points = board.roc_curve().map(|c| c.fpr.len()).unwrap_or(0);
    let pr_points = board.pr_curve().map(|c| c.recall.len()).unwrap_or(0);
    println!("  Curves: ROC {} points, PR {} points", roc_points, pr_points);

    let features = board.feature_importance(20);
    if !features.is_empty() {
        println!("  Top features:");
        for f in features {
            println!("    {:<28} {:.4}", f.feature, f.importance);
        }
    }
}

pub fn display_prediction_summary(summary: &PredictSummary) {
    println!("\n{}", "=== Prediction Summary ===".bold().cyan());
    println!("{}: {}", "Model".bold(), summary.model);
    if let Some(threshold) = summary.threshold {
        println!("{}: {:.2}", "Threshold".bold(), threshold);
    }
    println!("{}: {}", "Total rows".bold(), summary.total);
    println!("{}: {}", "Fraud predicted".bold(), summary.fraud_count.to_string().red());
    println!("{}: {}", "Non-fraud predicted".bold(), summary.non_fraud_count);
    println!("{}: {:.3}", "Fraud rate".bold(), summary.fraud_rate);
    println!();
}

pub fn display_explanation(explanation: &Explanation) {
    println!("\n{}", format!("=== Row {} ===", explanation.row_id).bold().cyan());
    println!("{}: {:.4}", "Probability".bold(), explanation.proba);
    println!("{}: {}", "Prediction".bold(), explanation.pred_label);

    let rows: Vec<ContributionRow> = explanation
        .positives
        .iter()
        .map(|c| ContributionRow {
            direction: "↑ fraud".to_string(),
            feature: c.feature.clone(),
            value: format!("{:+.4}", c.value),
        })
        .chain(explanation.negatives.iter().map(|c| ContributionRow {
            direction: "↓ fraud".to_string(),
            feature: c.feature.clone(),
            value: format!("{:+.4}", c.value),
        }))
        .collect();
    if !rows.is_empty() {
        println!("{}", Table::new(rows).with(Style::rounded()));
    }

    if let Some(breakdown) = &explanation.category_breakdown {
        println!("{}", "Category breakdown:".bold().underline());
        for share in breakdown {
            println!("  {:<24} {:.1}%", share.category, share.percentage);
        }
    }
    if let Some(fields) = &explanation.simple_fields {
        println!("{}", "Key fields:".bold().underline());
        for field in fields {
            let value = field
                .value
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "-".to_string());
            println!("  {:<24} {:<16} {:.1}%", field.label, value, field.percentage);
        }
    }
    println!();
}

pub fn display_training_eda(eda: &EdaTrainingResponse) {
    println!("\n{}", "=== Training Data ===".bold().cyan());

    let missing = eda.top_missing(20);
    if missing.is_empty() {
        println!("Missingness: -");
    } else {
        println!("{}", "Missingness (top 20):".bold().underline());
        for m in missing {
            println!("  {:<28} {}", m.feature, m.missing);
        }
    }

    let hourly = eda.fraud_by_hour_bins();
    if !hourly.is_empty() {
        println!("{}", "Fraud rate by hour:".bold().underline());
        for bin in hourly {
            println!("  {:>2}h  {:.4}", bin.bin, bin.count);
        }
    }

    if let Some(amounts) = eda
        .distributions
        .as_ref()
        .and_then(|d| d.transaction_amount.as_ref())
    {
        println!("{}", "Transaction amount distribution:".bold().underline());
        for bin in amounts {
            println!("  {:<16} {}", bin.bin, bin.count);
        }
    }
    println!();
}

pub fn display_profile_report(report: &ProfileReport) {
    let s = &report.summary;
    println!("\n{}", "=== Dataset Profile ===".bold().cyan());
    println!("{}: {}", "Rows".bold(), s.rows);
    println!("{}: {}", "Columns".bold(), s.columns);
    println!(
        "{}: {} / {} / {}",
        "Numeric / categorical / binary".bold(),
        s.numeric_columns,
        s.categorical_columns,
        s.binary_columns
    );
    println!(
        "{}: {}",
        "Dataset type".bold(),
        s.dataset_type.as_deref().unwrap_or("-")
    );
    println!(
        "{}: {:.2} MB",
        "Size".bold(),
        s.file_size_bytes as f64 / (1024.0 * 1024.0)
    );
    println!("{}: {}", "Files".bold(), report.uploaded_file_names());

    if !report.warnings.is_empty() {
        println!();
        println!("{}", "Warnings:".bold().underline().yellow());
        for warning in &report.warnings {
            println!("  {}", warning.yellow());
        }
    }

    if let Some(missing) = &report.missingness {
        println!();
        println!(
            "Overall missing: {:.1}% | Rows with missing values: {:.1}%",
            missing.overall_missing_pct, missing.rows_with_missing_pct
        );
    }

    if let Some(schema) = &report.schema_alignment {
        let list = |items: &[String]| {
            if items.is_empty() {
                "-".to_string()
            } else {
                items.join(", ")
            }
        };
        println!();
        println!("{}", "Schema alignment:".bold().underline());
        println!("  Present required: {}", list(&schema.present_required));
        println!("  Missing required: {}", list(&schema.missing_required));
        println!("  Created columns: {}", list(&schema.created_columns));
        println!("  Ignored columns: {}", list(&schema.ignored_columns));
        println!("  Final feature count: {}", schema.final_feature_count);
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MetricSet, MetricsResponse};
    use crate::query::QueryState;

    fn listed(key: &str, name: &str) -> ModelInfo {
        ModelInfo {
            key: key.to_string(),
            name: name.to_string(),
            trained_at: String::new(),
            supports_threshold: false,
            supports_explain: false,
        }
    }

    #[test]
    fn comparison_lists_every_model_with_three_decimals() {
        let mut resolved = QueryState::idle();
        resolved.data = Some(MetricsResponse {
            metrics: MetricSet {
                roc_auc: Some(0.9712),
                pr_auc: Some(0.8),
                precision: None,
                recall: Some(0.75),
                f1: Some(0.7749),
            },
            ..MetricsResponse::default()
        });
        let fanout = vec![
            (listed("xgb", "XGBoost"), resolved),
            (listed("cat", "CatBoost"), QueryState::idle()),
        ];
        let board = Leaderboard::build(&fanout, &WeightVector::default());
        let text = comparison_table(&board);

        let xgb = text.lines().find(|l| l.contains("XGBoost")).unwrap();
        for cell in ["0.971", "0.800", "0.000", "0.750", "0.775", "ok"] {
            assert!(xgb.contains(cell), "missing {cell} in {xgb}");
        }
        let cat = text.lines().find(|l| l.contains("CatBoost")).unwrap();
        assert_eq!(cat.matches("0.000").count(), 5);
        assert!(cat.contains("pending"));
        assert!(text.find("XGBoost").unwrap() < text.find("CatBoost").unwrap());
    }
}
