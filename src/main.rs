use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use colored::*;

use fraudscope::api::{
    DEFAULT_THRESHOLD, FileField, FraudApi, HealthIndicator, PredictRequest, UploadFiles, health_spec,
};
use fraudscope::config::{API_URL_ENV, ClientConfig};
use fraudscope::display;
use fraudscope::export::{report_to_json, rows_to_csv};
use fraudscope::models::{ExplainRequest, HealthResponse, NumericSummaryRow, PredictionRow};
use fraudscope::prefs::{DEFAULT_MODEL_PREF, PreferenceStore, THEME_PREF, Theme};
use fraudscope::query::QueryState;
use fraudscope::rank::{Leaderboard, WeightVector};
use fraudscope::table::{self, Column, Explorer, PAGE_SIZE};
use fraudscope::transport::{HttpTransport, ProgressFn};

#[derive(Parser)]
#[command(name = "fraudscope")]
#[command(about = "Compare fraud-scoring models and score transaction uploads", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Scoring service base URL
    #[arg(long, global = true, env = API_URL_ENV)]
    api_url: Option<String>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether the scoring service is reachable
    Health {
        /// Keep polling and print every status change
        #[arg(long)]
        watch: bool,
    },

    /// List the trained models the service offers
    Models,

    /// Rank models by a weighted blend of their evaluation metrics
    Rank {
        /// Weight for PR-AUC
        #[arg(long)]
        pr: Option<f64>,

        /// Weight for F1
        #[arg(long)]
        f1: Option<f64>,

        /// Weight for recall
        #[arg(long)]
        recall: Option<f64>,

        /// Weight for ROC-AUC
        #[arg(long)]
        roc: Option<f64>,
    },

    /// Show evaluation detail for one model
    Metrics {
        /// Model key
        model: String,
    },

    /// Summarize the training dataset
    EdaTraining,

    /// Score uploaded transactions with a model
    Predict {
        /// Model key (defaults to the saved preference)
        #[arg(short, long)]
        model: Option<String>,

        /// Decision threshold for models that accept one
        #[arg(short, long, default_value_t = DEFAULT_THRESHOLD)]
        threshold: f64,

        #[command(flatten)]
        files: DatasetArgs,

        /// Only show rows containing this text
        #[arg(short, long, default_value = "")]
        search: String,

        /// Result page to show
        #[arg(short, long, default_value_t = 1)]
        page: usize,

        /// Write predictions.csv into this directory
        #[arg(long)]
        export_csv: Option<PathBuf>,
    },

    /// Explain the prediction for one or more rows
    Explain {
        /// Model key (defaults to the saved preference)
        #[arg(short, long)]
        model: Option<String>,

        /// Row ids from a previous prediction
        #[arg(required = true)]
        row_ids: Vec<String>,

        /// Number of contributing features per direction
        #[arg(long, default_value_t = fraudscope::models::DEFAULT_TOP_K)]
        top_k: u32,

        /// Write explanations.json into this directory
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// Profile uploaded datasets without scoring them
    Profile {
        #[command(flatten)]
        files: DatasetArgs,

        /// Only show numeric columns containing this text
        #[arg(short, long, default_value = "")]
        search: String,

        /// Numeric summary page to show
        #[arg(short, long, default_value_t = 1)]
        page: usize,

        /// Write analysis-report.json into this directory
        #[arg(long)]
        export_report: Option<PathBuf>,
    },

    /// Read or change saved preferences
    Prefs {
        #[command(subcommand)]
        action: PrefsAction,
    },
}

#[derive(clap::Args)]
struct DatasetArgs {
    /// Merged transaction+identity CSV
    #[arg(long)]
    merged: Option<PathBuf>,

    /// Transaction CSV
    #[arg(long)]
    transaction: Option<PathBuf>,

    /// Identity CSV
    #[arg(long)]
    identity: Option<PathBuf>,
}

impl DatasetArgs {
    fn load(&self) -> Result<UploadFiles> {
        let mut files = UploadFiles::new();
        for (field, path) in [
            (FileField::Merged, &self.merged),
            (FileField::Transaction, &self.transaction),
            (FileField::Identity, &self.identity),
        ] {
            if let Some(path) = path {
                files = files.with_path(field, path)?;
            }
        }
        if files.is_empty() {
            bail!("Attach at least one dataset with --merged, --transaction or --identity");
        }
        Ok(files)
    }
}

#[derive(Subcommand)]
enum PrefsAction {
    /// Print one preference, or all of them
    Get {
        /// default_model or theme
        name: Option<String>,
    },
    /// Save a preference
    Set {
        /// default_model or theme
        name: String,
        value: String,
    },
}

fn progress_bar() -> ProgressFn {
    Arc::new(|percent: u8| {
        eprint!("\rUploading... {:>3}%", percent);
        if percent >= 100 {
            eprintln!();
        }
    })
}

fn open_prefs() -> PreferenceStore {
    PreferenceStore::open_default().unwrap_or_else(|err| {
        tracing::warn!(error = %err, "falling back to in-memory preferences");
        PreferenceStore::open(Box::new(fraudscope::prefs::MemoryBackend::default()))
    })
}

async fn run_health(api: &FraudApi, watch: bool) -> Result<()> {
    if !watch {
        let state = api.health().await;
        display::display_health(HealthIndicator::from_state(&state), state.error_message());
        return Ok(());
    }

    println!(
        "Polling every {}s, Ctrl-C to stop",
        api.config().health_poll_interval.as_secs()
    );
    let _poll = api.watch_health();
    let mut was_fetching = false;
    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    loop {
        ticker.tick().await;
        let state: QueryState<HealthResponse> = api.queries().peek(&health_spec().key);
        if was_fetching && !state.is_fetching {
            display::display_health(api.health_indicator(), state.error_message());
        }
        was_fetching = state.is_fetching;
    }
}

async fn run_rank(api: &FraudApi, weights: WeightVector) -> Result<()> {
    let models = api.models().await.into_result()?;
    let fanout = api.metrics_for(&models.models).await;
    for (model, state) in &fanout {
        if let Some(err) = state.error_message() {
            tracing::warn!(model = %model.key, error = %err, "metrics unavailable");
        }
    }
    let board = Leaderboard::build(&fanout, &weights);
    display::display_leaderboard(&board, &weights);
    Ok(())
}

async fn run_metrics(api: &FraudApi, model_key: &str) -> Result<()> {
    let models = api.models().await.into_result()?;
    let model = models
        .find(model_key)
        .cloned()
        .ok_or_else(|| anyhow!("No model found matching '{}'", model_key))?;
    let state = api.metrics(&model.key).await;
    if let Some(err) = &state.error {
        bail!("Failed to load metrics for {}: {}", model.key, err);
    }
    let weights = WeightVector::default();
    let board = Leaderboard::build(&[(model, state)], &weights);
    display::display_leaderboard(&board, &weights);
    Ok(())
}

fn prediction_explorer() -> Explorer<PredictionRow> {
    Explorer::new(vec![
        Column::new("row_id", "Row"),
        Column::new("TransactionID", "TransactionID"),
        Column::new("proba", "Fraud probability")
            .render(|r: &PredictionRow| format!("{:.1}%", r.proba * 100.0)),
        Column::new("pred_label", "Prediction"),
    ])
}

fn numeric_explorer() -> Explorer<NumericSummaryRow> {
    let fixed = |v: f64| format!("{:.3}", v);
    Explorer::new(vec![
        Column::new("row_id", "Column"),
        Column::new("min", "Min").render(move |r: &NumericSummaryRow| fixed(r.min)),
        Column::new("max", "Max").render(move |r: &NumericSummaryRow| fixed(r.max)),
        Column::new("mean", "Mean").render(move |r: &NumericSummaryRow| fixed(r.mean)),
        Column::new("median", "Median").render(move |r: &NumericSummaryRow| fixed(r.median)),
        Column::new("std", "Std").render(move |r: &NumericSummaryRow| fixed(r.std)),
        Column::new("outliers", "Outliers"),
    ])
}

fn show_page<T: table::TableRow>(explorer: &mut Explorer<T>, rows: &[T], search: &str, page: usize) {
    explorer.view_mut().set_search(search);
    let total = table::total_pages(table::filter(rows, search).len(), PAGE_SIZE);
    explorer.view_mut().go_to(page, total);
    println!("{}", explorer.render(rows));
}

async fn run_predict(
    api: &FraudApi,
    model_key: String,
    threshold: f64,
    files: UploadFiles,
    search: &str,
    page: usize,
    export_csv: Option<PathBuf>,
) -> Result<()> {
    let models = api.models().await.into_result()?;
    if models.find(&model_key).is_none() {
        tracing::warn!(model = %model_key, "model is not in the service listing");
    }
    let request = PredictRequest::new(&model_key, files).threshold(threshold);
    let result = api
        .predict(&request, models.supports_threshold(&model_key), Some(progress_bar()))
        .await
        .into_result()
        .context("Prediction failed")?;

    display::display_prediction_summary(&result.summary);
    show_page(&mut prediction_explorer(), &result.rows, search, page);

    if let Some(dir) = export_csv {
        match rows_to_csv(&result.rows, "predictions.csv")? {
            Some(artifact) => {
                let path = artifact.write_to(&dir)?;
                println!("Saved {}", path.display().to_string().green());
            }
            None => println!("{}", "No rows to export".yellow()),
        }
    }
    Ok(())
}

async fn run_explain(
    api: &FraudApi,
    request: ExplainRequest,
    export: Option<PathBuf>,
) -> Result<()> {
    let response = api
        .explain(&request)
        .await
        .into_result()
        .context("Explanation failed")?;
    for row_id in &request.row_ids {
        match response.for_row(row_id) {
            Some(explanation) => display::display_explanation(explanation),
            None => println!("{}", format!("No explanation returned for row {}", row_id).yellow()),
        }
    }

    if let Some(dir) = export {
        let path = report_to_json(&response, "explanations.json")?.write_to(&dir)?;
        println!("Saved {}", path.display().to_string().green());
    }
    Ok(())
}

async fn run_profile(
    api: &FraudApi,
    files: UploadFiles,
    search: &str,
    page: usize,
    export_report: Option<PathBuf>,
) -> Result<()> {
    let report = api
        .profile(&files, Some(progress_bar()))
        .await
        .into_result()
        .context("Profiling failed")?;

    display::display_profile_report(&report);
    let rows = report.numeric_summary_rows();
    if !rows.is_empty() {
        show_page(&mut numeric_explorer(), &rows, search, page);
    }

    if let Some(dir) = export_report {
        let path = report_to_json(&report, "analysis-report.json")?.write_to(&dir)?;
        println!("Saved {}", path.display().to_string().green());
    }
    Ok(())
}

fn run_prefs(action: PrefsAction) -> Result<()> {
    let mut prefs = open_prefs();
    match action {
        PrefsAction::Get { name: Some(name) } => println!("{}", prefs.get(&name)),
        PrefsAction::Get { name: None } => {
            println!("{} = {}", DEFAULT_MODEL_PREF, prefs.default_model());
            println!("{} = {}", THEME_PREF, prefs.theme().as_str());
        }
        PrefsAction::Set { name, value } => {
            if name == THEME_PREF {
                prefs.set_theme(Theme::parse(&value)?)?;
            } else {
                prefs.set(&name, &value)?;
            }
            println!("{} = {}", name, prefs.get(&name));
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    fraudscope::logging::init(cli.verbose)?;

    let config = ClientConfig::resolve(cli.api_url.as_deref())?;
    tracing::debug!(base_url = %config.base_url, "using scoring service");
    let transport = HttpTransport::new(config.clone());
    let api = FraudApi::new(Arc::new(transport), config);

    match cli.command {
        Commands::Health { watch } => run_health(&api, watch).await?,

        Commands::Models => {
            let models = api.models().await.into_result()?;
            display::display_models(&models.models, &open_prefs().default_model());
        }

        Commands::Rank { pr, f1, recall, roc } => {
            let mut weights = WeightVector::default();
            if let Some(pr) = pr {
                weights = weights.with_pr(pr);
            }
            if let Some(f1) = f1 {
                weights = weights.with_f1(f1);
            }
            if let Some(recall) = recall {
                weights = weights.with_recall(recall);
            }
            if let Some(roc) = roc {
                weights = weights.with_roc(roc);
            }
            run_rank(&api, weights).await?;
        }

        Commands::Metrics { model } => run_metrics(&api, &model).await?,

        Commands::EdaTraining => {
            let eda = api.eda_training().await.into_result()?;
            display::display_training_eda(&eda);
        }

        Commands::Predict {
            model,
            threshold,
            files,
            search,
            page,
            export_csv,
        } => {
            let model = model.unwrap_or_else(|| open_prefs().default_model());
            run_predict(&api, model, threshold, files.load()?, &search, page, export_csv).await?;
        }

        Commands::Explain {
            model,
            row_ids,
            top_k,
            export,
        } => {
            let request = ExplainRequest {
                model: model.unwrap_or_else(|| open_prefs().default_model()),
                row_ids,
                top_k,
            };
            run_explain(&api, request, export).await?;
        }

        Commands::Profile {
            files,
            search,
            page,
            export_report,
        } => run_profile(&api, files.load()?, &search, page, export_report).await?,

        Commands::Prefs { action } => run_prefs(action)?,
    }
    Ok(())
}
