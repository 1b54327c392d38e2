use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::{
    ConfusionMatrix, FeatureImportance, METRIC_NAMES, MetricSet, MetricsResponse, ModelInfo,
    PrCurve, RocCurve,
};
use crate::query::QueryState;

/// User-tunable coefficients combining a [`MetricSet`] into one score.
///
/// Each coefficient lives in `[0, 1]`. They are not normalised: the score is
/// only meaningful relative to other models under the same weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightVector {
    pub pr: f64,
    pub f1: f64,
    pub recall: f64,
    pub roc: f64,
}

impl Default for WeightVector {
    fn default() -> Self {
        WeightVector {
            pr: 0.4,
            f1: 0.3,
            recall: 0.2,
            roc: 0.1,
        }
    }
}

fn unit(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

impl WeightVector {
    pub fn new(pr: f64, f1: f64, recall: f64, roc: f64) -> Self {
        WeightVector {
            pr: unit(pr),
            f1: unit(f1),
            recall: unit(recall),
            roc: unit(roc),
        }
    }

    pub fn with_pr(self, pr: f64) -> Self {
        WeightVector { pr: unit(pr), ..self }
    }

    pub fn with_f1(self, f1: f64) -> Self {
        WeightVector { f1: unit(f1), ..self }
    }

    pub fn with_recall(self, recall: f64) -> Self {
        WeightVector {
            recall: unit(recall),
            ..self
        }
    }

    pub fn with_roc(self, roc: f64) -> Self {
        WeightVector { roc: unit(roc), ..self }
    }

    /// Weighted sum; absent metrics count as zero.
    pub fn score(&self, metrics: &MetricSet) -> f64 {
        self.pr * metrics.pr_auc()
            + self.f1 * metrics.f1()
            + self.recall * metrics.recall()
            + self.roc * metrics.roc_auc()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedModel {
    pub key: String,
    pub name: String,
    pub score: f64,
    pub metrics: MetricSet,
    /// Position in the model listing, used to break score ties.
    pub listing_index: usize,
}

/// Order models with resolved metrics by descending weighted score.
///
/// Models without an entry in `metrics` are still pending or failed and are
/// left out. Equal scores keep the listing order. The result depends only on
/// the arguments.
pub fn rank_models(
    models: &[ModelInfo],
    metrics: &HashMap<String, MetricSet>,
    weights: &WeightVector,
) -> Vec<RankedModel> {
    let mut ranked: Vec<RankedModel> = models
        .iter()
        .enumerate()
        .filter_map(|(listing_index, model)| {
            let set = metrics.get(&model.key)?;
            Some(RankedModel {
                key: model.key.clone(),
                name: model.name.clone(),
                score: weights.score(set),
                metrics: *set,
                listing_index,
            })
        })
        .collect();

    // sort_by is stable, so ties stay in listing order
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked
}

/// Headline numbers for the selected model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Kpis {
    pub roc_auc: f64,
    pub pr_auc: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub fraud_rate: f64,
    pub sampling_ratio: f64,
    pub last_trained: String,
}

/// One row of the side-by-side comparison, absent metrics shown as zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonRow {
    pub key: String,
    pub name: String,
    pub metrics: MetricSet,
    pub resolved: bool,
}

/// Radar chart input: one metric axis with a value per model key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RadarAxis {
    pub metric: &'static str,
    pub values: Vec<(String, f64)>,
}

/// Ranking plus everything the overview shows about the winning model,
/// built from whatever subset of the per-model metric queries has resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct Leaderboard {
    models: Vec<ModelInfo>,
    responses: HashMap<String, MetricsResponse>,
    ranking: Vec<RankedModel>,
}

impl Leaderboard {
    pub fn build(
        fanout: &[(ModelInfo, QueryState<MetricsResponse>)],
        weights: &WeightVector,
    ) -> Self {
        let models: Vec<ModelInfo> = fanout.iter().map(|(m, _)| m.clone()).collect();
        let responses: HashMap<String, MetricsResponse> = fanout
            .iter()
            .filter_map(|(model, state)| Some((model.key.clone(), state.data.clone()?)))
            .collect();
        let mut board = Leaderboard {
            models,
            responses,
            ranking: Vec::new(),
        };
        board.rerank(weights);
        board
    }

    /// Recompute the order for new weights over the same metric data.
    pub fn rerank(&mut self, weights: &WeightVector) {
        let metric_sets: HashMap<String, MetricSet> = self
            .responses
            .iter()
            .map(|(key, resp)| (key.clone(), resp.metrics))
            .collect();
        self.ranking = rank_models(&self.models, &metric_sets, weights);
    }

    pub fn ranking(&self) -> &[RankedModel] {
        &self.ranking
    }

    pub fn selected(&self) -> Option<&RankedModel> {
        self.ranking.first()
    }

    fn selected_response(&self) -> Option<&MetricsResponse> {
        self.selected().and_then(|top| self.responses.get(&top.key))
    }

    pub fn narrative(&self) -> String {
        match self.selected() {
            Some(top) => format!(
                "Best model is {} with strong PR-AUC and balanced recall/precision. \
                 It maximizes fraud capture while keeping false alarms controlled.",
                top.key.to_uppercase()
            ),
            None => "Awaiting metrics...".to_string(),
        }
    }

    pub fn kpis(&self) -> Kpis {
        let response = self.selected_response();
        let metrics = response.map(|r| r.metrics).unwrap_or_default();
        let stats = response.and_then(|r| r.training_stats.as_ref());
        Kpis {
            roc_auc: metrics.roc_auc(),
            pr_auc: metrics.pr_auc(),
            precision: metrics.precision(),
            recall: metrics.recall(),
            f1: metrics.f1(),
            fraud_rate: stats.and_then(|s| s.fraud_rate).unwrap_or(0.0),
            sampling_ratio: stats.and_then(|s| s.sampling_ratio).unwrap_or(0.0),
            last_trained: stats
                .and_then(|s| s.trained_at.clone())
                .unwrap_or_else(|| "-".to_string()),
        }
    }

    pub fn confusion_matrix(&self) -> Option<ConfusionMatrix> {
        self.selected_response().and_then(|r| r.confusion_matrix)
    }

    pub fn roc_curve(&self) -> Option<&RocCurve> {
        self.selected_response()
            .and_then(|r| r.curves.as_ref())
            .and_then(|c| c.roc.as_ref())
    }

    pub fn pr_curve(&self) -> Option<&PrCurve> {
        self.selected_response()
            .and_then(|r| r.curves.as_ref())
            .and_then(|c| c.pr.as_ref())
    }

    /// First `limit` features as reported for the selected model.
    pub fn feature_importance(&self, limit: usize) -> &[FeatureImportance] {
        match self
            .selected_response()
            .and_then(|r| r.feature_importance.as_deref())
        {
            Some(items) => &items[..items.len().min(limit)],
            None => &[],
        }
    }

    /// Every listed model in listing order, resolved or not.
    pub fn comparison_rows(&self) -> Vec<ComparisonRow> {
        self.models
            .iter()
            .map(|model| {
                let response = self.responses.get(&model.key);
                ComparisonRow {
                    key: model.key.clone(),
                    name: model.name.clone(),
                    metrics: response.map(|r| r.metrics).unwrap_or_default(),
                    resolved: response.is_some(),
                }
            })
            .collect()
    }

    pub fn radar(&self) -> Vec<RadarAxis> {
        let rows = self.comparison_rows();
        METRIC_NAMES
            .iter()
            .map(|&metric| RadarAxis {
                metric,
                values: rows
                    .iter()
                    .map(|row| (row.key.clone(), row.metrics.get(metric)))
                    .collect(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;

    fn model(key: &str) -> ModelInfo {
        ModelInfo {
            key: key.to_string(),
            name: key.to_uppercase(),
            trained_at: String::new(),
            supports_threshold: true,
            supports_explain: true,
        }
    }

    fn metrics(pr: f64, f1: f64, recall: f64, roc: f64) -> MetricSet {
        MetricSet {
            roc_auc: Some(roc),
            pr_auc: Some(pr),
            precision: None,
            recall: Some(recall),
            f1: Some(f1),
        }
    }

    #[test]
    fn weighted_score_matches_worked_example() {
        let weights = WeightVector::new(0.4, 0.3, 0.2, 0.1);
        let a = weights.score(&metrics(0.85, 0.77, 0.75, 0.90));
        let b = weights.score(&metrics(0.90, 0.81, 0.80, 0.88));
        assert!((a - 0.811).abs() < 1e-9);
        assert!((b - 0.851).abs() < 1e-9);
    }

    #[test]
    fn higher_score_ranks_first() {
        let models = vec![model("a"), model("b")];
        let map = HashMap::from([
            ("a".to_string(), metrics(0.85, 0.77, 0.75, 0.90)),
            ("b".to_string(), metrics(0.90, 0.81, 0.80, 0.88)),
        ]);
        let ranked = rank_models(&models, &map, &WeightVector::default());
        assert_eq!(ranked[0].key, "b");
        assert_eq!(ranked[1].key, "a");
        assert_eq!(ranked[1].listing_index, 0);
    }

    #[test]
    fn ties_keep_listing_order() {
        let models = vec![model("stack"), model("xgb"), model("cat")];
        let same = metrics(0.5, 0.5, 0.5, 0.5);
        let map = HashMap::from([
            ("cat".to_string(), same),
            ("xgb".to_string(), same),
            ("stack".to_string(), same),
        ]);
        for _ in 0..5 {
            let keys: Vec<String> = rank_models(&models, &map, &WeightVector::default())
                .into_iter()
                .map(|r| r.key)
                .collect();
            assert_eq!(keys, vec!["stack", "xgb", "cat"]);
        }
    }

    #[test]
    fn absent_metric_fields_score_as_zero() {
        let weights = WeightVector::default();
        assert_eq!(weights.score(&MetricSet::default()), 0.0);
        let only_pr = MetricSet {
            pr_auc: Some(1.0),
            ..Default::default()
        };
        assert!((weights.score(&only_pr) - 0.4).abs() < 1e-12);
    }

    #[test]
    fn weights_are_clamped_to_unit_interval() {
        let w = WeightVector::default().with_pr(1.7).with_roc(-0.2).with_f1(f64::NAN);
        assert_eq!(w.pr, 1.0);
        assert_eq!(w.roc, 0.0);
        assert_eq!(w.f1, 0.0);
        assert_eq!(w.recall, 0.2);
    }

    #[test]
    fn changing_weights_changes_the_winner() {
        let models = vec![model("recall_heavy"), model("roc_heavy")];
        let map = HashMap::from([
            ("recall_heavy".to_string(), metrics(0.0, 0.0, 0.9, 0.1)),
            ("roc_heavy".to_string(), metrics(0.0, 0.0, 0.1, 0.9)),
        ]);
        let by_recall = rank_models(&models, &map, &WeightVector::new(0.0, 0.0, 1.0, 0.0));
        let by_roc = rank_models(&models, &map, &WeightVector::new(0.0, 0.0, 0.0, 1.0));
        assert_eq!(by_recall[0].key, "recall_heavy");
        assert_eq!(by_roc[0].key, "roc_heavy");
    }

    #[test]
    fn leaderboard_tolerates_pending_and_failed_queries() {
        let resolved = |m: MetricSet| QueryState {
            data: Some(MetricsResponse {
                metrics: m,
                ..Default::default()
            }),
            ..QueryState::idle()
        };
        let pending = QueryState {
            is_loading: true,
            is_fetching: true,
            ..QueryState::idle()
        };
        let failed = QueryState {
            is_error: true,
            error: Some(ApiError::Network("down".into())),
            ..QueryState::idle()
        };
        let fanout = vec![
            (model("xgb"), resolved(metrics(0.85, 0.77, 0.75, 0.90))),
            (model("cat"), pending),
            (model("stack"), resolved(metrics(0.90, 0.81, 0.80, 0.88))),
            (model("lgbm"), failed),
        ];

        let board = Leaderboard::build(&fanout, &WeightVector::default());
        let keys: Vec<&str> = board.ranking().iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["stack", "xgb"]);
        assert!(board.narrative().starts_with("Best model is STACK"));

        let rows = board.comparison_rows();
        assert_eq!(rows.len(), 4);
        assert!(!rows[1].resolved);
        assert_eq!(rows[1].metrics.roc_auc(), 0.0);

        let radar = board.radar();
        assert_eq!(radar.len(), 5);
        assert_eq!(radar[0].metric, "roc_auc");
        assert_eq!(radar[0].values[2], ("stack".to_string(), 0.88));
    }

    #[test]
    fn empty_leaderboard_awaits_metrics() {
        let board = Leaderboard::build(&[], &WeightVector::default());
        assert!(board.selected().is_none());
        assert_eq!(board.narrative(), "Awaiting metrics...");
        assert_eq!(board.kpis().last_trained, "-");
        assert!(board.feature_importance(20).is_empty());
        assert!(board.confusion_matrix().is_none());
    }
}
