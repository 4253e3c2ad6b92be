// Copyright 2021 Datafuse Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use log::info;

use crate::{
    datasource::{Datasource, MetricsMetadata, Series, parse_metrics_metadata},
    error::AppError,
    hints::{
        FixAction, FixOptions, HintOptions, QueryHint, QueryHinter, RuleMapping, apply_fix,
        parse_rule_mapping,
    },
};

/// Read-only state shared by all request handlers.
#[derive(Clone)]
pub struct AppState {
    metadata: Arc<MetricsMetadata>,
    rules: Arc<RuleMapping>,
    hinter: QueryHinter,
    fix_options: FixOptions,
}

impl AppState {
    pub async fn bootstrap(config: AppConfig) -> Result<Self, AppError> {
        let AppConfig {
            metadata_file,
            rules_file,
            sum_threshold,
            rate_interval,
        } = config;

        let metadata = match metadata_file {
            Some(path) => {
                let text = read_config_file(&path).await?;
                let metadata = parse_metrics_metadata(&text).map_err(|err| {
                    AppError::Config(format!("metadata file {}: {err}", path.display()))
                })?;
                info!(
                    "loaded metadata for {} metrics from {}",
                    metadata.len(),
                    path.display()
                );
                metadata
            }
            None => MetricsMetadata::default(),
        };

        let rules = match rules_file {
            Some(path) => {
                let text = read_config_file(&path).await?;
                let rules = parse_rule_mapping(&text).map_err(|err| {
                    AppError::Config(format!("rules file {}: {err}", path.display()))
                })?;
                info!(
                    "loaded {} recording rules from {}",
                    rules.len(),
                    path.display()
                );
                rules
            }
            None => RuleMapping::new(),
        };

        if sum_threshold == 0 {
            return Err(AppError::Config(
                "sum threshold must be greater than zero".into(),
            ));
        }
        if rate_interval.trim().is_empty() {
            return Err(AppError::Config("rate interval must not be empty".into()));
        }

        Ok(Self::new(
            metadata,
            rules,
            HintOptions { sum_threshold },
            FixOptions { rate_interval },
        ))
    }

    pub fn new(
        metadata: MetricsMetadata,
        rules: RuleMapping,
        options: HintOptions,
        fix_options: FixOptions,
    ) -> Self {
        Self {
            metadata: Arc::new(metadata),
            rules: Arc::new(rules),
            hinter: QueryHinter::new(options),
            fix_options,
        }
    }

    pub fn rules(&self) -> &RuleMapping {
        &self.rules
    }

    /// Generates hints; `overrides` replace loaded metadata entries for this call only.
    pub fn hints(
        &self,
        query: &str,
        series: &[Series],
        overrides: Option<&MetricsMetadata>,
    ) -> Result<Vec<QueryHint>, AppError> {
        let merged;
        let metadata = match overrides {
            Some(overrides) if !overrides.is_empty() => {
                let mut combined = MetricsMetadata::clone(&self.metadata);
                combined.merge(overrides);
                merged = combined;
                &merged
            }
            _ => self.metadata.as_ref(),
        };
        let datasource = Datasource::default()
            .with_metadata(metadata)
            .with_rules(&self.rules);
        self.hinter
            .hints(query, series, datasource)
            .map_err(AppError::from)
    }

    pub fn apply_fix(&self, action: &FixAction) -> Result<String, AppError> {
        apply_fix(action, &self.fix_options).map_err(AppError::from)
    }
}

pub struct AppConfig {
    pub metadata_file: Option<PathBuf>,
    pub rules_file: Option<PathBuf>,
    pub sum_threshold: usize,
    pub rate_interval: String,
}

async fn read_config_file(path: &Path) -> Result<String, AppError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|err| AppError::Config(format!("failed to read {}: {err}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::MetricType;

    fn config() -> AppConfig {
        AppConfig {
            metadata_file: None,
            rules_file: None,
            sum_threshold: 20,
            rate_interval: "$__rate_interval".into(),
        }
    }

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("{}-{name}", std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[tokio::test]
    async fn bootstraps_without_files() {
        let state = AppState::bootstrap(config()).await.unwrap();
        assert!(state.rules().is_empty());
    }

    #[tokio::test]
    async fn bootstraps_from_files() {
        let metadata = temp_file(
            "metadata.json",
            r#"{"status":"success","data":{"foo":[{"type":"counter","help":""}]}}"#,
        );
        let rules = temp_file(
            "rules.json",
            r#"{"metric_5m":[{"query":"expanded[5m]","labels":{}}]}"#,
        );
        let state = AppState::bootstrap(AppConfig {
            metadata_file: Some(metadata.clone()),
            rules_file: Some(rules.clone()),
            ..config()
        })
        .await
        .unwrap();
        assert_eq!(state.metadata.metric_type("foo"), Some(MetricType::Counter));
        assert!(state.rules().contains_key("metric_5m"));
        let _ = std::fs::remove_file(metadata);
        let _ = std::fs::remove_file(rules);
    }

    #[tokio::test]
    async fn rejects_missing_or_invalid_files() {
        let missing = AppState::bootstrap(AppConfig {
            metadata_file: Some(PathBuf::from("/nonexistent/metadata.json")),
            ..config()
        })
        .await;
        assert!(matches!(missing, Err(AppError::Config(_))));

        let invalid = temp_file("invalid-rules.json", "[1, 2, 3]");
        let result = AppState::bootstrap(AppConfig {
            rules_file: Some(invalid.clone()),
            ..config()
        })
        .await;
        assert!(matches!(result, Err(AppError::Config(_))));
        let _ = std::fs::remove_file(invalid);
    }

    #[tokio::test]
    async fn rejects_zero_threshold() {
        let result = AppState::bootstrap(AppConfig {
            sum_threshold: 0,
            ..config()
        })
        .await;
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn request_metadata_overrides_loaded_metadata() {
        let loaded: MetricsMetadata = [("foo", MetricType::Gauge)].into_iter().collect();
        let state = AppState::new(
            loaded,
            RuleMapping::new(),
            HintOptions::default(),
            FixOptions::default(),
        );
        let series = vec![Series {
            datapoints: vec![(1.into(), 1.0.into())],
            ..Default::default()
        }];
        assert!(state.hints("foo", &series, None).unwrap().is_empty());

        let overrides: MetricsMetadata = [("foo", MetricType::Counter)].into_iter().collect();
        let hints = state.hints("foo", &series, Some(&overrides)).unwrap();
        assert_eq!(hints.len(), 1);
        assert_eq!(hints[0].label, "Selected metric is a counter.");
    }
}
