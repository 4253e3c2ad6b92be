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

//! Query hints: heuristics that suggest improvements to a PromQL query from
//! its shape, the returned series and what is known about the datasource.

mod fix;
pub mod matcher;
mod rules;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    datasource::{Datasource, MetricType, Series},
    promql::{Expr, PromqlError, PromqlParser, SelectorRef, function_names, selectors},
};

pub use fix::{DEFAULT_RATE_INTERVAL, FixOptions, apply_fix};
pub use matcher::{TokenMatch, classify, matches};
pub use rules::{
    PrometheusRule, ResolvedRule, RuleCandidate, RuleGroup, RuleGroups, RuleMapping,
    expand_rules_hints, mapping_from_groups, parse_rule_mapping, query_labels_for_rule, resolve,
};

/// Number of returned series from which aggregating with `sum()` is suggested.
pub const SUM_HINT_THRESHOLD_COUNT: usize = 20;

const RATE_FUNCTIONS: &[&str] = &["rate", "irate", "increase"];
const COUNTER_SUFFIXES: &[&str] = &["_total", "_sum", "_count"];
const BUCKET_SUFFIX: &str = "_bucket";
const NATIVE_HISTOGRAM_FUNCTIONS: &[&str] = &[
    "histogram_avg",
    "histogram_count",
    "histogram_sum",
    "histogram_fraction",
    "histogram_quantile",
    "histogram_stddev",
    "histogram_stdvar",
];

const RATE_FIX_LABEL: &str = "Consider calculating rate of counter by adding rate().";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HintKind {
    ApplyRate,
    ApplyCertainRate,
    HistogramQuantile,
    HistogramAvg,
    HistogramCount,
    AddSum,
    ExpandRules,
    ExpandRulesWarning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    AddRate,
    AddHistogramQuantile,
    AddHistogramAvg,
    AddHistogramCount,
    AddSum,
    ExpandRules,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryHint {
    #[serde(rename = "type")]
    pub kind: HintKind,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix: Option<QueryFix>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFix {
    pub label: String,
    pub action: FixAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixAction {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<BTreeMap<String, ExpandedRule>>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub prevent_submit: bool,
}

impl FixAction {
    fn new(kind: ActionKind, query: &str) -> Self {
        Self {
            kind,
            query: query.to_string(),
            options: None,
            prevent_submit: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpandedRule {
    pub expanded_query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier_value: Option<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HintOptions {
    pub sum_threshold: usize,
}

impl Default for HintOptions {
    fn default() -> Self {
        Self {
            sum_threshold: SUM_HINT_THRESHOLD_COUNT,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryHinter {
    options: HintOptions,
}

impl QueryHinter {
    pub fn new(options: HintOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> HintOptions {
        self.options
    }

    /// Hints for `query` given the series it returned.
    ///
    /// Returns no hints for an empty query or when no series carries samples.
    /// Queries that fail to parse are reported as errors.
    pub fn hints(
        &self,
        query: &str,
        series: &[Series],
        datasource: Datasource<'_>,
    ) -> Result<Vec<QueryHint>, PromqlError> {
        if query.trim().is_empty() || series.iter().all(Series::is_empty) {
            return Ok(Vec::new());
        }
        let expr = PromqlParser.parse(query)?;
        let found = selectors(&expr);

        let mut hints = Vec::new();
        hints.extend(counter_hint(query, &expr, &found, datasource));
        hints.extend(bucket_hint(query, &expr, &found));
        hints.extend(native_histogram_hints(query, &expr, &found, datasource));
        hints.extend(sum_hint(query, &expr, series.len(), self.options.sum_threshold));
        if let Some(mapping) = datasource.rules {
            hints.extend(rules::rule_hints(query, &expr, mapping));
        }

        log::debug!(
            "generated {} hints for query `{query}` over {} series",
            hints.len(),
            series.len()
        );
        Ok(hints)
    }
}

/// Hints for `query` with the default options.
pub fn query_hints(
    query: &str,
    series: &[Series],
    datasource: Datasource<'_>,
) -> Result<Vec<QueryHint>, PromqlError> {
    QueryHinter::default().hints(query, series, datasource)
}

fn counter_hint(
    query: &str,
    expr: &Expr,
    found: &[SelectorRef<'_>],
    datasource: Datasource<'_>,
) -> Option<QueryHint> {
    let (kind, label) = found
        .iter()
        .filter(|selector| !selector.is_wrapped_by(RATE_FUNCTIONS))
        .filter_map(|selector| selector.name())
        .find_map(|name| match datasource.metric_type(name) {
            Some(MetricType::Counter) => Some((
                HintKind::ApplyCertainRate,
                "Selected metric is a counter.",
            )),
            None | Some(MetricType::Unknown) if looks_like_counter(name) => Some((
                HintKind::ApplyRate,
                "Selected metric looks like a counter.",
            )),
            _ => None,
        })?;

    if expr.as_bare_selector().is_none() {
        return Some(QueryHint {
            kind,
            label: format!("{label} {RATE_FIX_LABEL}"),
            fix: None,
        });
    }
    Some(QueryHint {
        kind,
        label: label.to_string(),
        fix: Some(QueryFix {
            label: RATE_FIX_LABEL.to_string(),
            action: FixAction::new(ActionKind::AddRate, query),
        }),
    })
}

// Recording rules are named `level:metric:operations`; their suffix says
// nothing about the stored value.
fn looks_like_counter(name: &str) -> bool {
    !name.contains(':') && COUNTER_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

fn bucket_hint(query: &str, expr: &Expr, found: &[SelectorRef<'_>]) -> Option<QueryHint> {
    found.iter().find(|selector| {
        selector
            .name()
            .is_some_and(|name| name.ends_with(BUCKET_SUFFIX))
            && !selector.is_wrapped_by(&["histogram_quantile"])
    })?;
    let fix = expr.as_bare_selector().map(|_| QueryFix {
        label: "Consider calculating aggregated quantile by adding histogram_quantile().".into(),
        action: FixAction::new(ActionKind::AddHistogramQuantile, query),
    });
    Some(QueryHint {
        kind: HintKind::HistogramQuantile,
        label: "Selected metric has buckets.".into(),
        fix,
    })
}

fn native_histogram_hints(
    query: &str,
    expr: &Expr,
    found: &[SelectorRef<'_>],
    datasource: Datasource<'_>,
) -> Vec<QueryHint> {
    let is_native = found.iter().any(|selector| {
        selector
            .name()
            .is_some_and(|name| datasource.metric_type(name) == Some(MetricType::Histogram))
    });
    if !is_native {
        return Vec::new();
    }
    let uses_histogram_function = function_names(expr).into_iter().any(|func| {
        NATIVE_HISTOGRAM_FUNCTIONS
            .iter()
            .any(|native| native.eq_ignore_ascii_case(func))
    });
    if uses_histogram_function {
        return Vec::new();
    }

    [
        (
            HintKind::HistogramAvg,
            ActionKind::AddHistogramAvg,
            "Consider calculating the arithmetic average of observed values by adding histogram_avg().",
        ),
        (
            HintKind::HistogramCount,
            ActionKind::AddHistogramCount,
            "Consider calculating the count of observations by adding histogram_count().",
        ),
        (
            HintKind::HistogramQuantile,
            ActionKind::AddHistogramQuantile,
            "Consider calculating aggregated quantile by adding histogram_quantile().",
        ),
    ]
    .into_iter()
    .map(|(kind, action, fix_label)| QueryHint {
        kind,
        label: "Selected metric is a native histogram.".into(),
        fix: Some(QueryFix {
            label: fix_label.into(),
            action: FixAction::new(action, query),
        }),
    })
    .collect()
}

fn sum_hint(query: &str, expr: &Expr, series_count: usize, threshold: usize) -> Option<QueryHint> {
    if series_count < threshold {
        return None;
    }
    let selector = expr.as_bare_selector()?;
    if selector.name.as_deref().is_none_or(|name| name.contains(':')) {
        return None;
    }
    Some(QueryHint {
        kind: HintKind::AddSum,
        label: "Many time series results returned.".into(),
        fix: Some(QueryFix {
            label: "Consider aggregating with sum().".into(),
            action: FixAction {
                prevent_submit: true,
                ..FixAction::new(ActionKind::AddSum, query)
            },
        }),
    })
}
