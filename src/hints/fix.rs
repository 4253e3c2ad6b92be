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

use std::collections::BTreeMap;

use crate::promql::{Expr, PromqlError, PromqlParser, Span, VectorSelector, selectors};

use super::{ActionKind, ExpandedRule, FixAction};

pub const DEFAULT_RATE_INTERVAL: &str = "$__rate_interval";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixOptions {
    /// Range used when a fix wraps the query in `rate()`.
    pub rate_interval: String,
}

impl Default for FixOptions {
    fn default() -> Self {
        Self {
            rate_interval: DEFAULT_RATE_INTERVAL.to_string(),
        }
    }
}

/// Rewrites the action's query as the fix describes. The result is parsed
/// again before it is returned.
pub fn apply_fix(action: &FixAction, options: &FixOptions) -> Result<String, PromqlError> {
    let query = action.query.trim();
    let interval = &options.rate_interval;
    let rewritten = match action.kind {
        ActionKind::AddRate => format!("rate({query}[{interval}])"),
        ActionKind::AddHistogramQuantile => {
            format!("histogram_quantile(0.95, sum(rate({query}[{interval}])) by (le))")
        }
        ActionKind::AddHistogramAvg => format!("histogram_avg(rate({query}[{interval}]))"),
        ActionKind::AddHistogramCount => format!("histogram_count(rate({query}[{interval}]))"),
        ActionKind::AddSum => format!("sum({query})"),
        ActionKind::ExpandRules => match &action.options {
            Some(rules) => expand_rules(query, rules)?,
            None => query.to_string(),
        },
    };
    PromqlParser.parse(&rewritten)?;
    log::debug!("applied {:?} fix: `{query}` -> `{rewritten}`", action.kind);
    Ok(rewritten)
}

fn expand_rules(query: &str, rules: &BTreeMap<String, ExpandedRule>) -> Result<String, PromqlError> {
    let expr = PromqlParser.parse(query)?;
    let mut replacements = Vec::new();
    for found in selectors(&expr) {
        let Some(rule) = found.name().and_then(|name| rules.get(name)) else {
            continue;
        };
        if !carries_identifier(found.selector, rule) {
            continue;
        }
        replacements.push((found.selector.span, expansion_for(found.selector, rule)?));
    }

    let mut rewritten = query.to_string();
    // Spans never overlap, so replacing back to front keeps earlier ones valid.
    replacements.sort_by_key(|(span, _)| std::cmp::Reverse(span.start));
    for (Span { start, end }, text) in replacements {
        rewritten.replace_range(start..end, &text);
    }
    Ok(rewritten)
}

fn carries_identifier(selector: &VectorSelector, rule: &ExpandedRule) -> bool {
    match (&rule.identifier, &rule.identifier_value) {
        (Some(key), Some(value)) => selector
            .equality_matchers()
            .any(|matcher| &matcher.key == key && &matcher.value == value),
        _ => true,
    }
}

fn expansion_for(occurrence: &VectorSelector, rule: &ExpandedRule) -> Result<String, PromqlError> {
    let expanded = PromqlParser.parse(&rule.expanded_query)?;
    match expanded {
        Expr::Selector(mut selector) => {
            let extra = occurrence
                .matchers
                .iter()
                .filter(|matcher| rule.identifier.as_deref() != Some(matcher.key.as_str()))
                .filter(|matcher| !selector.matchers.contains(matcher))
                .cloned()
                .collect::<Vec<_>>();
            if extra.is_empty() {
                return Ok(rule.expanded_query.trim().to_string());
            }
            selector.matchers.extend(extra);
            Ok(selector.to_string())
        }
        Expr::Binary(_) => Ok(format!("({})", rule.expanded_query.trim())),
        _ => Ok(rule.expanded_query.trim().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(kind: ActionKind, query: &str) -> FixAction {
        FixAction {
            kind,
            query: query.to_string(),
            options: None,
            prevent_submit: false,
        }
    }

    fn expand(query: &str, rules: &[(&str, &str, Option<(&str, &str)>)]) -> Result<String, PromqlError> {
        let options = rules
            .iter()
            .map(|(name, expanded, identifier)| {
                (
                    name.to_string(),
                    ExpandedRule {
                        expanded_query: expanded.to_string(),
                        identifier: identifier.map(|(key, _)| key.to_string()),
                        identifier_value: identifier.map(|(_, value)| value.to_string()),
                    },
                )
            })
            .collect();
        apply_fix(
            &FixAction {
                options: Some(options),
                ..action(ActionKind::ExpandRules, query)
            },
            &FixOptions::default(),
        )
    }

    #[test]
    fn wraps_queries() {
        let options = FixOptions::default();
        let cases = [
            (ActionKind::AddRate, "metric_total", "rate(metric_total[$__rate_interval])"),
            (
                ActionKind::AddHistogramQuantile,
                "metric_bucket{job=\"api\"}",
                "histogram_quantile(0.95, sum(rate(metric_bucket{job=\"api\"}[$__rate_interval])) by (le))",
            ),
            (ActionKind::AddHistogramAvg, "foo", "histogram_avg(rate(foo[$__rate_interval]))"),
            (ActionKind::AddHistogramCount, "foo", "histogram_count(rate(foo[$__rate_interval]))"),
            (ActionKind::AddSum, "metric", "sum(metric)"),
        ];
        for (kind, query, expected) in cases {
            assert_eq!(apply_fix(&action(kind, query), &options).unwrap(), expected);
        }
    }

    #[test]
    fn uses_configured_rate_interval() {
        let options = FixOptions {
            rate_interval: "1m".into(),
        };
        assert_eq!(
            apply_fix(&action(ActionKind::AddRate, " up "), &options).unwrap(),
            "rate(up[1m])"
        );
    }

    #[test]
    fn rejects_fix_on_unparsable_query() {
        assert!(apply_fix(&action(ActionKind::AddSum, "sum("), &FixOptions::default()).is_err());
    }

    #[test]
    fn expands_single_rule() {
        assert_eq!(
            expand("metric_5m", &[("metric_5m", "expanded_metric_query[5m]", None)]).unwrap(),
            "expanded_metric_query[5m]"
        );
    }

    #[test]
    fn expands_only_identified_occurrence() {
        let rewritten = expand(
            "metric_5m{uuid=\"111\"} + metric_5m{uuid=\"222\"}",
            &[("metric_5m", "expanded_metric_query_111", Some(("uuid", "111")))],
        )
        .unwrap();
        assert_eq!(rewritten, "expanded_metric_query_111 + metric_5m{uuid=\"222\"}");
    }

    #[test]
    fn merges_remaining_matchers_into_selector_expansion() {
        let rewritten = expand(
            "rate(metric_5m{uuid=\"111\", job=\"api\"}[5m])",
            &[("metric_5m", "expanded{env=\"prod\"}", Some(("uuid", "111")))],
        )
        .unwrap();
        assert_eq!(rewritten, "rate(expanded{env=\"prod\", job=\"api\"}[5m])");
    }

    #[test]
    fn parenthesises_binary_expansion() {
        let rewritten = expand(
            "job:errors:ratio * 100",
            &[("job:errors:ratio", "errors_total / requests_total", None)],
        )
        .unwrap();
        assert_eq!(rewritten, "(errors_total / requests_total) * 100");
    }

    #[test]
    fn expands_several_rules_back_to_front() {
        let rewritten = expand(
            "sum(a:rule) / b:rule",
            &[
                ("a:rule", "sum(rate(a_total[5m]))", None),
                ("b:rule", "sum(rate(b_total[5m]))", None),
            ],
        )
        .unwrap();
        assert_eq!(rewritten, "sum(sum(rate(a_total[5m]))) / sum(rate(b_total[5m]))");
    }

    #[test]
    fn expand_without_options_keeps_query() {
        assert_eq!(
            apply_fix(&action(ActionKind::ExpandRules, "metric_5m"), &FixOptions::default()).unwrap(),
            "metric_5m"
        );
    }
}
