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

use serde::{Deserialize, Serialize};

use crate::promql::{Expr, LabelMatcher, PromqlError, PromqlParser, selectors};

use super::{ActionKind, ExpandedRule, FixAction, HintKind, QueryFix, QueryHint, matcher};

/// One way a recording rule can be expanded back into its source query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleCandidate {
    pub query: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

pub type RuleMapping = BTreeMap<String, Vec<RuleCandidate>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRule {
    pub index: usize,
    pub identifier: Option<String>,
    pub identifier_value: Option<String>,
    pub expanded_query: String,
}

impl From<ResolvedRule> for ExpandedRule {
    fn from(resolved: ResolvedRule) -> Self {
        ExpandedRule {
            expanded_query: resolved.expanded_query,
            identifier: resolved.identifier,
            identifier_value: resolved.identifier_value,
        }
    }
}

/// Equality matchers of the first selector named `rule_name`.
pub fn query_labels_for_rule<'a>(rule_name: &str, expr: &'a Expr) -> Vec<&'a LabelMatcher> {
    selectors(expr)
        .into_iter()
        .find(|found| found.name() == Some(rule_name))
        .map(|found| found.selector.equality_matchers().collect())
        .unwrap_or_default()
}

/// Picks the candidate of `rule_name` that applies to `query`.
///
/// A labelled candidate whose labels all match the query wins; otherwise the
/// default candidate without labels applies. `Ok(None)` means the occurrence
/// could not be resolved.
pub fn resolve(
    query: &str,
    rule_name: &str,
    candidates: &[RuleCandidate],
) -> Result<Option<ResolvedRule>, PromqlError> {
    let expr = PromqlParser.parse(query)?;
    Ok(resolve_in_expr(&expr, rule_name, candidates))
}

pub(crate) fn resolve_in_expr(
    expr: &Expr,
    rule_name: &str,
    candidates: &[RuleCandidate],
) -> Option<ResolvedRule> {
    match candidates {
        [] => return None,
        [only] => {
            return Some(ResolvedRule {
                index: 0,
                identifier: None,
                identifier_value: None,
                expanded_query: only.query.clone(),
            });
        }
        _ => {}
    }

    let labels = query_labels_for_rule(rule_name, expr);
    if labels.is_empty() {
        return None;
    }
    let has_label = |key: &String, value: &String| {
        labels
            .iter()
            .any(|matcher| &matcher.key == key && &matcher.value == value)
    };

    let labelled = candidates.iter().enumerate().find(|(_, candidate)| {
        !candidate.labels.is_empty()
            && candidate
                .labels
                .iter()
                .all(|(key, value)| has_label(key, value))
    });
    if let Some((index, candidate)) = labelled {
        let (identifier, identifier_value) = candidate
            .labels
            .iter()
            .next()
            .map(|(key, value)| (key.clone(), value.clone()))
            .unzip();
        return Some(ResolvedRule {
            index,
            identifier,
            identifier_value,
            expanded_query: candidate.query.clone(),
        });
    }

    candidates
        .iter()
        .position(|candidate| candidate.labels.is_empty())
        .map(|index| ResolvedRule {
            index,
            identifier: None,
            identifier_value: None,
            expanded_query: candidates[index].query.clone(),
        })
}

/// Hints for the recording rules of `mapping` that `query` references.
pub fn expand_rules_hints(
    query: &str,
    mapping: &RuleMapping,
) -> Result<Vec<QueryHint>, PromqlError> {
    let referenced = mapping
        .iter()
        .any(|(name, candidates)| !candidates.is_empty() && matcher::matches(query, name));
    if !referenced {
        return Ok(Vec::new());
    }
    let expr = PromqlParser.parse(query)?;
    Ok(rule_hints(query, &expr, mapping))
}

const EXPAND_RULES_WARNING_LABEL: &str = "We found multiple recording rules that match in this \
     query. To expand the recording rule, add an identifier label/value.";

pub(crate) fn rule_hints(query: &str, expr: &Expr, mapping: &RuleMapping) -> Vec<QueryHint> {
    let mut hints = Vec::new();
    let mut options = BTreeMap::new();
    for (rule_name, candidates) in mapping {
        if candidates.is_empty() || !matcher::matches(query, rule_name) {
            continue;
        }
        match resolve_in_expr(expr, rule_name, candidates) {
            Some(resolved) => {
                options.insert(rule_name.clone(), ExpandedRule::from(resolved));
            }
            None => {
                log::debug!("recording rule `{rule_name}` is ambiguous in query `{query}`");
                hints.push(QueryHint {
                    kind: HintKind::ExpandRulesWarning,
                    label: EXPAND_RULES_WARNING_LABEL.into(),
                    fix: None,
                });
            }
        }
    }
    if !options.is_empty() {
        hints.push(QueryHint {
            kind: HintKind::ExpandRules,
            label: "Query contains recording rules.".into(),
            fix: Some(QueryFix {
                label: "Expand rules".into(),
                action: FixAction {
                    kind: ActionKind::ExpandRules,
                    query: query.to_string(),
                    options: Some(options),
                    prevent_submit: false,
                },
            }),
        });
    }
    hints
}

#[derive(Debug, Default, Deserialize)]
pub struct RuleGroups {
    pub groups: Vec<RuleGroup>,
}

#[derive(Debug, Deserialize)]
pub struct RuleGroup {
    #[serde(default)]
    pub name: String,
    pub rules: Vec<PrometheusRule>,
}

#[derive(Debug, Deserialize)]
pub struct PrometheusRule {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub name: String,
    pub query: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct RulesEnvelope {
    data: RuleGroups,
}

/// Collects the recording rules of a rules API payload into a mapping.
/// Alerting rules are skipped; candidates keep their group order.
pub fn mapping_from_groups(groups: &RuleGroups) -> RuleMapping {
    let mut mapping = RuleMapping::new();
    for rule in groups.groups.iter().flat_map(|group| &group.rules) {
        if !rule.kind.eq_ignore_ascii_case("recording") {
            continue;
        }
        mapping
            .entry(rule.name.clone())
            .or_default()
            .push(RuleCandidate {
                query: rule.query.clone(),
                labels: rule.labels.clone(),
            });
    }
    mapping
}

/// Reads a rule mapping from JSON: a Prometheus `/api/v1/rules` response
/// (with or without the envelope) or the mapping itself. Rules without
/// candidates are dropped.
pub fn parse_rule_mapping(text: &str) -> Result<RuleMapping, serde_json::Error> {
    if let Ok(envelope) = serde_json::from_str::<RulesEnvelope>(text) {
        return Ok(mapping_from_groups(&envelope.data));
    }
    if let Ok(groups) = serde_json::from_str::<RuleGroups>(text) {
        return Ok(mapping_from_groups(&groups));
    }
    let mut mapping = serde_json::from_str::<RuleMapping>(text)?;
    mapping.retain(|_, candidates| !candidates.is_empty());
    Ok(mapping)
}
