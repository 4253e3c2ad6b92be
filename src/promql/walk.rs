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

use super::{Expr, Span, VectorSelector};

/// A leaf selector together with the names of the calls and aggregations
/// that wrap it, outermost first.
#[derive(Debug, Clone)]
pub struct SelectorRef<'a> {
    pub selector: &'a VectorSelector,
    pub enclosing: Vec<&'a str>,
}

impl<'a> SelectorRef<'a> {
    pub fn name(&self) -> Option<&'a str> {
        self.selector.name.as_deref()
    }

    pub fn is_wrapped_by(&self, functions: &[&str]) -> bool {
        self.enclosing
            .iter()
            .any(|name| functions.iter().any(|func| func.eq_ignore_ascii_case(name)))
    }
}

/// Flattens `expr` into its leaf selectors.
///
/// The order is depth-first pre-order with children visited left to right,
/// so it matches the textual order of the selectors in the query.
/// Parentheses never reorder: `(a + b) + c` yields `a`, `b`, `c`, and the
/// first selector returned for a given name is its leftmost occurrence.
pub fn selectors(expr: &Expr) -> Vec<SelectorRef<'_>> {
    let mut found = Vec::new();
    let mut enclosing = Vec::new();
    collect_selectors(expr, &mut enclosing, &mut found);
    found
}

/// Names of every function call in `expr`, in the same order as [`selectors`].
pub fn function_names(expr: &Expr) -> Vec<&str> {
    let mut names = Vec::new();
    collect_functions(expr, &mut names);
    names
}

fn collect_selectors<'a>(
    expr: &'a Expr,
    enclosing: &mut Vec<&'a str>,
    found: &mut Vec<SelectorRef<'a>>,
) {
    match expr {
        Expr::Selector(selector) => found.push(SelectorRef {
            selector,
            enclosing: enclosing.clone(),
        }),
        Expr::Call(call) => {
            enclosing.push(call.func.as_str());
            for arg in &call.args {
                collect_selectors(arg, enclosing, found);
            }
            enclosing.pop();
        }
        Expr::Aggregate(aggregate) => {
            enclosing.push(aggregate.op.as_str());
            if let Some(param) = &aggregate.param {
                collect_selectors(param, enclosing, found);
            }
            collect_selectors(&aggregate.expr, enclosing, found);
            enclosing.pop();
        }
        Expr::Binary(binary) => {
            collect_selectors(&binary.lhs, enclosing, found);
            collect_selectors(&binary.rhs, enclosing, found);
        }
        Expr::Unary(_, inner) | Expr::Paren(inner) => collect_selectors(inner, enclosing, found),
        Expr::Subquery(subquery) => collect_selectors(&subquery.expr, enclosing, found),
        Expr::Number(_) | Expr::String(_) => {}
    }
}

fn collect_functions<'a>(expr: &'a Expr, names: &mut Vec<&'a str>) {
    match expr {
        Expr::Call(call) => {
            names.push(call.func.as_str());
            for arg in &call.args {
                collect_functions(arg, names);
            }
        }
        Expr::Aggregate(aggregate) => {
            if let Some(param) = &aggregate.param {
                collect_functions(param, names);
            }
            collect_functions(&aggregate.expr, names);
        }
        Expr::Binary(binary) => {
            collect_functions(&binary.lhs, names);
            collect_functions(&binary.rhs, names);
        }
        Expr::Unary(_, inner) | Expr::Paren(inner) => collect_functions(inner, names),
        Expr::Subquery(subquery) => collect_functions(&subquery.expr, names),
        Expr::Selector(_) | Expr::Number(_) | Expr::String(_) => {}
    }
}

// Converts the remaining-input lengths recorded while parsing into byte
// offsets from the start of the query.
pub(super) fn resolve_spans(expr: &mut Expr, total: usize) {
    match expr {
        Expr::Selector(selector) => {
            selector.span = Span {
                start: total - selector.span.start,
                end: total - selector.span.end,
            };
        }
        Expr::Call(call) => {
            for arg in &mut call.args {
                resolve_spans(arg, total);
            }
        }
        Expr::Aggregate(aggregate) => {
            if let Some(param) = aggregate.param.as_mut() {
                resolve_spans(param, total);
            }
            resolve_spans(&mut aggregate.expr, total);
        }
        Expr::Binary(binary) => {
            resolve_spans(&mut binary.lhs, total);
            resolve_spans(&mut binary.rhs, total);
        }
        Expr::Unary(_, inner) | Expr::Paren(inner) => resolve_spans(inner, total),
        Expr::Subquery(subquery) => resolve_spans(&mut subquery.expr, total),
        Expr::Number(_) | Expr::String(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::promql::PromqlParser;

    fn names(query: &str) -> Vec<String> {
        let expr = PromqlParser.parse(query).unwrap();
        selectors(&expr)
            .iter()
            .filter_map(|found| found.name().map(str::to_string))
            .collect()
    }

    #[test]
    fn flattens_left_to_right_ignoring_parentheses() {
        assert_eq!(
            names("(metric_55m{uuid=\"222\"} + metric_33m{uuid=\"333\"}) + metric_5m{uuid=\"111\"}"),
            vec!["metric_55m", "metric_33m", "metric_5m"]
        );
        assert_eq!(
            names("metric_7n{} + (metric_5m{uuid=\"333\"} + metric_55m{uuid=\"222\"})"),
            vec!["metric_7n", "metric_5m", "metric_55m"]
        );
    }

    #[test]
    fn records_enclosing_calls_and_aggregations() {
        let expr = PromqlParser
            .parse("sum by (le) (rate(foo_bucket[5m])) / ignoring(le) count(bar)")
            .unwrap();
        let found = selectors(&expr);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].enclosing, vec!["sum", "rate"]);
        assert!(found[0].is_wrapped_by(&["rate", "increase"]));
        assert_eq!(found[1].enclosing, vec!["count"]);
        assert!(!found[1].is_wrapped_by(&["rate", "increase"]));
    }

    #[test]
    fn lists_function_names() {
        let expr = PromqlParser
            .parse("histogram_avg(rate(foo[5m])) + sum(abs(bar))")
            .unwrap();
        assert_eq!(function_names(&expr), vec!["histogram_avg", "rate", "abs"]);
    }
}
