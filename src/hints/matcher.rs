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

use std::ops::Range;

/// How an identifier occurs in a query string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenMatch {
    /// A complete token outside any string literal.
    Token,
    /// Only as part of a longer identifier.
    Substring,
    /// Inside a quoted string literal.
    InLiteral,
    NoMatch,
}

/// Whether `name` is referenced as a metric or rule token in `query`.
pub fn matches(query: &str, name: &str) -> bool {
    classify(query, name) == TokenMatch::Token
}

/// Classifies every occurrence of `name` and folds them into one result.
///
/// A literal occurrence wins over everything else: a query that mentions the
/// name inside a string (for example as a `label_replace` argument) is not
/// treated as referencing it.
pub fn classify(query: &str, name: &str) -> TokenMatch {
    let occurrences = classify_occurrences(query, name);
    let has = |kind: TokenMatch| occurrences.iter().any(|(_, found)| *found == kind);
    if has(TokenMatch::InLiteral) {
        TokenMatch::InLiteral
    } else if has(TokenMatch::Token) {
        TokenMatch::Token
    } else if has(TokenMatch::Substring) {
        TokenMatch::Substring
    } else {
        TokenMatch::NoMatch
    }
}

/// Byte offset and classification of each (possibly overlapping) occurrence.
pub fn classify_occurrences(query: &str, name: &str) -> Vec<(usize, TokenMatch)> {
    if query.is_empty() || name.is_empty() {
        return Vec::new();
    }
    let literals = literal_spans(query);
    let mut occurrences = Vec::new();
    let mut from = 0;
    while let Some(offset) = query[from..].find(name) {
        let start = from + offset;
        let end = start + name.len();
        occurrences.push((start, classify_at(query, &literals, start, end)));
        from = start + query[start..].chars().next().map_or(1, char::len_utf8);
    }
    occurrences
}

fn classify_at(query: &str, literals: &[Range<usize>], start: usize, end: usize) -> TokenMatch {
    if literals
        .iter()
        .any(|literal| literal.start < start && end <= literal.end)
    {
        return TokenMatch::InLiteral;
    }
    let before = query[..start].chars().next_back();
    let after = query[end..].chars().next();
    let extends = |ch: Option<char>| ch.is_some_and(|ch| is_identifier_char(ch) || is_quote(ch));
    if extends(before) || extends(after) {
        TokenMatch::Substring
    } else {
        TokenMatch::Token
    }
}

// An unterminated literal runs to the end of the query.
fn literal_spans(query: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut chars = query.char_indices();
    while let Some((start, quote)) = chars.next() {
        if !is_quote(quote) {
            continue;
        }
        let mut end = query.len();
        let mut escaped = false;
        for (idx, ch) in chars.by_ref() {
            if escaped {
                escaped = false;
            } else if ch == '\\' && quote != '`' {
                escaped = true;
            } else if ch == quote {
                end = idx + ch.len_utf8();
                break;
            }
        }
        spans.push(start..end);
    }
    spans
}

fn is_identifier_char(ch: char) -> bool {
    ch.is_alphanumeric() || matches!(ch, '_' | ':')
}

fn is_quote(ch: char) -> bool {
    matches!(ch, '"' | '\'' | '`')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_rule_in_query() {
        assert!(matches(
            "rate(http_requests_total{job=\"api\"}[5m])",
            "http_requests_total"
        ));
        assert!(!matches(
            "rate(cpu_usage{instance=\"localhost\"}[5m])",
            "http_requests_total"
        ));
    }

    #[test]
    fn matches_at_query_edges() {
        assert!(matches("http_requests_total{job=\"api\"}", "http_requests_total"));
        assert!(matches(
            "sum by (instance) (http_requests_total)",
            "http_requests_total"
        ));
        assert!(matches("sum(http_requests_total)", "http_requests_total"));
        assert!(matches("http_requests_total", "http_requests_total"));
        assert!(matches("http_requests_total { job=\"api\" }", "http_requests_total"));
    }

    #[test]
    fn rejects_longer_identifiers() {
        assert!(!matches(
            "rate(http_requests_total_new{job=\"api\"}[5m])",
            "http_requests_total"
        ));
        assert_eq!(
            classify("rate(http_requests_total_new[5m])", "http_requests_total"),
            TokenMatch::Substring
        );
        assert_eq!(
            classify("duration:p95:upper_threshold{}", "duration:p95"),
            TokenMatch::Substring
        );
        assert_eq!(
            classify("upper_threshold:duration:p95{}", "duration:p95"),
            TokenMatch::Substring
        );
    }

    #[test]
    fn rejects_string_literal_usage() {
        assert!(!matches(
            "rate(\"http_requests_total\"{job=\"api\"}[5m])",
            "http_requests_total"
        ));
        assert!(!matches(
            "http_requests_total_bytes{rule=\"http_requests_total\"}",
            "http_requests_total"
        ));
        assert_eq!(
            classify(
                "label_replace(http_requests_total, \"label\", \"value\", \"instance\", \"http_requests_total\")",
                "http_requests_total"
            ),
            TokenMatch::InLiteral
        );
        assert_eq!(
            classify("up{job='my_rule'}", "my_rule"),
            TokenMatch::InLiteral
        );
    }

    #[test]
    fn empty_inputs_never_match() {
        assert!(!matches("", "http_requests_total"));
        assert!(!matches("rate(http_requests_total{job=\"api\"}[5m])", ""));
        assert!(!matches("", ""));
        assert_eq!(classify("", ""), TokenMatch::NoMatch);
    }

    #[test]
    fn matches_around_binary_operators() {
        assert!(matches(
            "rate(http_requests_total{job=\"api\"}[5m]) + my:rule",
            "my:rule"
        ));
        assert!(matches(
            "rate(http_requests_total{job=\"api\"}[5m])+my:rule",
            "my:rule"
        ));
        assert!(matches(
            "sum(rate(http_requests_total[5m]))",
            "http_requests_total"
        ));
    }

    #[test]
    fn matches_names_with_colons() {
        assert!(matches(
            "rate(my_namespace:http_requests_total[5m])",
            "my_namespace:http_requests_total"
        ));
    }

    #[test]
    fn reports_each_occurrence() {
        let found = classify_occurrences("foo + foo_bar + \"foo\"", "foo");
        assert_eq!(
            found,
            vec![
                (0, TokenMatch::Token),
                (6, TokenMatch::Substring),
                (17, TokenMatch::InLiteral),
            ]
        );
    }
}
