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

mod walk;

pub use walk::{SelectorRef, function_names, selectors};

use std::{
    cell::Cell,
    fmt::{self, Display},
};

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_until, take_while, take_while1},
    character::complete::{char, digit1, hex_digit1, multispace0, none_of, satisfy},
    combinator::{all_consuming, cut, map, map_res, not, opt, recognize, value},
    error::{Error as NomError, ErrorKind, context},
    multi::{fold_many0, many1, separated_list0},
    number::complete::{double, recognize_float},
    sequence::{delimited, pair, preceded, terminated},
};
use thiserror::Error;

const AGGREGATION_OPS: &[&str] = &[
    "sum",
    "min",
    "max",
    "avg",
    "group",
    "stddev",
    "stdvar",
    "count",
    "count_values",
    "bottomk",
    "topk",
    "quantile",
    "limitk",
    "limit_ratio",
];

/// Deepest nesting of parentheses, calls, aggregations and unary operators
/// accepted by the parser.
pub const MAX_NESTING_DEPTH: usize = 32;

const PARAMETERISED_AGGREGATIONS: &[&str] = &[
    "count_values",
    "bottomk",
    "topk",
    "quantile",
    "limitk",
    "limit_ratio",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    String(String),
    Selector(VectorSelector),
    Call(Call),
    Aggregate(Aggregate),
    Binary(BinaryExpr),
    Unary(UnaryOp, Box<Expr>),
    Paren(Box<Expr>),
    Subquery(Subquery),
}

impl Expr {
    /// Returns the selector when the whole expression is a plain instant
    /// selector (`name` or `name{...}`) without range, offset or `@`.
    pub fn as_bare_selector(&self) -> Option<&VectorSelector> {
        match self {
            Expr::Selector(selector) if selector.is_instant() => Some(selector),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorSelector {
    pub name: Option<String>,
    pub matchers: Vec<LabelMatcher>,
    pub range: Option<String>,
    pub offset: Option<String>,
    pub at: Option<String>,
    /// Byte range of `name{matchers}` in the parsed query.
    pub span: Span,
}

impl VectorSelector {
    pub fn is_instant(&self) -> bool {
        self.range.is_none() && self.offset.is_none() && self.at.is_none()
    }

    pub fn equality_matchers(&self) -> impl Iterator<Item = &LabelMatcher> {
        self.matchers
            .iter()
            .filter(|matcher| matcher.op == LabelOp::Eq)
    }
}

impl Display for VectorSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.name {
            write!(f, "{name}")?;
        }
        if !self.matchers.is_empty() || self.name.is_none() {
            let matchers = self
                .matchers
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>();
            write!(f, "{{{}}}", matchers.join(", "))?;
        }
        if let Some(range) = &self.range {
            write!(f, "[{range}]")?;
        }
        if let Some(offset) = &self.offset {
            write!(f, " offset {offset}")?;
        }
        if let Some(at) = &self.at {
            write!(f, " @ {at}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMatcher {
    pub key: String,
    pub op: LabelOp,
    pub value: String,
}

impl Display for LabelMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.op {
            LabelOp::Eq => "=",
            LabelOp::NotEq => "!=",
            LabelOp::RegexEq => "=~",
            LabelOp::RegexNotEq => "!~",
        };
        write!(f, "{}{}\"{}\"", self.key, op, escape_string(&self.value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelOp {
    Eq,
    NotEq,
    RegexEq,
    RegexNotEq,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub func: String,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub op: String,
    pub grouping: Option<Grouping>,
    pub param: Option<Box<Expr>>,
    pub expr: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grouping {
    pub without: bool,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinaryExpr {
    pub op: BinaryOp,
    pub lhs: Box<Expr>,
    pub rhs: Box<Expr>,
    pub return_bool: bool,
    pub matching: Option<VectorMatching>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Unless,
    Eql,
    Neq,
    Lte,
    Lss,
    Gte,
    Gtr,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Atan2,
    Pow,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorMatching {
    /// `on(...)` when true, `ignoring(...)` otherwise.
    pub on: bool,
    pub labels: Vec<String>,
    pub group: Option<GroupModifier>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupModifier {
    pub side: GroupSide,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupSide {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subquery {
    pub expr: Box<Expr>,
    pub range: String,
    pub step: Option<String>,
    pub offset: Option<String>,
    pub at: Option<String>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PromqlParser;

impl PromqlParser {
    pub fn parse(&self, input: &str) -> Result<Expr, PromqlError> {
        parse_promql(input)
    }
}

#[derive(Debug, Error)]
pub enum PromqlError {
    #[error("failed to parse PromQL: {0}")]
    Invalid(String),
}

type NomResult<'a, T> = IResult<&'a str, T, NomError<&'a str>>;

fn parse_promql(input: &str) -> Result<Expr, PromqlError> {
    NESTING.with(|depth| depth.set(0));
    let mut expr = all_consuming(delimited(ws, expression, ws))
        .parse(input)
        .map(|(_, expr)| expr)
        .map_err(|err| match err {
            nom::Err::Failure(inner) if inner.code == ErrorKind::TooLarge => {
                PromqlError::Invalid("query nested too deeply".into())
            }
            err => PromqlError::Invalid(err.to_string()),
        })?;
    walk::resolve_spans(&mut expr, input.len());
    Ok(expr)
}

fn expression(input: &str) -> NomResult<'_, Expr> {
    binary_level(input, and_unless_expr, or_operator)
}

fn and_unless_expr(input: &str) -> NomResult<'_, Expr> {
    binary_level(input, comparison_expr, and_unless_operator)
}

fn comparison_expr(input: &str) -> NomResult<'_, Expr> {
    binary_level(input, additive_expr, comparison_operator)
}

fn additive_expr(input: &str) -> NomResult<'_, Expr> {
    binary_level(input, multiplicative_expr, additive_operator)
}

fn multiplicative_expr(input: &str) -> NomResult<'_, Expr> {
    binary_level(input, unary_expr, multiplicative_operator)
}

fn binary_level<'a>(
    input: &'a str,
    operand: fn(&'a str) -> NomResult<'a, Expr>,
    operator: fn(&'a str) -> NomResult<'a, BinaryOp>,
) -> NomResult<'a, Expr> {
    let (mut rest, mut lhs) = operand(input)?;
    loop {
        let (next, op) = match preceded(ws, operator).parse(rest) {
            Ok(parsed) => parsed,
            Err(nom::Err::Error(_)) => return Ok((rest, lhs)),
            Err(err) => return Err(err),
        };
        let (next, (return_bool, matching)) = binary_modifiers(next)?;
        let (next, rhs) = cut(operand).parse(next)?;
        lhs = Expr::Binary(BinaryExpr {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            return_bool,
            matching,
        });
        rest = next;
    }
}

thread_local! {
    static NESTING: Cell<usize> = const { Cell::new(0) };
}

// Every recursive descent (parentheses, call and aggregation arguments,
// unary operators, `^` exponents) goes through `unary_expr`, so one guard
// there bounds the stack.
struct NestingGuard;

impl NestingGuard {
    fn enter(input: &str) -> Result<Self, nom::Err<NomError<&str>>> {
        let depth = NESTING.with(|depth| {
            depth.set(depth.get() + 1);
            depth.get()
        });
        let guard = NestingGuard;
        if depth > MAX_NESTING_DEPTH {
            return Err(nom::Err::Failure(NomError::new(input, ErrorKind::TooLarge)));
        }
        Ok(guard)
    }
}

impl Drop for NestingGuard {
    fn drop(&mut self) {
        NESTING.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

fn unary_expr(input: &str) -> NomResult<'_, Expr> {
    let _guard = NestingGuard::enter(input)?;
    let (rest, _) = ws(input)?;
    match unary_operator(rest) {
        Ok((rest, op)) => {
            let (rest, operand) = cut(unary_expr).parse(rest)?;
            Ok((rest, Expr::Unary(op, Box::new(operand))))
        }
        Err(nom::Err::Error(_)) => power_expr(rest),
        Err(err) => Err(err),
    }
}

// `^` is right-associative and binds tighter than unary minus.
fn power_expr(input: &str) -> NomResult<'_, Expr> {
    let (rest, base) = postfix_expr(input)?;
    match preceded(ws, pow_operator).parse(rest) {
        Ok((next, op)) => {
            let (next, (return_bool, matching)) = binary_modifiers(next)?;
            let (next, exponent) = cut(unary_expr).parse(next)?;
            Ok((
                next,
                Expr::Binary(BinaryExpr {
                    op,
                    lhs: Box::new(base),
                    rhs: Box::new(exponent),
                    return_bool,
                    matching,
                }),
            ))
        }
        Err(nom::Err::Error(_)) => Ok((rest, base)),
        Err(err) => Err(err),
    }
}

#[derive(Debug)]
enum Postfix {
    Range(String),
    Subquery { range: String, step: Option<String> },
    Offset(String),
    At(String),
}

fn postfix_expr(input: &str) -> NomResult<'_, Expr> {
    let (mut rest, mut expr) = preceded(ws, primary).parse(input)?;
    loop {
        match preceded(ws, postfix).parse(rest) {
            Ok((next, modifier)) => {
                expr = apply_postfix(expr, modifier, rest)?;
                rest = next;
            }
            Err(nom::Err::Error(_)) => return Ok((rest, expr)),
            Err(err) => return Err(err),
        }
    }
}

fn apply_postfix(
    expr: Expr,
    modifier: Postfix,
    input: &str,
) -> Result<Expr, nom::Err<NomError<&str>>> {
    match (expr, modifier) {
        (Expr::Selector(mut selector), Postfix::Range(range)) if selector.is_instant() => {
            selector.range = Some(range);
            Ok(Expr::Selector(selector))
        }
        (expr, Postfix::Subquery { range, step }) => Ok(Expr::Subquery(Subquery {
            expr: Box::new(expr),
            range,
            step,
            offset: None,
            at: None,
        })),
        (Expr::Selector(mut selector), Postfix::Offset(offset)) if selector.offset.is_none() => {
            selector.offset = Some(offset);
            Ok(Expr::Selector(selector))
        }
        (Expr::Subquery(mut subquery), Postfix::Offset(offset)) if subquery.offset.is_none() => {
            subquery.offset = Some(offset);
            Ok(Expr::Subquery(subquery))
        }
        (Expr::Selector(mut selector), Postfix::At(at)) if selector.at.is_none() => {
            selector.at = Some(at);
            Ok(Expr::Selector(selector))
        }
        (Expr::Subquery(mut subquery), Postfix::At(at)) if subquery.at.is_none() => {
            subquery.at = Some(at);
            Ok(Expr::Subquery(subquery))
        }
        _ => Err(failure(input)),
    }
}

fn postfix(input: &str) -> NomResult<'_, Postfix> {
    alt((range_brackets, offset_modifier, at_modifier)).parse(input)
}

fn range_brackets(input: &str) -> NomResult<'_, Postfix> {
    context(
        "range",
        map(
            preceded(
                char('['),
                cut(terminated(
                    pair(
                        preceded(ws, duration),
                        opt(preceded(preceded(ws, char(':')), opt(preceded(ws, duration)))),
                    ),
                    preceded(ws, char(']')),
                )),
            ),
            |(range, step)| match step {
                None => Postfix::Range(range),
                Some(step) => Postfix::Subquery { range, step },
            },
        ),
    )
    .parse(input)
}

fn offset_modifier(input: &str) -> NomResult<'_, Postfix> {
    context(
        "offset modifier",
        map(
            preceded(
                keyword("offset"),
                cut(preceded(
                    ws,
                    recognize(pair(opt(char('-')), duration_text)),
                )),
            ),
            |offset: &str| Postfix::Offset(offset.to_string()),
        ),
    )
    .parse(input)
}

fn at_modifier(input: &str) -> NomResult<'_, Postfix> {
    context(
        "@ modifier",
        map(
            preceded(
                char('@'),
                cut(preceded(
                    ws,
                    alt((
                        recognize((
                            alt((keyword("start"), keyword("end"))),
                            ws,
                            char('('),
                            ws,
                            char(')'),
                        )),
                        recognize_float,
                    )),
                )),
            ),
            |at: &str| Postfix::At(at.to_string()),
        ),
    )
    .parse(input)
}

fn duration(input: &str) -> NomResult<'_, String> {
    map(duration_text, str::to_string).parse(input)
}

fn duration_text(input: &str) -> NomResult<'_, &str> {
    context(
        "duration",
        alt((recognize(many1(pair(digit1, duration_unit))), template_variable)),
    )
    .parse(input)
}

fn duration_unit(input: &str) -> NomResult<'_, &str> {
    alt((
        tag("ms"),
        tag("s"),
        tag("m"),
        tag("h"),
        tag("d"),
        tag("w"),
        tag("y"),
    ))
    .parse(input)
}

// Dashboard variables such as `$__rate_interval` or `${interval}`.
fn template_variable(input: &str) -> NomResult<'_, &str> {
    recognize(preceded(
        char('$'),
        alt((
            delimited(char('{'), take_while1(is_label_char), char('}')),
            take_while1(is_label_char),
        )),
    ))
    .parse(input)
}

fn primary(input: &str) -> NomResult<'_, Expr> {
    alt((
        paren_expr,
        map(string_literal, Expr::String),
        anonymous_selector,
        identifier_expr,
        number_literal,
    ))
    .parse(input)
}

fn paren_expr(input: &str) -> NomResult<'_, Expr> {
    map(
        preceded(char('('), cut(terminated(expression, preceded(ws, char(')'))))),
        |expr| Expr::Paren(Box::new(expr)),
    )
    .parse(input)
}

fn anonymous_selector(input: &str) -> NomResult<'_, Expr> {
    let start = input.len();
    let (rest, matchers) = label_matchers(input)?;
    match build_selector(None, matchers, start, rest.len()) {
        Some(selector) => Ok((rest, Expr::Selector(selector))),
        None => Err(failure(input)),
    }
}

fn identifier_expr(input: &str) -> NomResult<'_, Expr> {
    let start = input.len();
    let (rest, ident) = metric_identifier(input)?;
    let (after_ws, _) = ws(rest)?;
    if is_aggregation(ident) && (after_ws.starts_with('(') || grouping(after_ws).is_ok()) {
        return aggregation(ident, after_ws);
    }
    if after_ws.starts_with('(') {
        return function_call(ident, after_ws);
    }
    if after_ws.starts_with('{') {
        let (rest, matchers) = label_matchers(after_ws)?;
        return match build_selector(Some(ident.to_string()), matchers, start, rest.len()) {
            Some(selector) => Ok((rest, Expr::Selector(selector))),
            None => Err(failure(input)),
        };
    }
    if ident.eq_ignore_ascii_case("inf") {
        return Ok((rest, Expr::Number(f64::INFINITY)));
    }
    if ident.eq_ignore_ascii_case("nan") {
        return Ok((rest, Expr::Number(f64::NAN)));
    }
    match build_selector(Some(ident.to_string()), Vec::new(), start, rest.len()) {
        Some(selector) => Ok((rest, Expr::Selector(selector))),
        None => Err(failure(input)),
    }
}

// Spans are recorded as remaining-input lengths here and turned into byte
// offsets once the whole query has been consumed.
fn build_selector(
    name: Option<String>,
    mut matchers: Vec<LabelMatcher>,
    start_remaining: usize,
    end_remaining: usize,
) -> Option<VectorSelector> {
    let name = match name {
        Some(name) => Some(name),
        None => matchers
            .iter()
            .position(|matcher| matcher.key == "__name__" && matcher.op == LabelOp::Eq)
            .map(|idx| matchers.remove(idx).value),
    };
    if name.is_none() && matchers.is_empty() {
        return None;
    }
    Some(VectorSelector {
        name,
        matchers,
        range: None,
        offset: None,
        at: None,
        span: Span {
            start: start_remaining,
            end: end_remaining,
        },
    })
}

fn aggregation<'a>(op: &str, input: &'a str) -> NomResult<'a, Expr> {
    let (rest, leading) = opt(terminated(grouping, ws)).parse(input)?;
    let (rest, args) = call_arguments(rest)?;
    let (rest, trailing) = opt(preceded(ws, grouping)).parse(rest)?;
    if leading.is_some() && trailing.is_some() {
        return Err(failure(rest));
    }
    let op = op.to_ascii_lowercase();
    let parameterised = PARAMETERISED_AGGREGATIONS.contains(&op.as_str());
    let mut args = args.into_iter();
    let (param, expr) = match (parameterised, args.next(), args.next(), args.next()) {
        (false, Some(expr), None, None) => (None, expr),
        (true, Some(param), Some(expr), None) => (Some(Box::new(param)), expr),
        _ => return Err(failure(input)),
    };
    Ok((
        rest,
        Expr::Aggregate(Aggregate {
            op,
            grouping: leading.or(trailing),
            param,
            expr: Box::new(expr),
        }),
    ))
}

fn function_call<'a>(name: &str, input: &'a str) -> NomResult<'a, Expr> {
    let (rest, args) = call_arguments(input)?;
    Ok((
        rest,
        Expr::Call(Call {
            func: name.to_string(),
            args,
        }),
    ))
}

fn call_arguments(input: &str) -> NomResult<'_, Vec<Expr>> {
    context(
        "argument list",
        preceded(
            char('('),
            cut(terminated(
                separated_list0(preceded(ws, char(',')), expression),
                preceded(ws, char(')')),
            )),
        ),
    )
    .parse(input)
}

fn grouping(input: &str) -> NomResult<'_, Grouping> {
    context(
        "grouping",
        map(
            pair(
                alt((value(false, keyword("by")), value(true, keyword("without")))),
                preceded(ws, label_list),
            ),
            |(without, labels)| Grouping { without, labels },
        ),
    )
    .parse(input)
}

fn binary_modifiers(input: &str) -> NomResult<'_, (bool, Option<VectorMatching>)> {
    let (input, return_bool) = opt(preceded(ws, keyword("bool"))).parse(input)?;
    let (input, matching) = opt(vector_matching).parse(input)?;
    Ok((input, (return_bool.is_some(), matching)))
}

fn vector_matching(input: &str) -> NomResult<'_, VectorMatching> {
    map(
        (
            preceded(
                ws,
                alt((value(true, keyword("on")), value(false, keyword("ignoring")))),
            ),
            cut(preceded(ws, label_list)),
            opt(group_modifier),
        ),
        |(on, labels, group)| VectorMatching { on, labels, group },
    )
    .parse(input)
}

fn group_modifier(input: &str) -> NomResult<'_, GroupModifier> {
    map(
        pair(
            preceded(
                ws,
                alt((
                    value(GroupSide::Left, keyword("group_left")),
                    value(GroupSide::Right, keyword("group_right")),
                )),
            ),
            opt(preceded(ws, label_list)),
        ),
        |(side, labels)| GroupModifier {
            side,
            labels: labels.unwrap_or_default(),
        },
    )
    .parse(input)
}

fn label_list(input: &str) -> NomResult<'_, Vec<String>> {
    context(
        "label list",
        delimited(
            char('('),
            terminated(
                separated_list0(preceded(ws, char(',')), preceded(ws, label_name)),
                opt(preceded(ws, char(','))),
            ),
            preceded(ws, char(')')),
        ),
    )
    .parse(input)
}

fn or_operator(input: &str) -> NomResult<'_, BinaryOp> {
    value(BinaryOp::Or, keyword("or")).parse(input)
}

fn and_unless_operator(input: &str) -> NomResult<'_, BinaryOp> {
    alt((
        value(BinaryOp::And, keyword("and")),
        value(BinaryOp::Unless, keyword("unless")),
    ))
    .parse(input)
}

fn comparison_operator(input: &str) -> NomResult<'_, BinaryOp> {
    alt((
        value(BinaryOp::Eql, tag("==")),
        value(BinaryOp::Neq, tag("!=")),
        value(BinaryOp::Gte, tag(">=")),
        value(BinaryOp::Lte, tag("<=")),
        value(BinaryOp::Gtr, tag(">")),
        value(BinaryOp::Lss, tag("<")),
    ))
    .parse(input)
}

fn additive_operator(input: &str) -> NomResult<'_, BinaryOp> {
    alt((value(BinaryOp::Add, char('+')), value(BinaryOp::Sub, char('-')))).parse(input)
}

fn multiplicative_operator(input: &str) -> NomResult<'_, BinaryOp> {
    alt((
        value(BinaryOp::Mul, char('*')),
        value(BinaryOp::Div, char('/')),
        value(BinaryOp::Mod, char('%')),
        value(BinaryOp::Atan2, keyword("atan2")),
    ))
    .parse(input)
}

fn pow_operator(input: &str) -> NomResult<'_, BinaryOp> {
    value(BinaryOp::Pow, char('^')).parse(input)
}

fn unary_operator(input: &str) -> NomResult<'_, UnaryOp> {
    alt((value(UnaryOp::Neg, char('-')), value(UnaryOp::Plus, char('+')))).parse(input)
}

fn keyword<'a>(
    word: &'static str,
) -> impl Parser<&'a str, Output = &'a str, Error = NomError<&'a str>> {
    terminated(tag_no_case(word), not(satisfy(is_metric_char)))
}

fn label_matchers(input: &str) -> NomResult<'_, Vec<LabelMatcher>> {
    context(
        "label selector",
        preceded(
            char('{'),
            cut(terminated(
                separated_list0(preceded(ws, char(',')), preceded(ws, label_matcher)),
                pair(opt(preceded(ws, char(','))), preceded(ws, char('}'))),
            )),
        ),
    )
    .parse(input)
}

fn label_matcher(input: &str) -> NomResult<'_, LabelMatcher> {
    context(
        "label matcher",
        map(
            context("label key", label_name)
                .and(preceded(
                    ws,
                    context(
                        "label operator",
                        alt((tag("=~"), tag("!~"), tag("!="), tag("="))),
                    ),
                ))
                .and(preceded(ws, string_literal)),
            |((key, op_str), value)| {
                let op = match op_str {
                    "=~" => LabelOp::RegexEq,
                    "!~" => LabelOp::RegexNotEq,
                    "!=" => LabelOp::NotEq,
                    _ => LabelOp::Eq,
                };
                LabelMatcher { key, op, value }
            },
        ),
    )
    .parse(input)
}

fn number_literal(input: &str) -> NomResult<'_, Expr> {
    context(
        "number",
        alt((hex_number, map(double, Expr::Number))),
    )
    .parse(input)
}

fn hex_number(input: &str) -> NomResult<'_, Expr> {
    map_res(
        preceded(tag_no_case("0x"), hex_digit1),
        |digits: &str| i64::from_str_radix(digits, 16).map(|value| Expr::Number(value as f64)),
    )
    .parse(input)
}

fn string_literal(input: &str) -> NomResult<'_, String> {
    context(
        "string literal",
        alt((double_quoted_literal, single_quoted_literal, backtick_literal)),
    )
    .parse(input)
}

fn double_quoted_literal(input: &str) -> NomResult<'_, String> {
    delimited(
        char('"'),
        cut(fold_many0(
            alt((none_of("\\\""), escaped_char)),
            String::new,
            |mut acc, item| {
                acc.push(item);
                acc
            },
        )),
        char('"'),
    )
    .parse(input)
}

fn single_quoted_literal(input: &str) -> NomResult<'_, String> {
    delimited(
        char('\''),
        cut(fold_many0(
            alt((none_of("\\'"), escaped_char)),
            String::new,
            |mut acc, item| {
                acc.push(item);
                acc
            },
        )),
        char('\''),
    )
    .parse(input)
}

fn backtick_literal(input: &str) -> NomResult<'_, String> {
    delimited(
        char('`'),
        cut(map(take_until("`"), |value: &str| value.to_string())),
        char('`'),
    )
    .parse(input)
}

fn escaped_char(input: &str) -> NomResult<'_, char> {
    preceded(
        char('\\'),
        alt((
            map(char('\\'), |_| '\\'),
            map(char('"'), |_| '"'),
            map(char('\''), |_| '\''),
            map(char('n'), |_| '\n'),
            map(char('r'), |_| '\r'),
            map(char('t'), |_| '\t'),
        )),
    )
    .parse(input)
}

fn metric_identifier(input: &str) -> NomResult<'_, &str> {
    recognize(pair(take_while1(is_metric_start), take_while(is_metric_char))).parse(input)
}

fn label_name(input: &str) -> NomResult<'_, String> {
    map(
        recognize(pair(take_while1(is_label_start), take_while(is_label_char))),
        |ident: &str| ident.to_string(),
    )
    .parse(input)
}

fn ws(input: &str) -> NomResult<'_, &str> {
    multispace0(input)
}

fn failure(input: &str) -> nom::Err<NomError<&str>> {
    nom::Err::Failure(NomError::new(input, ErrorKind::Verify))
}

fn is_aggregation(ident: &str) -> bool {
    AGGREGATION_OPS
        .iter()
        .any(|op| op.eq_ignore_ascii_case(ident))
}

fn is_metric_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || matches!(ch, '_' | ':')
}

fn is_metric_char(ch: char) -> bool {
    is_metric_start(ch) || ch.is_ascii_digit()
}

fn is_label_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

fn is_label_char(ch: char) -> bool {
    is_label_start(ch) || ch.is_ascii_digit()
}

fn escape_string(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            other => escaped.push(other),
        }
    }
    escaped
}
