//! LogQL syntax checking.
//!
//! `parse_expr` accepts the full query language Loki rulers evaluate: stream
//! selectors, line filters, parser stages, label filters and formatting,
//! range and vector aggregations, binary operators with vector matching,
//! `label_replace` and `vector()`. The result is a syntax tree; nothing is
//! evaluated.
//!
//! ```text
//! sum(rate({app="foo"} |= "error" | json | level="error" [5m])) by (job) > 0.05
//! ```

pub mod ast;
pub mod lexer;
mod parser;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parse error at line {line}, col {col}: {message}")]
pub struct ParseError {
    /// Byte offset into the input.
    pub offset: usize,
    pub line: usize,
    pub col: usize,
    pub message: String,
}

impl ParseError {
    /// Error at a byte offset. Line and column are filled in by `parse_expr`.
    pub(crate) fn at(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            line: 1,
            col: 1,
            message: message.into(),
        }
    }

    fn locate(mut self, input: &str) -> Self {
        let offset = self.offset.min(input.len());
        let before = input.get(..offset).unwrap_or(input);
        self.line = before.matches('\n').count() + 1;
        self.col = match before.rfind('\n') {
            Some(nl) => before[nl + 1..].chars().count() + 1,
            None => before.chars().count() + 1,
        };
        self
    }
}

/// Parse a complete LogQL query. The whole input must be consumed.
pub fn parse_expr(input: &str) -> Result<ast::Expr, ParseError> {
    let tokens = lexer::tokenize(input).map_err(|e| e.locate(input))?;
    parser::Parser::new(tokens, input.len())
        .parse()
        .map_err(|e| e.locate(input))
}

#[cfg(test)]
mod tests {
    use super::ast::*;
    use super::*;
    use pretty_assertions::assert_eq;

    const VALID: &[&str] = &[
        r#"{app="foo"}"#,
        r#"{app="foo", env!="dev"} |= "error" != "timeout""#,
        r#"{app=~"foo|bar"} |~ "err.*" !~ "debug" |> "<_> level=<lvl>" !> "x""#,
        r#"{app="foo"} |= "a" or "b""#,
        r#"{app="foo"} |= ip("192.168.0.0/16")"#,
        r#"{app="foo"} | json | level="error""#,
        r#"{app="foo"} | json first="servers[0]", ua="request.headers[\"User-Agent\"]""#,
        r#"{app="foo"} | logfmt --strict --keep-empty"#,
        r#"{app="foo"} | regexp "(?P<method>\\w+) (?P<path>\\S+)""#,
        r#"{app="foo"} | pattern "<ip> - - <_> \"<method> <uri>\"""#,
        r#"{app="foo"} | unpack | line_format "{{.msg}}" | label_format dst="{{.src}}", other=src"#,
        r#"{app="foo"} | decolorize | drop level, method="GET" | keep host"#,
        r#"{app="foo"} | logfmt | status >= 500 and duration > 1s or size < 10KB"#,
        r#"{app="foo"} | logfmt | (status=~"5.." , path!="/health") addr = ip("10.0.0.0/8")"#,
        r#"rate({app="foo"}[5m])"#,
        r#"count_over_time({app="foo"} |= "error" [1h] offset 5m)"#,
        r#"count_over_time({app="foo"}[5m] | json)"#,
        r#"count_over_time(({app="foo"} |= "x")[5m])"#,
        r#"sum_over_time({app="foo"} | logfmt | unwrap bytes(size) | __error__="" [1m]) by (host)"#,
        r#"quantile_over_time(0.99, {app="foo"} | json | unwrap duration(latency) [5m]) by (path)"#,
        r#"rate({app="foo"} | unwrap count [1m])"#,
        r#"sum by (job) (rate({app="foo"}[5m]))"#,
        r#"sum(rate({app="foo"} |= "error" [5m])) by (job) / sum(rate({app="foo"}[5m])) by (job) > 0.05"#,
        r#"topk(3, sum(count_over_time({app="foo"}[1m])) by (host))"#,
        r#"sort_desc(sum(bytes_rate({app="foo"}[1m])))"#,
        r#"sum(rate({a="b"}[1m])) > bool 1"#,
        r#"sum(rate({a="b"}[1m])) by (x) / on (x) group_left (y) sum(rate({a="c"}[1m])) by (x, y)"#,
        r#"sum(rate({a="b"}[1m])) and ignoring (z) sum(rate({a="c"}[1m]))"#,
        r#"label_replace(rate({a="b"}[1m]), "dst", "$1", "src", "(.*)")"#,
        r#"vector(1) + -2 * 3 ^ 2"#,
        r#"absent_over_time({app="foo"}[5m])"#,
        "sum(\n  rate({app=\"foo\"}[5m]) # per-second\n)",
    ];

    const INVALID: &[&str] = &[
        "",
        "this is not a valid expression",
        r#"{}"#,
        r#"{app=~".*"}"#,
        r#"{app="foo""#,
        r#"{app="foo"} |= "#,
        r#"{app="foo"} | json | unwrap latency"#,
        r#"rate({app="foo"})"#,
        r#"rate({app="foo"}[5])"#,
        r#"sum_over_time({app="foo"}[5m])"#,
        r#"count_over_time({app="foo"} | unwrap x [5m])"#,
        r#"count_over_time({app="foo"}[5m]) by (job)"#,
        r#"sum({app="foo"})"#,
        r#"{app="foo"} + 1"#,
        r#"sum(rate({a="b"}[1m])) + bool 1"#,
        r#"1 and 2"#,
        r#"sort by (x) (rate({a="b"}[1m]))"#,
        r#"topk(0.5, rate({a="b"}[1m]))"#,
        r#"{app="foo"} | regexp "(\\w+)""#,
        r#"{app="foo"} | pattern "<a><b>""#,
        r#"{app="foo"} | label_format a="x", a="y""#,
        r#"{app="foo"} |~ "(""#,
        r#"{app="foo"} | logfmt --lenient"#,
        r#"sum(rate({a="b"}[1m])) extra"#,
        r#"-rate({a="b"}[1m])"#,
        r#"rate({a="b"} | unwrap x | json [1m])"#,
    ];

    #[test]
    fn accepts_valid_queries() {
        for q in VALID {
            if let Err(e) = parse_expr(q) {
                panic!("{q:?} should parse: {e}");
            }
        }
    }

    #[test]
    fn rejects_invalid_queries() {
        for q in INVALID {
            assert!(parse_expr(q).is_err(), "{q:?} should not parse");
        }
    }

    #[test]
    fn classifies_log_and_metric_queries() {
        assert!(parse_expr(r#"{app="foo"} |= "x""#).unwrap().is_log());
        assert!(!parse_expr(r#"rate({app="foo"}[1m])"#).unwrap().is_log());
    }

    #[test]
    fn binary_precedence() {
        let Expr::Sample(SampleExpr::Binary { op, rhs, .. }) = parse_expr("1 + 2 * 3").unwrap()
        else {
            panic!("expected binary expression");
        };
        assert_eq!(op, BinOp::Add);
        assert!(matches!(*rhs, SampleExpr::Binary { op: BinOp::Mul, .. }));

        let Expr::Sample(SampleExpr::Binary { op, lhs, .. }) = parse_expr("2 ^ 3 ^ 2").unwrap()
        else {
            panic!("expected binary expression");
        };
        assert_eq!(op, BinOp::Pow);
        assert!(lhs.is_literal());
    }

    #[test]
    fn grouping_before_or_after_body() {
        for q in [
            r#"sum by (job) (rate({a="b"}[1m]))"#,
            r#"sum(rate({a="b"}[1m])) by (job)"#,
        ] {
            let Expr::Sample(SampleExpr::VectorAggregation { grouping, .. }) =
                parse_expr(q).unwrap()
            else {
                panic!("expected aggregation");
            };
            assert_eq!(
                grouping,
                Some(Grouping {
                    without: false,
                    labels: vec!["job".into()],
                })
            );
        }
    }

    #[test]
    fn range_keeps_interval_and_unwrap() {
        let q = r#"avg_over_time({a="b"} | logfmt | unwrap duration_seconds(t) [90s] offset 1m)"#;
        let Expr::Sample(SampleExpr::RangeAggregation { op, range, .. }) = parse_expr(q).unwrap()
        else {
            panic!("expected range aggregation");
        };
        assert_eq!(op, RangeOp::AvgOverTime);
        assert_eq!(range.interval, std::time::Duration::from_secs(90));
        assert_eq!(range.offset, Some(std::time::Duration::from_secs(60)));
        assert_eq!(
            range.log.unwrap_stage(),
            Some(&Unwrap {
                label: "t".into(),
                conversion: UnwrapConversion::DurationSeconds,
            })
        );
    }

    fn nested(depth: usize, inner: &str) -> String {
        format!("{}{inner}{}", "(".repeat(depth), ")".repeat(depth))
    }

    #[test]
    fn deep_nesting_is_an_error() {
        assert!(parse_expr(&nested(20, "1")).is_ok());

        for depth in [65, 300, 10_000] {
            let err = parse_expr(&nested(depth, "1")).unwrap_err();
            assert!(err.message.contains("nested too deeply"), "{depth}: {err}");
        }

        let filters = format!(r#"{{a="b"}} | {}"#, nested(10_000, r#"x="y""#));
        let err = parse_expr(&filters).unwrap_err();
        assert!(err.message.contains("nested too deeply"), "{err}");
    }

    #[test]
    fn long_operator_chains_are_bounded() {
        let chain = |n: usize| format!("1{}", " + 1".repeat(n));
        assert!(parse_expr(&chain(500)).is_ok());
        let err = parse_expr(&chain(5_000)).unwrap_err();
        assert!(err.message.contains("too many operators"), "{err}");

        let filters = format!(r#"{{a="b"}} | x="y"{}"#, r#" and x="y""#.repeat(5_000));
        assert!(parse_expr(&filters).is_err());
    }

    #[test]
    fn error_reports_line_and_column() {
        let err = parse_expr("sum(\n  rate({a=\"b\"}[1m]) )) ").unwrap_err();
        assert_eq!((err.line, err.col), (2, 22));
        assert!(err.to_string().starts_with("parse error at line 2, col 22"));
    }
}
