//! Recursive-descent parser over the token stream.
//!
//! Binary operators use precedence climbing (or < and/unless < comparisons
//! < +,- < *,/,% < ^, with ^ right associative). Log queries may appear at
//! the top level or inside range aggregations; anywhere else a metric query
//! is required.

use super::ParseError;
use super::ast::*;
use super::lexer::{Spanned, Token};
use regex::Regex;
use std::net::IpAddr;
use std::time::Duration;

type PResult<T> = Result<T, ParseError>;

/// Deepest nesting of parenthesised or aggregated sub-expressions.
const MAX_DEPTH: usize = 64;
/// Binary operators and label filter combinators per expression. Each one adds
/// a level to the left-leaning tree.
const MAX_OPERATORS: usize = 1024;

pub struct Parser {
    tokens: Vec<Spanned>,
    i: usize,
    end: usize,
    depth: usize,
    operators: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Spanned>, end: usize) -> Self {
        Self {
            tokens,
            i: 0,
            end,
            depth: 0,
            operators: 0,
        }
    }

    pub fn parse(mut self) -> PResult<Expr> {
        if self.tokens.is_empty() {
            return Err(ParseError::at(self.end, "empty expression"));
        }
        let expr = self.expr(0)?;
        if let Some(t) = self.tokens.get(self.i) {
            return Err(ParseError::at(
                t.pos,
                format!("unexpected {}", t.token.describe()),
            ));
        }
        match &expr {
            Expr::Log(log) if log.unwrap_stage().is_some() => Err(ParseError::at(
                0,
                "unwrap is only allowed inside range aggregations",
            )),
            _ => Ok(expr),
        }
    }

    // ---- token helpers ----

    fn peek(&self) -> Option<&Token> {
        self.peek_n(0)
    }

    fn peek_n(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.i + n).map(|s| &s.token)
    }

    fn pos(&self) -> usize {
        self.tokens.get(self.i).map(|s| s.pos).unwrap_or(self.end)
    }

    fn peek_ident(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s == word)
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        match self.tokens.get(self.i) {
            Some(t) => ParseError::at(
                t.pos,
                format!("unexpected {}, expected {expected}", t.token.describe()),
            ),
            None => ParseError::at(
                self.end,
                format!("unexpected end of input, expected {expected}"),
            ),
        }
    }

    fn expect(&mut self, token: Token, what: &str) -> PResult<usize> {
        if self.peek() == Some(&token) {
            let pos = self.pos();
            self.i += 1;
            Ok(pos)
        } else {
            Err(self.unexpected(what))
        }
    }

    fn expect_ident(&mut self, what: &str) -> PResult<(String, usize)> {
        match self.peek() {
            Some(Token::Ident(s)) => {
                let out = (s.clone(), self.pos());
                self.i += 1;
                Ok(out)
            }
            _ => Err(self.unexpected(what)),
        }
    }

    fn expect_str(&mut self, what: &str) -> PResult<(String, usize)> {
        match self.peek() {
            Some(Token::Str(s)) => {
                let out = (s.clone(), self.pos());
                self.i += 1;
                Ok(out)
            }
            _ => Err(self.unexpected(what)),
        }
    }

    fn expect_duration(&mut self, what: &str) -> PResult<Duration> {
        match self.peek() {
            Some(Token::Duration(d)) => {
                let d = *d;
                self.i += 1;
                Ok(d)
            }
            _ => Err(self.unexpected(what)),
        }
    }

    fn number_literal(&mut self) -> PResult<f64> {
        let sign = match self.peek() {
            Some(Token::Sub) => {
                self.i += 1;
                -1.0
            }
            Some(Token::Add) => {
                self.i += 1;
                1.0
            }
            _ => 1.0,
        };
        match self.peek() {
            Some(Token::Number(n)) => {
                let n = *n;
                self.i += 1;
                Ok(sign * n)
            }
            _ => Err(self.unexpected("number")),
        }
    }

    fn is_comparison_at(&self, n: usize) -> bool {
        matches!(
            self.peek_n(n),
            Some(
                Token::Eq
                    | Token::Neq
                    | Token::Re
                    | Token::Nre
                    | Token::CmpEq
                    | Token::Gt
                    | Token::Gte
                    | Token::Lt
                    | Token::Lte
            )
        )
    }

    fn descend(&mut self) -> PResult<()> {
        if self.depth >= MAX_DEPTH {
            return Err(ParseError::at(self.pos(), "expression nested too deeply"));
        }
        self.depth += 1;
        Ok(())
    }

    fn count_operator(&mut self, pos: usize) -> PResult<()> {
        self.operators += 1;
        if self.operators > MAX_OPERATORS {
            return Err(ParseError::at(pos, "too many operators in expression"));
        }
        Ok(())
    }

    // ---- expressions ----

    fn expr(&mut self, min_prec: u8) -> PResult<Expr> {
        self.descend()?;
        let out = self.binary_expr(min_prec);
        self.depth -= 1;
        out
    }

    fn binary_expr(&mut self, min_prec: u8) -> PResult<Expr> {
        let mut lhs = self.unary()?;
        while let Some(op) = self.peek_binop() {
            if op.precedence() < min_prec {
                break;
            }
            let op_pos = self.pos();
            self.count_operator(op_pos)?;
            self.i += 1;
            let modifier = self.bin_modifier(op)?;
            let next_min = if op.right_associative() {
                op.precedence()
            } else {
                op.precedence() + 1
            };
            let rhs = self.expr(next_min)?;
            let lhs_sample = into_sample(lhs, op_pos, "binary operation")?;
            let rhs_sample = into_sample(rhs, op_pos, "binary operation")?;
            if op.is_set() && (lhs_sample.is_literal() || rhs_sample.is_literal()) {
                return Err(ParseError::at(
                    op_pos,
                    "set operators are not allowed on number literals",
                ));
            }
            lhs = Expr::Sample(SampleExpr::Binary {
                op,
                modifier,
                lhs: Box::new(lhs_sample),
                rhs: Box::new(rhs_sample),
            });
        }
        Ok(lhs)
    }

    fn peek_binop(&self) -> Option<BinOp> {
        Some(match self.peek()? {
            Token::Ident(s) if s == "or" => BinOp::Or,
            Token::Ident(s) if s == "and" => BinOp::And,
            Token::Ident(s) if s == "unless" => BinOp::Unless,
            Token::CmpEq => BinOp::CmpEq,
            Token::Neq => BinOp::Neq,
            Token::Gt => BinOp::Gt,
            Token::Gte => BinOp::Gte,
            Token::Lt => BinOp::Lt,
            Token::Lte => BinOp::Lte,
            Token::Add => BinOp::Add,
            Token::Sub => BinOp::Sub,
            Token::Mul => BinOp::Mul,
            Token::Div => BinOp::Div,
            Token::Mod => BinOp::Mod,
            Token::Pow => BinOp::Pow,
            _ => return None,
        })
    }

    fn bin_modifier(&mut self, op: BinOp) -> PResult<BinModifier> {
        let mut modifier = BinModifier::default();

        if self.peek_ident("bool") {
            if !op.is_comparison() {
                return Err(ParseError::at(
                    self.pos(),
                    "bool modifier can only be used on comparison operators",
                ));
            }
            self.i += 1;
            modifier.return_bool = true;
        }

        let on = self.peek_ident("on");
        if on || self.peek_ident("ignoring") {
            self.i += 1;
            let labels = self.label_list()?;
            let mut matching = VectorMatching {
                on,
                labels,
                group: None,
            };

            let group_right = self.peek_ident("group_right");
            if group_right || self.peek_ident("group_left") {
                if op.is_set() {
                    return Err(ParseError::at(
                        self.pos(),
                        "no grouping allowed for set operations",
                    ));
                }
                self.i += 1;
                let include = if self.peek() == Some(&Token::LParen) {
                    self.label_list()?
                } else {
                    Vec::new()
                };
                matching.group = Some((group_right, include));
            }
            modifier.matching = Some(matching);
        }

        Ok(modifier)
    }

    fn unary(&mut self) -> PResult<Expr> {
        if matches!(self.peek(), Some(Token::Sub | Token::Add)) {
            let pos = self.pos();
            if !matches!(self.peek_n(1), Some(Token::Number(_))) {
                return Err(ParseError::at(
                    pos,
                    "unary operators are only supported on number literals",
                ));
            }
            let n = self.number_literal()?;
            return Ok(Expr::Sample(SampleExpr::Literal(n)));
        }
        self.primary()
    }

    fn primary(&mut self) -> PResult<Expr> {
        let pos = self.pos();
        match self.peek() {
            Some(Token::LParen) => {
                self.i += 1;
                let inner = self.expr(0)?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::Number(n)) => {
                let n = *n;
                self.i += 1;
                Ok(Expr::Sample(SampleExpr::Literal(n)))
            }
            Some(Token::LBrace) => Ok(Expr::Log(self.log_expr()?)),
            Some(Token::Ident(name)) => {
                let name = name.clone();
                if let Some(op) = VectorOp::from_name(&name) {
                    return Ok(Expr::Sample(self.vector_aggregation(op)?));
                }
                if let Some(op) = RangeOp::from_name(&name) {
                    return Ok(Expr::Sample(self.range_aggregation(op)?));
                }
                match name.as_str() {
                    "label_replace" => Ok(Expr::Sample(self.label_replace()?)),
                    "vector" => {
                        self.i += 1;
                        self.expect(Token::LParen, "'(' after vector")?;
                        let n = self.number_literal()?;
                        self.expect(Token::RParen, "')'")?;
                        Ok(Expr::Sample(SampleExpr::Vector(n)))
                    }
                    _ => Err(ParseError::at(pos, format!("unexpected identifier {name:?}"))),
                }
            }
            _ => Err(self.unexpected("expression")),
        }
    }

    fn grouping(&mut self) -> PResult<Option<Grouping>> {
        let without = self.peek_ident("without");
        if !without && !self.peek_ident("by") {
            return Ok(None);
        }
        self.i += 1;
        let labels = self.label_list()?;
        Ok(Some(Grouping { without, labels }))
    }

    fn label_list(&mut self) -> PResult<Vec<String>> {
        self.expect(Token::LParen, "'(' to open label list")?;
        let mut labels = Vec::new();
        loop {
            if self.peek() == Some(&Token::RParen) {
                self.i += 1;
                return Ok(labels);
            }
            let (label, _) = self.expect_ident("label name")?;
            labels.push(label);
            match self.peek() {
                Some(Token::Comma) => self.i += 1,
                Some(Token::RParen) => {}
                _ => return Err(self.unexpected("',' or ')'")),
            }
        }
    }

    fn vector_aggregation(&mut self, op: VectorOp) -> PResult<SampleExpr> {
        let op_pos = self.pos();
        self.i += 1;
        let mut grouping = self.grouping()?;
        self.expect(Token::LParen, "'(' after aggregation")?;

        let param = if op.takes_param() {
            let pos = self.pos();
            let n = self.number_literal()?;
            if n <= 0.0 || n.fract() != 0.0 {
                return Err(ParseError::at(
                    pos,
                    format!("invalid parameter {n} for {op:?}: must be a positive integer"),
                ));
            }
            self.expect(Token::Comma, "','")?;
            Some(n)
        } else {
            None
        };

        let inner_pos = self.pos();
        let inner = into_sample(self.expr(0)?, inner_pos, "vector aggregation")?;
        self.expect(Token::RParen, "')'")?;

        if grouping.is_none() {
            grouping = self.grouping()?;
        }
        if grouping.is_some() && !op.allows_grouping() {
            return Err(ParseError::at(
                op_pos,
                format!("grouping not allowed for {op:?} aggregation"),
            ));
        }

        Ok(SampleExpr::VectorAggregation {
            op,
            param,
            inner: Box::new(inner),
            grouping,
        })
    }

    fn range_aggregation(&mut self, op: RangeOp) -> PResult<SampleExpr> {
        let op_pos = self.pos();
        self.i += 1;
        self.expect(Token::LParen, "'(' after range aggregation")?;

        let param = if op == RangeOp::QuantileOverTime {
            let n = self.number_literal()?;
            self.expect(Token::Comma, "','")?;
            Some(n)
        } else {
            None
        };

        let range = self.log_range()?;
        self.expect(Token::RParen, "')'")?;
        let grouping = self.grouping()?;

        let unwrapped = range.log.unwrap_stage().is_some();
        match op.unwrap_rule() {
            UnwrapRule::Required if !unwrapped => {
                return Err(ParseError::at(
                    op_pos,
                    format!("invalid aggregation {op:?} without unwrap"),
                ));
            }
            UnwrapRule::Forbidden if unwrapped => {
                return Err(ParseError::at(
                    op_pos,
                    format!("invalid aggregation {op:?} with unwrap"),
                ));
            }
            _ => {}
        }
        if grouping.is_some() && !unwrapped {
            return Err(ParseError::at(
                op_pos,
                format!("grouping not allowed for {op:?} aggregation"),
            ));
        }

        Ok(SampleExpr::RangeAggregation {
            op,
            param,
            range: Box::new(range),
            grouping,
        })
    }

    fn log_range(&mut self) -> PResult<LogRange> {
        let mut log = if self.peek() == Some(&Token::LParen) {
            self.i += 1;
            let log = self.log_expr()?;
            self.expect(Token::RParen, "')'")?;
            log
        } else {
            self.log_expr()?
        };

        let range_pos = self.expect(Token::LBracket, "'[' to open range")?;
        let interval = self.expect_duration("range duration")?;
        self.expect(Token::RBracket, "']'")?;
        if interval.is_zero() {
            return Err(ParseError::at(range_pos, "range duration must be greater than zero"));
        }

        let mut offset = self.offset()?;

        // `{app="foo"}[5m] | json` form: pipeline after the range.
        let trailing_pos = self.pos();
        let trailing = self.pipeline()?;
        if !trailing.is_empty() {
            if !log.pipeline.is_empty() {
                return Err(ParseError::at(
                    trailing_pos,
                    "pipeline given both before and after the range",
                ));
            }
            log.pipeline = trailing;
            validate_pipeline(&log.pipeline, trailing_pos)?;
            if offset.is_none() {
                offset = self.offset()?;
            }
        }

        Ok(LogRange {
            log,
            interval,
            offset,
        })
    }

    fn offset(&mut self) -> PResult<Option<Duration>> {
        if !self.peek_ident("offset") {
            return Ok(None);
        }
        self.i += 1;
        Ok(Some(self.expect_duration("offset duration")?))
    }

    fn label_replace(&mut self) -> PResult<SampleExpr> {
        self.i += 1;
        self.expect(Token::LParen, "'(' after label_replace")?;
        let inner_pos = self.pos();
        let inner = into_sample(self.expr(0)?, inner_pos, "label_replace")?;
        self.expect(Token::Comma, "','")?;
        let (dst, dst_pos) = self.expect_str("destination label")?;
        self.expect(Token::Comma, "','")?;
        let (replacement, _) = self.expect_str("replacement")?;
        self.expect(Token::Comma, "','")?;
        let (src, _) = self.expect_str("source label")?;
        self.expect(Token::Comma, "','")?;
        let (regex, regex_pos) = self.expect_str("regex")?;
        self.expect(Token::RParen, "')'")?;

        if !is_label_name(&dst) {
            return Err(ParseError::at(dst_pos, format!("invalid destination label name {dst:?}")));
        }
        compile_regex(&regex, true, regex_pos)?;

        Ok(SampleExpr::LabelReplace {
            inner: Box::new(inner),
            dst,
            replacement,
            src,
            regex,
        })
    }

    // ---- log queries ----

    fn log_expr(&mut self) -> PResult<LogExpr> {
        let selector = self.selector()?;
        let pipeline_pos = self.pos();
        let pipeline = self.pipeline()?;
        validate_pipeline(&pipeline, pipeline_pos)?;
        Ok(LogExpr { selector, pipeline })
    }

    fn selector(&mut self) -> PResult<Vec<Matcher>> {
        let open = self.expect(Token::LBrace, "'{' to open stream selector")?;
        if self.peek() == Some(&Token::RBrace) {
            return Err(ParseError::at(
                open,
                "stream selector must contain at least one matcher",
            ));
        }

        let mut matchers = Vec::new();
        loop {
            let (name, _) = self.expect_ident("label name")?;
            let op = match self.peek() {
                Some(Token::Eq) => MatchOp::Eq,
                Some(Token::Neq) => MatchOp::Neq,
                Some(Token::Re) => MatchOp::Re,
                Some(Token::Nre) => MatchOp::Nre,
                _ => return Err(self.unexpected("label matcher operator")),
            };
            self.i += 1;
            let (value, value_pos) = self.expect_str("label value")?;
            matchers.push(make_matcher(name, op, value, value_pos)?);

            match self.peek() {
                Some(Token::Comma) => self.i += 1,
                Some(Token::RBrace) => {
                    self.i += 1;
                    break;
                }
                _ => return Err(self.unexpected("',' or '}'")),
            }
        }

        if matchers.iter().all(|m| m.matches("")) {
            return Err(ParseError::at(
                open,
                "queries require at least one matcher that does not match the empty string",
            ));
        }
        Ok(matchers)
    }

    fn pipeline(&mut self) -> PResult<Vec<Stage>> {
        let mut stages = Vec::new();
        loop {
            let next_is_value = matches!(self.peek_n(1), Some(Token::Str(_)))
                || matches!(self.peek_n(1), Some(Token::Ident(s)) if s == "ip");
            let op = match self.peek() {
                Some(Token::PipeExact) => LineFilterOp::Contains,
                Some(Token::PipeMatch) => LineFilterOp::Match,
                Some(Token::PipePattern) => LineFilterOp::Pattern,
                Some(Token::NotPattern) => LineFilterOp::NotPattern,
                Some(Token::Neq) if next_is_value => LineFilterOp::NotContains,
                Some(Token::Nre) if next_is_value => LineFilterOp::NotMatch,
                Some(Token::Pipe) => {
                    self.i += 1;
                    stages.push(self.pipe_stage()?);
                    continue;
                }
                _ => return Ok(stages),
            };
            self.i += 1;
            stages.push(self.line_filter(op)?);
        }
    }

    fn line_filter(&mut self, op: LineFilterOp) -> PResult<Stage> {
        let mut values = vec![self.filter_value(op)?];
        while self.peek_ident("or")
            && (matches!(self.peek_n(1), Some(Token::Str(_)))
                || matches!(self.peek_n(1), Some(Token::Ident(s)) if s == "ip"))
        {
            self.i += 1;
            values.push(self.filter_value(op)?);
        }
        Ok(Stage::LineFilter { op, values })
    }

    fn filter_value(&mut self, op: LineFilterOp) -> PResult<FilterValue> {
        if self.peek_ident("ip") {
            let pos = self.pos();
            if !matches!(op, LineFilterOp::Contains | LineFilterOp::NotContains) {
                return Err(ParseError::at(pos, "ip() is only supported with |= and !="));
            }
            self.i += 1;
            let cidr = self.ip_call_arg()?;
            return Ok(FilterValue::Ip(cidr));
        }

        let (value, pos) = self.expect_str("line filter string")?;
        if matches!(op, LineFilterOp::Match | LineFilterOp::NotMatch) {
            compile_regex(&value, false, pos)?;
        }
        Ok(FilterValue::Text(value))
    }

    fn ip_call_arg(&mut self) -> PResult<String> {
        self.expect(Token::LParen, "'(' after ip")?;
        let (cidr, pos) = self.expect_str("ip pattern")?;
        self.expect(Token::RParen, "')'")?;
        if !is_ip_pattern(&cidr) {
            return Err(ParseError::at(pos, format!("invalid ip pattern {cidr:?}")));
        }
        Ok(cidr)
    }

    fn pipe_stage(&mut self) -> PResult<Stage> {
        let pos = self.pos();
        let keyword = match self.peek() {
            Some(Token::Ident(kw)) if !self.is_comparison_at(1) => kw.clone(),
            Some(Token::Ident(_)) | Some(Token::LParen) => {
                return Ok(Stage::LabelFilter(self.label_filter_or()?));
            }
            _ => return Err(self.unexpected("pipeline stage after '|'")),
        };

        let stage = match keyword.as_str() {
            "json" => {
                self.i += 1;
                Stage::Parser(ParserStage::Json(self.extraction_params()?))
            }
            "logfmt" => {
                self.i += 1;
                let (mut strict, mut keep_empty) = (false, false);
                while let Some(Token::Flag(flag)) = self.peek() {
                    match flag.as_str() {
                        "strict" => strict = true,
                        "keep-empty" => keep_empty = true,
                        other => {
                            return Err(ParseError::at(
                                self.pos(),
                                format!("invalid logfmt flag --{other}"),
                            ));
                        }
                    }
                    self.i += 1;
                }
                Stage::Parser(ParserStage::Logfmt {
                    strict,
                    keep_empty,
                    params: self.extraction_params()?,
                })
            }
            "regexp" => {
                self.i += 1;
                let (pattern, pos) = self.expect_str("regexp pattern")?;
                let re = compile_regex(&pattern, false, pos)?;
                if re.capture_names().flatten().next().is_none() {
                    return Err(ParseError::at(
                        pos,
                        "regexp stage requires at least one named capture",
                    ));
                }
                Stage::Parser(ParserStage::Regexp(pattern))
            }
            "pattern" => {
                self.i += 1;
                let (pattern, pos) = self.expect_str("pattern expression")?;
                validate_pattern(&pattern).map_err(|msg| ParseError::at(pos, msg))?;
                Stage::Parser(ParserStage::Pattern(pattern))
            }
            "unpack" => {
                self.i += 1;
                Stage::Parser(ParserStage::Unpack)
            }
            "line_format" => {
                self.i += 1;
                let (template, _) = self.expect_str("line_format template")?;
                Stage::LineFormat(template)
            }
            "label_format" => {
                self.i += 1;
                Stage::LabelFormat(self.label_format()?)
            }
            "decolorize" => {
                self.i += 1;
                Stage::Decolorize
            }
            "drop" => {
                self.i += 1;
                Stage::Drop(self.label_refs()?)
            }
            "keep" => {
                self.i += 1;
                Stage::Keep(self.label_refs()?)
            }
            "unwrap" => {
                self.i += 1;
                Stage::Unwrap(self.unwrap_stage()?)
            }
            other => {
                return Err(ParseError::at(
                    pos,
                    format!("unexpected {other:?} after '|', expected a pipeline stage"),
                ));
            }
        };
        Ok(stage)
    }

    fn extraction_params(&mut self) -> PResult<Vec<(String, String)>> {
        let mut params = Vec::new();
        while matches!(self.peek(), Some(Token::Ident(_)))
            && self.peek_n(1) == Some(&Token::Eq)
            && matches!(self.peek_n(2), Some(Token::Str(_)))
        {
            let (label, _) = self.expect_ident("label name")?;
            self.i += 1;
            let (expr, _) = self.expect_str("extraction expression")?;
            params.push((label, expr));
            if self.peek() == Some(&Token::Comma) && matches!(self.peek_n(1), Some(Token::Ident(_)))
            {
                self.i += 1;
            } else {
                break;
            }
        }
        Ok(params)
    }

    fn label_format(&mut self) -> PResult<Vec<(String, LabelFormatValue)>> {
        let mut out: Vec<(String, LabelFormatValue)> = Vec::new();
        loop {
            let (dst, pos) = self.expect_ident("label name")?;
            self.expect(Token::Eq, "'='")?;
            let value = match self.peek() {
                Some(Token::Str(s)) => LabelFormatValue::Template(s.clone()),
                Some(Token::Ident(s)) => LabelFormatValue::Rename(s.clone()),
                _ => return Err(self.unexpected("template string or label name")),
            };
            self.i += 1;
            if out.iter().any(|(name, _)| *name == dst) {
                return Err(ParseError::at(
                    pos,
                    format!("multiple label name {dst:?} in label_format"),
                ));
            }
            out.push((dst, value));
            if self.peek() == Some(&Token::Comma) {
                self.i += 1;
            } else {
                return Ok(out);
            }
        }
    }

    fn label_refs(&mut self) -> PResult<Vec<LabelRef>> {
        let mut refs = Vec::new();
        loop {
            let (name, _) = self.expect_ident("label name")?;
            let op = match self.peek() {
                Some(Token::Eq) => Some(MatchOp::Eq),
                Some(Token::Neq) => Some(MatchOp::Neq),
                Some(Token::Re) => Some(MatchOp::Re),
                Some(Token::Nre) => Some(MatchOp::Nre),
                _ => None,
            };
            let matcher = match op {
                Some(op) => {
                    self.i += 1;
                    let (value, pos) = self.expect_str("label value")?;
                    Some(make_matcher(name.clone(), op, value, pos)?)
                }
                None => None,
            };
            refs.push(LabelRef { name, matcher });
            if self.peek() == Some(&Token::Comma) {
                self.i += 1;
            } else {
                return Ok(refs);
            }
        }
    }

    fn unwrap_stage(&mut self) -> PResult<Unwrap> {
        let conversion = match self.peek() {
            Some(Token::Ident(f)) if self.peek_n(1) == Some(&Token::LParen) => match f.as_str() {
                "duration" => UnwrapConversion::Duration,
                "duration_seconds" => UnwrapConversion::DurationSeconds,
                "bytes" => UnwrapConversion::Bytes,
                other => {
                    return Err(ParseError::at(
                        self.pos(),
                        format!("unknown unwrap conversion {other:?}"),
                    ));
                }
            },
            _ => UnwrapConversion::None,
        };

        if conversion == UnwrapConversion::None {
            let (label, _) = self.expect_ident("label to unwrap")?;
            return Ok(Unwrap { label, conversion });
        }

        self.i += 1;
        self.expect(Token::LParen, "'('")?;
        let (label, _) = self.expect_ident("label to unwrap")?;
        self.expect(Token::RParen, "')'")?;
        Ok(Unwrap { label, conversion })
    }

    // ---- label filters ----

    fn starts_label_filter(&self, n: usize) -> bool {
        match self.peek_n(n) {
            Some(Token::LParen) => true,
            Some(Token::Ident(_)) => self.is_comparison_at(n + 1),
            _ => false,
        }
    }

    fn label_filter_or(&mut self) -> PResult<LabelFilter> {
        self.descend()?;
        let out = self.label_filter_chain();
        self.depth -= 1;
        out
    }

    fn label_filter_chain(&mut self) -> PResult<LabelFilter> {
        let mut lhs = self.label_filter_and()?;
        while self.peek_ident("or") && self.starts_label_filter(1) {
            self.count_operator(self.pos())?;
            self.i += 1;
            let rhs = self.label_filter_and()?;
            lhs = LabelFilter::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn label_filter_and(&mut self) -> PResult<LabelFilter> {
        let mut lhs = self.label_filter_atom()?;
        loop {
            let explicit = (self.peek_ident("and") || self.peek() == Some(&Token::Comma))
                && self.starts_label_filter(1);
            let implicit = matches!(self.peek(), Some(Token::Ident(s)) if s != "or" && s != "and")
                && self.starts_label_filter(0);
            if !explicit && !implicit {
                return Ok(lhs);
            }
            self.count_operator(self.pos())?;
            if explicit {
                self.i += 1;
            }
            let rhs = self.label_filter_atom()?;
            lhs = LabelFilter::And(Box::new(lhs), Box::new(rhs));
        }
    }

    fn label_filter_atom(&mut self) -> PResult<LabelFilter> {
        if self.peek() == Some(&Token::LParen) {
            self.i += 1;
            let inner = self.label_filter_or()?;
            self.expect(Token::RParen, "')'")?;
            return Ok(inner);
        }

        let (name, name_pos) = self.expect_ident("label filter")?;
        let op_token = match self.peek() {
            Some(t) => t.clone(),
            None => return Err(self.unexpected("comparison operator")),
        };
        self.i += 1;

        // ip("...") filter.
        if matches!(op_token, Token::Eq | Token::Neq) && self.peek_ident("ip") {
            self.i += 1;
            let cidr = self.ip_call_arg()?;
            return Ok(LabelFilter::Ip {
                name,
                negated: op_token == Token::Neq,
                cidr,
            });
        }

        // String matcher.
        if let Some(Token::Str(value)) = self.peek() {
            let value = value.clone();
            let pos = self.pos();
            let op = match op_token {
                Token::Eq => MatchOp::Eq,
                Token::Neq => MatchOp::Neq,
                Token::Re => MatchOp::Re,
                Token::Nre => MatchOp::Nre,
                _ => {
                    return Err(ParseError::at(
                        name_pos,
                        format!("operator {op_token:?} cannot compare label {name:?} to a string"),
                    ));
                }
            };
            self.i += 1;
            return Ok(LabelFilter::Matcher(make_matcher(name, op, value, pos)?));
        }

        let op = match op_token {
            Token::Eq | Token::CmpEq => CompareOp::Eq,
            Token::Neq => CompareOp::Neq,
            Token::Gt => CompareOp::Gt,
            Token::Gte => CompareOp::Gte,
            Token::Lt => CompareOp::Lt,
            Token::Lte => CompareOp::Lte,
            _ => {
                return Err(ParseError::at(
                    name_pos,
                    format!("expected a comparison after label {name:?}"),
                ));
            }
        };
        let value = match self.peek() {
            Some(Token::Duration(d)) => {
                let d = *d;
                self.i += 1;
                CompareValue::Duration(d)
            }
            Some(Token::Bytes(b)) => {
                let b = *b;
                self.i += 1;
                CompareValue::Bytes(b)
            }
            _ => CompareValue::Number(self.number_literal()?),
        };
        Ok(LabelFilter::Compare { name, op, value })
    }
}

fn into_sample(expr: Expr, pos: usize, context: &str) -> PResult<SampleExpr> {
    match expr {
        Expr::Sample(s) => Ok(s),
        Expr::Log(_) => Err(ParseError::at(
            pos,
            format!("{context} requires a metric query, found a log query"),
        )),
    }
}

fn validate_pipeline(pipeline: &[Stage], pos: usize) -> PResult<()> {
    let mut unwrapped = false;
    for stage in pipeline {
        match stage {
            Stage::Unwrap(_) if unwrapped => {
                return Err(ParseError::at(pos, "only one unwrap is allowed per pipeline"));
            }
            Stage::Unwrap(_) => unwrapped = true,
            Stage::LabelFilter(_) => {}
            _ if unwrapped => {
                return Err(ParseError::at(pos, "only label filters may follow unwrap"));
            }
            _ => {}
        }
    }
    Ok(())
}

fn make_matcher(name: String, op: MatchOp, value: String, pos: usize) -> PResult<Matcher> {
    let regex = match op {
        MatchOp::Re | MatchOp::Nre => Some(compile_regex(&value, true, pos)?),
        MatchOp::Eq | MatchOp::Neq => None,
    };
    Ok(Matcher {
        name,
        op,
        value,
        regex,
    })
}

fn compile_regex(pattern: &str, anchored: bool, pos: usize) -> PResult<Regex> {
    let source = if anchored {
        format!("^(?:{pattern})$")
    } else {
        pattern.to_string()
    };
    Regex::new(&source).map_err(|e| ParseError::at(pos, format!("invalid regex {pattern:?}: {e}")))
}

fn is_label_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Single address, CIDR (`10.0.0.0/8`) or range (`10.0.0.1-10.0.0.9`).
fn is_ip_pattern(s: &str) -> bool {
    if let Some((addr, prefix)) = s.split_once('/') {
        let Ok(ip) = addr.trim().parse::<IpAddr>() else {
            return false;
        };
        let max = if ip.is_ipv4() { 32 } else { 128 };
        return prefix.trim().parse::<u8>().is_ok_and(|p| p <= max);
    }
    if let Some((start, end)) = s.split_once('-') {
        return start.trim().parse::<IpAddr>().is_ok() && end.trim().parse::<IpAddr>().is_ok();
    }
    s.trim().parse::<IpAddr>().is_ok()
}

/// Pattern parser expressions: literals and `<capture>`s, at least one named
/// capture, never two captures back to back.
fn validate_pattern(pattern: &str) -> Result<(), String> {
    let mut named = 0usize;
    let mut prev_was_capture = false;
    let mut rest = pattern;

    while !rest.is_empty() {
        let capture = rest.strip_prefix('<').and_then(|r| {
            let end = r.find('>')?;
            let name = &r[..end];
            (name == "_" || is_label_name(name)).then_some((name, end + 2))
        });
        match capture {
            Some((name, len)) => {
                if prev_was_capture {
                    return Err("consecutive captures are not allowed in pattern".to_string());
                }
                if name != "_" {
                    named += 1;
                }
                prev_was_capture = true;
                rest = &rest[len..];
            }
            None => {
                prev_was_capture = false;
                let mut chars = rest.chars();
                chars.next();
                rest = chars.as_str();
            }
        }
    }

    if named == 0 {
        return Err("pattern requires at least one named capture".to_string());
    }
    Ok(())
}
