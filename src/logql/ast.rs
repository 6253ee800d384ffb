//! Syntax tree produced by the LogQL parser. Only the shape needed to
//! validate an expression is kept; nothing here evaluates anything.

use regex::Regex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Expr {
    Log(LogExpr),
    Sample(SampleExpr),
}

impl Expr {
    pub fn is_log(&self) -> bool {
        matches!(self, Self::Log(_))
    }
}

#[derive(Debug, Clone)]
pub struct LogExpr {
    pub selector: Vec<Matcher>,
    pub pipeline: Vec<Stage>,
}

impl LogExpr {
    pub fn unwrap_stage(&self) -> Option<&Unwrap> {
        self.pipeline.iter().find_map(|s| match s {
            Stage::Unwrap(u) => Some(u),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOp {
    Eq,
    Neq,
    Re,
    Nre,
}

#[derive(Debug, Clone)]
pub struct Matcher {
    pub name: String,
    pub op: MatchOp,
    pub value: String,
    /// Anchored compiled pattern for `=~` / `!~`.
    pub regex: Option<Regex>,
}

impl Matcher {
    pub fn matches(&self, v: &str) -> bool {
        match (self.op, &self.regex) {
            (MatchOp::Eq, _) => v == self.value,
            (MatchOp::Neq, _) => v != self.value,
            (MatchOp::Re, Some(re)) => re.is_match(v),
            (MatchOp::Nre, Some(re)) => !re.is_match(v),
            (MatchOp::Re | MatchOp::Nre, None) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineFilterOp {
    Contains,
    NotContains,
    Match,
    NotMatch,
    Pattern,
    NotPattern,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Text(String),
    Ip(String),
}

#[derive(Debug, Clone)]
pub enum Stage {
    LineFilter {
        op: LineFilterOp,
        values: Vec<FilterValue>,
    },
    Parser(ParserStage),
    LineFormat(String),
    LabelFormat(Vec<(String, LabelFormatValue)>),
    LabelFilter(LabelFilter),
    Decolorize,
    Drop(Vec<LabelRef>),
    Keep(Vec<LabelRef>),
    Unwrap(Unwrap),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParserStage {
    Json(Vec<(String, String)>),
    Logfmt {
        strict: bool,
        keep_empty: bool,
        params: Vec<(String, String)>,
    },
    Regexp(String),
    Pattern(String),
    Unpack,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LabelFormatValue {
    /// `dst="{{ .src }}"`
    Template(String),
    /// `dst=src`
    Rename(String),
}

/// Label reference in `drop` / `keep`, optionally constrained to a value.
#[derive(Debug, Clone)]
pub struct LabelRef {
    pub name: String,
    pub matcher: Option<Matcher>,
}

#[derive(Debug, Clone)]
pub enum LabelFilter {
    Matcher(Matcher),
    Ip { name: String, negated: bool, cidr: String },
    Compare {
        name: String,
        op: CompareOp,
        value: CompareValue,
    },
    And(Box<LabelFilter>, Box<LabelFilter>),
    Or(Box<LabelFilter>, Box<LabelFilter>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompareValue {
    Number(f64),
    Duration(Duration),
    Bytes(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnwrapConversion {
    None,
    Duration,
    DurationSeconds,
    Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unwrap {
    pub label: String,
    pub conversion: UnwrapConversion,
}

#[derive(Debug, Clone)]
pub struct LogRange {
    pub log: LogExpr,
    pub interval: Duration,
    pub offset: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grouping {
    pub without: bool,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOp {
    Rate,
    RateCounter,
    CountOverTime,
    BytesRate,
    BytesOverTime,
    AbsentOverTime,
    SumOverTime,
    AvgOverTime,
    MinOverTime,
    MaxOverTime,
    StddevOverTime,
    StdvarOverTime,
    QuantileOverTime,
    FirstOverTime,
    LastOverTime,
}

/// Whether a range aggregation works on log lines, unwrapped samples, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnwrapRule {
    Forbidden,
    Required,
    Optional,
}

impl RangeOp {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "rate" => Self::Rate,
            "rate_counter" => Self::RateCounter,
            "count_over_time" => Self::CountOverTime,
            "bytes_rate" => Self::BytesRate,
            "bytes_over_time" => Self::BytesOverTime,
            "absent_over_time" => Self::AbsentOverTime,
            "sum_over_time" => Self::SumOverTime,
            "avg_over_time" => Self::AvgOverTime,
            "min_over_time" => Self::MinOverTime,
            "max_over_time" => Self::MaxOverTime,
            "stddev_over_time" => Self::StddevOverTime,
            "stdvar_over_time" => Self::StdvarOverTime,
            "quantile_over_time" => Self::QuantileOverTime,
            "first_over_time" => Self::FirstOverTime,
            "last_over_time" => Self::LastOverTime,
            _ => return None,
        })
    }

    pub fn unwrap_rule(self) -> UnwrapRule {
        match self {
            Self::Rate => UnwrapRule::Optional,
            Self::CountOverTime | Self::BytesRate | Self::BytesOverTime | Self::AbsentOverTime => {
                UnwrapRule::Forbidden
            }
            _ => UnwrapRule::Required,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorOp {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    Stddev,
    Stdvar,
    Topk,
    Bottomk,
    Sort,
    SortDesc,
}

impl VectorOp {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "sum" => Self::Sum,
            "avg" => Self::Avg,
            "min" => Self::Min,
            "max" => Self::Max,
            "count" => Self::Count,
            "stddev" => Self::Stddev,
            "stdvar" => Self::Stdvar,
            "topk" => Self::Topk,
            "bottomk" => Self::Bottomk,
            "sort" => Self::Sort,
            "sort_desc" => Self::SortDesc,
            _ => return None,
        })
    }

    pub fn takes_param(self) -> bool {
        matches!(self, Self::Topk | Self::Bottomk)
    }

    pub fn allows_grouping(self) -> bool {
        !matches!(self, Self::Sort | Self::SortDesc)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Or,
    And,
    Unless,
    CmpEq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl BinOp {
    pub fn precedence(self) -> u8 {
        match self {
            Self::Or => 1,
            Self::And | Self::Unless => 2,
            Self::CmpEq | Self::Neq | Self::Gt | Self::Gte | Self::Lt | Self::Lte => 3,
            Self::Add | Self::Sub => 4,
            Self::Mul | Self::Div | Self::Mod => 5,
            Self::Pow => 6,
        }
    }

    pub fn is_comparison(self) -> bool {
        self.precedence() == 3
    }

    pub fn is_set(self) -> bool {
        matches!(self, Self::Or | Self::And | Self::Unless)
    }

    pub fn right_associative(self) -> bool {
        matches!(self, Self::Pow)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VectorMatching {
    pub on: bool,
    pub labels: Vec<String>,
    /// `group_left` (false) / `group_right` (true) with their include labels.
    pub group: Option<(bool, Vec<String>)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BinModifier {
    pub return_bool: bool,
    pub matching: Option<VectorMatching>,
}

#[derive(Debug, Clone)]
pub enum SampleExpr {
    Literal(f64),
    Vector(f64),
    RangeAggregation {
        op: RangeOp,
        param: Option<f64>,
        range: Box<LogRange>,
        grouping: Option<Grouping>,
    },
    VectorAggregation {
        op: VectorOp,
        param: Option<f64>,
        inner: Box<SampleExpr>,
        grouping: Option<Grouping>,
    },
    Binary {
        op: BinOp,
        modifier: BinModifier,
        lhs: Box<SampleExpr>,
        rhs: Box<SampleExpr>,
    },
    LabelReplace {
        inner: Box<SampleExpr>,
        dst: String,
        replacement: String,
        src: String,
        regex: String,
    },
}

impl SampleExpr {
    pub fn is_literal(&self) -> bool {
        matches!(self, Self::Literal(_))
    }
}
