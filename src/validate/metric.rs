use regex::Regex;
use std::sync::LazyLock;

static METRIC_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z_:][a-zA-Z0-9_:]*$").expect("metric name pattern is a valid regex")
});

/// Reports whether `name` is usable as the output series of a recording rule.
pub fn is_valid_metric_name(name: &str) -> bool {
    METRIC_NAME_RE.is_match(name)
}
