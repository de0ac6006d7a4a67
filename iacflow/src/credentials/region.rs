//! AWS region normalization and validation.

use regex::Regex;
use std::sync::LazyLock;

/// Shape every region handed to the IaC tool must have.
static STRICT_REGION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-z]{2}-(?:gov-)?[a-z]+-\d$").ok());

/// A region whose trailing digit lost its hyphen, e.g. `ap-south1`.
static MISSING_HYPHEN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^([a-z]{2}-(?:gov-)?[a-z]+)(\d)$").ok());

/// Returns true if `region` looks like `xx-yyyy-#`.
#[must_use]
pub fn is_valid_aws_region(region: &str) -> bool {
    STRICT_REGION
        .as_ref()
        .is_some_and(|re| re.is_match(region))
}

/// Repairs common region typos.
///
/// Trims and lowercases the value, turns underscores into hyphens and puts
/// back a missing hyphen before the trailing digit (`ap-south1` becomes
/// `ap-south-1`). An empty value yields `default_region`. Values that are
/// still malformed are returned as-is so the runner can reject them.
#[must_use]
pub fn normalize_aws_region(region: Option<&str>, default_region: &str) -> String {
    let cleaned = region
        .map(|r| r.trim().to_ascii_lowercase().replace('_', "-"))
        .unwrap_or_default();
    if cleaned.is_empty() {
        return default_region.to_string();
    }
    if is_valid_aws_region(&cleaned) {
        return cleaned;
    }

    if let Some(caps) = MISSING_HYPHEN.as_ref().and_then(|re| re.captures(&cleaned)) {
        return format!("{}-{}", &caps[1], &caps[2]);
    }
    cleaned
}
