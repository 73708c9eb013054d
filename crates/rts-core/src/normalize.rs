//! Pure functions used by the session manager's aggregation keys: URL
//! normalization (spec section 4.6) and Web Vitals rating thresholds
//! (spec section 4.6 / glossary).

use once_cell::sync::Lazy;
use regex::Regex;

use crate::event::VitalRating;

static UUID_SEGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$",
    )
    .unwrap()
});

static HEX24_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^[0-9a-f]{24}$").unwrap());

static NUMERIC_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+$").unwrap());

/// Replaces path segments that look like a uuid, a 24-char hex id (e.g. a
/// Mongo ObjectId), or a plain numeric id with `:id`, and strips the query
/// string. Used to build the `"<METHOD> <normalized_url>"` aggregation
/// key.
pub fn normalize_url(url: &str) -> String {
    let without_query = url.split('?').next().unwrap_or(url);

    // Split off the scheme+host prefix (if any) so path-segment matching
    // only runs over the path, not a numeric port or a hex-looking host
    // label.
    let (prefix, path) = match without_query.find("://") {
        Some(scheme_end) => {
            let after_scheme = &without_query[scheme_end + 3..];
            match after_scheme.find('/') {
                Some(path_start) => (
                    &without_query[..scheme_end + 3 + path_start],
                    &after_scheme[path_start..],
                ),
                None => (without_query, ""),
            }
        }
        None => ("", without_query),
    };

    let normalized_path: Vec<String> = path
        .split('/')
        .map(|segment| {
            if segment.is_empty() {
                segment.to_string()
            } else if UUID_SEGMENT.is_match(segment)
                || HEX24_SEGMENT.is_match(segment)
                || NUMERIC_SEGMENT.is_match(segment)
            {
                ":id".to_string()
            } else {
                segment.to_string()
            }
        })
        .collect();

    format!("{prefix}{}", normalized_path.join("/"))
}

/// Builds the `"<METHOD> <normalized_url>"` endpoint aggregation key.
pub fn endpoint_key(method: &str, url: &str) -> String {
    format!("{} {}", method.to_uppercase(), normalize_url(url))
}

/// Rates a Web Vital value against the fixed per-metric thresholds of
/// spec section 4.6. Unrecognized metric names rate `Good` rather than
/// erroring, since the collector does not interpret vitals semantically
/// beyond this classification.
pub fn rate_web_vital(metric_name: &str, value: f64) -> VitalRating {
    let (good_max, needs_improvement_max) = match metric_name.to_uppercase().as_str() {
        "LCP" => (2500.0, 4000.0),
        "FCP" => (1800.0, 3000.0),
        "CLS" => (0.1, 0.25),
        "TTFB" => (800.0, 1800.0),
        "FID" => (100.0, 300.0),
        "INP" => (200.0, 500.0),
        _ => return VitalRating::Good,
    };

    if value <= good_max {
        VitalRating::Good
    } else if value <= needs_improvement_max {
        VitalRating::NeedsImprovement
    } else {
        VitalRating::Poor
    }
}
