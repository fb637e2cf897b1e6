//! Recovery of JSON from imperfect structured-output replies

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static LEADING_ARTIFACT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ny\n").unwrap());

static FENCE_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```[\w\s]*?\n").unwrap());

/// Strip the stray `ny` prefix some models emit and any code fences
pub fn repair_json_text(text: &str) -> String {
    let text = LEADING_ARTIFACT.replace(text, " ");
    let text = text.trim();

    if text.starts_with("```") || text.ends_with("```") {
        let unfenced = FENCE_OPEN.replace_all(text, "");
        return unfenced.replace("\n```", "").replace("```", "").trim().to_string();
    }

    text.to_string()
}

/// Parse a reply as JSON, repairing it once if the raw text is not valid
pub fn parse_structured(text: &str) -> Option<Value> {
    serde_json::from_str(text)
        .ok()
        .or_else(|| serde_json::from_str(&repair_json_text(text)).ok())
}
