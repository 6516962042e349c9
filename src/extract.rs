//! Structured extraction from free-form agent text.
//!
//! Agents are asked for strict JSON but cannot be trusted to produce it,
//! so every structured field the protocols depend on (agreement level,
//! verdict tag, peer ranking) is parsed by an explicit, documented
//! grammar. The rules here ARE the protocol: two implementations
//! following this module produce identical results on the same text.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Extract a JSON object from text.
///
/// Grammar: parse the whole trimmed text as a JSON object; otherwise
/// scan for the first balanced `{…}` region by brace depth and parse
/// that. Anything else yields `None`.
pub fn json_object(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() {
            return Some(value);
        }
    }

    let start = trimmed.find('{')?;
    let mut depth = 0usize;
    for (offset, ch) in trimmed[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &trimmed[start..start + offset + 1];
                    return serde_json::from_str::<Value>(candidate)
                        .ok()
                        .filter(Value::is_object);
                }
            }
            _ => {}
        }
    }
    None
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+(?:\.\d+)?").expect("static regex"))
}

/// Extract an agreement level in [0,1].
///
/// Grammar: the numeric `agreement_level` field of the embedded JSON
/// object, when present and within [0,1]; else the last standalone
/// decimal in [0,1] anywhere in the text; else 0.0 (no agreement).
pub fn agreement_level(text: &str) -> f64 {
    if let Some(obj) = json_object(text) {
        if let Some(level) = obj.get("agreement_level").and_then(Value::as_f64) {
            if (0.0..=1.0).contains(&level) {
                return level;
            }
        }
    }
    last_unit_interval_number(text).unwrap_or(0.0)
}

/// The last standalone decimal in [0,1] in the text, if any.
///
/// A number is standalone when it is not embedded in a larger token:
/// not preceded or followed by an alphanumeric character, and not
/// preceded by a digit or decimal point.
fn last_unit_interval_number(text: &str) -> Option<f64> {
    let mut found = None;
    for m in number_re().find_iter(text) {
        let prev = text[..m.start()].chars().next_back();
        let next = text[m.end()..].chars().next();
        if prev.is_some_and(|c| c.is_alphanumeric() || c == '.' || c == '_') {
            continue;
        }
        if next.is_some_and(|c| c.is_alphanumeric() || c == '_') {
            continue;
        }
        if let Ok(value) = m.as_str().parse::<f64>() {
            if (0.0..=1.0).contains(&value) {
                found = Some(value);
            }
        }
    }
    found
}

/// Side of a debate, as declared by the judge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WinnerTag {
    Pro,
    Con,
}

impl std::fmt::Display for WinnerTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pro => write!(f, "pro"),
            Self::Con => write!(f, "con"),
        }
    }
}

/// Structured fields parsed from a judge response.
#[derive(Debug, Clone, PartialEq)]
pub struct VerdictFields {
    pub winner: WinnerTag,
    pub score_pro: f64,
    pub score_con: f64,
}

/// Parse a judge verdict.
///
/// Grammar: the JSON object's `winner` field must equal `pro` or `con`
/// (ASCII case-insensitive); without it there is no verdict. Scores are
/// the numeric `score_pro` / `score_con` fields clamped to [0,1],
/// defaulting to 0.5 when absent.
pub fn verdict(text: &str) -> Option<VerdictFields> {
    let obj = json_object(text)?;
    let winner = match obj.get("winner").and_then(Value::as_str)? {
        w if w.eq_ignore_ascii_case("pro") => WinnerTag::Pro,
        w if w.eq_ignore_ascii_case("con") => WinnerTag::Con,
        _ => return None,
    };
    let score = |key: &str| {
        obj.get(key)
            .and_then(Value::as_f64)
            .map(|s| s.clamp(0.0, 1.0))
            .unwrap_or(0.5)
    };
    Some(VerdictFields {
        winner,
        score_pro: score("score_pro"),
        score_con: score("score_con"),
    })
}

/// Parse a peer ranking against a known label set, best first.
///
/// Grammar: a `ranking` array of labels in preference order, or a
/// legacy `rankings` map of label to numeric rank (1 = best) sorted
/// ascending with ties broken by label. Labels outside `known` and
/// duplicates are dropped. Any other shape is an abstention (empty).
pub fn ranking(text: &str, known: &[String]) -> Vec<String> {
    let Some(obj) = json_object(text) else {
        return Vec::new();
    };

    let ordered: Vec<String> = if let Some(list) = obj.get("ranking").and_then(Value::as_array) {
        list.iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    } else if let Some(map) = obj.get("rankings").and_then(Value::as_object) {
        let mut pairs: Vec<(String, f64)> = map
            .iter()
            .filter_map(|(label, rank)| rank.as_f64().map(|r| (label.clone(), r)))
            .collect();
        pairs.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        pairs.into_iter().map(|(label, _)| label).collect()
    } else {
        return Vec::new();
    };

    let mut seen = std::collections::HashSet::new();
    ordered
        .into_iter()
        .filter(|label| known.contains(label) && seen.insert(label.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_object_whole_text() {
        let obj = json_object(r#"{"opinion": "fine", "confidence": 0.9}"#).unwrap();
        assert_eq!(obj["confidence"], 0.9);
    }

    #[test]
    fn test_json_object_embedded() {
        let text = "Sure, here is the JSON:\n{\"winner\": \"pro\"}\nHope that helps.";
        let obj = json_object(text).unwrap();
        assert_eq!(obj["winner"], "pro");
    }

    #[test]
    fn test_json_object_nested_braces() {
        let text = "prefix {\"a\": {\"b\": 1}} suffix";
        let obj = json_object(text).unwrap();
        assert_eq!(obj["a"]["b"], 1);
    }

    #[test]
    fn test_json_object_none() {
        assert!(json_object("no json here").is_none());
        assert!(json_object("{broken").is_none());
        assert!(json_object("[1, 2, 3]").is_none());
    }

    #[test]
    fn test_agreement_from_field() {
        let text = r#"{"agreement_level": 0.85, "reasoning": "solid"}"#;
        assert!((agreement_level(text) - 0.85).abs() < f64::EPSILON);
    }

    #[test]
    fn test_agreement_field_out_of_range_falls_through() {
        // Out-of-range field is ignored; the prose number wins.
        let text = r#"{"agreement_level": 3.5} I'd put agreement at 0.6"#;
        assert!((agreement_level(text) - 0.6).abs() < f64::EPSILON);
    }

    #[test]
    fn test_agreement_last_number_wins() {
        let text = "Initially I thought 0.4 but on reflection it is 0.9";
        assert!((agreement_level(text) - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_agreement_ignores_embedded_numbers() {
        // 1.2 and 10.85 are outside [0,1]; v2 is not standalone.
        let text = "version v2 scored 1.2 then 10.85 overall";
        assert_eq!(agreement_level(text), 0.0);
    }

    #[test]
    fn test_agreement_default_zero() {
        assert_eq!(agreement_level("no numbers at all"), 0.0);
        assert_eq!(agreement_level(""), 0.0);
    }

    #[test]
    fn test_verdict_parses_winner_and_scores() {
        let text = r#"{"winner": "con", "score_pro": 0.3, "score_con": 0.7}"#;
        let v = verdict(text).unwrap();
        assert_eq!(v.winner, WinnerTag::Con);
        assert!((v.score_pro - 0.3).abs() < f64::EPSILON);
        assert!((v.score_con - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn test_verdict_case_insensitive_and_defaults() {
        let v = verdict(r#"{"winner": "PRO"}"#).unwrap();
        assert_eq!(v.winner, WinnerTag::Pro);
        assert!((v.score_pro - 0.5).abs() < f64::EPSILON);
        assert!((v.score_con - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_verdict_clamps_scores() {
        let v = verdict(r#"{"winner": "pro", "score_pro": 1.8, "score_con": -0.2}"#).unwrap();
        assert!((v.score_pro - 1.0).abs() < f64::EPSILON);
        assert_eq!(v.score_con, 0.0);
    }

    #[test]
    fn test_verdict_requires_winner() {
        assert!(verdict(r#"{"score_pro": 0.9}"#).is_none());
        assert!(verdict(r#"{"winner": "draw"}"#).is_none());
        assert!(verdict("the pro side was stronger").is_none());
    }

    fn labels(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_ranking_array_form() {
        let known = labels(&["A", "B", "C"]);
        let order = ranking(r#"{"ranking": ["B", "A", "C"]}"#, &known);
        assert_eq!(order, labels(&["B", "A", "C"]));
    }

    #[test]
    fn test_ranking_map_form_with_tie() {
        let known = labels(&["A", "B", "C"]);
        // B and C tie at rank 2; lexical order breaks the tie.
        let order = ranking(r#"{"rankings": {"C": 2, "A": 1, "B": 2}}"#, &known);
        assert_eq!(order, labels(&["A", "B", "C"]));
    }

    #[test]
    fn test_ranking_drops_unknown_and_duplicates() {
        let known = labels(&["A", "B"]);
        let order = ranking(r#"{"ranking": ["A", "Z", "A", "B"]}"#, &known);
        assert_eq!(order, labels(&["A", "B"]));
    }

    #[test]
    fn test_ranking_unparseable_is_abstention() {
        let known = labels(&["A", "B"]);
        assert!(ranking("I cannot rank these", &known).is_empty());
        assert!(ranking(r#"{"other": true}"#, &known).is_empty());
    }

    #[test]
    fn test_winner_tag_serde() {
        assert_eq!(serde_json::to_string(&WinnerTag::Pro).unwrap(), "\"pro\"");
        let parsed: WinnerTag = serde_json::from_str("\"con\"").unwrap();
        assert_eq!(parsed, WinnerTag::Con);
    }
}
