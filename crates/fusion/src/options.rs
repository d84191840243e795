//! Options store (spec §4's component C): store/total-label alias
//! dictionaries, six keyword sets, tuning scalars, and merge-with-defaults
//! policy.
//!
//! Grounded in the teacher's `aequi_ocr::extract::re!` precompilation idiom
//! and `aequi_core`'s small `Copy` config structs; generalized here from a
//! handful of fixed patterns into per-instance compiled regex sets, since
//! this spec's keyword lists are configuration rather than constants.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use receipt_fusion_core::text::{normalize_key, partial_ratio, token_set_ratio};

/// The JSON-shaped configuration payload (spec §6 "Options schema").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptionsMap {
    #[serde(rename = "storeNames", default)]
    pub store_names: HashMap<String, String>,
    #[serde(rename = "totalLabels", default)]
    pub total_labels: HashMap<String, String>,
    #[serde(rename = "ignoreKeywords", default)]
    pub ignore_keywords: Vec<String>,
    #[serde(rename = "stopKeywords", default)]
    pub stop_keywords: Vec<String>,
    #[serde(rename = "foodKeywords", default)]
    pub food_keywords: Vec<String>,
    #[serde(rename = "nonFoodKeywords", default)]
    pub non_food_keywords: Vec<String>,
    #[serde(rename = "discountKeywords", default)]
    pub discount_keywords: Vec<String>,
    #[serde(rename = "depositKeywords", default)]
    pub deposit_keywords: Vec<String>,
}

impl OptionsMap {
    /// Ingest an untyped `serde_json::Value`, dropping non-string dictionary
    /// values and non-string keyword entries rather than failing the whole
    /// parse (spec §7 `ConfigError`: "drop offending entry silently").
    pub fn lenient_from_value(value: &JsonValue) -> Self {
        let obj = value.as_object();
        let dict = |key: &str| -> HashMap<String, String> {
            obj.and_then(|o| o.get(key))
                .and_then(JsonValue::as_object)
                .map(|m| {
                    m.iter()
                        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                        .collect()
                })
                .unwrap_or_default()
        };
        let list = |key: &str| -> Vec<String> {
            obj.and_then(|o| o.get(key))
                .and_then(JsonValue::as_array)
                .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default()
        };
        Self {
            store_names: dict("storeNames"),
            total_labels: dict("totalLabels"),
            ignore_keywords: list("ignoreKeywords"),
            stop_keywords: list("stopKeywords"),
            food_keywords: list("foodKeywords"),
            non_food_keywords: list("nonFoodKeywords"),
            discount_keywords: list("discountKeywords"),
            deposit_keywords: list("depositKeywords"),
        }
    }
}

/// The optimizer's tuning table (spec §4.2), plus `product_weight`/
/// `price_weight` which §4.4's confidence formula needs but spec.md's
/// tuning table omits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tuning {
    pub cache_size: usize,
    pub confidence_threshold: u8,
    pub stability_threshold: u8,
    pub invalidate_interval_ms: i64,
    pub ewma_alpha: f64,
    pub above_count_decay_threshold: u32,
    pub loop_threshold: u32,
    pub total_tolerance: Decimal,
    pub sum_confirmation_threshold: u32,
    pub product_weight: u32,
    pub price_weight: u32,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            cache_size: 20,
            confidence_threshold: 70,
            stability_threshold: 50,
            invalidate_interval_ms: 2000,
            ewma_alpha: 0.3,
            above_count_decay_threshold: 50,
            loop_threshold: 10,
            total_tolerance: dec!(0.01),
            sum_confirmation_threshold: 2,
            product_weight: 1,
            price_weight: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldMergePolicy {
    /// defaults ∪ user; user wins on key clash.
    Extend,
    /// user only.
    Replace,
}

#[derive(Debug, Clone, Copy)]
pub struct MergePolicy {
    pub store_names: FieldMergePolicy,
    pub total_labels: FieldMergePolicy,
    pub ignore_keywords: FieldMergePolicy,
    pub stop_keywords: FieldMergePolicy,
    pub food_keywords: FieldMergePolicy,
    pub non_food_keywords: FieldMergePolicy,
    pub discount_keywords: FieldMergePolicy,
    pub deposit_keywords: FieldMergePolicy,
}

impl MergePolicy {
    pub fn uniform(policy: FieldMergePolicy) -> Self {
        Self {
            store_names: policy,
            total_labels: policy,
            ignore_keywords: policy,
            stop_keywords: policy,
            food_keywords: policy,
            non_food_keywords: policy,
            discount_keywords: policy,
            deposit_keywords: policy,
        }
    }
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self::uniform(FieldMergePolicy::Extend)
    }
}

fn merge_dict(
    defaults: &HashMap<String, String>,
    user: &HashMap<String, String>,
    policy: FieldMergePolicy,
) -> HashMap<String, String> {
    match policy {
        FieldMergePolicy::Replace => user.clone(),
        FieldMergePolicy::Extend => {
            let mut merged = defaults.clone();
            merged.extend(user.iter().map(|(k, v)| (k.clone(), v.clone())));
            merged
        }
    }
}

fn merge_list(defaults: &[String], user: &[String], policy: FieldMergePolicy) -> Vec<String> {
    match policy {
        FieldMergePolicy::Replace => user.to_vec(),
        FieldMergePolicy::Extend => {
            let mut merged = defaults.to_vec();
            for item in user {
                if !merged.iter().any(|d| d == item) {
                    merged.push(item.clone());
                }
            }
            merged
        }
    }
}

/// `threshold(L) = clamp(round(100·(1−k/L)) − 2, 75, 98)` (spec §4.1 step 4
/// "TotalLabel detection"), `k` picked by label-key length `L`.
pub fn label_match_threshold(key_len: usize) -> u8 {
    let l = key_len.max(1) as f64;
    let k = if key_len <= 5 {
        1.0
    } else if key_len <= 10 {
        2.0
    } else if key_len <= 20 {
        3.0
    } else {
        4.0
    };
    let raw = (100.0 * (1.0 - k / l)).round() - 2.0;
    raw.clamp(75.0, 98.0) as u8
}

fn compile_alternation(keywords: &[String]) -> Option<Regex> {
    let escaped: Vec<String> = keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(regex::escape)
        .collect();
    if escaped.is_empty() {
        return None;
    }
    Regex::new(&format!(r"(?i)\b(?:{})\b", escaped.join("|"))).ok()
}

fn keys_as_set(m: &HashMap<String, String>) -> std::collections::BTreeMap<&str, &str> {
    m.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
}

fn list_as_set(v: &[String]) -> std::collections::BTreeSet<&str> {
    v.iter().map(String::as_str).collect()
}

/// Compiled configuration: two alias dictionaries, six precompiled keyword
/// regexes, and the optimizer's tuning scalars. Cheap to `Clone` (the
/// regexes are `Arc`-shared).
#[derive(Debug, Clone)]
pub struct Options {
    store_names: HashMap<String, String>,
    total_labels: HashMap<String, String>,
    ignore_keywords: Vec<String>,
    stop_keywords: Vec<String>,
    food_keywords: Vec<String>,
    non_food_keywords: Vec<String>,
    discount_keywords: Vec<String>,
    deposit_keywords: Vec<String>,

    store_lookup: Arc<HashMap<String, String>>,
    total_label_keys: Arc<Vec<(String, String)>>,

    ignore_re: Option<Arc<Regex>>,
    stop_re: Option<Arc<Regex>>,
    food_re: Option<Arc<Regex>>,
    non_food_re: Option<Arc<Regex>>,
    discount_re: Option<Arc<Regex>>,
    deposit_re: Option<Arc<Regex>>,

    pub tuning: Tuning,
}

impl PartialEq for Options {
    fn eq(&self, other: &Self) -> bool {
        keys_as_set(&self.store_names) == keys_as_set(&other.store_names)
            && keys_as_set(&self.total_labels) == keys_as_set(&other.total_labels)
            && list_as_set(&self.ignore_keywords) == list_as_set(&other.ignore_keywords)
            && list_as_set(&self.stop_keywords) == list_as_set(&other.stop_keywords)
            && list_as_set(&self.food_keywords) == list_as_set(&other.food_keywords)
            && list_as_set(&self.non_food_keywords) == list_as_set(&other.non_food_keywords)
            && list_as_set(&self.discount_keywords) == list_as_set(&other.discount_keywords)
            && list_as_set(&self.deposit_keywords) == list_as_set(&other.deposit_keywords)
    }
}

impl Options {
    fn compile(map: OptionsMap, tuning: Tuning) -> Self {
        let store_lookup: HashMap<String, String> = map
            .store_names
            .iter()
            .filter(|(k, v)| !k.trim().is_empty() && !v.trim().is_empty())
            .map(|(k, v)| (normalize_key(k), v.clone()))
            .collect();
        let total_label_keys: Vec<(String, String)> = map
            .total_labels
            .iter()
            .filter(|(k, v)| !k.trim().is_empty() && !v.trim().is_empty())
            .map(|(k, v)| (normalize_key(k), v.clone()))
            .collect();

        for (field, list) in [
            ("ignoreKeywords", &map.ignore_keywords),
            ("stopKeywords", &map.stop_keywords),
            ("foodKeywords", &map.food_keywords),
            ("nonFoodKeywords", &map.non_food_keywords),
            ("discountKeywords", &map.discount_keywords),
            ("depositKeywords", &map.deposit_keywords),
        ] {
            for kw in list.iter().filter(|k| k.trim().is_empty()) {
                let _ = kw;
                tracing::warn!(field, "dropping empty keyword entry");
            }
        }

        Self {
            ignore_re: compile_alternation(&map.ignore_keywords).map(Arc::new),
            stop_re: compile_alternation(&map.stop_keywords).map(Arc::new),
            food_re: compile_alternation(&map.food_keywords).map(Arc::new),
            non_food_re: compile_alternation(&map.non_food_keywords).map(Arc::new),
            discount_re: compile_alternation(&map.discount_keywords).map(Arc::new),
            deposit_re: compile_alternation(&map.deposit_keywords).map(Arc::new),
            store_names: map.store_names,
            total_labels: map.total_labels,
            ignore_keywords: map.ignore_keywords,
            stop_keywords: map.stop_keywords,
            food_keywords: map.food_keywords,
            non_food_keywords: map.non_food_keywords,
            discount_keywords: map.discount_keywords,
            deposit_keywords: map.deposit_keywords,
            store_lookup: Arc::new(store_lookup),
            total_label_keys: Arc::new(total_label_keys),
            tuning,
        }
    }

    /// Small illustrative built-in dictionary, tuned for the receipts in
    /// spec.md §8's concrete scenarios (German/Japanese mixed retail).
    pub fn defaults() -> Self {
        let map = OptionsMap {
            store_names: HashMap::from([("aldi".to_string(), "Aldi".to_string())]),
            total_labels: HashMap::from([
                ("summe".to_string(), "Summe".to_string()),
                ("gesamt".to_string(), "Gesamt".to_string()),
                ("total".to_string(), "Total".to_string()),
                ("合計".to_string(), "合計".to_string()),
            ]),
            ignore_keywords: Vec::new(),
            stop_keywords: vec!["bar".to_string(), "bar zahlung".to_string(), "kreditkarte".to_string()],
            food_keywords: Vec::new(),
            non_food_keywords: Vec::new(),
            discount_keywords: vec!["rabatt".to_string(), "discount".to_string(), "値引".to_string()],
            deposit_keywords: vec!["pfand".to_string(), "deposit".to_string()],
        };
        Self::compile(map, Tuning::default())
    }

    /// Build `Options` directly from a raw `OptionsMap`, using default
    /// tuning. Entries that fail to compile (empty after trimming) are
    /// dropped silently with a `tracing::warn!` (spec §7 `ConfigError`).
    pub fn from_map(raw: &OptionsMap) -> Self {
        Self::compile(raw.clone(), Tuning::default())
    }

    /// Merge `user` on top of `Options::defaults()`'s raw map, per field,
    /// according to `policy` (spec §6 "Merge policy").
    pub fn with_defaults(user: &OptionsMap, policy: MergePolicy) -> Self {
        let defaults = Self::defaults();
        let merged = OptionsMap {
            store_names: merge_dict(&defaults.store_names, &user.store_names, policy.store_names),
            total_labels: merge_dict(&defaults.total_labels, &user.total_labels, policy.total_labels),
            ignore_keywords: merge_list(&defaults.ignore_keywords, &user.ignore_keywords, policy.ignore_keywords),
            stop_keywords: merge_list(&defaults.stop_keywords, &user.stop_keywords, policy.stop_keywords),
            food_keywords: merge_list(&defaults.food_keywords, &user.food_keywords, policy.food_keywords),
            non_food_keywords: merge_list(
                &defaults.non_food_keywords,
                &user.non_food_keywords,
                policy.non_food_keywords,
            ),
            discount_keywords: merge_list(
                &defaults.discount_keywords,
                &user.discount_keywords,
                policy.discount_keywords,
            ),
            deposit_keywords: merge_list(
                &defaults.deposit_keywords,
                &user.deposit_keywords,
                policy.deposit_keywords,
            ),
        };
        Self::compile(merged, defaults.tuning)
    }

    /// Round-trip back to the jsonlike schema (spec §8's round-trip property).
    pub fn to_map(&self) -> OptionsMap {
        OptionsMap {
            store_names: self.store_names.clone(),
            total_labels: self.total_labels.clone(),
            ignore_keywords: self.ignore_keywords.clone(),
            stop_keywords: self.stop_keywords.clone(),
            food_keywords: self.food_keywords.clone(),
            non_food_keywords: self.non_food_keywords.clone(),
            discount_keywords: self.discount_keywords.clone(),
            deposit_keywords: self.deposit_keywords.clone(),
        }
    }

    fn keyword_match(re: &Option<Arc<Regex>>, text: &str) -> bool {
        re.as_ref().is_some_and(|r| r.is_match(text))
    }

    pub fn is_ignore_keyword(&self, text: &str) -> bool {
        Self::keyword_match(&self.ignore_re, text)
    }

    pub fn is_stop_keyword(&self, text: &str) -> bool {
        Self::keyword_match(&self.stop_re, text)
    }

    pub fn is_food_keyword(&self, text: &str) -> bool {
        Self::keyword_match(&self.food_re, text)
    }

    pub fn is_non_food_keyword(&self, text: &str) -> bool {
        Self::keyword_match(&self.non_food_re, text)
    }

    pub fn is_discount_keyword(&self, text: &str) -> bool {
        Self::keyword_match(&self.discount_re, text)
    }

    pub fn is_deposit_keyword(&self, text: &str) -> bool {
        Self::keyword_match(&self.deposit_re, text)
    }

    /// Plain dictionary lookup (spec §4.1 step 4 "Store detection": no
    /// fuzzy matching, just a trimmed/normalized key hit).
    pub fn lookup_store(&self, line_text: &str) -> Option<String> {
        self.store_lookup.get(&normalize_key(line_text)).cloned()
    }

    pub fn total_labels(&self) -> &HashMap<String, String> {
        &self.total_labels
    }

    /// Best total-label match for an already-normalized line (spec §4.1
    /// step 4 "TotalLabel detection"): a startsWith shortcut, else the
    /// best-scoring configured label meeting the adaptive threshold.
    pub fn match_total_label(&self, normalized_text: &str) -> Option<String> {
        for (key, canonical) in self.total_label_keys.iter() {
            if !key.is_empty()
                && normalized_text.starts_with(key.as_str())
                && normalized_text.len() <= key.len() * 2
            {
                return Some(canonical.clone());
            }
        }

        let mut best: Option<(&str, u8)> = None;
        for (key, canonical) in self.total_label_keys.iter() {
            let score = partial_ratio(normalized_text, key).max(token_set_ratio(normalized_text, key));
            let threshold = label_match_threshold(key.chars().count());
            if score >= threshold && best.map(|(_, b)| score > b).unwrap_or(true) {
                best = Some((canonical.as_str(), score));
            }
        }
        best.map(|(c, _)| c.to_string())
    }

    /// Whether `text` fuzzy-matches any configured total-label alias (spec
    /// §4.1 step 6 "Drop positions whose product name fuzzy-matches a total
    /// label"; spec §4.3 "suspect" scoring).
    pub fn matches_any_total_label(&self, text: &str) -> bool {
        let normalized = normalize_key(text);
        self.match_total_label(&normalized).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_match_threshold_buckets() {
        assert_eq!(label_match_threshold(5), 78);
        assert_eq!(label_match_threshold(10), 78);
        assert_eq!(label_match_threshold(20), 83);
        assert_eq!(label_match_threshold(30), 85);
    }

    #[test]
    fn from_map_drops_empty_keyword_entries() {
        let map = OptionsMap {
            stop_keywords: vec!["bar".to_string(), "   ".to_string()],
            ..Default::default()
        };
        let opts = Options::from_map(&map);
        assert!(opts.is_stop_keyword("Bar"));
        assert!(!opts.is_stop_keyword("unrelated text"));
    }

    #[test]
    fn lenient_from_value_drops_non_string_entries() {
        let value = serde_json::json!({
            "storeNames": { "aldi": "Aldi", "bad": 5 },
            "stopKeywords": ["bar", 7, "kreditkarte"],
        });
        let map = OptionsMap::lenient_from_value(&value);
        assert_eq!(map.store_names.get("aldi"), Some(&"Aldi".to_string()));
        assert!(!map.store_names.contains_key("bad"));
        assert_eq!(map.stop_keywords, vec!["bar".to_string(), "kreditkarte".to_string()]);
    }

    #[test]
    fn roundtrip_from_map_of_to_map() {
        let opts = Options::defaults();
        let roundtripped = Options::from_map(&opts.to_map());
        assert_eq!(opts, roundtripped);
    }

    #[test]
    fn store_lookup_is_exact_not_fuzzy() {
        let map = OptionsMap {
            store_names: HashMap::from([("aldi sued".to_string(), "Aldi Süd".to_string())]),
            ..Default::default()
        };
        let opts = Options::from_map(&map);
        assert_eq!(opts.lookup_store("Aldi Sued"), Some("Aldi Süd".to_string()));
        assert_eq!(opts.lookup_store("Aldi Nord"), None);
    }

    #[test]
    fn match_total_label_starts_with_shortcut() {
        let opts = Options::defaults();
        assert_eq!(opts.match_total_label("summe eur"), Some("Summe".to_string()));
    }

    #[test]
    fn match_total_label_fuzzy_within_threshold() {
        let opts = Options::defaults();
        // "Summe" with one OCR-dropped letter still token-set-matches.
        assert_eq!(opts.match_total_label("sumle"), Some("Summe".to_string()));
    }

    #[test]
    fn with_defaults_extend_merges_and_user_wins_clash() {
        let user = OptionsMap {
            total_labels: HashMap::from([("summe".to_string(), "SUMME!".to_string())]),
            stop_keywords: vec!["bar".to_string(), "cash".to_string()],
            ..Default::default()
        };
        let merged = Options::with_defaults(&user, MergePolicy::uniform(FieldMergePolicy::Extend));
        assert_eq!(merged.total_labels.get("summe"), Some(&"SUMME!".to_string()));
        assert!(merged.total_labels.contains_key("合計"));
        assert!(merged.is_stop_keyword("cash"));
        assert!(merged.is_stop_keyword("kreditkarte"));
    }

    #[test]
    fn with_defaults_replace_ignores_defaults() {
        let user = OptionsMap { stop_keywords: vec!["cash".to_string()], ..Default::default() };
        let merged = Options::with_defaults(&user, MergePolicy::uniform(FieldMergePolicy::Replace));
        assert!(merged.is_stop_keyword("cash"));
        assert!(!merged.is_stop_keyword("kreditkarte"));
        assert!(merged.total_labels.is_empty());
    }
}
