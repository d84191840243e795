//! Text normalization (spec §4.1 "Normalization", component A).
//!
//! Grounded in the teacher's `aequi_ocr::extract` module, which precompiles
//! its cleanup regexes once (`re!` macro over `OnceLock`) and applies them
//! as a pipeline of small, independently testable functions.

use std::collections::HashMap;

use receipt_fusion_core::text::{token_set_ratio, token_specificity};

pub use receipt_fusion_core::text::normalize_key;

const CURRENCY_GLYPHS: &[char] = &['¥', '$', '€', '£', '₩', '円'];

/// Full-width → half-width folding (U+FF01..FF5E → ASCII, U+3000 → space).
pub fn fold_fullwidth(s: &str) -> String {
    s.chars()
        .map(|c| {
            let cp = c as u32;
            if (0xFF01..=0xFF5E).contains(&cp) {
                char::from_u32(cp - 0xFEE0).unwrap_or(c)
            } else if cp == 0x3000 {
                ' '
            } else {
                c
            }
        })
        .collect()
}

fn unify_minus(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '\u{2212}' | '\u{2013}' | '\u{2014}' => '-',
            other => other,
        })
        .collect()
}

fn unify_decimal_glyphs(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '‚' | '،' | '٫' | '·' => '.',
            other => other,
        })
        .collect()
}

fn has_cjk(s: &str) -> bool {
    s.chars().any(|c| {
        let cp = c as u32;
        (0x3040..=0x30FF).contains(&cp) // hiragana/katakana
            || (0x4E00..=0x9FFF).contains(&cp) // CJK unified ideographs
            || (0xFF00..=0xFFEF).contains(&cp) // fullwidth forms
    })
}

/// Disambiguate `,` as a thousands separator from `,` as a decimal point,
/// per spec: "treat a 3-digit group after the first comma as a thousands
/// separator, otherwise the comma is decimal".
fn comma_is_thousands_separator(s: &str) -> bool {
    let Some(idx) = s.find(',') else { return false };
    let after = &s[idx + 1..];
    // A consecutive run of exactly 3 digits (the run stops at the first
    // non-digit, so this already means "3 digits then end-or-non-digit")
    // reads as a thousands group; 1-2 digits, or 4+, read as a fraction.
    after.chars().take_while(|c| c.is_ascii_digit()).count() == 3
}

/// Clean up a raw amount-like string into one `rust_decimal::Decimal`
/// can parse: signed, single '.' decimal point, no currency glyphs or
/// grouping separators. Returns `None` if no digit survives.
///
/// `cjk_frame` gates the aggressive "¥ misread as %" rule (spec §9 Open
/// Question 3) behind per-frame script detection.
pub fn normalize_amount_string(raw: &str, cjk_frame: bool) -> Option<String> {
    let folded = fold_fullwidth(raw);
    let mut s = unify_minus(&folded);
    s = unify_decimal_glyphs(&s);
    s.retain(|c| !CURRENCY_GLYPHS.contains(&c) && !c.is_whitespace());
    if cjk_frame {
        if let Some(stripped) = strip_yen_misread_as_percent(&s) {
            s = stripped;
        }
    }

    if comma_is_thousands_separator(&s) {
        s.retain(|c| c != ',');
    } else if s.contains(',') {
        // Comma is the decimal point: any '.' present must be a thousands
        // separator instead.
        s.retain(|c| c != '.');
        s = s.replace(',', ".");
    }

    s.retain(|c| c.is_ascii_digit() || c == '.' || c == '-');
    if !s.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(s)
}

/// Recover a yen amount OCR has mis-read as a leading "4" (the glyph `¥`
/// misrecognized as the digit) plus a trailing "%" (spec §9 Open Question
/// 3: `"4702%"` → `"702"`). Only fires on a leading `4` followed by at
/// least two more digits and a trailing `%`, so an ordinary 1-digit or
/// 2-digit amount starting with 4 (e.g. `"4%"`, `"45%"`) is left alone.
fn strip_yen_misread_as_percent(s: &str) -> Option<String> {
    let rest = s.strip_prefix('4')?;
    let digits = rest.strip_suffix('%')?;
    if digits.len() >= 2 && digits.chars().all(|c| c.is_ascii_digit()) {
        Some(digits.to_string())
    } else {
        None
    }
}

/// Whether any line in the frame contains a CJK codepoint — used to gate
/// the yen-misread rule (spec §9 Open Question 3).
pub fn frame_has_cjk<'a>(lines: impl IntoIterator<Item = &'a str>) -> bool {
    lines.into_iter().any(has_cjk)
}

/// Best representative string for a bag of OCR readings of the same
/// product (spec §4.1 "Product text"): cluster near-duplicates, take the
/// best-represented cluster, then the most specific candidate within it.
pub fn pick_representative(candidates: &[String]) -> Option<String> {
    if candidates.is_empty() {
        return None;
    }

    // First-seen order of distinct strings, plus raw occurrence counts.
    let mut order: Vec<String> = Vec::new();
    let mut freq: HashMap<&str, usize> = HashMap::new();
    for c in candidates {
        if !order.iter().any(|o| o == c) {
            order.push(c.clone());
        }
    }
    for c in candidates {
        *freq.entry(c.as_str()).or_insert(0) += 1;
    }

    // Cluster near-duplicate strings (token-set ratio >= 90) to reconcile
    // OCR noise before picking the dominant reading.
    let mut clusters: Vec<Vec<usize>> = Vec::new();
    'outer: for (idx, s) in order.iter().enumerate() {
        for members in clusters.iter_mut() {
            let seed = &order[members[0]];
            if token_set_ratio(s, seed) >= 90 {
                members.push(idx);
                continue 'outer;
            }
        }
        clusters.push(vec![idx]);
    }

    let mut best_cluster = 0usize;
    let mut best_freq = 0usize;
    for (ci, members) in clusters.iter().enumerate() {
        let f: usize = members.iter().map(|&i| freq[order[i].as_str()]).sum();
        if f > best_freq {
            best_freq = f;
            best_cluster = ci;
        }
    }

    let members = &clusters[best_cluster];
    let mut best: Option<&String> = None;
    let mut best_spec = f64::MIN;
    for &idx in members {
        let candidate = &order[idx];
        let spec = token_specificity(candidate);
        let better = match best {
            None => true,
            Some(current) => {
                spec > best_spec
                    || (spec == best_spec && candidate.chars().count() > current.chars().count())
            }
        };
        if better {
            best = Some(candidate);
            best_spec = spec;
        }
    }
    best.cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_fullwidth_digits_and_letters() {
        assert_eq!(fold_fullwidth("\u{FF11}\u{FF12}\u{FF13}"), "123");
        assert_eq!(fold_fullwidth("\u{3000}A"), " A");
    }

    #[test]
    fn normalize_amount_strips_currency_and_minus_variants() {
        assert_eq!(normalize_amount_string("¥702", false), Some("702".to_string()));
        assert_eq!(normalize_amount_string("\u{2212}100", false), Some("-100".to_string()));
    }

    #[test]
    fn normalize_amount_us_thousands_format() {
        assert_eq!(normalize_amount_string("1,234.56", false), Some("1234.56".to_string()));
    }

    #[test]
    fn normalize_amount_eu_thousands_format() {
        assert_eq!(normalize_amount_string("1.234,56", false), Some("1234.56".to_string()));
    }

    #[test]
    fn normalize_amount_comma_as_decimal_point() {
        assert_eq!(normalize_amount_string("4,99", false), Some("4.99".to_string()));
    }

    #[test]
    fn normalize_amount_no_digits_is_none() {
        assert_eq!(normalize_amount_string("¥円", false), None);
    }

    #[test]
    fn normalize_amount_yen_percent_misread_gated_by_cjk() {
        // spec §9 Open Question 3: "4702%" is a misread "¥702" — the leading
        // "4" impersonates the yen glyph and "%" is OCR noise off its tail.
        // Only recovered when the frame has CJK script; otherwise the "%" is
        // simply stripped and the digits parse literally.
        assert_eq!(normalize_amount_string("4702%", true), Some("702".to_string()));
        assert_eq!(normalize_amount_string("4702%", false), Some("4702".to_string()));
    }

    #[test]
    fn normalize_amount_ordinary_four_percent_not_misread() {
        // A short, plausible "4%"/"45%" must not be mistaken for a
        // misread yen amount even in a CJK frame.
        assert_eq!(normalize_amount_string("4%", true), Some("4".to_string()));
        assert_eq!(normalize_amount_string("45%", true), Some("45".to_string()));
    }

    #[test]
    fn frame_has_cjk_detects_japanese_text() {
        assert!(frame_has_cjk(["もちチーズ"]));
        assert!(!frame_has_cjk(["Milch", "Brot"]));
    }

    #[test]
    fn pick_representative_prefers_most_frequent() {
        let candidates = vec!["Milch".to_string(), "Milch".to_string(), "Milsh".to_string()];
        assert_eq!(pick_representative(&candidates).as_deref(), Some("Milch"));
    }

    #[test]
    fn pick_representative_prefers_more_specific_within_cluster() {
        let candidates = vec!["Milch".to_string(), "Vollmilch 1L".to_string()];
        // Both are distinct clusters of frequency 1; "Vollmilch 1L" has
        // higher token specificity (more, longer tokens).
        let rep = pick_representative(&candidates).unwrap();
        assert_eq!(rep, "Vollmilch 1L");
    }

    #[test]
    fn pick_representative_empty_is_none() {
        assert!(pick_representative(&[]).is_none());
    }
}
