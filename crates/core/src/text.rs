//! String-similarity primitives shared by label matching (Options store,
//! spec §4.1), group product-confidence (spec §4.4), and outlier
//! candidate scoring (spec §4.3).
//!
//! Grounded in the teacher workspace's own fuzzy-matching code
//! (`crates/import/src/util.rs::levenshtein_distance`,
//! `crates/import/src/rules.rs::fuzzy_score`,
//! `crates/import/src/match_engine.rs::description_similarity`), generalized
//! from a single edit-distance ratio into the token-set/partial variants
//! the spec's label matcher requires (`max(partial-ratio, token-set-ratio)`).

use std::collections::BTreeSet;

/// Levenshtein edit distance using the two-row O(min(m,n)) space algorithm.
pub fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let a: Vec<char> = s1.chars().collect();
    let b: Vec<char> = s2.chars().collect();
    let (m, n) = (a.len(), b.len());

    if m == 0 {
        return n;
    }
    if n == 0 {
        return m;
    }

    let (a, b, m, n) = if m <= n { (&a, &b, m, n) } else { (&b, &a, n, m) };

    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr = vec![0usize; n + 1];

    for i in 1..=m {
        curr[0] = i;
        for j in 1..=n {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

/// Edit-distance similarity in `[0, 100]`: `100` for identical strings.
pub fn ratio(a: &str, b: &str) -> u8 {
    let len = a.chars().count() + b.chars().count();
    if len == 0 {
        return 100;
    }
    let dist = levenshtein_distance(a, b);
    let score = (len as f64 - dist as f64) / len as f64 * 100.0;
    score.round().clamp(0.0, 100.0) as u8
}

/// Best alignment of the shorter string as a substring of the longer one,
/// scored by edit-distance ratio over a sliding window.
pub fn partial_ratio(a: &str, b: &str) -> u8 {
    let (shorter, longer) = if a.chars().count() <= b.chars().count() { (a, b) } else { (b, a) };
    let s_chars: Vec<char> = shorter.chars().collect();
    let l_chars: Vec<char> = longer.chars().collect();

    if s_chars.is_empty() {
        return if l_chars.is_empty() { 100 } else { 0 };
    }
    if l_chars.len() <= s_chars.len() {
        return ratio(shorter, longer);
    }

    let slen = s_chars.len();
    (0..=(l_chars.len() - slen))
        .map(|start| {
            let window: String = l_chars[start..start + slen].iter().collect();
            ratio(shorter, &window)
        })
        .max()
        .unwrap_or(0)
}

fn tokenize(s: &str) -> BTreeSet<String> {
    s.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_string())
        .collect()
}

fn join(tokens: &[&String]) -> String {
    tokens.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(" ")
}

/// Token-set ratio (fuzzywuzzy-style): reconciles word order and repeated
/// shared words by comparing the shared-token core against each side's
/// leftover tokens, taking the best of the three pairings.
pub fn token_set_ratio(a: &str, b: &str) -> u8 {
    let ta = tokenize(a);
    let tb = tokenize(b);

    let intersection: Vec<&String> = ta.intersection(&tb).collect();
    let diff_a: Vec<&String> = ta.difference(&tb).collect();
    let diff_b: Vec<&String> = tb.difference(&ta).collect();

    let inter_str = join(&intersection);
    let t0 = inter_str.clone();
    let t1 = if diff_a.is_empty() {
        inter_str.clone()
    } else {
        format!("{} {}", inter_str, join(&diff_a)).trim().to_string()
    };
    let t2 = if diff_b.is_empty() {
        inter_str
    } else {
        format!("{} {}", join(&intersection), join(&diff_b)).trim().to_string()
    };

    [ratio(&t0, &t1), ratio(&t0, &t2), ratio(&t1, &t2)]
        .into_iter()
        .max()
        .unwrap_or(0)
}

/// Lowercase; strip non-alphanumeric runs; collapse whitespace (spec §4.1
/// "Key normalization").
pub fn normalize_key(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_was_space = false;
    for c in s.to_lowercase().chars() {
        if c.is_alphanumeric() {
            out.push(c);
            last_was_space = false;
        } else if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        }
        // other punctuation/symbols are dropped outright
    }
    out.trim().to_string()
}

/// Token specificity used to pick the most representative candidate string
/// out of a member bag (spec §4.1 "Product text"):
/// `(#tokens · log(1+Σ|token|))`.
pub fn token_specificity(s: &str) -> f64 {
    let tokens: Vec<&str> = s
        .split_whitespace()
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.is_empty() {
        return 0.0;
    }
    let total_len: usize = tokens.iter().map(|t| t.chars().count()).sum();
    tokens.len() as f64 * (1.0 + total_len as f64).ln()
}
