//! Locale-aware numeric and date formatting (spec §4.1 step 2, component B
//! "Formatter").
//!
//! Regex precompilation follows the teacher's `aequi_ocr::extract::re!`
//! macro: every pattern is compiled exactly once into a `OnceLock`-backed
//! static and shared immutably for the lifetime of the process.

use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use rust_decimal::Decimal;

use receipt_fusion_core::UtcDate;

use crate::normalize;

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

// Trailing `%` is accepted so the `4702%`-style misread-yen amount (spec
// §9 Open Question 3) reaches `parse_amount`, which decides via
// `cjk_frame` whether to recover it or leave it as a literal number.
re!(re_amount_shape, r"^[¥$€£₩]?\s*-?\d[\d,.\s]*(?:円|%)?$");

// ── Amounts ──────────────────────────────────────────────────────────────

/// Whether `text` *looks* like a monetary amount — signed decimal with a
/// configurable separator, optional currency glyph, or a bare yen integer
/// (spec §4.1 step 4 "Amount").
pub fn is_amount_like(text: &str) -> bool {
    re_amount_shape().is_match(text.trim())
}

/// Parse an amount string via the locale-aware numeric parser (spec
/// component B). `cjk_frame` gates the yen-misread-as-percent rule.
pub fn parse_amount(raw: &str, cjk_frame: bool) -> Option<Decimal> {
    let cleaned = normalize::normalize_amount_string(raw, cjk_frame)?;
    Decimal::from_str(&cleaned).ok()
}

// ── Dates ────────────────────────────────────────────────────────────────

re!(re_japanese_era, r"(令和|平成|昭和|大正|明治)(元|\d{1,2})年(\d{1,2})月(\d{1,2})日");
re!(re_kanji_ymd, r"(\d{4})年(\d{1,2})月(\d{1,2})日");
re!(re_iso_ymd_time, r"(\d{4})-(\d{2})-(\d{2})[T ]\d{2}:\d{2}");
re!(re_numeric_ymd, r"\b(\d{4})[-/.](\d{1,2})[-/.](\d{1,2})\b");
re!(re_numeric_dmy, r"\b(\d{1,2})[-/.](\d{1,2})[-/.](\d{4})\b");
re!(
    re_english_month_dy,
    r"(?i)\b(January|February|March|April|May|June|July|August|September|October|November|December|Jan|Feb|Mar|Apr|Jun|Jul|Aug|Sep|Sept|Oct|Nov|Dec)\.?\s+(\d{1,2}),?\s+(\d{4})\b"
);
re!(
    re_english_day_month,
    r"(?i)\b(\d{1,2})\.?\s+(January|February|March|April|May|June|July|August|September|October|November|December|Jan|Feb|Mar|Apr|Jun|Jul|Aug|Sep|Sept|Oct|Nov|Dec)\.?,?\s+(\d{4})\b"
);
re!(
    re_german_day_month,
    r"(?i)\b(\d{1,2})\.?\s+(Januar|Februar|März|April|Mai|Juni|Juli|August|September|Oktober|November|Dezember|Jan|Feb|Mär|Apr|Jun|Jul|Aug|Sep|Okt|Nov|Dez)\.?\s+(\d{4})\b"
);

const ERA_START_YEARS: &[(&str, i32)] =
    &[("明治", 1868), ("大正", 1912), ("昭和", 1926), ("平成", 1989), ("令和", 2019)];

fn era_number(s: &str) -> Option<i32> {
    if s == "元" {
        Some(1)
    } else {
        s.parse().ok()
    }
}

fn month_name_to_num(name: &str) -> Option<u32> {
    let n = name.to_lowercase();
    let n = n.trim_end_matches('.');
    Some(match n {
        "january" | "jan" => 1,
        "february" | "feb" => 2,
        "march" | "mar" => 3,
        "april" | "apr" => 4,
        "may" => 5,
        "june" | "jun" => 6,
        "july" | "jul" => 7,
        "august" | "aug" => 8,
        "september" | "sep" | "sept" => 9,
        "october" | "oct" => 10,
        "november" | "nov" => 11,
        "december" | "dec" => 12,
        _ => return None,
    })
}

fn german_month_name_to_num(name: &str) -> Option<u32> {
    let n = name.to_lowercase();
    let n = n.trim_end_matches('.');
    Some(match n {
        "januar" | "jan" => 1,
        "februar" | "feb" => 2,
        "märz" | "mär" => 3,
        "april" | "apr" => 4,
        "mai" => 5,
        "juni" | "jun" => 6,
        "juli" | "jul" => 7,
        "august" | "aug" => 8,
        "september" | "sep" => 9,
        "oktober" | "okt" => 10,
        "november" | "nov" => 11,
        "dezember" | "dez" => 12,
        _ => return None,
    })
}

/// Try every date regex family, in the priority spec §4.1 step 2 defines,
/// against `text` (normally a single OCR line). First success wins.
pub fn parse_date(text: &str) -> Option<UtcDate> {
    let folded = normalize::fold_fullwidth(text);
    try_japanese_era(&folded)
        .or_else(|| try_kanji_ymd(&folded))
        .or_else(|| try_iso_ymd_time(&folded))
        .or_else(|| try_numeric_ymd(&folded))
        .or_else(|| try_numeric_dmy(&folded))
        .or_else(|| try_english_month_dy(&folded))
        .or_else(|| try_english_day_month(&folded))
        .or_else(|| try_german_day_month(&folded))
}

fn try_japanese_era(text: &str) -> Option<UtcDate> {
    let c = re_japanese_era().captures(text)?;
    let era = c.get(1)?.as_str();
    let start = ERA_START_YEARS.iter().find(|(e, _)| *e == era).map(|(_, y)| *y)?;
    let era_year = era_number(c.get(2)?.as_str())?;
    let month: u32 = c.get(3)?.as_str().parse().ok()?;
    let day: u32 = c.get(4)?.as_str().parse().ok()?;
    UtcDate::from_ymd(start + era_year - 1, month, day)
}

fn try_kanji_ymd(text: &str) -> Option<UtcDate> {
    let c = re_kanji_ymd().captures(text)?;
    let y: i32 = c.get(1)?.as_str().parse().ok()?;
    let m: u32 = c.get(2)?.as_str().parse().ok()?;
    let d: u32 = c.get(3)?.as_str().parse().ok()?;
    UtcDate::from_ymd(y, m, d)
}

fn try_iso_ymd_time(text: &str) -> Option<UtcDate> {
    let c = re_iso_ymd_time().captures(text)?;
    let y: i32 = c.get(1)?.as_str().parse().ok()?;
    let m: u32 = c.get(2)?.as_str().parse().ok()?;
    let d: u32 = c.get(3)?.as_str().parse().ok()?;
    UtcDate::from_ymd(y, m, d)
}

fn try_numeric_ymd(text: &str) -> Option<UtcDate> {
    let c = re_numeric_ymd().captures(text)?;
    let y: i32 = c.get(1)?.as_str().parse().ok()?;
    let m: u32 = c.get(2)?.as_str().parse().ok()?;
    let d: u32 = c.get(3)?.as_str().parse().ok()?;
    UtcDate::from_ymd(y, m, d)
}

fn try_numeric_dmy(text: &str) -> Option<UtcDate> {
    let c = re_numeric_dmy().captures(text)?;
    let d: u32 = c.get(1)?.as_str().parse().ok()?;
    let m: u32 = c.get(2)?.as_str().parse().ok()?;
    let y: i32 = c.get(3)?.as_str().parse().ok()?;
    UtcDate::from_ymd(y, m, d)
}

fn try_english_month_dy(text: &str) -> Option<UtcDate> {
    let c = re_english_month_dy().captures(text)?;
    let m = month_name_to_num(c.get(1)?.as_str())?;
    let d: u32 = c.get(2)?.as_str().parse().ok()?;
    let y: i32 = c.get(3)?.as_str().parse().ok()?;
    UtcDate::from_ymd(y, m, d)
}

fn try_english_day_month(text: &str) -> Option<UtcDate> {
    let c = re_english_day_month().captures(text)?;
    let d: u32 = c.get(1)?.as_str().parse().ok()?;
    let m = month_name_to_num(c.get(2)?.as_str())?;
    let y: i32 = c.get(3)?.as_str().parse().ok()?;
    UtcDate::from_ymd(y, m, d)
}

fn try_german_day_month(text: &str) -> Option<UtcDate> {
    let c = re_german_day_month().captures(text)?;
    let d: u32 = c.get(1)?.as_str().parse().ok()?;
    let m = german_month_name_to_num(c.get(2)?.as_str())?;
    let y: i32 = c.get(3)?.as_str().parse().ok()?;
    UtcDate::from_ymd(y, m, d)
}
