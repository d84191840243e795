//! Parser (spec §4.1, component E): one frame's OCR → provisional `Receipt`.
//!
//! Grounded in the teacher's `aequi_ocr::extract::Extractor`, which also
//! runs a single forward scan over OCR lines applying a priority chain of
//! regex/geometry rules and assembling typed fields as it goes; generalized
//! here from the teacher's flat ledger-row extraction into the spec's
//! richer column-geometry + fuzzy-label + entity-pruning pipeline.

use receipt_fusion_core::{
    EntityValue, OcrResult, Position, Price, Product, Rect, Receipt, RecognizedEntity, TextLine, Unit,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::format;
use crate::normalize;
use crate::options::Options;

const QUANTITY_TOLERANCE: Decimal = dec!(0.02);

/// Pure one-frame parse (spec §4.1 contract: "Returns an empty Receipt if
/// `ocr` has no blocks" and "never raises"). The resulting `Receipt` and
/// every `Position.timestamp` default to `0`; a caller that tracks frame
/// ingest time stamps them before handing the receipt to `Optimizer`.
pub fn process(ocr: &OcrResult, opts: &Options) -> Receipt {
    if ocr.is_empty() {
        return Receipt::empty(0);
    }

    let mut lines: Vec<TextLine> = ocr.all_lines().cloned().collect();
    lines.sort_by(|a, b| {
        a.bbox
            .center()
            .y
            .partial_cmp(&b.bbox.center().y)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.bbox.center().x.partial_cmp(&b.bbox.center().x).unwrap_or(std::cmp::Ordering::Equal))
    });

    let cjk_frame = normalize::frame_has_cjk(lines.iter().map(|l| l.text.as_str()));
    let bounds = Rect::union_all(lines.iter().map(|l| &l.bbox)).expect("non-empty lines");

    let mut purchase_date_line: Option<usize> = None;
    let mut purchase_date_entity = None;
    for (i, line) in lines.iter().enumerate() {
        if let Some(date) = format::parse_date(&line.text) {
            purchase_date_line = Some(i);
            purchase_date_entity = Some(RecognizedEntity::new(line.clone(), EntityValue::PurchaseDate(date)));
            break;
        }
    }

    let left = bounds.left;
    let diff = bounds.right - bounds.left;
    let right_bound = left + 0.75 * diff;
    let center_bound = left + 0.5 * diff;

    let mut store: Option<String> = None;
    let mut total_label: Option<RecognizedEntity> = None;
    let mut total: Option<RecognizedEntity> = None;
    let mut amounts: Vec<RecognizedEntity> = Vec::new();
    let mut unknowns: Vec<RecognizedEntity> = Vec::new();
    let mut unit_prices: Vec<RecognizedEntity> = Vec::new();
    let mut unit_quantities: Vec<RecognizedEntity> = Vec::new();

    'scan: for (i, line) in lines.iter().enumerate() {
        // Total identification (swap): keep re-resolving which Amount is
        // the Total as later, closer-below amounts appear. Run on
        // amounts collected so far so a label can claim an amount seen
        // on an earlier line before this one is classified.
        try_total_swap(&total_label, &mut total, &mut amounts);

        // Stop early if confirmed.
        if let (Some(_label), Some(t)) = (&total_label, &total) {
            if let Some(total_value) = t.value.as_decimal() {
                let sum: Decimal = amounts.iter().filter_map(|a| a.value.as_decimal()).sum();
                if receipt_fusion_core::price::decimal_to_cents(sum)
                    == receipt_fusion_core::price::decimal_to_cents(total_value)
                {
                    break 'scan;
                }
            }
        }

        if opts.is_stop_keyword(&line.text) {
            break 'scan;
        }

        if opts.is_ignore_keyword(&line.text) || purchase_date_line == Some(i) {
            continue;
        }

        let normalized = normalize::normalize_key(&line.text);

        if line.bbox.right <= center_bound {
            if let Some(canonical) = opts.match_total_label(&normalized) {
                total_label = Some(RecognizedEntity::new(line.clone(), EntityValue::TotalLabel(canonical)));
                continue;
            }
        }

        if store.is_none() && amounts.is_empty() {
            if let Some(canonical) = opts.lookup_store(line.text.trim()) {
                store = Some(canonical);
                continue;
            }
        }

        if line.bbox.right >= right_bound && format::is_amount_like(&line.text) {
            if let Some(value) = format::parse_amount(&line.text, cjk_frame) {
                amounts.push(RecognizedEntity::new(line.clone(), EntityValue::Amount(value)));
                continue;
            }
        }

        if line.bbox.center().x <= center_bound {
            if let Some((qty, price, leading)) = parse_unit_row(&line.text, cjk_frame) {
                if let Some(q) = qty {
                    unit_quantities.push(RecognizedEntity::new(line.clone(), EntityValue::UnitQuantity(q)));
                }
                if let Some(p) = price {
                    unit_prices.push(RecognizedEntity::new(line.clone(), EntityValue::UnitPrice(p)));
                }
                if let Some(text) = leading {
                    if !text.trim().is_empty() {
                        unknowns.push(RecognizedEntity::new(line.clone(), EntityValue::Unknown(text)));
                    }
                }
                continue;
            }
        }

        if line.bbox.center().x <= center_bound && digit_ratio(&line.text) < 0.5 {
            unknowns.push(RecognizedEntity::new(line.clone(), EntityValue::Unknown(line.text.trim().to_string())));
        }
    }

    // A final pass: the Total amount is often the very last line on the
    // frame (same row as its label, or directly below it), so one more
    // swap attempt after the scan catches what the in-loop checks above
    // could only see retroactively on a *subsequent* line.
    try_total_swap(&total_label, &mut total, &mut amounts);

    filter_middle_column_artifacts(&mut unknowns, &mut amounts);
    drop_entities_below_total(&mut unknowns, &mut amounts, &total_label, &total);

    let mut positions = assemble_positions(&amounts, &mut unknowns, opts, true);
    if positions.is_empty() && !amounts.is_empty() {
        positions = assemble_positions(&amounts, &mut unknowns, opts, false);
    }
    positions.retain(|p| !opts.matches_any_total_label(&p.product.normalized_text));

    bind_units(&mut positions, &unit_prices, &unit_quantities);

    Receipt {
        positions,
        store,
        total_label: total_label.as_ref().and_then(|e| e.value.as_text().map(str::to_string)),
        total: total.as_ref().and_then(|e| e.value.as_decimal()),
        purchase_date: purchase_date_entity.as_ref().and_then(|e| match &e.value {
            EntityValue::PurchaseDate(d) => Some(*d),
            _ => None,
        }),
        bounds: Some(bounds),
        entities: None,
        timestamp: 0,
    }
}

/// Total identification (spec §4.1 step 4 "Total identification (swap)"):
/// given a recorded TotalLabel, find the Amount geometrically closest
/// below it and, in place, swap it for the current Total (demoting any
/// prior Total back to an Amount).
fn try_total_swap(
    total_label: &Option<RecognizedEntity>,
    total: &mut Option<RecognizedEntity>,
    amounts: &mut Vec<RecognizedEntity>,
) {
    let Some(label) = total_label else { return };
    let Some(best_idx) = nearest_amount_below(&label.line.bbox, amounts) else { return };
    let candidate = amounts[best_idx].clone();
    let already_is_total = total.as_ref().map(|t| t.line == candidate.line).unwrap_or(false);
    if already_is_total {
        return;
    }
    if let Some(prior) = total.take() {
        if let EntityValue::Total(v) = prior.value {
            amounts.push(RecognizedEntity::new(prior.line, EntityValue::Amount(v)));
        }
    }
    amounts.remove(best_idx);
    if let EntityValue::Amount(v) = candidate.value {
        *total = Some(RecognizedEntity::new(candidate.line, EntityValue::Total(v)));
    }
}

fn nearest_amount_below(label_bbox: &Rect, amounts: &[RecognizedEntity]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, a) in amounts.iter().enumerate() {
        if a.line.bbox.top < label_bbox.top {
            continue;
        }
        let overlap = label_bbox.vertical_overlap(&a.line.bbox);
        let dy = a.line.bbox.top - label_bbox.top;
        let score = dy - overlap * 1000.0; // heavier overlap wins, then closer
        if best.map(|(_, b)| score < b).unwrap_or(true) {
            best = Some((i, score));
        }
    }
    best.map(|(i, _)| i)
}

fn digit_ratio(text: &str) -> f64 {
    let total = text.chars().filter(|c| !c.is_whitespace()).count();
    if total == 0 {
        return 0.0;
    }
    let digits = text.chars().filter(|c| c.is_ascii_digit()).count();
    digits as f64 / total as f64
}

/// Recognize a `N × price` row (spec §4.1 step 4 "Unit price/quantity"),
/// returning `(quantity, unit_price, leading_text)`.
fn parse_unit_row(text: &str, cjk_frame: bool) -> Option<(Option<u32>, Option<Decimal>, Option<String>)> {
    let folded = normalize::fold_fullwidth(text);
    let re = unit_row_regex();
    let caps = re.captures(&folded)?;
    let qty: Option<u32> = caps.get(1).and_then(|m| m.as_str().parse().ok());
    let price_text = caps.get(2).map(|m| m.as_str());
    let price = price_text.and_then(|p| format::parse_amount(p, cjk_frame));
    let leading = folded[..caps.get(0)?.start()].trim();
    if qty.is_none() && price.is_none() {
        return None;
    }
    Some((qty, price, Some(leading.to_string())))
}

fn unit_row_regex() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"(\d+)\s*[x×]\s*([0-9.,]+)").expect("valid regex"))
}

/// Drop Unknown/Amount entities sandwiched strictly between the leftmost
/// Unknown and rightmost Amount and vertically aligned with either — a
/// middle-column artifact (spec §4.1 step 5 `filter_entities`).
fn filter_middle_column_artifacts(unknowns: &mut Vec<RecognizedEntity>, amounts: &mut Vec<RecognizedEntity>) {
    let leftmost = unknowns.iter().min_by(|a, b| a.line.bbox.left.total_cmp(&b.line.bbox.left)).cloned();
    let rightmost = amounts.iter().max_by(|a, b| a.line.bbox.right.total_cmp(&b.line.bbox.right)).cloned();
    let (Some(leftmost), Some(rightmost)) = (leftmost, rightmost) else { return };
    if leftmost.line == rightmost.line {
        return;
    }

    let is_artifact = |rect: &Rect| -> bool {
        let between = rect.left > leftmost.line.bbox.right && rect.right < rightmost.line.bbox.left;
        let aligned = rect.vertical_overlap(&leftmost.line.bbox) > 0.0
            || rect.vertical_overlap(&rightmost.line.bbox) > 0.0;
        between && aligned
    };

    unknowns.retain(|u| u.line == leftmost.line || !is_artifact(&u.line.bbox));
    amounts.retain(|a| a.line == rightmost.line || !is_artifact(&a.line.bbox));
}

fn drop_entities_below_total(
    unknowns: &mut Vec<RecognizedEntity>,
    amounts: &mut Vec<RecognizedEntity>,
    total_label: &Option<RecognizedEntity>,
    total: &Option<RecognizedEntity>,
) {
    let (Some(label), Some(total)) = (total_label, total) else { return };
    let floor = label.line.bbox.bottom.max(total.line.bbox.bottom);
    unknowns.retain(|u| u.line.bbox.top <= floor);
    amounts.retain(|a| a.line.bbox.top <= floor);
}

/// Position assembly (spec §4.1 step 6): pair each Amount with its nearest
/// unconsumed Unknown to the left, checked mutual-nearest.
fn assemble_positions(
    amounts: &[RecognizedEntity],
    unknowns: &mut Vec<RecognizedEntity>,
    opts: &Options,
    strict: bool,
) -> Vec<Position> {
    let mut positions = Vec::new();
    let mut consumed = vec![false; unknowns.len()];

    for amount in amounts {
        let Some(value) = amount.value.as_decimal() else { continue };
        let candidate = nearest_left_unknown(amount, unknowns, &consumed, opts, strict);
        let Some(u_idx) = candidate else { continue };

        // Mutual-nearest: the unknown's own nearest amount must be this one.
        if let Some(mutual_amount) = nearest_amount_for_unknown(&unknowns[u_idx], amounts, strict) {
            if mutual_amount.line != amount.line {
                continue;
            }
        }

        consumed[u_idx] = true;
        let unknown_text = match &unknowns[u_idx].value {
            EntityValue::Unknown(t) => t.clone(),
            _ => continue,
        };
        let normalized = normalize::normalize_key(&unknown_text);
        let bbox = unknowns[u_idx].line.bbox;
        positions.push(
            Position::new(Product::new(unknown_text, normalized), Price::new(value), 0).with_bbox(bbox),
        );
    }

    unknowns.retain({
        let mut i = 0;
        move |_| {
            let keep = !consumed.get(i).copied().unwrap_or(false);
            i += 1;
            keep
        }
    });

    positions
}

fn nearest_left_unknown(
    amount: &RecognizedEntity,
    unknowns: &[RecognizedEntity],
    consumed: &[bool],
    opts: &Options,
    strict: bool,
) -> Option<usize> {
    let a_rect = amount.line.bbox;
    let mut best: Option<(usize, f64)> = None;
    for (i, u) in unknowns.iter().enumerate() {
        if consumed[i] {
            continue;
        }
        let text = match &u.value {
            EntityValue::Unknown(t) => t,
            _ => continue,
        };
        if opts.matches_any_total_label(text) {
            continue;
        }
        let u_rect = u.line.bbox;
        if u_rect.right > a_rect.left {
            continue;
        }
        let dy = a_rect.delta_center_y(&u_rect);
        if strict && dy > a_rect.height().max(1.0) {
            continue;
        }
        let dx = a_rect.left - u_rect.right;
        if best.map(|(_, b)| dx < b).unwrap_or(true) {
            best = Some((i, dx));
        }
    }
    best.map(|(i, _)| i)
}

fn nearest_amount_for_unknown<'a>(
    unknown: &RecognizedEntity,
    amounts: &'a [RecognizedEntity],
    strict: bool,
) -> Option<&'a RecognizedEntity> {
    let u_rect = unknown.line.bbox;
    let mut best: Option<(&RecognizedEntity, f64)> = None;
    for a in amounts {
        let a_rect = a.line.bbox;
        if a_rect.left < u_rect.right {
            continue;
        }
        let dy = a_rect.delta_center_y(&u_rect);
        if strict && dy > a_rect.height().max(1.0) {
            continue;
        }
        let dx = a_rect.left - u_rect.right;
        if best.map(|(_, b)| dx < b).unwrap_or(true) {
            best = Some((a, dx));
        }
    }
    best.map(|(a, _)| a)
}

/// Unit binding (spec §4.1 step 7): attach the nearest UnitPrice/
/// UnitQuantity pair whose product approximates the position's price.
fn bind_units(positions: &mut [Position], unit_prices: &[RecognizedEntity], unit_quantities: &[RecognizedEntity]) {
    for position in positions.iter_mut() {
        let price = position.price.value;
        let nearest_price = unit_prices.iter().filter_map(|e| e.value.as_decimal()).next();
        let nearest_qty = unit_quantities
            .iter()
            .filter_map(|e| match e.value {
                EntityValue::UnitQuantity(q) => Some(q),
                _ => None,
            })
            .next();

        let unit = match (nearest_qty, nearest_price) {
            (Some(q), Some(p)) => Unit::try_new(q, p, price, QUANTITY_TOLERANCE)
                .or_else(|| {
                    if p != Decimal::ZERO {
                        let derived_q = (price / p).round().to_string().parse::<u32>().ok()?;
                        Unit::try_new(derived_q, p, price, QUANTITY_TOLERANCE)
                    } else {
                        None
                    }
                })
                .or_else(|| {
                    if q != 0 {
                        let derived_p = price / Decimal::from(q);
                        Unit::try_new(q, derived_p, price, QUANTITY_TOLERANCE)
                    } else {
                        None
                    }
                }),
            _ => None,
        };
        position.unit = unit;
    }
}
