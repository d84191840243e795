//! The OCR collaborator's contract (spec §6): consumed, never produced, by
//! this crate.

use crate::geometry::Rect;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextLine {
    pub text: String,
    pub bbox: Rect,
    pub confidence: Option<f64>,
    pub corner_points: Option<Vec<crate::geometry::Point>>,
}

impl TextLine {
    pub fn new(text: impl Into<String>, bbox: Rect) -> Self {
        Self { text: text.into(), bbox, confidence: None, corner_points: None }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OcrBlock {
    pub lines: Vec<TextLine>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OcrResult {
    pub blocks: Vec<OcrBlock>,
}

impl OcrResult {
    /// Every `TextLine` across every block, in their original nesting
    /// order (parser step 1 re-sorts this for scanning).
    pub fn all_lines(&self) -> impl Iterator<Item = &TextLine> {
        self.blocks.iter().flat_map(|b| b.lines.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(|b| b.lines.is_empty())
    }
}
