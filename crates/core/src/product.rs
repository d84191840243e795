//! `Product` — the textual half of a `Position` (spec §3).

use crate::confidence::Confidence;

#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub text: String,
    pub normalized_text: String,
    pub confidence: Option<Confidence>,
    /// Other OCR readings of the same product across frames, oldest first.
    pub alternative_texts: Vec<String>,
}

impl Product {
    pub fn new(text: impl Into<String>, normalized_text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            normalized_text: normalized_text.into(),
            confidence: None,
            alternative_texts: Vec::new(),
        }
    }

    pub fn with_confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_has_no_confidence_by_default() {
        let p = Product::new("Milch", "milch");
        assert!(p.confidence.is_none());
        assert!(p.alternative_texts.is_empty());
    }

    #[test]
    fn with_confidence_sets_it() {
        let p = Product::new("Milch", "milch").with_confidence(Confidence::new(80.0, 1));
        assert_eq!(p.confidence.unwrap().value, 80);
    }
}
