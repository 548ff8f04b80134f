//! Values flowing through the extraction pipeline

use crate::geometry::{BoundingBox, PageDimensions, PercentBox};
use crate::identifier::Identifier;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A page within a document
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageRef {
    pub document: String,

    /// Zero-based page index
    pub page_index: u32,
}

impl PageRef {
    pub fn new(document: impl Into<String>, page_index: u32) -> Self {
        Self { document: document.into(), page_index }
    }
}

/// Decoded raster of one page
#[derive(Debug, Clone)]
pub struct PageImage {
    pub page: PageRef,
    pub image: RgbImage,
}

impl PageImage {
    pub fn new(page: PageRef, image: RgbImage) -> Self {
        Self { page, image }
    }

    pub fn dimensions(&self) -> PageDimensions {
        PageDimensions::new(self.image.width(), self.image.height())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenOrigin {
    Embedded,
    Ocr,
}

/// Text found on a page, with its box in page pixels
#[derive(Debug, Clone, PartialEq)]
pub struct TextToken {
    pub text: String,
    pub bbox: BoundingBox,
    pub origin: TokenOrigin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionOrigin {
    Color,
}

/// Position of a box within a split stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackPosition {
    pub index: usize,
    pub count: usize,
}

/// Region that may hold a sign label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateBox {
    pub bbox: BoundingBox,
    pub origin: DetectionOrigin,

    /// Palette entries whose pixels fall inside the box
    pub palette: BTreeSet<String>,

    /// Set on each sibling produced by splitting a stack
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<StackPosition>,
}

impl CandidateBox {
    pub fn new(bbox: BoundingBox, palette: BTreeSet<String>) -> Self {
        Self { bbox, origin: DetectionOrigin::Color, palette, stack: None }
    }
}

/// Confidence of a record, ordered `Low < Medium < High < Embedded`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    Low,
    Medium,
    High,
    Embedded,
}

impl ConfidenceTier {
    pub const ALL: [ConfidenceTier; 4] = [
        ConfidenceTier::Embedded,
        ConfidenceTier::High,
        ConfidenceTier::Medium,
        ConfidenceTier::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceTier::Low => "low",
            ConfidenceTier::Medium => "medium",
            ConfidenceTier::High => "high",
            ConfidenceTier::Embedded => "embedded",
        }
    }
}

/// Strategy that produced a piece of evidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    EmbeddedText,
    ColorDetection,
    LabelLocator,
}

/// A located identifier awaiting reconciliation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub source: Strategy,
    pub identifier: Identifier,
    pub bbox: BoundingBox,
    pub tier: ConfidenceTier,
    pub backend_confidence: Option<f32>,
    pub stack: Option<StackPosition>,
}

/// Decimal-suffixed identifiers placed together under one base
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesTag {
    pub base: String,
    pub size: usize,
}

/// One extracted sign
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignRecord {
    pub identifier: Identifier,
    pub pixel_bbox: BoundingBox,
    pub percent_bbox: PercentBox,
    pub confidence: ConfidenceTier,
    pub page: PageRef,
    pub source: Strategy,
    pub backend_confidence: Option<f32>,
    pub series: Option<SeriesTag>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::match_identifier;

    #[test]
    fn test_tier_ordering() {
        assert!(ConfidenceTier::Embedded > ConfidenceTier::High);
        assert!(ConfidenceTier::High > ConfidenceTier::Medium);
        assert!(ConfidenceTier::Medium > ConfidenceTier::Low);
    }

    #[test]
    fn test_sign_record_json_field_names() {
        let dims = PageDimensions::new(1000, 1000);
        let bbox = BoundingBox::new(100.0, 200.0, 50.0, 40.0);
        let record = SignRecord {
            identifier: match_identifier("2001").expect("valid identifier"),
            pixel_bbox: bbox,
            percent_bbox: bbox.to_percent(dims),
            confidence: ConfidenceTier::High,
            page: PageRef::new("plan.pdf", 3),
            source: Strategy::LabelLocator,
            backend_confidence: Some(0.9),
            series: None,
        };

        let value = serde_json::to_value(&record).expect("record serializes");
        assert_eq!(value["identifier"], "2001");
        assert_eq!(value["confidence"], "high");
        assert_eq!(value["source"], "label_locator");
        assert_eq!(value["page"]["document"], "plan.pdf");
        assert_eq!(value["page"]["page_index"], 3);
        assert_eq!(value["pixel_bbox"]["x"], 100.0);
        assert_eq!(value["percent_bbox"]["width_percentage"], 5.0);
        assert!(value["series"].is_null());
    }
}
