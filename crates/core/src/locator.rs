//! Label location
//!
//! Reads the identifier belonging to a candidate box. Labels sit inside the
//! box, above it, or beside it, so regions are tried in that order and the
//! first one yielding a valid identifier wins.

use crate::config::LocatorConfig;
use crate::geometry::{BoundingBox, PageDimensions};
use crate::identifier::{clean_recognized, Identifier};
use crate::model::{CandidateBox, ConfidenceTier, Evidence, PageImage, Strategy};
use crate::ocr::{RecognitionBackend, Recognition};
use image::imageops::{self, FilterType};
use image::GrayImage;
use imageproc::contrast::{equalize_histogram, otsu_level, threshold, ThresholdType};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Where around a candidate a label was searched for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchRegion {
    Inside,
    Above,
    Left,
    Right,
    Relaxed,
}

/// A label read for one candidate
#[derive(Debug, Clone, PartialEq)]
pub struct LocatedLabel {
    pub identifier: Identifier,
    pub confidence: f32,
    pub tier: ConfidenceTier,
    pub region: SearchRegion,

    /// Page area the label was read from
    pub region_bbox: BoundingBox,
}

impl LocatedLabel {
    /// Evidence placing the label's identifier at the candidate's box
    pub fn into_evidence(self, candidate: &CandidateBox) -> Evidence {
        Evidence {
            source: Strategy::LabelLocator,
            identifier: self.identifier,
            bbox: candidate.bbox,
            tier: self.tier,
            backend_confidence: Some(self.confidence),
            stack: candidate.stack,
        }
    }
}

pub struct LabelLocator {
    backend: Arc<dyn RecognitionBackend>,
    config: LocatorConfig,
}

impl LabelLocator {
    pub fn new(backend: Arc<dyn RecognitionBackend>, config: LocatorConfig) -> Self {
        Self { backend, config }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Primary search regions in order, clamped to the page
    pub fn search_regions(
        &self,
        bbox: &BoundingBox,
        dims: PageDimensions,
    ) -> Vec<(SearchRegion, BoundingBox)> {
        let pad_side = self.config.pad_side as f64;
        let pad_above = self.config.pad_above as f64;
        let overlap = (self.config.overlap_into_box as f64).min(bbox.height);

        let regions = [
            (SearchRegion::Inside, *bbox),
            (
                SearchRegion::Above,
                BoundingBox::new(
                    bbox.x - pad_side,
                    bbox.y - pad_above,
                    bbox.width + 2.0 * pad_side,
                    pad_above + overlap,
                ),
            ),
            (
                SearchRegion::Left,
                BoundingBox::new(
                    bbox.x - bbox.width - pad_side,
                    bbox.y,
                    bbox.width + pad_side,
                    bbox.height,
                ),
            ),
            (
                SearchRegion::Right,
                BoundingBox::new(bbox.right(), bbox.y, bbox.width + pad_side, bbox.height),
            ),
        ];

        regions
            .into_iter()
            .filter_map(|(kind, region)| region.clamp_to(dims).map(|clamped| (kind, clamped)))
            .collect()
    }

    /// Union of the primary search regions
    pub fn neighbourhood(&self, bbox: &BoundingBox, dims: PageDimensions) -> BoundingBox {
        self.search_regions(bbox, dims)
            .iter()
            .fold(*bbox, |acc, (_, region)| acc.union(region))
    }

    fn relaxed_region(&self, bbox: &BoundingBox, dims: PageDimensions) -> Option<BoundingBox> {
        let dx = bbox.width + 2.0 * self.config.pad_side as f64;
        let dy = 2.0 * self.config.pad_above as f64;
        bbox.expand(dx, dy).clamp_to(dims)
    }

    /// Find the label of `candidate`, or `None` when nothing valid is read
    pub fn locate(&self, page: &PageImage, candidate: &CandidateBox) -> Option<LocatedLabel> {
        let dims = page.dimensions();

        for (region, region_bbox) in self.search_regions(&candidate.bbox, dims) {
            if let Some((identifier, confidence)) = self.read_region(page, &region_bbox) {
                let tier = if confidence >= self.config.high_confidence {
                    ConfidenceTier::High
                } else {
                    ConfidenceTier::Medium
                };
                return Some(LocatedLabel { identifier, confidence, tier, region, region_bbox });
            }
        }

        if self.config.relaxed_search {
            if let Some(region_bbox) = self.relaxed_region(&candidate.bbox, dims) {
                if let Some((identifier, confidence)) = self.read_region(page, &region_bbox) {
                    return Some(LocatedLabel {
                        identifier,
                        confidence,
                        tier: ConfidenceTier::Low,
                        region: SearchRegion::Relaxed,
                        region_bbox,
                    });
                }
            }
        }

        tracing::debug!(
            page = page.page.page_index,
            x = candidate.bbox.x,
            y = candidate.bbox.y,
            "no label found for candidate"
        );
        None
    }

    /// Best valid identifier read from one region
    fn read_region(&self, page: &PageImage, region: &BoundingBox) -> Option<(Identifier, f32)> {
        let (x, y, width, height) = region.pixel_rect(page.dimensions())?;
        let crop = imageops::crop_imm(&page.image, x, y, width, height).to_image();
        let gray = imageops::grayscale(&crop);

        let mut best: Option<(Identifier, f32)> = None;
        for variant in self.preprocess(gray) {
            let recognition = match self.backend.recognize(&variant, &self.config.whitelist) {
                Ok(recognition) => recognition,
                Err(err) => {
                    tracing::debug!(
                        backend = self.backend.name(),
                        error = %err,
                        "recognition failed"
                    );
                    continue;
                }
            };
            if let Some(found) = self.accept(recognition) {
                if best.as_ref().map_or(true, |(_, confidence)| found.1 > *confidence) {
                    best = Some(found);
                }
            }
        }
        best
    }

    fn accept(&self, recognition: Recognition) -> Option<(Identifier, f32)> {
        if recognition.confidence < self.config.min_confidence {
            return None;
        }
        let identifier = clean_recognized(&recognition.text)?;
        Some((identifier, recognition.confidence))
    }

    /// Upscale, equalize and binarize a region; the inverse is added on request
    pub fn preprocess(&self, gray: GrayImage) -> Vec<GrayImage> {
        let factor = self.config.upscale_factor;
        let gray = if factor > 1 && gray.height() < self.config.upscale_below_height {
            let (width, height) = (gray.width() * factor, gray.height() * factor);
            imageops::resize(&gray, width, height, FilterType::CatmullRom)
        } else {
            gray
        };

        let equalized = equalize_histogram(&gray);
        let level = otsu_level(&equalized);
        let binary = threshold(&equalized, level, ThresholdType::Binary);

        let mut variants = Vec::with_capacity(2);
        if self.config.try_inverted {
            let mut inverted = binary.clone();
            imageops::invert(&mut inverted);
            variants.push(binary);
            variants.push(inverted);
        } else {
            variants.push(binary);
        }
        variants
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BoundingBox;
    use crate::model::PageRef;
    use crate::ocr::OcrError;
    use image::{Rgb, RgbImage};
    use std::collections::{BTreeSet, VecDeque};
    use std::sync::Mutex;

    /// Replays queued responses, one per call
    struct ScriptedBackend {
        responses: Mutex<VecDeque<Result<Recognition, OcrError>>>,
    }

    impl ScriptedBackend {
        fn new(responses: Vec<Result<Recognition, OcrError>>) -> Arc<Self> {
            Arc::new(Self { responses: Mutex::new(responses.into()) })
        }
    }

    impl RecognitionBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        fn recognize(&self, _: &GrayImage, _: &str) -> Result<Recognition, OcrError> {
            self.responses.lock().unwrap().pop_front().unwrap_or_else(|| Ok(Recognition::empty()))
        }
    }

    fn empty() -> Result<Recognition, OcrError> {
        Ok(Recognition::empty())
    }

    fn read(text: &str, confidence: f32) -> Result<Recognition, OcrError> {
        Ok(Recognition::new(text, confidence))
    }

    fn page() -> PageImage {
        let image = RgbImage::from_pixel(1000, 1000, Rgb([255, 255, 255]));
        PageImage::new(PageRef::new("test", 0), image)
    }

    fn candidate() -> CandidateBox {
        CandidateBox::new(BoundingBox::new(400.0, 400.0, 60.0, 40.0), BTreeSet::new())
    }

    fn locator(backend: Arc<ScriptedBackend>) -> LabelLocator {
        LabelLocator::new(backend, LocatorConfig::default())
    }

    #[test]
    fn test_inside_label_wins_first() {
        let locator = locator(ScriptedBackend::new(vec![read("2001", 0.92)]));
        let label = locator.locate(&page(), &candidate()).expect("label found");

        assert_eq!(label.identifier.as_str(), "2001");
        assert_eq!(label.region, SearchRegion::Inside);
        assert_eq!(label.tier, ConfidenceTier::High);
    }

    #[test]
    fn test_best_variant_confidence_is_used() {
        let locator = locator(ScriptedBackend::new(vec![read("2001", 0.5), read("2001", 0.8)]));
        let label = locator.locate(&page(), &candidate()).expect("label found");

        assert_eq!(label.confidence, 0.8);
        assert_eq!(label.tier, ConfidenceTier::High);
    }

    #[test]
    fn test_label_above_box_is_medium_below_high_threshold() {
        let locator =
            locator(ScriptedBackend::new(vec![empty(), empty(), read("-3100.2", 0.55), empty()]));
        let label = locator.locate(&page(), &candidate()).expect("label found");

        assert_eq!(label.identifier.as_str(), "3100.2");
        assert_eq!(label.region, SearchRegion::Above);
        assert_eq!(label.tier, ConfidenceTier::Medium);
        assert_eq!(label.region_bbox, BoundingBox::new(380.0, 350.0, 100.0, 60.0));
    }

    #[test]
    fn test_relaxed_pass_is_low_tier() {
        let mut responses: Vec<_> = (0..8).map(|_| empty()).collect();
        responses.push(read("2001", 0.9));
        let label = locator(ScriptedBackend::new(responses))
            .locate(&page(), &candidate())
            .expect("label found");

        assert_eq!(label.region, SearchRegion::Relaxed);
        assert_eq!(label.tier, ConfidenceTier::Low);
    }

    #[test]
    fn test_low_confidence_and_invalid_text_are_discarded() {
        let backend = ScriptedBackend::new(vec![read("2001", 0.1), read("0000", 0.99)]);
        let config = LocatorConfig::default().with_relaxed_search(false);
        let locator = LabelLocator::new(backend, config);

        assert!(locator.locate(&page(), &candidate()).is_none());
    }

    #[test]
    fn test_backend_errors_mean_no_match() {
        let responses = (0..10).map(|_| Err(OcrError::backend("boom"))).collect();
        let locator = locator(ScriptedBackend::new(responses));

        assert!(locator.locate(&page(), &candidate()).is_none());
    }

    #[test]
    fn test_regions_are_clamped_and_empty_ones_skipped() {
        let locator = locator(ScriptedBackend::new(Vec::new()));
        let corner = BoundingBox::new(0.0, 0.0, 50.0, 40.0);
        let regions = locator.search_regions(&corner, PageDimensions::new(1000, 1000));
        let kinds: Vec<SearchRegion> = regions.iter().map(|(kind, _)| *kind).collect();

        assert_eq!(kinds, vec![SearchRegion::Inside, SearchRegion::Above, SearchRegion::Right]);
        assert_eq!(regions[1].1, BoundingBox::new(0.0, 0.0, 70.0, 10.0));
    }

    #[test]
    fn test_preprocess_upscales_small_regions_and_adds_inverse() {
        let locator = locator(ScriptedBackend::new(Vec::new()));
        let mut gray = GrayImage::from_pixel(30, 20, image::Luma([230]));
        for x in 10..20 {
            for y in 5..15 {
                gray.put_pixel(x, y, image::Luma([20]));
            }
        }

        let variants = locator.preprocess(gray);
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[0].dimensions(), (60, 40));
        for (a, b) in variants[0].pixels().zip(variants[1].pixels()) {
            assert_eq!(a[0], 255 - b[0]);
        }
    }
}
