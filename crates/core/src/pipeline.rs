//! Per-page extraction pipeline
//!
//! Runs the strategies in a fixed order: embedded text first, then (only when
//! coverage falls short) colour detection, stack splitting and label location
//! on the page raster. All evidence goes through one reconciliation step.

use crate::color::ColorRegionDetector;
use crate::config::ExtractionConfig;
use crate::embedded::{embedded_evidence, EmbeddedTextExtractor};
use crate::error::SignResult;
use crate::geometry::{BoundingBox, PageDimensions};
use crate::locator::LabelLocator;
use crate::model::{CandidateBox, ConfidenceTier, PageRef, SignRecord, Strategy, TextToken};
use crate::ocr::{with_call_timeout, RecognitionBackend};
use crate::reconcile::{reconcile, DroppedEvidence};
use crate::source::PageSource;
use crate::stack::StackSplitter;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageOptions {
    /// Number of signs the caller expects on the page
    pub expected_count: Option<usize>,
}

impl PageOptions {
    pub fn with_expected_count(mut self, expected: Option<usize>) -> Self {
        self.expected_count = expected;
        self
    }
}

/// Per-page metadata accompanying the records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSummary {
    pub dimensions: PageDimensions,
    pub tier_counts: BTreeMap<ConfidenceTier, usize>,

    /// Strategies that ran, in order
    pub strategies: Vec<Strategy>,

    pub candidate_count: usize,

    /// Set when the page budget ran out before every candidate was read
    pub partial: bool,

    pub dropped: Vec<DroppedEvidence>,
    pub candidates: Vec<CandidateBox>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    pub page: PageRef,
    pub records: Vec<SignRecord>,
    pub summary: PageSummary,
}

pub struct SignPipeline {
    config: ExtractionConfig,
    embedded: EmbeddedTextExtractor,
    detector: ColorRegionDetector,
    splitter: StackSplitter,
    locator: LabelLocator,
}

impl SignPipeline {
    /// Build a pipeline; every recognition call is bounded by
    /// `config.locator.timeout_ms` when it is set.
    pub fn new(config: ExtractionConfig, backend: Arc<dyn RecognitionBackend>) -> SignResult<Self> {
        config.validate()?;
        let backend = with_call_timeout(backend, config.locator.timeout_ms);
        Ok(Self {
            embedded: EmbeddedTextExtractor::new(config.embedded.clone()),
            detector: ColorRegionDetector::new(config.palette.clone(), config.detection.clone())
                .with_stack(&config.stack),
            splitter: StackSplitter::from_config(&config.stack),
            locator: LabelLocator::new(backend, config.locator.clone()),
            config,
        })
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    pub fn process_page(
        &self,
        source: &dyn PageSource,
        page_index: u32,
        options: &PageOptions,
    ) -> SignResult<PageResult> {
        let started = Instant::now();
        let budget = self.config.page_budget_ms.map(Duration::from_millis);
        let page = PageRef::new(source.document_id(), page_index);
        let dims = source.page_dimensions(page_index)?;

        let mut strategies = Vec::new();
        let mut tokens = Vec::new();
        if let Some(text) = source.page_text(page_index)? {
            strategies.push(Strategy::EmbeddedText);
            tokens = self.embedded.extract(&text, dims);
        }
        let mut evidence = embedded_evidence(&tokens);

        let distinct: BTreeSet<_> = evidence.iter().map(|e| e.identifier.clone()).collect();
        let mut candidates = Vec::new();
        let mut partial = false;

        if self.config.coverage.needs_fallback(distinct.len(), options.expected_count) {
            tracing::debug!(
                page = page_index,
                found = distinct.len(),
                expected = ?options.expected_count,
                "embedded coverage insufficient, scanning raster"
            );

            let raster = source.rasterize(page_index)?;
            let raster_dims = raster.dimensions();
            let (sx, sy) = scale_between(raster_dims, dims);
            if (sx, sy) != (1.0, 1.0) {
                tracing::warn!(
                    page = page_index,
                    raster = ?raster_dims,
                    expected = ?dims,
                    "raster size differs from page dimensions; rescaling detections"
                );
            }

            strategies.push(Strategy::ColorDetection);
            candidates = self
                .detector
                .detect(&raster)
                .iter()
                .flat_map(|candidate| self.splitter.split(candidate))
                .collect::<Vec<_>>();

            strategies.push(Strategy::LabelLocator);
            for candidate in &candidates {
                if budget.is_some_and(|budget| started.elapsed() > budget) {
                    tracing::warn!(
                        page = page_index,
                        "page budget exceeded, returning partial results"
                    );
                    partial = true;
                    break;
                }

                let neighbourhood =
                    self.locator.neighbourhood(&candidate.bbox, raster_dims).scale(sx, sy);
                if has_embedded_match(&tokens, &neighbourhood) {
                    tracing::debug!(
                        page = page_index,
                        x = candidate.bbox.x,
                        y = candidate.bbox.y,
                        "candidate already labelled by embedded text"
                    );
                    continue;
                }

                if let Some(label) = self.locator.locate(&raster, candidate) {
                    let mut item = label.into_evidence(candidate);
                    item.bbox = item.bbox.scale(sx, sy);
                    evidence.push(item);
                }
            }

            candidates = candidates
                .into_iter()
                .map(|mut candidate| {
                    candidate.bbox = candidate.bbox.scale(sx, sy);
                    candidate
                })
                .collect();
        }

        let reconciliation = reconcile(evidence, dims, &page, &self.config.reconcile);

        let mut tier_counts = BTreeMap::new();
        for record in &reconciliation.records {
            *tier_counts.entry(record.confidence).or_insert(0) += 1;
        }

        tracing::info!(
            document = %page.document,
            page = page_index,
            signs = reconciliation.records.len(),
            candidates = candidates.len(),
            dropped = reconciliation.dropped.len(),
            partial,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "page processed"
        );

        Ok(PageResult {
            page,
            records: reconciliation.records,
            summary: PageSummary {
                dimensions: dims,
                tier_counts,
                strategies,
                candidate_count: candidates.len(),
                partial,
                dropped: reconciliation.dropped,
                candidates,
            },
        })
    }
}

/// Scale factors mapping `from` pixels onto `to` pixels
fn scale_between(from: PageDimensions, to: PageDimensions) -> (f64, f64) {
    if from == to || from.width == 0 || from.height == 0 {
        return (1.0, 1.0);
    }
    (to.width as f64 / from.width as f64, to.height as f64 / from.height as f64)
}

fn has_embedded_match(tokens: &[TextToken], neighbourhood: &BoundingBox) -> bool {
    tokens.iter().any(|token| token.bbox.intersects(neighbourhood))
}
