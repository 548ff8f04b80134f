//! Page-parallel document processing
//!
//! Pages are independent, so a document is processed by a small pool of
//! scoped worker threads pulling page indices from a shared cursor. Within a
//! page everything runs sequentially.

use crate::config::ReviewBounds;
use crate::error::SignResult;
use crate::pipeline::{PageOptions, PageResult, SignPipeline};
use crate::source::PageSource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    /// Maximum number of pages processed at once
    pub workers: usize,

    pub options: PageOptions,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            options: PageOptions::default(),
        }
    }
}

impl BatchConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_options(mut self, options: PageOptions) -> Self {
        self.options = options;
        self
    }
}

/// Document-level roll-up of page results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub total_pages: usize,
    pub total_signs: usize,
    pub pages_with_signs: usize,

    /// Zero-based indices of pages whose sign count is outside the review bounds
    pub pages_for_review: Vec<u32>,

    /// Zero-based indices of pages cut short by the page budget
    pub partial_pages: Vec<u32>,

    /// Sign counts per thousand bucket (`2000s`)
    pub series_histogram: BTreeMap<String, usize>,
}

impl DocumentSummary {
    pub fn from_pages(pages: &[PageResult], review: &ReviewBounds) -> Self {
        let mut series_histogram = BTreeMap::new();
        for record in pages.iter().flat_map(|page| &page.records) {
            *series_histogram.entry(record.identifier.thousand_bucket()).or_insert(0) += 1;
        }

        Self {
            total_pages: pages.len(),
            total_signs: pages.iter().map(|page| page.records.len()).sum(),
            pages_with_signs: pages.iter().filter(|page| !page.records.is_empty()).count(),
            pages_for_review: pages
                .iter()
                .filter(|page| review.needs_review(page.records.len()))
                .map(|page| page.page.page_index)
                .collect(),
            partial_pages: pages
                .iter()
                .filter(|page| page.summary.partial)
                .map(|page| page.page.page_index)
                .collect(),
            series_histogram,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentReport {
    pub document: String,
    pub pages: Vec<PageResult>,
    pub summary: DocumentSummary,
}

/// Process `pages` of `source`, returning results in the order given.
///
/// The first failing page (in page order) fails the document.
pub fn process_document(
    pipeline: &SignPipeline,
    source: &dyn PageSource,
    pages: &[u32],
    config: &BatchConfig,
) -> SignResult<DocumentReport> {
    let workers = config.workers.clamp(1, pages.len().max(1));
    let cursor = AtomicUsize::new(0);

    tracing::info!(
        document = source.document_id(),
        pages = pages.len(),
        workers,
        "processing document"
    );

    let mut slots: Vec<Option<SignResult<PageResult>>> = (0..pages.len()).map(|_| None).collect();
    let cursor = &cursor;
    let options = &config.options;
    thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                scope.spawn(move || {
                    let mut done = Vec::new();
                    loop {
                        let slot = cursor.fetch_add(1, Ordering::Relaxed);
                        let Some(&page_index) = pages.get(slot) else {
                            break;
                        };
                        done.push((slot, pipeline.process_page(source, page_index, options)));
                    }
                    done
                })
            })
            .collect();

        for handle in handles {
            match handle.join() {
                Ok(done) => {
                    for (slot, result) in done {
                        slots[slot] = Some(result);
                    }
                }
                Err(payload) => std::panic::resume_unwind(payload),
            }
        }
    });

    let mut results = Vec::with_capacity(pages.len());
    for result in slots.into_iter().flatten() {
        results.push(result?);
    }

    let summary = DocumentSummary::from_pages(&results, &pipeline.config().review);
    tracing::info!(
        document = source.document_id(),
        signs = summary.total_signs,
        review = summary.pages_for_review.len(),
        "document processed"
    );

    Ok(DocumentReport { document: source.document_id().to_string(), pages: results, summary })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractionConfig;
    use crate::error::SignError;
    use crate::ocr::NoopBackend;
    use signscan_pdf::fixtures::{pdf_bytes, PlacedText};
    use signscan_pdf::LopdfEngine;
    use std::sync::Arc;

    fn words(ids: &[&str]) -> Vec<PlacedText> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| PlacedText::new(*id, 50 + 100 * i as i64, 700, 10))
            .collect()
    }

    fn source() -> crate::source::PdfPageSource<LopdfEngine> {
        let bytes = pdf_bytes(
            1000,
            800,
            &[
                words(&["2001", "2002", "2003", "2004", "2005", "3001"]),
                words(&[]),
                words(&["1001"]),
            ],
        )
        .expect("fixture PDF builds");
        crate::source::PdfPageSource::from_bytes(LopdfEngine::new(), "plan.pdf", bytes, 72.0)
            .expect("PDF opens")
    }

    fn pipeline() -> SignPipeline {
        SignPipeline::new(ExtractionConfig::default(), Arc::new(NoopBackend)).expect("pipeline")
    }

    #[test]
    fn test_results_are_in_page_order() {
        let report = process_document(
            &pipeline(),
            &source(),
            &[0, 1, 2],
            &BatchConfig::default().with_workers(3),
        )
        .expect("document processes");

        let indices: Vec<u32> = report.pages.iter().map(|p| p.page.page_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(report.document, "plan.pdf");
    }

    #[test]
    fn test_summary_counts() {
        let report =
            process_document(&pipeline(), &source(), &[0, 1, 2], &BatchConfig::default())
                .expect("document processes");
        let summary = &report.summary;

        assert_eq!(summary.total_pages, 3);
        assert_eq!(summary.total_signs, 7);
        assert_eq!(summary.pages_with_signs, 2);
        assert_eq!(summary.pages_for_review, vec![1, 2]);
        assert_eq!(summary.series_histogram.get("2000s"), Some(&5));
        assert_eq!(summary.series_histogram.get("3000s"), Some(&1));
        assert_eq!(summary.series_histogram.get("1000s"), Some(&1));
        assert!(summary.partial_pages.is_empty());
    }

    #[test]
    fn test_single_worker_matches_parallel() {
        let serial = process_document(
            &pipeline(),
            &source(),
            &[2, 0],
            &BatchConfig::default().with_workers(1),
        )
        .expect("serial run");
        let parallel = process_document(
            &pipeline(),
            &source(),
            &[2, 0],
            &BatchConfig::default().with_workers(4),
        )
        .expect("parallel run");

        assert_eq!(serial, parallel);
        assert_eq!(serial.pages[0].page.page_index, 2);
    }

    #[test]
    fn test_bad_page_fails_document() {
        let err = process_document(&pipeline(), &source(), &[0, 9], &BatchConfig::default())
            .expect_err("page 9 does not exist");
        assert!(matches!(err, SignError::PageOutOfRange { page: 9, .. }));
    }

    #[test]
    fn test_empty_page_list() {
        let report = process_document(&pipeline(), &source(), &[], &BatchConfig::default())
            .expect("nothing to do");
        assert!(report.pages.is_empty());
        assert_eq!(report.summary.total_signs, 0);
    }
}
