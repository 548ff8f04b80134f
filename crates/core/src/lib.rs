//! Sign identifier extraction for architectural floor plans.
//!
//! Locates sign labels on plan pages and reads their identifiers, combining
//! the embedded PDF text layer with colour-box detection and recognition on
//! the page raster. Results from every strategy are reconciled into one
//! deduplicated, confidence-ranked set of [`SignRecord`]s per page.

pub mod annotate;
pub mod batch;
pub mod color;
pub mod config;
pub mod embedded;
pub mod error;
pub mod geometry;
pub mod identifier;
pub mod locator;
pub mod model;
pub mod ocr;
pub mod pipeline;
pub mod reconcile;
pub mod source;
pub mod stack;

pub use annotate::annotate;
pub use batch::{process_document, BatchConfig, DocumentReport, DocumentSummary};
pub use color::ColorRegionDetector;
pub use config::{
    default_palette, CoverageConfig, DetectionBounds, EmbeddedConfig, ExtractionConfig,
    LocatorConfig, PaletteEntry, ReconcileConfig, ReviewBounds, StackConfig, REFERENCE_DPI,
};
pub use embedded::{embedded_evidence, EmbeddedTextExtractor};
pub use error::{SignError, SignResult};
pub use geometry::{BoundingBox, PageDimensions, PercentBox};
pub use identifier::{clean_recognized, is_identifier, match_identifier, Identifier};
pub use locator::{LabelLocator, LocatedLabel, SearchRegion};
pub use model::{
    CandidateBox, ConfidenceTier, DetectionOrigin, Evidence, PageImage, PageRef, SeriesTag,
    SignRecord, StackPosition, Strategy, TextToken, TokenOrigin,
};
pub use ocr::{
    with_call_timeout, NoopBackend, OcrError, Recognition, RecognitionBackend, TesseractCli,
    TesseractConfig, TimeoutBackend,
};
pub use pipeline::{PageOptions, PageResult, PageSummary, SignPipeline};
pub use reconcile::{reconcile, DropReason, DroppedEvidence, Reconciliation};
pub use source::{ImagePageSource, PageSource, PdfPageSource, DEFAULT_DPI};
pub use stack::StackSplitter;
