//! Extraction configuration
//!
//! One immutable [`ExtractionConfig`] value is built up front (from defaults,
//! builder calls or a TOML file) and passed to every component. Pixel-valued
//! settings are tuned for pages rendered at [`REFERENCE_DPI`];
//! [`ExtractionConfig::scaled_to_dpi`] adapts them to other resolutions.

use crate::error::{SignError, SignResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Resolution the pixel defaults are tuned for
pub const REFERENCE_DPI: f32 = 400.0;

/// Maximum number of palette entries (one bit each in the colour mask)
pub const MAX_PALETTE_ENTRIES: usize = 32;

/// An inclusive HSV range naming one sign colour
///
/// Hue uses the 8-bit 0-179 scale; saturation and value use 0-255.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaletteEntry {
    pub name: String,
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl PaletteEntry {
    pub fn new(name: impl Into<String>, lower: [u8; 3], upper: [u8; 3]) -> Self {
        Self { name: name.into(), lower, upper }
    }

    /// Check whether an HSV pixel falls inside this range
    pub fn contains(&self, hsv: [u8; 3]) -> bool {
        (0..3).all(|i| hsv[i] >= self.lower[i] && hsv[i] <= self.upper[i])
    }
}

/// Field-tuned sign colours
pub fn default_palette() -> Vec<PaletteEntry> {
    vec![
        PaletteEntry::new("orange", [8, 80, 80], [25, 255, 220]),
        PaletteEntry::new("brown", [5, 50, 50], [30, 200, 200]),
        PaletteEntry::new("blue", [90, 30, 30], [140, 255, 255]),
        PaletteEntry::new("teal", [150, 30, 30], [179, 255, 255]),
        PaletteEntry::new("green", [35, 30, 30], [85, 255, 255]),
        PaletteEntry::new("purple", [140, 30, 30], [170, 255, 255]),
    ]
}

/// Size and shape limits for colour candidates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionBounds {
    /// Minimum box width in percent of page width (inclusive)
    pub min_width_percent: f64,
    pub max_width_percent: f64,

    /// Minimum box height in percent of page height (inclusive)
    pub min_height_percent: f64,
    pub max_height_percent: f64,

    /// Width over unit height
    pub min_aspect: f64,
    pub max_aspect: f64,

    /// Radius of the square closing kernel (1 = 3x3)
    pub closing_radius: u8,

    /// Most units a block taller than `max_height_percent` may split into
    pub max_stack_units: usize,
}

impl Default for DetectionBounds {
    fn default() -> Self {
        Self {
            min_width_percent: 0.3,
            max_width_percent: 5.0,
            min_height_percent: 0.2,
            max_height_percent: 3.0,
            min_aspect: 0.5,
            max_aspect: 3.0,
            closing_radius: 1,
            max_stack_units: 4,
        }
    }
}

impl DetectionBounds {
    pub fn with_width_percent(mut self, min: f64, max: f64) -> Self {
        self.min_width_percent = min;
        self.max_width_percent = max;
        self
    }

    pub fn with_height_percent(mut self, min: f64, max: f64) -> Self {
        self.min_height_percent = min;
        self.max_height_percent = max;
        self
    }

    pub fn with_aspect(mut self, min: f64, max: f64) -> Self {
        self.min_aspect = min;
        self.max_aspect = max;
        self
    }

    pub fn with_closing_radius(mut self, radius: u8) -> Self {
        self.closing_radius = radius;
        self
    }

    pub fn with_max_stack_units(mut self, units: usize) -> Self {
        self.max_stack_units = units;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// Height of one sign unit in pixels
    pub unit_height: f64,

    /// Boxes taller than `split_ratio * unit_height` are split
    pub split_ratio: f64,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self { unit_height: 40.0, split_ratio: 1.5 }
    }
}

impl StackConfig {
    pub fn with_unit_height(mut self, unit_height: f64) -> Self {
        self.unit_height = unit_height;
        self
    }
}

/// Label search and recognition settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// Characters the recognition backend may emit
    pub whitelist: String,

    /// Height of the search band above a box
    pub pad_above: u32,

    /// Horizontal padding around a box
    pub pad_side: u32,

    /// How far the above-band extends into the box top
    pub overlap_into_box: u32,

    pub upscale_factor: u32,

    /// Regions shorter than this are upscaled before recognition
    pub upscale_below_height: u32,

    /// Also try the inverted binarization
    pub try_inverted: bool,

    /// Recognitions below this confidence are discarded
    pub min_confidence: f32,

    /// Recognitions at or above this confidence are tier `high`
    pub high_confidence: f32,

    /// Search a doubled neighbourhood when the primary order fails
    pub relaxed_search: bool,

    /// Per-call recognition timeout
    pub timeout_ms: Option<u64>,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            whitelist: "0123456789.-".to_string(),
            pad_above: 50,
            pad_side: 20,
            overlap_into_box: 10,
            upscale_factor: 2,
            upscale_below_height: 64,
            try_inverted: true,
            min_confidence: 0.3,
            high_confidence: 0.7,
            relaxed_search: true,
            timeout_ms: Some(5_000),
        }
    }
}

impl LocatorConfig {
    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn with_high_confidence(mut self, high_confidence: f32) -> Self {
        self.high_confidence = high_confidence;
        self
    }

    pub fn with_relaxed_search(mut self, relaxed: bool) -> Self {
        self.relaxed_search = relaxed;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: Option<u64>) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Same-identifier records closer than this (percent of the page
    /// diagonal) are duplicates
    pub proximity_percent: f64,

    /// Neighbourhood for grouping decimal series, in percent of page size
    pub series_distance_percent: f64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self { proximity_percent: 2.0, series_distance_percent: 2.0 }
    }
}

impl ReconcileConfig {
    pub fn with_proximity_percent(mut self, percent: f64) -> Self {
        self.proximity_percent = percent;
        self
    }
}

/// When embedded text is considered insufficient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageConfig {
    pub fallback_ratio: f64,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self { fallback_ratio: 0.5 }
    }
}

impl CoverageConfig {
    /// Decide whether raster strategies must run after embedded extraction.
    ///
    /// With an expected count, fall back when fewer than
    /// `fallback_ratio * expected` identifiers were found; without one, only
    /// when none were found.
    pub fn needs_fallback(&self, found: usize, expected: Option<usize>) -> bool {
        match expected {
            Some(expected) => (found as f64) < self.fallback_ratio * expected as f64,
            None => found == 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddedConfig {
    /// Fraction of the token size added on every side
    pub hotspot_expansion: f64,
}

/// Sign counts outside these bounds flag a page for manual review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewBounds {
    pub min_signs: usize,
    pub max_signs: usize,
}

impl Default for ReviewBounds {
    fn default() -> Self {
        Self { min_signs: 5, max_signs: 50 }
    }
}

impl ReviewBounds {
    pub fn needs_review(&self, count: usize) -> bool {
        count < self.min_signs || count > self.max_signs
    }
}

/// Complete configuration for sign extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub palette: Vec<PaletteEntry>,
    pub detection: DetectionBounds,
    pub stack: StackConfig,
    pub locator: LocatorConfig,
    pub reconcile: ReconcileConfig,
    pub coverage: CoverageConfig,
    pub embedded: EmbeddedConfig,

    /// Whole-page time budget; exceeding it yields partial results
    pub page_budget_ms: Option<u64>,

    pub review: ReviewBounds,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            palette: default_palette(),
            detection: DetectionBounds::default(),
            stack: StackConfig::default(),
            locator: LocatorConfig::default(),
            reconcile: ReconcileConfig::default(),
            coverage: CoverageConfig::default(),
            embedded: EmbeddedConfig::default(),
            page_budget_ms: None,
            review: ReviewBounds::default(),
        }
    }
}

impl ExtractionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_palette(mut self, palette: Vec<PaletteEntry>) -> Self {
        self.palette = palette;
        self
    }

    pub fn with_detection(mut self, detection: DetectionBounds) -> Self {
        self.detection = detection;
        self
    }

    pub fn with_stack(mut self, stack: StackConfig) -> Self {
        self.stack = stack;
        self
    }

    pub fn with_locator(mut self, locator: LocatorConfig) -> Self {
        self.locator = locator;
        self
    }

    pub fn with_reconcile(mut self, reconcile: ReconcileConfig) -> Self {
        self.reconcile = reconcile;
        self
    }

    pub fn with_coverage(mut self, coverage: CoverageConfig) -> Self {
        self.coverage = coverage;
        self
    }

    pub fn with_embedded(mut self, embedded: EmbeddedConfig) -> Self {
        self.embedded = embedded;
        self
    }

    pub fn with_page_budget_ms(mut self, budget: Option<u64>) -> Self {
        self.page_budget_ms = budget;
        self
    }

    pub fn with_review(mut self, review: ReviewBounds) -> Self {
        self.review = review;
        self
    }

    /// Scale pixel-valued settings from [`REFERENCE_DPI`] to `dpi`
    pub fn scaled_to_dpi(mut self, dpi: f32) -> Self {
        let factor = dpi / REFERENCE_DPI;
        let scale = |value: u32| ((value as f32 * factor).round() as u32).max(1);

        self.stack.unit_height *= factor as f64;
        self.locator.pad_above = scale(self.locator.pad_above);
        self.locator.pad_side = scale(self.locator.pad_side);
        self.locator.overlap_into_box = scale(self.locator.overlap_into_box);
        self
    }

    pub fn from_toml_str(text: &str) -> SignResult<Self> {
        let config: ExtractionConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> SignResult<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> SignResult<()> {
        let invalid = |message: String| Err(SignError::InvalidConfig(message));

        if self.palette.is_empty() || self.palette.len() > MAX_PALETTE_ENTRIES {
            return invalid(format!(
                "palette must have 1..={MAX_PALETTE_ENTRIES} entries, got {}",
                self.palette.len()
            ));
        }
        for entry in &self.palette {
            if (0..3).any(|i| entry.lower[i] > entry.upper[i]) {
                return invalid(format!("palette entry {:?} has lower > upper", entry.name));
            }
            if entry.upper[0] > 179 {
                return invalid(format!("palette entry {:?} has hue above 179", entry.name));
            }
        }

        let d = &self.detection;
        if d.min_width_percent < 0.0 || d.min_width_percent > d.max_width_percent {
            return invalid("width bounds must satisfy 0 <= min <= max".to_string());
        }
        if d.min_height_percent < 0.0 || d.min_height_percent > d.max_height_percent {
            return invalid("height bounds must satisfy 0 <= min <= max".to_string());
        }
        if d.min_aspect < 0.0 || d.min_aspect > d.max_aspect {
            return invalid("aspect bounds must satisfy 0 <= min <= max".to_string());
        }
        if d.max_stack_units == 0 {
            return invalid("max stack units must be at least 1".to_string());
        }

        if self.stack.unit_height <= 0.0 {
            return invalid("stack unit height must be positive".to_string());
        }
        if self.stack.split_ratio <= 1.0 {
            return invalid("stack split ratio must be greater than 1".to_string());
        }

        let l = &self.locator;
        if !(0.0..=1.0).contains(&l.min_confidence) || !(0.0..=1.0).contains(&l.high_confidence) {
            return invalid("confidence thresholds must lie in 0..=1".to_string());
        }
        if l.high_confidence < l.min_confidence {
            return invalid("high confidence must not be below min confidence".to_string());
        }
        if l.upscale_factor == 0 {
            return invalid("upscale factor must be at least 1".to_string());
        }

        if self.reconcile.proximity_percent < 0.0 || self.reconcile.series_distance_percent < 0.0 {
            return invalid("reconcile distances must not be negative".to_string());
        }
        if self.coverage.fallback_ratio < 0.0 {
            return invalid("fallback ratio must not be negative".to_string());
        }
        if self.embedded.hotspot_expansion < 0.0 {
            return invalid("hotspot expansion must not be negative".to_string());
        }
        if self.review.min_signs > self.review.max_signs {
            return invalid("review bounds must satisfy min <= max".to_string());
        }

        Ok(())
    }
}
