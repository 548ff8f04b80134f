//! Colour region detection
//!
//! Finds coloured sign boxes on a rasterized page. Every pixel is classified
//! against the whole palette in a single pass, producing a per-pixel bitmask
//! (one bit per palette entry). The union mask is closed, labelled into
//! connected components, and the resulting rectangles are merged and
//! filtered by size and shape.

use crate::config::{
    default_palette, DetectionBounds, PaletteEntry, StackConfig, MAX_PALETTE_ENTRIES,
};
use crate::geometry::{BoundingBox, PageDimensions};
use crate::model::{CandidateBox, PageImage};
use crate::stack::StackSplitter;
use image::{GrayImage, Luma, Rgb};
use imageproc::distance_transform::Norm;
use imageproc::morphology;
use imageproc::region_labelling::{connected_components, Connectivity};
use std::collections::BTreeSet;

/// Convert an RGB pixel to 8-bit HSV (hue 0-179)
pub fn rgb_to_hsv(Rgb([r, g, b]): Rgb<u8>) -> [u8; 3] {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let diff = max - min;

    let saturation = if max > 0.0 { 255.0 * diff / max } else { 0.0 };
    let mut hue = if diff == 0.0 {
        0.0
    } else if max == r {
        60.0 * (g - b) / diff
    } else if max == g {
        120.0 + 60.0 * (b - r) / diff
    } else {
        240.0 + 60.0 * (r - g) / diff
    };
    if hue < 0.0 {
        hue += 360.0;
    }

    [
        ((hue / 2.0).round() as u32 % 180) as u8,
        saturation.round().min(255.0) as u8,
        max as u8,
    ]
}

#[derive(Debug, Clone, Copy, Default)]
struct ComponentBounds {
    left: u32,
    top: u32,
    right: u32,
    bottom: u32,
    palette_bits: u32,
    seen: bool,
}

impl ComponentBounds {
    fn include(&mut self, x: u32, y: u32, bits: u32) {
        if !self.seen {
            *self = ComponentBounds {
                left: x,
                top: y,
                right: x,
                bottom: y,
                palette_bits: 0,
                seen: true,
            };
        }
        self.left = self.left.min(x);
        self.top = self.top.min(y);
        self.right = self.right.max(x);
        self.bottom = self.bottom.max(y);
        self.palette_bits |= bits;
    }
}

#[derive(Debug, Clone)]
pub struct ColorRegionDetector {
    palette: Vec<PaletteEntry>,
    bounds: DetectionBounds,
    stack: StackSplitter,
}

impl Default for ColorRegionDetector {
    fn default() -> Self {
        Self::new(default_palette(), DetectionBounds::default())
    }
}

impl ColorRegionDetector {
    /// Entries beyond the 32-bit mask width are ignored.
    pub fn new(mut palette: Vec<PaletteEntry>, bounds: DetectionBounds) -> Self {
        if palette.len() > MAX_PALETTE_ENTRIES {
            tracing::warn!(
                entries = palette.len(),
                "palette truncated to {MAX_PALETTE_ENTRIES} entries"
            );
            palette.truncate(MAX_PALETTE_ENTRIES);
        }
        Self { palette, bounds, stack: StackSplitter::default() }
    }

    /// Use `config` to derive unit heights for the aspect-ratio check
    pub fn with_stack(mut self, config: &StackConfig) -> Self {
        self.stack = StackSplitter::from_config(config);
        self
    }

    /// Per-pixel palette bitmask and the union mask
    fn classify(&self, page: &PageImage) -> (Vec<u32>, GrayImage) {
        let (width, height) = page.image.dimensions();
        let mut bits = vec![0u32; width as usize * height as usize];
        let mut mask = GrayImage::new(width, height);

        for (x, y, pixel) in page.image.enumerate_pixels() {
            let hsv = rgb_to_hsv(*pixel);
            let mut pixel_bits = 0u32;
            for (i, entry) in self.palette.iter().enumerate() {
                if entry.contains(hsv) {
                    pixel_bits |= 1 << i;
                }
            }
            if pixel_bits != 0 {
                bits[(y * width + x) as usize] = pixel_bits;
                mask.put_pixel(x, y, Luma([255]));
            }
        }

        (bits, mask)
    }

    fn palette_names(&self, bits: u32) -> BTreeSet<String> {
        self.palette
            .iter()
            .enumerate()
            .filter(|(i, _)| bits & (1 << i) != 0)
            .map(|(_, entry)| entry.name.clone())
            .collect()
    }

    /// Candidate boxes on the page, sorted top-to-bottom then left-to-right
    pub fn detect(&self, page: &PageImage) -> Vec<CandidateBox> {
        let dims = page.dimensions();
        if dims.width == 0 || dims.height == 0 || self.palette.is_empty() {
            return Vec::new();
        }

        let (bits, mask) = self.classify(page);
        let closed = if self.bounds.closing_radius > 0 {
            morphology::close(&mask, Norm::LInf, self.bounds.closing_radius)
        } else {
            mask
        };

        let labels = connected_components(&closed, Connectivity::Eight, Luma([0u8]));
        let mut components: Vec<ComponentBounds> = Vec::new();
        for (x, y, label) in labels.enumerate_pixels() {
            let label = label[0] as usize;
            if label == 0 {
                continue;
            }
            if components.len() <= label {
                components.resize(label + 1, ComponentBounds::default());
            }
            components[label].include(x, y, bits[(y * dims.width + x) as usize]);
        }

        let rects: Vec<(BoundingBox, u32)> = components
            .iter()
            .filter(|c| c.seen)
            .map(|c| {
                (
                    BoundingBox::from_edges(
                        c.left as f64,
                        c.top as f64,
                        (c.right + 1) as f64,
                        (c.bottom + 1) as f64,
                    ),
                    c.palette_bits,
                )
            })
            .collect();
        let component_count = rects.len();

        let mut candidates: Vec<CandidateBox> = merge_overlapping(rects)
            .into_iter()
            .filter(|(bbox, _)| self.accepts(bbox, dims))
            .map(|(bbox, bits)| CandidateBox::new(bbox, self.palette_names(bits)))
            .collect();

        candidates.sort_by(|a, b| {
            a.bbox
                .y
                .total_cmp(&b.bbox.y)
                .then(a.bbox.x.total_cmp(&b.bbox.x))
        });

        tracing::debug!(
            page = page.page.page_index,
            components = component_count,
            candidates = candidates.len(),
            "colour detection finished"
        );

        candidates
    }

    /// Size and aspect filter; bounds are inclusive
    fn accepts(&self, bbox: &BoundingBox, dims: PageDimensions) -> bool {
        let b = &self.bounds;
        let page_w = dims.width as f64;
        let page_h = dims.height as f64;

        let width_ok = bbox.width * 100.0 >= b.min_width_percent * page_w
            && bbox.width * 100.0 <= b.max_width_percent * page_w;

        let fits_height = |height: f64| {
            height * 100.0 >= b.min_height_percent * page_h
                && height * 100.0 <= b.max_height_percent * page_h
        };
        let count = self.stack.stack_count(bbox.height);
        let unit_height = bbox.height / count as f64;
        // Over-tall blocks pass only as a short stack of in-bounds units.
        let height_ok = fits_height(unit_height)
            && (fits_height(bbox.height) || (count > 1 && count <= b.max_stack_units));

        let aspect = if unit_height > 0.0 { bbox.width / unit_height } else { 0.0 };
        let aspect_ok = aspect >= b.min_aspect && aspect <= b.max_aspect;

        width_ok && height_ok && aspect_ok
    }
}

/// Union intersecting rectangles (and their palette bits) until none intersect
fn merge_overlapping(mut rects: Vec<(BoundingBox, u32)>) -> Vec<(BoundingBox, u32)> {
    let mut merged = true;
    while merged {
        merged = false;
        'outer: for i in 0..rects.len() {
            for j in (i + 1)..rects.len() {
                if rects[i].0.intersects(&rects[j].0) {
                    let (other, other_bits) = rects.swap_remove(j);
                    rects[i].0 = rects[i].0.union(&other);
                    rects[i].1 |= other_bits;
                    merged = true;
                    break 'outer;
                }
            }
        }
    }
    rects
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PageRef;
    use image::RgbImage;

    const ORANGE: Rgb<u8> = Rgb([200, 110, 20]);
    const BLUE: Rgb<u8> = Rgb([30, 60, 200]);

    fn blank(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([255, 255, 255]))
    }

    fn fill(image: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: Rgb<u8>) {
        for py in y..y + h {
            for px in x..x + w {
                image.put_pixel(px, py, color);
            }
        }
    }

    fn page(image: RgbImage) -> PageImage {
        PageImage::new(PageRef::new("test", 0), image)
    }

    fn names(candidate: &CandidateBox) -> Vec<&str> {
        candidate.palette.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_hsv_conversion_matches_8bit_convention() {
        assert_eq!(rgb_to_hsv(ORANGE), [15, 230, 200]);
        assert_eq!(rgb_to_hsv(BLUE), [115, 217, 200]);
        assert_eq!(rgb_to_hsv(Rgb([255, 255, 255])), [0, 0, 255]);
        assert_eq!(rgb_to_hsv(Rgb([0, 0, 0])), [0, 0, 0]);
    }

    #[test]
    fn test_detects_two_palette_colours_in_one_pass() {
        let mut image = blank(1000, 1000);
        fill(&mut image, 100, 100, 40, 20, ORANGE);
        fill(&mut image, 500, 600, 40, 20, BLUE);

        let palette = vec![
            PaletteEntry::new("orange", [8, 80, 80], [25, 255, 220]),
            PaletteEntry::new("blue", [90, 30, 30], [140, 255, 255]),
        ];
        let detector = ColorRegionDetector::new(palette, DetectionBounds::default());
        let candidates = detector.detect(&page(image));

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].bbox, BoundingBox::new(100.0, 100.0, 40.0, 20.0));
        assert_eq!(names(&candidates[0]), vec!["orange"]);
        assert_eq!(candidates[1].bbox, BoundingBox::new(500.0, 600.0, 40.0, 20.0));
        assert_eq!(names(&candidates[1]), vec!["blue"]);
    }

    #[test]
    fn test_min_width_boundary_is_inclusive() {
        let bounds = DetectionBounds::default().with_width_percent(1.0, 5.0);

        let mut at_threshold = blank(1000, 1000);
        fill(&mut at_threshold, 200, 200, 10, 10, ORANGE);
        let found = ColorRegionDetector::new(default_palette(), bounds.clone())
            .detect(&page(at_threshold));
        assert_eq!(found.len(), 1);

        let mut below = blank(1000, 1000);
        fill(&mut below, 200, 200, 9, 10, ORANGE);
        let found = ColorRegionDetector::new(default_palette(), bounds).detect(&page(below));
        assert!(found.is_empty());
    }

    #[test]
    fn test_overlapping_rectangles_merge() {
        let rects = vec![
            (BoundingBox::new(0.0, 0.0, 10.0, 10.0), 0b01),
            (BoundingBox::new(5.0, 5.0, 10.0, 10.0), 0b10),
            (BoundingBox::new(100.0, 100.0, 10.0, 10.0), 0b01),
        ];
        let merged = merge_overlapping(rects);

        assert_eq!(merged.len(), 2);
        assert!(merged.contains(&(BoundingBox::new(0.0, 0.0, 15.0, 15.0), 0b11)));
    }

    #[test]
    fn test_merge_is_transitive() {
        let rects = vec![
            (BoundingBox::new(0.0, 0.0, 10.0, 10.0), 1),
            (BoundingBox::new(30.0, 0.0, 10.0, 10.0), 1),
            (BoundingBox::new(8.0, 0.0, 25.0, 10.0), 1),
        ];
        let merged = merge_overlapping(rects);

        assert_eq!(merged, vec![(BoundingBox::new(0.0, 0.0, 40.0, 10.0), 1)]);
    }

    #[test]
    fn test_tall_stack_passes_aspect_filter() {
        let mut image = blank(2000, 2000);
        fill(&mut image, 300, 300, 60, 120, ORANGE);

        let detector = ColorRegionDetector::default();
        let candidates = detector.detect(&page(image));

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].bbox.height, 120.0);
    }

    #[test]
    fn test_tall_bar_is_rejected() {
        let mut image = blank(2000, 2000);
        fill(&mut image, 300, 300, 60, 1200, ORANGE);

        assert!(ColorRegionDetector::default().detect(&page(image)).is_empty());
    }

    #[test]
    fn test_stack_unit_limit() {
        let mut image = blank(2000, 2000);
        fill(&mut image, 300, 300, 60, 200, ORANGE);

        let bounds = DetectionBounds::default();
        assert_eq!(bounds.max_stack_units, 4);
        assert!(ColorRegionDetector::new(default_palette(), bounds.clone())
            .detect(&page(image.clone()))
            .is_empty());

        let detector = ColorRegionDetector::new(default_palette(), bounds.with_max_stack_units(5));
        assert_eq!(detector.detect(&page(image)).len(), 1);
    }

    #[test]
    fn test_ignores_unsaturated_linework() {
        let mut image = blank(1000, 1000);
        fill(&mut image, 100, 100, 400, 2, Rgb([40, 40, 40]));
        fill(&mut image, 100, 300, 40, 20, Rgb([128, 128, 128]));

        assert!(ColorRegionDetector::default().detect(&page(image)).is_empty());
    }

    #[test]
    fn test_thin_slivers_are_rejected() {
        let mut image = blank(1000, 1000);
        fill(&mut image, 100, 100, 45, 5, ORANGE);

        assert!(ColorRegionDetector::default().detect(&page(image)).is_empty());
    }
}
