//! Debug overlays for manual review

use crate::geometry::BoundingBox;
use crate::model::{ConfidenceTier, PageImage};
use crate::pipeline::PageResult;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

const CANDIDATE_COLOR: Rgb<u8> = Rgb([128, 128, 128]);

pub fn tier_color(tier: ConfidenceTier) -> Rgb<u8> {
    match tier {
        ConfidenceTier::Embedded => Rgb([0, 160, 0]),
        ConfidenceTier::High => Rgb([0, 90, 255]),
        ConfidenceTier::Medium => Rgb([255, 140, 0]),
        ConfidenceTier::Low => Rgb([220, 0, 0]),
    }
}

fn draw_box(canvas: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>, thickness: i32) {
    for inset in 0..thickness {
        let width = bbox.width.round() as i32 - 2 * inset;
        let height = bbox.height.round() as i32 - 2 * inset;
        if width <= 0 || height <= 0 {
            break;
        }
        let rect = Rect::at(bbox.x.round() as i32 + inset, bbox.y.round() as i32 + inset)
            .of_size(width as u32, height as u32);
        draw_hollow_rect_mut(canvas, rect, color);
    }
}

/// Draw every candidate (grey) and every record (coloured by tier) onto a copy
/// of the page raster
pub fn annotate(page: &PageImage, result: &PageResult) -> RgbImage {
    let mut canvas = page.image.clone();
    let dims = result.summary.dimensions;
    let sx = canvas.width() as f64 / dims.width.max(1) as f64;
    let sy = canvas.height() as f64 / dims.height.max(1) as f64;

    for candidate in &result.summary.candidates {
        draw_box(&mut canvas, &candidate.bbox.scale(sx, sy), CANDIDATE_COLOR, 1);
    }
    for record in &result.records {
        draw_box(&mut canvas, &record.pixel_bbox.scale(sx, sy), tier_color(record.confidence), 2);
    }

    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PageDimensions;
    use crate::identifier::match_identifier;
    use crate::model::{CandidateBox, PageRef, SignRecord, Strategy};
    use crate::pipeline::PageSummary;
    use std::collections::{BTreeMap, BTreeSet};

    #[test]
    fn test_draws_records_and_candidates() {
        let dims = PageDimensions::new(200, 200);
        let page = PageImage::new(
            PageRef::new("scan", 0),
            RgbImage::from_pixel(200, 200, Rgb([255, 255, 255])),
        );
        let record_box = BoundingBox::new(20.0, 20.0, 40.0, 20.0);
        let candidate_box = BoundingBox::new(100.0, 100.0, 30.0, 30.0);

        let result = PageResult {
            page: page.page.clone(),
            records: vec![SignRecord {
                identifier: match_identifier("2001").expect("valid identifier"),
                pixel_bbox: record_box,
                percent_bbox: record_box.to_percent(dims),
                confidence: ConfidenceTier::High,
                page: page.page.clone(),
                source: Strategy::LabelLocator,
                backend_confidence: Some(0.9),
                series: None,
            }],
            summary: PageSummary {
                dimensions: dims,
                tier_counts: BTreeMap::new(),
                strategies: Vec::new(),
                candidate_count: 1,
                partial: false,
                dropped: Vec::new(),
                candidates: vec![CandidateBox::new(candidate_box, BTreeSet::new())],
            },
        };

        let canvas = annotate(&page, &result);

        assert_eq!(canvas.get_pixel(20, 20), &tier_color(ConfidenceTier::High));
        assert_eq!(canvas.get_pixel(21, 21), &tier_color(ConfidenceTier::High));
        assert_eq!(canvas.get_pixel(100, 100), &CANDIDATE_COLOR);
        assert_eq!(canvas.get_pixel(40, 30), &Rgb([255, 255, 255]));
        assert_eq!(page.image.get_pixel(20, 20), &Rgb([255, 255, 255]));
    }
}
