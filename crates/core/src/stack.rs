//! Stack splitting
//!
//! Signs of several units are often drawn as one tall coloured block. A block
//! noticeably taller than one unit is cut into `N` equal siblings of
//! `height / N` (rounded) that exactly tile the block. All units are assumed
//! to share one height.

use crate::config::StackConfig;
use crate::geometry::BoundingBox;
use crate::model::{CandidateBox, StackPosition};

#[derive(Debug, Clone)]
pub struct StackSplitter {
    unit_height: f64,
    split_ratio: f64,
}

impl Default for StackSplitter {
    fn default() -> Self {
        Self::from_config(&StackConfig::default())
    }
}

impl StackSplitter {
    pub fn new(unit_height: f64) -> Self {
        Self { unit_height, split_ratio: StackConfig::default().split_ratio }
    }

    pub fn from_config(config: &StackConfig) -> Self {
        Self { unit_height: config.unit_height, split_ratio: config.split_ratio }
    }

    pub fn unit_height(&self) -> f64 {
        self.unit_height
    }

    /// Number of units in a block of `height` pixels
    pub fn stack_count(&self, height: f64) -> usize {
        if self.unit_height <= 0.0 || height <= self.split_ratio * self.unit_height {
            return 1;
        }
        ((height / self.unit_height).round() as usize).max(2)
    }

    /// Cut `candidate` into equal siblings, or return it unchanged.
    ///
    /// Sibling edges are rounded to whole pixels; the last sibling ends at the
    /// block's bottom edge so no sibling leaves the block.
    pub fn split(&self, candidate: &CandidateBox) -> Vec<CandidateBox> {
        let count = self.stack_count(candidate.bbox.height);
        if count == 1 {
            return vec![candidate.clone()];
        }

        tracing::debug!(
            x = candidate.bbox.x,
            y = candidate.bbox.y,
            height = candidate.bbox.height,
            count,
            "splitting stacked candidate"
        );

        let bbox = candidate.bbox;
        let edge = |index: usize| {
            if index == count {
                bbox.bottom()
            } else {
                bbox.y + (index as f64 * bbox.height / count as f64).round()
            }
        };

        (0..count)
            .map(|index| CandidateBox {
                bbox: BoundingBox::from_edges(bbox.x, edge(index), bbox.right(), edge(index + 1)),
                origin: candidate.origin,
                palette: candidate.palette.clone(),
                stack: Some(StackPosition { index, count }),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn candidate(x: f64, y: f64, width: f64, height: f64) -> CandidateBox {
        CandidateBox::new(BoundingBox::new(x, y, width, height), BTreeSet::new())
    }

    #[test]
    fn test_two_unit_stack() {
        let siblings = StackSplitter::new(40.0).split(&candidate(100.0, 100.0, 50.0, 88.0));

        assert_eq!(siblings.len(), 2);
        assert_eq!(siblings[0].bbox, BoundingBox::new(100.0, 100.0, 50.0, 44.0));
        assert_eq!(siblings[1].bbox, BoundingBox::new(100.0, 144.0, 50.0, 44.0));
        assert_eq!(siblings[1].stack, Some(StackPosition { index: 1, count: 2 }));
    }

    #[test]
    fn test_three_unit_stack_does_not_overlap() {
        let siblings = StackSplitter::new(40.0).split(&candidate(10.0, 10.0, 60.0, 120.0));

        assert_eq!(siblings.len(), 3);
        for pair in siblings.windows(2) {
            assert!(!pair[0].bbox.intersects(&pair[1].bbox));
            assert_eq!(pair[0].bbox.bottom(), pair[1].bbox.y);
        }
        assert!(siblings.iter().all(|s| s.bbox.x == 10.0 && s.bbox.width == 60.0));
    }

    #[test]
    fn test_uneven_stack_stays_inside_block() {
        let block = candidate(300.0, 1900.0, 60.0, 100.0);
        let siblings = StackSplitter::new(40.0).split(&block);

        let edges: Vec<(f64, f64)> =
            siblings.iter().map(|s| (s.bbox.y, s.bbox.bottom())).collect();
        assert_eq!(edges, vec![(1900.0, 1933.0), (1933.0, 1967.0), (1967.0, 2000.0)]);
        assert!(siblings.iter().all(|s| s.bbox.bottom() <= block.bbox.bottom()));
        let heights: Vec<f64> = siblings.iter().map(|s| s.bbox.height).collect();
        assert_eq!(heights, vec![33.0, 34.0, 33.0]);
    }

    #[test]
    fn test_single_unit_unchanged() {
        let original = candidate(0.0, 0.0, 50.0, 60.0);
        let result = StackSplitter::new(40.0).split(&original);

        assert_eq!(result, vec![original]);
        assert_eq!(result[0].stack, None);
    }

    #[test]
    fn test_just_over_threshold_splits_in_two() {
        let splitter = StackSplitter::new(40.0);
        assert_eq!(splitter.stack_count(60.0), 1);
        assert_eq!(splitter.stack_count(61.0), 2);
        assert_eq!(splitter.stack_count(161.0), 4);
    }
}
