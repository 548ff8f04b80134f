//! Result reconciliation
//!
//! Merges evidence from every strategy into one deduplicated record set.
//! Embedded text outranks anything read from pixels; within an identifier,
//! the strongest evidence claims its location and weaker evidence nearby is
//! dropped as a duplicate. Nothing is discarded silently: every dropped piece
//! of evidence is returned with its reason.

use crate::config::ReconcileConfig;
use crate::geometry::{BoundingBox, PageDimensions};
use crate::identifier::Identifier;
use crate::model::{ConfidenceTier, Evidence, PageRef, SeriesTag, SignRecord};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    SupersededByEmbedded,
    DuplicateWithinProximity,
}

/// Evidence that did not become a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroppedEvidence {
    pub evidence: Evidence,
    pub reason: DropReason,

    /// Location of the record that won
    pub kept_bbox: Option<BoundingBox>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub records: Vec<SignRecord>,
    pub dropped: Vec<DroppedEvidence>,
}

/// Strongest first: tier, then backend confidence, then reading order
fn rank(a: &Evidence, b: &Evidence) -> Ordering {
    b.tier
        .cmp(&a.tier)
        .then_with(|| {
            let a_conf = a.backend_confidence.unwrap_or(0.0);
            let b_conf = b.backend_confidence.unwrap_or(0.0);
            b_conf.total_cmp(&a_conf)
        })
        .then_with(|| a.bbox.y.total_cmp(&b.bbox.y))
        .then_with(|| a.bbox.x.total_cmp(&b.bbox.x))
}

fn nearest<'a>(
    bbox: &BoundingBox,
    among: impl Iterator<Item = &'a BoundingBox>,
) -> Option<BoundingBox> {
    among
        .min_by(|a, b| bbox.center_distance(a).total_cmp(&bbox.center_distance(b)))
        .copied()
}

pub fn reconcile(
    evidence: Vec<Evidence>,
    dims: PageDimensions,
    page: &PageRef,
    config: &ReconcileConfig,
) -> Reconciliation {
    let threshold = config.proximity_percent / 100.0 * dims.diagonal();

    let mut groups: BTreeMap<Identifier, Vec<Evidence>> = BTreeMap::new();
    for item in evidence {
        groups.entry(item.identifier.clone()).or_default().push(item);
    }

    let mut accepted: Vec<Evidence> = Vec::new();
    let mut dropped = Vec::new();

    for (_, mut group) in groups {
        if group.iter().any(|e| e.tier == ConfidenceTier::Embedded) {
            let (embedded, others): (Vec<_>, Vec<_>) =
                group.into_iter().partition(|e| e.tier == ConfidenceTier::Embedded);
            for other in others {
                let kept_bbox = nearest(&other.bbox, embedded.iter().map(|e| &e.bbox));
                dropped.push(DroppedEvidence {
                    evidence: other,
                    reason: DropReason::SupersededByEmbedded,
                    kept_bbox,
                });
            }
            group = embedded;
        }

        group.sort_by(rank);
        let mut kept: Vec<Evidence> = Vec::new();
        for candidate in group {
            let winner = kept
                .iter()
                .find(|k| k.bbox.center_distance(&candidate.bbox) <= threshold)
                .map(|k| k.bbox);
            match winner {
                Some(kept_bbox) => dropped.push(DroppedEvidence {
                    evidence: candidate,
                    reason: DropReason::DuplicateWithinProximity,
                    kept_bbox: Some(kept_bbox),
                }),
                None => kept.push(candidate),
            }
        }
        accepted.extend(kept);
    }

    let mut records: Vec<SignRecord> = accepted
        .into_iter()
        .map(|e| SignRecord {
            percent_bbox: e.bbox.to_percent(dims),
            pixel_bbox: e.bbox,
            identifier: e.identifier,
            confidence: e.tier,
            page: page.clone(),
            source: e.source,
            backend_confidence: e.backend_confidence,
            series: None,
        })
        .collect();

    records.sort_by(|a, b| {
        a.pixel_bbox
            .y
            .total_cmp(&b.pixel_bbox.y)
            .then(a.pixel_bbox.x.total_cmp(&b.pixel_bbox.x))
            .then_with(|| a.identifier.cmp(&b.identifier))
    });

    annotate_series(&mut records, config.series_distance_percent);

    Reconciliation { records, dropped }
}

/// Tag decimal-suffixed records sharing a base that sit next to each other
pub fn annotate_series(records: &mut [SignRecord], distance_percent: f64) {
    let d = distance_percent;
    let close = |a: &SignRecord, b: &SignRecord| {
        let dx = (a.percent_bbox.x_percentage - b.percent_bbox.x_percentage).abs();
        let dy = (a.percent_bbox.y_percentage - b.percent_bbox.y_percentage).abs();
        (dx < d && dy < 3.0 * d) || (dy < d && dx < 3.0 * d)
    };

    let mut used = vec![false; records.len()];
    for i in 0..records.len() {
        if used[i] || records[i].identifier.suffix().is_none() {
            continue;
        }
        used[i] = true;
        let base = records[i].identifier.base().to_string();

        let mut members = vec![i];
        for j in 0..records.len() {
            if used[j] || records[j].identifier.suffix().is_none() {
                continue;
            }
            if records[j].identifier.base() == base && close(&records[i], &records[j]) {
                used[j] = true;
                members.push(j);
            }
        }

        if members.len() >= 2 {
            let size = members.len();
            for member in members {
                records[member].series = Some(SeriesTag { base: base.clone(), size });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::match_identifier;
    use crate::model::Strategy;

    fn evidence(id: &str, tier: ConfidenceTier, x: f64, y: f64, conf: Option<f32>) -> Evidence {
        Evidence {
            source: if tier == ConfidenceTier::Embedded {
                Strategy::EmbeddedText
            } else {
                Strategy::LabelLocator
            },
            identifier: match_identifier(id).expect("valid identifier"),
            bbox: BoundingBox::new(x, y, 40.0, 20.0),
            tier,
            backend_confidence: conf,
            stack: None,
        }
    }

    fn run(evidence: Vec<Evidence>) -> Reconciliation {
        reconcile(
            evidence,
            PageDimensions::new(3000, 4000),
            &PageRef::new("plan", 0),
            &ReconcileConfig::default(),
        )
    }

    #[test]
    fn test_close_duplicates_collapse_to_strongest() {
        // Diagonal 5000 px, threshold 100 px.
        let result = run(vec![
            evidence("2001", ConfidenceTier::Medium, 1000.0, 1000.0, Some(0.6)),
            evidence("2001", ConfidenceTier::High, 1050.0, 1020.0, Some(0.9)),
        ]);

        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].confidence, ConfidenceTier::High);
        assert_eq!(result.records[0].pixel_bbox.x, 1050.0);
        assert_eq!(result.dropped.len(), 1);
        assert_eq!(result.dropped[0].reason, DropReason::DuplicateWithinProximity);
        assert_eq!(result.dropped[0].kept_bbox.map(|b| b.x), Some(1050.0));
    }

    #[test]
    fn test_distant_same_identifier_is_kept_twice() {
        let result = run(vec![
            evidence("2001", ConfidenceTier::High, 100.0, 100.0, Some(0.9)),
            evidence("2001", ConfidenceTier::High, 2000.0, 3000.0, Some(0.9)),
        ]);

        assert_eq!(result.records.len(), 2);
        assert!(result.dropped.is_empty());
    }

    #[test]
    fn test_embedded_supersedes_ocr_of_same_identifier() {
        let result = run(vec![
            evidence("2001", ConfidenceTier::High, 2500.0, 3500.0, Some(0.99)),
            evidence("2001", ConfidenceTier::Embedded, 100.0, 100.0, None),
            evidence("2002", ConfidenceTier::Medium, 500.0, 500.0, Some(0.5)),
        ]);

        let ids: Vec<(&str, ConfidenceTier)> =
            result.records.iter().map(|r| (r.identifier.as_str(), r.confidence)).collect();
        assert_eq!(ids, vec![("2001", ConfidenceTier::Embedded), ("2002", ConfidenceTier::Medium)]);
        assert_eq!(result.dropped.len(), 1);
        assert_eq!(result.dropped[0].reason, DropReason::SupersededByEmbedded);
        assert_eq!(result.dropped[0].kept_bbox.map(|b| b.x), Some(100.0));
    }

    #[test]
    fn test_output_is_ordered_by_position_then_identifier() {
        let result = run(vec![
            evidence("3000", ConfidenceTier::High, 500.0, 900.0, Some(0.9)),
            evidence("2002", ConfidenceTier::High, 900.0, 100.0, Some(0.9)),
            evidence("2001", ConfidenceTier::High, 100.0, 100.0, Some(0.9)),
        ]);
        let ids: Vec<&str> = result.records.iter().map(|r| r.identifier.as_str()).collect();

        assert_eq!(ids, vec!["2001", "2002", "3000"]);
    }

    #[test]
    fn test_input_order_does_not_change_output() {
        let items = vec![
            evidence("2001", ConfidenceTier::Medium, 1000.0, 1000.0, Some(0.6)),
            evidence("2001", ConfidenceTier::High, 1040.0, 1000.0, Some(0.8)),
            evidence("2005", ConfidenceTier::Low, 10.0, 10.0, Some(0.4)),
        ];
        let mut reversed = items.clone();
        reversed.reverse();

        assert_eq!(run(items).records, run(reversed).records);
    }

    #[test]
    fn test_percent_boxes_are_filled() {
        let result = run(vec![evidence("2001", ConfidenceTier::High, 300.0, 400.0, Some(0.9))]);
        let percent = result.records[0].percent_bbox;

        assert!((percent.x_percentage - 10.0).abs() < 1e-9);
        assert!((percent.y_percentage - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_series_annotation() {
        let result = run(vec![
            evidence("2001.1", ConfidenceTier::Embedded, 1000.0, 1000.0, None),
            evidence("2001.2", ConfidenceTier::Embedded, 1000.0, 1150.0, None),
            evidence("2001.3", ConfidenceTier::Embedded, 2900.0, 3900.0, None),
            evidence("2002", ConfidenceTier::Embedded, 1060.0, 1000.0, None),
        ]);

        let series: Vec<(&str, Option<usize>)> = result
            .records
            .iter()
            .map(|r| (r.identifier.as_str(), r.series.as_ref().map(|s| s.size)))
            .collect();
        assert_eq!(
            series,
            vec![("2001.1", Some(2)), ("2002", None), ("2001.2", Some(2)), ("2001.3", None)]
        );
        assert_eq!(result.records[0].series.as_ref().map(|s| s.base.as_str()), Some("2001"));
    }
}
