//! Embedded-text extraction
//!
//! Reads identifiers straight from a page's text layer. Every span is
//! examined, and matches are converted from PDF points to the page's pixel
//! space so they line up with raster detections.

use crate::config::EmbeddedConfig;
use crate::geometry::{BoundingBox, PageDimensions};
use crate::identifier::match_identifier;
use crate::model::{ConfidenceTier, Evidence, Strategy, TextToken, TokenOrigin};
use signscan_pdf::PageText;

#[derive(Debug, Clone, Default)]
pub struct EmbeddedTextExtractor {
    config: EmbeddedConfig,
}

impl EmbeddedTextExtractor {
    pub fn new(config: EmbeddedConfig) -> Self {
        Self { config }
    }

    /// Identifier tokens of the page, in pixels of `dims`
    pub fn extract(&self, page_text: &PageText, dims: PageDimensions) -> Vec<TextToken> {
        let width_pt = page_text.size.width_pt as f64;
        let height_pt = page_text.size.height_pt as f64;
        if width_pt <= 0.0 || height_pt <= 0.0 {
            return Vec::new();
        }
        let sx = dims.width as f64 / width_pt;
        let sy = dims.height as f64 / height_pt;
        let expansion = self.config.hotspot_expansion;

        let mut tokens = Vec::new();
        for span in &page_text.spans {
            let Some(identifier) = match_identifier(&span.text) else {
                continue;
            };

            let bbox = BoundingBox::new(
                span.x as f64,
                span.y as f64,
                span.width as f64,
                span.height as f64,
            )
            .scale(sx, sy);
            let bbox = bbox.expand(bbox.width * expansion, bbox.height * expansion);

            match bbox.clamp_to(dims) {
                Some(bbox) => tokens.push(TextToken {
                    text: identifier.to_string(),
                    bbox,
                    origin: TokenOrigin::Embedded,
                }),
                None => {
                    tracing::debug!(identifier = %identifier, "embedded token lies off the page")
                }
            }
        }

        tokens
    }
}

/// Tag embedded tokens as top-tier evidence
pub fn embedded_evidence(tokens: &[TextToken]) -> Vec<Evidence> {
    tokens
        .iter()
        .filter_map(|token| {
            let identifier = match_identifier(&token.text)?;
            Some(Evidence {
                source: Strategy::EmbeddedText,
                identifier,
                bbox: token.bbox,
                tier: ConfidenceTier::Embedded,
                backend_confidence: None,
                stack: None,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use signscan_pdf::{PageSize, TextSpan};

    fn span(text: &str, x: f32, y: f32) -> TextSpan {
        TextSpan { text: text.to_string(), x, y, width: 20.0, height: 10.0 }
    }

    fn page(spans: Vec<TextSpan>) -> PageText {
        PageText { size: PageSize { width_pt: 1000.0, height_pt: 500.0 }, spans }
    }

    #[test]
    fn test_keeps_only_identifiers() {
        let text = page(vec![
            span("2001", 10.0, 10.0),
            span("2001.1", 100.0, 10.0),
            span("0000", 200.0, 10.0),
            span("ABCD", 300.0, 10.0),
        ]);

        let tokens =
            EmbeddedTextExtractor::default().extract(&text, PageDimensions::new(1000, 500));
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["2001", "2001.1"]);
        assert!(tokens.iter().all(|t| t.origin == TokenOrigin::Embedded));

        let evidence = embedded_evidence(&tokens);
        assert_eq!(evidence.len(), 2);
        assert!(evidence.iter().all(|e| e.tier == ConfidenceTier::Embedded));
    }

    #[test]
    fn test_converts_points_to_pixels() {
        let text = page(vec![span("3100", 100.0, 50.0)]);
        let tokens =
            EmbeddedTextExtractor::default().extract(&text, PageDimensions::new(4000, 2000));

        assert_eq!(tokens[0].bbox, BoundingBox::new(400.0, 200.0, 80.0, 40.0));
    }

    #[test]
    fn test_hotspot_expansion_is_clamped() {
        let extractor = EmbeddedTextExtractor::new(EmbeddedConfig { hotspot_expansion: 0.5 });
        let text = page(vec![span("3100", 0.0, 100.0)]);
        let tokens = extractor.extract(&text, PageDimensions::new(1000, 500));

        assert_eq!(tokens[0].bbox, BoundingBox::new(0.0, 95.0, 30.0, 20.0));
    }

    #[test]
    fn test_empty_text_layer_yields_nothing() {
        let dims = PageDimensions::new(10, 10);
        let tokens = EmbeddedTextExtractor::default().extract(&page(Vec::new()), dims);
        assert!(tokens.is_empty());
    }
}
