//! Page sources
//!
//! A [`PageSource`] hands the pipeline everything it needs about one page:
//! its pixel size, its text layer and, on demand, its raster.

use crate::error::{SignError, SignResult};
use crate::geometry::PageDimensions;
use crate::model::{PageImage, PageRef};
use image::{DynamicImage, RgbImage};
use signscan_pdf::{OpenSource, PageText, PdfEngine, RenderRequest};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default rendering resolution for PDF pages
pub const DEFAULT_DPI: f32 = 200.0;

pub trait PageSource: Sync {
    fn document_id(&self) -> &str;

    fn page_count(&self) -> u32;

    /// Pixel size records for this page are expressed in
    fn page_dimensions(&self, page_index: u32) -> SignResult<PageDimensions>;

    /// Embedded text layer, `None` when the source has none
    fn page_text(&self, page_index: u32) -> SignResult<Option<PageText>>;

    fn rasterize(&self, page_index: u32) -> SignResult<PageImage>;

    fn check_page(&self, page_index: u32) -> SignResult<()> {
        let page_count = self.page_count();
        if page_index >= page_count {
            return Err(SignError::PageOutOfRange { page: page_index, page_count });
        }
        Ok(())
    }
}

fn document_id_for(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Pages of a PDF opened through a [`PdfEngine`]
pub struct PdfPageSource<E: PdfEngine> {
    engine: E,
    handle: signscan_pdf::DocumentHandle,
    document_id: String,
    page_count: u32,
    dpi: f32,
    raster_overrides: HashMap<u32, PathBuf>,
}

impl<E: PdfEngine + Sync> PdfPageSource<E> {
    pub fn open(mut engine: E, path: impl AsRef<Path>, dpi: f32) -> SignResult<Self> {
        let path = path.as_ref();
        let handle = engine.open(OpenSource::from(path))?;
        let page_count = engine.page_count(handle)?;
        Ok(Self {
            engine,
            handle,
            document_id: document_id_for(path),
            page_count,
            dpi: if dpi > 0.0 { dpi } else { DEFAULT_DPI },
            raster_overrides: HashMap::new(),
        })
    }

    pub fn from_bytes(
        mut engine: E,
        document_id: impl Into<String>,
        bytes: Vec<u8>,
        dpi: f32,
    ) -> SignResult<Self> {
        let handle = engine.open(OpenSource::Bytes(bytes))?;
        let page_count = engine.page_count(handle)?;
        Ok(Self {
            engine,
            handle,
            document_id: document_id.into(),
            page_count,
            dpi: if dpi > 0.0 { dpi } else { DEFAULT_DPI },
            raster_overrides: HashMap::new(),
        })
    }

    /// Use a pre-rendered image instead of the engine's raster for one page
    pub fn with_raster_override(mut self, page_index: u32, path: impl Into<PathBuf>) -> Self {
        self.raster_overrides.insert(page_index, path.into());
        self
    }

    pub fn dpi(&self) -> f32 {
        self.dpi
    }

    /// True when `rasterize` would hand back a blank sheet for this page
    pub fn raster_is_placeholder(&self, page_index: u32) -> bool {
        !self.engine.renders_content() && !self.raster_overrides.contains_key(&page_index)
    }
}

impl<E: PdfEngine + Sync> PageSource for PdfPageSource<E> {
    fn document_id(&self) -> &str {
        &self.document_id
    }

    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn page_dimensions(&self, page_index: u32) -> SignResult<PageDimensions> {
        self.check_page(page_index)?;
        let size = self.engine.page_size(self.handle, page_index)?;

        if let Some(path) = self.raster_overrides.get(&page_index) {
            let (width, height) = image::image_dimensions(path)?;
            let pdf_aspect = size.width_pt / size.height_pt.max(f32::EPSILON);
            let image_aspect = width as f32 / height.max(1) as f32;
            if (pdf_aspect - image_aspect).abs() > 0.01 * pdf_aspect {
                tracing::warn!(
                    page = page_index,
                    pdf_aspect,
                    image_aspect,
                    "raster override does not match the page's aspect ratio"
                );
            }
            return Ok(PageDimensions::new(width, height));
        }

        let (width, height) = size.pixels_at(self.dpi);
        Ok(PageDimensions::new(width, height))
    }

    fn page_text(&self, page_index: u32) -> SignResult<Option<PageText>> {
        self.check_page(page_index)?;
        let text = self.engine.page_text(self.handle, page_index)?;
        Ok(Some(text))
    }

    fn rasterize(&self, page_index: u32) -> SignResult<PageImage> {
        self.check_page(page_index)?;
        let page = PageRef::new(self.document_id.clone(), page_index);

        let image = match self.raster_overrides.get(&page_index) {
            Some(path) => image::open(path)?.to_rgb8(),
            None => {
                if !self.engine.renders_content() {
                    tracing::warn!(
                        document = %self.document_id,
                        page = page_index,
                        "rendering a blank placeholder raster; pass a pre-rendered page image \
                         or build with the pdfium feature"
                    );
                }
                let rgba = self
                    .engine
                    .render_page(self.handle, RenderRequest::at_dpi(page_index, self.dpi))?;
                DynamicImage::ImageRgba8(rgba).to_rgb8()
            }
        };

        Ok(PageImage::new(page, image))
    }
}

/// A single pre-rendered page without a text layer
#[derive(Debug, Clone)]
pub struct ImagePageSource {
    document_id: String,
    image: RgbImage,
}

impl ImagePageSource {
    pub fn open(path: impl AsRef<Path>) -> SignResult<Self> {
        let path = path.as_ref();
        let image = image::open(path)?.to_rgb8();
        Ok(Self { document_id: document_id_for(path), image })
    }

    pub fn from_image(document_id: impl Into<String>, image: RgbImage) -> Self {
        Self { document_id: document_id.into(), image }
    }
}

impl PageSource for ImagePageSource {
    fn document_id(&self) -> &str {
        &self.document_id
    }

    fn page_count(&self) -> u32 {
        1
    }

    fn page_dimensions(&self, page_index: u32) -> SignResult<PageDimensions> {
        self.check_page(page_index)?;
        Ok(PageDimensions::new(self.image.width(), self.image.height()))
    }

    fn page_text(&self, page_index: u32) -> SignResult<Option<PageText>> {
        self.check_page(page_index)?;
        Ok(None)
    }

    fn rasterize(&self, page_index: u32) -> SignResult<PageImage> {
        self.check_page(page_index)?;
        Ok(PageImage::new(PageRef::new(self.document_id.clone(), page_index), self.image.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use signscan_pdf::fixtures::{pdf_bytes, PlacedText};
    use signscan_pdf::LopdfEngine;

    fn pdf_source() -> PdfPageSource<LopdfEngine> {
        let bytes = pdf_bytes(612, 792, &[vec![PlacedText::new("2001", 72, 700, 12)]])
            .expect("fixture PDF builds");
        PdfPageSource::from_bytes(LopdfEngine::new(), "plan.pdf", bytes, 144.0)
            .expect("PDF opens")
    }

    #[test]
    fn test_pdf_dimensions_follow_dpi() {
        let source = pdf_source();
        assert_eq!(source.page_count(), 1);
        assert_eq!(
            source.page_dimensions(0).expect("dimensions"),
            PageDimensions::new(1224, 1584)
        );

        let raster = source.rasterize(0).expect("raster");
        assert_eq!(raster.dimensions(), PageDimensions::new(1224, 1584));
        assert_eq!(raster.page, PageRef::new("plan.pdf", 0));
    }

    #[test]
    fn test_pdf_text_layer_is_exposed() {
        let text = pdf_source().page_text(0).expect("text").expect("PDF has a text layer");
        assert_eq!(text.spans.len(), 1);
        assert_eq!(text.spans[0].text, "2001");
    }

    #[test]
    fn test_out_of_range_page() {
        let err = pdf_source().page_dimensions(5).expect_err("page 5 does not exist");
        assert!(matches!(err, SignError::PageOutOfRange { page: 5, page_count: 1 }));
    }

    #[test]
    fn test_raster_override_is_used() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("page0.png");
        RgbImage::from_pixel(612, 792, Rgb([10, 20, 30])).save(&path).expect("save png");

        assert!(pdf_source().raster_is_placeholder(0));
        let source = pdf_source().with_raster_override(0, &path);
        assert!(!source.raster_is_placeholder(0));
        assert_eq!(source.page_dimensions(0).expect("dimensions"), PageDimensions::new(612, 792));
        let raster = source.rasterize(0).expect("raster");
        assert_eq!(raster.image.get_pixel(5, 5), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_image_source_has_no_text() {
        let source = ImagePageSource::from_image("scan", RgbImage::new(40, 30));
        assert_eq!(source.page_count(), 1);
        assert!(source.page_text(0).expect("text lookup").is_none());
        assert_eq!(source.page_dimensions(0).expect("dims"), PageDimensions::new(40, 30));
        assert!(source.rasterize(1).is_err());
    }

    #[test]
    fn test_missing_image_is_an_error() {
        let err = ImagePageSource::open("/nonexistent/page.png").expect_err("missing file");
        assert!(matches!(err, SignError::Image(_)));
    }
}
