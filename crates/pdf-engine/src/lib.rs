//! PDF access for floor-plan pages.
//!
//! Opens documents, reports page sizes, reads the embedded text layer with
//! word-level bounding boxes and renders pages. The default backend is pure
//! Rust (`lopdf`); the `pdfium` feature adds PDFium for exact glyph bounds and
//! real rasterization.

mod text;

use image::{ImageBuffer, Rgba};
use lopdf::{Document, ObjectId};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub use text::TextSpan;

pub type RgbaImage = ImageBuffer<Rgba<u8>, Vec<u8>>;

/// Points per inch in PDF user space.
pub const POINTS_PER_INCH: f32 = 72.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentHandle(u64);

impl DocumentHandle {
    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width_pt: f32,
    pub height_pt: f32,
}

impl PageSize {
    /// Pixel dimensions of this page when rendered at `dpi`.
    pub fn pixels_at(&self, dpi: f32) -> (u32, u32) {
        let scale = dpi / POINTS_PER_INCH;
        (
            (self.width_pt * scale).round().max(1.0) as u32,
            (self.height_pt * scale).round().max(1.0) as u32,
        )
    }
}

/// Visible page rectangle in default user space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct MediaBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl MediaBox {
    const LETTER: MediaBox = MediaBox { x0: 0.0, y0: 0.0, x1: 612.0, y1: 792.0 };

    fn size(&self) -> PageSize {
        PageSize { width_pt: (self.x1 - self.x0).abs(), height_pt: (self.y1 - self.y0).abs() }
    }
}

/// Embedded text of one page.
///
/// Span coordinates are in points with a top-left origin, relative to the
/// page's media box.
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub size: PageSize,
    pub spans: Vec<TextSpan>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderRequest {
    pub page_index: u32,
    pub scale: f32,
}

impl RenderRequest {
    pub fn at_dpi(page_index: u32, dpi: f32) -> Self {
        Self { page_index, scale: dpi / POINTS_PER_INCH }
    }
}

impl Default for RenderRequest {
    fn default() -> Self {
        Self { page_index: 0, scale: 1.0 }
    }
}

#[derive(Debug, Clone)]
pub enum OpenSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl From<PathBuf> for OpenSource {
    fn from(value: PathBuf) -> Self {
        Self::Path(value)
    }
}

impl From<&Path> for OpenSource {
    fn from(value: &Path) -> Self {
        Self::Path(value.to_path_buf())
    }
}

impl From<Vec<u8>> for OpenSource {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PdfEngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF parse error: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("invalid handle {0}")]
    InvalidHandle(u64),
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("encrypted PDFs are not supported in the default backend")]
    EncryptedUnsupported,
    #[error("backend error: {0}")]
    Backend(String),
}

pub trait PdfEngine {
    fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, PdfEngineError>;
    fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError>;
    fn page_size(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<PageSize, PdfEngineError>;
    /// Every text span on the page, in content-stream order.
    fn page_text(&self, handle: DocumentHandle, page_index: u32)
        -> Result<PageText, PdfEngineError>;
    fn render_page(
        &self,
        handle: DocumentHandle,
        request: RenderRequest,
    ) -> Result<RgbaImage, PdfEngineError>;
    fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError>;

    /// Whether `render_page` draws page content rather than a blank sheet.
    fn renders_content(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
struct DocumentRecord {
    #[cfg_attr(not(feature = "pdfium"), allow(dead_code))]
    bytes: Vec<u8>,
    document: Document,
    pages: Vec<(ObjectId, MediaBox)>,
}

impl DocumentRecord {
    fn page(&self, page_index: u32) -> Result<(ObjectId, MediaBox), PdfEngineError> {
        self.pages.get(page_index as usize).copied().ok_or(PdfEngineError::PageOutOfRange {
            page: page_index,
            page_count: self.pages.len() as u32,
        })
    }
}

#[derive(Debug, Default)]
pub struct LopdfEngine {
    next_handle: u64,
    docs: HashMap<DocumentHandle, DocumentRecord>,
}

impl LopdfEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn load(bytes: Vec<u8>) -> Result<DocumentRecord, PdfEngineError> {
        if bytes.windows("/Encrypt".len()).any(|window| window == b"/Encrypt") {
            return Err(PdfEngineError::EncryptedUnsupported);
        }

        let document = Document::load_mem(&bytes)?;
        let mut pages = Vec::new();

        for (_, object_id) in document.get_pages() {
            let media_box = media_box(&document, object_id).unwrap_or(MediaBox::LETTER);
            pages.push((object_id, media_box));
        }

        if pages.is_empty() {
            return Err(PdfEngineError::Backend("document has no pages".to_owned()));
        }

        Ok(DocumentRecord { bytes, document, pages })
    }

    fn record(&self, handle: DocumentHandle) -> Result<&DocumentRecord, PdfEngineError> {
        self.docs.get(&handle).ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }
}

/// Resolves the page's MediaBox, following `Parent` links for inherited boxes.
fn media_box(document: &Document, page_id: ObjectId) -> Option<MediaBox> {
    let mut current = page_id;
    // Page trees deeper than this are malformed.
    for _ in 0..32 {
        let dict = document.get_dictionary(current).ok()?;
        if let Some(array) = dict.get(b"MediaBox").ok().and_then(|obj| obj.as_array().ok()) {
            if array.len() != 4 {
                return None;
            }
            return Some(MediaBox {
                x0: array[0].as_float().ok()?,
                y0: array[1].as_float().ok()?,
                x1: array[2].as_float().ok()?,
                y1: array[3].as_float().ok()?,
            });
        }
        current = dict.get(b"Parent").ok()?.as_reference().ok()?;
    }
    None
}

impl PdfEngine for LopdfEngine {
    fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, PdfEngineError> {
        let bytes = match source {
            OpenSource::Path(path) => fs::read(path)?,
            OpenSource::Bytes(bytes) => bytes,
        };

        let record = Self::load(bytes)?;

        self.next_handle += 1;
        let handle = DocumentHandle(self.next_handle);
        tracing::debug!(handle = handle.raw(), pages = record.pages.len(), "opened PDF");
        self.docs.insert(handle, record);

        Ok(handle)
    }

    fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError> {
        Ok(self.record(handle)?.pages.len() as u32)
    }

    fn page_size(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<PageSize, PdfEngineError> {
        let (_, media_box) = self.record(handle)?.page(page_index)?;
        Ok(media_box.size())
    }

    fn page_text(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<PageText, PdfEngineError> {
        let record = self.record(handle)?;
        let (page_id, media_box) = record.page(page_index)?;
        let content = record.document.get_page_content(page_id)?;
        let spans = text::extract_spans(&content, &media_box)?;

        Ok(PageText { size: media_box.size(), spans })
    }

    /// Renders a blank sheet of the page's size.
    ///
    /// `lopdf` cannot rasterize page content; real rasters come from the
    /// `pdfium` backend or from pre-rendered page images.
    fn render_page(
        &self,
        handle: DocumentHandle,
        request: RenderRequest,
    ) -> Result<RgbaImage, PdfEngineError> {
        let page_size = self.page_size(handle, request.page_index)?;
        let scale = if request.scale <= 0.0 { 1.0 } else { request.scale };

        let width = (page_size.width_pt * scale).round().max(1.0) as u32;
        let height = (page_size.height_pt * scale).round().max(1.0) as u32;

        Ok(RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255])))
    }

    fn renders_content(&self) -> bool {
        false
    }

    fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError> {
        self.docs.remove(&handle).map(|_| ()).ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }
}

#[cfg(feature = "pdfium")]
pub mod pdfium_backend {
    use super::*;
    use pdfium_render::prelude::*;

    /// PDFium-backed engine: exact glyph bounds and real page rasters.
    ///
    /// Document bookkeeping is shared with [`LopdfEngine`]; PDFium is bound
    /// per call so the engine stays `Send + Sync`.
    pub struct PdfiumEngine {
        inner: LopdfEngine,
    }

    impl PdfiumEngine {
        pub fn from_system_library() -> Result<Self, PdfEngineError> {
            let _ = bind()?;
            Ok(Self { inner: LopdfEngine::default() })
        }

        fn with_page<T>(
            &self,
            handle: DocumentHandle,
            page_index: u32,
            f: impl FnOnce(&PdfPage<'_>) -> Result<T, PdfEngineError>,
        ) -> Result<T, PdfEngineError> {
            let record = self.inner.record(handle)?;
            record.page(page_index)?;

            let pdfium = bind()?;
            let document = pdfium
                .load_pdf_from_byte_slice(&record.bytes, None)
                .map_err(|err| PdfEngineError::Backend(err.to_string()))?;
            let page = document
                .pages()
                .get(page_index as u16)
                .map_err(|err| PdfEngineError::Backend(err.to_string()))?;

            f(&page)
        }
    }

    fn bind() -> Result<Pdfium, PdfEngineError> {
        let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library())
            .map_err(|err| {
                PdfEngineError::Backend(format!("failed to bind pdfium library: {err}"))
            })?;
        Ok(Pdfium::new(bindings))
    }

    impl PdfEngine for PdfiumEngine {
        fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, PdfEngineError> {
            self.inner.open(source)
        }

        fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError> {
            self.inner.page_count(handle)
        }

        fn page_size(
            &self,
            handle: DocumentHandle,
            page_index: u32,
        ) -> Result<PageSize, PdfEngineError> {
            self.inner.page_size(handle, page_index)
        }

        fn page_text(
            &self,
            handle: DocumentHandle,
            page_index: u32,
        ) -> Result<PageText, PdfEngineError> {
            let size = self.inner.page_size(handle, page_index)?;
            let spans = self.with_page(handle, page_index, |page| {
                let page_height = page.height().value;
                let text_page = page
                    .text()
                    .map_err(|err| PdfEngineError::Backend(err.to_string()))?;

                let mut builder = crate::text::SpanBuilder::default();
                for char in text_page.chars().iter() {
                    let Some(c) = char.unicode_char() else {
                        continue;
                    };
                    if c.is_whitespace() {
                        builder.flush();
                        continue;
                    }
                    let Ok(bounds) = char.loose_bounds() else {
                        continue;
                    };
                    builder.push(
                        c,
                        bounds.left().value,
                        page_height - bounds.top().value,
                        bounds.right().value,
                        page_height - bounds.bottom().value,
                    );
                }
                Ok(builder.finish())
            })?;

            Ok(PageText { size, spans })
        }

        fn render_page(
            &self,
            handle: DocumentHandle,
            request: RenderRequest,
        ) -> Result<RgbaImage, PdfEngineError> {
            let size = self.inner.page_size(handle, request.page_index)?;
            let scale = if request.scale <= 0.0 { 1.0 } else { request.scale };
            let width = (size.width_pt * scale).round().max(1.0) as u32;
            let height = (size.height_pt * scale).round().max(1.0) as u32;

            let rgba = self.with_page(handle, request.page_index, |page| {
                let config = PdfRenderConfig::new()
                    .set_target_width(width as i32)
                    .set_target_height(height as i32);
                let bitmap = page
                    .render_with_config(&config)
                    .map_err(|err| PdfEngineError::Backend(err.to_string()))?;
                Ok(bitmap.as_rgba_bytes().to_vec())
            })?;

            RgbaImage::from_raw(width, height, rgba).ok_or_else(|| {
                PdfEngineError::Backend("pdfium returned a bitmap of unexpected size".to_owned())
            })
        }

        fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError> {
            self.inner.close(handle)
        }
    }
}

pub fn default_engine() -> LopdfEngine {
    LopdfEngine::new()
}

/// Builds small single-page PDFs for tests across the workspace.
#[doc(hidden)]
pub mod fixtures {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    /// A word drawn at `(x, y)` (points, bottom-left origin) in `size` pt type.
    #[derive(Debug, Clone)]
    pub struct PlacedText {
        pub text: String,
        pub x: i64,
        pub y: i64,
        pub size: i64,
    }

    impl PlacedText {
        pub fn new(text: impl Into<String>, x: i64, y: i64, size: i64) -> Self {
            Self { text: text.into(), x, y, size }
        }
    }

    /// Serializes a document with one page per entry of `pages`.
    pub fn pdf_bytes(
        width: i64,
        height: i64,
        pages: &[Vec<PlacedText>],
    ) -> Result<Vec<u8>, crate::PdfEngineError> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids = Vec::new();
        for words in pages {
            let mut operations = Vec::new();
            for word in words {
                operations.push(Operation::new("BT", vec![]));
                operations.push(Operation::new(
                    "Tf",
                    vec![Object::Name(b"F1".to_vec()), Object::Integer(word.size)],
                ));
                operations.push(Operation::new(
                    "Td",
                    vec![Object::Integer(word.x), Object::Integer(word.y)],
                ));
                operations.push(Operation::new(
                    "Tj",
                    vec![Object::string_literal(word.text.as_str())],
                ));
                operations.push(Operation::new("ET", vec![]));
            }
            let content = Content { operations };
            let encoded = content.encode()?;
            let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "MediaBox" => vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(width),
                    Object::Integer(height),
                ],
            });
            kids.push(Object::Reference(page_id));
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes)?;
        Ok(bytes)
    }
}
