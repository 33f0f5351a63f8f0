//! Document preprocessing: turning an uploaded file into an ordered sequence
//! of bounded-resolution page images.
//!
//! A single image becomes one page; a PDF becomes one page per document page,
//! in page order. Every page is downscaled (never upscaled) to fit the
//! configured maximum dimension so the vision model receives a predictable
//! payload size. The raw byte ceiling is checked before any decoding work.

use base64::Engine;
use image::{DynamicImage, ImageFormat, imageops::FilterType};
use pdfium_render::prelude::*;
use std::io::Cursor;
use tracing::{debug, warn};

use crate::config::LimitsConfig;
use crate::errors::{Error, Result};

/// Declared kind of an uploaded document, derived from the content type or
/// filename extension before any bytes are inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Jpeg,
    Png,
    Pdf,
}

impl DocumentKind {
    /// Determine the document kind from a declared content type, falling back
    /// to the filename extension. Anything unrecognized is rejected.
    pub fn detect(content_type: Option<&str>, filename: Option<&str>) -> Result<Self> {
        // Browsers fall back to application/octet-stream for types they do
        // not know; treat it like an absent declaration and use the extension
        let declared = content_type
            .map(|ct| ct.trim().to_ascii_lowercase())
            .filter(|ct| !ct.is_empty() && ct != "application/octet-stream");
        let mime = declared.or_else(|| {
            filename
                .and_then(|name| mime_guess::from_path(name).first_raw())
                .map(|m| m.to_ascii_lowercase())
        });

        match mime.as_deref() {
            Some("image/jpeg") | Some("image/jpg") => Ok(DocumentKind::Jpeg),
            Some("image/png") => Ok(DocumentKind::Png),
            Some("application/pdf") => Ok(DocumentKind::Pdf),
            Some(other) => Err(Error::UnsupportedFormat {
                detail: format!("'{other}' is not supported; upload a JPEG, PNG, or PDF"),
            }),
            None => Err(Error::UnsupportedFormat {
                detail: "could not determine file type; upload a JPEG, PNG, or PDF".to_string(),
            }),
        }
    }
}

/// One normalized raster page, with its 1-based position in the source document
pub struct PageImage {
    pub number: u32,
    image: DynamicImage,
}

impl std::fmt::Debug for PageImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageImage")
            .field("number", &self.number)
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .finish()
    }
}

impl PageImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Encode the page as a PNG `data:` URL for provider transport
    pub fn to_png_data_url(&self) -> std::result::Result<String, image::ImageError> {
        let mut buffer = Cursor::new(Vec::new());
        self.image.write_to(&mut buffer, ImageFormat::Png)?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(buffer.into_inner());
        Ok(format!("data:image/png;base64,{encoded}"))
    }
}

/// Normalize an upload into an ordered, non-empty sequence of page images.
///
/// The byte-length ceiling is enforced first, before any decode path runs.
pub fn preprocess(bytes: &[u8], kind: DocumentKind, limits: &LimitsConfig) -> Result<Vec<PageImage>> {
    let limit = limits.max_file_size();
    if bytes.len() > limit {
        return Err(Error::SizeLimitExceeded { limit });
    }

    match kind {
        DocumentKind::Jpeg => decode_single_image(bytes, ImageFormat::Jpeg, limits),
        DocumentKind::Png => decode_single_image(bytes, ImageFormat::Png, limits),
        DocumentKind::Pdf => render_pdf_pages(bytes, limits),
    }
}

fn decode_single_image(bytes: &[u8], format: ImageFormat, limits: &LimitsConfig) -> Result<Vec<PageImage>> {
    let image = image::load_from_memory_with_format(bytes, format).map_err(|e| Error::CorruptDocument {
        detail: format!("failed to decode image: {e}"),
    })?;

    Ok(vec![PageImage {
        number: 1,
        image: fit_to_bound(image, limits.max_image_dimension),
    }])
}

/// Downscale to fit within `max_dim` per side, preserving aspect ratio.
/// Images already within the bound are left untouched (no upscaling).
fn fit_to_bound(image: DynamicImage, max_dim: u32) -> DynamicImage {
    if image.width() > max_dim || image.height() > max_dim {
        image.resize(max_dim, max_dim, FilterType::Lanczos3)
    } else {
        image
    }
}

fn render_pdf_pages(bytes: &[u8], limits: &LimitsConfig) -> Result<Vec<PageImage>> {
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| Error::Other(anyhow::anyhow!("pdfium library unavailable: {e:?}")))?;
    let pdfium = Pdfium::new(bindings);

    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| Error::CorruptDocument {
            detail: format!("failed to open PDF: {e:?}"),
        })?;

    let max_dim = limits.max_image_dimension;
    let render_config = PdfRenderConfig::new()
        .set_target_width(max_dim as i32)
        .set_maximum_height(max_dim as i32);

    let mut pages = Vec::new();
    for (index, page) in document.pages().iter().enumerate() {
        let number = index as u32 + 1;
        match page.render_with_config(&render_config) {
            Ok(bitmap) => {
                let image = fit_to_bound(bitmap.as_image(), max_dim);
                debug!(page = number, width = image.width(), height = image.height(), "Rendered PDF page");
                pages.push(PageImage { number, image });
            }
            Err(e) => {
                warn!(page = number, "Skipping page that failed to rasterize: {e:?}");
            }
        }
    }

    if pages.is_empty() {
        return Err(Error::CorruptDocument {
            detail: "no page of the PDF could be rasterized".to_string(),
        });
    }

    Ok(pages)
}
