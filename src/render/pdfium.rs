// pdfium-render wrapper: page -> RGB bitmap -> CMYK raster (in-memory only)

use pdfium_render::prelude::*;
use std::path::PathBuf;

use super::{CmykRaster, Deadline, PageRasterizer};
use crate::pdf::color::rgb_to_cmyk;
use crate::structure::PageRecord;

/// Resolves the path to the pdfium shared library.
///
/// Search order:
/// 1. `PDFIUM_DYNAMIC_LIB_PATH` environment variable
/// 2. `vendor/pdfium/lib/` relative to the project root (for development)
fn resolve_pdfium_lib_path() -> crate::error::Result<PathBuf> {
    if let Ok(path) = std::env::var("PDFIUM_DYNAMIC_LIB_PATH") {
        let p = PathBuf::from(&path);
        if p.exists() {
            return Ok(p);
        }
        return Err(crate::error::PreflightError::render(format!(
            "PDFIUM_DYNAMIC_LIB_PATH is set to '{}' but the path does not exist",
            path
        )));
    }

    if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
        let vendor_path = PathBuf::from(&manifest_dir).join("vendor/pdfium/lib");
        if vendor_path.exists() {
            return Ok(vendor_path);
        }
    }

    Err(crate::error::PreflightError::render(
        "pdfium library not found: set PDFIUM_DYNAMIC_LIB_PATH or place libpdfium.so in vendor/pdfium/lib/",
    ))
}

/// Creates a new Pdfium instance by dynamically loading the shared library.
fn create_pdfium() -> crate::error::Result<Pdfium> {
    let lib_path = resolve_pdfium_lib_path()?;
    let lib_path_str = lib_path.to_str().ok_or_else(|| {
        crate::error::PreflightError::render("pdfium library path contains non-UTF-8 characters")
    })?;
    let bindings =
        Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(lib_path_str))?;
    Ok(Pdfium::new(bindings))
}

/// Rasterizes through pdfium. Renders RGB and converts every pixel with the
/// same subtractive approximation as vector colors, so native CMYK values
/// are not preserved exactly.
pub struct PdfiumRasterizer<'a> {
    bytes: &'a [u8],
}

impl<'a> PdfiumRasterizer<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        PdfiumRasterizer { bytes }
    }
}

impl PageRasterizer for PdfiumRasterizer<'_> {
    fn name(&self) -> &'static str {
        "pdfium"
    }

    fn rasterize(
        &self,
        page: &PageRecord,
        dpi: u32,
        deadline: &Deadline,
    ) -> crate::error::Result<CmykRaster> {
        deadline.check()?;
        let pdfium = create_pdfium()?;
        let document = pdfium.load_pdf_from_byte_slice(self.bytes, None)?;

        let page_index = u16::try_from(page.page_number.saturating_sub(1))
            .map_err(|_| crate::error::PreflightError::render("page index exceeds u16 range"))?;
        let pdf_page = document.pages().get(page_index)?;

        // PDF default user unit: 1 point = 1/72 inch
        let width_px = (pdf_page.width().value * dpi as f32 / 72.0).round() as i32;
        let height_px = (pdf_page.height().value * dpi as f32 / 72.0).round() as i32;
        let config = PdfRenderConfig::new()
            .set_target_width(width_px.max(1))
            .set_target_height(height_px.max(1));

        let bitmap = pdf_page.render_with_config(&config)?;
        deadline.check()?;

        let rgb = bitmap.as_image().to_rgb8();
        let mut raster = CmykRaster::blank(rgb.width(), rgb.height());
        for (x, y, px) in rgb.enumerate_pixels() {
            let [r, g, b] = px.0;
            let cmyk = rgb_to_cmyk(r as f64 / 255.0, g as f64 / 255.0, b as f64 / 255.0);
            if let Some(dst) = raster.pixel_mut(x, y) {
                for (slot, v) in dst.iter_mut().zip([cmyk.c, cmyk.m, cmyk.y, cmyk.k]) {
                    *slot = (v * 255.0).round() as u8;
                }
            }
        }
        Ok(raster)
    }
}
