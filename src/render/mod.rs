pub mod raster;

#[cfg(feature = "pdfium")]
pub mod pdfium;

use std::time::{Duration, Instant};

use crate::config::settings::RasterizerKind;
use crate::pdf::reader::PdfReader;
use crate::structure::PageRecord;

/// Device CMYK bitmap, 4 bytes per pixel (C, M, Y, K), 0 = no ink.
#[derive(Debug, Clone, PartialEq)]
pub struct CmykRaster {
    width: u32,
    height: u32,
    data: Vec<u8>,
    /// Painting operations the rasterizer could not reproduce.
    unpainted_objects: usize,
}

impl CmykRaster {
    /// Blank (unprinted) raster.
    pub fn blank(width: u32, height: u32) -> Self {
        CmykRaster {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
            unpainted_objects: 0,
        }
    }

    pub fn with_unpainted_objects(mut self, count: usize) -> Self {
        self.unpainted_objects = count;
        self
    }

    /// Objects left out of the raster (text, strokes, shadings, undecodable
    /// images). Zero means the raster is complete.
    pub fn unpainted_objects(&self) -> usize {
        self.unpainted_objects
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        Some([self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]])
    }

    pub fn pixel_mut(&mut self, x: u32, y: u32) -> Option<&mut [u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        self.data.get_mut(i..i + 4)
    }

    /// Highest C+M+Y+K total over all pixels, in percent (0..=400).
    pub fn max_total_ink_percent(&self) -> f64 {
        let max = self
            .data
            .chunks_exact(4)
            .map(|px| px.iter().map(|&v| v as u32).sum::<u32>())
            .max()
            .unwrap_or(0);
        max as f64 * 100.0 / 255.0
    }
}

/// Wall-clock budget shared by every page of one document's ink analysis.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Deadline {
            expires_at: Instant::now() + budget,
            budget,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// `TimeoutError` once the budget is used up.
    pub fn check(&self) -> crate::error::Result<()> {
        if self.is_expired() {
            return Err(crate::error::PreflightError::timeout(format!(
                "ink analysis exceeded {:?}",
                self.budget
            )));
        }
        Ok(())
    }
}

/// Turns one page into a CMYK raster at a given resolution.
pub trait PageRasterizer {
    fn name(&self) -> &'static str;

    fn rasterize(
        &self,
        page: &PageRecord,
        dpi: u32,
        deadline: &Deadline,
    ) -> crate::error::Result<CmykRaster>;
}

/// Build the rasterizer selected in the settings.
pub fn rasterizer_for<'a>(
    kind: RasterizerKind,
    reader: &'a PdfReader,
    bytes: &'a [u8],
) -> crate::error::Result<Box<dyn PageRasterizer + 'a>> {
    match kind {
        RasterizerKind::Builtin => Ok(Box::new(raster::BuiltinRasterizer::new(reader))),
        #[cfg(feature = "pdfium")]
        RasterizerKind::Pdfium => Ok(Box::new(pdfium::PdfiumRasterizer::new(bytes))),
        #[cfg(not(feature = "pdfium"))]
        RasterizerKind::Pdfium => {
            let _ = bytes;
            Err(crate::error::PreflightError::config(
                "pdfium rasterizer is not available in this build",
            ))
        }
    }
}
