// Built-in CMYK rasterizer for ink coverage.
//
// Paints fills and images of the page's content stream into a device CMYK
// raster covering the CropBox. Text, strokes and shadings are not painted.

use tracing::debug;

use super::{CmykRaster, Deadline, PageRasterizer};
use crate::error::PreflightError;
use crate::pdf::color::ColorSpace;
use crate::pdf::content_stream::{
    ContentVisitor, GraphicsState, Matrix, ObjectRef, Subpath, interpret,
};
use crate::pdf::image_xobject::{decode_to_cmyk, read_image_meta};
use crate::pdf::reader::PdfReader;
use crate::pdf::resources::Resources;
use crate::structure::PageRecord;

/// Upper bound on raster size (pixels) to keep memory bounded.
const MAX_PIXELS: u64 = 120_000_000;

/// Rows painted between deadline checks.
const ROWS_PER_CHECK: u32 = 64;

pub struct BuiltinRasterizer<'a> {
    reader: &'a PdfReader,
}

impl<'a> BuiltinRasterizer<'a> {
    pub fn new(reader: &'a PdfReader) -> Self {
        BuiltinRasterizer { reader }
    }
}

impl PageRasterizer for BuiltinRasterizer<'_> {
    fn name(&self) -> &'static str {
        "builtin"
    }

    fn rasterize(
        &self,
        page: &PageRecord,
        dpi: u32,
        deadline: &Deadline,
    ) -> crate::error::Result<CmykRaster> {
        deadline.check()?;
        let crop = page.geometry.crop_box();
        let scale = dpi as f64 / 72.0;
        let width = (crop.width() * scale).ceil().max(1.0) as u32;
        let height = (crop.height() * scale).ceil().max(1.0) as u32;
        if width as u64 * height as u64 > MAX_PIXELS {
            return Err(PreflightError::render(format!(
                "page {} raster {width}x{height} too large at {dpi} dpi",
                page.page_number
            )));
        }

        // ページ座標 → デバイス画素（y軸下向き、CropBox左上が原点）
        let to_device = Matrix {
            a: scale,
            b: 0.0,
            c: 0.0,
            d: -scale,
            e: -crop.llx * scale,
            f: crop.ury * scale,
        };

        let content = self.reader.page_content_stream(page.page_number)?;
        let dicts = self.reader.page_resource_dicts(page.page_number)?;
        let resources = Resources::new(self.reader.document(), dicts);

        let mut painter = Painter {
            doc: self.reader.document(),
            raster: CmykRaster::blank(width, height),
            to_device,
            deadline,
            skipped: 0,
        };
        interpret(&resources, &content, Matrix::identity(), &mut painter)?;

        if painter.skipped > 0 {
            debug!(
                page = page.page_number,
                skipped = painter.skipped,
                "objects not painted by builtin rasterizer"
            );
        }
        Ok(painter.raster.with_unpainted_objects(painter.skipped))
    }
}

struct Painter<'d> {
    doc: &'d lopdf::Document,
    raster: CmykRaster,
    to_device: Matrix,
    deadline: &'d Deadline,
    skipped: usize,
}

impl Painter<'_> {
    /// Composite one device color onto a pixel.
    ///
    /// With overprint on and OPM 1, zero DeviceCMYK components leave the
    /// underlying ink untouched.
    fn put(&mut self, x: u32, y: u32, ink: [u8; 4], keep_zero_components: bool) {
        if let Some(px) = self.raster.pixel_mut(x, y) {
            for (dst, src) in px.iter_mut().zip(ink) {
                if !(keep_zero_components && src == 0) {
                    *dst = src;
                }
            }
        }
    }

    fn fill_polygons(
        &mut self,
        path: &[Subpath],
        even_odd: bool,
        ink: [u8; 4],
        keep_zero: bool,
    ) -> crate::error::Result<()> {
        let edges = device_edges(path, &self.to_device);
        if edges.is_empty() {
            return Ok(());
        }
        let y_min = edges.iter().map(|e| e.0.1.min(e.1.1)).fold(f64::INFINITY, f64::min);
        let y_max = edges
            .iter()
            .map(|e| e.0.1.max(e.1.1))
            .fold(f64::NEG_INFINITY, f64::max);
        let height = self.raster.height();
        let width = self.raster.width();
        let row_start = y_min.floor().max(0.0) as u32;
        let row_end = (y_max.ceil().max(0.0) as u32).min(height);

        let mut crossings: Vec<(f64, i32)> = Vec::new();
        for row in row_start..row_end {
            if (row - row_start) % ROWS_PER_CHECK == 0 {
                self.deadline.check()?;
            }
            let yc = row as f64 + 0.5;
            crossings.clear();
            for &((x0, y0), (x1, y1)) in &edges {
                // 半開区間で頂点の二重カウントを防ぐ
                let (lo, hi, dir) = if y0 < y1 { (y0, y1, 1) } else { (y1, y0, -1) };
                if yc < lo || yc >= hi {
                    continue;
                }
                let t = (yc - y0) / (y1 - y0);
                crossings.push((x0 + t * (x1 - x0), dir));
            }
            crossings.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut winding = 0;
            for pair in crossings.windows(2) {
                winding += pair[0].1;
                let inside = if even_odd { winding % 2 != 0 } else { winding != 0 };
                if !inside {
                    continue;
                }
                // 画素中心が区間内にある画素を塗る
                let start = (pair[0].0 - 0.5).ceil().max(0.0) as u32;
                let end = ((pair[1].0 - 0.5).ceil().max(0.0) as u32).min(width);
                for x in start..end {
                    self.put(x, row, ink, keep_zero);
                }
            }
        }
        Ok(())
    }
}

/// Polygon edges in device space; open subpaths are closed for filling.
fn device_edges(path: &[Subpath], to_device: &Matrix) -> Vec<((f64, f64), (f64, f64))> {
    let mut edges = Vec::new();
    for sub in path {
        if sub.points.len() < 2 {
            continue;
        }
        let pts: Vec<(f64, f64)> = sub
            .points
            .iter()
            .map(|&(x, y)| to_device.apply(x, y))
            .collect();
        for i in 0..pts.len() {
            let a = pts[i];
            let b = pts[(i + 1) % pts.len()];
            if a.1 != b.1 {
                edges.push((a, b));
            }
        }
    }
    edges
}

fn to_ink(color: crate::pdf::color::Cmyk) -> [u8; 4] {
    let q = |v: f64| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    [q(color.c), q(color.m), q(color.y), q(color.k)]
}

impl ContentVisitor for Painter<'_> {
    fn checkpoint(&mut self) -> crate::error::Result<()> {
        self.deadline.check()
    }

    fn fill_path(
        &mut self,
        state: &GraphicsState,
        path: &[Subpath],
        even_odd: bool,
        _at: &ObjectRef,
    ) -> crate::error::Result<()> {
        let Some(color) = state.fill.cmyk() else {
            self.skipped += 1;
            return Ok(());
        };
        let keep_zero = state.fill_overprint
            && state.overprint_mode == 1
            && matches!(state.fill.space, Some(ColorSpace::Cmyk));
        self.fill_polygons(path, even_odd, to_ink(color), keep_zero)
    }

    fn paint_image(
        &mut self,
        state: &GraphicsState,
        name: &str,
        image: &lopdf::Stream,
        _at: &ObjectRef,
    ) -> crate::error::Result<()> {
        let decoded = read_image_meta(self.doc, image)
            .and_then(|meta| decode_to_cmyk(self.doc, image, &meta, state.fill.cmyk()));
        let img = match decoded {
            Ok(img) => img,
            Err(e) => {
                debug!(image = name, error = %e, "image not painted");
                self.skipped += 1;
                return Ok(());
            }
        };
        if img.width == 0 || img.height == 0 {
            return Ok(());
        }

        // 画像空間の単位正方形 → デバイス画素
        let full = state.ctm.multiply(&self.to_device);
        let Some(inverse) = full.invert() else {
            return Ok(());
        };
        let corners = [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)].map(|(x, y)| full.apply(x, y));
        let x_min = corners.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
        let x_max = corners.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
        let y_min = corners.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
        let y_max = corners.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);

        let col_start = x_min.floor().max(0.0) as u32;
        let col_end = (x_max.ceil().max(0.0) as u32).min(self.raster.width());
        let row_start = y_min.floor().max(0.0) as u32;
        let row_end = (y_max.ceil().max(0.0) as u32).min(self.raster.height());

        for row in row_start..row_end {
            if (row - row_start) % ROWS_PER_CHECK == 0 {
                self.deadline.check()?;
            }
            for col in col_start..col_end {
                let (u, v) = inverse.apply(col as f64 + 0.5, row as f64 + 0.5);
                if !(0.0..1.0).contains(&u) || !(0.0..1.0).contains(&v) {
                    continue;
                }
                // 画像の1行目は単位正方形の上端 (v = 1)
                let ix = ((u * img.width as f64) as u32).min(img.width - 1);
                let iy = (((1.0 - v) * img.height as f64) as u32).min(img.height - 1);
                if let Some(ink) = img.pixel(ix, iy) {
                    self.put(col, row, ink, false);
                }
            }
        }
        Ok(())
    }

    fn stroke_path(
        &mut self,
        _state: &GraphicsState,
        _path: &[Subpath],
        _at: &ObjectRef,
    ) -> crate::error::Result<()> {
        self.skipped += 1;
        Ok(())
    }

    fn show_text(&mut self, _state: &GraphicsState, _at: &ObjectRef) -> crate::error::Result<()> {
        self.skipped += 1;
        Ok(())
    }

    fn paint_shading(
        &mut self,
        _state: &GraphicsState,
        _at: &ObjectRef,
    ) -> crate::error::Result<()> {
        self.skipped += 1;
        Ok(())
    }
}
