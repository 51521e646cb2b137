//! Structural Analyzer.
//!
//! Walks each page's boxes, resources and content stream once and produces a
//! normalized [`PageRecord`]. Everything downstream reads these records and
//! never goes back to the document for geometry.

use std::collections::BTreeSet;

use lopdf::{Dictionary, Document, Object, Stream};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::merged::AnalysisConfig;
use crate::config::settings::MissingBleedPolicy;
use crate::pdf::color::{Cmyk, ColorSpace, ColorSpaceFamily};
use crate::pdf::content_stream::{
    ContentVisitor, GraphicsState, Matrix, ObjectRef, PaintColor, Subpath, interpret,
};
use crate::pdf::font::{FontUsage, inspect_fonts};
use crate::pdf::geometry::{PageGeometry, Rect};
use crate::pdf::image_xobject::{effective_ppi, read_image_meta};
use crate::pdf::reader::PdfReader;
use crate::pdf::resources::Resources;
use crate::pdf::{name_str, number, resolve};

/// US Letter, used when a page has no readable MediaBox.
const FALLBACK_MEDIA_BOX: Rect = Rect {
    llx: 0.0,
    lly: 0.0,
    urx: 612.0,
    ury: 792.0,
};

/// Which paint operation an overprint flag came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaintTarget {
    Fill,
    Stroke,
}

/// What kind of object carries an overprint flag. Stencil masks paint with
/// the current fill color and count as vector objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverprintObjectKind {
    #[default]
    Vector,
    Image,
}

/// One overprinted object as found in the content stream, before any
/// classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverprintFlag {
    /// Color the object is painted with, converted to CMYK. `None` when the
    /// color cannot be resolved (patterns, sampled images, unknown spaces).
    pub color: Option<Cmyk>,
    pub color_space: Option<ColorSpaceFamily>,
    pub target: PaintTarget,
    #[serde(default)]
    pub object_kind: OverprintObjectKind,
    pub overprint_mode: u8,
    pub object: ObjectRef,
}

/// A placed image XObject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUsage {
    pub name: String,
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub placed_width_pt: f64,
    pub placed_height_pt: f64,
    /// min(horizontal, vertical) effective resolution. `None` for degenerate
    /// placements.
    pub effective_ppi: Option<f64>,
    pub color_space: Option<ColorSpaceFamily>,
    /// First filter of the image stream (`DCTDecode`, `FlateDecode`, ...).
    pub filter: Option<String>,
    /// Size of the encoded stream data.
    pub encoded_bytes: u64,
    pub object: ObjectRef,
}

impl ImageUsage {
    /// Encoded bytes per pixel. Low values on JPEG images hint at heavy
    /// compression.
    pub fn bytes_per_pixel(&self) -> Option<f64> {
        let pixels = self.pixel_width as u64 * self.pixel_height as u64;
        (pixels > 0).then(|| self.encoded_bytes as f64 / pixels as f64)
    }

    pub fn is_jpeg(&self) -> bool {
        self.filter.as_deref() == Some("DCTDecode")
    }
}

/// Visible text shown on a page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TextUsage {
    /// Text-showing operations outside invisible render modes.
    pub runs: usize,
    /// Smallest effective font size on the page, in points. Runs with a zero
    /// size are not counted.
    pub min_size_pt: Option<f64>,
}

impl TextUsage {
    fn add(&mut self, size_pt: f64) {
        self.runs += 1;
        if size_pt > 0.0 {
            self.min_size_pt = Some(self.min_size_pt.map_or(size_pt, |m| m.min(size_pt)));
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColorUsage {
    pub color_spaces: BTreeSet<ColorSpaceFamily>,
    /// Spot colorant names in first-seen order, deduplicated case-sensitively.
    pub spot_colors: Vec<String>,
    pub has_transparency: bool,
}

impl ColorUsage {
    fn add_space(&mut self, space: &ColorSpace) {
        self.color_spaces.insert(space.family());
        for name in space.spot_names() {
            if !self.spot_colors.contains(&name) {
                self.spot_colors.push(name);
            }
        }
    }
}

/// Everything the analyzer knows about one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRecord {
    pub page_number: u32,
    pub geometry: PageGeometry,
    pub color: ColorUsage,
    pub overprint_flags: Vec<OverprintFlag>,
    pub fonts: Vec<FontUsage>,
    pub images: Vec<ImageUsage>,
    #[serde(default)]
    pub text: TextUsage,
    /// Some structure on the page could not be interpreted; data is partial.
    pub degraded: bool,
    /// The page's own geometry was unreadable and [`FALLBACK_MEDIA_BOX`] was
    /// substituted. Such pages are left out of numeric comparisons.
    pub geometry_unavailable: bool,
    pub caveats: Vec<String>,
}

impl PageRecord {
    fn blank(page_number: u32, policy: MissingBleedPolicy) -> Self {
        PageRecord {
            page_number,
            geometry: PageGeometry::from_boxes(FALLBACK_MEDIA_BOX, None, None, None, 0, policy),
            color: ColorUsage::default(),
            overprint_flags: Vec::new(),
            fonts: Vec::new(),
            images: Vec::new(),
            text: TextUsage::default(),
            degraded: false,
            geometry_unavailable: false,
            caveats: Vec::new(),
        }
    }

    /// Placeholder for a page the analyzer produced no record for.
    pub fn missing(page_number: u32, policy: MissingBleedPolicy) -> Self {
        let mut record = Self::blank(page_number, policy);
        record.geometry_unavailable = true;
        record.caveat("page record missing");
        record
    }

    fn caveat(&mut self, message: impl Into<String>) {
        let message = message.into();
        debug!(page = self.page_number, %message, "structural caveat");
        self.degraded = true;
        self.caveats.push(message);
    }
}

/// A spot colorant and the pages it appears on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotColor {
    pub name: String,
    pub is_pantone: bool,
    pub pages: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralReport {
    pub pages: Vec<PageRecord>,
    /// Document-wide spot colors, deduplicated case-sensitively.
    pub spot_colors: Vec<SpotColor>,
}

impl StructuralReport {
    pub fn page(&self, page_number: u32) -> Option<&PageRecord> {
        self.pages.iter().find(|p| p.page_number == page_number)
    }
}

/// Analyze every page of an opened document.
///
/// Never fails once the document is open: anything that cannot be read is
/// recorded as a caveat on the page it belongs to.
pub fn analyze_structure(reader: &PdfReader, config: &AnalysisConfig) -> StructuralReport {
    let page_count = reader.page_count();
    let pages: Vec<PageRecord> = (1..=page_count)
        .map(|page_num| analyze_page(reader, page_num, config))
        .collect();

    let degraded = pages.iter().filter(|p| p.degraded).count();
    if degraded > 0 {
        warn!(degraded, pages = page_count, "pages analyzed with caveats");
    }

    let spot_colors = collect_spot_colors(&pages);
    StructuralReport { pages, spot_colors }
}

fn collect_spot_colors(pages: &[PageRecord]) -> Vec<SpotColor> {
    let mut spots: Vec<SpotColor> = Vec::new();
    for page in pages {
        for name in &page.color.spot_colors {
            match spots.iter_mut().find(|s| s.name == *name) {
                Some(spot) => {
                    if !spot.pages.contains(&page.page_number) {
                        spot.pages.push(page.page_number);
                    }
                }
                None => spots.push(SpotColor {
                    name: name.clone(),
                    is_pantone: name.to_uppercase().contains("PANTONE"),
                    pages: vec![page.page_number],
                }),
            }
        }
    }
    spots
}

fn analyze_page(reader: &PdfReader, page_num: u32, config: &AnalysisConfig) -> PageRecord {
    let mut record = PageRecord::blank(page_num, config.missing_bleed_policy());

    let page_dict = match reader.page_dictionary(page_num) {
        Ok(dict) => dict,
        Err(e) => {
            record.geometry_unavailable = true;
            record.caveat(e.to_string());
            return record;
        }
    };

    read_geometry(reader, page_dict, &mut record, config);

    let resource_dicts = match reader.page_resource_dicts(page_num) {
        Ok(dicts) => dicts,
        Err(e) => {
            record.caveat(e.to_string());
            Vec::new()
        }
    };
    let resources = Resources::new(reader.document(), resource_dicts);

    if page_group_is_transparent(reader.document(), page_dict) {
        record.color.has_transparency = true;
    }
    scan_resources(&resources, &mut record);

    match reader.page_content_stream(page_num) {
        Ok(content) => {
            let mut visitor = StructureVisitor {
                doc: reader.document(),
                record: &mut record,
            };
            if let Err(e) = interpret(&resources, &content, Matrix::identity(), &mut visitor) {
                record.caveat(e.to_string());
            }
        }
        Err(e) => record.caveat(e.to_string()),
    }

    record
}

fn read_geometry(
    reader: &PdfReader,
    page_dict: &Dictionary,
    record: &mut PageRecord,
    config: &AnalysisConfig,
) {
    let doc = reader.document();
    let inherited_rect = |key: &[u8]| {
        reader
            .inherited_attribute(page_dict, key)
            .and_then(|o| Rect::from_object(doc, o))
    };
    let own_rect = |key: &[u8]| {
        page_dict
            .get(key)
            .ok()
            .and_then(|o| Rect::from_object(doc, o))
    };

    let media_box = match inherited_rect(b"MediaBox") {
        Some(rect) => rect,
        None => {
            record.geometry_unavailable = true;
            record.caveat("MediaBox missing or unreadable; using US Letter");
            FALLBACK_MEDIA_BOX
        }
    };
    let rotation = reader
        .inherited_attribute(page_dict, b"Rotate")
        .and_then(number)
        .map(|r| r as i64)
        .unwrap_or(0);

    record.geometry = PageGeometry::from_boxes(
        media_box,
        inherited_rect(b"CropBox"),
        own_rect(b"TrimBox"),
        own_rect(b"BleedBox"),
        rotation,
        config.missing_bleed_policy(),
    );
}

fn page_group_is_transparent(doc: &Document, page_dict: &Dictionary) -> bool {
    page_dict
        .get(b"Group")
        .ok()
        .and_then(|o| resolve(doc, o))
        .and_then(|o| o.as_dict().ok())
        .is_some_and(is_transparency_group)
}

fn is_transparency_group(group: &Dictionary) -> bool {
    matches!(group.get(b"S").ok().and_then(name_str).as_deref(), Some("Transparency"))
}

/// ExtGState entries that switch on transparency.
fn ext_gstate_is_transparent(dict: &Dictionary) -> bool {
    let soft_mask = match dict.get(b"SMask") {
        Ok(Object::Name(n)) => n.as_slice() != b"None",
        Ok(_) => true,
        Err(_) => false,
    };
    let alpha_below_one = [b"CA".as_slice(), b"ca"]
        .iter()
        .filter_map(|key| dict.get(key).ok().and_then(number))
        .any(|alpha| alpha < 1.0);
    let blend_mode = match dict.get(b"BM") {
        Ok(Object::Name(n)) => !matches!(n.as_slice(), b"Normal" | b"Compatible"),
        Ok(Object::Array(modes)) => modes
            .iter()
            .filter_map(name_str)
            .any(|m| m != "Normal" && m != "Compatible"),
        _ => false,
    };
    soft_mask || alpha_below_one || blend_mode
}

fn xobject_is_transparent(stream: &Stream, doc: &Document) -> bool {
    let dict = &stream.dict;
    let soft_mask = match dict.get(b"SMask") {
        Ok(Object::Name(n)) => n.as_slice() != b"None",
        Ok(_) => true,
        Err(_) => false,
    };
    soft_mask
        || dict
            .get(b"Group")
            .ok()
            .and_then(|o| resolve(doc, o))
            .and_then(|o| o.as_dict().ok())
            .is_some_and(is_transparency_group)
}

/// Resource-level scan: declared color spaces, ExtGStates, XObjects, fonts.
fn scan_resources(resources: &Resources<'_>, record: &mut PageRecord) {
    let doc = resources.document();

    for (name, obj) in resources.entries(b"ColorSpace") {
        match ColorSpace::parse(doc, obj) {
            Ok(space) => record.color.add_space(&space),
            Err(e) => record.caveat(format!("color space /{name}: {e}")),
        }
    }

    for (_, obj) in resources.entries(b"ExtGState") {
        if let Ok(dict) = obj.as_dict()
            && ext_gstate_is_transparent(dict)
        {
            record.color.has_transparency = true;
        }
    }

    for (_, obj) in resources.entries(b"XObject") {
        if let Ok(stream) = obj.as_stream()
            && xobject_is_transparent(stream, doc)
        {
            record.color.has_transparency = true;
        }
    }

    add_fonts(resources, record);
}

fn add_fonts(resources: &Resources<'_>, record: &mut PageRecord) {
    let (fonts, broken) = inspect_fonts(resources);
    for font in fonts {
        let seen = record
            .fonts
            .iter()
            .any(|f| f.resource_name == font.resource_name && f.base_font == font.base_font);
        if !seen {
            record.fonts.push(font);
        }
    }
    for name in broken {
        record.caveat(format!("font /{name} is not a dictionary"));
    }
}

/// Collects overprint flags, image placements, inline color usage and
/// transparency from the content stream.
struct StructureVisitor<'a, 'r> {
    doc: &'a Document,
    record: &'r mut PageRecord,
}

impl StructureVisitor<'_, '_> {
    fn flag(&mut self, color: &PaintColor, target: PaintTarget, state: &GraphicsState, at: &ObjectRef) {
        self.record.overprint_flags.push(OverprintFlag {
            color: color.cmyk(),
            color_space: color.space.as_ref().map(ColorSpace::family),
            target,
            object_kind: OverprintObjectKind::Vector,
            overprint_mode: state.overprint_mode,
            object: at.clone(),
        });
    }
}

impl ContentVisitor for StructureVisitor<'_, '_> {
    fn fill_path(
        &mut self,
        state: &GraphicsState,
        _path: &[Subpath],
        _even_odd: bool,
        at: &ObjectRef,
    ) -> crate::error::Result<()> {
        if state.fill_overprint {
            self.flag(&state.fill, PaintTarget::Fill, state, at);
        }
        Ok(())
    }

    fn stroke_path(
        &mut self,
        state: &GraphicsState,
        _path: &[Subpath],
        at: &ObjectRef,
    ) -> crate::error::Result<()> {
        if state.stroke_overprint {
            self.flag(&state.stroke, PaintTarget::Stroke, state, at);
        }
        Ok(())
    }

    fn show_text(&mut self, state: &GraphicsState, at: &ObjectRef) -> crate::error::Result<()> {
        self.record.text.add(state.effective_font_size());
        let mode = state.text_render_mode;
        let fills = matches!(mode, 0 | 2 | 4 | 6);
        let strokes = matches!(mode, 1 | 2 | 5 | 6);
        if fills && state.fill_overprint {
            self.flag(&state.fill, PaintTarget::Fill, state, at);
        }
        if strokes && state.stroke_overprint {
            self.flag(&state.stroke, PaintTarget::Stroke, state, at);
        }
        Ok(())
    }

    fn paint_shading(&mut self, state: &GraphicsState, at: &ObjectRef) -> crate::error::Result<()> {
        if state.fill_overprint {
            self.record.overprint_flags.push(OverprintFlag {
                color: None,
                color_space: None,
                target: PaintTarget::Fill,
                object_kind: OverprintObjectKind::Vector,
                overprint_mode: state.overprint_mode,
                object: at.clone(),
            });
        }
        Ok(())
    }

    fn paint_image(
        &mut self,
        state: &GraphicsState,
        name: &str,
        image: &Stream,
        at: &ObjectRef,
    ) -> crate::error::Result<()> {
        let meta = match read_image_meta(self.doc, image) {
            Ok(meta) => meta,
            Err(e) => {
                self.record.caveat(format!("image /{name}: {e}"));
                return Ok(());
            }
        };

        if let Some(space) = &meta.color_space {
            self.record.color.add_space(space);
        } else if !meta.image_mask {
            self.record
                .caveat(format!("image /{name}: color space not interpretable"));
        }
        if meta.has_soft_mask {
            self.record.color.has_transparency = true;
        }

        if state.fill_overprint {
            // ステンシルマスクは現在の塗り色で描かれる
            let (color, family, kind) = if meta.image_mask {
                (
                    state.fill.cmyk(),
                    state.fill.space.as_ref().map(ColorSpace::family),
                    OverprintObjectKind::Vector,
                )
            } else {
                (
                    None,
                    meta.color_space.as_ref().map(ColorSpace::family),
                    OverprintObjectKind::Image,
                )
            };
            self.record.overprint_flags.push(OverprintFlag {
                color,
                color_space: family,
                target: PaintTarget::Fill,
                object_kind: kind,
                overprint_mode: state.overprint_mode,
                object: at.clone(),
            });
        }

        let ctm = state.ctm;
        let ppi = effective_ppi(&meta, &ctm).map(|(x, y)| x.min(y));
        self.record.images.push(ImageUsage {
            name: name.to_string(),
            pixel_width: meta.width,
            pixel_height: meta.height,
            placed_width_pt: (ctm.a * ctm.a + ctm.b * ctm.b).sqrt(),
            placed_height_pt: (ctm.c * ctm.c + ctm.d * ctm.d).sqrt(),
            effective_ppi: ppi,
            color_space: meta.color_space.as_ref().map(ColorSpace::family),
            filter: meta.filter.clone(),
            encoded_bytes: image.content.len() as u64,
            object: at.clone(),
        });
        Ok(())
    }

    fn color_space_used(&mut self, space: &ColorSpace) {
        self.record.color.add_space(space);
    }

    fn ext_gstate(&mut self, _name: &str, dict: &Dictionary) {
        if ext_gstate_is_transparent(dict) {
            self.record.color.has_transparency = true;
        }
    }

    fn form_entered(&mut self, name: &str, form: &Dictionary) {
        let transparent_group = form
            .get(b"Group")
            .ok()
            .and_then(|o| resolve(self.doc, o))
            .and_then(|o| o.as_dict().ok())
            .is_some_and(is_transparency_group);
        if transparent_group {
            self.record.color.has_transparency = true;
        }

        if let Some(form_resources) = form
            .get(b"Resources")
            .ok()
            .and_then(|o| resolve(self.doc, o))
            .and_then(|o| o.as_dict().ok())
        {
            debug!(page = self.record.page_number, form = name, "scanning form resources");
            let resources = Resources::new(self.doc, vec![form_resources]);
            scan_resources(&resources, self.record);
        }
    }

    fn unsupported(&mut self, message: String) {
        self.record.caveat(message);
    }
}
