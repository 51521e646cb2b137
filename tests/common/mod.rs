//! テスト用PDFをlopdfでその場で組み立てるヘルパー。
#![allow(dead_code)]

use lopdf::{Dictionary, Document, Object, Stream, dictionary};

/// A4（pt）
pub const A4: [f64; 4] = [0.0, 0.0, 595.276, 841.89];

/// 1mm（pt）
pub const MM: f64 = 72.0 / 25.4;

pub fn rect(r: [f64; 4]) -> Object {
    Object::Array(r.iter().map(|v| Object::Real(*v as f32)).collect())
}

/// `inner` を各辺 `mm` だけ広げた矩形。
pub fn grow(inner: [f64; 4], mm: f64) -> [f64; 4] {
    let d = mm * MM;
    [inner[0] - d, inner[1] - d, inner[2] + d, inner[3] + d]
}

/// 1ページ分の定義。
pub struct TestPage {
    pub media_box: [f64; 4],
    pub trim_box: Option<[f64; 4]>,
    pub bleed_box: Option<[f64; 4]>,
    pub content: Vec<u8>,
    pub resources: Dictionary,
}

impl TestPage {
    pub fn new(content: &str) -> Self {
        TestPage {
            media_box: A4,
            trim_box: None,
            bleed_box: None,
            content: content.as_bytes().to_vec(),
            resources: Dictionary::new(),
        }
    }

    /// トリムをA4、メディア/ブリードを `bleed_mm` だけ外側に取る。
    pub fn with_bleed(mut self, bleed_mm: f64) -> Self {
        self.trim_box = Some(A4);
        self.bleed_box = Some(grow(A4, bleed_mm));
        self.media_box = grow(A4, bleed_mm.max(5.0));
        self
    }

    /// 任意サイズの仕上がりに `bleed_mm` のブリードを付ける。
    pub fn with_bleed_box(mut self, trim: [f64; 4], bleed_mm: f64) -> Self {
        self.trim_box = Some(trim);
        self.bleed_box = Some(grow(trim, bleed_mm));
        self.media_box = grow(trim, bleed_mm.max(5.0));
        self
    }

    pub fn with_trim(mut self, trim: [f64; 4]) -> Self {
        self.trim_box = Some(trim);
        self
    }

    pub fn with_media(mut self, media: [f64; 4]) -> Self {
        self.media_box = media;
        self
    }

    pub fn with_resources(mut self, resources: Dictionary) -> Self {
        self.resources = resources;
        self
    }
}

/// ページ列からPDFバイト列を作る。
pub fn build_pdf(pages: Vec<TestPage>) -> Vec<u8> {
    let mut doc = Document::with_version("1.6");
    let pages_id = doc.new_object_id();

    let mut kids = Vec::new();
    for mut page in pages {
        hoist_streams(&mut doc, &mut page.resources);
        let content_id = doc.add_object(Stream::new(dictionary! {}, page.content));
        let mut dict = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => rect(page.media_box),
            "Contents" => content_id,
            "Resources" => Object::Dictionary(page.resources),
        };
        if let Some(trim) = page.trim_box {
            dict.set("TrimBox", rect(trim));
        }
        if let Some(bleed) = page.bleed_box {
            dict.set("BleedBox", rect(bleed));
        }
        kids.push(Object::Reference(doc.add_object(dict)));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("save test PDF");
    bytes
}

/// 辞書内に直接置かれたストリームを間接オブジェクトに置き換える。
fn hoist_streams(doc: &mut Document, dict: &mut Dictionary) {
    let keys: Vec<Vec<u8>> = dict.iter().map(|(k, _)| k.clone()).collect();
    for key in keys {
        let Ok(value) = dict.get_mut(&key) else {
            continue;
        };
        match value {
            Object::Dictionary(inner) => hoist_streams(doc, inner),
            Object::Stream(stream) => {
                let mut stream = stream.clone();
                hoist_streams(doc, &mut stream.dict);
                let id = doc.add_object(Object::Stream(stream));
                dict.set(key, Object::Reference(id));
            }
            _ => {}
        }
    }
}

/// 全ページ共通のExtGState: `/GSop` でオーバープリントON、OPM 1。
pub fn overprint_resources() -> Dictionary {
    dictionary! {
        "ExtGState" => dictionary! {
            "GSop" => dictionary! {
                "Type" => "ExtGState",
                "OP" => true,
                "op" => true,
                "OPM" => 1,
            },
        },
    }
}

/// `/GSop` を適用してCMYK塗りの矩形を描くコンテンツ。
pub fn overprinted_rect(c: f64, m: f64, y: f64, k: f64) -> String {
    format!("q /GSop gs {c} {m} {y} {k} k 100 100 200 200 re f Q")
}

/// 既存PDFの指定ページ辞書を書き換える。
pub fn edit_page(bytes: &[u8], page_number: u32, edit: impl FnOnce(&mut Dictionary)) -> Vec<u8> {
    let mut doc = Document::load_mem(bytes).expect("reload test PDF");
    let page_id = *doc.get_pages().get(&page_number).expect("page exists");
    edit(doc.get_dictionary_mut(page_id).expect("page dictionary"));
    let mut out = Vec::new();
    doc.save_to(&mut out).expect("save edited PDF");
    out
}

/// 構造解析と品質検査を通した結果。
pub fn quality_for(
    bytes: &[u8],
    config: &pdf_preflight::config::merged::AnalysisConfig,
) -> pdf_preflight::quality::QualityResult {
    let reader = pdf_preflight::pdf::reader::PdfReader::from_bytes(bytes).expect("open test PDF");
    let structure = pdf_preflight::structure::analyze_structure(&reader, config);
    pdf_preflight::quality::check_all(&reader, bytes, structure, None, config)
}

/// インク量分析を有効にした既定設定。
pub fn config_with_ink(dpi: u32) -> pdf_preflight::config::merged::AnalysisConfig {
    let mut config = pdf_preflight::config::merged::AnalysisConfig::default();
    config.ink_analysis_enabled = true;
    config.ink.dpi = dpi;
    config
}

/// ページ全面をCMYKで塗るコンテンツ（A4）。
pub fn full_page_fill(c: f64, m: f64, y: f64, k: f64) -> String {
    format!("{c} {m} {y} {k} k 0 0 595.276 841.89 re f")
}
