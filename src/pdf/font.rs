// フォントリソースの埋め込み状況

use lopdf::{Dictionary, Document, Object};
use serde::{Deserialize, Serialize};

use super::resolve;
use super::resources::Resources;

/// 標準14フォント（埋め込み不要とみなす）
const STANDARD_14: &[&str] = &[
    "Courier",
    "Courier-Bold",
    "Courier-Oblique",
    "Courier-BoldOblique",
    "Helvetica",
    "Helvetica-Bold",
    "Helvetica-Oblique",
    "Helvetica-BoldOblique",
    "Times-Roman",
    "Times-Bold",
    "Times-Italic",
    "Times-BoldItalic",
    "Symbol",
    "ZapfDingbats",
];

/// ページで参照されているフォント1つ分の情報。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FontUsage {
    /// リソース名（例: "F1"）
    pub resource_name: String,
    pub base_font: String,
    pub subtype: String,
    pub embedded: bool,
    /// `ABCDEF+Name` 形式のサブセット名
    pub subset: bool,
    pub standard: bool,
}

impl FontUsage {
    /// 埋め込みが必要なのに埋め込まれていないフォントか。
    pub fn is_missing_embedding(&self) -> bool {
        !self.embedded && !self.standard
    }
}

/// リソースのFont辞書を列挙してFontUsageを作る。
///
/// 辞書として読めないエントリのリソース名は2番目の戻り値に入る。
pub fn inspect_fonts(resources: &Resources<'_>) -> (Vec<FontUsage>, Vec<String>) {
    let doc = resources.document();
    let mut fonts = Vec::new();
    let mut broken = Vec::new();

    for (name, obj) in resources.entries(b"Font") {
        match obj.as_dict() {
            Ok(dict) => fonts.push(inspect_font(doc, &name, dict)),
            Err(_) => broken.push(name),
        }
    }
    (fonts, broken)
}

fn inspect_font(doc: &Document, resource_name: &str, font_dict: &Dictionary) -> FontUsage {
    let name_of = |key: &[u8]| -> String {
        font_dict
            .get(key)
            .ok()
            .and_then(|o| o.as_name().ok())
            .map(|n| String::from_utf8_lossy(n).into_owned())
            .unwrap_or_default()
    };
    let subtype = name_of(b"Subtype");
    let base_font = name_of(b"BaseFont");

    let embedded = match subtype.as_str() {
        // Type3はグリフ手続きがPDF内にある
        "Type3" => true,
        "Type0" => descendant_font(doc, font_dict)
            .map(|d| has_font_file(doc, d))
            .unwrap_or(false),
        _ => has_font_file(doc, font_dict),
    };

    let (subset, bare_name) = split_subset_prefix(&base_font);
    let standard = subtype != "Type0" && STANDARD_14.contains(&bare_name);

    FontUsage {
        resource_name: resource_name.to_string(),
        base_font,
        subtype,
        embedded,
        subset,
        standard,
    }
}

/// Type0フォントの DescendantFonts[0]
fn descendant_font<'a>(doc: &'a Document, font_dict: &'a Dictionary) -> Option<&'a Dictionary> {
    let descendants = resolve(doc, font_dict.get(b"DescendantFonts").ok()?)?;
    let first = descendants.as_array().ok()?.first()?;
    resolve(doc, first)?.as_dict().ok()
}

/// FontDescriptorに FontFile / FontFile2 / FontFile3 があるか
fn has_font_file(doc: &Document, font_dict: &Dictionary) -> bool {
    let Some(descriptor) = font_dict
        .get(b"FontDescriptor")
        .ok()
        .and_then(|o| resolve(doc, o))
        .and_then(|o| o.as_dict().ok())
    else {
        return false;
    };
    [b"FontFile".as_slice(), b"FontFile2", b"FontFile3"]
        .iter()
        .any(|key| matches!(descriptor.get(key), Ok(obj) if !matches!(obj, Object::Null)))
}

/// `ABCDEF+Helvetica` → (true, "Helvetica")
fn split_subset_prefix(base_font: &str) -> (bool, &str) {
    match base_font.split_once('+') {
        Some((tag, rest)) if tag.len() == 6 && tag.bytes().all(|b| b.is_ascii_uppercase()) => {
            (true, rest)
        }
        _ => (false, base_font),
    }
}
