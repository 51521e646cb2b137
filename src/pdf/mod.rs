pub mod color;
pub mod content_stream;
pub mod font;
pub mod geometry;
pub mod image_xobject;
pub mod reader;
pub mod resources;

use lopdf::{Document, Object};

/// 参照を辿って実体のオブジェクトを返す。壊れた参照は `None`。
pub fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    doc.dereference(obj).map(|(_, o)| o).ok()
}

/// 数値オブジェクト（Integer/Real）をf64として取得する。
pub fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(*r as f64),
        _ => None,
    }
}

/// 名前オブジェクトを文字列として取得する。
pub fn name_str(obj: &Object) -> Option<String> {
    match obj {
        Object::Name(n) => Some(String::from_utf8_lossy(n).into_owned()),
        _ => None,
    }
}
