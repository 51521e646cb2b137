use lopdf::{Dictionary, Document, Object};

use super::resolve;

/// ページまたはフォームXObjectのリソース辞書群。
///
/// 先に登録された辞書が優先される（ページ直下 > 継承）。
#[derive(Clone)]
pub struct Resources<'a> {
    doc: &'a Document,
    dicts: Vec<&'a Dictionary>,
}

impl<'a> Resources<'a> {
    pub fn new(doc: &'a Document, dicts: Vec<&'a Dictionary>) -> Self {
        Self { doc, dicts }
    }

    /// フォームXObjectのリソース。Resourcesを持たないフォームは親のリソースを使う。
    pub fn for_form(&self, form_dict: &'a Dictionary) -> Resources<'a> {
        match form_dict
            .get(b"Resources")
            .ok()
            .and_then(|o| resolve(self.doc, o))
            .and_then(|o| o.as_dict().ok())
        {
            Some(dict) => Resources::new(self.doc, vec![dict]),
            None => self.clone(),
        }
    }

    pub fn document(&self) -> &'a Document {
        self.doc
    }

    /// カテゴリ（ColorSpace, ExtGState, XObject, Font, ...）の辞書群。
    fn category_dicts(&self, category: &[u8]) -> Vec<&'a Dictionary> {
        self.dicts
            .iter()
            .filter_map(|d| d.get(category).ok())
            .filter_map(|o| resolve(self.doc, o))
            .filter_map(|o| o.as_dict().ok())
            .collect()
    }

    /// 名前付きリソースを参照解決して返す。
    pub fn get(&self, category: &[u8], name: &[u8]) -> Option<&'a Object> {
        self.category_dicts(category)
            .into_iter()
            .find_map(|d| d.get(name).ok())
            .and_then(|o| resolve(self.doc, o))
    }

    /// カテゴリ内の全エントリ（名前の重複は先勝ち）。参照は解決済み。
    pub fn entries(&self, category: &[u8]) -> Vec<(String, &'a Object)> {
        let mut out: Vec<(String, &'a Object)> = Vec::new();
        for dict in self.category_dicts(category) {
            for (name, value) in dict.iter() {
                let name = String::from_utf8_lossy(name).into_owned();
                if out.iter().any(|(n, _)| *n == name) {
                    continue;
                }
                if let Some(obj) = resolve(self.doc, value) {
                    out.push((name, obj));
                }
            }
        }
        out
    }
}
