use std::path::Path;

use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::debug;

/// ページツリーの継承をたどる最大深さ。循環参照対策。
const MAX_TREE_DEPTH: usize = 64;

pub struct PdfReader {
    doc: Document,
}

impl PdfReader {
    /// PDFファイルを開いてPdfReaderを作成する。
    pub fn open(path: impl AsRef<Path>) -> crate::error::Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        Self::from_bytes(&bytes)
    }

    /// メモリ上のPDFバイト列からPdfReaderを作成する。
    ///
    /// 解析不能・暗号化・0ページの文書は `MalformedDocumentError` とする。
    pub fn from_bytes(bytes: &[u8]) -> crate::error::Result<Self> {
        let doc = Document::load_mem(bytes).map_err(|e| {
            crate::error::PreflightError::malformed(format!("cannot parse PDF: {e}"))
        })?;

        if doc.is_encrypted() {
            return Err(crate::error::PreflightError::malformed(
                "document is encrypted and no credentials were supplied",
            ));
        }

        let page_count = doc.get_pages().len();
        if page_count == 0 {
            return Err(crate::error::PreflightError::malformed(
                "document has no pages",
            ));
        }

        debug!(pages = page_count, version = %doc.version, "PDF loaded");
        Ok(Self { doc })
    }

    /// 内部のlopdf Documentへの参照を返す。
    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// ページ数を返す。
    pub fn page_count(&self) -> u32 {
        self.doc.get_pages().len() as u32
    }

    /// PDFバージョン文字列（例: "1.7"）。
    pub fn version(&self) -> &str {
        &self.doc.version
    }

    /// ページ番号(1-indexed)からObjectIdを取得する。
    pub fn page_id(&self, page_num: u32) -> crate::error::Result<ObjectId> {
        let pages = self.doc.get_pages();
        pages.get(&page_num).copied().ok_or_else(|| {
            crate::error::PreflightError::unsupported(format!("page {} not found", page_num))
        })
    }

    /// 指定ページ(1-indexed)のページ辞書を返す。
    pub fn page_dictionary(&self, page_num: u32) -> crate::error::Result<&Dictionary> {
        let page_id = self.page_id(page_num)?;
        self.doc.get_dictionary(page_id).map_err(|e| {
            crate::error::PreflightError::unsupported(format!(
                "page {page_num} dictionary unreadable: {e}"
            ))
        })
    }

    /// ページ辞書から継承可能な属性（MediaBox, CropBox, Rotate, Resources）を取得する。
    ///
    /// 見つからなければParentをたどって継承を確認する。
    pub fn inherited_attribute<'a>(
        &'a self,
        dict: &'a Dictionary,
        key: &[u8],
    ) -> Option<&'a Object> {
        let mut current = dict;
        for _ in 0..MAX_TREE_DEPTH {
            if let Ok(obj) = current.get(key) {
                return super::resolve(&self.doc, obj);
            }
            match current.get(b"Parent") {
                Ok(Object::Reference(parent_id)) => {
                    current = self.doc.get_dictionary(*parent_id).ok()?;
                }
                _ => return None,
            }
        }
        None
    }

    /// 指定ページ(1-indexed)のコンテンツストリームをバイト列として返す。
    /// 複数のContentストリームがある場合は結合して返す。
    pub fn page_content_stream(&self, page_num: u32) -> crate::error::Result<Vec<u8>> {
        let page_id = self.page_id(page_num)?;
        self.doc.get_page_content(page_id).map_err(|e| {
            crate::error::PreflightError::unsupported(format!(
                "page {page_num} content stream unreadable: {e}"
            ))
        })
    }

    /// 指定ページ(1-indexed)のリソース辞書群を返す。
    ///
    /// ページ辞書に直接埋め込まれたResourcesが先頭、
    /// 参照されているResources（親ページツリーから継承されたものも含む）が後に続く。
    pub fn page_resource_dicts(&self, page_num: u32) -> crate::error::Result<Vec<&Dictionary>> {
        let page_id = self.page_id(page_num)?;
        let (resource_dict, resource_ids) = self.doc.get_page_resources(page_id).map_err(|e| {
            crate::error::PreflightError::unsupported(format!(
                "page {page_num} resources unreadable: {e}"
            ))
        })?;

        let mut dicts = Vec::new();
        if let Some(dict) = resource_dict {
            dicts.push(dict);
        }
        for res_id in resource_ids {
            if let Ok(dict) = self.doc.get_dictionary(res_id) {
                dicts.push(dict);
            }
        }
        Ok(dicts)
    }
}
