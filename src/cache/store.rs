// ファイルシステムキャッシュ: hash → 解析結果JSON
//
// Stores and retrieves serialized analysis results on disk, keyed by
// SHA-256 hash: `<cache_dir>/<hex_hash>.json`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::PreflightError;

/// ファイルシステムベースのキャッシュストア。
pub struct CacheStore {
    cache_dir: PathBuf,
}

/// キャッシュファイルの外枠。キー不一致の検出に使う。
#[derive(Serialize, serde::Deserialize)]
struct CacheEntry<T> {
    cache_key: String,
    value: T,
}

/// キャッシュキーが有効な SHA-256 hex 文字列であることを検証する。
///
/// 有効なキーは正確に64文字の小文字16進数([0-9a-f])である必要がある。
/// パストラバーサルや不正なファイルアクセスを防止する。
fn validate_cache_key(key: &str) -> crate::error::Result<()> {
    if key.len() == 64 && key.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        Ok(())
    } else {
        Err(PreflightError::cache(format!(
            "invalid cache key: expected 64-character lowercase hex string, got '{key}'"
        )))
    }
}

impl CacheStore {
    pub fn new(cache_dir: impl AsRef<Path>) -> Self {
        Self {
            cache_dir: cache_dir.as_ref().to_path_buf(),
        }
    }

    fn entry_path(&self, key: &str) -> crate::error::Result<PathBuf> {
        validate_cache_key(key)?;
        Ok(self.cache_dir.join(format!("{key}.json")))
    }

    /// 値をキャッシュに保存する。
    ///
    /// 書き込みはアトミック: 一時ファイルに書き込み、renameで最終パスに移動する。
    pub fn store<T: Serialize>(&self, key: &str, value: &T) -> crate::error::Result<()> {
        let path = self.entry_path(key)?;
        fs::create_dir_all(&self.cache_dir).map_err(|e| PreflightError::cache(e.to_string()))?;

        let entry = CacheEntry {
            cache_key: key.to_string(),
            value,
        };
        let json = serde_json::to_vec(&entry)
            .map_err(|e| PreflightError::cache(format!("cannot serialize entry: {e}")))?;

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json).map_err(|e| PreflightError::cache(e.to_string()))?;
        fs::rename(&tmp_path, &path).map_err(|e| PreflightError::cache(e.to_string()))?;
        debug!(key, "cache entry stored");
        Ok(())
    }

    /// キャッシュから値を取得する。キャッシュミスの場合は None を返す。
    pub fn retrieve<T: DeserializeOwned>(&self, key: &str) -> crate::error::Result<Option<T>> {
        let path = self.entry_path(key)?;
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path).map_err(|e| PreflightError::cache(e.to_string()))?;
        let entry: CacheEntry<T> = serde_json::from_slice(&bytes)
            .map_err(|e| PreflightError::cache(format!("corrupt cache entry {key}: {e}")))?;

        if entry.cache_key != key {
            return Err(PreflightError::cache(format!(
                "cache key mismatch: expected '{key}', found '{}'",
                entry.cache_key
            )));
        }
        debug!(key, "cache hit");
        Ok(Some(entry.value))
    }

    /// キャッシュキーが存在するか確認する。
    pub fn contains(&self, key: &str) -> bool {
        self.entry_path(key).map(|p| p.exists()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_cache_key_rejects_uppercase_hex() {
        let uppercase_key = "a".repeat(58) + "ABCDEF";
        assert_eq!(uppercase_key.len(), 64);
        assert!(validate_cache_key(&uppercase_key).is_err());
    }

    #[test]
    fn test_validate_cache_key_accepts_lowercase_hex() {
        assert!(validate_cache_key(&"a".repeat(64)).is_ok());
    }

    #[test]
    fn test_validate_cache_key_rejects_path_traversal() {
        assert!(validate_cache_key("../etc/passwd").is_err());
    }
}
