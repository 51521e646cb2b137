// SHA-256: 文書識別子と解析結果キャッシュのキー
//
// The cache key covers the document bytes, the profile name and the
// effective configuration snapshot, so any setting change is a miss.

use sha2::{Digest, Sha256};

use crate::config::merged::AnalysisConfig;

/// 文書バイト列のSHA-256（小文字16進）。
pub fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// 設定を正規化JSON形式に変換する（キーはアルファベット順で固定）。
///
/// 構造体を `serde_json::Value` 経由で変換し、オブジェクトのキーを
/// 再帰的にソートしてから文字列化する。
fn config_to_canonical_json(config: &AnalysisConfig) -> crate::error::Result<String> {
    let value = serde_json::to_value(config)?;
    Ok(serde_json::to_string(&sort_keys(value))?)
}

fn sort_keys(value: serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k, sort_keys(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// 文書・プロファイル・設定から解析結果のキャッシュキーを計算する。
///
/// ハッシュ入力: `document_bytes || 0x00 || profile || 0x00 || config_canonical_json`
pub fn compute_cache_key(
    document: &[u8],
    profile: &str,
    config: &AnalysisConfig,
) -> crate::error::Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(document);
    hasher.update([0u8]);
    hasher.update(profile.as_bytes());
    hasher.update([0u8]);
    hasher.update(config_to_canonical_json(config)?.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_json_is_sorted_by_key() {
        let json = config_to_canonical_json(&AnalysisConfig::default()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted, "JSON keys must be in alphabetical order");

        let checks = value["checks"].as_object().unwrap();
        let keys: Vec<&String> = checks.keys().collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_fingerprint_of_empty_input() {
        assert_eq!(
            fingerprint(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
