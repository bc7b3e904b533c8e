//! rxbridge-proto エラー型

use alloc::string::String;

/// JSON エンコード/デコードのエラー
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtoError {
    /// JSON デコード失敗（壊れたフレーム、必須フィールド欠落）
    #[error("wire message decode failed: {0}")]
    DecodeFailed(String),
    /// JSON エンコード失敗（通常は起こらない）
    #[error("wire message encode failed: {0}")]
    EncodeFailed(String),
    /// `data` フィールドが期待した形をしていない
    #[error("malformed {field} payload: {reason}")]
    MalformedPayload {
        /// 解釈しようとしたペイロードの種類
        field: &'static str,
        /// serde_json のエラーメッセージ
        reason: String,
    },
}
