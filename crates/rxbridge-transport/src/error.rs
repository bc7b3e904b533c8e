//! rxbridge-transport エラー型

use rxbridge_proto::ProtoError;

/// トランスポート層のエラー
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// 接続が開いていない
    #[error("transport is not connected")]
    NotConnected,
    /// メッセージのエンコードに失敗
    #[error("failed to encode outbound message: {0}")]
    EncodeFailed(#[from] ProtoError),
}
