//! rxbridge-session エラー型

use alloc::string::String;

use rxbridge_proto::ErrorPayload;

/// ハンドシェイクの失敗（ブリッジ全体の readiness を失敗させる唯一の種類）
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    /// 宣言したメソッドが相手の capability にない
    #[error("Method {method} is not supported by service: {service}")]
    UnsupportedMethod { method: String, service: String },
    /// 宣言したプロパティが相手の capability にない
    #[error("Property {property} is not supported by service: {service}")]
    UnsupportedProperty { property: String, service: String },
    /// タイムアウトまでに有効な応答がなかった
    #[error("service {service} is not connected")]
    NotConnected { service: String },
}

/// 呼び出し単位のエラー
///
/// 呼び出し元に直接返すことはなく、`ErrorPayload` に変換して
/// ローカルストリームのエラーとして届ける。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    /// ストリーム中に接続が切れた（自動では再開しない）
    #[error("service {service} disconnected while {target} was in flight")]
    Disconnected { service: String, target: String },
    /// ブリッジ対象として宣言されていない名前
    #[error("{target} is not declared as a bridged member of service {service}")]
    UndeclaredCapability { service: String, target: String },
}

impl BridgeError {
    /// エラー payload 上の `name`
    pub fn name(&self) -> &'static str {
        match self {
            BridgeError::Handshake(HandshakeError::NotConnected { .. }) => "ConnectionError",
            BridgeError::Handshake(_) => "CapabilityError",
            BridgeError::Disconnected { .. } => "DisconnectedError",
            BridgeError::UndeclaredCapability { .. } => "UndeclaredCapabilityError",
        }
    }

    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload::from_display(self.name(), self)
    }
}

/// 公開側のプロセスレベル診断
///
/// 特定のストリームには届かない（`AccessDenied` だけは要求元にも E パケットで返す）。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("{kind} {name} does not exist on service {service}")]
    DoesNotExist {
        service: String,
        kind: &'static str,
        name: String,
    },
    #[error("access to {target} on service {service} was denied")]
    AccessDenied { service: String, target: String },
    #[error("service {service} is already registered on this host")]
    DuplicateService { service: String },
}

impl HostError {
    pub fn to_payload(&self) -> ErrorPayload {
        let name = match self {
            HostError::DoesNotExist { .. } => "DoesNotExistError",
            HostError::AccessDenied { .. } => "AccessDeniedError",
            HostError::DuplicateService { .. } => "DuplicateServiceError",
        };
        ErrorPayload::from_display(name, self)
    }
}

/// 設定のエラー
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid bridge config: {0}")]
    Invalid(String),
}
