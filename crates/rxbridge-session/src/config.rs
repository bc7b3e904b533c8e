//! ブリッジの設定

use serde::{Deserialize, Serialize};

use rxbridge_transport::{TransportKind, RECONNECT_BACKOFF_MS};

use crate::error::ConfigError;
use crate::{PROBE_INTERVAL_MS, SOCKET_HANDSHAKE_TIMEOUT_MS, WORKER_HANDSHAKE_TIMEOUT_MS};

/// 呼び出し側ブリッジの設定
///
/// ハンドシェイクのタイムアウトはトランスポートごとに違うので、
/// 通常は `for_transport` のプリセットから始める。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeConfig {
    /// プローブ送信間隔（ミリ秒）
    pub probe_interval_ms: u64,
    /// ハンドシェイクが成立しなければ失敗とするまでの時間（ミリ秒）
    pub handshake_timeout_ms: u64,
    /// 切断後の再接続待ち（ミリ秒）。再接続はトランスポート側が行う
    pub reconnect_backoff_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::for_transport(TransportKind::Socket)
    }
}

/// JSON で部分的に上書きするための形
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Overrides {
    probe_interval_ms: Option<u64>,
    handshake_timeout_ms: Option<u64>,
    reconnect_backoff_ms: Option<u64>,
}

impl BridgeConfig {
    /// トランスポート種別ごとのプリセット
    pub fn for_transport(kind: TransportKind) -> Self {
        let handshake_timeout_ms = match kind {
            TransportKind::Socket => SOCKET_HANDSHAKE_TIMEOUT_MS,
            TransportKind::Worker => WORKER_HANDSHAKE_TIMEOUT_MS,
        };
        BridgeConfig {
            probe_interval_ms: PROBE_INTERVAL_MS,
            handshake_timeout_ms,
            reconnect_backoff_ms: RECONNECT_BACKOFF_MS,
        }
    }

    /// プリセットに JSON の値を上書きする
    ///
    /// 指定のないフィールドはプリセットのまま。
    pub fn from_json(kind: TransportKind, text: &str) -> Result<Self, ConfigError> {
        let overrides: Overrides =
            serde_json::from_str(text).map_err(|e| ConfigError::Invalid(alloc::format!("{}", e)))?;
        let mut config = Self::for_transport(kind);
        if let Some(v) = overrides.probe_interval_ms {
            config.probe_interval_ms = v;
        }
        if let Some(v) = overrides.handshake_timeout_ms {
            config.handshake_timeout_ms = v;
        }
        if let Some(v) = overrides.reconnect_backoff_ms {
            config.reconnect_backoff_ms = v;
        }
        if config.probe_interval_ms == 0 {
            return Err(ConfigError::Invalid(alloc::string::String::from(
                "probeIntervalMs must be greater than zero",
            )));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_differ_by_transport() {
        let socket = BridgeConfig::for_transport(TransportKind::Socket);
        let worker = BridgeConfig::for_transport(TransportKind::Worker);
        assert_eq!(socket.handshake_timeout_ms, 5000);
        assert_eq!(worker.handshake_timeout_ms, 50);
        assert_eq!(socket.probe_interval_ms, 100);
        assert_eq!(worker.reconnect_backoff_ms, 500);
    }

    #[test]
    fn test_partial_override_keeps_preset() {
        let config = BridgeConfig::from_json(TransportKind::Worker, r#"{"handshakeTimeoutMs": 200}"#).unwrap();
        assert_eq!(config.handshake_timeout_ms, 200);
        assert_eq!(config.probe_interval_ms, PROBE_INTERVAL_MS);
    }

    #[test]
    fn test_invalid_json_rejected() {
        assert!(BridgeConfig::from_json(TransportKind::Socket, "{").is_err());
        assert!(BridgeConfig::from_json(TransportKind::Socket, r#"{"probeIntervalMs": 0}"#).is_err());
    }
}
