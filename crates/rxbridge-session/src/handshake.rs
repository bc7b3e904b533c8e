//! ハンドシェイク（呼び出し側）
//!
//! トランスポート接続済みかつ未確認の間、一定間隔でプローブを送り続ける。
//! 応答の capability に宣言済みの名前が全て含まれていれば確認済みとなり、
//! 足りなければその名前を挙げて失敗する。
//!
//! ```text
//! Idle ──接続──→ Probing ──有効な応答──→ Acknowledged
//!  ↑               │ │                       │
//!  └────切断───────┘ └─不一致/タイムアウト→ Failed（ラッチ）
//!  └────────────────切断─────────────────────┘
//! ```

use alloc::string::String;

use rxbridge_proto::{Capabilities, WireMessage};
use tracing::{debug, error, warn};

use crate::config::BridgeConfig;
use crate::error::HandshakeError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeState {
    /// トランスポート未接続
    Idle,
    /// プローブ送信中
    Probing {
        /// プローブ開始時刻（タイムアウトの起点）
        since_ms: u64,
        /// 最後にプローブを送った時刻
        last_probe_ms: Option<u64>,
    },
    /// 確認済み（切断まで再プローブしない）
    Acknowledged,
    /// 失敗。以後このブリッジでは何も送らない
    Failed(HandshakeError),
}

pub struct Handshake {
    service: String,
    /// 自分がブリッジ対象として宣言した名前
    declared: Capabilities,
    probe_interval_ms: u64,
    timeout_ms: u64,
    state: HandshakeState,
    /// 送ったプローブの総数（統計用）
    probes_sent: u64,
}

impl Handshake {
    pub fn new(service: &str, declared: Capabilities, config: &BridgeConfig) -> Self {
        Handshake {
            service: String::from(service),
            declared,
            probe_interval_ms: config.probe_interval_ms,
            timeout_ms: config.handshake_timeout_ms,
            state: HandshakeState::Idle,
            probes_sent: 0,
        }
    }

    /// トランスポート接続を通知する。Idle のときだけプローブを始める
    pub fn on_transport_up(&mut self, now_ms: u64) {
        if self.state == HandshakeState::Idle {
            debug!(service = %self.service, "transport up, start probing");
            self.state = HandshakeState::Probing {
                since_ms: now_ms,
                last_probe_ms: None,
            };
        }
    }

    /// トランスポート切断を通知する。失敗はラッチされるので戻らない
    pub fn on_transport_down(&mut self) {
        if !matches!(self.state, HandshakeState::Failed(_)) {
            self.state = HandshakeState::Idle;
        }
    }

    /// 時刻を進める
    ///
    /// # 戻り値
    /// 今送るべきプローブ。タイムアウトした場合は `Failed` に遷移して `None`
    pub fn poll(&mut self, now_ms: u64) -> Option<WireMessage> {
        let HandshakeState::Probing { since_ms, last_probe_ms } = self.state else {
            return None;
        };

        if now_ms.saturating_sub(since_ms) >= self.timeout_ms {
            let e = HandshakeError::NotConnected {
                service: self.service.clone(),
            };
            error!(error = %e, "handshake timed out");
            self.state = HandshakeState::Failed(e);
            return None;
        }

        let due = match last_probe_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.probe_interval_ms,
        };
        if !due {
            return None;
        }

        self.state = HandshakeState::Probing {
            since_ms,
            last_probe_ms: Some(now_ms),
        };
        self.probes_sent += 1;
        Some(WireMessage::probe(&self.service))
    }

    /// capability 応答を検証する
    ///
    /// プローブ中以外に届いた応答は無視する。壊れた応答も無視してプローブを続ける。
    pub fn on_reply(&mut self, reply: &WireMessage) {
        if !matches!(self.state, HandshakeState::Probing { .. }) {
            return;
        }
        let offered = match reply.capabilities() {
            Ok(caps) => caps,
            Err(e) => {
                warn!(service = %self.service, error = %e, "ignoring malformed handshake reply");
                return;
            }
        };

        match self.validate(&offered) {
            Ok(()) => {
                debug!(service = %self.service, "handshake acknowledged");
                self.state = HandshakeState::Acknowledged;
            }
            Err(e) => {
                error!(error = %e, "handshake capability mismatch");
                self.state = HandshakeState::Failed(e);
            }
        }
    }

    /// メソッド、プロパティの順に確認し、最初に見つからなかった名前で失敗する
    fn validate(&self, offered: &Capabilities) -> Result<(), HandshakeError> {
        if let Some(method) = self.declared.methods.iter().find(|m| !offered.has_method(m)) {
            return Err(HandshakeError::UnsupportedMethod {
                method: method.clone(),
                service: self.service.clone(),
            });
        }
        if let Some(property) = self
            .declared
            .properties
            .iter()
            .find(|p| !offered.has_property(p))
        {
            return Err(HandshakeError::UnsupportedProperty {
                property: property.clone(),
                service: self.service.clone(),
            });
        }
        Ok(())
    }

    pub fn state(&self) -> &HandshakeState {
        &self.state
    }

    pub fn is_acknowledged(&self) -> bool {
        self.state == HandshakeState::Acknowledged
    }

    pub fn failure(&self) -> Option<&HandshakeError> {
        match &self.state {
            HandshakeState::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn probes_sent(&self) -> u64 {
        self.probes_sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rxbridge_transport::TransportKind;

    fn declared() -> Capabilities {
        Capabilities {
            properties: alloc::vec!["counter".into()],
            methods: alloc::vec!["greet".into(), "justComplete".into()],
        }
    }

    fn handshake() -> Handshake {
        Handshake::new(
            "first",
            declared(),
            &BridgeConfig::for_transport(TransportKind::Socket),
        )
    }

    #[test]
    fn test_no_probe_before_transport() {
        let mut hs = handshake();
        assert_eq!(hs.poll(0), None);
        assert_eq!(hs.poll(10_000), None);
        assert_eq!(hs.state(), &HandshakeState::Idle);
    }

    #[test]
    fn test_probe_immediately_then_every_interval() {
        let mut hs = handshake();
        hs.on_transport_up(1000);

        let probe = hs.poll(1000).unwrap();
        assert!(probe.is_handshake());
        assert!(probe.complete);

        assert_eq!(hs.poll(1050), None, "間隔未満では送らない");
        assert!(hs.poll(1100).is_some(), "100ms 後に再送");
        assert_eq!(hs.probes_sent(), 2);
    }

    #[test]
    fn test_valid_reply_acknowledges_and_stops_probing() {
        let mut hs = handshake();
        hs.on_transport_up(0);
        hs.poll(0);

        let mut offered = declared();
        offered.methods.push("extra".into());
        hs.on_reply(&WireMessage::capability_reply("first", &offered));

        assert!(hs.is_acknowledged());
        assert_eq!(hs.poll(500), None);
    }

    #[test]
    fn test_missing_method_reported_before_property() {
        let mut hs = handshake();
        hs.on_transport_up(0);
        let offered = Capabilities {
            properties: alloc::vec![],
            methods: alloc::vec!["greet".into()],
        };
        hs.on_reply(&WireMessage::capability_reply("first", &offered));

        assert_eq!(
            hs.failure(),
            Some(&HandshakeError::UnsupportedMethod {
                method: "justComplete".into(),
                service: "first".into(),
            })
        );
    }

    #[test]
    fn test_timeout_not_before_deadline() {
        let mut hs = handshake();
        hs.on_transport_up(0);
        hs.poll(4999);
        assert!(hs.failure().is_none(), "タイムアウト前に失敗してはいけない");
        hs.poll(5000);
        assert_eq!(
            hs.failure(),
            Some(&HandshakeError::NotConnected { service: "first".into() })
        );
    }

    #[test]
    fn test_reconnect_restarts_probing() {
        let mut hs = handshake();
        hs.on_transport_up(0);
        hs.on_reply(&WireMessage::capability_reply("first", &declared()));
        assert!(hs.is_acknowledged());

        hs.on_transport_down();
        assert_eq!(hs.state(), &HandshakeState::Idle);
        hs.on_transport_up(700);
        assert!(hs.poll(700).is_some());
        assert!(!hs.is_acknowledged());
    }

    #[test]
    fn test_failure_is_latched() {
        let mut hs = handshake();
        hs.on_transport_up(0);
        hs.poll(6000);
        hs.on_transport_down();
        hs.on_transport_up(7000);
        assert!(hs.failure().is_some());
        assert_eq!(hs.poll(7000), None);
    }

    #[test]
    fn test_malformed_reply_keeps_probing() {
        let mut hs = handshake();
        hs.on_transport_up(0);
        let mut reply = WireMessage::probe("first");
        reply.data = Some(serde_json::json!("nonsense"));
        hs.on_reply(&reply);
        assert!(matches!(hs.state(), HandshakeState::Probing { .. }));
    }
}
