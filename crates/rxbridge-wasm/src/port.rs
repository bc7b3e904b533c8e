//! JS ドライバー用のトランスポートポート
//!
//! 実際のソケット／`postMessage` は JS 側が持つ。`JsPort` は
//! JS から渡されたイベントを溜め、送信フレームを JSON テキストとして溜めるだけ。

use std::collections::VecDeque;

use rxbridge_proto::{decode, encode, ProtoError, WireMessage};
use rxbridge_transport::{Reconnector, TransportError, TransportEvent, TransportKind, TransportPort};

/// JS ドライバーとブリッジの間のバッファ
pub struct JsPort {
    kind: TransportKind,
    connected: bool,
    started: bool,
    /// ブリッジが読む前のイベント
    inbox: VecDeque<TransportEvent>,
    /// JS が送信する前のフレーム
    outbox: Vec<String>,
    /// ソケットだけが再接続する（ワーカーのチャンネルは切れたら終わり）
    reconnector: Option<Reconnector>,
}

impl JsPort {
    pub fn new(kind: TransportKind, reconnect_backoff_ms: u64) -> Self {
        let reconnector = match kind {
            TransportKind::Socket => Some(Reconnector::new(reconnect_backoff_ms)),
            TransportKind::Worker => None,
        };
        JsPort {
            kind,
            connected: false,
            started: false,
            inbox: VecDeque::new(),
            outbox: Vec::new(),
            reconnector,
        }
    }

    /// JS 側で接続が開いた
    pub fn push_open(&mut self) {
        if !self.connected {
            self.connected = true;
            self.inbox.push_back(TransportEvent::Connected);
        }
    }

    /// JS 側で接続が閉じた。ソケットなら再接続を予約する
    pub fn push_close(&mut self, now_ms: u64) {
        if self.connected {
            self.connected = false;
            self.inbox.push_back(TransportEvent::Disconnected);
        }
        if let Some(reconnector) = self.reconnector.as_mut() {
            reconnector.on_close(now_ms);
        }
    }

    /// 受信フレーム（JSON テキスト）を積む
    pub fn push_frame(&mut self, text: &str) -> Result<(), ProtoError> {
        let msg = decode(text)?;
        self.inbox.push_back(TransportEvent::Message(msg));
        Ok(())
    }

    /// 送信待ちフレームを全て取り出す
    pub fn take_outbox(&mut self) -> Vec<String> {
        std::mem::take(&mut self.outbox)
    }

    /// ブリッジが接続開始を要求したか（JS はこれを見てソケットを開く）
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// 再接続すべき時刻になったら true
    pub fn should_reconnect(&mut self, now_ms: u64) -> bool {
        self.reconnector.as_mut().is_some_and(|r| r.poll(now_ms))
    }
}

impl TransportPort for JsPort {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn start(&mut self, _now_ms: u64) {
        self.started = true;
    }

    fn send(&mut self, msg: &WireMessage) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        self.outbox.push(encode(msg)?);
        Ok(())
    }

    fn poll_event(&mut self, _now_ms: u64) -> Option<TransportEvent> {
        self.inbox.pop_front()
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_close_events_once_each() {
        let mut port = JsPort::new(TransportKind::Socket, 500);
        port.push_open();
        port.push_open();
        port.push_close(100);
        port.push_close(100);

        assert_eq!(port.poll_event(0), Some(TransportEvent::Connected));
        assert_eq!(port.poll_event(0), Some(TransportEvent::Disconnected));
        assert_eq!(port.poll_event(0), None);
    }

    #[test]
    fn test_socket_reconnect_schedule() {
        let mut port = JsPort::new(TransportKind::Socket, 500);
        port.push_open();
        port.push_close(1000);
        assert!(!port.should_reconnect(1499));
        assert!(port.should_reconnect(1500));
        assert!(!port.should_reconnect(1600), "1 回の切断につき 1 回だけ");
    }

    #[test]
    fn test_worker_never_reconnects() {
        let mut port = JsPort::new(TransportKind::Worker, 500);
        port.push_open();
        port.push_close(0);
        assert!(!port.should_reconnect(10_000));
    }

    #[test]
    fn test_send_requires_connection() {
        let mut port = JsPort::new(TransportKind::Socket, 500);
        let probe = WireMessage::probe("first");
        assert_eq!(port.send(&probe), Err(TransportError::NotConnected));
        port.push_open();
        port.send(&probe).unwrap();
        assert_eq!(port.take_outbox(), vec![r#"{"id":-1,"complete":true,"service":"first"}"#.to_string()]);
    }

    #[test]
    fn test_bad_frame_rejected() {
        let mut port = JsPort::new(TransportKind::Worker, 500);
        assert!(port.push_frame("not json").is_err());
        assert!(port.push_frame(r#"{"id":0,"service":"first"}"#).is_ok());
    }
}
