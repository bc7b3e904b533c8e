//! プロセス内のメモリ上で動く双方向リンク
//!
//! テストやネイティブ実行で、ソケット／ワーカーの代わりに使う。
//! 送信側でエンコードした JSON テキストをそのまま相手側のキューに積むので、
//! ワイヤー上の形は本物のトランスポートと同じになる。

use alloc::collections::VecDeque;
use alloc::rc::Rc;
use alloc::string::String;
use core::cell::RefCell;

use rxbridge_proto::{decode, encode, WireMessage};
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::port::{TransportEvent, TransportKind, TransportPort};
use crate::reconnect::Reconnector;

/// リンク上を流れる 1 要素
#[derive(Debug, Clone)]
enum LinkItem {
    Open,
    Closed,
    Frame(String),
}

/// 両端が共有するリンク状態
#[derive(Debug, Default)]
struct Link {
    open: bool,
    /// 端ごとの受信キュー（添字 0 = 開始側、1 = 受け側）
    queues: [VecDeque<LinkItem>; 2],
}

impl Link {
    fn open(&mut self) {
        if self.open {
            return;
        }
        self.open = true;
        for q in self.queues.iter_mut() {
            q.push_back(LinkItem::Open);
        }
    }

    fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        for q in self.queues.iter_mut() {
            q.push_back(LinkItem::Closed);
        }
    }
}

/// メモリリンクの片端
///
/// `pair()` の 1 つ目が開始側（ブラウザ役）で、切断後の再接続を受け持つ。
/// 2 つ目が受け側（サーバー／ワーカー役）。
pub struct MemoryTransport {
    link: Rc<RefCell<Link>>,
    side: usize,
    kind: TransportKind,
    started: bool,
    connected: bool,
    /// 開始側だけが持つ
    reconnector: Option<Reconnector>,
}

impl MemoryTransport {
    /// リンクの両端を作る
    ///
    /// `reconnect_backoff_ms` が `Some` なら、開始側は切断後その間隔で再接続する。
    pub fn pair(kind: TransportKind, reconnect_backoff_ms: Option<u64>) -> (Self, Self) {
        let link = Rc::new(RefCell::new(Link::default()));
        let initiator = MemoryTransport {
            link: link.clone(),
            side: 0,
            kind,
            started: false,
            connected: false,
            reconnector: reconnect_backoff_ms.map(Reconnector::new),
        };
        let acceptor = MemoryTransport {
            link,
            side: 1,
            kind,
            started: false,
            connected: false,
            reconnector: None,
        };
        (initiator, acceptor)
    }

    /// リンクを切断する（ネットワーク断のシミュレーション）
    ///
    /// 両端に `Disconnected` が 1 回ずつ届く。既に切れていれば何もしない。
    pub fn sever(&self) {
        debug!(kind = self.kind.as_str(), "memory link severed");
        self.link.borrow_mut().close();
    }

    /// デコード前の生テキストを相手側に積む（不正フレームの注入用）
    pub fn send_raw(&self, text: &str) -> Result<(), TransportError> {
        let mut link = self.link.borrow_mut();
        if !link.open {
            return Err(TransportError::NotConnected);
        }
        link.queues[1 - self.side].push_back(LinkItem::Frame(String::from(text)));
        Ok(())
    }

    /// 再接続の試行回数
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnector.as_ref().map_or(0, |r| r.attempts())
    }
}

impl TransportPort for MemoryTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn start(&mut self, _now_ms: u64) {
        if self.started {
            return;
        }
        self.started = true;
        self.link.borrow_mut().open();
    }

    fn send(&mut self, msg: &WireMessage) -> Result<(), TransportError> {
        let text = encode(msg)?;
        let mut link = self.link.borrow_mut();
        if !link.open {
            return Err(TransportError::NotConnected);
        }
        link.queues[1 - self.side].push_back(LinkItem::Frame(text));
        Ok(())
    }

    fn poll_event(&mut self, now_ms: u64) -> Option<TransportEvent> {
        if let Some(reconnector) = self.reconnector.as_mut() {
            if reconnector.poll(now_ms) {
                debug!(kind = self.kind.as_str(), "reconnecting memory link");
                self.link.borrow_mut().open();
            }
        }

        loop {
            let item = self.link.borrow_mut().queues[self.side].pop_front()?;
            match item {
                LinkItem::Open => {
                    self.connected = true;
                    return Some(TransportEvent::Connected);
                }
                LinkItem::Closed => {
                    self.connected = false;
                    if let Some(reconnector) = self.reconnector.as_mut() {
                        reconnector.on_close(now_ms);
                    }
                    return Some(TransportEvent::Disconnected);
                }
                LinkItem::Frame(text) => match decode(&text) {
                    Ok(msg) => return Some(TransportEvent::Message(msg)),
                    Err(e) => {
                        warn!(error = %e, "dropping undecodable frame");
                        continue;
                    }
                },
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RECONNECT_BACKOFF_MS;
    use alloc::vec;
    use serde_json::json;

    fn drain(port: &mut MemoryTransport, now: u64) -> alloc::vec::Vec<TransportEvent> {
        let mut out = alloc::vec::Vec::new();
        while let Some(ev) = port.poll_event(now) {
            out.push(ev);
        }
        out
    }

    #[test]
    fn test_start_connects_both_sides() {
        let (mut a, mut b) = MemoryTransport::pair(TransportKind::Socket, None);
        assert!(!a.is_connected());
        a.start(0);
        a.start(0); // 冪等

        assert_eq!(drain(&mut a, 0), vec![TransportEvent::Connected]);
        assert_eq!(drain(&mut b, 0), vec![TransportEvent::Connected]);
        assert!(a.is_connected());
        assert!(b.is_connected());
    }

    #[test]
    fn test_send_delivers_decoded_message() {
        let (mut a, mut b) = MemoryTransport::pair(TransportKind::Worker, None);
        a.start(0);
        drain(&mut b, 0);

        let msg = WireMessage::start_method(0, "first", "greet", vec![json!("x")]);
        a.send(&msg).unwrap();
        assert_eq!(b.poll_event(0), Some(TransportEvent::Message(msg)));
    }

    #[test]
    fn test_send_before_open_fails() {
        let (mut a, _b) = MemoryTransport::pair(TransportKind::Socket, None);
        let msg = WireMessage::probe("first");
        assert_eq!(a.send(&msg), Err(TransportError::NotConnected));
    }

    #[test]
    fn test_garbage_frame_skipped() {
        let (mut a, mut b) = MemoryTransport::pair(TransportKind::Socket, None);
        a.start(0);
        drain(&mut b, 0);

        a.send_raw("{not json").unwrap();
        a.send(&WireMessage::probe("first")).unwrap();
        match b.poll_event(0) {
            Some(TransportEvent::Message(m)) => assert!(m.is_handshake()),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(b.poll_event(0), None);
    }

    #[test]
    fn test_sever_and_reconnect_after_backoff() {
        let (mut a, mut b) =
            MemoryTransport::pair(TransportKind::Socket, Some(RECONNECT_BACKOFF_MS));
        a.start(0);
        drain(&mut a, 0);
        drain(&mut b, 0);

        a.sever();
        a.sever(); // 二重切断でも Disconnected は 1 回
        assert_eq!(drain(&mut a, 100), vec![TransportEvent::Disconnected]);
        assert_eq!(drain(&mut b, 100), vec![TransportEvent::Disconnected]);
        assert!(!a.is_connected());

        assert_eq!(drain(&mut a, 599), vec![]);
        assert_eq!(drain(&mut a, 600), vec![TransportEvent::Connected]);
        assert_eq!(drain(&mut b, 600), vec![TransportEvent::Connected]);
        assert_eq!(a.reconnect_attempts(), 1);
    }

    #[test]
    fn test_worker_link_without_reconnect_stays_closed() {
        let (mut a, mut b) = MemoryTransport::pair(TransportKind::Worker, None);
        a.start(0);
        b.start(0);
        drain(&mut a, 0);
        b.sever();
        assert_eq!(drain(&mut a, 0), vec![TransportEvent::Disconnected]);
        assert_eq!(drain(&mut a, 10_000), vec![]);
    }
}
