//! 1 本の接続を複数のサービスで共有する
//!
//! ブラウザ側では複数のサービス用ブリッジが同じソケットを使う。
//! `PortHub` が元のポートを持ち、`SharedPort` ハンドルごとにイベントを複製して配る。
//! 受信メッセージの振り分け（サービス名の一致確認）は各ブリッジ側で行う。

use alloc::collections::VecDeque;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;

use rxbridge_proto::WireMessage;

use crate::error::TransportError;
use crate::port::{TransportEvent, TransportKind, TransportPort};

struct Hub<T> {
    port: T,
    /// ハンドルごとの受信キュー。drop されたハンドルの枠は `None`
    queues: Vec<Option<VecDeque<TransportEvent>>>,
}

impl<T: TransportPort> Hub<T> {
    fn pump(&mut self, now_ms: u64) {
        while let Some(event) = self.port.poll_event(now_ms) {
            for q in self.queues.iter_mut().flatten() {
                q.push_back(event.clone());
            }
        }
    }

    /// 空いている枠を再利用し、なければ末尾に足す
    fn attach(&mut self, queue: VecDeque<TransportEvent>) -> usize {
        match self.queues.iter().position(Option::is_none) {
            Some(slot) => {
                self.queues[slot] = Some(queue);
                slot
            }
            None => {
                self.queues.push(Some(queue));
                self.queues.len() - 1
            }
        }
    }
}

/// 共有される元のポート
pub struct PortHub<T> {
    inner: Rc<RefCell<Hub<T>>>,
}

impl<T: TransportPort> PortHub<T> {
    pub fn new(port: T) -> Self {
        PortHub {
            inner: Rc::new(RefCell::new(Hub {
                port,
                queues: Vec::new(),
            })),
        }
    }

    /// 新しいハンドルを作る
    ///
    /// 既に接続済みなら、そのハンドルには最初に `Connected` が届く。
    pub fn handle(&self) -> SharedPort<T> {
        let mut hub = self.inner.borrow_mut();
        let mut queue = VecDeque::new();
        if hub.port.is_connected() {
            queue.push_back(TransportEvent::Connected);
        }
        let slot = hub.attach(queue);
        SharedPort {
            hub: self.inner.clone(),
            slot,
        }
    }

    /// 生きているハンドルの数
    pub fn handle_count(&self) -> usize {
        self.inner.borrow().queues.iter().flatten().count()
    }

    /// 元のポートに触る（テストでの切断操作など）
    pub fn with_port<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.inner.borrow_mut().port)
    }
}

/// `PortHub` のハンドル。これ自体も `TransportPort`
///
/// drop すると枠が外れ、以後のイベントは複製されない。
pub struct SharedPort<T> {
    hub: Rc<RefCell<Hub<T>>>,
    slot: usize,
}

impl<T: TransportPort> TransportPort for SharedPort<T> {
    fn kind(&self) -> TransportKind {
        self.hub.borrow().port.kind()
    }

    fn start(&mut self, now_ms: u64) {
        self.hub.borrow_mut().port.start(now_ms);
    }

    fn send(&mut self, msg: &WireMessage) -> Result<(), TransportError> {
        self.hub.borrow_mut().port.send(msg)
    }

    fn poll_event(&mut self, now_ms: u64) -> Option<TransportEvent> {
        let mut hub = self.hub.borrow_mut();
        hub.pump(now_ms);
        hub.queues.get_mut(self.slot)?.as_mut()?.pop_front()
    }

    fn is_connected(&self) -> bool {
        self.hub.borrow().port.is_connected()
    }
}

impl<T> Drop for SharedPort<T> {
    fn drop(&mut self) {
        if let Ok(mut hub) = self.hub.try_borrow_mut() {
            if let Some(queue) = hub.queues.get_mut(self.slot) {
                *queue = None;
            }
        }
    }
}
