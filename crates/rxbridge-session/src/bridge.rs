//! 呼び出し側ブリッジ
//!
//! 1 つのサービス名に対する呼び出し・購読を発行する。
//!
//! - 相関 ID はブリッジごとの単調増加カウンタで、ブリッジが生きている間は再利用しない
//! - 開始パケットは「トランスポート接続済み」かつ「ハンドシェイク確認済み」になるまで保留する
//! - 受信パケットは `(service, id, method/property)` で振り分け、envelope を外して
//!   ローカルストリームに積む
//! - ローカルの購読解除でキャンセルパケット（同じ ID、`complete=true`）を 1 回だけ送る
//!
//! memoized メソッドは引数列（JSON 文字列化したもの）が同じ呼び出しを 1 本の
//! リモートストリームにまとめ、最新値をリプレイし、最後の購読者が抜けたときだけ
//! キャンセルを送る。shared プロパティはリプレイなしで同じようにまとめる。

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, BTreeSet};
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::Cell;

use rxbridge_proto::{Capabilities, Notification, WireMessage};
use rxbridge_stream::{LocalStream, Pipeline};
use rxbridge_transport::{TransportEvent, TransportPort};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, HandshakeError};
use crate::handshake::Handshake;

/// ローカル購読者の識別子（相関 ID とは別物）
pub type SubscriberId = u64;

/// 呼び出し 1 件の状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CallPhase {
    AwaitingTransport,
    AwaitingHandshake,
    Sent,
    Streaming,
    Completed,
    Errored,
    /// ローカルで購読解除した（take による打ち切りを含む）
    Cancelled,
}

impl CallPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallPhase::Completed | CallPhase::Errored | CallPhase::Cancelled)
    }
}

/// ブリッジ全体の準備状態
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// トランスポート未接続
    Disconnected,
    /// 接続済み、ハンドシェイク中
    Handshaking,
    Ready,
    Failed(HandshakeError),
}

/// 購読の終端状態。ブリッジと `Subscription` が共有する
type Outcome = Rc<Cell<Option<CallPhase>>>;

/// 呼び出し・購読の戻り値
///
/// 終端した購読はブリッジ側の管理から外れる。その後の状態は
/// `finished()` で読む。
#[derive(Clone)]
pub struct Subscription {
    id: SubscriberId,
    stream: LocalStream,
    outcome: Outcome,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// 値・エラー・完了が届くローカルストリーム
    pub fn stream(&self) -> &LocalStream {
        &self.stream
    }

    /// 終端していればその状態（`Completed` / `Errored` / `Cancelled`）
    pub fn finished(&self) -> Option<CallPhase> {
        self.outcome.get()
    }
}

/// 統計（JS 側の `getStats()` 用）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStats {
    /// 次に払い出す相関 ID
    pub next_id: i64,
    /// 終端していないリモート呼び出し数
    pub outstanding_calls: usize,
    /// 終端も購読解除もしていないローカル購読者数
    pub subscribers: usize,
    pub probes_sent: u64,
    pub starts_sent: u64,
    pub cancels_sent: u64,
    /// 送信に失敗して捨てたパケット数
    pub send_failures: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Method(String),
    Property(String),
}

impl Target {
    fn name(&self) -> &str {
        match self {
            Target::Method(name) | Target::Property(name) => name,
        }
    }
}

/// 同じリモートストリームを共有する呼び出しのキー
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum ShareKey {
    /// メソッド名 + JSON 化した引数列
    Memo(String, String),
    Property(String),
}

/// リモート呼び出し 1 件（相関 ID 1 つ）
struct WireCall {
    target: Target,
    args: Vec<Value>,
    is_check: bool,
    phase: CallPhase,
    subscribers: Vec<SubscriberId>,
    share_key: Option<ShareKey>,
    /// memoized のときだけ保持する最新値
    last_value: Option<Value>,
}

impl WireCall {
    fn start_packet(&self, id: i64, service: &str) -> WireMessage {
        let mut msg = match &self.target {
            Target::Method(name) => WireMessage::start_method(id, service, name, self.args.clone()),
            Target::Property(name) => WireMessage::start_property(id, service, name),
        };
        if self.is_check {
            msg.is_check = Some(true);
        }
        msg
    }

    fn cancel_packet(&self, id: i64, service: &str) -> WireMessage {
        match &self.target {
            Target::Method(name) => WireMessage::cancel(id, service, Some(name), None),
            Target::Property(name) => WireMessage::cancel(id, service, None, Some(name)),
        }
    }
}

/// 終端していないローカル購読者
struct LocalSub {
    wire_id: i64,
    stream: LocalStream,
    outcome: Outcome,
}

impl LocalSub {
    fn finish(&self, phase: CallPhase) {
        self.outcome.set(Some(phase));
    }
}

type PipelineFactory = Box<dyn Fn() -> Pipeline>;

/// ブリッジ対象として宣言した名前と、そのローカル側の扱い
struct Declared {
    capabilities: Capabilities,
    memoized: BTreeSet<String>,
    shared: BTreeMap<String, PipelineFactory>,
}

/// `Bridge` の構築
///
/// ```ignore
/// let bridge = BridgeBuilder::new("first")
///     .method("limitedWork")
///     .memoized_method("lookup")
///     .shared_property("counter", || Pipeline::new().map(double))
///     .build(port);
/// ```
pub struct BridgeBuilder {
    service: String,
    config: Option<BridgeConfig>,
    declared: Declared,
}

impl BridgeBuilder {
    pub fn new(service: &str) -> Self {
        BridgeBuilder {
            service: String::from(service),
            config: None,
            declared: Declared {
                capabilities: Capabilities::new(),
                memoized: BTreeSet::new(),
                shared: BTreeMap::new(),
            },
        }
    }

    /// 省略時はトランスポート種別のプリセット
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = Some(config);
        self
    }

    fn declare_method(&mut self, name: &str) {
        if !self.declared.capabilities.has_method(name) {
            self.declared.capabilities.methods.push(String::from(name));
        }
    }

    fn declare_property(&mut self, name: &str) {
        if !self.declared.capabilities.has_property(name) {
            self.declared.capabilities.properties.push(String::from(name));
        }
    }

    pub fn method(mut self, name: &str) -> Self {
        self.declare_method(name);
        self
    }

    /// 同じ引数の同時呼び出しを 1 本にまとめるメソッド
    pub fn memoized_method(mut self, name: &str) -> Self {
        self.declare_method(name);
        self.declared.memoized.insert(String::from(name));
        self
    }

    /// 購読ごとに独立したリモートストリームを持つプロパティ
    pub fn property(mut self, name: &str) -> Self {
        self.declare_property(name);
        self
    }

    /// 1 本のリモートストリームを共有するプロパティ（リプレイなし）
    ///
    /// `pipeline` は購読者ごとに呼ばれ、受信後のローカル変換になる。
    pub fn shared_property(mut self, name: &str, pipeline: impl Fn() -> Pipeline + 'static) -> Self {
        self.declare_property(name);
        self.declared.shared.insert(String::from(name), Box::new(pipeline));
        self
    }

    pub fn build<T: TransportPort>(self, port: T) -> Bridge<T> {
        let config = self
            .config
            .unwrap_or_else(|| BridgeConfig::for_transport(port.kind()));
        let handshake = Handshake::new(&self.service, self.declared.capabilities.clone(), &config);
        Bridge {
            service: self.service,
            config,
            port,
            declared: self.declared,
            handshake,
            transport_connected: false,
            next_id: 0,
            next_subscriber: 0,
            calls: BTreeMap::new(),
            subscribers: BTreeMap::new(),
            shared: BTreeMap::new(),
            stats: BridgeStats::default(),
        }
    }
}

/// 呼び出し側ブリッジ本体
pub struct Bridge<T> {
    service: String,
    config: BridgeConfig,
    port: T,
    declared: Declared,
    handshake: Handshake,
    transport_connected: bool,
    next_id: i64,
    next_subscriber: SubscriberId,
    /// 相関 ID → 終端していないリモート呼び出し
    calls: BTreeMap<i64, WireCall>,
    /// 終端した購読者はここから外す
    subscribers: BTreeMap<SubscriberId, LocalSub>,
    /// 共有キー → 相関 ID
    shared: BTreeMap<ShareKey, i64>,
    stats: BridgeStats,
}

impl<T: TransportPort> Bridge<T> {
    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn port(&self) -> &T {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut T {
        &mut self.port
    }

    /// メソッドを呼び出す
    ///
    /// エラーは戻り値ではなく、返したストリームに届く。
    pub fn call(&mut self, method: &str, args: Vec<Value>, now_ms: u64) -> Subscription {
        if !self.declared.capabilities.has_method(method) {
            return self.rejected(BridgeError::UndeclaredCapability {
                service: self.service.clone(),
                target: String::from(method),
            });
        }

        let share_key = if self.declared.memoized.contains(method) {
            let encoded = serde_json::to_string(&args).unwrap_or_default();
            Some(ShareKey::Memo(String::from(method), encoded))
        } else {
            None
        };
        self.open(Target::Method(String::from(method)), args, false, share_key, LocalStream::new(), now_ms)
    }

    /// プロパティを購読する
    pub fn subscribe(&mut self, property: &str, now_ms: u64) -> Subscription {
        if !self.declared.capabilities.has_property(property) {
            return self.rejected(BridgeError::UndeclaredCapability {
                service: self.service.clone(),
                target: String::from(property),
            });
        }

        let (share_key, stream) = match self.declared.shared.get(property) {
            Some(factory) => (
                Some(ShareKey::Property(String::from(property))),
                LocalStream::with_pipeline(factory()),
            ),
            None => (None, LocalStream::new()),
        };
        self.open(Target::Property(String::from(property)), Vec::new(), false, share_key, stream, now_ms)
    }

    /// 生存確認を送る。相手が生きていれば `"OK"` が 1 つ届いて完了する
    pub fn check(&mut self, name: &str, now_ms: u64) -> Subscription {
        self.open(Target::Method(String::from(name)), Vec::new(), true, None, LocalStream::new(), now_ms)
    }

    fn rejected(&mut self, error: BridgeError) -> Subscription {
        warn!(error = %error, "rejecting call");
        self.errored(LocalStream::new(), error)
    }

    /// 送らずに終わった購読。ブリッジには登録しない
    fn errored(&mut self, stream: LocalStream, error: BridgeError) -> Subscription {
        stream.push(Notification::error(error.to_payload()));
        let id = self.next_subscriber;
        self.next_subscriber += 1;
        Subscription {
            id,
            stream,
            outcome: Rc::new(Cell::new(Some(CallPhase::Errored))),
        }
    }

    fn register_subscriber(&mut self, wire_id: i64, stream: LocalStream) -> Subscription {
        let id = self.next_subscriber;
        self.next_subscriber += 1;
        let outcome: Outcome = Rc::new(Cell::new(None));
        self.subscribers.insert(
            id,
            LocalSub {
                wire_id,
                stream: stream.clone(),
                outcome: outcome.clone(),
            },
        );
        Subscription { id, stream, outcome }
    }

    fn open(
        &mut self,
        target: Target,
        args: Vec<Value>,
        is_check: bool,
        share_key: Option<ShareKey>,
        stream: LocalStream,
        now_ms: u64,
    ) -> Subscription {
        self.port.start(now_ms);

        if let Some(e) = self.handshake.failure() {
            let error = BridgeError::from(e.clone());
            return self.errored(stream, error);
        }

        // 共有中のリモートストリームがあれば相乗りする
        if let Some(wire_id) = share_key.as_ref().and_then(|k| self.shared.get(k)).copied() {
            if let Some(call) = self.calls.get(&wire_id) {
                if let Some(value) = call.last_value.clone() {
                    stream.push(Notification::next(value));
                }
            }
            let sub = self.register_subscriber(wire_id, stream);
            if let Some(call) = self.calls.get_mut(&wire_id) {
                call.subscribers.push(sub.id);
            }
            trace!(service = %self.service, id = wire_id, "joined shared call");
            return sub;
        }

        let wire_id = self.next_id;
        self.next_id += 1;

        let phase = if self.transport_connected {
            CallPhase::AwaitingHandshake
        } else {
            CallPhase::AwaitingTransport
        };
        let sub = self.register_subscriber(wire_id, stream);
        if let Some(key) = share_key.clone() {
            self.shared.insert(key, wire_id);
        }
        self.calls.insert(
            wire_id,
            WireCall {
                target,
                args,
                is_check,
                phase,
                subscribers: alloc::vec![sub.id],
                share_key,
                last_value: None,
            },
        );
        self.dispatch_ready();
        sub
    }

    /// 購読を解除する
    ///
    /// 送信済みで終端していなければキャンセルパケットを 1 回だけ送る。
    /// 共有中なら最後の購読者が抜けたときだけ送る。2 回目以降は何もしない。
    ///
    /// # 戻り値
    /// 解除したら true、既に解除済み・終端済み（または不明な ID）なら false
    pub fn unsubscribe(&mut self, subscriber: SubscriberId) -> bool {
        let Some(sub) = self.subscribers.remove(&subscriber) else {
            return false;
        };
        sub.finish(CallPhase::Cancelled);
        self.detach(sub.wire_id, subscriber);
        true
    }

    /// リモート呼び出しから購読者を外し、誰もいなくなったら呼び出しを畳む
    fn detach(&mut self, wire_id: i64, subscriber: SubscriberId) {
        let Some(call) = self.calls.get_mut(&wire_id) else {
            return;
        };
        call.subscribers.retain(|s| *s != subscriber);
        if !call.subscribers.is_empty() {
            return;
        }

        let Some(call) = self.calls.remove(&wire_id) else {
            return;
        };
        if let Some(key) = &call.share_key {
            self.shared.remove(key);
        }
        if matches!(call.phase, CallPhase::Sent | CallPhase::Streaming) {
            debug!(service = %self.service, id = wire_id, member = call.target.name(), "cancel");
            let msg = call.cancel_packet(wire_id, &self.service);
            self.stats.cancels_sent += 1;
            self.send(&msg);
        }
    }

    /// 時刻を進める
    ///
    /// トランスポートのイベントを全て処理し、プローブ・保留中の開始パケットを送る。
    pub fn tick(&mut self, now_ms: u64) {
        self.port.start(now_ms);

        while let Some(event) = self.port.poll_event(now_ms) {
            match event {
                TransportEvent::Connected => self.on_connected(now_ms),
                TransportEvent::Disconnected => self.on_disconnected(),
                TransportEvent::Message(msg) => self.on_message(msg),
            }
        }

        if let Some(probe) = self.handshake.poll(now_ms) {
            trace!(service = %self.service, "probe");
            self.send(&probe);
        }
        self.settle_handshake();
    }

    fn on_connected(&mut self, now_ms: u64) {
        debug!(service = %self.service, "transport connected");
        self.transport_connected = true;
        self.handshake.on_transport_up(now_ms);
        for call in self.calls.values_mut() {
            if call.phase == CallPhase::AwaitingTransport {
                call.phase = CallPhase::AwaitingHandshake;
            }
        }
    }

    /// 送信済みの呼び出しは「切断」エラーで終わらせる（自動再開しない）
    fn on_disconnected(&mut self) {
        debug!(service = %self.service, "transport disconnected");
        self.transport_connected = false;
        self.handshake.on_transport_down();

        let in_flight: Vec<i64> = self
            .calls
            .iter()
            .filter(|(_, call)| matches!(call.phase, CallPhase::Sent | CallPhase::Streaming))
            .map(|(id, _)| *id)
            .collect();
        for wire_id in in_flight {
            let target = self
                .calls
                .get(&wire_id)
                .map(|call| String::from(call.target.name()))
                .unwrap_or_default();
            let error = BridgeError::Disconnected {
                service: self.service.clone(),
                target,
            };
            self.deliver(wire_id, Notification::error(error.to_payload()));
        }

        for call in self.calls.values_mut() {
            if call.phase == CallPhase::AwaitingHandshake {
                call.phase = CallPhase::AwaitingTransport;
            }
        }
    }

    fn on_message(&mut self, msg: WireMessage) {
        if msg.service != self.service {
            trace!(service = %msg.service, "ignoring message for another service");
            return;
        }

        if msg.is_handshake() {
            // 自分のプローブと同じ形（data なし）は応答ではない
            if msg.data.is_some() {
                self.handshake.on_reply(&msg);
            }
            return;
        }

        let Some(call) = self.calls.get_mut(&msg.id) else {
            trace!(id = msg.id, "no pending call for packet");
            return;
        };
        if msg.target_name() != Some(call.target.name()) {
            trace!(id = msg.id, "packet target does not match call");
            return;
        }
        if call.phase == CallPhase::Sent {
            call.phase = CallPhase::Streaming;
        }

        match msg.notification() {
            Ok(Some(notification)) => {
                let folded_complete = msg.complete && !notification.is_terminal();
                self.deliver(msg.id, notification);
                if folded_complete {
                    self.deliver(msg.id, Notification::Complete);
                }
            }
            Ok(None) => {
                if msg.complete {
                    self.deliver(msg.id, Notification::Complete);
                }
            }
            Err(e) => {
                warn!(id = msg.id, error = %e, "dropping result packet with malformed envelope");
            }
        }
    }

    /// ハンドシェイクの結果を呼び出しに反映する
    fn settle_handshake(&mut self) {
        if let Some(e) = self.handshake.failure() {
            let error = BridgeError::from(e.clone());
            let pending: Vec<i64> = self.calls.keys().copied().collect();
            for wire_id in pending {
                self.deliver(wire_id, Notification::error(error.to_payload()));
            }
            return;
        }
        self.dispatch_ready();
    }

    /// ゲートが開いていれば保留中の開始パケットを全て送る
    fn dispatch_ready(&mut self) {
        if !(self.transport_connected && self.handshake.is_acknowledged()) {
            return;
        }

        let mut starts = Vec::new();
        for (id, call) in self.calls.iter_mut() {
            if matches!(call.phase, CallPhase::AwaitingTransport | CallPhase::AwaitingHandshake) {
                call.phase = CallPhase::Sent;
                starts.push(call.start_packet(*id, &self.service));
            }
        }
        for msg in starts {
            debug!(service = %self.service, id = msg.id, member = msg.target_name().unwrap_or(""), "start");
            self.stats.starts_sent += 1;
            self.send(&msg);
        }
    }

    /// シグナルを購読者全員に届ける
    ///
    /// 終端シグナルなら呼び出しを畳む。ローカル変換（take）で終わった購読者は
    /// 購読解除として扱う。
    fn deliver(&mut self, wire_id: i64, notification: Notification) {
        let Some(call) = self.calls.get_mut(&wire_id) else {
            return;
        };

        if let Notification::Next { value } = &notification {
            if call.share_key.as_ref().is_some_and(|k| matches!(k, ShareKey::Memo(..))) {
                call.last_value = Some(value.clone());
            }
        }

        let terminal = match &notification {
            Notification::Next { .. } => None,
            Notification::Error { .. } => Some(CallPhase::Errored),
            Notification::Complete => Some(CallPhase::Completed),
        };

        let mut done = Vec::new();
        for subscriber in &call.subscribers {
            let Some(sub) = self.subscribers.get(subscriber) else {
                continue;
            };
            sub.stream.push(notification.clone());
            if let Some(phase) = terminal {
                sub.finish(phase);
                done.push(*subscriber);
            } else if sub.stream.is_terminated() {
                sub.finish(CallPhase::Cancelled);
                done.push(*subscriber);
            }
        }
        for subscriber in &done {
            self.subscribers.remove(subscriber);
        }

        if let Some(phase) = terminal {
            if let Some(call) = self.calls.remove(&wire_id) {
                trace!(service = %self.service, id = wire_id, ?phase, "call finished");
                if let Some(key) = &call.share_key {
                    self.shared.remove(key);
                }
            }
            return;
        }

        for subscriber in done {
            self.detach(wire_id, subscriber);
        }
    }

    /// ベストエフォート送信。失敗はログに残して捨てる
    fn send(&mut self, msg: &WireMessage) {
        if let Err(e) = self.port.send(msg) {
            warn!(service = %self.service, id = msg.id, error = %e, "send failed, packet dropped");
            self.stats.send_failures += 1;
        }
    }

    pub fn readiness(&self) -> Readiness {
        if let Some(e) = self.handshake.failure() {
            return Readiness::Failed(e.clone());
        }
        if !self.transport_connected {
            Readiness::Disconnected
        } else if self.handshake.is_acknowledged() {
            Readiness::Ready
        } else {
            Readiness::Handshaking
        }
    }

    /// 終端していない購読者から見た呼び出しの状態
    ///
    /// 終端済み・解除済みなら `None`。終端状態は `Subscription::finished` で読む。
    pub fn call_phase(&self, subscriber: SubscriberId) -> Option<CallPhase> {
        let sub = self.subscribers.get(&subscriber)?;
        self.calls.get(&sub.wire_id).map(|call| call.phase)
    }

    /// 終端していない購読者のストリーム
    pub fn stream(&self, subscriber: SubscriberId) -> Option<&LocalStream> {
        self.subscribers.get(&subscriber).map(|sub| &sub.stream)
    }

    /// 終端していないリモート呼び出しの数
    pub fn outstanding_calls(&self) -> usize {
        self.calls.len()
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            next_id: self.next_id,
            outstanding_calls: self.calls.len(),
            subscribers: self.subscribers.len(),
            probes_sent: self.handshake.probes_sent(),
            ..self.stats.clone()
        }
    }
}
