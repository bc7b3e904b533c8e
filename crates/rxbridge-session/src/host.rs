//! 公開側ホスト
//!
//! 1 本の接続に対して、登録された 1 つ以上のサービスを公開する。
//! 複数クライアントを扱うときは接続ごとに `Host` を作り、同じ `Rc<Service>` と
//! `HealthMonitor` を共有する。
//!
//! ## 受信パケットの扱い
//!
//! | パケット | 処理 |
//! |---|---|
//! | `id=-1`（プローブ） | capability を返し、そのサービスの peer acknowledged を立てる |
//! | `isCheck` | `"OK"` を 1 つ返して終了。何も呼び出さない |
//! | `complete=true` | 同じ ID の呼び出しを止めて joint を外す（不明な ID は何もしない） |
//! | 開始（method） | サンクを呼ぶ。同期失敗は E パケット 1 つ、成功なら joint を作ってストリーミング |
//! | 開始（property） | 既存ストリームのアクセサを開く |

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;

use rxbridge_proto::{Notification, WireMessage};
use rxbridge_stream::BoxSource;
use rxbridge_transport::{TransportEvent, TransportPort};
use tracing::{debug, error, trace, warn};

use crate::error::HostError;
use crate::health::{HealthMonitor, Joint};
use crate::registry::Service;
use crate::MAX_SIGNALS_PER_TICK;

/// 呼び出し元がメソッド/プロパティにアクセスしてよいかの判定
pub trait AccessPolicy {
    fn has_access_to(&self, service: &str, target: &str) -> bool;
}

/// 常に許可する
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn has_access_to(&self, _service: &str, _target: &str) -> bool {
        true
    }
}

impl<F: Fn(&str, &str) -> bool> AccessPolicy for F {
    fn has_access_to(&self, service: &str, target: &str) -> bool {
        self(service, target)
    }
}

struct Exposed {
    service: Rc<Service>,
    /// プローブを一度でも受け取ったか
    peer_acknowledged: bool,
}

/// ストリーミング中の呼び出し 1 件
struct Invocation {
    request: WireMessage,
    source: BoxSource,
}

/// (サービス名, 相関 ID)。相関 ID はブリッジごとなので、サービスが違えば衝突しうる
type InvocationKey = (String, i64);

pub struct Host<T> {
    connection: u32,
    port: T,
    services: BTreeMap<String, Exposed>,
    health: HealthMonitor,
    policy: Box<dyn AccessPolicy>,
    invocations: BTreeMap<InvocationKey, Invocation>,
    diagnostics: Vec<HostError>,
}

impl<T: TransportPort> Host<T> {
    /// `connection` は joint を区別するための接続番号
    pub fn new(connection: u32, port: T, health: HealthMonitor) -> Self {
        Host {
            connection,
            port,
            services: BTreeMap::new(),
            health,
            policy: Box::new(AllowAll),
            invocations: BTreeMap::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn with_policy(mut self, policy: impl AccessPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    /// サービスを登録する
    ///
    /// 同じ名前が既にあれば警告して拒否する。先に登録した方が有効なまま。
    pub fn register(&mut self, service: Rc<Service>) -> Result<(), HostError> {
        let name = String::from(service.name());
        if self.services.contains_key(&name) {
            let e = HostError::DuplicateService { service: name };
            warn!(error = %e, "duplicate service registration");
            return Err(e);
        }
        debug!(service = %name, connection = self.connection, "service registered");
        self.services.insert(
            name,
            Exposed {
                service,
                peer_acknowledged: false,
            },
        );
        Ok(())
    }

    pub fn connection(&self) -> u32 {
        self.connection
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    pub fn port_mut(&mut self) -> &mut T {
        &mut self.port
    }

    /// 相手のブリッジからプローブを受け取ったか
    pub fn is_peer_acknowledged(&self, service: &str) -> bool {
        self.services.get(service).is_some_and(|e| e.peer_acknowledged)
    }

    pub fn active_invocations(&self) -> usize {
        self.invocations.len()
    }

    /// プロセスレベルの診断を取り出す
    pub fn take_diagnostics(&mut self) -> Vec<HostError> {
        core::mem::take(&mut self.diagnostics)
    }

    /// 時刻を進める
    ///
    /// トランスポートのイベントを処理し、各ストリームから上限までシグナルを送る。
    pub fn tick(&mut self, now_ms: u64) {
        self.port.start(now_ms);

        while let Some(event) = self.port.poll_event(now_ms) {
            match event {
                TransportEvent::Connected => {
                    debug!(connection = self.connection, "host transport connected");
                }
                TransportEvent::Disconnected => self.on_disconnected(),
                TransportEvent::Message(msg) => self.on_message(msg),
            }
        }

        let keys: Vec<InvocationKey> = self.invocations.keys().cloned().collect();
        for key in keys {
            self.pump(&key, now_ms);
        }
    }

    fn on_message(&mut self, msg: WireMessage) {
        let Some(exposed) = self.services.get_mut(&msg.service) else {
            trace!(service = %msg.service, "ignoring message for unknown service");
            return;
        };

        if msg.is_handshake() {
            if msg.data.is_some() {
                trace!(service = %msg.service, "ignoring handshake reply on host");
                return;
            }
            exposed.peer_acknowledged = true;
            let reply = WireMessage::capability_reply(&msg.service, exposed.service.capabilities());
            self.send(&reply);
            return;
        }

        if msg.is_check() {
            let reply = WireMessage::check_ok(&msg);
            self.send(&reply);
            return;
        }

        let service = exposed.service.clone();
        if msg.complete {
            self.cancel(&msg);
        } else {
            self.start(&service, msg);
        }
    }

    fn cancel(&mut self, msg: &WireMessage) {
        let key = (msg.service.clone(), msg.id);
        if self.invocations.contains_key(&key) {
            debug!(service = %msg.service, id = msg.id, "cancelled by peer");
            self.retire(&key);
        } else {
            // 自分の完了と相手のキャンセルが行き違った場合
            trace!(service = %msg.service, id = msg.id, "cancel for unknown id");
        }
    }

    fn start(&mut self, service: &Service, msg: WireMessage) {
        let key = (msg.service.clone(), msg.id);
        if self.invocations.contains_key(&key) {
            warn!(service = %msg.service, id = msg.id, "duplicate start packet ignored");
            return;
        }

        let (kind, name) = match (&msg.method, &msg.property) {
            (Some(method), _) => ("method", method.clone()),
            (None, Some(property)) => ("property", property.clone()),
            (None, None) => {
                warn!(service = %msg.service, id = msg.id, "start packet without method or property");
                return;
            }
        };

        if !self.policy.has_access_to(&msg.service, &name) {
            let e = HostError::AccessDenied {
                service: msg.service.clone(),
                target: name,
            };
            warn!(error = %e, "access denied");
            let reply = WireMessage::result(&msg, &Notification::error(e.to_payload()), true);
            self.diagnostics.push(e);
            self.send(&reply);
            return;
        }

        let opened = if kind == "method" {
            service.invoke(&name, &msg.args())
        } else {
            service.open_property(&name).map(Ok)
        };

        let source = match opened {
            Some(Ok(source)) => source,
            Some(Err(payload)) => {
                debug!(service = %msg.service, id = msg.id, method = %name, "invocation failed synchronously");
                let reply = WireMessage::result(&msg, &Notification::error(payload), true);
                self.send(&reply);
                return;
            }
            None => {
                let e = HostError::DoesNotExist {
                    service: msg.service.clone(),
                    kind,
                    name,
                };
                error!(error = %e, "start packet for unregistered member");
                self.diagnostics.push(e);
                return;
            }
        };

        self.health.add_joint(Joint {
            connection: self.connection,
            id: msg.id,
            kind: self.port.kind(),
            service: msg.service.clone(),
            target: name,
        });
        self.invocations.insert(key, Invocation { request: msg, source });
    }

    /// 1 つのストリームから出せるだけシグナルを取り出して送る
    /// 1 つの呼び出しから、この tick で出せるシグナルを送る
    ///
    /// 1 回に送るのは `MAX_SIGNALS_PER_TICK` 個まで。残りは次の tick に回す。
    fn pump(&mut self, key: &InvocationKey, now_ms: u64) {
        let mut outgoing = Vec::new();
        let mut finished = false;
        if let Some(invocation) = self.invocations.get_mut(key) {
            while outgoing.len() < MAX_SIGNALS_PER_TICK {
                let Some(signal) = invocation.source.poll_signal(now_ms) else {
                    break;
                };
                let terminal = signal.is_terminal();
                outgoing.push(WireMessage::result(&invocation.request, &signal, terminal));
                if terminal {
                    finished = true;
                    break;
                }
            }
        }

        for msg in &outgoing {
            self.send(msg);
        }
        if finished {
            trace!(service = %key.0, id = key.1, "stream finished");
            self.retire(key);
        }
    }

    /// 呼び出しを止めて joint を外す
    fn retire(&mut self, key: &InvocationKey) {
        if self.invocations.remove(key).is_some() {
            let kind = self.port.kind();
            self.health.remove_joint(self.connection, &key.0, key.1, kind);
        }
    }

    /// 接続が切れたら全ての呼び出しを止める
    fn on_disconnected(&mut self) {
        debug!(
            connection = self.connection,
            invocations = self.invocations.len(),
            "host transport disconnected"
        );
        let keys: Vec<InvocationKey> = self.invocations.keys().cloned().collect();
        for key in keys {
            self.retire(&key);
        }
        for exposed in self.services.values_mut() {
            exposed.peer_acknowledged = false;
        }
    }

    fn send(&mut self, msg: &WireMessage) {
        if let Err(e) = self.port.send(msg) {
            warn!(connection = self.connection, id = msg.id, error = %e, "host send failed, packet dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rxbridge_proto::{Capabilities, ErrorPayload};
    use rxbridge_stream::{empty, from_fn, never, of, SourceExt};
    use rxbridge_transport::{MemoryTransport, TransportKind};
    use serde_json::json;

    fn service() -> Rc<Service> {
        Rc::new(
            Service::new("first")
                .method("justComplete", |_| Ok(empty().boxed()))
                .method("forever", |_| Ok(never().boxed()))
                .method("explode", |_| Err(ErrorPayload::named("TypeError", "boom")))
                .property("numbers", || of(alloc::vec![json!(1), json!(2)]).boxed()),
        )
    }

    /// ホストと、それに生パケットを送る相手側
    fn setup() -> (Host<MemoryTransport>, MemoryTransport) {
        let (mut peer, server) = MemoryTransport::pair(TransportKind::Socket, None);
        peer.start(0);
        while peer.poll_event(0).is_some() {}
        let mut host = Host::new(0, server, HealthMonitor::new());
        host.register(service()).unwrap();
        host.tick(0);
        (host, peer)
    }

    fn received(peer: &mut MemoryTransport) -> Vec<WireMessage> {
        let mut out = Vec::new();
        while let Some(event) = peer.poll_event(0) {
            if let TransportEvent::Message(msg) = event {
                out.push(msg);
            }
        }
        out
    }

    #[test]
    fn test_probe_answered_with_capabilities() {
        let (mut host, mut peer) = setup();
        assert!(!host.is_peer_acknowledged("first"));

        peer.send(&WireMessage::probe("first")).unwrap();
        host.tick(1);

        let replies = received(&mut peer);
        assert_eq!(replies.len(), 1);
        let caps: Capabilities = replies[0].capabilities().unwrap();
        assert_eq!(caps.methods, alloc::vec!["justComplete", "forever", "explode"]);
        assert_eq!(caps.properties, alloc::vec!["numbers"]);
        assert!(host.is_peer_acknowledged("first"));
        assert_eq!(host.health().joint_count(), 0, "プローブは joint を作らない");
    }

    #[test]
    fn test_empty_stream_yields_single_terminal_packet() {
        let (mut host, mut peer) = setup();
        peer.send(&WireMessage::start_method(0, "first", "justComplete", alloc::vec![]))
            .unwrap();
        host.tick(1);

        let packets = received(&mut peer);
        assert_eq!(packets.len(), 1);
        assert!(packets[0].complete);
        assert_eq!(packets[0].notification().unwrap(), Some(Notification::Complete));
        assert_eq!(host.health().joint_count(), 0);
    }

    #[test]
    fn test_values_then_standalone_complete() {
        let (mut host, mut peer) = setup();
        peer.send(&WireMessage::start_property(4, "first", "numbers")).unwrap();
        host.tick(1);

        let packets = received(&mut peer);
        let flags: Vec<bool> = packets.iter().map(|p| p.complete).collect();
        assert_eq!(flags, alloc::vec![false, false, true]);
        assert_eq!(packets[2].notification().unwrap(), Some(Notification::Complete));
        assert!(packets.iter().all(|p| p.property.as_deref() == Some("numbers")));
    }

    #[test]
    fn test_sync_throw_is_one_error_packet_without_joint() {
        let (mut host, mut peer) = setup();
        peer.send(&WireMessage::start_method(1, "first", "explode", alloc::vec![]))
            .unwrap();
        host.tick(1);

        let packets = received(&mut peer);
        assert_eq!(packets.len(), 1);
        assert!(packets[0].complete);
        match packets[0].notification().unwrap() {
            Some(Notification::Error { error }) => {
                assert_eq!(error.message, "boom");
                assert_eq!(error.name(), Some("TypeError"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(host.health().joint_count(), 0);
        assert_eq!(host.active_invocations(), 0);
    }

    #[test]
    fn test_cancel_removes_joint_and_late_cancel_is_noop() {
        let (mut host, mut peer) = setup();
        peer.send(&WireMessage::start_method(2, "first", "forever", alloc::vec![]))
            .unwrap();
        host.tick(1);
        assert_eq!(host.health().check_health().socket_joint_amount, 1);

        let cancel = WireMessage::cancel(2, "first", Some("forever"), None);
        peer.send(&cancel).unwrap();
        host.tick(2);
        assert_eq!(host.health().joint_count(), 0);

        // 二重キャンセルでも何も起きない
        peer.send(&cancel).unwrap();
        host.tick(3);
        assert!(received(&mut peer).is_empty());
    }

    #[test]
    fn test_check_answers_ok_without_invoking() {
        let (mut host, mut peer) = setup();
        let mut check = WireMessage::start_method(9, "first", "explode", alloc::vec![]);
        check.is_check = Some(true);
        peer.send(&check).unwrap();
        host.tick(1);

        let packets = received(&mut peer);
        assert_eq!(packets.len(), 1);
        assert!(packets[0].complete);
        assert_eq!(packets[0].notification().unwrap(), Some(Notification::next(json!("OK"))));
    }

    #[test]
    fn test_unknown_member_is_process_level_diagnostic() {
        let (mut host, mut peer) = setup();
        peer.send(&WireMessage::start_method(3, "first", "missing", alloc::vec![]))
            .unwrap();
        peer.send(&WireMessage::start_method(3, "other", "missing", alloc::vec![]))
            .unwrap();
        host.tick(1);

        assert!(received(&mut peer).is_empty(), "ストリームには何も届かない");
        let diagnostics = host.take_diagnostics();
        assert_eq!(diagnostics.len(), 1, "未登録サービス宛ては黙って捨てる");
        assert!(matches!(diagnostics[0], HostError::DoesNotExist { kind: "method", .. }));
    }

    #[test]
    fn test_duplicate_service_keeps_first() {
        let (mut host, _peer) = setup();
        let second = Rc::new(Service::new("first"));
        assert_eq!(
            host.register(second),
            Err(HostError::DuplicateService { service: "first".into() })
        );
    }

    #[test]
    fn test_access_policy_denial() {
        let (peer_side, server) = MemoryTransport::pair(TransportKind::Worker, None);
        let mut peer = peer_side;
        peer.start(0);
        while peer.poll_event(0).is_some() {}
        let mut host = Host::new(0, server, HealthMonitor::new())
            .with_policy(|_service: &str, target: &str| target != "forever");
        host.register(service()).unwrap();

        peer.send(&WireMessage::start_method(0, "first", "forever", alloc::vec![]))
            .unwrap();
        host.tick(1);

        let packets = received(&mut peer);
        assert_eq!(packets.len(), 1);
        assert!(matches!(
            packets[0].notification().unwrap(),
            Some(Notification::Error { .. })
        ));
        assert_eq!(host.health().joint_count(), 0);
        assert_eq!(host.take_diagnostics().len(), 1);
    }

    #[test]
    fn test_disconnect_tears_down_everything() {
        let (mut host, mut peer) = setup();
        peer.send(&WireMessage::probe("first")).unwrap();
        peer.send(&WireMessage::start_method(0, "first", "forever", alloc::vec![]))
            .unwrap();
        peer.send(&WireMessage::start_method(1, "first", "forever", alloc::vec![]))
            .unwrap();
        host.tick(1);
        assert_eq!(host.health().joint_count(), 2);

        peer.sever();
        host.tick(2);
        assert_eq!(host.health().joint_count(), 0);
        assert_eq!(host.active_invocations(), 0);
        assert!(!host.is_peer_acknowledged("first"));
    }

    #[test]
    fn test_always_ready_source_is_sent_in_bounded_batches() {
        let (mut peer, server) = MemoryTransport::pair(TransportKind::Socket, None);
        peer.start(0);
        while peer.poll_event(0).is_some() {}
        let mut host = Host::new(0, server, HealthMonitor::new());
        let flood = Service::new("flood").method("spin", |_| {
            let mut n = 0u64;
            Ok(from_fn(move |_| {
                n += 1;
                Some(Notification::next(json!(n)))
            })
            .boxed())
        });
        host.register(Rc::new(flood)).unwrap();
        host.tick(0);

        peer.send(&WireMessage::start_method(0, "flood", "spin", alloc::vec![]))
            .unwrap();
        host.tick(1);
        let packets = received(&mut peer);
        assert_eq!(packets.len(), MAX_SIGNALS_PER_TICK);
        assert!(packets.iter().all(|p| !p.complete));

        // 終わらないストリームでもキャンセルは次の tick で処理される
        peer.send(&WireMessage::cancel(0, "flood", Some("spin"), None)).unwrap();
        host.tick(2);
        assert!(received(&mut peer).is_empty());
        assert_eq!(host.active_invocations(), 0);
        assert_eq!(host.health().joint_count(), 0);
    }
}
