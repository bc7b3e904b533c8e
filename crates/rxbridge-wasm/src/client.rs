//! BridgeClient wasm-bindgen エクスポート
//!
//! ブラウザ（メインスレッドまたはワーカー）から呼び出す呼び出し側ブリッジ。
//! ソケット／`postMessage` の実体は JS 側が持ち、このクラスはフレームの
//! 受け渡しと状態機械の駆動だけを行う。

use std::collections::BTreeMap;

use wasm_bindgen::prelude::*;

use rxbridge_proto::Notification;
use rxbridge_session::{Bridge, BridgeBuilder, BridgeConfig, Readiness, SubscriberId, Subscription};
use rxbridge_transport::TransportKind;
use serde_json::Value;

use crate::port::JsPort;

/// トランスポート名（`"socket"` / `"worker"`）を解釈する
pub fn parse_transport(name: &str) -> Option<TransportKind> {
    match name {
        "socket" => Some(TransportKind::Socket),
        "worker" => Some(TransportKind::Worker),
        _ => None,
    }
}

/// readiness を JS 向けの文字列にする
pub fn readiness_label(readiness: &Readiness) -> String {
    match readiness {
        Readiness::Disconnected => "disconnected".to_string(),
        Readiness::Handshaking => "handshaking".to_string(),
        Readiness::Ready => "ready".to_string(),
        Readiness::Failed(e) => format!("failed: {}", e),
    }
}

/// 呼び出し側ブリッジ
///
/// ## 内部アーキテクチャ
///
/// ```text
/// BridgeClient
///   ├── Bridge<JsPort>  (rxbridge-session) - ハンドシェイク + 多重化 + ストリーム対応付け
///   └── JsPort          (rxbridge-wasm)    - JS とのイベント／フレームの受け渡し
/// ```
///
/// ## スレッド安全性
///
/// WASM はシングルスレッドのため、`!Send + !Sync` を満たす。
/// JS からは単一スレッドで呼び出される前提。
#[wasm_bindgen]
pub struct BridgeClient {
    bridge: Bridge<JsPort>,
    /// 終端して読み切った購読は `takeSignals` で外す
    subscriptions: BTreeMap<SubscriberId, Subscription>,
}

#[wasm_bindgen]
impl BridgeClient {
    /// ブリッジを初期化する
    ///
    /// # 引数
    /// - `service`: サービス名
    /// - `transport`: `"socket"` または `"worker"`
    /// - `methods` / `properties`: ブリッジ対象として宣言する名前
    /// - `memoized`: 同じ引数の同時呼び出しを共有するメソッド名（`methods` に含まれていなくてもよい）
    /// - `config_json`: `BridgeConfig` の部分上書き（例: `{"handshakeTimeoutMs": 2000}`）
    ///
    /// # エラー
    /// - トランスポート名が不正
    /// - 設定 JSON が不正
    #[wasm_bindgen(constructor)]
    pub fn new(
        service: &str,
        transport: &str,
        methods: Vec<String>,
        properties: Vec<String>,
        memoized: Vec<String>,
        config_json: Option<String>,
    ) -> Result<BridgeClient, JsError> {
        let kind = parse_transport(transport)
            .ok_or_else(|| JsError::new(&format!("Unknown transport: {}", transport)))?;
        let config = match config_json {
            Some(text) => BridgeConfig::from_json(kind, &text)
                .map_err(|e| JsError::new(&format!("{}", e)))?,
            None => BridgeConfig::for_transport(kind),
        };

        let mut builder = BridgeBuilder::new(service).config(config.clone());
        for name in &methods {
            builder = builder.method(name);
        }
        for name in &memoized {
            builder = builder.memoized_method(name);
        }
        for name in &properties {
            builder = builder.property(name);
        }

        Ok(BridgeClient {
            bridge: builder.build(JsPort::new(kind, config.reconnect_backoff_ms)),
            subscriptions: BTreeMap::new(),
        })
    }

    /// JS 側で接続が開いた（`socket.onopen` / ワーカー登録完了）
    #[wasm_bindgen(js_name = "onOpen")]
    pub fn on_open(&mut self) {
        self.bridge.port_mut().push_open();
    }

    /// JS 側で接続が閉じた
    #[wasm_bindgen(js_name = "onClose")]
    pub fn on_close(&mut self, now_ms: f64) {
        self.bridge.port_mut().push_close(now_ms as u64);
    }

    /// 受信したフレーム（JSON テキスト）を渡す
    ///
    /// # エラー
    /// - JSON として不正、または `id` / `service` が欠落
    #[wasm_bindgen(js_name = "recvMessage")]
    pub fn recv_message(&mut self, text: &str) -> Result<(), JsError> {
        self.bridge
            .port_mut()
            .push_frame(text)
            .map_err(|e| JsError::new(&format!("{}", e)))
    }

    /// ソケットを開き直すべき時刻になったか
    #[wasm_bindgen(js_name = "shouldReconnect")]
    pub fn should_reconnect(&mut self, now_ms: f64) -> bool {
        self.bridge.port_mut().should_reconnect(now_ms as u64)
    }

    /// ブリッジが接続開始を要求したか
    #[wasm_bindgen(js_name = "isStarted")]
    pub fn is_started(&self) -> bool {
        self.bridge.port().is_started()
    }

    /// 定期タイマー tick（プローブ・保留中の開始パケット）
    ///
    /// `setInterval` から定期的に呼び出す。プローブ間隔（100ms）より細かく呼ぶこと。
    ///
    /// # 戻り値
    /// 送信すべき JSON テキストの配列
    #[wasm_bindgen]
    pub fn tick(&mut self, now_ms: f64) -> js_sys::Array {
        self.advance(now_ms as u64);
        self.take_outbound()
    }

    /// `call` / `unsubscribe` が積んだ送信フレームを取り出す
    #[wasm_bindgen(js_name = "takeOutbound")]
    pub fn take_outbound(&mut self) -> js_sys::Array {
        let result = js_sys::Array::new();
        for frame in self.bridge.port_mut().take_outbox() {
            result.push(&JsValue::from_str(&frame));
        }
        result
    }

    /// メソッドを呼び出し、購読 ID を返す
    ///
    /// # 引数
    /// - `args_json`: 引数列の JSON 配列（例: `[1, "a"]`）
    #[wasm_bindgen]
    pub fn call(&mut self, method: &str, args_json: &str, now_ms: f64) -> Result<f64, JsError> {
        let args: Vec<Value> = serde_json::from_str(args_json)
            .map_err(|e| JsError::new(&format!("Invalid arguments: {}", e)))?;
        let sub = self.bridge.call(method, args, now_ms as u64);
        Ok(self.keep(sub))
    }

    /// プロパティを購読し、購読 ID を返す
    #[wasm_bindgen]
    pub fn subscribe(&mut self, property: &str, now_ms: f64) -> f64 {
        let sub = self.bridge.subscribe(property, now_ms as u64);
        self.keep(sub)
    }

    /// 生存確認を送り、購読 ID を返す
    #[wasm_bindgen]
    pub fn check(&mut self, name: &str, now_ms: f64) -> f64 {
        let sub = self.bridge.check(name, now_ms as u64);
        self.keep(sub)
    }

    /// 購読を解除する。2 回目以降は false
    #[wasm_bindgen]
    pub fn unsubscribe(&mut self, id: f64) -> bool {
        let id = id as SubscriberId;
        self.subscriptions.remove(&id);
        self.bridge.unsubscribe(id)
    }

    /// 届いたシグナルを JSON 配列で取り出す
    ///
    /// 終端シグナルまで読み切った購読はここで解放され、以後の ID は不明扱いになる。
    ///
    /// # 戻り値
    /// ```json
    /// [{"kind":"N","value":1},{"kind":"C"}]
    /// ```
    #[wasm_bindgen(js_name = "takeSignals")]
    pub fn take_signals(&mut self, id: f64) -> Result<String, JsError> {
        let id = id as SubscriberId;
        let signals = self
            .drain_signals(id)
            .ok_or_else(|| JsError::new(&format!("Unknown subscription: {}", id)))?;
        serde_json::to_string(&signals).map_err(|e| JsError::new(&format!("{}", e)))
    }

    /// 呼び出しの状態（`"sent"`, `"streaming"`, `"completed"` など）
    #[wasm_bindgen(js_name = "callPhase")]
    pub fn call_phase(&self, id: f64) -> Option<String> {
        let id = id as SubscriberId;
        let phase = self
            .subscriptions
            .get(&id)
            .and_then(Subscription::finished)
            .or_else(|| self.bridge.call_phase(id))?;
        serde_json::to_value(phase)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
    }

    /// `"disconnected"` / `"handshaking"` / `"ready"` / `"failed: <理由>"`
    #[wasm_bindgen]
    pub fn readiness(&self) -> String {
        readiness_label(&self.bridge.readiness())
    }

    /// 統計を JSON 文字列で返す
    ///
    /// # 戻り値
    /// ```json
    /// {"nextId":3,"outstandingCalls":1,"subscribers":2,"probesSent":1,"startsSent":3,"cancelsSent":1,"sendFailures":0}
    /// ```
    #[wasm_bindgen(js_name = "getStats")]
    pub fn get_stats(&self) -> Result<String, JsError> {
        serde_json::to_string(&self.bridge.stats()).map_err(|e| JsError::new(&format!("{}", e)))
    }
}

impl BridgeClient {
    fn advance(&mut self, now_ms: u64) {
        self.bridge.tick(now_ms);
    }

    fn keep(&mut self, sub: Subscription) -> f64 {
        let id = sub.id();
        self.subscriptions.insert(id, sub);
        id as f64
    }

    fn drain_signals(&mut self, id: SubscriberId) -> Option<Vec<Notification>> {
        let sub = self.subscriptions.get(&id)?;
        let signals = sub.stream().drain();
        if sub.finished().is_some() && !sub.stream().has_pending() {
            self.subscriptions.remove(&id);
        }
        Some(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rxbridge_proto::{decode, encode, Capabilities, WireMessage};
    use rxbridge_session::HandshakeError;

    fn worker_client() -> BridgeClient {
        let client = BridgeClient::new("first", "worker", vec!["justComplete".into()], vec![], vec![], None);
        match client {
            Ok(client) => client,
            Err(_) => panic!("client construction failed"),
        }
    }

    fn push(client: &mut BridgeClient, msg: &WireMessage) {
        let frame = encode(msg).unwrap();
        client.bridge.port_mut().push_frame(&frame).unwrap();
    }

    #[test]
    fn test_drained_terminal_subscriptions_are_released() {
        let mut client = worker_client();
        client.on_open();
        client.advance(0);
        client.bridge.port_mut().take_outbox();
        let caps = Capabilities {
            methods: vec!["justComplete".into()],
            properties: vec![],
        };
        push(&mut client, &WireMessage::capability_reply("first", &caps));
        client.advance(1);

        for n in 0..100u64 {
            let sub = client.bridge.call("justComplete", vec![], 2 + n);
            let id = client.keep(sub) as SubscriberId;
            let start = client
                .bridge
                .port_mut()
                .take_outbox()
                .iter()
                .map(|frame| decode(frame).unwrap())
                .find(|msg| !msg.is_handshake())
                .unwrap();
            push(&mut client, &WireMessage::result(&start, &Notification::Complete, true));
            client.advance(2 + n);

            assert_eq!(client.call_phase(id as f64).as_deref(), Some("completed"));
            assert_eq!(client.drain_signals(id), Some(vec![Notification::Complete]));
            assert_eq!(client.drain_signals(id), None);
        }
        assert!(client.subscriptions.is_empty());
        assert_eq!(client.bridge.stats().subscribers, 0);
    }

    #[test]
    fn test_rejected_call_released_after_drain() {
        let mut client = worker_client();
        let sub = client.bridge.call("notDeclared", vec![], 0);
        let id = client.keep(sub) as SubscriberId;
        assert_eq!(client.call_phase(id as f64).as_deref(), Some("errored"));
        let signals = client.drain_signals(id).unwrap();
        assert!(matches!(signals.as_slice(), [Notification::Error { .. }]));
        assert!(client.subscriptions.is_empty());
    }

    #[test]
    fn test_parse_transport() {
        assert_eq!(parse_transport("socket"), Some(TransportKind::Socket));
        assert_eq!(parse_transport("worker"), Some(TransportKind::Worker));
        assert_eq!(parse_transport("udp"), None);
    }

    #[test]
    fn test_readiness_label() {
        assert_eq!(readiness_label(&Readiness::Ready), "ready");
        let failed = Readiness::Failed(HandshakeError::NotConnected { service: "ghost".into() });
        assert_eq!(readiness_label(&failed), "failed: service ghost is not connected");
    }
}
