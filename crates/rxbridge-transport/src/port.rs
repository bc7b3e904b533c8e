//! トランスポートポート（具体的なトランスポートが実装するインターフェース）

use rxbridge_proto::WireMessage;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// トランスポートの種類（joint の `type` にもなる）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// ブラウザ⇔サーバーのソケット
    Socket,
    /// メインスレッド⇔ワーカーのメッセージチャンネル
    Worker,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Socket => "socket",
            TransportKind::Worker => "worker",
        }
    }
}

/// トランスポートから上がってくるイベント
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// 接続が開いた（再接続を含む）
    Connected,
    /// 接続が切れた（切断 1 回につき 1 度だけ）
    Disconnected,
    /// この接続宛ての受信メッセージ
    Message(WireMessage),
}

/// 具体的なトランスポートが実装するポート
///
/// 呼び出しはすべて単一のイベントループ上で行われる前提。
pub trait TransportPort {
    /// joint 集計に使うトランスポート種別
    fn kind(&self) -> TransportKind;

    /// 接続を開始する。既に開始済みなら何もしない
    fn start(&mut self, now_ms: u64);

    /// メッセージを送信する（ベストエフォート）
    fn send(&mut self, msg: &WireMessage) -> Result<(), TransportError>;

    /// 次のイベントを取り出す。なければ `None`
    ///
    /// 再接続タイマーなど時刻依存の処理もここで進める。
    fn poll_event(&mut self, now_ms: u64) -> Option<TransportEvent>;

    /// 現在の接続状態
    fn is_connected(&self) -> bool;
}
