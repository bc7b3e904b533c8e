//! # rxbridge-proto
//!
//! rxbridge プロトコルのワイヤーメッセージ定義と JSON エンコード/デコード。
//!
//! ## WireMessage の役割
//!
//! すべての方向・すべての用途で同じ形のメッセージを使う：
//! - `id`: 相関 ID。`-1` はハンドシェイク（capability 確認）専用
//! - `method` / `property`: 呼び出すメソッド名、または購読するプロパティ名
//! - `data`: 開始パケットでは引数列、結果パケットでは materialized envelope、
//!   ハンドシェイク応答では capability リスト
//! - `complete`: 呼び出し側→公開側では「この ID をキャンセル」、
//!   公開側→呼び出し側では「このストリームは終了」
//! - `service`: サービス名前空間。受信側の設定と一致しないメッセージは無視する
//! - `isCheck`: 生存確認。アプリケーションロジックを呼ばずに "OK" を返す
//!
//! ## Materialized envelope
//!
//! ```text
//! {"kind":"N","value":<値>}     値の通知
//! {"kind":"E","error":{...}}    エラー（message + 全ての own property）
//! {"kind":"C"}                  完了
//! ```
//!
//! 1 本の結果パケットチャンネルで next / error / complete を多重化する。

#![no_std]
extern crate alloc;

pub mod capability;
pub mod envelope;
pub mod error;
pub mod message;

pub use capability::Capabilities;
pub use envelope::{ErrorPayload, Notification};
pub use error::ProtoError;
pub use message::{decode, encode, WireMessage};

/// ハンドシェイク（capability 確認）パケット専用の相関 ID
pub const HANDSHAKE_ID: i64 = -1;

/// 生存確認に対する公開側の固定応答値
pub const CHECK_OK_VALUE: &str = "OK";
