//! # rxbridge-transport
//!
//! トランスポート抽象化レイヤー。
//!
//! プロトコル本体（`rxbridge-session`）はトランスポートを知らない。
//! 具体的なトランスポート（ブラウザのソケット、ワーカーのメッセージチャンネル）は
//! `TransportPort` を実装し、次の 4 つを提供する：
//!
//! - 送信: `send(&WireMessage)`（ベストエフォート。失敗は呼び出し側でログに残して捨てる）
//! - 受信: `poll_event` が返す `TransportEvent::Message`（この接続宛てのものだけ）
//! - 接続状態: `is_connected()`（現在値）と `Connected` / `Disconnected` イベント
//! - ライフサイクル: `start(now_ms)`（冪等）
//!
//! ## ワイヤー上の形
//!
//! ```text
//! ソケット / ワーカー / メモリリンクのどれでも 1 メッセージ = 1 JSON テキスト
//! {"id":0,"method":"justComplete","data":[],"complete":false,"service":"first"}
//! ```
//!
//! ## 再接続
//!
//! 切断を検知したら一定間隔（500ms、指数バックオフなし）で再接続を試みる。

#![no_std]
extern crate alloc;

pub mod error;
pub mod memory;
pub mod port;
pub mod reconnect;
pub mod shared;

pub use error::TransportError;
pub use memory::MemoryTransport;
pub use port::{TransportEvent, TransportKind, TransportPort};
pub use reconnect::Reconnector;
pub use shared::{PortHub, SharedPort};

/// 再接続までの待ち時間（ミリ秒）。一定で、指数バックオフはしない
pub const RECONNECT_BACKOFF_MS: u64 = 500;
