//! # rxbridge-session
//!
//! 多重化された双方向ストリーミング RPC のコア状態機械。
//!
//! ## 構成
//!
//! - **Bridge**（呼び出し側）: 相関 ID の払い出し、ハンドシェイクによる送信ゲート、
//!   受信パケットの振り分け、ローカル購読の開始/解除 ↔ リモートストリームの開始/停止
//! - **Host**（公開側）: プローブへの capability 応答、開始パケットのディスパッチ、
//!   キャンセル・切断時の後始末、joint の記録
//! - **HealthMonitor**: アクティブなリモートストリーム（joint）の一覧
//!
//! ## 呼び出し 1 件の状態遷移（呼び出し側）
//!
//! ```text
//! AwaitingTransport → AwaitingHandshake → Sent → Streaming → Completed
//!         ↑                   │                     │       → Errored
//!         └──── 切断 ─────────┘                     │       → Cancelled
//!                                  切断 → Errored ←──┘
//! ```
//!
//! どちらの側もソケットやタイマーを持たない。時刻は `now_ms` で注入し、
//! `tick(now_ms)` とトランスポートイベントで進める。

#![no_std]
extern crate alloc;

pub mod bridge;
pub mod config;
pub mod error;
pub mod handshake;
pub mod health;
pub mod host;
pub mod registry;

pub use bridge::{Bridge, BridgeBuilder, BridgeStats, CallPhase, Readiness, SubscriberId, Subscription};
pub use config::BridgeConfig;
pub use error::{BridgeError, ConfigError, HandshakeError, HostError};
pub use handshake::{Handshake, HandshakeState};
pub use health::{HealthMonitor, HealthStatus, Joint};
pub use host::{AccessPolicy, AllowAll, Host};
pub use registry::Service;

pub use rxbridge_transport::RECONNECT_BACKOFF_MS;

/// ハンドシェイクのプローブ送信間隔（ミリ秒）
pub const PROBE_INTERVAL_MS: u64 = 100;

/// ソケット（外部向け）のハンドシェイクタイムアウト（ミリ秒）
pub const SOCKET_HANDSHAKE_TIMEOUT_MS: u64 = 5000;

/// ワーカー（プロセス内）のハンドシェイクタイムアウト（ミリ秒）
pub const WORKER_HANDSHAKE_TIMEOUT_MS: u64 = 50;

/// 公開側が 1 回の tick で 1 つの呼び出しから送るシグナルの上限
pub const MAX_SIGNALS_PER_TICK: usize = 64;
