//! # rxbridge-stream
//!
//! ローカルストリームの抽象化レイヤー
//!
//! rxbridge はリモートのメソッド呼び出し・プロパティ購読を
//! 「値の列 + 終端シグナル」として扱う。このクレートはその両端を提供する。
//!
//! ## 呼び出し側
//!
//! ```text
//!   1. bridge が結果パケットを受信し envelope を取り出す
//!   2. LocalStream::push(notification)（必要ならパイプラインを通す）
//!   3. アプリケーションが LocalStream::try_next() / drain() で読み出す
//! ```
//!
//! ## 公開側
//!
//! ```text
//!   1. メソッドのサンクが BoxSource を返す（of / interval / Subject::subscribe ...）
//!   2. host が tick ごとに Source::poll_signal(now_ms) で値を引き出す
//!   3. 各シグナルを envelope に包んで送信する
//! ```
//!
//! すべて単一スレッド前提（WASM / イベントループ）。`Rc` + `RefCell` で共有する。

#![no_std]
extern crate alloc;

pub mod channel;
pub mod pipeline;
pub mod source;
pub mod subject;

pub use channel::LocalStream;
pub use pipeline::{Operator, Pipeline};
pub use source::{empty, from_fn, interval, never, of, throw_error, timer, BoxSource, Source, SourceExt};
pub use subject::{Subject, SubjectReceiver};

pub use rxbridge_proto::{ErrorPayload, Notification};
