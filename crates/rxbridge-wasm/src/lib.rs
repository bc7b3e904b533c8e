//! # rxbridge-wasm
//!
//! wasm-bindgen エクスポート：ブラウザのメインスレッド／ワーカーから呼び出す公開 API。
//!
//! ## 使用方法（TypeScript）
//!
//! ```typescript
//! import { BridgeClient, init_panic_hook } from '../rxbridge-wasm-pkg/rxbridge_wasm';
//!
//! // パニック時のスタックトレースを有効化（開発時）
//! init_panic_hook();
//!
//! const client = new BridgeClient("first", "socket", ["limitedWork"], ["counter"], []);
//!
//! let socket = new WebSocket(url);
//! socket.onopen = () => client.onOpen();
//! socket.onclose = () => client.onClose(Date.now());
//! socket.onmessage = (ev) => client.recvMessage(ev.data);
//!
//! const id = client.call("limitedWork", "[3]", Date.now());
//!
//! // 定期タイマー（50ms ごと）
//! setInterval(() => {
//!     for (const frame of client.tick(Date.now())) socket.send(frame);
//!     if (client.shouldReconnect(Date.now())) socket = reopen();
//!     console.log(JSON.parse(client.takeSignals(id)));
//! }, 50);
//! ```

use wasm_bindgen::prelude::*;

pub mod client;
pub mod port;

pub use client::BridgeClient;
pub use port::JsPort;

/// パニック時にブラウザコンソールにスタックトレースを出力する
///
/// 開発時に必ず呼び出すこと。本番ビルドでは feature flag で無効化可能。
#[wasm_bindgen]
pub fn init_panic_hook() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}
