//! WireMessage と JSON コーデック

use alloc::string::String;
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::capability::Capabilities;
use crate::envelope::Notification;
use crate::error::ProtoError;
use crate::{CHECK_OK_VALUE, HANDSHAKE_ID};

/// 全トランスポート共通のパケット
///
/// ソケットでもワーカーチャンネルでも同じ JSON 構造になる（バイト単位で等価）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    /// 相関 ID（`-1` はハンドシェイク専用）
    pub id: i64,
    /// 呼び出すメソッド名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// 購読するプロパティ名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
    /// 引数列 / envelope / capability リスト
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// キャンセル（呼び出し側→公開側）または終了（公開側→呼び出し側）
    #[serde(default)]
    pub complete: bool,
    /// サービス名前空間
    pub service: String,
    /// 生存確認フラグ
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_check: Option<bool>,
}

impl WireMessage {
    fn bare(id: i64, service: &str) -> Self {
        WireMessage {
            id,
            method: None,
            property: None,
            data: None,
            complete: false,
            service: String::from(service),
            is_check: None,
        }
    }

    /// ハンドシェイクのプローブ（`id=-1, complete=true`）
    pub fn probe(service: &str) -> Self {
        WireMessage {
            complete: true,
            ..Self::bare(HANDSHAKE_ID, service)
        }
    }

    /// プローブへの capability 応答
    pub fn capability_reply(service: &str, caps: &Capabilities) -> Self {
        WireMessage {
            data: Some(caps.to_value()),
            complete: true,
            ..Self::bare(HANDSHAKE_ID, service)
        }
    }

    /// メソッド呼び出しの開始パケット
    pub fn start_method(id: i64, service: &str, method: &str, args: Vec<Value>) -> Self {
        WireMessage {
            method: Some(String::from(method)),
            data: Some(Value::Array(args)),
            ..Self::bare(id, service)
        }
    }

    /// プロパティ購読の開始パケット
    pub fn start_property(id: i64, service: &str, property: &str) -> Self {
        WireMessage {
            property: Some(String::from(property)),
            ..Self::bare(id, service)
        }
    }

    /// キャンセルパケット（`complete=true`、同じ ID）
    pub fn cancel(id: i64, service: &str, method: Option<&str>, property: Option<&str>) -> Self {
        WireMessage {
            method: method.map(String::from),
            property: property.map(String::from),
            complete: true,
            ..Self::bare(id, service)
        }
    }

    /// 結果パケット。`complete` は終端パケットのときだけ true
    pub fn result(request: &WireMessage, notification: &Notification, complete: bool) -> Self {
        WireMessage {
            method: request.method.clone(),
            property: request.property.clone(),
            data: Some(notification.to_value()),
            complete,
            ..Self::bare(request.id, &request.service)
        }
    }

    /// 生存確認への応答（"OK" + 終了）
    pub fn check_ok(request: &WireMessage) -> Self {
        Self::result(
            request,
            &Notification::next(Value::String(String::from(CHECK_OK_VALUE))),
            true,
        )
    }

    pub fn is_handshake(&self) -> bool {
        self.id == HANDSHAKE_ID
    }

    pub fn is_check(&self) -> bool {
        self.is_check.unwrap_or(false)
    }

    /// method / property のどちらか設定されている方の名前
    pub fn target_name(&self) -> Option<&str> {
        self.method.as_deref().or(self.property.as_deref())
    }

    /// 開始パケットの引数列（`data` が配列でなければ空）
    pub fn args(&self) -> Vec<Value> {
        match &self.data {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        }
    }

    /// 結果パケットの envelope を取り出す
    pub fn notification(&self) -> Result<Option<Notification>, ProtoError> {
        match &self.data {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Notification::from_value(value).map(Some),
        }
    }

    /// ハンドシェイク応答の capability を取り出す
    pub fn capabilities(&self) -> Result<Capabilities, ProtoError> {
        match &self.data {
            Some(value) => Capabilities::from_value(value),
            None => Err(ProtoError::MalformedPayload {
                field: "capabilities",
                reason: String::from("missing data"),
            }),
        }
    }
}

/// WireMessage を JSON 文字列にエンコードする
pub fn encode(msg: &WireMessage) -> Result<String, ProtoError> {
    serde_json::to_string(msg).map_err(|e| ProtoError::EncodeFailed(alloc::format!("{}", e)))
}

/// JSON 文字列から WireMessage をデコードする
///
/// # エラー
/// - `ProtoError::DecodeFailed`: JSON として不正、または `id` / `service` が欠落
pub fn decode(text: &str) -> Result<WireMessage, ProtoError> {
    serde_json::from_str(text).map_err(|e| ProtoError::DecodeFailed(alloc::format!("{}", e)))
}
