//! capability セット（ハンドシェイク応答の `data`）

use alloc::string::String;
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtoError;

/// 公開側サービスが登録しているメソッド名とプロパティ名
///
/// 登録順を保持する。ハンドシェイク時に一度だけ問い合わせられる。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// 公開プロパティ名
    #[serde(default)]
    pub properties: Vec<String>,
    /// 公開メソッド名
    #[serde(default)]
    pub methods: Vec<String>,
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.iter().any(|m| m == name)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties.iter().any(|p| p == name)
    }

    /// ハンドシェイク応答の `data` から capability を取り出す
    pub fn from_value(value: &Value) -> Result<Self, ProtoError> {
        Capabilities::deserialize(value).map_err(|e| ProtoError::MalformedPayload {
            field: "capabilities",
            reason: alloc::format!("{}", e),
        })
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "properties": self.properties,
            "methods": self.methods,
        })
    }
}
