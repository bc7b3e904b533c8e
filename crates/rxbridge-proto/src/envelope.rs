//! Materialized envelope（結果パケットの `data`）
//!
//! ストリームの next / error / complete を 1 つのタグ付き値で表す。

use alloc::string::{String, ToString};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtoError;

/// シリアライズ済みエラー
///
/// `message` に加えて、エラーが持っていた全ての own property を保持する。
/// クラス（プロトタイプ）の同一性は失われる。これは既知の非可逆境界。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// エラーメッセージ
    #[serde(default)]
    pub message: String,
    /// message 以外の own property（name, stack, code など）
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl ErrorPayload {
    /// メッセージのみのエラーを作る
    pub fn new(message: impl Into<String>) -> Self {
        ErrorPayload {
            message: message.into(),
            properties: Map::new(),
        }
    }

    /// `name` プロパティ付きのエラーを作る
    pub fn named(name: &str, message: impl Into<String>) -> Self {
        Self::new(message).with_property("name", Value::String(name.to_string()))
    }

    /// own property を追加する
    pub fn with_property(mut self, key: &str, value: Value) -> Self {
        self.properties.insert(key.to_string(), value);
        self
    }

    /// `Display` を実装する任意のエラーから作る
    pub fn from_display(name: &str, err: &impl core::fmt::Display) -> Self {
        Self::named(name, alloc::format!("{}", err))
    }

    pub fn name(&self) -> Option<&str> {
        self.properties.get("name").and_then(Value::as_str)
    }
}

impl core::fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}: {}", name, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// ストリームのシグナル 1 つを表す envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Notification {
    /// 値
    #[serde(rename = "N")]
    Next {
        #[serde(default)]
        value: Value,
    },
    /// エラー終了
    #[serde(rename = "E")]
    Error { error: ErrorPayload },
    /// 正常終了
    #[serde(rename = "C")]
    Complete,
}

impl Notification {
    pub fn next(value: Value) -> Self {
        Notification::Next { value }
    }

    pub fn error(error: ErrorPayload) -> Self {
        Notification::Error { error }
    }

    /// ストリームを終わらせるシグナルか（error / complete）
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Notification::Next { .. })
    }

    /// 結果パケットの `data` から envelope を取り出す
    pub fn from_value(value: &Value) -> Result<Self, ProtoError> {
        Notification::deserialize(value).map_err(|e| ProtoError::MalformedPayload {
            field: "envelope",
            reason: alloc::format!("{}", e),
        })
    }

    pub fn to_value(&self) -> Value {
        match self {
            Notification::Next { value } => serde_json::json!({ "kind": "N", "value": value }),
            Notification::Error { error } => serde_json::json!({ "kind": "E", "error": error }),
            Notification::Complete => serde_json::json!({ "kind": "C" }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_wire_shape() {
        assert_eq!(Notification::next(json!(1)).to_value(), json!({"kind": "N", "value": 1}));
        assert_eq!(Notification::Complete.to_value(), json!({"kind": "C"}));
        assert_eq!(
            Notification::error(ErrorPayload::new("boom")).to_value(),
            json!({"kind": "E", "error": {"message": "boom"}})
        );
    }

    #[test]
    fn test_decode_tolerates_extra_fields() {
        // rxjs の Notification は hasValue などの余分なフィールドを持つ
        let n = Notification::from_value(&json!({"kind": "N", "value": "x", "hasValue": true})).unwrap();
        assert_eq!(n, Notification::next(json!("x")));

        let c = Notification::from_value(&json!({"kind": "C", "hasValue": false})).unwrap();
        assert_eq!(c, Notification::Complete);
    }

    #[test]
    fn test_error_keeps_own_properties() {
        // カスタムプロパティ付きエラーの往復で message と全プロパティが保たれる
        let original = ErrorPayload::named("ValidationError", "bad input")
            .with_property("code", json!(422))
            .with_property("fields", json!(["name", "age"]));

        let wire = serde_json::to_string(&Notification::error(original.clone())).unwrap();
        let decoded = Notification::from_value(&serde_json::from_str::<Value>(&wire).unwrap()).unwrap();

        match decoded {
            Notification::Error { error } => {
                assert_eq!(error.message, "bad input");
                assert_eq!(error.name(), Some("ValidationError"));
                assert_eq!(error.properties.get("code"), Some(&json!(422)));
                assert_eq!(error, original);
            }
            other => panic!("エラー envelope であるべき: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let result = Notification::from_value(&json!({"kind": "X"}));
        assert!(matches!(result, Err(ProtoError::MalformedPayload { field: "envelope", .. })));
    }

    #[test]
    fn test_is_terminal() {
        assert!(!Notification::next(json!(null)).is_terminal());
        assert!(Notification::Complete.is_terminal());
        assert!(Notification::error(ErrorPayload::new("e")).is_terminal());
    }
}
