//! 公開側サービスの登録（ディスパッチテーブル）
//!
//! 名前から呼び出しサンクまたはストリームアクセサへの対応表を、
//! 構築時に明示的な登録呼び出しで作る。以後は変更しない。

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;

use rxbridge_proto::{Capabilities, ErrorPayload};
use rxbridge_stream::BoxSource;
use serde_json::Value;
use tracing::warn;

/// メソッド呼び出しサンク（引数列 → ストリーム）
///
/// `Err` は同期的な呼び出し失敗。joint を作らず E パケット 1 つで返す。
pub type MethodThunk = Box<dyn Fn(&[Value]) -> Result<BoxSource, ErrorPayload>>;

/// 既存のストリームへのアクセサ
pub type PropertyAccessor = Box<dyn Fn() -> BoxSource>;

/// 1 つの名前付きサービス
///
/// ```ignore
/// let service = Service::new("first")
///     .method("justComplete", |_args| Ok(empty().boxed()))
///     .property("counter", move || counter.subscribe().boxed());
/// ```
pub struct Service {
    name: String,
    capabilities: Capabilities,
    methods: BTreeMap<String, MethodThunk>,
    properties: BTreeMap<String, PropertyAccessor>,
}

impl Service {
    pub fn new(name: &str) -> Self {
        Service {
            name: String::from(name),
            capabilities: Capabilities::new(),
            methods: BTreeMap::new(),
            properties: BTreeMap::new(),
        }
    }

    /// メソッドを登録する
    pub fn method(
        mut self,
        name: &str,
        thunk: impl Fn(&[Value]) -> Result<BoxSource, ErrorPayload> + 'static,
    ) -> Self {
        if self.methods.insert(String::from(name), Box::new(thunk)).is_some() {
            warn!(service = %self.name, method = name, "method registered twice, keeping the latest");
        } else {
            self.capabilities.methods.push(String::from(name));
        }
        self
    }

    /// プロパティを登録する
    pub fn property(mut self, name: &str, accessor: impl Fn() -> BoxSource + 'static) -> Self {
        if self.properties.insert(String::from(name), Box::new(accessor)).is_some() {
            warn!(service = %self.name, property = name, "property registered twice, keeping the latest");
        } else {
            self.capabilities.properties.push(String::from(name));
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// ハンドシェイクで返す capability（登録順）
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// メソッドを呼び出す。未登録なら `None`
    pub fn invoke(&self, method: &str, args: &[Value]) -> Option<Result<BoxSource, ErrorPayload>> {
        self.methods.get(method).map(|thunk| thunk(args))
    }

    /// プロパティのストリームを開く。未登録なら `None`
    pub fn open_property(&self, property: &str) -> Option<BoxSource> {
        self.properties.get(property).map(|accessor| accessor())
    }
}
