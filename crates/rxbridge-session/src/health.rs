//! Joint レジストリ（ヘルスモニター）
//!
//! 現在アクティブなリモートストリームを 1 件 1 joint として記録する。
//! 観測専用で、ストリームのライフサイクルには一切影響しない。
//!
//! ## 集計の形（`checkHealth` の JSON）
//!
//! ```text
//! {
//!   "totalJointAmount": 2,
//!   "socketJointAmount": 2,
//!   "workerJointAmount": 0,
//!   "socketServiceJoints": { "first": { "_total": 2, "limitedWork": 1, "counter": 1 } },
//!   "workerServiceJoints": {}
//! }
//! ```

use alloc::collections::BTreeMap;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::RefCell;

use rxbridge_transport::TransportKind;
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

/// サービスごとの合計を入れるキー
pub const TOTAL_KEY: &str = "_total";

/// アクティブなリモートストリーム 1 件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Joint {
    /// 公開側の接続番号（同じ相関 ID を使う複数クライアントを区別する）
    pub connection: u32,
    /// 相関 ID
    pub id: i64,
    /// トランスポート種別
    #[serde(rename = "type")]
    pub kind: TransportKind,
    pub service: String,
    /// メソッド名またはプロパティ名
    pub target: String,
}

impl Joint {
    fn matches(&self, connection: u32, service: &str, id: i64, kind: TransportKind) -> bool {
        self.connection == connection && self.id == id && self.kind == kind && self.service == service
    }
}

/// `check_health` のスナップショット
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub total_joint_amount: usize,
    pub socket_joint_amount: usize,
    pub worker_joint_amount: usize,
    /// サービス → メソッド/プロパティ → 件数（`_total` を含む）
    pub socket_service_joints: BTreeMap<String, BTreeMap<String, usize>>,
    pub worker_service_joints: BTreeMap<String, BTreeMap<String, usize>>,
}

/// プロセス内で共有する joint レジストリ
///
/// クローンは同じ表を共有する。複数の `Host` に同じものを渡して使う。
#[derive(Debug, Clone, Default)]
pub struct HealthMonitor {
    joints: Rc<RefCell<Vec<Joint>>>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// joint を追加する
    ///
    /// 同じ `(connection, service, id, type)` の joint が既にあれば追加せず false を返す。
    pub fn add_joint(&self, joint: Joint) -> bool {
        let mut joints = self.joints.borrow_mut();
        if joints
            .iter()
            .any(|j| j.matches(joint.connection, &joint.service, joint.id, joint.kind))
        {
            warn!(id = joint.id, service = %joint.service, "joint already registered");
            return false;
        }
        trace!(id = joint.id, service = %joint.service, member = %joint.target, "add joint");
        joints.push(joint);
        true
    }

    /// 最初に一致した joint を 1 件取り除く。なければ何もしない
    pub fn remove_joint(&self, connection: u32, service: &str, id: i64, kind: TransportKind) -> bool {
        let mut joints = self.joints.borrow_mut();
        match joints.iter().position(|j| j.matches(connection, service, id, kind)) {
            Some(index) => {
                let joint = joints.remove(index);
                trace!(id, service = %joint.service, member = %joint.target, "remove joint");
                true
            }
            None => false,
        }
    }

    pub fn joint_count(&self) -> usize {
        self.joints.borrow().len()
    }

    /// 現在の joint 一覧のコピー
    pub fn joints(&self) -> Vec<Joint> {
        self.joints.borrow().clone()
    }

    /// 集計を作る
    pub fn check_health(&self) -> HealthStatus {
        let mut status = HealthStatus::default();
        for joint in self.joints.borrow().iter() {
            status.total_joint_amount += 1;
            let per_service = match joint.kind {
                TransportKind::Socket => {
                    status.socket_joint_amount += 1;
                    &mut status.socket_service_joints
                }
                TransportKind::Worker => {
                    status.worker_joint_amount += 1;
                    &mut status.worker_service_joints
                }
            };
            let counts = per_service.entry(joint.service.clone()).or_default();
            *counts.entry(String::from(TOTAL_KEY)).or_insert(0) += 1;
            *counts.entry(joint.target.clone()).or_insert(0) += 1;
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn joint(connection: u32, id: i64, kind: TransportKind, target: &str) -> Joint {
        Joint {
            connection,
            id,
            kind,
            service: "first".into(),
            target: target.into(),
        }
    }

    #[test]
    fn test_health_snapshot_shape() {
        let monitor = HealthMonitor::new();
        monitor.add_joint(joint(0, 0, TransportKind::Socket, "limitedWork"));
        monitor.add_joint(joint(0, 1, TransportKind::Socket, "counter"));
        monitor.add_joint(joint(1, 0, TransportKind::Worker, "counter"));

        let value = serde_json::to_value(monitor.check_health()).unwrap();
        assert_eq!(
            value,
            json!({
                "totalJointAmount": 3,
                "socketJointAmount": 2,
                "workerJointAmount": 1,
                "socketServiceJoints": {"first": {"_total": 2, "limitedWork": 1, "counter": 1}},
                "workerServiceJoints": {"first": {"_total": 1, "counter": 1}},
            })
        );
    }

    #[test]
    fn test_remove_is_idempotent() {
        let monitor = HealthMonitor::new();
        monitor.add_joint(joint(0, 5, TransportKind::Socket, "x"));
        assert!(monitor.remove_joint(0, "first", 5, TransportKind::Socket));
        assert!(!monitor.remove_joint(0, "first", 5, TransportKind::Socket));
        assert_eq!(monitor.check_health(), HealthStatus::default());
    }

    #[test]
    fn test_same_id_different_connection_does_not_collide() {
        let monitor = HealthMonitor::new();
        assert!(monitor.add_joint(joint(0, 0, TransportKind::Socket, "x")));
        assert!(monitor.add_joint(joint(1, 0, TransportKind::Socket, "x")));
        assert!(!monitor.add_joint(joint(1, 0, TransportKind::Socket, "x")));
        assert_eq!(monitor.joint_count(), 2);
    }
}
