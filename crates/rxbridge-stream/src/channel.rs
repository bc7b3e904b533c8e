//! 呼び出し側のローカルストリーム

use alloc::collections::VecDeque;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;

use rxbridge_proto::Notification;
use serde_json::Value;

use crate::pipeline::Pipeline;

struct Inbox {
    /// 未読シグナル
    queue: VecDeque<Notification>,
    /// ローカル変換（property 宣言時のオペレーター）
    pipeline: Option<Pipeline>,
    /// 終端シグナルを受け取ったか
    terminated: bool,
    /// 受け取った値の総数（統計用）
    total_values: u64,
}

/// ローカル購読者 1 人分のストリーム
///
/// bridge が envelope を積み、アプリケーションが読み出す。
/// 終端シグナル（error / complete）を積んだ後は何も受け付けない。
///
/// クローンは同じバッファを共有する。
#[derive(Clone)]
pub struct LocalStream {
    inner: Rc<RefCell<Inbox>>,
}

impl LocalStream {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// ローカル変換付きのストリームを作る
    pub fn with_pipeline(pipeline: Pipeline) -> Self {
        Self::build(Some(pipeline))
    }

    fn build(pipeline: Option<Pipeline>) -> Self {
        LocalStream {
            inner: Rc::new(RefCell::new(Inbox {
                queue: VecDeque::new(),
                pipeline,
                terminated: false,
                total_values: 0,
            })),
        }
    }

    /// シグナルを積む
    ///
    /// # 戻り値
    /// 受け付けたら true。既に終端済みなら false（破棄）。
    pub fn push(&self, notification: Notification) -> bool {
        let mut inbox = self.inner.borrow_mut();
        if inbox.terminated {
            return false;
        }

        let signals = match inbox.pipeline.as_mut() {
            Some(pipeline) => pipeline.apply(notification),
            None => alloc::vec![notification],
        };

        for signal in signals {
            if inbox.terminated {
                break;
            }
            match &signal {
                Notification::Next { .. } => inbox.total_values += 1,
                _ => inbox.terminated = true,
            }
            inbox.queue.push_back(signal);
        }
        true
    }

    /// 次のシグナルを 1 つ取り出す
    pub fn try_next(&self) -> Option<Notification> {
        self.inner.borrow_mut().queue.pop_front()
    }

    /// 未読シグナルをすべて取り出す
    pub fn drain(&self) -> Vec<Notification> {
        self.inner.borrow_mut().queue.drain(..).collect()
    }

    /// 未読の値だけを取り出す（終端シグナルは残す）
    pub fn drain_values(&self) -> Vec<Value> {
        let mut inbox = self.inner.borrow_mut();
        let mut values = Vec::new();
        while let Some(Notification::Next { .. }) = inbox.queue.front() {
            if let Some(Notification::Next { value }) = inbox.queue.pop_front() {
                values.push(value);
            }
        }
        values
    }

    /// 終端シグナルを受け取ったか
    pub fn is_terminated(&self) -> bool {
        self.inner.borrow().terminated
    }

    /// 未読シグナルがあるか
    pub fn has_pending(&self) -> bool {
        !self.inner.borrow().queue.is_empty()
    }

    /// 受け取った値の総数（統計用）
    pub fn total_values(&self) -> u64 {
        self.inner.borrow().total_values
    }
}

impl Default for LocalStream {
    fn default() -> Self {
        Self::new()
    }
}
