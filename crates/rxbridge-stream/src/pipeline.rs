//! ローカル変換パイプライン
//!
//! envelope を取り出した後、ローカル購読者に渡す前に適用する。
//! ワイヤー上には現れない。購読者ごとに新しいインスタンスを作る（take の状態を持つため）。

use alloc::boxed::Box;
use alloc::vec::Vec;

use rxbridge_proto::Notification;
use serde_json::Value;

/// パイプラインの 1 段
pub trait Operator {
    /// シグナルを 1 つ受け取り、下流に流すシグナルを `out` に積む
    fn apply(&mut self, notification: Notification, out: &mut Vec<Notification>);
}

struct Map<F>(F);

impl<F: FnMut(Value) -> Value> Operator for Map<F> {
    fn apply(&mut self, notification: Notification, out: &mut Vec<Notification>) {
        match notification {
            Notification::Next { value } => out.push(Notification::next((self.0)(value))),
            terminal => out.push(terminal),
        }
    }
}

struct Filter<F>(F);

impl<F: FnMut(&Value) -> bool> Operator for Filter<F> {
    fn apply(&mut self, notification: Notification, out: &mut Vec<Notification>) {
        match &notification {
            Notification::Next { value } if !(self.0)(value) => {}
            _ => out.push(notification),
        }
    }
}

struct Take {
    remaining: usize,
    done: bool,
}

impl Operator for Take {
    fn apply(&mut self, notification: Notification, out: &mut Vec<Notification>) {
        if self.done {
            return;
        }
        if self.remaining == 0 || notification.is_terminal() {
            self.done = true;
            out.push(if notification.is_terminal() { notification } else { Notification::Complete });
            return;
        }
        self.remaining -= 1;
        out.push(notification);
        if self.remaining == 0 {
            self.done = true;
            out.push(Notification::Complete);
        }
    }
}

/// オペレーターの連鎖
#[derive(Default)]
pub struct Pipeline {
    ops: Vec<Box<dyn Operator>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Pipeline { ops: Vec::new() }
    }

    /// 値を変換する
    pub fn map(self, f: impl FnMut(Value) -> Value + 'static) -> Self {
        self.then(Map(f))
    }

    /// 条件を満たす値だけを通す
    pub fn filter(self, f: impl FnMut(&Value) -> bool + 'static) -> Self {
        self.then(Filter(f))
    }

    /// 最初の `count` 個の値だけを通して完了する
    pub fn take(self, count: usize) -> Self {
        self.then(Take { remaining: count, done: false })
    }

    /// 任意のオペレーターを追加する
    pub fn then(mut self, op: impl Operator + 'static) -> Self {
        self.ops.push(Box::new(op));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// シグナルを全段に通す
    pub fn apply(&mut self, notification: Notification) -> Vec<Notification> {
        let mut current = alloc::vec![notification];
        for op in self.ops.iter_mut() {
            let mut next = Vec::with_capacity(current.len());
            for signal in current {
                op.apply(signal, &mut next);
            }
            current = next;
        }
        current
    }
}
