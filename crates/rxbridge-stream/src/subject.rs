//! ホットなマルチキャスト源（リプレイなし）

use alloc::collections::VecDeque;
use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;
use core::cell::RefCell;

use rxbridge_proto::{ErrorPayload, Notification};
use serde_json::Value;

use crate::source::Source;

type Queue = Rc<RefCell<VecDeque<Notification>>>;

struct SubjectState {
    /// 購読中の受信キュー（受信側が drop されると自然に消える）
    receivers: Vec<Weak<RefCell<VecDeque<Notification>>>>,
    /// 終端済みならそのシグナル
    terminal: Option<Notification>,
}

/// 公開側のプロパティに使うホットなストリーム
///
/// `next` した時点で購読している受信側にだけ値が届く。
/// 終端後に購読した受信側には終端シグナルだけがすぐ届く。
#[derive(Clone)]
pub struct Subject {
    state: Rc<RefCell<SubjectState>>,
}

impl Subject {
    pub fn new() -> Self {
        Subject {
            state: Rc::new(RefCell::new(SubjectState {
                receivers: Vec::new(),
                terminal: None,
            })),
        }
    }

    pub fn next(&self, value: Value) {
        self.emit(Notification::next(value));
    }

    pub fn error(&self, error: ErrorPayload) {
        self.emit(Notification::error(error));
    }

    pub fn complete(&self) {
        self.emit(Notification::Complete);
    }

    fn emit(&self, notification: Notification) {
        let mut state = self.state.borrow_mut();
        if state.terminal.is_some() {
            return;
        }
        state.receivers.retain(|weak| match weak.upgrade() {
            Some(queue) => {
                queue.borrow_mut().push_back(notification.clone());
                true
            }
            None => false,
        });
        if notification.is_terminal() {
            state.terminal = Some(notification);
            state.receivers.clear();
        }
    }

    /// 新しい受信側を作る
    pub fn subscribe(&self) -> SubjectReceiver {
        let queue: Queue = Rc::new(RefCell::new(VecDeque::new()));
        let mut state = self.state.borrow_mut();
        if let Some(terminal) = state.terminal.clone() {
            queue.borrow_mut().push_back(terminal);
        } else {
            state.receivers.push(Rc::downgrade(&queue));
        }
        SubjectReceiver { queue }
    }

    /// 生きている受信側の数
    pub fn observer_count(&self) -> usize {
        self.state
            .borrow()
            .receivers
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_terminated(&self) -> bool {
        self.state.borrow().terminal.is_some()
    }
}

impl Default for Subject {
    fn default() -> Self {
        Self::new()
    }
}

/// `Subject` の受信側
pub struct SubjectReceiver {
    queue: Queue,
}

impl Source for SubjectReceiver {
    fn poll_signal(&mut self, _now_ms: u64) -> Option<Notification> {
        self.queue.borrow_mut().pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_late_subscriber_misses_earlier_values() {
        let subject = Subject::new();
        let mut first = subject.subscribe();
        subject.next(json!(1));
        let mut second = subject.subscribe();
        subject.next(json!(2));

        assert_eq!(first.poll_signal(0), Some(Notification::next(json!(1))));
        assert_eq!(first.poll_signal(0), Some(Notification::next(json!(2))));
        assert_eq!(second.poll_signal(0), Some(Notification::next(json!(2))));
        assert_eq!(second.poll_signal(0), None);
    }

    #[test]
    fn test_subscribe_after_complete() {
        let subject = Subject::new();
        subject.complete();
        let mut rx = subject.subscribe();
        assert_eq!(rx.poll_signal(0), Some(Notification::Complete));
        assert_eq!(subject.observer_count(), 0);
    }

    #[test]
    fn test_dropped_receiver_not_counted() {
        let subject = Subject::new();
        let rx = subject.subscribe();
        let _keep = subject.subscribe();
        assert_eq!(subject.observer_count(), 2);
        drop(rx);
        assert_eq!(subject.observer_count(), 1);
    }

    #[test]
    fn test_nothing_after_error() {
        let subject = Subject::new();
        let mut rx = subject.subscribe();
        subject.error(ErrorPayload::new("x"));
        subject.next(json!(1));
        assert!(rx.poll_signal(0).unwrap().is_terminal());
        assert_eq!(rx.poll_signal(0), None);
    }
}
