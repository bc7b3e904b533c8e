//! 公開側のストリーム源
//!
//! host は tick ごとに `poll_signal(now_ms)` を `None` が返るまで呼び出す。
//! 終端シグナルを返した後のソースは二度とポーリングされない。

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::vec::Vec;

use rxbridge_proto::{ErrorPayload, Notification};
use serde_json::Value;

/// ポーリング型のストリーム源
///
/// 毎回 `Some` を返し続けるソースもありうる。host は 1 回の tick で読む数に上限を設ける。
pub trait Source {
    /// 今すぐ出せるシグナルを 1 つ返す。なければ `None`
    fn poll_signal(&mut self, now_ms: u64) -> Option<Notification>;
}

/// 型消去したストリーム源
pub type BoxSource = Box<dyn Source>;

impl<S: Source + ?Sized> Source for Box<S> {
    fn poll_signal(&mut self, now_ms: u64) -> Option<Notification> {
        (**self).poll_signal(now_ms)
    }
}

/// ソースの組み合わせ
pub trait SourceExt: Source + Sized {
    /// 最初の `count` 個の値を出して完了する
    fn take(self, count: usize) -> Take<Self> {
        Take { inner: self, remaining: count, done: false }
    }

    fn boxed(self) -> BoxSource
    where
        Self: 'static,
    {
        Box::new(self)
    }
}

impl<S: Source> SourceExt for S {}

/// 値を順に出して完了する
pub struct Of {
    items: VecDeque<Value>,
    done: bool,
}

impl Source for Of {
    fn poll_signal(&mut self, _now_ms: u64) -> Option<Notification> {
        if self.done {
            return None;
        }
        match self.items.pop_front() {
            Some(value) => Some(Notification::next(value)),
            None => {
                self.done = true;
                Some(Notification::Complete)
            }
        }
    }
}

/// `values` を順に出して完了するソース
pub fn of(values: Vec<Value>) -> Of {
    Of { items: values.into(), done: false }
}

/// 値を出さずに即完了するソース
pub fn empty() -> Of {
    of(Vec::new())
}

/// 即座にエラーで終わる
pub struct ThrowError(Option<ErrorPayload>);

impl Source for ThrowError {
    fn poll_signal(&mut self, _now_ms: u64) -> Option<Notification> {
        self.0.take().map(Notification::error)
    }
}

pub fn throw_error(error: ErrorPayload) -> ThrowError {
    ThrowError(Some(error))
}

/// 何も出さず終わりもしない
pub struct Never;

impl Source for Never {
    fn poll_signal(&mut self, _now_ms: u64) -> Option<Notification> {
        None
    }
}

pub fn never() -> Never {
    Never
}

/// `period_ms` ごとに 0, 1, 2, ... を出し続ける
///
/// 最初のポーリング時刻を起点とする。期限を過ぎた分は連続したポーリングで追いつく。
pub struct Interval {
    period_ms: u64,
    next_due_ms: Option<u64>,
    count: u64,
}

impl Source for Interval {
    fn poll_signal(&mut self, now_ms: u64) -> Option<Notification> {
        let due = *self.next_due_ms.get_or_insert(now_ms + self.period_ms);
        if now_ms < due {
            return None;
        }
        self.next_due_ms = Some(due + self.period_ms.max(1));
        let value = self.count;
        self.count += 1;
        Some(Notification::next(Value::from(value)))
    }
}

pub fn interval(period_ms: u64) -> Interval {
    Interval { period_ms, next_due_ms: None, count: 0 }
}

/// `delay_ms` 後に 0 を出して完了する
pub struct Timer {
    delay_ms: u64,
    due_ms: Option<u64>,
    fired: bool,
    done: bool,
}

impl Source for Timer {
    fn poll_signal(&mut self, now_ms: u64) -> Option<Notification> {
        if self.done {
            return None;
        }
        let due = *self.due_ms.get_or_insert(now_ms + self.delay_ms);
        if now_ms < due {
            return None;
        }
        if !self.fired {
            self.fired = true;
            return Some(Notification::next(Value::from(0u64)));
        }
        self.done = true;
        Some(Notification::Complete)
    }
}

pub fn timer(delay_ms: u64) -> Timer {
    Timer { delay_ms, due_ms: None, fired: false, done: false }
}

/// クロージャをソースとして使う
pub struct FromFn<F>(F);

impl<F: FnMut(u64) -> Option<Notification>> Source for FromFn<F> {
    fn poll_signal(&mut self, now_ms: u64) -> Option<Notification> {
        (self.0)(now_ms)
    }
}

pub fn from_fn<F: FnMut(u64) -> Option<Notification>>(f: F) -> FromFn<F> {
    FromFn(f)
}

/// `SourceExt::take` の戻り値
pub struct Take<S> {
    inner: S,
    remaining: usize,
    done: bool,
}

impl<S: Source> Source for Take<S> {
    fn poll_signal(&mut self, now_ms: u64) -> Option<Notification> {
        if self.done {
            return None;
        }
        if self.remaining == 0 {
            self.done = true;
            return Some(Notification::Complete);
        }
        let signal = self.inner.poll_signal(now_ms)?;
        if signal.is_terminal() {
            self.done = true;
        } else {
            self.remaining -= 1;
        }
        Some(signal)
    }
}
