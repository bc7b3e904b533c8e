//! 一定間隔の再接続スケジューラ

/// 切断後、一定時間待ってから再接続を 1 回試みるためのタイマー
///
/// 指数バックオフはしない。切断のたびに同じ間隔で再スケジュールされる。
#[derive(Debug, Clone)]
pub struct Reconnector {
    /// 再接続までの待ち時間（ミリ秒）
    backoff_ms: u64,
    /// 次に再接続を試みる時刻
    retry_at_ms: Option<u64>,
    /// これまでの再接続試行回数（統計用）
    attempts: u32,
}

impl Reconnector {
    pub fn new(backoff_ms: u64) -> Self {
        Reconnector {
            backoff_ms,
            retry_at_ms: None,
            attempts: 0,
        }
    }

    /// 切断を通知する。既に予約済みなら予約時刻は変えない
    pub fn on_close(&mut self, now_ms: u64) {
        if self.retry_at_ms.is_none() {
            self.retry_at_ms = Some(now_ms + self.backoff_ms);
        }
    }

    /// 再接続すべき時刻になったら true を返し、予約を消す
    pub fn poll(&mut self, now_ms: u64) -> bool {
        match self.retry_at_ms {
            Some(at) if now_ms >= at => {
                self.retry_at_ms = None;
                self.attempts += 1;
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.retry_at_ms.is_some()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RECONNECT_BACKOFF_MS;

    #[test]
    fn test_constant_backoff() {
        let mut r = Reconnector::new(RECONNECT_BACKOFF_MS);
        assert!(!r.poll(10_000));

        r.on_close(1000);
        assert!(r.is_pending());
        assert!(!r.poll(1499));
        assert!(r.poll(1500));
        assert!(!r.is_pending());

        // 2 回目の切断も同じ間隔
        r.on_close(2000);
        assert!(!r.poll(2499));
        assert!(r.poll(2500));
        assert_eq!(r.attempts(), 2);
    }

    #[test]
    fn test_repeated_close_keeps_first_schedule() {
        let mut r = Reconnector::new(500);
        r.on_close(0);
        r.on_close(300);
        assert!(r.poll(500));
    }
}
