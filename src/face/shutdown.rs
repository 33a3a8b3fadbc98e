//! Face당 종료 신호 + 태스크 join
//!
//! 송신 루프, 수신 루프, 만료 검사 태스크가 하나의 신호를 구독한다.
//! 종료 순서: `signal_stop()` -> `join_all().await`

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct ShutdownToken {
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            stop_tx,
            stop_rx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// 종료 신호 구독
    ///
    /// `tokio::select!`에서 `rx.changed()`로 기다린다.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.stop_rx.clone()
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_rx.borrow()
    }

    /// 종료 신호 (여러 번 호출해도 무방)
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub fn add_task(&self, handle: JoinHandle<()>) {
        self.tasks.lock().push(handle);
    }

    pub fn task_count(&self) -> usize {
        self.tasks.lock().len()
    }

    /// 등록된 태스크 전부 대기
    pub async fn join_all(&self) {
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_stop_visible_to_subscribers() {
        let token = ShutdownToken::new();
        let rx = token.subscribe();
        assert!(!*rx.borrow());

        token.signal_stop();
        token.signal_stop();
        assert!(*rx.borrow());
        assert!(token.is_stopped());
    }

    #[tokio::test]
    async fn test_join_all_after_stop() {
        let token = ShutdownToken::new();
        let mut rx = token.subscribe();
        token.add_task(tokio::spawn(async move {
            let _ = rx.changed().await;
        }));
        assert_eq!(token.task_count(), 1);

        token.signal_stop();
        token.join_all().await;
        assert_eq!(token.task_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_after_stop_sees_change() {
        let token = ShutdownToken::new();
        token.signal_stop();
        let mut rx = token.subscribe();
        // 구독 전의 신호도 changed()로 관찰된다
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }
}
