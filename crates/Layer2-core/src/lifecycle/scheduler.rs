//! Scheduler - 지연된 적용 작업의 FIFO 큐
//!
//! 작업은 큐에 들어온 순서대로 시작됩니다. 본문이 await에서 멈추면 다음 작업이
//! 바로 시작되고, 멈춘 작업들은 `FuturesUnordered`에서 함께 폴링됩니다.

use futures::future::{poll_fn, BoxFuture};
use futures::stream::FuturesUnordered;
use futures::task::AtomicWaker;
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::task::Poll;
use tokio::sync::Notify;

/// 큐에 들어가는 작업
pub(crate) type Job = BoxFuture<'static, ()>;

pub(crate) struct Scheduler {
    queue: Mutex<VecDeque<Job>>,
    notify: Notify,
    /// 진행 중인 `flush`를 깨움
    waker: AtomicWaker,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            waker: AtomicWaker::new(),
        }
    }

    pub fn schedule(&self, job: Job) {
        self.queue.lock().push_back(job);
        self.waker.wake();
        self.notify.notify_one();
    }

    /// 아직 시작되지 않은 작업 수
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    fn pop(&self) -> Option<Job> {
        self.queue.lock().pop_front()
    }

    /// 큐와 진행 중인 작업이 모두 빌 때까지 실행 (실행 중 추가된 작업 포함)
    pub async fn flush(&self) -> usize {
        let mut in_flight: FuturesUnordered<Job> = FuturesUnordered::new();
        let mut executed = 0;

        poll_fn(|cx| {
            self.waker.register(cx.waker());
            loop {
                // 새 작업은 순서대로 한 번씩 폴링해서 시작
                while let Some(mut job) = self.pop() {
                    match job.poll_unpin(cx) {
                        Poll::Ready(()) => executed += 1,
                        Poll::Pending => in_flight.push(job),
                    }
                }

                while let Poll::Ready(Some(())) = in_flight.poll_next_unpin(cx) {
                    executed += 1;
                }

                if self.queue.lock().is_empty() {
                    return if in_flight.is_empty() {
                        Poll::Ready(executed)
                    } else {
                        Poll::Pending
                    };
                }
            }
        })
        .await
    }

    /// 새 작업이 올 때까지 대기
    pub async fn wait(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_flush_runs_in_order() {
        let scheduler = Scheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = Arc::clone(&order);
            scheduler.schedule(Box::pin(async move {
                order.lock().push(i);
            }));
        }

        assert_eq!(scheduler.pending(), 3);
        assert_eq!(scheduler.flush().await, 3);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn test_flush_drains_nested_jobs() {
        let scheduler = Arc::new(Scheduler::new());
        let count = Arc::new(AtomicUsize::new(0));

        let inner = Arc::clone(&scheduler);
        let outer_count = Arc::clone(&count);
        scheduler.schedule(Box::pin(async move {
            outer_count.fetch_add(1, Ordering::SeqCst);
            let nested_count = Arc::clone(&outer_count);
            inner.schedule(Box::pin(async move {
                nested_count.fetch_add(1, Ordering::SeqCst);
            }));
        }));

        assert_eq!(scheduler.flush().await, 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_suspended_job_does_not_block_later_jobs() {
        let scheduler = Scheduler::new();
        let signal = Arc::new(Notify::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let waiting = Arc::clone(&signal);
        let first = Arc::clone(&order);
        scheduler.schedule(Box::pin(async move {
            waiting.notified().await;
            first.lock().push("waiter");
        }));

        let second = Arc::clone(&order);
        scheduler.schedule(Box::pin(async move {
            second.lock().push("signaller");
            signal.notify_one();
        }));

        let executed = tokio::time::timeout(std::time::Duration::from_secs(2), scheduler.flush())
            .await
            .unwrap();
        assert_eq!(executed, 2);
        assert_eq!(*order.lock(), vec!["signaller", "waiter"]);
    }
}
