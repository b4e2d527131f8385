//! 可注入的时钟抽象：生产环境基于 Tokio 定时器，测试环境使用可手动推进的虚拟时钟。
//!
//! # 教案式说明
//! - **意图 (Why)**：检查点调度器、健康检查调度器都依赖“周期性等待”，若直接调用
//!   `tokio::time::sleep`，测试就必须真实等待秒级时间才能观察一次 tick，拖慢 CI；
//!   通过 trait 注入时钟，测试可以用 [`MockClock`] 瞬间推进时间。
//! - **契约 (What)**：`now` 单调不减；`sleep` 返回的 Future 至少等待给定时长才完成。

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

pub type Sleep = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration) -> Sleep;
}

/// 基于 Tokio 定时器的系统时钟，供生产环境使用。
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> Sleep {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// 虚拟时钟：测试显式调用 [`MockClock::advance`] 来推进时间并唤醒到期的睡眠。
#[derive(Clone, Debug)]
pub struct MockClock {
    inner: Arc<MockClockInner>,
}

#[derive(Debug)]
struct MockClockInner {
    state: Mutex<ClockState>,
}

#[derive(Debug)]
struct ClockState {
    origin: Instant,
    elapsed: Duration,
    sleepers: Vec<Sleeper>,
}

#[derive(Debug)]
struct Sleeper {
    deadline: Duration,
    completed: Arc<AtomicBool>,
    waker: Arc<Mutex<Option<Waker>>>,
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MockClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MockClockInner {
                state: Mutex::new(ClockState {
                    origin: Instant::now(),
                    elapsed: Duration::ZERO,
                    sleepers: Vec::new(),
                }),
            }),
        }
    }

    /// 手动推进虚拟时钟，唤醒所有到期的睡眠 Future。
    pub fn advance(&self, delta: Duration) {
        let mut state = self.inner.state.lock().expect("mock clock poisoned");
        state.elapsed = state.elapsed.saturating_add(delta);
        let elapsed = state.elapsed;
        state.sleepers.retain(|sleeper| {
            if elapsed >= sleeper.deadline {
                sleeper.completed.store(true, Ordering::SeqCst);
                if let Some(waker) = sleeper.waker.lock().expect("waker poisoned").take() {
                    waker.wake();
                }
                false
            } else {
                true
            }
        });
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        let state = self.inner.state.lock().expect("mock clock poisoned");
        state.origin + state.elapsed
    }

    fn sleep(&self, duration: Duration) -> Sleep {
        let completed = Arc::new(AtomicBool::new(duration.is_zero()));
        let waker = Arc::new(Mutex::new(None));

        if !duration.is_zero() {
            let mut state = self.inner.state.lock().expect("mock clock poisoned");
            let deadline = state.elapsed.saturating_add(duration);
            state.sleepers.push(Sleeper {
                deadline,
                completed: completed.clone(),
                waker: waker.clone(),
            });
        }

        Box::pin(MockSleep { completed, waker })
    }
}

struct MockSleep {
    completed: Arc<AtomicBool>,
    waker: Arc<Mutex<Option<Waker>>>,
}

impl Future for MockSleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.completed.load(Ordering::SeqCst) {
            Poll::Ready(())
        } else {
            *self.waker.lock().expect("waker poisoned") = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}
