//! 健康检查：周期性 ping 源集群，连续失败达到阈值后触发停机信号。
//!
//! # 教案式说明
//! - **意图 (Why)**：流监听依赖长连接，连接本身的健康状况不会主动通知上层；
//!   周期性 `ping()` 是唯一能尽早发现"集群已不可达"的手段，比等待下一次读超时
//!   快得多。
//! - **契约 (What)**：每隔 `interval` 对集群执行一次 `ping()`，单次调用受 `timeout`
//!   限制；连续 `failure_threshold` 次失败（含超时）后，通过一次性 oneshot 通道
//!   通知引擎自身应当停止。成功一次就把失败计数清零。

use crate::cluster::ClusterClient;
use dcp_core::logging::{null_logger, SharedLogger};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub struct HealthCheck {
    cluster: Arc<dyn ClusterClient>,
    interval: Duration,
    timeout: Duration,
    failure_threshold: u32,
    consecutive_failures: AtomicU32,
    logger: SharedLogger,
}

impl HealthCheck {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        interval: Duration,
        timeout: Duration,
        failure_threshold: u32,
    ) -> Self {
        Self {
            cluster,
            interval,
            timeout,
            failure_threshold,
            consecutive_failures: AtomicU32::new(0),
            logger: null_logger(),
        }
    }

    pub fn with_logger(mut self, logger: SharedLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    /// 执行一次检查；返回 `true` 表示本次健康，`false` 表示失败（超时也算失败）。
    async fn check_once(&self) -> bool {
        match tokio::time::timeout(self.timeout, self.cluster.ping()).await {
            Ok(Ok(())) => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
                true
            }
            Ok(Err(err)) => {
                self.logger
                    .warn("health check ping failed", &[("error", &err)]);
                self.consecutive_failures.fetch_add(1, Ordering::SeqCst);
                false
            }
            Err(_elapsed) => {
                self.logger.warn("health check ping timed out", &[]);
                self.consecutive_failures.fetch_add(1, Ordering::SeqCst);
                false
            }
        }
    }

    /// 启动周期性检查任务；一旦连续失败达到阈值，通过返回的接收端收到一次通知，
    /// 随后任务自行退出。
    pub fn spawn(self: Arc<Self>) -> (JoinHandle<()>, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            let mut tx = Some(tx);
            loop {
                ticker.tick().await;
                self.check_once().await;
                if self.consecutive_failures() >= self.failure_threshold {
                    self.logger.error(
                        "health check failure threshold reached",
                        &[("failures", &self.consecutive_failures())],
                    );
                    if let Some(tx) = tx.take() {
                        let _ = tx.send(());
                    }
                    break;
                }
            }
        });
        (handle, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::mock::MockClusterClient;

    #[tokio::test]
    async fn healthy_ping_keeps_failure_count_at_zero() {
        let cluster = Arc::new(MockClusterClient::new(1, "bucket-uuid"));
        let check = HealthCheck::new(cluster, Duration::from_millis(10), Duration::from_secs(1), 3);
        assert!(check.check_once().await);
        assert_eq!(check.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn failing_pings_increment_the_counter() {
        let cluster = Arc::new(MockClusterClient::new(1, "bucket-uuid"));
        cluster.set_healthy(false);
        let check = HealthCheck::new(cluster, Duration::from_millis(10), Duration::from_secs(1), 3);
        assert!(!check.check_once().await);
        assert!(!check.check_once().await);
        assert_eq!(check.consecutive_failures(), 2);
    }

    #[tokio::test]
    async fn a_successful_ping_resets_the_counter() {
        let cluster = Arc::new(MockClusterClient::new(1, "bucket-uuid"));
        cluster.set_healthy(false);
        let check = HealthCheck::new(cluster.clone(), Duration::from_millis(10), Duration::from_secs(1), 3);
        check.check_once().await;
        cluster.set_healthy(true);
        check.check_once().await;
        assert_eq!(check.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn spawned_task_notifies_after_threshold_failures() {
        let cluster = Arc::new(MockClusterClient::new(1, "bucket-uuid"));
        cluster.set_healthy(false);
        let check = Arc::new(HealthCheck::new(
            cluster,
            Duration::from_millis(5),
            Duration::from_millis(50),
            2,
        ));
        let (handle, rx) = check.spawn();
        rx.await.expect("health check should signal failure");
        handle.await.unwrap();
    }
}
