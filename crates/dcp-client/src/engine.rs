//! 顶层编排器：把集群客户端、账本、元数据后端、成员关系、健康检查与流引擎
//! 组装成一个可运行的进程。
//!
//! # 教案式说明
//! - **意图 (Why)**：其余模块都只做一件事；总得有个地方按正确顺序把它们接起来
//!   ——先加载检查点,再打开属于自己的流,再起后台任务——并且提供一个统一的
//!   停机入口,不管停机信号来自 OS、显式调用还是健康检查探测到的故障。
//! - **生命周期 (What)**：`run()` 在三路 `tokio::select!` 上等待：操作系统终止信号、
//!   显式 `stop()` 请求、健康检查失败通知。任意一路触发都走同一条优雅关停路径：
//!   保存检查点、关闭全部打开的流。

use crate::checkpoint::CheckpointManager;
use crate::cluster::{ClusterClient, FilterOptions};
use crate::config::{Config, MetadataBackendKind};
use crate::discovery::assign_vbuckets;
use crate::health::HealthCheck;
use crate::ledger::Ledger;
use crate::membership::MembershipTracker;
use crate::metadata::couchbase::CouchbaseMetadataBackend;
use crate::metadata::file::FileMetadataBackend;
use crate::metadata::readonly::ReadOnlyMetadataBackend;
use crate::metadata::MetadataBackend;
use crate::model::VbucketId;
use crate::stream::{Listener, StreamEngine};
use dcp_core::error::Result;
use dcp_core::logging::{null_logger, tracing_logger, SharedLogger};
use dcp_core::retry::backoff_for_attempt;
use dcp_core::time::{Clock, SystemClock};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Base wait before the first retry of a transient `connect`/`dcp_connect` failure.
const CONNECT_RETRY_BASE: Duration = Duration::from_millis(200);

/// Retries `attempt_fn` on `DcpError::is_transient()` failures with the deterministic
/// jittered backoff from `dcp_core::retry`, giving up immediately on any other error.
async fn retry_transient(
    clock: &Arc<dyn Clock>,
    logger: &SharedLogger,
    context: &'static str,
    mut attempt_fn: impl FnMut() -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>,
) -> Result<()> {
    let mut attempt = 0u32;
    loop {
        match attempt_fn().await {
            Ok(()) => return Ok(()),
            Err(err) if err.is_transient() => {
                let wait = backoff_for_attempt(attempt, CONNECT_RETRY_BASE);
                logger.warn(
                    "retrying transient failure",
                    &[("context", &context), ("attempt", &attempt)],
                );
                clock.sleep(wait).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// 运行一个 DCP 消费者进程所需的全部依赖组件。
pub struct Engine {
    config: Config,
    cluster: Arc<dyn ClusterClient>,
    ledger: Arc<Ledger>,
    checkpoint: Arc<CheckpointManager>,
    membership: Arc<MembershipTracker>,
    stream: Arc<StreamEngine>,
    health: Arc<HealthCheck>,
    logger: SharedLogger,
    stop: Arc<Notify>,
    stopped: AtomicBool,
}

fn build_metadata_backend(
    config: &Config,
    cluster: Arc<dyn ClusterClient>,
    num_vbuckets: u16,
) -> Arc<dyn MetadataBackend> {
    let backend: Arc<dyn MetadataBackend> = match config.metadata.kind {
        MetadataBackendKind::Couchbase => Arc::new(CouchbaseMetadataBackend::new(
            cluster,
            config.metadata.key_prefix.clone(),
            config.dcp.group_name.clone(),
            num_vbuckets,
        )),
        MetadataBackendKind::File => {
            let path = config
                .metadata
                .file_path
                .clone()
                .expect("validated by Config::validate");
            Arc::new(FileMetadataBackend::new(path))
        }
    };

    if config.metadata.read_only {
        Arc::new(ReadOnlyMetadataBackend::new(backend))
    } else {
        backend
    }
}

impl Engine {
    /// 连接集群、加载检查点、构建全部子组件。返回的引擎尚未打开任何流，
    /// 调用 [`Engine::run`] 才会真正开始消费。
    pub async fn new(
        config: Config,
        cluster: Arc<dyn ClusterClient>,
        listener: Arc<dyn Listener>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        Self::new_with_clock(config, cluster, listener, Arc::new(SystemClock)).await
    }

    /// 供测试注入虚拟时钟使用；生产路径请使用 [`Engine::new`]。
    pub async fn new_with_clock(
        config: Config,
        cluster: Arc<dyn ClusterClient>,
        listener: Arc<dyn Listener>,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let logger = tracing_logger();

        retry_transient(&clock, &logger, "connect", || cluster.connect()).await?;
        retry_transient(&clock, &logger, "dcp_connect", || cluster.dcp_connect()).await?;

        let num_vbuckets = cluster.num_vbuckets().await?;
        let bucket_uuid = cluster.bucket_uuid().await?;

        let ledger = Arc::new(Ledger::new());
        let metadata_backend = build_metadata_backend(&config, cluster.clone(), num_vbuckets);
        let checkpoint = Arc::new(
            CheckpointManager::new(
                metadata_backend,
                cluster.clone(),
                ledger.clone(),
                bucket_uuid,
                config.checkpoint.auto_reset,
            )
            .with_logger(logger.clone()),
        );

        let membership = Arc::new(
            MembershipTracker::new(
                clock,
                config.dcp.group_name.clone(),
                config.leader_election.enabled,
                config.leader_election.peer_deadline,
            )
            .with_logger(logger.clone()),
        );

        let collection_ids = if config.collection_names.is_empty() {
            None
        } else {
            let scope = config.scope_name.as_deref().unwrap_or("_default");
            Some(cluster.collection_ids(scope, &config.collection_names).await?)
        };
        let filter = FilterOptions {
            collection_ids,
        };

        let stream = Arc::new(
            StreamEngine::new(cluster.clone(), ledger.clone(), listener, filter)
                .with_logger(logger.clone()),
        );

        let health = Arc::new(
            HealthCheck::new(
                cluster.clone(),
                config.health_check.interval,
                config.health_check.timeout,
                config.health_check.failure_threshold,
            )
            .with_logger(logger.clone()),
        );

        Ok(Arc::new(Self {
            config,
            cluster,
            ledger,
            checkpoint,
            membership,
            stream,
            health,
            logger,
            stop: Arc::new(Notify::new()),
            stopped: AtomicBool::new(false),
        }))
    }

    fn owned_vbuckets(&self, num_vbuckets: u16) -> Vec<VbucketId> {
        let membership = self.membership.current_membership();
        assign_vbuckets(num_vbuckets, membership.member_number, membership.total_members)
    }

    /// 打开属于本成员的流、启动后台任务，并阻塞直到收到停机信号。
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let num_vbuckets = self.cluster.num_vbuckets().await?;
        let owned = self.owned_vbuckets(num_vbuckets);
        self.checkpoint.load(&owned).await?;
        self.stream.rebalance(&owned).await?;

        let mut background: Vec<JoinHandle<()>> = Vec::new();
        if self.config.checkpoint.kind == crate::config::CheckpointScheduleKind::Auto {
            background.push(
                self.checkpoint
                    .clone()
                    .spawn_auto_save(self.config.checkpoint.interval),
            );
        }

        if self.config.leader_election.enabled {
            background.push(self.clone().spawn_membership_heartbeat());
        }
        background.push(self.clone().spawn_membership_rebalance());

        let (health_handle, mut health_failed) = if self.config.health_check.disabled {
            (None, None)
        } else {
            let (handle, rx) = self.health.clone().spawn();
            (Some(handle), Some(rx))
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                self.logger.info("shutdown requested by OS signal", &[]);
            }
            _ = self.stop.notified() => {
                self.logger.info("shutdown requested explicitly", &[]);
            }
            _ = async {
                match &mut health_failed {
                    Some(rx) => { let _ = rx.await; }
                    None => std::future::pending::<()>().await,
                }
            } => {
                self.logger.error("shutting down due to health check failure", &[]);
            }
        }

        for handle in background {
            handle.abort();
        }
        if let Some(handle) = health_handle {
            handle.abort();
        }

        self.shutdown().await
    }

    /// Periodically refreshes this process's own heartbeat and evicts peers that
    /// went silent past `leader_election.peer_deadline`. Eviction publishes a new
    /// `Membership` on the event bus whenever the live set changes, which
    /// `spawn_membership_rebalance` reacts to.
    fn spawn_membership_heartbeat(self: Arc<Self>) -> JoinHandle<()> {
        let raw_interval = self.config.leader_election.heartbeat_interval;
        let interval = if raw_interval.is_zero() {
            Duration::from_secs(1)
        } else {
            raw_interval
        };
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let self_id = self.membership.self_id().to_owned();
                self.membership.heartbeat(&self_id);
                self.membership.evict_expired_and_recompute();
            }
        })
    }

    /// Reacts to `MembershipChanged` events by recomputing this member's vBucket
    /// ownership and driving an incremental `stream.rebalance()`.
    fn spawn_membership_rebalance(self: Arc<Self>) -> JoinHandle<()> {
        let mut changes = self.membership.subscribe();
        tokio::spawn(async move {
            loop {
                let membership = match changes.recv().await {
                    Ok(membership) => membership,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };

                let num_vbuckets = match self.cluster.num_vbuckets().await {
                    Ok(n) => n,
                    Err(err) => {
                        self.logger.error(
                            "failed to refresh vbucket count for rebalance",
                            &[("error", &err)],
                        );
                        continue;
                    }
                };
                let owned = assign_vbuckets(
                    num_vbuckets,
                    membership.member_number,
                    membership.total_members,
                );
                if let Err(err) = self.stream.rebalance(&owned).await {
                    self.logger.error("rebalance failed", &[("error", &err)]);
                }
            }
        })
    }

    async fn shutdown(&self) -> Result<()> {
        self.checkpoint.save().await?;
        for vb_id in self.stream.open_vbuckets() {
            self.stream.close(vb_id, true).await?;
        }
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// 请求引擎停止；可从任意任务调用，`run()` 会在下一次调度时醒来并优雅关停。
    pub fn stop(&self) {
        self.stop.notify_one();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::mock::MockClusterClient;
    use crate::config::{CheckpointConfig, CheckpointScheduleKind, DcpTransportConfig, HealthCheckConfig, LeaderElectionConfig, MetadataConfig};
    use async_trait::async_trait;
    use dcp_core::time::MockClock;
    use std::time::Duration;

    struct NullListener;

    #[async_trait]
    impl Listener for NullListener {
        async fn mutation(&self, _event: crate::cluster::ChangeEvent) -> Result<()> {
            Ok(())
        }
        async fn deletion(&self, _event: crate::cluster::ChangeEvent) -> Result<()> {
            Ok(())
        }
        async fn expiration(&self, _event: crate::cluster::ChangeEvent) -> Result<()> {
            Ok(())
        }
    }

    fn single_member_config() -> Config {
        Config {
            hosts: vec!["127.0.0.1:11210".to_owned()],
            username: "user".to_owned(),
            password: "pass".to_owned(),
            bucket_name: "bucket".to_owned(),
            scope_name: None,
            collection_names: Vec::new(),
            dcp: DcpTransportConfig::default(),
            metadata: MetadataConfig::default(),
            checkpoint: CheckpointConfig {
                kind: CheckpointScheduleKind::Manual,
                ..CheckpointConfig::default()
            },
            health_check: HealthCheckConfig {
                disabled: true,
                ..HealthCheckConfig::default()
            },
            leader_election: LeaderElectionConfig::default(),
            secure_connection: false,
            root_ca_path: None,
        }
    }

    #[tokio::test]
    async fn run_opens_every_vbucket_when_alone_and_stop_triggers_a_clean_shutdown() {
        let cluster = Arc::new(MockClusterClient::new(4, "bucket-uuid"));
        let listener = Arc::new(NullListener);
        let clock = Arc::new(MockClock::new());

        let engine = Engine::new_with_clock(single_member_config(), cluster.clone(), listener, clock)
            .await
            .unwrap();

        let engine_clone = engine.clone();
        let run_handle = tokio::spawn(async move { engine_clone.run().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cluster.open_calls().len(), 4);

        engine.stop();
        run_handle.await.unwrap().unwrap();
        assert!(engine.is_stopped());
        assert_eq!(cluster.closed_streams().len(), 4);
    }
}
