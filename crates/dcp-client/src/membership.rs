//! 服务发现与 leader 选举：心跳注册表 + 按加入时间排序的成员编号分配。
//!
//! # 教案式说明
//! - **意图 (Why)**：多个消费者实例需要就"谁是第几号成员、一共几个成员"达成一致，
//!   才能各自用 [`crate::discovery::assign_vbuckets`] 算出互斥的 vBucket 区间。
//!   本模块不做分布式共识，只做心跳 + 超时驱逐 + 确定性排序——足够应付
//!   同一进程组内的 rebalance 场景，复杂的选举协议不在职责范围内。
//! - **契约 (What)**：成员编号由存活 peer 按 `joined_at` 升序排列的位置决定
//!   （第一个加入的是 1 号，也是 leader）；`leader_election.enabled = false` 时
//!   跳过全部对等体追踪，直接合成单成员身份。

use dcp_core::events::EventBus;
use dcp_core::logging::{null_logger, SharedLogger};
use dcp_core::time::Clock;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::model::Membership;

struct PeerState {
    joined_at: Instant,
    last_heartbeat: Instant,
}

/// 心跳式成员关系追踪器；`enabled = false` 时退化为恒定的单成员身份。
pub struct MembershipTracker {
    clock: Arc<dyn Clock>,
    self_id: String,
    enabled: bool,
    peer_deadline: Duration,
    peers: Mutex<HashMap<String, PeerState>>,
    bus: EventBus<Membership>,
    logger: SharedLogger,
}

impl MembershipTracker {
    pub fn new(
        clock: Arc<dyn Clock>,
        self_id: impl Into<String>,
        enabled: bool,
        peer_deadline: Duration,
    ) -> Self {
        let self_id = self_id.into();
        let mut peers = HashMap::new();
        let now = clock.now();
        peers.insert(
            self_id.clone(),
            PeerState {
                joined_at: now,
                last_heartbeat: now,
            },
        );
        Self {
            clock,
            self_id,
            enabled,
            peer_deadline,
            peers: Mutex::new(peers),
            bus: EventBus::new(16),
            logger: null_logger(),
        }
    }

    pub fn with_logger(mut self, logger: SharedLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Membership> {
        self.bus.subscribe()
    }

    /// The identifier this tracker registered itself under; used to send this
    /// process's own periodic heartbeat.
    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    /// 记录一次来自 `peer_id` 的心跳；首次出现即视为加入。
    pub fn heartbeat(&self, peer_id: &str) {
        if !self.enabled {
            return;
        }
        let now = self.clock.now();
        let mut peers = self.peers.lock().unwrap();
        peers
            .entry(peer_id.to_owned())
            .and_modify(|peer| peer.last_heartbeat = now)
            .or_insert(PeerState {
                joined_at: now,
                last_heartbeat: now,
            });
    }

    /// 驱逐超过 `peer_deadline` 未发心跳的成员；若存活集合发生变化，广播新的
    /// [`Membership`] 并返回 `true`。
    pub fn evict_expired_and_recompute(&self) -> bool {
        if !self.enabled {
            return false;
        }
        let now = self.clock.now();
        let mut peers = self.peers.lock().unwrap();
        let before = peers.len();
        peers.retain(|id, peer| {
            id == &self.self_id || now.saturating_duration_since(peer.last_heartbeat) < self.peer_deadline
        });
        let changed = peers.len() != before;
        drop(peers);
        if changed {
            let membership = self.current_membership_locked();
            self.logger.info(
                "membership changed",
                &[
                    ("member_number", &membership.member_number),
                    ("total_members", &membership.total_members),
                ],
            );
            self.bus.publish(membership);
        }
        changed
    }

    /// 当前成员身份：若选举被禁用，恒为单成员；否则按加入时间排序计算编号。
    pub fn current_membership(&self) -> Membership {
        if !self.enabled {
            return Membership::single();
        }
        self.current_membership_locked()
    }

    fn current_membership_locked(&self) -> Membership {
        let peers = self.peers.lock().unwrap();
        let mut ordered: Vec<(&String, Instant)> =
            peers.iter().map(|(id, state)| (id, state.joined_at)).collect();
        ordered.sort_by_key(|(id, joined_at)| (*joined_at, (*id).clone()));

        let total_members = ordered.len() as u32;
        let member_number = ordered
            .iter()
            .position(|(id, _)| *id == &self.self_id)
            .map(|idx| idx as u32 + 1)
            .unwrap_or(1);

        Membership {
            member_number,
            total_members,
        }
    }

    pub fn is_leader(&self) -> bool {
        self.current_membership().member_number == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcp_core::time::MockClock;

    #[test]
    fn disabled_election_always_reports_a_single_member() {
        let clock = Arc::new(MockClock::new());
        let tracker = MembershipTracker::new(clock, "self", false, Duration::from_secs(10));
        tracker.heartbeat("other");
        assert_eq!(tracker.current_membership(), Membership::single());
        assert!(tracker.is_leader());
    }

    #[test]
    fn earliest_joined_peer_is_member_number_one() {
        let clock = Arc::new(MockClock::new());
        let tracker = MembershipTracker::new(clock, "self", true, Duration::from_secs(30));
        tracker.heartbeat("earlier-peer");

        let membership = tracker.current_membership();
        assert_eq!(membership.total_members, 2);
        // "self" joined at construction time, before the heartbeat call above, so it
        // keeps member_number 1.
        assert_eq!(membership.member_number, 1);
    }

    #[test]
    fn expired_peers_are_evicted_and_trigger_a_recompute() {
        let clock = Arc::new(MockClock::new());
        let tracker = MembershipTracker::new(clock.clone(), "self", true, Duration::from_secs(5));
        tracker.heartbeat("peer-a");
        assert_eq!(tracker.current_membership().total_members, 2);

        clock.advance(Duration::from_secs(10));
        let changed = tracker.evict_expired_and_recompute();
        assert!(changed);
        assert_eq!(tracker.current_membership().total_members, 1);
    }

    #[test]
    fn fresh_heartbeats_prevent_eviction() {
        let clock = Arc::new(MockClock::new());
        let tracker = MembershipTracker::new(clock.clone(), "self", true, Duration::from_secs(5));
        tracker.heartbeat("peer-a");
        clock.advance(Duration::from_secs(3));
        tracker.heartbeat("peer-a");
        clock.advance(Duration::from_secs(3));
        assert!(!tracker.evict_expired_and_recompute());
        assert_eq!(tracker.current_membership().total_members, 2);
    }
}
