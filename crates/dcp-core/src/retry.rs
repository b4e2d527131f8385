//! 自适应退避计算：为集群客户端的连接重试提供带抖动、有下限/上限的等待窗口。
//!
//! # 教案式说明
//! - **意图 (Why)**：瞬时传输错误（连接被拒、超时）在单次重试下往往还会失败；
//!   固定间隔重试又会在故障恢复的瞬间造成多个客户端同时重连的“惊群”。指数退避
//!   叠加确定性抖动，可以在不引入外部随机数依赖的前提下打散重连时间点，同时保持
//!   测试可重复。
//! - **契约 (What)**：
//!   - `attempt`：从 0 开始的重试序号；
//!   - `base`：首次重试的基础等待时间；
//!   - **返回**：夹紧在 `[base, MAX_BACKOFF]` 区间内、带 ±5% 抖动的等待时长。
//! - **实现策略 (How)**：以 2 为底数对 `base` 做指数放大，再叠加由 attempt 与 base
//!   派生的确定性伪随机抖动（SplitMix64），最终夹紧到允许区间。

use std::time::Duration;

const MAX_BACKOFF: Duration = Duration::from_secs(30);
const JITTER_RANGE: f64 = 0.05;

/// 计算第 `attempt` 次重试前应等待的时长。
pub fn backoff_for_attempt(attempt: u32, base: Duration) -> Duration {
    let base_secs = base.as_secs_f64().max(0.001);
    let exponent = attempt.min(10);
    let scaled = base_secs * 2f64.powi(exponent as i32);
    let capped = scaled.min(MAX_BACKOFF.as_secs_f64());

    let seed = mix64(attempt as u64 ^ fold_duration(base));
    let jittered = capped * jitter_factor(seed);

    Duration::from_secs_f64(jittered.clamp(base_secs, MAX_BACKOFF.as_secs_f64()))
}

#[inline]
fn fold_duration(duration: Duration) -> u64 {
    let nanos = duration.as_nanos();
    let upper = (nanos >> 64) as u64;
    let lower = nanos as u64;
    upper ^ lower
}

#[inline]
fn jitter_factor(seed: u64) -> f64 {
    let mixed = mix64(seed);
    let mantissa = (mixed >> 11) as f64;
    let unit = mantissa / ((1u64 << 53) as f64);
    1.0 + (unit * 2.0 - 1.0) * JITTER_RANGE
}

#[inline]
fn mix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D049BB133111EB);
    x ^ (x >> 31)
}
