//! 注入式日志门面，替代全局 logger。
//!
//! 组件在构造时持有 `Arc<dyn Logger>`，而不是直接调用 `tracing` 宏，这样测试可以
//! 注入一个静默实现，生产环境可以注入转发到 `tracing` 的实现，二者共享同一套调用点。

use std::fmt;
use std::sync::Arc;

/// 组件可以调用的最小日志接口。
///
/// `fields` 以 `key = value` 的形式传入，实现者决定如何序列化（结构化字段、
/// 纯文本拼接等）。
pub trait Logger: Send + Sync + 'static {
    fn info(&self, msg: &str, fields: &[(&str, &dyn fmt::Display)]);
    fn warn(&self, msg: &str, fields: &[(&str, &dyn fmt::Display)]);
    fn error(&self, msg: &str, fields: &[(&str, &dyn fmt::Display)]);
}

/// 转发到 `tracing` 的默认实现。
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn info(&self, msg: &str, fields: &[(&str, &dyn fmt::Display)]) {
        tracing::info!(fields = %format_fields(fields), "{msg}");
    }

    fn warn(&self, msg: &str, fields: &[(&str, &dyn fmt::Display)]) {
        tracing::warn!(fields = %format_fields(fields), "{msg}");
    }

    fn error(&self, msg: &str, fields: &[(&str, &dyn fmt::Display)]) {
        tracing::error!(fields = %format_fields(fields), "{msg}");
    }
}

fn format_fields(fields: &[(&str, &dyn fmt::Display)]) -> String {
    fields
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// 丢弃所有日志的实现，供单元测试使用，避免测试输出噪音。
#[derive(Clone, Copy, Debug, Default)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn info(&self, _msg: &str, _fields: &[(&str, &dyn fmt::Display)]) {}
    fn warn(&self, _msg: &str, _fields: &[(&str, &dyn fmt::Display)]) {}
    fn error(&self, _msg: &str, _fields: &[(&str, &dyn fmt::Display)]) {}
}

/// 便于在组件签名中使用的共享引用类型别名。
pub type SharedLogger = Arc<dyn Logger>;

pub fn null_logger() -> SharedLogger {
    Arc::new(NullLogger)
}

pub fn tracing_logger() -> SharedLogger {
    Arc::new(TracingLogger)
}
