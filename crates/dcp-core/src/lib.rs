#![doc = r#"
# dcp-core

## 设计动机（Why）
- 为上层的 DCP 客户端引擎提供与具体集群 SDK 无关的基础契约：稳定的错误分类、
  注入式日志门面、可测试的时钟与退避算法，以及一个最小的进程内事件总线。
- 这些关注点在各个组件（集群客户端、元数据后端、检查点管理器、成员管理）中
  重复出现，集中到一个 crate 可以避免每个组件各自发明一套错误/日志模型。

## 核心契约（What）
- [`error`]：`DcpError` 枚举与其 `ErrorKind` 判别量，所有对外可观察的失败都应归入
  其中一种。
- [`logging`]：`Logger` trait，替代全局 logger，由调用方在构造组件时注入。
- [`retry`]：自适应退避计算，供集群客户端在瞬时传输错误时重试连接。
- [`time`]：`Clock` 抽象，生产环境使用 Tokio 时钟，测试环境使用可手动推进的
  虚拟时钟。
- [`events`]：基于 `tokio::sync::broadcast` 的极简类型化事件总线。
"#]

pub mod error;
pub mod events;
pub mod logging;
pub mod retry;
pub mod time;

pub use error::{DcpError, ErrorKind, Result};
pub use events::EventBus;
pub use logging::Logger;
pub use time::Clock;
