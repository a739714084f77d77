// SSH 连接模块
//
// 模块结构:
// - auth: 认证凭据 (Authentication, AuthProof)
// - config: 连接配置 (ConnectOptions, KeepaliveConfig)
// - error: 错误类型 (SshError)
// - handler: russh Handler 实现
// - host_key: 主机密钥校验回调
// - retry: 有限次数重试
// - client: SSH 客户端核心 (Client, ConnectionState)
// - session: 命令执行与交互式 Shell (Command, CommandOutput, PtyRequest)

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod host_key;
pub mod retry;
pub mod session;

// 公开导出
pub use auth::{AuthProof, Authentication};
pub use client::{close, Client, ConnectionState};
pub use config::{ConnectOptions, KeepaliveConfig, DEFAULT_TIMEOUT_SECS};
pub use error::SshError;
pub use host_key::{HostIdentity, HostKeyCallback};
pub use retry::RetryPolicy;
pub use session::{Command, CommandOutput, PtyRequest, SessionChannel};
