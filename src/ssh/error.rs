// SSH 错误类型定义

use thiserror::Error;

/// SSH 错误类型
#[derive(Debug, Error)]
pub enum SshError {
    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO 错误（网络连接、本地文件等）
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 认证失败
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// SSH 协议错误
    #[error("SSH protocol error: {0}")]
    Protocol(String),

    /// 私钥解析失败（格式错误或口令错误）
    #[error("Key decode error: {0}")]
    KeyDecode(String),

    /// 连接超时
    #[error("Connection timeout after {0}s")]
    Timeout(u64),

    /// SFTP 子协议错误
    #[error("SFTP error: {0}")]
    Sftp(String),

    /// 重试耗尽后仍无法建立 SSH 连接
    #[error("Failed to connect after {attempts} attempt(s): {source}")]
    Connection {
        attempts: u32,
        #[source]
        source: Box<SshError>,
    },

    /// 重试耗尽后仍无法建立 SFTP 子系统
    #[error("Failed to start SFTP subsystem after {attempts} attempt(s): {source}")]
    TransferLayer {
        attempts: u32,
        #[source]
        source: Box<SshError>,
    },

    /// 客户端句柄不存在
    #[error("Client handle is absent")]
    NilHandle,

    /// 关闭连接失败
    #[error("Close error: {0}")]
    Close(String),

    /// 会话已断开
    #[error("Session disconnected: {0}")]
    Disconnected(String),

    /// 远程主机拒绝环境变量
    #[error("Remote host rejected environment variable '{name}'")]
    EnvRejected { name: String },

    /// PTY 请求失败
    #[error("PTY error: {0}")]
    Pty(String),

    /// 终端原始模式切换失败
    #[error("Raw mode error: {0}")]
    RawMode(String),

    /// 交互式 Shell 失败
    #[error("Shell error: {0}")]
    Shell(String),

    /// 远程命令执行失败
    #[error("Command execution failed: {detail}")]
    CommandExecution {
        /// 远程退出码（如果有）
        exit_status: Option<u32>,
        detail: String,
    },

    /// 传输源不存在
    #[error("Source not found: {0}")]
    SourceNotFound(String),

    /// 传输源是目录，但需要文件
    #[error("Source is a directory: {0}")]
    SourceIsDirectory(String),

    /// 传输源是文件，但需要目录
    #[error("Source is a file: {0}")]
    SourceIsFile(String),
}

impl From<russh::Error> for SshError {
    fn from(e: russh::Error) -> Self {
        SshError::Protocol(e.to_string())
    }
}

impl From<russh::keys::Error> for SshError {
    fn from(e: russh::keys::Error) -> Self {
        SshError::KeyDecode(e.to_string())
    }
}

impl From<russh_sftp::client::error::Error> for SshError {
    fn from(e: russh_sftp::client::error::Error) -> Self {
        SshError::Sftp(e.to_string())
    }
}

impl SshError {
    /// 远程命令的退出码（仅 CommandExecution 有）
    pub fn exit_status(&self) -> Option<u32> {
        match self {
            SshError::CommandExecution { exit_status, .. } => *exit_status,
            _ => None,
        }
    }
}
