// SSH 连接配置

use std::time::Duration;

use super::auth::Authentication;
use super::error::SshError;
use super::host_key::HostKeyCallback;
use super::retry::RetryPolicy;

/// 默认连接超时（秒）
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// SSH 连接配置
#[derive(Clone, Debug)]
pub struct ConnectOptions {
    /// 目标主机
    pub host: String,
    /// 端口
    pub port: u16,
    /// 用户名
    pub username: String,
    /// 认证凭据（按顺序尝试）
    pub auth: Authentication,
    /// 主机密钥校验回调，必须由调用方指定
    pub host_key: Option<HostKeyCallback>,
    /// 单次连接超时（秒），0 表示使用默认值
    pub connect_timeout: u64,
    /// 建立连接和 SFTP 子系统时的重试策略
    pub retry: RetryPolicy,
    /// 心跳配置
    pub keepalive: KeepaliveConfig,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 22,
            username: String::new(),
            auth: Authentication::default(),
            host_key: None,
            connect_timeout: DEFAULT_TIMEOUT_SECS,
            retry: RetryPolicy::default(),
            keepalive: KeepaliveConfig::default(),
        }
    }
}

/// 心跳配置
#[derive(Clone, Debug)]
pub struct KeepaliveConfig {
    /// 是否启用心跳
    pub enabled: bool,
    /// 心跳间隔（秒）
    pub interval: u64,
    /// 最大重试次数
    pub max_retries: u32,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: 60,
            max_retries: 3,
        }
    }
}

impl ConnectOptions {
    pub fn new(host: impl Into<String>, username: impl Into<String>, auth: Authentication) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            auth,
            ..Default::default()
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn host_key(mut self, callback: HostKeyCallback) -> Self {
        self.host_key = Some(callback);
        self
    }

    pub fn connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout = secs;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// 填充默认值并校验
    pub fn resolve(mut self) -> Result<Self, SshError> {
        if self.host.trim().is_empty() {
            return Err(SshError::Config("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(SshError::Config("port must be a positive integer".to_string()));
        }
        if self.auth.is_empty() {
            return Err(SshError::Config(
                "at least one authentication method is required".to_string(),
            ));
        }
        if self.host_key.is_none() {
            return Err(SshError::Config(
                "a host key verification policy is required".to_string(),
            ));
        }
        if self.connect_timeout == 0 {
            self.connect_timeout = DEFAULT_TIMEOUT_SECS;
        }
        Ok(self)
    }

    /// 单次连接超时
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    /// 构建 russh 配置
    pub fn to_russh_config(&self) -> russh::client::Config {
        let mut config = russh::client::Config::default();
        // 连接超时只作用于拨号和握手，已建立的会话不设不活动超时
        config.inactivity_timeout = None;
        if self.keepalive.enabled {
            config.keepalive_interval = Some(Duration::from_secs(self.keepalive.interval));
            config.keepalive_max = self.keepalive.max_retries as usize;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::host_key;

    fn options() -> ConnectOptions {
        ConnectOptions::new("example.com", "deploy", Authentication::password("pw"))
            .host_key(host_key::fixed_fingerprint("SHA256:abc"))
    }

    #[test]
    fn test_defaults() {
        let opts = options();
        assert_eq!(opts.port, 22);
        assert_eq!(opts.connect_timeout, DEFAULT_TIMEOUT_SECS);
        assert_eq!(opts.retry, RetryPolicy::default());
        assert!(opts.host_key.is_some());
        assert!(ConnectOptions::default().host_key.is_none());
    }

    #[test]
    fn test_requires_host_key_policy() {
        let opts = ConnectOptions::new("example.com", "deploy", Authentication::password("pw"));
        assert!(matches!(opts.resolve(), Err(SshError::Config(_))));
    }

    #[test]
    fn test_zero_timeout_resolves_to_default() {
        let opts = options().connect_timeout(0).resolve().unwrap();
        assert_eq!(opts.connect_timeout, 30);
        assert_eq!(opts.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_requires_authentication() {
        let opts = ConnectOptions::new("example.com", "deploy", Authentication::default());
        assert!(matches!(opts.resolve(), Err(SshError::Config(_))));
    }

    #[test]
    fn test_rejects_port_zero() {
        assert!(matches!(options().port(0).resolve(), Err(SshError::Config(_))));
    }

    #[test]
    fn test_rejects_empty_host() {
        let opts = ConnectOptions::new("  ", "deploy", Authentication::password("pw"));
        assert!(matches!(opts.resolve(), Err(SshError::Config(_))));
    }

    #[test]
    fn test_russh_config_keepalive() {
        let config = options().to_russh_config();
        assert_eq!(config.keepalive_interval, Some(Duration::from_secs(60)));
        assert_eq!(config.keepalive_max, 3);
        assert_eq!(config.inactivity_timeout, None);
    }
}
