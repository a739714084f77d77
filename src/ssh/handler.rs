// SSH 客户端 Handler 实现
// 实现 russh::client::Handler trait

use russh::keys::PublicKey;
use std::future::Future;
use tracing::debug;

use super::host_key::{HostIdentity, HostKeyCallback};

/// SSH 客户端 Handler
/// 处理 SSH 连接过程中的回调，主机密钥交给调用方的回调判断
pub struct ClientHandler {
    /// 服务器主机名
    host: String,
    /// 服务器端口
    port: u16,
    /// 主机密钥校验回调
    host_key: HostKeyCallback,
}

impl ClientHandler {
    /// 创建新的 Handler
    pub fn new(host: String, port: u16, host_key: HostKeyCallback) -> Self {
        Self {
            host,
            port,
            host_key,
        }
    }
}

impl russh::client::Handler for ClientHandler {
    type Error = russh::Error;

    /// 检查服务器公钥
    fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send {
        let identity = HostIdentity {
            host: &self.host,
            port: self.port,
            key: server_public_key,
        };

        debug!(
            "[SSH] Server key for {}:{}: {} {}",
            self.host,
            self.port,
            server_public_key.algorithm(),
            identity.fingerprint()
        );

        let accepted = self.host_key.verify(&identity);
        async move { Ok(accepted) }
    }
}
