// SSH 客户端核心实现
// 建立连接（拨号 -> 握手 -> 认证 -> SFTP 子系统），并在其上执行命令、Shell 与文件传输

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use russh::client::{AuthResult, Handle, Msg};
use russh::keys::PrivateKeyWithHashAlg;
use russh::Channel;
use russh_sftp::client::SftpSession;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::auth::AuthProof;
use super::config::ConnectOptions;
use super::error::SshError;
use super::handler::ClientHandler;
use super::retry::retry;
use super::session::{self, Command, CommandOutput, PtyRequest};
use crate::sftp::transfer;
use crate::terminal::{self, RawModeGuard, TerminalInput};

/// 连接状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Dialing,
    /// SSH 已连接，SFTP 尚未建立
    ShellConnected,
    /// SSH 与 SFTP 均已建立
    FullyConnected,
    Failed,
    Closing,
    Closed,
}

/// SSH 客户端
/// 持有一条已认证的 SSH 连接和其上的 SFTP 会话
pub struct Client {
    id: Uuid,
    host: String,
    username: String,
    ssh: Option<Handle<ClientHandler>>,
    sftp: Option<SftpSession>,
    state: ConnectionState,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("username", &self.username)
            .field("state", &self.state)
            .finish()
    }
}

impl Client {
    /// 建立连接
    ///
    /// 拨号与 SFTP 子系统分别按重试策略重试。SFTP 失败时会断开已建立的 SSH 连接，
    /// 不返回半连接的客户端。
    pub async fn connect(options: ConnectOptions) -> Result<Self, SshError> {
        let options = options.resolve()?;
        let id = Uuid::new_v4();
        let mut state = ConnectionState::Unconnected;

        info!(
            "[SSH] Connecting to {}@{}:{}",
            options.username, options.host, options.port
        );

        transition(id, &mut state, ConnectionState::Dialing);
        let handle = match retry(&options.retry, "SSH connect", || dial(&options)).await {
            Ok(handle) => handle,
            Err(e) => {
                transition(id, &mut state, ConnectionState::Failed);
                return Err(SshError::Connection {
                    attempts: e.attempts,
                    source: Box::new(e.last_error),
                });
            }
        };

        transition(id, &mut state, ConnectionState::ShellConnected);

        let sftp = match retry(&options.retry, "SFTP subsystem", || open_sftp(&handle)).await {
            Ok(sftp) => sftp,
            Err(e) => {
                transition(id, &mut state, ConnectionState::Failed);
                if let Err(err) = handle
                    .disconnect(russh::Disconnect::ByApplication, "", "en")
                    .await
                {
                    warn!("[SSH] Failed to disconnect after SFTP failure: {}", err);
                }
                return Err(SshError::TransferLayer {
                    attempts: e.attempts,
                    source: Box::new(e.last_error),
                });
            }
        };

        transition(id, &mut state, ConnectionState::FullyConnected);
        info!("[SSH] Session {} fully connected", id);

        Ok(Self {
            id,
            host: options.host,
            username: options.username,
            ssh: Some(handle),
            sftp: Some(sftp),
            state,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// 连接是否仍然可用
    pub fn is_alive(&self) -> bool {
        matches!(self.ssh.as_ref(), Some(handle) if !handle.is_closed())
    }

    /// SFTP 会话
    pub fn sftp(&self) -> Result<&SftpSession, SshError> {
        self.sftp
            .as_ref()
            .ok_or_else(|| SshError::Disconnected("SFTP session is closed".to_string()))
    }

    fn handle(&self) -> Result<&Handle<ClientHandler>, SshError> {
        match self.ssh.as_ref() {
            Some(handle) if !handle.is_closed() => Ok(handle),
            _ => Err(SshError::Disconnected("Session is disconnected".to_string())),
        }
    }

    async fn open_channel(&self) -> Result<Channel<Msg>, SshError> {
        self.handle()?
            .channel_open_session()
            .await
            .map_err(SshError::from)
    }

    /// 关闭连接：先关闭 SFTP，再断开 SSH
    ///
    /// SFTP 关闭失败时不会断开 SSH，返回 Close 错误。
    pub async fn close(&mut self) -> Result<(), SshError> {
        if self.ssh.is_none() && self.sftp.is_none() {
            if self.state != ConnectionState::Closed {
                transition(self.id, &mut self.state, ConnectionState::Closed);
            }
            return Err(SshError::Close("already closed".to_string()));
        }

        info!("[SSH] Closing session {}", self.id);
        transition(self.id, &mut self.state, ConnectionState::Closing);

        if let Some(sftp) = self.sftp.take() {
            if let Err(e) = sftp.close().await {
                transition(self.id, &mut self.state, ConnectionState::Failed);
                return Err(SshError::Close(format!("Failed to close SFTP session: {}", e)));
            }
        }

        if let Some(handle) = self.ssh.take() {
            if let Err(e) = handle
                .disconnect(russh::Disconnect::ByApplication, "", "en")
                .await
            {
                transition(self.id, &mut self.state, ConnectionState::Failed);
                return Err(SshError::Close(format!("Failed to disconnect: {}", e)));
            }
        }

        transition(self.id, &mut self.state, ConnectionState::Closed);
        Ok(())
    }

    /// 在新的会话通道上执行命令，非零退出视为错误
    pub async fn run(&self, command: Command<'_>) -> Result<(), SshError> {
        let mut channel = self.open_channel().await?;
        let result = session::run(&mut channel, command).await;
        close_channel(channel).await;
        result
    }

    /// 执行命令并收集输出
    pub async fn output(&self, command_line: &str) -> Result<CommandOutput, SshError> {
        let mut channel = self.open_channel().await?;
        let result = session::output(&mut channel, command_line).await;
        close_channel(channel).await;
        result
    }

    /// 启动交互式 Shell，绑定到本地终端，直到远程会话结束
    pub async fn shell(&self) -> Result<(), SshError> {
        let mut channel = self.open_channel().await?;
        let result = attach_terminal(&mut channel).await;
        close_channel(channel).await;
        result
    }

    /// 上传本地文件或目录
    pub async fn upload(&self, src: &Path, dest: &str) -> Result<(), SshError> {
        transfer::upload(self.sftp()?, src, dest).await
    }

    /// 递归上传本地目录
    pub async fn upload_directory(&self, src: &Path, dest: &str) -> Result<(), SshError> {
        transfer::upload_directory(self.sftp()?, src, dest).await
    }

    /// 上传单个文件
    pub async fn upload_file(&self, src: &Path, dest: &str) -> Result<(), SshError> {
        transfer::upload_file(self.sftp()?, src, dest).await
    }

    /// 下载远程文件或目录
    pub async fn download(&self, src: &str, dest: &Path) -> Result<(), SshError> {
        transfer::download(self.sftp()?, src, dest).await
    }

    /// 递归下载远程目录
    pub async fn download_directory(&self, src: &str, dest: &Path) -> Result<(), SshError> {
        transfer::download_directory(self.sftp()?, src, dest).await
    }

    /// 下载单个文件
    pub async fn download_file(&self, src: &str, dest: &Path) -> Result<(), SshError> {
        transfer::download_file(self.sftp()?, src, dest).await
    }
}

/// 关闭可能为空的客户端
pub async fn close(client: Option<&mut Client>) -> Result<(), SshError> {
    match client {
        Some(client) => client.close().await,
        None => Err(SshError::NilHandle),
    }
}

fn transition(id: Uuid, state: &mut ConnectionState, next: ConnectionState) {
    debug!("[SSH] Session {}: {:?} -> {:?}", id, state, next);
    *state = next;
}

/// 单次拨号：TCP 连接、SSH 握手、认证
async fn dial(options: &ConnectOptions) -> Result<Handle<ClientHandler>, SshError> {
    let connect_timeout = options.timeout();

    debug!("[SSH] Dialing {}:{}", options.host, options.port);
    let tcp_stream = timeout(
        connect_timeout,
        TcpStream::connect((options.host.as_str(), options.port)),
    )
    .await
    .map_err(|_| SshError::Timeout(options.connect_timeout))?
    .map_err(SshError::Io)?;

    let russh_config = Arc::new(options.to_russh_config());
    let host_key = options.host_key.clone().ok_or_else(|| {
        SshError::Config("a host key verification policy is required".to_string())
    })?;
    let handler = ClientHandler::new(options.host.clone(), options.port, host_key);

    let mut handle = timeout(
        connect_timeout,
        russh::client::connect_stream(russh_config, tcp_stream, handler),
    )
    .await
    .map_err(|_| SshError::Timeout(options.connect_timeout))?
    .map_err(SshError::from)?;

    debug!("[SSH] Handshake completed, authenticating as '{}'", options.username);
    authenticate(&mut handle, options).await?;

    Ok(handle)
}

/// 按顺序尝试认证凭据，直到某一个成功
async fn authenticate(
    handle: &mut Handle<ClientHandler>,
    options: &ConnectOptions,
) -> Result<(), SshError> {
    let mut last_failure = String::from("no authentication method accepted");

    for proof in options.auth.iter() {
        let result = match proof {
            AuthProof::Password(password) => {
                debug!("[SSH] Trying password authentication");
                handle
                    .authenticate_password(&options.username, password)
                    .await?
            }
            AuthProof::PublicKey(key) => {
                debug!("[SSH] Trying public key authentication ({})", key.algorithm());
                let hash_alg = handle.best_supported_rsa_hash().await?.flatten();
                handle
                    .authenticate_publickey(
                        &options.username,
                        PrivateKeyWithHashAlg::new(key.clone(), hash_alg),
                    )
                    .await?
            }
        };

        match result {
            AuthResult::Success => {
                info!("[SSH] Authenticated as '{}'", options.username);
                return Ok(());
            }
            AuthResult::Failure {
                remaining_methods,
                partial_success,
            } => {
                last_failure = if partial_success {
                    "Partial authentication - additional auth required".to_string()
                } else {
                    format!(
                        "Authentication failed. Server suggests: {:?}",
                        remaining_methods
                    )
                };
                debug!("[SSH] {:?} rejected: {}", proof, last_failure);
            }
        }
    }

    Err(SshError::Auth(last_failure))
}

/// 打开 SFTP 子系统
async fn open_sftp(handle: &Handle<ClientHandler>) -> Result<SftpSession, SshError> {
    let channel = handle.channel_open_session().await?;
    channel.request_subsystem(true, "sftp").await?;

    SftpSession::new(channel.into_stream())
        .await
        .map_err(|e| SshError::Sftp(format!("Failed to initialize SFTP session: {}", e)))
}

/// 原始模式下把本地终端接到远程 Shell，守卫在返回时恢复终端
async fn attach_terminal(channel: &mut Channel<Msg>) -> Result<(), SshError> {
    let _guard = RawModeGuard::acquire()?;
    let (cols, rows) = terminal::size()?;
    let pty = PtyRequest::sized(cols as u32, rows as u32);

    session::start_shell(
        channel,
        pty,
        Box::new(TerminalInput::spawn()?),
        Box::new(tokio::io::stdout()),
        Box::new(tokio::io::stderr()),
    )
    .await
}

async fn close_channel(channel: Channel<Msg>) {
    if let Err(e) = channel.close().await {
        debug!("[SSH] Channel close: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_close_none_is_nil_handle() {
        assert!(matches!(close(None).await, Err(SshError::NilHandle)));
    }

    fn detached(state: ConnectionState) -> Client {
        Client {
            id: Uuid::new_v4(),
            host: "example.com".to_string(),
            username: "deploy".to_string(),
            ssh: None,
            sftp: None,
            state,
        }
    }

    #[tokio::test]
    async fn test_second_close_is_error_and_stays_closed() {
        let mut client = detached(ConnectionState::Closed);

        for _ in 0..2 {
            let err = client.close().await.unwrap_err();
            assert!(matches!(err, SshError::Close(ref m) if m == "already closed"));
            assert_eq!(client.state(), ConnectionState::Closed);
        }
        assert!(matches!(
            close(Some(&mut client)).await,
            Err(SshError::Close(_))
        ));
    }

    #[tokio::test]
    async fn test_close_without_handles_ends_closed() {
        let mut client = detached(ConnectionState::FullyConnected);

        assert!(matches!(client.close().await, Err(SshError::Close(_))));
        assert_eq!(client.state(), ConnectionState::Closed);
        assert!(!client.is_alive());
        assert!(matches!(client.sftp(), Err(SshError::Disconnected(_))));
    }

    #[tokio::test]
    async fn test_operations_after_close_are_disconnected() {
        let client = detached(ConnectionState::Closed);

        assert!(matches!(
            client.output("true").await,
            Err(SshError::Disconnected(_))
        ));
        assert!(matches!(
            client.download_file("/etc/hosts", Path::new("hosts")).await,
            Err(SshError::Disconnected(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_options() {
        let options = ConnectOptions::new("", "deploy", crate::ssh::Authentication::password("pw"));
        assert!(matches!(
            Client::connect(options).await,
            Err(SshError::Config(_))
        ));
    }
}
