// SSH 会话执行
// 每次调用打开一个新的会话通道：执行单条命令或启动交互式 Shell

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use russh::client::Msg;
use russh::{Channel, ChannelMsg, Pty};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::error::SshError;

/// 未设置 TERM 时使用的终端类型
pub const DEFAULT_TERM: &str = "xterm-256color";

/// 非交互命令使用的固定终端尺寸
const FIXED_COLS: u32 = 80;
const FIXED_ROWS: u32 = 40;

/// 标准输入读取缓冲区大小
const INPUT_BUFFER_SIZE: usize = 8192;

/// 每路输出最多排队的数据块数，队列满时暂停读取通道
const OUTPUT_QUEUE_DEPTH: usize = 16;

/// 命令输入流
pub type InputStream<'a> = Box<dyn AsyncRead + Send + Unpin + 'a>;
/// 命令输出流
pub type OutputStream<'a> = Box<dyn AsyncWrite + Send + Unpin + 'a>;

/// PTY 请求参数
#[derive(Clone, Debug)]
pub struct PtyRequest {
    /// 终端类型
    pub term: String,
    /// 列数
    pub col_width: u32,
    /// 行数
    pub row_height: u32,
    /// 像素宽度
    pub pix_width: u32,
    /// 像素高度
    pub pix_height: u32,
    /// 终端模式
    pub modes: Vec<(Pty, u32)>,
}

impl Default for PtyRequest {
    fn default() -> Self {
        Self::fixed()
    }
}

impl PtyRequest {
    /// 非交互命令使用的固定尺寸 PTY（80x40）
    pub fn fixed() -> Self {
        Self::sized(FIXED_COLS, FIXED_ROWS)
    }

    /// 指定尺寸的 PTY
    pub fn sized(cols: u32, rows: u32) -> Self {
        Self {
            term: terminal_type(),
            col_width: cols,
            row_height: rows,
            pix_width: 0,
            pix_height: 0,
            modes: default_terminal_modes(),
        }
    }
}

/// 从当前进程环境读取 TERM
pub fn terminal_type() -> String {
    std::env::var("TERM")
        .ok()
        .filter(|term| !term.is_empty())
        .unwrap_or_else(|| DEFAULT_TERM.to_string())
}

fn default_terminal_modes() -> Vec<(Pty, u32)> {
    vec![
        (Pty::ECHO, 0),
        (Pty::TTY_OP_ISPEED, 14400),
        (Pty::TTY_OP_OSPEED, 14400),
        (Pty::OPOST, 1),
    ]
}

/// 远程命令描述
pub struct Command<'a> {
    /// 命令行
    pub command_line: String,
    /// 环境变量
    pub env: HashMap<String, String>,
    /// 标准输入来源
    pub stdin: Option<InputStream<'a>>,
    /// 标准输出去向
    pub stdout: Option<OutputStream<'a>>,
    /// 标准错误去向
    pub stderr: Option<OutputStream<'a>>,
    /// 是否请求 PTY
    pub pty: bool,
}

impl<'a> Command<'a> {
    pub fn new(command_line: impl Into<String>) -> Self {
        Self {
            command_line: command_line.into(),
            env: HashMap::new(),
            stdin: None,
            stdout: None,
            stderr: None,
            pty: true,
        }
    }

    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    pub fn stdin(mut self, reader: impl AsyncRead + Send + Unpin + 'a) -> Self {
        self.stdin = Some(Box::new(reader));
        self
    }

    pub fn stdout(mut self, writer: impl AsyncWrite + Send + Unpin + 'a) -> Self {
        self.stdout = Some(Box::new(writer));
        self
    }

    pub fn stderr(mut self, writer: impl AsyncWrite + Send + Unpin + 'a) -> Self {
        self.stderr = Some(Box::new(writer));
        self
    }

    /// 不请求 PTY（标准错误不会被合并进标准输出）
    pub fn without_pty(mut self) -> Self {
        self.pty = false;
        self
    }
}

impl fmt::Debug for Command<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("command_line", &self.command_line)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .field("pty", &self.pty)
            .finish()
    }
}

/// 命令输出
#[derive(Debug)]
pub struct CommandOutput {
    /// 标准输出
    pub stdout: Vec<u8>,
    /// 标准错误
    pub stderr: Vec<u8>,
    /// 退出码
    pub exit_code: u32,
}

impl CommandOutput {
    /// 获取标准输出字符串
    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// 获取标准错误字符串
    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }

    /// 检查命令是否成功
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// 会话通道上的操作
#[async_trait]
pub trait SessionChannel: Send {
    /// 等待下一条通道消息，None 表示通道已关闭
    async fn next_message(&mut self) -> Option<ChannelMsg>;
    async fn send_data(&mut self, data: &[u8]) -> Result<(), SshError>;
    async fn send_eof(&mut self) -> Result<(), SshError>;
    async fn set_env(&mut self, name: &str, value: &str) -> Result<(), SshError>;
    async fn request_pty(&mut self, pty: &PtyRequest) -> Result<(), SshError>;
    async fn exec(&mut self, command_line: &str) -> Result<(), SshError>;
    async fn request_shell(&mut self) -> Result<(), SshError>;
}

#[async_trait]
impl SessionChannel for Channel<Msg> {
    async fn next_message(&mut self) -> Option<ChannelMsg> {
        self.wait().await
    }

    async fn send_data(&mut self, data: &[u8]) -> Result<(), SshError> {
        self.data(data).await.map_err(SshError::from)
    }

    async fn send_eof(&mut self) -> Result<(), SshError> {
        self.eof().await.map_err(SshError::from)
    }

    async fn set_env(&mut self, name: &str, value: &str) -> Result<(), SshError> {
        Channel::set_env(self, true, name, value)
            .await
            .map_err(SshError::from)
    }

    async fn request_pty(&mut self, pty: &PtyRequest) -> Result<(), SshError> {
        Channel::request_pty(
            self,
            true,
            &pty.term,
            pty.col_width,
            pty.row_height,
            pty.pix_width,
            pty.pix_height,
            &pty.modes,
        )
        .await
        .map_err(SshError::from)
    }

    async fn exec(&mut self, command_line: &str) -> Result<(), SshError> {
        Channel::exec(self, true, command_line)
            .await
            .map_err(SshError::from)
    }

    async fn request_shell(&mut self) -> Result<(), SshError> {
        Channel::request_shell(self, true)
            .await
            .map_err(SshError::from)
    }
}

/// 远程进程的结束状态
#[derive(Debug, Default, PartialEq)]
pub(crate) struct ExitOutcome {
    pub exit_status: Option<u32>,
    pub exit_signal: Option<String>,
    /// 远程拒绝了 exec/shell 请求
    pub refused: bool,
}

impl ExitOutcome {
    /// 转换为错误描述，成功（退出码 0）返回 None
    fn failure(&self) -> Option<(Option<u32>, String)> {
        if self.refused {
            return Some((None, "remote host refused the request".to_string()));
        }
        match (self.exit_status, &self.exit_signal) {
            (Some(0), _) => None,
            (Some(code), _) => Some((Some(code), format!("exit status {}", code))),
            (None, Some(signal)) => Some((None, format!("terminated by signal {}", signal))),
            (None, None) => Some((None, "exited without reporting exit status".to_string())),
        }
    }
}

/// 等待请求的应答
async fn wait_reply<C: SessionChannel + ?Sized>(channel: &mut C) -> Result<bool, SshError> {
    loop {
        match channel.next_message().await {
            Some(ChannelMsg::Success) => return Ok(true),
            Some(ChannelMsg::Failure) => return Ok(false),
            Some(ChannelMsg::Close) | None => {
                return Err(SshError::Disconnected(
                    "Channel closed while waiting for reply".to_string(),
                ))
            }
            Some(_) => continue,
        }
    }
}

/// 执行命令：设置环境变量、请求 PTY、执行并转发三路数据流
pub(crate) async fn execute<C: SessionChannel + ?Sized>(
    channel: &mut C,
    command: Command<'_>,
) -> Result<ExitOutcome, SshError> {
    let Command {
        command_line,
        env,
        stdin,
        stdout,
        stderr,
        pty,
    } = command;

    for (name, value) in &env {
        channel.set_env(name, value).await?;
        if !wait_reply(channel).await? {
            return Err(SshError::EnvRejected { name: name.clone() });
        }
    }

    if pty {
        let request = PtyRequest::fixed();
        channel
            .request_pty(&request)
            .await
            .map_err(|e| SshError::Pty(e.to_string()))?;
        if !wait_reply(channel)
            .await
            .map_err(|e| SshError::Pty(e.to_string()))?
        {
            return Err(SshError::Pty("Remote host refused PTY request".to_string()));
        }
    }

    debug!("[SSH] Executing: {}", command_line);
    channel
        .exec(&command_line)
        .await
        .map_err(|e| SshError::CommandExecution {
            exit_status: None,
            detail: e.to_string(),
        })?;

    Ok(multiplex(channel, stdin, stdout, stderr).await)
}

/// 执行命令，非零退出视为错误
pub(crate) async fn run<C: SessionChannel + ?Sized>(
    channel: &mut C,
    command: Command<'_>,
) -> Result<(), SshError> {
    let command_line = command.command_line.clone();
    let outcome = execute(channel, command).await?;
    match outcome.failure() {
        None => Ok(()),
        Some((exit_status, detail)) => Err(SshError::CommandExecution {
            exit_status,
            detail: format!("'{}': {}", command_line, detail),
        }),
    }
}

/// 执行命令并收集输出，非零退出不视为错误
pub(crate) async fn output<C: SessionChannel + ?Sized>(
    channel: &mut C,
    command_line: &str,
) -> Result<CommandOutput, SshError> {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    let outcome = {
        let command = Command::new(command_line)
            .without_pty()
            .stdout(&mut stdout)
            .stderr(&mut stderr);
        execute(channel, command).await?
    };

    match (outcome.exit_status, outcome.failure()) {
        (Some(exit_code), _) => Ok(CommandOutput {
            stdout,
            stderr,
            exit_code,
        }),
        (None, Some((_, detail))) => Err(SshError::CommandExecution {
            exit_status: None,
            detail: format!("'{}': {}", command_line, detail),
        }),
        (None, None) => Err(SshError::CommandExecution {
            exit_status: None,
            detail: format!("'{}': no exit status", command_line),
        }),
    }
}

/// 启动交互式 Shell，直到远程会话结束
pub(crate) async fn start_shell<'a, C: SessionChannel + ?Sized>(
    channel: &mut C,
    pty: PtyRequest,
    stdin: InputStream<'a>,
    stdout: OutputStream<'a>,
    stderr: OutputStream<'a>,
) -> Result<(), SshError> {
    channel
        .request_pty(&pty)
        .await
        .map_err(|e| SshError::Pty(e.to_string()))?;
    if !wait_reply(channel)
        .await
        .map_err(|e| SshError::Pty(e.to_string()))?
    {
        return Err(SshError::Pty("Remote host refused PTY request".to_string()));
    }

    channel
        .request_shell()
        .await
        .map_err(|e| SshError::Shell(e.to_string()))?;
    if !wait_reply(channel)
        .await
        .map_err(|e| SshError::Shell(e.to_string()))?
    {
        return Err(SshError::Shell("Remote host refused shell request".to_string()));
    }

    let outcome = multiplex(channel, Some(stdin), Some(stdout), Some(stderr)).await;
    match outcome.failure() {
        None => Ok(()),
        Some((_, detail)) => Err(SshError::Shell(detail)),
    }
}

async fn read_input(input: &mut Option<InputStream<'_>>, buf: &mut [u8]) -> std::io::Result<usize> {
    match input {
        Some(reader) => reader.read(buf).await,
        None => futures::future::pending().await,
    }
}

/// 把缓冲的输出写入目标，写入失败后丢弃剩余数据
async fn drain(
    mut rx: mpsc::Receiver<Vec<u8>>,
    mut sink: Option<OutputStream<'_>>,
    stream: &str,
) {
    while let Some(chunk) = rx.recv().await {
        let Some(writer) = sink.as_mut() else {
            continue;
        };
        let written = match writer.write_all(&chunk).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            warn!("[SSH] Failed to write {}: {}", stream, e);
            sink = None;
        }
    }
}

/// 并发转发三路数据流，直到远程通道关闭
///
/// 输入在独立分支中读取并写入通道；输出和错误各由一个写入分支处理，
/// 返回前所有分支都已结束，输出不会被截断。输入/输出的失败只记录日志。
async fn multiplex<C: SessionChannel + ?Sized>(
    channel: &mut C,
    mut stdin: Option<InputStream<'_>>,
    stdout: Option<OutputStream<'_>>,
    stderr: Option<OutputStream<'_>>,
) -> ExitOutcome {
    let (out_tx, out_rx) = mpsc::channel(OUTPUT_QUEUE_DEPTH);
    let (err_tx, err_rx) = mpsc::channel(OUTPUT_QUEUE_DEPTH);
    let out_tx = stdout.is_some().then_some(out_tx);
    let err_tx = stderr.is_some().then_some(err_tx);

    let pump = async move {
        let mut outcome = ExitOutcome::default();
        let mut buf = vec![0u8; INPUT_BUFFER_SIZE];
        let mut input_open = stdin.is_some();

        loop {
            tokio::select! {
                read = read_input(&mut stdin, &mut buf), if input_open => {
                    match read {
                        Ok(0) => {
                            input_open = false;
                            if let Err(e) = channel.send_eof().await {
                                warn!("[SSH] Failed to send EOF: {}", e);
                            }
                        }
                        Ok(n) => {
                            if let Err(e) = channel.send_data(&buf[..n]).await {
                                warn!("[SSH] Failed to forward stdin: {}", e);
                                input_open = false;
                            }
                        }
                        Err(e) => {
                            warn!("[SSH] Failed to read stdin: {}", e);
                            input_open = false;
                        }
                    }
                }
                message = channel.next_message() => {
                    match message {
                        // 队列满时在这里等待写入端，通道窗口随之保持关闭
                        Some(ChannelMsg::Data { data }) => {
                            if let Some(tx) = &out_tx {
                                let _ = tx.send(data.to_vec()).await;
                            }
                        }
                        Some(ChannelMsg::ExtendedData { data, ext }) => {
                            if ext == 1 {
                                if let Some(tx) = &err_tx {
                                    let _ = tx.send(data.to_vec()).await;
                                }
                            }
                        }
                        Some(ChannelMsg::ExitStatus { exit_status }) => {
                            debug!("[SSH] Remote exit status: {}", exit_status);
                            outcome.exit_status = Some(exit_status);
                        }
                        Some(ChannelMsg::ExitSignal { signal_name, error_message, .. }) => {
                            debug!("[SSH] Remote exit signal: {:?} {}", signal_name, error_message);
                            outcome.exit_signal = Some(format!("{:?}", signal_name));
                        }
                        Some(ChannelMsg::Failure) => {
                            outcome.refused = true;
                            break;
                        }
                        Some(ChannelMsg::Close) | None => break,
                        Some(_) => {}
                    }
                }
            }
        }

        // 发送端在这里释放，写入分支随之结束
        drop(out_tx);
        drop(err_tx);
        outcome
    };

    let (outcome, _, _) = tokio::join!(
        pump,
        drain(out_rx, stdout, "stdout"),
        drain(err_rx, stderr, "stderr")
    );
    outcome
}
