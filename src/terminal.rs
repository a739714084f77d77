// 本地控制终端
// 查询终端尺寸、进入原始模式（RAII 守卫，退出时恢复）、可停止的标准输入读取

use std::io::{self, Read};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::ssh::SshError;

/// 进程内只有一个控制终端，原始模式状态全局共享
static RAW_MODE_ACTIVE: AtomicBool = AtomicBool::new(false);

/// 输入线程检查停止标记的间隔
const INPUT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// 单次读取大小，不小于 std 的 stdin 缓冲区，读取时直接绕过内部缓冲
const INPUT_CHUNK_SIZE: usize = 8192;

const INPUT_QUEUE_DEPTH: usize = 32;

/// 查询控制终端尺寸 (列, 行)
pub fn size() -> Result<(u16, u16), SshError> {
    crossterm::terminal::size()
        .map_err(|e| SshError::Pty(format!("Failed to query terminal size: {}", e)))
}

/// 原始模式守卫
/// 创建时进入原始模式，Drop 时恢复，所有退出路径都只恢复一次
pub struct RawModeGuard {
    /// 是否由本守卫开启了原始模式
    owned: bool,
}

impl RawModeGuard {
    /// 进入原始模式
    pub fn acquire() -> Result<Self, SshError> {
        if RAW_MODE_ACTIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // 外层已经处于原始模式，由外层负责恢复
            return Ok(Self { owned: false });
        }

        if let Err(e) = enable_raw_mode() {
            RAW_MODE_ACTIVE.store(false, Ordering::SeqCst);
            return Err(SshError::RawMode(format!("Failed to enable raw mode: {}", e)));
        }

        debug!("[Terminal] Raw mode enabled");
        Ok(Self { owned: true })
    }

    pub fn is_owner(&self) -> bool {
        self.owned
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        if let Err(e) = disable_raw_mode() {
            warn!("[Terminal] Failed to restore terminal mode: {}", e);
        } else {
            debug!("[Terminal] Raw mode restored");
        }
        RAW_MODE_ACTIVE.store(false, Ordering::SeqCst);
    }
}

/// 交互式 Shell 的标准输入
///
/// 独立线程轮询 stdin，只在有数据时才读取。Drop 之后线程在一个轮询周期内退出，
/// 不会留下阻塞中的读取去吞掉调用方后续的按键。
pub struct TerminalInput {
    rx: mpsc::Receiver<io::Result<Vec<u8>>>,
    pending: Vec<u8>,
    stop: Arc<AtomicBool>,
}

impl TerminalInput {
    /// 启动输入线程
    pub fn spawn() -> Result<Self, SshError> {
        let (tx, rx) = mpsc::channel(INPUT_QUEUE_DEPTH);
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();

        std::thread::Builder::new()
            .name("shellport-stdin".to_string())
            .spawn(move || read_loop(tx, thread_stop))?;

        Ok(Self::new(rx, stop))
    }

    fn new(rx: mpsc::Receiver<io::Result<Vec<u8>>>, stop: Arc<AtomicBool>) -> Self {
        Self {
            rx,
            pending: Vec::new(),
            stop,
        }
    }
}

impl AsyncRead for TerminalInput {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.pending.is_empty() {
            match self.rx.poll_recv(cx) {
                Poll::Ready(Some(Ok(chunk))) => self.pending = chunk,
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Err(e)),
                // 线程结束即 EOF
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }

        let n = buf.remaining().min(self.pending.len());
        buf.put_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Poll::Ready(Ok(()))
    }
}

impl Drop for TerminalInput {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

fn read_loop(tx: mpsc::Sender<io::Result<Vec<u8>>>, stop: Arc<AtomicBool>) {
    let stdin = io::stdin();
    let mut buf = vec![0u8; INPUT_CHUNK_SIZE];

    while !stop.load(Ordering::SeqCst) {
        match poll_stdin(&stdin, INPUT_POLL_INTERVAL) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                break;
            }
        }
        if stop.load(Ordering::SeqCst) {
            break;
        }

        match stdin.lock().read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tx.blocking_send(Ok(buf[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                break;
            }
        }
    }

    debug!("[Terminal] Input reader stopped");
}

/// 等待 stdin 可读，超时返回 false
#[cfg(unix)]
fn poll_stdin(stdin: &io::Stdin, timeout: Duration) -> io::Result<bool> {
    use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
    use std::os::fd::AsFd;

    let mut fds = [PollFd::new(stdin.as_fd(), PollFlags::POLLIN)];
    let timeout_ms = timeout.as_millis().min(u16::MAX as u128) as u16;

    match poll(&mut fds, PollTimeout::from(timeout_ms)) {
        Ok(n) => Ok(n > 0),
        Err(nix::errno::Errno::EINTR) => Ok(false),
        Err(e) => Err(io::Error::from(e)),
    }
}

// TODO: Windows 上改用 WaitForSingleObject 轮询控制台句柄，目前读取无法提前停止
#[cfg(not(unix))]
fn poll_stdin(_stdin: &io::Stdin, _timeout: Duration) -> io::Result<bool> {
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::IsTerminal;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_nested_guard_does_not_restore() {
        // 外层已处于原始模式：内层守卫不拥有，也不恢复
        RAW_MODE_ACTIVE.store(true, Ordering::SeqCst);
        let inner = RawModeGuard::acquire().unwrap();
        assert!(!inner.is_owner());
        drop(inner);
        assert!(RAW_MODE_ACTIVE.load(Ordering::SeqCst));
        RAW_MODE_ACTIVE.store(false, Ordering::SeqCst);

        if !io::stdin().is_terminal() {
            return;
        }

        let outer = RawModeGuard::acquire().unwrap();
        assert!(outer.is_owner());
        {
            let inner = RawModeGuard::acquire().unwrap();
            assert!(!inner.is_owner());
        }
        assert!(RAW_MODE_ACTIVE.load(Ordering::SeqCst));
        drop(outer);
        assert!(!RAW_MODE_ACTIVE.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_terminal_input_splits_chunks_and_ends() {
        let (tx, rx) = mpsc::channel(4);
        let stop = Arc::new(AtomicBool::new(false));
        let mut input = TerminalInput::new(rx, stop);

        tx.send(Ok(b"hello".to_vec())).await.unwrap();
        tx.send(Ok(b"!".to_vec())).await.unwrap();
        drop(tx);

        let mut small = [0u8; 3];
        assert_eq!(input.read(&mut small).await.unwrap(), 3);
        assert_eq!(&small, b"hel");

        let mut rest = Vec::new();
        input.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"lo!");
    }

    #[tokio::test]
    async fn test_terminal_input_surfaces_errors() {
        let (tx, rx) = mpsc::channel(1);
        let mut input = TerminalInput::new(rx, Arc::new(AtomicBool::new(false)));

        tx.send(Err(io::Error::new(io::ErrorKind::Other, "tty gone")))
            .await
            .unwrap();

        let mut buf = [0u8; 8];
        assert!(input.read(&mut buf).await.is_err());
    }

    #[test]
    fn test_drop_stops_reader() {
        let (_tx, rx) = mpsc::channel(1);
        let stop = Arc::new(AtomicBool::new(false));
        drop(TerminalInput::new(rx, stop.clone()));
        assert!(stop.load(Ordering::SeqCst));
    }
}
