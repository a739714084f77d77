// 远程文件系统抽象
// 传输引擎只依赖这个 trait，russh-sftp 的 SftpSession 是它的实现

use async_trait::async_trait;
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::StatusCode;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::ssh::SshError;

/// 远程读取流
pub type RemoteReader = Box<dyn AsyncRead + Send + Unpin>;
/// 远程写入流
pub type RemoteWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// 路径分类
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    /// 不存在
    Missing,
    /// 普通文件（包括符号链接等非目录项）
    File,
    /// 目录
    Directory,
}

/// 遍历得到的远程条目
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteEntry {
    /// 完整路径
    pub path: String,
    /// 类型（File 或 Directory）
    pub kind: EntryKind,
}

/// 远程文件系统操作
#[async_trait]
pub trait RemoteFs: Send + Sync {
    /// 获取路径类型，不存在返回 Missing
    async fn kind(&self, path: &str) -> Result<EntryKind, SshError>;

    /// 读取目录的直接子项（不含 . 和 ..）
    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, SshError>;

    /// 创建单级目录
    async fn create_dir(&self, path: &str) -> Result<(), SshError>;

    /// 以只读方式打开文件
    async fn open_read(&self, path: &str) -> Result<RemoteReader, SshError>;

    /// 以写方式打开文件（不存在则创建，存在则截断）
    async fn open_write(&self, path: &str) -> Result<RemoteWriter, SshError>;

    /// 递归创建目录（包括所有上级目录）
    async fn create_dir_all(&self, path: &str) -> Result<(), SshError> {
        match self.kind(path).await? {
            EntryKind::Directory => return Ok(()),
            EntryKind::File => {
                return Err(SshError::Sftp(format!("{} exists and is not a directory", path)))
            }
            EntryKind::Missing => {}
        }

        for ancestor in ancestors(path) {
            match self.kind(&ancestor).await? {
                EntryKind::Directory => {}
                EntryKind::Missing => {
                    debug!("[SFTP] Creating directory: {}", ancestor);
                    self.create_dir(&ancestor).await?;
                }
                EntryKind::File => {
                    return Err(SshError::Sftp(format!(
                        "{} exists and is not a directory",
                        ancestor
                    )))
                }
            }
        }
        Ok(())
    }

    /// 递归遍历目录下所有条目（不含根目录本身），任一错误立即中止
    async fn walk(&self, root: &str) -> Result<Vec<RemoteEntry>, SshError> {
        let mut entries = Vec::new();
        let mut pending = vec![root.to_string()];

        while let Some(dir) = pending.pop() {
            let mut children = self.read_dir(&dir).await?;
            children.sort_by(|a, b| a.path.cmp(&b.path));

            for child in children.into_iter().rev() {
                if child.kind == EntryKind::Directory {
                    pending.push(child.path.clone());
                }
                entries.push(child);
            }
        }

        Ok(entries)
    }
}

/// 拼接远程路径
pub fn join(base: &str, name: &str) -> String {
    let name = name.trim_start_matches('/');
    if base.is_empty() {
        name.to_string()
    } else if base == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", base.trim_end_matches('/'), name)
    }
}

/// 远程路径的上级目录；没有上级（如相对路径 "a.txt"）返回 None
pub fn parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some(("", _)) => Some("/"),
        Some((dir, _)) => Some(dir),
        None => None,
    }
}

/// 路径的各级祖先（包括自身），从浅到深
fn ancestors(path: &str) -> Vec<String> {
    let absolute = path.starts_with('/');
    let mut current = String::new();
    let mut result = Vec::new();

    for part in path.split('/').filter(|p| !p.is_empty()) {
        if absolute || !current.is_empty() {
            current.push('/');
        }
        current.push_str(part);
        result.push(current.clone());
    }
    result
}

fn is_not_found(e: &SftpError) -> bool {
    matches!(e, SftpError::Status(status) if matches!(status.status_code, StatusCode::NoSuchFile))
}

#[async_trait]
impl RemoteFs for SftpSession {
    async fn kind(&self, path: &str) -> Result<EntryKind, SshError> {
        match self.metadata(path).await {
            Ok(attrs) if attrs.is_dir() => Ok(EntryKind::Directory),
            Ok(_) => Ok(EntryKind::File),
            Err(e) if is_not_found(&e) => Ok(EntryKind::Missing),
            Err(e) => Err(SshError::Sftp(format!("Failed to stat {}: {}", path, e))),
        }
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, SshError> {
        debug!("[SFTP] Reading directory: {}", path);

        let dir = SftpSession::read_dir(self, path)
            .await
            .map_err(|e| SshError::Sftp(format!("Failed to read directory {}: {}", path, e)))?;

        let mut entries = Vec::new();
        for entry in dir {
            let name = entry.file_name();

            // 跳过 . 和 ..
            if name == "." || name == ".." {
                continue;
            }

            let kind = if entry.metadata().is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            };

            entries.push(RemoteEntry {
                path: join(path, &name),
                kind,
            });
        }

        Ok(entries)
    }

    async fn create_dir(&self, path: &str) -> Result<(), SshError> {
        SftpSession::create_dir(self, path)
            .await
            .map_err(|e| SshError::Sftp(format!("Failed to create directory {}: {}", path, e)))
    }

    async fn open_read(&self, path: &str) -> Result<RemoteReader, SshError> {
        let file = self
            .open(path)
            .await
            .map_err(|e| SshError::Sftp(format!("Failed to open file {}: {}", path, e)))?;
        Ok(Box::new(file))
    }

    async fn open_write(&self, path: &str) -> Result<RemoteWriter, SshError> {
        let file = self
            .create(path)
            .await
            .map_err(|e| SshError::Sftp(format!("Failed to create file {}: {}", path, e)))?;
        Ok(Box::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join() {
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/r", "a/b.txt"), "/r/a/b.txt");
        assert_eq!(join("/r/", "/a"), "/r/a");
        assert_eq!(join("", "a"), "a");
    }

    #[test]
    fn test_parent() {
        assert_eq!(parent("/r/a/b.txt"), Some("/r/a"));
        assert_eq!(parent("/b.txt"), Some("/"));
        assert_eq!(parent("dir/b.txt"), Some("dir"));
        assert_eq!(parent("b.txt"), None);
    }

    #[test]
    fn test_ancestors() {
        assert_eq!(ancestors("/r/a/b"), vec!["/r", "/r/a", "/r/a/b"]);
        assert_eq!(ancestors("r/a"), vec!["r", "r/a"]);
        assert_eq!(ancestors("/r//a/"), vec!["/r", "/r/a"]);
    }
}
