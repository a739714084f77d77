// 递归文件传输
// 上传（本地 -> 远程）与下载（远程 -> 本地），目录按相对路径结构逐个复制文件

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use super::remote::{self, EntryKind, RemoteFs};
use crate::ssh::SshError;

/// 是否在传输前重新确认源路径类型
///
/// 由分派函数（upload/download）调用时已经确认过类型，内部调用跳过确认
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceCheck {
    Verify,
    Skip,
}

// ======================== 上传 ========================

/// 上传本地文件或目录，根据源类型分派
pub async fn upload<R: RemoteFs + ?Sized>(
    remote: &R,
    src: &Path,
    dest: &str,
) -> Result<(), SshError> {
    match local_kind(src).await? {
        EntryKind::Missing => Err(SshError::SourceNotFound(src.display().to_string())),
        EntryKind::Directory => upload_directory_with(remote, src, dest, SourceCheck::Skip).await,
        EntryKind::File => upload_file_with(remote, src, dest, SourceCheck::Skip).await,
    }
}

/// 递归上传本地目录
pub async fn upload_directory<R: RemoteFs + ?Sized>(
    remote: &R,
    src: &Path,
    dest: &str,
) -> Result<(), SshError> {
    upload_directory_with(remote, src, dest, SourceCheck::Verify).await
}

/// 上传单个本地文件
pub async fn upload_file<R: RemoteFs + ?Sized>(
    remote: &R,
    src: &Path,
    dest: &str,
) -> Result<(), SshError> {
    upload_file_with(remote, src, dest, SourceCheck::Verify).await
}

async fn upload_directory_with<R: RemoteFs + ?Sized>(
    remote: &R,
    src: &Path,
    dest: &str,
    check: SourceCheck,
) -> Result<(), SshError> {
    if check == SourceCheck::Verify {
        match local_kind(src).await? {
            EntryKind::Missing => return Err(SshError::SourceNotFound(src.display().to_string())),
            EntryKind::File => return Err(SshError::SourceIsFile(src.display().to_string())),
            EntryKind::Directory => {}
        }
    }

    info!("[SFTP] Uploading directory {} -> {}", src.display(), dest);

    let mut count = 0usize;
    for file in walk_local(src).await? {
        let relative = file
            .strip_prefix(src)
            .map_err(|e| SshError::Config(format!("{}: {}", file.display(), e)))?;
        let file_dest = remote::join(dest, &relative_to_remote(relative));

        upload_file_with(remote, &file, &file_dest, SourceCheck::Skip).await?;
        count += 1;
    }

    info!("[SFTP] Uploaded {} file(s) to {}", count, dest);
    Ok(())
}

async fn upload_file_with<R: RemoteFs + ?Sized>(
    remote: &R,
    src: &Path,
    dest: &str,
    check: SourceCheck,
) -> Result<(), SshError> {
    if check == SourceCheck::Verify {
        match local_kind(src).await? {
            EntryKind::Missing => return Err(SshError::SourceNotFound(src.display().to_string())),
            EntryKind::Directory => {
                return Err(SshError::SourceIsDirectory(src.display().to_string()))
            }
            EntryKind::File => {}
        }
    }

    if let Some(directory) = remote::parent(dest) {
        remote.create_dir_all(directory).await?;
    }

    let mut reader = fs::File::open(src).await?;
    let mut writer = remote.open_write(dest).await?;
    let bytes = copy_stream(&mut reader, &mut writer).await?;

    debug!("[SFTP] Uploaded {} ({} bytes) -> {}", src.display(), bytes, dest);
    Ok(())
}

// ======================== 下载 ========================

/// 下载远程文件或目录，根据源类型分派
pub async fn download<R: RemoteFs + ?Sized>(
    remote: &R,
    src: &str,
    dest: &Path,
) -> Result<(), SshError> {
    match remote.kind(src).await? {
        EntryKind::Missing => Err(SshError::SourceNotFound(src.to_string())),
        EntryKind::Directory => {
            download_directory_with(remote, src, dest, SourceCheck::Skip).await
        }
        EntryKind::File => download_file_with(remote, src, dest, SourceCheck::Skip).await,
    }
}

/// 递归下载远程目录
pub async fn download_directory<R: RemoteFs + ?Sized>(
    remote: &R,
    src: &str,
    dest: &Path,
) -> Result<(), SshError> {
    download_directory_with(remote, src, dest, SourceCheck::Verify).await
}

/// 下载单个远程文件
pub async fn download_file<R: RemoteFs + ?Sized>(
    remote: &R,
    src: &str,
    dest: &Path,
) -> Result<(), SshError> {
    download_file_with(remote, src, dest, SourceCheck::Verify).await
}

async fn download_directory_with<R: RemoteFs + ?Sized>(
    remote: &R,
    src: &str,
    dest: &Path,
    check: SourceCheck,
) -> Result<(), SshError> {
    if check == SourceCheck::Verify {
        match remote.kind(src).await? {
            EntryKind::Missing => return Err(SshError::SourceNotFound(src.to_string())),
            EntryKind::File => return Err(SshError::SourceIsFile(src.to_string())),
            EntryKind::Directory => {}
        }
    }

    info!("[SFTP] Downloading directory {} -> {}", src, dest.display());

    let root = src.trim_end_matches('/');
    let mut count = 0usize;
    for entry in remote.walk(src).await? {
        if entry.kind == EntryKind::Directory {
            continue;
        }

        let relative = entry
            .path
            .strip_prefix(root)
            .unwrap_or(&entry.path)
            .trim_start_matches('/');
        let file_dest = dest.join(relative);

        download_file_with(remote, &entry.path, &file_dest, SourceCheck::Skip).await?;
        count += 1;
    }

    info!("[SFTP] Downloaded {} file(s) to {}", count, dest.display());
    Ok(())
}

async fn download_file_with<R: RemoteFs + ?Sized>(
    remote: &R,
    src: &str,
    dest: &Path,
    check: SourceCheck,
) -> Result<(), SshError> {
    if check == SourceCheck::Verify {
        match remote.kind(src).await? {
            EntryKind::Missing => return Err(SshError::SourceNotFound(src.to_string())),
            EntryKind::Directory => return Err(SshError::SourceIsDirectory(src.to_string())),
            EntryKind::File => {}
        }
    }

    if let Some(directory) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(directory).await?;
    }

    let mut reader = remote.open_read(src).await?;
    let mut writer = fs::File::create(dest).await?;
    let bytes = copy_stream(&mut reader, &mut writer).await?;

    debug!("[SFTP] Downloaded {} ({} bytes) -> {}", src, bytes, dest.display());
    Ok(())
}

// ======================== 辅助函数 ========================

/// 复制全部字节并关闭写入端
async fn copy_stream<R, W>(reader: &mut R, writer: &mut W) -> Result<u64, SshError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let bytes = tokio::io::copy(reader, writer).await?;
    writer.shutdown().await?;
    Ok(bytes)
}

async fn local_kind(path: &Path) -> Result<EntryKind, SshError> {
    match fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => Ok(EntryKind::Directory),
        Ok(_) => Ok(EntryKind::File),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(EntryKind::Missing),
        Err(e) => Err(SshError::Io(e)),
    }
}

/// 递归收集本地目录下所有非目录条目，按路径排序；任一错误立即中止
async fn walk_local(root: &Path) -> Result<Vec<PathBuf>, SshError> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut read_dir = fs::read_dir(&dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
            } else {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

/// 本地相对路径转为远程路径分隔符
fn relative_to_remote(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
