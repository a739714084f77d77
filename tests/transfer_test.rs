// 传输引擎集成测试：用本地目录模拟远程文件系统

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use shellport::sftp::{self, EntryKind, RemoteEntry, RemoteFs, RemoteReader, RemoteWriter};
use shellport::SshError;
use tempfile::TempDir;

/// 以本地目录为根的 "远程" 文件系统
struct DirFs {
    root: PathBuf,
    writes: AtomicUsize,
}

impl DirFs {
    fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            writes: AtomicUsize::new(0),
        }
    }

    fn local(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteFs for DirFs {
    async fn kind(&self, path: &str) -> Result<EntryKind, SshError> {
        match tokio::fs::metadata(self.local(path)).await {
            Ok(meta) if meta.is_dir() => Ok(EntryKind::Directory),
            Ok(_) => Ok(EntryKind::File),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(EntryKind::Missing),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, SshError> {
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(self.local(path)).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let kind = if entry.file_type().await?.is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            };
            entries.push(RemoteEntry {
                path: sftp::remote::join(path, &name),
                kind,
            });
        }
        Ok(entries)
    }

    async fn create_dir(&self, path: &str) -> Result<(), SshError> {
        tokio::fs::create_dir(self.local(path)).await?;
        Ok(())
    }

    async fn open_read(&self, path: &str) -> Result<RemoteReader, SshError> {
        Ok(Box::new(tokio::fs::File::open(self.local(path)).await?))
    }

    async fn open_write(&self, path: &str) -> Result<RemoteWriter, SshError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(tokio::fs::File::create(self.local(path)).await?))
    }
}

fn setup() -> (TempDir, TempDir, DirFs) {
    let local = tempfile::tempdir().unwrap();
    let remote_root = tempfile::tempdir().unwrap();
    let remote = DirFs::new(remote_root.path());
    (local, remote_root, remote)
}

#[tokio::test]
async fn test_upload_directory_keeps_relative_layout() {
    let (local, remote_root, remote) = setup();
    let src = local.path().join("src");
    std::fs::create_dir_all(src.join("a")).unwrap();
    std::fs::write(src.join("a/b.txt"), b"hello").unwrap();
    std::fs::write(src.join("top.txt"), b"top").unwrap();

    sftp::upload(&remote, &src, "/r").await.unwrap();

    assert_eq!(
        std::fs::read(remote_root.path().join("r/a/b.txt")).unwrap(),
        b"hello"
    );
    assert_eq!(
        std::fs::read(remote_root.path().join("r/top.txt")).unwrap(),
        b"top"
    );
    assert_eq!(remote.writes(), 2);
}

#[tokio::test]
async fn test_round_trip_preserves_bytes() {
    let (local, _remote_root, remote) = setup();
    let src = local.path().join("data");
    std::fs::create_dir_all(src.join("nested/deeper")).unwrap();
    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(src.join("nested/deeper/blob.bin"), &payload).unwrap();
    std::fs::write(src.join("readme"), b"r").unwrap();

    sftp::upload(&remote, &src, "/backup").await.unwrap();

    let restored = local.path().join("restored");
    sftp::download(&remote, "/backup", &restored).await.unwrap();

    assert_eq!(
        std::fs::read(restored.join("nested/deeper/blob.bin")).unwrap(),
        payload
    );
    assert_eq!(std::fs::read(restored.join("readme")).unwrap(), b"r");
}

#[tokio::test]
async fn test_upload_single_file() {
    let (local, remote_root, remote) = setup();
    let file = local.path().join("one.txt");
    std::fs::write(&file, b"1").unwrap();

    sftp::upload(&remote, &file, "/x/y/one.txt").await.unwrap();

    assert_eq!(
        std::fs::read(remote_root.path().join("x/y/one.txt")).unwrap(),
        b"1"
    );
}

#[tokio::test]
async fn test_upload_file_rejects_directory_without_writing() {
    let (local, _remote_root, remote) = setup();

    let result = sftp::upload_file(&remote, local.path(), "/r/file").await;

    assert!(matches!(result, Err(SshError::SourceIsDirectory(_))));
    assert_eq!(remote.writes(), 0);
}

#[tokio::test]
async fn test_upload_directory_rejects_file() {
    let (local, _remote_root, remote) = setup();
    let file = local.path().join("f");
    std::fs::write(&file, b"f").unwrap();

    let result = sftp::upload_directory(&remote, &file, "/r").await;
    assert!(matches!(result, Err(SshError::SourceIsFile(_))));
}

#[tokio::test]
async fn test_download_directory_rejects_file() {
    let (local, remote_root, remote) = setup();
    std::fs::write(remote_root.path().join("f.txt"), b"f").unwrap();

    let result = sftp::download_directory(&remote, "/f.txt", local.path()).await;
    assert!(matches!(result, Err(SshError::SourceIsFile(_))));
}

#[tokio::test]
async fn test_download_file_rejects_directory() {
    let (local, remote_root, remote) = setup();
    std::fs::create_dir(remote_root.path().join("d")).unwrap();

    let dest = local.path().join("out");
    let result = sftp::download_file(&remote, "/d", &dest).await;
    assert!(matches!(result, Err(SshError::SourceIsDirectory(_))));
    assert!(!dest.exists());
}

#[tokio::test]
async fn test_missing_sources() {
    let (local, _remote_root, remote) = setup();

    let up = sftp::upload(&remote, &local.path().join("nope"), "/r").await;
    assert!(matches!(up, Err(SshError::SourceNotFound(_))));

    let down = sftp::download(&remote, "/nope", local.path()).await;
    assert!(matches!(down, Err(SshError::SourceNotFound(_))));
}

#[tokio::test]
async fn test_empty_directories_are_not_recreated() {
    let (local, remote_root, remote) = setup();
    let src = local.path().join("src");
    std::fs::create_dir_all(src.join("empty")).unwrap();
    std::fs::write(src.join("keep.txt"), b"k").unwrap();

    sftp::upload(&remote, &src, "/r").await.unwrap();

    assert!(remote_root.path().join("r/keep.txt").exists());
    assert!(!remote_root.path().join("r/empty").exists());
}

#[tokio::test]
async fn test_create_dir_all_rejects_existing_file() {
    let (_local, remote_root, remote) = setup();
    std::fs::write(remote_root.path().join("blocker"), b"x").unwrap();

    let result = remote.create_dir_all("/blocker").await;
    assert!(matches!(result, Err(SshError::Sftp(_))));
}
