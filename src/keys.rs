// 密钥文件管理
// 读取、生成、写入 SSH 密钥对：私钥位于 <path>，公钥位于 <path>.pub

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rand::rngs::OsRng;
use russh::keys::ssh_key::private::{KeypairData, RsaKeypair};
use russh::keys::ssh_key::LineEnding;
use russh::keys::PrivateKey;
use thiserror::Error;
use tracing::{debug, info};

/// 生成密钥的位数
pub const RSA_KEY_BITS: usize = 2048;

const KEY_COMMENT: &str = "shellport";

/// 密钥文件错误
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Private key not found: {0}")]
    NotFound(PathBuf),

    #[error("Private key path is a directory: {0}")]
    IsDirectory(PathBuf),

    #[error("Public key not found: {0}")]
    PublicKeyNotFound(PathBuf),

    #[error("Key generation failed: {0}")]
    Generation(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// 密钥对文本
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyPair {
    /// 私钥（OpenSSH PEM 格式）
    pub private: String,
    /// 公钥（authorized_keys 行格式）
    pub public: String,
}

/// 公钥文件路径：<path>.pub
pub fn public_key_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".pub");
    PathBuf::from(name)
}

/// 读取密钥对，文本原样返回
pub fn read(path: &Path) -> Result<KeyPair, KeyError> {
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(KeyError::NotFound(path.to_path_buf()))
        }
        Err(e) => return Err(KeyError::Io(e)),
    };
    if meta.is_dir() {
        return Err(KeyError::IsDirectory(path.to_path_buf()));
    }

    let private = fs::read_to_string(path)?;

    let pub_path = public_key_path(path);
    let public = match fs::read_to_string(&pub_path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(KeyError::PublicKeyNotFound(pub_path))
        }
        Err(e) => return Err(KeyError::Io(e)),
    };

    debug!("[Keys] Loaded key pair from {}", path.display());
    Ok(KeyPair { private, public })
}

/// 生成新的 RSA 密钥对
pub fn generate() -> Result<KeyPair, KeyError> {
    let keypair = RsaKeypair::random(&mut OsRng, RSA_KEY_BITS)
        .map_err(|e| KeyError::Generation(e.to_string()))?;
    let key = PrivateKey::new(KeypairData::Rsa(keypair), KEY_COMMENT)
        .map_err(|e| KeyError::Generation(e.to_string()))?;

    let private = key
        .to_openssh(LineEnding::LF)
        .map_err(|e| KeyError::Generation(e.to_string()))?
        .to_string();
    let public = key
        .public_key()
        .to_openssh()
        .map_err(|e| KeyError::Generation(e.to_string()))?;

    Ok(KeyPair {
        private,
        public: format!("{}\n", public),
    })
}

/// 读取密钥对；私钥或公钥文件缺失时生成新的密钥对并写入
pub fn read_or_generate(path: &Path) -> Result<KeyPair, KeyError> {
    match read(path) {
        Ok(pair) => Ok(pair),
        Err(KeyError::NotFound(_)) | Err(KeyError::PublicKeyNotFound(_)) => {
            info!("[Keys] Generating new key pair at {}", path.display());
            let pair = generate()?;
            write(path, &pair.public, &pair.private)?;
            Ok(pair)
        }
        Err(e) => Err(e),
    }
}

/// 写入密钥对：私钥 0600，公钥 0644，自动创建上级目录
pub fn write(path: &Path, public: &str, private: &str) -> Result<(), KeyError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    write_with_mode(path, private, 0o600)?;
    write_with_mode(&public_key_path(path), public, 0o644)?;

    debug!("[Keys] Wrote key pair to {}", path.display());
    Ok(())
}

#[cfg(unix)]
fn write_with_mode(path: &Path, contents: &str, mode: u32) -> io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)?;
    file.write_all(contents.as_bytes())?;
    // 已存在的文件不受 open 的 mode 影响
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn write_with_mode(path: &Path, contents: &str, _mode: u32) -> io::Result<()> {
    fs::write(path, contents)
}
