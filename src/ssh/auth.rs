// 认证凭据
// 将密码/私钥转换为连接阶段按顺序尝试的认证凭据

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use russh::keys::PrivateKey;

use super::error::SshError;

/// 单个认证凭据
#[derive(Clone)]
pub enum AuthProof {
    /// 密码认证
    Password(String),
    /// 公钥认证（私钥已解析）
    PublicKey(Arc<PrivateKey>),
}

impl fmt::Debug for AuthProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthProof::Password(_) => f.write_str("Password(***)"),
            AuthProof::PublicKey(key) => write!(f, "PublicKey({})", key.algorithm()),
        }
    }
}

/// 有序的认证凭据列表
/// 连接时按顺序尝试，直到某一个成功
#[derive(Clone, Debug, Default)]
pub struct Authentication {
    proofs: Vec<AuthProof>,
}

impl Authentication {
    /// 密码认证
    pub fn password(password: impl Into<String>) -> Self {
        Self {
            proofs: vec![AuthProof::Password(password.into())],
        }
    }

    /// 带口令的私钥
    pub fn key_with_passphrase(private_key: &str, passphrase: &str) -> Result<Self, SshError> {
        let key = russh::keys::decode_secret_key(private_key, Some(passphrase))
            .map_err(|e| SshError::KeyDecode(format!("Failed to decode key: {}", e)))?;
        Ok(Self::from_key(key))
    }

    /// 无口令的私钥（如果私钥实际有口令保护会失败）
    pub fn key_without_passphrase(private_key: &str) -> Result<Self, SshError> {
        let key = russh::keys::decode_secret_key(private_key, None).map_err(|e| {
            SshError::KeyDecode(format!("Failed to decode key (no passphrase): {}", e))
        })?;
        Ok(Self::from_key(key))
    }

    /// 从私钥文件加载
    pub fn key_file(path: &Path, passphrase: Option<&str>) -> Result<Self, SshError> {
        let key_data = std::fs::read_to_string(path).map_err(|e| {
            SshError::KeyDecode(format!("Failed to read key file {}: {}", path.display(), e))
        })?;

        match passphrase {
            Some(pass) => Self::key_with_passphrase(&key_data, pass),
            None => Self::key_without_passphrase(&key_data),
        }
    }

    fn from_key(key: PrivateKey) -> Self {
        Self {
            proofs: vec![AuthProof::PublicKey(Arc::new(key))],
        }
    }

    /// 追加单个凭据
    pub fn push(&mut self, proof: AuthProof) {
        self.proofs.push(proof);
    }

    /// 合并两组凭据，保持顺序
    pub fn and(mut self, other: Authentication) -> Self {
        self.proofs.extend(other.proofs);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.proofs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.proofs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AuthProof> {
        self.proofs.iter()
    }
}

impl From<AuthProof> for Authentication {
    fn from(proof: AuthProof) -> Self {
        Self {
            proofs: vec![proof],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use russh::keys::ssh_key::LineEnding;
    use russh::keys::Algorithm;

    fn ed25519_key() -> PrivateKey {
        PrivateKey::random(&mut rand::rngs::OsRng, Algorithm::Ed25519).unwrap()
    }

    #[test]
    fn test_password_debug_hides_secret() {
        let auth = Authentication::password("hunter2");
        let debug = format!("{:?}", auth);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("Password(***)"));
    }

    #[test]
    fn test_key_without_passphrase() {
        let pem = ed25519_key().to_openssh(LineEnding::LF).unwrap();
        let auth = Authentication::key_without_passphrase(&pem).unwrap();
        assert_eq!(auth.len(), 1);
        assert!(matches!(auth.iter().next(), Some(AuthProof::PublicKey(_))));
    }

    #[test]
    fn test_malformed_key_is_decode_error() {
        let result = Authentication::key_without_passphrase("not a key");
        assert!(matches!(result, Err(SshError::KeyDecode(_))));

        let result = Authentication::key_with_passphrase("not a key", "secret");
        assert!(matches!(result, Err(SshError::KeyDecode(_))));
    }

    #[test]
    fn test_encrypted_key_needs_passphrase() {
        let encrypted = ed25519_key()
            .encrypt(&mut rand::rngs::OsRng, "secret")
            .unwrap();
        let pem = encrypted.to_openssh(LineEnding::LF).unwrap();

        assert!(matches!(
            Authentication::key_without_passphrase(&pem),
            Err(SshError::KeyDecode(_))
        ));
        assert!(matches!(
            Authentication::key_with_passphrase(&pem, "wrong"),
            Err(SshError::KeyDecode(_))
        ));
        assert!(Authentication::key_with_passphrase(&pem, "secret").is_ok());
    }

    #[test]
    fn test_combined_proofs_keep_order() {
        let pem = ed25519_key().to_openssh(LineEnding::LF).unwrap();
        let auth = Authentication::key_without_passphrase(&pem)
            .unwrap()
            .and(Authentication::password("pw"));

        let kinds: Vec<_> = auth
            .iter()
            .map(|p| matches!(p, AuthProof::Password(_)))
            .collect();
        assert_eq!(kinds, vec![false, true]);
    }

    #[test]
    fn test_missing_key_file() {
        let result = Authentication::key_file(Path::new("/nonexistent/id_rsa"), None);
        assert!(matches!(result, Err(SshError::KeyDecode(_))));
    }
}
