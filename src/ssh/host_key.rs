// 主机密钥校验回调
// 策略由调用方决定，这里只提供回调形状和两个常用实现

use std::fmt;
use std::sync::Arc;

use russh::keys::{HashAlg, PublicKey};
use tracing::warn;

/// 连接时观察到的主机身份
pub struct HostIdentity<'a> {
    /// 主机名
    pub host: &'a str,
    /// 端口
    pub port: u16,
    /// 服务器公钥
    pub key: &'a PublicKey,
}

impl HostIdentity<'_> {
    /// SHA256 指纹，格式 `SHA256:...`
    pub fn fingerprint(&self) -> String {
        self.key.fingerprint(HashAlg::Sha256).to_string()
    }
}

/// 主机密钥校验回调：返回 true 接受，false 拒绝
#[derive(Clone)]
pub struct HostKeyCallback(Arc<dyn Fn(&HostIdentity<'_>) -> bool + Send + Sync>);

impl HostKeyCallback {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&HostIdentity<'_>) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn verify(&self, identity: &HostIdentity<'_>) -> bool {
        (self.0)(identity)
    }
}

impl fmt::Debug for HostKeyCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HostKeyCallback")
    }
}

/// 接受任意主机密钥（不安全，仅用于测试或受信网络）
pub fn accept_any() -> HostKeyCallback {
    HostKeyCallback::new(|identity| {
        warn!(
            "[SSH] Accepting unverified host key for {}:{} ({})",
            identity.host,
            identity.port,
            identity.fingerprint()
        );
        true
    })
}

/// 只接受指定 SHA256 指纹的主机密钥
pub fn fixed_fingerprint(expected: impl Into<String>) -> HostKeyCallback {
    let expected = expected.into();
    HostKeyCallback::new(move |identity| {
        let actual = identity.fingerprint();
        if actual == expected {
            true
        } else {
            warn!(
                "[SSH] Host key mismatch for {}:{}! Expected: {}, Got: {}",
                identity.host, identity.port, expected, actual
            );
            false
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use russh::keys::{Algorithm, PrivateKey};

    fn public_key() -> PublicKey {
        PrivateKey::random(&mut rand::rngs::OsRng, Algorithm::Ed25519)
            .unwrap()
            .public_key()
            .clone()
    }

    #[test]
    fn test_fixed_fingerprint() {
        let key = public_key();
        let identity = HostIdentity {
            host: "example.com",
            port: 22,
            key: &key,
        };

        let pinned = fixed_fingerprint(identity.fingerprint());
        assert!(pinned.verify(&identity));

        let other = public_key();
        let mismatch = HostIdentity {
            host: "example.com",
            port: 22,
            key: &other,
        };
        assert!(!pinned.verify(&mismatch));
    }

    #[test]
    fn test_accept_any() {
        let key = public_key();
        let identity = HostIdentity {
            host: "10.0.0.1",
            port: 2222,
            key: &key,
        };
        assert!(accept_any().verify(&identity));
        assert!(identity.fingerprint().starts_with("SHA256:"));
    }
}
