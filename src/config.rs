// 主机清单
// JSON 文件保存常用主机的连接参数，CLI 按名称查找

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::ssh::{host_key, Authentication, ConnectOptions, DEFAULT_TIMEOUT_SECS};

/// 获取默认主机清单路径
/// macOS: ~/Library/Application Support/shellport/hosts.json
/// Linux: ~/.config/shellport/hosts.json
/// Windows: C:\Users\<用户名>\AppData\Roaming\shellport\hosts.json
pub fn default_hosts_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("Failed to locate the system config directory")?
        .join("shellport");
    Ok(config_dir.join("hosts.json"))
}

/// 认证方式
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostAuth {
    Password {
        password: String,
    },
    Key {
        key_path: String,
        #[serde(default)]
        passphrase: Option<String>,
    },
}

fn default_port() -> u16 {
    22
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// 主机条目
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HostEntry {
    /// 名称（CLI 中使用）
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    pub auth: HostAuth,
    /// 连接超时（秒）
    #[serde(default = "default_timeout")]
    pub connect_timeout: u64,
    /// 固定的 SHA256 主机密钥指纹
    #[serde(default)]
    pub fingerprint: Option<String>,
}

impl HostEntry {
    /// 转换为连接配置
    ///
    /// 配置了指纹时只接受该指纹；否则需要 `accept_unknown_host` 才接受任意主机密钥。
    pub fn connect_options(&self, accept_unknown_host: bool) -> Result<ConnectOptions> {
        let auth = match &self.auth {
            HostAuth::Password { password } => Authentication::password(password.clone()),
            HostAuth::Key {
                key_path,
                passphrase,
            } => {
                let path = expand_home(key_path);
                Authentication::key_file(&path, passphrase.as_deref())
                    .with_context(|| format!("Failed to load key for host '{}'", self.name))?
            }
        };

        let host_key = match (&self.fingerprint, accept_unknown_host) {
            (Some(fingerprint), _) => host_key::fixed_fingerprint(fingerprint.clone()),
            (None, true) => host_key::accept_any(),
            (None, false) => bail!(
                "Host '{}' has no pinned fingerprint; pass --accept-unknown-host to connect anyway",
                self.name
            ),
        };

        Ok(ConnectOptions::new(self.host.clone(), self.username.clone(), auth)
            .port(self.port)
            .connect_timeout(self.connect_timeout)
            .host_key(host_key))
    }
}

/// 主机清单文件
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HostsFile {
    pub hosts: Vec<HostEntry>,
}

impl HostsFile {
    /// 加载主机清单，文件不存在时返回空清单
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read hosts file {}", path.display()))?;
        let hosts: HostsFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse hosts file {}", path.display()))?;
        Ok(hosts)
    }

    /// 保存主机清单
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content = serde_json::to_string_pretty(self).context("Failed to serialize hosts")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write hosts file {}", path.display()))?;
        Ok(())
    }

    /// 按名称查找
    pub fn find(&self, name: &str) -> Option<&HostEntry> {
        self.hosts.iter().find(|h| h.name == name)
    }
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}
