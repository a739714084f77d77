// ShellPort - SSH/SFTP 命令行客户端
// 应用入口

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, warn};

use shellport::config::{self, HostsFile};
use shellport::keys;
use shellport::ssh::{Client, Command, SshError};

#[derive(Parser, Debug)]
#[command(
    name = "shellport",
    version,
    about = "Run remote commands, open shells and transfer files over SSH"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 主机清单文件（默认位于系统配置目录）
    #[arg(long, global = true, value_name = "FILE")]
    hosts: Option<PathBuf>,

    /// 未固定指纹时接受任意主机密钥
    #[arg(long, global = true)]
    accept_unknown_host: bool,

    /// 日志详细程度（-v: debug, -vv: trace）
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a command on a host
    Exec {
        host: String,
        /// Environment variables (KEY=VALUE), may be repeated
        #[arg(short = 'e', long = "env", value_name = "KEY=VALUE", value_parser = parse_env)]
        env: Vec<(String, String)>,
        /// Command to run. Arguments are joined with single spaces and interpreted by
        /// the remote shell, as ssh(1) does; quote for the remote side, e.g. 'echo "a  b"'
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
    /// Open an interactive shell on a host
    Shell { host: String },
    /// Upload a local file or directory
    Upload {
        host: String,
        source: PathBuf,
        destination: String,
    },
    /// Download a remote file or directory
    Download {
        host: String,
        source: String,
        destination: PathBuf,
    },
    /// Read the key pair at PATH, generating it if missing, and print the public key
    Keygen { path: PathBuf },
}

fn parse_env(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("invalid KEY=VALUE: '{}'", s)),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    // 可以通过 RUST_LOG 环境变量控制日志级别，例如：RUST_LOG=debug shellport exec web uptime
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn connect(cli: &Cli, name: &str) -> Result<Client> {
    let path = match &cli.hosts {
        Some(path) => path.clone(),
        None => config::default_hosts_path()?,
    };
    let hosts = HostsFile::load(&path)?;
    let Some(entry) = hosts.find(name) else {
        bail!("Unknown host '{}' (hosts file: {})", name, path.display());
    };

    let options = entry.connect_options(cli.accept_unknown_host)?;
    Client::connect(options)
        .await
        .with_context(|| format!("Failed to connect to '{}'", name))
}

/// 远程命令行：参数以单个空格连接，交给远程 shell 解释
fn remote_command_line(args: &[String]) -> String {
    args.join(" ")
}

/// 操作结果优先；关闭失败只记录日志
fn finish<T>(result: T, closed: std::result::Result<(), SshError>) -> T {
    if let Err(e) = closed {
        warn!("[SSH] Failed to close connection: {}", e);
    }
    result
}

/// 执行子命令，返回进程退出码
async fn run(cli: &Cli) -> Result<i32> {
    match &cli.command {
        Commands::Keygen { path } => {
            let pair = keys::read_or_generate(path)
                .with_context(|| format!("Failed to prepare key pair at {}", path.display()))?;
            print!("{}", pair.public);
            Ok(0)
        }
        Commands::Exec { host, env, command } => {
            let mut client = connect(cli, host).await?;

            let mut request = Command::new(remote_command_line(command))
                .stdout(tokio::io::stdout())
                .stderr(tokio::io::stderr());
            for (name, value) in env {
                request = request.env(name.clone(), value.clone());
            }

            let result = finish(client.run(request).await, client.close().await);

            match result {
                Ok(()) => Ok(0),
                Err(SshError::CommandExecution {
                    exit_status: Some(code),
                    ..
                }) => Ok(code as i32),
                Err(e) => Err(e.into()),
            }
        }
        Commands::Shell { host } => {
            let mut client = connect(cli, host).await?;
            finish(client.shell().await, client.close().await)?;
            Ok(0)
        }
        Commands::Upload {
            host,
            source,
            destination,
        } => {
            let mut client = connect(cli, host).await?;
            let result = finish(client.upload(source, destination).await, client.close().await);
            result.with_context(|| format!("Failed to upload {}", source.display()))?;
            Ok(0)
        }
        Commands::Download {
            host,
            source,
            destination,
        } => {
            let mut client = connect(cli, host).await?;
            let result = finish(client.download(source, destination).await, client.close().await);
            result.with_context(|| format!("Failed to download {}", source))?;
            Ok(0)
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match run(&cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            1
        }
    };
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_failure_keeps_command_result() {
        let result: std::result::Result<(), SshError> = Err(SshError::CommandExecution {
            exit_status: Some(7),
            detail: "exit status 7".to_string(),
        });

        let kept = finish(result, Err(SshError::Close("already closed".to_string())));
        assert_eq!(kept.unwrap_err().exit_status(), Some(7));

        let ok: std::result::Result<u8, SshError> = Ok(1);
        assert_eq!(finish(ok, Err(SshError::NilHandle)).unwrap(), 1);
    }

    #[test]
    fn test_remote_command_line_is_left_to_remote_shell() {
        let single = vec!["echo \"a  b\" | wc -c".to_string()];
        assert_eq!(remote_command_line(&single), "echo \"a  b\" | wc -c");

        let split = vec!["ls".to_string(), "-la".to_string(), "/tmp".to_string()];
        assert_eq!(remote_command_line(&split), "ls -la /tmp");
    }

    #[test]
    fn test_exec_arguments() {
        let cli = Cli::try_parse_from([
            "shellport", "exec", "web", "-e", "LANG=C", "ls", "-la",
        ])
        .unwrap();
        match cli.command {
            Commands::Exec { host, env, command } => {
                assert_eq!(host, "web");
                assert_eq!(env, vec![("LANG".to_string(), "C".to_string())]);
                assert_eq!(command, vec!["ls", "-la"]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_env_rejects_missing_name() {
        assert!(parse_env("=v").is_err());
        assert!(parse_env("novalue").is_err());
        assert_eq!(parse_env("A=b=c").unwrap(), ("A".to_string(), "b=c".to_string()));
    }
}
