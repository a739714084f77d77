// ShellPort - SSH 远程命令执行与 SFTP 文件传输

pub mod config;
pub mod keys;
pub mod sftp;
pub mod ssh;
pub mod terminal;

pub use ssh::{Authentication, Client, Command, CommandOutput, ConnectOptions, SshError};
