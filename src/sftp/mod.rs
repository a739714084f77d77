// SFTP 文件传输模块
//
// - remote: 远程文件系统抽象 (RemoteFs)，SftpSession 实现
// - transfer: 递归上传/下载

pub mod remote;
pub mod transfer;

pub use remote::{EntryKind, RemoteEntry, RemoteFs, RemoteReader, RemoteWriter};
pub use transfer::{
    download, download_directory, download_file, upload, upload_directory, upload_file,
    SourceCheck,
};
