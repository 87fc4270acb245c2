// Upload Relay Library
// 流式 multipart 上传中继核心库

// 错误类型
pub mod error;

// 配置管理模块
pub mod config;

// 🔥 日志系统
pub mod logging;

// 流式 multipart 解析模块
pub mod multipart;

// 存储后端模块
pub mod backend;

// 上传模块（分片累积 + 会话协调）
pub mod uploader;

// 链接数据库
pub mod persistence;

// Web服务器模块
pub mod server;

// 导出常用类型
pub use backend::{ApiClient, ContentRange, ContentUploadHandle, StorageBackend};
pub use config::AppConfig;
pub use error::{UploadError, UploadResult};
pub use multipart::{Boundary, Part, PartHandler, StreamingMultipartParser};
pub use persistence::{CredentialLookup, LinkStore};
pub use server::AppState;
pub use uploader::{CommittedUpload, UploadPipeline, UploadSessionCoordinator};
