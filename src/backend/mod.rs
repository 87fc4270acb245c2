// 存储后端模块
//
// 三步协议：创建文件夹 → 创建文件 → 内容上传（初始化 / 分片 / 提交）

pub mod client;
#[cfg(test)]
pub(crate) mod mock;
pub mod types;

pub use client::ApiClient;
pub use types::{ContentRange, ContentUploadHandle, FileResponse, FolderResponse};

use crate::error::UploadResult;
use async_trait::async_trait;
use bytes::Bytes;

/// 存储后端操作
///
/// 生产实现是 [`ApiClient`]，测试中使用记录调用的内存实现
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// 在 `parent` 下创建文件夹
    async fn create_folder(&self, parent: &str, name: &str) -> UploadResult<FolderResponse>;

    /// 在文件夹 `parent` 下创建文件
    async fn create_file(&self, parent: &str, name: &str) -> UploadResult<FileResponse>;

    /// 初始化文件内容上传，返回上传会话
    async fn start_content_upload(&self, file_id: &str) -> UploadResult<ContentUploadHandle>;

    /// 写入一个分片
    async fn upload_chunk(
        &self,
        upload: &ContentUploadHandle,
        range: ContentRange,
        data: Bytes,
    ) -> UploadResult<()>;

    /// 提交上传，`total` 为已写入的总字节数
    async fn commit(&self, upload: &ContentUploadHandle, total: u64) -> UploadResult<()>;
}
