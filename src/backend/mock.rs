// 测试用内存后端：记录每一次调用，可注入延迟和失败

use super::types::{ContentRange, ContentUploadHandle, FileResponse, FolderResponse};
use super::StorageBackend;
use crate::error::{UploadError, UploadResult};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateFolder { parent: String, name: String },
    CreateFile { parent: String, name: String },
    StartUpload { file_id: String },
    Chunk { range: ContentRange, data: Vec<u8> },
    Commit { total: u64 },
}

#[derive(Debug, Default)]
pub struct MockBackend {
    calls: Mutex<Vec<Call>>,
    delay: Option<Duration>,
    fail_on: Option<&'static str>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每个预创建步骤都先睡眠 `delay`，让并发调用方有机会交错
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 指定操作返回 500
    pub fn failing_on(mut self, operation: &'static str) -> Self {
        self.fail_on = Some(operation);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    /// 按调用顺序拼接的全部分片数据
    pub fn uploaded_bytes(&self) -> Vec<u8> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                Call::Chunk { data, .. } => Some(data.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    async fn step(&self, operation: &'static str, call: Call) -> UploadResult<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.lock().push(call);
        if self.fail_on == Some(operation) {
            return Err(UploadError::backend(
                operation,
                Some(500),
                "Internal Server Error",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    async fn create_folder(&self, parent: &str, name: &str) -> UploadResult<FolderResponse> {
        self.step(
            "create_folder",
            Call::CreateFolder {
                parent: parent.to_string(),
                name: name.to_string(),
            },
        )
        .await?;
        Ok(FolderResponse {
            id: "folder-1".to_string(),
            name: name.to_string(),
            parent: Some(parent.to_string()),
        })
    }

    async fn create_file(&self, parent: &str, name: &str) -> UploadResult<FileResponse> {
        self.step(
            "create_file",
            Call::CreateFile {
                parent: parent.to_string(),
                name: name.to_string(),
            },
        )
        .await?;
        Ok(FileResponse {
            id: "file-1".to_string(),
            name: name.to_string(),
            parent: Some(parent.to_string()),
        })
    }

    async fn start_content_upload(&self, file_id: &str) -> UploadResult<ContentUploadHandle> {
        self.step(
            "start_content_upload",
            Call::StartUpload {
                file_id: file_id.to_string(),
            },
        )
        .await?;
        Ok(ContentUploadHandle {
            url: format!("mock://files/{}/content", file_id),
            upload_id: "upload-1".to_string(),
            etag: Some("\"etag-1\"".to_string()),
        })
    }

    async fn upload_chunk(
        &self,
        _upload: &ContentUploadHandle,
        range: ContentRange,
        data: Bytes,
    ) -> UploadResult<()> {
        let call = Call::Chunk {
            range,
            data: data.to_vec(),
        };
        self.calls.lock().push(call);
        if self.fail_on == Some("upload_chunk") {
            return Err(UploadError::backend("upload_chunk", Some(412), "Precondition Failed"));
        }
        Ok(())
    }

    async fn commit(&self, _upload: &ContentUploadHandle, total: u64) -> UploadResult<()> {
        self.calls.lock().push(Call::Commit { total });
        if self.fail_on == Some("commit") {
            return Err(UploadError::backend("commit", Some(500), "Internal Server Error"));
        }
        Ok(())
    }
}
