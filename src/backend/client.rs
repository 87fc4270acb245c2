// 存储后端客户端实现
//
// 所有请求都带 Bearer 令牌和 `Endpoint-Consistency: strict`，
// 并复用上一次响应下发的 Cookie（粘性 API 会话）。

use super::types::{
    ContentRange, ContentUploadHandle, CreateRequest, FileResponse, FolderResponse,
};
use super::StorageBackend;
use crate::config::BackendConfig;
use crate::error::{UploadError, UploadResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::cookie::Jar;
use reqwest::header::{
    HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, ETAG,
    IF_MATCH,
};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// 上传ID头部
pub const UPLOAD_ID_HEADER: &str = "Upload-ID";

/// 一致性标记头部
pub const CONSISTENCY_HEADER: &str = "Endpoint-Consistency";

/// 错误响应体在日志和错误信息中保留的最大长度
const MAX_ERROR_BODY_LEN: usize = 512;

/// 存储后端 API 客户端
#[derive(Debug, Clone)]
pub struct ApiClient {
    /// HTTP客户端
    client: Client,
    /// API 基础地址
    base_url: String,
}

impl ApiClient {
    /// 创建新的后端客户端
    ///
    /// # 参数
    /// * `config` - 后端配置
    /// * `token` - 接收者的 OAuth 访问令牌
    pub fn new(config: &BackendConfig, token: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).context("访问令牌包含非法字符")?,
        );
        headers.insert(CONSISTENCY_HEADER, HeaderValue::from_static("strict"));

        // 自动收集 Set-Cookie，后续请求带上同一会话
        let jar = Arc::new(Jar::default());
        let client = Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn folders_url(&self) -> String {
        format!("{}/folders", self.base_url)
    }

    fn files_url(&self) -> String {
        format!("{}/files", self.base_url)
    }

    fn content_url(&self, file_id: &str) -> String {
        format!(
            "{}/files/{}/content",
            self.base_url,
            urlencoding::encode(file_id)
        )
    }

    fn create_request(&self, url: String, parent: &str, name: &str) -> RequestBuilder {
        self.client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .json(&CreateRequest { parent, name })
    }

    fn initiate_request(&self, url: &str) -> RequestBuilder {
        self.client
            .put(url)
            .header(CONTENT_RANGE, ContentRange::Initiate.to_string())
            .header(CONTENT_LENGTH, "0")
            .body(Vec::new())
    }

    fn chunk_request(
        &self,
        upload: &ContentUploadHandle,
        range: ContentRange,
        data: Bytes,
    ) -> RequestBuilder {
        let mut request = self
            .client
            .put(&upload.url)
            .header(UPLOAD_ID_HEADER, &upload.upload_id)
            .header(CONTENT_RANGE, range.to_string());
        if let Some(ref etag) = upload.etag {
            request = request.header(IF_MATCH, etag);
        }
        request.body(data)
    }

    fn commit_request(&self, upload: &ContentUploadHandle, total: u64) -> RequestBuilder {
        let mut request = self
            .client
            .put(&upload.url)
            .header(UPLOAD_ID_HEADER, &upload.upload_id)
            .header(CONTENT_RANGE, ContentRange::Commit { total }.to_string())
            .header(CONTENT_LENGTH, "0");
        if let Some(ref etag) = upload.etag {
            request = request.header(IF_MATCH, etag);
        }
        request.body(Vec::new())
    }

    /// 发送请求，非 2xx 状态统一转换为 BackendCallFailed
    async fn send(operation: &'static str, request: RequestBuilder) -> UploadResult<Response> {
        let response = request.send().await.map_err(|e| {
            error!("后端请求发送失败: op={}, error={}", operation, e);
            UploadError::backend(operation, None, e.to_string())
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY_LEN {
            let mut cut = MAX_ERROR_BODY_LEN;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        error!(
            "后端返回错误: op={}, status={}, body={}",
            operation, status, body
        );
        Err(UploadError::backend(operation, Some(status.as_u16()), body))
    }

    async fn parse_json<T: DeserializeOwned>(
        operation: &'static str,
        response: Response,
    ) -> UploadResult<T> {
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| UploadError::backend(operation, Some(status), e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| {
            UploadError::backend(
                operation,
                Some(status),
                format!("解析响应失败: {}, body={}", e, text),
            )
        })
    }
}

#[async_trait]
impl StorageBackend for ApiClient {
    async fn create_folder(&self, parent: &str, name: &str) -> UploadResult<FolderResponse> {
        info!("创建文件夹: parent={}, name={}", parent, name);
        let request = self.create_request(self.folders_url(), parent, name);
        let response = Self::send("create_folder", request).await?;
        let folder: FolderResponse = Self::parse_json("create_folder", response).await?;
        info!("创建文件夹成功: id={}", folder.id);
        Ok(folder)
    }

    async fn create_file(&self, parent: &str, name: &str) -> UploadResult<FileResponse> {
        info!("创建文件: parent={}, name={}", parent, name);
        let request = self.create_request(self.files_url(), parent, name);
        let response = Self::send("create_file", request).await?;
        let file: FileResponse = Self::parse_json("create_file", response).await?;
        info!("创建文件成功: id={}", file.id);
        Ok(file)
    }

    async fn start_content_upload(&self, file_id: &str) -> UploadResult<ContentUploadHandle> {
        let url = self.content_url(file_id);
        let response = Self::send("start_content_upload", self.initiate_request(&url)).await?;

        let headers = response.headers();
        let upload_id = headers
            .get(UPLOAD_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                UploadError::backend(
                    "start_content_upload",
                    Some(response.status().as_u16()),
                    "响应缺少 Upload-ID 头部",
                )
            })?;
        let etag = headers
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        info!(
            "创建内容上传会话: file_id={}, upload_id={}, etag={:?}",
            file_id, upload_id, etag
        );

        Ok(ContentUploadHandle {
            url,
            upload_id,
            etag,
        })
    }

    async fn upload_chunk(
        &self,
        upload: &ContentUploadHandle,
        range: ContentRange,
        data: Bytes,
    ) -> UploadResult<()> {
        debug!(
            "上传分片: upload_id={}, range={}, size={}",
            upload.upload_id,
            range,
            data.len()
        );
        Self::send("upload_chunk", self.chunk_request(upload, range, data)).await?;
        Ok(())
    }

    async fn commit(&self, upload: &ContentUploadHandle, total: u64) -> UploadResult<()> {
        info!(
            "提交上传: upload_id={}, total={} bytes",
            upload.upload_id, total
        );
        // 提交响应没有响应体
        Self::send("commit", self.commit_request(upload, total)).await?;
        Ok(())
    }
}
