// 存储后端 API 类型定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// 创建文件夹响应（POST /folders）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FolderResponse {
    /// 文件夹ID
    pub id: String,
    /// 文件夹名称
    #[serde(default)]
    pub name: String,
    /// 父目录ID
    #[serde(default)]
    pub parent: Option<String>,
}

/// 创建文件响应（POST /files）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileResponse {
    /// 文件ID
    pub id: String,
    /// 文件名称
    #[serde(default)]
    pub name: String,
    /// 父目录ID
    #[serde(default)]
    pub parent: Option<String>,
}

/// 创建文件夹/文件的请求体
#[derive(Debug, Clone, Serialize)]
pub struct CreateRequest<'a> {
    pub parent: &'a str,
    pub name: &'a str,
}

/// 内容上传会话（PUT /files/{id}/content 初始化后得到）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentUploadHandle {
    /// 内容上传地址
    pub url: String,
    /// 后端下发的上传ID（Upload-ID 头部）
    pub upload_id: String,
    /// 并发控制令牌（ETag），分片上传时作为 If-Match 回传
    pub etag: Option<String>,
}

/// Content-Range 取值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentRange {
    /// 初始化上传：`bytes */*`
    Initiate,
    /// 分片：`bytes {from}-{to}/*`（闭区间）
    Chunk { from: u64, to: u64 },
    /// 提交：`bytes */{total}`
    Commit { total: u64 },
}

impl ContentRange {
    /// 以 `offset` 为起点、长度 `len` 的分片范围；`len` 必须大于 0
    pub fn chunk(offset: u64, len: u64) -> Self {
        debug_assert!(len > 0, "空分片没有合法的 Content-Range");
        ContentRange::Chunk {
            from: offset,
            to: offset + len - 1,
        }
    }
}

impl fmt::Display for ContentRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentRange::Initiate => write!(f, "bytes */*"),
            ContentRange::Chunk { from, to } => write!(f, "bytes {}-{}/*", from, to),
            ContentRange::Commit { total } => write!(f, "bytes */{}", total),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_range_format() {
        assert_eq!(ContentRange::Initiate.to_string(), "bytes */*");
        assert_eq!(ContentRange::chunk(0, 1024).to_string(), "bytes 0-1023/*");
        assert_eq!(ContentRange::chunk(1024, 1).to_string(), "bytes 1024-1024/*");
        assert_eq!(ContentRange::Commit { total: 0 }.to_string(), "bytes */0");
        assert_eq!(
            ContentRange::Commit { total: 2048 }.to_string(),
            "bytes */2048"
        );
    }

    #[test]
    fn test_folder_response_tolerates_extra_fields() {
        let json = r#"{"id":"abc123","name":"2026-10-16T10:00:00","parent":"appdata","is_shared":false}"#;
        let folder: FolderResponse = serde_json::from_str(json).unwrap();
        assert_eq!(folder.id, "abc123");
        assert_eq!(folder.parent.as_deref(), Some("appdata"));

        let file: FileResponse = serde_json::from_str(r#"{"id":"f1"}"#).unwrap();
        assert_eq!(file.id, "f1");
        assert!(file.name.is_empty());
    }
}
