// 上传链路错误类型
//
// 解析层的局部问题（单个畸形头部）只记日志不中断；
// 任何破坏 create/upload/commit 链路的错误都会终止整个请求，不做重试。

use thiserror::Error;

/// 流式上传核心错误
///
/// 需要 `Clone`：预创建步骤的结果会被多个等待者共享
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UploadError {
    /// Content-Disposition 等头部语法错误（调用方跳过该行）
    #[error("畸形的 multipart 头部: {0}")]
    MalformedMultipartHeader(String),

    /// Content-Type 中没有可用的 boundary
    #[error("Content-Type 缺少 boundary 参数")]
    MissingBoundaryToken,

    /// 后端调用返回非成功状态或网络失败
    #[error("后端调用失败: {operation} status={status:?} {message}")]
    BackendCallFailed {
        operation: &'static str,
        status: Option<u16>,
        message: String,
    },

    /// 请求体在解析完成前结束
    #[error("请求体意外结束（解析状态: {state}）")]
    UnexpectedEof { state: &'static str },

    /// 在 FINISHED 之前提交等违反调用约定的操作
    #[error("调用约定被违反: {0}")]
    ContractViolation(String),

    /// 单行头部超过上限
    #[error("multipart 头部行过长: {len} > {limit}")]
    HeaderTooLarge { len: usize, limit: usize },

    /// 非文件字段的正文超过上限
    #[error("表单字段过大: {len} > {limit}")]
    FieldTooLarge { len: usize, limit: usize },

    /// 分段数量超过上限
    #[error("分段数量过多: {count} > {limit}")]
    TooManyParts { count: usize, limit: usize },

    /// 上传链接不存在或已失效
    #[error("上传链接不存在或已失效")]
    LinkNotFound,

    /// 读取请求体失败（连接中断或超过大小上限）
    #[error("读取请求体失败: {message}")]
    BodyRead { message: String, too_large: bool },
}

impl UploadError {
    /// 构造后端调用失败错误
    pub fn backend(operation: &'static str, status: Option<u16>, message: impl Into<String>) -> Self {
        UploadError::BackendCallFailed {
            operation,
            status,
            message: message.into(),
        }
    }

    /// 是否属于后端错误（对客户端表现为 502）
    pub fn is_backend(&self) -> bool {
        matches!(self, UploadError::BackendCallFailed { .. })
    }
}

pub type UploadResult<T> = std::result::Result<T, UploadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_display() {
        let err = UploadError::backend("create_folder", Some(503), "Service Unavailable");
        assert!(err.is_backend());
        let text = err.to_string();
        assert!(text.contains("create_folder"));
        assert!(text.contains("503"));
    }

    #[test]
    fn test_errors_are_cloneable() {
        let err = UploadError::UnexpectedEof {
            state: "EXPECT_PART_DATA",
        };
        assert_eq!(err.clone(), err);
        assert!(!err.is_backend());
    }
}
