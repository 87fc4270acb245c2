// 流式上传管线：multipart 解析 → 分片累积 → 上传会话

use super::accumulator::ChunkAccumulator;
use super::session::UploadSessionCoordinator;
use crate::config::UploadConfig;
use crate::error::{UploadError, UploadResult};
use crate::multipart::{Boundary, ParserState, Part, PartHandler, StreamingMultipartParser};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 文件分段没有文件名时使用的默认名称
pub const DEFAULT_FILENAME: &str = "uploaded-file";

/// 已提交的上传
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedUpload {
    /// 远端文件ID
    pub file_id: String,
    /// 原始文件名
    pub filename: String,
    /// 文件大小（字节）
    pub size: u64,
    /// 内容 SHA-1（十六进制）
    pub sha1: String,
}

#[derive(Debug, Clone)]
struct FileSummary {
    filename: String,
    size: u64,
    sha1: String,
}

fn part_filename(part: &Part) -> String {
    part.filename()
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_FILENAME)
        .to_string()
}

/// 把文件字段的正文转发给上传会话，其他字段留在内存中
///
/// 留在内存中的字段受 `max_field_size` 和 `max_parts` 约束
pub struct FilePartRouter {
    field_name: String,
    accumulator: ChunkAccumulator,
    coordinator: Arc<UploadSessionCoordinator>,
    max_field_size: usize,
    max_parts: usize,
    /// 已完成的分段数
    parts_seen: usize,
    /// 没有可识别字段名的分段数
    unnamed_parts: usize,
    /// 已完成的文件分段
    file: Option<FileSummary>,
}

impl FilePartRouter {
    pub fn new(
        field_name: impl Into<String>,
        accumulator: ChunkAccumulator,
        coordinator: Arc<UploadSessionCoordinator>,
    ) -> Self {
        let defaults = UploadConfig::default();
        Self {
            field_name: field_name.into(),
            accumulator,
            coordinator,
            max_field_size: defaults.max_form_field_size,
            max_parts: defaults.max_form_parts,
            parts_seen: 0,
            unnamed_parts: 0,
            file: None,
        }
    }

    /// 设置非文件字段的大小上限和分段数上限
    pub fn with_form_limits(mut self, max_field_size: usize, max_parts: usize) -> Self {
        self.max_field_size = max_field_size;
        self.max_parts = max_parts;
        self
    }

    fn is_file_part(&self, part: &Part) -> bool {
        part.name() == Some(self.field_name.as_str())
    }

    fn ensure_single_file(&self) -> UploadResult<()> {
        if self.file.is_some() {
            return Err(UploadError::ContractViolation(format!(
                "字段 {} 出现了多次，每个请求只能上传一个文件",
                self.field_name
            )));
        }
        Ok(())
    }

    fn check_field_size(&self, part: &Part) -> UploadResult<()> {
        let len = part.buffered_len();
        if len > self.max_field_size {
            return Err(UploadError::FieldTooLarge {
                len,
                limit: self.max_field_size,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PartHandler for FilePartRouter {
    async fn on_body(&mut self, part: &mut Part) -> UploadResult<()> {
        if !self.is_file_part(part) {
            return self.check_field_size(part);
        }
        self.ensure_single_file()?;

        let filename = part_filename(part);
        while let Some(chunk) = self.accumulator.take_ready(part) {
            self.coordinator.ensure_session(&filename).await?;
            self.coordinator.upload_chunk(chunk).await?;
        }
        Ok(())
    }

    async fn on_part_complete(&mut self, part: &mut Part) -> UploadResult<()> {
        self.parts_seen += 1;
        if self.parts_seen > self.max_parts {
            return Err(UploadError::TooManyParts {
                count: self.parts_seen,
                limit: self.max_parts,
            });
        }

        if !self.is_file_part(part) {
            if part.name().is_none() {
                warn!("分段缺少可识别的字段名: size={}", part.body_len());
                self.unnamed_parts += 1;
            }
            debug!("表单字段: name={:?}, size={}", part.name(), part.body_len());
            return Ok(());
        }
        self.ensure_single_file()?;

        let filename = part_filename(part);
        if let Some(chunk) = self.accumulator.take_remainder(part) {
            self.coordinator.ensure_session(&filename).await?;
            self.coordinator.upload_chunk(chunk).await?;
        }

        let summary = FileSummary {
            filename,
            size: part.body_len(),
            sha1: part.sha1_hex(),
        };
        info!(
            "文件分段接收完成: filename={}, size={}, sha1={}",
            summary.filename, summary.size, summary.sha1
        );
        self.file = Some(summary);
        Ok(())
    }
}

/// 单个请求的上传管线
pub struct UploadPipeline {
    parser: StreamingMultipartParser<FilePartRouter>,
    coordinator: Arc<UploadSessionCoordinator>,
    field_name: String,
}

impl UploadPipeline {
    pub fn new(
        boundary: Boundary,
        coordinator: Arc<UploadSessionCoordinator>,
        config: &UploadConfig,
    ) -> Self {
        let router = FilePartRouter::new(
            config.field_name.clone(),
            ChunkAccumulator::new(config.chunk_size),
            Arc::clone(&coordinator),
        )
        .with_form_limits(config.max_form_field_size, config.max_form_parts);
        Self {
            parser: StreamingMultipartParser::new(boundary, router, config.max_header_line),
            coordinator,
            field_name: config.field_name.clone(),
        }
    }

    /// 送入一批请求体字节；返回前所有分片写入都已完成
    pub async fn feed(&mut self, data: &[u8]) -> UploadResult<()> {
        self.parser.got_bytes(data).await
    }

    /// 请求体读完后调用，解析未到达 FINISHED 时返回 UnexpectedEof
    pub fn finish(&self) -> UploadResult<()> {
        self.parser.finish()
    }

    pub fn state(&self) -> ParserState {
        self.parser.state()
    }

    pub fn total_received(&self) -> u64 {
        self.parser.total_received()
    }

    pub fn coordinator(&self) -> &Arc<UploadSessionCoordinator> {
        &self.coordinator
    }

    /// 非文件字段（名称, 值），值按 UTF-8 有损解码
    pub fn form_fields(&self) -> Vec<(String, String)> {
        self.parser
            .parts()
            .iter()
            .filter_map(|part| {
                let name = part.name()?;
                if name == self.field_name {
                    return None;
                }
                Some((
                    name.to_string(),
                    String::from_utf8_lossy(part.buffered()).into_owned(),
                ))
            })
            .collect()
    }

    /// 提交上传
    ///
    /// 只能在解析到达 FINISHED 之后调用；没有文件分段时以默认文件名创建空文件。
    /// 出现过无法识别字段名的分段而没有文件分段时拒绝提交。
    pub async fn commit(&self) -> UploadResult<CommittedUpload> {
        if !self.parser.is_finished() {
            return Err(UploadError::ContractViolation(format!(
                "解析尚未完成（{}）就提交上传",
                self.parser.state()
            )));
        }

        let router = self.parser.handler();
        if router.file.is_none() && router.unnamed_parts > 0 {
            return Err(UploadError::MalformedMultipartHeader(format!(
                "{} 个分段的 Content-Disposition 无法识别，且没有找到字段 {}",
                router.unnamed_parts, self.field_name
            )));
        }

        let summary = router
            .file
            .clone()
            .unwrap_or_else(|| FileSummary {
                filename: DEFAULT_FILENAME.to_string(),
                size: 0,
                sha1: Part::new().sha1_hex(),
            });

        let session = self.coordinator.ensure_session(&summary.filename).await?;
        let total = self.coordinator.commit().await?;
        if total != summary.size {
            return Err(UploadError::ContractViolation(format!(
                "已写入 {} 字节，与分段长度 {} 不一致",
                total, summary.size
            )));
        }

        Ok(CommittedUpload {
            file_id: session.file_id,
            filename: summary.filename,
            size: total,
            sha1: summary.sha1,
        })
    }
}
