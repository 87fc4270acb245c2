// 流式 multipart 解析器
//
// 状态机：
//   START ──start──▶ EXPECT_HEADER ──空行──▶ EXPECT_PART_DATA ──mid──▶ EXPECT_HEADER
//                                                             └──end──▶ FINISHED
//
// 每收到一批网络字节就反复执行当前状态的处理函数，直到某一轮没有任何进展，
// 然后把控制权交还给网络层等待更多数据。所有回调都在返回前被等待，
// 因此在回调完成之前不会继续消费缓冲区，内存占用有上界。

use super::boundary::{Boundary, Delimiter, Scan};
use super::part::Part;
use crate::error::{UploadError, UploadResult};
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use memchr::memmem;
use std::fmt;
use tracing::{debug, trace};

const LINE_SEP: &[u8] = b"\r\n";

/// 解析器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    Start,
    ExpectHeader,
    ExpectPartData,
    Finished,
}

impl ParserState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParserState::Start => "START",
            ParserState::ExpectHeader => "EXPECT_HEADER",
            ParserState::ExpectPartData => "EXPECT_PART_DATA",
            ParserState::Finished => "FINISHED",
        }
    }
}

impl fmt::Display for ParserState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 分段事件回调
#[async_trait]
pub trait PartHandler: Send {
    /// 当前分段追加了正文字节
    ///
    /// 可以从 `part` 中取走已缓冲的正文（分片刷出）
    async fn on_body(&mut self, part: &mut Part) -> UploadResult<()>;

    /// 分段遇到下一个分隔符，每个分段恰好调用一次
    async fn on_part_complete(&mut self, part: &mut Part) -> UploadResult<()>;
}

/// 流式 multipart 解析器
pub struct StreamingMultipartParser<H> {
    boundary: Boundary,
    state: ParserState,
    /// 跨网络读取保留的未消费字节
    buffer: BytesMut,
    /// 正在处理的分段
    part: Option<Part>,
    /// 已完成的分段
    parts: Vec<Part>,
    handler: H,
    /// 单行头部上限
    max_header_line: usize,
    /// 已接收的字节总数
    total_received: u64,
}

impl<H: PartHandler> StreamingMultipartParser<H> {
    pub fn new(boundary: Boundary, handler: H, max_header_line: usize) -> Self {
        Self {
            boundary,
            state: ParserState::Start,
            buffer: BytesMut::new(),
            part: None,
            parts: Vec::new(),
            handler,
            max_header_line,
            total_received: 0,
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state == ParserState::Finished
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// 已完成的分段（按出现顺序）
    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn total_received(&self) -> u64 {
        self.total_received
    }

    pub fn into_inner(self) -> (H, Vec<Part>) {
        (self.handler, self.parts)
    }

    /// 送入一批网络字节，处理到无法继续为止
    pub async fn got_bytes(&mut self, data: &[u8]) -> UploadResult<()> {
        self.total_received += data.len() as u64;

        if self.state == ParserState::Finished {
            // 尾声直接丢弃
            return Ok(());
        }

        self.buffer.extend_from_slice(data);

        loop {
            let progressed = match self.state {
                ParserState::Start => self.handle_start().await?,
                ParserState::ExpectHeader => self.handle_expect_header().await?,
                ParserState::ExpectPartData => self.handle_expect_part_data().await?,
                ParserState::Finished => self.handle_finished(),
            };
            if !progressed {
                break;
            }
        }

        Ok(())
    }

    /// 流结束时检查是否已经到达 FINISHED
    pub fn finish(&self) -> UploadResult<()> {
        if self.is_finished() {
            Ok(())
        } else {
            Err(UploadError::UnexpectedEof {
                state: self.state.as_str(),
            })
        }
    }

    async fn transition(&mut self, new_state: ParserState) -> UploadResult<()> {
        trace!("解析器状态: {} -> {}", self.state, new_state);

        if matches!(new_state, ParserState::ExpectHeader | ParserState::Finished) {
            if let Some(mut part) = self.part.take() {
                self.handler.on_part_complete(&mut part).await?;
                debug!(
                    "分段完成: name={:?}, filename={:?}, size={}",
                    part.name(),
                    part.filename(),
                    part.body_len()
                );
                self.parts.push(part);
            }
            self.part = Some(Part::new());
        }

        self.state = new_state;
        Ok(())
    }

    async fn append_to_current_body(&mut self, len: usize) -> UploadResult<()> {
        if len == 0 {
            return Ok(());
        }
        let data = self.buffer.split_to(len);
        let part = self.part.get_or_insert_with(Part::new);
        part.append(&data);
        self.handler.on_body(part).await
    }

    async fn handle_start(&mut self) -> UploadResult<bool> {
        let start = self.boundary.start_delimiter();
        match memmem::find(&self.buffer, start) {
            Some(index) => {
                // 丢弃序言和起始分隔符
                self.buffer.advance(index + start.len());
                self.transition(ParserState::ExpectHeader).await?;
                Ok(true)
            }
            None => {
                // 序言不需要保留，只留下可能是起始分隔符开头的部分
                let keep = start.len() - 1;
                if self.buffer.len() > keep {
                    let drop = self.buffer.len() - keep;
                    self.buffer.advance(drop);
                }
                Ok(false)
            }
        }
    }

    async fn handle_expect_header(&mut self) -> UploadResult<bool> {
        match memmem::find(&self.buffer, LINE_SEP) {
            // 空行：头部结束
            Some(0) => {
                self.buffer.advance(LINE_SEP.len());
                self.transition(ParserState::ExpectPartData).await?;
                Ok(true)
            }
            Some(index) => {
                if index > self.max_header_line {
                    return Err(UploadError::HeaderTooLarge {
                        len: index,
                        limit: self.max_header_line,
                    });
                }
                let line = self.buffer.split_to(index);
                self.buffer.advance(LINE_SEP.len());
                self.part
                    .get_or_insert_with(Part::new)
                    .headers
                    .parse_line(&line);
                Ok(true)
            }
            None => {
                if self.buffer.len() > self.max_header_line {
                    return Err(UploadError::HeaderTooLarge {
                        len: self.buffer.len(),
                        limit: self.max_header_line,
                    });
                }
                Ok(false)
            }
        }
    }

    async fn handle_expect_part_data(&mut self) -> UploadResult<bool> {
        match self.boundary.scan(&self.buffer) {
            Scan::NeedMore { body } => {
                self.append_to_current_body(body).await?;
                Ok(false)
            }
            Scan::Found {
                body,
                delimiter,
                len,
            } => {
                self.append_to_current_body(body).await?;
                self.buffer.advance(len);
                let next = match delimiter {
                    Delimiter::Mid => ParserState::ExpectHeader,
                    Delimiter::End => ParserState::Finished,
                };
                self.transition(next).await?;
                Ok(true)
            }
            Scan::Rejected { body } => {
                self.append_to_current_body(body).await?;
                Ok(true)
            }
        }
    }

    fn handle_finished(&mut self) -> bool {
        self.buffer.clear();
        false
    }
}
