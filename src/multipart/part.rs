// multipart 分段

use super::header::PartHeaders;
use bytes::{Bytes, BytesMut};
use sha1::{Digest, Sha1};

/// 一个 multipart 分段
///
/// `body` 只保存尚未被取走的正文字节；`body_len` 和哈希覆盖全部正文，
/// 与分片如何切分无关
#[derive(Debug, Clone, Default)]
pub struct Part {
    /// 分段头部
    pub headers: PartHeaders,
    body: BytesMut,
    hasher: Sha1,
    body_len: u64,
}

impl Part {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加正文字节并更新滚动哈希
    pub fn append(&mut self, data: &[u8]) {
        self.body.extend_from_slice(data);
        self.hasher.update(data);
        self.body_len += data.len() as u64;
    }

    /// 当前缓冲中的正文
    pub fn buffered(&self) -> &[u8] {
        &self.body
    }

    pub fn buffered_len(&self) -> usize {
        self.body.len()
    }

    /// 取走缓冲区开头的 `len` 字节，之后追加的字节保留在缓冲区中
    pub fn take_front(&mut self, len: usize) -> Bytes {
        let len = len.min(self.body.len());
        self.body.split_to(len).freeze()
    }

    /// 取走全部缓冲正文
    pub fn take_all(&mut self) -> Bytes {
        self.body.split().freeze()
    }

    /// 迄今为止追加过的正文总长度
    pub fn body_len(&self) -> u64 {
        self.body_len
    }

    /// 全部正文的 SHA-1（十六进制）
    pub fn sha1_hex(&self) -> String {
        hex::encode(self.hasher.clone().finalize())
    }

    /// 表单字段名
    pub fn name(&self) -> Option<&str> {
        self.headers
            .content_disposition()
            .and_then(|cd| cd.name.as_deref())
    }

    /// 上传文件的原始文件名
    pub fn filename(&self) -> Option<&str> {
        self.headers
            .content_disposition()
            .and_then(|cd| cd.filename.as_deref())
    }
}
