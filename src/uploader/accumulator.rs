// 分片累积器
//
// 正文字节先留在分段缓冲区中，缓冲达到阈值时按阈值大小切出分片；
// 分段结束时把剩余字节作为最后一个分片刷出（从不产生空分片）。

use crate::multipart::Part;
use bytes::Bytes;

/// 默认分片阈值: 1MB
pub const DEFAULT_CHUNK_THRESHOLD: usize = 1024 * 1024;

/// 分片累积器
#[derive(Debug, Clone, Copy)]
pub struct ChunkAccumulator {
    threshold: usize,
}

impl Default for ChunkAccumulator {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_THRESHOLD)
    }
}

impl ChunkAccumulator {
    /// 创建累积器，阈值至少为 1 字节
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// 缓冲区达到阈值时取走一个阈值大小的分片
    ///
    /// 调用方应循环调用直到返回 `None`，一次追加可能凑满多个分片
    pub fn take_ready(&self, part: &mut Part) -> Option<Bytes> {
        if part.buffered_len() >= self.threshold {
            Some(part.take_front(self.threshold))
        } else {
            None
        }
    }

    /// 分段结束时取走剩余字节，缓冲区为空时返回 `None`
    pub fn take_remainder(&self, part: &mut Part) -> Option<Bytes> {
        if part.buffered_len() == 0 {
            None
        } else {
            Some(part.take_all())
        }
    }
}
