// 上传模块
//
// - accumulator: 按阈值切分文件正文
// - session:     文件夹/文件/上传会话的一次性预创建与分片串行写入
// - pipeline:    把 multipart 解析器、累积器和会话串起来

pub mod accumulator;
pub mod pipeline;
pub mod session;

pub use accumulator::{ChunkAccumulator, DEFAULT_CHUNK_THRESHOLD};
pub use pipeline::{CommittedUpload, FilePartRouter, UploadPipeline, DEFAULT_FILENAME};
pub use session::{ProvisionedSession, UploadSessionCoordinator};
