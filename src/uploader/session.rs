// 上传会话协调器
//
// 预创建状态机：
//   UNSTARTED → FOLDER_PENDING → FILE_PENDING → SESSION_PENDING → READY
//                     └──────────────┴───────────────┴──────────▶ FAILED
//
// 每一步的后端调用包装成 Shared future 存在状态里，并发调用方等待同一个结果，
// 因此文件夹、文件、上传会话各只创建一次。等待结束后由第一个回来的调用方推进状态，
// 推进前重新检查状态，避免重复推进。

use crate::backend::{ContentRange, ContentUploadHandle, StorageBackend};
use crate::error::{UploadError, UploadResult};
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

type SharedStep<T> = Shared<BoxFuture<'static, UploadResult<T>>>;

/// 预创建完成后的远端资源
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedSession {
    pub folder_id: String,
    pub file_id: String,
    pub upload: ContentUploadHandle,
}

enum Provisioning {
    Unstarted,
    FolderPending {
        /// 第一个调用方的文件名，后来者的文件名被忽略
        filename: String,
        folder: SharedStep<String>,
    },
    FilePending {
        folder_id: String,
        file: SharedStep<String>,
    },
    SessionPending {
        folder_id: String,
        file_id: String,
        upload: SharedStep<ContentUploadHandle>,
    },
    Ready(ProvisionedSession),
    Failed(UploadError),
}

impl Provisioning {
    fn name(&self) -> &'static str {
        match self {
            Provisioning::Unstarted => "UNSTARTED",
            Provisioning::FolderPending { .. } => "FOLDER_PENDING",
            Provisioning::FilePending { .. } => "FILE_PENDING",
            Provisioning::SessionPending { .. } => "SESSION_PENDING",
            Provisioning::Ready(_) => "READY",
            Provisioning::Failed(_) => "FAILED",
        }
    }
}

enum Step {
    Folder(SharedStep<String>),
    File(SharedStep<String>),
    Session(SharedStep<ContentUploadHandle>),
}

/// 分片写入进度
#[derive(Debug, Default)]
struct Progress {
    /// 已确认写入的字节数，也是下一个分片的起始偏移
    bytes_sent: u64,
    committed: bool,
}

/// 上传会话协调器（每个请求一个）
pub struct UploadSessionCoordinator {
    backend: Arc<dyn StorageBackend>,
    /// 上传文件夹的父目录
    parent_folder: String,
    state: Mutex<Provisioning>,
    /// 分片严格串行：持有锁期间完成一次后端写入
    progress: tokio::sync::Mutex<Progress>,
}

impl UploadSessionCoordinator {
    pub fn new(backend: Arc<dyn StorageBackend>, parent_folder: impl Into<String>) -> Self {
        Self {
            backend,
            parent_folder: parent_folder.into(),
            state: Mutex::new(Provisioning::Unstarted),
            progress: tokio::sync::Mutex::new(Progress::default()),
        }
    }

    /// 当前预创建状态名
    pub fn state_name(&self) -> &'static str {
        self.state.lock().name()
    }

    pub async fn bytes_sent(&self) -> u64 {
        self.progress.lock().await.bytes_sent
    }

    /// 确保上传会话已创建（幂等，可并发调用）
    ///
    /// 文件夹名为首次调用时的本地时间戳，文件名取第一个调用方传入的 `filename`
    pub async fn ensure_session(&self, filename: &str) -> UploadResult<ProvisionedSession> {
        loop {
            let step = {
                let mut state = self.state.lock();
                match &*state {
                    Provisioning::Ready(session) => return Ok(session.clone()),
                    Provisioning::Failed(e) => return Err(e.clone()),
                    Provisioning::Unstarted => {
                        let folder = self.folder_step();
                        *state = Provisioning::FolderPending {
                            filename: filename.to_string(),
                            folder: folder.clone(),
                        };
                        Step::Folder(folder)
                    }
                    Provisioning::FolderPending { folder, .. } => Step::Folder(folder.clone()),
                    Provisioning::FilePending { file, .. } => Step::File(file.clone()),
                    Provisioning::SessionPending { upload, .. } => Step::Session(upload.clone()),
                }
            };

            match step {
                Step::Folder(folder) => {
                    let result = folder.await;
                    self.advance_from_folder(result);
                }
                Step::File(file) => {
                    let result = file.await;
                    self.advance_from_file(result);
                }
                Step::Session(upload) => {
                    let result = upload.await;
                    self.advance_from_session(result);
                }
            }
        }
    }

    fn folder_step(&self) -> SharedStep<String> {
        let backend = Arc::clone(&self.backend);
        let parent = self.parent_folder.clone();
        let name = chrono::Local::now()
            .format("%Y-%m-%dT%H:%M:%S%.6f")
            .to_string();
        async move { backend.create_folder(&parent, &name).await.map(|f| f.id) }
            .boxed()
            .shared()
    }

    fn file_step(&self, folder_id: &str, filename: &str) -> SharedStep<String> {
        let backend = Arc::clone(&self.backend);
        let folder_id = folder_id.to_string();
        let filename = filename.to_string();
        async move {
            backend
                .create_file(&folder_id, &filename)
                .await
                .map(|f| f.id)
        }
        .boxed()
        .shared()
    }

    fn session_step(&self, file_id: &str) -> SharedStep<ContentUploadHandle> {
        let backend = Arc::clone(&self.backend);
        let file_id = file_id.to_string();
        async move { backend.start_content_upload(&file_id).await }
            .boxed()
            .shared()
    }

    fn advance_from_folder(&self, result: UploadResult<String>) {
        let mut state = self.state.lock();
        let filename = match &*state {
            Provisioning::FolderPending { filename, .. } => filename.clone(),
            _ => return,
        };
        *state = match result {
            Ok(folder_id) => {
                debug!("上传文件夹就绪: folder_id={}", folder_id);
                let file = self.file_step(&folder_id, &filename);
                Provisioning::FilePending { folder_id, file }
            }
            Err(e) => {
                warn!("创建上传文件夹失败: {}", e);
                Provisioning::Failed(e)
            }
        };
    }

    fn advance_from_file(&self, result: UploadResult<String>) {
        let mut state = self.state.lock();
        let folder_id = match &*state {
            Provisioning::FilePending { folder_id, .. } => folder_id.clone(),
            _ => return,
        };
        *state = match result {
            Ok(file_id) => {
                debug!("远端文件就绪: file_id={}", file_id);
                let upload = self.session_step(&file_id);
                Provisioning::SessionPending {
                    folder_id,
                    file_id,
                    upload,
                }
            }
            Err(e) => {
                warn!("创建远端文件失败: {}", e);
                Provisioning::Failed(e)
            }
        };
    }

    fn advance_from_session(&self, result: UploadResult<ContentUploadHandle>) {
        let mut state = self.state.lock();
        let (folder_id, file_id) = match &*state {
            Provisioning::SessionPending {
                folder_id, file_id, ..
            } => (folder_id.clone(), file_id.clone()),
            _ => return,
        };
        *state = match result {
            Ok(upload) => {
                info!(
                    "上传会话就绪: file_id={}, upload_id={}",
                    file_id, upload.upload_id
                );
                Provisioning::Ready(ProvisionedSession {
                    folder_id,
                    file_id,
                    upload,
                })
            }
            Err(e) => {
                warn!("创建上传会话失败: {}", e);
                Provisioning::Failed(e)
            }
        };
    }

    fn ready_session(&self, operation: &str) -> UploadResult<ProvisionedSession> {
        match &*self.state.lock() {
            Provisioning::Ready(session) => Ok(session.clone()),
            Provisioning::Failed(e) => Err(e.clone()),
            other => Err(UploadError::ContractViolation(format!(
                "{} 时上传会话尚未就绪（{}）",
                operation,
                other.name()
            ))),
        }
    }

    fn fail(&self, error: UploadError) {
        *self.state.lock() = Provisioning::Failed(error);
    }

    /// 写入一个分片，范围为 `[bytes_sent, bytes_sent + len - 1]`
    ///
    /// 空分片直接忽略；任何后端失败都会让整个会话进入 FAILED
    pub async fn upload_chunk(&self, data: Bytes) -> UploadResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let session = self.ready_session("upload_chunk")?;
        let mut progress = self.progress.lock().await;
        if progress.committed {
            return Err(UploadError::ContractViolation(
                "上传已提交，不能继续写入分片".to_string(),
            ));
        }

        let len = data.len() as u64;
        let range = ContentRange::chunk(progress.bytes_sent, len);
        if let Err(e) = self
            .backend
            .upload_chunk(&session.upload, range, data)
            .await
        {
            self.fail(e.clone());
            return Err(e);
        }

        progress.bytes_sent += len;
        debug!("分片写入完成: range={}, bytes_sent={}", range, progress.bytes_sent);
        Ok(())
    }

    /// 提交上传，返回最终字节数
    pub async fn commit(&self) -> UploadResult<u64> {
        let session = self.ready_session("commit")?;
        let mut progress = self.progress.lock().await;
        if progress.committed {
            return Err(UploadError::ContractViolation("重复提交上传".to_string()));
        }
        progress.committed = true;

        let total = progress.bytes_sent;
        if let Err(e) = self.backend.commit(&session.upload, total).await {
            self.fail(e.clone());
            return Err(e);
        }

        info!("上传提交成功: file_id={}, total={} bytes", session.file_id, total);
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{Call, MockBackend};
    use std::time::Duration;

    fn coordinator(backend: &Arc<MockBackend>) -> UploadSessionCoordinator {
        UploadSessionCoordinator::new(backend.clone() as Arc<dyn StorageBackend>, "appdata")
    }

    fn provisioning_counts(backend: &MockBackend) -> (usize, usize, usize) {
        (
            backend.count(|c| matches!(c, Call::CreateFolder { .. })),
            backend.count(|c| matches!(c, Call::CreateFile { .. })),
            backend.count(|c| matches!(c, Call::StartUpload { .. })),
        )
    }

    #[tokio::test]
    async fn test_concurrent_ensure_provisions_once() {
        let backend = Arc::new(MockBackend::new().with_delay(Duration::from_millis(20)));
        let coord = coordinator(&backend);

        let (a, b, c, d) = tokio::join!(
            coord.ensure_session("a.txt"),
            coord.ensure_session("b.txt"),
            coord.ensure_session("c.txt"),
            coord.ensure_session("d.txt")
        );

        let a = a.unwrap();
        assert_eq!(a, b.unwrap());
        assert_eq!(a, c.unwrap());
        assert_eq!(a, d.unwrap());
        assert_eq!(provisioning_counts(&backend), (1, 1, 1));
        assert_eq!(coord.state_name(), "READY");

        let calls = backend.calls();
        match &calls[0] {
            Call::CreateFolder { parent, .. } => assert_eq!(parent, "appdata"),
            other => panic!("unexpected first call: {:?}", other),
        }
        // 第一个调用方的文件名胜出
        assert_eq!(
            calls[1],
            Call::CreateFile {
                parent: "folder-1".to_string(),
                name: "a.txt".to_string()
            }
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ensure_across_tasks() {
        let backend = Arc::new(MockBackend::new().with_delay(Duration::from_millis(10)));
        let coord = Arc::new(coordinator(&backend));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let coord = Arc::clone(&coord);
                tokio::spawn(async move { coord.ensure_session(&format!("{}.bin", i)).await })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().file_id, "file-1");
        }
        assert_eq!(provisioning_counts(&backend), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_sequential_chunks_and_commit() {
        let backend = Arc::new(MockBackend::new());
        let coord = coordinator(&backend);
        coord.ensure_session("a.txt").await.unwrap();

        coord.upload_chunk(Bytes::from_static(b"abcd")).await.unwrap();
        coord.upload_chunk(Bytes::new()).await.unwrap();
        coord.upload_chunk(Bytes::from_static(b"ef")).await.unwrap();
        assert_eq!(coord.bytes_sent().await, 6);
        assert_eq!(coord.commit().await.unwrap(), 6);

        let calls = backend.calls();
        assert_eq!(
            &calls[3..],
            &[
                Call::Chunk {
                    range: ContentRange::Chunk { from: 0, to: 3 },
                    data: b"abcd".to_vec()
                },
                Call::Chunk {
                    range: ContentRange::Chunk { from: 4, to: 5 },
                    data: b"ef".to_vec()
                },
                Call::Commit { total: 6 },
            ]
        );
    }

    #[tokio::test]
    async fn test_chunk_before_session_is_contract_violation() {
        let backend = Arc::new(MockBackend::new());
        let coord = coordinator(&backend);
        let err = coord
            .upload_chunk(Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::ContractViolation(_)));
        assert!(matches!(
            coord.commit().await.unwrap_err(),
            UploadError::ContractViolation(_)
        ));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_provisioning_failure_is_memoized() {
        let backend = Arc::new(MockBackend::new().failing_on("create_file"));
        let coord = coordinator(&backend);

        let first = coord.ensure_session("a.txt").await.unwrap_err();
        assert!(first.is_backend());
        assert_eq!(coord.state_name(), "FAILED");

        let second = coord.ensure_session("a.txt").await.unwrap_err();
        assert_eq!(first, second);
        assert_eq!(provisioning_counts(&backend), (1, 1, 0));
    }

    #[tokio::test]
    async fn test_chunk_failure_aborts_session() {
        let backend = Arc::new(MockBackend::new().failing_on("upload_chunk"));
        let coord = coordinator(&backend);
        coord.ensure_session("a.txt").await.unwrap();

        let err = coord
            .upload_chunk(Bytes::from_static(b"data"))
            .await
            .unwrap_err();
        assert!(err.is_backend());
        assert_eq!(coord.bytes_sent().await, 0);
        assert_eq!(coord.commit().await.unwrap_err(), err);
        assert_eq!(backend.count(|c| matches!(c, Call::Commit { .. })), 0);
    }

    #[tokio::test]
    async fn test_double_commit_rejected() {
        let backend = Arc::new(MockBackend::new());
        let coord = coordinator(&backend);
        coord.ensure_session("empty").await.unwrap();
        assert_eq!(coord.commit().await.unwrap(), 0);
        assert!(matches!(
            coord.commit().await.unwrap_err(),
            UploadError::ContractViolation(_)
        ));
        assert!(matches!(
            coord.upload_chunk(Bytes::from_static(b"late")).await,
            Err(UploadError::ContractViolation(_))
        ));
    }
}
