// 公开链接上传 API 处理器
//
// 请求体按网络读取的节奏送入上传管线；管线内部等待分片写入完成后才会读取下一批字节。

use std::error::Error as StdError;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header::CONTENT_TYPE, HeaderMap},
    response::Redirect,
    Json,
};
use futures::StreamExt;
use http_body_util::LengthLimitError;
use serde::Serialize;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use super::ApiResponse;
use crate::error::UploadError;
use crate::multipart::Boundary;
use crate::persistence::UploadRecord;
use crate::server::error::{ApiError, ApiResult};
use crate::server::state::AppState;
use crate::uploader::{CommittedUpload, UploadPipeline, UploadSessionCoordinator};

/// 上传成功页数据
#[derive(Debug, Serialize)]
pub struct UploadSuccessResponse {
    pub link: String,
    pub uploads_performed: i64,
    /// `None` 表示不限次数
    pub uploads_allowed: Option<i64>,
    pub uploads: Vec<UploadRecord>,
}

/// 日志中只显示链接前缀
fn link_prefix(token: &str) -> String {
    token.chars().take(8).collect()
}

fn body_read_error(err: axum::Error) -> UploadError {
    let inner = err.into_inner();
    let mut too_large = false;
    let mut current: Option<&(dyn StdError + 'static)> = Some(inner.as_ref());
    while let Some(e) = current {
        if e.is::<LengthLimitError>() {
            too_large = true;
            break;
        }
        current = e.source();
    }
    UploadError::BodyRead {
        message: inner.to_string(),
        too_large,
    }
}

async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::internal(format!("数据库任务失败: {}", e)))?
        .map_err(ApiError::from)
}

/// 上传文件
///
/// POST /l/:token
pub async fn upload_file(
    State(state): State<AppState>,
    Path(token): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<Redirect> {
    let span = info_span!("upload", request_id = %Uuid::new_v4(), link = %link_prefix(&token));

    async move {
        match relay_upload(&state, &token, &headers, body).await {
            Ok(committed) => {
                info!(
                    "上传完成: filename={}, size={}, file_id={}",
                    committed.filename, committed.size, committed.file_id
                );
                Ok(Redirect::to(&format!("/l/{}/success", token)))
            }
            Err(e) => {
                error!("上传失败: {}", e);
                Err(e)
            }
        }
    }
    .instrument(span)
    .await
}

async fn relay_upload(
    state: &AppState,
    token: &str,
    headers: &HeaderMap,
    body: Body,
) -> ApiResult<CommittedUpload> {
    // 1. 查找接收者凭证
    let credentials = Arc::clone(&state.credentials);
    let link = token.to_string();
    let credential = blocking(move || credentials.receiver_credential(&link))
        .await?
        .ok_or(UploadError::LinkNotFound)?;

    // 2. 从 Content-Type 推导 boundary
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let boundary = Boundary::from_content_type(content_type)?;

    // 3. 创建上传管线
    let backend = (state.backend_factory)(&state.config.backend, &credential)?;
    let coordinator = Arc::new(UploadSessionCoordinator::new(
        backend,
        state.config.backend.parent_folder.clone(),
    ));
    let mut pipeline = UploadPipeline::new(boundary, coordinator, &state.config.upload);

    // 4. 流式读取请求体
    let mut stream = body.into_data_stream();
    while let Some(frame) = stream.next().await {
        let data = frame.map_err(body_read_error)?;
        pipeline.feed(&data).await?;
    }
    debug!("请求体读取完毕: {} bytes", pipeline.total_received());
    pipeline.finish()?;

    // 5. 提交并记录
    let committed = pipeline.commit().await?;
    let store = Arc::clone(&state.link_store);
    let link = token.to_string();
    let record = committed.clone();
    blocking(move || store.record_upload(&link, &record)).await?;

    Ok(committed)
}

/// 上传成功页
///
/// GET /l/:token/success
pub async fn upload_success(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Json<ApiResponse<UploadSuccessResponse>>> {
    let store = Arc::clone(&state.link_store);
    let link = token.clone();
    let (info, uploads) = blocking(move || {
        let info = store.find_link(&link)?;
        let uploads = store.list_uploads(&link)?;
        Ok((info, uploads))
    })
    .await?;

    let info = info.ok_or(UploadError::LinkNotFound)?;
    Ok(Json(ApiResponse::success(UploadSuccessResponse {
        link: token,
        uploads_performed: info.uploads_performed,
        uploads_allowed: info.uploads_allowed,
        uploads,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{Call, MockBackend};
    use crate::backend::StorageBackend;
    use crate::config::{AppConfig, BackendConfig};
    use crate::persistence::{LinkStore, NewLink};
    use crate::server::{build_router, BackendFactory};
    use axum::http::{header::LOCATION, Request, StatusCode};
    use axum::Router;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const LINK: &str = "0123456789abcdef0123456789abcdef";

    struct Fixture {
        _dir: TempDir,
        store: Arc<LinkStore>,
        backend: Arc<MockBackend>,
        app: Router,
    }

    fn mock_factory(backend: Arc<MockBackend>) -> BackendFactory {
        Arc::new(
            move |_config: &BackendConfig, token: &str| -> anyhow::Result<Arc<dyn StorageBackend>> {
                assert_eq!(token, "oauth-token");
                Ok(backend.clone())
            },
        )
    }

    fn fixture_with(backend: MockBackend, configure: impl FnOnce(&mut AppConfig)) -> Fixture {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.persistence.db_path = dir.path().join("database.db");
        config.upload.chunk_size = 4;
        configure(&mut config);

        let store = Arc::new(LinkStore::open(&config.persistence.db_path, 2).unwrap());
        let receiver_id = store
            .insert_user("receiver@example.com", Some("oauth-token"))
            .unwrap();
        store
            .insert_link(&NewLink {
                uuid: LINK.to_string(),
                receiver_id,
                token: "share".to_string(),
                ..NewLink::default()
            })
            .unwrap();

        let backend = Arc::new(backend);
        let state = AppState::with_store(config, Arc::clone(&store))
            .with_backend_factory(mock_factory(Arc::clone(&backend)));

        Fixture {
            _dir: dir,
            store,
            backend,
            app: build_router(state),
        }
    }

    fn fixture(backend: MockBackend) -> Fixture {
        fixture_with(backend, |_| {})
    }

    fn multipart_body(payload: &[u8]) -> Vec<u8> {
        let mut body = b"--B\r\nContent-Disposition: form-data; name=\"uploaded-file\"; filename=\"a.txt\"\r\n\r\n".to_vec();
        body.extend_from_slice(payload);
        body.extend_from_slice(b"\r\n--B--\r\n");
        body
    }

    fn post(link: &str, content_type: &str, body: Body) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(format!("/l/{}", link))
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .unwrap()
    }

    const MULTIPART: &str = "multipart/form-data; boundary=\"B\"";

    #[tokio::test]
    async fn test_upload_redirects_and_records() {
        let f = fixture(MockBackend::new());
        let payload = b"hello streaming world";
        let chunks: Vec<Result<Vec<u8>, std::io::Error>> = multipart_body(payload)
            .chunks(5)
            .map(|c| Ok(c.to_vec()))
            .collect();

        let response = f
            .app
            .clone()
            .oneshot(post(
                LINK,
                MULTIPART,
                Body::from_stream(futures::stream::iter(chunks)),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers()[LOCATION],
            format!("/l/{}/success", LINK).as_str()
        );
        assert_eq!(f.backend.uploaded_bytes(), payload);
        assert_eq!(
            f.backend.calls().last(),
            Some(&Call::Commit {
                total: payload.len() as u64
            })
        );

        let uploads = f.store.list_uploads(LINK).unwrap();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].filename, "a.txt");
        assert_eq!(uploads[0].oid, "file-1");
        assert_eq!(uploads[0].size, payload.len() as u64);

        let response = f
            .app
            .oneshot(
                Request::builder()
                    .uri(format!("/l/{}/success", LINK))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["code"], 0);
        assert_eq!(json["data"]["uploads_performed"], 1);
        assert_eq!(json["data"]["uploads"][0]["filename"], "a.txt");
    }

    #[tokio::test]
    async fn test_latin1_filename_upload_is_recorded() {
        let f = fixture(MockBackend::new());
        let mut body = b"--B\r\nContent-Disposition: form-data; name=\"uploaded-file\"; filename=\"caf\xe9.txt\"\r\n\r\n".to_vec();
        body.extend_from_slice(b"REAL FILE CONTENT\r\n--B--\r\n");

        let response = f
            .app
            .oneshot(post(LINK, MULTIPART, Body::from(body)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(f.backend.uploaded_bytes(), b"REAL FILE CONTENT");
        let uploads = f.store.list_uploads(LINK).unwrap();
        assert_eq!(uploads[0].filename, "caf\u{e9}.txt");
        assert_eq!(uploads[0].size, 17);
    }

    #[tokio::test]
    async fn test_unknown_link_is_not_found() {
        let f = fixture(MockBackend::new());
        let response = f
            .app
            .clone()
            .oneshot(post("missing", MULTIPART, Body::from(multipart_body(b"x"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(f.backend.calls().is_empty());

        let response = f
            .app
            .oneshot(
                Request::builder()
                    .uri("/l/missing/success")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_missing_boundary_is_bad_request() {
        let f = fixture(MockBackend::new());
        let response = f
            .app
            .oneshot(post(LINK, "application/json", Body::from("{}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(f.backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_truncated_body_does_not_commit() {
        let f = fixture(MockBackend::new());
        let mut body = multipart_body(b"abcdefgh");
        body.truncate(body.len() - 6);

        let response = f
            .app
            .oneshot(post(LINK, MULTIPART, Body::from(body)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(f.backend.count(|c| matches!(c, Call::Commit { .. })), 0);
        assert!(f.store.list_uploads(LINK).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_backend_failure_is_bad_gateway() {
        let f = fixture(MockBackend::new().failing_on("create_file"));
        let response = f
            .app
            .oneshot(post(LINK, MULTIPART, Body::from(multipart_body(b"abcdefgh"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(f.store.list_uploads(LINK).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_body_over_limit_is_rejected() {
        let f = fixture_with(MockBackend::new(), |config| {
            config.server.max_body_size = 64;
        });
        let response = f
            .app
            .oneshot(post(LINK, MULTIPART, Body::from(multipart_body(&[b'x'; 256]))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(f.backend.count(|c| matches!(c, Call::Commit { .. })), 0);
    }

    #[test]
    fn test_link_prefix() {
        assert_eq!(link_prefix(LINK), "01234567");
        assert_eq!(link_prefix("ab"), "ab");
    }
}
