// 应用状态

use crate::backend::{ApiClient, StorageBackend};
use crate::config::{AppConfig, BackendConfig};
use crate::persistence::{CredentialLookup, LinkStore};
use std::sync::Arc;

/// 根据接收者令牌创建存储后端
pub type BackendFactory =
    Arc<dyn Fn(&BackendConfig, &str) -> anyhow::Result<Arc<dyn StorageBackend>> + Send + Sync>;

/// 应用全局状态
#[derive(Clone)]
pub struct AppState {
    /// 应用配置（启动后只读）
    pub config: Arc<AppConfig>,
    /// 链接数据库
    pub link_store: Arc<LinkStore>,
    /// 凭证查询
    pub credentials: Arc<dyn CredentialLookup>,
    /// 存储后端工厂（每个上传请求一个客户端，Cookie 不跨请求共享）
    pub backend_factory: BackendFactory,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let link_store = Arc::new(LinkStore::open(
            &config.persistence.db_path,
            config.persistence.pool_size,
        )?);
        Ok(Self::with_store(config, link_store))
    }

    /// 使用已打开的链接数据库创建状态，后端为 [`ApiClient`]
    pub fn with_store(config: AppConfig, link_store: Arc<LinkStore>) -> Self {
        let factory: BackendFactory = Arc::new(
            |config: &BackendConfig, token: &str| -> anyhow::Result<Arc<dyn StorageBackend>> {
                Ok(Arc::new(ApiClient::new(config, token)?))
            },
        );
        Self {
            config: Arc::new(config),
            credentials: link_store.clone(),
            link_store,
            backend_factory: factory,
        }
    }

    /// 替换存储后端工厂
    pub fn with_backend_factory(mut self, factory: BackendFactory) -> Self {
        self.backend_factory = factory;
        self
    }
}
