// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/app.toml";

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务器配置
    #[serde(default)]
    pub server: ServerConfig,
    /// 存储后端配置
    #[serde(default)]
    pub backend: BackendConfig,
    /// 上传配置
    #[serde(default)]
    pub upload: UploadConfig,
    /// 持久化配置
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// 🔥 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 单个日志文件最大大小（字节，默认 50MB）
    #[serde(default = "default_log_max_file_size")]
    pub max_file_size: u64,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_file_size() -> u64 {
    50 * 1024 * 1024 // 50MB
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
            max_file_size: default_log_max_file_size(),
        }
    }
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    #[serde(default = "default_host")]
    pub host: String,
    /// 监听端口
    #[serde(default = "default_port")]
    pub port: u16,
    /// 请求体大小上限（字节，默认 8GB）
    #[serde(default = "default_max_body_size")]
    pub max_body_size: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_max_body_size() -> u64 {
    8 * 1024 * 1024 * 1024 // 8GB
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_size: default_max_body_size(),
        }
    }
}

/// 存储后端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// 后端主机名
    #[serde(default = "default_backend_hostname")]
    pub hostname: String,
    /// 协议（https / http）
    #[serde(default = "default_backend_scheme")]
    pub scheme: String,
    /// API 版本前缀
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    /// 上传文件夹的父目录
    #[serde(default = "default_parent_folder")]
    pub parent_folder: String,
    /// 单次请求超时（秒）
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_backend_hostname() -> String {
    "share.example.com".to_string()
}

fn default_backend_scheme() -> String {
    "https".to_string()
}

fn default_api_prefix() -> String {
    "/api/v1.2".to_string()
}

fn default_parent_folder() -> String {
    "appdata".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            hostname: default_backend_hostname(),
            scheme: default_backend_scheme(),
            api_prefix: default_api_prefix(),
            parent_folder: default_parent_folder(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl BackendConfig {
    /// API 基础地址，如 `https://host/api/v1.2`
    pub fn base_url(&self) -> String {
        format!(
            "{}://{}{}",
            self.scheme,
            self.hostname,
            self.api_prefix.trim_end_matches('/')
        )
    }
}

/// 上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// 分片阈值（字节，默认 1MB）
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// 文件字段名
    #[serde(default = "default_field_name")]
    pub field_name: String,
    /// 单行分段头部上限（字节，默认 16KB）
    #[serde(default = "default_max_header_line")]
    pub max_header_line: usize,
    /// 单个非文件字段的正文上限（字节，默认 1MB）
    #[serde(default = "default_max_form_field_size")]
    pub max_form_field_size: usize,
    /// 单个请求的分段数上限
    #[serde(default = "default_max_form_parts")]
    pub max_form_parts: usize,
}

fn default_chunk_size() -> usize {
    1024 * 1024 // 1MB
}

fn default_field_name() -> String {
    "uploaded-file".to_string()
}

fn default_max_header_line() -> usize {
    16 * 1024
}

fn default_max_form_field_size() -> usize {
    1024 * 1024
}

fn default_max_form_parts() -> usize {
    1000
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            field_name: default_field_name(),
            max_header_line: default_max_header_line(),
            max_form_field_size: default_max_form_field_size(),
            max_form_parts: default_max_form_parts(),
        }
    }
}

/// 持久化配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite 数据库路径
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// 连接池大小
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("state/database.db")
}

fn default_pool_size() -> u32 {
    4
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            pool_size: default_pool_size(),
        }
    }
}

impl AppConfig {
    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.upload.chunk_size == 0 {
            anyhow::bail!("upload.chunk_size 必须大于 0");
        }
        if self.upload.field_name.trim().is_empty() {
            anyhow::bail!("upload.field_name 不能为空");
        }
        if self.upload.max_header_line == 0 {
            anyhow::bail!("upload.max_header_line 必须大于 0");
        }
        if self.upload.max_form_field_size == 0 || self.upload.max_form_parts == 0 {
            anyhow::bail!("upload.max_form_field_size 和 upload.max_form_parts 必须大于 0");
        }
        if self.backend.hostname.trim().is_empty() {
            anyhow::bail!("backend.hostname 不能为空");
        }
        Ok(())
    }

    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;

        config.validate().context("配置文件校验失败")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = std::path::Path::new(path).parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("✓ 配置已保存: {}", path);

        Ok(())
    }

    /// 加载或创建默认配置
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {:#}", e);
                let default_config = Self::default();

                // 只在文件不存在时写回默认配置，避免覆盖用户写错的文件
                if !std::path::Path::new(path).exists() {
                    if let Err(e) = default_config.save_to_file(path).await {
                        tracing::error!("保存默认配置失败: {}", e);
                    }
                }

                default_config
            }
        }
    }
}
