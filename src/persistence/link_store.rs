//! 上传链接数据库
//!
//! - user:    接收者及其 OAuth 令牌
//! - link:    公开上传链接（uuid 即 URL 中的 token）
//! - uploads: 已提交的上传记录

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::uploader::CommittedUpload;

/// 根据链接查找接收者凭证
///
/// 同步接口，调用方负责放到阻塞线程池执行
pub trait CredentialLookup: Send + Sync {
    /// 返回链接接收者的访问令牌；链接不存在、已停用、已过期或次数用尽时返回 `None`
    fn receiver_credential(&self, link_uuid: &str) -> Result<Option<String>>;
}

/// 新建链接参数
#[derive(Debug, Clone, Default)]
pub struct NewLink {
    pub uuid: String,
    pub receiver_id: i64,
    pub token: String,
    pub expiry_date: Option<DateTime<Utc>>,
    /// `None` 表示不限次数
    pub uploads_allowed: Option<i64>,
}

/// 链接状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkInfo {
    pub uuid: String,
    pub deactivated: bool,
    pub expiry_date: Option<DateTime<Utc>>,
    pub uploads_allowed: Option<i64>,
    pub uploads_performed: i64,
}

/// 上传记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub id: i64,
    pub upload_date: DateTime<Utc>,
    pub filename: String,
    pub size: u64,
    /// 远端文件ID
    pub oid: String,
    pub sha1: String,
}

fn timestamp_to_datetime(ts: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(ts, 0)
        .single()
        .ok_or_else(|| anyhow!("无效的时间戳: {}", ts))
}

/// 链接数据库（r2d2 连接池）
#[derive(Clone)]
pub struct LinkStore {
    pool: Pool<SqliteConnectionManager>,
}

impl LinkStore {
    /// 打开（或创建）数据库
    pub fn open(db_path: &Path, pool_size: u32) -> Result<Self> {
        // 确保父目录存在
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("创建数据库目录失败: {:?}", parent))?;
            }
        }

        let manager = SqliteConnectionManager::file(db_path)
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .build(manager)
            .context("创建数据库连接池失败")?;

        let store = Self { pool };
        store.init_tables()?;
        info!("链接数据库已打开: {:?}", db_path);
        Ok(store)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| anyhow!("获取数据库连接失败: {}", e))
    }

    /// 初始化数据库表
    fn init_tables(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS user (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE,
                oauth_token TEXT
            );

            CREATE TABLE IF NOT EXISTS link (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT NOT NULL UNIQUE,
                receiver_id INTEGER NOT NULL REFERENCES user(id),
                token TEXT NOT NULL,
                create_date INTEGER,
                expiry_date INTEGER,
                uploads_allowed INTEGER,
                uploads_performed INTEGER DEFAULT 0,
                deactivated INTEGER DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS uploads (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                link_id INTEGER NOT NULL REFERENCES link(id),
                upload_date INTEGER NOT NULL,
                filename TEXT NOT NULL,
                size INTEGER NOT NULL,
                oid TEXT NOT NULL,
                sha1 TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_uploads_link_date ON uploads(link_id, upload_date);
            "#,
        )?;
        debug!("链接数据库表初始化完成");
        Ok(())
    }

    // ========================================================================
    // 初始化数据
    // ========================================================================

    /// 添加用户，返回用户ID
    pub fn insert_user(&self, email: &str, oauth_token: Option<&str>) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO user (email, oauth_token) VALUES (?1, ?2)",
            params![email, oauth_token],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 添加链接，返回链接ID
    pub fn insert_link(&self, link: &NewLink) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO link (uuid, receiver_id, token, create_date, expiry_date,
                              uploads_allowed, uploads_performed, deactivated)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 0)
            "#,
            params![
                link.uuid,
                link.receiver_id,
                link.token,
                Utc::now().timestamp(),
                link.expiry_date.map(|d| d.timestamp()),
                link.uploads_allowed,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 停用链接
    pub fn deactivate_link(&self, link_uuid: &str) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE link SET deactivated = 1 WHERE uuid = ?1",
            params![link_uuid],
        )?;
        Ok(changed > 0)
    }

    // ========================================================================
    // 查询
    // ========================================================================

    /// 查询链接状态
    pub fn find_link(&self, link_uuid: &str) -> Result<Option<LinkInfo>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                r#"
                SELECT uuid, COALESCE(deactivated, 0), expiry_date, uploads_allowed,
                       COALESCE(uploads_performed, 0)
                FROM link WHERE uuid = ?1
                "#,
                params![link_uuid],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, bool>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                        row.get::<_, Option<i64>>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()?;

        row.map(
            |(uuid, deactivated, expiry, uploads_allowed, uploads_performed)| {
                Ok(LinkInfo {
                    uuid,
                    deactivated,
                    expiry_date: expiry.map(timestamp_to_datetime).transpose()?,
                    uploads_allowed,
                    uploads_performed,
                })
            },
        )
        .transpose()
    }

    /// 链接接收者的访问令牌（见 [`CredentialLookup`]）
    pub fn receiver_credential(&self, link_uuid: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                r#"
                SELECT u.oauth_token, l.expiry_date, l.uploads_allowed,
                       COALESCE(l.uploads_performed, 0)
                FROM link l JOIN user u ON u.id = l.receiver_id
                WHERE l.uuid = ?1 AND COALESCE(l.deactivated, 0) = 0
                "#,
                params![link_uuid],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<i64>>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((token, expiry, allowed, performed)) = row else {
            debug!("链接不存在或已停用: {}", link_uuid);
            return Ok(None);
        };

        if let Some(expiry) = expiry {
            if expiry <= Utc::now().timestamp() {
                debug!("链接已过期: {}", link_uuid);
                return Ok(None);
            }
        }
        if let Some(allowed) = allowed {
            if performed >= allowed {
                debug!(
                    "链接上传次数已用尽: {} ({}/{})",
                    link_uuid, performed, allowed
                );
                return Ok(None);
            }
        }

        Ok(token.filter(|t| !t.is_empty()))
    }

    /// 按上传时间列出链接的上传记录
    pub fn list_uploads(&self, link_uuid: &str) -> Result<Vec<UploadRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT up.id, up.upload_date, up.filename, up.size, up.oid, up.sha1
            FROM uploads up JOIN link l ON l.id = up.link_id
            WHERE l.uuid = ?1
            ORDER BY up.upload_date, up.id
            "#,
        )?;

        let rows = stmt.query_map(params![link_uuid], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, date, filename, size, oid, sha1) = row?;
            records.push(UploadRecord {
                id,
                upload_date: timestamp_to_datetime(date)?,
                filename,
                size: size.max(0) as u64,
                oid,
                sha1,
            });
        }
        Ok(records)
    }

    // ========================================================================
    // 写入
    // ========================================================================

    /// 记录一次已提交的上传，并累加链接的使用次数
    pub fn record_upload(&self, link_uuid: &str, upload: &CommittedUpload) -> Result<UploadRecord> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let link_id: i64 = tx
            .query_row(
                "SELECT id FROM link WHERE uuid = ?1",
                params![link_uuid],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| anyhow!("链接不存在: {}", link_uuid))?;

        let upload_date = Utc::now();
        tx.execute(
            r#"
            INSERT INTO uploads (link_id, upload_date, filename, size, oid, sha1)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                link_id,
                upload_date.timestamp(),
                upload.filename,
                upload.size as i64,
                upload.file_id,
                upload.sha1,
            ],
        )?;
        let id = tx.last_insert_rowid();

        tx.execute(
            "UPDATE link SET uploads_performed = COALESCE(uploads_performed, 0) + 1 WHERE id = ?1",
            params![link_id],
        )?;
        tx.commit()?;

        info!(
            "上传已记录: link={}, filename={}, size={}",
            link_uuid, upload.filename, upload.size
        );

        Ok(UploadRecord {
            id,
            upload_date: timestamp_to_datetime(upload_date.timestamp())?,
            filename: upload.filename.clone(),
            size: upload.size,
            oid: upload.file_id.clone(),
            sha1: upload.sha1.clone(),
        })
    }
}

impl CredentialLookup for LinkStore {
    fn receiver_credential(&self, link_uuid: &str) -> Result<Option<String>> {
        LinkStore::receiver_credential(self, link_uuid)
    }
}
