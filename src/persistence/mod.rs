//! 持久化模块
//!
//! 流式上传链路本身不落盘；HTTP 层通过链接数据库查找接收者凭证并记录已提交的上传。

pub mod link_store;

pub use link_store::{CredentialLookup, LinkInfo, LinkStore, NewLink, UploadRecord};
