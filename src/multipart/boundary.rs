// multipart 分隔符与边界扫描
//
// 三种分隔符：
// - start: --boundary\r\n        （第一个分段之前，前面的序言丢弃）
// - mid:   \r\n--boundary\r\n    （分段之间）
// - end:   \r\n--boundary--      （最后一个分段之后，后面的尾声丢弃）
//
// mid 和 end 共享前缀 \r\n--boundary，扫描器只查找这个前缀，
// 再根据其后两个字节判断是 mid 还是 end。

use crate::error::{UploadError, UploadResult};
use memchr::memmem::Finder;
use mime::Mime;
use std::fmt;
use std::str::FromStr;

/// 分隔符类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    /// 分段之间的分隔符，之后是下一个分段的头部
    Mid,
    /// 结束分隔符，之后进入 FINISHED
    End,
}

/// 单次扫描结果
///
/// `body` 总是指缓冲区开头可以安全写入当前分段正文的字节数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scan {
    /// 没有完整分隔符；`body` 之后的字节可能是分隔符的开头，需要等待更多数据
    NeedMore { body: usize },
    /// 找到分隔符，占用 `len` 字节
    Found {
        body: usize,
        delimiter: Delimiter,
        len: usize,
    },
    /// 前缀匹配但既不是 mid 也不是 end；写入 `body` 字节后重新扫描
    Rejected { body: usize },
}

/// 请求级别的 boundary，创建后不可变
pub struct Boundary {
    token: Vec<u8>,
    start: Vec<u8>,
    prefix: Vec<u8>,
    finder: Finder<'static>,
}

impl fmt::Debug for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Boundary")
            .field("token", &String::from_utf8_lossy(&self.token))
            .finish()
    }
}

impl Boundary {
    /// 从原始 token 构造（不含前导 `--`）
    pub fn new(token: impl Into<Vec<u8>>) -> UploadResult<Self> {
        let token = token.into();
        if token.is_empty() {
            return Err(UploadError::MissingBoundaryToken);
        }

        let mut start = Vec::with_capacity(token.len() + 4);
        start.extend_from_slice(b"--");
        start.extend_from_slice(&token);
        start.extend_from_slice(b"\r\n");

        let mut prefix = Vec::with_capacity(token.len() + 4);
        prefix.extend_from_slice(b"\r\n--");
        prefix.extend_from_slice(&token);

        let finder = Finder::new(&prefix).into_owned();

        Ok(Self {
            token,
            start,
            prefix,
            finder,
        })
    }

    /// 从请求的 Content-Type 头部提取 boundary
    ///
    /// 只接受 `multipart/form-data`
    pub fn from_content_type(content_type: &str) -> UploadResult<Self> {
        let parsed = Mime::from_str(content_type).map_err(|_| UploadError::MissingBoundaryToken)?;
        if parsed.type_() != mime::MULTIPART || parsed.subtype() != mime::FORM_DATA {
            return Err(UploadError::MissingBoundaryToken);
        }

        let param = parsed
            .get_param(mime::BOUNDARY)
            .ok_or(UploadError::MissingBoundaryToken)?;
        let value = param.as_str();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        Self::new(value.as_bytes())
    }

    pub fn token(&self) -> &[u8] {
        &self.token
    }

    /// `--boundary\r\n`
    pub fn start_delimiter(&self) -> &[u8] {
        &self.start
    }

    /// `\r\n--boundary`
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// mid 分隔符长度（前缀 + `\r\n`）
    pub fn mid_len(&self) -> usize {
        self.prefix.len() + 2
    }

    /// end 分隔符长度（前缀 + `--`）
    pub fn end_len(&self) -> usize {
        self.prefix.len() + 2
    }

    /// 在正文缓冲区中查找 mid/end 分隔符
    pub fn scan(&self, buf: &[u8]) -> Scan {
        let Some(index) = self.finder.find(buf) else {
            let keep = self.partial_suffix_len(buf);
            return Scan::NeedMore {
                body: buf.len() - keep,
            };
        };

        let tail = &buf[index + self.prefix.len()..];
        if tail.len() < 2 {
            // 数据不足以判断 mid/end，保留候选位置之后的全部字节
            return Scan::NeedMore { body: index };
        }

        match &tail[..2] {
            b"\r\n" => Scan::Found {
                body: index,
                delimiter: Delimiter::Mid,
                len: self.mid_len(),
            },
            b"--" => Scan::Found {
                body: index,
                delimiter: Delimiter::End,
                len: self.end_len(),
            },
            // 只越过候选起点一个字节：自重叠的 token 可能让真正的分隔符从候选内部开始
            _ => Scan::Rejected { body: index + 1 },
        }
    }

    /// 缓冲区末尾同时是前缀真前缀的最长后缀长度
    fn partial_suffix_len(&self, buf: &[u8]) -> usize {
        let max = (self.prefix.len() - 1).min(buf.len());
        (1..=max)
            .rev()
            .find(|&n| buf.ends_with(&self.prefix[..n]))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boundary() -> Boundary {
        Boundary::new(b"B".to_vec()).unwrap()
    }

    #[test]
    fn test_delimiters() {
        let b = boundary();
        assert_eq!(b.start_delimiter(), b"--B\r\n");
        assert_eq!(b.prefix(), b"\r\n--B");
        assert_eq!(b.mid_len(), 7);
        assert_eq!(b.end_len(), 7);
    }

    #[test]
    fn test_from_content_type() {
        let b = Boundary::from_content_type("multipart/form-data; boundary=abc123").unwrap();
        assert_eq!(b.token(), b"abc123");

        let b = Boundary::from_content_type(
            "Multipart/Form-Data; charset=utf-8; boundary=\"----WebKitFormBoundary7MA4YWxk\"",
        )
        .unwrap();
        assert_eq!(b.token(), b"----WebKitFormBoundary7MA4YWxk");
    }

    #[test]
    fn test_from_content_type_missing_boundary() {
        assert_eq!(
            Boundary::from_content_type("multipart/form-data").unwrap_err(),
            UploadError::MissingBoundaryToken
        );
        assert_eq!(
            Boundary::from_content_type("multipart/form-data; boundary=\"\"").unwrap_err(),
            UploadError::MissingBoundaryToken
        );
        assert_eq!(
            Boundary::from_content_type("application/json; boundary=x").unwrap_err(),
            UploadError::MissingBoundaryToken
        );
        assert_eq!(
            Boundary::from_content_type("not a mime type").unwrap_err(),
            UploadError::MissingBoundaryToken
        );
    }

    #[test]
    fn test_scan_plain_body() {
        assert_eq!(boundary().scan(b"hello world"), Scan::NeedMore { body: 11 });
    }

    #[test]
    fn test_scan_holds_back_partial_prefix() {
        let b = boundary();
        assert_eq!(b.scan(b"hello\r"), Scan::NeedMore { body: 5 });
        assert_eq!(b.scan(b"hello\r\n-"), Scan::NeedMore { body: 5 });
        assert_eq!(b.scan(b"hello\r\n--"), Scan::NeedMore { body: 5 });
        // 完整前缀但缺少后两个字节
        assert_eq!(b.scan(b"hello\r\n--B"), Scan::NeedMore { body: 5 });
        assert_eq!(b.scan(b"hello\r\n--B-"), Scan::NeedMore { body: 5 });
    }

    #[test]
    fn test_scan_found_mid_and_end() {
        let b = boundary();
        assert_eq!(
            b.scan(b"abc\r\n--B\r\nContent"),
            Scan::Found {
                body: 3,
                delimiter: Delimiter::Mid,
                len: 7
            }
        );
        assert_eq!(
            b.scan(b"abc\r\n--B--\r\n"),
            Scan::Found {
                body: 3,
                delimiter: Delimiter::End,
                len: 7
            }
        );
    }

    #[test]
    fn test_scan_rejected_prefix() {
        // \r\n--B 之后既不是 \r\n 也不是 --
        assert_eq!(boundary().scan(b"ab\r\n--Bx tail"), Scan::Rejected { body: 3 });
    }

    #[test]
    fn test_scan_self_overlapping_token() {
        // 前缀 "\r\n--a\r\n--a\r\n-" 以 5 为周期自重叠
        let b = Boundary::new(b"a\r\n--a\r\n-".to_vec()).unwrap();
        let mut data = b"\r\n--a".to_vec();
        data.extend_from_slice(b.prefix());
        data.extend_from_slice(b"--");

        // 第一个候选在 0 处被否定，但真正的 end 分隔符从 5 开始
        assert_eq!(b.scan(&data), Scan::Rejected { body: 1 });
        assert_eq!(
            b.scan(&data[1..]),
            Scan::Found {
                body: 4,
                delimiter: Delimiter::End,
                len: b.end_len()
            }
        );
    }
}
