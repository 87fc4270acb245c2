// 分段头部解析
//
// 每行头部交给 httparse 解析，Content-Disposition 的参数用 nom 在字节层面解析。
// 参数值不是合法 UTF-8 时按 ISO-8859-1 解码，保证字段名不会因为文件名编码而丢失。

use crate::error::{UploadError, UploadResult};
use nom::branch::alt;
use nom::bytes::complete::{tag, take_till, take_while1};
use nom::character::complete::space0;
use nom::combinator::{all_consuming, opt};
use nom::multi::many0;
use nom::sequence::{delimited, preceded, separated_pair, terminated};
use nom::{IResult, Parser};
use tracing::warn;

/// 分段头部集合
///
/// 头部名称大小写不敏感，插入顺序无意义
#[derive(Debug, Clone, Default)]
pub struct PartHeaders {
    entries: Vec<(String, String)>,
    disposition: Option<ContentDisposition>,
}

impl PartHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// 解析一行头部（不含结尾的 CRLF）
    ///
    /// 畸形的行只记录警告并跳过，不会中断当前分段。
    /// 不支持折叠续行，以空白开头的行按畸形处理。
    pub fn parse_line(&mut self, line: &[u8]) {
        if let Err(e) = self.try_parse_line(line) {
            warn!("跳过畸形的分段头部: {}", e);
        }
    }

    fn try_parse_line(&mut self, line: &[u8]) -> UploadResult<()> {
        let mut buf = Vec::with_capacity(line.len() + 4);
        buf.extend_from_slice(line);
        buf.extend_from_slice(b"\r\n\r\n");

        let mut slots = [httparse::EMPTY_HEADER; 1];
        let header = match httparse::parse_headers(&buf, &mut slots) {
            Ok(httparse::Status::Complete((_, [header]))) => header,
            Ok(_) => {
                return Err(UploadError::MalformedMultipartHeader(format!(
                    "不完整的头部行: {:?}",
                    String::from_utf8_lossy(line)
                )))
            }
            Err(e) => {
                return Err(UploadError::MalformedMultipartHeader(format!(
                    "{}: {:?}",
                    e,
                    String::from_utf8_lossy(line)
                )))
            }
        };
        if header.name.is_empty() {
            return Err(UploadError::MalformedMultipartHeader(format!(
                "头部名称为空: {:?}",
                String::from_utf8_lossy(line)
            )));
        }

        let value = header.value.trim_ascii();
        if header.name.eq_ignore_ascii_case("content-disposition") {
            // 解析失败时整行丢弃
            self.disposition = Some(ContentDisposition::parse(value)?);
        }
        self.entries
            .push((header.name.to_string(), decode_text(value)));
        Ok(())
    }

    /// 按名称（大小写不敏感）获取第一个值
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn content_disposition(&self) -> Option<&ContentDisposition> {
        self.disposition.as_ref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get("content-type")
    }
}

/// Content-Disposition 参数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentDisposition {
    /// 类型，multipart/form-data 中总是 `form-data`
    pub kind: String,
    /// 字段名
    pub name: Option<String>,
    /// 上传文件的原始文件名
    pub filename: Option<String>,
    /// 其余参数
    pub params: Vec<(String, String)>,
}

impl ContentDisposition {
    /// 解析形如 `form-data; name="f"; filename="a.txt"` 的值
    pub fn parse(value: &[u8]) -> UploadResult<Self> {
        let (_, (kind, params)) = disposition(value).map_err(|_| {
            UploadError::MalformedMultipartHeader(format!(
                "Content-Disposition 无法解析: {:?}",
                String::from_utf8_lossy(value)
            ))
        })?;

        let mut parsed = ContentDisposition {
            kind: decode_text(kind).to_ascii_lowercase(),
            ..Default::default()
        };
        for (key, raw) in params {
            let key = decode_text(key).to_ascii_lowercase();
            let val = decode_text(raw.trim_ascii());
            match key.as_str() {
                "name" => parsed.name = Some(val),
                "filename" => parsed.filename = Some(val),
                _ => parsed.params.push((key, val)),
            }
        }
        Ok(parsed)
    }

    pub fn is_form_data(&self) -> bool {
        self.kind == "form-data"
    }
}

/// UTF-8 优先，否则按 ISO-8859-1 逐字节解码
fn decode_text(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(s) => s.to_string(),
        Err(_) => raw.iter().map(|&b| char::from(b)).collect(),
    }
}

fn is_token_byte(c: u8) -> bool {
    c.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&c)
}

fn token(input: &[u8]) -> IResult<&[u8], &[u8]> {
    take_while1(is_token_byte).parse(input)
}

/// 双引号内的值，允许包含 `;`
fn quoted(input: &[u8]) -> IResult<&[u8], &[u8]> {
    delimited(
        tag(&b"\""[..]),
        take_till(|c: u8| c == b'"'),
        tag(&b"\""[..]),
    )
    .parse(input)
}

fn param_value(input: &[u8]) -> IResult<&[u8], &[u8]> {
    alt((quoted, take_till(|c: u8| c == b';'))).parse(input)
}

/// `; key=value`
fn param(input: &[u8]) -> IResult<&[u8], (&[u8], &[u8])> {
    preceded(
        (space0, tag(&b";"[..]), space0),
        separated_pair(token, (space0, tag(&b"="[..]), space0), param_value),
    )
    .parse(input)
}

/// 类型 + 参数列表，允许结尾多一个 `;`
fn disposition(input: &[u8]) -> IResult<&[u8], (&[u8], Vec<(&[u8], &[u8])>)> {
    all_consuming(terminated(
        (preceded(space0, token), many0(param)),
        (space0, opt(tag(&b";"[..])), space0),
    ))
    .parse(input)
}
