// 流式 multipart/form-data 解析模块
//
// - boundary: 分隔符推导与边界扫描（处理跨读取边界的分隔符）
// - header:   分段头部与 Content-Disposition 解析
// - part:     分段（头部 + 正文缓冲 + 滚动 SHA-1）
// - parser:   START/EXPECT_HEADER/EXPECT_PART_DATA/FINISHED 状态机

pub mod boundary;
pub mod header;
pub mod parser;
pub mod part;

pub use boundary::{Boundary, Delimiter, Scan};
pub use header::{ContentDisposition, PartHeaders};
pub use parser::{ParserState, PartHandler, StreamingMultipartParser};
pub use part::Part;
