//! HTTP/1.1 response head parsing and body decoding (chunked / Content-Length / EOF)

use std::io::{self, Read};

/// Upper bound on the response head
const MAX_HEAD_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferKind {
    Chunked,
    Length,
    Eof,
}

/// Fully read response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    pub status: u16,
    pub reason: String,
    /// Header names lower-cased, in arrival order
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ParsedResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Incremental response reader over any byte stream
pub struct ResponseReader<R: Read> {
    inner: R,
    inbuf: Vec<u8>,
    decoded: Vec<u8>,
    transfer: Option<TransferKind>,
    chunk_remaining: usize,
    reading_chunk_size: bool,
    trailer_mode: bool,
    content_remaining: usize,
    eof: bool,
}

impl<R: Read> ResponseReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            inbuf: Vec::new(),
            decoded: Vec::new(),
            transfer: None,
            chunk_remaining: 0,
            reading_chunk_size: true,
            trailer_mode: false,
            content_remaining: 0,
            eof: false,
        }
    }

    /// Read the head and the whole body. `head_request` suppresses the body.
    pub fn read_response(mut self, head_request: bool) -> io::Result<ParsedResponse> {
        let (status, reason, headers) = self.parse_head()?;

        let no_body = head_request || (100..200).contains(&status) || status == 204 || status == 304;
        if no_body {
            return Ok(ParsedResponse {
                status,
                reason,
                headers,
                body: Vec::new(),
            });
        }

        let is_chunked = headers.iter().any(|(k, v)| {
            k == "transfer-encoding" && v.to_ascii_lowercase().contains("chunked")
        });
        let content_len = headers
            .iter()
            .find(|(k, _)| k == "content-length")
            .map(|(_, v)| v.parse::<usize>().map_err(|_| invalid(format!("invalid content-length: {v}"))))
            .transpose()?;

        if is_chunked {
            self.transfer = Some(TransferKind::Chunked);
        } else if let Some(n) = content_len {
            self.transfer = Some(TransferKind::Length);
            self.content_remaining = n;
        } else {
            self.transfer = Some(TransferKind::Eof);
        }
        tracing::debug!(
            target = "http",
            status,
            chunked = is_chunked,
            content_length = ?content_len,
            "http response parsed"
        );

        while !self.eof {
            let before = self.decoded.len();
            self.fill_decoded()?;
            if !self.eof && self.decoded.len() == before && self.inbuf.is_empty() {
                let n = self.read_more()?;
                if n == 0 {
                    self.on_early_eof()?;
                }
            }
        }

        Ok(ParsedResponse {
            status,
            reason,
            headers,
            body: std::mem::take(&mut self.decoded),
        })
    }

    fn parse_head(&mut self) -> io::Result<(u16, String, Vec<(String, String)>)> {
        let mut header_buf: Vec<u8> = Vec::new();
        let pos = loop {
            if let Some(pos) = find_double_crlf(&header_buf) {
                break pos;
            }
            if header_buf.len() > MAX_HEAD_BYTES {
                return Err(invalid("response head too large"));
            }
            let mut tmp = [0u8; 4096];
            let n = self.inner.read(&mut tmp)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "unexpected eof in headers",
                ));
            }
            header_buf.extend_from_slice(&tmp[..n]);
        };
        self.inbuf.extend_from_slice(&header_buf[pos..]);

        let text = std::str::from_utf8(&header_buf[..pos - 4])
            .map_err(|_| invalid("response head is not valid UTF-8"))?;
        let mut lines = text.split("\r\n");
        let status_line = lines.next().unwrap_or_default();
        let mut parts = status_line.splitn(3, ' ');
        if !parts.next().unwrap_or_default().starts_with("HTTP/") {
            return Err(invalid(format!("invalid status line: {status_line}")));
        }
        let status = parts
            .next()
            .and_then(|s| s.parse::<u16>().ok())
            .ok_or_else(|| invalid(format!("invalid status line: {status_line}")))?;
        let reason = parts.next().unwrap_or_default().trim().to_string();

        let headers = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
            .collect();
        Ok((status, reason, headers))
    }

    fn on_early_eof(&mut self) -> io::Result<()> {
        match self.transfer {
            Some(TransferKind::Eof) | None => {
                self.eof = true;
                Ok(())
            }
            Some(TransferKind::Length) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("unexpected eof in body, {} bytes missing", self.content_remaining),
            )),
            Some(TransferKind::Chunked) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "unexpected eof in chunked body",
            )),
        }
    }

    fn fill_decoded(&mut self) -> io::Result<()> {
        if self.eof {
            return Ok(());
        }
        match self.transfer {
            Some(TransferKind::Chunked) => self.decode_chunked(),
            Some(TransferKind::Length) => self.decode_content_length(),
            Some(TransferKind::Eof) => self.decode_to_eof(),
            None => Ok(()),
        }
    }

    fn read_more(&mut self) -> io::Result<usize> {
        let mut tmp = [0u8; 8192];
        let n = match self.inner.read(&mut tmp) {
            Ok(n) => n,
            // rustls 在对端未发送 close_notify 时报告 UnexpectedEof
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => 0,
            Err(e) => return Err(e),
        };
        if n > 0 {
            self.inbuf.extend_from_slice(&tmp[..n]);
        }
        Ok(n)
    }

    fn decode_chunked(&mut self) -> io::Result<()> {
        loop {
            if self.trailer_mode {
                // 无 trailer 时紧跟一个 CRLF
                if self.inbuf.starts_with(b"\r\n") {
                    self.inbuf.drain(..2);
                    self.eof = true;
                    return Ok(());
                }
                if let Some(pos) = find_double_crlf(&self.inbuf) {
                    self.inbuf.drain(..pos);
                    self.eof = true;
                    return Ok(());
                }
                if self.read_more()? == 0 {
                    self.eof = true;
                    return Ok(());
                }
                continue;
            }
            if self.reading_chunk_size {
                if let Some(idx) = find_crlf(&self.inbuf) {
                    let line = self.inbuf.drain(..idx + 2).collect::<Vec<u8>>();
                    let line_no_crlf = &line[..line.len() - 2];
                    let hex_part = line_no_crlf.split(|&b| b == b';').next().unwrap_or(line_no_crlf);
                    let hex_str = std::str::from_utf8(hex_part)
                        .map_err(|_| invalid("invalid chunk size line"))?;
                    let size = usize::from_str_radix(hex_str.trim(), 16)
                        .map_err(|_| invalid(format!("invalid chunk size: {}", hex_str.trim())))?;
                    self.chunk_remaining = size;
                    self.reading_chunk_size = false;
                    if size == 0 {
                        self.trailer_mode = true;
                    }
                    continue;
                }
                if self.read_more()? == 0 {
                    return self.on_early_eof();
                }
                continue;
            }
            if self.chunk_remaining > 0 {
                if self.inbuf.is_empty() && self.read_more()? == 0 {
                    return self.on_early_eof();
                }
                let take = self.chunk_remaining.min(self.inbuf.len());
                self.decoded.extend(self.inbuf.drain(..take));
                self.chunk_remaining -= take;
                continue;
            }
            // 数据块之后的 CRLF
            while self.inbuf.len() < 2 {
                if self.read_more()? == 0 {
                    return self.on_early_eof();
                }
            }
            if &self.inbuf[..2] != b"\r\n" {
                return Err(invalid("missing CRLF after chunk data"));
            }
            self.inbuf.drain(..2);
            self.reading_chunk_size = true;
        }
    }

    fn decode_content_length(&mut self) -> io::Result<()> {
        if self.content_remaining == 0 {
            self.eof = true;
            return Ok(());
        }
        if self.inbuf.is_empty() && self.read_more()? == 0 {
            return self.on_early_eof();
        }
        let take = self.content_remaining.min(self.inbuf.len());
        self.decoded.extend(self.inbuf.drain(..take));
        self.content_remaining -= take;
        if self.content_remaining == 0 {
            self.eof = true;
        }
        Ok(())
    }

    fn decode_to_eof(&mut self) -> io::Result<()> {
        if self.inbuf.is_empty() && self.read_more()? == 0 {
            self.eof = true;
            return Ok(());
        }
        self.decoded.append(&mut self.inbuf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// 每次最多返回 n 字节，模拟分片到达
    struct Trickle {
        data: Cursor<Vec<u8>>,
        step: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.step);
            self.data.read(&mut buf[..n])
        }
    }

    fn parse(raw: &[u8]) -> io::Result<ParsedResponse> {
        ResponseReader::new(Cursor::new(raw.to_vec())).read_response(false)
    }

    #[test]
    fn test_content_length_body() {
        let r = parse(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nX-A: b\r\n\r\nhelloEXTRA").unwrap();
        assert_eq!(r.status, 200);
        assert_eq!(r.reason, "OK");
        assert_eq!(r.body, b"hello");
        assert_eq!(r.header("X-A"), Some("b"));
    }

    #[test]
    fn test_chunked_body_with_extension_and_trailer() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4;ext=1\r\nWiki\r\n5\r\npedia\r\n0\r\nX-Trailer: y\r\n\r\n";
        assert_eq!(parse(raw).unwrap().body, b"Wikipedia");
    }

    #[test]
    fn test_chunked_body_in_small_reads() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\na\r\n0123456789\r\n3\r\nabc\r\n0\r\n\r\n";
        let reader = Trickle {
            data: Cursor::new(raw.to_vec()),
            step: 3,
        };
        let r = ResponseReader::new(reader).read_response(false).unwrap();
        assert_eq!(r.body, b"0123456789abc");
    }

    #[test]
    fn test_read_to_eof() {
        let r = parse(b"HTTP/1.0 200 OK\r\n\r\nuntil close").unwrap();
        assert_eq!(r.body, b"until close");
    }

    #[test]
    fn test_no_body_statuses() {
        let r = parse(b"HTTP/1.1 204 No Content\r\nContent-Length: 10\r\n\r\n").unwrap();
        assert!(r.body.is_empty());
        let r = ResponseReader::new(Cursor::new(b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\n".to_vec()))
            .read_response(true)
            .unwrap();
        assert!(r.body.is_empty());
    }

    #[test]
    fn test_truncated_body_is_error() {
        let err = parse(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        let err = parse(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nab").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_malformed_heads() {
        assert_eq!(parse(b"HTTP/1.1 200 OK\r\n").unwrap_err().kind(), io::ErrorKind::UnexpectedEof);
        assert_eq!(parse(b"SSH-2.0\r\n\r\n").unwrap_err().kind(), io::ErrorKind::InvalidData);
        assert!(parse(b"HTTP/1.1 200 OK\r\nContent-Length: x\r\n\r\n").is_err());
    }
}
