use std::io::{self, Cursor, Read, Write};

/// In-memory duplex stream: reads come from a scripted buffer, writes are recorded.
pub struct MockStream {
    input: Cursor<Vec<u8>>,
    pub written: Vec<u8>,
    /// Fail every write once this many bytes have been accepted
    pub write_limit: Option<usize>,
}

impl MockStream {
    pub fn new(script: impl Into<Vec<u8>>) -> Self {
        Self {
            input: Cursor::new(script.into()),
            written: Vec::new(),
            write_limit: None,
        }
    }

    /// Concatenate server replies in the order they will be read
    pub fn with_replies(replies: &[&[u8]]) -> Self {
        Self::new(replies.concat())
    }

    pub fn consumed(&self) -> usize {
        self.input.position() as usize
    }

    pub fn remaining(&self) -> usize {
        self.input.get_ref().len() - self.consumed()
    }
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(limit) = self.write_limit {
            if self.written.len() + buf.len() > limit {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock write limit"));
            }
        }
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
