//! Whitespace-separated token parsing shared by the textual formats.

use std::io;

pub(crate) fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Cursor over the whitespace-separated tokens of a record. Every accessor
/// turns a missing or malformed token into an `io::Error` so partially
/// written files surface at the call site instead of half-initializing a
/// structure.
pub(crate) struct Tokens<'a> {
    iter: std::str::SplitWhitespace<'a>,
}

impl<'a> Tokens<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            iter: text.split_whitespace(),
        }
    }

    fn next_str(&mut self) -> io::Result<&'a str> {
        self.iter
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "truncated record"))
    }

    pub fn next_i32(&mut self) -> io::Result<i32> {
        let tok = self.next_str()?;
        tok.parse()
            .map_err(|_| invalid(format!("expected integer, got '{tok}'")))
    }

    pub fn next_u32(&mut self) -> io::Result<u32> {
        let tok = self.next_str()?;
        tok.parse()
            .map_err(|_| invalid(format!("expected unsigned integer, got '{tok}'")))
    }

    pub fn next_u64(&mut self) -> io::Result<u64> {
        let tok = self.next_str()?;
        tok.parse()
            .map_err(|_| invalid(format!("expected unsigned integer, got '{tok}'")))
    }

    pub fn next_usize(&mut self) -> io::Result<usize> {
        let tok = self.next_str()?;
        tok.parse()
            .map_err(|_| invalid(format!("expected count, got '{tok}'")))
    }
}
