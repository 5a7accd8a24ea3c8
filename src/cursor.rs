//! Bounds-checked little-endian cursor over a borrowed byte slice.
//!
//! This is the single read abstraction for the whole crate: [`crate::mapi`],
//! [`crate::tnef`], and [`crate::lzfu`] all advance through their input via a
//! `Cursor`, never by indexing the slice directly. Every primitive fails with
//! [`ConvertError::TruncatedStream`] if fewer bytes remain than requested,
//! and leaves the cursor's position unchanged on failure.

use crate::error::{ConvertError, ConvertResult};
use zerocopy::{FromBytes, LE, U16, U32};

/// A position into an immutable byte slice.
#[derive(Debug, Clone, Copy)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    /// Wrap `data`, starting at offset 0.
    #[inline]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current read offset.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Number of unread bytes remaining.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// True once every byte has been consumed.
    #[inline]
    pub fn eof(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn require(&self, n: usize) -> ConvertResult<()> {
        if self.remaining() < n {
            return Err(ConvertError::TruncatedStream);
        }
        Ok(())
    }

    /// Read a single byte and advance by one.
    #[inline]
    pub fn read_u8(&mut self) -> ConvertResult<u8> {
        self.require(1)?;
        let b = self.data[self.pos];
        self.pos += 1;
        Ok(b)
    }

    /// Read a little-endian `u16` and advance by two bytes.
    #[inline]
    pub fn read_u16_le(&mut self) -> ConvertResult<u16> {
        self.require(2)?;
        let v = U16::<LE>::read_from_bytes(&self.data[self.pos..self.pos + 2])
            .expect("length checked above")
            .get();
        self.pos += 2;
        Ok(v)
    }

    /// Read a little-endian `u32` and advance by four bytes.
    #[inline]
    pub fn read_u32_le(&mut self) -> ConvertResult<u32> {
        self.require(4)?;
        let v = U32::<LE>::read_from_bytes(&self.data[self.pos..self.pos + 4])
            .expect("length checked above")
            .get();
        self.pos += 4;
        Ok(v)
    }

    /// Borrow the next `n` bytes without copying, and advance past them.
    #[inline]
    pub fn read_bytes(&mut self, n: usize) -> ConvertResult<&'a [u8]> {
        self.require(n)?;
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Advance the cursor by `n` bytes without returning them.
    #[inline]
    pub fn skip(&mut self, n: usize) -> ConvertResult<()> {
        self.require(n)?;
        self.pos += n;
        Ok(())
    }

    /// Peek at the next `n` bytes without advancing the cursor.
    #[inline]
    pub fn peek_bytes(&self, n: usize) -> ConvertResult<&'a [u8]> {
        self.require(n)?;
        Ok(&self.data[self.pos..self.pos + n])
    }
}
