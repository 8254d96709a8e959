//! Length-prefixed primitives shared by the binary message bodies.

use std::io;

type SizeType = u32;
const SIZE_TYPE_SIZE: usize = size_of::<SizeType>();

/// Appends `n` as a big endian size prefix.
pub(crate) fn put_size(buf: &mut Vec<u8>, n: usize) -> io::Result<()> {
    let n = SizeType::try_from(n).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("length {n} doesn't fit in a {SIZE_TYPE_SIZE} bytes prefix"),
        )
    })?;

    buf.extend_from_slice(&n.to_be_bytes());
    Ok(())
}

/// Appends `bytes` preceded by its length.
pub(crate) fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) -> io::Result<()> {
    put_size(buf, bytes.len())?;
    buf.extend_from_slice(bytes);
    Ok(())
}

/// A forward only reader over a borrowed body.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> io::Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("wanted {n} bytes but only {} remain", self.buf.len()),
            ));
        }

        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    pub(crate) fn size(&mut self) -> io::Result<usize> {
        let raw = self.take(SIZE_TYPE_SIZE)?;
        let mut bytes = [0; SIZE_TYPE_SIZE];
        bytes.copy_from_slice(raw);
        Ok(SizeType::from_be_bytes(bytes) as usize)
    }

    pub(crate) fn u64(&mut self) -> io::Result<u64> {
        let raw = self.take(size_of::<u64>())?;
        let mut bytes = [0; size_of::<u64>()];
        bytes.copy_from_slice(raw);
        Ok(u64::from_be_bytes(bytes))
    }

    pub(crate) fn bytes(&mut self) -> io::Result<&'a [u8]> {
        let n = self.size()?;
        self.take(n)
    }

    pub(crate) fn str(&mut self) -> io::Result<&'a str> {
        let bytes = self.bytes()?;
        std::str::from_utf8(bytes).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }

    /// Fails if there are leftover bytes.
    pub(crate) fn finish(self) -> io::Result<()> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} trailing bytes after message body", self.buf.len()),
            ))
        }
    }
}
