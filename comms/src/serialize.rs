use std::io;

/// Types that can be written as the body of a frame.
pub trait Serialize<'a> {
    /// Appends the serialized representation of `self` to `buf`.
    ///
    /// # Arguments
    /// * `buf` - The frame buffer, already holding the length header.
    ///
    /// # Returns
    /// An optional trailing slice that is written right after `buf` without
    /// being copied into it, or an `io::Error` if `self` can't be encoded.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>>;
}

/// A frame body that was serialized ahead of time.
///
/// Lets a single encoding be fanned out to many senders.
#[derive(Debug, Clone)]
pub struct Encoded(Vec<u8>);

impl Encoded {
    /// Serializes `msg` into an owned frame body.
    ///
    /// # Arguments
    /// * `msg` - A serializable object.
    ///
    /// # Returns
    /// The encoded body or the error raised while serializing `msg`.
    pub fn new<'a, T: Serialize<'a>>(msg: &'a T) -> io::Result<Self> {
        let mut buf = Vec::new();
        let tail = msg.serialize(&mut buf)?;

        if let Some(tail) = tail {
            buf.extend_from_slice(tail);
        }

        Ok(Self(buf))
    }

    /// The size in bytes of the encoded body.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> Serialize<'a> for Encoded {
    fn serialize(&'a self, _buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>> {
        Ok(Some(&self.0))
    }
}
