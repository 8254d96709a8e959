use std::io;

/// Types that can be read back from the body of a frame.
///
/// The returned value may borrow from `buf`.
pub trait Deserialize<'a>: Sized {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self>;
}
