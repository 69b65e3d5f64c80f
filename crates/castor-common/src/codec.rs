//! Key and value serialisation traits.
//!
//! The B+-tree, the page codec, and the WAL all agree on how keys and
//! values turn into bytes through these traits. Integer keys are
//! fixed-width little-endian; string keys are u32-length-prefixed. Values
//! are fixed-width so a leaf's data buffer is always
//! `keys.len() * V::SIZE` bytes.

use bytes::{Buf, BufMut, BytesMut};
use std::fmt;

use crate::error::{CastorError, CastorResult};

/// Serialisation of B+-tree keys.
///
/// Implementations must be self-delimiting: `decode` consumes exactly the
/// bytes `encode` produced.
pub trait KeyCodec: Ord + Clone + fmt::Debug + Send + Sync + 'static {
    /// Appends the encoded key to `buf`.
    fn encode(&self, buf: &mut BytesMut);

    /// Decodes a key from the front of `buf`, advancing it.
    fn decode(buf: &mut &[u8]) -> CastorResult<Self>;

    /// Returns the encoded length in bytes.
    fn encoded_len(&self) -> usize;

    /// Encodes the key into a fresh buffer.
    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.to_vec()
    }
}

macro_rules! impl_key_codec_int {
    ($ty:ty, $put:ident, $get:ident, $size:expr) => {
        impl KeyCodec for $ty {
            fn encode(&self, buf: &mut BytesMut) {
                buf.$put(*self);
            }

            fn decode(buf: &mut &[u8]) -> CastorResult<Self> {
                if buf.remaining() < $size {
                    return Err(CastorError::corruption(concat!(
                        "truncated ",
                        stringify!($ty),
                        " key"
                    )));
                }
                Ok(buf.$get())
            }

            fn encoded_len(&self) -> usize {
                $size
            }
        }
    };
}

impl_key_codec_int!(u32, put_u32_le, get_u32_le, 4);
impl_key_codec_int!(u64, put_u64_le, get_u64_le, 8);
impl_key_codec_int!(i64, put_i64_le, get_i64_le, 8);

impl KeyCodec for String {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.len() as u32);
        buf.put_slice(self.as_bytes());
    }

    fn decode(buf: &mut &[u8]) -> CastorResult<Self> {
        if buf.remaining() < 4 {
            return Err(CastorError::corruption("truncated string key length"));
        }
        let len = buf.get_u32_le() as usize;
        if buf.remaining() < len {
            return Err(CastorError::corruption("string key exceeds buffer"));
        }
        let bytes = &buf[..len];
        let key = std::str::from_utf8(bytes)
            .map_err(|_| CastorError::corruption("string key is not valid UTF-8"))?
            .to_owned();
        buf.advance(len);
        Ok(key)
    }

    fn encoded_len(&self) -> usize {
        4 + self.len()
    }
}

/// Serialisation of fixed-width B+-tree values.
pub trait ValueCodec: Clone + fmt::Debug + Send + Sync + 'static {
    /// Width of the encoded value in bytes.
    const SIZE: usize;

    /// Writes the value into `out`, which is exactly `SIZE` bytes long.
    fn write_to(&self, out: &mut [u8]);

    /// Reads a value from `bytes`, which is exactly `SIZE` bytes long.
    fn read_from(bytes: &[u8]) -> CastorResult<Self>;

    /// Encodes the value into a fresh buffer.
    fn to_vec(&self) -> Vec<u8> {
        let mut out = vec![0u8; Self::SIZE];
        self.write_to(&mut out);
        out
    }
}

impl ValueCodec for u64 {
    const SIZE: usize = 8;

    fn write_to(&self, out: &mut [u8]) {
        out.copy_from_slice(&self.to_le_bytes());
    }

    fn read_from(bytes: &[u8]) -> CastorResult<Self> {
        if bytes.len() != Self::SIZE {
            return Err(CastorError::corruption("u64 value slot has wrong width"));
        }
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }
}

impl ValueCodec for i64 {
    const SIZE: usize = 8;

    fn write_to(&self, out: &mut [u8]) {
        out.copy_from_slice(&self.to_le_bytes());
    }

    fn read_from(bytes: &[u8]) -> CastorResult<Self> {
        if bytes.len() != Self::SIZE {
            return Err(CastorError::corruption("i64 value slot has wrong width"));
        }
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(i64::from_le_bytes(raw))
    }
}

/// A fixed-width byte blob value.
///
/// Text shorter than `N` is NUL-padded; longer input is rejected. This is
/// the value type the CLI uses (`FixedBytes<16>`).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FixedBytes<const N: usize>([u8; N]);

impl<const N: usize> FixedBytes<N> {
    /// Creates a value from raw bytes.
    #[must_use]
    pub const fn new(bytes: [u8; N]) -> Self {
        Self(bytes)
    }

    /// Creates a value from text, padding with NULs.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the text is longer than `N` bytes.
    pub fn from_text(text: &str) -> CastorResult<Self> {
        if text.len() > N {
            return Err(CastorError::invalid_argument(format!(
                "value '{text}' exceeds {N} bytes"
            )));
        }
        let mut raw = [0u8; N];
        raw[..text.len()].copy_from_slice(text.as_bytes());
        Ok(Self(raw))
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }

    /// Renders the value as text, trimming trailing NUL padding.
    #[must_use]
    pub fn as_text(&self) -> String {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(N);
        String::from_utf8_lossy(&self.0[..end]).into_owned()
    }
}

impl<const N: usize> fmt::Debug for FixedBytes<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FixedBytes({:?})", self.as_text())
    }
}

impl<const N: usize> fmt::Display for FixedBytes<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_text())
    }
}

impl<const N: usize> ValueCodec for FixedBytes<N> {
    const SIZE: usize = N;

    fn write_to(&self, out: &mut [u8]) {
        out.copy_from_slice(&self.0);
    }

    fn read_from(bytes: &[u8]) -> CastorResult<Self> {
        if bytes.len() != N {
            return Err(CastorError::corruption("fixed value slot has wrong width"));
        }
        let mut raw = [0u8; N];
        raw.copy_from_slice(bytes);
        Ok(Self(raw))
    }
}
