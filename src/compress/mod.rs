//! Compression algorithms.
//!
//! Compression is applied to the payload of every packet before it is framed and encrypted, and
//! reversed after the packet is decrypted and its MAC is verified.
//!
//! # Supported algorithms
//!
//! - "none" ([`NONE`])
use bytes::Bytes;
use derivative::Derivative;
use std::borrow::Cow;
use crate::{Error, Result};

/// Algorithm for compressing packet payloads.
///
/// See the [module documentation][self] for details.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct CompressAlgo {
    /// Name of the algorithm.
    pub name: &'static str,
    #[derivative(Debug = "ignore")]
    pub(crate) make_compress: fn() -> Box<dyn Compress + Send>,
    #[derivative(Debug = "ignore")]
    pub(crate) make_decompress: fn() -> Box<dyn Decompress + Send>,
}

pub(crate) trait Compress {
    fn compress<'a>(&mut self, payload: &'a [u8]) -> Result<Cow<'a, [u8]>>;
}

pub(crate) trait Decompress {
    fn decompress(&mut self, payload: Bytes) -> Result<Bytes>;
}

/// "none" compression (payloads are sent as they are).
pub static NONE: CompressAlgo = CompressAlgo {
    name: "none",
    make_compress: || Box::new(Identity),
    make_decompress: || Box::new(Identity),
};

#[derive(Debug)]
pub(crate) struct Identity;

impl Compress for Identity {
    fn compress<'a>(&mut self, payload: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        Ok(Cow::Borrowed(payload))
    }
}

impl Decompress for Identity {
    fn decompress(&mut self, payload: Bytes) -> Result<Bytes> {
        Ok(payload)
    }
}

/// All compression algorithms that we support, in our default order of preference.
pub fn all() -> &'static [&'static CompressAlgo] {
    static ALL: [&CompressAlgo; 1] = [&NONE];
    &ALL
}

/// Looks up a compression algorithm by its SSH name.
pub fn by_name(name: &str) -> Result<&'static CompressAlgo> {
    all().iter().copied()
        .find(|algo| algo.name == name)
        .ok_or_else(|| Error::UnsupportedAlgo(name.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_is_identity() {
        let mut compress = (NONE.make_compress)();
        let mut decompress = (NONE.make_decompress)();
        let compressed = compress.compress(b"abc").unwrap();
        assert!(matches!(compressed, Cow::Borrowed(_)));
        let payload = decompress.decompress(Bytes::copy_from_slice(&compressed)).unwrap();
        assert_eq!(payload.as_ref(), b"abc");
    }

    #[test]
    fn test_by_name() {
        assert_eq!(by_name("none").unwrap().name, "none");
        assert!(matches!(by_name("zlib"), Err(Error::UnsupportedAlgo(_))));
    }
}
