//! Encryption and decryption algorithms.
//!
//! A cipher provides **confidentiality** of the packets exchanged over SSH. Each direction of the
//! connection uses its own cipher instance, keyed with the keys derived from the key exchange.
//!
//! The client and the server exchange lists of supported algorithms, and the first algorithm on
//! the client's list that is also supported by the server is used for the connection.
//!
//! # Supported algorithms
//!
//! - "aes256-ctr" ([`AES256_CTR`])
//! - "aes192-ctr" ([`AES192_CTR`])
//! - "aes128-ctr" ([`AES128_CTR`])
//! - "aes256-cbc" ([`AES256_CBC`])
//! - "aes192-cbc" ([`AES192_CBC`])
//! - "aes128-cbc" ([`AES128_CBC`])
//! - "3des-cbc" ([`TDES_CBC`])
//! - "none" ([`NONE`])
use derivative::Derivative;
use crate::{Error, Result};
pub use self::block::{AES128_CBC, AES192_CBC, AES256_CBC, TDES_CBC};
pub use self::none::NONE;
pub use self::stream::{AES128_CTR, AES192_CTR, AES256_CTR};
pub(crate) use self::none::Identity;

mod block;
mod none;
mod stream;

/// Algorithm for encrypting and decrypting packets.
///
/// See the [module documentation][self] for details.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct CipherAlgo {
    /// Name of the algorithm.
    pub name: &'static str,
    /// Length of the cipher block in bytes; packets are always padded to a multiple of this.
    pub block_len: usize,
    /// Length of the key in bytes.
    pub key_len: usize,
    /// Length of the initialization vector in bytes.
    pub iv_len: usize,
    #[derivative(Debug = "ignore")]
    pub(crate) make_encrypt: fn(key: &[u8], iv: &[u8]) -> Result<Box<dyn Encrypt + Send>>,
    #[derivative(Debug = "ignore")]
    pub(crate) make_decrypt: fn(key: &[u8], iv: &[u8]) -> Result<Box<dyn Decrypt + Send>>,
}

/// Encrypts a sequence of whole blocks in place, carrying its state from call to call.
pub(crate) trait Encrypt {
    fn encrypt(&mut self, data: &mut [u8]);
}

/// Decrypts a sequence of whole blocks in place, carrying its state from call to call.
pub(crate) trait Decrypt {
    fn decrypt(&mut self, data: &mut [u8]);
}

/// All ciphers that we support, in our default order of preference.
///
/// `none` is not included, it must be enabled explicitly.
pub fn all() -> &'static [&'static CipherAlgo] {
    static ALL: [&CipherAlgo; 7] = [&AES256_CTR, &AES192_CTR, &AES128_CTR, &AES256_CBC, &AES192_CBC, &AES128_CBC, &TDES_CBC];
    &ALL
}

/// Looks up a cipher by its SSH name.
pub fn by_name(name: &str) -> Result<&'static CipherAlgo> {
    all().iter().copied()
        .chain(std::iter::once(&NONE))
        .find(|algo| algo.name == name)
        .ok_or_else(|| Error::UnsupportedAlgo(name.into()))
}
