//! Message authentication algorithms.
//!
//! A MAC provides **integrity** of the packets exchanged over SSH: every packet carries a tag
//! computed over its sequence number and plaintext, so that the attacker cannot modify, reorder
//! or drop packets without being noticed.
//!
//! The client and the server exchange lists of supported algorithms, and the first algorithm on
//! the client's list that is also supported by the server is used for the connection.
//!
//! # Supported algorithms
//!
//! - "hmac-sha2-512" ([`HMAC_SHA2_512`])
//! - "hmac-sha2-256" ([`HMAC_SHA2_256`])
//! - "hmac-sha1-96" ([`HMAC_SHA1_96`])
//! - "hmac-sha1" ([`HMAC_SHA1`])
//! - "none" ([`NONE`])
use derivative::Derivative;
use crate::{Error, Result};
pub use self::hmac::{HMAC_SHA2_512, HMAC_SHA2_256, HMAC_SHA1_96, HMAC_SHA1};
pub use self::none::NONE;
pub(crate) use self::none::Empty;

mod hmac;
mod none;

/// Algorithm for authenticating packets.
///
/// See the [module documentation][self] for details.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct MacAlgo {
    /// Name of the algorithm.
    pub name: &'static str,
    /// Length of the tag appended to every packet.
    pub tag_len: usize,
    /// Length of the integrity key.
    pub key_len: usize,
    #[derivative(Debug = "ignore")]
    pub(crate) make_mac: fn(key: &[u8]) -> Result<Box<dyn Mac + Send>>,
}

pub(crate) trait Mac {
    fn sign(&mut self, packet_seq: u32, data: &[u8], tag: &mut [u8]);
    fn verify(&mut self, packet_seq: u32, data: &[u8], tag: &[u8]) -> Result<MacVerified>;
}

/// Witness that a packet passed MAC verification.
#[derive(Debug)]
pub(crate) struct MacVerified(());

impl MacVerified {
    pub fn assertion() -> Self {
        Self(())
    }
}

/// All MACs that we support, in our default order of preference.
///
/// `none` is not included, it must be enabled explicitly.
pub fn all() -> &'static [&'static MacAlgo] {
    static ALL: [&MacAlgo; 4] = [&HMAC_SHA2_512, &HMAC_SHA2_256, &HMAC_SHA1_96, &HMAC_SHA1];
    &ALL
}

/// Looks up a MAC by its SSH name.
pub fn by_name(name: &str) -> Result<&'static MacAlgo> {
    all().iter().copied()
        .chain(std::iter::once(&NONE))
        .find(|algo| algo.name == name)
        .ok_or_else(|| Error::UnsupportedAlgo(name.into()))
}
