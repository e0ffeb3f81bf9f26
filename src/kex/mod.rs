//! Key exchange algorithms.
//!
//! The key exchange (kex) establishes the shared secret from which the keys for packet
//! [encryption][crate::cipher] and [authentication][crate::mac] are derived, and produces the
//! exchange hash that the server signs with its host key.
//!
//! The client and the server exchange lists of supported algorithms, and the first algorithm on
//! the client's list that is also supported by the server is used for the connection.
//!
//! # Supported algorithms
//!
//! - "diffie-hellman-group-exchange-sha256" ([`DIFFIE_HELLMAN_GROUP_EXCHANGE_SHA256`])
//! - "diffie-hellman-group-exchange-sha1" ([`DIFFIE_HELLMAN_GROUP_EXCHANGE_SHA1`])
//! - "diffie-hellman-group14-sha1" ([`DIFFIE_HELLMAN_GROUP14_SHA1`])
//! - "diffie-hellman-group1-sha1" ([`DIFFIE_HELLMAN_GROUP1_SHA1`])
use bytes::Bytes;
use derivative::Derivative;
use num_bigint_dig::BigUint;
use std::task::Poll;
use crate::{Error, Result};
use crate::codec::PacketDecode;
use crate::util::CryptoRngCore;
pub use self::dh::{DIFFIE_HELLMAN_GROUP14_SHA1, DIFFIE_HELLMAN_GROUP1_SHA1};
pub use self::gex::{DIFFIE_HELLMAN_GROUP_EXCHANGE_SHA1, DIFFIE_HELLMAN_GROUP_EXCHANGE_SHA256};
pub(crate) use self::derive::{KeyAlgos, SessionKeys};
#[cfg(test)]
pub(crate) use self::dh::Group;

mod derive;
mod dh;
mod gex;

/// Algorithm for key exchange.
///
/// See the [module documentation][self] for details.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct KexAlgo {
    /// Name of the algorithm.
    pub name: &'static str,
    #[derivative(Debug = "ignore")]
    pub(crate) make_kex: fn(params: &KexParams, rng: &mut dyn CryptoRngCore)
        -> Result<Box<dyn Kex + Send>>,
}

/// Tunables of the key exchange that come from the client configuration.
#[derive(Debug, Clone, Copy)]
pub(crate) struct KexParams {
    /// Minimal, preferred and maximal size of the group in bits (RFC 4419).
    pub gex_bits: (u32, u32, u32),
}

#[derive(Debug)]
pub(crate) struct KexInput<'a> {
    pub client_ident: &'a [u8],
    pub server_ident: &'a [u8],
    pub client_kex_init: &'a [u8],
    pub server_kex_init: &'a [u8],
}

pub(crate) struct KexOutput {
    pub shared_secret: BigUint,
    pub exchange_hash: Vec<u8>,
    pub server_pubkey: Bytes,
    pub server_exchange_hash_sign: Bytes,
}

/// A running key exchange, driven by the packets that we receive from the server.
pub(crate) trait Kex {
    fn recv_packet(&mut self, msg_id: u8, payload: &mut PacketDecode) -> Result<()>;
    fn send_packet(&mut self) -> Result<Option<Bytes>>;
    fn poll(&mut self, input: KexInput) -> Poll<Result<KexOutput>>;
    fn compute_hash(&self, data: &[u8]) -> Vec<u8>;
}

/// All key exchange algorithms that we support, in our default order of preference.
pub fn all() -> &'static [&'static KexAlgo] {
    static ALL: [&KexAlgo; 4] = [
        &DIFFIE_HELLMAN_GROUP_EXCHANGE_SHA256,
        &DIFFIE_HELLMAN_GROUP_EXCHANGE_SHA1,
        &DIFFIE_HELLMAN_GROUP14_SHA1,
        &DIFFIE_HELLMAN_GROUP1_SHA1,
    ];
    &ALL
}

/// Looks up a key exchange algorithm by its SSH name.
pub fn by_name(name: &str) -> Result<&'static KexAlgo> {
    all().iter().copied()
        .find(|algo| algo.name == name)
        .ok_or_else(|| Error::UnsupportedAlgo(name.into()))
}

fn compute_hash_sha1(data: &[u8]) -> Vec<u8> {
    use sha1::digest::Digest as _;
    sha1::Sha1::digest(data).to_vec()
}

fn compute_hash_sha256(data: &[u8]) -> Vec<u8> {
    use sha2::digest::Digest as _;
    sha2::Sha256::digest(data).to_vec()
}
