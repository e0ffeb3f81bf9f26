//! Host key algorithms.
//!
//! During the key exchange the server proves its identity by signing the exchange hash with its
//! host key. The algorithms in this module decode the host key and verify that signature.
//!
//! # Supported algorithms
//!
//! - "rsa-sha2-512" ([`RSA_SHA2_512`], uses [`RsaPubkey`])
//! - "rsa-sha2-256" ([`RSA_SHA2_256`], uses [`RsaPubkey`])
//! - "ecdsa-sha2-nistp256" ([`ECDSA_SHA2_NISTP256`], uses [`EcdsaPubkey`])
//! - "ecdsa-sha2-nistp384" ([`ECDSA_SHA2_NISTP384`], uses [`EcdsaPubkey`])
//! - "ecdsa-sha2-nistp521" ([`ECDSA_SHA2_NISTP521`], uses [`EcdsaPubkey`])
//! - "ssh-rsa" ([`SSH_RSA`], uses [`RsaPubkey`])
//! - "ssh-dss" ([`SSH_DSS`], uses [`DssPubkey`])
use base64::Engine as _;
use bytes::Bytes;
use derivative::Derivative;
use std::fmt;
use crate::codec::{PacketDecode, PacketEncode};
use crate::error::{Result, Error};
pub use self::dss::{SSH_DSS, DssPubkey};
pub use self::ecdsa::{ECDSA_SHA2_NISTP256, ECDSA_SHA2_NISTP384, ECDSA_SHA2_NISTP521, EcdsaPubkey};
pub use self::rsa::{RSA_SHA2_512, RSA_SHA2_256, SSH_RSA, RsaPubkey};

mod dss;
mod ecdsa;
mod rsa;

/// Algorithm for verifying signatures made with a host key.
///
/// See the [module documentation][self] for details.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct PubkeyAlgo {
    /// Name of the algorithm.
    pub name: &'static str,
    #[derivative(Debug = "ignore")]
    pub(crate) verify: fn(pubkey: &Pubkey, message: &[u8], signature: Bytes) -> Result<SignatureVerified>,
}

impl PubkeyAlgo {
    /// Verifies the signature blob `signature` of `message` made by `pubkey`.
    ///
    /// Fails with [`Error::Signature`] if the signature is not valid.
    pub fn verify(&self, pubkey: &Pubkey, message: &[u8], signature: Bytes) -> Result<()> {
        (self.verify)(pubkey, message, signature).map(|_| ())
    }
}

/// All host key algorithms that we support, in our default order of preference.
pub fn all() -> &'static [&'static PubkeyAlgo] {
    static ALL: [&PubkeyAlgo; 7] = [
        &RSA_SHA2_512, &RSA_SHA2_256,
        &ECDSA_SHA2_NISTP256, &ECDSA_SHA2_NISTP384, &ECDSA_SHA2_NISTP521,
        &SSH_RSA, &SSH_DSS,
    ];
    &ALL
}

/// Looks up a host key algorithm by its SSH name.
pub fn by_name(name: &str) -> Result<&'static PubkeyAlgo> {
    all().iter().copied()
        .find(|algo| algo.name == name)
        .ok_or_else(|| Error::UnsupportedAlgo(name.into()))
}

/// Public key in one of supported formats.
///
/// This enum is marked as `#[non_exhaustive]`, so we might add new variants without breaking
/// backwards compatibility.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Pubkey {
    /// RSA public key ("ssh-rsa").
    Rsa(RsaPubkey),
    /// ECDSA public key on one of the NIST curves.
    Ecdsa(EcdsaPubkey),
    /// DSA public key ("ssh-dss").
    Dss(DssPubkey),
}

impl Pubkey {
    /// Decode a public key from the SSH wire encoding (RFC 4253, section 6.6 and RFC 5656).
    pub fn decode(blob: Bytes) -> Result<Self> {
        let mut blob = PacketDecode::new(blob);
        let format = blob.get_string()?;
        match format.as_str() {
            "ssh-rsa" => rsa::decode_pubkey(&mut blob).map(Pubkey::Rsa),
            "ssh-dss" => dss::decode_pubkey(&mut blob).map(Pubkey::Dss),
            "ecdsa-sha2-nistp256" | "ecdsa-sha2-nistp384" | "ecdsa-sha2-nistp521" =>
                ecdsa::decode_pubkey(&format, &mut blob).map(Pubkey::Ecdsa),
            _ => {
                log::debug!("unknown pubkey format {:?}", format);
                Err(Error::Decode("unknown public key format"))
            },
        }
    }

    /// Encode a public key into the SSH wire encoding.
    pub fn encode(&self) -> Bytes {
        let mut blob = PacketEncode::new();
        match self {
            Pubkey::Rsa(pubkey) => rsa::encode_pubkey(&mut blob, pubkey),
            Pubkey::Ecdsa(pubkey) => ecdsa::encode_pubkey(&mut blob, pubkey),
            Pubkey::Dss(pubkey) => dss::encode_pubkey(&mut blob, pubkey),
        }
        blob.finish()
    }

    /// Compute the fingerprint of the public key, in the format used by OpenSSH.
    ///
    /// The fingerprint is the SHA-256 digest of the encoded key in unpadded base64, prefixed with
    /// `SHA256:`.
    pub fn fingerprint(&self) -> String {
        use sha2::Digest as _;
        let digest = sha2::Sha256::digest(self.encode());
        format!("SHA256:{}", base64::engine::general_purpose::STANDARD_NO_PAD.encode(digest))
    }
}

impl fmt::Display for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Pubkey::Rsa(pubkey) => fmt::Display::fmt(pubkey, f),
            Pubkey::Ecdsa(pubkey) => fmt::Display::fmt(pubkey, f),
            Pubkey::Dss(pubkey) => fmt::Display::fmt(pubkey, f),
        }
    }
}

/// Witness that a signature was verified.
#[derive(Debug)]
pub(crate) struct SignatureVerified(());

impl SignatureVerified {
    fn assertion() -> Self { Self(()) }
}

/// Decodes a signature blob `string(format) || string(signature)` and checks the format.
fn decode_signature(signature: Bytes, expected_format: &str) -> Result<Bytes> {
    let mut signature = PacketDecode::new(signature);
    if signature.get_string()? != expected_format {
        return Err(Error::Signature)
    }
    signature.get_bytes()
}

fn key_mismatch() -> Error {
    Error::Protocol("public key does not match the signature algorithm")
}
