use bytes::Bytes;
use rsa::Pkcs1v15Sign;
use rsa::traits::PublicKeyParts as _;
use digest::Digest as _;
use std::fmt;
use crate::codec::{PacketDecode, PacketEncode};
use crate::error::{Result, Error};
use super::{PubkeyAlgo, Pubkey, SignatureVerified, decode_signature, key_mismatch};

/// "ssh-rsa" algorithm from RFC 4253 (RSA with SHA-1).
pub static SSH_RSA: PubkeyAlgo = PubkeyAlgo {
    name: "ssh-rsa",
    verify: |pubkey, message, signature| verify(pubkey, signature, "ssh-rsa",
        Pkcs1v15Sign::new::<sha1::Sha1>(), &sha1::Sha1::digest(message)),
};

/// "rsa-sha2-256" algorithm from RFC 8332.
pub static RSA_SHA2_256: PubkeyAlgo = PubkeyAlgo {
    name: "rsa-sha2-256",
    verify: |pubkey, message, signature| verify(pubkey, signature, "rsa-sha2-256",
        Pkcs1v15Sign::new::<sha2::Sha256>(), &sha2::Sha256::digest(message)),
};

/// "rsa-sha2-512" algorithm from RFC 8332.
pub static RSA_SHA2_512: PubkeyAlgo = PubkeyAlgo {
    name: "rsa-sha2-512",
    verify: |pubkey, message, signature| verify(pubkey, signature, "rsa-sha2-512",
        Pkcs1v15Sign::new::<sha2::Sha512>(), &sha2::Sha512::digest(message)),
};

/// RSA public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaPubkey {
    pubkey: rsa::RsaPublicKey,
}

impl RsaPubkey {
    /// Wraps an RSA public key.
    pub fn new(pubkey: rsa::RsaPublicKey) -> RsaPubkey {
        RsaPubkey { pubkey }
    }
}

fn verify(
    pubkey: &Pubkey,
    signature: Bytes,
    format: &str,
    padding: Pkcs1v15Sign,
    hashed: &[u8],
) -> Result<SignatureVerified> {
    let Pubkey::Rsa(pubkey) = pubkey else { return Err(key_mismatch()) };
    let signature = decode_signature(signature, format)?;
    match pubkey.pubkey.verify(padding, hashed, &signature) {
        Ok(_) => Ok(SignatureVerified::assertion()),
        Err(_) => Err(Error::Signature),
    }
}

pub(super) fn decode_pubkey(blob: &mut PacketDecode) -> Result<RsaPubkey> {
    // RFC 4253, section 6.6
    let e = blob.get_biguint()?;
    let n = blob.get_biguint()?;
    let pubkey = rsa::RsaPublicKey::new(n, e)
        .map_err(|_| Error::Decode("decoded ssh-rsa pubkey is invalid"))?;
    Ok(RsaPubkey { pubkey })
}

pub(super) fn encode_pubkey(blob: &mut PacketEncode, pubkey: &RsaPubkey) {
    blob.put_str("ssh-rsa");
    blob.put_biguint(pubkey.pubkey.e());
    blob.put_biguint(pubkey.pubkey.n());
}

impl fmt::Display for RsaPubkey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "rsa {} bits, e {}", self.pubkey.n().bits(), self.pubkey.e())
    }
}
