use digest::{Digest, FixedOutputReset, Mac as _};
use digest::core_api::BlockSizeUser;
use hmac::SimpleHmac;
use crate::{Error, Result};
use super::{MacAlgo, Mac, MacVerified};

/// "hmac-sha2-512" MAC from RFC 6668.
pub static HMAC_SHA2_512: MacAlgo = MacAlgo {
    name: "hmac-sha2-512",
    tag_len: 64,
    key_len: 64,
    make_mac: |key| Ok(Box::new(Hmac::<sha2::Sha512>::new(key, 64)?)),
};

/// "hmac-sha2-256" MAC from RFC 6668.
pub static HMAC_SHA2_256: MacAlgo = MacAlgo {
    name: "hmac-sha2-256",
    tag_len: 32,
    key_len: 32,
    make_mac: |key| Ok(Box::new(Hmac::<sha2::Sha256>::new(key, 32)?)),
};

/// "hmac-sha1-96" MAC from RFC 4253 (first 96 bits of HMAC-SHA1).
pub static HMAC_SHA1_96: MacAlgo = MacAlgo {
    name: "hmac-sha1-96",
    tag_len: 12,
    key_len: 20,
    make_mac: |key| Ok(Box::new(Hmac::<sha1::Sha1>::new(key, 12)?)),
};

/// "hmac-sha1" MAC from RFC 4253.
pub static HMAC_SHA1: MacAlgo = MacAlgo {
    name: "hmac-sha1",
    tag_len: 20,
    key_len: 20,
    make_mac: |key| Ok(Box::new(Hmac::<sha1::Sha1>::new(key, 20)?)),
};

struct Hmac<D: Digest + BlockSizeUser> {
    proto: SimpleHmac<D>,
    tag_len: usize,
}

impl<D: Digest + BlockSizeUser + FixedOutputReset + Clone> Hmac<D> {
    fn new(key: &[u8], tag_len: usize) -> Result<Self> {
        let proto = <SimpleHmac<D> as digest::KeyInit>::new_from_slice(key)
            .map_err(|_| Error::Crypto("invalid hmac key"))?;
        Ok(Self { proto, tag_len })
    }

    fn compute(&self, packet_seq: u32, data: &[u8]) -> SimpleHmac<D> {
        let mut hmac = self.proto.clone();
        hmac.update(&packet_seq.to_be_bytes());
        hmac.update(data);
        hmac
    }
}

impl<D: Digest + BlockSizeUser + FixedOutputReset + Clone> Mac for Hmac<D> {
    fn sign(&mut self, packet_seq: u32, data: &[u8], tag: &mut [u8]) {
        let output = self.compute(packet_seq, data).finalize().into_bytes();
        tag.copy_from_slice(&output[..self.tag_len]);
    }

    fn verify(&mut self, packet_seq: u32, data: &[u8], tag: &[u8]) -> Result<MacVerified> {
        if tag.len() != self.tag_len {
            return Err(Error::Mac)
        }
        match self.compute(packet_seq, data).verify_truncated_left(tag) {
            Ok(()) => Ok(MacVerified::assertion()),
            Err(_) => Err(Error::Mac),
        }
    }
}
