use bytes::Bytes;
use digest::Digest as _;
use dsa::{Components, VerifyingKey};
use dsa::signature::hazmat::PrehashVerifier as _;
use num_bigint_dig::BigUint;
use std::fmt;
use crate::codec::{PacketDecode, PacketEncode};
use crate::error::{Result, Error};
use super::{PubkeyAlgo, Pubkey, SignatureVerified, decode_signature, key_mismatch};

/// "ssh-dss" algorithm from RFC 4253 (DSA with SHA-1).
///
/// This algorithm is considered insecure and is supported only to talk to old servers.
pub static SSH_DSS: PubkeyAlgo = PubkeyAlgo {
    name: "ssh-dss",
    verify,
};

/// DSA public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DssPubkey {
    p: BigUint,
    q: BigUint,
    g: BigUint,
    y: BigUint,
}

impl DssPubkey {
    fn verifying_key(&self) -> Option<VerifyingKey> {
        let components = Components::from_components(
            self.p.clone(), self.q.clone(), self.g.clone()).ok()?;
        VerifyingKey::from_components(components, self.y.clone()).ok()
    }
}

fn verify(pubkey: &Pubkey, message: &[u8], signature: Bytes) -> Result<SignatureVerified> {
    let Pubkey::Dss(pubkey) = pubkey else { return Err(key_mismatch()) };
    let signature = decode_signature(signature, "ssh-dss")?;

    // RFC 4253, section 6.6: `r` and `s` are 160-bit integers, without lengths or padding
    if signature.len() != 40 {
        return Err(Error::Signature)
    }
    let r = BigUint::from_bytes_be(&signature[..20]);
    let s = BigUint::from_bytes_be(&signature[20..]);
    let signature = dsa::Signature::from_components(r, s)
        .map_err(|_| Error::Signature)?;

    let verifying_key = pubkey.verifying_key().ok_or(Error::Signature)?;
    let hash = sha1::Sha1::digest(message);
    verifying_key.verify_prehash(&hash, &signature)
        .map_err(|_| Error::Signature)?;
    Ok(SignatureVerified::assertion())
}

pub(super) fn decode_pubkey(blob: &mut PacketDecode) -> Result<DssPubkey> {
    // RFC 4253, section 6.6
    let pubkey = DssPubkey {
        p: blob.get_biguint()?,
        q: blob.get_biguint()?,
        g: blob.get_biguint()?,
        y: blob.get_biguint()?,
    };
    if pubkey.verifying_key().is_none() {
        return Err(Error::Decode("decoded ssh-dss pubkey is invalid"))
    }
    Ok(pubkey)
}

pub(super) fn encode_pubkey(blob: &mut PacketEncode, pubkey: &DssPubkey) {
    blob.put_str("ssh-dss");
    blob.put_biguint(&pubkey.p);
    blob.put_biguint(&pubkey.q);
    blob.put_biguint(&pubkey.g);
    blob.put_biguint(&pubkey.y);
}

impl fmt::Display for DssPubkey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "dss {} bits", self.p.bits())
    }
}

#[cfg(test)]
mod tests {
    use num_bigint_dig::ModInverse as _;
    use super::*;

    // toy group: q = 251 divides p - 1 = 502, g = 2^2 has order q
    fn toy_key() -> (DssPubkey, BigUint) {
        let p = BigUint::from(503u32);
        let q = BigUint::from(251u32);
        let g = BigUint::from(4u32);
        let x = BigUint::from(7u32);
        let y = g.modpow(&x, &p);
        (DssPubkey { p, q, g, y }, x)
    }

    fn sign(key: &DssPubkey, x: &BigUint, message: &[u8]) -> Bytes {
        // with an 8-bit `q`, only the first byte of the hash is used
        let hash = sha1::Sha1::digest(message);
        let z = BigUint::from(hash[0]);

        for k in 1..251u32 {
            let k = BigUint::from(k);
            let r = key.g.modpow(&k, &key.p) % &key.q;
            let k_inv = k.mod_inverse(&key.q).unwrap().to_biguint().unwrap();
            let s = (k_inv * (&z + x * &r)) % &key.q;
            if r == BigUint::from(0u32) || s == BigUint::from(0u32) {
                continue
            }

            let mut raw = vec![0; 40];
            let r = r.to_bytes_be();
            let s = s.to_bytes_be();
            raw[20 - r.len()..20].copy_from_slice(&r);
            raw[40 - s.len()..].copy_from_slice(&s);

            let mut blob = PacketEncode::new();
            blob.put_str("ssh-dss");
            blob.put_bytes(&raw);
            return blob.finish()
        }
        panic!("could not find a usable nonce")
    }

    #[test]
    fn test_verify_toy_signature() {
        let (key, x) = toy_key();
        let pubkey = Pubkey::Dss(key.clone());
        let signature = sign(&key, &x, b"exchange hash");
        assert!(SSH_DSS.verify(&pubkey, b"exchange hash", signature).is_ok());
    }

    #[test]
    fn test_reject_bad_signatures() {
        let (key, _) = toy_key();
        let pubkey = Pubkey::Dss(key);

        let mut blob = PacketEncode::new();
        blob.put_str("ssh-dss");
        blob.put_bytes(&[0; 40]);
        assert!(matches!(SSH_DSS.verify(&pubkey, b"msg", blob.finish()), Err(Error::Signature)));

        let mut blob = PacketEncode::new();
        blob.put_str("ssh-dss");
        blob.put_bytes(&[1; 39]);
        assert!(matches!(SSH_DSS.verify(&pubkey, b"msg", blob.finish()), Err(Error::Signature)));

        let mut blob = PacketEncode::new();
        blob.put_str("ssh-rsa");
        blob.put_bytes(&[1; 40]);
        assert!(matches!(SSH_DSS.verify(&pubkey, b"msg", blob.finish()), Err(Error::Signature)));

        // `r` and `s` must be smaller than `q`
        let mut blob = PacketEncode::new();
        blob.put_str("ssh-dss");
        blob.put_bytes(&[0xff; 40]);
        assert!(matches!(SSH_DSS.verify(&pubkey, b"msg", blob.finish()), Err(Error::Signature)));
    }

    #[test]
    fn test_decode_encode() {
        let (key, _) = toy_key();
        let pubkey = Pubkey::Dss(key);
        let blob = pubkey.encode();
        assert_eq!(Pubkey::decode(blob).unwrap(), pubkey);
    }

    #[test]
    fn test_decode_rejects_key_outside_subgroup() {
        let (mut key, _) = toy_key();
        // p - 1 has order 2, not q
        key.y = BigUint::from(502u32);
        let blob = Pubkey::Dss(key).encode();
        assert!(matches!(Pubkey::decode(blob), Err(Error::Decode(_))));
    }
}
