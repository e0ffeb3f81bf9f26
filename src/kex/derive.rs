use num_bigint_dig::BigUint;
use crate::cipher::CipherAlgo;
use crate::codec::PacketEncode;
use crate::mac::MacAlgo;

/// Derives one key from the shared secret (RFC 4253, section 7.2).
///
/// The first block is `HASH(K || H || tag || session_id)`, every further block is
/// `HASH(K || H || K1 || ... || Kn)` over all blocks produced so far. The output is truncated to
/// `key_len`.
pub(crate) fn derive_key(
    compute_hash: &dyn Fn(&[u8]) -> Vec<u8>,
    shared_secret: &BigUint,
    exchange_hash: &[u8],
    tag: u8,
    session_id: &[u8],
    key_len: usize,
) -> Vec<u8> {
    let mut to_hash_prefix = PacketEncode::new();
    to_hash_prefix.put_biguint(shared_secret);
    to_hash_prefix.put_raw(exchange_hash);

    let mut key = {
        let mut to_hash = to_hash_prefix.clone();
        to_hash.put_u8(tag);
        to_hash.put_raw(session_id);
        compute_hash(&to_hash.finish())
    };

    while key.len() < key_len {
        let mut to_hash = to_hash_prefix.clone();
        to_hash.put_raw(&key);
        key.extend_from_slice(&compute_hash(&to_hash.finish()));
    }

    key.truncate(key_len);
    key
}

/// The six keys produced by one key exchange.
pub(crate) struct SessionKeys {
    pub iv_cts: Vec<u8>,
    pub iv_stc: Vec<u8>,
    pub key_cts: Vec<u8>,
    pub key_stc: Vec<u8>,
    pub mac_cts: Vec<u8>,
    pub mac_stc: Vec<u8>,
}

/// Negotiated algorithms whose key sizes determine how much material is derived.
pub(crate) struct KeyAlgos {
    pub cipher_cts: &'static CipherAlgo,
    pub cipher_stc: &'static CipherAlgo,
    pub mac_cts: &'static MacAlgo,
    pub mac_stc: &'static MacAlgo,
}

impl SessionKeys {
    pub fn derive(
        compute_hash: &dyn Fn(&[u8]) -> Vec<u8>,
        shared_secret: &BigUint,
        exchange_hash: &[u8],
        session_id: &[u8],
        algos: &KeyAlgos,
    ) -> SessionKeys {
        let derive = |tag: u8, key_len: usize| {
            derive_key(compute_hash, shared_secret, exchange_hash, tag, session_id, key_len)
        };
        SessionKeys {
            iv_cts: derive(b'A', algos.cipher_cts.iv_len),
            iv_stc: derive(b'B', algos.cipher_stc.iv_len),
            key_cts: derive(b'C', algos.cipher_cts.key_len),
            key_stc: derive(b'D', algos.cipher_stc.key_len),
            mac_cts: derive(b'E', algos.mac_cts.key_len),
            mac_stc: derive(b'F', algos.mac_stc.key_len),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{cipher, mac};
    use crate::kex::{compute_hash_sha1, compute_hash_sha256};
    use super::*;

    fn secret() -> BigUint {
        BigUint::from_bytes_be(&[0x80, 1, 2, 3, 4, 5, 6, 7])
    }

    #[test]
    fn test_first_block() {
        let key = derive_key(&compute_hash_sha256, &secret(), b"H", b'C', b"session", 32);

        let mut expected = PacketEncode::new();
        expected.put_biguint(&secret());
        expected.put_raw(b"H");
        expected.put_u8(b'C');
        expected.put_raw(b"session");
        assert_eq!(key, compute_hash_sha256(&expected.finish()));
    }

    #[test]
    fn test_extension_blocks() {
        let short = derive_key(&compute_hash_sha1, &secret(), b"H", b'D', b"sid", 20);
        let long = derive_key(&compute_hash_sha1, &secret(), b"H", b'D', b"sid", 50);
        assert_eq!(long.len(), 50);
        assert_eq!(&long[..20], &short[..]);

        let mut second = PacketEncode::new();
        second.put_biguint(&secret());
        second.put_raw(b"H");
        second.put_raw(&short);
        assert_eq!(&long[20..40], &compute_hash_sha1(&second.finish())[..]);
    }

    #[test]
    fn test_truncation() {
        let key = derive_key(&compute_hash_sha256, &secret(), b"H", b'A', b"sid", 12);
        let full = derive_key(&compute_hash_sha256, &secret(), b"H", b'A', b"sid", 32);
        assert_eq!(key, &full[..12]);
    }

    #[test]
    fn test_session_keys() {
        let algos = KeyAlgos {
            cipher_cts: &cipher::AES256_CTR,
            cipher_stc: &cipher::TDES_CBC,
            mac_cts: &mac::HMAC_SHA2_512,
            mac_stc: &mac::HMAC_SHA1_96,
        };
        let keys = SessionKeys::derive(&compute_hash_sha1, &secret(), b"H2", b"H1", &algos);
        assert_eq!(keys.iv_cts.len(), 16);
        assert_eq!(keys.iv_stc.len(), 8);
        assert_eq!(keys.key_cts.len(), 32);
        assert_eq!(keys.key_stc.len(), 24);
        assert_eq!(keys.mac_cts.len(), 64);
        assert_eq!(keys.mac_stc.len(), 20);
        assert_ne!(&keys.iv_cts[..8], &keys.iv_stc[..]);

        // the session id and the current exchange hash play different roles
        let swapped = SessionKeys::derive(&compute_hash_sha1, &secret(), b"H1", b"H2", &algos);
        assert_ne!(keys.key_cts, swapped.key_cts);
    }
}
