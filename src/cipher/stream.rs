use cipher::{KeyIvInit, StreamCipher};
use crate::{Error, Result};
use super::{CipherAlgo, Encrypt, Decrypt};

/// "aes128-ctr" cipher from RFC 4344.
pub static AES128_CTR: CipherAlgo = CipherAlgo {
    name: "aes128-ctr",
    block_len: 16,
    key_len: 16,
    iv_len: 16,
    make_encrypt: |key, iv| Ok(Box::new(new_ctr::<ctr::Ctr128BE<aes::Aes128>>(key, iv)?)),
    make_decrypt: |key, iv| Ok(Box::new(new_ctr::<ctr::Ctr128BE<aes::Aes128>>(key, iv)?)),
};

/// "aes192-ctr" cipher from RFC 4344.
pub static AES192_CTR: CipherAlgo = CipherAlgo {
    name: "aes192-ctr",
    block_len: 16,
    key_len: 24,
    iv_len: 16,
    make_encrypt: |key, iv| Ok(Box::new(new_ctr::<ctr::Ctr128BE<aes::Aes192>>(key, iv)?)),
    make_decrypt: |key, iv| Ok(Box::new(new_ctr::<ctr::Ctr128BE<aes::Aes192>>(key, iv)?)),
};

/// "aes256-ctr" cipher from RFC 4344.
pub static AES256_CTR: CipherAlgo = CipherAlgo {
    name: "aes256-ctr",
    block_len: 16,
    key_len: 32,
    iv_len: 16,
    make_encrypt: |key, iv| Ok(Box::new(new_ctr::<ctr::Ctr128BE<aes::Aes256>>(key, iv)?)),
    make_decrypt: |key, iv| Ok(Box::new(new_ctr::<ctr::Ctr128BE<aes::Aes256>>(key, iv)?)),
};

struct Ctr<C> {
    cipher: C,
}

fn new_ctr<C: KeyIvInit>(key: &[u8], iv: &[u8]) -> Result<Ctr<C>> {
    let cipher = C::new_from_slices(key, iv)
        .map_err(|_| Error::Crypto("invalid key or iv length for ctr cipher"))?;
    Ok(Ctr { cipher })
}

// the keystream is not tied to block boundaries, but the packet framing always feeds whole
// blocks, so the counter stays in step with the peer
impl<C: StreamCipher> Encrypt for Ctr<C> {
    fn encrypt(&mut self, data: &mut [u8]) {
        self.cipher.apply_keystream(data)
    }
}

impl<C: StreamCipher> Decrypt for Ctr<C> {
    fn decrypt(&mut self, data: &mut [u8]) {
        self.cipher.apply_keystream(data)
    }
}
