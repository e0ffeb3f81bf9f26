use anyhow::{Context as _, Result};
use base64::Engine as _;
use bytes::Bytes;
use num_bigint_dig::BigUint;
use p256::ecdsa::SigningKey;
use p256::ecdsa::signature::Signer as _;
use rand::SeedableRng as _;
use rand_chacha::ChaCha8Rng;
use sha2::Digest as _;
use sshengine::{pubkey, Error, PacketDecode, PacketEncode, Pubkey};

fn signing_key(seed: u64) -> SigningKey {
    SigningKey::random(&mut ChaCha8Rng::seed_from_u64(seed))
}

fn pubkey_blob(key: &SigningKey) -> Bytes {
    let point = key.verifying_key().to_encoded_point(false);
    let mut blob = PacketEncode::new();
    blob.put_str("ecdsa-sha2-nistp256");
    blob.put_str("nistp256");
    blob.put_bytes(point.as_bytes());
    blob.finish()
}

fn sign(key: &SigningKey, message: &[u8]) -> Bytes {
    let signature: p256::ecdsa::Signature = key.sign(message);
    let (r, s) = signature.split_bytes();
    let mut inner = PacketEncode::new();
    inner.put_biguint(&BigUint::from_bytes_be(&r));
    inner.put_biguint(&BigUint::from_bytes_be(&s));

    let mut blob = PacketEncode::new();
    blob.put_str("ecdsa-sha2-nistp256");
    blob.put_bytes(&inner.finish());
    blob.finish()
}

#[test] fn test_decode_ecdsa_pubkey() -> Result<()> {
    let key = signing_key(1);
    let blob = pubkey_blob(&key);
    let pubkey = Pubkey::decode(blob.clone())?;
    assert!(matches!(pubkey, Pubkey::Ecdsa(_)));
    assert_eq!(pubkey.encode(), blob);
    assert_eq!(pubkey.to_string(), "ecdsa nistp256");
    Ok(())
}

#[test] fn test_decode_unknown_format() {
    let mut blob = PacketEncode::new();
    blob.put_str("ssh-ed448");
    blob.put_bytes(&[1, 2, 3]);
    assert!(matches!(Pubkey::decode(blob.finish()), Err(Error::Decode(_))));
}

#[test] fn test_decode_mismatched_curve() {
    let key = signing_key(1);
    let mut decode = PacketDecode::new(pubkey_blob(&key));
    decode.get_string().unwrap();
    decode.get_string().unwrap();
    let point = decode.get_bytes().unwrap();

    let mut blob = PacketEncode::new();
    blob.put_str("ecdsa-sha2-nistp256");
    blob.put_str("nistp384");
    blob.put_bytes(&point);
    assert!(Pubkey::decode(blob.finish()).is_err());
}

#[test] fn test_fingerprint() {
    let blob = pubkey_blob(&signing_key(2));
    let pubkey = Pubkey::decode(blob.clone()).unwrap();
    let digest = sha2::Sha256::digest(&blob);
    let expected = format!("SHA256:{}",
        base64::engine::general_purpose::STANDARD_NO_PAD.encode(digest));
    assert_eq!(pubkey.fingerprint(), expected);
    assert!(!pubkey.fingerprint().ends_with('='));
}

#[test] fn test_verify_ecdsa_signature() -> Result<()> {
    let key = signing_key(3);
    let pubkey = Pubkey::decode(pubkey_blob(&key))?;
    let message = b"exchange hash";
    let signature = sign(&key, message);
    pubkey::ECDSA_SHA2_NISTP256.verify(&pubkey, message, signature)
        .context("could not verify a valid signature")?;
    Ok(())
}

#[test] fn test_reject_ecdsa_signature_of_other_message() {
    let key = signing_key(3);
    let pubkey = Pubkey::decode(pubkey_blob(&key)).unwrap();
    let signature = sign(&key, b"exchange hash");
    let res = pubkey::ECDSA_SHA2_NISTP256.verify(&pubkey, b"another hash", signature);
    assert!(matches!(res, Err(Error::Signature)));
}

#[test] fn test_reject_ecdsa_signature_of_other_key() {
    let pubkey = Pubkey::decode(pubkey_blob(&signing_key(4))).unwrap();
    let signature = sign(&signing_key(5), b"exchange hash");
    let res = pubkey::ECDSA_SHA2_NISTP256.verify(&pubkey, b"exchange hash", signature);
    assert!(matches!(res, Err(Error::Signature)));
}

#[test] fn test_reject_key_of_other_algo() {
    let key = signing_key(6);
    let pubkey = Pubkey::decode(pubkey_blob(&key)).unwrap();
    let signature = sign(&key, b"exchange hash");
    assert!(pubkey::RSA_SHA2_256.verify(&pubkey, b"exchange hash", signature.clone()).is_err());
    assert!(pubkey::ECDSA_SHA2_NISTP384.verify(&pubkey, b"exchange hash", signature).is_err());
}

#[test] fn test_algo_by_name() {
    assert_eq!(pubkey::by_name("rsa-sha2-256").unwrap().name, "rsa-sha2-256");
    assert!(matches!(pubkey::by_name("ssh-ed25519"), Err(Error::UnsupportedAlgo(_))));
    let names: Vec<_> = pubkey::all().iter().map(|algo| algo.name).collect();
    assert_eq!(names[0], "rsa-sha2-512");
    assert!(names.contains(&"ecdsa-sha2-nistp256"));
}
