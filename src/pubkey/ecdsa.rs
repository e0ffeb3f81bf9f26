use bytes::Bytes;
use ecdsa::signature::Verifier as _;
use std::fmt;
use crate::codec::{PacketDecode, PacketEncode};
use crate::error::{Result, Error};
use super::{PubkeyAlgo, Pubkey, SignatureVerified, decode_signature, key_mismatch};

/// "ecdsa-sha2-nistp256" algorithm from RFC 5656.
pub static ECDSA_SHA2_NISTP256: PubkeyAlgo = PubkeyAlgo {
    name: "ecdsa-sha2-nistp256",
    verify: |pubkey, message, signature| verify(Curve::P256, pubkey, message, signature),
};

/// "ecdsa-sha2-nistp384" algorithm from RFC 5656.
pub static ECDSA_SHA2_NISTP384: PubkeyAlgo = PubkeyAlgo {
    name: "ecdsa-sha2-nistp384",
    verify: |pubkey, message, signature| verify(Curve::P384, pubkey, message, signature),
};

/// "ecdsa-sha2-nistp521" algorithm from RFC 5656.
pub static ECDSA_SHA2_NISTP521: PubkeyAlgo = PubkeyAlgo {
    name: "ecdsa-sha2-nistp521",
    verify: |pubkey, message, signature| verify(Curve::P521, pubkey, message, signature),
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Curve {
    P256,
    P384,
    P521,
}

impl Curve {
    fn identifier(self) -> &'static str {
        match self {
            Curve::P256 => "nistp256",
            Curve::P384 => "nistp384",
            Curve::P521 => "nistp521",
        }
    }

    fn scalar_len(self) -> usize {
        match self {
            Curve::P256 => 32,
            Curve::P384 => 48,
            Curve::P521 => 66,
        }
    }
}

/// ECDSA public key on one of the NIST curves.
///
/// The point is kept in the SEC1 encoding that was received from the peer. It is validated when
/// the key is decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcdsaPubkey {
    curve: Curve,
    point: Bytes,
}

impl EcdsaPubkey {
    /// Name of the key format (such as `"ecdsa-sha2-nistp256"`).
    pub fn format(&self) -> &'static str {
        match self.curve {
            Curve::P256 => "ecdsa-sha2-nistp256",
            Curve::P384 => "ecdsa-sha2-nistp384",
            Curve::P521 => "ecdsa-sha2-nistp521",
        }
    }

    /// The curve point in SEC1 encoding.
    pub fn point(&self) -> &[u8] {
        &self.point
    }
}

impl From<p256::ecdsa::VerifyingKey> for EcdsaPubkey {
    fn from(key: p256::ecdsa::VerifyingKey) -> Self {
        let point = Bytes::copy_from_slice(key.to_encoded_point(false).as_bytes());
        EcdsaPubkey { curve: Curve::P256, point }
    }
}

impl From<p384::ecdsa::VerifyingKey> for EcdsaPubkey {
    fn from(key: p384::ecdsa::VerifyingKey) -> Self {
        let point = Bytes::copy_from_slice(key.to_encoded_point(false).as_bytes());
        EcdsaPubkey { curve: Curve::P384, point }
    }
}

fn verify(curve: Curve, pubkey: &Pubkey, message: &[u8], signature: Bytes) -> Result<SignatureVerified> {
    let Pubkey::Ecdsa(pubkey) = pubkey else { return Err(key_mismatch()) };
    if pubkey.curve != curve {
        return Err(key_mismatch())
    }

    let signature = decode_signature(signature, pubkey.format())?;

    // RFC 5656, section 3.1.2: the signature blob holds `mpint r || mpint s`
    let mut signature = PacketDecode::new(signature);
    let mut scalars = signature.get_scalar(curve.scalar_len())?;
    scalars.extend_from_slice(&signature.get_scalar(curve.scalar_len())?);

    let verified = match curve {
        Curve::P256 => {
            let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(&pubkey.point)
                .map_err(|_| Error::Crypto("invalid ecdsa point"))?;
            let signature = p256::ecdsa::Signature::from_slice(&scalars)
                .map_err(|_| Error::Signature)?;
            key.verify(message, &signature).is_ok()
        },
        Curve::P384 => {
            let key = p384::ecdsa::VerifyingKey::from_sec1_bytes(&pubkey.point)
                .map_err(|_| Error::Crypto("invalid ecdsa point"))?;
            let signature = p384::ecdsa::Signature::from_slice(&scalars)
                .map_err(|_| Error::Signature)?;
            key.verify(message, &signature).is_ok()
        },
        Curve::P521 => {
            let key = p521::ecdsa::VerifyingKey::from_sec1_bytes(&pubkey.point)
                .map_err(|_| Error::Crypto("invalid ecdsa point"))?;
            let signature = p521::ecdsa::Signature::from_slice(&scalars)
                .map_err(|_| Error::Signature)?;
            key.verify(message, &signature).is_ok()
        },
    };

    if verified {
        Ok(SignatureVerified::assertion())
    } else {
        Err(Error::Signature)
    }
}

pub(super) fn decode_pubkey(format: &str, blob: &mut PacketDecode) -> Result<EcdsaPubkey> {
    // RFC 5656, section 3.1
    let curve = match format {
        "ecdsa-sha2-nistp256" => Curve::P256,
        "ecdsa-sha2-nistp384" => Curve::P384,
        "ecdsa-sha2-nistp521" => Curve::P521,
        _ => return Err(Error::Decode("unknown ecdsa key format")),
    };

    if blob.get_string()? != curve.identifier() {
        return Err(Error::Decode("ecdsa curve identifier does not match the key format"))
    }

    let point = blob.get_bytes()?;
    let valid = match curve {
        Curve::P256 => p256::ecdsa::VerifyingKey::from_sec1_bytes(&point).is_ok(),
        Curve::P384 => p384::ecdsa::VerifyingKey::from_sec1_bytes(&point).is_ok(),
        Curve::P521 => p521::ecdsa::VerifyingKey::from_sec1_bytes(&point).is_ok(),
    };
    if !valid {
        return Err(Error::Decode("ecdsa point is not on the curve"))
    }

    Ok(EcdsaPubkey { curve, point })
}

pub(super) fn encode_pubkey(blob: &mut PacketEncode, pubkey: &EcdsaPubkey) {
    blob.put_str(pubkey.format());
    blob.put_str(pubkey.curve.identifier());
    blob.put_bytes(&pubkey.point);
}

impl fmt::Display for EcdsaPubkey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ecdsa {}", self.curve.identifier())
    }
}
