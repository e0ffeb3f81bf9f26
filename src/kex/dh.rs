use bytes::Bytes;
use derivative::Derivative;
use hex_literal::hex;
use num_bigint_dig::{BigUint, RandBigInt as _};
use std::task::Poll;
use crate::codec::{PacketDecode, PacketEncode};
use crate::codes::msg;
use crate::error::{Error, Result};
use crate::util::CryptoRngCore;
use super::{KexAlgo, KexInput, KexOutput, Kex, compute_hash_sha1};

/// "diffie-hellman-group14-sha1" key exchange from RFC 4253 (2048-bit MODP group from RFC 3526).
pub static DIFFIE_HELLMAN_GROUP14_SHA1: KexAlgo = KexAlgo {
    name: "diffie-hellman-group14-sha1",
    make_kex: |_params, rng| Ok(Box::new(init_kex(Group::group_14(), compute_hash_sha1, rng)?)),
};

/// "diffie-hellman-group1-sha1" key exchange from RFC 4253.
///
/// The name refers to "group1", but the group is the 1024-bit Oakley group 2 from RFC 2409.
pub static DIFFIE_HELLMAN_GROUP1_SHA1: KexAlgo = KexAlgo {
    name: "diffie-hellman-group1-sha1",
    make_kex: |_params, rng| Ok(Box::new(init_kex(Group::group_1(), compute_hash_sha1, rng)?)),
};

/// Multiplicative group modulo a safe prime `p` with generator `g`.
#[derive(Debug, Clone)]
pub(crate) struct Group {
    pub g: BigUint,
    pub p: BigUint,
    pub p_minus_1: BigUint,
}

#[derive(Derivative)]
#[derivative(Debug)]
struct DiffieHellmanKex {
    group: Group,
    #[derivative(Debug = "ignore")]
    compute_hash: fn(&[u8]) -> Vec<u8>,
    #[derivative(Debug = "ignore")]
    our_eph_privkey: BigUint,
    our_eph_pubkey: BigUint,
    kexdh_init_sent: bool,
    kexdh_reply: Option<KexdhReply>,
}

#[derive(Debug)]
pub(super) struct KexdhReply {
    pub server_pubkey: Bytes,
    pub server_eph_pubkey: BigUint,
    pub server_exchange_hash_sign: Bytes,
}

fn init_kex(
    group: Group,
    compute_hash: fn(&[u8]) -> Vec<u8>,
    rng: &mut dyn CryptoRngCore,
) -> Result<DiffieHellmanKex> {
    // x is uniform in [1, p-1)
    let upper = group.p_minus_1.clone();
    let our_eph_privkey = gen_exponent(rng, &upper);
    let our_eph_pubkey = group.g.modpow(&our_eph_privkey, &group.p);
    Ok(DiffieHellmanKex {
        group, compute_hash, our_eph_privkey, our_eph_pubkey,
        kexdh_init_sent: false,
        kexdh_reply: None,
    })
}

impl Kex for DiffieHellmanKex {
    fn recv_packet(&mut self, msg_id: u8, payload: &mut PacketDecode) -> Result<()> {
        match msg_id {
            msg::KEXDH_REPLY if self.kexdh_init_sent && self.kexdh_reply.is_none() => {
                // RFC 4253, section 8
                let reply = decode_reply(payload)?;
                check_server_eph_pubkey(&self.group, &reply.server_eph_pubkey)?;
                log::debug!("received SSH_MSG_KEXDH_REPLY");
                self.kexdh_reply = Some(reply);
                Ok(())
            },
            _ => Err(Error::UnexpectedMessage(msg_id)),
        }
    }

    fn send_packet(&mut self) -> Result<Option<Bytes>> {
        if self.kexdh_init_sent {
            return Ok(None)
        }

        // RFC 4253, section 8
        let mut payload = PacketEncode::new();
        payload.put_u8(msg::KEXDH_INIT);
        payload.put_biguint(&self.our_eph_pubkey);
        self.kexdh_init_sent = true;
        log::debug!("sending SSH_MSG_KEXDH_INIT");
        Ok(Some(payload.finish()))
    }

    fn poll(&mut self, input: KexInput) -> Poll<Result<KexOutput>> {
        let Some(reply) = self.kexdh_reply.take() else { return Poll::Pending };

        let shared_secret = reply.server_eph_pubkey.modpow(&self.our_eph_privkey, &self.group.p);
        let mut exchange_data = encode_hash_prefix(&input, &reply.server_pubkey);
        exchange_data.put_biguint(&self.our_eph_pubkey);
        exchange_data.put_biguint(&reply.server_eph_pubkey);
        exchange_data.put_biguint(&shared_secret);
        let exchange_hash = (self.compute_hash)(&exchange_data.finish());

        Poll::Ready(Ok(KexOutput {
            shared_secret,
            exchange_hash,
            server_pubkey: reply.server_pubkey,
            server_exchange_hash_sign: reply.server_exchange_hash_sign,
        }))
    }

    fn compute_hash(&self, data: &[u8]) -> Vec<u8> {
        (self.compute_hash)(data)
    }
}

/// Decodes the body of KEXDH_REPLY, which has the same layout as KEX_DH_GEX_REPLY.
pub(super) fn decode_reply(payload: &mut PacketDecode) -> Result<KexdhReply> {
    let server_pubkey = Bytes::copy_from_slice(&payload.get_bytes()?);
    let server_eph_pubkey = payload.get_biguint()?;
    let server_exchange_hash_sign = Bytes::copy_from_slice(&payload.get_bytes()?);
    Ok(KexdhReply { server_pubkey, server_eph_pubkey, server_exchange_hash_sign })
}

/// The server's public value `f` must lie in `[1, p-1]`.
pub(super) fn check_server_eph_pubkey(group: &Group, f: &BigUint) -> Result<()> {
    if *f < BigUint::from(1u32) || *f > group.p_minus_1 {
        return Err(Error::Protocol("server sent Diffie-Hellman public value out of range"))
    }
    Ok(())
}

/// Uniform random exponent in `[1, upper)`.
pub(super) fn gen_exponent(rng: &mut dyn CryptoRngCore, upper: &BigUint) -> BigUint {
    // `gen_biguint_range` rejection-samples, so the distribution is uniform
    rng.as_rngcore().gen_biguint_range(&BigUint::from(1u32), upper)
}

/// Encodes `V_C || V_S || I_C || I_S || K_S`, the part of the exchange hash that is common to all
/// Diffie-Hellman variants.
pub(super) fn encode_hash_prefix(input: &KexInput, server_pubkey: &[u8]) -> PacketEncode {
    let mut data = PacketEncode::new();
    data.put_bytes(input.client_ident);
    data.put_bytes(input.server_ident);
    data.put_bytes(input.client_kex_init);
    data.put_bytes(input.server_kex_init);
    data.put_bytes(server_pubkey);
    data
}

impl Group {
    pub fn new(p: BigUint, g: BigUint) -> Group {
        let p_minus_1 = &p - BigUint::from(1u32);
        Group { g, p, p_minus_1 }
    }

    pub fn group_1() -> Group {
        // RFC 2409, section 6.2
        let p = BigUint::from_bytes_be(&hex!(
            "FFFFFFFF" "FFFFFFFF" "C90FDAA2" "2168C234" "C4C6628B" "80DC1CD1"
            "29024E08" "8A67CC74" "020BBEA6" "3B139B22" "514A0879" "8E3404DD"
            "EF9519B3" "CD3A431B" "302B0A6D" "F25F1437" "4FE1356D" "6D51C245"
            "E485B576" "625E7EC6" "F44C42E9" "A637ED6B" "0BFF5CB6" "F406B7ED"
            "EE386BFB" "5A899FA5" "AE9F2411" "7C4B1FE6" "49286651" "ECE65381"
            "FFFFFFFF" "FFFFFFFF"
        ));
        Group::new(p, BigUint::from(2u32))
    }

    pub fn group_14() -> Group {
        // RFC 3526, section 3
        let p = BigUint::from_bytes_be(&hex!(
            "FFFFFFFF" "FFFFFFFF" "C90FDAA2" "2168C234" "C4C6628B" "80DC1CD1"
            "29024E08" "8A67CC74" "020BBEA6" "3B139B22" "514A0879" "8E3404DD"
            "EF9519B3" "CD3A431B" "302B0A6D" "F25F1437" "4FE1356D" "6D51C245"
            "E485B576" "625E7EC6" "F44C42E9" "A637ED6B" "0BFF5CB6" "F406B7ED"
            "EE386BFB" "5A899FA5" "AE9F2411" "7C4B1FE6" "49286651" "ECE45B3D"
            "C2007CB8" "A163BF05" "98DA4836" "1C55D39A" "69163FA8" "FD24CF5F"
            "83655D23" "DCA3AD96" "1C62F356" "208552BB" "9ED52907" "7096966D"
            "670C354E" "4ABC9804" "F1746C08" "CA18217C" "32905E46" "2E36CE3B"
            "E39E772C" "180E8603" "9B2783A2" "EC07A28F" "B5C55DF0" "6F4C52C9"
            "DE2BCBF6" "95581718" "3995497C" "EA956AE5" "15D22618" "98FA0510"
            "15728E5A" "8AACAA68" "FFFFFFFF" "FFFFFFFF"
        ));
        Group::new(p, BigUint::from(2u32))
    }
}
