use bytes::Bytes;
use derivative::Derivative;
use num_bigint_dig::BigUint;
use rand::SeedableRng as _;
use rand_chacha::ChaCha20Rng;
use std::task::Poll;
use crate::codec::{PacketDecode, PacketEncode};
use crate::codes::msg;
use crate::error::{Error, Result};
use crate::util::CryptoRngCore;
use super::{KexAlgo, KexInput, KexOutput, KexParams, Kex, compute_hash_sha1, compute_hash_sha256};
use super::dh::{self, Group, KexdhReply};

/// "diffie-hellman-group-exchange-sha256" key exchange from RFC 4419.
pub static DIFFIE_HELLMAN_GROUP_EXCHANGE_SHA256: KexAlgo = KexAlgo {
    name: "diffie-hellman-group-exchange-sha256",
    make_kex: |params, rng| Ok(Box::new(init_gex(params, compute_hash_sha256, rng)?)),
};

/// "diffie-hellman-group-exchange-sha1" key exchange from RFC 4419.
pub static DIFFIE_HELLMAN_GROUP_EXCHANGE_SHA1: KexAlgo = KexAlgo {
    name: "diffie-hellman-group-exchange-sha1",
    make_kex: |params, rng| Ok(Box::new(init_gex(params, compute_hash_sha1, rng)?)),
};

#[derive(Derivative)]
#[derivative(Debug)]
struct GroupExchangeKex {
    bits: (u32, u32, u32),
    #[derivative(Debug = "ignore")]
    compute_hash: fn(&[u8]) -> Vec<u8>,
    #[derivative(Debug = "ignore")]
    rng: ChaCha20Rng,
    state: State,
}

#[derive(Derivative)]
#[derivative(Debug)]
enum State {
    /// KEX_DH_GEX_REQUEST was not sent yet.
    Initial,
    WaitingOnGroup,
    WaitingOnReply {
        group: Group,
        #[derivative(Debug = "ignore")]
        our_eph_privkey: BigUint,
        our_eph_pubkey: BigUint,
        init_sent: bool,
    },
    Complete {
        group: Group,
        #[derivative(Debug = "ignore")]
        our_eph_privkey: BigUint,
        our_eph_pubkey: BigUint,
        reply: KexdhReply,
    },
    Done,
}

fn init_gex(
    params: &KexParams,
    compute_hash: fn(&[u8]) -> Vec<u8>,
    rng: &mut dyn CryptoRngCore,
) -> Result<GroupExchangeKex> {
    let (min, n, max) = params.gex_bits;
    if !(min <= n && n <= max) {
        return Err(Error::Protocol("group exchange sizes must satisfy min <= n <= max"))
    }

    // the exponent is generated only after the group arrives, so we keep our own generator
    let rng = ChaCha20Rng::from_rng(rng.as_rngcore())
        .map_err(|_| Error::Random("could not seed generator for group exchange"))?;
    Ok(GroupExchangeKex { bits: params.gex_bits, compute_hash, rng, state: State::Initial })
}

impl Kex for GroupExchangeKex {
    fn recv_packet(&mut self, msg_id: u8, payload: &mut PacketDecode) -> Result<()> {
        match (msg_id, &self.state) {
            (msg::KEX_DH_GEX_GROUP, State::WaitingOnGroup) => recv_group(self, payload),
            (msg::KEX_DH_GEX_REPLY, State::WaitingOnReply { init_sent: true, .. }) =>
                recv_reply(self, payload),
            _ => Err(Error::UnexpectedMessage(msg_id)),
        }
    }

    fn send_packet(&mut self) -> Result<Option<Bytes>> {
        match self.state {
            State::Initial => {
                // RFC 4419, section 3
                let (min, n, max) = self.bits;
                let mut payload = PacketEncode::new();
                payload.put_u8(msg::KEX_DH_GEX_REQUEST);
                payload.put_u32(min);
                payload.put_u32(n);
                payload.put_u32(max);
                self.state = State::WaitingOnGroup;
                log::debug!("sending SSH_MSG_KEX_DH_GEX_REQUEST ({}, {}, {})", min, n, max);
                Ok(Some(payload.finish()))
            },
            State::WaitingOnReply { ref our_eph_pubkey, ref mut init_sent, .. } if !*init_sent => {
                let mut payload = PacketEncode::new();
                payload.put_u8(msg::KEX_DH_GEX_INIT);
                payload.put_biguint(our_eph_pubkey);
                *init_sent = true;
                log::debug!("sending SSH_MSG_KEX_DH_GEX_INIT");
                Ok(Some(payload.finish()))
            },
            _ => Ok(None),
        }
    }

    fn poll(&mut self, input: KexInput) -> Poll<Result<KexOutput>> {
        if !matches!(self.state, State::Complete { .. }) {
            return Poll::Pending
        }
        let State::Complete { group, our_eph_privkey, our_eph_pubkey, reply } =
            std::mem::replace(&mut self.state, State::Done) else { unreachable!() };

        let shared_secret = reply.server_eph_pubkey.modpow(&our_eph_privkey, &group.p);

        // RFC 4419, section 3
        let (min, n, max) = self.bits;
        let mut exchange_data = dh::encode_hash_prefix(&input, &reply.server_pubkey);
        exchange_data.put_u32(min);
        exchange_data.put_u32(n);
        exchange_data.put_u32(max);
        exchange_data.put_biguint(&group.p);
        exchange_data.put_biguint(&group.g);
        exchange_data.put_biguint(&our_eph_pubkey);
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

fn recv_group(kex: &mut GroupExchangeKex, payload: &mut PacketDecode) -> Result<()> {
    let p = payload.get_biguint()?;
    let g = payload.get_biguint()?;
    log::debug!("received SSH_MSG_KEX_DH_GEX_GROUP with {}-bit prime", p.bits());

    let (min, _, max) = kex.bits;
    let bits = p.bits();
    if bits < min as usize || bits > max as usize {
        return Err(Error::Protocol("server sent group with prime size outside of requested range"))
    }
    if p.to_bytes_le().first().map_or(true, |byte| byte & 1 == 0) {
        return Err(Error::Protocol("server sent group with even modulus"))
    }

    let group = Group::new(p, g);
    if group.g <= BigUint::from(1u32) || group.g >= group.p_minus_1 {
        return Err(Error::Protocol("server sent group with invalid generator"))
    }

    // x is uniform in [1, (p-1)/2]
    let upper = (&group.p_minus_1 >> 1) + BigUint::from(1u32);
    let our_eph_privkey = dh::gen_exponent(&mut kex.rng, &upper);
    let our_eph_pubkey = group.g.modpow(&our_eph_privkey, &group.p);
    kex.state = State::WaitingOnReply { group, our_eph_privkey, our_eph_pubkey, init_sent: false };
    Ok(())
}

fn recv_reply(kex: &mut GroupExchangeKex, payload: &mut PacketDecode) -> Result<()> {
    let reply = dh::decode_reply(payload)?;
    let State::WaitingOnReply { group, our_eph_privkey, our_eph_pubkey, .. } =
        std::mem::replace(&mut kex.state, State::Done) else { unreachable!() };
    dh::check_server_eph_pubkey(&group, &reply.server_eph_pubkey)?;
    log::debug!("received SSH_MSG_KEX_DH_GEX_REPLY");
    kex.state = State::Complete { group, our_eph_privkey, our_eph_pubkey, reply };
    Ok(())
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng as _;
    use crate::codec::{PacketDecode, PacketEncode};
    use crate::codes::msg;
    use crate::kex::{KexParams, compute_hash_sha256};
    use crate::kex::dh::{Group, encode_hash_prefix};
    use crate::Error;
    use super::*;

    fn input() -> KexInput<'static> {
        KexInput {
            client_ident: b"SSH-2.0-client",
            server_ident: b"SSH-2.0-server",
            client_kex_init: b"\x14ours",
            server_kex_init: b"\x14theirs",
        }
    }

    fn group_packet(group: &Group) -> PacketDecode {
        let mut payload = PacketEncode::new();
        payload.put_biguint(&group.p);
        payload.put_biguint(&group.g);
        PacketDecode::new(payload.finish())
    }

    fn start(bits: (u32, u32, u32)) -> Box<dyn Kex + Send> {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(11);
        let params = KexParams { gex_bits: bits };
        let mut kex = (DIFFIE_HELLMAN_GROUP_EXCHANGE_SHA256.make_kex)(&params, &mut rng).unwrap();

        let mut request = PacketDecode::new(kex.send_packet().unwrap().unwrap());
        assert_eq!(request.get_u8().unwrap(), msg::KEX_DH_GEX_REQUEST);
        assert_eq!(request.get_u32().unwrap(), bits.0);
        assert_eq!(request.get_u32().unwrap(), bits.1);
        assert_eq!(request.get_u32().unwrap(), bits.2);
        // nothing more to send until the group arrives
        assert!(kex.send_packet().unwrap().is_none());
        kex
    }

    #[test]
    fn test_full_exchange() {
        let bits = (1024, 2048, 8192);
        let group = Group::group_14();
        let mut kex = start(bits);
        kex.recv_packet(msg::KEX_DH_GEX_GROUP, &mut group_packet(&group)).unwrap();

        let mut init = PacketDecode::new(kex.send_packet().unwrap().unwrap());
        assert_eq!(init.get_u8().unwrap(), msg::KEX_DH_GEX_INIT);
        let e = init.get_biguint().unwrap();
        assert!(kex.send_packet().unwrap().is_none());
        assert!(kex.poll(input()).is_pending());

        let y = BigUint::from(0xfeed_f00d_u64);
        let f = group.g.modpow(&y, &group.p);
        let server_secret = e.modpow(&y, &group.p);

        let mut reply = PacketEncode::new();
        reply.put_bytes(b"K_S");
        reply.put_biguint(&f);
        reply.put_bytes(b"sig");
        kex.recv_packet(msg::KEX_DH_GEX_REPLY, &mut PacketDecode::new(reply.finish())).unwrap();

        let output = match kex.poll(input()) {
            Poll::Ready(output) => output.unwrap(),
            Poll::Pending => panic!("kex should be finished"),
        };
        assert_eq!(output.shared_secret, server_secret);

        let mut hash_data = encode_hash_prefix(&input(), b"K_S");
        hash_data.put_u32(1024);
        hash_data.put_u32(2048);
        hash_data.put_u32(8192);
        hash_data.put_biguint(&group.p);
        hash_data.put_biguint(&group.g);
        hash_data.put_biguint(&e);
        hash_data.put_biguint(&f);
        hash_data.put_biguint(&server_secret);
        assert_eq!(output.exchange_hash, compute_hash_sha256(&hash_data.finish()));
        assert_eq!(output.exchange_hash.len(), 32);

        // the exponent is at most (p-1)/2, so e is a proper group element
        assert!(e > BigUint::from(1u32) && e < group.p);
    }

    #[test]
    fn test_group_too_small() {
        let mut kex = start((2048, 2048, 8192));
        let res = kex.recv_packet(msg::KEX_DH_GEX_GROUP, &mut group_packet(&Group::group_1()));
        assert!(matches!(res, Err(Error::Protocol(_))));
    }

    #[test]
    fn test_group_too_large() {
        let mut kex = start((512, 1024, 1024));
        let res = kex.recv_packet(msg::KEX_DH_GEX_GROUP, &mut group_packet(&Group::group_14()));
        assert!(matches!(res, Err(Error::Protocol(_))));
    }

    #[test]
    fn test_invalid_generator() {
        let mut kex = start((1024, 2048, 8192));
        let mut group = Group::group_14();
        group.g = BigUint::from(1u32);
        let res = kex.recv_packet(msg::KEX_DH_GEX_GROUP, &mut group_packet(&group));
        assert!(matches!(res, Err(Error::Protocol(_))));
    }

    #[test]
    fn test_reply_before_group() {
        let mut kex = start((1024, 2048, 8192));
        let mut reply = PacketEncode::new();
        reply.put_bytes(b"K_S");
        reply.put_biguint(&BigUint::from(2u32));
        reply.put_bytes(b"sig");
        let res = kex.recv_packet(msg::KEX_DH_GEX_REPLY, &mut PacketDecode::new(reply.finish()));
        assert!(matches!(res, Err(Error::UnexpectedMessage(33))));
    }

    #[test]
    fn test_invalid_sizes() {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(1);
        let params = KexParams { gex_bits: (4096, 2048, 8192) };
        assert!((DIFFIE_HELLMAN_GROUP_EXCHANGE_SHA1.make_kex)(&params, &mut rng).is_err());
    }
}
