use bytes::Bytes;
use std::future::Future as _;
use std::mem::replace;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::sync::oneshot;
use tokio::time::Sleep;
use crate::cipher::CipherAlgo;
use crate::codec::{PacketDecode, PacketEncode};
use crate::codes::msg;
use crate::compress::CompressAlgo;
use crate::error::{AlgoNegotiateError, Error, Result};
use crate::kex::{Kex, KexAlgo, KexInput, KexParams, KeyAlgos, SessionKeys};
use crate::mac::MacAlgo;
use crate::pubkey::{Pubkey, PubkeyAlgo};
use super::client::ClientConfig;
use super::client_state::{self, ClientState};
use super::pump::Pump;
use super::recv::ResultRecvState;

/// Upper bound of [`ClientConfig::rekey_after_bytes`] (RFC 4253, section 9).
const REKEY_AFTER_BYTES_MAX: u64 = 1 << 30;

/// Algorithm names that one side lists in `SSH_MSG_KEXINIT` (RFC 4253, section 7.1).
///
/// Each list is in the order of preference of that side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlgoLists {
    /// `kex_algorithms`
    pub kex: Vec<String>,
    /// `server_host_key_algorithms`
    pub server_pubkey: Vec<String>,
    /// `encryption_algorithms_client_to_server`
    pub cipher_cts: Vec<String>,
    /// `encryption_algorithms_server_to_client`
    pub cipher_stc: Vec<String>,
    /// `mac_algorithms_client_to_server`
    pub mac_cts: Vec<String>,
    /// `mac_algorithms_server_to_client`
    pub mac_stc: Vec<String>,
    /// `compression_algorithms_client_to_server`
    pub compress_cts: Vec<String>,
    /// `compression_algorithms_server_to_client`
    pub compress_stc: Vec<String>,
}

/// The algorithm selected in each of the eight categories of `SSH_MSG_KEXINIT`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct NegotiatedAlgos {
    pub kex: String,
    pub server_pubkey: String,
    pub cipher_cts: String,
    pub cipher_stc: String,
    pub mac_cts: String,
    pub mac_stc: String,
    pub compress_cts: String,
    pub compress_stc: String,
}

/// Result of one exchange of `SSH_MSG_KEXINIT` messages.
///
/// Holds both raw payloads (they are part of the exchange hash) and the negotiated algorithms.
/// A new value is produced on every key exchange.
#[derive(Debug, Clone)]
pub struct KexInitExchange {
    /// Our `SSH_MSG_KEXINIT` payload.
    pub client_kex_init: Bytes,
    /// The server's `SSH_MSG_KEXINIT` payload.
    pub server_kex_init: Bytes,
    /// The negotiated algorithms.
    pub algos: NegotiatedAlgos,
}

/// Selects the first algorithm from `ours` that also appears anywhere in `theirs`.
///
/// The client's order of preference decides, the order of the server's list does not matter (RFC
/// 4253, section 7.1).
pub fn select_algo<'a, A, B>(ours: &'a [A], theirs: &[B]) -> Option<&'a str>
    where A: AsRef<str>, B: AsRef<str>
{
    ours.iter()
        .map(|our| our.as_ref())
        .find(|our| theirs.iter().any(|their| their.as_ref() == *our))
}

/// Negotiates the algorithms in all eight categories.
///
/// `ours` are the client lists, `theirs` are the server lists. Fails with
/// [`Error::AlgoNegotiate`] for the first category that has no common algorithm.
pub fn negotiate_algos(ours: &AlgoLists, theirs: &AlgoLists) -> Result<NegotiatedAlgos> {
    fn negotiate(ours: &[String], theirs: &[String], name: &str) -> Result<String> {
        match select_algo(ours, theirs) {
            Some(algo) => {
                log::debug!("negotiated algo {:?} for {}", algo, name);
                Ok(algo.into())
            },
            None => Err(Error::AlgoNegotiate(AlgoNegotiateError {
                algo_name: name.into(),
                our_algos: ours.to_vec(),
                their_algos: theirs.to_vec(),
            })),
        }
    }

    Ok(NegotiatedAlgos {
        kex: negotiate(&ours.kex, &theirs.kex, "key exchange")?,
        server_pubkey: negotiate(&ours.server_pubkey, &theirs.server_pubkey, "server public key")?,
        cipher_cts: negotiate(&ours.cipher_cts, &theirs.cipher_cts, "cipher client-to-server")?,
        cipher_stc: negotiate(&ours.cipher_stc, &theirs.cipher_stc, "cipher server-to-client")?,
        mac_cts: negotiate(&ours.mac_cts, &theirs.mac_cts, "mac client-to-server")?,
        mac_stc: negotiate(&ours.mac_stc, &theirs.mac_stc, "mac server-to-client")?,
        compress_cts: negotiate(&ours.compress_cts, &theirs.compress_cts, "compression client-to-server")?,
        compress_stc: negotiate(&ours.compress_stc, &theirs.compress_stc, "compression server-to-client")?,
    })
}

pub(super) struct NegotiateState {
    state: State,
    our_kex_init: Option<OurKexInit>,
    their_kex_init: Option<TheirKexInit>,
    exchange: Option<KexInitExchange>,
    ignore_guessed_packet: bool,
    new_keys_sent: bool,
    new_keys_recvd: bool,
    rekey_requested: bool,
    done_txs: Vec<oneshot::Sender<()>>,
    last_kex: Option<KexMark>,
    rekey_timer: Option<Pin<Box<Sleep>>>,
    last_exchange: Option<KexInitExchange>,
    server_pubkey: Option<Pubkey>,
    kex_count: u32,
}

enum State {
    Idle,
    KexInit,
    Kex { algos: Algos, kex: Box<dyn Kex + Send> },
    NewKeys { algos: Algos, keys: SessionKeys },
}

struct OurKexInit {
    payload: Bytes,
    lists: AlgoLists,
}

#[derive(Debug)]
struct TheirKexInit {
    payload: Bytes,
    lists: AlgoLists,
    first_kex_packet_follows: bool,
}

struct Algos {
    kex: &'static KexAlgo,
    server_pubkey: &'static PubkeyAlgo,
    cipher_cts: &'static CipherAlgo,
    cipher_stc: &'static CipherAlgo,
    mac_cts: &'static MacAlgo,
    mac_stc: &'static MacAlgo,
    compress_cts: &'static CompressAlgo,
    compress_stc: &'static CompressAlgo,
}

/// Byte counters and time at the end of the last key exchange.
struct KexMark {
    sent_bytes: u64,
    recvd_bytes: u64,
    time: Instant,
}

pub(super) fn init_negotiate() -> NegotiateState {
    NegotiateState {
        state: State::KexInit,
        our_kex_init: None,
        their_kex_init: None,
        exchange: None,
        ignore_guessed_packet: false,
        new_keys_sent: false,
        new_keys_recvd: false,
        rekey_requested: false,
        done_txs: Vec::new(),
        last_kex: None,
        rekey_timer: None,
        last_exchange: None,
        server_pubkey: None,
        kex_count: 0,
    }
}

pub(super) fn pump_negotiate(st: &mut ClientState, cx: &mut Context) -> Result<Pump> {
    // NOTE: we move out of the state here, every branch must store the next state
    match replace(&mut st.negotiate_st.state, State::Idle) {
        State::Idle => {
            if is_rekey_due(st) {
                log::debug!("starting key re-exchange");
                st.negotiate_st.rekey_requested = false;
                st.negotiate_st.state = State::KexInit;
                return Ok(Pump::Progress)
            }
            // wakes us up on an idle connection when `rekey_after_duration` elapses
            if let Some(timer) = st.negotiate_st.rekey_timer.as_mut() {
                if timer.as_mut().poll(cx).is_ready() {
                    log::debug!("rekey interval elapsed");
                    st.negotiate_st.rekey_timer = None;
                    st.negotiate_st.rekey_requested = true;
                    return Ok(Pump::Progress)
                }
            }
            Ok(Pump::Pending)
        },
        State::KexInit => pump_kex_init(st),
        State::Kex { algos, kex } => pump_kex(st, algos, kex),
        State::NewKeys { algos, keys } => pump_new_keys(st, algos, keys),
    }
}

fn pump_kex_init(st: &mut ClientState) -> Result<Pump> {
    st.negotiate_st.state = State::KexInit;
    if st.negotiate_st.our_kex_init.is_none() {
        st.negotiate_st.our_kex_init = Some(send_kex_init(st)?);
        return Ok(Pump::Progress)
    }

    let (Some(ours), Some(theirs)) = (&st.negotiate_st.our_kex_init, &st.negotiate_st.their_kex_init)
        else { return Ok(Pump::Pending) };

    let negotiated = negotiate_algos(&ours.lists, &theirs.lists)?;
    let algos = lookup_algos(&st.config, &negotiated)?;

    // RFC 4253, section 7: if the server guessed the algorithms wrong, the packet it sent after
    // its KEXINIT must be ignored
    let guessed_wrong = theirs.first_kex_packet_follows && (
        theirs.lists.kex.first() != Some(&negotiated.kex) ||
        theirs.lists.server_pubkey.first() != Some(&negotiated.server_pubkey)
    );

    let exchange = KexInitExchange {
        client_kex_init: ours.payload.clone(),
        server_kex_init: theirs.payload.clone(),
        algos: negotiated,
    };

    if guessed_wrong {
        log::debug!("server guessed the kex algorithms wrong, its next kex packet will be ignored");
        st.negotiate_st.ignore_guessed_packet = true;
    }

    let params = KexParams { gex_bits: st.config.gex_bits };
    let kex = (algos.kex.make_kex)(&params, &mut *st.rng)?;
    st.negotiate_st.exchange = Some(exchange);
    st.negotiate_st.state = State::Kex { algos, kex };
    Ok(Pump::Progress)
}

fn pump_kex(st: &mut ClientState, algos: Algos, mut kex: Box<dyn Kex + Send>) -> Result<Pump> {
    if let Some(payload) = kex.send_packet()? {
        st.codec.send_pipe.feed_packet(&payload)?;
        st.negotiate_st.state = State::Kex { algos, kex };
        return Ok(Pump::Progress)
    }

    let (Some(their_ident), Some(ours), Some(theirs)) = (
        st.their_ident.as_ref(),
        st.negotiate_st.our_kex_init.as_ref(),
        st.negotiate_st.their_kex_init.as_ref(),
    ) else {
        return Err(Error::Protocol("key exchange is running without both SSH_MSG_KEXINIT"))
    };

    let kex_input = KexInput {
        client_ident: &st.our_ident,
        server_ident: their_ident,
        client_kex_init: &ours.payload,
        server_kex_init: &theirs.payload,
    };
    let kex_output = match kex.poll(kex_input) {
        Poll::Ready(res) => res?,
        Poll::Pending => {
            st.negotiate_st.state = State::Kex { algos, kex };
            return Ok(Pump::Pending)
        },
    };
    log::debug!("finished kex");

    let session_id = st.session_id
        .get_or_insert_with(|| kex_output.exchange_hash.clone())
        .clone();

    let pubkey = Pubkey::decode(kex_output.server_pubkey.clone())?;
    algos.server_pubkey.verify(
        &pubkey, &kex_output.exchange_hash, kex_output.server_exchange_hash_sign.clone())?;
    log::debug!("server pubkey {} ({}) signed the exchange hash", pubkey, pubkey.fingerprint());

    if let Some(accept_host_key) = st.config.accept_host_key.as_ref() {
        if !accept_host_key(&pubkey) {
            log::debug!("server pubkey was rejected");
            return Err(Error::HostKeyRejected)
        }
    }
    st.negotiate_st.server_pubkey = Some(pubkey);

    let key_algos = KeyAlgos {
        cipher_cts: algos.cipher_cts,
        cipher_stc: algos.cipher_stc,
        mac_cts: algos.mac_cts,
        mac_stc: algos.mac_stc,
    };
    let keys = SessionKeys::derive(
        &|data: &[u8]| kex.compute_hash(data),
        &kex_output.shared_secret,
        &kex_output.exchange_hash,
        &session_id,
        &key_algos,
    );

    st.negotiate_st.state = State::NewKeys { algos, keys };
    Ok(Pump::Progress)
}

fn pump_new_keys(st: &mut ClientState, algos: Algos, keys: SessionKeys) -> Result<Pump> {
    if !st.negotiate_st.new_keys_sent {
        send_new_keys(st, &algos, &keys)?;
        st.negotiate_st.new_keys_sent = true;
        st.negotiate_st.state = State::NewKeys { algos, keys };
        return Ok(Pump::Progress)
    }

    if !st.negotiate_st.new_keys_recvd {
        st.negotiate_st.state = State::NewKeys { algos, keys };
        return Ok(Pump::Pending)
    }

    finish_kex(st);
    Ok(Pump::Progress)
}

fn finish_kex(st: &mut ClientState) {
    let mark = KexMark {
        sent_bytes: st.codec.send_pipe.sent_bytes(),
        recvd_bytes: st.codec.recv_pipe.recvd_bytes(),
        time: Instant::now(),
    };

    let rekey_deadline = tokio::time::Instant::from_std(mark.time)
        .checked_add(st.config.rekey_after_duration);

    let neg = &mut st.negotiate_st;
    neg.rekey_timer = rekey_deadline.map(|deadline| Box::pin(tokio::time::sleep_until(deadline)));
    neg.state = State::Idle;
    neg.our_kex_init = None;
    neg.their_kex_init = None;
    neg.ignore_guessed_packet = false;
    neg.new_keys_sent = false;
    neg.new_keys_recvd = false;
    neg.last_kex = Some(mark);
    neg.last_exchange = neg.exchange.take();
    neg.kex_count += 1;
    for done_tx in neg.done_txs.drain(..) {
        let _ = done_tx.send(());
    }
    log::debug!("key exchange #{} is complete", neg.kex_count);
}

fn is_rekey_due(st: &ClientState) -> bool {
    let Some(mark) = st.negotiate_st.last_kex.as_ref() else { return false };
    let bytes_limit = st.config.rekey_after_bytes.min(REKEY_AFTER_BYTES_MAX);
    st.negotiate_st.rekey_requested
        || st.codec.send_pipe.sent_bytes() - mark.sent_bytes >= bytes_limit
        || st.codec.recv_pipe.recvd_bytes() - mark.recvd_bytes >= bytes_limit
        || mark.time.elapsed() >= st.config.rekey_after_duration
}

/// Requests a key re-exchange; `done_tx` is notified when the next exchange completes.
pub(super) fn start_kex(st: &mut ClientState, done_tx: oneshot::Sender<()>) {
    st.negotiate_st.done_txs.push(done_tx);
    if matches!(st.negotiate_st.state, State::Idle) {
        st.negotiate_st.rekey_requested = true;
    }
    client_state::wakeup_client(st);
}

/// True if no key exchange is running, so that other messages may be sent.
pub(super) fn is_ready(st: &ClientState) -> bool {
    matches!(st.negotiate_st.state, State::Idle)
}

pub(super) fn last_exchange(st: &ClientState) -> Option<&KexInitExchange> {
    st.negotiate_st.last_exchange.as_ref()
}

pub(super) fn server_pubkey(st: &ClientState) -> Option<&Pubkey> {
    st.negotiate_st.server_pubkey.as_ref()
}

pub(super) fn kex_count(st: &ClientState) -> u32 {
    st.negotiate_st.kex_count
}

pub(super) fn recv_negotiate_packet(
    st: &mut ClientState,
    msg_id: u8,
    payload: &mut PacketDecode,
) -> ResultRecvState {
    match msg_id {
        msg::KEXINIT => recv_kex_init(st, payload),
        msg::NEWKEYS => recv_new_keys(st),
        _ => Err(Error::UnexpectedMessage(msg_id)),
    }
}

pub(super) fn recv_kex_packet(
    st: &mut ClientState,
    msg_id: u8,
    payload: &mut PacketDecode,
) -> ResultRecvState {
    if st.negotiate_st.ignore_guessed_packet {
        log::debug!("ignoring kex packet {} that followed a wrong guess", msg_id);
        st.negotiate_st.ignore_guessed_packet = false;
        return Ok(None)
    }

    match &mut st.negotiate_st.state {
        State::Kex { kex, .. } => {
            kex.recv_packet(msg_id, payload)?;
            Ok(None)
        },
        _ => Err(Error::UnexpectedMessage(msg_id)),
    }
}

fn send_kex_init(st: &mut ClientState) -> Result<OurKexInit> {
    let lists = our_algo_lists(&st.config);

    let mut cookie = [0; 16];
    st.rng.try_fill_bytes(&mut cookie)
        .map_err(|_| Error::Random("could not generate random cookie"))?;

    let payload = encode_kex_init(&cookie, &lists);
    st.codec.send_pipe.feed_packet(&payload)?;
    log::debug!("sending SSH_MSG_KEXINIT");

    Ok(OurKexInit { payload, lists })
}

fn recv_kex_init(st: &mut ClientState, payload: &mut PacketDecode) -> ResultRecvState {
    let raw_payload = Bytes::copy_from_slice(payload.as_original_bytes());
    let (lists, first_kex_packet_follows) = decode_kex_init(payload)?;
    log::debug!("received SSH_MSG_KEXINIT: {:?}, first_kex_packet_follows {}",
        lists, first_kex_packet_follows);

    let can_start = matches!(st.negotiate_st.state, State::Idle | State::KexInit);
    if !can_start || st.negotiate_st.their_kex_init.is_some() {
        return Err(Error::UnexpectedMessage(msg::KEXINIT))
    }

    st.negotiate_st.their_kex_init = Some(TheirKexInit {
        payload: raw_payload,
        lists,
        first_kex_packet_follows,
    });
    st.negotiate_st.state = State::KexInit;
    Ok(None)
}

fn send_new_keys(st: &mut ClientState, algos: &Algos, keys: &SessionKeys) -> Result<()> {
    let encrypt = (algos.cipher_cts.make_encrypt)(&keys.key_cts, &keys.iv_cts)?;
    let mac = (algos.mac_cts.make_mac)(&keys.mac_cts)?;
    let compress = (algos.compress_cts.make_compress)();

    let mut payload = PacketEncode::new();
    payload.put_u8(msg::NEWKEYS);
    st.codec.send_pipe.feed_packet(&payload.finish())?;

    // everything fed after NEWKEYS uses the new keys
    st.codec.send_pipe.set_encrypt(encrypt, mac, algos.cipher_cts.block_len, algos.mac_cts.tag_len);
    st.codec.send_pipe.set_compress(compress);
    log::debug!("sent SSH_MSG_NEWKEYS and applied new keys");
    Ok(())
}

fn recv_new_keys(st: &mut ClientState) -> ResultRecvState {
    let State::NewKeys { algos, keys } = &st.negotiate_st.state else {
        return Err(Error::UnexpectedMessage(msg::NEWKEYS))
    };
    if st.negotiate_st.new_keys_recvd {
        return Err(Error::UnexpectedMessage(msg::NEWKEYS))
    }

    let decrypt = (algos.cipher_stc.make_decrypt)(&keys.key_stc, &keys.iv_stc)?;
    let mac = (algos.mac_stc.make_mac)(&keys.mac_stc)?;
    let decompress = (algos.compress_stc.make_decompress)();
    st.codec.recv_pipe.set_decrypt(decrypt, mac, algos.cipher_stc.block_len, algos.mac_stc.tag_len);
    st.codec.recv_pipe.set_decompress(decompress);

    log::debug!("received SSH_MSG_NEWKEYS and applied new keys");
    st.negotiate_st.new_keys_recvd = true;
    Ok(None)
}

fn our_algo_lists(config: &ClientConfig) -> AlgoLists {
    fn names<A: NamedAlgo + ?Sized>(algos: &[&'static A]) -> Vec<String> {
        algos.iter().map(|algo| algo.name().into()).collect()
    }

    AlgoLists {
        kex: names(&config.kex_algos),
        server_pubkey: names(&config.server_pubkey_algos),
        cipher_cts: names(&config.cipher_algos),
        cipher_stc: names(&config.cipher_algos),
        mac_cts: names(&config.mac_algos),
        mac_stc: names(&config.mac_algos),
        compress_cts: names(&config.compress_algos),
        compress_stc: names(&config.compress_algos),
    }
}

fn lookup_algos(config: &ClientConfig, negotiated: &NegotiatedAlgos) -> Result<Algos> {
    fn lookup<A: NamedAlgo + ?Sized>(algos: &[&'static A], name: &str) -> Result<&'static A> {
        algos.iter().copied()
            .find(|algo| algo.name() == name)
            .ok_or_else(|| Error::UnsupportedAlgo(name.into()))
    }

    Ok(Algos {
        kex: lookup(&config.kex_algos, &negotiated.kex)?,
        server_pubkey: lookup(&config.server_pubkey_algos, &negotiated.server_pubkey)?,
        cipher_cts: lookup(&config.cipher_algos, &negotiated.cipher_cts)?,
        cipher_stc: lookup(&config.cipher_algos, &negotiated.cipher_stc)?,
        mac_cts: lookup(&config.mac_algos, &negotiated.mac_cts)?,
        mac_stc: lookup(&config.mac_algos, &negotiated.mac_stc)?,
        compress_cts: lookup(&config.compress_algos, &negotiated.compress_cts)?,
        compress_stc: lookup(&config.compress_algos, &negotiated.compress_stc)?,
    })
}

/// Encodes `SSH_MSG_KEXINIT` (RFC 4253, section 7.1).
pub(super) fn encode_kex_init(cookie: &[u8; 16], lists: &AlgoLists) -> Bytes {
    fn put_list(payload: &mut PacketEncode, names: &[String]) {
        let names: Vec<&str> = names.iter().map(|name| name.as_str()).collect();
        payload.put_name_list(&names);
    }

    let mut payload = PacketEncode::new();
    payload.put_u8(msg::KEXINIT);
    payload.put_raw(cookie);
    put_list(&mut payload, &lists.kex);
    put_list(&mut payload, &lists.server_pubkey);
    put_list(&mut payload, &lists.cipher_cts);
    put_list(&mut payload, &lists.cipher_stc);
    put_list(&mut payload, &lists.mac_cts);
    put_list(&mut payload, &lists.mac_stc);
    put_list(&mut payload, &lists.compress_cts);
    put_list(&mut payload, &lists.compress_stc);
    payload.put_name_list(&[]); // languages_client_to_server
    payload.put_name_list(&[]); // languages_server_to_client
    payload.put_bool(false); // first_kex_packet_follows
    payload.put_u32(0); // reserved
    payload.finish()
}

/// Decodes the body of `SSH_MSG_KEXINIT` after the message id.
pub(super) fn decode_kex_init(payload: &mut PacketDecode) -> Result<(AlgoLists, bool)> {
    payload.skip(16)?; // cookie
    let lists = AlgoLists {
        kex: payload.get_name_list()?,
        server_pubkey: payload.get_name_list()?,
        cipher_cts: payload.get_name_list()?,
        cipher_stc: payload.get_name_list()?,
        mac_cts: payload.get_name_list()?,
        mac_stc: payload.get_name_list()?,
        compress_cts: payload.get_name_list()?,
        compress_stc: payload.get_name_list()?,
    };
    payload.get_name_list()?; // languages_client_to_server
    payload.get_name_list()?; // languages_server_to_client
    let first_kex_packet_follows = payload.get_bool()?;
    payload.get_u32()?; // reserved
    Ok((lists, first_kex_packet_follows))
}

trait NamedAlgo { fn name(&self) -> &'static str; }
impl NamedAlgo for KexAlgo { fn name(&self) -> &'static str { self.name } }
impl NamedAlgo for PubkeyAlgo { fn name(&self) -> &'static str { self.name } }
impl NamedAlgo for CipherAlgo { fn name(&self) -> &'static str { self.name } }
impl NamedAlgo for MacAlgo { fn name(&self) -> &'static str { self.name } }
impl NamedAlgo for CompressAlgo { fn name(&self) -> &'static str { self.name } }

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    fn lists(names: &[&str]) -> AlgoLists {
        let names = strings(names);
        AlgoLists {
            kex: names.clone(),
            server_pubkey: names.clone(),
            cipher_cts: names.clone(),
            cipher_stc: names.clone(),
            mac_cts: names.clone(),
            mac_stc: names.clone(),
            compress_cts: names.clone(),
            compress_stc: names,
        }
    }

    #[test]
    fn test_select_prefers_client_order() {
        assert_eq!(select_algo(&["a", "b", "c"], &["c", "b"]), Some("b"));
        assert_eq!(select_algo(&["a", "b", "c"], &["c"]), Some("c"));
        assert_eq!(select_algo(&["a"], &["b"]), None);
        assert_eq!(select_algo::<&str, &str>(&[], &["a"]), None);
    }

    #[test]
    fn test_negotiate_all_categories() {
        let ours = lists(&["x", "y"]);
        let mut theirs = lists(&["y", "x"]);
        theirs.mac_stc = strings(&["y"]);

        let algos = negotiate_algos(&ours, &theirs).unwrap();
        assert_eq!(algos.kex, "x");
        assert_eq!(algos.mac_cts, "x");
        assert_eq!(algos.mac_stc, "y");
    }

    #[test]
    fn test_negotiate_error_carries_lists() {
        let ours = lists(&["x"]);
        let mut theirs = lists(&["x"]);
        theirs.cipher_stc = strings(&["z", "w"]);

        match negotiate_algos(&ours, &theirs) {
            Err(Error::AlgoNegotiate(err)) => {
                assert_eq!(err.algo_name, "cipher server-to-client");
                assert_eq!(err.our_algos, strings(&["x"]));
                assert_eq!(err.their_algos, strings(&["z", "w"]));
            },
            res => panic!("unexpected result {:?}", res),
        }
    }

    #[test]
    fn test_kex_init_layout() {
        let mut ours = lists(&["a", "b"]);
        ours.compress_stc = Vec::new();
        let payload = encode_kex_init(&[7; 16], &ours);

        let mut decode = PacketDecode::new(payload);
        assert_eq!(decode.get_u8().unwrap(), msg::KEXINIT);
        let (decoded, first_kex_packet_follows) = decode_kex_init(&mut decode).unwrap();
        assert_eq!(decoded, ours);
        assert!(!first_kex_packet_follows);
        assert_eq!(decode.remaining_len(), 0);
    }

    #[test]
    fn test_default_config_advertises_fixed_lists() {
        let lists = our_algo_lists(&ClientConfig::default());
        assert_eq!(lists.kex, strings(&[
            "diffie-hellman-group-exchange-sha256", "diffie-hellman-group-exchange-sha1",
            "diffie-hellman-group14-sha1", "diffie-hellman-group1-sha1",
        ]));
        assert_eq!(lists.cipher_cts, strings(&[
            "aes256-ctr", "aes192-ctr", "aes128-ctr",
            "aes256-cbc", "aes192-cbc", "aes128-cbc", "3des-cbc",
        ]));
        assert_eq!(lists.mac_stc, strings(&[
            "hmac-sha2-512", "hmac-sha2-256", "hmac-sha1-96", "hmac-sha1",
        ]));
        assert_eq!(lists.compress_cts, strings(&["none"]));
        assert_eq!(lists.server_pubkey, strings(&[
            "rsa-sha2-512", "rsa-sha2-256",
            "ecdsa-sha2-nistp256", "ecdsa-sha2-nistp384", "ecdsa-sha2-nistp521",
            "ssh-rsa", "ssh-dss",
        ]));
    }
}
