use bytes::{Buf as _, BufMut as _, BytesMut};
use rand::{RngCore as _, SeedableRng as _};
use rand_chacha::ChaCha8Rng;
use crate::{Error, Result};
use crate::cipher::{self, Encrypt};
use crate::compress::{self, Compress};
use crate::mac::{self, Mac};
use crate::util::CryptoRngCore;

/// Outbound half of the connection: turns payloads into encrypted packets.
///
/// All packets sent on the connection go through the single buffer of this pipe, which is only
/// drained by the task that drives the client, so packets can never interleave on the wire.
pub(crate) struct SendPipe {
    buf: BytesMut,
    encrypt: Box<dyn Encrypt + Send>,
    mac: Box<dyn Mac + Send>,
    compress: Box<dyn Compress + Send>,
    block_len: usize,
    tag_len: usize,
    packet_seq: u32,
    sent_bytes: u64,
    padding_rng: ChaCha8Rng,
}

impl SendPipe {
    pub fn new(rng: &mut dyn CryptoRngCore) -> Result<SendPipe> {
        let padding_rng = ChaCha8Rng::from_rng(rng.as_rngcore())
            .map_err(|_| Error::Random("could not generate seed for padding generator"))?;
        Ok(SendPipe {
            buf: BytesMut::new(),
            encrypt: Box::new(cipher::Identity),
            mac: Box::new(mac::Empty),
            compress: Box::new(compress::Identity),
            block_len: 8,
            tag_len: 0,
            packet_seq: 0,
            sent_bytes: 0,
            padding_rng,
        })
    }

    pub fn feed_ident(&mut self, ident: &[u8]) {
        // RFC 4253, section 4.2
        self.buf.reserve(ident.len() + 2);
        self.buf.put_slice(ident);
        self.buf.put_slice(&b"\r\n"[..]);
    }

    /// Frames, encrypts and signs the payload and returns its sequence number.
    pub fn feed_packet(&mut self, payload: &[u8]) -> Result<u32> {
        log::trace!("feed packet {}, len {}, seq {}",
            payload.first().cloned().unwrap_or(0), payload.len(), self.packet_seq);

        let payload = self.compress.compress(payload)?;
        let padding_len = calculate_padding_len(payload.len(), self.block_len);

        // RFC 4253, section 6
        //
        // packet layout:
        // 4 bytes: `packet_len = 1 + payload_len + padding_len` (u32 big endian)
        // 1 byte: padding_len (u8)
        // `payload_len` bytes: payload
        // `padding_len` bytes: random padding
        // `tag_len` bytes: mac tag

        let packet_begin = self.buf.len();
        let total_len = 5 + payload.len() + padding_len + self.tag_len;
        self.buf.reserve(total_len);
        self.buf.put_u32((1 + payload.len() + padding_len) as u32);
        self.buf.put_u8(padding_len as u8);
        self.buf.put_slice(&payload);
        self.buf.put_bytes(0, padding_len + self.tag_len);

        let packet = &mut self.buf[packet_begin..];
        self.padding_rng.fill_bytes(&mut packet[5 + payload.len()..][..padding_len]);

        let (plaintext, tag) = packet.split_at_mut(5 + payload.len() + padding_len);
        self.mac.sign(self.packet_seq, plaintext, tag);
        self.encrypt.encrypt(plaintext);

        let packet_seq = self.packet_seq;
        self.packet_seq = self.packet_seq.wrapping_add(1);
        self.sent_bytes += total_len as u64;
        Ok(packet_seq)
    }

    /// Switches to new outbound keys. Called right after our NEWKEYS was fed into the pipe.
    pub fn set_encrypt(
        &mut self,
        encrypt: Box<dyn Encrypt + Send>,
        mac: Box<dyn Mac + Send>,
        block_len: usize,
        tag_len: usize,
    ) {
        self.encrypt = encrypt;
        self.mac = mac;
        self.block_len = block_len.max(8);
        self.tag_len = tag_len;
    }

    pub fn set_compress(&mut self, compress: Box<dyn Compress + Send>) {
        self.compress = compress;
    }

    pub fn peek_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn consume_bytes(&mut self, len: usize) {
        self.buf.advance(len);
    }

    /// Sequence number of the next packet.
    pub fn packet_seq(&self) -> u32 {
        self.packet_seq
    }

    /// Number of packet bytes fed into the pipe since it was created.
    pub fn sent_bytes(&self) -> u64 {
        self.sent_bytes
    }

    #[cfg(test)]
    pub fn set_packet_seq(&mut self, packet_seq: u32) {
        self.packet_seq = packet_seq;
    }
}

/// Computes the padding for a payload of `payload_len` bytes.
///
/// The padding aligns `5 + payload_len + padding_len` to `block_len`, is at least 4 bytes long
/// and includes two more blocks of random bytes, as long as it stays within 255 bytes.
pub(crate) fn calculate_padding_len(payload_len: usize, block_len: usize) -> usize {
    // RFC 4253, section 6
    let min_padded_len = 5 + payload_len + 4;
    let padded_len = (min_padded_len + block_len - 1) / block_len * block_len;
    let mut padding_len = padded_len - payload_len - 5 + 2 * block_len;
    while padding_len > 255 {
        padding_len -= block_len;
    }
    padding_len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_send() {
        fn assert_is_send<T: Send>() {}
        assert_is_send::<SendPipe>()
    }

    #[test]
    fn test_calculate_padding_len() {
        for &block_len in &[8, 16, 32, 64, 128] {
            for payload_len in 0..600 {
                let padding_len = calculate_padding_len(payload_len, block_len);
                assert_eq!((5 + payload_len + padding_len) % block_len, 0,
                    "block {} payload {}", block_len, payload_len);
                assert!((4..=255).contains(&padding_len),
                    "block {} payload {} padding {}", block_len, payload_len, padding_len);
            }
        }
    }

    #[test]
    fn test_padding_adds_two_blocks() {
        assert_eq!(calculate_padding_len(3, 8), 8 + 16);
        assert_eq!(calculate_padding_len(0, 16), 11 + 32);
    }

    #[test]
    fn test_feed_packet_plaintext() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut pipe = SendPipe::new(&mut rng).unwrap();
        assert_eq!(pipe.feed_packet(b"foo").unwrap(), 0);
        assert_eq!(pipe.feed_packet(b"bar").unwrap(), 1);

        let bytes = pipe.peek_bytes();
        let packet_len = u32::from_be_bytes(bytes[..4].try_into().unwrap()) as usize;
        assert_eq!((4 + packet_len) % 8, 0);
        assert_eq!(bytes[4] as usize, packet_len - 1 - 3);
        assert_eq!(&bytes[5..8], b"foo");
        assert_eq!(pipe.sent_bytes(), bytes.len() as u64);

        let len = bytes.len();
        pipe.consume_bytes(len);
        assert!(pipe.is_empty());
    }

    #[test]
    fn test_packet_seq_wraps() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let mut pipe = SendPipe::new(&mut rng).unwrap();
        pipe.set_packet_seq(u32::MAX);
        assert_eq!(pipe.feed_packet(b"x").unwrap(), u32::MAX);
        assert_eq!(pipe.feed_packet(b"y").unwrap(), 0);
        assert_eq!(pipe.packet_seq(), 1);
    }
}
