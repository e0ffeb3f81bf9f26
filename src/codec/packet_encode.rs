use bytes::{BufMut as _, Bytes, BytesMut};
use num_bigint_dig::BigUint;

/// Encoder of SSH messages (low level API).
///
/// Writes the data types of RFC 4251, section 5 into a growable [`BytesMut`].
#[derive(Debug, Clone)]
pub struct PacketEncode {
    buf: BytesMut,
}

impl PacketEncode {
    /// Creates an empty encoder.
    pub fn new() -> PacketEncode {
        PacketEncode { buf: BytesMut::new() }
    }

    /// Creates an empty encoder that can hold `capacity` bytes without reallocating.
    pub fn with_capacity(capacity: usize) -> PacketEncode {
        PacketEncode { buf: BytesMut::with_capacity(capacity) }
    }

    /// Encode a `byte`.
    pub fn put_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    /// Encode a `boolean`.
    pub fn put_bool(&mut self, value: bool) {
        self.buf.put_u8(value as u8);
    }

    /// Encode a `uint32`.
    pub fn put_u32(&mut self, value: u32) {
        self.buf.put_u32(value);
    }

    /// Encode a `string` of arbitrary bytes.
    pub fn put_bytes(&mut self, value: &[u8]) {
        self.buf.reserve(4 + value.len());
        self.buf.put_u32(value.len() as u32);
        self.buf.put_slice(value);
    }

    /// Encode a `string` in UTF-8.
    pub fn put_str(&mut self, value: &str) {
        self.put_bytes(value.as_bytes())
    }

    /// Encode a `name-list`.
    pub fn put_name_list(&mut self, names: &[&str]) {
        if names.is_empty() {
            self.buf.put_u32(0);
            return;
        }

        let names_len = names.iter().map(|name| name.len()).sum::<usize>() + names.len() - 1;
        self.buf.reserve(4 + names_len);
        self.buf.put_u32(names_len as u32);
        for (i, name) in names.iter().enumerate() {
            if i != 0 {
                self.buf.put_u8(b',');
            }
            self.buf.put_slice(name.as_bytes());
        }
    }

    /// Encode a non-negative `mpint`.
    ///
    /// The encoding is minimal: zero is an empty string and a single `0x00` byte is prepended
    /// only when the most significant bit of the magnitude is set.
    pub fn put_biguint(&mut self, value: &BigUint) {
        let bytes_vec = value.to_bytes_be();
        let mut bytes = bytes_vec.as_slice();
        while let [0, rest @ ..] = bytes {
            bytes = rest;
        }

        let sign_byte = matches!(bytes.first(), Some(&b) if b & 0x80 != 0);
        let len = bytes.len() + sign_byte as usize;
        self.buf.reserve(4 + len);
        self.buf.put_u32(len as u32);
        if sign_byte {
            self.buf.put_u8(0);
        }
        self.buf.put_slice(bytes);
    }

    /// Append raw bytes to the buffer.
    pub fn put_raw(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }

    /// Number of bytes encoded so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if nothing was encoded yet.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Unwraps the internal bytes.
    pub fn into_bytes(self) -> BytesMut {
        self.buf
    }

    /// Unwraps and freezes the internal bytes.
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

impl Default for PacketEncode {
    fn default() -> Self { Self::new() }
}
