use bytes::Bytes;
use hex_literal::hex;
use num_bigint_dig::BigUint;
use sshengine::{Error, PacketDecode, PacketEncode};

fn encode(f: impl FnOnce(&mut PacketEncode)) -> Bytes {
    let mut encode = PacketEncode::new();
    f(&mut encode);
    encode.finish()
}

// examples from RFC 4251, section 5
#[test] fn test_encode_mpint() {
    let mpint = |hex_value: &[u8]| encode(|e| e.put_biguint(&BigUint::from_bytes_be(hex_value)));
    assert_eq!(mpint(&[]).as_ref(), hex!("00000000"));
    assert_eq!(mpint(&hex!("09a378f9b2e332a7")).as_ref(), hex!("00000008 09a378f9b2e332a7"));
    assert_eq!(mpint(&hex!("80")).as_ref(), hex!("00000002 0080"));
    assert_eq!(mpint(&hex!("0000 7f")).as_ref(), hex!("00000001 7f"));
}

#[test] fn test_decode_mpint() {
    let mut decode = PacketDecode::new(Bytes::from_static(&hex!("00000002 0080 00000000")));
    assert_eq!(decode.get_biguint().unwrap(), BigUint::from(0x80u32));
    assert_eq!(decode.get_biguint().unwrap(), BigUint::from(0u32));
    assert_eq!(decode.remaining_len(), 0);

    let mut negative = PacketDecode::new(Bytes::from_static(&hex!("00000002 edcc")));
    assert!(matches!(negative.get_biguint(), Err(Error::Decode(_))));
}

#[test] fn test_name_list() {
    assert_eq!(encode(|e| e.put_name_list(&[])).as_ref(), hex!("00000000"));
    assert_eq!(encode(|e| e.put_name_list(&["zlib"])).as_ref(), hex!("00000004 7a6c6962"));
    assert_eq!(encode(|e| e.put_name_list(&["zlib", "none"])).as_ref(),
        hex!("00000009 7a6c69622c6e6f6e65"));

    let mut decode = PacketDecode::new(Bytes::from_static(&hex!("00000009 7a6c69622c6e6f6e65 00000000")));
    assert_eq!(decode.get_name_list().unwrap(), vec!["zlib".to_string(), "none".to_string()]);
    assert!(decode.get_name_list().unwrap().is_empty());
}

#[test] fn test_message_fields() {
    let payload = encode(|e| {
        e.put_u8(94);
        e.put_u32(0xdeadbeef);
        e.put_bool(true);
        e.put_str("exit-status");
        e.put_bytes(b"\x00\xff");
    });
    assert_eq!(payload.as_ref(), &hex!(
        "5e deadbeef 01 0000000b 657869742d737461747573 00000002 00ff")[..]);

    let mut decode = PacketDecode::new(payload);
    assert_eq!(decode.get_u8().unwrap(), 94);
    assert_eq!(decode.get_u32().unwrap(), 0xdeadbeef);
    assert!(decode.get_bool().unwrap());
    assert_eq!(decode.get_string().unwrap(), "exit-status");
    assert_eq!(decode.get_bytes().unwrap().as_ref(), b"\x00\xff");
    assert!(matches!(decode.get_u8(), Err(Error::Decode(_))));
}

#[test] fn test_decode_truncated_string() {
    let mut decode = PacketDecode::new(Bytes::from_static(&hex!("00000010 616263")));
    assert!(matches!(decode.get_bytes(), Err(Error::Decode(_))));
}

#[test] fn test_decode_invalid_utf8() {
    let mut decode = PacketDecode::new(Bytes::from_static(&hex!("00000002 c328")));
    assert!(matches!(decode.get_string(), Err(Error::Decode(_))));
}

/// A single field of an SSH message, as laid out in RFC 4251, section 5.
#[derive(Debug, Clone, PartialEq)]
enum Field {
    Byte(u8),
    Bool(bool),
    U32(u32),
    Str(String),
    Blob(Bytes),
    Names(Vec<String>),
    Mpint(BigUint),
}

fn string(value: &str) -> Field {
    Field::Str(value.into())
}

fn blob(value: &[u8]) -> Field {
    Field::Blob(Bytes::copy_from_slice(value))
}

fn names(values: &[&str]) -> Field {
    Field::Names(values.iter().map(|value| value.to_string()).collect())
}

fn encode_message(msg_id: u8, fields: &[Field]) -> Bytes {
    encode(|e| {
        e.put_u8(msg_id);
        for field in fields {
            match field {
                Field::Byte(value) => e.put_u8(*value),
                Field::Bool(value) => e.put_bool(*value),
                Field::U32(value) => e.put_u32(*value),
                Field::Str(value) => e.put_str(value),
                Field::Blob(value) => e.put_bytes(value),
                Field::Names(values) => {
                    let values: Vec<&str> = values.iter().map(|value| value.as_str()).collect();
                    e.put_name_list(&values)
                },
                Field::Mpint(value) => e.put_biguint(value),
            }
        }
    })
}

/// Encodes the message, decodes it field by field and checks that nothing was lost.
fn assert_round_trip(msg_id: u8, fields: &[Field]) {
    let mut decode = PacketDecode::new(encode_message(msg_id, fields));
    assert_eq!(decode.get_u8().unwrap(), msg_id);
    let decoded: Vec<Field> = fields.iter().map(|field| match field {
        Field::Byte(_) => Field::Byte(decode.get_u8().unwrap()),
        Field::Bool(_) => Field::Bool(decode.get_bool().unwrap()),
        Field::U32(_) => Field::U32(decode.get_u32().unwrap()),
        Field::Str(_) => Field::Str(decode.get_string().unwrap()),
        Field::Blob(_) => Field::Blob(decode.get_bytes().unwrap()),
        Field::Names(_) => Field::Names(decode.get_name_list().unwrap()),
        Field::Mpint(_) => Field::Mpint(decode.get_biguint().unwrap()),
    }).collect();
    assert_eq!(decoded, fields);
    assert_eq!(decode.remaining_len(), 0);
}

fn big_mpint() -> Field {
    // the top bit is set, so the encoding needs a leading zero byte
    Field::Mpint(BigUint::from_bytes_be(&[0xff; 256]))
}

#[test] fn test_round_trip_userauth_request() {
    // SSH_MSG_USERAUTH_REQUEST with "password" (RFC 4252, section 8)
    assert_round_trip(50, &[string("alice"), string("ssh-connection"), string("password"),
        Field::Bool(false), string("secret")]);
    assert_round_trip(50, &[string(""), string("ssh-connection"), string("password"),
        Field::Bool(false), string("")]);

    // SSH_MSG_USERAUTH_REQUEST with "publickey" (RFC 4252, section 7)
    assert_round_trip(50, &[string("alice"), string("ssh-connection"), string("publickey"),
        Field::Bool(true), string("ecdsa-sha2-nistp256"), blob(&[0x42; 1000]), blob(&[0xff; 64])]);
    assert_round_trip(50, &[string("alice"), string("ssh-connection"), string("publickey"),
        Field::Bool(false), string(""), blob(&[])]);
}

#[test] fn test_round_trip_userauth_info() {
    // SSH_MSG_USERAUTH_INFO_REQUEST (RFC 4256, section 3.2)
    assert_round_trip(60, &[string("Login"), string("Enter the code"), string(""), Field::U32(2),
        string("Code: "), Field::Bool(true), string("PIN: "), Field::Bool(false)]);
    assert_round_trip(60, &[string(""), string(""), string(""), Field::U32(0)]);

    // SSH_MSG_USERAUTH_INFO_RESPONSE (RFC 4256, section 3.4)
    assert_round_trip(61, &[Field::U32(2), string("123456"), string("\u{1f511} ünïcode")]);
    assert_round_trip(61, &[Field::U32(0)]);
}

#[test] fn test_round_trip_channel_open() {
    // SSH_MSG_CHANNEL_OPEN "direct-tcpip" (RFC 4254, section 7.2)
    assert_round_trip(90, &[string("direct-tcpip"), Field::U32(0), Field::U32(u32::MAX),
        Field::U32(u32::MAX), string("db.internal"), Field::U32(5432), string("127.0.0.1"), Field::U32(0)]);
    assert_round_trip(90, &[string("session"), Field::U32(u32::MAX), Field::U32(0), Field::U32(0)]);

    // SSH_MSG_CHANNEL_OPEN_CONFIRMATION
    assert_round_trip(91, &[Field::U32(3), Field::U32(u32::MAX), Field::U32(0), Field::U32(u32::MAX)]);

    // SSH_MSG_CHANNEL_OPEN_FAILURE
    assert_round_trip(92, &[Field::U32(3), Field::U32(2), string("connection refused"), string("en")]);
    assert_round_trip(92, &[Field::U32(u32::MAX), Field::U32(u32::MAX), string(""), string("")]);
}

#[test] fn test_round_trip_channel_data() {
    // SSH_MSG_CHANNEL_WINDOW_ADJUST
    assert_round_trip(93, &[Field::U32(0), Field::U32(u32::MAX)]);
    assert_round_trip(93, &[Field::U32(u32::MAX), Field::U32(0)]);

    // SSH_MSG_CHANNEL_DATA
    assert_round_trip(94, &[Field::U32(1000), blob(&[0; 32 * 1024])]);
    assert_round_trip(94, &[Field::U32(1000), blob(&[])]);

    // SSH_MSG_CHANNEL_EXTENDED_DATA with SSH_EXTENDED_DATA_STDERR
    assert_round_trip(95, &[Field::U32(1000), Field::U32(1), blob(b"error\n")]);
    assert_round_trip(95, &[Field::U32(0), Field::U32(u32::MAX), blob(&[])]);
}

#[test] fn test_round_trip_channel_request() {
    // SSH_MSG_CHANNEL_REQUEST "exec" and "exit-signal" (RFC 4254, sections 6.5 and 6.10)
    assert_round_trip(98, &[Field::U32(1000), string("exec"), Field::Bool(true), blob(b"ls -la")]);
    assert_round_trip(98, &[Field::U32(1000), string("exec"), Field::Bool(true), blob(&[])]);
    assert_round_trip(98, &[Field::U32(0), string("exit-signal"), Field::Bool(false),
        string("SEGV"), Field::Bool(true), string(""), string("")]);
    assert_round_trip(98, &[Field::U32(u32::MAX), string("exit-status"), Field::Bool(false),
        Field::U32(u32::MAX)]);
}

#[test] fn test_round_trip_disconnect() {
    // SSH_MSG_DISCONNECT (RFC 4253, section 11.1)
    assert_round_trip(1, &[Field::U32(11), string("bye"), string("en")]);
    assert_round_trip(1, &[Field::U32(u32::MAX), string(""), string("")]);
}

#[test] fn test_round_trip_kexinit() {
    // SSH_MSG_KEXINIT (RFC 4253, section 7.1), the cookie is 16 raw bytes
    let cookie: Vec<Field> = (0..16).map(Field::Byte).collect();
    let mut fields = cookie.clone();
    fields.extend([
        names(&["curve25519-sha256", "diffie-hellman-group14-sha1"]),
        names(&["ssh-ed25519"]),
        names(&["aes128-ctr"]), names(&["aes128-ctr"]),
        names(&["hmac-sha2-256"]), names(&["hmac-sha2-256"]),
        names(&["none"]), names(&["none"]),
        names(&[]), names(&[]),
        Field::Bool(false), Field::U32(0),
    ]);
    assert_round_trip(20, &fields);

    let mut empty = cookie;
    empty.extend(std::iter::repeat(names(&[])).take(10));
    empty.extend([Field::Bool(true), Field::U32(u32::MAX)]);
    assert_round_trip(20, &empty);
}

#[test] fn test_round_trip_kexdh() {
    // SSH_MSG_KEXDH_INIT and SSH_MSG_KEXDH_REPLY (RFC 4253, section 8)
    assert_round_trip(30, &[big_mpint()]);
    assert_round_trip(30, &[Field::Mpint(BigUint::from(0u32))]);
    assert_round_trip(31, &[blob(&[0x17; 300]), big_mpint(), blob(&[0x5a; 80])]);
    assert_round_trip(31, &[blob(&[]), Field::Mpint(BigUint::from(1u32)), blob(&[])]);
}

#[test] fn test_round_trip_kex_dh_gex() {
    // SSH_MSG_KEX_DH_GEX_REQUEST and SSH_MSG_KEX_DH_GEX_GROUP (RFC 4419, section 5)
    assert_round_trip(34, &[Field::U32(1024), Field::U32(2048), Field::U32(8192)]);
    assert_round_trip(34, &[Field::U32(0), Field::U32(0), Field::U32(u32::MAX)]);
    assert_round_trip(31, &[big_mpint(), Field::Mpint(BigUint::from(2u32))]);
    assert_round_trip(31, &[Field::Mpint(BigUint::from(0u32)), Field::Mpint(BigUint::from(0u32))]);
}
