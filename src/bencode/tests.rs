use std::collections::BTreeMap;

use bytes::Bytes;

use super::*;

#[test]
fn test_decode_integer() {
    assert_eq!(decode(b"i42e").unwrap(), Value::Integer(42));
    assert_eq!(decode(b"i-42e").unwrap(), Value::Integer(-42));
    assert_eq!(decode(b"i0e").unwrap(), Value::Integer(0));
}

#[test]
fn test_decode_integer_limits() {
    assert_eq!(
        decode(b"i9223372036854775807e").unwrap(),
        Value::Integer(i64::MAX)
    );
    assert_eq!(
        decode(b"i-9223372036854775808e").unwrap(),
        Value::Integer(i64::MIN)
    );
    assert!(matches!(
        decode(b"i9223372036854775808e"),
        Err(BencodeError::InvalidInteger(_))
    ));
    assert!(matches!(
        decode(b"i-9223372036854775809e"),
        Err(BencodeError::InvalidInteger(_))
    ));
}

#[test]
fn test_decode_integer_invalid() {
    assert!(matches!(decode(b"i-0e"), Err(BencodeError::InvalidInteger(_))));
    assert!(matches!(decode(b"i01e"), Err(BencodeError::InvalidInteger(_))));
    assert!(matches!(decode(b"ie"), Err(BencodeError::InvalidInteger(_))));
    assert!(matches!(decode(b"iXe"), Err(BencodeError::InvalidInteger(_))));
    assert!(matches!(decode(b"i42"), Err(BencodeError::UnexpectedEof)));
}

#[test]
fn test_decode_bytes() {
    assert_eq!(
        decode(b"4:spam").unwrap(),
        Value::Bytes(Bytes::from_static(b"spam"))
    );
    assert_eq!(decode(b"0:").unwrap(), Value::Bytes(Bytes::from_static(b"")));
}

#[test]
fn test_decode_bytes_truncated() {
    assert!(matches!(decode(b"2:a"), Err(BencodeError::UnexpectedEof)));
    assert!(matches!(decode(b"4"), Err(BencodeError::UnexpectedEof)));
    assert!(matches!(decode(b"4x:spam"), Err(BencodeError::InvalidLength)));
}

#[test]
fn test_decode_list() {
    let value = decode(b"l4:spami42ee").unwrap();
    let items = value.as_list().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_str(), Some("spam"));
    assert_eq!(items[1].as_integer(), Some(42));
}

#[test]
fn test_decode_dict() {
    let value = decode(b"d3:cow3:moo4:spam4:eggse").unwrap();
    let entries = value.as_dict().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(value.get(b"cow").and_then(|v| v.as_str()), Some("moo"));
}

#[test]
fn test_decode_unterminated() {
    assert!(matches!(decode(b"li1e"), Err(BencodeError::UnexpectedEof)));
    assert!(matches!(decode(b"d1:ai1e"), Err(BencodeError::UnexpectedEof)));
}

#[test]
fn test_decode_non_string_key() {
    assert!(matches!(
        decode(b"di1ei2ee"),
        Err(BencodeError::UnexpectedByte(b'i'))
    ));
}

#[test]
fn test_decode_empty_input() {
    assert!(matches!(decode(b""), Err(BencodeError::UnexpectedEof)));
}

#[test]
fn test_decode_bad_tag() {
    assert!(matches!(decode(b"x"), Err(BencodeError::UnexpectedByte(b'x'))));
}

#[test]
fn test_decode_nesting_limit() {
    let mut data = Vec::new();
    data.extend(std::iter::repeat(b'l').take(70));
    data.extend(std::iter::repeat(b'e').take(70));
    assert!(matches!(decode(&data), Err(BencodeError::NestingTooDeep)));
}

#[test]
fn test_decode_trailing_data() {
    assert!(matches!(decode(b"i42espam"), Err(BencodeError::TrailingData)));
}

#[test]
fn test_decode_prefix_leaves_trailing_data() {
    let (value, used) = decode_prefix(b"4:spamTRAILER").unwrap();
    assert_eq!(value.as_str(), Some("spam"));
    assert_eq!(used, 6);
}

#[test]
fn test_encode_integer() {
    assert_eq!(encode(&Value::Integer(42)), b"i42e");
    assert_eq!(encode(&Value::Integer(-42)), b"i-42e");
    assert_eq!(encode(&Value::Integer(0)), b"i0e");
}

#[test]
fn test_encode_bytes() {
    assert_eq!(encode(&Value::bytes(b"spam")), b"4:spam");
    assert_eq!(encode(&Value::bytes(b"")), b"0:");
}

#[test]
fn test_encode_list() {
    let list = Value::List(vec![Value::string("spam"), Value::Integer(42)]);
    assert_eq!(encode(&list), b"l4:spami42ee");
}

#[test]
fn test_encode_dict_sorts_keys() {
    let mut entries = BTreeMap::new();
    entries.insert(Bytes::from_static(b"spam"), Value::string("eggs"));
    entries.insert(Bytes::from_static(b"cow"), Value::string("moo"));
    assert_eq!(encode(&Value::Dict(entries)), b"d3:cow3:moo4:spam4:eggse");
}

#[test]
fn test_roundtrip_value() {
    let mut inner = BTreeMap::new();
    inner.insert(Bytes::from_static(b"id"), Value::bytes(&[0xAB; 20]));
    let mut entries = BTreeMap::new();
    entries.insert(Bytes::from_static(b"a"), Value::Dict(inner));
    entries.insert(Bytes::from_static(b"q"), Value::string("ping"));
    entries.insert(
        Bytes::from_static(b"list"),
        Value::List(vec![Value::Integer(-7), Value::bytes(b"\x00\xff")]),
    );
    let value = Value::Dict(entries);

    assert_eq!(decode(&encode(&value)).unwrap(), value);
}

#[test]
fn test_roundtrip_bytes() {
    // Sorted-key inputs must re-encode byte-identically; the info-hash of
    // a torrent depends on it.
    let original: &[u8] =
        b"d8:announce15:http://test.com4:infod4:name4:test12:piece lengthi16384eee";
    let decoded = decode(original).unwrap();
    assert_eq!(encode(&decoded), original);
}

#[test]
fn test_non_utf8_bytes_are_opaque() {
    let data = b"3:\xff\x00\xfe";
    let value = decode(data).unwrap();
    assert_eq!(value.as_str(), None);
    assert_eq!(encode(&value), data);
}

#[test]
fn test_value_accessors() {
    let value = Value::Integer(42);
    assert_eq!(value.as_integer(), Some(42));
    assert!(value.as_bytes().is_none());

    let value = Value::string("test");
    assert_eq!(value.as_str(), Some("test"));
    assert!(value.as_integer().is_none());

    let value = Value::List(vec![]);
    assert!(value.as_list().is_some());
    assert!(value.as_dict().is_none());
    assert!(value.into_dict().is_none());
}
