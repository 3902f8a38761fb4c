use crate::*;

fn nested(depth: usize) -> Value {
    let mut v = Value::Int(0);
    for _ in 0..depth {
        v = Value::List(vec![v]);
    }
    v
}

// ============================================================================
//  VALUE TESTS (Happy Path)
// ============================================================================

#[test]
fn test_scalars_roundtrip() -> Result<()> {
    let mut enc = Encoder::new();
    enc.null()?;
    enc.bool(true)?;
    enc.int(i64::MIN)?;
    enc.float(-0.5)?;
    enc.str("héllo")?;
    enc.bytes(&[0, 255, 10])?;

    let bytes = enc.into_bytes()?;
    let mut dec = Decoder::new(&bytes);

    assert_eq!(dec.value()?, Value::Null);
    assert_eq!(dec.value()?, Value::Bool(true));
    assert_eq!(dec.value()?, Value::Int(i64::MIN));
    assert_eq!(dec.value()?, Value::Float(-0.5));
    assert_eq!(dec.value()?, Value::Str("héllo".into()));
    assert_eq!(dec.value()?, Value::Bytes(vec![0, 255, 10]));
    assert_eq!(dec.remaining(), 0);
    Ok(())
}

#[test]
fn test_request_shaped_tree_roundtrip() -> Result<()> {
    let value = Value::Map(vec![
        ("name".into(), Value::Str("id-1".into())),
        ("args".into(), Value::Tuple(vec![Value::Str("*IDN?".into())])),
        ("kwargs".into(), Value::Map(vec![
            ("delay".into(), Value::Float(0.25)),
            ("chunks".into(), Value::List(vec![Value::Bytes(vec![1, 2]), Value::Null])),
        ])),
    ]);

    let bytes = to_bytes(&value)?;
    assert_eq!(from_bytes(&bytes)?, value);
    Ok(())
}

#[test]
fn test_list_and_tuple_stay_distinct() -> Result<()> {
    let list = Value::List(vec![Value::Int(1)]);
    let tuple = Value::Tuple(vec![Value::Int(1)]);

    let list_bytes = to_bytes(&list)?;
    let tuple_bytes = to_bytes(&tuple)?;
    assert_ne!(list_bytes, tuple_bytes);
    assert_eq!(from_bytes(&list_bytes)?, list);
    assert_eq!(from_bytes(&tuple_bytes)?, tuple);
    assert_ne!(list, tuple);
    Ok(())
}

#[test]
fn test_map_preserves_order() -> Result<()> {
    let value = Value::Map(vec![
        ("z".into(), Value::Int(1)),
        ("a".into(), Value::Int(2)),
        ("m".into(), Value::Int(3)),
    ]);
    let decoded = from_bytes(&to_bytes(&value)?)?;
    let keys: Vec<&str> = decoded.as_map().unwrap_or_default().iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(keys, vec!["z", "a", "m"]);
    Ok(())
}

#[test]
fn test_container_length_header() -> Result<()> {
    let bytes = to_bytes(&Value::Tuple(vec![Value::Bool(true), Value::Null]))?;
    assert_eq!(bytes, vec![0x22, 2, 0, 0, 0, 0x01, 0x0E]);
    Ok(())
}

#[test]
fn test_codec_trait_object() -> Result<()> {
    let codec: Box<dyn Codec> = Box::new(PackCodec);
    let value = Value::List(vec![Value::Str("x".into()), Value::Tuple(vec![])]);
    assert_eq!(codec.decode(&codec.encode(&value)?)?, value);
    Ok(())
}

#[test]
fn test_value_accessors() {
    let map = Value::Map(vec![("timeout".into(), Value::Int(2000))]);
    assert_eq!(map.get("timeout").and_then(Value::as_int), Some(2000));
    assert_eq!(map.get("missing"), None);
    assert_eq!(Value::Int(3).as_float(), Some(3.0));
    assert_eq!(Value::Tuple(vec![Value::Null]).as_seq().map(<[Value]>::len), Some(1));
    assert_eq!(Value::from(None::<i64>), Value::Null);
    assert_eq!(Value::from("x").to_string(), "\"x\"");
}

// ============================================================================
//  STRUCTURAL VIOLATIONS
// ============================================================================

#[test]
fn test_map_key_must_be_string() {
    let mut enc = Encoder::new();
    let _ = enc.map_begin();
    assert_eq!(enc.int(1), Err(Error::InvalidMapKey));
}

#[test]
fn test_map_rejects_dangling_key() -> Result<()> {
    let mut enc = Encoder::new();
    enc.map_begin()?;
    enc.str("orphan")?;
    assert_eq!(enc.map_end(), Err(Error::DanglingKey));
    enc.null()?;
    enc.map_end()?;
    enc.into_bytes()?;
    Ok(())
}

#[test]
fn test_scope_mismatch_and_underflow() -> Result<()> {
    let mut enc = Encoder::new();
    assert_eq!(enc.list_end(), Err(Error::ScopeUnderflow));
    enc.list_begin()?;
    assert_eq!(enc.tuple_end(), Err(Error::ScopeMismatch { expected: Scope::Tuple, actual: Scope::List }));
    assert!(matches!(Encoder::new().into_bytes(), Ok(ref b) if b.is_empty()));
    let mut open = Encoder::new();
    open.list_begin()?;
    assert!(matches!(open.into_bytes(), Err(Error::ScopeStillOpen)));
    Ok(())
}

// ============================================================================
//  DECODER HARDENING
// ============================================================================

#[test]
fn test_depth_limit() -> Result<()> {
    let ok = nested(MAX_DEPTH);
    assert_eq!(from_bytes(&to_bytes(&ok)?)?, ok);
    assert_eq!(to_bytes(&nested(MAX_DEPTH + 1)), Err(Error::DepthLimitExceeded));

    // Hand-built payload one level too deep.
    let mut bytes = vec![0x0E];
    for _ in 0..=MAX_DEPTH {
        let len = (bytes.len() as u32).to_le_bytes();
        let mut outer = vec![0x20];
        outer.extend_from_slice(&len);
        outer.extend_from_slice(&bytes);
        bytes = outer;
    }
    assert_eq!(from_bytes(&bytes), Err(Error::DepthLimitExceeded));
    Ok(())
}

#[test]
fn test_truncated_input() -> Result<()> {
    let bytes = to_bytes(&Value::Str("truncate me".into()))?;
    for cut in 0..bytes.len() {
        assert_eq!(from_bytes(&bytes[..cut]), Err(Error::UnexpectedEnd), "cut at {}", cut);
    }
    Ok(())
}

#[test]
fn test_invalid_tag_and_utf8() {
    assert_eq!(from_bytes(&[0x7F]), Err(Error::InvalidTag(0x7F)));
    assert_eq!(from_bytes(&[0x10, 2, 0, 0, 0, 0xC3, 0x28]), Err(Error::InvalidUtf8));
}

#[test]
fn test_trailing_bytes_rejected() {
    assert_eq!(from_bytes(&[0x0E, 0x0E]), Err(Error::TrailingBytes(1)));
}

#[test]
fn test_map_decode_rejects_non_string_key() {
    // {1: null}
    let bytes = [0x21, 10, 0, 0, 0, 0x0A, 1, 0, 0, 0, 0, 0, 0, 0, 0x0E];
    assert_eq!(from_bytes(&bytes), Err(Error::InvalidMapKey));
}
