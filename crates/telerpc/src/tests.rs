use telepack::Value;

use crate::*;
use crate::version::parse_release;

// ============================================================================
//  REQUESTS
// ============================================================================

#[test]
fn test_request_roundtrip_keeps_sequence_kinds() -> Result<()> {
    let req = Request::getattr("query")
        .arg("*IDN?")
        .arg(Value::List(vec![Value::Int(1), Value::Tuple(vec![Value::Int(2)])]))
        .kwarg("delay", 0.5);

    let decoded = Request::decode(&req.encode()?)?;
    assert_eq!(decoded, req);
    assert!(matches!(decoded.args[1], Value::List(_)));
    Ok(())
}

#[test]
fn test_request_args_travel_as_tuple() -> Result<()> {
    let req = Request::open_resource("ASRL1::INSTR");
    let wire = telepack::from_bytes(&req.encode()?)?;
    assert_eq!(wire.get("args"), Some(&Value::Tuple(vec![Value::Str("ASRL1::INSTR".into())])));
    assert_eq!(wire.get("name"), Some(&Value::Null));
    assert_eq!(wire.get("action"), Some(&Value::Str("open_resource".into())));
    Ok(())
}

#[test]
fn test_request_accepts_list_args_and_missing_optionals() -> Result<()> {
    let wire = Value::Map(vec![
        ("action".into(), Value::Str("getattr".into())),
        ("name".into(), Value::Str("write".into())),
        ("args".into(), Value::List(vec![Value::Str("*RST".into())])),
    ]);
    let req = Request::from_value(&wire)?;
    assert_eq!(req.args, vec![Value::Str("*RST".into())]);
    assert!(req.kwargs.is_empty());
    assert_eq!(req.value, Value::Null);
    Ok(())
}

#[test]
fn test_request_name_rule() {
    assert!(Request::list_resources("?*::INSTR").validate().is_ok());
    assert!(Request::close_resource().validate().is_ok());
    assert!(Request::setattr("timeout", 1).validate().is_ok());

    let mut nameless = Request::getattr("x");
    nameless.name = None;
    assert!(matches!(nameless.validate(), Err(Error::ProtocolViolation(_))));

    let mut named = Request::close_resource();
    named.name = Some("timeout".into());
    assert!(matches!(named.validate(), Err(Error::ProtocolViolation(_))));

    assert!(matches!(Request::getattr("").validate(), Err(Error::ProtocolViolation(_))));
}

#[test]
fn test_unknown_action_is_unsupported() {
    let wire = Value::Map(vec![("action".into(), Value::Str("delete_everything".into()))]);
    assert_eq!(Request::from_value(&wire), Err(Error::UnsupportedAction("delete_everything".into())));
}

#[test]
fn test_malformed_requests() {
    assert!(matches!(Request::from_value(&Value::Int(3)), Err(Error::TypeMismatch { field: "envelope", .. })));
    assert_eq!(Request::from_value(&Value::Map(vec![])), Err(Error::MissingField("action")));

    let bad_args = Value::Map(vec![
        ("action".into(), Value::Str("getattr".into())),
        ("args".into(), Value::Str("oops".into())),
    ]);
    assert!(matches!(Request::from_value(&bad_args), Err(Error::TypeMismatch { field: "args", .. })));
    assert!(matches!(Request::decode(&[0xFF]), Err(Error::Serialization(_))));
}

#[test]
fn test_action_tags() -> Result<()> {
    for action in Action::ALL {
        assert_eq!(Action::from_tag(action.as_tag())?, action);
    }
    assert!(Action::GetAttr.requires_name());
    assert!(!Action::OpenResource.requires_name());
    Ok(())
}

#[test]
fn test_pop_kwarg() {
    let mut kwargs: Kwargs = vec![
        ("access_mode".into(), Value::Int(0)),
        ("timeout".into(), Value::Int(10)),
    ];
    assert_eq!(pop_kwarg(&mut kwargs, "access_mode"), Some(Value::Int(0)));
    assert_eq!(pop_kwarg(&mut kwargs, "access_mode"), None);
    assert_eq!(kwargs.len(), 1);
}

// ============================================================================
//  REPLIES AND EXCEPTIONS
// ============================================================================

#[test]
fn test_reply_value_roundtrip() -> Result<()> {
    let reply = Reply::Value(Value::Tuple(vec![Value::Str("GPIB0::8::INSTR".into())]));
    assert_eq!(Reply::decode(&reply.encode()?)?, reply);
    Ok(())
}

#[test]
fn test_reply_exception_roundtrip() -> Result<()> {
    let exc = EncodedException::application("VisaIOError", "timeout expired")
        .with_frame("resource", "read")
        .with_frame("server", "getattr 'read'");
    let reply = Reply::Exception(exc.clone());

    let decoded = Reply::decode(&reply.encode()?)?;
    assert_eq!(decoded, reply);
    let Err(back) = decoded.into_result() else { panic!("expected exception") };
    assert_eq!(back.kind, ExceptionKind::Application("VisaIOError".into()));
    assert_eq!(back.frames.len(), 2);
    assert_eq!(back.to_string(), "VisaIOError: timeout expired");
    assert!(back.render_traceback().contains("at server: getattr 'read'"));
    Ok(())
}

#[test]
fn test_reply_needs_exactly_one_key() {
    let both = Value::Map(vec![
        ("value".into(), Value::Null),
        ("exception".into(), EncodedException::internal("x").to_value()),
    ]);
    assert!(matches!(Reply::from_value(&both), Err(Error::ProtocolViolation(_))));
    assert!(matches!(Reply::from_value(&Value::Map(vec![])), Err(Error::ProtocolViolation(_))));
}

#[test]
fn test_null_value_reply_is_a_value() -> Result<()> {
    let decoded = Reply::decode(&Reply::Value(Value::Null).encode()?)?;
    assert_eq!(decoded, Reply::Value(Value::Null));
    Ok(())
}

#[test]
fn test_exception_kind_names() {
    for kind in [ExceptionKind::Protocol, ExceptionKind::InvalidSession, ExceptionKind::NotImplemented, ExceptionKind::Internal] {
        assert_eq!(ExceptionKind::from_name(kind.as_str()), kind);
    }
    assert_eq!(ExceptionKind::from_name("ValueError"), ExceptionKind::Application("ValueError".into()));
}

// ============================================================================
//  HANDSHAKE
// ============================================================================

#[test]
fn test_handshake_roundtrip() -> Result<()> {
    let full = HandshakeReply { rpc_port: 5001, backend: Some("@sim".into()), version: "0.1.0".into() };
    assert_eq!(HandshakeReply::decode(&full.encode()?)?, full);

    let bare = HandshakeReply { rpc_port: 40000, backend: None, version: "0.1.0".into() };
    let wire = bare.to_value();
    assert_eq!(wire.get("backend"), None);
    assert_eq!(HandshakeReply::from_value(&wire)?, bare);
    Ok(())
}

#[test]
fn test_handshake_port_range() {
    let wire = Value::Map(vec![
        ("rpc_port".into(), Value::Int(70000)),
        ("version".into(), Value::Str("0.1.0".into())),
    ]);
    assert!(matches!(HandshakeReply::from_value(&wire), Err(Error::ProtocolViolation(_))));
}

// ============================================================================
//  VERSION GATE
// ============================================================================

#[test]
fn test_release_parsing() {
    assert_eq!(parse_release("0.1.0"), Some(vec![0, 1, 0]));
    assert_eq!(parse_release("v1.2"), Some(vec![1, 2]));
    assert_eq!(parse_release("0.2.0rc1"), Some(vec![0, 2, 0]));
    assert_eq!(parse_release("0.1.dev3"), Some(vec![0, 1]));
    assert_eq!(parse_release("banana"), None);
    assert_eq!(parse_release(""), None);
}

#[test]
fn test_version_gate() {
    assert!(check_for_version_compatibility("0.0.1").is_ok());
    assert!(check_for_version_compatibility(VERSION).is_ok());
    assert!(check_for_version_compatibility("0.2.0").is_err());

    assert!(check_compatibility("1.0.0", "0.9.9").is_ok());
    assert!(check_compatibility("0.1", "0.1.0").is_err());
    let err = check_compatibility("0.1.0", "garbage");
    assert!(matches!(err, Err(CompatibilityError { ref reason, .. }) if reason.contains("server")));
}
