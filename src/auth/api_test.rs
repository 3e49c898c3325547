use super::*;

const USER_ID: &str = "6f1c1e64-3a42-4e8f-9a57-0c0f5f0f6b1e";

fn token_body(extra: &str) -> String {
    format!(
        r#"{{"access_token":"at-1","token_type":"bearer","refresh_token":"rt-1",{extra}"user":{{"id":"{USER_ID}","email":"staff@example.com","role":"authenticated"}}}}"#
    )
}

// =============================================================================
// parse_token_response
// =============================================================================

#[test]
fn token_response_uses_expires_at_when_present() {
    let body = token_body(r#""expires_in":3600,"expires_at":1700003600,"#);
    let session = parse_token_response(200, &body, 1_000).unwrap();
    assert_eq!(session.access_token, "at-1");
    assert_eq!(session.refresh_token, "rt-1");
    assert_eq!(session.expires_at, 1_700_003_600);
    assert_eq!(session.user.email.as_deref(), Some("staff@example.com"));
    assert_eq!(session.user.id.to_string(), USER_ID);
}

#[test]
fn token_response_derives_expiry_from_expires_in() {
    let body = token_body(r#""expires_in":3600,"#);
    let session = parse_token_response(200, &body, 1_000).unwrap();
    assert_eq!(session.expires_at, 4_600);
}

#[test]
fn token_response_without_expiry_is_decode_error() {
    let body = token_body("");
    let err = parse_token_response(200, &body, 1_000).unwrap_err();
    assert!(matches!(err, AuthError::Decode(_)));
}

#[test]
fn token_response_error_status_maps_to_api_error() {
    let body = r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#;
    let err = parse_token_response(400, body, 0).unwrap_err();
    match err {
        AuthError::Api { status, message } => {
            assert_eq!(status, 400);
            assert_eq!(message, "Invalid login credentials");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[test]
fn token_response_garbage_body_is_decode_error() {
    let err = parse_token_response(200, "<html>", 0).unwrap_err();
    assert!(matches!(err, AuthError::Decode(_)));
}

#[test]
fn token_type_defaults_to_bearer() {
    let body = format!(
        r#"{{"access_token":"a","refresh_token":"r","expires_in":60,"user":{{"id":"{USER_ID}"}}}}"#
    );
    let session = parse_token_response(200, &body, 0).unwrap();
    assert_eq!(session.token_type, "bearer");
    assert!(session.user.email.is_none());
}

// =============================================================================
// parse_error_message
// =============================================================================

#[test]
fn error_message_prefers_description() {
    assert_eq!(parse_error_message(r#"{"error":"x","error_description":"y"}"#), "y");
}

#[test]
fn error_message_reads_msg_field() {
    assert_eq!(parse_error_message(r#"{"code":401,"msg":"Invalid JWT"}"#), "Invalid JWT");
}

#[test]
fn error_message_falls_back_to_raw_body() {
    assert_eq!(parse_error_message("  upstream timeout "), "upstream timeout");
    assert_eq!(parse_error_message(r#"{"code":500}"#), r#"{"code":500}"#);
}

// =============================================================================
// logout_confirmed
// =============================================================================

#[test]
fn logout_confirmed_statuses() {
    assert!(logout_confirmed(204));
    assert!(logout_confirmed(200));
    assert!(logout_confirmed(401));
    assert!(logout_confirmed(404));
    assert!(!logout_confirmed(500));
    assert!(!logout_confirmed(502));
    assert!(!logout_confirmed(429));
}

#[test]
fn endpoint_joins_base_url() {
    let cfg = AuthConfig::new("https://abc.supabase.co/", "anon").unwrap();
    let api = AuthApi::new(&cfg).unwrap();
    assert_eq!(api.endpoint("/user"), "https://abc.supabase.co/auth/v1/user");
}
