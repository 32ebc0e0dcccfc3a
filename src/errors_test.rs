use super::*;
use crate::constants::*;

#[test]
fn test_invalid_state_error_mentions_state_and_operation() {
    let err = ErrorInfo::invalid_state("failed", "publish");
    assert_eq!(err.code, INVALID_CHANNEL_STATE);
    assert!(err.message.contains("failed"));
    assert!(err.message.contains("publish"));
    assert_eq!(err.category(), ErrorCategory::StatePrecondition);
}

#[test]
fn test_timeouts_are_classified_as_timeout() {
    assert_eq!(ErrorInfo::attach_timeout("room").category(), ErrorCategory::Timeout);
    assert_eq!(ErrorInfo::detach_timeout("room").category(), ErrorCategory::Timeout);
}

#[test]
fn test_connection_errors_are_classified_as_transport() {
    assert_eq!(ErrorInfo::connection_failed().category(), ErrorCategory::Transport);
    assert_eq!(ErrorInfo::connection_closed().category(), ErrorCategory::Transport);
    assert_eq!(ErrorInfo::connection_suspended().category(), ErrorCategory::Transport);
}

#[test]
fn test_reenter_failure_is_a_consistency_repair_error() {
    let cause = ErrorInfo::bad_request("nope");
    let err = ErrorInfo::presence_reenter_failed("alice", &cause);
    assert_eq!(err.code, PRESENCE_REENTER_FAILED);
    assert!(err.message.contains("alice"));
    assert!(err.message.contains("nope"));
    assert_eq!(err.category(), ErrorCategory::ConsistencyRepair);
}

#[test]
fn test_unknown_codes_default_to_server() {
    let err = ErrorInfo::new(40160, 401, "not permitted");
    assert_eq!(err.category(), ErrorCategory::Server);
}

#[test]
fn test_error_exposes_wire_reason() {
    let err: Error = ErrorInfo::presence_out_of_sync().into();
    assert_eq!(err.code(), Some(PRESENCE_OUT_OF_SYNC));
    assert!(err.to_string().contains("out of sync"));

    let err = Error::Interrupted("channel released".to_string());
    assert_eq!(err.code(), None);
    assert_eq!(err.to_string(), "Operation interrupted: channel released");
}

#[test]
fn test_error_info_display_includes_code_and_status() {
    let err = ErrorInfo::new(90001, 400, "bad state");
    assert_eq!(err.to_string(), "bad state (code=90001, status=400)");
}
