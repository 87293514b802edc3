//! Integration tests for error handling

use remotecam_core::error::{RemoteCamError, ResultExt};

#[test]
fn test_error_context_chaining() {
    let base_error = RemoteCamError::device("camera busy");
    let with_context = base_error.with_context("Failed to open camera 0");

    let msg = format!("{}", with_context);
    assert!(msg.contains("Failed to open camera 0"));
    assert!(msg.contains("camera busy"));
}

#[test]
fn test_error_context_preserves_hint() {
    let base_error = RemoteCamError::device("camera busy");
    let hint_before = base_error.user_hint();

    let with_context = base_error.with_context("During restart");
    assert_eq!(hint_before, with_context.user_hint());
}

#[test]
fn test_result_ext_context() {
    let result: Result<(), RemoteCamError> = Err(RemoteCamError::server("address in use"));
    let err = result.context("Starting HTTP server").unwrap_err();
    assert!(format!("{}", err).contains("Starting HTTP server"));
}

#[test]
fn test_user_hints() {
    let err = RemoteCamError::capability("test");
    assert!(err.user_hint().unwrap().contains("remotecam list"));

    let err = RemoteCamError::device("test");
    assert!(err.user_hint().unwrap().contains("/dev/video"));

    let err = RemoteCamError::server("test");
    assert!(err.user_hint().unwrap().contains("port"));

    let err = RemoteCamError::config("test");
    assert!(err.user_hint().unwrap().contains("config.toml"));

    assert!(RemoteCamError::NoActiveSession
        .user_hint()
        .unwrap()
        .contains("remotecam serve"));
    assert!(RemoteCamError::encoder("test").user_hint().is_none());
}

#[test]
fn test_user_recoverable() {
    assert!(RemoteCamError::capability("test").is_user_recoverable());
    assert!(RemoteCamError::auth("test").is_user_recoverable());
    assert!(RemoteCamError::SourceNotFound("9".to_string()).is_user_recoverable());
    assert!(RemoteCamError::NoActiveSession.is_user_recoverable());

    assert!(!RemoteCamError::encoder("test").is_user_recoverable());
    assert!(!RemoteCamError::SessionClosed.is_user_recoverable());
    assert!(!RemoteCamError::Unsupported("test".to_string()).is_user_recoverable());
}

#[test]
fn test_error_display_format() {
    assert_eq!(
        RemoteCamError::capability("No camera available").to_string(),
        "Capability error: No camera available"
    );
    assert_eq!(
        RemoteCamError::SourceNotFound("7".to_string()).to_string(),
        "Camera not found: 7"
    );
    assert_eq!(
        RemoteCamError::SessionClosed.to_string(),
        "Capture session closed"
    );
}

#[test]
fn test_nested_context() {
    let err = RemoteCamError::device("unplugged")
        .with_context("Starting repeating capture")
        .with_context("Restart");

    let msg = format!("{}", err);
    assert!(msg.starts_with("Restart: "));
    assert!(err.user_hint().is_some());
    assert!(err.is_user_recoverable());
}

#[test]
fn test_io_error_conversion() {
    let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
    let err: RemoteCamError = io_err.into();

    let msg = format!("{}", err);
    assert!(msg.contains("I/O error"));
    assert!(msg.contains("File not found"));
}
