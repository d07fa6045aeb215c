use super::*;

// =============================================================================
// ErrorKind::from_status
// =============================================================================

#[test]
fn from_status_maps_auth_failures() {
    assert_eq!(ErrorKind::from_status(401), ErrorKind::Unauthorized);
    assert_eq!(ErrorKind::from_status(403), ErrorKind::Unauthorized);
}

#[test]
fn from_status_maps_validation_failures() {
    assert_eq!(ErrorKind::from_status(400), ErrorKind::ValidationFailure);
    assert_eq!(ErrorKind::from_status(409), ErrorKind::ValidationFailure);
    assert_eq!(ErrorKind::from_status(422), ErrorKind::ValidationFailure);
}

#[test]
fn from_status_maps_not_found() {
    assert_eq!(ErrorKind::from_status(404), ErrorKind::NotFound);
}

#[test]
fn from_status_defaults_to_network_failure() {
    assert_eq!(ErrorKind::from_status(500), ErrorKind::NetworkFailure);
    assert_eq!(ErrorKind::from_status(503), ErrorKind::NetworkFailure);
    assert_eq!(ErrorKind::from_status(429), ErrorKind::NetworkFailure);
}

// =============================================================================
// StoreError
// =============================================================================

#[test]
fn display_includes_code_and_message() {
    let err = StoreError::not_found("no row for u1");
    assert_eq!(err.to_string(), "E_NOT_FOUND: no row for u1");
}

#[test]
fn constructors_set_kind() {
    assert_eq!(StoreError::network("x").kind, ErrorKind::NetworkFailure);
    assert_eq!(StoreError::validation("x").kind, ErrorKind::ValidationFailure);
    assert_eq!(StoreError::unauthorized("x").kind, ErrorKind::Unauthorized);
}

#[test]
fn kind_serializes_snake_case() {
    let json = serde_json::to_string(&ErrorKind::ValidationFailure).unwrap();
    assert_eq!(json, "\"validation_failure\"");
}

#[test]
fn domain_error_keeps_domain_and_source() {
    let err = DomainError { domain: Domain::Profile, error: StoreError::network("offline") };
    assert_eq!(err.domain, Domain::Profile);
    assert!(err.to_string().contains("Profile"));
    assert!(err.to_string().contains("offline"));
}
