use super::*;

/// # Safety
/// Tests must run with `--test-threads=1` to avoid env races.
unsafe fn clear_env() {
    unsafe {
        std::env::remove_var("AUTHKIT_URL");
        std::env::remove_var("AUTHKIT_ANON_KEY");
        std::env::remove_var("AUTHKIT_PROFILE_TABLE");
        std::env::remove_var("AUTHKIT_REQUEST_TIMEOUT_SECS");
        std::env::remove_var("AUTHKIT_CONNECT_TIMEOUT_SECS");
    }
}

#[test]
fn new_trims_trailing_slash() {
    let cfg = BackendConfig::new("https://demo.example.co///", "anon");
    assert_eq!(cfg.url, "https://demo.example.co");
    assert_eq!(cfg.auth_url("signup"), "https://demo.example.co/auth/v1/signup");
    assert_eq!(cfg.table_url(), "https://demo.example.co/rest/v1/users");
}

#[test]
fn config_env_cases() {
    // Run sequentially in one test so env mutations never interleave.
    unsafe {
        clear_env();
        std::env::set_var("AUTHKIT_URL", "https://demo.example.co/");
        std::env::set_var("AUTHKIT_ANON_KEY", "anon-key");
    }
    let cfg = BackendConfig::from_env().unwrap();
    assert_eq!(cfg.url, "https://demo.example.co");
    assert_eq!(cfg.anon_key, "anon-key");
    assert_eq!(cfg.profile_table, DEFAULT_PROFILE_TABLE);
    assert_eq!(cfg.timeouts, Timeouts::default());

    unsafe {
        std::env::set_var("AUTHKIT_PROFILE_TABLE", "profiles");
        std::env::set_var("AUTHKIT_REQUEST_TIMEOUT_SECS", "5");
        std::env::set_var("AUTHKIT_CONNECT_TIMEOUT_SECS", "2");
    }
    let cfg = BackendConfig::from_env().unwrap();
    assert_eq!(cfg.profile_table, "profiles");
    assert_eq!(cfg.timeouts, Timeouts { request_secs: 5, connect_secs: 2 });

    unsafe { std::env::set_var("AUTHKIT_REQUEST_TIMEOUT_SECS", "0") };
    let err = BackendConfig::from_env().unwrap_err().to_string();
    assert!(err.contains("AUTHKIT_REQUEST_TIMEOUT_SECS"));

    unsafe {
        std::env::remove_var("AUTHKIT_REQUEST_TIMEOUT_SECS");
        std::env::set_var("AUTHKIT_URL", "ftp://demo.example.co");
    }
    let err = BackendConfig::from_env().unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { var: "AUTHKIT_URL", .. }));

    unsafe {
        clear_env();
        std::env::set_var("AUTHKIT_URL", "https://demo.example.co");
        std::env::set_var("AUTHKIT_ANON_KEY", "   ");
    }
    let err = BackendConfig::from_env().unwrap_err();
    assert!(matches!(err, ConfigError::Missing { var: "AUTHKIT_ANON_KEY" }));

    unsafe { clear_env() };
}
