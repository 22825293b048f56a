//! Unit tests for `AppError` display prefixes and store-error classification.

use followup_bot::AppError;

#[test]
fn display_prefixes_identify_the_variant() {
    let cases = [
        (AppError::Config("bad".into()), "config: bad"),
        (AppError::StoreUnavailable("down".into()), "store unavailable: down"),
        (AppError::Db("locked".into()), "db: locked"),
        (AppError::Notifier("reset".into()), "notifier: reset"),
        (AppError::Unauthorized("invalid token".into()), "unauthorized: invalid token"),
        (AppError::Io("eof".into()), "io: eof"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn only_store_unavailable_is_classified_as_unreachable() {
    assert!(AppError::StoreUnavailable("x".into()).is_store_unavailable());
    assert!(!AppError::Db("x".into()).is_store_unavailable());
    assert!(!AppError::Notifier("x".into()).is_store_unavailable());
}

#[test]
fn pool_failures_map_to_store_unavailable() {
    let timed_out: AppError = sqlx::Error::PoolTimedOut.into();
    let closed: AppError = sqlx::Error::PoolClosed.into();
    assert!(timed_out.is_store_unavailable());
    assert!(closed.is_store_unavailable());
}

#[test]
fn io_failure_maps_to_store_unavailable() {
    let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
    let err: AppError = sqlx::Error::Io(io).into();
    assert!(err.is_store_unavailable());
}

#[test]
fn query_failures_map_to_db() {
    let err: AppError = sqlx::Error::RowNotFound.into();
    assert!(matches!(err, AppError::Db(_)));

    let err: AppError = sqlx::Error::ColumnNotFound("recipient_id".into()).into();
    assert!(err.to_string().starts_with("db:"));
}

#[test]
fn toml_errors_map_to_config() {
    let parse_err = toml::from_str::<toml::Value>("a = [").expect_err("invalid toml");
    let err: AppError = parse_err.into();
    assert!(err.to_string().starts_with("config: invalid config"));
}
