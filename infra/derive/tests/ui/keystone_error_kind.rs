use keystone_derive::keystone_error;
use std::borrow::Cow;

#[keystone_error]
pub enum EngineError {
    #[error("Key not found{}: {message}", format_context(.context))]
    KeyNotFound { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    #[error("Not initialized")]
    NotInitialized { message: Cow<'static, str> },
}

fn main() {
    let missing = EngineError::KeyNotFound { message: "ledger".into(), context: None };
    assert_eq!(missing.kind(), "key_not_found");

    let early = EngineError::NotInitialized { message: "early".into() };
    assert_eq!(early.kind(), "not_initialized");

    let with_context: Result<(), EngineError> = Err(missing);
    let err = with_context.context("lookup").unwrap_err();
    assert_eq!(err.to_string(), "Key not found (lookup): ledger");
}
