use keystone_derive::keystone_error;
use std::borrow::Cow;

#[keystone_error]
pub enum StoreError {
    #[error("IO error{}: {source}", format_context(.context))]
    Io {
        #[source]
        source: std::io::Error,
        context: Option<Cow<'static, str>>,
    },

    #[error("Internal error{}: {message}", format_context(.context))]
    Internal { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}

fn read(path: &str) -> Result<Vec<u8>> {
    std::fs::read(path).context("reading key file")
}

fn main() {
    let err = read("/definitely/not/here").unwrap_err();
    assert!(err.to_string().contains("reading key file"));

    let internal: StoreError = "boom".into();
    assert!(matches!(internal, StoreError::Internal { .. }));
}
