#![deny(missing_docs)]
//! Test utilities to be used by folio crates and their consumers.

use bytes::Bytes;
use folio_api::{Item, RequestKey};

pub mod gateway;
pub mod handler;

/// Enable tracing with the RUST_LOG environment variable.
///
/// This is intended to be used in tests, so it defaults to DEBUG level.
pub fn enable_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::Level::DEBUG.into())
                .from_env_lossy(),
        )
        .try_init();
}

/// Repeatedly run a block until it `break`s, sleeping between attempts.
///
/// Panics if the block has not broken out of the loop within the timeout.
///
/// - `iter_check!({ .. })`: 1000 ms timeout, 1 ms sleep.
/// - `iter_check!(timeout_ms, { .. })`: 1 ms sleep.
/// - `iter_check!(timeout_ms, sleep_ms, { .. })`.
#[macro_export]
macro_rules! iter_check {
    ($timeout_ms:literal, $sleep_ms:literal, $code:block) => {
        tokio::time::timeout(
            std::time::Duration::from_millis($timeout_ms),
            async {
                loop {
                    tokio::time::sleep(std::time::Duration::from_millis(
                        $sleep_ms,
                    ))
                    .await;

                    $code
                }
            },
        )
        .await
        .expect("iter_check timed out");
    };

    ($timeout_ms:literal, $code:block) => {
        $crate::iter_check!($timeout_ms, 1, $code)
    };

    ($code:block) => {
        $crate::iter_check!(1000, $code)
    };
}

/// Create a random request key.
pub fn random_key() -> RequestKey {
    RequestKey::from(format!("key-{:016x}", rand::random::<u64>()))
}

/// Build collection items for the given keys, each carrying its key as data.
pub fn items(keys: &[&str]) -> Vec<Item> {
    keys.iter()
        .map(|k| Item::new(*k, Bytes::from(k.to_string())))
        .collect()
}

/// The sub-resource payload the test helpers associate with a key.
pub fn payload_for(key: &str) -> Bytes {
    Bytes::from(format!("payload-of-{key}"))
}
