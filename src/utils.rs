//! Identifier generation and tracing setup

use bech32::Bech32m;
use tracing_subscriber::EnvFilter;
use uuid7::uuid7;

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Source of opaque envelope tokens.
pub trait TokenGenerator: Send + Sync {
    fn new_token(&self) -> anyhow::Result<String>;
}

/// uuid7 tokens encoded as bech32m under a fixed prefix.
#[derive(Debug, Clone)]
pub struct Bech32Tokens {
    prefix: String,
}

impl Bech32Tokens {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_owned(),
        }
    }
}

impl TokenGenerator for Bech32Tokens {
    fn new_token(&self) -> anyhow::Result<String> {
        new_uuid_to_bech32(&self.prefix)
    }
}

/// Install a fmt subscriber. `RUST_LOG` overrides `default_directive`.
pub fn init_tracing(default_directive: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}
