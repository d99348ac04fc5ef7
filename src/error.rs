//! Error types for the gateway core.
//!
//! Cipher and credential errors surface to the caller (they indicate a
//! configuration problem, usually a moved credential file or a missing
//! value). Quota refusals are booleans, never errors. An unfamiliar
//! `x-mbx-*` header is the one stop-the-world signal: the accountant cannot
//! stay correct against a quota dimension it does not know about.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("ciphertext is not decryptable on this host (moved credential file?)")]
    CipherCorruptInput,

    #[error("malformed credential line: {line}")]
    CredentialParse { line: String },

    #[error("credential '{name}' not present and prompting is disabled")]
    CredentialMissing { name: String },

    #[error("credential file I/O: {0}")]
    CredentialIo(#[from] std::io::Error),

    #[error("unknown rate limit header '{header}' — update the gateway before continuing")]
    UnknownRateHeader { header: String },

    #[error("http transport failure: {message}")]
    Transport { message: String },

    #[error("exchange returned {status} for {endpoint}: {body}")]
    Exchange {
        status: u16,
        endpoint: String,
        body: String,
    },
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Transport {
            message: err.to_string(),
        }
    }
}
