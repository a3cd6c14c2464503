//! Tipos de erro para o cliente da autoridade de jobs.
//!
//! [`ClientError`] separa "a autoridade não conhece este job"
//! ([`NotFound`](ClientError::NotFound)) de tudo que significa "não houve
//! resposta utilizável" (falhas HTTP, timeouts, corpos inválidos). O
//! rastreador retenta o segundo grupo e trata o primeiro como terminal.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// A autoridade respondeu 404 para este id de job.
    #[error("job not found: {0}")]
    NotFound(String),

    /// Qualquer outro status HTTP de erro, com o corpo da resposta.
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("request timed out")]
    Timeout,

    /// O corpo não pôde ser lido no formato JSON esperado.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// Falha na camada de rede (DNS, conexão recusada, TLS).
    /// Encapsula o erro original do `reqwest` via `#[from]`.
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::NetworkError(err)
        }
    }
}
