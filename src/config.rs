//! Configuração do genpipe carregada a partir de `genpipe.toml`.
//!
//! A struct [`GenpipeConfig`] contém todos os parâmetros configuráveis.
//! Valores ausentes no arquivo usam defaults, então um arquivo parcial ou
//! inexistente é válido. `GENPIPE_SERVER_URL` e `GENPIPE_BIND` têm
//! precedência sobre o arquivo.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::GenpipeError;
use crate::state_machine::{RetryPolicy, StateMachine, StepTable};
use crate::tracker::TrackerConfig;

pub const CONFIG_FILE: &str = "genpipe.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GenpipeConfig {
    /// Endereço em que a autoridade escuta.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// URL base usada pelo cliente e pelo rastreador.
    #[serde(default = "default_server_url")]
    pub server_url: String,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Timeout por requisição, independente do intervalo de polling.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_max_transport_failures")]
    pub max_transport_failures: u32,

    #[serde(default)]
    pub retry_policy: RetryPolicy,

    /// Limite para o atraso de cada etapa. Sem valor, a tabela mantém os próprios atrasos.
    #[serde(default)]
    pub settle_delay_cap_ms: Option<u64>,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_server_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_max_transport_failures() -> u32 {
    3
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_cache_capacity() -> usize {
    64
}

impl Default for GenpipeConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            server_url: default_server_url(),
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            max_transport_failures: default_max_transport_failures(),
            retry_policy: RetryPolicy::default(),
            settle_delay_cap_ms: None,
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl GenpipeConfig {
    /// Carrega `genpipe.toml` do diretório atual e depois aplica as
    /// variáveis de ambiente.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(Path::new(CONFIG_FILE))?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Carrega `path`, usando valores padrão se o arquivo não existir.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
    }

    /// Aplica as variáveis `GENPIPE_*` lidas via `var`. Valores vazios são ignorados.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("GENPIPE_SERVER_URL")
            && !url.is_empty()
        {
            self.server_url = url;
        }
        if let Some(bind) = var("GENPIPE_BIND")
            && !bind.is_empty()
        {
            self.bind = bind;
        }
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, GenpipeError> {
        self.bind
            .parse()
            .map_err(|e| GenpipeError::Config(format!("invalid bind address `{}`: {e}", self.bind)))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.cache_ttl_secs).unwrap_or(i64::MAX))
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            request_timeout: self.request_timeout(),
            max_transport_failures: self.max_transport_failures.max(1),
        }
    }

    /// A tabela de geração com o limite de atraso e a política de retentativa configurados.
    pub fn state_machine(&self) -> StateMachine {
        let mut table = StepTable::generation();
        if let Some(cap_ms) = self.settle_delay_cap_ms {
            let cap = i64::try_from(cap_ms).unwrap_or(i64::MAX);
            table = table.with_delay_cap(chrono::Duration::milliseconds(cap));
        }
        StateMachine::new(table, self.retry_policy)
    }
}
