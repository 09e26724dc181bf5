//! Configuração do prompt-arena carregada a partir de `arena.toml`.
//!
//! A struct [`ArenaConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `ARENA_API_BASE` tem precedência sobre o arquivo.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::api::{ApiError, ArenaClient, DEFAULT_API_BASE};
use crate::error::{ArenaError, Result};
use crate::retry::RetryPolicy;

/// Nome do arquivo procurado no diretório atual.
pub const CONFIG_FILE: &str = "arena.toml";

/// Variável de ambiente que sobrescreve `api_base`.
pub const API_BASE_ENV: &str = "ARENA_API_BASE";

/// Configuração de nível superior carregada de `arena.toml`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ArenaConfig {
    /// URL base do serviço remoto.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Tempo máximo para estabelecer a conexão, em segundos.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Tempo máximo de uma chamada não-streaming, em segundos.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Política de retentativa com contagem regressiva.
    #[serde(default)]
    pub retry: RetryPolicy,
}

// Valor padrão para a URL base: servidor local.
fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            retry: RetryPolicy::default(),
        }
    }
}

impl ArenaConfig {
    /// Carrega a configuração de `arena.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(Path::new(CONFIG_FILE))?;
        config.apply_api_base_override(std::env::var(API_BASE_ENV).ok());
        Ok(config)
    }

    /// Lê um arquivo específico, sem consultar o ambiente.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config = toml::from_str::<ArenaConfig>(&contents)?;
        Ok(config)
    }

    /// Substitui `api_base` quando o valor existe e não é vazio.
    pub fn apply_api_base_override(&mut self, value: Option<String>) {
        if let Some(base) = value.filter(|v| !v.trim().is_empty()) {
            self.api_base = base;
        }
    }

    /// Rejeita valores que impediriam qualquer chamada.
    pub fn validate(&self) -> Result<()> {
        if !self.api_base.starts_with("http://") && !self.api_base.starts_with("https://") {
            return Err(ArenaError::Config(format!(
                "api_base must be an http(s) URL, got `{}`",
                self.api_base
            )));
        }
        if self.connect_timeout_secs == 0 || self.request_timeout_secs == 0 {
            return Err(ArenaError::Config("timeouts must be positive".into()));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Constrói o cliente HTTP com a URL e os timeouts configurados.
    pub fn client(&self) -> std::result::Result<ArenaClient, ApiError> {
        ArenaClient::with_timeouts(
            self.api_base.clone(),
            self.connect_timeout(),
            self.request_timeout(),
        )
    }
}
