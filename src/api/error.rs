//! Tipos de erro para o cliente do serviço remoto.
//!
//! Define [`ApiError`] com variantes para servidor inacessível, erros da API,
//! erros de rede e respostas mal formadas. Usa `thiserror` para derivar
//! `Display` e `Error` a partir dos atributos `#[error(...)]`.

use thiserror::Error;

/// Marcador textual usado quando o servidor não pôde ser contatado.
///
/// O controlador de retentativas trata mensagens contendo este texto como
/// falhas terminais.
pub const UNREACHABLE_DETAIL: &str = "Backend server not reachable";

/// Erros que podem ocorrer ao interagir com o serviço remoto.
///
/// - [`Unreachable`](ApiError::Unreachable): a conexão TCP/TLS falhou
/// - [`ApiError`](ApiError::ApiError): o servidor respondeu com 4xx/5xx
/// - [`NetworkError`](ApiError::NetworkError): qualquer outra falha do `reqwest`
/// - [`ParseError`](ApiError::ParseError): corpo de resposta inesperado
#[derive(Debug, Error)]
pub enum ApiError {
    /// Não foi possível estabelecer conexão com o servidor.
    #[error("Backend server not reachable: {0}")]
    Unreachable(String),

    /// Erro retornado pela API. `message` vem do campo `detail` do corpo
    /// JSON quando presente, caso contrário do corpo bruto.
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// Falha de rede subjacente (timeout, conexão interrompida no meio do corpo).
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// O corpo da resposta não corresponde ao formato esperado.
    #[error("failed to parse response: {0}")]
    ParseError(String),
}

impl ApiError {
    /// Converte um erro de envio do `reqwest`, separando falhas de conexão.
    pub(crate) fn from_send(err: reqwest::Error) -> Self {
        if err.is_connect() {
            ApiError::Unreachable(err.to_string())
        } else {
            ApiError::NetworkError(err)
        }
    }
}
