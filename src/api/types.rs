//! Tipos de dados trocados com o serviço remoto de workflow.
//!
//! Todas as structs derivam `Serialize` e `Deserialize` para conversão JSON
//! conforme o formato esperado pelos endpoints `/workflow/...`. Campos que o
//! servidor pode omitir usam `#[serde(default)]`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Avaliações devolvidas pelo servidor, indexadas pelo id da variante.
///
/// O formato interno de cada entrada é definido pelo servidor e é mantido
/// como JSON sem interpretação.
pub type Evaluations = BTreeMap<String, serde_json::Value>;

/// Corpo da requisição que inicia um workflow a partir de texto livre.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRequest {
    /// Texto digitado pelo usuário.
    pub user_input: String,
}

/// Corpo da requisição que responde a uma pergunta de esclarecimento.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRequest {
    /// Resposta do usuário à última pergunta.
    pub answer: String,
}

/// Corpo da requisição que executa uma variante contra uma entrada de teste.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRequest {
    /// Conteúdo da variante usado como prompt.
    pub prompt: String,
    /// Entrada de teste enviada junto ao prompt.
    pub input: String,
}

/// Resposta do endpoint de teste.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResponse {
    /// Saída textual produzida pelo modelo.
    pub result: String,
}

/// Corpo da requisição de refinamento de uma variante.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefineRequest {
    /// Identificador da variante a refinar.
    pub variant_id: String,
    /// Feedback livre do usuário.
    pub feedback: String,
}

/// Resposta do endpoint de refinamento.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefineResponse {
    /// Estado do workflow após o refinamento.
    pub state: RefinedState,
}

/// Parte do estado do servidor relevante após um refinamento.
///
/// Outros campos do estado do servidor são ignorados.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefinedState {
    /// Conjunto completo de variantes, substitui o anterior.
    #[serde(default)]
    pub generated_variants: Vec<Variant>,
    /// Avaliações completas, substituem as anteriores.
    #[serde(default)]
    pub evaluations: Evaluations,
}

/// Um prompt candidato gerado pelo servidor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    /// Rótulo exibido (ex.: "Variant A").
    #[serde(default)]
    pub title: String,
    /// Texto do prompt.
    pub content: String,
    /// Modelo que gerou a variante, quando informado.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    /// Pontuações, ausentes até a fase de avaliação terminar.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<Evaluation>,
}

/// Pontuações de uma variante (0 a 10) e feedback textual.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub clarity: f64,
    pub safety: f64,
    pub completeness: f64,
    pub average: f64,
    #[serde(default)]
    pub feedback: String,
}

/// Corpo de erro padrão do servidor (`{"detail": "..."}`).
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorBody {
    pub detail: String,
}
