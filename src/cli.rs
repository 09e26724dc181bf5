//! Interface de linha de comando do prompt-arena baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, test)
//! e flags globais (--api-base, --verbose).

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// prompt-arena: clarifica, gera e avalia variantes de prompts.
#[derive(Debug, Parser)]
#[command(name = "prompt-arena", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// URL base do serviço; tem precedência sobre `arena.toml` e `ARENA_API_BASE`.
    #[arg(long, global = true)]
    pub api_base: Option<String>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Inicia um workflow e responde às perguntas de clarificação pelo stdin.
    Run {
        /// Ideia inicial do prompt.
        prompt: String,

        /// Grava o registro da sessão em JSON neste caminho.
        #[arg(long)]
        transcript: Option<PathBuf>,
    },

    /// Executa um prompt contra uma entrada de teste, com retentativa automática.
    Test(TestArgs),
}

#[derive(Debug, Args)]
pub struct TestArgs {
    #[command(flatten)]
    pub prompt: PromptSource,

    /// Entrada de teste enviada ao prompt.
    #[arg(long)]
    pub input: String,
}

/// O prompt vem inline ou de um arquivo, nunca dos dois.
#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
pub struct PromptSource {
    /// Texto do prompt.
    #[arg(long)]
    pub prompt: Option<String>,

    /// Arquivo contendo o prompt.
    #[arg(long)]
    pub prompt_file: Option<PathBuf>,
}

impl PromptSource {
    pub fn read(&self) -> std::io::Result<String> {
        match (&self.prompt, &self.prompt_file) {
            (Some(text), _) => Ok(text.clone()),
            (None, Some(path)) => std::fs::read_to_string(path),
            (None, None) => Ok(String::new()),
        }
    }
}
