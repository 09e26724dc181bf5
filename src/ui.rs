//! Interface de terminal do prompt-arena: spinners e saída colorida.
//!
//! Usa as crates `indicatif` para spinners e para a barra da contagem
//! regressiva, e `console` para estilização com cores. Tudo que é progresso
//! vai para stderr; o conteúdo do workflow vai para stdout.

use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use prompt_arena::api::Variant;
use prompt_arena::retry::{RetryPhase, RetryState};
use prompt_arena::workflow::{WorkflowSnapshot, WorkflowStatus};

// Quantos caracteres finais do buffer aparecem ao lado do spinner.
const TAIL_CHARS: usize = 60;

/// Estilos compartilhados por todas as mensagens.
pub struct Palette {
    pub green: Style,
    pub red: Style,
    pub yellow: Style,
    pub dim: Style,
    pub bold: Style,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
            bold: Style::new().bold(),
        }
    }
}

/// Spinner exibido enquanto um turno está em streaming.
///
/// A mensagem mostra a fase atual e o final do texto recebido até agora.
pub struct TurnProgress {
    pb: ProgressBar,
}

impl TurnProgress {
    pub fn start(label: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(label.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        Self { pb }
    }

    /// Atualiza a mensagem a partir do snapshot mais recente.
    pub fn update(&self, snapshot: &WorkflowSnapshot) {
        let tail = tail(&snapshot.streaming_buffer, TAIL_CHARS).replace('\n', " ");
        self.pb.set_message(format!("{}: {tail}", snapshot.status));
    }

    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

/// Barra da contagem regressiva do controlador de retentativas.
pub struct CountdownDisplay {
    pb: ProgressBar,
    palette: Palette,
}

impl CountdownDisplay {
    pub fn new(countdown_secs: u32) -> Self {
        let pb = ProgressBar::new(u64::from(countdown_secs));
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.yellow} {msg} [{bar:20.yellow}]")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Self {
            pb,
            palette: Palette::default(),
        }
    }

    /// Reflete um [`RetryState`] publicado.
    pub fn show(&self, state: &RetryState, max_attempts: u32) {
        match state.phase {
            RetryPhase::Running => {
                self.pb.set_position(0);
                self.pb
                    .set_message(format!("attempt {}/{max_attempts}…", state.attempt + 1));
            }
            RetryPhase::CountingDown => {
                let total = self.pb.length().unwrap_or(0);
                self.pb
                    .set_position(total.saturating_sub(u64::from(state.countdown_remaining)));
                self.pb.set_message(format!(
                    "{} retrying in {}s",
                    self.palette.yellow.apply_to("↻"),
                    state.countdown_remaining
                ));
            }
            _ => {}
        }
    }

    /// Imprime a falha de uma tentativa acima da barra.
    pub fn attempt_failed(&self, attempt: u32, max_attempts: u32, error: &str) {
        self.pb.println(format!(
            "  {} attempt {}/{max_attempts} failed: {error}",
            self.palette.yellow.apply_to("↻"),
            attempt + 1
        ));
    }

    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

/// Saída do comando `run`.
pub fn print_assistant(palette: &Palette, content: &str) {
    println!("{} {content}", palette.bold.apply_to("assistant:"));
}

pub fn print_questions(palette: &Palette, questions: &[String]) {
    for (i, question) in questions.iter().enumerate() {
        println!("  {} {question}", palette.dim.apply_to(format!("{}.", i + 1)));
    }
}

pub fn print_variants(palette: &Palette, variants: &[Variant]) {
    for (i, variant) in variants.iter().enumerate() {
        let title = if variant.title.is_empty() {
            format!("Variant {}", i + 1)
        } else {
            variant.title.clone()
        };
        println!();
        println!("{}", palette.green.apply_to(format!("─── {title} ───")));
        if let Some(model) = &variant.model_used {
            println!("{}", palette.dim.apply_to(format!("model: {model}")));
        }
        println!("{}", variant.content);
        if let Some(eval) = &variant.evaluation {
            println!(
                "{}",
                palette.dim.apply_to(format!(
                    "clarity {:.1} · safety {:.1} · completeness {:.1} · average {:.1}",
                    eval.clarity, eval.safety, eval.completeness, eval.average
                ))
            );
            if !eval.feedback.is_empty() {
                println!("{}", palette.dim.apply_to(&eval.feedback));
            }
        }
    }
}

/// Linha final de um workflow, verde ou vermelha conforme o status.
pub fn print_outcome(palette: &Palette, snapshot: &WorkflowSnapshot) {
    match snapshot.status {
        WorkflowStatus::Completed => println!(
            "  {} {} variants generated",
            palette.green.apply_to("✓"),
            snapshot.variants.len()
        ),
        _ => println!(
            "  {} workflow failed: {}",
            palette.red.apply_to("✗"),
            snapshot.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

pub fn print_success(palette: &Palette, text: &str) {
    println!("  {} {text}", palette.green.apply_to("✓"));
}

pub fn print_failure(palette: &Palette, text: &str) {
    eprintln!("  {} {text}", palette.red.apply_to("✗"));
}

/// Últimos `max` caracteres de `text`, respeitando limites de char.
fn tail(text: &str, max: usize) -> &str {
    let count = text.chars().count();
    if count <= max {
        return text;
    }
    match text.char_indices().nth(count - max) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}
