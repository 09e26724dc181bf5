mod cli;
mod ui;

use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

use cli::{Cli, Command, TestArgs};
use prompt_arena::api::{TestRequest, WorkflowBackend};
use prompt_arena::config::ArenaConfig;
use prompt_arena::logging;
use prompt_arena::retry::{RetryController, RetryPhase};
use prompt_arena::workflow::{Role, SessionRecord, WorkflowSnapshot, WorkflowStatus, WorkflowStore};
use ui::{CountdownDisplay, Palette, TurnProgress};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let mut config = ArenaConfig::load().context("loading arena.toml")?;
    config.apply_api_base_override(cli.api_base);
    config.validate()?;
    tracing::debug!(api_base = %config.api_base, "configuration loaded");

    match cli.command {
        Command::Run { prompt, transcript } => {
            run_workflow(&config, &prompt, transcript.as_deref()).await
        }
        Command::Test(args) => run_test(&config, &args).await,
    }
}

async fn run_workflow(
    config: &ArenaConfig,
    prompt: &str,
    transcript: Option<&Path>,
) -> Result<ExitCode> {
    let store = WorkflowStore::new(config.client()?);
    let palette = Palette::default();
    let started_at = Utc::now();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    // The user's own input is already on screen.
    let mut printed = 1;

    store.start(prompt).await;
    let last = loop {
        let snapshot = tokio::select! {
            snapshot = follow_turn(&store) => snapshot,
            _ = tokio::signal::ctrl_c() => {
                store.dispose();
                ui::print_failure(&palette, "interrupted");
                return Ok(ExitCode::FAILURE);
            }
        };

        for message in snapshot.messages.iter().skip(printed) {
            if message.role == Role::Assistant {
                ui::print_assistant(&palette, &message.content);
            }
        }
        printed = snapshot.messages.len();

        if snapshot.status != WorkflowStatus::Clarifying {
            break snapshot;
        }

        ui::print_questions(&palette, &snapshot.questions);
        print!("{} ", palette.bold.apply_to("you:"));
        std::io::stdout().flush()?;
        let answer = match stdin.next_line().await? {
            Some(line) if !line.trim().is_empty() => line,
            _ => break snapshot,
        };
        // Echoed by the terminal already.
        printed += 1;
        store.answer_clarification(answer.trim()).await;
    };

    if last.status == WorkflowStatus::Completed {
        ui::print_variants(&palette, &last.variants);
    }
    ui::print_outcome(&palette, &last);

    if let Some(path) = transcript {
        let record = SessionRecord::from_snapshot(&last, started_at);
        std::fs::write(path, record.to_json()?)
            .with_context(|| format!("writing transcript to {}", path.display()))?;
        ui::print_success(&palette, &format!("transcript written to {}", path.display()));
    }
    store.dispose();

    Ok(match last.status {
        WorkflowStatus::Completed | WorkflowStatus::Clarifying => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

/// Show the spinner until the current turn stops streaming.
async fn follow_turn<B: WorkflowBackend>(store: &WorkflowStore<B>) -> Arc<WorkflowSnapshot> {
    let progress = TurnProgress::start("waiting for server");
    let mut rx = store.subscribe();
    loop {
        let snapshot = Arc::clone(&rx.borrow_and_update());
        if !snapshot.is_streaming {
            progress.finish();
            return snapshot;
        }
        progress.update(&snapshot);
        if rx.changed().await.is_err() {
            progress.finish();
            return store.snapshot();
        }
    }
}

async fn run_test(config: &ArenaConfig, args: &TestArgs) -> Result<ExitCode> {
    let prompt = args.prompt.read().context("reading prompt")?;
    let client = Arc::new(config.client()?);
    let request = TestRequest {
        prompt,
        input: args.input.clone(),
    };
    let controller = RetryController::new(config.retry.clone(), request, move |request| {
        let client = Arc::clone(&client);
        async move {
            client
                .execute_test(&request)
                .await
                .map(|response| response.result)
        }
    });
    let palette = Palette::default();
    let max_attempts = controller.policy().max_attempts();

    let phase = loop {
        let display = CountdownDisplay::new(controller.policy().countdown_secs);
        let mut states = controller.subscribe();
        let runner = tokio::spawn({
            let controller = controller.clone();
            async move { controller.run().await }
        });

        let mut reported = None;
        let phase = loop {
            let state = states.borrow_and_update().clone();
            display.show(&state, max_attempts);
            if state.phase == RetryPhase::CountingDown && reported != Some(state.attempt) {
                reported = Some(state.attempt);
                let error = state.last_error.as_deref().unwrap_or("unknown error");
                display.attempt_failed(state.attempt, max_attempts, error);
            }
            match state.phase {
                RetryPhase::Succeeded | RetryPhase::Exhausted | RetryPhase::Terminal => {
                    break state.phase;
                }
                _ => {}
            }
            tokio::select! {
                changed = states.changed() => {
                    if changed.is_err() {
                        break controller.state().phase;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    controller.cancel();
                    break RetryPhase::Idle;
                }
            }
        };
        display.finish();
        settle_runner(runner, phase == RetryPhase::Idle).await;

        if phase == RetryPhase::Exhausted {
            let error = controller.state().last_error.unwrap_or_default();
            ui::print_failure(&palette, &format!("max attempts reached: {error}"));
            if ask_retry().await {
                continue;
            }
        }
        break phase;
    };

    let code = match phase {
        RetryPhase::Succeeded => {
            let output = controller.outputs().borrow().clone().unwrap_or_default();
            ui::print_success(&palette, "test finished");
            println!("{output}");
            ExitCode::SUCCESS
        }
        RetryPhase::Terminal => {
            let error = controller.state().last_error.unwrap_or_default();
            ui::print_failure(&palette, &error);
            ExitCode::FAILURE
        }
        RetryPhase::Exhausted => ExitCode::FAILURE,
        _ => {
            ui::print_failure(&palette, "cancelled");
            ExitCode::FAILURE
        }
    };
    controller.dispose();
    Ok(code)
}

/// Wait for the attempt task. A cancelled run may still be inside a request,
/// so it is aborted rather than awaited to completion.
async fn settle_runner(runner: JoinHandle<()>, cancelled: bool) {
    if cancelled {
        runner.abort();
    }
    match runner.await {
        Err(e) if !e.is_cancelled() => {
            tracing::warn!(error = %e, "test attempt task ended abnormally");
        }
        _ => {}
    }
}

/// Offer a manual retry when stderr is an interactive terminal.
async fn ask_retry() -> bool {
    let term = console::Term::stderr();
    if !term.is_term() {
        return false;
    }
    let answer = tokio::task::spawn_blocking(move || {
        term.write_str("Retry now? [y/N] ")?;
        term.read_line()
    })
    .await;
    matches!(answer, Ok(Ok(line)) if line.trim().eq_ignore_ascii_case("y"))
}
