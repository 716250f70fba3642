use std::{fmt::Write as _, path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    ConversationEngine, DocumentUpload, ExchangeOutcome, HttpReqEngineApi, RefinementApplied,
    ReloadOutcome,
};
use shared::{
    domain::{ExportFormat, Message, RefinementKind, Role, SessionId, UseCase, UseCaseId},
    protocol::{QueryResponse, RefinementRequest, SessionSummary},
};
use tracing::{info, warn};

mod config;

use config::load_settings;

#[derive(Parser, Debug)]
#[command(about = "Extract and refine use cases with a requirements-engineering backend")]
struct Cli {
    /// Backend base URL; overrides reqengine.toml and the environment.
    #[arg(long)]
    api_url: Option<String>,
    /// Continue an existing session instead of starting a new one.
    #[arg(long)]
    session: Option<String>,
    #[arg(long)]
    history_limit: Option<u32>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract use cases from free text.
    Extract {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Extract use cases from a document.
    Upload { path: PathBuf },
    /// Print the reconciled transcript of a session.
    History { session_id: String },
    /// Ask the backend to refine one stored use case.
    Refine {
        use_case_id: String,
        #[arg(long, default_value_t = RefinementKind::MoreMainFlows)]
        kind: RefinementKind,
    },
    Sessions,
    NewSession {
        #[arg(long)]
        project_context: Option<String>,
        #[arg(long)]
        domain: Option<String>,
    },
    /// Update project context or domain of the session given with --session.
    Context {
        #[arg(long)]
        project_context: Option<String>,
        #[arg(long)]
        domain: Option<String>,
    },
    Delete { session_id: String },
    /// Ask a question about the use cases of the session given with --session.
    Query {
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
    },
    /// Download the use cases of the session given with --session.
    Export {
        #[arg(long, default_value_t = ExportFormat::Markdown)]
        format: ExportFormat,
        /// Defaults to the backend's file name in the current directory.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = load_settings();
    if let Some(api_url) = cli.api_url.clone() {
        settings.api_url = api_url;
    }
    if let Some(history_limit) = cli.history_limit {
        settings.history_limit = history_limit;
    }

    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| settings.log_filter.clone());
    tracing_subscriber::fmt()
        .with_env_filter(filter.as_str())
        .with_writer(std::io::stderr)
        .init();

    let api = HttpReqEngineApi::new(&settings.api_url)?;
    info!(api_url = %api.base_url(), "reqengine: using backend");
    let engine = Arc::new(ConversationEngine::new(
        Arc::new(api),
        settings.engine_settings(),
    ));

    tokio::spawn({
        let engine = Arc::clone(&engine);
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("reqengine: interrupted");
                engine.shutdown();
            }
        }
    });

    run(&engine, cli.session.map(SessionId::new), cli.command).await
}

async fn run(engine: &ConversationEngine, session: Option<SessionId>, command: Command) -> Result<()> {
    match command {
        Command::Extract { text } => {
            resume(engine, session).await?;
            let outcome = engine.send_text(&text.join(" ")).await?;
            print!("{}", render_transcript(&engine.snapshot().messages));
            report_exchange(engine, outcome)
        }
        Command::Upload { path } => {
            resume(engine, session).await?;
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read '{}'", path.display()))?;
            let filename = path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("document.bin")
                .to_string();
            let mime_type = mime_guess::from_path(&path)
                .first_raw()
                .map(str::to_string);
            let outcome = engine
                .upload_document(DocumentUpload {
                    filename,
                    mime_type,
                    bytes,
                })
                .await;
            print!("{}", render_transcript(&engine.snapshot().messages));
            report_exchange(engine, outcome)
        }
        Command::History { session_id } => {
            resume(engine, Some(SessionId::new(session_id))).await?;
            print!("{}", render_transcript(&engine.snapshot().messages));
            Ok(())
        }
        Command::Refine { use_case_id, kind } => {
            resume(engine, session).await?;
            println!("{} for use case {use_case_id}...", kind.label());
            let outcome = engine
                .refine_use_case(RefinementRequest::new(UseCaseId::new(use_case_id), kind))
                .await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&outcome.refined_use_case)?
            );
            match outcome.applied {
                RefinementApplied::Reloaded(ReloadOutcome::Applied { .. }) => {
                    print!("{}", render_transcript(&engine.snapshot().messages));
                }
                RefinementApplied::Reloaded(ReloadOutcome::Failed { reason }) => {
                    warn!(error = %reason, "reqengine: refined, but history reload failed");
                }
                _ => {}
            }
            Ok(())
        }
        Command::Sessions => {
            let sessions = engine.list_sessions().await?;
            print!("{}", render_sessions(&sessions));
            Ok(())
        }
        Command::NewSession {
            project_context,
            domain,
        } => {
            let session_id = engine.start_session(project_context, domain).await?;
            println!("{session_id}");
            Ok(())
        }
        Command::Context {
            project_context,
            domain,
        } => {
            let Some(session_id) = session else {
                bail!("--session is required to update a session's context");
            };
            engine.store().set_current_session(Some(session_id.clone()));
            engine
                .update_session_context(project_context, domain)
                .await?;
            println!("updated session {session_id}");
            Ok(())
        }
        Command::Delete { session_id } => {
            engine.delete_session(&SessionId::new(session_id.clone())).await?;
            println!("deleted session {session_id}");
            Ok(())
        }
        Command::Query { question } => {
            let Some(session_id) = session else {
                bail!("--session is required to query a session's use cases");
            };
            engine.store().set_current_session(Some(session_id));
            let answer = engine.query(&question.join(" ")).await?;
            print!("{}", render_answer(&answer));
            Ok(())
        }
        Command::Export { format, output } => {
            let Some(session_id) = session else {
                bail!("--session is required to export a session");
            };
            engine.store().set_current_session(Some(session_id));
            let export = engine.export_session(format).await?;
            let path = output.unwrap_or_else(|| PathBuf::from(&export.filename));
            tokio::fs::write(&path, &export.bytes)
                .await
                .with_context(|| format!("failed to write '{}'", path.display()))?;
            println!("wrote {} ({} bytes)", path.display(), export.bytes.len());
            if let Some(instructions) = export.instructions {
                println!("{instructions}");
            }
            Ok(())
        }
        Command::Health => {
            let health = engine.health().await?;
            println!(
                "{} (model: {}, extraction: {})",
                health.status,
                health.model.as_deref().unwrap_or("unknown"),
                health.extraction_method.as_deref().unwrap_or("unknown")
            );
            if !health.is_healthy() {
                bail!("backend reports status '{}'", health.status);
            }
            Ok(())
        }
    }
}

/// Opens `session` when given so the next exchange continues it.
async fn resume(engine: &ConversationEngine, session: Option<SessionId>) -> Result<()> {
    let Some(session_id) = session else {
        return Ok(());
    };
    match engine.open_session(session_id.clone()).await {
        ReloadOutcome::Applied { messages } => {
            info!(session_id = %session_id, messages, "reqengine: session loaded");
            Ok(())
        }
        ReloadOutcome::Failed { reason } => {
            bail!("could not load session {session_id}: {reason}")
        }
        ReloadOutcome::NoSession | ReloadOutcome::Discarded => {
            bail!("session {session_id} was not loaded")
        }
    }
}

fn report_exchange(engine: &ConversationEngine, outcome: ExchangeOutcome) -> Result<()> {
    match outcome {
        ExchangeOutcome::Extracted(_) => {
            if let Some(session_id) = engine.store().current_session_id() {
                println!("session: {session_id}");
            }
            Ok(())
        }
        ExchangeOutcome::Failed { reason } => bail!("extraction failed: {reason}"),
        ExchangeOutcome::Discarded => bail!("extraction was interrupted"),
    }
}

fn render_transcript(messages: &[Message]) -> String {
    let mut out = String::new();
    for message in messages {
        render_message(&mut out, message);
    }
    out
}

fn render_message(out: &mut String, message: &Message) {
    let speaker = match message.role {
        Role::User => "you",
        Role::Assistant => "engine",
        Role::Other => "system",
    };

    if message.is_document_upload() {
        let metadata = message.metadata.as_ref();
        let filename = metadata
            .and_then(|m| m.get("filename"))
            .and_then(|v| v.as_str())
            .unwrap_or("document");
        let size = metadata
            .and_then(|m| m.get("size"))
            .and_then(|v| v.as_u64())
            .unwrap_or_default();
        let _ = writeln!(out, "{speaker}: [uploaded {filename}, {size} bytes]");
    } else {
        let _ = writeln!(out, "{speaker}: {}", message.content);
    }

    for use_case in message.use_case_refs.iter().flatten() {
        render_use_case(out, use_case);
    }
}

fn render_use_case(out: &mut String, use_case: &UseCase) {
    let id = use_case
        .id
        .as_ref()
        .map(|id| format!("#{id} "))
        .unwrap_or_default();
    let refined = if use_case.refined { " (refined)" } else { "" };
    let _ = write!(out, "  - {id}{} [{}]{refined}", use_case.title, use_case.status);
    if let (Some(score), Some(tier)) = (use_case.quality_score, use_case.quality_tier()) {
        let _ = write!(out, " quality {score:.0} ({tier:?})");
    }
    out.push('\n');

    render_list(out, "preconditions", &use_case.preconditions);
    if !use_case.main_flow.is_empty() {
        out.push_str("      main flow:\n");
        for (step, text) in use_case.main_flow.iter().enumerate() {
            let _ = writeln!(out, "        {}. {text}", step + 1);
        }
    }
    render_list(out, "sub flows", &use_case.sub_flows);
    render_list(out, "alternate flows", &use_case.alternate_flows);
    render_list(out, "outcomes", &use_case.outcomes);
    render_list(out, "stakeholders", &use_case.stakeholders);
}

fn render_list(out: &mut String, label: &str, items: &[String]) {
    if !items.is_empty() {
        let _ = writeln!(out, "      {label}: {}", items.join("; "));
    }
}

fn render_answer(answer: &QueryResponse) -> String {
    let mut out = format!("{}\n", answer.answer.trim_end());
    if !answer.relevant_use_cases.is_empty() {
        let _ = write!(out, "relevant: {}", answer.relevant_use_cases.join("; "));
        if let Some(total) = answer.total_use_cases {
            let _ = write!(out, " (of {total})");
        }
        out.push('\n');
    }
    out
}

fn render_sessions(sessions: &[SessionSummary]) -> String {
    if sessions.is_empty() {
        return "no sessions\n".to_string();
    }
    let mut out = String::new();
    for session in sessions {
        let _ = writeln!(
            out,
            "{}  {}  {}  last active {}",
            session.session_id,
            session.project_context.as_deref().unwrap_or("-"),
            session.domain.as_deref().unwrap_or("-"),
            session.last_active.as_deref().unwrap_or("never")
        );
    }
    out
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
