//! StreetRace command-line entry point.
//!
//! Wires the compiler, workload manager, session store, model factory,
//! and supervisor together, then runs a single non-interactive turn (the
//! interactive terminal UI is a separate layer driven through the event
//! bus).

mod args;
mod logging;
mod system_context;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use sr_domain::config::RuntimeConfig;
use sr_domain::event::RuntimeEvent;
use sr_providers::ModelFactory;
use sr_runtime::{EventBus, Supervisor, TurnRequest};
use sr_sessions::{FileSessionStore, SessionService};
use sr_workloads::{CodeAgentRegistry, WorkloadManager};

use crate::args::Args;
use crate::system_context::SystemContext;

fn main() -> ExitCode {
    let args = Args::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to start tokio runtime");

    match runtime.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let work_dir = args.working_dir()?;
    let _log_guard = logging::init(&work_dir, args.verbose);

    let config = RuntimeConfig::default();
    let session_root = work_dir.join(&config.sessions.root);
    let sessions: Arc<dyn SessionService> = Arc::new(FileSessionStore::new(&session_root));

    let compiler = Arc::new(sr_dsl::DslCompiler::default());
    let manager = Arc::new(WorkloadManager::new(
        WorkloadManager::default_search_paths(&work_dir),
        compiler,
        Arc::new(CodeAgentRegistry::with_builtins()),
        args.agent_uri_auth(),
    ));

    let app = args.effective_app_name(&work_dir);
    let user = args.effective_user_id();

    if args.list_agents {
        for def in manager.discover().await {
            println!(
                "{:<24} [{}] {}",
                def.metadata.name,
                def.metadata.format.as_str(),
                def.metadata.description
            );
        }
        return Ok(());
    }

    if args.list_sessions {
        for summary in sessions.list(&app, &user).await? {
            println!(
                "{:<24} {:>5} events  updated {}",
                summary.id,
                summary.events,
                summary.last_update.format("%Y-%m-%d %H:%M:%S")
            );
        }
        return Ok(());
    }

    let Some(prompt) = args.non_interactive_prompt() else {
        anyhow::bail!("no prompt given; pass --prompt or trailing arguments (interactive mode lives in the UI layer)");
    };

    // Providers register here. The adapters themselves live outside this
    // crate; the factory falls back to the environment-selected provider
    // id, so a missing registration fails with a clear message.
    let models = Arc::new(ModelFactory::new(args.model.clone()));

    let system = SystemContext::new(&work_dir);
    let bus = Arc::new(EventBus::new());
    let supervisor = Supervisor::new(
        manager,
        models,
        sessions,
        bus.clone(),
        config,
        work_dir,
        system.system_message(),
        system.project_context(),
    );

    // Drain runtime events to stderr so stdout stays clean for the
    // final answer.
    let mut rx = bus.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match &*event {
                RuntimeEvent::Warning { message } => eprintln!("warning: {message}"),
                RuntimeEvent::Error { message } => eprintln!("error: {message}"),
                RuntimeEvent::Info { message } => eprintln!("{message}"),
                RuntimeEvent::ToolCallEvent { tool_name, .. } => {
                    eprintln!("→ {tool_name}");
                }
                _ => {}
            }
        }
    });

    let result = supervisor
        .run_turn(TurnRequest {
            workload: args.agent.clone(),
            prompt,
            attachments: Vec::new(),
            app,
            user,
            session_id: args.session_id.clone(),
        })
        .await?;

    printer.abort();

    println!("{}", result.final_text);
    if let Some(out) = &args.out {
        std::fs::write(out, &result.final_text)?;
        tracing::info!(path = %out.display(), "wrote final response");
    }
    Ok(())
}
