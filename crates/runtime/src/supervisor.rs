//! The supervisor: runs one user turn against a named workload and
//! bridges it to the session store and the event bus.
//!
//! Per turn: resolve the definition, build a workload instance with its
//! dependency handles, load or create the session, append the user
//! message, hand control to the workload, capture the final assistant
//! message, run history compaction when the workload declares a policy,
//! close the workload, and persist the session.

use std::path::PathBuf;
use std::sync::Arc;

use sr_domain::config::RuntimeConfig;
use sr_domain::error::{Error, Result};
use sr_domain::event::RuntimeEvent;
use sr_providers::ModelFactory;
use sr_sessions::{Content, Part, SessionEvent, SessionKey, SessionService};
use sr_tools::builtin::BuiltinRegistry;
use sr_tools::{AgentHost, ToolProvider};
use sr_workloads::WorkloadManager;

use crate::bus::EventBus;
use crate::cancel::CancelMap;
use crate::compaction;
use crate::workload::{create_workload, session_messages, WorkloadServices};

pub struct Supervisor {
    manager: Arc<WorkloadManager>,
    models: Arc<ModelFactory>,
    sessions: Arc<dyn SessionService>,
    bus: Arc<EventBus>,
    cancel_map: Arc<CancelMap>,
    config: RuntimeConfig,
    work_dir: PathBuf,
    system_message: String,
    project_context: String,
}

/// One user turn.
pub struct TurnRequest {
    pub workload: String,
    pub prompt: String,
    /// `(file name, content)` pairs appended to the user message.
    pub attachments: Vec<(String, String)>,
    pub app: String,
    pub user: String,
    /// Defaults to a timestamp stamp when absent.
    pub session_id: Option<String>,
}

#[derive(Debug)]
pub struct TurnResult {
    pub final_text: String,
    pub session: SessionKey,
    pub cancelled: bool,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        manager: Arc<WorkloadManager>,
        models: Arc<ModelFactory>,
        sessions: Arc<dyn SessionService>,
        bus: Arc<EventBus>,
        config: RuntimeConfig,
        work_dir: PathBuf,
        system_message: String,
        project_context: String,
    ) -> Self {
        Self {
            manager,
            models,
            sessions,
            bus,
            cancel_map: Arc::new(CancelMap::new()),
            config,
            work_dir,
            system_message,
            project_context,
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn manager(&self) -> &Arc<WorkloadManager> {
        &self.manager
    }

    /// Abort a running turn (user interrupt).
    pub fn abort(&self, session: &SessionKey) -> bool {
        self.cancel_map.cancel(&session.to_string())
    }

    /// Run one user turn to completion.
    pub async fn run_turn(&self, req: TurnRequest) -> Result<TurnResult> {
        let definition = self.manager.resolve(&req.workload).await?;

        let session_id = req
            .session_id
            .clone()
            .unwrap_or_else(|| chrono::Utc::now().format("%Y%m%d-%H%M%S").to_string());
        let key = SessionKey::new(req.app.clone(), req.user.clone(), session_id);

        let session = match self.sessions.get(&key).await? {
            Some(existing) => existing,
            None => self.sessions.create(&key).await?,
        };
        let history = session_messages(&session);

        // The initial user message: prompt plus any attachments.
        let mut parts = vec![Part::Text { text: req.prompt.clone() }];
        for (name, content) in &req.attachments {
            parts.push(Part::Text { text: format!("---\n# {name}\n\n{content}\n---") });
        }
        self.sessions
            .append_event(
                &key,
                SessionEvent::new("user", Content { role: "user".into(), parts }),
            )
            .await?;

        // Per-instance dependencies.
        let mut tools = ToolProvider::new(self.work_dir.clone(), self.config.tools.clone());
        tools.set_host(Arc::new(ManagerHost {
            manager: self.manager.clone(),
            models: self.models.clone(),
            bus: self.bus.clone(),
            config: self.config.clone(),
            work_dir: self.work_dir.clone(),
            system_message: self.system_message.clone(),
            project_context: self.project_context.clone(),
        }));
        let services = WorkloadServices {
            models: self.models.clone(),
            tools: Arc::new(tools),
            bus: self.bus.clone(),
            system_message: self.system_message.clone(),
            project_context: self.project_context.clone(),
        };
        let workload = create_workload(&definition, services);

        // Observe the turn's own events so tool traffic can be persisted
        // in emission order, call and response adjacent.
        let mut turn_events = self.bus.subscribe();

        let cancel = self.cancel_map.register(&key.to_string());
        let run_result = workload.run(&history, req.prompt.clone(), cancel).await;
        self.cancel_map.remove(&key.to_string());

        self.persist_tool_traffic(&key, &workload.card().name, &mut turn_events)
            .await?;

        let outcome = match run_result {
            Ok(output) => output,
            Err(Error::Cancelled) => {
                self.bus.publish(RuntimeEvent::Info { message: "turn cancelled".into() });
                workload.close().await;
                return Ok(TurnResult { final_text: String::new(), session: key, cancelled: true });
            }
            Err(e) => {
                tracing::error!(workload = %req.workload, error = %e, "turn failed");
                self.bus.publish(RuntimeEvent::Error { message: e.to_string() });
                workload.close().await;
                return Err(e);
            }
        };

        if !outcome.final_text.is_empty() {
            self.sessions
                .append_event(
                    &key,
                    SessionEvent::text(workload.card().name, "model", outcome.final_text.clone()),
                )
                .await?;
        }

        if let Some((max_input_tokens, strategy)) = workload.compaction() {
            self.compact(&key, max_input_tokens, strategy).await?;
        }

        workload.close().await;
        tracing::info!(session = %key, workload = %req.workload, "turn complete");
        Ok(TurnResult { final_text: outcome.final_text, session: key, cancelled: false })
    }

    /// Append the turn's tool-call/tool-response pairs to the session in
    /// the order the runtime observed them.
    async fn persist_tool_traffic(
        &self,
        key: &SessionKey,
        agent: &str,
        rx: &mut tokio::sync::mpsc::UnboundedReceiver<Arc<RuntimeEvent>>,
    ) -> Result<()> {
        while let Ok(event) = rx.try_recv() {
            match &*event {
                RuntimeEvent::ToolCallEvent { call_id, tool_name, arguments } => {
                    self.sessions
                        .append_event(
                            key,
                            SessionEvent::new(
                                agent,
                                Content {
                                    role: "model".into(),
                                    parts: vec![Part::FunctionCall {
                                        id: call_id.clone(),
                                        name: tool_name.clone(),
                                        args: arguments.clone(),
                                    }],
                                },
                            ),
                        )
                        .await?;
                }
                RuntimeEvent::ToolResponse { call_id, tool_name, content, .. } => {
                    self.sessions
                        .append_event(
                            key,
                            SessionEvent::new(
                                agent,
                                Content {
                                    role: "tool".into(),
                                    parts: vec![Part::FunctionResponse {
                                        id: call_id.clone(),
                                        name: tool_name.clone(),
                                        response: serde_json::Value::String(content.clone()),
                                    }],
                                },
                            ),
                        )
                        .await?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn compact(
        &self,
        key: &SessionKey,
        max_input_tokens: u64,
        strategy: sr_domain::config::CompactionStrategy,
    ) -> Result<()> {
        let Some(mut session) = self.sessions.get(key).await? else {
            return Ok(());
        };
        let resolved = self.models.get_model(None)?;
        let outcome = compaction::compact_if_needed(
            &mut session,
            resolved.provider.as_ref(),
            max_input_tokens,
            strategy,
            self.config.compaction.target_ratio,
        )
        .await?;

        if let Some(outcome) = outcome {
            self.bus.publish(RuntimeEvent::HistoryCompaction {
                strategy: outcome.strategy.as_str().to_owned(),
                original_tokens: outcome.original_tokens,
                compacted_tokens: outcome.compacted_tokens,
                messages_removed: outcome.messages_removed,
            });
            self.sessions.replace_events(key, session.events).await?;
        }
        Ok(())
    }

    /// Manual `/compact`: a forced summarize of the current session.
    pub async fn compact_session(&self, key: &SessionKey) -> Result<()> {
        let Some(mut session) = self.sessions.get(key).await? else {
            self.bus.publish(RuntimeEvent::Info { message: "no history".into() });
            return Ok(());
        };
        if session.events.is_empty() {
            self.bus.publish(RuntimeEvent::Info { message: "no history".into() });
            return Ok(());
        }
        let resolved = self.models.get_model(None)?;
        let outcome = compaction::force_summarize(&mut session, resolved.provider.as_ref()).await?;
        match outcome {
            Some(outcome) => {
                self.bus.publish(RuntimeEvent::HistoryCompaction {
                    strategy: outcome.strategy.as_str().to_owned(),
                    original_tokens: outcome.original_tokens,
                    compacted_tokens: outcome.compacted_tokens,
                    messages_removed: outcome.messages_removed,
                });
                self.sessions.replace_events(key, session.events).await?;
            }
            None => {
                self.bus.publish(RuntimeEvent::Info { message: "no history".into() });
            }
        }
        Ok(())
    }
}

/// Workload-layer handle for the agent-facing built-ins (`run_agent`,
/// `list_agents`, `list_tools`).
struct ManagerHost {
    manager: Arc<WorkloadManager>,
    models: Arc<ModelFactory>,
    bus: Arc<EventBus>,
    config: RuntimeConfig,
    work_dir: PathBuf,
    system_message: String,
    project_context: String,
}

#[async_trait::async_trait]
impl AgentHost for ManagerHost {
    async fn run_agent(&self, agent: &str, input: &str) -> Result<String> {
        let definition = self.manager.resolve(agent).await?;
        // Sub-workloads get their own provider without a host, so spawned
        // agents cannot recurse indefinitely.
        let services = WorkloadServices {
            models: self.models.clone(),
            tools: Arc::new(ToolProvider::new(self.work_dir.clone(), self.config.tools.clone())),
            bus: self.bus.clone(),
            system_message: self.system_message.clone(),
            project_context: self.project_context.clone(),
        };
        let workload = create_workload(&definition, services);
        let output = workload
            .run(&[], input.to_owned(), crate::cancel::CancelToken::new())
            .await?;
        workload.close().await;
        Ok(output.final_text)
    }

    async fn list_agents(&self) -> Vec<(String, String)> {
        self.manager
            .discover()
            .await
            .into_iter()
            .map(|d| (d.metadata.name.clone(), d.metadata.description.clone()))
            .collect()
    }

    async fn list_tools(&self) -> Vec<(String, String)> {
        BuiltinRegistry::standard()
            .all()
            .iter()
            .map(|t| {
                let first_line = t
                    .description()
                    .lines()
                    .next()
                    .unwrap_or_default()
                    .to_owned();
                (t.name().to_owned(), first_line)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sr_providers::testing::ScriptedProvider;
    use sr_sessions::FileSessionStore;
    use sr_workloads::CodeAgentRegistry;

    struct Fixture {
        supervisor: Supervisor,
        _dir: tempfile::TempDir,
    }

    fn fixture(provider: ScriptedProvider, agents_src: Option<(&str, &str)>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        if let Some((name, src)) = agents_src {
            std::fs::write(dir.path().join(name), src).unwrap();
        }

        let models = Arc::new(ModelFactory::new(Some("scripted".into())));
        models.register("scripted", Arc::new(provider));

        let manager = Arc::new(WorkloadManager::new(
            vec![dir.path().to_path_buf()],
            Arc::new(sr_dsl::DslCompiler::default()),
            Arc::new(CodeAgentRegistry::with_builtins()),
            None,
        ));
        let sessions = Arc::new(FileSessionStore::new(dir.path().join("sessions")));

        let supervisor = Supervisor::new(
            manager,
            models,
            sessions,
            Arc::new(EventBus::new()),
            RuntimeConfig::default(),
            dir.path().to_path_buf(),
            String::new(),
            String::new(),
        );
        Fixture { supervisor, _dir: dir }
    }

    fn request(workload: &str, prompt: &str) -> TurnRequest {
        TurnRequest {
            workload: workload.into(),
            prompt: prompt.into(),
            attachments: Vec::new(),
            app: "testapp".into(),
            user: "tester".into(),
            session_id: Some("s1".into()),
        }
    }

    #[tokio::test]
    async fn turn_appends_user_and_assistant_events() {
        let f = fixture(ScriptedProvider::new().then_text("the answer"), None);
        let result = f.supervisor.run_turn(request("default", "what is it?")).await.unwrap();
        assert_eq!(result.final_text, "the answer");

        let session = f
            .supervisor
            .sessions
            .get(&result.session)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.events.len(), 2);
        assert_eq!(session.events[0].author, "user");
        assert_eq!(session.events[0].plain_text(), "what is it?");
        assert_eq!(session.events[1].author, "default");
        assert_eq!(session.events[1].plain_text(), "the answer");
    }

    #[tokio::test]
    async fn unknown_workload_fails_before_side_effects() {
        let f = fixture(ScriptedProvider::new(), None);
        let err = f.supervisor.run_turn(request("ghost", "hi")).await.unwrap_err();
        assert!(matches!(err, Error::WorkloadNotFound(_)));
    }

    #[tokio::test]
    async fn dsl_workload_runs_and_result_round_trips() {
        let src = "streetrace v1\n\
                   model fast = scripted test\n\
                   agent helper:\n    model fast\n    instruction \"h\"\n\
                   flow main:\n    run helper with $input -> $out\n    return $out\n";
        let f = fixture(
            ScriptedProvider::new().then_text("flow output"),
            Some(("review.sr", src)),
        );
        let result = f.supervisor.run_turn(request("review", "go")).await.unwrap();
        assert_eq!(result.final_text, "flow output");
    }

    #[tokio::test]
    async fn compaction_event_emitted_when_over_budget() {
        // 5 tokens per non-empty event; turn leaves 2 events → run more
        // turns to cross the declared 20-token budget.
        let provider = ScriptedProvider::new()
            .then_text("a1")
            .then_text("a2")
            .then_text("a3")
            .with_token_counter(|t| if t.is_empty() { 0 } else { 10 });
        let src = "streetrace v1\n\
                   model fast = scripted test\n    max_input_tokens 30\n    history truncate\n\
                   agent helper:\n    model fast\n    instruction \"h\"\n\
                   flow main:\n    run helper with $input -> $out\n    return $out\n";
        let f = fixture(provider, Some(("wf.sr", src)));
        let mut rx = f.supervisor.bus().subscribe();

        f.supervisor.run_turn(request("wf", "q1")).await.unwrap();
        f.supervisor.run_turn(request("wf", "q2")).await.unwrap();

        let mut compactions = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let RuntimeEvent::HistoryCompaction {
                strategy,
                original_tokens,
                compacted_tokens,
                messages_removed,
            } = &*ev
            {
                compactions.push((
                    strategy.clone(),
                    *original_tokens,
                    *compacted_tokens,
                    *messages_removed,
                ));
            }
        }
        assert_eq!(compactions.len(), 1);
        let (strategy, original, compacted, removed) = &compactions[0];
        assert_eq!(strategy, "truncate");
        assert_eq!(*original, 40);
        assert!(*compacted <= 24);
        assert!(*removed >= 1);
    }

    #[tokio::test]
    async fn manual_compact_on_missing_session_reports_no_history() {
        let f = fixture(ScriptedProvider::new(), None);
        let mut rx = f.supervisor.bus().subscribe();
        f.supervisor
            .compact_session(&SessionKey::new("testapp", "tester", "none"))
            .await
            .unwrap();
        let ev = rx.recv().await.unwrap();
        assert!(matches!(&*ev, RuntimeEvent::Info { message } if message == "no history"));
    }

    #[tokio::test]
    async fn session_persists_across_turns() {
        let f = fixture(
            ScriptedProvider::new().then_text("first").then_text("second"),
            None,
        );
        f.supervisor.run_turn(request("default", "one")).await.unwrap();
        f.supervisor.run_turn(request("default", "two")).await.unwrap();

        let session = f
            .supervisor
            .sessions
            .get(&SessionKey::new("testapp", "tester", "s1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.events.len(), 4);
        // Second turn saw the first turn's history.
        let texts: Vec<String> = session.events.iter().map(|e| e.plain_text()).collect();
        assert_eq!(texts, vec!["one", "first", "two", "second"]);
    }
}
