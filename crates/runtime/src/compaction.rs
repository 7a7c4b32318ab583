//! History compaction.
//!
//! When a session's estimated prompt-token count exceeds the model's
//! declared input budget, the log is shrunk below 80% of the limit
//! either by truncation (drop oldest, keep the system event and the most
//! recent tail) or by summarization (replace the dropped span with one
//! synthetic system-authored summary event). Both paths report a
//! `history-compaction` event and preserve the most recent user and
//! assistant messages verbatim.

use sr_domain::config::CompactionStrategy;
use sr_domain::error::Result;
use sr_domain::message::Message;
use sr_providers::{GenerateRequest, LlmProvider};
use sr_sessions::{Session, SessionEvent};

/// What a compaction pass did, for the `history-compaction` event.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactionOutcome {
    pub strategy: CompactionStrategy,
    pub original_tokens: u64,
    pub compacted_tokens: u64,
    pub messages_removed: usize,
}

/// Estimated prompt tokens for the whole session.
pub fn session_tokens(session: &Session, provider: &dyn LlmProvider) -> u64 {
    session
        .events
        .iter()
        .map(|e| provider.estimate_token_count(&e.plain_text()))
        .sum()
}

/// Compact the session in place when it exceeds `max_input_tokens`.
/// Returns `None` when the session already fits.
pub async fn compact_if_needed(
    session: &mut Session,
    provider: &dyn LlmProvider,
    max_input_tokens: u64,
    strategy: CompactionStrategy,
    target_ratio: f64,
) -> Result<Option<CompactionOutcome>> {
    let original_tokens = session_tokens(session, provider);
    if original_tokens <= max_input_tokens {
        return Ok(None);
    }
    let outcome =
        compact(session, provider, max_input_tokens, strategy, target_ratio, original_tokens)
            .await?;
    Ok(Some(outcome))
}

/// Forced summarize for the `/compact` command. Returns `None` for an
/// empty session ("no history").
pub async fn force_summarize(
    session: &mut Session,
    provider: &dyn LlmProvider,
) -> Result<Option<CompactionOutcome>> {
    if session.events.is_empty() {
        return Ok(None);
    }
    let original_tokens = session_tokens(session, provider);
    let outcome =
        compact(session, provider, 0, CompactionStrategy::Summarize, 0.0, original_tokens).await?;
    Ok(Some(outcome))
}

async fn compact(
    session: &mut Session,
    provider: &dyn LlmProvider,
    max_input_tokens: u64,
    strategy: CompactionStrategy,
    target_ratio: f64,
    original_tokens: u64,
) -> Result<CompactionOutcome> {
    let target = (max_input_tokens as f64 * target_ratio) as u64;
    let original_len = session.events.len();

    // The leading system event (if any) always survives.
    let system_event = session
        .events
        .first()
        .filter(|e| e.author == "system")
        .cloned();
    let body_start = usize::from(system_event.is_some());

    // Walk backwards accumulating the tail that fits under the target,
    // always keeping at least the last user and assistant messages.
    let min_keep = minimum_tail(session, body_start);
    let mut keep_from = session.events.len();
    let mut tail_tokens = 0u64;
    for i in (body_start..session.events.len()).rev() {
        let cost = provider.estimate_token_count(&session.events[i].plain_text());
        let must_keep = session.events.len() - i <= min_keep;
        if !must_keep && tail_tokens + cost > target {
            break;
        }
        tail_tokens += cost;
        keep_from = i;
    }

    let dropped: Vec<SessionEvent> = session.events[body_start..keep_from].to_vec();
    if dropped.is_empty() {
        // Nothing to drop; report a no-op pass.
        return Ok(CompactionOutcome {
            strategy,
            original_tokens,
            compacted_tokens: original_tokens,
            messages_removed: 0,
        });
    }

    let mut new_events = Vec::new();
    if let Some(system) = system_event {
        new_events.push(system);
    }
    if strategy == CompactionStrategy::Summarize {
        let summary = summarize_events(provider, &dropped).await?;
        new_events.push(SessionEvent::text("system", "system", summary));
    }
    new_events.extend_from_slice(&session.events[keep_from..]);

    let messages_removed = original_len.saturating_sub(new_events.len())
        + usize::from(strategy == CompactionStrategy::Summarize);
    session.events = new_events;
    let compacted_tokens = session_tokens(session, provider);

    tracing::info!(
        strategy = strategy.as_str(),
        original_tokens,
        compacted_tokens,
        messages_removed,
        "compacted session history"
    );

    Ok(CompactionOutcome { strategy, original_tokens, compacted_tokens, messages_removed })
}

/// How many trailing events must survive so the last user and assistant
/// messages stay verbatim.
fn minimum_tail(session: &Session, body_start: usize) -> usize {
    let len = session.events.len();
    let mut keep = 1usize;
    let mut seen_user = false;
    let mut seen_assistant = false;
    for (offset, event) in session.events[body_start..].iter().rev().enumerate() {
        if event.is_user() && !seen_user {
            seen_user = true;
            keep = keep.max(offset + 1);
        }
        if !event.is_user() && event.author != "system" && !seen_assistant {
            seen_assistant = true;
            keep = keep.max(offset + 1);
        }
        if seen_user && seen_assistant {
            break;
        }
    }
    keep.min(len)
}

async fn summarize_events(
    provider: &dyn LlmProvider,
    dropped: &[SessionEvent],
) -> Result<String> {
    let mut conversation = String::new();
    for event in dropped {
        let text = event.plain_text();
        if text.is_empty() {
            continue;
        }
        conversation.push_str(&event.author);
        conversation.push_str(": ");
        // Very long entries (tool results) are trimmed to keep the
        // summary prompt manageable.
        if text.len() > 2000 {
            conversation.push_str(&text[..1000]);
            conversation.push_str(" [...] ");
            conversation.push_str(&text[text.len() - 500..]);
        } else {
            conversation.push_str(&text);
        }
        conversation.push('\n');
    }

    let prompt = format!(
        "Summarize the following conversation history into a concise, structured \
         summary that preserves: the current goal, key decisions made, open \
         questions, important facts learned, and any pending work. Write in \
         present tense and omit pleasantries.\n\nCONVERSATION:\n{conversation}"
    );

    let resp = provider
        .generate(GenerateRequest { messages: vec![Message::user(prompt)], ..Default::default() })
        .await?;
    Ok(resp.content)
}
