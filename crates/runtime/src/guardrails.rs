//! Guardrail handlers.
//!
//! Handler steps return an explicit outcome; the runtime dispatches on
//! the value rather than unwinding: `Continue`, `Block` (stop the turn),
//! `Retry` (restart the agent with a modified message), or `Masked`
//! (continue with a transformed message).

use sr_dsl::ast::{HandlerEvent, HandlerTiming};
use sr_dsl::codegen::program::{CompiledProgram, HandlerStep};

use sr_domain::event::RuntimeEvent;

use crate::context::WorkflowContext;

#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    Continue,
    Block(String),
    Retry(String),
    Masked(String),
}

/// Run every matching handler over `message`, folding mask transforms
/// and stopping at the first block/retry.
pub fn apply_handlers(
    program: &CompiledProgram,
    timing: HandlerTiming,
    event: HandlerEvent,
    ctx: &WorkflowContext,
    message: &str,
) -> HandlerOutcome {
    let mut current = message.to_owned();
    let mut masked = false;

    for handler in program.handlers_for(timing, event) {
        for step in &handler.steps {
            match step {
                HandlerStep::Mask { guardrail } => {
                    let transformed = mask_text(guardrail, &current);
                    if transformed != current {
                        tracing::debug!(guardrail, "guardrail masked content");
                        masked = true;
                        current = transformed;
                    }
                }
                HandlerStep::Block { condition } => {
                    if ctx.eval_truthy(condition).unwrap_or(false) {
                        return HandlerOutcome::Block("input blocked: guardrail triggered".into());
                    }
                }
                HandlerStep::Warn { message: warn_msg, condition } => {
                    let fires = match condition {
                        Some(c) => ctx.eval_truthy(c).unwrap_or(false),
                        None => true,
                    };
                    if fires {
                        ctx.bus.publish(RuntimeEvent::Warning { message: warn_msg.clone() });
                    }
                }
                HandlerStep::Retry { message: retry_msg, condition } => {
                    if ctx.eval_truthy(condition).unwrap_or(false) {
                        return HandlerOutcome::Retry(retry_msg.clone());
                    }
                }
            }
        }
    }

    if masked {
        HandlerOutcome::Masked(current)
    } else {
        HandlerOutcome::Continue
    }
}

/// Built-in masking guardrails by name. Unknown names pass content
/// through unchanged.
pub fn mask_text(guardrail: &str, text: &str) -> String {
    match guardrail {
        "pii" => {
            let email = regex::Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
                .expect("static regex");
            let digits = regex::Regex::new(r"\b\d{9,16}\b").expect("static regex");
            let masked = email.replace_all(text, "[email]");
            digits.replace_all(&masked, "[number]").into_owned()
        }
        "secrets" => {
            let key = regex::Regex::new(r"\b(sk|pk|key|token)[-_][A-Za-z0-9_-]{8,}\b")
                .expect("static regex");
            key.replace_all(text, "[secret]").into_owned()
        }
        _ => text.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;
    use sr_dsl::codegen::program::HandlerProgram;

    use crate::bus::EventBus;
    use crate::cancel::CancelToken;

    fn program_with(steps: Vec<HandlerStep>) -> CompiledProgram {
        let mut program = CompiledProgram::empty("t.sr");
        program.handlers.push(HandlerProgram {
            timing: HandlerTiming::Before,
            event: HandlerEvent::Model,
            steps,
        });
        program
    }

    fn ctx() -> WorkflowContext {
        WorkflowContext::new(Arc::new(EventBus::new()), CancelToken::new())
    }

    #[test]
    fn mask_pii_rewrites_message() {
        let program = program_with(vec![HandlerStep::Mask { guardrail: "pii".into() }]);
        let outcome = apply_handlers(
            &program,
            HandlerTiming::Before,
            HandlerEvent::Model,
            &ctx(),
            "reach me at alice@example.com",
        );
        assert_eq!(outcome, HandlerOutcome::Masked("reach me at [email]".into()));
    }

    #[test]
    fn clean_message_continues() {
        let program = program_with(vec![HandlerStep::Mask { guardrail: "pii".into() }]);
        let outcome = apply_handlers(
            &program,
            HandlerTiming::Before,
            HandlerEvent::Model,
            &ctx(),
            "nothing sensitive here",
        );
        assert_eq!(outcome, HandlerOutcome::Continue);
    }

    #[test]
    fn block_fires_on_truthy_condition() {
        let program = program_with(vec![HandlerStep::Block {
            condition: sr_dsl::ast::Expr::Var("flagged".into()),
        }]);
        let mut c = ctx();
        c.vars.insert("flagged".into(), json!(true));
        let outcome =
            apply_handlers(&program, HandlerTiming::Before, HandlerEvent::Model, &c, "msg");
        assert!(matches!(outcome, HandlerOutcome::Block(_)));
    }

    #[test]
    fn retry_carries_its_message() {
        let program = program_with(vec![HandlerStep::Retry {
            message: "rephrase the request".into(),
            condition: sr_dsl::ast::Expr::Var("invalid".into()),
        }]);
        let mut c = ctx();
        c.vars.insert("invalid".into(), json!(true));
        let outcome =
            apply_handlers(&program, HandlerTiming::Before, HandlerEvent::Model, &c, "msg");
        assert_eq!(outcome, HandlerOutcome::Retry("rephrase the request".into()));
    }

    #[tokio::test]
    async fn warn_publishes_and_continues() {
        let program = program_with(vec![HandlerStep::Warn {
            message: "heads up".into(),
            condition: None,
        }]);
        let c = ctx();
        let mut rx = c.bus.subscribe();
        let outcome =
            apply_handlers(&program, HandlerTiming::Before, HandlerEvent::Model, &c, "msg");
        assert_eq!(outcome, HandlerOutcome::Continue);
        let ev = rx.recv().await.unwrap();
        assert!(matches!(&*ev, RuntimeEvent::Warning { message } if message == "heads up"));
    }

    #[test]
    fn handlers_for_other_events_do_not_fire() {
        let program = program_with(vec![HandlerStep::Block {
            condition: sr_dsl::ast::Expr::Literal(sr_dsl::ast::Literal::Bool(true)),
        }]);
        let outcome = apply_handlers(
            &program,
            HandlerTiming::After,
            HandlerEvent::Model,
            &ctx(),
            "msg",
        );
        assert_eq!(outcome, HandlerOutcome::Continue);
    }

    #[test]
    fn secrets_guardrail_masks_keys() {
        assert_eq!(
            mask_text("secrets", "use sk-abcdef123456 now"),
            "use [secret] now"
        );
    }
}
