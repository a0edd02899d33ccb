//! Bounded agent loop: an explicit `for step in 1..=max_steps` driven by the
//! responder's return envelope (final answer vs. tool call), matching
//! distilled spec §4.3 and the "no hidden continuations" design note in §9.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Identifies the chat context a general/objective task is executed on
/// behalf of, preferring the task's source trace over synthetic identifiers.
#[derive(Debug, Clone)]
pub struct AgentLoopContext {
    pub connector: String,
    pub workspace_id: String,
    pub context_id: String,
    pub external_id: String,
    pub display_name: String,
    pub user_id: String,
    /// Resolution of open question #2: a single flag derived from the
    /// task's `route_class` presence (routed chat tasks: false; system
    /// objective/reindex tasks: true).
    pub allow_sensitive_tools: bool,
    pub ground_first_step: bool,
    pub ground_every_step: bool,
}

#[derive(Debug, Clone)]
pub struct AgentLoopLimits {
    pub max_steps: u32,
    pub max_turn_duration: Duration,
    pub max_tool_calls_per_turn: u32,
    pub min_final_confidence: f64,
}

impl Default for AgentLoopLimits {
    fn default() -> Self {
        Self {
            max_steps: 20,
            max_turn_duration: Duration::from_secs(300),
            max_tool_calls_per_turn: 50,
            min_final_confidence: 0.1,
        }
    }
}

impl From<&agentrt_shared::config::AgentLoopLimits> for AgentLoopLimits {
    fn from(cfg: &agentrt_shared::config::AgentLoopLimits) -> Self {
        Self {
            max_steps: cfg.max_steps,
            max_turn_duration: Duration::from_secs(cfg.max_turn_duration_sec),
            max_tool_calls_per_turn: cfg.max_tool_calls_per_turn,
            min_final_confidence: cfg.min_final_confidence,
        }
    }
}

/// One tool invocation requested by the responder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// What the responder decided to do on a given step.
#[derive(Debug, Clone)]
pub enum StepOutcome {
    Final { reply: String, confidence: f64 },
    Tool(ToolCall),
}

/// One entry in the trace persisted to the task artifact.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub step: u32,
    pub tool_name: Option<String>,
    pub tool_args: Option<String>,
    pub tool_output: Option<String>,
    pub tool_error: Option<String>,
}

/// Drives the next step given the prompt and prior trace. Implementations
/// are the out-of-scope LLM responder HTTP client (distilled spec §1);
/// this crate only defines the interface it is called through.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn step(
        &self,
        ctx: &AgentLoopContext,
        prompt: &str,
        history: &[StepRecord],
        ground: bool,
    ) -> Result<StepOutcome, String>;

    /// Best-effort synthesis used when the loop is force-terminated by
    /// hitting a bound rather than receiving a final answer.
    async fn synthesize_summary(&self, prompt: &str, history: &[StepRecord]) -> String {
        let _ = history;
        format!("Reached step limit before completing: {prompt}")
    }
}

/// Dispatches a named tool call. Implementations are the out-of-scope
/// sandboxed action layer (distilled spec §1).
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    async fn call(&self, ctx: &AgentLoopContext, call: &ToolCall) -> Result<String, String>;
}

pub struct AgentLoopOutcome {
    pub final_reply: String,
    pub trace: Vec<StepRecord>,
    pub forced_termination: bool,
}

/// Runs the bounded agent loop to completion or forced termination.
pub async fn run(
    ctx: &AgentLoopContext,
    prompt: &str,
    responder: &dyn Responder,
    tools: &dyn ToolRegistry,
    limits: &AgentLoopLimits,
) -> AgentLoopOutcome {
    let start = Instant::now();
    let mut trace = Vec::new();
    let mut tool_calls_this_turn = 0u32;

    for step in 1..=limits.max_steps {
        if start.elapsed() > limits.max_turn_duration {
            let reply = responder.synthesize_summary(prompt, &trace).await;
            return AgentLoopOutcome {
                final_reply: reply,
                trace,
                forced_termination: true,
            };
        }

        let ground = if step == 1 {
            ctx.ground_first_step
        } else {
            ctx.ground_every_step
        };

        let outcome = match responder.step(ctx, prompt, &trace, ground).await {
            Ok(outcome) => outcome,
            Err(err) => {
                trace.push(StepRecord {
                    step,
                    tool_name: None,
                    tool_args: None,
                    tool_output: None,
                    tool_error: Some(err.clone()),
                });
                continue;
            }
        };

        match outcome {
            StepOutcome::Final { reply, confidence } => {
                if confidence < limits.min_final_confidence && step < limits.max_steps {
                    trace.push(StepRecord {
                        step,
                        tool_name: None,
                        tool_args: None,
                        tool_output: Some(format!(
                            "final answer rejected: confidence {confidence} below minimum {}",
                            limits.min_final_confidence
                        )),
                        tool_error: None,
                    });
                    continue;
                }
                return AgentLoopOutcome {
                    final_reply: reply,
                    trace,
                    forced_termination: false,
                };
            }
            StepOutcome::Tool(call) => {
                tool_calls_this_turn += 1;
                if tool_calls_this_turn > limits.max_tool_calls_per_turn {
                    let reply = responder.synthesize_summary(prompt, &trace).await;
                    return AgentLoopOutcome {
                        final_reply: reply,
                        trace,
                        forced_termination: true,
                    };
                }
                let args_repr = call.arguments.to_string();
                let result = tools.call(ctx, &call).await;
                let record = match result {
                    Ok(output) => StepRecord {
                        step,
                        tool_name: Some(call.name.clone()),
                        tool_args: Some(truncate(&args_repr, 2000)),
                        tool_output: Some(truncate(&output, 2000)),
                        tool_error: None,
                    },
                    Err(err) => StepRecord {
                        step,
                        tool_name: Some(call.name.clone()),
                        tool_args: Some(truncate(&args_repr, 2000)),
                        tool_output: None,
                        tool_error: Some(truncate(&err, 2000)),
                    },
                };
                trace.push(record);
            }
        }
    }

    let reply = responder.synthesize_summary(prompt, &trace).await;
    AgentLoopOutcome {
        final_reply: reply,
        trace,
        forced_termination: true,
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn ctx() -> AgentLoopContext {
        AgentLoopContext {
            connector: "orchestrator".to_string(),
            workspace_id: "ws".to_string(),
            context_id: "system:task-worker".to_string(),
            external_id: "system:task-worker".to_string(),
            display_name: "system".to_string(),
            user_id: "system".to_string(),
            allow_sensitive_tools: true,
            ground_first_step: false,
            ground_every_step: false,
        }
    }

    struct ImmediateFinalResponder;

    #[async_trait]
    impl Responder for ImmediateFinalResponder {
        async fn step(
            &self,
            _ctx: &AgentLoopContext,
            prompt: &str,
            _history: &[StepRecord],
            _ground: bool,
        ) -> Result<StepOutcome, String> {
            Ok(StepOutcome::Final {
                reply: format!("pong: {prompt}"),
                confidence: 0.9,
            })
        }
    }

    struct NoopTools;

    #[async_trait]
    impl ToolRegistry for NoopTools {
        async fn call(&self, _ctx: &AgentLoopContext, _call: &ToolCall) -> Result<String, String> {
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn immediate_final_returns_without_forced_termination() {
        let outcome = run(
            &ctx(),
            "echo",
            &ImmediateFinalResponder,
            &NoopTools,
            &AgentLoopLimits::default(),
        )
        .await;
        assert_eq!(outcome.final_reply, "pong: echo");
        assert!(!outcome.forced_termination);
        assert!(outcome.trace.is_empty());
    }

    struct AlwaysToolResponder {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Responder for AlwaysToolResponder {
        async fn step(
            &self,
            _ctx: &AgentLoopContext,
            _prompt: &str,
            _history: &[StepRecord],
            _ground: bool,
        ) -> Result<StepOutcome, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(StepOutcome::Tool(ToolCall {
                name: "noop".to_string(),
                arguments: serde_json::json!({}),
            }))
        }
    }

    #[tokio::test]
    async fn exceeding_max_steps_forces_termination_with_synthesized_summary() {
        let limits = AgentLoopLimits {
            max_steps: 3,
            ..AgentLoopLimits::default()
        };
        let responder = AlwaysToolResponder {
            calls: AtomicU32::new(0),
        };
        let outcome = run(&ctx(), "do work", &responder, &NoopTools, &limits).await;
        assert!(outcome.forced_termination);
        assert_eq!(outcome.trace.len(), 3);
        assert!(outcome.final_reply.contains("do work"));
    }

    struct LowConfidenceThenFinalResponder {
        attempts: Mutex<u32>,
    }

    #[async_trait]
    impl Responder for LowConfidenceThenFinalResponder {
        async fn step(
            &self,
            _ctx: &AgentLoopContext,
            _prompt: &str,
            _history: &[StepRecord],
            _ground: bool,
        ) -> Result<StepOutcome, String> {
            let mut attempts = self.attempts.lock().unwrap();
            *attempts += 1;
            if *attempts == 1 {
                Ok(StepOutcome::Final {
                    reply: "unsure".to_string(),
                    confidence: 0.01,
                })
            } else {
                Ok(StepOutcome::Final {
                    reply: "confident now".to_string(),
                    confidence: 0.9,
                })
            }
        }
    }

    #[tokio::test]
    async fn low_confidence_final_is_rejected_and_retried() {
        let responder = LowConfidenceThenFinalResponder {
            attempts: Mutex::new(0),
        };
        let outcome = run(
            &ctx(),
            "question",
            &responder,
            &NoopTools,
            &AgentLoopLimits::default(),
        )
        .await;
        assert_eq!(outcome.final_reply, "confident now");
        assert!(!outcome.forced_termination);
    }
}
