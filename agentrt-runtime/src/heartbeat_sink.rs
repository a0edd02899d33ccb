//! Default `TransitionSink`: logs degraded/recovered heartbeat transitions.
//! The distilled spec names no other downstream consumer of these events
//! (§4.7, §8 property 8); an embedding deployment wanting to page on them
//! would supply its own `TransitionSink` instead of this one.

use agentrt_shared::heartbeat::{HeartbeatSnapshot, Transition, TransitionKind, TransitionSink};
use async_trait::async_trait;
use tracing::{info, warn};

pub struct LoggingTransitionSink;

#[async_trait]
impl TransitionSink for LoggingTransitionSink {
    async fn on_transition(&self, transition: Transition, snapshot: &HeartbeatSnapshot) {
        match transition.kind {
            TransitionKind::Degraded => {
                warn!(component = %transition.component, overall = ?snapshot.overall, "component degraded");
            }
            TransitionKind::Recovered => {
                info!(component = %transition.component, overall = ?snapshot.overall, "component recovered");
            }
        }
    }
}
