use chrono_tz::Tz;
use parking_lot::Mutex;
use std::sync::Arc;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::dispatcher::{ActionDispatcher, DispatchPolicy, DispatchReport};
use super::entity::{EntityExtractor, Gazetteer};
use super::event::{ConversationId, Reply, Utterance};
use super::intent::{IntentClassifier, IntentLabel, RuleClassifier};
use super::normalizer::normalize;
use super::resolver::{Resolver, Transition, TurnInput, TurnOutcome};
use super::state::{PhaseKind, StateDelta};
use super::store::ContextStore;
use super::telemetry::{DispatchOutcome, StateResetCause, TelemetryEvent, TelemetryRecorder, TelemetrySnapshot};
use super::time::ReferenceClock;
use crate::config::{ConfigError, CopilotConfig};
use crate::outputs::realize;
use crate::services::Collaborators;

/// Everything one turn produced.
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub reply: Reply,
    pub outcome: TurnOutcome,
    /// Present only when the turn reached READY.
    pub dispatch: Option<DispatchReport>,
    /// Phases the conversation went through during the turn.
    pub path: Vec<PhaseKind>,
}

/// The conversational pipeline, shared by every conversation.
///
/// **KERNEL LAW**: the context store lock is held only for the resolver step.
/// Perception runs before it, dispatch after it, and the dispatch result is
/// folded back in a second short update.
pub struct Copilot {
    classifier: Arc<dyn IntentClassifier>,
    extractor: EntityExtractor,
    resolver: Resolver,
    store: Arc<ContextStore>,
    dispatcher: ActionDispatcher,
    telemetry: Arc<Mutex<TelemetryRecorder>>,
    tz: Tz,
}

impl Copilot {
    pub fn new(config: &CopilotConfig, collaborators: Collaborators) -> Result<Self, ConfigError> {
        config.validate()?;
        let tz = config.tz()?;
        let gazetteer = match &config.gazetteer_path {
            Some(path) => Gazetteer::load(path)?,
            None => Gazetteer::campus_default(),
        };
        info!(entries = gazetteer.len(), timezone = %tz, "copilot pipeline configured");

        let extractor = EntityExtractor::new(Arc::new(gazetteer), config.max_fuzzy_edits);
        Ok(Self {
            classifier: Arc::new(RuleClassifier::default()),
            resolver: Resolver::new(extractor.clone(), config.intent_threshold, config.max_clarifications),
            extractor,
            store: Arc::new(ContextStore::new(config.idle_timeout(), config.history_len)),
            dispatcher: ActionDispatcher::new(
                collaborators,
                DispatchPolicy::from_config(&config.dispatcher),
                config.default_origin.clone(),
            ),
            telemetry: Arc::new(Mutex::new(TelemetryRecorder::new())),
            tz,
        })
    }

    /// Swap the scoring backend. The resolver only sees ranked candidates.
    pub fn with_classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn store(&self) -> &Arc<ContextStore> {
        &self.store
    }

    pub fn telemetry(&self) -> Arc<Mutex<TelemetryRecorder>> {
        self.telemetry.clone()
    }

    pub fn telemetry_snapshot(&self) -> TelemetrySnapshot {
        self.telemetry.lock().snapshot()
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    /// Runs a turn with the utterance's own timestamp as reference "now".
    pub async fn respond(&self, utterance: &Utterance) -> TurnReport {
        let clock = ReferenceClock::new(utterance.timestamp(), self.tz);
        self.handle(utterance, &clock).await
    }

    /// Explicit session reset from the transport.
    pub fn reset(&self, id: &ConversationId) -> bool {
        let removed = self.store.reset(id);
        if removed {
            info!(conversation = %id, "session reset");
            self.telemetry.lock().record(TelemetryEvent::StateReset {
                cause: StateResetCause::Requested,
            });
        }
        removed
    }

    pub async fn handle(&self, utterance: &Utterance, clock: &ReferenceClock) -> TurnReport {
        let id = utterance.conversation_id();

        // === 1. PERCEIVE (pure, no lock) ===
        let text = normalize(utterance.text());
        let entities = self.extractor.extract(&text, clock);
        let candidates = self.classifier.classify(&text);
        debug!(
            conversation = %id,
            text = utterance.text(),
            entities = entities.len(),
            top = ?candidates.first().map(|c| (c.intent, c.confidence)),
            "utterance perceived"
        );

        // === 2. TRANSITION (atomic per conversation) ===
        let input = TurnInput {
            text: &text,
            entities: &entities,
            candidates: &candidates,
            clock,
            sender: utterance.sender_id(),
        };
        let transition = self.store.transact(id, clock.now, |state| {
            let transition = self.resolver.step(state, &input);
            for delta in &transition.deltas {
                state.reduce(delta.clone());
            }
            if let Err(err) = state.validate_at_rest() {
                error!(conversation = %id, error = %err, "transition left a corrupt state, resetting to IDLE");
                state.reduce(StateDelta::Reset);
            }
            transition
        });

        // === 3. OBSERVE ===
        self.observe(&transition);

        // === 4. DISPATCH (lock released) ===
        let dispatch = match &transition.outcome {
            TurnOutcome::Ready(request) => {
                let pending = InFlight {
                    store: &self.store,
                    id,
                    intent: request.intent(),
                    at: clock.now,
                    armed: true,
                };
                let report = self.dispatcher.dispatch(request).await;

                // === 5. FOLD BACK ===
                pending.complete(report.result.is_success());
                self.telemetry.lock().record(TelemetryEvent::Dispatch {
                    intent: request.intent(),
                    outcome: match report.result.failure_kind() {
                        None => DispatchOutcome::Success,
                        Some(kind) => DispatchOutcome::Failed(kind),
                    },
                    attempts: report.attempts,
                    latency_ms: report.latency.as_millis() as u64,
                });
                Some(report)
            }
            _ => None,
        };

        // === 6. REALIZE ===
        let reply = realize(
            id.clone(),
            &transition.outcome,
            dispatch.as_ref().map(|d| &d.result),
            clock.tz,
        );
        info!(conversation = %id, outcome = ?transition.outcome.kind(), reply = ?reply.kind, "turn complete");

        TurnReport {
            reply,
            outcome: transition.outcome,
            dispatch,
            path: transition.path,
        }
    }

    fn observe(&self, transition: &Transition) {
        let mut telemetry = self.telemetry.lock();
        if transition.reset {
            telemetry.record(TelemetryEvent::StateReset {
                cause: StateResetCause::Corrupt,
            });
        }
        for pair in transition.path.windows(2) {
            telemetry.record(TelemetryEvent::PhaseTransition {
                from: pair[0],
                to: pair[1],
            });
        }
        match &transition.outcome {
            TurnOutcome::Clarify { intent, slot, attempts } => telemetry.record(TelemetryEvent::Clarification {
                intent: *intent,
                slot: *slot,
                attempts: *attempts,
            }),
            TurnOutcome::Unhandled { reason } => telemetry.record(TelemetryEvent::Unhandled { reason: *reason }),
            _ => {}
        }
        telemetry.record(TelemetryEvent::TurnCompleted {
            outcome: transition.outcome.kind(),
        });
    }
}

/// Settles the in-flight count raised by `StateDelta::Dispatching`. If the turn
/// future is dropped mid-dispatch, the drop settles it as a failure so the
/// conversation stays evictable.
struct InFlight<'a> {
    store: &'a ContextStore,
    id: &'a ConversationId,
    intent: IntentLabel,
    at: DateTime<Utc>,
    armed: bool,
}

impl InFlight<'_> {
    fn complete(mut self, success: bool) {
        self.settle(success);
    }

    fn settle(&mut self, success: bool) {
        if !std::mem::replace(&mut self.armed, false) {
            return;
        }
        self.store.modify(self.id, |state| {
            state.reduce(StateDelta::Completed {
                intent: self.intent,
                success,
                at: self.at,
            })
        });
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(conversation = %self.id, intent = %self.intent, "turn dropped mid-dispatch");
            self.settle(false);
        }
    }
}
