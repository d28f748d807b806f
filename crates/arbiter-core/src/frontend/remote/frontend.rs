//! Pipeline-side driver of the decision service.
//!
//! Each batch is published, then the pipeline thread polls until the client
//! confirms its answers. Answers are re-validated here before they are
//! handed back; whatever is still unresolved is published again, for at
//! most `max_rounds` rounds.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};

use super::protocol::DecisionView;
use super::server::ServerHandle;
use super::state::{PendingEntry, Poll, ServiceState};
use crate::config::RemoteConfig;
use crate::domain::decision::Decision;
use crate::domain::errors::DecisionError;
use crate::domain::ids::DecisionId;
use crate::ports::frontend::{BatchAnswer, Frontend, PromptContext, Resolution};
use crate::registry::DecisionRegistry;

pub struct RemoteFrontend {
    state: ServiceState,
    server: ServerHandle,
    poll_interval: Duration,
    max_rounds: usize,
}

impl RemoteFrontend {
    /// Bind the service and start its worker thread.
    pub fn start(config: &RemoteConfig) -> Result<Self, DecisionError> {
        let state = ServiceState::new();
        let server = ServerHandle::spawn(&config.bind, state.clone())
            .map_err(|e| DecisionError::Remote(format!("bind {}: {e}", config.bind)))?;
        Ok(Self {
            state,
            server,
            poll_interval: config.poll_interval(),
            max_rounds: config.max_rounds.max(1),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    /// Shared state, for in-process clients.
    pub fn state(&self) -> &ServiceState {
        &self.state
    }

    /// Block until the client confirmed or cancelled the published batch.
    ///
    /// Losing the worker thread leaves no way to get answers, so the whole
    /// process exits.
    fn wait(&self) -> Result<Vec<(DecisionId, BatchAnswer)>, DecisionError> {
        loop {
            match self.state.poll() {
                Poll::Waiting => {}
                Poll::Complete(answers) => return Ok(answers),
                Poll::Cancelled => return Err(DecisionError::Cancelled),
            }
            if !self.server.is_alive() {
                error!("decision service worker died, aborting");
                std::process::exit(1);
            }
            thread::sleep(self.poll_interval);
        }
    }

    fn resolve(
        &self,
        decisions: Vec<&Decision>,
    ) -> Result<Vec<(DecisionId, BatchAnswer)>, DecisionError> {
        let positions: HashMap<DecisionId, usize> = decisions
            .iter()
            .enumerate()
            .map(|(i, d)| (d.id(), i))
            .collect();
        let mut remaining = decisions;
        let mut resolved = Vec::with_capacity(remaining.len());

        for round in 1..=self.max_rounds {
            if remaining.is_empty() {
                break;
            }
            let entries = remaining
                .iter()
                .map(|d| pending_entry(self, d, positions[&d.id()]))
                .collect::<Result<Vec<_>, _>>()?;
            self.state.publish(entries)?;
            info!(round, count = remaining.len(), "waiting for remote answers");

            let mut answers: HashMap<DecisionId, BatchAnswer> =
                self.wait()?.into_iter().collect();

            let mut unresolved = Vec::new();
            for decision in remaining {
                match answers.remove(&decision.id()) {
                    Some(BatchAnswer::Answered(answer)) => match decision.validate(answer) {
                        Ok(answer) => resolved.push((decision.id(), BatchAnswer::Answered(answer))),
                        Err(e) => {
                            warn!(decision = %decision, error = %e, "remote answer rejected");
                            unresolved.push(decision);
                        }
                    },
                    Some(BatchAnswer::Skipped) if decision.allow_skip() => {
                        resolved.push((decision.id(), BatchAnswer::Skipped));
                    }
                    _ => unresolved.push(decision),
                }
            }
            for id in answers.keys() {
                warn!(decision = %id, "dropping answer for a decision that is not pending");
            }
            remaining = unresolved;
        }

        if !remaining.is_empty() {
            return Err(DecisionError::RetriesExhausted {
                unresolved: remaining.len(),
                rounds: self.max_rounds,
            });
        }
        resolved.sort_by_key(|(id, _)| positions[id]);
        Ok(resolved)
    }
}

fn pending_entry(
    frontend: &RemoteFrontend,
    decision: &Decision,
    index: usize,
) -> Result<PendingEntry, DecisionError> {
    let options = frontend
        .present(decision, &PromptContext::default())
        .options
        .iter()
        .map(|o| o.keyword().to_string())
        .collect();
    let view = DecisionView::new(decision, index, options)
        .map_err(|e| DecisionError::Remote(e.to_string()))?;
    Ok(PendingEntry {
        view,
        check: decision.answer_check(),
    })
}

impl Frontend for RemoteFrontend {
    fn solve_at(
        &mut self,
        decision: &Decision,
        _context: &PromptContext,
    ) -> Result<Resolution, DecisionError> {
        let mut answers = self.resolve(vec![decision])?;
        match answers.pop() {
            Some((_, BatchAnswer::Answered(answer))) => Ok(Resolution::Answered(answer)),
            Some((_, BatchAnswer::Skipped)) => Ok(Resolution::Skip),
            None => Err(DecisionError::RetriesExhausted {
                unresolved: 1,
                rounds: self.max_rounds,
            }),
        }
    }

    fn solve_batch(
        &mut self,
        registry: &DecisionRegistry,
        ids: &[DecisionId],
    ) -> Result<Vec<(DecisionId, BatchAnswer)>, DecisionError> {
        let decisions = ids
            .iter()
            .map(|id| registry.decision(*id))
            .collect::<Result<Vec<_>, _>>()?;
        self.resolve(decisions.into_iter().filter(|d| d.is_open()).collect())
    }

    fn shutdown(&mut self, success: bool) {
        self.server.stop(success);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::answer::Answer;
    use crate::domain::decision::DecisionSpec;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn config() -> RemoteConfig {
        RemoteConfig {
            bind: "127.0.0.1:0".to_string(),
            poll_interval_ms: 5,
            max_rounds: 3,
        }
    }

    /// Answers every published batch from another thread with `reply`.
    fn answer_from_thread(
        state: ServiceState,
        reply: impl Fn(&DecisionView) -> serde_json::Value + Send + 'static,
        batches: usize,
    ) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(10);
            let mut served = 0;
            while served < batches && Instant::now() < deadline {
                let Some(views) = state.get_decisions() else {
                    thread::sleep(Duration::from_millis(2));
                    continue;
                };
                for view in &views {
                    state.answer(&view.id.to_string(), &reply(view));
                }
                if state.answers_done() {
                    served += 1;
                }
            }
        })
    }

    #[test]
    fn batch_is_answered_in_pipeline_order() {
        let mut registry = DecisionRegistry::new();
        let merge = registry.create(DecisionSpec::boolean("Merge?")).unwrap();
        let class = registry
            .create(DecisionSpec::choice("Class?", ["IfcPipe", "HVAC-Distributor"]))
            .unwrap();
        let mut frontend = RemoteFrontend::start(&config()).unwrap();
        let client = answer_from_thread(
            frontend.state().clone(),
            |view| match view.question.as_str() {
                "Merge?" => json!(true),
                _ => json!("HVAC-Distributor"),
            },
            1,
        );

        let answers = frontend.solve_batch(&registry, &[merge, class]).unwrap();
        client.join().unwrap();
        frontend.shutdown(true);

        assert_eq!(
            answers,
            vec![
                (merge, BatchAnswer::Answered(Answer::Bool(true))),
                (class, BatchAnswer::Answered(Answer::Choice("HVAC-Distributor".into()))),
            ]
        );
    }

    #[test]
    fn answers_rejected_on_every_round_exhaust_the_retries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut registry = DecisionRegistry::new();
        // accepted by the service, rejected again on collection
        let flaky = registry
            .create(
                DecisionSpec::boolean("Flaky?")
                    .validator(move |_| counter.fetch_add(1, Ordering::SeqCst) % 2 == 0),
            )
            .unwrap();
        let mut frontend = RemoteFrontend::start(&config()).unwrap();
        let client = answer_from_thread(frontend.state().clone(), |_| json!(true), 3);

        let err = frontend.solve_batch(&registry, &[flaky]).unwrap_err();
        client.join().unwrap();
        frontend.shutdown(false);

        assert!(matches!(
            err,
            DecisionError::RetriesExhausted {
                unresolved: 1,
                rounds: 3
            }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert!(registry.decision(flaky).unwrap().is_open());
    }

    #[test]
    fn client_cancel_aborts_the_batch() {
        let mut registry = DecisionRegistry::new();
        let merge = registry.create(DecisionSpec::boolean("Merge?")).unwrap();
        let mut frontend = RemoteFrontend::start(&config()).unwrap();
        let state = frontend.state().clone();
        let client = thread::spawn(move || {
            while state.get_decisions().is_none() {
                thread::sleep(Duration::from_millis(2));
            }
            state.cancel();
        });

        let err = frontend.solve(registry.decision(merge).unwrap()).unwrap_err();
        client.join().unwrap();
        frontend.shutdown(false);
        assert!(err.is_cancelled());
    }

    #[test]
    fn single_decision_can_be_skipped_remotely() {
        let mut registry = DecisionRegistry::new();
        let id = registry
            .create(DecisionSpec::boolean("Optional?").allow_skip(true))
            .unwrap();
        let mut frontend = RemoteFrontend::start(&config()).unwrap();
        let client = answer_from_thread(frontend.state().clone(), |_| json!(null), 1);

        let value = registry.decide(id, &mut frontend).unwrap();
        client.join().unwrap();
        frontend.shutdown(true);

        assert_eq!(value, None);
        assert!(!registry.decision(id).unwrap().is_open());
    }
}
