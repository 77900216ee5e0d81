use crate::accumulator::SourceAccumulator;
use crate::generator::GeneratorError;
use crate::sink::{LiveTreeSink, TreeUpdate};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use genui_evaluator::{evaluate, EvalError, ReferenceCatalog, ReferenceRegistry};
use genui_parser::{format_error, transform, ParseError};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Counters for one finished session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub fragments: usize,
    pub updates: usize,
    pub syntax_failures: usize,
    pub evaluation_failures: usize,
}

/// Why an accumulation state did not render
#[derive(Debug, Clone)]
enum Failure {
    Syntax(ParseError),
    Evaluation(EvalError),
}

impl Failure {
    fn kind(&self) -> &'static str {
        match self {
            Failure::Syntax(_) => "syntax",
            Failure::Evaluation(_) => "evaluation",
        }
    }
}

enum Attempt {
    Render(TreeUpdate),
    /// Evaluated to something that renders nothing
    Empty,
    Failed(Failure),
}

/// One generation: accumulates fragments and pushes every renderable state
/// to the live tree.
pub struct Session {
    catalog: Arc<ReferenceCatalog>,
    accumulator: SourceAccumulator,
    registry: ReferenceRegistry,
    last_failure: Option<Failure>,
}

impl Session {
    pub fn new(catalog: Arc<ReferenceCatalog>) -> Self {
        Self {
            catalog,
            accumulator: SourceAccumulator::new(),
            registry: ReferenceRegistry::new(),
            last_failure: None,
        }
    }

    /// Consume `input` until it ends, fails or the client goes away.
    ///
    /// Every fragment triggers a fresh transform and evaluation of the whole
    /// accumulation. Failures are expected mid-stream and only skip the
    /// update; the sink is marked done when input ends.
    #[instrument(skip_all, fields(references = self.catalog.len()))]
    pub async fn run<S>(mut self, mut input: S, mut sink: LiveTreeSink) -> SessionSummary
    where
        S: Stream<Item = Result<Bytes, GeneratorError>> + Unpin,
    {
        let mut summary = SessionSummary::default();
        info!("Session started");

        loop {
            let fragment = tokio::select! {
                biased;
                _ = sink.closed() => {
                    info!(fragments = summary.fragments, "Client disconnected; stopping session");
                    return summary;
                }
                fragment = input.next() => fragment,
            };
            let Some(fragment) = fragment else { break };
            let fragment = match fragment {
                Ok(fragment) => fragment,
                Err(error) => {
                    warn!(%error, "Generator failed; ending session");
                    break;
                }
            };

            summary.fragments += 1;
            self.accumulator.append(&fragment);

            match self.attempt() {
                Attempt::Render(update) => {
                    if sink.update(update).await.is_err() {
                        info!(fragments = summary.fragments, "Client disconnected; stopping session");
                        return summary;
                    }
                    summary.updates += 1;
                    self.last_failure = None;
                }
                Attempt::Empty => self.last_failure = None,
                Attempt::Failed(failure) => {
                    match failure {
                        Failure::Syntax(_) => summary.syntax_failures += 1,
                        Failure::Evaluation(_) => summary.evaluation_failures += 1,
                    }
                    self.last_failure = Some(failure);
                }
            }
        }

        self.accumulator.finish();
        self.report_unrenderable();
        sink.done();

        info!(
            fragments = summary.fragments,
            updates = summary.updates,
            syntax_failures = summary.syntax_failures,
            evaluation_failures = summary.evaluation_failures,
            "Session finished"
        );
        summary
    }

    fn attempt(&mut self) -> Attempt {
        let cleaned = self.accumulator.cleaned();

        let program = match transform(&cleaned) {
            Ok(program) => program,
            Err(error) => {
                debug!(kind = "syntax", incomplete = error.is_incomplete(), %error, "Accumulation not renderable");
                return Attempt::Failed(Failure::Syntax(error));
            }
        };

        let tree = match evaluate(&program, &self.catalog, &mut self.registry) {
            Ok(tree) => tree,
            Err(error) => {
                debug!(kind = "evaluation", %error, "Accumulation not renderable");
                return Attempt::Failed(Failure::Evaluation(error));
            }
        };

        if !tree.is_renderable() {
            debug!(kind = tree.type_name(), "Evaluated to an empty tree");
            return Attempt::Empty;
        }

        Attempt::Render(TreeUpdate {
            tree: Arc::new(tree),
            registry: self.registry.clone(),
            source: self.accumulator.raw().to_string(),
        })
    }

    /// Tell operators when a generation ended without ever settling
    fn report_unrenderable(&self) {
        let Some(failure) = &self.last_failure else {
            return;
        };

        match failure {
            Failure::Syntax(error) if error.is_incomplete() => {
                warn!(kind = failure.kind(), %error, "Generation ended with incomplete markup");
            }
            Failure::Syntax(error) => {
                let diagnostic = format_error(&self.accumulator.cleaned(), "generation", error);
                warn!(kind = failure.kind(), "Generation ended with invalid markup\n{}", diagnostic);
            }
            Failure::Evaluation(error) => {
                warn!(kind = failure.kind(), %error, "Generation ended with markup that fails to evaluate");
            }
        }
    }
}
