//! Search orchestration.
//!
//! One worker per target datasource, all sharing the request scope. Each
//! worker owns its own [`DedupIndex`] and [`Batch`]; nothing is shared
//! between workers except the session outbound queue and item cache.
//!
//! Per (request-id, datasource) the client sees zero or more
//! `SEARCH_RECEIVE` batches followed by exactly one terminal message:
//! `REQUEST_COMPLETED`, `REQUEST_CANCELED` or an `ERROR`. A panicking
//! worker ends without a terminal.

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use trawl_core::{project, Batch, Datasource, DatasourceError, DedupIndex, SearchOptions};

use crate::guard::catch_panic;
use crate::protocol::{SearchRequest, ServerMessage};
use crate::request::{Interrupted, RequestContext};

/// How a worker ended.
#[derive(Debug)]
enum Outcome {
    Completed,
    Canceled,
    Failed(DatasourceError),
    Closed,
}

impl From<Interrupted> for Outcome {
    fn from(interrupted: Interrupted) -> Self {
        match interrupted {
            Interrupted::Canceled => Self::Canceled,
            Interrupted::Closed => Self::Closed,
        }
    }
}

/// Serves a `SEARCH_REQUEST`, returning once every worker has ended.
pub async fn run(ctx: RequestContext, request: SearchRequest) {
    let targets = request.targets();
    if targets.is_empty() {
        let _ = ctx
            .send(ServerMessage::error(&ctx.request_id, "no datasource set"))
            .await;
        return;
    }

    let options = SearchOptions {
        query: request.query,
        fields: request.fields,
        from: request.from,
        size: request.size,
    };

    let mut workers = JoinSet::new();
    for id in targets {
        let Some(datasource) = ctx.datasources.get(&id).cloned() else {
            warn!(request_id = %ctx.request_id, datasource = %id, "unknown datasource");
            let message = ServerMessage::datasource_error(
                &ctx.request_id,
                &id,
                format!("unknown datasource: {id}"),
            );
            if ctx.send(message).await.is_err() {
                return;
            }
            continue;
        };

        let worker = Worker {
            ctx: ctx.clone(),
            datasource: id,
            options: options.clone(),
        };
        workers.spawn(catch_panic("search worker", worker.run(datasource)));
    }

    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            warn!(request_id = %ctx.request_id, error = %e, "search worker aborted");
        }
    }
    debug!(request_id = %ctx.request_id, "search finished");
}

struct Worker {
    ctx: RequestContext,
    datasource: String,
    options: SearchOptions,
}

impl Worker {
    async fn run(self, source: Arc<dyn Datasource>) {
        debug!(
            request_id = %self.ctx.request_id,
            datasource = %self.datasource,
            query = %self.options.query,
            "search worker started"
        );

        let (mut items, mut errors) = source
            .search(self.ctx.scope.clone(), self.options.clone())
            .into_parts();

        let mut index = DedupIndex::new(self.datasource.clone());
        let mut batch = Batch::new(self.ctx.batching.max_batch_size);
        let period = self.ctx.batching.flush_interval;
        let mut flush_timer = tokio::time::interval_at(Instant::now() + period, period);
        flush_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut errors_open = true;

        let outcome = loop {
            tokio::select! {
                biased;

                () = self.ctx.scope.cancelled() => break Outcome::Canceled,

                error = errors.recv(), if errors_open => match error {
                    Some(error) => break Outcome::Failed(error),
                    // The error stream closing alone does not end the search.
                    None => errors_open = false,
                },

                item = items.recv() => {
                    let Some(record) = item else {
                        match self.flush(&mut batch).await {
                            Ok(()) => break Outcome::Completed,
                            Err(interrupted) => break interrupted.into(),
                        }
                    };

                    let projected = project(&record.fields, &self.options.fields);
                    let Some(node) = index.observe(projected) else {
                        continue;
                    };
                    self.ctx.items.append(&node.id, record);
                    batch.push(node.clone());

                    if batch.is_full() {
                        if let Err(interrupted) = self.flush(&mut batch).await {
                            break interrupted.into();
                        }
                    }
                }

                _ = flush_timer.tick() => {
                    if let Err(interrupted) = self.flush(&mut batch).await {
                        break interrupted.into();
                    }
                }
            }
        };

        debug!(
            request_id = %self.ctx.request_id,
            datasource = %self.datasource,
            nodes = index.len(),
            outcome = ?outcome,
            "search worker stopped"
        );

        let datasource = Some(self.datasource.clone());
        match outcome {
            Outcome::Completed => self.ctx.completed(datasource).await,
            Outcome::Canceled => self.ctx.canceled(datasource).await,
            Outcome::Failed(error) => {
                warn!(
                    request_id = %self.ctx.request_id,
                    datasource = %self.datasource,
                    error = %error,
                    "datasource error"
                );
                let _ = self
                    .ctx
                    .send(ServerMessage::datasource_error(
                        &self.ctx.request_id,
                        &self.datasource,
                        error.to_string(),
                    ))
                    .await;
            }
            Outcome::Closed => {}
        }
    }

    /// Emits the pending batch, if any.
    async fn flush(&self, batch: &mut Batch) -> Result<(), Interrupted> {
        if batch.is_empty() {
            return Ok(());
        }
        let message = ServerMessage::SearchReceive {
            request_id: self.ctx.request_id.clone(),
            datasource: self.datasource.clone(),
            query: self.options.query.clone(),
            results: batch.take(),
        };
        self.ctx.send_or_cancel(message).await
    }
}
