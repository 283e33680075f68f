//! Concurrent field introspection.

use tokio::task::JoinSet;
use tracing::{debug, warn};

use trawl_core::DatasourceError;

use crate::guard::catch_panic;
use crate::protocol::{FieldsRequest, ServerMessage};
use crate::request::{Interrupted, RequestContext};

/// Serves a `FIELDS_REQUEST`.
///
/// Every resolvable datasource is queried concurrently and answered with
/// exactly one `FIELDS_RECEIVE` or `ERROR`, in completion order. Unknown
/// ids are logged and skipped. Cancellation abandons pending lookups and
/// emits a single `REQUEST_CANCELED`.
pub async fn run(ctx: RequestContext, request: FieldsRequest) {
    let mut lookups = JoinSet::new();
    let mut requested: Vec<&str> = Vec::new();

    for id in &request.datasources {
        if requested.contains(&id.as_str()) {
            continue;
        }
        requested.push(id);

        let Some(datasource) = ctx.datasources.get(id).cloned() else {
            warn!(request_id = %ctx.request_id, datasource = %id, "unknown datasource, skipped");
            continue;
        };
        let id = id.clone();
        let scope = ctx.scope.clone();
        lookups.spawn(async move {
            let result = catch_panic("fields lookup", datasource.get_fields(scope))
                .await
                .unwrap_or_else(|| Err(DatasourceError::Internal("field lookup panicked".into())));
            (id, result)
        });
    }

    loop {
        tokio::select! {
            biased;

            () = ctx.scope.cancelled() => {
                lookups.abort_all();
                ctx.canceled(None).await;
                return;
            }

            joined = lookups.join_next() => {
                let Some(joined) = joined else {
                    debug!(request_id = %ctx.request_id, "fields lookups finished");
                    return;
                };
                let (datasource, result) = match joined {
                    Ok(done) => done,
                    Err(e) => {
                        warn!(request_id = %ctx.request_id, error = %e, "fields lookup aborted");
                        continue;
                    }
                };

                let message = match result {
                    Ok(fields) => ServerMessage::FieldsReceive {
                        request_id: ctx.request_id.clone(),
                        datasource,
                        fields,
                    },
                    Err(error) => {
                        warn!(
                            request_id = %ctx.request_id,
                            datasource = %datasource,
                            error = %error,
                            "fields lookup failed"
                        );
                        ServerMessage::datasource_error(&ctx.request_id, datasource, error.to_string())
                    }
                };

                if ctx.send_or_cancel(message).await == Err(Interrupted::Closed) {
                    return;
                }
            }
        }
    }
}
