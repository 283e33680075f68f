//! Raw record retrieval from the session item cache.

use tracing::debug;

use crate::protocol::{ItemsRequest, ServerMessage};
use crate::request::{Interrupted, RequestContext};

/// Serves an `ITEMS_REQUEST`.
///
/// Emits one `ITEMS_RECEIVE` per cached node id, skipping unknown ids, then
/// `REQUEST_COMPLETED`. Cancellation between ids yields `REQUEST_CANCELED`
/// instead.
pub async fn run(ctx: RequestContext, request: ItemsRequest) {
    for item_id in request.items {
        if ctx.scope.is_cancelled() {
            ctx.canceled(None).await;
            return;
        }

        let records = match ctx.items.get(&item_id) {
            Some(records) if !records.is_empty() => records,
            _ => {
                debug!(request_id = %ctx.request_id, item_id = %item_id, "item not cached");
                continue;
            }
        };

        let message = ServerMessage::ItemsReceive {
            request_id: ctx.request_id.clone(),
            item_id,
            items: records,
        };
        match ctx.send_or_cancel(message).await {
            Ok(()) => {}
            Err(Interrupted::Canceled) => {
                ctx.canceled(None).await;
                return;
            }
            Err(Interrupted::Closed) => return,
        }
    }

    ctx.completed(None).await;
}
