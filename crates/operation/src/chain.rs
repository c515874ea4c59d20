//! Walking up the context chain.
//!
//! After the scratch context is saved into the target, each ancestor is saved
//! in turn, one level per scope, until the configured depth is reached, the
//! chain ends, cancellation is observed or a save fails.

use std::sync::Arc;

use ctxop_core::{ScopedSession, TransactionalContext};
use tracing::{debug, warn};

use crate::error::AncestorSaveError;

/// Cancellation predicate consulted between and inside levels.
pub type CancelCheck = Arc<dyn Fn() -> bool + Send + Sync>;

/// Save `context` and up to `max_levels - 1` of its ancestors.
///
/// `context` is level 1. Each level is saved inside that context's own
/// scope; the walk moves to the parent only after the save returns. A
/// failure stops the walk and is reported with its level. Levels saved
/// before a failure or a cancellation stay saved.
pub async fn save_up_the_chain<C>(
    context: Option<Arc<C>>,
    max_levels: u32,
    is_cancelled: CancelCheck,
) -> Option<AncestorSaveError>
where
    C: TransactionalContext,
{
    let mut next = context;
    let mut remaining = max_levels;
    let mut level = 1;

    while let Some(context) = next {
        if remaining == 0 {
            debug!("Save depth reached at level {}", level);
            return None;
        }
        if is_cancelled() {
            debug!("Cancelled before saving level {}", level);
            return None;
        }

        let check = Arc::clone(&is_cancelled);
        let saved = context
            .perform(move |session| {
                if check() {
                    return Ok(false);
                }
                session.save().map(|()| true)
            })
            .await;

        match saved {
            Ok(Ok(true)) => debug!("Saved ancestor context at level {}", level),
            Ok(Ok(false)) => {
                debug!("Cancelled inside scope of level {}", level);
                return None;
            }
            Ok(Err(e)) | Err(e) => {
                warn!("Failed to save ancestor context at level {}: {}", level, e);
                return Some(AncestorSaveError::new(level, e));
            }
        }

        next = context.parent();
        remaining -= 1;
        level += 1;
    }

    debug!("Reached the top of the context chain");
    None
}
