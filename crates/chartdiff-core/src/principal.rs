//! Running host operations under the elevated principal.

use std::future::Future;

use chartdiff_state::{ElevatedPrincipal, Permission};
use tracing::Instrument;

use crate::error::Result;

/// Authorise `principal` for `permission`, then run `operation` inside a
/// span naming the principal and the reason.
pub async fn with_elevated_principal<T, F>(
    principal: &dyn ElevatedPrincipal,
    reason: &str,
    permission: Permission,
    operation: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    principal.authorize(reason, permission).await?;
    let span = tracing::debug_span!(
        "chartdiff.elevated",
        principal = %principal.name(),
        reason = %reason,
        permission = %permission,
    );
    operation.instrument(span).await
}
