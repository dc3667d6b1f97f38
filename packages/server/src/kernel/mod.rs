//! Kernel module - server infrastructure and dependencies.

pub mod cache;
pub mod collaborators;
pub mod deps;
pub mod notifications;
pub mod rate_limit;
pub mod scheduled_tasks;
pub mod test_dependencies;
pub mod traits;

pub use cache::ReadThroughCache;
pub use deps::ServerDeps;
pub use notifications::{Notification, NotificationHub, NotificationKind};
pub use rate_limit::RateLimiter;
pub use test_dependencies::TestDependencies;
pub use traits::*;

use std::future::Future;
use std::time::Duration;

use crate::common::{CoreError, CoreResult};

/// Bound a storage or collaborator call.
///
/// On timeout the underlying outcome is unknown; the caller must treat the
/// operation as failed and rely on a retry or a compensating step, never on
/// the write having happened.
pub async fn with_deadline<T, F>(limit: Duration, fut: F) -> CoreResult<T>
where
    F: Future<Output = CoreResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(CoreError::DeadlineExceeded),
    }
}
