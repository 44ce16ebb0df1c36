use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::Scheduler;

/// Why a callback did not complete normally.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallbackError {
    /// The callback gave up cooperatively. Treated like completion.
    #[error("callback cancelled")]
    Cancelled,

    /// Unexpected failure. The timer keeps its schedule and stays due.
    #[error("callback failed: {0}")]
    Failed(String),
}

/// What a callback gets to see when its timer fires.
#[derive(Clone)]
pub struct FireContext {
    pub timer: String,
    pub fired_at: DateTime<Utc>,
    pub interval_minutes: u32,
    /// Handle back into the scheduler, e.g. for `set_interval` on self.
    pub scheduler: Scheduler,
}

/// Work attached to a timer.
#[async_trait]
pub trait ReminderCallback: Send + Sync {
    async fn fire(&self, ctx: FireContext) -> Result<(), CallbackError>;
}

struct FnCallback<F>(F);

#[async_trait]
impl<F, Fut> ReminderCallback for FnCallback<F>
where
    F: Fn(FireContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), CallbackError>> + Send + 'static,
{
    async fn fire(&self, ctx: FireContext) -> Result<(), CallbackError> {
        (self.0)(ctx).await
    }
}

/// Adapt an async closure into a [`ReminderCallback`].
///
/// ```ignore
/// let cb = callback_fn(|ctx| async move {
///     log::info!("{} fired", ctx.timer);
///     Ok(())
/// });
/// ```
pub fn callback_fn<F, Fut>(f: F) -> Arc<dyn ReminderCallback>
where
    F: Fn(FireContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), CallbackError>> + Send + 'static,
{
    Arc::new(FnCallback(f))
}
