use std::future::Future;

use rand::Rng;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::{app::errors::AppError, models::User};

/// Per-call carrier threaded through every core operation.
///
/// Holds the cancellation token, the request span used for logging and the
/// authenticated user (absent for the demo endpoint).
#[derive(Clone, Debug)]
pub struct RequestContext {
    cancel: CancellationToken,
    span: tracing::Span,
    user: Option<User>,
}

impl RequestContext {
    pub fn for_user(user: User) -> Self {
        let request_id = request_id();
        let span = tracing::info_span!("request", request_id = %request_id, user_id = user.id);
        Self {
            cancel: CancellationToken::new(),
            span,
            user: Some(user),
        }
    }

    pub fn anonymous() -> Self {
        let request_id = request_id();
        Self {
            cancel: CancellationToken::new(),
            span: tracing::info_span!("request", request_id = %request_id),
            user: None,
        }
    }

    /// Anonymous context cancelled together with `parent`, used by background jobs.
    pub fn child_of(parent: &CancellationToken) -> Self {
        let mut ctx = Self::anonymous();
        ctx.cancel = parent.child_token();
        ctx
    }

    pub fn user(&self) -> Result<&User, AppError> {
        self.user.as_ref().ok_or(AppError::Unauthorized)
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancels the context when the returned guard is dropped, e.g. when the
    /// HTTP handler future is dropped on client disconnect.
    pub fn cancel_on_drop(&self) -> DropGuard {
        self.cancel.clone().drop_guard()
    }

    /// Run `fut` until it completes or the context is cancelled.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AppError::Cancelled),
            res = fut => res,
        }
    }
}

fn request_id() -> String {
    format!("{:016x}", rand::rng().random::<u64>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubscriptionStatus;

    fn user() -> User {
        User {
            id: 7,
            email: "reader@example.com".into(),
            email_verified: true,
            subscription_status: SubscriptionStatus::Free,
        }
    }

    #[tokio::test]
    async fn test_run_completes() {
        let ctx = RequestContext::for_user(user());
        let res = ctx.run(async { Ok::<_, AppError>(42) }).await.unwrap();
        assert_eq!(res, 42);
        assert_eq!(ctx.user().unwrap().id, 7);
    }

    #[tokio::test]
    async fn test_run_aborts_when_cancelled() {
        let ctx = RequestContext::anonymous();
        let trigger = ctx.clone();
        let handle = tokio::spawn(async move {
            ctx.run(async {
                tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                Ok::<_, AppError>(())
            })
            .await
        });

        trigger.cancel();
        let res = handle.await.unwrap();
        assert!(matches!(res, Err(AppError::Cancelled)));
    }

    #[tokio::test]
    async fn test_drop_guard_cancels() {
        let ctx = RequestContext::anonymous();
        {
            let _guard = ctx.cancel_on_drop();
        }
        assert!(ctx.is_cancelled());
        assert!(matches!(ctx.user(), Err(AppError::Unauthorized)));
    }

    #[test]
    fn test_child_follows_parent() {
        let parent = CancellationToken::new();
        let ctx = RequestContext::child_of(&parent);
        parent.cancel();
        assert!(ctx.is_cancelled());
    }
}
