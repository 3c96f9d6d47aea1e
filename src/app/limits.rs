//! Per-user quotas backed by the store.

use crate::{
    app::{context::RequestContext, errors::AppError},
    config::LimitsConfig,
    models::User,
    store::{today, CreationPolicy, Store},
};

#[derive(Clone)]
pub struct RateLimiter {
    store: Store,
    limits: LimitsConfig,
}

impl RateLimiter {
    pub fn new(store: Store, limits: LimitsConfig) -> Self {
        Self { store, limits }
    }

    /// Unverified users get a lifetime cap, everyone else a daily one.
    pub fn creation_policy(&self, user: &User) -> CreationPolicy {
        if !user.email_verified {
            CreationPolicy::Lifetime {
                limit: self.limits.unverified_total,
            }
        } else if user.is_premium() {
            CreationPolicy::Daily {
                limit: self.limits.premium_daily,
            }
        } else {
            CreationPolicy::Daily {
                limit: self.limits.free_daily,
            }
        }
    }

    pub async fn check_creation(&self, ctx: &RequestContext, user: &User) -> Result<CreationPolicy, AppError> {
        let policy = self.creation_policy(user);
        let count = self.store.count_for_policy(ctx, user.id, policy).await?;
        policy.check(count)?;
        Ok(policy)
    }

    pub fn ai_limit(&self, user: &User) -> i64 {
        if user.is_premium() {
            self.limits.ai_premium_daily
        } else {
            self.limits.ai_free_daily
        }
    }

    /// Atomically count one question; `AIQuotaExceeded` leaves the count as it was.
    pub async fn consume_ai_question(&self, ctx: &RequestContext, user: &User) -> Result<i64, AppError> {
        self.store
            .increment_ai_questions(ctx, user.id, today(), self.ai_limit(user))
            .await
    }

    pub async fn remaining_ai_questions(&self, ctx: &RequestContext, user: &User) -> Result<i64, AppError> {
        let count = self.store.ai_question_count(ctx, user.id, today()).await?;
        Ok((self.ai_limit(user) - count).max(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::SubscriptionStatus, store::open_temp};

    fn user(id: i64, verified: bool, status: SubscriptionStatus) -> User {
        User {
            id,
            email: format!("{id}@example.com"),
            email_verified: verified,
            subscription_status: status,
        }
    }

    #[test]
    fn test_creation_policy_tiers() {
        let (store, _tmp) = open_temp();
        let limiter = RateLimiter::new(store, LimitsConfig::default());

        assert_eq!(
            limiter.creation_policy(&user(1, false, SubscriptionStatus::Active)),
            CreationPolicy::Lifetime { limit: 10 }
        );
        assert_eq!(
            limiter.creation_policy(&user(1, true, SubscriptionStatus::Trialing)),
            CreationPolicy::Daily { limit: 100 }
        );
        assert_eq!(
            limiter.creation_policy(&user(1, true, SubscriptionStatus::PastDue)),
            CreationPolicy::Daily { limit: 20 }
        );
    }

    #[tokio::test]
    async fn test_remaining_matches_consumed() {
        let (store, _tmp) = open_temp();
        let ctx = RequestContext::anonymous();
        let free = store
            .create_user(&ctx, "free@example.com", true, SubscriptionStatus::Free)
            .await
            .unwrap();
        let limiter = RateLimiter::new(store, LimitsConfig::default());

        assert_eq!(limiter.remaining_ai_questions(&ctx, &free).await.unwrap(), 5);
        for expected in 1..=5 {
            assert_eq!(limiter.consume_ai_question(&ctx, &free).await.unwrap(), expected);
            assert_eq!(limiter.remaining_ai_questions(&ctx, &free).await.unwrap(), 5 - expected);
        }

        let res = limiter.consume_ai_question(&ctx, &free).await;
        assert!(matches!(res, Err(AppError::AIQuotaExceeded(5))));
        assert_eq!(limiter.remaining_ai_questions(&ctx, &free).await.unwrap(), 0);
    }
}
