use std::path::Path;

use anyhow::{Context, Result};

use crate::{
    app::{context::RequestContext, App},
    auth::{generate_token, hash_token},
    models::{AuthTokenType, SubscriptionStatus, User},
};

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")
}

async fn issue_signin_token(app: &App, ctx: &RequestContext, user: &User) -> Result<String> {
    let token = generate_token();
    app.store
        .issue_token(ctx, user.id, AuthTokenType::Signin, &hash_token(&token))
        .await?;
    Ok(token)
}

pub fn handle_user_add(app: &App, email: &str, verified: bool, subscription: &str) -> Result<()> {
    let subscription: SubscriptionStatus = subscription
        .parse()
        .with_context(|| format!("unknown subscription status {subscription:?}"))?;

    runtime()?.block_on(async {
        let ctx = RequestContext::anonymous();
        let user = app.store.create_user(&ctx, email, verified, subscription).await?;
        let token = issue_signin_token(app, &ctx, &user).await?;

        println!("created user {} ({})", user.id, user.email);
        println!("api token: {token}");
        Ok::<_, anyhow::Error>(())
    })
}

pub fn handle_user_token(app: &App, email: &str) -> Result<()> {
    runtime()?.block_on(async {
        let ctx = RequestContext::anonymous();
        let user = app.store.get_user_by_email(&ctx, email).await?;
        let token = issue_signin_token(app, &ctx, &user).await?;

        println!("api token for {}: {token}", user.email);
        Ok::<_, anyhow::Error>(())
    })
}

pub fn handle_import(app: &App, email: &str, file: &Path, source: &str, option: &str) -> Result<()> {
    let data = std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;

    runtime()?.block_on(async {
        let user = app
            .store
            .get_user_by_email(&RequestContext::anonymous(), email)
            .await?;
        let ctx = RequestContext::for_user(user.clone());
        let job = app.enqueue_import(&ctx, source, option, data).await?;

        println!("queued import {} for {}", job.id, user.email);
        println!("it runs the next time `bookshelf daemon` polls for jobs");
        Ok::<_, anyhow::Error>(())
    })
}
