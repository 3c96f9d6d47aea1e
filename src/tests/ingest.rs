use std::time::Duration;

use crate::{
    app::{context::RequestContext, errors::AppError, orchestrator::ClientContent},
    models::{Source, SubscriptionStatus},
    tests::create_env,
};

#[tokio::test]
async fn test_create_fetches_enriches_and_embeds() {
    let env = create_env();
    let user = env.user("reader@example.com", true, SubscriptionStatus::Free).await;
    env.fetcher.add_page(
        "https://example.com/ownership",
        "Ownership in Rust",
        "Every value has a single owner and is dropped when the owner goes out of scope.",
    );

    let ctx = RequestContext::for_user(user.clone());
    let item = env
        .app
        .ingestor
        .create(&ctx, &user, "http://Example.com/ownership/", Source::Web)
        .await
        .unwrap();

    assert_eq!(item.link, "https://example.com/ownership");
    assert_eq!(item.title, "Ownership in Rust");
    assert_eq!(item.article_lang, "en");
    assert_eq!(item.ai_summary.as_deref(), Some("A summary of the article."));
    assert_eq!(item.ai_tags.as_deref(), Some("reading,notes"));

    let full = env.store().get_full(&ctx, &item.id).await.unwrap();
    assert!(full.content.contains("single owner"));
    assert!(!full.content.contains("Home"));
    assert!(full.ai_markdown.unwrap().starts_with("# Notes"));
    assert_eq!(full.embedding.unwrap().len(), 768);
}

#[tokio::test]
async fn test_resave_returns_existing_item() {
    let env = create_env();
    let user = env.user("reader@example.com", true, SubscriptionStatus::Free).await;
    let ctx = RequestContext::for_user(user.clone());

    let first = env
        .app
        .ingestor
        .create(&ctx, &user, "https://example.com/a?b=2&a=1", Source::Web)
        .await
        .unwrap();
    let second = env
        .app
        .ingestor
        .create(&ctx, &user, "http://EXAMPLE.com/a/?a=1&b=2", Source::Api)
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(env.fetcher.calls(), 1);
}

#[tokio::test]
async fn test_unverified_user_lifetime_limit() {
    let env = create_env();
    let user = env.user("new@example.com", false, SubscriptionStatus::Free).await;
    for n in 0..10 {
        env.seed_item(&user, &format!("https://example.com/{n}"), "Seeded").await;
    }

    let ctx = RequestContext::for_user(user.clone());
    let err = env
        .app
        .ingestor
        .create(&ctx, &user, "https://example.com/a", Source::Api)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::UnverifiedLimitExceeded(10)));
    assert_eq!(err.status_code(), 403);
    assert_eq!(env.fetcher.calls(), 0);
}

#[tokio::test]
async fn test_free_user_daily_limit() {
    let env = create_env();
    let user = env.user("free@example.com", true, SubscriptionStatus::Free).await;
    for n in 0..20 {
        env.seed_item(&user, &format!("https://example.com/{n}"), "Seeded").await;
    }

    let ctx = RequestContext::for_user(user.clone());
    let err = env
        .app
        .ingestor
        .create(&ctx, &user, "https://example.com/one-more", Source::Api)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::DailyLimitExceeded(20)));
    assert_eq!(err.status_code(), 429);
}

#[tokio::test]
async fn test_premium_user_has_higher_daily_limit() {
    let env = create_env();
    let user = env.user("premium@example.com", true, SubscriptionStatus::Active).await;
    for n in 0..20 {
        env.seed_item(&user, &format!("https://example.com/{n}"), "Seeded").await;
    }

    let ctx = RequestContext::for_user(user.clone());
    let item = env
        .app
        .ingestor
        .create(&ctx, &user, "https://example.com/one-more", Source::Api)
        .await
        .unwrap();
    assert_eq!(item.user_id, user.id);
}

#[tokio::test]
async fn test_concurrent_saves_of_equivalent_links() {
    let env = create_env();
    env.fetcher.set_delay(Duration::from_millis(50));
    let user = env.user("reader@example.com", true, SubscriptionStatus::Free).await;
    let ctx = RequestContext::for_user(user.clone());

    let ingestor = &env.app.ingestor;
    let (a, b) = tokio::join!(
        ingestor.create(&ctx, &user, "https://Example.com/page/?b=2&a=1", Source::Api),
        ingestor.create(&ctx, &user, "https://example.com/page?a=1&b=2", Source::Api),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.id, b.id);
    assert_eq!(a.link, "https://example.com/page?a=1&b=2");
    let page = env.store().by_user(&ctx, user.id, 1, 10).await.unwrap();
    assert_eq!(page.items.len(), 1);
}

#[tokio::test]
async fn test_enrichment_failure_still_saves_item() {
    let env = create_env();
    env.generator.fail();
    env.embedder.fail();
    let user = env.user("reader@example.com", true, SubscriptionStatus::Free).await;
    let ctx = RequestContext::for_user(user.clone());

    let item = env
        .app
        .ingestor
        .create(&ctx, &user, "https://example.com/flaky", Source::Api)
        .await
        .unwrap();

    assert_eq!(item.ai_summary, None);
    let full = env.store().get_full(&ctx, &item.id).await.unwrap();
    assert_eq!(full.embedding, None);
    assert_eq!(full.ai_markdown, None);
    assert!(matches!(
        env.store().get_markdown(&ctx, &item.id).await,
        Err(AppError::NotFound)
    ));
}

#[tokio::test]
async fn test_create_with_client_content() {
    let env = create_env();
    let user = env.user("reader@example.com", true, SubscriptionStatus::Free).await;
    let ctx = RequestContext::for_user(user.clone());

    let content = ClientContent {
        html_content: Some(
            "<article><script>track()</script><p>Client side &amp; extracted text.</p></article>".into(),
        ),
        site_name: Some("<b>Example</b>".into()),
        image_url: Some("not a url".into()),
        published_time: Some("2024-03-01".into()),
        ..Default::default()
    };
    let item = env
        .app
        .ingestor
        .create_with_content(&ctx, &user, "https://example.com/client", Source::Web, content)
        .await
        .unwrap();

    assert_eq!(env.fetcher.calls(), 0);
    assert_eq!(item.title, "Unknown title");
    assert_eq!(item.site_name, "Example");
    assert_eq!(item.image_url, "");
    assert!(item.excerpt.contains("Client side & extracted text."));
    assert_eq!(
        item.published_time.map(|t| t.to_rfc3339()),
        Some("2024-03-01T00:00:00+00:00".to_string())
    );

    let prompts = env.generator.prompts();
    assert!(prompts.iter().all(|p| !p.contains("track()")));
}

#[tokio::test]
async fn test_cancelled_context_aborts_create() {
    let env = create_env();
    let user = env.user("reader@example.com", true, SubscriptionStatus::Free).await;
    let ctx = RequestContext::for_user(user.clone());
    ctx.cancel();

    let err = env
        .app
        .ingestor
        .create(&ctx, &user, "https://example.com/late", Source::Api)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Cancelled));
}

#[tokio::test]
async fn test_extract_only_never_persists() {
    let env = create_env();
    env.fetcher.add_page(
        "https://example.com/demo",
        "Demo article",
        &"Plenty of words in this demo article body. ".repeat(10),
    );
    let ctx = RequestContext::anonymous();

    let demo = env
        .app
        .ingestor
        .extract_only(&ctx, "https://example.com/demo")
        .await
        .unwrap();
    assert_eq!(demo.title, "Demo article");
    assert!(demo.content.starts_with("Plenty of words"));
    assert_eq!(demo.summary, "A summary of the article.");

    let short = env
        .app
        .ingestor
        .extract_only(&ctx, "https://example.com/short")
        .await
        .unwrap();
    assert_eq!(short.summary, "");

    assert!(matches!(
        env.app.ingestor.extract_only(&ctx, "ftp://example.com/x").await,
        Err(AppError::InvalidUrl(_))
    ));
}
