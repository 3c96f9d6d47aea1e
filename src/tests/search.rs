use crate::{
    app::context::RequestContext,
    models::{AiFields, Source, SubscriptionStatus},
    tests::create_env,
};

#[tokio::test]
async fn test_empty_query_returns_nothing() {
    let env = create_env();
    let user = env.user("reader@example.com", true, SubscriptionStatus::Free).await;
    env.seed_item(&user, "https://example.com/a", "Anything").await;
    let ctx = RequestContext::for_user(user.clone());

    for query in ["", "   ", "();&|"] {
        let hits = env.app.search.search(&ctx, user.id, query).await.unwrap();
        assert!(hits.is_empty(), "{query:?} should match nothing");
    }
}

#[tokio::test]
async fn test_operator_words_are_plain_tokens() {
    let env = create_env();
    let user = env.user("reader@example.com", true, SubscriptionStatus::Free).await;
    let item = env.seed_item(&user, "https://example.com/sql", "Foo and bar").await;
    env.seed_item(&user, "https://example.com/other", "Something else").await;
    let ctx = RequestContext::for_user(user.clone());

    env.store()
        .update_ai(
            &ctx,
            &item.id,
            AiFields {
                summary: "Never drop the production database.".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let hits = env
        .app
        .search
        .search(&ctx, user.id, "foo AND bar; DROP")
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, item.id);
}

#[tokio::test]
async fn test_title_match_outranks_tag_match() {
    let env = create_env();
    let user = env.user("reader@example.com", true, SubscriptionStatus::Free).await;
    let tagged = env.seed_item(&user, "https://example.com/tagged", "Unrelated notes").await;
    let titled = env.seed_item(&user, "https://example.com/titled", "Tokio runtime internals").await;
    let ctx = RequestContext::for_user(user.clone());

    env.store()
        .update_ai(
            &ctx,
            &tagged.id,
            AiFields {
                tags: "tokio,async".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let hits = env.app.search.search(&ctx, user.id, "tokio").await.unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, titled.id);
    assert!(hits[0].rank >= hits[1].rank);
    assert!(hits[0].headline.contains("<strong>"));
}

#[tokio::test]
async fn test_substring_fallback() {
    let env = create_env();
    let user = env.user("reader@example.com", true, SubscriptionStatus::Free).await;
    let item = env.seed_item(&user, "https://example.com/own", "Ownership basics").await;
    let ctx = RequestContext::for_user(user.clone());

    let hits = env.app.search.search(&ctx, user.id, "wnersh").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, item.id);
    assert_eq!(hits[0].rank, 1.0);
    assert_eq!(hits[0].headline, hits[0].excerpt);
}

#[tokio::test]
async fn test_search_is_scoped_to_user() {
    let env = create_env();
    let alice = env.user("alice@example.com", true, SubscriptionStatus::Free).await;
    let bob = env.user("bob@example.com", true, SubscriptionStatus::Free).await;
    env.seed_item(&alice, "https://example.com/a", "Lifetimes explained").await;
    let ctx = RequestContext::for_user(bob.clone());

    assert!(env.app.search.search(&ctx, bob.id, "lifetimes").await.unwrap().is_empty());
    assert!(env.app.search.search(&ctx, bob.id, "ifetime").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_vector_search_prefers_matching_item() {
    let env = create_env();
    let user = env.user("reader@example.com", true, SubscriptionStatus::Active).await;
    let ctx = RequestContext::for_user(user.clone());
    env.fetcher.add_page(
        "https://example.com/borrow",
        "Borrow checker explained",
        "The borrow checker enforces aliasing rules.",
    );
    env.fetcher.add_page(
        "https://example.com/gardening",
        "Growing tomatoes",
        "Water the plants every morning.",
    );

    let ingestor = &env.app.ingestor;
    let borrow = ingestor
        .create(&ctx, &user, "https://example.com/borrow", Source::Web)
        .await
        .unwrap();
    ingestor
        .create(&ctx, &user, "https://example.com/gardening", Source::Web)
        .await
        .unwrap();
    // no embedding, so never a candidate
    env.seed_item(&user, "https://example.com/plain", "Borrow checker explained").await;

    let hits = env
        .app
        .search
        .vector_search(
            &ctx,
            user.id,
            "Borrow checker explained The borrow checker enforces aliasing rules.",
        )
        .await
        .unwrap();

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].item.id, borrow.id);
    assert!(hits[0].score >= 0.9, "score was {}", hits[0].score);
    assert!(hits[1].score < hits[0].score);
}
