mod common;

use anyhow::Context;
use common::{PASSWORD, TestContext, client};
use gatehouse::DenyReason;
use gatehouse::store::{KeyValueStore, keys};
use gatehouse::token::{TokenType, ValidationOptions};
use std::time::Duration;

#[tokio::test]
async fn revocation_wins_over_a_cached_verification() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;
    let identity = ctx.add_user("dave@example.com", "user").await?;
    let client = client("198.51.100.40");
    let token = ctx.gatehouse.issuer().issue_access(&identity)?;
    let validator = ctx.gatehouse.tokens();

    let first = validator
        .validate(&token, &ValidationOptions::default(), &client)
        .await
        .allowed()
        .context("fresh token")?;
    assert_eq!(first.subject_id, identity.user_id);
    assert_eq!(first.token_type, TokenType::Access);
    assert_eq!(validator.cache().len().await, 1);

    // Written behind the validator's back, so the cache entry survives.
    ctx.store
        .set(&keys::blacklist(&token), "1", Some(Duration::from_secs(900)))
        .await?;
    assert_eq!(validator.cache().len().await, 1);

    let second = validator
        .validate(&token, &ValidationOptions::default(), &client)
        .await;
    assert_eq!(second.reason(), Some(&DenyReason::RevokedToken));

    let unchecked = validator
        .validate(
            &token,
            &ValidationOptions::default().without_revocation(),
            &client,
        )
        .await;
    assert!(unchecked.is_allowed());
    Ok(())
}

#[tokio::test]
async fn revocation_check_fails_open_without_the_store() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;
    let identity = ctx.add_user("dave@example.com", "user").await?;
    let client = client("198.51.100.41");
    let token = ctx.gatehouse.issuer().issue_access(&identity)?;
    ctx.store
        .set(&keys::blacklist(&token), "1", Some(Duration::from_secs(900)))
        .await?;

    ctx.store.set_available(false);
    let decision = ctx
        .gatehouse
        .tokens()
        .validate(&token, &ValidationOptions::default(), &client)
        .await;
    assert!(decision.is_allowed());
    Ok(())
}

#[tokio::test]
async fn access_tokens_expire_with_the_clock() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;
    let identity = ctx.add_user("dave@example.com", "user").await?;
    let client = client("198.51.100.42");
    let token = ctx.gatehouse.issuer().issue_access(&identity)?;

    ctx.advance_minutes(16);
    let decision = ctx
        .gatehouse
        .tokens()
        .validate(&token, &ValidationOptions::default(), &client)
        .await;
    assert_eq!(decision.reason(), Some(&DenyReason::ExpiredToken));
    Ok(())
}

#[tokio::test]
async fn refresh_tokens_rotate_and_replay_kills_the_family() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;
    ctx.add_user("erin@example.com", "user").await?;
    let client = client("198.51.100.43");

    let login = ctx
        .gatehouse
        .login("erin@example.com", PASSWORD, &client)
        .await?
        .allowed()
        .context("login")?;

    // A refresh token is not accepted where an access token is expected.
    let misuse = ctx
        .gatehouse
        .tokens()
        .validate(
            &login.tokens.refresh_token,
            &ValidationOptions::default(),
            &client,
        )
        .await;
    assert_eq!(misuse.reason(), Some(&DenyReason::WrongTokenType));

    ctx.clock.advance(chrono::Duration::seconds(30));
    let rotated = ctx
        .gatehouse
        .refresh(&login.tokens.refresh_token, &client)
        .await?
        .allowed()
        .context("first rotation")?;
    assert_eq!(rotated.family, login.tokens.family);
    assert_ne!(rotated.refresh_token, login.tokens.refresh_token);

    ctx.clock.advance(chrono::Duration::seconds(30));
    let rotated_again = ctx
        .gatehouse
        .refresh(&rotated.refresh_token, &client)
        .await?
        .allowed()
        .context("second rotation")?;

    let replay = ctx
        .gatehouse
        .refresh(&login.tokens.refresh_token, &client)
        .await?;
    assert!(replay.is_denied());

    let head = ctx
        .gatehouse
        .refresh(&rotated_again.refresh_token, &client)
        .await?;
    assert!(head.is_denied());
    Ok(())
}

#[tokio::test]
async fn logout_revokes_access_and_refresh() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;
    ctx.add_user("erin@example.com", "user").await?;
    let client = client("198.51.100.44");
    let login = ctx
        .gatehouse
        .login("erin@example.com", PASSWORD, &client)
        .await?
        .allowed()
        .context("login")?;

    assert!(
        ctx.gatehouse
            .logout(
                &login.tokens.access_token,
                Some(&login.tokens.refresh_token),
                &client,
            )
            .await?
    );

    let access = ctx
        .gatehouse
        .tokens()
        .validate(
            &login.tokens.access_token,
            &ValidationOptions::default(),
            &client,
        )
        .await;
    assert_eq!(access.reason(), Some(&DenyReason::RevokedToken));

    let refresh = ctx
        .gatehouse
        .refresh(&login.tokens.refresh_token, &client)
        .await?;
    assert_eq!(refresh.reason(), Some(&DenyReason::RevokedToken));
    Ok(())
}
