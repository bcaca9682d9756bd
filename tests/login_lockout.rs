mod common;

use anyhow::Context;
use common::{PASSWORD, TestContext, client};
use gatehouse::DenyReason;
use gatehouse::audit::AuditEventType;
use gatehouse::users::UserStore;

const EMAIL: &str = "carol@example.com";
const WRONG: &str = "Wrong#Guess42";

fn locked_for(reason: Option<&DenyReason>) -> Option<u64> {
    match reason {
        Some(DenyReason::AccountLocked {
            remaining_seconds, ..
        }) => *remaining_seconds,
        _ => None,
    }
}

#[tokio::test]
async fn five_failures_lock_the_account_until_it_expires() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;
    ctx.add_user(EMAIL, "user").await?;
    let client = client("203.0.113.10");

    for attempt in 1..=4 {
        let decision = ctx.gatehouse.login(EMAIL, WRONG, &client).await?;
        assert_eq!(
            decision.reason(),
            Some(&DenyReason::InvalidCredentials),
            "attempt {attempt}"
        );
    }
    let fifth = ctx.gatehouse.login(EMAIL, WRONG, &client).await?;
    assert_eq!(locked_for(fifth.reason()), Some(15 * 60));

    let sixth = ctx.gatehouse.login(EMAIL, PASSWORD, &client).await?;
    assert!(locked_for(sixth.reason()).is_some());
    assert_eq!(
        ctx.audit.events_of(AuditEventType::AccountLocked).await.len(),
        1
    );

    ctx.advance_minutes(15);
    let success = ctx
        .gatehouse
        .login(EMAIL, PASSWORD, &client)
        .await?
        .allowed()
        .context("login after the lock expired")?;
    assert_eq!(success.email, EMAIL);

    let stored = ctx
        .users
        .find_by_email(EMAIL)
        .await?
        .context("stored user")?;
    assert!(!stored.locked);
    assert_eq!(stored.failed_attempts, 0);
    assert_eq!(stored.lockout_count, 1);
    Ok(())
}

#[tokio::test]
async fn second_lockout_lasts_twice_as_long() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;
    ctx.add_user(EMAIL, "user").await?;
    let client = client("203.0.113.11");

    for _ in 0..5 {
        ctx.gatehouse.login(EMAIL, WRONG, &client).await?;
    }
    ctx.advance_minutes(15);
    assert!(
        ctx.gatehouse
            .login(EMAIL, PASSWORD, &client)
            .await?
            .is_allowed()
    );

    for _ in 0..4 {
        ctx.gatehouse.login(EMAIL, WRONG, &client).await?;
    }
    let locked = ctx.gatehouse.login(EMAIL, WRONG, &client).await?;
    assert_eq!(locked_for(locked.reason()), Some(30 * 60));

    // Still locked where the first lock would already have expired.
    ctx.advance_minutes(20);
    let still = ctx.gatehouse.login(EMAIL, PASSWORD, &client).await?;
    assert_eq!(locked_for(still.reason()), Some(10 * 60));
    Ok(())
}

#[tokio::test]
async fn admin_unlock_clears_a_live_lock() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;
    ctx.add_user(EMAIL, "user").await?;
    let client = client("203.0.113.12");

    for _ in 0..5 {
        ctx.gatehouse.login(EMAIL, WRONG, &client).await?;
    }
    assert!(
        ctx.gatehouse
            .lockout()
            .unlock_account(EMAIL, &client)
            .await?
    );
    assert!(
        ctx.gatehouse
            .login(EMAIL, PASSWORD, &client)
            .await?
            .is_allowed()
    );
    assert!(
        !ctx.gatehouse
            .lockout()
            .unlock_account("nobody@example.com", &client)
            .await?
    );
    Ok(())
}

#[tokio::test]
async fn unknown_accounts_lock_like_real_ones() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;
    let client = client("203.0.113.13");

    for _ in 0..4 {
        let decision = ctx
            .gatehouse
            .login("ghost@example.com", WRONG, &client)
            .await?;
        assert_eq!(decision.reason(), Some(&DenyReason::InvalidCredentials));
    }
    let fifth = ctx
        .gatehouse
        .login("ghost@example.com", WRONG, &client)
        .await?;
    assert!(locked_for(fifth.reason()).is_some());
    Ok(())
}
