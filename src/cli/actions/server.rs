use crate::{
    Gatehouse, api,
    clock::{Clock, SystemClock},
    cli::telemetry,
    lockout::LockoutConfig,
    password::{Hasher, PasswordPolicy, PersonalInfo, validate_strength},
    permissions::PermissionConfig,
    rate_limit::{RateLimitConfig, RateLimitRule},
    store::StoreConfig,
    token::TokenConfig,
    users::{Identity, MemoryUserStore},
};
use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub tokens: TokenConfig,
    pub rate_limit: RateLimitConfig,
    pub lockout: LockoutConfig,
    pub password: PasswordPolicy,
    pub permissions: PermissionConfig,
    pub store: StoreConfig,
    pub api_rule: RateLimitRule,
    pub login_rule: RateLimitRule,
    /// Administrator seeded into the user store at startup.
    pub admin: Option<(String, SecretString)>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the seeded administrator is invalid or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let users = Arc::new(MemoryUserStore::new());
    if let Some((email, password)) = &args.admin {
        seed_admin(&users, &args.password, email, password, clock.now()).await?;
    }

    let gatehouse = Gatehouse::builder(args.tokens)
        .clock(clock)
        .users(users)
        .store_config(args.store)
        .rate_limit(args.rate_limit)
        .lockout(args.lockout)
        .password_policy(args.password)
        .permissions(args.permissions)
        .api_rule(args.api_rule)
        .login_rule(args.login_rule)
        .build();

    let result = api::serve(args.port, Arc::new(gatehouse)).await;
    telemetry::shutdown_tracer();
    result
}

async fn seed_admin(
    users: &MemoryUserStore,
    policy: &PasswordPolicy,
    email: &str,
    password: &SecretString,
    now: DateTime<Utc>,
) -> Result<()> {
    let info = PersonalInfo {
        name: None,
        email: Some(email.to_string()),
    };
    let report = validate_strength(policy, password.expose_secret(), &info);
    if !report.valid {
        bail!(
            "administrator password rejected: {}",
            report.errors.join("; ")
        );
    }
    let hash = Hasher::default().hash(password.expose_secret())?;
    let identity = Identity::new(email, "admin", hash, now);
    info!(user_id = %identity.user_id, email = %identity.email, "seeded administrator");
    users.insert(identity).await;
    Ok(())
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("token_issuer", args.tokens.issuer().to_string()),
        ("token_audience", args.tokens.audience().to_string()),
        (
            "access_ttl",
            format!("{}s", args.tokens.access_ttl().as_secs()),
        ),
        (
            "refresh_ttl",
            format!("{}s", args.tokens.refresh_ttl().as_secs()),
        ),
        ("cookie_secure", args.tokens.cookie_secure().to_string()),
        ("api_limit", format!("{}/min", args.api_rule.max_requests)),
        ("login_limit", format!("{}/15min", args.login_rule.max_requests)),
        (
            "lockout_max_attempts",
            args.lockout.max_attempts().to_string(),
        ),
        (
            "password_expiration_days",
            args.password.expiration_days.to_string(),
        ),
        (
            "admin_seeded",
            args.admin
                .as_ref()
                .map_or_else(|| "no".to_string(), |(email, _)| email.clone()),
        ),
    ];
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!("{}\n\nStartup configuration:", banner());
    for (key, value) in &entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn banner() -> String {
    let short_hash = crate::GIT_COMMIT_HASH.trim().get(..7).unwrap_or(crate::GIT_COMMIT_HASH);
    BANNER.replace(
        "{VERSION}",
        &format!(" - {} - {}", env!("CARGO_PKG_VERSION"), short_hash),
    )
}

const BANNER: &str = r"
    _______
   |  ___  |
   | |   | |
   | |___| |   G A T E H O U S E {VERSION}
   |  _|_  |
   |_|   |_|";
