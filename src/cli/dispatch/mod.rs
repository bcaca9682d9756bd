use crate::cli::{
    actions::{Action, server::Args},
    commands::{ARG_ADMIN_EMAIL, ARG_ADMIN_PASSWORD, ARG_PORT, policy, token},
};
use crate::{
    lockout::LockoutConfig,
    password::PasswordPolicy,
    permissions::PermissionConfig,
    rate_limit::{RateLimitConfig, RateLimitRule},
    store::StoreConfig,
    token::TokenConfig,
};
use anyhow::{Context, Result, bail};
use clap::ArgMatches;
use secrecy::SecretString;
use std::time::Duration;

const MIN_SECRET_BYTES: usize = 32;

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let admin = match (
        matches.get_one::<String>(ARG_ADMIN_EMAIL),
        matches.get_one::<String>(ARG_ADMIN_PASSWORD),
    ) {
        (Some(email), Some(password)) => Some((email.clone(), SecretString::from(password.clone()))),
        _ => None,
    };

    Ok(Action::Server(Args {
        port,
        tokens: token_config(matches)?,
        rate_limit: rate_limit_config(matches),
        lockout: lockout_config(matches),
        password: password_policy(matches),
        permissions: permission_config(matches),
        store: store_config(matches),
        api_rule: RateLimitRule::api().with_max_requests(arg(matches, policy::ARG_API_MAX_REQUESTS, 60)),
        login_rule: RateLimitRule::auth()
            .with_max_requests(arg(matches, policy::ARG_LOGIN_MAX_REQUESTS, 10)),
        admin,
    }))
}

fn arg<T: Clone + Send + Sync + 'static>(matches: &ArgMatches, id: &str, default: T) -> T {
    matches.get_one::<T>(id).cloned().unwrap_or(default)
}

fn token_config(matches: &ArgMatches) -> Result<TokenConfig> {
    let secret = matches
        .get_one::<String>(token::ARG_TOKEN_SECRET)
        .context("missing required argument: --token-secret")?;
    if secret.len() < MIN_SECRET_BYTES {
        bail!("token secret must be at least {MIN_SECRET_BYTES} bytes");
    }

    let mut config = TokenConfig::new(SecretString::from(secret.clone()))
        .with_access_ttl(Duration::from_secs(arg(matches, token::ARG_ACCESS_TTL, 900)))
        .with_refresh_ttl(Duration::from_secs(arg(matches, token::ARG_REFRESH_TTL, 604_800)))
        .with_cache_ttl(Duration::from_secs(arg(matches, token::ARG_CACHE_TTL, 300)))
        .with_cache_max_entries(arg(matches, token::ARG_CACHE_MAX_ENTRIES, 10_000))
        .with_cookie_secure(!matches.get_flag(token::ARG_COOKIE_INSECURE));
    if let Some(issuer) = matches.get_one::<String>(token::ARG_TOKEN_ISSUER) {
        config = config.with_issuer(issuer.clone());
    }
    if let Some(audience) = matches.get_one::<String>(token::ARG_TOKEN_AUDIENCE) {
        config = config.with_audience(audience.clone());
    }
    if let Some(name) = matches.get_one::<String>(token::ARG_COOKIE_NAME) {
        config = config.with_cookie_name(name.clone());
    }
    Ok(config)
}

fn rate_limit_config(matches: &ArgMatches) -> RateLimitConfig {
    RateLimitConfig::default()
        .with_hourly_ban_threshold(arg(matches, policy::ARG_HOURLY_BAN_THRESHOLD, 20))
        .with_daily_ban_threshold(arg(matches, policy::ARG_DAILY_BAN_THRESHOLD, 50))
}

fn lockout_config(matches: &ArgMatches) -> LockoutConfig {
    LockoutConfig::default()
        .with_max_attempts(arg(matches, policy::ARG_LOCKOUT_MAX_ATTEMPTS, 5))
        .with_base_duration(Duration::from_secs(arg(
            matches,
            policy::ARG_LOCKOUT_DURATION,
            900,
        )))
}

fn password_policy(matches: &ArgMatches) -> PasswordPolicy {
    PasswordPolicy::default()
        .with_min_length(arg(matches, policy::ARG_PASSWORD_MIN_LENGTH, 8))
        .with_remember_count(arg(matches, policy::ARG_PASSWORD_HISTORY, 5))
        .with_expiration_days(arg(matches, policy::ARG_PASSWORD_EXPIRATION_DAYS, 90))
        .with_grace_logins(arg(matches, policy::ARG_PASSWORD_GRACE_LOGINS, 3))
}

fn permission_config(matches: &ArgMatches) -> PermissionConfig {
    match matches.get_many::<String>(policy::ARG_ELEVATED_ROLES) {
        Some(roles) => PermissionConfig::default().with_elevated_roles(
            roles
                .map(|role| role.trim())
                .filter(|role| !role.is_empty())
                .map(str::to_string),
        ),
        None => PermissionConfig::default(),
    }
}

fn store_config(matches: &ArgMatches) -> StoreConfig {
    StoreConfig::default().with_operation_timeout(Duration::from_millis(arg(
        matches,
        policy::ARG_STORE_TIMEOUT,
        250,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn matches(extra: &[&str]) -> Result<ArgMatches> {
        let mut args = vec!["gatehouse", "--token-secret", SECRET];
        args.extend_from_slice(extra);
        Ok(commands::new().try_get_matches_from(args)?)
    }

    #[test]
    fn maps_arguments_into_configs() -> Result<()> {
        let matches = matches(&[
            "--port",
            "9090",
            "--lockout-max-attempts",
            "3",
            "--api-max-requests",
            "120",
            "--elevated-roles",
            "admin, owner",
            "--cookie-insecure",
            "--admin-email",
            "root@example.com",
            "--admin-password",
            "Sup3r#Secret",
        ])?;
        let Action::Server(args) = handler(&matches)?;
        assert_eq!(args.port, 9090);
        assert_eq!(args.lockout.max_attempts(), 3);
        assert_eq!(args.api_rule.max_requests, 120);
        assert_eq!(args.api_rule.scope, "api");
        assert_eq!(args.login_rule.max_requests, 10);
        assert!(args.permissions.is_elevated("owner"));
        assert!(!args.tokens.cookie_secure());
        assert_eq!(args.tokens.access_ttl(), Duration::from_secs(900));
        assert_eq!(args.admin.map(|(email, _)| email).as_deref(), Some("root@example.com"));
        Ok(())
    }

    #[test]
    fn short_secret_is_rejected() -> Result<()> {
        let matches = commands::new().try_get_matches_from(["gatehouse", "--token-secret", "short"])?;
        assert!(handler(&matches).is_err());
        Ok(())
    }
}
