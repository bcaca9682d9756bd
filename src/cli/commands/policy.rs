use clap::{Arg, Command};

pub const ARG_LOCKOUT_MAX_ATTEMPTS: &str = "lockout-max-attempts";
pub const ARG_LOCKOUT_DURATION: &str = "lockout-duration-seconds";
pub const ARG_API_MAX_REQUESTS: &str = "api-max-requests";
pub const ARG_LOGIN_MAX_REQUESTS: &str = "login-max-requests";
pub const ARG_HOURLY_BAN_THRESHOLD: &str = "hourly-ban-threshold";
pub const ARG_DAILY_BAN_THRESHOLD: &str = "daily-ban-threshold";
pub const ARG_PASSWORD_MIN_LENGTH: &str = "password-min-length";
pub const ARG_PASSWORD_HISTORY: &str = "password-history";
pub const ARG_PASSWORD_EXPIRATION_DAYS: &str = "password-expiration-days";
pub const ARG_PASSWORD_GRACE_LOGINS: &str = "password-grace-logins";
pub const ARG_ELEVATED_ROLES: &str = "elevated-roles";
pub const ARG_STORE_TIMEOUT: &str = "store-timeout-ms";

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_abuse_args(command);
    let command = with_password_args(command);
    command
        .arg(
            Arg::new(ARG_ELEVATED_ROLES)
                .long(ARG_ELEVATED_ROLES)
                .help("Roles that pass every permission check without a lookup")
                .env("GATEHOUSE_ELEVATED_ROLES")
                .value_delimiter(',')
                .default_value("admin"),
        )
        .arg(
            Arg::new(ARG_STORE_TIMEOUT)
                .long(ARG_STORE_TIMEOUT)
                .help("Key-value store operation timeout in milliseconds")
                .env("GATEHOUSE_STORE_TIMEOUT_MS")
                .default_value("250")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

fn with_abuse_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_LOCKOUT_MAX_ATTEMPTS)
                .long(ARG_LOCKOUT_MAX_ATTEMPTS)
                .help("Failed logins before the account locks")
                .env("GATEHOUSE_LOCKOUT_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_LOCKOUT_DURATION)
                .long(ARG_LOCKOUT_DURATION)
                .help("First lockout duration in seconds; doubles with each lockout")
                .env("GATEHOUSE_LOCKOUT_DURATION_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_API_MAX_REQUESTS)
                .long(ARG_API_MAX_REQUESTS)
                .help("Requests per minute per client and route")
                .env("GATEHOUSE_API_MAX_REQUESTS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_LOGIN_MAX_REQUESTS)
                .long(ARG_LOGIN_MAX_REQUESTS)
                .help("Failed login attempts per client in 15 minutes")
                .env("GATEHOUSE_LOGIN_MAX_REQUESTS")
                .default_value("10")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_HOURLY_BAN_THRESHOLD)
                .long(ARG_HOURLY_BAN_THRESHOLD)
                .help("Rate-limit violations in one hour that ban the address for a day")
                .env("GATEHOUSE_HOURLY_BAN_THRESHOLD")
                .default_value("20")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_DAILY_BAN_THRESHOLD)
                .long(ARG_DAILY_BAN_THRESHOLD)
                .help("Rate-limit violations in one day that ban the address for three days")
                .env("GATEHOUSE_DAILY_BAN_THRESHOLD")
                .default_value("50")
                .value_parser(clap::value_parser!(usize)),
        )
}

fn with_password_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_PASSWORD_MIN_LENGTH)
                .long(ARG_PASSWORD_MIN_LENGTH)
                .help("Minimum password length")
                .env("GATEHOUSE_PASSWORD_MIN_LENGTH")
                .default_value("8")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_PASSWORD_HISTORY)
                .long(ARG_PASSWORD_HISTORY)
                .help("Previous passwords that may not be reused")
                .env("GATEHOUSE_PASSWORD_HISTORY")
                .default_value("5")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_PASSWORD_EXPIRATION_DAYS)
                .long(ARG_PASSWORD_EXPIRATION_DAYS)
                .help("Days before a password expires, 0 disables expiration")
                .env("GATEHOUSE_PASSWORD_EXPIRATION_DAYS")
                .default_value("90")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_PASSWORD_GRACE_LOGINS)
                .long(ARG_PASSWORD_GRACE_LOGINS)
                .help("Logins allowed after expiration")
                .env("GATEHOUSE_PASSWORD_GRACE_LOGINS")
                .default_value("3")
                .value_parser(clap::value_parser!(u32)),
        )
}
