use clap::{Arg, ArgAction, Command};

pub const ARG_TOKEN_SECRET: &str = "token-secret";
pub const ARG_TOKEN_ISSUER: &str = "token-issuer";
pub const ARG_TOKEN_AUDIENCE: &str = "token-audience";
pub const ARG_ACCESS_TTL: &str = "access-ttl-seconds";
pub const ARG_REFRESH_TTL: &str = "refresh-ttl-seconds";
pub const ARG_CACHE_TTL: &str = "token-cache-ttl-seconds";
pub const ARG_CACHE_MAX_ENTRIES: &str = "token-cache-max-entries";
pub const ARG_COOKIE_NAME: &str = "cookie-name";
pub const ARG_COOKIE_INSECURE: &str = "cookie-insecure";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TOKEN_SECRET)
                .long(ARG_TOKEN_SECRET)
                .help("HS256 signing secret, at least 32 bytes")
                .env("GATEHOUSE_TOKEN_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_TOKEN_ISSUER)
                .long(ARG_TOKEN_ISSUER)
                .help("Expected `iss` claim")
                .env("GATEHOUSE_TOKEN_ISSUER")
                .default_value("gatehouse"),
        )
        .arg(
            Arg::new(ARG_TOKEN_AUDIENCE)
                .long(ARG_TOKEN_AUDIENCE)
                .help("Expected `aud` claim")
                .env("GATEHOUSE_TOKEN_AUDIENCE")
                .default_value("portal"),
        )
        .arg(
            Arg::new(ARG_ACCESS_TTL)
                .long(ARG_ACCESS_TTL)
                .help("Access token lifetime in seconds")
                .env("GATEHOUSE_ACCESS_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TTL)
                .long(ARG_REFRESH_TTL)
                .help("Refresh token lifetime in seconds")
                .env("GATEHOUSE_REFRESH_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_CACHE_TTL)
                .long(ARG_CACHE_TTL)
                .help("How long a verified token is cached, in seconds")
                .env("GATEHOUSE_TOKEN_CACHE_TTL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_CACHE_MAX_ENTRIES)
                .long(ARG_CACHE_MAX_ENTRIES)
                .help("Maximum cached verifications")
                .env("GATEHOUSE_TOKEN_CACHE_MAX_ENTRIES")
                .default_value("10000")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_COOKIE_NAME)
                .long(ARG_COOKIE_NAME)
                .help("Cookie carrying the access token")
                .env("GATEHOUSE_COOKIE_NAME")
                .default_value("auth_token"),
        )
        .arg(
            Arg::new(ARG_COOKIE_INSECURE)
                .long(ARG_COOKIE_INSECURE)
                .help("Omit the `Secure` cookie attribute (plain HTTP development)")
                .env("GATEHOUSE_COOKIE_INSECURE")
                .action(ArgAction::SetTrue),
        )
}
