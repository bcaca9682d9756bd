pub mod logging;
pub mod policy;
pub mod token;

use clap::{
    Arg, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

pub const ARG_PORT: &str = "port";
pub const ARG_ADMIN_EMAIL: &str = "admin-email";
pub const ARG_ADMIN_PASSWORD: &str = "admin-password";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("gatehouse")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("GATEHOUSE_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_ADMIN_EMAIL)
                .long(ARG_ADMIN_EMAIL)
                .help("Seed an administrator account with this email at startup")
                .env("GATEHOUSE_ADMIN_EMAIL")
                .requires(ARG_ADMIN_PASSWORD),
        )
        .arg(
            Arg::new(ARG_ADMIN_PASSWORD)
                .long(ARG_ADMIN_PASSWORD)
                .help("Password for the seeded administrator")
                .env("GATEHOUSE_ADMIN_PASSWORD")
                .hide_env_values(true)
                .requires(ARG_ADMIN_EMAIL),
        );

    let command = token::with_args(command);
    let command = policy::with_args(command);
    logging::with_args(command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn test_new() {
        let command = new();

        assert_eq!(command.get_name(), "gatehouse");
        assert_eq!(
            command.get_about().map(ToString::to_string),
            Some(env!("CARGO_PKG_DESCRIPTION").to_string())
        );
        assert_eq!(
            command.get_version().map(ToString::to_string),
            Some(env!("CARGO_PKG_VERSION").to_string())
        );
    }

    #[test]
    fn test_defaults() -> Result<()> {
        temp_env::with_vars([("GATEHOUSE_LOG_LEVEL", None::<&str>)], || {
            let matches =
                new().try_get_matches_from(["gatehouse", "--token-secret", SECRET])?;
            assert_eq!(matches.get_one::<u16>(ARG_PORT).copied(), Some(8080));
            assert_eq!(
                matches
                    .get_one::<u64>(token::ARG_ACCESS_TTL)
                    .copied(),
                Some(900)
            );
            assert_eq!(
                matches
                    .get_one::<u32>(policy::ARG_LOCKOUT_MAX_ATTEMPTS)
                    .copied(),
                Some(5)
            );
            assert!(!matches.get_flag(token::ARG_COOKIE_INSECURE));
            let roles: Vec<&String> = matches
                .get_many::<String>(policy::ARG_ELEVATED_ROLES)
                .map(Iterator::collect)
                .unwrap_or_default();
            assert_eq!(roles, vec!["admin"]);
            assert_eq!(matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(), Some(0));
            Ok(())
        })
    }

    #[test]
    fn test_secret_is_required() {
        temp_env::with_vars([("GATEHOUSE_TOKEN_SECRET", None::<&str>)], || {
            assert!(new().try_get_matches_from(["gatehouse"]).is_err());
        });
    }

    #[test]
    fn test_admin_seed_needs_both_args() {
        temp_env::with_vars(
            [
                ("GATEHOUSE_ADMIN_EMAIL", None::<&str>),
                ("GATEHOUSE_ADMIN_PASSWORD", None::<&str>),
            ],
            || {
                let result = new().try_get_matches_from([
                    "gatehouse",
                    "--token-secret",
                    SECRET,
                    "--admin-email",
                    "root@example.com",
                ]);
                assert!(result.is_err());
            },
        );
    }

    #[test]
    fn test_check_env() -> Result<()> {
        temp_env::with_vars(
            [
                ("GATEHOUSE_TOKEN_SECRET", Some(SECRET)),
                ("GATEHOUSE_PORT", Some("443")),
                ("GATEHOUSE_ELEVATED_ROLES", Some("admin,owner")),
                ("GATEHOUSE_PASSWORD_EXPIRATION_DAYS", Some("0")),
                ("GATEHOUSE_COOKIE_INSECURE", Some("true")),
                ("GATEHOUSE_LOG_LEVEL", Some("info")),
            ],
            || {
                let matches = new().try_get_matches_from(["gatehouse"])?;
                assert_eq!(matches.get_one::<u16>(ARG_PORT).copied(), Some(443));
                assert_eq!(
                    matches.get_one::<String>(token::ARG_TOKEN_SECRET).map(String::as_str),
                    Some(SECRET)
                );
                let roles: Vec<&String> = matches
                    .get_many::<String>(policy::ARG_ELEVATED_ROLES)
                    .map(Iterator::collect)
                    .unwrap_or_default();
                assert_eq!(roles, vec!["admin", "owner"]);
                assert_eq!(
                    matches
                        .get_one::<u32>(policy::ARG_PASSWORD_EXPIRATION_DAYS)
                        .copied(),
                    Some(0)
                );
                assert!(matches.get_flag(token::ARG_COOKIE_INSECURE));
                assert_eq!(matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(), Some(2));
                Ok(())
            },
        )
    }

    #[test]
    fn test_check_log_level_env() {
        let levels = ["error", "warn", "info", "debug", "trace"];
        for (index, level) in (0u8..).zip(levels) {
            temp_env::with_vars(
                [
                    ("GATEHOUSE_LOG_LEVEL", Some(level)),
                    ("GATEHOUSE_TOKEN_SECRET", Some(SECRET)),
                ],
                || {
                    let matches = new().get_matches_from(["gatehouse"]);
                    assert_eq!(
                        matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                        Some(index)
                    );
                },
            );
        }
    }

    #[test]
    fn test_check_log_level_verbosity() {
        for index in 0u8..5 {
            temp_env::with_vars([("GATEHOUSE_LOG_LEVEL", None::<&str>)], || {
                let mut args = vec![
                    "gatehouse".to_string(),
                    "--token-secret".to_string(),
                    SECRET.to_string(),
                ];
                if index > 0 {
                    args.push(format!("-{}", "v".repeat(usize::from(index))));
                }

                let matches = new().get_matches_from(args);
                assert_eq!(
                    matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                    Some(index)
                );
            });
        }
    }
}
