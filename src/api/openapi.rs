use crate::api::handlers::{admin, auth, health, password, permissions};
use utoipa::openapi::{Contact, InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

const TAGS: &[(&str, &str)] = &[
    ("health", "Liveness and build information"),
    ("auth", "Login, token refresh, logout and token introspection"),
    ("permissions", "Permission evaluation for the caller"),
    ("password", "Password strength, change and expiration"),
    ("admin", "Account unlock, password reset and IP bans"),
];

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Routes added with `.routes(routes!(...))` are both served and documented;
/// routes added later on the plain router (`/openapi.json`) are not.
pub(crate) fn api_router() -> OpenApiRouter {
    let mut router = OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        .routes(routes!(auth::login))
        .routes(routes!(auth::refresh))
        .routes(routes!(auth::logout))
        .routes(routes!(auth::token))
        .routes(routes!(permissions::check))
        .routes(routes!(password::strength))
        .routes(routes!(password::change))
        .routes(routes!(password::status))
        .routes(routes!(admin::unlock))
        .routes(routes!(admin::password_reset))
        .routes(routes!(admin::create_ban, admin::list_bans))
        .routes(routes!(admin::delete_ban));

    router.get_openapi_mut().tags = Some(
        TAGS.iter()
            .map(|(name, description)| {
                let mut tag = Tag::new(*name);
                tag.description = Some((*description).to_string());
                tag
            })
            .collect(),
    );

    router
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Cargo.toml metadata instead of the utoipa-axum defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = optional_str(env!("CARGO_PKG_LICENSE")).map(|identifier| {
        let mut license = License::new(identifier);
        license.identifier = Some(identifier.to_string());
        license
    });

    OpenApiBuilder::new().info(info).build()
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let primary = env!("CARGO_PKG_AUTHORS").split(';').next()?.trim();
    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn optional_str(value: &str) -> Option<&str> {
    Some(value.trim()).filter(|value| !value.is_empty())
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    match author.split_once('<') {
        Some((name, rest)) => (
            optional_str(name),
            optional_str(rest.trim_end_matches('>')),
        ),
        None => (optional_str(author), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_author_splits_name_and_email() {
        assert_eq!(
            parse_author("Team Gatehouse <team@gatehouse.dev>"),
            (Some("Team Gatehouse"), Some("team@gatehouse.dev"))
        );
        assert_eq!(parse_author("Solo"), (Some("Solo"), None));
        assert_eq!(parse_author("<only@mail>"), (None, Some("only@mail")));
        assert_eq!(parse_author("  "), (None, None));
    }

    #[test]
    fn openapi_documents_every_route() {
        let doc = openapi();
        let paths: Vec<&str> = doc.paths.paths.keys().map(String::as_str).collect();
        for path in [
            "/health",
            "/v1/auth/login",
            "/v1/auth/refresh",
            "/v1/auth/logout",
            "/v1/auth/token",
            "/v1/permissions/check",
            "/v1/password/strength",
            "/v1/password/change",
            "/v1/password/status",
            "/v1/admin/unlock",
            "/v1/admin/password-reset",
            "/v1/admin/bans",
            "/v1/admin/bans/{ip}",
        ] {
            assert!(paths.contains(&path), "missing {path}");
        }
        assert_eq!(doc.info.title, env!("CARGO_PKG_NAME"));
        assert_eq!(doc.tags.map(|tags| tags.len()), Some(TAGS.len()));
    }
}
