//! Locating the user object and session tokens inside an [`ApiEnvelope`].
//!
//! Endpoints disagree on where they put things. The lookups below try each
//! location in a fixed order and take the first non-empty hit:
//!
//! | what          | field names, in order            | locations, in order                         |
//! |---------------|----------------------------------|---------------------------------------------|
//! | user object   | `user`                           | `data.user`, envelope `user`, then `data`   |
//! | auth token    | `token`, `auth_token`, `authToken`, `access_token` | user, `data`, envelope |
//! | refresh token | `refresh_token`, `refreshToken`  | user, `data`, envelope                      |

use serde_json::{Map, Value};

use super::ApiEnvelope;

pub const AUTH_TOKEN_FIELDS: &[&str] = &["token", "auth_token", "authToken", "access_token"];
pub const REFRESH_TOKEN_FIELDS: &[&str] = &["refresh_token", "refreshToken"];

/// The user object carried by a login / user-lookup response.
pub fn extract_user(envelope: &ApiEnvelope) -> Option<&Value> {
    let data = envelope.data.as_ref().filter(|d| d.is_object());

    data.and_then(|d| d.get("user"))
        .filter(|u| u.is_object())
        .or_else(|| envelope.rest.get("user").filter(|u| u.is_object()))
        .or(data)
}

pub fn auth_token(user: Option<&Value>, envelope: &ApiEnvelope) -> Option<String> {
    find_token(AUTH_TOKEN_FIELDS, user, envelope)
}

pub fn refresh_token(user: Option<&Value>, envelope: &ApiEnvelope) -> Option<String> {
    find_token(REFRESH_TOKEN_FIELDS, user, envelope)
}

fn find_token(fields: &[&str], user: Option<&Value>, envelope: &ApiEnvelope) -> Option<String> {
    let sources: [Option<&Map<String, Value>>; 3] = [
        user.and_then(Value::as_object),
        envelope.data.as_ref().and_then(Value::as_object),
        Some(&envelope.rest),
    ];

    sources.into_iter().flatten().find_map(|source| {
        fields.iter().find_map(|field| {
            source
                .get(*field)
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(raw: Value) -> ApiEnvelope {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn test_user_nested_under_data_user() {
        let env = envelope(json!({"success": true, "data": {"user": {"id": 1}, "token": "t"}}));
        assert_eq!(extract_user(&env), Some(&json!({"id": 1})));
    }

    #[test]
    fn test_user_falls_back_to_data() {
        let env = envelope(json!({"success": true, "data": {"id": 7, "email": "u@t.com"}}));
        assert_eq!(extract_user(&env).unwrap()["id"], 7);
    }

    #[test]
    fn test_user_at_envelope_level() {
        let env = envelope(json!({"success": true, "user": {"id": 3}}));
        assert_eq!(extract_user(&env).unwrap()["id"], 3);
    }

    #[test]
    fn test_token_prefers_user_object() {
        let env = envelope(json!({
            "success": true,
            "data": {"user": {"id": 1, "auth_token": "from-user"}, "token": "from-data"},
            "token": "from-envelope"
        }));
        let user = extract_user(&env);
        assert_eq!(auth_token(user, &env).as_deref(), Some("from-user"));
    }

    #[test]
    fn test_token_found_at_envelope_level() {
        let env = envelope(json!({
            "success": true,
            "data": {"user": {"id": 1}},
            "auth_token": "top",
            "refreshToken": "r"
        }));
        let user = extract_user(&env);
        assert_eq!(auth_token(user, &env).as_deref(), Some("top"));
        assert_eq!(refresh_token(user, &env).as_deref(), Some("r"));
    }

    #[test]
    fn test_missing_or_empty_tokens() {
        let env = envelope(json!({"success": true, "data": {"user": {"id": 1, "token": ""}}}));
        let user = extract_user(&env);
        assert_eq!(auth_token(user, &env), None);
        assert_eq!(refresh_token(user, &env), None);
    }
}
