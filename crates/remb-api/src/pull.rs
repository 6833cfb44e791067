use crate::network_error;
use remb_core::{ErrorKind, RembError, RembResult};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{Map, Value};

pub const DEFAULT_API_URL: &str = "https://www.rember.com/api/v1";

/// Protocol version sent as `version` in every pull body.
const VERSION_PULL: &str = "1";
/// Schema version of the replicache key space this client understands.
pub const VERSION_SCHEMA: &str = "7";

const TAG_VERSION_NOT_SUPPORTED: &str = "Replicache/ErrorVersionNotSupported";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    Put {
        key: String,
        value: Map<String, Value>,
    },
    Del {
        key: String,
    },
    Clear,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PullResponse {
    pub cookie: Option<i64>,
    pub patch: Vec<PatchOp>,
}

#[derive(Debug, Clone)]
pub struct SyncApi {
    api_url: String,
    client: Client,
}

impl SyncApi {
    pub fn new(api_url: &str) -> RembResult<Self> {
        let trimmed = api_url.trim_end_matches('/').to_string();
        if trimmed.is_empty() {
            return Err(RembError::usage("API URL cannot be empty"));
        }

        Ok(Self {
            api_url: trimmed,
            client: crate::build_client()?,
        })
    }

    /// Fetches the change log since `cookie` (`None` requests everything).
    /// The response is validated structurally before it is handed to the
    /// reconciler; a patch that fails validation never gets applied halfway.
    pub fn pull(&self, cookie: Option<i64>, access_token: &str) -> RembResult<PullResponse> {
        if access_token.trim().is_empty() {
            return Err(RembError::auth("access token is required for pull"));
        }

        let body = serde_json::json!({
            "version": VERSION_PULL,
            "versionAddon": env!("CARGO_PKG_VERSION"),
            "versionSchema": VERSION_SCHEMA,
            "cookie": cookie,
        });

        let response = self
            .client
            .post(self.url("/replicache-pull-for-anki"))
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .map_err(|err| network_error(ErrorKind::Pull, err))?;

        let status = response.status();
        let body_text = response.text().unwrap_or_default();

        if !status.is_success() {
            return Err(pull_error_response(status, &body_text));
        }

        let value = serde_json::from_str::<Value>(&body_text)
            .map_err(|err| RembError::pull(format!("invalid pull response: {err}")))?;
        decode_pull_response(&value)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }
}

fn pull_error_response(status: StatusCode, body_text: &str) -> RembError {
    // The server signals an outdated client with a tagged error body that
    // must not be folded into the generic transport message.
    if let Ok(value) = serde_json::from_str::<Value>(body_text)
        && value.get("_tag").and_then(Value::as_str) == Some(TAG_VERSION_NOT_SUPPORTED)
    {
        return RembError::pull("This version of the add-on is no longer supported, please update it.");
    }

    let body_trimmed = body_text.trim();
    if body_trimmed.is_empty() {
        RembError::pull(format!("request failed with status {}", status.as_u16()))
    } else {
        RembError::pull(format!(
            "request failed with status {}: {}",
            status.as_u16(),
            truncate_for_error(body_trimmed, 240)
        ))
    }
}

fn decode_pull_response(value: &Value) -> RembResult<PullResponse> {
    let body = value
        .as_object()
        .ok_or_else(|| RembError::pull("pull response must be a JSON object"))?;

    let cookie = match body
        .get("cookie")
        .ok_or_else(|| RembError::pull("pull response is missing the 'cookie' field"))?
    {
        Value::Null => None,
        other => Some(other.as_i64().ok_or_else(|| {
            RembError::pull("pull response 'cookie' must be an integer or null")
        })?),
    };

    let raw_patch = body
        .get("patch")
        .and_then(Value::as_array)
        .ok_or_else(|| RembError::pull("pull response is missing the 'patch' array"))?;

    let mut patch = Vec::with_capacity(raw_patch.len());
    for (ix, raw_op) in raw_patch.iter().enumerate() {
        let op = serde_json::from_value::<PatchOp>(raw_op.clone())
            .map_err(|err| RembError::pull(format!("invalid patch operation at index {ix}: {err}")))?;
        // A clear resets the whole key space, so anywhere but the front of
        // the patch it would wipe out operations that preceded it.
        if matches!(op, PatchOp::Clear) && ix != 0 {
            return Err(RembError::pull(format!(
                "unexpected 'clear' operation at index {ix}"
            )));
        }
        patch.push(op);
    }

    Ok(PullResponse { cookie, patch })
}

fn truncate_for_error(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }

    let truncated: String = input.chars().take(max_chars).collect();
    format!("{truncated}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_put_del_and_clear_operations() {
        let response = decode_pull_response(&json!({
            "cookie": 42,
            "patch": [
                {"op": "clear"},
                {"op": "put", "key": "Item/a", "value": {"id": "a"}},
                {"op": "del", "key": "Item/b"},
            ],
        }))
        .expect("decoded");

        assert_eq!(response.cookie, Some(42));
        assert_eq!(response.patch.len(), 3);
        assert_eq!(response.patch[0], PatchOp::Clear);
        assert_eq!(
            response.patch[2],
            PatchOp::Del {
                key: "Item/b".to_string()
            }
        );
    }

    #[test]
    fn null_cookie_decodes_to_absent() {
        let response = decode_pull_response(&json!({"cookie": null, "patch": []})).expect("decoded");
        assert_eq!(response.cookie, None);
        assert!(response.patch.is_empty());
    }

    #[test]
    fn non_integer_cookie_is_rejected() {
        let error =
            decode_pull_response(&json!({"cookie": "42", "patch": []})).expect_err("should fail");
        assert!(error.message.contains("'cookie'"));

        let error =
            decode_pull_response(&json!({"cookie": 1.5, "patch": []})).expect_err("should fail");
        assert!(error.message.contains("'cookie'"));
    }

    #[test]
    fn missing_cookie_or_patch_is_rejected() {
        assert!(decode_pull_response(&json!({"patch": []})).is_err());
        assert!(decode_pull_response(&json!({"cookie": 1})).is_err());
        assert!(decode_pull_response(&json!({"cookie": 1, "patch": "nope"})).is_err());
    }

    #[test]
    fn clear_after_first_position_is_rejected() {
        let error = decode_pull_response(&json!({
            "cookie": 1,
            "patch": [
                {"op": "put", "key": "Item/x", "value": {}},
                {"op": "clear"},
            ],
        }))
        .expect_err("should fail");

        assert_eq!(error.kind, remb_core::ErrorKind::Pull);
        assert!(error.message.contains("'clear'"));
        assert!(error.message.contains("index 1"));
    }

    #[test]
    fn second_clear_is_rejected_even_after_a_legal_first_one() {
        let error = decode_pull_response(&json!({
            "cookie": 1,
            "patch": [
                {"op": "clear"},
                {"op": "put", "key": "Item/x", "value": {}},
                {"op": "clear"},
            ],
        }))
        .expect_err("should fail");

        assert!(error.message.contains("index 2"));
    }

    #[test]
    fn malformed_operations_are_rejected() {
        // Unknown op tag.
        assert!(
            decode_pull_response(&json!({
                "cookie": 1,
                "patch": [{"op": "merge", "key": "Item/x"}],
            }))
            .is_err()
        );
        // Put without a value.
        assert!(
            decode_pull_response(&json!({
                "cookie": 1,
                "patch": [{"op": "put", "key": "Item/x"}],
            }))
            .is_err()
        );
        // Put whose value is not an object.
        assert!(
            decode_pull_response(&json!({
                "cookie": 1,
                "patch": [{"op": "put", "key": "Item/x", "value": [1, 2]}],
            }))
            .is_err()
        );
        // Del without a key.
        assert!(
            decode_pull_response(&json!({
                "cookie": 1,
                "patch": [{"op": "del"}],
            }))
            .is_err()
        );
        // Non-string key.
        assert!(
            decode_pull_response(&json!({
                "cookie": 1,
                "patch": [{"op": "del", "key": 7}],
            }))
            .is_err()
        );
    }

    #[test]
    fn truncates_long_error_bodies() {
        let long = "x".repeat(500);
        let error = pull_error_response(StatusCode::BAD_GATEWAY, &long);
        assert!(error.message.contains("status 502"));
        assert!(error.message.len() < 300);
        assert!(error.message.ends_with("..."));
    }
}
