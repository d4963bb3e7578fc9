//! Who is making a request.

use serde::{Deserialize, Serialize};

use cadence_core::SchedulerError;

/// Identity fields as they arrive on a request.
///
/// `caller` selects which of the optional fields must be present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    /// `"user"` or `"api"`.
    pub caller: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl CallerIdentity {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            caller: "user".to_string(),
            user_id: Some(user_id.into()),
            api_key: None,
        }
    }

    pub fn api(api_key: impl Into<String>) -> Self {
        Self {
            caller: "api".to_string(),
            user_id: None,
            api_key: Some(api_key.into()),
        }
    }
}

/// A validated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    User { user_id: String },
    Api { api_key: String },
}

impl Caller {
    pub fn kind(&self) -> &'static str {
        match self {
            Caller::User { .. } => "user",
            Caller::Api { .. } => "api",
        }
    }
}

fn required(value: Option<String>, field: &str, caller: &str) -> Result<String, SchedulerError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(SchedulerError::BadRequest(format!(
            "{} is required for {} callers",
            field, caller
        ))),
    }
}

impl TryFrom<CallerIdentity> for Caller {
    type Error = SchedulerError;

    fn try_from(identity: CallerIdentity) -> Result<Self, Self::Error> {
        match identity.caller.as_str() {
            "user" => Ok(Caller::User {
                user_id: required(identity.user_id, "userId", "user")?,
            }),
            "api" => Ok(Caller::Api {
                api_key: required(identity.api_key, "apiKey", "api")?,
            }),
            other => Err(SchedulerError::BadRequest(format!(
                "unknown caller type '{}'",
                other
            ))),
        }
    }
}
