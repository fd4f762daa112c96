use serde::{Deserialize, Serialize};

/// Credential exchange request body
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// Credential exchange response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenPairResponse {
    pub access: String,
    pub refresh: String,
}

/// Refresh exchange request body
#[derive(Debug, Clone, Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh: &'a str,
}

/// Refresh exchange response; the backend may or may not rotate the refresh token
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}

/// Current user profile (`GET {base}/me/`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Me {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub is_staff: bool,
    #[serde(default)]
    pub profile: Option<MeProfile>,
    /// Fields this crate does not model
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeProfile {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Me {
    /// Staff accounts and accounts whose profile role is `admin`
    pub fn is_admin(&self) -> bool {
        self.is_staff
            || self
                .profile
                .as_ref()
                .and_then(|p| p.role.as_deref())
                .is_some_and(|role| role == "admin")
    }
}
