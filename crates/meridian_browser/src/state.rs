//! Persisted session state.

use serde::{Deserialize, Serialize};

/// One browser cookie, in DevTools `Network.Cookie` shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
}

fn default_path() -> String {
    "/".to_string()
}

/// Everything needed to restore an authenticated context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageState {
    /// Session cookies
    #[serde(default)]
    pub cookies: Vec<Cookie>,
}

impl StorageState {
    /// Value of a cookie by name.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value.as_str())
    }

    /// Whether there is nothing to restore.
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_devtools_cookie() {
        let raw = r#"{"cookies":[{"name":"sessionid","value":"abc","domain":".instagram.com",
            "path":"/","expires":1.0,"httpOnly":true,"secure":true,"sameSite":"Lax"}]}"#;
        let state: StorageState = serde_json::from_str(raw).unwrap();
        assert_eq!(state.cookie("sessionid"), Some("abc"));
        assert!(state.cookies[0].http_only);
    }
}
