use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const TOKEN_PREFIX: &str = "ext-";

/// Durable identity and connection intent of this agent instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub api_url: String,
    pub connected: bool,
}

impl Session {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            token: generate_token(),
            api_url: api_url.into(),
            connected: false,
        }
    }
}

/// `ext-` followed by the first 8 hex digits of a random v4 UUID.
pub fn generate_token() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{TOKEN_PREFIX}{}", &uuid[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_shape() {
        let token = generate_token();
        assert_eq!(token.len(), TOKEN_PREFIX.len() + 8);
        assert!(token.starts_with(TOKEN_PREFIX));
        assert!(token[4..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(generate_token(), token);
    }
}
