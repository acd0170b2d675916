//! Secure token manager with memory-safe handling and masking capabilities
//!
//! Tokens for the secondary registry and the repository host are read from
//! the environment into `secrecy::SecretString`, so they never end up in
//! logs or debug output by accident.

use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::env;

/// Secondary registry access token
pub const OVSX_SERVICE: &str = "open-vsx";

/// Repository host API token
pub const GITHUB_SERVICE: &str = "github";

/// Supported services with their environment variable names
const SERVICE_TOKENS: &[(&str, &str)] = &[(OVSX_SERVICE, "OVSX_PAT"), (GITHUB_SERVICE, "GITHUB_TOKEN")];

/// Secure token manager for registry and repository host authentication
///
/// # Examples
///
/// ```
/// use extension_sync::security::SecureTokenManager;
/// use secrecy::ExposeSecret;
///
/// let manager = SecureTokenManager::new();
/// if let Some(token) = manager.get_token("open-vsx") {
///     println!("Registry token found: {}", manager.mask_token(token.expose_secret()));
/// }
/// ```
#[derive(Debug, Default, Clone)]
pub struct SecureTokenManager {
    service_map: HashMap<String, String>,
}

impl SecureTokenManager {
    pub fn new() -> Self {
        let service_map = SERVICE_TOKENS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        Self { service_map }
    }

    /// Map `service` to an environment variable, replacing any existing mapping
    pub fn with_service(mut self, service: &str, env_var: &str) -> Self {
        self.service_map
            .insert(service.to_string(), env_var.to_string());
        self
    }

    /// Token for `service`, if the service is known and its variable is set and non-empty
    pub fn get_token(&self, service: &str) -> Option<SecretString> {
        let token_name = self.service_map.get(service)?;
        let token_value = env::var(token_name).ok().filter(|v| !v.is_empty())?;
        Some(SecretString::new(token_value.into()))
    }

    pub fn has_token(&self, service: &str) -> bool {
        self.get_token(service).is_some()
    }

    /// Masks a token for safe logging
    ///
    /// Shows only the first 3 and last 3 characters. Tokens shorter than 10
    /// characters are fully masked as "****".
    ///
    /// ```
    /// use extension_sync::security::SecureTokenManager;
    ///
    /// let manager = SecureTokenManager::new();
    /// assert_eq!(manager.mask_token("abcdef123456"), "abc...456");
    /// assert_eq!(manager.mask_token("short"), "****");
    /// ```
    pub fn mask_token(&self, token: &str) -> String {
        if token.chars().count() < 10 {
            return "****".to_string();
        }

        let chars: Vec<char> = token.chars().collect();
        let prefix: String = chars[..3].iter().collect();
        let suffix: String = chars[chars.len() - 3..].iter().collect();
        format!("{}...{}", prefix, suffix)
    }

    /// Replace every known token occurring in `text` with its masked form
    pub fn mask_tokens_in_string(&self, text: &str) -> String {
        let mut masked = text.to_string();

        for service in self.service_map.keys() {
            if let Some(token) = self.get_token(service) {
                let token_str = token.expose_secret();
                if let Ok(regex) = Regex::new(&regex::escape(token_str)) {
                    let masked_token = self.mask_token(token_str);
                    masked = regex
                        .replace_all(&masked, masked_token.as_str())
                        .to_string();
                }
            }
        }

        masked
    }

    pub fn get_token_name(&self, service: &str) -> Option<&str> {
        self.service_map.get(service).map(|s| s.as_str())
    }

    pub fn get_supported_services(&self) -> Vec<String> {
        let mut services: Vec<_> = self.service_map.keys().cloned().collect();
        services.sort();
        services
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_manager() {
        let manager = SecureTokenManager::new();
        assert_eq!(
            manager.get_supported_services(),
            vec!["github".to_string(), "open-vsx".to_string()]
        );
    }

    #[test]
    fn test_get_token_returns_none_for_unknown_service() {
        let manager = SecureTokenManager::new();
        assert!(manager.get_token("unknown-service").is_none());
    }

    #[test]
    fn test_get_token_returns_secret_when_env_var_set() {
        unsafe {
            env::set_var("SYNC_TEST_TOKEN_GET", "test-registry-token-12345");
        }
        let manager = SecureTokenManager::new().with_service("test", "SYNC_TEST_TOKEN_GET");

        let token = manager.get_token("test");

        assert_eq!(token.unwrap().expose_secret(), "test-registry-token-12345");
        unsafe {
            env::remove_var("SYNC_TEST_TOKEN_GET");
        }
    }

    #[test]
    fn test_has_token_returns_false_when_not_set() {
        let manager = SecureTokenManager::new().with_service("test", "SYNC_TEST_TOKEN_UNSET");
        assert!(!manager.has_token("test"));
    }

    #[test]
    fn test_empty_token_is_absent() {
        unsafe {
            env::set_var("SYNC_TEST_TOKEN_EMPTY", "");
        }
        let manager = SecureTokenManager::new().with_service("test", "SYNC_TEST_TOKEN_EMPTY");

        assert!(!manager.has_token("test"));
        unsafe {
            env::remove_var("SYNC_TEST_TOKEN_EMPTY");
        }
    }

    #[test]
    fn test_mask_token() {
        let manager = SecureTokenManager::new();
        assert_eq!(manager.mask_token("short"), "****");
        assert_eq!(manager.mask_token(""), "****");
        assert_eq!(manager.mask_token("abcdef123456"), "abc...456");
        assert_eq!(manager.mask_token("very-long-token-string"), "ver...ing");
    }

    #[test]
    fn test_mask_tokens_in_string_no_tokens() {
        let manager = SecureTokenManager::new().with_service("test", "SYNC_TEST_TOKEN_UNSET");
        let input = "This is a safe string with no tokens";
        assert_eq!(manager.mask_tokens_in_string(input), input);
    }

    #[test]
    fn test_mask_tokens_in_string_with_token() {
        unsafe {
            env::set_var("SYNC_TEST_TOKEN_MASK", "secret-ovsx-token-12345");
        }
        let manager = SecureTokenManager::new().with_service("test", "SYNC_TEST_TOKEN_MASK");

        let output = manager.mask_tokens_in_string("ovsx publish -p secret-ovsx-token-12345");

        assert!(output.contains("sec...345"));
        assert!(!output.contains("secret-ovsx-token-12345"));
        unsafe {
            env::remove_var("SYNC_TEST_TOKEN_MASK");
        }
    }

    #[test]
    fn test_get_token_name() {
        let manager = SecureTokenManager::new();
        assert_eq!(manager.get_token_name(OVSX_SERVICE), Some("OVSX_PAT"));
        assert_eq!(manager.get_token_name(GITHUB_SERVICE), Some("GITHUB_TOKEN"));
        assert_eq!(manager.get_token_name("unknown"), None);
    }
}
