//!
//! Utility types and functions shared by the configuration and the transport.
//!
//! This module provides:
//! - [`Sensitive`] - A wrapper for API keys and tokens that hides values in debug output
//! - [`replace_handlebars_with_env`] - Template substitution for environment variables
//! - [`new_request_id`] - Time-ordered ids attached to outgoing requests
//!

use {
    regex::{Captures, Regex},
    serde::Deserialize,
    std::{env, sync::LazyLock},
    uuid::{ContextV7, Timestamp, Uuid},
    zeroize::{Zeroize, ZeroizeOnDrop},
};

/// Matches `{{ VAR_NAME }}` with optional whitespace around an upper-case variable name.
static HANDLEBAR_REGEXP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Z0-9_]+)\s*\}\}").unwrap());

/// A wrapper type for secrets such as upstream API keys.
///
/// `Debug` prints `Sensitive(****)` instead of the value, and the memory is
/// zeroed when the wrapper is dropped. The value itself stays reachable
/// through the public field `0`.
///
/// ```
/// use api_optimizer::Sensitive;
///
/// let api_key = Sensitive::from("sk-12345");
/// assert_eq!(format!("{:?}", api_key), "Sensitive(****)");
/// assert_eq!(api_key.0, "sk-12345");
/// ```
#[derive(Clone, Deserialize, Default, Zeroize, ZeroizeOnDrop)]
pub struct Sensitive<T: Default + Zeroize>(pub T);

impl Sensitive<String> {
    /// Creates a new `Sensitive<String>` from a string slice.
    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl<T: Default + Zeroize + PartialEq> PartialEq for Sensitive<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T: Default + Zeroize> std::fmt::Debug for Sensitive<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sensitive(****)")
    }
}

/// Generates a UUIDv7 request id.
///
/// The ids sort by creation time, which keeps upstream logs and our own
/// `tracing` output easy to correlate.
pub fn new_request_id() -> String {
    let cx = ContextV7::new().with_additional_precision();
    Uuid::new_v7(Timestamp::now(cx)).to_string()
}

/// Replaces `{{ VAR_NAME }}` placeholders with environment variable values.
///
/// Variable names are upper-case letters, digits and underscores. Missing
/// variables are replaced with an empty string and reported with a warning.
///
/// ```
/// use api_optimizer::replace_handlebars_with_env;
///
/// let template = "token = \"{{ MISSING_API_TOKEN }}\"";
/// assert_eq!(replace_handlebars_with_env(template), "token = \"\"");
/// ```
pub fn replace_handlebars_with_env(input: &str) -> String {
    HANDLEBAR_REGEXP
        .replace_all(input, |caps: &Captures| {
            let var_name = &caps[1];
            env::var(var_name).unwrap_or_else(|_| {
                tracing::warn!(
                    variable = %var_name,
                    "Environment variable not found, substituting with empty string"
                );
                String::new()
            })
        })
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_replace_handlebars_with_env_whitespace() {
        unsafe {
            env::set_var("UTILS_SPACED_VAR", "value");
        }

        let input = "{{UTILS_SPACED_VAR}} {{ UTILS_SPACED_VAR }} {{  UTILS_SPACED_VAR  }}";
        let output = replace_handlebars_with_env(input);
        assert_eq!(output, "value value value");

        unsafe {
            env::remove_var("UTILS_SPACED_VAR");
        }
    }

    #[test]
    fn test_request_ids_are_unique_v7() {
        let first = new_request_id();
        let second = new_request_id();
        assert_ne!(first, second);
        assert_eq!(Uuid::parse_str(&first).unwrap().get_version_num(), 7);
    }

    // ========================================================================
    // Property-based tests for replace_handlebars_with_env
    // ========================================================================

    proptest! {
        /// Strings without handlebars patterns should pass through unchanged
        #[test]
        fn handlebars_no_pattern_unchanged(s in "[^{}]*") {
            let result = replace_handlebars_with_env(&s);
            prop_assert_eq!(result, s);
        }

        /// Lower-case names are not placeholders
        #[test]
        fn handlebars_lowercase_unchanged(name in "[a-z][a-z0-9]{0,10}") {
            let input = format!("{{{{ {name} }}}}");
            let result = replace_handlebars_with_env(&input);
            prop_assert_eq!(result, input);
        }

        /// Valid patterns with set env vars should be substituted
        #[test]
        fn handlebars_valid_pattern_substituted(
            var_name in "[A-Z][A-Z0-9_]{0,10}",
            var_value in "[a-zA-Z0-9_]{1,20}",
            prefix in "[^{}]{0,10}",
            suffix in "[^{}]{0,10}"
        ) {
            let test_var = format!("PROPTEST_{var_name}");
            unsafe { std::env::set_var(&test_var, &var_value); }

            let input = format!("{prefix}{{{{ {test_var} }}}}{suffix}");
            let result = replace_handlebars_with_env(&input);
            let expected = format!("{prefix}{var_value}{suffix}");

            unsafe { std::env::remove_var(&test_var); }

            prop_assert_eq!(result, expected);
        }

        /// Missing env vars should become empty strings
        #[test]
        fn handlebars_missing_var_empty(var_name in "[A-Z][A-Z0-9_]{5,15}") {
            let test_var = format!("PROPTEST_MISSING_{var_name}");
            unsafe { std::env::remove_var(&test_var); }

            let input = format!("value={{{{ {test_var} }}}}");
            let result = replace_handlebars_with_env(&input);

            prop_assert_eq!(result, "value=");
        }
    }

    // ========================================================================
    // Sensitive wrapper
    // ========================================================================

    proptest! {
        /// Sensitive Debug output never contains the actual value
        #[test]
        fn sensitive_debug_hides_value(s in "[0-9]{5,50}") {
            let sensitive = Sensitive::from(s.as_str());
            let debug_output = format!("{:?}", sensitive);

            prop_assert!(debug_output.contains("****"));
            prop_assert!(!debug_output.contains(&s));
        }
    }

    #[test]
    fn sensitive_deserializes_from_plain_string() {
        #[derive(Deserialize)]
        struct Holder {
            token: Sensitive<String>,
        }

        let holder: Holder = toml::from_str(r#"token = "sk-abc""#).unwrap();
        assert_eq!(holder.token.0, "sk-abc");
    }

    #[test]
    fn sensitive_clone_creates_independent_copy() {
        let original = Sensitive::from("original-secret");
        let cloned = original.clone();
        assert_eq!(original, cloned);

        drop(original);
        assert_eq!(cloned.0, "original-secret");
    }
}
