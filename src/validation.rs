//! Validation and sanitization for user-supplied task content: the
//! `description` field and `metadata` map accepted at intake.

use crate::constants::{
    MAX_DESCRIPTION_LENGTH, MAX_METADATA_ENTRIES, MAX_METADATA_KEY_LENGTH,
    MAX_METADATA_VALUE_LENGTH,
};
use crate::error::OrchestratorError;
use html_escape::encode_text;
use regex::Regex;
use std::collections::HashSet;

/// Allowlist rather than blocklist: easier to reason about than trying to
/// enumerate every dangerous character sequence.
static SAFE_CONTENT_REGEX: &str =
    r"^[a-zA-Z0-9\s\.,!?:;()\[\]{}\-_+=@#$%^&*|\\/<>'`~\n\r\t]+$";

static DANGEROUS_PATTERNS: &[&str] = &[
    "<script",
    "javascript:",
    "data:text/html",
    "vbscript:",
    "&&",
    "||",
    ";rm",
    ";del",
    "`rm",
    "`del",
    "$(rm",
    "$(del",
    "';",
    "\";",
    "union select",
    "drop table",
    "delete from",
    "../",
    "..\\",
    "file://",
    "/etc/passwd",
    "/etc/shadow",
    "c:\\windows\\system32",
];

#[derive(Debug, Clone)]
pub struct TaskContentValidator {
    safe_content_regex: Regex,
    dangerous_patterns: HashSet<String>,
}

impl TaskContentValidator {
    pub fn new() -> Result<Self, OrchestratorError> {
        let safe_content_regex = Regex::new(SAFE_CONTENT_REGEX)
            .map_err(|e| OrchestratorError::Configuration(format!("invalid regex pattern: {e}")))?;

        let dangerous_patterns = DANGEROUS_PATTERNS.iter().map(|s| s.to_lowercase()).collect();

        Ok(Self {
            safe_content_regex,
            dangerous_patterns,
        })
    }

    fn reject_dangerous(&self, text: &str) -> Result<(), OrchestratorError> {
        let lower = text.to_lowercase();
        for pattern in &self.dangerous_patterns {
            if lower.contains(pattern.as_str()) {
                return Err(OrchestratorError::Validation(
                    "content contains a disallowed pattern".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn validate_and_sanitize_description(&self, description: &str) -> Result<String, OrchestratorError> {
        if description.trim().is_empty() {
            return Err(OrchestratorError::Validation(
                "description cannot be empty".to_string(),
            ));
        }

        if description.len() > MAX_DESCRIPTION_LENGTH {
            return Err(OrchestratorError::Validation(format!(
                "description exceeds maximum length of {MAX_DESCRIPTION_LENGTH} characters"
            )));
        }

        self.reject_dangerous(description)?;

        if !self.safe_content_regex.is_match(description) {
            return Err(OrchestratorError::Validation(
                "description contains invalid characters".to_string(),
            ));
        }

        Ok(encode_text(description).to_string())
    }

    pub fn validate_metadata_key(&self, key: &str) -> Result<(), OrchestratorError> {
        if key.is_empty() || key.len() > MAX_METADATA_KEY_LENGTH {
            return Err(OrchestratorError::Validation(format!(
                "metadata key must be non-empty and under {MAX_METADATA_KEY_LENGTH} characters"
            )));
        }

        if !key.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(OrchestratorError::Validation(
                "metadata keys may only contain alphanumeric characters and underscores".to_string(),
            ));
        }

        Ok(())
    }

    pub fn validate_and_sanitize_metadata_value(&self, value: &str) -> Result<String, OrchestratorError> {
        if value.len() > MAX_METADATA_VALUE_LENGTH {
            return Err(OrchestratorError::Validation(format!(
                "metadata value exceeds maximum length of {MAX_METADATA_VALUE_LENGTH} characters"
            )));
        }

        self.reject_dangerous(value)?;

        Ok(encode_text(value).to_string())
    }

    pub fn validate_metadata(
        &self,
        metadata: &std::collections::HashMap<String, String>,
    ) -> Result<std::collections::HashMap<String, String>, OrchestratorError> {
        if metadata.len() > MAX_METADATA_ENTRIES {
            return Err(OrchestratorError::Validation(format!(
                "metadata cannot have more than {MAX_METADATA_ENTRIES} entries"
            )));
        }

        let mut sanitized = std::collections::HashMap::with_capacity(metadata.len());
        for (key, value) in metadata {
            self.validate_metadata_key(key)?;
            let sanitized_value = self.validate_and_sanitize_metadata_value(value)?;
            sanitized.insert(key.clone(), sanitized_value);
        }
        Ok(sanitized)
    }
}

impl Default for TaskContentValidator {
    fn default() -> Self {
        Self::new().expect("static regex pattern is always valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_clean_description() {
        let validator = TaskContentValidator::new().unwrap();
        let result = validator.validate_and_sanitize_description("Summarize the quarterly report");
        assert!(result.is_ok());
    }

    #[test]
    fn rejects_script_injection() {
        let validator = TaskContentValidator::new().unwrap();
        let result =
            validator.validate_and_sanitize_description("Run this <script>alert(1)</script>");
        assert!(result.is_err());
    }

    #[test]
    fn rejects_command_injection() {
        let validator = TaskContentValidator::new().unwrap();
        let result = validator.validate_and_sanitize_description("do the thing && rm -rf /");
        assert!(result.is_err());
    }

    #[test]
    fn rejects_empty_description() {
        let validator = TaskContentValidator::new().unwrap();
        assert!(validator.validate_and_sanitize_description("   ").is_err());
    }

    #[test]
    fn rejects_oversized_description() {
        let validator = TaskContentValidator::new().unwrap();
        let long = "x".repeat(MAX_DESCRIPTION_LENGTH + 1);
        assert!(validator.validate_and_sanitize_description(&long).is_err());
    }

    #[test]
    fn accepts_description_at_exact_limit() {
        let validator = TaskContentValidator::new().unwrap();
        let boundary = "x".repeat(MAX_DESCRIPTION_LENGTH);
        assert!(validator.validate_and_sanitize_description(&boundary).is_ok());
    }

    #[test]
    fn metadata_key_validation() {
        let validator = TaskContentValidator::new().unwrap();
        assert!(validator.validate_metadata_key("project_type").is_ok());
        assert!(validator.validate_metadata_key("").is_err());
        assert!(validator.validate_metadata_key("has space").is_err());
        assert!(validator.validate_metadata_key("has-dash").is_err());
    }

    #[test]
    fn metadata_map_rejects_too_many_entries() {
        let validator = TaskContentValidator::new().unwrap();
        let metadata: std::collections::HashMap<String, String> = (0..MAX_METADATA_ENTRIES + 1)
            .map(|i| (format!("key{i}"), "value".to_string()))
            .collect();
        assert!(validator.validate_metadata(&metadata).is_err());
    }

    #[test]
    fn metadata_map_sanitizes_values() {
        let validator = TaskContentValidator::new().unwrap();
        let mut metadata = std::collections::HashMap::new();
        metadata.insert("language".to_string(), "rust".to_string());
        let sanitized = validator.validate_metadata(&metadata).unwrap();
        assert_eq!(sanitized.get("language").unwrap(), "rust");
    }
}
