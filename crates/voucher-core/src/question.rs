//! HIT configuration and the ExternalQuestion document that points workers
//! at the task page.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::config::{validate_http_url, ConfigError};

/// Requester API endpoint for sandbox HITs.
pub const SANDBOX_REQUESTER_ENDPOINT: &str = "https://mturk-requester-sandbox.us-east-1.amazonaws.com";

/// Requester API endpoint for live HITs.
pub const LIVE_REQUESTER_ENDPOINT: &str = "https://mturk-requester.us-east-1.amazonaws.com";

/// Assignments above this count incur the platform's extra fee.
pub const FEE_FREE_ASSIGNMENTS: u32 = 9;

/// Requester-side description of a HIT, in the platform's field names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HitConfig {
    /// Task page shown inside the HIT frame
    pub question_url: String,

    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub keywords: String,

    /// Reward in USD, as the platform expects it ("0.50")
    pub reward: String,

    pub lifetime_in_seconds: u64,

    pub assignment_duration_in_seconds: u64,

    #[serde(default)]
    pub qualification_requirements: Vec<serde_json::Value>,
}

impl HitConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: HitConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        validate_http_url("QuestionUrl", &self.question_url)?;

        if self.title.trim().is_empty() {
            return Err(ConfigError::MissingField("Title".to_string()));
        }

        if self.reward.trim().parse::<f64>().is_err() {
            return Err(ConfigError::ValidationError(format!(
                "Reward must be a decimal amount, got '{}'",
                self.reward
            )));
        }

        Ok(())
    }

    /// ExternalQuestion XML for this HIT.
    pub fn question_xml(&self) -> String {
        external_question_xml(&self.question_url)
    }

    /// Warnings an operator should confirm before creating the HIT.
    pub fn warnings(&self, max_assignments: u32, is_live: bool) -> Vec<String> {
        let mut warnings = Vec::new();
        if is_live {
            warnings.push("You are creating a live HIT that uses real money.".to_string());
            if max_assignments > FEE_FREE_ASSIGNMENTS {
                warnings.push(format!(
                    "The platform charges an additional 20% fee for HITs with more than {} assignments.",
                    FEE_FREE_ASSIGNMENTS
                ));
            }
        }
        warnings
    }
}

/// Requester API endpoint for the chosen environment.
pub fn requester_endpoint(is_live: bool) -> &'static str {
    if is_live {
        LIVE_REQUESTER_ENDPOINT
    } else {
        SANDBOX_REQUESTER_ENDPOINT
    }
}

/// ExternalQuestion document with a zero frame height.
pub fn external_question_xml(question_url: &str) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<ExternalQuestion xmlns="http://mechanicalturk.amazonaws.com/AWSMechanicalTurkDataSchemas/2006-07-14/ExternalQuestion.xsd">"#,
            "<ExternalURL>{}</ExternalURL>",
            "<FrameHeight>0</FrameHeight>",
            "</ExternalQuestion>"
        ),
        escape_xml(question_url)
    )
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;

    const HIT_JSON: &str = r#"{
        "QuestionUrl": "https://mywebsite.com/amt_index.php",
        "Title": "Perception experiment",
        "Description": "Look at images and answer questions",
        "Keywords": "images, perception",
        "Reward": "0.50",
        "LifetimeInSeconds": 86400,
        "AssignmentDurationInSeconds": 3600,
        "QualificationRequirements": [
            {"QualificationTypeId": "00000000000000000071", "Comparator": "EqualTo", "LocaleValues": [{"Country": "US"}]}
        ]
    }"#;

    #[test]
    fn test_parse_hit_config() {
        let config = HitConfig::from_json(HIT_JSON).unwrap();
        assert_eq!(config.title, "Perception experiment");
        assert_eq!(config.lifetime_in_seconds, 86400);
        assert_eq!(config.qualification_requirements.len(), 1);
    }

    #[test]
    fn test_invalid_reward_rejected() {
        let json = HIT_JSON.replace("\"0.50\"", "\"fifty cents\"");
        assert!(matches!(
            HitConfig::from_json(&json),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_question_xml_escapes_url() {
        let xml = external_question_xml("https://example.org/task?a=1&b=2");
        assert!(xml.contains("<ExternalURL>https://example.org/task?a=1&amp;b=2</ExternalURL>"));
        assert!(xml.contains("<FrameHeight>0</FrameHeight>"));
        assert!(xml.starts_with("<?xml"));
    }

    #[test]
    fn test_live_warnings() {
        let config = HitConfig::from_json(HIT_JSON).unwrap();
        assert!(config.warnings(20, false).is_empty());
        assert_eq!(config.warnings(9, true).len(), 1);
        assert_eq!(config.warnings(10, true).len(), 2);
    }

    #[test]
    fn test_requester_endpoint() {
        assert_eq!(requester_endpoint(true), LIVE_REQUESTER_ENDPOINT);
        assert_eq!(requester_endpoint(false), SANDBOX_REQUESTER_ENDPOINT);
    }
}
