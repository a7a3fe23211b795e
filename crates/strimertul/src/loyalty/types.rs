//! Loyalty payloads.

use serde::{Deserialize, Serialize};

/// A reward viewers can redeem with loyalty points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reward {
    pub enabled: bool,
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image: String,
    pub price: u64,
    /// Prompt shown when the reward needs extra input; empty otherwise.
    #[serde(default)]
    pub required_info: String,
    /// Seconds between redeems.
    #[serde(default)]
    pub cooldown: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Redeem {
    pub username: String,
    pub display_name: String,
    pub reward: Reward,
    /// RFC 3339 timestamp.
    pub when: String,
    #[serde(default)]
    pub request_text: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redeem_decodes_with_optional_fields_missing() {
        // Arrange
        let raw = json!({
            "username": "viewer",
            "display_name": "Viewer",
            "reward": {"enabled": true, "id": "hydrate", "name": "Hydrate!", "price": 500},
            "when": "2024-03-01T20:15:00Z"
        });

        // Act
        let redeem: Redeem = serde_json::from_value(raw).unwrap();

        // Assert
        assert_eq!(redeem.reward.price, 500);
        assert_eq!(redeem.reward.cooldown, 0);
        assert!(redeem.request_text.is_empty());
    }
}
