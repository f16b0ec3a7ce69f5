use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Label {
    #[serde(rename = "Cancerous")]
    Cancerous,
    #[serde(rename = "Non-Cancerous")]
    NonCancerous,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cancerous => "Cancerous",
            Self::NonCancerous => "Non-Cancerous",
        }
    }
}

/// Response body of a successful analysis. The two probabilities come from a
/// 2-class softmax and sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    #[serde(rename = "Prediction")]
    pub label: Label,
    #[serde(rename = "Cancerous")]
    pub cancerous: f32,
    #[serde(rename = "Non_Cancerous")]
    pub non_cancerous: f32,
}

impl Prediction {
    /// Exact ties resolve to `NonCancerous`.
    pub fn from_probabilities(cancerous: f32, non_cancerous: f32) -> Self {
        let label = if cancerous > non_cancerous {
            Label::Cancerous
        } else {
            Label::NonCancerous
        };

        Self {
            label,
            cancerous,
            non_cancerous,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_follows_larger_probability() {
        assert_eq!(Prediction::from_probabilities(0.8, 0.2).label, Label::Cancerous);
        assert_eq!(
            Prediction::from_probabilities(0.3, 0.7).label,
            Label::NonCancerous
        );
    }

    #[test]
    fn tie_is_non_cancerous() {
        assert_eq!(
            Prediction::from_probabilities(0.5, 0.5).label,
            Label::NonCancerous
        );
    }

    #[test]
    fn serializes_with_wire_field_names() {
        let json = serde_json::to_value(Prediction::from_probabilities(0.75, 0.25)).unwrap();
        assert_eq!(json["Prediction"], "Cancerous");
        assert_eq!(json["Cancerous"], 0.75);
        assert_eq!(json["Non_Cancerous"], 0.25);
        assert_eq!(json.as_object().unwrap().len(), 3);
    }

    #[test]
    fn non_cancerous_label_is_hyphenated() {
        let json = serde_json::to_value(Label::NonCancerous).unwrap();
        assert_eq!(json, "Non-Cancerous");
        assert_eq!(Label::NonCancerous.as_str(), "Non-Cancerous");
    }
}
