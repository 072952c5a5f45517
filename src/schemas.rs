//! Typed problem record schema.
//!
//! Every optional field has a documented default and the defaults are
//! applied here, once, at decode time:
//! - missing or `null` lists → empty
//! - missing or `null` text → empty string
//! - unknown type tags → the `Other` variant, missing tags → `None`
//! - timestamps are kept as raw strings; consumers decide how to parse them

use crate::deserializers::{
    de_option_kind, de_option_string_forgiving, de_string_forgiving, de_vec_forgiving,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CauseType {
    Primary,
    Secondary,
    Latent,
    #[serde(other)]
    Other,
}

impl CauseType {
    pub const ALL: [CauseType; 3] = [CauseType::Primary, CauseType::Secondary, CauseType::Latent];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactType {
    Technical,
    Business,
    Operational,
    Environmental,
    Health,
    Educational,
    #[serde(other)]
    Other,
}

impl ImpactType {
    pub const ALL: [ImpactType; 6] = [
        ImpactType::Technical,
        ImpactType::Business,
        ImpactType::Operational,
        ImpactType::Environmental,
        ImpactType::Health,
        ImpactType::Educational,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImpactType::Technical => "technical",
            ImpactType::Business => "business",
            ImpactType::Operational => "operational",
            ImpactType::Environmental => "environmental",
            ImpactType::Health => "health",
            ImpactType::Educational => "educational",
            ImpactType::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopType {
    Reinforcing,
    Balancing,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationType {
    ShortTerm,
    LongTerm,
    Preventive,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cause {
    #[serde(default, deserialize_with = "de_string_forgiving")]
    pub description: String,
    #[serde(
        rename = "type",
        default,
        deserialize_with = "de_option_kind",
        skip_serializing_if = "Option::is_none"
    )]
    pub kind: Option<CauseType>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Impact {
    #[serde(default, deserialize_with = "de_string_forgiving")]
    pub description: String,
    #[serde(
        rename = "type",
        default,
        deserialize_with = "de_option_kind",
        skip_serializing_if = "Option::is_none"
    )]
    pub kind: Option<ImpactType>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackLoop {
    #[serde(default, deserialize_with = "de_string_forgiving")]
    pub description: String,
    #[serde(
        rename = "type",
        default,
        deserialize_with = "de_option_kind",
        skip_serializing_if = "Option::is_none"
    )]
    pub kind: Option<LoopType>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Remediation {
    #[serde(default, deserialize_with = "de_string_forgiving")]
    pub description: String,
    #[serde(
        rename = "type",
        default,
        deserialize_with = "de_option_kind",
        skip_serializing_if = "Option::is_none"
    )]
    pub kind: Option<RemediationType>,
    #[serde(default, deserialize_with = "de_vec_forgiving")]
    pub targets: Vec<String>,
}

/// A causal loop problem record as supplied by the record store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProblemRecord {
    #[serde(default, deserialize_with = "de_string_forgiving")]
    pub id: String,
    #[serde(default, deserialize_with = "de_string_forgiving")]
    pub title: String,
    #[serde(default, deserialize_with = "de_string_forgiving")]
    pub description: String,
    #[serde(default, deserialize_with = "de_vec_forgiving")]
    pub causes: Vec<Cause>,
    #[serde(default, deserialize_with = "de_vec_forgiving")]
    pub impacts: Vec<Impact>,
    #[serde(default, deserialize_with = "de_vec_forgiving")]
    pub feedback_loops: Vec<FeedbackLoop>,
    #[serde(default, deserialize_with = "de_vec_forgiving")]
    pub remediations: Vec<Remediation>,
    #[serde(
        default,
        deserialize_with = "de_option_string_forgiving",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<String>,
    #[serde(
        default,
        deserialize_with = "de_option_string_forgiving",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<String>,
}

impl ProblemRecord {
    pub fn new(id: impl Into<String>, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_cause(mut self, description: &str, kind: CauseType) -> Self {
        self.causes.push(Cause {
            description: description.to_string(),
            kind: Some(kind),
        });
        self
    }

    pub fn with_impact(mut self, description: &str, kind: ImpactType) -> Self {
        self.impacts.push(Impact {
            description: description.to_string(),
            kind: Some(kind),
        });
        self
    }

    pub fn with_loop(mut self, description: &str, kind: LoopType) -> Self {
        self.feedback_loops.push(FeedbackLoop {
            description: description.to_string(),
            kind: Some(kind),
        });
        self
    }

    pub fn with_remediation(mut self, description: &str) -> Self {
        self.remediations.push(Remediation {
            description: description.to_string(),
            ..Default::default()
        });
        self
    }

    pub fn with_created_at(mut self, created_at: &str) -> Self {
        self.created_at = Some(created_at.to_string());
        self
    }

    /// Title and description joined by a single space.
    pub fn text(&self) -> String {
        format!("{} {}", self.title, self.description)
    }

    pub fn lower_text(&self) -> String {
        self.text().to_lowercase()
    }

    pub fn cause_count(&self, kind: CauseType) -> usize {
        self.causes.iter().filter(|c| c.kind == Some(kind)).count()
    }

    pub fn impact_count(&self, kind: ImpactType) -> usize {
        self.impacts.iter().filter(|i| i.kind == Some(kind)).count()
    }

    pub fn loop_count(&self, kind: LoopType) -> usize {
        self.feedback_loops
            .iter()
            .filter(|l| l.kind == Some(kind))
            .count()
    }
}

/// On-disk document shape of the flat-file record store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProblemDocument {
    #[serde(default, deserialize_with = "de_vec_forgiving")]
    pub problems: Vec<ProblemRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_record_decodes_with_defaults() {
        let raw = r#"{"id": 7, "title": "Traffic", "causes": null, "impacts": [{"description": "delay"}]}"#;
        let p: ProblemRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(p.id, "7");
        assert_eq!(p.description, "");
        assert!(p.causes.is_empty());
        assert_eq!(p.impacts.len(), 1);
        assert_eq!(p.impacts[0].kind, None);
        assert!(p.feedback_loops.is_empty());
        assert!(p.created_at.is_none());
    }

    #[test]
    fn type_tags_decode_and_fallback() {
        let raw = r#"{
            "causes": [{"type": "PRIMARY"}, {"type": "primary"}],
            "feedback_loops": [{"type": "reinforcing"}, {"type": "Reinforcing"}, {"type": "spiral"}]
        }"#;
        let p: ProblemRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(p.causes[0].kind, Some(CauseType::Other));
        assert_eq!(p.causes[1].kind, Some(CauseType::Primary));
        assert_eq!(p.cause_count(CauseType::Primary), 1);
        assert_eq!(p.feedback_loops[0].kind, Some(LoopType::Reinforcing));
        assert_eq!(p.feedback_loops[1].kind, Some(LoopType::Other));
        assert_eq!(p.feedback_loops[2].kind, Some(LoopType::Other));
        assert_eq!(p.loop_count(LoopType::Reinforcing), 1);
        assert_eq!(p.loop_count(LoopType::Balancing), 0);
    }

    #[test]
    fn record_round_trips_through_json() {
        let p = ProblemRecord::new("a", "Title", "Body")
            .with_cause("c", CauseType::Latent)
            .with_impact("i", ImpactType::Health)
            .with_loop("l", LoopType::Balancing)
            .with_created_at("2024-01-02T00:00:00Z");
        let json = serde_json::to_string(&p).unwrap();
        let back: ProblemRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(p, back);
        assert!(json.contains(r#""type":"latent""#));
    }
}
