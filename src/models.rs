//! Core data models used throughout cvPRD.
//!
//! A [`Prd`] is an ordered list of [`PrdSection`]s. Sections are split into
//! [`Chunk`]s, which are the units that get embedded, indexed, and linked
//! to each other by [`Relationship`] edges in the knowledge graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Priority of a section or chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Strict, case-insensitive parse.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Some(Self::Critical),
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }

    /// Parse user input, falling back to `Medium` for anything unrecognized.
    pub fn parse_lenient(s: &str) -> Self {
        Self::parse(s).unwrap_or_default()
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Semantic classification of a chunk.
///
/// The first nine variants are produced by the chunker. The remaining ones
/// are artifact types (tests, documentation, designs) that are attached to
/// a PRD by other tools and linked to requirements with artifact edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Requirement,
    Feature,
    Constraint,
    Stakeholder,
    Metric,
    Dependency,
    Risk,
    Objective,
    Overview,

    TestCase,
    UnitTestSpec,
    IntegrationTestSpec,
    AcceptanceCriteria,

    Documentation,
    UserManual,
    ApiDoc,
    TechnicalSpec,
    ReleaseNote,

    DesignSpec,
    ScreenFlow,
    Wireframe,
}

impl ChunkType {
    pub const ALL: [ChunkType; 21] = [
        Self::Requirement,
        Self::Feature,
        Self::Constraint,
        Self::Stakeholder,
        Self::Metric,
        Self::Dependency,
        Self::Risk,
        Self::Objective,
        Self::Overview,
        Self::TestCase,
        Self::UnitTestSpec,
        Self::IntegrationTestSpec,
        Self::AcceptanceCriteria,
        Self::Documentation,
        Self::UserManual,
        Self::ApiDoc,
        Self::TechnicalSpec,
        Self::ReleaseNote,
        Self::DesignSpec,
        Self::ScreenFlow,
        Self::Wireframe,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requirement => "requirement",
            Self::Feature => "feature",
            Self::Constraint => "constraint",
            Self::Stakeholder => "stakeholder",
            Self::Metric => "metric",
            Self::Dependency => "dependency",
            Self::Risk => "risk",
            Self::Objective => "objective",
            Self::Overview => "overview",
            Self::TestCase => "test_case",
            Self::UnitTestSpec => "unit_test_spec",
            Self::IntegrationTestSpec => "integration_test_spec",
            Self::AcceptanceCriteria => "acceptance_criteria",
            Self::Documentation => "documentation",
            Self::UserManual => "user_manual",
            Self::ApiDoc => "api_doc",
            Self::TechnicalSpec => "technical_spec",
            Self::ReleaseNote => "release_note",
            Self::DesignSpec => "design_spec",
            Self::ScreenFlow => "screen_flow",
            Self::Wireframe => "wireframe",
        }
    }

    /// Case-insensitive parse. LLM responses use `REQUIREMENT`, the wire
    /// format uses `requirement`.
    pub fn parse(s: &str) -> Option<Self> {
        let wanted = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        Self::ALL.iter().copied().find(|t| t.as_str() == wanted)
    }

    pub fn is_test(&self) -> bool {
        matches!(
            self,
            Self::TestCase | Self::UnitTestSpec | Self::IntegrationTestSpec | Self::AcceptanceCriteria
        )
    }

    pub fn is_documentation(&self) -> bool {
        matches!(
            self,
            Self::Documentation
                | Self::UserManual
                | Self::ApiDoc
                | Self::TechnicalSpec
                | Self::ReleaseNote
        )
    }

    pub fn is_design(&self) -> bool {
        matches!(self, Self::DesignSpec | Self::ScreenFlow | Self::Wireframe)
    }

    /// True for test, documentation and design artifacts.
    pub fn is_artifact(&self) -> bool {
        self.is_test() || self.is_documentation() || self.is_design()
    }

    /// Chunk types that count toward test/documentation coverage.
    pub fn is_coverable(&self) -> bool {
        matches!(self, Self::Requirement | Self::Feature | Self::Constraint)
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A section within a PRD, as written by the author or extracted by the parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrdSection {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Product Requirements Document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prd {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub sections: Vec<PrdSection>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Prd {
    /// New PRD with a fresh UUID and timestamps set to now.
    pub fn new(name: impl Into<String>, description: Option<String>, sections: Vec<PrdSection>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            description,
            sections,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A PRD as submitted through the API or a JSON file. Priorities are
/// parsed leniently and unknown values become `medium`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewPrd {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sections: Vec<NewSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSection {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl NewPrd {
    pub fn into_prd(self) -> Prd {
        let sections = self
            .sections
            .into_iter()
            .map(|s| PrdSection {
                title: s.title,
                content: s.content,
                priority: s
                    .priority
                    .as_deref()
                    .map(Priority::parse_lenient)
                    .unwrap_or_default(),
                tags: s.tags,
            })
            .collect();
        Prd::new(self.name.trim(), self.description, sections)
    }
}

/// A segment of a PRD section; the unit of embedding, search and linking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub prd_id: String,
    pub chunk_type: ChunkType,
    pub text: String,
    /// `PRD: {name}, Section: {title}`, prepended to the text before embedding.
    pub context_prefix: String,
    pub priority: Priority,
    pub tags: Vec<String>,
    pub section_title: String,
    /// Position within a section that was split into several chunks.
    pub part_index: i64,
    #[serde(default)]
    pub optimized: bool,
    #[serde(default)]
    pub optimization_notes: Option<String>,
}

impl Chunk {
    /// Text handed to the embedding provider.
    pub fn embedding_text(&self) -> String {
        format!("{} - {}", self.context_prefix, self.text)
    }
}

/// Builds the context prefix stored on every chunk.
pub fn context_prefix(prd_name: &str, section_title: &str) -> String {
    format!("PRD: {}, Section: {}", prd_name, section_title)
}

/// Typed edge between two chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    DependsOn,
    References,
    ParentOf,
    Implements,
    Tests,
    Documents,
    Designs,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DependsOn => "DEPENDS_ON",
            Self::References => "REFERENCES",
            Self::ParentOf => "PARENT_OF",
            Self::Implements => "IMPLEMENTS",
            Self::Tests => "TESTS",
            Self::Documents => "DOCUMENTS",
            Self::Designs => "DESIGNS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().replace([' ', '-'], "_").as_str() {
            "DEPENDS_ON" => Some(Self::DependsOn),
            "REFERENCES" => Some(Self::References),
            "PARENT_OF" => Some(Self::ParentOf),
            "IMPLEMENTS" => Some(Self::Implements),
            "TESTS" => Some(Self::Tests),
            "DOCUMENTS" => Some(Self::Documents),
            "DESIGNS" => Some(Self::Designs),
            _ => None,
        }
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Edge origin for relationships found by the keyword heuristics.
pub const ORIGIN_HEURISTIC: &str = "heuristic";
/// Edge origin for relationships suggested by the LLM optimizer.
pub const ORIGIN_LLM: &str = "llm_optimization";
/// Edge origin for relationships created through the API or CLI.
pub const ORIGIN_MANUAL: &str = "manual";
/// Edge origin for test and documentation chunks linked at generation.
pub const ORIGIN_GENERATED: &str = "generated";

/// A directed, typed edge between two chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub source_id: String,
    pub target_id: String,
    pub rel_type: RelationshipType,
    pub strength: f64,
    pub origin: String,
}

impl Relationship {
    pub fn heuristic(source_id: &str, target_id: &str, rel_type: RelationshipType) -> Self {
        Self {
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            rel_type,
            strength: 0.8,
            origin: ORIGIN_HEURISTIC.to_string(),
        }
    }
}

/// Summary row used by PRD listings.
#[derive(Debug, Clone, Serialize)]
pub struct PrdSummary {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    /// Non-artifact chunks.
    pub chunk_count: i64,
    pub test_count: i64,
    pub created_at: String,
}

/// Full PRD as returned by `GET /prds/{id}`.
#[derive(Debug, Clone, Serialize)]
pub struct PrdDetails {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub sections: Vec<PrdSection>,
    /// Requirement-side chunks (artifacts excluded).
    pub chunks: Vec<Chunk>,
    pub tests: Vec<Chunk>,
    pub chunk_count: usize,
    pub test_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_prd_normalises_priority() {
        let input: NewPrd = serde_json::from_str(
            r#"{"name": " Shop ", "sections": [
                {"title": "A", "content": "x", "priority": "HIGH"},
                {"title": "B", "content": "y", "priority": "whenever"},
                {"title": "C", "content": "z"}
            ]}"#,
        )
        .unwrap();
        let prd = input.into_prd();
        assert_eq!(prd.name, "Shop");
        let priorities: Vec<Priority> = prd.sections.iter().map(|s| s.priority).collect();
        assert_eq!(priorities, vec![Priority::High, Priority::Medium, Priority::Medium]);
    }

    #[test]
    fn test_priority_lenient() {
        assert_eq!(Priority::parse_lenient("HIGH"), Priority::High);
        assert_eq!(Priority::parse_lenient(" Low "), Priority::Low);
        assert_eq!(Priority::parse_lenient("urgent"), Priority::Medium);
        assert_eq!(Priority::parse_lenient(""), Priority::Medium);
    }

    #[test]
    fn test_chunk_type_parse_case_insensitive() {
        assert_eq!(ChunkType::parse("REQUIREMENT"), Some(ChunkType::Requirement));
        assert_eq!(ChunkType::parse("test_case"), Some(ChunkType::TestCase));
        assert_eq!(ChunkType::parse("Unit Test Spec"), Some(ChunkType::UnitTestSpec));
        assert_eq!(ChunkType::parse("banana"), None);
    }

    #[test]
    fn test_chunk_type_serde_matches_as_str() {
        for t in ChunkType::ALL {
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
        }
    }

    #[test]
    fn test_artifact_classification() {
        assert!(ChunkType::TestCase.is_artifact());
        assert!(ChunkType::ApiDoc.is_artifact());
        assert!(ChunkType::Wireframe.is_artifact());
        assert!(!ChunkType::Requirement.is_artifact());
        assert!(ChunkType::Constraint.is_coverable());
        assert!(!ChunkType::Risk.is_coverable());
    }

    #[test]
    fn test_relationship_type_wire_format() {
        let json = serde_json::to_string(&RelationshipType::DependsOn).unwrap();
        assert_eq!(json, "\"DEPENDS_ON\"");
        assert_eq!(
            RelationshipType::parse("parent-of"),
            Some(RelationshipType::ParentOf)
        );
    }

    #[test]
    fn test_embedding_text_includes_prefix() {
        let chunk = Chunk {
            id: "c1".into(),
            prd_id: "p1".into(),
            chunk_type: ChunkType::Feature,
            text: "Users can log in".into(),
            context_prefix: context_prefix("Auth", "Login"),
            priority: Priority::High,
            tags: vec![],
            section_title: "Login".into(),
            part_index: 0,
            optimized: false,
            optimization_notes: None,
        };
        assert_eq!(
            chunk.embedding_text(),
            "PRD: Auth, Section: Login - Users can log in"
        );
    }
}
