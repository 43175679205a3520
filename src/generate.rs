//! LLM-generated artifacts: test specifications and documentation.
//!
//! Generated text is stored as ordinary chunks of the PRD (`test_case`,
//! `unit_test_spec`, `user_manual`, `api_doc`, ...) so it is searchable
//! like any other chunk, and linked back to the requirements it covers
//! with `TESTS` and `DOCUMENTS` edges. Coverage reports count those edges.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::error::PipelineError;
use crate::graph::Coverage;
use crate::llm::{extract_json_object, ChatClient, OpenRouterClient};
use crate::models::{Chunk, ChunkType, Priority, Relationship, RelationshipType, ORIGIN_GENERATED};
use crate::pipeline::Pipeline;

pub const GENERATED_TAG: &str = "generated";
const TEST_SECTION: &str = "Generated Tests";
const DOC_SECTION: &str = "Generated Documentation";
const CHUNKS_PER_TYPE: usize = 10;
const RELEASE_NOTE_LINKS: usize = 10;
const RELEASE_NOTE_FEATURES: usize = 20;

// ============ Test generation ============

/// Which tests to ask the model for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TestType {
    Unit,
    Integration,
    Acceptance,
    #[default]
    All,
}

impl TestType {
    /// Unknown names fall back to [`TestType::All`].
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "unit" => Self::Unit,
            "integration" => Self::Integration,
            "acceptance" => Self::Acceptance,
            _ => Self::All,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unit => "unit",
            Self::Integration => "integration",
            Self::Acceptance => "acceptance",
            Self::All => "all",
        }
    }

    fn guidance(&self) -> &'static str {
        match self {
            Self::Unit => "Focus on unit-level tests for individual components/functions.",
            Self::Integration => "Focus on integration tests that verify component interactions.",
            Self::Acceptance => "Focus on acceptance tests from the user's perspective.",
            Self::All => "Generate a mix of unit, integration, and acceptance tests.",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TestOptions {
    pub test_type: TestType,
    /// Test framework for code stubs, e.g. `pytest` or `jest`.
    pub framework: Option<String>,
    pub include_code_stub: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecommendedStack {
    pub language: Option<String>,
    pub framework: Option<String>,
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestCaseSpec {
    pub test_id: Option<String>,
    pub test_type: Option<String>,
    pub title: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub preconditions: Vec<String>,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub expected_result: String,
    pub priority: Option<String>,
    pub code_stub: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestGeneration {
    pub recommended_stack: Option<RecommendedStack>,
    #[serde(default)]
    pub test_cases: Vec<TestCaseSpec>,
}

/// A test case as stored and returned to callers.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedTest {
    pub id: String,
    pub prd_id: String,
    pub source_requirement_id: String,
    pub test_type: String,
    pub title: String,
    pub description: String,
    pub preconditions: Vec<String>,
    pub steps: Vec<String>,
    pub expected_result: String,
    pub priority: Priority,
    pub code_stub: String,
    pub chunk_type: ChunkType,
    pub recommended_language: Option<String>,
    pub recommended_framework: Option<String>,
    pub stack_reasoning: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestSuiteReport {
    pub prd_id: String,
    pub total_requirements: usize,
    pub total_tests_generated: usize,
    pub test_cases: Vec<GeneratedTest>,
    pub coverage: Option<Coverage>,
}

/// A stored test chunk, summarised for listing.
#[derive(Debug, Clone, Serialize)]
pub struct TestSummary {
    pub id: String,
    pub title: String,
    pub description: String,
    pub test_type: &'static str,
    pub priority: Priority,
    pub code_stub: String,
    pub source_requirement_id: Option<String>,
    pub requirement_text: String,
}

/// Chunk type a generated test is stored as.
pub fn test_chunk_type(test_type: &str) -> ChunkType {
    match test_type.trim().to_ascii_lowercase().as_str() {
        "unit" => ChunkType::UnitTestSpec,
        "integration" => ChunkType::IntegrationTestSpec,
        "acceptance" => ChunkType::AcceptanceCriteria,
        _ => ChunkType::TestCase,
    }
}

/// Build the `(system, user)` prompt pair for one requirement.
pub fn build_test_prompt(prd: (&str, &str), requirement: &Chunk, options: &TestOptions) -> (String, String) {
    let (prd_id, prd_name) = prd;
    let mut system = format!(
        r#"You are an expert software test engineer. Your task is to generate comprehensive, LANGUAGE-AGNOSTIC test specifications from software requirements.

Generate test specifications that are:
- Specific, measurable, and technology-neutral
- Covering both positive and negative scenarios
- Including edge cases and boundary conditions
- Traceable back to the requirement
- Written so they can be implemented in ANY programming language

Test types to generate: {test_type}

For each test case, also recommend the most suitable programming language/framework based on the nature of the requirement and common industry practice.

IMPORTANT: Return ONLY valid JSON, no markdown code blocks.
Generate exactly 2-3 test cases maximum.
Keep descriptions brief but complete.

Your response MUST be this exact JSON structure:
{{
  "recommended_stack": {{
    "language": "python",
    "framework": "pytest",
    "reasoning": "Brief reason why this stack is recommended"
  }},
  "test_cases": [
    {{
      "test_id": "TC001",
      "test_type": "unit",
      "title": "Brief test title",
      "description": "What this test verifies",
      "preconditions": ["System state required before test"],
      "steps": ["Step 1: Do X", "Step 2: Verify Y"],
      "expected_result": "Expected outcome",
      "priority": "high"
    }}
  ]
}}
"#,
        test_type = options.test_type.as_str()
    );
    if let (true, Some(framework)) = (options.include_code_stub, options.framework.as_deref()) {
        system.push_str(&format!(
            "\nAdditionally, since {} was explicitly requested, include a \"code_stub\" field with example code for each test case.\n",
            framework
        ));
    }

    let mut user = format!(
        r#"Generate test cases for the following requirement:

## PRD Context
- PRD Name: {prd_name}
- PRD ID: {prd_id}

## Requirement to Test
- ID: {id}
- Type: {chunk_type}
- Priority: {priority}
- Content:
{text}

## Context Prefix
{prefix}

{guidance}"#,
        id = requirement.id,
        chunk_type = requirement.chunk_type,
        priority = requirement.priority,
        text = requirement.text,
        prefix = requirement.context_prefix,
        guidance = options.test_type.guidance(),
    );
    if let Some(framework) = options.framework.as_deref() {
        user.push_str(&format!("\n\nGenerate code stubs using {} syntax.", framework));
    }

    (system, user)
}

fn parse_reply<T: serde::de::DeserializeOwned>(text: &str) -> Result<T> {
    let value = extract_json_object(text).map_err(|e| {
        PipelineError::Validation(format!("Failed to parse LLM response: {}", e))
    })?;
    serde_json::from_value(value).map_err(|e| {
        PipelineError::Validation(format!("Failed to parse LLM response: {}", e)).into()
    })
}

pub fn parse_test_cases(text: &str) -> Result<TestGeneration> {
    parse_reply(text)
}

/// Markdown body stored as the test chunk's text.
pub fn render_test_case(test: &GeneratedTest) -> String {
    let preconditions = test
        .preconditions
        .iter()
        .map(|p| format!("- {}", p))
        .collect::<Vec<_>>()
        .join("\n");
    let steps = test
        .steps
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {}", i + 1, s))
        .collect::<Vec<_>>()
        .join("\n");

    let mut text = format!(
        "# {}\n\n{}\n\n## Preconditions\n{}\n\n## Steps\n{}\n\n## Expected Result\n{}\n",
        test.title, test.description, preconditions, steps, test.expected_result
    );
    if let Some(language) = &test.recommended_language {
        text.push_str(&format!(
            "\n## Recommended Implementation\n- **Language:** {}\n- **Framework:** {}\n- **Reasoning:** {}\n",
            language,
            test.recommended_framework.as_deref().unwrap_or("N/A"),
            test.stack_reasoning.as_deref().unwrap_or("N/A"),
        ));
    }
    if !test.code_stub.trim().is_empty() {
        text.push_str(&format!("\n## Code Stub\n```\n{}\n```\n", test.code_stub.trim()));
    }
    text
}

fn prefix_of(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn test_from_spec(requirement: &Chunk, stack: Option<&RecommendedStack>, spec: TestCaseSpec) -> GeneratedTest {
    let test_type = spec.test_type.unwrap_or_else(|| "unit".to_string());
    GeneratedTest {
        id: uuid::Uuid::new_v4().to_string(),
        prd_id: requirement.prd_id.clone(),
        source_requirement_id: requirement.id.clone(),
        chunk_type: test_chunk_type(&test_type),
        title: spec
            .title
            .or(spec.test_id)
            .unwrap_or_else(|| "Untitled Test".to_string()),
        test_type,
        description: spec.description,
        preconditions: spec.preconditions,
        steps: spec.steps,
        expected_result: spec.expected_result,
        priority: spec
            .priority
            .as_deref()
            .map(Priority::parse_lenient)
            .unwrap_or_default(),
        code_stub: spec.code_stub.unwrap_or_default(),
        recommended_language: stack.and_then(|s| s.language.clone()),
        recommended_framework: stack.and_then(|s| s.framework.clone()),
        stack_reasoning: stack.and_then(|s| s.reasoning.clone()),
    }
}

fn test_chunk(test: &GeneratedTest, requirement: &Chunk) -> Chunk {
    Chunk {
        id: test.id.clone(),
        prd_id: test.prd_id.clone(),
        chunk_type: test.chunk_type,
        text: render_test_case(test),
        context_prefix: format!("Test for: {}", prefix_of(&requirement.text, 100)),
        priority: test.priority,
        tags: vec![test.test_type.clone(), GENERATED_TAG.to_string()],
        section_title: TEST_SECTION.to_string(),
        part_index: 0,
        optimized: false,
        optimization_notes: None,
    }
}

async fn link_artifact(
    pipeline: &Pipeline,
    artifact_id: &str,
    target_id: &str,
    rel_type: RelationshipType,
) -> Result<bool> {
    if !pipeline.graph().is_enabled() {
        return Ok(false);
    }
    let rel = Relationship {
        source_id: artifact_id.to_string(),
        target_id: target_id.to_string(),
        rel_type,
        strength: 1.0,
        origin: ORIGIN_GENERATED.to_string(),
    };
    pipeline.graph().create_relationship(&rel).await
}

/// Ask the model for tests of one requirement chunk, store them as test
/// chunks and link each one to the requirement with a `TESTS` edge.
pub async fn generate_tests(
    pipeline: &Pipeline,
    client: &dyn ChatClient,
    chunk_id: &str,
    options: &TestOptions,
) -> Result<Vec<GeneratedTest>> {
    let requirement = pipeline.get_chunk(chunk_id).await?;
    let prd = pipeline.load_prd(&requirement.prd_id).await?;
    generate_tests_for(pipeline, client, (&prd.id, &prd.name), &requirement, options).await
}

async fn generate_tests_for(
    pipeline: &Pipeline,
    client: &dyn ChatClient,
    prd: (&str, &str),
    requirement: &Chunk,
    options: &TestOptions,
) -> Result<Vec<GeneratedTest>> {
    tracing::info!(chunk = %requirement.id, test_type = options.test_type.as_str(), model = client.model(), "generating tests");
    let (system, user) = build_test_prompt(prd, requirement, options);
    let reply = client.complete(&system, &user).await?;
    let generation = parse_test_cases(&reply)?;

    let stack = generation.recommended_stack.as_ref();
    let tests: Vec<GeneratedTest> = generation
        .test_cases
        .into_iter()
        .map(|spec| test_from_spec(requirement, stack, spec))
        .collect();
    let chunks: Vec<Chunk> = tests.iter().map(|t| test_chunk(t, requirement)).collect();
    pipeline.add_chunks(&requirement.prd_id, &chunks).await?;

    for test in &tests {
        link_artifact(pipeline, &test.id, &requirement.id, RelationshipType::Tests).await?;
    }
    tracing::info!(chunk = %requirement.id, count = tests.len(), "tests generated");
    Ok(tests)
}

/// Generate tests for every requirement, feature and constraint of a PRD.
/// A requirement whose generation fails is logged and skipped.
pub async fn generate_test_suite(
    pipeline: &Pipeline,
    client: &dyn ChatClient,
    prd_id: &str,
    framework: Option<String>,
) -> Result<TestSuiteReport> {
    let prd = pipeline.load_prd(prd_id).await?;
    let testable: Vec<Chunk> = pipeline
        .prd_chunks(prd_id)
        .await?
        .into_iter()
        .filter(|c| c.chunk_type.is_coverable())
        .collect();

    let options = TestOptions {
        test_type: TestType::All,
        framework,
        include_code_stub: true,
    };
    let mut test_cases = Vec::new();
    for requirement in &testable {
        match generate_tests_for(pipeline, client, (&prd.id, &prd.name), requirement, &options).await {
            Ok(tests) => test_cases.extend(tests),
            Err(e) => tracing::warn!(chunk = %requirement.id, error = %e, "test generation failed"),
        }
    }

    let coverage = if pipeline.graph().is_enabled() {
        match pipeline.coverage(prd_id, RelationshipType::Tests).await {
            Ok(c) => Some(c),
            Err(e) => {
                tracing::warn!(prd = prd_id, error = %e, "test coverage unavailable");
                None
            }
        }
    } else {
        None
    };

    Ok(TestSuiteReport {
        prd_id: prd.id,
        total_requirements: testable.len(),
        total_tests_generated: test_cases.len(),
        test_cases,
        coverage,
    })
}

/// Pull title, description and code stub back out of a stored test chunk.
pub fn summarize_test(chunk: &Chunk) -> TestSummary {
    let title = chunk
        .text
        .lines()
        .next()
        .and_then(|l| l.strip_prefix("# "))
        .map(|t| t.trim().to_string())
        .unwrap_or_else(|| "Untitled Test".to_string());
    let description = chunk
        .text
        .lines()
        .skip(1)
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with('#'))
        .unwrap_or_default()
        .to_string();
    let code_stub = chunk
        .text
        .split("```")
        .nth(1)
        .map(|block| {
            // Drop a language tag on the opening fence.
            let stub = match block.split_once('\n') {
                Some((tag, rest)) if !tag.trim().is_empty() && !tag.contains(' ') => rest,
                _ => block,
            };
            stub.trim().to_string()
        })
        .unwrap_or_default();
    let test_type = match chunk.chunk_type {
        ChunkType::IntegrationTestSpec => "integration",
        ChunkType::AcceptanceCriteria => "acceptance",
        _ => "unit",
    };

    TestSummary {
        id: chunk.id.clone(),
        title,
        description,
        test_type,
        priority: chunk.priority,
        code_stub,
        source_requirement_id: None,
        requirement_text: String::new(),
    }
}

/// Every test chunk of a PRD with the requirement it tests.
pub async fn prd_tests(pipeline: &Pipeline, prd_id: &str) -> Result<Vec<TestSummary>> {
    let tests: Vec<Chunk> = pipeline
        .prd_chunks(prd_id)
        .await?
        .into_iter()
        .filter(|c| c.chunk_type.is_test())
        .collect();

    let mut summaries = Vec::with_capacity(tests.len());
    for test in &tests {
        let mut summary = summarize_test(test);
        let tested = pipeline
            .graph()
            .related(&test.id, 10)
            .await?
            .into_iter()
            .find(|r| r.relationship_type == RelationshipType::Tests.as_str());
        if let Some(requirement) = tested {
            summary.requirement_text = prefix_of(&requirement.node.text, 200);
            summary.source_requirement_id = Some(requirement.node.chunk_id);
        }
        summaries.push(summary);
    }
    Ok(summaries)
}

/// Test chunks linked to a requirement.
pub async fn chunk_tests(pipeline: &Pipeline, chunk_id: &str) -> Result<Vec<Chunk>> {
    Ok(pipeline
        .linked_chunks(chunk_id, RelationshipType::Tests)
        .await?
        .into_iter()
        .filter(|c| c.chunk_type.is_test())
        .collect())
}

// ============ Documentation ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocKind {
    UserManual,
    ApiDocs,
    TechnicalSpec,
}

impl DocKind {
    /// Label used in tags, context prefixes and responses.
    pub fn doc_type(&self) -> &'static str {
        match self {
            Self::UserManual => "user_manual",
            Self::ApiDocs => "api_docs",
            Self::TechnicalSpec => "technical_spec",
        }
    }

    pub fn chunk_type(&self) -> ChunkType {
        match self {
            Self::UserManual => ChunkType::UserManual,
            Self::ApiDocs => ChunkType::ApiDoc,
            Self::TechnicalSpec => ChunkType::TechnicalSpec,
        }
    }

    fn focus(&self) -> &'static str {
        match self {
            Self::UserManual => "Focus on creating user-facing documentation with clear instructions.",
            Self::ApiDocs => "Focus on extracting API endpoints and technical interfaces from the requirements.",
            Self::TechnicalSpec => "Focus on architecture, data models, and technical implementation details.",
        }
    }

    fn system_prompt(&self, audience: &str) -> String {
        match self {
            Self::UserManual => format!(
                r#"You are a technical writer creating user documentation.
Your task is to generate clear, user-friendly manual sections from software requirements.

Target audience: {audience}

Write documentation that is clear to non-technical users, action-oriented with step-by-step instructions, and organized by user tasks and workflows.

Your response MUST be valid JSON with the following structure:
{{
  "manual_sections": [
    {{
      "section_id": "unique identifier",
      "title": "section title",
      "content": "markdown formatted content",
      "related_requirement_ids": ["req1", "req2"]
    }}
  ],
  "suggested_toc": "table of contents as markdown"
}}"#
            ),
            Self::ApiDocs => r#"You are a technical writer specializing in API documentation.
Your task is to generate comprehensive API documentation from software requirements.

Write documentation that includes endpoint descriptions, request/response formats, authentication requirements, error handling and code examples where applicable.

Your response MUST be valid JSON with the following structure:
{
  "api_sections": [
    {
      "section_id": "unique identifier",
      "title": "section title (e.g., 'Authentication API')",
      "overview": "brief overview",
      "endpoints": [
        {
          "method": "GET|POST|PUT|DELETE",
          "path": "/api/path",
          "description": "what it does",
          "parameters": [{"name": "param", "type": "string", "required": true, "description": "desc"}],
          "request_body": "example request body if applicable",
          "response": "example response",
          "errors": [{"code": 400, "description": "error description"}]
        }
      ],
      "related_requirement_ids": ["req1", "req2"]
    }
  ]
}"#
            .to_string(),
            Self::TechnicalSpec => r#"You are a software architect creating technical specifications.
Your task is to generate detailed technical specifications from product requirements.

Write specifications that include an architecture overview, component descriptions, data models, integration points, security considerations and performance requirements.

Your response MUST be valid JSON with the following structure:
{
  "spec_sections": [
    {
      "section_id": "unique identifier",
      "title": "section title",
      "content": "markdown formatted technical content",
      "related_requirement_ids": ["req1", "req2"]
    }
  ],
  "architecture_notes": "high-level architecture notes"
}"#
            .to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndpointParam {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub param_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndpointError {
    #[serde(default)]
    pub code: serde_json::Value,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Endpoint {
    pub method: Option<String>,
    pub path: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<EndpointParam>,
    pub request_body: Option<serde_json::Value>,
    pub response: Option<serde_json::Value>,
    #[serde(default)]
    pub errors: Vec<EndpointError>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocSection {
    pub title: Option<String>,
    pub content: Option<String>,
    pub overview: Option<String>,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    #[serde(default)]
    pub related_requirement_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct DocReply {
    #[serde(default, alias = "manual_sections", alias = "api_sections", alias = "spec_sections")]
    sections: Vec<DocSection>,
}

/// A stored documentation section.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedDoc {
    pub id: String,
    pub prd_id: String,
    pub chunk_type: ChunkType,
    pub title: String,
    pub content: String,
    pub related_requirement_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocReport {
    pub prd_id: String,
    pub doc_type: &'static str,
    pub sections: Vec<GeneratedDoc>,
    pub count: usize,
}

/// User prompt listing the PRD's chunks grouped by type.
pub fn build_doc_prompt(prd_name: &str, chunks: &[Chunk], kind: DocKind) -> String {
    let mut grouped: BTreeMap<&str, Vec<&Chunk>> = BTreeMap::new();
    for chunk in chunks {
        grouped.entry(chunk.chunk_type.as_str()).or_default().push(chunk);
    }

    let mut prompt = format!("Generate documentation for: {}\n\n## Requirements by Type:\n", prd_name);
    for (chunk_type, members) in grouped {
        prompt.push_str(&format!("\n### {}\n", chunk_type.to_ascii_uppercase()));
        for chunk in members.into_iter().take(CHUNKS_PER_TYPE) {
            prompt.push_str(&format!(
                "\n[{}] (Priority: {})\n{}\n",
                chunk.id,
                chunk.priority,
                prefix_of(&chunk.text, 300)
            ));
        }
    }
    prompt.push_str("\n\n");
    prompt.push_str(kind.focus());
    prompt
}

fn json_block(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_default(),
    }
}

/// Markdown for one API section: overview, then each endpoint with its
/// parameter table, bodies and errors.
pub fn render_api_section(section: &DocSection) -> String {
    let mut text = format!(
        "# {}\n\n{}\n\n",
        section.title.as_deref().unwrap_or("API Section"),
        section.overview.as_deref().unwrap_or_default()
    );

    for endpoint in &section.endpoints {
        text.push_str(&format!(
            "## {} {}\n\n{}\n\n",
            endpoint.method.as_deref().unwrap_or("GET"),
            endpoint.path.as_deref().unwrap_or("/"),
            endpoint.description
        ));
        if !endpoint.parameters.is_empty() {
            text.push_str("### Parameters\n\n| Name | Type | Required | Description |\n|------|------|----------|-------------|\n");
            for p in &endpoint.parameters {
                text.push_str(&format!(
                    "| {} | {} | {} | {} |\n",
                    p.name, p.param_type, p.required, p.description
                ));
            }
            text.push('\n');
        }
        if let Some(body) = endpoint.request_body.as_ref().filter(|v| !v.is_null()) {
            text.push_str(&format!("### Request Body\n\n```json\n{}\n```\n\n", json_block(body)));
        }
        if let Some(response) = endpoint.response.as_ref().filter(|v| !v.is_null()) {
            text.push_str(&format!("### Response\n\n```json\n{}\n```\n\n", json_block(response)));
        }
        if !endpoint.errors.is_empty() {
            text.push_str("### Errors\n\n");
            for err in &endpoint.errors {
                text.push_str(&format!("- **{}**: {}\n", json_block(&err.code), err.description));
            }
            text.push('\n');
        }
    }
    text
}

fn render_doc_section(kind: DocKind, section: &DocSection) -> String {
    match kind {
        DocKind::ApiDocs => render_api_section(section),
        _ => format!(
            "# {}\n\n{}",
            section.title.as_deref().unwrap_or("Untitled"),
            section
                .content
                .as_deref()
                .or(section.overview.as_deref())
                .unwrap_or_default()
        ),
    }
}

fn doc_chunk(prd_id: &str, chunk_type: ChunkType, doc_type: &str, text: String, priority: Priority, context_prefix: String) -> Chunk {
    Chunk {
        id: uuid::Uuid::new_v4().to_string(),
        prd_id: prd_id.to_string(),
        chunk_type,
        text,
        context_prefix,
        priority,
        tags: vec![doc_type.to_string(), GENERATED_TAG.to_string()],
        section_title: DOC_SECTION.to_string(),
        part_index: 0,
        optimized: false,
        optimization_notes: None,
    }
}

/// Generate one kind of documentation for a PRD. Each returned section is
/// stored as a chunk with `DOCUMENTS` edges to the requirements it names
/// that belong to this PRD.
pub async fn generate_docs(
    pipeline: &Pipeline,
    client: &dyn ChatClient,
    prd_id: &str,
    kind: DocKind,
    audience: &str,
) -> Result<DocReport> {
    let prd = pipeline.get_prd(prd_id).await?;
    tracing::info!(prd = %prd.name, doc_type = kind.doc_type(), model = client.model(), "generating documentation");

    let user = build_doc_prompt(&prd.name, &prd.chunks, kind);
    let reply = client.complete(&kind.system_prompt(audience), &user).await?;
    let parsed: DocReply = parse_reply(&reply)?;

    let known: HashSet<&str> = prd.chunks.iter().map(|c| c.id.as_str()).collect();
    let mut sections = Vec::with_capacity(parsed.sections.len());
    for section in &parsed.sections {
        let chunk = doc_chunk(
            &prd.id,
            kind.chunk_type(),
            kind.doc_type(),
            render_doc_section(kind, section),
            Priority::Medium,
            format!("{} documentation", kind.doc_type()),
        );
        pipeline.add_chunks(&prd.id, std::slice::from_ref(&chunk)).await?;
        for req_id in section.related_requirement_ids.iter().filter(|id| known.contains(id.as_str())) {
            link_artifact(pipeline, &chunk.id, req_id, RelationshipType::Documents).await?;
        }
        sections.push(GeneratedDoc {
            id: chunk.id,
            prd_id: prd.id.clone(),
            chunk_type: chunk.chunk_type,
            title: section.title.clone().unwrap_or_default(),
            content: chunk.text,
            related_requirement_ids: section.related_requirement_ids.clone(),
        });
    }

    tracing::info!(prd = %prd.id, doc_type = kind.doc_type(), count = sections.len(), "documentation generated");
    Ok(DocReport {
        prd_id: prd.id,
        doc_type: kind.doc_type(),
        count: sections.len(),
        sections,
    })
}

pub fn build_release_notes_prompt(prd_name: &str, version: &str, chunks: &[Chunk], changes: &[String]) -> (String, String) {
    let system = format!(
        r#"You are a technical writer creating release notes.
Your task is to generate clear, informative release notes for version {version}.

Write release notes that include a summary of what's new, new features and improvements, bug fixes, breaking changes, migration notes and known issues where they apply.

Your response MUST be valid JSON with the following structure:
{{
  "version": "{version}",
  "release_date": "YYYY-MM-DD format",
  "summary": "brief summary of the release",
  "highlights": ["key highlight 1", "key highlight 2"],
  "sections": [
    {{
      "title": "New Features",
      "items": [
        {{
          "title": "feature title",
          "description": "feature description",
          "related_requirement_ids": ["req1"]
        }}
      ]
    }}
  ],
  "full_markdown": "complete release notes in markdown format"
}}"#
    );

    let features = chunks
        .iter()
        .filter(|c| matches!(c.chunk_type, ChunkType::Feature | ChunkType::Requirement))
        .take(RELEASE_NOTE_FEATURES)
        .map(|c| format!("- {}", prefix_of(&c.text, 200)))
        .collect::<Vec<_>>()
        .join("\n");
    let mut user = format!(
        "Generate release notes for:\n\n## Product: {}\n## Version: {}\n\n## Features/Requirements being released:\n{}\n",
        prd_name, version, features
    );
    if !changes.is_empty() {
        user.push_str("\nSpecific changes to highlight:\n");
        for change in changes {
            user.push_str(&format!("- {}\n", change));
        }
    }
    (system, user)
}

/// Generate release notes for `version`, store them as one `release_note`
/// chunk and link it to the PRD's leading requirements. Returns the model's
/// JSON with the new `chunk_id` added.
pub async fn generate_release_notes(
    pipeline: &Pipeline,
    client: &dyn ChatClient,
    prd_id: &str,
    version: &str,
    changes: &[String],
) -> Result<serde_json::Value> {
    if version.trim().is_empty() {
        return Err(PipelineError::Validation("version must not be empty".into()).into());
    }
    let prd = pipeline.get_prd(prd_id).await?;
    tracing::info!(prd = %prd.name, version, model = client.model(), "generating release notes");

    let (system, user) = build_release_notes_prompt(&prd.name, version, &prd.chunks, changes);
    let reply = client.complete(&system, &user).await?;
    let mut notes: serde_json::Map<String, serde_json::Value> = parse_reply(&reply)?;

    let text = match notes.get("full_markdown").and_then(|v| v.as_str()) {
        Some(markdown) if !markdown.trim().is_empty() => markdown.to_string(),
        _ => format!(
            "# Release Notes v{}\n\n{}",
            version,
            notes.get("summary").and_then(|v| v.as_str()).unwrap_or_default()
        ),
    };
    let chunk = doc_chunk(
        &prd.id,
        ChunkType::ReleaseNote,
        "release_note",
        text,
        Priority::High,
        format!("Release notes for {} v{}", prd.name, version),
    );
    pipeline.add_chunks(&prd.id, std::slice::from_ref(&chunk)).await?;
    for requirement in prd.chunks.iter().take(RELEASE_NOTE_LINKS) {
        link_artifact(pipeline, &chunk.id, &requirement.id, RelationshipType::Documents).await?;
    }

    notes.insert("chunk_id".into(), serde_json::Value::String(chunk.id));
    Ok(serde_json::Value::Object(notes))
}

/// Documentation chunks linked to a requirement.
pub async fn chunk_documentation(pipeline: &Pipeline, chunk_id: &str) -> Result<Vec<Chunk>> {
    Ok(pipeline
        .linked_chunks(chunk_id, RelationshipType::Documents)
        .await?
        .into_iter()
        .filter(|c| c.chunk_type.is_documentation())
        .collect())
}

// ============ CLI ============

fn cli_client(pipeline: &Pipeline) -> Result<OpenRouterClient> {
    OpenRouterClient::from_config(&pipeline.config().llm)
}

/// CLI entry point: generate tests for one chunk, or for a whole PRD.
pub async fn run_generate_tests(
    pipeline: &Pipeline,
    target: TestTarget<'_>,
    options: TestOptions,
    json: bool,
) -> Result<()> {
    match target {
        TestTarget::Chunk(chunk_id) => {
            pipeline.get_chunk(chunk_id).await?;
            let client = cli_client(pipeline)?;
            let tests = generate_tests(pipeline, &client, chunk_id, &options).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tests)?);
                return Ok(());
            }
            println!("generated {} tests for {}", tests.len(), chunk_id);
            for test in &tests {
                println!("  {}  [{}] {}", test.id, test.test_type, test.title);
            }
        }
        TestTarget::Prd(prd_id) => {
            pipeline.load_prd(prd_id).await?;
            let client = cli_client(pipeline)?;
            let report = generate_test_suite(pipeline, &client, prd_id, options.framework).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }
            println!(
                "generated {} tests for {} requirements",
                report.total_tests_generated, report.total_requirements
            );
            if let Some(coverage) = &report.coverage {
                println!("  coverage: {:.1}%", coverage.coverage_percent);
            }
        }
    }
    Ok(())
}

pub enum TestTarget<'a> {
    Chunk(&'a str),
    Prd(&'a str),
}

/// CLI entry point: generate one kind of documentation for a PRD.
pub async fn run_generate_docs(
    pipeline: &Pipeline,
    prd_id: &str,
    kind: DocKind,
    audience: &str,
    json: bool,
) -> Result<()> {
    pipeline.load_prd(prd_id).await?;
    let client = cli_client(pipeline)?;
    let report = generate_docs(pipeline, &client, prd_id, kind, audience).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("generated {} {} sections", report.count, report.doc_type);
    for section in &report.sections {
        println!("  {}  {}", section.id, section.title);
    }
    Ok(())
}

/// CLI entry point: generate release notes for a PRD.
pub async fn run_release_notes(
    pipeline: &Pipeline,
    prd_id: &str,
    version: &str,
    changes: &[String],
    json: bool,
) -> Result<()> {
    pipeline.load_prd(prd_id).await?;
    let client = cli_client(pipeline)?;
    let notes = generate_release_notes(pipeline, &client, prd_id, version, changes).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&notes)?);
        return Ok(());
    }
    match notes.get("full_markdown").and_then(|v| v.as_str()) {
        Some(markdown) => println!("{}", markdown),
        None => println!("{}", serde_json::to_string_pretty(&notes)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::context_prefix;

    fn requirement(text: &str) -> Chunk {
        Chunk {
            id: "req-1".into(),
            prd_id: "p1".into(),
            chunk_type: ChunkType::Requirement,
            text: text.into(),
            context_prefix: context_prefix("Shop", "Payments"),
            priority: Priority::High,
            tags: vec![],
            section_title: "Payments".into(),
            part_index: 0,
            optimized: false,
            optimization_notes: None,
        }
    }

    const REPLY: &str = r#"{
      "recommended_stack": {"language": "python", "framework": "pytest", "reasoning": "API heavy"},
      "test_cases": [
        {"test_id": "TC001", "test_type": "integration", "title": "Declined card",
         "description": "A declined card shows an error.", "preconditions": ["Gateway up"],
         "steps": ["Submit a declined card", "Read the response"], "expected_result": "HTTP 402",
         "priority": "HIGH", "code_stub": "def test_declined():\n    pass"},
        {"test_id": "TC002", "description": "Only an id"}
      ]
    }"#;

    #[test]
    fn test_chunk_type_mapping() {
        assert_eq!(test_chunk_type("unit"), ChunkType::UnitTestSpec);
        assert_eq!(test_chunk_type("Integration"), ChunkType::IntegrationTestSpec);
        assert_eq!(test_chunk_type("acceptance"), ChunkType::AcceptanceCriteria);
        assert_eq!(test_chunk_type("performance"), ChunkType::TestCase);
        assert_eq!(TestType::parse_lenient("weird"), TestType::All);
    }

    #[test]
    fn test_prompt_carries_requirement_and_framework() {
        let req = requirement("Cards are charged once.");
        let options = TestOptions {
            test_type: TestType::Unit,
            framework: Some("jest".into()),
            include_code_stub: true,
        };
        let (system, user) = build_test_prompt(("p1", "Shop"), &req, &options);
        assert!(system.contains("Test types to generate: unit"));
        assert!(system.contains("since jest was explicitly requested"));
        assert!(user.contains("- PRD Name: Shop"));
        assert!(user.contains("- ID: req-1"));
        assert!(user.contains("Cards are charged once."));
        assert!(user.contains("Focus on unit-level tests"));
        assert!(user.ends_with("Generate code stubs using jest syntax."));

        let plain = TestOptions::default();
        let (system, user) = build_test_prompt(("p1", "Shop"), &req, &plain);
        assert!(!system.contains("code_stub\" field"));
        assert!(!user.contains("code stubs"));
    }

    #[test]
    fn test_parsed_cases_render_to_markdown() {
        let req = requirement("Cards are charged once.");
        let generation = parse_test_cases(REPLY).unwrap();
        let stack = generation.recommended_stack.clone();
        let tests: Vec<GeneratedTest> = generation
            .test_cases
            .into_iter()
            .map(|spec| test_from_spec(&req, stack.as_ref(), spec))
            .collect();

        assert_eq!(tests.len(), 2);
        assert_eq!(tests[0].chunk_type, ChunkType::IntegrationTestSpec);
        assert_eq!(tests[0].priority, Priority::High);
        assert_eq!(tests[1].title, "TC002");
        assert_eq!(tests[1].test_type, "unit");
        assert_eq!(tests[1].chunk_type, ChunkType::UnitTestSpec);

        let text = render_test_case(&tests[0]);
        assert!(text.starts_with("# Declined card\n\nA declined card shows an error."));
        assert!(text.contains("## Preconditions\n- Gateway up"));
        assert!(text.contains("## Steps\n1. Submit a declined card\n2. Read the response"));
        assert!(text.contains("## Expected Result\nHTTP 402"));
        assert!(text.contains("- **Framework:** pytest"));
        assert!(text.contains("## Code Stub\n```\ndef test_declined():"));

        let chunk = test_chunk(&tests[0], &req);
        assert_eq!(chunk.context_prefix, "Test for: Cards are charged once.");
        assert_eq!(chunk.tags, vec!["integration", "generated"]);

        let summary = summarize_test(&chunk);
        assert_eq!(summary.title, "Declined card");
        assert_eq!(summary.description, "A declined card shows an error.");
        assert_eq!(summary.test_type, "integration");
        assert_eq!(summary.code_stub, "def test_declined():\n    pass");
    }

    #[test]
    fn test_unparseable_reply_is_validation_error() {
        let err = parse_test_cases("sorry").unwrap_err();
        assert!(matches!(
            crate::error::classify(&err),
            Some(PipelineError::Validation(_))
        ));
    }

    #[test]
    fn test_doc_prompt_groups_and_caps_chunks() {
        let mut chunks: Vec<Chunk> = (0..12)
            .map(|i| {
                let mut c = requirement(&format!("Requirement number {}", i));
                c.id = format!("r{}", i);
                c
            })
            .collect();
        let mut feature = requirement(&"x".repeat(400));
        feature.id = "f1".into();
        feature.chunk_type = ChunkType::Feature;
        chunks.push(feature);

        let prompt = build_doc_prompt("Shop", &chunks, DocKind::ApiDocs);
        assert!(prompt.starts_with("Generate documentation for: Shop"));
        assert!(prompt.contains("### REQUIREMENT"));
        assert!(prompt.contains("### FEATURE"));
        assert!(prompt.contains("[r9] (Priority: high)"));
        assert!(!prompt.contains("[r10]"));
        assert!(prompt.contains(&format!("{}\n", "x".repeat(300))));
        assert!(!prompt.contains(&"x".repeat(301)));
        assert!(prompt.ends_with("technical interfaces from the requirements."));
    }

    #[test]
    fn test_api_section_markdown() {
        let section: DocSection = serde_json::from_value(serde_json::json!({
            "title": "Payments API",
            "overview": "Charge cards.",
            "endpoints": [{
                "method": "POST",
                "path": "/payments",
                "description": "Create a payment.",
                "parameters": [{"name": "amount", "type": "integer", "required": true, "description": "cents"}],
                "request_body": {"amount": 100},
                "response": "{\"id\": \"pay_1\"}",
                "errors": [{"code": 402, "description": "card declined"}]
            }]
        }))
        .unwrap();

        let text = render_api_section(&section);
        assert!(text.starts_with("# Payments API\n\nCharge cards."));
        assert!(text.contains("## POST /payments\n\nCreate a payment."));
        assert!(text.contains("| amount | integer | true | cents |"));
        assert!(text.contains("### Request Body\n\n```json\n{\n  \"amount\": 100\n}\n```"));
        assert!(text.contains("### Response\n\n```json\n{\"id\": \"pay_1\"}\n```"));
        assert!(text.contains("- **402**: card declined"));
    }

    #[test]
    fn test_doc_reply_accepts_each_section_key() {
        for key in ["manual_sections", "api_sections", "spec_sections"] {
            let reply = format!("{{\"{}\": [{{\"title\": \"Intro\", \"content\": \"Hi\"}}]}}", key);
            let parsed: DocReply = parse_reply(&reply).unwrap();
            assert_eq!(parsed.sections.len(), 1, "{}", key);
            assert_eq!(render_doc_section(DocKind::UserManual, &parsed.sections[0]), "# Intro\n\nHi");
        }
    }

    #[test]
    fn test_release_prompt_lists_features_and_changes() {
        let mut risk = requirement("Vendor lock-in");
        risk.chunk_type = ChunkType::Risk;
        let chunks = vec![requirement("Cards are charged once."), risk];
        let (system, user) =
            build_release_notes_prompt("Shop", "1.2.0", &chunks, &["Faster checkout".to_string()]);
        assert!(system.contains("release notes for version 1.2.0"));
        assert!(user.contains("## Version: 1.2.0"));
        assert!(user.contains("- Cards are charged once."));
        assert!(!user.contains("Vendor lock-in"));
        assert!(user.contains("Specific changes to highlight:\n- Faster checkout"));
    }
}
