//! LLM review of a PRD's chunks ("facts").
//!
//! The model sees every chunk of a PRD, numbered from zero, and answers
//! with a JSON [`Analysis`]: per-fact rewrites, new facts, and suggested
//! edges. Rewrites are applied only to facts scored below
//! [`QUALITY_THRESHOLD`].

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::llm::{extract_json_object, ChatClient, OpenRouterClient};
use crate::models::{
    context_prefix, Chunk, ChunkType, Priority, Relationship, RelationshipType, ORIGIN_LLM,
};
use crate::pipeline::Pipeline;

pub const DEFAULT_GOAL: &str = "AI Paired Programming";
pub const QUALITY_THRESHOLD: f64 = 8.0;
pub const GENERATED_SECTION: &str = "LLM-Generated";
pub const GENERATED_TAG: &str = "llm-generated";
const LLM_EDGE_STRENGTH: f64 = 0.9;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Analysis {
    #[serde(default)]
    pub overall_assessment: String,
    #[serde(default)]
    pub fact_optimizations: Vec<FactOptimization>,
    #[serde(default)]
    pub new_facts: Vec<NewFact>,
    #[serde(default)]
    pub relationship_recommendations: Vec<RelationshipRecommendation>,
    #[serde(default)]
    pub structural_insights: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FactOptimization {
    pub original_fact_index: Option<i64>,
    #[serde(default)]
    pub quality_score: f64,
    #[serde(default)]
    pub issues: Vec<String>,
    pub optimized_text: Option<String>,
    pub suggested_priority: Option<String>,
    pub suggested_type: Option<String>,
    pub additional_context: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewFact {
    #[serde(default)]
    pub text: String,
    #[serde(rename = "type")]
    pub chunk_type: Option<String>,
    pub priority: Option<String>,
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationshipRecommendation {
    pub from_fact_index: Option<i64>,
    pub to_fact_index: Option<i64>,
    pub relationship_type: Option<String>,
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OptimizationStats {
    pub facts_updated: usize,
    pub facts_created: usize,
    pub relationships_created: usize,
    pub facts_unchanged: usize,
    /// Recommendations that could not be applied, one message each.
    pub failures: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSummary {
    pub overall_assessment: String,
    pub structural_insights: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizationReport {
    pub status: &'static str,
    pub prd_id: String,
    pub prd_name: String,
    pub optimization_goal: String,
    pub analysis: AnalysisSummary,
    pub statistics: OptimizationStats,
    pub detailed_analysis: Analysis,
}

/// Build the `(system, user)` prompt pair.
pub fn build_optimization_prompt(prd_name: &str, facts: &[Chunk], goal: &str) -> (String, String) {
    let facts_text = facts
        .iter()
        .enumerate()
        .map(|(i, fact)| {
            format!(
                "**Fact {}** (Type: {}, Priority: {})\n{}",
                i,
                fact.chunk_type.as_str().to_ascii_uppercase(),
                fact.priority.as_str().to_ascii_uppercase(),
                fact.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let system = format!(
        "You are an expert technical product manager and software architect specializing in \
         converting PRDs into production-ready requirements optimized for {goal}.\n\n\
         Your task is to analyze PRD facts and restructure them to maximize clarity, \
         completeness, and code generation efficiency."
    );

    let user = format!(
        r#"Analyze the following PRD facts for "{prd_name}" and optimize them for {goal}.

# Current PRD Facts:
{facts_text}

# Analysis Required:

1. **Fact Quality Assessment**: Evaluate each fact for clarity and specificity, completeness of context, technical detail sufficiency, and ambiguities or gaps.

2. **Optimization Recommendations**: For each fact, suggest reformulated text (if needed), additional context to add, priority adjustments and a better chunk type classification.

3. **Relationship Insights**: Identify missing dependencies between facts, logical groupings and conflicting requirements.

4. **Structure Improvements**: Recommend new facts to add for completeness, facts that should be split or merged, and an optimal organization for code generation.

Fact indices are the numbers shown above, starting at 0.

Please provide your response in the following JSON structure:
{{
  "overall_assessment": "Brief assessment of PRD quality",
  "fact_optimizations": [
    {{
      "original_fact_index": 0,
      "quality_score": 0-10,
      "issues": ["list of issues"],
      "optimized_text": "improved version",
      "suggested_priority": "CRITICAL|HIGH|MEDIUM|LOW",
      "suggested_type": "REQUIREMENT|FEATURE|CONSTRAINT|etc",
      "additional_context": "context to add"
    }}
  ],
  "new_facts": [
    {{
      "text": "new fact text",
      "type": "chunk type",
      "priority": "priority level",
      "rationale": "why this is needed"
    }}
  ],
  "relationship_recommendations": [
    {{
      "from_fact_index": 0,
      "to_fact_index": 1,
      "relationship_type": "DEPENDS_ON|REFERENCES|etc",
      "rationale": "why this relationship exists"
    }}
  ],
  "structural_insights": "Overall structural recommendations"
}}"#
    );

    (system, user)
}

/// Parse model output into an [`Analysis`].
pub fn parse_analysis(text: &str) -> Result<Analysis> {
    let value = extract_json_object(text).map_err(|e| {
        PipelineError::Validation(format!("Failed to parse LLM response: {}", e))
    })?;
    serde_json::from_value(value).map_err(|e| {
        PipelineError::Validation(format!("Failed to parse LLM response: {}", e)).into()
    })
}

fn fact_at<'a>(facts: &'a [Chunk], index: Option<i64>) -> Option<&'a Chunk> {
    let i = usize::try_from(index?).ok()?;
    facts.get(i)
}

/// The chunk as rewritten by `opt`, or `None` when it scored high enough
/// to be left alone.
pub fn rewrite_fact(fact: &Chunk, opt: &FactOptimization) -> Option<Chunk> {
    if opt.quality_score >= QUALITY_THRESHOLD {
        return None;
    }

    let mut text = opt
        .optimized_text
        .clone()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| fact.text.clone());
    if let Some(extra) = opt.additional_context.as_deref().filter(|c| !c.trim().is_empty()) {
        text = format!("{}\n\nContext: {}", text, extra);
    }

    let mut updated = fact.clone();
    updated.text = text;
    if let Some(t) = opt.suggested_type.as_deref().and_then(ChunkType::parse) {
        updated.chunk_type = t;
    }
    if let Some(p) = opt.suggested_priority.as_deref().and_then(Priority::parse) {
        updated.priority = p;
    }
    updated.optimized = true;
    updated.optimization_notes = Some(opt.issues.join(", "));
    Some(updated)
}

/// A chunk for a model-proposed fact, or `None` when it has no text.
pub fn generated_chunk(prd_id: &str, prd_name: &str, spec: &NewFact) -> Option<Chunk> {
    if spec.text.trim().is_empty() {
        return None;
    }
    Some(Chunk {
        id: uuid::Uuid::new_v4().to_string(),
        prd_id: prd_id.to_string(),
        chunk_type: spec
            .chunk_type
            .as_deref()
            .and_then(ChunkType::parse)
            .unwrap_or(ChunkType::Requirement),
        text: spec.text.trim().to_string(),
        context_prefix: context_prefix(prd_name, GENERATED_SECTION),
        priority: spec
            .priority
            .as_deref()
            .map(Priority::parse_lenient)
            .unwrap_or_default(),
        tags: vec![GENERATED_TAG.to_string()],
        section_title: GENERATED_SECTION.to_string(),
        part_index: 0,
        optimized: true,
        optimization_notes: spec.rationale.clone(),
    })
}

/// Run the model over a PRD and apply its recommendations.
pub async fn optimize_prd(
    pipeline: &Pipeline,
    client: &dyn ChatClient,
    prd_id: &str,
    goal: &str,
) -> Result<OptimizationReport> {
    let prd = pipeline.load_prd(prd_id).await?;
    let facts = pipeline.prd_chunks(prd_id).await?;
    if facts.is_empty() {
        return Err(PipelineError::Validation("No facts found for this PRD".into()).into());
    }

    tracing::info!(prd = %prd.name, facts = facts.len(), model = client.model(), "optimizing PRD");
    let (system, user) = build_optimization_prompt(&prd.name, &facts, goal);
    let response = client.complete(&system, &user).await?;
    let analysis = parse_analysis(&response)?;

    let statistics = apply_optimizations(pipeline, &prd.id, &prd.name, &facts, &analysis).await?;
    tracing::info!(?statistics, "optimization applied");

    Ok(OptimizationReport {
        status: "success",
        prd_id: prd.id,
        prd_name: prd.name,
        optimization_goal: goal.to_string(),
        analysis: AnalysisSummary {
            overall_assessment: analysis.overall_assessment.clone(),
            structural_insights: analysis.structural_insights.clone(),
        },
        statistics,
        detailed_analysis: analysis,
    })
}

/// Apply an analysis to the stored facts. Bad indices and unknown edge
/// types are skipped with a warning. A recommendation that fails to apply
/// is recorded in [`OptimizationStats::failures`] and the rest still run.
pub async fn apply_optimizations(
    pipeline: &Pipeline,
    prd_id: &str,
    prd_name: &str,
    facts: &[Chunk],
    analysis: &Analysis,
) -> Result<OptimizationStats> {
    let mut stats = OptimizationStats::default();

    for opt in &analysis.fact_optimizations {
        let Some(fact) = fact_at(facts, opt.original_fact_index) else {
            tracing::warn!(index = ?opt.original_fact_index, "invalid fact index");
            continue;
        };
        match rewrite_fact(fact, opt) {
            None => stats.facts_unchanged += 1,
            Some(updated) => match pipeline.update_chunk(&updated).await {
                Ok(_) => stats.facts_updated += 1,
                Err(e) => {
                    tracing::warn!(chunk = %updated.id, error = %e, "fact update failed");
                    stats.failures.push(format!("update {}: {:#}", updated.id, e));
                }
            },
        }
    }

    for chunk in analysis
        .new_facts
        .iter()
        .filter_map(|spec| generated_chunk(prd_id, prd_name, spec))
    {
        match pipeline.add_chunks(prd_id, std::slice::from_ref(&chunk)).await {
            Ok(()) => stats.facts_created += 1,
            Err(e) => {
                tracing::warn!(chunk = %chunk.id, error = %e, "new fact failed");
                stats.failures.push(format!("create {}: {:#}", chunk.id, e));
            }
        }
    }

    if pipeline.graph().is_enabled() {
        for rec in &analysis.relationship_recommendations {
            let (Some(from), Some(to)) = (
                fact_at(facts, rec.from_fact_index),
                fact_at(facts, rec.to_fact_index),
            ) else {
                tracing::warn!(from = ?rec.from_fact_index, to = ?rec.to_fact_index, "invalid relationship indices");
                continue;
            };
            let rel_type = match rec.relationship_type.as_deref() {
                None => RelationshipType::References,
                Some(s) => match RelationshipType::parse(s) {
                    Some(t) => t,
                    None => {
                        tracing::warn!(rel = s, "unknown relationship type");
                        continue;
                    }
                },
            };
            let rel = Relationship {
                source_id: from.id.clone(),
                target_id: to.id.clone(),
                rel_type,
                strength: LLM_EDGE_STRENGTH,
                origin: ORIGIN_LLM.to_string(),
            };
            match pipeline.graph().create_relationship(&rel).await {
                Ok(true) => stats.relationships_created += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(source = %rel.source_id, target = %rel.target_id, error = %e, "relationship failed");
                    stats.failures.push(format!("relationship {} -> {}: {:#}", rel.source_id, rel.target_id, e));
                }
            }
        }
    }

    Ok(stats)
}

/// CLI entry point: optimise a PRD with the configured LLM and print the outcome.
pub async fn run_optimize(pipeline: &Pipeline, prd_id: &str, goal: &str, json: bool) -> Result<()> {
    // Fail on an unknown PRD before asking for an API key.
    pipeline.load_prd(prd_id).await?;
    let client = OpenRouterClient::from_config(&pipeline.config().llm)?;
    let report = optimize_prd(pipeline, &client, prd_id, goal).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let s = &report.statistics;
    println!("optimize {}", report.prd_name);
    println!("  goal: {}", report.optimization_goal);
    println!("  facts updated: {}", s.facts_updated);
    println!("  facts created: {}", s.facts_created);
    println!("  facts unchanged: {}", s.facts_unchanged);
    println!("  relationships created: {}", s.relationships_created);
    if !s.failures.is_empty() {
        println!("  failed: {}", s.failures.len());
        for failure in &s.failures {
            println!("    {}", failure);
        }
    }
    if !report.analysis.overall_assessment.is_empty() {
        println!();
        println!("{}", report.analysis.overall_assessment);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(text: &str) -> Chunk {
        Chunk {
            id: "c1".into(),
            prd_id: "p1".into(),
            chunk_type: ChunkType::Feature,
            text: text.into(),
            context_prefix: context_prefix("Shop", "Cart"),
            priority: Priority::Medium,
            tags: vec!["features".into()],
            section_title: "Cart".into(),
            part_index: 0,
            optimized: false,
            optimization_notes: None,
        }
    }

    #[test]
    fn test_prompt_lists_facts_with_zero_based_indices() {
        let facts = vec![fact("Add to cart"), fact("Remove from cart")];
        let (system, user) = build_optimization_prompt("Shop", &facts, DEFAULT_GOAL);
        assert!(system.contains("optimized for AI Paired Programming"));
        assert!(user.contains("for \"Shop\""));
        assert!(user.contains("**Fact 0** (Type: FEATURE, Priority: MEDIUM)\nAdd to cart"));
        assert!(user.contains("**Fact 1**"));
        assert!(user.contains("\"relationship_recommendations\""));
    }

    #[test]
    fn test_high_quality_fact_unchanged() {
        let opt = FactOptimization {
            original_fact_index: Some(0),
            quality_score: 8.0,
            optimized_text: Some("ignored".into()),
            ..Default::default()
        };
        assert!(rewrite_fact(&fact("Add to cart"), &opt).is_none());
    }

    #[test]
    fn test_rewrite_applies_text_context_type_priority() {
        let opt = FactOptimization {
            original_fact_index: Some(0),
            quality_score: 4.0,
            issues: vec!["vague".into(), "no limits".into()],
            optimized_text: Some("Users can add up to 50 items to the cart".into()),
            suggested_priority: Some("HIGH".into()),
            suggested_type: Some("REQUIREMENT".into()),
            additional_context: Some("Cart persists for 30 days".into()),
        };
        let updated = rewrite_fact(&fact("Add to cart"), &opt).unwrap();
        assert_eq!(
            updated.text,
            "Users can add up to 50 items to the cart\n\nContext: Cart persists for 30 days"
        );
        assert_eq!(updated.chunk_type, ChunkType::Requirement);
        assert_eq!(updated.priority, Priority::High);
        assert!(updated.optimized);
        assert_eq!(updated.optimization_notes.as_deref(), Some("vague, no limits"));
        assert_eq!(updated.id, "c1");
    }

    #[test]
    fn test_rewrite_keeps_original_on_unknown_suggestions() {
        let opt = FactOptimization {
            quality_score: 2.0,
            suggested_type: Some("WIDGET".into()),
            suggested_priority: Some("urgent".into()),
            ..Default::default()
        };
        let updated = rewrite_fact(&fact("Add to cart"), &opt).unwrap();
        assert_eq!(updated.text, "Add to cart");
        assert_eq!(updated.chunk_type, ChunkType::Feature);
        assert_eq!(updated.priority, Priority::Medium);
    }

    #[test]
    fn test_generated_chunk_shape() {
        let spec = NewFact {
            text: "Checkout must time out after 15 minutes".into(),
            chunk_type: Some("CONSTRAINT".into()),
            priority: Some("Critical".into()),
            rationale: Some("missing timeout".into()),
        };
        let chunk = generated_chunk("p1", "Shop", &spec).unwrap();
        assert_eq!(chunk.section_title, "LLM-Generated");
        assert_eq!(chunk.context_prefix, "PRD: Shop, Section: LLM-Generated");
        assert_eq!(chunk.tags, vec!["llm-generated"]);
        assert_eq!(chunk.chunk_type, ChunkType::Constraint);
        assert_eq!(chunk.priority, Priority::Critical);
        assert!(chunk.optimized);

        assert!(generated_chunk("p1", "Shop", &NewFact::default()).is_none());
    }

    #[test]
    fn test_fact_index_bounds() {
        let facts = vec![fact("a")];
        assert!(fact_at(&facts, Some(0)).is_some());
        assert!(fact_at(&facts, Some(1)).is_none());
        assert!(fact_at(&facts, Some(-1)).is_none());
        assert!(fact_at(&facts, None).is_none());
    }

    #[test]
    fn test_parse_analysis_tolerates_missing_fields_and_fences() {
        let text = "```json\n{\"overall_assessment\": \"fine\", \"fact_optimizations\": [{\"original_fact_index\": 0, \"quality_score\": 9}]}\n```";
        let analysis = parse_analysis(text).unwrap();
        assert_eq!(analysis.overall_assessment, "fine");
        assert_eq!(analysis.fact_optimizations.len(), 1);
        assert!(analysis.new_facts.is_empty());
    }

    #[test]
    fn test_parse_failure_is_validation_error() {
        let err = parse_analysis("no json here").unwrap_err();
        match crate::error::classify(&err) {
            Some(PipelineError::Validation(msg)) => {
                assert!(msg.starts_with("Failed to parse LLM response"))
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
