//! Planner: keyword-driven task-type detection and template-based
//! decomposition into an [`ExecutionGraph`].
//!
//! Grounded on the original `planning_engine.py`. The original logs this
//! step under the `risk_scored` op by mistake; this crate emits
//! `plan_generated`, which already exists in the audit vocabulary for
//! exactly this purpose.

use std::collections::HashMap;

use crate::audit::{AuditEntry, AuditLog, Op, Outcome};
use crate::domain::{ExecutionGraph, ExecutionStep};
use crate::error::OrchestratorError;
use crate::learning::LearningStore;

const COMPONENT_SRC: &str = "planner";
const DEFAULT_STEP_DURATION_MINUTES: f64 = 1.0;
const MIN_SAMPLES_FOR_DURATION_ESTIMATE: u64 = 5;

struct StepTemplate {
    step_id: &'static str,
    name: &'static str,
}

fn task_templates() -> HashMap<&'static str, Vec<StepTemplate>> {
    let mut templates = HashMap::new();
    templates.insert(
        "document",
        vec![
            StepTemplate { step_id: "read_source", name: "Read and parse source document" },
            StepTemplate { step_id: "analyze_content", name: "Analyze document content and structure" },
            StepTemplate { step_id: "generate_output", name: "Generate processed output" },
            StepTemplate { step_id: "validate_output", name: "Validate output quality and completeness" },
            StepTemplate { step_id: "save_result", name: "Save result to vault" },
        ],
    );
    templates.insert(
        "email",
        vec![
            StepTemplate { step_id: "parse_email", name: "Parse email content and metadata" },
            StepTemplate { step_id: "extract_action", name: "Extract actionable items from email" },
            StepTemplate { step_id: "draft_response", name: "Draft response or action plan" },
            StepTemplate { step_id: "review_draft", name: "Review draft for accuracy" },
        ],
    );
    templates.insert(
        "data",
        vec![
            StepTemplate { step_id: "load_data", name: "Load raw data files" },
            StepTemplate { step_id: "clean_data", name: "Clean and normalize data" },
            StepTemplate { step_id: "process_data", name: "Process and transform data" },
            StepTemplate { step_id: "validate_data", name: "Validate processed data integrity" },
            StepTemplate { step_id: "export_data", name: "Export results to target format" },
        ],
    );
    templates.insert(
        "code",
        vec![
            StepTemplate { step_id: "read_requirements", name: "Read and understand requirements" },
            StepTemplate { step_id: "plan_implementation", name: "Plan implementation approach" },
            StepTemplate { step_id: "implement_code", name: "Implement the code changes" },
            StepTemplate { step_id: "test_code", name: "Test the implementation" },
            StepTemplate { step_id: "review_code", name: "Review code quality" },
        ],
    );
    templates.insert(
        "report",
        vec![
            StepTemplate { step_id: "gather_data", name: "Gather data from sources" },
            StepTemplate { step_id: "analyze_data", name: "Analyze gathered data" },
            StepTemplate { step_id: "generate_report", name: "Generate report content" },
            StepTemplate { step_id: "format_report", name: "Format and polish report" },
            StepTemplate { step_id: "review_report", name: "Review report for accuracy" },
        ],
    );
    templates.insert(
        "general",
        vec![
            StepTemplate { step_id: "understand_task", name: "Understand task requirements" },
            StepTemplate { step_id: "plan_approach", name: "Plan execution approach" },
            StepTemplate { step_id: "execute_task", name: "Execute the main task" },
            StepTemplate { step_id: "verify_result", name: "Verify task completion" },
        ],
    );
    templates
}

fn type_keywords() -> HashMap<&'static str, &'static [&'static str]> {
    let mut keywords: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
    keywords.insert("document", &["document", "file", "pdf", "text", "read", "write", "edit", "format"]);
    keywords.insert("email", &["email", "mail", "message", "reply", "forward", "inbox", "send"]);
    keywords.insert("data", &["data", "csv", "json", "database", "table", "spreadsheet", "excel", "import", "export"]);
    keywords.insert("code", &["code", "program", "script", "function", "bug", "fix", "implement", "develop"]);
    keywords.insert("report", &["report", "summary", "quarterly", "analysis", "dashboard", "metric", "chart"]);
    keywords
}

/// Heuristic task decomposer: detects a task type by keyword score and
/// expands the matching step template into a validated execution graph.
pub struct Planner {
    templates: HashMap<&'static str, Vec<StepTemplate>>,
    keywords: HashMap<&'static str, &'static [&'static str]>,
}

impl Planner {
    pub fn new() -> Self {
        Self {
            templates: task_templates(),
            keywords: type_keywords(),
        }
    }

    /// Detect a task type from content by highest keyword-match count,
    /// falling back to `"general"` when nothing matches.
    pub fn detect_task_type(&self, content: &str) -> &'static str {
        let content_lower = content.to_lowercase();
        let mut best: Option<(&'static str, usize)> = None;

        // Iterate templates in a fixed order so ties resolve deterministically.
        for task_type in ["document", "email", "data", "code", "report"] {
            let Some(kws) = self.keywords.get(task_type) else { continue };
            let score = kws.iter().filter(|kw| content_lower.contains(**kw)).count();
            if score > 0 {
                match best {
                    Some((_, best_score)) if best_score >= score => {}
                    _ => best = Some((task_type, score)),
                }
            }
        }

        best.map(|(t, _)| t).unwrap_or("general")
    }

    /// Decompose `content` into a validated [`ExecutionGraph`] and emit
    /// `plan_generated`. Returns `EmptyContent` for blank input.
    pub fn decompose(
        &self,
        content: &str,
        task_type_override: Option<&str>,
        task_id: &str,
        learning: &LearningStore,
        audit: &AuditLog,
    ) -> Result<ExecutionGraph, OrchestratorError> {
        if content.trim().is_empty() {
            return Err(OrchestratorError::EmptyContent);
        }

        let task_type = task_type_override.unwrap_or_else(|| self.detect_task_type(content));
        let template = self.templates.get(task_type).unwrap_or_else(|| &self.templates["general"]);

        let step_duration = self.estimate_step_duration(task_type, template.len(), learning);

        let steps: Vec<ExecutionStep> = template
            .iter()
            .enumerate()
            .map(|(i, t)| ExecutionStep::new(t.step_id, t.name, (i + 1) as u32).with_estimated_duration(step_duration))
            .collect();

        let mut edges: HashMap<String, Vec<String>> = HashMap::new();
        for pair in steps.windows(2) {
            edges.insert(pair[0].step_id.clone(), vec![pair[1].step_id.clone()]);
        }

        let parallelizable_groups = self.find_parallelizable(&steps, &edges);

        let mut graph = ExecutionGraph::new(task_id, steps, edges);
        graph.parallelizable_groups = parallelizable_groups;
        graph.validate()?;

        let detail = format!(
            "task_type={task_type} steps={} edges={} parallel_groups={}",
            graph.steps.len(),
            graph.edges.values().map(|v| v.len()).sum::<usize>(),
            graph.parallelizable_groups.len()
        );
        audit.append(&AuditEntry::new(Op::PlanGenerated, task_id, COMPONENT_SRC, Outcome::Success).with_detail(detail));

        Ok(graph)
    }

    fn estimate_step_duration(&self, task_type: &str, step_count: usize, learning: &LearningStore) -> f64 {
        if step_count == 0 {
            return DEFAULT_STEP_DURATION_MINUTES;
        }
        match learning.query(task_type) {
            Some(metrics) if metrics.total_count >= MIN_SAMPLES_FOR_DURATION_ESTIMATE => (metrics.mean_duration_ms / 60_000.0) / step_count as f64,
            _ => DEFAULT_STEP_DURATION_MINUTES,
        }
    }

    /// Steps with no dependents among each other form a single parallel
    /// group, when there's more than one such root.
    fn find_parallelizable(&self, steps: &[ExecutionStep], edges: &HashMap<String, Vec<String>>) -> Vec<Vec<String>> {
        let mut dependents = std::collections::HashSet::new();
        for dsts in edges.values() {
            dependents.extend(dsts.iter().cloned());
        }
        let roots: Vec<String> = steps.iter().map(|s| s.step_id.clone()).filter(|id| !dependents.contains(id)).collect();
        if roots.len() > 1 {
            vec![roots]
        } else {
            Vec::new()
        }
    }
}

impl Default for Planner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fixtures() -> (Planner, LearningStore, AuditLog) {
        let dir = tempdir().unwrap();
        let learning = LearningStore::open(dir.path().join("learning"), 30).unwrap();
        let audit = AuditLog::open(dir.path().join("audit.jsonl")).unwrap();
        (Planner::new(), learning, audit)
    }

    #[test]
    fn detects_task_type_from_keywords() {
        let planner = Planner::new();
        assert_eq!(planner.detect_task_type("Please fix the bug in this script"), "code");
        assert_eq!(planner.detect_task_type("Send a quarterly summary report"), "report");
        assert_eq!(planner.detect_task_type("no signal here"), "general");
    }

    #[test]
    fn decompose_empty_content_is_rejected() {
        let (planner, learning, audit) = fixtures();
        let result = planner.decompose("   ", None, "t1", &learning, &audit);
        assert_eq!(result.unwrap_err(), OrchestratorError::EmptyContent);
    }

    #[test]
    fn decompose_document_yields_five_sequential_steps() {
        let (planner, learning, audit) = fixtures();
        let graph = planner.decompose("Read and edit this document", None, "t1", &learning, &audit).unwrap();
        assert_eq!(graph.steps.len(), 5);
        let order = graph.execution_order().unwrap();
        assert_eq!(order.first().unwrap().step_id, "read_source");
        assert_eq!(order.last().unwrap().step_id, "save_result");
    }

    #[test]
    fn explicit_override_bypasses_detection() {
        let (planner, learning, audit) = fixtures();
        let graph = planner.decompose("irrelevant content about nothing", Some("email"), "t1", &learning, &audit).unwrap();
        assert_eq!(graph.steps.len(), 4);
        assert_eq!(graph.steps[0].step_id, "parse_email");
    }

    #[test]
    fn decompose_emits_plan_generated() {
        let (planner, learning, audit) = fixtures();
        planner.decompose("write a document", None, "t1", &learning, &audit).unwrap();
        let entries = audit.filter(Some(Op::PlanGenerated), None);
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn single_chain_has_no_parallel_groups() {
        let (planner, learning, audit) = fixtures();
        let graph = planner.decompose("process this data file", None, "t1", &learning, &audit).unwrap();
        assert!(graph.parallelizable_groups.is_empty());
    }
}
