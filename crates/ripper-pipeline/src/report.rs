use chrono::{DateTime, Utc};
use std::fmt::Write;

use ripper_core::{AggregatedView, AnalysisRequest, SynthesisArtifact};

use crate::aggregator::top_pattern;
use crate::prompts::format_count;

/// Markdown report stored next to the skeletons and synthesis.
pub fn generate_report(
    request: &AnalysisRequest,
    view: &AggregatedView,
    synthesis: &SynthesisArtifact,
    coverage: f64,
    failed_ids: &[String],
    generated_at: DateTime<Utc>,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Content Skeleton Analysis Report\n");
    let _ = writeln!(out, "*Generated: {}*\n", generated_at.format("%Y-%m-%d %H:%M UTC"));

    let creators = request
        .sources
        .iter()
        .map(|s| format!("{} ({})", s.handle(), s.platform))
        .collect::<Vec<_>>()
        .join(", ");
    let _ = writeln!(out, "## Analysis Configuration");
    let _ = writeln!(out, "- **Creators analyzed:** {}", creators);
    let _ = writeln!(out, "- **Videos per creator:** {}", request.items_per_source);
    let _ = writeln!(out, "- **LLM:** {}\n", synthesis.model_used);

    let _ = writeln!(out, "## Summary");
    let _ = writeln!(out, "- **Total videos analyzed:** {}", view.total_records);
    let _ = writeln!(out, "- **Total views:** {}", format_count(view.total_views));
    let _ = writeln!(out, "- **Average hook length:** {:.1} words", view.avg_hook_word_count);
    let _ = writeln!(out, "- **Average video length:** {:.0} seconds", view.avg_duration_seconds);
    if let Some(hook) = top_pattern(&view.hook_techniques) {
        let _ = writeln!(out, "- **Most common hook:** {}", hook);
    }
    let _ = writeln!(out, "- **Coverage:** {:.0}%", coverage * 100.0);
    if !failed_ids.is_empty() {
        let _ = writeln!(out, "- **Failed items:** {}", failed_ids.join(", "));
    }

    let _ = writeln!(out, "\n---\n");
    let _ = writeln!(out, "{}\n", synthesis.analysis);
    let _ = writeln!(out, "---\n");
    let _ = writeln!(out, "## Raw Skeletons Data\n");
    let _ = writeln!(out, "See `skeletons.json` for the full extracted skeleton data.");
    out
}
