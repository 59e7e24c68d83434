//! Prompt templates for extraction and synthesis.

use ripper_core::{AggregatedView, CtaType, HookTechnique, SourceItem, ValueStructure};

use crate::{PipelineError, Result};

const EXTRACTION_TEMPLATE: &str = r#"Extract the content skeleton from each of the short-form video transcripts below.

Return a JSON array with exactly one object per video, shaped like this:

{
  "video_id": "the id given in the VIDEO header",
  "hook": "the first 1-2 sentences that grab attention, verbatim or a close paraphrase",
  "hook_technique": "{hook_techniques}",
  "hook_word_count": 0,
  "value": "the main teaching, insight or value delivered, in 2-4 sentences",
  "value_structure": "{value_structures}",
  "value_points": ["point 1", "point 2"],
  "cta": "the call to action or closing line, verbatim",
  "cta_type": "{cta_types}",
  "total_word_count": 0,
  "estimated_duration_seconds": 0
}

Return ONLY the JSON array. No markdown, no commentary.

---

TRANSCRIPTS TO ANALYZE:

{transcripts}
"#;

/// System prompt for the synthesis call.
pub const SYNTHESIS_SYSTEM_PROMPT: &str = r#"You are a content strategist who specialises in viral short-form video. You turn structural data about what already works into concrete, reusable guidance for creators.

## Principles

1. **Stop the scroll first.** A hook that cannot be shown on screen is weak.
2. **Contrast drives curiosity.** The wider the gap between the common belief and the surprising truth, the stronger the hook.
3. **Precision beats breadth.** Speak to a specific viewer with a specific problem.
4. **Evidence over opinion.** Every claim should be something the creator can show.
5. **Authenticity compounds.** Real results and real language outperform polish.

## What to analyse

### Hook patterns
Which techniques dominate (curiosity, contrast, result, question, story, shock), how long hooks run, and which phrasings repeat.

### Value delivery
How information is structured (steps, single insight, framework, story, listicle, transformation), how many points are covered, and how depth is balanced against brevity.

### Calls to action
Which CTA types appear, how they connect to the content, and what turns viewers into participants.

### Across creators
Which patterns are shared, what sets the best performers apart, and what is unique to one creator.

## Hook structure

Context lean-in, then interjection, then snapback:
"If you're building automations..." / "...you're probably making the mistake I made for six months" / "Here's the one pattern that fixes it"

## Output

Respond in markdown with these sections:

# Pattern Analysis
What you found across the skeletons, with specific examples.

# Templates
Exactly three templates, each introduced by a `## Template N: Name` heading and described with `**Hook:**`, `**Value:**` and `**CTA:**` lines.

# Quick Wins
Bullet list of immediate improvements.

# Warnings
Bullet list of mistakes to avoid.

Be specific, quote the skeletons, and quantify where you can."#;

fn labels<T: std::fmt::Display>(all: &[T]) -> String {
    all.iter()
        .map(|l| l.to_string())
        .collect::<Vec<_>>()
        .join("|")
}

/// Format an integer with thousands separators.
pub fn format_count(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// One `### VIDEO:` section per item.
pub fn format_batch(items: &[SourceItem]) -> String {
    items
        .iter()
        .map(|item| {
            let views = if item.views > 0 {
                format_count(item.views)
            } else {
                "N/A".to_string()
            };
            format!(
                "### VIDEO: {} ({} views)\n{}",
                item.id,
                views,
                item.transcript.as_deref().unwrap_or_default()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn extraction_prompt(items: &[SourceItem]) -> String {
    EXTRACTION_TEMPLATE
        .replace("{hook_techniques}", &labels(&HookTechnique::ALL))
        .replace("{value_structures}", &labels(&ValueStructure::ALL))
        .replace("{cta_types}", &labels(&CtaType::ALL))
        .replace("{transcripts}", &format_batch(items))
}

/// `- **@name** (platform): N videos, M avg views` per creator.
pub fn creator_summary(view: &AggregatedView) -> String {
    view.creators
        .iter()
        .map(|c| {
            format!(
                "- **@{}** ({}): {} videos, {} avg views",
                c.creator,
                c.platform,
                c.video_count,
                format_count(c.avg_views.round() as u64)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn synthesis_user_prompt(view: &AggregatedView) -> Result<String> {
    let skeletons = serde_json::to_string_pretty(&view.digests)
        .map_err(|e| PipelineError::Prompt(e.to_string()))?;

    Ok(format!(
        "Analyze these {count} content skeletons from {creators} top-performing creators.\n\n\
         ## Creators Analyzed\n{summary}\n\n\
         ## All Extracted Skeletons\n{skeletons}\n\n\
         ---\n\n\
         Follow the framework in your instructions. Be specific and actionable, and include \
         three templates I can use for my own content immediately.",
        count = view.total_records,
        creators = view.creator_count(),
        summary = creator_summary(view),
        skeletons = skeletons,
    ))
}
