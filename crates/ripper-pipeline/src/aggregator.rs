//! Pure statistics over extraction records. No I/O.

use chrono::Utc;
use std::collections::HashSet;
use std::fmt::Write;
use tracing::info;

use ripper_core::{
    AggregatedView, CreatorStats, ExtractionRecord, FrequencyTable, Platform, SkeletonDigest,
};

use crate::prompts::format_count;
use crate::{PipelineError, Result};

/// Mean of the positive values, or 0 when there are none.
fn safe_mean(values: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, n) = values
        .into_iter()
        .filter(|v| *v > 0.0)
        .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

fn count_labels<'a>(labels: impl IntoIterator<Item = &'a str>) -> FrequencyTable {
    let mut table = FrequencyTable::new();
    for label in labels {
        *table.entry(label.to_string()).or_insert(0) += 1;
    }
    table
}

fn creator_stats(platform: Platform, creator: &str, records: &[&ExtractionRecord]) -> CreatorStats {
    let count = records.len();
    let total_views: u64 = records.iter().map(|r| r.views).sum();
    let total_likes: u64 = records.iter().map(|r| r.likes).sum();
    let per_video = |total: u64| {
        if count == 0 {
            0.0
        } else {
            total as f64 / count as f64
        }
    };

    CreatorStats {
        creator: creator.to_string(),
        platform,
        video_count: count,
        total_views,
        total_likes,
        avg_views: per_video(total_views),
        avg_likes: per_video(total_likes),
        avg_hook_word_count: safe_mean(records.iter().map(|r| r.skeleton.hook_word_count as f64)),
        avg_total_word_count: safe_mean(records.iter().map(|r| r.skeleton.total_word_count as f64)),
        avg_duration_seconds: safe_mean(records.iter().map(|r| r.skeleton.estimated_duration_seconds)),
        hook_techniques: count_labels(records.iter().map(|r| r.skeleton.hook_technique.as_str())),
        value_structures: count_labels(records.iter().map(|r| r.skeleton.value_structure.as_str())),
        cta_types: count_labels(records.iter().map(|r| r.skeleton.cta_type.as_str())),
    }
}

/// Group records by creator and compute frequency tables and averages.
///
/// Fails fast on malformed input: the same item twice, or a non-finite
/// duration. Both indicate a bug upstream, not a runtime condition.
pub fn aggregate(records: &[ExtractionRecord]) -> Result<AggregatedView> {
    let mut seen = HashSet::new();
    for record in records {
        if !seen.insert((record.platform, record.creator.to_lowercase(), record.item_id.as_str())) {
            return Err(PipelineError::MalformedInput(format!(
                "duplicate record for item {} of @{}",
                record.item_id, record.creator
            )));
        }
        if !record.skeleton.estimated_duration_seconds.is_finite() {
            return Err(PipelineError::MalformedInput(format!(
                "non-finite duration for item {}",
                record.item_id
            )));
        }
    }

    // Creators in order of first appearance.
    let mut groups: Vec<(Platform, String, Vec<&ExtractionRecord>)> = Vec::new();
    for record in records {
        let key = record.creator.to_lowercase();
        match groups
            .iter_mut()
            .find(|(platform, creator, _)| *platform == record.platform && *creator == key)
        {
            Some((_, _, group)) => group.push(record),
            None => groups.push((record.platform, key, vec![record])),
        }
    }

    let creators: Vec<CreatorStats> = groups
        .iter()
        .map(|(platform, _, group)| creator_stats(*platform, &group[0].creator, group))
        .collect();

    let view = AggregatedView {
        total_records: records.len(),
        total_views: records.iter().map(|r| r.views).sum(),
        total_likes: records.iter().map(|r| r.likes).sum(),
        avg_hook_word_count: safe_mean(records.iter().map(|r| r.skeleton.hook_word_count as f64)),
        avg_total_word_count: safe_mean(records.iter().map(|r| r.skeleton.total_word_count as f64)),
        avg_duration_seconds: safe_mean(records.iter().map(|r| r.skeleton.estimated_duration_seconds)),
        hook_techniques: count_labels(records.iter().map(|r| r.skeleton.hook_technique.as_str())),
        value_structures: count_labels(records.iter().map(|r| r.skeleton.value_structure.as_str())),
        cta_types: count_labels(records.iter().map(|r| r.skeleton.cta_type.as_str())),
        creators,
        digests: records.iter().map(SkeletonDigest::from).collect(),
        aggregated_at: Some(Utc::now()),
    };

    info!(
        records = view.total_records,
        creators = view.creator_count(),
        "Aggregated extraction records"
    );
    Ok(view)
}

/// Most frequent label. Ties go to the alphabetically first label.
pub fn top_pattern(table: &FrequencyTable) -> Option<&str> {
    table
        .iter()
        .fold(None, |best: Option<(&String, usize)>, (label, count)| match best {
            Some((_, best_count)) if best_count >= *count => best,
            _ => Some((label, *count)),
        })
        .map(|(label, _)| label.as_str())
}

/// One row of a label distribution.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternShare {
    pub label: String,
    pub count: usize,
    pub percent: f64,
}

/// Labels with counts and percentages, most frequent first.
pub fn distribution(table: &FrequencyTable) -> Vec<PatternShare> {
    let total: usize = table.values().sum();
    if total == 0 {
        return Vec::new();
    }
    let mut rows: Vec<PatternShare> = table
        .iter()
        .map(|(label, count)| PatternShare {
            label: label.clone(),
            count: *count,
            percent: *count as f64 / total as f64 * 100.0,
        })
        .collect();
    // Stable sort keeps alphabetical order among equal counts.
    rows.sort_by(|a, b| b.count.cmp(&a.count));
    rows
}

/// Human-readable markdown summary of a view.
pub fn summary(view: &AggregatedView) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Aggregation Summary\n");
    let _ = writeln!(out, "**Total Videos:** {}", view.total_records);
    let _ = writeln!(out, "**Total Views:** {}", format_count(view.total_views));
    let _ = writeln!(out, "**Creators:** {}\n", view.creator_count());
    let _ = writeln!(out, "## Averages");
    let _ = writeln!(out, "- Hook word count: {:.1}", view.avg_hook_word_count);
    let _ = writeln!(out, "- Total word count: {:.1}", view.avg_total_word_count);
    let _ = writeln!(out, "- Duration: {:.1}s", view.avg_duration_seconds);

    for (title, table) in [
        ("Hook Techniques", &view.hook_techniques),
        ("Value Structures", &view.value_structures),
        ("CTA Types", &view.cta_types),
    ] {
        let _ = writeln!(out, "\n## {}", title);
        for row in distribution(table) {
            let _ = writeln!(out, "- {}: {} ({:.0}%)", row.label, row.count, row.percent);
        }
    }
    out
}
