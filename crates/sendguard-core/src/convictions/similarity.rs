//! Context similarity and recall synthesis.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use super::model::{RecallSynthesis, ScoredConviction, Verdict};
use crate::context::MicroContext;

const W_DAY: f64 = 0.10;
const W_HOUR: f64 = 0.10;
const W_BOUNCE: f64 = 0.20;
const W_DEFERRAL: f64 = 0.15;
const W_COMPLAINT: f64 = 0.15;
const W_DSN: f64 = 0.15;
const W_IP: f64 = 0.05;
const W_DOMAIN: f64 = 0.05;
const W_HOLIDAY: f64 = 0.05;

// Rate differences at or beyond these scales count as unrelated.
const BOUNCE_SCALE: f64 = 0.05;
const DEFERRAL_SCALE: f64 = 0.25;
const COMPLAINT_SCALE: f64 = 0.005;

const EPSILON: f64 = 1e-12;

/// Scores how alike two situations are, 0..=1.
#[must_use]
pub fn similarity(a: &MicroContext, b: &MicroContext) -> f64 {
    let mut score = 0.0;

    if a.day_of_week == b.day_of_week {
        score += W_DAY;
    }
    if a.hour_bucket() == b.hour_bucket() {
        score += W_HOUR;
    }
    score += W_BOUNCE * closeness(a.bounce_rate, b.bounce_rate, BOUNCE_SCALE);
    score += W_DEFERRAL * closeness(a.deferral_rate, b.deferral_rate, DEFERRAL_SCALE);
    score += W_COMPLAINT * closeness(a.complaint_rate, b.complaint_rate, COMPLAINT_SCALE);
    score += W_DSN * jaccard(&a.dsn_codes, &b.dsn_codes);
    if a.ip == b.ip {
        score += W_IP;
    }
    if a.domain == b.domain {
        score += W_DOMAIN;
    }
    if a.is_holiday == b.is_holiday {
        score += W_HOLIDAY;
    }

    score.clamp(0.0, 1.0)
}

fn closeness(a: f64, b: f64, scale: f64) -> f64 {
    1.0 - ((a - b).abs() / scale).min(1.0)
}

/// Overlap of two code sets; two empty sets are identical.
fn jaccard(a: &[String], b: &[String]) -> f64 {
    let a: HashSet<&str> = a.iter().map(String::as_str).collect();
    let b: HashSet<&str> = b.iter().map(String::as_str).collect();
    let union = a.union(&b).count();
    if union == 0 {
        return 1.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let overlap = a.intersection(&b).count() as f64 / union as f64;
    overlap
}

/// Weight of a precedent of `age` given the recall half-life.
fn recency_weight(timestamp: DateTime<Utc>, now: DateTime<Utc>, half_life_days: f64) -> f64 {
    if half_life_days <= 0.0 {
        return 1.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let age_days = (now - timestamp).num_seconds().max(0) as f64 / 86_400.0;
    0.5_f64.powf(age_days / half_life_days)
}

/// Summarises recalled precedent into a leaning and confidence.
///
/// Each match weighs its similarity times a recency factor that halves every
/// `half_life_days` (no decay when zero). The heavier verdict dominates; on
/// equal weight the more frequent verdict does, and an even split has no
/// dominant verdict.
#[must_use]
pub fn synthesize(
    matches: &[ScoredConviction],
    query: &MicroContext,
    now: DateTime<Utc>,
    half_life_days: f64,
) -> RecallSynthesis {
    if matches.is_empty() {
        return RecallSynthesis::neutral();
    }

    let (mut will_weight, mut wont_weight) = (0.0, 0.0);
    let (mut will_count, mut wont_count) = (0usize, 0usize);
    for m in matches {
        let weight = m.score * recency_weight(m.conviction.timestamp, now, half_life_days);
        match m.conviction.verdict {
            Verdict::Will => {
                will_weight += weight;
                will_count += 1;
            }
            Verdict::Wont => {
                wont_weight += weight;
                wont_count += 1;
            }
        }
    }

    let dominant_verdict = if (will_weight - wont_weight).abs() > EPSILON {
        Some(if will_weight > wont_weight {
            Verdict::Will
        } else {
            Verdict::Wont
        })
    } else if will_count != wont_count {
        Some(if will_count > wont_count {
            Verdict::Will
        } else {
            Verdict::Wont
        })
    } else {
        None
    };

    let total_weight = will_weight + wont_weight;
    #[allow(clippy::cast_precision_loss)]
    let confidence = match dominant_verdict {
        None => 0.5,
        Some(verdict) if total_weight > EPSILON => {
            let dominant = if verdict == Verdict::Will {
                will_weight
            } else {
                wont_weight
            };
            dominant / total_weight
        }
        Some(verdict) => {
            let dominant = if verdict == Verdict::Will {
                will_count
            } else {
                wont_count
            };
            dominant as f64 / matches.len() as f64
        }
    };

    RecallSynthesis {
        key_observations: observations(matches, query, will_count, wont_count, now),
        dominant_verdict,
        confidence,
        matches: matches.len(),
    }
}

fn observations(
    matches: &[ScoredConviction],
    query: &MicroContext,
    will_count: usize,
    wont_count: usize,
    now: DateTime<Utc>,
) -> Vec<String> {
    let mut notes = vec![format!(
        "{} similar situations: acted in {will_count}, held back in {wont_count}",
        matches.len()
    )];

    if let Some(best) = matches.iter().max_by(|a, b| a.score.total_cmp(&b.score)) {
        let age_hours = (now - best.conviction.timestamp).num_hours().max(0);
        notes.push(format!(
            "Closest precedent ({:.0}% similar, {age_hours}h ago) was {}",
            best.score * 100.0,
            best.conviction.verdict
        ));
    }

    let shared: Vec<&str> = query
        .dsn_codes
        .iter()
        .filter(|code| {
            matches
                .iter()
                .any(|m| m.conviction.context.dsn_codes.contains(code))
        })
        .map(String::as_str)
        .collect();
    if !shared.is_empty() {
        notes.push(format!("Recurring status codes: {}", shared.join(", ")));
    }

    if let Some(name) = &query.holiday_name {
        let same = matches
            .iter()
            .filter(|m| m.conviction.context.holiday_name.as_ref() == Some(name))
            .count();
        if same > 0 {
            notes.push(format!("{same} precedents also on {name}"));
        }
    }

    notes
}
