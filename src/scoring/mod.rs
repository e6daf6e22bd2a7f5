//! Scoring engine: decay, effective score, maturity, staleness.
//!
//! Everything here is pure: deterministic given a bullet, the scoring config,
//! and an explicit `now`. No hidden clocks.

use crate::config::ScoringConfig;
use crate::models::{FeedbackEvent, FeedbackType, Maturity, Playbook, PlaybookBullet};
use chrono::{DateTime, Utc};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Decayed helpful/harmful totals for one bullet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayedCounts {
    /// Sum of decayed helpful event values.
    pub helpful: f64,
    /// Sum of decayed harmful event values.
    pub harmful: f64,
}

impl DecayedCounts {
    /// Fraction of decayed feedback that is harmful; 0 with no feedback.
    #[must_use]
    pub fn harmful_ratio(&self) -> f64 {
        let total = self.helpful + self.harmful;
        if total <= f64::EPSILON {
            0.0
        } else {
            self.harmful / total
        }
    }
}

/// Value of a single feedback event at `now`: `2^(−Δdays / H)`, clamped to [0, 1].
#[must_use]
pub fn calculate_decayed_value(
    event: &FeedbackEvent,
    now: DateTime<Utc>,
    half_life_days: f64,
) -> f64 {
    if half_life_days <= 0.0 {
        return 1.0;
    }
    let age_days =
        now.signed_duration_since(event.timestamp).num_seconds() as f64 / SECONDS_PER_DAY;
    (2.0_f64).powf(-age_days / half_life_days).clamp(0.0, 1.0)
}

/// Sums decayed helpful and harmful values over a bullet's feedback history.
///
/// The bullet's own half-life wins; a non-positive value falls back to the
/// config default.
#[must_use]
pub fn get_decayed_counts(
    bullet: &PlaybookBullet,
    config: &ScoringConfig,
    now: DateTime<Utc>,
) -> DecayedCounts {
    let half_life = if bullet.confidence_decay_half_life_days > 0.0 {
        bullet.confidence_decay_half_life_days
    } else {
        config.decay_half_life_days
    };

    let mut counts = DecayedCounts {
        helpful: 0.0,
        harmful: 0.0,
    };
    for event in &bullet.feedback_events {
        let value = calculate_decayed_value(event, now, half_life);
        match event.feedback_type {
            FeedbackType::Helpful => counts.helpful += value,
            FeedbackType::Harmful => counts.harmful += value,
        }
    }
    counts
}

/// Weight applied to a bullet's score by maturity tier.
#[must_use]
pub fn maturity_factor(maturity: Maturity) -> f64 {
    match maturity {
        Maturity::Proven => 1.5,
        Maturity::Established => 1.2,
        Maturity::Candidate => 1.0,
        Maturity::Deprecated => 0.0,
    }
}

/// Effective score: `(helpful − multiplier × harmful) × maturity_factor`.
#[must_use]
pub fn effective_score(
    bullet: &PlaybookBullet,
    config: &ScoringConfig,
    now: DateTime<Utc>,
) -> f64 {
    let counts = get_decayed_counts(bullet, config, now);
    (counts.helpful - config.harmful_multiplier * counts.harmful)
        * maturity_factor(bullet.maturity)
}

/// Computes the maturity tier a bullet's feedback history supports.
///
/// This is the from-scratch tier; [`next_maturity`] applies the monotonicity
/// rule against the bullet's current tier.
#[must_use]
pub fn calculate_maturity_state(
    bullet: &PlaybookBullet,
    config: &ScoringConfig,
    now: DateTime<Utc>,
) -> Maturity {
    let counts = get_decayed_counts(bullet, config, now);
    let ratio = counts.harmful_ratio();

    if ratio >= 0.5 && counts.harmful >= 2.0 {
        return Maturity::Deprecated;
    }
    if counts.helpful >= config.maturity_proven_threshold
        && ratio <= config.max_harmful_ratio_for_proven
    {
        return Maturity::Proven;
    }
    if counts.helpful >= config.maturity_promotion_threshold && ratio <= 0.2 {
        return Maturity::Established;
    }
    Maturity::Candidate
}

/// Applies the maturity transition rules to a bullet's current tier.
///
/// Transitions are monotonic except deprecation, and a deprecated bullet is
/// never silently revived.
#[must_use]
pub fn next_maturity(
    bullet: &PlaybookBullet,
    config: &ScoringConfig,
    now: DateTime<Utc>,
) -> Maturity {
    if bullet.maturity == Maturity::Deprecated {
        return Maturity::Deprecated;
    }
    let computed = calculate_maturity_state(bullet, config, now);
    if computed == Maturity::Deprecated {
        return Maturity::Deprecated;
    }
    computed.max(bullet.maturity)
}

/// Promotion the bullet has earned, if any.
#[must_use]
pub fn check_for_promotion(
    bullet: &PlaybookBullet,
    config: &ScoringConfig,
    now: DateTime<Utc>,
) -> Option<Maturity> {
    let counts = get_decayed_counts(bullet, config, now);
    let ratio = counts.harmful_ratio();

    match bullet.maturity {
        Maturity::Candidate
            if counts.helpful >= config.maturity_promotion_threshold && ratio <= 0.2 =>
        {
            Some(Maturity::Established)
        },
        Maturity::Established
            if counts.helpful >= config.maturity_proven_threshold
                && ratio <= config.max_harmful_ratio_for_proven =>
        {
            Some(Maturity::Proven)
        },
        _ => None,
    }
}

/// What a demotion check recommends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemotionAction {
    /// Nothing to do.
    None,
    /// Step the bullet down one tier.
    Demote(Maturity),
    /// Harm has crossed the prune threshold; deprecate and invert.
    AutoDeprecate,
}

/// Demotion the bullet has earned, if any.
///
/// A negative effective score steps proven down to established and
/// established down to candidate; decayed harm at or past the prune
/// threshold reports `AutoDeprecate` instead.
#[must_use]
pub fn check_for_demotion(
    bullet: &PlaybookBullet,
    config: &ScoringConfig,
    now: DateTime<Utc>,
) -> DemotionAction {
    let counts = get_decayed_counts(bullet, config, now);
    if counts.harmful >= config.prune_harmful_threshold {
        return DemotionAction::AutoDeprecate;
    }

    if effective_score(bullet, config, now) < 0.0 {
        return match bullet.maturity {
            Maturity::Proven => DemotionAction::Demote(Maturity::Established),
            Maturity::Established => DemotionAction::Demote(Maturity::Candidate),
            _ => DemotionAction::None,
        };
    }

    DemotionAction::None
}

/// Whether a bullet has gone stale.
///
/// True when the bullet has never received feedback and is older than
/// `max_age_days`, or when its latest feedback is older than `max_age_days`.
#[must_use]
pub fn is_stale(bullet: &PlaybookBullet, max_age_days: f64, now: DateTime<Utc>) -> bool {
    let age_of = |t: DateTime<Utc>| {
        now.signed_duration_since(t).num_seconds() as f64 / SECONDS_PER_DAY
    };

    match bullet.last_feedback_at() {
        None => age_of(bullet.created_at) > max_age_days,
        Some(last) => age_of(last) > max_age_days,
    }
}

/// Score bucket for statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreBucket {
    /// Score ≥ 5.
    Excellent,
    /// 2 ≤ score < 5.
    Good,
    /// |score| < 2.
    Neutral,
    /// Score ≤ −2.
    AtRisk,
}

/// Buckets a score.
#[must_use]
pub fn score_bucket(score: f64) -> ScoreBucket {
    if score >= 5.0 {
        ScoreBucket::Excellent
    } else if score >= 2.0 {
        ScoreBucket::Good
    } else if score > -2.0 {
        ScoreBucket::Neutral
    } else {
        ScoreBucket::AtRisk
    }
}

/// Bucket counts over a playbook's live bullets.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreDistribution {
    /// Bullets scoring ≥ 5.
    pub excellent: usize,
    /// Bullets scoring in [2, 5).
    pub good: usize,
    /// Bullets scoring in (−2, 2).
    pub neutral: usize,
    /// Bullets scoring ≤ −2.
    pub at_risk: usize,
}

/// Computes the score distribution over a playbook's live bullets.
#[must_use]
pub fn score_distribution(
    playbook: &Playbook,
    config: &ScoringConfig,
    now: DateTime<Utc>,
) -> ScoreDistribution {
    let mut distribution = ScoreDistribution::default();
    for bullet in playbook.bullets.iter().filter(|b| b.is_live()) {
        match score_bucket(effective_score(bullet, config, now)) {
            ScoreBucket::Excellent => distribution.excellent += 1,
            ScoreBucket::Good => distribution.good += 1,
            ScoreBucket::Neutral => distribution.neutral += 1,
            ScoreBucket::AtRisk => distribution.at_risk += 1,
        }
    }
    distribution
}
