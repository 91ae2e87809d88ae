//! Alias and fuzzy resolution of free-text mentions to directory entities.
//!
//! Maps a mention ("Ashwn", "CORE") to canonical candidates from a directory
//! snapshot, with a score per candidate.
//!
//! ## Resolution Order
//!
//! Tiers are consulted in order and the first tier that yields anything
//! wins:
//! 1. Exact case-insensitive match on the name or an alternate name
//!    (score 100). A single hit returns immediately.
//! 2. Partial containment in either direction (score 90).
//! 3. Approximate similarity at or above the threshold, keeping only the
//!    candidates tied at the best score (score capped at 89).
//! 4. Static alias dictionary (score 70).
//!
//! Inactive entries never match. Results are deduplicated
//! case-insensitively on the matched name.

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use trackq_core::config::ResolverSettings;
use trackq_core::defaults::{
    FUZZY_NAME_THRESHOLD, SCORE_ALIAS, SCORE_EXACT, SCORE_FUZZY_MAX, SCORE_PARTIAL,
};
use trackq_core::{DirectoryUser, MatchTier, NameMatch, ProjectInfo};

use crate::normalize::name_similarity;

/// Shortest candidate name that may match by being contained in a mention.
const MIN_REVERSE_PARTIAL_LEN: usize = 3;

/// An entity the resolver can match against.
pub trait Named {
    /// Canonical display name.
    fn name(&self) -> &str;

    /// Tracker identifier carried into the match.
    fn external_id(&self) -> Option<&str>;

    /// Other names that count as exact matches.
    fn alt_names(&self) -> Vec<&str> {
        Vec::new()
    }

    fn is_active(&self) -> bool {
        true
    }
}

impl Named for DirectoryUser {
    fn name(&self) -> &str {
        &self.display_name
    }

    fn external_id(&self) -> Option<&str> {
        Some(&self.account_id)
    }

    fn alt_names(&self) -> Vec<&str> {
        self.email
            .as_deref()
            .and_then(|e| e.split('@').next())
            .filter(|local| !local.is_empty())
            .into_iter()
            .collect()
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

impl Named for ProjectInfo {
    fn name(&self) -> &str {
        &self.name
    }

    fn external_id(&self) -> Option<&str> {
        Some(&self.key)
    }

    fn alt_names(&self) -> Vec<&str> {
        vec![&self.key]
    }
}

/// Matches plus the tiers that were tried, for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveTrace {
    pub matches: Vec<NameMatch>,
    pub tiers_consulted: Vec<MatchTier>,
}

/// How a set of matches should be acted on.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Unique(NameMatch),
    /// Several candidates tied at the top score.
    Ambiguous(Vec<NameMatch>),
    NotFound,
}

impl Resolution {
    /// Classify a resolver result. Candidates below the best score are
    /// ignored; only ties at the top make a mention ambiguous.
    pub fn classify(matches: Vec<NameMatch>) -> Self {
        let best = matches.iter().map(|m| m.score).fold(f64::MIN, f64::max);
        let mut top: Vec<NameMatch> = matches
            .into_iter()
            .filter(|m| (m.score - best).abs() < f64::EPSILON)
            .collect();
        match top.len() {
            0 => Self::NotFound,
            1 => Self::Unique(top.remove(0)),
            _ => Self::Ambiguous(top),
        }
    }
}

/// Tiered name resolver.
#[derive(Debug, Clone)]
pub struct Resolver {
    threshold: f64,
    /// Lower-cased alias → canonical name.
    aliases: BTreeMap<String, String>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(FUZZY_NAME_THRESHOLD)
    }
}

impl Resolver {
    /// Create a resolver with the given approximate-match threshold (0-100).
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 100.0),
            aliases: BTreeMap::new(),
        }
    }

    pub fn from_settings(settings: &ResolverSettings) -> Self {
        Self::new(settings.fuzzy_threshold).with_aliases(
            settings
                .aliases
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str())),
        )
    }

    /// Add alias → canonical name entries.
    pub fn with_aliases<'a, I>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (alias, canonical) in aliases {
            self.aliases
                .insert(alias.trim().to_lowercase(), canonical.to_string());
        }
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Resolve `mention` against `candidates`. Empty when nothing matches.
    pub fn resolve<T: Named>(&self, mention: &str, candidates: &[T]) -> Vec<NameMatch> {
        self.resolve_traced(mention, candidates).matches
    }

    /// Like [`resolve`](Self::resolve), also reporting the tiers consulted.
    pub fn resolve_traced<T: Named>(&self, mention: &str, candidates: &[T]) -> ResolveTrace {
        let mention = mention.trim();
        let mut tiers_consulted = Vec::new();
        if mention.is_empty() {
            return ResolveTrace {
                matches: Vec::new(),
                tiers_consulted,
            };
        }
        let active: Vec<&T> = candidates.iter().filter(|c| c.is_active()).collect();

        tiers_consulted.push(MatchTier::Exact);
        let exact = self.exact(mention, &active);
        if exact.len() == 1 {
            return self.finish(mention, exact, tiers_consulted);
        }

        tiers_consulted.push(MatchTier::Partial);
        let mut partial = exact;
        partial.extend(self.partial(mention, &active));
        if !partial.is_empty() {
            return self.finish(mention, partial, tiers_consulted);
        }

        tiers_consulted.push(MatchTier::Fuzzy);
        let fuzzy = self.fuzzy(mention, &active);
        if !fuzzy.is_empty() {
            return self.finish(mention, fuzzy, tiers_consulted);
        }

        tiers_consulted.push(MatchTier::Alias);
        let alias = self.alias(mention, &active);
        self.finish(mention, alias, tiers_consulted)
    }

    fn finish(
        &self,
        mention: &str,
        matches: Vec<NameMatch>,
        tiers_consulted: Vec<MatchTier>,
    ) -> ResolveTrace {
        // Distinct accounts sharing a display name stay distinct.
        let mut seen = HashSet::new();
        let matches: Vec<NameMatch> = matches
            .into_iter()
            .filter(|m| {
                let identity = match &m.external_id {
                    Some(id) => format!("id:{}", id),
                    None => format!("name:{}", m.matched_name.to_lowercase()),
                };
                seen.insert(identity)
            })
            .collect();
        debug!(
            mention,
            matches = matches.len(),
            tier = ?tiers_consulted.last(),
            "Resolved mention"
        );
        ResolveTrace {
            matches,
            tiers_consulted,
        }
    }

    fn exact<T: Named>(&self, mention: &str, candidates: &[&T]) -> Vec<NameMatch> {
        candidates
            .iter()
            .filter(|c| {
                c.name().eq_ignore_ascii_case(mention)
                    || c.alt_names().iter().any(|a| a.eq_ignore_ascii_case(mention))
            })
            .map(|c| to_match(mention, *c, SCORE_EXACT, MatchTier::Exact))
            .collect()
    }

    fn partial<T: Named>(&self, mention: &str, candidates: &[&T]) -> Vec<NameMatch> {
        let needle = mention.to_lowercase();
        candidates
            .iter()
            .filter(|c| {
                let name = c.name().to_lowercase();
                if name == needle {
                    return false;
                }
                name.contains(&needle)
                    || (name.chars().count() >= MIN_REVERSE_PARTIAL_LEN && needle.contains(&name))
            })
            .map(|c| to_match(mention, *c, SCORE_PARTIAL, MatchTier::Partial))
            .collect()
    }

    fn fuzzy<T: Named>(&self, mention: &str, candidates: &[&T]) -> Vec<NameMatch> {
        let scored: Vec<(f64, &T)> = candidates
            .iter()
            .map(|c| {
                let best = std::iter::once(c.name())
                    .chain(c.alt_names())
                    .map(|n| name_similarity(mention, n))
                    .fold(0.0, f64::max);
                (best, *c)
            })
            .filter(|(score, _)| *score >= self.threshold)
            .collect();

        // Ties are decided before capping so 95 and 91 stay distinct.
        let best = scored.iter().map(|(s, _)| *s).fold(f64::MIN, f64::max);
        scored
            .into_iter()
            .filter(|(s, _)| (s - best).abs() < 1e-9)
            .map(|(s, c)| to_match(mention, c, s.min(SCORE_FUZZY_MAX), MatchTier::Fuzzy))
            .collect()
    }

    fn alias<T: Named>(&self, mention: &str, candidates: &[&T]) -> Vec<NameMatch> {
        let Some(canonical) = self.aliases.get(&mention.to_lowercase()) else {
            return Vec::new();
        };
        let known = candidates.iter().find(|c| {
            c.name().eq_ignore_ascii_case(canonical)
                || c.alt_names().iter().any(|a| a.eq_ignore_ascii_case(canonical))
        });
        vec![NameMatch {
            original_name: mention.to_string(),
            matched_name: known
                .map(|c| c.name().to_string())
                .unwrap_or_else(|| canonical.clone()),
            score: SCORE_ALIAS,
            external_id: known.and_then(|c| c.external_id()).map(str::to_string),
            tier: MatchTier::Alias,
        }]
    }
}

fn to_match<T: Named>(mention: &str, candidate: &T, score: f64, tier: MatchTier) -> NameMatch {
    NameMatch {
        original_name: mention.to_string(),
        matched_name: candidate.name().to_string(),
        score,
        external_id: candidate.external_id().map(str::to_string),
        tier,
    }
}
