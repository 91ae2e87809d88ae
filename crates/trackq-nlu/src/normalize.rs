//! Text normalization and similarity measures shared by the matcher and
//! the resolver.

use std::collections::BTreeSet;

/// Words that carry no intent for template matching.
const FILLERS: &[&str] = &[
    "a", "an", "all", "any", "can", "could", "find", "get", "give", "list", "me", "please",
    "pull", "show", "tell", "the", "up", "would", "you",
];

/// Lowercase, replace punctuation with spaces, collapse whitespace.
///
/// `{`, `}` and `_` survive so that masked slot markers (`{status_category}`)
/// stay single tokens.
pub fn normalize(text: &str) -> String {
    let mapped: String = text
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '{' || c == '}' || c == '_' {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                ' '
            }
        })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalized tokens with filler words removed.
pub fn matching_tokens(text: &str) -> Vec<String> {
    normalize(text)
        .split(' ')
        .filter(|t| !t.is_empty() && !FILLERS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Token-set similarity in `[0, 1]`.
///
/// Compares the sorted intersection against each side extended by its own
/// remainder, so word order and repeated words do not matter and a phrase
/// fully contained in the other scores 1.0.
pub fn token_set_ratio(a: &[String], b: &[String]) -> f64 {
    let set_a: BTreeSet<&str> = a.iter().map(String::as_str).collect();
    let set_b: BTreeSet<&str> = b.iter().map(String::as_str).collect();
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }

    let inter: Vec<&str> = set_a.intersection(&set_b).copied().collect();
    let diff_ab: Vec<&str> = set_a.difference(&set_b).copied().collect();
    let diff_ba: Vec<&str> = set_b.difference(&set_a).copied().collect();

    let t0 = inter.join(" ");
    let t1 = join_nonempty(&t0, &diff_ab.join(" "));
    let t2 = join_nonempty(&t0, &diff_ba.join(" "));

    let pairs = [(&t0, &t1), (&t0, &t2), (&t1, &t2)];
    pairs
        .iter()
        .filter(|(x, y)| !x.is_empty() && !y.is_empty())
        .map(|(x, y)| strsim::normalized_levenshtein(x, y))
        .fold(0.0, f64::max)
}

fn join_nonempty(a: &str, b: &str) -> String {
    match (a.is_empty(), b.is_empty()) {
        (true, _) => b.to_string(),
        (_, true) => a.to_string(),
        _ => format!("{} {}", a, b),
    }
}

/// Share of `trigger` tokens that also occur in `query`, in `[0, 1]`.
pub fn coverage(query: &[String], trigger: &[String]) -> f64 {
    if trigger.is_empty() {
        return 0.0;
    }
    let q: BTreeSet<&str> = query.iter().map(String::as_str).collect();
    let t: BTreeSet<&str> = trigger.iter().map(String::as_str).collect();
    q.intersection(&t).count() as f64 / t.len() as f64
}

/// Approximate name similarity in `[0, 100]`.
///
/// Takes the best Jaro-Winkler score of the mention against the full name
/// and against each of its tokens, so "Ashwn" scores well against
/// "Ashwin Thyagarajan".
pub fn name_similarity(mention: &str, name: &str) -> f64 {
    let m = normalize(mention);
    let n = normalize(name);
    if m.is_empty() || n.is_empty() {
        return 0.0;
    }
    let whole = strsim::jaro_winkler(&m, &n);
    let best_token = n
        .split(' ')
        .map(|t| strsim::jaro_winkler(&m, t))
        .fold(0.0, f64::max);
    whole.max(best_token) * 100.0
}
