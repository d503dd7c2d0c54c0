use std::collections::BTreeSet;

pub trait Similarity {
    fn score(&self, a: &str, b: &str) -> u8;
}

impl<F> Similarity for F
where
    F: Fn(&str, &str) -> u8,
{
    fn score(&self, a: &str, b: &str) -> u8 {
        self(a, b)
    }
}

/// Best of the plain, token and partial scorers, with partial matches
/// discounted according to how different the two lengths are.
#[derive(Debug, Default, Clone, Copy)]
pub struct WeightedRatio;

impl Similarity for WeightedRatio {
    fn score(&self, a: &str, b: &str) -> u8 {
        weighted_ratio(a, b)
    }
}

const UNBASE_SCALE: f64 = 0.95;

/// Lowercases and collapses every run of non-alphanumeric characters to one space.
pub fn normalize(input: &str) -> String {
    let replaced: String = input
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                ' '
            }
        })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn ratio(a: &str, b: &str) -> u8 {
    raw_ratio(&normalize(a), &normalize(b))
}

pub fn partial_ratio(a: &str, b: &str) -> u8 {
    raw_partial_ratio(&normalize(a), &normalize(b))
}

pub fn token_sort_ratio(a: &str, b: &str) -> u8 {
    raw_ratio(&sorted_tokens(&normalize(a)), &sorted_tokens(&normalize(b)))
}

pub fn token_set_ratio(a: &str, b: &str) -> u8 {
    raw_token_set(&normalize(a), &normalize(b), raw_ratio)
}

pub fn weighted_ratio(a: &str, b: &str) -> u8 {
    let p1 = normalize(a);
    let p2 = normalize(b);
    if p1.is_empty() || p2.is_empty() {
        return 0;
    }

    let base = raw_ratio(&p1, &p2) as f64;
    let len1 = p1.chars().count() as f64;
    let len2 = p2.chars().count() as f64;
    let len_ratio = len1.max(len2) / len1.min(len2);

    let best = if len_ratio >= 1.5 {
        let partial_scale = if len_ratio <= 8.0 { 0.9 } else { 0.6 };
        let partial = raw_partial_ratio(&p1, &p2) as f64 * partial_scale;
        let partial_sort = raw_partial_ratio(&sorted_tokens(&p1), &sorted_tokens(&p2)) as f64
            * UNBASE_SCALE
            * partial_scale;
        let partial_set =
            raw_token_set(&p1, &p2, raw_partial_ratio) as f64 * UNBASE_SCALE * partial_scale;
        base.max(partial).max(partial_sort).max(partial_set)
    } else {
        let sort = raw_ratio(&sorted_tokens(&p1), &sorted_tokens(&p2)) as f64 * UNBASE_SCALE;
        let set = raw_token_set(&p1, &p2, raw_ratio) as f64 * UNBASE_SCALE;
        base.max(sort).max(set)
    };
    best.round().clamp(0.0, 100.0) as u8
}

fn sorted_tokens(processed: &str) -> String {
    let mut tokens: Vec<&str> = processed.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

fn raw_token_set(p1: &str, p2: &str, scorer: fn(&str, &str) -> u8) -> u8 {
    let tokens1: BTreeSet<&str> = p1.split_whitespace().collect();
    let tokens2: BTreeSet<&str> = p2.split_whitespace().collect();

    let sect = tokens1.intersection(&tokens2).copied().collect::<Vec<_>>().join(" ");
    let diff_1to2 = tokens1.difference(&tokens2).copied().collect::<Vec<_>>().join(" ");
    let diff_2to1 = tokens2.difference(&tokens1).copied().collect::<Vec<_>>().join(" ");

    let combined_1to2 = format!("{sect} {diff_1to2}").trim().to_string();
    let combined_2to1 = format!("{sect} {diff_2to1}").trim().to_string();

    scorer(&sect, &combined_1to2)
        .max(scorer(&sect, &combined_2to1))
        .max(scorer(&combined_1to2, &combined_2to1))
}

// Indel similarity: 2 * LCS / (len(a) + len(b)).
fn raw_ratio(a: &str, b: &str) -> u8 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    chars_ratio(&a, &b)
}

fn chars_ratio(a: &[char], b: &[char]) -> u8 {
    let total = a.len() + b.len();
    if total == 0 || a.is_empty() || b.is_empty() {
        return 0;
    }
    let lcs = longest_common_subsequence(a, b);
    (200.0 * lcs as f64 / total as f64).round() as u8
}

fn raw_partial_ratio(a: &str, b: &str) -> u8 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (shorter, longer) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if shorter.is_empty() {
        return 0;
    }

    let width = shorter.len();
    let mut best = 0;
    for start in 0..=(longer.len() - width) {
        let score = chars_ratio(&shorter, &longer[start..start + width]);
        if score > best {
            best = score;
            if best == 100 {
                break;
            }
        }
    }
    best
}

fn longest_common_subsequence(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for ca in a {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}
