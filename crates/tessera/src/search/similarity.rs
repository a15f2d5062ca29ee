//! Similarity ratio for fuzzy search
//!
//! Ratcliff/Obershelp gestalt matching: find the longest common block,
//! recurse on the pieces to its left and right, and report
//! `2 * matched / (len(a) + len(b))`. Identical strings score 1.0, strings
//! with no character in common score 0.0.

/// Similarity of `a` and `b` in `[0.0, 1.0]`, compared by `char`
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_chars(&a, &b) as f64 / total as f64
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let mut matched = 0;
    let mut pending = vec![(0, a.len(), 0, b.len())];

    while let Some((alo, ahi, blo, bhi)) = pending.pop() {
        let (i, j, len) = longest_match(a, b, alo, ahi, blo, bhi);
        if len == 0 {
            continue;
        }
        matched += len;
        if alo < i && blo < j {
            pending.push((alo, i, blo, j));
        }
        if i + len < ahi && j + len < bhi {
            pending.push((i + len, ahi, j + len, bhi));
        }
    }
    matched
}

/// Longest common block of `a[alo..ahi]` and `b[blo..bhi]` as
/// `(start in a, start in b, length)`; the earliest one wins ties
fn longest_match(
    a: &[char],
    b: &[char],
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let mut best = (alo, blo, 0);
    let width = bhi - blo + 1;
    let mut prev = vec![0usize; width];
    let mut cur = vec![0usize; width];

    for i in alo..ahi {
        for j in blo..bhi {
            let idx = j - blo + 1;
            if a[i] == b[j] {
                cur[idx] = prev[idx - 1] + 1;
                if cur[idx] > best.2 {
                    best = (i + 1 - cur[idx], j + 1 - cur[idx], cur[idx]);
                }
            } else {
                cur[idx] = 0;
            }
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_identical_and_empty() {
        assert!(approx(ratio("tessera", "tessera"), 1.0));
        assert!(approx(ratio("", ""), 1.0));
        assert!(approx(ratio("abc", ""), 0.0));
    }

    #[test]
    fn test_disjoint() {
        assert!(approx(ratio("abc", "xyz"), 0.0));
    }

    #[test]
    fn test_partial_overlap() {
        // "bcd" in common: 2 * 3 / 8
        assert!(approx(ratio("abcd", "bcde"), 0.75));
        // Single typo in a short word stays above the default threshold
        assert!(ratio("recieve", "receive") > 0.6);
    }

    #[test]
    fn test_blocks_on_both_sides_are_counted() {
        // "a" and "cd" match around the differing middle
        assert!(approx(ratio("abcd", "axcd"), 0.75));
    }

    #[test]
    fn test_symmetric_for_simple_inputs() {
        assert!(approx(ratio("kitten", "sitting"), ratio("sitting", "kitten")));
    }

    #[test]
    fn test_unicode_compares_by_char() {
        assert!(approx(ratio("café", "cafe"), 0.75));
    }
}
