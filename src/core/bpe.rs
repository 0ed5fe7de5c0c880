//! Rank-ordered byte-pair merging.
//!
//! A pretoken starts as one unit per byte. Each pass finds the adjacent pair
//! with the lowest merge rank and merges every non-overlapping occurrence of
//! it, left to right. Passes repeat until no adjacent pair has a rank.
//!
//! Units are kept as boundary offsets into the pretoken, so a merge is the
//! removal of one boundary and never copies bytes. The rank of every
//! adjacent pair is cached between passes; only pairs touching a unit
//! created by the last pass are looked up again.

use rustc_hash::FxHashMap;
use std::ops::Range;

use super::vocab::{MergeRule, Vocabulary};

/// Priority of a merge rule: its position in the merge list.
pub type Rank = u32;

/// Pair → rank lookup built from an ordered merge list.
///
/// Keyed by the left sequence, then the right one, so a pair of borrowed
/// slices can be looked up without allocating.
#[derive(Debug, Clone, Default)]
pub struct MergeRanks {
    ranks: FxHashMap<Vec<u8>, FxHashMap<Vec<u8>, Rank>>,
    len: usize,
}

impl MergeRanks {
    /// Build the lookup. A pair listed more than once keeps its first rank.
    ///
    /// Ranks are `u32`; rules past `Rank::MAX` are dropped with a warning.
    pub fn new<'a>(merges: impl IntoIterator<Item = &'a MergeRule>) -> Self {
        let mut ranks: FxHashMap<Vec<u8>, FxHashMap<Vec<u8>, Rank>> = FxHashMap::default();
        let mut len = 0;

        for (index, (left, right)) in merges.into_iter().enumerate() {
            let Ok(rank) = Rank::try_from(index) else {
                log::warn!("merge list truncated to {} rules", index);
                break;
            };

            let rights = match ranks.get_mut(left.as_slice()) {
                Some(rights) => rights,
                None => ranks.entry(left.clone()).or_default(),
            };
            if rights.contains_key(right) {
                log::warn!(
                    "duplicate merge rule ({:?}, {:?}) at rank {} ignored",
                    left,
                    right,
                    rank
                );
                continue;
            }
            rights.insert(right.clone(), rank);
            len += 1;
        }

        Self { ranks, len }
    }

    /// Rank of merging `left` with `right`, if that rule exists.
    #[inline]
    pub fn get(&self, left: &[u8], right: &[u8]) -> Option<Rank> {
        self.ranks.get(left)?.get(right).copied()
    }

    /// Number of distinct merge rules.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Merge the bytes of one pretoken, returning the final units as byte ranges.
pub fn byte_pair_merge(piece: &[u8], ranks: &MergeRanks) -> Vec<Range<usize>> {
    // bounds[i]..bounds[i + 1] is unit i
    let mut bounds: Vec<usize> = (0..=piece.len()).collect();

    if piece.len() < 2 {
        return to_ranges(&bounds);
    }

    let pair_rank =
        |b: &[usize], i: usize| ranks.get(&piece[b[i]..b[i + 1]], &piece[b[i + 1]..b[i + 2]]);

    // pair_ranks[i] is the rank of (unit i, unit i + 1)
    let mut pair_ranks: Vec<Option<Rank>> = (0..piece.len() - 1)
        .map(|i| pair_rank(&bounds, i))
        .collect();

    let mut next_bounds = Vec::with_capacity(bounds.len());
    // For each unit after a pass: its index before the pass, or None if new
    let mut origin: Vec<Option<usize>> = Vec::with_capacity(piece.len());

    while let Some(best) = pair_ranks.iter().flatten().min().copied() {
        let units = bounds.len() - 1;
        next_bounds.clear();
        origin.clear();
        next_bounds.push(bounds[0]);

        let mut i = 0;
        while i < units {
            if i + 1 < units && pair_ranks[i] == Some(best) {
                next_bounds.push(bounds[i + 2]);
                origin.push(None);
                i += 2;
            } else {
                next_bounds.push(bounds[i + 1]);
                origin.push(Some(i));
                i += 1;
            }
        }

        std::mem::swap(&mut bounds, &mut next_bounds);

        let next_ranks: Vec<Option<Rank>> = (0..origin.len().saturating_sub(1))
            .map(|j| match (origin[j], origin[j + 1]) {
                (Some(old), Some(_)) => pair_ranks[old],
                _ => pair_rank(&bounds, j),
            })
            .collect();
        pair_ranks = next_ranks;
    }

    to_ranges(&bounds)
}

fn to_ranges(bounds: &[usize]) -> Vec<Range<usize>> {
    bounds.windows(2).map(|w| w[0]..w[1]).collect()
}

/// Merge one pretoken and map its units to vocabulary ids.
///
/// Returns the bytes of the first unit missing from the vocabulary as the
/// error; that only happens when the merge table and vocabulary disagree.
pub fn byte_pair_encode(
    piece: &[u8],
    ranks: &MergeRanks,
    vocab: &Vocabulary,
) -> Result<Vec<u32>, Vec<u8>> {
    byte_pair_merge(piece, ranks)
        .into_iter()
        .map(|range| {
            let unit = &piece[range];
            vocab.token_to_id(unit).ok_or_else(|| unit.to_vec())
        })
        .collect()
}

/// Merge one pretoken and return its units as byte slices.
pub fn byte_pair_split<'a>(piece: &'a [u8], ranks: &MergeRanks) -> Vec<&'a [u8]> {
    byte_pair_merge(piece, ranks)
        .into_iter()
        .map(|range| &piece[range])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(pairs: &[(&str, &str)]) -> Vec<MergeRule> {
        pairs
            .iter()
            .map(|(l, r)| (l.as_bytes().to_vec(), r.as_bytes().to_vec()))
            .collect()
    }

    fn split<'a>(piece: &'a str, merges: &[(&str, &str)]) -> Vec<&'a str> {
        let ranks = MergeRanks::new(&rules(merges));
        byte_pair_split(piece.as_bytes(), &ranks)
            .into_iter()
            .map(|unit| std::str::from_utf8(unit).unwrap())
            .collect()
    }

    #[test]
    fn test_rank_priority() {
        let vocab = Vocabulary::new([
            (0, b"a".to_vec()),
            (1, b"b".to_vec()),
            (2, b"ab".to_vec()),
            (3, b"bc".to_vec()),
            (4, b"abc".to_vec()),
            (5, b"c".to_vec()),
        ]);
        let ranks = MergeRanks::new(&rules(&[("a", "b"), ("b", "c"), ("ab", "c")]));
        assert_eq!(byte_pair_encode(b"abc", &ranks, &vocab), Ok(vec![4]));
    }

    #[test]
    fn test_lower_rank_wins_at_other_position() {
        // (b, c) outranks (a, b), so "a" is left alone
        assert_eq!(split("abc", &[("b", "c"), ("a", "b")]), vec!["a", "bc"]);
    }

    #[test]
    fn test_overlapping_pair_merges_left_first() {
        assert_eq!(split("aaa", &[("a", "a")]), vec!["aa", "a"]);
        assert_eq!(split("aaaa", &[("a", "a")]), vec!["aa", "aa"]);
    }

    #[test]
    fn test_all_occurrences_merge_in_one_pass() {
        // After merging every (a, b), the pair (ab, ab) becomes available
        assert_eq!(
            split("ababab", &[("a", "b"), ("ab", "ab")]),
            vec!["abab", "ab"]
        );
    }

    #[test]
    fn test_merge_to_single_unit() {
        let merges = [("h", "e"), ("l", "l"), ("he", "ll"), ("hell", "o")];
        assert_eq!(split("hello", &merges), vec!["hello"]);
    }

    #[test]
    fn test_no_rules_leaves_bytes() {
        assert_eq!(split("xyz", &[]), vec!["x", "y", "z"]);
    }

    #[test]
    fn test_short_pieces() {
        let ranks = MergeRanks::new(&rules(&[("a", "a")]));
        assert!(byte_pair_merge(b"", &ranks).is_empty());
        assert_eq!(byte_pair_merge(b"a", &ranks), vec![0..1]);
    }

    #[test]
    fn test_cached_ranks_stay_valid_between_passes() {
        // "xy" is untouched while "ab" forms; the later (xy, ab) rule still fires
        let merges = [("x", "y"), ("a", "b"), ("xy", "ab"), ("xyab", "z")];
        assert_eq!(split("xyabz", &merges), vec!["xyabz"]);
    }

    #[test]
    fn test_multibyte_units() {
        let e_acute = "é"; // two bytes
        let ranks = MergeRanks::new(&[(vec![0xC3], vec![0xA9])]);
        assert_eq!(
            byte_pair_split(e_acute.as_bytes(), &ranks),
            vec![e_acute.as_bytes()]
        );
    }

    #[test]
    fn test_duplicate_rule_keeps_first_rank() {
        let ranks = MergeRanks::new(&rules(&[("a", "b"), ("c", "d"), ("a", "b")]));
        assert_eq!(ranks.get(b"a", b"b"), Some(0));
        assert_eq!(ranks.get(b"c", b"d"), Some(1));
        assert_eq!(ranks.len(), 2);
    }

    #[test]
    fn test_rules_sharing_left_side() {
        let ranks = MergeRanks::new(&rules(&[("a", "b"), ("x", "y"), ("a", "c"), ("a", "b")]));
        assert_eq!(ranks.get(b"a", b"b"), Some(0));
        assert_eq!(ranks.get(b"x", b"y"), Some(1));
        assert_eq!(ranks.get(b"a", b"c"), Some(2));
        assert_eq!(ranks.get(b"a", b"x"), None);
        assert_eq!(ranks.len(), 3);
    }

    #[test]
    fn test_unknown_unit_reported() {
        let vocab = Vocabulary::new([(0, b"a".to_vec()), (1, b"b".to_vec())]);
        let ranks = MergeRanks::new(&rules(&[("a", "b")]));
        assert_eq!(byte_pair_encode(b"ab", &ranks, &vocab), Err(b"ab".to_vec()));
    }
}
