//! Edit-distance string similarity.

use strsim::levenshtein;

/// Case-insensitive similarity in `[0.0, 1.0]`.
///
/// 1.0 means identical after lowercasing and trimming; the edit distance is
/// normalized by the length of the longer string.
pub fn similarity(a: &str, b: &str) -> f64 {
  let a = a.trim().to_lowercase();
  let b = b.trim().to_lowercase();

  let longer = a.chars().count().max(b.chars().count());
  if longer == 0 {
    return 1.0;
  }

  1.0 - levenshtein(&a, &b) as f64 / longer as f64
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_distance_counts_chars_not_bytes() {
    // One substitution, though "è" is two bytes
    let score = similarity("crème", "creme");
    assert!((score - 0.8).abs() < 1e-9);
  }

  #[test]
  fn test_similarity_bounds() {
    assert_eq!(similarity("Espresso", "espresso"), 1.0);
    assert_eq!(similarity("abc", "xyz"), 0.0);
    assert_eq!(similarity("", ""), 1.0);
  }

  #[test]
  fn test_similarity_normalizes_by_longer_string() {
    // 3 edits over 7 chars
    let score = similarity("kitten", "sitting");
    assert!((score - (1.0 - 3.0 / 7.0)).abs() < 1e-9);
  }
}
