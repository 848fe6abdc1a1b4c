/// One step of an edit script. Positions index into the base sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit<T> {
    /// The base item at this position survives.
    Keep(usize),
    /// The base item at this position is removed.
    Delete(usize),
    /// `item` is inserted before the base item at `before` (`before == base.len()`
    /// appends).
    Insert { before: usize, item: T },
}

/// Ordered edits turning a base sequence into a target sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditScript<T> {
    base_len: usize,
    edits: Vec<Edit<T>>,
}

impl<T> EditScript<T> {
    pub fn base_len(&self) -> usize {
        self.base_len
    }

    #[cfg(test)]
    pub fn edits(&self) -> &[Edit<T>] {
        &self.edits
    }

    /// True when the script keeps every base item and inserts nothing.
    #[cfg(test)]
    pub fn is_identity(&self) -> bool {
        self.edits.iter().all(|edit| matches!(edit, Edit::Keep(_)))
    }

    pub fn into_edits(self) -> Vec<Edit<T>> {
        self.edits
    }
}

#[cfg(test)]
impl<T: Clone> EditScript<T> {
    /// Replay the script against `base`.
    pub fn apply(&self, base: &[T]) -> Vec<T> {
        debug_assert_eq!(base.len(), self.base_len);
        let mut out = Vec::with_capacity(base.len());
        for edit in &self.edits {
            match edit {
                Edit::Keep(pos) => out.push(base[*pos].clone()),
                Edit::Delete(_) => {}
                Edit::Insert { item, .. } => out.push(item.clone()),
            }
        }
        out
    }
}

/// Compute a longest-common-subsequence alignment of `target` against `base`.
///
/// Matches are taken as early as possible, and when an insertion and a deletion
/// cost the same the insertion is emitted first. A replaced item therefore shows
/// up as the new items inserted before it followed by its deletion, which keeps
/// both halves of a replacement attached to the same base position.
pub fn diff<T: PartialEq + Clone>(base: &[T], target: &[T]) -> EditScript<T> {
    let prefix = base
        .iter()
        .zip(target)
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = base[prefix..]
        .iter()
        .rev()
        .zip(target[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let middle_base = &base[prefix..base.len() - suffix];
    let middle_target = &target[prefix..target.len() - suffix];

    let mut edits = Vec::with_capacity(base.len().max(target.len()));
    edits.extend((0..prefix).map(Edit::Keep));
    align_middle(middle_base, middle_target, prefix, &mut edits);
    edits.extend((base.len() - suffix..base.len()).map(Edit::Keep));

    EditScript {
        base_len: base.len(),
        edits,
    }
}

fn align_middle<T: PartialEq + Clone>(
    base: &[T],
    target: &[T],
    offset: usize,
    edits: &mut Vec<Edit<T>>,
) {
    let (n, m) = (base.len(), target.len());
    if n == 0 {
        edits.extend(target.iter().map(|item| Edit::Insert {
            before: offset,
            item: item.clone(),
        }));
        return;
    }
    if m == 0 {
        edits.extend((offset..offset + n).map(Edit::Delete));
        return;
    }

    // lcs[i * width + j] = LCS length of base[i..] and target[j..]
    let width = m + 1;
    let mut lcs = vec![0u32; (n + 1) * width];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i * width + j] = if base[i] == target[j] {
                lcs[(i + 1) * width + j + 1] + 1
            } else {
                lcs[(i + 1) * width + j].max(lcs[i * width + j + 1])
            };
        }
    }

    let at = |i: usize, j: usize| lcs[i * width + j];
    let (mut i, mut j) = (0, 0);
    while i < n || j < m {
        let can_keep = i < n && j < m && base[i] == target[j] && at(i, j) == at(i + 1, j + 1) + 1;
        if can_keep {
            edits.push(Edit::Keep(offset + i));
            i += 1;
            j += 1;
        } else if j < m && (i == n || at(i, j + 1) >= at(i + 1, j)) {
            edits.push(Edit::Insert {
                before: offset + i,
                item: target[j].clone(),
            });
            j += 1;
        } else {
            edits.push(Edit::Delete(offset + i));
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn test_identical_sequences_keep_everything() {
        let script = diff(&chars("abc"), &chars("abc"));
        assert!(script.is_identity());
        assert_eq!(
            script.edits(),
            &[Edit::Keep(0), Edit::Keep(1), Edit::Keep(2)]
        );
    }

    #[test]
    fn test_empty_base_is_all_inserts() {
        let script = diff(&[], &chars("xy"));
        assert_eq!(
            script.edits(),
            &[
                Edit::Insert { before: 0, item: 'x' },
                Edit::Insert { before: 0, item: 'y' },
            ]
        );
    }

    #[test]
    fn test_empty_target_is_all_deletes() {
        let script = diff(&chars("xy"), &[]);
        assert_eq!(script.edits(), &[Edit::Delete(0), Edit::Delete(1)]);
        assert!(diff::<char>(&[], &[]).edits().is_empty());
    }

    #[test]
    fn test_replacement_inserts_before_deleting() {
        let script = diff(&chars("abc"), &chars("azc"));
        assert_eq!(
            script.edits(),
            &[
                Edit::Keep(0),
                Edit::Insert { before: 1, item: 'z' },
                Edit::Delete(1),
                Edit::Keep(2),
            ]
        );
    }

    #[test]
    fn test_insert_in_middle_and_append() {
        let script = diff(&chars("abc"), &chars("axbcy"));
        assert_eq!(
            script.edits(),
            &[
                Edit::Keep(0),
                Edit::Insert { before: 1, item: 'x' },
                Edit::Keep(1),
                Edit::Keep(2),
                Edit::Insert { before: 3, item: 'y' },
            ]
        );
    }

    #[test]
    fn test_duplicates_are_matched_in_order() {
        // "abab" -> "ab": the earliest run is kept, the trailing pair deleted
        let script = diff(&chars("abab"), &chars("ab"));
        assert_eq!(
            script.edits(),
            &[Edit::Keep(0), Edit::Keep(1), Edit::Delete(2), Edit::Delete(3)]
        );
    }

    #[test]
    fn test_moved_item_is_delete_plus_insert() {
        let script = diff(&chars("abc"), &chars("bca"));
        assert_eq!(script.apply(&chars("abc")), chars("bca"));
        let kept = script
            .edits()
            .iter()
            .filter(|edit| matches!(edit, Edit::Keep(_)))
            .count();
        assert_eq!(kept, 2);
    }

    #[test]
    fn test_diff_is_deterministic() {
        let base = chars("abcabba");
        let target = chars("cbabac");
        assert_eq!(diff(&base, &target), diff(&base, &target));
    }

    proptest! {
        #[test]
        fn prop_apply_reproduces_target(
            base in prop::collection::vec(0u8..6, 0..24),
            target in prop::collection::vec(0u8..6, 0..24),
        ) {
            let script = diff(&base, &target);
            prop_assert_eq!(script.apply(&base), target);
        }

        #[test]
        fn prop_keeps_are_a_longest_common_subsequence(
            base in prop::collection::vec(0u8..4, 0..16),
            target in prop::collection::vec(0u8..4, 0..16),
        ) {
            let script = diff(&base, &target);
            let kept = script.edits().iter().filter(|e| matches!(e, Edit::Keep(_))).count();
            prop_assert_eq!(kept, naive_lcs(&base, &target));
        }
    }

    fn naive_lcs(a: &[u8], b: &[u8]) -> usize {
        let mut table = vec![vec![0usize; b.len() + 1]; a.len() + 1];
        for i in 1..=a.len() {
            for j in 1..=b.len() {
                table[i][j] = if a[i - 1] == b[j - 1] {
                    table[i - 1][j - 1] + 1
                } else {
                    table[i - 1][j].max(table[i][j - 1])
                };
            }
        }
        table[a.len()][b.len()]
    }
}
