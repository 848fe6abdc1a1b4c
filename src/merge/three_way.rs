use serde::{Deserialize, Serialize};

use super::diff::{Edit, EditScript, diff};

/// A span where local and remote edits overlap and disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictRegion<T> {
    pub local: Vec<T>,
    pub remote: Vec<T>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<T> {
    Clean(Vec<T>),
    Conflict(ConflictRegion<T>),
}

/// A merged playlist: resolved runs interleaved with unresolved regions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeResult<T> {
    segments: Vec<Segment<T>>,
}

impl<T> Default for MergeResult<T> {
    fn default() -> Self {
        Self {
            segments: Vec::new(),
        }
    }
}

impl<T> MergeResult<T> {
    /// A conflict-free result holding `items`.
    pub fn clean(items: Vec<T>) -> Self {
        let mut result = Self::default();
        result.push_clean(items);
        result
    }

    pub fn segments(&self) -> &[Segment<T>] {
        &self.segments
    }

    #[cfg(test)]
    pub fn has_conflicts(&self) -> bool {
        self.segments
            .iter()
            .any(|segment| matches!(segment, Segment::Conflict(_)))
    }

    pub fn conflicts(&self) -> impl Iterator<Item = &ConflictRegion<T>> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Conflict(region) => Some(region),
            Segment::Clean(_) => None,
        })
    }

    /// The merged sequence, or `None` while conflicts remain.
    pub fn resolved(&self) -> Option<Vec<T>>
    where
        T: Clone,
    {
        let mut out = Vec::new();
        for segment in &self.segments {
            match segment {
                Segment::Clean(items) => out.extend(items.iter().cloned()),
                Segment::Conflict(_) => return None,
            }
        }
        Some(out)
    }

    /// Adjacent clean runs are coalesced; empty runs are dropped.
    pub fn push_clean(&mut self, items: impl IntoIterator<Item = T>) {
        let mut items = items.into_iter().peekable();
        if items.peek().is_none() {
            return;
        }
        if let Some(Segment::Clean(last)) = self.segments.last_mut() {
            last.extend(items);
        } else {
            self.segments.push(Segment::Clean(items.collect()));
        }
    }

    pub fn push_conflict(&mut self, region: ConflictRegion<T>) {
        self.segments.push(Segment::Conflict(region));
    }

    /// Convert every item, dropping the ones `f` rejects.
    #[cfg(test)]
    pub fn filter_map<U>(self, mut f: impl FnMut(T) -> Option<U>) -> MergeResult<U> {
        let mut out = MergeResult::default();
        for segment in self.segments {
            match segment {
                Segment::Clean(items) => out.push_clean(items.into_iter().filter_map(&mut f)),
                Segment::Conflict(region) => out.push_conflict(ConflictRegion {
                    local: region.local.into_iter().filter_map(&mut f).collect(),
                    remote: region.remote.into_iter().filter_map(&mut f).collect(),
                }),
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrentInserts {
    /// Different insertions at the same position conflict.
    #[default]
    Conflict,
    /// Local insertions are placed first, then remote ones.
    Concatenate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOptions {
    /// When false, an item deleted on one side but untouched on the other is kept.
    pub propagate_deletions: bool,
    pub concurrent_inserts: ConcurrentInserts,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            propagate_deletions: true,
            concurrent_inserts: ConcurrentInserts::Conflict,
        }
    }
}

/// Result of [`merge_with`]: the merge plus the deletions that were refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merge<T> {
    pub result: MergeResult<T>,
    pub retained: Vec<T>,
}

/// Three-way merge of `local` and `remote`, both derived from `base`.
#[cfg(test)]
pub fn merge<T: PartialEq + Clone>(base: &[T], local: &[T], remote: &[T]) -> MergeResult<T> {
    merge_with(base, local, remote, &MergeOptions::default()).result
}

pub fn merge_with<T: PartialEq + Clone>(
    base: &[T],
    local: &[T],
    remote: &[T],
    options: &MergeOptions,
) -> Merge<T> {
    if local == remote {
        return Merge {
            result: MergeResult::clean(local.to_vec()),
            retained: Vec::new(),
        };
    }
    if options.propagate_deletions {
        if local == base {
            return Merge {
                result: MergeResult::clean(remote.to_vec()),
                retained: Vec::new(),
            };
        }
        if remote == base {
            return Merge {
                result: MergeResult::clean(local.to_vec()),
                retained: Vec::new(),
            };
        }
    }

    let local_slots = Slots::from_script(diff(base, local));
    let remote_slots = Slots::from_script(diff(base, remote));

    let mut result = MergeResult::default();
    let mut retained = Vec::new();
    let mut open: Option<ConflictRegion<T>> = None;

    for pos in 0..=base.len() {
        let item = base.get(pos);
        let ours = local_slots.at(pos);
        let theirs = remote_slots.at(pos);

        let disagree = ours.is_edit() && theirs.is_edit() && ours != theirs;
        let concatenable = options.concurrent_inserts == ConcurrentInserts::Concatenate
            && !ours.deleted
            && !theirs.deleted;

        if disagree && !concatenable {
            let region = open.get_or_insert_with(|| ConflictRegion {
                local: Vec::new(),
                remote: Vec::new(),
            });
            ours.render(item, &mut region.local);
            theirs.render(item, &mut region.remote);
            continue;
        }
        if let Some(region) = open.take() {
            result.push_conflict(region);
        }

        match (ours.is_edit(), theirs.is_edit()) {
            (true, true) if disagree => {
                result.push_clean(concatenate(ours.inserted, theirs.inserted));
                result.push_clean(item.cloned());
            }
            (true, _) => apply_one_sided(ours, theirs.is_edit(), item, options, &mut result, &mut retained),
            (false, true) => apply_one_sided(theirs, false, item, options, &mut result, &mut retained),
            (false, false) => result.push_clean(item.cloned()),
        }
    }
    if let Some(region) = open.take() {
        result.push_conflict(region);
    }

    Merge { result, retained }
}

fn apply_one_sided<T: Clone>(
    slot: Slot<'_, T>,
    other_side_edited: bool,
    item: Option<&T>,
    options: &MergeOptions,
    result: &mut MergeResult<T>,
    retained: &mut Vec<T>,
) {
    result.push_clean(slot.inserted.iter().cloned());
    let Some(item) = item else {
        return;
    };
    if !slot.deleted {
        result.push_clean(Some(item.clone()));
    } else if !options.propagate_deletions && !other_side_edited {
        result.push_clean(Some(item.clone()));
        retained.push(item.clone());
    }
}

fn concatenate<T: PartialEq + Clone>(ours: &[T], theirs: &[T]) -> Vec<T> {
    if theirs.starts_with(ours) {
        theirs.to_vec()
    } else if ours.starts_with(theirs) {
        ours.to_vec()
    } else {
        ours.iter().chain(theirs).cloned().collect()
    }
}

/// What one side did at one base position: the items it inserted before that
/// position and whether it removed the base item there.
#[derive(Debug, PartialEq, Eq)]
struct Slot<'a, T> {
    inserted: &'a [T],
    deleted: bool,
}

impl<T> Clone for Slot<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Slot<'_, T> {}

impl<T: Clone> Slot<'_, T> {
    fn is_edit(&self) -> bool {
        self.deleted || !self.inserted.is_empty()
    }

    fn render(&self, item: Option<&T>, out: &mut Vec<T>) {
        out.extend(self.inserted.iter().cloned());
        if let Some(item) = item.filter(|_| !self.deleted) {
            out.push(item.clone());
        }
    }
}

/// An edit script regrouped by base position.
struct Slots<T> {
    inserted: Vec<Vec<T>>,
    deleted: Vec<bool>,
}

impl<T> Slots<T> {
    fn from_script(script: EditScript<T>) -> Self {
        let base_len = script.base_len();
        let mut inserted: Vec<Vec<T>> = (0..=base_len).map(|_| Vec::new()).collect();
        let mut deleted = vec![false; base_len];
        for edit in script.into_edits() {
            match edit {
                Edit::Keep(_) => {}
                Edit::Delete(pos) => deleted[pos] = true,
                Edit::Insert { before, item } => inserted[before].push(item),
            }
        }
        Self { inserted, deleted }
    }

    fn at(&self, pos: usize) -> Slot<'_, T> {
        Slot {
            inserted: &self.inserted[pos],
            deleted: self.deleted.get(pos).copied().unwrap_or(false),
        }
    }
}
