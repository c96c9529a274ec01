use super::field_map::{FieldEntry, FieldMap};
use crate::oracle::FieldFragment;

/// Folds per-chunk fragments into one map, in chunk order.
///
/// A name seen in several chunks keeps the highest-confidence entry; on a tie
/// the earlier chunk wins. Entries keep the position of their first sighting.
pub fn merge_fragments(fragments: Vec<FieldFragment>) -> FieldMap {
    let mut merged = FieldMap::new();
    for fragment in fragments {
        for field in fragment.fields {
            let entry = FieldEntry::from_oracle(field);
            match merged.get(&entry.name) {
                Some(existing) if existing.confidence >= entry.confidence => {}
                _ => merged.insert(entry),
            }
        }
    }
    merged
}
