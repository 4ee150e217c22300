//! # Sequence Translation
//!
//! Channel delivery tags restart at 1 whenever a channel is recreated. The
//! publisher keys its confirm cache by an *internal* sequence number instead:
//! `delivery tag + offset`, where the offset is the largest internal number
//! issued before the current channel generation started. Internal numbers are
//! therefore strictly increasing for the lifetime of the publisher.
//!
//! The translator is plain data. It is owned by the channel lifecycle state and
//! only mutated while that state's lock is held.

/// Offset and high-water mark for internal sequence numbers
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SequenceTranslator {
    offset: u64,
    largest_seen: u64,
}

impl SequenceTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offset applied to the current channel generation
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Largest internal sequence number issued so far, confirmed or not
    pub fn largest_seen(&self) -> u64 {
        self.largest_seen
    }

    /// Issue the internal number for a publish with channel-local sequence `local_seq`
    pub fn allocate(&mut self, local_seq: u64) -> u64 {
        let internal = self.to_internal(local_seq);
        if internal > self.largest_seen {
            self.largest_seen = internal;
        }
        internal
    }

    /// Translate a delivery tag of the current generation
    pub fn to_internal(&self, delivery_tag: u64) -> u64 {
        delivery_tag.saturating_add(self.offset)
    }

    /// Start a new channel generation above everything issued so far
    pub fn advance_offset(&mut self) {
        self.offset = self.largest_seen;
    }

    /// Internal numbers resolved by a confirm for `delivery_tag`
    ///
    /// A single confirm resolves exactly its own tag. A cumulative confirm also
    /// resolves every pending key of the current generation below it, i.e. keys
    /// in `(offset, target)`. Keys at or below the offset belong to superseded
    /// channels and are never included. Result is in ascending order.
    pub fn confirmed_tags<I>(&self, delivery_tag: u64, multiple: bool, pending_keys: I) -> Vec<u64>
    where
        I: IntoIterator<Item = u64>,
    {
        let target = self.to_internal(delivery_tag);
        let mut tags = Vec::new();
        if multiple {
            tags.extend(
                pending_keys
                    .into_iter()
                    .filter(|key| *key > self.offset && *key < target),
            );
            tags.sort_unstable();
            tags.dedup();
        }
        tags.push(target);
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_tracks_high_water_mark() {
        let mut translator = SequenceTranslator::new();
        assert_eq!(translator.allocate(1), 1);
        assert_eq!(translator.allocate(2), 2);
        assert_eq!(translator.allocate(5), 5);
        assert_eq!(translator.largest_seen(), 5);
        assert_eq!(translator.offset(), 0);
    }

    #[test]
    fn test_new_generation_continues_above_previous() {
        let mut translator = SequenceTranslator::new();
        for local in 1..=5 {
            translator.allocate(local);
        }
        translator.advance_offset();
        assert_eq!(translator.offset(), 5);

        // the replacement channel restarts its local numbering at 1
        assert_eq!(translator.allocate(1), 6);
        assert_eq!(translator.to_internal(1), 6);
    }

    #[test]
    fn test_single_confirm_resolves_only_its_tag() {
        let translator = SequenceTranslator::new();
        assert_eq!(translator.confirmed_tags(2, false, vec![1, 2, 3]), vec![2]);
    }

    #[test]
    fn test_cumulative_confirm_resolves_earlier_keys() {
        let translator = SequenceTranslator::new();
        assert_eq!(
            translator.confirmed_tags(3, true, vec![3, 1, 2, 7]),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_cumulative_confirm_skips_previous_generation() {
        let mut translator = SequenceTranslator::new();
        for local in 1..=5 {
            translator.allocate(local);
        }
        translator.advance_offset();
        translator.allocate(1);
        translator.allocate(2);

        // keys 3, 4 and 5 are stale entries of the first channel
        let tags = translator.confirmed_tags(2, true, vec![3, 4, 5, 6, 7]);
        assert_eq!(tags, vec![6, 7]);
    }

    #[test]
    fn test_target_included_even_when_not_pending() {
        let translator = SequenceTranslator::new();
        assert_eq!(translator.confirmed_tags(4, true, Vec::new()), vec![4]);
    }
}
