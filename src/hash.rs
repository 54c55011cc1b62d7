//! Hasher for the subscriber and dependency sets, keyed by arena ids.

use std::hash::BuildHasher;

use foldhash::fast::{FixedState, FoldHasher};

const SEED: u64 = 0x9e37_79b9_7f4a_7c15;

/// Builder for the arena id sets. Every instance hashes alike.
#[derive(Clone, Copy, Debug, Default)]
pub struct FastHashBuilder;

impl BuildHasher for FastHashBuilder {
    type Hasher = FoldHasher<'static>;

    #[inline]
    fn build_hasher(&self) -> Self::Hasher {
        FixedState::with_seed(SEED).build_hasher()
    }
}
