//! Rejection sampling of negative items.
use std::collections::HashSet;

use rand::distributions::{Distribution, Uniform};
use rand::Rng;

use super::ItemId;

/// Draws items uniformly from `[low, high)`, skipping excluded items.
#[derive(Clone, Debug)]
pub struct NegativeSampler {
    low: ItemId,
    high: ItemId,
    range: Uniform<ItemId>,
}

impl NegativeSampler {
    /// Create a sampler over `[low, high)`.
    ///
    /// Panics if the range is empty.
    pub fn new(low: ItemId, high: ItemId) -> Self {
        NegativeSampler {
            low,
            high,
            range: Uniform::new(low, high),
        }
    }

    /// Sampler over all items `1..=num_items`.
    pub fn for_items(num_items: usize) -> Self {
        Self::new(1, num_items + 1)
    }

    /// Number of items in the range.
    pub fn span(&self) -> usize {
        self.high - self.low
    }

    /// Whether `exclude` leaves at least one item to draw.
    ///
    /// `draw` does not terminate when this is false.
    pub fn can_sample(&self, exclude: &HashSet<ItemId>) -> bool {
        let blocked = exclude
            .iter()
            .filter(|&&item| item >= self.low && item < self.high)
            .count();

        blocked < self.span()
    }

    /// Draw an item not in `exclude`, redrawing on collision.
    pub fn draw<R: Rng>(&self, rng: &mut R, exclude: &HashSet<ItemId>) -> ItemId {
        debug_assert!(self.can_sample(exclude));

        loop {
            let item = self.range.sample(rng);

            if !exclude.contains(&item) {
                return item;
            }
        }
    }
}

/// Draw one integer in `[low, high)` that is not in `exclude`.
pub fn random_neq<R: Rng>(
    rng: &mut R,
    low: ItemId,
    high: ItemId,
    exclude: &HashSet<ItemId>,
) -> ItemId {
    NegativeSampler::new(low, high).draw(rng, exclude)
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::SeedableRng;
    use rand_xorshift::XorShiftRng;

    #[test]
    fn draws_avoid_excluded_items() {
        let mut rng = XorShiftRng::seed_from_u64(42);

        for _ in 0..500 {
            let low = rng.gen_range(0..10);
            let high = low + rng.gen_range(1..12);
            let span = high - low;

            // Leave at least one item free.
            let num_excluded = rng.gen_range(0..span);
            let mut exclude: HashSet<ItemId> =
                (0..num_excluded).map(|_| rng.gen_range(low..high)).collect();

            // Out-of-range exclusions must not affect the draw.
            for _ in 0..3 {
                exclude.insert(rng.gen_range(high..high + 5));
            }

            let sampler = NegativeSampler::new(low, high);
            assert!(sampler.can_sample(&exclude));

            for _ in 0..20 {
                let item = sampler.draw(&mut rng, &exclude);
                assert!(item >= low && item < high);
                assert!(!exclude.contains(&item));
            }
        }
    }

    #[test]
    fn single_free_item_is_always_drawn() {
        let mut rng = XorShiftRng::seed_from_u64(7);
        let exclude: HashSet<ItemId> = [1, 2, 4, 5].iter().cloned().collect();

        for _ in 0..50 {
            assert_eq!(random_neq(&mut rng, 1, 6, &exclude), 3);
        }
    }

    #[test]
    fn full_exclusion_is_detected() {
        let sampler = NegativeSampler::for_items(3);
        let exclude: HashSet<ItemId> = [0, 1, 2, 3].iter().cloned().collect();

        assert_eq!(sampler.span(), 3);
        assert!(!sampler.can_sample(&exclude));
    }
}
