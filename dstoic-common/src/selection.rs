//! Least-recently-used selection with random tie-break
//!
//! Narrows a snapshot to the records tied at the minimum ordering value and
//! picks one uniformly at random. Many records sharing the never-used value 0
//! therefore all have the same chance of being posted next.

use crate::models::QuoteRecord;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, warn};

/// Anything ranked by recency of use
pub trait UsageOrdered {
    /// `None` when the value is missing or not numeric
    fn ordering_value(&self) -> Option<i64>;
}

impl UsageOrdered for QuoteRecord {
    fn ordering_value(&self) -> Option<i64> {
        Some(self.usage.ordering_value())
    }
}

impl<T: UsageOrdered + ?Sized> UsageOrdered for &T {
    fn ordering_value(&self) -> Option<i64> {
        (**self).ordering_value()
    }
}

/// Records tied at the minimum ordering value, in input order
pub fn eligible_set<T: UsageOrdered>(items: &[T]) -> Vec<&T> {
    let min_value = match items.iter().filter_map(|item| item.ordering_value()).min() {
        Some(min) => min,
        None => return Vec::new(),
    };

    items
        .iter()
        .filter(|item| item.ordering_value() == Some(min_value))
        .collect()
}

/// Choose the next item to use
///
/// Returns `None` for an empty input or one without any valid ordering
/// value; callers treat that as "nothing to do".
pub fn select_least_recently_used<'a, T, R>(items: &'a [T], rng: &mut R) -> Option<&'a T>
where
    T: UsageOrdered,
    R: Rng + ?Sized,
{
    if items.is_empty() {
        warn!("Cannot select a quote from an empty list");
        return None;
    }

    let eligible = eligible_set(items);
    if eligible.is_empty() {
        warn!(
            candidates = items.len(),
            "No quotes with a valid usage ordering value"
        );
        return None;
    }

    debug!(
        candidates = items.len(),
        eligible = eligible.len(),
        "Selecting among least recently used quotes"
    );

    eligible.choose(rng).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[derive(Debug, PartialEq)]
    struct Item {
        name: &'static str,
        value: Option<i64>,
    }

    impl UsageOrdered for Item {
        fn ordering_value(&self) -> Option<i64> {
            self.value
        }
    }

    fn item(name: &'static str, value: Option<i64>) -> Item {
        Item { name, value }
    }

    #[test]
    fn test_empty_input_returns_none() {
        let mut rng = StdRng::seed_from_u64(1);
        let items: Vec<Item> = Vec::new();
        assert!(select_least_recently_used(&items, &mut rng).is_none());
    }

    #[test]
    fn test_all_invalid_returns_none() {
        let mut rng = StdRng::seed_from_u64(1);
        let items = vec![item("a", None), item("b", None)];
        assert!(select_least_recently_used(&items, &mut rng).is_none());
        assert!(eligible_set(&items).is_empty());
    }

    #[test]
    fn test_invalid_values_are_ignored() {
        let mut rng = StdRng::seed_from_u64(7);
        let items = vec![item("missing", None), item("old", Some(50)), item("new", Some(900))];
        for _ in 0..50 {
            let chosen = select_least_recently_used(&items, &mut rng).unwrap();
            assert_eq!(chosen.name, "old");
        }
    }

    #[test]
    fn test_unique_minimum_is_deterministic() {
        let mut rng = StdRng::seed_from_u64(42);
        let items = vec![item("a", Some(300)), item("b", Some(10)), item("c", Some(200))];
        for _ in 0..100 {
            assert_eq!(select_least_recently_used(&items, &mut rng).unwrap().name, "b");
        }
    }

    #[test]
    fn test_selected_value_is_minimum() {
        let mut rng = StdRng::seed_from_u64(3);
        let items = vec![
            item("a", Some(5)),
            item("b", Some(0)),
            item("c", Some(0)),
            item("d", Some(-2)),
            item("e", Some(-2)),
        ];
        for _ in 0..100 {
            let chosen = select_least_recently_used(&items, &mut rng).unwrap();
            assert_eq!(chosen.value, Some(-2));
        }
    }

    #[test]
    fn test_tied_minimum_split_evenly() {
        // [100, 200, 100] over 1000 trials: first and third about half each
        let mut rng = StdRng::seed_from_u64(2024);
        let items = vec![item("one", Some(100)), item("two", Some(200)), item("three", Some(100))];

        let mut counts = [0usize; 3];
        for _ in 0..1000 {
            let chosen = select_least_recently_used(&items, &mut rng).unwrap();
            let idx = items.iter().position(|i| i == chosen).unwrap();
            counts[idx] += 1;
        }

        assert_eq!(counts[1], 0, "record with newer timestamp must never be chosen");
        assert_eq!(counts[0] + counts[2], 1000);
        assert!((400..=600).contains(&counts[0]), "first picked {} times", counts[0]);
        assert!((400..=600).contains(&counts[2]), "third picked {} times", counts[2]);
    }

    #[test]
    fn test_many_way_tie_is_roughly_uniform() {
        let mut rng = StdRng::seed_from_u64(99);
        let items: Vec<Item> = ["a", "b", "c", "d", "e"]
            .into_iter()
            .map(|name| item(name, Some(0)))
            .collect();

        let mut counts = [0usize; 5];
        for _ in 0..5000 {
            let chosen = select_least_recently_used(&items, &mut rng).unwrap();
            counts[items.iter().position(|i| i == chosen).unwrap()] += 1;
        }

        for (idx, count) in counts.iter().enumerate() {
            assert!((800..=1200).contains(count), "item {} picked {} times", idx, count);
        }
    }

    #[test]
    fn test_eligible_set_preserves_input_order() {
        let items = vec![item("a", Some(1)), item("b", Some(0)), item("c", Some(0))];
        let names: Vec<_> = eligible_set(&items).iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["b", "c"]);
    }
}
