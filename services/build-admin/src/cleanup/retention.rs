//! Count- and age-based retention over stopped generations.

use std::collections::BTreeMap;
use std::time::Duration;

use buildadmin_id::BuildId;
use chrono::{DateTime, Utc};

/// A stopped generation as seen by a sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoppedGeneration {
    pub build_id: BuildId,
    pub stopped_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionSplit {
    /// Outside the retention window, oldest first within each family.
    pub expired: Vec<BuildId>,
    /// Inside the window.
    pub retained: Vec<BuildId>,
}

/// Split stopped generations into expired and retained.
///
/// Generations are grouped by `(app, table)` family and sorted by stop time,
/// then generation id. In each family the `reserve` most recent are retained
/// unless they stopped longer than `max_age` ago; everything older is
/// expired.
pub fn split_by_retention(
    stopped: Vec<StoppedGeneration>,
    reserve: usize,
    max_age: Option<Duration>,
    now: DateTime<Utc>,
) -> RetentionSplit {
    let mut families: BTreeMap<(String, String), Vec<StoppedGeneration>> = BTreeMap::new();
    for generation in stopped {
        let (app, table) = generation.build_id.family();
        families
            .entry((app.to_string(), table.to_string()))
            .or_default()
            .push(generation);
    }

    let mut split = RetentionSplit::default();
    for mut generations in families.into_values() {
        generations.sort_by(|a, b| {
            a.stopped_at
                .cmp(&b.stopped_at)
                .then_with(|| a.build_id.generation_id().cmp(&b.build_id.generation_id()))
        });

        let beyond_reserve = generations.len().saturating_sub(reserve);
        for (position, generation) in generations.into_iter().enumerate() {
            let too_old = max_age.is_some_and(|max_age| {
                (now - generation.stopped_at)
                    .to_std()
                    .is_ok_and(|age| age > max_age)
            });
            if position < beyond_reserve || too_old {
                split.expired.push(generation.build_id);
            } else {
                split.retained.push(generation.build_id);
            }
        }
    }
    split
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn stopped(id: &str, minutes_ago: i64, now: DateTime<Utc>) -> StoppedGeneration {
        StoppedGeneration {
            build_id: BuildId::parse(id).unwrap(),
            stopped_at: now - chrono::Duration::minutes(minutes_ago),
        }
    }

    fn ids(ids: &[BuildId]) -> Vec<String> {
        ids.iter().map(ToString::to_string).collect()
    }

    #[rstest]
    #[case(3, vec!["a:t:1", "a:t:2"])]
    #[case(5, vec![])]
    #[case(0, vec!["a:t:1", "a:t:2", "a:t:3", "a:t:4", "a:t:5"])]
    fn test_count_reserve(#[case] reserve: usize, #[case] expected: Vec<&str>) {
        let now = Utc::now();
        let generations = (1..=5)
            .map(|g| stopped(&format!("a:t:{g}"), 100 - g, now))
            .collect();
        let split = split_by_retention(generations, reserve, None, now);
        assert_eq!(ids(&split.expired), expected);
        assert_eq!(split.expired.len() + split.retained.len(), 5);
    }

    #[test]
    fn test_sorted_by_stop_time_not_generation() {
        let now = Utc::now();
        // Generation 9 stopped first.
        let generations = vec![
            stopped("a:t:1", 10, now),
            stopped("a:t:9", 50, now),
            stopped("a:t:2", 5, now),
        ];
        let split = split_by_retention(generations, 2, None, now);
        assert_eq!(ids(&split.expired), vec!["a:t:9"]);
    }

    #[test]
    fn test_equal_stop_time_ordered_by_generation() {
        let now = Utc::now();
        let generations = vec![stopped("a:t:3", 10, now), stopped("a:t:2", 10, now)];
        let split = split_by_retention(generations, 1, None, now);
        assert_eq!(ids(&split.expired), vec!["a:t:2"]);
    }

    #[test]
    fn test_families_are_independent() {
        let now = Utc::now();
        let generations = vec![
            stopped("a:t:1", 30, now),
            stopped("a:t:2", 20, now),
            stopped("b:t:1", 40, now),
        ];
        let split = split_by_retention(generations, 1, None, now);
        assert_eq!(ids(&split.expired), vec!["a:t:1"]);
        assert_eq!(ids(&split.retained), vec!["a:t:2", "b:t:1"]);
    }

    #[test]
    fn test_age_limit_overrides_reserve() {
        let now = Utc::now();
        let generations = vec![stopped("a:t:1", 120, now), stopped("a:t:2", 10, now)];
        let split = split_by_retention(generations, 5, Some(Duration::from_secs(3600)), now);
        assert_eq!(ids(&split.expired), vec!["a:t:1"]);
    }
}
