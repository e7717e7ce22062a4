//! Reviewer selection strategies.

use std::sync::Mutex;

use chrono::{Duration, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::config::{ModerationConfig, SelectorStrategy};
use crate::entity::{User, UserId};

/// Picks reviewers from an already-filtered candidate pool
///
/// Candidates never include the author. The queue checks whatever comes
/// back, so an implementation only has to make a choice, not enforce the
/// distinct-and-exact-count contract.
pub trait ReviewerSelector: Send + Sync {
    fn select(&self, candidates: &[User], count: usize) -> Vec<UserId>;

    fn name(&self) -> &'static str;
}

pub fn from_config(config: &ModerationConfig) -> Box<dyn ReviewerSelector> {
    let window = Duration::minutes(config.presence_window_minutes);
    match (config.selector, config.seed) {
        (SelectorStrategy::Uniform, None) => Box::new(UniformSelector::new()),
        (SelectorStrategy::Uniform, Some(seed)) => Box::new(UniformSelector::seeded(seed)),
        (SelectorStrategy::PresenceWeighted, None) => {
            Box::new(PresenceWeightedSelector::new(window))
        }
        (SelectorStrategy::PresenceWeighted, Some(seed)) => {
            Box::new(PresenceWeightedSelector::seeded(window, seed))
        }
    }
}

fn locked(rng: &Mutex<StdRng>) -> std::sync::MutexGuard<'_, StdRng> {
    rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Uniformly random choice without replacement
pub struct UniformSelector {
    rng: Mutex<StdRng>,
}

impl UniformSelector {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic sequence, for tests and reproducible runs
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for UniformSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl ReviewerSelector for UniformSelector {
    fn select(&self, candidates: &[User], count: usize) -> Vec<UserId> {
        let mut rng = locked(&self.rng);
        candidates
            .choose_multiple(&mut *rng, count)
            .map(|user| user.id)
            .collect()
    }

    fn name(&self) -> &'static str {
        "uniform"
    }
}

/// Prefers users seen within `window`; fills any gap uniformly from the rest
pub struct PresenceWeightedSelector {
    window: Duration,
    rng: Mutex<StdRng>,
}

impl PresenceWeightedSelector {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn seeded(window: Duration, seed: u64) -> Self {
        Self {
            window,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl ReviewerSelector for PresenceWeightedSelector {
    fn select(&self, candidates: &[User], count: usize) -> Vec<UserId> {
        let cutoff = Utc::now() - self.window;
        let (mut present, mut absent): (Vec<&User>, Vec<&User>) = candidates
            .iter()
            .partition(|user| user.last_seen_at.is_some_and(|seen| seen >= cutoff));

        let mut rng = locked(&self.rng);
        present.shuffle(&mut *rng);
        absent.shuffle(&mut *rng);

        present
            .into_iter()
            .chain(absent)
            .take(count)
            .map(|user| user.id)
            .collect()
    }

    fn name(&self) -> &'static str {
        "presence_weighted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn user(id: i64, seen_minutes_ago: Option<i64>) -> User {
        User {
            id: UserId(id),
            name: format!("user{}", id),
            active: true,
            unread_count: 0,
            last_seen_at: seen_minutes_ago.map(|m| Utc::now() - Duration::minutes(m)),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_uniform_picks_distinct_candidates() {
        let pool: Vec<User> = (1..=6).map(|i| user(i, None)).collect();
        let selector = UniformSelector::seeded(7);

        for _ in 0..50 {
            let picked = selector.select(&pool, 2);
            assert_eq!(picked.len(), 2);
            let distinct: HashSet<_> = picked.iter().collect();
            assert_eq!(distinct.len(), 2);
            assert!(picked.iter().all(|id| pool.iter().any(|u| u.id == *id)));
        }
    }

    #[test]
    fn test_uniform_reaches_every_candidate() {
        let pool: Vec<User> = (1..=4).map(|i| user(i, None)).collect();
        let selector = UniformSelector::seeded(42);

        let mut seen = HashSet::new();
        for _ in 0..200 {
            seen.extend(selector.select(&pool, 2));
        }
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn test_uniform_returns_fewer_when_pool_is_small() {
        let pool = vec![user(1, None)];
        assert_eq!(UniformSelector::seeded(1).select(&pool, 2).len(), 1);
    }

    #[test]
    fn test_presence_prefers_recent_users() {
        let pool = vec![
            user(1, None),
            user(2, Some(5)),
            user(3, Some(600)),
            user(4, Some(1)),
        ];
        let selector = PresenceWeightedSelector::seeded(Duration::minutes(30), 3);

        for _ in 0..20 {
            let picked: HashSet<_> = selector.select(&pool, 2).into_iter().collect();
            assert_eq!(picked, HashSet::from([UserId(2), UserId(4)]));
        }
    }

    #[test]
    fn test_presence_fills_from_the_rest() {
        let pool = vec![user(1, None), user(2, Some(5)), user(3, Some(600))];
        let selector = PresenceWeightedSelector::seeded(Duration::minutes(30), 9);

        let picked = selector.select(&pool, 2);
        assert_eq!(picked.len(), 2);
        assert_eq!(picked[0], UserId(2));
        assert_ne!(picked[1], UserId(2));
    }

    #[test]
    fn test_configured_seed_replays_the_draw() {
        let pool: Vec<User> = (1..=8).map(|i| user(i, None)).collect();
        let config = ModerationConfig {
            seed: Some(17),
            ..ModerationConfig::default()
        };

        let first = from_config(&config);
        let second = from_config(&config);
        assert_eq!(first.name(), "uniform");
        for _ in 0..10 {
            assert_eq!(first.select(&pool, 2), second.select(&pool, 2));
        }
    }
}
