//! Property-based tests using proptest
//!
//! Invariants that must hold for ALL registries and ledgers:
//! - Planning: `up` continues the applied prefix, `down` unwinds it LIFO
//! - Ledger: a non-prefix applied set is always reported as drift
//! - Builder: rendering is total on Postgres and deterministic

use proptest::prelude::*;
use std::collections::BTreeSet;

use chrono::Utc;
use stellar_schema::storage::backend::BackendKind;
use stellar_schema::storage::ledger::{checksum, LedgerEntry, LedgerState};
use stellar_schema::storage::migrations;
use stellar_schema::storage::runner::{plan_down, plan_up};
use stellar_schema::{Migration, Registry, Target, Transformation, Version};

struct Unit(Version);

impl Migration for Unit {
    fn version(&self) -> Version {
        self.0
    }
    fn name(&self) -> &'static str {
        "unit"
    }
    fn up(&self, _backend: BackendKind) -> Transformation {
        Transformation::native([format!("CREATE TABLE t{} (id INTEGER)", self.0)])
    }
    fn down(&self, _backend: BackendKind) -> Transformation {
        Transformation::native([format!("DROP TABLE t{}", self.0)])
    }
}

/// Strictly ascending positive versions
fn versions() -> impl Strategy<Value = Vec<Version>> {
    prop::collection::btree_set(1i64..500, 1..30).prop_map(|set| set.into_iter().collect())
}

fn entry(version: Version) -> LedgerEntry {
    LedgerEntry {
        version,
        name: "unit".into(),
        checksum: checksum(&[format!("CREATE TABLE t{} (id INTEGER)", version)]),
        applied_at: Utc::now(),
        dirty: false,
    }
}

// ============================================================
// Planning Properties
// ============================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_up_extends_applied_prefix(registry in versions(), applied in 0usize..30, target in 0i64..520) {
        let applied = applied.min(registry.len());
        let plan = plan_up(&registry, applied, Target::Version(target));

        let mut after: Vec<Version> = registry[..applied].to_vec();
        after.extend(&plan);
        prop_assert_eq!(&registry[..after.len()], after.as_slice(), "result must stay a registry prefix");
        prop_assert!(plan.windows(2).all(|w| w[0] < w[1]));
        prop_assert!(plan.iter().all(|v| *v <= target));

        // Nothing left that should have been included
        if let Some(next) = registry.get(after.len()) {
            prop_assert!(*next > target);
        }
    }

    #[test]
    fn prop_up_to_latest_then_again_is_noop(registry in versions(), applied in 0usize..30) {
        let applied = applied.min(registry.len());
        let plan = plan_up(&registry, applied, Target::Latest);
        prop_assert_eq!(applied + plan.len(), registry.len());
        prop_assert!(plan_up(&registry, registry.len(), Target::Latest).is_empty());
    }

    #[test]
    fn prop_down_is_lifo_and_leaves_prefix(registry in versions(), applied in 0usize..30, target in 0i64..520) {
        let applied = applied.min(registry.len());
        let prefix = &registry[..applied];
        let plan = plan_down(prefix, target);

        prop_assert!(plan.windows(2).all(|w| w[0] > w[1]));
        prop_assert!(plan.iter().all(|v| *v > target));

        let remaining = &prefix[..prefix.len() - plan.len()];
        prop_assert!(remaining.iter().all(|v| *v <= target));
        prop_assert_eq!(remaining, &registry[..remaining.len()]);
    }

    #[test]
    fn prop_non_prefix_ledger_is_drift(registry in versions(), picks in prop::collection::vec(any::<bool>(), 30)) {
        let units: Vec<Box<dyn Migration>> = registry
            .iter()
            .map(|&v| Box::new(Unit(v)) as Box<dyn Migration>)
            .collect();
        let reg = Registry::new(units).unwrap();

        let chosen: Vec<Version> = registry
            .iter()
            .zip(picks.iter())
            .filter(|(_, pick)| **pick)
            .map(|(v, _)| *v)
            .collect();
        let is_prefix = chosen.as_slice() == &registry[..chosen.len()];

        let state = LedgerState::analyze(
            &reg,
            chosen.iter().map(|&v| entry(v)).collect(),
            BackendKind::Sqlite,
        );
        prop_assert_eq!(state.gaps.is_empty(), is_prefix);
        prop_assert_eq!(state.ensure_consistent().is_ok(), is_prefix);
        prop_assert!(state.modified.is_empty());

        let gaps: BTreeSet<Version> = state.gaps.iter().copied().collect();
        let chosen_set: BTreeSet<Version> = chosen.iter().copied().collect();
        prop_assert!(gaps.is_disjoint(&chosen_set));
    }
}

// ============================================================
// Registry rendering
// ============================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    #[test]
    fn prop_game_units_render_deterministically(index in 0usize..12) {
        let registry = migrations::registry().unwrap();
        let unit = &registry.units()[index];
        for backend in [BackendKind::Sqlite, BackendKind::Postgres] {
            let first = unit.up(backend).render(backend).unwrap();
            let second = unit.up(backend).render(backend).unwrap();
            prop_assert_eq!(checksum(&first), checksum(&second));
        }
    }
}
