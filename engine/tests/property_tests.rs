//! Property-based tests for insight ranking and terminal status

use proptest::prelude::*;
use sdk::{ExecutionSummary, Insight, InsightCategory, SessionStatus};
use waypoint_engine::conductor::aggregator::{rank, terminal_status, MAX_INSIGHTS};

fn insight_strategy() -> impl Strategy<Value = Insight> {
    (
        prop_oneof![
            Just(InsightCategory::Trend),
            Just(InsightCategory::Anomaly),
            Just(InsightCategory::Recommendation),
        ],
        "[a-z ]{1,20}",
        prop_oneof![-1.0f64..2.0, Just(f64::NAN)],
        prop::collection::vec(1u32..10, 0..3),
    )
        .prop_map(|(category, description, importance, related_steps)| Insight {
            category,
            description,
            importance,
            related_steps,
        })
}

proptest! {
    #[test]
    fn ranked_insights_are_bounded_and_sorted(
        insights in prop::collection::vec(insight_strategy(), 0..12)
    ) {
        let total = insights.len();
        let ranked = rank(insights);

        prop_assert_eq!(ranked.len(), total.min(MAX_INSIGHTS));
        for insight in &ranked {
            prop_assert!((0.0..=1.0).contains(&insight.importance));
        }
        for pair in ranked.windows(2) {
            prop_assert!(pair[0].importance >= pair[1].importance);
        }
    }

    #[test]
    fn ranking_is_deterministic(
        insights in prop::collection::vec(insight_strategy(), 0..12)
    ) {
        let first = rank(insights.clone());
        let second = rank(insights);
        prop_assert_eq!(
            first.iter().map(|i| &i.description).collect::<Vec<_>>(),
            second.iter().map(|i| &i.description).collect::<Vec<_>>()
        );
    }

    #[test]
    fn session_fails_only_when_all_steps_fail(
        total in 1usize..20,
        failed_share in 0usize..20,
    ) {
        let failed = failed_share.min(total);
        let summary = ExecutionSummary {
            total_steps: total,
            completed_steps: total - failed,
            failed_steps: failed,
            hitl_interactions: 0,
        };

        let expected = if failed == total {
            SessionStatus::Failed
        } else {
            SessionStatus::Completed
        };
        prop_assert_eq!(terminal_status(&summary), expected);
    }
}
