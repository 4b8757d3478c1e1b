//! Parameterized coverage of the Scheduler's complexity-to-role routing
//! table across the full threshold boundary set.

use kokoro_runtime::scheduler::Role;
use rstest::rstest;

#[rstest]
#[case(0.0, Role::Fast)]
#[case(0.1, Role::Fast)]
#[case(0.329, Role::Fast)]
#[case(0.33, Role::Balanced)]
#[case(0.5, Role::Balanced)]
#[case(0.669, Role::Balanced)]
#[case(0.67, Role::Heavy)]
#[case(0.99, Role::Heavy)]
#[case(1.0, Role::Heavy)]
fn routes_to_expected_role(#[case] complexity: f64, #[case] expected: Role) {
    assert_eq!(Role::for_complexity(complexity), expected);
}
