use std::collections::BTreeMap;

use lanes_core::{LoopResult, ResultNavigation, StepId};

use crate::error::LoopError;

/// Where a finalized loop goes next and the result label it reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub result: String,
    pub next_step: StepId,
}

pub struct NavigationResolver;

impl NavigationResolver {
    /// Look up the navigation entry for `outcome`. A preset result on the
    /// entry replaces the outcome label.
    pub fn resolve(
        navigation: &BTreeMap<String, ResultNavigation>,
        outcome: LoopResult,
    ) -> Result<Transition, LoopError> {
        let entry = navigation
            .get(outcome.as_str())
            .ok_or_else(|| LoopError::MissingNavigation {
                result: outcome.to_string(),
            })?;
        Ok(Transition {
            result: entry
                .preset_result
                .clone()
                .unwrap_or_else(|| outcome.to_string()),
            next_step: entry.next_step,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> BTreeMap<String, ResultNavigation> {
        BTreeMap::from([
            (
                "SUCCESS".to_string(),
                ResultNavigation {
                    next_step: StepId(7),
                    preset_result: None,
                },
            ),
            (
                "FAILURE".to_string(),
                ResultNavigation {
                    next_step: StepId(0),
                    preset_result: Some("CUSTOM_FAILURE".to_string()),
                },
            ),
        ])
    }

    #[test]
    fn success_uses_outcome_label() {
        let t = NavigationResolver::resolve(&table(), LoopResult::Success).unwrap();
        assert_eq!(t.result, "SUCCESS");
        assert_eq!(t.next_step, StepId(7));
    }

    #[test]
    fn preset_result_overrides_label() {
        let t = NavigationResolver::resolve(&table(), LoopResult::Failure).unwrap();
        assert_eq!(t.result, "CUSTOM_FAILURE");
        assert_eq!(t.next_step, StepId(0));
    }

    #[test]
    fn missing_entry_is_fatal() {
        let mut nav = table();
        nav.remove("FAILURE");
        let err = NavigationResolver::resolve(&nav, LoopResult::Failure).unwrap_err();
        assert_eq!(
            err.to_string(),
            "no matching navigation for the parallel loop result: FAILURE"
        );
    }
}
