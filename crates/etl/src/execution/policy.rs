use crate::models::{EventStatus, ExecutionStatus};

/// Derives the aggregate status of an event from its execution statuses.
pub struct EventStatusPolicy;

impl EventStatusPolicy {
    /// Order-independent resolution with fixed precedence:
    /// waiting, in progress, partial success, error, success, no data, pending.
    pub fn resolve<I>(statuses: I) -> EventStatus
    where
        I: IntoIterator<Item = ExecutionStatus>,
    {
        let mut waiting = false;
        let mut in_progress = false;
        let mut success = false;
        let mut no_data = false;
        let mut error = false;

        for status in statuses {
            match status {
                ExecutionStatus::Waiting => waiting = true,
                ExecutionStatus::InProgress => in_progress = true,
                ExecutionStatus::Success => success = true,
                ExecutionStatus::NoData => no_data = true,
                ExecutionStatus::Error => error = true,
                ExecutionStatus::Pending => {}
            }
        }

        if waiting {
            EventStatus::Waiting
        } else if in_progress {
            EventStatus::InProgress
        } else if error && success {
            EventStatus::PartialSuccess
        } else if error {
            EventStatus::Error
        } else if success {
            EventStatus::Success
        } else if no_data {
            EventStatus::NoData
        } else {
            EventStatus::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use ExecutionStatus::*;

    fn resolve(statuses: &[ExecutionStatus]) -> EventStatus {
        EventStatusPolicy::resolve(statuses.iter().copied())
    }

    #[test]
    fn precedence_table() {
        assert_eq!(resolve(&[Success]), EventStatus::Success);
        assert_eq!(resolve(&[Error]), EventStatus::Error);
        assert_eq!(resolve(&[Success, Error]), EventStatus::PartialSuccess);
        assert_eq!(resolve(&[NoData]), EventStatus::NoData);
        assert_eq!(resolve(&[Success, NoData]), EventStatus::Success);
        assert_eq!(resolve(&[]), EventStatus::Pending);
        assert_eq!(resolve(&[Waiting, Success, Error]), EventStatus::Waiting);
        assert_eq!(resolve(&[InProgress, Success, Error]), EventStatus::InProgress);
        assert_eq!(resolve(&[Waiting, InProgress]), EventStatus::Waiting);
        assert_eq!(resolve(&[Error, NoData]), EventStatus::Error);
        assert_eq!(resolve(&[Success, NoData, Error]), EventStatus::PartialSuccess);
        assert_eq!(resolve(&[Pending, Pending]), EventStatus::Pending);
        assert_eq!(resolve(&[Pending, Success]), EventStatus::Success);
    }

    fn statuses() -> impl Strategy<Value = Vec<ExecutionStatus>> {
        prop::collection::vec(prop::sample::select(ExecutionStatus::ALL.to_vec()), 0..12)
    }

    proptest! {
        #[test]
        fn resolution_is_order_independent(
            (original, shuffled) in statuses()
                .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle()))
        ) {
            prop_assert_eq!(resolve(&original), resolve(&shuffled));
        }

        #[test]
        fn duplicates_do_not_change_resolution(v in statuses()) {
            let mut doubled = v.clone();
            doubled.extend(v.iter().copied());
            prop_assert_eq!(resolve(&v), resolve(&doubled));
        }
    }
}
