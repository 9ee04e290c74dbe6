//! Debounced status classification.

use std::fmt;

/// The debounced health of a target. `Pending` means a failure was observed
/// but the retry budget is not yet exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Up,
    Pending,
    Down,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Up => "UP",
            Status::Pending => "PENDING",
            Status::Down => "DOWN",
        })
    }
}

/// Map a raw probe outcome onto the debounced status and the updated retry
/// counter.
///
/// The counter is deliberately not reset on `Up`; the check loop owns that
/// reset, which keeps this function pure and lets a target that was up with
/// a partially consumed budget re-enter `Pending` correctly.
pub fn classify(raw_up: bool, prior_up: Option<bool>, retries: u32, max_retries: u32) -> (Status, u32) {
    if raw_up {
        return (Status::Up, retries);
    }

    if prior_up == Some(true) {
        if retries < max_retries {
            return (Status::Pending, retries + 1);
        }
        return (Status::Down, retries);
    }

    // Previously down, or never checked at all.
    if retries > 0 && retries < max_retries {
        return (Status::Pending, retries + 1);
    }
    if retries == 0 && max_retries > 0 {
        return (Status::Pending, 1);
    }

    (Status::Down, retries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_transitions() {
        struct Case {
            name: &'static str,
            raw_up: bool,
            prior_up: Option<bool>,
            retries: u32,
            max_retries: u32,
            expected_status: Status,
            expected_retries: u32,
        }

        let cases = [
            Case {
                name: "current up always up",
                raw_up: true,
                prior_up: Some(false),
                retries: 2,
                max_retries: 3,
                expected_status: Status::Up,
                expected_retries: 2,
            },
            Case {
                name: "was up, retries remaining -> pending",
                raw_up: false,
                prior_up: Some(true),
                retries: 0,
                max_retries: 3,
                expected_status: Status::Pending,
                expected_retries: 1,
            },
            Case {
                name: "was up, retries exhausted -> down",
                raw_up: false,
                prior_up: Some(true),
                retries: 3,
                max_retries: 3,
                expected_status: Status::Down,
                expected_retries: 3,
            },
            Case {
                name: "was down, still retrying -> pending",
                raw_up: false,
                prior_up: Some(false),
                retries: 1,
                max_retries: 3,
                expected_status: Status::Pending,
                expected_retries: 2,
            },
            Case {
                name: "was down, first failure with retries -> pending",
                raw_up: false,
                prior_up: Some(false),
                retries: 0,
                max_retries: 3,
                expected_status: Status::Pending,
                expected_retries: 1,
            },
            Case {
                name: "retries disabled -> down",
                raw_up: false,
                prior_up: Some(false),
                retries: 0,
                max_retries: 0,
                expected_status: Status::Down,
                expected_retries: 0,
            },
            Case {
                name: "retries exhausted -> down",
                raw_up: false,
                prior_up: Some(false),
                retries: 3,
                max_retries: 3,
                expected_status: Status::Down,
                expected_retries: 3,
            },
            Case {
                name: "never checked, failure with retries -> pending",
                raw_up: false,
                prior_up: None,
                retries: 0,
                max_retries: 1,
                expected_status: Status::Pending,
                expected_retries: 1,
            },
            Case {
                name: "never checked, retries disabled -> down",
                raw_up: false,
                prior_up: None,
                retries: 0,
                max_retries: 0,
                expected_status: Status::Down,
                expected_retries: 0,
            },
            Case {
                name: "never checked, success -> up",
                raw_up: true,
                prior_up: None,
                retries: 0,
                max_retries: 3,
                expected_status: Status::Up,
                expected_retries: 0,
            },
        ];

        for case in cases {
            let (status, retries) = classify(case.raw_up, case.prior_up, case.retries, case.max_retries);
            assert_eq!(status, case.expected_status, "{}", case.name);
            assert_eq!(retries, case.expected_retries, "{}", case.name);
        }
    }

    #[test]
    fn test_classify_is_pure() {
        let first = classify(false, Some(true), 1, 3);
        let second = classify(false, Some(true), 1, 3);
        assert_eq!(first, second);
    }

    #[test]
    fn test_retries_never_exceed_budget() {
        for max_retries in 0..5u32 {
            for retries in 0..=max_retries {
                for prior_up in [None, Some(true), Some(false)] {
                    let (_, new_retries) = classify(false, prior_up, retries, max_retries);
                    assert!(new_retries <= max_retries);
                }
            }
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(Status::Up.to_string(), "UP");
        assert_eq!(Status::Pending.to_string(), "PENDING");
        assert_eq!(Status::Down.to_string(), "DOWN");
    }
}
