//! Terminal results of a trade session.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How a session ended. Everything but `Success` is a cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeResult {
    Success,

    // Partner-side failures.
    NoTrainerFound,
    TrainerTooSlow,
    TrainerRequestBad,
    SuspiciousActivity,
    TradeEvolveNotAllowed,

    /// The worker was told to stop mid-session.
    RoutineCancel,

    // Faults on our side.
    ExceptionConnection,
    ExceptionInternal,

    // Device got into a state the session had to recover from.
    RecoverEnterMeetingPoint,
    RecoverReturnToMeetingPoint,
}

impl TradeResult {
    /// Failures caused by our side rather than the partner: worth one more
    /// attempt on behalf of the requester.
    pub fn should_attempt_retry(self) -> bool {
        matches!(
            self,
            TradeResult::RoutineCancel
                | TradeResult::ExceptionConnection
                | TradeResult::ExceptionInternal
                | TradeResult::RecoverEnterMeetingPoint
                | TradeResult::RecoverReturnToMeetingPoint
        )
    }

    pub fn is_success(self) -> bool {
        self == TradeResult::Success
    }
}

impl fmt::Display for TradeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TradeResult::Success => "trade completed",
            TradeResult::NoTrainerFound => "no trade partner showed up",
            TradeResult::TrainerTooSlow => "the trade partner took too long or left",
            TradeResult::TrainerRequestBad => "the trade partner offered something unusable",
            TradeResult::SuspiciousActivity => "the trade partner was refused",
            TradeResult::TradeEvolveNotAllowed => "the offered item would evolve on trade",
            TradeResult::RoutineCancel => "the bot was stopped",
            TradeResult::ExceptionConnection => "the bot lost its connection",
            TradeResult::ExceptionInternal => "the bot hit an internal error",
            TradeResult::RecoverEnterMeetingPoint => "the bot could not enter the meeting point",
            TradeResult::RecoverReturnToMeetingPoint => "the bot could not back out of the trade menus",
        };
        f.write_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partner_failures_are_not_retried() {
        for result in [
            TradeResult::NoTrainerFound,
            TradeResult::TrainerTooSlow,
            TradeResult::SuspiciousActivity,
            TradeResult::TradeEvolveNotAllowed,
            TradeResult::TrainerRequestBad,
            TradeResult::Success,
        ] {
            assert!(!result.should_attempt_retry(), "{result:?}");
        }
    }

    #[test]
    fn test_our_failures_are_retried() {
        for result in [
            TradeResult::RoutineCancel,
            TradeResult::ExceptionConnection,
            TradeResult::ExceptionInternal,
            TradeResult::RecoverEnterMeetingPoint,
            TradeResult::RecoverReturnToMeetingPoint,
        ] {
            assert!(result.should_attempt_retry(), "{result:?}");
        }
    }
}
