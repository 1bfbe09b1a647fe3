//! Order lifecycle state machine.
//!
//! Explicit states for a single routed order. Every transition goes through
//! [`OrderStatus::transition`], which rejects illegal moves — an illegal
//! transition is an OMS inconsistency the caller must treat as an alert,
//! never ignore.
//!
//! ```text
//! Pending ──► Submitted ──► Filled (terminal)
//!    │            │
//!    │            └──► Retrying ──► Submitted | Abandoned (terminal)
//!    │
//!    └──► Abandoned (terminal, validation refusal)
//!
//! any non-terminal ──► TimedOut (terminal, TWAP window exhausted)
//! ```

/// All states a routed order can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    /// Created, not yet handed to the gateway.
    Pending,
    /// Submitted to the gateway; awaiting fill confirmation.
    Submitted,
    /// A transient failure occurred; a retry is scheduled.
    Retrying,
    /// Fully filled. **Terminal.**
    Filled,
    /// Given up (validation refusal or retries exhausted). **Terminal.**
    Abandoned,
    /// The TWAP window plus grace elapsed. **Terminal.**
    TimedOut,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Abandoned | Self::TimedOut)
    }

    /// Apply a transition, rejecting illegal moves.
    pub fn transition(self, next: OrderStatus) -> Result<OrderStatus, OrderLifecycleError> {
        use OrderStatus::*;
        let legal = match (self, next) {
            (Pending, Submitted) | (Pending, Abandoned) => true,
            (Submitted, Filled) | (Submitted, Retrying) => true,
            (Retrying, Submitted) | (Retrying, Abandoned) => true,
            (from, TimedOut) if !from.is_terminal() => true,
            _ => false,
        };
        if legal {
            Ok(next)
        } else {
            Err(OrderLifecycleError { from: self, to: next })
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Submitted => "SUBMITTED",
            OrderStatus::Retrying => "RETRYING",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Abandoned => "ABANDONED",
            OrderStatus::TimedOut => "TIMED_OUT",
        }
    }
}

/// An illegal lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderLifecycleError {
    pub from: OrderStatus,
    pub to: OrderStatus,
}

impl std::fmt::Display for OrderLifecycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "illegal order transition: {} -> {}",
            self.from.as_str(),
            self.to.as_str()
        )
    }
}

impl std::error::Error for OrderLifecycleError {}

#[cfg(test)]
mod tests {
    use super::*;
    use OrderStatus::*;

    #[test]
    fn happy_path() {
        let s = Pending.transition(Submitted).unwrap();
        let s = s.transition(Filled).unwrap();
        assert!(s.is_terminal());
    }

    #[test]
    fn retry_loop_then_abandon() {
        let s = Pending.transition(Submitted).unwrap();
        let s = s.transition(Retrying).unwrap();
        let s = s.transition(Submitted).unwrap();
        let s = s.transition(Retrying).unwrap();
        let s = s.transition(Abandoned).unwrap();
        assert!(s.is_terminal());
    }

    #[test]
    fn validation_refusal_abandons_from_pending() {
        assert_eq!(Pending.transition(Abandoned).unwrap(), Abandoned);
    }

    #[test]
    fn timeout_from_any_live_state() {
        assert!(Pending.transition(TimedOut).is_ok());
        assert!(Submitted.transition(TimedOut).is_ok());
        assert!(Retrying.transition(TimedOut).is_ok());
    }

    #[test]
    fn terminal_states_reject_everything() {
        for terminal in [Filled, Abandoned, TimedOut] {
            for next in [Pending, Submitted, Retrying, Filled, Abandoned, TimedOut] {
                assert!(terminal.transition(next).is_err());
            }
        }
    }

    #[test]
    fn cannot_fill_before_submit() {
        let err = Pending.transition(Filled).unwrap_err();
        assert_eq!(err.from, Pending);
        assert_eq!(err.to, Filled);
    }
}
