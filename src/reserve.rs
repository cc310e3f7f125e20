//! Emergency reserve check run against every child before it is finalized.
//!
//! The wallet keeps a fixed balance available to close channels unilaterally. A bump that
//! would leave less than that behind is blocked unless the caller explicitly overrides it.

use bitcoin::Amount;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveDecision {
    /// The reserve stays intact.
    Clear,
    /// The reserve would be breached but the caller accepted it.
    Overridden { warning: String },
    Blocked { warning: String },
}

impl ReserveDecision {
    pub fn warning(&self) -> Option<&str> {
        match self {
            ReserveDecision::Clear => None,
            ReserveDecision::Overridden { warning } | ReserveDecision::Blocked { warning } => {
                Some(warning)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReserveGuard {
    pub unreserved_balance: Amount,
    pub threshold: Amount,
    pub allow_override: bool,
}

impl ReserveGuard {
    pub fn new(unreserved_balance: Amount, threshold: Amount, allow_override: bool) -> Self {
        Self {
            unreserved_balance,
            threshold,
            allow_override,
        }
    }

    /// Balance left once `spent` wallet value is consumed by the child.
    ///
    /// Only wallet inputs count. The parent's change output is not part of the balance the
    /// reserve protects.
    pub fn post_spend_balance(&self, spent: Amount) -> Amount {
        self.unreserved_balance
            .checked_sub(spent)
            .unwrap_or(Amount::ZERO)
    }

    pub fn evaluate(&self, spent: Amount) -> ReserveDecision {
        let remaining = self.post_spend_balance(spent);

        if remaining >= self.threshold {
            return ReserveDecision::Clear;
        }

        let warning = format!(
            "Bump would leave {} sats, below {} sat emergency reserve.",
            remaining.to_sat(),
            self.threshold.to_sat()
        );

        if self.allow_override {
            warn!("{} Continuing because the override flag is set.", warning);
            ReserveDecision::Overridden { warning }
        } else {
            warn!("{}", warning);
            ReserveDecision::Blocked { warning }
        }
    }
}
