//! The request ⊃ iteration ⊃ model ⊃ providerCall cancellation
//! hierarchy (§4.4.1, §4.4.4).
//!
//! Built on `tokio_util::sync::CancellationToken`'s `.child_token()`,
//! the idiomatic equivalent of the bespoke `CancellationToken`/
//! `CancellableRun` pair some agent-runtime crates hand-roll, but reusing
//! the standard ecosystem type: cancelling a parent token cancels every
//! child transitively, and a token can be cloned freely to observe
//! cancellation from many tasks at once.
//!
//! Each level races its scoped work against both its own numeric budget
//! (`tokio::time::timeout`-style `tokio::select!` against a sleep) and
//! against the token being cancelled from above — whichever fires first
//! wins. When a level's own budget expires, it cancels its own token,
//! which cascades to every descendant.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// How a budget-scoped future ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetOutcome<T> {
    /// The future completed before the budget or an ancestor cancellation.
    Completed(T),
    /// This level's own numeric budget elapsed first.
    Expired,
    /// An ancestor budget expired (or cancellation was requested
    /// externally) before this level's own budget or the future.
    Cancelled,
}

impl<T> BudgetOutcome<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            BudgetOutcome::Completed(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BudgetOutcome::Expired | BudgetOutcome::Cancelled)
    }
}

/// One level of the budget hierarchy: a cancellation token plus the
/// numeric duration this level enforces on its own scoped work.
///
/// The `iteration` level in the request ⊃ iteration ⊃ model ⊃
/// providerCall hierarchy has no independent numeric budget of its own
/// (§4.4.1's table only names request/model/providerCall/justifier) — it
/// exists purely as a cancellation scope between request and model, so
/// its `budget` is `None` and it is bounded only by however much of the
/// request budget remains.
#[derive(Debug, Clone)]
pub struct BudgetScope {
    token: CancellationToken,
    budget: Option<Duration>,
}

impl BudgetScope {
    /// The root scope (the `request` budget). Has no parent to inherit
    /// cancellation from.
    pub fn root(budget: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            budget: Some(budget),
        }
    }

    /// A child scope with its own numeric budget (model ⊂ iteration,
    /// providerCall ⊂ model) whose token cancels automatically when this
    /// scope's token does, per the `tokio_util` child-token contract. Per
    /// §9 Open Question (iii), the child's own budget never extends past
    /// the time remaining in the parent — the parent deadline is
    /// authoritative regardless of what duration is requested here; that
    /// authority is enforced naturally since a parent cancellation always
    /// wins the `select!` race in [`BudgetScope::run`].
    pub fn child(&self, budget: Duration) -> Self {
        Self {
            token: self.token.child_token(),
            budget: Some(budget),
        }
    }

    /// A child scope with no numeric budget of its own (the `iteration`
    /// level): bounded only by the parent's remaining budget.
    pub fn child_unbounded(&self) -> Self {
        Self {
            token: self.token.child_token(),
            budget: None,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel this scope and every descendant scope derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Race `fut` against this scope's own budget (if any) and against
    /// ancestor cancellation. If the budget elapses first, this scope's
    /// token is cancelled so all descendant work unwinds too.
    pub async fn run<F, T>(&self, fut: F) -> BudgetOutcome<T>
    where
        F: Future<Output = T>,
    {
        match self.budget {
            Some(budget) => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => BudgetOutcome::Cancelled,
                    _ = tokio::time::sleep(budget) => {
                        self.token.cancel();
                        BudgetOutcome::Expired
                    }
                    out = fut => BudgetOutcome::Completed(out),
                }
            }
            None => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => BudgetOutcome::Cancelled,
                    out = fut => BudgetOutcome::Completed(out),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn completes_before_budget_elapses() {
        let scope = BudgetScope::root(Duration::from_secs(10));
        let outcome = scope.run(async { 42 }).await;
        assert_eq!(outcome, BudgetOutcome::Completed(42));
    }

    #[tokio::test(start_paused = true)]
    async fn expires_when_future_never_resolves() {
        let scope = BudgetScope::root(Duration::from_millis(100));
        let outcome: BudgetOutcome<()> = scope.run(std::future::pending()).await;
        assert_eq!(outcome, BudgetOutcome::Expired);
        assert!(scope.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn child_cancellation_propagates_from_parent_expiry() {
        let parent = BudgetScope::root(Duration::from_millis(50));
        let child = parent.child(Duration::from_secs(10));

        let (parent_outcome, child_outcome) = tokio::join!(
            parent.run(std::future::pending::<()>()),
            child.run(std::future::pending::<()>())
        );

        assert_eq!(parent_outcome, BudgetOutcome::Expired);
        assert_eq!(child_outcome, BudgetOutcome::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn child_budget_never_outlives_parent_deadline_in_practice() {
        // The child's own budget (10s) is longer than the parent's (50ms);
        // the parent's cancellation still wins the race.
        let parent = BudgetScope::root(Duration::from_millis(50));
        let child = parent.child(Duration::from_secs(10));
        let start = tokio::time::Instant::now();

        let outcome: BudgetOutcome<()> = child.run(std::future::pending()).await;

        assert_eq!(outcome, BudgetOutcome::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
