//! Ordered fallback chains.
//!
//! Extraction degrades through strategies of decreasing quality: PDF text
//! layer before OCR, remote OCR before local, anything before a uniform
//! split. Rather than encoding that ladder as nested error handling, each
//! rung is a named [`Strategy`] and [`run_chain`] walks the list, returning
//! the first produced value. Every skipped rung leaves a reason behind, so
//! an exhausted chain can say exactly why each alternative was rejected
//! instead of surfacing only the last failure.
//!
//! A strategy future yields `Ok(None)` when it declines (not applicable to
//! this input) and `Err` when it genuinely failed; the chain treats both as
//! "move on", they differ only in the recorded reason.

use futures::future::{BoxFuture, FutureExt};
use std::fmt::Display;
use std::future::Future;
use tracing::debug;

/// One rung of a fallback chain: a name for diagnostics plus the work
/// itself. The future is inert until the chain reaches it.
pub struct Strategy<'a, T, E> {
    name: &'static str,
    future: BoxFuture<'a, Result<Option<T>, E>>,
}

impl<'a, T, E> Strategy<'a, T, E> {
    pub fn new<F>(name: &'static str, future: F) -> Self
    where
        F: Future<Output = Result<Option<T>, E>> + Send + 'a,
    {
        Self {
            name,
            future: future.boxed(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T, E> std::fmt::Debug for Strategy<'_, T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Strategy").field("name", &self.name).finish()
    }
}

/// Why one strategy produced no value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategySkip {
    pub strategy: &'static str,
    pub reason: String,
}

/// Every strategy in the chain declined or failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainExhausted {
    pub chain: &'static str,
    pub skips: Vec<StrategySkip>,
}

impl ChainExhausted {
    /// One-line account of the whole chain, oldest rung first.
    pub fn summary(&self) -> String {
        if self.skips.is_empty() {
            return format!("{}: no strategies attempted", self.chain);
        }
        let parts: Vec<String> = self
            .skips
            .iter()
            .map(|skip| format!("{}: {}", skip.strategy, skip.reason))
            .collect();
        format!("{}: {}", self.chain, parts.join("; "))
    }
}

impl Display for ChainExhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.summary())
    }
}

/// Run the strategies in order and return the first produced value.
///
/// Later strategies are never polled once one succeeds. On exhaustion the
/// caller gets every skip reason in chain order.
pub async fn run_chain<T, E: Display>(
    chain: &'static str,
    strategies: Vec<Strategy<'_, T, E>>,
) -> Result<T, ChainExhausted> {
    let mut skips = Vec::new();
    for strategy in strategies {
        let name = strategy.name;
        match strategy.future.await {
            Ok(Some(value)) => {
                debug!(
                    chain,
                    strategy = name,
                    skipped = skips.len(),
                    "fallback chain settled"
                );
                return Ok(value);
            }
            Ok(None) => {
                debug!(chain, strategy = name, "strategy declined");
                skips.push(StrategySkip {
                    strategy: name,
                    reason: "not applicable".to_string(),
                });
            }
            Err(err) => {
                debug!(chain, strategy = name, error = %err, "strategy failed");
                skips.push(StrategySkip {
                    strategy: name,
                    reason: err.to_string(),
                });
            }
        }
    }
    Err(ChainExhausted { chain, skips })
}

// ── Tests ────────────────────────────────────────────────────────────────────
