//! Access tokens shared by the API clients.

use core::fmt::{Debug, Formatter};
use core::sync::atomic::{AtomicUsize, Ordering};

/// A pool of API tokens handed out round-robin, spreading requests across
/// several rate-limit budgets.
pub struct TokenPool {
    tokens: Vec<String>,
    next: AtomicUsize,
}

impl TokenPool {
    /// Build a pool, dropping blank entries.
    #[must_use]
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            tokens: tokens
                .into_iter()
                .map(|t| t.as_ref().trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            next: AtomicUsize::new(0),
        }
    }

    /// An empty pool; requests go out unauthenticated.
    #[must_use]
    pub const fn anonymous() -> Self {
        Self {
            tokens: Vec::new(),
            next: AtomicUsize::new(0),
        }
    }

    /// Parse a comma-separated token list.
    #[must_use]
    pub fn from_list(list: &str) -> Self {
        Self::new(list.split(','))
    }

    /// The token for the next request, or `None` when the pool is empty.
    #[must_use]
    pub fn next_token(&self) -> Option<&str> {
        if self.tokens.is_empty() {
            return None;
        }

        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.tokens.len();
        Some(&self.tokens[index])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Debug for TokenPool {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenPool").field("tokens", &self.tokens.len()).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin() {
        let pool = TokenPool::from_list("a, b,,c ");
        assert_eq!(pool.len(), 3);
        let handed_out: Vec<_> = (0..4).map(|_| pool.next_token().unwrap().to_string()).collect();
        assert_eq!(handed_out, ["a", "b", "c", "a"]);
    }

    #[test]
    fn anonymous_pool_has_no_tokens() {
        let pool = TokenPool::anonymous();
        assert!(pool.is_empty());
        assert!(pool.next_token().is_none());
    }

    #[test]
    fn debug_hides_tokens() {
        let pool = TokenPool::new(["secret"]);
        assert!(!format!("{pool:?}").contains("secret"));
    }
}
