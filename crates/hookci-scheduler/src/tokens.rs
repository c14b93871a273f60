//! Cancellation tokens of the builds currently executing.

use hookci_core::BuildId;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Each registration gets a ticket so that a finished execution only
/// releases its own token, never one registered after it.
#[derive(Default)]
pub(crate) struct TokenRegistry {
    next_ticket: u64,
    tokens: HashMap<BuildId, (u64, CancellationToken)>,
}

impl TokenRegistry {
    pub fn register(&mut self, build_id: BuildId) -> (u64, CancellationToken) {
        self.next_ticket += 1;
        let token = CancellationToken::new();
        self.tokens
            .insert(build_id, (self.next_ticket, token.clone()));
        (self.next_ticket, token)
    }

    pub fn release(&mut self, build_id: BuildId, ticket: u64) {
        if self.tokens.get(&build_id).is_some_and(|(t, _)| *t == ticket) {
            self.tokens.remove(&build_id);
        }
    }

    pub fn get(&self, build_id: BuildId) -> Option<CancellationToken> {
        self.tokens.get(&build_id).map(|(_, token)| token.clone())
    }

    pub fn contains(&self, build_id: BuildId) -> bool {
        self.tokens.contains_key(&build_id)
    }

    pub fn cancel_all(&self) {
        for (_, token) in self.tokens.values() {
            token.cancel();
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_release_keeps_newer_registration() {
        let mut registry = TokenRegistry::default();
        let id = BuildId::new(1);

        let (first, _) = registry.register(id);
        let (second, token) = registry.register(id);
        registry.release(id, first);
        assert!(registry.contains(id));

        registry.cancel_all();
        assert!(token.is_cancelled());
        registry.release(id, second);
        assert_eq!(registry.len(), 0);
    }
}
