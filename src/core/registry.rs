use crate::platforms::traits::Strategy;

/// Ordered list of strategies, tried until one produces a value.
pub struct StrategyChain<C: Sync + ?Sized, T: Send> {
    strategies: Vec<Box<dyn Strategy<C, T>>>,
}

impl<C: Sync + ?Sized, T: Send> StrategyChain<C, T> {
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    pub fn register(&mut self, strategy: Box<dyn Strategy<C, T>>) {
        self.strategies.push(strategy);
    }

    pub fn with(mut self, strategy: Box<dyn Strategy<C, T>>) -> Self {
        self.register(strategy);
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Result of the first strategy that yields something, with its name.
    pub async fn first_success(&self, ctx: &C) -> Option<(String, T)> {
        for strategy in &self.strategies {
            match strategy.attempt(ctx).await {
                Some(value) => {
                    tracing::debug!("[chain] '{}' succeeded", strategy.name());
                    return Some((strategy.name().to_string(), value));
                }
                None => tracing::debug!("[chain] '{}' yielded nothing", strategy.name()),
            }
        }
        None
    }
}

impl<C: Sync + ?Sized, T: Send> Default for StrategyChain<C, T> {
    fn default() -> Self {
        Self::new()
    }
}
