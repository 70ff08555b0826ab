use async_trait::async_trait;

/// One rung of a fallback ladder.
///
/// `attempt` returns `None` when the strategy does not apply or produced
/// nothing usable; failures are handled (and logged) inside the strategy so the
/// next rung can run.
#[async_trait]
pub trait Strategy<C, T>: Send + Sync
where
    C: Sync + ?Sized,
    T: Send,
{
    fn name(&self) -> &str;
    async fn attempt(&self, ctx: &C) -> Option<T>;
}
