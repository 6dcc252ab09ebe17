use std::sync::Arc;

/// Brackets the side effects of one dispatch attempt.
///
/// Every registered unit of work is begun before the handlers run and ended
/// after all of them finished, both in registration order. `end` receives the
/// failure of the attempt, if any, so implementations can commit on `None`
/// and roll back otherwise. A new instance is created for each attempt.
pub trait UnitOfWork: Send {
    fn begin(&mut self) -> anyhow::Result<()>;

    fn end(&mut self, failure: Option<&(dyn std::error::Error + 'static)>) -> anyhow::Result<()>;

    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Builds a unit of work for one dispatch scope.
pub type UnitOfWorkFactory = Arc<dyn Fn() -> Box<dyn UnitOfWork> + Send + Sync>;
