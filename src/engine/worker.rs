//! Worker thread bodies

use std::sync::Arc;

use super::runner::LoopBody;
use crate::error::Result;
use crate::models::ExecuteMode;
use crate::resolver::Resolver;

/// Executes queued targets
pub struct Worker {
    resolver: Arc<Resolver>,
}

impl Worker {
    pub fn new(resolver: Arc<Resolver>) -> Self {
        Self { resolver }
    }
}

impl LoopBody for Worker {
    fn tick(&mut self) -> Result<bool> {
        Ok(self.resolver.execute(ExecuteMode::Target)?.is_some())
    }
}

/// Executes queued catalogs, falling back to targets when none are waiting
pub struct CatalogWorker {
    resolver: Arc<Resolver>,
}

impl CatalogWorker {
    pub fn new(resolver: Arc<Resolver>) -> Self {
        Self { resolver }
    }
}

impl LoopBody for CatalogWorker {
    fn tick(&mut self) -> Result<bool> {
        if self.resolver.execute(ExecuteMode::Catalog)?.is_some() {
            return Ok(true);
        }
        Ok(self.resolver.execute(ExecuteMode::Target)?.is_some())
    }
}
