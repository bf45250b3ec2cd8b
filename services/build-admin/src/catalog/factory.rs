//! Job factory that tags generations with their catalog id.

use std::sync::Arc;

use async_trait::async_trait;
use buildadmin_id::BuildId;
use tracing::debug;

use super::CatalogIdMap;
use crate::job::{JobContext, JobFactory, JobHandle, JobResult};

/// Wraps another factory. Generations created for a BuildId the catalog
/// declares carry the catalog's id in their context, whichever path started
/// them.
pub struct CatalogAwareFactory {
    inner: Arc<dyn JobFactory>,
    id_map: Arc<CatalogIdMap>,
}

impl CatalogAwareFactory {
    pub fn new(inner: Arc<dyn JobFactory>, id_map: Arc<CatalogIdMap>) -> Self {
        Self { inner, id_map }
    }
}

#[async_trait]
impl JobFactory for CatalogAwareFactory {
    async fn create(&self, mut ctx: JobContext) -> JobResult<Arc<dyn JobHandle>> {
        if ctx.catalog_id.is_none() {
            if let Some(external) = self.id_map.external(&ctx.build_id) {
                debug!(build_id = %ctx.build_id, catalog_id = %external, "Attaching catalog id");
                ctx.catalog_id = Some(external.to_string());
            }
        }
        self.inner.create(ctx).await
    }

    async fn recover(&self, build_id: &BuildId) -> JobResult<Arc<dyn JobHandle>> {
        self.inner.recover(build_id).await
    }
}
