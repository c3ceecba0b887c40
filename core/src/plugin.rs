//! `PluginScheduler`: the background-stage hook that would dispatch work
//! out to external enrichment plugins (subtitle fetchers, artwork scrapers,
//! …). §1 puts plugin orchestration itself out of scope; this models only
//! the boundary the background stage calls through, with a no-op default.

use async_trait::async_trait;

use crate::meta::MetaRecord;

#[derive(Clone, Debug)]
pub struct PluginTask {
    pub virtual_path: String,
    pub record: MetaRecord,
}

#[async_trait]
pub trait PluginScheduler: Send + Sync {
    /// Hand a completed background-stage record to any registered plugins.
    /// Errors are logged by the caller and never fail the pipeline stage —
    /// plugin work is best-effort enrichment, not a correctness dependency.
    async fn dispatch(&self, task: PluginTask);
}

#[derive(Default)]
pub struct NullPluginScheduler;

#[async_trait]
impl PluginScheduler for NullPluginScheduler {
    async fn dispatch(&self, _task: PluginTask) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::FileKind;
    use std::path::PathBuf;

    #[tokio::test]
    async fn null_scheduler_accepts_any_task() {
        let scheduler = NullPluginScheduler;
        let record = MetaRecord::new(PathBuf::from("/a.mkv"), FileKind::Video);
        scheduler.dispatch(PluginTask { virtual_path: "Movies/A/A.mkv".into(), record }).await;
    }
}
