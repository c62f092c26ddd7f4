// Upload module - 上传协调模块
// 把整个待上传集合打包成一次 multipart 提交，成功后以服务端列表为准刷新

use std::sync::Arc;

use tracing::{info, warn};

use crate::backend::AnalysisBackend;
use crate::error::{Result, SessionError};
use crate::registry::{FileRegistry, PendingSelection};

/// 一次成功提交的结果：服务端确认保存的文件名，
/// 以及紧随其后取回的权威文件列表
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub saved_files: Vec<String>,
    pub listing: Vec<String>,
}

#[derive(Clone)]
pub struct UploadCoordinator {
    backend: Arc<dyn AnalysisBackend>,
}

impl UploadCoordinator {
    pub fn new(backend: Arc<dyn AnalysisBackend>) -> Self {
        Self { backend }
    }

    /// 提交一批文件。失败时调用方持有的选择集保持不变，可以原样重试；
    /// 同名重传由服务端按覆盖处理，若服务端拒绝则原样透传。
    pub async fn submit(&self, selection: &PendingSelection) -> Result<UploadOutcome> {
        if selection.is_empty() {
            // 调用方本应先禁用提交，这里是兜底检查
            return Err(SessionError::EmptySelection);
        }

        info!(count = selection.len(), "submitting pending selection");
        let saved_files = match self.backend.upload(selection.files()).await {
            Ok(saved) => saved,
            Err(err) => {
                warn!(error = %err, "upload failed, selection preserved");
                return Err(err);
            }
        };

        // 上传成功后立刻对齐服务端真实列表
        let listing = self.backend.list_files().await?;
        info!(saved = saved_files.len(), "upload acknowledged");

        Ok(UploadOutcome {
            saved_files,
            listing,
        })
    }

    /// 单独使用时的完整流程：提交、清空选择集、整体刷新登记表
    pub async fn submit_and_reconcile(
        &self,
        registry: &mut FileRegistry,
    ) -> Result<Vec<String>> {
        let outcome = self.submit(registry.pending()).await?;
        registry.clear_pending();
        registry.apply_listing(outcome.listing);
        Ok(outcome.saved_files)
    }
}
