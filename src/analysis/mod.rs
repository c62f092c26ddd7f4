// Analysis module - 分析会话模块
// 同一时刻最多一个分析在运行，这是本模块的核心不变式

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::AnalysisBackend;
use crate::error::{Result, SessionError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Idle,
    Running,
    Succeeded,
    Failed,
}

/// 一次分析执行的记录
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRun {
    pub status: AnalysisStatus,
    /// 仅在 Succeeded 时为 Some
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_reference: Option<String>,
    /// 仅在 Failed 时为 Some
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AnalysisRun {
    fn idle() -> Self {
        Self {
            status: AnalysisStatus::Idle,
            report_reference: None,
            error_detail: None,
            started_at: None,
            completed_at: None,
        }
    }
}

/// 分析会话：持有唯一允许的 in-flight 分析及其结果句柄。
/// 注册表是否为空由调用方把关，这里不关心触发原因。
#[derive(Debug, Clone)]
pub struct AnalysisSession {
    run: AnalysisRun,
}

impl AnalysisSession {
    pub fn new() -> Self {
        Self {
            run: AnalysisRun::idle(),
        }
    }

    pub fn status(&self) -> AnalysisStatus {
        self.run.status
    }

    pub fn run(&self) -> &AnalysisRun {
        &self.run
    }

    pub fn report_reference(&self) -> Option<&str> {
        self.run.report_reference.as_deref()
    }

    pub fn error_detail(&self) -> Option<&str> {
        self.run.error_detail.as_deref()
    }

    /// 进入 Running。已在运行时拒绝，这里承载互斥不变式。
    /// 从 Succeeded/Failed 重新开始会丢弃上一次的结果。
    pub fn begin(&mut self) -> Result<()> {
        if self.run.status == AnalysisStatus::Running {
            return Err(SessionError::AlreadyRunning);
        }
        self.run = AnalysisRun {
            status: AnalysisStatus::Running,
            report_reference: None,
            error_detail: None,
            started_at: Some(Utc::now()),
            completed_at: None,
        };
        debug!("analysis run started");
        Ok(())
    }

    pub fn complete(&mut self, reference: String) {
        info!(report_reference = %reference, "analysis succeeded");
        self.run.status = AnalysisStatus::Succeeded;
        self.run.report_reference = Some(reference);
        self.run.error_detail = None;
        self.run.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, detail: String) {
        warn!(error = %detail, "analysis failed");
        self.run.status = AnalysisStatus::Failed;
        self.run.report_reference = None;
        self.run.error_detail = Some(detail);
        self.run.completed_at = Some(Utc::now());
    }

    /// 回到 Idle，清掉结果。运行中不允许复位。
    pub fn reset(&mut self) -> Result<()> {
        if self.run.status == AnalysisStatus::Running {
            return Err(SessionError::AlreadyRunning);
        }
        self.run = AnalysisRun::idle();
        Ok(())
    }

    /// 单独使用时的完整启动流程：发出一次分析请求，不做任何重试。
    /// 重试策略属于调用方。
    pub async fn start(&mut self, backend: &dyn AnalysisBackend) -> Result<String> {
        self.begin()?;
        match backend.analyze().await {
            Ok(reference) => {
                self.complete(reference.clone());
                Ok(reference)
            }
            Err(err) => {
                self.fail(err.to_string());
                Err(err)
            }
        }
    }
}

impl Default for AnalysisSession {
    fn default() -> Self {
        Self::new()
    }
}
