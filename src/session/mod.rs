// Session module - 会话控制模块
// 把登记表、上传协调器和分析会话组合成对外暴露的合法状态机。
// 一个会话一个控制器，显式构造，互不共享。

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::analysis::{AnalysisRun, AnalysisSession, AnalysisStatus};
use crate::backend::AnalysisBackend;
use crate::error::{Result, SessionError};
use crate::registry::{
    CandidateFile, FileRegistry, SelectionReport, UploadedFile, DEFAULT_ALLOWED_EXTENSIONS,
};
use crate::upload::UploadCoordinator;

/// 会话状态。Uploading / Analyzing 是瞬态，完成后回到稳定状态：
/// 成功前进，失败原样退回之前的稳定状态。
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Empty,
    FilesSelected,
    Uploading,
    FilesUploaded,
    Analyzing,
    ReportReady,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// 允许上传的扩展名集合
    pub allowed_extensions: Vec<String>,
    /// 上传成功后是否自动触发分析（显式配置，不再是部署间的隐式差异）
    pub auto_analyze_on_upload_success: bool,
    /// 单次网络交互的超时；超时按传输失败处理
    pub timeout: Option<Duration>,
    /// 报告对用户展示的固定文件名，与服务端文件名无关
    pub report_display_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            auto_analyze_on_upload_success: false,
            timeout: None,
            report_display_name: "security-report.pdf".to_string(),
        }
    }
}

/// 下载到本地的报告制品
#[derive(Debug, Clone)]
pub struct ReportArtifact {
    pub display_name: String,
    pub content: Vec<u8>,
}

struct SessionInner {
    state: SessionState,
    registry: FileRegistry,
    analysis: AnalysisSession,
    /// 同一时刻最多一个未完成的网络交互
    in_flight: bool,
    /// 新一轮上传成功后置位：旧报告只保留引用可供下载，
    /// 不再把会话标记为 ReportReady
    report_superseded: bool,
}

impl SessionInner {
    /// 由当前组件状态推导稳定状态
    fn stable_state(&self) -> SessionState {
        if !self.registry.pending().is_empty() {
            SessionState::FilesSelected
        } else if self.analysis.status() == AnalysisStatus::Succeeded && !self.report_superseded {
            SessionState::ReportReady
        } else if !self.registry.uploaded_files().is_empty() {
            SessionState::FilesUploaded
        } else {
            SessionState::Empty
        }
    }
}

/// 会话控制器。Clone 后共享同一份会话状态，可以从多个任务调用，
/// 状态锁从不跨 await 持有：网络交互开始前同步登记瞬态，
/// 返回后同步落账。
#[derive(Clone)]
pub struct SessionController {
    backend: Arc<dyn AnalysisBackend>,
    coordinator: UploadCoordinator,
    config: SessionConfig,
    inner: Arc<Mutex<SessionInner>>,
}

impl SessionController {
    pub fn new(backend: Arc<dyn AnalysisBackend>, config: SessionConfig) -> Self {
        let registry = FileRegistry::new(&config.allowed_extensions);
        let inner = SessionInner {
            state: SessionState::Empty,
            registry,
            analysis: AnalysisSession::new(),
            in_flight: false,
            report_superseded: false,
        };
        Self {
            coordinator: UploadCoordinator::new(backend.clone()),
            backend,
            config,
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    pub fn with_defaults(backend: Arc<dyn AnalysisBackend>) -> Self {
        Self::new(backend, SessionConfig::default())
    }

    /// 显式初始化：与服务端对齐一次文件列表
    pub async fn init(&self) -> Result<Vec<String>> {
        self.refresh().await
    }

    // ---- 查询接口 ----

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn uploaded_files(&self) -> Vec<UploadedFile> {
        self.lock().registry.uploaded_files().to_vec()
    }

    pub fn pending_names(&self) -> Vec<String> {
        self.lock().registry.pending().names()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().registry.is_empty()
    }

    pub fn analysis_run(&self) -> AnalysisRun {
        self.lock().analysis.run().clone()
    }

    pub fn report_reference(&self) -> Option<String> {
        self.lock()
            .analysis
            .report_reference()
            .map(|r| r.to_string())
    }

    pub fn can_submit(&self) -> bool {
        let inner = self.lock();
        inner.state == SessionState::FilesSelected && !inner.registry.pending().is_empty()
    }

    pub fn can_start_analysis(&self) -> bool {
        matches!(
            self.state(),
            SessionState::FilesUploaded | SessionState::ReportReady
        )
    }

    // ---- 状态机操作 ----

    /// 本地选择一批文件。不通过扩展名过滤的文件被丢弃但逐一列出。
    /// 选择替换之前的待上传集合；已有的报告引用保留到被新结果取代。
    pub fn select(&self, candidates: Vec<CandidateFile>) -> Result<SelectionReport> {
        let mut inner = self.lock();
        if inner.in_flight {
            return Err(SessionError::OperationInFlight);
        }

        let report = inner.registry.select(candidates);
        if !report.rejected.is_empty() {
            debug!(rejected = ?report.rejected, "dropped files with disallowed extensions");
        }
        inner.state = inner.stable_state();
        info!(accepted = report.accepted.len(), state = ?inner.state, "selection updated");
        Ok(report)
    }

    /// 提交待上传集合。成功后清空选择并以服务端列表刷新登记表；
    /// 失败时选择原样保留，状态退回 FilesSelected。
    pub async fn submit(&self) -> Result<Vec<String>> {
        let selection = {
            let mut inner = self.lock();
            if inner.in_flight {
                return Err(SessionError::OperationInFlight);
            }
            if inner.registry.pending().is_empty() {
                return Err(SessionError::EmptySelection);
            }
            inner.state = SessionState::Uploading;
            inner.in_flight = true;
            inner.registry.pending().clone()
        };

        let result = self
            .with_timeout(self.coordinator.submit(&selection))
            .await;

        let saved = {
            let mut inner = self.lock();
            inner.in_flight = false;
            match result {
                Ok(outcome) => {
                    inner.registry.clear_pending();
                    inner.registry.apply_listing(outcome.listing);
                    inner.state = SessionState::FilesUploaded;
                    // 文件集变了，已有的报告从此只算存档
                    inner.report_superseded = true;
                    info!(saved = outcome.saved_files.len(), "upload complete");
                    outcome.saved_files
                }
                Err(err) => {
                    inner.state = SessionState::FilesSelected;
                    return Err(err);
                }
            }
        };

        if self.config.auto_analyze_on_upload_success {
            // 自动分析失败不影响已完成的上传，结果留在分析状态里
            if let Err(err) = self.start_analysis().await {
                warn!(error = %err, "auto-analysis after upload failed");
            }
        }

        Ok(saved)
    }

    /// 启动分析。只允许从 FilesUploaded / ReportReady 出发；
    /// 运行中的分析拒绝第二次启动。
    pub async fn start_analysis(&self) -> Result<String> {
        let prior = {
            let mut inner = self.lock();
            if inner.analysis.status() == AnalysisStatus::Running {
                return Err(SessionError::AlreadyRunning);
            }
            if inner.in_flight {
                return Err(SessionError::OperationInFlight);
            }
            match inner.state {
                SessionState::FilesUploaded | SessionState::ReportReady => {}
                other => {
                    return Err(SessionError::InvalidTransition(format!(
                        "cannot start analysis from {:?}",
                        other
                    )));
                }
            }
            // 服务端没有文件时无从分析
            if inner.registry.uploaded_files().is_empty() {
                return Err(SessionError::InvalidTransition(
                    "no uploaded files to analyze".to_string(),
                ));
            }
            inner.analysis.begin()?;
            let prior = inner.state;
            inner.state = SessionState::Analyzing;
            inner.in_flight = true;
            prior
        };

        let result = self.with_timeout(self.backend.analyze()).await;

        let mut inner = self.lock();
        inner.in_flight = false;
        match result {
            Ok(reference) => {
                inner.analysis.complete(reference.clone());
                inner.state = SessionState::ReportReady;
                inner.report_superseded = false;
                Ok(reference)
            }
            Err(err) => {
                inner.analysis.fail(err.to_string());
                inner.state = prior;
                Err(err)
            }
        }
    }

    /// 删除服务端的一个文件并刷新登记表。
    /// 只能针对服务端已知的文件；上传或分析进行中一律拒绝。
    pub async fn delete(&self, filename: &str) -> Result<()> {
        {
            let mut inner = self.lock();
            match inner.state {
                SessionState::Uploading | SessionState::Analyzing => {
                    return Err(SessionError::InvalidTransition(format!(
                        "cannot delete while {:?}",
                        inner.state
                    )));
                }
                _ => {}
            }
            if inner.in_flight {
                return Err(SessionError::OperationInFlight);
            }
            if !inner.registry.contains(filename) {
                return Err(SessionError::InvalidTransition(format!(
                    "file not in registry: {}",
                    filename
                )));
            }
            inner.in_flight = true;
        }

        let result = self
            .with_timeout(async {
                self.backend.delete(filename).await?;
                self.backend.list_files().await
            })
            .await;

        let mut inner = self.lock();
        inner.in_flight = false;
        match result {
            Ok(listing) => {
                inner.registry.apply_listing(listing);
                inner.state = inner.stable_state();
                info!(filename, state = ?inner.state, "file deleted");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// 与服务端对齐文件列表（整体替换）
    pub async fn refresh(&self) -> Result<Vec<String>> {
        {
            let mut inner = self.lock();
            if inner.in_flight {
                return Err(SessionError::OperationInFlight);
            }
            inner.in_flight = true;
        }

        let result = self.with_timeout(self.backend.list_files()).await;

        let mut inner = self.lock();
        inner.in_flight = false;
        match result {
            Ok(listing) => {
                inner.registry.apply_listing(listing.clone());
                inner.state = inner.stable_state();
                debug!(files = listing.len(), state = ?inner.state, "registry refreshed");
                Ok(listing)
            }
            Err(err) => Err(err),
        }
    }

    /// 下载报告。只要存在报告引用就可以取，包括新一轮上传开始前的
    /// 旧引用；制品使用配置里的固定展示名。
    pub async fn download_report(&self) -> Result<ReportArtifact> {
        let reference = {
            let mut inner = self.lock();
            if inner.in_flight {
                return Err(SessionError::OperationInFlight);
            }
            let reference = match inner.analysis.report_reference() {
                Some(reference) => reference.to_string(),
                None => {
                    return Err(SessionError::InvalidTransition(
                        "no report available".to_string(),
                    ));
                }
            };
            inner.in_flight = true;
            reference
        };

        let result = self.with_timeout(self.backend.fetch_report(&reference)).await;

        let mut inner = self.lock();
        inner.in_flight = false;
        result.map(|content| ReportArtifact {
            display_name: self.config.report_display_name.clone(),
            content,
        })
    }

    /// 丢弃上一次分析的结果，回到 Idle。
    /// 运行中不允许，有未完成的网络交互时同样拒绝。
    pub fn reset_analysis(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.in_flight {
            return Err(SessionError::OperationInFlight);
        }
        inner.analysis.reset()?;
        inner.report_superseded = false;
        inner.state = inner.stable_state();
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().expect("session state lock poisoned")
    }

    async fn with_timeout<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match self.config.timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(SessionError::Transport(format!(
                    "request timed out after {:?}",
                    limit
                ))),
            },
            None => fut.await,
        }
    }
}
