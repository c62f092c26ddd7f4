// Secaudit Client Library
// 代码安全分析客户端：文件上传、分析会话与报告获取的状态机

mod analysis;
mod backend;
mod registry;
mod session;
mod upload;

// 重新导出常用类型
pub use analysis::{AnalysisRun, AnalysisSession, AnalysisStatus};
pub use backend::http::HttpBackend;
pub use backend::AnalysisBackend;
pub use registry::{
    CandidateFile, FileRegistry, PendingSelection, SelectionReport, UploadedFile,
    DEFAULT_ALLOWED_EXTENSIONS,
};
pub use session::{ReportArtifact, SessionConfig, SessionController, SessionState};
pub use upload::{UploadCoordinator, UploadOutcome};

pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug, Clone, PartialEq)]
    pub enum SessionError {
        #[error("transport error: {0}")]
        Transport(String),

        #[error("server rejected request ({status}): {reason}")]
        ServerRejected { status: u16, reason: String },

        #[error("pending selection is empty")]
        EmptySelection,

        #[error("another operation is in flight")]
        OperationInFlight,

        #[error("analysis is already running")]
        AlreadyRunning,

        #[error("invalid transition: {0}")]
        InvalidTransition(String),
    }

    pub type Result<T> = std::result::Result<T, SessionError>;
}
