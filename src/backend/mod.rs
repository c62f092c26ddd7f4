// Backend module - 后端契约模块
// 定义分析后端的固定接口；具体实现见 http 子模块

pub mod http;

use async_trait::async_trait;

use crate::error::Result;
use crate::registry::CandidateFile;

/// 分析后端 trait - 会话状态机消费的全部服务端能力
///
/// The backend is opaque: how files are stored, how code is scanned and how
/// the report is rendered are server concerns. The session only depends on
/// this contract.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// 获取服务端当前文件列表
    async fn list_files(&self) -> Result<Vec<String>>;

    /// 批量上传文件，返回服务端确认保存的文件名
    async fn upload(&self, files: &[CandidateFile]) -> Result<Vec<String>>;

    /// 删除服务端的一个文件
    async fn delete(&self, filename: &str) -> Result<()>;

    /// 触发分析，返回报告定位符
    async fn analyze(&self) -> Result<String>;

    /// 按定位符获取报告内容
    async fn fetch_report(&self, reference: &str) -> Result<Vec<u8>>;
}

#[cfg(test)]
pub(crate) mod mock {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use crate::error::{Result, SessionError};
    use crate::registry::CandidateFile;

    use super::AnalysisBackend;

    /// Programmable in-memory backend used by the state-machine tests.
    /// Keeps a server-side file store, supports one-shot failure injection
    /// per operation and an optional gate that holds analyze/upload calls
    /// open until released.
    #[derive(Default)]
    pub struct MockBackend {
        pub files: Mutex<Vec<String>>,
        pub fail_next_upload: Mutex<Option<SessionError>>,
        pub fail_next_analyze: Mutex<Option<SessionError>>,
        pub fail_next_delete: Mutex<Option<SessionError>>,
        pub fail_next_list: Mutex<Option<SessionError>>,
        pub hold_analyze: AtomicBool,
        pub hold_upload: AtomicBool,
        pub gate: Notify,
        pub report_reference: Mutex<String>,
        pub analyze_calls: Mutex<u32>,
        pub upload_calls: Mutex<u32>,
    }

    impl MockBackend {
        pub fn new() -> Arc<Self> {
            let backend = Self {
                report_reference: Mutex::new("report.pdf".to_string()),
                ..Self::default()
            };
            Arc::new(backend)
        }

        pub fn with_files(names: &[&str]) -> Arc<Self> {
            let backend = Self::new();
            *backend.files.lock().unwrap() =
                names.iter().map(|n| n.to_string()).collect();
            backend
        }

        pub fn release_gate(&self) {
            self.gate.notify_one();
        }

        fn take_failure(slot: &Mutex<Option<SessionError>>) -> Option<SessionError> {
            slot.lock().unwrap().take()
        }
    }

    #[async_trait]
    impl AnalysisBackend for MockBackend {
        async fn list_files(&self) -> Result<Vec<String>> {
            if let Some(err) = Self::take_failure(&self.fail_next_list) {
                return Err(err);
            }
            Ok(self.files.lock().unwrap().clone())
        }

        async fn upload(&self, files: &[CandidateFile]) -> Result<Vec<String>> {
            *self.upload_calls.lock().unwrap() += 1;
            if self.hold_upload.load(Ordering::SeqCst) {
                self.gate.notified().await;
            }
            if let Some(err) = Self::take_failure(&self.fail_next_upload) {
                return Err(err);
            }
            let mut saved = Vec::new();
            let mut store = self.files.lock().unwrap();
            for file in files {
                // 同名文件覆盖保存
                if !store.contains(&file.name) {
                    store.push(file.name.clone());
                }
                saved.push(file.name.clone());
            }
            Ok(saved)
        }

        async fn delete(&self, filename: &str) -> Result<()> {
            if let Some(err) = Self::take_failure(&self.fail_next_delete) {
                return Err(err);
            }
            let mut store = self.files.lock().unwrap();
            let before = store.len();
            store.retain(|name| name != filename);
            if store.len() == before {
                return Err(SessionError::ServerRejected {
                    status: 404,
                    reason: format!("no such file: {}", filename),
                });
            }
            Ok(())
        }

        async fn analyze(&self) -> Result<String> {
            *self.analyze_calls.lock().unwrap() += 1;
            if self.hold_analyze.load(Ordering::SeqCst) {
                self.gate.notified().await;
            }
            if let Some(err) = Self::take_failure(&self.fail_next_analyze) {
                return Err(err);
            }
            Ok(self.report_reference.lock().unwrap().clone())
        }

        async fn fetch_report(&self, reference: &str) -> Result<Vec<u8>> {
            let expected = self.report_reference.lock().unwrap().clone();
            if reference != expected {
                return Err(SessionError::ServerRejected {
                    status: 404,
                    reason: format!("no such report: {}", reference),
                });
            }
            Ok(b"%PDF-1.4 mock report".to_vec())
        }
    }
}
