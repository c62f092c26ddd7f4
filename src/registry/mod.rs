// Registry module - 文件登记模块
// 服务端文件列表的本地镜像 + 尚未提交的本地选择

use serde::{Deserialize, Serialize};

use crate::backend::AnalysisBackend;
use crate::error::Result;

/// 默认允许上传的扩展名
pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] =
    &[".py", ".js", ".java", ".c", ".cpp", ".go", ".php"];

/// 服务端已确认的文件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadedFile {
    pub name: String,
    /// 由文件名派生，小写，不带点
    pub extension: String,
}

impl UploadedFile {
    fn from_name(name: &str) -> Self {
        Self {
            name: name.to_string(),
            extension: extension_of(name).unwrap_or_default(),
        }
    }
}

/// 本地选中、等待上传的文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    pub name: String,
    pub content: Vec<u8>,
}

impl CandidateFile {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// 待上传集合。只有提交成功才会清空，失败时原样保留以便重试。
#[derive(Debug, Clone, Default)]
pub struct PendingSelection {
    files: Vec<CandidateFile>,
}

impl PendingSelection {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn files(&self) -> &[CandidateFile] {
        &self.files
    }

    pub fn names(&self) -> Vec<String> {
        self.files.iter().map(|f| f.name.clone()).collect()
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }
}

/// select 的结果：通过过滤的文件与被拒绝的文件逐一列出，
/// 被拒绝不是错误，但也不会被悄悄丢掉
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SelectionReport {
    pub accepted: Vec<String>,
    pub rejected: Vec<String>,
}

impl SelectionReport {
    pub fn accepted_any(&self) -> bool {
        !self.accepted.is_empty()
    }
}

/// 文件登记表：服务端文件集合的唯一真实来源是服务端本身，
/// 本地镜像只通过整体替换更新，不做增量合并
#[derive(Debug, Clone)]
pub struct FileRegistry {
    allowed_extensions: Vec<String>,
    uploaded: Vec<UploadedFile>,
    pending: PendingSelection,
}

impl FileRegistry {
    pub fn new(allowed_extensions: &[impl AsRef<str>]) -> Self {
        Self {
            allowed_extensions: allowed_extensions
                .iter()
                .map(|ext| normalize_extension(ext.as_ref()))
                .collect(),
            uploaded: Vec::new(),
            pending: PendingSelection::default(),
        }
    }

    /// 从服务端取回权威列表并整体替换本地镜像。
    /// 这是唯一根据本地观察改写服务端已知集合的操作。
    pub async fn refresh(&mut self, backend: &dyn AnalysisBackend) -> Result<Vec<String>> {
        let listing = backend.list_files().await?;
        self.apply_listing(listing.clone());
        Ok(listing)
    }

    /// 用服务端返回的列表整体替换本地镜像，重复名去重，保持顺序。
    /// 不影响待上传集合。
    pub fn apply_listing(&mut self, names: Vec<String>) {
        let mut uploaded: Vec<UploadedFile> = Vec::with_capacity(names.len());
        for name in names {
            if !uploaded.iter().any(|f| f.name == name) {
                uploaded.push(UploadedFile::from_name(&name));
            }
        }
        self.uploaded = uploaded;
    }

    /// 按扩展名过滤候选文件并替换当前待上传集合。
    /// 被拒绝的文件不报错，但在返回的报告中列出。
    pub fn select(&mut self, candidates: Vec<CandidateFile>) -> SelectionReport {
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        let mut files = Vec::new();

        for candidate in candidates {
            if self.is_allowed(&candidate.name) {
                accepted.push(candidate.name.clone());
                files.push(candidate);
            } else {
                rejected.push(candidate.name);
            }
        }

        self.pending = PendingSelection { files };
        SelectionReport { accepted, rejected }
    }

    pub fn is_allowed(&self, name: &str) -> bool {
        match extension_of(name) {
            Some(ext) => self.allowed_extensions.iter().any(|allowed| *allowed == ext),
            None => false,
        }
    }

    pub fn uploaded_files(&self) -> &[UploadedFile] {
        &self.uploaded
    }

    pub fn uploaded_names(&self) -> Vec<String> {
        self.uploaded.iter().map(|f| f.name.clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.uploaded.iter().any(|f| f.name == name)
    }

    pub fn pending(&self) -> &PendingSelection {
        &self.pending
    }

    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }

    /// 服务端集合与待上传集合都为空时才算空
    pub fn is_empty(&self) -> bool {
        self.uploaded.is_empty() && self.pending.is_empty()
    }
}

impl Default for FileRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_EXTENSIONS)
    }
}

fn normalize_extension(ext: &str) -> String {
    ext.trim_start_matches('.').to_lowercase()
}

/// 文件名最后一个点之后的部分，小写；没有扩展名返回 None
fn extension_of(name: &str) -> Option<String> {
    let idx = name.rfind('.')?;
    let ext = &name[idx + 1..];
    if ext.is_empty() || idx == 0 {
        return None;
    }
    Some(ext.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str) -> CandidateFile {
        CandidateFile::new(name, b"print('hi')".to_vec())
    }

    #[test]
    fn select_filters_by_allowed_extension() {
        let mut registry = FileRegistry::default();
        let report = registry.select(vec![
            candidate("a.py"),
            candidate("b.exe"),
            candidate("c.JS"),
        ]);

        assert_eq!(report.accepted, vec!["a.py", "c.JS"]);
        assert_eq!(report.rejected, vec!["b.exe"]);
        assert_eq!(registry.pending().names(), vec!["a.py", "c.JS"]);
    }

    #[test]
    fn select_with_only_disallowed_files_yields_empty_selection() {
        // Scenario: selection = [x.exe]
        let mut registry = FileRegistry::default();
        let report = registry.select(vec![candidate("x.exe")]);

        assert!(!report.accepted_any());
        assert_eq!(report.rejected, vec!["x.exe"]);
        assert!(registry.pending().is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn select_replaces_previous_selection() {
        let mut registry = FileRegistry::default();
        registry.select(vec![candidate("a.py")]);
        registry.select(vec![candidate("b.go")]);
        assert_eq!(registry.pending().names(), vec!["b.go"]);
    }

    #[test]
    fn files_without_extension_are_rejected() {
        let mut registry = FileRegistry::default();
        let report = registry.select(vec![
            candidate("Makefile"),
            candidate(".gitignore"),
            candidate("trailing."),
        ]);
        assert!(report.accepted.is_empty());
        assert_eq!(report.rejected.len(), 3);
    }

    #[test]
    fn custom_extension_set_accepts_with_or_without_dot() {
        let mut registry = FileRegistry::new(&["rs", ".TS"]);
        let report = registry.select(vec![candidate("main.rs"), candidate("app.ts")]);
        assert_eq!(report.accepted, vec!["main.rs", "app.ts"]);
    }

    #[test]
    fn apply_listing_replaces_wholesale_and_dedupes() {
        let mut registry = FileRegistry::default();
        registry.apply_listing(vec!["a.py".into(), "b.js".into(), "a.py".into()]);
        assert_eq!(registry.uploaded_names(), vec!["a.py", "b.js"]);
        assert_eq!(registry.uploaded_files()[0].extension, "py");

        registry.apply_listing(vec!["c.go".into()]);
        assert_eq!(registry.uploaded_names(), vec!["c.go"]);
    }

    #[test]
    fn apply_listing_does_not_touch_pending_selection() {
        let mut registry = FileRegistry::default();
        registry.select(vec![candidate("a.py")]);
        registry.apply_listing(vec!["b.js".into()]);
        assert_eq!(registry.pending().names(), vec!["a.py"]);
    }

    #[tokio::test]
    async fn refresh_replaces_from_server_and_is_idempotent() {
        use crate::backend::mock::MockBackend;

        let backend = MockBackend::with_files(&["a.py", "b.js"]);
        let mut registry = FileRegistry::default();
        registry.apply_listing(vec!["stale.c".into()]);

        let first = registry.refresh(backend.as_ref()).await.unwrap();
        let second = registry.refresh(backend.as_ref()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.uploaded_names(), vec!["a.py", "b.js"]);
    }

    #[test]
    fn is_empty_requires_both_sets_empty() {
        let mut registry = FileRegistry::default();
        assert!(registry.is_empty());

        registry.select(vec![candidate("a.py")]);
        assert!(!registry.is_empty());

        registry.clear_pending();
        registry.apply_listing(vec!["a.py".into()]);
        assert!(!registry.is_empty());
    }
}
