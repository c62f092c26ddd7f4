// HTTP 适配器：把固定的后端 REST 契约映射到 AnalysisBackend trait
// 不同部署返回的字段名差异（report_path / reportPath）在这里归一化，
// 不会泄漏到状态机内部

use async_trait::async_trait;
use reqwest::multipart;
use serde::Deserialize;

use crate::error::{Result, SessionError};
use crate::registry::CandidateFile;

use super::AnalysisBackend;

/// 上传文件使用的 multipart 字段名
const UPLOAD_FIELD_NAME: &str = "codeFiles";

#[derive(Deserialize)]
struct ListFilesResponse {
    files: Vec<String>,
}

#[derive(Deserialize)]
struct UploadResponse {
    saved_files: Vec<String>,
}

/// 分析接口的成功响应。规范字段是 `report_path`；历史部署返回过
/// `reportPath`（作为别名接受）以及只有 `issue_count` 的变体
/// （缺少报告定位符，视为违反契约）。
#[derive(Deserialize)]
struct AnalyzeResponse {
    #[serde(alias = "reportPath")]
    report_path: Option<String>,
    #[allow(dead_code)]
    issue_count: Option<u64>,
}

impl AnalyzeResponse {
    fn into_reference(self, status: u16) -> Result<String> {
        self.report_path.ok_or(SessionError::ServerRejected {
            status,
            reason: "analyze response missing report_path".to_string(),
        })
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// 从失败响应体中提取结构化原因，取不到时退回状态行描述
fn rejection_reason(status: u16, body: &str) -> SessionError {
    let reason = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                format!("HTTP status {}", status)
            } else {
                body.trim().to_string()
            }
        });
    SessionError::ServerRejected { status, reason }
}

fn transport(err: reqwest::Error) -> SessionError {
    SessionError::Transport(err.to_string())
}

pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    /// 使用外部配置好的 client（代理、TLS 等由调用方决定）
    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, client }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// 非 2xx 响应统一转成 ServerRejected，保留服务端给出的原因
    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let code = status.as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(rejection_reason(code, &body))
    }
}

#[async_trait]
impl AnalysisBackend for HttpBackend {
    async fn list_files(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(self.url("list_files"))
            .send()
            .await
            .map_err(transport)?;
        let response = self.check(response).await?;
        let listing: ListFilesResponse = response.json().await.map_err(transport)?;
        Ok(listing.files)
    }

    async fn upload(&self, files: &[CandidateFile]) -> Result<Vec<String>> {
        let mut form = multipart::Form::new();
        for file in files {
            let mime = mime_guess::from_path(&file.name).first_or_octet_stream();
            let part = multipart::Part::bytes(file.content.clone())
                .file_name(file.name.clone())
                .mime_str(mime.essence_str())
                .map_err(transport)?;
            form = form.part(UPLOAD_FIELD_NAME, part);
        }

        let response = self
            .client
            .post(self.url("upload"))
            .multipart(form)
            .send()
            .await
            .map_err(transport)?;
        let response = self.check(response).await?;
        let saved: UploadResponse = response.json().await.map_err(transport)?;
        Ok(saved.saved_files)
    }

    async fn delete(&self, filename: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url("delete"))
            .json(&serde_json::json!({ "filename": filename }))
            .send()
            .await
            .map_err(transport)?;
        self.check(response).await?;
        Ok(())
    }

    async fn analyze(&self) -> Result<String> {
        let response = self
            .client
            .post(self.url("analyze"))
            .send()
            .await
            .map_err(transport)?;
        let status = response.status().as_u16();
        let response = self.check(response).await?;
        let payload: AnalyzeResponse = response.json().await.map_err(transport)?;
        payload.into_reference(status)
    }

    async fn fetch_report(&self, reference: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(self.url(reference))
            .send()
            .await
            .map_err(transport)?;
        let response = self.check(response).await?;
        let bytes = response.bytes().await.map_err(transport)?;
        Ok(bytes.to_vec())
    }
}
