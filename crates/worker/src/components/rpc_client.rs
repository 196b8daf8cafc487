use std::net::ToSocketAddrs;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use hashfleet_core::config::ServerConnection;
use hashfleet_core::models::{
    BeaconRequest, BeaconResponse, ChangeTaskStatusRequest, CrackedPasswordRequest,
    GetFileRequest, GetTaskRequest, RpcErrorBody, TaskPayload, TaskStatusRequest,
    FILE_HASH_HEADER,
};
use hashfleet_core::{HashfleetError, HashfleetResult};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

/// 文件内容的分块流
pub type FileStream = BoxStream<'static, HashfleetResult<Vec<u8>>>;

/// 服务端返回的文件：内容摘要以及尚未读取的内容流
pub struct RemoteFile {
    pub hash: String,
    pub stream: FileStream,
}

/// Worker 侧可调用的全部服务端接口
#[async_trait]
pub trait ServerApi: Send + Sync {
    async fn beacon(&self, request: &BeaconRequest) -> HashfleetResult<BeaconResponse>;

    async fn change_task_status(&self, request: &ChangeTaskStatusRequest) -> HashfleetResult<()>;

    async fn get_task(&self, task_id: &str) -> HashfleetResult<TaskPayload>;

    async fn get_file(&self, request: &GetFileRequest) -> HashfleetResult<RemoteFile>;

    async fn saved_cracked_password(
        &self,
        request: &CrackedPasswordRequest,
    ) -> HashfleetResult<()>;

    async fn send_task_status(&self, request: &TaskStatusRequest) -> HashfleetResult<()>;

    async fn save_checkpoint(&self, task_id: &str, data: Vec<u8>) -> HashfleetResult<()>;

    /// 没有检查点时返回 `Ok(None)`
    async fn get_checkpoint(&self, task_id: &str) -> HashfleetResult<Option<Vec<u8>>>;
}

/// 基于 reqwest 的 RPC 客户端，支持双向 TLS 与 gzip
pub struct RpcClient {
    base_url: String,
    http_client: reqwest::Client,
}

fn network_error(e: reqwest::Error) -> HashfleetError {
    HashfleetError::Network(e.to_string())
}

impl RpcClient {
    /// 使用已有的 HTTP 客户端，`base_url` 形如 `http://127.0.0.1:4014`
    pub fn new(base_url: impl Into<String>, http_client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        }
    }

    /// 按连接配置构建客户端
    ///
    /// 配置了证书时使用客户端证书做双向 TLS，并且只信任配置的 CA。
    /// 设置 `server_name` 时，请求发往该名称，但解析到 `connect_to` 的地址。
    pub fn from_config(connection: &ServerConnection) -> HashfleetResult<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .connect_timeout(Duration::from_secs(15));

        let scheme = if connection.tls_enabled() {
            let (Some(cert), Some(key), Some(ca)) = (
                &connection.certificate,
                &connection.private_key,
                &connection.ca_certificate,
            ) else {
                return Err(HashfleetError::Configuration(
                    "启用TLS时必须同时配置证书、私钥与CA".to_string(),
                ));
            };

            let mut identity_pem = std::fs::read(cert)?;
            identity_pem.push(b'\n');
            identity_pem.extend(std::fs::read(key)?);
            let identity = reqwest::Identity::from_pem(&identity_pem)
                .map_err(|e| HashfleetError::Configuration(format!("加载客户端证书失败: {e}")))?;
            let ca_cert = reqwest::Certificate::from_pem(&std::fs::read(ca)?)
                .map_err(|e| HashfleetError::Configuration(format!("加载CA证书失败: {e}")))?;

            builder = builder
                .use_rustls_tls()
                .tls_built_in_root_certs(false)
                .add_root_certificate(ca_cert)
                .identity(identity);
            "https"
        } else {
            "http"
        };

        let authority = match &connection.server_name {
            Some(name) => {
                let addr = connection
                    .connect_to
                    .to_socket_addrs()?
                    .next()
                    .ok_or_else(|| {
                        HashfleetError::Configuration(format!(
                            "无法解析服务端地址: {}",
                            connection.connect_to
                        ))
                    })?;
                builder = builder.resolve(name, addr);
                format!("{}:{}", name, addr.port())
            }
            None => connection.connect_to.clone(),
        };

        let http_client = builder
            .build()
            .map_err(|e| HashfleetError::Configuration(format!("创建HTTP客户端失败: {e}")))?;

        Ok(Self::new(format!("{scheme}://{authority}"), http_client))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/rpc/v1{}", self.base_url, path)
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> HashfleetResult<reqwest::Response> {
        let response = self
            .http_client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(network_error)?;
        Self::check(response).await
    }

    async fn call<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> HashfleetResult<R> {
        self.post_json(path, body)
            .await?
            .json::<R>()
            .await
            .map_err(network_error)
    }

    /// 非 2xx 响应转换为 [`HashfleetError::Rpc`]
    async fn check(response: reqwest::Response) -> HashfleetResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<RpcErrorBody>(&body)
            .map(|e| e.message)
            .unwrap_or(body);
        warn!("RPC调用失败: HTTP {} - {}", status, message);
        Err(HashfleetError::Rpc {
            status_code: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl ServerApi for RpcClient {
    async fn beacon(&self, request: &BeaconRequest) -> HashfleetResult<BeaconResponse> {
        self.call("/beacon", request).await
    }

    async fn change_task_status(&self, request: &ChangeTaskStatusRequest) -> HashfleetResult<()> {
        self.post_json("/task/status_change", request).await?;
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> HashfleetResult<TaskPayload> {
        self.call(
            "/task/payload",
            &GetTaskRequest {
                task_id: task_id.to_string(),
            },
        )
        .await
    }

    async fn get_file(&self, request: &GetFileRequest) -> HashfleetResult<RemoteFile> {
        let response = self.post_json("/file", request).await?;
        let hash = response
            .headers()
            .get(FILE_HASH_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                HashfleetError::Network(format!("文件 {} 的响应缺少摘要头", request.file_id))
            })?;

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(network_error))
            .boxed();

        Ok(RemoteFile { hash, stream })
    }

    async fn saved_cracked_password(
        &self,
        request: &CrackedPasswordRequest,
    ) -> HashfleetResult<()> {
        self.post_json("/task/cracked", request).await?;
        Ok(())
    }

    async fn send_task_status(&self, request: &TaskStatusRequest) -> HashfleetResult<()> {
        self.post_json("/task/status", request).await?;
        Ok(())
    }

    async fn save_checkpoint(&self, task_id: &str, data: Vec<u8>) -> HashfleetResult<()> {
        let response = self
            .http_client
            .post(self.url(&format!("/task/checkpoint/{task_id}")))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await
            .map_err(network_error)?;
        Self::check(response).await?;
        Ok(())
    }

    async fn get_checkpoint(&self, task_id: &str) -> HashfleetResult<Option<Vec<u8>>> {
        let response = self
            .http_client
            .get(self.url(&format!("/task/checkpoint/{task_id}")))
            .send()
            .await
            .map_err(network_error)?;

        if response.status() == StatusCode::NO_CONTENT {
            debug!("任务 {} 没有检查点", task_id);
            return Ok(None);
        }

        let bytes = Self::check(response)
            .await?
            .bytes()
            .await
            .map_err(network_error)?;
        Ok(Some(bytes.to_vec()))
    }
}
