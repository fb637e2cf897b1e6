use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;

use crate::domain::DomainError;

/// Stream type for HTTP responses
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, DomainError>> + Send>>;

/// A file part of a multipart request
#[derive(Debug, Clone, PartialEq)]
pub struct MultipartFile {
    pub field: String,
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Bytes,
}

/// Body of a multipart/form-data request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultipartForm {
    pub fields: Vec<(String, String)>,
    pub files: Vec<MultipartFile>,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn file(mut self, file: MultipartFile) -> Self {
        self.files.push(file);
        self
    }

    /// JSON view of the text fields, used when recording requests
    pub fn fields_json(&self) -> serde_json::Value {
        self.fields
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect::<serde_json::Map<_, _>>()
            .into()
    }

    fn into_reqwest(self) -> Result<reqwest::multipart::Form, DomainError> {
        let mut form = reqwest::multipart::Form::new();
        for (name, value) in self.fields {
            form = form.text(name, value);
        }
        for file in self.files {
            let part = reqwest::multipart::Part::bytes(file.bytes.to_vec())
                .file_name(file.file_name)
                .mime_str(&file.mime_type)
                .map_err(|e| DomainError::http(None, format!("Invalid MIME type: {}", e)))?;
            form = form.part(file.field, part);
        }
        Ok(form)
    }
}

/// Trait for HTTP client operations (for mocking)
#[async_trait]
pub trait HttpClientTrait: Send + Sync + std::fmt::Debug {
    async fn post_json(
        &self,
        url: &str,
        headers: Vec<(&str, &str)>,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, DomainError>;

    async fn post_json_stream(
        &self,
        url: &str,
        headers: Vec<(&str, &str)>,
        body: &serde_json::Value,
    ) -> Result<ByteStream, DomainError>;

    async fn post_multipart(
        &self,
        url: &str,
        headers: Vec<(&str, &str)>,
        form: MultipartForm,
    ) -> Result<serde_json::Value, DomainError>;

    async fn get_bytes(&self, url: &str) -> Result<Bytes, DomainError>;

    /// `Content-Type` reported by a HEAD request, if any
    async fn head_content_type(&self, url: &str) -> Result<Option<String>, DomainError>;
}

/// Real HTTP client using reqwest
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, DomainError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DomainError::configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, DomainError> {
        let response = request
            .send()
            .await
            .map_err(|e| DomainError::http(None, format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(DomainError::http(Some(status.as_u16()), error_body));
        }

        Ok(response)
    }

    fn with_headers(
        mut request: reqwest::RequestBuilder,
        headers: Vec<(&str, &str)>,
    ) -> reqwest::RequestBuilder {
        for (key, value) in headers {
            request = request.header(key, value);
        }
        request
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClientTrait for HttpClient {
    async fn post_json(
        &self,
        url: &str,
        headers: Vec<(&str, &str)>,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, DomainError> {
        let request = Self::with_headers(self.client.post(url), headers).json(body);
        let response = self.send(request).await?;

        response
            .json()
            .await
            .map_err(|e| DomainError::http(None, format!("Failed to parse response: {}", e)))
    }

    async fn post_json_stream(
        &self,
        url: &str,
        headers: Vec<(&str, &str)>,
        body: &serde_json::Value,
    ) -> Result<ByteStream, DomainError> {
        let request = Self::with_headers(self.client.post(url), headers).json(body);
        let response = self.send(request).await?;

        let stream = response.bytes_stream().map(|result| {
            result.map_err(|e| DomainError::http(None, format!("Stream error: {}", e)))
        });

        Ok(Box::pin(stream))
    }

    async fn post_multipart(
        &self,
        url: &str,
        headers: Vec<(&str, &str)>,
        form: MultipartForm,
    ) -> Result<serde_json::Value, DomainError> {
        let request =
            Self::with_headers(self.client.post(url), headers).multipart(form.into_reqwest()?);
        let response = self.send(request).await?;

        response
            .json()
            .await
            .map_err(|e| DomainError::http(None, format!("Failed to parse response: {}", e)))
    }

    async fn get_bytes(&self, url: &str) -> Result<Bytes, DomainError> {
        let response = self.send(self.client.get(url)).await?;
        response
            .bytes()
            .await
            .map_err(|e| DomainError::http(None, format!("Failed to read body: {}", e)))
    }

    async fn head_content_type(&self, url: &str) -> Result<Option<String>, DomainError> {
        let response = self.send(self.client.head(url)).await?;
        Ok(response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_post_json_sends_headers_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat"))
            .and(header("authorization", "Bearer k"))
            .and(body_json(json!({"a": 1})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;

        let client = HttpClient::new();
        let result = client
            .post_json(
                &format!("{}/v1/chat", server.uri()),
                vec![("Authorization", "Bearer k")],
                &json!({"a": 1}),
            )
            .await
            .unwrap();

        assert_eq!(result, json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_error_status_is_kept() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let error = HttpClient::new()
            .post_json(&server.uri(), vec![], &json!({}))
            .await
            .unwrap_err();

        assert_eq!(error, DomainError::http(Some(429), "slow down"));
    }

    #[tokio::test]
    async fn test_stream_yields_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("data: 1\n\n", "text/event-stream"))
            .mount(&server)
            .await;

        let stream = HttpClient::new()
            .post_json_stream(&server.uri(), vec![], &json!({}))
            .await
            .unwrap();
        let body: Vec<u8> = stream
            .map(|chunk| chunk.unwrap().to_vec())
            .concat()
            .await;

        assert_eq!(body, b"data: 1\n\n");
    }

    #[tokio::test]
    async fn test_head_and_get() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/cat"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-type", "image/png"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/cat"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
            .mount(&server)
            .await;

        let client = HttpClient::with_timeout(Duration::from_secs(5)).unwrap();
        let url = format!("{}/cat", server.uri());

        assert_eq!(
            client.head_content_type(&url).await.unwrap().as_deref(),
            Some("image/png")
        );
        assert_eq!(client.get_bytes(&url).await.unwrap(), Bytes::from_static(&[1, 2, 3]));
    }

    #[tokio::test]
    async fn test_mock_records_bodies() {
        let client = mock::MockHttpClient::new().with_response("http://x", json!({"r": 1}));
        client
            .post_json("http://x", vec![], &json!({"first": true}))
            .await
            .unwrap();
        client
            .post_json("http://x", vec![], &json!({"second": true}))
            .await
            .unwrap();

        assert_eq!(client.last_body(), Some(json!({"second": true})));
        assert_eq!(client.bodies_for("http://x").len(), 2);
    }
}
