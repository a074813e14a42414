use std::fs;
use std::path::PathBuf;

use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider, SpanData};
use tempfile::TempDir;
use traefik_tower::config::AuthConfig;
use traefik_tower::services::InboundRequest;
use traefik_tower::{HttpClient, TracerHandle};

/// Provider plus in-memory exporter collecting every finished span
///
/// Holds the provider so spans survive the services built from
/// [`SpanRecorder::tracer`]: the in-memory exporter is reset when its
/// provider shuts down.
#[allow(dead_code)]
pub struct SpanRecorder {
    provider: SdkTracerProvider,
    exporter: InMemorySpanExporter,
}

#[allow(dead_code)]
impl SpanRecorder {
    pub fn new() -> Self {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        Self { provider, exporter }
    }

    pub fn tracer(&self) -> TracerHandle {
        TracerHandle::from_provider(&self.provider)
    }

    pub fn finished(&self) -> Vec<SpanData> {
        self.exporter
            .get_finished_spans()
            .expect("in-memory exporter is readable")
    }
}

#[allow(dead_code)]
pub fn span_attribute(span: &SpanData, key: &str) -> Option<String> {
    span.attributes
        .iter()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| kv.value.to_string())
}

#[allow(dead_code)]
pub fn http_client() -> HttpClient {
    let config = AuthConfig {
        request_timeout_secs: 5,
        ..AuthConfig::default()
    };
    HttpClient::new(&config).expect("client builds")
}

/// Inbound request with an optional `Authorization` value
#[allow(dead_code)]
pub fn inbound(method: http::Method, authorization: Option<&str>) -> InboundRequest {
    let mut headers = http::HeaderMap::new();
    if let Some(value) = authorization {
        headers.insert(
            http::header::AUTHORIZATION,
            http::HeaderValue::from_str(value).expect("valid header"),
        );
    }
    InboundRequest::new(method, "/", headers)
}

/// Base URL that refuses connections
#[allow(dead_code)]
pub fn unreachable_url() -> url::Url {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    url::Url::parse(&format!("http://{}", addr)).expect("valid url")
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}
