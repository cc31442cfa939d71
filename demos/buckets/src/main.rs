//! Buckets API Example
//!
//! Demonstrates credgate's managed client-credentials tokens against an
//! object storage API.

// Example-specific lint allowances
#![allow(missing_docs)]
#![allow(clippy::print_stdout)]

use credgate::prelude::*;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Data Types
// ============================================================================

/// A storage bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    pub bucket_key: String,
    pub policy_key: String,
}

/// One page of buckets.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Buckets {
    pub items: Vec<Bucket>,
}

// ============================================================================
// API client
// ============================================================================

/// Thin typed wrapper over a credgate client.
#[derive(Debug, Clone)]
pub struct BucketsApi<C> {
    client: C,
    base_url: String,
}

impl<C: HttpClient> BucketsApi<C> {
    pub fn new(client: C, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    /// List the buckets visible to the application.
    pub async fn list(&self) -> Result<Buckets> {
        self.client
            .get_scoped(&self.url("/oss/v2/buckets"), "bucket:read")
            .await?
            .error_for_status()?
            .json()
    }

    /// Create a bucket.
    pub async fn create(&self, bucket: &Bucket) -> Result<Bucket> {
        self.client
            .post_json_scoped(&self.url("/oss/v2/buckets"), "bucket:create", bucket)
            .await?
            .error_for_status()?
            .json()
    }
}

// ============================================================================
// Main: Demonstrate usage
// ============================================================================

/// Reads credentials from `CREDGATE_CONFIG` (a JSON file) or from the
/// `CLIENT_ID` / `CLIENT_SECRET` environment variables.
fn load_auth_config() -> Result<AuthConfig> {
    if let Ok(path) = std::env::var("CREDGATE_CONFIG") {
        let content = std::fs::read(&path)
            .map_err(|err| Error::invalid_request(format!("cannot read {path}: {err}")))?;
        return credgate::from_json(&content);
    }

    Ok(AuthConfig {
        client_id: std::env::var("CLIENT_ID").ok(),
        client_secret: std::env::var("CLIENT_SECRET").ok(),
        ..AuthConfig::default()
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let client = HyperClient::builder()
        .with_client_credentials(load_auth_config()?)
        .with_resilience(ResilienceConfig::default())
        .with_logging()
        .build();

    let api = BucketsApi::new(client, "https://developer.api.autodesk.com");

    match api.list().await {
        Ok(buckets) => {
            for bucket in buckets.items {
                println!("{} ({})", bucket.bucket_key, bucket.policy_key);
            }
        }
        Err(err) if err.is_configuration() => {
            println!("Set CLIENT_ID and CLIENT_SECRET (or CREDGATE_CONFIG): {err}");
        }
        Err(err) => return Err(err),
    }

    Ok(())
}

// ============================================================================
// Tests using wiremock
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_json, header, method, path},
    };

    async fn mount_token(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/authentication/v2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token_type": "Bearer",
                "access_token": "demo-token",
                "expires_in": 3599
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    fn api(server: &MockServer) -> BucketsApi<HyperClient> {
        let address = credgate::url::Url::parse(&format!(
            "{}/authentication/v2/token",
            server.uri()
        ))
        .expect("token url");
        let client = HyperClient::builder()
            .with_client_credentials(
                AuthConfig::new("demo-id", "demo-secret").with_authentication_address(address),
            )
            .build();
        BucketsApi::new(client, server.uri())
    }

    #[tokio::test]
    async fn test_list_buckets() {
        let mock_server = MockServer::start().await;
        mount_token(&mock_server).await;

        Mock::given(method("GET"))
            .and(path("/oss/v2/buckets"))
            .and(header("Authorization", "Bearer demo-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"bucketKey": "models", "policyKey": "persistent"}]
            })))
            .expect(2)
            .mount(&mock_server)
            .await;

        let api = api(&mock_server);
        let first = api.list().await.expect("buckets");
        let second = api.list().await.expect("buckets again");

        assert_eq!(first, second);
        assert_eq!(
            first.items,
            vec![Bucket {
                bucket_key: "models".to_string(),
                policy_key: "persistent".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_create_bucket() {
        let mock_server = MockServer::start().await;
        mount_token(&mock_server).await;

        let bucket = Bucket {
            bucket_key: "renders".to_string(),
            policy_key: "transient".to_string(),
        };

        Mock::given(method("POST"))
            .and(path("/oss/v2/buckets"))
            .and(header("Authorization", "Bearer demo-token"))
            .and(body_json(&bucket))
            .respond_with(ResponseTemplate::new(200).set_body_json(&bucket))
            .expect(1)
            .mount(&mock_server)
            .await;

        let created = api(&mock_server).create(&bucket).await.expect("created");
        assert_eq!(created, bucket);
    }
}
