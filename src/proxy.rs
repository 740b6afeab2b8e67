use std::time::Duration;

use crate::cache::{TtlCache, make_cache_key};
use crate::error::GatewayError;
use crate::load_balancer::LoadBalancer;
use crate::models::{GenerateRequest, GenerateResponse};

/// Forwards generate calls to the next healthy upstream, serving repeats
/// of the same model + prompt from the response cache.
pub struct Upstream {
    client: reqwest::Client,
    cache: TtlCache,
    ttl: Duration,
    timeout: Duration,
}

impl Upstream {
    pub fn new(client: reqwest::Client, cache: TtlCache, ttl: Duration, timeout: Duration) -> Self {
        Self {
            client,
            cache,
            ttl,
            timeout,
        }
    }

    pub async fn generate(
        &self,
        load_balancer: &LoadBalancer,
        request: &GenerateRequest,
    ) -> Result<GenerateResponse, GatewayError> {
        let cache_key = make_cache_key(request);

        // check cache first
        if let Some(cached) = self.cache.get::<GenerateResponse>(&cache_key).await {
            tracing::debug!(model = %request.model, "Response cache hit");
            return Ok(cached);
        }

        let backend = load_balancer.get_backend().ok_or(GatewayError::NoHealthyBackend)?;
        tracing::debug!(url = %backend.url, model = %request.model, "Forwarding generate request");

        // responses are buffered whole, so upstream streaming stays off
        let mut body = request.clone();
        body.stream = false;

        let res = match self
            .client
            .post(format!("{}/api/generate", backend.url))
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(res) => res,
            // Marking backend as unhealthy until the next health cycle
            Err(e) => {
                backend.set_healthy(false);
                tracing::warn!(url = %backend.url, error = %e, "Upstream failed, marked unhealthy");
                return Err(GatewayError::Upstream(e.to_string()));
            }
        };

        let status = res.status();
        if !status.is_success() {
            return Err(GatewayError::Upstream(format!(
                "{} answered with status {}",
                backend.url, status
            )));
        }

        let response: GenerateResponse = match res.json().await {
            Ok(response) => response,
            // stalled mid-body
            Err(e) if e.is_timeout() => {
                backend.set_healthy(false);
                tracing::warn!(url = %backend.url, error = %e, "Upstream stalled, marked unhealthy");
                return Err(GatewayError::Upstream(e.to_string()));
            }
            Err(e) => return Err(GatewayError::Upstream(format!("parse error: {}", e))),
        };

        // saving to cache
        if let Err(e) = self.cache.put(&cache_key, &response, self.ttl).await {
            tracing::warn!(error = %e, "Failed to cache upstream response");
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_stalled_upstream_times_out_and_leaves_rotation() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let lb = LoadBalancer::new(&[format!("http://{addr}")]).unwrap();
        let upstream = Upstream::new(
            reqwest::Client::new(),
            TtlCache::in_memory(),
            Duration::from_secs(30),
            Duration::from_millis(300),
        );

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            upstream.generate(&lb, &GenerateRequest::new("llama3", "hi")),
        )
        .await
        .expect("generate should give up at the request timeout");

        assert!(matches!(result, Err(GatewayError::Upstream(_))));
        assert!(!lb.all_backends()[0].is_healthy());
        assert!(lb.get_backend().is_none());
    }

    #[tokio::test]
    async fn test_no_healthy_backend() {
        let lb = LoadBalancer::new(&["http://127.0.0.1:9".to_string()]).unwrap();
        lb.all_backends()[0].set_healthy(false);
        let upstream = Upstream::new(
            reqwest::Client::new(),
            TtlCache::in_memory(),
            Duration::from_secs(30),
            Duration::from_secs(1),
        );

        let result = upstream.generate(&lb, &GenerateRequest::new("llama3", "hi")).await;
        assert!(matches!(result, Err(GatewayError::NoHealthyBackend)));
    }
}
