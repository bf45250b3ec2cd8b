//! HTTP/JSON worker scheduler client.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error};

use super::{ResourcePlan, SchedulerError, SchedulerResult, WorkerScheduler};
use crate::job::SlotRelease;

pub struct HttpWorkerScheduler {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct ReleaseSlotsRequest<'a> {
    slots: &'a [SlotRelease],
}

impl HttpWorkerScheduler {
    pub fn new(base_url: impl Into<String>) -> SchedulerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn check(response: reqwest::Response, what: &str) -> SchedulerResult<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        error!(status = %status, body = %body, "Scheduler rejected {what}");
        Err(SchedulerError::Rejected {
            status: status.as_u16(),
            message: body,
        })
    }
}

#[async_trait]
impl WorkerScheduler for HttpWorkerScheduler {
    async fn push_plan(&self, plan: &ResourcePlan) -> SchedulerResult<()> {
        let url = format!("{}/v1/plans", self.base_url);
        debug!(url = %url, plan_id = %plan.plan_id, roles = plan.roles.len(), "Pushing resource plan");

        let response = self.client.put(&url).json(plan).send().await?;
        Self::check(response, "plan").await?;
        Ok(())
    }

    async fn release_slots(&self, slots: &[SlotRelease]) -> SchedulerResult<()> {
        let url = format!("{}/v1/slots/release", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&ReleaseSlotsRequest { slots })
            .send()
            .await?;
        Self::check(response, "slot release").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_push_plan() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/plans"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let scheduler = HttpWorkerScheduler::new(server.uri()).unwrap();
        let plan = ResourcePlan::build(&[], vec![], Utc::now());
        scheduler.push_plan(&plan).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_plan() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/plans"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let scheduler = HttpWorkerScheduler::new(server.uri()).unwrap();
        let plan = ResourcePlan::build(&[], vec![], Utc::now());
        let err = scheduler.push_plan(&plan).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Rejected { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_release_slots_posts_batch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/slots/release"))
            .and(body_partial_json(serde_json::json!({
                "slots": [{"slot_id": "s1", "host": "h1"}]
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let scheduler = HttpWorkerScheduler::new(server.uri()).unwrap();
        let release = SlotRelease {
            slot_id: "s1".to_string(),
            role_name: "a:t:1.builder".to_string(),
            host: "h1".to_string(),
            reason: "slow worker".to_string(),
        };
        scheduler.release_slots(&[release]).await.unwrap();
    }
}
