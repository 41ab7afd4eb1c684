//! Cloud Control API client
//!
//! Every mutating call returns a request token; the request is then polled
//! through `GetResourceRequestStatus` until it settles.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use aws_sdk_cloudcontrol::Client as CloudControlClient;
use aws_sdk_cloudcontrol::types::ProgressEvent;
use converge_core::classify::RetryPolicy;
use converge_core::provider::{ErrorKind, ProviderError, ProviderResult};
use converge_core::resource::ResourceId;
use converge_core::retry::RetryError;
use converge_core::tags::{self, Tags};
use converge_core::wait::{Observed, WaitError, WaitSpec};
use converge_core::CancellationToken;
use log::{debug, info};
use serde::Serialize;
use uuid::Uuid;

use crate::config::ProviderConfig;
use crate::error::{AwsApiError, eventual_consistency};

/// Request states that mean "keep polling"
const REQUEST_PENDING: [&str; 3] = ["PENDING", "IN_PROGRESS", "CANCEL_IN_PROGRESS"];
const REQUEST_SUCCESS: &str = "SUCCESS";

/// Synthetic labels for the post-delete existence check
const RESOURCE_EXISTS: &str = "exists";
const RESOURCE_DELETED: &str = "deleted";

/// Handler error code reported when the resource is already gone
const HANDLER_NOT_FOUND: &str = "NotFound";

/// Snapshot of a Cloud Control resource request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestProgress {
    pub request_token: String,
    pub type_name: Option<String>,
    /// Primary identifier, once the handler has assigned one
    pub identifier: Option<String>,
    pub operation: Option<String>,
    pub status: String,
    pub status_message: Option<String>,
    pub error_code: Option<String>,
}

impl RequestProgress {
    fn from_event(api: &'static str, event: Option<&ProgressEvent>) -> Result<Self, AwsApiError> {
        let event = event
            .ok_or_else(|| AwsApiError::new(api, None, Some("response has no progress event")))?;
        let request_token = event
            .request_token()
            .ok_or_else(|| AwsApiError::new(api, None, Some("progress event has no request token")))?;

        Ok(Self {
            request_token: request_token.to_string(),
            type_name: event.type_name().map(str::to_string),
            identifier: event.identifier().map(str::to_string),
            operation: event.operation().map(|op| op.as_str().to_string()),
            status: event
                .operation_status()
                .map(|status| status.as_str().to_string())
                .unwrap_or_else(|| "UNKNOWN".to_string()),
            status_message: event.status_message().map(str::to_string),
            error_code: event.error_code().map(|code| code.as_str().to_string()),
        })
    }

    fn is_not_found(&self) -> bool {
        self.error_code.as_deref() == Some(HANDLER_NOT_FOUND)
    }
}

/// How a request wait ended
#[derive(Debug)]
enum RequestOutcome {
    Succeeded(RequestProgress),
    /// Settled in a state other than SUCCESS
    Failed {
        state: String,
        progress: Option<RequestProgress>,
    },
}

/// Error for a request that settled as FAILED or CANCEL_COMPLETE
fn request_failed(request_token: &str, state: &str, progress: Option<&RequestProgress>) -> ProviderError {
    let detail = progress
        .and_then(|p| p.status_message.as_deref())
        .unwrap_or("no status message");
    let message = match progress.and_then(|p| p.error_code.as_deref()) {
        Some(code) => format!("Request {} {}: {} ({})", request_token, state, detail, code),
        None => format!("Request {} {}: {}", request_token, state, detail),
    };
    ProviderError::new(message).with_kind(ErrorKind::UnexpectedState)
}

/// Map a finished request wait; `last` is the most recent progress seen
fn request_outcome<E>(
    request_token: &str,
    result: Result<Option<RequestProgress>, WaitError<E>>,
    last: Option<RequestProgress>,
) -> ProviderResult<RequestOutcome>
where
    E: std::error::Error + Send + Sync + 'static,
{
    match result {
        Ok(Some(progress)) => Ok(RequestOutcome::Succeeded(progress)),
        Ok(None) => Err(ProviderError::new(format!(
            "Request {} reported no status",
            request_token
        ))),
        Err(WaitError::UnexpectedState { state, .. }) => Ok(RequestOutcome::Failed {
            state,
            progress: last,
        }),
        Err(e) => Err(ProviderError::from_wait(
            &format!("wait for request {}", request_token),
            e,
        )),
    }
}

/// Where a delete stands after one of its steps
#[derive(Debug, PartialEq, Eq)]
enum Deletion<T> {
    AlreadyGone,
    Continue(T),
}

/// A `DeleteResource` call that reports not-found has nothing left to do
fn delete_requested(
    result: Result<RequestProgress, RetryError<AwsApiError>>,
) -> ProviderResult<Deletion<RequestProgress>> {
    match result {
        Ok(progress) => Ok(Deletion::Continue(progress)),
        Err(RetryError::Fatal(err)) if err.is_not_found() => Ok(Deletion::AlreadyGone),
        Err(err) => Err(ProviderError::from_retry("delete resource", err)),
    }
}

/// A delete request that FAILED with `NotFound` raced another deletion
fn delete_settled(
    request_token: &str,
    outcome: ProviderResult<RequestOutcome>,
) -> ProviderResult<Deletion<()>> {
    match outcome? {
        RequestOutcome::Succeeded(_) => Ok(Deletion::Continue(())),
        RequestOutcome::Failed {
            progress: Some(progress),
            ..
        } if progress.is_not_found() => Ok(Deletion::AlreadyGone),
        RequestOutcome::Failed { state, progress } => {
            Err(request_failed(request_token, &state, progress.as_ref()))
        }
    }
}

/// Poll `status` until the request leaves the pending states
async fn settle_request<E, F, Fut>(
    spec: &WaitSpec,
    cancel: &CancellationToken,
    request_token: &str,
    mut status: F,
) -> ProviderResult<RequestOutcome>
where
    E: std::error::Error + Send + Sync + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<RequestProgress, E>>,
{
    let last = Mutex::new(None::<RequestProgress>);
    let last_seen = &last;

    let result = spec
        .wait_with_cancel(cancel, || {
            let status = status();
            async move {
                let progress = status.await?;
                debug!(
                    "Request {} is {}{}",
                    request_token,
                    progress.status,
                    progress
                        .status_message
                        .as_deref()
                        .map(|m| format!(" ({})", m))
                        .unwrap_or_default()
                );
                if let Ok(mut slot) = last_seen.lock() {
                    *slot = Some(progress.clone());
                }
                let state = progress.status.clone();
                Ok::<_, E>(Some(Observed::new(progress, state)))
            }
        })
        .await;

    let last = last.lock().ok().and_then(|mut slot| slot.take());
    request_outcome(request_token, result, last)
}

/// Poll `read` until the resource can no longer be found
async fn settle_deletion<E, F, Fut>(
    spec: &WaitSpec,
    cancel: &CancellationToken,
    mut read: F,
) -> ProviderResult<()>
where
    E: std::error::Error + Send + Sync + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<serde_json::Value>, E>>,
{
    spec.wait_with_cancel(cancel, || {
        let read = read();
        async move {
            let state = match read.await? {
                Some(_) => RESOURCE_EXISTS,
                None => RESOURCE_DELETED,
            };
            Ok::<_, E>(Some(Observed::new((), state)))
        }
    })
    .await
    .map(|_| ())
    .map_err(|e| ProviderError::from_wait("wait for deletion", e))
}

/// Cloud Control client with waits and retries built in
pub struct CloudControl {
    client: CloudControlClient,
    config: ProviderConfig,
    retry_policy: RetryPolicy,
    cancel: CancellationToken,
}

impl CloudControl {
    /// Create a client from provider configuration
    pub async fn new(config: ProviderConfig) -> Self {
        let sdk_config = config.sdk_config().await;
        Self::with_client(CloudControlClient::new(&sdk_config), config)
    }

    pub fn with_client(client: CloudControlClient, config: ProviderConfig) -> Self {
        Self {
            client,
            config,
            retry_policy: eventual_consistency(),
            cancel: CancellationToken::new(),
        }
    }

    /// Abort in-flight waits and retries when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    // =========================================================================
    // Resource operations
    // =========================================================================

    /// Read a resource's properties; `None` when it does not exist
    pub async fn get(
        &self,
        type_name: &str,
        identifier: &str,
    ) -> ProviderResult<Option<serde_json::Value>> {
        self.config
            .propagation_retry()
            .retry_with_cancel(
                &self.cancel,
                self.retry_policy.predicate::<AwsApiError>(),
                || self.read(type_name, identifier),
            )
            .await
            .map_err(|e| {
                ProviderError::from_retry("get resource", e)
                    .for_resource(ResourceId::new(type_name, identifier))
            })
    }

    /// Create a resource and wait for the request to succeed
    pub async fn create(
        &self,
        type_name: &str,
        desired_state: &serde_json::Value,
    ) -> ProviderResult<RequestProgress> {
        let id = ResourceId::new(type_name, "(new)");
        let desired_state = desired_state.to_string();
        let client_token = Uuid::new_v4().to_string();
        let (desired, token) = (desired_state.as_str(), client_token.as_str());

        info!("Creating {} (client token {})", type_name, client_token);
        let progress = self
            .config
            .propagation_retry()
            .retry_with_cancel(
                &self.cancel,
                self.retry_policy.predicate::<AwsApiError>(),
                || async move {
                    let output = self
                        .client
                        .create_resource()
                        .type_name(type_name)
                        .desired_state(desired)
                        .client_token(token)
                        .send()
                        .await
                        .map_err(|e| AwsApiError::from_sdk("CreateResource", &e))?;
                    RequestProgress::from_event("CreateResource", output.progress_event())
                },
            )
            .await
            .map_err(|e| ProviderError::from_retry("create resource", e).for_resource(id.clone()))?;

        let progress = self
            .wait_for_request(&progress.request_token, self.config.create_timeout())
            .await
            .map_err(|e| e.for_resource(id))?;
        info!(
            "Created {} {}",
            type_name,
            progress.identifier.as_deref().unwrap_or("")
        );
        Ok(progress)
    }

    /// Apply JSON patch operations; an empty patch is a no-op
    pub async fn update(
        &self,
        type_name: &str,
        identifier: &str,
        patch: &[serde_json::Value],
    ) -> ProviderResult<Option<RequestProgress>> {
        if patch.is_empty() {
            debug!("No changes for {} {}", type_name, identifier);
            return Ok(None);
        }

        let id = ResourceId::new(type_name, identifier);
        let patch_document = serde_json::to_string(patch)
            .map_err(|e| ProviderError::new(format!("Failed to build patch: {}", e)).for_resource(id.clone()))?;
        let client_token = Uuid::new_v4().to_string();
        let (document, token) = (patch_document.as_str(), client_token.as_str());

        info!("Updating {}", id);
        let progress = self
            .config
            .propagation_retry()
            .retry_with_cancel(
                &self.cancel,
                self.retry_policy.predicate::<AwsApiError>(),
                || async move {
                    let output = self
                        .client
                        .update_resource()
                        .type_name(type_name)
                        .identifier(identifier)
                        .patch_document(document)
                        .client_token(token)
                        .send()
                        .await
                        .map_err(|e| AwsApiError::from_sdk("UpdateResource", &e))?;
                    RequestProgress::from_event("UpdateResource", output.progress_event())
                },
            )
            .await
            .map_err(|e| ProviderError::from_retry("update resource", e).for_resource(id.clone()))?;

        self.wait_for_request(&progress.request_token, self.config.update_timeout())
            .await
            .map(Some)
            .map_err(|e| e.for_resource(id))
    }

    /// Move the resource's user tags from `old` to `new`
    pub async fn update_tags(
        &self,
        type_name: &str,
        identifier: &str,
        old: &Tags,
        new: &Tags,
    ) -> ProviderResult<Option<RequestProgress>> {
        let patch = tags::to_patch_ops(old, new);
        self.update(type_name, identifier, &patch).await
    }

    /// Delete a resource and wait until it can no longer be read
    pub async fn delete(&self, type_name: &str, identifier: &str) -> ProviderResult<()> {
        let id = ResourceId::new(type_name, identifier);
        let client_token = Uuid::new_v4().to_string();
        let token = client_token.as_str();

        info!("Deleting {}", id);
        let requested = self
            .config
            .propagation_retry()
            .retry_with_cancel(
                &self.cancel,
                self.retry_policy.predicate::<AwsApiError>(),
                || async move {
                    let output = self
                        .client
                        .delete_resource()
                        .type_name(type_name)
                        .identifier(identifier)
                        .client_token(token)
                        .send()
                        .await
                        .map_err(|e| AwsApiError::from_sdk("DeleteResource", &e))?;
                    RequestProgress::from_event("DeleteResource", output.progress_event())
                },
            )
            .await;

        let progress = match delete_requested(requested).map_err(|e| e.for_resource(id.clone()))? {
            Deletion::Continue(progress) => progress,
            Deletion::AlreadyGone => {
                info!("{} is already gone", id);
                return Ok(());
            }
        };

        let request_token = progress.request_token;
        let timeout = self.config.delete_timeout();
        let outcome = self.poll_request(&request_token, timeout).await;
        if delete_settled(&request_token, outcome).map_err(|e| e.for_resource(id.clone()))?
            == Deletion::AlreadyGone
        {
            info!("{} is already gone", id);
            return Ok(());
        }

        self.wait_until_deleted(type_name, identifier, timeout)
            .await
            .map_err(|e| e.for_resource(id))
    }

    /// Wait for a resource request to reach SUCCESS
    pub async fn wait_for_request(
        &self,
        request_token: &str,
        timeout: Duration,
    ) -> ProviderResult<RequestProgress> {
        match self.poll_request(request_token, timeout).await? {
            RequestOutcome::Succeeded(progress) => Ok(progress),
            RequestOutcome::Failed { state, progress } => {
                Err(request_failed(request_token, &state, progress.as_ref()))
            }
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn read(
        &self,
        type_name: &str,
        identifier: &str,
    ) -> Result<Option<serde_json::Value>, AwsApiError> {
        let result = self
            .client
            .get_resource()
            .type_name(type_name)
            .identifier(identifier)
            .send()
            .await;

        match result {
            Ok(output) => match output.resource_description().and_then(|d| d.properties()) {
                Some(properties) => serde_json::from_str(properties).map(Some).map_err(|e| {
                    AwsApiError::new(
                        "GetResource",
                        None,
                        Some(&format!("invalid resource properties: {}", e)),
                    )
                }),
                None => Ok(None),
            },
            Err(e) => {
                let err = AwsApiError::from_sdk("GetResource", &e);
                if err.is_not_found() { Ok(None) } else { Err(err) }
            }
        }
    }

    async fn request_status(
        &self,
        request_token: &str,
    ) -> Result<RequestProgress, RetryError<AwsApiError>> {
        self.config
            .propagation_retry()
            .retry_with_cancel(
                &self.cancel,
                self.retry_policy.predicate::<AwsApiError>(),
                || async move {
                    let output = self
                        .client
                        .get_resource_request_status()
                        .request_token(request_token)
                        .send()
                        .await
                        .map_err(|e| AwsApiError::from_sdk("GetResourceRequestStatus", &e))?;
                    RequestProgress::from_event("GetResourceRequestStatus", output.progress_event())
                },
            )
            .await
    }

    async fn poll_request(
        &self,
        request_token: &str,
        timeout: Duration,
    ) -> ProviderResult<RequestOutcome> {
        let spec = self.config.wait_spec(REQUEST_PENDING, [REQUEST_SUCCESS], timeout);
        settle_request(&spec, &self.cancel, request_token, || {
            self.request_status(request_token)
        })
        .await
    }

    async fn wait_until_deleted(
        &self,
        type_name: &str,
        identifier: &str,
        timeout: Duration,
    ) -> ProviderResult<()> {
        let spec = self
            .config
            .wait_spec([RESOURCE_EXISTS], [RESOURCE_DELETED], timeout);

        settle_deletion(&spec, &self.cancel, || self.read(type_name, identifier)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_cloudcontrol::types::{HandlerErrorCode, Operation, OperationStatus};
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn event(status: OperationStatus) -> ProgressEvent {
        ProgressEvent::builder()
            .type_name("AWS::Logs::LogGroup")
            .identifier("app-logs")
            .request_token("req-123")
            .operation(Operation::Create)
            .operation_status(status)
            .build()
    }

    #[test]
    fn test_progress_from_event() {
        let progress =
            RequestProgress::from_event("GetResourceRequestStatus", Some(&event(OperationStatus::InProgress)))
                .unwrap();

        assert_eq!(progress.request_token, "req-123");
        assert_eq!(progress.status, "IN_PROGRESS");
        assert_eq!(progress.operation.as_deref(), Some("CREATE"));
        assert_eq!(progress.identifier.as_deref(), Some("app-logs"));
        assert!(REQUEST_PENDING.contains(&progress.status.as_str()));
    }

    #[test]
    fn test_progress_requires_event_and_token() {
        let err = RequestProgress::from_event("CreateResource", None).unwrap_err();
        assert_eq!(err.operation, "CreateResource");

        let no_token = ProgressEvent::builder()
            .operation_status(OperationStatus::Pending)
            .build();
        assert!(RequestProgress::from_event("CreateResource", Some(&no_token)).is_err());
    }

    #[test]
    fn test_failed_request_names_token_and_message() {
        let failed = ProgressEvent::builder()
            .request_token("req-9")
            .operation_status(OperationStatus::Failed)
            .status_message("Role is not authorized")
            .error_code(HandlerErrorCode::AccessDenied)
            .build();
        let progress = RequestProgress::from_event("GetResourceRequestStatus", Some(&failed)).unwrap();

        let err = request_failed("req-9", &progress.status, Some(&progress));
        assert_eq!(
            err.to_string(),
            "Request req-9 FAILED: Role is not authorized (AccessDenied)"
        );
        assert_eq!(err.kind, ErrorKind::UnexpectedState);
        assert!(!progress.is_not_found());
    }

    #[test]
    fn test_cancelled_request_without_progress() {
        let err = request_failed("req-1", "CANCEL_COMPLETE", None);
        assert_eq!(err.to_string(), "Request req-1 CANCEL_COMPLETE: no status message");
    }

    #[test]
    fn test_delete_of_missing_resource_is_not_found() {
        let failed = ProgressEvent::builder()
            .request_token("req-2")
            .operation(Operation::Delete)
            .operation_status(OperationStatus::Failed)
            .error_code(HandlerErrorCode::NotFound)
            .build();
        let progress = RequestProgress::from_event("GetResourceRequestStatus", Some(&failed)).unwrap();
        assert!(progress.is_not_found());
        assert_eq!(progress.operation.as_deref(), Some("DELETE"));
    }

    fn progress(status: &str) -> RequestProgress {
        RequestProgress {
            request_token: "req-7".to_string(),
            type_name: Some("AWS::Logs::LogGroup".to_string()),
            identifier: Some("app-logs".to_string()),
            operation: Some("DELETE".to_string()),
            status: status.to_string(),
            status_message: None,
            error_code: None,
        }
    }

    fn not_found(status: &str) -> RequestProgress {
        RequestProgress {
            error_code: Some(HANDLER_NOT_FOUND.to_string()),
            status_message: Some("LogGroup app-logs not found".to_string()),
            ..progress(status)
        }
    }

    /// Status calls that replay `steps` in order
    fn scripted<T: Send + 'static>(
        steps: Vec<T>,
    ) -> (
        Arc<AtomicU32>,
        impl FnMut() -> std::future::Ready<Result<T, std::io::Error>>,
    ) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut steps = VecDeque::from(steps);
        let next = move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(
                steps
                    .pop_front()
                    .ok_or_else(|| std::io::Error::other("no more steps")),
            )
        };
        (calls, next)
    }

    fn request_spec() -> WaitSpec {
        ProviderConfig::default().wait_spec(REQUEST_PENDING, [REQUEST_SUCCESS], Duration::from_secs(60))
    }

    #[test]
    fn test_unexpected_state_keeps_last_progress() {
        let result: Result<Option<RequestProgress>, WaitError<std::io::Error>> =
            Err(WaitError::UnexpectedState {
                state: "FAILED".to_string(),
                target: vec![REQUEST_SUCCESS.to_string()],
            });

        match request_outcome("req-7", result, Some(not_found("FAILED"))).unwrap() {
            RequestOutcome::Failed { state, progress } => {
                assert_eq!(state, "FAILED");
                assert!(progress.unwrap().is_not_found());
            }
            other => panic!("expected a failed request, got {:?}", other),
        }
    }

    #[test]
    fn test_request_wait_timeout_is_an_error() {
        let result: Result<Option<RequestProgress>, WaitError<std::io::Error>> =
            Err(WaitError::Timeout {
                last_state: Some("IN_PROGRESS".to_string()),
                target: vec![REQUEST_SUCCESS.to_string()],
                timeout: Duration::from_secs(60),
            });
        let err = request_outcome("req-7", result, Some(progress("IN_PROGRESS"))).unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().starts_with("wait for request req-7: timeout"));

        let empty: Result<Option<RequestProgress>, WaitError<std::io::Error>> = Ok(None);
        let err = request_outcome("req-7", empty, None).unwrap_err();
        assert_eq!(err.to_string(), "Request req-7 reported no status");
    }

    #[test]
    fn test_delete_request_for_missing_resource() {
        let missing = RetryError::Fatal(AwsApiError::new(
            "DeleteResource",
            Some("ResourceNotFoundException"),
            Some("Resource of type 'AWS::Logs::LogGroup' with identifier 'app-logs' was not found"),
        ));
        assert_eq!(delete_requested(Err(missing)).unwrap(), Deletion::AlreadyGone);

        let denied = RetryError::Fatal(AwsApiError::new(
            "DeleteResource",
            Some("AccessDeniedException"),
            None,
        ));
        let err = delete_requested(Err(denied)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Other);
        assert!(err.to_string().contains("AccessDeniedException"));

        let requested = delete_requested(Ok(progress("PENDING"))).unwrap();
        assert_eq!(requested, Deletion::Continue(progress("PENDING")));
    }

    #[test]
    fn test_delete_settled_outcomes() {
        let raced = RequestOutcome::Failed {
            state: "FAILED".to_string(),
            progress: Some(not_found("FAILED")),
        };
        assert_eq!(delete_settled("req-7", Ok(raced)).unwrap(), Deletion::AlreadyGone);

        let succeeded = RequestOutcome::Succeeded(progress("SUCCESS"));
        assert_eq!(
            delete_settled("req-7", Ok(succeeded)).unwrap(),
            Deletion::Continue(())
        );

        let cancelled = RequestOutcome::Failed {
            state: "CANCEL_COMPLETE".to_string(),
            progress: None,
        };
        let err = delete_settled("req-7", Ok(cancelled)).unwrap_err();
        assert_eq!(err.to_string(), "Request req-7 CANCEL_COMPLETE: no status message");

        let timed_out = Err(ProviderError::timeout("wait for request req-7"));
        assert!(delete_settled("req-7", timed_out).unwrap_err().is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_request_reports_failure_with_last_progress() {
        let (calls, status) = scripted(vec![
            progress("PENDING"),
            progress("IN_PROGRESS"),
            not_found("FAILED"),
        ]);

        let outcome = settle_request(&request_spec(), &CancellationToken::new(), "req-7", status)
            .await
            .unwrap();

        match outcome {
            RequestOutcome::Failed { state, progress } => {
                assert_eq!(state, "FAILED");
                let progress = progress.unwrap();
                assert_eq!(
                    progress.status_message.as_deref(),
                    Some("LogGroup app-logs not found")
                );
            }
            other => panic!("expected a failed request, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_request_success() {
        let (calls, status) = scripted(vec![progress("IN_PROGRESS"), progress("SUCCESS")]);

        let outcome = settle_request(&request_spec(), &CancellationToken::new(), "req-7", status)
            .await
            .unwrap();

        assert!(matches!(outcome, RequestOutcome::Succeeded(p) if p.status == "SUCCESS"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_request_status_error() {
        let (_, status) = scripted(Vec::<RequestProgress>::new());

        let err = settle_request(&request_spec(), &CancellationToken::new(), "req-7", status)
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Other);
        assert!(err.to_string().contains("no more steps"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_deletion_waits_until_gone() {
        let (calls, read) = scripted(vec![
            Some(serde_json::json!({"LogGroupName": "app-logs"})),
            Some(serde_json::json!({"LogGroupName": "app-logs"})),
            None,
        ]);
        let spec = ProviderConfig::default().wait_spec(
            [RESOURCE_EXISTS],
            [RESOURCE_DELETED],
            Duration::from_secs(60),
        );

        settle_deletion(&spec, &CancellationToken::new(), read).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_deletion_times_out() {
        let read = || std::future::ready(Ok::<_, std::io::Error>(Some(serde_json::json!({}))));
        let spec = ProviderConfig::default().wait_spec(
            [RESOURCE_EXISTS],
            [RESOURCE_DELETED],
            Duration::from_secs(30),
        );

        let err = settle_deletion(&spec, &CancellationToken::new(), read)
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("last state: 'exists'"));
    }

    #[test]
    fn test_progress_serializes_to_json() {
        let progress =
            RequestProgress::from_event("CreateResource", Some(&event(OperationStatus::Success))).unwrap();
        let json = serde_json::to_value(&progress).unwrap();
        assert_eq!(json["status"], "SUCCESS");
        assert_eq!(json["request_token"], "req-123");
    }
}
