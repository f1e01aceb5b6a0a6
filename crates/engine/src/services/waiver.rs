//! Waiver service trait and in-memory implementation.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::{BookingId, BusinessId, CustomerId};

use crate::error::EngineError;

/// Who the waiver is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaiverRequest {
    pub business_id: BusinessId,
    pub customer_id: CustomerId,
    pub booking_id: BookingId,
}

/// A generated waiver document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaiverDocument {
    pub document_id: String,
    pub document_url: String,
}

/// Trait for the external waiver generator.
///
/// May be called more than once for the same booking; the stored waiver
/// keeps the latest document.
#[async_trait]
pub trait WaiverService: Send + Sync {
    async fn request_waiver(&self, request: WaiverRequest) -> Result<WaiverDocument, EngineError>;
}

#[derive(Debug, Default)]
struct InMemoryWaiverState {
    requests: Vec<WaiverRequest>,
    fail_on_request: bool,
}

/// In-memory waiver service.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWaiverService {
    state: Arc<RwLock<InMemoryWaiverState>>,
}

impl InMemoryWaiverService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_on_request(&self, fail: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_on_request = fail;
    }

    /// Number of successful requests.
    pub fn request_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .requests
            .len()
    }
}

#[async_trait]
impl WaiverService for InMemoryWaiverService {
    async fn request_waiver(&self, request: WaiverRequest) -> Result<WaiverDocument, EngineError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        if state.fail_on_request {
            return Err(EngineError::WaiverService(
                "Waiver provider unavailable".to_string(),
            ));
        }

        state.requests.push(request.clone());
        let document_id = format!("wvr_{:04}", state.requests.len());
        Ok(WaiverDocument {
            document_url: format!(
                "https://waivers.example.com/{}/{document_id}",
                request.business_id
            ),
            document_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> WaiverRequest {
        WaiverRequest {
            business_id: BusinessId::new(),
            customer_id: CustomerId::new(),
            booking_id: BookingId::new(),
        }
    }

    #[tokio::test]
    async fn test_each_request_issues_a_document() {
        let service = InMemoryWaiverService::new();

        let first = service.request_waiver(request()).await.unwrap();
        let second = service.request_waiver(request()).await.unwrap();

        assert_eq!(first.document_id, "wvr_0001");
        assert_ne!(first.document_id, second.document_id);
        assert!(second.document_url.ends_with("/wvr_0002"));
        assert_eq!(service.request_count(), 2);
    }

    #[tokio::test]
    async fn test_fail_on_request() {
        let service = InMemoryWaiverService::new();
        service.set_fail_on_request(true);

        assert!(service.request_waiver(request()).await.is_err());
        assert_eq!(service.request_count(), 0);
    }
}
