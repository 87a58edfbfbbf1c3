//! HTTP client for the order REST API.
//!
//! Used by reconciliation to pull the authoritative order list after
//! missed push events, and to place new orders.

use crate::error::{RestError, RestResult};
use orderlink_core::{Identity, Order, OrderDraft, OrderPage};
use orderlink_sync::{BoxFuture, OrderSource, SyncResult};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub const HEADER_USER_ROLE: &str = "X-User-Role";
pub const HEADER_USER_ID: &str = "X-User-Id";

/// Some deployments wrap payloads as `{"success": true, "data": ...}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Envelope<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> Envelope<T> {
    fn into_inner(self) -> T {
        match self {
            Self::Wrapped { data } => data,
            Self::Bare(inner) => inner,
        }
    }
}

/// Client for the order REST API.
#[derive(Clone)]
pub struct RestClient {
    client: Client,
    base_url: String,
}

impl RestClient {
    /// Create a client for `base_url` (e.g. `https://shop.example.com/api`).
    pub fn new(base_url: impl Into<String>) -> RestResult<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> RestResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RestError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET {base}/orders?page=&limit=`.
    pub async fn fetch_orders(
        &self,
        identity: &Identity,
        page: u32,
        page_size: u32,
    ) -> RestResult<OrderPage> {
        let url = format!("{}/orders", self.base_url);
        debug!(%url, page, page_size, %identity, "Fetching orders");

        let request = self
            .client
            .get(&url)
            .query(&[("page", page), ("limit", page_size)]);
        let response = self.send(request, identity).await?;
        decode::<OrderPage>(response).await
    }

    /// `POST {base}/orders`.
    pub async fn place_order(&self, identity: &Identity, draft: &OrderDraft) -> RestResult<Order> {
        let url = format!("{}/orders", self.base_url);
        info!(%url, items = draft.items.len(), %identity, "Placing order");

        let request = self.client.post(&url).json(draft);
        let response = self.send(request, identity).await?;
        decode::<Order>(response).await
    }

    async fn send(&self, request: RequestBuilder, identity: &Identity) -> RestResult<Response> {
        let response = request
            .header(HEADER_USER_ROLE, identity.role.as_str())
            .header(HEADER_USER_ID, identity.id.as_str())
            .send()
            .await
            .map_err(|e| RestError::HttpClient(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RestError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> RestResult<T> {
    let body = response
        .text()
        .await
        .map_err(|e| RestError::Decode(format!("Failed to read body: {e}")))?;
    let envelope: Envelope<T> = serde_json::from_str(&body)?;
    Ok(envelope.into_inner())
}

impl OrderSource for RestClient {
    fn fetch_orders(
        &self,
        identity: &Identity,
        page: u32,
        page_size: u32,
    ) -> BoxFuture<'static, SyncResult<OrderPage>> {
        let client = self.clone();
        let identity = identity.clone();
        Box::pin(async move {
            Ok(RestClient::fetch_orders(&client, &identity, page, page_size).await?)
        })
    }

    fn place_order(
        &self,
        identity: &Identity,
        draft: OrderDraft,
    ) -> BoxFuture<'static, SyncResult<Order>> {
        let client = self.clone();
        let identity = identity.clone();
        Box::pin(async move { Ok(RestClient::place_order(&client, &identity, &draft).await?) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::{GET, POST};
    use httpmock::MockServer;
    use orderlink_core::{DraftItem, OrderStatus};
    use orderlink_sync::SyncError;
    use rust_decimal_macros::dec;

    fn buyer() -> Identity {
        Identity::buyer("B1").unwrap()
    }

    #[tokio::test]
    async fn test_fetch_orders_sends_identity_and_paging() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/orders")
                    .query_param("page", "2")
                    .query_param("limit", "20")
                    .header(HEADER_USER_ROLE, "buyer")
                    .header(HEADER_USER_ID, "B1");
                then.status(200).json_body(serde_json::json!({
                    "orders": [{
                        "orderId": "O2",
                        "orderNumber": "ORD-2",
                        "status": "shipped",
                        "totalPrice": "42.50",
                        "items": [],
                        "lastUpdated": 200
                    }],
                    "pagination": {"page": 2, "pageSize": 20, "totalPages": 2, "total": 21}
                }));
            })
            .await;

        let client = RestClient::new(server.base_url()).unwrap();
        let page = client.fetch_orders(&buyer(), 2, 20).await.unwrap();

        mock.assert_async().await;
        assert_eq!(page.orders.len(), 1);
        assert_eq!(page.orders[0].status, OrderStatus::Shipped);
        assert_eq!(page.orders[0].total_price, dec!(42.50));
        assert!(!page.pagination.has_next());
    }

    #[tokio::test]
    async fn test_wrapped_response_accepted() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/orders");
                then.status(200).json_body(serde_json::json!({
                    "success": true,
                    "data": {
                        "orders": [],
                        "pagination": {"page": 1, "pageSize": 50, "totalPages": 0, "total": 0}
                    }
                }));
            })
            .await;

        let client = RestClient::new(server.base_url()).unwrap();
        let page = client.fetch_orders(&buyer(), 1, 50).await.unwrap();
        assert!(page.orders.is_empty());
    }

    #[tokio::test]
    async fn test_http_error_maps_to_fetch_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/orders");
                then.status(503).body("maintenance");
            })
            .await;

        let client = RestClient::new(server.base_url()).unwrap();
        let err = client.fetch_orders(&buyer(), 1, 50).await.unwrap_err();
        assert!(matches!(err, RestError::Status { status: 503, .. }));
        assert!(err.is_retryable());

        let source: &dyn OrderSource = &client;
        let err = source.fetch_orders(&buyer(), 1, 50).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_client_error_not_retryable() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/orders");
                then.status(403).body("forbidden");
            })
            .await;

        let client = RestClient::new(server.base_url()).unwrap();
        let source: &dyn OrderSource = &client;
        let err = source.fetch_orders(&buyer(), 1, 50).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Fetch {
                retryable: false,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_place_order_posts_draft() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/orders")
                    .header(HEADER_USER_ID, "B1")
                    .json_body(serde_json::json!({
                        "items": [{"productId": "P1", "quantity": 2}]
                    }));
                then.status(201).json_body(serde_json::json!({
                    "orderId": "O9",
                    "orderNumber": "ORD-9",
                    "status": "Pending",
                    "totalPrice": 19.98,
                    "lastUpdated": 500
                }));
            })
            .await;

        let client = RestClient::new(format!("{}/", server.base_url())).unwrap();
        let draft = OrderDraft {
            items: vec![DraftItem {
                product_id: "P1".to_string(),
                quantity: 2,
            }],
            shipping_address: None,
            payment_method: None,
        };
        let order = client.place_order(&buyer(), &draft).await.unwrap();

        mock.assert_async().await;
        assert_eq!(order.order_number, "ORD-9");
        assert_eq!(order.status, OrderStatus::Pending);
    }
}
