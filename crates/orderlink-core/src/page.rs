//! REST collaborator payloads: paged order listings and order drafts.

use crate::order::Order;
use serde::{Deserialize, Serialize};

/// Pagination block of a listing response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub total: u64,
}

impl Pagination {
    /// Whether a page after this one exists.
    pub fn has_next(&self) -> bool {
        self.page < self.total_pages
    }
}

/// One page of `fetchOrders`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPage {
    pub orders: Vec<Order>,
    pub pagination: Pagination,
}

/// Line of an order draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftItem {
    pub product_id: String,
    pub quantity: u32,
}

/// Input to `placeOrder`. Address and payment details are owned by the
/// checkout collaborator and passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDraft {
    pub items: Vec<DraftItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipping_address: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_has_next() {
        let p = Pagination {
            page: 1,
            page_size: 10,
            total_pages: 3,
            total: 25,
        };
        assert!(p.has_next());
        assert!(!Pagination { page: 3, ..p }.has_next());
    }

    #[test]
    fn test_order_page_deserialize() {
        let raw = r#"{
            "orders": [{"orderId":"O2","orderNumber":"ORD-2","status":"shipped","lastUpdated":200}],
            "pagination": {"page":1,"pageSize":20,"totalPages":1,"total":1}
        }"#;
        let page: OrderPage = serde_json::from_str(raw).unwrap();
        assert_eq!(page.orders.len(), 1);
        assert!(!page.pagination.has_next());
    }
}
