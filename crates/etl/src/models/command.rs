use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{EventWindow, MarketplaceEvent};
use crate::errors::Result;

/// Inbound request to sync one event for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationCommand {
    pub account_id: i64,
    pub event: MarketplaceEvent,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl OrchestrationCommand {
    pub fn new(account_id: i64, event: MarketplaceEvent, date_from: NaiveDate, date_to: NaiveDate) -> Self {
        Self {
            account_id,
            event,
            date_from,
            date_to,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Parses a queue message.
    pub fn from_json(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }

    pub fn window(&self) -> Result<EventWindow> {
        EventWindow::new(self.date_from, self.date_to)
    }

    /// The supplied request id, or a freshly minted UUID v7 when missing or blank.
    pub fn resolve_request_id(&self) -> String {
        match self.request_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => Uuid::now_v7().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_queue_message_without_request_id() {
        let cmd = OrchestrationCommand::from_json(
            r#"{"accountId":7,"event":"sales_fact","dateFrom":"2024-03-01","dateTo":"2024-03-02"}"#,
        )
        .unwrap();
        assert_eq!(cmd.account_id, 7);
        assert_eq!(cmd.event, MarketplaceEvent::SalesFact);
        assert!(cmd.request_id.is_none());

        let minted = cmd.resolve_request_id();
        assert!(Uuid::parse_str(&minted).is_ok());
        assert_ne!(minted, cmd.resolve_request_id());
    }

    #[test]
    fn keeps_supplied_request_id() {
        let cmd = OrchestrationCommand::from_json(
            r#"{"accountId":1,"event":"FACT_FINANCE","dateFrom":"2024-03-01","dateTo":"2024-03-01","requestId":"req-1"}"#,
        )
        .unwrap();
        assert_eq!(cmd.resolve_request_id(), "req-1");
    }

    #[test]
    fn inverted_window_is_rejected() {
        let cmd = OrchestrationCommand::new(
            1,
            MarketplaceEvent::SalesFact,
            NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        );
        assert!(cmd.window().is_err());
    }
}
