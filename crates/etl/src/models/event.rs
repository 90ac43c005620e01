use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Business events a sync request can target.
///
/// Facts reference dictionaries; see [`MarketplaceEvent::required_events`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MarketplaceEvent {
    WarehouseDict,
    CategoryDict,
    TariffDict,
    ProductDict,
    SalesFact,
    ShipmentFact,
    SupplyAcceptedFact,
    InventoryFact,
    FactLogisticsCosts,
    FactFinance,
    FactCommission,
}

impl MarketplaceEvent {
    pub const ALL: [MarketplaceEvent; 11] = [
        MarketplaceEvent::WarehouseDict,
        MarketplaceEvent::CategoryDict,
        MarketplaceEvent::TariffDict,
        MarketplaceEvent::ProductDict,
        MarketplaceEvent::SalesFact,
        MarketplaceEvent::ShipmentFact,
        MarketplaceEvent::SupplyAcceptedFact,
        MarketplaceEvent::InventoryFact,
        MarketplaceEvent::FactLogisticsCosts,
        MarketplaceEvent::FactFinance,
        MarketplaceEvent::FactCommission,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketplaceEvent::WarehouseDict => "WAREHOUSE_DICT",
            MarketplaceEvent::CategoryDict => "CATEGORY_DICT",
            MarketplaceEvent::TariffDict => "TARIFF_DICT",
            MarketplaceEvent::ProductDict => "PRODUCT_DICT",
            MarketplaceEvent::SalesFact => "SALES_FACT",
            MarketplaceEvent::ShipmentFact => "SHIPMENT_FACT",
            MarketplaceEvent::SupplyAcceptedFact => "SUPPLY_ACCEPTED_FACT",
            MarketplaceEvent::InventoryFact => "INVENTORY_FACT",
            MarketplaceEvent::FactLogisticsCosts => "FACT_LOGISTICS_COSTS",
            MarketplaceEvent::FactFinance => "FACT_FINANCE",
            MarketplaceEvent::FactCommission => "FACT_COMMISSION",
        }
    }

    pub fn is_dictionary(&self) -> bool {
        matches!(
            self,
            MarketplaceEvent::WarehouseDict
                | MarketplaceEvent::CategoryDict
                | MarketplaceEvent::TariffDict
                | MarketplaceEvent::ProductDict
        )
    }

    /// Events that must have completed for the same account before this one
    /// runs. Every fact needs the product dictionary; dictionaries need nothing.
    pub fn required_events(&self) -> &'static [MarketplaceEvent] {
        if self.is_dictionary() {
            &[]
        } else {
            &[MarketplaceEvent::ProductDict]
        }
    }

    /// Lowercase form, e.g. `sales_fact`.
    pub fn tag(&self) -> String {
        self.as_str().to_ascii_lowercase()
    }
}

impl fmt::Display for MarketplaceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarketplaceEvent {
    type Err = String;

    /// Parses either form (`SALES_FACT` or `sales_fact`), ignoring surrounding whitespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        MarketplaceEvent::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| format!("Unknown marketplace event: {}", s))
    }
}

impl TryFrom<String> for MarketplaceEvent {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MarketplaceEvent> for String {
    fn from(event: MarketplaceEvent) -> Self {
        event.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!(
            "sales_fact".parse::<MarketplaceEvent>(),
            Ok(MarketplaceEvent::SalesFact)
        );
        assert_eq!(
            " FACT_FINANCE ".parse::<MarketplaceEvent>(),
            Ok(MarketplaceEvent::FactFinance)
        );
        assert!("SALES".parse::<MarketplaceEvent>().is_err());
    }

    #[test]
    fn serializes_as_screaming_name() {
        let json = serde_json::to_string(&MarketplaceEvent::InventoryFact).unwrap();
        assert_eq!(json, "\"INVENTORY_FACT\"");
        let back: MarketplaceEvent = serde_json::from_str("\"inventory_fact\"").unwrap();
        assert_eq!(back, MarketplaceEvent::InventoryFact);
    }

    #[test]
    fn tag_is_lowercase() {
        assert_eq!(MarketplaceEvent::FactLogisticsCosts.tag(), "fact_logistics_costs");
    }

    #[test]
    fn facts_require_the_product_dictionary() {
        for event in MarketplaceEvent::ALL {
            if event.is_dictionary() {
                assert!(event.required_events().is_empty(), "{event}");
            } else {
                assert_eq!(event.required_events(), [MarketplaceEvent::ProductDict], "{event}");
            }
        }
        assert!(MarketplaceEvent::ProductDict.is_dictionary());
        assert!(!MarketplaceEvent::FactCommission.is_dictionary());
    }
}
