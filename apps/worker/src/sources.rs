//! Marketplace source wiring.
//!
//! Each source pairs an HTTP endpoint with a raw row type, the raw table the
//! rows land in and the position of the row array inside the response.

use std::sync::Arc;

use marketsync_etl::batch::RawJsonBatchHandler;
use marketsync_etl::fetch::{EndpointSpec, HttpEventSource, HttpSnapshotFetcher, PageTokenSource, RequestShape};
use marketsync_etl::snapshot::{JsonArrayLocator, SnapshotLayoutRegistry};
use marketsync_etl::{
    EtlBatchDispatcher, EtlConfig, FetchRequest, Marketplace, MarketplaceEvent, RawElementType,
    RawStore, RegisteredSource, SourceRegistry,
};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

const DICT_ORDER: i32 = 0;
const FACT_ORDER: i32 = 10;
const OZON_PAGE_LIMIT: u32 = 1000;

#[derive(Debug, Serialize, Deserialize)]
pub struct WbSupplierSaleRaw {
    #[serde(rename = "saleID", default)]
    pub sale_id: Option<String>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WbStockRaw {
    #[serde(rename = "nmId", default)]
    pub nm_id: Option<i64>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WbIncomeRaw {
    #[serde(rename = "incomeId", default)]
    pub income_id: Option<i64>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WbReportDetailRaw {
    #[serde(default)]
    pub rrd_id: Option<i64>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OzonWarehouseRaw {
    #[serde(default)]
    pub warehouse_id: Option<i64>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OzonProductListItemRaw {
    #[serde(default)]
    pub product_id: Option<i64>,
    #[serde(default)]
    pub offer_id: Option<String>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OzonPostingFboRaw {
    #[serde(default)]
    pub posting_number: Option<String>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OzonFinanceOperationRaw {
    #[serde(default)]
    pub operation_id: Option<i64>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

fn ozon_postings_body(request: &FetchRequest) -> Value {
    json!({
        "dir": "ASC",
        "filter": {
            "since": format!("{}T00:00:00Z", request.window.from()),
            "to": format!("{}T23:59:59Z", request.window.to()),
        },
        "limit": OZON_PAGE_LIMIT,
        "offset": 0,
        "with": { "analytics_data": true, "financial_data": true },
    })
}

fn ozon_transactions_body(request: &FetchRequest) -> Value {
    json!({
        "filter": {
            "date": {
                "from": format!("{}T00:00:00.000Z", request.window.from()),
                "to": format!("{}T23:59:59.999Z", request.window.to()),
            },
            "transaction_type": "all",
        },
        "page": 1,
        "page_size": OZON_PAGE_LIMIT,
    })
}

fn ozon_warehouses_body(_request: &FetchRequest) -> Value {
    json!({})
}

fn ozon_products_body(request: &FetchRequest) -> Value {
    json!({
        "filter": { "visibility": "ALL" },
        "last_id": request.page_token.clone().unwrap_or_default(),
        "limit": OZON_PAGE_LIMIT,
    })
}

fn wb_window_query() -> RequestShape {
    RequestShape::Query {
        from_param: "dateFrom",
        to_param: "dateTo",
        page_param: None,
    }
}

/// Collects sources, handlers and layouts while they are being wired.
pub struct SourceWiring {
    pub sources: SourceRegistry,
    pub dispatcher: EtlBatchDispatcher,
    pub layouts: SnapshotLayoutRegistry,
    raw_store: Arc<dyn RawStore>,
}

impl SourceWiring {
    pub fn new(raw_store: Arc<dyn RawStore>) -> Self {
        Self {
            sources: SourceRegistry::new(),
            dispatcher: EtlBatchDispatcher::new(),
            layouts: SnapshotLayoutRegistry::new(),
            raw_store,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn add<R>(
        &mut self,
        fetcher: &Arc<HttpSnapshotFetcher>,
        event: MarketplaceEvent,
        order: i32,
        source_id: &str,
        raw_table: &str,
        endpoint: EndpointSpec,
        locator: JsonArrayLocator,
    ) -> anyhow::Result<()>
    where
        R: DeserializeOwned + Serialize + Send + 'static,
    {
        let source = HttpEventSource::new(
            fetcher.clone(),
            RawElementType::of::<R>(),
            endpoint,
            source_id,
        );
        self.sources.register(RegisteredSource::new(
            event,
            fetcher.marketplace(),
            order,
            source_id,
            raw_table,
            Arc::new(source),
        ))?;
        if !self.dispatcher.has_handler(raw_table) {
            self.dispatcher
                .register(raw_table, RawJsonBatchHandler::<R>::new(self.raw_store.clone()))?;
        }
        self.layouts.register_for::<R>(locator);
        Ok(())
    }
}

/// Registers the sources of every configured marketplace.
pub fn wire_sources(config: &EtlConfig, raw_store: Arc<dyn RawStore>) -> anyhow::Result<SourceWiring> {
    let mut wiring = SourceWiring::new(raw_store);
    for (marketplace, marketplace_config) in &config.marketplaces {
        let fetcher = Arc::new(HttpSnapshotFetcher::new(
            *marketplace,
            marketplace_config,
            config.snapshot_dir.clone(),
        )?);
        match marketplace {
            Marketplace::Wildberries => wire_wildberries(&mut wiring, &fetcher)?,
            Marketplace::Ozon => wire_ozon(&mut wiring, &fetcher)?,
        }
        tracing::info!("Wired sources for {}", marketplace);
    }
    Ok(wiring)
}

fn wire_wildberries(wiring: &mut SourceWiring, fetcher: &Arc<HttpSnapshotFetcher>) -> anyhow::Result<()> {
    wiring.add::<WbSupplierSaleRaw>(
        fetcher,
        MarketplaceEvent::SalesFact,
        FACT_ORDER,
        "wb_supplier_sales",
        "raw_wb_supplier_sales",
        EndpointSpec {
            method: Method::GET,
            path: "/api/v1/supplier/sales",
            shape: wb_window_query(),
            paging: PageTokenSource::None,
        },
        JsonArrayLocator::root_array(),
    )?;
    wiring.add::<WbStockRaw>(
        fetcher,
        MarketplaceEvent::InventoryFact,
        FACT_ORDER,
        "wb_stocks",
        "raw_wb_stocks",
        EndpointSpec {
            method: Method::GET,
            path: "/api/v1/supplier/stocks",
            shape: wb_window_query(),
            paging: PageTokenSource::None,
        },
        JsonArrayLocator::root_array(),
    )?;
    wiring.add::<WbIncomeRaw>(
        fetcher,
        MarketplaceEvent::SupplyAcceptedFact,
        FACT_ORDER,
        "wb_incomes",
        "raw_wb_incomes",
        EndpointSpec {
            method: Method::GET,
            path: "/api/v1/supplier/incomes",
            shape: wb_window_query(),
            paging: PageTokenSource::None,
        },
        JsonArrayLocator::root_array(),
    )?;
    wiring.add::<WbReportDetailRaw>(
        fetcher,
        MarketplaceEvent::FactFinance,
        FACT_ORDER,
        "wb_sales_report_detail",
        "raw_wb_sales_report_detail",
        EndpointSpec {
            method: Method::GET,
            path: "/api/v5/supplier/reportDetailByPeriod",
            shape: wb_window_query(),
            paging: PageTokenSource::None,
        },
        JsonArrayLocator::root_array(),
    )
}

fn wire_ozon(wiring: &mut SourceWiring, fetcher: &Arc<HttpSnapshotFetcher>) -> anyhow::Result<()> {
    wiring.add::<OzonWarehouseRaw>(
        fetcher,
        MarketplaceEvent::WarehouseDict,
        DICT_ORDER,
        "ozon_warehouse_list",
        "raw_ozon_warehouses_fbs",
        EndpointSpec {
            method: Method::POST,
            path: "/v1/warehouse/list",
            shape: RequestShape::JsonBody(ozon_warehouses_body),
            paging: PageTokenSource::None,
        },
        JsonArrayLocator::at_path("result"),
    )?;
    wiring.add::<OzonProductListItemRaw>(
        fetcher,
        MarketplaceEvent::ProductDict,
        DICT_ORDER,
        "ozon_product_list",
        "raw_ozon_products",
        EndpointSpec {
            method: Method::POST,
            path: "/v3/product/list",
            shape: RequestShape::JsonBody(ozon_products_body),
            paging: PageTokenSource::None,
        },
        JsonArrayLocator::at_path("result.items"),
    )?;
    wiring.add::<OzonPostingFboRaw>(
        fetcher,
        MarketplaceEvent::SalesFact,
        FACT_ORDER,
        "ozon_postings_fbo",
        "raw_ozon_postings_fbo",
        EndpointSpec {
            method: Method::POST,
            path: "/v2/posting/fbo/list",
            shape: RequestShape::JsonBody(ozon_postings_body),
            paging: PageTokenSource::None,
        },
        JsonArrayLocator::at_path("result"),
    )?;
    wiring.add::<OzonFinanceOperationRaw>(
        fetcher,
        MarketplaceEvent::FactFinance,
        FACT_ORDER,
        "ozon_finance_transactions",
        "raw_ozon_finance_transactions",
        EndpointSpec {
            method: Method::POST,
            path: "/v3/finance/transaction/list",
            shape: RequestShape::JsonBody(ozon_transactions_body),
            paging: PageTokenSource::None,
        },
        JsonArrayLocator::at_path("result.operations"),
    )
}
