//! Binance venue adapter

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::adapter::VenueAdapter;
use crate::config::ConnectorConfig;
use crate::errors::{ConnectorError, ConnectorResult};
use crate::signer::HmacSha256Signer;
use crate::transport::{AuthLevel, HttpTransport, RestTransport};
use crate::types::{now_millis, AssetBalance, BookUpdate, DecodedFrame, OrderEvent, VenueSymbol};
use crate::types::{BalanceDelta, PriceLevel};

/// Partial-book depth limits Binance accepts.
const ALLOWED_DEPTH_LIMITS: [u32; 8] = [5, 10, 20, 50, 100, 500, 1000, 5000];

/// Binance spot adapter: REST endpoints, combined-stream URLs, SUBSCRIBE
/// frames, and the inbound-frame decoder.
pub struct BinanceAdapter {
    transport: Arc<dyn RestTransport>,
    stream_host: String,
    has_credentials: bool,
}

impl BinanceAdapter {
    pub fn new(
        transport: Arc<dyn RestTransport>,
        stream_host: impl Into<String>,
        has_credentials: bool,
    ) -> Self {
        Self {
            transport,
            stream_host: stream_host.into(),
            has_credentials,
        }
    }

    /// Wire up an adapter over HTTP from connector configuration.
    pub fn from_config(config: &ConnectorConfig) -> ConnectorResult<Self> {
        let signer = config.credentials.as_ref().map(|c| {
            Arc::new(HmacSha256Signer::new(
                c.access_key.clone(),
                c.secret_key.clone(),
                "X-MBX-APIKEY",
            )) as Arc<dyn crate::signer::RequestSigner>
        });
        let transport = HttpTransport::new(&config.rest_host, config.request_timeout, signer)?;
        Ok(Self::new(
            Arc::new(transport),
            config.stream_host.clone(),
            config.credentials.is_some(),
        ))
    }

    fn stream_name(venue_symbol: &str, depth_limit: u32) -> String {
        format!("{}@depth{}", venue_symbol.to_lowercase(), depth_limit)
    }
}

#[derive(Debug, Deserialize)]
struct ExchangeInfoResponse {
    symbols: Vec<ExchangeInfoSymbol>,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfoSymbol {
    symbol: String,
    #[serde(rename = "baseAsset")]
    base_asset: String,
    #[serde(rename = "quoteAsset")]
    quote_asset: String,
}

#[derive(Debug, Deserialize)]
struct DepthResponse {
    asks: Vec<[String; 2]>,
    bids: Vec<[String; 2]>,
}

#[derive(Debug, Deserialize)]
struct ListenKeyResponse {
    #[serde(rename = "listenKey")]
    listen_key: String,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    balances: Vec<RawBalance>,
}

#[derive(Debug, Deserialize)]
struct RawBalance {
    asset: String,
    free: String,
    locked: String,
}

/// Combined-stream envelope: `{"stream":"btcusdt@depth20","data":{...}}`.
#[derive(Debug, Deserialize)]
struct CombinedFrame {
    stream: String,
    data: serde_json::Value,
}

/// Partial book depth payload; the symbol lives in the stream name only.
#[derive(Debug, Deserialize)]
struct PartialDepthFrame {
    #[serde(rename = "lastUpdateId")]
    #[allow(dead_code)]
    last_update_id: u64,
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

#[derive(Debug, Deserialize)]
struct AccountPositionFrame {
    #[serde(rename = "B")]
    balances: Vec<AccountPositionBalance>,
}

#[derive(Debug, Deserialize)]
struct AccountPositionBalance {
    #[serde(rename = "a")]
    asset: String,
    #[serde(rename = "f")]
    free: String,
    #[serde(rename = "l")]
    locked: String,
}

#[derive(Debug, Deserialize)]
struct ExecutionReportFrame {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "i")]
    order_id: i64,
    #[serde(rename = "S")]
    side: String,
    #[serde(rename = "X")]
    status: String,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    quantity: String,
    #[serde(rename = "z")]
    filled_quantity: String,
    #[serde(rename = "E")]
    event_time: u64,
}

fn parse_decimal(value: &str, what: &str) -> ConnectorResult<f64> {
    value.parse::<f64>().map_err(|e| ConnectorError::Decode {
        message: format!("invalid {} '{}': {}", what, value, e),
    })
}

fn parse_levels(levels: &[[String; 2]], what: &str) -> ConnectorResult<Vec<PriceLevel>> {
    levels
        .iter()
        .map(|level| {
            Ok((
                parse_decimal(&level[0], what)?,
                parse_decimal(&level[1], what)?,
            ))
        })
        .collect()
}

/// Venue symbol from a combined-stream name, `btcusdt@depth20` -> `BTCUSDT`.
fn symbol_from_stream(stream: &str) -> Option<String> {
    let (symbol, _) = stream.split_once('@')?;
    if symbol.is_empty() {
        return None;
    }
    Some(symbol.to_uppercase())
}

fn decode_event(event_type: &str, data: &serde_json::Value) -> ConnectorResult<DecodedFrame> {
    match event_type {
        // Diff events carry only the changed levels; the cache replaces
        // whole books, and only @depth{limit} partial streams are
        // subscribed, so diffs are dropped rather than applied.
        "depthUpdate" => {
            debug!("ignoring diff depth event");
            Ok(DecodedFrame::Ignore)
        }
        "outboundAccountPosition" => {
            let frame: AccountPositionFrame = serde_json::from_value(data.clone())?;
            let deltas = frame
                .balances
                .into_iter()
                .map(|b| {
                    Ok(BalanceDelta {
                        free: parse_decimal(&b.free, "free balance")?,
                        locked: parse_decimal(&b.locked, "locked balance")?,
                        asset: b.asset,
                    })
                })
                .collect::<ConnectorResult<Vec<_>>>()?;
            Ok(DecodedFrame::Balances(deltas))
        }
        "executionReport" => {
            let frame: ExecutionReportFrame = serde_json::from_value(data.clone())?;
            Ok(DecodedFrame::Order(OrderEvent {
                venue_symbol: frame.symbol,
                order_id: frame.order_id.to_string(),
                side: frame.side,
                status: frame.status,
                price: parse_decimal(&frame.price, "order price")?,
                quantity: parse_decimal(&frame.quantity, "order quantity")?,
                filled_quantity: parse_decimal(&frame.filled_quantity, "filled quantity")?,
                timestamp: frame.event_time,
            }))
        }
        other => {
            debug!("ignoring event type {}", other);
            Ok(DecodedFrame::Ignore)
        }
    }
}

#[async_trait]
impl VenueAdapter for BinanceAdapter {
    fn name(&self) -> &str {
        "Binance"
    }

    fn allowed_depth_limits(&self) -> &[u32] {
        &ALLOWED_DEPTH_LIMITS
    }

    fn supports_account_stream(&self) -> bool {
        self.has_credentials
    }

    async fn list_symbols(&self) -> ConnectorResult<Vec<VenueSymbol>> {
        let payload = self
            .transport
            .get_json("/api/v3/exchangeInfo", &[], AuthLevel::Public)
            .await?;
        let info: ExchangeInfoResponse = serde_json::from_value(payload)?;
        Ok(info
            .symbols
            .into_iter()
            .map(|s| VenueSymbol {
                base_asset: s.base_asset,
                quote_asset: s.quote_asset,
                venue_symbol: s.symbol,
            })
            .collect())
    }

    async fn fetch_depth_snapshot(
        &self,
        venue_symbol: &str,
        limit: u32,
    ) -> ConnectorResult<BookUpdate> {
        let query = vec![
            ("symbol".to_string(), venue_symbol.to_string()),
            ("limit".to_string(), limit.to_string()),
        ];
        let payload = self
            .transport
            .get_json("/api/v3/depth", &query, AuthLevel::Public)
            .await?;
        let depth: DepthResponse = serde_json::from_value(payload)?;
        Ok(BookUpdate {
            asks: parse_levels(&depth.asks, "ask level")?,
            bids: parse_levels(&depth.bids, "bid level")?,
        })
    }

    async fn fetch_account_snapshot(&self) -> ConnectorResult<HashMap<String, AssetBalance>> {
        let payload = self
            .transport
            .get_json("/api/v3/account", &[], AuthLevel::Signed)
            .await?;
        let account: AccountResponse = serde_json::from_value(payload)?;
        let mut balances = HashMap::with_capacity(account.balances.len());
        for raw in account.balances {
            balances.insert(
                raw.asset,
                AssetBalance {
                    free: parse_decimal(&raw.free, "free balance")?,
                    locked: parse_decimal(&raw.locked, "locked balance")?,
                },
            );
        }
        Ok(balances)
    }

    fn public_channel_url(&self, venue_symbols: &[String], depth_limit: u32) -> String {
        let streams = venue_symbols
            .iter()
            .map(|s| Self::stream_name(s, depth_limit))
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/stream?streams={}", self.stream_host, streams)
    }

    async fn private_channel_url(&self) -> ConnectorResult<String> {
        if !self.has_credentials {
            return Err(ConnectorError::Unsupported {
                capability: "account streaming".to_string(),
            });
        }
        let payload = self
            .transport
            .post_json("/api/v3/userDataStream", &[], AuthLevel::ApiKey)
            .await?;
        let response: ListenKeyResponse = serde_json::from_value(payload)?;
        Ok(format!("{}/ws/{}", self.stream_host, response.listen_key))
    }

    fn build_subscribe_frame(&self, venue_symbols: &[String], depth_limit: u32) -> String {
        let params: Vec<String> = venue_symbols
            .iter()
            .map(|s| Self::stream_name(s, depth_limit))
            .collect();
        json!({
            "method": "SUBSCRIBE",
            "params": params,
            "id": now_millis(),
        })
        .to_string()
    }

    fn decode_frame(&self, raw: &str) -> ConnectorResult<DecodedFrame> {
        let value: serde_json::Value = serde_json::from_str(raw)?;

        // Combined-stream envelope; partial depth payloads carry no symbol,
        // so it is recovered from the stream name.
        if value.get("stream").is_some() {
            let combined: CombinedFrame = serde_json::from_value(value)?;
            if let Some(event_type) = combined.data.get("e").and_then(|v| v.as_str()) {
                let event_type = event_type.to_string();
                return decode_event(&event_type, &combined.data);
            }
            if combined.data.get("lastUpdateId").is_some() {
                let Some(venue_symbol) = symbol_from_stream(&combined.stream) else {
                    return Err(ConnectorError::Decode {
                        message: format!("no symbol in stream name '{}'", combined.stream),
                    });
                };
                let frame: PartialDepthFrame = serde_json::from_value(combined.data)?;
                return Ok(DecodedFrame::Depth {
                    venue_symbol,
                    book: BookUpdate {
                        asks: parse_levels(&frame.asks, "ask level")?,
                        bids: parse_levels(&frame.bids, "bid level")?,
                    },
                });
            }
            debug!("ignoring unrecognized stream payload on {}", combined.stream);
            return Ok(DecodedFrame::Ignore);
        }

        // Raw single-stream events carry their type inline.
        if let Some(event_type) = value.get("e").and_then(|v| v.as_str()) {
            let event_type = event_type.to_string();
            return decode_event(&event_type, &value);
        }

        // Subscription acks ({"result":null,"id":...}) and anything else.
        Ok(DecodedFrame::Ignore)
    }
}
