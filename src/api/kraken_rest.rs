use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::{Digest, Sha256, Sha512};

use super::{OrderApi, OrderApiError};
use crate::models::{MarketEvent, OrderFill, Signal, User};

pub const DEFAULT_ORDER_URL: &str =
    "https://demo-futures.kraken.com/derivatives/api/v3/sendorder";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DERIVATIVES_PREFIX: &str = "/derivatives";
const ORDER_TYPE_IOC: &str = "ioc";
const RESULT_SUCCESS: &str = "success";
const STATUS_PLACED: &str = "placed";

type HmacSha512 = Hmac<Sha512>;

/// REST client for the exchange's private order endpoint.
pub struct KrakenRestClient {
    client: reqwest::Client,
    order_url: reqwest::Url,
}

impl KrakenRestClient {
    pub fn new(order_url: &str) -> Result<Self, OrderApiError> {
        let order_url = reqwest::Url::parse(order_url)
            .map_err(|err| OrderApiError::Url(err.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(KrakenRestClient { client, order_url })
    }

    /// Path the signature covers: the endpoint path without the gateway's
    /// `/derivatives` prefix.
    fn api_path(&self) -> &str {
        let path = self.order_url.path();
        path.strip_prefix(DERIVATIVES_PREFIX).unwrap_or(path)
    }
}

/// Signs a private request. The signature is a pure function of the path,
/// the encoded form and the base64 private key:
/// `Base64(HMAC-SHA-512(Base64Decode(key), SHA-256(form || path)))`.
pub fn sign(api_path: &str, encoded_form: &str, private_key: &str) -> Result<String, OrderApiError> {
    let mut sha = Sha256::new();
    sha.update(encoded_form.as_bytes());
    sha.update(api_path.as_bytes());
    let inner = sha.finalize();

    let secret = BASE64.decode(private_key)?;
    let mut mac = HmacSha512::new_from_slice(&secret).map_err(|_| OrderApiError::Sign)?;
    mac.update(&inner);
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Builds the order form, URL-encoded with keys in lexicographic order.
fn encode_order_form(event: &MarketEvent, limit: f64) -> Result<String, OrderApiError> {
    let volume = if event.volume <= 0 { 1 } else { event.volume };
    let limit_price = count_limit_price(event.signal, event.close, limit);
    let form = [
        ("limitPrice", format!("{limit_price:.1}")),
        ("orderType", ORDER_TYPE_IOC.to_string()),
        ("side", event.signal.as_str().to_string()),
        ("size", volume.to_string()),
        ("symbol", event.symbol.to_lowercase()),
    ];
    Ok(serde_urlencoded::to_string(form)?)
}

/// IOC limit price: slip the close price by the user's limit in the
/// direction of the order.
fn count_limit_price(side: Signal, price: f64, limit: f64) -> f64 {
    match side {
        Signal::Buy => price * (1.0 + limit),
        Signal::Sell => price * (1.0 - limit),
        _ => price,
    }
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    result: String,
    #[serde(rename = "sendStatus")]
    send_status: Option<SendStatus>,
}

#[derive(Debug, Deserialize)]
struct SendStatus {
    order_id: String,
    status: String,
    #[serde(rename = "orderEvents", default)]
    order_events: Vec<OrderEvent>,
}

#[derive(Debug, Deserialize)]
struct OrderEvent {
    price: f64,
    amount: f64,
    #[serde(rename = "orderPriorExecution")]
    order_prior_execution: Option<OrderPriorExecution>,
}

#[derive(Debug, Deserialize)]
struct OrderPriorExecution {
    side: String,
}

/// Verifies the response envelope and lifts it into an [`OrderFill`].
fn into_fill(response: OrderResponse, symbol: &str) -> Result<OrderFill, OrderApiError> {
    if response.result != RESULT_SUCCESS {
        return Err(OrderApiError::NotSuccess);
    }
    let send_status = response
        .send_status
        .ok_or(OrderApiError::MalformedResponse("sendStatus is nil"))?;
    if send_status.status != STATUS_PLACED {
        return Err(OrderApiError::NotPlaced(send_status.status));
    }
    let order_event = send_status
        .order_events
        .into_iter()
        .next()
        .ok_or(OrderApiError::MalformedResponse("orderEvents is empty"))?;
    let prior = order_event
        .order_prior_execution
        .ok_or(OrderApiError::MalformedResponse("orderPriorExecution is nil"))?;
    Ok(OrderFill {
        symbol: symbol.to_string(),
        order_id: send_status.order_id,
        price: order_event.price,
        amount: order_event.amount.floor() as i64,
        side: prior.side,
    })
}

#[async_trait]
impl OrderApi for KrakenRestClient {
    async fn add_order(&self, event: &MarketEvent, user: &User) -> Result<OrderFill, OrderApiError> {
        let encoded = encode_order_form(event, user.limit_for(&event.symbol))?;
        let signature = sign(self.api_path(), &encoded, &user.private_key)?;

        let mut url = self.order_url.clone();
        url.set_query(Some(&encoded));

        let response = self
            .client
            .post(url)
            .header("APIKey", &user.public_key)
            .header("Authent", signature)
            .send()
            .await?;

        let status = response.status().as_u16();
        if !matches!(status, 200 | 201 | 202) {
            return Err(OrderApiError::Status(status));
        }

        let envelope: OrderResponse = response.json().await?;
        into_fill(envelope, &event.symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CandleInterval;

    // a syntactically valid base64 secret for signing tests
    const PRIVATE_KEY: &str = "c2VjcmV0LXNpZ25pbmcta2V5LWZvci10ZXN0cw==";

    fn buy_event(close: f64) -> MarketEvent {
        MarketEvent {
            signal: Signal::Buy,
            symbol: "PI_XBTUSD".to_string(),
            interval: CandleInterval::OneMinute,
            volume: 3,
            close,
        }
    }

    #[test]
    fn test_limit_price_slips_by_side() {
        assert_eq!(count_limit_price(Signal::Buy, 100.0, 0.01), 101.0);
        assert_eq!(count_limit_price(Signal::Sell, 100.0, 0.01), 99.0);
        assert_eq!(count_limit_price(Signal::WaitToBuy, 100.0, 0.01), 100.0);
    }

    #[test]
    fn test_limit_price_string_has_one_fractional_digit() {
        let buy = encode_order_form(&buy_event(100.0), 0.01).unwrap();
        assert!(buy.contains("limitPrice=101.0"), "got {buy}");

        let mut event = buy_event(100.0);
        event.signal = Signal::Sell;
        let sell = encode_order_form(&event, 0.01).unwrap();
        assert!(sell.contains("limitPrice=99.0"), "got {sell}");
    }

    #[test]
    fn test_form_keys_in_lexicographic_order() {
        let encoded = encode_order_form(&buy_event(100.0), 0.0).unwrap();
        assert_eq!(
            encoded,
            "limitPrice=100.0&orderType=ioc&side=buy&size=3&symbol=pi_xbtusd"
        );
    }

    #[test]
    fn test_zero_volume_coerced_to_one() {
        let mut event = buy_event(50.0);
        event.volume = 0;
        let encoded = encode_order_form(&event, 0.0).unwrap();
        assert!(encoded.contains("size=1"), "got {encoded}");
    }

    #[test]
    fn test_missing_limit_defaults_to_zero() {
        let user = User::new("bob");
        assert_eq!(user.limit_for("PI_XBTUSD"), 0.0);
        let encoded = encode_order_form(&buy_event(100.0), user.limit_for("PI_XBTUSD")).unwrap();
        assert!(encoded.contains("limitPrice=100.0"), "got {encoded}");
    }

    #[test]
    fn test_signature_is_deterministic() {
        let form = "limitPrice=101.0&orderType=ioc&side=buy&size=1&symbol=pi_xbtusd";
        let first = sign("/api/v3/sendorder", form, PRIVATE_KEY).unwrap();
        let second = sign("/api/v3/sendorder", form, PRIVATE_KEY).unwrap();
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn test_signature_depends_on_every_input() {
        let form = "limitPrice=101.0&orderType=ioc&side=buy&size=1&symbol=pi_xbtusd";
        let base = sign("/api/v3/sendorder", form, PRIVATE_KEY).unwrap();
        assert_ne!(base, sign("/api/v3/other", form, PRIVATE_KEY).unwrap());
        assert_ne!(base, sign("/api/v3/sendorder", "side=sell", PRIVATE_KEY).unwrap());
        assert_ne!(
            base,
            sign("/api/v3/sendorder", form, "b3RoZXIta2V5LWVudGlyZWx5").unwrap()
        );
    }

    #[test]
    fn test_signature_rejects_invalid_key() {
        assert!(matches!(
            sign("/api/v3/sendorder", "a=b", "not base64!!!"),
            Err(OrderApiError::KeyDecode(_))
        ));
    }

    #[test]
    fn test_derivatives_prefix_stripped() {
        let client = KrakenRestClient::new(DEFAULT_ORDER_URL).unwrap();
        assert_eq!(client.api_path(), "/api/v3/sendorder");

        let bare = KrakenRestClient::new("https://host/api/v3/sendorder").unwrap();
        assert_eq!(bare.api_path(), "/api/v3/sendorder");
    }

    #[test]
    fn test_fill_from_placed_response() {
        let raw = r#"{
            "result": "success",
            "sendStatus": {
                "order_id": "abc-123",
                "status": "placed",
                "orderEvents": [{
                    "price": 101.5,
                    "amount": 2.9,
                    "orderPriorExecution": {"side": "buy"}
                }]
            }
        }"#;
        let response: OrderResponse = serde_json::from_str(raw).unwrap();
        let fill = into_fill(response, "PI_XBTUSD").unwrap();
        assert_eq!(fill.symbol, "PI_XBTUSD");
        assert_eq!(fill.order_id, "abc-123");
        assert_eq!(fill.price, 101.5);
        assert_eq!(fill.amount, 2);
        assert_eq!(fill.side, "buy");
    }

    #[test]
    fn test_fill_rejects_non_success_result() {
        let raw = r#"{"result": "error", "sendStatus": null}"#;
        let response: OrderResponse = serde_json::from_str(raw).unwrap();
        assert!(matches!(
            into_fill(response, "PI_XBTUSD"),
            Err(OrderApiError::NotSuccess)
        ));
    }

    #[test]
    fn test_fill_rejects_unplaced_status() {
        let raw = r#"{
            "result": "success",
            "sendStatus": {"order_id": "x", "status": "iocWouldNotExecute", "orderEvents": []}
        }"#;
        let response: OrderResponse = serde_json::from_str(raw).unwrap();
        assert!(matches!(
            into_fill(response, "PI_XBTUSD"),
            Err(OrderApiError::NotPlaced(status)) if status == "iocWouldNotExecute"
        ));
    }

    #[test]
    fn test_fill_rejects_missing_nested_fields() {
        let raw = r#"{
            "result": "success",
            "sendStatus": {"order_id": "x", "status": "placed", "orderEvents": []}
        }"#;
        let response: OrderResponse = serde_json::from_str(raw).unwrap();
        assert!(matches!(
            into_fill(response, "PI_XBTUSD"),
            Err(OrderApiError::MalformedResponse(_))
        ));

        let raw = r#"{
            "result": "success",
            "sendStatus": {
                "order_id": "x",
                "status": "placed",
                "orderEvents": [{"price": 1.0, "amount": 1.0, "orderPriorExecution": null}]
            }
        }"#;
        let response: OrderResponse = serde_json::from_str(raw).unwrap();
        assert!(matches!(
            into_fill(response, "PI_XBTUSD"),
            Err(OrderApiError::MalformedResponse(_))
        ));
    }
}
