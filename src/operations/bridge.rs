//! Native ETH bridging through a swap-quote service.
//!
//! For every wallet and destination chain a quote is fetched, checked
//! against the source chain and the wallet's balance, and the returned call
//! is submitted on the source chain.

use alloy::primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::seq::IndexedRandom;
use serde::Deserialize;
use reqwest::StatusCode;
use std::{collections::HashMap, time::Duration};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    chains::ChainTarget,
    error::Result,
    gas::GasPricing,
    types::{Account, FailureReason, SubmissionOutcome, TransferRequest, WorkKey},
    utils::format_eth,
    wallet::{execution::JobResults, WalletManager},
};

/// Parameters of one quote request. Both tokens are native ETH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteRequest {
    pub from_chain: u64,
    pub to_chain: u64,
    pub amount: U256,
    pub from_address: Address,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QuoteError {
    #[error("quote unavailable: {0}")]
    Unavailable(String),

    #[error("malformed quote: {0}")]
    Malformed(String),
}

impl From<QuoteError> for FailureReason {
    fn from(error: QuoteError) -> Self {
        match error {
            QuoteError::Unavailable(msg) => FailureReason::QuoteUnavailable(msg),
            QuoteError::Malformed(msg) => FailureReason::MalformedQuote(msg),
        }
    }
}

/// A quote reduced to the call it asks us to make.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeQuote {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub gas_limit: u64,
    pub gas_price: u128,
    pub chain_id: u64,
}

impl BridgeQuote {
    /// Value plus the gas ceiling at the quoted price. Fails when the sum
    /// does not fit in 256 bits.
    pub fn required_balance(&self) -> std::result::Result<U256, QuoteError> {
        U256::from(self.gas_limit)
            .checked_mul(U256::from(self.gas_price))
            .and_then(|gas| gas.checked_add(self.value))
            .ok_or_else(|| QuoteError::Malformed("value plus gas cost overflows".to_string()))
    }

    pub fn transfer(&self) -> TransferRequest {
        TransferRequest {
            to: self.to,
            value: self.value,
            data: self.data.clone(),
            gas_limit: self.gas_limit,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResponse {
    transaction_request: Option<RawTransactionRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransactionRequest {
    to: Option<String>,
    data: Option<String>,
    value: Option<String>,
    gas_limit: Option<String>,
    gas_price: Option<String>,
    /// Number in practice, hex string accepted too
    chain_id: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteErrorBody {
    error_type: Option<String>,
    code: Option<serde_json::Value>,
    message: Option<String>,
}

fn required<'a>(
    field: &'a Option<String>,
    name: &str,
) -> std::result::Result<&'a str, QuoteError> {
    field
        .as_deref()
        .map(str::trim)
        .ok_or_else(|| QuoteError::Malformed(format!("missing {}", name)))
}

fn hex_digits<'a>(value: &'a str) -> &'a str {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}

fn parse_chain_id(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) if s.starts_with("0x") => {
            u64::from_str_radix(hex_digits(s), 16).ok()
        }
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parses a quote service response body.
pub fn parse_quote(body: &str) -> std::result::Result<BridgeQuote, QuoteError> {
    let response: QuoteResponse = serde_json::from_str(body)
        .map_err(|e| QuoteError::Malformed(format!("invalid JSON: {}", e)))?;
    let tx = response
        .transaction_request
        .ok_or_else(|| QuoteError::Malformed("missing transactionRequest".to_string()))?;

    let to = required(&tx.to, "to")?
        .parse::<Address>()
        .map_err(|e| QuoteError::Malformed(format!("bad to: {}", e)))?;
    let data = required(&tx.data, "data")?
        .parse::<Bytes>()
        .map_err(|e| QuoteError::Malformed(format!("bad data: {}", e)))?;
    let value = U256::from_str_radix(hex_digits(required(&tx.value, "value")?), 16)
        .map_err(|e| QuoteError::Malformed(format!("bad value: {}", e)))?;
    let gas_limit = u64::from_str_radix(hex_digits(required(&tx.gas_limit, "gasLimit")?), 16)
        .map_err(|e| QuoteError::Malformed(format!("bad gasLimit: {}", e)))?;
    let gas_price = u128::from_str_radix(hex_digits(required(&tx.gas_price, "gasPrice")?), 16)
        .map_err(|e| QuoteError::Malformed(format!("bad gasPrice: {}", e)))?;
    let chain_id = tx
        .chain_id
        .as_ref()
        .and_then(parse_chain_id)
        .ok_or_else(|| QuoteError::Malformed("missing or bad chainId".to_string()))?;

    let quote = BridgeQuote {
        to,
        data,
        value,
        gas_limit,
        gas_price,
        chain_id,
    };
    quote.required_balance()?;
    Ok(quote)
}

/// Turns an error response into a readable message.
fn describe_error_body(body: &str) -> String {
    match serde_json::from_str::<QuoteErrorBody>(body) {
        Ok(QuoteErrorBody {
            error_type: Some(error_type),
            code: Some(code),
            message: Some(message),
        }) => format!(
            "errorType: {}, code: {}, message: {}",
            error_type, code, message
        ),
        Ok(QuoteErrorBody {
            message: Some(message),
            ..
        }) => message,
        _ => body.trim().to_string(),
    }
}

/// Where bridge quotes come from.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Fetches a quote, through `proxy` when the wallet has one.
    async fn quote(
        &self,
        request: &QuoteRequest,
        proxy: Option<&str>,
    ) -> std::result::Result<BridgeQuote, QuoteError>;
}

/// HTTP client for a LI.FI-style `GET /quote` endpoint.
pub struct HttpQuoteClient {
    url: String,
    timeout: Duration,
    proxies: Vec<String>,
    clients: Mutex<HashMap<Option<String>, reqwest::Client>>,
}

impl HttpQuoteClient {
    /// # Arguments
    /// * `url` - Quote endpoint
    /// * `timeout` - Per-request timeout
    /// * `proxies` - Pool used when the wallet has no proxy of its own
    pub fn new(url: impl Into<String>, timeout: Duration, proxies: Vec<String>) -> Self {
        Self {
            url: url.into(),
            timeout,
            proxies,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client(&self, proxy: Option<&str>) -> std::result::Result<reqwest::Client, QuoteError> {
        let key = proxy.map(str::to_string);
        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = reqwest::Client::builder().timeout(self.timeout);
        if let Some(proxy) = proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| QuoteError::Unavailable(format!("invalid proxy: {}", e)))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| QuoteError::Unavailable(format!("Failed to build HTTP client: {}", e)))?;
        clients.insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl QuoteSource for HttpQuoteClient {
    async fn quote(
        &self,
        request: &QuoteRequest,
        proxy: Option<&str>,
    ) -> std::result::Result<BridgeQuote, QuoteError> {
        let proxy = proxy.or_else(|| self.proxies.choose(&mut rand::rng()).map(String::as_str));
        let client = self.client(proxy)?;
        let native = Address::ZERO.to_string();

        info!(
            from_chain = request.from_chain,
            to_chain = request.to_chain,
            amount = %format_eth(request.amount),
            from_address = %request.from_address,
            proxied = proxy.is_some(),
            "Requesting quote"
        );

        let response = client
            .get(&self.url)
            .query(&[
                ("fromChain", request.from_chain.to_string()),
                ("toChain", request.to_chain.to_string()),
                ("fromToken", native.clone()),
                ("toToken", native),
                ("fromAmount", request.amount.to_string()),
                ("fromAddress", request.from_address.to_checksum(None)),
            ])
            .send()
            .await
            .map_err(|e| QuoteError::Unavailable(format!("request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| QuoteError::Unavailable(format!("Failed to read body: {}", e)))?;

        if status != StatusCode::OK {
            return Err(QuoteError::Unavailable(format!(
                "HTTP {}: {}",
                status.as_u16(),
                describe_error_body(&body)
            )));
        }
        debug!(to_chain = request.to_chain, "Quote received");
        parse_quote(&body)
    }
}

/// Bridges `amount` from `source` to every chain in `destinations` for every wallet.
pub async fn run(
    manager: &WalletManager,
    accounts: &[Account],
    source: &ChainTarget,
    destinations: &[ChainTarget],
    amount: U256,
    quotes: &dyn QuoteSource,
) -> std::collections::BTreeMap<WorkKey, SubmissionOutcome> {
    manager
        .execution_manager()
        .fan_out(
            accounts,
            destinations,
            |account, destination| {
                WorkKey::new(account.address(), &source.name, &destination.name)
            },
            |account, destination| {
                bridge_one(manager, account, source, destination, amount, quotes)
            },
        )
        .await
}

async fn bridge_one(
    manager: &WalletManager,
    account: &Account,
    source: &ChainTarget,
    destination: &ChainTarget,
    amount: U256,
    quotes: &dyn QuoteSource,
) -> Result<JobResults> {
    let key = WorkKey::new(account.address(), &source.name, &destination.name);
    let request = QuoteRequest {
        from_chain: source.chain_id,
        to_chain: destination.chain_id,
        amount,
        from_address: account.address(),
    };

    let quote = match quotes.quote(&request, account.proxy.as_deref()).await {
        Ok(quote) if quote.chain_id != source.chain_id => {
            return Ok(vec![(
                key,
                SubmissionOutcome::Failed(FailureReason::MalformedQuote(format!(
                    "quote targets chain {} instead of {}",
                    quote.chain_id, source.chain_id
                ))),
            )]);
        }
        Ok(quote) => quote,
        Err(e) => {
            warn!(unit = %key, error = %e, "Quote failed");
            return Ok(vec![(key, SubmissionOutcome::Failed(e.into()))]);
        }
    };

    let needed = match quote.required_balance() {
        Ok(needed) => needed,
        Err(e) => {
            warn!(unit = %key, error = %e, "Quote failed");
            return Ok(vec![(key, SubmissionOutcome::Failed(e.into()))]);
        }
    };
    let client = manager.connection(source)?;
    let balance = client.balance(account.address()).await?;
    if balance < needed {
        warn!(
            unit = %key,
            balance = %format_eth(balance),
            needed = %format_eth(needed),
            "Insufficient funds for bridge"
        );
        return Ok(vec![(key, SubmissionOutcome::Failed(FailureReason::InsufficientFunds))]);
    }

    let policy = manager.config.retry_policy(manager.config.bridge.confirm_timeout);
    let outcome = manager
        .retry_controller()
        .submit(
            account,
            source,
            client,
            &quote.transfer(),
            GasPricing::Suggested {
                floor: Some(quote.gas_price),
            },
            &policy,
        )
        .await;
    info!(unit = %key, status = outcome.status(), "Bridge transfer finished");
    super::pace(manager).await;
    Ok(vec![(key, outcome)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chains::ChainRegistry,
        testing::{fast_config, mock_pool, MockChain},
    };
    use alloy::primitives::utils::parse_ether;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    const ROUTER: &str = "0x1231DEB6f5749EF6cE6943a275A1D3E7486F4EaE";

    fn quote_body(chain_id: u64) -> String {
        serde_json::json!({
            "id": "quote",
            "transactionRequest": {
                "to": ROUTER,
                "data": "0xdeadbeef",
                "value": "0x5af3107a4000",
                "gasLimit": "0x30d40",
                "gasPrice": "0x3b9aca00",
                "chainId": chain_id
            }
        })
        .to_string()
    }

    /// Serves one canned body for every request.
    struct CannedQuotes {
        body: String,
        calls: AtomicUsize,
    }

    impl CannedQuotes {
        fn new(body: impl Into<String>) -> Self {
            Self {
                body: body.into(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl QuoteSource for CannedQuotes {
        async fn quote(
            &self,
            _request: &QuoteRequest,
            _proxy: Option<&str>,
        ) -> std::result::Result<BridgeQuote, QuoteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            parse_quote(&self.body)
        }
    }

    struct Setup {
        manager: WalletManager,
        base: Arc<MockChain>,
        source: ChainTarget,
        destinations: Vec<ChainTarget>,
    }

    fn setup() -> Setup {
        let base = ChainTarget::new("base", "http://base", 8453);
        let ink = ChainTarget::new("ink", "http://ink", 57073);
        let base_chain = Arc::new(MockChain::new(8453));
        let pool = mock_pool(&[
            (base.clone(), base_chain.clone()),
            (ink.clone(), Arc::new(MockChain::new(57073))),
        ]);
        let registry = ChainRegistry::new(vec![base.clone(), ink.clone()]);
        Setup {
            manager: WalletManager::with_pool(fast_config(), registry, pool),
            base: base_chain,
            source: base,
            destinations: vec![ink],
        }
    }

    #[test]
    fn parses_hex_fields() {
        let quote = parse_quote(&quote_body(8453)).unwrap();
        assert_eq!(quote.to, ROUTER.parse::<Address>().unwrap());
        assert_eq!(quote.data, Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]));
        assert_eq!(quote.value, parse_ether("0.0001").unwrap());
        assert_eq!(quote.gas_limit, 200_000);
        assert_eq!(quote.gas_price, 1_000_000_000);
        assert_eq!(quote.chain_id, 8453);
        assert_eq!(
            quote.required_balance().unwrap(),
            parse_ether("0.0001").unwrap() + U256::from(200_000u64 * 1_000_000_000u64)
        );
    }

    #[test]
    fn cost_that_overflows_is_malformed() {
        let body = quote_body(8453).replace("0x5af3107a4000", &format!("0x{}", "f".repeat(64)));
        assert!(matches!(
            parse_quote(&body),
            Err(QuoteError::Malformed(msg)) if msg.contains("overflows")
        ));

        let quote = BridgeQuote {
            to: Address::ZERO,
            data: Bytes::new(),
            value: U256::MAX,
            gas_limit: 21_000,
            gas_price: 1,
            chain_id: 8453,
        };
        assert!(matches!(quote.required_balance(), Err(QuoteError::Malformed(_))));
    }

    #[test]
    fn rejects_incomplete_quotes() {
        assert!(matches!(
            parse_quote(r#"{"id":"x"}"#),
            Err(QuoteError::Malformed(msg)) if msg.contains("transactionRequest")
        ));
        assert!(matches!(
            parse_quote(r#"{"transactionRequest":{"to":"0x01","data":"0x"}}"#),
            Err(QuoteError::Malformed(_))
        ));
        assert!(matches!(parse_quote("not json"), Err(QuoteError::Malformed(_))));
    }

    #[test]
    fn error_bodies_are_summarized() {
        let body = r#"{"errorType":"NotFoundError","code":1002,"message":"No available quotes"}"#;
        assert_eq!(
            describe_error_body(body),
            "errorType: NotFoundError, code: 1002, message: No available quotes"
        );
        assert_eq!(describe_error_body(r#"{"message":"slow down"}"#), "slow down");
        assert_eq!(describe_error_body("Bad Gateway"), "Bad Gateway");
    }

    #[tokio::test]
    async fn malformed_quote_broadcasts_nothing() {
        let s = setup();
        let account = Account::generate();
        s.base.set_balance(account.address(), parse_ether("1").unwrap());
        let quotes = CannedQuotes::new(r#"{"estimate":{}}"#);

        let results = run(
            &s.manager,
            &[account.clone()],
            &s.source,
            &s.destinations,
            parse_ether("0.0001").unwrap(),
            &quotes,
        )
        .await;

        let outcome = &results[&WorkKey::new(account.address(), "base", "ink")];
        assert!(matches!(outcome, SubmissionOutcome::Failed(FailureReason::MalformedQuote(_))));
        assert_eq!(outcome.status(), "Quote Error");
        assert_eq!(s.base.broadcast_count(), 0);
    }

    #[tokio::test]
    async fn quote_for_another_chain_is_malformed() {
        let s = setup();
        let account = Account::generate();
        s.base.set_balance(account.address(), parse_ether("1").unwrap());
        let quotes = CannedQuotes::new(quote_body(10));

        let results = run(
            &s.manager,
            &[account],
            &s.source,
            &s.destinations,
            U256::from(1u64),
            &quotes,
        )
        .await;
        assert!(results
            .values()
            .all(|o| matches!(o, SubmissionOutcome::Failed(FailureReason::MalformedQuote(_)))));
        assert_eq!(s.base.broadcast_count(), 0);
    }

    #[tokio::test]
    async fn insufficient_balance_broadcasts_nothing() {
        let s = setup();
        let account = Account::generate();
        s.base.set_balance(account.address(), parse_ether("0.0001").unwrap());
        let quotes = CannedQuotes::new(quote_body(8453));

        let results = run(
            &s.manager,
            &[account.clone()],
            &s.source,
            &s.destinations,
            parse_ether("0.0001").unwrap(),
            &quotes,
        )
        .await;

        assert_eq!(
            results[&WorkKey::new(account.address(), "base", "ink")],
            SubmissionOutcome::Failed(FailureReason::InsufficientFunds)
        );
        assert_eq!(s.base.broadcast_count(), 0);
    }

    #[tokio::test]
    async fn funded_wallet_submits_the_quoted_call() {
        let s = setup();
        let account = Account::generate();
        s.base.set_balance(account.address(), parse_ether("1").unwrap());
        // the chain suggests less than the quote, the quote's price wins
        s.base.set_gas_price(500_000_000);
        let quotes = CannedQuotes::new(quote_body(8453));

        let results = run(
            &s.manager,
            &[account.clone()],
            &s.source,
            &s.destinations,
            parse_ether("0.0001").unwrap(),
            &quotes,
        )
        .await;

        let outcome = &results[&WorkKey::new(account.address(), "base", "ink")];
        assert!(matches!(outcome, SubmissionOutcome::Confirmed { .. }));
        assert_eq!(outcome.status(), "Tx Successful");

        let sent = s.base.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, Some(ROUTER.parse::<Address>().unwrap()));
        assert_eq!(sent[0].value, parse_ether("0.0001").unwrap());
        assert_eq!(sent[0].gas_price, 1_000_000_000);
        assert_eq!(quotes.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn overflowing_quote_broadcasts_nothing() {
        let s = setup();
        let account = Account::generate();
        s.base.set_balance(account.address(), U256::MAX);
        let body = quote_body(8453).replace("0x5af3107a4000", &format!("0x{}", "f".repeat(64)));
        let quotes = CannedQuotes::new(body);

        let results = run(
            &s.manager,
            &[account.clone()],
            &s.source,
            &s.destinations,
            parse_ether("0.0001").unwrap(),
            &quotes,
        )
        .await;

        assert!(matches!(
            results[&WorkKey::new(account.address(), "base", "ink")],
            SubmissionOutcome::Failed(FailureReason::MalformedQuote(_))
        ));
        assert_eq!(s.base.broadcast_count(), 0);
    }

    mod http {
        use super::*;
        use parking_lot::Mutex;
        use std::sync::Arc;
        use tokio::{
            io::{AsyncReadExt, AsyncWriteExt},
            net::TcpListener,
        };

        const QUOTE_URL: &str = "http://quote.test/v1/quote";

        /// Plain HTTP server standing in for a proxy. Answers every request
        /// with the same status and body and keeps the request lines.
        struct Stub {
            url: String,
            requests: Arc<Mutex<Vec<String>>>,
        }

        async fn stub(status: &'static str, body: String) -> Stub {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let url = format!("http://{}", listener.local_addr().unwrap());
            let requests = Arc::new(Mutex::new(Vec::new()));
            let seen = requests.clone();

            tokio::spawn(async move {
                while let Ok((mut socket, _)) = listener.accept().await {
                    let mut buf = vec![0u8; 16 * 1024];
                    let mut read = 0;
                    while read < buf.len() {
                        let n = socket.read(&mut buf[read..]).await.unwrap_or(0);
                        if n == 0 {
                            break;
                        }
                        read += n;
                        if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                            break;
                        }
                    }
                    let head = String::from_utf8_lossy(&buf[..read]).to_string();
                    let line = head.lines().next().unwrap_or_default().to_string();
                    seen.lock().push(line);

                    let response = format!(
                        "HTTP/1.1 {}\r\nContent-Type: application/json\r\n\
                         Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                }
            });

            Stub { url, requests }
        }

        fn request(from_address: Address) -> QuoteRequest {
            QuoteRequest {
                from_chain: 8453,
                to_chain: 57073,
                amount: parse_ether("0.0001").unwrap(),
                from_address,
            }
        }

        fn client(proxies: Vec<String>) -> HttpQuoteClient {
            HttpQuoteClient::new(QUOTE_URL, Duration::from_secs(5), proxies)
        }

        #[tokio::test]
        async fn ok_response_is_parsed() {
            let service = stub("200 OK", quote_body(8453)).await;
            let from = Account::generate().address();

            let quote = client(vec![service.url.clone()])
                .quote(&request(from), None)
                .await
                .unwrap();
            assert_eq!(quote.chain_id, 8453);
            assert_eq!(quote.to, ROUTER.parse::<Address>().unwrap());

            let requests = service.requests.lock().clone();
            assert_eq!(requests.len(), 1);
            let line = &requests[0];
            assert!(line.starts_with("GET http://quote.test/v1/quote?"), "{}", line);
            assert!(line.contains("fromChain=8453"));
            assert!(line.contains("toChain=57073"));
            assert!(line.contains(&format!("fromToken={}", Address::ZERO)));
            assert!(line.contains(&format!("toToken={}", Address::ZERO)));
            assert!(line.contains("fromAmount=100000000000000"));
            assert!(line.contains(&format!("fromAddress={}", from.to_checksum(None))));
        }

        #[tokio::test]
        async fn error_status_carries_the_error_body() {
            let body = serde_json::json!({
                "errorType": "NotFoundError",
                "code": 1002,
                "message": "No available quotes"
            });
            let service = stub("404 Not Found", body.to_string()).await;

            let err = client(vec![service.url.clone()])
                .quote(&request(Address::repeat_byte(1)), None)
                .await
                .unwrap_err();
            match &err {
                QuoteError::Unavailable(msg) => {
                    assert!(msg.starts_with("HTTP 404"), "{}", msg);
                    assert!(msg.contains(
                        "errorType: NotFoundError, code: 1002, message: No available quotes"
                    ));
                }
                other => panic!("unexpected error {:?}", other),
            }
            assert!(matches!(
                FailureReason::from(err),
                FailureReason::QuoteUnavailable(_)
            ));
        }

        #[tokio::test]
        async fn server_errors_and_other_success_codes_are_unavailable() {
            for (status, body) in [
                ("500 Internal Server Error", "upstream down".to_string()),
                ("202 Accepted", quote_body(8453)),
            ] {
                let service = stub(status, body).await;
                let err = client(vec![service.url.clone()])
                    .quote(&request(Address::repeat_byte(1)), None)
                    .await
                    .unwrap_err();
                let expected = format!("HTTP {}", &status[..3]);
                assert!(
                    matches!(&err, QuoteError::Unavailable(msg) if msg.starts_with(&expected)),
                    "{}: {:?}",
                    status,
                    err
                );
            }
        }

        #[tokio::test]
        async fn unreachable_service_is_unavailable() {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let dead = format!("http://{}", listener.local_addr().unwrap());
            drop(listener);

            let err = client(vec![dead])
                .quote(&request(Address::repeat_byte(1)), None)
                .await
                .unwrap_err();
            assert!(matches!(err, QuoteError::Unavailable(_)));
        }

        #[tokio::test]
        async fn wallet_proxy_is_preferred_over_the_pool() {
            let own = stub("200 OK", quote_body(8453)).await;
            let pooled = stub("200 OK", quote_body(8453)).await;
            let quotes = client(vec![pooled.url.clone()]);

            for _ in 0..3 {
                quotes
                    .quote(&request(Address::repeat_byte(1)), Some(&own.url))
                    .await
                    .unwrap();
            }
            assert_eq!(own.requests.lock().len(), 3);
            assert!(pooled.requests.lock().is_empty());
        }
    }
}
