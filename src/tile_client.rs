use crate::model::{
    Address,
    TileSnapshot,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use reqwest::StatusCode;
use serde::{
    Deserialize,
    Serialize,
    de::DeserializeOwned,
};
use std::future::Future;

/// Request/response boundary of the tile server.
pub trait TileApi: Clone + Send + Sync + 'static {
    fn addresses(&self) -> impl Future<Output = Result<Vec<Address>>> + Send;

    fn tiles(&self) -> impl Future<Output = Result<Vec<TileSnapshot>>> + Send;

    fn price(&self) -> impl Future<Output = Result<f64>> + Send;

    /// Asks the server to lock `frame_number` for the current user.
    fn lock_tile(&self, frame_number: usize) -> impl Future<Output = Result<LockAck>> + Send;

    fn purchase(
        &self,
        frame_number: usize,
        message: String,
    ) -> impl Future<Output = Result<PurchaseAck>> + Send;
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockAck {
    #[serde(rename = "State", default)]
    pub state: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseAck {
    #[serde(default)]
    pub transaction_id: Option<String>,
}

#[derive(Serialize)]
struct LockRequestDto {
    frame_number: usize,
}

#[derive(Serialize)]
struct PurchaseRequestDto<'a> {
    frame_number: usize,
    message: &'a str,
}

#[derive(Deserialize)]
struct PriceDto {
    price: f64,
}

#[derive(Deserialize)]
struct ErrorDto {
    error: String,
}

#[derive(Clone, Debug)]
pub struct TileClient {
    base_url: String,
    http: reqwest::Client,
}

impl TileClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        url::Url::parse(&base_url)
            .wrap_err_with(|| format!("invalid tile server URL {base_url}"))?;
        // The server tracks the current user by a session cookie.
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .wrap_err("failed to build HTTP client for tile server")?;
        Ok(Self { base_url, http })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let res = self
            .http
            .get(url)
            .send()
            .await
            .wrap_err_with(|| format!("tile server request GET {path} failed"))?;
        Self::decode(path, res).await
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let res = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .wrap_err_with(|| format!("tile server request POST {path} failed"))?;
        Self::decode(path, res).await
    }

    async fn decode<T: DeserializeOwned>(path: &str, res: reqwest::Response) -> Result<T> {
        let status = res.status();
        let bytes = res
            .bytes()
            .await
            .wrap_err("failed to read tile server response body")?;
        if !status.is_success() {
            let reason = serde_json::from_slice::<ErrorDto>(&bytes)
                .map(|dto| dto.error)
                .unwrap_or_else(|_| String::from_utf8_lossy(&bytes).trim().to_string());
            return Err(eyre!("tile server responded with {status} for {path}: {reason}"));
        }
        if status == StatusCode::NO_CONTENT || bytes.is_empty() {
            return serde_json::from_slice(b"null")
                .wrap_err_with(|| format!("empty tile server response for {path}"));
        }
        serde_json::from_slice(&bytes)
            .wrap_err_with(|| format!("invalid tile server payload for {path}"))
    }
}

impl TileApi for TileClient {
    async fn addresses(&self) -> Result<Vec<Address>> {
        self.get_json("/addresses").await
    }

    async fn tiles(&self) -> Result<Vec<TileSnapshot>> {
        self.get_json("/tiles").await
    }

    async fn price(&self) -> Result<f64> {
        let dto: PriceDto = self.get_json("/price").await?;
        Ok(dto.price)
    }

    async fn lock_tile(&self, frame_number: usize) -> Result<LockAck> {
        let ack: Option<LockAck> = self
            .post_json("/tile", &LockRequestDto { frame_number })
            .await?;
        Ok(ack.unwrap_or_default())
    }

    async fn purchase(&self, frame_number: usize, message: String) -> Result<PurchaseAck> {
        let body = PurchaseRequestDto {
            frame_number,
            message: &message,
        };
        let ack: Option<PurchaseAck> = self.post_json("/purchase", &body).await?;
        Ok(ack.unwrap_or_default())
    }
}
