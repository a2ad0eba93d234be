// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JSON-over-HTTPS implementation of [`Remoter`].
//!
//! Every response carries a `status` object; a non-zero `code` is an
//! application error even when the HTTP status is 200. GET requests are
//! retried on transport failures with a growing back-off, POSTs are sent
//! exactly once.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use super::{RemoteError, Remoter};
use crate::config::EngineConfig;
use crate::types::{
    AccountDetails, AccountId, AutoClaim, Balance, KeybaseTransactionId, PaymentDirectPost,
    PaymentMultiPost, PaymentRelayPost, PaymentResult, PaymentSummary, RelayClaimPost,
    RelayClaimResult, SubmitMultiResult, TimeboundsRecommendation, UserId,
};

const GET_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const BACKOFF_MULTIPLIER: f64 = 1.5;

#[derive(Debug, Clone)]
pub struct HttpRemote {
    base_url: Url,
    http: Client,
}

#[derive(Debug, Deserialize)]
struct AppStatus {
    code: i32,
    #[serde(default)]
    desc: String,
}

#[derive(Debug, Deserialize)]
struct SeqnoBody {
    seqno: String,
}

#[derive(Debug, Deserialize)]
struct BalancesBody {
    balances: Vec<Balance>,
}

#[derive(Debug, Deserialize)]
struct DetailsBody {
    details: AccountDetails,
}

#[derive(Debug, Deserialize)]
struct PaymentBody {
    payment: PaymentSummary,
}

#[derive(Debug, Deserialize)]
struct ResultBody<T> {
    result: T,
}

impl HttpRemote {
    pub fn new(config: &EngineConfig) -> Result<Self, RemoteError> {
        let mut base = config.remote_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).map_err(|e| RemoteError::InvalidUrl(e.to_string()))?;

        let http = Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| RemoteError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { base_url, http })
    }

    fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
        self.base_url
            .join(path)
            .map_err(|e| RemoteError::InvalidUrl(format!("{path}: {e}")))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, RemoteError> {
        let url = self.endpoint(path)?;
        let mut backoff = INITIAL_BACKOFF;
        let mut attempt = 1;

        loop {
            match self.http.get(url.clone()).query(query).send().await {
                Ok(response) => return decode_response(path, response).await,
                Err(e) if attempt < GET_ATTEMPTS => {
                    warn!(
                        path,
                        attempt,
                        error = %e,
                        "GET failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.mul_f64(BACKOFF_MULTIPLIER);
                    attempt += 1;
                }
                Err(e) => return Err(RemoteError::Transport(format!("GET {path} failed: {e}"))),
            }
        }
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        payload: &Value,
    ) -> Result<T, RemoteError> {
        let url = self.endpoint(path)?;
        let response = self
            .http
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| RemoteError::Transport(format!("POST {path} failed: {e}")))?;
        decode_response(path, response).await
    }
}

async fn decode_response<T: DeserializeOwned>(
    path: &str,
    response: reqwest::Response,
) -> Result<T, RemoteError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RemoteError::Status {
            code: status.as_u16(),
            body,
        });
    }

    let value: Value = response
        .json()
        .await
        .map_err(|e| RemoteError::Decode(format!("{path}: invalid JSON: {e}")))?;
    debug!(path, "remote call succeeded");
    decode_envelope(path, value)
}

/// Check the embedded application status and decode the remaining body.
fn decode_envelope<T: DeserializeOwned>(path: &str, value: Value) -> Result<T, RemoteError> {
    if let Some(status) = value.get("status") {
        let status: AppStatus = serde_json::from_value(status.clone())
            .map_err(|e| RemoteError::Decode(format!("{path}: invalid status: {e}")))?;
        if status.code != 0 {
            return Err(RemoteError::App {
                code: status.code,
                desc: status.desc,
            });
        }
    }
    serde_json::from_value(value).map_err(|e| RemoteError::Decode(format!("{path}: {e}")))
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Value, RemoteError> {
    serde_json::to_value(value).map_err(|e| RemoteError::Decode(format!("encode failed: {e}")))
}

#[async_trait]
impl Remoter for HttpRemote {
    async fn account_seqno(&self, account: &AccountId) -> Result<u64, RemoteError> {
        let body: SeqnoBody = self
            .get_json("stellar/accountseqno", &[("account_id", account.as_str())])
            .await?;
        if body.seqno.is_empty() {
            return Ok(0);
        }
        body.seqno
            .parse()
            .map_err(|e| RemoteError::Decode(format!("invalid seqno {:?}: {e}", body.seqno)))
    }

    async fn balances(&self, account: &AccountId) -> Result<Vec<Balance>, RemoteError> {
        let body: BalancesBody = self
            .get_json("stellar/balances", &[("account_id", account.as_str())])
            .await?;
        Ok(body.balances)
    }

    async fn details(&self, account: &AccountId) -> Result<AccountDetails, RemoteError> {
        let body: DetailsBody = self
            .get_json("stellar/details", &[("account_id", account.as_str())])
            .await?;
        Ok(body.details)
    }

    async fn submit_payment(&self, post: PaymentDirectPost) -> Result<PaymentResult, RemoteError> {
        self.post_json("stellar/submitpayment", &json!({ "payment": encode(&post)? }))
            .await
    }

    async fn submit_relay_payment(
        &self,
        post: PaymentRelayPost,
    ) -> Result<PaymentResult, RemoteError> {
        self.post_json("stellar/submitrelaypayment", &json!({ "payment": encode(&post)? }))
            .await
    }

    async fn submit_multi_payment(
        &self,
        post: PaymentMultiPost,
    ) -> Result<SubmitMultiResult, RemoteError> {
        self.post_json("stellar/submitmultipayment", &json!({ "payment": encode(&post)? }))
            .await
    }

    async fn submit_relay_claim(
        &self,
        post: RelayClaimPost,
    ) -> Result<RelayClaimResult, RemoteError> {
        self.post_json("stellar/submitrelayclaim", &json!({ "claim": encode(&post)? }))
            .await
    }

    async fn acquire_auto_claim_lock(&self, user: &UserId) -> Result<String, RemoteError> {
        let body: ResultBody<String> = self
            .post_json("stellar/acquireautoclaimlock", &json!({ "uid": user }))
            .await?;
        Ok(body.result)
    }

    async fn release_auto_claim_lock(&self, user: &UserId, token: &str) -> Result<(), RemoteError> {
        let _: Value = self
            .post_json(
                "stellar/releaseautoclaimlock",
                &json!({ "uid": user, "token": token }),
            )
            .await?;
        Ok(())
    }

    async fn next_auto_claim(&self, user: &UserId) -> Result<Option<AutoClaim>, RemoteError> {
        let body: ResultBody<Option<AutoClaim>> = self
            .post_json("stellar/nextautoclaim", &json!({ "uid": user }))
            .await?;
        Ok(body.result)
    }

    async fn payment_details(
        &self,
        kb_tx_id: &KeybaseTransactionId,
    ) -> Result<PaymentSummary, RemoteError> {
        let body: PaymentBody = self
            .get_json("stellar/paymentdetail", &[("id", kb_tx_id.as_str())])
            .await?;
        Ok(body.payment)
    }

    async fn server_timebounds_recommendation(
        &self,
    ) -> Result<TimeboundsRecommendation, RemoteError> {
        self.get_json("stellar/timebounds", &[]).await
    }
}
