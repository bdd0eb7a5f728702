//! GoPay REST API client.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::instrument;
use url::Url;

use boxrent_core::GatewayPaymentId;

use super::types::{
    Callback, CreatePaymentBody, CreateRecurrenceBody, Item, Payer, PaymentResponse, Recurrence,
    Target, TokenResponse,
};
use super::{GoPayError, GoPayPayment, PaymentGateway, PaymentRequest, RecurrenceCharge};
use crate::config::GoPayConfig;

/// Tokens are renewed this long before GoPay would reject them.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Open-ended rentals authorize recurrences until this date.
const RECURRENCE_DATE_TO: &str = "2099-12-31";

const CARD_ONLY: &[&str] = &["PAYMENT_CARD"];
const ONE_OFF_INSTRUMENTS: &[&str] = &["PAYMENT_CARD", "BANK_ACCOUNT"];

#[derive(Clone)]
struct AccessToken {
    value: SecretString,
    expires_at: Instant,
}

impl AccessToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + TOKEN_EXPIRY_MARGIN < self.expires_at
    }
}

/// GoPay API client.
///
/// Cheap to clone; clones share the HTTP connection pool and token cache.
#[derive(Clone)]
pub struct GoPayClient {
    inner: Arc<GoPayClientInner>,
}

struct GoPayClientInner {
    client: reqwest::Client,
    config: GoPayConfig,
    token: RwLock<Option<AccessToken>>,
}

impl GoPayClient {
    /// Create a client whose every request is bounded by `config.timeout`.
    ///
    /// # Errors
    ///
    /// Returns `GoPayError::Transport` if the HTTP client cannot be built.
    pub fn new(config: GoPayConfig) -> Result<Self, GoPayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GoPayError::Transport(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            inner: Arc::new(GoPayClientInner {
                client,
                config,
                token: RwLock::new(None),
            }),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, GoPayError> {
        self.inner
            .config
            .gateway_url
            .join(path)
            .map_err(|e| GoPayError::Transport(format!("invalid endpoint {path}: {e}")))
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    async fn access_token(&self) -> Result<SecretString, GoPayError> {
        if let Some(token) = self.inner.token.read().await.as_ref()
            && token.is_fresh()
        {
            return Ok(token.value.clone());
        }

        let mut cached = self.inner.token.write().await;
        // Another request may have refreshed while we waited for the lock
        if let Some(token) = cached.as_ref()
            && token.is_fresh()
        {
            return Ok(token.value.clone());
        }

        let token = self.fetch_token().await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    #[instrument(skip(self))]
    async fn fetch_token(&self) -> Result<AccessToken, GoPayError> {
        let config = &self.inner.config;
        let response = self
            .inner
            .client
            .post(self.endpoint("oauth2/token")?)
            .basic_auth(&config.client_id, Some(config.client_secret.expose_secret()))
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[("grant_type", "client_credentials"), ("scope", "payment-all")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GoPayError::Authentication(format!("HTTP {status}: {body}")));
        }

        let token: TokenResponse = response.json().await?;
        tracing::debug!(expires_in = token.expires_in, "Obtained GoPay access token");
        Ok(AccessToken {
            value: SecretString::from(token.access_token),
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        })
    }

    // =========================================================================
    // Requests
    // =========================================================================

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, GoPayError> {
        let token = self.access_token().await?;
        let response = request
            .bearer_auth(token.expose_secret())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            // Force a fresh token on the next call
            *self.inner.token.write().await = None;
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GoPayError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| GoPayError::InvalidResponse(e.to_string()))
    }

    async fn create(
        &self,
        request: &PaymentRequest,
        recurring: bool,
    ) -> Result<GoPayPayment, GoPayError> {
        let config = &self.inner.config;
        let body = CreatePaymentBody {
            payer: Payer {
                allowed_payment_instruments: if recurring {
                    CARD_ONLY
                } else {
                    ONE_OFF_INSTRUMENTS
                },
            },
            target: Target {
                kind: "ACCOUNT",
                goid: config.goid,
            },
            amount: request.amount.minor(),
            currency: request.currency.code(),
            order_number: &request.order_number,
            order_description: &request.description,
            items: vec![Item {
                name: &request.description,
                amount: request.amount.minor(),
                count: 1,
            }],
            callback: Callback {
                return_url: &request.return_url,
                notification_url: &request.notification_url,
            },
            lang: &config.language,
            recurrence: recurring.then_some(Recurrence {
                recurrence_cycle: "ON_DEMAND",
                recurrence_date_to: RECURRENCE_DATE_TO,
            }),
        };

        let response: PaymentResponse = self
            .send(
                self.inner
                    .client
                    .post(self.endpoint("payments/payment")?)
                    .json(&body),
            )
            .await?;
        Ok(response.into())
    }
}

#[async_trait]
impl PaymentGateway for GoPayClient {
    #[instrument(skip(self, request), fields(order_number = %request.order_number, amount = %request.amount))]
    async fn create_payment(&self, request: &PaymentRequest) -> Result<GoPayPayment, GoPayError> {
        self.create(request, false).await
    }

    #[instrument(skip(self, request), fields(order_number = %request.order_number, amount = %request.amount))]
    async fn create_recurring_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<GoPayPayment, GoPayError> {
        self.create(request, true).await
    }

    #[instrument(skip(self, charge), fields(amount = %charge.amount))]
    async fn create_recurrence(
        &self,
        parent: GatewayPaymentId,
        charge: &RecurrenceCharge,
    ) -> Result<GoPayPayment, GoPayError> {
        let body = CreateRecurrenceBody {
            amount: charge.amount.minor(),
            currency: charge.currency.code(),
            order_number: &charge.order_number,
            order_description: &charge.description,
            items: vec![Item {
                name: &charge.description,
                amount: charge.amount.minor(),
                count: 1,
            }],
        };

        let response: PaymentResponse = self
            .send(
                self.inner
                    .client
                    .post(self.endpoint(&format!("payments/payment/{parent}/create-recurrence"))?)
                    .json(&body),
            )
            .await?;
        Ok(response.into())
    }

    #[instrument(skip(self))]
    async fn void_recurrence(&self, parent: GatewayPaymentId) -> Result<(), GoPayError> {
        let _: serde_json::Value = self
            .send(
                self.inner
                    .client
                    .post(self.endpoint(&format!("payments/payment/{parent}/void-recurrence"))?)
                    .header(
                        reqwest::header::CONTENT_TYPE,
                        "application/x-www-form-urlencoded",
                    ),
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_status(&self, id: GatewayPaymentId) -> Result<GoPayPayment, GoPayError> {
        let response: PaymentResponse = self
            .send(
                self.inner
                    .client
                    .get(self.endpoint(&format!("payments/payment/{id}"))?),
            )
            .await?;
        Ok(response.into())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode, header};
    use axum::response::{IntoResponse, Response};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use boxrent_core::CurrencyCode;
    use serde_json::json;

    use super::*;
    use crate::gopay::GoPayPaymentStatus;

    /// Payment ids with scripted behaviour on the local gateway.
    const CONFLICT_PAYMENT: i64 = 409;
    const FIRST_TOKEN_REJECTED: i64 = 401;
    const SLOW_PAYMENT: i64 = 504;

    fn client_for(gateway_url: Url, timeout: Duration) -> GoPayClient {
        GoPayClient::new(GoPayConfig {
            goid: 8_123_456_789,
            client_id: "1061399163".to_string(),
            client_secret: SecretString::from("stDTmVXF"),
            gateway_url,
            timeout,
            currency: CurrencyCode::CZK,
            language: "CS".to_string(),
        })
        .unwrap()
    }

    fn client() -> GoPayClient {
        client_for(
            Url::parse("https://gw.sandbox.gopay.com/api/").unwrap(),
            Duration::from_secs(5),
        )
    }

    #[derive(Default)]
    struct LocalGateway {
        token_requests: AtomicUsize,
    }

    async fn issue_token(State(gateway): State<Arc<LocalGateway>>) -> Json<serde_json::Value> {
        let n = gateway.token_requests.fetch_add(1, Ordering::SeqCst) + 1;
        Json(json!({
            "token_type": "bearer",
            "access_token": format!("token-{n}"),
            "expires_in": 1800
        }))
    }

    async fn payment_status(Path(id): Path<i64>, headers: HeaderMap) -> Response {
        let bearer = headers.get(header::AUTHORIZATION);
        match id {
            CONFLICT_PAYMENT => (
                StatusCode::CONFLICT,
                r#"{"errors":[{"error_code":409,"message":"payment in wrong state"}]}"#,
            )
                .into_response(),
            FIRST_TOKEN_REJECTED if bearer.is_some_and(|value| value == "Bearer token-1") => {
                StatusCode::UNAUTHORIZED.into_response()
            }
            SLOW_PAYMENT => {
                tokio::time::sleep(Duration::from_secs(3)).await;
                Json(json!({"id": id, "state": "PAID"})).into_response()
            }
            _ => Json(json!({"id": id, "state": "PAID"})).into_response(),
        }
    }

    /// Serve a minimal GoPay API on an ephemeral local port.
    async fn local_gateway() -> (Url, Arc<LocalGateway>) {
        let gateway = Arc::new(LocalGateway::default());
        let app = Router::new()
            .route("/api/oauth2/token", post(issue_token))
            .route("/api/payments/payment/{id}", get(payment_status))
            .with_state(gateway.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (Url::parse(&format!("http://{addr}/api/")).unwrap(), gateway)
    }

    #[tokio::test]
    async fn test_status_fetch_reuses_cached_token() {
        let (url, gateway) = local_gateway().await;
        let client = client_for(url, Duration::from_secs(5));

        let first = client.get_status(GatewayPaymentId::new(7)).await.unwrap();
        let second = client.get_status(GatewayPaymentId::new(8)).await.unwrap();

        assert_eq!(first.status, GoPayPaymentStatus::Paid);
        assert_eq!(second.id, GatewayPaymentId::new(8));
        assert_eq!(gateway.token_requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_status_becomes_api_error() {
        let (url, gateway) = local_gateway().await;
        let client = client_for(url, Duration::from_secs(5));

        let err = client
            .get_status(GatewayPaymentId::new(CONFLICT_PAYMENT))
            .await
            .unwrap_err();

        assert!(
            matches!(&err, GoPayError::Api { status: 409, body } if body.contains("wrong state")),
            "unexpected error: {err:?}"
        );
        assert!(!err.is_transient());

        // A non-auth failure keeps the token
        client.get_status(GatewayPaymentId::new(7)).await.unwrap();
        assert_eq!(gateway.token_requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_gateway_times_out() {
        let (url, _gateway) = local_gateway().await;
        let client = client_for(url, Duration::from_secs(1));

        let err = client
            .get_status(GatewayPaymentId::new(SLOW_PAYMENT))
            .await
            .unwrap_err();

        assert!(matches!(err, GoPayError::Timeout), "unexpected error: {err:?}");
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_unauthorized_response_forces_new_token() {
        let (url, gateway) = local_gateway().await;
        let client = client_for(url, Duration::from_secs(5));
        let id = GatewayPaymentId::new(FIRST_TOKEN_REJECTED);

        let err = client.get_status(id).await.unwrap_err();
        assert_eq!(err.status(), Some(401));

        let retried = client.get_status(id).await.unwrap();
        assert_eq!(retried.status, GoPayPaymentStatus::Paid);
        assert_eq!(gateway.token_requests.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client = client_for(
            Url::parse(&format!("http://{addr}/api/")).unwrap(),
            Duration::from_secs(5),
        );

        let err = client.get_status(GatewayPaymentId::new(7)).await.unwrap_err();
        assert!(matches!(err, GoPayError::Transport(_)), "unexpected error: {err:?}");
    }

    #[test]
    fn test_endpoints_are_relative_to_gateway_root() {
        let client = client();
        assert_eq!(
            client.endpoint("oauth2/token").unwrap().as_str(),
            "https://gw.sandbox.gopay.com/api/oauth2/token"
        );
        assert_eq!(
            client
                .endpoint("payments/payment/3000006529/create-recurrence")
                .unwrap()
                .as_str(),
            "https://gw.sandbox.gopay.com/api/payments/payment/3000006529/create-recurrence"
        );
    }

    #[test]
    fn test_token_freshness_margin() {
        let fresh = AccessToken {
            value: SecretString::from("token"),
            expires_at: Instant::now() + Duration::from_secs(1800),
        };
        let stale = AccessToken {
            value: SecretString::from("token"),
            expires_at: Instant::now() + Duration::from_secs(30),
        };
        assert!(fresh.is_fresh());
        assert!(!stale.is_fresh());
    }
}
