//! Wallet signing collaborator.
//!
//! The core never holds key material. Providers hand an unsigned,
//! base64-encoded transaction to a `WalletSigner`, which signs it for the
//! given wallet handle, broadcasts it and returns the signature.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{classify_message, ProviderError, ProviderResult};
use crate::http::read_json;
use crate::provider::BoxFuture;
use crate::types::WalletHandle;

/// Default timeout for signing requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Signs and broadcasts transactions for a wallet.
pub trait WalletSigner: Send + Sync {
    fn sign_and_submit<'a>(
        &'a self,
        transaction_b64: &'a str,
        wallet: &'a WalletHandle,
    ) -> BoxFuture<'a, ProviderResult<String>>;
}

/// Arc wrapper for WalletSigner trait objects.
pub type DynWalletSigner = Arc<dyn WalletSigner>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignRequest<'a> {
    wallet: &'a str,
    key_ref: &'a str,
    transaction: &'a str,
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    signature: Option<String>,
    error: Option<String>,
}

/// Signer backed by a remote signing service.
pub struct RemoteSigner {
    client: Client,
    url: String,
    auth_token: Option<String>,
}

impl RemoteSigner {
    pub fn new(url: impl Into<String>, auth_token: Option<String>) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: url.into(),
            auth_token,
        })
    }
}

impl WalletSigner for RemoteSigner {
    fn sign_and_submit<'a>(
        &'a self,
        transaction_b64: &'a str,
        wallet: &'a WalletHandle,
    ) -> BoxFuture<'a, ProviderResult<String>> {
        Box::pin(async move {
            let body = SignRequest {
                wallet: wallet.address.as_str(),
                key_ref: &wallet.key_ref,
                transaction: transaction_b64,
            };

            let mut request = self.client.post(&self.url).json(&body);
            if let Some(token) = &self.auth_token {
                request = request.bearer_auth(token);
            }

            let response = request.send().await?;
            let parsed: SignResponse = read_json(response).await?;
            match (parsed.signature, parsed.error) {
                (Some(signature), _) if !signature.is_empty() => {
                    debug!(wallet = %wallet.address.short(), %signature, "Transaction submitted");
                    Ok(signature)
                }
                (_, Some(error)) => Err(ProviderError::new(classify_message(&error), error)),
                _ => Err(ProviderError::unknown("signer returned no signature")),
            }
        })
    }
}

/// Recording signer for tests.
#[derive(Debug, Default)]
pub struct MockSigner {
    submitted: Mutex<Vec<String>>,
    next_error: Mutex<Option<ProviderError>>,
}

impl MockSigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next submission with `err`.
    pub fn fail_next(&self, err: ProviderError) {
        *self.next_error.lock() = Some(err);
    }

    /// Transactions submitted so far.
    pub fn submitted(&self) -> Vec<String> {
        self.submitted.lock().clone()
    }
}

impl WalletSigner for MockSigner {
    fn sign_and_submit<'a>(
        &'a self,
        transaction_b64: &'a str,
        _wallet: &'a WalletHandle,
    ) -> BoxFuture<'a, ProviderResult<String>> {
        Box::pin(async move {
            if let Some(err) = self.next_error.lock().take() {
                return Err(err);
            }
            let mut submitted = self.submitted.lock();
            submitted.push(transaction_b64.to_string());
            Ok(format!("mock-sig-{}", submitted.len()))
        })
    }
}
