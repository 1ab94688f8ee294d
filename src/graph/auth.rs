use std::cell::RefCell;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::env_value;
use crate::db::Database;
use crate::graph::redact_response_body;

pub const DEFAULT_GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";
pub const TOKEN_CACHE_KEY_ENV: &str = "NEWSLETTER_TOKEN_CACHE_KEY";

const CACHE_SKEW_SECONDS: i64 = 60;
const TOKEN_CACHE_KEY_BYTES: usize = 32;
const TOKEN_CACHE_NONCE_BYTES: usize = 12;
const TOKEN_CACHE_ENVELOPE_VERSION: u8 = 1;

/// Supplies bearer tokens for Graph. `None` means no usable token right now.
#[async_trait(?Send)]
pub trait TokenProvider {
    async fn token(&self) -> Option<String>;
}

/// A token acquired out of band, e.g. `GRAPH_ACCESS_TOKEN`.
#[derive(Debug, Clone)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        let token = token.trim();
        Self((!token.is_empty()).then(|| token.to_string()))
    }

    pub fn from_env() -> Option<Self> {
        env_value("GRAPH_ACCESS_TOKEN").map(Self::new)
    }

    pub fn empty() -> Self {
        Self(None)
    }
}

#[async_trait(?Send)]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: String,
    /// Overrides the Microsoft identity platform token endpoint.
    pub token_url: Option<String>,
}

impl ClientCredentials {
    pub fn from_env() -> Result<Self> {
        let tenant_id = env_value("TENANT_ID").ok_or_else(|| anyhow!("missing TENANT_ID"))?;
        let client_id = env_value("CLIENT_ID").ok_or_else(|| anyhow!("missing CLIENT_ID"))?;
        let client_secret =
            env_value("CLIENT_SECRET").ok_or_else(|| anyhow!("missing CLIENT_SECRET"))?;

        Ok(Self {
            tenant_id,
            client_id,
            client_secret,
            scope: env_value("GRAPH_SCOPE").unwrap_or_else(|| DEFAULT_GRAPH_SCOPE.to_string()),
            token_url: env_value("GRAPH_TOKEN_URL"),
        })
    }

    fn token_endpoint(&self) -> String {
        self.token_url.clone().unwrap_or_else(|| {
            format!(
                "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
                self.tenant_id
            )
        })
    }

    fn cache_key(&self) -> String {
        format!("graph_token:{}:{}", self.tenant_id, self.client_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    token_type: Option<String>,
    expires_in: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedAccessToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedAccessToken {
    fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Encrypted token persistence in the `sync_state` table.
pub struct TokenStore {
    db: Database,
    key: [u8; TOKEN_CACHE_KEY_BYTES],
}

impl TokenStore {
    pub fn new(db: Database, key: [u8; TOKEN_CACHE_KEY_BYTES]) -> Self {
        Self { db, key }
    }

    /// Returns `None` when no cache key is configured; tokens then stay in
    /// memory only.
    pub fn from_env(db: Database) -> Result<Option<Self>> {
        let Some(raw) = env_value(TOKEN_CACHE_KEY_ENV) else {
            return Ok(None);
        };
        let key = parse_cache_key_hex(&raw).with_context(|| {
            format!("{TOKEN_CACHE_KEY_ENV} must be 64 hex characters (32 bytes)")
        })?;
        Ok(Some(Self::new(db, key)))
    }

    fn load(&self, cache_key: &str) -> Result<Option<CachedAccessToken>> {
        let Some(raw) = self
            .db
            .get_sync_state(cache_key)?
            .and_then(|state| state.value)
        else {
            return Ok(None);
        };

        let cached = match decrypt_token(&raw, &self.key) {
            Ok(token) => token,
            Err(err) => {
                warn!("discarding unreadable graph token cache: {err}");
                self.db.delete_sync_state(cache_key)?;
                return Ok(None);
            }
        };

        if cached.is_expired() {
            self.db.delete_sync_state(cache_key)?;
            return Ok(None);
        }
        Ok(Some(cached))
    }

    fn save(&self, cache_key: &str, token: &CachedAccessToken) -> Result<()> {
        let sealed = encrypt_token(token, &self.key).context("encrypt cached graph token")?;
        self.db
            .set_sync_state(cache_key, &sealed)
            .context("write graph token to sync_state")
    }
}

/// OAuth2 client-credentials flow with an in-memory cache and optional
/// encrypted persistence.
pub struct ClientCredentialsProvider {
    client: Client,
    credentials: ClientCredentials,
    cached: RefCell<Option<CachedAccessToken>>,
    store: Option<TokenStore>,
}

impl ClientCredentialsProvider {
    pub fn new(client: Client, credentials: ClientCredentials) -> Self {
        Self {
            client,
            credentials,
            cached: RefCell::new(None),
            store: None,
        }
    }

    pub fn with_store(mut self, store: TokenStore) -> Self {
        self.store = Some(store);
        self
    }

    fn memory_token(&self) -> Option<String> {
        self.cached
            .borrow()
            .as_ref()
            .filter(|cached| !cached.is_expired())
            .map(|cached| cached.access_token.clone())
    }

    fn stored_token(&self) -> Option<CachedAccessToken> {
        let store = self.store.as_ref()?;
        match store.load(&self.credentials.cache_key()) {
            Ok(token) => token,
            Err(err) => {
                warn!("failed to read graph token cache: {err:#}");
                None
            }
        }
    }

    async fn fetch_token(&self) -> Result<CachedAccessToken> {
        let token_url = self.credentials.token_endpoint();
        let response = self
            .client
            .post(&token_url)
            .form(&[
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("scope", self.credentials.scope.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await
            .with_context(|| format!("request graph oauth token from {token_url}"))?;

        let status = response.status();
        let body = response.text().await.context("read graph token response")?;
        if !status.is_success() {
            return Err(anyhow!(
                "graph oauth token request failed: status={} body={}",
                status,
                redact_response_body(&body)
            ));
        }

        let payload: OAuthTokenResponse =
            serde_json::from_str(&body).context("decode graph token JSON response")?;
        let lifetime = (payload.expires_in as i64).saturating_sub(CACHE_SKEW_SECONDS);
        Ok(CachedAccessToken {
            access_token: payload.access_token,
            expires_at: Utc::now() + Duration::seconds(lifetime),
        })
    }
}

#[async_trait(?Send)]
impl TokenProvider for ClientCredentialsProvider {
    async fn token(&self) -> Option<String> {
        if let Some(token) = self.memory_token() {
            return Some(token);
        }

        if let Some(stored) = self.stored_token() {
            debug!("using persisted graph token");
            let token = stored.access_token.clone();
            *self.cached.borrow_mut() = Some(stored);
            return Some(token);
        }

        let fresh = match self.fetch_token().await {
            Ok(fresh) => fresh,
            Err(err) => {
                warn!("failed to acquire graph access token: {err:#}");
                return None;
            }
        };

        if let Some(store) = &self.store {
            if let Err(err) = store.save(&self.credentials.cache_key(), &fresh) {
                warn!("failed to persist graph token: {err:#}");
            }
        }
        let token = fresh.access_token.clone();
        *self.cached.borrow_mut() = Some(fresh);
        Some(token)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EncryptedTokenEnvelope {
    version: u8,
    nonce: String,
    ciphertext: String,
}

fn sealing_key(key: &[u8; TOKEN_CACHE_KEY_BYTES]) -> Result<LessSafeKey> {
    let unbound = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|_| anyhow!("construct AES-256-GCM key"))?;
    Ok(LessSafeKey::new(unbound))
}

fn encrypt_token(token: &CachedAccessToken, key: &[u8; TOKEN_CACHE_KEY_BYTES]) -> Result<String> {
    let mut payload = serde_json::to_vec(token).context("serialize token payload")?;

    let mut nonce_bytes = [0u8; TOKEN_CACHE_NONCE_BYTES];
    SystemRandom::new()
        .fill(&mut nonce_bytes)
        .map_err(|_| anyhow!("generate token cache nonce"))?;

    sealing_key(key)?
        .seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::empty(),
            &mut payload,
        )
        .map_err(|_| anyhow!("encrypt graph token cache"))?;

    let envelope = EncryptedTokenEnvelope {
        version: TOKEN_CACHE_ENVELOPE_VERSION,
        nonce: BASE64.encode(nonce_bytes),
        ciphertext: BASE64.encode(&payload),
    };
    serde_json::to_string(&envelope).context("serialize encrypted token envelope")
}

fn decrypt_token(raw: &str, key: &[u8; TOKEN_CACHE_KEY_BYTES]) -> Result<CachedAccessToken> {
    let envelope: EncryptedTokenEnvelope =
        serde_json::from_str(raw).context("parse encrypted token envelope")?;
    if envelope.version != TOKEN_CACHE_ENVELOPE_VERSION {
        return Err(anyhow!(
            "unsupported token envelope version {}",
            envelope.version
        ));
    }

    let nonce_bytes: [u8; TOKEN_CACHE_NONCE_BYTES] = BASE64
        .decode(envelope.nonce.as_bytes())
        .context("decode envelope nonce")?
        .try_into()
        .map_err(|_| anyhow!("invalid nonce length in token envelope"))?;
    let mut ciphertext = BASE64
        .decode(envelope.ciphertext.as_bytes())
        .context("decode envelope ciphertext")?;

    let plaintext = sealing_key(key)?
        .open_in_place(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::empty(),
            &mut ciphertext,
        )
        .map_err(|_| anyhow!("decrypt graph token cache"))?;

    serde_json::from_slice(plaintext).context("parse decrypted token payload")
}

fn parse_cache_key_hex(raw: &str) -> Result<[u8; TOKEN_CACHE_KEY_BYTES]> {
    let value = raw.trim();
    if value.len() != TOKEN_CACHE_KEY_BYTES * 2 {
        return Err(anyhow!("token cache key must be 32 bytes"));
    }

    value
        .as_bytes()
        .chunks(2)
        .map(|pair| match (hex_nibble(pair[0]), hex_nibble(pair[1])) {
            (Some(hi), Some(lo)) => Ok((hi << 4) | lo),
            _ => Err(anyhow!("invalid hex digit in token cache key")),
        })
        .collect::<Result<Vec<u8>>>()?
        .try_into()
        .map_err(|_| anyhow!("token cache key must be 32 bytes"))
}

fn hex_nibble(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}
