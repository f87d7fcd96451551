//! Single-use anti-forgery `state` tokens
//!
//! Each login link carries a fresh random token. The callback must present a
//! token that is still outstanding; consuming it removes it, so a replayed or
//! forged callback fails closed. Unknown, already-consumed and expired tokens
//! are indistinguishable to the caller.

use std::collections::HashMap;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// How long an issued token stays redeemable.
pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(600);

/// Result of presenting a token to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateCheck {
    Valid,
    Invalid,
}

/// Outstanding login tokens, keyed by token with their issue time.
///
/// All operations take the lock for a map lookup only and never across I/O,
/// so `issue` and `consume` are linearizable with each other.
pub struct StateRegistry {
    ttl: Duration,
    outstanding: Mutex<HashMap<String, Instant>>,
}

impl StateRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            outstanding: Mutex::new(HashMap::new()),
        }
    }

    /// Generate a new token and record it as outstanding.
    pub async fn issue(&self) -> String {
        let mut outstanding = self.outstanding.lock().await;
        // Lazy cleanup while the lock is held anyway
        let ttl = self.ttl;
        outstanding.retain(|_, issued| issued.elapsed() < ttl);

        loop {
            let token = generate_token();
            if !outstanding.contains_key(&token) {
                outstanding.insert(token.clone(), Instant::now());
                debug!(outstanding = outstanding.len(), "state token issued");
                return token;
            }
        }
    }

    /// Redeem a token. Only the first call for an outstanding, unexpired
    /// token returns `Valid`.
    pub async fn consume(&self, token: &str) -> StateCheck {
        let issued = self.outstanding.lock().await.remove(token);
        match issued {
            Some(issued) if issued.elapsed() < self.ttl => StateCheck::Valid,
            Some(issued) => {
                debug!(
                    age_secs = issued.elapsed().as_secs(),
                    "expired state token presented"
                );
                StateCheck::Invalid
            }
            None => StateCheck::Invalid,
        }
    }

    /// Drop every expired token. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let mut outstanding = self.outstanding.lock().await;
        let before = outstanding.len();
        let ttl = self.ttl;
        outstanding.retain(|_, issued| issued.elapsed() < ttl);
        before - outstanding.len()
    }

    /// Number of tokens currently outstanding (including expired ones not
    /// yet purged).
    pub async fn len(&self) -> usize {
        self.outstanding.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for StateRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_TTL)
    }
}

/// 32 random bytes as URL-safe base64 (43 chars, no padding).
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
