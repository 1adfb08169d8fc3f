//! API key pool with penalty scoring and cooldowns.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::GatewayError;

/// Penalty assigned on a fatal release. High enough that a fatal key sorts
/// after any accumulating retryable penalty once its cooldown elapses.
const FATAL_PENALTY: u32 = u32::MAX;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub penalty_base: u32,
    pub cooldown_per_penalty: Duration,
    pub cooldown_cap: Duration,
    pub safety_cooldown: Duration,
    pub fatal_cooldown: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            penalty_base: 1,
            cooldown_per_penalty: Duration::from_secs(2),
            cooldown_cap: Duration::from_secs(60),
            safety_cooldown: Duration::from_secs(5),
            fatal_cooldown: Duration::from_secs(3600),
        }
    }
}

/// How a leased key performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Clean success. Resets penalty and failure count.
    Success,
    /// Transient failure. Raises penalty and starts a cooldown.
    Retryable,
    /// The credential itself was rejected. Disables the key for a long
    /// window.
    Fatal,
    /// Upstream safety refusal. Short fixed cooldown, no penalty, so the
    /// next attempt lands on a different key.
    SafetyBlocked,
    /// Failure unrelated to the credential. No state change.
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyState {
    Available,
    CheckedOut,
    Cooling,
}

struct KeySlot {
    secret: String,
    state: KeyState,
    cooldown_until: Instant,
    consecutive_failures: u32,
    penalty: u32,
    last_used: Instant,
}

/// Shared pool of API keys. Selection prefers the lowest penalty, ties
/// broken least-recently-used. The pool lock is never held across an await.
pub struct KeyPool {
    slots: Mutex<Vec<KeySlot>>,
    notify: Notify,
    config: PoolConfig,
}

impl fmt::Debug for KeyPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.slots.lock().map(|s| s.len()).unwrap_or(0);
        f.debug_struct("KeyPool")
            .field("keys", &len)
            .field("config", &self.config)
            .finish()
    }
}

impl KeyPool {
    /// # Errors
    ///
    /// Returns `GatewayError::NoKeys` when `secrets` is empty.
    pub fn new(secrets: Vec<String>, config: PoolConfig) -> Result<Arc<Self>, GatewayError> {
        if secrets.is_empty() {
            return Err(GatewayError::NoKeys);
        }
        let now = Instant::now();
        let slots = secrets
            .into_iter()
            .map(|secret| KeySlot {
                secret,
                state: KeyState::Available,
                cooldown_until: now,
                consecutive_failures: 0,
                penalty: 0,
                last_used: now,
            })
            .collect();
        Ok(Arc::new(Self {
            slots: Mutex::new(slots),
            notify: Notify::new(),
            config,
        }))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().map(|s| s.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check out the best available key, waiting for a release or a
    /// cooldown expiry up to `deadline`.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Exhausted` when no key becomes available
    /// before the deadline.
    pub async fn acquire(self: &Arc<Self>, deadline: Instant) -> Result<KeyLease, GatewayError> {
        loop {
            // Register for release notifications before inspecting the
            // slots. A `notify_waiters` that lands between dropping the
            // lock and awaiting would otherwise be lost and the acquirer
            // would sleep until the next cooldown expiry.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake_at = {
                let mut slots = self.slots.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                let now = Instant::now();
                for slot in slots.iter_mut() {
                    if slot.state == KeyState::Cooling && slot.cooldown_until <= now {
                        slot.state = KeyState::Available;
                    }
                }
                let best = slots
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| s.state == KeyState::Available)
                    .min_by_key(|(_, s)| (s.penalty, s.last_used))
                    .map(|(index, _)| index);
                if let Some(index) = best {
                    let slot = &mut slots[index];
                    slot.state = KeyState::CheckedOut;
                    slot.last_used = now;
                    let secret = slot.secret.clone();
                    return Ok(KeyLease {
                        pool: Arc::clone(self),
                        index,
                        secret,
                        active: true,
                    });
                }
                let earliest_cooldown = slots
                    .iter()
                    .filter(|s| s.state == KeyState::Cooling)
                    .map(|s| s.cooldown_until)
                    .min();
                earliest_cooldown.map_or(deadline, |c| c.min(deadline))
            };

            if Instant::now() >= deadline {
                return Err(GatewayError::Exhausted);
            }

            tokio::select! {
                () = &mut notified => {}
                () = tokio::time::sleep_until(wake_at) => {
                    if wake_at >= deadline {
                        return Err(GatewayError::Exhausted);
                    }
                }
            }
        }
    }

    fn apply(&self, index: usize, outcome: ReleaseOutcome) {
        let mut slots = self.slots.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(slot) = slots.get_mut(index) else {
            return;
        };
        let now = Instant::now();
        match outcome {
            ReleaseOutcome::Success => {
                slot.penalty = 0;
                slot.consecutive_failures = 0;
                slot.state = KeyState::Available;
            }
            ReleaseOutcome::Retryable => {
                slot.consecutive_failures = slot.consecutive_failures.saturating_add(1);
                slot.penalty = self
                    .config
                    .penalty_base
                    .saturating_mul(slot.consecutive_failures);
                let cooldown = self
                    .config
                    .cooldown_per_penalty
                    .saturating_mul(slot.penalty)
                    .min(self.config.cooldown_cap);
                if cooldown.is_zero() {
                    slot.state = KeyState::Available;
                } else {
                    slot.state = KeyState::Cooling;
                    slot.cooldown_until = now + cooldown;
                }
                tracing::debug!(
                    failures = slot.consecutive_failures,
                    penalty = slot.penalty,
                    cooldown_secs = cooldown.as_secs(),
                    "key released after transient failure"
                );
            }
            ReleaseOutcome::Fatal => {
                slot.penalty = FATAL_PENALTY;
                slot.state = KeyState::Cooling;
                slot.cooldown_until = now + self.config.fatal_cooldown;
                tracing::warn!(
                    cooldown_secs = self.config.fatal_cooldown.as_secs(),
                    "key disabled after credential rejection"
                );
            }
            ReleaseOutcome::SafetyBlocked => {
                slot.state = KeyState::Cooling;
                slot.cooldown_until = now + self.config.safety_cooldown;
            }
            ReleaseOutcome::Neutral => {
                slot.state = KeyState::Available;
            }
        }
        self.notify.notify_waiters();
    }
}

/// A checked-out key. Dropping the lease without an explicit release
/// returns the key as `Retryable`, so a cancelled call can never leak a
/// checked-out key or reward a failure.
pub struct KeyLease {
    pool: Arc<KeyPool>,
    index: usize,
    secret: String,
    active: bool,
}

impl fmt::Debug for KeyLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyLease")
            .field("index", &self.index)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl KeyLease {
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn release(mut self, outcome: ReleaseOutcome) {
        self.active = false;
        self.pool.apply(self.index, outcome);
    }
}

impl Drop for KeyLease {
    fn drop(&mut self) {
        if self.active {
            self.pool.apply(self.index, ReleaseOutcome::Retryable);
        }
    }
}
