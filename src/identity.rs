//! Deterministic, persisted identity mapping
//!
//! Maps an application user to a numeric transport UID. The scheme is
//! encoded as a numeric band so receivers can classify a sender's role from
//! the UID alone (dispatchers in 1,000,000..2,000,000, responders in
//! 2,000,000..3,000,000). The first call derives and persists a mapping;
//! every later call returns the same UID for the lifetime of the install.

use crate::error::IdentityError;
use crate::store::SettingsStore;
use std::sync::Arc;

/// Width of each scheme's UID band
const BAND_SPAN: u32 = 1_000_000;

/// Give up probing for a free slot after this many collisions
const MAX_PROBES: u32 = 1024;

/// Identity scheme encoded into the UID band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityScheme {
    Dispatcher,
    Responder,
}

impl IdentityScheme {
    /// Lowest UID of this scheme's band
    pub fn band_base(&self) -> u32 {
        match self {
            IdentityScheme::Dispatcher => 1_000_000,
            IdentityScheme::Responder => 2_000_000,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityScheme::Dispatcher => "dispatcher",
            IdentityScheme::Responder => "responder",
        }
    }

    /// Parse a scheme name as it appears in config
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "dispatcher" => Some(IdentityScheme::Dispatcher),
            "responder" => Some(IdentityScheme::Responder),
            _ => None,
        }
    }

    /// Classify a UID back into its scheme band
    pub fn of_uid(uid: u32) -> Option<Self> {
        match uid {
            1_000_000..=1_999_999 => Some(IdentityScheme::Dispatcher),
            2_000_000..=2_999_999 => Some(IdentityScheme::Responder),
            _ => None,
        }
    }
}

impl std::fmt::Display for IdentityScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted app-user → transport-UID mapper
pub struct IdentityMapper {
    store: Arc<dyn SettingsStore>,
}

impl IdentityMapper {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    /// Return the persisted UID for this user, deriving and persisting one
    /// on first use. Idempotent for the lifetime of the install.
    pub fn get_or_create_uid(
        &self,
        scheme: IdentityScheme,
        app_user_id: &str,
    ) -> Result<u32, IdentityError> {
        if let Some(uid) = self.lookup(scheme, app_user_id)? {
            return Ok(uid);
        }

        let uid = self.allocate(scheme, app_user_id)?;
        self.store
            .set(&forward_key(scheme, app_user_id), &uid.to_string())?;
        self.store
            .set(&reverse_key(uid), &occupant(scheme, app_user_id))?;
        tracing::info!("Allocated UID {} for {} '{}'", uid, scheme, app_user_id);
        Ok(uid)
    }

    /// Return the persisted UID without creating one.
    /// Used to answer "is this signal mine?" without side effects.
    pub fn get_existing_uid(
        &self,
        scheme: IdentityScheme,
        app_user_id: &str,
    ) -> Result<u32, IdentityError> {
        self.lookup(scheme, app_user_id)?
            .ok_or(IdentityError::NotFound)
    }

    fn lookup(
        &self,
        scheme: IdentityScheme,
        app_user_id: &str,
    ) -> Result<Option<u32>, IdentityError> {
        match self.store.get(&forward_key(scheme, app_user_id))? {
            Some(raw) => raw
                .parse::<u32>()
                .map(Some)
                .map_err(|_| IdentityError::Store(crate::error::StoreError::Corrupt(format!(
                    "UID entry for '{}' is not numeric: {:?}",
                    app_user_id, raw
                )))),
            None => Ok(None),
        }
    }

    /// Derive a UID inside the scheme's band. The starting offset is a
    /// stable hash of the user id; collisions with a different persisted
    /// occupant linear-probe to the next free slot.
    fn allocate(
        &self,
        scheme: IdentityScheme,
        app_user_id: &str,
    ) -> Result<u32, IdentityError> {
        let base = scheme.band_base();
        let start = (fnv1a(app_user_id.as_bytes()) % BAND_SPAN as u64) as u32;
        let me = occupant(scheme, app_user_id);

        for probe in 0..MAX_PROBES {
            let uid = base + (start + probe) % BAND_SPAN;
            match self.store.get(&reverse_key(uid))? {
                None => return Ok(uid),
                Some(existing) if existing == me => return Ok(uid),
                Some(_) => continue,
            }
        }

        Err(IdentityError::BandExhausted(scheme.as_str().to_string()))
    }
}

fn forward_key(scheme: IdentityScheme, app_user_id: &str) -> String {
    format!("identity/{}/{}", scheme, app_user_id)
}

fn reverse_key(uid: u32) -> String {
    format!("identity/uid/{}", uid)
}

fn occupant(scheme: IdentityScheme, app_user_id: &str) -> String {
    format!("{}/{}", scheme, app_user_id)
}

/// FNV-1a, 64-bit. Stable across builds, unlike the std hasher.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
