//! Read-through caches for credentials and tenant branding.
//!
//! Both sit on a TTL cache with per-key single-flight: concurrent demand for
//! a missing key collapses to one fetch; a fetch that finds nothing caches a
//! negative entry for the (shorter) negative TTL.

pub mod branding;

pub use branding::{BrandingCache, IdentityClient};

use courier_core::{Channel, CoreError, Credential, TenantId};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::ChannelDefaults;
use crate::store::CredentialStore;
use courier_core::credential::secret_keys;

struct Entry<V> {
  /// None marks a negative entry
  value: Option<Arc<V>>,
  expires_at: Instant,
}

pub struct TtlCache<K, V> {
  entries: DashMap<K, Entry<V>>,
  flights: DashMap<K, Arc<Mutex<()>>>,
  positive_ttl: Duration,
  negative_ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
  K: Eq + Hash + Clone,
{
  pub fn new(positive_ttl: Duration, negative_ttl: Duration) -> Self {
    Self {
      entries: DashMap::new(),
      flights: DashMap::new(),
      positive_ttl,
      negative_ttl,
    }
  }

  fn fresh(&self, key: &K) -> Option<Option<Arc<V>>> {
    self.entries.get(key).and_then(|entry| {
      if entry.expires_at > Instant::now() {
        Some(entry.value.clone())
      } else {
        None
      }
    })
  }

  fn store(&self, key: K, value: Option<Arc<V>>) {
    let ttl = if value.is_some() {
      self.positive_ttl
    } else {
      self.negative_ttl
    };
    self.entries.insert(
      key,
      Entry {
        value,
        expires_at: Instant::now() + ttl,
      },
    );
  }

  /// Force a negative entry, regardless of what is cached
  pub fn poison(&self, key: K) {
    self.entries.insert(
      key,
      Entry {
        value: None,
        expires_at: Instant::now() + self.negative_ttl,
      },
    );
  }

  pub fn invalidate(&self, key: &K) {
    self.entries.remove(key);
  }

  /// Read through the cache. `fetch` runs at most once per key at a time;
  /// `Ok(None)` results are cached negatively for the negative TTL.
  pub async fn get_or_fetch<F, Fut>(&self, key: K, fetch: F) -> Result<Option<Arc<V>>, CoreError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Option<V>, CoreError>>,
  {
    if let Some(cached) = self.fresh(&key) {
      return Ok(cached);
    }

    let flight = self
      .flights
      .entry(key.clone())
      .or_insert_with(|| Arc::new(Mutex::new(())))
      .clone();
    let _guard = flight.lock().await;

    // Another flight may have landed while we waited for the lock
    if let Some(cached) = self.fresh(&key) {
      return Ok(cached);
    }

    let fetched = fetch().await?.map(Arc::new);
    self.store(key.clone(), fetched.clone());
    self.flights.remove(&key);
    Ok(fetched)
  }
}

/// Read-through credential cache with the priority-resolution contract:
/// active custom credential (no fallback), else auto-generated, else
/// synthesize from the configured defaults and persist.
pub struct CredentialCache {
  cache: TtlCache<(TenantId, Channel), Credential>,
  store: Arc<dyn CredentialStore>,
  defaults: ChannelDefaults,
  /// Consecutive AUTH_ERROR counts per pair for the optional breaker
  auth_failures: DashMap<(TenantId, Channel), u32>,
  auth_failure_threshold: u32,
}

impl CredentialCache {
  pub fn new(
    store: Arc<dyn CredentialStore>,
    defaults: ChannelDefaults,
    positive_ttl: Duration,
    negative_ttl: Duration,
    auth_failure_threshold: u32,
  ) -> Self {
    Self {
      cache: TtlCache::new(positive_ttl, negative_ttl),
      store,
      defaults,
      auth_failures: DashMap::new(),
      auth_failure_threshold,
    }
  }

  /// Resolve the credential to send with for `(tenant, channel)`.
  pub async fn resolve(
    &self,
    tenant_id: &TenantId,
    channel: Channel,
  ) -> Result<Option<Arc<Credential>>, CoreError> {
    let key = (tenant_id.clone(), channel);
    let store = self.store.clone();
    let defaults = self.defaults.clone();
    let tenant = tenant_id.clone();

    self
      .cache
      .get_or_fetch(key, move || async move {
        if let Some(credential) = store.active(&tenant, channel).await? {
          return Ok(Some(credential));
        }

        // No credential yet: synthesize an auto-generated one from the
        // global defaults and persist it for the tenant
        match synthesize_secrets(&defaults, channel) {
          Some(secrets) => {
            info!(tenant = %tenant, channel = %channel, "provisioning default credential");
            Ok(Some(store.create(&tenant, channel, secrets, false).await?))
          }
          None => Ok(None),
        }
      })
      .await
  }

  /// Record a provider AUTH_ERROR. With the breaker enabled, the K-th
  /// consecutive failure poisons the cached entry for the negative TTL so
  /// workers stop hammering the provider. Custom credentials still never
  /// fall back to defaults.
  pub fn record_auth_failure(&self, tenant_id: &TenantId, channel: Channel) {
    if self.auth_failure_threshold == 0 {
      return;
    }

    let key = (tenant_id.clone(), channel);
    let mut failures = self.auth_failures.entry(key.clone()).or_insert(0);
    *failures += 1;

    if *failures >= self.auth_failure_threshold {
      warn!(
        tenant = %tenant_id,
        channel = %channel,
        failures = *failures,
        "credential breaker tripped; poisoning cached credential"
      );
      self.cache.poison(key.clone());
      *failures = 0;
    }
  }

  pub fn record_auth_success(&self, tenant_id: &TenantId, channel: Channel) {
    self.auth_failures.remove(&(tenant_id.clone(), channel));
  }

  /// Called by the admin surface contract when a credential is replaced
  pub fn invalidate(&self, tenant_id: &TenantId, channel: Channel) {
    self.cache.invalidate(&(tenant_id.clone(), channel));
  }
}

fn synthesize_secrets(defaults: &ChannelDefaults, channel: Channel) -> Option<BTreeMap<String, String>> {
  let mut secrets = BTreeMap::new();

  match channel {
    Channel::Email => {
      let smtp = defaults.smtp.as_ref()?;
      secrets.insert(secret_keys::SMTP_HOST.into(), smtp.host.clone());
      secrets.insert(secret_keys::SMTP_PORT.into(), smtp.port.to_string());
      secrets.insert(secret_keys::SMTP_USERNAME.into(), smtp.username.clone());
      secrets.insert(secret_keys::SMTP_PASSWORD.into(), smtp.password.clone());
      secrets.insert(secret_keys::SMTP_FROM.into(), smtp.from.clone());
      secrets.insert(secret_keys::SMTP_USE_TLS.into(), smtp.use_tls.to_string());
    }
    Channel::Sms => {
      let sms = defaults.sms.as_ref()?;
      secrets.insert(secret_keys::SMS_ACCOUNT_SID.into(), sms.account_sid.clone());
      secrets.insert(secret_keys::SMS_AUTH_TOKEN.into(), sms.auth_token.clone());
      secrets.insert(secret_keys::SMS_FROM_NUMBER.into(), sms.from_number.clone());
      secrets.insert("api_base".into(), sms.api_base.clone());
    }
    Channel::Push => {
      let fcm = defaults.fcm.as_ref()?;
      secrets.insert(secret_keys::FCM_PROJECT_ID.into(), fcm.project_id.clone());
      secrets.insert(
        secret_keys::FCM_SERVICE_ACCOUNT.into(),
        fcm.service_account_json.clone(),
      );
    }
    // In-app delivery needs no provider secrets
    Channel::InApp => {}
  }

  Some(secrets)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::MemoryCredentialStore;
  use std::sync::atomic::{AtomicU32, Ordering};

  #[tokio::test]
  async fn test_single_flight_collapses_fetches() {
    let cache: Arc<TtlCache<String, String>> = Arc::new(TtlCache::new(
      Duration::from_secs(300),
      Duration::from_secs(30),
    ));
    let fetches = Arc::new(AtomicU32::new(0));

    let mut handles = Vec::new();
    for _ in 0..8 {
      let cache = cache.clone();
      let fetches = fetches.clone();
      handles.push(tokio::spawn(async move {
        cache
          .get_or_fetch("k".to_string(), move || async move {
            fetches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(Some("v".to_string()))
          })
          .await
          .unwrap()
      }));
    }

    for handle in handles {
      assert_eq!(handle.await.unwrap().unwrap().as_str(), "v");
    }
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_negative_entry_expires_after_negative_ttl() {
    let cache: TtlCache<String, String> =
      TtlCache::new(Duration::from_secs(300), Duration::from_secs(30));

    let miss = cache
      .get_or_fetch("k".to_string(), || async { Ok(None) })
      .await
      .unwrap();
    assert!(miss.is_none());

    // Still within the negative TTL: the fetcher must not run again
    let cached = cache
      .get_or_fetch("k".to_string(), || async {
        panic!("fetch must not run while the negative entry is fresh")
      })
      .await
      .unwrap();
    assert!(cached.is_none());

    tokio::time::advance(Duration::from_secs(31)).await;

    let refetched = cache
      .get_or_fetch("k".to_string(), || async { Ok(Some("v".to_string())) })
      .await
      .unwrap();
    assert_eq!(refetched.unwrap().as_str(), "v");
  }

  #[tokio::test]
  async fn test_credential_synthesis_persists_auto_generated() {
    let store = Arc::new(MemoryCredentialStore::new());
    let defaults = ChannelDefaults {
      smtp: Some(crate::config::SmtpDefaults {
        host: "smtp.test".into(),
        port: 587,
        username: "sys".into(),
        password: "pw".into(),
        from: "noreply@test".into(),
        use_tls: true,
      }),
      sms: None,
      fcm: None,
    };
    let cache = CredentialCache::new(
      store.clone(),
      defaults,
      Duration::from_secs(300),
      Duration::from_secs(30),
      0,
    );

    let tenant = TenantId::new("t1");
    let credential = cache.resolve(&tenant, Channel::Email).await.unwrap().unwrap();
    assert!(!credential.custom);
    assert_eq!(credential.secret(secret_keys::SMTP_HOST), Some("smtp.test"));

    // Persisted as the tenant's auto-generated credential
    assert_eq!(store.active_count(&tenant, Channel::Email), 1);

    // No SMS defaults configured: negative resolution
    assert!(cache.resolve(&tenant, Channel::Sms).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_breaker_poisons_after_threshold() {
    let store = Arc::new(MemoryCredentialStore::new());
    let tenant = TenantId::new("t1");
    let mut secrets = BTreeMap::new();
    secrets.insert(secret_keys::SMS_ACCOUNT_SID.to_string(), "AC1".to_string());
    store
      .create(&tenant, Channel::Sms, secrets, true)
      .await
      .unwrap();

    let cache = CredentialCache::new(
      store,
      ChannelDefaults::default(),
      Duration::from_secs(300),
      Duration::from_secs(30),
      2,
    );

    assert!(cache.resolve(&tenant, Channel::Sms).await.unwrap().is_some());

    cache.record_auth_failure(&tenant, Channel::Sms);
    assert!(cache.resolve(&tenant, Channel::Sms).await.unwrap().is_some());

    cache.record_auth_failure(&tenant, Channel::Sms);
    // Breaker tripped: resolution is negative for the negative TTL, and the
    // custom credential never falls back to defaults
    assert!(cache.resolve(&tenant, Channel::Sms).await.unwrap().is_none());
  }
}
