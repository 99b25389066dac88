//! Explicit service lifecycle around a swappable lookup snapshot.
//!
//! `KeysService::initialize` reads the reference data once; after that every
//! request works on an immutable [`LookupSnapshot`]. A reload builds a new
//! snapshot off the request path and swaps it in atomically, so in-flight
//! batches finish on the snapshot they started with.

use crate::config::Config;
use crate::errors::{KeysError, LookupError, ResolveError};
use crate::lookup::{KeysLookup, LookupConfiguration, LookupSnapshot};
use crate::models::{BatchSummary, ModelInfo, RawLocation};
use crate::reference_data::load_model;
use crate::resolution_cache::ResolutionCache;
use crate::resolver::{BatchResolver, ResolvedBatch, ResolverSettings};
use crate::transcoding::{decode_locations, encode_results, Format};
use arc_swap::ArcSwap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Where the reference data of the running model lives.
#[derive(Debug, Clone)]
pub struct ModelSource {
    pub keys_data_path: PathBuf,
    pub lookup_config_file: PathBuf,
}

pub struct KeysService {
    snapshot: ArcSwap<LookupSnapshot>,
    resolver: BatchResolver,
    source: Option<ModelSource>,
    generation: AtomicU64,
    reload_lock: tokio::sync::Mutex<()>,
}

impl KeysService {
    /// Loads the reference data named by `config` and builds the resolver.
    pub fn initialize(config: &Config) -> Result<Self, LookupError> {
        let source = ModelSource {
            keys_data_path: config.keys_data_path.clone(),
            lookup_config_file: config.lookup_config_file.clone(),
        };
        let loaded = load_model(&source.keys_data_path, &source.lookup_config_file)?;
        tracing::info!(
            "✓ Reference data loaded for {} ({} area entries, {} vulnerability keys)",
            loaded.config.model,
            loaded.lookup.tables().area_count(),
            loaded.lookup.tables().vulnerability_count()
        );

        let mut service = Self::with_lookup(
            loaded.config,
            Arc::new(loaded.lookup),
            config.resolver_settings(),
        );
        if let Some(cache) = config.result_cache() {
            tracing::info!(
                "Result cache initialized ({}s TTL, {} capacity)",
                config.result_cache_ttl.as_secs(),
                config.result_cache_capacity
            );
            service = service.with_result_cache(cache);
        }
        service.source = Some(source);
        Ok(service)
    }

    /// Builds a service around an already constructed lookup. Such a service
    /// has no reference data source and cannot be reloaded.
    pub fn with_lookup(
        config: LookupConfiguration,
        lookup: Arc<dyn KeysLookup>,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(LookupSnapshot::new(config, lookup, 1)),
            resolver: BatchResolver::new(settings),
            source: None,
            generation: AtomicU64::new(1),
            reload_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_result_cache(mut self, cache: ResolutionCache) -> Self {
        self.resolver = self.resolver.with_cache(cache);
        self
    }

    /// The snapshot new requests resolve against.
    pub fn snapshot(&self) -> Arc<LookupSnapshot> {
        self.snapshot.load_full()
    }

    pub fn model(&self) -> ModelInfo {
        self.snapshot.load().config.model.clone()
    }

    pub fn resolver(&self) -> &BatchResolver {
        &self.resolver
    }

    /// Re-reads the reference data and swaps the snapshot in.
    ///
    /// The model identity may not change: routes are mounted under it.
    pub async fn reload(&self) -> Result<Arc<LookupSnapshot>, LookupError> {
        let source = self.source.clone().ok_or_else(|| {
            LookupError::InvalidConfiguration(
                "service has no reference data source to reload from".to_string(),
            )
        })?;

        let _guard = self.reload_lock.lock().await;
        tracing::info!(
            "Reloading reference data from {}",
            source.keys_data_path.display()
        );

        let loaded = tokio::task::spawn_blocking(move || {
            load_model(&source.keys_data_path, &source.lookup_config_file)
        })
        .await
        .map_err(|e| LookupError::Internal(format!("reload task failed: {}", e)))??;

        let current = self.model();
        if loaded.config.model != current {
            return Err(LookupError::InvalidConfiguration(format!(
                "reload would change the served model from {} to {}",
                current, loaded.config.model
            )));
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = Arc::new(LookupSnapshot::new(
            loaded.config,
            Arc::new(loaded.lookup),
            generation,
        ));
        self.snapshot.store(snapshot.clone());
        if let Some(cache) = self.resolver.cache() {
            cache.invalidate_all();
        }

        tracing::info!("✓ Reference data reloaded (generation {})", generation);
        Ok(snapshot)
    }

    /// Liveness check. Only touches reference data when `probe` is set.
    pub fn health(&self, probe: bool) -> Result<(), LookupError> {
        if !probe {
            return Ok(());
        }
        let snapshot = self.snapshot.load();
        snapshot.lookup.probe(&snapshot.config)
    }

    pub async fn resolve(&self, raw: Vec<RawLocation>) -> Result<ResolvedBatch, ResolveError> {
        let snapshot = self.snapshot();
        self.resolver.run(raw, &snapshot).await
    }

    /// Decodes a payload, resolves it and encodes the rows.
    pub async fn get_keys(
        &self,
        payload: &[u8],
        input: Format,
        output: Format,
    ) -> Result<(Vec<u8>, BatchSummary), KeysError> {
        let raw = decode_locations(payload, input)?;
        let batch = self.resolve(raw).await?;
        let body = encode_results(&batch.results, output)?;
        Ok((body, batch.summary))
    }
}
