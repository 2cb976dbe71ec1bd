//! Runtime tunables, read from `ASKDOC_*` environment variables.

use std::{str::FromStr, time::Duration};

use crate::{
    embedding_cache::{CacheOptions, DEFAULT_BATCH_SIZE},
    error::{Error, Result},
    model_manager::{DEFAULT_DIMENSION, DEFAULT_MODEL_ID},
    retrieval::{
        DEFAULT_TOP_K_LEXICAL,
        DEFAULT_TOP_K_VECTOR,
        DEFAULT_TOP_N,
        RerankPolicy,
        RetrieveParams,
    },
    vector_index::Metric,
};

/// Which [`Embedder`](crate::embedding::Embedder) backs the indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum EmbedderKind {
    /// Mean-pooled ColBERT token embeddings.
    #[default]
    Colbert,
    /// Feature-hashed bag of words. No model download.
    Hashing,
}

impl FromStr for EmbedderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "colbert" => Ok(EmbedderKind::Colbert),
            "hashing" => Ok(EmbedderKind::Hashing),
            other => Err(Error::Config(format!("unknown embedder: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub model_id: String,
    pub embedder: EmbedderKind,
    pub embed_dim: usize,
    pub batch_size: usize,
    pub cache_ttl: Option<Duration>,
    pub top_k_lexical: usize,
    pub top_k_vector: usize,
    pub top_n: usize,
    pub metric: Metric,
    pub rerank_policy: RerankPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            embedder: EmbedderKind::default(),
            embed_dim: DEFAULT_DIMENSION,
            batch_size: DEFAULT_BATCH_SIZE,
            cache_ttl: None,
            top_k_lexical: DEFAULT_TOP_K_LEXICAL,
            top_k_vector: DEFAULT_TOP_K_VECTOR,
            top_n: DEFAULT_TOP_N,
            metric: Metric::default(),
            rerank_policy: RerankPolicy::default(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable lookup. Unset or blank
    /// variables keep their defaults.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut settings = Self::default();

        if let Some(model) = get("ASKDOC_MODEL") {
            settings.model_id = model.trim().to_string();
        }
        if let Some(kind) = get("ASKDOC_EMBEDDER") {
            settings.embedder = kind.parse()?;
        }
        if let Some(dim) = get("ASKDOC_EMBED_DIM") {
            settings.embed_dim = parse_positive("ASKDOC_EMBED_DIM", &dim)?;
        }
        if let Some(size) = get("ASKDOC_EMBED_BATCH_SIZE") {
            settings.batch_size =
                parse_positive("ASKDOC_EMBED_BATCH_SIZE", &size)?;
        }
        if let Some(ttl) = get("ASKDOC_CACHE_TTL") {
            let secs: u64 = parse("ASKDOC_CACHE_TTL", &ttl)?;
            settings.cache_ttl = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(k) = get("ASKDOC_TOP_K_LEXICAL") {
            settings.top_k_lexical = parse("ASKDOC_TOP_K_LEXICAL", &k)?;
        }
        if let Some(k) = get("ASKDOC_TOP_K_VECTOR") {
            settings.top_k_vector = parse("ASKDOC_TOP_K_VECTOR", &k)?;
        }
        if let Some(n) = get("ASKDOC_TOP_N") {
            settings.top_n = parse("ASKDOC_TOP_N", &n)?;
        }
        if let Some(metric) = get("ASKDOC_VECTOR_METRIC") {
            settings.metric = metric.parse()?;
        }
        if let Some(policy) = get("ASKDOC_RERANK_POLICY") {
            settings.rerank_policy = policy.parse()?;
        }

        Ok(settings)
    }

    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            batch_size: self.batch_size,
            ttl: self.cache_ttl,
        }
    }

    pub fn retrieve_params(&self, rerank: bool) -> RetrieveParams {
        RetrieveParams {
            top_k_lexical: self.top_k_lexical,
            top_k_vector: self.top_k_vector,
            top_n: self.top_n,
            rerank,
        }
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        Error::Config(format!("{key}: invalid value {value:?}"))
    })
}

fn parse_positive(key: &str, value: &str) -> Result<usize> {
    match parse::<usize>(key, value)? {
        0 => Err(Error::Config(format!("{key}: must be greater than zero"))),
        n => Ok(n),
    }
}
