use anyhow::{Context, Result, anyhow};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

/// What a cache key is isolated by, beyond the request content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheScope {
    /// Content, language, models and endpoint. Survives credential rotation.
    #[default]
    Endpoint,
    /// Also mixes in a digest of the API credential.
    Credential,
}

impl FromStr for CacheScope {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "endpoint" => Ok(CacheScope::Endpoint),
            "credential" => Ok(CacheScope::Credential),
            other => Err(anyhow!(
                "invalid cache scope '{}' (expected endpoint or credential)",
                other
            )),
        }
    }
}

/// The cacheable parts of one translation request.
#[derive(Debug, Clone, Copy)]
pub struct TranslationUnit<'a> {
    pub text: &'a str,
    pub target_lang: &'a str,
    pub model: &'a str,
    pub backup_model: &'a str,
    pub endpoint: &'a str,
    pub credential: &'a str,
}

pub fn fingerprint(unit: &TranslationUnit<'_>, scope: CacheScope) -> String {
    let credential = match scope {
        CacheScope::Endpoint => String::new(),
        CacheScope::Credential => format!("{:x}", md5::compute(unit.credential.as_bytes())),
    };
    let joined = [
        unit.text,
        unit.target_lang,
        unit.model,
        unit.backup_model,
        unit.endpoint,
        credential.as_str(),
    ]
    .join("\u{1f}");
    format!("{:x}", md5::compute(joined.as_bytes()))
}

/// Append-only translation memo. The first write for a fingerprint wins.
pub trait CacheStore: Send + Sync {
    fn get(&self, fingerprint: &str) -> Result<Option<String>>;
    fn put(&self, fingerprint: &str, translated: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, fingerprint: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("memory cache lock poisoned"))?;
        Ok(entries.get(fingerprint).cloned())
    }

    fn put(&self, fingerprint: &str, translated: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("memory cache lock poisoned"))?;
        entries
            .entry(fingerprint.to_string())
            .or_insert_with(|| translated.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SqliteCache {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCache {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create cache dir {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open cache db {}", path.display()))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS translation_cache (
                fingerprint TEXT PRIMARY KEY,
                translated_text TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );",
        )
        .with_context(|| "failed to create translation_cache table")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

impl CacheStore for SqliteCache {
    fn get(&self, fingerprint: &str) -> Result<Option<String>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("cache connection lock poisoned"))?;
        conn.query_row(
            "SELECT translated_text FROM translation_cache WHERE fingerprint = ?1",
            params![fingerprint],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| "failed to read translation cache")
    }

    fn put(&self, fingerprint: &str, translated: &str) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("cache connection lock poisoned"))?;
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        conn.execute(
            "INSERT OR IGNORE INTO translation_cache (fingerprint, translated_text, created_at) VALUES (?1, ?2, ?3)",
            params![fingerprint, translated, now],
        )
        .with_context(|| "failed to write translation cache")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit<'a>(text: &'a str, credential: &'a str) -> TranslationUnit<'a> {
        TranslationUnit {
            text,
            target_lang: "en",
            model: "gpt-4o-mini",
            backup_model: "",
            endpoint: "https://api.openai.com/v1",
            credential,
        }
    }

    #[test]
    fn endpoint_scope_ignores_credential() {
        let a = fingerprint(&unit("Hi", "sk-one"), CacheScope::Endpoint);
        let b = fingerprint(&unit("Hi", "sk-two"), CacheScope::Endpoint);
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert_ne!(a, fingerprint(&unit("Hello", "sk-one"), CacheScope::Endpoint));
    }

    #[test]
    fn credential_scope_isolates_accounts() {
        let a = fingerprint(&unit("Hi", "sk-one"), CacheScope::Credential);
        let b = fingerprint(&unit("Hi", "sk-two"), CacheScope::Credential);
        assert_ne!(a, b);
        assert_ne!(a, fingerprint(&unit("Hi", "sk-one"), CacheScope::Endpoint));
    }

    #[test]
    fn scope_parses_case_insensitively() {
        assert_eq!("Credential".parse::<CacheScope>().expect("scope"), CacheScope::Credential);
        let err = "tenant".parse::<CacheScope>().expect_err("invalid");
        assert!(err.to_string().contains("tenant"));
    }

    #[test]
    fn first_write_wins_in_memory() {
        let cache = MemoryCache::new();
        cache.put("fp", "Hola").expect("put");
        cache.put("fp", "Buenas").expect("put");
        assert_eq!(cache.get("fp").expect("get").as_deref(), Some("Hola"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn sqlite_cache_persists_across_handles() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("cache.sqlite");
        {
            let cache = SqliteCache::open(&path).expect("open");
            assert_eq!(cache.get("fp").expect("get"), None);
            cache.put("fp", "Hola").expect("put");
            cache.put("fp", "Buenas").expect("put");
        }
        let cache = SqliteCache::open(&path).expect("reopen");
        assert_eq!(cache.get("fp").expect("get").as_deref(), Some("Hola"));
    }
}
