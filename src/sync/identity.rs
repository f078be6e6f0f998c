//! Client identity and document identity.

use std::fmt;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use percent_encoding::percent_decode_str;

/// Opaque per-session writer id, used for echo suppression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity(Arc<str>);

impl ClientIdentity {
    /// Fresh identity, unique within and across processes.
    pub fn generate() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();

        let mut hasher = blake3::Hasher::new();
        hasher.update(&nanos.to_le_bytes());
        hasher.update(&std::process::id().to_le_bytes());
        hasher.update(&COUNTER.fetch_add(1, Ordering::Relaxed).to_le_bytes());
        let hash = hasher.finalize();

        Self(Arc::from(&hex::encode(hash.as_bytes())[..16]))
    }

    /// Identity of this process, generated on first use.
    pub fn session() -> &'static ClientIdentity {
        static SESSION: OnceLock<ClientIdentity> = OnceLock::new();
        SESSION.get_or_init(Self::generate)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClientIdentity {
    fn from(id: &str) -> Self {
        Self(Arc::from(id))
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Document identity for a URL path.
///
/// `/` → `index`, `/docs/` → `docs/index`, `/docs/page.html` → `docs/page`.
/// Query and fragment are ignored; percent-encoding is decoded.
pub fn document_id(url_path: &str) -> String {
    let path = url_path.split(['?', '#']).next().unwrap_or_default();
    let decoded = percent_decode_str(path)
        .decode_utf8()
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| path.to_string());

    let trimmed = decoded.trim().trim_start_matches('/');
    let id = if trimmed.is_empty() {
        "index".to_string()
    } else if trimmed.ends_with('/') {
        format!("{trimmed}index")
    } else {
        trimmed.to_string()
    };

    match id.strip_suffix(".html") {
        Some(stem) if !stem.is_empty() && !stem.ends_with('/') => stem.to_string(),
        _ => id,
    }
}
