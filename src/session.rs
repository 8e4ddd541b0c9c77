//! Cache of named decode sessions.
//!
//! A session is identified by a file path plus a caller-chosen id, so two
//! callers reading the same file with different ids get independent frame
//! sources. The registry is an ordinary owned value; an application keeps one
//! in its context and tests build as many isolated registries as they like.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use vf_av::{CancelScope, DecoderLauncher, FfmpegLauncher, FfprobeProber, FrameSource, Prober};
use vf_core::config::Config;
use vf_core::VideoMetadata;

/// Key identifying one session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub path: PathBuf,
    pub id: String,
}

impl SessionKey {
    pub fn new(path: impl Into<PathBuf>, id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            id: id.into(),
        }
    }
}

/// Maps (path, id) pairs to reusable frame sources.
pub struct SessionRegistry<P: Prober = FfprobeProber, L: DecoderLauncher = FfmpegLauncher> {
    prober: P,
    launcher: Arc<L>,
    scope: Option<CancelScope>,
    sessions: HashMap<SessionKey, FrameSource<L>>,
}

impl SessionRegistry {
    /// Build a registry backed by ffprobe and ffmpeg whose sessions stop
    /// when `scope` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`vf_core::Error::ToolMissing`] if either tool is absent.
    pub fn from_config(config: &Config, scope: CancelScope) -> vf_core::Result<Self> {
        let tools = vf_av::ToolRegistry::discover(&config.tools);
        tools.require_all()?;
        let launcher = FfmpegLauncher::new(&tools, &config.decoder)?;
        let prober = FfprobeProber::new(tools, &config.decoder);
        Ok(Self::new(prober, Arc::new(launcher)).with_scope(scope))
    }
}

impl<P: Prober, L: DecoderLauncher> SessionRegistry<P, L> {
    pub fn new(prober: P, launcher: Arc<L>) -> Self {
        Self {
            prober,
            launcher,
            scope: None,
            sessions: HashMap::new(),
        }
    }

    /// Builder: attach new sessions to `scope` so an interrupt stops them.
    pub fn with_scope(mut self, scope: CancelScope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Return the session for `(path, id)`, positioned at the first frame.
    ///
    /// On a hit the cached source is reset (its decoder, if running, is
    /// closed) while keeping the probed metadata and frame buffer. On a miss
    /// the file is probed and a new source is cached.
    ///
    /// # Errors
    ///
    /// Propagates probe failures; nothing is cached in that case.
    pub fn session(
        &mut self,
        path: impl AsRef<Path>,
        id: &str,
    ) -> vf_core::Result<&mut FrameSource<L>> {
        let key = SessionKey::new(path.as_ref(), id);

        match self.sessions.entry(key) {
            Entry::Occupied(entry) => {
                tracing::debug!(
                    path = %entry.key().path.display(),
                    id = %entry.key().id,
                    "Reusing cached session"
                );
                let source = entry.into_mut();
                source.reset();
                Ok(source)
            }
            Entry::Vacant(entry) => {
                let metadata = self.prober.probe(&entry.key().path)?;
                tracing::debug!(
                    path = %entry.key().path.display(),
                    id = %entry.key().id,
                    prober = self.prober.name(),
                    "Created session"
                );
                let mut source = FrameSource::new(Arc::new(metadata), Arc::clone(&self.launcher));
                if let Some(scope) = &self.scope {
                    source = source.with_scope(scope.clone());
                }
                Ok(entry.insert(source))
            }
        }
    }

    /// Metadata of a cached session, without touching its position.
    pub fn metadata(&self, path: impl AsRef<Path>, id: &str) -> Option<&VideoMetadata> {
        self.sessions
            .get(&SessionKey::new(path.as_ref(), id))
            .map(FrameSource::metadata)
    }

    /// Drop a session from the cache, returning it to the caller.
    pub fn remove(&mut self, path: impl AsRef<Path>, id: &str) -> Option<FrameSource<L>> {
        self.sessions.remove(&SessionKey::new(path.as_ref(), id))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Close every session's decoder. Sessions stay cached.
    pub fn close_all(&mut self) {
        for source in self.sessions.values_mut() {
            source.close();
        }
        tracing::debug!("Closed {} sessions", self.sessions.len());
    }
}

impl<P: Prober, L: DecoderLauncher> std::fmt::Debug for SessionRegistry<P, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("prober", &self.prober.name())
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}
