//! Background fetching of raw asset bytes.
//!
//! Fetches complete on whatever thread the fetcher uses. Completions are
//! pushed into a [`CompletionQueue`], a lock-protected FIFO, and only the
//! main thread drains it (once per frame) and touches loader state.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

use crate::resources::{AssetId, AssetKind};

/// The host's background fetch subsystem.
pub trait Fetcher {
    /// Starts fetching `id`. Fire-and-forget: the result arrives through the
    /// completion queue the fetcher was built with.
    fn fetch(&mut self, id: &AssetId, kind: AssetKind, high_priority: bool);
}

#[derive(Clone, Debug, PartialEq)]
pub struct FetchCompletion {
    pub id: AssetId,
    pub bytes: Vec<u8>,
    pub success: bool,
}

#[derive(Clone, Debug, Default)]
pub struct CompletionQueue {
    inner: Arc<Mutex<VecDeque<FetchCompletion>>>,
}

impl CompletionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<FetchCompletion>> {
        // a producer that panicked mid-push can't leave the deque inconsistent
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, completion: FetchCompletion) {
        self.lock().push_back(completion);
    }

    pub fn drain(&self) -> Vec<FetchCompletion> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Serves assets from memory. Completions are queued immediately.
pub struct MemoryFetcher {
    assets: HashMap<AssetId, Vec<u8>>,
    queue: CompletionQueue,
}

impl MemoryFetcher {
    pub fn new(queue: CompletionQueue) -> Self {
        Self {
            assets: HashMap::new(),
            queue,
        }
    }

    pub fn with_asset(mut self, id: impl Into<AssetId>, bytes: impl Into<Vec<u8>>) -> Self {
        self.assets.insert(id.into(), bytes.into());
        self
    }
}

impl Fetcher for MemoryFetcher {
    fn fetch(&mut self, id: &AssetId, _kind: AssetKind, _high_priority: bool) {
        let completion = match self.assets.get(id) {
            Some(bytes) => FetchCompletion {
                id: id.clone(),
                bytes: bytes.clone(),
                success: true,
            },
            None => FetchCompletion {
                id: id.clone(),
                bytes: Vec::new(),
                success: false,
            },
        };
        self.queue.push(completion);
    }
}

/// Reads `<root>/<id>` from disk.
#[cfg(not(target_arch = "wasm32"))]
pub async fn load_binary(root: &std::path::Path, id: &AssetId) -> anyhow::Result<Vec<u8>> {
    let path = root.join(id.as_str());
    let data = tokio::fs::read(&path).await?;
    Ok(data)
}

/// Reads assets from a directory on a tokio runtime.
#[cfg(not(target_arch = "wasm32"))]
pub struct FsFetcher {
    root: std::path::PathBuf,
    handle: tokio::runtime::Handle,
    queue: CompletionQueue,
}

#[cfg(not(target_arch = "wasm32"))]
impl FsFetcher {
    pub fn new(
        root: impl Into<std::path::PathBuf>,
        handle: tokio::runtime::Handle,
        queue: CompletionQueue,
    ) -> Self {
        Self {
            root: root.into(),
            handle,
            queue,
        }
    }

    /// Loads many assets at once, blocking until all of them are read.
    pub fn fetch_all_blocking(&self, ids: &[AssetId]) -> Vec<FetchCompletion> {
        let root = self.root.clone();
        let fut = async move {
            futures::future::join_all(ids.iter().map(|id| {
                let root = root.clone();
                async move {
                    match load_binary(&root, id).await {
                        Ok(bytes) => FetchCompletion {
                            id: id.clone(),
                            bytes,
                            success: true,
                        },
                        Err(e) => {
                            log::warn!("failed to read asset {}: {}", id, e);
                            FetchCompletion {
                                id: id.clone(),
                                bytes: Vec::new(),
                                success: false,
                            }
                        }
                    }
                }
            }))
            .await
        };
        self.handle.block_on(fut)
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl Fetcher for FsFetcher {
    fn fetch(&mut self, id: &AssetId, kind: AssetKind, high_priority: bool) {
        let root = self.root.clone();
        let queue = self.queue.clone();
        let id = id.clone();
        log::debug!("fetching {} '{}' (high priority: {})", kind, id, high_priority);
        self.handle.spawn(async move {
            let completion = match load_binary(&root, &id).await {
                Ok(bytes) => FetchCompletion {
                    id,
                    bytes,
                    success: true,
                },
                Err(e) => {
                    log::warn!("failed to read asset {}: {}", id, e);
                    FetchCompletion {
                        id,
                        bytes: Vec::new(),
                        success: false,
                    }
                }
            };
            queue.push(completion);
        });
    }
}
