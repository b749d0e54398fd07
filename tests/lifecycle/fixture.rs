use std::any::Any;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

use async_trait::async_trait;
use larder::{
    CancellationToken, Error, ManagerConfig, ModelHandle, ModelLoader, ModelManager, ModelParams,
    Result,
};
use tokio::sync::Semaphore;

/// Handle produced by [`MockLoader`]; counts its own releases.
pub(crate) struct MockHandle {
    pub(crate) name: String,
    pub(crate) params: ModelParams,
    releases: Arc<AtomicUsize>,
    release_threads: Arc<Mutex<Vec<ThreadId>>>,
    fail_release: bool,
}

impl ModelHandle for MockHandle {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn metadata(&self) -> HashMap<String, String> {
        HashMap::from([
            ("general.name".to_string(), self.name.clone()),
            ("general.architecture".to_string(), "llama".to_string()),
        ])
    }

    fn release(&mut self) -> Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.release_threads
            .lock()
            .unwrap()
            .push(std::thread::current().id());
        if self.fail_release {
            return Err(Error::load("device lost"));
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Loader double with load/release counters.
///
/// Intrinsic model name is `llama-<file stem>` unless a fixed name is set.
/// Files whose name contains `corrupt` fail to load. A gated loader blocks
/// until [`open_gate`](Self::open_gate) is called.
pub(crate) struct MockLoader {
    gated: bool,
    honor_cancel: bool,
    fixed_name: Option<String>,
    fail_release: bool,
    gate: Semaphore,
    started: Semaphore,
    loads: AtomicUsize,
    handles: Mutex<Vec<(String, Arc<AtomicUsize>)>>,
    release_threads: Arc<Mutex<Vec<ThreadId>>>,
    seen_params: Mutex<Vec<ModelParams>>,
}

impl Default for MockLoader {
    fn default() -> Self {
        Self {
            gated: false,
            honor_cancel: false,
            fixed_name: None,
            fail_release: false,
            gate: Semaphore::new(0),
            started: Semaphore::new(0),
            loads: AtomicUsize::new(0),
            handles: Mutex::new(Vec::new()),
            release_threads: Arc::new(Mutex::new(Vec::new())),
            seen_params: Mutex::new(Vec::new()),
        }
    }
}

impl MockLoader {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Block every load until the gate opens. `honor_cancel` makes the
    /// loader bail out with `Cancelled` when the token fires.
    pub(crate) fn gated(honor_cancel: bool) -> Self {
        Self {
            gated: true,
            honor_cancel,
            ..Self::default()
        }
    }

    pub(crate) fn with_fixed_name(mut self, name: &str) -> Self {
        self.fixed_name = Some(name.to_string());
        self
    }

    pub(crate) fn with_failing_release(mut self) -> Self {
        self.fail_release = true;
        self
    }

    pub(crate) fn open_gate(&self, loads: usize) {
        self.gate.add_permits(loads);
    }

    /// Wait until `count` loads have entered the loader.
    pub(crate) async fn wait_started(&self, count: u32) {
        self.started
            .acquire_many(count)
            .await
            .expect("started semaphore closed")
            .forget();
    }

    pub(crate) fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Release count of every handle produced so far, in creation order.
    pub(crate) fn release_counts(&self) -> Vec<usize> {
        self.handles
            .lock()
            .unwrap()
            .iter()
            .map(|(_, releases)| releases.load(Ordering::SeqCst))
            .collect()
    }

    /// Thread each release ran on, in release order.
    pub(crate) fn release_threads(&self) -> Vec<ThreadId> {
        self.release_threads.lock().unwrap().clone()
    }

    pub(crate) fn handle_count(&self) -> usize {
        self.handles.lock().unwrap().len()
    }

    pub(crate) fn last_params(&self) -> Option<ModelParams> {
        self.seen_params.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ModelLoader for MockLoader {
    async fn load(
        &self,
        params: &ModelParams,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn ModelHandle>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.seen_params.lock().unwrap().push(params.clone());

        let stem = params
            .model_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        if stem.contains("corrupt") {
            return Err(Error::load("unsupported file magic"));
        }

        if self.gated {
            self.started.add_permits(1);
            if self.honor_cancel {
                tokio::select! {
                    permit = self.gate.acquire() => permit.expect("gate closed").forget(),
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                }
            } else {
                self.gate.acquire().await.expect("gate closed").forget();
            }
        }

        let name = self
            .fixed_name
            .clone()
            .unwrap_or_else(|| format!("llama-{}", stem));
        let releases = Arc::new(AtomicUsize::new(0));
        self.handles
            .lock()
            .unwrap()
            .push((name.clone(), Arc::clone(&releases)));

        Ok(Box::new(MockHandle {
            name,
            params: params.clone(),
            releases,
            release_threads: Arc::clone(&self.release_threads),
            fail_release: self.fail_release,
        }))
    }
}

pub(crate) struct Fixture {
    pub(crate) _root: tempfile::TempDir,
    pub(crate) models_dir: PathBuf,
    pub(crate) manager: Arc<ModelManager>,
    pub(crate) loader: Arc<MockLoader>,
}

impl Fixture {
    /// Path of a file inside the models directory.
    pub(crate) fn model(&self, file_name: &str) -> PathBuf {
        self.models_dir.join(file_name)
    }
}

pub(crate) fn write_file(dir: &Path, name: &str, size: usize) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, vec![0u8; size]).unwrap();
    path
}

/// `<tmp>/models` holding `a.gguf` (100 B), `b.gguf` (200 B), `c.gguf`
/// (300 B) and `notes.txt`, probed by a manager using `loader`.
pub(crate) fn fixture_with(loader: MockLoader) -> Fixture {
    let root = tempfile::tempdir().unwrap();
    let models_dir = std::fs::canonicalize(root.path()).unwrap().join("models");
    std::fs::create_dir(&models_dir).unwrap();

    write_file(&models_dir, "a.gguf", 100);
    write_file(&models_dir, "b.gguf", 200);
    write_file(&models_dir, "c.gguf", 300);
    write_file(&models_dir, "notes.txt", 10);

    let loader = Arc::new(loader);
    let config = ManagerConfig::with_directories([&models_dir]);
    let manager = ModelManager::new(config, Arc::clone(&loader) as Arc<dyn ModelLoader>)
        .expect("Failed to create manager");

    Fixture {
        _root: root,
        models_dir,
        manager: Arc::new(manager),
        loader,
    }
}

pub(crate) fn fixture() -> Fixture {
    fixture_with(MockLoader::new())
}
