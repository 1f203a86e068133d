#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use runscript_orchestrator::delivery::DeliveryMode;
use runscript_orchestrator::generation::templates::{AssetRef, TemplateField};
use runscript_orchestrator::generation::{
    OrchestratorSettings, PollBudget, TemplateCatalog, TemplateDefinition,
};
use runscript_orchestrator::runscript::{
    JobCreated, JobSpec, RemoteJob, RenderingService, RunScriptError,
};
use runscript_orchestrator::storage::{ObjectStorage, StorageError};
use runscript_orchestrator::AppState;

pub const SIGNED_READ_PREFIX: &str = "https://storage.test/sign/";
pub const SIGNED_UPLOAD_PREFIX: &str = "https://storage.test/upload/";
pub const PUBLIC_BASE_URL: &str = "https://orchestrator.test";

/// One scripted answer to a status query.
#[derive(Debug, Clone)]
pub enum Scripted {
    Status(&'static str),
    StatusWithLog(&'static str, &'static str),
    Unreachable,
}

/// Mock of the rendering service. Status answers are served in order and the
/// last one repeats once the script runs out.
pub struct FakeRenderingService {
    job_id: String,
    script: Mutex<VecDeque<Scripted>>,
    last: Mutex<Scripted>,
    create_failure: Mutex<Option<(u16, String)>>,
    specs: Mutex<Vec<JobSpec>>,
    create_calls: AtomicUsize,
    status_calls: AtomicUsize,
    delivers_to: Option<Arc<MemoryStorage>>,
}

impl FakeRenderingService {
    pub fn new(job_id: &str, script: &[Scripted]) -> Self {
        Self {
            job_id: job_id.to_string(),
            script: Mutex::new(script.iter().cloned().collect()),
            last: Mutex::new(Scripted::Status("submitted")),
            create_failure: Mutex::new(None),
            specs: Mutex::new(Vec::new()),
            create_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            delivers_to: None,
        }
    }

    /// On a `complete` answer, write the output through the signed upload URL
    /// the job was given, the way the real service does in direct mode.
    pub fn delivering_to(mut self, storage: Arc<MemoryStorage>) -> Self {
        self.delivers_to = Some(storage);
        self
    }

    pub fn failing_create(self, status: u16, body: &str) -> Self {
        *self.create_failure.lock() = Some((status, body.to_string()));
        self
    }

    pub fn rescript(&self, script: &[Scripted]) {
        *self.script.lock() = script.iter().cloned().collect();
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn specs(&self) -> Vec<JobSpec> {
        self.specs.lock().clone()
    }

    pub fn last_output_href(&self) -> Option<String> {
        self.specs
            .lock()
            .last()
            .and_then(|spec| spec.outputs.first())
            .map(|output| output.destination_ref.clone())
    }

    fn next_answer(&self) -> Scripted {
        let mut script = self.script.lock();
        match script.pop_front() {
            Some(answer) => {
                *self.last.lock() = answer.clone();
                answer
            }
            None => self.last.lock().clone(),
        }
    }

    fn remote_job(&self, status: &str, log: Option<&str>) -> RemoteJob {
        let raw = serde_json::json!({
            "_id": self.job_id,
            "status": status,
            "log": log,
        });
        serde_json::from_value(raw).expect("scripted job should deserialize")
    }

    async fn deliver_output(&self) {
        let Some(storage) = &self.delivers_to else {
            return;
        };
        if let Some(key) = self
            .last_output_href()
            .and_then(|href| href.strip_prefix(SIGNED_UPLOAD_PREFIX).map(str::to_string))
        {
            storage.insert(&key, b"%PDF-1.7 rendered");
        }
    }
}

#[async_trait::async_trait]
impl RenderingService for FakeRenderingService {
    async fn create_job(&self, spec: &JobSpec) -> Result<JobCreated, RunScriptError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.specs.lock().push(spec.clone());

        if let Some((status, body)) = self.create_failure.lock().clone() {
            return Err(RunScriptError::Api { status, body });
        }
        let raw = serde_json::json!({ "_id": self.job_id });
        Ok(serde_json::from_value(raw).expect("created job should deserialize"))
    }

    async fn get_job(&self, _job_id: &str) -> Result<RemoteJob, RunScriptError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        match self.next_answer() {
            Scripted::Status(status) => {
                if status == "complete" {
                    self.deliver_output().await;
                }
                Ok(self.remote_job(status, None))
            }
            Scripted::StatusWithLog(status, log) => Ok(self.remote_job(status, Some(log))),
            Scripted::Unreachable => Err(RunScriptError::Api {
                status: 503,
                body: "upstream unavailable".to_string(),
            }),
        }
    }
}

/// In-memory object store with knobs for the failure modes the tests need.
#[derive(Default)]
pub struct MemoryStorage {
    files: Mutex<HashMap<String, (Vec<u8>, String)>>,
    uploads: AtomicUsize,
    exists_calls: AtomicUsize,
    sign_calls: AtomicUsize,
    hidden_checks: AtomicU32,
    failing_checks: AtomicU32,
    failing_signs: AtomicU32,
    fail_uploads: AtomicBool,
}

/// Decrement `counter` if positive; true when a unit was taken.
fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn unavailable(key: &str) -> StorageError {
    StorageError::Api {
        key: key.to_string(),
        status: 503,
        body: "bucket unavailable".to_string(),
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, data: &[u8]) {
        self.files
            .lock()
            .insert(key.to_string(), (data.to_vec(), "application/pdf".to_string()));
    }

    pub fn file(&self, key: &str) -> Option<(Vec<u8>, String)> {
        self.files.lock().get(key).cloned()
    }

    /// The next `n` existence checks report the object as absent.
    pub fn hide_for_checks(&self, n: u32) {
        self.hidden_checks.store(n, Ordering::SeqCst);
    }

    /// The next `n` existence checks fail with a storage error.
    pub fn fail_checks(&self, n: u32) {
        self.failing_checks.store(n, Ordering::SeqCst);
    }

    /// The next `n` read URL signings fail with a storage error.
    pub fn fail_signs(&self, n: u32) {
        self.failing_signs.store(n, Ordering::SeqCst);
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn exists_calls(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
    }

    pub fn sign_calls(&self) -> usize {
        self.sign_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ObjectStorage for MemoryStorage {
    async fn upload_file(
        &self,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<(), StorageError> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(unavailable(key));
        }
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.files
            .lock()
            .insert(key.to_string(), (data.to_vec(), content_type.to_string()));
        Ok(())
    }

    async fn file_exists(&self, key: &str) -> Result<bool, StorageError> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.failing_checks) {
            return Err(unavailable(key));
        }
        let hidden = take_one(&self.hidden_checks);
        Ok(!hidden && self.files.lock().contains_key(key))
    }

    async fn create_signed_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        let n = self.sign_calls.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.failing_signs) {
            return Err(unavailable(key));
        }
        Ok(format!(
            "{SIGNED_READ_PREFIX}{key}?expires={}&n={n}",
            ttl.as_secs()
        ))
    }

    async fn create_signed_upload_url(
        &self,
        key: &str,
        _ttl: Duration,
    ) -> Result<String, StorageError> {
        Ok(format!("{SIGNED_UPLOAD_PREFIX}{key}"))
    }

    async fn delete_file(&self, key: &str) -> Result<(), StorageError> {
        self.files.lock().remove(key);
        Ok(())
    }
}

/// `T1` needs a name and a date, mirroring the certificate templates.
pub fn test_catalog() -> TemplateCatalog {
    TemplateCatalog::new(vec![TemplateDefinition {
        id: "T1".to_string(),
        label: "Test certificate".to_string(),
        document: AssetRef::new("templates/t1.indd", "t1.indd"),
        assets: vec![AssetRef::new("fonts/script.ttf", "Document Fonts/script.ttf")],
        script: "main();".to_string(),
        fields: vec![
            TemplateField::new("name", "Name", "Recipient name"),
            TemplateField::new("date", "Date", "Date"),
        ],
        output_path: "certificate.pdf".to_string(),
    }])
    .expect("test catalog should be valid")
}

pub fn fast_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        poll: PollBudget::new(Duration::from_millis(5), 5),
        artifact_check_attempts: 3,
        artifact_check_interval: Duration::from_millis(2),
        download_url_ttl: Duration::from_secs(3600),
        asset_url_ttl: Duration::from_secs(900),
        output_prefix: "certificates".to_string(),
    }
}

pub fn app_state(
    renderer: Arc<FakeRenderingService>,
    storage: Arc<MemoryStorage>,
    mode: DeliveryMode,
) -> AppState {
    AppState::new_with_services(
        renderer,
        storage,
        test_catalog(),
        fast_settings(),
        mode,
        Some(PUBLIC_BASE_URL),
        Duration::from_secs(60),
    )
    .expect("test state should build")
}
