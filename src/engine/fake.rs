//! In-memory engine for tests
//!
//! Images are a set of references; containers "run" instantly and exit with a
//! code chosen by inspecting their script. Every call is recorded.

use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use super::{ContainerEngine, ContainerRunSpec, EngineError, LogStream};
use crate::cache::CachedImageRef;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Version,
    ImageExists(String),
    Pull(String),
    Run(String),
    Logs(String),
    CollectLogs(String),
    Wait(String),
    Stop(String),
    Commit(String, String),
    Remove(String),
}

#[derive(Debug)]
struct FakeContainer {
    spec: ContainerRunSpec,
    exit_code: i64,
    stopped: bool,
    removed: bool,
}

#[derive(Default)]
struct State {
    components: Vec<String>,
    version_fails: bool,
    images: BTreeSet<String>,
    containers: HashMap<String, FakeContainer>,
    next_id: u32,
    calls: Vec<Call>,
    provision_exit_code: i64,
    task_exit_code: i64,
    wait_fails: bool,
    wait_hangs: bool,
    run_fails: bool,
    pull_hangs: bool,
    commit_fails: bool,
    logs_hang: bool,
    log_lines: Vec<String>,
}

pub struct FakeEngine {
    state: Mutex<State>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                components: vec!["Engine".to_string()],
                log_lines: vec!["hello from container\n".to_string()],
                ..Default::default()
            }),
        }
    }

    pub fn with_components(self, names: &[&str]) -> Self {
        self.state.lock().unwrap().components = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_image(self, reference: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .images
            .insert(reference.to_string());
        self
    }

    pub fn fail_version(&self) {
        self.state.lock().unwrap().version_fails = true;
    }

    pub fn set_provision_exit_code(&self, code: i64) {
        self.state.lock().unwrap().provision_exit_code = code;
    }

    pub fn set_task_exit_code(&self, code: i64) {
        self.state.lock().unwrap().task_exit_code = code;
    }

    pub fn fail_wait(&self) {
        self.state.lock().unwrap().wait_fails = true;
    }

    /// Never finish pulling
    pub fn hang_pull(&self) {
        self.state.lock().unwrap().pull_hangs = true;
    }

    pub fn fail_commit(&self) {
        self.state.lock().unwrap().commit_fails = true;
    }

    pub fn fail_run(&self) {
        self.state.lock().unwrap().run_fails = true;
    }

    /// Block `wait` until the container is stopped
    pub fn hang_wait(&self) {
        self.state.lock().unwrap().wait_hangs = true;
    }

    /// Keep log streams open until the container is stopped
    pub fn hang_logs(&self) {
        self.state.lock().unwrap().logs_hang = true;
    }

    pub fn images(&self) -> BTreeSet<String> {
        self.state.lock().unwrap().images.clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Launch specs in the order they were run
    pub fn run_specs(&self) -> Vec<ContainerRunSpec> {
        let state = self.state.lock().unwrap();
        let mut ids: Vec<&String> = state.containers.keys().collect();
        ids.sort_by_key(|id| id.trim_start_matches("c").parse::<u32>().unwrap_or(0));
        ids.iter().map(|id| state.containers[*id].spec.clone()).collect()
    }

    /// Containers that were created and never removed
    pub fn leaked_containers(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .containers
            .iter()
            .filter(|(_, c)| !c.removed)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn count_calls(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

fn is_provisioning(spec: &ContainerRunSpec) -> bool {
    spec.script()
        .map(|s| s.contains("-m venv /opt/"))
        .unwrap_or(false)
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn version_components(&self) -> Result<Vec<String>, EngineError> {
        self.record(Call::Version);
        let state = self.state.lock().unwrap();
        if state.version_fails {
            return Err(EngineError::Other("version endpoint unavailable".into()));
        }
        Ok(state.components.clone())
    }

    async fn image_exists(&self, reference: &str) -> Result<bool, EngineError> {
        self.record(Call::ImageExists(reference.to_string()));
        Ok(self.state.lock().unwrap().images.contains(reference))
    }

    async fn pull_image(&self, reference: &str) -> Result<(), EngineError> {
        self.record(Call::Pull(reference.to_string()));
        let hangs = self.state.lock().unwrap().pull_hangs;
        if hangs {
            futures::future::pending::<()>().await;
        }
        self.state
            .lock()
            .unwrap()
            .images
            .insert(reference.to_string());
        Ok(())
    }

    async fn run_detached(&self, spec: &ContainerRunSpec) -> Result<String, EngineError> {
        let mut state = self.state.lock().unwrap();
        if state.run_fails {
            return Err(EngineError::Other("container failed to start".into()));
        }
        if !state.images.contains(&spec.image) {
            return Err(EngineError::Other(format!("no such image: {}", spec.image)));
        }
        state.next_id += 1;
        let id = format!("c{}", state.next_id);
        let exit_code = if is_provisioning(spec) {
            state.provision_exit_code
        } else {
            state.task_exit_code
        };
        state.containers.insert(
            id.clone(),
            FakeContainer {
                spec: spec.clone(),
                exit_code,
                stopped: false,
                removed: false,
            },
        );
        state.calls.push(Call::Run(id.clone()));
        Ok(id)
    }

    fn logs(&self, id: &str) -> LogStream {
        self.record(Call::Logs(id.to_string()));
        let state = self.state.lock().unwrap();
        let lines: Vec<Result<Vec<u8>, EngineError>> = state
            .log_lines
            .iter()
            .map(|l| Ok(l.as_bytes().to_vec()))
            .collect();
        if state.logs_hang {
            return Box::pin(stream::iter(lines).chain(stream::pending()));
        }
        Box::pin(stream::iter(lines))
    }

    async fn collect_logs(&self, id: &str) -> Result<String, EngineError> {
        self.record(Call::CollectLogs(id.to_string()));
        Ok(self.state.lock().unwrap().log_lines.concat())
    }

    async fn wait(&self, id: &str) -> Result<i64, EngineError> {
        self.record(Call::Wait(id.to_string()));
        loop {
            {
                let state = self.state.lock().unwrap();
                let stopped = state.containers.get(id).map(|c| c.stopped).unwrap_or(true);
                if !state.wait_hangs || stopped {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let state = self.state.lock().unwrap();
        if state.wait_fails {
            return Err(EngineError::Other(format!("no such container: {}", id)));
        }
        let container = state
            .containers
            .get(id)
            .ok_or_else(|| EngineError::Other(format!("no such container: {}", id)))?;
        if container.stopped {
            Ok(143)
        } else {
            Ok(container.exit_code)
        }
    }

    async fn stop(&self, id: &str, _timeout: Duration) -> Result<(), EngineError> {
        self.record(Call::Stop(id.to_string()));
        if let Some(container) = self.state.lock().unwrap().containers.get_mut(id) {
            container.stopped = true;
        }
        Ok(())
    }

    async fn commit(&self, id: &str, image: &CachedImageRef) -> Result<(), EngineError> {
        self.record(Call::Commit(id.to_string(), image.to_string()));
        let mut state = self.state.lock().unwrap();
        if state.commit_fails {
            return Err(EngineError::Other(format!("commit of {} failed", id)));
        }
        state.images.insert(image.to_string());
        Ok(())
    }

    async fn remove(&self, id: &str, _force: bool) -> Result<(), EngineError> {
        self.record(Call::Remove(id.to_string()));
        match self.state.lock().unwrap().containers.get_mut(id) {
            Some(container) => {
                container.removed = true;
                Ok(())
            }
            None => Err(EngineError::Other(format!("no such container: {}", id))),
        }
    }
}
