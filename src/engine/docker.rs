//! Docker/Podman engine backed by bollard
//!
//! Podman is reached through its Docker-compatible socket (`DOCKER_HOST`).

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogsOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::{CommitContainerOptions, CreateImageOptions};
use bollard::models::{HostConfig, PortBinding};
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ContainerEngine, ContainerRunSpec, EngineError, LogStream};
use crate::cache::CachedImageRef;

/// Engine client shared by every component of one invocation
#[derive(Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect using `DOCKER_HOST` or the platform's default socket
    pub fn connect() -> Result<Self, EngineError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }

    fn container_config(spec: &ContainerRunSpec) -> Config<String> {
        let mut host_config = HostConfig {
            binds: Some(spec.binds()),
            shm_size: spec.shm_size,
            ..Default::default()
        };

        let mut exposed_ports = None;
        if let Some(port) = &spec.port {
            let key = port.container_key();
            let mut bindings = HashMap::new();
            bindings.insert(
                key.clone(),
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: Some(port.host_port.to_string()),
                }]),
            );
            host_config.port_bindings = Some(bindings);

            let mut exposed = HashMap::new();
            exposed.insert(key, HashMap::new());
            exposed_ports = Some(exposed);
        }

        Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            working_dir: Some(spec.working_dir.clone()),
            env: Some(spec.env_pairs()),
            user: spec.user.clone(),
            exposed_ports,
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            host_config: Some(host_config),
            ..Default::default()
        }
    }
}

fn is_not_found(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn version_components(&self) -> Result<Vec<String>, EngineError> {
        let version = self.docker.version().await?;
        Ok(version
            .components
            .unwrap_or_default()
            .into_iter()
            .map(|c| c.name)
            .collect())
    }

    async fn image_exists(&self, reference: &str) -> Result<bool, EngineError> {
        match self.docker.inspect_image(reference).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn pull_image(&self, reference: &str) -> Result<(), EngineError> {
        let options = Some(CreateImageOptions {
            from_image: reference,
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(progress) = stream.next().await {
            let progress = progress?;
            if let Some(status) = progress.status {
                debug!("pull {}: {}", reference, status);
            }
        }
        Ok(())
    }

    async fn run_detached(&self, spec: &ContainerRunSpec) -> Result<String, EngineError> {
        let config = Self::container_config(spec);
        let created = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await?;

        for warning in &created.warnings {
            warn!("Engine warning for {}: {}", created.id, warning);
        }

        if let Err(e) = self
            .docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
        {
            if let Err(remove_err) = self
                .docker
                .remove_container(
                    &created.id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await
            {
                warn!(
                    "Failed to remove unstarted container {}: {}",
                    created.id, remove_err
                );
            }
            return Err(e.into());
        }

        debug!("Started container {} from {}", created.id, spec.image);
        Ok(created.id)
    }

    fn logs(&self, id: &str) -> LogStream {
        let options = Some(LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        });

        Box::pin(
            self.docker
                .logs(id, options)
                .map(|chunk| chunk.map(|out| out.into_bytes().to_vec()).map_err(Into::into)),
        )
    }

    async fn collect_logs(&self, id: &str) -> Result<String, EngineError> {
        let options = Some(LogsOptions::<String> {
            follow: false,
            stdout: true,
            stderr: true,
            ..Default::default()
        });

        let mut stream = self.docker.logs(id, options);
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk?.into_bytes());
        }
        Ok(String::from_utf8_lossy(&collected).into_owned())
    }

    async fn wait(&self, id: &str) -> Result<i64, EngineError> {
        let options = Some(WaitContainerOptions {
            condition: "not-running",
        });

        let mut stream = self.docker.wait_container(id, options);
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit as an error; it is still an exit code
            Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(e.into()),
            None => Err(EngineError::NoWaitStatus(id.to_string())),
        }
    }

    async fn stop(&self, id: &str, timeout: Duration) -> Result<(), EngineError> {
        let options = Some(StopContainerOptions {
            t: timeout.as_secs() as i64,
        });
        self.docker.stop_container(id, options).await?;
        Ok(())
    }

    async fn commit(&self, id: &str, image: &CachedImageRef) -> Result<(), EngineError> {
        let options = CommitContainerOptions {
            container: id.to_string(),
            repo: image.repository.clone(),
            tag: image.tag.clone(),
            pause: true,
            ..Default::default()
        };
        let commit = self
            .docker
            .commit_container(options, Config::<String>::default())
            .await?;
        info!("Committed {} as {} ({:?})", id, image, commit.id);
        Ok(())
    }

    async fn remove(&self, id: &str, force: bool) -> Result<(), EngineError> {
        let options = Some(RemoveContainerOptions {
            force,
            ..Default::default()
        });
        self.docker.remove_container(id, options).await?;
        Ok(())
    }
}
