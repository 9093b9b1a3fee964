use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use lambox_docker::{ContainerBackend, KillMultiError, RunImageConfig};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::arn;
use crate::code_store::CodeStore;
use crate::config::LamboxConfig;
use crate::error::{LambdaError, StageError};
use crate::invoker::LambdaInvoker;
use crate::registry::{FunctionRegistry, InMemoryRegistry};
use crate::runtime;
use crate::types::{
    CreateFunctionInput, CreateFunctionParams, FunctionRecord, InvokeAsyncInput,
    InvokeAsyncOutput, InvokeInput, InvokeOutput, LATEST_VERSION,
};

const CONTAINER_PREFIX: &str = "lambox-";

/// Orchestrates function creation, invocation and teardown.
///
/// Lifecycle per function is `absent -> staged -> registered`; a record
/// only becomes visible once its container is running.
pub struct FunctionService {
    backend: Arc<dyn ContainerBackend>,
    store: CodeStore,
    registry: Arc<dyn FunctionRegistry>,
    invoker: LambdaInvoker,
    region: String,
}

impl FunctionService {
    pub fn new(
        backend: Arc<dyn ContainerBackend>,
        store: CodeStore,
        region: impl Into<String>,
    ) -> Self {
        let region = region.into();
        Self {
            backend,
            store,
            registry: Arc::new(InMemoryRegistry::new(region.clone())),
            invoker: LambdaInvoker::new(),
            region,
        }
    }

    pub fn from_config(config: &LamboxConfig, backend: Arc<dyn ContainerBackend>) -> Self {
        Self::new(backend, CodeStore::new(&config.code_dir), config.region.clone())
    }

    pub fn with_registry(mut self, registry: Arc<dyn FunctionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_invoker(mut self, invoker: LambdaInvoker) -> Self {
        self.invoker = invoker;
        self
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn registry(&self) -> &dyn FunctionRegistry {
        self.registry.as_ref()
    }

    pub fn code_store(&self) -> &CodeStore {
        &self.store
    }

    /// Validate, stage, launch and register a function.
    ///
    /// Staged code is removed again if the container cannot be started or
    /// the request is cancelled while it starts.
    pub async fn create(
        &self,
        input: CreateFunctionInput,
        cancel: &CancellationToken,
    ) -> Result<Arc<FunctionRecord>, LambdaError> {
        let params = input.validate()?;
        if !runtime::is_supported(&params.runtime) {
            return Err(LambdaError::InvalidRuntime(params.runtime));
        }
        let CreateFunctionParams {
            function_name: name,
            runtime,
            handler,
            role,
            memory_size,
            timeout,
            description,
            code,
            environment,
        } = params;
        let Some(zip_file) = code.zip_file else {
            return Err(LambdaError::InvalidZipFile(
                "only inline ZipFile code is supported, S3 code locations are not".into(),
            ));
        };
        if cancel.is_cancelled() {
            return Err(LambdaError::Cancelled);
        }

        let code_size = self.store.stage(&name, &zip_file).await.map_err(|e| match e {
            StageError::AlreadyStaged(_) => {
                LambdaError::ResourceInUse(format!("function already exists: {name}"))
            }
            StageError::InvalidArchive(message) => LambdaError::InvalidZipFile(message),
            StageError::Io(e) => LambdaError::service("failed to stage function code", e),
        })?;
        let code_sha256 = STANDARD.encode(Sha256::digest(zip_file.as_bytes()));

        let run_config = RunImageConfig {
            name: format!("{CONTAINER_PREFIX}{name}"),
            dir: self.store.function_dir(&name),
            tag: runtime.clone(),
            handler: handler.clone(),
            envs: environment.clone(),
        };
        let launched = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LambdaError::Cancelled),
            result = self.backend.run_image(&run_config) => {
                result.map_err(|e| LambdaError::service("failed to start container", e))
            }
        };
        let container = match launched {
            Ok(container) => container,
            Err(e) => {
                tracing::warn!(function = %name, error = %e, "Container launch failed");
                self.discard_staged(&name).await;
                return Err(e);
            }
        };

        let record = FunctionRecord {
            function_arn: arn::function_arn(&self.region, &name),
            function_name: name,
            runtime,
            role,
            handler,
            code_size,
            description,
            timeout,
            memory_size,
            last_modified: Utc::now(),
            code_sha256,
            version: LATEST_VERSION.into(),
            environment,
            revision_id: Uuid::new_v4().to_string(),
            container,
        };
        tracing::info!(
            function = %record.function_name,
            container_id = %record.container.id,
            addr = %record.container.addr,
            code_size,
            "Function created"
        );
        Ok(self.registry.register(record))
    }

    pub fn get_function(&self, name_or_arn: &str) -> Result<Arc<FunctionRecord>, LambdaError> {
        self.resolve(name_or_arn)
    }

    pub fn list_functions(&self) -> Vec<Arc<FunctionRecord>> {
        self.registry.list()
    }

    /// Forward a synchronous invocation to the function's container.
    pub async fn invoke_sync(
        &self,
        input: InvokeInput,
        cancel: &CancellationToken,
    ) -> Result<InvokeOutput, LambdaError> {
        let record = self.resolve(&input.function_name)?;
        if let Some(qualifier) = input.qualifier.as_deref()
            && qualifier != LATEST_VERSION
        {
            return Err(LambdaError::ResourceNotFound(format!(
                "{}:{qualifier}",
                record.function_name
            )));
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LambdaError::Cancelled),
            result = self.invoker.invoke(&record.container.addr, &record.function_name, &input) => {
                Ok(result?)
            }
        }
    }

    /// Hand an event to the function's container without waiting for it to run.
    pub async fn invoke_async(
        &self,
        input: InvokeAsyncInput,
        cancel: &CancellationToken,
    ) -> Result<InvokeAsyncOutput, LambdaError> {
        let record = self.resolve(&input.function_name)?;

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LambdaError::Cancelled),
            result = self.invoker.invoke_async(
                &record.container.addr,
                &record.function_name,
                input.invoke_args,
            ) => result?,
        };
        Ok(InvokeAsyncOutput { status })
    }

    /// Kill every registered function's container in one bulk call.
    pub async fn close(&self) -> Result<(), KillMultiError> {
        let ids = self.registry.container_ids();
        tracing::info!(count = ids.len(), "Stopping function containers");
        self.backend.kill_multi(&ids).await
    }

    fn resolve(&self, name_or_arn: &str) -> Result<Arc<FunctionRecord>, LambdaError> {
        let found = if name_or_arn.starts_with("arn:") {
            self.registry.get_by_arn(name_or_arn)
        } else {
            self.registry.get_by_name(name_or_arn)
        };
        found.ok_or_else(|| LambdaError::ResourceNotFound(name_or_arn.to_string()))
    }

    async fn discard_staged(&self, name: &str) {
        if let Err(e) = self.store.remove(name).await {
            tracing::warn!(function = %name, error = %e, "Failed to remove staged code");
        }
    }
}
