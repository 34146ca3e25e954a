//! gRPC server plumbing.
//!
//! [`ProviderService`] is the trait [`GithubProvider`](crate::GithubProvider)
//! implements with plain Rust types. [`serve`] wraps it in the generated
//! tonic service, prints the handshake line and runs until SIGTERM or
//! SIGINT.
//!
//! # Signal Handling
//!
//! When a signal is received, the server:
//! 1. Stops accepting new connections
//! 2. Waits for in-flight requests to complete, bounded by
//!    [`ServeOptions::shutdown_timeout`]
//! 3. Calls the provider's `stop()` method

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpListener;
use tonic::transport::Server;
use tracing::{debug, error, info, instrument, warn};

use crate::error::ProviderError;
use crate::generated;
use crate::schema::{BlockNestingMode, Diagnostic, DiagnosticSeverity, ProviderSchema};
use crate::types::{
    ImportedResource, OperationResult, PlanResult, ProviderMetadata, HANDSHAKE_PREFIX,
    PROTOCOL_VERSION,
};

/// Operations a provider exposes over the plugin protocol.
///
/// Errors returned here are converted into error diagnostics on the wire;
/// they never surface as gRPC status codes.
#[async_trait::async_trait]
pub trait ProviderService: Send + Sync + 'static {
    /// Schemas for the provider block, every resource and every data source.
    fn schema(&self) -> ProviderSchema;

    /// Sorted type names, derived from [`schema`](Self::schema).
    fn metadata(&self) -> ProviderMetadata {
        let schema = self.schema();
        let mut resources: Vec<String> = schema.resources.keys().cloned().collect();
        let mut data_sources: Vec<String> = schema.data_sources.keys().cloned().collect();
        resources.sort();
        data_sources.sort();
        ProviderMetadata {
            resources,
            data_sources,
            capabilities: Default::default(),
        }
    }

    /// Check the provider block. Runs before `configure`.
    async fn validate_provider_config(
        &self,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = config;
        Ok(vec![])
    }

    /// Resolve credentials and build the API client.
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Release the client. Called on `Stop` and after shutdown.
    async fn stop(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Check a resource block before planning.
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (resource_type, config);
        Ok(vec![])
    }

    /// Migrate state written under an older schema version.
    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        let _ = (resource_type, version);
        Ok(state)
    }

    /// Compute the planned state and attribute changes.
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError>;

    /// Apply a create plan.
    async fn create(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<OperationResult, ProviderError>;

    /// Read the current state of a resource. A result without state removes
    /// the resource from the orchestrator's state.
    async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<OperationResult, ProviderError>;

    /// Apply an in-place update plan.
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<OperationResult, ProviderError>;

    /// Delete a resource. Returned diagnostics are warnings.
    async fn delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Look up an existing object by import ID.
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let _ = id;
        Err(ProviderError::Unimplemented(format!(
            "Import not supported for resource type: {}",
            resource_type
        )))
    }

    /// Check a data source block.
    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (data_source_type, config);
        Ok(vec![])
    }

    /// Read a data source.
    async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<OperationResult, ProviderError> {
        let _ = config;
        Err(ProviderError::UnknownResource(data_source_type.to_string()))
    }
}

/// Wrapper that implements the generated gRPC trait.
struct ProviderGrpcService<P: ProviderService> {
    provider: Arc<P>,
}

fn diagnostics_to_proto(diagnostics: Vec<Diagnostic>) -> Vec<generated::Diagnostic> {
    diagnostics
        .into_iter()
        .map(|d| generated::Diagnostic {
            severity: match d.severity {
                DiagnosticSeverity::Error => generated::diagnostic::Severity::Error as i32,
                DiagnosticSeverity::Warning => generated::diagnostic::Severity::Warning as i32,
            },
            summary: d.summary,
            detail: d.detail.unwrap_or_default(),
            attribute: d.attribute.unwrap_or_default(),
        })
        .collect()
}

fn error_to_diagnostics(err: &ProviderError) -> Vec<generated::Diagnostic> {
    diagnostics_to_proto(vec![err.to_diagnostic()])
}

fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics
        .iter()
        .any(|d| matches!(d.severity, DiagnosticSeverity::Error))
}

fn decode_value(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes).unwrap_or(Value::Null)
}

/// Encode a state. An absent state is sent as empty bytes.
fn encode_state(state: Option<&Value>) -> Vec<u8> {
    state
        .map(|s| serde_json::to_vec(s).unwrap_or_default())
        .unwrap_or_default()
}

fn schema_to_proto(schema: &crate::schema::Schema) -> generated::Schema {
    generated::Schema {
        version: schema.version as i64,
        block: Some(block_to_proto(&schema.block)),
    }
}

fn block_to_proto(block: &crate::schema::Block) -> generated::Block {
    let mut attributes: Vec<generated::Attribute> = block
        .attributes
        .iter()
        .map(|(name, attr)| generated::Attribute {
            name: name.clone(),
            r#type: serde_json::to_vec(&attr.attr_type).unwrap_or_default(),
            required: attr.flags.required,
            optional: attr.flags.optional,
            computed: attr.flags.computed,
            sensitive: attr.flags.sensitive,
            description: attr.description.clone().unwrap_or_default(),
            force_new: attr.force_new,
            default_value: attr
                .default
                .as_ref()
                .map(|v| serde_json::to_vec(v).unwrap_or_default())
                .unwrap_or_default(),
        })
        .collect();
    attributes.sort_by(|a, b| a.name.cmp(&b.name));

    let mut block_types: Vec<generated::NestedBlock> = block
        .blocks
        .iter()
        .map(|(name, nested)| generated::NestedBlock {
            type_name: name.clone(),
            block: Some(block_to_proto(&nested.block)),
            nesting_mode: match nested.nesting_mode {
                BlockNestingMode::Single => generated::nested_block::NestingMode::Single as i32,
                BlockNestingMode::List => generated::nested_block::NestingMode::List as i32,
                BlockNestingMode::Set => generated::nested_block::NestingMode::Set as i32,
                BlockNestingMode::Map => generated::nested_block::NestingMode::Map as i32,
            },
            min_items: nested.min_items as i32,
            max_items: nested.max_items as i32,
        })
        .collect();
    block_types.sort_by(|a, b| a.type_name.cmp(&b.type_name));

    generated::Block {
        attributes,
        block_types,
        description: block.description.clone().unwrap_or_default(),
    }
}

#[tonic::async_trait]
impl<P: ProviderService> generated::provider_server::Provider for ProviderGrpcService<P> {
    #[instrument(skip(self, _request), name = "grpc.get_metadata")]
    async fn get_metadata(
        &self,
        _request: tonic::Request<generated::GetMetadataRequest>,
    ) -> Result<tonic::Response<generated::GetMetadataResponse>, tonic::Status> {
        let metadata = self.provider.metadata();
        debug!(
            resources = metadata.resources.len(),
            data_sources = metadata.data_sources.len(),
            "GetMetadata completed"
        );
        Ok(tonic::Response::new(generated::GetMetadataResponse {
            server_capabilities: Some(generated::ServerCapabilities {
                plan_destroy: metadata.capabilities.plan_destroy,
            }),
            resources: metadata.resources,
            data_sources: metadata.data_sources,
            diagnostics: vec![],
        }))
    }

    #[instrument(skip(self, _request), name = "grpc.get_schema")]
    async fn get_schema(
        &self,
        _request: tonic::Request<generated::GetSchemaRequest>,
    ) -> Result<tonic::Response<generated::GetSchemaResponse>, tonic::Status> {
        let schema = self.provider.schema();
        debug!(
            resources = schema.resources.len(),
            data_sources = schema.data_sources.len(),
            "GetSchema completed"
        );
        Ok(tonic::Response::new(generated::GetSchemaResponse {
            provider: Some(schema_to_proto(&schema.provider)),
            resources: schema
                .resources
                .iter()
                .map(|(k, v)| (k.clone(), schema_to_proto(v)))
                .collect(),
            data_sources: schema
                .data_sources
                .iter()
                .map(|(k, v)| (k.clone(), schema_to_proto(v)))
                .collect(),
            diagnostics: vec![],
        }))
    }

    #[instrument(skip(self, request), name = "grpc.validate_provider_config")]
    async fn validate_provider_config(
        &self,
        request: tonic::Request<generated::ValidateProviderConfigRequest>,
    ) -> Result<tonic::Response<generated::ValidateProviderConfigResponse>, tonic::Status> {
        let config = decode_value(&request.into_inner().config);
        let diagnostics = diagnostics_only(
            "ValidateProviderConfig",
            self.provider.validate_provider_config(config).await,
        );
        Ok(tonic::Response::new(
            generated::ValidateProviderConfigResponse { diagnostics },
        ))
    }

    #[instrument(skip(self, request), name = "grpc.configure")]
    async fn configure(
        &self,
        request: tonic::Request<generated::ConfigureRequest>,
    ) -> Result<tonic::Response<generated::ConfigureResponse>, tonic::Status> {
        let config = decode_value(&request.into_inner().config);
        let diagnostics = diagnostics_only("Configure", self.provider.configure(config).await);
        Ok(tonic::Response::new(generated::ConfigureResponse {
            diagnostics,
        }))
    }

    #[instrument(skip(self, _request), name = "grpc.stop")]
    async fn stop(
        &self,
        _request: tonic::Request<generated::StopRequest>,
    ) -> Result<tonic::Response<generated::StopResponse>, tonic::Status> {
        info!("Stop called");
        let error = match self.provider.stop().await {
            Ok(()) => String::new(),
            Err(e) => {
                error!(error = %e, "Stop failed");
                e.to_string()
            },
        };
        Ok(tonic::Response::new(generated::StopResponse { error }))
    }

    #[instrument(
        skip(self, request),
        fields(resource_type),
        name = "grpc.validate_resource_config"
    )]
    async fn validate_resource_config(
        &self,
        request: tonic::Request<generated::ValidateResourceConfigRequest>,
    ) -> Result<tonic::Response<generated::ValidateResourceConfigResponse>, tonic::Status> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());
        let config = decode_value(&req.config);
        let diagnostics = diagnostics_only(
            "ValidateResourceConfig",
            self.provider
                .validate_resource_config(&req.resource_type, config)
                .await,
        );
        Ok(tonic::Response::new(
            generated::ValidateResourceConfigResponse { diagnostics },
        ))
    }

    #[instrument(skip(self, request), fields(resource_type), name = "grpc.upgrade_resource_state")]
    async fn upgrade_resource_state(
        &self,
        request: tonic::Request<generated::UpgradeResourceStateRequest>,
    ) -> Result<tonic::Response<generated::UpgradeResourceStateResponse>, tonic::Status> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());
        let state = decode_value(&req.raw_state);

        match self
            .provider
            .upgrade_resource_state(&req.resource_type, req.version, state)
            .await
        {
            Ok(upgraded) => {
                debug!(from_version = req.version, "UpgradeResourceState completed");
                Ok(tonic::Response::new(
                    generated::UpgradeResourceStateResponse {
                        upgraded_state: encode_state(Some(&upgraded)),
                        diagnostics: vec![],
                    },
                ))
            },
            Err(e) => {
                error!(version = req.version, error = %e, "UpgradeResourceState failed");
                Ok(tonic::Response::new(
                    generated::UpgradeResourceStateResponse {
                        upgraded_state: vec![],
                        diagnostics: error_to_diagnostics(&e),
                    },
                ))
            },
        }
    }

    #[instrument(skip(self, request), fields(resource_type), name = "grpc.plan")]
    async fn plan(
        &self,
        request: tonic::Request<generated::PlanRequest>,
    ) -> Result<tonic::Response<generated::PlanResponse>, tonic::Status> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());

        let prior_state = if req.prior_state.is_empty() {
            None
        } else {
            serde_json::from_slice(&req.prior_state).ok()
        };
        let proposed_state = decode_value(&req.proposed_state);
        let config = decode_value(&req.config);
        debug!(is_create = prior_state.is_none(), "Plan called");

        match self
            .provider
            .plan(&req.resource_type, prior_state, proposed_state, config)
            .await
        {
            Ok(result) => {
                info!(
                    changes = result.changes.len(),
                    requires_replace = result.requires_replace,
                    "Plan completed"
                );
                let planned_state = if result.planned_state.is_null() {
                    vec![]
                } else {
                    encode_state(Some(&result.planned_state))
                };
                Ok(tonic::Response::new(generated::PlanResponse {
                    planned_state,
                    changes: result.changes.into_iter().map(Into::into).collect(),
                    requires_replace: result.requires_replace,
                    diagnostics: diagnostics_to_proto(result.diagnostics),
                }))
            },
            Err(e) => {
                error!(error = %e, "Plan failed");
                Ok(tonic::Response::new(generated::PlanResponse {
                    planned_state: vec![],
                    changes: vec![],
                    requires_replace: false,
                    diagnostics: error_to_diagnostics(&e),
                }))
            },
        }
    }

    #[instrument(skip(self, request), fields(resource_type), name = "grpc.create")]
    async fn create(
        &self,
        request: tonic::Request<generated::CreateRequest>,
    ) -> Result<tonic::Response<generated::CreateResponse>, tonic::Status> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());
        let planned_state = decode_value(&req.planned_state);

        let (state, diagnostics) = split_result(
            "Create",
            self.provider.create(&req.resource_type, planned_state).await,
        );
        Ok(tonic::Response::new(generated::CreateResponse {
            state,
            diagnostics,
        }))
    }

    #[instrument(skip(self, request), fields(resource_type), name = "grpc.read")]
    async fn read(
        &self,
        request: tonic::Request<generated::ReadRequest>,
    ) -> Result<tonic::Response<generated::ReadResponse>, tonic::Status> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());
        let current_state = decode_value(&req.current_state);

        let (state, diagnostics) = split_result(
            "Read",
            self.provider.read(&req.resource_type, current_state).await,
        );
        Ok(tonic::Response::new(generated::ReadResponse {
            state,
            diagnostics,
        }))
    }

    #[instrument(skip(self, request), fields(resource_type), name = "grpc.update")]
    async fn update(
        &self,
        request: tonic::Request<generated::UpdateRequest>,
    ) -> Result<tonic::Response<generated::UpdateResponse>, tonic::Status> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());
        let prior_state = decode_value(&req.prior_state);
        let planned_state = decode_value(&req.planned_state);

        let (state, diagnostics) = split_result(
            "Update",
            self.provider
                .update(&req.resource_type, prior_state, planned_state)
                .await,
        );
        Ok(tonic::Response::new(generated::UpdateResponse {
            state,
            diagnostics,
        }))
    }

    #[instrument(skip(self, request), fields(resource_type), name = "grpc.delete")]
    async fn delete(
        &self,
        request: tonic::Request<generated::DeleteRequest>,
    ) -> Result<tonic::Response<generated::DeleteResponse>, tonic::Status> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());
        let current_state = decode_value(&req.current_state);
        let diagnostics = diagnostics_only(
            "Delete",
            self.provider.delete(&req.resource_type, current_state).await,
        );
        Ok(tonic::Response::new(generated::DeleteResponse { diagnostics }))
    }

    #[instrument(skip(self, request), fields(resource_type), name = "grpc.import_resource_state")]
    async fn import_resource_state(
        &self,
        request: tonic::Request<generated::ImportResourceStateRequest>,
    ) -> Result<tonic::Response<generated::ImportResourceStateResponse>, tonic::Status> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());
        info!(id = %req.id, "ImportResourceState called");

        match self
            .provider
            .import_resource(&req.resource_type, &req.id)
            .await
        {
            Ok(imported) => {
                info!(
                    id = %req.id,
                    imported_count = imported.len(),
                    "ImportResourceState completed"
                );
                Ok(tonic::Response::new(
                    generated::ImportResourceStateResponse {
                        imported: imported
                            .into_iter()
                            .map(|r| generated::ImportedResource {
                                resource_type: r.resource_type,
                                state: encode_state(Some(&r.state)),
                            })
                            .collect(),
                        diagnostics: vec![],
                    },
                ))
            },
            Err(e) => {
                error!(id = %req.id, error = %e, "ImportResourceState failed");
                Ok(tonic::Response::new(
                    generated::ImportResourceStateResponse {
                        imported: vec![],
                        diagnostics: error_to_diagnostics(&e),
                    },
                ))
            },
        }
    }

    #[instrument(
        skip(self, request),
        fields(data_source_type),
        name = "grpc.validate_data_source_config"
    )]
    async fn validate_data_source_config(
        &self,
        request: tonic::Request<generated::ValidateDataSourceConfigRequest>,
    ) -> Result<tonic::Response<generated::ValidateDataSourceConfigResponse>, tonic::Status> {
        let req = request.into_inner();
        tracing::Span::current().record("data_source_type", req.data_source_type.as_str());
        let config = decode_value(&req.config);
        let diagnostics = diagnostics_only(
            "ValidateDataSourceConfig",
            self.provider
                .validate_data_source_config(&req.data_source_type, config)
                .await,
        );
        Ok(tonic::Response::new(
            generated::ValidateDataSourceConfigResponse { diagnostics },
        ))
    }

    #[instrument(skip(self, request), fields(data_source_type), name = "grpc.read_data_source")]
    async fn read_data_source(
        &self,
        request: tonic::Request<generated::ReadDataSourceRequest>,
    ) -> Result<tonic::Response<generated::ReadDataSourceResponse>, tonic::Status> {
        let req = request.into_inner();
        tracing::Span::current().record("data_source_type", req.data_source_type.as_str());
        let config = decode_value(&req.config);

        let (state, diagnostics) = split_result(
            "ReadDataSource",
            self.provider
                .read_data_source(&req.data_source_type, config)
                .await,
        );
        Ok(tonic::Response::new(generated::ReadDataSourceResponse {
            state,
            diagnostics,
        }))
    }
}

/// Log and encode the outcome of an RPC that only answers with diagnostics.
fn diagnostics_only(
    operation: &str,
    result: Result<Vec<Diagnostic>, ProviderError>,
) -> Vec<generated::Diagnostic> {
    match result {
        Ok(diagnostics) => {
            if has_errors(&diagnostics) {
                warn!(operation, diagnostics = diagnostics.len(), "Completed with errors");
            } else {
                debug!(operation, warnings = diagnostics.len(), "Completed");
            }
            diagnostics_to_proto(diagnostics)
        },
        Err(e) => {
            error!(operation, error = %e, "Operation failed");
            error_to_diagnostics(&e)
        },
    }
}

/// Turn an operation outcome into the `(state, diagnostics)` pair every
/// state-returning response carries.
fn split_result(
    operation: &str,
    result: Result<OperationResult, ProviderError>,
) -> (Vec<u8>, Vec<generated::Diagnostic>) {
    match result {
        Ok(outcome) => {
            if outcome.state.is_none() {
                info!(operation, "Object no longer exists remotely");
            } else {
                debug!(operation, warnings = outcome.diagnostics.len(), "Operation completed");
            }
            (
                encode_state(outcome.state.as_ref()),
                diagnostics_to_proto(outcome.diagnostics),
            )
        },
        Err(e) => {
            error!(operation, error = %e, "Operation failed");
            (vec![], error_to_diagnostics(&e))
        },
    }
}

/// Options for configuring the provider server.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// Timeout for graceful shutdown. After receiving a shutdown signal,
    /// the server will wait this long for in-flight requests to complete.
    /// Default: 30 seconds.
    pub shutdown_timeout: Duration,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ServeOptions {
    /// Create new serve options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Wait for SIGTERM or SIGINT (CTRL+C on Windows).
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
                    _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown"),
                }
            },
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Failed to install signal handlers, falling back to CTRL+C");
                wait_for_ctrl_c().await;
            },
        }
    }

    #[cfg(not(unix))]
    {
        wait_for_ctrl_c().await;
    }
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received CTRL+C, initiating graceful shutdown"),
        Err(e) => {
            error!(
                error = %e,
                "Failed to listen for CTRL+C, shutdown requires killing the process"
            );
            std::future::pending::<()>().await;
        },
    }
}

/// Serve a provider implementation as a gRPC server.
///
/// Binds an ephemeral port on 127.0.0.1, prints the handshake
/// `HEMMER_PROVIDER|<version>|<address>` and serves until a shutdown signal.
pub async fn serve<P: ProviderService>(provider: P) -> Result<(), ProviderError> {
    serve_with_options(provider, ServeOptions::default()).await
}

/// Serve a provider with custom options.
pub async fn serve_with_options<P: ProviderService>(
    provider: P,
    options: ServeOptions,
) -> Result<(), ProviderError> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    serve_on_listener(provider, listener, options, wait_for_shutdown_signal()).await
}

/// Serve a provider on a specific address.
pub async fn serve_on<P: ProviderService>(
    provider: P,
    addr: SocketAddr,
) -> Result<(), ProviderError> {
    serve_on_with_options(provider, addr, ServeOptions::default()).await
}

/// Serve a provider on a specific address with custom options.
pub async fn serve_on_with_options<P: ProviderService>(
    provider: P,
    addr: SocketAddr,
    options: ServeOptions,
) -> Result<(), ProviderError> {
    let listener = TcpListener::bind(addr).await?;
    serve_on_listener(provider, listener, options, wait_for_shutdown_signal()).await
}

/// Serve on an already-bound listener until `shutdown` resolves.
async fn serve_on_listener<P, F>(
    provider: P,
    listener: TcpListener,
    options: ServeOptions,
    shutdown: F,
) -> Result<(), ProviderError>
where
    P: ProviderService,
    F: std::future::Future<Output = ()>,
{
    let addr = listener.local_addr()?;
    println!("{}|{}|{}", HANDSHAKE_PREFIX, PROTOCOL_VERSION, addr);
    info!(address = %addr, "Provider server starting");

    let provider = Arc::new(provider);
    let grpc_service = ProviderGrpcService {
        provider: Arc::clone(&provider),
    };

    let (drain_tx, drain_rx) = tokio::sync::oneshot::channel::<()>();
    let server = Server::builder()
        .add_service(generated::provider_server::ProviderServer::new(grpc_service))
        .serve_with_incoming_shutdown(
            tokio_stream::wrappers::TcpListenerStream::new(listener),
            async {
                let _ = drain_rx.await;
            },
        );
    tokio::pin!(server);
    tokio::pin!(shutdown);

    // The timeout only bounds the drain that follows the signal.
    tokio::select! {
        result = &mut server => {
            result?;
            info!("Server stopped");
        },
        () = &mut shutdown => {
            let _ = drain_tx.send(());
            match tokio::time::timeout(options.shutdown_timeout, &mut server).await {
                Ok(Ok(())) => info!("Server shutdown complete"),
                Ok(Err(e)) => {
                    error!(error = %e, "Server error during shutdown");
                    return Err(e.into());
                },
                Err(_) => warn!(
                    timeout = ?options.shutdown_timeout,
                    "Shutdown timeout exceeded, forcing shutdown"
                ),
            }
        },
    }

    debug!("Calling provider stop()");
    if let Err(e) = provider.stop().await {
        warn!(error = %e, "Provider stop() returned error");
    }

    info!("Provider shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generated::provider_server::Provider;
    use crate::schema::{Attribute, Schema};
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct StubProvider {
        stopped: AtomicBool,
    }

    #[async_trait::async_trait]
    impl ProviderService for StubProvider {
        fn schema(&self) -> ProviderSchema {
            ProviderSchema::new()
                .with_resource(
                    "githubx_repository",
                    Schema::v0()
                        .with_attribute("name", Attribute::required_string())
                        .with_attribute("id", Attribute::computed_string()),
                )
                .with_data_source(
                    "githubx_user",
                    Schema::v0().with_attribute("username", Attribute::required_string()),
                )
        }

        async fn configure(&self, _config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
            Err(ProviderError::operation("Invalid Base URL", "bad scheme"))
        }

        async fn stop(&self) -> Result<(), ProviderError> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn plan(
            &self,
            _resource_type: &str,
            _prior_state: Option<Value>,
            proposed_state: Value,
            _config: Value,
        ) -> Result<PlanResult, ProviderError> {
            Ok(PlanResult::no_change(proposed_state))
        }

        async fn create(
            &self,
            _resource_type: &str,
            planned_state: Value,
        ) -> Result<OperationResult, ProviderError> {
            Ok(OperationResult::new(planned_state)
                .with_diagnostic(Diagnostic::warning("Error setting topics")))
        }

        async fn read(
            &self,
            _resource_type: &str,
            _current_state: Value,
        ) -> Result<OperationResult, ProviderError> {
            Ok(OperationResult::removed())
        }

        async fn update(
            &self,
            _resource_type: &str,
            _prior_state: Value,
            _planned_state: Value,
        ) -> Result<OperationResult, ProviderError> {
            Err(ProviderError::NotConfigured)
        }

        async fn delete(
            &self,
            _resource_type: &str,
            _current_state: Value,
        ) -> Result<Vec<Diagnostic>, ProviderError> {
            Ok(vec![])
        }
    }

    fn service() -> ProviderGrpcService<StubProvider> {
        ProviderGrpcService {
            provider: Arc::new(StubProvider::default()),
        }
    }

    #[tokio::test]
    async fn test_metadata_is_sorted() {
        let response = service()
            .get_metadata(tonic::Request::new(generated::GetMetadataRequest {}))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.resources, vec!["githubx_repository".to_string()]);
        assert_eq!(response.data_sources, vec!["githubx_user".to_string()]);
    }

    #[tokio::test]
    async fn test_schema_attributes_are_ordered() {
        let response = service()
            .get_schema(tonic::Request::new(generated::GetSchemaRequest {}))
            .await
            .unwrap()
            .into_inner();
        let block = response.resources["githubx_repository"]
            .block
            .clone()
            .unwrap();
        let names: Vec<&str> = block.attributes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name"]);
        assert!(block.attributes[0].computed);
        assert!(block.attributes[1].required);
    }

    #[tokio::test]
    async fn test_configure_error_keeps_title() {
        let response = service()
            .configure(tonic::Request::new(generated::ConfigureRequest {
                config: b"{}".to_vec(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.diagnostics.len(), 1);
        assert_eq!(response.diagnostics[0].summary, "Invalid Base URL");
        assert_eq!(response.diagnostics[0].detail, "bad scheme");
        assert_eq!(
            response.diagnostics[0].severity,
            generated::diagnostic::Severity::Error as i32
        );
    }

    #[tokio::test]
    async fn test_create_sends_state_and_warnings() {
        let response = service()
            .create(tonic::Request::new(generated::CreateRequest {
                resource_type: "githubx_repository".to_string(),
                planned_state: br#"{"name":"hello"}"#.to_vec(),
            }))
            .await
            .unwrap()
            .into_inner();
        let state: Value = serde_json::from_slice(&response.state).unwrap();
        assert_eq!(state["name"], "hello");
        assert_eq!(response.diagnostics.len(), 1);
        assert_eq!(
            response.diagnostics[0].severity,
            generated::diagnostic::Severity::Warning as i32
        );
    }

    #[tokio::test]
    async fn test_removed_read_sends_empty_state() {
        let response = service()
            .read(tonic::Request::new(generated::ReadRequest {
                resource_type: "githubx_repository".to_string(),
                current_state: br#"{"id":"hello"}"#.to_vec(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(response.state.is_empty());
        assert!(response.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn test_update_error_becomes_diagnostic() {
        let response = service()
            .update(tonic::Request::new(generated::UpdateRequest {
                resource_type: "githubx_repository".to_string(),
                prior_state: b"{}".to_vec(),
                planned_state: b"{}".to_vec(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(response.state.is_empty());
        assert_eq!(response.diagnostics[0].summary, "Client Error");
        assert_eq!(response.diagnostics[0].detail, "client is not configured");
    }

    #[tokio::test]
    async fn test_default_import_is_unimplemented() {
        let response = service()
            .import_resource_state(tonic::Request::new(
                generated::ImportResourceStateRequest {
                    resource_type: "githubx_repository".to_string(),
                    id: "hello".to_string(),
                },
            ))
            .await
            .unwrap()
            .into_inner();
        assert!(response.imported.is_empty());
        assert!(response.diagnostics[0].summary.contains("Import not supported"));
    }

    #[tokio::test]
    async fn test_shutdown_signal_drains_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let provider = StubProvider::default();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(serve_on_listener(
            provider,
            listener,
            ServeOptions::new().with_shutdown_timeout(Duration::from_secs(1)),
            async {
                let _ = rx.await;
            },
        ));
        tx.send(()).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[test]
    fn test_encode_state() {
        assert!(encode_state(None).is_empty());
        assert_eq!(encode_state(Some(&serde_json::json!({"a": 1}))), br#"{"a":1}"#.to_vec());
        assert_eq!(decode_value(&[]), Value::Null);
        assert_eq!(decode_value(b"not json"), Value::Null);
    }
}
