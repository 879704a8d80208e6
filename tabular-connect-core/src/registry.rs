//! Connection resolution and sharing across the components of one pipeline run.
//!
//! Components that declare "use this other component's connection" must end up
//! holding the same physical connection, not an equal copy. The registry is an
//! explicit per-run [`PipelineContext`] threaded through every call; there is
//! no process-wide state.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tracing::debug;
use uuid::Uuid;

use crate::{ConnectorError, ConnectorResult};

/// A named, context-scoped reference to one physical backend connection.
///
/// Handles are cheap to clone; every clone refers to the same underlying
/// connection. The connection is released when the last referencing handle is
/// dropped, which the owning pipeline run controls.
#[derive(Debug)]
pub struct ConnectionHandle<C> {
    component_id: String,
    connection: Arc<C>,
}

impl<C> Clone for ConnectionHandle<C> {
    fn clone(&self) -> Self {
        Self {
            component_id: self.component_id.clone(),
            connection: Arc::clone(&self.connection),
        }
    }
}

impl<C> ConnectionHandle<C> {
    /// Wrap a freshly opened connection, owned by the given component.
    pub fn new(component_id: impl Into<String>, connection: C) -> Self {
        Self {
            component_id: component_id.into(),
            connection: Arc::new(connection),
        }
    }

    /// Identifier of the component that opened the connection.
    pub fn owner(&self) -> &str {
        &self.component_id
    }

    /// The underlying connection.
    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// Whether two handles refer to the identical physical connection.
    pub fn shares_connection_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.connection, &other.connection)
    }
}

/// Shared state of one pipeline run: the component-id to connection-handle map.
///
/// Access is expected from a single execution context per run; the internal
/// mutex only makes the context `Send + Sync` for the async runtime and is no
/// promise of concurrent resolution.
pub struct PipelineContext {
    run_id: Uuid,
    handles: Mutex<HashMap<String, Box<dyn Any + Send + Sync>>>,
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("run_id", &self.run_id)
            .finish_non_exhaustive()
    }
}

impl PipelineContext {
    /// Create the context for a new pipeline run.
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Identifier of this pipeline run.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Register a component's connection handle so later components can
    /// reference it. A second registration under the same id replaces the
    /// first.
    pub fn register<C: Send + Sync + 'static>(
        &self,
        component_id: &str,
        handle: &ConnectionHandle<C>,
    ) {
        debug!(component_id, "registering connection handle");
        self.handles
            .lock()
            .expect("pipeline context poisoned")
            .insert(component_id.to_string(), Box::new(handle.clone()));
    }

    /// Look up the connection handle a component registered, if any.
    pub fn lookup<C: Send + Sync + 'static>(
        &self,
        component_id: &str,
    ) -> Option<ConnectionHandle<C>> {
        self.handles
            .lock()
            .expect("pipeline context poisoned")
            .get(component_id)
            .and_then(|boxed| boxed.downcast_ref::<ConnectionHandle<C>>())
            .cloned()
    }
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve the connection handle a component should use.
///
/// - With a `referenced_component_id` and a context, the handle registered
///   under that id is returned as-is, so both components share one physical
///   connection. When the referenced component has not registered yet (a
///   forward reference, or design time without any context), the referenced
///   component's statically configured properties are used to open a
///   connection directly, without registering it.
/// - Without a reference, a connection is opened from `local` configuration
///   and, when a context is present, registered under `component_id` exactly
///   once so later components can reference it.
///
/// `open` is invoked at most once, with whichever configuration was selected.
///
/// # Errors
///
/// [`ConnectorError::ConnectionResolution`] when a reference is declared but
/// neither a live handle nor referenced static properties are available, or
/// when no local configuration exists to open from.
pub async fn resolve_connection<C, Cfg, F, Fut>(
    ctx: Option<&PipelineContext>,
    component_id: &str,
    referenced_component_id: Option<&str>,
    local: Option<&Cfg>,
    referenced_static: Option<&Cfg>,
    open: F,
) -> ConnectorResult<ConnectionHandle<C>>
where
    C: Send + Sync + 'static,
    Cfg: Clone,
    F: FnOnce(Cfg) -> Fut,
    Fut: Future<Output = ConnectorResult<C>>,
{
    if let Some(ref_id) = referenced_component_id {
        if let Some(ctx) = ctx {
            if let Some(handle) = ctx.lookup::<C>(ref_id) {
                debug!(component_id, referenced = ref_id, "reusing shared connection");
                return Ok(handle);
            }
        }
        // Referenced component not registered yet: build from its static
        // properties without registering the result.
        let cfg = referenced_static.ok_or_else(|| {
            ConnectorError::resolution(format!(
                "component '{}' references connection of '{}', but neither a live \
                 handle nor its configuration is available",
                component_id, ref_id
            ))
        })?;
        let connection = open(cfg.clone()).await?;
        return Ok(ConnectionHandle::new(ref_id, connection));
    }

    let cfg = local.ok_or_else(|| {
        ConnectorError::resolution(format!(
            "component '{}' has no connection configuration",
            component_id
        ))
    })?;
    let connection = open(cfg.clone()).await?;
    let handle = ConnectionHandle::new(component_id, connection);
    if let Some(ctx) = ctx {
        ctx.register(component_id, &handle);
    }
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Stand-in physical connection that counts how many times it was opened.
    #[derive(Debug)]
    struct FakeConnection {
        dsn: String,
    }

    #[derive(Clone)]
    struct FakeConfig {
        dsn: String,
    }

    async fn open_fake(cfg: FakeConfig) -> ConnectorResult<FakeConnection> {
        Ok(FakeConnection { dsn: cfg.dsn })
    }

    fn config(dsn: &str) -> FakeConfig {
        FakeConfig { dsn: dsn.into() }
    }

    #[tokio::test]
    async fn test_local_resolution_registers_handle() {
        let ctx = PipelineContext::new();
        let handle = resolve_connection(
            Some(&ctx),
            "conn_1",
            None,
            Some(&config("db://a")),
            None,
            open_fake,
        )
        .await
        .unwrap();

        assert_eq!(handle.owner(), "conn_1");
        assert_eq!(handle.connection().dsn, "db://a");
        let registered = ctx.lookup::<FakeConnection>("conn_1").unwrap();
        assert!(registered.shares_connection_with(&handle));
    }

    #[tokio::test]
    async fn test_two_referencing_components_share_one_connection() {
        let ctx = PipelineContext::new();
        let upstream = resolve_connection(
            Some(&ctx),
            "conn_1",
            None,
            Some(&config("db://a")),
            None,
            open_fake,
        )
        .await
        .unwrap();

        let input = resolve_connection(
            Some(&ctx),
            "input_1",
            Some("conn_1"),
            None,
            None,
            open_fake,
        )
        .await
        .unwrap();
        let output = resolve_connection(
            Some(&ctx),
            "output_1",
            Some("conn_1"),
            None,
            None,
            open_fake,
        )
        .await
        .unwrap();

        assert!(input.shares_connection_with(&upstream));
        assert!(input.shares_connection_with(&output));
    }

    #[tokio::test]
    async fn test_forward_reference_falls_back_to_static_properties() {
        let ctx = PipelineContext::new();
        // conn_1 has not run yet; its static properties are known.
        let handle = resolve_connection(
            Some(&ctx),
            "input_1",
            Some("conn_1"),
            None,
            Some(&config("db://referenced")),
            open_fake,
        )
        .await
        .unwrap();

        assert_eq!(handle.connection().dsn, "db://referenced");
        // The fallback connection is not registered on behalf of conn_1.
        assert!(ctx.lookup::<FakeConnection>("conn_1").is_none());
    }

    #[tokio::test]
    async fn test_design_time_resolution_without_context() {
        let handle = resolve_connection(
            None,
            "input_1",
            Some("conn_1"),
            None,
            Some(&config("db://design")),
            open_fake,
        )
        .await
        .unwrap();
        assert_eq!(handle.connection().dsn, "db://design");
    }

    #[tokio::test]
    async fn test_unresolvable_reference_is_an_error() {
        let ctx = PipelineContext::new();
        let err = resolve_connection::<FakeConnection, FakeConfig, _, _>(
            Some(&ctx),
            "input_1",
            Some("conn_1"),
            None,
            None,
            open_fake,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ConnectorError::ConnectionResolution { .. }));
    }

    #[tokio::test]
    async fn test_lookup_is_typed() {
        let ctx = PipelineContext::new();
        let handle = ConnectionHandle::new("conn_1", FakeConnection { dsn: "x".into() });
        ctx.register("conn_1", &handle);
        assert!(ctx.lookup::<FakeConnection>("conn_1").is_some());
        assert!(ctx.lookup::<String>("conn_1").is_none());
    }
}
