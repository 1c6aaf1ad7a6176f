//! `QuizServer` builder and accept loop.
//!
//! This is the entry point for running a trivia server. It ties the
//! layers together: transport → protocol → session registry → rooms.

use std::sync::Arc;
use std::time::Duration;

use quizroom_protocol::{Codec, JsonCodec};
use quizroom_room::{
    GameConfig, NoStore, QuestionSource, RegistryConfig, SessionRegistry,
    SessionStore, TrackCatalog,
};
use quizroom_transport::{Transport, WebSocketTransport};
use tokio::task::JoinHandle;

use crate::QuizroomError;
use crate::handler::handle_connection;

/// Shared server state passed to each connection task.
pub(crate) struct ServerState<Q, S, C> {
    pub(crate) registry: Arc<SessionRegistry<Q, S>>,
    pub(crate) codec: C,
    pub(crate) idle_timeout: Duration,
}

/// Builder for configuring and starting a Quizroom server.
///
/// Defaults: bind `127.0.0.1:8080`, the built-in demo track catalog, no
/// persistence, and a 60 second idle timeout per connection.
///
/// # Example
///
/// ```rust,ignore
/// use quizroom::prelude::*;
///
/// let server = QuizServer::builder()
///     .bind("0.0.0.0:8080")
///     .store(FileStore::open("data").await?)
///     .build()
///     .await?;
/// server.run().await
/// ```
pub struct QuizServerBuilder<Q = TrackCatalog, S = NoStore> {
    bind_addr: String,
    game_config: GameConfig,
    registry_config: RegistryConfig,
    idle_timeout: Duration,
    source: Q,
    store: S,
}

impl QuizServerBuilder {
    /// Creates a builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            game_config: GameConfig::default(),
            registry_config: RegistryConfig::default(),
            idle_timeout: Duration::from_secs(60),
            source: TrackCatalog::demo(),
            store: NoStore,
        }
    }
}

impl Default for QuizServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl<Q, S> QuizServerBuilder<Q, S> {
    /// Sets the address to bind to. Port 0 lets the OS choose.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Game settings applied to every new room.
    pub fn game_config(mut self, config: GameConfig) -> Self {
        self.game_config = config;
        self
    }

    pub fn registry_config(mut self, config: RegistryConfig) -> Self {
        self.registry_config = config;
        self
    }

    /// How long a connection may stay silent before it is closed.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Replaces the question source.
    pub fn source<Q2>(self, source: Q2) -> QuizServerBuilder<Q2, S> {
        QuizServerBuilder {
            bind_addr: self.bind_addr,
            game_config: self.game_config,
            registry_config: self.registry_config,
            idle_timeout: self.idle_timeout,
            source,
            store: self.store,
        }
    }

    /// Replaces the session store.
    pub fn store<S2>(self, store: S2) -> QuizServerBuilder<Q, S2> {
        QuizServerBuilder {
            bind_addr: self.bind_addr,
            game_config: self.game_config,
            registry_config: self.registry_config,
            idle_timeout: self.idle_timeout,
            source: self.source,
            store,
        }
    }
}

impl<Q: QuestionSource, S: SessionStore> QuizServerBuilder<Q, S> {
    /// Binds the listener, creates the registry, and starts its sweeper.
    ///
    /// Uses `JsonCodec` and `WebSocketTransport`.
    pub async fn build(self) -> Result<QuizServer<Q, S, JsonCodec>, QuizroomError> {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;

        let registry = Arc::new(SessionRegistry::with_store(
            self.source,
            self.store,
            self.game_config,
            self.registry_config,
        ));
        let sweeper = registry.spawn_sweeper();

        let state = Arc::new(ServerState {
            registry,
            codec: JsonCodec,
            idle_timeout: self.idle_timeout,
        });

        Ok(QuizServer {
            transport,
            state,
            sweeper,
        })
    }
}

/// A bound Quizroom server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct QuizServer<Q, S, C> {
    transport: WebSocketTransport,
    state: Arc<ServerState<Q, S, C>>,
    sweeper: JoinHandle<()>,
}

impl QuizServer<TrackCatalog, NoStore, JsonCodec> {
    /// Creates a new builder.
    pub fn builder() -> QuizServerBuilder {
        QuizServerBuilder::new()
    }
}

impl<Q, S, C> QuizServer<Q, S, C>
where
    Q: QuestionSource,
    S: SessionStore,
    C: Codec,
{
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, QuizroomError> {
        Ok(self.transport.local_addr()?)
    }

    /// The registry behind this server, for inspection and admin tasks.
    pub fn registry(&self) -> &Arc<SessionRegistry<Q, S>> {
        &self.state.registry
    }

    /// Runs the accept loop.
    ///
    /// Each accepted connection gets its own task. Runs until the
    /// process is terminated.
    pub async fn run(mut self) -> Result<(), QuizroomError> {
        tracing::info!("quizroom server running");

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(
                                error = %e,
                                "connection ended with error"
                            );
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}

impl<Q, S, C> Drop for QuizServer<Q, S, C> {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}
