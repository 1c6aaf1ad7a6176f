use quizroom::prelude::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), QuizroomError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let addr = std::env::var("QUIZROOM_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let builder = QuizServer::builder()
        .bind(&addr)
        .source(TrackCatalog::demo());

    // Sessions survive restarts only when a data directory is given.
    match std::env::var("QUIZROOM_DATA_DIR") {
        Ok(dir) => {
            let store = FileStore::open(&dir).await?;
            tracing::info!(%dir, "persisting sessions to disk");
            builder.store(store).build().await?.run().await
        }
        Err(_) => builder.build().await?.run().await,
    }
}
