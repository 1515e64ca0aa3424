use crate::{
    api,
    cli::{
        commands::{identity, store},
        telemetry,
    },
    identity::{
        IdentityProvider, firebase::FirebaseIdentityProvider, memory::MemoryIdentityProvider,
    },
    store::{DocumentStore, memory::MemoryDocumentStore, postgres::PgDocumentStore},
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub cors_origin: Option<String>,
    pub identity: identity::Options,
    pub store: store::Options,
}

/// Execute the server action.
/// # Errors
/// Returns an error if a backend cannot be initialized or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let provider = identity_provider(args.identity).await?;
    let store = document_store(args.store).await?;

    let result = api::serve(args.port, args.cors_origin.as_deref(), provider, store).await;
    telemetry::shutdown_tracer();
    result
}

async fn identity_provider(options: identity::Options) -> Result<Arc<dyn IdentityProvider>> {
    match options {
        identity::Options::Memory => {
            warn!("Using in-memory identity provider; accounts are lost on restart");
            Ok(Arc::new(MemoryIdentityProvider::signed_out()))
        }
        identity::Options::Firebase {
            config,
            refresh_token,
        } => {
            let provider = FirebaseIdentityProvider::new(config)
                .context("Failed to build Firebase identity provider")?;
            provider.initialize(refresh_token).await;
            info!("Firebase identity provider ready");
            Ok(Arc::new(provider))
        }
    }
}

async fn document_store(options: store::Options) -> Result<Arc<dyn DocumentStore>> {
    match options {
        store::Options::Memory => {
            warn!("Using in-memory document store; profiles are lost on restart");
            Ok(Arc::new(MemoryDocumentStore::new()))
        }
        store::Options::Postgres { dsn } => {
            let store = PgDocumentStore::connect(&dsn)
                .await
                .context("Failed to connect to database")?;
            store
                .ensure_schema()
                .await
                .context("Failed to create documents table")?;
            Ok(Arc::new(store))
        }
    }
}
