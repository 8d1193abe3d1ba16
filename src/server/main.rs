// Entry point for the staffetta messaging server
use std::fs::File;
use std::io::BufReader as StdBufReader;
use std::sync::Arc;

use log::{error, info};
use rustls::ServerConfig as RustlsConfig;
use rustls_pemfile::{certs, pkcs8_private_keys, rsa_private_keys};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use staffetta::server::auth::{IdentityProvider, SessionAuth};
use staffetta::server::config::ServerConfig;
use staffetta::server::database::Database;
use staffetta::server::groups::{GroupDirectory, GroupProvider};
use staffetta::server::registry::SessionRegistry;
use staffetta::server::router::Router;
use staffetta::server::store::MessageStore;
use staffetta::server::websocket::ChatGateway;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    std::env::set_var("RUST_LOG", &log_level);
    env_logger::init();

    let config = ServerConfig::from_env();

    let database = Arc::new(Database::connect(&config.database_url).await?);
    info!("[DB] Running database migrations");
    database.migrate().await.map_err(|e| {
        error!("[DB] Migration failed: {}", e);
        e
    })?;

    let registry = Arc::new(SessionRegistry::new());
    let store = MessageStore::new(database.clone());
    let groups: Arc<dyn GroupProvider> = Arc::new(GroupDirectory::new(database.clone()));
    let identity: Arc<dyn IdentityProvider> = Arc::new(SessionAuth::new(database.clone()));
    let router = Arc::new(Router::new(registry, store, groups, &config));
    let gateway = Arc::new(ChatGateway::new(router, identity, &config));

    let tls_acceptor = match setup_tls_acceptor(&config) {
        Ok(Some(acceptor)) => {
            info!("[TLS] TLS enabled and configured");
            Some(acceptor)
        }
        Ok(None) => {
            info!("[TLS] TLS disabled; serving plain TCP");
            None
        }
        Err(e) => {
            error!("[TLS] TLS configuration failed: {}; falling back to plain TCP", e);
            None
        }
    };

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("[SERVER] Listening on {}", addr);

    loop {
        let (stream, peer) = listener.accept().await?;
        info!("[SERVER] New connection from {}", peer);
        let gateway = gateway.clone();
        let acceptor = tls_acceptor.clone();
        tokio::spawn(async move {
            let result = match acceptor {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(tls_stream) => gateway.accept(tls_stream, peer).await,
                    Err(e) => {
                        error!("[TLS] TLS accept failed for {}: {}", peer, e);
                        return;
                    }
                },
                None => gateway.accept(stream, peer).await,
            };
            if let Err(e) = result {
                error!("[WS] Connection {} ended with error: {}", peer, e);
            }
        });
    }
}

/// Load certificate and key from TLS_CERT_PATH / TLS_KEY_PATH when TLS is
/// enabled. PKCS8 keys are tried first, then RSA.
fn setup_tls_acceptor(config: &ServerConfig) -> anyhow::Result<Option<TlsAcceptor>> {
    if !config.enable_tls {
        return Ok(None);
    }

    let cert_path = std::env::var("TLS_CERT_PATH")
        .map_err(|_| anyhow::anyhow!("TLS_CERT_PATH environment variable not set"))?;
    let key_path = std::env::var("TLS_KEY_PATH")
        .map_err(|_| anyhow::anyhow!("TLS_KEY_PATH environment variable not set"))?;

    let cert_file = File::open(&cert_path)
        .map_err(|e| anyhow::anyhow!("Failed to open certificate file '{}': {}", cert_path, e))?;
    let mut cert_reader = StdBufReader::new(cert_file);
    let cert_chain = certs(&mut cert_reader)?
        .into_iter()
        .map(rustls::Certificate)
        .collect::<Vec<_>>();
    if cert_chain.is_empty() {
        return Err(anyhow::anyhow!("No certificates found in {}", cert_path));
    }
    info!("[TLS] Loaded {} certificate(s) from {}", cert_chain.len(), cert_path);

    let key_file = File::open(&key_path)
        .map_err(|e| anyhow::anyhow!("Failed to open private key file '{}': {}", key_path, e))?;
    let mut key_reader = StdBufReader::new(key_file);
    let mut keys = pkcs8_private_keys(&mut key_reader)?;
    if keys.is_empty() {
        let key_file = File::open(&key_path)?;
        let mut key_reader = StdBufReader::new(key_file);
        keys = rsa_private_keys(&mut key_reader)?;
    }
    if keys.is_empty() {
        return Err(anyhow::anyhow!("No private keys found in {}", key_path));
    }

    let priv_key = rustls::PrivateKey(keys.remove(0));
    let rustls_cfg = RustlsConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(cert_chain, priv_key)
        .map_err(|e| anyhow::anyhow!("TLS configuration error: {}", e))?;

    Ok(Some(TlsAcceptor::from(Arc::new(rustls_cfg))))
}
