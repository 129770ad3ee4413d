//! Client tests against an in-process server.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use client::transfer::{download_file, upload_file};
use client::{
    ClientError, RemoteBrowser, SessionToken, StorageClient, TokenRefresher, TransferOptions,
    DEFAULT_REFRESH_MARGIN,
};
use protocol::{ErrorKind, ServiceKey};
use server::auth::MemoryUserDirectory;
use server::{build_state, gateway, Config};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

struct TestServer {
    url: String,
    shutdown: CancellationToken,
    _temp_dir: TempDir,
}

impl TestServer {
    async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    async fn start_with(configure: impl FnOnce(&mut Config)) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.server.data_dir = temp_dir.path().to_path_buf();
        config.storage.root_dir = Some(temp_dir.path().join("storage"));
        config.storage.chunk_size = 5;
        configure(&mut config);

        let users = MemoryUserDirectory::new().with_user("alice", "alice", "wonderland");
        let state = build_state(&config, Arc::new(users), ServiceKey::generate());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let shutdown = CancellationToken::new();
        tokio::spawn(gateway::serve(
            listener,
            gateway::router(state),
            shutdown.clone(),
        ));

        Self {
            url,
            shutdown,
            _temp_dir: temp_dir,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn logged_in(server: &TestServer) -> StorageClient {
    let client = StorageClient::new(&server.url).unwrap();
    client.login("alice", "wonderland").await.unwrap();
    client
}

#[tokio::test]
async fn test_login_failure_maps_to_wrong_credentials() {
    let server = TestServer::start().await;
    let client = StorageClient::new(&server.url).unwrap();

    let err = client.login("alice", "nope").await.unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::WrongCredentials));
    assert_eq!(err.to_string(), "wrong credentials");
    assert!(!client.is_logged_in().await);
}

#[tokio::test]
async fn test_session_lifecycle() {
    let server = TestServer::start().await;
    let client = logged_in(&server).await;

    let session = client.session().await.unwrap();
    assert_eq!(session.root_dir, "alice/");

    let refreshed = client.refresh().await.unwrap();
    assert_eq!(client.session().await.unwrap(), refreshed);

    let who = client.validate().await.unwrap();
    assert_eq!(who.name, "alice");

    client.logout().await.unwrap();
    assert!(matches!(client.ls("/").await, Err(ClientError::NotLoggedIn)));
}

#[tokio::test]
async fn test_directory_operations_and_errors() {
    let server = TestServer::start().await;
    let client = logged_in(&server).await;

    assert_eq!(client.mkdir("/", "docs").await.unwrap().path, "/docs/");
    assert_eq!(client.mkdir("/docs/", "old").await.unwrap().path, "/docs/old/");
    client.rename("/docs/", "old", "new").await.unwrap();
    client.copy("/docs/", "new", "/").await.unwrap();
    client.move_entry("/", "new", "/docs/new/").await.unwrap();

    let err = client.cd("ghost").await.unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::NotFound));
    assert_eq!(err.to_string(), "directory ghost not found");

    let err = client.mkdir("/", "docs").await.unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::AlreadyExists));
    assert_eq!(err.to_string(), "docs already exists");

    let err = client.mkdir("/", "a/b").await.unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::BadRequest));

    let mut browser = RemoteBrowser::new(client.state().await.unwrap());
    assert_eq!(browser.cd("docs/new/new").unwrap(), "/docs/new/new/");
    assert_eq!(browser.ls("").unwrap(), vec!["Empty"]);

    client.delete("/", "docs").await.unwrap();
    assert!(client.ls("/").await.unwrap().empty);
}

#[tokio::test]
async fn test_upload_and_download_round_trip() {
    let server = TestServer::start().await;
    let client = logged_in(&server).await;
    let local = TempDir::new().unwrap();

    let source = local.path().join("report.txt");
    let contents: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    tokio::fs::write(&source, &contents).await.unwrap();

    client.mkdir("/", "docs").await.unwrap();
    let options = TransferOptions {
        chunk_size: 64,
        ..TransferOptions::default()
    };

    let mut last_progress = (0, 0);
    let message = upload_file(&client, &source, "/docs/", "report.txt", &options, |done, total| {
        last_progress = (done, total)
    })
    .await
    .unwrap();
    assert_eq!(message, protocol::UPLOAD_COMPLETED);
    assert_eq!(last_progress, (16, 16));

    let listing = client.ls("/docs/").await.unwrap();
    assert_eq!(listing.entries.len(), 1);
    assert_eq!(listing.entries[0].size, 1000);

    let dest = TempDir::new().unwrap();
    let written = download_file(&client, "/docs/", "report.txt", dest.path(), &options, |_, _| {})
        .await
        .unwrap();
    assert_eq!(tokio::fs::read(written).await.unwrap(), contents);
}

#[tokio::test]
async fn test_download_missing_file_fails_fast() {
    let server = TestServer::start().await;
    let client = logged_in(&server).await;
    let dest = TempDir::new().unwrap();

    let err = download_file(
        &client,
        "/",
        "ghost.bin",
        dest.path(),
        &TransferOptions::default(),
        |_, _| {},
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::NotFound));
    assert!(!dest.path().join("ghost.bin").exists());
}

#[tokio::test]
async fn test_refresher_renews_short_lived_credential() {
    let server = TestServer::start_with(|config| config.auth.token_ttl_secs = 2).await;
    let client = logged_in(&server).await;
    let before = client.session().await.unwrap();

    let refresher = TokenRefresher::start(client.clone(), DEFAULT_REFRESH_MARGIN);
    let renewed = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let current = client.session().await.unwrap();
            if current.expires_at > before.expires_at {
                return current;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .unwrap();

    assert_ne!(renewed.token, before.token);
    assert_eq!(renewed.root_dir, before.root_dir);
    assert!(refresher.is_running());
    refresher.stop().await;
}

#[tokio::test]
async fn test_refresher_stops_on_rejected_credential() {
    let server = TestServer::start().await;
    let client = StorageClient::new(&server.url).unwrap();
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
    client
        .set_session(Some(SessionToken {
            token: "forged.token".into(),
            expires_at: now + 1,
            root_dir: "alice/".into(),
        }))
        .await;

    let refresher = TokenRefresher::start(client.clone(), DEFAULT_REFRESH_MARGIN);
    tokio::time::timeout(Duration::from_secs(10), async {
        while refresher.is_running() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(client.session().await.unwrap().token, "forged.token");
}
