//! Client calls against a real dispatcher on a loopback port.

use std::time::{Duration, Instant};

use apiwire::{Dispatcher, ServerConfig};
use apiwire_client::{CallOptions, Client, ClientError, HttpExec, HyperExec};
use apiwire_core::{
    Body, BoxError, CallContext, Code, ErrorRegistry, Field, HttpStatus, JsonTransport,
    RemoteError, Route, Wire,
};
use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Serialize, Deserialize)]
struct ListPosts {
    #[serde(skip)]
    user: String,
    #[serde(skip)]
    limit: u32,
    #[serde(skip)]
    tenant: String,
}

impl Wire for ListPosts {
    fn fields() -> Vec<Field<Self>> {
        vec![
            Field::new("user").path("user").text(|r: &mut Self| &mut r.user),
            Field::new("limit").query("limit").text(|r: &mut Self| &mut r.limit),
            Field::new("tenant")
                .header("x-tenant")
                .text(|r: &mut Self| &mut r.tenant),
        ]
    }
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
struct Posts {
    user: String,
    tenant: String,
    titles: Vec<String>,
}

impl Wire for Posts {
    fn fields() -> Vec<Field<Self>> {
        vec![Field::new("user"), Field::new("tenant"), Field::new("titles")]
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DeletePost {
    #[serde(skip)]
    id: u64,
}

impl Wire for DeletePost {
    fn fields() -> Vec<Field<Self>> {
        vec![Field::new("id").path("id").text(|r: &mut Self| &mut r.id)]
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Deleted {
    id: u64,
}

impl Wire for Deleted {
    fn fields() -> Vec<Field<Self>> {
        vec![Field::new("id")]
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FindKey {
    #[serde(skip)]
    key: String,
}

impl Wire for FindKey {
    fn fields() -> Vec<Field<Self>> {
        vec![Field::new("key").path("key").text(|r: &mut Self| &mut r.key)]
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Lookup {
    #[serde(skip)]
    status: u16,
    found: bool,
}

impl Wire for Lookup {
    fn fields() -> Vec<Field<Self>> {
        vec![
            Field::new("status").status(|r: &mut Self| &mut r.status),
            Field::new("found"),
        ]
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Nap {
    millis: u64,
}

impl Wire for Nap {
    fn fields() -> Vec<Field<Self>> {
        vec![Field::new("millis")]
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Woke {
    slept: u64,
}

impl Wire for Woke {
    fn fields() -> Vec<Field<Self>> {
        vec![Field::new("slept")]
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("user {user} may not {action}")]
struct Forbidden {
    user: String,
    action: String,
}

impl HttpStatus for Forbidden {
    fn http_status(&self) -> StatusCode {
        StatusCode::FORBIDDEN
    }
}

#[derive(Debug, thiserror::Error)]
#[error("access check failed")]
struct AccessCheck(#[source] Forbidden);

#[derive(Debug, thiserror::Error)]
#[error("delete rejected")]
struct Rejected(#[source] AccessCheck);

async fn list_posts(_ctx: CallContext, req: ListPosts) -> Result<Posts, BoxError> {
    let titles = (1..=req.limit).map(|i| format!("post {i}")).collect();
    Ok(Posts {
        user: req.user,
        tenant: req.tenant,
        titles,
    })
}

async fn delete_post(_ctx: CallContext, req: DeletePost) -> Result<Deleted, BoxError> {
    match req.id {
        0 => Err(Rejected(AccessCheck(Forbidden {
            user: "eve".into(),
            action: "delete".into(),
        }))
        .into()),
        1 => Err("disk on fire".into()),
        id => Ok(Deleted { id }),
    }
}

async fn find_key(_ctx: CallContext, req: FindKey) -> Result<Lookup, BoxError> {
    let found = req.key == "known";
    Ok(Lookup {
        status: if found { 200 } else { 404 },
        found,
    })
}

async fn nap(_ctx: CallContext, req: Nap) -> Result<Woke, BoxError> {
    tokio::time::sleep(Duration::from_millis(req.millis)).await;
    Ok(Woke { slept: req.millis })
}

fn routes() -> Vec<Route> {
    let transport =
        JsonTransport::new(ErrorRegistry::new().register_with_status::<Forbidden>("Forbidden"));
    vec![
        Route::new(Method::GET, "/users/:user/posts", list_posts),
        Route::with_transport(Method::POST, "/posts/:id/delete", transport, delete_post),
        Route::new(Method::GET, "/keys/:key", find_key),
        Route::new(Method::POST, "/nap", nap),
    ]
}

/// Serve the routes on a loopback port and return the base URL.
async fn serve() -> anyhow::Result<String> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = Dispatcher::new(routes(), ServerConfig::new())?.into_router();
    tokio::spawn(async move { axum::serve(listener, app).await });
    Ok(format!("http://{addr}"))
}

async fn client() -> anyhow::Result<Client> {
    let base_url = serve().await?;
    Ok(Client::builder(routes(), base_url).build()?)
}

#[tokio::test]
async fn test_round_trip() -> anyhow::Result<()> {
    let client = client().await?;

    let request = ListPosts {
        user: "ann".into(),
        limit: 2,
        tenant: "acme".into(),
    };
    let posts: Posts = client.call(request).await?;
    assert_eq!(
        posts,
        Posts {
            user: "ann".into(),
            tenant: "acme".into(),
            titles: vec!["post 1".into(), "post 2".into()],
        }
    );

    let deleted: Deleted = client.call(DeletePost { id: 9 }).await?;
    assert_eq!(deleted.id, 9);

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn test_path_values_with_reserved_characters() -> anyhow::Result<()> {
    let client = client().await?;

    let request = ListPosts {
        user: "ann lee/admin?#%".into(),
        limit: 1,
        tenant: "acme".into(),
    };
    let posts: Posts = client.call(request).await?;
    assert_eq!(posts.user, "ann lee/admin?#%");
    assert_eq!(posts.titles, vec!["post 1".to_owned()]);
    Ok(())
}

#[tokio::test]
async fn test_typed_error_through_wrapping_layers() -> anyhow::Result<()> {
    let client = client().await?;

    let err = client
        .call::<DeletePost, Deleted>(DeletePost { id: 0 })
        .await
        .unwrap_err();
    assert_eq!(
        err.remote::<Forbidden>(),
        Some(&Forbidden {
            user: "eve".into(),
            action: "delete".into(),
        })
    );
    Ok(())
}

#[tokio::test]
async fn test_unregistered_error_keeps_text() -> anyhow::Result<()> {
    let client = client().await?;

    let err = client
        .call::<DeletePost, Deleted>(DeletePost { id: 1 })
        .await
        .unwrap_err();
    let remote = err.remote::<RemoteError>().unwrap();
    assert_eq!(remote.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(remote.message, "disk on fire");
    assert!(err.to_string().contains("disk on fire"));
    Ok(())
}

#[tokio::test]
async fn test_status_field_bypasses_error_decoding() -> anyhow::Result<()> {
    let client = client().await?;

    let missing: Lookup = client.call(FindKey { key: "other".into() }).await?;
    assert_eq!(missing.status, 404);
    assert!(!missing.found);

    let known: Lookup = client.call(FindKey { key: "known".into() }).await?;
    assert_eq!(known.status, 200);
    assert!(known.found);
    Ok(())
}

#[tokio::test]
async fn test_human_output() -> anyhow::Result<()> {
    let base_url = serve().await?;

    let exec = HyperExec::new()?;
    let request = http::Request::get(format!("{base_url}/keys/known?human=on")).body(Body::empty())?;
    let response = exec.execute(request).await?;
    let body = response.into_body().collect_limited(None).await?;
    let text = std::str::from_utf8(&body)?;
    assert!(text.contains("\n  \"found\": true"), "{text}");

    let client = Client::builder(routes(), base_url).human(true).build()?;
    let known: Lookup = client.call(FindKey { key: "known".into() }).await?;
    assert!(known.found);
    Ok(())
}

#[tokio::test]
async fn test_hyper_exec_as_tower_service() -> anyhow::Result<()> {
    use tower_service::Service;

    let base_url = serve().await?;
    let mut exec = HyperExec::new()?;
    futures::future::poll_fn(|cx| exec.poll_ready(cx)).await?;

    let request = http::Request::get(format!("{base_url}/keys/other")).body(Body::empty())?;
    let response = exec.call(request).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = response.into_body().collect_limited(None).await?;
    let value: serde_json::Value = serde_json::from_slice(&body)?;
    assert_eq!(value, serde_json::json!({"found": false}));
    Ok(())
}

#[tokio::test]
async fn test_call_timeout() -> anyhow::Result<()> {
    let client = client().await?;

    let options = CallOptions::new().timeout(Duration::from_millis(50));
    let err = client
        .call_with_options::<Nap, Woke>(Nap { millis: 5_000 }, options)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::DeadlineExceeded));
    assert_eq!(err.code(), Code::DeadlineExceeded);

    let woke: Woke = client.call(Nap { millis: 1 }).await?;
    assert_eq!(woke.slept, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_under_load() -> anyhow::Result<()> {
    let client = client().await?;

    let calls: Vec<_> = (0..8)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.call::<Nap, Woke>(Nap { millis: 30_000 }).await })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = Instant::now();
    client.close().await;
    assert!(started.elapsed() < Duration::from_millis(50));

    // the handlers sleep for 30s, so every call ended by being aborted
    for call in calls {
        let result = tokio::time::timeout(Duration::from_millis(50), call).await??;
        assert!(matches!(result, Err(ClientError::Canceled)));
    }

    let err = client.call::<Nap, Woke>(Nap { millis: 1 }).await.unwrap_err();
    assert!(matches!(err, ClientError::Closing));
    assert_eq!(err.code(), Code::Unavailable);
    Ok(())
}
