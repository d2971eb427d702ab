//! Local HTTP stub for exercising the token endpoint and device API.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use url::Url;

use crate::config::Config;

/// A request as seen by the stub.
#[derive(Clone, Debug, Default)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Value of a form field in an urlencoded body.
    pub fn form(&self, name: &str) -> Option<String> {
        url::form_urlencoded::parse(self.body.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }
}

type Responder = dyn Fn(&Recorded) -> (u16, String) + Send + Sync;

pub struct StubServer {
    pub origin: Url,
    requests: Arc<Mutex<Vec<Recorded>>>,
    hits: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl StubServer {
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(&Recorded) -> (u16, String) + Send + Sync + 'static,
    {
        Self::with_delay(Duration::ZERO, responder).await
    }

    /// Like [`StubServer::start`], but holds every response for `delay`.
    pub async fn with_delay<F>(delay: Duration, responder: F) -> Self
    where
        F: Fn(&Recorded) -> (u16, String) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let origin = Url::parse(&format!("http://{}/", listener.local_addr().unwrap())).unwrap();

        let requests = Arc::new(Mutex::new(Vec::new()));
        let hits = Arc::new(AtomicUsize::new(0));
        let responder: Arc<Responder> = Arc::new(responder);

        let task = tokio::spawn({
            let requests = Arc::clone(&requests);
            let hits = Arc::clone(&hits);
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let requests = Arc::clone(&requests);
                    let hits = Arc::clone(&hits);
                    let responder = Arc::clone(&responder);
                    tokio::spawn(async move {
                        let mut reader = BufReader::new(stream);
                        let Some(request) = read_request(&mut reader).await else {
                            return;
                        };
                        hits.fetch_add(1, Ordering::SeqCst);
                        requests.lock().unwrap().push(request.clone());

                        let (status, body) = responder(&request);
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        write_response(reader.into_inner(), status, &body).await;
                    });
                }
            }
        });

        Self {
            origin,
            requests,
            hits,
            task,
        }
    }

    /// Production configuration with all HTTP endpoints on this stub.
    pub fn config(&self) -> Config {
        Config::new("client-id", "client-secret")
            .unwrap()
            .with_http_origin(&self.origin)
            .unwrap()
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn read_request(reader: &mut BufReader<TcpStream>) -> Option<Recorded> {
    let mut line = String::new();
    reader.read_line(&mut line).await.ok()?;
    let mut parts = line.split_whitespace();
    let mut request = Recorded {
        method: parts.next()?.to_owned(),
        path: parts.next()?.to_owned(),
        ..Default::default()
    };

    let mut content_length = 0;
    loop {
        line.clear();
        reader.read_line(&mut line).await.ok()?;
        let header = line.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((key, value)) = header.split_once(':') {
            let value = value.trim().to_owned();
            if key.eq_ignore_ascii_case("content-length") {
                content_length = value.parse().ok()?;
            }
            request.headers.push((key.to_owned(), value));
        }
    }

    let mut body = vec![0; content_length];
    reader.read_exact(&mut body).await.ok()?;
    request.body = String::from_utf8(body).ok()?;

    Some(request)
}

async fn write_response(mut stream: TcpStream, status: u16, body: &str) {
    let response = format!(
        "HTTP/1.1 {status} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    if stream.write_all(response.as_bytes()).await.is_ok() {
        let _ = stream.shutdown().await;
    }
}

/// Token endpoint body with the given access token and a one hour lifetime.
pub fn token_body(access_token: &str) -> String {
    format!(
        r#"{{"access_token":"{access_token}","refresh_token":"refresh-{access_token}","id_token":"id-{access_token}","token_type":"Bearer","expires_in":3600}}"#
    )
}
