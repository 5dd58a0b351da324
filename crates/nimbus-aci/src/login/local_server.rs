//! Loopback HTTP listener receiving the OAuth2 redirect.
//!
//! Azure AD only redirects to registered hosts, so the listener binds
//! `localhost` (not `127.0.0.1`) on an ephemeral port and parses exactly the
//! one GET request the authorization page issues.

use std::collections::HashMap;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use nimbus_common::error::{NimbusError, Result};

const FAIL_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8" />
    <title>Login failed</title>
</head>
<body>
    <h4>Some failures occurred during the authentication</h4>
    <p>You can close this window and retry from the terminal.</p>
</body>
</html>
"#;

const SUCCESS_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8" />
    <title>Login successful</title>
</head>
<body>
    <h4>You have logged into Microsoft Azure!</h4>
    <p>You can close this window and return to the terminal.</p>
</body>
</html>
"#;

const REDIRECT_HOST: &str = "localhost";

/// Redirect query parameters delivered by the browser.
pub type LocalResponse = Result<HashMap<String, String>>;

/// One-shot login redirect server.
#[derive(Debug)]
pub struct LocalServer {
    port: u16,
}

impl LocalServer {
    /// Binds an ephemeral port on `localhost` and starts serving the single
    /// expected redirect in a background task.
    ///
    /// # Errors
    ///
    /// Returns an error when the port cannot be bound.
    pub async fn start() -> Result<(Self, mpsc::Receiver<LocalResponse>)> {
        let listener = TcpListener::bind((REDIRECT_HOST, 0))
            .await
            .map_err(|e| NimbusError::Io {
                path: REDIRECT_HOST.into(),
                source: e,
            })?;
        let port = listener
            .local_addr()
            .map_err(|e| NimbusError::Io {
                path: REDIRECT_HOST.into(),
                source: e,
            })?
            .port();
        if port == 0 {
            return Err(NimbusError::LoginFailed {
                message: "unable to allocate login server port".to_owned(),
            });
        }

        let (tx, rx) = mpsc::channel(1);
        drop(tokio::spawn(serve_one(listener, tx)));
        Ok((Self { port }, rx))
    }

    /// Address the browser is redirected to.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("http://{REDIRECT_HOST}:{}", self.port)
    }
}

async fn serve_one(listener: TcpListener, tx: mpsc::Sender<LocalResponse>) {
    let result = accept_redirect(&listener).await;
    let _ = tx.send(result).await;
}

async fn accept_redirect(listener: &TcpListener) -> LocalResponse {
    let (mut stream, _) = listener.accept().await.map_err(|e| NimbusError::Io {
        path: REDIRECT_HOST.into(),
        source: e,
    })?;

    let mut buffer = vec![0_u8; 8192];
    let read = stream.read(&mut buffer).await.map_err(|e| NimbusError::Io {
        path: REDIRECT_HOST.into(),
        source: e,
    })?;
    let request = String::from_utf8_lossy(&buffer[..read]).into_owned();
    let values = parse_request_query(&request);

    let html = if values.contains_key("code") {
        SUCCESS_HTML
    } else {
        FAIL_HTML
    };
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{html}",
        html.len(),
    );
    stream
        .write_all(response.as_bytes())
        .await
        .map_err(|e| NimbusError::Io {
            path: REDIRECT_HOST.into(),
            source: e,
        })?;
    let _ = stream.shutdown().await;

    Ok(values)
}

/// Extracts query parameters from the request line of an HTTP/1.1 GET.
fn parse_request_query(request: &str) -> HashMap<String, String> {
    let Some(line) = request.lines().next() else {
        return HashMap::new();
    };
    let Some(path) = line.split_whitespace().nth(1) else {
        return HashMap::new();
    };
    let Ok(parsed) = url::Url::parse(&format!("http://{REDIRECT_HOST}{path}")) else {
        return HashMap::new();
    };
    parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_code_and_state_from_request_line() {
        let request = "GET /?code=abc123&state=xyz HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let values = parse_request_query(request);
        assert_eq!(values.get("code").map(String::as_str), Some("abc123"));
        assert_eq!(values.get("state").map(String::as_str), Some("xyz"));
    }

    #[test]
    fn decodes_percent_encoded_values() {
        let request = "GET /?error=access_denied&error_description=user%20canceled HTTP/1.1\r\n\r\n";
        let values = parse_request_query(request);
        assert_eq!(
            values.get("error_description").map(String::as_str),
            Some("user canceled")
        );
    }

    #[test]
    fn malformed_requests_produce_no_values() {
        assert!(parse_request_query("").is_empty());
        assert!(parse_request_query("BOGUS").is_empty());
    }

    #[tokio::test]
    async fn delivers_redirect_query_over_the_channel() {
        let (server, mut rx) = LocalServer::start().await.expect("start");
        let addr = server.addr();

        let client = tokio::spawn(async move {
            let url = format!("{addr}/?code=thecode&state=thestate");
            reqwest::get(&url).await.expect("request").text().await.expect("body")
        });

        let values = rx.recv().await.expect("response").expect("values");
        assert_eq!(values.get("code").map(String::as_str), Some("thecode"));
        let body = client.await.expect("client");
        assert!(body.contains("logged into Microsoft Azure"));
    }
}
