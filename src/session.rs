use crate::error::{AuthError, TransportError};
use log::{debug, info};
use reqwest::Client;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Login endpoint of the DSM web interface
pub const LOGIN_PATH: &str = "/webman/login.cgi";

/// HTTP method of a management API call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// One call against the management API
///
/// GET parameters travel in the query string, POST parameters as a form body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub params: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn get(path: &str) -> Self {
        Self {
            method: Method::Get,
            path: path.to_string(),
            params: Vec::new(),
        }
    }

    pub fn post(path: &str) -> Self {
        Self {
            method: Method::Post,
            path: path.to_string(),
            params: Vec::new(),
        }
    }

    pub fn param(mut self, key: &str, value: impl ToString) -> Self {
        self.params.push((key.to_string(), value.to_string()));
        self
    }
}

/// Authenticated access to the management API
///
/// Returns the raw response body; interpreting it is up to the caller.
pub trait ApiTransport: Send + Sync {
    fn request<'a>(
        &'a self,
        request: &'a ApiRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, TransportError>> + Send + 'a>>;
}

/// HTTP client settings for the management API
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Timeout applied to every request, login included
    pub timeout: Duration,
    /// Accept self-signed certificates, common on NAS appliances
    pub accept_invalid_certs: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            accept_invalid_certs: false,
        }
    }
}

/// One authenticated session against the management API
///
/// Created once at startup by [`Session::login`] and reused for the lifetime
/// of the process. The session cookie lives in the client's cookie store and
/// is never refreshed; a session the NAS expires turns later requests into
/// transport errors.
pub struct Session {
    client: Client,
    address: String,
}

impl Session {
    /// Log in and return the authenticated session
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Unreachable` if the NAS cannot be reached and
    /// `AuthError::Rejected` if it refuses the credentials.
    pub async fn login(
        address: &str,
        username: &str,
        password: &str,
        options: &ClientOptions,
    ) -> Result<Self, AuthError> {
        let client = Client::builder()
            .cookie_store(true)
            .timeout(options.timeout)
            .danger_accept_invalid_certs(options.accept_invalid_certs)
            .build()
            .map_err(|e| AuthError::Client(e.to_string()))?;

        let session = Self {
            client,
            address: address.trim_end_matches('/').to_string(),
        };

        debug!("Logging in to {} as {}", session.address, username);

        let response = session
            .client
            .post(session.url(LOGIN_PATH))
            .form(&[("username", username), ("passwd", password)])
            .send()
            .await
            .map_err(|e| AuthError::Unreachable {
                address: session.address.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Rejected {
                address: session.address.clone(),
                reason: format!("HTTP {}", status),
            });
        }

        let body = response.text().await.map_err(|e| AuthError::Unreachable {
            address: session.address.clone(),
            reason: e.to_string(),
        })?;

        check_login_reply(&body).map_err(|reason| AuthError::Rejected {
            address: session.address.clone(),
            reason,
        })?;

        info!("Logged in to {} as {}", session.address, username);
        Ok(session)
    }

    /// Base address the session is bound to
    pub fn address(&self) -> &str {
        &self.address
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.address, path.trim_start_matches('/'))
    }
}

/// Inspect the body of a login reply
///
/// DSM answers `{"success": false, ...}` with HTTP 200 when it rejects the
/// credentials. Bodies that are not JSON carry no verdict and are accepted.
fn check_login_reply(body: &str) -> Result<(), String> {
    let reply: serde_json::Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(_) => return Ok(()),
    };

    if reply.get("success").and_then(|v| v.as_bool()) == Some(false) {
        let reason = reply
            .get("reason")
            .or_else(|| reply.get("error"))
            .map(|v| match v.as_str() {
                Some(s) => s.to_string(),
                None => v.to_string(),
            })
            .unwrap_or_else(|| "credentials refused".to_string());
        return Err(reason);
    }

    Ok(())
}

impl ApiTransport for Session {
    fn request<'a>(
        &'a self,
        request: &'a ApiRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            let url = self.url(&request.path);
            debug!("{:?} {} {:?}", request.method, url, request.params);

            let builder = match request.method {
                Method::Get => self.client.get(&url).query(&request.params),
                Method::Post => self.client.post(&url).form(&request.params),
            };

            let request_failed = |e: reqwest::Error| TransportError::Request {
                path: request.path.clone(),
                reason: e.to_string(),
            };

            let response = builder.send().await.map_err(request_failed)?;

            let status = response.status();
            if !status.is_success() {
                return Err(TransportError::Status {
                    path: request.path.clone(),
                    status: status.as_u16(),
                });
            }

            response.text().await.map_err(request_failed)
        })
    }
}

/// Scripted transport for tests
///
/// Each path answers from its own list of responses, in order; after the last
/// one the list cycles back to the first. Paths without a script answer HTTP
/// 404.
#[derive(Clone, Default)]
pub struct MockTransport {
    responses: Arc<Mutex<HashMap<String, Vec<Result<String, TransportError>>>>>,
    cursors: Arc<Mutex<HashMap<String, usize>>>,
    requests: Arc<Mutex<Vec<ApiRequest>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer `path` with `body`
    pub fn respond(&self, path: &str, body: impl Into<String>) -> &Self {
        self.script(path, vec![Ok(body.into())])
    }

    /// Always fail requests to `path`
    pub fn fail(&self, path: &str, error: TransportError) -> &Self {
        self.script(path, vec![Err(error)])
    }

    /// Answer `path` with `responses` in order
    pub fn script(&self, path: &str, responses: Vec<Result<String, TransportError>>) -> &Self {
        self.responses
            .lock()
            .unwrap()
            .insert(path.to_string(), responses);
        self.cursors.lock().unwrap().insert(path.to_string(), 0);
        self
    }

    /// Number of requests made to `path`
    pub fn call_count(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .count()
    }

    /// Every request made so far, oldest first
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl ApiTransport for MockTransport {
    fn request<'a>(
        &'a self,
        request: &'a ApiRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            self.requests.lock().unwrap().push(request.clone());

            let responses = self.responses.lock().unwrap();
            let script = match responses.get(&request.path) {
                Some(script) if !script.is_empty() => script,
                _ => {
                    return Err(TransportError::Status {
                        path: request.path.clone(),
                        status: 404,
                    })
                }
            };

            let mut cursors = self.cursors.lock().unwrap();
            let index = cursors.entry(request.path.clone()).or_insert(0);
            let response = script[*index % script.len()].clone();
            *index += 1;
            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn http_response(status_line: &str, headers: &[&str], body: &str) -> String {
        let mut response = format!("{}\r\n", status_line);
        for header in headers {
            response.push_str(header);
            response.push_str("\r\n");
        }
        response.push_str(&format!(
            "Content-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        ));
        response
    }

    /// Read one request, headers and body, from `stream`
    async fn read_request(stream: &mut TcpStream) -> String {
        let mut raw = Vec::new();
        let mut buf = [0u8; 4096];

        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);

            let text = String::from_utf8_lossy(&raw).to_string();
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        if name.eq_ignore_ascii_case("content-length") {
                            value.trim().parse::<usize>().ok()
                        } else {
                            None
                        }
                    })
                    .unwrap_or(0);
                if raw.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }

        String::from_utf8_lossy(&raw).to_string()
    }

    /// Answer one request per connection with `responses`, in order, and
    /// return the raw requests
    async fn serve(listener: TcpListener, responses: Vec<String>) -> Vec<String> {
        let mut requests = Vec::new();
        for response in responses {
            let (mut stream, _) = listener.accept().await.unwrap();
            requests.push(read_request(&mut stream).await);
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
        }
        requests
    }

    async fn fake_nas(responses: Vec<String>) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = format!("http://127.0.0.1:{}", listener.local_addr().unwrap().port());
        (address, tokio::spawn(serve(listener, responses)))
    }

    fn options() -> ClientOptions {
        ClientOptions {
            timeout: Duration::from_secs(5),
            accept_invalid_certs: false,
        }
    }

    #[tokio::test]
    async fn test_login_then_requests_reuse_session_cookie() {
        let (address, server) = fake_nas(vec![
            http_response(
                "HTTP/1.1 200 OK",
                &["Set-Cookie: id=abc; Path=/"],
                r#"{"success": true}"#,
            ),
            http_response("HTTP/1.1 200 OK", &[], r#"{"items": []}"#),
            http_response("HTTP/1.1 200 OK", &[], r#"{"cpu": {"values": []}}"#),
            http_response("HTTP/1.1 403 Forbidden", &[], ""),
        ])
        .await;

        let session = Session::login(&address, "admin", "secret", &options())
            .await
            .unwrap();
        assert_eq!(session.address(), address);

        let body = session
            .request(&ApiRequest::get("/webman/log.cgi").param("limit", 50))
            .await
            .unwrap();
        assert_eq!(body, r#"{"items": []}"#);

        let body = session
            .request(&ApiRequest::post("/webman/rsrc.cgi").param("action", "allget"))
            .await
            .unwrap();
        assert_eq!(body, r#"{"cpu": {"values": []}}"#);

        let err = session
            .request(&ApiRequest::get("/webman/denied.cgi"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TransportError::Status {
                path: "/webman/denied.cgi".to_string(),
                status: 403,
            }
        );

        let requests = server.await.unwrap();
        assert_eq!(requests.len(), 4);

        assert!(requests[0].starts_with("POST /webman/login.cgi HTTP/1.1"));
        assert!(requests[0].ends_with("username=admin&passwd=secret"));

        assert!(requests[1].starts_with("GET /webman/log.cgi?limit=50 HTTP/1.1"));
        assert!(requests[2].starts_with("POST /webman/rsrc.cgi HTTP/1.1"));
        assert!(requests[2]
            .to_ascii_lowercase()
            .contains("content-type: application/x-www-form-urlencoded"));
        assert!(requests[2].ends_with("action=allget"));

        for request in &requests[1..] {
            assert!(
                request.to_ascii_lowercase().contains("cookie: id=abc"),
                "session cookie missing from {}",
                request
            );
        }
    }

    #[tokio::test]
    async fn test_login_rejected_by_status() {
        let (address, server) =
            fake_nas(vec![http_response("HTTP/1.1 403 Forbidden", &[], "")]).await;

        let result = Session::login(&address, "admin", "wrong", &options()).await;
        server.await.unwrap();

        match result {
            Err(AuthError::Rejected { reason, .. }) => assert!(reason.contains("403")),
            Err(e) => panic!("Unexpected error: {}", e),
            Ok(_) => panic!("Login answered with 403 should fail"),
        }
    }

    #[tokio::test]
    async fn test_login_rejected_by_reply_body() {
        let (address, server) = fake_nas(vec![http_response(
            "HTTP/1.1 200 OK",
            &[],
            r#"{"success": false, "reason": "error_password"}"#,
        )])
        .await;

        let result = Session::login(&address, "admin", "wrong", &options()).await;
        server.await.unwrap();

        match result {
            Err(AuthError::Rejected { address: rejected, reason }) => {
                assert_eq!(rejected, address);
                assert_eq!(reason, "error_password");
            }
            Err(e) => panic!("Unexpected error: {}", e),
            Ok(_) => panic!("Login with a refused reply should fail"),
        }
    }

    #[test]
    fn test_api_request_builder() {
        let request = ApiRequest::post("/webman/modules/ResourceMonitor/rsrcmonitor.cgi")
            .param("action", "allget");

        assert_eq!(request.method, Method::Post);
        assert_eq!(
            request.params,
            vec![("action".to_string(), "allget".to_string())]
        );
    }

    #[test]
    fn test_login_reply_success() {
        assert!(check_login_reply(r#"{"success": true}"#).is_ok());
    }

    #[test]
    fn test_login_reply_rejected() {
        let err = check_login_reply(r#"{"success": false, "reason": "error_noprivilege"}"#)
            .unwrap_err();
        assert_eq!(err, "error_noprivilege");

        let err = check_login_reply(r#"{"success": false, "error": {"code": 400}}"#).unwrap_err();
        assert_eq!(err, r#"{"code":400}"#);

        let err = check_login_reply(r#"{"success": false}"#).unwrap_err();
        assert_eq!(err, "credentials refused");
    }

    #[test]
    fn test_login_reply_without_verdict_is_accepted() {
        assert!(check_login_reply("<html>redirect</html>").is_ok());
        assert!(check_login_reply("").is_ok());
        assert!(check_login_reply(r#"{"result": "ok"}"#).is_ok());
    }

    #[tokio::test]
    async fn test_login_unreachable_address() {
        let options = ClientOptions {
            timeout: Duration::from_secs(2),
            accept_invalid_certs: false,
        };

        let result = Session::login("http://127.0.0.1:1", "admin", "secret", &options).await;

        match result {
            Err(AuthError::Unreachable { address, .. }) => {
                assert_eq!(address, "http://127.0.0.1:1");
            }
            Err(e) => panic!("Unexpected error: {}", e),
            Ok(_) => panic!("Login against a closed port should fail"),
        }
    }

    #[tokio::test]
    async fn test_mock_transport_cycles_script() {
        let mock = MockTransport::new();
        mock.script(
            "/a",
            vec![
                Ok("first".to_string()),
                Err(TransportError::Status {
                    path: "/a".to_string(),
                    status: 500,
                }),
            ],
        );

        let request = ApiRequest::get("/a");
        assert_eq!(mock.request(&request).await.unwrap(), "first");
        assert!(mock.request(&request).await.is_err());
        assert_eq!(mock.request(&request).await.unwrap(), "first");
        assert_eq!(mock.call_count("/a"), 3);
    }

    #[tokio::test]
    async fn test_mock_transport_unknown_path() {
        let mock = MockTransport::new();
        let err = mock.request(&ApiRequest::get("/missing")).await.unwrap_err();
        assert_eq!(
            err,
            TransportError::Status {
                path: "/missing".to_string(),
                status: 404
            }
        );
    }
}
