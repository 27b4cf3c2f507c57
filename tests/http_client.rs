use botaniclock_device::{
    account_client::{AccountService, BotaniClockClient},
    config::ApiConfig,
    models::AccountBinding,
};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Request line and body of one request seen by the mock server.
#[derive(Debug)]
struct Received {
    request_line: String,
    body: serde_json::Value,
}

// Mock BotaniClock server answering every request with `status`
async fn start_mock_server(status: &'static str) -> (String, mpsc::UnboundedReceiver<Received>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind mock server");
    let addr = listener.local_addr().expect("failed to get local address");
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let tx = tx.clone();

            tokio::spawn(async move {
                let mut reader = BufReader::new(&mut stream);
                let mut request_line = String::new();
                let mut content_length = 0;

                if reader.read_line(&mut request_line).await.is_err() {
                    return;
                }

                // Read HTTP headers
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).await.is_err() {
                        return;
                    }

                    if line.trim().is_empty() {
                        break;
                    }

                    if let Some((name, value)) = line.split_once(':') {
                        if name.eq_ignore_ascii_case("content-length") {
                            content_length = value.trim().parse().unwrap_or(0);
                        }
                    }
                }

                let mut body = vec![0; content_length];
                if reader.read_exact(&mut body).await.is_err() {
                    return;
                }

                let _ = tx.send(Received {
                    request_line: request_line.trim().to_string(),
                    body: serde_json::from_slice(&body).unwrap_or_default(),
                });

                let http_response = format!("HTTP/1.1 {status}\r\nContent-Length: 0\r\n\r\n");
                let _ = stream.write_all(http_response.as_bytes()).await;
            });
        }
    });

    (format!("http://{addr}/api/v1/devices"), rx)
}

fn client(devices_url: String) -> BotaniClockClient {
    BotaniClockClient::new(&ApiConfig {
        devices_url,
        accept_invalid_certs: false,
    })
    .expect("failed to create client")
}

#[tokio::test]
async fn update_puts_binding_and_succeeds_on_200() {
    let (url, mut received) = start_mock_server("200 OK").await;

    let updated = client(url)
        .update(&AccountBinding::new("r1", "e1"))
        .await
        .expect("update should not error");

    assert!(updated);

    let request = received.recv().await.expect("server should see request");
    assert_eq!(request.request_line, "PUT /api/v1/devices HTTP/1.1");
    assert_eq!(
        request.body,
        serde_json::json!({"registrationID": "r1", "accountEmail": "e1"})
    );
}

#[tokio::test]
async fn verify_posts_binding() {
    let (url, mut received) = start_mock_server("200 OK").await;

    assert!(
        client(url)
            .verify(&AccountBinding::new("r1", "e1"))
            .await
            .expect("verify should not error")
    );

    let request = received.recv().await.expect("server should see request");
    assert_eq!(request.request_line, "POST /api/v1/devices HTTP/1.1");
}

#[tokio::test]
async fn other_success_codes_count_as_failure() {
    let (url, _received) = start_mock_server("201 Created").await;

    assert!(
        !client(url)
            .update(&AccountBinding::new("r1", "e1"))
            .await
            .expect("update should not error")
    );
}

#[tokio::test]
async fn rejected_empty_binding_fails() {
    let (url, _received) = start_mock_server("400 Bad Request").await;

    assert!(
        !client(url)
            .update(&AccountBinding::default())
            .await
            .expect("update should not error")
    );
}

#[tokio::test]
async fn unreachable_server_is_an_error() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind");
    let addr = listener.local_addr().expect("failed to get local address");
    drop(listener);

    let result = client(format!("http://{addr}/api/v1/devices"))
        .update(&AccountBinding::new("r1", "e1"))
        .await;

    assert!(result.is_err());
}
