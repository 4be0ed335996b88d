use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;

use crate::blockchain::{Block, ChainResponse, TransactionRequest};

/// Errors that can occur while talking to a peer
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Peer answered with status {0}")]
    Status(u16),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Request/response exchange with sibling nodes
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// Fetches the peer's full chain
    async fn fetch_chain(&self, peer: &str) -> Result<Vec<Block>, NetworkError>;

    /// Forwards a signed transaction to the peer's pool
    async fn relay_transaction(
        &self,
        peer: &str,
        request: &TransactionRequest,
    ) -> Result<(), NetworkError>;
}

/// `PeerClient` over plain HTTP
#[derive(Debug, Clone)]
pub struct HttpPeerClient {
    client: Client,
}

impl HttpPeerClient {
    pub fn new(timeout: Duration) -> Result<Self, NetworkError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(HttpPeerClient { client })
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn fetch_chain(&self, peer: &str) -> Result<Vec<Block>, NetworkError> {
        let response = self.client.get(format!("http://{}/chain", peer)).send().await?;
        if !response.status().is_success() {
            return Err(NetworkError::Status(response.status().as_u16()));
        }

        let body = response.bytes().await?;
        let decoded: ChainResponse = serde_json::from_slice(&body)?;
        Ok(decoded.chain)
    }

    async fn relay_transaction(
        &self,
        peer: &str,
        request: &TransactionRequest,
    ) -> Result<(), NetworkError> {
        let response = self
            .client
            .put(format!("http://{}/transactions", peer))
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(NetworkError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::{Blockchain, LedgerConfig, Transaction, Wallet};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one canned HTTP response and returns the address plus the raw request
    async fn serve_once(status: &'static str, body: String) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            request
        });

        (address, handle)
    }

    /// Reads headers, then as many body bytes as Content-Length announces
    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut raw = Vec::new();
        let mut chunk = [0u8; 4096];

        loop {
            let text = String::from_utf8_lossy(&raw).to_string();
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if raw.len() >= header_end + 4 + content_length {
                    return text;
                }
            }

            let read = socket.read(&mut chunk).await.unwrap();
            if read == 0 {
                return String::from_utf8_lossy(&raw).to_string();
            }
            raw.extend_from_slice(&chunk[..read]);
        }
    }

    fn client() -> HttpPeerClient {
        HttpPeerClient::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_chain() {
        let ledger = Blockchain::new(LedgerConfig::new("peer"));
        ledger.add_transaction(crate::blockchain::REWARD_SENDER, "bob", 2.0, None, None).unwrap();
        ledger.mine().unwrap();

        let body = serde_json::to_string(&ChainResponse { chain: ledger.chain() }).unwrap();
        let (address, server) = serve_once("200 OK", body).await;

        let chain = client().fetch_chain(&address).await.unwrap();
        assert_eq!(chain, ledger.chain());

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /chain HTTP/1.1"));
    }

    #[tokio::test]
    async fn test_fetch_chain_malformed_body() {
        let (address, _server) = serve_once("200 OK", "{\"chain\": 7}".to_string()).await;

        assert!(matches!(
            client().fetch_chain(&address).await,
            Err(NetworkError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_chain_error_status() {
        let (address, _server) = serve_once("500 Internal Server Error", "{}".to_string()).await;

        assert!(matches!(
            client().fetch_chain(&address).await,
            Err(NetworkError::Status(500))
        ));
    }

    #[tokio::test]
    async fn test_relay_transaction() {
        let wallet = Wallet::new();
        let transaction = Transaction::new(wallet.address().as_str(), "bob", 1.5);
        let signature = wallet.sign_transaction(&transaction);
        let request = TransactionRequest::signed(&transaction, &wallet.public_key_hex(), &signature);

        let (address, server) = serve_once("201 Created", "{\"message\":\"success\"}".to_string()).await;
        client().relay_transaction(&address, &request).await.unwrap();

        let raw = server.await.unwrap();
        assert!(raw.starts_with("PUT /transactions HTTP/1.1"));
        assert!(raw.contains("\"sender_blockchain_address\""));
    }

    #[tokio::test]
    async fn test_unreachable_peer() {
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = closed.local_addr().unwrap().to_string();
        drop(closed);

        assert!(matches!(
            client().fetch_chain(&address).await,
            Err(NetworkError::Http(_))
        ));
    }
}
