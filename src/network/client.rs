//! Network Client
//!
//! TCP client for pushing metadata to other servers. Connections are pooled
//! per address and reused across requests; a connection that fails
//! mid-exchange is evicted and the request retried once on a fresh dial.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

use super::{read_message, write_message};
use crate::error::{Error, Result};
use crate::replication::Message;

/// Network client for connecting to peer servers
pub struct NetworkClient {
    /// Connection pool: address -> idle connection
    pool: Arc<Mutex<HashMap<String, TcpStream>>>,
    /// Connection timeout
    connect_timeout: Duration,
    /// Request timeout
    request_timeout: Duration,
}

impl NetworkClient {
    /// Create a new network client
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            pool: Arc::new(Mutex::new(HashMap::new())),
            connect_timeout,
            request_timeout,
        }
    }

    /// Send a request to a peer and wait for the response
    pub async fn request(&self, address: &str, message: Message) -> Result<Message> {
        let result = timeout(self.request_timeout, self.request_inner(address, message)).await;

        match result {
            Ok(inner_result) => inner_result,
            Err(_) => Err(Error::ConnectionTimeout(address.to_string())),
        }
    }

    /// Request without the timeout wrapper
    async fn request_inner(&self, address: &str, message: Message) -> Result<Message> {
        // Try a pooled connection first; a failure here only evicts it,
        // the request then falls through to a fresh dial
        if let Some(mut stream) = self.take_connection(address).await {
            match Self::exchange(&mut stream, &message).await {
                Ok(response) => {
                    self.store_connection(address, stream).await;
                    return Ok(response);
                }
                Err(e) => {
                    tracing::debug!("Pooled connection to {} failed: {}", address, e);
                }
            }
        }

        let mut stream = self.connect(address).await?;
        let response = Self::exchange(&mut stream, &message).await?;
        self.store_connection(address, stream).await;

        Ok(response)
    }

    /// One request-response exchange on an established connection
    async fn exchange(stream: &mut TcpStream, message: &Message) -> Result<Message> {
        let (mut reader, mut writer) = stream.split();
        write_message(&mut writer, message).await?;
        read_message(&mut reader).await
    }

    /// Connect to an address
    async fn connect(&self, address: &str) -> Result<TcpStream> {
        let result = timeout(self.connect_timeout, TcpStream::connect(address)).await;

        match result {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                Ok(stream)
            }
            Ok(Err(e)) => Err(Error::ConnectionFailed {
                address: address.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(Error::ConnectionTimeout(address.to_string())),
        }
    }

    /// Take an idle connection out of the pool
    async fn take_connection(&self, address: &str) -> Option<TcpStream> {
        let mut pool = self.pool.lock().await;
        pool.remove(address)
    }

    /// Return a connection to the pool
    async fn store_connection(&self, address: &str, stream: TcpStream) {
        let mut pool = self.pool.lock().await;
        pool.insert(address.to_string(), stream);
    }

    /// Close all pooled connections
    pub async fn close_all(&self) {
        let mut pool = self.pool.lock().await;
        pool.clear();
    }

    /// Get pooled connection count
    pub async fn connection_count(&self) -> usize {
        self.pool.lock().await.len()
    }
}
