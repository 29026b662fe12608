//! Mock market-channel server for integration tests.
//!
//! Accepts connections, records text frames, answers `PING` with `PONG`,
//! and lets the test push frames to (or drop) every connected client.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};

pub struct MockMarketServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    messages: Arc<Mutex<Vec<String>>>,
    connections: Arc<Mutex<u32>>,
    clients: Arc<Mutex<Vec<mpsc::UnboundedSender<Message>>>>,
}

impl MockMarketServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let messages = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(Mutex::new(0));
        let clients = Arc::new(Mutex::new(Vec::new()));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let (m, c, cl) = (messages.clone(), connections.clone(), clients.clone());
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        tokio::spawn(handle_connection(stream, m.clone(), c.clone(), cl.clone()));
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            messages,
            connections,
            clients,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub async fn connection_count(&self) -> u32 {
        *self.connections.lock().await
    }

    pub async fn received_messages(&self) -> Vec<String> {
        self.messages.lock().await.clone()
    }

    /// Send a text frame to every connected client.
    pub async fn broadcast(&self, text: &str) {
        for client in self.clients.lock().await.iter() {
            let _ = client.send(Message::Text(text.to_string()));
        }
    }

    /// Close every client connection from the server side.
    pub async fn drop_clients(&self) {
        for client in self.clients.lock().await.drain(..) {
            let _ = client.send(Message::Close(None));
        }
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    messages: Arc<Mutex<Vec<String>>>,
    connections: Arc<Mutex<u32>>,
    clients: Arc<Mutex<Vec<mpsc::UnboundedSender<Message>>>>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(_) => return,
    };
    *connections.lock().await += 1;

    let (mut write, mut read) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    clients.lock().await.push(tx.clone());

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(Message::Close(frame)) => {
                        let _ = write.send(Message::Close(frame)).await;
                        break;
                    }
                    Some(msg) => {
                        if write.send(msg).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = read.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if text == "PING" {
                            let _ = tx.send(Message::Text("PONG".to_string()));
                        } else {
                            messages.lock().await.push(text);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}
