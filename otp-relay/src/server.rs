// File:    server.rs
// Author:  apezoo
// Date:    2026-10-18
//
// Description: TCP accept loop spawning one connection worker per peer.
//
// License:
// This project is licensed under the terms of the GNU AGPLv3 license.
// See the LICENSE.md file in the project root for full license information.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use log::{error, info};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;

use crate::broker::Broker;
use crate::config::RelayConfig;
use crate::connection::{ConnectionLimits, handle_connection};

/// A bound relay, ready to accept peers.
#[derive(Debug)]
pub struct RelayServer {
    listener: TcpListener,
    broker: Arc<Broker>,
    limits: ConnectionLimits,
    slots: Arc<Semaphore>,
}

impl RelayServer {
    /// Binds the address in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn bind(config: &RelayConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr()).await?;
        Ok(Self {
            listener,
            broker: Arc::new(Broker::from_config(config)),
            limits: ConnectionLimits::from(config),
            slots: Arc::new(Semaphore::new(config.max_connections.max(1))),
        })
    }

    /// The address actually bound, useful when the configured port is 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// The shared broker, for inspection.
    #[must_use]
    pub fn broker(&self) -> Arc<Broker> {
        Arc::clone(&self.broker)
    }

    /// Accepts connections until `shutdown` resolves.
    ///
    /// Once `max_connections` workers are running, accepting pauses until one
    /// exits. Workers already running are left to finish on their own.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!("relay ready, accepting connections");

        loop {
            let permit = tokio::select! {
                () = &mut shutdown => break,
                permit = Arc::clone(&self.slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let (stream, peer_addr) = tokio::select! {
                () = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("accept error: {e}");
                        continue;
                    }
                },
            };
            info!("new connection from {peer_addr}");

            let broker = Arc::clone(&self.broker);
            let limits = self.limits;
            tokio::spawn(async move {
                handle_connection(stream, peer_addr.to_string(), broker, limits).await;
                drop(permit);
            });
        }

        info!("relay stopped accepting connections");
    }
}
