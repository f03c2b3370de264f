//! TCP console server.
//!
//! Same grammar as the serial line. A session is greeted with the prompt,
//! closed by `quit`, by the peer, or after [`IDLE_TIMEOUT`] of silence.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use repeater_core::{Origin, Response, SessionId, Signal};
use repeater_protocol::{render, LineAssembler, PROMPT};

use crate::event_loop::EngineHandle;

pub const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

pub struct ConsoleServer {
    bind_addr: SocketAddr,
    engine: EngineHandle,
}

impl ConsoleServer {
    pub fn new(bind_addr: SocketAddr, engine: EngineHandle) -> Self {
        Self { bind_addr, engine }
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!("Console listening on {}", self.bind_addr);

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let engine = self.engine.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, addr, engine).await {
                            error!("Console error from {}: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    engine: EngineHandle,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let Some(id) = engine.attach(addr.ip(), tx).await else {
        // Dropping the stream closes it.
        return Ok(());
    };

    let result = serve(stream, addr, id, &engine, rx).await;
    engine.detach(id);
    result
}

async fn serve(
    mut stream: TcpStream,
    addr: SocketAddr,
    id: SessionId,
    engine: &EngineHandle,
    mut replies: mpsc::UnboundedReceiver<repeater_core::Reply>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (mut reader, mut writer) = stream.split();
    writer.write_all(PROMPT.as_bytes()).await?;

    let mut lines = LineAssembler::new();
    let mut buf = [0u8; 256];
    loop {
        tokio::select! {
            read = timeout(IDLE_TIMEOUT, reader.read(&mut buf)) => {
                let n = match read {
                    Err(_) => {
                        info!("Console session {} idle, closing", id.0);
                        return Ok(());
                    }
                    Ok(result) => result?,
                };
                if n == 0 {
                    debug!("Client {} disconnected", addr);
                    return Ok(());
                }
                for line in lines.extend(&buf[..n]) {
                    match line {
                        Ok(line) => {
                            engine.post(Signal::Console {
                                origin: Origin::Remote(id),
                                line,
                            });
                        }
                        Err(e) => {
                            warn!("Console session {}: {}", id.0, e);
                            let out = render(&Response::line(e.to_string()));
                            writer.write_all(out.as_bytes()).await?;
                        }
                    }
                }
            }
            reply = replies.recv() => {
                let Some(reply) = reply else {
                    return Ok(());
                };
                writer.write_all(render(&reply.response).as_bytes()).await?;
                if reply.close {
                    info!("Console session {} quit", id.0);
                    writer.shutdown().await?;
                    return Ok(());
                }
            }
        }
    }
}
