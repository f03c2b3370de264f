//! Serial console.
//!
//! On the host the serial line is stdin/stdout; any byte stream works.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use repeater_core::{Origin, Reply, Response, Signal};
use repeater_protocol::{render, LineAssembler, PROMPT};

use crate::event_loop::EngineHandle;

/// Feed `input` to the engine as serial console lines and write serial
/// output to `output`. Returns when the input reaches end of file.
pub async fn run_serial<R, W>(
    engine: EngineHandle,
    mut input: R,
    mut output: W,
    mut replies: mpsc::UnboundedReceiver<Reply>,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    output.write_all(PROMPT.as_bytes()).await?;
    output.flush().await?;

    let mut lines = LineAssembler::new();
    let mut buf = [0u8; 128];
    loop {
        tokio::select! {
            read = input.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    debug!("Serial input closed");
                    return Ok(());
                }
                for line in lines.extend(&buf[..n]) {
                    match line {
                        Ok(line) => {
                            engine.post(Signal::Console {
                                origin: Origin::Serial,
                                line,
                            });
                        }
                        Err(e) => {
                            warn!("Serial console: {e}");
                            output
                                .write_all(render(&Response::line(e.to_string())).as_bytes())
                                .await?;
                            output.flush().await?;
                        }
                    }
                }
            }
            reply = replies.recv() => {
                let Some(reply) = reply else {
                    return Ok(());
                };
                output.write_all(render(&reply.response).as_bytes()).await?;
                output.flush().await?;
            }
        }
    }
}
