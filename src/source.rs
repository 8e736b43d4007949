//! UDP listener feeding the datagram decoder.
//!
//! Agents ship one sFlow datagram per UDP payload (rarely several,
//! back to back); each payload is decoded as a stream and every completed
//! datagram is forwarded to the output channel. A payload that fails to
//! decode is logged and dropped, the listener keeps going.

use std::future::Future;
use std::io::Cursor;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use serde::Deserialize;
use socket2::SockRef;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::datagram::Datagram;

fn default_listen() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 6343)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Configures the receive buffer size using the "SO_RCVBUF" option on
    /// the socket.
    #[serde(default)]
    pub receive_buffer_bytes: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen: default_listen(),
            receive_buffer_bytes: None,
        }
    }
}

fn set_receive_buffer_size(socket: &UdpSocket, size: usize) -> std::io::Result<()> {
    SockRef::from(socket).set_recv_buffer_size(size)
}

/// Bind `config.listen` and pump decoded datagrams into `output` until
/// `shutdown` resolves or the receiving side of `output` is gone.
pub async fn run<S>(
    config: Config,
    mut shutdown: S,
    output: mpsc::Sender<Datagram>,
) -> crate::Result<()>
where
    S: Future<Output = ()> + Unpin,
{
    let socket = match UdpSocket::bind(config.listen).await {
        Ok(socket) => socket,
        Err(err) => {
            error!(
                message = "bind UDP socket failed",
                listen = %config.listen,
                %err,
            );

            return Err(err.into());
        }
    };

    if let Some(bytes) = config.receive_buffer_bytes {
        if let Err(err) = set_receive_buffer_size(&socket, bytes) {
            warn!(
                message = "set receive buffer size failed",
                listen = %config.listen,
                %err,
            );
        }
    }

    let mut buf = [0u8; u16::MAX as usize];
    loop {
        let (size, peer) = tokio::select! {
            _ = &mut shutdown => break,

            result = socket.recv_from(&mut buf) => match result {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(
                        message = "recv datagram failed",
                        %err,
                    );

                    continue;
                }
            },
        };

        let mut received = vec![];
        if let Err(err) =
            Datagram::decode_stream(Cursor::new(&buf[..size]), |datagram| received.push(datagram))
        {
            warn!(
                message = "decode datagram failed",
                %peer,
                %err,
            );
        }

        for datagram in received {
            if output.send(datagram).await.is_err() {
                // receiver closed, nothing left to do
                return Ok(());
            }
        }
    }

    Ok(())
}
