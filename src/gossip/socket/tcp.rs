//! Thin wrapper around `tokio::net::TcpStream`/`TcpListener`.
//!
//! Both `try_read`/`try_write`/`ready` take `&self` on `TcpStream`, so
//! a single `Arc<TcpStream>` can be shared between the Socket Owner
//! (which reads and writes) and its Readiness Monitor (which only
//! polls for readability) without any further synchronization.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};

pub struct Listener {
    inner: TcpListener,
}

#[derive(Clone)]
pub struct Socket {
    inner: Arc<TcpStream>,
}

pub async fn bind(addr: SocketAddr) -> io::Result<Listener> {
    let inner = TcpListener::bind(addr).await?;
    Ok(Listener { inner })
}

pub async fn connect(addr: SocketAddr) -> io::Result<Socket> {
    TcpStream::connect(addr)
        .await
        .map(|inner| Socket { inner: Arc::new(inner) })
}

impl Listener {
    pub async fn accept(&self) -> io::Result<(Socket, SocketAddr)> {
        let (inner, peer) = self.inner.accept().await?;
        Ok((Socket { inner: Arc::new(inner) }, peer))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

impl Socket {
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.inner.peer_addr()
    }

    pub async fn ready_readable(&self) -> io::Result<tokio::io::Ready> {
        self.inner.ready(tokio::io::Interest::READABLE).await
    }

    pub fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.try_read(buf)
    }

    pub async fn write_all(&self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            self.inner.writable().await?;
            match self.inner.try_write(buf) {
                Ok(n) => buf = &buf[n..],
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
