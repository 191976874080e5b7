use std::io::{ self, Write };
use std::net::SocketAddr;
use std::time::{ Duration, Instant };

use mio::Token;
use mio::net::TcpStream;

use crate::http::request::Request;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ConnectionState {
    ReadRequest,
    WriteResponse,
}

pub struct Connection {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    /// Token of the listener that accepted this connection.
    pub listener: Token,

    pub state: ConnectionState,
    pub request: Request,
    pub write_buffer: Vec<u8>,
    pub bytes_written: usize,
    pub keep_alive: bool,
    pub last_activity: Instant,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr, listener: Token, body_limit: usize) -> Self {
        Self {
            stream,
            peer,
            listener,
            state: ConnectionState::ReadRequest,
            request: Request::with_body_limit(body_limit),
            write_buffer: Vec::new(),
            bytes_written: 0,
            keep_alive: true,
            last_activity: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn is_idle(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity) > timeout
    }

    pub fn queue_response(&mut self, bytes: Vec<u8>, keep_alive: bool) {
        self.write_buffer = bytes;
        self.bytes_written = 0;
        self.keep_alive = keep_alive;
        self.state = ConnectionState::WriteResponse;
        self.touch();
    }

    /// Writes as much of the pending response as the socket takes.
    /// `Ok(true)` once everything has been sent.
    pub fn flush(&mut self) -> io::Result<bool> {
        while self.bytes_written < self.write_buffer.len() {
            match self.stream.write(&self.write_buffer[self.bytes_written..]) {
                Ok(0) => {
                    return Err(io::Error::from(io::ErrorKind::WriteZero));
                }
                Ok(n) => {
                    self.bytes_written += n;
                    self.touch();
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(false);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(e);
                }
            }
        }
        Ok(true)
    }

    pub fn reset_for_next_request(&mut self) {
        self.request.reset();
        self.write_buffer.clear();
        self.bytes_written = 0;
        self.state = ConnectionState::ReadRequest;
        self.touch();
    }
}
