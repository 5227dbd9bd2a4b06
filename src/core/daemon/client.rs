// src/core/daemon/client.rs

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use super::DaemonError;

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);
const ANSWER_TIMEOUT: Duration = Duration::from_secs(30);

fn connect_error(address: String, source: io::Error) -> DaemonError {
    DaemonError::Connect { address, source }
}

/// Every address the host resolves to, in resolver order.
fn resolve_addresses(host: &str, port: u16) -> Result<Vec<SocketAddr>, DaemonError> {
    let addresses: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| connect_error(format!("{}:{}", host, port), e))?
        .collect();
    if addresses.is_empty() {
        return Err(connect_error(
            format!("{}:{}", host, port),
            io::Error::new(io::ErrorKind::AddrNotAvailable, "no resolved addresses"),
        ));
    }
    Ok(addresses)
}

/// Connects to the first address that accepts; `localhost` may resolve to `::1`
/// before `127.0.0.1` while the daemon only listens on IPv4.
fn connect_any(addresses: &[SocketAddr]) -> Result<TcpStream, DaemonError> {
    let mut last_error = None;
    for address in addresses {
        match TcpStream::connect_timeout(address, CONNECTION_TIMEOUT) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                log::debug!("Connection to {} failed: {}", address, e);
                last_error = Some(connect_error(address.to_string(), e));
            }
        }
    }
    Err(last_error.unwrap_or_else(|| {
        connect_error(
            String::new(),
            io::Error::new(io::ErrorKind::AddrNotAvailable, "no address to connect to"),
        )
    }))
}

/// Sends one request line and returns the raw answer, newline included.
pub fn send_command(host: &str, port: u16, line: &str) -> Result<String, DaemonError> {
    let addresses = resolve_addresses(host, port)?;
    let mut stream = connect_any(&addresses)?;
    stream.set_read_timeout(Some(ANSWER_TIMEOUT))?;
    stream.write_all(line.trim().as_bytes())?;
    stream.flush()?;
    stream.shutdown(Shutdown::Write)?;

    let mut answer = String::new();
    stream.read_to_string(&mut answer)?;
    Ok(answer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, TcpListener};
    use std::thread;

    /// Accepts one connection and answers `OK` to whatever it reads.
    fn answer_once(listener: TcpListener) -> thread::JoinHandle<String> {
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = String::new();
            stream.read_to_string(&mut request).unwrap();
            stream.write_all(b"OK\n").unwrap();
            request
        })
    }

    #[test]
    fn test_connect_skips_refusing_addresses() {
        // --- Setup ---
        let refused = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let dead = refused.local_addr().unwrap();
        drop(refused);
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let live = listener.local_addr().unwrap();
        let server = answer_once(listener);

        // --- Execute ---
        let mut stream = connect_any(&[dead, live]).unwrap();
        stream.write_all(b"status").unwrap();
        stream.shutdown(Shutdown::Write).unwrap();
        let mut answer = String::new();
        stream.read_to_string(&mut answer).unwrap();

        // --- Assert ---
        assert_eq!(answer, "OK\n");
        assert_eq!(server.join().unwrap(), "status");
    }

    #[test]
    fn test_connect_reports_the_last_failure() {
        let refused = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let dead = refused.local_addr().unwrap();
        drop(refused);
        assert!(matches!(connect_any(&[dead]), Err(DaemonError::Connect { .. })));
        assert!(connect_any(&[]).is_err());
    }

    #[test]
    fn test_send_command_through_localhost() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = answer_once(listener);

        let answer = send_command("localhost", port, "help\n").unwrap();

        assert_eq!(answer, "OK\n");
        assert_eq!(server.join().unwrap(), "help");
    }
}
