//! Native Messaging Host - thin relay to the study service
//!
//! Receives length-prefixed JSON messages from the browser extension on
//! stdin, forwards each one as a line over the study service's Unix socket
//! and writes the reply back to stdout with the same framing.

use serde_json::json;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::os::unix::net::UnixStream;
use std::time::Duration;

const DEFAULT_SOCKET_PATH: &str = "/tmp/study-service.sock";
const SOCKET_ENV: &str = "STUDY_SOCKET";
const SOCKET_TIMEOUT: Duration = Duration::from_secs(30);

/// Browsers reject host messages larger than this
const MAX_RESPONSE_BYTES: usize = 1024 * 1024;

fn socket_path() -> String {
    std::env::var(SOCKET_ENV).unwrap_or_else(|_| DEFAULT_SOCKET_PATH.to_string())
}

/// Read one native messaging frame; `None` on a clean end of input
fn read_message<R: Read>(input: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut length_bytes = [0u8; 4];

    match input.read_exact(&mut length_bytes) {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let length = u32::from_ne_bytes(length_bytes) as usize;
    if length == 0 {
        return Ok(None);
    }

    let mut message = vec![0u8; length];
    input.read_exact(&mut message)?;

    Ok(Some(message))
}

fn write_message<W: Write>(output: &mut W, message: &[u8]) -> io::Result<()> {
    let length = message.len() as u32;

    output.write_all(&length.to_ne_bytes())?;
    output.write_all(message)?;
    output.flush()?;

    Ok(())
}

/// Send one request line and read one reply line
fn forward_to_service(path: &str, message: &[u8]) -> io::Result<Vec<u8>> {
    let mut stream = UnixStream::connect(path)?;
    stream.set_read_timeout(Some(SOCKET_TIMEOUT))?;
    stream.set_write_timeout(Some(SOCKET_TIMEOUT))?;

    stream.write_all(message)?;
    stream.write_all(b"\n")?;
    stream.flush()?;

    let mut reader = BufReader::new(stream);
    let mut response = Vec::new();
    reader.read_until(b'\n', &mut response)?;
    if response.last() == Some(&b'\n') {
        response.pop();
    }

    if response.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "service closed the connection without replying",
        ));
    }
    Ok(response)
}

fn error_response(message: &str) -> Vec<u8> {
    json!({ "success": false, "error": message })
        .to_string()
        .into_bytes()
}

/// Replace replies the browser would refuse with an error envelope
fn cap_response(response: Vec<u8>) -> Vec<u8> {
    if response.len() > MAX_RESPONSE_BYTES {
        eprintln!("Response of {} bytes exceeds the messaging limit", response.len());
        return error_response(&format!(
            "Response too large ({} bytes, limit {})",
            response.len(),
            MAX_RESPONSE_BYTES
        ));
    }
    response
}

fn main() {
    let path = socket_path();
    eprintln!("Native host started, relaying to {}", path);

    let mut stdin = io::stdin().lock();

    loop {
        match read_message(&mut stdin) {
            Ok(Some(message)) => {
                eprintln!("Received {} bytes from extension", message.len());

                let response = match forward_to_service(&path, &message) {
                    Ok(resp) => {
                        eprintln!("Service response: {} bytes", resp.len());
                        cap_response(resp)
                    }
                    Err(e) => {
                        eprintln!("Service error: {}", e);
                        error_response(&format!("Service unavailable: {}", e))
                    }
                };

                if let Err(e) = write_message(&mut io::stdout().lock(), &response) {
                    eprintln!("Failed to write response: {}", e);
                    break;
                }
            }
            Ok(None) => {
                eprintln!("Connection closed");
                break;
            }
            Err(e) => {
                eprintln!("Read error: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::os::unix::net::UnixListener;

    #[test]
    fn test_frame_round_trip() {
        let mut buffer = Vec::new();
        write_message(&mut buffer, br#"{"type":"get_folders"}"#).unwrap();
        assert_eq!(&buffer[..4], &22u32.to_ne_bytes());

        let mut input = Cursor::new(buffer);
        let message = read_message(&mut input).unwrap().unwrap();
        assert_eq!(message, br#"{"type":"get_folders"}"#);
        assert!(read_message(&mut input).unwrap().is_none());
    }

    #[test]
    fn test_error_response_escapes_quotes() {
        let response = error_response(r#"bad "thing""#);
        let parsed: serde_json::Value = serde_json::from_slice(&response).unwrap();
        assert_eq!(parsed["success"], false);
        assert_eq!(parsed["error"], r#"bad "thing""#);
    }

    #[test]
    fn test_oversized_response_is_replaced() {
        let small = b"{\"success\":true}".to_vec();
        assert_eq!(cap_response(small.clone()), small);

        let big = vec![b'x'; MAX_RESPONSE_BYTES + 1];
        let replaced: serde_json::Value = serde_json::from_slice(&cap_response(big)).unwrap();
        assert_eq!(replaced["success"], false);
    }

    #[test]
    fn test_forward_reads_one_line() {
        let dir = std::env::temp_dir().join(format!("study-host-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("relay.sock");
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path).unwrap();

        let service = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            assert_eq!(line, "{\"type\":\"get_settings\"}\n");
            (&stream).write_all(b"{\"success\":true}\n").unwrap();
        });

        let response = forward_to_service(path.to_str().unwrap(), b"{\"type\":\"get_settings\"}").unwrap();
        assert_eq!(response, b"{\"success\":true}");

        service.join().unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }
}
