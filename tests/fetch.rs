use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use assert_matches::assert_matches;

use memoreasy::fetch::{FetchFailure, HttpMediaSource, MediaSource};

fn read_request(stream: &TcpStream) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    while reader.read_line(&mut line).unwrap_or(0) > 0 {
        if line == "\r\n" {
            break;
        }
        line.clear();
    }
}

fn serve_once(response: &'static [u8]) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        read_request(&stream);
        stream.write_all(response).unwrap();
        stream.flush().unwrap();
    });
    format!("http://{addr}/memories/download")
}

fn source(request_timeout: Duration) -> HttpMediaSource {
    HttpMediaSource::new(Duration::from_secs(2), request_timeout).unwrap()
}

#[test]
fn returns_status_type_and_body() {
    let url = serve_once(
        b"HTTP/1.1 200 OK\r\nContent-Type: video/mp4\r\nContent-Length: 5\r\nConnection: close\r\n\r\nvideo",
    );
    let response = source(Duration::from_secs(5)).get(&url).unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.content_type, "video/mp4");

    let mut body = Vec::new();
    let mut reader = response.body;
    reader.read_to_end(&mut body).unwrap();
    assert_eq!(body, b"video");
}

#[test]
fn error_statuses_are_returned_not_raised() {
    let url = serve_once(
        b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
    );
    let response = source(Duration::from_secs(5)).get(&url).unwrap();
    assert_eq!(response.status, 503);
    assert_eq!(response.content_type, "");
}

#[test]
fn refused_connection_is_transient() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let failure = source(Duration::from_secs(5))
        .get(&format!("http://{addr}/"))
        .unwrap_err();
    assert_matches!(failure, FetchFailure::Connection(_));
    assert!(failure.is_transient());
}

#[test]
fn silent_server_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        if let Ok((stream, _)) = listener.accept() {
            read_request(&stream);
            thread::sleep(Duration::from_secs(3));
        }
    });

    let failure = source(Duration::from_millis(300))
        .get(&format!("http://{addr}/"))
        .unwrap_err();
    assert_eq!(failure, FetchFailure::Timeout);
    assert_eq!(failure.to_string(), "Timeout");
}
