use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};

use depot_acquire::{run_method_on, Capabilities};
use depot_hashes::{HashKind, MultiHasher};
use depot_methods::http::HttpMethod;

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn read_request(stream: &mut TcpStream) -> String {
    let mut raw = Vec::new();
    let mut byte = [0u8; 1];
    while !raw.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte).unwrap_or(0) == 0 {
            break;
        }
        raw.push(byte[0]);
    }
    String::from_utf8_lossy(&raw).into_owned()
}

fn sha256_of(data: &[u8]) -> String {
    let mut hasher = MultiHasher::from_mask(HashKind::Sha256.mask_bit());
    hasher.add(data);
    hasher
        .result()
        .find(HashKind::Sha256)
        .unwrap()
        .value()
        .to_string()
}

/// Run the http method over scripted stdin against a mock server.
fn run_against_server(
    input: String,
    server: impl FnOnce(TcpListener) + Send + 'static,
    listener: TcpListener,
) -> String {
    let handle = std::thread::spawn(move || server(listener));
    let output = SharedBuf::default();
    run_method_on(
        &HttpMethod::capabilities(),
        &mut HttpMethod::new(),
        &mut std::io::Cursor::new(input.into_bytes()),
        Box::new(output.clone()),
    )
    .unwrap();
    handle.join().unwrap();
    let bytes = output.0.lock().unwrap().clone();
    String::from_utf8(bytes).unwrap()
}

#[test]
fn plain_fetch_with_content_length() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("file");
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let body = b"hello over http".to_vec();

    let input = format!(
        "600 URI Acquire\nURI: http://127.0.0.1:{port}/file\nFilename: {}\n\n",
        dest.display()
    );
    let served = body.clone();
    let written = run_against_server(
        input,
        move |listener| {
            let (mut stream, _) = listener.accept().unwrap();
            let request = read_request(&mut stream);
            assert!(request.starts_with("GET /file HTTP/1.1\r\n"), "{request}");
            assert!(request.contains("Host: 127.0.0.1:"));
            write!(
                stream,
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n",
                served.len()
            )
            .unwrap();
            stream.write_all(&served).unwrap();
        },
        listener,
    );

    assert!(written.contains("200 URI Start"), "{written}");
    assert!(written.contains("201 URI Done"), "{written}");
    assert_eq!(std::fs::read(&dest).unwrap(), body);
}

#[test]
fn chunked_body_is_decoded() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("chunked");
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let input = format!(
        "600 URI Acquire\nURI: http://127.0.0.1:{port}/c\nFilename: {}\n\n",
        dest.display()
    );
    let written = run_against_server(
        input,
        move |listener| {
            let (mut stream, _) = listener.accept().unwrap();
            read_request(&mut stream);
            write!(
                stream,
                "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
                 5\r\nhello\r\n7\r\n chunks\r\n0\r\n\r\n"
            )
            .unwrap();
        },
        listener,
    );

    assert!(written.contains("201 URI Done"), "{written}");
    assert_eq!(std::fs::read(&dest).unwrap(), b"hello chunks");
}

#[test]
fn truncated_chunked_body_is_transient_and_keeps_partial() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("partial");
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let input = format!(
        "600 URI Acquire\nURI: http://127.0.0.1:{port}/t\nFilename: {}\n\n",
        dest.display()
    );
    let written = run_against_server(
        input,
        move |listener| {
            let (mut stream, _) = listener.accept().unwrap();
            read_request(&mut stream);
            // die in the middle of the second chunk
            write!(
                stream,
                "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\nA\r\ntrun"
            )
            .unwrap();
        },
        listener,
    );

    assert!(written.contains("400 URI Failure"), "{written}");
    assert!(written.contains("Transient-Failure: true"), "{written}");
    assert_eq!(std::fs::read(&dest).unwrap(), b"hellotrun");
}

#[test]
fn not_modified_reports_ims_hit() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("stale");
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let input = format!(
        "600 URI Acquire\nURI: http://127.0.0.1:{port}/i\nFilename: {}\n\
         Last-Modified: Sun, 06 Nov 1994 08:49:37 GMT\n\n",
        dest.display()
    );
    let written = run_against_server(
        input,
        move |listener| {
            let (mut stream, _) = listener.accept().unwrap();
            let request = read_request(&mut stream);
            assert!(
                request.contains("If-Modified-Since: Sun, 06 Nov 1994 08:49:37 GMT"),
                "{request}"
            );
            write!(stream, "HTTP/1.1 304 Not Modified\r\n\r\n").unwrap();
        },
        listener,
    );

    assert!(written.contains("IMS-Hit: true"), "{written}");
    assert!(!dest.exists());
}

#[test]
fn resume_sends_range_and_appends() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("resume");
    let payload: Vec<u8> = (0..1200u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(&dest, &payload[..500]).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let expected = sha256_of(&payload);

    let input = format!(
        "600 URI Acquire\nURI: http://127.0.0.1:{port}/r\nFilename: {}\n\
         Expected-SHA256: {expected}\n\n",
        dest.display()
    );
    let tail = payload[500..].to_vec();
    let written = run_against_server(
        input,
        move |listener| {
            let (mut stream, _) = listener.accept().unwrap();
            let request = read_request(&mut stream);
            assert!(request.contains("Range: bytes=500-"), "{request}");
            assert!(request.contains("If-Range: "), "{request}");
            write!(
                stream,
                "HTTP/1.1 206 Partial Content\r\n\
                 Content-Length: {}\r\n\
                 Content-Range: bytes 500-1199/1200\r\n\r\n",
                tail.len()
            )
            .unwrap();
            stream.write_all(&tail).unwrap();
        },
        listener,
    );

    assert!(written.contains("Resume-Point: 500"), "{written}");
    assert!(written.contains("Size: 1200"), "{written}");
    assert!(written.contains("201 URI Done"), "{written}");
    assert!(written.contains(&format!("SHA256-Hash: {expected}")), "{written}");
    assert_eq!(std::fs::read(&dest).unwrap(), payload);
}

#[test]
fn redirects_are_reported_not_followed_blindly() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("moved");
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let input = format!(
        "600 URI Acquire\nURI: http://127.0.0.1:{port}/old\nFilename: {}\n\n",
        dest.display()
    );
    let written = run_against_server(
        input,
        move |listener| {
            let (mut stream, _) = listener.accept().unwrap();
            read_request(&mut stream);
            write!(
                stream,
                "HTTP/1.1 301 Moved Permanently\r\nLocation: /new\r\nContent-Length: 0\r\n\r\n"
            )
            .unwrap();
        },
        listener,
    );

    assert!(written.contains("103 Redirect"), "{written}");
    assert!(written.contains(&format!("New-URI: http://127.0.0.1:{port}/new")), "{written}");
}

#[test]
fn cross_scheme_downgrade_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("x");
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let input = format!(
        "600 URI Acquire\nURI: http://127.0.0.1:{port}/a\nFilename: {}\n\n",
        dest.display()
    );
    let written = run_against_server(
        input,
        move |listener| {
            let (mut stream, _) = listener.accept().unwrap();
            read_request(&mut stream);
            write!(
                stream,
                "HTTP/1.1 302 Found\r\nLocation: ftp://other.example/a\r\nContent-Length: 0\r\n\r\n"
            )
            .unwrap();
        },
        listener,
    );

    assert!(written.contains("400 URI Failure"), "{written}");
    assert!(written.contains("FailReason: Redirect"), "{written}");
}

#[test]
fn missing_files_are_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("nf");
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let input = format!(
        "600 URI Acquire\nURI: http://127.0.0.1:{port}/gone\nFilename: {}\n\n",
        dest.display()
    );
    let written = run_against_server(
        input,
        move |listener| {
            let (mut stream, _) = listener.accept().unwrap();
            read_request(&mut stream);
            write!(
                stream,
                "HTTP/1.1 404 Not Found\r\nContent-Length: 9\r\n\r\nnot here!"
            )
            .unwrap();
        },
        listener,
    );

    assert!(written.contains("FailReason: NotFound"), "{written}");
    assert!(!written.contains("Transient-Failure"), "{written}");
}

#[test]
fn pipeline_misorder_is_detected_and_recovered() {
    let dir = tempfile::tempdir().unwrap();
    let dest_a = dir.path().join("file-a");
    let dest_b = dir.path().join("file-b");
    let body_a = b"body of the first file".to_vec();
    let body_b = b"entirely different second body".to_vec();
    let hash_a = sha256_of(&body_a);
    let hash_b = sha256_of(&body_b);

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let input = format!(
        "600 URI Acquire\nURI: http://127.0.0.1:{port}/a\nFilename: {}\nExpected-SHA256: {hash_a}\n\n\
         600 URI Acquire\nURI: http://127.0.0.1:{port}/b\nFilename: {}\nExpected-SHA256: {hash_b}\n\n",
        dest_a.display(),
        dest_b.display()
    );

    let (swap_first, swap_second) = (body_b.clone(), body_a.clone());
    let written = run_against_server(
        input,
        move |listener| {
            let (mut stream, _) = listener.accept().unwrap();
            // both requests are pipelined before any response
            let first = read_request(&mut stream);
            let second = read_request(&mut stream);
            assert!(first.contains("GET /a "), "{first}");
            assert!(second.contains("GET /b "), "{second}");
            // answer them in the wrong order
            for body in [&swap_first, &swap_second] {
                write!(stream, "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", body.len())
                    .unwrap();
                stream.write_all(body).unwrap();
            }
        },
        listener,
    );

    // one warning, both items completed with their own hashes
    assert_eq!(written.matches("104 Warning").count(), 1, "{written}");
    assert_eq!(written.matches("201 URI Done").count(), 2, "{written}");
    assert!(written.contains(&format!("SHA256-Hash: {hash_a}")), "{written}");
    assert!(written.contains(&format!("SHA256-Hash: {hash_b}")), "{written}");
    assert_eq!(std::fs::read(&dest_a).unwrap(), body_a);
    assert_eq!(std::fs::read(&dest_b).unwrap(), body_b);
}

#[test]
fn complete_partial_skips_the_network() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("done-already");
    let body = b"already fully downloaded".to_vec();
    std::fs::write(&dest, &body).unwrap();
    let expected = sha256_of(&body);

    // no server at all: the port is closed
    let port = {
        let l = TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    };

    let input = format!(
        "600 URI Acquire\nURI: http://127.0.0.1:{port}/x\nFilename: {}\n\
         Expected-SHA256: {expected}\n\n",
        dest.display()
    );
    let output = SharedBuf::default();
    run_method_on(
        &HttpMethod::capabilities(),
        &mut HttpMethod::new(),
        &mut std::io::Cursor::new(input.into_bytes()),
        Box::new(output.clone()),
    )
    .unwrap();

    let written = String::from_utf8(output.0.lock().unwrap().clone()).unwrap();
    assert!(written.contains("201 URI Done"), "{written}");
}

#[test]
fn accept_ranges_none_disables_resume_for_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let dest_one = dir.path().join("one");
    let dest_two = dir.path().join("two");
    // a partial that would normally trigger a Range request
    std::fs::write(&dest_two, b"partial").unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let input = format!(
        "601 Configuration\nConfig-Item: Acquire::http::Pipeline-Depth=1\n\n\
         600 URI Acquire\nURI: http://127.0.0.1:{port}/one\nFilename: {}\n\n\
         600 URI Acquire\nURI: http://127.0.0.1:{port}/two\nFilename: {}\n\n",
        dest_one.display(),
        dest_two.display()
    );
    let written = run_against_server(
        input,
        move |listener| {
            let (mut stream, _) = listener.accept().unwrap();
            let first = read_request(&mut stream);
            assert!(first.contains("GET /one "), "{first}");
            write!(
                stream,
                "HTTP/1.1 200 OK\r\nAccept-Ranges: none\r\nContent-Length: 3\r\n\r\nabc"
            )
            .unwrap();

            let second = read_request(&mut stream);
            assert!(second.contains("GET /two "), "{second}");
            assert!(
                !second.contains("Range:"),
                "ranges must stay off for this server: {second}"
            );
            write!(
                stream,
                "HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\nfull"
            )
            .unwrap();
        },
        listener,
    );

    assert_eq!(written.matches("201 URI Done").count(), 2, "{written}");
    assert_eq!(std::fs::read(&dest_two).unwrap(), b"full");
}
