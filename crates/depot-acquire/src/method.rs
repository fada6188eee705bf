use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use depot_hashes::{HashKind, HashStringList};
use depot_util::{
    dequote_string, format_rfc1123, parse_rfc1123, read_messages, url_encode_bad, Configuration,
    MessageReader,
};

use crate::error::{AcquireError, Result};
use crate::errorstack::ErrorStack;
use crate::item::{FetchItem, FetchResult};
use crate::message::Message;
use crate::privs::drop_privileges;

/// What a method announces in its `100 Capabilities` message.
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub name: &'static str,
    pub version: &'static str,
    pub single_instance: bool,
    pub pipeline: bool,
    pub send_config: bool,
    pub send_uri_encoded: bool,
}

impl Capabilities {
    pub fn new(name: &'static str, version: &'static str) -> Capabilities {
        Capabilities {
            name,
            version,
            single_instance: false,
            pipeline: false,
            send_config: false,
            send_uri_encoded: false,
        }
    }

    pub fn single_instance(mut self) -> Self {
        self.single_instance = true;
        self
    }
    pub fn pipeline(mut self) -> Self {
        self.pipeline = true;
        self
    }
    pub fn send_config(mut self) -> Self {
        self.send_config = true;
        self
    }
    pub fn send_uri_encoded(mut self) -> Self {
        self.send_uri_encoded = true;
        self
    }
}

static TERMINATED: AtomicBool = AtomicBool::new(false);

extern "C" fn mark_terminated(_sig: libc::c_int) {
    TERMINATED.store(true, Ordering::SeqCst);
}

/// Install SIGTERM/SIGINT handlers that only raise a flag; the method
/// loop checks [`terminated`] at its suspension points, flushes the
/// partial file and exits with status 100.
pub fn install_signal_handlers() {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
    let action = SigAction::new(
        SigHandler::Handler(mark_terminated),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe {
        let _ = sigaction(Signal::SIGTERM, &action);
        let _ = sigaction(Signal::SIGINT, &action);
    }
}

pub fn terminated() -> bool {
    TERMINATED.load(Ordering::SeqCst)
}

/// The method side of the wire: configuration, the error stack, and the
/// outgoing message sink. Handed to the fetch hook alongside each item.
pub struct MethodIo {
    pub config: Configuration,
    pub errors: ErrorStack,
    send_uri_encoded: bool,
    out: Box<dyn Write + Send>,
}

impl MethodIo {
    fn new(out: Box<dyn Write + Send>, send_uri_encoded: bool) -> Self {
        Self {
            config: Configuration::new(),
            errors: ErrorStack::new(),
            send_uri_encoded,
            out,
        }
    }

    /// An io whose messages go nowhere, for methods that drive another
    /// method internally (the mirror chooser) and report themselves.
    pub fn discard(config: Configuration) -> Self {
        let mut io = Self::new(Box::new(std::io::sink()), true);
        io.config = config;
        io
    }

    pub fn send(&mut self, message: Message) -> Result<()> {
        self.out.write_all(message.render().as_bytes())?;
        self.out.flush()?;
        Ok(())
    }

    fn encode_uri(&self, uri: &str) -> String {
        if self.send_uri_encoded {
            uri.to_string()
        } else {
            url_encode_bad(uri)
        }
    }

    pub fn log(&mut self, text: &str) -> Result<()> {
        self.send(Message::new(101, "Log").header("Message", text))
    }

    pub fn status(&mut self, text: &str) -> Result<()> {
        self.send(Message::new(102, "Status").header("Message", text))
    }

    pub fn warning(&mut self, text: &str) -> Result<()> {
        self.send(Message::new(104, "Warning").header("Message", text))
    }

    /// `103 Redirect`, pointing the scheduler at a new URI.
    pub fn redirect(&mut self, item: &FetchItem, new_uri: &str) -> Result<()> {
        let msg = Message::new(103, "Redirect")
            .header("URI", self.encode_uri(&item.uri))
            .header("New-URI", self.encode_uri(new_uri));
        self.send(msg)
    }

    pub fn uri_start(
        &mut self,
        item: &FetchItem,
        size: Option<u64>,
        last_modified: Option<chrono::DateTime<chrono::Utc>>,
        resume_point: u64,
    ) -> Result<()> {
        let mut msg = Message::new(200, "URI Start").header("URI", self.encode_uri(&item.uri));
        if let Some(size) = size {
            msg = msg.header("Size", size.to_string());
        }
        if let Some(when) = last_modified {
            msg = msg.header("Last-Modified", format_rfc1123(when));
        }
        if resume_point > 0 {
            msg = msg.header("Resume-Point", resume_point.to_string());
        }
        self.send(msg)
    }

    pub fn uri_done(&mut self, item: &FetchItem, result: &FetchResult) -> Result<()> {
        let mut msg = Message::new(201, "URI Done")
            .header("URI", self.encode_uri(&item.uri))
            .header("Filename", result.filename.to_string_lossy().into_owned())
            .header("Size", result.size.to_string());
        if let Some(when) = result.last_modified {
            msg = msg.header("Last-Modified", format_rfc1123(when));
        }
        for hash in result.hashes.iter() {
            msg = msg.header(format!("{}-Hash", hash.kind()), hash.value());
        }
        if result.resume_point > 0 {
            msg = msg.header("Resume-Point", result.resume_point.to_string());
        }
        if result.ims_hit {
            msg = msg.header("IMS-Hit", "true");
        }
        for alt in &result.alt_uris {
            msg = msg.header("Alt-URIs", alt.clone());
        }
        if !result.signed_by.is_empty() {
            msg = msg.header("Signed-By", result.signed_by.join("\n"));
        }
        self.send(msg)
    }

    /// `400 URI Failure` from an error, draining the error stack into
    /// the message text.
    pub fn uri_failure(&mut self, item: &FetchItem, error: &AcquireError) -> Result<()> {
        let text = self
            .errors
            .top_error()
            .map(|m| m.to_string())
            .unwrap_or_else(|| error.to_string());
        self.errors.drain();

        let mut msg = Message::new(400, "URI Failure")
            .header("URI", self.encode_uri(&item.uri))
            .header("Message", text)
            .header("FailReason", error.fail_reason());
        if error.is_transient() {
            msg = msg.header("Transient-Failure", "true");
        }
        self.send(msg)
    }
}

/// The per-item fetch hook of a concrete method.
pub trait MethodHandler {
    fn fetch(&mut self, io: &mut MethodIo, item: &FetchItem) -> Result<()>;

    /// Requests that arrived back-to-back are offered together so a
    /// pipelining method can stack them on one connection. The default
    /// handles them one by one; a per-item failure is reported and the
    /// rest continue.
    fn fetch_many(&mut self, io: &mut MethodIo, items: Vec<FetchItem>) -> Result<()> {
        for item in items {
            if let Err(error) = self.fetch(io, &item) {
                io.uri_failure(&item, &error)?;
            }
        }
        Ok(())
    }

    /// Called once the `601 Configuration` message was installed.
    fn configured(&mut self, _io: &mut MethodIo) -> Result<()> {
        Ok(())
    }
}

/// Build a [`FetchItem`] out of a `600 URI Acquire` message.
pub fn parse_fetch_item(message: &Message, uri_encoded: bool) -> Result<FetchItem> {
    let uri = message
        .get("URI")
        .ok_or_else(|| AcquireError::Protocol("600 without URI".into()))?;
    let filename = message
        .get("Filename")
        .ok_or_else(|| AcquireError::Protocol("600 without Filename".into()))?;

    let mut expected = HashStringList::new();
    for kind in HashKind::ALL {
        if let Some(value) = message.get(&format!("Expected-{kind}")) {
            if let Ok(hash) = depot_hashes::HashString::new(kind, value) {
                expected.push(hash);
            }
        }
    }

    Ok(FetchItem {
        uri: if uri_encoded {
            uri.to_string()
        } else {
            dequote_string(uri)
        },
        dest_file: PathBuf::from(filename),
        last_modified: message.get("Last-Modified").and_then(parse_rfc1123),
        expected_hashes: expected,
        index_file: message.get("Index-File") == Some("true"),
        maximum_size: message.get("Maximum-Size").and_then(|s| s.parse().ok()),
        fail_ignore: message.get("Fail-Ignore") == Some("true"),
        signed_by: message.get("Signed-By").map(|s| s.to_string()),
    })
}

/// Run a method against arbitrary streams; the executables pass stdin
/// and stdout, tests pass pipes.
pub fn run_method_on<R: Read>(
    caps: &Capabilities,
    handler: &mut dyn MethodHandler,
    input: &mut R,
    output: Box<dyn Write + Send>,
) -> Result<i32> {
    let mut io = MethodIo::new(output, caps.send_uri_encoded);

    let mut hello = Message::new(100, "Capabilities").header("Version", caps.version);
    if caps.single_instance {
        hello = hello.header("Single-Instance", "true");
    }
    if caps.pipeline {
        hello = hello.header("Pipeline", "true");
    }
    if caps.send_config {
        hello = hello.header("Send-Config", "true");
    }
    if caps.send_uri_encoded {
        hello = hello.header("Send-URI-Encoded", "true");
    }
    io.send(hello)?;

    let mut reader = MessageReader::new();
    let mut texts: Vec<String> = Vec::new();
    loop {
        if terminated() {
            return Ok(100);
        }
        let alive = read_messages(input, &mut reader, &mut texts)?;
        let mut batch: Vec<FetchItem> = Vec::new();
        for text in texts.drain(..) {
            let message = Message::parse(&text)?;
            match message.code {
                601 => {
                    for item in message.get_all("Config-Item") {
                        let decoded = dequote_string(item);
                        if let Err(e) = io.config.set_cli_item(&decoded) {
                            tracing::debug!(item, "ignoring malformed config item: {e}");
                        }
                    }
                    drop_privileges(&io.config)?;
                    handler.configured(&mut io)?;
                }
                600 => batch.push(parse_fetch_item(&message, caps.send_uri_encoded)?),
                code => {
                    tracing::debug!(code, "ignoring unexpected message");
                }
            }
        }
        if !batch.is_empty() {
            handler.fetch_many(&mut io, batch)?;
        }
        if !alive {
            // parent closed our stdin: clean exit
            return Ok(0);
        }
    }
}

/// Entry point for method executables: speak the protocol on
/// stdin/stdout until the parent hangs up.
pub fn run_method(caps: Capabilities, handler: &mut dyn MethodHandler) -> i32 {
    install_signal_handlers();
    let mut stdin = std::io::stdin().lock();
    match run_method_on(&caps, handler, &mut stdin, Box::new(std::io::stdout())) {
        Ok(code) => code,
        Err(error) => {
            tracing::error!(%error, "method loop failed");
            1
        }
    }
}
