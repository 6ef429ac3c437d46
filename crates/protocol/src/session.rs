//! The sender-side daemon session state machine.
//!
//! A [`Session`] is transport-free: the owner feeds it raw socket bytes
//! through [`Session::receive`] and writes whatever [`Session::take_output`]
//! yields back to the peer, until [`Session::finished`] turns true. All
//! protocol sequencing lives here; file data comes from the [`Module`]
//! implementations handed to [`Session::new`].
//!
//! The connection walks through five stages: version handshake, module
//! selection, argument vector, filter list, and the generator loop that
//! serves file-list blocks and file data until the receiver has sent its
//! final done marker three times over.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::generator::{self, GeneratorRequest};
use crate::handshake::{self, GREETING};
use crate::module::{FileEntry, FileList, Module};
use crate::multiplex::{self, MessageCode};
use crate::ndx::{NDX_DONE, NDX_FLIST_EOF, NDX_FLIST_OFFSET, NdxState};
use crate::options::{self, MAX_ARGUMENT_LENGTH, MAX_ARGUMENTS, SessionOptions};
use crate::varint::encode_varlong;
use crate::{Decoded, ProtocolError};

/// Scan limit for the client's version line, newline included.
const HANDSHAKE_LINE_LIMIT: usize = 16;
/// Longest accepted module-selection command.
const MAX_COMMAND_LENGTH: usize = 40;
/// Longest accepted filter line.
const MAX_FILTER_LENGTH: usize = 40;
/// File-list entries kept in flight before waiting for the receiver to
/// retire a block.
const FLIST_WINDOW: i64 = 1000;
/// Outbound data frames are cut to this payload size.
const DATA_FRAME_LEN: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Handshake,
    Command,
    Arguments,
    ProtectedArguments,
    Filters,
    Generator,
}

pub struct Session {
    state: State,
    modules: Vec<Arc<dyn Module>>,
    protocol: u32,
    seed: i32,

    inbound: Vec<u8>,
    plain: Vec<u8>,
    output: Vec<u8>,
    mux_out: bool,
    demux_in: bool,
    finished: bool,

    args: Vec<String>,
    options: SessionOptions,
    module: Option<Arc<dyn Module>>,

    lists: Vec<Arc<FileList>>,
    next_list: usize,
    sent_window: i64,
    eof_sent: bool,
    completed_lists: usize,
    phase: u32,
    read_ndx: NdxState,
    write_ndx: NdxState,
}

impl Session {
    /// Creates a session over the given modules and queues the greeting.
    ///
    /// `seed` is the checksum seed offered to the client; a client-supplied
    /// `--checksum-seed` overrides it.
    pub fn new(modules: Vec<Arc<dyn Module>>, seed: i32) -> Self {
        Self {
            state: State::Handshake,
            modules,
            protocol: handshake::PROTOCOL_VERSION,
            seed,
            inbound: Vec::new(),
            plain: Vec::new(),
            output: GREETING.to_vec(),
            mux_out: false,
            demux_in: false,
            finished: false,
            args: Vec::new(),
            options: SessionOptions::default(),
            module: None,
            lists: Vec::new(),
            next_list: 0,
            sent_window: 0,
            eof_sent: false,
            completed_lists: 0,
            phase: 0,
            read_ndx: NdxState::new(),
            write_ndx: NdxState::new(),
        }
    }

    /// Feeds raw socket bytes into the state machine.
    ///
    /// On error the rendered `@ERROR` text has already been queued for the
    /// client and the session is finished; the caller flushes the output
    /// and closes the connection.
    pub fn receive(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        if self.finished {
            return Ok(());
        }
        self.inbound.extend_from_slice(bytes);
        match self.process() {
            Ok(()) => Ok(()),
            Err(error) => {
                self.render_error(&error);
                self.finished = true;
                Err(error)
            }
        }
    }

    /// Drains the bytes queued for the peer.
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }

    pub fn has_output(&self) -> bool {
        !self.output.is_empty()
    }

    /// True once the session will neither read nor produce anything more.
    pub fn finished(&self) -> bool {
        self.finished
    }

    /// Name of the selected module, once one has been chosen.
    pub fn module_name(&self) -> Option<&str> {
        self.module.as_deref().map(Module::name)
    }

    fn process(&mut self) -> Result<(), ProtocolError> {
        loop {
            if self.demux_in {
                self.demultiplex()?;
            }
            let progressed = match self.state {
                State::Handshake => self.run_handshake()?,
                State::Command => self.run_command()?,
                State::Arguments | State::ProtectedArguments => self.run_arguments()?,
                State::Filters => self.run_filters()?,
                State::Generator => self.run_generator()?,
            };
            if !progressed || self.finished {
                return Ok(());
            }
        }
    }

    /// Moves complete inbound data frames into the plain buffer.
    fn demultiplex(&mut self) -> Result<(), ProtocolError> {
        loop {
            let consumed = match multiplex::decode_frame(&self.inbound)? {
                Decoded::Value(frame, consumed) => {
                    if !frame.is_data() {
                        return Err(ProtocolError::UnexpectedMultiplexTag(frame.tag));
                    }
                    self.plain.extend_from_slice(frame.payload);
                    consumed
                }
                Decoded::NeedMore => return Ok(()),
            };
            self.inbound.drain(..consumed);
        }
    }

    fn run_handshake(&mut self) -> Result<bool, ProtocolError> {
        let (line, consumed) =
            match handshake::read_token(&self.inbound, b'\n', HANDSHAKE_LINE_LIMIT)? {
                Decoded::Value(line, consumed) => (line.to_vec(), consumed),
                Decoded::NeedMore => return Ok(false),
            };
        self.inbound.drain(..consumed);

        let (major, minor) = handshake::parse_greeting(&line)?;
        self.protocol = handshake::negotiate(major, minor)?;
        debug!(major, ?minor, negotiated = self.protocol, "handshake complete");
        self.state = State::Command;
        Ok(true)
    }

    fn run_command(&mut self) -> Result<bool, ProtocolError> {
        let (line, consumed) =
            match handshake::read_token(&self.inbound, b'\n', MAX_COMMAND_LENGTH + 1)? {
                Decoded::Value(line, consumed) => (line.to_vec(), consumed),
                Decoded::NeedMore => return Ok(false),
            };
        self.inbound.drain(..consumed);

        let mut name = String::from_utf8_lossy(&line).into_owned();
        if name.ends_with('\r') {
            name.pop();
        }

        if name.is_empty() || name == "#list" {
            for module in &self.modules {
                self.output
                    .extend_from_slice(format!("{:<15}\t{}\n", module.name(), module.description()).as_bytes());
            }
            self.output.extend_from_slice(b"@RSYNCD: EXIT\n");
            self.finished = true;
            return Ok(true);
        }

        let Some(module) = self.modules.iter().find(|m| m.name() == name).cloned() else {
            return Err(ProtocolError::UnknownModule(name));
        };
        debug!(module = module.name(), "module selected");
        self.module = Some(module);
        self.output.extend_from_slice(b"@RSYNCD: OK\n");
        // Everything sent from here on is multiplexed, except the setup
        // response which travels raw.
        self.mux_out = true;
        self.state = State::Arguments;
        Ok(true)
    }

    fn run_arguments(&mut self) -> Result<bool, ProtocolError> {
        let delimiter = if self.protocol >= 30 { 0 } else { b'\n' };
        let (token, consumed) =
            match handshake::read_token(&self.inbound, delimiter, MAX_ARGUMENT_LENGTH + 1)? {
                Decoded::Value(token, consumed) => (token.to_vec(), consumed),
                Decoded::NeedMore => return Ok(false),
            };
        self.inbound.drain(..consumed);

        if !token.is_empty() {
            if self.args.len() >= MAX_ARGUMENTS {
                return Err(ProtocolError::TooManyArguments);
            }
            self.args.push(String::from_utf8_lossy(&token).into_owned());
            return Ok(true);
        }

        // With --protect-args the clear vector is only the announcement;
        // the real vector follows in a second round, still before setup.
        if self.state == State::Arguments && wants_protected_args(&self.args) {
            self.args.clear();
            self.state = State::ProtectedArguments;
            return Ok(true);
        }

        // The protected batch leads with the client program name.
        let args = if self.state == State::ProtectedArguments {
            self.args.get(1..).unwrap_or_default()
        } else {
            &self.args[..]
        };
        self.options = options::parse(args)?;
        trace!(options = ?self.options, "arguments validated");
        if let Some(seed) = self.options.checksum_seed {
            self.seed = seed;
        }

        let compat: u8 = 0x01 | if self.options.client_wants_safe_flist() { 0x08 } else { 0 };
        self.output.push(compat);
        self.output.extend_from_slice(&self.seed.to_le_bytes());

        self.demux_in = true;
        self.state = State::Filters;
        Ok(true)
    }

    fn run_filters(&mut self) -> Result<bool, ProtocolError> {
        let (line, consumed) =
            match handshake::read_token(&self.plain, b'\n', MAX_FILTER_LENGTH + 1)? {
                Decoded::Value(line, consumed) => (line.to_vec(), consumed),
                Decoded::NeedMore => return Ok(false),
            };
        self.plain.drain(..consumed);

        if !line.is_empty() {
            return Err(ProtocolError::FiltersUnsupported);
        }

        self.start_transfer()?;
        self.state = State::Generator;
        Ok(true)
    }

    /// Resolves the requested path and sends the initial file-list block.
    fn start_transfer(&mut self) -> Result<(), ProtocolError> {
        let module = self.module.clone().ok_or(ProtocolError::NoSuchPath)?;
        let lists = module
            .file_lists(&self.options.path, self.options.recurse)
            .map_err(|_| ProtocolError::NoSuchPath)?;

        let target_is_dir = lists.first().is_some_and(|list| list.root().is_directory());
        if target_is_dir && !self.options.recurse && !self.options.xfer_dirs {
            let display = relative_display(&self.options.path, module.name());
            debug!(path = %self.options.path, "directory skipped without -r or -d");
            let info = format!("skipping directory {display}\n");
            multiplex::encode_frame(MessageCode::Info, info.as_bytes(), &mut self.output);
            // An empty file list: just the block terminator, then EOF.
            self.lists = Vec::new();
            self.queue_data(&[0x00]);
        } else {
            self.lists = lists;
        }

        self.send_extra_file_lists();
        Ok(())
    }

    fn run_generator(&mut self) -> Result<bool, ProtocolError> {
        let (request, consumed) = match generator::decode_request(&mut self.read_ndx, &self.plain)? {
            Decoded::Value(request, consumed) => (request, consumed),
            Decoded::NeedMore => return Ok(false),
        };
        self.plain.drain(..consumed);

        self.send_extra_file_lists();
        match request {
            GeneratorRequest::Done => self.completed_list(),
            GeneratorRequest::File { index, attributes, checksums } => {
                trace!(index, iflags = attributes.iflags, "file requested");
                let entry = self.entry_for(index)?;
                let mut payload = Vec::new();
                generator::encode_echo(
                    &mut self.write_ndx,
                    index,
                    &attributes,
                    checksums.as_ref(),
                    &mut payload,
                )?;
                if attributes.is_transfer() {
                    if let Some(content) = &entry.content {
                        let framed = if self.options.compress {
                            &content.framed_compressed
                        } else {
                            &content.framed_raw
                        };
                        payload.extend_from_slice(framed);
                    }
                }
                self.queue_data(&payload);
            }
        }
        Ok(true)
    }

    /// Streams pending file-list blocks while the in-flight entry count
    /// stays under the window, then announces end-of-lists exactly once.
    fn send_extra_file_lists(&mut self) {
        if self.eof_sent {
            return;
        }
        while self.sent_window < FLIST_WINDOW && self.next_list < self.lists.len() {
            let list = Arc::clone(&self.lists[self.next_list]);
            let mut payload = Vec::new();
            if self.next_list > 0 {
                self.write_ndx.encode(NDX_FLIST_OFFSET - self.next_list as i32, &mut payload);
            }
            payload.extend_from_slice(list.wire());
            self.queue_data(&payload);
            self.sent_window += list.len() as i64;
            self.next_list += 1;
        }
        if self.next_list >= self.lists.len() {
            let mut payload = Vec::new();
            self.write_ndx.encode(NDX_FLIST_EOF, &mut payload);
            self.queue_data(&payload);
            self.eof_sent = true;
        }
    }

    /// Handles one receiver done marker: retire a file list or advance the
    /// phase, echoing the marker back each time. The second phase change
    /// carries the transfer statistics; the third ends the session.
    fn completed_list(&mut self) {
        let mut payload = Vec::new();
        self.completed_lists += 1;
        if self.completed_lists >= self.lists.len() {
            self.phase += 1;
            if self.phase == 2 {
                self.write_ndx.encode(NDX_DONE, &mut payload);
                // Bytes read, bytes written, total size, list build and
                // transfer times; none of which this daemon tracks.
                for _ in 0..5 {
                    encode_varlong(0, 3, &mut payload);
                }
                self.queue_data(&payload);
                return;
            }
            if self.phase > 2 {
                self.write_ndx.encode(NDX_DONE, &mut payload);
                self.queue_data(&payload);
                debug!("session complete");
                self.finished = true;
                return;
            }
        } else {
            // Retiring a block frees window space; flush what it unblocks
            // before echoing the marker.
            self.sent_window -= self.lists[self.completed_lists - 1].len() as i64;
            self.send_extra_file_lists();
        }
        self.write_ndx.encode(NDX_DONE, &mut payload);
        self.queue_data(&payload);
    }

    fn entry_for(&self, index: i32) -> Result<Arc<FileEntry>, ProtocolError> {
        for list in &self.lists {
            if let Some(entry) = list.entry(index) {
                return Ok(Arc::clone(entry));
            }
        }
        let max = self.lists.last().map_or(-1, |list| list.first_index() + list.len() as i32 - 1);
        Err(ProtocolError::IndexOutOfRange { index, max })
    }

    /// Queues protocol data, multiplexed and cut into bounded frames.
    fn queue_data(&mut self, payload: &[u8]) {
        for chunk in payload.chunks(DATA_FRAME_LEN) {
            multiplex::encode_frame(MessageCode::Data, chunk, &mut self.output);
        }
    }

    fn render_error(&mut self, error: &ProtocolError) {
        let text = format!("@ERROR: {error}\n");
        if self.mux_out {
            multiplex::encode_frame(MessageCode::Error, text.as_bytes(), &mut self.output);
        } else {
            self.output.extend_from_slice(text.as_bytes());
        }
    }
}

/// True when the clear argument vector announces a protected round, either
/// as the long option or as `s` in a short cluster (anything after `e` is
/// the capability string, not options).
fn wants_protected_args(args: &[String]) -> bool {
    args.iter().any(|arg| {
        arg == "--protect-args"
            || (arg.starts_with('-')
                && !arg.starts_with("--")
                && arg[1..].chars().take_while(|&c| c != 'e').any(|c| c == 's'))
    })
}

/// Renders a request path relative to its module for client-facing text.
fn relative_display(path: &str, module: &str) -> String {
    let rest = path.strip_prefix(module).unwrap_or(path).trim_matches('/');
    if rest.is_empty() { ".".to_owned() } else { rest.to_owned() }
}
