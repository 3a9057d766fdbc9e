//! A minimal FTP client that stores one payload on a server in passive mode.
//!
//! The control connection is read one byte at a time, so servers that trickle their replies out
//! byte by byte are handled the same as any other. Every step checks the reply code, and any
//! failure abandons the whole attempt: the next attempt starts again from the greeting.

use alloc::string::String;
use core::net::{Ipv4Addr, SocketAddrV4};

use log::{debug, info, warn};

use crate::net::{self, NetError, NetStack};

/// Longest reply line accepted on the control connection, not counting the final `\n`.
pub const MAX_LINE_LEN: usize = 512;
/// Placeholder in the remote path that is replaced with the session identity.
pub const SESSION_PLACEHOLDER: &str = "{session}";

/// Where and as whom to store uploads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub remote_path: String,
}

impl Default for FtpTarget {
    fn default() -> Self {
        FtpTarget {
            host: "ftp.example.com".into(),
            port: 21,
            username: "user".into(),
            password: "pass".into(),
            remote_path: "/upload/data.txt".into(),
        }
    }
}

/// Replaces every [SESSION_PLACEHOLDER] in `template` with `session`.
pub fn expand_remote_path(template: &str, session: &str) -> String {
    template.replace(SESSION_PLACEHOLDER, session)
}

/// A PASV reply whose address tuple could not be understood.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasvParseError {
    /// No `(` ... `)` pair in the reply.
    MissingParentheses,
    /// The tuple did not have exactly six fields.
    FieldCount(usize),
    /// A field was not a number from 0 to 255.
    InvalidNumber,
}

impl core::fmt::Display for PasvParseError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PasvParseError::MissingParentheses => write!(f, "PASV reply has no address tuple"),
            PasvParseError::FieldCount(n) => {
                write!(f, "PASV address tuple has {n} fields instead of 6")
            }
            PasvParseError::InvalidNumber => write!(f, "PASV address tuple has an invalid field"),
        }
    }
}

/// Parses the `(h1,h2,h3,h4,p1,p2)` tuple of a PASV reply into the data connection address
/// `h1.h2.h3.h4:p1*256+p2`.
pub fn parse_pasv(reply: &str) -> core::result::Result<SocketAddrV4, PasvParseError> {
    let open = reply.find('(').ok_or(PasvParseError::MissingParentheses)?;
    let close = reply[open..]
        .find(')')
        .ok_or(PasvParseError::MissingParentheses)?
        + open;
    let tuple = &reply[open + 1..close];

    let mut fields = [0u8; 6];
    let mut count = 0;
    for field in tuple.split(',') {
        if count < fields.len() {
            fields[count] = field
                .trim()
                .parse()
                .map_err(|_| PasvParseError::InvalidNumber)?;
        }
        count += 1;
    }
    if count != fields.len() {
        return Err(PasvParseError::FieldCount(count));
    }
    let [h1, h2, h3, h4, p1, p2] = fields;
    Ok(SocketAddrV4::new(
        Ipv4Addr::new(h1, h2, h3, h4),
        u16::from(p1) * 256 + u16::from(p2),
    ))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A control or data connection failed.
    Connectivity(NetError),
    /// The PASV reply could not be parsed.
    ProtocolParse(PasvParseError),
    /// A reply line did not start with a three-digit code.
    MalformedReply,
    /// The server answered `command` with a code that does not let the upload continue.
    UnexpectedReply { command: &'static str, code: u16 },
    /// A reply line exceeded [MAX_LINE_LEN].
    LineTooLong,
}
pub type Result<T> = core::result::Result<T, Error>;

impl From<NetError> for Error {
    fn from(e: NetError) -> Self {
        Error::Connectivity(e)
    }
}

impl From<PasvParseError> for Error {
    fn from(e: PasvParseError) -> Self {
        Error::ProtocolParse(e)
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Connectivity(e) => write!(f, "{e}"),
            Error::ProtocolParse(e) => write!(f, "{e}"),
            Error::MalformedReply => write!(f, "malformed reply line"),
            Error::UnexpectedReply { command, code } => {
                write!(f, "unexpected reply {code} to {command}")
            }
            Error::LineTooLong => write!(f, "reply line too long"),
        }
    }
}

/// One complete (possibly multi-line) server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    /// The last line of the reply, code included.
    pub text: String,
}

impl Reply {
    fn class(&self) -> u16 {
        self.code / 100
    }
}

/// Reads one line, one byte per receive call, up to and excluding the `\n`. A trailing `\r` is
/// dropped as well.
fn read_line<S: NetStack>(stack: &mut S, stream: &mut S::Stream) -> Result<String> {
    let mut line = heapless::Vec::<u8, MAX_LINE_LEN>::new();
    let mut byte = [0u8; 1];
    loop {
        if stack.recv(stream, &mut byte)? == 0 {
            return Err(Error::Connectivity(NetError::Reset));
        }
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]).map_err(|_| Error::LineTooLong)?;
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}

fn reply_code(line: &str) -> Option<u16> {
    let code = line.get(..3)?;
    if !code.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    code.parse().ok()
}

/// Reads a reply. A first line of the form `xyz-...` starts a multi-line reply that runs until a
/// line starting with `xyz ` (or just `xyz`).
fn read_reply<S: NetStack>(stack: &mut S, stream: &mut S::Stream) -> Result<Reply> {
    let mut text = read_line(stack, stream)?;
    let code = reply_code(&text).ok_or(Error::MalformedReply)?;
    if text.as_bytes().get(3) == Some(&b'-') {
        loop {
            text = read_line(stack, stream)?;
            let is_last = reply_code(&text) == Some(code)
                && matches!(text.as_bytes().get(3), None | Some(b' '));
            if is_last {
                break;
            }
        }
    }
    debug!("FTP: {text}");
    Ok(Reply { code, text })
}

fn send_command<S: NetStack>(stack: &mut S, stream: &mut S::Stream, command: &str) -> Result<()> {
    if command.starts_with("PASS ") {
        debug!("FTP> PASS ****");
    } else {
        debug!("FTP> {command}");
    }
    let line = alloc::format!("{command}\r\n");
    Ok(net::send_all(stack, stream, line.as_bytes())?)
}

fn expect(reply: Reply, command: &'static str, accept: impl Fn(&Reply) -> bool) -> Result<Reply> {
    if accept(&reply) {
        Ok(reply)
    } else {
        Err(Error::UnexpectedReply {
            command,
            code: reply.code,
        })
    }
}

fn command<S: NetStack>(
    stack: &mut S,
    stream: &mut S::Stream,
    name: &'static str,
    line: &str,
    accept: impl Fn(&Reply) -> bool,
) -> Result<Reply> {
    send_command(stack, stream, line)?;
    let reply = read_reply(stack, stream)?;
    expect(reply, name, accept)
}

/// Uploads `data` to `target`, reporting only whether it worked. The reason for a failure is
/// logged.
pub fn upload<S: NetStack>(stack: &mut S, target: &FtpTarget, data: &[u8]) -> bool {
    match try_upload(stack, target, data) {
        Ok(()) => true,
        Err(e) => {
            warn!("FTP upload to {}:{} failed: {e}", target.host, target.port);
            false
        }
    }
}

/// Uploads `data` to `target`. On failure the control connection gets a best-effort `QUIT` before
/// it is closed, and every socket opened on the way is closed again.
pub fn try_upload<S: NetStack>(stack: &mut S, target: &FtpTarget, data: &[u8]) -> Result<()> {
    let mut control = net::connect_host(stack, &target.host, target.port)?;
    let result = run_session(stack, &mut control, target, data);
    if result.is_err() {
        // The connection may be unusable by now; this is only a courtesy to the server.
        let _ = send_command(stack, &mut control, "QUIT");
    }
    stack.close(control);
    result
}

fn run_session<S: NetStack>(
    stack: &mut S,
    control: &mut S::Stream,
    target: &FtpTarget,
    data: &[u8],
) -> Result<()> {
    let greeting = read_reply(stack, control)?;
    expect(greeting, "greeting", |r| r.class() == 2)?;

    let user = command(
        stack,
        control,
        "USER",
        &alloc::format!("USER {}", target.username),
        |r| matches!(r.class(), 2 | 3),
    )?;
    // 230 straight after USER means no password is needed.
    if user.class() == 3 {
        command(
            stack,
            control,
            "PASS",
            &alloc::format!("PASS {}", target.password),
            |r| r.class() == 2,
        )?;
    }
    command(stack, control, "TYPE", "TYPE I", |r| r.class() == 2)?;
    let pasv = command(stack, control, "PASV", "PASV", |r| r.code == 227)?;
    let data_addr = parse_pasv(&pasv.text)?;

    command(
        stack,
        control,
        "STOR",
        &alloc::format!("STOR {}", target.remote_path),
        |r| r.class() == 1,
    )?;
    let mut data_stream = stack.connect(data_addr)?;
    let transfer = net::send_all(stack, &mut data_stream, data);
    stack.close(data_stream);
    transfer?;

    let done = read_reply(stack, control)?;
    expect(done, "STOR", |r| r.class() == 2)?;
    info!(
        "FTP: stored {} bytes as {} on {}",
        data.len(),
        target.remote_path,
        target.host
    );

    // The payload is already stored, so a missing goodbye does not fail the upload.
    if let Err(e) = send_command(stack, control, "QUIT").and_then(|()| read_reply(stack, control)) {
        debug!("FTP: no reply to QUIT: {e}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockPeer, MockStack};

    const DATA: &[u8] = b"1700000000 Ping: 12.0 ms average over 4 of 4 pings";

    fn target() -> FtpTarget {
        FtpTarget {
            host: "192.0.2.1".into(),
            ..Default::default()
        }
    }

    fn control(script: &str) -> MockPeer {
        MockPeer {
            incoming: script.as_bytes().to_vec(),
            ..Default::default()
        }
    }

    const HAPPY_SCRIPT: &str = "220 Welcome\r\n\
        331 Password required\r\n\
        230 Logged in\r\n\
        200 Type set to I\r\n\
        227 Entering Passive Mode (127,0,0,1,200,3).\r\n\
        150 Ok to send data\r\n\
        226 Transfer complete\r\n\
        221 Goodbye\r\n";

    #[test]
    fn parses_pasv_reply() {
        assert_eq!(
            parse_pasv("227 Entering Passive Mode (192,168,1,10,200,3)."),
            Ok(SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 10), 51203))
        );
        assert_eq!(
            parse_pasv("227 Entering Passive Mode ( 10, 0, 0, 1, 0, 21 )"),
            Ok(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 21))
        );
    }

    #[test]
    fn rejects_malformed_pasv_reply() {
        assert_eq!(parse_pasv("227 OK"), Err(PasvParseError::MissingParentheses));
        assert_eq!(
            parse_pasv("227 (192,168,1,10,200"),
            Err(PasvParseError::MissingParentheses)
        );
        assert_eq!(
            parse_pasv("227 (192,168,1,10,200)"),
            Err(PasvParseError::FieldCount(5))
        );
        assert_eq!(
            parse_pasv("227 (192,168,1,10,200,3,4)"),
            Err(PasvParseError::FieldCount(7))
        );
        assert_eq!(
            parse_pasv("227 (192,168,1,300,200,3)"),
            Err(PasvParseError::InvalidNumber)
        );
    }

    #[test]
    fn expands_session_placeholder() {
        assert_eq!(
            expand_remote_path("/upload/{session}/data.txt", "ab12-1700000000-42"),
            "/upload/ab12-1700000000-42/data.txt"
        );
        assert_eq!(expand_remote_path("/upload/data.txt", "x"), "/upload/data.txt");
    }

    #[test]
    fn full_upload_sends_expected_commands_and_payload() {
        let mut stack = MockStack::new(None)
            .with_peer(control(HAPPY_SCRIPT))
            .with_peer(MockPeer::default());
        assert!(upload(&mut stack, &target(), DATA));

        assert_eq!(
            stack.sent_text(0),
            "USER user\r\nPASS pass\r\nTYPE I\r\nPASV\r\nSTOR /upload/data.txt\r\nQUIT\r\n"
        );
        assert_eq!(
            stack.connections[0].addr,
            Some(SocketAddrV4::new(Ipv4Addr::new(192, 0, 2, 1), 21))
        );
        assert_eq!(
            stack.connections[1].addr,
            Some(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 51203))
        );
        assert_eq!(stack.connections[1].sent, DATA);
        assert!(stack.connections[0].closed);
        assert!(stack.connections[1].closed);
    }

    // Without parentheses in the PASV reply there is no data address, so no data connection may be
    // attempted, and the control connection still has to be torn down.
    #[test]
    fn pasv_failure_aborts_before_data_connection() {
        let script = "220 Welcome\r\n331 Password required\r\n230 Logged in\r\n200 OK\r\n227 OK\r\n";
        let mut stack = MockStack::new(None)
            .with_peer(control(script))
            .with_peer(MockPeer::default());
        assert_eq!(
            try_upload(&mut stack, &target(), DATA),
            Err(Error::ProtocolParse(PasvParseError::MissingParentheses))
        );
        assert_eq!(stack.connections.len(), 1);
        assert_eq!(stack.peers.len(), 1);
        assert!(stack.sent_text(0).ends_with("PASV\r\nQUIT\r\n"));
        assert!(stack.connections[0].closed);
    }

    #[test]
    fn tolerates_one_byte_at_a_time_server() {
        let mut peer = control(HAPPY_SCRIPT);
        peer.recv_chunk = 1;
        let mut stack = MockStack::new(None)
            .with_peer(peer)
            .with_peer(MockPeer::default());
        assert!(upload(&mut stack, &target(), DATA));
    }

    #[test]
    fn consumes_multi_line_replies() {
        let script = "220-Welcome to the\r\n\
            220-upload server\r\n\
            220 Ready\r\n\
            230 No password needed\r\n\
            200 Type set to I\r\n\
            227 Entering Passive Mode (127,0,0,1,4,1)\r\n\
            125 Data connection already open\r\n\
            226-Transfer complete\r\n\
            226 Bye for now\r\n";
        let mut stack = MockStack::new(None)
            .with_peer(control(script))
            .with_peer(MockPeer::default());
        assert_eq!(try_upload(&mut stack, &target(), DATA), Ok(()));
        // The immediate 230 skips PASS, and the missing QUIT reply is not an error.
        assert_eq!(
            stack.sent_text(0),
            "USER user\r\nTYPE I\r\nPASV\r\nSTOR /upload/data.txt\r\nQUIT\r\n"
        );
        assert_eq!(
            stack.connections[1].addr,
            Some(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 1025))
        );
    }

    #[test]
    fn rejected_login_aborts_with_quit() {
        let script = "220 Welcome\r\n331 Password required\r\n530 Login incorrect\r\n";
        let mut stack = MockStack::new(None).with_peer(control(script));
        assert_eq!(
            try_upload(&mut stack, &target(), DATA),
            Err(Error::UnexpectedReply {
                command: "PASS",
                code: 530
            })
        );
        assert!(stack.sent_text(0).ends_with("PASS pass\r\nQUIT\r\n"));
        assert!(stack.connections[0].closed);
    }

    // A rejected STOR ends the attempt before any data connection is opened.
    #[test]
    fn refused_stor_opens_no_data_connection() {
        let script = "220 Welcome\r\n230 OK\r\n200 OK\r\n\
            227 Entering Passive Mode (127,0,0,1,200,3)\r\n\
            550 Permission denied\r\n";
        let mut stack = MockStack::new(None)
            .with_peer(control(script))
            .with_peer(MockPeer::default());
        assert_eq!(
            try_upload(&mut stack, &target(), DATA),
            Err(Error::UnexpectedReply {
                command: "STOR",
                code: 550
            })
        );
        assert_eq!(stack.connections.len(), 1);
        assert!(stack.sent_text(0).ends_with("STOR /upload/data.txt\r\nQUIT\r\n"));
        assert!(stack.connections[0].closed);
    }

    #[test]
    fn failed_data_connection_aborts_with_quit() {
        let script = "220 Welcome\r\n230 OK\r\n200 OK\r\n\
            227 Entering Passive Mode (127,0,0,1,200,3)\r\n\
            150 Ok to send data\r\n";
        let mut stack = MockStack::new(None)
            .with_peer(control(script))
            .with_peer(MockPeer {
                refuse: Some(NetError::Refused),
                ..Default::default()
            });
        assert_eq!(
            try_upload(&mut stack, &target(), DATA),
            Err(Error::Connectivity(NetError::Refused))
        );
        assert!(stack.sent_text(0).ends_with("STOR /upload/data.txt\r\nQUIT\r\n"));
        assert!(stack.connections[0].closed);
    }

    #[test]
    fn overlong_or_truncated_lines_fail() {
        let long = "2".repeat(MAX_LINE_LEN + 10);
        let mut stack = MockStack::new(None).with_peer(control(&long));
        assert_eq!(
            try_upload(&mut stack, &target(), DATA),
            Err(Error::LineTooLong)
        );

        let mut stack = MockStack::new(None).with_peer(control("220 Wel"));
        assert_eq!(
            try_upload(&mut stack, &target(), DATA),
            Err(Error::Connectivity(NetError::Reset))
        );

        let mut stack = MockStack::new(None).with_peer(control("Hello\r\n"));
        assert_eq!(
            try_upload(&mut stack, &target(), DATA),
            Err(Error::MalformedReply)
        );
    }

    #[test]
    fn unreachable_server_is_a_connectivity_error() {
        let mut stack = MockStack::new(None);
        assert_eq!(
            try_upload(&mut stack, &target(), DATA),
            Err(Error::Connectivity(NetError::Refused))
        );
    }
}
