//! Reply forms emitted by the executor. The singleton forms serialize to
//! pre-built constants so the hot paths never format anything.

pub const OK_BYTES: &[u8] = b"+OK\r\n";
pub const NIL_BULK_BYTES: &[u8] = b"$-1\r\n";
pub const EMPTY_MULTI_BULK_BYTES: &[u8] = b"*0\r\n";
pub const SYNTAX_ERR_BYTES: &[u8] = b"-Err syntax error\r\n";
pub const WRONG_TYPE_ERR_BYTES: &[u8] =
    b"-WRONGTYPE Operation against a key holding the wrong kind of value\r\n";

#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    Ok,
    Simple(String),
    Int(i64),
    Bulk(Vec<u8>),
    /// Array of bulk strings; a `None` slot encodes a nil element.
    MultiBulk(Vec<Option<Vec<u8>>>),
    EmptyMultiBulk,
    Nil,
    Err(String),
    SyntaxErr,
    WrongTypeErr,
}

impl Reply {
    /// A multi-bulk reply without nil slots; empty input collapses to the
    /// empty-array singleton.
    pub fn multi(items: Vec<Vec<u8>>) -> Reply {
        if items.is_empty() {
            Reply::EmptyMultiBulk
        } else {
            Reply::MultiBulk(items.into_iter().map(Some).collect())
        }
    }

    pub fn unknown_command(verb: &[u8]) -> Reply {
        Reply::Err(format!(
            "Err unknown command '{}'",
            String::from_utf8_lossy(verb)
        ))
    }

    pub fn wrong_arg_count(verb: &str) -> Reply {
        Reply::Err(format!("Err wrong number of arguments for '{}'", verb))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Reply::Ok => out.extend_from_slice(OK_BYTES),
            Reply::Simple(s) => {
                out.push(b'+');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Int(n) => {
                out.push(b':');
                out.extend_from_slice(n.to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Bulk(data) => write_bulk(&mut out, data),
            Reply::MultiBulk(items) => {
                out.push(b'*');
                out.extend_from_slice(items.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                for item in items {
                    match item {
                        Some(data) => write_bulk(&mut out, data),
                        None => out.extend_from_slice(NIL_BULK_BYTES),
                    }
                }
            }
            Reply::EmptyMultiBulk => out.extend_from_slice(EMPTY_MULTI_BULK_BYTES),
            Reply::Nil => out.extend_from_slice(NIL_BULK_BYTES),
            Reply::Err(msg) => {
                out.push(b'-');
                out.extend_from_slice(msg.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::SyntaxErr => out.extend_from_slice(SYNTAX_ERR_BYTES),
            Reply::WrongTypeErr => out.extend_from_slice(WRONG_TYPE_ERR_BYTES),
        }
        out
    }
}

fn write_bulk(out: &mut Vec<u8>, data: &[u8]) {
    out.push(b'$');
    out.extend_from_slice(data.len().to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
}

/// Serializes a command line as a multi-bulk frame. This is both the request
/// encoding and the append-only log's on-disk record format.
pub fn multibulk_bytes(args: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(b'*');
    out.extend_from_slice(args.len().to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
    for arg in args {
        write_bulk(&mut out, arg);
    }
    out
}
