use hashbrown::HashSet;
use std::collections::VecDeque;
use std::rc::Rc;

/// A shared binary-safe string. Strings are the only value kind that is
/// handed out by reference: keys, list and set elements, and reply
/// fragments all share ownership of one allocation through the count.
pub type Blob = Rc<Vec<u8>>;

#[inline]
pub fn blob(bytes: &[u8]) -> Blob {
    Rc::new(bytes.to_vec())
}

/// A value stored under a key. List and set payloads own their string
/// elements; dropping the container releases one count per element.
/// Cycles cannot form since containers hold strings only.
#[derive(Debug, PartialEq)]
pub enum Value {
    Str(Blob),
    List(VecDeque<Blob>),
    Set(HashSet<Blob>),
}

impl Value {
    /// Type byte used by the dump codec.
    #[inline]
    pub fn dump_type(&self) -> u8 {
        match self {
            Value::Str(_) => 0,
            Value::List(_) => 1,
            Value::Set(_) => 2,
        }
    }

    /// Name reported by the TYPE command.
    #[inline]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Set(_) => "set",
        }
    }
}

/// Canned reply objects built once at startup and handed out by reference,
/// so the common replies never allocate.
pub struct Shared {
    pub crlf: Blob,
    pub ok: Blob,
    pub err: Blob,
    pub nil: Blob,
    pub zero: Blob,
    pub one: Blob,
    /// no such key
    pub minus1: Blob,
    /// operation against a key holding a value of the wrong type
    pub minus2: Blob,
    /// src and dst objects are the same
    pub minus3: Blob,
    /// out of range argument
    pub minus4: Blob,
    pub pong: Blob,
    pub space: Blob,
    pub wrongtype_err: Blob,
    pub wrongtype_err_bulk: Blob,
    pub nokey_err: Blob,
    pub nokey_err_bulk: Blob,
    pub syntax_err: Blob,
    pub syntax_err_bulk: Blob,
    pub select: Vec<Blob>,
}

/// Renders an error line as the bulk-context variant: the negative payload
/// length followed by the line itself.
fn bulk_variant(line: &[u8]) -> Blob {
    let mut out = format!("-{}\r\n", line.len() - 2).into_bytes();
    out.extend_from_slice(line);
    Rc::new(out)
}

impl Shared {
    pub fn new() -> Shared {
        let wrongtype =
            blob(b"-ERR Operation against a key holding the wrong kind of value\r\n");
        let nokey = blob(b"-ERR no such key\r\n");
        let syntax = blob(b"-ERR syntax error\r\n");

        Shared {
            crlf: blob(b"\r\n"),
            ok: blob(b"+OK\r\n"),
            err: blob(b"-ERR\r\n"),
            nil: blob(b"nil\r\n"),
            zero: blob(b"0\r\n"),
            one: blob(b"1\r\n"),
            minus1: blob(b"-1\r\n"),
            minus2: blob(b"-2\r\n"),
            minus3: blob(b"-3\r\n"),
            minus4: blob(b"-4\r\n"),
            pong: blob(b"+PONG\r\n"),
            space: blob(b" "),
            wrongtype_err_bulk: bulk_variant(&wrongtype),
            wrongtype_err: wrongtype,
            nokey_err_bulk: bulk_variant(&nokey),
            nokey_err: nokey,
            syntax_err_bulk: bulk_variant(&syntax),
            syntax_err: syntax,
            select: (0..10)
                .map(|n| Rc::new(format!("select {}\r\n", n).into_bytes()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_sharing_is_by_count() {
        let s = blob(b"shared");
        let mut list = VecDeque::new();
        list.push_back(s.clone());
        list.push_back(s.clone());

        assert_eq!(Rc::strong_count(&s), 3);

        drop(list);
        assert_eq!(Rc::strong_count(&s), 1);
    }

    #[test]
    fn test_set_membership_is_byte_equality() {
        let mut set = HashSet::new();
        assert!(set.insert(blob(b"a")));
        // A distinct allocation with equal bytes is the same member.
        assert!(!set.insert(blob(b"a")));
        assert!(set.contains(&b"a".to_vec()));
    }

    #[test]
    fn test_dump_types() {
        assert_eq!(Value::Str(blob(b"x")).dump_type(), 0);
        assert_eq!(Value::List(VecDeque::new()).dump_type(), 1);
        assert_eq!(Value::Set(HashSet::new()).dump_type(), 2);
    }

    #[test]
    fn test_bulk_error_variants() {
        let shared = Shared::new();
        assert_eq!(&shared.nokey_err[..], b"-ERR no such key\r\n");
        assert_eq!(&shared.nokey_err_bulk[..], b"-16\r\n-ERR no such key\r\n");
    }

    #[test]
    fn test_canned_selects() {
        let shared = Shared::new();
        assert_eq!(&shared.select[0][..], b"select 0\r\n");
        assert_eq!(&shared.select[9][..], b"select 9\r\n");
    }
}
