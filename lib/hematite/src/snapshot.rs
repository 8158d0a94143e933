//! The binary dump codec. On-disk layout: the ASCII signature, then per
//! non-empty database a SELECTDB opcode with a network-order database id
//! followed by its entries (type byte, length-prefixed key, payload), and
//! a final EOF opcode. Every integer on disk is a network-order `u32`.
//!
//! The writer streams into a temp file next to the target and renames it
//! into place only on success, so a failed save never clobbers the
//! previous dump.

use crate::db::Database;
use crate::object::{Blob, Value};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use hashbrown::HashSet;
use std::collections::VecDeque;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

const SIGNATURE: &[u8] = b"REDIS0000";
const TYPE_STRING: u8 = 0;
const TYPE_LIST: u8 = 1;
const TYPE_SET: u8 = 2;
const OP_SELECTDB: u8 = 0xFE;
const OP_EOF: u8 = 0xFF;

pub type DumpResult<T> = Result<T, DumpError>;

#[derive(Debug)]
pub enum DumpError {
    Io(io::Error),
    BadSignature,
    /// The file selects a database this server is not configured to hold.
    BadDatabaseId(u32),
    /// The file is authoritative; a repeated key means corruption.
    DuplicateKey,
    BadType(u8),
}

impl From<io::Error> for DumpError {
    #[inline]
    fn from(error: io::Error) -> Self {
        DumpError::Io(error)
    }
}

impl fmt::Display for DumpError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DumpError::Io(e) => write!(f, "i/o error: {}", e),
            DumpError::BadSignature => write!(f, "wrong signature"),
            DumpError::BadDatabaseId(id) => write!(f, "database id {} out of range", id),
            DumpError::DuplicateKey => write!(f, "duplicated key found"),
            DumpError::BadType(t) => write!(f, "unknown value type {}", t),
        }
    }
}

/// Temp file in the target's directory, so the final rename stays on one
/// filesystem.
pub(crate) fn temp_path(target: &Path, prefix: &str) -> PathBuf {
    let name = format!("{}-{}-{}.rdb", prefix, std::process::id(), rand::random::<u32>());
    match target.parent() {
        Some(dir) if dir.as_os_str().len() > 0 => dir.join(name),
        _ => PathBuf::from(name),
    }
}

fn write_blob<W: Write>(writer: &mut W, bytes: &[u8]) -> io::Result<()> {
    writer.write_u32::<BigEndian>(bytes.len() as u32)?;
    writer.write_all(bytes)
}

fn write_value<W: Write>(writer: &mut W, value: &Value) -> io::Result<()> {
    match value {
        Value::Str(s) => write_blob(writer, s),
        Value::List(list) => {
            writer.write_u32::<BigEndian>(list.len() as u32)?;
            for element in list {
                write_blob(writer, element)?;
            }
            Ok(())
        }
        Value::Set(set) => {
            writer.write_u32::<BigEndian>(set.len() as u32)?;
            for element in set {
                write_blob(writer, element)?;
            }
            Ok(())
        }
    }
}

fn write_dump(dbs: &[Database], path: &Path) -> DumpResult<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    writer.write_all(SIGNATURE)?;
    for (index, db) in dbs.iter().enumerate() {
        if db.len() == 0 {
            continue;
        }
        writer.write_u8(OP_SELECTDB)?;
        writer.write_u32::<BigEndian>(index as u32)?;

        for (key, value) in db.iter() {
            writer.write_u8(value.dump_type())?;
            write_blob(&mut writer, key)?;
            write_value(&mut writer, value)?;
        }
    }
    writer.write_u8(OP_EOF)?;
    writer.flush()?;
    Ok(())
}

/// Serialize every database into `path`, atomically replacing whatever was
/// there. Failure leaves the previous dump intact and the temp unlinked.
pub fn save(dbs: &[Database], path: &Path) -> DumpResult<()> {
    let tmp = temp_path(path, "tmp");
    match write_dump(dbs, &tmp) {
        Ok(()) => fs::rename(&tmp, path).map_err(|error| {
            let _ = fs::remove_file(&tmp);
            error.into()
        }),
        Err(error) => {
            let _ = fs::remove_file(&tmp);
            Err(error)
        }
    }
}

fn read_blob<R: Read>(reader: &mut R) -> DumpResult<Blob> {
    let len = reader.read_u32::<BigEndian>()? as usize;
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes)?;
    Ok(Rc::new(bytes))
}

fn read_value<R: Read>(reader: &mut R, value_type: u8) -> DumpResult<Value> {
    match value_type {
        TYPE_STRING => Ok(Value::Str(read_blob(reader)?)),
        TYPE_LIST => {
            let count = reader.read_u32::<BigEndian>()?;
            let mut list = VecDeque::with_capacity(count as usize);
            for _ in 0..count {
                list.push_back(read_blob(reader)?);
            }
            Ok(Value::List(list))
        }
        TYPE_SET => {
            let count = reader.read_u32::<BigEndian>()?;
            let mut set = HashSet::with_capacity(count as usize);
            for _ in 0..count {
                set.insert(read_blob(reader)?);
            }
            Ok(Value::Set(set))
        }
        other => Err(DumpError::BadType(other)),
    }
}

/// Load a dump into the (empty) databases. Returns false when there is no
/// file at `path`; every other irregularity is an error, since a corrupt
/// dump must not be silently ignored.
pub fn load(dbs: &mut [Database], path: &Path) -> DumpResult<bool> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(ref error) if error.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(error) => return Err(error.into()),
    };
    let mut reader = BufReader::new(file);

    let mut signature = [0u8; 9];
    reader.read_exact(&mut signature)?;
    if &signature[..] != SIGNATURE {
        return Err(DumpError::BadSignature);
    }

    let mut current = 0usize;
    loop {
        let opcode = reader.read_u8()?;
        if opcode == OP_EOF {
            break;
        }
        if opcode == OP_SELECTDB {
            let index = reader.read_u32::<BigEndian>()?;
            if index as usize >= dbs.len() {
                return Err(DumpError::BadDatabaseId(index));
            }
            current = index as usize;
            continue;
        }

        let key = read_blob(&mut reader)?;
        let value = read_value(&mut reader, opcode)?;
        if dbs[current].add(key, value).is_err() {
            return Err(DumpError::DuplicateKey);
        }
    }
    Ok(true)
}
