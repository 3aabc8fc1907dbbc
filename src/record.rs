//! Fixed-width record codec.
//!
//! Two layouts share the same key/value body:
//!
//! * on disk a record is exactly [`RECORD_SIZE`] bytes: the key followed by the value,
//!   with no separators, header or trailer;
//! * on the wire every record is wrapped into a [`FRAME_SIZE`] byte frame which is prefixed
//!   by a one byte completion flag. A stream of frames ends with exactly one completion frame
//!   whose body is padding.

use std::error::Error;
use std::fmt;
use std::fmt::{Debug, Display};
use std::io;
use std::io::prelude::*;

/// Key length in bytes.
pub const KEY_SIZE: usize = 10;
/// Value length in bytes.
pub const VALUE_SIZE: usize = 90;
/// On-disk record length in bytes.
pub const RECORD_SIZE: usize = KEY_SIZE + VALUE_SIZE;
/// On-wire frame length in bytes.
pub const FRAME_SIZE: usize = 1 + RECORD_SIZE;

const FLAG_RECORD: u8 = 0;
const FLAG_COMPLETE: u8 = 1;

/// Record framing violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The input ended in the middle of a key.
    TruncatedKey(usize),
    /// The input ended in the middle of a value.
    TruncatedValue(usize),
    /// The stream ended in the middle of a frame.
    TruncatedFrame(usize),
    /// The stream was closed before a completion frame was received.
    MissingCompletion,
    /// Frame flag is neither a record nor a completion marker.
    InvalidFlag(u8),
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::TruncatedKey(read) => {
                write!(f, "truncated key ({} of {} bytes)", read, KEY_SIZE)
            }
            DecodeError::TruncatedValue(read) => {
                write!(f, "truncated value ({} of {} bytes)", read, VALUE_SIZE)
            }
            DecodeError::TruncatedFrame(read) => {
                write!(f, "truncated frame ({} of {} bytes)", read, FRAME_SIZE)
            }
            DecodeError::MissingCompletion => write!(f, "stream closed before completion marker"),
            DecodeError::InvalidFlag(flag) => write!(f, "invalid frame flag {:#04x}", flag),
        }
    }
}

impl Error for DecodeError {}

/// Record reading/writing error.
#[derive(Debug)]
pub enum RecordError {
    /// Underlying stream error.
    IO(io::Error),
    /// Malformed record framing.
    Decode(DecodeError),
}

impl Error for RecordError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(match &self {
            RecordError::IO(err) => err,
            RecordError::Decode(err) => err,
        })
    }
}

impl Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            RecordError::IO(err) => write!(f, "I/O operation failed: {}", err),
            RecordError::Decode(err) => write!(f, "record decoding error: {}", err),
        }
    }
}

impl From<io::Error> for RecordError {
    fn from(err: io::Error) -> Self {
        RecordError::IO(err)
    }
}

impl From<DecodeError> for RecordError {
    fn from(err: DecodeError) -> Self {
        RecordError::Decode(err)
    }
}

/// Fixed-size key/value record.
#[derive(Clone, PartialEq, Eq)]
pub struct Record {
    key: [u8; KEY_SIZE],
    value: [u8; VALUE_SIZE],
}

impl Record {
    pub fn new(key: [u8; KEY_SIZE], value: [u8; VALUE_SIZE]) -> Self {
        Record { key, value }
    }

    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    pub fn value(&self) -> &[u8; VALUE_SIZE] {
        &self.value
    }

    fn from_body(body: &[u8]) -> Self {
        let mut key = [0u8; KEY_SIZE];
        let mut value = [0u8; VALUE_SIZE];
        key.copy_from_slice(&body[..KEY_SIZE]);
        value.copy_from_slice(&body[KEY_SIZE..RECORD_SIZE]);

        return Record { key, value };
    }
}

impl Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("key", &self.key)
            .field("value_len", &self.value.len())
            .finish()
    }
}

/// Unit of the node-to-node stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A real record.
    Record(Record),
    /// End-of-stream marker. Nothing follows it on the connection.
    Complete,
}

enum Fill {
    Empty,
    Partial(usize),
    Full,
}

fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<Fill> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }

    return Ok(match filled {
        0 => Fill::Empty,
        n if n == buf.len() => Fill::Full,
        n => Fill::Partial(n),
    });
}

/// Reads one on-disk record.
/// Returns `Ok(None)` if the input is exhausted exactly on a record boundary.
pub fn read_record<R: Read>(reader: &mut R) -> Result<Option<Record>, RecordError> {
    let mut key = [0u8; KEY_SIZE];
    match fill(reader, &mut key)? {
        Fill::Empty => return Ok(None),
        Fill::Partial(read) => return Err(DecodeError::TruncatedKey(read).into()),
        Fill::Full => {}
    }

    let mut value = [0u8; VALUE_SIZE];
    match fill(reader, &mut value)? {
        Fill::Empty => return Err(DecodeError::TruncatedValue(0).into()),
        Fill::Partial(read) => return Err(DecodeError::TruncatedValue(read).into()),
        Fill::Full => {}
    }

    return Ok(Some(Record { key, value }));
}

/// Writes one on-disk record: key then value, nothing else.
pub fn write_record<W: Write>(writer: &mut W, record: &Record) -> io::Result<()> {
    writer.write_all(&record.key)?;
    writer.write_all(&record.value)
}

/// Reads one wire frame. A stream that ends before the completion frame is a decoding error.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Frame, RecordError> {
    let mut buf = [0u8; FRAME_SIZE];
    match fill(reader, &mut buf)? {
        Fill::Empty => return Err(DecodeError::MissingCompletion.into()),
        Fill::Partial(read) => return Err(DecodeError::TruncatedFrame(read).into()),
        Fill::Full => {}
    }

    match buf[0] {
        FLAG_RECORD => Ok(Frame::Record(Record::from_body(&buf[1..]))),
        FLAG_COMPLETE => Ok(Frame::Complete),
        flag => Err(DecodeError::InvalidFlag(flag).into()),
    }
}

/// Writes one wire frame. Completion frames carry zeroed padding.
pub fn write_frame<W: Write>(writer: &mut W, frame: &Frame) -> io::Result<()> {
    let mut buf = [0u8; FRAME_SIZE];
    match frame {
        Frame::Record(record) => {
            buf[0] = FLAG_RECORD;
            buf[1..1 + KEY_SIZE].copy_from_slice(&record.key);
            buf[1 + KEY_SIZE..].copy_from_slice(&record.value);
        }
        Frame::Complete => buf[0] = FLAG_COMPLETE,
    }

    writer.write_all(&buf)
}

/// Iterator over on-disk records of a byte stream.
pub struct RecordReader<R> {
    reader: R,
    done: bool,
}

impl<R: Read> RecordReader<R> {
    pub fn new(reader: R) -> Self {
        RecordReader { reader, done: false }
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<Record, RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match read_record(&mut self.reader) {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::io;

    use rand::Rng;
    use rstest::*;

    use super::{
        read_frame, read_record, write_frame, write_record, DecodeError, Frame, Record, RecordError, RecordReader,
        FRAME_SIZE, KEY_SIZE, RECORD_SIZE, VALUE_SIZE,
    };

    pub(crate) fn record_with_key(first: u8, rest: u8) -> Record {
        let mut key = [rest; KEY_SIZE];
        key[0] = first;
        Record::new(key, [first ^ rest; VALUE_SIZE])
    }

    pub(crate) fn random_record<R: Rng>(rng: &mut R) -> Record {
        let mut key = [0u8; KEY_SIZE];
        let mut value = [0u8; VALUE_SIZE];
        rng.fill(&mut key[..]);
        rng.fill(&mut value[..]);
        Record::new(key, value)
    }

    #[test]
    fn test_disk_round_trip() {
        let mut rng = rand::thread_rng();
        let saved = Vec::from_iter((0..50).map(|_| random_record(&mut rng)));

        let mut buf = Vec::new();
        for record in &saved {
            write_record(&mut buf, record).unwrap();
        }
        assert_eq!(buf.len(), saved.len() * RECORD_SIZE);

        let restored: Result<Vec<Record>, RecordError> = RecordReader::new(io::Cursor::new(buf)).collect();
        assert_eq!(restored.unwrap(), saved);
    }

    #[test]
    fn test_disk_layout() {
        let record = record_with_key(0xAB, 0x01);
        let mut buf = Vec::new();
        write_record(&mut buf, &record).unwrap();

        assert_eq!(&buf[..KEY_SIZE], record.key());
        assert_eq!(&buf[KEY_SIZE..], record.value());
    }

    #[test]
    fn test_empty_input() {
        let mut reader = io::Cursor::new(Vec::new());
        assert!(read_record(&mut reader).unwrap().is_none());
    }

    #[rstest]
    #[case(RECORD_SIZE + 5, DecodeError::TruncatedKey(5))]
    #[case(RECORD_SIZE + KEY_SIZE, DecodeError::TruncatedValue(0))]
    #[case(RECORD_SIZE + KEY_SIZE + 40, DecodeError::TruncatedValue(40))]
    fn test_truncated_input(#[case] len: usize, #[case] expected: DecodeError) {
        let records: Vec<Result<Record, RecordError>> = RecordReader::new(io::Cursor::new(vec![7u8; len])).collect();

        assert_eq!(records.len(), 2);
        assert!(records[0].is_ok());
        match &records[1] {
            Err(RecordError::Decode(err)) => assert_eq!(err, &expected),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_frame_stream() {
        let frames = vec![
            Frame::Record(record_with_key(1, 2)),
            Frame::Record(record_with_key(3, 4)),
            Frame::Complete,
        ];

        let mut buf = Vec::new();
        for frame in &frames {
            write_frame(&mut buf, frame).unwrap();
        }
        assert_eq!(buf.len(), frames.len() * FRAME_SIZE);
        assert_eq!(buf[2 * FRAME_SIZE], 1);
        assert!(buf[2 * FRAME_SIZE + 1..].iter().all(|b| *b == 0));

        let mut reader = io::Cursor::new(buf);
        for frame in &frames {
            assert_eq!(&read_frame(&mut reader).unwrap(), frame);
        }
    }

    #[rstest]
    #[case(vec![], DecodeError::MissingCompletion)]
    #[case(vec![0u8; 30], DecodeError::TruncatedFrame(30))]
    #[case(vec![2u8; FRAME_SIZE], DecodeError::InvalidFlag(2))]
    fn test_bad_frame(#[case] bytes: Vec<u8>, #[case] expected: DecodeError) {
        match read_frame(&mut io::Cursor::new(bytes)) {
            Err(RecordError::Decode(err)) => assert_eq!(err, expected),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_completion_padding_ignored() {
        let mut bytes = vec![0xFFu8; FRAME_SIZE];
        bytes[0] = 1;
        assert_eq!(read_frame(&mut io::Cursor::new(bytes)).unwrap(), Frame::Complete);
    }
}
