//! Final sort and persistence.

use log;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io::{self, prelude::*};
use std::path::Path;

use rayon::slice::ParallelSliceMut;

use crate::record::{write_record, Record};

/// Mode of persisted output files, the one `File::create` yields under the usual `022` umask.
#[cfg(unix)]
pub const OUTPUT_MODE: u32 = 0o644;

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// Temporary output file creation error.
    TempFile(io::Error),
    /// Common I/O error.
    IO(io::Error),
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(match &self {
            SortError::ThreadPoolBuildError(err) => err,
            SortError::TempFile(err) => err,
            SortError::IO(err) => err,
        })
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
            SortError::TempFile(err) => write!(f, "temporary output file not created: {}", err),
            SortError::IO(err) => write!(f, "I/O operation failed: {}", err),
        }
    }
}

/// Sorts records by key on a dedicated thread pool.
pub struct RecordSorter {
    /// Sorting thread pool.
    thread_pool: rayon::ThreadPool,
}

impl RecordSorter {
    /// Creates a new sorter instance.
    ///
    /// # Arguments
    /// * `threads_number` - Number of threads to be used to sort data in parallel. If the parameter is [`None`]
    ///   threads number will be selected based on available CPU core number.
    pub fn new(threads_number: Option<usize>) -> Result<Self, SortError> {
        return Ok(RecordSorter {
            thread_pool: Self::init_thread_pool(threads_number)?,
        });
    }

    fn init_thread_pool(threads_number: Option<usize>) -> Result<rayon::ThreadPool, SortError> {
        let mut thread_pool_builder = rayon::ThreadPoolBuilder::new();

        if let Some(threads_number) = threads_number {
            log::info!("initializing thread-pool (threads: {})", threads_number);
            thread_pool_builder = thread_pool_builder.num_threads(threads_number);
        } else {
            log::info!("initializing thread-pool (threads: default)");
        }
        let thread_pool = thread_pool_builder
            .build()
            .map_err(|err| SortError::ThreadPoolBuildError(err))?;

        return Ok(thread_pool);
    }

    /// Sorts records by unsigned byte-wise key comparison.
    /// The relative order of records with equal keys is unspecified.
    pub fn sort(&self, mut records: Vec<Record>) -> Vec<Record> {
        log::debug!("sorting {} records ...", records.len());
        self.thread_pool.install(|| {
            records.par_sort_unstable_by(|a, b| a.key().cmp(b.key()));
        });

        return records;
    }
}

/// Writes records back to back in the on-disk layout.
pub fn persist<W: Write>(records: &[Record], writer: &mut W) -> io::Result<()> {
    for record in records {
        write_record(writer, record)?;
    }

    return Ok(());
}

/// Writes records to `path`.
/// The data goes to a temporary file next to `path` first, which is then renamed into place.
pub fn persist_to_path(records: &[Record], path: &Path) -> Result<(), SortError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let tmp_file = tempfile::NamedTempFile::new_in(dir).map_err(SortError::TempFile)?;

    let mut writer = io::BufWriter::new(tmp_file.as_file());
    persist(records, &mut writer).map_err(SortError::IO)?;
    writer.flush().map_err(SortError::IO)?;
    drop(writer);
    set_output_permissions(tmp_file.as_file()).map_err(SortError::IO)?;

    tmp_file.persist(path).map_err(|err| SortError::IO(err.error))?;
    log::info!("{} records saved to {}", records.len(), path.display());

    return Ok(());
}

// temporary files are created owner-only, widen them before they become the output
#[cfg(unix)]
fn set_output_permissions(file: &fs::File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    file.set_permissions(fs::Permissions::from_mode(OUTPUT_MODE))
}

#[cfg(not(unix))]
fn set_output_permissions(_file: &fs::File) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod test {
    use std::fs;

    use rand::seq::SliceRandom;
    use rstest::*;

    use super::{persist, persist_to_path, RecordSorter};
    use crate::record::test::{random_record, record_with_key};
    use crate::record::{Record, RecordReader, RECORD_SIZE};

    #[fixture]
    fn sorter() -> RecordSorter {
        RecordSorter::new(Some(2)).unwrap()
    }

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir_in("./").unwrap()
    }

    #[rstest]
    fn test_sort(sorter: RecordSorter) {
        let input_sorted = Vec::from_iter((0..=u8::MAX).map(|b| record_with_key(b, b)));

        let mut input_shuffled = input_sorted.clone();
        input_shuffled.shuffle(&mut rand::thread_rng());

        assert_eq!(sorter.sort(input_shuffled), input_sorted);
    }

    #[rstest]
    fn test_sort_unsigned_bytes(sorter: RecordSorter) {
        let high = record_with_key(0x00, 0xFF);
        let low = record_with_key(0x00, 0x01);
        let top = record_with_key(0x80, 0x00);

        assert_eq!(sorter.sort(vec![top.clone(), high.clone(), low.clone()]), vec![low, high, top]);
    }

    #[rstest]
    fn test_sort_idempotent(sorter: RecordSorter) {
        let mut rng = rand::thread_rng();
        let records = Vec::from_iter((0..1000).map(|_| random_record(&mut rng)));

        let once = sorter.sort(records);
        let twice = sorter.sort(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_persist_layout() {
        let records = vec![record_with_key(1, 2), record_with_key(3, 4)];
        let mut buf = Vec::new();
        persist(&records, &mut buf).unwrap();

        assert_eq!(buf.len(), 2 * RECORD_SIZE);
        assert_eq!(&buf[..10], records[0].key());
        assert_eq!(&buf[RECORD_SIZE..RECORD_SIZE + 10], records[1].key());
    }

    #[rstest]
    fn test_persist_to_path(sorter: RecordSorter, tmp_dir: tempfile::TempDir) {
        let mut rng = rand::thread_rng();
        let sorted = sorter.sort(Vec::from_iter((0..100).map(|_| random_record(&mut rng))));
        let path = tmp_dir.path().join("output.bin");

        persist_to_path(&sorted, &path).unwrap();

        let restored: Result<Vec<Record>, _> = RecordReader::new(fs::File::open(&path).unwrap()).collect();
        assert_eq!(restored.unwrap(), sorted);
        assert_eq!(fs::read_dir(tmp_dir.path()).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[rstest]
    fn test_persist_output_mode(tmp_dir: tempfile::TempDir) {
        use std::os::unix::fs::PermissionsExt;

        let path = tmp_dir.path().join("output.bin");
        persist_to_path(&[record_with_key(1, 1)], &path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, super::OUTPUT_MODE);
    }

    #[rstest]
    fn test_persist_empty(tmp_dir: tempfile::TempDir) {
        let path = tmp_dir.path().join("empty.bin");
        persist_to_path(&[], &path).unwrap();

        assert_eq!(fs::metadata(&path).unwrap().len(), 0);
    }
}
