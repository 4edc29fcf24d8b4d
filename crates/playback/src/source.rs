//! Where the scheduler's sectors come from.
//!
//! - [`RawSectorSource`] reads consecutive LBAs straight off the card,
//!   starting at 0 and stopping at the configured sector maximum.
//! - [`FileSource`] reads consecutive blocks from a file opened by an
//!   external file-system component, behind the [`BlockFile`] trait.

use core::convert::Infallible;

use platform::{ByteTransport, FatalSink, StreamConfig};
use sdcard::{IoError, SdCard, Sector};

/// What the scheduler should do after a successful read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Flow {
    /// More sectors follow.
    Continue,
    /// That was the last sector to read; stop playback.
    Last,
}

/// A producer of consecutive 512-byte sectors.
pub trait StreamSource {
    /// Read failure that ends playback.
    type Error;

    /// Fill `buf` with the next sector of the stream.
    fn read_next(&mut self, buf: &mut Sector) -> Result<Flow, Self::Error>;
}

// ── Raw card ────────────────────────────────────────────────────────────────

/// Sequential sector reads from LBA 0.
///
/// Read failures go to the card's fatal sink, so this source itself never
/// fails.
#[derive(Debug)]
pub struct RawSectorSource<T, F> {
    card: SdCard<T, F>,
    next_sector: u32,
    sector_max: u32,
}

impl<T, F> RawSectorSource<T, F>
where
    T: ByteTransport,
    F: FatalSink<IoError>,
{
    /// Stream `config.sector_max()` sectors from an initialised card.
    pub fn new(card: SdCard<T, F>, config: &StreamConfig) -> Self {
        Self {
            card,
            next_sector: 0,
            sector_max: config.sector_max(),
        }
    }

    /// Sector the next read will fetch.
    pub fn next_sector(&self) -> u32 {
        self.next_sector
    }

    /// The card, for inspection.
    pub fn card(&self) -> &SdCard<T, F> {
        &self.card
    }

    /// Give the card back.
    pub fn release(self) -> SdCard<T, F> {
        self.card
    }
}

impl<T, F> StreamSource for RawSectorSource<T, F>
where
    T: ByteTransport,
    F: FatalSink<IoError>,
{
    type Error = Infallible;

    fn read_next(&mut self, buf: &mut Sector) -> Result<Flow, Infallible> {
        self.card.read_sector(self.next_sector, buf);
        self.next_sector = self.next_sector.saturating_add(1);
        if self.next_sector >= self.sector_max {
            Ok(Flow::Last)
        } else {
            Ok(Flow::Continue)
        }
    }
}

// ── File system ─────────────────────────────────────────────────────────────

/// An open file, read in whole 512-byte blocks.
///
/// The file system behind it is the integrator's choice. `read_block` must
/// either fill the whole block or fail; a short read at end of file is a
/// failure.
pub trait BlockFile {
    /// Read failure, including end of file.
    type Error;

    /// Fill `buf` with the next block of the file.
    fn read_block(&mut self, buf: &mut Sector) -> Result<(), Self::Error>;
}

/// Consecutive blocks of a [`BlockFile`], until the first error.
///
/// There is no sector maximum on this path: the stream ends when the file
/// does, and the error that ended it is reported in the playback report.
#[derive(Debug)]
pub struct FileSource<B> {
    file: B,
    blocks_read: u32,
}

impl<B: BlockFile> FileSource<B> {
    /// Stream `file` from its current position.
    pub fn new(file: B) -> Self {
        Self {
            file,
            blocks_read: 0,
        }
    }

    /// Blocks read successfully so far.
    pub fn blocks_read(&self) -> u32 {
        self.blocks_read
    }

    /// Give the file back.
    pub fn release(self) -> B {
        self.file
    }
}

impl<B: BlockFile> StreamSource for FileSource<B> {
    type Error = B::Error;

    fn read_next(&mut self, buf: &mut Sector) -> Result<Flow, B::Error> {
        self.file.read_block(buf)?;
        self.blocks_read = self.blocks_read.saturating_add(1);
        Ok(Flow::Continue)
    }
}

/// [`BlockFile`] over any [`std::io::Read`], for host-side playback.
#[cfg(any(test, feature = "std"))]
#[derive(Debug)]
pub struct IoBlockFile<R>(pub R);

#[cfg(any(test, feature = "std"))]
impl<R: std::io::Read> BlockFile for IoBlockFile<R> {
    type Error = std::io::Error;

    fn read_block(&mut self, buf: &mut Sector) -> Result<(), std::io::Error> {
        self.0.read_exact(buf)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use super::*;
    use platform::mocks::RecordingSink;
    use platform::SECTOR_SIZE;
    use sdcard::sim::SimCard;

    struct Blocks {
        remaining: u8,
    }

    impl BlockFile for Blocks {
        type Error = &'static str;

        fn read_block(&mut self, buf: &mut Sector) -> Result<(), &'static str> {
            if self.remaining == 0 {
                return Err("end of file");
            }
            buf.fill(self.remaining);
            self.remaining -= 1;
            Ok(())
        }
    }

    #[test]
    fn raw_source_walks_lbas_and_stops_at_sector_max() {
        let image: Vec<u8> = (0..5u8).flat_map(|s| [s; SECTOR_SIZE]).collect();
        let card =
            SdCard::init(SimCard::from_image(&image), RecordingSink::<IoError>::new()).unwrap();
        let config = StreamConfig::new(8, 3).unwrap();
        let mut source = RawSectorSource::new(card, &config);
        let mut buf = [0u8; SECTOR_SIZE];

        assert_eq!(source.read_next(&mut buf), Ok(Flow::Continue));
        assert_eq!(buf[0], 0);
        assert_eq!(source.read_next(&mut buf), Ok(Flow::Continue));
        assert_eq!(buf[0], 1);
        assert_eq!(source.read_next(&mut buf), Ok(Flow::Last));
        assert_eq!(buf[511], 2);
        assert_eq!(source.next_sector(), 3);
        assert!(source.card().fatal_sink().is_clean());
    }

    #[test]
    fn raw_source_sends_read_failures_to_the_sink() {
        let card = SdCard::init(SimCard::new(1), RecordingSink::<IoError>::new()).unwrap();
        let config = StreamConfig::new(8, 3).unwrap();
        let mut source = RawSectorSource::new(card, &config);
        let mut buf = [0u8; SECTOR_SIZE];

        source.read_next(&mut buf).unwrap();
        assert_eq!(source.read_next(&mut buf), Ok(Flow::Continue));
        let card = source.release();
        assert_eq!(card.fatal_sink().errors(), &[IoError::ReadCmdRejected]);
    }

    #[test]
    fn file_source_ends_at_the_first_error() {
        let mut source = FileSource::new(Blocks { remaining: 2 });
        let mut buf = [0u8; SECTOR_SIZE];

        assert_eq!(source.read_next(&mut buf), Ok(Flow::Continue));
        assert_eq!(buf[0], 2);
        assert_eq!(source.read_next(&mut buf), Ok(Flow::Continue));
        assert_eq!(source.read_next(&mut buf), Err("end of file"));
        assert_eq!(source.blocks_read(), 2);
    }

    #[test]
    fn short_io_read_is_an_error() {
        let data = vec![7u8; SECTOR_SIZE + 100];
        let mut source = FileSource::new(IoBlockFile(data.as_slice()));
        let mut buf = [0u8; SECTOR_SIZE];

        assert!(source.read_next(&mut buf).is_ok());
        let err = source.read_next(&mut buf).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }
}
