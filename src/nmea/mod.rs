//! NMEA-0183 decoding for the GPS receiver.

pub mod decoder;
pub mod fields;
pub mod fix;
pub mod sentence;

pub use decoder::{checksum, NmeaDecoder, NmeaListener};
pub use fix::GpsFixAggregator;
pub use sentence::{NmeaRecord, Sentence, SentenceKind};
