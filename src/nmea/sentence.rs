//! Typed NMEA-0183 sentence records.
//!
//! Every numeric field is an `Option`: `None` means the field was empty in
//! the sentence, never zero.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentence identifiers the decoder understands
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SentenceKind {
    Gga,
    Gsa,
    Rmc,
    Vtg,
    Gsv,
    Gll,
    Zda,
    Gst,
    Hdt,
    Grs,
    Gbs,
    Gns,
}

impl SentenceKind {
    pub fn from_id(id: &str) -> Option<Self> {
        Some(match id {
            "GGA" => SentenceKind::Gga,
            "GSA" => SentenceKind::Gsa,
            "RMC" => SentenceKind::Rmc,
            "VTG" => SentenceKind::Vtg,
            "GSV" => SentenceKind::Gsv,
            "GLL" => SentenceKind::Gll,
            "ZDA" => SentenceKind::Zda,
            "GST" => SentenceKind::Gst,
            "HDT" => SentenceKind::Hdt,
            "GRS" => SentenceKind::Grs,
            "GBS" => SentenceKind::Gbs,
            "GNS" => SentenceKind::Gns,
            _ => return None,
        })
    }

    pub fn id(self) -> &'static str {
        match self {
            SentenceKind::Gga => "GGA",
            SentenceKind::Gsa => "GSA",
            SentenceKind::Rmc => "RMC",
            SentenceKind::Vtg => "VTG",
            SentenceKind::Gsv => "GSV",
            SentenceKind::Gll => "GLL",
            SentenceKind::Zda => "ZDA",
            SentenceKind::Gst => "GST",
            SentenceKind::Hdt => "HDT",
            SentenceKind::Grs => "GRS",
            SentenceKind::Gbs => "GBS",
            SentenceKind::Gns => "GNS",
        }
    }
}

impl fmt::Display for SentenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// GGA fix quality indicator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FixQuality {
    Invalid = 0,
    GpsFix = 1,
    DgpsFix = 2,
    PpsFix = 3,
    RtkFix = 4,
    FloatRtk = 5,
    Estimated = 6,
    ManualInput = 7,
    Simulation = 8,
}

impl FixQuality {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => FixQuality::Invalid,
            1 => FixQuality::GpsFix,
            2 => FixQuality::DgpsFix,
            3 => FixQuality::PpsFix,
            4 => FixQuality::RtkFix,
            5 => FixQuality::FloatRtk,
            6 => FixQuality::Estimated,
            7 => FixQuality::ManualInput,
            8 => FixQuality::Simulation,
            _ => return None,
        })
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

/// FAA mode indicator (NMEA 2.3+)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaaMode {
    Autonomous,
    Differential,
    Estimated,
    ManualInput,
    Simulated,
    NotValid,
    Precise,
    Rtk,
    RtkFloat,
}

impl FaaMode {
    pub fn from_field(field: &str) -> Option<Self> {
        Some(match field {
            "A" => FaaMode::Autonomous,
            "D" => FaaMode::Differential,
            "E" => FaaMode::Estimated,
            "M" => FaaMode::ManualInput,
            "S" => FaaMode::Simulated,
            "N" => FaaMode::NotValid,
            "P" => FaaMode::Precise,
            "R" => FaaMode::Rtk,
            "F" => FaaMode::RtkFloat,
            _ => return None,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionMode {
    Manual,
    Automatic,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GsaFix {
    NoFix,
    Fix2D,
    Fix3D,
}

/// RMC/GLL data status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataStatus {
    Active,
    Void,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SatelliteStatus {
    /// PRN and SNR present
    Tracking,
    /// PRN present, no SNR
    InView,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SatelliteInfo {
    pub prn: Option<u32>,
    pub elevation: Option<f64>,
    pub azimuth: Option<f64>,
    pub snr: Option<f64>,
    pub status: Option<SatelliteStatus>,
    pub system: String,
    /// Talker id + PRN, unique across constellations
    pub key: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Gga {
    pub time: Option<DateTime<Utc>>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    /// `None` for empty or vendor-specific codes; see `quality_code`
    pub quality: Option<FixQuality>,
    /// Quality indicator as sent
    pub quality_code: Option<u32>,
    pub satellites: Option<u32>,
    pub hdop: Option<f64>,
    /// Altitude above MSL [m]
    pub alt: Option<f64>,
    /// Geoidal separation [m]
    pub geoidal: Option<f64>,
    /// Age of differential data [s]
    pub age: Option<f64>,
    pub station_id: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Gsa {
    pub mode: Option<SelectionMode>,
    pub fix: Option<GsaFix>,
    /// PRNs of satellites used in the solution, in slot order
    pub satellites: Vec<u32>,
    pub pdop: Option<f64>,
    pub hdop: Option<f64>,
    pub vdop: Option<f64>,
    pub system_id: Option<u32>,
    pub system: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rmc {
    pub time: Option<DateTime<Utc>>,
    pub status: Option<DataStatus>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    /// Speed over ground [km/h]
    pub speed: Option<f64>,
    /// Track made good [deg true]
    pub track: Option<f64>,
    /// Magnetic variation [deg], west negative
    pub variation: Option<f64>,
    pub faa: Option<FaaMode>,
    pub nav_status: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vtg {
    pub track: Option<f64>,
    pub track_magnetic: Option<f64>,
    /// Speed over ground [km/h]
    pub speed: Option<f64>,
    pub faa: Option<FaaMode>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Gsv {
    pub msg_number: Option<u32>,
    pub msgs_total: Option<u32>,
    pub sats_in_view: Option<u32>,
    pub satellites: Vec<SatelliteInfo>,
    pub signal_id: Option<u32>,
    pub system: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Gll {
    pub time: Option<DateTime<Utc>>,
    pub status: Option<DataStatus>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub faa: Option<FaaMode>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Zda {
    pub time: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Gst {
    pub time: Option<DateTime<Utc>>,
    pub rms: Option<f64>,
    pub ellipse_major: Option<f64>,
    pub ellipse_minor: Option<f64>,
    pub ellipse_orientation: Option<f64>,
    pub latitude_error: Option<f64>,
    pub longitude_error: Option<f64>,
    pub height_error: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hdt {
    pub heading: Option<f64>,
    pub true_north: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Grs {
    pub time: Option<DateTime<Utc>>,
    pub mode: Option<u32>,
    /// Range residuals [m], in satellite order
    pub residuals: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Gbs {
    pub time: Option<DateTime<Utc>>,
    pub err_lat: Option<f64>,
    pub err_lon: Option<f64>,
    pub err_alt: Option<f64>,
    pub failed_sat: Option<u32>,
    pub prob_failed_sat: Option<f64>,
    pub bias_failed_sat: Option<f64>,
    pub std_failed_sat: Option<f64>,
    pub system_id: Option<u32>,
    pub signal_id: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Gns {
    pub time: Option<DateTime<Utc>>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    /// One mode character per constellation
    pub mode: String,
    pub sats_used: Option<u32>,
    pub hdop: Option<f64>,
    pub alt: Option<f64>,
    pub sep: Option<f64>,
    pub diff_age: Option<f64>,
    pub diff_station: Option<u32>,
    pub nav_status: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Sentence {
    Gga(Gga),
    Gsa(Gsa),
    Rmc(Rmc),
    Vtg(Vtg),
    Gsv(Gsv),
    Gll(Gll),
    Zda(Zda),
    Gst(Gst),
    Hdt(Hdt),
    Grs(Grs),
    Gbs(Gbs),
    Gns(Gns),
}

impl Sentence {
    pub fn kind(&self) -> SentenceKind {
        match self {
            Sentence::Gga(_) => SentenceKind::Gga,
            Sentence::Gsa(_) => SentenceKind::Gsa,
            Sentence::Rmc(_) => SentenceKind::Rmc,
            Sentence::Vtg(_) => SentenceKind::Vtg,
            Sentence::Gsv(_) => SentenceKind::Gsv,
            Sentence::Gll(_) => SentenceKind::Gll,
            Sentence::Zda(_) => SentenceKind::Zda,
            Sentence::Gst(_) => SentenceKind::Gst,
            Sentence::Hdt(_) => SentenceKind::Hdt,
            Sentence::Grs(_) => SentenceKind::Grs,
            Sentence::Gbs(_) => SentenceKind::Gbs,
            Sentence::Gns(_) => SentenceKind::Gns,
        }
    }
}

/// One decoded line
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NmeaRecord {
    /// Two-letter talker id, e.g. "GP" or "GN"
    pub talker: String,
    /// The line as received, without the line terminator
    pub raw: String,
    /// Checksum matched
    pub valid: bool,
    pub sentence: Sentence,
}

impl NmeaRecord {
    pub fn kind(&self) -> SentenceKind {
        self.sentence.kind()
    }
}
