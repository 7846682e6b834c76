//! Streaming NMEA-0183 decoder.
//!
//! Bytes arrive in arbitrary chunks from a serial link. The decoder keeps
//! the trailing partial line between calls, parses every complete line that
//! starts with `$`, and reports each record twice through an [`NmeaListener`]:
//! once generically and once on the handler for its sentence type.

use log::{debug, warn};

use super::fields::Fields;
use super::sentence::*;
use crate::error::{NavError, Result};

/// Longest line the decoder will hold or parse [bytes].
/// A valid sentence is at most 82 characters; anything far beyond that is
/// line noise and is dropped up to the next delimiter.
const MAX_PENDING: usize = 1024;

/// Callback table for decoded sentences. Every handler defaults to a no-op.
pub trait NmeaListener {
    fn on_sentence(&mut self, _record: &NmeaRecord) {}
    fn on_gga(&mut self, _record: &NmeaRecord, _gga: &Gga) {}
    fn on_gsa(&mut self, _record: &NmeaRecord, _gsa: &Gsa) {}
    fn on_rmc(&mut self, _record: &NmeaRecord, _rmc: &Rmc) {}
    fn on_vtg(&mut self, _record: &NmeaRecord, _vtg: &Vtg) {}
    fn on_gsv(&mut self, _record: &NmeaRecord, _gsv: &Gsv) {}
    fn on_gll(&mut self, _record: &NmeaRecord, _gll: &Gll) {}
    fn on_zda(&mut self, _record: &NmeaRecord, _zda: &Zda) {}
    fn on_gst(&mut self, _record: &NmeaRecord, _gst: &Gst) {}
    fn on_hdt(&mut self, _record: &NmeaRecord, _hdt: &Hdt) {}
    fn on_grs(&mut self, _record: &NmeaRecord, _grs: &Grs) {}
    fn on_gbs(&mut self, _record: &NmeaRecord, _gbs: &Gbs) {}
    fn on_gns(&mut self, _record: &NmeaRecord, _gns: &Gns) {}
    fn on_error(&mut self, _error: &NavError) {}
}

fn dispatch<L: NmeaListener + ?Sized>(listener: &mut L, record: &NmeaRecord) {
    listener.on_sentence(record);
    match &record.sentence {
        Sentence::Gga(s) => listener.on_gga(record, s),
        Sentence::Gsa(s) => listener.on_gsa(record, s),
        Sentence::Rmc(s) => listener.on_rmc(record, s),
        Sentence::Vtg(s) => listener.on_vtg(record, s),
        Sentence::Gsv(s) => listener.on_gsv(record, s),
        Sentence::Gll(s) => listener.on_gll(record, s),
        Sentence::Zda(s) => listener.on_zda(record, s),
        Sentence::Gst(s) => listener.on_gst(record, s),
        Sentence::Hdt(s) => listener.on_hdt(record, s),
        Sentence::Grs(s) => listener.on_grs(record, s),
        Sentence::Gbs(s) => listener.on_gbs(record, s),
        Sentence::Gns(s) => listener.on_gns(record, s),
    }
}

/// Collects the generic stream for [`NmeaDecoder::feed`].
#[derive(Default)]
struct Collector {
    items: Vec<Result<NmeaRecord>>,
}

impl NmeaListener for Collector {
    fn on_sentence(&mut self, record: &NmeaRecord) {
        self.items.push(Ok(record.clone()));
    }

    fn on_error(&mut self, error: &NavError) {
        self.items.push(Err(error.clone()));
    }
}

#[derive(Default)]
pub struct NmeaDecoder {
    pending: Vec<u8>,
    /// Inside an oversized line whose head was already thrown away
    discarding: bool,
}

impl NmeaDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes received but not yet terminated by a line delimiter.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Append `bytes` and report every complete line to `listener`.
    ///
    /// Lines longer than `MAX_PENDING` are dropped whole, however the input
    /// is chunked.
    pub fn feed_to<L: NmeaListener + ?Sized>(&mut self, bytes: &[u8], listener: &mut L) {
        self.pending.extend_from_slice(bytes);

        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            if std::mem::take(&mut self.discarding) || end - start > MAX_PENDING {
                debug!("Dropping oversized NMEA line");
                start = end + 1;
                continue;
            }
            let mut line = &self.pending[start..end];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            let text = String::from_utf8_lossy(line);
            match Self::decode_line(&text) {
                Ok(Some(record)) => dispatch(listener, &record),
                Ok(None) => {}
                Err(e) => {
                    debug!("Dropping NMEA line: {}", e);
                    listener.on_error(&e);
                }
            }
            start = end + 1;
        }
        self.pending.drain(..start);

        if self.pending.len() > MAX_PENDING {
            if !self.discarding {
                warn!(
                    "Discarding oversized NMEA line ({} bytes without a delimiter)",
                    self.pending.len()
                );
            }
            self.pending.clear();
            self.discarding = true;
        }
    }

    /// Append `bytes` and return the generic stream of records and errors,
    /// in input order.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<NmeaRecord>> {
        let mut collector = Collector::default();
        self.feed_to(bytes, &mut collector);
        collector.items
    }

    /// Parse one line without its delimiter.
    ///
    /// `Ok(None)` for lines that are not sentences or carry an unsupported
    /// sentence type.
    pub fn decode_line(line: &str) -> Result<Option<NmeaRecord>> {
        let Some(body) = line.strip_prefix('$') else {
            return Ok(None);
        };

        let (payload, valid) = match body.rsplit_once('*') {
            Some((payload, checksum)) => (payload, checksum_matches(payload, checksum)),
            None => (body, false),
        };

        let fields = Fields::new(line, payload);
        let address = fields.text(0);
        let (Some(talker), Some(id)) = (address.get(..2), address.get(2..)) else {
            return Ok(None);
        };
        let Some(kind) = SentenceKind::from_id(id) else {
            return Ok(None);
        };

        let sentence = parse_sentence(kind, talker, &fields)?;
        Ok(Some(NmeaRecord {
            talker: talker.to_string(),
            raw: line.to_string(),
            valid,
            sentence,
        }))
    }
}

/// XOR of every byte between `$` and `*`.
pub fn checksum(payload: &str) -> u8 {
    payload.bytes().fold(0, |acc, b| acc ^ b)
}

fn checksum_matches(payload: &str, trailer: &str) -> bool {
    let trailer = trailer.trim();
    trailer.len() == 2
        && u8::from_str_radix(trailer, 16)
            .map(|expected| expected == checksum(payload))
            .unwrap_or(false)
}

fn parse_sentence(kind: SentenceKind, talker: &str, f: &Fields<'_>) -> Result<Sentence> {
    Ok(match kind {
        SentenceKind::Gga => Sentence::Gga(parse_gga(f)?),
        SentenceKind::Gsa => Sentence::Gsa(parse_gsa(f)?),
        SentenceKind::Rmc => Sentence::Rmc(parse_rmc(f)?),
        SentenceKind::Vtg => Sentence::Vtg(parse_vtg(f)?),
        SentenceKind::Gsv => Sentence::Gsv(parse_gsv(talker, f)?),
        SentenceKind::Gll => Sentence::Gll(parse_gll(f)?),
        SentenceKind::Zda => Sentence::Zda(Zda {
            time: f.time_with_dmy(1, 2, 3, 4)?,
        }),
        SentenceKind::Gst => Sentence::Gst(parse_gst(f)?),
        SentenceKind::Hdt => Sentence::Hdt(Hdt {
            heading: f.float(1)?,
            true_north: f.text(2) == "T",
        }),
        SentenceKind::Grs => Sentence::Grs(Grs {
            time: f.time(1)?,
            mode: f.uint(2)?,
            residuals: collect_floats(f, 3..=14)?,
        }),
        SentenceKind::Gbs => Sentence::Gbs(parse_gbs(f)?),
        SentenceKind::Gns => Sentence::Gns(parse_gns(f)?),
    })
}

fn collect_floats(f: &Fields<'_>, range: std::ops::RangeInclusive<usize>) -> Result<Vec<f64>> {
    let mut values = Vec::new();
    for i in range {
        if let Some(v) = f.float(i)? {
            values.push(v);
        }
    }
    Ok(values)
}

fn data_status(field: &str) -> Option<DataStatus> {
    match field {
        "A" => Some(DataStatus::Active),
        "V" => Some(DataStatus::Void),
        _ => None,
    }
}

fn gnss_system_name(system_id: Option<u32>) -> String {
    match system_id {
        Some(0) => "QZSS",
        Some(1) => "GPS",
        Some(2) => "GLONASS",
        Some(3) => "Galileo",
        Some(4) => "BeiDou",
        _ => "unknown",
    }
    .to_string()
}

fn talker_system_name(talker: &str) -> String {
    match talker {
        "GP" => "GPS",
        "GQ" => "QZSS",
        "GL" => "GLONASS",
        "GA" => "Galileo",
        "GB" => "BeiDou",
        other => other,
    }
    .to_string()
}

fn parse_gga(f: &Fields<'_>) -> Result<Gga> {
    let quality_code = f.uint(6)?;
    Ok(Gga {
        time: f.time(1)?,
        lat: f.coordinate(2, 3)?,
        lon: f.coordinate(4, 5)?,
        quality: quality_code
            .and_then(|code| u8::try_from(code).ok())
            .and_then(FixQuality::from_code),
        quality_code,
        satellites: f.uint(7)?,
        hdop: f.float(8)?,
        alt: f.distance(9, 10)?,
        geoidal: f.distance(11, 12)?,
        age: f.float(13)?,
        station_id: f.uint(14)?,
    })
}

fn parse_gsa(f: &Fields<'_>) -> Result<Gsa> {
    let mut satellites = Vec::new();
    for i in 3..=14 {
        if let Some(prn) = f.uint(i)? {
            satellites.push(prn);
        }
    }
    let system_id = f.uint(18)?;
    Ok(Gsa {
        mode: match f.text(1) {
            "M" => Some(SelectionMode::Manual),
            "A" => Some(SelectionMode::Automatic),
            _ => None,
        },
        fix: match f.text(2) {
            "1" => Some(GsaFix::NoFix),
            "2" => Some(GsaFix::Fix2D),
            "3" => Some(GsaFix::Fix3D),
            _ => None,
        },
        satellites,
        pdop: f.float(15)?,
        hdop: f.float(16)?,
        vdop: f.float(17)?,
        system_id,
        system: gnss_system_name(system_id),
    })
}

fn parse_rmc(f: &Fields<'_>) -> Result<Rmc> {
    Ok(Rmc {
        time: f.time_with_date(1, 9)?,
        status: data_status(f.text(2)),
        lat: f.coordinate(3, 4)?,
        lon: f.coordinate(5, 6)?,
        speed: f.knots(7)?,
        track: f.float(8)?,
        variation: f.variation(10, 11)?,
        faa: FaaMode::from_field(f.text(12)),
        nav_status: f.string(13),
    })
}

fn parse_vtg(f: &Fields<'_>) -> Result<Vtg> {
    // Knots first, the km/h field only when the receiver left knots blank
    let speed = match f.knots(5)? {
        Some(speed) => Some(speed),
        None => f.float(7)?,
    };
    Ok(Vtg {
        track: f.float(1)?,
        track_magnetic: f.float(3)?,
        speed,
        faa: FaaMode::from_field(f.text(9)),
    })
}

fn parse_gsv(talker: &str, f: &Fields<'_>) -> Result<Gsv> {
    let system = talker_system_name(talker);

    // Header is address + 3 fields, then blocks of four; NMEA 4.1 appends a
    // signal id, which leaves one field over.
    let trailing = (f.len().saturating_sub(4)) % 4;
    let signal_id = if trailing == 1 {
        f.uint(f.len() - 1)?
    } else {
        None
    };
    let block_end = f.len() - trailing;

    let mut satellites = Vec::new();
    let mut i = 4;
    while i + 3 < block_end {
        let prn = f.uint(i)?;
        let snr = f.float(i + 3)?;
        let status = prn.map(|_| {
            if snr.is_some() {
                SatelliteStatus::Tracking
            } else {
                SatelliteStatus::InView
            }
        });
        let key = match prn {
            Some(prn) => format!("{talker}{prn}"),
            None => talker.to_string(),
        };
        satellites.push(SatelliteInfo {
            prn,
            elevation: f.float(i + 1)?,
            azimuth: f.float(i + 2)?,
            snr,
            status,
            system: system.clone(),
            key,
        });
        i += 4;
    }

    Ok(Gsv {
        msgs_total: f.uint(1)?,
        msg_number: f.uint(2)?,
        sats_in_view: f.uint(3)?,
        satellites,
        signal_id,
        system,
    })
}

fn parse_gll(f: &Fields<'_>) -> Result<Gll> {
    Ok(Gll {
        lat: f.coordinate(1, 2)?,
        lon: f.coordinate(3, 4)?,
        time: f.time(5)?,
        status: data_status(f.text(6)),
        faa: FaaMode::from_field(f.text(7)),
    })
}

fn parse_gst(f: &Fields<'_>) -> Result<Gst> {
    Ok(Gst {
        time: f.time(1)?,
        rms: f.float(2)?,
        ellipse_major: f.float(3)?,
        ellipse_minor: f.float(4)?,
        ellipse_orientation: f.float(5)?,
        latitude_error: f.float(6)?,
        longitude_error: f.float(7)?,
        height_error: f.float(8)?,
    })
}

fn parse_gbs(f: &Fields<'_>) -> Result<Gbs> {
    Ok(Gbs {
        time: f.time(1)?,
        err_lat: f.float(2)?,
        err_lon: f.float(3)?,
        err_alt: f.float(4)?,
        failed_sat: f.uint(5)?,
        prob_failed_sat: f.float(6)?,
        bias_failed_sat: f.float(7)?,
        std_failed_sat: f.float(8)?,
        system_id: f.uint(9)?,
        signal_id: f.uint(10)?,
    })
}

fn parse_gns(f: &Fields<'_>) -> Result<Gns> {
    Ok(Gns {
        time: f.time(1)?,
        lat: f.coordinate(2, 3)?,
        lon: f.coordinate(4, 5)?,
        mode: f.text(6).to_string(),
        sats_used: f.uint(7)?,
        hdop: f.float(8)?,
        alt: f.float(9)?,
        sep: f.float(10)?,
        diff_age: f.float(11)?,
        diff_station: f.uint(12)?,
        nav_status: f.string(13),
    })
}
