//! Folds decoded sentences into the receiver state published as [`GpsData`].

use log::{trace, warn};

use super::decoder::NmeaListener;
use super::sentence::*;
use crate::error::NavError;
use crate::types::{FixType, GpsData, LinkQuality};

/// Running GPS receiver state.
///
/// GGA, RMC, GSA and VTG each update their share of the fields and queue a
/// snapshot; other sentence types are ignored.
#[derive(Debug, Default)]
pub struct GpsFixAggregator {
    state: GpsData,
    accept_invalid: bool,
    updates: Vec<GpsData>,
    parse_errors: u64,
}

impl GpsFixAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Aggregate records whose checksum did not match.
    pub fn accept_invalid(mut self, accept: bool) -> Self {
        self.accept_invalid = accept;
        self
    }

    pub fn current(&self) -> &GpsData {
        &self.state
    }

    /// Lines the decoder could not parse, as reported through `on_error`.
    pub fn parse_errors(&self) -> u64 {
        self.parse_errors
    }

    /// Snapshots produced since the last call, oldest first.
    pub fn take_updates(&mut self) -> Vec<GpsData> {
        std::mem::take(&mut self.updates)
    }

    /// Fold one record, returning the new snapshot when it changed anything.
    pub fn apply(&mut self, record: &NmeaRecord) -> Option<GpsData> {
        if !self.admits(record) {
            return None;
        }
        match &record.sentence {
            Sentence::Gga(gga) => self.fold_gga(gga),
            Sentence::Rmc(rmc) => self.fold_rmc(rmc),
            Sentence::Gsa(gsa) => self.fold_gsa(gsa),
            Sentence::Vtg(vtg) => self.fold_vtg(vtg),
            _ => return None,
        }
        Some(self.state.clone())
    }

    fn admits(&self, record: &NmeaRecord) -> bool {
        if !record.valid && !self.accept_invalid {
            trace!("Skipping {} with bad checksum", record.kind());
            return false;
        }
        true
    }

    fn fold_gga(&mut self, gga: &Gga) {
        self.state.timestamp = gga.time.map(|t| t.timestamp_millis());
        self.state.latitude = gga.lat;
        self.state.longitude = gga.lon;
        self.state.altitude = gga.alt;
        self.state.satellites = gga.satellites;
        self.state.hdop = gga.hdop;
        self.state.link_quality = LinkQuality::from_gga_quality(gga.quality_code);
    }

    fn fold_rmc(&mut self, rmc: &Rmc) {
        self.state.timestamp = rmc.time.map(|t| t.timestamp_millis());
        self.state.latitude = rmc.lat;
        self.state.longitude = rmc.lon;
        self.state.speed = rmc.speed;
        self.state.course = rmc.track;
    }

    fn fold_gsa(&mut self, gsa: &Gsa) {
        self.state.fix = gsa.fix.map(|fix| match fix {
            GsaFix::NoFix => FixType::NoFix,
            GsaFix::Fix2D => FixType::Fix2D,
            GsaFix::Fix3D => FixType::Fix3D,
        });
    }

    fn fold_vtg(&mut self, vtg: &Vtg) {
        self.state.speed = vtg.speed;
        self.state.course = vtg.track;
    }

    fn push(&mut self, record: &NmeaRecord) {
        if let Some(snapshot) = self.apply(record) {
            self.updates.push(snapshot);
        }
    }
}

impl NmeaListener for GpsFixAggregator {
    fn on_gga(&mut self, record: &NmeaRecord, _gga: &Gga) {
        self.push(record);
    }

    fn on_rmc(&mut self, record: &NmeaRecord, _rmc: &Rmc) {
        self.push(record);
    }

    fn on_gsa(&mut self, record: &NmeaRecord, _gsa: &Gsa) {
        self.push(record);
    }

    fn on_vtg(&mut self, record: &NmeaRecord, _vtg: &Vtg) {
        self.push(record);
    }

    fn on_error(&mut self, error: &NavError) {
        self.parse_errors += 1;
        warn!("GPS sentence rejected: {}", error);
    }
}
