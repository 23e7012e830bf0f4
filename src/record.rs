// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::fmt;
use std::hash::{Hash, Hasher};

/// Seismometer component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    /// Vertical.
    Z,
    /// Radial.
    R,
    /// Transverse.
    T,
}

impl Component {
    /// All components, in index order.
    pub const ALL: [Component; 3] = [Component::Z, Component::R, Component::T];

    /// Dense index used for per-component tables.
    pub fn index(self) -> usize {
        match self {
            Component::Z => 0,
            Component::R => 1,
            Component::T => 2,
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Component::Z => "Z",
            Component::R => "R",
            Component::T => "T",
        };
        f.write_str(s)
    }
}

/// A point on the Earth's surface in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPosition {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

impl GeoPosition {
    /// Create a new position.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        GeoPosition {
            latitude,
            longitude,
        }
    }

    /// Great-circle distance to `other` in degrees (haversine).
    pub fn angular_distance(&self, other: &GeoPosition) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = lat2 - lat1;
        let dlon = (other.longitude - self.longitude).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().min(1.0).asin();
        c.to_degrees()
    }
}

/// An unordered set of seismic phase names, kept sorted so equal sets
/// compare and hash equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhaseSet(Vec<String>);

impl PhaseSet {
    /// Build a phase set from names; order and duplicates are ignored.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut v: Vec<String> = names.into_iter().map(Into::into).collect();
        v.sort();
        v.dedup();
        PhaseSet(v)
    }

    /// Phase names in sorted order.
    pub fn names(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for PhaseSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(","))
    }
}

/// Whether a waveform was recorded or computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveformKind {
    /// Recorded data.
    Observed,
    /// Computed for the reference model.
    Synthetic,
}

/// Descriptive fields shared by waveform and partial derivative records.
#[derive(Debug, Clone)]
pub struct WaveformHeader {
    /// Event identifier (e.g. a GCMT id).
    pub event: String,
    /// Event epicentre.
    pub event_position: GeoPosition,
    /// Station identifier (`NAME_NETWORK`).
    pub station: String,
    /// Station position.
    pub station_position: GeoPosition,
    /// Recording component.
    pub component: Component,
    /// Phases contained in the time window.
    pub phases: PhaseSet,
    /// Window start time in seconds after the event origin.
    pub start_time: f64,
    /// Sampling rate in Hz.
    pub sampling_hz: f64,
    /// Minimum period of the band-pass filter in seconds.
    pub min_period: f64,
    /// Maximum period of the band-pass filter in seconds.
    pub max_period: f64,
    /// Declared number of samples.
    pub npts: usize,
}

impl WaveformHeader {
    /// Identity of the window, ignoring start time.
    pub fn window_key(&self) -> WindowKey {
        WindowKey {
            event: self.event.clone(),
            station: self.station.clone(),
            component: self.component,
            phases: self.phases.clone(),
        }
    }
}

impl fmt::Display for WaveformHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {:.2}",
            self.event, self.station, self.component, self.phases, self.start_time
        )
    }
}

/// Hash key of a time window: everything but the start time, which is
/// matched with a tolerance after the bucket lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    /// Event identifier.
    pub event: String,
    /// Station identifier.
    pub station: String,
    /// Component.
    pub component: Component,
    /// Phase set.
    pub phases: PhaseSet,
}

/// Access to the descriptive fields of any record that lives in a time window.
pub trait RecordIdentity {
    /// The record's header.
    fn header(&self) -> &WaveformHeader;

    /// Window start time in seconds.
    fn start_time(&self) -> f64 {
        self.header().start_time
    }

    /// Declared sample count.
    fn npts(&self) -> usize {
        self.header().npts
    }

    /// Identity of the window, ignoring start time.
    fn window_key(&self) -> WindowKey {
        self.header().window_key()
    }
}

impl RecordIdentity for WaveformHeader {
    fn header(&self) -> &WaveformHeader {
        self
    }
}

/// An observed or synthetic waveform cut to one time window.
#[derive(Debug, Clone)]
pub struct WaveformRecord {
    /// Descriptive fields.
    pub header: WaveformHeader,
    /// Observed or synthetic.
    pub kind: WaveformKind,
    /// Samples, if they have been loaded.
    pub data: Option<Vec<f64>>,
}

impl WaveformRecord {
    /// Create a record holding `data`; `npts` is taken from the data length.
    pub fn new(mut header: WaveformHeader, kind: WaveformKind, data: Vec<f64>) -> Self {
        header.npts = data.len();
        WaveformRecord {
            header,
            kind,
            data: Some(data),
        }
    }

    /// Whether sample data is present.
    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    /// Samples, or an empty slice when absent.
    pub fn samples(&self) -> &[f64] {
        self.data.as_deref().unwrap_or(&[])
    }

    /// Whether this is an observed record.
    pub fn is_observed(&self) -> bool {
        self.kind == WaveformKind::Observed
    }
}

impl RecordIdentity for WaveformRecord {
    fn header(&self) -> &WaveformHeader {
        &self.header
    }
}

/// Physical quantity an unknown parameter perturbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterType {
    /// Shear modulus.
    Mu,
    /// First Lamé parameter.
    Lambda,
    /// Bulk modulus.
    Kappa,
    /// Density.
    Rho,
    /// P-wave velocity.
    Vp,
    /// S-wave velocity.
    Vs,
    /// Attenuation (1/Q).
    Q,
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ParameterType::Mu => "MU",
            ParameterType::Lambda => "LAMBDA",
            ParameterType::Kappa => "KAPPA",
            ParameterType::Rho => "RHO",
            ParameterType::Vp => "VP",
            ParameterType::Vs => "VS",
            ParameterType::Q => "Q",
        };
        f.write_str(s)
    }
}

/// Voxel location: latitude, longitude (degrees) and radius (km).
///
/// Equality and hashing are exact on the bit patterns, so a partial record
/// only resolves to a parameter declared at the identical location.
#[derive(Debug, Clone, Copy)]
pub struct Location {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Radius in km.
    pub radius: f64,
}

impl Location {
    /// Create a new location.
    pub fn new(latitude: f64, longitude: f64, radius: f64) -> Self {
        Location {
            latitude,
            longitude,
            radius,
        }
    }

    fn bits(&self) -> [u64; 3] {
        [
            self.latitude.to_bits(),
            self.longitude.to_bits(),
            self.radius.to_bits(),
        ]
    }
}

impl PartialEq for Location {
    fn eq(&self, other: &Self) -> bool {
        self.bits() == other.bits()
    }
}

impl Eq for Location {}

impl Hash for Location {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits().hash(state);
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} {} {})", self.latitude, self.longitude, self.radius)
    }
}

/// Identity of an unknown parameter: type plus location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParameterKey {
    /// Parameter type.
    pub parameter_type: ParameterType,
    /// Voxel location.
    pub location: Location,
}

impl fmt::Display for ParameterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.parameter_type, self.location)
    }
}

/// One degree of freedom of the model being solved for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnknownParameter {
    /// Type and location.
    pub key: ParameterKey,
    /// Physical size (e.g. voxel volume) multiplying the partial derivative.
    pub scale: f64,
}

impl UnknownParameter {
    /// Create a new unknown parameter.
    pub fn new(parameter_type: ParameterType, location: Location, scale: f64) -> Self {
        UnknownParameter {
            key: ParameterKey {
                parameter_type,
                location,
            },
            scale,
        }
    }
}

/// Waveform derivative of a synthetic with respect to one unknown parameter.
#[derive(Debug, Clone)]
pub struct PartialDerivativeRecord {
    /// Descriptive fields of the window it belongs to.
    pub header: WaveformHeader,
    /// The parameter this is a derivative with respect to.
    pub parameter: ParameterKey,
    /// Samples.
    pub data: Vec<f64>,
}

impl PartialDerivativeRecord {
    /// Create a partial record; `npts` is taken from the data length.
    pub fn new(mut header: WaveformHeader, parameter: ParameterKey, data: Vec<f64>) -> Self {
        header.npts = data.len();
        PartialDerivativeRecord {
            header,
            parameter,
            data,
        }
    }
}

impl RecordIdentity for PartialDerivativeRecord {
    fn header(&self) -> &WaveformHeader {
        &self.header
    }
}
