// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Record builders shared by unit tests. Headers use 1 Hz sampling, an
//! 8-200 s pass band, an S phase and fixed event/station positions.

use crate::record::{
    Component, GeoPosition, Location, ParameterKey, ParameterType, PartialDerivativeRecord,
    PhaseSet, WaveformHeader, WaveformKind, WaveformRecord,
};

pub fn header(
    event: &str,
    station: &str,
    component: Component,
    start_time: f64,
    npts: usize,
) -> WaveformHeader {
    WaveformHeader {
        event: event.to_string(),
        event_position: GeoPosition::new(0.0, 0.0),
        station: station.to_string(),
        station_position: GeoPosition::new(0.0, 60.0),
        component,
        phases: PhaseSet::new(["S"]),
        start_time,
        sampling_hz: 1.0,
        min_period: 8.0,
        max_period: 200.0,
        npts,
    }
}

pub fn observed(
    event: &str,
    station: &str,
    component: Component,
    start_time: f64,
    data: Vec<f64>,
) -> WaveformRecord {
    WaveformRecord::new(
        header(event, station, component, start_time, 0),
        WaveformKind::Observed,
        data,
    )
}

pub fn synthetic(
    event: &str,
    station: &str,
    component: Component,
    start_time: f64,
    data: Vec<f64>,
) -> WaveformRecord {
    WaveformRecord::new(
        header(event, station, component, start_time, 0),
        WaveformKind::Synthetic,
        data,
    )
}

pub fn voxel(radius: f64) -> ParameterKey {
    ParameterKey {
        parameter_type: ParameterType::Mu,
        location: Location::new(0.0, 30.0, radius),
    }
}

pub fn partial(
    event: &str,
    station: &str,
    component: Component,
    start_time: f64,
    parameter: ParameterKey,
    data: Vec<f64>,
) -> PartialDerivativeRecord {
    PartialDerivativeRecord::new(
        header(event, station, component, start_time, 0),
        parameter,
        data,
    )
}
